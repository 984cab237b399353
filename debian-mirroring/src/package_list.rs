// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! In-memory package collections.

A [PackageList] is the materialized, disposable working set built from a
[crate::reflist::RefList] and a package store. The reference list is the
durable form; a package list is rebuilt whenever full metadata is needed
for querying, filtering, or dependency analysis.

Mutation follows single-writer discipline. Indexed queries require
[PackageList::prepare_index] first; querying an unindexed list is a
programming error and fails fast.
*/

use {
    crate::{
        dependency::{Dependency, DependencyList, SingleDependency},
        error::{MirrorError, Result},
        package::{Package, PackageRef},
        progress::Progress,
        reflist::RefList,
        store::PackageStore,
    },
    std::collections::{BTreeMap, HashMap, VecDeque},
};

/// Options controlling which relationship fields dependency walks follow.
#[derive(Clone, Copy, Debug, Default)]
pub struct DependencyOptions {
    /// Follow `Recommends` in addition to `Depends`/`Pre-Depends`.
    pub follow_recommends: bool,
    /// Follow `Suggests` in addition to `Depends`/`Pre-Depends`.
    pub follow_suggests: bool,
    /// Expand every satisfiable alternative instead of the first one.
    pub follow_all_variants: bool,
}

/// An in-memory collection of resolved packages.
#[derive(Clone, Debug, Default)]
pub struct PackageList {
    // Keyed by reference key so iteration order matches reference order.
    packages: BTreeMap<String, Package>,
    indexed: bool,
    by_name: HashMap<String, Vec<String>>,
    by_provides: HashMap<String, Vec<String>>,
}

impl PackageList {
    /// Construct an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize a list by resolving every reference through a package store.
    ///
    /// Fails on the first unresolvable reference with an error carrying the
    /// offending key; whether that is fatal or skippable is the caller's
    /// policy decision, made before calling this.
    pub fn from_ref_list(
        ref_list: &RefList,
        store: &dyn PackageStore,
        progress: &dyn Progress,
    ) -> Result<Self> {
        let mut list = Self::new();

        progress.init_bar(ref_list.len() as u64, false);

        for r in ref_list.iter() {
            let package = store.by_key(r).map_err(|e| MirrorError::RefLookup {
                key: r.as_str().to_string(),
                source: Box::new(e),
            })?;

            list.add(package);
            progress.add_bar(1);
        }

        progress.shutdown_bar();

        Ok(list)
    }

    /// Number of packages held.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Whether a package with the given reference is present.
    pub fn has(&self, r: &PackageRef) -> bool {
        self.packages.contains_key(r.as_str())
    }

    /// Iterate over packages in reference key order.
    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Insert or replace a package.
    ///
    /// Invalidates indexes; call [Self::prepare_index] again before querying.
    pub fn add(&mut self, package: Package) {
        self.packages
            .insert(package.key().as_str().to_string(), package);
        self.indexed = false;
    }

    /// Remove a package by reference.
    pub fn remove(&mut self, r: &PackageRef) -> Option<Package> {
        let removed = self.packages.remove(r.as_str());
        if removed.is_some() {
            self.indexed = false;
        }

        removed
    }

    /// Produce the reference list for the current contents.
    pub fn to_ref_list(&self) -> RefList {
        RefList::from_refs(self.packages.values().map(|p| p.key()).collect())
    }

    /// Build secondary indexes required for querying.
    ///
    /// Every package's architecture must belong to `architectures` (the
    /// pseudo-architecture `all` is always accepted).
    pub fn prepare_index(&mut self, architectures: &[String]) -> Result<()> {
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        let mut by_provides: HashMap<String, Vec<String>> = HashMap::new();

        for (key, package) in &self.packages {
            if package.architecture != "all"
                && !architectures.iter().any(|a| *a == package.architecture)
            {
                return Err(MirrorError::UnexpectedArchitecture {
                    package: package.name.clone(),
                    architecture: package.architecture.clone(),
                });
            }

            by_name
                .entry(package.name.clone())
                .or_default()
                .push(key.clone());

            for provided in &package.provides {
                by_provides
                    .entry(provided.clone())
                    .or_default()
                    .push(key.clone());
            }
        }

        self.by_name = by_name;
        self.by_provides = by_provides;
        self.indexed = true;

        Ok(())
    }

    fn assert_indexed(&self) {
        assert!(
            self.indexed,
            "prepare_index must be called before indexed queries"
        );
    }

    /// Find packages satisfying a single dependency expression.
    ///
    /// Matches real packages against name and version constraint; packages
    /// advertising the name via `Provides` match only unconstrained
    /// dependencies. Results are deterministic: highest version first,
    /// byte-wise key order breaking ties.
    pub fn search(&self, dep: &SingleDependency) -> Vec<&Package> {
        self.assert_indexed();

        let mut candidates: Vec<&Package> = self
            .by_name
            .get(&dep.package)
            .into_iter()
            .flatten()
            .filter_map(|key| self.packages.get(key))
            .filter(|p| dep.satisfied_by(p))
            .collect();

        if dep.constraint.is_none() {
            candidates.extend(
                self.by_provides
                    .get(&dep.package)
                    .into_iter()
                    .flatten()
                    .filter_map(|key| self.packages.get(key)),
            );
        }

        candidates.sort_by(|a, b| {
            b.version
                .cmp(&a.version)
                .then_with(|| a.key().as_str().cmp(b.key().as_str()))
        });
        candidates.dedup_by_key(|p| p.key());

        candidates
    }

    /// Whether any alternative of a dependency is satisfiable from this list.
    pub fn satisfies(&self, dep: &Dependency, arch_list: &[String]) -> bool {
        dep.alternatives
            .iter()
            .any(|alt| !self.search_with_architectures(alt, arch_list).is_empty())
    }

    fn search_with_architectures(
        &self,
        dep: &SingleDependency,
        arch_list: &[String],
    ) -> Vec<&Package> {
        self.search(dep)
            .into_iter()
            .filter(|p| p.architecture == "all" || arch_list.iter().any(|a| *a == p.architecture))
            .collect()
    }

    fn relationship_fields(
        package: &Package,
        options: &DependencyOptions,
    ) -> Result<Vec<Dependency>> {
        let mut fields: Vec<Option<Result<DependencyList>>> =
            vec![package.depends_list(), package.pre_depends_list()];

        if options.follow_recommends {
            fields.push(package.recommends_list());
        }
        if options.follow_suggests {
            fields.push(package.suggests_list());
        }

        let mut dependencies = vec![];
        for field in fields.into_iter().flatten() {
            dependencies.extend(field?.dependencies);
        }

        Ok(dependencies)
    }

    /// Select packages matching queries, optionally expanding dependencies.
    ///
    /// With `follow_deps`, the dependency closure of each match is pulled in
    /// from this list. A dependency already satisfied by the result set or
    /// by `source_exclude` is not expanded again. Resolution is
    /// deterministic for identical inputs: candidates are considered
    /// highest-version-first with byte-wise key order breaking ties.
    /// Unsatisfiable dependencies are reported through `progress` and
    /// skipped.
    pub fn filter(
        &self,
        queries: &[SingleDependency],
        follow_deps: bool,
        source_exclude: Option<&PackageList>,
        options: DependencyOptions,
        arch_list: &[String],
        progress: &dyn Progress,
    ) -> Result<PackageList> {
        self.assert_indexed();

        let mut result = PackageList::new();
        let mut pending: VecDeque<Dependency> = VecDeque::new();

        for query in queries {
            let matches = self.search_with_architectures(query, arch_list);

            if matches.is_empty() {
                progress.printf(&format!("no package matches query {}", query));
                continue;
            }

            for package in matches {
                if follow_deps {
                    pending.extend(Self::relationship_fields(package, &options)?);
                }
                result.add(package.clone());
            }
        }

        if !follow_deps {
            return Ok(result);
        }

        while let Some(dep) = pending.pop_front() {
            let already_satisfied = result.iter().any(|p| dep.satisfied_by(p))
                || source_exclude
                    .map(|excluded| excluded.iter().any(|p| dep.satisfied_by(p)))
                    .unwrap_or(false);

            if already_satisfied {
                continue;
            }

            let mut expanded = false;

            for alternative in &dep.alternatives {
                let candidates = self.search_with_architectures(alternative, arch_list);

                if let Some(best) = candidates.first() {
                    pending.extend(Self::relationship_fields(best, &options)?);
                    result.add((*best).clone());
                    expanded = true;

                    if !options.follow_all_variants {
                        break;
                    }
                }
            }

            if !expanded {
                progress.printf(&format!("unable to satisfy dependency: {}", dep));
            }
        }

        Ok(result)
    }

    /// Return dependency expressions of this list's packages that
    /// `sources` cannot satisfy.
    ///
    /// Neither list is mutated. `sources` must be indexed.
    pub fn verify_dependencies(
        &self,
        options: DependencyOptions,
        arch_list: &[String],
        sources: &PackageList,
        progress: &dyn Progress,
    ) -> Result<Vec<Dependency>> {
        let mut missing: Vec<Dependency> = vec![];

        progress.init_bar(self.len() as u64, false);

        for package in self.iter() {
            for dep in Self::relationship_fields(package, &options)? {
                if !sources.satisfies(&dep, arch_list)
                    && !missing.iter().any(|m| *m == dep)
                {
                    missing.push(dep);
                }
            }

            progress.add_bar(1);
        }

        progress.shutdown_bar();

        Ok(missing)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{progress::NullProgress, store::MemoryPackageStore},
    };

    fn package(name: &str, version: &str, architecture: &str) -> Package {
        Package::new(name, version, architecture).unwrap()
    }

    fn package_with_depends(name: &str, version: &str, depends: &str) -> Package {
        let mut p = package(name, version, "amd64");
        p.depends = Some(depends.to_string());
        p
    }

    fn query(s: &str) -> SingleDependency {
        SingleDependency::parse(s).unwrap()
    }

    fn architectures() -> Vec<String> {
        vec!["amd64".to_string()]
    }

    #[test]
    fn from_ref_list_resolves_every_key() -> Result<()> {
        let store = MemoryPackageStore::new();
        store.insert(package("a", "1.0", "amd64"));
        store.insert(package("b", "2.0", "amd64"));

        let refs = RefList::from_refs(vec![
            package("a", "1.0", "amd64").key(),
            package("b", "2.0", "amd64").key(),
        ]);

        let list = PackageList::from_ref_list(&refs, &store, &NullProgress)?;
        assert_eq!(list.len(), 2);

        Ok(())
    }

    #[test]
    fn from_ref_list_reports_offending_key() {
        let store = MemoryPackageStore::new();
        let refs = RefList::from_refs(vec![package("ghost", "1.0", "amd64").key()]);

        match PackageList::from_ref_list(&refs, &store, &NullProgress) {
            Err(MirrorError::RefLookup { key, .. }) => {
                assert_eq!(key, "Pamd64 ghost 1.0");
            }
            other => panic!("unexpected result: {:?}", other.map(|l| l.len())),
        }
    }

    #[test]
    fn prepare_index_validates_architectures() {
        let mut list = PackageList::new();
        list.add(package("a", "1.0", "amd64"));
        list.add(package("b", "1.0", "all"));
        assert!(list.prepare_index(&architectures()).is_ok());

        list.add(package("c", "1.0", "sparc"));
        match list.prepare_index(&architectures()) {
            Err(MirrorError::UnexpectedArchitecture {
                package,
                architecture,
            }) => {
                assert_eq!(package, "c");
                assert_eq!(architecture, "sparc");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "prepare_index must be called")]
    fn search_before_index_is_a_programming_error() {
        let mut list = PackageList::new();
        list.add(package("a", "1.0", "amd64"));
        list.search(&query("a"));
    }

    #[test]
    fn search_prefers_highest_version() -> Result<()> {
        let mut list = PackageList::new();
        list.add(package("nginx", "1.9", "amd64"));
        list.add(package("nginx", "1.10", "amd64"));
        list.prepare_index(&architectures())?;

        let found = list.search(&query("nginx"));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].version.to_string(), "1.10");

        let found = list.search(&query("nginx (<< 1.10)"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version.to_string(), "1.9");

        Ok(())
    }

    #[test]
    fn search_matches_provides_for_unconstrained_deps() -> Result<()> {
        let mut provider = package("mta-exim", "4.94", "amd64");
        provider.provides = vec!["mail-transport-agent".to_string()];

        let mut list = PackageList::new();
        list.add(provider);
        list.prepare_index(&architectures())?;

        assert_eq!(list.search(&query("mail-transport-agent")).len(), 1);
        assert!(list
            .search(&query("mail-transport-agent (>= 1.0)"))
            .is_empty());

        Ok(())
    }

    #[test]
    fn filter_without_deps_matches_queries_only() -> Result<()> {
        let mut list = PackageList::new();
        list.add(package_with_depends("app", "1.0", "libfoo"));
        list.add(package("libfoo", "1.0", "amd64"));
        list.prepare_index(&architectures())?;

        let filtered = list.filter(
            &[query("app")],
            false,
            None,
            DependencyOptions::default(),
            &architectures(),
            &NullProgress,
        )?;

        assert_eq!(filtered.len(), 1);
        assert!(filtered.has(&package("app", "1.0", "amd64").key()));

        Ok(())
    }

    #[test]
    fn filter_follows_transitive_dependencies() -> Result<()> {
        let mut list = PackageList::new();
        list.add(package_with_depends("app", "1.0", "libfoo (>= 1.0)"));
        list.add(package_with_depends("libfoo", "1.2", "libbar"));
        list.add(package("libbar", "0.9", "amd64"));
        list.add(package("unrelated", "1.0", "amd64"));
        list.prepare_index(&architectures())?;

        let filtered = list.filter(
            &[query("app")],
            true,
            None,
            DependencyOptions::default(),
            &architectures(),
            &NullProgress,
        )?;

        assert_eq!(filtered.len(), 3);
        assert!(filtered.has(&package("libbar", "0.9", "amd64").key()));
        assert!(!filtered.has(&package("unrelated", "1.0", "amd64").key()));

        Ok(())
    }

    #[test]
    fn filter_dependency_resolution_is_deterministic() -> Result<()> {
        let mut list = PackageList::new();
        list.add(package_with_depends("app", "1.0", "libfoo"));
        list.add(package("libfoo", "1.0", "amd64"));
        list.add(package("libfoo", "2.0", "amd64"));
        list.prepare_index(&architectures())?;

        for _ in 0..4 {
            let filtered = list.filter(
                &[query("app")],
                true,
                None,
                DependencyOptions::default(),
                &architectures(),
                &NullProgress,
            )?;

            // Highest version wins, every time.
            assert_eq!(filtered.len(), 2);
            assert!(filtered.has(&package("libfoo", "2.0", "amd64").key()));
        }

        Ok(())
    }

    #[test]
    fn filter_respects_exclude_list() -> Result<()> {
        let mut list = PackageList::new();
        list.add(package_with_depends("app", "1.0", "libfoo"));
        list.add(package("libfoo", "1.0", "amd64"));
        list.prepare_index(&architectures())?;

        let mut exclude = PackageList::new();
        exclude.add(package("libfoo", "1.0", "amd64"));

        let filtered = list.filter(
            &[query("app")],
            true,
            Some(&exclude),
            DependencyOptions::default(),
            &architectures(),
            &NullProgress,
        )?;

        // libfoo is already available on the excluded side.
        assert_eq!(filtered.len(), 1);

        Ok(())
    }

    #[test]
    fn verify_dependencies_reports_unsatisfied() -> Result<()> {
        let mut list = PackageList::new();
        list.add(package_with_depends("app", "1.0", "libfoo (>= 2.0), libbar"));
        list.prepare_index(&architectures())?;

        let mut sources = PackageList::new();
        sources.add(package("libfoo", "1.0", "amd64"));
        sources.add(package("libbar", "1.0", "amd64"));
        sources.prepare_index(&architectures())?;

        let missing = list.verify_dependencies(
            DependencyOptions::default(),
            &architectures(),
            &sources,
            &NullProgress,
        )?;

        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].to_string(), "libfoo (>= 2.0)");

        Ok(())
    }
}
