// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package reference lists.

A [RefList] is an ordered collection of unique [PackageRef] keys. It is the
durable representation of "a set of packages" throughout mirror, snapshot,
and publish workflows; full package metadata is resolved through a package
store only when needed.

Keys are kept strictly increasing by byte value. All set operations exploit
this to run as linear merge-joins, and all of them produce new lists:
constructed values are never mutated by concurrent readers.
*/

use {
    crate::{
        error::Result,
        package::{Package, PackageRef},
        store::PackageStore,
    },
    serde::{Deserialize, Serialize},
    std::cmp::Ordering,
};

/// One entry of a reference list diff.
///
/// Either side may be absent when the package exists in only one list.
#[derive(Clone, Debug)]
pub struct PackageDiff {
    pub left: Option<Package>,
    pub right: Option<Package>,
}

/// An ordered, deduplicated list of package references.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RefList {
    refs: Vec<PackageRef>,
}

impl RefList {
    /// Construct an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct from arbitrary refs, sorting and deduplicating.
    pub fn from_refs(mut refs: Vec<PackageRef>) -> Self {
        refs.sort();
        refs.dedup();

        Self { refs }
    }

    /// Number of references held.
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Whether the given reference is present.
    pub fn has(&self, r: &PackageRef) -> bool {
        self.refs.binary_search(r).is_ok()
    }

    /// Iterate over references in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &PackageRef> {
        self.refs.iter()
    }

    /// Visit every reference exactly once, in sorted order.
    ///
    /// Stops at and propagates the first error returned by `f`.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&PackageRef) -> Result<()>,
    {
        for r in &self.refs {
            f(r)?;
        }

        Ok(())
    }

    /// Produce the union of two reference lists.
    ///
    /// Identical keys are always collapsed to one entry. Entries sharing
    /// architecture+name but differing in version are *conflicts*, resolved
    /// by caller policy:
    ///
    /// * `override_matching` — `other`'s entries replace this list's entries
    ///   for conflicted packages ("replace with newer" semantics).
    /// * `ignore_conflicts` — without `override_matching`, conflicts resolve
    ///   quietly in favor of this list's entries.
    /// * neither — conflicting entries are all kept (plain key union).
    pub fn merge(&self, other: &Self, override_matching: bool, ignore_conflicts: bool) -> Self {
        #[derive(Clone, Copy, Eq, PartialEq)]
        enum Origin {
            Left,
            Right,
            Both,
        }

        // Linear merge-join keeping track of which side contributed each key.
        let mut merged: Vec<(PackageRef, Origin)> =
            Vec::with_capacity(self.refs.len() + other.refs.len());
        let (mut i, mut j) = (0, 0);

        while i < self.refs.len() && j < other.refs.len() {
            match self.refs[i].cmp(&other.refs[j]) {
                Ordering::Equal => {
                    merged.push((self.refs[i].clone(), Origin::Both));
                    i += 1;
                    j += 1;
                }
                Ordering::Less => {
                    merged.push((self.refs[i].clone(), Origin::Left));
                    i += 1;
                }
                Ordering::Greater => {
                    merged.push((other.refs[j].clone(), Origin::Right));
                    j += 1;
                }
            }
        }
        merged.extend(self.refs[i..].iter().map(|r| (r.clone(), Origin::Left)));
        merged.extend(other.refs[j..].iter().map(|r| (r.clone(), Origin::Right)));

        if !override_matching && !ignore_conflicts {
            return Self {
                refs: merged.into_iter().map(|(r, _)| r).collect(),
            };
        }

        // Walk architecture+name groups (contiguous thanks to key layout)
        // and resolve groups containing entries from both sides.
        let mut refs = Vec::with_capacity(merged.len());
        let mut start = 0;

        while start < merged.len() {
            let group = merged[start].0.group_key().to_string();
            let mut end = start;
            while end < merged.len() && merged[end].0.group_key() == group {
                end += 1;
            }

            let entries = &merged[start..end];
            let conflicted = entries.iter().any(|(_, o)| *o != Origin::Both)
                && entries.iter().any(|(_, o)| matches!(o, Origin::Left | Origin::Both))
                && entries.iter().any(|(_, o)| matches!(o, Origin::Right | Origin::Both));

            for (r, origin) in entries {
                let keep = if !conflicted {
                    true
                } else if override_matching {
                    matches!(origin, Origin::Right | Origin::Both)
                } else {
                    matches!(origin, Origin::Left | Origin::Both)
                };

                if keep {
                    refs.push(r.clone());
                }
            }

            start = end;
        }

        Self { refs }
    }

    /// Return entries present in this list but absent from `other`.
    pub fn subtract(&self, other: &Self) -> Self {
        let mut refs = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < self.refs.len() {
            if j >= other.refs.len() {
                refs.extend(self.refs[i..].iter().cloned());
                break;
            }

            match self.refs[i].cmp(&other.refs[j]) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                Ordering::Less => {
                    refs.push(self.refs[i].clone());
                    i += 1;
                }
                Ordering::Greater => {
                    j += 1;
                }
            }
        }

        Self { refs }
    }

    /// Compute the difference between two reference lists.
    ///
    /// Both lists are walked once in sorted order. Identical keys cancel out
    /// and produce no entry, so diffing a list against itself yields an
    /// empty result. Entries sharing architecture+name but differing in
    /// version pair up into one [PackageDiff] with both sides resolved;
    /// entries present on only one side produce a one-sided diff.
    pub fn diff(&self, other: &Self, store: &dyn PackageStore) -> Result<Vec<PackageDiff>> {
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);

        while i < self.refs.len() || j < other.refs.len() {
            let left = self.refs.get(i);
            let right = other.refs.get(j);

            let ordering = match (left, right) {
                (Some(l), Some(r)) => l.cmp(r),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => unreachable!(),
            };

            if ordering == Ordering::Equal {
                i += 1;
                j += 1;
                continue;
            }

            let related = matches!((left, right), (Some(l), Some(r)) if l.group_key() == r.group_key());

            if related {
                result.push(PackageDiff {
                    left: Some(store.by_key(left.expect("checked above"))?),
                    right: Some(store.by_key(right.expect("checked above"))?),
                });
                i += 1;
                j += 1;
            } else if ordering == Ordering::Less {
                result.push(PackageDiff {
                    left: Some(store.by_key(left.expect("checked above"))?),
                    right: None,
                });
                i += 1;
            } else {
                result.push(PackageDiff {
                    left: None,
                    right: Some(store.by_key(right.expect("checked above"))?),
                });
                j += 1;
            }
        }

        Ok(result)
    }

    /// Reduce the list in place, keeping only the highest version per
    /// architecture+name group.
    ///
    /// Versions compare using full Debian ordering. A key whose version
    /// fails to parse falls back to byte ordering within its group.
    pub fn filter_latest_refs(&mut self) {
        let mut kept: Vec<PackageRef> = Vec::with_capacity(self.refs.len());

        for r in self.refs.drain(..) {
            match kept.last() {
                Some(last) if last.group_key() == r.group_key() => {
                    let replace = match (last.version(), r.version()) {
                        (Ok(last_version), Ok(version)) => version > last_version,
                        // Sorted input: r follows last byte-wise.
                        _ => true,
                    };

                    if replace {
                        *kept.last_mut().expect("kept is non-empty") = r;
                    }
                }
                _ => kept.push(r),
            }
        }

        self.refs = kept;
    }

    /// Verify the sortedness/uniqueness invariant. Exposed for tests.
    #[cfg(test)]
    fn is_strictly_sorted(&self) -> bool {
        self.refs.windows(2).all(|w| w[0] < w[1])
    }
}

impl<'a> IntoIterator for &'a RefList {
    type Item = &'a PackageRef;
    type IntoIter = std::slice::Iter<'a, PackageRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.refs.iter()
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{error::MirrorError, package::Package, store::MemoryPackageStore},
    };

    fn reference(name: &str, version: &str) -> PackageRef {
        PackageRef::new("amd64", name, version)
    }

    fn list(entries: &[(&str, &str)]) -> RefList {
        RefList::from_refs(
            entries
                .iter()
                .map(|(name, version)| reference(name, version))
                .collect(),
        )
    }

    fn names(l: &RefList) -> Vec<String> {
        l.iter().map(|r| r.as_str().to_string()).collect()
    }

    #[test]
    fn from_refs_sorts_and_dedups() {
        let l = RefList::from_refs(vec![
            reference("zsh", "1.0"),
            reference("bash", "1.0"),
            reference("bash", "1.0"),
        ]);

        assert_eq!(l.len(), 2);
        assert!(l.is_strictly_sorted());
        assert!(l.has(&reference("zsh", "1.0")));
        assert!(!l.has(&reference("fish", "1.0")));
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let a = list(&[("pkg1", "1.0"), ("pkg2", "2.0")]);

        assert_eq!(a.merge(&RefList::new(), true, false), a);
        assert_eq!(RefList::new().merge(&a, true, false), a);
    }

    #[test]
    fn self_merge_is_idempotent() {
        let a = list(&[("pkg1", "1.0"), ("pkg2", "2.0")]);

        assert_eq!(a.merge(&a, true, false), a);
        assert_eq!(a.merge(&a, false, false), a);
    }

    #[test]
    fn merge_override_replaces_matching_group() {
        let a = list(&[("pkg1", "1.0"), ("pkg2", "1.0")]);
        let b = list(&[("pkg2", "2.0")]);

        let merged = a.merge(&b, true, false);
        assert_eq!(
            names(&merged),
            vec!["Pamd64 pkg1 1.0", "Pamd64 pkg2 2.0"]
        );
        assert!(merged.is_strictly_sorted());
    }

    #[test]
    fn merge_without_policies_keeps_both_versions() {
        let a = list(&[("pkg2", "1.0")]);
        let b = list(&[("pkg2", "2.0")]);

        let merged = a.merge(&b, false, false);
        assert_eq!(
            names(&merged),
            vec!["Pamd64 pkg2 1.0", "Pamd64 pkg2 2.0"]
        );
    }

    #[test]
    fn merge_ignore_conflicts_preserves_receiver() {
        let a = list(&[("pkg2", "1.0")]);
        let b = list(&[("pkg2", "2.0")]);

        let merged = a.merge(&b, false, true);
        assert_eq!(names(&merged), vec!["Pamd64 pkg2 1.0"]);
    }

    #[test]
    fn merge_and_subtract_partially_overlapping_lists() {
        // A = {pkg1@1.0, pkg2@2.0}, B = {pkg2@2.0, pkg3@1.0}
        let a = list(&[("pkg1", "1.0"), ("pkg2", "2.0")]);
        let b = list(&[("pkg2", "2.0"), ("pkg3", "1.0")]);

        let merged = a.merge(&b, true, false);
        assert_eq!(
            names(&merged),
            vec![
                "Pamd64 pkg1 1.0",
                "Pamd64 pkg2 2.0",
                "Pamd64 pkg3 1.0",
            ]
        );

        assert_eq!(names(&a.subtract(&b)), vec!["Pamd64 pkg1 1.0"]);
        assert_eq!(names(&b.subtract(&a)), vec!["Pamd64 pkg3 1.0"]);
    }

    #[test]
    fn union_decomposes_into_disjoint_parts() {
        let a = list(&[("a", "1"), ("b", "1"), ("c", "1")]);
        let b = list(&[("b", "1"), ("c", "1"), ("d", "1")]);

        // (A - B) ∪ (B - A) ∪ (A ∩ B) == A ∪ B
        let intersection = a.subtract(&a.subtract(&b));
        let reconstructed = a
            .subtract(&b)
            .merge(&b.subtract(&a), false, false)
            .merge(&intersection, false, false);

        assert_eq!(reconstructed, a.merge(&b, false, false));
        assert!(reconstructed.is_strictly_sorted());
    }

    #[test]
    fn subtract_disjoint_and_self() {
        let a = list(&[("pkg1", "1.0")]);
        let b = list(&[("pkg9", "1.0")]);

        assert_eq!(a.subtract(&b), a);
        assert!(a.subtract(&a).is_empty());
    }

    fn store_with(lists: &[&RefList]) -> MemoryPackageStore {
        let store = MemoryPackageStore::default();
        for l in lists {
            for r in l.iter() {
                let (architecture, name, version) = r.parse().unwrap();
                store.insert(Package::new(name, version, architecture).unwrap());
            }
        }
        store
    }

    #[test]
    fn diff_identical_lists_is_empty() -> Result<()> {
        let a = list(&[("pkg1", "1.0"), ("pkg2", "2.0")]);
        let store = store_with(&[&a]);

        assert!(a.diff(&a, &store)?.is_empty());

        Ok(())
    }

    #[test]
    fn diff_reports_one_sided_entries() -> Result<()> {
        let a = list(&[("pkg1", "1.0"), ("pkg2", "2.0")]);
        let b = list(&[("pkg2", "2.0"), ("pkg3", "1.0")]);
        let store = store_with(&[&a, &b]);

        let diff = a.diff(&b, &store)?;
        assert_eq!(diff.len(), 2);

        assert_eq!(diff[0].left.as_ref().unwrap().name, "pkg1");
        assert!(diff[0].right.is_none());

        assert!(diff[1].left.is_none());
        assert_eq!(diff[1].right.as_ref().unwrap().name, "pkg3");

        Ok(())
    }

    #[test]
    fn diff_pairs_version_changes() -> Result<()> {
        let a = list(&[("pkg1", "1.0")]);
        let b = list(&[("pkg1", "2.0")]);
        let store = store_with(&[&a, &b]);

        let diff = a.diff(&b, &store)?;
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].left.as_ref().unwrap().version.to_string(), "1.0");
        assert_eq!(diff[0].right.as_ref().unwrap().version.to_string(), "2.0");

        Ok(())
    }

    #[test]
    fn for_each_visits_in_order_and_stops_on_error() {
        let a = list(&[("pkg1", "1.0"), ("pkg2", "1.0"), ("pkg3", "1.0")]);

        let mut seen = vec![];
        a.for_each(|r| {
            seen.push(r.as_str().to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen, names(&a));

        let mut visited = 0;
        let res = a.for_each(|r| {
            visited += 1;
            if r.as_str().contains("pkg2") {
                Err(MirrorError::Other("stop".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(res.is_err());
        assert_eq!(visited, 2);
    }

    #[test]
    fn filter_latest_refs_keeps_highest_debian_version() {
        // 1.10 is newer than 1.9 under Debian rules despite byte order.
        let mut l = list(&[
            ("nginx", "1.9"),
            ("nginx", "1.10"),
            ("zsh", "5.8"),
        ]);
        l.filter_latest_refs();

        assert_eq!(
            names(&l),
            vec!["Pamd64 nginx 1.10", "Pamd64 zsh 5.8"]
        );
    }

    #[test]
    fn filter_latest_refs_respects_epochs() {
        let mut l = list(&[("vim", "1:7.0"), ("vim", "8.2")]);
        l.filter_latest_refs();

        assert_eq!(names(&l), vec!["Pamd64 vim 1:7.0"]);
    }

    #[test]
    fn sortedness_invariant_preserved_by_operation_chains() {
        let a = list(&[("a", "1"), ("c", "2"), ("e", "3")]);
        let b = list(&[("b", "1"), ("c", "3"), ("d", "1")]);

        let chained = a
            .merge(&b, true, false)
            .subtract(&list(&[("d", "1")]))
            .merge(&a, false, true);

        assert!(chained.is_strictly_sorted());
    }
}
