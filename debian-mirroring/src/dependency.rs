// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package dependency expressions.

Implements the relationship syntax from the Debian Policy Manual §7.1:
comma separated dependencies, `|` separated alternatives, optional
parenthesized version constraints, and optional architecture qualifiers.
e.g. `libc6 (>= 2.4), libx11-6 | libx11-7 [amd64]`.
*/

use {
    crate::{
        error::{MirrorError, Result},
        package::Package,
        package_version::PackageVersion,
    },
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
    },
};

/// A version comparison operator in a dependency constraint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionRelation {
    /// `<<`
    StrictlyEarlier,
    /// `<=`
    EarlierOrEqual,
    /// `=`
    Equal,
    /// `>=`
    LaterOrEqual,
    /// `>>`
    StrictlyLater,
}

impl VersionRelation {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "<<" | "<" => Ok(Self::StrictlyEarlier),
            "<=" => Ok(Self::EarlierOrEqual),
            "=" => Ok(Self::Equal),
            ">=" => Ok(Self::LaterOrEqual),
            ">>" | ">" => Ok(Self::StrictlyLater),
            _ => Err(MirrorError::DependencyParse(format!(
                "unknown version relation: {}",
                s
            ))),
        }
    }

    /// Whether a candidate-vs-constraint ordering satisfies this relation.
    pub fn allows(&self, ordering: Ordering) -> bool {
        match self {
            Self::StrictlyEarlier => ordering == Ordering::Less,
            Self::EarlierOrEqual => ordering != Ordering::Greater,
            Self::Equal => ordering == Ordering::Equal,
            Self::LaterOrEqual => ordering != Ordering::Less,
            Self::StrictlyLater => ordering == Ordering::Greater,
        }
    }
}

impl Display for VersionRelation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrictlyEarlier => write!(f, "<<"),
            Self::EarlierOrEqual => write!(f, "<="),
            Self::Equal => write!(f, "="),
            Self::LaterOrEqual => write!(f, ">="),
            Self::StrictlyLater => write!(f, ">>"),
        }
    }
}

/// A version constraint attached to a dependency. e.g. `(>= 2.4)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionConstraint {
    pub relation: VersionRelation,
    pub version: PackageVersion,
}

impl VersionConstraint {
    /// Whether a concrete version satisfies this constraint.
    pub fn satisfied_by(&self, version: &PackageVersion) -> bool {
        self.relation.allows(version.cmp(&self.version))
    }
}

impl Display for VersionConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {})", self.relation, self.version)
    }
}

/// A single dependency on one package, possibly version and architecture constrained.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SingleDependency {
    /// Name of the depended-upon package.
    pub package: String,
    /// Architecture qualifier from `name:arch` syntax, if any.
    pub arch_qualifier: Option<String>,
    /// Version constraint, if any.
    pub constraint: Option<VersionConstraint>,
    /// Architecture restriction list from `[arch ...]` syntax, if any.
    pub architectures: Option<Vec<String>>,
}

impl SingleDependency {
    /// Parse a single dependency expression like `libc6 (>= 2.4) [amd64]`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut remaining = s.trim();

        if remaining.is_empty() {
            return Err(MirrorError::DependencyParse(s.to_string()));
        }

        let name_end = remaining
            .find(|c: char| c.is_whitespace() || c == '(' || c == '[')
            .unwrap_or(remaining.len());
        let name = &remaining[0..name_end];
        remaining = remaining[name_end..].trim_start();

        let (package, arch_qualifier) = match name.split_once(':') {
            Some((package, qualifier)) => (package.to_string(), Some(qualifier.to_string())),
            None => (name.to_string(), None),
        };

        if package.is_empty() {
            return Err(MirrorError::DependencyParse(s.to_string()));
        }

        let mut constraint = None;
        if let Some(rest) = remaining.strip_prefix('(') {
            let end = rest
                .find(')')
                .ok_or_else(|| MirrorError::DependencyParse(s.to_string()))?;
            let inner = rest[0..end].trim();
            remaining = rest[end + 1..].trim_start();

            let relation_end = inner
                .find(|c: char| !matches!(c, '<' | '>' | '='))
                .ok_or_else(|| MirrorError::DependencyParse(s.to_string()))?;
            let relation = VersionRelation::parse(&inner[0..relation_end])?;
            let version = PackageVersion::parse(inner[relation_end..].trim())?;

            constraint = Some(VersionConstraint { relation, version });
        }

        let mut architectures = None;
        if let Some(rest) = remaining.strip_prefix('[') {
            let end = rest
                .find(']')
                .ok_or_else(|| MirrorError::DependencyParse(s.to_string()))?;
            architectures = Some(
                rest[0..end]
                    .split_whitespace()
                    .map(|a| a.to_string())
                    .collect(),
            );
            remaining = rest[end + 1..].trim_start();
        }

        if !remaining.is_empty() {
            return Err(MirrorError::DependencyParse(s.to_string()));
        }

        Ok(Self {
            package,
            arch_qualifier,
            constraint,
            architectures,
        })
    }

    /// Whether a concrete package satisfies this dependency.
    ///
    /// The architecture restriction list is a build-selection mechanism and
    /// is not consulted here; it filters which dependencies apply, not which
    /// packages satisfy them.
    pub fn satisfied_by(&self, package: &Package) -> bool {
        if package.name != self.package {
            return false;
        }

        match &self.constraint {
            Some(constraint) => constraint.satisfied_by(&package.version),
            None => true,
        }
    }
}

impl Display for SingleDependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.package)?;

        if let Some(qualifier) = &self.arch_qualifier {
            write!(f, ":{}", qualifier)?;
        }
        if let Some(constraint) = &self.constraint {
            write!(f, " {}", constraint)?;
        }
        if let Some(architectures) = &self.architectures {
            write!(f, " [{}]", architectures.join(" "))?;
        }

        Ok(())
    }
}

/// A dependency with alternatives. e.g. `libx11-6 | libx11-7`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dependency {
    pub alternatives: Vec<SingleDependency>,
}

impl Dependency {
    /// Parse a `|` separated group of alternatives.
    pub fn parse(s: &str) -> Result<Self> {
        let alternatives = s
            .split('|')
            .map(SingleDependency::parse)
            .collect::<Result<Vec<_>>>()?;

        if alternatives.is_empty() {
            return Err(MirrorError::DependencyParse(s.to_string()));
        }

        Ok(Self { alternatives })
    }

    /// Whether any alternative is satisfied by the given package.
    pub fn satisfied_by(&self, package: &Package) -> bool {
        self.alternatives.iter().any(|d| d.satisfied_by(package))
    }
}

impl Display for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts = self
            .alternatives
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>();

        write!(f, "{}", parts.join(" | "))
    }
}

/// An ordered list of [Dependency], as expressed by a `Depends` style field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DependencyList {
    pub dependencies: Vec<Dependency>,
}

impl DependencyList {
    /// Parse a comma separated dependency field value.
    pub fn parse(s: &str) -> Result<Self> {
        let dependencies = s
            .split(',')
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .map(Dependency::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { dependencies })
    }
}

impl Display for DependencyList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts = self
            .dependencies
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>();

        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::package::Package};

    fn package(name: &str, version: &str) -> Package {
        Package::new(name, version, "amd64").unwrap()
    }

    #[test]
    fn parse_single() -> Result<()> {
        let dep = SingleDependency::parse("libc6 (>= 2.4)")?;
        assert_eq!(dep.package, "libc6");
        let constraint = dep.constraint.as_ref().unwrap();
        assert_eq!(constraint.relation, VersionRelation::LaterOrEqual);
        assert_eq!(constraint.version, PackageVersion::parse("2.4")?);

        let dep = SingleDependency::parse("libx11-6")?;
        assert_eq!(dep.package, "libx11-6");
        assert!(dep.constraint.is_none());

        let dep = SingleDependency::parse("foo:any (<< 1.0~rc1) [amd64 i386]")?;
        assert_eq!(dep.package, "foo");
        assert_eq!(dep.arch_qualifier.as_deref(), Some("any"));
        assert_eq!(
            dep.architectures,
            Some(vec!["amd64".to_string(), "i386".to_string()])
        );

        Ok(())
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SingleDependency::parse("").is_err());
        assert!(SingleDependency::parse("foo (>= 1.0").is_err());
        assert!(SingleDependency::parse("foo (?? 1.0)").is_err());
        assert!(SingleDependency::parse("foo bar").is_err());
    }

    #[test]
    fn parse_list() -> Result<()> {
        let list = DependencyList::parse("libc6 (>= 2.4), libx11-6 | libx11-7")?;
        assert_eq!(list.dependencies.len(), 2);
        assert_eq!(list.dependencies[1].alternatives.len(), 2);
        assert_eq!(
            list.to_string(),
            "libc6 (>= 2.4), libx11-6 | libx11-7"
        );

        Ok(())
    }

    #[test]
    fn satisfaction() -> Result<()> {
        let dep = Dependency::parse("libc6 (>= 2.4) | libc7")?;

        assert!(dep.satisfied_by(&package("libc6", "2.5")));
        assert!(dep.satisfied_by(&package("libc6", "2.4")));
        assert!(!dep.satisfied_by(&package("libc6", "2.3")));
        assert!(dep.satisfied_by(&package("libc7", "1.0")));
        assert!(!dep.satisfied_by(&package("libz", "9.9")));

        Ok(())
    }

    #[test]
    fn relation_semantics() -> Result<()> {
        let earlier = SingleDependency::parse("foo (<< 2.0)")?;
        assert!(earlier.satisfied_by(&package("foo", "1.9")));
        assert!(!earlier.satisfied_by(&package("foo", "2.0")));

        let exact = SingleDependency::parse("foo (= 1.0-1)")?;
        assert!(exact.satisfied_by(&package("foo", "1.0-1")));
        assert!(!exact.satisfied_by(&package("foo", "1.0-2")));

        Ok(())
    }
}
