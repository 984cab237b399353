// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string handling.

Versions take the form `[epoch:]upstream_version[-debian_revision]` and
sort according to the rules in the Debian Policy Manual
(<https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>).
The ordering is total and is implemented in full, including epoch handling,
the digit/non-digit alternation, and tilde sorting before everything.
*/

use {
    crate::error::{MirrorError, Result},
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// A Debian package version.
///
/// Equality follows the comparison rules, so `0:1.0` equals `1.0` and
/// `1.02` equals `1.2`.
#[derive(Clone, Debug, Eq)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        // Epoch is everything before the first colon, if present. The
        // debian_revision begins after the last hyphen, if present.
        let (epoch, remainder) = match s.find(':') {
            Some(pos) => (Some(&s[0..pos]), &s[pos + 1..]),
            None => (None, s),
        };

        let (upstream, revision) = match remainder.rfind('-') {
            Some(pos) => (&remainder[0..pos], Some(&remainder[pos + 1..])),
            None => (remainder, None),
        };

        let epoch = match epoch {
            Some(epoch) => {
                if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                    return Err(MirrorError::EpochNonNumeric(s.to_string()));
                }

                Some(u32::from_str(epoch)?)
            }
            None => None,
        };

        // upstream_version allows alphanumerics plus `. + ~`; hyphens only
        // when a debian_revision is present.
        if upstream.is_empty()
            || !upstream.chars().all(|c| match c {
                c if c.is_ascii_alphanumeric() => true,
                '.' | '+' | '~' => true,
                '-' => revision.is_some(),
                ':' => epoch.is_some(),
                _ => false,
            })
        {
            return Err(MirrorError::UpstreamVersionIllegalChar(s.to_string()));
        }

        let debian_revision = match revision {
            Some(revision) => {
                if revision.is_empty()
                    || !revision.chars().all(|c| match c {
                        c if c.is_ascii_alphanumeric() => true,
                        '+' | '.' | '~' => true,
                        _ => false,
                    })
                {
                    return Err(MirrorError::DebianRevisionIllegalChar(s.to_string()));
                }

                Some(revision.to_string())
            }
            None => None,
        };

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision,
        })
    }

    /// The `epoch` component, if explicitly present.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// The epoch value used for comparisons; an absent epoch counts as `0`.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// The `upstream_version` component.
    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    /// The `debian_revision` component, if present.
    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }

        write!(f, "{}", self.upstream_version)?;

        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}

impl FromStr for PackageVersion {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PackageVersion {
    type Error = MirrorError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PackageVersion> for String {
    fn from(v: PackageVersion) -> Self {
        v.to_string()
    }
}

/// Sort weight of a character within a non-digit run.
///
/// End of string sorts before everything except tilde; letters sort before
/// non-letters.
fn char_weight(c: Option<char>) -> i64 {
    match c {
        Some('~') => -1,
        None => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i64,
        Some(c) => c as i64 + 0x100,
    }
}

/// Compare two non-digit runs using the modified lexical ordering.
fn compare_non_digit_runs(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars();
    let mut b_chars = b.chars();

    loop {
        let a_c = a_chars.next();
        let b_c = b_chars.next();

        if a_c.is_none() && b_c.is_none() {
            return Ordering::Equal;
        }

        match char_weight(a_c).cmp(&char_weight(b_c)) {
            Ordering::Equal => {}
            res => return res,
        }
    }
}

/// Split off the leading run of non-digit characters.
fn split_non_digit_run(s: &str) -> (&str, &str) {
    match s.find(|c: char| c.is_ascii_digit()) {
        Some(pos) => (&s[0..pos], &s[pos..]),
        None => (s, ""),
    }
}

/// Split off the leading run of digits.
fn split_digit_run(s: &str) -> (&str, &str) {
    let pos = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());

    (&s[0..pos], &s[pos..])
}

/// Compare two digit runs numerically, without converting to an integer,
/// so arbitrarily long runs compare correctly.
///
/// An empty run counts as zero, per policy.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');

    // Equal-length runs of nonzero-prefixed digits compare lexically.
    match a.len().cmp(&b.len()) {
        Ordering::Equal => a.cmp(b),
        res => res,
    }
}

/// Compare a version component string (upstream version or revision) using Debian rules.
fn compare_component(a: &str, b: &str) -> Ordering {
    let mut a_remaining = a;
    let mut b_remaining = b;

    loop {
        let (a_run, a_rest) = split_non_digit_run(a_remaining);
        let (b_run, b_rest) = split_non_digit_run(b_remaining);

        match compare_non_digit_runs(a_run, b_run) {
            Ordering::Equal => {}
            res => return res,
        }

        let (a_run, a_rest) = split_digit_run(a_rest);
        let (b_run, b_rest) = split_digit_run(b_rest);

        match compare_digit_runs(a_run, b_run) {
            Ordering::Equal => {}
            res => return res,
        }

        if a_rest.is_empty() && b_rest.is_empty() {
            return Ordering::Equal;
        }

        a_remaining = a_rest;
        b_remaining = b_rest;
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd<Self> for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Epoch numerically, then upstream, then revision. A missing
        // revision compares as "0".
        match self.epoch_assumed().cmp(&other.epoch_assumed()) {
            Ordering::Equal => {}
            res => return res,
        }

        match compare_component(&self.upstream_version, &other.upstream_version) {
            Ordering::Equal => {}
            res => return res,
        }

        compare_component(
            self.debian_revision.as_deref().unwrap_or("0"),
            other.debian_revision.as_deref().unwrap_or("0"),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn version(s: &str) -> PackageVersion {
        PackageVersion::parse(s).unwrap()
    }

    #[test]
    fn parse() -> Result<()> {
        let v = version("1:4.7.0+dfsg1-2");
        assert_eq!(v.epoch(), Some(1));
        assert_eq!(v.upstream_version(), "4.7.0+dfsg1");
        assert_eq!(v.debian_revision(), Some("2"));

        let v = version("3.3.2.final~github");
        assert_eq!(v.epoch(), None);
        assert_eq!(v.upstream_version(), "3.3.2.final~github");
        assert_eq!(v.debian_revision(), None);

        let v = version("0.18.0+dfsg-2+b1");
        assert_eq!(v.upstream_version(), "0.18.0+dfsg");
        assert_eq!(v.debian_revision(), Some("2+b1"));

        Ok(())
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(PackageVersion::parse("a:1.0").is_err());
        assert!(PackageVersion::parse("1.0 final").is_err());
        assert!(PackageVersion::parse("1.0-rev-a!").is_err());
        assert!(PackageVersion::parse("").is_err());
    }

    #[test]
    fn format_round_trips() {
        for s in ["1:4.7.0+dfsg1-2", "3.3.2.final~github", "0.18.0+dfsg-2+b1"] {
            assert_eq!(version(s).to_string(), s);
        }
    }

    #[test]
    fn tilde_sorts_before_everything() {
        assert!(version("1.0~beta1~svn1245") < version("1.0~beta1"));
        assert!(version("1.0~beta1") < version("1.0"));
        assert!(version("1.0~") < version("1.0"));
    }

    #[test]
    fn numeric_runs_compare_numerically() {
        assert!(version("1.9") < version("1.10"));
        assert!(version("1.02") == version("1.2"));
        assert!(version("2.4.7") < version("2.4.10"));
    }

    #[test]
    fn huge_numeric_runs_compare_without_overflow() {
        // Date-stamp style versions can exceed what a machine integer
        // holds; 25-digit runs must still order numerically.
        let small = version("1.1234567890123456789012345");
        let large = version("1.1234567890123456789012346");
        let longer = version("1.11234567890123456789012345");

        assert!(small < large);
        assert!(large < longer);
        assert!(small == version("1.01234567890123456789012345"));
    }

    #[test]
    fn epoch_dominates() {
        assert!(version("1:0.1") > version("99.9"));
        assert!(version("0:1.0") == version("1.0"));
    }

    #[test]
    fn revision_breaks_ties() {
        assert!(version("1.0-1") < version("1.0-2"));
        assert!(version("1.0") < version("1.0-1"));
        assert!(version("1.0-1~bpo1") < version("1.0-1"));
    }

    #[test]
    fn letters_sort_before_non_letters() {
        assert!(version("1.0a") < version("1.0+"));
        assert!(version("1.0alpha") > version("1.0a"));
    }
}
