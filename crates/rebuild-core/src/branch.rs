//! Release branch model and selection.
//!
//! Release branches follow the `<major>.<minor>.x` convention. The rebuild set
//! is the two most recent release branches (ascending) followed by the rolling
//! integration branch, which is always appended.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RebuildError, Result};

/// Name of the rolling integration branch.
pub const DEFAULT_ROLLING_BRANCH: &str = "development";

/// How many release branches are kept.
pub const DEFAULT_KEEP_RELEASES: usize = 2;

fn release_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // `\d` would also match non-ASCII digits.
    PATTERN.get_or_init(|| {
        Regex::new(r"^([0-9]+)\.([0-9]+)\.x$").expect("release branch pattern is valid")
    })
}

/// A branch name as returned by the hosting API.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchName(String);

impl BranchName {
    /// Create a branch name, rejecting empty or whitespace-only input.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RebuildError::InvalidBranchName(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parsed version if this is a `<major>.<minor>.x` release branch.
    pub fn release_version(&self) -> Option<ReleaseVersion> {
        ReleaseVersion::parse(&self.0)
    }

    pub fn is_release(&self) -> bool {
        self.release_version().is_some()
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `(major, minor)` of a release branch, compared numerically.
///
/// Components are kept as digit strings with leading zeros stripped so that
/// arbitrarily long numbers compare correctly without overflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseVersion {
    major: String,
    minor: String,
}

impl ReleaseVersion {
    /// Parse `<major>.<minor>.x`; anything else yields `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let caps = release_pattern().captures(name)?;
        Some(Self {
            major: normalize(&caps[1]),
            minor: normalize(&caps[2]),
        })
    }

    pub fn major(&self) -> &str {
        &self.major
    }

    pub fn minor(&self) -> &str {
        &self.minor
    }
}

fn normalize(digits: &str) -> String {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn cmp_numeric(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_numeric(&self.major, &other.major).then_with(|| cmp_numeric(&self.minor, &other.minor))
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.x", self.major, self.minor)
    }
}

/// Ordered branch axis of the rebuild matrix.
///
/// Release branches in ascending version order, then the rolling branch.
/// Duplicates are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchSet(Vec<BranchName>);

impl BranchSet {
    /// Wrap an explicit list, bypassing selection.
    pub fn from_names(names: Vec<BranchName>) -> Self {
        Self(names)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BranchName> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[BranchName] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<BranchName> {
        self.0
    }

    /// Compact JSON array, e.g. `["1.6.x","1.7.x","development"]`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }
}

impl<'a> IntoIterator for &'a BranchSet {
    type Item = &'a BranchName;
    type IntoIter = std::slice::Iter<'a, BranchName>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Picks the release branches to rebuild.
#[derive(Debug, Clone)]
pub struct BranchSelector {
    rolling: BranchName,
    keep: usize,
}

impl Default for BranchSelector {
    fn default() -> Self {
        Self {
            rolling: BranchName(DEFAULT_ROLLING_BRANCH.to_string()),
            keep: DEFAULT_KEEP_RELEASES,
        }
    }
}

impl BranchSelector {
    pub fn new(rolling: BranchName, keep: usize) -> Self {
        Self { rolling, keep }
    }

    pub fn rolling(&self) -> &BranchName {
        &self.rolling
    }

    pub fn keep(&self) -> usize {
        self.keep
    }

    /// Filter, sort and trim raw branch names, then append the rolling branch.
    pub fn select<I, S>(&self, names: I) -> BranchSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut releases: Vec<(ReleaseVersion, BranchName)> = names
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref();
                ReleaseVersion::parse(name).map(|v| (v, BranchName(name.to_string())))
            })
            .collect();

        // Stable: equal versions ("1.4.x" vs "01.4.x") keep input order.
        releases.sort_by(|a, b| a.0.cmp(&b.0));

        let skip = releases.len().saturating_sub(self.keep);
        let mut selected: Vec<BranchName> =
            releases.into_iter().skip(skip).map(|(_, name)| name).collect();
        selected.push(self.rolling.clone());
        BranchSet(selected)
    }
}

/// Select with the default rolling branch and window.
pub fn select_branches<I, S>(names: I) -> BranchSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    BranchSelector::default().select(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(set: &BranchSet) -> Vec<&str> {
        set.iter().map(|b| b.as_str()).collect()
    }

    #[test]
    fn test_pattern_accepts_release_branches() {
        assert!(ReleaseVersion::parse("1.4.x").is_some());
        assert!(ReleaseVersion::parse("10.0.x").is_some());
        assert!(ReleaseVersion::parse("0.0.x").is_some());
    }

    #[test]
    fn test_pattern_rejects_everything_else() {
        for name in [
            "v1.4.x",
            "1.4",
            "1.4.x ",
            " 1.4.x",
            "1.4.X",
            "1.4.1",
            "1.x",
            "1.4.5.x",
            "release/1.4.x",
            "development",
            "",
            "1..x",
            "a.b.x",
            "1.4.x\n",
        ] {
            assert!(ReleaseVersion::parse(name).is_none(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_pattern_rejects_non_ascii_digits() {
        assert!(ReleaseVersion::parse("\u{0661}.\u{0662}.x").is_none());
    }

    #[test]
    fn test_numeric_sort_not_lexicographic() {
        let selector = BranchSelector::new(BranchName::new("development").unwrap(), 10);
        let set = selector.select(["2.10.x", "2.9.x", "2.1.x"]);
        assert_eq!(names(&set), vec!["2.1.x", "2.9.x", "2.10.x", "development"]);
    }

    #[test]
    fn test_major_compared_before_minor() {
        let set = select_branches(["9.9.x", "10.0.x", "9.10.x"]);
        assert_eq!(names(&set), vec!["9.10.x", "10.0.x", "development"]);
    }

    #[test]
    fn test_keeps_two_most_recent() {
        let set = select_branches(["1.3.x", "1.4.x", "1.5.x", "development-ignored"]);
        assert_eq!(names(&set), vec!["1.4.x", "1.5.x", "development"]);
    }

    #[test]
    fn test_zero_matches_yields_rolling_only() {
        let set = select_branches(["main", "feature/foo", "v1.0.x"]);
        assert_eq!(names(&set), vec!["development"]);

        let empty: Vec<String> = Vec::new();
        assert_eq!(names(&select_branches(empty)), vec!["development"]);
    }

    #[test]
    fn test_single_match() {
        let set = select_branches(["1.0.x", "main"]);
        assert_eq!(names(&set), vec!["1.0.x", "development"]);
    }

    #[test]
    fn test_rolling_not_deduplicated() {
        let selector = BranchSelector::new(BranchName::new("1.5.x").unwrap(), 2);
        let set = selector.select(["1.4.x", "1.5.x"]);
        assert_eq!(names(&set), vec!["1.4.x", "1.5.x", "1.5.x"]);
    }

    #[test]
    fn test_reselect_is_stable() {
        let first = select_branches(["1.3.x", "2.0.x", "1.12.x", "main"]);
        let second = select_branches(first.iter().map(|b| b.as_str()));
        assert_eq!(first, second);
    }

    #[test]
    fn test_leading_zeros_compare_numerically() {
        let a = ReleaseVersion::parse("01.2.x").unwrap();
        let b = ReleaseVersion::parse("1.2.x").unwrap();
        let c = ReleaseVersion::parse("1.10.x").unwrap();
        assert_eq!(a, b);
        assert!(b < c);
    }

    #[test]
    fn test_huge_components_do_not_overflow() {
        let set = select_branches(["99999999999999999999999.0.x", "2.0.x"]);
        assert_eq!(
            names(&set),
            vec!["2.0.x", "99999999999999999999999.0.x", "development"]
        );
    }

    #[test]
    fn test_branch_name_rejects_blank() {
        assert!(BranchName::new("").is_err());
        assert!(BranchName::new("   ").is_err());
        assert!(BranchName::new("1.0.x").unwrap().is_release());
        assert!(!BranchName::new("development").unwrap().is_release());
    }

    #[test]
    fn test_branch_set_json() {
        let set = select_branches(["1.6.x", "1.7.x"]);
        assert_eq!(set.to_json(), r#"["1.6.x","1.7.x","development"]"#);
    }
}
