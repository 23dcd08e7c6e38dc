// src/version.rs

//! Version comparison for repository manifest `min_version` checks.
//!
//! Repository manifests declare the minimum system version they require.
//! Versions are compared leniently: strict semver when both sides parse,
//! otherwise a numeric major.minor.patch extraction.

use semver::Version;
use std::cmp::Ordering;

/// The crate version with any build suffix (everything after `-`) removed
pub fn current() -> &'static str {
    let full = env!("CARGO_PKG_VERSION");
    match full.split_once('-') {
        Some((base, _)) => base,
        None => full,
    }
}

/// Compare two version strings
///
/// Falls back to extracting numeric `major.minor.patch` components when a
/// side is not valid semver; missing components count as zero.
pub fn compare(a: &str, b: &str) -> Ordering {
    to_version(a).cmp(&to_version(b))
}

fn to_version(s: &str) -> Version {
    if let Ok(v) = Version::parse(s) {
        return v;
    }

    let parts: Vec<&str> = s.split('.').collect();
    let major = parts
        .first()
        .and_then(|p| p.parse::<u64>().ok())
        .unwrap_or(0);
    let minor = parts.get(1).and_then(|p| p.parse::<u64>().ok()).unwrap_or(0);
    let patch = parts.get(2).and_then(|p| p.parse::<u64>().ok()).unwrap_or(0);

    Version::new(major, minor, patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_ordering() {
        assert_eq!(compare("0.0.1", "0.1.0"), Ordering::Less);
        assert_eq!(compare("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare("2.0.0", "1.9.9"), Ordering::Greater);
    }

    #[test]
    fn test_compare_lenient() {
        // Two-component versions still compare sensibly
        assert_eq!(compare("0.4", "0.4.0"), Ordering::Equal);
        assert_eq!(compare("0.4", "0.5"), Ordering::Less);
    }

    #[test]
    fn test_current_has_no_build_suffix() {
        assert!(!current().contains('-'));
    }
}
