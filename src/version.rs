//! Dotted release version comparison.

use std::cmp::Ordering;
use thiserror::Error;

/// Release name of this build, in the form stored under `VNum`.
pub const RELEASE_NAME: &str = concat!("Release v", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version number: {0:?}")]
    Invalid(String),
}

/// Strip a leading `Release v` (any case) from a release name.
pub fn normalize_release_name(name: &str) -> &str {
    let name = name.trim();
    const PREFIX: &str = "release v";
    match name.get(..PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(PREFIX) => &name[PREFIX.len()..],
        _ => name,
    }
}

fn parse_parts(version: &str) -> Result<Vec<u64>, VersionError> {
    version
        .split('.')
        .map(|part| {
            part.trim()
                .parse()
                .map_err(|_| VersionError::Invalid(version.to_string()))
        })
        .collect()
}

/// Compare two dotted versions, padding the shorter one with zeros.
///
/// # Examples
/// ```
/// use std::cmp::Ordering;
/// use pill_sync::version::compare_versions;
///
/// assert_eq!(compare_versions("1.2", "1.2.0").unwrap(), Ordering::Equal);
/// assert_eq!(compare_versions("1.3", "1.2.9").unwrap(), Ordering::Greater);
/// ```
pub fn compare_versions(a: &str, b: &str) -> Result<Ordering, VersionError> {
    let mut left = parse_parts(a)?;
    let mut right = parse_parts(b)?;

    let len = left.len().max(right.len());
    left.resize(len, 0);
    right.resize(len, 0);

    Ok(left.cmp(&right))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.2", "1.2.0").unwrap(), Ordering::Equal);
        assert_eq!(compare_versions("1.3", "1.2.9").unwrap(), Ordering::Greater);
        assert_eq!(compare_versions("1.1", "1.2").unwrap(), Ordering::Less);
        assert_eq!(compare_versions("1.0.01", "1.0.1").unwrap(), Ordering::Equal);
        assert_eq!(compare_versions("2", "1.9.9").unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_compare_versions_invalid() {
        assert_eq!(
            compare_versions("1.x", "1.0"),
            Err(VersionError::Invalid("1.x".into()))
        );
        assert!(compare_versions("", "1.0").is_err());
        assert!(compare_versions("1..2", "1.0").is_err());
    }

    #[test]
    fn test_normalize_release_name() {
        assert_eq!(normalize_release_name("Release v1.0.01"), "1.0.01");
        assert_eq!(normalize_release_name("release V2.1"), "2.1");
        assert_eq!(normalize_release_name(" 1.4 "), "1.4");
        assert_eq!(normalize_release_name("v1.4"), "v1.4");
    }

    #[test]
    fn test_release_name_matches_package_version() {
        assert_eq!(
            normalize_release_name(RELEASE_NAME),
            env!("CARGO_PKG_VERSION")
        );
    }
}
