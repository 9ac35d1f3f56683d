//! Tolerant semantic-version comparison and latest-of selection
//!
//! Catalog versions come from many upstream conventions: `v8.0.5`, `1.2`,
//! `7`, `1.0.0-rc.1+build`. The comparator normalizes what it can into
//! [`semver::Version`] and falls back to lexicographic ordering for anything
//! it cannot parse, so a malformed catalog degrades instead of panicking.

use std::cmp::Ordering;

/// Parse a version string leniently into a semver version
///
/// Accepts a leading `v`/`V`, missing minor/patch components and numeric
/// components with leading zeros. Returns None for anything that still does
/// not fit the `major.minor.patch[-pre][+build]` grammar after
/// normalization.
pub fn parse_lenient(input: &str) -> Option<semver::Version> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }

    // Split the numeric core from the prerelease/build suffix
    let suffix_at = trimmed.find(['-', '+']);
    let (core, suffix) = match suffix_at {
        Some(index) => trimmed.split_at(index),
        None => (trimmed, ""),
    };

    let mut parts = Vec::with_capacity(3);
    for part in core.split('.') {
        // Re-render each component through u64 so leading zeros survive
        // normalization ("08" is common in date-style versions)
        let number: u64 = part.parse().ok()?;
        parts.push(number.to_string());
    }
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    while parts.len() < 3 {
        parts.push("0".to_string());
    }

    semver::Version::parse(&format!("{}{}", parts.join("."), suffix)).ok()
}

/// Total-order comparison of two version strings
///
/// Parseable versions compare by SemVer precedence (prerelease below release,
/// build metadata ignored), with the raw string as a deterministic
/// tie-breaker. When either side is unparseable both compare
/// lexicographically on the raw strings.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse_lenient(a), parse_lenient(b)) {
        (Some(left), Some(right)) => left
            .cmp_precedence(&right)
            .then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// Pick the highest version from an iterator of version strings
pub fn latest_of<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions.into_iter().max_by(|a, b| compare(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_lenient_shapes() {
        assert_eq!(parse_lenient("1.2.3").unwrap().to_string(), "1.2.3");
        assert_eq!(parse_lenient("v1.2.3").unwrap().to_string(), "1.2.3");
        assert_eq!(parse_lenient("1.2").unwrap().to_string(), "1.2.0");
        assert_eq!(parse_lenient("7").unwrap().to_string(), "7.0.0");
        assert_eq!(
            parse_lenient("1.0.0-rc.1+build5").unwrap().to_string(),
            "1.0.0-rc.1+build5"
        );
        assert_eq!(parse_lenient("2024.08.01").unwrap().to_string(), "2024.8.1");
        assert!(parse_lenient("").is_none());
        assert!(parse_lenient("not-a-version").is_none());
        assert!(parse_lenient("1.2.3.4").is_none());
    }

    #[test]
    fn test_prerelease_orders_below_release() {
        assert_eq!(compare("1.0.0-rc.1", "1.0.0"), Ordering::Less);
        assert_eq!(compare("1.0.0-alpha", "1.0.0-beta"), Ordering::Less);
        assert_eq!(compare("1.0.0-rc.2", "1.0.0-rc.10"), Ordering::Less);
    }

    #[test]
    fn test_build_metadata_ignored_for_precedence() {
        // Equal precedence; raw-string tie-break keeps the order total
        assert_eq!(compare("1.0.0+a", "1.0.0+b"), Ordering::Less);
        assert_eq!(compare("1.0.0+b", "1.0.0+a"), Ordering::Greater);
        assert_eq!(compare("1.0.0+a", "1.0.0+a"), Ordering::Equal);
    }

    #[test]
    fn test_lexicographic_fallback() {
        assert_eq!(compare("beta", "alpha"), Ordering::Greater);
        // Mixed parseable/unparseable also falls back
        assert_eq!(compare("1.0.0", "zzz"), Ordering::Less);
    }

    #[test]
    fn test_latest_of() {
        assert_eq!(
            latest_of(["1.2.0", "v1.10.0", "1.9.9"]),
            Some("v1.10.0")
        );
        assert_eq!(
            latest_of(["8.0.5", "8.0.5-preview.3"]),
            Some("8.0.5")
        );
        assert_eq!(latest_of([] as [&str; 0]), None);
    }

    #[test]
    fn test_total_order_on_parseable_inputs() {
        let mut versions = vec!["1.0.0", "v0.9", "2", "1.0.0-rc.1", "1.5.3"];
        versions.sort_by(|a, b| compare(a, b));
        assert_eq!(versions, vec!["v0.9", "1.0.0-rc.1", "1.0.0", "1.5.3", "2"]);
    }
}
