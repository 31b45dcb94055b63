/// Slug used when a name has no alphanumeric characters.
pub const FALLBACK_SLUG: &str = "organization";

/// Derive a URL slug from a display name: lowercase ASCII alphanumerics
/// separated by single hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// First of `base`, `base-1`, `base-2`, ... not present in `existing`.
pub fn next_available_slug(base: &str, existing: &[String]) -> String {
    let taken = |candidate: &str| existing.iter().any(|s| s == candidate);

    if !taken(base) {
        return base.to_string();
    }

    (1u32..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Acme Corp"), "acme-corp");
        assert_eq!(slugify("  Bob's   Organization!! "), "bob-s-organization");
        assert_eq!(slugify("R&D -- Team 42"), "r-d-team-42");
        assert_eq!(slugify("Ünïcödé"), "n-c-d");
    }

    #[test]
    fn test_slugify_empty_falls_back() {
        assert_eq!(slugify(""), FALLBACK_SLUG);
        assert_eq!(slugify("!!! ---"), FALLBACK_SLUG);
    }

    #[test]
    fn test_next_available_slug() {
        assert_eq!(next_available_slug("acme", &[]), "acme");

        let existing = vec!["acme".to_string(), "acme-1".to_string(), "acme-3".to_string()];
        assert_eq!(next_available_slug("acme", &existing), "acme-2");
        assert_eq!(next_available_slug("other", &existing), "other");
    }
}
