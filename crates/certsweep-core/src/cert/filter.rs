//! Domain suffix matching.

/// Case-insensitive, dot-boundary suffix filter.
///
/// A name matches when, lower-cased, it equals the suffix or ends with
/// `.` followed by the suffix. `"shop.example.jp"` matches suffix
/// `.jp`; `"notjp.example.com"` does not.
#[derive(Debug, Clone)]
pub struct SuffixFilter {
    suffix: String,
    dotted: String,
}

impl SuffixFilter {
    /// Builds a filter for `suffix`. Leading dots and surrounding
    /// whitespace are ignored, so `".jp"` and `"jp"` are equivalent.
    #[must_use]
    pub fn new(suffix: &str) -> Self {
        let suffix = suffix.trim().trim_start_matches('.').to_ascii_lowercase();
        let dotted = format!(".{suffix}");
        Self { suffix, dotted }
    }

    /// The normalized suffix, without a leading dot.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Whether a single name falls under the suffix.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let name = name.trim().to_ascii_lowercase();
        name == self.suffix || name.ends_with(&self.dotted)
    }

    /// Whether any of the names falls under the suffix.
    #[must_use]
    pub fn accepts<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|name| self.matches(name.as_ref()))
    }
}
