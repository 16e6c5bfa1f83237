//! Recognizes URLs pointing at the supported video host.

use regex::Regex;

/// Canonical and short-link host forms, scheme and `www.` optional, followed
/// by a non-empty path.
pub const DEFAULT_URL_PATTERN: &str = r"^(https?://)?(www\.)?(youtube\.com|youtu\.?be)/.+";

/// Compiled once at startup and shared read-only by every request.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    pattern: Regex,
}

impl UrlValidator {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    /// Total and side-effect free: malformed input is simply `false`.
    pub fn validate(&self, url: &str) -> bool {
        let url = url.trim();
        !url.is_empty() && self.pattern.is_match(url)
    }
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_URL_PATTERN).expect("default URL pattern compiles"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_and_short_forms() {
        let validator = UrlValidator::default();
        assert!(validator.validate("https://www.youtube.com/watch?v=abc123"));
        assert!(validator.validate("http://youtube.com/watch?v=abc123"));
        assert!(validator.validate("youtube.com/shorts/xyz"));
        assert!(validator.validate("https://youtu.be/abc123"));
        assert!(validator.validate("  www.youtu.be/abc123  "));
    }

    #[test]
    fn rejects_other_hosts_and_garbage() {
        let validator = UrlValidator::default();
        assert!(!validator.validate(""));
        assert!(!validator.validate("   "));
        assert!(!validator.validate("ftp://example.com/video"));
        assert!(!validator.validate("https://vimeo.com/12345"));
        assert!(!validator.validate("https://www.youtube.com/"));
        assert!(!validator.validate("https://evil.example/youtube.com/watch"));
        assert!(!validator.validate("\u{0}\u{ffff}"));
    }

    #[test]
    fn custom_pattern_is_honored() {
        let validator = UrlValidator::new(r"^https://example\.test/.+").unwrap();
        assert!(validator.validate("https://example.test/v/1"));
        assert!(!validator.validate("https://www.youtube.com/watch?v=abc123"));
    }
}
