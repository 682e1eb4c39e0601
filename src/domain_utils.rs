//! Domain utilities with Public Suffix List integration.
//!
//! This module owns the DNS name grammar shared by target validation and
//! candidate normalization:
//! - label syntax (1-63 chars, `[a-z0-9-]`, no leading/trailing hyphen)
//! - host extraction from URLs / tool output lines
//! - registrable-domain checks for the run target via the PSL, so that
//!   `example.co.uk` is accepted while a bare public suffix like `co.uk`
//!   or `github.io` is not.

use psl::domain_str;

use crate::errors::SweepError;

/// Maximum length of a full DNS name (without the trailing dot).
pub const MAX_NAME_LEN: usize = 253;

/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

/// A validated run target: lower-case, no trailing dot, under a registrable domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    domain: String,
    registrable: String,
}

impl Target {
    /// Validate user input at the engine boundary.
    ///
    /// Accepts bare domains as well as URLs (`https://example.com/path`), which
    /// are reduced to their host.
    pub fn parse(input: &str) -> std::result::Result<Self, SweepError> {
        let host = extract_host(input)
            .ok_or_else(|| SweepError::invalid_target(input, "no host name found"))?;

        if let Err(reason) = check_name_syntax(&host) {
            return Err(SweepError::invalid_target(input, reason));
        }
        if !host.contains('.') {
            return Err(SweepError::invalid_target(
                input,
                "a registrable domain needs at least two labels",
            ));
        }
        if host
            .rsplit('.')
            .next()
            .map(|tld| tld.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(true)
        {
            return Err(SweepError::invalid_target(
                input,
                "IP addresses are not domain targets",
            ));
        }

        let Some(registrable) = domain_str(&host).map(str::to_string) else {
            return Err(SweepError::invalid_target(
                input,
                "name is a public suffix, not a registrable domain",
            ));
        };

        Ok(Self {
            domain: host,
            registrable,
        })
    }

    /// The scope domain every candidate must end with.
    pub fn as_str(&self) -> &str {
        &self.domain
    }

    /// Registrable part of the target (e.g. `example.co.uk`).
    pub fn registrable(&self) -> &str {
        &self.registrable
    }

    /// Build `<label>.<target>`.
    pub fn child(&self, label: &str) -> String {
        format!("{}.{}", label, self.domain)
    }

    /// True when `name` is a strict subdomain of the target.
    pub fn contains(&self, name: &str) -> bool {
        name.len() > self.domain.len() + 1
            && name.ends_with(&self.domain)
            && name.as_bytes()[name.len() - self.domain.len() - 1] == b'.'
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.domain)
    }
}

/// Reduce a URL, tool output line or hostname to a bare lower-case host.
///
/// Strips scheme, userinfo, path/query/fragment, port, a leading `*.`
/// wildcard and a trailing dot. Returns `None` when nothing host-like remains.
pub fn extract_host(input: &str) -> Option<String> {
    let mut s = input.trim();
    if let Some(idx) = s.find("://") {
        s = &s[idx + 3..];
    }
    let end = s.find(['/', '?', '#']).unwrap_or(s.len());
    s = &s[..end];
    if let Some(idx) = s.rfind('@') {
        s = &s[idx + 1..];
    }
    if let Some(idx) = s.rfind(':') {
        if s[idx + 1..].chars().all(|c| c.is_ascii_digit()) {
            s = &s[..idx];
        }
    }
    let s = s.trim_start_matches("*.").trim_end_matches('.');
    if s.is_empty() {
        return None;
    }
    Some(s.to_ascii_lowercase())
}

/// Validate a single DNS label.
pub fn is_valid_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= MAX_LABEL_LEN
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

/// Check the full-name grammar; returns a short reason on failure.
pub fn check_name_syntax(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty name");
    }
    if name.len() > MAX_NAME_LEN {
        return Err("name longer than 253 characters");
    }
    if name.split('.').all(is_valid_label) {
        Ok(())
    } else {
        Err("invalid DNS label")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_accepts_urls_and_case() {
        let t = Target::parse("HTTPS://Example.com/login?x=1").unwrap();
        assert_eq!(t.as_str(), "example.com");
        assert_eq!(t.registrable(), "example.com");

        let t = Target::parse("shop.example.co.uk").unwrap();
        assert_eq!(t.as_str(), "shop.example.co.uk");
        assert_eq!(t.registrable(), "example.co.uk");

        let t = Target::parse(" Example.Com. ").unwrap();
        assert_eq!(t.as_str(), "example.com");
    }

    #[test]
    fn test_target_rejections() {
        assert!(Target::parse("").is_err());
        assert!(Target::parse("localhost").is_err());
        assert!(Target::parse("co.uk").is_err());
        assert!(Target::parse("10.0.0.1").is_err());
        assert!(Target::parse("bad_name.com").is_err());
        assert!(Target::parse("-lead.example.com").is_err());
    }

    #[test]
    fn test_target_contains() {
        let t = Target::parse("example.com").unwrap();
        assert!(t.contains("api.example.com"));
        assert!(t.contains("a.b.example.com"));
        assert!(!t.contains("example.com"));
        assert!(!t.contains("badexample.com"));
        assert!(!t.contains("example.com.evil.net"));
    }

    #[test]
    fn test_extract_host() {
        assert_eq!(
            extract_host("https://Sub.Example.com:8443/path").as_deref(),
            Some("sub.example.com")
        );
        assert_eq!(
            extract_host("*.dev.example.com.").as_deref(),
            Some("dev.example.com")
        );
        assert_eq!(
            extract_host("http://user:pw@api.example.com/").as_deref(),
            Some("api.example.com")
        );
        assert_eq!(extract_host("   "), None);
    }

    #[test]
    fn test_label_grammar() {
        assert!(is_valid_label("api"));
        assert!(is_valid_label("api-v2"));
        assert!(is_valid_label("x1"));
        assert!(!is_valid_label(""));
        assert!(!is_valid_label("-api"));
        assert!(!is_valid_label("api-"));
        assert!(!is_valid_label("bad_name!"));
        assert!(!is_valid_label(&"a".repeat(64)));
        assert!(is_valid_label(&"a".repeat(63)));
    }

    #[test]
    fn test_name_length_limit() {
        let long = format!("{}.example.com", vec!["abcdefghij"; 23].join("."));
        assert!(long.len() > MAX_NAME_LEN);
        assert!(check_name_syntax(&long).is_err());
    }
}
