//! Protocol version constants and negotiation.

/// The newest protocol version this implementation speaks
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Every protocol version this implementation accepts, newest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Check whether a version string is one we accept
#[must_use]
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Server-side negotiation: echo the requested version when supported,
/// otherwise answer with the latest version and let the client decide.
#[must_use]
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_known_version() {
        assert_eq!(negotiate_version("2024-11-05"), "2024-11-05");
        assert_eq!(negotiate_version("2025-03-26"), "2025-03-26");
    }

    #[test]
    fn test_negotiate_unknown_version_falls_back_to_latest() {
        assert_eq!(negotiate_version("1999-01-01"), LATEST_PROTOCOL_VERSION);
        assert!(!is_supported_version("1999-01-01"));
        assert!(is_supported_version(LATEST_PROTOCOL_VERSION));
    }
}
