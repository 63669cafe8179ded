//! Build-time metadata embedded by the build script.
//!
//! Shown by `diffscope --version` and logged once when an extraction
//! starts, so indexer transcripts can be matched to a build.

/// Short git commit hash at build time, or `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("DIFFSCOPE_GIT_HASH");

/// Build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("DIFFSCOPE_BUILD_TIMESTAMP");

/// Cargo profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("DIFFSCOPE_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Client name reported to the language server in `clientInfo`.
pub const CLIENT_NAME: &str = "diffscope";

/// Version, commit and profile, e.g. `"0.1.0 (abc1234, debug)"`.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("DIFFSCOPE_GIT_HASH"),
    ", ",
    env!("DIFFSCOPE_BUILD_PROFILE"),
    ")"
);

pub fn version_string() -> String {
    LONG_VERSION.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_contains_parts() {
        let v = version_string();
        assert!(v.starts_with(VERSION));
        assert!(v.contains(GIT_HASH));
        assert!(v.contains(BUILD_PROFILE));
    }

    #[test]
    fn test_git_hash_not_empty() {
        assert!(!GIT_HASH.is_empty());
    }

    #[test]
    fn test_timestamp_is_numeric() {
        assert!(BUILD_TIMESTAMP.parse::<u64>().is_ok());
    }
}
