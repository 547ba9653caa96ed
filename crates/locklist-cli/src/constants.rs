//! Constants used throughout the CLI.

/// Exit codes for the CLI.
///
/// These follow common Unix conventions:
/// - 0: Success
/// - 1: General error (used by anyhow for unhandled errors)
/// - 2: Misuse of shell command (reserved by shells)
/// - 3+: Application-specific errors
pub mod exit_codes {
    /// Resource not found (list, record, session).
    pub const NOT_FOUND: i32 = 3;

    /// Invalid user input or arguments.
    pub const INVALID_INPUT: i32 = 4;

    /// Authentication failed (wrong passphrase, too many attempts).
    pub const AUTH_FAILED: i32 = 5;
}

/// Keychain service name for the key cache backend.
pub const KEYCHAIN_SERVICE: &str = "locklist";

/// Signed-in user, kept between runs.
pub const SESSION_FILE: &str = "session.json";

/// Unlock prompts before giving up.
pub const MAX_PASSPHRASE_ATTEMPTS: u32 = 3;
