//! Classification of failed direct-run starts.

/// Why a directly-run project did not start cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupFailure {
    /// The new instance could not bind its listen address, usually because
    /// the previous instance still holds it.
    AddressInUse,

    /// Anything else; treated as a syntax failure.
    Other,
}

/// Error output fragments that mean "the address is taken".
const ADDRESS_IN_USE: &[&str] = &[
    "listen tcp",
    "address already in use",
    "eaddrinuse",
    "only one usage of each socket address",
];

/// Classifies the captured standard error of a failed start.
///
/// # Examples
///
/// ```
/// use ab_project::{StartupFailure, classify_startup_failure};
///
/// let stderr = "listen tcp :8080: bind: address already in use";
/// assert_eq!(classify_startup_failure(stderr), StartupFailure::AddressInUse);
/// assert_eq!(classify_startup_failure("./main.go:4: syntax error"), StartupFailure::Other);
/// ```
#[must_use]
pub fn classify_startup_failure(stderr: &str) -> StartupFailure {
    let lowered = stderr.to_ascii_lowercase();
    if ADDRESS_IN_USE.iter().any(|needle| lowered.contains(needle)) {
        StartupFailure::AddressInUse
    } else {
        StartupFailure::Other
    }
}
