//! Environment abstraction for deterministic testing.
//!
//! Decouples the session layer from system resources (wall clock,
//! randomness). Production code uses [`crate::SystemEnv`]; tests supply
//! seeded environments so confounders and expiry checks are reproducible.

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// Used for confounders. Given the same seed, a test environment must
    /// produce the same sequence of bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Current wall-clock time in seconds since the Unix epoch.
    ///
    /// Key expiry comes from ticket lifetimes, which are absolute wall-clock
    /// times, so a monotonic clock is not enough here.
    fn wall_clock_secs(&self) -> u64;
}
