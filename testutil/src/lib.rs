/// Testing utilities for LongVault
///
/// Provides:
/// - Test data generators
/// - Fixtures for testing (logging setup, deterministic identities)

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;
