/// Fixtures for testing
use alloy_primitives::Address;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize test logging once per process; respects `RUST_LOG`.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic address for test actor `n`
pub fn test_address(n: u8) -> Address {
    Address::repeat_byte(n)
}

/// Common asset amount helper: `n` whole units at 18 decimals
pub fn units(n: u128) -> u128 {
    n * 1_000_000_000_000_000_000
}
