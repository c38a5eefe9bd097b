/// Test data generators
use alloy_primitives::Address;
use proptest::prelude::*;
use rand::Rng;

/// Generate random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Generate a random address
pub fn random_address() -> Address {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill(&mut bytes);
    Address::from(bytes)
}

/// Generate a random asset amount between `min` and `max` inclusive
pub fn random_amount(min: u128, max: u128) -> u128 {
    rand::thread_rng().gen_range(min..=max)
}

/// Strategy for realistic collateral amounts (0.01 to 1000 units, 18 decimals)
pub fn amount_strategy() -> impl Strategy<Value = u128> {
    10_000_000_000_000_000u128..=1_000_000_000_000_000_000_000u128
}

/// Strategy for oracle prices in integer units
pub fn price_strategy() -> impl Strategy<Value = u128> {
    100u128..=1_000_000u128
}

/// Strategy for pairs `(liq_price, current_price)` with the liquidation price
/// strictly below the current price
pub fn liq_below_price_strategy() -> impl Strategy<Value = (u128, u128)> {
    (1_000u128..=500_000u128, 2u128..=20u128)
        .prop_map(|(liq, mult)| (liq, liq.saturating_mul(mult)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_amount_in_range() {
        for _ in 0..100 {
            let v = random_amount(10, 20);
            assert!((10..=20).contains(&v));
        }
    }

    #[test]
    fn test_random_addresses_differ() {
        assert_ne!(random_address(), random_address());
    }
}
