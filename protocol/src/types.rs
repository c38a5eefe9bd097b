use crate::errors::ProtocolError;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Basis-point denominator
pub const BPS_DIVISOR: u128 = 10_000;

/// Fixed-point scale for leverage values (9 decimals)
/// Example: 2_500_000_000 = 2.5x
pub const LEVERAGE_SCALE: u128 = 1_000_000_000;

/// Fixed-point scale for funding rates (18 decimals, WAD)
pub const FUNDING_SCALE: u128 = 1_000_000_000_000_000_000;

/// Funding accrual denominator (rates are per day)
pub const SECONDS_PER_DAY: u128 = 86_400;

/// Price in integer oracle units
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Price(pub u128);

impl Price {
    pub const ZERO: Price = Price(0);
}

/// Kinds of protocol actions, used to key oracle queries and imbalance limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolAction {
    None,
    Initialize,
    InitiateDeposit,
    ValidateDeposit,
    InitiateWithdrawal,
    ValidateWithdrawal,
    InitiateOpenPosition,
    ValidateOpenPosition,
    InitiateClosePosition,
    ValidateClosePosition,
    Liquidation,
}

/// A leveraged long position recorded in exactly one tick bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub user: Address,
    /// Collateral deposited, in asset units
    pub amount: u128,
    /// Leveraged notional size, fixed at validation
    pub total_expo: u128,
    pub start_price: Price,
    pub timestamp: u64,
    pub validated: bool,
}

impl Position {
    /// Leverage in `LEVERAGE_SCALE` fixed point; zero-amount positions cannot exist
    pub fn leverage(&self) -> u128 {
        mul_div(self.total_expo, LEVERAGE_SCALE, self.amount).unwrap_or(u128::MAX)
    }
}

/// Stable identifier of a position slot: tick, tick version at open, slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionId {
    pub tick: i32,
    pub tick_version: u64,
    pub index: usize,
}

/// `a * b / denom` with a 256-bit intermediate, flooring
pub fn mul_div(a: u128, b: u128, denom: u128) -> Result<u128, ProtocolError> {
    if denom == 0 {
        return Err(ProtocolError::DivisionByZero);
    }
    let wide = U256::from(a) * U256::from(b) / U256::from(denom);
    u128::try_from(wide).map_err(|_| ProtocolError::ArithmeticOverflow)
}

/// Basis-point fraction of an amount, flooring
pub fn bps_of(amount: u128, bps: u16) -> u128 {
    // BPS_DIVISOR is nonzero and the product fits 256 bits
    mul_div(amount, bps as u128, BPS_DIVISOR).unwrap_or(u128::MAX)
}
