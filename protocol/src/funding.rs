use crate::errors::ProtocolError;
use crate::types::*;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

/// Funding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingConfig {
    /// EMA smoothing period in seconds
    pub ema_period: u64,
    /// Funding scaling factor in `FUNDING_SCALE` fixed point; compresses the
    /// quadratic imbalance term
    pub funding_sf: u128,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            ema_period: 86_400, // 1 day
            funding_sf: 300_000_000_000_000, // 0.0003 per day at full imbalance
        }
    }
}

/// Funding smoothing state, locked in once per distinct timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingState {
    /// Smoothed funding rate, `FUNDING_SCALE` fixed point, per day
    pub ema: i128,
    pub last_update: u64,
    /// Asset delta applied at `last_update` (positive: long paid vault)
    pub last_delta: i128,
}

/// Balances after one funding/PnL application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingApplied {
    pub balance_long: u128,
    pub balance_vault: u128,
    /// Asset moved between the sides (positive: long paid vault)
    pub funding: i128,
}

/// Pricing functions between the long and vault sides. Holds no balances; all
/// state lives in the caller-owned `FundingState`.
#[derive(Debug, Clone, Default)]
pub struct FundingEngine {
    config: FundingConfig,
}

impl FundingEngine {
    pub fn new(config: FundingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FundingConfig {
        &self.config
    }

    /// Trading exposure of the long side: leveraged notional minus the
    /// collateral backing it.
    pub fn long_trading_expo(total_expo: u128, balance_long: u128) -> u128 {
        total_expo.saturating_sub(balance_long)
    }

    /// Long side value at `new_price`, so that at `new_price == old_price` it
    /// equals `balance_long`. Gains come from the vault side and vice versa.
    pub fn long_asset_available(
        total_expo: u128,
        balance_long: u128,
        old_price: u128,
        new_price: u128,
    ) -> Result<u128, ProtocolError> {
        if new_price == 0 {
            return Err(ProtocolError::DivisionByZero);
        }
        let trading_expo = Self::long_trading_expo(total_expo, balance_long);
        let debt = mul_div(trading_expo, old_price, new_price)?;
        Ok(total_expo.saturating_sub(debt))
    }

    /// Instantaneous funding rate per day: signed quadratic of the exposure
    /// imbalance ratio, scaled by `funding_sf`, anchored on the EMA. The ratio
    /// is bounded by 1 because the denominator is the larger side, so the
    /// quadratic saturates instead of blowing up at small denominators.
    pub fn instantaneous_rate(
        &self,
        total_expo: u128,
        balance_long: u128,
        balance_vault: u128,
        ema: i128,
    ) -> Result<i128, ProtocolError> {
        let long_expo = Self::long_trading_expo(total_expo, balance_long);
        let vault_expo = balance_vault;
        let denom = long_expo.max(vault_expo);
        if denom == 0 {
            return Ok(ema);
        }
        let (diff, negative) = if long_expo >= vault_expo {
            (long_expo - vault_expo, false)
        } else {
            (vault_expo - long_expo, true)
        };
        // |ratio| <= FUNDING_SCALE by construction
        let ratio = mul_div(diff, FUNDING_SCALE, denom)?;
        let quad = mul_div(ratio, ratio, FUNDING_SCALE)?;
        let term = mul_div(quad, self.config.funding_sf, FUNDING_SCALE)?;
        let term = i128::try_from(term).map_err(|_| ProtocolError::ArithmeticOverflow)?;
        let signed = if negative { -term } else { term };
        signed
            .checked_add(ema)
            .ok_or(ProtocolError::ArithmeticOverflow)
    }

    /// `ema + (rate - ema) * min(elapsed, period) / period`, the clamped
    /// exponential moving average step.
    pub fn update_ema(&self, ema: i128, rate: i128, elapsed: u64) -> i128 {
        let period = self.config.ema_period.max(1) as i128;
        let weight = (elapsed as i128).min(period);
        ema + (rate - ema) * weight / period
    }

    /// Asset flow for `rate` applied to the whole leveraged notional over
    /// `elapsed` seconds. Positive: long pays vault.
    pub fn funding_asset(
        &self,
        rate: i128,
        total_expo: u128,
        elapsed: u64,
    ) -> Result<i128, ProtocolError> {
        let magnitude = U256::from(rate.unsigned_abs()) * U256::from(total_expo)
            * U256::from(elapsed)
            / (U256::from(SECONDS_PER_DAY) * U256::from(FUNDING_SCALE));
        let magnitude =
            i128::try_from(u128::try_from(magnitude).map_err(|_| ProtocolError::ArithmeticOverflow)?)
                .map_err(|_| ProtocolError::ArithmeticOverflow)?;
        Ok(if rate < 0 { -magnitude } else { magnitude })
    }

    /// Apply PnL and funding to the balance pair as of `(new_price,
    /// timestamp)`. Idempotent per timestamp: a repeat call returns the
    /// previously locked-in delta without touching state.
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &self,
        state: &mut FundingState,
        total_expo: u128,
        balance_long: u128,
        balance_vault: u128,
        old_price: u128,
        new_price: u128,
        timestamp: u64,
    ) -> Result<FundingApplied, ProtocolError> {
        if timestamp == state.last_update {
            return Ok(FundingApplied {
                balance_long,
                balance_vault,
                funding: state.last_delta,
            });
        }
        if timestamp < state.last_update {
            return Err(ProtocolError::PriceTimestampInvalid {
                provided: timestamp,
                target: state.last_update,
            });
        }
        let elapsed = timestamp - state.last_update;
        let total = balance_long
            .checked_add(balance_vault)
            .ok_or(ProtocolError::ArithmeticOverflow)?;

        // PnL split at the new price
        let mut new_long =
            Self::long_asset_available(total_expo, balance_long, old_price, new_price)?.min(total);
        let mut new_vault = total - new_long;

        // funding transfer, rate locked from the pre-transfer imbalance
        let rate = self.instantaneous_rate(total_expo, new_long, new_vault, state.ema)?;
        let flow = self.funding_asset(rate, total_expo, elapsed)?;
        if flow >= 0 {
            let moved = (flow as u128).min(new_long);
            new_long -= moved;
            new_vault += moved;
        } else {
            let moved = (flow.unsigned_abs()).min(new_vault);
            new_vault -= moved;
            new_long += moved;
        }

        state.ema = self.update_ema(state.ema, rate, elapsed);
        state.last_update = timestamp;
        state.last_delta = flow;

        Ok(FundingApplied {
            balance_long: new_long,
            balance_vault: new_vault,
            funding: flow,
        })
    }
}
