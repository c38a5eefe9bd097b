use crate::errors::ProtocolError;
use crate::ledger::{LiquidatedTick, TickLedger};
use crate::types::BPS_DIVISOR;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What one sweep touched, fed to the reward calculator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepMetrics {
    pub liquidated_ticks: u16,
    pub liquidated_positions: usize,
    /// Net collateral freed by the sweep; negative means bad debt
    pub remaining_collateral: i128,
    /// The iteration cap stopped the sweep early
    pub pending: bool,
}

/// Payout owed to whoever triggered a liquidation sweep.
pub trait LiquidationRewards {
    fn rewards(&self, metrics: &SweepMetrics) -> u128;
}

/// Gas-cost model: a fixed base plus a per-tick term, marked up by a bounty
/// multiplier. Mirrors what an on-chain keeper would be reimbursed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasRewardCalculator {
    pub gas_used_per_tick: u128,
    pub base_gas_used: u128,
    pub gas_price: u128,
    pub multiplier_bps: u16,
}

impl Default for GasRewardCalculator {
    fn default() -> Self {
        Self {
            gas_used_per_tick: 27_000,
            base_gas_used: 100_000,
            gas_price: 30_000_000_000, // 30 gwei
            multiplier_bps: 30_000,    // 3x bounty
        }
    }
}

impl LiquidationRewards for GasRewardCalculator {
    fn rewards(&self, metrics: &SweepMetrics) -> u128 {
        if metrics.liquidated_ticks == 0 {
            return 0;
        }
        let gas = self.base_gas_used + self.gas_used_per_tick * metrics.liquidated_ticks as u128;
        let cost = gas * self.gas_price;
        cost * self.multiplier_bps as u128 / BPS_DIVISOR
    }
}

/// Pays nothing; for configurations where keepers run their own accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRewards;

impl LiquidationRewards for NoRewards {
    fn rewards(&self, _metrics: &SweepMetrics) -> u128 {
        0
    }
}

/// Outcome of one bounded liquidation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiquidationResult {
    pub liquidated_ticks: Vec<LiquidatedTick>,
    pub liquidated_positions: usize,
    pub remaining_collateral: i128,
    /// More liquidatable ticks remain past the iteration cap
    pub pending: bool,
}

impl LiquidationResult {
    pub fn metrics(&self) -> SweepMetrics {
        SweepMetrics {
            liquidated_ticks: self.liquidated_ticks.len() as u16,
            liquidated_positions: self.liquidated_positions,
            remaining_collateral: self.remaining_collateral,
            pending: self.pending,
        }
    }
}

/// Bounded top-down liquidation sweep.
pub struct LiquidationEngine;

impl LiquidationEngine {
    /// A tick is liquidatable once the current price touches its nominal
    /// price. Positions are then valued at the penalty-adjusted price below
    /// it, so the penalty margin is what the sweep normally recovers.
    fn liquidatable_tick(ledger: &TickLedger, current_price: u128) -> Option<i32> {
        let tick = ledger.highest_populated_tick()?;
        (ledger.tick_price(tick) >= current_price).then_some(tick)
    }

    /// Liquidate from the highest populated tick downward, at most
    /// `max_iterations` ticks. Freed collateral moves long -> vault; bad debt
    /// moves vault -> long, clamped so neither side goes negative.
    pub fn sweep(
        ledger: &mut TickLedger,
        current_price: u128,
        max_iterations: u16,
        balance_long: &mut u128,
        balance_vault: &mut u128,
    ) -> Result<LiquidationResult, ProtocolError> {
        let mut result = LiquidationResult::default();
        while (result.liquidated_ticks.len() as u16) < max_iterations {
            let Some(tick) = Self::liquidatable_tick(ledger, current_price) else {
                break;
            };
            let liquidated = ledger.liquidate_tick(tick, current_price)?;
            debug!(
                tick,
                version = liquidated.version,
                positions = liquidated.positions,
                tick_value = liquidated.tick_value,
                "liquidated tick"
            );
            if liquidated.tick_value >= 0 {
                let freed = (liquidated.tick_value as u128).min(*balance_long);
                *balance_long -= freed;
                *balance_vault += freed;
            } else {
                let debt = liquidated.tick_value.unsigned_abs().min(*balance_vault);
                *balance_vault -= debt;
                *balance_long += debt;
            }
            result.liquidated_positions += liquidated.positions;
            result.remaining_collateral += liquidated.tick_value;
            result.liquidated_ticks.push(liquidated);
        }
        result.pending = Self::liquidatable_tick(ledger, current_price).is_some();
        Ok(result)
    }

    /// Reward owed for `result`, capped so it never exceeds the collateral the
    /// sweep actually freed into the vault.
    pub fn reward_for<R: LiquidationRewards>(
        calculator: &R,
        result: &LiquidationResult,
        balance_vault: u128,
    ) -> u128 {
        let metrics = result.metrics();
        let reward = calculator.rewards(&metrics);
        let freed = if result.remaining_collateral > 0 {
            result.remaining_collateral as u128
        } else {
            0
        };
        reward.min(freed).min(balance_vault)
    }
}
