use crate::errors::ProtocolError;
use crate::ledger::{position_value, CloseOutcome, TickLedger};
use crate::types::*;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Owner of the pooled rebalancer position.
pub const REBALANCER_ADDRESS: Address = Address::repeat_byte(0xFB);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancerConfig {
    /// Imbalance limits per action direction, in bps of total exposure
    pub deposit_limit_bps: u16,
    pub withdrawal_limit_bps: u16,
    pub open_limit_bps: u16,
    pub close_limit_bps: u16,
    /// Vault-heavy imbalance past which a trigger attempts a correction
    pub trigger_imbalance_bps: u16,
    /// Leverage of the pooled position, `LEVERAGE_SCALE` fixed point
    pub position_leverage: u128,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            deposit_limit_bps: 200,
            withdrawal_limit_bps: 600,
            open_limit_bps: 500,
            close_limit_bps: 600,
            trigger_imbalance_bps: 500,
            position_leverage: 3 * LEVERAGE_SCALE,
        }
    }
}

/// What a trigger did, surfaced to the caller as a flag, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalancerOutcome {
    None,
    Opened,
    Closed,
    Resized,
}

/// A slot relocation caused by closing the pooled position; the caller must
/// patch any stored ids pointing at the moved slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotMove {
    pub tick: i32,
    pub tick_version: u64,
    pub old_index: usize,
    pub new_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerResult {
    pub outcome: RebalancerOutcome,
    pub moved: Option<SlotMove>,
}

/// Signed vault-heaviness in bps of total exposure: positive means the vault
/// side outweighs the long trading exposure. Errors when a balance exceeds
/// the signed range or the bps scaling overflows.
pub fn imbalance_bps(
    total_expo: u128,
    balance_long: u128,
    balance_vault: u128,
) -> Result<i128, ProtocolError> {
    if total_expo == 0 {
        return Ok(0);
    }
    let trading = i128::try_from(total_expo.saturating_sub(balance_long))
        .map_err(|_| ProtocolError::ArithmeticOverflow)?;
    let vault =
        i128::try_from(balance_vault).map_err(|_| ProtocolError::ArithmeticOverflow)?;
    let total = i128::try_from(total_expo).map_err(|_| ProtocolError::ArithmeticOverflow)?;
    let spread = (vault - trading)
        .checked_mul(BPS_DIVISOR as i128)
        .ok_or(ProtocolError::ArithmeticOverflow)?;
    Ok(spread / total)
}

/// Pooled corrective position management.
///
/// Holds externally funded assets and, after liquidations leave the book
/// vault-heavy, deploys them as a leveraged position to pull the imbalance
/// back. Every step is best-effort: a failed correction logs and reports
/// `None` rather than blocking the action that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rebalancer {
    config: RebalancerConfig,
    position: Option<PositionId>,
    pending_assets: u128,
}

impl Rebalancer {
    pub fn new(config: RebalancerConfig) -> Self {
        Self {
            config,
            position: None,
            pending_assets: 0,
        }
    }

    pub fn config(&self) -> &RebalancerConfig {
        &self.config
    }

    pub fn position(&self) -> Option<PositionId> {
        self.position
    }

    pub fn pending_assets(&self) -> u128 {
        self.pending_assets
    }

    /// Add external assets to be deployed at the next trigger.
    pub fn fund(&mut self, amount: u128) {
        self.pending_assets += amount;
    }

    /// Reject an action that would push the imbalance past its directional
    /// limit. Deposits and closes push toward vault-heavy, withdrawals and
    /// opens toward long-heavy; other actions are never limited.
    pub fn check_action_limit(
        &self,
        action: ProtocolAction,
        imbalance: i128,
    ) -> Result<(), ProtocolError> {
        use ProtocolAction::*;
        let breached = match action {
            InitiateDeposit | ValidateDeposit => {
                imbalance > self.config.deposit_limit_bps as i128
            }
            InitiateClosePosition | ValidateClosePosition => {
                imbalance > self.config.close_limit_bps as i128
            }
            InitiateWithdrawal | ValidateWithdrawal => {
                imbalance < -(self.config.withdrawal_limit_bps as i128)
            }
            InitiateOpenPosition | ValidateOpenPosition => {
                imbalance < -(self.config.open_limit_bps as i128)
            }
            _ => false,
        };
        if breached {
            return Err(ProtocolError::ImbalanceLimitReached(imbalance));
        }
        Ok(())
    }

    /// Desired liquidation price for the configured leverage at `price`.
    fn target_liq_price(&self, price: u128) -> Result<u128, ProtocolError> {
        let lev = self.config.position_leverage.max(LEVERAGE_SCALE + 1);
        mul_div(price, lev - LEVERAGE_SCALE, lev)
    }

    /// Attempt a correction after a balance-changing action. Closes the
    /// previous pooled position (its value joins the pending assets) and
    /// redeploys everything at the configured leverage when the book is
    /// vault-heavy past the trigger threshold.
    pub fn trigger(
        &mut self,
        ledger: &mut TickLedger,
        balance_long: &mut u128,
        balance_vault: &mut u128,
        current_price: u128,
        timestamp: u64,
    ) -> TriggerResult {
        let imbalance = match imbalance_bps(ledger.total_expo(), *balance_long, *balance_vault) {
            Ok(imbalance) => imbalance,
            Err(err) => {
                warn!(%err, "imbalance computation failed");
                return TriggerResult {
                    outcome: RebalancerOutcome::None,
                    moved: None,
                };
            }
        };
        if imbalance < self.config.trigger_imbalance_bps as i128 {
            return TriggerResult {
                outcome: RebalancerOutcome::None,
                moved: None,
            };
        }

        let mut moved = None;
        let mut closed = false;
        if let Some(id) = self.position.take() {
            match self.close_pooled(ledger, &id, current_price, balance_long) {
                Ok((did_close, m)) => {
                    closed = did_close;
                    moved = m;
                }
                Err(err) => {
                    warn!(?id, %err, "rebalancer close failed");
                    self.position = Some(id);
                    return TriggerResult {
                        outcome: RebalancerOutcome::None,
                        moved: None,
                    };
                }
            }
        }

        let mut opened = false;
        if self.pending_assets >= ledger.config().min_long_position {
            match self.open_pooled(ledger, current_price, timestamp) {
                Ok(amount) => {
                    *balance_long += amount;
                    opened = true;
                }
                Err(err) => warn!(%err, "rebalancer open failed"),
            }
        }

        let outcome = match (closed, opened) {
            (true, true) => RebalancerOutcome::Resized,
            (false, true) => RebalancerOutcome::Opened,
            (true, false) => RebalancerOutcome::Closed,
            (false, false) => RebalancerOutcome::None,
        };
        debug!(imbalance, ?outcome, "rebalancer trigger");
        TriggerResult { outcome, moved }
    }

    fn close_pooled(
        &mut self,
        ledger: &mut TickLedger,
        id: &PositionId,
        current_price: u128,
        balance_long: &mut u128,
    ) -> Result<(bool, Option<SlotMove>), ProtocolError> {
        let Some(pos) = ledger.get_position(id) else {
            // the pooled position was liquidated with its tick
            debug!(?id, "pooled position already liquidated");
            return Ok((false, None));
        };
        let amount = pos.amount;
        match ledger.close_position(id, amount)? {
            CloseOutcome::AlreadyLiquidated => Ok((false, None)),
            CloseOutcome::Closed {
                total_expo_removed,
                effective_tick_price,
                moved_from,
                ..
            } => {
                let value = position_value(total_expo_removed, effective_tick_price, current_price)?;
                let value = if value > 0 {
                    (value as u128).min(*balance_long)
                } else {
                    0
                };
                *balance_long -= value;
                self.pending_assets += value;
                let moved = moved_from.map(|old_index| SlotMove {
                    tick: id.tick,
                    tick_version: id.tick_version,
                    old_index,
                    new_index: id.index,
                });
                Ok((true, moved))
            }
        }
    }

    fn open_pooled(
        &mut self,
        ledger: &mut TickLedger,
        current_price: u128,
        timestamp: u64,
    ) -> Result<u128, ProtocolError> {
        let amount = self.pending_assets;
        let desired = self.target_liq_price(current_price)?;
        let (id, _) =
            ledger.open_position(REBALANCER_ADDRESS, amount, desired, current_price, timestamp)?;
        // pooled positions skip the two-phase flow; validated at the same price
        ledger.validate_open(&id, current_price)?;
        self.pending_assets = 0;
        self.position = Some(id);
        Ok(amount)
    }
}
