use crate::errors::ProtocolError;
use crate::funding::{FundingConfig, FundingEngine, FundingState};
use crate::ledger::{position_value, CloseOutcome, LedgerConfig, OpenValidation, TickLedger};
use crate::liquidation::{LiquidationEngine, LiquidationResult, LiquidationRewards};
use crate::oracle::{OracleAdapter, PriceInfo};
use crate::pending::{
    PendingAction, PendingClose, PendingDeposit, PendingOpen, PendingQueue, PendingWithdrawal,
};
use crate::rebalancer::{imbalance_bps, Rebalancer, RebalancerConfig, RebalancerOutcome};
use crate::types::*;
use crate::vault::{assets_for_shares, shares_for_deposit, RebaseToken};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub ledger: LedgerConfig,
    pub funding: FundingConfig,
    pub rebalancer: RebalancerConfig,
    /// Fee on settled amounts, in bps
    pub fee_bps: u16,
    /// Accrued fees are collected once they reach this amount
    pub fee_threshold: u128,
    /// Deposit required with every initiate, refunded at validation
    pub security_deposit: u128,
    /// Seconds between initiation and the earliest validation
    pub validation_delay: u64,
    /// Seconds after which anyone may settle an abandoned action
    pub validation_deadline: u64,
    pub max_queue_len: usize,
    /// Tick cap per incidental liquidation sweep
    pub liquidation_iterations: u16,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            funding: FundingConfig::default(),
            rebalancer: RebalancerConfig::default(),
            fee_bps: 10, // 0.1%
            fee_threshold: 1_000_000_000_000_000_000,
            security_deposit: 0,
            validation_delay: 24,
            validation_deadline: 1_200,
            max_queue_len: 255,
            liquidation_iterations: 10,
        }
    }
}

/// Scalar protocol state, persisted alongside the ledger and queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolState {
    pub initialized: bool,
    /// Collateral backing the long side
    pub balance_long: u128,
    /// Assets backing the vault side
    pub balance_vault: u128,
    /// Price as of the last committed call
    pub last_price: u128,
    pub funding: FundingState,
    /// Fees accrued but not yet collected
    pub pending_protocol_fee: u128,
    pub collected_fees: u128,
    /// Security deposits currently held for in-flight actions
    pub security_deposits: u128,
}

/// What settling one pending action produced for its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Deposit { minted_shares: u128 },
    Withdrawal { assets: u128 },
    Open { validated: bool },
    Close { payout: u128 },
}

/// Outcome of an admin or stale-path removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedPending {
    pub security_deposit: u128,
    /// Assets returned to the action's owner by the reversal
    pub payout: u128,
}

/// A stale head action force-removed from the queue to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictedPending {
    pub validator: Address,
    /// Assets owed back to the evicted owner by the reversal
    pub payout: u128,
    /// Security deposit forfeited to the vault
    pub forfeited_deposit: u128,
}

/// Side effects of an initiate call beyond its primary action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitiateOutcome {
    /// Reward owed to the caller for ticks the incidental sweep liquidated
    pub liquidation_reward: u128,
    pub evicted: Option<EvictedPending>,
}

fn add_signed(base: u128, delta: i128) -> u128 {
    if delta >= 0 {
        base.saturating_add(delta as u128)
    } else {
        base.saturating_sub(delta.unsigned_abs())
    }
}

/// The protocol core: orchestrates the ledger, funding engine, pending queue,
/// liquidation sweep and rebalancer around externally supplied prices.
///
/// Every entry point takes an explicit `now`; the host is responsible for
/// call ordering and each call sees fully committed prior state.
pub struct Protocol<O, R, T> {
    config: ProtocolConfig,
    state: ProtocolState,
    ledger: TickLedger,
    queue: PendingQueue,
    funding_engine: FundingEngine,
    rebalancer: Rebalancer,
    oracle: O,
    rewards: R,
    token: T,
}

/// Everything persisted for one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSnapshot {
    pub state: ProtocolState,
    pub ledger: TickLedger,
    pub queue: PendingQueue,
    pub rebalancer: Rebalancer,
}

impl<O: OracleAdapter, R: LiquidationRewards, T: RebaseToken + Clone> Protocol<O, R, T> {
    pub fn new(config: ProtocolConfig, oracle: O, rewards: R, token: T) -> Self {
        let ledger = TickLedger::new(config.ledger.clone());
        let funding_engine = FundingEngine::new(config.funding.clone());
        let rebalancer = Rebalancer::new(config.rebalancer.clone());
        let queue = PendingQueue::new(config.max_queue_len);
        Self {
            config,
            state: ProtocolState::default(),
            ledger,
            queue,
            funding_engine,
            rebalancer,
            oracle,
            rewards,
            token,
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn ledger(&self) -> &TickLedger {
        &self.ledger
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    pub fn rebalancer(&self) -> &Rebalancer {
        &self.rebalancer
    }

    pub fn rebalancer_mut(&mut self) -> &mut Rebalancer {
        &mut self.rebalancer
    }

    pub fn snapshot(&self) -> ProtocolSnapshot {
        ProtocolSnapshot {
            state: self.state.clone(),
            ledger: self.ledger.clone(),
            queue: self.queue.clone(),
            rebalancer: self.rebalancer.clone(),
        }
    }

    /// Rebuild a protocol around persisted state and fresh collaborators.
    pub fn from_snapshot(
        config: ProtocolConfig,
        snapshot: ProtocolSnapshot,
        oracle: O,
        rewards: R,
        token: T,
    ) -> Self {
        let funding_engine = FundingEngine::new(config.funding.clone());
        Self {
            config,
            state: snapshot.state,
            ledger: snapshot.ledger,
            queue: snapshot.queue,
            funding_engine,
            rebalancer: snapshot.rebalancer,
            oracle,
            rewards,
            token,
        }
    }

    /// Run `mutation` all-or-nothing: an error restores every mutable
    /// component, so a rejected call leaves prior-call state unchanged.
    fn transact<V>(
        &mut self,
        mutation: impl FnOnce(&mut Self) -> Result<V, ProtocolError>,
    ) -> Result<V, ProtocolError> {
        let state = self.state.clone();
        let ledger = self.ledger.clone();
        let queue = self.queue.clone();
        let rebalancer = self.rebalancer.clone();
        let token = self.token.clone();
        match mutation(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.state = state;
                self.ledger = ledger;
                self.queue = queue;
                self.rebalancer = rebalancer;
                self.token = token;
                Err(err)
            }
        }
    }

    /// Seed the deployment: one validated long position plus the initial vault
    /// deposit, at a single reference price.
    pub fn initialize(
        &mut self,
        depositor: Address,
        long_amount: u128,
        vault_amount: u128,
        desired_liq_price: u128,
        price: u128,
        timestamp: u64,
    ) -> Result<PositionId, ProtocolError> {
        self.transact(|p| {
            p.initialize_inner(
                depositor,
                long_amount,
                vault_amount,
                desired_liq_price,
                price,
                timestamp,
            )
        })
    }

    fn initialize_inner(
        &mut self,
        depositor: Address,
        long_amount: u128,
        vault_amount: u128,
        desired_liq_price: u128,
        price: u128,
        timestamp: u64,
    ) -> Result<PositionId, ProtocolError> {
        if self.state.initialized {
            return Err(ProtocolError::AlreadyInitialized);
        }
        if long_amount == 0 || vault_amount == 0 {
            return Err(ProtocolError::ZeroAmount);
        }
        let (id, _) =
            self.ledger
                .open_position(depositor, long_amount, desired_liq_price, price, timestamp)?;
        self.ledger.validate_open(&id, price)?;
        self.token.mint_shares(depositor, vault_amount)?;
        self.state.balance_long = long_amount;
        self.state.balance_vault = vault_amount;
        self.state.last_price = price;
        self.state.funding.last_update = timestamp;
        self.state.initialized = true;
        info!(
            long_amount,
            vault_amount,
            price,
            total_expo = self.ledger.total_expo(),
            "protocol initialized"
        );
        Ok(id)
    }

    fn ensure_initialized(&self) -> Result<(), ProtocolError> {
        if !self.state.initialized {
            return Err(ProtocolError::NotInitialized);
        }
        Ok(())
    }

    /// Shared initiate prologue: deposit check, oracle query, funding and
    /// incidental liquidations at the fetched price. Returns the price and
    /// the sweep reward owed to the caller.
    fn begin_action(
        &mut self,
        action: ProtocolAction,
        security_deposit: u128,
        fee: u128,
        payload: &[u8],
        now: u64,
    ) -> Result<(PriceInfo, u128), ProtocolError> {
        self.ensure_initialized()?;
        if security_deposit < self.config.security_deposit {
            return Err(ProtocolError::InsufficientSecurityDeposit(
                self.config.security_deposit,
            ));
        }
        let price = self.oracle.get_price(action, now, payload, fee)?;
        let (_, reward) = self.apply_price(price.price, now, self.config.liquidation_iterations)?;
        Ok((price, reward))
    }

    /// Funding/PnL then the liquidation sweep, in that order. Updates the
    /// stored last price and deducts the caller's sweep reward from the
    /// vault; the reward is owed to whoever made the call that swept.
    fn apply_price(
        &mut self,
        price: u128,
        timestamp: u64,
        iterations: u16,
    ) -> Result<(LiquidationResult, u128), ProtocolError> {
        let ts = timestamp.max(self.state.funding.last_update);
        let applied = self.funding_engine.apply(
            &mut self.state.funding,
            self.ledger.total_expo(),
            self.state.balance_long,
            self.state.balance_vault,
            self.state.last_price,
            price,
            ts,
        )?;
        self.state.balance_long = applied.balance_long;
        self.state.balance_vault = applied.balance_vault;
        let result = LiquidationEngine::sweep(
            &mut self.ledger,
            price,
            iterations,
            &mut self.state.balance_long,
            &mut self.state.balance_vault,
        )?;
        let reward =
            LiquidationEngine::reward_for(&self.rewards, &result, self.state.balance_vault);
        self.state.balance_vault -= reward;
        self.state.last_price = price;
        Ok((result, reward))
    }

    /// Post-action epilogue, in documented trigger order: fee-threshold
    /// collection, then the rebalancer.
    fn after_action(&mut self, price: u128, timestamp: u64) {
        if self.state.pending_protocol_fee > 0
            && self.state.pending_protocol_fee >= self.config.fee_threshold
        {
            let amount = std::mem::take(&mut self.state.pending_protocol_fee);
            self.state.collected_fees += amount;
            info!(amount, "protocol fees collected");
        }
        let result = self.rebalancer.trigger(
            &mut self.ledger,
            &mut self.state.balance_long,
            &mut self.state.balance_vault,
            price,
            timestamp,
        );
        if let Some(m) = result.moved {
            self.queue
                .rekey_position(m.tick, m.tick_version, m.old_index, m.new_index);
        }
        if result.outcome != RebalancerOutcome::None {
            debug!(outcome = ?result.outcome, "rebalancer acted");
        }
    }

    fn accrue_fee(&mut self, fee: u128) {
        self.state.pending_protocol_fee += fee;
    }

    /// Imbalance check against the limits, with the action's effect projected
    /// onto the current balances before anything is mutated.
    fn check_imbalance(
        &self,
        action: ProtocolAction,
        d_total_expo: i128,
        d_balance_long: i128,
        d_vault: i128,
    ) -> Result<(), ProtocolError> {
        let total = add_signed(self.ledger.total_expo(), d_total_expo);
        let long = add_signed(self.state.balance_long, d_balance_long);
        let vault = add_signed(self.state.balance_vault, d_vault);
        self.rebalancer
            .check_action_limit(action, imbalance_bps(total, long, vault)?)
    }

    /// Push onto the queue, evicting a stale head if needed to make room.
    /// A failed eviction reversal rejects the push; partial eviction state
    /// must never persist.
    fn enqueue(
        &mut self,
        action: PendingAction,
        now: u64,
    ) -> Result<Option<EvictedPending>, ProtocolError> {
        let (_, evicted) = self
            .queue
            .push(action, now, self.config.validation_deadline)?;
        let Some(ev) = evicted else {
            return Ok(None);
        };
        // the stale owner's deposit is forfeited to the vault; whatever the
        // action held is still owed back to them
        let payout = self.revert_pending(&ev)?;
        let forfeited = ev.security_deposit();
        self.state.security_deposits -= forfeited.min(self.state.security_deposits);
        self.state.balance_vault += forfeited;
        info!(validator = ?ev.validator(), payout, forfeited, "evicted stale pending action");
        Ok(Some(EvictedPending {
            validator: ev.validator(),
            payout,
            forfeited_deposit: forfeited,
        }))
    }

    pub fn initiate_deposit(
        &mut self,
        user: Address,
        amount: u128,
        security_deposit: u128,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<InitiateOutcome, ProtocolError> {
        self.transact(|p| p.initiate_deposit_inner(user, amount, security_deposit, payload, fee, now))
    }

    fn initiate_deposit_inner(
        &mut self,
        user: Address,
        amount: u128,
        security_deposit: u128,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<InitiateOutcome, ProtocolError> {
        if amount == 0 {
            return Err(ProtocolError::ZeroAmount);
        }
        let (price, liquidation_reward) = self.begin_action(
            ProtocolAction::InitiateDeposit,
            security_deposit,
            fee,
            payload,
            now,
        )?;
        self.queue
            .can_push(&user, now, self.config.validation_deadline)?;
        self.check_imbalance(ProtocolAction::InitiateDeposit, 0, 0, amount as i128)?;
        let evicted = self.enqueue(
            PendingAction::Deposit(PendingDeposit {
                validator: user,
                amount,
                timestamp: now,
                security_deposit,
            }),
            now,
        )?;
        self.state.security_deposits += security_deposit;
        self.after_action(price.price, now);
        Ok(InitiateOutcome {
            liquidation_reward,
            evicted,
        })
    }

    pub fn initiate_withdrawal(
        &mut self,
        user: Address,
        shares: u128,
        security_deposit: u128,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<InitiateOutcome, ProtocolError> {
        self.transact(|p| p.initiate_withdrawal_inner(user, shares, security_deposit, payload, fee, now))
    }

    fn initiate_withdrawal_inner(
        &mut self,
        user: Address,
        shares: u128,
        security_deposit: u128,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<InitiateOutcome, ProtocolError> {
        if shares == 0 {
            return Err(ProtocolError::ZeroAmount);
        }
        let (price, liquidation_reward) = self.begin_action(
            ProtocolAction::InitiateWithdrawal,
            security_deposit,
            fee,
            payload,
            now,
        )?;
        self.queue
            .can_push(&user, now, self.config.validation_deadline)?;
        let estimated =
            assets_for_shares(shares, self.state.balance_vault, self.token.total_shares())?;
        self.check_imbalance(
            ProtocolAction::InitiateWithdrawal,
            0,
            0,
            -(estimated as i128),
        )?;
        self.token.burn_shares(&user, shares)?;
        let evicted = self.enqueue(
            PendingAction::Withdrawal(PendingWithdrawal {
                validator: user,
                shares,
                timestamp: now,
                security_deposit,
            }),
            now,
        )?;
        self.state.security_deposits += security_deposit;
        self.after_action(price.price, now);
        Ok(InitiateOutcome {
            liquidation_reward,
            evicted,
        })
    }

    /// Open a leveraged position at the initiate price. The collateral enters
    /// the long side immediately; the vault is untouched until validation
    /// settles the final exposure.
    pub fn initiate_open_position(
        &mut self,
        user: Address,
        amount: u128,
        desired_liq_price: u128,
        security_deposit: u128,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<(PositionId, InitiateOutcome), ProtocolError> {
        self.transact(|p| {
            p.initiate_open_position_inner(
                user,
                amount,
                desired_liq_price,
                security_deposit,
                payload,
                fee,
                now,
            )
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn initiate_open_position_inner(
        &mut self,
        user: Address,
        amount: u128,
        desired_liq_price: u128,
        security_deposit: u128,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<(PositionId, InitiateOutcome), ProtocolError> {
        let (price, liquidation_reward) = self.begin_action(
            ProtocolAction::InitiateOpenPosition,
            security_deposit,
            fee,
            payload,
            now,
        )?;
        self.queue
            .can_push(&user, now, self.config.validation_deadline)?;
        let (_, _, projected_expo) =
            self.ledger
                .projected_open(amount, desired_liq_price, price.price)?;
        self.check_imbalance(
            ProtocolAction::InitiateOpenPosition,
            projected_expo as i128,
            amount as i128,
            0,
        )?;
        let (mut id, effective) =
            self.ledger
                .open_position(user, amount, desired_liq_price, price.price, now)?;
        self.state.balance_long += amount;
        let evicted = self.enqueue(
            PendingAction::OpenPosition(PendingOpen {
                validator: user,
                id,
                timestamp: now,
                security_deposit,
            }),
            now,
        )?;
        // reverting an evicted open in the same tick may have moved our slot
        if let Some(PendingAction::OpenPosition(p)) = self.queue.get_validator(&user) {
            id = p.id;
        }
        self.state.security_deposits += security_deposit;
        debug!(?id, effective, amount, "position initiated");
        self.after_action(price.price, now);
        Ok((
            id,
            InitiateOutcome {
                liquidation_reward,
                evicted,
            },
        ))
    }

    /// Carve `amount_to_close` out of an owned, validated position. The slice
    /// leaves the ledger now and settles against the validation price.
    pub fn initiate_close_position(
        &mut self,
        user: Address,
        id: PositionId,
        amount_to_close: u128,
        security_deposit: u128,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<InitiateOutcome, ProtocolError> {
        self.transact(|p| {
            p.initiate_close_position_inner(
                user,
                id,
                amount_to_close,
                security_deposit,
                payload,
                fee,
                now,
            )
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn initiate_close_position_inner(
        &mut self,
        user: Address,
        id: PositionId,
        amount_to_close: u128,
        security_deposit: u128,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<InitiateOutcome, ProtocolError> {
        let (price, liquidation_reward) = self.begin_action(
            ProtocolAction::InitiateClosePosition,
            security_deposit,
            fee,
            payload,
            now,
        )?;
        self.queue
            .can_push(&user, now, self.config.validation_deadline)?;
        let pos = self
            .ledger
            .get_position(&id)
            .ok_or(ProtocolError::PositionNotFound)?;
        if pos.user != user {
            return Err(ProtocolError::Unauthorized);
        }
        if !pos.validated {
            return Err(ProtocolError::PositionNotValidated);
        }
        let start_price = pos.start_price;
        let estimated_expo = mul_div(pos.total_expo, amount_to_close, pos.amount)?;
        self.check_imbalance(
            ProtocolAction::InitiateClosePosition,
            -(estimated_expo as i128),
            0,
            0,
        )?;
        match self.ledger.close_position(&id, amount_to_close)? {
            CloseOutcome::AlreadyLiquidated => Err(ProtocolError::PositionNotFound),
            CloseOutcome::Closed {
                amount_closed,
                total_expo_removed,
                effective_tick_price,
                moved_from,
            } => {
                if let Some(old) = moved_from {
                    self.queue
                        .rekey_position(id.tick, id.tick_version, old, id.index);
                }
                let evicted = self.enqueue(
                    PendingAction::ClosePosition(PendingClose {
                        validator: user,
                        amount: amount_closed,
                        total_expo: total_expo_removed,
                        effective_liq_price: effective_tick_price,
                        start_price,
                        timestamp: now,
                        security_deposit,
                    }),
                    now,
                )?;
                self.state.security_deposits += security_deposit;
                self.after_action(price.price, now);
                Ok(InitiateOutcome {
                    liquidation_reward,
                    evicted,
                })
            }
        }
    }

    /// Settle the caller's own pending action of the expected kind. Returns
    /// the settlement and the caller's incidental sweep reward.
    fn validate_own(
        &mut self,
        validator: Address,
        kind: ProtocolAction,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<(Settlement, u128), ProtocolError> {
        self.ensure_initialized()?;
        let action = self
            .queue
            .get_validator(&validator)
            .cloned()
            .ok_or(ProtocolError::NoPendingAction)?;
        if action.validate_action() != kind {
            return Err(ProtocolError::PendingActionMismatch);
        }
        let target = action.timestamp() + self.config.validation_delay;
        if now < target {
            return Err(ProtocolError::PriceTimestampInvalid {
                provided: now,
                target,
            });
        }
        let price = self.oracle.get_price(kind, target, payload, fee)?;
        let (_, reward) = self.apply_price(price.price, now, self.config.liquidation_iterations)?;
        let settlement = self.settle(&action, &price)?;
        self.queue.take_validator(&validator)?;
        let d = action.security_deposit();
        self.state.security_deposits -= d.min(self.state.security_deposits);
        self.after_action(price.price, now);
        Ok((settlement, reward))
    }

    /// Returns `(minted_shares, sweep_reward)` for the depositor.
    pub fn validate_deposit(
        &mut self,
        validator: Address,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<(u128, u128), ProtocolError> {
        match self.transact(|p| {
            p.validate_own(validator, ProtocolAction::ValidateDeposit, payload, fee, now)
        })? {
            (Settlement::Deposit { minted_shares }, reward) => Ok((minted_shares, reward)),
            _ => Err(ProtocolError::PendingActionMismatch),
        }
    }

    /// Returns `(assets, sweep_reward)`; assets are net of fees.
    pub fn validate_withdrawal(
        &mut self,
        validator: Address,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<(u128, u128), ProtocolError> {
        match self.transact(|p| {
            p.validate_own(
                validator,
                ProtocolAction::ValidateWithdrawal,
                payload,
                fee,
                now,
            )
        })? {
            (Settlement::Withdrawal { assets }, reward) => Ok((assets, reward)),
            _ => Err(ProtocolError::PendingActionMismatch),
        }
    }

    /// Returns `(validated, sweep_reward)`; `validated` is false when the
    /// position was liquidated before validation.
    pub fn validate_open_position(
        &mut self,
        validator: Address,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<(bool, u128), ProtocolError> {
        match self.transact(|p| {
            p.validate_own(
                validator,
                ProtocolAction::ValidateOpenPosition,
                payload,
                fee,
                now,
            )
        })? {
            (Settlement::Open { validated }, reward) => Ok((validated, reward)),
            _ => Err(ProtocolError::PendingActionMismatch),
        }
    }

    /// Returns `(payout, sweep_reward)`; the payout is net of fees and zero
    /// when the price crossed the liquidation threshold while the close was
    /// in flight.
    pub fn validate_close_position(
        &mut self,
        validator: Address,
        payload: &[u8],
        fee: u128,
        now: u64,
    ) -> Result<(u128, u128), ProtocolError> {
        match self.transact(|p| {
            p.validate_own(
                validator,
                ProtocolAction::ValidateClosePosition,
                payload,
                fee,
                now,
            )
        })? {
            (Settlement::Close { payout }, reward) => Ok((payout, reward)),
            _ => Err(ProtocolError::PendingActionMismatch),
        }
    }

    fn settle(
        &mut self,
        action: &PendingAction,
        price: &PriceInfo,
    ) -> Result<Settlement, ProtocolError> {
        match action {
            PendingAction::Deposit(p) => {
                let fee = bps_of(p.amount, self.config.fee_bps);
                let net = p.amount - fee;
                let minted_shares =
                    shares_for_deposit(net, self.state.balance_vault, self.token.total_shares())?;
                self.token.mint_shares(p.validator, minted_shares)?;
                self.state.balance_vault += net;
                self.accrue_fee(fee);
                Ok(Settlement::Deposit { minted_shares })
            }
            PendingAction::Withdrawal(p) => {
                // shares were burned at initiation; add them back to price the
                // redemption against the pre-burn pool
                let total = self.token.total_shares() + p.shares;
                let gross = assets_for_shares(p.shares, self.state.balance_vault, total)?
                    .min(self.state.balance_vault);
                let fee = bps_of(gross, self.config.fee_bps);
                self.state.balance_vault -= gross;
                self.accrue_fee(fee);
                Ok(Settlement::Withdrawal { assets: gross - fee })
            }
            PendingAction::OpenPosition(p) => match self.ledger.validate_open(&p.id, price.price)?
            {
                OpenValidation::Validated { .. } => Ok(Settlement::Open { validated: true }),
                OpenValidation::AlreadyLiquidated => Ok(Settlement::Open { validated: false }),
            },
            PendingAction::ClosePosition(p) => {
                let value = position_value(p.total_expo, p.effective_liq_price, price.price)?;
                let gross = if value > 0 {
                    (value as u128).min(self.state.balance_long)
                } else {
                    0
                };
                let fee = bps_of(gross, self.config.fee_bps);
                self.state.balance_long -= gross;
                self.accrue_fee(fee);
                Ok(Settlement::Close {
                    payout: gross - fee,
                })
            }
        }
    }

    /// Explicit liquidation call: sweeps up to `iterations` ticks (bounded by
    /// the configured cap) and pays the caller a reward from the vault.
    pub fn liquidate(
        &mut self,
        payload: &[u8],
        fee: u128,
        iterations: u16,
        now: u64,
    ) -> Result<(LiquidationResult, u128), ProtocolError> {
        self.transact(|p| {
            p.ensure_initialized()?;
            let price = p
                .oracle
                .get_price(ProtocolAction::Liquidation, now, payload, fee)?;
            let cap = iterations.min(p.config.liquidation_iterations).max(1);
            let (result, reward) = p.apply_price(price.price, now, cap)?;
            p.after_action(price.price, now);
            Ok((result, reward))
        })
    }

    /// Settle abandoned actions past their validation deadline, oldest first.
    /// The caller collects each action's security deposit plus any sweep
    /// rewards; settlement proceeds still go to the original owners. Returns
    /// `(settled, assets_earned)`. Any failure aborts the whole batch.
    pub fn validate_actionable(
        &mut self,
        caller: Address,
        payload: &[u8],
        fee: u128,
        max: usize,
        now: u64,
    ) -> Result<(usize, u128), ProtocolError> {
        self.transact(|p| p.validate_actionable_inner(caller, payload, fee, max, now))
    }

    fn validate_actionable_inner(
        &mut self,
        caller: Address,
        payload: &[u8],
        fee: u128,
        max: usize,
        now: u64,
    ) -> Result<(usize, u128), ProtocolError> {
        self.ensure_initialized()?;
        let keys = self
            .queue
            .actionable(&caller, now, self.config.validation_deadline, max);
        let mut settled = 0usize;
        let mut earned = 0u128;
        let mut last_price = None;
        for key in keys {
            let Some(action) = self.queue.get(key).cloned() else {
                continue;
            };
            let kind = action.validate_action();
            let target = action.timestamp() + self.config.validation_delay;
            let price = self.oracle.get_price(kind, target, payload, fee)?;
            let (_, reward) =
                self.apply_price(price.price, now, self.config.liquidation_iterations)?;
            self.settle(&action, &price)?;
            self.queue.remove(key);
            let d = action.security_deposit();
            self.state.security_deposits -= d.min(self.state.security_deposits);
            earned += d + reward;
            settled += 1;
            last_price = Some(price.price);
            info!(validator = ?action.validator(), ?kind, "settled abandoned action");
        }
        if let Some(p) = last_price {
            self.after_action(p, now);
        }
        Ok((settled, earned))
    }

    /// Admin path: remove a pending action in `Initiated` state, reverting its
    /// initiate-side effects and refunding the security deposit.
    pub fn admin_remove_pending(
        &mut self,
        validator: Address,
    ) -> Result<RemovedPending, ProtocolError> {
        self.transact(|p| {
            p.ensure_initialized()?;
            let action = p.queue.take_validator(&validator)?;
            let payout = p.revert_pending(&action)?;
            let security_deposit = action.security_deposit();
            p.state.security_deposits -= security_deposit.min(p.state.security_deposits);
            info!(?validator, payout, "pending action removed by admin");
            Ok(RemovedPending {
                security_deposit,
                payout,
            })
        })
    }

    /// Undo the initiate-side effects of a pending action. Returns the assets
    /// owed back to the action's owner.
    fn revert_pending(&mut self, action: &PendingAction) -> Result<u128, ProtocolError> {
        match action {
            // the deposit amount was held aside, never entered the vault
            PendingAction::Deposit(p) => Ok(p.amount),
            PendingAction::Withdrawal(p) => {
                self.token.mint_shares(p.validator, p.shares)?;
                Ok(0)
            }
            PendingAction::OpenPosition(p) => {
                let Some(pos) = self.ledger.get_position(&p.id) else {
                    // liquidated in the meantime; collateral already resolved
                    return Ok(0);
                };
                let amount = pos.amount;
                if let CloseOutcome::Closed { moved_from, .. } =
                    self.ledger.close_position(&p.id, amount)?
                {
                    if let Some(old) = moved_from {
                        self.queue
                            .rekey_position(p.id.tick, p.id.tick_version, old, p.id.index);
                    }
                }
                let refund = amount.min(self.state.balance_long);
                self.state.balance_long -= refund;
                Ok(refund)
            }
            PendingAction::ClosePosition(p) => {
                // the slice already left the ledger; settle at the last price
                let value = position_value(p.total_expo, p.effective_liq_price, self.state.last_price)?;
                let gross = if value > 0 {
                    (value as u128).min(self.state.balance_long)
                } else {
                    0
                };
                self.state.balance_long -= gross;
                Ok(gross)
            }
        }
    }
}
