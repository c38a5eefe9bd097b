use crate::bitmap::TickBitmap;
use crate::errors::ProtocolError;
use crate::hugeuint::HugeUint;
use crate::types::*;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Storage key of a (tick, version) bucket.
///
/// Liquidated-and-reused ticks never alias live positions: bumping the version
/// changes the hash, orphaning every entry recorded under the old one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickHash([u8; 32]);

impl fmt::Debug for TickHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TickHash({})", hex::encode(&self.0[..8]))
    }
}

pub fn tick_hash(tick: i32, version: u64) -> TickHash {
    let mut hasher = Sha256::new();
    hasher.update(tick.to_le_bytes());
    hasher.update(version.to_le_bytes());
    TickHash(hasher.finalize().into())
}

/// A populated liquidation-price bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickData {
    pub total_expo: u128,
    /// Penalty pinned when the (tick, version) bucket is first populated
    pub liquidation_penalty_bps: u16,
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Price width of one tick
    pub tick_spacing: u128,
    /// Leverage bounds in `LEVERAGE_SCALE` fixed point
    pub min_leverage: u128,
    pub max_leverage: u128,
    /// Minimum collateral for a long position
    pub min_long_position: u128,
    /// Margin subtracted from a desired liquidation price before tick rounding
    pub safety_margin_bps: u16,
    /// Penalty applied to the nominal tick price
    pub liquidation_penalty_bps: u16,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            tick_spacing: 100,
            min_leverage: LEVERAGE_SCALE + 1,
            max_leverage: 10 * LEVERAGE_SCALE,
            min_long_position: 1_000_000,
            safety_margin_bps: 20,    // 0.2%
            liquidation_penalty_bps: 200, // 2%
        }
    }
}

/// Result of closing (or attempting to close) a position slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The tick version moved on; the position was liquidated long ago
    AlreadyLiquidated,
    Closed {
        amount_closed: u128,
        total_expo_removed: u128,
        effective_tick_price: u128,
        /// Old index of the slot swapped into the closed hole, if any
        moved_from: Option<usize>,
    },
}

/// Result of validating an opened position at its validation price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenValidation {
    AlreadyLiquidated,
    Validated { total_expo: u128 },
}

/// A tick closed out by the liquidation sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidatedTick {
    pub tick: i32,
    pub version: u64,
    pub total_expo: u128,
    pub positions: usize,
    /// Collateral remaining in the bucket at the liquidation price; negative
    /// values are bad debt the vault absorbs
    pub tick_value: i128,
}

/// Value of an exposure at `price` given its effective liquidation price.
/// `expo * (price - effective) / price`, signed.
pub fn position_value(
    total_expo: u128,
    effective_price: u128,
    price: u128,
) -> Result<i128, ProtocolError> {
    if price == 0 {
        return Err(ProtocolError::DivisionByZero);
    }
    let debt = mul_div(total_expo, effective_price, price)?;
    let expo = i128::try_from(total_expo).map_err(|_| ProtocolError::ArithmeticOverflow)?;
    let debt = i128::try_from(debt).map_err(|_| ProtocolError::ArithmeticOverflow)?;
    Ok(expo - debt)
}

/// Price-bucketed position store with per-bucket version counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickLedger {
    config: LedgerConfig,
    ticks: HashMap<TickHash, TickData>,
    versions: HashMap<i32, u64>,
    bitmap: TickBitmap,
    total_expo: u128,
    accumulator: HugeUint,
}

impl TickLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            ticks: HashMap::new(),
            versions: HashMap::new(),
            bitmap: TickBitmap::new(),
            total_expo: 0,
            accumulator: HugeUint::ZERO,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn total_expo(&self) -> u128 {
        self.total_expo
    }

    pub fn accumulator(&self) -> HugeUint {
        self.accumulator
    }

    pub fn tick_version(&self, tick: i32) -> u64 {
        self.versions.get(&tick).copied().unwrap_or(0)
    }

    pub fn tick_price(&self, tick: i32) -> u128 {
        if tick <= 0 {
            return 0;
        }
        tick as u128 * self.config.tick_spacing
    }

    /// Nominal tick price with the bucket's penalty applied.
    pub fn effective_tick_price(&self, tick: i32, penalty_bps: u16) -> u128 {
        let nominal = self.tick_price(tick);
        nominal - bps_of(nominal, penalty_bps)
    }

    /// Penalty currently pinned for a tick: the live bucket's if populated,
    /// the configured one otherwise.
    pub fn tick_penalty(&self, tick: i32) -> u16 {
        self.current_tick_data(tick)
            .map(|d| d.liquidation_penalty_bps)
            .unwrap_or(self.config.liquidation_penalty_bps)
    }

    pub fn highest_populated_tick(&self) -> Option<i32> {
        self.bitmap.highest_set()
    }

    pub fn is_tick_populated(&self, tick: i32) -> bool {
        self.bitmap.is_set(tick)
    }

    /// Live bucket for a tick at its current version.
    pub fn current_tick_data(&self, tick: i32) -> Option<&TickData> {
        self.ticks.get(&tick_hash(tick, self.tick_version(tick)))
    }

    /// Position lookup; a version mismatch means the position was liquidated
    /// and reports as absent, never as stale data.
    pub fn get_position(&self, id: &PositionId) -> Option<&Position> {
        if self.tick_version(id.tick) != id.tick_version {
            return None;
        }
        self.ticks
            .get(&tick_hash(id.tick, id.tick_version))
            .and_then(|d| d.positions.get(id.index))
    }

    fn contribution(total_expo: u128, effective_price: u128) -> HugeUint {
        HugeUint::mul(U256::from(total_expo), U256::from(effective_price))
    }

    /// Exposure-weighted average effective liquidation price over live ticks.
    pub fn average_effective_liq_price(&self) -> Result<u128, ProtocolError> {
        if self.total_expo == 0 {
            return Ok(0);
        }
        let avg = self.accumulator.div_u256(U256::from(self.total_expo))?;
        u128::try_from(avg).map_err(|_| ProtocolError::ArithmeticOverflow)
    }

    /// Round a desired liquidation price down to its placement tick, after the
    /// safety margin.
    pub fn placement_tick(&self, desired_liq_price: u128) -> Result<i32, ProtocolError> {
        let adjusted = desired_liq_price - bps_of(desired_liq_price, self.config.safety_margin_bps);
        if adjusted < self.config.tick_spacing {
            return Err(ProtocolError::InvalidLiquidationPrice {
                liq_price: desired_liq_price,
                current_price: 0,
            });
        }
        let tick = adjusted / self.config.tick_spacing;
        i32::try_from(tick).map_err(|_| ProtocolError::ArithmeticOverflow)
    }

    fn position_expo(
        amount: u128,
        price: u128,
        effective_liq_price: u128,
    ) -> Result<u128, ProtocolError> {
        if effective_liq_price >= price {
            return Err(ProtocolError::InvalidLiquidationPrice {
                liq_price: effective_liq_price,
                current_price: price,
            });
        }
        mul_div(amount, price, price - effective_liq_price)
    }

    /// Placement and sizing a new position would get, without mutating.
    /// Returns `(tick, effective_tick_price, total_expo)`.
    pub fn projected_open(
        &self,
        amount: u128,
        desired_liq_price: u128,
        current_price: u128,
    ) -> Result<(i32, u128, u128), ProtocolError> {
        if amount == 0 {
            return Err(ProtocolError::ZeroAmount);
        }
        if amount < self.config.min_long_position {
            return Err(ProtocolError::PositionTooSmall);
        }
        let tick = self.placement_tick(desired_liq_price)?;
        let penalty = self.tick_penalty(tick);
        let effective = self.effective_tick_price(tick, penalty);
        if effective == 0 || effective >= current_price {
            return Err(ProtocolError::InvalidLiquidationPrice {
                liq_price: effective,
                current_price,
            });
        }
        let total_expo = Self::position_expo(amount, current_price, effective)?;
        let leverage = mul_div(total_expo, LEVERAGE_SCALE, amount)?;
        if leverage < self.config.min_leverage {
            return Err(ProtocolError::LeverageTooLow(leverage));
        }
        if leverage > self.config.max_leverage {
            return Err(ProtocolError::LeverageTooHigh(leverage));
        }
        Ok((tick, effective, total_expo))
    }

    /// Record a new (unvalidated) position. Returns its id and the effective
    /// liquidation price of the bucket it landed in.
    pub fn open_position(
        &mut self,
        user: Address,
        amount: u128,
        desired_liq_price: u128,
        current_price: u128,
        timestamp: u64,
    ) -> Result<(PositionId, u128), ProtocolError> {
        let (tick, effective, total_expo) =
            self.projected_open(amount, desired_liq_price, current_price)?;
        let penalty = self.tick_penalty(tick);
        let version = self.tick_version(tick);
        let hash = tick_hash(tick, version);
        let data = self.ticks.entry(hash).or_insert_with(|| TickData {
            total_expo: 0,
            liquidation_penalty_bps: penalty,
            positions: Vec::new(),
        });
        data.positions.push(Position {
            user,
            amount,
            total_expo,
            start_price: Price(current_price),
            timestamp,
            validated: false,
        });
        let index = data.positions.len() - 1;
        data.total_expo += total_expo;
        self.bitmap.set(tick);
        self.total_expo += total_expo;
        self.accumulator = self
            .accumulator
            .checked_add(Self::contribution(total_expo, effective))?;

        Ok((
            PositionId {
                tick,
                tick_version: version,
                index,
            },
            effective,
        ))
    }

    /// Re-price a position at its validation price and mark it validated.
    /// Exposure is immutable afterwards (partial closes only shrink it).
    pub fn validate_open(
        &mut self,
        id: &PositionId,
        validation_price: u128,
    ) -> Result<OpenValidation, ProtocolError> {
        if self.tick_version(id.tick) != id.tick_version {
            return Ok(OpenValidation::AlreadyLiquidated);
        }
        let hash = tick_hash(id.tick, id.tick_version);
        let penalty = self
            .ticks
            .get(&hash)
            .ok_or(ProtocolError::PositionNotFound)?
            .liquidation_penalty_bps;
        let effective = self.effective_tick_price(id.tick, penalty);

        let data = self.ticks.get_mut(&hash).ok_or(ProtocolError::PositionNotFound)?;
        let pos = data
            .positions
            .get(id.index)
            .ok_or(ProtocolError::PositionNotFound)?;
        if pos.validated {
            return Err(ProtocolError::AlreadyValidated);
        }
        let old_expo = pos.total_expo;
        let amount = pos.amount;
        let new_expo = Self::position_expo(amount, validation_price, effective)?;
        let leverage = mul_div(new_expo, LEVERAGE_SCALE, amount)?;
        if leverage < self.config.min_leverage {
            return Err(ProtocolError::LeverageTooLow(leverage));
        }
        if leverage > self.config.max_leverage {
            return Err(ProtocolError::LeverageTooHigh(leverage));
        }

        let pos = &mut data.positions[id.index];
        pos.total_expo = new_expo;
        pos.start_price = Price(validation_price);
        pos.validated = true;
        data.total_expo = data.total_expo - old_expo + new_expo;
        self.total_expo = self.total_expo - old_expo + new_expo;
        self.accumulator = self
            .accumulator
            .checked_sub(Self::contribution(old_expo, effective))?
            .checked_add(Self::contribution(new_expo, effective))?;

        Ok(OpenValidation::Validated {
            total_expo: new_expo,
        })
    }

    /// Remove or shrink a position slot. Full closes swap the slot with the
    /// bucket's last element; emptied buckets bump the version so stale ids
    /// can never alias a recreated bucket.
    pub fn close_position(
        &mut self,
        id: &PositionId,
        amount_to_close: u128,
    ) -> Result<CloseOutcome, ProtocolError> {
        if self.tick_version(id.tick) != id.tick_version {
            return Ok(CloseOutcome::AlreadyLiquidated);
        }
        if amount_to_close == 0 {
            return Err(ProtocolError::ZeroAmount);
        }
        let hash = tick_hash(id.tick, id.tick_version);
        let data = self.ticks.get_mut(&hash).ok_or(ProtocolError::PositionNotFound)?;
        let effective = {
            let nominal = if id.tick <= 0 {
                0
            } else {
                id.tick as u128 * self.config.tick_spacing
            };
            nominal - bps_of(nominal, data.liquidation_penalty_bps)
        };
        let pos = data
            .positions
            .get(id.index)
            .ok_or(ProtocolError::PositionNotFound)?;
        if amount_to_close > pos.amount {
            return Err(ProtocolError::CloseAmountTooLarge);
        }
        let remaining = pos.amount - amount_to_close;
        if remaining > 0 && remaining < self.config.min_long_position {
            return Err(ProtocolError::PositionTooSmall);
        }
        let expo_removed = mul_div(pos.total_expo, amount_to_close, pos.amount)?;

        let mut moved_from = None;
        if remaining == 0 {
            let last = data.positions.len() - 1;
            if id.index != last {
                moved_from = Some(last);
            }
            data.positions.swap_remove(id.index);
        } else {
            let pos = &mut data.positions[id.index];
            pos.amount = remaining;
            pos.total_expo -= expo_removed;
        }
        data.total_expo -= expo_removed;

        if data.positions.is_empty() {
            self.ticks.remove(&hash);
            self.bitmap.clear(id.tick);
            *self.versions.entry(id.tick).or_insert(0) += 1;
        }
        self.total_expo -= expo_removed;
        self.accumulator = self
            .accumulator
            .checked_sub(Self::contribution(expo_removed, effective))?;

        Ok(CloseOutcome::Closed {
            amount_closed: amount_to_close,
            total_expo_removed: expo_removed,
            effective_tick_price: effective,
            moved_from,
        })
    }

    /// Close out a whole bucket: bump its version (O(1) invalidation of every
    /// residual slot), clear the bitmap bit, and unwind the global totals.
    pub fn liquidate_tick(
        &mut self,
        tick: i32,
        current_price: u128,
    ) -> Result<LiquidatedTick, ProtocolError> {
        let version = self.tick_version(tick);
        let hash = tick_hash(tick, version);
        let data = self.ticks.remove(&hash).ok_or(ProtocolError::PositionNotFound)?;
        let effective = self.effective_tick_price(tick, data.liquidation_penalty_bps);
        let tick_value = position_value(data.total_expo, effective, current_price)?;

        self.bitmap.clear(tick);
        *self.versions.entry(tick).or_insert(0) += 1;
        self.total_expo -= data.total_expo;
        self.accumulator = self
            .accumulator
            .checked_sub(Self::contribution(data.total_expo, effective))?;

        Ok(LiquidatedTick {
            tick,
            version,
            total_expo: data.total_expo,
            positions: data.positions.len(),
            tick_value,
        })
    }

    /// From-scratch recomputation over surviving ticks, for audits and tests.
    /// Incremental maintenance must agree with this within rounding.
    pub fn rebuild_accumulator(&self) -> Result<HugeUint, ProtocolError> {
        let mut acc = HugeUint::ZERO;
        for tick in self.populated_ticks() {
            if let Some(data) = self.current_tick_data(tick) {
                let effective = self.effective_tick_price(tick, data.liquidation_penalty_bps);
                acc = acc.checked_add(Self::contribution(data.total_expo, effective))?;
            }
        }
        Ok(acc)
    }

    /// Ascending list of populated ticks.
    pub fn populated_ticks(&self) -> Vec<i32> {
        let mut ticks: Vec<i32> = Vec::new();
        let mut cursor = self.bitmap.highest_set();
        while let Some(tick) = cursor {
            ticks.push(tick);
            cursor = if tick == i32::MIN {
                None
            } else {
                self.bitmap.highest_set_at_or_below(tick - 1)
            };
        }
        ticks.reverse();
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LedgerConfig {
        LedgerConfig {
            tick_spacing: 100,
            min_leverage: LEVERAGE_SCALE + 1,
            max_leverage: 10 * LEVERAGE_SCALE,
            min_long_position: 1_000,
            safety_margin_bps: 0,
            liquidation_penalty_bps: 0,
        }
    }

    fn eth(n: u128) -> u128 {
        n * 1_000_000_000_000_000_000
    }

    #[test]
    fn test_tick_hash_distinct_versions() {
        assert_ne!(tick_hash(10, 0), tick_hash(10, 1));
        assert_ne!(tick_hash(10, 0), tick_hash(11, 0));
        assert_eq!(tick_hash(-3, 7), tick_hash(-3, 7));
    }

    #[test]
    fn test_open_places_expected_tick() {
        let mut ledger = TickLedger::new(test_config());
        let (id, effective) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        assert_eq!(id.tick, 10);
        assert_eq!(id.tick_version, 0);
        assert_eq!(effective, 1_000);
        // expo = 2 * 2000 / (2000 - 1000) = 4
        assert_eq!(ledger.total_expo(), eth(4));
    }

    #[test]
    fn test_open_rounds_down_to_tick() {
        let mut ledger = TickLedger::new(test_config());
        let (id, effective) = ledger
            .open_position(Address::ZERO, eth(2), 1_099, 2_000, 0)
            .unwrap();
        assert_eq!(id.tick, 10);
        assert_eq!(effective, 1_000);
    }

    #[test]
    fn test_open_rejects_zero_and_dust() {
        let mut ledger = TickLedger::new(test_config());
        assert_eq!(
            ledger.open_position(Address::ZERO, 0, 1_000, 2_000, 0),
            Err(ProtocolError::ZeroAmount)
        );
        assert_eq!(
            ledger.open_position(Address::ZERO, 999, 1_000, 2_000, 0),
            Err(ProtocolError::PositionTooSmall)
        );
    }

    #[test]
    fn test_open_rejects_leverage_out_of_bounds() {
        let mut ledger = TickLedger::new(test_config());
        // liq at 1900 with price 2000 -> 20x leverage
        let res = ledger.open_position(Address::ZERO, eth(1), 1_900, 2_000, 0);
        assert!(matches!(res, Err(ProtocolError::LeverageTooHigh(_))));
    }

    #[test]
    fn test_open_rejects_liq_above_price() {
        let mut ledger = TickLedger::new(test_config());
        let res = ledger.open_position(Address::ZERO, eth(1), 2_500, 2_000, 0);
        assert!(matches!(
            res,
            Err(ProtocolError::InvalidLiquidationPrice { .. })
        ));
    }

    #[test]
    fn test_safety_margin_shifts_tick_down() {
        let mut ledger = TickLedger::new(LedgerConfig {
            safety_margin_bps: 1_000, // 10%
            ..test_config()
        });
        // 1000 - 10% = 900 -> tick 9
        let (id, _) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        assert_eq!(id.tick, 9);
    }

    #[test]
    fn test_penalty_lowers_effective_price() {
        let mut ledger = TickLedger::new(LedgerConfig {
            liquidation_penalty_bps: 200, // 2%
            ..test_config()
        });
        let (_, effective) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        assert_eq!(effective, 980);
    }

    #[test]
    fn test_close_full_position() {
        let mut ledger = TickLedger::new(test_config());
        let (id, _) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        let outcome = ledger.close_position(&id, eth(2)).unwrap();
        match outcome {
            CloseOutcome::Closed {
                amount_closed,
                total_expo_removed,
                ..
            } => {
                assert_eq!(amount_closed, eth(2));
                assert_eq!(total_expo_removed, eth(4));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(ledger.total_expo(), 0);
        assert!(ledger.accumulator().is_zero());
        assert!(!ledger.is_tick_populated(10));
        // emptied buckets bump the version
        assert_eq!(ledger.tick_version(10), 1);
    }

    #[test]
    fn test_close_partial_position() {
        let mut ledger = TickLedger::new(test_config());
        let (id, _) = ledger
            .open_position(Address::ZERO, eth(4), 1_000, 2_000, 0)
            .unwrap();
        let outcome = ledger.close_position(&id, eth(1)).unwrap();
        match outcome {
            CloseOutcome::Closed {
                total_expo_removed, ..
            } => assert_eq!(total_expo_removed, eth(2)),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let pos = ledger.get_position(&id).unwrap();
        assert_eq!(pos.amount, eth(3));
        assert_eq!(pos.total_expo, eth(6));
        assert!(ledger.is_tick_populated(10));
    }

    #[test]
    fn test_close_swap_removes_and_reports_move() {
        let mut ledger = TickLedger::new(test_config());
        let user_a = Address::from([1u8; 20]);
        let user_b = Address::from([2u8; 20]);
        let (id_a, _) = ledger
            .open_position(user_a, eth(2), 1_000, 2_000, 0)
            .unwrap();
        let (id_b, _) = ledger
            .open_position(user_b, eth(2), 1_000, 2_000, 0)
            .unwrap();
        let outcome = ledger.close_position(&id_a, eth(2)).unwrap();
        match outcome {
            CloseOutcome::Closed { moved_from, .. } => assert_eq!(moved_from, Some(id_b.index)),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // b now lives at a's old slot
        let moved = PositionId {
            index: id_a.index,
            ..id_b
        };
        assert_eq!(ledger.get_position(&moved).unwrap().user, user_b);
    }

    #[test]
    fn test_close_amount_too_large() {
        let mut ledger = TickLedger::new(test_config());
        let (id, _) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        assert_eq!(
            ledger.close_position(&id, eth(3)),
            Err(ProtocolError::CloseAmountTooLarge)
        );
    }

    #[test]
    fn test_partial_close_cannot_leave_dust() {
        let mut ledger = TickLedger::new(test_config());
        let (id, _) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        let res = ledger.close_position(&id, eth(2) - 1);
        assert_eq!(res, Err(ProtocolError::PositionTooSmall));
    }

    #[test]
    fn test_liquidate_tick_invalidates_positions() {
        let mut ledger = TickLedger::new(test_config());
        let (id, _) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        let liq = ledger.liquidate_tick(10, 990).unwrap();
        assert_eq!(liq.version, 0);
        assert_eq!(liq.positions, 1);
        assert_eq!(liq.total_expo, eth(4));
        assert_eq!(ledger.tick_version(10), 1);
        assert!(ledger.get_position(&id).is_none());
        assert_eq!(ledger.close_position(&id, eth(2)).unwrap(), CloseOutcome::AlreadyLiquidated);
        assert_eq!(ledger.total_expo(), 0);
        assert!(ledger.accumulator().is_zero());
    }

    #[test]
    fn test_liquidated_tick_value_sign() {
        let mut ledger = TickLedger::new(LedgerConfig {
            liquidation_penalty_bps: 200,
            ..test_config()
        });
        ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        // between the effective price (980) and the nominal tick price: the
        // penalty margin is recovered as positive collateral
        let liq = ledger.liquidate_tick(10, 990).unwrap();
        assert!(liq.tick_value > 0);

        ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        // gapped far below: bad debt
        let liq = ledger.liquidate_tick(10, 500).unwrap();
        assert!(liq.tick_value < 0);
    }

    #[test]
    fn test_validate_open_reprices() {
        let mut ledger = TickLedger::new(test_config());
        let (id, _) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        // validation price moved up: lower leverage, smaller expo
        let outcome = ledger.validate_open(&id, 2_500).unwrap();
        match outcome {
            OpenValidation::Validated { total_expo } => {
                // 2 * 2500 / 1500 = 3.333...
                assert_eq!(total_expo, eth(2) * 2_500 / 1_500);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let pos = ledger.get_position(&id).unwrap();
        assert!(pos.validated);
        assert_eq!(pos.start_price, Price(2_500));
        assert_eq!(ledger.total_expo(), eth(2) * 2_500 / 1_500);
    }

    #[test]
    fn test_validate_open_after_liquidation() {
        let mut ledger = TickLedger::new(test_config());
        let (id, _) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        ledger.liquidate_tick(10, 990).unwrap();
        assert_eq!(
            ledger.validate_open(&id, 2_000).unwrap(),
            OpenValidation::AlreadyLiquidated
        );
    }

    #[test]
    fn test_validate_open_twice_fails() {
        let mut ledger = TickLedger::new(test_config());
        let (id, _) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        ledger.validate_open(&id, 2_000).unwrap();
        assert_eq!(
            ledger.validate_open(&id, 2_000),
            Err(ProtocolError::AlreadyValidated)
        );
    }

    #[test]
    fn test_accumulator_matches_rebuild() {
        let mut ledger = TickLedger::new(test_config());
        let (id1, _) = ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        ledger
            .open_position(Address::ZERO, eth(3), 1_500, 2_000, 0)
            .unwrap();
        ledger
            .open_position(Address::ZERO, eth(1), 500, 2_000, 0)
            .unwrap();
        ledger.close_position(&id1, eth(2)).unwrap();
        ledger.liquidate_tick(15, 1_400).unwrap();
        assert_eq!(ledger.accumulator(), ledger.rebuild_accumulator().unwrap());
    }

    #[test]
    fn test_average_effective_liq_price() {
        let mut ledger = TickLedger::new(test_config());
        ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        // single tick: average is the tick's effective price
        assert_eq!(ledger.average_effective_liq_price().unwrap(), 1_000);
    }

    #[test]
    fn test_populated_ticks_ascending() {
        let mut ledger = TickLedger::new(test_config());
        ledger
            .open_position(Address::ZERO, eth(1), 1_500, 2_000, 0)
            .unwrap();
        ledger
            .open_position(Address::ZERO, eth(2), 1_000, 2_000, 0)
            .unwrap();
        ledger
            .open_position(Address::ZERO, eth(1), 500, 2_000, 0)
            .unwrap();
        assert_eq!(ledger.populated_ticks(), vec![5, 10, 15]);
    }
}
