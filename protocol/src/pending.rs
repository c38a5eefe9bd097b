use crate::errors::ProtocolError;
use crate::types::{PositionId, Price, ProtocolAction};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Vault deposit awaiting its validation price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDeposit {
    pub validator: Address,
    pub amount: u128,
    pub timestamp: u64,
    pub security_deposit: u128,
}

/// Vault withdrawal awaiting its validation price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWithdrawal {
    pub validator: Address,
    pub shares: u128,
    pub timestamp: u64,
    pub security_deposit: u128,
}

/// Position opened at the initiate price, awaiting repricing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOpen {
    pub validator: Address,
    pub id: PositionId,
    pub timestamp: u64,
    pub security_deposit: u128,
}

/// Position slice already carved out of its tick, awaiting settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingClose {
    pub validator: Address,
    pub amount: u128,
    pub total_expo: u128,
    /// Effective liquidation price of the source tick at initiate time
    pub effective_liq_price: u128,
    pub start_price: Price,
    pub timestamp: u64,
    pub security_deposit: u128,
}

/// One entry in the pending queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingAction {
    Deposit(PendingDeposit),
    Withdrawal(PendingWithdrawal),
    OpenPosition(PendingOpen),
    ClosePosition(PendingClose),
}

impl PendingAction {
    pub fn validator(&self) -> Address {
        match self {
            PendingAction::Deposit(p) => p.validator,
            PendingAction::Withdrawal(p) => p.validator,
            PendingAction::OpenPosition(p) => p.validator,
            PendingAction::ClosePosition(p) => p.validator,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            PendingAction::Deposit(p) => p.timestamp,
            PendingAction::Withdrawal(p) => p.timestamp,
            PendingAction::OpenPosition(p) => p.timestamp,
            PendingAction::ClosePosition(p) => p.timestamp,
        }
    }

    pub fn security_deposit(&self) -> u128 {
        match self {
            PendingAction::Deposit(p) => p.security_deposit,
            PendingAction::Withdrawal(p) => p.security_deposit,
            PendingAction::OpenPosition(p) => p.security_deposit,
            PendingAction::ClosePosition(p) => p.security_deposit,
        }
    }

    /// Oracle action kind used when settling this entry
    pub fn validate_action(&self) -> ProtocolAction {
        match self {
            PendingAction::Deposit(_) => ProtocolAction::ValidateDeposit,
            PendingAction::Withdrawal(_) => ProtocolAction::ValidateWithdrawal,
            PendingAction::OpenPosition(_) => ProtocolAction::ValidateOpenPosition,
            PendingAction::ClosePosition(_) => ProtocolAction::ValidateClosePosition,
        }
    }
}

/// FIFO queue of in-flight actions with O(1) lookup by validator.
///
/// Entries live in a map keyed by a monotonically increasing logical index;
/// `front..back` brackets the live range and removed entries become holes that
/// iteration skips. One pending action per validator at a time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingQueue {
    items: HashMap<u128, PendingAction>,
    front: u128,
    back: u128,
    by_validator: HashMap<Address, u128>,
    max_len: usize,
}

impl PendingQueue {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a push for `validator` would be accepted, without mutating.
    /// Callers use this to fail before touching any other state.
    pub fn can_push(
        &self,
        validator: &Address,
        now: u64,
        stale_after: u64,
    ) -> Result<(), ProtocolError> {
        if self.by_validator.contains_key(validator) {
            return Err(ProtocolError::AlreadyPending);
        }
        if self.items.len() >= self.max_len {
            match self.front_entry() {
                Some((_, head)) if head.timestamp().saturating_add(stale_after) <= now => Ok(()),
                _ => Err(ProtocolError::QueueFull),
            }
        } else {
            Ok(())
        }
    }

    pub fn get(&self, key: u128) -> Option<&PendingAction> {
        self.items.get(&key)
    }

    /// Append an action. If the queue is full and its oldest entry has been
    /// sitting past `stale_after`, that entry is evicted and returned so the
    /// caller can claim its deposit; otherwise a full queue rejects the push.
    pub fn push(
        &mut self,
        action: PendingAction,
        now: u64,
        stale_after: u64,
    ) -> Result<(u128, Option<PendingAction>), ProtocolError> {
        if self.by_validator.contains_key(&action.validator()) {
            return Err(ProtocolError::AlreadyPending);
        }
        let mut evicted = None;
        if self.items.len() >= self.max_len {
            match self.front_entry() {
                Some((key, head)) if head.timestamp().saturating_add(stale_after) <= now => {
                    evicted = self.remove(key);
                }
                _ => return Err(ProtocolError::QueueFull),
            }
        }
        let key = self.back;
        self.back += 1;
        self.by_validator.insert(action.validator(), key);
        self.items.insert(key, action);
        Ok((key, evicted))
    }

    /// Remove by logical key, leaving a hole.
    pub fn remove(&mut self, key: u128) -> Option<PendingAction> {
        let action = self.items.remove(&key)?;
        self.by_validator.remove(&action.validator());
        self.advance_front();
        Some(action)
    }

    /// Remove the pending action owned by `validator`.
    pub fn take_validator(&mut self, validator: &Address) -> Result<PendingAction, ProtocolError> {
        let key = *self
            .by_validator
            .get(validator)
            .ok_or(ProtocolError::NoPendingAction)?;
        self.remove(key).ok_or(ProtocolError::NoPendingAction)
    }

    pub fn get_validator(&self, validator: &Address) -> Option<&PendingAction> {
        self.by_validator
            .get(validator)
            .and_then(|key| self.items.get(key))
    }

    /// Oldest live entry.
    pub fn front_entry(&self) -> Option<(u128, &PendingAction)> {
        let mut key = self.front;
        while key < self.back {
            if let Some(action) = self.items.get(&key) {
                return Some((key, action));
            }
            key += 1;
        }
        None
    }

    fn advance_front(&mut self) {
        while self.front < self.back && !self.items.contains_key(&self.front) {
            self.front += 1;
        }
    }

    /// Keys of entries a third party may settle, oldest first. An entry opens
    /// up to others once its validator has let `deadline` pass. Scanning stops
    /// at the first entry still inside its window (FIFO: nothing behind it can
    /// be older), skipping only entries owned by `exclude`.
    pub fn actionable(&self, exclude: &Address, now: u64, deadline: u64, max: usize) -> Vec<u128> {
        let mut out = Vec::new();
        let mut key = self.front;
        while key < self.back && out.len() < max {
            if let Some(action) = self.items.get(&key) {
                if action.validator() == *exclude {
                    key += 1;
                    continue;
                }
                if action.timestamp().saturating_add(deadline) <= now {
                    out.push(key);
                } else {
                    break;
                }
            }
            key += 1;
        }
        out
    }

    /// Fix up stored position ids after a swap-remove moved a slot inside a
    /// tick bucket.
    pub fn rekey_position(&mut self, tick: i32, tick_version: u64, old_index: usize, new_index: usize) {
        for action in self.items.values_mut() {
            if let PendingAction::OpenPosition(p) = action {
                if p.id.tick == tick && p.id.tick_version == tick_version && p.id.index == old_index
                {
                    p.id.index = new_index;
                }
            }
        }
    }
}
