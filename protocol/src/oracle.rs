use crate::errors::ProtocolError;
use crate::types::ProtocolAction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One attested price observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceInfo {
    pub price: u128,
    /// Price without confidence-interval adjustment
    pub neutral_price: u128,
    pub timestamp: u64,
}

/// Price attestation consumed as a black box.
///
/// Initiate-type actions want the freshest price available; validate-type
/// actions want the first price at or after the target timestamp, so a
/// validator cannot pick a favorable one.
pub trait OracleAdapter {
    fn get_price(
        &self,
        action: ProtocolAction,
        target_timestamp: u64,
        payload: &[u8],
        fee: u128,
    ) -> Result<PriceInfo, ProtocolError>;

    /// Fee required for a given attestation payload and action.
    fn cost(&self, payload: &[u8], action: ProtocolAction) -> u128;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct FeedEntry {
    price: u128,
    neutral_price: u128,
}

/// Push-fed oracle over a sorted observation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedOracle {
    entries: BTreeMap<u64, FeedEntry>,
    /// Oldest acceptable observation age for initiate-type queries
    pub max_price_age: u64,
    pub fee: u128,
}

impl FeedOracle {
    pub fn new(max_price_age: u64, fee: u128) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_price_age,
            fee,
        }
    }

    pub fn push(&mut self, timestamp: u64, price: u128, neutral_price: u128) {
        self.entries.insert(
            timestamp,
            FeedEntry {
                price,
                neutral_price,
            },
        );
    }

    fn is_validate(action: ProtocolAction) -> bool {
        matches!(
            action,
            ProtocolAction::ValidateDeposit
                | ProtocolAction::ValidateWithdrawal
                | ProtocolAction::ValidateOpenPosition
                | ProtocolAction::ValidateClosePosition
        )
    }
}

impl OracleAdapter for FeedOracle {
    fn get_price(
        &self,
        action: ProtocolAction,
        target_timestamp: u64,
        _payload: &[u8],
        fee: u128,
    ) -> Result<PriceInfo, ProtocolError> {
        if fee < self.fee {
            return Err(ProtocolError::InsufficientFee {
                needed: self.fee,
                provided: fee,
            });
        }
        if Self::is_validate(action) {
            // first observation at or after the target
            let (&timestamp, entry) = self
                .entries
                .range(target_timestamp..)
                .next()
                .ok_or_else(|| {
                    ProtocolError::OracleFailure(format!(
                        "no observation at or after {target_timestamp}"
                    ))
                })?;
            Ok(PriceInfo {
                price: entry.price,
                neutral_price: entry.neutral_price,
                timestamp,
            })
        } else {
            // freshest observation no older than max_price_age
            let (&timestamp, entry) = self
                .entries
                .range(..=target_timestamp)
                .next_back()
                .ok_or_else(|| {
                    ProtocolError::OracleFailure(format!(
                        "no observation at or before {target_timestamp}"
                    ))
                })?;
            if target_timestamp - timestamp > self.max_price_age {
                return Err(ProtocolError::PriceTimestampInvalid {
                    provided: timestamp,
                    target: target_timestamp,
                });
            }
            Ok(PriceInfo {
                price: entry.price,
                neutral_price: entry.neutral_price,
                timestamp,
            })
        }
    }

    fn cost(&self, _payload: &[u8], _action: ProtocolAction) -> u128 {
        self.fee
    }
}
