use crate::errors::ProtocolError;
use crate::types::mul_div;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Share-denominated rebasing token the vault side is settled in.
///
/// Balances are stored as shares; the nominal amount is `shares / divisor`,
/// and rebasing moves the divisor, never individual balances.
pub trait RebaseToken {
    fn total_shares(&self) -> u128;
    fn divisor(&self) -> u128;
    fn shares_of(&self, owner: &Address) -> u128;
    fn mint_shares(&mut self, owner: Address, shares: u128) -> Result<(), ProtocolError>;
    fn burn_shares(&mut self, owner: &Address, shares: u128) -> Result<(), ProtocolError>;

    fn nominal_of(&self, owner: &Address) -> u128 {
        self.shares_of(owner) / self.divisor().max(1)
    }
}

/// In-memory token with an adjustable divisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintableToken {
    shares: HashMap<Address, u128>,
    total_shares: u128,
    divisor: u128,
}

impl Default for MintableToken {
    fn default() -> Self {
        Self {
            shares: HashMap::new(),
            total_shares: 0,
            divisor: 1,
        }
    }
}

impl MintableToken {
    pub fn new(divisor: u128) -> Self {
        Self {
            divisor: divisor.max(1),
            ..Default::default()
        }
    }

    pub fn rebase(&mut self, divisor: u128) {
        self.divisor = divisor.max(1);
    }
}

impl RebaseToken for MintableToken {
    fn total_shares(&self) -> u128 {
        self.total_shares
    }

    fn divisor(&self) -> u128 {
        self.divisor
    }

    fn shares_of(&self, owner: &Address) -> u128 {
        self.shares.get(owner).copied().unwrap_or(0)
    }

    fn mint_shares(&mut self, owner: Address, shares: u128) -> Result<(), ProtocolError> {
        self.total_shares = self
            .total_shares
            .checked_add(shares)
            .ok_or(ProtocolError::ArithmeticOverflow)?;
        *self.shares.entry(owner).or_insert(0) += shares;
        Ok(())
    }

    fn burn_shares(&mut self, owner: &Address, shares: u128) -> Result<(), ProtocolError> {
        let held = self.shares.get_mut(owner).ok_or(ProtocolError::InsufficientShares)?;
        if *held < shares {
            return Err(ProtocolError::InsufficientShares);
        }
        *held -= shares;
        if *held == 0 {
            self.shares.remove(owner);
        }
        self.total_shares -= shares;
        Ok(())
    }
}

/// Shares minted for a vault deposit: proportional to the existing pool, 1:1
/// on the first deposit.
pub fn shares_for_deposit(
    amount: u128,
    balance_vault: u128,
    total_shares: u128,
) -> Result<u128, ProtocolError> {
    if total_shares == 0 || balance_vault == 0 {
        return Ok(amount);
    }
    mul_div(amount, total_shares, balance_vault)
}

/// Assets redeemed for burning `shares` against the vault balance.
pub fn assets_for_shares(
    shares: u128,
    balance_vault: u128,
    total_shares: u128,
) -> Result<u128, ProtocolError> {
    if total_shares == 0 {
        return Ok(0);
    }
    mul_div(shares, balance_vault, total_shares)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[test]
    fn test_first_deposit_is_one_to_one() {
        assert_eq!(shares_for_deposit(1_000, 0, 0).unwrap(), 1_000);
        assert_eq!(shares_for_deposit(1_000, 500, 0).unwrap(), 1_000);
    }

    #[test]
    fn test_shares_proportional_to_pool() {
        // pool grew from 1000 to 2000: a 1000 deposit mints half the shares
        assert_eq!(shares_for_deposit(1_000, 2_000, 1_000).unwrap(), 500);
    }

    #[test]
    fn test_redeem_round_trip_never_gains() {
        let (vault, total) = (3_333u128, 1_000u128);
        let minted = shares_for_deposit(100, vault, total).unwrap();
        let redeemed = assets_for_shares(minted, vault + 100, total + minted).unwrap();
        assert!(redeemed <= 100);
    }

    #[test]
    fn test_mint_and_burn() {
        let mut token = MintableToken::new(1);
        token.mint_shares(addr(1), 500).unwrap();
        token.mint_shares(addr(2), 300).unwrap();
        assert_eq!(token.total_shares(), 800);
        assert_eq!(token.shares_of(&addr(1)), 500);
        token.burn_shares(&addr(1), 200).unwrap();
        assert_eq!(token.shares_of(&addr(1)), 300);
        assert_eq!(token.total_shares(), 600);
    }

    #[test]
    fn test_burn_more_than_held_fails() {
        let mut token = MintableToken::new(1);
        token.mint_shares(addr(1), 100).unwrap();
        assert_eq!(
            token.burn_shares(&addr(1), 101),
            Err(ProtocolError::InsufficientShares)
        );
        assert_eq!(
            token.burn_shares(&addr(2), 1),
            Err(ProtocolError::InsufficientShares)
        );
    }

    #[test]
    fn test_divisor_scales_nominal() {
        let mut token = MintableToken::new(1);
        token.mint_shares(addr(1), 1_000).unwrap();
        assert_eq!(token.nominal_of(&addr(1)), 1_000);
        token.rebase(4);
        assert_eq!(token.nominal_of(&addr(1)), 250);
    }
}
