use crate::errors::ProtocolError;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// 512-bit unsigned integer made of two 256-bit limbs.
///
/// Used as the liquidation-multiplier accumulator: the tick contribution sums
/// would lose precision under repeated 256-bit division. All operations are
/// bit-exact and deterministic; multiplication is exact, division floors, and
/// anything that does not fit fails hard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HugeUint {
    pub hi: U256,
    pub lo: U256,
}

impl HugeUint {
    pub const ZERO: HugeUint = HugeUint {
        hi: U256::ZERO,
        lo: U256::ZERO,
    };

    pub fn from_u256(lo: U256) -> Self {
        Self {
            hi: U256::ZERO,
            lo,
        }
    }

    pub fn from_u128(lo: u128) -> Self {
        Self::from_u256(U256::from(lo))
    }

    pub fn is_zero(&self) -> bool {
        self.hi.is_zero() && self.lo.is_zero()
    }

    fn to_limbs(self) -> [u64; 8] {
        let lo = self.lo.as_limbs();
        let hi = self.hi.as_limbs();
        [lo[0], lo[1], lo[2], lo[3], hi[0], hi[1], hi[2], hi[3]]
    }

    fn from_limbs(l: [u64; 8]) -> Self {
        Self {
            lo: U256::from_limbs([l[0], l[1], l[2], l[3]]),
            hi: U256::from_limbs([l[4], l[5], l[6], l[7]]),
        }
    }

    /// Addition; fails if the sum exceeds 512 bits.
    pub fn checked_add(self, other: HugeUint) -> Result<HugeUint, ProtocolError> {
        let (lo, carry) = self.lo.overflowing_add(other.lo);
        let (hi, of1) = self.hi.overflowing_add(other.hi);
        let (hi, of2) = if carry {
            hi.overflowing_add(U256::from(1u8))
        } else {
            (hi, false)
        };
        if of1 || of2 {
            return Err(ProtocolError::ArithmeticOverflow);
        }
        Ok(HugeUint { hi, lo })
    }

    /// Subtraction; fails if `other` is greater than `self`.
    pub fn checked_sub(self, other: HugeUint) -> Result<HugeUint, ProtocolError> {
        if self.cmp_parts(&other) == Ordering::Less {
            return Err(ProtocolError::ArithmeticUnderflow);
        }
        let (lo, borrow) = self.lo.overflowing_sub(other.lo);
        let mut hi = self.hi - other.hi;
        if borrow {
            hi -= U256::from(1u8);
        }
        Ok(HugeUint { hi, lo })
    }

    fn cmp_parts(&self, other: &HugeUint) -> Ordering {
        match self.hi.cmp(&other.hi) {
            Ordering::Equal => self.lo.cmp(&other.lo),
            ord => ord,
        }
    }

    /// Full 256x256 -> 512 multiply; never overflows.
    pub fn mul(a: U256, b: U256) -> HugeUint {
        let out = mul_limbs(a.as_limbs(), b.as_limbs());
        Self::from_limbs(out)
    }

    /// 512x256 multiply; fails if the product exceeds 512 bits.
    pub fn checked_mul_u256(self, b: U256) -> Result<HugeUint, ProtocolError> {
        let lo_part = mul_limbs(self.lo.as_limbs(), b.as_limbs());
        let hi_part = mul_limbs(self.hi.as_limbs(), b.as_limbs());
        // hi_part is shifted up by 256 bits; its own upper half must vanish
        if hi_part[4] != 0 || hi_part[5] != 0 || hi_part[6] != 0 || hi_part[7] != 0 {
            return Err(ProtocolError::ArithmeticOverflow);
        }
        let low = HugeUint::from_limbs(lo_part);
        let high = HugeUint {
            hi: U256::from_limbs([hi_part[0], hi_part[1], hi_part[2], hi_part[3]]),
            lo: U256::ZERO,
        };
        low.checked_add(high)
    }

    /// 512 / 256 -> 256 division, flooring; fails on a zero divisor or when the
    /// quotient does not fit in 256 bits.
    pub fn div_u256(self, divisor: U256) -> Result<U256, ProtocolError> {
        self.div(HugeUint::from_u256(divisor))
    }

    /// 512 / 512 -> 256 division, flooring; fails on a zero divisor or when the
    /// quotient does not fit in 256 bits.
    pub fn div(self, divisor: HugeUint) -> Result<U256, ProtocolError> {
        if divisor.is_zero() {
            return Err(ProtocolError::DivisionByZero);
        }
        let (quo, _rem) = div_rem_limbs(self.to_limbs(), divisor.to_limbs());
        if quo[4] != 0 || quo[5] != 0 || quo[6] != 0 || quo[7] != 0 {
            return Err(ProtocolError::QuotientOverflow);
        }
        Ok(U256::from_limbs([quo[0], quo[1], quo[2], quo[3]]))
    }
}

/// Schoolbook 4x4 limb multiply with 128-bit carry accumulation.
fn mul_limbs(a: &[u64; 4], b: &[u64; 4]) -> [u64; 8] {
    let mut out = [0u64; 8];
    for i in 0..4 {
        let mut carry = 0u128;
        for j in 0..4 {
            let cur = out[i + j] as u128 + (a[i] as u128) * (b[j] as u128) + carry;
            out[i + j] = cur as u64;
            carry = cur >> 64;
        }
        out[i + 4] = carry as u64;
    }
    out
}

fn limbs_cmp(a: &[u64; 8], b: &[u64; 8]) -> Ordering {
    for i in (0..8).rev() {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    Ordering::Equal
}

fn limbs_shl1(a: &mut [u64; 8]) {
    for i in (1..8).rev() {
        a[i] = (a[i] << 1) | (a[i - 1] >> 63);
    }
    a[0] <<= 1;
}

fn limbs_sub_in_place(a: &mut [u64; 8], b: &[u64; 8]) {
    let mut borrow = 0u64;
    for i in 0..8 {
        let (v, b1) = a[i].overflowing_sub(b[i]);
        let (v, b2) = v.overflowing_sub(borrow);
        a[i] = v;
        borrow = (b1 as u64) + (b2 as u64);
    }
}

/// Restoring binary long division over 512-bit limb arrays. O(512) steps,
/// bit-exact on every platform; the divisor must be nonzero.
fn div_rem_limbs(num: [u64; 8], div: [u64; 8]) -> ([u64; 8], [u64; 8]) {
    let mut quo = [0u64; 8];
    let mut rem = [0u64; 8];
    // skip the leading zero bits of the numerator
    let top = match (0..8).rev().find(|&i| num[i] != 0) {
        Some(i) => i * 64 + (63 - num[i].leading_zeros() as usize),
        None => return (quo, rem),
    };
    for bit in (0..=top).rev() {
        limbs_shl1(&mut rem);
        rem[0] |= (num[bit / 64] >> (bit % 64)) & 1;
        if limbs_cmp(&rem, &div) != Ordering::Less {
            limbs_sub_in_place(&mut rem, &div);
            quo[bit / 64] |= 1u64 << (bit % 64);
        }
    }
    (quo, rem)
}
