//! Stateful constant product pair built on the pure formulas in [`crate::math`]

use crate::math::{liquidity_for_deposit, quote_swap, share_of_reserves, spot_price};
use crate::{AmmError, MINIMUM_LIQUIDITY, QuoteResult};

/// Two-token pool. "A" and "B" are positional; callers map them to real tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub reserve_a: u128,
    pub reserve_b: u128,
    /// Outstanding LP units, including the locked minimum
    pub total_supply: u128,
    pub fee_bps: u128,
}

impl Pair {
    pub fn new(fee_bps: u128) -> Self {
        Self {
            reserve_a: 0,
            reserve_b: 0,
            total_supply: 0,
            fee_bps,
        }
    }

    pub fn reserves(&self) -> (u128, u128) {
        (self.reserve_a, self.reserve_b)
    }

    /// Price of A in B, scaled by `SCALE`
    pub fn price(&self) -> Result<u128, AmmError> {
        spot_price(self.reserve_a, self.reserve_b)
    }

    /// Quote without mutating
    pub fn preview(&self, a_in: bool, amount_in: u128) -> Result<QuoteResult, AmmError> {
        if a_in {
            quote_swap(amount_in, self.reserve_a, self.reserve_b, self.fee_bps)
        } else {
            quote_swap(amount_in, self.reserve_b, self.reserve_a, self.fee_bps)
        }
    }

    /// Swap an exact input; `a_in` selects the direction
    pub fn swap(&mut self, a_in: bool, amount_in: u128, min_out: u128) -> Result<QuoteResult, AmmError> {
        let q = self.preview(a_in, amount_in)?;
        if q.amount_out < min_out {
            return Err(AmmError::InsufficientOutput);
        }
        if a_in {
            self.reserve_a = q.new_reserve_in;
            self.reserve_b = q.new_reserve_out;
        } else {
            self.reserve_b = q.new_reserve_in;
            self.reserve_a = q.new_reserve_out;
        }
        Ok(q)
    }

    /// Deposit both tokens and return the LP units credited to the depositor.
    ///
    /// The whole deposit enters the reserves; any excess over the pool ratio is
    /// a donation to existing LPs.
    pub fn mint(&mut self, amount_a: u128, amount_b: u128) -> Result<u128, AmmError> {
        let first = self.total_supply == 0;
        let minted = liquidity_for_deposit(
            amount_a,
            amount_b,
            self.reserve_a,
            self.reserve_b,
            self.total_supply,
        )?;
        let new_a = self.reserve_a.checked_add(amount_a).ok_or(AmmError::Overflow)?;
        let new_b = self.reserve_b.checked_add(amount_b).ok_or(AmmError::Overflow)?;
        let locked = if first { MINIMUM_LIQUIDITY } else { 0 };
        let new_supply = self
            .total_supply
            .checked_add(minted)
            .and_then(|s| s.checked_add(locked))
            .ok_or(AmmError::Overflow)?;

        self.reserve_a = new_a;
        self.reserve_b = new_b;
        self.total_supply = new_supply;
        Ok(minted)
    }

    /// Preview of the underlying owed to `lp_amount`
    pub fn underlying(&self, lp_amount: u128) -> Result<(u128, u128), AmmError> {
        if lp_amount == 0 {
            return Ok((0, 0));
        }
        share_of_reserves(lp_amount, self.reserve_a, self.reserve_b, self.total_supply)
    }

    /// Burn LP units for the underlying tokens, enforcing minimum outputs
    pub fn burn(&mut self, lp_amount: u128, min_a: u128, min_b: u128) -> Result<(u128, u128), AmmError> {
        if lp_amount == 0 {
            return Err(AmmError::InvalidAmount);
        }
        let (a, b) = self.underlying(lp_amount)?;
        if a < min_a || b < min_b {
            return Err(AmmError::InsufficientOutput);
        }
        self.reserve_a -= a;
        self.reserve_b -= b;
        self.total_supply -= lp_amount;
        Ok((a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SCALE;

    fn seeded() -> Pair {
        let mut p = Pair::new(30);
        p.mint(1_000_000_000, 2_000_000_000_000).unwrap();
        p
    }

    #[test]
    fn test_seed_price() {
        let p = seeded();
        assert_eq!(p.price().unwrap(), 2_000 * SCALE);
        assert_eq!(p.total_supply, 44_721_359_549);
    }

    #[test]
    fn test_mint_burn_returns_deposit() {
        let mut p = seeded();
        let lp = p.mint(1_000_000, 2_000_000_000).unwrap();
        let (a, b) = p.burn(lp, 0, 0).unwrap();
        // Rounding always favours the pool
        assert!(a <= 1_000_000 && a >= 999_999);
        assert!(b <= 2_000_000_000 && b >= 1_999_999_000);
    }

    #[test]
    fn test_swap_moves_price_and_respects_min_out() {
        let mut p = seeded();
        let before = p.price().unwrap();
        let preview = p.preview(true, 100_000_000).unwrap();
        assert_eq!(
            p.swap(true, 100_000_000, preview.amount_out + 1),
            Err(AmmError::InsufficientOutput)
        );
        let q = p.swap(true, 100_000_000, preview.amount_out).unwrap();
        assert_eq!(q, preview);
        assert!(p.price().unwrap() < before, "Selling A lowers the A price");
    }

    #[test]
    fn test_burn_rejects_more_than_supply() {
        let mut p = seeded();
        let supply = p.total_supply;
        assert!(p.burn(supply + 1, 0, 0).is_err());
    }
}
