//! Router over a set of constant product pairs.
//!
//! Pairs are stored under their sorted token pair; the `Pair` struct is
//! positional, so every accessor here re-orients reserves and amounts to the
//! caller's token order.

use std::collections::BTreeMap;

use amm_model::{get_amount_out, Pair, SCALE};

use crate::token::Token;
use crate::{JointError, Result};

/// Result of a path swap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReceipt {
    /// Amount at every hop, input first
    pub amounts: Vec<u128>,
    /// Fee retained by each hop, in that hop's input token
    pub fees: Vec<(Token, u128)>,
}

impl SwapReceipt {
    pub fn amount_out(&self) -> u128 {
        self.amounts.last().copied().unwrap_or(0)
    }

    /// Fees charged in `token` across all hops
    pub fn fees_in(&self, token: Token) -> u128 {
        self.fees
            .iter()
            .filter(|(t, _)| *t == token)
            .map(|(_, f)| *f)
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Market {
    pairs: BTreeMap<(Token, Token), Pair>,
}

/// Sorted key plus whether `x` sits in the pair's A slot
fn key(x: Token, y: Token) -> ((Token, Token), bool) {
    if x <= y {
        ((x, y), true)
    } else {
        ((y, x), false)
    }
}

impl Market {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pair(&mut self, x: Token, y: Token, fee_bps: u128) -> Result<()> {
        if x == y || x == Token::Lp || y == Token::Lp {
            return Err(JointError::InvalidParameter("pair tokens"));
        }
        let (k, _) = key(x, y);
        if self.pairs.contains_key(&k) {
            return Err(JointError::InvalidParameter("pair already exists"));
        }
        self.pairs.insert(k, Pair::new(fee_bps));
        Ok(())
    }

    pub fn has_pair(&self, x: Token, y: Token) -> bool {
        self.pairs.contains_key(&key(x, y).0)
    }

    pub fn pair(&self, x: Token, y: Token) -> Result<&Pair> {
        self.pairs.get(&key(x, y).0).ok_or(JointError::UnknownPair(x, y))
    }

    fn pair_mut(&mut self, x: Token, y: Token) -> Result<&mut Pair> {
        self.pairs
            .get_mut(&key(x, y).0)
            .ok_or(JointError::UnknownPair(x, y))
    }

    /// `(reserve_x, reserve_y)`
    pub fn reserves(&self, x: Token, y: Token) -> Result<(u128, u128)> {
        let pair = self.pair(x, y)?;
        let (_, x_is_a) = key(x, y);
        Ok(if x_is_a {
            (pair.reserve_a, pair.reserve_b)
        } else {
            (pair.reserve_b, pair.reserve_a)
        })
    }

    /// Price of `base` in units of `quote`, scaled by `SCALE`
    pub fn price(&self, base: Token, quote: Token) -> Result<u128> {
        let (rb, rq) = self.reserves(base, quote)?;
        Ok(amm_model::spot_price(rb, rq)?)
    }

    /// Tokens of `token` held in every pair's reserves
    pub fn reserve_of(&self, token: Token) -> u128 {
        self.pairs
            .iter()
            .map(|((x, y), p)| {
                let mut held = 0;
                if *x == token {
                    held += p.reserve_a;
                }
                if *y == token {
                    held += p.reserve_b;
                }
                held
            })
            .sum()
    }

    fn check_path(&self, path: &[Token]) -> Result<()> {
        if path.len() < 2 {
            return Err(JointError::InvalidSwapPath);
        }
        for hop in path.windows(2) {
            if hop[0] == hop[1] || !self.has_pair(hop[0], hop[1]) {
                return Err(JointError::InvalidSwapPath);
            }
        }
        Ok(())
    }

    /// Router `getAmountsOut`: quotes every hop against current reserves
    pub fn amounts_out(&self, path: &[Token], amount_in: u128) -> Result<Vec<u128>> {
        self.check_path(path)?;
        let mut amounts = Vec::with_capacity(path.len());
        amounts.push(amount_in);
        let mut amount = amount_in;
        for hop in path.windows(2) {
            let (r_in, r_out) = self.reserves(hop[0], hop[1])?;
            let fee = self.pair(hop[0], hop[1])?.fee_bps;
            amount = get_amount_out(amount, r_in, r_out, fee)?;
            amounts.push(amount);
        }
        Ok(amounts)
    }

    /// Router `swapExactTokensForTokens`. The pair state is only touched once
    /// the whole path is known to clear `min_out`.
    pub fn swap_exact(&mut self, path: &[Token], amount_in: u128, min_out: u128) -> Result<SwapReceipt> {
        let quoted = self.amounts_out(path, amount_in)?;
        let out = quoted.last().copied().unwrap_or(0);
        if out < min_out {
            return Err(amm_model::AmmError::InsufficientOutput.into());
        }

        let mut amounts = Vec::with_capacity(path.len());
        let mut fees = Vec::with_capacity(path.len() - 1);
        amounts.push(amount_in);
        let mut amount = amount_in;
        for hop in path.windows(2) {
            let (_, x_is_a) = key(hop[0], hop[1]);
            let q = self.pair_mut(hop[0], hop[1])?.swap(x_is_a, amount, 0)?;
            fees.push((hop[0], q.fee_paid));
            amount = q.amount_out;
            amounts.push(amount);
        }
        log::debug!(
            "swap {} {} -> {} {}",
            amount_in,
            path[0],
            amount,
            path[path.len() - 1]
        );
        Ok(SwapReceipt { amounts, fees })
    }

    /// Value of `amount` of `token` in `quote`, using the direct pair spot price
    pub fn spot_value(&self, token: Token, quote: Token, amount: u128) -> Result<u128> {
        if token == quote || amount == 0 {
            return Ok(amount);
        }
        let price = self.price(token, quote)?;
        Ok(amm_model::mul_div(amount, price, SCALE)?)
    }

    pub fn add_liquidity(&mut self, x: Token, y: Token, amount_x: u128, amount_y: u128) -> Result<u128> {
        let (_, x_is_a) = key(x, y);
        let pair = self.pair_mut(x, y)?;
        let minted = if x_is_a {
            pair.mint(amount_x, amount_y)?
        } else {
            pair.mint(amount_y, amount_x)?
        };
        Ok(minted)
    }

    /// Underlying `(x, y)` owed to `lp` units
    pub fn underlying(&self, x: Token, y: Token, lp: u128) -> Result<(u128, u128)> {
        let (_, x_is_a) = key(x, y);
        let (a, b) = self.pair(x, y)?.underlying(lp)?;
        Ok(if x_is_a { (a, b) } else { (b, a) })
    }

    pub fn remove_liquidity(
        &mut self,
        x: Token,
        y: Token,
        lp: u128,
        min_x: u128,
        min_y: u128,
    ) -> Result<(u128, u128)> {
        let (_, x_is_a) = key(x, y);
        let pair = self.pair_mut(x, y)?;
        Ok(if x_is_a {
            pair.burn(lp, min_x, min_y)?
        } else {
            let (a, b) = pair.burn(lp, min_y, min_x)?;
            (b, a)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market() -> Market {
        let mut m = Market::new();
        m.add_pair(Token::A, Token::B, 30).unwrap();
        m.add_pair(Token::Reward, Token::B, 30).unwrap();
        m.add_liquidity(Token::A, Token::B, 1_000_000_000, 2_000_000_000_000).unwrap();
        // Reward sits in the B slot of its pair: exercises re-orientation
        m.add_liquidity(Token::Reward, Token::B, 4_000_000_000, 2_000_000_000).unwrap();
        m
    }

    #[test]
    fn test_orientation() {
        let m = market();
        assert_eq!(m.reserves(Token::Reward, Token::B).unwrap(), (4_000_000_000, 2_000_000_000));
        assert_eq!(m.reserves(Token::B, Token::Reward).unwrap(), (2_000_000_000, 4_000_000_000));
        assert_eq!(m.price(Token::Reward, Token::B).unwrap(), SCALE / 2);
        assert_eq!(m.price(Token::A, Token::B).unwrap(), 2_000 * SCALE);
    }

    #[test]
    fn test_multi_hop_matches_quote() {
        let mut m = market();
        let path = [Token::Reward, Token::B, Token::A];
        let quoted = m.amounts_out(&path, 10_000_000).unwrap();
        let receipt = m.swap_exact(&path, 10_000_000, 0).unwrap();
        assert_eq!(receipt.amounts, quoted);
        assert_eq!(receipt.fees_in(Token::Reward), 30_000);
        assert!(receipt.amount_out() > 0);
    }

    #[test]
    fn test_failed_swap_leaves_pairs_untouched() {
        let mut m = market();
        let before = m.clone();
        let path = [Token::Reward, Token::B, Token::A];
        let out = m.amounts_out(&path, 10_000_000).unwrap()[2];
        assert!(m.swap_exact(&path, 10_000_000, out + 1).is_err());
        assert_eq!(m, before);
        assert_eq!(m.amounts_out(&[Token::A, Token::Reward], 1), Err(JointError::InvalidSwapPath));
    }

    #[test]
    fn test_reserve_of_sums_pairs() {
        let m = market();
        assert_eq!(m.reserve_of(Token::B), 2_000_000_000_000 + 2_000_000_000);
        assert_eq!(m.reserve_of(Token::Reward), 4_000_000_000);
    }
}
