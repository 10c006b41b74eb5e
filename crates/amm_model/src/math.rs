//! Constant product AMM math (x·y=k)

use crate::{AmmError, BPS_SCALE, MINIMUM_LIQUIDITY, SCALE};

/// Swap quote with the pair state it leaves behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteResult {
    /// Amount of the output token sent to the trader
    pub amount_out: u128,

    /// Fee retained by the pool, denominated in the input token
    pub fee_paid: u128,

    /// Input reserve after the trade
    pub new_reserve_in: u128,

    /// Output reserve after the trade
    pub new_reserve_out: u128,
}

/// `a * b / d` rounded down, with a 256-bit intermediate product.
///
/// Errors only when `d == 0` or the quotient itself exceeds `u128`.
pub fn mul_div(a: u128, b: u128, d: u128) -> Result<u128, AmmError> {
    if d == 0 {
        return Err(AmmError::Overflow);
    }
    if let Some(p) = a.checked_mul(b) {
        return Ok(p / d);
    }
    let (hi, lo) = mul_wide(a, b);
    div_wide(hi, lo, d).ok_or(AmmError::Overflow)
}

const LOW_64: u128 = u64::MAX as u128;

/// Full 128x128 product as `(high, low)` words
fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    let (a1, a0) = (a >> 64, a & LOW_64);
    let (b1, b0) = (b >> 64, b & LOW_64);

    let p00 = a0 * b0;
    let p01 = a0 * b1;
    let p10 = a1 * b0;
    let p11 = a1 * b1;

    // < 3 * 2^64, no overflow
    let mid = (p00 >> 64) + (p01 & LOW_64) + (p10 & LOW_64);
    let lo = (p00 & LOW_64) | ((mid & LOW_64) << 64);
    let hi = p11 + (p01 >> 64) + (p10 >> 64) + (mid >> 64);
    (hi, lo)
}

/// `(hi·2^128 + lo) / d`, `None` when the quotient needs more than 128 bits
fn div_wide(hi: u128, lo: u128, d: u128) -> Option<u128> {
    if hi >= d {
        return None;
    }
    // Restoring long division; rem < d holds before every step
    let mut rem = hi;
    let mut q: u128 = 0;
    for i in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> i) & 1);
        q <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            q |= 1;
        }
    }
    Some(q)
}

/// Integer square root (floor), Newton iteration
pub fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    // ceil(n / 2) without the n + 1 overflow
    let mut y = n / 2 + (n & 1);
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// Spot price of A in units of B, scaled by `SCALE`
pub fn spot_price(reserve_a: u128, reserve_b: u128) -> Result<u128, AmmError> {
    if reserve_a == 0 || reserve_b == 0 {
        return Err(AmmError::InvalidReserves);
    }
    mul_div(reserve_b, SCALE, reserve_a)
}

/// Proportional amount of B matching `amount_a` at the current reserves
pub fn quote(amount_a: u128, reserve_a: u128, reserve_b: u128) -> Result<u128, AmmError> {
    if amount_a == 0 {
        return Err(AmmError::InvalidAmount);
    }
    if reserve_a == 0 || reserve_b == 0 {
        return Err(AmmError::InvalidReserves);
    }
    mul_div(amount_a, reserve_b, reserve_a)
}

/// Output amount for an exact input, fee taken on input
///
/// - Δin_net = Δin · (1 − fee)
/// - Δout = Δin_net · y0 / (x0 + Δin_net)
pub fn get_amount_out(
    amount_in: u128,
    reserve_in: u128,
    reserve_out: u128,
    fee_bps: u128,
) -> Result<u128, AmmError> {
    Ok(quote_swap(amount_in, reserve_in, reserve_out, fee_bps)?.amount_out)
}

/// Full swap quote including the reserves after the trade
pub fn quote_swap(
    amount_in: u128,
    reserve_in: u128,
    reserve_out: u128,
    fee_bps: u128,
) -> Result<QuoteResult, AmmError> {
    if amount_in == 0 {
        return Err(AmmError::InvalidAmount);
    }
    if reserve_in == 0 || reserve_out == 0 {
        return Err(AmmError::InvalidReserves);
    }
    if fee_bps >= BPS_SCALE {
        return Err(AmmError::InvalidFee);
    }

    let in_with_fee = amount_in
        .checked_mul(BPS_SCALE - fee_bps)
        .ok_or(AmmError::Overflow)?;
    let denominator = reserve_in
        .checked_mul(BPS_SCALE)
        .and_then(|v| v.checked_add(in_with_fee))
        .ok_or(AmmError::Overflow)?;
    let amount_out = mul_div(in_with_fee, reserve_out, denominator)?;

    if amount_out == 0 {
        return Err(AmmError::InsufficientOutput);
    }
    if amount_out >= reserve_out {
        return Err(AmmError::InsufficientLiquidity);
    }

    let fee_paid = mul_div(amount_in, fee_bps, BPS_SCALE)?;
    let new_reserve_in = reserve_in.checked_add(amount_in).ok_or(AmmError::Overflow)?;

    Ok(QuoteResult {
        amount_out,
        fee_paid,
        new_reserve_in,
        new_reserve_out: reserve_out - amount_out,
    })
}

/// Largest deposit not exceeding the desired amounts that keeps the pool ratio
///
/// Mirrors router `addLiquidity`: use all of A if the matching B fits, otherwise
/// all of B with the matching A. An empty pool takes both amounts as given.
pub fn optimal_deposit(
    desired_a: u128,
    desired_b: u128,
    reserve_a: u128,
    reserve_b: u128,
) -> Result<(u128, u128), AmmError> {
    if desired_a == 0 || desired_b == 0 {
        return Err(AmmError::InvalidAmount);
    }
    if reserve_a == 0 && reserve_b == 0 {
        return Ok((desired_a, desired_b));
    }

    let b_for_a = quote(desired_a, reserve_a, reserve_b)?;
    if b_for_a <= desired_b {
        return Ok((desired_a, b_for_a));
    }
    let a_for_b = quote(desired_b, reserve_b, reserve_a)?;
    Ok((a_for_b.min(desired_a), desired_b))
}

/// LP units minted for a deposit of `(amount_a, amount_b)`
///
/// First deposit: `sqrt(a·b) − MINIMUM_LIQUIDITY`; afterwards the smaller of the
/// two proportional shares, so an unbalanced deposit donates the excess.
pub fn liquidity_for_deposit(
    amount_a: u128,
    amount_b: u128,
    reserve_a: u128,
    reserve_b: u128,
    total_supply: u128,
) -> Result<u128, AmmError> {
    if amount_a == 0 || amount_b == 0 {
        return Err(AmmError::InvalidAmount);
    }
    let minted = if total_supply == 0 {
        let root = isqrt(amount_a.checked_mul(amount_b).ok_or(AmmError::Overflow)?);
        root.checked_sub(MINIMUM_LIQUIDITY)
            .ok_or(AmmError::InsufficientLiquidity)?
    } else {
        if reserve_a == 0 || reserve_b == 0 {
            return Err(AmmError::InvalidReserves);
        }
        let by_a = mul_div(amount_a, total_supply, reserve_a)?;
        let by_b = mul_div(amount_b, total_supply, reserve_b)?;
        by_a.min(by_b)
    };
    if minted == 0 {
        return Err(AmmError::InsufficientLiquidity);
    }
    Ok(minted)
}

/// Underlying reserves owed to `lp_amount` units out of `total_supply`
pub fn share_of_reserves(
    lp_amount: u128,
    reserve_a: u128,
    reserve_b: u128,
    total_supply: u128,
) -> Result<(u128, u128), AmmError> {
    if total_supply == 0 {
        return Err(AmmError::InsufficientLiquidity);
    }
    if lp_amount > total_supply {
        return Err(AmmError::InvalidAmount);
    }
    Ok((
        mul_div(lp_amount, reserve_a, total_supply)?,
        mul_div(lp_amount, reserve_b, total_supply)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RA: u128 = 1_000_000_000_000;
    const RB: u128 = 2_000_000_000_000_000;

    #[test]
    fn test_mul_div_wide_product() {
        // a, b < d with a product past u128
        let (a, b, d) = ((1u128 << 100) + 1, (1u128 << 100) + 3, 1u128 << 101);
        assert_eq!(mul_div(a, b, d).unwrap(), (1u128 << 99) + 2);
        assert_eq!(mul_div(b, a, d).unwrap(), (1u128 << 99) + 2);

        assert_eq!(mul_div(u128::MAX, u128::MAX, u128::MAX).unwrap(), u128::MAX);
        assert_eq!(mul_div(u128::MAX, 3, 4).unwrap(), u128::MAX / 4 * 3 + 2);
        assert_eq!(mul_div(u128::MAX, 2, 1), Err(AmmError::Overflow));
        assert_eq!(mul_div(1, 1, 0), Err(AmmError::Overflow));
    }

    #[test]
    fn test_swap_at_wei_scale() {
        let e19 = 10_000_000_000_000_000_000u128;
        let q = quote_swap(e19, e19, e19, 30).unwrap();
        // 0.997 / 1.997 of the output reserve
        assert!(q.amount_out > e19 / 2 * 99 / 100);
        assert!(q.amount_out < e19 / 2);
    }

    #[test]
    fn test_spot_price() {
        // 2000 B per A
        assert_eq!(spot_price(RA, RB).unwrap(), 2_000 * SCALE);
        assert_eq!(spot_price(0, RB), Err(AmmError::InvalidReserves));
    }

    #[test]
    fn test_swap_small_trade_near_spot() {
        // Sell 1 A-unit-million into the pool at 30 bps
        let q = quote_swap(1_000_000, RA, RB, 30).unwrap();

        // Slightly worse than spot due to fee + slippage
        assert!(q.amount_out < 2_000 * 1_000_000);
        assert!(q.amount_out > 1_990 * 1_000_000);
        assert_eq!(q.new_reserve_in, RA + 1_000_000);
        assert_eq!(q.new_reserve_out, RB - q.amount_out);
        assert_eq!(q.fee_paid, 3_000);
    }

    #[test]
    fn test_invariant_increases_with_fees() {
        let k = RA * RB / 1_000_000; // keep the product in range
        let q = quote_swap(RA / 10, RA, RB, 30).unwrap();
        let k_after = q.new_reserve_in * q.new_reserve_out / 1_000_000;
        assert!(k_after > k, "Invariant should increase due to fees");
    }

    #[test]
    fn test_zero_fee_preserves_invariant_up_to_rounding() {
        let q = quote_swap(RA / 4, RA, RB, 0).unwrap();
        let before = RA * (RB / 1_000_000);
        let after = q.new_reserve_in * (q.new_reserve_out / 1_000_000);
        assert!(after >= before);
    }

    #[test]
    fn test_invalid_fee_rejected() {
        assert_eq!(quote_swap(1, RA, RB, 10_000), Err(AmmError::InvalidFee));
    }

    #[test]
    fn test_optimal_deposit_respects_ratio() {
        // Too much B: all of A is used
        let (a, b) = optimal_deposit(10, 50_000, 1, 2_000).unwrap();
        assert_eq!((a, b), (10, 20_000));

        // Too much A: all of B is used
        let (a, b) = optimal_deposit(100, 20_000, 1, 2_000).unwrap();
        assert_eq!((a, b), (10, 20_000));
    }

    #[test]
    fn test_first_mint_locks_minimum_liquidity() {
        let lp = liquidity_for_deposit(1_000_000, 4_000_000, 0, 0, 0).unwrap();
        assert_eq!(lp, 2_000_000 - MINIMUM_LIQUIDITY);
        assert_eq!(
            liquidity_for_deposit(10, 10, 0, 0, 0),
            Err(AmmError::InsufficientLiquidity)
        );
    }

    #[test]
    fn test_unbalanced_mint_uses_smaller_share() {
        let supply = 1_000_000;
        let lp = liquidity_for_deposit(100, 1_000, 1_000, 2_000, supply).unwrap();
        assert_eq!(lp, 100_000);
    }

    #[test]
    fn test_share_of_reserves() {
        let (a, b) = share_of_reserves(250, 1_000, 8_000, 1_000).unwrap();
        assert_eq!((a, b), (250, 2_000));
        assert!(share_of_reserves(2_000, 1_000, 8_000, 1_000).is_err());
    }

    #[test]
    fn test_mul_div_large_operands() {
        let a = u128::MAX / 3;
        assert_eq!(mul_div(a, 6, 3).unwrap(), a * 2);
        assert_eq!(mul_div(SCALE * SCALE, SCALE * SCALE, SCALE * SCALE).unwrap(), SCALE * SCALE);
        assert_eq!(mul_div(1, 1, 0), Err(AmmError::Overflow));
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(SCALE), 1_000_000_000);
        let big = u128::MAX;
        let r = isqrt(big);
        assert!(r * r <= big);
    }
}
