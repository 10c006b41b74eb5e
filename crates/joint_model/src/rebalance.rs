//! Swap sizing used when the joint unwinds: how much of one side to sell so
//! that both providers realise the same return on what they invested.

use amm_model::{get_amount_out, mul_div, SCALE};

use crate::token::Side;
use crate::Result;

/// `a` of A plus `b` of B, valued in B at `price`
pub fn value_in_b(a: u128, b: u128, price: u128) -> Result<u128> {
    Ok(mul_div(a, price, SCALE)?.saturating_add(b))
}

/// Return ratio `balance / invested`, scaled by `SCALE`
fn ratio(balance: u128, invested: u128) -> Result<u128> {
    Ok(mul_div(balance, SCALE, invested)?)
}

fn out_or_zero(amount: u128, reserve_in: u128, reserve_out: u128, fee_bps: u128) -> u128 {
    get_amount_out(amount, reserve_in, reserve_out, fee_bps).unwrap_or(0)
}

/// Side and amount to sell so that `bal_a / inv_a ≈ bal_b / inv_b` after the
/// swap, or `None` if the two returns already match to within one unit of
/// output. Reserves are the A/B pair's `(reserve_a, reserve_b)`.
///
/// Binary search for the largest sale that does not overshoot: the seller's
/// ratio falls and the buyer's rises monotonically with the amount sold.
pub fn sell_to_balance(
    bal_a: u128,
    bal_b: u128,
    inv_a: u128,
    inv_b: u128,
    reserves: (u128, u128),
    fee_bps: u128,
) -> Result<Option<(Side, u128)>> {
    if inv_a == 0 || inv_b == 0 {
        return Ok(None);
    }
    let ratio_a = ratio(bal_a, inv_a)?;
    let ratio_b = ratio(bal_b, inv_b)?;
    if ratio_a == ratio_b {
        return Ok(None);
    }

    let (sell, bal_in, bal_out, inv_in, inv_out, r_in, r_out) = if ratio_a > ratio_b {
        (Side::A, bal_a, bal_b, inv_a, inv_b, reserves.0, reserves.1)
    } else {
        (Side::B, bal_b, bal_a, inv_b, inv_a, reserves.1, reserves.0)
    };

    let balanced = |x: u128| -> Result<bool> {
        let out = out_or_zero(x, r_in, r_out, fee_bps);
        Ok(ratio(bal_in - x, inv_in)? >= ratio(bal_out.saturating_add(out), inv_out)?)
    };

    let (mut lo, mut hi) = (0u128, bal_in);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if balanced(mid)? {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }

    if lo == 0 || out_or_zero(lo, r_in, r_out, fee_bps) == 0 {
        return Ok(None);
    }
    log::debug!("rebalance: sell {} of {}", lo, sell);
    Ok(Some((sell, lo)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESERVES: (u128, u128) = (1_000_000_000_000, 2_000_000_000_000_000);

    fn apply(bal_a: u128, bal_b: u128, sell: Option<(Side, u128)>) -> (u128, u128) {
        match sell {
            None => (bal_a, bal_b),
            Some((Side::A, x)) => (bal_a - x, bal_b + get_amount_out(x, RESERVES.0, RESERVES.1, 30).unwrap()),
            Some((Side::B, x)) => (bal_a + get_amount_out(x, RESERVES.1, RESERVES.0, 30).unwrap(), bal_b - x),
        }
    }

    #[test]
    fn test_already_balanced() {
        let r = sell_to_balance(1_000, 2_000_000, 1_000, 2_000_000, RESERVES, 30).unwrap();
        assert_eq!(r, None);
    }

    #[test]
    fn test_excess_a_is_sold() {
        // A came back 10% up, B 10% down
        let inv_a = 10_000_000_000;
        let inv_b = 20_000_000_000_000;
        let (bal_a, bal_b) = (11_000_000_000, 18_000_000_000_000);
        let sell = sell_to_balance(bal_a, bal_b, inv_a, inv_b, RESERVES, 30).unwrap();
        assert!(matches!(sell, Some((Side::A, _))));

        let (a, b) = apply(bal_a, bal_b, sell);
        let ra = a as f64 / inv_a as f64;
        let rb = b as f64 / inv_b as f64;
        assert!((ra - rb).abs() < 1e-6, "ratios {} vs {}", ra, rb);
        assert!(ra < 1.0, "fees make both sides lose a little");
    }

    #[test]
    fn test_excess_b_is_sold() {
        let inv_a = 10_000_000_000;
        let inv_b = 20_000_000_000_000;
        let (bal_a, bal_b) = (9_500_000_000, 20_400_000_000_000);
        let sell = sell_to_balance(bal_a, bal_b, inv_a, inv_b, RESERVES, 30).unwrap();
        assert!(matches!(sell, Some((Side::B, _))));
        let (a, b) = apply(bal_a, bal_b, sell);
        let ra = a as f64 / inv_a as f64;
        let rb = b as f64 / inv_b as f64;
        assert!((ra - rb).abs() < 1e-6);
    }

    #[test]
    fn test_dust_imbalance_is_ignored() {
        let r = sell_to_balance(1_001, 2_000_000, 1_000, 2_000_000, RESERVES, 30).unwrap();
        assert_eq!(r, None);
    }

    #[test]
    fn test_value_in_b() {
        assert_eq!(value_in_b(3, 10, 2 * SCALE).unwrap(), 16);
    }
}
