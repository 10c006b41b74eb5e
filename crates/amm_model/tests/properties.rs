//! Property tests for the pair math

use amm_model::*;
use proptest::prelude::*;

fn seeded(a: u128, b: u128) -> Pair {
    let mut p = Pair::new(30);
    p.mint(a, b).unwrap();
    p
}

proptest! {
    #[test]
    fn swap_never_decreases_k(
        ra in 1_000_000u128..1_000_000_000_000_000,
        rb in 1_000_000u128..1_000_000_000_000_000,
        amount in 1u128..1_000_000_000_000,
        a_in in any::<bool>(),
    ) {
        let mut pair = seeded(ra, rb);
        let k0 = pair.reserve_a * pair.reserve_b;
        if pair.swap(a_in, amount, 0).is_ok() {
            prop_assert!(pair.reserve_a * pair.reserve_b >= k0);
        }
    }

    #[test]
    fn mint_then_burn_returns_no_more_than_deposited(
        ra in 1_000_000u128..1_000_000_000_000_000,
        rb in 1_000_000u128..1_000_000_000_000_000,
        da in 1_000u128..1_000_000_000_000,
        db in 1_000u128..1_000_000_000_000,
    ) {
        let mut pair = seeded(ra, rb);
        let (a, b) = match optimal_deposit(da, db, pair.reserve_a, pair.reserve_b) {
            Ok(v) => v,
            Err(_) => return Ok(()),
        };
        let lp = match pair.mint(a, b) {
            Ok(lp) if lp > 0 => lp,
            _ => return Ok(()),
        };
        let (out_a, out_b) = pair.burn(lp, 0, 0).unwrap();
        prop_assert!(out_a <= a);
        prop_assert!(out_b <= b);
    }

    #[test]
    fn optimal_deposit_fits_desired(
        ra in 1u128..1_000_000_000_000_000,
        rb in 1u128..1_000_000_000_000_000,
        da in 0u128..1_000_000_000_000,
        db in 0u128..1_000_000_000_000,
    ) {
        if let Ok((a, b)) = optimal_deposit(da, db, ra, rb) {
            prop_assert!(a <= da);
            prop_assert!(b <= db);
        }
    }

    #[test]
    fn isqrt_is_floor(n in any::<u128>()) {
        let r = isqrt(n);
        prop_assert!(r.checked_mul(r).map_or(false, |sq| sq <= n));
        prop_assert!((r + 1).checked_mul(r + 1).map_or(true, |sq| sq > n));
    }

    #[test]
    fn mul_div_cancels_common_factor(a in any::<u128>(), b in 1u128..=u128::MAX) {
        prop_assert_eq!(mul_div(a, b, b), Ok(a));
        prop_assert_eq!(mul_div(b, a, b), Ok(a));
    }

    #[test]
    fn mul_div_is_monotone_in_the_divisor(
        a in any::<u128>(),
        b in any::<u128>(),
        d in 2u128..=u128::MAX,
    ) {
        if let Ok(q) = mul_div(a, b, d) {
            let smaller = mul_div(a, b, d - 1);
            prop_assert!(smaller.map_or(true, |s| s >= q));
        }
    }
}
