//! Hedge pool: protection against the impermanent loss of the joint's LP
//! position, bought up-front and settled at close.
//!
//! A position covers `notional` units of A around `strike` (pool price at
//! open). Settlement is a pure function of `(notional, strike, range, price)`:
//!
//! - inside `[strike·(1−range), strike·(1+range)]` nothing is paid
//! - beyond the band the holder receives the impermanent loss of a
//!   notional-sized LP position measured from the band edge,
//!   `IL(P) − IL(edge)` with `IL(P) = q·(√P − √S)²`
//! - never more than the notional value `q·S`
//!
//! Payouts and premiums are denominated in B.

use std::collections::BTreeMap;

use amm_model::{isqrt, mul_div, AmmError, BPS_SCALE, SCALE};
use thiserror::Error;

pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HedgeError {
    #[error("unknown hedge position {0}")]
    UnknownPosition(u64),
    #[error("hedge position {0} is not active")]
    NotActive(u64),
    #[error("pool cannot collateralize payout: needs {needed}, has {available}")]
    InsufficientCollateral { needed: u128, available: u128 },
    #[error("premium {paid} below quote {quoted}")]
    PremiumTooLow { paid: u128, quoted: u128 },
    #[error("invalid hedge parameter: {0}")]
    InvalidParams(&'static str),
    #[error("hedge math: {0}")]
    Math(AmmError),
}

impl From<AmmError> for HedgeError {
    fn from(e: AmmError) -> Self {
        HedgeError::Math(e)
    }
}

type HedgeResult<T> = core::result::Result<T, HedgeError>;

/// Value of `notional` A at `strike`, in B
pub fn notional_value(notional: u128, strike: u128) -> HedgeResult<u128> {
    Ok(mul_div(notional, strike, SCALE)?)
}

/// Up-front premium for protecting `notional` for `period` seconds
pub fn premium(notional: u128, strike: u128, annual_premium_bps: u128, period: u64) -> HedgeResult<u128> {
    let value = notional_value(notional, strike)?;
    let rate = annual_premium_bps
        .checked_mul(period as u128)
        .ok_or(HedgeError::Math(AmmError::Overflow))?;
    // Round up so the pool never undercharges
    let denom = BPS_SCALE * SECONDS_PER_YEAR as u128;
    let floor = mul_div(value, rate, denom)?;
    let exact = floor
        .checked_mul(denom)
        .map_or(false, |v| Some(v) == value.checked_mul(rate));
    Ok(if exact { floor } else { floor + 1 })
}

/// Impermanent loss of a `notional`-sized LP position opened at `strike`
pub fn impermanent_loss(notional: u128, strike: u128, price: u128) -> HedgeResult<u128> {
    let (sp, ss) = (isqrt(price), isqrt(strike));
    let diff = sp.abs_diff(ss);
    let diff_sq = diff.checked_mul(diff).ok_or(HedgeError::Math(AmmError::Overflow))?;
    Ok(mul_div(notional, diff_sq, SCALE)?)
}

/// Whether `price` has left the `strike +/- range` band. A band that cannot
/// be computed counts as left.
pub fn outside_band(strike: u128, protection_range_bps: u128, price: u128) -> bool {
    let band = match mul_div(strike, protection_range_bps, BPS_SCALE) {
        Ok(band) => band,
        Err(_) => return true,
    };
    match strike.checked_add(band) {
        Some(hi) => price < strike.saturating_sub(band) || price > hi,
        None => true,
    }
}

/// Settlement amount of a live position at `price`
pub fn settlement_payout(
    notional: u128,
    strike: u128,
    protection_range_bps: u128,
    price: u128,
) -> HedgeResult<u128> {
    if notional == 0 || strike == 0 {
        return Ok(0);
    }
    let band = mul_div(strike, protection_range_bps, BPS_SCALE)?;
    let lo = strike.saturating_sub(band);
    let hi = strike.saturating_add(band);
    if price >= lo && price <= hi {
        return Ok(0);
    }
    let edge = if price < lo { lo } else { hi };
    let payout = impermanent_loss(notional, strike, price)?
        .saturating_sub(impermanent_loss(notional, strike, edge)?);
    Ok(payout.min(notional_value(notional, strike)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HedgeState {
    Active,
    Closed,
    Expired,
}

/// Terms of a protection purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HedgeRequest {
    /// A units covered
    pub notional: u128,
    pub strike: u128,
    pub protection_range_bps: u128,
    pub period: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HedgePosition {
    pub id: u64,
    pub notional: u128,
    pub strike: u128,
    pub protection_range_bps: u128,
    pub opened_at: u64,
    pub expiration: u64,
    pub cost: u128,
    /// Collateral locked for the lifetime of the position
    pub max_payout: u128,
    pub payout: u128,
    pub state: HedgeState,
}

impl HedgePosition {
    pub fn is_active(&self) -> bool {
        self.state == HedgeState::Active
    }
}

/// Seller of protection. The joint only talks to this trait.
pub trait HedgeProvider {
    /// Premium in B for `request`
    fn quote(&self, request: &HedgeRequest) -> HedgeResult<u128>;

    /// Open a position; `premium` has already been transferred to the provider
    fn open(&mut self, request: HedgeRequest, premium: u128, now: u64) -> HedgeResult<u64>;

    fn current_payout(&self, id: u64, price: u128, now: u64) -> HedgeResult<u128>;

    /// Settle and return the payout owed to the holder
    fn close(&mut self, id: u64, price: u128, now: u64) -> HedgeResult<u128>;

    fn position(&self, id: u64) -> Option<&HedgePosition>;

    /// B tokens held by the provider
    fn liquidity(&self) -> u128;

    /// Add B collateral
    fn provide_liquidity(&mut self, amount: u128) -> HedgeResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HedgePoolConfig {
    pub annual_premium_bps: u128,
    pub min_period: u64,
    pub max_period: u64,
    pub max_protection_range_bps: u128,
}

impl Default for HedgePoolConfig {
    fn default() -> Self {
        Self {
            annual_premium_bps: 1_000,
            min_period: 24 * 3600,
            max_period: 90 * 24 * 3600,
            max_protection_range_bps: 5_000,
        }
    }
}

/// Deterministic hedge pool backed by B liquidity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HedgilPool {
    pub config: HedgePoolConfig,
    liquidity: u128,
    locked: u128,
    positions: BTreeMap<u64, HedgePosition>,
    next_id: u64,
}

impl HedgilPool {
    pub fn new(config: HedgePoolConfig) -> Self {
        Self {
            config,
            liquidity: 0,
            locked: 0,
            positions: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn locked(&self) -> u128 {
        self.locked
    }

    pub fn available(&self) -> u128 {
        self.liquidity - self.locked
    }

    fn validate(&self, request: &HedgeRequest) -> HedgeResult<()> {
        if request.notional == 0 || request.strike == 0 {
            return Err(HedgeError::InvalidParams("zero notional or strike"));
        }
        if request.period < self.config.min_period || request.period > self.config.max_period {
            return Err(HedgeError::InvalidParams("period"));
        }
        if request.protection_range_bps > self.config.max_protection_range_bps {
            return Err(HedgeError::InvalidParams("protection range"));
        }
        Ok(())
    }

    fn active(&self, id: u64) -> HedgeResult<&HedgePosition> {
        let pos = self.positions.get(&id).ok_or(HedgeError::UnknownPosition(id))?;
        if !pos.is_active() {
            return Err(HedgeError::NotActive(id));
        }
        Ok(pos)
    }
}

impl HedgeProvider for HedgilPool {
    fn quote(&self, request: &HedgeRequest) -> HedgeResult<u128> {
        self.validate(request)?;
        premium(
            request.notional,
            request.strike,
            self.config.annual_premium_bps,
            request.period,
        )
    }

    fn open(&mut self, request: HedgeRequest, paid: u128, now: u64) -> HedgeResult<u64> {
        let quoted = self.quote(&request)?;
        if paid < quoted {
            return Err(HedgeError::PremiumTooLow { paid, quoted });
        }
        let max_payout = notional_value(request.notional, request.strike)?;
        // The premium arrives with the request and counts as collateral
        let available = self.available() + paid;
        if available < max_payout {
            return Err(HedgeError::InsufficientCollateral {
                needed: max_payout,
                available,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.liquidity += paid;
        self.locked += max_payout;
        self.positions.insert(
            id,
            HedgePosition {
                id,
                notional: request.notional,
                strike: request.strike,
                protection_range_bps: request.protection_range_bps,
                opened_at: now,
                expiration: now + request.period,
                cost: paid,
                max_payout,
                payout: 0,
                state: HedgeState::Active,
            },
        );
        log::info!(
            "hedge #{} opened: notional {} strike {} cost {}",
            id,
            request.notional,
            request.strike,
            paid
        );
        Ok(id)
    }

    fn current_payout(&self, id: u64, price: u128, now: u64) -> HedgeResult<u128> {
        let pos = self.positions.get(&id).ok_or(HedgeError::UnknownPosition(id))?;
        if !pos.is_active() || now >= pos.expiration {
            return Ok(0);
        }
        settlement_payout(pos.notional, pos.strike, pos.protection_range_bps, price)
    }

    fn close(&mut self, id: u64, price: u128, now: u64) -> HedgeResult<u128> {
        let pos = self.active(id)?;
        let expired = now >= pos.expiration;
        let payout = if expired {
            0
        } else {
            settlement_payout(pos.notional, pos.strike, pos.protection_range_bps, price)?
        };
        let max_payout = pos.max_payout;

        self.locked -= max_payout;
        self.liquidity -= payout;
        if let Some(pos) = self.positions.get_mut(&id) {
            pos.payout = payout;
            pos.state = if expired {
                HedgeState::Expired
            } else {
                HedgeState::Closed
            };
        }
        log::info!("hedge #{} settled at price {}: payout {}", id, price, payout);
        Ok(payout)
    }

    fn position(&self, id: u64) -> Option<&HedgePosition> {
        self.positions.get(&id)
    }

    fn liquidity(&self) -> u128 {
        self.liquidity
    }

    fn provide_liquidity(&mut self, amount: u128) -> HedgeResult<()> {
        self.liquidity = self
            .liquidity
            .checked_add(amount)
            .ok_or(HedgeError::Math(AmmError::Overflow))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: u128 = 2_000 * SCALE;
    const Q: u128 = 1_000_000_000;

    fn request() -> HedgeRequest {
        HedgeRequest {
            notional: Q,
            strike: S,
            protection_range_bps: 1_000,
            period: 7 * 24 * 3600,
        }
    }

    #[test]
    fn test_premium_formula() {
        // 10%/yr on 2e12 B of notional value for one year
        assert_eq!(premium(Q, S, 1_000, SECONDS_PER_YEAR).unwrap(), 200_000_000_000);
        // Rounds up on a remainder
        assert_eq!(premium(1, SCALE, 1, 1).unwrap(), 1);
    }

    #[test]
    fn test_no_payout_inside_band() {
        for price in [S, S * 95 / 100, S * 110 / 100, S * 90 / 100] {
            assert_eq!(settlement_payout(Q, S, 1_000, price).unwrap(), 0, "price {}", price);
        }
    }

    #[test]
    fn test_outside_band_edges() {
        let band = S / 10;
        assert!(!outside_band(S, 1000, S));
        assert!(!outside_band(S, 1000, S - band));
        assert!(!outside_band(S, 1000, S + band));
        assert!(outside_band(S, 1000, S - band - 1));
        assert!(outside_band(S, 1000, S + band + 1));
        // Zero-width band
        assert!(outside_band(S, 0, S + 1));
    }

    #[test]
    fn test_outside_band_near_u128_max() {
        let strike = u128::MAX / 2 + 1;
        // strike + band does not fit
        assert!(outside_band(strike, BPS_SCALE, strike));
        assert!(!outside_band(strike, 1000, strike));
        assert!(outside_band(strike, 1000, 1));
    }

    #[test]
    fn test_payout_grows_outside_band_and_is_capped() {
        let just_out = settlement_payout(Q, S, 1_000, S * 85 / 100).unwrap();
        let far_out = settlement_payout(Q, S, 1_000, S * 50 / 100).unwrap();
        assert!(just_out > 0);
        assert!(far_out > just_out);
        // Price to (almost) zero: IL approaches q·S, capped there
        let crash = settlement_payout(Q, S, 0, 1).unwrap();
        assert!(crash <= notional_value(Q, S).unwrap());
    }

    #[test]
    fn test_impermanent_loss_matches_closed_form() {
        // P = 4S: IL = q·(2√S − √S)² = q·S
        let il = impermanent_loss(Q, S, 4 * S).unwrap();
        let expected = notional_value(Q, S).unwrap();
        assert!(il.abs_diff(expected) <= expected / 1_000_000);
    }

    #[test]
    fn test_pool_collateral_and_settlement() {
        let mut pool = HedgilPool::new(HedgePoolConfig::default());
        let req = request();
        let cost = pool.quote(&req).unwrap();
        assert_eq!(
            pool.open(req, cost, 0),
            Err(HedgeError::InsufficientCollateral {
                needed: notional_value(Q, S).unwrap(),
                available: cost
            })
        );

        pool.provide_liquidity(notional_value(Q, S).unwrap()).unwrap();
        assert!(matches!(pool.open(req, cost - 1, 0), Err(HedgeError::PremiumTooLow { .. })));
        let id = pool.open(req, cost, 0).unwrap();
        assert_eq!(pool.locked(), notional_value(Q, S).unwrap());

        let price = S * 70 / 100;
        let expected = pool.current_payout(id, price, 10).unwrap();
        assert!(expected > 0);
        let liq = pool.liquidity();
        assert_eq!(pool.close(id, price, 10).unwrap(), expected);
        assert_eq!(pool.liquidity(), liq - expected);
        assert_eq!(pool.locked(), 0);
        assert_eq!(pool.position(id).unwrap().state, HedgeState::Closed);
        assert_eq!(pool.close(id, price, 10), Err(HedgeError::NotActive(id)));
    }

    #[test]
    fn test_expired_position_settles_at_zero() {
        let mut pool = HedgilPool::new(HedgePoolConfig::default());
        pool.provide_liquidity(u64::MAX as u128).unwrap();
        let req = request();
        let cost = pool.quote(&req).unwrap();
        let id = pool.open(req, cost, 0).unwrap();
        let later = req.period + 1;
        assert_eq!(pool.current_payout(id, S / 2, later).unwrap(), 0);
        assert_eq!(pool.close(id, S / 2, later).unwrap(), 0);
        assert_eq!(pool.position(id).unwrap().state, HedgeState::Expired);
    }

    #[test]
    fn test_rejects_bad_terms() {
        let pool = HedgilPool::new(HedgePoolConfig::default());
        let mut req = request();
        req.period = 60;
        assert_eq!(pool.quote(&req), Err(HedgeError::InvalidParams("period")));
        let mut req = request();
        req.protection_range_bps = 9_000;
        assert_eq!(pool.quote(&req), Err(HedgeError::InvalidParams("protection range")));
    }
}
