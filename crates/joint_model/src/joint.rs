//! The joint: pairs both providers' tokens into one LP position, stakes it,
//! buys protection for the epoch and unwinds everything when the epoch ends.
//!
//! State machine:
//!
//! ```text
//! Idle ──fund(side)──▶ PartiallyFunded ──fund(other)+open──▶ Open
//!   ▲                                                         │
//!   └──────── finalize ◀──── Unwinding ◀──── unwind ──────────┘
//! ```
//!
//! The joint never moves tokens it does not hold. Everything outside its own
//! ledger (pairs, farm, hedge pool, price feed, clock) is reached through a
//! [`Venue`] borrowed from the owning system for the length of one call, and
//! tokens leaving the joint are handed back as [`Transfer`]s.

use amm_model::{mul_div, optimal_deposit, BPS_SCALE, SCALE};

use crate::farm::RewardFarm;
use crate::hedge::{self, HedgeProvider, HedgeRequest};
use crate::market::{Market, SwapReceipt};
use crate::oracle::PriceFeed;
use crate::rebalance::{sell_to_balance, value_in_b};
use crate::roles::Actor;
use crate::token::{Balances, Side, Token};
use crate::{JointError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JointConfig {
    /// Share of the B deposit that may be spent on the hedge premium
    pub hedge_budget_bps: u128,
    /// Half-width of the no-payout band around the strike; leaving it ends the epoch
    pub protection_range_bps: u128,
    /// Epoch (and hedge) length in seconds
    pub period: u64,
    /// End the epoch once this little time is left
    pub min_time_to_maturity: u64,
    /// Automatic closes revert if value falls further than this
    pub max_percentage_loss_bps: u128,
    /// Oracle vs pool tolerance at open
    pub max_price_deviation_bps: u128,
    /// Tolerance on automatically computed minimum outputs
    pub max_slippage_bps: u128,
    pub hedging_enabled: bool,
    /// Accept new deposits and open the next epoch
    pub reinvest: bool,
}

impl Default for JointConfig {
    fn default() -> Self {
        Self {
            hedge_budget_bps: 50,
            protection_range_bps: 1_000,
            period: 7 * 24 * 3600,
            min_time_to_maturity: 3600,
            max_percentage_loss_bps: 500,
            max_price_deviation_bps: 100,
            max_slippage_bps: 100,
            hedging_enabled: true,
            reinvest: true,
        }
    }
}

impl JointConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hedge_budget_bps > BPS_SCALE
            || self.protection_range_bps > BPS_SCALE
            || self.max_percentage_loss_bps > BPS_SCALE
            || self.max_price_deviation_bps > BPS_SCALE
            || self.max_slippage_bps > BPS_SCALE
        {
            return Err(JointError::InvalidParameter("bps value above 100%"));
        }
        if self.period == 0 || self.min_time_to_maturity >= self.period {
            return Err(JointError::InvalidParameter("period must exceed min time to maturity"));
        }
        Ok(())
    }
}

/// Where a side's returned tokens go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Provider(Side),
    Wallet(Actor),
}

/// Tokens leaving the joint; the system credits the recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub to: Recipient,
    pub token: Token,
    pub amount: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointState {
    Idle,
    /// One side has deposited and waits for the other
    PartiallyFunded { side: Side, amount: u128 },
    Open,
    /// Part of the position has been taken apart
    Unwinding,
}

/// Parameters frozen when an epoch opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch {
    pub index: u64,
    pub start: u64,
    pub period: u64,
    pub min_time_to_maturity: u64,
    pub protection_range_bps: u128,
    pub hedge_budget_bps: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub epoch: Epoch,
    /// Pool price (B per A) when liquidity was added; also the hedge strike
    pub price_at_open: u128,
    pub lp_minted: u128,
    pub invested_a: u128,
    /// B paired into the pool plus the hedge premium
    pub invested_b: u128,
    pub hedge_id: Option<u64>,
    pub hedge_cost: u128,
}

/// Running totals collected while a position unwinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct UnwindTotals {
    rewards_claimed: u128,
    rewards_sold: u128,
    hedge_payout: u128,
    swap_fees_a: u128,
    swap_fees_b: u128,
    swap_fees_reward: u128,
    drained_a: u128,
    drained_b: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochReport {
    pub index: u64,
    pub opened_at: u64,
    pub closed_at: u64,
    pub price_at_open: u128,
    pub price_at_close: u128,
    pub invested_a: u128,
    pub invested_b: u128,
    pub returned_a: u128,
    pub returned_b: u128,
    pub hedge_id: Option<u64>,
    pub hedge_cost: u128,
    pub hedge_payout: u128,
    pub rewards_claimed: u128,
    pub rewards_sold: u128,
    pub swap_fees_a: u128,
    pub swap_fees_b: u128,
    pub swap_fees_reward: u128,
}

/// Everything the joint touches besides its own ledger, for one call
pub struct Venue<'a, F, H> {
    pub market: &'a mut Market,
    pub farm: &'a mut RewardFarm,
    pub hedge: &'a mut H,
    pub feed: &'a mut F,
    pub now: u64,
}

/// Read-only counterpart of [`Venue`] for queries
pub struct View<'a, F, H> {
    pub market: &'a Market,
    pub farm: &'a RewardFarm,
    pub hedge: &'a H,
    pub feed: &'a F,
    pub now: u64,
}

impl<'a, F: PriceFeed, H: HedgeProvider> Venue<'a, F, H> {
    pub fn view(&self) -> View<'_, F, H> {
        View {
            market: &*self.market,
            farm: &*self.farm,
            hedge: &*self.hedge,
            feed: &*self.feed,
            now: self.now,
        }
    }

    /// Path swap that keeps the price feed informed of the new pool price
    fn swap(&mut self, path: &[Token], amount: u128, min_out: u128) -> Result<SwapReceipt> {
        let receipt = self.market.swap_exact(path, amount, min_out)?;
        if let Ok(price) = self.market.price(Token::A, Token::B) {
            self.feed.observe(price);
        }
        Ok(receipt)
    }
}

fn less_slippage(amount: u128, slippage_bps: u128) -> Result<u128> {
    Ok(mul_div(amount, BPS_SCALE - slippage_bps, BPS_SCALE)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Joint {
    pub config: JointConfig,
    initialized: bool,
    is_original: bool,
    recipients: [Recipient; 2],
    balances: Balances,
    state: JointState,
    position: Option<Position>,
    totals: UnwindTotals,
    force_end: bool,
    epochs_opened: u64,
    history: Vec<EpochReport>,
}

impl Joint {
    fn blank(is_original: bool) -> Self {
        Self {
            config: JointConfig::default(),
            initialized: false,
            is_original,
            recipients: [Recipient::Provider(Side::A), Recipient::Provider(Side::B)],
            balances: Balances::new(),
            state: JointState::Idle,
            position: None,
            totals: UnwindTotals::default(),
            force_end: false,
            epochs_opened: 0,
            history: Vec::new(),
        }
    }

    /// Original (cloneable) joint, initialized
    pub fn deploy(config: JointConfig) -> Result<Self> {
        let mut joint = Self::blank(true);
        joint.initialize(config, [Recipient::Provider(Side::A), Recipient::Provider(Side::B)])?;
        Ok(joint)
    }

    pub fn initialize(&mut self, config: JointConfig, recipients: [Recipient; 2]) -> Result<()> {
        if self.initialized {
            return Err(JointError::AlreadyInitialized);
        }
        config.validate()?;
        self.config = config;
        self.recipients = recipients;
        self.initialized = true;
        Ok(())
    }

    /// Fresh joint with the same configuration and recipients. Clones cannot
    /// be cloned again.
    pub fn clone_joint(&self) -> Result<Self> {
        if !self.is_original {
            return Err(JointError::CloneOfClone);
        }
        let mut joint = Self::blank(false);
        joint.initialize(self.config, self.recipients)?;
        Ok(joint)
    }

    fn require_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(JointError::NotInitialized)
        }
    }

    pub fn is_original(&self) -> bool {
        self.is_original
    }

    pub fn state(&self) -> JointState {
        self.state
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn history(&self) -> &[EpochReport] {
        &self.history
    }

    pub fn balance_of(&self, token: Token) -> u128 {
        self.balances.get(token)
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    pub fn recipient(&self, side: Side) -> Recipient {
        self.recipients[side.index()]
    }

    pub fn active_hedge_id<F, H: HedgeProvider>(&self, view: &View<'_, F, H>) -> Option<u64> {
        self.position
            .as_ref()
            .and_then(|p| p.hedge_id)
            .filter(|id| view.hedge.position(*id).map_or(false, |h| h.is_active()))
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    fn update_config(&mut self, update: impl FnOnce(&mut JointConfig)) -> Result<()> {
        self.require_initialized()?;
        let mut next = self.config;
        update(&mut next);
        next.validate()?;
        self.config = next;
        Ok(())
    }

    pub fn set_hedge_budget(&mut self, bps: u128) -> Result<()> {
        self.update_config(|c| c.hedge_budget_bps = bps)
    }

    pub fn set_hedging_period(&mut self, period: u64) -> Result<()> {
        self.update_config(|c| c.period = period)
    }

    pub fn set_protection_range(&mut self, bps: u128) -> Result<()> {
        self.update_config(|c| c.protection_range_bps = bps)
    }

    pub fn set_min_time_to_maturity(&mut self, secs: u64) -> Result<()> {
        self.update_config(|c| c.min_time_to_maturity = secs)
    }

    pub fn set_max_percentage_loss(&mut self, bps: u128) -> Result<()> {
        self.update_config(|c| c.max_percentage_loss_bps = bps)
    }

    pub fn set_max_price_deviation(&mut self, bps: u128) -> Result<()> {
        self.update_config(|c| c.max_price_deviation_bps = bps)
    }

    pub fn set_reinvest(&mut self, reinvest: bool) -> Result<()> {
        self.update_config(|c| c.reinvest = reinvest)
    }

    /// Turning hedging off while a hedge is live needs `force`
    pub fn set_hedging_enabled<F, H: HedgeProvider>(
        &mut self,
        view: &View<'_, F, H>,
        enabled: bool,
        force: bool,
    ) -> Result<()> {
        if !enabled && !force && self.active_hedge_id(view).is_some() {
            return Err(JointError::InvalidState("hedge active; disabling needs force"));
        }
        self.update_config(|c| c.hedging_enabled = enabled)
    }

    pub fn set_recipient(&mut self, side: Side, recipient: Recipient) -> Result<()> {
        self.require_initialized()?;
        self.recipients[side.index()] = recipient;
        Ok(())
    }

    pub fn force_end_epoch(&mut self) -> Result<()> {
        if self.state != JointState::Open {
            return Err(JointError::NoPosition);
        }
        self.force_end = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    pub fn accepts_deposits(&self) -> bool {
        self.initialized
            && self.config.reinvest
            && self.position.is_none()
            && matches!(self.state, JointState::Idle | JointState::PartiallyFunded { .. })
    }

    pub fn should_start_epoch(&self) -> bool {
        self.accepts_deposits() && matches!(self.state, JointState::PartiallyFunded { .. })
    }

    /// Seconds until the running epoch matures (hedge expiry when hedged)
    pub fn time_to_maturity<F, H: HedgeProvider>(&self, view: &View<'_, F, H>) -> Option<u64> {
        let pos = self.position.as_ref()?;
        let maturity = pos
            .hedge_id
            .and_then(|id| view.hedge.position(id))
            .map(|h| h.expiration)
            .unwrap_or(pos.epoch.start + pos.epoch.period);
        Some(maturity.saturating_sub(view.now))
    }

    pub fn should_end_epoch<F, H: HedgeProvider>(&self, view: &View<'_, F, H>) -> bool {
        let pos = match (&self.position, self.state) {
            (Some(pos), JointState::Open) => pos,
            _ => return false,
        };
        if self.force_end {
            return true;
        }
        if self
            .time_to_maturity(view)
            .map_or(false, |ttm| ttm <= pos.epoch.min_time_to_maturity)
        {
            return true;
        }
        if pos.epoch.protection_range_bps == 0 {
            return false;
        }
        let price = match view.market.price(Token::A, Token::B) {
            Ok(p) => p,
            Err(_) => return false,
        };
        hedge::outside_band(pos.price_at_open, pos.epoch.protection_range_bps, price)
    }

    // ------------------------------------------------------------------
    // Funding and opening
    // ------------------------------------------------------------------

    /// Record a provider deposit. Returns true once both sides are in.
    pub fn fund(&mut self, side: Side, amount: u128) -> Result<bool> {
        self.require_initialized()?;
        if !self.accepts_deposits() {
            return Err(JointError::InvalidState("joint does not accept deposits"));
        }
        if amount == 0 {
            return Err(JointError::InvalidParameter("deposit amount"));
        }
        self.balances.credit(side.token(), amount)?;
        let (state, ready) = match self.state {
            JointState::PartiallyFunded { side: s, amount: a } if s == side => (
                JointState::PartiallyFunded {
                    side,
                    amount: a + amount,
                },
                false,
            ),
            JointState::PartiallyFunded { side: s, amount: a } => (JointState::PartiallyFunded { side: s, amount: a }, true),
            _ => (JointState::PartiallyFunded { side, amount }, false),
        };
        self.state = state;
        Ok(ready)
    }

    fn check_oracle<F: PriceFeed>(&self, feed: &F, pool_price: u128) -> Result<()> {
        let oracle = feed.latest_price()?;
        let tolerance = mul_div(pool_price, self.config.max_price_deviation_bps, BPS_SCALE)?;
        if oracle.abs_diff(pool_price) > tolerance {
            return Err(JointError::PriceDeviation {
                oracle,
                pool: pool_price,
            });
        }
        Ok(())
    }

    /// Hedge sized to the A deposit, scaled down to fit the premium budget
    fn plan_hedge<H: HedgeProvider>(
        &self,
        hedge: &H,
        a: u128,
        b: u128,
        strike: u128,
    ) -> Result<Option<(HedgeRequest, u128)>> {
        if !self.config.hedging_enabled || self.config.hedge_budget_bps == 0 {
            return Ok(None);
        }
        let budget = mul_div(b, self.config.hedge_budget_bps, BPS_SCALE)?;
        let mut request = HedgeRequest {
            notional: a,
            strike,
            protection_range_bps: self.config.protection_range_bps,
            period: self.config.period,
        };
        let mut cost = hedge.quote(&request)?;
        if cost > budget {
            request.notional = mul_div(request.notional, budget, cost)?;
            if request.notional == 0 {
                return Ok(None);
            }
            cost = hedge.quote(&request)?;
        }
        Ok(Some((request, cost)))
    }

    /// Pair both balances at live reserves, stake the LP, buy the hedge and
    /// hand back whatever did not fit.
    pub fn open_epoch<F: PriceFeed, H: HedgeProvider>(&mut self, cx: &mut Venue<'_, F, H>) -> Result<Vec<Transfer>> {
        self.require_initialized()?;
        if !self.should_start_epoch() {
            return Err(JointError::InvalidState("epoch cannot start"));
        }
        let bal_a = self.balances.get(Token::A);
        let bal_b = self.balances.get(Token::B);
        if bal_a == 0 || bal_b == 0 {
            return Err(JointError::InvalidState("both sides must be funded"));
        }

        let (ra, rb) = cx.market.reserves(Token::A, Token::B)?;
        let strike = cx.market.price(Token::A, Token::B)?;
        self.check_oracle(&*cx.feed, strike)?;

        let (mut a, mut b) = optimal_deposit(bal_a, bal_b, ra, rb)?;
        let hedge = match self.plan_hedge(&*cx.hedge, a, b, strike)? {
            Some((mut request, cost)) => {
                // Premium comes out of B before sizing the deposit
                let (a2, b2) = optimal_deposit(bal_a, bal_b.saturating_sub(cost), ra, rb)?;
                a = a2;
                b = b2;
                let mut cost = cost;
                if request.notional > a {
                    request.notional = a;
                    cost = cx.hedge.quote(&request)?;
                }
                Some((request, cost))
            }
            None => None,
        };

        let lp = cx.market.add_liquidity(Token::A, Token::B, a, b)?;
        self.balances.debit(Token::A, a)?;
        self.balances.debit(Token::B, b)?;
        cx.farm.stake(lp, cx.now)?;

        let (hedge_id, hedge_cost) = match hedge {
            Some((request, cost)) => {
                self.balances.debit(Token::B, cost)?;
                (Some(cx.hedge.open(request, cost, cx.now)?), cost)
            }
            None => (None, 0),
        };

        // Remainders are not part of the position
        let leftovers = self.drain_to_recipients();

        self.epochs_opened += 1;
        let epoch = Epoch {
            index: self.epochs_opened,
            start: cx.now,
            period: self.config.period,
            min_time_to_maturity: self.config.min_time_to_maturity,
            protection_range_bps: self.config.protection_range_bps,
            hedge_budget_bps: self.config.hedge_budget_bps,
        };
        self.position = Some(Position {
            epoch,
            price_at_open: strike,
            lp_minted: lp,
            invested_a: a,
            invested_b: b + hedge_cost,
            hedge_id,
            hedge_cost,
        });
        self.state = JointState::Open;
        self.force_end = false;
        self.totals = UnwindTotals::default();

        log::info!(
            "epoch {} opened: {} A + {} B -> {} LP at price {}, hedge {:?} cost {}",
            epoch.index,
            a,
            b,
            lp,
            strike,
            hedge_id,
            hedge_cost
        );
        Ok(leftovers)
    }

    // ------------------------------------------------------------------
    // Unwinding steps (shared by automatic and manual paths)
    // ------------------------------------------------------------------

    fn require_position(&self) -> Result<&Position> {
        self.position.as_ref().ok_or(JointError::NoPosition)
    }

    fn mark_unwinding(&mut self) {
        if self.position.is_some() {
            self.state = JointState::Unwinding;
        }
    }

    pub fn claim_rewards<F, H>(&mut self, cx: &mut Venue<'_, F, H>) -> Result<u128> {
        self.require_initialized()?;
        let claimed = cx.farm.claim(cx.now);
        self.balances.credit(Token::Reward, claimed)?;
        self.totals.rewards_claimed += claimed;
        Ok(claimed)
    }

    pub fn withdraw_lp<F, H>(&mut self, cx: &mut Venue<'_, F, H>, amount: u128) -> Result<()> {
        self.require_position()?;
        if amount == 0 {
            return Err(JointError::InvalidParameter("lp amount"));
        }
        cx.farm.unstake(amount, cx.now)?;
        self.balances.credit(Token::Lp, amount)?;
        self.mark_unwinding();
        Ok(())
    }

    pub fn remove_liquidity<F, H>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        amount: u128,
        min_a: u128,
        min_b: u128,
    ) -> Result<(u128, u128)> {
        self.require_initialized()?;
        self.balances.debit(Token::Lp, amount)?;
        let (a, b) = cx.market.remove_liquidity(Token::A, Token::B, amount, min_a, min_b)?;
        self.balances.credit(Token::A, a)?;
        self.balances.credit(Token::B, b)?;
        self.mark_unwinding();
        Ok((a, b))
    }

    pub fn close_hedge<F: PriceFeed, H: HedgeProvider>(&mut self, cx: &mut Venue<'_, F, H>) -> Result<u128> {
        let id = self
            .active_hedge_id(&cx.view())
            .ok_or(JointError::InvalidState("no active hedge"))?;
        let price = cx.feed.latest_price()?;
        let payout = cx.hedge.close(id, price, cx.now)?;
        self.balances.credit(Token::B, payout)?;
        self.totals.hedge_payout += payout;
        self.mark_unwinding();
        Ok(payout)
    }

    /// Take the position apart: rewards, stake, hedge, liquidity
    fn unwind<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        min_a: u128,
        min_b: u128,
    ) -> Result<()> {
        self.require_position()?;
        self.state = JointState::Unwinding;
        self.claim_rewards(cx)?;
        let staked = cx.farm.staked();
        if staked > 0 {
            self.withdraw_lp(cx, staked)?;
        }
        if self.active_hedge_id(&cx.view()).is_some() {
            self.close_hedge(cx)?;
        }
        let lp = self.balances.get(Token::Lp);
        if lp > 0 {
            self.remove_liquidity(cx, lp, min_a, min_b)?;
        }
        Ok(())
    }

    fn track_fees(&mut self, receipt: &SwapReceipt) {
        self.totals.swap_fees_a += receipt.fees_in(Token::A);
        self.totals.swap_fees_b += receipt.fees_in(Token::B);
        self.totals.swap_fees_reward += receipt.fees_in(Token::Reward);
    }

    /// Held rewards into B (or A when only a Reward/A pair exists). Dust that
    /// quotes to nothing is left in place.
    fn sell_rewards<F: PriceFeed, H: HedgeProvider>(&mut self, cx: &mut Venue<'_, F, H>) -> Result<()> {
        let amount = self.balances.get(Token::Reward);
        if amount == 0 {
            return Ok(());
        }
        let target = if cx.market.has_pair(Token::Reward, Token::B) {
            Token::B
        } else if cx.market.has_pair(Token::Reward, Token::A) {
            Token::A
        } else {
            return Ok(());
        };
        let path = [Token::Reward, target];
        let quoted = match cx.market.amounts_out(&path, amount) {
            Ok(amounts) => amounts[1],
            Err(JointError::Amm(e)) => {
                log::debug!("keeping {} reward: {}", amount, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let min_out = less_slippage(quoted, self.config.max_slippage_bps)?;
        self.balances.debit(Token::Reward, amount)?;
        let receipt = cx.swap(&path, amount, min_out)?;
        self.balances.credit(target, receipt.amount_out())?;
        self.totals.rewards_sold += amount;
        self.track_fees(&receipt);
        Ok(())
    }

    /// Swap so that both sides realise the same return on their investment
    fn rebalance<F: PriceFeed, H: HedgeProvider>(&mut self, cx: &mut Venue<'_, F, H>) -> Result<()> {
        let (inv_a, inv_b) = {
            let pos = self.require_position()?;
            (pos.invested_a, pos.invested_b)
        };
        let pair = cx.market.pair(Token::A, Token::B)?;
        let sell = sell_to_balance(
            self.balances.get(Token::A),
            self.balances.get(Token::B),
            inv_a,
            inv_b,
            cx.market.reserves(Token::A, Token::B)?,
            pair.fee_bps,
        )?;
        if let Some((side, amount)) = sell {
            let path = [side.token(), side.other().token()];
            let quoted = cx.market.amounts_out(&path, amount)?[1];
            let min_out = less_slippage(quoted, self.config.max_slippage_bps)?;
            self.balances.debit(side.token(), amount)?;
            let receipt = cx.swap(&path, amount, min_out)?;
            self.balances.credit(side.other().token(), receipt.amount_out())?;
            self.track_fees(&receipt);
        }
        Ok(())
    }

    fn check_loss(&self, price: u128) -> Result<()> {
        let pos = self.require_position()?;
        let invested = value_in_b(pos.invested_a, pos.invested_b, price)?;
        let returned = value_in_b(self.balances.get(Token::A), self.balances.get(Token::B), price)?;
        let floor = mul_div(invested, BPS_SCALE - self.config.max_percentage_loss_bps, BPS_SCALE)?;
        if returned < floor {
            return Err(JointError::LossTooHigh { invested, returned });
        }
        Ok(())
    }

    /// Close the books on the position once nothing is left in it
    fn finalize<F, H>(&mut self, cx: &Venue<'_, F, H>) -> Result<EpochReport> {
        let pos = self.position.take().ok_or(JointError::NoPosition)?;
        let totals = core::mem::take(&mut self.totals);
        let report = EpochReport {
            index: pos.epoch.index,
            opened_at: pos.epoch.start,
            closed_at: cx.now,
            price_at_open: pos.price_at_open,
            price_at_close: cx.market.price(Token::A, Token::B)?,
            invested_a: pos.invested_a,
            invested_b: pos.invested_b,
            returned_a: totals.drained_a + self.balances.get(Token::A),
            returned_b: totals.drained_b + self.balances.get(Token::B),
            hedge_id: pos.hedge_id,
            hedge_cost: pos.hedge_cost,
            hedge_payout: totals.hedge_payout,
            rewards_claimed: totals.rewards_claimed,
            rewards_sold: totals.rewards_sold,
            swap_fees_a: totals.swap_fees_a,
            swap_fees_b: totals.swap_fees_b,
            swap_fees_reward: totals.swap_fees_reward,
        };
        self.state = JointState::Idle;
        self.force_end = false;
        self.history.push(report.clone());
        log::info!(
            "epoch {} closed: invested {} A / {} B, returned {} A / {} B, hedge payout {}",
            report.index,
            report.invested_a,
            report.invested_b,
            report.returned_a,
            report.returned_b,
            report.hedge_payout
        );
        Ok(report)
    }

    /// Finalize if the manual steps have emptied the position
    fn settle_if_unwound<F: PriceFeed, H: HedgeProvider>(&mut self, cx: &Venue<'_, F, H>) -> Result<Option<EpochReport>> {
        if self.position.is_none()
            || cx.farm.staked() > 0
            || self.balances.get(Token::Lp) > 0
            || self.active_hedge_id(&cx.view()).is_some()
        {
            return Ok(None);
        }
        self.finalize(cx).map(Some)
    }

    /// Automatic close: unwind, sell rewards, rebalance, optionally enforce the
    /// loss bound, and return everything to the recipients.
    pub fn close_epoch<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        enforce_loss_check: bool,
    ) -> Result<(EpochReport, Vec<Transfer>)> {
        self.require_initialized()?;
        self.require_position()?;
        let lp = cx.farm.staked() + self.balances.get(Token::Lp);
        let (exp_a, exp_b) = cx.market.underlying(Token::A, Token::B, lp)?;
        let slippage = self.config.max_slippage_bps;
        self.unwind(cx, less_slippage(exp_a, slippage)?, less_slippage(exp_b, slippage)?)?;
        self.sell_rewards(cx)?;
        self.rebalance(cx)?;
        if enforce_loss_check {
            self.check_loss(cx.market.price(Token::A, Token::B)?)?;
        }
        let report = self.finalize(cx)?;
        Ok((report, self.drain_to_recipients()))
    }

    /// Governance unwind: no loss check, no reward sale, nothing returned
    pub fn liquidate_position<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        min_a: u128,
        min_b: u128,
    ) -> Result<EpochReport> {
        self.require_initialized()?;
        self.unwind(cx, min_a, min_b)?;
        self.finalize(cx)
    }

    // ------------------------------------------------------------------
    // Manual entry points
    // ------------------------------------------------------------------

    pub fn claim_reward_manually<F, H>(&mut self, cx: &mut Venue<'_, F, H>) -> Result<u128> {
        log::warn!("manual reward claim");
        self.claim_rewards(cx)
    }

    pub fn withdraw_lp_manually<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        amount: u128,
    ) -> Result<Option<EpochReport>> {
        log::warn!("manual LP withdrawal of {}", amount);
        self.withdraw_lp(cx, amount)?;
        self.settle_if_unwound(cx)
    }

    pub fn remove_liquidity_manually<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        amount: u128,
        min_a: u128,
        min_b: u128,
    ) -> Result<Option<EpochReport>> {
        log::warn!("manual liquidity removal of {}", amount);
        self.remove_liquidity(cx, amount, min_a, min_b)?;
        self.settle_if_unwound(cx)
    }

    pub fn close_hedge_manually<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
    ) -> Result<(u128, Option<EpochReport>)> {
        log::warn!("manual hedge close");
        let payout = self.close_hedge(cx)?;
        Ok((payout, self.settle_if_unwound(cx)?))
    }

    pub fn liquidate_position_manually<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        min_a: u128,
        min_b: u128,
    ) -> Result<EpochReport> {
        log::warn!("manual liquidation, min out {} A / {} B", min_a, min_b);
        self.liquidate_position(cx, min_a, min_b)
    }

    /// Operator swap along an arbitrary path ending in A or B. Paths may not
    /// buy the reward token, touch LP, or visit a token twice.
    pub fn swap_token_for_token_manually<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        path: &[Token],
        amount: u128,
        min_out: u128,
    ) -> Result<u128> {
        self.require_initialized()?;
        let (first, last) = match (path.first(), path.last()) {
            (Some(f), Some(l)) if path.len() >= 2 => (*f, *l),
            _ => return Err(JointError::InvalidSwapPath),
        };
        let buys_reward = path[1..].contains(&Token::Reward);
        let repeats = path.iter().enumerate().any(|(i, t)| path[..i].contains(t));
        if !matches!(last, Token::A | Token::B) || path.contains(&Token::Lp) || buys_reward || repeats {
            return Err(JointError::InvalidSwapPath);
        }
        log::warn!("manual swap of {} {} along {:?}", amount, first, path);
        self.swap_held(cx, path, amount, min_out)
    }

    /// Governance swap of a non-core token into A or B
    pub fn swap_token_for_token<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        from: Token,
        to: Token,
        amount: u128,
        min_out: u128,
    ) -> Result<u128> {
        self.require_initialized()?;
        if matches!(from, Token::A | Token::B | Token::Lp) || !matches!(to, Token::A | Token::B) {
            return Err(JointError::InvalidSwapPath);
        }
        let path: Vec<Token> = if cx.market.has_pair(from, to) {
            vec![from, to]
        } else {
            let via = if to == Token::A { Token::B } else { Token::A };
            if !cx.market.has_pair(from, via) {
                return Err(JointError::InvalidSwapPath);
            }
            vec![from, via, to]
        };
        self.swap_held(cx, &path, amount, min_out)
    }

    fn swap_held<F: PriceFeed, H: HedgeProvider>(
        &mut self,
        cx: &mut Venue<'_, F, H>,
        path: &[Token],
        amount: u128,
        min_out: u128,
    ) -> Result<u128> {
        self.balances.debit(path[0], amount)?;
        let receipt = cx.swap(path, amount, min_out)?;
        let out = receipt.amount_out();
        self.balances.credit(path[path.len() - 1], out)?;
        if self.position.is_some() {
            if path[0] == Token::Reward {
                self.totals.rewards_sold += amount;
            }
            self.track_fees(&receipt);
        }
        Ok(out)
    }

    /// Hand loose A and B to the recipients
    pub fn drain_to_recipients(&mut self) -> Vec<Transfer> {
        let mut transfers = Vec::with_capacity(2);
        for side in Side::BOTH {
            let token = side.token();
            let amount = self.balances.take_all(token);
            if amount == 0 {
                continue;
            }
            if self.position.is_some() {
                match side {
                    Side::A => self.totals.drained_a += amount,
                    Side::B => self.totals.drained_b += amount,
                }
            }
            transfers.push(Transfer {
                to: self.recipients[side.index()],
                token,
                amount,
            });
        }
        if matches!(self.state, JointState::PartiallyFunded { .. }) {
            self.state = JointState::Idle;
        }
        transfers
    }

    /// Return loose A/B; only the deposit of `side` when it is the one waiting
    pub fn withdraw_deposit(&mut self, side: Side) -> Result<Option<Transfer>> {
        match self.state {
            JointState::PartiallyFunded { side: s, .. } if s == side => {
                let amount = self.balances.take_all(side.token());
                self.state = JointState::Idle;
                Ok((amount > 0).then_some(Transfer {
                    to: self.recipients[side.index()],
                    token: side.token(),
                    amount,
                }))
            }
            _ => Err(JointError::InvalidState("no deposit waiting for this side")),
        }
    }

    /// Whole balance of a non-protected token, for governance
    pub fn sweep(&mut self, token: Token) -> Result<u128> {
        self.require_initialized()?;
        let protected = matches!(token, Token::A | Token::B | Token::Lp | Token::Reward);
        if protected && self.position.is_some() {
            return Err(JointError::ProtectedToken(token));
        }
        let amount = self.balances.take_all(token);
        if matches!(token, Token::A | Token::B) && matches!(self.state, JointState::PartiallyFunded { .. }) {
            self.state = JointState::Idle;
        }
        log::warn!("swept {} {}", amount, token);
        Ok(amount)
    }

    /// Tokens dropped on the joint from outside
    pub fn receive(&mut self, token: Token, amount: u128) -> Result<()> {
        self.balances.credit(token, amount)
    }

    // ------------------------------------------------------------------
    // Valuation
    // ------------------------------------------------------------------

    /// LP held loose plus LP staked in the farm
    pub fn lp_balance<F, H>(&self, view: &View<'_, F, H>) -> u128 {
        self.balances.get(Token::Lp) + if self.position.is_some() { view.farm.staked() } else { 0 }
    }

    /// Underlying `(A, B)` of all LP the joint owns
    pub fn balance_of_tokens_in_lp<F, H>(&self, view: &View<'_, F, H>) -> Result<(u128, u128)> {
        let lp = self.lp_balance(view);
        if lp == 0 {
            return Ok((0, 0));
        }
        view.market.underlying(Token::A, Token::B, lp)
    }

    pub fn pending_reward<F, H>(&self, view: &View<'_, F, H>) -> u128 {
        if self.position.is_some() {
            view.farm.pending(view.now)
        } else {
            0
        }
    }

    /// Everything the joint owns, valued in B at the pool price
    pub fn total_value_in_b<F: PriceFeed, H: HedgeProvider>(&self, view: &View<'_, F, H>) -> Result<u128> {
        let price = view.market.price(Token::A, Token::B)?;
        let (lp_a, lp_b) = self.balance_of_tokens_in_lp(view)?;
        let mut value = value_in_b(self.balances.get(Token::A) + lp_a, self.balances.get(Token::B) + lp_b, price)?;

        if let Some(id) = self.active_hedge_id(view) {
            if let Ok(oracle) = view.feed.latest_price() {
                value += view.hedge.current_payout(id, oracle, view.now)?;
            }
        }

        let rewards = self.balances.get(Token::Reward) + self.pending_reward(view);
        if rewards > 0 {
            let in_b = if view.market.has_pair(Token::Reward, Token::B) {
                view.market.amounts_out(&[Token::Reward, Token::B], rewards).map(|v| v[1])
            } else {
                view.market
                    .amounts_out(&[Token::Reward, Token::A], rewards)
                    .and_then(|v| Ok(mul_div(v[1], price, SCALE)?))
            };
            value += in_b.unwrap_or(0);
        }
        Ok(value)
    }

    /// Share of the joint attributable to `side`, in that side's token
    pub fn estimated_total_assets_in_token<F: PriceFeed, H: HedgeProvider>(
        &self,
        view: &View<'_, F, H>,
        side: Side,
    ) -> Result<u128> {
        let pos = match &self.position {
            Some(pos) => pos,
            None => return Ok(self.balances.get(side.token())),
        };
        let price = view.market.price(Token::A, Token::B)?;
        let total = self.total_value_in_b(view)?;
        let inv_a = mul_div(pos.invested_a, price, SCALE)?;
        let inv_b = pos.invested_b;
        let denom = inv_a + inv_b;
        if denom == 0 {
            return Ok(0);
        }
        match side {
            Side::A => Ok(mul_div(mul_div(total, inv_a, denom)?, SCALE, price)?),
            Side::B => Ok(mul_div(total, inv_b, denom)?),
        }
    }
}
