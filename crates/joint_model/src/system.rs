//! The whole protocol in one value: vaults, providers, joint, pairs, farm,
//! hedge pool, price feed, wallets and the clock.
//!
//! Every public mutating method is one transaction. It checks the caller's
//! role, runs against the live state and restores a snapshot if anything
//! fails, so an `Err` leaves the system exactly as it was.

use std::collections::BTreeMap;

use amm_model::{BPS_SCALE, MINIMUM_LIQUIDITY};

use crate::farm::{FarmConfig, RewardFarm};
use crate::hedge::{HedgePoolConfig, HedgeProvider, HedgilPool};
use crate::joint::{EpochReport, Joint, JointConfig, JointState, Recipient, Transfer, Venue, View};
use crate::market::Market;
use crate::oracle::{MockAggregator, PriceFeed};
use crate::provider::{liquidate_all, prepare_return, HealthCheck, ProviderConfig, ProviderStrategy};
use crate::roles::{Actor, Operation, Roles};
use crate::token::{Balances, Side, Token};
use crate::vault::{Vault, VaultConfig};
use crate::{JointError, Result};

/// Wallet that seeds the pairs and owns their LP
pub const LIQUIDITY_PROVIDER: Actor = Actor(100);

/// Holder that can receive an airdrop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Wallet(Actor),
    Provider(Side),
    Joint,
}

/// Initial state of a system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemParams {
    pub start_time: u64,
    pub pool_a: u128,
    pub pool_b: u128,
    pub pool_fee_bps: u128,
    /// `(reward, b)` seeding a Reward/B pair
    pub reward_b_pool: Option<(u128, u128)>,
    /// `(reward, a)` seeding a Reward/A pair
    pub reward_a_pool: Option<(u128, u128)>,
    pub farm: FarmConfig,
    pub farm_funding: u128,
    pub hedge_pool: HedgePoolConfig,
    pub hedge_liquidity: u128,
    pub vault: VaultConfig,
    pub debt_ratio_bps: u128,
    pub provider: ProviderConfig,
    pub joint: JointConfig,
}

impl Default for SystemParams {
    fn default() -> Self {
        Self {
            start_time: 1_000_000,
            pool_a: 1_000_000_000_000,
            pool_b: 2_000_000_000_000_000,
            pool_fee_bps: 30,
            reward_b_pool: Some((1_000_000_000_000, 1_000_000_000_000)),
            reward_a_pool: None,
            farm: FarmConfig::default(),
            farm_funding: 1_000_000_000_000_000,
            hedge_pool: HedgePoolConfig::default(),
            hedge_liquidity: 10_000_000_000_000_000,
            vault: VaultConfig::default(),
            debt_ratio_bps: BPS_SCALE,
            provider: ProviderConfig::default(),
            joint: JointConfig::default(),
        }
    }
}

/// What one provider harvest did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestReport {
    pub gain: u128,
    pub loss: u128,
    pub debt_payment: u128,
    /// Vault → provider
    pub credit_received: u128,
    /// Provider → vault
    pub repaid: u128,
    /// Want sent into the joint
    pub invested: u128,
    pub closed_epoch: Option<EpochReport>,
    pub opened_epoch: Option<u64>,
}

pub type DefaultSystem = JointSystem<MockAggregator, HedgilPool>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointSystem<F = MockAggregator, H = HedgilPool> {
    now: u64,
    pub roles: Roles,
    market: Market,
    farm: RewardFarm,
    hedge: H,
    feed: F,
    vaults: [Vault; 2],
    providers: [ProviderStrategy; 2],
    /// Providers replaced by migration, kept so their (empty) ledgers stay visible
    retired: Vec<ProviderStrategy>,
    joint: Joint,
    wallets: BTreeMap<Actor, Balances>,
}

impl DefaultSystem {
    /// Mock aggregator primed with the seeded pool price and a fresh hedge pool
    pub fn with_defaults(params: SystemParams) -> Result<Self> {
        let price = amm_model::spot_price(params.pool_a, params.pool_b)?;
        let hedge = HedgilPool::new(params.hedge_pool);
        Self::new(params, MockAggregator::new(price), hedge)
    }
}

impl<H: HedgeProvider> JointSystem<MockAggregator, H> {
    /// Operator price push on the mock aggregator
    pub fn set_oracle_price(&mut self, price: u128) {
        self.feed.set_price(price);
    }
}

impl<F, H> JointSystem<F, H>
where
    F: PriceFeed + Clone,
    H: HedgeProvider + Clone,
{
    pub fn new(params: SystemParams, feed: F, mut hedge: H) -> Result<Self> {
        params.joint.validate()?;
        let now = params.start_time;
        let mut market = Market::new();
        let mut wallets: BTreeMap<Actor, Balances> = BTreeMap::new();

        market.add_pair(Token::A, Token::B, params.pool_fee_bps)?;
        let lp = market.add_liquidity(Token::A, Token::B, params.pool_a, params.pool_b)?;
        wallets.entry(LIQUIDITY_PROVIDER).or_default().credit(Token::Lp, lp)?;
        // LP of the reward pairs is not modelled as a token
        if let Some((reward, b)) = params.reward_b_pool {
            market.add_pair(Token::Reward, Token::B, params.pool_fee_bps)?;
            market.add_liquidity(Token::Reward, Token::B, reward, b)?;
        }
        if let Some((reward, a)) = params.reward_a_pool {
            market.add_pair(Token::Reward, Token::A, params.pool_fee_bps)?;
            market.add_liquidity(Token::Reward, Token::A, reward, a)?;
        }

        let mut farm = RewardFarm::new(params.farm, now);
        farm.fund(params.farm_funding, now)?;

        let mut feed = feed;
        feed.observe(market.price(Token::A, Token::B)?);

        if params.hedge_liquidity > 0 {
            hedge.provide_liquidity(params.hedge_liquidity)?;
        }

        let vaults = [
            Vault::new(Token::A, params.vault, params.debt_ratio_bps, now)?,
            Vault::new(Token::B, params.vault, params.debt_ratio_bps, now)?,
        ];
        let providers = [
            ProviderStrategy::new(Side::A, params.provider),
            ProviderStrategy::new(Side::B, params.provider),
        ];

        Ok(Self {
            now,
            roles: Roles::standard(),
            market,
            farm,
            hedge,
            feed,
            vaults,
            providers,
            retired: Vec::new(),
            joint: Joint::deploy(params.joint)?,
            wallets,
        })
    }

    fn atomic<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.clone();
        let result = op(self);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }

    fn guarded<T>(&mut self, caller: Actor, what: Operation, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.roles.require(caller, what)?;
        self.atomic(op)
    }

    fn split(&mut self) -> (&mut Joint, Venue<'_, F, H>) {
        (
            &mut self.joint,
            Venue {
                market: &mut self.market,
                farm: &mut self.farm,
                hedge: &mut self.hedge,
                feed: &mut self.feed,
                now: self.now,
            },
        )
    }

    fn view(&self) -> View<'_, F, H> {
        View {
            market: &self.market,
            farm: &self.farm,
            hedge: &self.hedge,
            feed: &self.feed,
            now: self.now,
        }
    }

    fn wallet_mut(&mut self, actor: Actor) -> &mut Balances {
        self.wallets.entry(actor).or_default()
    }

    fn deliver(&mut self, transfers: Vec<Transfer>) -> Result<()> {
        for t in transfers {
            match t.to {
                Recipient::Provider(side) => self.providers[side.index()].balances.credit(t.token, t.amount)?,
                Recipient::Wallet(actor) => self.wallet_mut(actor).credit(t.token, t.amount)?,
            }
        }
        Ok(())
    }

    fn observe_pool(&mut self) -> Result<()> {
        let price = self.market.price(Token::A, Token::B)?;
        self.feed.observe(price);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Clock, wallets, market
    // ------------------------------------------------------------------

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn advance(&mut self, secs: u64) {
        self.now += secs;
    }

    /// Create tokens out of nothing (test faucet)
    pub fn mint_to(&mut self, actor: Actor, token: Token, amount: u128) -> Result<()> {
        if token == Token::Lp {
            return Err(JointError::InvalidParameter("LP is only minted by the pair"));
        }
        self.wallet_mut(actor).credit(token, amount)
    }

    pub fn balance_of(&self, actor: Actor, token: Token) -> u128 {
        self.wallets.get(&actor).map_or(0, |w| w.get(token))
    }

    /// Router swap from a wallet
    pub fn swap(&mut self, actor: Actor, path: &[Token], amount: u128, min_out: u128) -> Result<u128> {
        self.atomic(|s| {
            let first = *path.first().ok_or(JointError::InvalidSwapPath)?;
            let last = *path.last().ok_or(JointError::InvalidSwapPath)?;
            s.wallet_mut(actor).debit(first, amount)?;
            let receipt = s.market.swap_exact(path, amount, min_out)?;
            s.wallet_mut(actor).credit(last, receipt.amount_out())?;
            s.observe_pool()?;
            Ok(receipt.amount_out())
        })
    }

    /// Plain transfer from a wallet to any holder
    pub fn airdrop(&mut self, from: Actor, to: Holder, token: Token, amount: u128) -> Result<()> {
        self.atomic(|s| {
            s.wallet_mut(from).debit(token, amount)?;
            match to {
                Holder::Wallet(actor) => s.wallet_mut(actor).credit(token, amount),
                Holder::Provider(side) => s.providers[side.index()].balances.credit(token, amount),
                Holder::Joint => s.joint.receive(token, amount),
            }
        })
    }

    /// Push the pool price into the feed
    pub fn sync_price(&mut self) -> Result<()> {
        let price = self.market.price(Token::A, Token::B)?;
        self.feed.push_price(price)
    }

    // ------------------------------------------------------------------
    // Vaults
    // ------------------------------------------------------------------

    pub fn deposit(&mut self, actor: Actor, side: Side, amount: u128) -> Result<u128> {
        self.atomic(|s| {
            s.wallet_mut(actor).debit(side.token(), amount)?;
            let now = s.now;
            s.vaults[side.index()].deposit(actor, amount, now)
        })
    }

    pub fn withdraw(&mut self, actor: Actor, side: Side, shares: u128) -> Result<u128> {
        self.atomic(|s| {
            let now = s.now;
            let amount = s.vaults[side.index()].withdraw(actor, shares, now)?;
            s.wallet_mut(actor).credit(side.token(), amount)?;
            Ok(amount)
        })
    }

    pub fn update_debt_ratio(&mut self, caller: Actor, side: Side, debt_ratio: u128) -> Result<()> {
        self.guarded(caller, Operation::ManageVault, |s| {
            s.vaults[side.index()].update_debt_ratio(debt_ratio)
        })
    }

    pub fn set_vault_shutdown(&mut self, caller: Actor, side: Side, active: bool) -> Result<()> {
        self.guarded(caller, Operation::EmergencyExit, |s| {
            s.vaults[side.index()].set_emergency_shutdown(active);
            Ok(())
        })
    }

    pub fn price_per_share(&self, side: Side) -> Result<u128> {
        self.vaults[side.index()].price_per_share(self.now)
    }

    // ------------------------------------------------------------------
    // Providers
    // ------------------------------------------------------------------

    /// Provider sends want to (and receives from) the joint
    fn linked(&self, side: Side) -> bool {
        self.providers[side.index()].joint_linked && self.joint.recipient(side) == Recipient::Provider(side)
    }

    pub fn estimated_total_assets(&self, side: Side) -> Result<u128> {
        let want = self.providers[side.index()].balance_of_want();
        if !self.linked(side) {
            return Ok(want);
        }
        Ok(want + self.joint.estimated_total_assets_in_token(&self.view(), side)?)
    }

    pub fn balance_of_want(&self, side: Side) -> u128 {
        self.providers[side.index()].balance_of_want()
    }

    fn wants_out(&self, side: Side) -> bool {
        let p = &self.providers[side.index()];
        p.emergency_exit
            || p.config.take_profit
            || !p.config.invest_want
            || self.vaults[side.index()].recalls_all()
    }

    pub fn harvest_trigger(&self, side: Side) -> Result<bool> {
        let p = &self.providers[side.index()];
        if !self.linked(side) {
            return Ok(false);
        }
        let view = self.view();
        if self.joint.state() == JointState::Open {
            return Ok(self.joint.should_end_epoch(&view) || p.emergency_exit);
        }
        if p.emergency_exit {
            return Ok(self.estimated_total_assets(side)? > 0);
        }
        let waiting_on_us = match self.joint.state() {
            JointState::PartiallyFunded { side: funded, .. } => funded != side,
            JointState::Idle => true,
            _ => false,
        };
        Ok(waiting_on_us && self.joint.accepts_deposits() && p.config.invest_want && p.balance_of_want() > 0)
    }

    pub fn harvest(&mut self, caller: Actor, side: Side) -> Result<HarvestReport> {
        self.guarded(caller, Operation::Harvest, |s| s.harvest_inner(side))
    }

    fn harvest_inner(&mut self, side: Side) -> Result<HarvestReport> {
        let i = side.index();
        let mut report = HarvestReport::default();
        let linked = self.linked(side);
        let emergency = self.providers[i].emergency_exit;

        // 1. Get capital back from the joint when the epoch is over or we want out
        if linked {
            match self.joint.state() {
                JointState::Open => {
                    if self.joint.should_end_epoch(&self.view()) || self.wants_out(side) {
                        let (joint, mut cx) = self.split();
                        let (epoch, transfers) = joint.close_epoch(&mut cx, !emergency)?;
                        self.deliver(transfers)?;
                        report.closed_epoch = Some(epoch);
                    }
                }
                JointState::Idle => {
                    let transfers = self.joint.drain_to_recipients();
                    self.deliver(transfers)?;
                }
                JointState::PartiallyFunded { side: funded, .. } if funded == side => {
                    if self.wants_out(side) {
                        if let Some(t) = self.joint.withdraw_deposit(side)? {
                            self.deliver(vec![t])?;
                        }
                    }
                }
                _ => {}
            }
        }

        // 2. Report to the vault
        let realize = !linked || !matches!(self.joint.state(), JointState::Open | JointState::Unwinding);
        let total_assets = self.estimated_total_assets(side)?;
        let (total_debt, debt_outstanding) = {
            let v = &self.vaults[i];
            (v.strategy.total_debt, v.debt_outstanding()?)
        };
        let liquid = self.providers[i].balance_of_want();
        let settlement = if emergency && realize {
            liquidate_all(liquid, debt_outstanding)
        } else {
            prepare_return(total_assets, liquid, total_debt, debt_outstanding, realize)
        };
        let config = self.providers[i].config;
        if config.do_health_check {
            config.health.check(settlement.gain, settlement.loss, total_debt)?;
        }
        let now = self.now;
        let outcome = self.vaults[i].report(settlement.gain, settlement.loss, settlement.debt_payment, now)?;
        let want = side.token();
        self.providers[i].balances.debit(want, outcome.received)?;
        self.providers[i].balances.credit(want, outcome.sent)?;
        report.gain = settlement.gain;
        report.loss = settlement.loss;
        report.debt_payment = settlement.debt_payment;
        report.credit_received = outcome.sent;
        report.repaid = outcome.received;

        // 3. Put idle want to work
        let amount = self.providers[i].balance_of_want();
        let recalled = self.vaults[i].recalls_all();
        if linked && config.invest_want && !emergency && !recalled && amount > 0 && self.joint.accepts_deposits() {
            self.providers[i].balances.debit(want, amount)?;
            let ready = self.joint.fund(side, amount)?;
            report.invested = amount;
            if ready {
                let (joint, mut cx) = self.split();
                let transfers = joint.open_epoch(&mut cx)?;
                self.deliver(transfers)?;
                report.opened_epoch = self.joint.position().map(|p| p.epoch.index);
            }
        }

        log::info!(
            "provider {} harvest: gain {} loss {} invested {}",
            side,
            report.gain,
            report.loss,
            report.invested
        );
        Ok(report)
    }

    fn configure_provider(
        &mut self,
        caller: Actor,
        side: Side,
        update: impl FnOnce(&mut ProviderStrategy),
    ) -> Result<()> {
        self.guarded(caller, Operation::Configure, |s| {
            update(&mut s.providers[side.index()]);
            Ok(())
        })
    }

    pub fn set_invest_want(&mut self, caller: Actor, side: Side, invest: bool) -> Result<()> {
        self.configure_provider(caller, side, |p| p.config.invest_want = invest)
    }

    pub fn set_take_profit(&mut self, caller: Actor, side: Side, take_profit: bool) -> Result<()> {
        self.configure_provider(caller, side, |p| p.config.take_profit = take_profit)
    }

    pub fn set_do_health_check(&mut self, caller: Actor, side: Side, enabled: bool) -> Result<()> {
        self.configure_provider(caller, side, |p| p.config.do_health_check = enabled)
    }

    pub fn set_health_limits(&mut self, caller: Actor, side: Side, limits: HealthCheck) -> Result<()> {
        self.configure_provider(caller, side, |p| p.config.health = limits)
    }

    /// Link or unlink the provider from the joint (`setJoint`)
    pub fn set_joint_link(&mut self, caller: Actor, side: Side, linked: bool) -> Result<()> {
        self.configure_provider(caller, side, |p| p.joint_linked = linked)
    }

    /// Next harvest divests everything and pays the vault back in full
    pub fn set_emergency_exit(&mut self, caller: Actor, side: Side) -> Result<()> {
        self.guarded(caller, Operation::EmergencyExit, |s| {
            log::warn!("provider {} entering emergency exit", side);
            s.providers[side.index()].emergency_exit = true;
            s.vaults[side.index()].revoke_strategy();
            Ok(())
        })
    }

    /// Replace the provider of `side` with a fresh clone that takes over its
    /// want balance and vault debt record
    pub fn migrate_provider(&mut self, caller: Actor, side: Side) -> Result<()> {
        self.guarded(caller, Operation::Migrate, |s| {
            let i = side.index();
            if matches!(s.joint.state(), JointState::PartiallyFunded { side: funded, .. } if funded == side) {
                return Err(JointError::InvalidState("provider has a deposit waiting in the joint"));
            }
            let mut next = s.providers[i].migrated();
            let old = &mut s.providers[i];
            let want = old.balances.take_all(side.token());
            next.balances.credit(side.token(), want)?;
            let old = core::mem::replace(&mut s.providers[i], next);
            s.retired.push(old);
            s.joint.set_recipient(side, Recipient::Provider(side))?;
            log::info!("provider {} migrated to generation {}", side, s.providers[i].generation);
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Joint: governance
    // ------------------------------------------------------------------

    /// Close an epoch that should end, open one that can start, or hand back
    /// leftovers
    pub fn joint_harvest(&mut self, caller: Actor) -> Result<Option<EpochReport>> {
        self.guarded(caller, Operation::Harvest, |s| match s.joint.state() {
            JointState::Open if s.joint.should_end_epoch(&s.view()) => {
                let (joint, mut cx) = s.split();
                let (epoch, transfers) = joint.close_epoch(&mut cx, true)?;
                s.deliver(transfers)?;
                Ok(Some(epoch))
            }
            JointState::PartiallyFunded { .. }
                if s.joint.balance_of(Token::A) > 0 && s.joint.balance_of(Token::B) > 0 =>
            {
                let (joint, mut cx) = s.split();
                let transfers = joint.open_epoch(&mut cx)?;
                s.deliver(transfers)?;
                Ok(None)
            }
            JointState::Idle => {
                let transfers = s.joint.drain_to_recipients();
                s.deliver(transfers)?;
                Ok(None)
            }
            _ => Ok(None),
        })
    }

    pub fn liquidate_position(&mut self, caller: Actor) -> Result<EpochReport> {
        self.guarded(caller, Operation::Liquidate, |s| {
            log::warn!("liquidating joint position");
            let (joint, mut cx) = s.split();
            joint.liquidate_position(&mut cx, 0, 0)
        })
    }

    pub fn return_loose_to_providers(&mut self, caller: Actor) -> Result<()> {
        self.guarded(caller, Operation::ReturnLoose, |s| {
            let transfers = s.joint.drain_to_recipients();
            s.deliver(transfers)
        })
    }

    pub fn swap_token_for_token(
        &mut self,
        caller: Actor,
        from: Token,
        to: Token,
        amount: u128,
        min_out: u128,
    ) -> Result<u128> {
        self.guarded(caller, Operation::SwapRewards, |s| {
            let (joint, mut cx) = s.split();
            joint.swap_token_for_token(&mut cx, from, to, amount, min_out)
        })
    }

    /// Move the joint's whole balance of `token` to the caller
    pub fn sweep(&mut self, caller: Actor, token: Token) -> Result<u128> {
        self.guarded(caller, Operation::Sweep, |s| {
            let amount = s.joint.sweep(token)?;
            s.wallet_mut(caller).credit(token, amount)?;
            Ok(amount)
        })
    }

    pub fn set_provider(&mut self, caller: Actor, side: Side, recipient: Recipient) -> Result<()> {
        self.guarded(caller, Operation::SetProvider, |s| s.joint.set_recipient(side, recipient))
    }

    fn configure_joint(&mut self, caller: Actor, update: impl FnOnce(&mut Joint) -> Result<()>) -> Result<()> {
        self.guarded(caller, Operation::Configure, |s| update(&mut s.joint))
    }

    pub fn set_hedge_budget(&mut self, caller: Actor, bps: u128) -> Result<()> {
        self.configure_joint(caller, |j| j.set_hedge_budget(bps))
    }

    pub fn set_hedging_period(&mut self, caller: Actor, period: u64) -> Result<()> {
        self.configure_joint(caller, |j| j.set_hedging_period(period))
    }

    pub fn set_protection_range(&mut self, caller: Actor, bps: u128) -> Result<()> {
        self.configure_joint(caller, |j| j.set_protection_range(bps))
    }

    pub fn set_min_time_to_maturity(&mut self, caller: Actor, secs: u64) -> Result<()> {
        self.configure_joint(caller, |j| j.set_min_time_to_maturity(secs))
    }

    pub fn set_max_percentage_loss(&mut self, caller: Actor, bps: u128) -> Result<()> {
        self.configure_joint(caller, |j| j.set_max_percentage_loss(bps))
    }

    pub fn set_max_price_deviation(&mut self, caller: Actor, bps: u128) -> Result<()> {
        self.configure_joint(caller, |j| j.set_max_price_deviation(bps))
    }

    pub fn set_reinvest(&mut self, caller: Actor, reinvest: bool) -> Result<()> {
        self.configure_joint(caller, |j| j.set_reinvest(reinvest))
    }

    pub fn set_hedging_enabled(&mut self, caller: Actor, enabled: bool, force: bool) -> Result<()> {
        self.guarded(caller, Operation::Configure, |s| {
            let view = View {
                market: &s.market,
                farm: &s.farm,
                hedge: &s.hedge,
                feed: &s.feed,
                now: s.now,
            };
            s.joint.set_hedging_enabled(&view, enabled, force)
        })
    }

    pub fn force_end_epoch(&mut self, caller: Actor) -> Result<()> {
        self.configure_joint(caller, |j| j.force_end_epoch())
    }

    /// Uninitialized-config copy of the joint for a fresh deployment
    pub fn clone_joint(&mut self, caller: Actor) -> Result<Joint> {
        self.guarded(caller, Operation::CloneJoint, |s| s.joint.clone_joint())
    }

    /// Point both providers at a new joint. The old one must be empty.
    pub fn replace_joint(&mut self, caller: Actor, joint: Joint) -> Result<Joint> {
        self.guarded(caller, Operation::Migrate, |s| {
            if s.joint.position().is_some()
                || s.joint.balance_of(Token::A) > 0
                || s.joint.balance_of(Token::B) > 0
            {
                return Err(JointError::InvalidState("current joint still holds funds"));
            }
            if joint.position().is_some() {
                return Err(JointError::InvalidState("replacement joint has a position"));
            }
            log::info!("joint replaced");
            Ok(core::mem::replace(&mut s.joint, joint))
        })
    }

    // ------------------------------------------------------------------
    // Joint: manual operation
    // ------------------------------------------------------------------

    pub fn claim_reward_manually(&mut self, caller: Actor) -> Result<u128> {
        self.guarded(caller, Operation::ManualOperation, |s| {
            let (joint, mut cx) = s.split();
            joint.claim_reward_manually(&mut cx)
        })
    }

    pub fn withdraw_lp_manually(&mut self, caller: Actor, amount: u128) -> Result<Option<EpochReport>> {
        self.guarded(caller, Operation::ManualOperation, |s| {
            let (joint, mut cx) = s.split();
            joint.withdraw_lp_manually(&mut cx, amount)
        })
    }

    pub fn remove_liquidity_manually(
        &mut self,
        caller: Actor,
        amount: u128,
        min_a: u128,
        min_b: u128,
    ) -> Result<Option<EpochReport>> {
        self.guarded(caller, Operation::ManualOperation, |s| {
            let (joint, mut cx) = s.split();
            joint.remove_liquidity_manually(&mut cx, amount, min_a, min_b)
        })
    }

    pub fn close_hedge_manually(&mut self, caller: Actor) -> Result<(u128, Option<EpochReport>)> {
        self.guarded(caller, Operation::ManualOperation, |s| {
            let (joint, mut cx) = s.split();
            joint.close_hedge_manually(&mut cx)
        })
    }

    pub fn return_loose_to_providers_manually(&mut self, caller: Actor) -> Result<()> {
        self.guarded(caller, Operation::ManualOperation, |s| {
            log::warn!("manual return of loose tokens");
            let transfers = s.joint.drain_to_recipients();
            s.deliver(transfers)
        })
    }

    pub fn liquidate_position_manually(&mut self, caller: Actor, min_a: u128, min_b: u128) -> Result<EpochReport> {
        self.guarded(caller, Operation::ManualOperation, |s| {
            let (joint, mut cx) = s.split();
            joint.liquidate_position_manually(&mut cx, min_a, min_b)
        })
    }

    pub fn swap_token_for_token_manually(
        &mut self,
        caller: Actor,
        path: &[Token],
        amount: u128,
        min_out: u128,
    ) -> Result<u128> {
        self.guarded(caller, Operation::ManualOperation, |s| {
            let (joint, mut cx) = s.split();
            joint.swap_token_for_token_manually(&mut cx, path, amount, min_out)
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn joint(&self) -> &Joint {
        &self.joint
    }

    pub fn vault(&self, side: Side) -> &Vault {
        &self.vaults[side.index()]
    }

    pub fn provider(&self, side: Side) -> &ProviderStrategy {
        &self.providers[side.index()]
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn farm(&self) -> &RewardFarm {
        &self.farm
    }

    pub fn hedge(&self) -> &H {
        &self.hedge
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    /// Pool price of A in B
    pub fn price(&self) -> Result<u128> {
        self.market.price(Token::A, Token::B)
    }

    pub fn reserves(&self) -> Result<(u128, u128)> {
        self.market.reserves(Token::A, Token::B)
    }

    pub fn should_start_epoch(&self) -> bool {
        self.joint.should_start_epoch()
    }

    pub fn should_end_epoch(&self) -> bool {
        self.joint.should_end_epoch(&self.view())
    }

    pub fn time_to_maturity(&self) -> Option<u64> {
        self.joint.time_to_maturity(&self.view())
    }

    pub fn active_hedge_id(&self) -> Option<u64> {
        self.joint.active_hedge_id(&self.view())
    }

    pub fn pending_reward(&self) -> u128 {
        self.joint.pending_reward(&self.view())
    }

    /// `(A, B)` underlying all LP the joint owns
    pub fn balance_of_tokens_in_lp(&self) -> Result<(u128, u128)> {
        self.joint.balance_of_tokens_in_lp(&self.view())
    }

    pub fn balance_of_stake(&self) -> u128 {
        if self.joint.position().is_some() {
            self.farm.staked()
        } else {
            0
        }
    }

    pub fn joint_estimated_total_assets(&self, side: Side) -> Result<u128> {
        self.joint.estimated_total_assets_in_token(&self.view(), side)
    }

    pub fn hedge_payout(&self) -> Result<u128> {
        match self.active_hedge_id() {
            Some(id) => Ok(self.hedge.current_payout(id, self.feed.latest_price()?, self.now)?),
            None => Ok(0),
        }
    }

    /// Every unit of `token` held anywhere in the system. Constant across all
    /// operations except `mint_to`.
    pub fn total_supply_of(&self, token: Token) -> u128 {
        let wallets: u128 = self.wallets.values().map(|w| w.get(token)).sum();
        let vaults: u128 = self
            .vaults
            .iter()
            .filter(|v| v.token == token)
            .map(|v| v.idle())
            .sum();
        let providers: u128 = self
            .providers
            .iter()
            .chain(self.retired.iter())
            .map(|p| p.balances.get(token))
            .sum();
        let mut total = wallets + vaults + providers + self.joint.balance_of(token) + self.market.reserve_of(token);
        match token {
            Token::Lp => {
                total += self.farm.staked();
                if self.market.pair(Token::A, Token::B).map_or(false, |p| p.total_supply > 0) {
                    total += MINIMUM_LIQUIDITY;
                }
            }
            Token::Reward => total += self.farm.reward_held(),
            Token::B => total += self.hedge.liquidity(),
            _ => {}
        }
        total
    }
}
