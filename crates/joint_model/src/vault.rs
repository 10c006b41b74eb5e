//! Single-strategy vault accounting: shares, debt limits, gain/loss reports and
//! linear unlocking of reported profit.

use std::collections::BTreeMap;

use amm_model::{mul_div, BPS_SCALE, SCALE};

use crate::roles::Actor;
use crate::token::Token;
use crate::{JointError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultConfig {
    /// Seconds over which a reported gain becomes part of the share price
    pub profit_unlock_secs: u64,
    pub deposit_limit: u128,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            profit_unlock_secs: 6 * 3600,
            deposit_limit: u128::MAX,
        }
    }
}

/// Per-strategy debt record (`vault.strategies(strategy)`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyParams {
    pub debt_ratio: u128,
    pub total_debt: u128,
    pub total_gain: u128,
    pub total_loss: u128,
    pub activation: u64,
    pub last_report: u64,
}

/// Token movement a report settles, from the vault's point of view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    /// Vault → strategy
    pub sent: u128,
    /// Strategy → vault
    pub received: u128,
    /// What the strategy still owes after this report
    pub debt_outstanding: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    pub token: Token,
    pub config: VaultConfig,
    pub strategy: StrategyParams,
    /// Tokens sitting in the vault
    idle: u128,
    total_supply: u128,
    shares: BTreeMap<Actor, u128>,
    locked_profit: u128,
    last_report: u64,
    emergency_shutdown: bool,
}

impl Vault {
    /// Vault with one strategy allowed `debt_ratio` of its assets
    pub fn new(token: Token, config: VaultConfig, debt_ratio: u128, now: u64) -> Result<Self> {
        if debt_ratio > BPS_SCALE {
            return Err(JointError::InvalidParameter("debt ratio above 100%"));
        }
        Ok(Self {
            token,
            config,
            strategy: StrategyParams {
                debt_ratio,
                total_debt: 0,
                total_gain: 0,
                total_loss: 0,
                activation: now,
                last_report: now,
            },
            idle: 0,
            total_supply: 0,
            shares: BTreeMap::new(),
            locked_profit: 0,
            last_report: now,
            emergency_shutdown: false,
        })
    }

    pub fn idle(&self) -> u128 {
        self.idle
    }

    pub fn total_supply(&self) -> u128 {
        self.total_supply
    }

    pub fn shares_of(&self, actor: Actor) -> u128 {
        self.shares.get(&actor).copied().unwrap_or(0)
    }

    pub fn total_assets(&self) -> u128 {
        self.idle + self.strategy.total_debt
    }

    pub fn locked_profit(&self, now: u64) -> u128 {
        let unlock = self.config.profit_unlock_secs as u128;
        let elapsed = now.saturating_sub(self.last_report) as u128;
        if unlock == 0 || elapsed >= unlock {
            return 0;
        }
        self.locked_profit - self.locked_profit * elapsed / unlock
    }

    fn free_funds(&self, now: u64) -> u128 {
        self.total_assets().saturating_sub(self.locked_profit(now))
    }

    /// Value of one share, scaled by `SCALE`
    pub fn price_per_share(&self, now: u64) -> Result<u128> {
        if self.total_supply == 0 {
            return Ok(SCALE);
        }
        Ok(mul_div(self.free_funds(now), SCALE, self.total_supply)?)
    }

    pub fn deposit(&mut self, actor: Actor, amount: u128, now: u64) -> Result<u128> {
        if self.emergency_shutdown {
            return Err(JointError::VaultShutdown);
        }
        if amount == 0 {
            return Err(JointError::InvalidParameter("deposit amount"));
        }
        if self.total_assets().saturating_add(amount) > self.config.deposit_limit {
            return Err(JointError::DepositLimit);
        }
        let free = self.free_funds(now);
        let shares = if self.total_supply == 0 || free == 0 {
            amount
        } else {
            mul_div(amount, self.total_supply, free)?
        };
        if shares == 0 {
            return Err(JointError::InvalidParameter("deposit too small"));
        }
        self.idle += amount;
        self.total_supply += shares;
        *self.shares.entry(actor).or_insert(0) += shares;
        Ok(shares)
    }

    /// Burn `shares` for tokens. Only idle funds are withdrawable; capital
    /// deployed in the strategy comes back through reports.
    pub fn withdraw(&mut self, actor: Actor, shares: u128, now: u64) -> Result<u128> {
        let owned = self.shares_of(actor);
        if shares == 0 || shares > owned {
            return Err(JointError::InsufficientShares {
                requested: shares,
                owned,
            });
        }
        let amount = mul_div(shares, self.free_funds(now), self.total_supply)?;
        if amount > self.idle {
            return Err(JointError::InsufficientVaultLiquidity {
                requested: amount,
                idle: self.idle,
            });
        }
        self.idle -= amount;
        self.total_supply -= shares;
        if owned == shares {
            self.shares.remove(&actor);
        } else {
            self.shares.insert(actor, owned - shares);
        }
        Ok(amount)
    }

    pub fn update_debt_ratio(&mut self, debt_ratio: u128) -> Result<()> {
        if debt_ratio > BPS_SCALE {
            return Err(JointError::InvalidParameter("debt ratio above 100%"));
        }
        self.strategy.debt_ratio = debt_ratio;
        Ok(())
    }

    /// Strategy entered emergency exit: it owes everything back
    pub fn revoke_strategy(&mut self) {
        self.strategy.debt_ratio = 0;
    }

    pub fn set_emergency_shutdown(&mut self, active: bool) {
        self.emergency_shutdown = active;
    }

    fn debt_limit(&self) -> Result<u128> {
        Ok(mul_div(self.total_assets(), self.strategy.debt_ratio, BPS_SCALE)?)
    }

    pub fn credit_available(&self) -> Result<u128> {
        if self.emergency_shutdown {
            return Ok(0);
        }
        let limit = self.debt_limit()?;
        if self.strategy.total_debt >= limit {
            return Ok(0);
        }
        Ok((limit - self.strategy.total_debt).min(self.idle))
    }

    pub fn debt_outstanding(&self) -> Result<u128> {
        if self.emergency_shutdown {
            return Ok(self.strategy.total_debt);
        }
        Ok(self.strategy.total_debt.saturating_sub(self.debt_limit()?))
    }

    /// The vault wants all of the strategy's debt back
    pub fn recalls_all(&self) -> bool {
        self.strategy.total_debt > 0 && (self.emergency_shutdown || self.strategy.debt_ratio == 0)
    }

    fn report_loss(&mut self, loss: u128) -> Result<()> {
        let debt = self.strategy.total_debt;
        if loss > debt {
            return Err(JointError::InvalidParameter("loss above strategy debt"));
        }
        // Shrink the allocation in proportion to the lost share of debt
        let ratio_change = if debt == 0 {
            0
        } else {
            mul_div(loss, self.strategy.debt_ratio, debt)?.min(self.strategy.debt_ratio)
        };
        self.strategy.debt_ratio -= ratio_change;
        self.strategy.total_loss += loss;
        self.strategy.total_debt -= loss;
        Ok(())
    }

    /// Strategy report: books gain/loss, settles debt payments and credit.
    ///
    /// The caller must hold at least `gain + debt_payment` of liquid tokens;
    /// the returned outcome says which way the net amount moves.
    pub fn report(&mut self, gain: u128, loss: u128, debt_payment: u128, now: u64) -> Result<ReportOutcome> {
        if loss > 0 {
            self.report_loss(loss)?;
        }
        self.strategy.total_gain += gain;

        let debt_payment = debt_payment.min(self.debt_outstanding()?);
        if debt_payment > 0 {
            self.strategy.total_debt -= debt_payment;
        }

        let credit = self.credit_available()?;
        if credit > 0 {
            self.strategy.total_debt += credit;
        }

        let available = gain + debt_payment;
        let mut outcome = ReportOutcome::default();
        if available < credit {
            outcome.sent = credit - available;
            self.idle -= outcome.sent;
        } else if available > credit {
            outcome.received = available - credit;
            self.idle += outcome.received;
        }

        let locked = self.locked_profit(now) + gain;
        self.locked_profit = locked.saturating_sub(loss);
        self.last_report = now;
        self.strategy.last_report = now;

        outcome.debt_outstanding = if self.emergency_shutdown {
            self.strategy.total_debt
        } else {
            self.debt_outstanding()?
        };

        log::info!(
            "vault {} report: gain {} loss {} debt payment {} credit {} total debt {}",
            self.token,
            gain,
            loss,
            debt_payment,
            credit,
            self.strategy.total_debt
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Actor = Actor(10);

    fn vault() -> Vault {
        Vault::new(Token::A, VaultConfig::default(), BPS_SCALE, 0).unwrap()
    }

    #[test]
    fn test_first_report_lends_everything() {
        let mut v = vault();
        v.deposit(ALICE, 1_000, 0).unwrap();
        let out = v.report(0, 0, 0, 0).unwrap();
        assert_eq!(out.sent, 1_000);
        assert_eq!(v.strategy.total_debt, 1_000);
        assert_eq!(v.idle(), 0);
        assert_eq!(v.total_assets(), 1_000);
    }

    #[test]
    fn test_gain_unlocks_linearly() {
        let mut v = vault();
        v.deposit(ALICE, 1_000, 0).unwrap();
        v.report(0, 0, 0, 0).unwrap();
        let pps = v.price_per_share(0).unwrap();
        assert_eq!(pps, SCALE);

        // Strategy earned 100; the debt is already at its limit so the gain is paid in
        let out = v.report(100, 0, 0, 10).unwrap();
        assert_eq!(out, ReportOutcome { sent: 0, received: 100, debt_outstanding: 0 });
        assert_eq!(v.strategy.total_debt, 1_000);
        assert_eq!(v.idle(), 100);
        assert_eq!(v.price_per_share(10).unwrap(), SCALE);
        let half = 10 + v.config.profit_unlock_secs / 2;
        assert_eq!(v.price_per_share(half).unwrap(), SCALE * 1_050 / 1_000);
        let done = 10 + v.config.profit_unlock_secs;
        assert_eq!(v.price_per_share(done).unwrap(), SCALE * 1_100 / 1_000);
    }

    #[test]
    fn test_loss_reduces_debt_ratio() {
        let mut v = vault();
        v.deposit(ALICE, 1_000, 0).unwrap();
        v.report(0, 0, 0, 0).unwrap();
        v.report(0, 100, 0, 1).unwrap();
        assert_eq!(v.strategy.total_loss, 100);
        assert_eq!(v.strategy.total_debt, 900);
        assert_eq!(v.strategy.debt_ratio, 9_000);
        assert_eq!(v.price_per_share(1).unwrap(), SCALE * 900 / 1_000);
    }

    #[test]
    fn test_zero_ratio_asks_for_everything_back() {
        let mut v = vault();
        v.deposit(ALICE, 1_000, 0).unwrap();
        v.report(0, 0, 0, 0).unwrap();
        v.update_debt_ratio(0).unwrap();
        assert_eq!(v.debt_outstanding().unwrap(), 1_000);
        assert_eq!(v.credit_available().unwrap(), 0);

        let out = v.report(20, 0, 1_000, 1).unwrap();
        assert_eq!(out.received, 1_020);
        assert_eq!(out.debt_outstanding, 0);
        assert_eq!(v.strategy.total_debt, 0);
        assert_eq!(v.idle(), 1_020);
    }

    #[test]
    fn test_withdraw_only_from_idle() {
        let mut v = vault();
        let shares = v.deposit(ALICE, 1_000, 0).unwrap();
        v.report(0, 0, 0, 0).unwrap();
        assert_eq!(
            v.withdraw(ALICE, shares, 0),
            Err(JointError::InsufficientVaultLiquidity { requested: 1_000, idle: 0 })
        );
        v.update_debt_ratio(0).unwrap();
        v.report(0, 0, 1_000, 1).unwrap();
        assert_eq!(v.withdraw(ALICE, shares, 1).unwrap(), 1_000);
        assert_eq!(v.total_supply(), 0);
        assert!(matches!(
            v.withdraw(ALICE, 1, 1),
            Err(JointError::InsufficientShares { .. })
        ));
    }

    #[test]
    fn test_donation_counts_as_gain() {
        let mut v = vault();
        v.deposit(ALICE, 1_000, 0).unwrap();
        // Strategy received 50 out of thin air before its first report
        let out = v.report(50, 0, 0, 0).unwrap();
        assert_eq!(v.strategy.total_gain, 50);
        assert_eq!(out.sent, 950);
        assert_eq!(v.total_assets(), 1_050);
        let later = v.config.profit_unlock_secs;
        assert_eq!(v.price_per_share(later).unwrap(), SCALE * 1_050 / 1_000);
    }
}
