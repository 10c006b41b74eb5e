//! Single-token strategy feeding one side of the joint.
//!
//! The provider holds its want token between epochs and reports to its vault.
//! Harvest orchestration lives in [`crate::system`], which owns the vault and
//! the joint; this module keeps the provider's own state and the pure
//! gain/loss arithmetic of a report.

use amm_model::{mul_div, BPS_SCALE};

use crate::token::{Balances, Side};
use crate::{JointError, Result};

/// Profit/loss limits applied to a harvest, in bps of the debt before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheck {
    pub profit_limit_bps: u128,
    pub loss_limit_bps: u128,
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            profit_limit_bps: 100,
            loss_limit_bps: 1,
        }
    }
}

impl HealthCheck {
    pub fn check(&self, gain: u128, loss: u128, total_debt: u128) -> Result<()> {
        let max_gain = mul_div(total_debt, self.profit_limit_bps, BPS_SCALE)?;
        let max_loss = mul_div(total_debt, self.loss_limit_bps, BPS_SCALE)?;
        if gain > max_gain || loss > max_loss {
            return Err(JointError::HealthCheckFailed {
                gain,
                loss,
                debt: total_debt,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Forward idle want into the joint after reporting
    pub invest_want: bool,
    /// Close the running epoch on the next harvest regardless of triggers
    pub take_profit: bool,
    pub do_health_check: bool,
    pub health: HealthCheck,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            invest_want: true,
            take_profit: false,
            do_health_check: false,
            health: HealthCheck::default(),
        }
    }
}

/// Amounts a harvest reports to the vault
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settlement {
    pub gain: u128,
    pub loss: u128,
    pub debt_payment: u128,
}

/// Regular report. With `realize` off (capital still in an open position)
/// only the debt payment is settled from liquid want.
pub fn prepare_return(
    total_assets: u128,
    liquid: u128,
    total_debt: u128,
    debt_outstanding: u128,
    realize: bool,
) -> Settlement {
    if !realize {
        return Settlement {
            gain: 0,
            loss: 0,
            debt_payment: debt_outstanding.min(liquid),
        };
    }
    let (gain, loss) = if total_assets >= total_debt {
        (total_assets - total_debt, 0)
    } else {
        (0, total_debt - total_assets)
    };
    let gain = gain.min(liquid);
    Settlement {
        gain,
        loss,
        debt_payment: debt_outstanding.min(liquid - gain),
    }
}

/// Emergency report: everything was freed, pay back as much debt as possible
pub fn liquidate_all(freed: u128, debt_outstanding: u128) -> Settlement {
    let loss = debt_outstanding.saturating_sub(freed);
    Settlement {
        gain: freed.saturating_sub(debt_outstanding),
        loss,
        debt_payment: debt_outstanding - loss,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStrategy {
    pub side: Side,
    pub config: ProviderConfig,
    pub balances: Balances,
    pub emergency_exit: bool,
    /// Whether this provider sends want to the joint at all
    pub joint_linked: bool,
    /// Bumped on every migration
    pub generation: u32,
}

impl ProviderStrategy {
    pub fn new(side: Side, config: ProviderConfig) -> Self {
        Self {
            side,
            config,
            balances: Balances::new(),
            emergency_exit: false,
            joint_linked: true,
            generation: 0,
        }
    }

    pub fn balance_of_want(&self) -> u128 {
        self.balances.get(self.side.token())
    }

    /// Fresh provider with the same configuration and no funds
    pub fn migrated(&self) -> Self {
        Self {
            side: self.side,
            config: self.config,
            balances: Balances::new(),
            emergency_exit: false,
            joint_linked: self.joint_linked,
            generation: self.generation + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_return_gain_and_loss() {
        let s = prepare_return(1_100, 1_100, 1_000, 0, true);
        assert_eq!(s, Settlement { gain: 100, loss: 0, debt_payment: 0 });

        let s = prepare_return(900, 900, 1_000, 1_000, true);
        assert_eq!(s, Settlement { gain: 0, loss: 100, debt_payment: 900 });
    }

    #[test]
    fn test_prepare_return_limited_by_liquid_want() {
        // Most of the assets are still in the joint
        let s = prepare_return(1_100, 30, 1_000, 500, true);
        assert_eq!(s, Settlement { gain: 30, loss: 0, debt_payment: 0 });

        let s = prepare_return(1_100, 30, 1_000, 500, false);
        assert_eq!(s, Settlement { gain: 0, loss: 0, debt_payment: 30 });
    }

    #[test]
    fn test_liquidate_all() {
        assert_eq!(
            liquidate_all(990, 1_000),
            Settlement { gain: 0, loss: 10, debt_payment: 990 }
        );
        assert_eq!(
            liquidate_all(1_010, 1_000),
            Settlement { gain: 10, loss: 0, debt_payment: 1_000 }
        );
    }

    #[test]
    fn test_health_check_limits() {
        let hc = HealthCheck { profit_limit_bps: 100, loss_limit_bps: 10 };
        assert!(hc.check(100, 0, 10_000).is_ok());
        assert!(hc.check(101, 0, 10_000).is_err());
        assert!(hc.check(0, 10, 10_000).is_ok());
        assert_eq!(
            hc.check(0, 11, 10_000),
            Err(JointError::HealthCheckFailed { gain: 0, loss: 11, debt: 10_000 })
        );
    }

    #[test]
    fn test_migrated_keeps_config() {
        let mut p = ProviderStrategy::new(Side::B, ProviderConfig::default());
        p.config.take_profit = true;
        p.balances.credit(crate::Token::B, 5).unwrap();
        let next = p.migrated();
        assert!(next.config.take_profit);
        assert_eq!(next.balance_of_want(), 0);
        assert_eq!(next.generation, 1);
    }
}
