//! LP staking farm with per-second reward emission.
//!
//! Single staker (the joint). Rewards are paid out of a funded reserve, so
//! emission stops when the reserve runs dry. Accrual is lazy: every entry point
//! settles up to `now` first.

use crate::{JointError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FarmConfig {
    /// Reward units emitted per second while anything is staked
    pub reward_per_second: u128,
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            reward_per_second: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardFarm {
    pub config: FarmConfig,
    staked: u128,
    /// Earned but unclaimed
    accrued: u128,
    /// Reward tokens held by the farm and not yet earned
    reserve: u128,
    last_update: u64,
}

impl RewardFarm {
    pub fn new(config: FarmConfig, now: u64) -> Self {
        Self {
            config,
            staked: 0,
            accrued: 0,
            reserve: 0,
            last_update: now,
        }
    }

    /// Add reward tokens to the emission reserve
    pub fn fund(&mut self, amount: u128, now: u64) -> Result<()> {
        self.accrue(now);
        self.reserve = self.reserve.checked_add(amount).ok_or(JointError::Overflow)?;
        Ok(())
    }

    fn accrue(&mut self, now: u64) {
        if now <= self.last_update {
            return;
        }
        if self.staked > 0 {
            let elapsed = (now - self.last_update) as u128;
            let emitted = self
                .config
                .reward_per_second
                .saturating_mul(elapsed)
                .min(self.reserve);
            self.reserve -= emitted;
            self.accrued += emitted;
        }
        self.last_update = now;
    }

    pub fn staked(&self) -> u128 {
        self.staked
    }

    /// Reward tokens the farm holds (unearned reserve plus unclaimed)
    pub fn reward_held(&self) -> u128 {
        self.reserve + self.accrued
    }

    pub fn pending(&self, now: u64) -> u128 {
        let mut view = self.clone();
        view.accrue(now);
        view.accrued
    }

    pub fn stake(&mut self, amount: u128, now: u64) -> Result<()> {
        if amount == 0 {
            return Err(JointError::InvalidParameter("stake amount"));
        }
        self.accrue(now);
        self.staked = self.staked.checked_add(amount).ok_or(JointError::Overflow)?;
        Ok(())
    }

    pub fn unstake(&mut self, amount: u128, now: u64) -> Result<()> {
        if amount > self.staked {
            return Err(JointError::InsufficientStake {
                requested: amount,
                staked: self.staked,
            });
        }
        self.accrue(now);
        self.staked -= amount;
        Ok(())
    }

    pub fn claim(&mut self, now: u64) -> u128 {
        self.accrue(now);
        core::mem::take(&mut self.accrued)
    }
}
