//! Scenario files: system parameters plus a list of steps

use anyhow::{Context, Result};
use joint_model::{
    FarmConfig, HedgePoolConfig, JointConfig, ProviderConfig, SystemParams, VaultConfig, BPS_SCALE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    #[serde(default = "default_start_time")]
    pub start_time: u64,
    /// Push the pool price to the oracle after every swap step
    #[serde(default)]
    pub auto_sync_price: bool,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub farm: FarmSection,
    #[serde(default)]
    pub hedge: HedgeSection,
    #[serde(default)]
    pub vault: VaultSection,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub joint: JointSection,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_start_time() -> u64 {
    1_000_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub fee_bps: u64,
    /// Reward/B pair, `[reward, b]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_b: Option<[u64; 2]>,
    /// Reward/A pair, `[reward, a]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_a: Option<[u64; 2]>,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            reserve_a: 1_000_000_000_000,
            reserve_b: 2_000_000_000_000_000,
            fee_bps: 30,
            reward_b: Some([1_000_000_000_000, 1_000_000_000_000]),
            reward_a: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FarmSection {
    pub reward_per_second: u64,
    pub funding: u64,
}

impl Default for FarmSection {
    fn default() -> Self {
        Self {
            reward_per_second: 1_000,
            funding: 1_000_000_000_000_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HedgeSection {
    pub liquidity: u64,
    pub annual_premium_bps: u64,
    pub min_period: u64,
    pub max_period: u64,
    pub max_protection_range_bps: u64,
}

impl Default for HedgeSection {
    fn default() -> Self {
        let pool = HedgePoolConfig::default();
        Self {
            liquidity: 10_000_000_000_000_000,
            annual_premium_bps: pool.annual_premium_bps as u64,
            min_period: pool.min_period,
            max_period: pool.max_period,
            max_protection_range_bps: pool.max_protection_range_bps as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSection {
    pub profit_unlock_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_limit: Option<u64>,
    pub debt_ratio_bps: u64,
}

impl Default for VaultSection {
    fn default() -> Self {
        Self {
            profit_unlock_secs: VaultConfig::default().profit_unlock_secs,
            deposit_limit: None,
            debt_ratio_bps: BPS_SCALE as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub invest_want: bool,
    pub take_profit: bool,
    pub do_health_check: bool,
}

impl Default for ProviderSection {
    fn default() -> Self {
        let p = ProviderConfig::default();
        Self {
            invest_want: p.invest_want,
            take_profit: p.take_profit,
            do_health_check: p.do_health_check,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointSection {
    pub hedge_budget_bps: u64,
    pub protection_range_bps: u64,
    pub period: u64,
    pub min_time_to_maturity: u64,
    pub max_percentage_loss_bps: u64,
    pub max_price_deviation_bps: u64,
    pub max_slippage_bps: u64,
    pub hedging_enabled: bool,
    pub reinvest: bool,
}

impl Default for JointSection {
    fn default() -> Self {
        let j = JointConfig::default();
        Self {
            hedge_budget_bps: j.hedge_budget_bps as u64,
            protection_range_bps: j.protection_range_bps as u64,
            period: j.period,
            min_time_to_maturity: j.min_time_to_maturity,
            max_percentage_loss_bps: j.max_percentage_loss_bps as u64,
            max_price_deviation_bps: j.max_price_deviation_bps as u64,
            max_slippage_bps: j.max_slippage_bps as u64,
            hedging_enabled: j.hedging_enabled,
            reinvest: j.reinvest,
        }
    }
}

/// One scripted call. Token and side names use the library's spelling
/// (`A`, `B`, `REWARD`, `LP`, `OTHER7`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Mint to `actor` and deposit into the vault of `side`
    Deposit { actor: u32, side: String, amount: u64 },
    /// Burn shares; all of them when `shares` is absent
    Withdraw {
        actor: u32,
        side: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shares: Option<u64>,
    },
    Harvest { side: String },
    JointHarvest,
    Advance { secs: u64 },
    /// Mint `amount` of `from` to `actor` and swap it
    Swap {
        actor: u32,
        from: String,
        to: String,
        amount: u64,
    },
    SyncPrice,
    /// Oracle price in B per A (unscaled)
    SetOraclePrice { price: f64 },
    SetInvestWant { side: String, enabled: bool },
    SetTakeProfit { side: String, enabled: bool },
    SetDebtRatio { side: String, bps: u64 },
    SetHedging { enabled: bool, force: bool },
    EmergencyExit { side: String },
    ForceEndEpoch,
    Liquidate,
    ReturnLoose,
    /// Sell every reward token the joint holds into `to`
    SellRewards { to: String },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Deposit { .. } => "deposit",
            Step::Withdraw { .. } => "withdraw",
            Step::Harvest { .. } => "harvest",
            Step::JointHarvest => "joint_harvest",
            Step::Advance { .. } => "advance",
            Step::Swap { .. } => "swap",
            Step::SyncPrice => "sync_price",
            Step::SetOraclePrice { .. } => "set_oracle_price",
            Step::SetInvestWant { .. } => "set_invest_want",
            Step::SetTakeProfit { .. } => "set_take_profit",
            Step::SetDebtRatio { .. } => "set_debt_ratio",
            Step::SetHedging { .. } => "set_hedging",
            Step::EmergencyExit { .. } => "emergency_exit",
            Step::ForceEndEpoch => "force_end_epoch",
            Step::Liquidate => "liquidate",
            Step::ReturnLoose => "return_loose",
            Step::SellRewards { .. } => "sell_rewards",
        }
    }
}

impl ScenarioConfig {
    /// Two deposits, one full epoch and a roll into the next
    pub fn example() -> Self {
        let day = 24 * 3600;
        let side = |s: &str| s.to_string();
        Self {
            name: "one-epoch".to_string(),
            start_time: default_start_time(),
            auto_sync_price: true,
            pool: PoolSection::default(),
            farm: FarmSection::default(),
            hedge: HedgeSection::default(),
            vault: VaultSection::default(),
            provider: ProviderSection::default(),
            joint: JointSection::default(),
            steps: vec![
                Step::Deposit { actor: 10, side: side("A"), amount: 10_000_000_000 },
                Step::Deposit { actor: 10, side: side("B"), amount: 20_000_000_000_000 },
                Step::Harvest { side: side("A") },
                Step::Harvest { side: side("B") },
                Step::Advance { secs: 3 * day },
                Step::Swap { actor: 11, from: side("A"), to: side("B"), amount: 5_000_000_000 },
                Step::Advance { secs: 4 * day },
                Step::Harvest { side: side("A") },
                Step::SyncPrice,
                Step::Harvest { side: side("B") },
            ],
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let path = expand(path)?;
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file: {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("Failed to parse scenario TOML: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        let path = expand(path)?;
        let data = toml::to_string_pretty(self).context("Failed to serialize scenario")?;
        fs::write(&path, data).with_context(|| format!("Failed to write scenario file: {}", path.display()))?;
        Ok(path)
    }

    pub fn system_params(&self) -> SystemParams {
        SystemParams {
            start_time: self.start_time,
            pool_a: self.pool.reserve_a as u128,
            pool_b: self.pool.reserve_b as u128,
            pool_fee_bps: self.pool.fee_bps as u128,
            reward_b_pool: self.pool.reward_b.map(|[r, b]| (r as u128, b as u128)),
            reward_a_pool: self.pool.reward_a.map(|[r, a]| (r as u128, a as u128)),
            farm: FarmConfig {
                reward_per_second: self.farm.reward_per_second as u128,
            },
            farm_funding: self.farm.funding as u128,
            hedge_pool: HedgePoolConfig {
                annual_premium_bps: self.hedge.annual_premium_bps as u128,
                min_period: self.hedge.min_period,
                max_period: self.hedge.max_period,
                max_protection_range_bps: self.hedge.max_protection_range_bps as u128,
            },
            hedge_liquidity: self.hedge.liquidity as u128,
            vault: VaultConfig {
                profit_unlock_secs: self.vault.profit_unlock_secs,
                deposit_limit: self.vault.deposit_limit.map_or(u128::MAX, u128::from),
            },
            debt_ratio_bps: self.vault.debt_ratio_bps as u128,
            provider: ProviderConfig {
                invest_want: self.provider.invest_want,
                take_profit: self.provider.take_profit,
                do_health_check: self.provider.do_health_check,
                ..ProviderConfig::default()
            },
            joint: JointConfig {
                hedge_budget_bps: self.joint.hedge_budget_bps as u128,
                protection_range_bps: self.joint.protection_range_bps as u128,
                period: self.joint.period,
                min_time_to_maturity: self.joint.min_time_to_maturity,
                max_percentage_loss_bps: self.joint.max_percentage_loss_bps as u128,
                max_price_deviation_bps: self.joint.max_price_deviation_bps as u128,
                max_slippage_bps: self.joint.max_slippage_bps as u128,
                hedging_enabled: self.joint.hedging_enabled,
                reinvest: self.joint.reinvest,
            },
        }
    }
}

/// Expand `~` and environment variables in a user-supplied path
fn expand(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw).with_context(|| format!("Failed to expand path: {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
