//! Scenario runner: builds a system from a scenario file and replays its steps

use anyhow::{bail, Result};
use colored::Colorize;
use joint_model::{
    Actor, DefaultSystem, EpochReport, JointError, JointState, Side, Token, SCALE,
};
use serde::Serialize;
use thiserror::Error;

use crate::config::{ScenarioConfig, Step};

pub const GOV: Actor = Actor::GOVERNANCE;
pub const KEEPER: Actor = Actor::KEEPER;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("step {index} ({action}) failed: {source}")]
    StepFailed {
        index: usize,
        action: &'static str,
        #[source]
        source: JointError,
    },

    #[error("invalid {what} '{value}'")]
    Parse { what: &'static str, value: String },

    #[error("price must be a positive finite number, got {0}")]
    BadPrice(f64),
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub index: usize,
    pub action: &'static str,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EpochSummary {
    pub index: u64,
    pub opened_at: u64,
    pub closed_at: u64,
    pub price_at_open: f64,
    pub price_at_close: f64,
    pub invested_a: u128,
    pub invested_b: u128,
    pub returned_a: u128,
    pub returned_b: u128,
    pub hedge_cost: u128,
    pub hedge_payout: u128,
    pub rewards_claimed: u128,
    pub return_a_bps: i64,
    pub return_b_bps: i64,
}

impl From<&EpochReport> for EpochSummary {
    fn from(r: &EpochReport) -> Self {
        Self {
            index: r.index,
            opened_at: r.opened_at,
            closed_at: r.closed_at,
            price_at_open: from_scaled(r.price_at_open),
            price_at_close: from_scaled(r.price_at_close),
            invested_a: r.invested_a,
            invested_b: r.invested_b,
            returned_a: r.returned_a,
            returned_b: r.returned_b,
            hedge_cost: r.hedge_cost,
            hedge_payout: r.hedge_payout,
            rewards_claimed: r.rewards_claimed,
            return_a_bps: return_bps(r.returned_a, r.invested_a),
            return_b_bps: return_bps(r.returned_b, r.invested_b),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultSummary {
    pub side: String,
    pub total_assets: u128,
    pub idle: u128,
    pub total_debt: u128,
    pub debt_ratio_bps: u128,
    pub total_gain: u128,
    pub total_loss: u128,
    pub price_per_share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub time: u64,
    pub pool_price: Option<f64>,
    pub joint_state: String,
    pub epochs: Vec<EpochSummary>,
    pub vaults: Vec<VaultSummary>,
    pub steps: Vec<StepRecord>,
    pub failed_steps: usize,
}

/// Scaled price (1e18 = 1.0) as a float, for display only
pub fn from_scaled(value: u128) -> f64 {
    value as f64 / SCALE as f64
}

pub fn to_scaled(price: f64) -> Result<u128> {
    if !price.is_finite() || price <= 0.0 {
        return Err(ScenarioError::BadPrice(price).into());
    }
    Ok((price * SCALE as f64).round() as u128)
}

fn return_bps(returned: u128, invested: u128) -> i64 {
    if invested == 0 {
        return 0;
    }
    ((returned as f64 / invested as f64 - 1.0) * 10_000.0).round() as i64
}

pub fn parse_side(value: &str) -> Result<Side, ScenarioError> {
    value.parse().map_err(|_| ScenarioError::Parse {
        what: "side",
        value: value.to_string(),
    })
}

pub fn parse_token(value: &str) -> Result<Token, ScenarioError> {
    value.parse().map_err(|_| ScenarioError::Parse {
        what: "token",
        value: value.to_string(),
    })
}

pub fn describe_state(state: JointState) -> String {
    match state {
        JointState::Idle => "idle".to_string(),
        JointState::PartiallyFunded { side, amount } => format!("partially funded by {} ({})", side, amount),
        JointState::Open => "open".to_string(),
        JointState::Unwinding => "unwinding".to_string(),
    }
}

/// A system plus the scenario that drives it
pub struct Simulation {
    pub config: ScenarioConfig,
    pub system: DefaultSystem,
    pub records: Vec<StepRecord>,
}

impl Simulation {
    pub fn new(config: ScenarioConfig) -> Result<Self> {
        let system = DefaultSystem::with_defaults(config.system_params())?;
        log::info!("built system for scenario '{}'", config.name);
        Ok(Self {
            config,
            system,
            records: Vec::new(),
        })
    }

    /// Replay every step. Failed steps are recorded and skipped unless
    /// `strict`, in which case the first one aborts the run.
    pub fn run(&mut self, strict: bool) -> Result<()> {
        let steps = self.config.steps.clone();
        for (index, step) in steps.iter().enumerate() {
            let record = match self.apply(step)? {
                Ok(detail) => StepRecord {
                    index,
                    action: step.name(),
                    ok: true,
                    detail,
                },
                Err(source) => {
                    if strict {
                        return Err(ScenarioError::StepFailed {
                            index,
                            action: step.name(),
                            source,
                        }
                        .into());
                    }
                    log::warn!("step {} ({}) failed: {}", index, step.name(), source);
                    StepRecord {
                        index,
                        action: step.name(),
                        ok: false,
                        detail: source.to_string(),
                    }
                }
            };
            log::debug!("step {}: {} -> {}", index, record.action, record.detail);
            self.records.push(record);
        }
        Ok(())
    }

    /// Outer error: the scenario file itself is malformed.
    /// Inner error: the system rejected the call.
    fn apply(&mut self, step: &Step) -> Result<Result<String, JointError>> {
        let sys = &mut self.system;
        let outcome = match step {
            Step::Deposit { actor, side, amount } => {
                let side = parse_side(side)?;
                let actor = Actor(*actor);
                let amount = *amount as u128;
                sys.mint_to(actor, side.token(), amount)
                    .and_then(|_| sys.deposit(actor, side, amount))
                    .map(|shares| format!("{} deposited {} {}, {} shares", actor, amount, side.token(), shares))
            }
            Step::Withdraw { actor, side, shares } => {
                let side = parse_side(side)?;
                let actor = Actor(*actor);
                let shares = shares.map_or_else(|| sys.vault(side).shares_of(actor), u128::from);
                sys.withdraw(actor, side, shares)
                    .map(|out| format!("{} withdrew {} {}", actor, out, side.token()))
            }
            Step::Harvest { side } => {
                let side = parse_side(side)?;
                sys.harvest(KEEPER, side).map(|r| {
                    let mut detail = format!("gain {} loss {} invested {}", r.gain, r.loss, r.invested);
                    if let Some(closed) = &r.closed_epoch {
                        detail.push_str(&format!(", closed epoch {}", closed.index));
                    }
                    if let Some(opened) = r.opened_epoch {
                        detail.push_str(&format!(", opened epoch {}", opened));
                    }
                    detail
                })
            }
            Step::JointHarvest => sys.joint_harvest(KEEPER).map(|closed| match closed {
                Some(r) => format!("closed epoch {}", r.index),
                None => describe_state(sys.joint().state()),
            }),
            Step::Advance { secs } => {
                sys.advance(*secs);
                Ok(format!("t = {}", sys.now()))
            }
            Step::Swap { actor, from, to, amount } => {
                let (from, to) = (parse_token(from)?, parse_token(to)?);
                let actor = Actor(*actor);
                let amount = *amount as u128;
                let swapped = sys
                    .mint_to(actor, from, amount)
                    .and_then(|_| sys.swap(actor, &[from, to], amount, 0));
                let swapped = match swapped {
                    Ok(out) if self.config.auto_sync_price => sys.sync_price().map(|_| out),
                    other => other,
                };
                swapped.map(|out| format!("{} {} -> {} {}", amount, from, out, to))
            }
            Step::SyncPrice => sys.sync_price().map(|_| "oracle synced to pool".to_string()),
            Step::SetOraclePrice { price } => {
                sys.set_oracle_price(to_scaled(*price)?);
                Ok(format!("oracle price {}", price))
            }
            Step::SetInvestWant { side, enabled } => {
                let side = parse_side(side)?;
                sys.set_invest_want(GOV, side, *enabled).map(|_| format!("invest_want = {}", enabled))
            }
            Step::SetTakeProfit { side, enabled } => {
                let side = parse_side(side)?;
                sys.set_take_profit(GOV, side, *enabled).map(|_| format!("take_profit = {}", enabled))
            }
            Step::SetDebtRatio { side, bps } => {
                let side = parse_side(side)?;
                sys.update_debt_ratio(GOV, side, *bps as u128)
                    .map(|_| format!("debt ratio = {} bps", bps))
            }
            Step::SetHedging { enabled, force } => sys
                .set_hedging_enabled(GOV, *enabled, *force)
                .map(|_| format!("hedging = {}", enabled)),
            Step::EmergencyExit { side } => {
                let side = parse_side(side)?;
                sys.set_emergency_exit(GOV, side).map(|_| format!("provider {} in emergency exit", side))
            }
            Step::ForceEndEpoch => sys.force_end_epoch(GOV).map(|_| "epoch marked for close".to_string()),
            Step::Liquidate => sys
                .liquidate_position(GOV)
                .map(|r| format!("liquidated epoch {}", r.index)),
            Step::ReturnLoose => sys
                .return_loose_to_providers(GOV)
                .map(|_| "loose funds returned".to_string()),
            Step::SellRewards { to } => {
                let to = parse_token(to)?;
                let held = sys.joint().balance_of(Token::Reward);
                sys.swap_token_for_token(GOV, Token::Reward, to, held, 0)
                    .map(|out| format!("{} REWARD -> {} {}", held, out, to))
            }
        };
        Ok(outcome)
    }

    pub fn report(&self) -> SimulationReport {
        let sys = &self.system;
        let vaults = [Side::A, Side::B]
            .into_iter()
            .map(|side| {
                let vault = sys.vault(side);
                VaultSummary {
                    side: side.to_string(),
                    total_assets: vault.total_assets(),
                    idle: vault.idle(),
                    total_debt: vault.strategy.total_debt,
                    debt_ratio_bps: vault.strategy.debt_ratio,
                    total_gain: vault.strategy.total_gain,
                    total_loss: vault.strategy.total_loss,
                    price_per_share: sys.price_per_share(side).map(from_scaled).unwrap_or(0.0),
                }
            })
            .collect();

        SimulationReport {
            scenario: self.config.name.clone(),
            time: sys.now(),
            pool_price: sys.price().ok().map(from_scaled),
            joint_state: describe_state(sys.joint().state()),
            epochs: sys.joint().history().iter().map(EpochSummary::from).collect(),
            vaults,
            failed_steps: self.records.iter().filter(|r| !r.ok).count(),
            steps: self.records.clone(),
        }
    }
}

pub fn print_steps(records: &[StepRecord]) {
    println!("\n{}", "Steps:".bright_yellow());
    for record in records {
        let mark = if record.ok { "✓".green() } else { "✗".red() };
        println!("  {} [{:>2}] {} {}", mark, record.index, record.action.bright_cyan(), record.detail.dimmed());
    }
}

pub fn simulate(config: ScenarioConfig, json: bool, strict: bool) -> Result<()> {
    let mut sim = Simulation::new(config)?;
    sim.run(strict)?;
    let report = sim.report();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", "=== Simulation ===".bright_green().bold());
    println!("{} {}", "Scenario:".bright_cyan(), report.scenario);
    print_steps(&report.steps);
    crate::status::print_report(&report, true);

    if report.failed_steps > 0 {
        println!("\n{} {} step(s) failed", "⚠".yellow(), report.failed_steps);
    }
    Ok(())
}

/// Reject a scenario with no steps before doing any work
pub fn ensure_steps(config: &ScenarioConfig) -> Result<()> {
    if config.steps.is_empty() {
        bail!("Scenario '{}' has no steps", config.name);
    }
    Ok(())
}
