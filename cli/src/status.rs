//! Human-readable system status

use anyhow::Result;
use colored::Colorize;
use joint_model::{hedge, Side, BPS_SCALE};

use crate::config::ScenarioConfig;
use crate::scenario::{describe_state, from_scaled, to_scaled, Simulation, SimulationReport};

pub fn print_report(report: &SimulationReport, detailed: bool) {
    println!("\n{}", "Joint:".bright_yellow());
    println!("  {} {}", "State:".bright_cyan(), report.joint_state);
    println!("  {} {}", "Time:".bright_cyan(), report.time);
    match report.pool_price {
        Some(price) => println!("  {} {:.4} B/A", "Pool Price:".bright_cyan(), price),
        None => println!("  {} {}", "Pool Price:".bright_cyan(), "n/a".dimmed()),
    }
    println!("  {} {}", "Closed Epochs:".bright_cyan(), report.epochs.len());

    println!("\n{}", "Vaults:".bright_yellow());
    for vault in &report.vaults {
        println!(
            "  {} assets {} (idle {}, debt {}) ratio {} bps pps {:.6}",
            format!("[{}]", vault.side).bright_cyan(),
            vault.total_assets,
            vault.idle,
            vault.total_debt,
            vault.debt_ratio_bps,
            vault.price_per_share
        );
        if vault.total_loss > 0 {
            println!("      {} {}", "Loss:".red(), vault.total_loss);
        }
        if vault.total_gain > 0 {
            println!("      {} {}", "Gain:".green(), vault.total_gain);
        }
    }

    if !detailed || report.epochs.is_empty() {
        return;
    }

    println!("\n{}", "Epochs:".bright_yellow());
    for epoch in &report.epochs {
        let ret = |bps: i64| {
            let text = format!("{:+.2}%", bps as f64 / 100.0);
            if bps >= 0 {
                text.green()
            } else {
                text.red()
            }
        };
        println!(
            "  #{} {}s price {:.2} -> {:.2} A {} B {}",
            epoch.index,
            epoch.closed_at - epoch.opened_at,
            epoch.price_at_open,
            epoch.price_at_close,
            ret(epoch.return_a_bps),
            ret(epoch.return_b_bps)
        );
        println!(
            "     {}",
            format!(
                "hedge cost {} payout {}, rewards {}",
                epoch.hedge_cost, epoch.hedge_payout, epoch.rewards_claimed
            )
            .dimmed()
        );
    }
}

/// Run a scenario and show where the system ended up
pub fn show_status(config: ScenarioConfig, detailed: bool) -> Result<()> {
    let mut sim = Simulation::new(config)?;
    sim.run(false)?;
    let report = sim.report();
    let sys = &sim.system;

    println!("{}", "=== Joint Status ===".bright_green().bold());
    println!("{} {}", "Scenario:".bright_cyan(), report.scenario);
    print_report(&report, detailed);

    if let Some(pos) = sys.joint().position() {
        println!("\n{}", "Position:".bright_yellow());
        println!("  {} {}", "Epoch:".bright_cyan(), pos.epoch.index);
        println!("  {} {}", "LP Staked:".bright_cyan(), sys.balance_of_stake());
        if let Ok((a, b)) = sys.balance_of_tokens_in_lp() {
            println!("  {} {} A / {} B", "In LP:".bright_cyan(), a, b);
        }
        println!("  {} {}", "Pending Reward:".bright_cyan(), sys.pending_reward());
        match sys.time_to_maturity() {
            Some(ttm) => println!("  {} {}s", "Time To Maturity:".bright_cyan(), ttm),
            None => println!("  {} {}", "Time To Maturity:".bright_cyan(), "n/a".dimmed()),
        }
        if let Some(id) = sys.active_hedge_id() {
            let payout = sys.hedge_payout().unwrap_or(0);
            println!("  {} #{} payout now {}", "Hedge:".bright_cyan(), id, payout);
        }
        let end = if sys.should_end_epoch() { "yes".red() } else { "no".green() };
        println!("  {} {}", "Should End:".bright_cyan(), end);
    }

    println!("\n{}", "Providers:".bright_yellow());
    for side in Side::BOTH {
        let trigger = sys.harvest_trigger(side)?;
        let assets = sys.estimated_total_assets(side)?;
        println!(
            "  {} want {} est. assets {} harvest {}",
            format!("[{}]", side).bright_cyan(),
            sys.balance_of_want(side),
            assets,
            if trigger { "due".bright_green() } else { "not due".dimmed() }
        );
    }
    log::debug!("joint state {}", describe_state(sys.joint().state()));
    Ok(())
}

/// Premium and settlement for a single hedge, without running a system
pub fn hedge_quote(
    notional: u64,
    strike: f64,
    price: f64,
    range_bps: u64,
    period: u64,
    annual_bps: u64,
) -> Result<()> {
    let strike_scaled = to_scaled(strike)?;
    let price_scaled = to_scaled(price)?;
    let notional = notional as u128;

    let premium = hedge::premium(notional, strike_scaled, annual_bps as u128, period)?;
    let payout = hedge::settlement_payout(notional, strike_scaled, range_bps as u128, price_scaled)?;
    let value = hedge::notional_value(notional, strike_scaled)?;
    let band = strike * range_bps as f64 / BPS_SCALE as f64;

    println!("{}", "=== Hedge Quote ===".bright_green().bold());
    println!("{} {} A ({} B at strike)", "Notional:".bright_cyan(), notional, value);
    println!("{} {:.4}", "Strike:".bright_cyan(), strike);
    println!("{} {:.4} .. {:.4}", "Protected Band:".bright_cyan(), strike - band, strike + band);
    println!("{} {}s at {} bps/yr", "Period:".bright_cyan(), period, annual_bps);
    println!("{} {}", "Premium:".bright_cyan(), premium);
    println!("{} {:.4}", "Price:".bright_cyan(), from_scaled(price_scaled));
    if payout > 0 {
        println!("{} {}", "Payout:".bright_cyan(), payout.to_string().bright_green());
    } else {
        println!("{} {}", "Payout:".bright_cyan(), "0 (inside band)".dimmed());
    }
    Ok(())
}
