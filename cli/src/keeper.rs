//! Keeper loop: advance the simulated clock and harvest whatever is due

use anyhow::Result;
use colored::Colorize;
use joint_model::{DefaultSystem, JointState, Side};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::ScenarioConfig;
use crate::scenario::{describe_state, Simulation, KEEPER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeeperSettings {
    pub ticks: u64,
    pub tick_secs: u64,
    pub interval_ms: u64,
    pub monitor_only: bool,
}

/// Sides the keeper should harvest right now
pub fn due_sides(sys: &DefaultSystem) -> Result<Vec<Side>> {
    let mut due = Vec::new();
    for side in Side::BOTH {
        if sys.harvest_trigger(side)? || has_fresh_credit(sys, side)? {
            due.push(side);
        }
    }
    Ok(due)
}

/// Vault credit the provider could forward into a joint that is waiting for it
fn has_fresh_credit(sys: &DefaultSystem, side: Side) -> Result<bool> {
    let joint = sys.joint();
    let waiting_on_us = !matches!(
        joint.state(),
        JointState::PartiallyFunded { side: funded, .. } if funded == side
    );
    Ok(waiting_on_us
        && joint.accepts_deposits()
        && sys.provider(side).config.invest_want
        && sys.vault(side).credit_available()? > 0)
}

/// One keeper pass. Returns the number of harvests sent.
pub fn tick(sys: &mut DefaultSystem, tick_secs: u64, monitor_only: bool) -> Result<usize> {
    sys.advance(tick_secs);
    if let Err(e) = sys.sync_price() {
        log::warn!("price sync failed: {}", e);
    }

    let mut sent = 0;
    for side in due_sides(sys)? {
        if monitor_only {
            println!("  {} harvest due on provider {}", "ℹ".blue(), side);
            continue;
        }
        match sys.harvest(KEEPER, side) {
            Ok(report) => {
                sent += 1;
                let mut line = format!("harvested {} (gain {}, loss {})", side, report.gain, report.loss);
                if let Some(closed) = &report.closed_epoch {
                    line.push_str(&format!(", closed epoch {}", closed.index));
                }
                if let Some(opened) = report.opened_epoch {
                    line.push_str(&format!(", opened epoch {}", opened));
                }
                println!("  {} {}", "✓".green(), line);
            }
            Err(e) => {
                log::error!("harvest {} failed: {}", side, e);
                println!("  {} harvest {} failed: {}", "✗".red(), side, e);
            }
        }
    }
    Ok(sent)
}

pub async fn run_keeper(config: ScenarioConfig, settings: KeeperSettings) -> Result<()> {
    println!("{}", "=== Starting Keeper ===".bright_green().bold());
    println!("{} {}", "Scenario:".bright_cyan(), config.name);
    println!("{} {}", "Ticks:".bright_cyan(), settings.ticks);
    println!("{} {}s", "Tick Length:".bright_cyan(), settings.tick_secs);
    println!("{} {}", "Monitor Only:".bright_cyan(), if settings.monitor_only { "Yes" } else { "No" });

    let mut sim = Simulation::new(config)?;
    sim.run(false)?;
    let sys = &mut sim.system;

    let interval = Duration::from_millis(settings.interval_ms);
    let mut total = 0;

    for n in 0..settings.ticks {
        println!(
            "\n{}",
            format!(
                "[{}] tick {} t={} joint {}",
                chrono::Local::now().format("%H:%M:%S"),
                n + 1,
                sys.now() + settings.tick_secs,
                describe_state(sys.joint().state())
            )
            .dimmed()
        );
        let sent = tick(sys, settings.tick_secs, settings.monitor_only)?;
        if sent == 0 && !settings.monitor_only {
            println!("  {} Nothing to harvest", "✓".green());
        }
        total += sent;

        if !interval.is_zero() {
            sleep(interval).await;
        }
    }

    println!("\n{}", "=== Keeper Summary ===".bright_green().bold());
    println!("{} {}", "Harvests Sent:".bright_cyan(), total);
    println!("{} {}", "Epochs Closed:".bright_cyan(), sys.joint().history().len());
    println!("{} {}", "Joint:".bright_cyan(), describe_state(sys.joint().state()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposits_only() -> DefaultSystem {
        let mut config = ScenarioConfig::example();
        config.steps.truncate(2);
        let mut sim = Simulation::new(config).unwrap();
        sim.run(true).unwrap();
        sim.system
    }

    #[test]
    fn test_fresh_deposits_are_due() {
        let sys = deposits_only();
        assert_eq!(due_sides(&sys).unwrap(), vec![Side::A, Side::B]);
    }

    #[test]
    fn test_keeper_opens_and_rolls_epochs() {
        let mut sys = deposits_only();
        assert_eq!(tick(&mut sys, 60, false).unwrap(), 2);
        assert_eq!(sys.joint().state(), JointState::Open);

        // Nothing to do mid-epoch
        assert_eq!(tick(&mut sys, 24 * 3600, false).unwrap(), 0);

        let mut closed = 0;
        for _ in 0..8 {
            tick(&mut sys, 24 * 3600, false).unwrap();
            closed = sys.joint().history().len();
        }
        assert!(closed >= 1);
    }

    #[test]
    fn test_monitor_only_sends_nothing() {
        let mut sys = deposits_only();
        let before = sys.joint().clone();
        assert_eq!(tick(&mut sys, 60, true).unwrap(), 0);
        assert_eq!(sys.joint(), &before);
    }
}
