//! Governance, manual and emergency operations

mod common;

use common::*;
use joint_model::*;

fn open_system() -> DefaultSystem {
    let mut sys = system();
    user_deposit(&mut sys, AMOUNT_A, AMOUNT_B);
    sys.harvest(KEEPER, Side::A).unwrap();
    sys.harvest(KEEPER, Side::B).unwrap();
    sys.advance(2 * 24 * 3600);
    sys
}

// ============================================================================
// Manual operation
// ============================================================================

#[test]
fn test_manual_steps_match_liquidation() {
    let mut manual = open_system();
    let mut auto = manual.clone();
    let stake = manual.balance_of_stake();

    assert!(manual.claim_reward_manually(GOV).unwrap() > 0);
    assert_eq!(manual.withdraw_lp_manually(GOV, stake).unwrap(), None);
    assert_eq!(manual.joint().state(), JointState::Unwinding);
    assert_eq!(manual.remove_liquidity_manually(GOV, stake, 0, 0).unwrap(), None);
    let (_, closed) = manual.close_hedge_manually(GOV).unwrap();
    let manual_report = closed.expect("position settles once empty");
    let rewards = manual.joint().balance_of(Token::Reward);
    manual
        .swap_token_for_token_manually(GOV, &[Token::Reward, Token::B], rewards, 0)
        .unwrap();
    manual.return_loose_to_providers_manually(GOV).unwrap();

    let auto_report = auto.liquidate_position(GOV).unwrap();
    auto.swap_token_for_token(GOV, Token::Reward, Token::B, rewards, 0).unwrap();
    auto.return_loose_to_providers(GOV).unwrap();

    assert_eq!(manual_report, auto_report);
    assert_eq!(manual, auto);
    assert_eq!(manual.joint().state(), JointState::Idle);
}

#[test]
fn test_manual_swap_path_rules() {
    let mut sys = open_system();
    sys.claim_reward_manually(GOV).unwrap();
    let snapshot = sys.clone();

    for path in [
        vec![Token::B, Token::Reward],
        vec![Token::Reward, Token::Lp],
        vec![Token::Reward],
        vec![Token::Reward, Token::B, Token::A, Token::B],
    ] {
        assert_eq!(
            sys.swap_token_for_token_manually(GOV, &path, 1, 0),
            Err(JointError::InvalidSwapPath),
            "{:?}",
            path
        );
    }
    // Multi-hop into A is fine
    let held = sys.joint().balance_of(Token::Reward);
    let out = sys
        .swap_token_for_token_manually(GOV, &[Token::Reward, Token::B, Token::A], held, 0)
        .unwrap();
    assert!(out > 0);
    assert_eq!(sys.joint().balance_of(Token::Reward), 0);
    assert_ne!(sys, snapshot);
}

#[test]
fn test_governance_swap_routes_through_core_token() {
    let mut sys = open_system();
    sys.claim_reward_manually(GOV).unwrap();
    let held = sys.joint().balance_of(Token::Reward);
    // No Reward/A pair: routed Reward -> B -> A
    let out = sys.swap_token_for_token(GOV, Token::Reward, Token::A, held, 0).unwrap();
    assert!(out > 0);
    assert_eq!(sys.joint().balance_of(Token::Reward), 0);
    assert_eq!(
        sys.swap_token_for_token(GOV, Token::A, Token::B, 1, 0),
        Err(JointError::InvalidSwapPath)
    );
}

// ============================================================================
// Atomicity and access control
// ============================================================================

#[test]
fn test_failed_calls_leave_no_trace() {
    let mut sys = open_system();
    let snapshot = sys.clone();

    assert!(matches!(
        sys.harvest(USER, Side::A),
        Err(JointError::Unauthorized { .. })
    ));
    assert!(matches!(
        sys.liquidate_position(KEEPER),
        Err(JointError::Unauthorized { .. })
    ));
    assert_eq!(sys.sweep(GOV, Token::A), Err(JointError::ProtectedToken(Token::A)));
    assert_eq!(sys.sweep(GOV, Token::Reward), Err(JointError::ProtectedToken(Token::Reward)));
    assert!(sys.withdraw(USER, Side::A, AMOUNT_A * 2).is_err());
    assert!(sys.remove_liquidity_manually(GOV, 1, 0, 0).is_err());
    assert!(sys.set_hedging_enabled(GOV, false, false).is_err());
    assert_eq!(sys, snapshot);
}

#[test]
fn test_failed_open_rolls_back_deposit() {
    let mut sys = system();
    user_deposit(&mut sys, AMOUNT_A, AMOUNT_B);
    sys.harvest(KEEPER, Side::A).unwrap();
    let price = sys.price().unwrap();
    sys.set_oracle_price(price * 103 / 100);
    let snapshot = sys.clone();

    assert!(matches!(
        sys.harvest(KEEPER, Side::B),
        Err(JointError::PriceDeviation { .. })
    ));
    assert_eq!(sys, snapshot);
    assert_eq!(sys.vault(Side::B).strategy.total_debt, 0);

    sys.sync_price().unwrap();
    assert!(sys.harvest(KEEPER, Side::B).unwrap().opened_epoch.is_some());
}

#[test]
fn test_disable_hedging_needs_force_while_hedged() {
    let mut sys = open_system();
    assert!(sys.set_hedging_enabled(GOV, false, false).is_err());
    sys.set_hedging_enabled(GOV, false, true).unwrap();
    // Already-open hedge is unaffected
    assert!(sys.active_hedge_id().is_some());
    assert!(!sys.joint().config.hedging_enabled);
}

#[test]
fn test_force_end_epoch() {
    let mut sys = open_system();
    assert!(!sys.should_end_epoch());
    sys.force_end_epoch(GOV).unwrap();
    assert!(sys.should_end_epoch());
    let report = sys.joint_harvest(KEEPER).unwrap().expect("closed");
    assert_eq!(report.index, 1);
    assert!(!sys.should_end_epoch());
    assert_eq!(sys.force_end_epoch(GOV), Err(JointError::NoPosition));
}

// ============================================================================
// Emergency, sweep, recipients
// ============================================================================

#[test]
fn test_emergency_exit_returns_everything() {
    let mut sys = open_system();
    sys.set_emergency_exit(GUARDIAN_ACTOR, Side::A).unwrap();
    assert!(sys.harvest_trigger(Side::A).unwrap());

    let report = sys.harvest(KEEPER, Side::A).unwrap();
    assert!(report.closed_epoch.is_some());
    assert_eq!(report.invested, 0);
    assert_eq!(sys.vault(Side::A).strategy.total_debt, 0);
    assert_eq!(sys.vault(Side::A).strategy.debt_ratio, 0);
    assert_eq!(sys.balance_of_want(Side::A), 0);
    assert!(!sys.harvest_trigger(Side::A).unwrap());

    // Side B still reports normally and waits for a partner
    sys.harvest(KEEPER, Side::B).unwrap();
    assert!(matches!(
        sys.joint().state(),
        JointState::PartiallyFunded { side: Side::B, .. }
    ));
}

const GUARDIAN_ACTOR: Actor = Actor::GUARDIAN;

#[test]
fn test_sweep_foreign_token() {
    let mut sys = open_system();
    sys.mint_to(USER, Token::Other(7), 500).unwrap();
    sys.airdrop(USER, Holder::Joint, Token::Other(7), 500).unwrap();
    assert_eq!(sys.sweep(GOV, Token::Other(7)).unwrap(), 500);
    assert_eq!(sys.balance_of(GOV, Token::Other(7)), 500);
    assert!(matches!(
        sys.sweep(Actor::STRATEGIST, Token::Other(7)),
        Err(JointError::Unauthorized { .. })
    ));
}

#[test]
fn test_wallet_recipient_receives_returns() {
    let treasury = Actor(50);
    let mut sys = open_system();
    sys.set_provider(GOV, Side::B, Recipient::Wallet(treasury)).unwrap();
    let report = sys.liquidate_position(GOV).unwrap();
    sys.return_loose_to_providers(GOV).unwrap();
    assert_eq!(sys.balance_of(treasury, Token::B), report.returned_b);
    assert!(sys.balance_of_want(Side::A) > 0);
    // Unlinked side no longer counts joint assets
    assert_eq!(sys.estimated_total_assets(Side::B).unwrap(), sys.balance_of_want(Side::B));
}

// ============================================================================
// Donations, migration, cloning
// ============================================================================

#[test]
fn test_donation_is_reported_as_gain() {
    let mut sys = system();
    user_deposit(&mut sys, AMOUNT_A, AMOUNT_B);
    let pps = sys.price_per_share(Side::A).unwrap();

    let donation = AMOUNT_A / 10;
    sys.mint_to(WHALE, Token::A, donation).unwrap();
    sys.airdrop(WHALE, Holder::Provider(Side::A), Token::A, donation).unwrap();
    sys.set_invest_want(GOV, Side::A, false).unwrap();
    sys.set_take_profit(GOV, Side::A, true).unwrap();

    let report = sys.harvest(KEEPER, Side::A).unwrap();
    assert_eq!(report.gain, donation);
    assert!(sys.balance_of_want(Side::A) > 0);
    assert_eq!(sys.joint_estimated_total_assets(Side::A).unwrap(), 0);
    assert_eq!(sys.vault(Side::A).strategy.total_gain, donation);

    sys.advance(8 * 3600);
    assert!(sys.price_per_share(Side::A).unwrap() > pps);
}

#[test]
fn test_health_check_rejects_large_gain() {
    let mut sys = system();
    user_deposit(&mut sys, AMOUNT_A, AMOUNT_B);
    sys.set_invest_want(GOV, Side::A, false).unwrap();
    sys.harvest(KEEPER, Side::A).unwrap();

    sys.mint_to(WHALE, Token::A, AMOUNT_A / 10).unwrap();
    sys.airdrop(WHALE, Holder::Provider(Side::A), Token::A, AMOUNT_A / 10).unwrap();
    sys.set_do_health_check(GOV, Side::A, true).unwrap();
    assert!(matches!(
        sys.harvest(KEEPER, Side::A),
        Err(JointError::HealthCheckFailed { .. })
    ));
    sys.set_health_limits(GOV, Side::A, HealthCheck { profit_limit_bps: 2_000, loss_limit_bps: 1 })
        .unwrap();
    assert_eq!(sys.harvest(KEEPER, Side::A).unwrap().gain, AMOUNT_A / 10);
}

#[test]
fn test_migrate_provider_moves_want() {
    let mut sys = system();
    user_deposit(&mut sys, AMOUNT_A, AMOUNT_B);
    sys.harvest(KEEPER, Side::A).unwrap();
    assert!(matches!(
        sys.migrate_provider(GOV, Side::A),
        Err(JointError::InvalidState(_))
    ));

    sys.harvest(KEEPER, Side::B).unwrap();
    let want = sys.balance_of_want(Side::A);
    let before = supplies(&sys);
    sys.migrate_provider(GOV, Side::A).unwrap();
    assert_eq!(sys.provider(Side::A).generation, 1);
    assert_eq!(sys.balance_of_want(Side::A), want);
    assert_eq!(supplies(&sys), before);
    assert!(matches!(
        sys.migrate_provider(Actor::STRATEGIST, Side::A),
        Err(JointError::Unauthorized { .. })
    ));
}

#[test]
fn test_clone_and_replace_joint() {
    let mut sys = open_system();
    let fresh = sys.clone_joint(GOV).unwrap();
    assert!(!fresh.is_original());
    assert_eq!(fresh.config, sys.joint().config);

    assert!(matches!(
        sys.replace_joint(GOV, fresh.clone()),
        Err(JointError::InvalidState(_))
    ));
    sys.liquidate_position(GOV).unwrap();
    sys.return_loose_to_providers(GOV).unwrap();
    let old = sys.replace_joint(GOV, fresh).unwrap();
    assert!(old.is_original());
    assert_eq!(sys.clone_joint(GOV), Err(JointError::CloneOfClone));
}

#[test]
fn test_emergency_exit_on_both_sides_bounds_loss() {
    let mut sys = system();
    user_deposit(&mut sys, AMOUNT_A, AMOUNT_B);
    sys.harvest(KEEPER, Side::A).unwrap();
    sys.harvest(KEEPER, Side::B).unwrap();
    let hedge_cost = sys.joint().position().unwrap().hedge_cost;
    assert!(hedge_cost > 0);

    sys.set_emergency_exit(GOV, Side::A).unwrap();
    sys.set_emergency_exit(GOV, Side::B).unwrap();
    let epoch = sys
        .harvest(KEEPER, Side::A)
        .unwrap()
        .closed_epoch
        .expect("emergency harvest closes the epoch");
    sys.harvest(KEEPER, Side::B).unwrap();

    for side in Side::BOTH {
        assert_eq!(sys.estimated_total_assets(side).unwrap(), 0);
        assert_eq!(sys.vault(side).strategy.total_debt, 0);
    }
    assert_eq!(sys.joint().state(), JointState::Idle);

    // Everything valued in B at the closing price
    let price = ratio(epoch.price_at_close, SCALE);
    let loss_a = sys.vault(Side::A).strategy.total_loss as f64;
    let loss_b = sys.vault(Side::B).strategy.total_loss as f64;
    let fees = epoch.swap_fees_a as f64 * price + epoch.swap_fees_b as f64;
    assert!(loss_a + loss_b > 0.0);
    assert!(
        loss_a * price + loss_b <= hedge_cost as f64 + fees + price,
        "loss {} A + {} B above premium {} + fees {}",
        loss_a,
        loss_b,
        hedge_cost,
        fees
    );
}
