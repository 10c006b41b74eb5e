//! Shared fixtures for the integration tests

#![allow(dead_code)]

use joint_model::*;

pub const GOV: Actor = Actor::GOVERNANCE;
pub const KEEPER: Actor = Actor::KEEPER;
pub const USER: Actor = Actor(10);
pub const WHALE: Actor = Actor(11);

pub const AMOUNT_A: u128 = 10_000_000_000;
pub const AMOUNT_B: u128 = 20_000_000_000_000;

pub const TOKENS: [Token; 4] = [Token::A, Token::B, Token::Reward, Token::Lp];

pub fn system() -> DefaultSystem {
    DefaultSystem::with_defaults(SystemParams::default()).unwrap()
}

pub fn user_deposit(sys: &mut DefaultSystem, amount_a: u128, amount_b: u128) {
    sys.mint_to(USER, Token::A, amount_a).unwrap();
    sys.mint_to(USER, Token::B, amount_b).unwrap();
    sys.deposit(USER, Side::A, amount_a).unwrap();
    sys.deposit(USER, Side::B, amount_b).unwrap();
}

/// Harvest both providers to open an epoch, then stop new lending
pub fn gov_start_epoch(sys: &mut DefaultSystem) {
    sys.harvest(GOV, Side::A).unwrap();
    let report = sys.harvest(GOV, Side::B).unwrap();
    assert!(report.opened_epoch.is_some());
    sys.update_debt_ratio(GOV, Side::A, 0).unwrap();
    sys.update_debt_ratio(GOV, Side::B, 0).unwrap();
}

/// Harvest both providers (closing the epoch), then restore lending
pub fn gov_end_epoch(sys: &mut DefaultSystem) -> HarvestReport {
    let report = sys.harvest(GOV, Side::A).unwrap();
    sys.harvest(GOV, Side::B).unwrap();
    sys.update_debt_ratio(GOV, Side::A, BPS_SCALE).unwrap();
    sys.update_debt_ratio(GOV, Side::B, BPS_SCALE).unwrap();
    report
}

/// Move the clock to `fraction_bps` of the running epoch's period
pub fn wait_period_fraction(sys: &mut DefaultSystem, fraction_bps: u64) {
    let period = sys.joint().position().unwrap().epoch.period;
    sys.advance(period * fraction_bps / 10_000);
}

/// Whale sells `amount` of `from` into the A/B pair and the oracle follows
pub fn whale_swap(sys: &mut DefaultSystem, from: Token, amount: u128) {
    let to = if from == Token::A { Token::B } else { Token::A };
    sys.mint_to(WHALE, from, amount).unwrap();
    sys.swap(WHALE, &[from, to], amount, 0).unwrap();
    sys.sync_price().unwrap();
}

pub fn supplies(sys: &DefaultSystem) -> Vec<u128> {
    TOKENS.iter().map(|t| sys.total_supply_of(*t)).collect()
}

/// Vault A valued in B plus vault B
pub fn vaults_value_in_b(sys: &DefaultSystem) -> u128 {
    let price = sys.price().unwrap();
    sys.vault(Side::A).total_assets() * price / SCALE + sys.vault(Side::B).total_assets()
}

pub fn ratio(num: u128, den: u128) -> f64 {
    num as f64 / den as f64
}
