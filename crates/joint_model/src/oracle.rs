//! Price feeds consulted before the joint commits capital and when hedges settle.
//!
//! Prices are "B per A" scaled by [`amm_model::SCALE`], the same unit the pair
//! reports.

use crate::{JointError, Result};

pub trait PriceFeed {
    fn latest_price(&self) -> Result<u128>;

    /// Hook run after every pool trade with the new pool price
    fn observe(&mut self, _pool_price: u128) {}

    /// Operator-pushed price. Feeds that only read refuse.
    fn push_price(&mut self, _price: u128) -> Result<()> {
        Err(JointError::PriceFeedReadOnly)
    }
}

/// Aggregator whose answer only changes when someone pushes a price
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockAggregator {
    price: Option<u128>,
    rounds: u64,
}

impl MockAggregator {
    pub fn new(price: u128) -> Self {
        Self {
            price: Some(price),
            rounds: 1,
        }
    }

    pub fn set_price(&mut self, price: u128) {
        self.price = Some(price);
        self.rounds += 1;
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }
}

impl PriceFeed for MockAggregator {
    fn latest_price(&self) -> Result<u128> {
        self.price.ok_or(JointError::NoPrice)
    }

    fn push_price(&mut self, price: u128) -> Result<()> {
        if price == 0 {
            return Err(JointError::InvalidParameter("price must be positive"));
        }
        self.set_price(price);
        Ok(())
    }
}

/// Feed that follows the pool on every trade, so it can never disagree with it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMirrorFeed {
    price: Option<u128>,
}

impl PoolMirrorFeed {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PriceFeed for PoolMirrorFeed {
    fn latest_price(&self) -> Result<u128> {
        self.price.ok_or(JointError::NoPrice)
    }

    fn observe(&mut self, pool_price: u128) {
        self.price = Some(pool_price);
    }
}
