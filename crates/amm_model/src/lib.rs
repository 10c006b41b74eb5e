//! AMM Model - Pure constant product math (x·y=k) for the joint LP model
//!
//! This crate contains the pair formulas the joint relies on: swap quotes with
//! fee on input, proportional liquidity sizing, LP mint/burn and the price
//! helpers used by hedge settlement.
//!
//! No allocation, no panics: every function is total and reports failures
//! through [`AmmError`].

#![no_std]

pub mod math;
pub mod pair;

pub use math::{
    QuoteResult, get_amount_out, isqrt, liquidity_for_deposit, mul_div, optimal_deposit,
    quote, quote_swap, share_of_reserves, spot_price,
};
pub use pair::Pair;

/// Price scaling factor (1e18). Prices are "B per A" scaled by `SCALE`.
pub const SCALE: u128 = 1_000_000_000_000_000_000;

/// Basis points scale (10,000 bps = 100%)
pub const BPS_SCALE: u128 = 10_000;

/// LP units locked forever on the first mint
pub const MINIMUM_LIQUIDITY: u128 = 1_000;

/// Error types for AMM operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmmError {
    /// Invalid reserves (zero)
    InvalidReserves,
    /// Invalid amount (zero)
    InvalidAmount,
    /// Insufficient liquidity in pool
    InsufficientLiquidity,
    /// Output below the caller's minimum
    InsufficientOutput,
    /// Fee outside [0, BPS_SCALE)
    InvalidFee,
    /// Arithmetic overflow
    Overflow,
}

impl core::fmt::Display for AmmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            AmmError::InvalidReserves => "invalid reserves",
            AmmError::InvalidAmount => "invalid amount",
            AmmError::InsufficientLiquidity => "insufficient liquidity",
            AmmError::InsufficientOutput => "insufficient output amount",
            AmmError::InvalidFee => "invalid fee",
            AmmError::Overflow => "arithmetic overflow",
        };
        f.write_str(msg)
    }
}
