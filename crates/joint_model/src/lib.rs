//! Joint Model - two single-token providers sharing a hedged LP position
//!
//! Each side's vault lends want to a provider strategy. Both providers fund a
//! joint which, once per epoch, pairs A with B in the pool, stakes the LP in
//! a reward farm and buys impermanent-loss protection from a hedge pool. On
//! close the joint unwinds, sells rewards, rebalances so both sides realise
//! the same return and hands the tokens back.
//!
//! Everything is deterministic and in-memory. [`JointSystem`] owns the whole
//! world and applies every call as one all-or-nothing transaction.

#![forbid(unsafe_code)]

pub mod error;
pub mod token;
pub mod roles;
pub mod oracle;
pub mod market;
pub mod farm;
pub mod hedge;
pub mod vault;
pub mod provider;
pub mod rebalance;
pub mod joint;
pub mod system;

// Re-export commonly used types
pub use error::{JointError, Result};
pub use token::{Balances, Side, Token};
pub use roles::{Actor, Operation, Role, Roles};
pub use oracle::{MockAggregator, PoolMirrorFeed, PriceFeed};
pub use market::{Market, SwapReceipt};
pub use farm::{FarmConfig, RewardFarm};
pub use hedge::{HedgeError, HedgePoolConfig, HedgePosition, HedgeProvider, HedgeRequest, HedgeState, HedgilPool};
pub use vault::{ReportOutcome, StrategyParams, Vault, VaultConfig};
pub use provider::{HealthCheck, ProviderConfig, ProviderStrategy, Settlement};
pub use joint::{EpochReport, Joint, JointConfig, JointState, Position, Recipient, Transfer};
pub use system::{DefaultSystem, HarvestReport, Holder, JointSystem, SystemParams, LIQUIDITY_PROVIDER};

pub use amm_model::{BPS_SCALE, SCALE};
