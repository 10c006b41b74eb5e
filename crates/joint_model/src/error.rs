//! Error type shared by every module of the joint model

use amm_model::AmmError;
use thiserror::Error;

use crate::hedge::HedgeError;
use crate::roles::{Actor, Operation};
use crate::token::Token;

pub type Result<T> = core::result::Result<T, JointError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JointError {
    #[error("amm: {0}")]
    Amm(AmmError),

    #[error(transparent)]
    Hedge(#[from] HedgeError),

    #[error("{actor} is not allowed to call {op:?}")]
    Unauthorized { actor: Actor, op: Operation },

    #[error("joint already initialized")]
    AlreadyInitialized,

    #[error("joint is not initialized")]
    NotInitialized,

    #[error("cannot clone a cloned joint")]
    CloneOfClone,

    #[error("invalid joint state: {0}")]
    InvalidState(&'static str),

    #[error("no open position")]
    NoPosition,

    #[error("{0} is protected while a position is open")]
    ProtectedToken(Token),

    #[error("swap path not allowed")]
    InvalidSwapPath,

    #[error("unknown token")]
    UnknownToken,

    #[error("no pair for {0}/{1}")]
    UnknownPair(Token, Token),

    #[error("insufficient {token} balance: needed {needed}, available {available}")]
    InsufficientBalance {
        token: Token,
        needed: u128,
        available: u128,
    },

    #[error("oracle price {oracle} deviates from pool price {pool}")]
    PriceDeviation { oracle: u128, pool: u128 },

    #[error("price feed has no price")]
    NoPrice,

    #[error("price feed does not accept pushed prices")]
    PriceFeedReadOnly,

    #[error("unwind returned {returned} of {invested} invested (value in B)")]
    LossTooHigh { invested: u128, returned: u128 },

    #[error("health check failed: gain {gain}, loss {loss}, debt {debt}")]
    HealthCheckFailed { gain: u128, loss: u128, debt: u128 },

    #[error("vault holds {idle} idle, {requested} requested")]
    InsufficientVaultLiquidity { requested: u128, idle: u128 },

    #[error("insufficient shares: {requested} requested, {owned} owned")]
    InsufficientShares { requested: u128, owned: u128 },

    #[error("deposit limit exceeded")]
    DepositLimit,

    #[error("vault is in emergency shutdown")]
    VaultShutdown,

    #[error("insufficient stake: {requested} requested, {staked} staked")]
    InsufficientStake { requested: u128, staked: u128 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("arithmetic overflow")]
    Overflow,
}

impl From<AmmError> for JointError {
    fn from(e: AmmError) -> Self {
        JointError::Amm(e)
    }
}
