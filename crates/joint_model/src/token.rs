//! Token identifiers and per-holder balance ledgers

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::{JointError, Result};

/// Every asset the model moves around.
///
/// `Lp` is the A/B pair's LP token. `Other` covers airdropped junk that
/// governance can sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    A,
    B,
    Reward,
    Lp,
    Other(u16),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::A => f.write_str("A"),
            Token::B => f.write_str("B"),
            Token::Reward => f.write_str("REWARD"),
            Token::Lp => f.write_str("LP"),
            Token::Other(id) => write!(f, "OTHER{}", id),
        }
    }
}

impl FromStr for Token {
    type Err = JointError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "A" => Ok(Token::A),
            "B" => Ok(Token::B),
            "REWARD" => Ok(Token::Reward),
            "LP" => Ok(Token::Lp),
            other => other
                .strip_prefix("OTHER")
                .and_then(|id| id.parse().ok())
                .map(Token::Other)
                .ok_or(JointError::UnknownToken),
        }
    }
}

/// One of the two providers / one leg of the joint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub const BOTH: [Side; 2] = [Side::A, Side::B];

    pub fn token(self) -> Token {
        match self {
            Side::A => Token::A,
            Side::B => Token::B,
        }
    }

    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::A => "A",
            Side::B => "B",
        })
    }
}

impl FromStr for Side {
    type Err = JointError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "A" | "a" => Ok(Side::A),
            "B" | "b" => Ok(Side::B),
            _ => Err(JointError::UnknownToken),
        }
    }
}

/// Token ledger of a single holder. Zero entries are dropped so two ledgers
/// holding the same amounts always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Balances {
    amounts: BTreeMap<Token, u128>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: Token) -> u128 {
        self.amounts.get(&token).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, token: Token, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let slot = self.amounts.entry(token).or_insert(0);
        *slot = slot.checked_add(amount).ok_or(JointError::Overflow)?;
        Ok(())
    }

    pub fn debit(&mut self, token: Token, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let available = self.get(token);
        if available < amount {
            return Err(JointError::InsufficientBalance {
                token,
                needed: amount,
                available,
            });
        }
        if available == amount {
            self.amounts.remove(&token);
        } else {
            self.amounts.insert(token, available - amount);
        }
        Ok(())
    }

    /// Remove and return the whole balance of `token`
    pub fn take_all(&mut self, token: Token) -> u128 {
        self.amounts.remove(&token).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Token, u128)> + '_ {
        self.amounts.iter().map(|(t, a)| (*t, *a))
    }
}
