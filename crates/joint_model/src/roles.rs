//! Role table: who may call what

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{JointError, Result};

/// Opaque caller identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Actor(pub u32);

impl Actor {
    pub const GOVERNANCE: Actor = Actor(0);
    pub const STRATEGIST: Actor = Actor(1);
    pub const KEEPER: Actor = Actor(2);
    pub const GUARDIAN: Actor = Actor(3);
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Governance,
    Strategist,
    Keeper,
    Guardian,
}

/// Permissioned entry points, grouped by who may call them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Provider and joint harvests
    Harvest,
    /// Operator escape hatches on the joint
    ManualOperation,
    /// Provider and joint settings
    Configure,
    /// Full unwind without the loss check
    Liquidate,
    ReturnLoose,
    /// Reward to A/B swaps
    SwapRewards,
    EmergencyExit,
    Sweep,
    SetProvider,
    CloneJoint,
    Migrate,
    /// Vault debt ratio updates
    ManageVault,
}

impl Operation {
    pub fn allowed_roles(self) -> &'static [Role] {
        use Role::*;
        match self {
            Operation::Harvest => &[Governance, Strategist, Keeper],
            Operation::ManualOperation
            | Operation::Configure
            | Operation::ReturnLoose
            | Operation::SwapRewards => &[Governance, Strategist],
            Operation::Liquidate | Operation::EmergencyExit => &[Governance, Strategist, Guardian],
            Operation::ManageVault => &[Governance, Strategist],
            Operation::Sweep | Operation::SetProvider | Operation::CloneJoint | Operation::Migrate => {
                &[Governance]
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roles {
    members: BTreeMap<Role, BTreeSet<Actor>>,
}

impl Roles {
    pub fn new() -> Self {
        Self::default()
    }

    /// One well-known actor per role
    pub fn standard() -> Self {
        let mut roles = Self::new();
        roles.grant(Role::Governance, Actor::GOVERNANCE);
        roles.grant(Role::Strategist, Actor::STRATEGIST);
        roles.grant(Role::Keeper, Actor::KEEPER);
        roles.grant(Role::Guardian, Actor::GUARDIAN);
        roles
    }

    pub fn grant(&mut self, role: Role, actor: Actor) {
        self.members.entry(role).or_default().insert(actor);
    }

    pub fn revoke(&mut self, role: Role, actor: Actor) {
        if let Some(set) = self.members.get_mut(&role) {
            set.remove(&actor);
        }
    }

    pub fn has_role(&self, actor: Actor, role: Role) -> bool {
        self.members.get(&role).map_or(false, |s| s.contains(&actor))
    }

    pub fn can(&self, actor: Actor, op: Operation) -> bool {
        op.allowed_roles().iter().any(|r| self.has_role(actor, *r))
    }

    pub fn require(&self, actor: Actor, op: Operation) -> Result<()> {
        if self.can(actor, op) {
            Ok(())
        } else {
            Err(JointError::Unauthorized { actor, op })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_permissions() {
        let roles = Roles::standard();
        assert!(roles.can(Actor::KEEPER, Operation::Harvest));
        assert!(!roles.can(Actor::KEEPER, Operation::ManualOperation));
        assert!(roles.can(Actor::STRATEGIST, Operation::ManualOperation));
        assert!(!roles.can(Actor::STRATEGIST, Operation::Sweep));
        assert!(roles.can(Actor::GUARDIAN, Operation::EmergencyExit));
        assert!(roles.can(Actor::GOVERNANCE, Operation::CloneJoint));
        assert!(!roles.can(Actor(99), Operation::Harvest));
    }

    #[test]
    fn test_revoke() {
        let mut roles = Roles::standard();
        roles.revoke(Role::Keeper, Actor::KEEPER);
        assert_eq!(
            roles.require(Actor::KEEPER, Operation::Harvest),
            Err(JointError::Unauthorized {
                actor: Actor::KEEPER,
                op: Operation::Harvest
            })
        );
    }
}
