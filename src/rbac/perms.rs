//! Permission bits and role masks
//!
//! A closed 32-bit permission set: one bit per agent kind plus two
//! system bits. Roles are constant masks over those bits and form a
//! strict hierarchy Guest < User < Operator < Admin; each role's mask is
//! a superset of the one below it.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::domain_types::AgentKind;

bitflags! {
    /// One bit per agent kind (bits 0..30) plus the system bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permission: u32 {
        /// Access to Monitor agents.
        const MONITOR = 1 << 0;
        /// Access to Researcher agents.
        const RESEARCHER = 1 << 1;
        /// Access to Architect agents.
        const ARCHITECT = 1 << 2;
        /// Access to Constructor agents.
        const CONSTRUCTOR = 1 << 3;
        /// Access to Patcher agents.
        const PATCHER = 1 << 4;
        /// Access to Debugger agents.
        const DEBUGGER = 1 << 5;
        /// Access to Testbed agents.
        const TESTBED = 1 << 6;
        /// Access to Linter agents.
        const LINTER = 1 << 7;
        /// Access to Optimizer agents.
        const OPTIMIZER = 1 << 8;
        /// Access to API-designer agents.
        const API_DESIGNER = 1 << 9;
        /// Access to Database agents.
        const DATABASE = 1 << 10;
        /// Access to Web agents.
        const WEB = 1 << 11;
        /// Access to Mobile agents.
        const MOBILE = 1 << 12;
        /// Access to Python-GUI agents.
        const PYGUI = 1 << 13;
        /// Access to TUI agents.
        const TUI = 1 << 14;
        /// Access to Data-science agents.
        const DATA_SCIENCE = 1 << 15;
        /// Access to MLOps agents.
        const MLOPS = 1 << 16;
        /// Access to Docgen agents.
        const DOCGEN = 1 << 17;
        /// Access to C-internal agents.
        const C_INTERNAL = 1 << 18;
        /// Access to Python-internal agents.
        const PYTHON_INTERNAL = 1 << 19;
        /// Access to Project-orchestrator agents.
        const PROJECT_ORCHESTRATOR = 1 << 20;
        /// Access to Security agents.
        const SECURITY = 1 << 21;
        /// Access to Bastion agents.
        const BASTION = 1 << 22;
        /// Access to Oversight agents.
        const OVERSIGHT = 1 << 23;
        /// Access to Infrastructure agents.
        const INFRASTRUCTURE = 1 << 24;
        /// Access to Deployer agents.
        const DEPLOYER = 1 << 25;
        /// Access to Packager agents.
        const PACKAGER = 1 << 26;
        /// Access to GNU-toolchain agents.
        const GNU = 1 << 27;
        /// Access to Kernel agents.
        const KERNEL = 1 << 28;
        /// Access to Embedded agents.
        const EMBEDDED = 1 << 29;
        /// Fabric configuration changes.
        const SYSTEM_CONFIG = 1 << 30;
        /// Fabric shutdown.
        const SYSTEM_SHUTDOWN = 1 << 31;
    }
}

impl Permission {
    /// The bit guarding access to agents of the given kind.
    #[must_use]
    pub fn for_kind(kind: AgentKind) -> Self {
        Self::from_bits_truncate(1 << kind.bit_index())
    }
}

/// User role; the hierarchy orders by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Read-only observation.
    Guest,
    /// Everyday development agents.
    User,
    /// Operational and security agents plus configuration.
    Operator,
    /// Every bit, including shutdown.
    Admin,
}

impl Role {
    /// All roles, least privileged first.
    pub const ALL: [Role; 4] = [Role::Guest, Role::User, Role::Operator, Role::Admin];

    /// The constant permission mask for this role.
    #[must_use]
    pub fn permissions(self) -> Permission {
        let guest = Permission::MONITOR | Permission::RESEARCHER;
        let user = guest
            | Permission::ARCHITECT
            | Permission::CONSTRUCTOR
            | Permission::PATCHER
            | Permission::DEBUGGER
            | Permission::TESTBED
            | Permission::LINTER
            | Permission::OPTIMIZER
            | Permission::API_DESIGNER
            | Permission::DATABASE
            | Permission::WEB
            | Permission::MOBILE
            | Permission::PYGUI
            | Permission::TUI
            | Permission::DATA_SCIENCE
            | Permission::MLOPS
            | Permission::DOCGEN
            | Permission::C_INTERNAL
            | Permission::PYTHON_INTERNAL;
        let operator = user
            | Permission::PROJECT_ORCHESTRATOR
            | Permission::SECURITY
            | Permission::BASTION
            | Permission::OVERSIGHT
            | Permission::INFRASTRUCTURE
            | Permission::DEPLOYER
            | Permission::PACKAGER
            | Permission::SYSTEM_CONFIG;
        match self {
            Role::Guest => guest,
            Role::User => user,
            Role::Operator => operator,
            Role::Admin => Permission::all(),
        }
    }
}
