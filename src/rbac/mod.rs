//! RBAC and session subsystem
//!
//! Users with argon2id-hashed credentials and a five-strike lockout,
//! sessions with an 8-hour TTL and random 63-byte printable tokens, a
//! role-to-permission bitmask with a strict Guest < User < Operator <
//! Admin hierarchy, and a bounded circular audit log. Every
//! externally-triggered fabric operation is expected to pass through
//! [`SecurityStore::check_permission`] before touching the router.

mod audit;
mod perms;
mod store;

pub use audit::{AUDIT_CAPACITY, AuditEntry, AuditLog, AuditStats};
pub use perms::{Permission, Role};
pub use store::{
    MAX_FAILED_LOGINS, MAX_SESSIONS, SESSION_TOKEN_LEN, SESSION_TTL, SecurityStore, Session,
    SessionToken, UserInfo,
};
