//! Users, credentials, and sessions
//!
//! Passwords are hashed with argon2id (library-default parameters,
//! 16-byte random salt) and stored as PHC strings that never leave this
//! module. The user lock is released around every KDF call: the hash is
//! copied out, verified, and the outcome written back under a fresh
//! lock, so lock hold times stay independent of KDF cost.
//!
//! Lock order: users < sessions < audit, and the locks are never nested;
//! each step acquires exactly one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use nutype::nutype;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::domain_types::{UserId, UserName};
use crate::error::RbacError;
use crate::rbac::audit::{AuditEntry, AuditLog, AuditStats};
use crate::rbac::perms::{Permission, Role};

/// Session lifetime.
pub const SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

/// Length of a session token in bytes.
pub const SESSION_TOKEN_LEN: usize = 63;

/// Consecutive failures that lock an account.
pub const MAX_FAILED_LOGINS: u32 = 5;

/// Maximum live sessions.
pub const MAX_SESSIONS: usize = 4096;

/// Random printable session token, exactly 63 ASCII bytes.
#[nutype(
    validate(predicate = |t| {
        t.len() == 63 && t.bytes().all(|b| (0x21..0x7f).contains(&b))
    }),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into, AsRef, Deref)
)]
pub struct SessionToken(String);

impl SessionToken {
    /// Borrows the inner token string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self
    }

    /// Mints a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let raw: String = (0..SESSION_TOKEN_LEN)
            .map(|_| char::from(rng.sample(rand::distributions::Alphanumeric)))
            .collect();
        Self::try_new(raw).unwrap_or_else(|_| {
            // Alphanumeric output always satisfies the predicate.
            unreachable!("generated token failed validation")
        })
    }
}

struct User {
    id: UserId,
    name: UserName,
    // PHC string; never exposed through any interface.
    password_hash: String,
    role: Role,
    permissions: Permission,
    active: bool,
    locked: bool,
    failed_logins: u32,
    created_at_ms: u64,
    last_activity_ms: u64,
}

/// Public view of a user; excludes the credential hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Stable user id.
    pub id: UserId,
    /// Unique user name.
    pub name: UserName,
    /// Assigned role.
    pub role: Role,
    /// Role-derived permission mask.
    pub permissions: Permission,
    /// Whether the account may authenticate.
    pub active: bool,
    /// Whether the account is locked out.
    pub locked: bool,
    /// Consecutive failed logins.
    pub failed_logins: u32,
    /// Creation wall time, Unix milliseconds.
    pub created_at_ms: u64,
    /// Last successful activity, Unix milliseconds.
    pub last_activity_ms: u64,
}

/// A live authenticated session.
///
/// Role and permission mask are snapshots taken at creation and rewritten
/// in place when the user's role changes.
#[derive(Debug, Clone)]
pub struct Session {
    /// Owning user.
    pub user_id: UserId,
    /// Role snapshot.
    pub role: Role,
    /// Permission snapshot.
    pub permissions: Permission,
    /// Creation time, monotonic ns.
    pub created_ns: u64,
    /// Last authorization check, monotonic ns.
    pub last_access_ns: u64,
    /// Expiry, monotonic ns.
    pub expires_ns: u64,
    /// Whether the session is live.
    pub active: bool,
    /// Client address recorded at login.
    pub client_addr: String,
    /// User agent recorded at login.
    pub user_agent: String,
}

struct Users {
    by_id: HashMap<UserId, User>,
    by_name: HashMap<UserName, UserId>,
}

/// The RBAC/session store.
///
/// Gates every externally-triggered fabric operation; each authorization
/// decision appends exactly one audit entry.
pub struct SecurityStore {
    users: RwLock<Users>,
    sessions: RwLock<HashMap<SessionToken, Session>>,
    audit: AuditLog,
    next_user_id: AtomicU32,
    clock: SharedClock,
}

impl std::fmt::Debug for SecurityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityStore")
            .field("users", &self.users.read().by_id.len())
            .field("sessions", &self.sessions.read().len())
            .field("audit", &self.audit.stats())
            .finish()
    }
}

impl SecurityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            users: RwLock::new(Users {
                by_id: HashMap::new(),
                by_name: HashMap::new(),
            }),
            sessions: RwLock::new(HashMap::new()),
            audit: AuditLog::new(),
            next_user_id: AtomicU32::new(1),
            clock,
        }
    }

    fn wall_ms(&self) -> u64 {
        self.clock
            .wall()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn audit_entry(
        &self,
        user_id: UserId,
        user_name: &str,
        action: &str,
        resource: &str,
        success: bool,
        failure_reason: Option<&str>,
        client_addr: &str,
        requested: Permission,
    ) {
        self.audit.append(AuditEntry {
            audit_id: 0,
            user_id,
            user_name: user_name.to_string(),
            action: action.to_string(),
            resource: resource.to_string(),
            success,
            failure_reason: failure_reason.map(str::to_string),
            client_addr: client_addr.to_string(),
            requested_bits: requested.bits(),
            at_unix_ms: self.wall_ms(),
        });
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Creates a user with a role-derived permission mask.
    ///
    /// The KDF runs before the user lock is taken.
    ///
    /// # Errors
    ///
    /// [`RbacError::UserExists`] for a duplicate name,
    /// [`RbacError::Hash`] if the KDF fails.
    pub fn create_user(
        &self,
        name: UserName,
        password: &str,
        role: Role,
    ) -> Result<UserId, RbacError> {
        let password_hash = hash_password(password)?;
        let now_ms = self.wall_ms();

        let mut users = self.users.write();
        if users.by_name.contains_key(&name) {
            return Err(RbacError::UserExists { name });
        }
        let id = UserId::new(self.next_user_id.fetch_add(1, Ordering::Relaxed));
        users.by_name.insert(name.clone(), id);
        users.by_id.insert(
            id,
            User {
                id,
                name: name.clone(),
                password_hash,
                role,
                permissions: role.permissions(),
                active: true,
                locked: false,
                failed_logins: 0,
                created_at_ms: now_ms,
                last_activity_ms: now_ms,
            },
        );
        info!(%id, %name, ?role, "user created");
        Ok(id)
    }

    /// Public view of a user by id.
    #[must_use]
    pub fn user_info(&self, id: UserId) -> Option<UserInfo> {
        let users = self.users.read();
        users.by_id.get(&id).map(|u| UserInfo {
            id: u.id,
            name: u.name.clone(),
            role: u.role,
            permissions: u.permissions,
            active: u.active,
            locked: u.locked,
            failed_logins: u.failed_logins,
            created_at_ms: u.created_at_ms,
            last_activity_ms: u.last_activity_ms,
        })
    }

    /// Changes a user's role and rewrites every live session of that
    /// user in place.
    ///
    /// # Errors
    ///
    /// [`RbacError::UserNotFound`].
    pub fn update_user_role(&self, id: UserId, role: Role) -> Result<(), RbacError> {
        {
            let mut users = self.users.write();
            let user = users.by_id.get_mut(&id).ok_or(RbacError::UserNotFound)?;
            user.role = role;
            user.permissions = role.permissions();
        }
        let mut sessions = self.sessions.write();
        for session in sessions.values_mut().filter(|s| s.user_id == id) {
            session.role = role;
            session.permissions = role.permissions();
        }
        info!(%id, ?role, "user role updated, live sessions rewritten");
        Ok(())
    }

    /// Clears a lockout. The acting session must hold the Admin role.
    ///
    /// # Errors
    ///
    /// [`RbacError::InvalidSession`] / [`RbacError::Expired`] for a bad
    /// acting session, [`RbacError::PermissionDenied`] when the acting
    /// session is not Admin, [`RbacError::UserNotFound`].
    pub fn unlock_user(
        &self,
        acting: &SessionToken,
        id: UserId,
        client_addr: &str,
    ) -> Result<(), RbacError> {
        let now = self.clock.monotonic_ns();
        let acting_session = {
            let sessions = self.sessions.read();
            sessions.get(acting).cloned()
        };
        let Some(session) = acting_session else {
            return Err(RbacError::InvalidSession);
        };
        if !session.active {
            return Err(RbacError::InvalidSession);
        }
        if now >= session.expires_ns {
            return Err(RbacError::Expired);
        }
        let acting_name = self
            .user_info(session.user_id)
            .map(|u| u.name.to_string())
            .unwrap_or_default();
        if session.role != Role::Admin {
            self.audit_entry(
                session.user_id,
                &acting_name,
                "user.unlock",
                "rbac/lockout",
                false,
                Some("admin role required"),
                client_addr,
                Permission::SYSTEM_CONFIG,
            );
            return Err(RbacError::PermissionDenied {
                requested: Permission::SYSTEM_CONFIG,
            });
        }

        {
            let mut users = self.users.write();
            let user = users.by_id.get_mut(&id).ok_or(RbacError::UserNotFound)?;
            user.locked = false;
            user.failed_logins = 0;
        }
        self.audit_entry(
            session.user_id,
            &acting_name,
            "user.unlock",
            "rbac/lockout",
            true,
            None,
            client_addr,
            Permission::SYSTEM_CONFIG,
        );
        info!(%id, "account unlocked");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Authentication and sessions
    // ------------------------------------------------------------------

    /// Verifies credentials and opens a session.
    ///
    /// Lockout: the failure counter increments on every mismatch; at
    /// [`MAX_FAILED_LOGINS`] consecutive failures the account locks and
    /// every later attempt, right or wrong, returns
    /// [`RbacError::Locked`] until an admin clears it. Success resets
    /// the counter.
    ///
    /// # Errors
    ///
    /// [`RbacError::UserNotFound`], [`RbacError::Locked`],
    /// [`RbacError::BadCredentials`],
    /// [`RbacError::PermissionDenied`] when the session table is full.
    pub fn authenticate(
        &self,
        name: &UserName,
        password: &str,
        client_addr: &str,
        user_agent: &str,
    ) -> Result<SessionToken, RbacError> {
        // Copy what verification needs, then release before the KDF.
        // Audit entries are appended only after the guard drops.
        enum Precheck {
            Unknown,
            Inactive(UserId),
            Locked(UserId),
            Proceed(UserId, UserName, String),
        }
        let precheck = {
            let users = self.users.read();
            match users.by_name.get(name) {
                None => Precheck::Unknown,
                Some(id) => {
                    let user = &users.by_id[id];
                    if !user.active {
                        Precheck::Inactive(user.id)
                    } else if user.locked {
                        Precheck::Locked(user.id)
                    } else {
                        Precheck::Proceed(
                            user.id,
                            user.name.clone(),
                            user.password_hash.clone(),
                        )
                    }
                }
            }
        };
        let (user_id, user_name, stored_hash) = match precheck {
            Precheck::Unknown => {
                self.audit_entry(
                    UserId::new(0),
                    name.as_str(),
                    "authenticate",
                    "rbac/session",
                    false,
                    Some("unknown user"),
                    client_addr,
                    Permission::empty(),
                );
                return Err(RbacError::UserNotFound);
            }
            Precheck::Inactive(id) => {
                self.audit_entry(
                    id,
                    name.as_str(),
                    "authenticate",
                    "rbac/session",
                    false,
                    Some("inactive account"),
                    client_addr,
                    Permission::empty(),
                );
                return Err(RbacError::UserNotFound);
            }
            Precheck::Locked(id) => {
                self.audit_entry(
                    id,
                    name.as_str(),
                    "authenticate",
                    "rbac/session",
                    false,
                    Some("account locked"),
                    client_addr,
                    Permission::empty(),
                );
                return Err(RbacError::Locked);
            }
            Precheck::Proceed(id, user_name, hash) => (id, user_name, hash),
        };

        let verified = verify_password(password, &stored_hash)?;

        if !verified {
            let now_locked = {
                let mut users = self.users.write();
                match users.by_id.get_mut(&user_id) {
                    Some(user) => {
                        user.failed_logins += 1;
                        if user.failed_logins >= MAX_FAILED_LOGINS {
                            user.locked = true;
                        }
                        user.locked
                    }
                    None => false,
                }
            };
            if now_locked {
                warn!(%user_id, "account locked after repeated failures");
            }
            self.audit_entry(
                user_id,
                user_name.as_str(),
                "authenticate",
                "rbac/session",
                false,
                Some("bad credentials"),
                client_addr,
                Permission::empty(),
            );
            return Err(RbacError::BadCredentials);
        }

        let (role, permissions) = {
            let mut users = self.users.write();
            let user = users.by_id.get_mut(&user_id).ok_or(RbacError::UserNotFound)?;
            user.failed_logins = 0;
            user.last_activity_ms = self.wall_ms();
            (user.role, user.permissions)
        };

        let token = self.create_session(user_id, role, permissions, client_addr, user_agent)?;
        self.audit_entry(
            user_id,
            user_name.as_str(),
            "authenticate",
            "rbac/session",
            true,
            None,
            client_addr,
            Permission::empty(),
        );
        Ok(token)
    }

    fn create_session(
        &self,
        user_id: UserId,
        role: Role,
        permissions: Permission,
        client_addr: &str,
        user_agent: &str,
    ) -> Result<SessionToken, RbacError> {
        let now = self.clock.monotonic_ns();
        let ttl_ns = u64::try_from(SESSION_TTL.as_nanos()).unwrap_or(u64::MAX);
        let token = SessionToken::generate();
        let mut sessions = self.sessions.write();
        if sessions.len() >= MAX_SESSIONS {
            return Err(RbacError::CapacityExceeded {
                resource: "session table",
            });
        }
        sessions.insert(
            token.clone(),
            Session {
                user_id,
                role,
                permissions,
                created_ns: now,
                last_access_ns: now,
                expires_ns: now.saturating_add(ttl_ns),
                active: true,
                client_addr: client_addr.to_string(),
                user_agent: user_agent.to_string(),
            },
        );
        Ok(token)
    }

    /// Authorizes one action against a session.
    ///
    /// Exactly one audit entry is appended per call, success or not.
    /// Expired sessions are marked inactive on the spot; they never
    /// authorize, even before the cleanup sweep collects them.
    ///
    /// # Errors
    ///
    /// [`RbacError::InvalidSession`], [`RbacError::Expired`],
    /// [`RbacError::PermissionDenied`].
    pub fn check_permission(
        &self,
        token: &SessionToken,
        requested: Permission,
        resource: &str,
        client_addr: &str,
    ) -> Result<(), RbacError> {
        let now = self.clock.monotonic_ns();
        enum Decision {
            Ok(UserId),
            Invalid,
            Expired(UserId),
            Denied(UserId),
        }

        let decision = {
            let mut sessions = self.sessions.write();
            match sessions.get_mut(token) {
                None => Decision::Invalid,
                Some(session) if !session.active => Decision::Invalid,
                Some(session) if now >= session.expires_ns => {
                    session.active = false;
                    Decision::Expired(session.user_id)
                }
                Some(session) if !session.permissions.contains(requested) => {
                    Decision::Denied(session.user_id)
                }
                Some(session) => {
                    session.last_access_ns = now;
                    Decision::Ok(session.user_id)
                }
            }
        };

        let name_of = |id: UserId| {
            self.user_info(id)
                .map(|u| u.name.to_string())
                .unwrap_or_default()
        };

        match decision {
            Decision::Ok(user_id) => {
                self.audit_entry(
                    user_id,
                    &name_of(user_id),
                    "check_permission",
                    resource,
                    true,
                    None,
                    client_addr,
                    requested,
                );
                Ok(())
            }
            Decision::Invalid => {
                self.audit_entry(
                    UserId::new(0),
                    "",
                    "check_permission",
                    resource,
                    false,
                    Some("invalid session"),
                    client_addr,
                    requested,
                );
                Err(RbacError::InvalidSession)
            }
            Decision::Expired(user_id) => {
                self.audit_entry(
                    user_id,
                    &name_of(user_id),
                    "check_permission",
                    resource,
                    false,
                    Some("session expired"),
                    client_addr,
                    requested,
                );
                Err(RbacError::Expired)
            }
            Decision::Denied(user_id) => {
                self.audit_entry(
                    user_id,
                    &name_of(user_id),
                    "check_permission",
                    resource,
                    false,
                    Some("permission denied"),
                    client_addr,
                    requested,
                );
                Err(RbacError::PermissionDenied { requested })
            }
        }
    }

    /// Destroys a session.
    ///
    /// # Errors
    ///
    /// [`RbacError::InvalidSession`] for an unknown token.
    pub fn revoke(&self, token: &SessionToken) -> Result<(), RbacError> {
        let mut sessions = self.sessions.write();
        sessions
            .remove(token)
            .map(|_| ())
            .ok_or(RbacError::InvalidSession)
    }

    /// Removes expired and deactivated sessions; returns how many.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.monotonic_ns();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.active && now < s.expires_ns);
        before - sessions.len()
    }

    /// Session view by token.
    #[must_use]
    pub fn session(&self, token: &SessionToken) -> Option<Session> {
        self.sessions.read().get(token).cloned()
    }

    /// Live session count.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// The last `n` audit entries in arrival order.
    #[must_use]
    pub fn audit_tail(&self, n: usize) -> Vec<AuditEntry> {
        self.audit.last(n)
    }

    /// Audit counters.
    #[must_use]
    pub fn audit_stats(&self) -> AuditStats {
        self.audit.stats()
    }

    /// Writes the audit log as NDJSON.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the writer.
    pub fn export_audit<W: std::io::Write>(&self, writer: W) -> std::io::Result<()> {
        self.audit.export_ndjson(writer)
    }
}

fn hash_password(password: &str) -> Result<String, RbacError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RbacError::Hash {
            reason: e.to_string(),
        })
}

fn verify_password(password: &str, stored: &str) -> Result<bool, RbacError> {
    let parsed = PasswordHash::new(stored).map_err(|e| RbacError::Hash {
        reason: e.to_string(),
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn store() -> (SecurityStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (SecurityStore::new(clock.clone()), clock)
    }

    fn username(s: &str) -> UserName {
        UserName::try_new(s.to_string()).unwrap()
    }

    #[test]
    fn token_is_63_printable_ascii_bytes() {
        let token = SessionToken::generate();
        let raw = token.as_str();
        assert_eq!(raw.len(), 63);
        assert!(raw.bytes().all(|b| (0x21..0x7f).contains(&b)));
    }

    #[test]
    fn duplicate_user_names_rejected() {
        let (store, _) = store();
        store.create_user(username("alice"), "pw", Role::User).unwrap();
        assert!(matches!(
            store.create_user(username("alice"), "pw2", Role::Guest),
            Err(RbacError::UserExists { .. })
        ));
    }

    #[test]
    fn session_expiry_is_enforced_before_cleanup() {
        let (store, clock) = store();
        store.create_user(username("alice"), "pw", Role::User).unwrap();
        let token = store.authenticate(&username("alice"), "pw", "127.0.0.1", "test").unwrap();

        store
            .check_permission(&token, Permission::CONSTRUCTOR, "agents/constructor", "127.0.0.1")
            .unwrap();

        clock.advance(SESSION_TTL);
        assert!(matches!(
            store.check_permission(&token, Permission::CONSTRUCTOR, "agents/constructor", "127.0.0.1"),
            Err(RbacError::Expired)
        ));
        // The session is now inactive even though not yet collected.
        assert!(!store.session(&token).unwrap().active);
        assert_eq!(store.cleanup_expired(), 1);
        assert!(store.session(&token).is_none());
    }

    #[test]
    fn role_update_rewrites_live_sessions() {
        let (store, _) = store();
        let id = store.create_user(username("bob"), "pw", Role::Guest).unwrap();
        let token = store.authenticate(&username("bob"), "pw", "127.0.0.1", "test").unwrap();

        assert!(matches!(
            store.check_permission(&token, Permission::WEB, "agents/web", "127.0.0.1"),
            Err(RbacError::PermissionDenied { .. })
        ));

        store.update_user_role(id, Role::User).unwrap();
        store
            .check_permission(&token, Permission::WEB, "agents/web", "127.0.0.1")
            .unwrap();
    }

    #[test]
    fn every_check_permission_appends_one_audit_entry() {
        let (store, _) = store();
        store.create_user(username("carol"), "pw", Role::User).unwrap();
        let token = store.authenticate(&username("carol"), "pw", "10.0.0.1", "test").unwrap();
        let before = store.audit_stats().total_written;

        store
            .check_permission(&token, Permission::MONITOR, "agents/monitor", "10.0.0.1")
            .unwrap();
        let _ = store.check_permission(
            &token,
            Permission::SYSTEM_SHUTDOWN,
            "fabric/shutdown",
            "10.0.0.1",
        );

        assert_eq!(store.audit_stats().total_written, before + 2);
        let tail = store.audit_tail(2);
        assert!(tail[0].success);
        assert!(!tail[1].success);
        assert_eq!(tail[1].failure_reason.as_deref(), Some("permission denied"));
    }

    #[test]
    fn revoked_session_stops_authorizing() {
        let (store, _) = store();
        store.create_user(username("dave"), "pw", Role::User).unwrap();
        let token = store.authenticate(&username("dave"), "pw", "127.0.0.1", "test").unwrap();
        store.revoke(&token).unwrap();
        assert!(matches!(
            store.check_permission(&token, Permission::MONITOR, "agents/monitor", "127.0.0.1"),
            Err(RbacError::InvalidSession)
        ));
    }
}
