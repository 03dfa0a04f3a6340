//! Circular audit log
//!
//! Fixed capacity of 8192 entries; the oldest entry is overwritten on
//! overflow and the overwrite is counted, never silent. Audit ids are
//! monotonic, so the read API can return the last N entries in arrival
//! order. Optional persistence is NDJSON: one entry per line, UTF-8,
//! fields in declaration order.
//!
//! The audit mutex is the innermost lock in the fabric; callers must not
//! hold any other lock while appending.

use std::io::Write;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain_types::UserId;

/// Audit ring capacity.
pub const AUDIT_CAPACITY: usize = 8192;

/// One authorization or authentication decision.
///
/// Field order is the persisted NDJSON order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic id, assigned at append.
    pub audit_id: u64,
    /// Acting user; zero when the session did not resolve.
    pub user_id: UserId,
    /// User name snapshot at decision time.
    pub user_name: String,
    /// What was attempted, e.g. `"authenticate"` or `"check_permission"`.
    pub action: String,
    /// The resource the action targeted.
    pub resource: String,
    /// Whether the action was allowed.
    pub success: bool,
    /// Failure reason for denied actions.
    pub failure_reason: Option<String>,
    /// Caller network address.
    pub client_addr: String,
    /// Raw bits of the requested permission.
    pub requested_bits: u32,
    /// Wall-clock time in Unix milliseconds.
    pub at_unix_ms: u64,
}

struct Ring {
    entries: Vec<Option<AuditEntry>>,
    /// Total entries ever written; doubles as the next audit id.
    total: u64,
    overwritten: u64,
}

/// Audit log counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuditStats {
    /// Entries currently retained.
    pub len: usize,
    /// Entries ever written.
    pub total_written: u64,
    /// Entries lost to overwrite.
    pub overwritten: u64,
}

/// The bounded audit log.
pub struct AuditLog {
    ring: Mutex<Ring>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog").field("stats", &self.stats()).finish()
    }
}

impl AuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(Ring {
                entries: (0..AUDIT_CAPACITY).map(|_| None).collect(),
                total: 0,
                overwritten: 0,
            }),
        }
    }

    /// Appends an entry, assigning its audit id.
    pub fn append(&self, mut entry: AuditEntry) -> u64 {
        let mut ring = self.ring.lock();
        let id = ring.total;
        entry.audit_id = id;
        let idx = (id % AUDIT_CAPACITY as u64) as usize;
        if ring.entries[idx].is_some() {
            ring.overwritten += 1;
        }
        ring.entries[idx] = Some(entry);
        ring.total += 1;
        id
    }

    /// The last `n` entries in arrival order (oldest of the n first).
    #[must_use]
    pub fn last(&self, n: usize) -> Vec<AuditEntry> {
        let ring = self.ring.lock();
        let available = ring.total.min(AUDIT_CAPACITY as u64);
        let take = (n as u64).min(available);
        let mut out = Vec::with_capacity(take as usize);
        for id in (ring.total - take)..ring.total {
            let idx = (id % AUDIT_CAPACITY as u64) as usize;
            if let Some(entry) = &ring.entries[idx] {
                out.push(entry.clone());
            }
        }
        out
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> AuditStats {
        let ring = self.ring.lock();
        AuditStats {
            len: ring.total.min(AUDIT_CAPACITY as u64) as usize,
            total_written: ring.total,
            overwritten: ring.overwritten,
        }
    }

    /// Writes every retained entry as NDJSON, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors from the writer.
    pub fn export_ndjson<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let entries = self.last(AUDIT_CAPACITY);
        for entry in entries {
            let line = serde_json::to_string(&entry)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(action: &str) -> AuditEntry {
        AuditEntry {
            audit_id: 0,
            user_id: UserId::new(1),
            user_name: "alice".to_string(),
            action: action.to_string(),
            resource: "topic/alerts".to_string(),
            success: true,
            failure_reason: None,
            client_addr: "127.0.0.1".to_string(),
            requested_bits: 1,
            at_unix_ms: 0,
        }
    }

    #[test]
    fn ids_are_monotonic() {
        let log = AuditLog::new();
        let a = log.append(entry("one"));
        let b = log.append(entry("two"));
        assert_eq!(b, a + 1);
    }

    #[test]
    fn last_returns_arrival_order() {
        let log = AuditLog::new();
        for i in 0..10 {
            log.append(entry(&format!("action-{i}")));
        }
        let tail = log.last(3);
        let actions: Vec<&str> = tail.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, ["action-7", "action-8", "action-9"]);
    }

    #[test]
    fn overflow_overwrites_oldest_and_counts() {
        let log = AuditLog::new();
        for i in 0..(AUDIT_CAPACITY + 5) {
            log.append(entry(&format!("a{i}")));
        }
        let stats = log.stats();
        assert_eq!(stats.len, AUDIT_CAPACITY);
        assert_eq!(stats.total_written, (AUDIT_CAPACITY + 5) as u64);
        assert_eq!(stats.overwritten, 5);
        // The oldest retained entry is the sixth ever written.
        let all = log.last(AUDIT_CAPACITY);
        assert_eq!(all.first().map(|e| e.action.as_str()), Some("a5"));
    }

    #[test]
    fn ndjson_is_one_object_per_line() {
        let log = AuditLog::new();
        log.append(entry("first"));
        log.append(entry("second"));
        let mut buf = Vec::new();
        log.export_ndjson(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: AuditEntry = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.user_name, "alice");
        }
    }
}
