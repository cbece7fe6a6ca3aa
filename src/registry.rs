// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The server-side handle registry (§4.3): a bijection between handles and
//! connection ids, kept as two `DashMap` indices that are always mutually
//! consistent.
//!
//! Grounded on `client/pool_sessions.rs`'s `Pool`/`Session` maps: a
//! `DashMap`-backed collection addressed by a small integer key, with entries
//! inserted/removed as connections come and go.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::ChatError;

/// An opaque, process-unique, never-reused identifier for one live
/// connection (§3). Assigned by [`ConnIdGenerator`] at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Hands out monotonically increasing [`ConnId`]s. One instance is shared by
/// the whole server.
#[derive(Debug, Default)]
pub struct ConnIdGenerator(AtomicU64);

impl ConnIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> ConnId {
        ConnId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

struct RegEntry {
    conn: ConnId,
    /// Registration order, used to keep `snapshot()` deterministic (§4.3,
    /// the roster-listing scenario in §8 registers in order and expects the
    /// same order back).
    seq: u64,
}

/// The handle↔connection bijection. All operations are constant-expected-time
/// and atomic with respect to each other.
#[derive(Debug, Default)]
pub struct Registry {
    by_handle: DashMap<String, RegEntry>,
    by_conn: DashMap<ConnId, String>,
    next_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            by_handle: DashMap::new(),
            by_conn: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Registers `handle` for `conn`. Fails with [`ChatError::DuplicateHandle`]
    /// if the handle is already taken; leaves both indices unchanged on
    /// failure.
    pub fn add(&self, handle: &str, conn: ConnId) -> Result<(), ChatError> {
        use dashmap::mapref::entry::Entry as MapEntry;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match self.by_handle.entry(handle.to_string()) {
            MapEntry::Occupied(_) => Err(ChatError::DuplicateHandle(handle.to_string())),
            MapEntry::Vacant(slot) => {
                slot.insert(RegEntry { conn, seq });
                self.by_conn.insert(conn, handle.to_string());
                Ok(())
            },
        }
    }

    /// Removes the entry owning `conn`, if any.
    pub fn remove_by_conn(&self, conn: ConnId) -> Option<String> {
        let (_, handle) = self.by_conn.remove(&conn)?;
        self.by_handle.remove(&handle);
        Some(handle)
    }

    pub fn lookup_by_handle(&self, handle: &str) -> Option<ConnId> {
        self.by_handle.get(handle).map(|e| e.conn)
    }

    pub fn lookup_by_conn(&self, conn: ConnId) -> Option<String> {
        self.by_conn.get(&conn).map(|h| h.clone())
    }

    pub fn count(&self) -> usize {
        self.by_handle.len()
    }

    /// A point-in-time, owned copy of all entries, ordered by registration
    /// sequence. Safe to iterate over while performing I/O: some of the
    /// returned conns may have since closed, which callers must tolerate.
    pub fn snapshot(&self) -> Vec<(String, ConnId)> {
        let mut entries: Vec<(String, ConnId, u64)> = self
            .by_handle
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().conn, kv.value().seq))
            .collect();
        entries.sort_by_key(|(_, _, seq)| *seq);
        entries
            .into_iter()
            .map(|(handle, conn, _)| (handle, conn))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_lookup_both_directions() {
        let reg = Registry::new();
        let gen = ConnIdGenerator::new();
        let c = gen.next();
        reg.add("alice", c).expect("add failed");
        assert_eq!(reg.lookup_by_handle("alice"), Some(c));
        assert_eq!(reg.lookup_by_conn(c), Some("alice".to_string()));
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn duplicate_handle_leaves_indices_unchanged() {
        let reg = Registry::new();
        let gen = ConnIdGenerator::new();
        let c1 = gen.next();
        let c2 = gen.next();
        reg.add("alice", c1).expect("add failed");
        let err = reg.add("alice", c2).expect_err("expected duplicate error");
        assert!(matches!(err, ChatError::DuplicateHandle(_)));
        assert_eq!(reg.lookup_by_handle("alice"), Some(c1));
        assert_eq!(reg.lookup_by_conn(c2), None);
        assert_eq!(reg.count(), 1);
    }

    #[test]
    fn remove_by_conn_clears_both_indices() {
        let reg = Registry::new();
        let gen = ConnIdGenerator::new();
        let c = gen.next();
        reg.add("alice", c).expect("add failed");
        assert_eq!(reg.remove_by_conn(c), Some("alice".to_string()));
        assert_eq!(reg.lookup_by_handle("alice"), None);
        assert_eq!(reg.lookup_by_conn(c), None);
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn snapshot_is_ordered_by_registration() {
        let reg = Registry::new();
        let gen = ConnIdGenerator::new();
        for name in ["alice", "bob", "carol"] {
            reg.add(name, gen.next()).expect("add failed");
        }
        let names: Vec<_> = reg.snapshot().into_iter().map(|(h, _)| h).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn conn_ids_are_never_reused() {
        let gen = ConnIdGenerator::new();
        let a = gen.next();
        let b = gen.next();
        assert_ne!(a, b);
    }
}
