//! Duplicate publish suppression
//!
//! Remembers recent write actions by `(kind, target, fingerprint)` for a
//! bounded window so a double click or retry storm cannot publish the same
//! content twice. Records live in memory only and are lost on restart.

use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::ActionKind;

/// Upper bound on remembered actions; the oldest are dropped first
pub const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
struct RecentAction {
    at: Instant,
    kind: ActionKind,
    target: String,
    fingerprint: String,
}

/// SHA-256 hex digest of the trimmed payload
pub fn fingerprint(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.trim().as_bytes()))
}

/// Fingerprint input for a media upload: the caption plus a digest of the bytes
pub fn media_content(caption: &str, bytes: &[u8]) -> String {
    format!("{}\n{:x}", caption.trim(), Sha256::digest(bytes))
}

pub struct DuplicateGuard {
    window: Duration,
    capacity: usize,
    records: Mutex<VecDeque<RecentAction>>,
}

impl DuplicateGuard {
    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Check whether this action was already issued within the window
    ///
    /// When it was not, the action is recorded before returning `false`, so
    /// check and insert happen in one step.
    pub fn is_duplicate(&self, kind: ActionKind, target: &str, content: &str) -> bool {
        let fingerprint = fingerprint(content);
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = Instant::now();
        while let Some(oldest) = records.front() {
            if now.duration_since(oldest.at) > self.window {
                records.pop_front();
            } else {
                break;
            }
        }

        let seen = records
            .iter()
            .any(|r| r.kind == kind && r.target == target && r.fingerprint == fingerprint);
        if seen {
            tracing::info!(kind = %kind, target, "Duplicate action suppressed");
            return true;
        }

        records.push_back(RecentAction {
            at: now,
            kind,
            target: target.to_string(),
            fingerprint,
        });
        if records.len() > self.capacity {
            records.pop_front();
        }
        false
    }

    /// Drop the most recent record of this action
    ///
    /// Used when an admitted action was never sent, so a later attempt is
    /// not reported as a duplicate. Returns whether a record was removed.
    pub fn forget(&self, kind: ActionKind, target: &str, content: &str) -> bool {
        let fingerprint = fingerprint(content);
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let found = records
            .iter()
            .rposition(|r| r.kind == kind && r.target == target && r.fingerprint == fingerprint);
        match found {
            Some(index) => {
                records.remove(index);
                tracing::debug!(kind = %kind, target, "Unsent action forgotten");
                true
            }
            None => false,
        }
    }

    /// Number of live records (after the last prune)
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
