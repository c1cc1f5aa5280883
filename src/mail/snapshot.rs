//! Inbox snapshot: the ordered, deduplicated list of unread messages.
//!
//! 1. Open a read-only store session (blocking, under a timeout)
//! 2. List unseen UIDs, newest first, bounded by `limit`
//! 3. Fetch raw bodies, serialized on the one session
//! 4. Fan out normalization, join every task
//! 5. Sort, then drop duplicate ids

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::parser::normalize;
use super::store::MailStore;
use super::types::{FetchedBody, MailboxMode, NormalizedMessage};
use crate::error::MailError;

/// Builds inbox snapshots from a [`MailStore`].
#[derive(Clone)]
pub struct SnapshotBuilder {
    store: Arc<dyn MailStore>,
    timeout: Duration,
}

impl SnapshotBuilder {
    pub fn new(store: Arc<dyn MailStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Fetch up to `limit` unread messages, newest first.
    ///
    /// All-or-nothing at the session level: a connection, auth, list or batch
    /// failure returns `Err` and discards everything. A single message that
    /// fails to fetch is logged and left out.
    pub async fn build(&self, limit: usize) -> Result<Vec<NormalizedMessage>, MailError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let store = Arc::clone(&self.store);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let task = tokio::task::spawn_blocking(move || fetch_unseen(store.as_ref(), limit, &flag));

        // On timeout the worker stops before its next fetch and its
        // SessionGuard closes the session. A fetch already in flight is
        // bounded by the socket timeout.
        let fetched = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => {
                return Err(MailError::StoreOperation {
                    operation: "FETCH".into(),
                    reason: format!("fetch task failed: {e}"),
                });
            }
            Err(_) => {
                cancelled.store(true, AtomicOrdering::Relaxed);
                return Err(MailError::timeout(self.store.host(), self.timeout));
            }
        };

        if fetched.is_empty() {
            debug!("No unseen messages");
            return Ok(Vec::new());
        }

        let mut tasks = JoinSet::new();
        for FetchedBody { store_ref, raw } in fetched {
            match raw {
                Ok(raw) => {
                    tasks.spawn_blocking(move || normalize(&raw, Some(store_ref)));
                }
                Err(reason) => {
                    warn!(uid = store_ref.uid, reason = %reason, "Skipping message that failed to fetch");
                }
            }
        }

        let mut messages = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(message) => messages.push(message),
                Err(e) => warn!(error = %e, "Normalize task failed"),
            }
        }

        let snapshot = order_snapshot(messages, limit);
        info!(count = snapshot.len(), "Inbox snapshot built");
        Ok(snapshot)
    }
}

/// List + fetch on one read-only session, closed on every exit path.
///
/// Bodies are fetched one message at a time so `cancelled` is honored
/// between fetches.
fn fetch_unseen(
    store: &dyn MailStore,
    limit: usize,
    cancelled: &AtomicBool,
) -> Result<Vec<FetchedBody>, MailError> {
    let abandoned = || MailError::Connection {
        host: store.host().to_string(),
        reason: "fetch abandoned after timeout".into(),
    };

    let mut session = store.open(MailboxMode::ReadOnly)?;
    let refs = session.list_unseen(limit)?;
    if refs.is_empty() {
        return Ok(Vec::new());
    }
    debug!(candidates = refs.len(), "Fetching unseen message bodies");

    let mut fetched = Vec::with_capacity(refs.len());
    for store_ref in &refs {
        if cancelled.load(AtomicOrdering::Relaxed) {
            debug!(fetched = fetched.len(), remaining = refs.len() - fetched.len(), "Stopping fetch");
            return Err(abandoned());
        }
        fetched.extend(session.fetch_bodies(std::slice::from_ref(store_ref))?);
    }
    Ok(fetched)
}

/// Newest-first comparison.
///
/// Messages with a sequence hint come first, by hint descending and then
/// date descending. Messages without one follow, by date descending.
pub fn newest_first(a: &NormalizedMessage, b: &NormalizedMessage) -> Ordering {
    match (a.sequence_hint, b.sequence_hint) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.received_at.cmp(&a.received_at)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.received_at.cmp(&a.received_at),
    }
}

/// Sort newest first, keep the first message per id, and cap at `limit`.
///
/// Because sorting happens first, a duplicate id keeps the copy with the
/// higher sequence hint. Messages without an id are never merged.
pub fn order_snapshot(mut messages: Vec<NormalizedMessage>, limit: usize) -> Vec<NormalizedMessage> {
    messages.sort_by(newest_first);

    let mut seen_ids = HashSet::new();
    messages.retain(|m| match &m.id {
        Some(id) => {
            let first = seen_ids.insert(id.clone());
            if !first {
                debug!(message_id = %id, uid = ?m.sequence_hint, "Dropping duplicate Message-ID");
            }
            first
        }
        None => true,
    });
    messages.truncate(limit);
    messages
}
