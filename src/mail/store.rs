//! Message store abstraction: short-lived sessions opened per operation.
//!
//! Sessions are blocking; async callers drive them from `spawn_blocking`.

use std::ops::{Deref, DerefMut};

use tracing::debug;

use super::types::{FetchedBody, MailboxMode, StoreRef};
use crate::error::MailError;

/// Opens authenticated sessions against a remote mailbox.
pub trait MailStore: Send + Sync {
    /// Host name, for error reporting.
    fn host(&self) -> &str;

    /// Connect, authenticate and open the configured mailbox in `mode`.
    fn connect(&self, mode: MailboxMode) -> Result<Box<dyn StoreSession>, MailError>;

    /// Connect and wrap the session so it is closed on every exit path.
    fn open(&self, mode: MailboxMode) -> Result<SessionGuard, MailError> {
        self.connect(mode).map(SessionGuard::new)
    }
}

/// One stateful conversation with the store.
pub trait StoreSession: Send {
    /// Unseen messages, newest first, at most `limit`.
    fn list_unseen(&mut self, limit: usize) -> Result<Vec<StoreRef>, MailError>;

    /// Full raw content for each reference. A single message failing is
    /// recorded in its [`FetchedBody`]; only session-level failures return `Err`.
    fn fetch_bodies(&mut self, refs: &[StoreRef]) -> Result<Vec<FetchedBody>, MailError>;

    /// Set `\Seen` on the message whose Message-ID header matches `message_id`.
    /// `Ok(false)` when nothing matches.
    fn mark_seen(&mut self, message_id: &str) -> Result<bool, MailError>;

    /// Release the session. Must be safe to call more than once.
    fn close(&mut self);
}

/// Owns a session and closes it when dropped.
pub struct SessionGuard {
    session: Box<dyn StoreSession>,
}

impl SessionGuard {
    pub fn new(session: Box<dyn StoreSession>) -> Self {
        Self { session }
    }
}

impl Deref for SessionGuard {
    type Target = dyn StoreSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        debug!("Closing store session");
        self.session.close();
    }
}

/// Open a read-write session and mark one message seen.
pub fn mark_seen(store: &dyn MailStore, message_id: &str) -> Result<bool, MailError> {
    let mut session = store.open(MailboxMode::ReadWrite)?;
    session.mark_seen(message_id)
}
