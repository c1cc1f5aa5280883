//! Inbox synchronization and reply dispatch.

pub mod dispatch;
pub mod imap;
pub mod parser;
pub mod snapshot;
pub mod store;
pub mod types;

pub use dispatch::{ReplyDispatcher, ReplyTransport, SmtpRelay, sanitize_reply_text};
pub use imap::ImapStore;
pub use parser::normalize;
pub use snapshot::SnapshotBuilder;
pub use store::{MailStore, SessionGuard, StoreSession};
pub use types::{FetchedBody, MailboxMode, NormalizedMessage, OutboundReply, StoreRef};
