//! Mail data model: normalized inbound messages, store references, outbound replies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A store-assigned reference to a message, valid for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreRef {
    /// Protocol UID; monotonically increasing by arrival.
    pub uid: u32,
}

/// Raw content fetched for one [`StoreRef`], or the reason it could not be fetched.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub store_ref: StoreRef,
    pub raw: Result<Vec<u8>, String>,
}

/// How a mailbox is opened for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxMode {
    /// Listing and fetching; never mutates read-state.
    ReadOnly,
    /// Flag updates.
    ReadWrite,
}

/// An unread inbox message, normalized for display.
///
/// Lives only for one snapshot request. Field names on the wire follow the
/// web UI's contract (`from_email`, `uid`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Message-ID header, in angle brackets.
    pub id: Option<String>,
    #[serde(rename = "from_email")]
    pub from_address: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
    #[serde(rename = "uid")]
    pub sequence_hint: Option<u32>,
}

/// A reply to send through the outbound relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundReply {
    pub to: String,
    pub subject: String,
    pub text: String,
    /// Correlation id of the message being answered; triggers mark-seen after a send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}
