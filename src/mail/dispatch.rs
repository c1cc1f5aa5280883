//! Reply dispatch: SMTP submission via lettre, then best-effort mark-seen.
//!
//! A relay failure fails the whole send and nothing else is attempted.
//! Once the relay accepted the message, a mark-seen failure is only logged.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use regex::Regex;
use secrecy::ExposeSecret;
use tracing::{info, warn};

use super::store::{MailStore, mark_seen};
use super::types::OutboundReply;
use crate::config::MailConfig;
use crate::error::MailError;

static ENUMERATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s*").expect("ENUMERATION regex is valid"));

const QUOTE_PAIRS: [(char, char); 3] = [('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}')];

/// Clean up suggested reply text: drop a leading `1.` / `2)` marker and one
/// pair of matching surrounding quotes, repeating until nothing changes.
pub fn sanitize_reply_text(text: &str) -> String {
    let mut current = text.trim();
    loop {
        let stripped = strip_quote_pair(strip_enumeration(current)).trim();
        if stripped == current {
            return current.to_string();
        }
        current = stripped;
    }
}

/// `1.` and `2)` are markers, `3.5` is a number.
fn strip_enumeration(text: &str) -> &str {
    let Some(m) = ENUMERATION.find(text) else {
        return text;
    };
    let rest = &text[m.end()..];
    let decimal = m.as_str().ends_with(['.', ')']) && rest.starts_with(|c: char| c.is_ascii_digit());
    if decimal { text } else { rest }
}

fn strip_quote_pair(text: &str) -> &str {
    QUOTE_PAIRS
        .iter()
        .find_map(|&(open, close)| text.strip_prefix(open)?.strip_suffix(close))
        .unwrap_or(text)
}

// ── Transport ───────────────────────────────────────────────────────

/// Submits a reply to the outbound relay. Blocking.
pub trait ReplyTransport: Send + Sync {
    fn submit(&self, reply: &OutboundReply) -> Result<(), MailError>;
}

/// lettre SMTP relay. Port 465 = implicit TLS, anything else = STARTTLS.
pub struct SmtpRelay {
    config: MailConfig,
}

impl SmtpRelay {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

impl ReplyTransport for SmtpRelay {
    fn submit(&self, reply: &OutboundReply) -> Result<(), MailError> {
        let send_err = |reason: String| MailError::Send {
            to: reply.to.clone(),
            reason,
        };

        let mut builder = Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| send_err(format!("Invalid from address: {e}")))?,
            )
            .to(reply
                .to
                .parse()
                .map_err(|e| send_err(format!("Invalid to address: {e}")))?)
            .subject(reply.subject.as_str());
        if let Some(id) = &reply.in_reply_to {
            builder = builder.in_reply_to(id.clone()).references(id.clone());
        }
        let email = builder
            .body(reply.text.clone())
            .map_err(|e| send_err(format!("Failed to build email: {e}")))?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );
        let relay = if self.config.smtp_port == 465 {
            SmtpTransport::relay(&self.config.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
        };
        let transport = relay
            .map_err(|e| send_err(format!("SMTP relay error: {e}")))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .timeout(Some(self.config.timeout))
            .build();

        transport
            .send(&email)
            .map_err(|e| send_err(format!("SMTP send failed: {e}")))?;
        Ok(())
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Sends replies and marks the answered message as seen.
#[derive(Clone)]
pub struct ReplyDispatcher {
    transport: Arc<dyn ReplyTransport>,
    store: Arc<dyn MailStore>,
    /// Bound on the mark-seen round trip. The relay enforces its own timeout.
    timeout: Duration,
}

impl ReplyDispatcher {
    pub fn new(transport: Arc<dyn ReplyTransport>, store: Arc<dyn MailStore>, timeout: Duration) -> Self {
        Self {
            transport,
            store,
            timeout,
        }
    }

    /// Sanitize, submit, then mark the original seen if `in_reply_to` is set.
    ///
    /// Returns `Err(MailError::Send)` only when the relay did not take the message.
    pub async fn send(&self, reply: OutboundReply) -> Result<(), MailError> {
        let reply = OutboundReply {
            text: sanitize_reply_text(&reply.text),
            ..reply
        };
        let to = reply.to.clone();
        let in_reply_to = reply.in_reply_to.clone();

        let transport = Arc::clone(&self.transport);
        match tokio::task::spawn_blocking(move || transport.submit(&reply)).await {
            Ok(result) => result?,
            Err(e) => {
                return Err(MailError::Send {
                    to,
                    reason: format!("send task failed: {e}"),
                });
            }
        }
        info!(to = %to, "Reply sent");

        if let Some(message_id) = in_reply_to {
            self.mark_original_seen(message_id).await;
        }
        Ok(())
    }

    async fn mark_original_seen(&self, message_id: String) {
        let store = Arc::clone(&self.store);
        let id = message_id.clone();
        let task = tokio::task::spawn_blocking(move || mark_seen(store.as_ref(), &id));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(true))) => info!(message_id = %message_id, "Original marked as seen"),
            Ok(Ok(Ok(false))) => info!(message_id = %message_id, "Original not found, read-state unchanged"),
            Ok(Ok(Err(e))) => warn!(message_id = %message_id, error = %e, "Failed to mark original as seen"),
            Ok(Err(e)) => warn!(message_id = %message_id, error = %e, "Mark-seen task failed"),
            Err(_) => warn!(message_id = %message_id, timeout = ?self.timeout, "Mark-seen timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::mail::store::testing::FakeStore;

    #[derive(Default)]
    struct FakeRelay {
        sent: Mutex<Vec<OutboundReply>>,
        fail: bool,
    }

    impl ReplyTransport for FakeRelay {
        fn submit(&self, reply: &OutboundReply) -> Result<(), MailError> {
            if self.fail {
                return Err(MailError::Send {
                    to: reply.to.clone(),
                    reason: "relay refused".into(),
                });
            }
            self.sent.lock().unwrap().push(reply.clone());
            Ok(())
        }
    }

    fn dispatcher(relay: &Arc<FakeRelay>, store: &FakeStore) -> ReplyDispatcher {
        ReplyDispatcher::new(
            Arc::clone(relay) as Arc<dyn ReplyTransport>,
            Arc::new(store.clone()),
            Duration::from_secs(5),
        )
    }

    fn reply(text: &str, in_reply_to: Option<&str>) -> OutboundReply {
        OutboundReply {
            to: "a@b.com".into(),
            subject: "Re: hi".into(),
            text: text.into(),
            in_reply_to: in_reply_to.map(str::to_string),
        }
    }

    // ── sanitize_reply_text ─────────────────────────────────────────

    #[test]
    fn sanitize_strips_enumeration() {
        assert_eq!(sanitize_reply_text("1. Sure, works for me!"), "Sure, works for me!");
        assert_eq!(sanitize_reply_text("2) Sounds good"), "Sounds good");
        assert_eq!(sanitize_reply_text("1.Sure, works"), "Sure, works");
        assert_eq!(sanitize_reply_text("3)Sounds good"), "Sounds good");
        assert_eq!(sanitize_reply_text("4."), "");
    }

    #[test]
    fn sanitize_strips_matching_quotes() {
        assert_eq!(sanitize_reply_text("\"See you then\""), "See you then");
        assert_eq!(sanitize_reply_text("'See you then'"), "See you then");
        assert_eq!(sanitize_reply_text("\u{201c}See you then\u{201d}"), "See you then");
    }

    #[test]
    fn sanitize_leaves_unmatched_quotes_and_numbers_in_prose() {
        assert_eq!(sanitize_reply_text("\"half quoted'"), "\"half quoted'");
        assert_eq!(sanitize_reply_text("It's \"fine\""), "It's \"fine\"");
        assert_eq!(sanitize_reply_text("3.5 hours works"), "3.5 hours works");
        assert_eq!(sanitize_reply_text("\""), "\"");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "1. Sure, works for me!",
            "\"1. quoted and numbered\"",
            "1. \"numbered then quoted\"",
            "1. 2. nested",
            "1.2.3 is the version",
            "\"\"double\"\"",
            "  plain  ",
            "",
        ];
        for sample in samples {
            let once = sanitize_reply_text(sample);
            assert_eq!(sanitize_reply_text(&once), once, "input: {sample:?}");
        }
    }

    // ── ReplyDispatcher ─────────────────────────────────────────────

    #[tokio::test]
    async fn send_cleans_text_and_marks_original_seen_once() {
        let relay = Arc::new(FakeRelay::default());
        let store = FakeStore::default().with_mail(9, Some("<msg123>"), "Subject: hi\r\n\r\nhello\r\n");

        dispatcher(&relay, &store)
            .send(reply("1. Sure, works for me!", Some("<msg123>")))
            .await
            .unwrap();

        let sent = relay.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "Sure, works for me!");
        assert_eq!(sent[0].in_reply_to.as_deref(), Some("<msg123>"));

        let state = store.state.lock().unwrap();
        assert_eq!(state.mark_seen_calls, vec!["<msg123>".to_string()]);
        assert_eq!(state.opened, vec![crate::mail::MailboxMode::ReadWrite]);
        assert_eq!(state.closed, 1);
        drop(state);
        assert_eq!(store.seen_uids(), vec![9]);
    }

    #[tokio::test]
    async fn relay_failure_surfaces_send_error_without_mark_seen() {
        let relay = Arc::new(FakeRelay {
            fail: true,
            ..FakeRelay::default()
        });
        let store = FakeStore::default().with_mail(9, Some("<msg123>"), "Subject: hi\r\n\r\nhello\r\n");

        let err = dispatcher(&relay, &store)
            .send(reply("hello", Some("<msg123>")))
            .await
            .unwrap_err();

        assert!(matches!(err, MailError::Send { .. }));
        let state = store.state.lock().unwrap();
        assert!(state.mark_seen_calls.is_empty());
        assert!(state.opened.is_empty());
    }

    #[tokio::test]
    async fn mark_seen_failure_still_reports_success() {
        let relay = Arc::new(FakeRelay::default());
        let store = FakeStore {
            fail_mark_seen: true,
            ..FakeStore::default()
        };

        dispatcher(&relay, &store)
            .send(reply("hello", Some("<msg123>")))
            .await
            .unwrap();

        assert_eq!(relay.sent.lock().unwrap().len(), 1);
        assert_eq!(store.state.lock().unwrap().mark_seen_calls.len(), 1);
    }

    #[tokio::test]
    async fn unreachable_store_after_send_still_reports_success() {
        let relay = Arc::new(FakeRelay::default());
        let store = FakeStore {
            fail_connect: Some(|| MailError::Connection {
                host: "fake.store".into(),
                reason: "refused".into(),
            }),
            ..FakeStore::default()
        };

        dispatcher(&relay, &store)
            .send(reply("hello", Some("<msg123>")))
            .await
            .unwrap();
        assert_eq!(relay.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_correlation_id_is_not_an_error() {
        let relay = Arc::new(FakeRelay::default());
        let store = FakeStore::default();

        dispatcher(&relay, &store)
            .send(reply("hello", Some("<nobody>")))
            .await
            .unwrap();
        assert_eq!(store.state.lock().unwrap().mark_seen_calls, vec!["<nobody>".to_string()]);
    }

    #[tokio::test]
    async fn send_without_in_reply_to_skips_store() {
        let relay = Arc::new(FakeRelay::default());
        let store = FakeStore::default();

        dispatcher(&relay, &store).send(reply("hello", None)).await.unwrap();

        assert_eq!(relay.sent.lock().unwrap().len(), 1);
        assert!(store.state.lock().unwrap().opened.is_empty());
    }
}
