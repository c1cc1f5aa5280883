//! IMAP store client: raw IMAP4rev1 over implicit TLS (rustls).
//!
//! Listing uses `EXAMINE` + `BODY.PEEK[]` so read-state is never touched;
//! mark-seen uses `SELECT` + `UID STORE`. Commands are serialized on the
//! session, one message per `UID FETCH`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use super::store::{MailStore, StoreSession};
use super::types::{FetchedBody, MailboxMode, StoreRef};
use crate::config::MailConfig;
use crate::error::MailError;

/// Upper bound on a single server literal (one raw message).
const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

static FETCH_UID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bUID (\d+)").expect("FETCH_UID regex is valid"));

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Store ───────────────────────────────────────────────────────────

/// IMAP-backed [`MailStore`]. Every `connect` is a fresh TCP + TLS session.
pub struct ImapStore {
    config: MailConfig,
}

impl ImapStore {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

impl MailStore for ImapStore {
    fn host(&self) -> &str {
        &self.config.imap_host
    }

    fn connect(&self, mode: MailboxMode) -> Result<Box<dyn StoreSession>, MailError> {
        let stream = connect_tls(&self.config)?;
        let session = ImapSession::establish(stream, &self.config, mode)?;
        Ok(Box::new(session))
    }
}

/// Open TCP with the configured timeout, then wrap it in rustls.
fn connect_tls(config: &MailConfig) -> Result<TlsStream, MailError> {
    let host = config.imap_host.as_str();
    let conn_err = |reason: String| MailError::Connection {
        host: host.to_string(),
        reason,
    };

    let addrs = (host, config.imap_port)
        .to_socket_addrs()
        .map_err(|e| conn_err(format!("DNS lookup failed: {e}")))?;

    let mut tcp = None;
    let mut last_error = String::from("no addresses resolved");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => last_error = e.to_string(),
        }
    }
    let tcp = tcp.ok_or_else(|| conn_err(last_error))?;
    tcp.set_read_timeout(Some(config.timeout))
        .and_then(|()| tcp.set_write_timeout(Some(config.timeout)))
        .map_err(|e| conn_err(e.to_string()))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| conn_err(format!("TLS setup failed: {e}")))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| conn_err(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(Arc::new(tls_config), server_name)
        .map_err(|e| conn_err(format!("TLS setup failed: {e}")))?;

    debug!(host = host, port = config.imap_port, "IMAP TCP connection established");
    Ok(rustls::StreamOwned::new(conn, tcp))
}

// ── Responses ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// An untagged `* ...` response with any literals it carried.
#[derive(Debug)]
struct Untagged {
    line: String,
    literals: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Response {
    untagged: Vec<Untagged>,
    status: Status,
    text: String,
}

fn parse_status(rest: &str) -> (Status, String) {
    let (word, text) = rest.split_once(' ').unwrap_or((rest, ""));
    let status = match word.to_ascii_uppercase().as_str() {
        "OK" => Status::Ok,
        "NO" => Status::No,
        _ => Status::Bad,
    };
    (status, text.trim().to_string())
}

/// `{123}` at end of line announces a literal of that many bytes.
fn literal_length(line: &str) -> Option<usize> {
    let inner = line.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].parse().ok()
}

/// UIDs from `* SEARCH` lines.
fn parse_search(untagged: &[Untagged]) -> Vec<u32> {
    untagged
        .iter()
        .filter_map(|u| u.line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// The body literal of the `FETCH` response carrying `uid`.
fn extract_body(untagged: &[Untagged], uid: u32) -> Option<Vec<u8>> {
    untagged
        .iter()
        .filter(|u| u.line.contains(" FETCH "))
        .find(|u| {
            FETCH_UID
                .captures(&u.line)
                .and_then(|c| c[1].parse::<u32>().ok())
                == Some(uid)
        })
        .and_then(|u| u.literals.first().cloned())
}

/// Newest first: UIDs sorted descending, duplicates removed, truncated to `limit`.
pub fn select_newest(mut uids: Vec<u32>, limit: usize) -> Vec<StoreRef> {
    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.dedup();
    uids.truncate(limit);
    uids.into_iter().map(|uid| StoreRef { uid }).collect()
}

/// Quote a string for an IMAP command. CR/LF cannot appear in quoted strings.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            '\r' | '\n' => {}
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

// ── Session ─────────────────────────────────────────────────────────

/// One authenticated IMAP conversation with a selected mailbox.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    host: String,
    next_tag: u32,
    /// Set after LOGOUT or an I/O failure; no further commands are sent.
    finished: bool,
}

impl<S: Read + Write> ImapSession<S> {
    /// Read the greeting, log in, and open the configured mailbox.
    pub fn establish(stream: S, config: &MailConfig, mode: MailboxMode) -> Result<Self, MailError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            host: config.imap_host.clone(),
            next_tag: 1,
            finished: false,
        };

        let (greeting, _) = session.read_logical_line()?;
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            session.finished = true;
            return Err(MailError::Connection {
                host: session.host.clone(),
                reason: format!("unexpected greeting: {greeting}"),
            });
        }

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        let resp = session.command(&login)?;
        if resp.status != Status::Ok {
            return Err(MailError::Auth {
                user: config.username.clone(),
                reason: resp.text,
            });
        }

        let verb = match mode {
            MailboxMode::ReadOnly => "EXAMINE",
            MailboxMode::ReadWrite => "SELECT",
        };
        session.expect_ok(verb, &format!("{verb} {}", quote(&config.mailbox)))?;

        info!(host = %session.host, mailbox = %config.mailbox, ?mode, "IMAP session ready");
        Ok(session)
    }

    fn io_error(&mut self, e: std::io::Error) -> MailError {
        self.finished = true;
        MailError::Connection {
            host: self.host.clone(),
            reason: e.to_string(),
        }
    }

    fn read_raw_line(&mut self) -> Result<Vec<u8>, MailError> {
        let mut buf = Vec::new();
        match self.stream.read_until(b'\n', &mut buf) {
            Ok(0) => Err(self.io_error(std::io::ErrorKind::UnexpectedEof.into())),
            Ok(_) => Ok(buf),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// One response line, with any `{n}` literals read inline.
    fn read_logical_line(&mut self) -> Result<(String, Vec<Vec<u8>>), MailError> {
        let mut line = String::new();
        let mut literals = Vec::new();
        loop {
            let raw = self.read_raw_line()?;
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim_end_matches(['\r', '\n']);
            line.push_str(text);

            let Some(len) = literal_length(text) else {
                return Ok((line, literals));
            };
            if len > MAX_LITERAL_BYTES {
                self.finished = true;
                return Err(MailError::StoreOperation {
                    operation: "FETCH".into(),
                    reason: format!("literal of {len} bytes exceeds limit"),
                });
            }
            let mut literal = vec![0u8; len];
            if let Err(e) = self.stream.read_exact(&mut literal) {
                return Err(self.io_error(e));
            }
            literals.push(literal);
        }
    }

    fn command(&mut self, command: &str) -> Result<Response, MailError> {
        if self.finished {
            return Err(MailError::Connection {
                host: self.host.clone(),
                reason: "session already closed".into(),
            });
        }
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let verb = command.split(' ').take(2).collect::<Vec<_>>().join(" ");
        debug!(tag = %tag, command = %verb, "IMAP command");

        let writer = self.stream.get_mut();
        let sent = writer
            .write_all(format!("{tag} {command}\r\n").as_bytes())
            .and_then(|()| writer.flush());
        if let Err(e) = sent {
            return Err(self.io_error(e));
        }

        let mut untagged = Vec::new();
        loop {
            let (line, literals) = self.read_logical_line()?;
            if let Some(rest) = line.strip_prefix(tag.as_str()).and_then(|r| r.strip_prefix(' ')) {
                let (status, text) = parse_status(rest);
                return Ok(Response {
                    untagged,
                    status,
                    text,
                });
            }
            if line.starts_with("* ") {
                untagged.push(Untagged { line, literals });
            }
        }
    }

    fn expect_ok(&mut self, operation: &str, command: &str) -> Result<Response, MailError> {
        let resp = self.command(command)?;
        match resp.status {
            Status::Ok => Ok(resp),
            Status::No | Status::Bad => Err(MailError::StoreOperation {
                operation: operation.to_string(),
                reason: resp.text,
            }),
        }
    }

    fn logout(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Sent directly: command() refuses once finished is set.
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        let writer = self.stream.get_mut();
        if writer
            .write_all(format!("{tag} LOGOUT\r\n").as_bytes())
            .and_then(|()| writer.flush())
            .is_err()
        {
            return;
        }
        loop {
            match self.read_raw_line() {
                Ok(line) if line.starts_with(tag.as_bytes()) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        debug!(host = %self.host, "IMAP session logged out");
    }
}

impl<S: Read + Write + Send> StoreSession for ImapSession<S> {
    fn list_unseen(&mut self, limit: usize) -> Result<Vec<StoreRef>, MailError> {
        let resp = self.expect_ok("SEARCH", "UID SEARCH UNSEEN")?;
        let uids = parse_search(&resp.untagged);
        debug!(unseen = uids.len(), limit, "Unseen search complete");
        Ok(select_newest(uids, limit))
    }

    fn fetch_bodies(&mut self, refs: &[StoreRef]) -> Result<Vec<FetchedBody>, MailError> {
        let mut fetched = Vec::with_capacity(refs.len());
        for store_ref in refs {
            let resp = self.command(&format!("UID FETCH {} (UID BODY.PEEK[])", store_ref.uid))?;
            let raw = match resp.status {
                Status::Ok => extract_body(&resp.untagged, store_ref.uid)
                    .ok_or_else(|| "no body in FETCH response".to_string()),
                Status::No | Status::Bad => Err(resp.text),
            };
            if let Err(reason) = &raw {
                warn!(uid = store_ref.uid, reason = %reason, "Message fetch failed");
            }
            fetched.push(FetchedBody {
                store_ref: *store_ref,
                raw,
            });
        }
        Ok(fetched)
    }

    fn mark_seen(&mut self, message_id: &str) -> Result<bool, MailError> {
        let search = format!("UID SEARCH HEADER Message-ID {}", quote(message_id));
        let uids = parse_search(&self.expect_ok("SEARCH", &search)?.untagged);
        if uids.is_empty() {
            info!(message_id = %message_id, "No message matches Message-ID");
            return Ok(false);
        }

        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.expect_ok("STORE", &format!("UID STORE {set} +FLAGS.SILENT (\\Seen)"))?;
        info!(message_id = %message_id, uids = %set, "Marked message as seen");
        Ok(true)
    }

    fn close(&mut self) {
        self.logout();
    }
}

impl<S: Read + Write> Drop for ImapSession<S> {
    fn drop(&mut self) {
        self.logout();
    }
}

// ── Tests ───────────────────────────────────────────────────────────
