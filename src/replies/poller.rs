//! IMAP reply poller. Fetches unseen inbox mail and feeds it to the ingestor.
//!
//! Messages are fetched with `BODY.PEEK[]` so nothing is flagged by the fetch
//! itself. Only messages that matched a contact and were recorded are marked
//! `\Seen`; everything else stays unread for a human.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::ingest::ReplyIngestor;
use crate::config::ImapConfig;
use crate::error::ReplyError;

/// Only look this far back when searching for unseen mail.
const LOOKBACK_HOURS: i64 = 24;

/// One inbound message pulled from the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    pub uid: String,
    pub sender: String,
    pub body: String,
}

/// Spawn a background task that polls IMAP on the configured interval.
/// The first poll runs immediately.
pub fn spawn_reply_poller(config: ImapConfig, ingestor: Arc<ReplyIngestor>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            host = %config.host,
            interval_secs = config.poll_interval.as_secs(),
            "Reply poller started"
        );

        let mut tick = tokio::time::interval(config.poll_interval);
        loop {
            tick.tick().await;
            poll_once(&config, &ingestor).await;
        }
    })
}

/// One cycle: fetch unseen → ingest → mark matched as seen.
pub async fn poll_once(config: &ImapConfig, ingestor: &ReplyIngestor) {
    let cfg = config.clone();
    let since = Utc::now() - chrono::Duration::hours(LOOKBACK_HOURS);
    let replies = match tokio::task::spawn_blocking(move || fetch_unseen(&cfg, since)).await {
        Ok(Ok(replies)) => replies,
        Ok(Err(e)) => {
            error!("Reply poll failed: {e}");
            return;
        }
        Err(e) => {
            error!("Reply poll task panicked: {e}");
            return;
        }
    };

    if replies.is_empty() {
        return;
    }
    debug!("Fetched {} unseen messages", replies.len());

    let mut matched = Vec::new();
    for reply in replies {
        match ingestor.ingest_inbound(&reply.sender, &reply.body).await {
            Ok(_) => matched.push(reply.uid),
            Err(ReplyError::UnknownSender(sender)) => {
                debug!(sender = %sender, "Ignoring message from unknown sender");
            }
            Err(e) => error!(sender = %reply.sender, "Failed to ingest reply: {e}"),
        }
    }

    if matched.is_empty() {
        return;
    }
    let cfg = config.clone();
    match tokio::task::spawn_blocking(move || mark_seen(&cfg, &matched)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to mark replies as seen: {e}"),
        Err(e) => warn!("Mark-seen task panicked: {e}"),
    }
}

// ── IMAP session (blocking, run in spawn_blocking) ──────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

struct ImapSession {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &ImapConfig) -> Result<Self, ReplyError> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(imap_err)?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))
            .map_err(imap_err)?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name =
            rustls_pki_types::ServerName::try_from(config.host.clone()).map_err(imap_err)?;
        let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(imap_err)?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };
        let _greeting = session.read_line()?;

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        session
            .command(&login)
            .map_err(|_| ReplyError::Imap("login failed".into()))?;
        session.command("SELECT \"INBOX\"")?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ReplyError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf).map_err(imap_err)?;
        if n == 0 {
            return Err(ReplyError::Imap("connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send a tagged command and collect response lines. Literals are
    /// returned separately, in order of appearance.
    fn exchange(&mut self, cmd: &str) -> Result<(Vec<String>, Vec<Vec<u8>>), ReplyError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .map_err(imap_err)?;
        stream.flush().map_err(imap_err)?;

        let mut lines = Vec::new();
        let mut literals = Vec::new();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal).map_err(imap_err)?;
                literals.push(literal);
            }
            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                if !status.starts_with("OK") {
                    return Err(ReplyError::Imap(format!("`{cmd}` failed: {}", status.trim())));
                }
                lines.push(line);
                return Ok((lines, literals));
            }
            lines.push(line);
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ReplyError> {
        self.exchange(cmd).map(|(lines, _)| lines)
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

fn imap_err(e: impl std::fmt::Display) -> ReplyError {
    ReplyError::Imap(e.to_string())
}

/// Fetch unseen messages received since `since` without flagging them.
fn fetch_unseen(config: &ImapConfig, since: DateTime<Utc>) -> Result<Vec<InboundReply>, ReplyError> {
    let mut session = ImapSession::connect(config)?;

    let search = session.command(&format!("UID SEARCH UNSEEN SINCE {}", imap_date(since)))?;
    let uids = parse_search(&search);

    let mut replies = Vec::new();
    for uid in uids {
        let (_, literals) = session.exchange(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        let Some(raw) = literals.first() else {
            warn!(uid = %uid, "FETCH returned no message body");
            continue;
        };
        match parse_reply(&uid, raw) {
            Some(reply) => replies.push(reply),
            None => warn!(uid = %uid, "Could not parse message"),
        }
    }

    session.logout();
    Ok(replies)
}

/// Flag messages as `\Seen`.
fn mark_seen(config: &ImapConfig, uids: &[String]) -> Result<(), ReplyError> {
    let mut session = ImapSession::connect(config)?;
    session.command(&format!("UID STORE {} +FLAGS (\\Seen)", uids.join(",")))?;
    session.logout();
    Ok(())
}

// ── Parsing helpers ─────────────────────────────────────────────────

/// IMAP date, e.g. `19-Oct-2026`.
fn imap_date(dt: DateTime<Utc>) -> String {
    dt.format("%d-%b-%Y").to_string()
}

/// Quote an IMAP string argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `{1234}` at the end of a response line announces a literal of that many bytes.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let inner = trimmed.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].parse().ok()
}

/// UIDs from `* SEARCH` response lines.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

/// Parse a raw RFC 822 message into sender + readable body.
fn parse_reply(uid: &str, raw: &[u8]) -> Option<InboundReply> {
    let parsed = MessageParser::default().parse(raw)?;
    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_lowercase())?;

    Some(InboundReply {
        uid: uid.to_string(),
        sender,
        body: extract_text(&parsed),
    })
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.trim().to_string();
        }
    }
    String::new()
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
