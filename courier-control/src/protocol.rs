//! Control protocol types

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Format a timestamp (milliseconds since epoch) as human-readable
fn format_timestamp(timestamp_ms: u64) -> String {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(
            || "unknown".to_string(),
            |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}

/// Request sent to the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub version: u32,
    /// Bearer token, required when the server has authentication enabled
    #[serde(default)]
    pub token: Option<String>,
    pub command: RequestCommand,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestCommand {
    System(SystemCommand),
    Queue(QueueCommand),
    /// Mail held in named repositories, such as the dead-letter repository
    Repository(RepositoryCommand),
    /// Hand a message to the ingestion port, as a protocol front-end would.
    /// Answered with the new mail id as a [`ResponseData::Message`].
    Submit {
        /// `None` or `<>` for the null sender
        sender: Option<String>,
        recipients: Vec<String>,
        content: Vec<u8>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemCommand {
    Ping,
    /// Version, uptime, queue size and configured processors
    Status,
}

/// Queue management; counts come back as [`ResponseData::Count`], `-1`
/// meaning the spool repository was unavailable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueCommand {
    Size,
    Stats,
    /// Remove every queued mail not currently being processed
    Clear,
    /// Make every delayed mail visible now
    Flush,
    /// Remove by mail id, or every branch of a lineage by its root id
    RemoveByName(String),
    /// Remove by envelope sender; `<>` selects the null sender
    RemoveBySender(String),
    RemoveByRecipient(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RepositoryCommand {
    /// Names of the configured repositories
    Names,
    List { repository: String },
    View { repository: String, id: String },
    /// Queue a held mail again at the initial state
    Replay { repository: String, id: String },
}

/// Response from the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub version: u32,
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    Ok,
    Data(Box<ResponseData>),
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    SystemStatus(SystemStatus),
    Count(i64),
    QueueStats(QueueStats),
    Repositories(Vec<String>),
    MailList(Vec<MailEntry>),
    MailDetails(MailDetails),
    Message(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub queue_size: i64,
    pub workers: usize,
    pub processors: Vec<String>,
}

impl Display for SystemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Version:    {}", self.version)?;
        writeln!(f, "Uptime:     {}s", self.uptime_secs)?;
        writeln!(f, "Queue size: {}", self.queue_size)?;
        writeln!(f, "Workers:    {}", self.workers)?;
        write!(f, "Processors: {}", self.processors.join(", "))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    /// Visible now
    pub ready: usize,
    /// Waiting on a delay or retry backoff
    pub delayed: usize,
    /// Being processed by a worker
    pub leased: usize,
}

impl Display for QueueStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total:   {}", self.total)?;
        writeln!(f, "Ready:   {}", self.ready)?;
        writeln!(f, "Delayed: {}", self.delayed)?;
        write!(f, "Leased:  {}", self.leased)
    }
}

/// A held mail, without its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailEntry {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    pub state: String,
    pub error: Option<String>,
    pub hops: u32,
    pub size: usize,
    /// Milliseconds since epoch
    pub last_updated: u64,
}

impl Display for MailEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ID:        {}", self.id)?;
        writeln!(f, "From:      {}", self.from)?;
        writeln!(f, "To:        {}", self.to.join(", "))?;
        writeln!(f, "State:     {}", self.state)?;
        if let Some(ref error) = self.error {
            writeln!(f, "Error:     {error}")?;
        }
        writeln!(f, "Hops:      {}", self.hops)?;
        writeln!(f, "Size:      {} bytes", self.size)?;
        write!(f, "Updated:   {}", format_timestamp(self.last_updated))
    }
}

/// A held mail with its headers and the start of its body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailDetails {
    pub entry: MailEntry,
    pub attributes: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// First 1KB of the body, lossily decoded
    pub body_preview: String,
}

impl Display for MailDetails {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.entry)?;

        if !self.attributes.is_empty() {
            f.write_str("\n--- Attributes ---\n")?;
            for (name, value) in &self.attributes {
                writeln!(f, "{name} = {value}")?;
            }
        }

        if !self.headers.is_empty() {
            f.write_str("\n--- Headers ---\n")?;
            for (name, value) in &self.headers {
                writeln!(f, "{name}: {value}")?;
            }
        }

        f.write_str("\n--- Body Preview ---\n")?;
        write!(f, "{}", self.body_preview)
    }
}

impl Request {
    /// Create a new request with the current protocol version
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token: None,
            command,
        }
    }

    #[must_use]
    pub fn with_token(command: RequestCommand, token: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token: Some(token.into()),
            command,
        }
    }

    /// Only an exact version match is compatible
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error(_))
    }

    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(u64::MAX), "unknown");
    }

    #[test]
    fn test_entry_display_shows_error_only_when_present() {
        let mut entry = MailEntry {
            id: "01J0000000000000000000000".to_string(),
            from: "<>".to_string(),
            to: vec!["a@x.org".to_string(), "b@y.org".to_string()],
            state: "error".to_string(),
            error: None,
            hops: 3,
            size: 120,
            last_updated: 0,
        };
        let shown = entry.to_string();
        assert!(shown.contains("To:        a@x.org, b@y.org"));
        assert!(!shown.contains("Error:"));

        entry.error = Some("mailet Bounce failed: boom".to_string());
        assert!(entry.to_string().contains("Error:     mailet Bounce failed: boom"));
    }

    #[test]
    fn test_response_helpers() {
        assert!(Response::ok().is_success());
        assert!(Response::data(ResponseData::Count(3)).is_success());
        assert!(!Response::error("nope").is_success());
        assert!(Response::ok().is_version_compatible());

        let stale = Request {
            version: PROTOCOL_VERSION + 1,
            token: None,
            command: RequestCommand::System(SystemCommand::Ping),
        };
        assert!(!stale.is_version_compatible());
    }
}
