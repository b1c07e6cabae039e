//! The smtpd filter protocol: event line parsing, registration and
//! response formatting.
//!
//! Event lines look like:
//! `stream|version|timestamp|subsystem|phase|session-id|params...`
use crate::error::FilterError;
use std::str::FromStr;
use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Sent by smtpd once it has finished passing configuration lines
pub const CONFIG_READY: &str = "config|ready";

const SUBSYSTEM: &str = "smtp-in";

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum ReportPhase {
    LinkConnect,
    LinkDisconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum FilterPhase {
    Connect,
    Helo,
    Ehlo,
    Starttls,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    DataLine,
    Commit,
    Quit,
}

impl FilterPhase {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl ReportPhase {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Report(ReportPhase),
    Filter(FilterPhase),
}

/// The `major.minor` protocol version carried by each event.
/// Any components after the minor version are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
}

impl ProtocolVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl FromStr for ProtocolVersion {
    type Err = FilterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FilterError::InvalidVersion(s.to_string());
        let mut parts = s.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        Ok(Self { major, minor })
    }
}

/// Where the token and session id go in a response line.
/// smtpd swapped them in protocol version 0.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    TokenFirst,
    SessionFirst,
}

impl FieldOrder {
    pub fn for_version(version: ProtocolVersion) -> Self {
        if version < ProtocolVersion::new(0, 5) {
            Self::TokenFirst
        } else {
            Self::SessionFirst
        }
    }
}

/// A parsed event line, borrowing from the line it was parsed from.
///
/// Only the frame fields are required to be text. Whatever follows the
/// session id is kept as raw bytes, because data-line content is the
/// message body verbatim and need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<'a> {
    pub version: ProtocolVersion,
    pub timestamp: &'a str,
    pub subsystem: &'a str,
    pub phase: Phase,
    pub session: &'a str,
    /// Everything after the session id, None when there are no parameters
    pub rest: Option<&'a [u8]>,
}

fn as_text(bytes: &[u8]) -> Result<&str, FilterError> {
    std::str::from_utf8(bytes)
        .map_err(|_| FilterError::InvalidText(String::from_utf8_lossy(bytes).into_owned()))
}

impl<'a> Event<'a> {
    pub fn parse(line: &'a [u8]) -> Result<Self, FilterError> {
        let atoms: Vec<&[u8]> = line.splitn(7, |&b| b == b'|').collect();
        if atoms.len() < 6 {
            return Err(FilterError::MissingAtoms(
                String::from_utf8_lossy(line).into_owned(),
            ));
        }

        let stream = as_text(atoms[0])?;
        let phase = as_text(atoms[4])?;
        let phase = match stream {
            "report" => Phase::Report(ReportPhase::from_str(phase).map_err(|_| {
                FilterError::InvalidPhase {
                    stream: "report",
                    phase: phase.to_string(),
                }
            })?),
            "filter" => Phase::Filter(FilterPhase::from_str(phase).map_err(|_| {
                FilterError::InvalidPhase {
                    stream: "filter",
                    phase: phase.to_string(),
                }
            })?),
            stream => return Err(FilterError::InvalidStream(stream.to_string())),
        };

        Ok(Self {
            version: as_text(atoms[1])?.parse()?,
            timestamp: as_text(atoms[2])?,
            subsystem: as_text(atoms[3])?,
            phase,
            session: as_text(atoms[5])?,
            rest: atoms.get(6).copied(),
        })
    }

    /// The `|` separated parameters as text
    pub fn params(&self) -> Result<Vec<&'a str>, FilterError> {
        match self.rest {
            None => Ok(vec![]),
            Some(rest) => rest.split(|&b| b == b'|').map(as_text).collect(),
        }
    }

    /// Split filter parameters into the token and the raw remainder.
    /// None when the event has no parameters at all.
    pub fn split_token(&self) -> Result<Option<(&'a str, &'a [u8])>, FilterError> {
        let Some(rest) = self.rest else {
            return Ok(None);
        };
        let (token, payload) = match rest.iter().position(|&b| b == b'|') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        Ok(Some((as_text(token)?, payload)))
    }

    /// The field order to answer this event with.
    ///
    /// smtpd uses a single protocol version for its whole lifetime, so
    /// taking it from each event rather than remembering the last one
    /// seen gives the same answer without any shared state.
    pub fn field_order(&self) -> FieldOrder {
        FieldOrder::for_version(self.version)
    }
}

/// The lines announcing which events we want, in the order they
/// must be sent once `config|ready` has been seen
pub fn registration_lines() -> Vec<String> {
    let mut lines: Vec<String> = ReportPhase::iter()
        .map(|phase| format!("register|report|{SUBSYSTEM}|{}", phase.name()))
        .collect();
    lines.extend(
        FilterPhase::iter().map(|phase| format!("register|filter|{SUBSYSTEM}|{}", phase.name())),
    );
    lines.push("register|ready".to_string());
    lines
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Result,
    Dataline,
}

impl ResponseKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Result => "filter-result",
            Self::Dataline => "filter-dataline",
        }
    }
}

/// A single response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub kind: ResponseKind,
    pub order: FieldOrder,
    pub session: String,
    pub token: String,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn result(order: FieldOrder, session: &str, token: &str, verdict: &str) -> Self {
        Self {
            kind: ResponseKind::Result,
            order,
            session: session.to_string(),
            token: token.to_string(),
            payload: verdict.as_bytes().to_vec(),
        }
    }

    pub fn dataline(order: FieldOrder, session: &str, token: &str, line: &[u8]) -> Self {
        Self {
            kind: ResponseKind::Dataline,
            order,
            session: session.to_string(),
            token: token.to_string(),
            payload: line.to_vec(),
        }
    }

    /// Render the line, without its terminating newline
    pub fn into_line(self) -> Vec<u8> {
        let (first, second) = match self.order {
            FieldOrder::TokenFirst => (&self.token, &self.session),
            FieldOrder::SessionFirst => (&self.session, &self.token),
        };
        let mut line = format!("{}|{first}|{second}|", self.kind.as_str()).into_bytes();
        line.extend_from_slice(&self.payload);
        line
    }
}
