use crate::protocol::FilterPhase;
use clap::ValueEnum;
use std::str::FromStr;

/// Highest score a session can carry
pub const MAX_SCORE: u8 = 127;

/// A score threshold. Any negative value disables the check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Threshold(Option<u8>);

impl Threshold {
    pub const DISABLED: Self = Self(None);

    pub fn new(value: u8) -> Self {
        Self(Some(value))
    }

    /// True if `score` is strictly above an enabled threshold
    pub fn exceeded_by(&self, score: u8) -> bool {
        matches!(self.0, Some(limit) if score > limit)
    }
}

impl FromStr for Threshold {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|err| format!("'{s}' is not an integer: {err}"))?;
        if value < 0 {
            Ok(Self::DISABLED)
        } else if value <= MAX_SCORE as i64 {
            Ok(Self::new(value as u8))
        } else {
            Err(format!(
                "{value} is out of range; use -1 to disable or 0..={MAX_SCORE}"
            ))
        }
    }
}

/// Milliseconds of delay per point of score. Zero or negative disables delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlowFactor(Option<u64>);

impl SlowFactor {
    pub const DISABLED: Self = Self(None);

    pub fn new(millis: u64) -> Self {
        if millis == 0 {
            Self::DISABLED
        } else {
            Self(Some(millis))
        }
    }

    pub fn millis(&self) -> Option<u64> {
        self.0
    }
}

impl FromStr for SlowFactor {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|err| format!("'{s}' is not an integer: {err}"))?;
        Ok(Self::new(value.max(0) as u64))
    }
}

/// The phases at which a session may be disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum BlockPhase {
    #[default]
    Connect,
    Helo,
    Ehlo,
    Starttls,
    Auth,
    MailFrom,
    RcptTo,
    Quit,
}

impl From<BlockPhase> for FilterPhase {
    fn from(phase: BlockPhase) -> FilterPhase {
        match phase {
            BlockPhase::Connect => FilterPhase::Connect,
            BlockPhase::Helo => FilterPhase::Helo,
            BlockPhase::Ehlo => FilterPhase::Ehlo,
            BlockPhase::Starttls => FilterPhase::Starttls,
            BlockPhase::Auth => FilterPhase::Auth,
            BlockPhase::MailFrom => FilterPhase::MailFrom,
            BlockPhase::RcptTo => FilterPhase::RcptTo,
            BlockPhase::Quit => FilterPhase::Quit,
        }
    }
}

/// Thresholds consulted by the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    pub block_above: Threshold,
    pub block_phase: BlockPhase,
    pub junk_above: Threshold,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub policy: Policy,
    pub slow_factor: SlowFactor,
    /// Add an `X-DNSBL-Score` header to the first line of each message
    pub score_header: bool,
    /// Derive scores from the address and answer every event synchronously
    pub deterministic: bool,
    pub domains: Vec<String>,
}

impl FilterConfig {
    pub fn new(domains: Vec<String>) -> anyhow::Result<Self> {
        anyhow::ensure!(!domains.is_empty(), "missing blocklist domains");
        Ok(Self {
            policy: Policy::default(),
            slow_factor: SlowFactor::DISABLED,
            score_header: false,
            deterministic: false,
            domains,
        })
    }
}
