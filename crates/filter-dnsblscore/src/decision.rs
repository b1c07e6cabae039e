use crate::config::Policy;
use crate::protocol::FilterPhase;

pub const DISCONNECT_REPLY: &str = "550 your IP reputation is too low for this MX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Junk,
    Disconnect,
}

impl Verdict {
    /// The verdict portion of a `filter-result` line
    pub fn as_response(&self) -> String {
        match self {
            Self::Proceed => "proceed".to_string(),
            Self::Junk => "junk".to_string(),
            Self::Disconnect => format!("disconnect|{DISCONNECT_REPLY}"),
        }
    }
}

/// Decide what to do with a session at `phase`.
///
/// Unscored sessions always proceed. A block can only happen at the
/// configured block phase, and junk is only ever decided at `connect`.
pub fn decide(score: Option<u8>, phase: FilterPhase, policy: &Policy) -> Verdict {
    let Some(score) = score else {
        return Verdict::Proceed;
    };

    if policy.block_above.exceeded_by(score) && phase == FilterPhase::from(policy.block_phase) {
        Verdict::Disconnect
    } else if phase == FilterPhase::Connect && policy.junk_above.exceeded_by(score) {
        Verdict::Junk
    } else {
        Verdict::Proceed
    }
}
