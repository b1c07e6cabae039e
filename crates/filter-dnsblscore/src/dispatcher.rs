use crate::config::FilterConfig;
use crate::decision::decide;
use crate::delay::{compute_delay, Emitter};
use crate::error::FilterError;
use crate::protocol::{
    registration_lines, Event, FilterPhase, Phase, ReportPhase, Response, CONFIG_READY,
};
use crate::reputation::Scorer;
use crate::session::{Session, SessionStore};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Owns all filter state and processes the event stream in order
pub struct Filter {
    config: FilterConfig,
    scorer: Scorer,
    sessions: SessionStore,
    emitter: Emitter,
}

impl Filter {
    pub fn new(config: FilterConfig, scorer: Scorer, emitter: Emitter) -> Self {
        Self {
            config,
            scorer,
            sessions: SessionStore::default(),
            emitter,
        }
    }

    /// Run the filter protocol until the input is exhausted.
    ///
    /// If the input ends before `config|ready`, nothing is registered
    /// and this returns successfully.
    pub async fn run<R>(mut self, mut input: R) -> Result<(), FilterError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = Vec::new();

        if !skip_config(&mut input, &mut line).await? {
            tracing::debug!("input closed during configuration");
            return Ok(());
        }

        for reg in registration_lines() {
            self.emitter.emit(reg.into_bytes())?;
        }

        while read_line(&mut input, &mut line).await? {
            self.process_line(&line).await?;
        }

        tracing::debug!(
            "input closed with {} session(s) still open",
            self.sessions.len()
        );
        Ok(())
    }

    pub async fn process_line(&mut self, line: &[u8]) -> Result<(), FilterError> {
        let event = Event::parse(line)?;
        tracing::trace!(
            "{} {} {:?} session={} params={:?}",
            event.timestamp,
            event.subsystem,
            event.phase,
            event.session,
            event.rest.map(String::from_utf8_lossy)
        );

        match event.phase {
            Phase::Report(ReportPhase::LinkConnect) => self.link_connect(&event).await,
            Phase::Report(ReportPhase::LinkDisconnect) => self.link_disconnect(&event),
            Phase::Filter(FilterPhase::DataLine) => self.data_line(&event),
            Phase::Filter(phase) => self.answer(phase, &event),
        }
    }

    async fn link_connect(&mut self, event: &Event<'_>) -> Result<(), FilterError> {
        // rdns, fcrdns, src, dest
        let params = event.params()?;
        if params.len() != 4 {
            return Err(FilterError::InvalidParams {
                phase: ReportPhase::LinkConnect.name(),
                expected: 4,
                got: params.len(),
            });
        }

        let score = self.scorer.score_peer(params[2]).await;
        let delay = compute_delay(self.config.slow_factor, score, self.config.domains.len());
        self.sessions
            .create(event.session, Session::new(score, delay))?;
        Ok(())
    }

    fn link_disconnect(&mut self, event: &Event<'_>) -> Result<(), FilterError> {
        let params = event.params()?;
        if !params.is_empty() {
            return Err(FilterError::InvalidParams {
                phase: ReportPhase::LinkDisconnect.name(),
                expected: 0,
                got: params.len(),
            });
        }
        self.sessions.remove(event.session)?;
        Ok(())
    }

    /// Answer a filter event with a (possibly delayed) verdict
    fn answer(&mut self, phase: FilterPhase, event: &Event<'_>) -> Result<(), FilterError> {
        let (token, _) = token(phase, event)?;
        let session = self.sessions.get(event.session)?;

        let verdict = decide(session.score, phase, &self.config.policy);
        tracing::debug!(
            "session={} phase={} score={:?} verdict={verdict:?}",
            event.session,
            phase.name(),
            session.score
        );

        let response = Response::result(
            event.field_order(),
            event.session,
            token,
            &verdict.as_response(),
        );
        self.emitter.emit_after(session.delay, response.into_line())
    }

    /// Pass a body line back unchanged, preceded by the score header
    /// on the first body line of the session
    fn data_line(&mut self, event: &Event<'_>) -> Result<(), FilterError> {
        let (token, content) = token(FilterPhase::DataLine, event)?;
        let order = event.field_order();
        let session = self.sessions.get(event.session)?;

        if session.first_line {
            if let (Some(score), true) = (session.score, self.config.score_header) {
                let header = format!("X-DNSBL-Score: {score}");
                self.emitter.emit(
                    Response::dataline(order, event.session, token, header.as_bytes())
                        .into_line(),
                )?;
            }
            session.first_line = false;
        }

        self.emitter
            .emit(Response::dataline(order, event.session, token, content).into_line())
    }
}

/// The token of a filter event and the raw parameters that follow it
fn token<'a>(phase: FilterPhase, event: &Event<'a>) -> Result<(&'a str, &'a [u8]), FilterError> {
    event
        .split_token()?
        .ok_or_else(|| FilterError::MissingToken {
            phase: phase.name(),
            session: event.session.to_string(),
        })
}

/// Read one line into `line` without its `\n` or `\r\n` terminator.
/// Returns false at end of input.
async fn read_line<R>(input: &mut R, line: &mut Vec<u8>) -> Result<bool, FilterError>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    if input.read_until(b'\n', line).await? == 0 {
        return Ok(false);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
    Ok(true)
}

/// Discard configuration lines. Returns false if the input ended
/// before `config|ready` was seen.
async fn skip_config<R>(input: &mut R, line: &mut Vec<u8>) -> Result<bool, FilterError>
where
    R: AsyncBufRead + Unpin,
{
    while read_line(input, line).await? {
        if line.as_slice() == CONFIG_READY.as_bytes() {
            return Ok(true);
        }
        tracing::trace!("skipping config line: {}", String::from_utf8_lossy(line));
    }
    Ok(false)
}
