use crate::allowlist::Allowlist;
use crate::config::{BlockPhase, FilterConfig, Policy, SlowFactor, Threshold};
use crate::delay::{spawn_writer, Emitter};
use crate::dispatcher::Filter;
use crate::logging::{DiagnosticFormat, LoggingConfig};
use crate::reputation::{ReputationSource, Scorer};
use anyhow::Context;
use clap::Parser;
use dns_resolver::{HickoryResolver, Resolver};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

mod allowlist;
mod config;
mod decision;
mod delay;
mod dispatcher;
mod error;
mod logging;
mod panic;
mod protocol;
mod reputation;
mod session;

/// OpenSMTPD filter that scores connecting clients against DNS
/// blocklists, then junks, delays or disconnects them based on
/// their score.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Opt {
    /// Disconnect sessions whose score is above this value.
    /// -1 disables.
    #[arg(long, alias = "blockAbove", default_value = "-1", allow_negative_numbers = true)]
    block_above: Threshold,

    /// The phase at which --block-above takes effect
    #[arg(long, alias = "blockPhase", default_value = "connect")]
    block_phase: BlockPhase,

    /// Mark messages as junk when the session score is above this value.
    /// -1 disables.
    #[arg(long, alias = "junkAbove", default_value = "-1", allow_negative_numbers = true)]
    junk_above: Threshold,

    /// Delay every response by this many milliseconds per blocklist hit,
    /// divided by the number of blocklists. -1 disables.
    #[arg(long, alias = "slowFactor", default_value = "-1", allow_negative_numbers = true)]
    slow_factor: SlowFactor,

    /// Add an X-DNSBL-Score header to each message
    #[arg(long, alias = "scoreHeader")]
    score_header: bool,

    /// File containing IP addresses or subnets in CIDR notation that
    /// are never scored, one per line.
    #[arg(long)]
    allowlist: Option<PathBuf>,

    /// Skip all DNS queries and process every request synchronously.
    /// The score is taken from the last octet of the client address;
    /// addresses ending in .255 have no score. Only for debugging.
    #[arg(long, alias = "testMode")]
    test_mode: bool,

    /// Timeout for each blocklist query, such as "2s".
    /// Defaults to the system resolver configuration.
    #[arg(long, value_parser = humantime::parse_duration)]
    dns_timeout: Option<Duration>,

    /// Directory where diagnostic log files will be placed.
    ///
    /// If omitted, diagnostics will be printed to stderr.
    #[arg(long)]
    diag_log_dir: Option<PathBuf>,

    /// How diagnostic logs render. full, compact and pretty are intended
    /// for human consumption.
    ///
    /// json outputs machine readable records.
    #[arg(long, default_value = "full")]
    diag_format: DiagnosticFormat,

    /// The blocklist domains to query
    #[arg(required = true, value_name = "DOMAIN")]
    domains: Vec<String>,
}

impl Opt {
    fn filter_config(&self) -> anyhow::Result<FilterConfig> {
        let mut config = FilterConfig::new(self.domains.clone())?;
        config.policy = Policy {
            block_above: self.block_above,
            block_phase: self.block_phase,
            junk_above: self.junk_above,
        };
        config.slow_factor = self.slow_factor;
        config.score_header = self.score_header;
        config.deterministic = self.test_mode;
        Ok(config)
    }

    fn reputation_source(&self) -> anyhow::Result<ReputationSource> {
        if self.test_mode {
            return Ok(ReputationSource::Synthetic);
        }

        let resolver = match self.dns_timeout {
            Some(timeout) => HickoryResolver::with_timeout(timeout),
            None => HickoryResolver::from_system_conf(),
        }
        .context("initializing DNS resolver")?;
        let resolver: Arc<dyn Resolver> = Arc::new(resolver);

        Ok(ReputationSource::Dns {
            resolver,
            domains: self.domains.clone(),
        })
    }
}

fn main() -> anyhow::Result<()> {
    let opts = Opt::parse();

    let _log_guard = LoggingConfig {
        log_dir: opts.diag_log_dir.clone(),
        diag_format: opts.diag_format,
        filter_env_var: "DNSBLSCORE_LOG",
        default_filter: "filter_dnsblscore=info,dns_resolver=info",
    }
    .init()?;

    panic::register_panic_hook();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(async move { run(opts).await });

    // Don't wait for delayed responses or a pending stdin read
    runtime.shutdown_background();
    result
}

async fn run(opts: Opt) -> anyhow::Result<()> {
    // Everything that can fail due to configuration is checked
    // before the protocol handshake begins
    let config = opts.filter_config()?;
    let allowlist = match &opts.allowlist {
        Some(path) => {
            let allowlist = Allowlist::load(path)?;
            tracing::info!(
                "loaded {} allowlist entries from {}",
                allowlist.len(),
                path.display()
            );
            allowlist
        }
        None => Allowlist::default(),
    };
    let scorer = Scorer::new(allowlist, opts.reputation_source()?);

    let (tx, writer) = spawn_writer(tokio::io::stdout());
    let filter = Filter::new(config, scorer, Emitter::new(tx, opts.test_mode));

    let result = filter.run(BufReader::new(tokio::io::stdin())).await;

    // The filter has dropped its sender, so the writer stops once
    // everything already queued has been written
    writer
        .await
        .context("output task failed")?
        .context("writing to stdout")?;

    if let Err(err) = result {
        tracing::error!("{err:#}");
        return Err(err.into());
    }
    Ok(())
}
