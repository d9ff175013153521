use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "strategist-cli", version, about = "Read-only queries over the decision audit trail")]
pub struct Cli {
    /// Audit store connection string
    #[clap(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite://strategist_dev.db?mode=rwc"
    )]
    pub database_url: String,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show one audit record (with its outcome, if attached)
    Get { cycle_id: u64 },

    /// List audit records created within a time range (inclusive)
    Range {
        /// Range start, unix milliseconds
        #[clap(long, conflicts_with = "since")]
        from_ms: Option<u64>,

        /// Range end, unix milliseconds (defaults to now)
        #[clap(long, conflicts_with = "until")]
        to_ms: Option<u64>,

        /// Range start as RFC 3339, e.g. 2026-10-19T08:00:00Z
        #[clap(long, value_parser = parse_rfc3339)]
        since: Option<DateTime<Utc>>,

        /// Range end as RFC 3339
        #[clap(long, value_parser = parse_rfc3339)]
        until: Option<DateTime<Utc>>,

        /// Print one summary line per record instead of full JSON
        #[clap(long)]
        summary: bool,
    },

    /// Recompute the hash chain and report the first broken link
    Verify,
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}

fn to_ms(d: DateTime<Utc>) -> anyhow::Result<u64> {
    u64::try_from(d.timestamp_millis()).context("timestamps before 1970 are not supported")
}

/// Resolves the range flags to `[from_ms, to_ms]`.
pub(crate) fn resolve_range(
    from_ms: Option<u64>,
    to_ms_flag: Option<u64>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    now_ms: u64,
) -> anyhow::Result<(u64, u64)> {
    let from = match (from_ms, since) {
        (Some(ms), _) => ms,
        (None, Some(d)) => to_ms(d)?,
        (None, None) => 0,
    };
    let to = match (to_ms_flag, until) {
        (Some(ms), _) => ms,
        (None, Some(d)) => to_ms(d)?,
        (None, None) => now_ms,
    };
    if from > to {
        bail!("empty range: start {from} is after end {to}");
    }
    Ok((from, to))
}
