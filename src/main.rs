use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "mailsweep",
    version,
    about = "Confirmed bulk deletion of Gmail messages from a target sender"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan recent mail from a sender and delete it after confirmation
    Purge(PurgeArgs),
    /// Authorize mailsweep against your Google account
    Login,
}

#[derive(Debug, Args)]
struct PurgeArgs {
    /// Substring matched against the From header (e.g. billing@example.com)
    sender: String,

    /// Cutoff date (YYYY-MM-DD): stop at the first message older than this;
    /// overrides --days
    #[arg(long)]
    before: Option<String>,

    /// Recency window: scan back this many days from today
    #[arg(long, default_value_t = 30)]
    days: u32,

    /// Maximum number of messages to accumulate for deletion
    #[arg(long, default_value_t = 100)]
    limit: usize,

    /// Message ids requested per listing page (Gmail caps this at 500)
    #[arg(long, default_value_t = 100)]
    page_size: u32,

    /// Pause between per-message fetches, in milliseconds
    #[arg(long, default_value_t = 25)]
    throttle_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::time::Duration;

    use anyhow::{bail, Context, Result};
    use chrono::{Days, NaiveDate, Utc};

    use mailsweep::auth::Authenticator;
    use mailsweep::confirm::StdinConfirm;
    use mailsweep::purge::run_purge;
    use mailsweep::scan::{ScanBoundary, ScanOutcome};
    use mailsweep::store::GmailStore;

    use super::{Cli, Commands, PurgeArgs};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        match cli.command {
            Commands::Purge(args) => handle_purge(args).await,
            Commands::Login => handle_login().await,
        }
    }

    async fn handle_purge(args: PurgeArgs) -> Result<()> {
        if args.sender.trim().is_empty() {
            bail!("sender must not be empty");
        }
        if args.limit == 0 {
            bail!("--limit must be greater than zero");
        }

        let boundary = ScanBoundary {
            sender: args.sender,
            cutoff: resolve_cutoff(args.before.as_deref(), args.days)?,
            max_candidates: args.limit,
            page_size: args.page_size,
            throttle: Duration::from_millis(args.throttle_ms),
        };

        let auth = Authenticator::from_config_dir().context("resolve oauth credentials")?;
        let store = GmailStore::new(auth);
        let mut gate = StdinConfirm;

        let report = run_purge(&store, &mut gate, &boundary).await?;

        match report.outcome {
            ScanOutcome::StoppedAtLimit => {
                eprintln!("Stopped at the {}-message candidate limit.", report.matched);
            }
            ScanOutcome::StoppedAtCutoff => {
                eprintln!("Stopped at the {} cutoff.", boundary.cutoff);
            }
            ScanOutcome::Exhausted | ScanOutcome::NoMatches => {}
        }
        if report.deleted {
            println!("Deleted {} messages.", report.matched);
        }
        Ok(())
    }

    async fn handle_login() -> Result<()> {
        let auth = Authenticator::from_config_dir().context("resolve oauth credentials")?;
        auth.login().await.context("interactive login")?;
        Ok(())
    }

    fn resolve_cutoff(before: Option<&str>, days: u32) -> Result<NaiveDate> {
        if let Some(raw) = before {
            return NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
                .with_context(|| format!("invalid --before date '{raw}', expected YYYY-MM-DD"));
        }
        Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(u64::from(days)))
            .context("--days is out of range")
    }
}
