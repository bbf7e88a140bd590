use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fxdash_core::analysis::analyze;
use fxdash_core::convert::ConversionRequest;
use fxdash_core::domain::alarm::AlarmCondition;
use fxdash_core::domain::currency::{Currency, CurrencyPair};
use fxdash_core::news::{NewsCategory, SortOrder, DEFAULT_MAX_RESULTS};
use fxdash_core::rates::Granularity;
use fxdash_core::session::Session;

#[derive(Debug, Parser)]
#[command(name = "fxdash_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Convert an amount at the latest rate and record it in history.
    Convert {
        #[arg(long)]
        amount: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
    },

    /// Print the rate history summary for a pair.
    Analyze {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// Monthly points instead of daily.
        #[arg(long)]
        monthly: bool,
    },

    /// Most recent daily bars.
    Forex {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = fxdash_core::forex::DEFAULT_BAR_LIMIT)]
        limit: usize,
    },

    News {
        /// Search articles about this currency; top headlines when omitted.
        #[arg(long)]
        currency: Option<String>,
        #[arg(long, default_value = "all")]
        category: NewsCategory,
        #[arg(long, default_value = "publishedAt")]
        sort: SortOrder,
        #[arg(long, default_value_t = DEFAULT_MAX_RESULTS)]
        max: u32,
    },

    /// Load alarms from a JSON file and check them periodically until Ctrl-C.
    Watch {
        #[arg(long)]
        alarms: PathBuf,
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

/// One entry of the `watch --alarms` file.
#[derive(Debug, Deserialize)]
struct AlarmSpec {
    from: String,
    to: String,
    target_rate: f64,
    condition: AlarmCondition,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = fxdash_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let session = Session::from_settings(&settings)?;

    let result = run(&session, args.command).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %err, "command failed");
    }
    result
}

async fn run(session: &Session, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Convert { amount, from, to } => {
            let outcome = session
                .converter
                .convert(ConversionRequest { amount, from, to })
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            print_json(&outcome)
        }
        Command::Analyze { from, to, monthly } => {
            let pair = CurrencyPair::parse(&from, &to)?;
            let granularity = if monthly {
                Granularity::Monthly
            } else {
                Granularity::Daily
            };
            let history = session
                .rates
                .history(pair, granularity)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let analysis = analyze(history.points())?;
            tracing::info!(%pair, points = history.len(), trend = ?analysis.trend, "analysis done");
            print_json(&analysis)
        }
        Command::Forex { from, to, limit } => {
            let pair = CurrencyPair::parse(&from, &to)?;
            let bars = session
                .forex
                .daily(pair, limit)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            print_json(&bars)
        }
        Command::News {
            currency,
            category,
            sort,
            max,
        } => {
            let items = match currency {
                Some(code) => {
                    let currency = code.parse::<Currency>()?;
                    session.news.search(currency, category, sort, max).await
                }
                None => session.news.top_headlines(category, max).await,
            }
            .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            print_json(&items)
        }
        Command::Watch {
            alarms,
            interval_secs,
        } => watch(session, &alarms, interval_secs).await,
    }
}

async fn watch(session: &Session, path: &Path, interval_secs: Option<u64>) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read alarms file {} failed", path.display()))?;
    let specs = parse_alarm_specs(&raw)?;

    for spec in specs {
        let pair = CurrencyPair::parse(&spec.from, &spec.to)?;
        match session.alarms.add(pair, spec.target_rate, spec.condition) {
            Ok(alarm) => tracing::info!(alarm_id = %alarm.id, %pair, "alarm loaded"),
            Err(err) => tracing::warn!(%pair, error = %err, "alarm skipped"),
        }
    }

    let handle = match interval_secs {
        Some(secs) => {
            session.notifications.init().await;
            session.alarms.spawn_check_loop(Duration::from_secs(secs.max(1)))
        }
        None => session.start_alarm_loop().await,
    };

    tracing::info!(alarms = session.alarms.list().len(), "watching; press Ctrl-C to stop");
    let _ = tokio::signal::ctrl_c().await;
    handle.shutdown().await;
    Ok(())
}

fn parse_alarm_specs(raw: &str) -> anyhow::Result<Vec<AlarmSpec>> {
    serde_json::from_str(raw)
        .context("alarms file must be a JSON array of {from, to, target_rate, condition}")
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_sentry(settings: &fxdash_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
