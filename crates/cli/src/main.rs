use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ipre_core::config::{EngineOptions, Settings};
use ipre_core::engine::RecommendationEngine;
use ipre_core::stats::DEFAULT_HISTORY_MONTHS;

#[derive(Debug, Parser)]
#[command(name = "ipre", about = "Investment products recommendation engine")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a portfolio recommendation as JSON.
    Recommend {
        #[arg(long)]
        user_id: String,

        /// Risk preference in [0, 1]. Defaults to the user's predicted preference.
        #[arg(long)]
        risk_aversion: Option<f64>,
    },
    /// Print price statistics for one asset as JSON.
    Stat {
        #[arg(value_enum)]
        kind: StatKind,

        #[arg(long)]
        asset: String,

        #[arg(long, default_value_t = DEFAULT_HISTORY_MONTHS)]
        months: u32,
    },
    /// Apply database migrations.
    Migrate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatKind {
    Basic,
    Detailed,
    History,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    // stdout carries the JSON output.
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    if let Err(e) = run(&settings, args.command).await {
        sentry_anyhow::capture_anyhow(&e);
        return Err(e);
    }
    Ok(())
}

async fn run(settings: &Settings, command: Command) -> anyhow::Result<()> {
    let output = match command {
        Command::Recommend {
            user_id,
            risk_aversion,
        } => {
            let rec = engine(settings)
                .await?
                .make_recommendation(&user_id, risk_aversion)
                .await
                .with_context(|| format!("recommendation for {user_id} failed"))?;
            serde_json::to_string_pretty(&rec)?
        }
        Command::Stat {
            kind,
            asset,
            months,
        } => {
            let engine = engine(settings).await?;
            match kind {
                StatKind::Basic => serde_json::to_string_pretty(&engine.basic_stats(&asset).await?)?,
                StatKind::Detailed => {
                    serde_json::to_string_pretty(&engine.detailed_stats(&asset).await?)?
                }
                StatKind::History => {
                    serde_json::to_string_pretty(&engine.price_history(&asset, months).await?)?
                }
            }
        }
        Command::Migrate => {
            let pool = connect(settings.require_database_url()?).await?;
            ipre_core::storage::migrate(&pool).await?;
            tracing::info!("migrations applied");
            return Ok(());
        }
    };

    println!("{output}");
    Ok(())
}

async fn engine(settings: &Settings) -> anyhow::Result<RecommendationEngine> {
    let pool = match settings.database_url.as_deref() {
        Some(url) => Some(connect(url).await?),
        None => None,
    };
    RecommendationEngine::from_settings(settings, EngineOptions::from_env()?, pool)
}

async fn connect(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(db_url)
        .await
        .context("db connect failed")
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recommend() {
        let args = Args::try_parse_from([
            "ipre",
            "recommend",
            "--user-id",
            "user-0000000000000001",
            "--risk-aversion",
            "0.25",
        ])
        .unwrap();
        match args.command {
            Command::Recommend {
                user_id,
                risk_aversion,
            } => {
                assert_eq!(user_id, "user-0000000000000001");
                assert_eq!(risk_aversion, Some(0.25));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_stat_with_default_months() {
        let args = Args::try_parse_from(["ipre", "stat", "history", "--asset", "SPY"]).unwrap();
        match args.command {
            Command::Stat { kind, asset, months } => {
                assert!(matches!(kind, StatKind::History));
                assert_eq!(asset, "SPY");
                assert_eq!(months, 5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
