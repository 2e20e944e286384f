use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;

use fxledger::config::AppConfig;
use fxledger::db;
use fxledger::models::{NewAdjustment, NewTrade, Scope};
use fxledger::services::aggregation::ProfitAggregator;
use fxledger::services::day_close::run_day_close_loop;
use fxledger::services::reconciler::{Reconciler, ReconcilerConfig};
use fxledger::store::{LedgerStore, PgStore};

#[derive(Parser)]
#[command(name = "fxledger", about = "THB/MMK FIFO profit ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply database migrations.
    Migrate,
    /// Re-derive remaining amounts and profit. Without dates every trade is matched.
    Run {
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Inclusive; defaults to --from.
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Report stored profit for a local date range.
    Profit {
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
        /// One entry per day instead of a single total.
        #[arg(long)]
        daily: bool,
    },
    /// Record a BUY or SELL.
    Trade {
        #[arg(value_enum)]
        side: Side,
        #[arg(long)]
        thb: Decimal,
        #[arg(long)]
        mmk: Decimal,
        /// MMK per THB; derived from the amounts when omitted.
        #[arg(long)]
        rate: Option<Decimal>,
        /// RFC 3339 timestamp; defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long)]
        customer: Option<String>,
    },
    /// Record a manual profit adjustment (negative for a loss).
    Adjust {
        #[arg(long, allow_hyphen_values = true)]
        amount: Decimal,
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Close each local day as it ends.
    Daemon,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Buy,
    Sell,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database connected");

    if matches!(cli.command, Command::Migrate) {
        db::migrate(&pool).await?;
        tracing::info!("Migrations applied");
        return Ok(());
    }

    let store = PgStore::new(pool, config.utc_offset);

    match cli.command {
        Command::Migrate => {}
        Command::Run { from, to } => {
            let scope = match (from, to) {
                (None, None) => Scope::All,
                (Some(from), to) => {
                    Scope::range(from, to.unwrap_or(from)).map_err(|e| anyhow::anyhow!(e))?
                }
                (None, Some(_)) => anyhow::bail!("--to requires --from"),
            };
            let reconciler = Reconciler::new(store, reconciler_config(&config));
            print_json(&reconciler.run_matching(scope).await?)?;
        }
        Command::Profit { from, to, daily } => {
            let aggregator = ProfitAggregator::new(&store);
            if daily {
                print_json(&aggregator.daily(from, to).await?)?;
            } else {
                print_json(&aggregator.total(from, to).await?)?;
            }
        }
        Command::Trade {
            side,
            thb,
            mmk,
            rate,
            at,
            customer,
        } => {
            let at = at.unwrap_or_else(Utc::now);
            let mut trade = match side {
                Side::Buy => NewTrade::buy(thb, mmk, at),
                Side::Sell => NewTrade::sell(thb, mmk, at),
            };
            trade.pair = config.pair;
            trade.rate = rate;
            trade.customer = customer;
            print_json(&store.record_trade(trade).await?)?;
        }
        Command::Adjust { amount, at, notes } => {
            let adjustment = NewAdjustment {
                amount,
                traded_at: at.unwrap_or_else(Utc::now),
                notes,
            };
            print_json(&store.record_adjustment(adjustment).await?)?;
        }
        Command::Daemon => {
            fxledger::metrics::init_metrics(config.metrics_addr)?;
            if let Some(addr) = config.metrics_addr {
                tracing::info!(%addr, "Prometheus exporter listening");
            }

            let reconciler = Arc::new(Reconciler::new(store, reconciler_config(&config)));
            tracing::info!(
                interval_secs = config.day_close_interval_secs,
                carryover = config.carryover_enabled,
                "Day close loop started"
            );
            tokio::select! {
                _ = run_day_close_loop(reconciler, config.day_close_interval_secs) => {}
                _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
            }
        }
    }

    Ok(())
}

fn reconciler_config(config: &AppConfig) -> ReconcilerConfig {
    ReconcilerConfig {
        pair: config.pair,
        offset: config.utc_offset,
        carryover_enabled: config.carryover_enabled,
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
