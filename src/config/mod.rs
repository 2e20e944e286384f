use std::env;
use std::net::SocketAddr;

use chrono::{FixedOffset, Offset, Utc};

use crate::models::CurrencyPair;

/// Bangkok / Yangon business day, UTC+07:00.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 420;

pub fn default_offset() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_UTC_OFFSET_MINUTES * 60).unwrap_or_else(|| Utc.fix())
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,

    /// Offset of the business-local day used to scope runs.
    pub utc_offset: FixedOffset,
    pub pair: CurrencyPair,
    pub carryover_enabled: bool,

    // Daemon
    pub day_close_interval_secs: u64,
    pub metrics_addr: Option<SocketAddr>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let utc_offset_minutes: i32 = env::var("LEDGER_UTC_OFFSET_MINUTES")
            .unwrap_or_else(|_| DEFAULT_UTC_OFFSET_MINUTES.to_string())
            .parse()?;
        let utc_offset = FixedOffset::east_opt(utc_offset_minutes * 60).ok_or_else(|| {
            anyhow::anyhow!("LEDGER_UTC_OFFSET_MINUTES out of range: {utc_offset_minutes}")
        })?;

        let metrics_addr = match env::var("METRICS_ADDR") {
            Ok(raw) if !raw.trim().is_empty() => Some(raw.trim().parse()?),
            _ => None,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .unwrap_or(10),

            utc_offset,
            pair: env::var("LEDGER_PAIR")
                .unwrap_or_else(|_| "THB/MMK".into())
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?,
            carryover_enabled: env::var("CARRYOVER_ENABLED")
                .unwrap_or_else(|_| "true".into())
                .parse()
                .unwrap_or(true),

            day_close_interval_secs: env::var("DAY_CLOSE_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".into())
                .parse()
                .unwrap_or(3600),
            metrics_addr,
        })
    }
}
