//! Configuration for fee-ledger-service.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::Deserialize;
use service_core::config::Config as CoreConfig;
use service_core::error::AppError;
use std::env;

/// Fee ledger service configuration.
#[derive(Debug, Clone)]
pub struct FeeLedgerConfig {
    pub common: CoreConfig,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub school: SchoolConfig,
    pub receipts: ReceiptConfig,
    pub statistics: StatisticsConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Where the school is. Receipt days and due dates follow the school's
/// calendar, not the server's.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SchoolConfig {
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReceiptConfig {
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StatisticsConfig {
    pub top_collectors: i64,
}

impl SchoolConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    /// School-local calendar date for an instant.
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset()).date_naive()
    }

    /// Today in the school's calendar.
    pub fn today(&self) -> NaiveDate {
        self.date_of(Utc::now())
    }
}

impl Default for SchoolConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
        }
    }
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self { top_collectors: 10 }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", name, e))
        }),
        Err(_) => Ok(default),
    }
}

impl FeeLedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let common = CoreConfig::load()?;

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("DATABASE_URL must be set")))?;

        let utc_offset_minutes: i32 = parse_var("SCHOOL_UTC_OFFSET_MINUTES", 0)?;
        if FixedOffset::east_opt(utc_offset_minutes * 60).is_none() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SCHOOL_UTC_OFFSET_MINUTES out of range: {}",
                utc_offset_minutes
            )));
        }

        let max_attempts: u32 = parse_var("RECEIPT_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "RECEIPT_MAX_ATTEMPTS must be at least 1"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "fee-ledger-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_var("DATABASE_MIN_CONNECTIONS", 2)?,
            },
            school: SchoolConfig { utc_offset_minutes },
            receipts: ReceiptConfig { max_attempts },
            statistics: StatisticsConfig {
                top_collectors: parse_var("STATISTICS_TOP_COLLECTORS", 10)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn school_day_follows_offset() {
        // 20:00 UTC on the 18th is already the 19th in UTC+05:30.
        let instant = Utc.with_ymd_and_hms(2026, 10, 18, 20, 0, 0).unwrap();

        let utc = SchoolConfig {
            utc_offset_minutes: 0,
        };
        let india = SchoolConfig {
            utc_offset_minutes: 330,
        };

        assert_eq!(utc.date_of(instant), NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        assert_eq!(india.date_of(instant), NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
    }

    #[test]
    fn defaults() {
        assert_eq!(ReceiptConfig::default().max_attempts, 3);
        assert_eq!(StatisticsConfig::default().top_collectors, 10);
    }
}
