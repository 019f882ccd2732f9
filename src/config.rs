use anyhow::{anyhow, Result};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};
use tracing::info;

/// Runtime configuration, read from `GREENRECEIPT_*` environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: String,
    pub static_dir: Option<PathBuf>,
    pub ingest: IngestSettings,
}

/// Knobs used by ingestion and reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    pub default_currency: String,
    /// Allowed absolute difference before a price or total is flagged
    pub price_tolerance: f64,
    /// Differences at or above this are major discrepancies
    pub major_discrepancy: f64,
    pub low_stock_threshold: u32,
}

impl Default for IngestSettings {
    fn default() -> Self {
        IngestSettings {
            default_currency: "INR".to_string(),
            price_tolerance: 0.01,
            major_discrepancy: 10.0,
            low_stock_threshold: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("greenreceipt.db"),
            bind_addr: "0.0.0.0:3000".to_string(),
            static_dir: None,
            ingest: IngestSettings::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = IngestSettings::default();

        let default_currency: String =
            try_load(&lookup, "GREENRECEIPT_CURRENCY", &defaults.default_currency)?;
        let default_currency = default_currency.trim().to_uppercase();
        if default_currency.len() != 3 || !default_currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(anyhow!(
                "Invalid GREENRECEIPT_CURRENCY value: {default_currency} (expected ISO 4217 code)"
            ));
        }

        let price_tolerance: f64 = try_load(&lookup, "GREENRECEIPT_PRICE_TOLERANCE", "0.01")?;
        let major_discrepancy: f64 = try_load(&lookup, "GREENRECEIPT_MAJOR_DISCREPANCY", "10.0")?;
        if !(price_tolerance >= 0.0 && major_discrepancy > price_tolerance) {
            return Err(anyhow!(
                "GREENRECEIPT_MAJOR_DISCREPANCY must exceed GREENRECEIPT_PRICE_TOLERANCE"
            ));
        }

        let ingest = IngestSettings {
            default_currency,
            price_tolerance,
            major_discrepancy,
            low_stock_threshold: try_load(&lookup, "GREENRECEIPT_LOW_STOCK", "5")?,
        };

        let db_path: String = try_load(&lookup, "GREENRECEIPT_DB_PATH", "greenreceipt.db")?;

        Ok(Config {
            db_path: PathBuf::from(db_path),
            bind_addr: try_load(&lookup, "GREENRECEIPT_BIND", "0.0.0.0:3000")?,
            static_dir: lookup("GREENRECEIPT_STATIC_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            ingest,
        })
    }
}

fn try_load<F, T>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim()
        .parse()
        .map_err(|e| anyhow!("Invalid {key} value {raw:?}: {e}"))
}
