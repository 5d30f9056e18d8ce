//! Environment-driven configuration
//!
//! Defaults come from each component's `Default` impl. `MARKETSYNC_*`
//! variables override individual fields; the stream credential comes from
//! `POLY_API_KEY` / `POLY_SECRET` / `POLY_PASSPHRASE`.

use std::str::FromStr;
use std::time::Duration;

use marketsync_core::{MarketError, MarketResult};
use marketsync_polymarket::{ClientConfig, StreamConfig, StreamCredentials, TradeSchema};

use crate::historical_series::SeriesConfig;
use crate::trade_backfiller::BackfillConfig;

/// Configuration for every component behind [`crate::MarketDataSync`]
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub client: ClientConfig,
    pub stream: StreamConfig,
    pub backfill: BackfillConfig,
    pub series: SeriesConfig,
}

impl SyncConfig {
    /// Load from the process environment
    pub fn from_env() -> MarketResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> MarketResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = SyncConfig::default();

        // Client
        if let Some(url) = env.string("MARKETSYNC_CLOB_URL") {
            config.client.clob_url = url;
        }
        if let Some(url) = env.string("MARKETSYNC_DATA_API_URL") {
            config.client.data_api_url = url;
        }
        if let Some(secs) = env.parse::<u64>("MARKETSYNC_REQUEST_TIMEOUT_SECS")? {
            config.client.request_timeout = Duration::from_secs(secs);
        }
        if let Some(schema) = env.string("MARKETSYNC_TRADE_SCHEMA") {
            config.client.trade_schema = TradeSchema::from_str(&schema)
                .map_err(|e| MarketError::configuration(format!("MARKETSYNC_TRADE_SCHEMA: {}", e)))?;
        }

        // Stream
        config.stream.credentials = StreamCredentials::from_lookup(|name| (env.lookup)(name));
        if let Some(url) = env.string("MARKETSYNC_STREAM_URL") {
            config.stream.url = url;
        }
        if let Some(secs) = env.parse::<u64>("MARKETSYNC_HEARTBEAT_SECS")? {
            config.stream.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = env.parse::<u32>("MARKETSYNC_MAX_RECONNECT_ATTEMPTS")? {
            config.stream.max_reconnect_attempts = attempts;
        }

        // Backfill
        if let Some(cap) = env.parse::<u32>("MARKETSYNC_BACKFILL_RESULT_CAP")? {
            config.backfill.result_cap = cap;
        }
        if let Some(days) = env.parse::<u64>("MARKETSYNC_BACKFILL_WINDOW_DAYS")? {
            config.backfill.window = Duration::from_secs(days * 24 * 60 * 60);
        }
        if let Some(concurrency) = env.parse::<usize>("MARKETSYNC_BACKFILL_CONCURRENCY")? {
            config.backfill.max_concurrency = concurrency;
        }
        if let Some(requests) = env.parse::<u32>("MARKETSYNC_RATE_BUDGET_REQUESTS")? {
            config.backfill.rate_budget_requests = requests;
        }

        // Series
        if let Some(budget) = env.parse::<usize>("MARKETSYNC_POINT_BUDGET")? {
            config.series.point_budget = budget;
        }
        if let Some(days) = env.parse::<u64>("MARKETSYNC_UNBOUNDED_MIN_COVERAGE_DAYS")? {
            config.series.unbounded_min_coverage = Duration::from_secs(days * 24 * 60 * 60);
        }

        config.stream.validate()?;
        Ok(config)
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &str) -> MarketResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(name)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| {
                    MarketError::configuration(format!("{}={}: {}", name, raw, e))
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();

        assert!(config.stream.credentials.is_none());
        assert_eq!(config.series.point_budget, 1000);
        assert_eq!(config.backfill.result_cap, 500);
        assert_eq!(config.stream.max_reconnect_attempts, 10);
    }

    #[test]
    fn test_overrides_applied() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("POLY_API_KEY", "key-1"),
            ("MARKETSYNC_TRADE_SCHEMA", "data-api"),
            ("MARKETSYNC_POINT_BUDGET", "250"),
            ("MARKETSYNC_UNBOUNDED_MIN_COVERAGE_DAYS", "14"),
            ("MARKETSYNC_CLOB_URL", "http://localhost:9000"),
        ]))
        .unwrap();

        assert_eq!(config.stream.credentials.unwrap().api_key, "key-1");
        assert_eq!(config.client.trade_schema, TradeSchema::DataApi);
        assert_eq!(config.series.point_budget, 250);
        assert_eq!(
            config.series.unbounded_min_coverage,
            Duration::from_secs(14 * 86_400)
        );
        assert_eq!(config.client.clob_url, "http://localhost:9000");
    }

    #[test]
    fn test_invalid_number_is_configuration_error() {
        let err = SyncConfig::from_lookup(lookup(&[("MARKETSYNC_POINT_BUDGET", "lots")])).unwrap_err();
        assert!(matches!(err, MarketError::Configuration(_)));
    }

    #[test]
    fn test_zero_heartbeat_is_configuration_error() {
        let err = SyncConfig::from_lookup(lookup(&[("MARKETSYNC_HEARTBEAT_SECS", "0")])).unwrap_err();
        assert!(matches!(err, MarketError::Configuration(_)));
    }

    #[test]
    fn test_empty_api_key_means_no_credential() {
        let config = SyncConfig::from_lookup(lookup(&[("POLY_API_KEY", "  ")])).unwrap();
        assert!(config.stream.credentials.is_none());
    }
}
