use crate::api_client::Breakdown;
use clap::Args as ClapArgs;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://graph.facebook.com";
const DEFAULT_API_VERSION: &str = "v19.0";
const DEFAULT_WAREHOUSE_PATH: &str = "./ads_warehouse.db";
const DEFAULT_BREAKDOWNS: &str = "placement,demographic,country";

/// Upstream multi-ID lookup limit.
pub const BATCH_SIZE: usize = 50;

#[derive(ClapArgs, Clone, Debug)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_API_URL, env = "ADS_API_URL")]
    pub(crate) api_url: String,

    #[arg(long, default_value = DEFAULT_API_VERSION, env = "ADS_API_VERSION")]
    pub(crate) api_version: String,

    #[arg(long, env = "ADS_APP_ID", default_value = "")]
    pub(crate) app_id: String,

    #[arg(long, env = "ADS_APP_SECRET", default_value = "", hide_env_values = true)]
    pub(crate) app_secret: String,

    #[arg(long, env = "ADS_ACCESS_TOKEN", default_value = "", hide_env_values = true)]
    pub(crate) access_token: String,

    #[arg(long, env = "ADS_ACCOUNT_ID", default_value = "")]
    pub(crate) account_id: String,

    #[arg(long, default_value = DEFAULT_WAREHOUSE_PATH, env = "WAREHOUSE_PATH")]
    pub(crate) database_path: String,

    #[arg(long, default_value_t = 7, env = "ETL_CHUNK_DAYS")]
    pub(crate) chunk_days: u32,

    #[arg(long, default_value_t = 4, env = "ETL_INSIGHTS_WORKERS")]
    pub(crate) insights_workers: usize,

    #[arg(long, default_value_t = 8, env = "ETL_METADATA_WORKERS")]
    pub(crate) metadata_workers: usize,

    #[arg(long, default_value_t = 30, env = "ETL_BATCH_TIMEOUT_SECS")]
    pub(crate) batch_timeout_secs: u64,

    #[arg(long, default_value_t = 60, env = "ETL_REQUEST_TIMEOUT_SECS")]
    pub(crate) request_timeout_secs: u64,

    #[arg(long, default_value_t = 500, env = "ETL_BULK_FETCH_THRESHOLD")]
    pub(crate) bulk_fetch_threshold: usize,

    #[arg(long, default_value_t = 10, env = "ETL_TOP_N_COUNTRIES")]
    pub(crate) top_n_countries: usize,

    #[arg(long, default_value_t = 90, env = "ETL_INITIAL_LOOKBACK_DAYS")]
    pub(crate) initial_lookback_days: u32,

    #[arg(long, default_value_t = 3, env = "ETL_REFRESH_DAYS")]
    pub(crate) refresh_days: u32,

    #[arg(long, default_value_t = 3, env = "ETL_MAX_RETRIES")]
    pub(crate) max_retries: u32,

    #[arg(long, default_value_t = 2, env = "ETL_INDIVIDUAL_MAX_RETRIES")]
    pub(crate) individual_max_retries: u32,

    #[arg(long, default_value_t = 1000, env = "ETL_BASE_BACKOFF_MS")]
    pub(crate) base_backoff_ms: u64,

    #[arg(long, default_value_t = 4, env = "ETL_RATE_LIMIT_MULTIPLIER")]
    pub(crate) rate_limit_multiplier: u32,

    #[arg(
        long,
        default_value = DEFAULT_BREAKDOWNS,
        env = "ETL_BREAKDOWNS",
        value_delimiter = ',',
        value_parser = parse_breakdown
    )]
    pub(crate) breakdowns: Vec<Breakdown>,
}

fn parse_breakdown(s: &str) -> Result<Breakdown, String> {
    match s.trim() {
        "placement" => Ok(Breakdown::Placement),
        "demographic" => Ok(Breakdown::Demographic),
        "country" => Ok(Breakdown::Country),
        other => Err(format!(
            "Unknown breakdown '{}', expected placement, demographic or country",
            other
        )),
    }
}

/// Retry budget for one kind of upstream call.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub rate_limit_multiplier: u32,
}

impl RetryPolicy {
    pub fn batch(config: &Config) -> Self {
        RetryPolicy {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            rate_limit_multiplier: config.rate_limit_multiplier,
        }
    }

    pub fn individual(config: &Config) -> Self {
        RetryPolicy {
            max_retries: config.individual_max_retries,
            ..Self::batch(config)
        }
    }
}

/// Knobs the pipeline reads, detached from the CLI surface.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub chunk_days: u32,
    pub batch_timeout: Duration,
    pub bulk_fetch_threshold: usize,
    pub top_n_countries: usize,
    pub initial_lookback_days: u32,
    pub refresh_days: u32,
    pub breakdowns: Vec<Breakdown>,
    pub batch_retry: RetryPolicy,
    pub individual_retry: RetryPolicy,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        PipelineSettings {
            chunk_days: config.chunk_days.max(1),
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
            bulk_fetch_threshold: config.bulk_fetch_threshold,
            top_n_countries: config.top_n_countries,
            initial_lookback_days: config.initial_lookback_days.max(1),
            refresh_days: config.refresh_days,
            breakdowns: config.breakdowns.clone(),
            batch_retry: RetryPolicy::batch(config),
            individual_retry: RetryPolicy::individual(config),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn test_config() -> Config {
        Config {
            api_url: String::from("https://graph.example.com"),
            api_version: String::from("v19.0"),
            app_id: String::from("app"),
            app_secret: String::from("secret"),
            access_token: String::from("token"),
            account_id: String::from("1234"),
            database_path: String::from(":memory:"),
            chunk_days: 7,
            insights_workers: 2,
            metadata_workers: 2,
            batch_timeout_secs: 1,
            request_timeout_secs: 5,
            bulk_fetch_threshold: 500,
            top_n_countries: 3,
            initial_lookback_days: 30,
            refresh_days: 3,
            max_retries: 1,
            individual_max_retries: 1,
            base_backoff_ms: 1,
            rate_limit_multiplier: 2,
            breakdowns: vec![Breakdown::Placement, Breakdown::Demographic, Breakdown::Country],
        }
    }

    #[test]
    fn test_parse_breakdown() {
        assert_eq!(parse_breakdown("placement"), Ok(Breakdown::Placement));
        assert_eq!(parse_breakdown(" country "), Ok(Breakdown::Country));
        assert!(parse_breakdown("region").is_err());
    }

    #[test]
    fn test_individual_policy_uses_smaller_budget() {
        let config = test_config();
        let policy = RetryPolicy::individual(&config);
        assert_eq!(policy.max_retries, config.individual_max_retries);
        assert_eq!(policy.base_backoff, Duration::from_millis(1));
    }
}
