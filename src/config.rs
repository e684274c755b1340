use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub enrichment_base_url: String,
    pub enrichment_api_key: String,
    /// Remote DNC registry. Without it the built-in pattern rules apply.
    pub dnc_registry_url: Option<String>,
    pub dialer_base_url: String,
    pub dialer_token: String,
    pub operator_phone: String,
    pub provider_timeout: Duration,
    pub worker_concurrency: usize,
    pub queue_capacity: usize,
    pub pipeline_max_attempts: u32,
    pub retry_backoff: Duration,
    pub scoring_policy_path: Option<PathBuf>,
}

fn required(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))?;
    if value.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    Ok(value)
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn http_url(name: &str, url: String) -> anyhow::Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url)
}

/// Positive integer with a default.
fn positive<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr + PartialOrd + Default + Copy,
{
    let Some(raw) = optional(name) else {
        return Ok(default);
    };
    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid number", name))?;
    if value <= T::default() {
        anyhow::bail!("{} must be greater than zero", name);
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: required("DATABASE_URL").and_then(|url| {
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                }
                Ok(url)
            })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            enrichment_base_url: required("ENRICHMENT_BASE_URL")
                .and_then(|url| http_url("ENRICHMENT_BASE_URL", url))?,
            enrichment_api_key: required("ENRICHMENT_API_KEY")?,
            dnc_registry_url: optional("DNC_REGISTRY_URL")
                .map(|url| http_url("DNC_REGISTRY_URL", url))
                .transpose()?,
            dialer_base_url: required("DIALER_BASE_URL")
                .and_then(|url| http_url("DIALER_BASE_URL", url))?,
            dialer_token: required("DIALER_TOKEN")?,
            operator_phone: required("OPERATOR_PHONE")?,
            provider_timeout: Duration::from_secs(positive("PROVIDER_TIMEOUT_SECS", 30u64)?),
            worker_concurrency: positive("WORKER_CONCURRENCY", 4usize)?,
            queue_capacity: positive("QUEUE_CAPACITY", 1024usize)?,
            pipeline_max_attempts: positive("PIPELINE_MAX_ATTEMPTS", 3u32)?,
            retry_backoff: Duration::from_secs(positive("RETRY_BACKOFF_SECS", 5u64)?),
            scoring_policy_path: optional("SCORING_POLICY_PATH").map(PathBuf::from),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Enrichment Base URL: {}", config.enrichment_base_url);
        tracing::debug!("Dialer Base URL: {}", config.dialer_base_url);
        match config.dnc_registry_url {
            Some(ref url) => tracing::info!("DNC registry configured: {}", url),
            None => tracing::info!("No DNC registry configured, using pattern rules"),
        }
        tracing::debug!(
            "Workers: {}, queue capacity: {}, max attempts: {}",
            config.worker_concurrency,
            config.queue_capacity,
            config.pipeline_max_attempts
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
