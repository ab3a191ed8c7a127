use crate::services::{
    database::DEFAULT_OPERATION_TIMEOUT, scheduler::DEFAULT_ARCHIVE_RETENTION,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const SECONDS_PER_HOUR: u64 = 60 * 60;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Deadline applied to every storage transaction.
    pub operation_timeout: Duration,
    /// How long an archived bucket survives before the sweep removes it.
    pub archive_retention: Duration,
    /// Run migrations and exit.
    pub migrate: bool,
    /// Serve without the background retention sweep.
    pub no_scheduler: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Adjective-noun name generator with consumable buckets")]
pub struct Args {
    /// Host to bind to (overrides NAMEBUCKET_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides NAMEBUCKET_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides NAMEBUCKET_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Per-transaction deadline in milliseconds (overrides NAMEBUCKET_OPERATION_TIMEOUT_MS)
    #[arg(long)]
    pub operation_timeout_ms: Option<u64>,

    /// Archived bucket retention in hours (overrides NAMEBUCKET_ARCHIVE_RETENTION_HOURS)
    #[arg(long)]
    pub archive_retention_hours: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Do not start the retention scheduler
    #[arg(long)]
    pub no_scheduler: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    /// Merge already parsed CLI args over the environment.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("NAMEBUCKET_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or("NAMEBUCKET_PORT", 3000u16)?;
        let env_db = env::var("NAMEBUCKET_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/namebucket.db".into());
        let env_timeout_ms = env_or(
            "NAMEBUCKET_OPERATION_TIMEOUT_MS",
            DEFAULT_OPERATION_TIMEOUT.as_millis() as u64,
        )?;
        let env_retention_hours = env_or(
            "NAMEBUCKET_ARCHIVE_RETENTION_HOURS",
            DEFAULT_ARCHIVE_RETENTION.as_secs() / SECONDS_PER_HOUR,
        )?;

        let timeout_ms = args.operation_timeout_ms.unwrap_or(env_timeout_ms);
        if timeout_ms == 0 {
            anyhow::bail!("operation timeout must be greater than zero");
        }
        let retention_hours = args.archive_retention_hours.unwrap_or(env_retention_hours);

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            operation_timeout: Duration::from_millis(timeout_ms),
            archive_retention: Duration::from_secs(retention_hours * SECONDS_PER_HOUR),
            migrate: args.migrate,
            no_scheduler: args.no_scheduler,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse `key`, falling back to `default` when it is unset.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
