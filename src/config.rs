use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use dotenvy::dotenv;

use crate::db::models::requests::RequestType;
use crate::db::retry::RetryPolicy;
use crate::workflow::engine::EngineSettings;

#[derive(Clone, Debug)]
pub struct Config {
    /// `None` runs against in-memory stores.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub auth_disabled: bool,
    pub bind_addr: SocketAddr,
    pub mutator_timeout: Duration,
    pub claim_lease: Duration,
    pub store_retry: RetryPolicy,
    pub event_channel_capacity: usize,
    pub resource_service_url: Option<String>,
    pub auto_approve_types: Vec<RequestType>,
    pub log_dir: PathBuf,
}

fn var_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
        _ => Ok(default),
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load environment variables (and `.env`) and apply defaults
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();

        let auth_disabled = var_or("AUTH_DISABLED", false)?;
        let jwt_secret = match non_empty("JWT_SECRET") {
            Some(secret) => secret,
            None if auth_disabled => String::new(),
            None => bail!("JWT_SECRET must be set unless AUTH_DISABLED=true"),
        };

        let mutator_timeout = Duration::from_millis(var_or("MUTATOR_TIMEOUT_MS", 5_000u64)?);
        let claim_lease = match non_empty("CLAIM_LEASE_SECS") {
            Some(_) => Some(Duration::from_secs(var_or("CLAIM_LEASE_SECS", 0u64)?)),
            None => None,
        };
        let claim_lease = Self::claim_lease_for(mutator_timeout, claim_lease)?;

        let auto_approve_types = non_empty("AUTO_APPROVE_TYPES")
            .map(|raw| Self::parse_request_types(&raw))
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            jwt_secret,
            auth_disabled,
            bind_addr: var_or("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000)))?,
            mutator_timeout,
            claim_lease,
            store_retry: RetryPolicy {
                max_retries: var_or("STORE_RETRY_ATTEMPTS", 3u32)?,
                base_backoff: Duration::from_millis(var_or("STORE_RETRY_BASE_MS", 50u64)?),
                max_backoff: Duration::from_secs(2),
            },
            event_channel_capacity: var_or("EVENT_CHANNEL_CAPACITY", 256usize)?,
            resource_service_url: non_empty("RESOURCE_SERVICE_URL"),
            auto_approve_types,
            log_dir: PathBuf::from(non_empty("LOG_DIR").unwrap_or_else(|| "logs".to_string())),
        })
    }

    /// Comma-separated request type tags.
    pub fn parse_request_types(raw: &str) -> anyhow::Result<Vec<RequestType>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<RequestType>()
                    .map_err(|_| anyhow::anyhow!("unknown request type '{}'", s))
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .context("AUTO_APPROVE_TYPES")
    }

    /// Lease for decision claims: four mutator timeouts unless configured. A
    /// configured lease must be at least twice the mutator timeout.
    pub fn claim_lease_for(mutator_timeout: Duration, configured: Option<Duration>) -> anyhow::Result<Duration> {
        let Some(lease) = configured else {
            return Ok(mutator_timeout * 4);
        };
        let minimum = EngineSettings {
            mutator_timeout,
            claim_lease: lease,
        }
        .min_claim_lease();
        if lease < minimum {
            bail!(
                "CLAIM_LEASE_SECS ({:?}) must be at least twice MUTATOR_TIMEOUT_MS ({:?})",
                lease,
                mutator_timeout
            );
        }
        Ok(lease)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            mutator_timeout: self.mutator_timeout,
            claim_lease: self.claim_lease,
        }
    }

    /// Defaults for in-process use: in-memory stores, auth disabled.
    pub fn local() -> Self {
        Self {
            database_url: None,
            jwt_secret: String::new(),
            auth_disabled: true,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            mutator_timeout: Duration::from_secs(5),
            claim_lease: Duration::from_secs(20),
            store_retry: RetryPolicy::default(),
            event_channel_capacity: 256,
            resource_service_url: None,
            auto_approve_types: Vec::new(),
            log_dir: PathBuf::from("logs"),
        }
    }
}
