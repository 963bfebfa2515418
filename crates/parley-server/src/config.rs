use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use parley_gateway::GatewayConfig;

/// Secrets that ship in docs and sample env files. Refused at startup.
const PLACEHOLDER_SECRETS: &[&str] = &["", "changeme", "change-me", "dev-secret-change-me", "secret"];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub gateway: GatewayConfig,
}

impl ServerConfig {
    /// Read `PARLEY_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").context("PARLEY_JWT_SECRET is not set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("PARLEY_JWT_SECRET is a placeholder, set a real secret");
        }

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            outbound_capacity: parse_or(&lookup, "PARLEY_OUTBOUND_CAPACITY", defaults.outbound_capacity)?,
            read_timeout: Duration::from_secs(parse_or(
                &lookup,
                "PARLEY_READ_TIMEOUT_SECS",
                defaults.read_timeout.as_secs(),
            )?),
            write_timeout: Duration::from_secs(parse_or(
                &lookup,
                "PARLEY_WRITE_TIMEOUT_SECS",
                defaults.write_timeout.as_secs(),
            )?),
            max_frame_bytes: parse_or(&lookup, "PARLEY_MAX_FRAME_BYTES", defaults.max_frame_bytes)?,
        };

        if gateway.outbound_capacity == 0 {
            bail!("PARLEY_OUTBOUND_CAPACITY must be at least 1");
        }
        if gateway.read_timeout.is_zero() || gateway.write_timeout.is_zero() {
            bail!("gateway timeouts must be non-zero");
        }

        Ok(Self {
            jwt_secret,
            db_path: lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            host: lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "PARLEY_PORT", 8080)?,
            gateway,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
