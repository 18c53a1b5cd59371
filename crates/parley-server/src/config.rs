use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use parley_gateway::GatewaySettings;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
    pub public_url: String,
    pub frontend_url: Option<String>,
    pub gateway: GatewaySettings,
}

impl Config {
    /// Read `PARLEY_*` variables. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder; it must match the auth service's secret");
        }

        let port: u16 = parse_or(&lookup, "PARLEY_PORT", 5000)?;

        Ok(Self {
            host: lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            jwt_secret,
            upload_dir: lookup("PARLEY_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            public_url: lookup("PARLEY_PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            frontend_url: lookup("PARLEY_FRONTEND_URL").filter(|v| !v.is_empty()),
            gateway: GatewaySettings {
                heartbeat_interval: Duration::from_secs(parse_or(&lookup, "PARLEY_HEARTBEAT_SECS", 15)?),
                identify_timeout: Duration::from_secs(parse_or(
                    &lookup,
                    "PARLEY_IDENTIFY_TIMEOUT_SECS",
                    10,
                )?),
                close_superseded: parse_or(&lookup, "PARLEY_CLOSE_SUPERSEDED", false)?,
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[("PARLEY_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.public_url, "http://localhost:5000");
        assert_eq!(cfg.gateway.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(cfg.gateway.identify_timeout, Duration::from_secs(10));
        assert!(!cfg.gateway.close_superseded);
        assert!(cfg.frontend_url.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("PARLEY_JWT_SECRET", "s3cret"),
            ("PARLEY_PORT", "8080"),
            ("PARLEY_HEARTBEAT_SECS", "5"),
            ("PARLEY_CLOSE_SUPERSEDED", "true"),
            ("PARLEY_FRONTEND_URL", "http://localhost:5173"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.public_url, "http://localhost:8080");
        assert_eq!(cfg.gateway.heartbeat_interval, Duration::from_secs(5));
        assert!(cfg.gateway.close_superseded);
        assert_eq!(cfg.frontend_url.as_deref(), Some("http://localhost:5173"));
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        assert!(config(&[]).is_err());
        assert!(config(&[("PARLEY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_numbers_are_errors() {
        let err = config(&[("PARLEY_JWT_SECRET", "s3cret"), ("PARLEY_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("PARLEY_PORT"));
    }
}
