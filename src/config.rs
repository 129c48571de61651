use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub access_secret: String,
    pub access_ttl: Duration,
    pub refresh_secret: String,
    pub refresh_ttl: Duration,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Base that object keys are appended to when building durable media URLs.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    /// Argon2id iteration count.
    pub password_hash_cost: u32,
    pub storage: StorageConfig,
    pub cookie_secure: bool,
    pub cors_origin: Option<String>,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> anyhow::Result<String> {
            match lookup(key) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => bail!("{key} must be set"),
            }
        };

        let jwt = JwtConfig {
            access_secret: required("ACCESS_TOKEN_SECRET")?,
            access_ttl: parse_expiry(&required("ACCESS_TOKEN_EXPIRY")?)
                .context("ACCESS_TOKEN_EXPIRY")?,
            refresh_secret: required("REFRESH_TOKEN_SECRET")?,
            refresh_ttl: parse_expiry(&required("REFRESH_TOKEN_EXPIRY")?)
                .context("REFRESH_TOKEN_EXPIRY")?,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "vidtube".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "vidtube-users".into()),
        };
        if jwt.access_secret == jwt.refresh_secret {
            bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }

        let password_hash_cost = required("PASSWORD_HASH_COST")?
            .trim()
            .parse::<u32>()
            .context("PASSWORD_HASH_COST must be a positive integer")?;
        if password_hash_cost == 0 {
            bail!("PASSWORD_HASH_COST must be at least 1");
        }

        let endpoint = required("MINIO_ENDPOINT")?;
        let bucket = required("MINIO_BUCKET")?;
        let public_url = lookup("MEDIA_PUBLIC_URL")
            .unwrap_or_else(|| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let storage = StorageConfig {
            access_key: required("MINIO_ACCESS_KEY")?,
            secret_key: required("MINIO_SECRET_KEY")?,
            region: lookup("MINIO_REGION").unwrap_or_else(|| "us-east-1".into()),
            public_url: public_url.trim_end_matches('/').to_string(),
            endpoint,
            bucket,
        };

        let cookie_secure = lookup("COOKIE_SECURE")
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
            .unwrap_or(true);

        let host = lookup("APP_HOST")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "0.0.0.0".into());
        let port = match lookup("APP_PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .context("APP_PORT must be a port number")?,
            None => 8080,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            jwt,
            password_hash_cost,
            storage,
            cookie_secure,
            cors_origin: lookup("CORS_ORIGIN").filter(|v| !v.trim().is_empty()),
            host,
            port,
        })
    }
}

const MAX_EXPIRY_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Parses token lifetimes such as `900`, `15m`, `1h` or `10d`.
pub fn parse_expiry(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits
        .parse()
        .with_context(|| format!("invalid expiry {raw:?}"))?;
    let multiplier = match unit.trim() {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        other => bail!("unknown expiry unit {other:?} in {raw:?}"),
    };
    if amount == 0 {
        bail!("expiry must be greater than zero");
    }
    let secs = amount
        .checked_mul(multiplier)
        .filter(|s| *s <= MAX_EXPIRY_SECS)
        .with_context(|| format!("expiry {raw:?} exceeds the 10 year maximum"))?;
    Ok(Duration::from_secs(secs))
}
