use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;
use serde::Deserialize;

/// Which identity proof the deployment hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Self-contained signed JWT in an `Authorization: Bearer` header.
    Token,
    /// Opaque id in a cookie, backed by a server-side session record.
    Session,
}

impl FromStr for AuthMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" | "jwt" => Ok(AuthMode::Token),
            "session" | "cookie" => Ok(AuthMode::Session),
            other => anyhow::bail!("unknown AUTH_MODE {other:?}, expected token or session"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

impl FromStr for SameSite {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SameSite::Strict),
            "lax" => Ok(SameSite::Lax),
            "none" => Ok(SameSite::None),
            other => anyhow::bail!("unknown SameSite value {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_minutes: i64,
    pub secure: bool,
    pub same_site: SameSite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// `None` runs the service on the in-memory stores.
    pub database_url: Option<String>,
    pub auth_mode: AuthMode,
    pub jwt: JwtConfig,
    pub session: SessionConfig,
    /// Empty means permissive CORS.
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr: SocketAddr = format!(
            "{}:{}",
            var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            var("APP_PORT").unwrap_or_else(|| "8080".into())
        )
        .parse()
        .context("APP_HOST/APP_PORT do not form a socket address")?;

        let auth_mode = match var("AUTH_MODE") {
            Some(v) => v.parse()?,
            None => AuthMode::Token,
        };

        let secret = match (var("JWT_SECRET"), auth_mode) {
            (Some(s), _) => s,
            (None, AuthMode::Token) => anyhow::bail!("JWT_SECRET must be set when AUTH_MODE=token"),
            (None, AuthMode::Session) => String::new(),
        };

        let jwt = JwtConfig {
            secret,
            issuer: var("JWT_ISSUER").unwrap_or_else(|| "taskdesk".into()),
            audience: var("JWT_AUDIENCE").unwrap_or_else(|| "taskdesk-users".into()),
            ttl_minutes: ttl_minutes(var("JWT_TTL_MINUTES"), "JWT_TTL_MINUTES")?,
        };

        let session = SessionConfig {
            cookie_name: var("SESSION_COOKIE_NAME").unwrap_or_else(|| "taskdesk.sid".into()),
            ttl_minutes: ttl_minutes(var("SESSION_TTL_MINUTES"), "SESSION_TTL_MINUTES")?,
            secure: parse_or(var("SESSION_COOKIE_SECURE"), "SESSION_COOKIE_SECURE", true)?,
            same_site: parse_or(var("SESSION_COOKIE_SAME_SITE"), "SESSION_COOKIE_SAME_SITE", SameSite::Lax)?,
        };

        let cors_origins = var("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind_addr,
            database_url: var("DATABASE_URL"),
            auth_mode,
            jwt,
            session,
            cors_origins,
        })
    }

    /// In-memory configuration used by unit and router tests.
    #[cfg(test)]
    pub fn for_tests(auth_mode: AuthMode) -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            database_url: None,
            auth_mode,
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            session: SessionConfig {
                cookie_name: "taskdesk.sid".into(),
                ttl_minutes: 5,
                secure: true,
                same_site: SameSite::Lax,
            },
            cors_origins: Vec::new(),
        }
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        None => Ok(default),
    }
}

const DEFAULT_TTL_MINUTES: i64 = 60 * 24 * 7;
/// One year.
const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

/// Proof lifetimes must stay small enough for timestamp arithmetic.
fn ttl_minutes(raw: Option<String>, key: &str) -> anyhow::Result<i64> {
    let ttl = parse_or(raw, key, DEFAULT_TTL_MINUTES)?;
    if !(1..=MAX_TTL_MINUTES).contains(&ttl) {
        anyhow::bail!("{key} must be between 1 and {MAX_TTL_MINUTES} minutes, got {ttl}");
    }
    Ok(ttl)
}
