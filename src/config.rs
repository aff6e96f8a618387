//! Process configuration, read once at startup from the environment
//! (`.env` honored via dotenvy in `main`).

use std::path::PathBuf;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Unset disables event publishing.
    pub nats_url: Option<String>,
    /// Unset disables the mobile-type classifier; numbers then assemble
    /// as landlines.
    pub mobile_lookup_url: Option<String>,
    /// Directory for the daily phone/duplicate diagnostic files.
    pub diag_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = get("DATABASE_URL").context("DATABASE_URL must be set")?;
        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT '{raw}' is not a valid port number"))?,
            None => 8084,
        };
        Ok(Self {
            database_url,
            port,
            nats_url: get("NATS_URL"),
            mobile_lookup_url: get("MOBILE_LOOKUP_URL"),
            diag_dir: get("DIAG_DIR").map(PathBuf::from).unwrap_or_else(|| "./logs".into()),
        })
    }
}
