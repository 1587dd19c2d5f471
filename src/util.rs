use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, DurationMilliSeconds};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::time::Duration;

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PgConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub dbname: String,
    #[serde_as(as = "DisplayFromStr")]
    pub sslmode: PgSslMode,
}

impl From<PgConfig> for PgConnectOptions {
    fn from(config: PgConfig) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&config.host)
            .username(&config.user)
            .password(config.password.expose_secret())
            .database(&config.dbname)
            .port(config.port)
            .ssl_mode(config.sslmode)
    }
}

impl PgConfig {
    /// Connect options with a server side `statement_timeout`, so Postgres itself aborts statements
    /// running past the deadline.
    pub fn connect_options(self, statement_timeout: Duration) -> PgConnectOptions {
        PgConnectOptions::from(self)
            .options([("statement_timeout", statement_timeout.as_millis())])
    }
}

/// Sizing of the DB connection pool; the acquire timeout is given in milliseconds.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolConfig {
    pub max_connections: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub acquire_timeout: Duration,
}

impl From<PoolConfig> for PgPoolOptions {
    fn from(config: PoolConfig) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
    }
}
