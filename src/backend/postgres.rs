//! PostgreSQL Backend
//!
//! Opens one unpooled `PgConnection` per simulated client so that pooling is
//! left entirely to whatever sits between us and the server (usually
//! PgBouncer). Statements go through the simple query protocol, which keeps
//! `begin;` and anonymous `DO` blocks working through transaction poolers.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Connection as _, Executor as _};
use std::str::FromStr;
use tracing::debug;

use super::{Backend, BackendError, Connection};
use crate::config::ConnectionConfig;

/// Backend that dials PostgreSQL (or a pooler speaking its protocol)
#[derive(Debug, Clone)]
pub struct PostgresBackend {
    options: PgConnectOptions,
    endpoint: String,
}

impl PostgresBackend {
    /// Build connect options from configuration. No connection is opened here.
    pub fn new(config: &ConnectionConfig) -> Result<Self, BackendError> {
        config
            .validate()
            .map_err(|e| BackendError::InvalidConfiguration(e.to_string()))?;

        let ssl_mode = PgSslMode::from_str(&config.ssl_mode).map_err(|e| {
            BackendError::InvalidConfiguration(format!(
                "Invalid sslmode '{}': {}",
                config.ssl_mode, e
            ))
        })?;

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .ssl_mode(ssl_mode)
            .application_name(&config.application_name);

        if let Some(ref username) = config.username {
            options = options.username(username);
        }
        if let Some(ref password) = config.password {
            options = options.password(password);
        }

        Ok(Self {
            options,
            endpoint: format!("{}:{}/{}", config.host, config.port, config.database),
        })
    }

    /// Build connect options from a `postgres://` URL
    pub fn from_url(url: &str) -> Result<Self, BackendError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| BackendError::InvalidConfiguration(e.to_string()))?;
        let endpoint = format!(
            "{}:{}/{}",
            options.get_host(),
            options.get_port(),
            options.get_database().unwrap_or_default()
        );
        Ok(Self { options, endpoint })
    }

    /// `host:port/database` of the target
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn name(&self) -> &str {
        "postgresql"
    }

    async fn open(&self) -> Result<Box<dyn Connection>, BackendError> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;
        debug!(endpoint = %self.endpoint, "Opened PostgreSQL connection");
        Ok(Box::new(PostgresConnection { conn }))
    }
}

/// A single live PostgreSQL session
struct PostgresConnection {
    conn: PgConnection,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn exec(&mut self, statement: &str) -> Result<(), BackendError> {
        // a bare `&str` carries no arguments and goes out as a simple Query
        self.conn
            .execute(statement)
            .await
            .map(|_| ())
            .map_err(|e| BackendError::StatementFailed(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), BackendError> {
        self.conn
            .close()
            .await
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))
    }
}
