//! Backend Abstraction Layer
//!
//! シミュレーターから見たデータストアの最小インターフェース。
//! 接続の取得、ステートメント実行、明示的なクローズのみを提供する。

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

/// Errors surfaced by a backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Statement failed: {0}")]
    StatementFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Connection already closed")]
    Closed,
}

/// Source of connection handles
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Open a new dedicated connection
    async fn open(&self) -> Result<Box<dyn Connection>, BackendError>;
}

/// One exclusively-owned connection handle.
///
/// Dropping a handle without calling [`Connection::close`] abandons it to the
/// driver's own cleanup.
#[async_trait]
pub trait Connection: Send {
    /// Run one statement verbatim. Any error from the backend is a failure.
    async fn exec(&mut self, statement: &str) -> Result<(), BackendError>;

    /// Release the connection
    async fn close(self: Box<Self>) -> Result<(), BackendError>;
}
