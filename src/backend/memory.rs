//! In-process backend
//!
//! ネットワークを使わずにシミュレーター全体を動かすためのバックエンド。
//! `--dry-run` とテストで使用し、接続の取得・クローズ・破棄の回数を記録する。

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Backend, BackendError, Connection};

#[derive(Debug, Default)]
struct MemoryState {
    failing: HashSet<String>,
    latency: Duration,
    refuse_connections: AtomicBool,
    opened: AtomicU64,
    closed: AtomicU64,
    abandoned: AtomicU64,
    executions: Mutex<HashMap<String, u64>>,
}

/// Backend whose statements succeed unless registered as failing
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `statement` fail every time it is executed.
    ///
    /// Must be called before the backend is shared.
    pub fn with_failing_statement(mut self, statement: impl Into<String>) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.failing.insert(statement.into());
        }
        self
    }

    /// Delay every statement by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        if let Some(state) = Arc::get_mut(&mut self.state) {
            state.latency = latency;
        }
        self
    }

    /// Toggle whether `open` fails
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.state.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Connections handed out so far
    pub fn opened(&self) -> u64 {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Connections released through `close`
    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Connections dropped without `close`
    pub fn abandoned(&self) -> u64 {
        self.state.abandoned.load(Ordering::SeqCst)
    }

    /// How many times `statement` was executed, successful or not
    pub fn executions(&self, statement: &str) -> u64 {
        self.state
            .executions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(statement)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self) -> Result<Box<dyn Connection>, BackendError> {
        if self.state.refuse_connections.load(Ordering::SeqCst) {
            return Err(BackendError::ConnectionFailed(
                "memory backend is refusing connections".to_string(),
            ));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MemoryConnection {
    state: Arc<MemoryState>,
    closed: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn exec(&mut self, statement: &str) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        if !self.state.latency.is_zero() {
            tokio::time::sleep(self.state.latency).await;
        }

        *self
            .state
            .executions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(statement.to_string())
            .or_insert(0) += 1;

        if self.state.failing.contains(statement) {
            Err(BackendError::StatementFailed(format!(
                "injected failure for `{}`",
                statement
            )))
        } else {
            Ok(())
        }
    }

    async fn close(self: Box<Self>) -> Result<(), BackendError> {
        let mut this = self;
        this.closed = true;
        this.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.state.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_statement_fails() {
        let backend = MemoryBackend::new().with_failing_statement("boom;");
        let mut conn = backend.open().await.unwrap();

        assert!(conn.exec("select 1;").await.is_ok());
        assert_eq!(
            conn.exec("boom;").await,
            Err(BackendError::StatementFailed(
                "injected failure for `boom;`".to_string()
            ))
        );
        assert_eq!(backend.executions("boom;"), 1);
        assert_eq!(backend.executions("select 1;"), 1);
    }

    #[tokio::test]
    async fn test_close_and_abandon_are_counted_separately() {
        let backend = MemoryBackend::new();

        let first = backend.open().await.unwrap();
        first.close().await.unwrap();

        let second = backend.open().await.unwrap();
        drop(second);

        assert_eq!(backend.opened(), 2);
        assert_eq!(backend.closed(), 1);
        assert_eq!(backend.abandoned(), 1);
    }

    #[tokio::test]
    async fn test_refusing_connections() {
        let backend = MemoryBackend::new();
        backend.set_refuse_connections(true);
        assert!(matches!(
            backend.open().await,
            Err(BackendError::ConnectionFailed(_))
        ));
        assert_eq!(backend.opened(), 0);

        backend.set_refuse_connections(false);
        assert!(backend.open().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_statements() {
        let backend = MemoryBackend::new().with_latency(Duration::from_millis(20));
        let mut conn = backend.open().await.unwrap();

        let started = tokio::time::Instant::now();
        conn.exec("select 1;").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
