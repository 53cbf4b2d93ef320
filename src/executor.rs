//! Operation executor
//!
//! Runs one statement and checks its outcome against what the caller
//! declared. A matching failure is a normal result; only a mismatch is fatal.

use tracing::trace;

use crate::backend::Connection;
use crate::error::Anomaly;

/// Outcome of a statement whose result matched expectations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    FailedAsExpected,
}

/// Execute `statement` exactly once on `conn`.
pub async fn execute(
    conn: &mut dyn Connection,
    statement: &str,
    expect_failure: bool,
) -> Result<Outcome, Anomaly> {
    match (conn.exec(statement).await, expect_failure) {
        (Ok(()), false) => Ok(Outcome::Succeeded),
        (Err(e), true) => {
            trace!(statement, error = %e, "Statement failed as expected");
            Ok(Outcome::FailedAsExpected)
        }
        (Ok(()), true) => Err(Anomaly::ExpectationMismatch {
            statement: statement.to_string(),
            expected_failure: true,
            cause: None,
        }),
        (Err(e), false) => Err(Anomaly::ExpectationMismatch {
            statement: statement.to_string(),
            expected_failure: false,
            cause: Some(e),
        }),
    }
}
