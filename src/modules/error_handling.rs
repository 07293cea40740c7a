//! Error taxonomy for meme-sentinel.
//!
//! Worker loops recover from every per-iteration failure on their own; only
//! the engine-level start/stop operations and the CRUD service surface these
//! errors to their direct caller.

use thiserror::Error;

/// Typed failures surfaced by the store, the service layer and the engine.
#[derive(Error, Debug)]
pub enum SentinelError {
    /// Rejected before any state change (bad percentage, threshold,
    /// interval, unknown kind, duplicate nickname, ...).
    #[error("{0}")]
    Validation(String),

    /// Missing monitor / private key by id.
    #[error("{0}")]
    NotFound(String),

    /// Market data null, quote 5xx, swap send timeout. Retried locally where
    /// a retry policy is defined, otherwise observed again next tick.
    #[error("远程服务暂时不可用: {0}")]
    TransientRemote(String),

    /// Quote returned an error body, or the swap failed terminally. Carries
    /// the on-chain program logs when the RPC error text contained any.
    #[error("交易失败: {message}")]
    Trade {
        message: String,
        program_logs: Vec<String>,
    },

    /// Underlying storage failure. Log appends are swallowed by their
    /// callers; every other mutation propagates.
    #[error("存储错误: {0}")]
    Storage(#[from] sqlx::Error),
}

pub type SentinelResult<T> = Result<T, SentinelError>;

/// Maps constraint violations to `Validation`, everything else to `Storage`.
pub fn map_db_err(e: sqlx::Error) -> SentinelError {
    if let sqlx::Error::Database(ref dbe) = e {
        match dbe.kind() {
            sqlx::error::ErrorKind::UniqueViolation => {
                return SentinelError::Validation(format!("唯一约束冲突: {}", dbe.message()));
            }
            sqlx::error::ErrorKind::ForeignKeyViolation => {
                return SentinelError::Validation(format!("外键约束冲突: {}", dbe.message()));
            }
            _ => {}
        }
    }
    SentinelError::Storage(e)
}

/// Extracts the right-hand side of every `Program log:` line from an RPC
/// error string. The upstream error surface is plain text, so this stays a
/// text parser; keep every caller going through here.
pub fn extract_program_logs(err_str: &str) -> Vec<String> {
    err_str
        .lines()
        .filter_map(|line| {
            line.split_once("Program log:")
                .map(|(_, rest)| rest.trim().to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_program_logs_from_rpc_error_text() {
        let err = "Transaction simulation failed: Error processing Instruction 2\n\
                   Program log: Instruction: Swap\n\
                   some unrelated line\n\
                   Program log: Error: insufficient funds\n";
        let logs = extract_program_logs(err);
        assert_eq!(
            logs,
            vec![
                "Instruction: Swap".to_string(),
                "Error: insufficient funds".to_string()
            ]
        );
    }

    #[test]
    fn no_program_logs_yields_empty_vec() {
        assert!(extract_program_logs("connection refused").is_empty());
    }
}
