//! Timeouts por llamada y reintentos acotados para las llamadas remotas
//! (grafo y modelos). Sólo se reintentan los fallos transitorios.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::config::AppConfig;
use crate::error::{GraphError, ModelError, Transient};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub call_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            call_timeout: cfg.call_timeout,
            max_retries: cfg.max_retries,
            initial_backoff: cfg.retry_backoff,
        }
    }

    /// Sin reintentos, útil en tests.
    pub fn once(call_timeout: Duration) -> Self {
        Self {
            call_timeout,
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Errores que pueden representar un timeout vencido.
pub trait TimedOut {
    fn timed_out(operation: &str, after: Duration) -> Self;
}

impl TimedOut for GraphError {
    fn timed_out(operation: &str, after: Duration) -> Self {
        GraphError::Transient(format!("{operation}: timeout tras {after:?}"))
    }
}

impl TimedOut for ModelError {
    fn timed_out(operation: &str, after: Duration) -> Self {
        ModelError::Transient(format!("{operation}: timeout tras {after:?}"))
    }
}

/// Ejecuta `op` con timeout; si falla de forma transitoria reintenta con
/// backoff exponencial hasta `max_retries` veces.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    E: Transient + TimedOut + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        let outcome = match timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(operation, policy.call_timeout)),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let wait = policy.backoff_for(attempt);
                warn!(
                    "{operation}: fallo transitorio ({err}); reintento {attempt}/{} en {wait:?}",
                    policy.max_retries
                );
                sleep(wait).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            call_timeout: Duration::from_millis(200),
            max_retries,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, GraphError> = with_retry(&fast_policy(3), "prueba", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(GraphError::Transient("connection reset".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn semantic_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), GraphError> = with_retry(&fast_policy(3), "prueba", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GraphError::Rejected("SyntaxError".into()))
        })
        .await;
        assert!(matches!(result, Err(GraphError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), ModelError> = with_retry(&fast_policy(2), "prueba", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ModelError::Transient("503".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn hanging_calls_time_out() {
        let policy = RetryPolicy::once(Duration::from_millis(20));
        let result: Result<(), ModelError> = with_retry(&policy, "colgada", || async {
            sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_secs(1),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
    }
}
