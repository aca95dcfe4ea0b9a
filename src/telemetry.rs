use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{RelayError, Result};

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|err| RelayError::Config(format!("invalid log filter: {err}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.map_err(|err| RelayError::Config(format!("failed to install tracing subscriber: {err}")))
}

/// Retry schedule for calls to external collaborators. The runner never applies
/// it on its own; see [`RetryingModel`](crate::RetryingModel).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn default_external_call() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(200),
        }
    }

    /// Call `f` until it succeeds or `max_retries` retries have failed. The
    /// wait grows linearly with the attempt number.
    pub async fn retry<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_retries => return Err(err),
                Err(err) => {
                    warn!(attempt, error = %err, "call failed, retrying");
                    sleep(self.backoff * (attempt + 1)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(1),
        };

        let calls = Arc::new(Mutex::new(0u32));
        let res = policy
            .retry(|_: u32| {
                let calls = calls.clone();
                async move {
                    let mut guard = calls.lock().await;
                    *guard += 1;
                    if *guard < 2 {
                        Err(RelayError::ModelCapability("fail".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(*calls.lock().await, 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(1),
        };
        let mut attempts = Vec::new();
        let res: Result<()> = policy
            .retry(|attempt| {
                attempts.push(attempt);
                async { Err(RelayError::ModelCapability("down".into())) }
            })
            .await;

        assert!(matches!(res, Err(RelayError::ModelCapability(_))));
        assert_eq!(attempts, vec![0, 1]);
    }
}
