//! Reclamation confirmation for released isolation contexts
//!
//! Teardown is synchronous: once the last strong owner of a context is gone, its
//! store and compiled code are freed. What can delay that is a detached hook call
//! still holding the context. The verifier polls for that with a bounded,
//! backing-off loop and reports the outcome; it never blocks an unload.

use std::any::Any;
use std::sync::Weak;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ReclamationConfig;
use crate::module::traits::ModuleError;

/// Non-owning observation of a released context
pub struct ReclamationObserver {
    context_id: Uuid,
    name: String,
    target: Weak<dyn Any + Send + Sync>,
}

impl ReclamationObserver {
    pub fn new(context_id: Uuid, name: String, target: Weak<dyn Any + Send + Sync>) -> Self {
        Self {
            context_id,
            name,
            target,
        }
    }

    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether nothing keeps the context alive any more
    pub fn is_reclaimed(&self) -> bool {
        self.target.strong_count() == 0
    }
}

/// Best-effort reclamation verifier
#[derive(Debug, Clone)]
pub struct ReclamationVerifier {
    config: ReclamationConfig,
}

impl ReclamationVerifier {
    pub fn new(config: ReclamationConfig) -> Self {
        Self { config }
    }

    /// Poll until the context is unreachable or the attempt budget is spent
    ///
    /// Returns `false` (after logging a warning) when the context is still
    /// reachable; the unload itself is complete either way.
    pub async fn confirm(&self, observer: &ReclamationObserver) -> bool {
        match self.wait(observer).await {
            Ok(attempts) => {
                debug!(
                    context_id = %observer.context_id(),
                    "Context of module {} reclaimed after {} attempt(s)",
                    observer.name(),
                    attempts
                );
                true
            }
            Err(e) => {
                warn!(context_id = %observer.context_id(), "{}", e);
                false
            }
        }
    }

    async fn wait(&self, observer: &ReclamationObserver) -> Result<u32, ModuleError> {
        let mut delay = self.config.initial_delay();

        for attempt in 1..=self.config.max_attempts {
            if observer.is_reclaimed() {
                return Ok(attempt);
            }
            if attempt == self.config.max_attempts {
                break;
            }

            // Let in-flight detached hook calls run to completion
            tokio::task::yield_now().await;
            sleep(delay).await;
            delay = std::cmp::min(
                Duration::from_secs_f64(delay.as_secs_f64() * self.config.backoff_multiplier),
                self.config.max_delay(),
            );
        }

        Err(ModuleError::ReclamationTimeout(observer.name().to_string()))
    }
}
