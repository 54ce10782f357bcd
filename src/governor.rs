//! Concurrency permits for generation and verification work.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};

/// Two independent counting semaphores: one bounding full generation
/// runs, one bounding standalone verifications. Waits are cancellable;
/// permits release on drop so every exit path gives them back.
pub struct ConcurrencyGovernor {
    generation: Arc<Semaphore>,
    verification: Arc<Semaphore>,
}

impl ConcurrencyGovernor {
    pub fn new(generation_permits: usize, verification_permits: usize) -> Self {
        Self {
            generation: Arc::new(Semaphore::new(generation_permits)),
            verification: Arc::new(Semaphore::new(verification_permits)),
        }
    }

    pub async fn acquire_generation(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        Self::acquire(&self.generation, cancel).await
    }

    pub async fn acquire_verification(
        &self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        Self::acquire(&self.verification, cancel).await
    }

    async fn acquire(
        semaphore: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            permit = semaphore.clone().acquire_owned() => {
                permit.map_err(|_| OrchestratorError::Internal("governor closed".to_string()))
            }
        }
    }

    pub fn available_generation_permits(&self) -> usize {
        self.generation.available_permits()
    }

    pub fn available_verification_permits(&self) -> usize {
        self.verification.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permits_bound_concurrency() {
        let governor = ConcurrencyGovernor::new(2, 1);
        let cancel = CancellationToken::new();

        let p1 = governor.acquire_generation(&cancel).await.unwrap();
        let _p2 = governor.acquire_generation(&cancel).await.unwrap();
        assert_eq!(governor.available_generation_permits(), 0);

        // Third acquire blocks until a permit is released.
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            governor.acquire_generation(&cancel),
        )
        .await;
        assert!(blocked.is_err());

        drop(p1);
        let _p3 = governor.acquire_generation(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_wait_returns_cancelled() {
        let governor = ConcurrencyGovernor::new(1, 1);
        let cancel = CancellationToken::new();
        let _held = governor.acquire_generation(&cancel).await.unwrap();

        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let governor = ConcurrencyGovernor::new(0, 0);
                governor.acquire_generation(&cancel).await
            })
        };
        cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "cancelled");
    }

    #[tokio::test]
    async fn pools_are_independent() {
        let governor = ConcurrencyGovernor::new(1, 1);
        let cancel = CancellationToken::new();
        let _generation = governor.acquire_generation(&cancel).await.unwrap();
        // Verification permits are unaffected by generation load.
        let _verification = governor.acquire_verification(&cancel).await.unwrap();
        assert_eq!(governor.available_verification_permits(), 0);
        assert_eq!(governor.available_generation_permits(), 0);
    }
}
