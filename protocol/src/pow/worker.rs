//! Proof-of-work searches off the caller's thread.
//!
//! A search can take minutes on mainnet difficulty. [`PowWorker`] runs it
//! on a dedicated OS thread with a cancel handle and a progress channel;
//! [`mine_async`] is the same thing for async callers, on tokio's blocking
//! pool.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::{CancelToken, DifficultyParams, PowError, PowProgress, PowStrategy, ProofOfWork, SearchControl};

/// A running search on its own thread.
pub struct PowWorker {
    handle: JoinHandle<Result<ProofOfWork, PowError>>,
    cancel: CancelToken,
    progress: Receiver<PowProgress>,
}

impl PowWorker {
    /// Start searching for a proof for `name` owned by `owner_key`.
    pub fn spawn(
        strategy: Arc<dyn PowStrategy>,
        name: String,
        owner_key: Vec<u8>,
        params: DifficultyParams,
        start_nonce: u128,
    ) -> Result<Self, PowError> {
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let control = SearchControl {
            cancel: cancel.clone(),
            start_nonce,
            timestamp_ms: None,
            progress: Some(tx),
        };

        let handle = std::thread::Builder::new()
            .name(format!("pow-{name}"))
            .spawn(move || strategy.generate(&name, &owner_key, &params, &control))
            .map_err(|e| PowError::Worker(e.to_string()))?;

        Ok(Self {
            handle,
            cancel,
            progress: rx,
        })
    }

    /// Handle for cancelling from elsewhere (a Ctrl-C handler, say).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> &Receiver<PowProgress> {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the search ends.
    pub fn join(self) -> Result<ProofOfWork, PowError> {
        self.handle
            .join()
            .map_err(|_| PowError::Worker("search thread panicked".into()))?
    }
}

/// Run a search on tokio's blocking pool.
///
/// Cancelling `control.cancel` stops the search; dropping the returned
/// future does not.
pub async fn mine_async(
    strategy: Arc<dyn PowStrategy>,
    name: String,
    owner_key: Vec<u8>,
    params: DifficultyParams,
    control: SearchControl,
) -> Result<ProofOfWork, PowError> {
    tokio::task::spawn_blocking(move || strategy.generate(&name, &owner_key, &params, &control))
        .await
        .map_err(|e| PowError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::unix_millis;
    use crate::pow::FixedCostPow;

    fn impossible() -> DifficultyParams {
        DifficultyParams::Fixed {
            leading_zero_nibbles: 64,
        }
    }

    #[test]
    fn worker_finds_easy_proof() {
        let params = DifficultyParams::Fixed {
            leading_zero_nibbles: 2,
        };
        let worker = PowWorker::spawn(
            Arc::new(FixedCostPow),
            "worker-name".into(),
            vec![1u8; 32],
            params,
            0,
        )
        .unwrap();
        let proof = worker.join().unwrap();
        assert!(FixedCostPow.is_valid("worker-name", &[1u8; 32], &proof, unix_millis()));
    }

    #[test]
    fn worker_cancels_after_progress() {
        let worker = PowWorker::spawn(
            Arc::new(FixedCostPow),
            "worker-name".into(),
            vec![1u8; 32],
            impossible(),
            0,
        )
        .unwrap();
        let report = worker
            .progress()
            .recv_timeout(std::time::Duration::from_secs(60))
            .unwrap();
        assert!(report.attempts > 0);
        worker.cancel();
        assert_eq!(worker.join(), Err(PowError::Cancelled));
    }

    #[tokio::test]
    async fn mine_async_respects_cancel() {
        let cancel = CancelToken::new();
        let control = SearchControl::with_cancel(cancel.clone());
        let task = tokio::spawn(mine_async(
            Arc::new(FixedCostPow),
            "async-name".into(),
            vec![2u8; 32],
            impossible(),
            control,
        ));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), Err(PowError::Cancelled));
    }
}
