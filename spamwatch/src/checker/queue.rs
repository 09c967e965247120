//! Fire-and-forget check submission.
//!
//! Requests go into a bounded channel drained by a fixed set of workers. Submitting never
//! waits; a full queue rejects the request.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::CheckService;
use crate::{Error, Result};

/// Work accepted by the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckRequest {
    One { phone_id: String },
    All,
}

/// Bounded worker pool running checks in the background.
pub struct CheckQueue {
    tx: mpsc::Sender<CheckRequest>,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl CheckQueue {
    /// Spawn `workers` tasks consuming a queue of `capacity` requests.
    pub fn start(
        service: Arc<CheckService>,
        workers: usize,
        capacity: usize,
        cancellation_token: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let mut join_set = JoinSet::new();

        info!("Starting check queue with {} workers", workers);
        for i in 0..workers {
            let service = service.clone();
            let rx = rx.clone();
            let token = cancellation_token.clone();

            join_set.spawn(async move {
                debug!("Check worker {} started", i);
                loop {
                    let request = tokio::select! {
                        _ = token.cancelled() => break,
                        request = async { rx.lock().await.recv().await } => request,
                    };
                    let Some(request) = request else { break };
                    run_request(&service, request).await;
                }
                debug!("Check worker {} stopped", i);
            });
        }

        Self {
            tx,
            tasks: parking_lot::Mutex::new(Some(join_set)),
        }
    }

    pub fn submit_one(&self, phone_id: impl Into<String>) -> Result<()> {
        let phone_id = phone_id.into();
        self.submit(CheckRequest::One { phone_id })
    }

    pub fn submit_all(&self) -> Result<()> {
        self.submit(CheckRequest::All)
    }

    fn submit(&self, request: CheckRequest) -> Result<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(request) => {
                Error::busy("check_queue", format!("{:?}", request))
            }
            mpsc::error::TrySendError::Closed(_) => {
                Error::Other("check queue is not running".to_string())
            }
        })
    }

    /// Wait for workers to exit; they stop once the cancellation token fires.
    pub async fn join(&self) {
        let join_set = self.tasks.lock().take();
        if let Some(mut join_set) = join_set {
            while let Some(result) = join_set.join_next().await {
                if let Err(e) = result {
                    warn!("Check worker panicked: {}", e);
                }
            }
        }
    }
}

async fn run_request(service: &CheckService, request: CheckRequest) {
    match request {
        CheckRequest::One { phone_id } => match service.check_one(&phone_id).await {
            Ok(outcome) => debug!(
                phone_id = %phone_id,
                succeeded = outcome.succeeded(),
                spam = outcome.is_spam(),
                "Background check finished"
            ),
            Err(e) => warn!(phone_id = %phone_id, error = %e, "Background check failed"),
        },
        CheckRequest::All => {
            if let Err(e) = service.check_all().await {
                warn!(error = %e, "Background check-all failed");
            }
        }
    }
}
