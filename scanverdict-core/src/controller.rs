//! Upload Controller - one command channel, many entry points.
//!
//! Every UI entry point that can start an upload holds a cloned
//! `UploadHandle`. Commands funnel into a single driver task which runs each
//! submission on the blocking pool, so a slow upload never holds up the next.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::calibrate::Verdict;
use crate::media::UploadFile;
use crate::pipeline::{ErrorKind, INTERNAL_FAILURE_MESSAGE};
use crate::submitter::{CancelToken, Rejection, Submitter};

pub type SubmitOutcome = Result<Verdict, Rejection>;

#[derive(Debug)]
pub enum UploadCommand {
    Submit {
        file: UploadFile,
        cancel: CancelToken,
        reply: oneshot::Sender<SubmitOutcome>,
    },
    /// Abandon every submission still in flight.
    CancelAll,
}

#[derive(Debug, Clone)]
pub struct UploadHandle {
    tx: mpsc::Sender<UploadCommand>,
}

impl UploadHandle {
    pub async fn submit(&self, file: UploadFile) -> SubmitOutcome {
        self.submit_cancellable(file, CancelToken::new()).await
    }

    /// Submit with a token the caller keeps. Cancelling it abandons this
    /// upload only; other entry points are unaffected.
    pub async fn submit_cancellable(&self, file: UploadFile, cancel: CancelToken) -> SubmitOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(UploadCommand::Submit { file, cancel, reply }).await.is_err() {
            return Err(controller_stopped());
        }
        rx.await.unwrap_or_else(|_| Err(controller_stopped()))
    }

    pub async fn cancel_all(&self) {
        let _ = self.tx.send(UploadCommand::CancelAll).await;
    }
}

fn controller_stopped() -> Rejection {
    Rejection::new(ErrorKind::InternalError, INTERNAL_FAILURE_MESSAGE)
}

struct InFlight {
    cancel: CancelToken,
    task: JoinHandle<()>,
}

pub struct UploadController {
    submitter: Arc<Submitter>,
    rx: mpsc::Receiver<UploadCommand>,
    in_flight: Vec<InFlight>,
}

impl UploadController {
    /// Start the driver task. It stops once every handle is dropped.
    pub fn spawn(submitter: Submitter, capacity: usize) -> (UploadHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let controller = UploadController {
            submitter: Arc::new(submitter),
            rx,
            in_flight: Vec::new(),
        };
        let driver = tokio::spawn(controller.run());
        (UploadHandle { tx }, driver)
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            self.in_flight.retain(|f| !f.task.is_finished());
            match command {
                UploadCommand::Submit { file, cancel, reply } => self.start(file, cancel, reply),
                UploadCommand::CancelAll => {
                    info!(count = self.in_flight.len(), "Cancelling in-flight uploads");
                    for flight in self.in_flight.drain(..) {
                        flight.cancel.cancel();
                    }
                }
            }
        }
        debug!("Upload controller stopped");
    }

    fn start(&mut self, file: UploadFile, cancel: CancelToken, reply: oneshot::Sender<SubmitOutcome>) {
        let token = cancel.clone();
        let submitter = Arc::clone(&self.submitter);

        let task = tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || submitter.submit(file, &token))
                .await
                .unwrap_or_else(|_| Err(controller_stopped()));
            // Caller may have gone away; dropping the outcome is fine.
            let _ = reply.send(outcome);
        });

        self.in_flight.push(InFlight { cancel, task });
    }
}
