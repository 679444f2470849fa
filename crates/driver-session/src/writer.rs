//! Background writer that keeps history persistence off the chat path.

use std::sync::Arc;

use driver_core::ChatTranscript;
use tokio::sync::{mpsc, oneshot};

use crate::error::StorageError;
use crate::history::{ChatHistory, Identity};

enum WriteRequest {
    Save {
        identity: Option<Identity>,
        transcript: Box<ChatTranscript>,
    },
    Delete {
        identity: Option<Identity>,
        id: String,
    },
    Clear {
        identity: Option<Identity>,
    },
    Flush(oneshot::Sender<()>),
}

/// Queues history writes and applies them one at a time, in order, on a
/// single task. The last save for an id is therefore the one that sticks.
#[derive(Clone)]
pub struct HistoryWriter {
    tx: mpsc::UnboundedSender<WriteRequest>,
    history: Arc<ChatHistory>,
}

impl HistoryWriter {
    /// Starts the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(history: Arc<ChatHistory>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = history.clone();

        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                match request {
                    WriteRequest::Save {
                        identity,
                        transcript,
                    } => {
                        if let Err(e) = worker.save(identity.as_ref(), &transcript).await {
                            log::warn!("[{}] Failed to save chat history: {}", transcript.id, e);
                        }
                    }
                    WriteRequest::Delete { identity, id } => {
                        if let Err(e) = worker.delete(identity.as_ref(), &id).await {
                            log::warn!("[{}] Failed to delete chat history: {}", id, e);
                        }
                    }
                    WriteRequest::Clear { identity } => {
                        if let Err(e) = worker.clear(identity.as_ref()).await {
                            log::warn!("Failed to clear chat history: {}", e);
                        }
                    }
                    WriteRequest::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            log::debug!("History writer stopped");
        });

        Self { tx, history }
    }

    pub fn history(&self) -> &Arc<ChatHistory> {
        &self.history
    }

    /// Enqueues a save and returns immediately.
    pub fn save(&self, identity: Option<Identity>, transcript: ChatTranscript) {
        if identity.is_none() {
            return;
        }
        self.send(WriteRequest::Save {
            identity,
            transcript: Box::new(transcript),
        });
    }

    pub fn delete(&self, identity: Option<Identity>, id: impl Into<String>) {
        self.send(WriteRequest::Delete {
            identity,
            id: id.into(),
        });
    }

    pub fn clear(&self, identity: Option<Identity>) {
        self.send(WriteRequest::Clear { identity });
    }

    /// Waits until every write queued before this call has been applied.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriteRequest::Flush(done_tx))
            .map_err(|_| StorageError::WriterClosed)?;
        done_rx.await.map_err(|_| StorageError::WriterClosed)
    }

    fn send(&self, request: WriteRequest) {
        if self.tx.send(request).is_err() {
            log::warn!("History writer is closed; dropping write");
        }
    }
}
