//! Ordered background persistence.
//!
//! State transitions enqueue writes and move on; a single task applies them
//! to the [`CredentialStore`] in submission order on the blocking pool.

use appauth_keyring_store::StoreError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::CredentialStore;
use crate::error::{AuthError, Result};
use crate::state::AuthState;

enum WriteOp {
    Save(Zeroizing<String>),
    Clear,
    Flush(oneshot::Sender<Result<()>>),
}

impl std::fmt::Debug for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOp::Save(_) => f.write_str("Save([REDACTED])"),
            WriteOp::Clear => f.write_str("Clear"),
            WriteOp::Flush(_) => f.write_str("Flush"),
        }
    }
}

/// Handle to the background writer. Dropping it lets the task drain the
/// queue and exit.
#[derive(Debug, Clone)]
pub struct CredentialWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl CredentialWriter {
    /// Spawn the writer task on the current tokio runtime.
    pub fn spawn(store: CredentialStore) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, rx));
        Self { tx }
    }

    /// Queue a save of `state`. Serialization happens here, so the queued
    /// value is a snapshot.
    pub fn save(&self, state: &AuthState) -> Result<()> {
        let text = Zeroizing::new(state.json_serialize_string()?);
        self.send(WriteOp::Save(text))
    }

    /// Queue removal of the persisted state.
    pub fn clear(&self) -> Result<()> {
        self.send(WriteOp::Clear)
    }

    /// Wait until every write queued so far has been applied.
    ///
    /// Returns the first failure since the previous flush, if any.
    pub async fn flush(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.send(WriteOp::Flush(reply))?;
        done.await.map_err(|_| writer_stopped())?
    }

    fn send(&self, op: WriteOp) -> Result<()> {
        self.tx.send(op).map_err(|_| writer_stopped())
    }
}

fn writer_stopped() -> AuthError {
    AuthError::Storage(StoreError::Internal("credential writer stopped".to_string()))
}

async fn run(store: CredentialStore, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    let mut first_error: Option<AuthError> = None;

    while let Some(op) = rx.recv().await {
        let store = store.clone();
        let result = match op {
            WriteOp::Save(text) => {
                tokio::task::spawn_blocking(move || store.save_serialized(&text)).await
            }
            WriteOp::Clear => tokio::task::spawn_blocking(move || store.clear()).await,
            WriteOp::Flush(reply) => {
                let _ = reply.send(first_error.take().map_or(Ok(()), Err));
                continue;
            }
        };

        let result = result.unwrap_or_else(|e| {
            Err(AuthError::Storage(StoreError::Internal(format!(
                "spawn_blocking failed: {e}"
            ))))
        });
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist auth state");
            first_error.get_or_insert(e);
        }
    }

    debug!("Credential writer stopped");
}
