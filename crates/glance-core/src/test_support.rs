//! Scripted inference doubles shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::error::SummarizeError;
use crate::gateway::{
    Availability, BackendKind, ChunkStream, InferenceBackend, InferenceSession,
};

/// A backend that replays a fixed accumulated-text chunk sequence.
pub struct ScriptedBackend {
    kind: BackendKind,
    availability: Mutex<Availability>,
    chunks: Vec<String>,
    chunk_delay: Duration,
    /// After the scripted chunks, keep the stream open until destroyed.
    stall: bool,
    sessions: Mutex<Vec<Arc<ScriptedSession>>>,
}

impl ScriptedBackend {
    fn new(kind: BackendKind, chunks: &[&str], stall: bool) -> Arc<Self> {
        Arc::new(Self {
            kind,
            availability: Mutex::new(Availability::Available),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            chunk_delay: Duration::ZERO,
            stall,
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn extractive(chunks: &[&str]) -> Arc<Self> {
        Self::new(BackendKind::Extractive, chunks, false)
    }

    pub fn generative(chunks: &[&str]) -> Arc<Self> {
        Self::new(BackendKind::Generative, chunks, false)
    }

    /// Emits its chunks, then holds the stream open until the session is
    /// destroyed. For abort/supersession tests.
    pub fn stalling(chunks: &[&str]) -> Arc<Self> {
        Self::new(BackendKind::Extractive, chunks, true)
    }

    pub fn set_availability(&self, availability: Availability) {
        *self.availability.lock().unwrap() = availability;
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn last_session(&self) -> Option<Arc<ScriptedSession>> {
        self.sessions.lock().unwrap().last().cloned()
    }

    pub fn last_input(&self) -> Option<String> {
        self.last_session()?.inputs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn availability(&self) -> Availability {
        *self.availability.lock().unwrap()
    }

    async fn create_session(&self) -> Result<Arc<dyn InferenceSession>, SummarizeError> {
        let session = Arc::new(ScriptedSession {
            chunks: self.chunks.clone(),
            chunk_delay: self.chunk_delay,
            stall: self.stall,
            destroyed: CancellationToken::new(),
            destroy_count: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        });
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

pub struct ScriptedSession {
    chunks: Vec<String>,
    chunk_delay: Duration,
    stall: bool,
    destroyed: CancellationToken,
    pub destroy_count: AtomicUsize,
    pub inputs: Mutex<Vec<String>>,
}

impl ScriptedSession {
    /// A detached session for tests that only exercise attach/teardown.
    pub fn idle() -> Arc<Self> {
        Arc::new(Self {
            chunks: Vec::new(),
            chunk_delay: Duration::ZERO,
            stall: false,
            destroyed: CancellationToken::new(),
            destroy_count: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.is_cancelled()
    }
}

#[async_trait]
impl InferenceSession for ScriptedSession {
    async fn run_streaming(&self, input: &str) -> Result<ChunkStream, SummarizeError> {
        if self.destroyed.is_cancelled() {
            return Err(SummarizeError::Aborted);
        }
        self.inputs.lock().unwrap().push(input.to_string());

        let chunks = self.chunks.clone();
        let delay = self.chunk_delay;
        let stall = self.stall;
        let destroyed = self.destroyed.clone();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = destroyed.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                let sent = tokio::select! {
                    _ = destroyed.cancelled() => return,
                    sent = tx.send(Ok(chunk)) => sent,
                };
                if sent.is_err() {
                    return;
                }
                tokio::task::yield_now().await;
            }
            if stall {
                destroyed.cancelled().await;
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    fn destroy(&self) {
        self.destroy_count.fetch_add(1, Ordering::SeqCst);
        self.destroyed.cancel();
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.is_cancelled()
    }
}
