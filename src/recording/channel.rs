//! Session recording channel.
//!
//! Owns a second, independent local capture (separate device
//! acquisition from the interview audio path), accumulates encoded
//! chunks while the session runs, and on stop finalizes them into one
//! immutable artifact and initiates upload.
//!
//! Upload failure never fails teardown: the artifact stays available
//! locally for a manual download fallback.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::recording::capture::MediaSource;
use crate::recording::upload::RecordingStore;

/// Depth of the chunk channel between the source and the collector.
const CHUNK_QUEUE_DEPTH: usize = 64;

/// The finalized recording, retained until the channel is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingArtifact {
    /// `session_recording_{session_id}.{ext}`
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Accumulates chunks from a [`MediaSource`] and turns them into one
/// uploaded artifact on stop.
pub struct RecordingChannel {
    source: Box<dyn MediaSource>,
    store: RecordingStore,
    session_id: String,
    recording_type: String,
    output_dir: PathBuf,
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    artifact: Arc<Mutex<Option<RecordingArtifact>>>,
    collector: Option<tokio::task::JoinHandle<()>>,
}

impl RecordingChannel {
    pub fn new(
        source: Box<dyn MediaSource>,
        store: RecordingStore,
        session_id: String,
        recording_type: String,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            source,
            store,
            session_id,
            recording_type,
            output_dir,
            chunks: Arc::new(Mutex::new(Vec::new())),
            artifact: Arc::new(Mutex::new(None)),
            collector: None,
        }
    }

    /// Acquire the capture device without starting the encoder. The
    /// room runs this as the preview step before recording begins.
    pub fn open(&mut self) -> Result<(), SessionError> {
        self.source.open()
    }

    /// Start the encoder and begin accumulating chunks.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.collector.is_some() {
            return Err(SessionError::AlreadyActive("recording channel"));
        }
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(CHUNK_QUEUE_DEPTH);
        self.source.start(chunk_tx)?;

        let chunks = Arc::clone(&self.chunks);
        let session_id = self.session_id.clone();
        self.collector = Some(tokio::spawn(async move {
            let mut total_bytes: usize = 0;
            while let Some(chunk) = chunk_rx.recv().await {
                total_bytes += chunk.len();
                chunks.lock().push(chunk);
            }
            tracing::debug!(session_id = %session_id, total_bytes, "chunk collector terminated");
        }));
        tracing::info!(session_id = %self.session_id, "recording started");
        Ok(())
    }

    /// Stop the encoder, finalize the artifact, and attempt upload.
    ///
    /// Total and never failing: each step is independently guarded, a
    /// failed upload is logged, and the artifact (if any) is retained.
    pub async fn stop(&mut self) {
        self.source.stop();

        let Some(collector) = self.collector.take() else {
            tracing::debug!(session_id = %self.session_id, "recording channel already stopped");
            return;
        };
        // The source dropped its sender on stop: the collector drains
        // the tail and exits.
        if collector.await.is_err() {
            tracing::warn!(session_id = %self.session_id, "chunk collector panicked");
        }

        let chunks = std::mem::take(&mut *self.chunks.lock());
        if chunks.is_empty() {
            tracing::warn!(session_id = %self.session_id, "recording produced no chunks, nothing to upload");
            return;
        }

        let artifact = match self.source.finalize(&chunks) {
            Ok(bytes) => RecordingArtifact {
                file_name: format!(
                    "session_recording_{}.{}",
                    self.session_id,
                    self.source.container_ext()
                ),
                bytes,
            },
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "failed to finalize recording");
                return;
            }
        };
        tracing::info!(
            session_id = %self.session_id,
            file_name = %artifact.file_name,
            size = artifact.bytes.len(),
            "recording finalized"
        );
        *self.artifact.lock() = Some(artifact.clone());

        // Keep a copy on disk so the recording survives an upload
        // failure or a backend that loses it.
        let local_path = self.output_dir.join(&artifact.file_name);
        if let Err(e) = std::fs::write(&local_path, &artifact.bytes) {
            tracing::warn!(
                session_id = %self.session_id,
                path = %local_path.display(),
                error = %e,
                "could not write local recording copy"
            );
        }

        match self
            .store
            .upload(
                &self.session_id,
                &self.recording_type,
                &artifact.file_name,
                artifact.bytes,
            )
            .await
        {
            Ok(receipt) => {
                tracing::info!(
                    session_id = %self.session_id,
                    file_path = %receipt.file_path,
                    file_size = receipt.file_size,
                    "recording upload complete"
                );
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "recording upload failed, local artifact retained"
                );
            }
        }
    }

    /// The finalized artifact, if the session produced one.
    pub fn artifact(&self) -> Option<RecordingArtifact> {
        self.artifact.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.collector.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Emits a fixed set of chunks on start; finalize concatenates.
    struct ScriptedSource {
        chunks: Vec<Vec<u8>>,
        stopped: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks,
                stopped: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl MediaSource for ScriptedSource {
        fn container_ext(&self) -> &'static str {
            "bin"
        }
        fn open(&mut self) -> Result<(), SessionError> {
            Ok(())
        }
        fn start(&mut self, chunk_tx: mpsc::Sender<Vec<u8>>) -> Result<(), SessionError> {
            let chunks = self.chunks.clone();
            tokio::spawn(async move {
                for chunk in chunks {
                    if chunk_tx.send(chunk).await.is_err() {
                        break;
                    }
                }
                // sender drops here, ending the collector
            });
            Ok(())
        }
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn finalize(&self, chunks: &[Vec<u8>]) -> Result<Vec<u8>, SessionError> {
            Ok(chunks.concat())
        }
    }

    struct FailingSource;
    impl MediaSource for FailingSource {
        fn container_ext(&self) -> &'static str {
            "bin"
        }
        fn open(&mut self) -> Result<(), SessionError> {
            Err(SessionError::DeviceUnavailable("no camera".to_string()))
        }
        fn start(&mut self, _tx: mpsc::Sender<Vec<u8>>) -> Result<(), SessionError> {
            Err(SessionError::DeviceUnavailable("no camera".to_string()))
        }
        fn stop(&mut self) {}
        fn finalize(&self, _chunks: &[Vec<u8>]) -> Result<Vec<u8>, SessionError> {
            Ok(Vec::new())
        }
    }

    fn channel_in(
        dir: &tempfile::TempDir,
        source: impl MediaSource + 'static,
        uri: String,
        session_id: &str,
    ) -> RecordingChannel {
        RecordingChannel::new(
            Box::new(source),
            RecordingStore::new(uri),
            session_id.to_string(),
            "session".to_string(),
            dir.path().to_path_buf(),
        )
    }

    #[tokio::test]
    async fn stop_finalizes_uploads_and_writes_local_copy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recordings/upload/rec-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "file_path": "/store/rec-1.bin",
                "file_size": 6
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let stopped = Arc::clone(&source.stopped);
        let mut channel = channel_in(&dir, source, server.uri(), "rec-1");
        channel.open().unwrap();
        channel.start().unwrap();
        assert!(channel.is_active());
        channel.stop().await;
        assert!(stopped.load(Ordering::SeqCst));

        let artifact = channel.artifact().unwrap();
        assert_eq!(artifact.file_name, "session_recording_rec-1.bin");
        assert_eq!(artifact.bytes, vec![1, 2, 3, 4, 5, 6]);
        assert!(!channel.is_active());

        let on_disk = std::fs::read(dir.path().join("session_recording_rec-1.bin")).unwrap();
        assert_eq!(on_disk, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn upload_failure_retains_local_artifact() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recordings/upload/rec-2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![vec![7, 8]]);
        let mut channel = channel_in(&dir, source, server.uri(), "rec-2");
        channel.start().unwrap();
        channel.stop().await;

        // Teardown completed despite the failed upload, artifact kept.
        let artifact = channel.artifact().unwrap();
        assert_eq!(artifact.bytes, vec![7, 8]);
        assert!(dir.path().join("session_recording_rec-2.bin").exists());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_safe_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![]);
        let mut channel =
            channel_in(&dir, source, "http://127.0.0.1:9".to_string(), "rec-3");
        channel.stop().await;
        channel.stop().await;
        assert!(channel.artifact().is_none());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![]);
        let mut channel =
            channel_in(&dir, source, "http://127.0.0.1:9".to_string(), "rec-4");
        channel.start().unwrap();
        assert!(matches!(
            channel.start(),
            Err(SessionError::AlreadyActive(_))
        ));
        channel.stop().await;
    }

    #[tokio::test]
    async fn failed_device_acquisition_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut channel =
            channel_in(&dir, FailingSource, "http://127.0.0.1:9".to_string(), "rec-5");
        assert!(matches!(
            channel.open(),
            Err(SessionError::DeviceUnavailable(_))
        ));
        assert!(matches!(
            channel.start(),
            Err(SessionError::DeviceUnavailable(_))
        ));
        // teardown still safe
        channel.stop().await;
    }
}
