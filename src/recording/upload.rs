//! HTTP transfer of finished session recordings.
//!
//! Upload is a single multipart POST; failure is reported to the
//! caller, never retried here, and never blocks teardown. Download is
//! the server-side fallback for retrieving a past recording.

use serde::Deserialize;

use crate::error::SessionError;

/// Backend receipt for a stored recording.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UploadReceipt {
    pub file_path: String,
    pub file_size: u64,
}

/// Client for the recording endpoints of one deployment.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    client: reqwest::Client,
    http_base_url: String,
}

impl RecordingStore {
    pub fn new(http_base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            http_base_url,
        }
    }

    /// `POST /recordings/upload/{session_id}` with form fields
    /// `recording` (the artifact) and `recording_type`.
    pub async fn upload(
        &self,
        session_id: &str,
        recording_type: &str,
        file_name: &str,
        artifact: Vec<u8>,
    ) -> Result<UploadReceipt, SessionError> {
        let url = format!(
            "{}/recordings/upload/{session_id}",
            self.http_base_url.trim_end_matches('/')
        );
        let size = artifact.len();
        tracing::info!(session_id, %url, size, "uploading session recording");

        let form = reqwest::multipart::Form::new()
            .part(
                "recording",
                reqwest::multipart::Part::bytes(artifact).file_name(file_name.to_string()),
            )
            .text("recording_type", recording_type.to_string());

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SessionError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Upload(format!("status {status}: {body}")));
        }

        let receipt: UploadReceipt = response
            .json()
            .await
            .map_err(|e| SessionError::Upload(format!("bad receipt: {e}")))?;
        tracing::info!(
            session_id,
            file_path = %receipt.file_path,
            file_size = receipt.file_size,
            "recording uploaded"
        );
        Ok(receipt)
    }

    /// `GET /recordings/{session_id}/download`, returning the raw media
    /// bytes. Callers fall back to the local artifact when this fails.
    pub async fn download(&self, session_id: &str) -> Result<Vec<u8>, SessionError> {
        let url = format!(
            "{}/recordings/{session_id}/download",
            self.http_base_url.trim_end_matches('/')
        );
        tracing::info!(session_id, %url, "downloading session recording");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Transport(format!("download status {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn upload_posts_multipart_and_parses_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recordings/upload/sess-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "file_path": "/store/sess-42.wav",
                "file_size": 1234
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = RecordingStore::new(server.uri());
        let receipt = store
            .upload("sess-42", "session", "session_recording_sess-42.wav", vec![1, 2, 3])
            .await
            .unwrap();

        assert_eq!(receipt.file_path, "/store/sess-42.wav");
        assert_eq!(receipt.file_size, 1234);

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body).to_string();
        // Multipart body: both form fields present, artifact under its
        // generated filename.
        assert!(body.contains("name=\"recording\""));
        assert!(body.contains("session_recording_sess-42.wav"));
        assert!(body.contains("name=\"recording_type\""));
        assert!(body.contains("session"));
    }

    #[tokio::test]
    async fn upload_failure_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recordings/upload/sess-1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
            .mount(&server)
            .await;

        let store = RecordingStore::new(server.uri());
        let err = store
            .upload("sess-1", "session", "a.wav", vec![0])
            .await
            .unwrap_err();
        match err {
            SessionError::Upload(msg) => {
                assert!(msg.contains("500"));
                assert!(msg.contains("disk full"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_unreachable_host_is_an_upload_error() {
        let store = RecordingStore::new("http://127.0.0.1:9".to_string());
        let err = store
            .upload("sess-x", "session", "a.wav", vec![0])
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Upload(_)));
    }

    #[tokio::test]
    async fn download_returns_raw_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recordings/sess-7/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8, 8, 7]))
            .mount(&server)
            .await;

        let store = RecordingStore::new(server.uri());
        assert_eq!(store.download("sess-7").await.unwrap(), vec![9, 8, 7]);
    }

    #[tokio::test]
    async fn download_404_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recordings/missing/download"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let store = RecordingStore::new(server.uri());
        assert!(matches!(
            store.download("missing").await,
            Err(SessionError::Transport(_))
        ));
    }
}
