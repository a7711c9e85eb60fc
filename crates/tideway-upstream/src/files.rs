// SPDX-FileCopyrightText: 2026 Tideway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! File upload against the vendor upload endpoint.
//!
//! Client requests carry files as base64 payloads; the decoded bytes are
//! posted as multipart form data and the returned descriptor is carried as
//! an attachment on the next completion.

use std::time::Duration;

use base64::Engine;
use tideway_core::types::RequestFile;
use tideway_core::TidewayError;
use tracing::debug;

use crate::client::UpstreamClient;
use crate::types::{FileAttachment, UploadedFile};

/// Decode helper for client-supplied base64 file payloads.
pub trait RequestFileExt {
    /// Decode the base64 content; empty content is a bad request.
    fn decode_content(&self) -> Result<Vec<u8>, TidewayError>;
}

impl RequestFileExt for RequestFile {
    fn decode_content(&self) -> Result<Vec<u8>, TidewayError> {
        if self.content.is_empty() {
            return Err(TidewayError::BadRequest("file content is empty".into()));
        }
        base64::engine::general_purpose::STANDARD
            .decode(&self.content)
            .map_err(|e| TidewayError::BadRequest(format!("base64 decode failed: {e}")))
    }
}

impl UpstreamClient {
    /// Upload one decoded file to the conversation's upload endpoint.
    ///
    /// Returns the attachment descriptor for the next completion request.
    pub async fn upload_file(
        &self,
        conversation_uid: &str,
        file: &RequestFile,
    ) -> Result<FileAttachment, TidewayError> {
        let bytes = file.decode_content()?;
        debug!(name = file.name.as_str(), size = bytes.len(), "uploading file");

        self.pace().await;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file.name.clone())
            .mime_str(&file.file_type)
            .map_err(|e| TidewayError::BadRequest(format!("invalid file type: {e}")))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let url = self.org_url(&format!(
            "/conversations/{conversation_uid}/wiggle/upload-file"
        ));
        let response = self
            .http()
            .post(url)
            .header("Cookie", self.cookie().to_string())
            .timeout(Duration::from_secs(60))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TidewayError::Upstream {
                message: format!("upload request failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::OK {
            return Err(TidewayError::Upstream {
                message: format!("upload failed, status {status}: {text}"),
                source: None,
            });
        }

        let uploaded: UploadedFile =
            serde_json::from_str(&text).map_err(|e| TidewayError::Upstream {
                message: format!("upload response unparseable: {e}"),
                source: Some(Box::new(e)),
            })?;

        let file_name = if uploaded.file_name.is_empty() {
            uploaded.sanitized_name.clone()
        } else {
            uploaded.file_name.clone()
        };
        Ok(FileAttachment {
            file_uuid: uploaded.file_uuid,
            file_name,
            file_type: file.file_type.clone(),
            file_size: uploaded.size_bytes,
            extracted_content: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacer::RatePacer;
    use std::sync::Arc;
    use tideway_config::TidewayConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> UpstreamClient {
        let mut config = TidewayConfig::default();
        config.tokens.organization_id = Some("org-test".into());
        config.tokens.session_key = Some("sk-test".into());
        UpstreamClient::new(&config, Arc::new(RatePacer::new(0)))
            .unwrap()
            .with_base_url(base_url.to_string())
    }

    fn text_file() -> RequestFile {
        RequestFile {
            name: "notes.txt".into(),
            content: base64::engine::general_purpose::STANDARD.encode("hello world"),
            file_type: "text/plain".into(),
        }
    }

    #[test]
    fn decode_rejects_empty_content() {
        let file = RequestFile {
            name: "a".into(),
            content: String::new(),
            file_type: "text/plain".into(),
        };
        assert!(matches!(
            file.decode_content(),
            Err(TidewayError::BadRequest(_))
        ));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        let file = RequestFile {
            name: "a".into(),
            content: "!!not-base64!!".into(),
            file_type: "text/plain".into(),
        };
        assert!(file.decode_content().is_err());
    }

    #[test]
    fn decode_round_trips() {
        assert_eq!(text_file().decode_content().unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn upload_builds_attachment_descriptor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/api/organizations/org-test/conversations/conv-1/wiggle/upload-file",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "file_uuid": "f-1",
                "file_name": "notes.txt",
                "sanitized_name": "notes.txt",
                "size_bytes": 11
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let attachment = client.upload_file("conv-1", &text_file()).await.unwrap();
        assert_eq!(attachment.file_uuid, "f-1");
        assert_eq!(attachment.file_name, "notes.txt");
        assert_eq!(attachment.file_size, 11);
        assert_eq!(attachment.file_type, "text/plain");
    }

    #[tokio::test]
    async fn upload_failure_surfaces_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let err = client.upload_file("conv-1", &text_file()).await.unwrap_err();
        assert!(err.to_string().contains("413"), "got: {err}");
    }
}
