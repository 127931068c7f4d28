//! # Bootstrap Client
//!
//! How resolvers and registrants talk to bootstrap nodes. The
//! [`BootstrapClient`] trait is the seam; [`HttpBootstrapClient`] speaks the
//! node's HTTP API with reqwest, and [`LocalBootstrapClient`] calls a
//! [`BootstrapNode`] in the same process.
//!
//! Records returned by a peer are parsed strictly but **not** verified here.
//! The resolver verifies everything it accepts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::service::BootstrapNode;
use crate::config::BOOTSTRAP_PEER_TIMEOUT;
use crate::crypto::keys::{ClassicalKeypair, ClassicalPublicKey, ClassicalSignature};
use crate::error::ErrorClass;
use crate::record::{record_hash, CodecError, NameRecord, RecordJson};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("request to bootstrap peer failed: {0}")]
    Http(String),

    #[error("bootstrap peer answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("bootstrap peer sent an unusable body: {0}")]
    Decode(String),

    #[error("bootstrap peer timed out")]
    Timeout,
}

impl BootstrapError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BootstrapError::Decode(_) => ErrorClass::MalformedInput,
            _ => ErrorClass::Unreachable,
        }
    }
}

impl From<reqwest::Error> for BootstrapError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BootstrapError::Timeout
        } else if e.is_decode() {
            BootstrapError::Decode(e.to_string())
        } else {
            BootstrapError::Http(e.to_string())
        }
    }
}

impl From<CodecError> for BootstrapError {
    fn from(e: CodecError) -> Self {
        BootstrapError::Decode(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Prefix of the message a submission nonce signature covers.
pub const SUBMISSION_DOMAIN: &[u8] = b"moniker-submit:";

/// `"moniker-submit:" || nonce || record hash`.
pub fn submission_message(nonce: &str, record_hash: &[u8; 32]) -> Vec<u8> {
    let mut message = Vec::with_capacity(SUBMISSION_DOMAIN.len() + nonce.len() + 32);
    message.extend_from_slice(SUBMISSION_DOMAIN);
    message.extend_from_slice(nonce.as_bytes());
    message.extend_from_slice(record_hash);
    message
}

/// Body of `POST /api/submit` and `POST /api/submit/v2`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitRequest {
    pub record: RecordJson,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Hex Ed25519 signature over [`submission_message`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_signature: Option<String>,
}

impl SubmitRequest {
    pub fn new(record: &NameRecord) -> Self {
        Self {
            record: RecordJson::from(record),
            nonce: None,
            nonce_signature: None,
        }
    }

    /// Attach a nonce issued by the node, signed by the record owner.
    pub fn with_nonce(
        mut self,
        record: &NameRecord,
        owner: &ClassicalKeypair,
        nonce: String,
    ) -> Result<Self, CodecError> {
        let signature = owner.sign(&submission_message(&nonce, &record_hash(record)?));
        self.nonce = Some(nonce);
        self.nonce_signature = Some(signature.to_hex());
        Ok(self)
    }

    /// Path this request is posted to.
    pub fn path(&self) -> &'static str {
        if self.record.version == 2 {
            "api/submit/v2"
        } else {
            "api/submit"
        }
    }

    pub fn parsed_nonce_signature(&self) -> Option<Result<ClassicalSignature, CodecError>> {
        self.nonce_signature.as_deref().map(|s| {
            ClassicalSignature::from_hex(s)
                .map_err(|e| CodecError::field("nonce_signature", e.to_string()))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default)]
    pub quantum_secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub record: RecordJson,
    pub source: String,
    pub quantum_secure: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamesResponse {
    pub count: usize,
    pub records: Vec<RecordJson>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NonceRequest {
    /// Hex Ed25519 public key of the owner.
    pub owner_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceResponse {
    pub nonce: String,
    pub expires_at: u64,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BootstrapClient: Send + Sync {
    /// Label for logs.
    fn peer_id(&self) -> &str;

    /// `Ok(None)` when the peer does not know the name.
    async fn resolve(&self, name: &str) -> Result<Option<NameRecord>, BootstrapError>;

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, BootstrapError>;

    async fn names(&self) -> Result<Vec<NameRecord>, BootstrapError>;

    async fn request_nonce(
        &self,
        owner_key: &ClassicalPublicKey,
    ) -> Result<NonceResponse, BootstrapError>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct HttpBootstrapClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBootstrapClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BootstrapError> {
        Self::with_timeout(base_url, BOOTSTRAP_PEER_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BootstrapError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn error_body(response: reqwest::Response) -> BootstrapError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        BootstrapError::Status { status, body }
    }
}

#[async_trait]
impl BootstrapClient for HttpBootstrapClient {
    fn peer_id(&self) -> &str {
        &self.base_url
    }

    async fn resolve(&self, name: &str) -> Result<Option<NameRecord>, BootstrapError> {
        let url = self.endpoint(&format!("api/resolve/{name}"));
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::OK => {
                let body = response.json::<ResolveResponse>().await?;
                Ok(Some(NameRecord::try_from(body.record)?))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Self::error_body(response).await),
        }
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, BootstrapError> {
        let url = self.endpoint(request.path());
        let response = self.client.post(url).json(request).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        // Rejections carry a SubmitResponse body too.
        serde_json::from_str::<SubmitResponse>(&text)
            .map_err(|_| BootstrapError::Status { status, body: text })
    }

    async fn names(&self) -> Result<Vec<NameRecord>, BootstrapError> {
        let response = self.client.get(self.endpoint("api/names")).send().await?;
        if !response.status().is_success() {
            return Err(Self::error_body(response).await);
        }
        let body = response.json::<NamesResponse>().await?;
        body.records
            .into_iter()
            .map(|json| NameRecord::try_from(json).map_err(BootstrapError::from))
            .collect()
    }

    async fn request_nonce(
        &self,
        owner_key: &ClassicalPublicKey,
    ) -> Result<NonceResponse, BootstrapError> {
        let request = NonceRequest {
            owner_key: owner_key.to_hex(),
        };
        let response = self
            .client
            .post(self.endpoint("api/nonce"))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_body(response).await);
        }
        Ok(response.json::<NonceResponse>().await?)
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// Calls a [`BootstrapNode`] directly. Round-trips records through JSON so
/// the caller sees exactly what an HTTP client would.
#[derive(Clone)]
pub struct LocalBootstrapClient {
    node: Arc<BootstrapNode>,
}

impl LocalBootstrapClient {
    pub fn new(node: Arc<BootstrapNode>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl BootstrapClient for LocalBootstrapClient {
    fn peer_id(&self) -> &str {
        self.node.node_id()
    }

    async fn resolve(&self, name: &str) -> Result<Option<NameRecord>, BootstrapError> {
        match self.node.lookup(name) {
            Some(record) => Ok(Some(NameRecord::try_from(RecordJson::from(record.record()))?)),
            None => Ok(None),
        }
    }

    async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, BootstrapError> {
        Ok(self.node.submit_response(request.clone()).await)
    }

    async fn names(&self) -> Result<Vec<NameRecord>, BootstrapError> {
        Ok(self
            .node
            .index()
            .records()
            .into_iter()
            .map(|r| r.into_record())
            .collect())
    }

    async fn request_nonce(
        &self,
        owner_key: &ClassicalPublicKey,
    ) -> Result<NonceResponse, BootstrapError> {
        Ok(self.node.issue_nonce(owner_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::builder::tests::{legacy_record, quantum_record};

    #[test]
    fn endpoint_joins_cleanly() {
        let client = HttpBootstrapClient::new("http://127.0.0.1:7070/").unwrap();
        assert_eq!(client.endpoint("/api/names"), "http://127.0.0.1:7070/api/names");
        assert_eq!(client.endpoint("api/resolve/x"), "http://127.0.0.1:7070/api/resolve/x");
    }

    #[test]
    fn submit_path_follows_version() {
        assert_eq!(SubmitRequest::new(&legacy_record("path-test")).path(), "api/submit");
        assert_eq!(SubmitRequest::new(&quantum_record("path-test")).path(), "api/submit/v2");
    }

    #[test]
    fn nonce_signature_covers_nonce_and_hash() {
        let owner = ClassicalKeypair::generate();
        let record = legacy_record("nonce-sig");
        let request = SubmitRequest::new(&record)
            .with_nonce(&record, &owner, "abc123".into())
            .unwrap();
        let signature = request.parsed_nonce_signature().unwrap().unwrap();
        let message = submission_message("abc123", &record_hash(&record).unwrap());
        assert!(owner.public_key().verify(&message, &signature));
        assert!(!owner
            .public_key()
            .verify(&submission_message("abc124", &record_hash(&record).unwrap()), &signature));
    }

    #[test]
    fn submit_request_rejects_unknown_fields() {
        let record = legacy_record("strict-req");
        let mut value = serde_json::to_value(SubmitRequest::new(&record)).unwrap();
        value["extra"] = serde_json::json!(1);
        assert!(serde_json::from_value::<SubmitRequest>(value).is_err());
    }

    #[tokio::test]
    async fn unreachable_peer_is_unreachable() {
        // Port 9 (discard) is closed on test hosts; the connect fails fast.
        let client =
            HttpBootstrapClient::with_timeout("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.resolve("alice").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Unreachable);
    }
}
