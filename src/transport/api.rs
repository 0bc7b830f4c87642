//! Client for the remote signing service's HTTPS endpoints.
//!
//! The service holds the remotely-kept share: it exposes the fleet of
//! decryption identities, accepts the sealed share blob at keygen time,
//! and allocates/verifies RemoteKey sessions through an out-of-band code
//! (typically SMS).

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::WalletError;

/// Result of allocating or resharing a remote key session.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteSession {
    pub session: String,
    /// Code format hint, e.g. "all-digits".
    #[serde(default)]
    pub format: String,
    /// Code length, e.g. 6.
    #[serde(default)]
    pub length: u32,
}

#[derive(Deserialize)]
struct VerifyResponse {
    #[serde(rename = "RemoteKey")]
    remote_key: String,
}

/// The WalletSign endpoints consumed by the core.
#[async_trait]
pub trait RemoteSignApi: Send + Sync {
    /// Current fleet of decryption identities, base64url identity cards.
    async fn keys(&self) -> Result<Vec<String>, WalletError>;

    /// Allocate a remote key session verified out-of-band.
    async fn new_session(&self, number: &str) -> Result<RemoteSession, WalletError>;

    /// Confirm the out-of-band code; returns the session id to use as the
    /// credential's key.
    async fn verify(&self, session: &str, code: &str) -> Result<String, WalletError>;

    /// Upload a sealed remote share (base64url of the ciphertext).
    async fn set_generated_key(&self, data: &str, key: &str) -> Result<(), WalletError>;

    /// Ask the remote side to prepare for a reshare session.
    async fn reshare(&self, key: &str, threshold: usize, count: usize)
        -> Result<RemoteSession, WalletError>;
}

/// Fetch the fleet, retrying the call once; the endpoint is flaky right
/// after a fleet rotation.
pub async fn fetch_fleet(api: &dyn RemoteSignApi) -> Result<Vec<String>, WalletError> {
    match api.keys().await {
        Ok(ids) => Ok(ids),
        Err(_) => api.keys().await,
    }
}

/// `reqwest` implementation against a base URL.
pub struct HttpSignApi {
    client: reqwest::Client,
    base: String,
}

impl HttpSignApi {
    pub fn new(base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/EllipX/WalletSign:{endpoint}", self.base)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T, WalletError> {
        self.client
            .post(self.url(endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::TransportFailure(format!("{endpoint}: {e}")))?
            .error_for_status()
            .map_err(|e| WalletError::TransportFailure(format!("{endpoint}: {e}")))?
            .json()
            .await
            .map_err(|e| WalletError::TransportFailure(format!("{endpoint}: bad response: {e}")))
    }
}

#[async_trait]
impl RemoteSignApi for HttpSignApi {
    async fn keys(&self) -> Result<Vec<String>, WalletError> {
        self.client
            .get(self.url("keys"))
            .send()
            .await
            .map_err(|e| WalletError::TransportFailure(format!("keys: {e}")))?
            .error_for_status()
            .map_err(|e| WalletError::TransportFailure(format!("keys: {e}")))?
            .json()
            .await
            .map_err(|e| WalletError::TransportFailure(format!("keys: bad response: {e}")))
    }

    async fn new_session(&self, number: &str) -> Result<RemoteSession, WalletError> {
        self.post("new", serde_json::json!({ "number": number })).await
    }

    async fn verify(&self, session: &str, code: &str) -> Result<String, WalletError> {
        let res: VerifyResponse = self
            .post("verify", serde_json::json!({ "session": session, "code": code }))
            .await?;
        Ok(res.remote_key)
    }

    async fn set_generated_key(&self, data: &str, key: &str) -> Result<(), WalletError> {
        let _: serde_json::Value = self
            .post("setGeneratedKey", serde_json::json!({ "data": data, "key": key }))
            .await?;
        Ok(())
    }

    async fn reshare(
        &self,
        key: &str,
        threshold: usize,
        count: usize,
    ) -> Result<RemoteSession, WalletError> {
        self.post(
            "reshare",
            serde_json::json!({ "key": key, "threshold": threshold, "count": count }),
        )
        .await
    }
}

/// Placeholder for deployments without the remote service.
pub struct OfflineSignApi;

#[async_trait]
impl RemoteSignApi for OfflineSignApi {
    async fn keys(&self) -> Result<Vec<String>, WalletError> {
        Err(WalletError::TransportFailure("no remote signing service configured".into()))
    }

    async fn new_session(&self, _number: &str) -> Result<RemoteSession, WalletError> {
        Err(WalletError::TransportFailure("no remote signing service configured".into()))
    }

    async fn verify(&self, _session: &str, _code: &str) -> Result<String, WalletError> {
        Err(WalletError::TransportFailure("no remote signing service configured".into()))
    }

    async fn set_generated_key(&self, _data: &str, _key: &str) -> Result<(), WalletError> {
        Err(WalletError::TransportFailure("no remote signing service configured".into()))
    }

    async fn reshare(
        &self,
        _key: &str,
        _threshold: usize,
        _count: usize,
    ) -> Result<RemoteSession, WalletError> {
        Err(WalletError::TransportFailure("no remote signing service configured".into()))
    }
}
