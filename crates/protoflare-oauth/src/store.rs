use std::sync::Arc;
use std::time::Duration;

use protoflare_common::error::StoreError;
use protoflare_common::{Did, KeyValueStore};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use url::Url;

use crate::keys::PortableKeyPair;

/// Authorization started by `authorize`, waiting for the user to come back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAuthorization {
    pub auth_server: Url,
    pub did: Did,
    pub dpop_nonce: SmolStr,
    pub handle: SmolStr,
    pub service_endpoint: Url,
    pub verifier: SmolStr,
}

/// Everything needed to resume a session for one identity, minus the access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub auth_server: Url,
    pub dpop_nonce: SmolStr,
    pub handle: SmolStr,
    pub service_endpoint: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<SmolStr>,
    #[serde(flatten)]
    pub keys: PortableKeyPair,
}

pub fn user_key(did: &Did) -> String {
    format!("user-{did}")
}

pub fn access_token_key(did: &Did) -> String {
    format!("access-token-{did}")
}

pub fn state_key(state: &str) -> String {
    format!("state-{state}")
}

/// Typed access to OAuth state in a [`KeyValueStore`].
#[derive(Clone)]
pub struct CredentialRepository {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for CredentialRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRepository").finish_non_exhaustive()
    }
}

impl CredentialRepository {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub async fn put_pending(
        &self,
        state: &str,
        pending: &PendingAuthorization,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_string(pending)?;
        self.store.put(&state_key(state), value, Some(ttl)).await
    }

    /// Read and delete the pending authorization for `state`.
    ///
    /// Read failures and undecodable entries count as absent; a failed delete
    /// is logged and otherwise ignored.
    pub async fn take_pending(&self, state: &str) -> Option<PendingAuthorization> {
        let key = state_key(state);
        let stored = match self.store.get(&key).await {
            Ok(stored) => stored,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_e, "failed to read pending authorization");
                None
            }
        };
        if let Err(_e) = self.store.delete(&key).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_e, "failed to delete pending authorization");
        }
        serde_json::from_str(&stored?).ok()
    }

    pub async fn get_record(&self, did: &Did) -> Result<Option<CredentialRecord>, StoreError> {
        match self.store.get(&user_key(did)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn put_record(&self, did: &Did, record: &CredentialRecord) -> Result<(), StoreError> {
        let value = serde_json::to_string(record)?;
        self.store.put(&user_key(did), value, None).await
    }

    pub async fn get_access_token(&self, did: &Did) -> Result<Option<SmolStr>, StoreError> {
        Ok(self
            .store
            .get(&access_token_key(did))
            .await?
            .map(SmolStr::from))
    }

    pub async fn put_access_token(
        &self,
        did: &Did,
        token: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.store
            .put(&access_token_key(did), token.to_string(), ttl)
            .await
    }

    /// Delete everything stored for `did`.
    ///
    /// Every key is attempted; the first failure is returned.
    pub async fn delete_identity(&self, did: &Did) -> Result<(), StoreError> {
        let mut first_error = None;
        for key in [user_key(did), access_token_key(did), state_key(did.as_str())] {
            if let Err(e) = self.store.delete(&key).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %key, error = %e, "failed to delete credential entry");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::DpopKey;
    use protoflare_common::MemoryStore;

    fn did() -> Did {
        Did::new_static("did:plc:abc123")
    }

    fn pending() -> PendingAuthorization {
        PendingAuthorization {
            auth_server: Url::parse("https://auth.example.com").unwrap(),
            did: did(),
            dpop_nonce: "n0".into(),
            handle: "alice.example.com".into(),
            service_endpoint: Url::parse("https://pds.example.com").unwrap(),
            verifier: "v".into(),
        }
    }

    #[test]
    fn record_wire_format() {
        let record = CredentialRecord {
            auth_server: Url::parse("https://auth.example.com").unwrap(),
            dpop_nonce: "n1".into(),
            handle: "alice.example.com".into(),
            service_endpoint: Url::parse("https://pds.example.com").unwrap(),
            refresh_token: None,
            keys: DpopKey::generate().to_portable(),
        };
        let json = serde_json::to_value(&record).unwrap();
        for field in ["authServer", "dpopNonce", "handle", "serviceEndpoint", "privateKey", "publicKey"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert!(json.get("refreshToken").is_none());
        let back: CredentialRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn pending_is_single_use() {
        let store = MemoryStore::new();
        let repo = CredentialRepository::new(store.clone());
        repo.put_pending("s1", &pending(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(repo.take_pending("s1").await, Some(pending()));
        assert_eq!(repo.take_pending("s1").await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn corrupt_pending_counts_as_absent() {
        let store = MemoryStore::new();
        store.put("state-s1", "{not json".into(), None).await.unwrap();
        let repo = CredentialRepository::new(store.clone());
        assert_eq!(repo.take_pending("s1").await, None);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn delete_identity_clears_all_keys() {
        let store = MemoryStore::new();
        let repo = CredentialRepository::new(store.clone());
        for key in ["user-did:plc:abc123", "access-token-did:plc:abc123", "state-did:plc:abc123"] {
            store.put(key, "x".into(), None).await.unwrap();
        }
        store.put("user-did:plc:other", "x".into(), None).await.unwrap();
        repo.delete_identity(&did()).await.unwrap();
        assert_eq!(store.keys().await, vec!["user-did:plc:other".to_string()]);
    }
}
