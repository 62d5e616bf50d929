//! Ed25519 signing with a rotatable remote verification key
//!
//! A [`Signer`] owns one non-extractable Ed25519 keypair, generated when the
//! signer is created and never rotated. Separately it holds at most one
//! trusted *remote* public key, which [`Signer::update_server_key`] swaps
//! out atomically: once the call returns, only the new key verifies.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::capability;
use crate::codec::{decode_base64, encode_base64, CodecError};
use crate::provider::{
    Algorithm, CryptoKey, CryptoProvider, KeyFormat, KeyPair, KeyUsage, ProviderError,
};
use crate::singleton::Singleton;

static INSTANCE: Singleton<Signer, SignatureError> = Singleton::new();

/// Errors that can occur while signing, verifying or rotating keys
///
/// A signature that simply does not verify is *not* an error; `verify`
/// returns `false` for it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignatureError {
    /// No capability provider could be acquired
    #[error("signer not initialized: no crypto provider available")]
    NotInitialized,
    #[error("server key not initialized")]
    ServerKeyNotInitialized,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Local signing identity plus the trusted remote verification key
#[derive(Debug)]
pub struct Signer {
    provider: Arc<dyn CryptoProvider>,
    keypair: KeyPair,
    server_key: RwLock<Option<Arc<CryptoKey>>>,
}

impl Signer {
    /// The process-wide signer.
    ///
    /// The first call generates the local keypair; concurrent first
    /// callers wait on that same generation and get the same instance.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if no capability provider is available, or
    /// the provider's error if key generation fails.
    pub async fn instance() -> Result<Arc<Self>, SignatureError> {
        INSTANCE
            .get_or_try_init(|| async {
                let provider = capability::acquire().ok_or(SignatureError::NotInitialized)?;
                Self::new(provider).await
            })
            .await
    }

    /// Create a signer with a freshly generated local keypair
    pub async fn new(provider: Arc<dyn CryptoProvider>) -> Result<Self, SignatureError> {
        let keypair = provider
            .generate_key_pair(Algorithm::Ed25519, false, &[KeyUsage::Sign, KeyUsage::Verify])
            .await?;
        tracing::debug!("signer initialized with a new ed25519 keypair");
        Ok(Self {
            provider,
            keypair,
            server_key: RwLock::new(None),
        })
    }

    /// Trust `public_key` (base64 raw Ed25519) as the remote verification key
    pub async fn initialize_server_key(&self, public_key: &str) -> Result<(), SignatureError> {
        let key = self.import_verifying_key(&decode_base64(public_key)?).await?;
        *self.server_key.write() = Some(Arc::new(key));
        tracing::info!("server verification key installed");
        Ok(())
    }

    /// Rotate the remote verification key.
    ///
    /// Same as [`Signer::initialize_server_key`]; the previous key stops
    /// verifying as soon as this returns.
    pub async fn update_server_key(&self, public_key: &str) -> Result<(), SignatureError> {
        self.initialize_server_key(public_key).await
    }

    pub fn has_server_key(&self) -> bool {
        self.server_key.read().is_some()
    }

    async fn import_verifying_key(&self, raw: &[u8]) -> Result<CryptoKey, SignatureError> {
        let key = self
            .provider
            .import_key(
                KeyFormat::Raw,
                raw,
                Algorithm::Ed25519,
                false,
                &[KeyUsage::Verify],
            )
            .await?;
        Ok(key)
    }

    /// The local public key as base64 of its raw 32 bytes
    pub async fn public_key(&self) -> Result<String, SignatureError> {
        let raw = self
            .provider
            .export_key(KeyFormat::Raw, &self.keypair.public)
            .await?;
        Ok(encode_base64(raw))
    }

    /// Sign `data` with the local private key (`&str` is signed as UTF-8).
    ///
    /// Ed25519 is deterministic: the same message always yields the same
    /// 64 byte signature.
    pub async fn sign(&self, data: impl AsRef<[u8]>) -> Result<Vec<u8>, SignatureError> {
        let signature = self
            .provider
            .sign(Algorithm::Ed25519, &self.keypair.private, data.as_ref())
            .await?;
        Ok(signature)
    }

    /// [`Signer::sign`], encoded as base64 for the wire
    pub async fn sign_base64(&self, data: impl AsRef<[u8]>) -> Result<String, SignatureError> {
        Ok(encode_base64(self.sign(data).await?))
    }

    /// Verify `signature` over `data` against the trusted remote key.
    ///
    /// # Errors
    ///
    /// Returns `ServerKeyNotInitialized` if no remote key has been set.
    /// An invalid signature is `Ok(false)`.
    pub async fn verify(
        &self,
        signature: &[u8],
        data: impl AsRef<[u8]>,
    ) -> Result<bool, SignatureError> {
        let key = self
            .server_key
            .read()
            .clone()
            .ok_or(SignatureError::ServerKeyNotInitialized)?;
        let valid = self
            .provider
            .verify(Algorithm::Ed25519, &key, signature, data.as_ref())
            .await?;
        if !valid {
            tracing::debug!("signature rejected by server key");
        }
        Ok(valid)
    }

    /// One-off verification against `public_key` (raw 32 bytes), leaving
    /// the trusted remote key untouched.
    pub async fn verify_with_key(
        &self,
        public_key: &[u8],
        signature: &[u8],
        data: impl AsRef<[u8]>,
    ) -> Result<bool, SignatureError> {
        let key = self.import_verifying_key(public_key).await?;
        let valid = self
            .provider
            .verify(Algorithm::Ed25519, &key, signature, data.as_ref())
            .await?;
        Ok(valid)
    }
}
