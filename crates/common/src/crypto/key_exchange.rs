//! Ephemeral X25519 handshake and directional AEAD envelopes
//!
//! A [`KeyExchange`] starts out ready but unkeyed. Each successful
//! [`KeyExchange::generate_key`] installs a fresh TX/RX pair, replacing
//! whatever a previous handshake left behind. `encrypt` and `decrypt`
//! only work once a handshake has completed.
//!
//! The ephemeral keypair for the next handshake can be generated ahead of
//! time with [`KeyExchange::offer_key`], which is how the server end
//! publishes its key before the client answers. An offered keypair is used
//! by exactly one handshake.
//!
//! Handshakes are not serialized against each other. When two overlap,
//! the one that *completes* last wins, regardless of which was issued
//! first. Callers must let `generate_key` resolve before encrypting.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use super::{
    CLIENT_TO_SERVER, DERIVED_KEY_BITS, HKDF_SALT, NONCE_SIZE, PUBLIC_KEY_SIZE, SERVER_TO_CLIENT,
};
use crate::capability;
use crate::codec::{decode_base64, encode_base64, CodecError};
use crate::provider::{
    AeadParams, Algorithm, CryptoKey, CryptoProvider, DeriveParams, KeyFormat, KeyPair, KeyUsage,
    ProviderError,
};
use crate::singleton::Singleton;

static INSTANCE: Singleton<KeyExchange, KeyExchangeError> = Singleton::new();

/// Errors that can occur during a handshake or while sealing / opening envelopes
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyExchangeError {
    /// No capability provider could be acquired
    #[error("key exchange not initialized: no crypto provider available")]
    NotInitialized,
    #[error("no encryption key, complete a handshake first")]
    NoEncryptionKey,
    #[error("no decryption key, complete a handshake first")]
    NoDecryptionKey,
    /// A server answered a handshake without having offered its key first
    #[error("no offered key, call offer_key before answering a handshake")]
    NoOfferedKey,
    /// The AEAD tag did not verify; no plaintext is released
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("invalid nonce size, expected {}, got {0}", NONCE_SIZE)]
    InvalidNonce(usize),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("provider error: {0}")]
    Provider(ProviderError),
}

impl From<ProviderError> for KeyExchangeError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::AuthenticationFailed => KeyExchangeError::AuthenticationFailed,
            other => KeyExchangeError::Provider(other),
        }
    }
}

/// Which end of the channel this instance plays
///
/// The client binds both derived keys to its own ephemeral public key.
/// The server mirrors it: labels are swapped and both keys are bound to
/// the client's (remote) ephemeral public key, so the two ends agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Client,
    Server,
}

impl Role {
    /// (TX label, RX label)
    fn labels(self) -> (&'static str, &'static str) {
        match self {
            Role::Client => (CLIENT_TO_SERVER, SERVER_TO_CLIENT),
            Role::Server => (SERVER_TO_CLIENT, CLIENT_TO_SERVER),
        }
    }
}

/// Ciphertext plus the nonce it was sealed with
///
/// Both fields must reach the peer together. Serializes with base64 text
/// fields so it can ride inside JSON messages.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde_as(as = "Base64")]
    pub ciphertext: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub nonce: [u8; NONCE_SIZE],
}

/// Directional keys from one handshake, only ever installed together
#[derive(Debug)]
struct SessionKeys {
    tx: CryptoKey,
    rx: CryptoKey,
}

/// Handshake state and session keys for one end of a channel
#[derive(Debug)]
pub struct KeyExchange {
    provider: Arc<dyn CryptoProvider>,
    role: Role,
    offered: Mutex<Option<KeyPair>>,
    session: RwLock<Option<Arc<SessionKeys>>>,
}

impl KeyExchange {
    /// The process-wide client instance.
    ///
    /// Concurrent first calls share one initialization and resolve to the
    /// same instance.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if no capability provider is available.
    pub async fn instance() -> Result<Arc<Self>, KeyExchangeError> {
        INSTANCE
            .get_or_try_init(|| async {
                let provider = capability::acquire().ok_or(KeyExchangeError::NotInitialized)?;
                tracing::debug!("key exchange initialized");
                Ok::<_, KeyExchangeError>(Self::new(provider))
            })
            .await
    }

    /// A client-side instance owning `provider`
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self::with_role(provider, Role::Client)
    }

    pub fn with_role(provider: Arc<dyn CryptoProvider>, role: Role) -> Self {
        Self {
            provider,
            role,
            offered: Mutex::new(None),
            session: RwLock::new(None),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether a handshake has completed and session keys are installed
    pub fn has_session_keys(&self) -> bool {
        self.session.read().is_some()
    }

    /// Generate the ephemeral keypair the next handshake will use and
    /// return its public key as base64.
    ///
    /// Calling it again discards the previously offered keypair.
    pub async fn offer_key(&self) -> Result<String, KeyExchangeError> {
        let pair = self.ephemeral_key_pair().await?;
        let public = self.export_public(&pair).await?;
        *self.offered.lock() = Some(pair);
        Ok(public)
    }

    async fn ephemeral_key_pair(&self) -> Result<KeyPair, KeyExchangeError> {
        let pair = self
            .provider
            .generate_key_pair(Algorithm::X25519, false, &[KeyUsage::DeriveBits])
            .await?;
        Ok(pair)
    }

    async fn export_public(&self, pair: &KeyPair) -> Result<String, KeyExchangeError> {
        let raw = self
            .provider
            .export_key(KeyFormat::Raw, &pair.public)
            .await?;
        Ok(encode_base64(raw))
    }

    /// Run a handshake against `remote_public_key` (base64 raw X25519).
    ///
    /// Uses the offered keypair if there is one. A client without one gets a
    /// fresh keypair; a server must have offered, since the client already
    /// derived against the key the server published. Either way no ephemeral
    /// key serves two handshakes. Derives and installs new TX/RX keys and
    /// returns the local ephemeral public key as base64 for the remote party.
    ///
    /// # Errors
    ///
    /// - `Codec` if the remote key is not valid base64 or not 32 bytes
    /// - `NoOfferedKey` on a server that has no offered keypair
    /// - `Provider` if the remote key yields a non-contributory shared
    ///   secret, or the provider otherwise fails
    pub async fn generate_key(&self, remote_public_key: &str) -> Result<String, KeyExchangeError> {
        let remote_bytes = decode_base64(remote_public_key)?;
        if remote_bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CodecError::InvalidLength {
                expected: PUBLIC_KEY_SIZE,
                got: remote_bytes.len(),
            }
            .into());
        }

        let offered = self.offered.lock().take();
        let local = match (offered, self.role) {
            (Some(pair), _) => pair,
            (None, Role::Client) => self.ephemeral_key_pair().await?,
            (None, Role::Server) => return Err(KeyExchangeError::NoOfferedKey),
        };
        let local_public = self.export_public(&local).await?;

        let remote = self
            .provider
            .import_key(KeyFormat::Raw, &remote_bytes, Algorithm::X25519, true, &[])
            .await?;
        let shared = self
            .provider
            .derive_bits(
                DeriveParams::X25519 { public: &remote },
                &local.private,
                DERIVED_KEY_BITS,
            )
            .await?;
        let ikm = self
            .provider
            .import_key(
                KeyFormat::Raw,
                &shared,
                Algorithm::Hkdf,
                false,
                &[KeyUsage::DeriveBits],
            )
            .await?;

        // both ends bind to the client's ephemeral key
        let binding = match self.role {
            Role::Client => local_public.clone(),
            Role::Server => encode_base64(&remote_bytes),
        };
        let (tx_label, rx_label) = self.role.labels();
        let tx = self
            .derive_aead_key(&ikm, tx_label, &binding, KeyUsage::Encrypt)
            .await?;
        let rx = self
            .derive_aead_key(&ikm, rx_label, &binding, KeyUsage::Decrypt)
            .await?;

        *self.session.write() = Some(Arc::new(SessionKeys { tx, rx }));
        tracing::debug!(role = ?self.role, "handshake complete, session keys installed");

        Ok(local_public)
    }

    async fn derive_aead_key(
        &self,
        ikm: &CryptoKey,
        label: &str,
        binding: &str,
        usage: KeyUsage,
    ) -> Result<CryptoKey, KeyExchangeError> {
        let info = format!("{label}{binding}");
        let bits = self
            .provider
            .derive_bits(
                DeriveParams::Hkdf {
                    salt: &HKDF_SALT,
                    info: info.as_bytes(),
                },
                ikm,
                DERIVED_KEY_BITS,
            )
            .await?;
        let key = self
            .provider
            .import_key(KeyFormat::Raw, &bits, Algorithm::AesGcm, false, &[usage])
            .await?;
        Ok(key)
    }

    /// Seal `plaintext` under the TX key with a fresh random nonce.
    ///
    /// `&str` input is sealed as its UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// Returns `NoEncryptionKey` if no handshake has completed.
    pub async fn encrypt(
        &self,
        plaintext: impl AsRef<[u8]>,
    ) -> Result<Envelope, KeyExchangeError> {
        let keys = self
            .session
            .read()
            .clone()
            .ok_or(KeyExchangeError::NoEncryptionKey)?;

        let mut nonce = [0u8; NONCE_SIZE];
        self.provider.random_bytes(&mut nonce).await?;
        let ciphertext = self
            .provider
            .encrypt(AeadParams { nonce: &nonce }, &keys.tx, plaintext.as_ref())
            .await?;

        Ok(Envelope { ciphertext, nonce })
    }

    /// Open a ciphertext sealed by the remote party under our RX key.
    ///
    /// # Errors
    ///
    /// - `NoDecryptionKey` if no handshake has completed
    /// - `InvalidNonce` if `nonce` is not 12 bytes
    /// - `AuthenticationFailed` if the tag does not verify
    pub async fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
    ) -> Result<Vec<u8>, KeyExchangeError> {
        let keys = self
            .session
            .read()
            .clone()
            .ok_or(KeyExchangeError::NoDecryptionKey)?;
        if nonce.len() != NONCE_SIZE {
            return Err(KeyExchangeError::InvalidNonce(nonce.len()));
        }

        let plaintext = self
            .provider
            .decrypt(AeadParams { nonce }, &keys.rx, ciphertext)
            .await?;
        Ok(plaintext)
    }

    pub async fn decrypt_envelope(
        &self,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, KeyExchangeError> {
        self.decrypt(&envelope.ciphertext, &envelope.nonce).await
    }
}

#[cfg(all(test, feature = "native"))]
mod test {
    use super::*;
    use crate::provider::NativeProvider;

    fn pair() -> (KeyExchange, KeyExchange) {
        let provider: Arc<dyn CryptoProvider> = Arc::new(NativeProvider::new());
        (
            KeyExchange::with_role(provider.clone(), Role::Client),
            KeyExchange::with_role(provider, Role::Server),
        )
    }

    async fn remote_public_key() -> String {
        let provider = NativeProvider::new();
        let pair = provider
            .generate_key_pair(Algorithm::X25519, false, &[KeyUsage::DeriveBits])
            .await
            .unwrap();
        encode_base64(provider.export_key(KeyFormat::Raw, &pair.public).await.unwrap())
    }

    #[tokio::test]
    async fn test_unkeyed_instance_refuses() {
        let (client, _) = pair();
        assert!(!client.has_session_keys());
        assert!(matches!(
            client.encrypt("hello").await,
            Err(KeyExchangeError::NoEncryptionKey)
        ));
        assert!(matches!(
            client.decrypt(b"ciphertext", &[0u8; NONCE_SIZE]).await,
            Err(KeyExchangeError::NoDecryptionKey)
        ));
    }

    #[tokio::test]
    async fn test_each_handshake_uses_fresh_ephemeral_key() {
        let (client, _) = pair();
        let remote = remote_public_key().await;

        let first = client.generate_key(&remote).await.unwrap();
        let second = client.generate_key(&remote).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(decode_base64(&first).unwrap().len(), 32);
        assert!(client.has_session_keys());
    }

    #[tokio::test]
    async fn test_client_server_roundtrip() {
        let (client, server) = pair();

        let server_public = server.offer_key().await.unwrap();
        let client_public = client.generate_key(&server_public).await.unwrap();
        let answered = server.generate_key(&client_public).await.unwrap();
        assert_eq!(answered, server_public);

        let envelope = client.encrypt("ping").await.unwrap();
        assert_eq!(server.decrypt_envelope(&envelope).await.unwrap(), b"ping");

        let envelope = server.encrypt(b"pong").await.unwrap();
        assert_eq!(client.decrypt_envelope(&envelope).await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_offered_key_is_single_use() {
        let (_, server) = pair();
        let remote = remote_public_key().await;

        let offered = server.offer_key().await.unwrap();
        assert_eq!(server.generate_key(&remote).await.unwrap(), offered);

        let reoffered = server.offer_key().await.unwrap();
        assert_ne!(reoffered, offered);
        assert_eq!(server.generate_key(&remote).await.unwrap(), reoffered);
    }

    #[tokio::test]
    async fn test_server_must_offer_before_answering() {
        let (client, server) = pair();
        let client_public = client.generate_key(&remote_public_key().await).await.unwrap();

        assert!(matches!(
            server.generate_key(&client_public).await,
            Err(KeyExchangeError::NoOfferedKey)
        ));
        assert!(!server.has_session_keys());

        // the offer is consumed by the handshake it answers
        server.offer_key().await.unwrap();
        server.generate_key(&client_public).await.unwrap();
        assert!(matches!(
            server.generate_key(&client_public).await,
            Err(KeyExchangeError::NoOfferedKey)
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_remote_key() {
        let (client, _) = pair();
        assert!(matches!(
            client.generate_key("***").await,
            Err(KeyExchangeError::Codec(_))
        ));
        assert!(matches!(
            client.generate_key(&encode_base64([1u8; 16])).await,
            Err(KeyExchangeError::Codec(CodecError::InvalidLength {
                expected: PUBLIC_KEY_SIZE,
                got: 16
            }))
        ));
        // all-zero is the identity point: no contributory shared secret
        assert!(matches!(
            client.generate_key(&encode_base64([0u8; PUBLIC_KEY_SIZE])).await,
            Err(KeyExchangeError::Provider(ProviderError::InvalidKey(_)))
        ));
        assert!(!client.has_session_keys());
    }

    #[tokio::test]
    async fn test_wrong_nonce_size() {
        let (client, _) = pair();
        client.generate_key(&remote_public_key().await).await.unwrap();
        assert!(matches!(
            client.decrypt(b"ciphertext", &[0u8; 8]).await,
            Err(KeyExchangeError::InvalidNonce(8))
        ));
    }

    #[test]
    fn test_envelope_json_uses_base64() {
        let envelope = Envelope {
            ciphertext: vec![0xde, 0xad, 0xbe, 0xef],
            nonce: [0u8; NONCE_SIZE],
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["ciphertext"], "3q2+7w==");
        assert_eq!(json["nonce"], "AAAAAAAAAAAAAAAA");

        let recovered: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(recovered, envelope);
    }
}
