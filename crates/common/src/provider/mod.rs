//! Capability provider interface
//!
//! The components in [`crate::crypto`] never touch curve math, hashes or
//! ciphers directly. They drive a [`CryptoProvider`], which owns the actual
//! primitives and hands back opaque [`CryptoKey`] handles.
//!
//! The surface mirrors the platform crypto APIs it stands in for:
//! generate / import / export keys, derive bits, AEAD encrypt / decrypt,
//! sign / verify, and secure random bytes.
//!
//! # Key handles
//!
//! A `CryptoKey` carries its algorithm, kind, extractable flag and permitted
//! usages. Key material lives behind a type-erased payload that only the
//! provider which created the key knows how to read. Non-extractable keys
//! can never be exported in raw form.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

#[cfg(feature = "native")]
mod native;

#[cfg(feature = "native")]
pub use native::NativeProvider;

/// Algorithms a provider must support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// X25519 Diffie-Hellman
    X25519,
    /// Ed25519 signatures
    Ed25519,
    /// HKDF over SHA-256
    Hkdf,
    /// AES-GCM with a 256-bit key and 96-bit nonce
    AesGcm,
}

/// Import / export encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// Raw key bytes (32 bytes for every algorithm used here)
    Raw,
}

/// What a key handle may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUsage {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    DeriveBits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Public,
    Private,
    Secret,
}

/// Errors surfaced by a capability provider
///
/// Components propagate these unchanged; the one exception is
/// `AuthenticationFailed`, which the key exchange re-raises under its own
/// error type so callers can match on it directly.
///
/// Cloneable so one failed initialization can be reported to every caller
/// that was waiting on it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("key is not permitted for {0:?}")]
    InvalidUsage(KeyUsage),
    #[error("key is not extractable")]
    NotExtractable,
    /// AEAD tag verification rejected the input
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("random source failure: {0}")]
    Random(String),
    #[error("provider error: {0}")]
    Default(Arc<anyhow::Error>),
}

impl From<anyhow::Error> for ProviderError {
    fn from(err: anyhow::Error) -> Self {
        ProviderError::Default(Arc::new(err))
    }
}

/// Parameters for [`CryptoProvider::derive_bits`]
pub enum DeriveParams<'a> {
    /// Diffie-Hellman with the given peer public key
    X25519 { public: &'a CryptoKey },
    /// HKDF-SHA-256 expansion
    Hkdf { salt: &'a [u8], info: &'a [u8] },
}

/// Parameters for AEAD encryption and decryption
#[derive(Debug, Clone, Copy)]
pub struct AeadParams<'a> {
    pub nonce: &'a [u8],
}

/// Opaque key handle
///
/// Deliberately not `Clone`: a handle has exactly one owner.
pub struct CryptoKey {
    algorithm: Algorithm,
    kind: KeyKind,
    extractable: bool,
    usages: Vec<KeyUsage>,
    payload: Box<dyn Any + Send + Sync>,
}

impl fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print the payload
        f.debug_struct("CryptoKey")
            .field("algorithm", &self.algorithm)
            .field("kind", &self.kind)
            .field("extractable", &self.extractable)
            .field("usages", &self.usages)
            .finish_non_exhaustive()
    }
}

impl CryptoKey {
    /// Wrap provider-specific key material in a handle.
    ///
    /// Intended for provider implementations; the payload is only
    /// reachable again through [`CryptoKey::payload`].
    pub fn new<T>(
        algorithm: Algorithm,
        kind: KeyKind,
        extractable: bool,
        usages: &[KeyUsage],
        payload: T,
    ) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            algorithm,
            kind,
            extractable,
            usages: usages.to_vec(),
            payload: Box::new(payload),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn extractable(&self) -> bool {
        self.extractable
    }

    pub fn usages(&self) -> &[KeyUsage] {
        &self.usages
    }

    pub fn allows(&self, usage: KeyUsage) -> bool {
        self.usages.contains(&usage)
    }

    /// Downcast the key material. Returns `None` for keys created by a
    /// different provider.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

/// An asymmetric keypair as produced by [`CryptoProvider::generate_key_pair`]
#[derive(Debug)]
pub struct KeyPair {
    pub public: CryptoKey,
    pub private: CryptoKey,
}

/// The primitive surface the protocol components are built on
///
/// Every method is a suspension point. Implementations must fail closed:
/// `decrypt` never returns plaintext for input whose tag does not verify.
#[async_trait]
pub trait CryptoProvider: Send + Sync + fmt::Debug {
    /// Generate an asymmetric keypair.
    ///
    /// `extractable` applies to the private half; public halves are
    /// always exportable.
    async fn generate_key_pair(
        &self,
        algorithm: Algorithm,
        extractable: bool,
        usages: &[KeyUsage],
    ) -> Result<KeyPair, ProviderError>;

    async fn import_key(
        &self,
        format: KeyFormat,
        data: &[u8],
        algorithm: Algorithm,
        extractable: bool,
        usages: &[KeyUsage],
    ) -> Result<CryptoKey, ProviderError>;

    async fn export_key(&self, format: KeyFormat, key: &CryptoKey)
        -> Result<Vec<u8>, ProviderError>;

    /// Derive `length` bits from `base_key`. `length` must be a multiple of 8.
    async fn derive_bits(
        &self,
        params: DeriveParams<'_>,
        base_key: &CryptoKey,
        length: usize,
    ) -> Result<Vec<u8>, ProviderError>;

    async fn encrypt(
        &self,
        params: AeadParams<'_>,
        key: &CryptoKey,
        data: &[u8],
    ) -> Result<Vec<u8>, ProviderError>;

    async fn decrypt(
        &self,
        params: AeadParams<'_>,
        key: &CryptoKey,
        data: &[u8],
    ) -> Result<Vec<u8>, ProviderError>;

    async fn sign(
        &self,
        algorithm: Algorithm,
        key: &CryptoKey,
        data: &[u8],
    ) -> Result<Vec<u8>, ProviderError>;

    /// Returns `Ok(false)` for a signature that does not verify
    async fn verify(
        &self,
        algorithm: Algorithm,
        key: &CryptoKey,
        signature: &[u8],
        data: &[u8],
    ) -> Result<bool, ProviderError>;

    /// Fill `buf` from a cryptographically secure source
    async fn random_bytes(&self, buf: &mut [u8]) -> Result<(), ProviderError>;
}
