//! Native capability provider backed by the RustCrypto and dalek crates
//!
//! - X25519 via `x25519-dalek`
//! - Ed25519 via `ed25519-dalek`
//! - HKDF-SHA-256 via `hkdf` + `sha2`
//! - AES-256-GCM via `aes-gcm`
//! - randomness via `getrandom`

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as _, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use super::{
    AeadParams, Algorithm, CryptoKey, CryptoProvider, DeriveParams, KeyFormat, KeyKind, KeyPair,
    KeyUsage, ProviderError,
};

/// Size of every raw key this provider deals in
const RAW_KEY_SIZE: usize = 32;
/// AES-GCM nonce size
const NONCE_SIZE: usize = 12;
const SIGNATURE_SIZE: usize = 64;

/// Key material behind a [`CryptoKey`] created by [`NativeProvider`]
enum NativeKey {
    X25519Private(StaticSecret),
    X25519Public(X25519PublicKey),
    Ed25519Private(SigningKey),
    Ed25519Public(VerifyingKey),
    Hkdf(Vec<u8>),
    AesGcm([u8; RAW_KEY_SIZE]),
}

/// Provider for native targets
///
/// Stateless; every key it creates carries its own material.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeProvider;

impl NativeProvider {
    pub fn new() -> Self {
        Self
    }
}

fn native(key: &CryptoKey) -> Result<&NativeKey, ProviderError> {
    key.payload::<NativeKey>()
        .ok_or_else(|| ProviderError::InvalidKey("key was not created by this provider".into()))
}

fn require(key: &CryptoKey, usage: KeyUsage) -> Result<(), ProviderError> {
    if !key.allows(usage) {
        return Err(ProviderError::InvalidUsage(usage));
    }
    Ok(())
}

fn raw_key(data: &[u8]) -> Result<[u8; RAW_KEY_SIZE], ProviderError> {
    data.try_into().map_err(|_| {
        ProviderError::InvalidKey(format!(
            "invalid key size, expected {}, got {}",
            RAW_KEY_SIZE,
            data.len()
        ))
    })
}

fn byte_length(length: usize, max: Option<usize>) -> Result<usize, ProviderError> {
    if length % 8 != 0 {
        return Err(ProviderError::Unsupported(format!(
            "bit length {length} is not a multiple of 8"
        )));
    }
    let bytes = length / 8;
    if let Some(max) = max {
        if bytes > max {
            return Err(ProviderError::Unsupported(format!(
                "bit length {length} exceeds {}",
                max * 8
            )));
        }
    }
    Ok(bytes)
}

fn check_usages(algorithm: Algorithm, usages: &[KeyUsage]) -> Result<(), ProviderError> {
    let allowed: &[KeyUsage] = match algorithm {
        Algorithm::X25519 | Algorithm::Hkdf => &[KeyUsage::DeriveBits],
        Algorithm::Ed25519 => &[KeyUsage::Sign, KeyUsage::Verify],
        Algorithm::AesGcm => &[KeyUsage::Encrypt, KeyUsage::Decrypt],
    };
    match usages.iter().find(|usage| !allowed.contains(usage)) {
        Some(usage) => Err(ProviderError::InvalidUsage(*usage)),
        None => Ok(()),
    }
}

fn cipher(key: &CryptoKey, usage: KeyUsage, nonce: &[u8]) -> Result<Aes256Gcm, ProviderError> {
    require(key, usage)?;
    let NativeKey::AesGcm(raw) = native(key)? else {
        return Err(ProviderError::InvalidKey("expected an AES-GCM key".into()));
    };
    if nonce.len() != NONCE_SIZE {
        return Err(anyhow::anyhow!(
            "invalid nonce size, expected {}, got {}",
            NONCE_SIZE,
            nonce.len()
        )
        .into());
    }
    Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(raw)))
}

#[async_trait]
impl CryptoProvider for NativeProvider {
    async fn generate_key_pair(
        &self,
        algorithm: Algorithm,
        extractable: bool,
        usages: &[KeyUsage],
    ) -> Result<KeyPair, ProviderError> {
        check_usages(algorithm, usages)?;
        let mut seed = [0u8; RAW_KEY_SIZE];
        self.random_bytes(&mut seed).await?;

        let pair = match algorithm {
            Algorithm::X25519 => {
                let secret = StaticSecret::from(seed);
                let public = X25519PublicKey::from(&secret);
                KeyPair {
                    public: CryptoKey::new(
                        algorithm,
                        KeyKind::Public,
                        true,
                        &[],
                        NativeKey::X25519Public(public),
                    ),
                    private: CryptoKey::new(
                        algorithm,
                        KeyKind::Private,
                        extractable,
                        usages,
                        NativeKey::X25519Private(secret),
                    ),
                }
            }
            Algorithm::Ed25519 => {
                let signing_key = SigningKey::from_bytes(&seed);
                let verifying_key = signing_key.verifying_key();
                let public_usages: Vec<KeyUsage> = usages
                    .iter()
                    .copied()
                    .filter(|usage| *usage == KeyUsage::Verify)
                    .collect();
                let private_usages: Vec<KeyUsage> = usages
                    .iter()
                    .copied()
                    .filter(|usage| *usage == KeyUsage::Sign)
                    .collect();
                KeyPair {
                    public: CryptoKey::new(
                        algorithm,
                        KeyKind::Public,
                        true,
                        &public_usages,
                        NativeKey::Ed25519Public(verifying_key),
                    ),
                    private: CryptoKey::new(
                        algorithm,
                        KeyKind::Private,
                        extractable,
                        &private_usages,
                        NativeKey::Ed25519Private(signing_key),
                    ),
                }
            }
            other => {
                return Err(ProviderError::Unsupported(format!(
                    "{other:?} does not produce key pairs"
                )))
            }
        };
        tracing::trace!(?algorithm, "generated key pair");
        Ok(pair)
    }

    async fn import_key(
        &self,
        format: KeyFormat,
        data: &[u8],
        algorithm: Algorithm,
        extractable: bool,
        usages: &[KeyUsage],
    ) -> Result<CryptoKey, ProviderError> {
        let KeyFormat::Raw = format;
        check_usages(algorithm, usages)?;

        let (kind, material) = match algorithm {
            Algorithm::X25519 => (
                KeyKind::Public,
                NativeKey::X25519Public(X25519PublicKey::from(raw_key(data)?)),
            ),
            Algorithm::Ed25519 => {
                let verifying_key = VerifyingKey::from_bytes(&raw_key(data)?)
                    .map_err(|e| ProviderError::InvalidKey(e.to_string()))?;
                (KeyKind::Public, NativeKey::Ed25519Public(verifying_key))
            }
            Algorithm::Hkdf => (KeyKind::Secret, NativeKey::Hkdf(data.to_vec())),
            Algorithm::AesGcm => (KeyKind::Secret, NativeKey::AesGcm(raw_key(data)?)),
        };
        Ok(CryptoKey::new(
            algorithm,
            kind,
            extractable,
            usages,
            material,
        ))
    }

    async fn export_key(
        &self,
        format: KeyFormat,
        key: &CryptoKey,
    ) -> Result<Vec<u8>, ProviderError> {
        let KeyFormat::Raw = format;
        if !key.extractable() {
            return Err(ProviderError::NotExtractable);
        }
        let bytes = match native(key)? {
            NativeKey::X25519Public(public) => public.as_bytes().to_vec(),
            NativeKey::X25519Private(secret) => secret.to_bytes().to_vec(),
            NativeKey::Ed25519Public(verifying_key) => verifying_key.to_bytes().to_vec(),
            NativeKey::Ed25519Private(signing_key) => signing_key.to_bytes().to_vec(),
            NativeKey::AesGcm(raw) => raw.to_vec(),
            NativeKey::Hkdf(_) => {
                return Err(ProviderError::Unsupported(
                    "HKDF keys cannot be exported".into(),
                ))
            }
        };
        Ok(bytes)
    }

    async fn derive_bits(
        &self,
        params: DeriveParams<'_>,
        base_key: &CryptoKey,
        length: usize,
    ) -> Result<Vec<u8>, ProviderError> {
        require(base_key, KeyUsage::DeriveBits)?;
        match params {
            DeriveParams::X25519 { public } => {
                let NativeKey::X25519Private(secret) = native(base_key)? else {
                    return Err(ProviderError::InvalidKey(
                        "expected an X25519 private key".into(),
                    ));
                };
                let NativeKey::X25519Public(peer) = native(public)? else {
                    return Err(ProviderError::InvalidKey(
                        "expected an X25519 public key".into(),
                    ));
                };
                let len = byte_length(length, Some(RAW_KEY_SIZE))?;
                let shared = secret.diffie_hellman(peer);
                // low-order peer points collapse the secret to zero
                if !shared.was_contributory() {
                    return Err(ProviderError::InvalidKey(
                        "peer public key yields a non-contributory shared secret".into(),
                    ));
                }
                Ok(shared.as_bytes()[..len].to_vec())
            }
            DeriveParams::Hkdf { salt, info } => {
                let NativeKey::Hkdf(ikm) = native(base_key)? else {
                    return Err(ProviderError::InvalidKey("expected an HKDF key".into()));
                };
                let len = byte_length(length, None)?;
                let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
                let mut okm = vec![0u8; len];
                hk.expand(info, &mut okm)
                    .map_err(|e| anyhow::anyhow!("hkdf expand error: {}", e))?;
                Ok(okm)
            }
        }
    }

    async fn encrypt(
        &self,
        params: AeadParams<'_>,
        key: &CryptoKey,
        data: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        let cipher = cipher(key, KeyUsage::Encrypt, params.nonce)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(params.nonce), data)
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;
        Ok(ciphertext)
    }

    async fn decrypt(
        &self,
        params: AeadParams<'_>,
        key: &CryptoKey,
        data: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        let cipher = cipher(key, KeyUsage::Decrypt, params.nonce)?;
        cipher
            .decrypt(Nonce::from_slice(params.nonce), data)
            .map_err(|_| ProviderError::AuthenticationFailed)
    }

    async fn sign(
        &self,
        algorithm: Algorithm,
        key: &CryptoKey,
        data: &[u8],
    ) -> Result<Vec<u8>, ProviderError> {
        require(key, KeyUsage::Sign)?;
        match (algorithm, native(key)?) {
            (Algorithm::Ed25519, NativeKey::Ed25519Private(signing_key)) => {
                Ok(signing_key.sign(data).to_bytes().to_vec())
            }
            _ => Err(ProviderError::InvalidKey(format!(
                "cannot sign with {:?} using a {:?} key",
                algorithm,
                key.algorithm()
            ))),
        }
    }

    async fn verify(
        &self,
        algorithm: Algorithm,
        key: &CryptoKey,
        signature: &[u8],
        data: &[u8],
    ) -> Result<bool, ProviderError> {
        require(key, KeyUsage::Verify)?;
        let (Algorithm::Ed25519, NativeKey::Ed25519Public(verifying_key)) =
            (algorithm, native(key)?)
        else {
            return Err(ProviderError::InvalidKey(format!(
                "cannot verify {:?} using a {:?} key",
                algorithm,
                key.algorithm()
            )));
        };
        // a malformed signature is a failed verification, not a misuse
        if signature.len() != SIGNATURE_SIZE {
            return Ok(false);
        }
        let Ok(signature) = Signature::from_slice(signature) else {
            return Ok(false);
        };
        Ok(verifying_key.verify_strict(data, &signature).is_ok())
    }

    async fn random_bytes(&self, buf: &mut [u8]) -> Result<(), ProviderError> {
        getrandom::getrandom(buf).map_err(|e| ProviderError::Random(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_private_keys_stay_private() {
        let provider = NativeProvider::new();
        let pair = provider
            .generate_key_pair(Algorithm::X25519, false, &[KeyUsage::DeriveBits])
            .await
            .unwrap();

        assert_eq!(pair.public.kind(), KeyKind::Public);
        assert_eq!(pair.private.kind(), KeyKind::Private);
        assert_eq!(pair.private.usages(), &[KeyUsage::DeriveBits]);
        assert!(pair.public.usages().is_empty());

        let public = provider.export_key(KeyFormat::Raw, &pair.public).await.unwrap();
        assert_eq!(public.len(), RAW_KEY_SIZE);
        assert!(matches!(
            provider.export_key(KeyFormat::Raw, &pair.private).await,
            Err(ProviderError::NotExtractable)
        ));
    }

    #[tokio::test]
    async fn test_x25519_agreement() {
        let provider = NativeProvider::new();
        let usages = [KeyUsage::DeriveBits];
        let alice = provider
            .generate_key_pair(Algorithm::X25519, false, &usages)
            .await
            .unwrap();
        let bob = provider
            .generate_key_pair(Algorithm::X25519, false, &usages)
            .await
            .unwrap();

        let a = provider
            .derive_bits(DeriveParams::X25519 { public: &bob.public }, &alice.private, 256)
            .await
            .unwrap();
        let b = provider
            .derive_bits(DeriveParams::X25519 { public: &alice.public }, &bob.private, 256)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_x25519_rejects_low_order_point() {
        let provider = NativeProvider::new();
        let pair = provider
            .generate_key_pair(Algorithm::X25519, false, &[KeyUsage::DeriveBits])
            .await
            .unwrap();
        let zero = provider
            .import_key(KeyFormat::Raw, &[0u8; 32], Algorithm::X25519, true, &[])
            .await
            .unwrap();

        let result = provider
            .derive_bits(DeriveParams::X25519 { public: &zero }, &pair.private, 256)
            .await;
        assert!(matches!(result, Err(ProviderError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_hkdf_matches_reference() {
        // RFC 5869 test case 1
        let provider = NativeProvider::new();
        let ikm = [0x0bu8; 22];
        let salt: Vec<u8> = (0x00..=0x0c).collect();
        let info: Vec<u8> = (0xf0..=0xf9).collect();
        let key = provider
            .import_key(KeyFormat::Raw, &ikm, Algorithm::Hkdf, false, &[KeyUsage::DeriveBits])
            .await
            .unwrap();

        let okm = provider
            .derive_bits(
                DeriveParams::Hkdf {
                    salt: &salt,
                    info: &info,
                },
                &key,
                42 * 8,
            )
            .await
            .unwrap();
        assert_eq!(
            hex::encode(okm),
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865"
        );
    }

    #[tokio::test]
    async fn test_usage_is_enforced() {
        let provider = NativeProvider::new();
        let key = provider
            .import_key(
                KeyFormat::Raw,
                &[7u8; 32],
                Algorithm::AesGcm,
                false,
                &[KeyUsage::Encrypt],
            )
            .await
            .unwrap();
        let nonce = [0u8; NONCE_SIZE];
        let ciphertext = provider
            .encrypt(AeadParams { nonce: &nonce }, &key, b"data")
            .await
            .unwrap();

        assert!(matches!(
            provider
                .decrypt(AeadParams { nonce: &nonce }, &key, &ciphertext)
                .await,
            Err(ProviderError::InvalidUsage(KeyUsage::Decrypt))
        ));
        assert!(matches!(
            provider
                .import_key(KeyFormat::Raw, &[7u8; 32], Algorithm::AesGcm, false, &[KeyUsage::Sign])
                .await,
            Err(ProviderError::InvalidUsage(KeyUsage::Sign))
        ));
    }

    #[tokio::test]
    async fn test_aead_fails_closed() {
        let provider = NativeProvider::new();
        let key = provider
            .import_key(
                KeyFormat::Raw,
                &[9u8; 32],
                Algorithm::AesGcm,
                false,
                &[KeyUsage::Encrypt, KeyUsage::Decrypt],
            )
            .await
            .unwrap();
        let nonce = [1u8; NONCE_SIZE];
        let mut ciphertext = provider
            .encrypt(AeadParams { nonce: &nonce }, &key, b"payload")
            .await
            .unwrap();
        ciphertext[0] ^= 0x01;

        assert!(matches!(
            provider
                .decrypt(AeadParams { nonce: &nonce }, &key, &ciphertext)
                .await,
            Err(ProviderError::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_ed25519_sign_verify() {
        let provider = NativeProvider::new();
        let pair = provider
            .generate_key_pair(Algorithm::Ed25519, false, &[KeyUsage::Sign, KeyUsage::Verify])
            .await
            .unwrap();
        assert_eq!(pair.private.usages(), &[KeyUsage::Sign]);
        assert_eq!(pair.public.usages(), &[KeyUsage::Verify]);
        let signature = provider
            .sign(Algorithm::Ed25519, &pair.private, b"message")
            .await
            .unwrap();
        assert_eq!(signature.len(), SIGNATURE_SIZE);

        assert!(provider
            .verify(Algorithm::Ed25519, &pair.public, &signature, b"message")
            .await
            .unwrap());
        assert!(!provider
            .verify(Algorithm::Ed25519, &pair.public, &signature, b"massage")
            .await
            .unwrap());
        assert!(!provider
            .verify(Algorithm::Ed25519, &pair.public, &signature[..63], b"message")
            .await
            .unwrap());
    }
}
