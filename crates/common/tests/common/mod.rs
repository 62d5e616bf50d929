//! Shared test utilities for channel integration tests
#![allow(dead_code)]

#[cfg(feature = "native")]
pub use native_helpers::*;

/// Install a test subscriber once; respects `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(feature = "native")]
mod native_helpers {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use common::crypto::{KeyExchange, Role};
    use common::provider::{
        AeadParams, Algorithm, CryptoKey, CryptoProvider, DeriveParams, KeyFormat, KeyPair,
        KeyUsage, NativeProvider, ProviderError,
    };

    /// Native provider that counts key pair generations and can slow them down
    #[derive(Debug, Default)]
    pub struct CountingProvider {
        inner: NativeProvider,
        delay: Duration,
        generated: AtomicUsize,
    }

    impl CountingProvider {
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        pub fn generated(&self) -> usize {
            self.generated.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CryptoProvider for CountingProvider {
        async fn generate_key_pair(
            &self,
            algorithm: Algorithm,
            extractable: bool,
            usages: &[KeyUsage],
        ) -> Result<KeyPair, ProviderError> {
            self.generated.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.inner
                .generate_key_pair(algorithm, extractable, usages)
                .await
        }

        async fn import_key(
            &self,
            format: KeyFormat,
            data: &[u8],
            algorithm: Algorithm,
            extractable: bool,
            usages: &[KeyUsage],
        ) -> Result<CryptoKey, ProviderError> {
            self.inner
                .import_key(format, data, algorithm, extractable, usages)
                .await
        }

        async fn export_key(
            &self,
            format: KeyFormat,
            key: &CryptoKey,
        ) -> Result<Vec<u8>, ProviderError> {
            self.inner.export_key(format, key).await
        }

        async fn derive_bits(
            &self,
            params: DeriveParams<'_>,
            base_key: &CryptoKey,
            length: usize,
        ) -> Result<Vec<u8>, ProviderError> {
            self.inner.derive_bits(params, base_key, length).await
        }

        async fn encrypt(
            &self,
            params: AeadParams<'_>,
            key: &CryptoKey,
            data: &[u8],
        ) -> Result<Vec<u8>, ProviderError> {
            self.inner.encrypt(params, key, data).await
        }

        async fn decrypt(
            &self,
            params: AeadParams<'_>,
            key: &CryptoKey,
            data: &[u8],
        ) -> Result<Vec<u8>, ProviderError> {
            self.inner.decrypt(params, key, data).await
        }

        async fn sign(
            &self,
            algorithm: Algorithm,
            key: &CryptoKey,
            data: &[u8],
        ) -> Result<Vec<u8>, ProviderError> {
            self.inner.sign(algorithm, key, data).await
        }

        async fn verify(
            &self,
            algorithm: Algorithm,
            key: &CryptoKey,
            signature: &[u8],
            data: &[u8],
        ) -> Result<bool, ProviderError> {
            self.inner.verify(algorithm, key, signature, data).await
        }

        async fn random_bytes(&self, buf: &mut [u8]) -> Result<(), ProviderError> {
            self.inner.random_bytes(buf).await
        }
    }

    pub fn native() -> Arc<dyn CryptoProvider> {
        Arc::new(NativeProvider::new())
    }

    /// A client and a server that completed one handshake with each other
    pub async fn connected_pair() -> (KeyExchange, KeyExchange) {
        let client = KeyExchange::with_role(native(), Role::Client);
        let server = KeyExchange::with_role(native(), Role::Server);

        let server_public = server.offer_key().await.unwrap();
        let client_public = client.generate_key(&server_public).await.unwrap();
        server.generate_key(&client_public).await.unwrap();

        (client, server)
    }
}
