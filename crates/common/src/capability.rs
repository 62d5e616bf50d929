//! Process-wide capability provider registry
//!
//! Components acquire their provider exactly once, during initialization.
//! A host may [`install`] its own provider before first use; otherwise the
//! bundled [`NativeProvider`](crate::provider::NativeProvider) is used when
//! the `native` feature is enabled. With neither available, acquisition
//! yields `None` and component initialization fails with `NotInitialized`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{const_rwlock, RwLock};

use crate::provider::CryptoProvider;

static INSTALLED: RwLock<Option<Arc<dyn CryptoProvider>>> = const_rwlock(None);
static ACQUISITIONS: AtomicUsize = AtomicUsize::new(0);

/// Install the provider later acquisitions will hand out.
///
/// Components that already acquired a provider keep theirs.
pub fn install(provider: Arc<dyn CryptoProvider>) {
    tracing::info!(?provider, "installing capability provider");
    *INSTALLED.write() = Some(provider);
}

/// Remove an installed provider, returning it
pub fn uninstall() -> Option<Arc<dyn CryptoProvider>> {
    INSTALLED.write().take()
}

/// Acquire a capability handle
pub fn acquire() -> Option<Arc<dyn CryptoProvider>> {
    ACQUISITIONS.fetch_add(1, Ordering::Relaxed);
    if let Some(provider) = INSTALLED.read().as_ref() {
        return Some(provider.clone());
    }
    default_provider()
}

/// Number of acquisitions made by this process so far
pub fn acquisitions() -> usize {
    ACQUISITIONS.load(Ordering::Relaxed)
}

#[cfg(feature = "native")]
fn default_provider() -> Option<Arc<dyn CryptoProvider>> {
    Some(Arc::new(crate::provider::NativeProvider::new()))
}

#[cfg(not(feature = "native"))]
fn default_provider() -> Option<Arc<dyn CryptoProvider>> {
    tracing::warn!("no capability provider installed and the native provider is disabled");
    None
}
