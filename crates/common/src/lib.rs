/**
 * Deterministic wire codecs: base64, fixed-width
 *  big-endian integers and buffered copies.
 */
pub mod codec;
/**
 * The capability provider surface the protocol
 *  components drive, plus the bundled native
 *  provider.
 */
pub mod provider;
/**
 * Process-wide provider registry. Hosts install
 *  their provider here before first use.
 */
pub mod capability;
/**
 * Secure channel components.
 *  - Ephemeral key exchange and AEAD envelopes
 *  - Ed25519 signatures with remote key rotation
 */
pub mod crypto;
pub mod singleton;

pub mod prelude {
    pub use crate::codec::{decode_base64, encode_base64, CodecError};
    pub use crate::crypto::{Envelope, KeyExchange, KeyExchangeError, Role, SignatureError, Signer};
    pub use crate::provider::{CryptoProvider, ProviderError};
}
