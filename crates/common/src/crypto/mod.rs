//! Secure channel primitives
//!
//! This module orchestrates the two cooperating components built on top of
//! a [`CryptoProvider`](crate::provider::CryptoProvider):
//!
//! - **Key exchange**: ephemeral X25519 handshake producing a pair of
//!   directional AES-256-GCM keys
//! - **Signatures**: a long-lived Ed25519 identity plus a single, rotatable
//!   trusted remote verification key
//!
//! # Handshake
//!
//! 1. Generate a fresh, non-extractable X25519 keypair
//! 2. Derive 256 shared bits with the remote public key
//! 3. Expand them twice with HKDF-SHA-256 (all-zero 32 byte salt), once per
//!    direction, with info `label || base64(ephemeral public key)`
//! 4. Import both outputs as AES-256-GCM keys: TX from `client-to-server`,
//!    RX from `server-to-client`
//! 5. Hand the local ephemeral public key (base64) back to the caller
//!
//! A server answers with the keypair it published through
//! [`KeyExchange::offer_key`]; it cannot answer without one.
//!
//! The info string binds each derived key to a single handshake, so a peer
//! reusing its own key still gets fresh session keys every time.
//!
//! # Envelope
//!
//! Every encryption draws a fresh 12 byte nonce. The nonce travels next to
//! the ciphertext and must be handed back unchanged for decryption. There is
//! no associated data and no sequencing: envelopes can be replayed or
//! reordered by anyone on the path, and callers that care must layer that
//! on top.

mod key_exchange;
mod signature;

pub use key_exchange::{Envelope, KeyExchange, KeyExchangeError, Role};
pub use signature::{SignatureError, Signer};

/// Direction label for traffic originated by the client
pub const CLIENT_TO_SERVER: &str = "client-to-server";
/// Direction label for traffic originated by the server
pub const SERVER_TO_CLIENT: &str = "server-to-client";
/// HKDF salt shared by both directions
pub const HKDF_SALT: [u8; 32] = [0; 32];
/// Bits drawn from both the Diffie-Hellman step and each HKDF expansion
pub const DERIVED_KEY_BITS: usize = 256;
/// AES-GCM nonce size in bytes
pub const NONCE_SIZE: usize = 12;
/// Raw X25519 / Ed25519 public key size in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Ed25519 signature size in bytes
pub const SIGNATURE_SIZE: usize = 64;
