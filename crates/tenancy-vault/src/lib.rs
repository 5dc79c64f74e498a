//! Tenancy Vault - secrets at rest
//!
//! Tenant credentials (database and mail passwords, gateway keys) are stored
//! in the platform store as AES-256-GCM blobs. The working key is the SHA-256
//! digest of an operator-supplied master secret, so every instance provisioned
//! with the same secret derives the same key.
//!
//! ```text
//! blob = base64( nonce[12] || ciphertext || tag[16] )
//! ```

#![warn(missing_docs)]

pub mod cipher;

pub use cipher::{CipherError, SecretCipher, NONCE_SIZE, TAG_SIZE};
