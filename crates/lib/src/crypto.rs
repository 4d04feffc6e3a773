//! Injected key material capability.
//!
//! Targets identify themselves to remote services with a key pair. The core
//! never generates keys itself; callers hand in a [`KeyPairGenerator`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
  #[error("key pair generation failed: {0}")]
  Generate(String),
}

/// PEM encoded key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
  pub private_pem: String,
  pub public_pem: String,
}

impl std::fmt::Debug for KeyPair {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("KeyPair")
      .field("private_pem", &"<redacted>")
      .field("public_pem", &self.public_pem)
      .finish()
  }
}

pub trait KeyPairGenerator: Send + Sync {
  fn create_key_pair(&self) -> Result<KeyPair, CryptoError>;
}
