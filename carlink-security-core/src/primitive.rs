//! Cryptographic primitive consumed by the key store and the signer.
//!
//! The module only relies on the [`SigningPrimitive`] contract: derivation is
//! a pure function of (brand, identity, certificate) and signing is a pure
//! function of (key, message) with a fixed output length.

use ed25519_dalek::{Signer as _, SigningKey, SECRET_KEY_LENGTH, SIGNATURE_LENGTH};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::brand::Brand;
use crate::context::ApplicationIdentity;
use crate::error::PrimitiveError;

/// HKDF salt for context key derivation.
const LABEL_CONTEXT_KEY_SALT: &[u8] = b"carlink-security:context-key";

/// HKDF info prefix; bump the version to rotate every derived key.
const LABEL_CONTEXT_KEY_INFO: &[u8] = b"carlink-security:v1";

/// Key derivation produced an unusable output.
pub const PRIMITIVE_DERIVATION_FAILED: i32 = 1;
/// Key material does not fit the primitive's key type.
pub const PRIMITIVE_BAD_KEY: i32 = 2;

/// Secret key bytes bound to a security context.
///
/// Zeroized on drop and by [`KeyMaterial::wipe`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial(Vec<u8>);

impl KeyMaterial {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes. Treat this as sensitive material.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    /// Whether the key has been wiped (or was never set).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrites the key bytes with zeros and empties the buffer.
    pub fn wipe(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// External cryptographic primitive.
pub trait SigningPrimitive: Send + Sync {
    /// Derives the signing key for an application under a certificate.
    ///
    /// Identical inputs must always produce identical key material.
    ///
    /// # Errors
    ///
    /// Returns a [`PrimitiveError`] if the primitive cannot derive a key.
    fn derive(
        &self,
        brand: Brand,
        identity: &ApplicationIdentity,
        certificate: &[u8],
    ) -> Result<KeyMaterial, PrimitiveError>;

    /// Signs `message` with `key`. Must be deterministic and must not mutate
    /// the key.
    ///
    /// # Errors
    ///
    /// Returns a [`PrimitiveError`] if the key is unusable or signing fails.
    fn sign(&self, key: &KeyMaterial, message: &[u8]) -> Result<Vec<u8>, PrimitiveError>;

    /// Length of every signature produced by [`SigningPrimitive::sign`].
    fn signature_len(&self) -> usize;
}

/// Default primitive: HKDF-SHA256 key derivation and Ed25519 signatures.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Primitive;

impl Ed25519Primitive {
    /// Builds the HKDF info string.
    ///
    /// ```text
    /// info = "carlink-security:v1" || lp(brand) || lp(package) || lp(application)
    /// lp(x) = u32_be(len(x)) || x
    /// ```
    fn derivation_info(
        brand: Brand,
        identity: &ApplicationIdentity,
    ) -> Result<Vec<u8>, PrimitiveError> {
        let fields = [
            brand.as_label().as_bytes(),
            identity.package_name.as_bytes(),
            identity.application_name.as_bytes(),
        ];
        let mut info = Vec::with_capacity(
            LABEL_CONTEXT_KEY_INFO.len() + fields.iter().map(|f| f.len() + 4).sum::<usize>(),
        );
        info.extend_from_slice(LABEL_CONTEXT_KEY_INFO);
        for field in fields {
            let len = u32::try_from(field.len()).map_err(|_| {
                PrimitiveError::new(PRIMITIVE_DERIVATION_FAILED, "identity field too long")
            })?;
            info.extend_from_slice(&len.to_be_bytes());
            info.extend_from_slice(field);
        }
        Ok(info)
    }

    fn signing_key(key: &KeyMaterial) -> Result<SigningKey, PrimitiveError> {
        let seed: &[u8; SECRET_KEY_LENGTH] = key.expose().try_into().map_err(|_| {
            PrimitiveError::new(
                PRIMITIVE_BAD_KEY,
                format!(
                    "expected {SECRET_KEY_LENGTH} byte Ed25519 seed, got {}",
                    key.expose().len()
                ),
            )
        })?;
        Ok(SigningKey::from_bytes(seed))
    }
}

impl SigningPrimitive for Ed25519Primitive {
    fn derive(
        &self,
        brand: Brand,
        identity: &ApplicationIdentity,
        certificate: &[u8],
    ) -> Result<KeyMaterial, PrimitiveError> {
        let info = Self::derivation_info(brand, identity)?;
        let hkdf = Hkdf::<Sha256>::new(Some(LABEL_CONTEXT_KEY_SALT), certificate);
        let mut seed = vec![0u8; SECRET_KEY_LENGTH];
        hkdf.expand(&info, &mut seed).map_err(|err| {
            PrimitiveError::new(PRIMITIVE_DERIVATION_FAILED, format!("hkdf expand: {err}"))
        })?;
        Ok(KeyMaterial::from_bytes(seed))
    }

    fn sign(&self, key: &KeyMaterial, message: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        let signing_key = Self::signing_key(key)?;
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn signature_len(&self) -> usize {
        SIGNATURE_LENGTH
    }
}
