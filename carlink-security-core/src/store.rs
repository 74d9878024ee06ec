//! Certificate resolution and key derivation.

use std::sync::Arc;

use crate::brand::Brand;
use crate::certificate::Certificate;
use crate::context::ApplicationIdentity;
use crate::error::{ModuleError, ModuleResult};
use crate::primitive::{KeyMaterial, SigningPrimitive, PRIMITIVE_DERIVATION_FAILED};

/// Host-supplied source of default certificates.
///
/// Platforms that ship the brand's connection certificate elsewhere (assets,
/// keychain) implement this; returning `None` falls back to the certificate
/// bundled for the brand.
///
/// The module holds none of its locks while calling the provider, so an
/// implementation may call back into the module.
#[uniffi::export(with_foreign)]
pub trait CertificateProvider: Send + Sync {
    /// Returns the default certificate for an application, if the platform
    /// has one.
    fn default_certificate(
        &self,
        brand: Brand,
        package_name: String,
        application_name: String,
    ) -> Option<Vec<u8>>;
}

/// Maps application identities to certificate and key material.
pub struct KeyMaterialStore {
    primitive: Arc<dyn SigningPrimitive>,
    provider: Option<Arc<dyn CertificateProvider>>,
}

impl KeyMaterialStore {
    pub(crate) const fn new(
        primitive: Arc<dyn SigningPrimitive>,
        provider: Option<Arc<dyn CertificateProvider>>,
    ) -> Self {
        Self {
            primitive,
            provider,
        }
    }

    /// Default certificate and its key for `identity` under `brand`.
    ///
    /// # Errors
    ///
    /// [`ModuleError::InvalidCertificate`] if the provider hands out malformed
    /// bytes, [`ModuleError::PrimitiveFailure`] if derivation fails.
    pub(crate) fn resolve_default(
        &self,
        brand: Brand,
        identity: &ApplicationIdentity,
    ) -> ModuleResult<(Certificate, KeyMaterial)> {
        let provided = self.provider.as_ref().and_then(|provider| {
            provider.default_certificate(
                brand,
                identity.package_name.clone(),
                identity.application_name.clone(),
            )
        });
        let certificate = match provided {
            Some(bytes) => Certificate::parse(bytes)?,
            None => Certificate::bundled(brand),
        };
        let key = self.derive(brand, identity, &certificate)?;
        Ok((certificate, key))
    }

    /// Validates caller-supplied certificate bytes and derives their key.
    ///
    /// # Errors
    ///
    /// [`ModuleError::InvalidCertificate`] for malformed bytes,
    /// [`ModuleError::PrimitiveFailure`] if derivation fails.
    pub(crate) fn bind(
        &self,
        brand: Brand,
        identity: &ApplicationIdentity,
        certificate: Vec<u8>,
    ) -> ModuleResult<(Certificate, KeyMaterial)> {
        let certificate = Certificate::parse(certificate)?;
        let key = self.derive(brand, identity, &certificate)?;
        Ok((certificate, key))
    }

    fn derive(
        &self,
        brand: Brand,
        identity: &ApplicationIdentity,
        certificate: &Certificate,
    ) -> ModuleResult<KeyMaterial> {
        let key = self
            .primitive
            .derive(brand, identity, certificate.as_bytes())?;
        if key.is_empty() {
            return Err(ModuleError::PrimitiveFailure {
                code: PRIMITIVE_DERIVATION_FAILED,
                message: "primitive derived an empty key".to_string(),
            });
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrimitiveError;
    use crate::primitive::Ed25519Primitive;

    struct FixedProvider(Option<Vec<u8>>);

    impl CertificateProvider for FixedProvider {
        fn default_certificate(
            &self,
            _brand: Brand,
            _package_name: String,
            _application_name: String,
        ) -> Option<Vec<u8>> {
            self.0.clone()
        }
    }

    struct EmptyKeyPrimitive;

    impl SigningPrimitive for EmptyKeyPrimitive {
        fn derive(
            &self,
            _brand: Brand,
            _identity: &ApplicationIdentity,
            _certificate: &[u8],
        ) -> Result<KeyMaterial, PrimitiveError> {
            Ok(KeyMaterial::from_bytes(Vec::new()))
        }

        fn sign(&self, _key: &KeyMaterial, _message: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
            Ok(Vec::new())
        }

        fn signature_len(&self) -> usize {
            0
        }
    }

    fn identity() -> ApplicationIdentity {
        ApplicationIdentity::new("me.hufman", "test")
    }

    fn store(provider: Option<Vec<u8>>) -> KeyMaterialStore {
        KeyMaterialStore::new(
            Arc::new(Ed25519Primitive),
            Some(Arc::new(FixedProvider(provider))),
        )
    }

    #[test]
    fn test_falls_back_to_bundled_certificate() {
        let (cert, key) = store(None)
            .resolve_default(Brand::Mini, &identity())
            .expect("resolve");
        assert_eq!(cert, Certificate::bundled(Brand::Mini));
        assert_eq!(key.expose().len(), 32);
    }

    #[test]
    fn test_uses_provider_certificate() {
        let provided = vec![0x30, 0x03, 0x02, 0x01, 0x05];
        let (cert, _) = store(Some(provided.clone()))
            .resolve_default(Brand::Bmw, &identity())
            .expect("resolve");
        assert_eq!(cert.as_bytes(), provided.as_slice());
    }

    #[test]
    fn test_rejects_malformed_provider_certificate() {
        match store(Some(b"not a cert".to_vec())).resolve_default(Brand::Bmw, &identity()) {
            Err(ModuleError::InvalidCertificate { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let store = store(None);
        let cert = Certificate::bundled(Brand::Test).into_bytes();
        let (_, first) = store
            .bind(Brand::Test, &identity(), cert.clone())
            .expect("bind");
        let (_, second) = store.bind(Brand::Test, &identity(), cert).expect("bind");
        assert_eq!(first.expose(), second.expose());

        let (_, default) = store
            .resolve_default(Brand::Test, &identity())
            .expect("resolve");
        assert_eq!(first.expose(), default.expose());
    }

    #[test]
    fn test_bind_rejects_empty_certificate() {
        match store(None).bind(Brand::Test, &identity(), Vec::new()) {
            Err(ModuleError::InvalidCertificate { reason }) => assert!(reason.contains("empty")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_empty_derived_key_is_a_primitive_failure() {
        let store = KeyMaterialStore::new(Arc::new(EmptyKeyPrimitive), None);
        match store.resolve_default(Brand::Test, &identity()) {
            Err(ModuleError::PrimitiveFailure { code, .. }) => {
                assert_eq!(code, PRIMITIVE_DERIVATION_FAILED);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
