use std::fmt;

use crate::certificate::Certificate;
use crate::primitive::KeyMaterial;

/// The application a security context authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplicationIdentity {
    /// Package name of the calling application.
    pub package_name: String,
    /// Application name announced to the car.
    pub application_name: String,
}

impl ApplicationIdentity {
    /// Creates an identity from its package and application names.
    #[must_use]
    pub fn new(package_name: impl Into<String>, application_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            application_name: application_name.into(),
        }
    }
}

impl fmt::Display for ApplicationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package_name, self.application_name)
    }
}

/// Generation-tagged handle: `generation << 16 | slot index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(u32);

impl ContextHandle {
    pub(crate) fn new(index: u16, generation: u16) -> Self {
        Self((u32::from(generation) << 16) | u32::from(index))
    }

    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub(crate) const fn raw(self) -> u32 {
        self.0
    }

    pub(crate) const fn index(self) -> u16 {
        let [_, _, hi, lo] = self.0.to_be_bytes();
        u16::from_be_bytes([hi, lo])
    }

    pub(crate) const fn generation(self) -> u16 {
        let [hi, lo, _, _] = self.0.to_be_bytes();
        u16::from_be_bytes([hi, lo])
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Certificate and derived key, always replaced together.
struct Binding {
    certificate: Certificate,
    key: KeyMaterial,
}

/// Per-application certificate and key material.
///
/// A context without a binding has been released and must not be used.
pub struct SecurityContext {
    identity: ApplicationIdentity,
    binding: Option<Binding>,
}

impl SecurityContext {
    pub(crate) const fn new(
        identity: ApplicationIdentity,
        certificate: Certificate,
        key: KeyMaterial,
    ) -> Self {
        Self {
            identity,
            binding: Some(Binding { certificate, key }),
        }
    }

    pub(crate) const fn identity(&self) -> &ApplicationIdentity {
        &self.identity
    }

    pub(crate) const fn is_live(&self) -> bool {
        self.binding.is_some()
    }

    pub(crate) fn certificate(&self) -> Option<&Certificate> {
        self.binding.as_ref().map(|binding| &binding.certificate)
    }

    pub(crate) fn key_material(&self) -> Option<&KeyMaterial> {
        self.binding.as_ref().map(|binding| &binding.key)
    }

    /// Replaces certificate and key. The previous key is zeroized.
    pub(crate) fn rebind(&mut self, certificate: Certificate, key: KeyMaterial) {
        if let Some(mut previous) = self.binding.replace(Binding { certificate, key }) {
            previous.key.wipe();
        }
    }

    /// Zeroizes the key and drops the certificate.
    pub(crate) fn wipe(&mut self) {
        if let Some(mut binding) = self.binding.take() {
            binding.key.wipe();
        }
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("identity", &self.identity)
            .field("certificate", &self.certificate())
            .field("live", &self.is_live())
            .finish_non_exhaustive()
    }
}
