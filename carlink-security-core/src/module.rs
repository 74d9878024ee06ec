use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::brand::Brand;
use crate::config::{ModuleConfig, DEFAULT_MAX_CONTEXTS};
use crate::context::{ApplicationIdentity, ContextHandle, SecurityContext};
use crate::error::{ModuleError, ModuleResult};
use crate::primitive::{Ed25519Primitive, SigningPrimitive};
use crate::registry::ContextRegistry;
use crate::signer::Signer;
use crate::store::{CertificateProvider, KeyMaterialStore};

/// The security module as seen by the host application.
///
/// A module starts uninitialized. [`SecurityModule::init`] selects the brand;
/// after that, contexts can be created for applications, loaded with
/// certificates and used to answer challenges from the car. Every method may
/// be called from any thread.
///
/// Handles stay unique for the lifetime of the module: a handle that was
/// released, or that was live when [`SecurityModule::deinit`] ran, is
/// rejected forever, including after a later `init`.
#[derive(uniffi::Object)]
pub struct SecurityModule {
    brand: RwLock<Option<Brand>>,
    registry: ContextRegistry,
    store: KeyMaterialStore,
    signer: Signer,
}

impl SecurityModule {
    fn build(
        capacity: u32,
        primitive: Arc<dyn SigningPrimitive>,
        provider: Option<Arc<dyn CertificateProvider>>,
    ) -> Self {
        Self {
            brand: RwLock::new(None),
            registry: ContextRegistry::new(capacity),
            store: KeyMaterialStore::new(Arc::clone(&primitive), provider),
            signer: Signer::new(primitive),
        }
    }

    /// Creates a module backed by a custom signing primitive.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidConfiguration`] if `config` is invalid.
    pub fn with_primitive(
        config: &ModuleConfig,
        primitive: Arc<dyn SigningPrimitive>,
        provider: Option<Arc<dyn CertificateProvider>>,
    ) -> ModuleResult<Self> {
        config.validate()?;
        Ok(Self::build(config.max_contexts, primitive, provider))
    }

    fn read_brand(&self) -> RwLockReadGuard<'_, Option<Brand>> {
        self.brand.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_brand(&self) -> RwLockWriteGuard<'_, Option<Brand>> {
        self.brand.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the current brand, holding off `init`/`deinit` until it
    /// returns.
    fn initialized<T>(&self, f: impl FnOnce(Brand) -> ModuleResult<T>) -> ModuleResult<T> {
        let guard = self.read_brand();
        let brand = (*guard).ok_or(ModuleError::NotInitialized)?;
        let result = f(brand);
        drop(guard);
        result
    }

    /// Resolves the default certificate with no lock held, then inserts the
    /// context if the module still runs under the brand it was resolved for.
    fn create_default_context(&self, identity: &ApplicationIdentity) -> ModuleResult<u32> {
        loop {
            let brand = self.brand()?;
            let (certificate, key) = self.store.resolve_default(brand, identity)?;
            log::debug!(
                "default certificate for {identity}: sha256 {}",
                certificate.fingerprint()
            );
            let inserted = self.initialized(|current| {
                if current != brand {
                    return Ok(None);
                }
                let handle = self.registry.insert(SecurityContext::new(
                    identity.clone(),
                    certificate,
                    key,
                ))?;
                Ok(Some(handle))
            })?;
            match inserted {
                Some(handle) => {
                    log::info!("context {handle} created for {identity}");
                    return Ok(handle.raw());
                }
                None => log::debug!("brand switched from {brand} while resolving {identity}"),
            }
        }
    }
}

impl Default for SecurityModule {
    fn default() -> Self {
        Self::build(DEFAULT_MAX_CONTEXTS, Arc::new(Ed25519Primitive), None)
    }
}

#[uniffi::export]
impl SecurityModule {
    /// Creates an uninitialized module with the default configuration and
    /// the built-in Ed25519 primitive.
    #[uniffi::constructor]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an uninitialized module with `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidConfiguration`] if `config` is invalid.
    #[uniffi::constructor]
    #[allow(clippy::needless_pass_by_value)]
    pub fn with_config(config: ModuleConfig) -> ModuleResult<Self> {
        Self::with_primitive(&config, Arc::new(Ed25519Primitive), None)
    }

    /// Creates an uninitialized module whose default certificates come from
    /// `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidConfiguration`] if `config` is invalid.
    #[uniffi::constructor]
    #[allow(clippy::needless_pass_by_value)]
    pub fn with_provider(
        config: ModuleConfig,
        provider: Arc<dyn CertificateProvider>,
    ) -> ModuleResult<Self> {
        Self::with_primitive(&config, Arc::new(Ed25519Primitive), Some(provider))
    }

    /// Initializes the module for `brand_name` (`bmw`, `mini` or `test`,
    /// case-insensitive).
    ///
    /// Calling `init` again switches the brand. Live contexts keep the
    /// material they were bound with; new contexts and certificate loads use
    /// the new brand.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidConfiguration`] for an unknown brand. The
    /// module state is unchanged in that case.
    pub fn init(&self, brand_name: &str) -> ModuleResult<()> {
        log::info!("init({brand_name})");
        let brand = Brand::parse(brand_name).inspect_err(|err| log::warn!("init failed: {err}"))?;
        let previous = self.write_brand().replace(brand);
        if let Some(previous) = previous.filter(|previous| *previous != brand) {
            log::info!("brand switched from {previous} to {brand}");
        }
        Ok(())
    }

    /// Releases every live context and returns the module to the
    /// uninitialized state. Does nothing if the module is not initialized.
    pub fn deinit(&self) {
        let mut brand = self.write_brand();
        if brand.take().is_none() {
            log::debug!("deinit on uninitialized module");
            return;
        }
        let released = self.registry.clear();
        drop(brand);
        log::info!("deinit released {released} context(s)");
    }

    /// Creates a security context for an application, bound to the brand's
    /// default certificate, and returns its handle.
    ///
    /// # Errors
    ///
    /// [`ModuleError::NotInitialized`] before `init`,
    /// [`ModuleError::ResourceExhausted`] when no handle is available, or the
    /// certificate/primitive error from resolving the default certificate.
    pub fn create_context(&self, package_name: &str, application_name: &str) -> ModuleResult<u32> {
        let identity = ApplicationIdentity::new(package_name, application_name);
        log::info!("create_context({identity})");
        self.create_default_context(&identity)
            .inspect_err(|err| log::warn!("create_context({identity}) failed: {err}"))
    }

    /// Zeroizes and releases the context behind `handle`.
    ///
    /// # Errors
    ///
    /// [`ModuleError::NotInitialized`] before `init`, or
    /// [`ModuleError::InvalidHandle`] if the handle is unknown or already
    /// released.
    pub fn release_context(&self, handle: u32) -> ModuleResult<()> {
        let handle = ContextHandle::from_raw(handle);
        log::info!("release_context({handle})");
        self.initialized(|_| self.registry.remove(handle))
            .inspect_err(|err| log::warn!("release_context({handle}) failed: {err}"))
    }

    /// Replaces the certificate of a context and re-derives its key.
    ///
    /// On failure the context keeps its previous certificate and key.
    ///
    /// # Errors
    ///
    /// [`ModuleError::NotInitialized`], [`ModuleError::InvalidHandle`],
    /// [`ModuleError::InvalidCertificate`] for malformed bytes or
    /// [`ModuleError::PrimitiveFailure`] if derivation fails.
    pub fn load_certificate(&self, handle: u32, certificate: &[u8]) -> ModuleResult<()> {
        let handle = ContextHandle::from_raw(handle);
        log::info!("load_certificate({handle}, {} bytes)", certificate.len());
        self.initialized(|brand| {
            self.registry.with_context(handle, |context| {
                let (certificate, key) =
                    self.store
                        .bind(brand, context.identity(), certificate.to_vec())?;
                log::info!(
                    "context {handle} bound to {:?} certificate sha256 {}",
                    certificate.kind(),
                    certificate.fingerprint()
                );
                context.rebind(certificate, key);
                Ok(())
            })
        })
        .inspect_err(|err| log::warn!("load_certificate({handle}) failed: {err}"))
    }

    /// Returns the certificate bound to a context, byte for byte as loaded.
    ///
    /// # Errors
    ///
    /// [`ModuleError::NotInitialized`] or [`ModuleError::InvalidHandle`].
    pub fn retrieve_certificate(&self, handle: u32) -> ModuleResult<Vec<u8>> {
        let handle = ContextHandle::from_raw(handle);
        log::info!("retrieve_certificate({handle})");
        self.initialized(|_| {
            self.registry.with_context(handle, |context| {
                context
                    .certificate()
                    .map(|certificate| certificate.as_bytes().to_vec())
                    .ok_or_else(|| ModuleError::InvalidHandle {
                        handle: handle.raw(),
                    })
            })
        })
        .inspect_err(|err| log::warn!("retrieve_certificate({handle}) failed: {err}"))
    }

    /// Signs a challenge from the car with the context's key.
    ///
    /// The challenge may be empty or of any length; the response always has
    /// [`SecurityModule::signature_length`] bytes.
    ///
    /// # Errors
    ///
    /// [`ModuleError::NotInitialized`], [`ModuleError::InvalidHandle`] or
    /// [`ModuleError::PrimitiveFailure`].
    pub fn sign(&self, handle: u32, challenge: &[u8]) -> ModuleResult<Vec<u8>> {
        let handle = ContextHandle::from_raw(handle);
        log::info!("sign({handle}, {} byte challenge)", challenge.len());
        self.initialized(|_| {
            self.registry.with_context(handle, |context| {
                let released = || ModuleError::InvalidHandle {
                    handle: handle.raw(),
                };
                let certificate = context.certificate().ok_or_else(released)?;
                let key = context.key_material().ok_or_else(released)?;
                log::debug!("signing for {} with {:?}", context.identity(), certificate);
                self.signer.sign(certificate, key, challenge)
            })
        })
        .inspect_err(|err| log::warn!("sign({handle}) failed: {err}"))
    }

    /// The brand selected by the last `init`.
    ///
    /// # Errors
    ///
    /// [`ModuleError::NotInitialized`] if the module is not initialized.
    pub fn brand(&self) -> ModuleResult<Brand> {
        (*self.read_brand()).ok_or(ModuleError::NotInitialized)
    }

    /// Number of live security contexts.
    #[must_use]
    pub fn live_contexts(&self) -> u32 {
        u32::try_from(self.registry.len()).unwrap_or(u32::MAX)
    }

    /// Length in bytes of every response produced by [`SecurityModule::sign`].
    #[must_use]
    pub fn signature_length(&self) -> u32 {
        u32::try_from(self.signer.signature_len()).unwrap_or(u32::MAX)
    }
}
