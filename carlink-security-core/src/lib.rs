//! Device-side security module for connected car apps.
//!
//! A head unit accepts an application only after it answers a challenge with
//! a signature made by the application's certificate key. This crate keeps the
//! certificates and derived keys in per-application security contexts,
//! addressed by opaque handles, and signs challenges on request.
//!
//! ```rust
//! use carlink_security_core::SecurityModule;
//!
//! let module = SecurityModule::new();
//! module.init("bmw")?;
//! let handle = module.create_context("com.example.music", "Music")?;
//! let response = module.sign(handle, &[0u8; 16])?;
//! assert_eq!(response.len(), 64);
//! module.release_context(handle)?;
//! module.deinit();
//! # Ok::<(), carlink_security_core::ModuleError>(())
//! ```
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod brand;
pub use brand::Brand;

mod certificate;
pub use certificate::{Certificate, CertificateEncoding, CertificateKind};

mod config;
pub use config::{ModuleConfig, DEFAULT_MAX_CONTEXTS, MAX_CONTEXT_CAPACITY};

mod context;
pub use context::ApplicationIdentity;

mod error;
pub use error::{ModuleError, ModuleResult, PrimitiveError};

/// Foreign logging bridge.
pub mod logger;
pub use logger::{set_logger, LogLevel, Logger};

mod module;
pub use module::SecurityModule;

mod passphrase;
pub use passphrase::{decode_bundle_passphrase, decode_passphrase, PassphraseError};

mod primitive;
pub use primitive::{
    Ed25519Primitive, KeyMaterial, SigningPrimitive, PRIMITIVE_BAD_KEY,
    PRIMITIVE_DERIVATION_FAILED,
};

mod signer;
pub use signer::SIGNATURE_LENGTH_MISMATCH;

mod store;
pub use store::CertificateProvider;

// private modules
mod registry;

uniffi::setup_scaffolding!("carlink_security_core");
