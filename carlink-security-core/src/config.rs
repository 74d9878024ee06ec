use serde::{Deserialize, Serialize};

use crate::error::{ModuleError, ModuleResult};

/// Largest handle space a module can be configured with (16-bit slot index).
pub const MAX_CONTEXT_CAPACITY: u32 = 1 << 16;

/// Handle space used by [`ModuleConfig::default`].
pub const DEFAULT_MAX_CONTEXTS: u32 = 64;

/// Tunables for a [`SecurityModule`](crate::SecurityModule).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
#[serde(default, deny_unknown_fields)]
pub struct ModuleConfig {
    /// Number of security contexts that may be live at the same time.
    pub max_contexts: u32,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            max_contexts: DEFAULT_MAX_CONTEXTS,
        }
    }
}

impl ModuleConfig {
    /// Parses a JSON configuration document, filling unset fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidConfiguration`] if the document is not
    /// valid JSON, has unknown fields or fails [`ModuleConfig::validate`].
    pub fn from_json(json: &str) -> ModuleResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| ModuleError::InvalidConfiguration {
                reason: format!("config: {err}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the handle space fits the handle encoding.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidConfiguration`] when `max_contexts` is zero
    /// or larger than [`MAX_CONTEXT_CAPACITY`].
    pub fn validate(&self) -> ModuleResult<()> {
        if self.max_contexts == 0 || self.max_contexts > MAX_CONTEXT_CAPACITY {
            return Err(ModuleError::InvalidConfiguration {
                reason: format!(
                    "max_contexts must be within 1..={MAX_CONTEXT_CAPACITY}, got {}",
                    self.max_contexts
                ),
            });
        }
        Ok(())
    }
}
