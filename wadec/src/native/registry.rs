//! Process-wide cache of instantiated cores, keyed by module identity.
//!
//! Instantiating a core means inflating its embedded image and compiling
//! it, so every decoder built from the same module shares one instance.
//! Instances live until [`CoreRegistry::teardown`] is called.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, info};

use super::SharedCore;
use crate::resource::load_resource;
use crate::utils::errors::CoreError;

/// Something that can produce a core instance.
pub trait CoreModule {
    type Core;

    /// Stable identity of the module; equal ids share one instance.
    fn id(&self) -> &str;

    fn instantiate(&self) -> Result<Self::Core, CoreError>;
}

/// A core whose compiled image is embedded as armored text.
///
/// `instantiate` receives the inflated image and turns it into a live core.
pub struct EmbeddedModule<C> {
    id: &'static str,
    source: &'static str,
    instantiate: fn(Vec<u8>) -> anyhow::Result<C>,
}

impl<C> EmbeddedModule<C> {
    pub const fn new(
        id: &'static str,
        source: &'static str,
        instantiate: fn(Vec<u8>) -> anyhow::Result<C>,
    ) -> Self {
        Self {
            id,
            source,
            instantiate,
        }
    }
}

impl<C> CoreModule for EmbeddedModule<C> {
    type Core = C;

    fn id(&self) -> &str {
        self.id
    }

    fn instantiate(&self) -> Result<C, CoreError> {
        let image = load_resource(self.source).map_err(|source| {
            error!("Embedded core {} is corrupt: {source}", self.id);
            CoreError::Bootstrap {
                module: self.id.to_string(),
                source,
            }
        })?;

        (self.instantiate)(image).map_err(|source| CoreError::Instantiate {
            module: self.id.to_string(),
            source,
        })
    }
}

pub struct CoreRegistry<C> {
    cores: Mutex<BTreeMap<String, SharedCore<C>>>,
}

impl<C> Default for CoreRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CoreRegistry<C> {
    /// Usable in a `static`.
    pub const fn new() -> Self {
        Self {
            cores: Mutex::new(BTreeMap::new()),
        }
    }

    // entries are only ever inserted whole, so a poisoned map is still valid
    fn cores(&self) -> MutexGuard<'_, BTreeMap<String, SharedCore<C>>> {
        self.cores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cached instance for `module`, instantiating it on first use.
    ///
    /// Concurrent first calls for one module instantiate it once.
    pub fn get_or_create<M>(&self, module: &M) -> Result<SharedCore<C>, CoreError>
    where
        M: CoreModule<Core = C> + ?Sized,
    {
        let mut cores = self.cores();
        if let Some(core) = cores.get(module.id()) {
            return Ok(Arc::clone(core));
        }

        let core = Arc::new(Mutex::new(module.instantiate()?));
        cores.insert(module.id().to_string(), Arc::clone(&core));
        info!("Instantiated core module {}", module.id());

        Ok(core)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.cores().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.cores().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cores().is_empty()
    }

    /// Drops the registry's reference to every instance. Decoders still
    /// holding an instance keep it alive until they are dropped.
    pub fn teardown(&self) -> usize {
        let released = std::mem::take(&mut *self.cores());
        if !released.is_empty() {
            info!("Released {} core instances", released.len());
        }
        released.len()
    }
}
