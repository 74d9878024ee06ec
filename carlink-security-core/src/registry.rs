//! Handle table for live security contexts.
//!
//! Slots are addressed by a 16-bit index and tagged with a 16-bit generation
//! that advances every time the slot is vacated, so a stale handle never
//! resolves to a newer context. A slot whose generation is exhausted is
//! retired instead of wrapping around.

#![allow(clippy::significant_drop_tightening)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::context::{ContextHandle, SecurityContext};
use crate::error::{ModuleError, ModuleResult};

const FIRST_GENERATION: u16 = 1;

type SharedContext = Arc<Mutex<SecurityContext>>;

struct Slot {
    generation: u16,
    context: Option<SharedContext>,
}

impl Slot {
    /// Moves the slot to its next generation. Returns `false` once the slot
    /// is retired.
    const fn advance(&mut self) -> bool {
        match self.generation.checked_add(1) {
            Some(next) => {
                self.generation = next;
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
struct Table {
    slots: Vec<Slot>,
    free: VecDeque<u16>,
    live: usize,
}

impl Table {
    /// Takes the context out of the slot addressed by `handle`.
    fn take(&mut self, handle: ContextHandle) -> Option<SharedContext> {
        let index = handle.index();
        let slot = self
            .slots
            .get_mut(usize::from(index))
            .filter(|slot| slot.generation == handle.generation())?;
        let shared = slot.context.take()?;
        if slot.advance() {
            self.free.push_back(index);
        }
        self.live -= 1;
        Some(shared)
    }

    /// Takes every live context out of the table, advancing each vacated
    /// slot.
    fn drain(&mut self) -> Vec<SharedContext> {
        let mut drained = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(shared) = slot.context.take() else {
                continue;
            };
            if slot.advance() {
                if let Ok(index) = u16::try_from(index) {
                    self.free.push_back(index);
                }
            }
            drained.push(shared);
        }
        self.live = 0;
        drained
    }
}

/// Registry of live contexts keyed by generation-tagged handles.
///
/// Structural changes take the table write lock; operations on a context take
/// the table read lock only long enough to clone the context out, then lock
/// that context alone.
pub struct ContextRegistry {
    table: RwLock<Table>,
    capacity: u32,
}

impl ContextRegistry {
    /// `capacity` must already be validated against the 16-bit index space.
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            capacity,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Table> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(shared: &SharedContext) -> MutexGuard<'_, SecurityContext> {
        shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `context` and returns its handle. Vacated slots are reused
    /// oldest first.
    pub(crate) fn insert(&self, context: SecurityContext) -> ModuleResult<ContextHandle> {
        let exhausted = || ModuleError::ResourceExhausted {
            capacity: self.capacity,
        };

        let mut table = self.write();
        let index = if let Some(index) = table.free.pop_front() {
            index
        } else if u32::try_from(table.slots.len()).map_err(|_| exhausted())? < self.capacity {
            let index = u16::try_from(table.slots.len()).map_err(|_| exhausted())?;
            table.slots.push(Slot {
                generation: FIRST_GENERATION,
                context: None,
            });
            index
        } else {
            return Err(exhausted());
        };

        let slot = &mut table.slots[usize::from(index)];
        slot.context = Some(Arc::new(Mutex::new(context)));
        let handle = ContextHandle::new(index, slot.generation);
        table.live += 1;
        Ok(handle)
    }

    fn resolve(&self, handle: ContextHandle) -> ModuleResult<SharedContext> {
        self.read()
            .slots
            .get(usize::from(handle.index()))
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.context.clone())
            .ok_or_else(|| ModuleError::InvalidHandle {
                handle: handle.raw(),
            })
    }

    /// Runs `f` with exclusive access to the live context behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidHandle`] if the handle is unknown, stale
    /// or was released while this call waited for the context; otherwise
    /// whatever `f` returns.
    pub(crate) fn with_context<T>(
        &self,
        handle: ContextHandle,
        f: impl FnOnce(&mut SecurityContext) -> ModuleResult<T>,
    ) -> ModuleResult<T> {
        let shared = self.resolve(handle)?;
        let mut context = Self::lock(&shared);
        if !context.is_live() {
            return Err(ModuleError::InvalidHandle {
                handle: handle.raw(),
            });
        }
        f(&mut context)
    }

    /// Unlinks and wipes the context behind `handle`.
    ///
    /// The handle stops resolving before the wipe starts; the wipe waits for
    /// any call already holding the context and completes before returning.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidHandle`] if the handle is unknown or
    /// already released.
    pub(crate) fn remove(&self, handle: ContextHandle) -> ModuleResult<()> {
        let shared = self
            .write()
            .take(handle)
            .ok_or_else(|| ModuleError::InvalidHandle {
                handle: handle.raw(),
            })?;
        Self::lock(&shared).wipe();
        Ok(())
    }

    /// Releases every live context. Returns how many were released.
    pub(crate) fn clear(&self) -> usize {
        let drained = self.write().drain();
        for shared in &drained {
            Self::lock(shared).wipe();
        }
        drained.len()
    }

    /// Number of live contexts.
    pub(crate) fn len(&self) -> usize {
        self.read().live
    }
}
