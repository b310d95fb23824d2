//! Interpreter guard.
//!
//! The interpreter is not safe for concurrent mutation, so it lives inside a
//! single mutex and every entry point goes through [`InterpreterGuard::with_lua`].
//! This serializes lifecycle callbacks, input dispatch, posted chunks and any
//! other thread that acquires the guard itself. There is no fairness or
//! ordering among waiting threads.
//!
//! The guard is not re-entrant: calling `with_lua` from inside a guarded
//! closure on the same thread deadlocks. Functions exposed to scripts receive
//! `&Lua` directly and never go back through the guard.
//!
//! A panic inside a guarded call poisons nothing: the next entry recovers the
//! lock and the observer still sees the exit.

use crate::error::{Error, Result};
use mlua::Lua;
use std::sync::{Arc, Mutex, MutexGuard};

/// Notified on every guard entry and exit, while the guard is held.
pub trait GuardObserver: Send + Sync {
    fn entered(&self);
    fn exited(&self);
}

/// Single owned interpreter behind one mutex.
pub struct InterpreterGuard {
    lua: Mutex<Option<Lua>>,
    observer: Option<Arc<dyn GuardObserver>>,
}

impl std::fmt::Debug for InterpreterGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterGuard")
            .field("observed", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl InterpreterGuard {
    pub fn new(lua: Lua) -> Self {
        Self {
            lua: Mutex::new(Some(lua)),
            observer: None,
        }
    }

    pub fn with_observer(lua: Lua, observer: Arc<dyn GuardObserver>) -> Self {
        Self {
            lua: Mutex::new(Some(lua)),
            observer: Some(observer),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Lua>> {
        // mlua restores the Lua stack before resuming a panic, so the
        // interpreter is consistent after one.
        self.lua.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("recovering interpreter guard after a panic");
            self.lua.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Run `f` with exclusive access to the interpreter.
    pub fn with_lua<R>(&self, f: impl FnOnce(&Lua) -> R) -> Result<R> {
        let slot = self.lock();
        let lua = slot.as_ref().ok_or(Error::InterpreterClosed)?;

        let _entered = Entered::new(self.observer.as_deref());
        Ok(f(lua))
    }

    /// Release the interpreter and all of its resources. Waits for any
    /// in-flight guarded call to return first.
    pub fn close(&self) {
        match self.lock().take() {
            Some(lua) => {
                drop(lua);
                tracing::info!("interpreter closed");
            }
            None => tracing::debug!("interpreter already closed"),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }
}

/// Entry/exit bracket around one guarded call; exit also fires on unwind.
struct Entered<'a> {
    observer: Option<&'a dyn GuardObserver>,
}

impl<'a> Entered<'a> {
    fn new(observer: Option<&'a dyn GuardObserver>) -> Self {
        if let Some(observer) = observer {
            observer.entered();
        }
        tracing::trace!("interpreter guard entered");
        Self { observer }
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        tracing::trace!("interpreter guard released");
        if let Some(observer) = self.observer {
            observer.exited();
        }
    }
}
