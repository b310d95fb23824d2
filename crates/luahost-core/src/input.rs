//! Input event queue bridge.
//!
//! The host owns the input queue; the bridge only holds a weak reference
//! while attached. Each readiness of the queue descriptor pulls one event,
//! offers it to the host's pre-dispatch filter, then to the script's
//! `onInputEvent` callback, and finally completes it.

use crate::guard::InterpreterGuard;
use crate::host::{InputEventHandle, InputQueue};
use crate::lifecycle::{Callbacks, LifecycleEvent};
use filedescriptor::SocketDescriptor;
use mlua::Value;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// What one readiness cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    /// No queue attached, or its owner has dropped it
    Detached,
    /// The queue signalled but had no event
    NoEvent,
    /// The host's pre-dispatch filter took the event
    Consumed(InputEventHandle),
    /// The event went through the script and was finished
    Finished { event: InputEventHandle, handled: bool },
}

struct Attached {
    queue: Weak<RefCell<dyn InputQueue>>,
    descriptor: SocketDescriptor,
}

/// Detached/attached state of the host input queue.
#[derive(Default)]
pub struct InputBridge {
    attached: Option<Attached>,
}

impl std::fmt::Debug for InputBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputBridge")
            .field("descriptor", &self.descriptor())
            .finish()
    }
}

impl InputBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `queue` as the current input queue and return the descriptor
    /// to watch. Replaces any previously attached queue.
    pub fn attach(&mut self, queue: &Rc<RefCell<dyn InputQueue>>) -> SocketDescriptor {
        let descriptor = queue.borrow().descriptor();
        if let Some(previous) = self.attached.take() {
            tracing::debug!(fd = ?previous.descriptor, "replacing attached input queue");
        }
        self.attached = Some(Attached {
            queue: Rc::downgrade(queue),
            descriptor,
        });
        tracing::debug!(fd = ?descriptor, "input queue attached");
        descriptor
    }

    /// Forget the current queue. Returns its descriptor so the caller can
    /// unregister it.
    pub fn detach(&mut self) -> Option<SocketDescriptor> {
        let attached = self.attached.take()?;
        tracing::debug!(fd = ?attached.descriptor, "input queue detached");
        Some(attached.descriptor)
    }

    /// Attached and the host still owns the queue.
    pub fn is_attached(&self) -> bool {
        self.attached
            .as_ref()
            .is_some_and(|attached| attached.queue.strong_count() > 0)
    }

    pub fn descriptor(&self) -> Option<SocketDescriptor> {
        self.attached.as_ref().map(|attached| attached.descriptor)
    }

    /// Handle one readiness of the queue descriptor.
    pub fn process_ready(&mut self, guard: &InterpreterGuard, callbacks: &Callbacks) -> InputOutcome {
        let Some(queue) = self
            .attached
            .as_ref()
            .and_then(|attached| attached.queue.upgrade())
        else {
            return InputOutcome::Detached;
        };

        let event = {
            let Ok(mut queue) = queue.try_borrow_mut() else {
                tracing::warn!("input queue busy; skipping readiness");
                return InputOutcome::NoEvent;
            };
            let Some(event) = queue.next_event() else {
                return InputOutcome::NoEvent;
            };
            if queue.pre_dispatch(event) {
                tracing::trace!(?event, "input event consumed by pre-dispatch");
                return InputOutcome::Consumed(event);
            }
            event
        };

        let handled = guard
            .with_lua(|lua| {
                callbacks
                    .invoke(lua, LifecycleEvent::InputEvent, event.to_light_userdata())
                    .is_some_and(|values| is_handled(values.into_iter().next().as_ref()))
            })
            .unwrap_or_else(|err| {
                tracing::warn!(%err, ?event, "input event not dispatched");
                false
            });

        match queue.try_borrow_mut() {
            Ok(mut queue) => queue.finish_event(event, handled),
            Err(_) => tracing::error!(?event, "input queue busy; event left unfinished"),
        }
        tracing::trace!(?event, handled, "input event finished");
        InputOutcome::Finished { event, handled }
    }
}

/// Interpret a callback's first return value as the handled flag.
pub fn is_handled(value: Option<&Value<'_>>) -> bool {
    match value {
        Some(Value::Boolean(flag)) => *flag,
        Some(Value::Integer(n)) => *n != 0,
        Some(Value::Number(n)) => *n != 0.0,
        _ => false,
    }
}
