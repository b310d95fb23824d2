//! Host-side collaborators seen by the bridge.
//!
//! The host runtime (an activity manager, a JVM, a desktop simulator) is
//! reached only through the traits in this module. Object references are
//! plain ids handed out by the host; the bridge records them but never owns
//! what they point at.

use filedescriptor::SocketDescriptor;
use mlua::LightUserData;
use std::ffi::c_void;
use std::fmt;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            #[must_use]
            pub const fn raw(self) -> u64 {
                self.0
            }

            /// Script-facing form of the handle.
            #[must_use]
            pub fn to_light_userdata(self) -> LightUserData {
                LightUserData(self.0 as usize as *mut c_void)
            }

            #[must_use]
            pub fn from_light_userdata(data: LightUserData) -> Self {
                Self(data.0 as usize as u64)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }
    };
}

opaque_handle!(
    /// Reference to a host object (activity, application, context, loader).
    ObjectRef
);
opaque_handle!(
    /// Host method identifier returned by `HostEnv::find_method`.
    MethodId
);
opaque_handle!(
    /// Native resource/asset provider handle.
    ResourceProvider
);
opaque_handle!(
    /// Native window surface handle.
    WindowHandle
);
opaque_handle!(
    /// Input event owned by the host queue for one dispatch cycle.
    InputEventHandle
);

/// Capability lookups offered by the host runtime.
///
/// Shaped after reflective host environments: a method is looked up by name
/// on the target's class, then invoked. Every lookup may come back empty.
pub trait HostEnv: Send + Sync {
    /// Find an object-returning method named `name` on `target`'s class.
    fn find_method(&self, target: ObjectRef, name: &str) -> Option<MethodId>;

    /// Invoke `method` on `target` with an optional string argument.
    fn call_object_method(
        &self,
        target: ObjectRef,
        method: MethodId,
        arg: Option<&str>,
    ) -> Option<ObjectRef>;

    /// Wrap a host resource-manager object into its native handle.
    fn resource_provider_from(&self, object: ObjectRef) -> Option<ResourceProvider>;

    /// String contents of a host string object.
    fn object_to_string(&self, object: ObjectRef) -> Option<String>;
}

/// Host-owned input event queue.
///
/// The bridge attaches the queue's descriptor to its multiplexer and pulls
/// events while attached. Events must be finished exactly once unless
/// `pre_dispatch` consumed them.
pub trait InputQueue {
    /// Pollable descriptor that becomes readable while events are pending.
    fn descriptor(&self) -> SocketDescriptor;

    /// Pull the next pending event.
    fn next_event(&mut self) -> Option<InputEventHandle>;

    /// Host-level interception (IME, gestures). `true` means consumed and
    /// already completed by the host.
    fn pre_dispatch(&mut self, event: InputEventHandle) -> bool;

    /// Completion signal for an event that was not consumed by `pre_dispatch`.
    fn finish_event(&mut self, event: InputEventHandle, handled: bool);
}
