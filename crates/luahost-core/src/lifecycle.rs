//! Lifecycle callback resolution and dispatch.
//!
//! Scripts register handlers through the `bridge` table:
//!
//! ```lua
//! bridge.on("onResume", function() ... end)
//! bridge.off("onResume")
//! ```
//!
//! Registrations live in a table in the interpreter registry. When global
//! fallback is enabled, an event without a registration is delivered to a
//! global function of the same name instead.

use crate::error::ScriptError;
use mlua::{Function, IntoLuaMulti, Lua, MultiValue, Table, Value};

/// Registry key of the callback table.
pub const CALLBACK_TABLE_KEY: &str = "luahost.callbacks";

/// Host notifications that have a script callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Create,
    Start,
    Resume,
    Pause,
    Stop,
    Destroy,
    SaveInstanceState,
    ConfigurationChanged,
    LowMemory,
    WindowFocusChanged,
    NativeWindowCreated,
    NativeWindowDestroyed,
    InputQueueCreated,
    InputQueueDestroyed,
    InputEvent,
}

impl LifecycleEvent {
    pub const ALL: [Self; 15] = [
        Self::Create,
        Self::Start,
        Self::Resume,
        Self::Pause,
        Self::Stop,
        Self::Destroy,
        Self::SaveInstanceState,
        Self::ConfigurationChanged,
        Self::LowMemory,
        Self::WindowFocusChanged,
        Self::NativeWindowCreated,
        Self::NativeWindowDestroyed,
        Self::InputQueueCreated,
        Self::InputQueueDestroyed,
        Self::InputEvent,
    ];

    /// Script-facing callback name.
    pub const fn callback_name(self) -> &'static str {
        match self {
            Self::Create => "onCreate",
            Self::Start => "onStart",
            Self::Resume => "onResume",
            Self::Pause => "onPause",
            Self::Stop => "onStop",
            Self::Destroy => "onDestroy",
            Self::SaveInstanceState => "onSaveInstanceState",
            Self::ConfigurationChanged => "onConfigurationChanged",
            Self::LowMemory => "onLowMemory",
            Self::WindowFocusChanged => "onWindowFocusChanged",
            Self::NativeWindowCreated => "onNativeWindowCreated",
            Self::NativeWindowDestroyed => "onNativeWindowDestroyed",
            Self::InputQueueCreated => "onInputQueueCreated",
            Self::InputQueueDestroyed => "onInputQueueDestroyed",
            Self::InputEvent => "onInputEvent",
        }
    }

    pub fn from_callback_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|event| event.callback_name() == name)
    }
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.callback_name())
    }
}

/// Callback lookup policy plus the `bridge` script module.
#[derive(Debug, Clone, Copy)]
pub struct Callbacks {
    global_fallback: bool,
}

impl Callbacks {
    pub fn new(global_fallback: bool) -> Self {
        Self { global_fallback }
    }

    pub fn global_fallback(&self) -> bool {
        self.global_fallback
    }

    /// Create the callback table and the `bridge` global.
    pub fn install(&self, lua: &Lua) -> mlua::Result<()> {
        lua.set_named_registry_value(CALLBACK_TABLE_KEY, lua.create_table()?)?;

        let bridge = lua.create_table()?;
        bridge.set(
            "on",
            lua.create_function(|lua, (name, handler): (String, Function)| {
                if LifecycleEvent::from_callback_name(&name).is_none() {
                    tracing::warn!(event = %name, "registering handler for unknown event");
                }
                let table: Table = lua.named_registry_value(CALLBACK_TABLE_KEY)?;
                table.set(name, handler)
            })?,
        )?;
        bridge.set(
            "off",
            lua.create_function(|lua, name: String| {
                let table: Table = lua.named_registry_value(CALLBACK_TABLE_KEY)?;
                table.set(name, Value::Nil)
            })?,
        )?;
        bridge.set(
            "events",
            lua.create_sequence_from(LifecycleEvent::ALL.map(LifecycleEvent::callback_name))?,
        )?;
        lua.globals().set("bridge", bridge)
    }

    /// Find the handler for `event`, if any.
    pub fn resolve<'lua>(
        &self,
        lua: &'lua Lua,
        event: LifecycleEvent,
    ) -> mlua::Result<Option<Function<'lua>>> {
        let name = event.callback_name();
        if let Some(table) = lua.named_registry_value::<Option<Table>>(CALLBACK_TABLE_KEY)? {
            if let Value::Function(handler) = table.get::<_, Value>(name)? {
                return Ok(Some(handler));
            }
        }
        if self.global_fallback {
            if let Value::Function(handler) = lua.globals().get::<_, Value>(name)? {
                return Ok(Some(handler));
            }
        }
        Ok(None)
    }

    /// Call the handler for `event`. `Ok(None)` when there is none.
    pub fn try_invoke<'lua>(
        &self,
        lua: &'lua Lua,
        event: LifecycleEvent,
        args: impl IntoLuaMulti<'lua>,
    ) -> Result<Option<MultiValue<'lua>>, ScriptError> {
        let name = event.callback_name();
        let handler = self
            .resolve(lua, event)
            .map_err(|err| ScriptError::from_lua(name, &err))?;
        let Some(handler) = handler else {
            tracing::trace!(event = name, "no handler registered");
            return Ok(None);
        };
        handler
            .call::<_, MultiValue>(args)
            .map(Some)
            .map_err(|err| ScriptError::from_lua(name, &err))
    }

    /// Call the handler for `event`, logging failures. A missing handler and
    /// a failed one both yield `None`.
    pub fn invoke<'lua>(
        &self,
        lua: &'lua Lua,
        event: LifecycleEvent,
        args: impl IntoLuaMulti<'lua>,
    ) -> Option<MultiValue<'lua>> {
        match self.try_invoke(lua, event, args) {
            Ok(values) => values,
            Err(err) => {
                tracing::error!(event = event.callback_name(), %err, "callback failed");
                None
            }
        }
    }
}
