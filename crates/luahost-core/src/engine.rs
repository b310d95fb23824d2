//! Engine context: one running application instance.
//!
//! The engine owns the UI thread's multiplexer, the message channel and the
//! interpreter guard, and turns host lifecycle notifications into script
//! callbacks. It is created by the host's create notification and torn down
//! by `destroy`. It is not `Send`: every method runs on the UI thread.
//!
//! Create sequence:
//! 1. record the foreground activity in the registry (failure is logged)
//! 2. derive the native library search path from the data directory
//! 3. create the interpreter and publish `package.cpath`
//! 4. install `post` (plus aliases), `bridge` and `asset`
//! 5. run the entry script from the asset source
//! 6. deliver `onCreate(savedState?)`

use crate::assets::{AssetSource, asset_chunk_name, install_asset_module};
use crate::channel::{ChannelSender, MessageChannel, install_post};
use crate::config::Config;
use crate::error::{AssetError, Result, ScriptError};
use crate::guard::{GuardObserver, InterpreterGuard};
use crate::host::{InputQueue, ObjectRef, WindowHandle};
use crate::input::{InputBridge, InputOutcome};
use crate::lifecycle::{Callbacks, LifecycleEvent};
use crate::multiplexer::{EventMultiplexer, Readiness, SourceControl};
use crate::registry::HostContextRegistry;
use mlua::{Lua, MultiValue, Table, Value};
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Native library search template for a private data directory.
///
/// Everything from the first `/files` onwards is dropped, so
/// `/data/data/org.example/files` maps to `/data/data/org.example/lib/lib?.so`.
pub fn native_library_path(data_dir: &str) -> String {
    let base = data_dir
        .find("/files")
        .map_or(data_dir, |index| &data_dir[..index]);
    format!("{base}/lib/lib?.so")
}

/// Everything the host hands over with its create notification.
pub struct Launch<'a> {
    config: &'a Config,
    registry: Arc<HostContextRegistry>,
    assets: Arc<dyn AssetSource>,
    activity: ObjectRef,
    data_dir: Option<PathBuf>,
    saved_state: Option<&'a [u8]>,
    observer: Option<Arc<dyn GuardObserver>>,
}

impl<'a> Launch<'a> {
    pub fn new(
        config: &'a Config,
        registry: Arc<HostContextRegistry>,
        assets: Arc<dyn AssetSource>,
        activity: ObjectRef,
    ) -> Self {
        Self {
            config,
            registry,
            assets,
            activity,
            data_dir: None,
            saved_state: None,
            observer: None,
        }
    }

    /// Internal data directory reported by the host. Without one, the
    /// registry is asked for the activity's files directory.
    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// State saved by a previous instance, passed to `onCreate`.
    #[must_use]
    pub fn saved_state(mut self, state: &'a [u8]) -> Self {
        self.saved_state = Some(state);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn GuardObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

#[derive(Clone, Copy)]
enum CallbackArg<'a> {
    Bytes(Option<&'a [u8]>),
    Window(WindowHandle),
    Flag(bool),
}

/// UI-thread state reached by multiplexer handlers.
struct EngineState {
    registry: Arc<HostContextRegistry>,
    guard: Arc<InterpreterGuard>,
    callbacks: Callbacks,
    channel: Option<MessageChannel>,
    sender: ChannelSender,
    input: InputBridge,
    window: Option<WindowHandle>,
    cpath: Option<String>,
    destroyed: bool,
}

impl EngineState {
    fn on_channel_ready(&mut self, _readiness: Readiness) -> SourceControl {
        let Some(channel) = self.channel.as_mut() else {
            return SourceControl::Remove;
        };
        let report = channel.drain_and_run(&self.guard);
        tracing::trace!(?report, "channel drained");
        SourceControl::Keep
    }

    fn on_input_ready(&mut self, _readiness: Readiness) -> SourceControl {
        match self.input.process_ready(&self.guard, &self.callbacks) {
            InputOutcome::Detached => SourceControl::Remove,
            _ => SourceControl::Keep,
        }
    }

    /// Deliver `event` and return the handler's first result if it is a
    /// string.
    fn notify(&self, event: LifecycleEvent, arg: Option<CallbackArg<'_>>) -> Option<Vec<u8>> {
        let outcome = self.guard.with_lua(|lua| {
            let args = match arg {
                None | Some(CallbackArg::Bytes(None)) => Ok(Vec::new()),
                Some(CallbackArg::Bytes(Some(bytes))) => {
                    lua.create_string(bytes).map(|s| vec![Value::String(s)])
                }
                Some(CallbackArg::Window(window)) => {
                    Ok(vec![Value::LightUserData(window.to_light_userdata())])
                }
                Some(CallbackArg::Flag(flag)) => Ok(vec![Value::Boolean(flag)]),
            };
            let args = match args {
                Ok(args) => args,
                Err(err) => {
                    tracing::error!(event = %event, %err, "failed to build callback arguments");
                    return None;
                }
            };
            let values = self
                .callbacks
                .invoke(lua, event, MultiValue::from_vec(args))?;
            match values.into_iter().next() {
                Some(Value::String(text)) => Some(text.as_bytes().to_vec()),
                _ => None,
            }
        });
        outcome.unwrap_or_else(|err| {
            tracing::warn!(event = %event, %err, "callback not delivered");
            None
        })
    }

    fn run_entry(&self, assets: &dyn AssetSource, entry: &str) {
        let text = match assets.load_script(entry) {
            Ok(text) => text,
            Err(AssetError::NotFound(_)) => {
                tracing::warn!(chunk = entry, "entry script not found");
                return;
            }
            Err(err) => {
                tracing::error!(chunk = entry, %err, "entry script unreadable");
                return;
            }
        };

        let chunk = asset_chunk_name(entry);
        let outcome = self.guard.with_lua(|lua| {
            lua.load(text)
                .set_name(chunk.as_str())
                .into_function()
                .and_then(|function| function.call::<_, ()>(()))
                .map_err(|err| ScriptError::from_lua(entry, &err))
        });
        match outcome {
            Ok(Ok(())) => tracing::debug!(chunk = entry, "entry script ran"),
            Ok(Err(err)) => tracing::error!(chunk = entry, %err, "entry script failed"),
            Err(err) => tracing::warn!(chunk = entry, %err, "entry script skipped"),
        }
    }
}

/// One application instance driven from the UI thread.
pub struct EngineContext {
    looper: EventMultiplexer<EngineState>,
    state: EngineState,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("looper", &self.looper)
            .field("window", &self.state.window)
            .field("input", &self.state.input)
            .field("destroyed", &self.state.destroyed)
            .finish_non_exhaustive()
    }
}

impl EngineContext {
    /// Handle the host's create notification.
    pub fn create(launch: Launch<'_>) -> Result<Self> {
        let Launch {
            config,
            registry,
            assets,
            activity,
            data_dir,
            saved_state,
            observer,
        } = launch;
        tracing::info!(event = "onCreate", ?activity, "lifecycle notification");

        if let Err(err) = registry.set_foreground_context(activity) {
            tracing::warn!(%err, "continuing without host context");
        }

        let data_dir = match data_dir {
            Some(dir) => Some(dir.to_string_lossy().into_owned()),
            None => match registry.files_dir(activity) {
                Ok(dir) => Some(dir),
                Err(err) => {
                    tracing::warn!(%err, "no data directory; native modules unavailable");
                    None
                }
            },
        };
        let cpath = data_dir.as_deref().map(native_library_path);

        let channel = MessageChannel::new(&config.channel)?;
        let callbacks = Callbacks::new(config.script.global_fallback);

        let lua = Lua::new();
        if let Some(cpath) = &cpath {
            publish_cpath(&lua, cpath)?;
            tracing::info!(cpath = %cpath, "native library path");
        }
        install_post(&lua, channel.sender(), &config.script.post_aliases)?;
        callbacks.install(&lua)?;
        install_asset_module(&lua, assets.clone())?;

        let guard = Arc::new(match observer {
            Some(observer) => InterpreterGuard::with_observer(lua, observer),
            None => InterpreterGuard::new(lua),
        });

        let mut looper = EventMultiplexer::new(&config.looper);
        looper.register_source(
            channel.descriptor(),
            Readiness::READABLE,
            Box::new(EngineState::on_channel_ready),
        );

        let state = EngineState {
            registry,
            guard,
            callbacks,
            sender: channel.sender(),
            channel: Some(channel),
            input: InputBridge::new(),
            window: None,
            cpath,
            destroyed: false,
        };

        state.run_entry(assets.as_ref(), &config.script.entry);
        state.notify(LifecycleEvent::Create, Some(CallbackArg::Bytes(saved_state)));

        Ok(Self { looper, state })
    }

    fn accept(&self, event: LifecycleEvent) -> bool {
        if self.state.destroyed {
            tracing::warn!(event = %event, "notification after destroy ignored");
            return false;
        }
        tracing::info!(event = %event, "lifecycle notification");
        true
    }

    fn deliver(&self, event: LifecycleEvent, arg: Option<CallbackArg<'_>>) {
        if self.accept(event) {
            self.state.notify(event, arg);
        }
    }

    pub fn on_start(&mut self) {
        self.deliver(LifecycleEvent::Start, None);
    }

    pub fn on_resume(&mut self) {
        self.deliver(LifecycleEvent::Resume, None);
    }

    pub fn on_pause(&mut self) {
        self.deliver(LifecycleEvent::Pause, None);
    }

    pub fn on_stop(&mut self) {
        self.deliver(LifecycleEvent::Stop, None);
    }

    pub fn on_configuration_changed(&mut self) {
        self.deliver(LifecycleEvent::ConfigurationChanged, None);
    }

    pub fn on_low_memory(&mut self) {
        self.deliver(LifecycleEvent::LowMemory, None);
    }

    pub fn on_window_focus_changed(&mut self, focused: bool) {
        self.deliver(LifecycleEvent::WindowFocusChanged, Some(CallbackArg::Flag(focused)));
    }

    /// Bytes returned by `onSaveInstanceState`, if it returned a string.
    pub fn on_save_instance_state(&mut self) -> Option<Vec<u8>> {
        if !self.accept(LifecycleEvent::SaveInstanceState) {
            return None;
        }
        self.state.notify(LifecycleEvent::SaveInstanceState, None)
    }

    pub fn on_native_window_created(&mut self, window: WindowHandle) {
        if !self.accept(LifecycleEvent::NativeWindowCreated) {
            return;
        }
        self.state.window = Some(window);
        self.state
            .notify(LifecycleEvent::NativeWindowCreated, Some(CallbackArg::Window(window)));
    }

    pub fn on_native_window_destroyed(&mut self, window: WindowHandle) {
        if !self.accept(LifecycleEvent::NativeWindowDestroyed) {
            return;
        }
        self.state.window = None;
        self.state
            .notify(LifecycleEvent::NativeWindowDestroyed, Some(CallbackArg::Window(window)));
    }

    /// Attach the host's input queue to the UI loop.
    pub fn on_input_queue_created(&mut self, queue: &Rc<RefCell<dyn InputQueue>>) {
        if !self.accept(LifecycleEvent::InputQueueCreated) {
            return;
        }
        if let Some(previous) = self.state.input.detach() {
            self.looper.unregister_source(previous);
        }
        let descriptor = self.state.input.attach(queue);
        self.looper.register_source(
            descriptor,
            Readiness::READABLE,
            Box::new(EngineState::on_input_ready),
        );
        self.state.notify(LifecycleEvent::InputQueueCreated, None);
    }

    pub fn on_input_queue_destroyed(&mut self) {
        if !self.accept(LifecycleEvent::InputQueueDestroyed) {
            return;
        }
        self.detach_input();
        self.state.notify(LifecycleEvent::InputQueueDestroyed, None);
    }

    fn detach_input(&mut self) {
        if let Some(descriptor) = self.state.input.detach() {
            self.looper.unregister_source(descriptor);
        }
    }

    /// Deliver `onDestroy`, then release the interpreter, the input queue
    /// and the channel. Pending channel data is discarded unread.
    pub fn destroy(&mut self) {
        if !self.accept(LifecycleEvent::Destroy) {
            return;
        }
        self.state.notify(LifecycleEvent::Destroy, None);

        self.state.guard.close();
        self.detach_input();
        if let Some(channel) = self.state.channel.take() {
            self.looper.unregister_source(channel.descriptor());
        }
        self.state.window = None;
        self.state.destroyed = true;
    }

    /// Run one iteration of the UI loop.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        self.looper.poll_once(&mut self.state, timeout)
    }

    /// Dispatch everything that is ready without blocking.
    pub fn drain_ready(&mut self) -> Result<usize> {
        self.looper.drain_ready(&mut self.state)
    }

    /// Shared interpreter guard, for capability modules and worker threads.
    pub fn guard(&self) -> Arc<InterpreterGuard> {
        self.state.guard.clone()
    }

    /// Sender for posting script text from any thread.
    pub fn sender(&self) -> ChannelSender {
        self.state.sender.clone()
    }

    pub fn registry(&self) -> &Arc<HostContextRegistry> {
        &self.state.registry
    }

    pub fn window(&self) -> Option<WindowHandle> {
        self.state.window
    }

    pub fn input_attached(&self) -> bool {
        self.state.input.is_attached()
    }

    /// `package.cpath` entry published at create, if a data directory was
    /// known.
    pub fn native_library_path(&self) -> Option<&str> {
        self.state.cpath.as_deref()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.destroyed
    }
}

fn publish_cpath(lua: &Lua, cpath: &str) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    let existing = package.get::<_, Option<String>>("cpath")?.unwrap_or_default();
    let value = if existing.is_empty() {
        cpath.to_string()
    } else {
        format!("{cpath};{existing}")
    };
    package.set("cpath", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::DirAssetSource;

    #[test]
    fn library_path_drops_files_suffix() {
        assert_eq!(
            native_library_path("/data/data/org.example.app/files"),
            "/data/data/org.example.app/lib/lib?.so"
        );
        assert_eq!(
            native_library_path("/data/user/0/app/files/nested/files"),
            "/data/user/0/app/lib/lib?.so"
        );
        assert_eq!(native_library_path("/tmp/app"), "/tmp/app/lib/lib?.so");
    }

    #[test]
    fn cpath_is_prepended() {
        let lua = Lua::new();
        publish_cpath(&lua, "/app/lib/lib?.so").unwrap();
        let cpath: String = lua.load("return package.cpath").eval().unwrap();
        assert!(cpath.starts_with("/app/lib/lib?.so"));
    }

    #[test]
    fn create_without_host_still_runs_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("init.lua"), "ready = true").unwrap();
        let config = Config::default();
        let registry = Arc::new(HostContextRegistry::new());
        let engine = EngineContext::create(
            Launch::new(&config, registry, Arc::new(DirAssetSource::new(dir.path())), ObjectRef(1))
                .data_dir("/data/data/app/files"),
        )
        .unwrap();

        assert_eq!(engine.native_library_path(), Some("/data/data/app/lib/lib?.so"));
        let ready: bool = engine
            .guard()
            .with_lua(|lua| lua.globals().get("ready"))
            .unwrap()
            .unwrap();
        assert!(ready);
    }

    #[test]
    fn notifications_after_destroy_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let mut engine = EngineContext::create(Launch::new(
            &config,
            Arc::new(HostContextRegistry::new()),
            Arc::new(DirAssetSource::new(dir.path())),
            ObjectRef(1),
        ))
        .unwrap();

        engine.destroy();
        assert!(engine.is_destroyed());
        assert!(engine.guard().is_closed());
        engine.on_resume();
        assert_eq!(engine.on_save_instance_state(), None);
        engine.destroy();
        assert!(engine.sender().post(b"x = 1").is_err());
    }
}
