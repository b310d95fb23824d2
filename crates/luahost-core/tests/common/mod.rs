//! Shared fixtures for luahost-core integration tests.

#![allow(dead_code)]

use filedescriptor::{AsRawSocketDescriptor, FileDescriptor, Pipe, SocketDescriptor};
use luahost_core::assets::DirAssetSource;
use luahost_core::host::{HostEnv, InputEventHandle, InputQueue, MethodId, ObjectRef, ResourceProvider};
use luahost_core::registry::HostContextRegistry;
use luahost_core::{Config, EngineContext, Launch};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const ACTIVITY: ObjectRef = ObjectRef(0x10);
pub const APPLICATION: ObjectRef = ObjectRef(0x20);
pub const APP_CONTEXT: ObjectRef = ObjectRef(0x30);
pub const ASSET_MANAGER: ObjectRef = ObjectRef(0x40);
pub const CLASS_LOADER: ObjectRef = ObjectRef(0x50);
pub const FILES_DIR: ObjectRef = ObjectRef(0x60);
pub const FILES_PATH: ObjectRef = ObjectRef(0x61);
pub const PROVIDER: ResourceProvider = ResourceProvider(0x70);

pub const FILES_PATH_TEXT: &str = "/data/data/org.example.app/files";

/// Host object graph shaped like an activity runtime.
pub struct FakeHost {
    methods: Vec<(ObjectRef, &'static str, ObjectRef)>,
    classes: HashMap<String, ObjectRef>,
    strings: HashMap<ObjectRef, String>,
    pub provider_lookups: AtomicUsize,
}

impl FakeHost {
    pub fn new() -> Self {
        let methods = vec![
            (ACTIVITY, "getApplication", APPLICATION),
            (ACTIVITY, "getApplicationContext", APP_CONTEXT),
            (ACTIVITY, "getClassLoader", CLASS_LOADER),
            (ACTIVITY, "getFilesDir", FILES_DIR),
            (FILES_DIR, "getPath", FILES_PATH),
            (APP_CONTEXT, "getAssets", ASSET_MANAGER),
        ];
        let mut classes = HashMap::new();
        classes.insert("org.example.Camera".to_string(), ObjectRef(0x80));
        let mut strings = HashMap::new();
        strings.insert(FILES_PATH, FILES_PATH_TEXT.to_string());
        Self {
            methods,
            classes,
            strings,
            provider_lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.provider_lookups.load(Ordering::SeqCst)
    }
}

const LOAD_CLASS_ID: MethodId = MethodId(u64::MAX);

impl HostEnv for FakeHost {
    fn find_method(&self, target: ObjectRef, name: &str) -> Option<MethodId> {
        if target == CLASS_LOADER && name == "loadClass" {
            return Some(LOAD_CLASS_ID);
        }
        self.methods
            .iter()
            .position(|(t, m, _)| *t == target && *m == name)
            .map(|index| MethodId(index as u64))
    }

    fn call_object_method(
        &self,
        target: ObjectRef,
        method: MethodId,
        arg: Option<&str>,
    ) -> Option<ObjectRef> {
        if method == LOAD_CLASS_ID {
            return arg.and_then(|name| self.classes.get(name).copied());
        }
        let (owner, _, result) = self.methods.get(method.raw() as usize)?;
        (*owner == target).then_some(*result)
    }

    fn resource_provider_from(&self, object: ObjectRef) -> Option<ResourceProvider> {
        self.provider_lookups.fetch_add(1, Ordering::SeqCst);
        (object == ASSET_MANAGER).then_some(PROVIDER)
    }

    fn object_to_string(&self, object: ObjectRef) -> Option<String> {
        self.strings.get(&object).cloned()
    }
}

/// Input queue backed by a pipe: one byte per pending event.
pub struct FakeQueue {
    read: FileDescriptor,
    write: FileDescriptor,
    pending: VecDeque<InputEventHandle>,
    intercept: HashSet<InputEventHandle>,
    pub finished: Vec<(InputEventHandle, bool)>,
}

impl FakeQueue {
    pub fn new() -> Self {
        let Pipe { mut read, write } = Pipe::new().unwrap();
        read.set_non_blocking(true).unwrap();
        Self {
            read,
            write,
            pending: VecDeque::new(),
            intercept: HashSet::new(),
            finished: Vec::new(),
        }
    }

    pub fn shared() -> (Rc<RefCell<Self>>, Rc<RefCell<dyn InputQueue>>) {
        let queue = Rc::new(RefCell::new(Self::new()));
        let dyn_queue: Rc<RefCell<dyn InputQueue>> = queue.clone();
        (queue, dyn_queue)
    }

    pub fn push(&mut self, event: InputEventHandle) {
        self.pending.push_back(event);
        self.write.write_all(b"e").unwrap();
    }

    /// Make `pre_dispatch` consume `event`.
    pub fn intercept(&mut self, event: InputEventHandle) {
        self.intercept.insert(event);
    }
}

impl InputQueue for FakeQueue {
    fn descriptor(&self) -> SocketDescriptor {
        self.read.as_socket_descriptor()
    }

    fn next_event(&mut self) -> Option<InputEventHandle> {
        let mut byte = [0u8; 1];
        let _ = self.read.read(&mut byte);
        self.pending.pop_front()
    }

    fn pre_dispatch(&mut self, event: InputEventHandle) -> bool {
        self.intercept.contains(&event)
    }

    fn finish_event(&mut self, event: InputEventHandle, handled: bool) {
        self.finished.push((event, handled));
    }
}

/// Asset directory holding `init.lua` with `script` as its contents.
pub fn assets_with_init(script: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("init.lua"), script).unwrap();
    dir
}

/// Create an engine against a fresh `FakeHost`.
pub fn start_engine(assets: &Path, config: &Config) -> (EngineContext, Arc<FakeHost>) {
    let host = Arc::new(FakeHost::new());
    let registry = Arc::new(HostContextRegistry::with_runtime(host.clone()));
    let engine = EngineContext::create(Launch::new(
        config,
        registry,
        Arc::new(DirAssetSource::new(assets)),
        ACTIVITY,
    ))
    .unwrap();
    (engine, host)
}

/// Read a global from the engine's interpreter.
pub fn global<T: for<'lua> mlua::FromLua<'lua>>(engine: &EngineContext, name: &str) -> T {
    engine
        .guard()
        .with_lua(|lua| lua.globals().get::<_, T>(name))
        .unwrap()
        .unwrap()
}

/// Lua prelude recording callback names into the global `events` table.
pub const RECORDER: &str = r"
events = {}
local function note(name, ...)
  events[#events + 1] = name
  if record then record(name) end
end
for _, name in ipairs(bridge.events) do
  if name ~= 'onInputEvent' and name ~= 'onSaveInstanceState' then
    bridge.on(name, function(...) note(name, ...) end)
  end
end
";

/// Comma-joined contents of the `events` table.
pub fn recorded(engine: &EngineContext) -> String {
    engine
        .guard()
        .with_lua(|lua| lua.load("return table.concat(events, ',')").eval::<String>())
        .unwrap()
        .unwrap()
}
