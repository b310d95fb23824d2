//! Desktop stand-in for the host runtime.
//!
//! Models the small object graph the bridge walks on a real activity host:
//! activity → application / application context → asset manager, plus the
//! files directory and a class loader over a fixed set of class names.

use luahost_core::host::{HostEnv, MethodId, ObjectRef, ResourceProvider};
use std::path::Path;

pub const ACTIVITY: ObjectRef = ObjectRef(0x1000);
const APPLICATION: ObjectRef = ObjectRef(0x1001);
const APP_CONTEXT: ObjectRef = ObjectRef(0x1002);
const ASSET_MANAGER: ObjectRef = ObjectRef(0x1003);
const CLASS_LOADER: ObjectRef = ObjectRef(0x1004);
const FILES_DIR: ObjectRef = ObjectRef(0x1005);
const FILES_PATH: ObjectRef = ObjectRef(0x1006);
const FIRST_CLASS: u64 = 0x2000;

const METHODS: &[(ObjectRef, &str, ObjectRef)] = &[
    (ACTIVITY, "getApplication", APPLICATION),
    (ACTIVITY, "getApplicationContext", APP_CONTEXT),
    (ACTIVITY, "getClassLoader", CLASS_LOADER),
    (ACTIVITY, "getFilesDir", FILES_DIR),
    (FILES_DIR, "getPath", FILES_PATH),
    (APP_CONTEXT, "getAssets", ASSET_MANAGER),
];
const LOAD_CLASS: MethodId = MethodId(u64::MAX);

#[derive(Debug)]
pub struct DesktopHost {
    files_dir: String,
    classes: Vec<String>,
}

impl DesktopHost {
    pub fn new(files_dir: &Path, classes: Vec<String>) -> Self {
        Self {
            files_dir: files_dir.display().to_string(),
            classes,
        }
    }
}

impl HostEnv for DesktopHost {
    fn find_method(&self, target: ObjectRef, name: &str) -> Option<MethodId> {
        if target == CLASS_LOADER && name == "loadClass" {
            return Some(LOAD_CLASS);
        }
        METHODS
            .iter()
            .position(|(owner, method, _)| *owner == target && *method == name)
            .map(|index| MethodId(index as u64))
    }

    fn call_object_method(
        &self,
        target: ObjectRef,
        method: MethodId,
        arg: Option<&str>,
    ) -> Option<ObjectRef> {
        if method == LOAD_CLASS {
            let name = arg?;
            let index = self.classes.iter().position(|class| class == name)?;
            return Some(ObjectRef(FIRST_CLASS + index as u64));
        }
        let (owner, _, result) = METHODS.get(usize::try_from(method.raw()).ok()?)?;
        (*owner == target).then_some(*result)
    }

    fn resource_provider_from(&self, object: ObjectRef) -> Option<ResourceProvider> {
        (object == ASSET_MANAGER).then_some(ResourceProvider(ASSET_MANAGER.raw()))
    }

    fn object_to_string(&self, object: ObjectRef) -> Option<String> {
        (object == FILES_PATH).then(|| self.files_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luahost_core::registry::HostContextRegistry;
    use std::sync::Arc;

    #[test]
    fn registry_resolves_through_desktop_host() {
        let host = DesktopHost::new(Path::new("/home/user/.local/share/luahost/files"), vec![
            "org.example.Toast".to_string(),
        ]);
        let registry = HostContextRegistry::with_runtime(Arc::new(host));
        registry.set_foreground_context(ACTIVITY).unwrap();

        assert_eq!(registry.application().unwrap(), Some(APPLICATION));
        assert_eq!(
            registry.resource_provider().unwrap(),
            ResourceProvider(ASSET_MANAGER.raw())
        );
        assert_eq!(
            registry.files_dir(ACTIVITY).unwrap(),
            "/home/user/.local/share/luahost/files"
        );
        assert_eq!(
            registry.resolve_class("org.example.Toast").unwrap(),
            ObjectRef(FIRST_CLASS)
        );
        assert!(registry.resolve_class("org.example.Camera").is_err());
    }
}
