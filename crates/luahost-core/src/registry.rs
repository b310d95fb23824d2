//! Host context registry.
//!
//! Records where the host runtime and the current foreground activity live,
//! and resolves derived capabilities (application object, application
//! context, resource provider, classes) through `HostEnv` lookups.
//!
//! The registry is an explicit object shared as `Arc<HostContextRegistry>`;
//! nothing here is an ambient global. Stored references are back-references
//! owned by the host: a new `set_foreground_context` simply overwrites them.

use crate::error::{HostError, Result};
use crate::host::{HostEnv, ObjectRef, ResourceProvider};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const GET_APPLICATION: &str = "getApplication";
const GET_APPLICATION_CONTEXT: &str = "getApplicationContext";
const GET_ASSETS: &str = "getAssets";
const GET_CLASS_LOADER: &str = "getClassLoader";
const LOAD_CLASS: &str = "loadClass";
const GET_FILES_DIR: &str = "getFilesDir";
const GET_PATH: &str = "getPath";

#[derive(Default)]
struct RegistryState {
    env: Option<Arc<dyn HostEnv>>,
    activity: Option<ObjectRef>,
    application: Option<ObjectRef>,
    application_context: Option<ObjectRef>,
    resource_provider: Option<ResourceProvider>,
}

/// Handles to the host runtime and its foreground context.
#[derive(Default)]
pub struct HostContextRegistry {
    state: RwLock<RegistryState>,
}

impl std::fmt::Debug for HostContextRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("HostContextRegistry")
            .field("attached", &state.env.is_some())
            .field("activity", &state.activity)
            .field("application", &state.application)
            .field("application_context", &state.application_context)
            .field("resource_provider", &state.resource_provider)
            .finish()
    }
}

impl HostContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry already attached to `env`.
    pub fn with_runtime(env: Arc<dyn HostEnv>) -> Self {
        let registry = Self::new();
        registry.set_runtime_handle(env);
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        // The state holds plain ids; a panic elsewhere cannot leave it torn.
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store the host runtime handle. Calling again replaces it.
    pub fn set_runtime_handle(&self, env: Arc<dyn HostEnv>) {
        tracing::info!("host runtime attached");
        self.write().env = Some(env);
    }

    pub fn is_attached(&self) -> bool {
        self.read().env.is_some()
    }

    /// The host runtime; fails fast when it has not been set.
    pub fn runtime(&self) -> Result<Arc<dyn HostEnv>> {
        self.read()
            .env
            .clone()
            .ok_or_else(|| HostError::RuntimeNotAttached.into())
    }

    /// Record a new foreground activity and derive its application object
    /// and application context. On failure nothing is overwritten.
    pub fn set_foreground_context(&self, activity: ObjectRef) -> Result<()> {
        let env = self.runtime()?;

        let application = call_named(env.as_ref(), activity, GET_APPLICATION, None)
            .ok_or(HostError::ContextResolution {
                step: GET_APPLICATION,
            })
            .inspect_err(|err| tracing::error!(?activity, %err, "foreground context rejected"))?;
        let application_context =
            call_named(env.as_ref(), activity, GET_APPLICATION_CONTEXT, None)
                .ok_or(HostError::ContextResolution {
                    step: GET_APPLICATION_CONTEXT,
                })
                .inspect_err(
                    |err| tracing::error!(?activity, %err, "foreground context rejected"),
                )?;

        let mut state = self.write();
        state.activity = Some(activity);
        state.application = Some(application);
        state.application_context = Some(application_context);
        tracing::info!(
            ?activity,
            ?application,
            ?application_context,
            "foreground context recorded"
        );
        Ok(())
    }

    pub fn activity(&self) -> Result<Option<ObjectRef>> {
        self.runtime()?;
        Ok(self.read().activity)
    }

    pub fn application(&self) -> Result<Option<ObjectRef>> {
        self.runtime()?;
        Ok(self.read().application)
    }

    pub fn application_context(&self) -> Result<Option<ObjectRef>> {
        self.runtime()?;
        Ok(self.read().application_context)
    }

    /// Supply the resource provider directly, bypassing lazy resolution.
    pub fn set_resource_provider(&self, provider: ResourceProvider) {
        tracing::info!(?provider, "resource provider supplied");
        self.write().resource_provider = Some(provider);
    }

    /// Cached resource provider, resolved through the application context on
    /// first use. Failures are not cached.
    pub fn resource_provider(&self) -> Result<ResourceProvider> {
        let env = self.runtime()?;
        let context = {
            let state = self.read();
            if let Some(provider) = state.resource_provider {
                return Ok(provider);
            }
            state.application_context
        };
        let context = context.ok_or_else(|| {
            HostError::ResourceProviderUnavailable("no application context recorded".into())
        })?;

        let manager = call_named(env.as_ref(), context, GET_ASSETS, None).ok_or_else(|| {
            HostError::ResourceProviderUnavailable(format!("{GET_ASSETS} returned nothing"))
        })?;
        let provider = env.resource_provider_from(manager).ok_or_else(|| {
            HostError::ResourceProviderUnavailable("host object has no native handle".into())
        })?;

        let mut state = self.write();
        // Another caller may have resolved or supplied one meanwhile; keep it.
        let provider = *state.resource_provider.get_or_insert(provider);
        tracing::debug!(?provider, "resource provider resolved");
        Ok(provider)
    }

    /// Load a class through the foreground activity's class loader; the
    /// default loader cannot see application-defined classes.
    pub fn resolve_class(&self, name: &str) -> Result<ObjectRef> {
        let env = self.runtime()?;
        let activity = self.read().activity.ok_or(HostError::NoForegroundContext)?;

        let not_found = || HostError::ClassNotFound(name.to_string());
        let loader = call_named(env.as_ref(), activity, GET_CLASS_LOADER, None).ok_or_else(not_found)?;
        let class = call_named(env.as_ref(), loader, LOAD_CLASS, Some(name)).ok_or_else(not_found)?;
        tracing::debug!(class = name, ?class, "class resolved");
        Ok(class)
    }

    /// Private files directory of `activity`, for hosts that do not report
    /// an internal data path directly.
    pub fn files_dir(&self, activity: ObjectRef) -> Result<String> {
        let env = self.runtime()?;
        let step = |step| HostError::ContextResolution { step };
        let dir = call_named(env.as_ref(), activity, GET_FILES_DIR, None)
            .ok_or_else(|| step(GET_FILES_DIR))?;
        let path = call_named(env.as_ref(), dir, GET_PATH, None).ok_or_else(|| step(GET_PATH))?;
        Ok(env.object_to_string(path).ok_or_else(|| step(GET_PATH))?)
    }
}

fn call_named(
    env: &dyn HostEnv,
    target: ObjectRef,
    method: &str,
    arg: Option<&str>,
) -> Option<ObjectRef> {
    let Some(id) = env.find_method(target, method) else {
        tracing::warn!(?target, method, "host method lookup failed");
        return None;
    };
    let result = env.call_object_method(target, id, arg);
    if result.is_none() {
        tracing::warn!(?target, method, "host method returned nothing");
    }
    result
}
