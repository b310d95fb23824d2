//! Asset source and the script-facing `asset` module.
//!
//! Assets are read-only files bundled with the application and addressed by
//! relative path. The bridge loads its entry script from here, and scripts
//! reach the same source through `asset.*` and `require`.

use crate::error::AssetError;
use mlua::{Function, Lua, MultiValue, Table, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Module search templates used by the `require` searcher.
pub const DEFAULT_ASSET_PATH: &str = "?.lua;lua/?.lua;lua/?/init.lua";

/// Read-only application assets.
pub trait AssetSource: Send + Sync {
    /// Full contents of the asset at `path`.
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError>;

    /// Source text of a script asset.
    fn load_script(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        self.read(path)
    }

    fn exists(&self, path: &str) -> bool;

    /// Entry names directly under `dir` (`""` is the root).
    fn list(&self, dir: &str) -> Result<Vec<String>, AssetError>;

    fn length(&self, path: &str) -> Option<u64> {
        self.read(path).ok().map(|bytes| bytes.len() as u64)
    }
}

/// Assets served from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, AssetError> {
        let relative = Path::new(path);
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(AssetError::OutsideRoot(path.to_string())),
            }
        }

        // Symlinks inside the root must not lead out of it.
        let Ok(real) = resolved.canonicalize() else {
            return Ok(resolved);
        };
        let root = self.root.canonicalize().map_err(|source| AssetError::Io {
            path: path.to_string(),
            source,
        })?;
        if !real.starts_with(&root) {
            tracing::warn!(asset = path, target = %real.display(), "asset link escapes the root");
            return Err(AssetError::OutsideRoot(path.to_string()));
        }
        Ok(real)
    }
}

impl AssetSource for DirAssetSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError> {
        let full = self.resolve(path)?;
        if !full.is_file() {
            return Err(AssetError::NotFound(path.to_string()));
        }
        std::fs::read(&full).map_err(|source| AssetError::Io {
            path: path.to_string(),
            source,
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok_and(|full| full.is_file())
    }

    fn list(&self, dir: &str) -> Result<Vec<String>, AssetError> {
        let full = self.resolve(dir)?;
        if !full.is_dir() {
            return Err(AssetError::NotFound(dir.to_string()));
        }
        let io_err = |source| AssetError::Io {
            path: dir.to_string(),
            source,
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&full).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn length(&self, path: &str) -> Option<u64> {
        let full = self.resolve(path).ok()?;
        std::fs::metadata(full)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|meta| meta.len())
    }
}

/// Chunk name for a script loaded from an asset.
pub fn asset_chunk_name(path: &str) -> String {
    format!("@{path}")
}

/// Compile an asset script into a function without running it.
pub fn load_asset<'lua>(
    lua: &'lua Lua,
    assets: &dyn AssetSource,
    path: &str,
) -> mlua::Result<Function<'lua>> {
    let text = assets.load_script(path).map_err(mlua::Error::external)?;
    lua.load(text).set_name(asset_chunk_name(path)).into_function()
}

fn asset_error(err: AssetError) -> mlua::Error {
    mlua::Error::RuntimeError(err.to_string())
}

/// Install the `asset` global and its `require` searcher.
pub fn install_asset_module(lua: &Lua, assets: Arc<dyn AssetSource>) -> mlua::Result<()> {
    let module = lua.create_table()?;

    let source = assets.clone();
    module.set(
        "loadfile",
        lua.create_function(move |lua, path: String| {
            match load_asset(lua, source.as_ref(), &path) {
                Ok(function) => Ok((Value::Function(function), None)),
                Err(err) => Ok((Value::Nil, Some(err.to_string()))),
            }
        })?,
    )?;

    let source = assets.clone();
    module.set(
        "dofile",
        lua.create_function(move |lua, path: String| {
            let outcome = load_asset(lua, source.as_ref(), &path)
                .and_then(|function| function.call::<_, MultiValue>(()));
            match outcome {
                Ok(values) => Ok(values),
                Err(err) => {
                    tracing::error!(chunk = %path, %err, "asset script failed");
                    Ok(MultiValue::new())
                }
            }
        })?,
    )?;

    let source = assets.clone();
    let exists = lua.create_function(move |_, path: String| Ok(source.exists(&path)))?;
    module.set("exists", exists.clone())?;
    module.set("readable", exists)?;

    let source = assets.clone();
    module.set(
        "list",
        lua.create_function(move |lua, dir: Option<String>| {
            let names = source
                .list(dir.as_deref().unwrap_or(""))
                .map_err(asset_error)?;
            lua.create_sequence_from(names)
        })?,
    )?;

    let source = assets.clone();
    module.set(
        "string",
        lua.create_function(move |lua, path: String| {
            let bytes = source.read(&path).map_err(asset_error)?;
            lua.create_string(bytes)
        })?,
    )?;

    let source = assets.clone();
    module.set(
        "length",
        lua.create_function(move |_, path: String| Ok(source.length(&path)))?,
    )?;

    module.set("path", DEFAULT_ASSET_PATH)?;

    let source = assets;
    let module_key = lua.create_registry_value(module.clone())?;
    let searcher = lua.create_function(move |lua, name: String| {
        let module: Table = lua.registry_value(&module_key)?;
        let templates: String = module.get("path")?;
        let relative = name.replace('.', "/");
        let mut tried = Vec::new();
        for template in templates.split(';').filter(|t| !t.is_empty()) {
            let candidate = template.replace('?', &relative);
            if source.exists(&candidate) {
                let loader = load_asset(lua, source.as_ref(), &candidate).map_err(|err| {
                    mlua::Error::RuntimeError(format!(
                        "error loading module {name} from asset {candidate}:\n\t{err}"
                    ))
                })?;
                return Ok((Value::Function(loader), Some(candidate)));
            }
            tried.push(format!("no asset {candidate}"));
        }
        Ok((Value::String(lua.create_string(tried.join("\n\t"))?), None))
    })?;
    module.set("loader", searcher.clone())?;

    register_searcher(lua, searcher)?;
    lua.globals().set("asset", module)
}

/// Insert `searcher` right after the preload searcher.
fn register_searcher(lua: &Lua, searcher: Function<'_>) -> mlua::Result<()> {
    let Some(package) = lua.globals().get::<_, Option<Table>>("package")? else {
        return Ok(());
    };
    let Some(searchers) = package.get::<_, Option<Table>>("searchers")? else {
        return Ok(());
    };
    let len = searchers.raw_len();
    for i in (2..=len).rev() {
        let value: Value = searchers.raw_get(i)?;
        searchers.raw_set(i + 1, value)?;
    }
    searchers.raw_set(2, searcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn asset_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("init.lua"), "loaded = (loaded or 0) + 1\nreturn 'init'").unwrap();
        fs::write(dir.path().join("data.txt"), "hello assets").unwrap();
        fs::create_dir_all(dir.path().join("lua").join("widgets")).unwrap();
        fs::write(
            dir.path().join("lua").join("widgets").join("init.lua"),
            "return { name = 'widgets' }",
        )
        .unwrap();
        fs::write(dir.path().join("broken.lua"), "this is not lua").unwrap();
        dir
    }

    fn lua_with_assets(root: &Path) -> Lua {
        let lua = Lua::new();
        install_asset_module(&lua, Arc::new(DirAssetSource::new(root))).unwrap();
        lua
    }

    #[test]
    fn dir_source_reads_and_lists() {
        let dir = asset_dir();
        let source = DirAssetSource::new(dir.path());
        assert_eq!(source.read("data.txt").unwrap(), b"hello assets");
        assert!(source.exists("init.lua"));
        assert!(!source.exists("lua"));
        assert_eq!(source.length("data.txt"), Some(12));
        assert_eq!(source.list("lua").unwrap(), vec!["widgets".to_string()]);
        assert!(source.list("").unwrap().contains(&"data.txt".to_string()));
        assert!(matches!(source.read("missing.lua"), Err(AssetError::NotFound(_))));
    }

    #[test]
    fn dir_source_stays_inside_root() {
        let dir = asset_dir();
        let source = DirAssetSource::new(dir.path().join("lua"));
        assert!(matches!(source.read("../data.txt"), Err(AssetError::OutsideRoot(_))));
        assert!(matches!(source.read("/etc/passwd"), Err(AssetError::OutsideRoot(_))));
        assert!(!source.exists("../init.lua"));
    }

    #[cfg(unix)]
    #[test]
    fn links_out_of_the_root_are_rejected() {
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "outside").unwrap();
        let dir = asset_dir();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("leak.txt"))
            .unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("elsewhere")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("data.txt"), dir.path().join("alias.txt"))
            .unwrap();

        let source = DirAssetSource::new(dir.path());
        assert!(matches!(source.read("leak.txt"), Err(AssetError::OutsideRoot(_))));
        assert!(matches!(
            source.read("elsewhere/secret.txt"),
            Err(AssetError::OutsideRoot(_))
        ));
        assert!(matches!(source.list("elsewhere"), Err(AssetError::OutsideRoot(_))));
        assert!(!source.exists("leak.txt"));
        assert_eq!(source.length("leak.txt"), None);
        assert_eq!(source.read("alias.txt").unwrap(), b"hello assets");
    }

    #[test]
    fn dofile_runs_and_returns() {
        let dir = asset_dir();
        let lua = lua_with_assets(dir.path());
        let result: String = lua.load("return asset.dofile('init.lua')").eval().unwrap();
        assert_eq!(result, "init");
        assert_eq!(lua.globals().get::<_, i64>("loaded").unwrap(), 1);
    }

    #[test]
    fn dofile_failure_returns_nothing() {
        let dir = asset_dir();
        let lua = lua_with_assets(dir.path());
        let count: i64 = lua
            .load("return select('#', asset.dofile('broken.lua'))")
            .eval()
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn loadfile_reports_missing_asset() {
        let dir = asset_dir();
        let lua = lua_with_assets(dir.path());
        let (function, message): (Option<Function>, Option<String>) =
            lua.load("return asset.loadfile('nope.lua')").eval().unwrap();
        assert!(function.is_none());
        assert!(message.unwrap().contains("nope.lua"));

        let loaded: i64 = lua
            .load("local f = asset.loadfile('init.lua'); f(); f(); return loaded")
            .eval()
            .unwrap();
        assert_eq!(loaded, 2);
    }

    #[test]
    fn string_exists_length_and_list() {
        let dir = asset_dir();
        let lua = lua_with_assets(dir.path());
        let text: String = lua.load("return asset.string('data.txt')").eval().unwrap();
        assert_eq!(text, "hello assets");
        let (exists, readable): (bool, bool) = lua
            .load("return asset.exists('data.txt'), asset.readable('nope')")
            .eval()
            .unwrap();
        assert!(exists);
        assert!(!readable);
        let length: Option<i64> = lua.load("return asset.length('nope')").eval().unwrap();
        assert_eq!(length, None);
        let listed: Vec<String> = lua.load("return asset.list('lua')").eval().unwrap();
        assert_eq!(listed, vec!["widgets".to_string()]);
        assert!(lua.load("return asset.string('nope')").exec().is_err());
    }

    #[test]
    fn require_finds_asset_modules() {
        let dir = asset_dir();
        let lua = lua_with_assets(dir.path());
        let name: String = lua
            .load("return require('widgets').name")
            .eval()
            .unwrap();
        assert_eq!(name, "widgets");

        let err = lua.load("require('absent.module')").exec().unwrap_err();
        assert!(err.to_string().contains("no asset absent/module.lua"));
    }
}
