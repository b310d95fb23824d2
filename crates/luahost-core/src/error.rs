//! Error types for luahost-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for luahost-core
#[derive(Error, Debug)]
pub enum Error {
    /// Host capability lookups (registry)
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    /// Script compile/runtime failures
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Message channel failures
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Asset source errors
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Interpreter setup failures outside of script execution
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The multiplexer's poll call failed
    #[error("poll failed: {0}")]
    Poll(#[source] filedescriptor::Error),

    /// The interpreter was released by the destroy notification
    #[error("interpreter is closed")]
    InterpreterClosed,
}

impl Error {
    /// True for failures raised by script code rather than by the bridge.
    #[must_use]
    pub fn is_script_failure(&self) -> bool {
        matches!(self, Self::Script(_))
    }
}

/// Failures resolving host capabilities through the context registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The registry was used before `set_runtime_handle`
    #[error("host runtime handle has not been set")]
    RuntimeNotAttached,

    /// No foreground activity has been recorded yet
    #[error("no foreground activity context has been recorded")]
    NoForegroundContext,

    /// A capability lookup returned nothing; `step` names the lookup
    #[error("context resolution failed at {step}")]
    ContextResolution { step: &'static str },

    /// The host exposes no resource provider
    #[error("resource provider unavailable: {0}")]
    ResourceProviderUnavailable(String),

    /// A class could not be loaded through the activity class loader
    #[error("class not found: {0}")]
    ClassNotFound(String),
}

/// Script text failed to compile or raised while running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("compile error in {chunk}: {message}")]
    Compile { chunk: String, message: String },

    #[error("runtime error in {chunk}: {message}")]
    Runtime { chunk: String, message: String },
}

impl ScriptError {
    /// Classify an interpreter error raised while loading or running `chunk`.
    pub fn from_lua(chunk: impl Into<String>, err: &mlua::Error) -> Self {
        let chunk = chunk.into();
        match err {
            mlua::Error::SyntaxError { message, .. } => Self::Compile {
                chunk,
                message: message.clone(),
            },
            other => Self::Runtime {
                chunk,
                message: other.to_string(),
            },
        }
    }

    #[must_use]
    pub fn chunk(&self) -> &str {
        match self {
            Self::Compile { chunk, .. } | Self::Runtime { chunk, .. } => chunk,
        }
    }
}

/// Message channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The UI side of the channel has been dropped
    #[error("message channel is closed")]
    Closed,

    #[error("failed to create channel pipe: {0}")]
    Pipe(#[source] filedescriptor::Error),

    #[error("channel write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("channel read failed: {0}")]
    Read(#[source] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Asset source errors
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("cannot open asset {0}")]
    NotFound(String),

    #[error("asset path escapes the asset root: {0}")]
    OutsideRoot(String),

    #[error("failed to read asset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_classify_as_compile() {
        let lua = mlua::Lua::new();
        let err = lua.load("this is not lua").exec().unwrap_err();
        let classified = ScriptError::from_lua("=post", &err);
        assert!(matches!(classified, ScriptError::Compile { .. }));
        assert_eq!(classified.chunk(), "=post");
    }

    #[test]
    fn raised_errors_classify_as_runtime() {
        let lua = mlua::Lua::new();
        let err = lua.load("error('boom')").exec().unwrap_err();
        let classified = ScriptError::from_lua("init.lua", &err);
        match classified {
            ScriptError::Runtime { message, .. } => assert!(message.contains("boom")),
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn host_errors_wrap_into_main_error() {
        let err: Error = HostError::ClassNotFound("com.example.Camera".to_string()).into();
        assert!(err.to_string().contains("com.example.Camera"));
        assert!(!err.is_script_failure());
    }

    #[test]
    fn script_errors_are_script_failures() {
        let err: Error = ScriptError::Runtime {
            chunk: "x".to_string(),
            message: "y".to_string(),
        }
        .into();
        assert!(err.is_script_failure());
    }
}
