//! luahost-core: Lua interpreter bridge for native application hosts
//!
//! Embeds a single Lua interpreter in a host application and decides when,
//! and on which thread, script code runs. Host lifecycle notifications and
//! input events arrive on the UI thread; any other thread schedules script
//! text through the message channel.
//!
//! # Architecture
//!
//! ```text
//! Host lifecycle ─→ EngineContext ─→ Lifecycle callbacks ─┐
//! Input queue ───→ Multiplexer ───→ Input bridge ────────┼─→ InterpreterGuard ─→ Lua
//! Worker threads → Message channel → Multiplexer ─────────┘
//! ```
//!
//! # Modules
//!
//! - `registry`: Host context registry (runtime, activity, resource provider)
//! - `host`: Host collaborator traits and opaque handles
//! - `guard`: Interpreter guard serializing every interpreter entry
//! - `channel`: Any-thread → UI-thread script scheduling
//! - `multiplexer`: UI-thread poll loop over registered sources
//! - `input`: Input event queue bridge
//! - `lifecycle`: Callback resolution and the `bridge` script module
//! - `assets`: Asset sources and the `asset` script module
//! - `engine`: Per-instance engine context and the create sequence
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod assets;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod host;
pub mod input;
pub mod lifecycle;
pub mod logging;
pub mod multiplexer;
pub mod registry;

pub use config::Config;
pub use engine::{EngineContext, Launch};
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
