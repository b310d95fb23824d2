//! Event multiplexer for the UI thread.
//!
//! A thin layer over `filedescriptor::poll`: sources are descriptors plus a
//! handler, and each ready source gets its handler invoked with the owner's
//! context. Handlers run sequentially on the polling thread.

use crate::config::LooperConfig;
use crate::error::{Error, Result};
use bitflags::bitflags;
use filedescriptor::{POLLERR, POLLHUP, POLLIN, SocketDescriptor, poll, pollfd};
use std::time::Duration;

bitflags! {
    /// Readiness reported to a handler (and interest requested on register).
    #[derive(Default)]
    pub struct Readiness: u8 {
        const READABLE = 0b0001;
        const ERROR = 0b0010;
        const HANGUP = 0b0100;
    }
}

impl Readiness {
    fn poll_events(self) -> i16 {
        if self.contains(Self::READABLE) { POLLIN } else { 0 }
    }

    fn from_revents(revents: i16) -> Self {
        let mut readiness = Self::empty();
        if revents & POLLIN != 0 {
            readiness |= Self::READABLE;
        }
        if revents & POLLERR != 0 {
            readiness |= Self::ERROR;
        }
        if revents & POLLHUP != 0 {
            readiness |= Self::HANGUP;
        }
        // POLLNVAL and friends: the descriptor is unusable.
        if readiness.is_empty() && revents != 0 {
            readiness = Self::ERROR;
        }
        readiness
    }
}

/// Returned by a handler to keep or detach its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceControl {
    Keep,
    Remove,
}

pub type SourceHandler<C> = Box<dyn FnMut(&mut C, Readiness) -> SourceControl>;

struct Source<C> {
    descriptor: SocketDescriptor,
    interest: Readiness,
    handler: SourceHandler<C>,
}

/// Poll loop owning a set of pollable sources.
pub struct EventMultiplexer<C> {
    sources: Vec<Source<C>>,
    idle_sleep: Duration,
    max_drain_passes: usize,
}

impl<C> std::fmt::Debug for EventMultiplexer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMultiplexer")
            .field(
                "sources",
                &self.sources.iter().map(|s| s.descriptor).collect::<Vec<_>>(),
            )
            .field("idle_sleep", &self.idle_sleep)
            .finish_non_exhaustive()
    }
}

impl<C> EventMultiplexer<C> {
    pub fn new(config: &LooperConfig) -> Self {
        Self {
            sources: Vec::new(),
            idle_sleep: config.idle_sleep(),
            max_drain_passes: config.max_drain_passes,
        }
    }

    /// Attach a source. A descriptor that is already registered has its
    /// interest and handler replaced.
    pub fn register_source(
        &mut self,
        descriptor: SocketDescriptor,
        interest: Readiness,
        handler: SourceHandler<C>,
    ) {
        let source = Source {
            descriptor,
            interest,
            handler,
        };
        if let Some(existing) = self.sources.iter_mut().find(|s| s.descriptor == descriptor) {
            tracing::debug!(fd = ?descriptor, "replacing multiplexer source");
            *existing = source;
        } else {
            tracing::debug!(fd = ?descriptor, "registered multiplexer source");
            self.sources.push(source);
        }
    }

    /// Detach a source. Returns whether it was registered.
    pub fn unregister_source(&mut self, descriptor: SocketDescriptor) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.descriptor != descriptor);
        let removed = self.sources.len() != before;
        if removed {
            tracing::debug!(fd = ?descriptor, "unregistered multiplexer source");
        }
        removed
    }

    pub fn is_registered(&self, descriptor: SocketDescriptor) -> bool {
        self.sources.iter().any(|s| s.descriptor == descriptor)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Wait for readiness and dispatch every ready source once.
    ///
    /// `None` blocks until something is ready; `Some(Duration::ZERO)` only
    /// checks. Returns the number of handlers invoked. With no sources the
    /// call sleeps the idle duration (capped at `timeout`) and returns 0.
    pub fn poll_once(&mut self, ctx: &mut C, timeout: Option<Duration>) -> Result<usize> {
        if self.sources.is_empty() {
            let sleep = timeout.map_or(self.idle_sleep, |t| t.min(self.idle_sleep));
            if !sleep.is_zero() {
                std::thread::sleep(sleep);
            }
            return Ok(0);
        }

        let mut pfd: Vec<pollfd> = self
            .sources
            .iter()
            .map(|s| pollfd {
                fd: s.descriptor,
                events: s.interest.poll_events(),
                revents: 0,
            })
            .collect();

        let ready = poll(&mut pfd, timeout).map_err(Error::Poll)?;
        if ready == 0 {
            return Ok(0);
        }

        let mut dispatched = 0;
        let mut removed = Vec::new();
        for (source, entry) in self.sources.iter_mut().zip(&pfd) {
            let readiness = Readiness::from_revents(entry.revents);
            if readiness.is_empty() {
                continue;
            }
            tracing::trace!(fd = ?source.descriptor, ?readiness, "source ready");
            dispatched += 1;
            if (source.handler)(ctx, readiness) == SourceControl::Remove {
                removed.push(source.descriptor);
            }
        }
        for descriptor in removed {
            self.unregister_source(descriptor);
        }
        Ok(dispatched)
    }

    /// Dispatch ready sources without blocking until none are ready, up to
    /// the configured number of passes. Returns the total handlers invoked.
    pub fn drain_ready(&mut self, ctx: &mut C) -> Result<usize> {
        let mut total = 0;
        for _ in 0..self.max_drain_passes {
            if self.sources.is_empty() {
                break;
            }
            let dispatched = self.poll_once(ctx, Some(Duration::ZERO))?;
            if dispatched == 0 {
                break;
            }
            total += dispatched;
        }
        Ok(total)
    }
}
