//! Message channel: any thread → UI thread script scheduling.
//!
//! Producers hold a [`ChannelSender`] and call `post` with script text. The
//! UI thread owns the [`MessageChannel`], whose read descriptor is registered
//! with the event multiplexer; on readiness it calls `drain_and_run`, which
//! compiles and runs the text under the interpreter guard.
//!
//! In `chunk` mode the pipe carries the script bytes themselves. There is no
//! framing: writes that arrive before a drain are read together as one chunk.
//! A read that fills `read_buffer_size` is an overflow: the chunk is cut at
//! the buffer size and whatever is still pending in the pipe is discarded, so
//! the tail (and anything posted behind it) never runs. The writer is not
//! told. In `queued` mode every post is a separate message in a bounded queue
//! and the pipe only carries wake-up bytes.

use crate::config::{ChannelConfig, ChannelMode};
use crate::error::{ChannelError, Result, ScriptError};
use crate::guard::InterpreterGuard;
use filedescriptor::{AsRawSocketDescriptor, FileDescriptor, Pipe, SocketDescriptor};
use flume::{Receiver, Sender, TryRecvError, TrySendError};
use mlua::Lua;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};

/// Chunk name used for posted script text.
pub const POST_CHUNK_NAME: &str = "=post";

const WAKE: &[u8] = b"!";

struct SenderInner {
    write: Mutex<FileDescriptor>,
    queue: Option<Sender<Vec<u8>>>,
    max_message_bytes: usize,
}

/// Write side of the channel. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct ChannelSender {
    inner: Arc<SenderInner>,
}

impl std::fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender")
            .field("queued", &self.inner.queue.is_some())
            .finish_non_exhaustive()
    }
}

impl ChannelSender {
    /// Schedule `bytes` for execution on the UI thread.
    ///
    /// Returns the number of bytes accepted. In chunk mode a full pipe gives
    /// a short write (possibly 0); in queued mode a message is accepted whole
    /// or not at all.
    pub fn post(&self, bytes: &[u8]) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        match &self.inner.queue {
            None => self.write_pipe(bytes),
            Some(queue) => {
                if bytes.len() > self.inner.max_message_bytes {
                    tracing::warn!(
                        bytes = bytes.len(),
                        limit = self.inner.max_message_bytes,
                        "posted message exceeds limit; dropped"
                    );
                    return Ok(0);
                }
                match queue.try_send(bytes.to_vec()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!(bytes = bytes.len(), "message queue full");
                        return Ok(0);
                    }
                    Err(TrySendError::Disconnected(_)) => return Err(ChannelError::Closed.into()),
                }
                // A full pipe already guarantees a pending wake-up.
                self.write_pipe(WAKE)?;
                Ok(bytes.len())
            }
        }
    }

    fn write_pipe(&self, bytes: &[u8]) -> Result<usize> {
        let mut write = self
            .inner
            .write
            .lock()
            .map_err(|_| ChannelError::Write(std::io::Error::other("writer lock poisoned")))?;
        match write.write(bytes) {
            Ok(written) => {
                tracing::trace!(bytes = written, requested = bytes.len(), "posted");
                Ok(written)
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(err) if err.kind() == ErrorKind::BrokenPipe => Err(ChannelError::Closed.into()),
            Err(err) => Err(ChannelError::Write(err).into()),
        }
    }
}

/// Outcome of one `drain_and_run` cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Bytes consumed from the pipe
    pub bytes_read: usize,
    /// Chunks that compiled and ran to completion
    pub executed: usize,
    /// Chunks that failed to compile or raised
    pub failed: usize,
    /// Bytes dropped after an overflowing read
    pub discarded: usize,
}

/// UI-thread side of the channel.
pub struct MessageChannel {
    read: FileDescriptor,
    sender: ChannelSender,
    queue: Option<Receiver<Vec<u8>>>,
    buffer: Vec<u8>,
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("descriptor", &self.descriptor())
            .field("read_buffer_size", &self.buffer.len())
            .field("queued", &self.queue.is_some())
            .finish()
    }
}

impl MessageChannel {
    pub fn new(config: &ChannelConfig) -> Result<Self> {
        let Pipe {
            mut read,
            mut write,
        } = Pipe::new().map_err(ChannelError::Pipe)?;
        read.set_non_blocking(true).map_err(ChannelError::Pipe)?;
        write.set_non_blocking(true).map_err(ChannelError::Pipe)?;

        let (queue_tx, queue_rx) = match config.mode {
            ChannelMode::Chunk => (None, None),
            ChannelMode::Queued => {
                let (tx, rx) = flume::bounded(config.queue_capacity);
                (Some(tx), Some(rx))
            }
        };

        let sender = ChannelSender {
            inner: Arc::new(SenderInner {
                write: Mutex::new(write),
                queue: queue_tx,
                max_message_bytes: config.max_message_bytes,
            }),
        };

        Ok(Self {
            read,
            sender,
            queue: queue_rx,
            buffer: vec![0; config.read_buffer_size],
        })
    }

    /// Descriptor to register with the multiplexer.
    pub fn descriptor(&self) -> SocketDescriptor {
        self.read.as_socket_descriptor()
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Read what is pending and run it. Script failures are logged and
    /// counted, never returned.
    pub fn drain_and_run(&mut self, guard: &InterpreterGuard) -> DrainReport {
        let mut report = DrainReport::default();

        let read = match self.read.read(&mut self.buffer) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::WouldBlock => 0,
            Err(err) => {
                tracing::error!(%err, "channel read failed");
                0
            }
        };
        report.bytes_read = read;

        match &self.queue {
            None => {
                if read == 0 {
                    tracing::debug!("channel signalled without data");
                    return report;
                }
                if read == self.buffer.len() {
                    report.discarded = discard_pending(&mut self.read);
                    tracing::debug!(
                        bytes = read,
                        discarded = report.discarded,
                        "channel overflow; text beyond the read buffer dropped"
                    );
                }
                tally(&mut report, run_chunk(guard, &self.buffer[..read]));
            }
            Some(queue) => loop {
                match queue.try_recv() {
                    Ok(message) => tally(&mut report, run_chunk(guard, &message)),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            },
        }
        report
    }
}

/// Read and drop everything currently pending in the pipe.
fn discard_pending(read: &mut FileDescriptor) -> usize {
    let mut scratch = [0u8; 1024];
    let mut discarded = 0;
    loop {
        match read.read(&mut scratch) {
            Ok(0) => break,
            Ok(n) => discarded += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(err) => {
                tracing::error!(%err, "channel read failed while discarding");
                break;
            }
        }
    }
    discarded
}

fn tally(report: &mut DrainReport, outcome: ChunkOutcome) {
    match outcome {
        ChunkOutcome::Ran => report.executed += 1,
        ChunkOutcome::Failed => report.failed += 1,
        ChunkOutcome::Skipped => {}
    }
}

enum ChunkOutcome {
    Ran,
    Failed,
    Skipped,
}

fn run_chunk(guard: &InterpreterGuard, text: &[u8]) -> ChunkOutcome {
    let outcome = guard.with_lua(|lua| {
        let function = lua
            .load(text)
            .set_name(POST_CHUNK_NAME)
            .into_function()
            .map_err(|err| ScriptError::from_lua(POST_CHUNK_NAME, &err))?;
        function
            .call::<_, ()>(())
            .map_err(|err| ScriptError::from_lua(POST_CHUNK_NAME, &err))
    });

    match outcome {
        Ok(Ok(())) => {
            tracing::trace!(bytes = text.len(), "posted chunk ran");
            ChunkOutcome::Ran
        }
        Ok(Err(err)) => {
            tracing::error!(chunk = POST_CHUNK_NAME, %err, "posted script failed");
            ChunkOutcome::Failed
        }
        Err(err) => {
            tracing::warn!(%err, bytes = text.len(), "posted script discarded");
            ChunkOutcome::Skipped
        }
    }
}

/// Expose `post(text) -> integer` (and `aliases`) to scripts.
///
/// The function only writes to the channel, so it is safe to call from any
/// script context, including code already running under the guard. Failures
/// are logged and reported to the script as 0 bytes accepted.
pub fn install_post(lua: &Lua, sender: ChannelSender, aliases: &[String]) -> mlua::Result<()> {
    let post = lua.create_function(move |_, text: mlua::String| {
        let accepted = match sender.post(text.as_bytes()) {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(%err, "post failed");
                0
            }
        };
        Ok(accepted as i64)
    })?;

    let globals = lua.globals();
    for name in std::iter::once("post").chain(aliases.iter().map(String::as_str)) {
        globals.set(name, post.clone())?;
    }
    Ok(())
}
