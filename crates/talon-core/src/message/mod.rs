//! Request/response messages: header plus body slot, lazy-parsed derived
//! fields, and the shadow-response timeout mechanism.

mod request;
mod response;

pub use request::Request;
pub use response::Response;

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A message body: either fully buffered in memory, a caller-supplied
/// reader of optionally-known size, or a caller-supplied writer callback
/// driven against a buffered sink. Only [`Body::Inline`] is ever produced
/// by parsing; the other two variants are populated by callers building an
/// outgoing message via `set_body_stream`/`set_body_stream_writer`.
pub enum Body {
    Inline(Vec<u8>),
    Reader {
        reader: Box<dyn io::Read + Send>,
        declared_size: Option<u64>,
    },
    Writer(Box<dyn FnMut(&mut dyn io::Write) -> io::Result<()> + Send>),
}

impl Default for Body {
    fn default() -> Self {
        Body::Inline(Vec::new())
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Inline(b) => f.debug_tuple("Inline").field(&b.len()).finish(),
            Body::Reader { declared_size, .. } => {
                f.debug_struct("Reader").field("declared_size", declared_size).finish()
            }
            Body::Writer(_) => f.debug_tuple("Writer").finish(),
        }
    }
}

impl Body {
    /// Exchanges the body for `new`, returning the previous value. O(1):
    /// no bytes are copied regardless of which variant is held.
    pub fn swap(&mut self, new: Body) -> Body {
        std::mem::replace(self, new)
    }

    pub fn as_inline(&self) -> Option<&[u8]> {
        match self {
            Body::Inline(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_empty_inline(&self) -> bool {
        matches!(self, Body::Inline(b) if b.is_empty())
    }
}

/// A single winner-takes-it-all slot for a displaced "shadow" response.
///
/// A server timeout handler that cannot promptly return installs a shadow
/// via [`ShadowSlot::install`]; only the first caller wins the race, and
/// the connection loop later drains it with [`ShadowSlot::take`] instead
/// of serializing the original, possibly still-in-flight, response.
#[derive(Default)]
pub struct ShadowSlot {
    installed: AtomicBool,
    slot: Mutex<Option<Arc<Response>>>,
}

impl ShadowSlot {
    pub fn new() -> Self {
        Self {
            installed: AtomicBool::new(false),
            slot: Mutex::new(None),
        }
    }

    /// Attempts to install `response` as the shadow. Returns `true` if this
    /// call won the race (and the response is now published for readers),
    /// `false` if a shadow was already installed by another caller.
    pub fn install(&self, response: Response) -> bool {
        if self
            .installed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.slot.lock() = Some(Arc::new(response));
        true
    }

    /// Reads the installed shadow, if any, with acquire ordering relative
    /// to [`ShadowSlot::install`]'s release.
    pub fn take(&self) -> Option<Arc<Response>> {
        if !self.installed.load(Ordering::Acquire) {
            return None;
        }
        self.slot.lock().clone()
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }
}

/// Adapts a byte sink so that each `write()` call becomes one `chunked`
/// frame: the stream-writer variant drives this sink, and each flush
/// turns into a chunk on the wire.
pub(super) struct ChunkedSink<'w, W: io::Write> {
    out: &'w mut W,
}

impl<'w, W: io::Write> ChunkedSink<'w, W> {
    pub(super) fn new(out: &'w mut W) -> Self {
        Self { out }
    }

    pub(super) fn finish(self) -> io::Result<()> {
        self.out.write_all(b"0\r\n\r\n")
    }
}

impl<W: io::Write> io::Write for ChunkedSink<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        crate::body::ChunkedWriter::new(self.out).write_chunk(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
