use std::io::Read;
use std::sync::Mutex;

use facet::PtrConst;

use crate::{Error, ErrorKind};

/// How many bytes a single refill pulls from the reader.
const READ_CHUNK: usize = 512;

/// In-buffer end-of-data sentinel. Scanners probe for it instead of
/// bounds-checking every byte; hitting it triggers a refill.
pub(crate) const NUL: u8 = 0;

/// The runtime state threaded through every decode program.
///
/// The input buffer always carries exactly one trailing [`NUL`] sentinel
/// past the data. `end` is the sentinel's index, so `buf[..end]` is the
/// data seen so far and `cursor <= end` at all times. The buffer is never
/// compacted, which makes `cursor` double as the total stream offset.
pub struct DeserContext {
    buf: Vec<u8>,
    end: usize,
    pub(crate) cursor: usize,
    /// Streaming refill hook. Only set while a top-level call is running;
    /// cleared before the context goes back to the pool.
    reader: Option<*mut dyn Read>,
    pub(crate) use_number: bool,
    pub(crate) disallow_unknown: bool,
}

// The raw reader pointer is only dereferenced on the thread that set it,
// within a single top-level call.
unsafe impl Send for DeserContext {}

impl DeserContext {
    pub(crate) fn new() -> Self {
        DeserContext {
            buf: vec![NUL],
            end: 0,
            cursor: 0,
            reader: None,
            use_number: false,
            disallow_unknown: false,
        }
    }

    /// Point the context at a complete in-memory document.
    pub(crate) fn set_input(&mut self, input: &[u8]) {
        self.buf.clear();
        self.buf.extend_from_slice(input);
        self.buf.push(NUL);
        self.end = input.len();
        self.cursor = 0;
    }

    /// Install the streaming refill hook.
    ///
    /// Safety: the pointee must outlive the top-level call, and
    /// `clear_reader` must run before the context is released.
    pub(crate) fn set_reader(&mut self, reader: *mut dyn Read) {
        self.reader = Some(reader);
    }

    pub(crate) fn clear_reader(&mut self) {
        self.reader = None;
    }

    /// The byte under the cursor; [`NUL`] past the end of data.
    #[inline]
    pub(crate) fn char(&self) -> u8 {
        self.buf[self.cursor]
    }

    #[inline]
    pub(crate) fn byte_at(&self, pos: usize) -> u8 {
        self.buf[pos]
    }

    #[inline]
    pub(crate) fn slice(&self, start: usize, end: usize) -> &[u8] {
        &self.buf[start..end]
    }

    /// True when the cursor sits on the sentinel rather than a literal
    /// zero byte inside the data.
    #[inline]
    pub(crate) fn at_sentinel(&self) -> bool {
        self.cursor == self.end
    }

    #[inline]
    pub(crate) fn data_end(&self) -> usize {
        self.end
    }

    /// Pull more bytes from the reader, if there is one. Returns whether
    /// anything new arrived. `Interrupted` reads are retried; other I/O
    /// failures surface unchanged as transport errors.
    pub(crate) fn refill(&mut self) -> Result<bool, Error> {
        let Some(reader) = self.reader else {
            return Ok(false);
        };
        let reader = unsafe { &mut *reader };
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    debug_assert_eq!(self.buf[self.end], NUL);
                    self.buf.pop();
                    self.buf.extend_from_slice(&chunk[..n]);
                    self.buf.push(NUL);
                    self.end += n;
                    return Ok(true);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::at(ErrorKind::Transport(e), self.cursor)),
            }
        }
    }

    /// Build an error pinned at the current cursor position.
    #[inline]
    pub(crate) fn err(&self, kind: ErrorKind) -> Error {
        Error::at(kind, self.cursor)
    }

    /// Restore the reset-state invariant before the context goes back to
    /// the pool: no caller bytes, no reader, cleared toggles.
    fn reset(&mut self) {
        self.buf.clear();
        self.buf.push(NUL);
        self.buf.shrink_to(4096);
        self.end = 0;
        self.cursor = 0;
        self.reader = None;
        self.use_number = false;
        self.disallow_unknown = false;
    }
}

/// One iteration frame of the encode interpreter.
pub(crate) enum SeqFrame {
    /// A slice or fixed-size array being walked element by element.
    Elems {
        data: *const u8,
        len: usize,
        idx: usize,
        stride: usize,
    },
    /// A map whose entries were collected (and key-sorted) up front.
    Map {
        pairs: Vec<(PtrConst<'static>, PtrConst<'static>)>,
        idx: usize,
    },
}

/// The runtime state threaded through every encode program.
pub struct EncodeContext {
    pub(crate) buf: Vec<u8>,
    pub(crate) html_escape: bool,
    pub(crate) depth: usize,
    pub(crate) prefix: Vec<u8>,
    pub(crate) unit: Vec<u8>,
    /// Base pointers for offset resolution; structural ops push and pop.
    pub(crate) bases: Vec<*const u8>,
    pub(crate) seqs: Vec<SeqFrame>,
    /// Per-record "a field has been emitted" flags for comma placement.
    pub(crate) commas: Vec<bool>,
}

unsafe impl Send for EncodeContext {}

impl EncodeContext {
    pub(crate) fn new() -> Self {
        EncodeContext {
            buf: Vec::with_capacity(1024),
            html_escape: true,
            depth: 0,
            prefix: Vec::new(),
            unit: Vec::new(),
            bases: Vec::new(),
            seqs: Vec::new(),
            commas: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn base(&self) -> *const u8 {
        *self
            .bases
            .last()
            .expect("encode program ran with no base frame")
    }

    /// Emit `prefix` then `unit` repeated `depth` times. Only reachable
    /// from indent-mode programs.
    pub(crate) fn newline(&mut self) {
        self.buf.push(b'\n');
        let prefix_len = self.prefix.len();
        let unit_len = self.unit.len();
        self.buf.reserve(prefix_len + unit_len * self.depth);
        for i in 0..prefix_len {
            let b = self.prefix[i];
            self.buf.push(b);
        }
        for _ in 0..self.depth {
            for i in 0..unit_len {
                let b = self.unit[i];
                self.buf.push(b);
            }
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.buf.shrink_to(16 * 1024);
        self.html_escape = true;
        self.depth = 0;
        self.prefix.clear();
        self.unit.clear();
        self.bases.clear();
        self.seqs.clear();
        self.commas.clear();
    }
}

// ── Free-list pools ──────────────────────────────────────────────────
//
// Both pools hand out objects in reset state and restore that invariant
// on release. A pooled object is owned by exactly one invocation at a
// time; the pools themselves are process-wide.

static CTX_POOL: Mutex<Vec<DeserContext>> = Mutex::new(Vec::new());
static ENC_POOL: Mutex<Vec<EncodeContext>> = Mutex::new(Vec::new());

pub(crate) fn acquire_deser() -> DeserContext {
    CTX_POOL
        .lock()
        .unwrap()
        .pop()
        .unwrap_or_else(DeserContext::new)
}

pub(crate) fn release_deser(mut ctx: DeserContext) {
    ctx.reset();
    let mut pool = CTX_POOL.lock().unwrap();
    if pool.len() < 16 {
        pool.push(ctx);
    }
}

pub(crate) fn acquire_encode() -> EncodeContext {
    ENC_POOL
        .lock()
        .unwrap()
        .pop()
        .unwrap_or_else(EncodeContext::new)
}

pub(crate) fn release_encode(mut ctx: EncodeContext) {
    ctx.reset();
    let mut pool = ENC_POOL.lock().unwrap();
    if pool.len() < 16 {
        pool.push(ctx);
    }
}
