//! Request body containers.

/// The body of an outgoing request.
///
/// Bodies set with `post` or `patch` are handed to the transfer engine as a
/// contiguous buffer; a `put` body is streamed through [`PutBody`] instead,
/// chunk by chunk, at whatever pace the engine asks for it.
#[derive(Debug)]
pub(crate) enum RequestBody {
    /// No body at all.
    Empty,

    /// A buffered body passed to the engine in one piece.
    Buffer(Vec<u8>),

    /// A body streamed through the engine's read callback.
    Put(PutBody),
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::Empty
    }
}

/// A cursor over a PUT payload that feeds the transfer engine's read
/// callback.
///
/// The engine asks for bytes in arbitrarily sized chunks; each call copies
/// out as much as fits and advances the cursor. A read of zero bytes
/// signals end-of-body. The cursor is rewound before every retry attempt so
/// the full payload is replayed.
#[derive(Debug)]
pub(crate) struct PutBody {
    data: Vec<u8>,
    cursor: usize,
}

impl PutBody {
    pub(crate) fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            cursor: 0,
        }
    }

    /// Total payload size, independent of the cursor.
    pub(crate) fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Move the cursor back to the start of the payload.
    pub(crate) fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Copy the next chunk into `out`, returning the number of bytes
    /// copied. Returns `0` once the payload is drained.
    pub(crate) fn read(&mut self, out: &mut [u8]) -> usize {
        let remaining = self.data.len() - self.cursor;
        let amount = remaining.min(out.len());

        out[..amount].copy_from_slice(&self.data[self.cursor..self.cursor + amount]);
        self.cursor += amount;

        amount
    }
}
