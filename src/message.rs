use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Inline payloads at or below this size skip heap allocation entirely,
/// mirroring libzmq's VSM (very small message) optimization.
pub const INLINE_CAPACITY: usize = 64;

bitflags::bitflags! {
    /// Per-frame flag bits, matching the ZMTP v3 wire flags byte.
    pub struct Flags: u8 {
        /// Another frame follows in the same logical message.
        const MORE = 0b001;
        /// The length field is 8 bytes big-endian instead of 1 byte.
        const LONG = 0b010;
        /// This frame is a ZMTP command frame, not an application message.
        const COMMAND = 0b100;
        /// Frame carries a socket identity (used by ROUTER/DEALER routing,
        /// tracked as an in-memory-only bit; never placed on the wire).
        const IDENTITY = 0b1000;
    }
}

#[derive(Clone)]
enum Payload {
    Inline([u8; INLINE_CAPACITY], u8),
    Owned(Vec<u8>),
    Shared(Arc<[u8]>),
}

/// An immutable-after-send byte payload plus a flag set.
///
/// A message's payload is never mutated once it has been handed to a
/// reader: [`Message::clone`] is always a cheap refcount bump or byte
/// copy of at most [`INLINE_CAPACITY`] bytes, never a mutable alias.
#[derive(Clone)]
pub struct Message {
    payload: Payload,
    flags: Flags,
}

impl Message {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        Self {
            payload: Self::pack(bytes),
            flags: Flags::empty(),
        }
    }

    /// Build directly from a refcounted buffer, e.g. the zero-copy path
    /// where the decoder already allocated the final `Arc<[u8]>`.
    pub fn from_shared(bytes: Arc<[u8]>) -> Self {
        Self {
            payload: Payload::Shared(bytes),
            flags: Flags::empty(),
        }
    }

    fn pack(bytes: Vec<u8>) -> Payload {
        if bytes.len() <= INLINE_CAPACITY {
            let mut buf = [0u8; INLINE_CAPACITY];
            buf[..bytes.len()].copy_from_slice(&bytes);
            Payload::Inline(buf, bytes.len() as u8)
        } else {
            Payload::Owned(bytes)
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn set_more(&mut self, more: bool) {
        self.flags.set(Flags::MORE, more);
    }

    pub fn has_more(&self) -> bool {
        self.flags.contains(Flags::MORE)
    }

    pub fn is_command(&self) -> bool {
        self.flags.contains(Flags::COMMAND)
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn as_slice(&self) -> &[u8] {
        match &self.payload {
            Payload::Inline(buf, len) => &buf[..*len as usize],
            Payload::Owned(v) => v.as_slice(),
            Payload::Shared(a) => a.as_ref(),
        }
    }
}

impl Deref for Message {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.len())
            .field("flags", &self.flags)
            .finish()
    }
}

impl From<Vec<u8>> for Message {
    fn from(v: Vec<u8>) -> Self {
        Message::new(v)
    }
}

impl From<&[u8]> for Message {
    fn from(v: &[u8]) -> Self {
        Message::new(v.to_vec())
    }
}

impl From<&str> for Message {
    fn from(v: &str) -> Self {
        Message::new(v.as_bytes().to_vec())
    }
}

impl From<String> for Message {
    fn from(v: String) -> Self {
        Message::new(v.into_bytes())
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice() && self.flags == other.flags
    }
}

impl Eq for Message {}
