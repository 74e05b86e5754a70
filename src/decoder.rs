use crate::error::{Error, Result};
use crate::message::{Flags, Message};
use std::collections::VecDeque;
use std::sync::Arc;

/// Frames whose body is at least this many bytes bypass the scratch buffer
/// entirely and are decoded straight into the eventual message payload
/// (spec §4.4: "zero-copy is selected when and only when the next step's
/// byte count is >= the scratch buffer size").
const ZERO_COPY_THRESHOLD: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Flags,
    ShortLen,
    LongLen,
    Body,
}

#[derive(Debug)]
enum Target {
    Scratch,
    ZeroCopy(Vec<u8>),
}

/// A ZMTP v3 frame decoder: consumes raw bytes and emits whole messages.
///
/// The state variable (`step`) is opaque to callers — concrete framing
/// knowledge lives entirely in [`Decoder::advance`], matching the spec's
/// "opaque state-tag" design note (§9): a tagged `enum` instead of a
/// type-erased step identifier.
pub struct Decoder {
    step: Step,
    target: Target,
    to_read: usize,
    read_pos: usize,
    scratch: [u8; 8],
    flags: Flags,
    body_len: usize,
    max_msg_size: usize,
    out: VecDeque<Message>,
    has_more: bool,
    dead: bool,
}

impl Decoder {
    pub fn new(max_msg_size: usize) -> Self {
        Self {
            step: Step::Flags,
            target: Target::Scratch,
            to_read: 1,
            read_pos: 0,
            scratch: [0u8; 8],
            flags: Flags::empty(),
            body_len: 0,
            max_msg_size,
            out: VecDeque::new(),
            has_more: false,
            dead: false,
        }
    }

    /// Whether the most recently completed message has `MORE` set.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Pop one fully decoded message, if any are buffered.
    pub fn pop_message(&mut self) -> Option<Message> {
        self.out.pop_front()
    }

    /// When the current step wants its bytes read directly into the final
    /// message buffer, returns that buffer's remaining window so the
    /// engine can `read()` straight into it — the true zero-copy path.
    /// Returns `None` for small steps (flags, length, short body), which
    /// should instead be fed through [`Decoder::process_buffer`] using the
    /// engine's own shared receive buffer.
    pub fn zero_copy_target(&mut self) -> Option<&mut [u8]> {
        match &mut self.target {
            Target::ZeroCopy(buf) => Some(&mut buf[self.read_pos..self.read_pos + self.to_read]),
            Target::Scratch => None,
        }
    }

    /// Acknowledge `n` bytes read directly into the buffer handed out by
    /// [`Decoder::zero_copy_target`].
    pub fn commit_zero_copy(&mut self, n: usize) -> Result<()> {
        if self.dead {
            return Err(Error::protocol("decoder is dead"));
        }
        self.read_pos += n;
        self.to_read -= n;
        while self.to_read == 0 {
            if !self.advance()? {
                break;
            }
        }
        Ok(())
    }

    fn target_mut(&mut self) -> &mut [u8] {
        match &mut self.target {
            Target::Scratch => &mut self.scratch[self.read_pos..self.read_pos + self.to_read],
            Target::ZeroCopy(buf) => &mut buf[self.read_pos..self.read_pos + self.to_read],
        }
    }

    /// Consume bytes from `source`, feeding completed steps to `advance`.
    /// Returns the number of bytes of `source` consumed. Implements the
    /// copy loop from spec §4.4 directly: it does not assume `source` and
    /// the decoder's own target buffer are the same memory, so it behaves
    /// correctly regardless of how the caller chunked the byte stream
    /// (property 3/4 in spec §8).
    pub fn process_buffer(&mut self, source: &[u8]) -> Result<usize> {
        if self.dead {
            return Err(Error::protocol("decoder is dead"));
        }

        let mut consumed = 0usize;
        while consumed < source.len() {
            let remaining_in_source = source.len() - consumed;
            let take = self.to_read.min(remaining_in_source);
            if take > 0 {
                let dst_start = self.read_pos;
                {
                    let dst = self.target_mut();
                    dst[..take].copy_from_slice(&source[consumed..consumed + take]);
                }
                let _ = dst_start;
                self.read_pos += take;
                self.to_read -= take;
                consumed += take;
            }

            if self.to_read == 0 {
                if !self.advance()? {
                    // Decoder finished a whole message and reset to Flags;
                    // loop continues to decode any further frames packed
                    // into the same source chunk.
                    continue;
                }
            } else {
                // Current step still wants more bytes than `source` has
                // left; stop here and wait for the next read.
                break;
            }
        }

        Ok(consumed)
    }

    /// Execute the action for the step that just finished filling its
    /// target. Returns `Ok(true)` if the new step is zero-copy (caller
    /// should prefer `zero_copy_target`/`commit_zero_copy` next), `Ok(false)`
    /// otherwise. A transition to an invalid state — oversize frame,
    /// malformed flags — latches the decoder dead and returns `Err`.
    fn advance(&mut self) -> Result<bool> {
        match self.step {
            Step::Flags => {
                let byte = self.scratch[0];
                let flags = Flags::from_bits_truncate(byte);
                self.flags = flags;
                if flags.contains(Flags::LONG) {
                    self.next_step(Step::LongLen, 8);
                } else {
                    self.next_step(Step::ShortLen, 1);
                }
                Ok(false)
            }
            Step::ShortLen => {
                self.body_len = self.scratch[0] as usize;
                self.begin_body()
            }
            Step::LongLen => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&self.scratch[..8]);
                self.body_len = u64::from_be_bytes(buf) as usize;
                self.begin_body()
            }
            Step::Body => {
                let msg = self.finish_message()?;
                self.out.push_back(msg);
                self.has_more = self.flags.contains(Flags::MORE);
                self.next_step(Step::Flags, 1);
                Ok(false)
            }
        }
    }

    fn begin_body(&mut self) -> Result<bool> {
        if self.max_msg_size > 0 && self.body_len > self.max_msg_size {
            self.dead = true;
            return Err(Error::protocol(format!(
                "frame of {} bytes exceeds max_msg_size {}",
                self.body_len, self.max_msg_size
            )));
        }

        self.step = Step::Body;
        self.read_pos = 0;
        self.to_read = self.body_len;

        if self.body_len >= ZERO_COPY_THRESHOLD {
            self.target = Target::ZeroCopy(vec![0u8; self.body_len]);
            Ok(true)
        } else {
            self.target = Target::Scratch;
            // `self.scratch` is only 8 bytes; short bodies below the
            // zero-copy threshold but above that are decoded straight into
            // an owned Vec sized for the body instead, since the flags/len
            // scratch array is sized only for header fields.
            if self.body_len > self.scratch.len() {
                self.target = Target::ZeroCopy(vec![0u8; self.body_len]);
            }
            Ok(false)
        }
    }

    fn finish_message(&mut self) -> Result<Message> {
        let bytes = match std::mem::replace(&mut self.target, Target::Scratch) {
            Target::Scratch => self.scratch[..self.body_len].to_vec(),
            Target::ZeroCopy(buf) => buf,
        };
        let msg = if bytes.len() >= ZERO_COPY_THRESHOLD {
            Message::from_shared(Arc::from(bytes.into_boxed_slice()))
        } else {
            Message::new(bytes)
        };
        Ok(msg.with_flags(self.flags))
    }

    fn next_step(&mut self, step: Step, to_read: usize) {
        self.step = step;
        self.read_pos = 0;
        self.to_read = to_read;
        self.target = Target::Scratch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;

    fn decode_all(decoder: &mut Decoder, chunks: &[&[u8]]) -> Vec<Message> {
        for chunk in chunks {
            let mut offset = 0;
            while offset < chunk.len() {
                offset += decoder.process_buffer(&chunk[offset..]).unwrap();
            }
        }
        let mut out = Vec::new();
        while let Some(m) = decoder.pop_message() {
            out.push(m);
        }
        out
    }

    #[test]
    fn round_trips_short_messages_in_one_call() {
        let msgs = vec![Message::new(b"hello".to_vec())];
        let mut encoder = Encoder::new();
        let bytes = encoder.encode_all(msgs.clone());

        let mut decoder = Decoder::new(0);
        let decoded = decode_all(&mut decoder, &[&bytes]);
        assert_eq!(decoded, msgs);
    }

    #[test]
    fn round_trips_regardless_of_chunking() {
        let msgs = vec![
            Message::new(b"a".to_vec()).with_flags(Flags::MORE),
            Message::new(b"bb".to_vec()).with_flags(Flags::MORE),
            Message::new(b"ccc".to_vec()),
        ];
        let mut encoder = Encoder::new();
        let bytes = encoder.encode_all(msgs.clone());

        // byte-by-byte chunking
        let mut decoder = Decoder::new(0);
        let chunks: Vec<&[u8]> = bytes.iter().map(std::slice::from_ref).collect();
        let decoded = decode_all(&mut decoder, &chunks);
        assert_eq!(decoded, msgs);

        // single-call chunking
        let mut decoder2 = Decoder::new(0);
        let decoded2 = decode_all(&mut decoder2, &[&bytes]);
        assert_eq!(decoded2, msgs);
    }

    #[test]
    fn large_frame_takes_zero_copy_path() {
        let payload = vec![0xAB; 2 * 1024 * 1024];
        let msgs = vec![Message::new(payload.clone())];
        let mut encoder = Encoder::new();
        let bytes = encoder.encode_all(msgs.clone());

        let mut decoder = Decoder::new(0);
        let decoded = decode_all(&mut decoder, &[&bytes]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(&decoded[0][..], payload.as_slice());
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut encoder = Encoder::new();
        let bytes = encoder.encode_all(vec![Message::new(vec![0u8; 100])]);

        let mut decoder = Decoder::new(10);
        let err = decoder.process_buffer(&bytes);
        assert!(err.is_err());
        assert!(decoder.is_dead());
    }

    #[test]
    fn more_flags_report_correctly() {
        let msgs = vec![
            Message::new(b"a".to_vec()).with_flags(Flags::MORE),
            Message::new(b"b".to_vec()).with_flags(Flags::MORE),
            Message::new(b"c".to_vec()),
        ];
        let mut encoder = Encoder::new();
        let bytes = encoder.encode_all(msgs);

        let mut decoder = Decoder::new(0);
        let decoded = decode_all(&mut decoder, &[&bytes]);
        let mores: Vec<bool> = decoded.iter().map(|m| m.has_more()).collect();
        assert_eq!(mores, vec![true, true, false]);
    }
}
