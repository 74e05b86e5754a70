use crate::command::Handle;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::routing::SocketType;
use log::{debug, trace, warn};
use mio::net::TcpStream;
use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};

const GREETING_LEN: usize = 12;
const SIGNATURE_FIRST: u8 = 0xFF;
const SIGNATURE_LAST: u8 = 0x7F;
const VERSION: u8 = 0x01;
const READ_SCRATCH_LEN: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Handshaking,
    Active,
    Stalled,
    Closed,
}

struct Handshake {
    out: [u8; GREETING_LEN],
    out_pos: usize,
    in_buf: [u8; GREETING_LEN],
    in_pos: usize,
    validated: bool,
}

impl Handshake {
    fn new(socket_type: SocketType) -> Self {
        let mut out = [0u8; GREETING_LEN];
        out[0] = SIGNATURE_FIRST;
        out[9] = SIGNATURE_LAST;
        out[10] = VERSION;
        out[11] = socket_type.wire_byte();
        Self {
            out,
            out_pos: 0,
            in_buf: [0u8; GREETING_LEN],
            in_pos: 0,
            validated: false,
        }
    }

    fn write_done(&self) -> bool {
        self.out_pos >= self.out.len()
    }

    fn read_done(&self) -> bool {
        self.in_pos >= self.in_buf.len()
    }

    fn validate(&mut self) -> Result<()> {
        if self.in_buf[0] != SIGNATURE_FIRST || self.in_buf[9] != SIGNATURE_LAST {
            return Err(Error::protocol(format!(
                "bad greeting signature: {:#x}..{:#x}",
                self.in_buf[0], self.in_buf[9]
            )));
        }
        self.validated = true;
        Ok(())
    }

    fn peer_socket_type(&self) -> u8 {
        self.in_buf[11]
    }
}

/// Per-connection byte-stream driver: owns the transport handle, decoder,
/// and encoder, and runs the ZMTP greeting handshake before handing
/// decoded messages upward (spec §4.4).
///
/// An engine never touches its session or pipe directly — it is driven by,
/// and reports outcomes to, the reactor, which holds the session by handle
/// (spec §9's cyclic-reference note).
pub struct Engine {
    stream: TcpStream,
    decoder: Decoder,
    encoder: Encoder,
    state: EngineState,
    session: Handle,
    handshake: Handshake,
    read_enabled: bool,
    write_has_pending: bool,
    /// Decoded messages that couldn't be handed to the session's pipe yet
    /// because it was at its high-water-mark. Held here, in decode order,
    /// until `ActivateRead` drains the pipe and they can be retried — the
    /// engine's read side stays disabled the whole time, so backpressure
    /// refuses to read further rather than decoding-then-dropping (spec §8
    /// testable property 5).
    pending_inbound: VecDeque<Message>,
}

impl Engine {
    pub fn new(stream: TcpStream, session: Handle, socket_type: SocketType, max_msg_size: usize) -> Self {
        Self {
            stream,
            decoder: Decoder::new(max_msg_size),
            encoder: Encoder::new(),
            state: EngineState::Handshaking,
            session,
            handshake: Handshake::new(socket_type),
            read_enabled: true,
            write_has_pending: false,
            pending_inbound: VecDeque::new(),
        }
    }

    pub fn session(&self) -> Handle {
        self.session
    }

    /// The underlying stream, for the reactor to (re)register with its
    /// `mio::Poll` — an engine never registers itself, since the reactor
    /// owns the single `Poll` instance all engines share.
    pub(crate) fn io(&self) -> &TcpStream {
        &self.stream
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == EngineState::Closed
    }

    pub fn wants_read(&self) -> bool {
        self.read_enabled && self.state != EngineState::Closed
    }

    pub fn wants_write(&self) -> bool {
        self.state != EngineState::Closed && (!self.handshake.write_done() || self.write_has_pending)
    }

    /// The session calls this once it has drained its pipe far enough that
    /// the engine should resume reading (spec's `restart_input`). Any
    /// messages still held in `pending_inbound` take priority: reading
    /// stays disabled until every one of them has been handed off, so
    /// order is preserved and nothing decoded off the wire is ever
    /// silently dropped for want of pipe capacity.
    pub fn restart_input(&mut self) {
        if self.pending_inbound.is_empty() {
            self.read_enabled = true;
            if self.state == EngineState::Stalled {
                self.state = EngineState::Active;
            }
        }
    }

    /// The session calls this once it has a message ready, or more space
    /// freed up (spec's `restart_output`).
    pub fn restart_output(&mut self) {
        self.write_has_pending = true;
    }

    /// Stop reading further off the wire: the session's pipe is at its
    /// high-water-mark and cannot accept another decoded message yet.
    pub fn disable_read(&mut self) {
        self.read_enabled = false;
        if self.state == EngineState::Active {
            self.state = EngineState::Stalled;
        }
    }

    pub fn queue_outgoing(&mut self, msg: Message) {
        self.encoder.queue(msg);
        self.write_has_pending = true;
    }

    /// Hold messages that couldn't be written to the pipe this round;
    /// `disable_read` must already have been called by the caller.
    pub fn queue_pending_inbound(&mut self, msgs: impl IntoIterator<Item = Message>) {
        self.pending_inbound.extend(msgs);
    }

    pub fn has_pending_inbound(&self) -> bool {
        !self.pending_inbound.is_empty()
    }

    pub fn peek_pending_inbound(&self) -> Option<&Message> {
        self.pending_inbound.front()
    }

    pub fn pop_pending_inbound(&mut self) -> Option<Message> {
        self.pending_inbound.pop_front()
    }

    /// Put a message back at the front of the pending queue — used when a
    /// retried write is refused again, so it stays first in line.
    pub fn requeue_pending_inbound_front(&mut self, msg: Message) {
        self.pending_inbound.push_front(msg);
    }

    /// Drive the read side until the socket would block or is closed.
    /// Returns every whole message decoded during this call.
    pub fn on_readable(&mut self) -> Result<Vec<Message>> {
        loop {
            if !self.handshake.read_done() {
                match self.stream.read(&mut self.handshake.in_buf[self.handshake.in_pos..]) {
                    Ok(0) => return Err(self.close(io_eof())),
                    Ok(n) => {
                        self.handshake.in_pos += n;
                        if self.handshake.read_done() {
                            if let Err(e) = self.handshake.validate() {
                                return Err(self.close_protocol(e));
                            }
                            debug!(
                                "engine {:?}: peer socket type byte {}",
                                self.session,
                                self.handshake.peer_socket_type()
                            );
                            if self.handshake.write_done() {
                                self.state = EngineState::Active;
                            }
                        }
                        continue;
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(self.drain_decoded()),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(self.close(e)),
                }
            }

            if let Some(buf) = self.decoder.zero_copy_target() {
                match self.stream.read(buf) {
                    Ok(0) => return Err(self.close(io_eof())),
                    Ok(n) => {
                        if let Err(e) = self.decoder.commit_zero_copy(n) {
                            return Err(self.close_protocol(e));
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(self.drain_decoded()),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(self.close(e)),
                }
            } else {
                let mut scratch = [0u8; READ_SCRATCH_LEN];
                match self.stream.read(&mut scratch) {
                    Ok(0) => return Err(self.close(io_eof())),
                    Ok(n) => {
                        if let Err(e) = self.decoder.process_buffer(&scratch[..n]) {
                            return Err(self.close_protocol(e));
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(self.drain_decoded()),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(self.close(e)),
                }
            }
        }
    }

    /// Drive the write side until the socket would block, the handshake
    /// and encoder both run dry, or an error occurs.
    pub fn on_writable(&mut self) -> Result<()> {
        loop {
            if !self.handshake.write_done() {
                match self.stream.write(&self.handshake.out[self.handshake.out_pos..]) {
                    Ok(0) => return Err(self.close(io_write_zero())),
                    Ok(n) => {
                        self.handshake.out_pos += n;
                        if self.handshake.write_done() && self.handshake.read_done() {
                            self.state = EngineState::Active;
                        }
                        continue;
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(self.close(e)),
                }
            }

            let buf = match self.encoder.get_bytes() {
                Some(buf) if !buf.is_empty() => buf,
                _ => {
                    self.write_has_pending = false;
                    return Ok(());
                }
            };

            match self.stream.write(buf) {
                Ok(0) => return Err(self.close(io_write_zero())),
                Ok(n) => self.encoder.mark_written(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.close(e)),
            }
        }
    }

    pub fn terminate(&mut self) {
        if self.state == EngineState::Closed {
            return;
        }
        trace!("engine {:?}: terminating", self.session);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        self.state = EngineState::Closed;
    }

    fn drain_decoded(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(m) = self.decoder.pop_message() {
            out.push(m);
        }
        out
    }

    fn close(&mut self, err: io::Error) -> Error {
        warn!("engine {:?}: io error: {}", self.session, err);
        self.state = EngineState::Closed;
        Error::Io(err)
    }

    fn close_protocol(&mut self, err: Error) -> Error {
        warn!("engine {:?}: protocol error: {}", self.session, err);
        self.state = EngineState::Closed;
        err
    }
}

fn io_eof() -> io::Error {
    io::Error::new(ErrorKind::UnexpectedEof, "connection closed by peer")
}

fn io_write_zero() -> io::Error {
    io::Error::new(ErrorKind::WriteZero, "write returned zero bytes")
}
