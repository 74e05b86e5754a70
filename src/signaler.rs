use crate::evented::Evented;
use log::{trace, warn};
use mio::{Events, Poll, PollOpt, Ready, Token};
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

const READ_TOKEN: Token = Token(0);

/// A one-slot, edge-triggered wakeup primitive built on a self-pipe.
///
/// At most one unconsumed signal is ever in flight: a second `send`
/// before a matching `recv` is the caller's responsibility to avoid (see
/// spec §3). Used to unblock a [`crate::reactor::Reactor`] that is parked
/// in its readiness wait when another thread enqueues a command.
pub struct Signaler {
    writer: UnixStream,
    reader: UnixStream,
    // Private poll instance used only by `wait`; the reactor registers the
    // same raw fd (via `fd()`) with its own `mio::Poll` independently.
    poll: Poll,
}

impl Signaler {
    pub fn new() -> io::Result<Self> {
        let (writer, reader) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(false)?;

        let poll = Poll::new()?;
        poll.register(
            &Evented::new(reader.as_raw_fd()),
            READ_TOKEN,
            Ready::readable(),
            PollOpt::edge(),
        )?;

        Ok(Self {
            writer,
            reader,
            poll,
        })
    }

    /// Raw fd of the readable end, for registration with an external
    /// multiplexer (the owning reactor's `mio::Poll`).
    pub fn as_raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Post one edge. Writes exactly one byte; a zero-byte partial write
    /// is retried. Any other I/O failure is fatal to the owning object.
    pub fn send(&mut self) -> io::Result<()> {
        loop {
            match self.writer.write(&[0u8]) {
                Ok(0) => continue,
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume one edge. Reads exactly one byte. A benign interruption
    /// (`EINTR`) returns `Ok(())` without consuming anything so the caller
    /// simply rechecks its own queue (retry on spurious wake, fail
    /// otherwise).
    pub fn recv(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 1];
        loop {
            match self.reader.read(&mut buf) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    trace!("signaler recv interrupted, retrying read");
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    warn!("signaler recv failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Block until an edge is present or `timeout` elapses.
    ///
    /// `timeout < 0` blocks indefinitely; `timeout == 0` polls without
    /// blocking; `timeout > 0` blocks up to that many milliseconds.
    pub fn wait(&mut self, timeout_ms: i64) -> io::Result<bool> {
        let timeout = if timeout_ms < 0 {
            None
        } else {
            Some(Duration::from_millis(timeout_ms as u64))
        };

        let mut events = Events::with_capacity(1);
        match self.poll.poll(&mut events, timeout) {
            Ok(_) => Ok(!events.is_empty()),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Signaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signaler")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_recv_observes_one_edge() {
        let mut s = Signaler::new().unwrap();
        assert!(!s.wait(0).unwrap());
        s.send().unwrap();
        assert!(s.wait(0).unwrap());
        s.recv().unwrap();
        assert!(!s.wait(0).unwrap());
    }

    #[test]
    fn wait_blocks_until_send_from_another_thread() {
        use std::sync::mpsc::channel;
        use std::thread;

        let mut s = Signaler::new().unwrap();
        let mut writer = s.writer.try_clone().unwrap();
        let (ready_tx, ready_rx) = channel();
        thread::spawn(move || {
            ready_rx.recv().unwrap();
            writer.write_all(&[0u8]).unwrap();
        });

        ready_tx.send(()).unwrap();
        assert!(s.wait(5_000).unwrap());
        s.recv().unwrap();
    }
}
