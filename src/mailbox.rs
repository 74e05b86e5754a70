use crate::command::Command;
use crate::signaler::Signaler;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;

/// A lock-based producer/consumer queue of commands addressed to one
/// owner object, paired with a [`Signaler`] for readiness.
///
/// Invariant: the signaler is in the signalled state if and only if a
/// previous producer observed the queue transition empty→non-empty and no
/// consumer drain has matched it yet (spec §3).
pub struct Mailbox {
    queue: Mutex<VecDeque<Command>>,
    signaler: Mutex<Signaler>,
}

impl Mailbox {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            queue: Mutex::new(VecDeque::new()),
            signaler: Mutex::new(Signaler::new()?),
        })
    }

    /// Fd an external reactor registers for read-readiness.
    pub fn as_raw_fd(&self) -> RawFd {
        self.signaler.lock().unwrap().as_raw_fd()
    }

    /// Enqueue a command. Never blocks the producer on a consumer; only
    /// signals the owning reactor the first time the queue goes from
    /// empty to non-empty.
    pub fn send(&self, cmd: Command) -> io::Result<()> {
        let was_empty = {
            let mut q = self.queue.lock().unwrap();
            let was_empty = q.is_empty();
            q.push_back(cmd);
            was_empty
        };

        if was_empty {
            self.signaler.lock().unwrap().send()?;
        }

        Ok(())
    }

    /// Drain every command currently queued without waiting. Called by the
    /// reactor once its multiplexer reports the mailbox's fd as readable;
    /// the fd's one outstanding edge is consumed here, not per-command.
    pub fn drain(&self) -> io::Result<Vec<Command>> {
        let drained: Vec<Command> = {
            let mut q = self.queue.lock().unwrap();
            q.drain(..).collect()
        };

        if !drained.is_empty() {
            self.signaler.lock().unwrap().recv()?;
        }

        Ok(drained)
    }

    /// Receive a single command, waiting on the signaler up to `timeout_ms`
    /// if the queue is currently empty (see spec §4.2).
    pub fn recv(&self, timeout_ms: i64) -> io::Result<Option<Command>> {
        loop {
            {
                let mut q = self.queue.lock().unwrap();
                if let Some(cmd) = q.pop_front() {
                    if q.is_empty() {
                        drop(q);
                        self.signaler.lock().unwrap().recv()?;
                    }
                    return Ok(Some(cmd));
                }
            }

            if !self.signaler.lock().unwrap().wait(timeout_ms)? {
                return Ok(None);
            }
            // Edge observed; loop back to drain the queue. The matching
            // `recv()` on the signaler happens above once we've drained
            // down to empty.
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_for_single_producer() {
        let mb = Mailbox::new().unwrap();
        mb.send(Command::Stop).unwrap();
        mb.send(Command::Stop).unwrap();
        let drained = mb.drain().unwrap();
        assert_eq!(drained.len(), 2);
    }

    #[test]
    fn recv_waits_then_returns_command() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let mb = Arc::new(Mailbox::new().unwrap());
        let mb2 = mb.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            mb2.send(Command::Stop).unwrap();
        });

        let cmd = mb.recv(1_000).unwrap();
        assert!(matches!(cmd, Some(Command::Stop)));
    }

    #[test]
    fn recv_times_out_on_empty_queue() {
        let mb = Mailbox::new().unwrap();
        let cmd = mb.recv(10).unwrap();
        assert!(cmd.is_none());
    }
}
