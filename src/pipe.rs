use crate::message::Message;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Callback fired when a pipe endpoint's peer should be woken: "you can
/// read now" or "you can write now". Implemented once for reactor-owned
/// peers (posts a command to a [`crate::mailbox::Mailbox`]) and once for
/// user-thread peers (wakes a pending async task), so `Pipe` itself stays
/// ignorant of which side of the user/reactor boundary it's on.
pub trait Notify: Send + Sync + fmt::Debug {
    fn notify(&self);
}

struct Shared {
    // "a_to_b" is the queue end `a` pushes into and `b` drains.
    a_to_b: Mutex<VecDeque<Message>>,
    b_to_a: Mutex<VecDeque<Message>>,
    hwm: usize,
    lwm: usize,
}

/// One endpoint of a bidirectional pipe. Conceptually the pipe is
/// bidirectional; internally it is two one-way SPSC queues sharing one
/// high/low-water-mark pair (spec §3, §4.5).
pub struct PipeEnd {
    shared: Arc<Shared>,
    is_a: bool,
    peer_notify: Mutex<Option<Arc<dyn Notify>>>,
    attached: std::sync::atomic::AtomicBool,
}

impl PipeEnd {
    /// Build a connected pair of endpoints. `hwm` bounds how many messages
    /// may sit in either direction before writes are refused; `lwm` is the
    /// level a reader must drain back down to before `ActivateWrite` fires.
    pub fn pair(hwm: usize, lwm: usize) -> (Arc<PipeEnd>, Arc<PipeEnd>) {
        let shared = Arc::new(Shared {
            a_to_b: Mutex::new(VecDeque::new()),
            b_to_a: Mutex::new(VecDeque::new()),
            hwm,
            lwm,
        });
        let a = Arc::new(PipeEnd {
            shared: shared.clone(),
            is_a: true,
            peer_notify: Mutex::new(None),
            attached: std::sync::atomic::AtomicBool::new(true),
        });
        let b = Arc::new(PipeEnd {
            shared,
            is_a: false,
            peer_notify: Mutex::new(None),
            attached: std::sync::atomic::AtomicBool::new(true),
        });
        (a, b)
    }

    /// Register how to wake this endpoint's peer. Called once, after
    /// construction, by whichever side (session or socket) owns the
    /// cross-thread notification channel to the other side.
    pub fn set_peer_notify(&self, notify: Arc<dyn Notify>) {
        *self.peer_notify.lock().unwrap() = Some(notify);
    }

    fn outbound(&self) -> &Mutex<VecDeque<Message>> {
        if self.is_a {
            &self.shared.a_to_b
        } else {
            &self.shared.b_to_a
        }
    }

    fn inbound(&self) -> &Mutex<VecDeque<Message>> {
        if self.is_a {
            &self.shared.b_to_a
        } else {
            &self.shared.a_to_b
        }
    }

    /// Push a message toward the peer. Refuses (returning the message back
    /// to the caller) once the outbound queue is at `hwm` — back-pressure
    /// per spec §8 property 5, never silently dropping.
    pub fn write(&self, msg: Message) -> Result<(), Message> {
        let became_readable = {
            let mut q = self.outbound().lock().unwrap();
            if q.len() >= self.shared.hwm {
                return Err(msg);
            }
            let was_empty = q.is_empty();
            q.push_back(msg);
            was_empty
        };

        if became_readable {
            self.notify_peer();
        }
        Ok(())
    }

    /// Pop the next message addressed to this endpoint, if any. When this
    /// drains the queue back to `lwm` or below from above it, the peer is
    /// notified that write capacity has returned.
    pub fn read(&self) -> Option<Message> {
        let (msg, became_writable) = {
            let mut q = self.inbound().lock().unwrap();
            let before = q.len();
            let msg = q.pop_front();
            let after = q.len();
            (msg, before > self.shared.lwm && after <= self.shared.lwm)
        };

        if msg.is_some() && became_writable {
            self.notify_peer();
        }
        msg
    }

    pub fn check_read(&self) -> bool {
        !self.inbound().lock().unwrap().is_empty()
    }

    pub fn check_write(&self) -> bool {
        self.outbound().lock().unwrap().len() < self.shared.hwm
    }

    /// Whether `n` more messages can be pushed without hitting `hwm` —
    /// used to reserve capacity for a whole multi-frame send up front so a
    /// producer is refused all-or-nothing rather than having some frames
    /// accepted and later ones silently dropped mid-send.
    pub fn has_capacity_for(&self, n: usize) -> bool {
        self.shared.hwm.saturating_sub(self.outbound().lock().unwrap().len()) >= n
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Mark this endpoint detached (its session has begun terminating);
    /// further writes into its outbound queue are still delivered, but the
    /// owner should stop producing once it observes this.
    pub fn detach(&self) {
        self.attached.store(false, std::sync::atomic::Ordering::Release);
    }

    fn notify_peer(&self) {
        if let Some(n) = self.peer_notify.lock().unwrap().as_ref() {
            n.notify();
        }
    }
}

impl fmt::Debug for PipeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeEnd")
            .field("is_a", &self.is_a)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct CountingNotify(Arc<AtomicUsize>);
    impl Notify for CountingNotify {
        fn notify(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn write_then_read_delivers_message() {
        let (a, b) = PipeEnd::pair(10, 2);
        a.write(Message::new(b"hi".to_vec())).unwrap();
        assert_eq!(b.read().unwrap().as_ref(), b"hi");
        assert!(b.read().is_none());
    }

    #[test]
    fn write_refused_above_hwm() {
        let (a, _b) = PipeEnd::pair(2, 1);
        a.write(Message::new(b"1".to_vec())).unwrap();
        a.write(Message::new(b"2".to_vec())).unwrap();
        let refused = a.write(Message::new(b"3".to_vec()));
        assert!(refused.is_err());
    }

    #[test]
    fn notifies_peer_on_empty_to_nonempty_transition() {
        let (a, b) = PipeEnd::pair(10, 2);
        let counter = Arc::new(AtomicUsize::new(0));
        b.set_peer_notify(Arc::new(CountingNotify(counter.clone())));

        a.write(Message::new(b"x".to_vec())).unwrap();
        a.write(Message::new(b"y".to_vec())).unwrap();
        // Second write does not re-notify: queue was already non-empty.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notifies_peer_when_drained_back_to_lwm() {
        let (a, b) = PipeEnd::pair(4, 1);
        let counter = Arc::new(AtomicUsize::new(0));
        a.set_peer_notify(Arc::new(CountingNotify(counter.clone())));

        b.write(Message::new(b"1".to_vec())).unwrap();
        b.write(Message::new(b"2".to_vec())).unwrap();
        b.write(Message::new(b"3".to_vec())).unwrap();

        a.read().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        a.read().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
