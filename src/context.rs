use crate::command::Command;
use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::owner::SessionOwner;
use crate::reactor::Reactor;
use crate::transport::inproc;
use crate::transport::tcp::{TcpAcceptor, TcpConnector};
use log::error;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

struct Inner {
    mailboxes: Vec<Arc<Mailbox>>,
    next: AtomicUsize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns `io_threads` reactor threads and round-robins new sockets' bind
/// and connect requests across them (spec §4.1/§4.8). Cheap to clone —
/// every clone shares the same pool of reactors and mailboxes.
#[derive(Clone)]
pub struct Context(Arc<Inner>);

impl Context {
    pub fn new(io_threads: usize) -> std::io::Result<Self> {
        let io_threads = io_threads.max(1);
        let mut mailboxes = Vec::with_capacity(io_threads);
        let mut threads = Vec::with_capacity(io_threads);

        for i in 0..io_threads {
            let mailbox = Arc::new(Mailbox::new()?);
            let mut reactor = Reactor::new(mailbox.clone())?;
            let handle = thread::Builder::new()
                .name(format!("rzmq-io-{}", i))
                .spawn(move || {
                    if let Err(e) = reactor.run() {
                        error!("reactor thread exited with error: {}", e);
                    }
                })?;
            mailboxes.push(mailbox);
            threads.push(handle);
        }

        Ok(Self(Arc::new(Inner {
            mailboxes,
            next: AtomicUsize::new(0),
            threads: Mutex::new(threads),
        })))
    }

    fn next_mailbox(&self) -> Arc<Mailbox> {
        let i = self.0.next.fetch_add(1, Ordering::Relaxed) % self.0.mailboxes.len();
        self.0.mailboxes[i].clone()
    }

    /// Bind `endpoint` (`tcp://host:port` or `inproc://name`) to `owner`.
    /// Returns the resolved endpoint string, since `tcp://host:0` resolves
    /// to an ephemeral port the caller needs back.
    pub fn bind(&self, endpoint: &str, owner: Arc<dyn SessionOwner>) -> Result<String> {
        if let Some(name) = endpoint.strip_prefix("inproc://") {
            inproc::bind(name, owner)?;
            return Ok(endpoint.to_string());
        }

        let addr = parse_tcp_endpoint(endpoint)?;
        let acceptor = TcpAcceptor::bind(addr)?;
        let resolved = acceptor.local_addr()?;
        self.next_mailbox()
            .send(Command::Bind {
                listener: acceptor,
                socket_type: owner.socket_type(),
                options: owner.options(),
                owner,
            })?;
        Ok(format!("tcp://{}", resolved))
    }

    /// Dial `endpoint`. For `tcp://`, the connect itself and any retry
    /// backoff happen on the assigned reactor thread; for `inproc://`,
    /// the rendezvous happens synchronously here (spec §4.7).
    pub fn connect(&self, endpoint: &str, owner: Arc<dyn SessionOwner>) -> Result<()> {
        if let Some(name) = endpoint.strip_prefix("inproc://") {
            return inproc::connect(name, &owner);
        }

        let addr = parse_tcp_endpoint(endpoint)?;
        let connector = TcpConnector::new(addr);
        self.next_mailbox().send(Command::Connect {
            connector,
            socket_type: owner.socket_type(),
            options: owner.options(),
            owner,
        })?;
        Ok(())
    }

    /// Ask every reactor thread to stop and wait for them to exit. Each
    /// reactor gives its own attached sessions up to their `linger` to
    /// drain already-queued output before tearing them down and returning
    /// from `run` (spec §8 S6) — this call blocks until every thread has
    /// actually finished that drain, not just acknowledged the request.
    pub fn term(&self) {
        for mailbox in &self.0.mailboxes {
            let _ = mailbox.send(Command::Stop);
        }
        let mut threads = self.0.threads.lock().unwrap();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("io_threads", &self.0.mailboxes.len()).finish()
    }
}

fn parse_tcp_endpoint(endpoint: &str) -> Result<SocketAddr> {
    let addr_str = endpoint
        .strip_prefix("tcp://")
        .ok_or_else(|| Error::protocol(format!("unsupported endpoint scheme: {}", endpoint)))?;
    addr_str
        .parse()
        .map_err(|_| Error::protocol(format!("bad tcp endpoint: {}", endpoint)))
}
