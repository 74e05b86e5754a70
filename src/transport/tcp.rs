use mio::net::{TcpListener, TcpStream};
use mio::{Evented, Poll, PollOpt, Ready, Token};
use std::io;
use std::net::SocketAddr;

/// A bound TCP listener, handed to a reactor via
/// [`crate::command::Command::Bind`]. The `bind()` syscall itself happens
/// on the calling thread (so `Context::bind` can report the resolved
/// `local_addr` — needed for `tcp://127.0.0.1:0` ephemeral ports, spec §8
/// S1) before the listener is handed off for the reactor to drive
/// `accept()` on.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(&addr)?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept()
    }
}

impl Evented for TcpAcceptor {
    fn register(&self, poll: &Poll, token: Token, interest: Ready, opts: PollOpt) -> io::Result<()> {
        self.listener.register(poll, token, interest, opts)
    }

    fn reregister(&self, poll: &Poll, token: Token, interest: Ready, opts: PollOpt) -> io::Result<()> {
        self.listener.reregister(poll, token, interest, opts)
    }

    fn deregister(&self, poll: &Poll) -> io::Result<()> {
        self.listener.deregister(poll)
    }
}

/// An outbound connection attempt. `connect()` may be called repeatedly —
/// once per reconnect backoff cycle (spec §7) — each time producing a
/// fresh non-blocking stream whose completion is confirmed by the reactor
/// once it reports writable and `take_error()` comes back clean.
pub struct TcpConnector {
    addr: SocketAddr,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connect(&self) -> io::Result<TcpStream> {
        TcpStream::connect(&self.addr)
    }
}

/// Checks a just-writable connecting stream for a completed, error-free
/// connect (the standard non-blocking-connect idiom: `writable` fires
/// whether the connect succeeded or failed, `SO_ERROR` disambiguates).
pub fn connect_succeeded(stream: &TcpStream) -> io::Result<bool> {
    match stream.take_error()? {
        None => Ok(true),
        Some(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_on_ephemeral_port_resolves_local_addr() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = acceptor.local_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_ne!(addr.port(), 0);
    }
}
