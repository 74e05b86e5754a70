use log::*;
use mio::{unix::EventedFd, PollOpt, Ready, Token};
use std::{io, os::unix::io::RawFd};

/// Wraps a raw fd so it can be registered with a [`mio::Poll`] instance.
///
/// Originally adapted a `zmq::Socket`'s fd for `mio`; here the same wrapper
/// is reused for our own pipe and socket fds (the signaler's self-pipe, TCP
/// streams, the listener).
#[derive(Debug)]
pub struct Evented(RawFd);

impl Evented {
    pub fn new(fd: RawFd) -> Self {
        Self(fd)
    }
}

impl mio::Evented for Evented {
    fn register(
        &self,
        poll: &mio::Poll,
        token: Token,
        interest: Ready,
        opts: PollOpt,
    ) -> io::Result<()> {
        trace!("register fd: {}", self.0);
        EventedFd(&self.0).register(poll, token, interest, opts)
    }

    fn reregister(
        &self,
        poll: &mio::Poll,
        token: Token,
        interest: Ready,
        opts: PollOpt,
    ) -> io::Result<()> {
        trace!("re-register fd: {}", self.0);
        EventedFd(&self.0).reregister(poll, token, interest, opts)
    }

    fn deregister(&self, poll: &mio::Poll) -> io::Result<()> {
        trace!("de-register fd: {}", self.0);
        EventedFd(&self.0).deregister(poll)
    }
}
