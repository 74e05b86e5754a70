//! A wire-compatible re-implementation of the ZeroMQ I/O core: reactor,
//! mailbox, signaler, session/engine pair and ZMTP v3 codec, with an
//! async `Socket` facade built the same way the original `zmq`-backed one
//! was (`futures::future::poll_fn` over a per-socket waker), except
//! readiness now comes from this crate's own pipes instead of a single
//! kernel fd exposed by `libzmq`.

mod command;
mod context;
mod convert;
mod decoder;
mod encoder;
mod engine;
mod error;
mod evented;
mod mailbox;
mod message;
mod options;
mod owner;
mod pipe;
mod reactor;
mod routing;
mod session;
mod signaler;
mod slab;
mod socket;
mod timer;
mod transport;
mod waker;

pub use command::Handle;
pub use context::Context;
pub use convert::FromMessage;
pub use error::{Error, Result};
pub use message::{Flags, Message};
pub use options::Options;
pub use routing::SocketType;
pub use socket::Socket;
