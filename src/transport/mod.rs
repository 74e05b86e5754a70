//! Endpoint transports (spec §4.7). `tcp` drives real sockets through the
//! reactor; `inproc` is a process-local rendezvous that never touches it.
pub mod inproc;
pub mod tcp;
