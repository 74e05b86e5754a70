use crate::command::Handle;
use crate::options::Options;
use crate::pipe::{Notify, PipeEnd};
use crate::routing::SocketType;
use std::fmt;
use std::sync::Arc;

/// The socket-side half of the handoff between a reactor-owned session and
/// the user-facing socket that owns it (spec §4.6/§4.8 collaborators).
///
/// Implemented by [`crate::socket::SocketShared`]. Kept as a trait object
/// so [`crate::command::Command::Bind`]/`Connect` don't need to name the
/// concrete socket type, matching the handle/trait-object indirection the
/// design notes call for between reactor-owned and user-owned objects.
///
/// The caller (a reactor wiring up a TCP session, or `transport::inproc`
/// wiring two local owners together) already holds the `Arc<PipeEnd>` this
/// owner should read/write through — `attach_session` never creates a
/// pipe itself, only mints an id for it in the owner's own numbering space
/// (separate from whatever handle a reactor's session slab uses for the
/// same connection) and registers it with the owner's routing policy.
///
/// The returned `Arc<dyn Notify>` is what the *other* end of `pipe` (held
/// by whoever called this) should install via `set_peer_notify`, so a
/// write on that far end wakes this owner in turn.
pub trait SessionOwner: Send + Sync + fmt::Debug {
    fn attach_session(&self, pipe: Arc<PipeEnd>) -> (Handle, Arc<dyn Notify>);
    /// The session behind `id` has fully terminated; stop routing to it.
    fn detach_session(&self, id: Handle);
    fn socket_type(&self) -> SocketType;
    fn options(&self) -> Options;
}
