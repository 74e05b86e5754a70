use crate::command::Handle;
use crate::options::Options;
use crate::pipe::PipeEnd;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Delaying,
    Terminating,
    Terminated,
}

/// Per-connection coordinator between one [`crate::engine::Engine`] and the
/// pipe leading back to the owning socket (spec §4.4). A session is 1:1
/// with a connection: fan-out across multiple peers is the
/// [`crate::routing::RoutingPolicy`]'s job, operating across many sessions'
/// pipes, not a session's own concern.
pub struct Session {
    handle: Handle,
    engine: Option<Handle>,
    pipe: Option<Arc<PipeEnd>>,
    state: SessionState,
    /// `Some` for sessions created by a connector (so a dropped connection
    /// can be retried); `None` for accepted sessions, which just terminate.
    endpoint: Option<String>,
    reconnect_ivl: Duration,
    options: Options,
    pipe_term_acked: bool,
    engine_detach_acked: bool,
}

impl Session {
    pub fn new(handle: Handle, options: Options, endpoint: Option<String>) -> Self {
        let reconnect_ivl = options.reconnect_ivl;
        Self {
            handle,
            engine: None,
            pipe: None,
            state: SessionState::Active,
            endpoint,
            reconnect_ivl,
            options,
            pipe_term_acked: false,
            engine_detach_acked: false,
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn engine(&self) -> Option<Handle> {
        self.engine
    }

    pub fn pipe(&self) -> Option<&Arc<PipeEnd>> {
        self.pipe.as_ref()
    }

    pub fn attach_pipe(&mut self, pipe: Arc<PipeEnd>) {
        self.pipe = Some(pipe);
    }

    /// A freshly handshaken engine has been bound to this session.
    pub fn attach_engine(&mut self, engine: Handle) {
        self.engine = Some(engine);
        self.state = SessionState::Active;
        self.engine_detach_acked = false;
    }

    /// The engine detached — I/O error, EOF, or protocol violation.
    /// Returns `Some(backoff)` if the session should reconnect after the
    /// given delay, `None` if it has begun terminating instead (no known
    /// endpoint, e.g. an accepted connection).
    pub fn detach_engine(&mut self) -> Option<Duration> {
        self.engine = None;

        if self.state == SessionState::Terminating {
            self.engine_detach_acked = true;
            return None;
        }

        if self.endpoint.is_some() {
            self.state = SessionState::Delaying;
            Some(self.next_backoff())
        } else {
            self.begin_terminate();
            None
        }
    }

    fn next_backoff(&mut self) -> Duration {
        let cur = self.reconnect_ivl;
        let doubled = cur.saturating_mul(2);
        self.reconnect_ivl = doubled.min(self.options.reconnect_ivl_max);
        cur
    }

    /// Begin orderly shutdown: detach the pipe (so the peer stops feeding
    /// it) and wait for the engine to detach before self-destructing.
    /// Detaching the pipe is synchronous, so there is no separate ack for
    /// it the way there is for the engine's detach.
    pub fn begin_terminate(&mut self) {
        if matches!(self.state, SessionState::Terminating | SessionState::Terminated) {
            return;
        }
        self.state = SessionState::Terminating;
        if let Some(pipe) = &self.pipe {
            pipe.detach();
        }
        self.pipe_term_acked = true;
        if self.engine.is_none() {
            self.engine_detach_acked = true;
        }
        self.maybe_finish_terminate();
    }

    pub fn engine_detach_ack(&mut self) {
        self.engine_detach_acked = true;
        self.maybe_finish_terminate();
    }

    fn maybe_finish_terminate(&mut self) {
        if self.state == SessionState::Terminating && self.pipe_term_acked && self.engine_detach_acked {
            self.state = SessionState::Terminated;
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h() -> Handle {
        Handle::new(0, 0)
    }

    #[test]
    fn detach_without_endpoint_begins_terminating() {
        let mut session = Session::new(h(), Options::default(), None);
        session.attach_engine(h());
        let backoff = session.detach_engine();
        assert!(backoff.is_none());
        assert_eq!(session.state(), SessionState::Terminating);
    }

    #[test]
    fn detach_with_endpoint_schedules_reconnect_with_backoff() {
        let mut options = Options::default();
        options.reconnect_ivl = Duration::from_millis(100);
        options.reconnect_ivl_max = Duration::from_millis(500);
        let mut session = Session::new(h(), options, Some("tcp://127.0.0.1:1".into()));
        session.attach_engine(h());

        let first = session.detach_engine().unwrap();
        assert_eq!(first, Duration::from_millis(100));
        assert_eq!(session.state(), SessionState::Delaying);

        session.attach_engine(h());
        let second = session.detach_engine().unwrap();
        assert_eq!(second, Duration::from_millis(200));
    }

    #[test]
    fn terminate_waits_for_engine_detach_ack() {
        let mut session = Session::new(h(), Options::default(), None);
        session.attach_pipe(PipeEnd::pair(10, 2).0);
        session.attach_engine(h());

        session.begin_terminate();
        assert_eq!(session.state(), SessionState::Terminating);

        session.engine_detach_ack();
        assert_eq!(session.state(), SessionState::Terminated);
    }
}
