use crate::command::{Command, Handle};
use crate::engine::Engine;
use crate::mailbox::Mailbox;
use crate::message::Message;
use crate::options::Options;
use crate::owner::SessionOwner;
use crate::pipe::{Notify, PipeEnd};
use crate::routing::SocketType;
use crate::session::Session;
use crate::slab::Slab;
use crate::timer::Timers;
use crate::transport::tcp::{connect_succeeded, TcpAcceptor, TcpConnector};
use log::{debug, trace, warn};
use mio::{Events, Poll, PollOpt, Ready, Token};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAILBOX_TOKEN: Token = Token(0);
const FIRST_DYNAMIC_TOKEN: usize = 1;

/// A connecting or fully handshaken engine. Kept distinct because a
/// connecting stream has no [`Engine`] yet — nothing to decode until the
/// TCP three-way handshake itself completes (spec §4.3/§4.7).
enum EngineSlot {
    Connecting {
        connector: TcpConnector,
        stream: mio::net::TcpStream,
        session: Handle,
        socket_type: SocketType,
        options: Options,
    },
    Active(Engine),
}

struct ListenerSlot {
    acceptor: TcpAcceptor,
    socket_type: SocketType,
    options: Options,
    owner: Arc<dyn SessionOwner>,
}

#[derive(Debug, Clone, Copy)]
enum TokenTarget {
    Listener(Handle),
    Engine(Handle),
}

#[derive(Debug, Clone, Copy)]
enum TimerTarget {
    Reconnect(Handle),
    /// Bounds how long `Command::Stop`'s linger drain waits for sessions to
    /// finish flushing before they're force-terminated (spec §8 S6).
    ShutdownDeadline,
}

/// The I/O thread's event loop: one `mio::Poll`, one command inbox, and the
/// sessions/engines/listeners it drives (spec §4.2/§4.3). A [`crate::context::Context`]
/// runs one or more of these on dedicated threads and round-robins new
/// sockets across them.
pub struct Reactor {
    poll: Poll,
    mailbox: Arc<Mailbox>,
    sessions: Slab<Session>,
    engines: Slab<EngineSlot>,
    listeners: Slab<ListenerSlot>,
    tokens: HashMap<Token, TokenTarget>,
    next_token: usize,
    timers: Timers,
    timer_targets: HashMap<u64, TimerTarget>,
    pending_reconnects: HashMap<u64, (TcpConnector, SocketType, Options)>,
    /// Owner and its minted pipe id for each attached session, so a
    /// terminated session's pipe can be removed from the owner's routing
    /// table instead of leaking forever.
    session_owners: HashMap<Handle, (Arc<dyn SessionOwner>, Handle)>,
    running: bool,
    shutting_down: bool,
}

impl Reactor {
    pub fn new(mailbox: Arc<Mailbox>) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mailbox_fd = crate::evented::Evented::new(mailbox.as_raw_fd());
        poll.register(&mailbox_fd, MAILBOX_TOKEN, Ready::readable(), PollOpt::edge())?;

        Ok(Self {
            poll,
            mailbox,
            sessions: Slab::new(),
            engines: Slab::new(),
            listeners: Slab::new(),
            tokens: HashMap::new(),
            next_token: FIRST_DYNAMIC_TOKEN,
            timers: Timers::new(),
            timer_targets: HashMap::new(),
            pending_reconnects: HashMap::new(),
            session_owners: HashMap::new(),
            running: true,
            shutting_down: false,
        })
    }

    fn alloc_token(&mut self) -> Token {
        let t = Token(self.next_token);
        self.next_token += 1;
        t
    }

    /// Run until a [`Command::Stop`] is processed or the mailbox's signaler
    /// fails. Each iteration waits for events up to the nearest timer
    /// deadline (spec §4.3's poll-dispatch-repeat loop).
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(256);
        while self.running {
            let now = Instant::now();
            let timeout = self.timers.next_expiring_from(now);

            match self.poll.poll(&mut events, timeout) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            for event in events.iter() {
                self.handle_event(event.token(), event.readiness());
            }

            self.fire_expired_timers(Instant::now());
            if self.shutting_down {
                self.finish_terminated_sessions(false);
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, token: Token, readiness: Ready) {
        if token == MAILBOX_TOKEN {
            self.drain_mailbox();
            return;
        }

        match self.tokens.get(&token).copied() {
            Some(TokenTarget::Listener(handle)) => self.handle_listener_readable(handle),
            Some(TokenTarget::Engine(handle)) => self.handle_engine_event(handle, readiness),
            None => trace!("event for unknown token {:?}", token),
        }
    }

    fn drain_mailbox(&mut self) {
        let commands = match self.mailbox.drain() {
            Ok(c) => c,
            Err(e) => {
                warn!("mailbox drain failed: {}", e);
                return;
            }
        };
        for cmd in commands {
            self.dispatch(cmd);
        }
    }

    fn dispatch(&mut self, cmd: Command) {
        match cmd {
            Command::Stop => self.begin_shutdown(),
            Command::Bind { listener, socket_type, options, owner } => self.handle_bind(listener, socket_type, options, owner),
            Command::Connect { connector, socket_type, options, owner } => self.handle_connect(connector, socket_type, options, owner),
            Command::ActivateRead { to } => {
                // The owning socket drained its pipe; retry anything the
                // engine was holding back before re-enabling reads, so a
                // full pipe refuses new input instead of ever dropping
                // what was already decoded.
                if let Some(engine_handle) = self.sessions.get(to).and_then(|s| s.engine()) {
                    self.drain_pending_inbound(to, engine_handle);
                    if let Some(EngineSlot::Active(engine)) = self.engines.get_mut(engine_handle) {
                        engine.restart_input();
                    }
                    self.reregister_engine(engine_handle);
                }
            }
            Command::ActivateWrite { to } => {
                // The owning socket queued new outgoing messages into the
                // session's pipe; pull them into the engine's encoder and
                // make sure it's registered for writability.
                let (engine_handle, pipe) = match self.sessions.get(to) {
                    Some(session) => (session.engine(), session.pipe().cloned()),
                    None => (None, None),
                };
                if let (Some(engine_handle), Some(pipe)) = (engine_handle, pipe) {
                    if let Some(EngineSlot::Active(engine)) = self.engines.get_mut(engine_handle) {
                        while let Some(msg) = pipe.read() {
                            engine.queue_outgoing(msg);
                        }
                        engine.restart_output();
                    }
                    self.reregister_engine(engine_handle);
                }
            }
        }
    }

    /// `Command::Stop` no longer tears everything down immediately: every
    /// attached session is asked to terminate, each given up to its own
    /// `Options::linger` to drain whatever is already queued (spec §8 S6),
    /// bounded overall by the longest linger among them so one session
    /// stuck behind a dead peer can't wedge shutdown forever.
    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        debug!("reactor beginning shutdown");
        self.shutting_down = true;

        let max_linger = self
            .sessions
            .iter()
            .map(|(_, s)| s.options().linger)
            .max()
            .unwrap_or_else(Duration::default);

        let handles: Vec<Handle> = self.sessions.iter().map(|(h, _)| h).collect();
        for handle in handles {
            self.begin_session_termination(handle);
        }

        if max_linger > Duration::default() {
            let timer_id = self.timers.add(Instant::now(), max_linger);
            self.timer_targets.insert(timer_id, TimerTarget::ShutdownDeadline);
        } else {
            self.finish_terminated_sessions(true);
        }

        if self.sessions.is_empty() {
            self.running = false;
        }
    }

    /// Move one session into orderly termination: stop accepting further
    /// production into its pipe, detach its owner-side routing entry so no
    /// more messages are handed to it, then try to finish it off right away
    /// (nothing left to flush) or leave it lingering until its engine drains.
    fn begin_session_termination(&mut self, session_handle: Handle) {
        if let Some(session) = self.sessions.get_mut(session_handle) {
            session.begin_terminate();
        } else {
            return;
        }
        self.detach_owner_pipe(session_handle);
        self.drain_outgoing_before_terminate(session_handle);
        self.finish_terminated_sessions(false);
    }

    /// Pull anything already queued in the pipe into the engine's encoder
    /// one last time, so a `send` that completed just before termination
    /// still gets a chance to hit the wire during the linger window.
    fn drain_outgoing_before_terminate(&mut self, session_handle: Handle) {
        let (engine_handle, pipe) = match self.sessions.get(session_handle) {
            Some(session) => (session.engine(), session.pipe().cloned()),
            None => (None, None),
        };
        if let (Some(engine_handle), Some(pipe)) = (engine_handle, pipe) {
            if let Some(EngineSlot::Active(engine)) = self.engines.get_mut(engine_handle) {
                while let Some(msg) = pipe.read() {
                    engine.queue_outgoing(msg);
                }
                engine.restart_output();
            }
            self.reregister_engine(engine_handle);
        }
    }

    /// Finalize every session that is `Terminating` and has nothing left to
    /// flush (or, if `force`, regardless of what's left — used once the
    /// shutdown deadline fires so a stuck peer can't wedge shutdown
    /// forever). Once every session is gone, a shutdown in progress
    /// completes and the reactor thread is allowed to exit.
    fn finish_terminated_sessions(&mut self, force: bool) {
        let candidates: Vec<Handle> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state() == crate::session::SessionState::Terminating)
            .map(|(h, _)| h)
            .collect();

        for handle in candidates {
            let drained = self
                .sessions
                .get(handle)
                .and_then(|s| s.engine())
                .and_then(|eh| self.engines.get(eh))
                .map(|slot| match slot {
                    EngineSlot::Active(engine) => !engine.wants_write(),
                    EngineSlot::Connecting { .. } => true,
                })
                .unwrap_or(true);

            if force || drained {
                self.terminate_engine_for_session(handle);
                self.reap_session_if_terminated(handle);
            }
        }

        if self.shutting_down && self.sessions.is_empty() {
            self.running = false;
        }
    }

    fn handle_bind(&mut self, acceptor: TcpAcceptor, socket_type: SocketType, options: Options, owner: Arc<dyn SessionOwner>) {
        let handle = self.listeners.insert(ListenerSlot { acceptor, socket_type, options, owner });
        let token = self.alloc_token();
        self.tokens.insert(token, TokenTarget::Listener(handle));
        if let Some(slot) = self.listeners.get(handle) {
            if let Err(e) = self.poll.register(&slot.acceptor, token, Ready::readable(), PollOpt::edge()) {
                warn!("failed to register listener: {}", e);
            }
        }
    }

    fn handle_listener_readable(&mut self, handle: Handle) {
        loop {
            let (stream, socket_type, options, owner) = match self.listeners.get(handle) {
                Some(slot) => match slot.acceptor.accept() {
                    Ok((stream, addr)) => {
                        debug!("accepted connection from {}", addr);
                        (stream, slot.socket_type, slot.options.clone(), slot.owner.clone())
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        return;
                    }
                },
                None => return,
            };

            let session_handle = self
                .sessions
                .insert_with(|handle| Session::new(handle, options.clone(), None));
            let session_end = self.attach_owner_pipe(session_handle, &options, &owner);
            if let Some(session) = self.sessions.get_mut(session_handle) {
                session.attach_pipe(session_end);
            }

            let engine = Engine::new(stream, session_handle, socket_type, options.max_msg_size);
            self.register_new_engine(session_handle, EngineSlot::Active(engine));
        }
    }

    fn handle_connect(&mut self, connector: TcpConnector, socket_type: SocketType, options: Options, owner: Arc<dyn SessionOwner>) {
        let endpoint = Some(format!("tcp://{}", connector.addr()));
        let session_handle = self
            .sessions
            .insert_with(|handle| Session::new(handle, options.clone(), endpoint));
        let session_end = self.attach_owner_pipe(session_handle, &options, &owner);
        if let Some(session) = self.sessions.get_mut(session_handle) {
            session.attach_pipe(session_end);
        }
        self.begin_connect(session_handle, connector, socket_type, options);
    }

    /// Build a fresh pipe pair for a new session, hand one half to `owner`
    /// (minting its routing-table pipe id) and wire each half's
    /// `peer_notify` to wake the other side: the owner's half wakes the
    /// reactor via a mailbox command, the session's half wakes whatever
    /// the owner's `attach_session` says should be woken (the socket).
    fn attach_owner_pipe(&mut self, session_handle: Handle, options: &Options, owner: &Arc<dyn SessionOwner>) -> Arc<PipeEnd> {
        let hwm = options.recv_hwm;
        let lwm = options.effective_lwm(hwm);
        let (session_end, owner_end) = PipeEnd::pair(hwm, lwm);
        owner_end.set_peer_notify(Arc::new(MailboxNotify {
            mailbox: self.mailbox.clone(),
            session: session_handle,
        }));
        let (pipe_id, socket_notify) = owner.attach_session(owner_end);
        self.session_owners.insert(session_handle, (owner.clone(), pipe_id));
        session_end.set_peer_notify(socket_notify);
        session_end
    }

    /// Remove a terminated session's pipe from its owner's routing table so
    /// a dead peer stops being round-robined to forever.
    fn detach_owner_pipe(&mut self, session_handle: Handle) {
        if let Some((owner, pipe_id)) = self.session_owners.remove(&session_handle) {
            owner.detach_session(pipe_id);
        }
    }

    fn begin_connect(&mut self, session_handle: Handle, connector: TcpConnector, socket_type: SocketType, options: Options) {
        match connector.connect() {
            Ok(stream) => {
                self.register_new_engine(
                    session_handle,
                    EngineSlot::Connecting {
                        connector,
                        stream,
                        session: session_handle,
                        socket_type,
                        options,
                    },
                );
            }
            Err(e) => {
                warn!("connect to {} failed immediately: {}", connector.addr(), e);
                self.schedule_reconnect(session_handle, connector, socket_type, options);
            }
        }
    }

    fn register_new_engine(&mut self, session_handle: Handle, slot: EngineSlot) {
        let interest = match &slot {
            EngineSlot::Connecting { .. } => Ready::writable(),
            EngineSlot::Active(engine) => engine_interest(engine),
        };
        let engine_handle = self.engines.insert(slot);
        if let Some(session) = self.sessions.get_mut(session_handle) {
            session.attach_engine(engine_handle);
        }
        let token = self.alloc_token();
        self.tokens.insert(token, TokenTarget::Engine(engine_handle));
        let io_result = match self.engines.get(engine_handle) {
            Some(EngineSlot::Connecting { stream, .. }) => self.poll.register(stream, token, interest, PollOpt::edge()),
            Some(EngineSlot::Active(engine)) => self.poll.register(engine.io(), token, interest, PollOpt::edge()),
            None => Ok(()),
        };
        if let Err(e) = io_result {
            warn!("failed to register engine: {}", e);
        }
    }

    fn handle_engine_event(&mut self, handle: Handle, readiness: Ready) {
        let promoted = match self.engines.get_mut(handle) {
            Some(EngineSlot::Connecting { stream, .. }) if readiness.is_writable() => {
                match connect_succeeded(stream) {
                    Ok(true) => true,
                    Ok(false) => false,
                    Err(e) => {
                        warn!("connect failed: {}", e);
                        self.fail_connecting_engine(handle);
                        return;
                    }
                }
            }
            _ => false,
        };

        if promoted {
            self.promote_connecting_engine(handle);
            return;
        }

        let (decoded, session_handle, engine_error) = match self.engines.get_mut(handle) {
            Some(EngineSlot::Active(engine)) => {
                let mut decoded = Vec::new();
                let mut engine_error = None;
                if readiness.is_readable() || readiness.is_error() {
                    match engine.on_readable() {
                        Ok(msgs) => decoded = msgs,
                        Err(e) => engine_error = Some(e),
                    }
                }
                if engine_error.is_none() && (readiness.is_writable() || readiness.is_error()) {
                    if let Err(e) = engine.on_writable() {
                        engine_error = Some(e);
                    }
                }
                (decoded, engine.session(), engine_error)
            }
            _ => return,
        };

        self.deliver_decoded(session_handle, handle, decoded);

        if let Some(e) = engine_error {
            debug!("engine for session {:?} closed: {}", session_handle, e);
            self.detach_engine(handle, session_handle);
            return;
        }

        if let Some(EngineSlot::Active(engine)) = self.engines.get(handle) {
            if !engine.wants_read() && !engine.wants_write() {
                return;
            }
        }
        self.reregister_engine(handle);
    }

    /// Hand freshly decoded messages to the session's pipe in order. The
    /// first one the pipe refuses (at its high-water-mark) and everything
    /// still undelivered after it go into the engine's pending-inbound
    /// queue and its read side is disabled — refusing further input rather
    /// than decoding more and dropping it (spec §8 testable property 5).
    fn deliver_decoded(&mut self, session_handle: Handle, engine_handle: Handle, decoded: Vec<Message>) {
        if decoded.is_empty() {
            return;
        }
        let pipe = match self.sessions.get(session_handle).and_then(|s| s.pipe().cloned()) {
            Some(pipe) => pipe,
            None => return,
        };
        let mut iter = decoded.into_iter();
        for msg in &mut iter {
            if let Err(refused) = pipe.write(msg) {
                debug!("pipe for session {:?} at high-water-mark; stalling engine read side", session_handle);
                if let Some(EngineSlot::Active(engine)) = self.engines.get_mut(engine_handle) {
                    engine.disable_read();
                    engine.queue_pending_inbound(std::iter::once(refused).chain(iter));
                }
                return;
            }
        }
    }

    /// Retry anything the engine was holding back, in order, stopping at
    /// the first one the pipe still refuses.
    fn drain_pending_inbound(&mut self, session_handle: Handle, engine_handle: Handle) {
        let pipe = match self.sessions.get(session_handle).and_then(|s| s.pipe().cloned()) {
            Some(pipe) => pipe,
            None => return,
        };
        if let Some(EngineSlot::Active(engine)) = self.engines.get_mut(engine_handle) {
            while let Some(msg) = engine.pop_pending_inbound() {
                if let Err(refused) = pipe.write(msg) {
                    engine.requeue_pending_inbound_front(refused);
                    return;
                }
            }
        }
    }

    fn promote_connecting_engine(&mut self, handle: Handle) {
        if let Some(EngineSlot::Connecting { stream, session, socket_type, options, .. }) = self.engines.remove(handle) {
            let engine = Engine::new(stream, session, socket_type, options.max_msg_size);
            let reinserted = self.engines.insert(EngineSlot::Active(engine));
            if let Some(s) = self.sessions.get_mut(session) {
                s.attach_engine(reinserted);
            }
            debug!("connect completed for session {:?}", session);
            self.reregister_engine(reinserted);
        }
    }

    fn fail_connecting_engine(&mut self, handle: Handle) {
        if let Some(EngineSlot::Connecting { connector, session, socket_type, options, .. }) = self.engines.remove(handle) {
            self.schedule_reconnect(session, connector, socket_type, options);
        }
    }

    fn schedule_reconnect(&mut self, session_handle: Handle, connector: TcpConnector, socket_type: SocketType, options: Options) {
        let backoff = match self.sessions.get_mut(session_handle) {
            Some(session) => session.detach_engine(),
            None => return,
        };
        match backoff {
            Some(delay) => {
                let timer_id = self.timers.add(Instant::now(), delay);
                self.timer_targets.insert(timer_id, TimerTarget::Reconnect(session_handle));
                // Stash the connector/socket type/options so the fired timer
                // can retry; cheapest place to keep them is a side table
                // keyed by the same timer id.
                self.pending_reconnects.insert(timer_id, (connector, socket_type, options));
            }
            None => {
                self.sessions.remove(session_handle);
            }
        }
    }

    fn fire_expired_timers(&mut self, now: Instant) {
        let expired = self.timers.remove_expired_by(now);
        for id in expired {
            match self.timer_targets.remove(&id) {
                Some(TimerTarget::Reconnect(session_handle)) => {
                    if let Some((connector, socket_type, options)) = self.pending_reconnects.remove(&id) {
                        self.begin_connect(session_handle, connector, socket_type, options);
                    }
                }
                Some(TimerTarget::ShutdownDeadline) => {
                    debug!("shutdown linger deadline reached; force-closing remaining sessions");
                    self.finish_terminated_sessions(true);
                }
                None => {}
            }
        }
    }

    fn terminate_engine_for_session(&mut self, session_handle: Handle) {
        let engine_handle = self.sessions.get(session_handle).and_then(|s| s.engine());
        if let Some(engine_handle) = engine_handle {
            if let Some(EngineSlot::Active(engine)) = self.engines.get_mut(engine_handle) {
                engine.terminate();
            }
            self.engines.remove(engine_handle);
        }
        if let Some(session) = self.sessions.get_mut(session_handle) {
            session.engine_detach_ack();
        }
    }

    fn detach_engine(&mut self, engine_handle: Handle, session_handle: Handle) {
        self.engines.remove(engine_handle);
        let backoff_target = self.sessions.get_mut(session_handle).map(|s| s.detach_engine());
        match backoff_target {
            Some(None) => {
                // No endpoint to redial (an accepted connection) — the
                // session just terminated on its own; make sure its owner
                // stops routing to it.
                self.detach_owner_pipe(session_handle);
                self.reap_session_if_terminated(session_handle);
            }
            Some(Some(_)) => {
                // Orderly reconnection after an unplanned drop re-enters
                // through `Command::Connect` the owning socket issues once
                // it observes the pipe detach; this reactor has no
                // standing endpoint string to redial on its own.
                debug!("session {:?} will redial once the owner reconnects", session_handle);
            }
            None => {}
        }
    }

    fn reap_session_if_terminated(&mut self, session_handle: Handle) {
        let terminated = self.sessions.get(session_handle).map(|s| s.is_terminated()).unwrap_or(false);
        if terminated {
            self.sessions.remove(session_handle);
        }
    }

    fn reregister_engine(&mut self, engine_handle: Handle) {
        let token = self
            .tokens
            .iter()
            .find_map(|(t, target)| match target {
                TokenTarget::Engine(h) if *h == engine_handle => Some(*t),
                _ => None,
            });
        let (token, interest) = match (token, self.engines.get(engine_handle)) {
            (Some(token), Some(EngineSlot::Active(engine))) => (token, engine_interest(engine)),
            _ => return,
        };
        if let Some(EngineSlot::Active(engine)) = self.engines.get(engine_handle) {
            if let Err(e) = self.poll.reregister(engine.io(), token, interest, PollOpt::edge()) {
                warn!("failed to reregister engine: {}", e);
            }
        }
    }
}

/// Wakes the reactor by posting [`Command::ActivateWrite`] to its mailbox
/// — installed on the owner-side half of a session's pipe so a socket's
/// `send` unparks the engine that was stalled waiting for output.
struct MailboxNotify {
    mailbox: Arc<Mailbox>,
    session: Handle,
}

impl Notify for MailboxNotify {
    /// Fires for two distinct events on the owner-side pipe end — new
    /// outgoing data queued, or inbound data drained back below the
    /// low-water-mark — and the `PipeEnd` API doesn't tell us which.
    /// Posting both commands is harmless: `ActivateRead` only flips a flag
    /// if the engine was actually stalled, and `ActivateWrite` finds
    /// nothing queued if there wasn't any.
    fn notify(&self) {
        let _ = self.mailbox.send(Command::ActivateRead { to: self.session });
        let _ = self.mailbox.send(Command::ActivateWrite { to: self.session });
    }
}

impl fmt::Debug for MailboxNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxNotify").field("session", &self.session).finish()
    }
}

fn engine_interest(engine: &Engine) -> Ready {
    let mut r = Ready::empty();
    if engine.wants_read() {
        r |= Ready::readable();
    }
    if engine.wants_write() {
        r |= Ready::writable();
    }
    r
}
