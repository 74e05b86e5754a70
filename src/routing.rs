//! Per-socket-type envelope and fan-out strategy, dispatched from
//! [`crate::session::Session`]. Sits above the pipe layer only — it never
//! touches the decoder/encoder or reactor, matching spec §4.6.

use crate::command::Handle;
use crate::error::{Error, Result};
use crate::message::Message;
use std::collections::HashMap;
use std::fmt;

pub type PipeId = Handle;

/// The ZMTP socket-type byte sent in the greeting (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Pair = 0,
    Pub = 1,
    Sub = 2,
    Req = 3,
    Rep = 4,
    Dealer = 5,
    Router = 6,
    Pull = 7,
    Push = 8,
}

impl SocketType {
    pub fn wire_byte(self) -> u8 {
        self as u8
    }
}

/// Strategy interface a [`crate::session::Session`] dispatches to for
/// socket-type-specific behavior: which pipes a send fans out to, how
/// incoming envelopes are interpreted, and subscription filtering.
pub trait RoutingPolicy: Send + fmt::Debug {
    fn attach_pipe(&mut self, id: PipeId);
    fn detach_pipe(&mut self, id: PipeId);

    /// Choose which attached pipes an outgoing logical message (already
    /// assembled as its full frame sequence) should be written to, possibly
    /// mutating the frames (e.g. stripping a ROUTER identity prefix, adding
    /// a REQ/REP delimiter). `attached` lists every currently attached
    /// pipe, in attach order.
    fn select_outgoing(&mut self, msg: &mut Vec<Message>, attached: &[PipeId]) -> Result<Vec<PipeId>>;

    /// A fully assembled incoming logical message arrived from pipe `from`.
    /// Return the frames to deliver to the application (possibly
    /// transformed), or `None` to swallow it (subscription control frames,
    /// filtered-out PUB/SUB traffic).
    fn accept_incoming(&mut self, from: PipeId, msg: Vec<Message>) -> Option<Vec<Message>>;

    /// Produce the wire frames for a subscribe/unsubscribe request, if this
    /// policy understands one (`Sub` only). Default: none.
    fn subscribe(&mut self, _prefix: &[u8]) -> Option<Message> {
        None
    }
    fn unsubscribe(&mut self, _prefix: &[u8]) -> Option<Message> {
        None
    }
}

fn single_attached(attached: &[PipeId]) -> Result<PipeId> {
    attached
        .first()
        .copied()
        .ok_or_else(|| Error::InvalidState("no peer attached"))
}

/// PAIR: exactly one peer, frames pass through unmodified.
#[derive(Debug, Default)]
pub struct Pair {
    peer: Option<PipeId>,
}

impl RoutingPolicy for Pair {
    fn attach_pipe(&mut self, id: PipeId) {
        if self.peer.is_some() {
            log::warn!("PAIR socket already has a peer; ignoring additional attach");
            return;
        }
        self.peer = Some(id);
    }

    fn detach_pipe(&mut self, id: PipeId) {
        if self.peer == Some(id) {
            self.peer = None;
        }
    }

    fn select_outgoing(&mut self, _msg: &mut Vec<Message>, _attached: &[PipeId]) -> Result<Vec<PipeId>> {
        let peer = self.peer.ok_or_else(|| Error::InvalidState("no peer attached"))?;
        Ok(vec![peer])
    }

    fn accept_incoming(&mut self, _from: PipeId, msg: Vec<Message>) -> Option<Vec<Message>> {
        Some(msg)
    }
}

/// PUSH: round-robins outgoing messages across attached pipes, never
/// receives.
#[derive(Debug, Default)]
pub struct Push {
    attached: Vec<PipeId>,
    next: usize,
}

impl RoutingPolicy for Push {
    fn attach_pipe(&mut self, id: PipeId) {
        self.attached.push(id);
    }

    fn detach_pipe(&mut self, id: PipeId) {
        self.attached.retain(|p| *p != id);
        self.next = 0;
    }

    fn select_outgoing(&mut self, _msg: &mut Vec<Message>, attached: &[PipeId]) -> Result<Vec<PipeId>> {
        if attached.is_empty() {
            return Err(Error::InvalidState("no peer attached"));
        }
        let idx = self.next % attached.len();
        self.next = self.next.wrapping_add(1);
        Ok(vec![attached[idx]])
    }

    fn accept_incoming(&mut self, _from: PipeId, _msg: Vec<Message>) -> Option<Vec<Message>> {
        log::warn!("PUSH socket received inbound data; dropping");
        None
    }
}

/// PULL: fair-queued reads, never sends.
#[derive(Debug, Default)]
pub struct Pull;

impl RoutingPolicy for Pull {
    fn attach_pipe(&mut self, _id: PipeId) {}
    fn detach_pipe(&mut self, _id: PipeId) {}

    fn select_outgoing(&mut self, _msg: &mut Vec<Message>, _attached: &[PipeId]) -> Result<Vec<PipeId>> {
        Err(Error::InvalidState("PULL sockets cannot send"))
    }

    fn accept_incoming(&mut self, _from: PipeId, msg: Vec<Message>) -> Option<Vec<Message>> {
        Some(msg)
    }
}

/// DEALER: round-robin send like PUSH, fair-queue receive like PULL, raw
/// envelopes (no delimiter synthesis).
#[derive(Debug, Default)]
pub struct Dealer {
    attached: Vec<PipeId>,
    next: usize,
}

impl RoutingPolicy for Dealer {
    fn attach_pipe(&mut self, id: PipeId) {
        self.attached.push(id);
    }

    fn detach_pipe(&mut self, id: PipeId) {
        self.attached.retain(|p| *p != id);
    }

    fn select_outgoing(&mut self, _msg: &mut Vec<Message>, attached: &[PipeId]) -> Result<Vec<PipeId>> {
        if attached.is_empty() {
            return Err(Error::InvalidState("no peer attached"));
        }
        let idx = self.next % attached.len();
        self.next = self.next.wrapping_add(1);
        Ok(vec![attached[idx]])
    }

    fn accept_incoming(&mut self, _from: PipeId, msg: Vec<Message>) -> Option<Vec<Message>> {
        Some(msg)
    }
}

/// ROUTER: prefixes a per-pipe identity frame onto inbound messages, and
/// routes outbound messages by stripping and matching that same identity
/// frame back off.
#[derive(Debug, Default)]
pub struct Router {
    identities: HashMap<PipeId, Vec<u8>>,
    by_identity: HashMap<Vec<u8>, PipeId>,
    next_id: u64,
}

impl RoutingPolicy for Router {
    fn attach_pipe(&mut self, id: PipeId) {
        let identity = self.next_id.to_be_bytes().to_vec();
        self.next_id += 1;
        self.by_identity.insert(identity.clone(), id);
        self.identities.insert(id, identity);
    }

    fn detach_pipe(&mut self, id: PipeId) {
        if let Some(identity) = self.identities.remove(&id) {
            self.by_identity.remove(&identity);
        }
    }

    fn select_outgoing(&mut self, msg: &mut Vec<Message>, _attached: &[PipeId]) -> Result<Vec<PipeId>> {
        if msg.is_empty() {
            return Err(Error::InvalidState("ROUTER send requires an identity frame"));
        }
        let identity = msg.remove(0);
        let target = *self
            .by_identity
            .get(identity.as_ref())
            .ok_or_else(|| Error::InvalidState("no route to that identity"))?;
        Ok(vec![target])
    }

    fn accept_incoming(&mut self, from: PipeId, mut msg: Vec<Message>) -> Option<Vec<Message>> {
        let identity = self.identities.get(&from)?.clone();
        msg.insert(0, Message::new(identity));
        Some(msg)
    }
}

/// REQ: strict send/recv alternation, synthesizes the empty ZMTP delimiter
/// frame and strips it back off on reply.
#[derive(Debug, Default)]
pub struct Req {
    attached: Vec<PipeId>,
    next: usize,
    awaiting_reply: Option<PipeId>,
}

impl RoutingPolicy for Req {
    fn attach_pipe(&mut self, id: PipeId) {
        self.attached.push(id);
    }

    fn detach_pipe(&mut self, id: PipeId) {
        self.attached.retain(|p| *p != id);
        if self.awaiting_reply == Some(id) {
            self.awaiting_reply = None;
        }
    }

    fn select_outgoing(&mut self, msg: &mut Vec<Message>, attached: &[PipeId]) -> Result<Vec<PipeId>> {
        if self.awaiting_reply.is_some() {
            return Err(Error::InvalidState("REQ send before matching recv"));
        }
        if attached.is_empty() {
            return Err(Error::InvalidState("no peer attached"));
        }
        let idx = self.next % attached.len();
        self.next = self.next.wrapping_add(1);
        let target = attached[idx];
        msg.insert(0, Message::new(Vec::new()));
        self.awaiting_reply = Some(target);
        Ok(vec![target])
    }

    fn accept_incoming(&mut self, from: PipeId, mut msg: Vec<Message>) -> Option<Vec<Message>> {
        if self.awaiting_reply != Some(from) {
            log::warn!("REQ received reply from unexpected peer; dropping");
            return None;
        }
        if msg.first().map(|m| m.is_empty()) != Some(true) {
            log::warn!("REQ reply missing delimiter frame; dropping");
            return None;
        }
        msg.remove(0);
        self.awaiting_reply = None;
        Some(msg)
    }
}

/// REP: mirror image of REQ — remembers which pipe the last request came
/// from and requires the delimiter frame on the way in, re-adding it on
/// the way out.
#[derive(Debug, Default)]
pub struct Rep {
    pending_reply_to: Option<PipeId>,
}

impl RoutingPolicy for Rep {
    fn attach_pipe(&mut self, _id: PipeId) {}

    fn detach_pipe(&mut self, id: PipeId) {
        if self.pending_reply_to == Some(id) {
            self.pending_reply_to = None;
        }
    }

    fn select_outgoing(&mut self, msg: &mut Vec<Message>, _attached: &[PipeId]) -> Result<Vec<PipeId>> {
        let target = self
            .pending_reply_to
            .take()
            .ok_or_else(|| Error::InvalidState("REP send before matching recv"))?;
        msg.insert(0, Message::new(Vec::new()));
        Ok(vec![target])
    }

    fn accept_incoming(&mut self, from: PipeId, mut msg: Vec<Message>) -> Option<Vec<Message>> {
        if msg.first().map(|m| m.is_empty()) != Some(true) {
            log::warn!("REP request missing delimiter frame; dropping");
            return None;
        }
        msg.remove(0);
        self.pending_reply_to = Some(from);
        Some(msg)
    }
}

/// Minimal prefix-subscription table: PUB keeps one set of subscribed
/// prefixes per attached pipe and fans a publish out to every pipe with a
/// matching prefix.
#[derive(Debug, Default)]
pub struct Pub {
    subscriptions: HashMap<PipeId, Vec<Vec<u8>>>,
}

impl RoutingPolicy for Pub {
    fn attach_pipe(&mut self, id: PipeId) {
        self.subscriptions.entry(id).or_default();
    }

    fn detach_pipe(&mut self, id: PipeId) {
        self.subscriptions.remove(&id);
    }

    fn select_outgoing(&mut self, msg: &mut Vec<Message>, attached: &[PipeId]) -> Result<Vec<PipeId>> {
        let topic: &[u8] = msg.first().map(|m| m.as_ref()).unwrap_or(&[]);
        let matches = attached
            .iter()
            .filter(|id| {
                self.subscriptions
                    .get(id)
                    .map(|prefixes| prefixes.iter().any(|p| topic.starts_with(p)))
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        Ok(matches)
    }

    fn accept_incoming(&mut self, from: PipeId, msg: Vec<Message>) -> Option<Vec<Message>> {
        // Inbound traffic on a PUB pipe is always a subscription control
        // frame: byte 0 is 0x01 (subscribe) or 0x00 (unsubscribe), the rest
        // is the prefix.
        let frame = msg.first()?;
        if frame.is_empty() {
            return None;
        }
        let prefixes = self.subscriptions.entry(from).or_default();
        let prefix = frame[1..].to_vec();
        match frame[0] {
            1 => {
                if !prefixes.contains(&prefix) {
                    prefixes.push(prefix);
                }
            }
            0 => prefixes.retain(|p| p != &prefix),
            _ => log::warn!("malformed subscription control frame"),
        }
        None
    }
}

/// SUB: defensively re-filters incoming publishes against its own
/// subscription set (mirroring the reference implementation, which does
/// not trust the publisher alone) and turns `subscribe`/`unsubscribe`
/// calls into wire control frames.
#[derive(Debug, Default)]
pub struct Sub {
    prefixes: Vec<Vec<u8>>,
}

impl RoutingPolicy for Sub {
    fn attach_pipe(&mut self, _id: PipeId) {}
    fn detach_pipe(&mut self, _id: PipeId) {}

    fn select_outgoing(&mut self, _msg: &mut Vec<Message>, _attached: &[PipeId]) -> Result<Vec<PipeId>> {
        Err(Error::InvalidState("SUB sockets cannot send application messages"))
    }

    fn accept_incoming(&mut self, _from: PipeId, msg: Vec<Message>) -> Option<Vec<Message>> {
        let topic: &[u8] = msg.first().map(|m| m.as_ref()).unwrap_or(&[]);
        if self.prefixes.is_empty() || self.prefixes.iter().any(|p| topic.starts_with(p.as_slice())) {
            Some(msg)
        } else {
            None
        }
    }

    fn subscribe(&mut self, prefix: &[u8]) -> Option<Message> {
        self.prefixes.push(prefix.to_vec());
        let mut frame = vec![1u8];
        frame.extend_from_slice(prefix);
        Some(Message::new(frame))
    }

    fn unsubscribe(&mut self, prefix: &[u8]) -> Option<Message> {
        self.prefixes.retain(|p| p != prefix);
        let mut frame = vec![0u8];
        frame.extend_from_slice(prefix);
        Some(Message::new(frame))
    }
}

pub fn for_socket_type(kind: SocketType) -> Box<dyn RoutingPolicy> {
    match kind {
        SocketType::Pair => Box::new(Pair::default()),
        SocketType::Pub => Box::new(Pub::default()),
        SocketType::Sub => Box::new(Sub::default()),
        SocketType::Req => Box::new(Req::default()),
        SocketType::Rep => Box::new(Rep::default()),
        SocketType::Dealer => Box::new(Dealer::default()),
        SocketType::Router => Box::new(Router::default()),
        SocketType::Pull => Box::new(Pull::default()),
        SocketType::Push => Box::new(Push::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(i: usize) -> PipeId {
        Handle::new(i, 0)
    }

    #[test]
    fn push_round_robins() {
        let mut push = Push::default();
        push.attach_pipe(h(0));
        push.attach_pipe(h(1));
        let attached = vec![h(0), h(1)];

        let mut msg = vec![Message::new(b"x".to_vec())];
        let first = push.select_outgoing(&mut msg, &attached).unwrap();
        let second = push.select_outgoing(&mut msg, &attached).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn router_round_trips_identity() {
        let mut router = Router::default();
        router.attach_pipe(h(0));
        router.attach_pipe(h(1));

        let delivered = router.accept_incoming(h(1), vec![Message::new(b"hi".to_vec())]).unwrap();
        let identity = delivered[0].clone();

        let mut outgoing = vec![identity, Message::new(b"reply".to_vec())];
        let targets = router.select_outgoing(&mut outgoing, &[h(0), h(1)]).unwrap();
        assert_eq!(targets, vec![h(1)]);
        assert_eq!(outgoing.len(), 1);
    }

    #[test]
    fn req_enforces_alternation() {
        let mut req = Req::default();
        req.attach_pipe(h(0));
        let attached = vec![h(0)];

        let mut msg = vec![Message::new(b"ping".to_vec())];
        req.select_outgoing(&mut msg, &attached).unwrap();
        assert_eq!(msg[0].len(), 0);

        let mut second = vec![Message::new(b"again".to_vec())];
        assert!(req.select_outgoing(&mut second, &attached).is_err());

        let reply = req
            .accept_incoming(h(0), vec![Message::new(Vec::new()), Message::new(b"pong".to_vec())])
            .unwrap();
        assert_eq!(reply[0].as_ref(), b"pong");

        assert!(req.select_outgoing(&mut second, &attached).is_ok());
    }

    #[test]
    fn pub_sub_prefix_filtering() {
        let mut publisher = Pub::default();
        publisher.attach_pipe(h(0));
        publisher.accept_incoming(h(0), vec![Message::new(b"\x01topicA".to_vec())]);

        let mut msg = vec![Message::new(b"topicA-data".to_vec())];
        let targets = publisher.select_outgoing(&mut msg, &[h(0)]).unwrap();
        assert_eq!(targets, vec![h(0)]);

        let mut other = vec![Message::new(b"topicB-data".to_vec())];
        let targets = publisher.select_outgoing(&mut other, &[h(0)]).unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn sub_filters_locally_too() {
        let mut sub = Sub::default();
        sub.subscribe(b"a");
        let accepted = sub.accept_incoming(h(0), vec![Message::new(b"a-1".to_vec())]);
        assert!(accepted.is_some());
        let rejected = sub.accept_incoming(h(0), vec![Message::new(b"b-1".to_vec())]);
        assert!(rejected.is_none());
    }
}
