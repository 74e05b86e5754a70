use crate::message::Message;

/// Typed conversion out of a received [`Message`], used by
/// `Socket::recv_as`/`recv_multipart_as`.
pub trait FromMessage {
    fn from(msg: Message) -> Self;
}

impl FromMessage for Message {
    fn from(msg: Message) -> Self {
        msg
    }
}

impl FromMessage for String {
    fn from(msg: Message) -> Self {
        String::from_utf8_lossy(&msg).to_string()
    }
}

impl FromMessage for Vec<u8> {
    fn from(msg: Message) -> Self {
        msg.to_vec()
    }
}

impl FromMessage for Box<[u8]> {
    fn from(msg: Message) -> Self {
        (*msg).into()
    }
}
