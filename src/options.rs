use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-socket configuration, grounded in libzmq's `options_t` and
/// serializable the way the teacher crate's config types are (`serde`
/// derive), so a socket's tuning can be loaded from a config file or
/// passed across a process boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Outbound pipe high-water-mark: max in-flight messages before `send`
    /// is refused.
    pub send_hwm: usize,
    /// Inbound pipe high-water-mark.
    pub recv_hwm: usize,
    /// Level a pipe must drain back down to before the peer is told it can
    /// write again.
    pub low_water_mark: usize,
    /// How long `Context::term`/`Socket::drop` waits for queued outbound
    /// messages to drain before giving up on them (spec §8 S6).
    #[serde(with = "duration_millis")]
    pub linger: Duration,
    /// Initial reconnect backoff.
    #[serde(with = "duration_millis")]
    pub reconnect_ivl: Duration,
    /// Exponential backoff ceiling.
    #[serde(with = "duration_millis")]
    pub reconnect_ivl_max: Duration,
    /// Largest frame body this engine's decoder will accept before
    /// latching dead; 0 means unbounded.
    pub max_msg_size: usize,
    /// Identity bytes advertised for ROUTER-facing sockets; empty means
    /// auto-assigned.
    pub identity: Vec<u8>,
    /// Whether to set `SO_KEEPALIVE` on TCP connections.
    pub tcp_keepalive: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            send_hwm: 1000,
            recv_hwm: 1000,
            low_water_mark: 0,
            linger: Duration::from_secs(30),
            reconnect_ivl: Duration::from_millis(100),
            reconnect_ivl_max: Duration::from_secs(30),
            max_msg_size: 0,
            identity: Vec::new(),
            tcp_keepalive: true,
        }
    }
}

impl Options {
    /// Low-water-mark used by a pipe: explicit `low_water_mark` if set,
    /// otherwise a quarter of the high-water-mark (libzmq's default ratio).
    pub fn effective_lwm(&self, hwm: usize) -> usize {
        if self.low_water_mark > 0 {
            self.low_water_mark
        } else {
            (hwm / 4).max(1)
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lwm_is_quarter_of_hwm() {
        let opts = Options::default();
        assert_eq!(opts.effective_lwm(1000), 250);
    }

    #[test]
    fn round_trips_through_json() {
        let opts = Options {
            send_hwm: 42,
            linger: Duration::from_millis(1500),
            ..Options::default()
        };
        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("\"send_hwm\":42"));
        assert!(json.contains("\"linger\":1500"));

        let decoded: Options = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.send_hwm, 42);
        assert_eq!(decoded.linger, Duration::from_millis(1500));
        assert_eq!(decoded.reconnect_ivl, opts.reconnect_ivl);
    }
}
