use crate::error::{Error, Result};
use crate::owner::SessionOwner;
use crate::pipe::PipeEnd;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

lazy_static! {
    /// Process-wide endpoint name → bound owner rendezvous table (spec
    /// §4.7). `inproc://` has no listener, no accept loop, and no reactor
    /// involvement at all: binding just registers an owner here, and
    /// connecting looks it up and wires a pipe pair directly.
    static ref REGISTRY: Mutex<HashMap<String, Arc<dyn SessionOwner>>> = Mutex::new(HashMap::new());
}

pub fn bind(endpoint: &str, owner: Arc<dyn SessionOwner>) -> Result<()> {
    let mut table = REGISTRY.lock().unwrap();
    if table.contains_key(endpoint) {
        return Err(Error::protocol(format!("inproc endpoint already bound: {}", endpoint)));
    }
    table.insert(endpoint.to_string(), owner);
    Ok(())
}

pub fn unbind(endpoint: &str) {
    REGISTRY.lock().unwrap().remove(endpoint);
}

/// Connect to a bound inproc endpoint. Builds one `PipeEnd` pair and hands
/// one half to each owner, cross-wiring the notify each `attach_session`
/// hands back onto the far end — entirely bypassing the decoder, encoder,
/// and reactor (spec §4.7).
pub fn connect(endpoint: &str, connecting_owner: &Arc<dyn SessionOwner>) -> Result<()> {
    let bound_owner = {
        let table = REGISTRY.lock().unwrap();
        table
            .get(endpoint)
            .cloned()
            .ok_or_else(|| Error::protocol(format!("no inproc endpoint bound at {}", endpoint)))?
    };

    let hwm = connecting_owner.options().recv_hwm.max(bound_owner.options().recv_hwm);
    let lwm = connecting_owner.options().effective_lwm(hwm);
    let (end_connecting, end_bound) = PipeEnd::pair(hwm, lwm);

    let (_connecting_id, wake_connecting) = connecting_owner.attach_session(end_connecting.clone());
    let (_bound_id, wake_bound) = bound_owner.attach_session(end_bound.clone());

    // Each owner's returned notify wakes *it*; install it on the far end
    // of the pair so the other side's writes reach it.
    end_bound.set_peer_notify(wake_connecting);
    end_connecting.set_peer_notify(wake_bound);

    Ok(())
}
