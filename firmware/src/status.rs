//! Shared connection status for the firmware target.
//!
//! The network task owns the connection state; these atomics publish a copy
//! so the cycle task can report network health without touching it.

use cycle_core::network::ConnectionState;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

static LINK_UP: AtomicBool = AtomicBool::new(false);
static TRANSPORT_UP: AtomicBool = AtomicBool::new(false);
static DELIVERED: AtomicU32 = AtomicU32::new(0);
static LOST: AtomicU32 = AtomicU32::new(0);

/// Point-in-time view of the uplink.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusSnapshot {
    pub link_up: bool,
    pub transport_up: bool,
    pub delivered: u32,
    pub lost: u32,
}

/// Publishes `state`; returns `true` when either layer changed.
pub fn record_connection(state: ConnectionState) -> bool {
    let link_changed = LINK_UP.swap(state.link_connected, Ordering::Relaxed) != state.link_connected;
    let transport_changed =
        TRANSPORT_UP.swap(state.transport_connected, Ordering::Relaxed) != state.transport_connected;
    link_changed || transport_changed
}

pub fn record_delivered() {
    DELIVERED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_lost() {
    LOST.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> StatusSnapshot {
    StatusSnapshot {
        link_up: LINK_UP.load(Ordering::Relaxed),
        transport_up: TRANSPORT_UP.load(Ordering::Relaxed),
        delivered: DELIVERED.load(Ordering::Relaxed),
        lost: LOST.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_connection_changes() {
        let up = ConnectionState {
            link_connected: true,
            transport_connected: true,
            last_reconnect_attempt: None,
        };

        record_connection(up);
        assert!(!record_connection(up));

        let snapshot = snapshot();
        assert!(snapshot.link_up);
        assert!(snapshot.transport_up);

        let down = ConnectionState {
            transport_connected: false,
            ..up
        };
        assert!(record_connection(down));
        assert!(!super::snapshot().transport_up);
    }

    #[test]
    fn counts_outcomes() {
        let before = snapshot();
        record_delivered();
        record_lost();
        let after = snapshot();
        assert!(after.delivered > before.delivered);
        assert!(after.lost > before.lost);
    }
}
