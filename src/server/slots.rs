//! Keepalive slot table.
//!
//! The single source of truth for "does agent X currently have a live
//! socket". Each slot holds at most one occupant; installing over a live
//! one signals it to release itself. Newest connection wins, so an agent
//! that reboots and reconnects reaps its own stale half-open predecessor.

use std::{
    net::SocketAddrV4,
    sync::{Arc, Mutex},
};
use tokio::sync::Notify;
use tracing::{debug, error};

/// Monotonic identity of a connection, assigned at accept.
pub(crate) type PeerId = u64;

/// Non-owning back-reference to a parked peer.
#[derive(Debug, Clone)]
pub(crate) struct Occupant {
    pub(crate) peer: PeerId,
    pub(crate) addr: SocketAddrV4,
    pub(crate) evict: Arc<Notify>,
}

#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: Mutex<Box<[Option<Occupant>]>>,
}

impl SlotTable {
    pub(crate) fn new(count: usize) -> Self {
        SlotTable {
            slots: Mutex::new(vec![None; count].into_boxed_slice()),
        }
    }

    /// Installs `occupant` in `slot`, displacing any previous occupant.
    ///
    /// The displaced peer is signalled; its task closes the socket and
    /// calls [`SlotTable::release`] on its way out. Re-installing the
    /// current occupant is a no-op.
    pub(crate) fn install(&self, slot: usize, occupant: Occupant) {
        let mut slots = self.slots.lock().unwrap();
        let Some(entry) = slots.get_mut(slot) else {
            error!(slot, "keepalive slot out of range");
            return;
        };

        match entry.as_ref() {
            Some(old) if old.peer == occupant.peer => return,
            Some(old) => {
                debug!(addr = %old.addr, slot, "displacing old keepalive connection");
                old.evict.notify_one();
            }
            None => {}
        }

        *entry = Some(occupant);
    }

    /// Clears `slot` if it still belongs to `peer`.
    ///
    /// A peer that was displaced no longer owns its slot; comparing the
    /// identity keeps it from nulling out the newer occupant.
    pub(crate) fn release(&self, slot: usize, peer: PeerId) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(entry) = slots.get_mut(slot) {
            if entry.as_ref().is_some_and(|occupant| occupant.peer == peer) {
                *entry = None;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn occupant(&self, slot: usize) -> Option<Occupant> {
        self.slots.lock().unwrap().get(slot).and_then(Clone::clone)
    }
}

#[cfg(test)]
mod table {
    use super::*;
    use std::net::Ipv4Addr;

    fn occupant(peer: PeerId, port: u16) -> Occupant {
        Occupant {
            peer,
            addr: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), port),
            evict: Arc::new(Notify::new()),
        }
    }

    #[tokio::test]
    async fn newest_connection_wins() {
        let table = SlotTable::new(4);
        let first = occupant(1, 5001);
        let evicted = first.evict.clone();

        table.install(0, first);
        table.install(0, occupant(2, 5002));

        assert_eq!(table.occupant(0).unwrap().peer, 2);
        // The displaced occupant holds a stored wake permit.
        tokio::time::timeout(std::time::Duration::from_secs(1), evicted.notified())
            .await
            .unwrap();
    }

    #[test]
    fn reinstall_does_not_self_evict() {
        let table = SlotTable::new(4);
        let same = occupant(7, 5001);

        table.install(2, same.clone());
        table.install(2, same);

        assert_eq!(table.occupant(2).unwrap().peer, 7);
    }

    #[test]
    fn release_checks_identity() {
        let table = SlotTable::new(4);
        table.install(0, occupant(1, 5001));
        table.install(0, occupant(2, 5002));

        // The evicted peer releasing late must not clear the newer occupant.
        table.release(0, 1);
        assert_eq!(table.occupant(0).unwrap().peer, 2);

        table.release(0, 2);
        assert!(table.occupant(0).is_none());
    }

    #[test]
    fn out_of_range_slot_is_ignored() {
        let table = SlotTable::new(2);
        table.install(9, occupant(1, 5001));
        table.release(9, 1);
        assert!(table.occupant(9).is_none());
    }
}
