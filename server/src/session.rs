//! The authority session: sole owner of the relay's state
//!
//! One `AuthoritySession` is constructed when the authority starts and is
//! passed by reference to everything that dispatches events or handles
//! acknowledgements. It owns the ledger, the directory, the delivery
//! controller and the transport; there are no process-wide registries.
//!
//! Inbound acknowledgements are dispatched by lookup: the claimed identity
//! is resolved through the directory and the matching record is driven
//! directly, with no per-record callbacks.

use crate::delivery::{AckResult, DeliveryController, SelectionPolicy};
use crate::directory::RecipientDirectory;
use crate::error::DirectoryError;
use crate::ledger::{Event, EventLedger};
use crate::recipient::RecipientRecord;
use crate::transport::Transport;
use log::{info, warn};
use shared::{EventIndex, RecipientIndex, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Whether this process is the sender of record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authority,
    Observer,
}

pub struct AuthoritySession<T: Transport> {
    pub(crate) role: Role,
    pub(crate) ledger: EventLedger,
    pub(crate) directory: RecipientDirectory,
    pub(crate) controller: DeliveryController,
    pub(crate) transport: T,
}

impl<T: Transport> AuthoritySession<T> {
    pub fn new(transport: T, policy: SelectionPolicy) -> Self {
        Self::with_role(Role::Authority, transport, policy)
    }

    pub fn with_role(role: Role, transport: T, policy: SelectionPolicy) -> Self {
        info!("Session started as {:?} with {:?} selection", role, policy);
        Self {
            role,
            ledger: EventLedger::new(),
            directory: RecipientDirectory::new(),
            controller: DeliveryController::new(policy),
            transport,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_authority(&self) -> bool {
        self.role == Role::Authority
    }

    pub fn ledger(&self) -> &EventLedger {
        &self.ledger
    }

    pub fn directory(&self) -> &RecipientDirectory {
        &self.directory
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn record(&self, handle: RecipientIndex) -> Option<&RecipientRecord> {
        self.directory.get(handle)
    }

    /// Finds or allocates the record for `identity` and flushes its queue
    ///
    /// A returning identity gets back the record it left, including every
    /// event still waiting for acknowledgement.
    pub fn resolve(&mut self, identity: SocketAddr) -> Result<RecipientIndex, DirectoryError> {
        let handle = self.directory.resolve(identity)?;
        if let Some(record) = self.directory.get_mut(handle) {
            // Failures are logged inside send_next
            let _ = self.controller.send_next(record, &self.transport);
        }
        Ok(handle)
    }

    pub fn lookup(&self, identity: SocketAddr) -> Option<RecipientIndex> {
        self.directory.lookup(identity)
    }

    pub fn allocate_unbound(&mut self) -> Result<RecipientIndex, DirectoryError> {
        self.directory.allocate_unbound()
    }

    /// Binds a pre-allocated record and flushes anything queued for it
    pub fn bind(
        &mut self,
        handle: RecipientIndex,
        identity: SocketAddr,
    ) -> Result<(), DirectoryError> {
        self.directory.bind(handle, identity)?;
        if let Some(record) = self.directory.get_mut(handle) {
            // Failures are logged inside send_next
            let _ = self.controller.send_next(record, &self.transport);
        }
        Ok(())
    }

    pub fn detach(&mut self, identity: SocketAddr) -> Option<RecipientIndex> {
        self.directory.detach(identity)
    }

    /// Refreshes liveness for a connected identity; false if not connected
    pub fn touch(&mut self, identity: SocketAddr) -> bool {
        let Some(handle) = self.directory.lookup(identity) else {
            return false;
        };
        match self.directory.get_mut(handle) {
            Some(record) if record.is_attached() => {
                record.touch();
                true
            }
            _ => false,
        }
    }

    /// Detaches every connected identity not heard from within `timeout`
    ///
    /// Detached records keep their queues, see `archive` for eviction.
    pub fn expire(&mut self, timeout: Duration) -> Vec<SocketAddr> {
        let stale = self.directory.timed_out(timeout);
        for identity in &stale {
            info!("Recipient at {} timed out", identity);
            self.directory.detach(*identity);
        }
        stale
    }

    /// Retires records that stayed disconnected for longer than `after`
    pub fn archive(&mut self, after: Duration) -> Vec<RecipientIndex> {
        self.directory.archive(after)
    }

    /// Inbound acknowledgement entry point for the transport
    ///
    /// Unseen identities get a fresh record before the acknowledgement is
    /// applied, which then reports `UnknownEvent`. A detached identity is
    /// reattached first.
    pub fn on_acknowledgement(
        &mut self,
        identity: SocketAddr,
        index: EventIndex,
        status: StatusCode,
    ) -> AckResult {
        match self.resolve(identity) {
            Ok(handle) => self.acknowledge(handle, identity, index, status),
            Err(e) => {
                warn!("Ack for event {} from {} dropped: {}", index, identity, e);
                AckResult::Unauthorized
            }
        }
    }

    /// Applies an acknowledgement to the record addressed by `handle`
    pub fn acknowledge(
        &mut self,
        handle: RecipientIndex,
        sender: SocketAddr,
        index: EventIndex,
        status: StatusCode,
    ) -> AckResult {
        let Some(record) = self.directory.get_mut(handle) else {
            warn!(
                "Ack for event {} from {} addressed to unknown recipient {}",
                index, sender, handle
            );
            return AckResult::Unauthorized;
        };
        self.controller
            .acknowledge(record, sender, index, status, &self.transport)
    }

    /// In-flight events paired with their destination
    pub fn outstanding(&self) -> impl Iterator<Item = (SocketAddr, Arc<Event>)> + '_ {
        self.directory.records().filter_map(|record| {
            let identity = record.live_identity()?;
            let event = record.outstanding_event()?;
            Some((identity, Arc::clone(event)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::tests::RecordingTransport;
    use shared::STATUS_OK;
    use std::time::Instant;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn session() -> AuthoritySession<RecordingTransport> {
        AuthoritySession::new(RecordingTransport::default(), SelectionPolicy::NewestFirst)
    }

    #[test]
    fn test_session_defaults() {
        let session = session();
        assert!(session.is_authority());
        assert!(session.ledger().is_empty());
        assert!(session.directory().is_empty());
    }

    #[test]
    fn test_on_acknowledgement_routes_by_identity() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        let b = session.resolve(test_addr2()).unwrap();

        let index = session.send_to_all(b"round-start".to_vec()).unwrap();

        let result = session.on_acknowledgement(test_addr(), index, STATUS_OK);
        assert_eq!(result, AckResult::Acknowledged);
        assert!(!session.record(a).unwrap().waiting_for_response());
        assert!(session.record(b).unwrap().waiting_for_response());
    }

    #[test]
    fn test_ack_from_unseen_identity_allocates_record() {
        let mut session = session();

        let result = session.on_acknowledgement(test_addr(), 0, STATUS_OK);

        assert_eq!(result, AckResult::UnknownEvent);
        assert_eq!(session.lookup(test_addr()), Some(0));
    }

    #[test]
    fn test_acknowledge_with_wrong_sender() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        let index = session.send_to_recipient(a, b"secret".to_vec()).unwrap();

        let result = session.acknowledge(a, test_addr2(), index, STATUS_OK);

        assert_eq!(result, AckResult::Unauthorized);
        assert!(session.record(a).unwrap().waiting_for_response());
        assert_eq!(session.record(a).unwrap().last_acknowledged(), None);
    }

    #[test]
    fn test_acknowledge_unknown_handle() {
        let mut session = session();
        assert_eq!(
            session.acknowledge(42, test_addr(), 0, STATUS_OK),
            AckResult::Unauthorized
        );
    }

    #[test]
    fn test_bind_flushes_queued_events() {
        let mut session = session();
        let slot = session.allocate_unbound().unwrap();

        let index = session.send_to_recipient(slot, b"queued".to_vec()).unwrap();
        assert!(session.transport().sent.borrow().is_empty());

        session.bind(slot, test_addr()).unwrap();

        assert_eq!(session.transport().indices(), vec![index]);
        assert_eq!(session.record(slot).unwrap().outstanding(), Some(index));
    }

    #[test]
    fn test_outstanding_lists_in_flight_events() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        session.resolve(test_addr2()).unwrap();

        session.send_to_recipient(a, b"first".to_vec());
        session.send_to_recipient(a, b"second".to_vec());

        let outstanding: Vec<(SocketAddr, EventIndex)> = session
            .outstanding()
            .map(|(identity, event)| (identity, event.index))
            .collect();
        assert_eq!(outstanding, vec![(test_addr(), 0)]);
    }

    #[test]
    fn test_expire_detaches_stale_recipients() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        session.resolve(test_addr2()).unwrap();
        session.send_to_recipient(a, b"pending".to_vec());
        session.directory.get_mut(a).unwrap().last_seen = Instant::now() - Duration::from_secs(10);

        let expired = session.expire(Duration::from_secs(5));

        assert_eq!(expired, vec![test_addr()]);
        let record = session.record(a).unwrap();
        assert!(!record.is_attached());
        assert!(!record.is_retired());
        assert_eq!(record.pending(), vec![0]);
        assert_eq!(session.lookup(test_addr()), Some(a));
        assert!(!session.touch(test_addr()));
        assert_eq!(session.outstanding().count(), 0);
    }

    #[test]
    fn test_reconnect_delivers_events_queued_while_away() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        session.send_to_recipient(a, b"welcome".to_vec());
        session.send_to_recipient(a, b"pending-1".to_vec());

        session.detach(test_addr());
        let while_away = session.send_to_recipient(a, b"pending-2".to_vec()).unwrap();
        assert_eq!(session.transport().indices(), vec![0]);

        assert_eq!(session.resolve(test_addr()).unwrap(), a);
        assert_eq!(session.directory().len(), 1);
        assert_eq!(session.transport().indices(), vec![0, while_away]);

        for index in [while_away, 1, 0] {
            assert_eq!(
                session.on_acknowledgement(test_addr(), index, STATUS_OK),
                AckResult::Acknowledged
            );
        }
        assert_eq!(session.transport().indices(), vec![0, 2, 1, 0]);
        assert_eq!(session.record(a).unwrap().pending_len(), 0);
    }

    #[test]
    fn test_archive_evicts_long_departed_recipients() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        session.send_to_recipient(a, b"never-acked".to_vec());
        session.detach(test_addr());
        session.directory.get_mut(a).unwrap().last_seen = Instant::now() - Duration::from_secs(120);

        assert_eq!(session.archive(Duration::from_secs(60)), vec![a]);

        assert!(session.record(a).unwrap().is_retired());
        assert_eq!(session.record(a).unwrap().pending_len(), 0);
        assert_ne!(session.resolve(test_addr()).unwrap(), a);
    }

    #[test]
    fn test_touch_unknown_identity() {
        let mut session = session();
        assert!(!session.touch(test_addr()));
        session.resolve(test_addr()).unwrap();
        assert!(session.touch(test_addr()));
    }
}
