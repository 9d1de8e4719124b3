//! Public send entry points for authority-side game logic
//!
//! Every send goes through the ledger first, so an event has its permanent
//! index before any recipient queue sees it. A broadcast is appended once
//! and the same event is enqueued on every record, which lets logs and
//! acknowledgements from different recipients be correlated by index.
//!
//! Payloads that would not fit in one datagram are refused before they are
//! registered. Once queued, an undeliverable event would hold its recipient
//! InFlight forever.

use crate::error::DeliveryError;
use crate::session::AuthoritySession;
use crate::transport::Transport;
use log::{debug, warn};
use shared::{max_event_payload, EventIndex, RecipientIndex};

impl<T: Transport> AuthoritySession<T> {
    /// Returns false, with a log line, if `payload` cannot travel as one event
    fn fits_on_wire(payload: &[u8]) -> bool {
        let limit = max_event_payload();
        if payload.len() > limit {
            let err = DeliveryError::PayloadTooLarge {
                size: payload.len(),
                limit,
            };
            warn!("{}", err);
            return false;
        }
        true
    }

    /// Returns false, with a log line, if `handle` cannot take new events
    fn accepts_events(&self, handle: RecipientIndex) -> bool {
        match self.directory.get(handle) {
            Some(record) if record.is_retired() => {
                warn!("Recipient {} is retired, dropping send", handle);
                false
            }
            Some(_) => true,
            None => {
                warn!("Recipient {} does not exist, dropping send", handle);
                false
            }
        }
    }

    /// Registers `payload` and queues it for one recipient
    pub fn send_to_recipient(
        &mut self,
        handle: RecipientIndex,
        payload: Vec<u8>,
    ) -> Option<EventIndex> {
        if !self.is_authority() {
            debug!("Not the authority, ignoring send to recipient {}", handle);
            return None;
        }
        if !self.accepts_events(handle) || !Self::fits_on_wire(&payload) {
            return None;
        }

        let event = self.ledger.append(payload)?;
        let index = event.index;
        let record = self.directory.get_mut(handle)?;
        self.controller.enqueue(record, event, &self.transport);
        Some(index)
    }

    /// Queues an already registered event for one recipient
    pub fn send_registered(
        &mut self,
        handle: RecipientIndex,
        index: EventIndex,
    ) -> Option<EventIndex> {
        if !self.is_authority() {
            debug!("Not the authority, ignoring resend of event {}", index);
            return None;
        }
        let Some(event) = self.ledger.get(index) else {
            warn!("Event {} is not in the ledger", index);
            return None;
        };
        if !self.accepts_events(handle) {
            return None;
        }

        let record = self.directory.get_mut(handle)?;
        self.controller.enqueue(record, event, &self.transport);
        Some(index)
    }

    /// Registers `payload` once and queues it for every active recipient
    pub fn send_to_all(&mut self, payload: Vec<u8>) -> Option<EventIndex> {
        if !self.is_authority() {
            debug!("Not the authority, ignoring broadcast");
            return None;
        }
        if !Self::fits_on_wire(&payload) {
            return None;
        }

        let event = self.ledger.append(payload)?;
        let mut delivered = 0;
        for record in self.directory.records_mut() {
            if record.is_retired() {
                continue;
            }
            self.controller
                .enqueue(record, std::sync::Arc::clone(&event), &self.transport);
            delivered += 1;
        }

        debug!("Broadcast event {} to {} recipients", event.index, delivered);
        Some(event.index)
    }
}

#[cfg(test)]
mod tests {
    use crate::delivery::tests::RecordingTransport;
    use crate::delivery::{AckResult, SelectionPolicy};
    use crate::session::{AuthoritySession, Role};
    use shared::{max_event_payload, EventIndex, STATUS_OK};
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn session() -> AuthoritySession<RecordingTransport> {
        AuthoritySession::new(RecordingTransport::default(), SelectionPolicy::default())
    }

    #[test]
    fn test_send_to_recipient_registers_and_transmits() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();

        let index = session.send_to_recipient(a, b"move:3".to_vec());

        assert_eq!(index, Some(0));
        assert_eq!(session.ledger().len(), 1);
        let sent = session.transport().sent.borrow();
        assert_eq!(sent.as_slice(), &[(test_addr(), 0, b"move:3".to_vec())]);
    }

    #[test]
    fn test_broadcast_shares_event_index() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        let b = session.resolve(test_addr2()).unwrap();
        session.send_to_recipient(a, b"warmup".to_vec());

        let index = session.send_to_all(b"round".to_vec()).unwrap();

        assert_eq!(index, 1);
        assert_eq!(session.ledger().len(), 2);
        assert_eq!(session.record(a).unwrap().pending(), vec![0, 1]);
        assert_eq!(session.record(b).unwrap().pending(), vec![1]);
    }

    #[test]
    fn test_broadcast_recipients_are_independent() {
        let mut session = session();
        for _ in 0..5 {
            session.send_to_all(b"history".to_vec());
        }
        let a = session.resolve(test_addr()).unwrap();
        let b = session.resolve(test_addr2()).unwrap();

        let index = session.send_to_all(b"P".to_vec()).unwrap();
        assert_eq!(index, 5);

        assert_eq!(
            session.on_acknowledgement(test_addr(), 5, STATUS_OK),
            AckResult::Acknowledged
        );

        let record_a = session.record(a).unwrap();
        let record_b = session.record(b).unwrap();
        assert!(!record_a.waiting_for_response());
        assert_eq!(record_a.last_acknowledged(), Some(5));
        assert!(record_b.waiting_for_response());
        assert_eq!(record_b.outstanding(), Some(5));
        assert_eq!(record_b.last_acknowledged(), None);
    }

    /// Detaches `identity` and ages it past the archival threshold
    fn archive(session: &mut AuthoritySession<RecordingTransport>, identity: SocketAddr) {
        let handle = session.lookup(identity).unwrap();
        session.detach(identity);
        session.directory.get_mut(handle).unwrap().last_seen =
            Instant::now() - Duration::from_secs(120);
        session.archive(Duration::from_secs(60));
    }

    #[test]
    fn test_broadcast_skips_retired_records() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        let b = session.resolve(test_addr2()).unwrap();
        archive(&mut session, test_addr());

        session.send_to_all(b"after-leave".to_vec());

        assert_eq!(session.record(a).unwrap().pending_len(), 0);
        assert_eq!(session.record(b).unwrap().pending(), vec![0]);
    }

    #[test]
    fn test_broadcast_queues_for_detached_records() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        let b = session.resolve(test_addr2()).unwrap();
        session.detach(test_addr());

        let index = session.send_to_all(b"while-away".to_vec()).unwrap();

        assert_eq!(session.record(a).unwrap().pending(), vec![index]);
        assert_eq!(session.record(b).unwrap().outstanding(), Some(index));
        assert_eq!(session.transport().sent.borrow().len(), 1);
    }

    #[test]
    fn test_payload_size_limit() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        let limit = max_event_payload();

        assert_eq!(session.send_to_recipient(a, vec![7; limit + 1]), None);
        assert_eq!(session.send_to_all(vec![7; limit + 1]), None);
        assert!(session.ledger().is_empty());
        assert!(!session.record(a).unwrap().waiting_for_response());

        assert_eq!(session.send_to_recipient(a, vec![7; limit]), Some(0));
        assert_eq!(session.transport().indices(), vec![0]);
    }

    #[test]
    fn test_indices_strictly_increase() {
        let mut session = session();
        let mut events: Vec<EventIndex> = Vec::new();
        let mut recipients = Vec::new();

        for port in 0..20u16 {
            let addr: SocketAddr = format!("127.0.0.1:{}", 9000 + port).parse().unwrap();
            recipients.push(session.resolve(addr).unwrap());
            if port % 3 == 0 {
                events.extend(session.send_to_all(vec![port as u8]));
            } else {
                events.extend(session.send_to_recipient(recipients[0], vec![port as u8]));
            }
            if port % 5 == 0 {
                session.detach(addr);
            }
        }

        assert!(events.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(recipients.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(events.len(), session.ledger().len());
    }

    #[test]
    fn test_observer_role_is_a_no_op() {
        let mut session = AuthoritySession::with_role(
            Role::Observer,
            RecordingTransport::default(),
            SelectionPolicy::default(),
        );
        let a = session.resolve(test_addr()).unwrap();

        assert_eq!(session.send_to_recipient(a, b"x".to_vec()), None);
        assert_eq!(session.send_to_all(b"x".to_vec()), None);
        assert!(session.ledger().is_empty());
        assert!(session.transport().sent.borrow().is_empty());
        assert_eq!(session.record(a).unwrap().pending_len(), 0);
    }

    #[test]
    fn test_send_to_missing_or_retired_recipient() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        archive(&mut session, test_addr());

        assert_eq!(session.send_to_recipient(a, b"late".to_vec()), None);
        assert_eq!(session.send_to_recipient(77, b"nobody".to_vec()), None);
        assert!(session.ledger().is_empty());
    }

    #[test]
    fn test_send_registered_reuses_ledger_entry() {
        let mut session = session();
        let a = session.resolve(test_addr()).unwrap();
        let b = session.resolve(test_addr2()).unwrap();
        let index = session.send_to_recipient(a, b"intro".to_vec()).unwrap();

        assert_eq!(session.send_registered(b, index), Some(index));
        assert_eq!(session.ledger().len(), 1);
        assert_eq!(session.record(b).unwrap().outstanding(), Some(index));
        assert_eq!(session.send_registered(b, 50), None);
    }
}
