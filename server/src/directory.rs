//! Mapping from connection identities to recipient records
//!
//! Records live in an arena addressed by `RecipientIndex`, so every
//! mutation happens in place through the index. Bindings from `SocketAddr`
//! to index are created lazily on first contact and outlive disconnects:
//! an identity that comes back finds the record it left.

use crate::error::DirectoryError;
use crate::recipient::RecipientRecord;
use log::{error, info};
use shared::RecipientIndex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct RecipientDirectory {
    /// Every record ever allocated, indexed by `RecipientIndex`
    records: Vec<RecipientRecord>,
    /// Identities bound to a record that has not been retired
    bindings: HashMap<SocketAddr, RecipientIndex>,
}

impl RecipientDirectory {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            bindings: HashMap::new(),
        }
    }

    fn allocate(
        &mut self,
        identity: Option<SocketAddr>,
    ) -> Result<RecipientIndex, DirectoryError> {
        let Ok(index) = RecipientIndex::try_from(self.records.len()) else {
            error!("{}", DirectoryError::Exhausted);
            return Err(DirectoryError::Exhausted);
        };
        self.records.push(RecipientRecord::new(index, identity));
        if let Some(identity) = identity {
            self.bindings.insert(identity, index);
        }
        Ok(index)
    }

    /// Returns the record bound to `identity`, allocating one if unseen
    ///
    /// Allocation and binding happen in the same call, so the record is
    /// reachable by inbound acknowledgements as soon as it exists. A detached
    /// record is reattached.
    pub fn resolve(&mut self, identity: SocketAddr) -> Result<RecipientIndex, DirectoryError> {
        if let Some(index) = self.lookup(identity) {
            if let Some(record) = self.records.get_mut(index as usize) {
                if !record.attached {
                    record.reattach();
                    info!(
                        "Recipient {} reattached from {} ({} events pending)",
                        index,
                        identity,
                        record.pending_len()
                    );
                }
            }
            return Ok(index);
        }

        let index = self.allocate(Some(identity))?;
        info!("Recipient {} registered for {}", index, identity);
        Ok(index)
    }

    pub fn lookup(&self, identity: SocketAddr) -> Option<RecipientIndex> {
        self.bindings.get(&identity).copied()
    }

    /// Reserves a record without a live connection
    pub fn allocate_unbound(&mut self) -> Result<RecipientIndex, DirectoryError> {
        let index = self.allocate(None)?;
        info!("Recipient {} pre-allocated without identity", index);
        Ok(index)
    }

    /// Binds a live identity to a pre-allocated record
    pub fn bind(
        &mut self,
        index: RecipientIndex,
        identity: SocketAddr,
    ) -> Result<(), DirectoryError> {
        if let Some(existing) = self.lookup(identity) {
            return Err(DirectoryError::IdentityInUse {
                identity,
                recipient: existing,
            });
        }

        let record = self
            .records
            .get_mut(index as usize)
            .ok_or(DirectoryError::UnknownRecipient(index))?;

        if record.retired {
            return Err(DirectoryError::Retired(index));
        }
        if let Some(bound) = record.identity {
            return Err(DirectoryError::AlreadyBound {
                recipient: index,
                identity: bound,
            });
        }

        record.identity = Some(identity);
        record.reattach();
        self.bindings.insert(identity, index);
        info!("Recipient {} bound to {}", index, identity);
        Ok(())
    }

    /// Marks the record bound to `identity` as disconnected
    ///
    /// The binding, queue and acknowledgement history are kept. Returns the
    /// index only if the record was attached.
    pub fn detach(&mut self, identity: SocketAddr) -> Option<RecipientIndex> {
        let index = self.lookup(identity)?;
        let record = self.records.get_mut(index as usize)?;
        if !record.attached {
            return None;
        }

        record.detach();
        info!(
            "Recipient {} detached from {} ({} events kept)",
            index,
            identity,
            record.pending_len()
        );
        Some(index)
    }

    /// Retires detached records not heard from within `after`
    ///
    /// Their bindings are removed and their queues dropped. The slots stay
    /// allocated so no index is ever handed out again.
    pub fn archive(&mut self, after: Duration) -> Vec<RecipientIndex> {
        let departed: Vec<(SocketAddr, RecipientIndex)> = self
            .bindings
            .iter()
            .filter(|(_, index)| {
                self.records
                    .get(**index as usize)
                    .is_some_and(|record| !record.attached && record.is_timed_out(after))
            })
            .map(|(identity, index)| (*identity, *index))
            .collect();

        let mut archived = Vec::with_capacity(departed.len());
        for (identity, index) in departed {
            self.bindings.remove(&identity);
            if let Some(record) = self.records.get_mut(index as usize) {
                let dropped = record.retire();
                info!(
                    "Recipient {} at {} archived ({} pending events dropped)",
                    index, identity, dropped
                );
                archived.push(index);
            }
        }
        archived
    }

    pub fn get(&self, index: RecipientIndex) -> Option<&RecipientRecord> {
        self.records.get(index as usize)
    }

    pub fn get_mut(&mut self, index: RecipientIndex) -> Option<&mut RecipientRecord> {
        self.records.get_mut(index as usize)
    }

    pub fn records(&self) -> impl Iterator<Item = &RecipientRecord> {
        self.records.iter()
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = &mut RecipientRecord> {
        self.records.iter_mut()
    }

    /// Connected identities that have not been heard from within `timeout`
    pub fn timed_out(&self, timeout: Duration) -> Vec<SocketAddr> {
        self.bindings
            .iter()
            .filter(|(_, index)| {
                self.records
                    .get(**index as usize)
                    .is_some_and(|record| record.attached && record.is_timed_out(timeout))
            })
            .map(|(identity, _)| *identity)
            .collect()
    }

    /// Total number of records ever allocated
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records whose identity is currently connected
    pub fn live_count(&self) -> usize {
        self.records.iter().filter(|record| record.attached).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_directory_creation() {
        let directory = RecipientDirectory::new();
        assert!(directory.is_empty());
        assert_eq!(directory.live_count(), 0);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut directory = RecipientDirectory::new();

        let first = directory.resolve(test_addr()).unwrap();
        let again = directory.resolve(test_addr()).unwrap();

        assert_eq!(first, 0);
        assert_eq!(again, 0);
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.get(0).unwrap().identity(), Some(test_addr()));
    }

    #[test]
    fn test_resolve_multiple_identities() {
        let mut directory = RecipientDirectory::new();

        let a = directory.resolve(test_addr()).unwrap();
        let b = directory.resolve(test_addr2()).unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(directory.lookup(test_addr2()), Some(1));
        assert_eq!(directory.live_count(), 2);
    }

    #[test]
    fn test_lookup_does_not_allocate() {
        let directory = RecipientDirectory::new();
        assert_eq!(directory.lookup(test_addr()), None);
        assert!(directory.is_empty());
    }

    #[test]
    fn test_bind_unbound_slot() {
        let mut directory = RecipientDirectory::new();
        let index = directory.allocate_unbound().unwrap();

        assert_eq!(directory.get(index).unwrap().identity(), None);
        assert_eq!(directory.live_count(), 0);
        assert!(directory.bind(index, test_addr()).is_ok());
        assert_eq!(directory.resolve(test_addr()).unwrap(), index);
        assert_eq!(directory.live_count(), 1);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_bind_rejects_conflicts() {
        let mut directory = RecipientDirectory::new();
        let bound = directory.resolve(test_addr()).unwrap();
        let spare = directory.allocate_unbound().unwrap();

        assert_eq!(
            directory.bind(spare, test_addr()),
            Err(DirectoryError::IdentityInUse {
                identity: test_addr(),
                recipient: bound,
            })
        );
        assert_eq!(
            directory.bind(bound, test_addr2()),
            Err(DirectoryError::AlreadyBound {
                recipient: bound,
                identity: test_addr(),
            })
        );
        assert_eq!(
            directory.bind(99, test_addr2()),
            Err(DirectoryError::UnknownRecipient(99))
        );
    }

    #[test]
    fn test_detach_then_resolve_finds_same_record() {
        let mut directory = RecipientDirectory::new();
        let first = directory.resolve(test_addr()).unwrap();

        assert_eq!(directory.detach(test_addr()), Some(first));
        assert_eq!(directory.detach(test_addr()), None);
        assert!(!directory.get(first).unwrap().is_attached());
        assert!(!directory.get(first).unwrap().is_retired());
        assert_eq!(directory.live_count(), 0);
        assert_eq!(directory.lookup(test_addr()), Some(first));

        assert_eq!(directory.resolve(test_addr()).unwrap(), first);
        assert!(directory.get(first).unwrap().is_attached());
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_detach_unknown_identity() {
        let mut directory = RecipientDirectory::new();
        assert_eq!(directory.detach(test_addr()), None);
    }

    #[test]
    fn test_archive_retires_only_departed_records() {
        let mut directory = RecipientDirectory::new();
        let departed = directory.resolve(test_addr()).unwrap();
        let connected = directory.resolve(test_addr2()).unwrap();
        directory.detach(test_addr());
        for index in [departed, connected] {
            directory.get_mut(index).unwrap().last_seen = Instant::now() - Duration::from_secs(60);
        }

        assert_eq!(directory.archive(Duration::from_secs(30)), vec![departed]);

        assert!(directory.get(departed).unwrap().is_retired());
        assert!(!directory.get(connected).unwrap().is_retired());
        assert_eq!(directory.lookup(test_addr()), None);
        assert_eq!(
            directory.bind(departed, test_addr()),
            Err(DirectoryError::Retired(departed))
        );

        // An archived identity starts over under a fresh index
        assert_eq!(directory.resolve(test_addr()).unwrap(), 2);
    }

    #[test]
    fn test_archive_waits_for_grace_period() {
        let mut directory = RecipientDirectory::new();
        directory.resolve(test_addr()).unwrap();
        directory.detach(test_addr());

        assert!(directory.archive(Duration::from_secs(30)).is_empty());
        assert_eq!(directory.lookup(test_addr()), Some(0));
    }

    #[test]
    fn test_timed_out_identities() {
        let mut directory = RecipientDirectory::new();
        let stale = directory.resolve(test_addr()).unwrap();
        directory.resolve(test_addr2()).unwrap();

        directory.get_mut(stale).unwrap().last_seen = Instant::now() - Duration::from_secs(10);

        assert_eq!(directory.timed_out(Duration::from_secs(5)), vec![test_addr()]);

        directory.detach(test_addr());
        assert!(directory.timed_out(Duration::from_secs(5)).is_empty());
    }
}
