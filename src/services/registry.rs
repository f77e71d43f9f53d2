//! Scan registry - the duplicate guard
//!
//! Authoritative record of "this order was already registered, at which
//! station, when". The write lock is held across check-and-append so that
//! for any order ID at most one registration ever commits, regardless of
//! how many stations race on it.

use crate::domain::error::{DispatchError, Result};
use crate::domain::types::{OrderId, PackageRegistration};
use crate::io::registration_log::RegistrationLog;
use chrono::NaiveDate;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

#[derive(Default)]
struct RegistryInner {
    /// Order ID -> index into `entries`
    by_order: FxHashMap<OrderId, usize>,
    /// Commit order
    entries: Vec<PackageRegistration>,
}

impl RegistryInner {
    fn push(&mut self, registration: PackageRegistration) {
        self.by_order.insert(registration.order_id.clone(), self.entries.len());
        self.entries.push(registration);
    }
}

pub struct ScanRegistry {
    inner: RwLock<RegistryInner>,
    log: Option<RegistrationLog>,
}

impl ScanRegistry {
    /// Volatile registry (tests, embedding)
    pub fn in_memory() -> Self {
        Self { inner: RwLock::new(RegistryInner::default()), log: None }
    }

    /// Registry backed by an append-only log, rebuilt by replaying it
    pub fn open(log: RegistrationLog) -> std::io::Result<Self> {
        let mut inner = RegistryInner::default();
        let mut replayed_duplicates = 0usize;

        for registration in log.load()? {
            if inner.by_order.contains_key(&registration.order_id) {
                // First occurrence wins
                replayed_duplicates += 1;
                continue;
            }
            inner.push(registration);
        }

        if replayed_duplicates > 0 {
            warn!(count = %replayed_duplicates, "registration_log_duplicates_ignored");
        }
        info!(registrations = %inner.entries.len(), "registry_replayed");

        Ok(Self { inner: RwLock::new(inner), log: Some(log) })
    }

    /// Existing registration for this order, if any
    pub fn check_duplicate(&self, order_id: &OrderId) -> Option<PackageRegistration> {
        let inner = self.inner.read();
        inner.by_order.get(order_id).map(|&idx| inner.entries[idx].clone())
    }

    /// Commit a registration if and only if its order ID is new
    ///
    /// The record is durable in the log before it becomes visible. A failed
    /// log write leaves the registry unchanged.
    pub fn insert(&self, registration: PackageRegistration) -> Result<PackageRegistration> {
        let mut inner = self.inner.write();

        if let Some(&idx) = inner.by_order.get(&registration.order_id) {
            return Err(DispatchError::duplicate(inner.entries[idx].clone()));
        }

        if let Some(ref log) = self.log {
            log.append(&registration)?;
        }

        inner.push(registration.clone());
        Ok(registration)
    }

    /// Registrations attributed to a business date, in commit order
    pub fn for_date(&self, date: NaiveDate) -> Vec<PackageRegistration> {
        self.inner.read().entries.iter().filter(|r| r.business_date == date).cloned().collect()
    }

    /// Every registration, in commit order
    pub fn all(&self) -> Vec<PackageRegistration> {
        self.inner.read().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{SellerType, StationId};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn registration(order: &str, station: StationId) -> PackageRegistration {
        PackageRegistration::new(
            OrderId::parse(order).unwrap(),
            station,
            Some(SellerType::Shopee),
            Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
            date(),
            None,
        )
    }

    #[test]
    fn test_second_insert_is_duplicate() {
        let registry = ScanRegistry::in_memory();
        let order = OrderId::parse("BR123456789012A").unwrap();

        assert!(registry.check_duplicate(&order).is_none());
        registry.insert(registration("BR123456789012A", StationId::M1)).unwrap();

        let err = registry.insert(registration("BR123456789012A", StationId::M2)).unwrap_err();
        let existing = err.existing_registration().unwrap();
        assert_eq!(existing.station_id, StationId::M1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.check_duplicate(&order).unwrap().station_id, StationId::M1);
    }

    #[test]
    fn test_concurrent_inserts_commit_once() {
        let registry = Arc::new(ScanRegistry::in_memory());
        let handles: Vec<_> = StationId::ALL
            .iter()
            .map(|&station| {
                let registry = registry.clone();
                thread::spawn(move || {
                    registry.insert(registration("AMZB123456789ab", station)).is_ok()
                })
            })
            .collect();

        let committed = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(committed, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_replay_from_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registrations.jsonl");

        {
            let registry = ScanRegistry::open(RegistrationLog::new(&path)).unwrap();
            registry.insert(registration("12345678901", StationId::M1)).unwrap();
            registry.insert(registration("12345678902", StationId::M4)).unwrap();
        }

        let registry = ScanRegistry::open(RegistrationLog::new(&path)).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.for_date(date()).len(), 2);
        let err = registry.insert(registration("12345678902", StationId::M2)).unwrap_err();
        assert_eq!(err.code(), "duplicateScan");
    }

    #[test]
    fn test_replay_keeps_first_occurrence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registrations.jsonl");
        let log = RegistrationLog::new(&path);
        log.append(&registration("12345678901", StationId::M1)).unwrap();
        log.append(&registration("12345678901", StationId::M3)).unwrap();

        let registry = ScanRegistry::open(RegistrationLog::new(&path)).unwrap();
        assert_eq!(registry.len(), 1);
        let order = OrderId::parse("12345678901").unwrap();
        assert_eq!(registry.check_duplicate(&order).unwrap().station_id, StationId::M1);
    }

    #[test]
    fn test_commit_after_torn_tail_survives_restart() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let path = dir.path().join("registrations.jsonl");
        std::fs::write(&path, b"{\"id\":\"x\",\"orderId\":\"1234").unwrap();

        {
            let registry = ScanRegistry::open(RegistrationLog::new(&path)).unwrap();
            assert!(registry.is_empty());
            registry.insert(registration("12345678902", StationId::M1)).unwrap();
        }

        let registry = ScanRegistry::open(RegistrationLog::new(&path)).unwrap();
        assert_eq!(registry.len(), 1);
        let err = registry.insert(registration("12345678902", StationId::M3)).unwrap_err();
        assert_eq!(err.existing_registration().unwrap().station_id, StationId::M1);

        // A later torn write still leaves the committed record intact
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"orderId\"").unwrap();
        drop(file);
        assert_eq!(ScanRegistry::open(RegistrationLog::new(&path)).unwrap().len(), 1);
    }
}
