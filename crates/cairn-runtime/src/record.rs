//! Reservation records
//!
//! TigerStyle: At most one record per reference, owned by the actor and
//! mutated only from its loop.

use std::collections::HashMap;
use std::sync::Arc;

use cairn_core::error::{Error, Result};
use cairn_core::message::ReserveParams;
use cairn_core::reference::Reference;
use cairn_core::unit::Unit;

/// Worker-side state of one accepted reservation
#[derive(Debug)]
pub struct ReservationRecord<C> {
    pub reference: Reference,
    pub unit: Arc<Unit>,
    pub params: ReserveParams,
    /// Set when `on_reserve` returned context
    pub context: Option<Arc<C>>,
    pub created_at_ms: u64,
}

impl<C> ReservationRecord<C> {
    pub fn new(reference: Reference, unit: Arc<Unit>, params: ReserveParams, created_at_ms: u64) -> Self {
        Self {
            reference,
            unit,
            params,
            context: None,
            created_at_ms,
        }
    }
}

/// Records keyed by reservation reference
#[derive(Debug)]
pub struct ReservationTable<C> {
    records: HashMap<Reference, ReservationRecord<C>>,
}

impl<C> Default for ReservationTable<C> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<C> ReservationTable<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; a second record for the same reference is a
    /// protocol violation
    pub fn insert(&mut self, record: ReservationRecord<C>) -> Result<()> {
        if self.records.contains_key(&record.reference) {
            return Err(Error::protocol_violation(format!(
                "duplicate reservation {}",
                record.reference
            )));
        }
        self.records.insert(record.reference.clone(), record);
        Ok(())
    }

    pub fn get(&self, reference: &Reference) -> Option<&ReservationRecord<C>> {
        self.records.get(reference)
    }

    pub fn get_mut(&mut self, reference: &Reference) -> Option<&mut ReservationRecord<C>> {
        self.records.get_mut(reference)
    }

    pub fn remove(&mut self, reference: &Reference) -> Option<ReservationRecord<C>> {
        self.records.remove(reference)
    }

    pub fn contains(&self, reference: &Reference) -> bool {
        self.records.contains_key(reference)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::unit::{UnitId, UnitKind};

    fn record(reference: &str) -> ReservationRecord<()> {
        let unit = Unit::builder(UnitId::new("1").unwrap(), "noop", UnitKind::Function).build();
        ReservationRecord::new(
            Reference::new(reference).unwrap(),
            Arc::new(unit),
            ReserveParams::default(),
            0,
        )
    }

    #[test]
    fn test_at_most_one_record_per_reference() {
        let mut table = ReservationTable::new();
        table.insert(record("r-1")).unwrap();
        let err = table.insert(record("r-1")).unwrap_err();
        assert!(err.is_protocol_violation());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_clears_record() {
        let mut table = ReservationTable::new();
        let reference = Reference::new("r-2").unwrap();
        table.insert(record("r-2")).unwrap();
        assert!(table.contains(&reference));
        assert!(table.remove(&reference).is_some());
        assert!(table.get(&reference).is_none());
        assert!(table.is_empty());
    }
}
