//! Forward references
//!
//! An object is pending between its header and its allocation. A slot that
//! refers to a pending object is written as a numbered reservation, then
//! patched once the object exists. Reservation ids are sequential per
//! session and each is resolved exactly once.

use rustc_hash::FxHashMap;

use crate::error::{Result, SnapshotError};
use crate::heap::ObjectId;

/// Encoder side: objects whose header is written but which are not yet
/// allocated, with the reservations waiting on each
#[derive(Debug, Default)]
pub struct PendingObjects {
    pending: FxHashMap<ObjectId, Vec<u32>>,
    next_id: u32,
}

impl PendingObjects {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `object` as pending
    pub fn begin(&mut self, object: ObjectId) {
        self.pending.insert(object, Vec::new());
    }

    /// Whether `object` is pending
    #[inline]
    pub fn is_pending(&self, object: ObjectId) -> bool {
        self.pending.contains_key(&object)
    }

    /// Reserve a forward reference to a pending object
    pub fn register(&mut self, object: ObjectId) -> Option<u32> {
        let waiting = self.pending.get_mut(&object)?;
        let id = self.next_id;
        self.next_id += 1;
        waiting.push(id);
        Some(id)
    }

    /// `object` is allocated; returns the reservations to resolve
    pub fn complete(&mut self, object: ObjectId) -> Vec<u32> {
        self.pending.remove(&object).unwrap_or_default()
    }

    /// Reservations handed out so far
    #[inline]
    pub fn registered(&self) -> u32 {
        self.next_id
    }
}

/// Location waiting for a forward reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingLocation {
    /// Holder of the slot
    pub object: ObjectId,
    /// Slot index within the holder
    pub index: usize,
    /// Whether the reference is weak
    pub weak: bool,
}

/// Decoder side: open reservations
#[derive(Debug, Default)]
pub struct ForwardReferences {
    entries: Vec<Option<PendingLocation>>,
    open: usize,
}

impl ForwardReferences {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the next reservation
    pub fn register(&mut self, location: PendingLocation) -> u32 {
        let id = self.entries.len() as u32;
        self.entries.push(Some(location));
        self.open += 1;
        id
    }

    /// Close reservation `id`
    pub fn resolve(&mut self, id: u32) -> Result<PendingLocation> {
        let location = self
            .entries
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or(SnapshotError::DoubleOrMissingResolution(id))?;
        self.open -= 1;
        Ok(location)
    }

    /// Number of open reservations
    #[inline]
    pub fn open(&self) -> usize {
        self.open
    }

    /// Reservations registered so far
    #[inline]
    pub fn registered(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Fail on the first reservation still open
    pub fn finish(&self) -> Result<()> {
        match self.entries.iter().position(Option::is_some) {
            Some(id) => Err(SnapshotError::UnresolvedForwardReference(id as u32)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(index: usize) -> PendingLocation {
        PendingLocation {
            object: ObjectId(1),
            index,
            weak: false,
        }
    }

    #[test]
    fn test_pending_objects() {
        let mut pending = PendingObjects::new();
        assert_eq!(pending.register(ObjectId(3)), None);
        pending.begin(ObjectId(3));
        assert!(pending.is_pending(ObjectId(3)));
        assert_eq!(pending.register(ObjectId(3)), Some(0));
        assert_eq!(pending.register(ObjectId(3)), Some(1));
        assert_eq!(pending.complete(ObjectId(3)), vec![0, 1]);
        assert!(!pending.is_pending(ObjectId(3)));
        assert_eq!(pending.registered(), 2);
    }

    #[test]
    fn test_resolve_once() {
        let mut refs = ForwardReferences::new();
        let id = refs.register(location(2));
        assert_eq!(refs.open(), 1);
        assert_eq!(refs.resolve(id).unwrap(), location(2));
        assert!(matches!(
            refs.resolve(id),
            Err(SnapshotError::DoubleOrMissingResolution(0))
        ));
        assert_eq!(refs.open(), 0);
        refs.finish().unwrap();
    }

    #[test]
    fn test_resolve_unknown() {
        let mut refs = ForwardReferences::new();
        assert!(matches!(
            refs.resolve(7),
            Err(SnapshotError::DoubleOrMissingResolution(7))
        ));
    }

    #[test]
    fn test_finish_reports_first_open() {
        let mut refs = ForwardReferences::new();
        let first = refs.register(location(1));
        refs.register(location(2));
        refs.register(location(3));
        refs.resolve(first).unwrap();
        assert!(matches!(
            refs.finish(),
            Err(SnapshotError::UnresolvedForwardReference(1))
        ));
    }
}
