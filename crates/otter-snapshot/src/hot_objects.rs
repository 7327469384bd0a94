//! Hot-object cache
//!
//! A fixed ring of the last eight objects created or backreferenced. Both
//! directions update it at the same points, so a slot number is enough to
//! name a recently seen object.

use otter_snapshot_format::bytecode::HOT_OBJECT_COUNT;

use crate::heap::ObjectId;

const SIZE: usize = HOT_OBJECT_COUNT as usize;
const MASK: usize = SIZE - 1;

/// Ring buffer of recently seen objects
#[derive(Debug, Default)]
pub struct HotObjects {
    entries: [Option<ObjectId>; SIZE],
    index: usize,
}

impl HotObjects {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object at the cursor and advance it
    #[inline]
    pub fn add(&mut self, object: ObjectId) {
        self.entries[self.index] = Some(object);
        self.index = (self.index + 1) & MASK;
    }

    /// Object stored in `slot`, if populated
    #[inline]
    pub fn get(&self, slot: u8) -> Option<ObjectId> {
        self.entries.get(slot as usize).copied().flatten()
    }

    /// Slot holding `object`
    pub fn find(&self, object: ObjectId) -> Option<u8> {
        self.entries
            .iter()
            .position(|entry| *entry == Some(object))
            .map(|slot| slot as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache() {
        let hot = HotObjects::new();
        assert_eq!(hot.get(0), None);
        assert_eq!(hot.find(ObjectId(1)), None);
    }

    #[test]
    fn test_add_and_find() {
        let mut hot = HotObjects::new();
        hot.add(ObjectId(10));
        hot.add(ObjectId(11));
        assert_eq!(hot.find(ObjectId(11)), Some(1));
        assert_eq!(hot.get(0), Some(ObjectId(10)));
    }

    #[test]
    fn test_wraps_after_eight() {
        let mut hot = HotObjects::new();
        for i in 0..9 {
            hot.add(ObjectId(i));
        }
        assert_eq!(hot.get(0), Some(ObjectId(8)));
        assert_eq!(hot.find(ObjectId(0)), None);
        assert_eq!(hot.find(ObjectId(1)), Some(1));
    }

    #[test]
    fn test_out_of_range_slot() {
        let mut hot = HotObjects::new();
        hot.add(ObjectId(3));
        assert_eq!(hot.get(8), None);
        assert_eq!(hot.get(200), None);
    }
}
