//! Root lists and root iteration
//!
//! Roots are grouped into tagged lists. Iteration visits every slot of every
//! list in order and checkpoints after each list, so both directions agree on
//! where one list ends and the next begins.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::heap::{ObjectId, Slot};

/// Root list kind, reported at each checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncTag {
    /// Immortal immutable roots
    ReadOnlyRoots,
    /// Mutable strong roots
    StrongRoots,
    /// Builtin code objects
    Builtins,
    /// Handle scope contents
    HandleScope,
    /// Global handles
    GlobalHandles,
    /// Eternal handles
    EternalHandles,
    /// Embedder extensions
    Extensions,
}

/// One tagged list of root slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootList {
    /// Checkpoint tag of this list
    pub tag: SyncTag,
    /// Root slots
    pub slots: Vec<Slot>,
}

/// Index of a root across all lists, in iteration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootIndex(pub u32);

/// All root lists, in iteration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roots {
    lists: Vec<RootList>,
}

impl Roots {
    /// Create an empty root set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a list
    pub fn push_list(&mut self, tag: SyncTag, slots: Vec<Slot>) {
        self.lists.push(RootList { tag, slots });
    }

    /// Same lists and lengths, every slot cleared to `Raw(0)`.
    ///
    /// This is the shape a loader hands to the deserializer.
    pub fn empty_like(&self) -> Self {
        Self {
            lists: self
                .lists
                .iter()
                .map(|list| RootList {
                    tag: list.tag,
                    slots: vec![Slot::Raw(0); list.slots.len()],
                })
                .collect(),
        }
    }

    /// All lists
    pub fn lists(&self) -> &[RootList] {
        &self.lists
    }

    /// Root slot at a flat index
    pub fn slot(&self, index: RootIndex) -> Option<Slot> {
        self.lists
            .iter()
            .flat_map(|list| list.slots.iter())
            .nth(index.0 as usize)
            .copied()
    }

    /// Object held by a strong root
    pub fn object(&self, index: RootIndex) -> Option<ObjectId> {
        match self.slot(index)? {
            Slot::Strong(object) => Some(object),
            _ => None,
        }
    }

    /// Total number of root slots
    pub fn len(&self) -> usize {
        self.lists.iter().map(|list| list.slots.len()).sum()
    }

    /// Whether there are no root slots
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Visitor driven by [`iterate`]
pub trait RootVisitor {
    /// Visit one root slot
    fn visit_root(&mut self, tag: SyncTag, index: RootIndex, slot: &mut Slot) -> Result<()>;

    /// End of the list tagged `tag`
    fn synchronize(&mut self, tag: SyncTag) -> Result<()>;
}

/// Visit every root slot in order, checkpointing after each list
pub fn iterate<V: RootVisitor + ?Sized>(roots: &mut Roots, visitor: &mut V) -> Result<()> {
    let mut index = 0u32;
    for list in &mut roots.lists {
        for slot in &mut list.slots {
            visitor.visit_root(list.tag, RootIndex(index), slot)?;
            index += 1;
        }
        visitor.synchronize(list.tag)?;
    }
    Ok(())
}
