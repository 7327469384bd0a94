//! Allocation spaces and alignment kinds

use serde::{Deserialize, Serialize};

use crate::error::{FormatError, Result};

/// Number of allocation spaces addressable by region-merged bytecodes
pub const NUMBER_OF_SPACES: usize = 6;

/// Sentinel id grouping "any other old space".
///
/// Only selects an addressing counter. It has no bytecode encoding: the
/// region-merged slots it would occupy (0x06, 0x0e) are reserved.
pub const ANY_OLD_SPACE: u8 = NUMBER_OF_SPACES as u8;

/// Allocation space (region) of a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Space {
    /// Immutable objects shared between isolates
    ReadOnly = 0,
    /// Young generation
    New = 1,
    /// Old generation
    Old = 2,
    /// Executable code objects
    Code = 3,
    /// Maps (object layouts)
    Map = 4,
    /// Objects too large for regular pages
    LargeObject = 5,
}

impl Space {
    /// All spaces in id order
    pub const ALL: [Space; NUMBER_OF_SPACES] = [
        Space::ReadOnly,
        Space::New,
        Space::Old,
        Space::Code,
        Space::Map,
        Space::LargeObject,
    ];

    /// Space id (low bits of region-merged bytecodes)
    #[inline]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Index into per-space tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Convert from a space id, usable in const contexts
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::ReadOnly),
            1 => Some(Self::New),
            2 => Some(Self::Old),
            3 => Some(Self::Code),
            4 => Some(Self::Map),
            5 => Some(Self::LargeObject),
            _ => None,
        }
    }

    /// Name of this space
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::New => "new",
            Self::Old => "old",
            Self::Code => "code",
            Self::Map => "map",
            Self::LargeObject => "large_object",
        }
    }
}

impl TryFrom<u8> for Space {
    type Error = FormatError;

    fn try_from(id: u8) -> Result<Self> {
        Self::from_id(id).ok_or(FormatError::InvalidSpace(id))
    }
}

/// Allocation alignment requested for a new object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Alignment {
    /// Tagged word alignment, needs no prefix
    #[default]
    Tagged = 0,
    /// Double-word aligned start
    DoubleAligned = 1,
    /// Double-word aligned payload after the map word
    DoubleUnaligned = 2,
    /// Code object alignment
    CodeAligned = 3,
}

impl Alignment {
    /// Alignments that are carried by an alignment prefix
    pub const PREFIXED: [Alignment; 3] = [
        Alignment::DoubleAligned,
        Alignment::DoubleUnaligned,
        Alignment::CodeAligned,
    ];

    /// Convert from the prefix offset (1..=3)
    pub const fn from_prefix(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::DoubleAligned),
            2 => Some(Self::DoubleUnaligned),
            3 => Some(Self::CodeAligned),
            _ => None,
        }
    }

    /// Whether this alignment must be announced with a prefix
    #[inline]
    pub const fn needs_prefix(self) -> bool {
        !matches!(self, Self::Tagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_ids() {
        for (i, space) in Space::ALL.iter().enumerate() {
            assert_eq!(space.index(), i);
            assert_eq!(Space::try_from(space.id()), Ok(*space));
        }
    }

    #[test]
    fn test_any_old_space_is_not_a_space() {
        assert_eq!(
            Space::try_from(ANY_OLD_SPACE),
            Err(FormatError::InvalidSpace(ANY_OLD_SPACE))
        );
    }

    #[test]
    fn test_alignment_prefix_values() {
        assert!(!Alignment::Tagged.needs_prefix());
        for alignment in Alignment::PREFIXED {
            assert_eq!(Alignment::from_prefix(alignment as u8), Some(alignment));
        }
        assert_eq!(Alignment::from_prefix(0), None);
    }
}
