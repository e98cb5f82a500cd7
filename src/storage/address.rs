//! # Address Spaces
//!
//! Three kinds of on-disk addresses are stored as raw little-endian `u32`s
//! inside nodes, records and blocks. Each gets its own newtype so a node
//! address can never be passed where a record number is expected.
//!
//! | Type        | Unit                          | 0 means             |
//! |-------------|-------------------------------|---------------------|
//! | `NodeAddr`  | node index in a B-tree file   | no child / no node  |
//! | `RecordNo`  | slot index in a record file   | no record           |
//! | `BlockAddr` | block index in a VLR file     | end of chain        |
//!
//! The byte offset of an address is always `address * unit size`.

use std::fmt;

macro_rules! address_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(u32);

        impl $name {
            pub const NONE: Self = Self(0);

            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn get(self) -> u32 {
                self.0
            }

            #[inline]
            pub const fn is_none(self) -> bool {
                self.0 == 0
            }

            #[inline]
            pub fn offset(self, unit: usize) -> u64 {
                self.0 as u64 * unit as u64
            }

            /// Returns `None` for the zero address.
            #[inline]
            pub fn non_zero(self) -> Option<Self> {
                if self.0 == 0 {
                    None
                } else {
                    Some(self)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

address_type! {
    /// Address of a node in a B-tree index file. Node 0 holds the header and
    /// node 1 is always the root.
    NodeAddr
}

address_type! {
    /// Number of a slot in a fixed record file, also used as the opaque
    /// reference stored next to keys.
    RecordNo
}

address_type! {
    /// Address of a block in a variable-length record file. A record is
    /// identified by the address of its first block.
    BlockAddr
}

impl NodeAddr {
    pub const ROOT: Self = Self(1);
}

impl From<BlockAddr> for RecordNo {
    fn from(addr: BlockAddr) -> Self {
        RecordNo(addr.0)
    }
}

impl From<RecordNo> for BlockAddr {
    fn from(recno: RecordNo) -> Self {
        BlockAddr(recno.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_scales_by_unit() {
        assert_eq!(NodeAddr::new(3).offset(512), 1536);
        assert_eq!(RecordNo::new(0).offset(17), 0);
    }

    #[test]
    fn zero_is_none() {
        assert!(BlockAddr::NONE.is_none());
        assert_eq!(BlockAddr::new(0).non_zero(), None);
        assert_eq!(BlockAddr::new(4).non_zero(), Some(BlockAddr::new(4)));
    }

    #[test]
    fn root_is_node_one() {
        assert_eq!(NodeAddr::ROOT.get(), 1);
    }
}
