//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields that use
//! little-endian wrapper types. Plain integer fields map to `u16`/`u32`;
//! a field declared with an address type (`NodeAddr`, `RecordNo`,
//! `BlockAddr`) is stored as `U32` and exposed through the newtype.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U16, U32};
//!
//! #[repr(C)]
//! struct Header {
//!     order: U16,
//!     first_deleted: U32,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         order: u16,
//!         first_deleted: NodeAddr,
//!     }
//! }
//!
//! // Generates:
//! // pub fn order(&self) -> u16 { self.order.get() }
//! // pub fn set_order(&mut self, val: u16) { self.order = U16::new(val); }
//! // pub fn first_deleted(&self) -> NodeAddr { NodeAddr::new(self.first_deleted.get()) }
//! // pub fn set_first_deleted(&mut self, val: NodeAddr) { ... }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::little_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, $addr:ident) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> $addr {
                $addr::new(self.$field.get())
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: $addr) {
                self.$field = ::zerocopy::little_endian::U32::new(val.get());
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
