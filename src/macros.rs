//! # Internal Macros
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for the little-endian fields of the
//! on-disk structs (block footer, file header, tree header, node header).
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::{U32, U64};
//!
//! #[repr(C)]
//! struct Footer {
//!     snapshot: U32,
//!     right_sibling: U64,
//! }
//!
//! impl Footer {
//!     zerocopy_accessors! {
//!         snapshot: u32,
//!         right_sibling: u64,
//!     }
//! }
//!
//! // Generates:
//! // pub fn snapshot(&self) -> u32 { self.snapshot.get() }
//! // pub fn set_snapshot(&mut self, val: u32) { self.snapshot = U32::new(val); }
//! // pub fn right_sibling(&self) -> u64 { self.right_sibling.get() }
//! // pub fn set_right_sibling(&mut self, val: u64) { self.right_sibling = U64::new(val); }
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
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::little_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}
