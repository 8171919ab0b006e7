//! Fixed-width keys and values stored in tree nodes.
//!
//! Every key and value type has a compile-time size and encodes itself
//! little-endian into a node slot. Ordering is the type's `Ord`, never the
//! byte order of the encoding.
//!
//! `primary()` projects a key onto the `u64` the tree header uses for its
//! first/last key bounds. For the historian key that is the timestamp.

use std::fmt::Debug;

pub trait TreeKey: Copy + Ord + Debug {
    const SIZE: usize;

    fn write_to(&self, buf: &mut [u8]);

    fn read_from(buf: &[u8]) -> Self;

    fn primary(&self) -> u64;
}

pub trait TreeValue: Copy + Debug {
    const SIZE: usize;

    fn write_to(&self, buf: &mut [u8]);

    fn read_from(buf: &[u8]) -> Self;
}

#[inline]
fn read_u64(buf: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(bytes)
}

#[inline]
fn read_u32(buf: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[..4]);
    u32::from_le_bytes(bytes)
}

impl TreeKey for u64 {
    const SIZE: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        read_u64(buf)
    }

    fn primary(&self) -> u64 {
        *self
    }
}

impl TreeValue for u64 {
    const SIZE: usize = 8;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        read_u64(buf)
    }
}

impl TreeKey for u32 {
    const SIZE: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        read_u32(buf)
    }

    fn primary(&self) -> u64 {
        *self as u64
    }
}

impl TreeValue for u32 {
    const SIZE: usize = 4;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        read_u32(buf)
    }
}

/// Key of one historian sample. Ordered by timestamp, then point id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HistorianKey {
    pub timestamp: u64,
    pub point_id: u64,
}

impl HistorianKey {
    pub fn new(timestamp: u64, point_id: u64) -> Self {
        Self {
            timestamp,
            point_id,
        }
    }
}

impl TreeKey for HistorianKey {
    const SIZE: usize = 16;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[8..16].copy_from_slice(&self.point_id.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            timestamp: read_u64(buf),
            point_id: read_u64(&buf[8..]),
        }
    }

    fn primary(&self) -> u64 {
        self.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistorianValue {
    pub value1: u64,
    pub value2: u64,
}

impl HistorianValue {
    pub fn new(value1: u64, value2: u64) -> Self {
        Self { value1, value2 }
    }
}

impl TreeValue for HistorianValue {
    const SIZE: usize = 16;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..8].copy_from_slice(&self.value1.to_le_bytes());
        buf[8..16].copy_from_slice(&self.value2.to_le_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        Self {
            value1: read_u64(buf),
            value2: read_u64(&buf[8..]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historian_key_orders_by_timestamp_then_point() {
        let a = HistorianKey::new(10, 99);
        let b = HistorianKey::new(11, 1);
        let c = HistorianKey::new(11, 2);

        assert!(a < b);
        assert!(b < c);
        assert_eq!(c.primary(), 11);
    }

    #[test]
    fn historian_key_encoding_is_little_endian() {
        let mut buf = [0u8; 16];

        HistorianKey::new(1, 0x0203).write_to(&mut buf);

        assert_eq!(buf[0], 1);
        assert_eq!(&buf[8..10], &[0x03, 0x02]);
        assert_eq!(HistorianKey::read_from(&buf), HistorianKey::new(1, 0x0203));
    }

    #[test]
    fn value_fits_its_declared_size() {
        let mut buf = [0xFFu8; 17];

        HistorianValue::new(5, 6).write_to(&mut buf);

        assert_eq!(buf[16], 0xFF);
        assert_eq!(HistorianValue::read_from(&buf), HistorianValue::new(5, 6));
    }
}
