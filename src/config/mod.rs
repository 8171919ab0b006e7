//! # snaptree Configuration Module
//!
//! Compile-time constants live in [`constants`]. Runtime options (block size,
//! access mode, initial file size) are chosen through
//! [`ContainerBuilder`](crate::filesystem::ContainerBuilder).

pub mod constants;
pub use constants::*;
