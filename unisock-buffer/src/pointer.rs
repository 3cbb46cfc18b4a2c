//! Packet records into the arena.

use std::ops::Range;

/// A byte range inside the current arena generation.
///
/// Pointers are only meaningful for the [`PacketBuffer`](crate::PacketBuffer)
/// that created them, and only until that buffer truncates its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketPointer {
    offset: usize,
    len: usize,
}

impl PacketPointer {
    /// Create a new pointer.
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// Start of the packet in the arena.
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the packet in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length packets (e.g. an empty datagram).
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte of the packet.
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    /// The packet's byte range, for slicing the arena.
    pub const fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}
