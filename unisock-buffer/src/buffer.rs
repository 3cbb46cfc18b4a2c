//! Append-only packet arena with a FIFO of pending records.
//!
//! # Buffer Management
//!
//! Received bytes are appended to a single [`BytesMut`] arena and a
//! [`PacketPointer`] describing them is queued. Dequeuing copies the oldest
//! packet into a caller-owned slice, so the drain path never allocates. When
//! the last pending packet has been dequeued the arena is truncated to zero
//! length while keeping its capacity, which bounds memory to the high-water
//! mark between two full drains.
//!
//! A buffer has exactly one writer (the receive loop) and one reader (the
//! consumer). It does no synchronization of its own.

use crate::pointer::PacketPointer;
use bytes::BytesMut;
use std::collections::VecDeque;

/// Initial number of pointer slots reserved by [`PacketBuffer::with_capacity`].
const DEFAULT_QUEUE_SLOTS: usize = 64;

/// Byte arena plus the ordered queue of packets not yet handed out.
///
/// # Examples
///
/// ```
/// use unisock_buffer::PacketBuffer;
///
/// let mut packets = PacketBuffer::new();
/// packets.append(&[0x41, 0x42]);
/// packets.append(&[0x43]);
///
/// let mut scratch = [0u8; 16];
/// assert_eq!(packets.pop_into(&mut scratch), Some(2));
/// assert_eq!(&scratch[..2], &[0x41, 0x42]);
/// assert_eq!(packets.pop_into(&mut scratch), Some(1));
/// assert_eq!(packets.pop_into(&mut scratch), None);
/// assert_eq!(packets.arena_len(), 0);
/// ```
#[derive(Debug, Default)]
pub struct PacketBuffer {
    arena: BytesMut,
    pending: VecDeque<PacketPointer>,
}

impl PacketBuffer {
    /// Create an empty buffer without reserving memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with `capacity` bytes of arena reserved.
    ///
    /// Clients pass their configured receive-buffer size here so the first
    /// packets never reallocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            arena: BytesMut::with_capacity(capacity),
            pending: VecDeque::with_capacity(DEFAULT_QUEUE_SLOTS),
        }
    }

    /// Append one packet and queue it.
    ///
    /// Zero-length packets are queued as well; they come back out of
    /// [`pop_into`](Self::pop_into) as `Some(0)`.
    pub fn append(&mut self, bytes: &[u8]) -> PacketPointer {
        let pointer = PacketPointer::new(self.arena.len(), bytes.len());
        self.arena.extend_from_slice(bytes);
        self.pending.push_back(pointer);
        pointer
    }

    /// True if at least one packet is waiting.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of packets waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if no packets are waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Length of the oldest waiting packet, if any.
    pub fn peek_len(&self) -> Option<usize> {
        self.pending.front().map(PacketPointer::len)
    }

    /// Bytes currently held by the arena.
    pub fn arena_len(&self) -> usize {
        self.arena.len()
    }

    /// Bytes the arena can hold before it has to grow.
    pub fn arena_capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Dequeue the oldest packet into `dest`.
    ///
    /// Returns the number of bytes written to the front of `dest`, or `None`
    /// if nothing is pending (in which case `dest` is untouched). The arena is
    /// truncated to zero length exactly when this call drains the last
    /// pending packet.
    ///
    /// # Panics
    ///
    /// Panics if `dest` is shorter than the packet. Consumers must size their
    /// reusable buffer to at least the receive-buffer size of the client that
    /// fills this queue; anything else is a programming error.
    pub fn pop_into(&mut self, dest: &mut [u8]) -> Option<usize> {
        let pointer = *self.pending.front()?;
        assert!(
            dest.len() >= pointer.len(),
            "destination holds {} bytes but the next packet is {} bytes",
            dest.len(),
            pointer.len()
        );
        self.pending.pop_front();

        dest[..pointer.len()].copy_from_slice(&self.arena[pointer.range()]);

        if self.pending.is_empty() {
            // All packets handed out, reclaim the arena
            self.arena.clear();
        }

        Some(pointer.len())
    }
}
