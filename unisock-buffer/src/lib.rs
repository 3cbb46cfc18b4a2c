//! Receive-side packet storage for unisock clients.
//!
//! This crate provides the zero-allocation hand-off between the network I/O
//! thread, which receives bytes whenever the operating system delivers them,
//! and a consumer that drains them at its own cadence:
//!
//! - [`PacketPointer`] - an `(offset, len)` record into the arena
//! - [`PacketBuffer`] - an append-only byte arena plus a FIFO of pointers
//!
//! # Examples
//!
//! ```
//! use unisock_buffer::PacketBuffer;
//!
//! let mut packets = PacketBuffer::with_capacity(8192);
//! packets.append(b"hello");
//! packets.append(b"!");
//!
//! // The consumer owns one reusable buffer sized to the receive buffer.
//! let mut scratch = [0u8; 8192];
//! let len = packets.pop_into(&mut scratch).unwrap();
//! assert_eq!(&scratch[..len], b"hello");
//! ```

pub mod buffer;
pub mod pointer;

pub use buffer::PacketBuffer;
pub use pointer::PacketPointer;
