//! Wire protocol for the busbar command plane.
//!
//! Every transport (BLE, TCP, console, script) delivers the same canonical
//! unit: a command line plus an optional out-of-band binary payload. This
//! crate owns the two wire forms of that unit and nothing else:
//!
//! - **Packetised**: a 36-byte binary header ([`PacketHeader`], little
//!   endian) followed by the UTF-8 command, zero padding and the 4-aligned
//!   OOB payload. Carries transaction ids, broadcast groups and an optional
//!   MD5-32 integrity checksum.
//! - **Raw**: a bare command line terminated by NUL/newline, with the OOB
//!   payload starting at the next 4-byte boundary after the NUL.
//!
//! [`decapsulate`] classifies a byte buffer into either form and extracts the
//! command tuple; [`encapsulate`] produces the matching reply bytes. The
//! [`Reassembler`] turns a fragmented transport stream back into whole
//! buffers before decapsulation.
//!
//! No I/O happens here; timestamps are injected by the caller so every state
//! machine in this crate is deterministic under test.

mod errors;
mod frame;
mod header;
mod reassembly;

pub use errors::FrameError;
pub use frame::{Decapsulated, decapsulate, declared_length, encapsulate, looks_like_packet, md5_32};
pub use header::{PacketFlags, PacketHeader};
pub use reassembly::{DropReason, Reassembler, ReassemblyConfig, ReassemblyOutcome, ReassemblyStats};
