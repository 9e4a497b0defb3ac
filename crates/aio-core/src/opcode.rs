//! I/O opcode.

/// A requested operation: positional read or positional write.
///
/// Matches `aio_opcode { AIO_PREAD, AIO_PWRITE }` in the original
/// `aio0aio.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Read,
    Write,
}
