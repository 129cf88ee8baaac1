//! Low-level primitives underneath the storage engine.

/// Little-endian field encoding for the fixed on-disk records.
pub mod bytes;

/// Positioned file I/O and an in-memory backend with crash injection.
pub mod io;
