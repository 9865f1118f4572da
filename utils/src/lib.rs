//! Shared infrastructure utilities for Warden.
//!
//! Cross-cutting helpers that several Warden crates need but that don't
//! belong in the domain-pure `warden-types` crate:
//!
//! - **`atomic_write`**: Crash-safe document persistence (temp + rename)
//! - **`digest`**: SHA-256 content hashes as lowercase hex
//! - **`time`**: Epoch-millisecond and RFC 3339 timestamps

pub mod atomic_write;
pub mod digest;
pub mod time;

pub use atomic_write::{
    AtomicWriteOptions, FileSyncPolicy, atomic_write, atomic_write_with_options,
    recover_bak_file, write_json_pretty,
};
pub use digest::{sha256_hex, short_digest};
pub use time::{epoch_ms, rfc3339_now, system_time_ms};
