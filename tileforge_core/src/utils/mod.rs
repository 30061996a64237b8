//! Small shared utilities: compression codecs, the retry policy, the
//! lock-file protocol and content hashing.

mod compression;
mod lockfile;
mod md5;
mod retry;
mod time;

pub use compression::*;
pub use lockfile::{FileLock, delete_file_locked, write_file_locked};
pub use md5::md5_hex;
pub use retry::retry;
pub use time::now_ms;
