//! General utilities.

use std::{
	fs, io,
	path::{Path, PathBuf},
};

/// Get the path to a local directory where the engine can save its log file.
/// Platform | Value | Example
/// -- | -- | --
/// Linux | $XDG_DATA_HOME or $HOME/.local/share/archive_engine | /home/alice/.local/share/archive_engine/
/// macOS | $HOME/Library/Application Support/archive_engine | /Users/Alice/Library/Application Support/archive_engine/
/// Windows | {FOLDERID_LocalAppData}\archive_engine | C:\Users\Alice\AppData\Local\archive_engine
pub fn engine_data_dir() -> io::Result<PathBuf> {
	let base_dirs = dirs::BaseDirs::new()
		.ok_or_else(|| io::Error::new(io::ErrorKind::Other, "No valid home directory path could be retrieved from the operating system"))?;
	let mut path = base_dirs.data_local_dir().to_path_buf();
	path.push("archive_engine");
	Ok(path)
}

/// Create an arbitrary directory on disk.
pub fn create_dir(path: &Path) -> io::Result<()> {
	if let Err(err) = fs::create_dir_all(path) {
		match err.kind() {
			io::ErrorKind::AlreadyExists => (),
			_ => return Err(err),
		}
	}
	Ok(())
}

/// Strip a `.FIELD` suffix off a PV name, returning the base name.
///
/// Only the first `.` matters: `"ROOM:TEMP.VAL"` and `"ROOM:TEMP.VAL.FOO"`
/// both have base name `"ROOM:TEMP"`.
pub fn base_name(pv_name: &str) -> &str {
	match pv_name.find('.') {
		Some(idx) => &pv_name[..idx],
		None => pv_name,
	}
}

/// FNV-1a, 64-bit. Deterministic across platforms and process restarts, which
/// is what stable command-thread assignment requires (see `assign_command_thread`).
const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

pub fn fnv1a(bytes: &[u8]) -> u64 {
	let mut hash = FNV_OFFSET_BASIS;
	for &byte in bytes {
		hash ^= u64::from(byte);
		hash = hash.wrapping_mul(FNV_PRIME);
	}
	hash
}

/// Stable `hash(base_name) mod thread_count`, as an index into the command-thread pool.
///
/// `thread_count` must be non-zero; the result is always `< thread_count`.
pub fn stable_thread_index(base: &str, thread_count: usize) -> usize {
	debug_assert!(thread_count > 0, "command thread pool must have at least one thread");
	(fnv1a(base.as_bytes()) % thread_count as u64) as usize
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn base_name_strips_field_suffix() {
		assert_eq!(base_name("ROOM:TEMP.VAL"), "ROOM:TEMP");
		assert_eq!(base_name("ROOM:TEMP.VAL.FOO"), "ROOM:TEMP");
		assert_eq!(base_name("ROOM:TEMP"), "ROOM:TEMP");
	}

	#[test]
	fn fnv1a_is_deterministic() {
		assert_eq!(fnv1a(b"ROOM:TEMP"), fnv1a(b"ROOM:TEMP"));
		assert_ne!(fnv1a(b"ROOM:TEMP"), fnv1a(b"ROOM:TEMP2"));
	}

	#[test]
	fn stable_thread_index_is_in_range() {
		for name in &["a", "ROOM:TEMP", "VERY:LONG:PV:NAME:WITH:SEGMENTS", ""] {
			let idx = stable_thread_index(name, 4);
			assert!(idx < 4);
		}
	}

	#[test]
	fn stable_thread_index_ignores_field_when_given_base() {
		let base = base_name("ROOM:TEMP.VAL");
		assert_eq!(stable_thread_index(base, 4), stable_thread_index("ROOM:TEMP", 4));
	}
}
