//! Resolve the running test into a database name.
//!
//! The Rust test harness runs every test on a thread named after the test's
//! path (`module::tests::case`), so the current thread identifies the test
//! entry point no matter how many helpers sit in between. The path is qualified
//! with the name of the test binary, which cargo derives from the crate or the
//! integration test file, so equal paths in different binaries stay apart.
//!
//! Only thread names that read as a Rust path are accepted. A non-test thread
//! whose name is a plain identifier (`worker1`) cannot be told apart from a
//! test at the crate root; such threads must pass a name explicitly.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::thread;
use webshop_common::{Result, WebshopError};

/// Longest database name accepted by the server
pub const MAX_DATABASE_NAME_LEN: usize = 63;

/// Thread names that never identify a test
const NON_TEST_THREADS: &[&str] = &["main"];

/// Characters MongoDB does not allow in database names
const INVALID_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?'];

/// Hex digits of the hash suffix
const HASH_SUFFIX_LEN: usize = 8;

/// Database name for the test running on the current thread
pub fn resolve_test_name() -> Result<String> {
    let current = thread::current();
    let test_path = match current.name() {
        Some(name) if is_test_path(name) => name,
        other => {
            return Err(WebshopError::Fixture(format!(
                "cannot resolve test name from thread {:?}; pass an explicit database name",
                other
            )))
        }
    };
    let binary = test_binary_name()?;
    Ok(database_name_for(&format!("{}::{}", binary, test_path)))
}

/// Whether a thread name can be the path of a test
fn is_test_path(name: &str) -> bool {
    !NON_TEST_THREADS.contains(&name)
        && name.split("::").all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_')
        })
}

/// Name of the running test binary, without cargo's `-<hash>` suffix
fn test_binary_name() -> Result<String> {
    let exe = std::env::current_exe()
        .map_err(|e| WebshopError::Fixture(format!("cannot locate test binary: {}", e)))?;
    binary_name_from_path(&exe).ok_or_else(|| {
        WebshopError::Fixture(format!("cannot name test binary {}", exe.display()))
    })
}

fn binary_name_from_path(exe: &Path) -> Option<String> {
    let stem = exe.file_stem()?.to_str()?;
    let name = match stem.rsplit_once('-') {
        Some((name, hash))
            if !name.is_empty() && !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            name
        }
        _ => stem,
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Turn a test path into a valid database name.
///
/// Path separators collapse to `_`, any file-path prefix is stripped and
/// invalid characters become `_`. When that mapping could merge two different
/// paths, or the name is over the server limit, a hash of the full path is
/// appended.
pub fn database_name_for(test_path: &str) -> String {
    let trimmed = test_path.rsplit('/').next().unwrap_or(test_path);
    let mut name = trimmed
        .replace("::", "_")
        .replace(INVALID_CHARS, "_");
    if name.is_empty() {
        name.push('_');
    }

    let lossless = trimmed.len() == test_path.len() && is_reversible(trimmed);
    if lossless && name.len() <= MAX_DATABASE_NAME_LEN {
        return name;
    }

    let digest = Sha256::digest(test_path.as_bytes());
    let suffix: String = digest[..HASH_SUFFIX_LEN / 2]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    let mut cut = name.len().min(MAX_DATABASE_NAME_LEN - HASH_SUFFIX_LEN - 1);
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}_{}", &name[..cut], suffix)
}

/// A `_` in the output marks a separator only if no segment had one of its own
fn is_reversible(path: &str) -> bool {
    path.split("::")
        .all(|segment| !segment.is_empty() && !segment.contains('_') && !segment.contains(INVALID_CHARS))
}
