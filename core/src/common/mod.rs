//!
//! # Common components
//!

pub mod config;
pub mod engines;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ruc::*;
use std::{
    env,
    mem::size_of,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

/////////////////////////////////////////////////////////////////////////////
/////////////////////////////////////////////////////////////////////////////

pub const NULL: &[u8] = &[];

pub type RawBytes = Vec<u8>;
pub type RawKey = RawBytes;
pub type RawValue = RawBytes;

pub const KB: u64 = 1 << 10;
pub const MB: u64 = 1 << 20;
pub const GB: u64 = 1 << 30;

/// Width of every big-endian integer this workspace writes into keys.
pub const U64_SIZE: usize = size_of::<u64>();

/////////////////////////////////////////////////////////////////////////////
/////////////////////////////////////////////////////////////////////////////

const BASE_DIR_VAR: &str = "VSTRIE_BASE_DIR";

static VSTRIE_BASE_DIR: Lazy<Mutex<PathBuf>> = Lazy::new(|| Mutex::new(gen_data_dir()));

/// Parse a big-endian `u64` out of exactly eight bytes.
#[inline(always)]
pub fn parse_u64(bytes: &[u8]) -> Result<u64> {
    let array = <[u8; U64_SIZE]>::try_from(bytes).c(d!("not an 8-byte integer"))?;
    Ok(u64::from_be_bytes(array))
}

#[inline(always)]
fn gen_data_dir() -> PathBuf {
    env::var(BASE_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/.vstrie"))
}

/// ${VSTRIE_BASE_DIR}
#[inline(always)]
pub fn vstrie_get_base_dir() -> PathBuf {
    VSTRIE_BASE_DIR.lock().clone()
}

/// Set ${VSTRIE_BASE_DIR} manually, only allowed once per process.
#[inline(always)]
pub fn vstrie_set_base_dir(dir: impl AsRef<Path>) -> Result<()> {
    static HAS_INITED: AtomicBool = AtomicBool::new(false);

    if HAS_INITED.swap(true, Ordering::Relaxed) {
        Err(eg!("the base dir has been set !!"))
    } else {
        env::set_var(BASE_DIR_VAR, dir.as_ref().as_os_str());
        *VSTRIE_BASE_DIR.lock() = dir.as_ref().to_path_buf();
        Ok(())
    }
}
