//! Per-environment mutual exclusion.
//!
//! Every mutating phase of the driver takes the lock of the environment it
//! touches, scoped to that phase only. Lock scopes never span a recursive
//! dependency build, so the synchronous driver cannot deadlock on itself,
//! and a future parallel fan-out of independent dependency subtrees cannot
//! race two builds into the same environment's filesystem tree.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::arch::Suffix;

static REGISTRY: OnceLock<Mutex<HashMap<String, &'static Mutex<()>>>> = OnceLock::new();

fn mutex_for(suffix: &Suffix) -> &'static Mutex<()> {
    let registry = REGISTRY.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(|e| e.into_inner());
    *map.entry(suffix.to_string())
        .or_insert_with(|| Box::leak(Box::new(Mutex::new(()))))
}

/// Acquire the lock for a named environment. Blocks while another thread
/// holds it; release is by dropping the guard.
pub fn lock(suffix: &Suffix) -> MutexGuard<'static, ()> {
    mutex_for(suffix).lock().unwrap_or_else(|e| e.into_inner())
}
