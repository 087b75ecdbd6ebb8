#[cfg(test)]
#[path = "permission_test.rs"]
mod permission_test;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum PermState {
    Unset = 0,
    Permitted = 1,
}

impl Default for PermState {
    fn default() -> Self {
        PermState::Unset
    }
}

impl From<u8> for PermState {
    fn from(v: u8) -> Self {
        match v {
            0 => PermState::Unset,
            _ => PermState::Permitted,
        }
    }
}

#[derive(Default)]
pub(crate) struct Permission {
    st: AtomicU8, //PermState
    mu: Mutex<()>,
}

impl Permission {
    pub(crate) fn set_state(&self, state: PermState) {
        self.st.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> PermState {
        self.st.load(Ordering::SeqCst).into()
    }

    // exchange_lock serializes permission installation for one peer, so
    // concurrent first writes to the same host produce a single exchange.
    pub(crate) async fn exchange_lock(&self) -> MutexGuard<'_, ()> {
        self.mu.lock().await
    }
}

// Thread-safe Permission map.
//
// A relay permission covers every port of a peer host, so entries are
// keyed by IP address alone.
#[derive(Default)]
pub(crate) struct PermissionMap {
    perm_map: HashMap<IpAddr, Arc<Permission>>,
}

impl PermissionMap {
    pub(crate) fn new() -> PermissionMap {
        PermissionMap {
            perm_map: HashMap::new(),
        }
    }

    // insert stores the permission iff the address has none yet, and
    // returns whether the insertion took place. Existing entries are
    // never overwritten.
    pub(crate) fn insert(&mut self, addr: &SocketAddr, p: Arc<Permission>) -> bool {
        if self.perm_map.contains_key(&addr.ip()) {
            return false;
        }
        self.perm_map.insert(addr.ip(), p);
        true
    }

    pub(crate) fn find(&self, addr: &SocketAddr) -> Option<&Arc<Permission>> {
        self.perm_map.get(&addr.ip())
    }

    pub(crate) fn delete(&mut self, addr: &SocketAddr) {
        self.perm_map.remove(&addr.ip());
    }
}
