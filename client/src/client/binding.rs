#[cfg(test)]
#[path = "binding_test.rs"]
mod binding_test;

use crate::proto::channum::{MAX_CHANNEL_NUMBER, MIN_CHANNEL_NUMBER};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

// Channel bindings last ten minutes on the server side. Rebinding at
// half that leaves room for scheduling delay, so a refresh always lands
// before the server expires the channel.
pub(crate) const BINDING_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum BindingState {
    Idle = 0,
    Request = 1,
    Ready = 2,
    Refresh = 3,
    Failed = 4,
}

impl From<u8> for BindingState {
    fn from(v: u8) -> Self {
        match v {
            0 => BindingState::Idle,
            1 => BindingState::Request,
            2 => BindingState::Ready,
            3 => BindingState::Refresh,
            _ => BindingState::Failed,
        }
    }
}

// Binding is the state machine instance for one peer-address/channel pair.
//
// The channel number and peer address never change once assigned. State
// and refresh timestamp have their own synchronization so maintenance on
// one binding never contends with the registry or with other bindings.
pub(crate) struct Binding {
    pub(crate) number: u16,
    pub(crate) addr: SocketAddr,
    st: AtomicU8, //BindingState
    refreshed_at: Mutex<Instant>,
}

impl Binding {
    pub(crate) fn new(number: u16, addr: SocketAddr) -> Self {
        Binding {
            number,
            addr,
            st: AtomicU8::new(BindingState::Idle as u8),
            refreshed_at: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn set_state(&self, state: BindingState) {
        self.st.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> BindingState {
        self.st.load(Ordering::SeqCst).into()
    }

    // transition claims the state change from to. Of any number of
    // concurrent claimants exactly one succeeds, so at most one bind or
    // refresh exchange is ever in flight per binding.
    pub(crate) fn transition(&self, from: BindingState, to: BindingState) -> bool {
        self.st
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) async fn set_refreshed_at(&self, at: Instant) {
        let mut refreshed_at = self.refreshed_at.lock().await;
        *refreshed_at = at;
    }

    pub(crate) async fn refreshed_at(&self) -> Instant {
        *self.refreshed_at.lock().await
    }
}

// Thread-safe Binding map.
//
// The two maps stay consistent under the surrounding lock: a binding is
// present in both or in neither.
#[derive(Default)]
pub(crate) struct BindingManager {
    chan_map: HashMap<u16, SocketAddr>,
    addr_map: HashMap<SocketAddr, Arc<Binding>>,
    next: u16,
}

impl BindingManager {
    pub(crate) fn new() -> Self {
        BindingManager {
            chan_map: HashMap::new(),
            addr_map: HashMap::new(),
            next: MIN_CHANNEL_NUMBER,
        }
    }

    // assign_channel_number hands out the next free channel number,
    // wrapping at the top of the range and skipping numbers still owned
    // by a live binding.
    pub(crate) fn assign_channel_number(&mut self) -> u16 {
        loop {
            let n = self.next;
            if self.next == MAX_CHANNEL_NUMBER {
                self.next = MIN_CHANNEL_NUMBER;
            } else {
                self.next += 1;
            }
            if !self.chan_map.contains_key(&n) {
                return n;
            }
        }
    }

    // create returns the binding for addr, creating it with a fresh
    // channel number when the address has none yet.
    pub(crate) fn create(&mut self, addr: SocketAddr) -> Arc<Binding> {
        if let Some(b) = self.addr_map.get(&addr) {
            return Arc::clone(b);
        }

        let b = Arc::new(Binding::new(self.assign_channel_number(), addr));
        self.chan_map.insert(b.number, b.addr);
        self.addr_map.insert(b.addr, Arc::clone(&b));
        b
    }

    pub(crate) fn find_by_addr(&self, addr: &SocketAddr) -> Option<Arc<Binding>> {
        self.addr_map.get(addr).map(Arc::clone)
    }

    pub(crate) fn find_by_number(&self, number: u16) -> Option<Arc<Binding>> {
        let addr = self.chan_map.get(&number)?;
        self.addr_map.get(addr).map(Arc::clone)
    }

    // delete_by_addr removes the binding from both maps, returning
    // whether an entry existed.
    pub(crate) fn delete_by_addr(&mut self, addr: &SocketAddr) -> bool {
        if let Some(b) = self.addr_map.remove(addr) {
            self.chan_map.remove(&b.number);
            true
        } else {
            false
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.addr_map.len()
    }
}
