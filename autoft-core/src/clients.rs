//! Console client registry with heartbeat decay.
//!
//! Every packet from a console resets its counter to [`CLIENT_TTL`]; every
//! status broadcast decrements it. A console that stops talking is dropped
//! after `CLIENT_TTL` broadcasts.

use std::collections::HashMap;
use std::net::SocketAddr;

/// Broadcast cycles a silent client survives.
pub const CLIENT_TTL: u32 = 7;

pub struct ClientRegistry {
    ttl: u32,
    clients: HashMap<SocketAddr, u32>,
}

impl ClientRegistry {
    pub fn new(ttl: u32) -> Self {
        ClientRegistry {
            ttl,
            clients: HashMap::new(),
        }
    }

    /// Add or refresh a client.
    pub fn register(&mut self, addr: SocketAddr) {
        self.clients.insert(addr, self.ttl);
    }

    /// One broadcast went out to `addr` without a reply yet.
    /// Unknown addresses are ignored.
    pub fn decay(&mut self, addr: &SocketAddr) {
        if let Some(counter) = self.clients.get_mut(addr) {
            *counter = counter.saturating_sub(1);
        }
    }

    /// Drop clients whose counter fell below 1. Returns how many went.
    pub fn purge(&mut self) -> usize {
        let before = self.clients.len();
        self.clients.retain(|_, &mut counter| counter >= 1);
        before - self.clients.len()
    }

    pub fn ttl_of(&self, addr: &SocketAddr) -> Option<u32> {
        self.clients.get(addr).copied()
    }

    /// Snapshot of registered addresses, sorted for stable send order.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        let mut list: Vec<SocketAddr> = self.clients.keys().copied().collect();
        list.sort();
        list
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        ClientRegistry::new(CLIENT_TTL)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// One monitor broadcast: decay everyone, then purge.
    fn broadcast(reg: &mut ClientRegistry) {
        for a in reg.addresses() {
            reg.decay(&a);
        }
        reg.purge();
    }

    #[test]
    fn test_register_sets_ttl() {
        let mut reg = ClientRegistry::default();
        reg.register(addr(5000));
        assert_eq!(reg.ttl_of(&addr(5000)), Some(CLIENT_TTL));
        reg.decay(&addr(5000));
        assert_eq!(reg.ttl_of(&addr(5000)), Some(CLIENT_TTL - 1));
        reg.register(addr(5000));
        assert_eq!(reg.ttl_of(&addr(5000)), Some(CLIENT_TTL));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_silent_client_purged_after_ttl_cycles() {
        let mut reg = ClientRegistry::default();
        reg.register(addr(5000));
        for _ in 0..CLIENT_TTL - 1 {
            broadcast(&mut reg);
            assert_eq!(reg.len(), 1);
        }
        broadcast(&mut reg);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_chatty_client_survives() {
        let mut reg = ClientRegistry::default();
        reg.register(addr(5000));
        reg.register(addr(5001));
        for _ in 0..100 {
            reg.register(addr(5000));
            broadcast(&mut reg);
        }
        assert_eq!(reg.addresses(), vec![addr(5000)]);
    }

    #[test]
    fn test_decay_unknown_is_ignored() {
        let mut reg = ClientRegistry::default();
        reg.decay(&addr(9999));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_purge_empty_is_noop() {
        let mut reg = ClientRegistry::default();
        assert_eq!(reg.purge(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_decay_saturates() {
        let mut reg = ClientRegistry::new(1);
        reg.register(addr(5000));
        reg.decay(&addr(5000));
        reg.decay(&addr(5000));
        assert_eq!(reg.ttl_of(&addr(5000)), Some(0));
        assert_eq!(reg.purge(), 1);
    }
}
