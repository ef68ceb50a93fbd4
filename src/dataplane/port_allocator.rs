//! External port pool for NAT mappings

use crate::{Error, Result};

/// First port handed out to mappings
pub const PORT_BASE: u16 = 1024;

/// Size of the pool; ports span `PORT_BASE..PORT_BASE + NUM_PORTS`
pub const NUM_PORTS: usize = 1024;

/// Fixed-size bitmap over the reserved external port range.
///
/// Allocation always returns the lowest free port.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    used: Box<[bool; NUM_PORTS]>,
    in_use: usize,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            used: Box::new([false; NUM_PORTS]),
            in_use: 0,
        }
    }

    pub fn allocate(&mut self) -> Result<u16> {
        let slot = self
            .used
            .iter()
            .position(|used| !used)
            .ok_or(Error::ResourceExhausted)?;
        self.used[slot] = true;
        self.in_use += 1;
        Ok(PORT_BASE + slot as u16)
    }

    /// Return `port` to the pool. Ports outside the range or already free are ignored.
    pub fn release(&mut self, port: u16) {
        if let Some(slot) = Self::slot(port)
            && self.used[slot]
        {
            self.used[slot] = false;
            self.in_use -= 1;
        }
    }

    pub fn is_allocated(&self, port: u16) -> bool {
        Self::slot(port).is_some_and(|slot| self.used[slot])
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn release_all(&mut self) {
        self.used.fill(false);
        self.in_use = 0;
    }

    fn slot(port: u16) -> Option<usize> {
        let slot = port.checked_sub(PORT_BASE)? as usize;
        (slot < NUM_PORTS).then_some(slot)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_lowest_free() {
        let mut pool = PortAllocator::new();
        assert_eq!(pool.allocate().unwrap(), 1024);
        assert_eq!(pool.allocate().unwrap(), 1025);
        assert_eq!(pool.allocate().unwrap(), 1026);

        pool.release(1025);
        assert_eq!(pool.allocate().unwrap(), 1025);
        assert_eq!(pool.allocate().unwrap(), 1027);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let mut pool = PortAllocator::new();
        for _ in 0..NUM_PORTS {
            let port = pool.allocate().unwrap();
            assert!((1024..=2047).contains(&port));
        }
        assert_eq!(pool.in_use(), NUM_PORTS);
        assert!(matches!(pool.allocate(), Err(Error::ResourceExhausted)));

        pool.release(1500);
        assert_eq!(pool.allocate().unwrap(), 1500);
        assert!(pool.allocate().is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut pool = PortAllocator::new();
        let port = pool.allocate().unwrap();
        pool.release(port);
        pool.release(port);
        pool.release(80);
        pool.release(4000);
        assert_eq!(pool.in_use(), 0);
        assert!(!pool.is_allocated(port));
    }

    #[test]
    fn test_release_all() {
        let mut pool = PortAllocator::new();
        for _ in 0..10 {
            pool.allocate().unwrap();
        }
        pool.release_all();
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.allocate().unwrap(), PORT_BASE);
    }
}
