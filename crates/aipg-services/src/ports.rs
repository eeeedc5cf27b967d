//! Local port allocation.

use std::collections::HashSet;
use std::net::TcpListener;
use std::ops::RangeInclusive;

use crate::error::RegistryError;

/// Whether nothing currently listens on `127.0.0.1:port`.
pub fn is_port_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// First free port in `range`.
pub fn free_port(range: RangeInclusive<u16>) -> Option<u16> {
    range.into_iter().find(|&port| is_port_free(port))
}

/// Hands out ports, never the same one twice.
#[derive(Debug, Default)]
pub struct PortAllocator {
    assigned: HashSet<u16>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// First free port in `range` not handed out before.
    pub fn allocate(
        &mut self,
        service: &str,
        range: RangeInclusive<u16>,
    ) -> Result<u16, RegistryError> {
        let (start, end) = (*range.start(), *range.end());
        let port = range
            .into_iter()
            .find(|port| !self.assigned.contains(port) && is_port_free(*port))
            .ok_or_else(|| RegistryError::NoFreePort {
                service: service.to_string(),
                start,
                end,
            })?;
        self.assigned.insert(port);
        Ok(port)
    }

    /// Mark `port` as taken without probing it.
    pub fn reserve(&mut self, port: u16) -> bool {
        self.assigned.insert(port)
    }

    pub fn is_assigned(&self, port: u16) -> bool {
        self.assigned.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_hands_out_a_port_twice() {
        let mut ports = PortAllocator::new();
        let first = ports.allocate("a", 45100..=45199).unwrap();
        let second = ports.allocate("b", 45100..=45199).unwrap();
        assert_ne!(first, second);
        assert!(ports.is_assigned(first));
        assert!(ports.is_assigned(second));
    }

    #[test]
    fn test_skips_ports_in_use() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let busy = listener.local_addr().unwrap().port();
        assert!(!is_port_free(busy));

        let mut ports = PortAllocator::new();
        let err = ports.allocate("busy", busy..=busy).unwrap_err();
        assert!(matches!(err, RegistryError::NoFreePort { start, end, .. } if start == busy && end == busy));
    }

    #[test]
    fn test_reserved_port_is_skipped() {
        let mut ports = PortAllocator::new();
        let port = free_port(45300..=45399).unwrap();
        assert!(ports.reserve(port));
        assert!(!ports.reserve(port));
        let next = ports.allocate("x", port..=port.saturating_add(50)).unwrap();
        assert_ne!(next, port);
    }
}
