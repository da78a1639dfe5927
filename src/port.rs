//! Port allocation for test servers
//!
//! Tracks which ports in a configured range are claimed by this process
//! and hands out ports that also pass a live bind probe on the loopback
//! interface. Candidates are picked pseudo-randomly to reduce collisions
//! with other test processes sharing the same range.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::core::config::{Config, global_config};
use crate::core::error::{TestError, TestResult};

/// Allocates loopback ports for test servers from an inclusive range
#[derive(Debug)]
pub struct PortAllocator {
    start: u16,
    end: u16,
    used: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator over the inclusive range `[start, end]`
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            used: Mutex::new(HashSet::new()),
        }
    }

    /// Create an allocator over the range a configuration names
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.port_range_start, config.port_range_end)
    }

    /// The inclusive range this allocator draws from
    pub fn range(&self) -> (u16, u16) {
        (self.start, self.end)
    }

    /// Probe whether a port is currently bindable on the loopback
    /// interface. The listener is dropped immediately after the probe.
    pub fn is_port_available(port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).is_ok()
    }

    /// Acquire an unused, bindable port from the range
    ///
    /// Candidates are drawn pseudo-randomly from the unused portion of
    /// the range. A candidate that fails the bind probe is dropped for
    /// this call only, not marked used.
    ///
    /// # Errors
    /// `TestError::PortsExhausted` when no candidate in range is both
    /// unused and bindable.
    pub fn acquire(&self) -> TestResult<u16> {
        let mut candidates: Vec<u16> = {
            let used = self.lock_used();
            (self.start..=self.end)
                .filter(|port| !used.contains(port))
                .collect()
        };

        while !candidates.is_empty() {
            let index = fastrand::usize(..candidates.len());
            let port = candidates.swap_remove(index);
            if !Self::is_port_available(port) {
                continue;
            }
            // Re-check under the lock: another task may have claimed the
            // port between the candidate snapshot and the probe.
            if self.lock_used().insert(port) {
                tracing::debug!(port, "allocated test port");
                return Ok(port);
            }
        }

        Err(TestError::PortsExhausted {
            start: self.start,
            end: self.end,
        })
    }

    /// Release a port back to the pool
    ///
    /// Releasing an unknown or already-free port is a no-op.
    pub fn release(&self, port: u16) {
        if self.lock_used().remove(&port) {
            tracing::debug!(port, "released test port");
        }
    }

    /// Whether a port is currently claimed through this allocator
    pub fn is_in_use(&self, port: u16) -> bool {
        self.lock_used().contains(&port)
    }

    fn lock_used(&self) -> std::sync::MutexGuard<'_, HashSet<u16>> {
        self.used.lock().unwrap_or_else(|err| err.into_inner())
    }
}

static GLOBAL_ALLOCATOR: Lazy<PortAllocator> =
    Lazy::new(|| PortAllocator::from_config(global_config()));

/// Process-wide allocator over the configured port range
///
/// The underlying resource (the OS port space) is shared by the whole
/// process, so servers share this single instance by convention. It is
/// created on first use, never torn down, and shrinks only through
/// explicit `release` calls.
pub fn global_port_allocator() -> &'static PortAllocator {
    &GLOBAL_ALLOCATOR
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_sequential_acquires_are_distinct() {
        let allocator = PortAllocator::new(42101, 42140);
        let mut seen = HashSet::new();
        for _ in 0..8 {
            let port = allocator.acquire().expect("range should not exhaust");
            assert!(seen.insert(port), "port {port} issued twice");
            assert!(allocator.is_in_use(port));
        }
        for port in seen {
            allocator.release(port);
        }
    }

    #[test]
    fn test_exhaustion_names_the_range() {
        let allocator = PortAllocator::new(42150, 42150);
        let port = allocator.acquire().expect("single port should be free");
        assert_eq!(port, 42150);

        let error = allocator.acquire().expect_err("range is exhausted");
        assert!(matches!(
            error,
            TestError::PortsExhausted {
                start: 42150,
                end: 42150
            }
        ));
        assert_eq!(error.to_string(), "No available ports in range 42150-42150");

        allocator.release(port);
    }

    #[test]
    fn test_release_makes_port_acquirable_again() {
        let allocator = PortAllocator::new(42160, 42160);
        let port = allocator.acquire().expect("single port should be free");
        allocator.release(port);
        let again = allocator.acquire().expect("released port is acquirable");
        assert_eq!(again, port);
        allocator.release(again);
    }

    #[test]
    fn test_release_of_unknown_port_is_noop() {
        let allocator = PortAllocator::new(42170, 42175);
        allocator.release(42199);
        assert!(!allocator.is_in_use(42199));
    }

    #[test]
    fn test_bind_probe_rejects_occupied_port() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("ephemeral bind");
        let occupied = listener.local_addr().expect("local addr").port();
        assert!(!PortAllocator::is_port_available(occupied));
        drop(listener);
    }

    #[test]
    fn test_global_allocator_uses_configured_range() {
        let allocator = global_port_allocator();
        let (start, end) = allocator.range();
        assert!(start <= end);
    }
}
