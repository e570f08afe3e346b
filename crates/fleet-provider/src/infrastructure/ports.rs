//! Host port allocation for forwards, relays, and bridges.

use std::net::TcpListener;
use std::sync::Mutex;

use tracing::warn;

/// Hands out host ports.
pub trait PortAllocator: Send + Sync {
    fn allocate(&self) -> u16;
}

/// Cycles through an inclusive port range, skipping ports that are already
/// bound on this host.
///
/// The cursor is process-wide state shared by every session, so it lives
/// behind a mutex.  A port is only probed, not reserved: two allocations can
/// race with an unrelated process, which the caller sees as a bind failure
/// of its helper.
#[derive(Debug)]
pub struct RangePortAllocator {
    start: u16,
    end: u16,
    cursor: Mutex<u16>,
}

impl RangePortAllocator {
    /// `start..=end`; the bounds are swapped if given in reverse.
    pub fn new(start: u16, end: u16) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            start,
            end,
            cursor: Mutex::new(start),
        }
    }

    fn advance(&self, current: u16) -> u16 {
        if current >= self.end {
            self.start
        } else {
            current + 1
        }
    }
}

impl PortAllocator for RangePortAllocator {
    fn allocate(&self) -> u16 {
        let mut cursor = match self.cursor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let span = u32::from(self.end - self.start) + 1;
        for _ in 0..span {
            let candidate = *cursor;
            *cursor = self.advance(candidate);
            if is_free(candidate) {
                return candidate;
            }
        }
        let candidate = *cursor;
        *cursor = self.advance(candidate);
        warn!("no free port in {}..={}; reusing {candidate}", self.start, self.end);
        candidate
    }
}

fn is_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_distinct_and_in_range() {
        // Arrange
        let allocator = RangePortAllocator::new(41000, 41100);

        // Act
        let a = allocator.allocate();
        let b = allocator.allocate();

        // Assert
        assert_ne!(a, b);
        assert!((41000..=41100).contains(&a));
        assert!((41000..=41100).contains(&b));
    }

    #[test]
    fn test_bound_port_is_skipped() {
        // Arrange: occupy a port, then make it the next candidate
        let held = TcpListener::bind(("0.0.0.0", 0)).unwrap();
        let port = held.local_addr().unwrap().port();
        let allocator = RangePortAllocator::new(port, port.saturating_add(50));

        // Act
        let allocated = allocator.allocate();

        // Assert
        assert_ne!(allocated, port);
    }

    #[test]
    fn test_cursor_wraps_to_range_start() {
        let allocator = RangePortAllocator::new(41200, 41201);
        assert_eq!(allocator.advance(41201), 41200);
        assert_eq!(allocator.advance(41200), 41201);
    }

    #[test]
    fn test_reversed_bounds_are_normalised() {
        let allocator = RangePortAllocator::new(41301, 41300);
        assert!((41300..=41301).contains(&allocator.allocate()));
    }
}
