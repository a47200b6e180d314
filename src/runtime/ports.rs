//! Ephemeral host-port allocation for bridge-networked containers.
//!
//! Grounded in the general "probe with a real listen()" idiom the original
//! humpback-agent uses for port selection: pick a candidate, bind it, and
//! trust the OS rather than trying to track allocations ourselves.

use rand::Rng;
use std::net::TcpListener;

use crate::runtime::RuntimeError;

/// Picks a free host port within `[range_start, range_end]`, verified by an
/// actual `bind()`. Retries up to 5 times before giving up with `NoFreePort`.
pub fn allocate_port(range_start: u16, range_end: u16) -> Result<u16, RuntimeError> {
    if range_start > range_end {
        return Err(RuntimeError::Other(format!(
            "invalid ephemeral port range {range_start}-{range_end}"
        )));
    }

    let mut rng = rand::thread_rng();
    for _ in 0..5 {
        let candidate = rng.gen_range(range_start..=range_end);
        if TcpListener::bind(("0.0.0.0", candidate)).is_ok() {
            return Ok(candidate);
        }
    }
    Err(RuntimeError::NoFreePort)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_port_within_range() {
        let port = allocate_port(40000, 40100).expect("a free port in range");
        assert!((40000..=40100).contains(&port));
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(allocate_port(500, 100).is_err());
    }
}
