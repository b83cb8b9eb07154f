//! Core type definitions for the simulator.
//!
//! This module defines the fundamental types shared by the graph, the
//! connection pool and the scheduler.

/// Simulated time in milliseconds.
///
/// The scheduler clock starts at zero for every run. Observed timestamps taken
/// from the recorded network log and trace use the same unit but are absolute
/// on the recording's clock.
pub type SimTime = f64;

/// Unique identifier for a node in the dependency graph.
///
/// Node ids are assigned in discovery order (the order in which the graph
/// builder created the node), so comparing ids compares discovery order.
pub type NodeId = usize;

/// Identifier of a simulated connection inside one run's connection pool.
pub type ConnectionId = usize;

/// Origin string (`scheme://host[:port]`) used to group connections.
pub type Origin = String;

/// Tolerance used when comparing simulated times that went through float
/// arithmetic.
pub const TIME_EPSILON: SimTime = 1e-9;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_aliases() {
        let time: SimTime = 12.5;
        let node_id: NodeId = 42;
        let connection: ConnectionId = 3;
        let origin: Origin = "https://example.com".to_string();

        assert_eq!(time, 12.5);
        assert_eq!(node_id, 42);
        assert_eq!(connection, 3);
        assert_eq!(origin, "https://example.com");
        assert!(TIME_EPSILON > 0.0);
    }
}
