use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Node selection policy producing a query plan per request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadBalancingPolicy {
    #[default]
    RoundRobin,
    /// Round robin restricted to the listed `host:port` addresses
    WhiteListRoundRobin { hosts: Vec<String> },
}

impl LoadBalancingPolicy {
    pub fn allows(&self, address: &str) -> bool {
        match self {
            LoadBalancingPolicy::RoundRobin => true,
            LoadBalancingPolicy::WhiteListRoundRobin { hosts } => {
                hosts.iter().any(|h| h == address)
            }
        }
    }
}

/// Rotating cursor shared by all requests of a session
#[derive(Debug)]
pub struct PlanCursor {
    next: AtomicUsize,
}

impl Default for PlanCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanCursor {
    pub fn new() -> Self {
        // Random start so that many clients do not all hit the first contact point
        Self {
            next: AtomicUsize::new(rand::thread_rng().gen_range(0..1024)),
        }
    }

    /// Orders candidate node indices for one request: every allowed, live
    /// node exactly once, starting at the next position of the rotation.
    pub fn plan(
        &self,
        policy: &LoadBalancingPolicy,
        nodes: &[(String, bool)],
    ) -> Vec<usize> {
        if nodes.is_empty() {
            return Vec::new();
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed) % nodes.len();
        (0..nodes.len())
            .map(|offset| (start + offset) % nodes.len())
            .filter(|&i| {
                let (address, up) = &nodes[i];
                *up && policy.allows(address)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(up: &[bool]) -> Vec<(String, bool)> {
        up.iter()
            .enumerate()
            .map(|(i, up)| (format!("10.0.0.{}:9042", i + 1), *up))
            .collect()
    }

    #[test]
    fn test_round_robin_rotates_start() {
        let cursor = PlanCursor::new();
        let nodes = nodes(&[true, true, true]);
        let first = cursor.plan(&LoadBalancingPolicy::RoundRobin, &nodes);
        let second = cursor.plan(&LoadBalancingPolicy::RoundRobin, &nodes);

        assert_eq!(first.len(), 3);
        assert_eq!(second[0], (first[0] + 1) % 3);
    }

    #[test]
    fn test_down_nodes_skipped() {
        let cursor = PlanCursor::new();
        let plan = cursor.plan(&LoadBalancingPolicy::RoundRobin, &nodes(&[true, false, true]));
        assert_eq!(plan.len(), 2);
        assert!(!plan.contains(&1));
    }

    #[test]
    fn test_white_list_restricts_plan() {
        let cursor = PlanCursor::new();
        let policy = LoadBalancingPolicy::WhiteListRoundRobin {
            hosts: vec!["10.0.0.2:9042".to_string()],
        };
        for _ in 0..5 {
            assert_eq!(cursor.plan(&policy, &nodes(&[true, true, true])), vec![1]);
        }
    }
}
