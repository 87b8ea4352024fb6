use crate::integration::TestHarness;
use chordring_lib::is_between;
use std::collections::HashSet;

/// Properties that must hold whenever no join or leave is in flight.
pub struct NetworkInvariants;

#[derive(Debug)]
pub struct InvariantViolation {
    pub name: String,
    pub description: String,
    pub affected_nodes: Vec<String>,
}

impl NetworkInvariants {
    /// Check all invariants and return any violations
    pub async fn check_all(harness: &TestHarness) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        violations.extend(Self::check_ring_closure(harness).await);
        violations.extend(Self::check_successor_consistency(harness).await);
        violations.extend(Self::check_predecessor_consistency(harness).await);
        violations.extend(Self::check_sorted_order(harness).await);

        violations
    }

    /// Following successors from any member visits every member exactly once
    /// before returning to the start.
    pub async fn check_ring_closure(harness: &TestHarness) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let node_addresses = harness.get_all_node_addresses().await;

        for start_address in &node_addresses {
            let walk = harness.ring_walk(start_address).await;
            let visited: HashSet<&String> = walk.iter().collect();

            if walk.len() != node_addresses.len() || visited.len() != walk.len() {
                violations.push(InvariantViolation {
                    name: "Ring Closure".to_string(),
                    description: format!(
                        "Walk from {} visited {:?}, expected {} members",
                        start_address,
                        walk,
                        node_addresses.len()
                    ),
                    affected_nodes: node_addresses
                        .iter()
                        .filter(|addr| !visited.contains(addr))
                        .cloned()
                        .collect(),
                });
            }
        }

        violations
    }

    /// For each node n, successor(n).predecessor is n
    pub async fn check_successor_consistency(harness: &TestHarness) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for address in harness.get_all_node_addresses().await {
            let Some(node) = harness.get_node(&address).await else {
                continue;
            };
            let Some(successor) = node.get_successor() else {
                violations.push(InvariantViolation {
                    name: "Successor Consistency".to_string(),
                    description: format!("Node {} has no successor", address),
                    affected_nodes: vec![address],
                });
                continue;
            };
            let predecessor_of_successor = harness
                .get_node(&successor.address)
                .await
                .and_then(|n| n.get_predecessor());

            if predecessor_of_successor.as_ref().map(|p| &p.address) != Some(&address) {
                violations.push(InvariantViolation {
                    name: "Successor Consistency".to_string(),
                    description: format!(
                        "Node {}'s successor {} has predecessor {:?}",
                        address, successor.address, predecessor_of_successor
                    ),
                    affected_nodes: vec![address, successor.address],
                });
            }
        }

        violations
    }

    /// For each node n, predecessor(n).successor is n
    pub async fn check_predecessor_consistency(harness: &TestHarness) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for address in harness.get_all_node_addresses().await {
            let Some(node) = harness.get_node(&address).await else {
                continue;
            };
            let Some(predecessor) = node.get_predecessor() else {
                violations.push(InvariantViolation {
                    name: "Predecessor Consistency".to_string(),
                    description: format!("Node {} has no predecessor", address),
                    affected_nodes: vec![address],
                });
                continue;
            };
            let successor_of_predecessor = harness
                .get_node(&predecessor.address)
                .await
                .and_then(|n| n.get_successor());

            if successor_of_predecessor.as_ref().map(|s| &s.address) != Some(&address) {
                violations.push(InvariantViolation {
                    name: "Predecessor Consistency".to_string(),
                    description: format!(
                        "Node {}'s predecessor {} has successor {:?}",
                        address, predecessor.address, successor_of_predecessor
                    ),
                    affected_nodes: vec![address, predecessor.address],
                });
            }
        }

        violations
    }

    /// Successor pointers follow ascending positions, wrapping once from the
    /// highest member to the lowest.
    pub async fn check_sorted_order(harness: &TestHarness) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let members = harness.members_by_position().await;

        for (index, member) in members.iter().enumerate() {
            let expected = &members[(index + 1) % members.len()];
            let actual = harness
                .get_node(&member.address)
                .await
                .and_then(|n| n.get_successor());

            if actual.as_ref() != Some(expected) {
                violations.push(InvariantViolation {
                    name: "Sorted Order".to_string(),
                    description: format!(
                        "Node {} ({}) should precede {} ({}), successor is {:?}",
                        member.address, member.id, expected.address, expected.id, actual
                    ),
                    affected_nodes: vec![member.address.clone()],
                });
            }
        }

        violations
    }

    /// Every key in `keys`, looked up from every member, resolves to the
    /// member whose range (predecessor, self] holds it.
    pub async fn check_ownership(harness: &TestHarness, keys: &[u64]) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let members = harness.members_by_position().await;

        for key in keys {
            let expected = members.iter().enumerate().find(|(index, member)| {
                let predecessor = &members[(index + members.len() - 1) % members.len()];
                is_between(*key, predecessor.id, member.id)
            });
            let Some((_, expected)) = expected else {
                continue;
            };

            for from in &members {
                match harness.lookup(&from.address, *key).await {
                    Ok(owner) if owner == *expected => {}
                    other => violations.push(InvariantViolation {
                        name: "Ownership".to_string(),
                        description: format!(
                            "Lookup of {} from {} returned {:?}, owner is {}",
                            key, from.address, other, expected.address
                        ),
                        affected_nodes: vec![from.address.clone(), expected.address.clone()],
                    }),
                }
            }
        }

        violations
    }
}
