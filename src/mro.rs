// Eidos Method Resolution Order
//
// Three interchangeable linearizations over the class graph, selected per
// class at finalization. All are pure functions of the class table; the
// class being linearized supplies its parent list explicitly so a class can
// be linearized before it is registered.

use crate::registry::{Class, ClassId};
use std::collections::VecDeque;

/// Linearization policy for a class, fixed at finalization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MroPolicy {
    /// Pre-order, left-to-right walk of the parent graph, duplicates removed
    /// keeping the first occurrence. May order ancestors inconsistently with
    /// a parent's own precedence list.
    DepthFirst,
    /// Level-order walk starting from the immediate parents, duplicates
    /// removed keeping the first occurrence.
    BreadthFirst,
    /// C3 linearization. The only policy that preserves local precedence
    /// order and monotonicity, and the only one that can reject a hierarchy.
    #[default]
    C3,
}

/// Raised when C3 cannot produce a monotonic merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InconsistentHierarchy;

/// Compute the precedence list for `id` with direct parents `parents` under
/// `policy`. The result begins with `id`; for any registered hierarchy it
/// ends with the root class.
pub fn linearize(
    classes: &[Class],
    id: ClassId,
    parents: &[ClassId],
    policy: MroPolicy,
) -> Result<Vec<ClassId>, InconsistentHierarchy> {
    match policy {
        MroPolicy::DepthFirst => Ok(depth_first(classes, id, parents)),
        MroPolicy::BreadthFirst => Ok(breadth_first(classes, id, parents)),
        MroPolicy::C3 => c3_linearize(classes, id, parents),
    }
}

/// Pre-order traversal, first occurrence kept.
pub fn depth_first(classes: &[Class], id: ClassId, parents: &[ClassId]) -> Vec<ClassId> {
    let mut order = vec![id];
    for &parent in parents {
        dfs_walk(classes, parent, &mut order);
    }
    order
}

fn dfs_walk(classes: &[Class], id: ClassId, order: &mut Vec<ClassId>) {
    if order.contains(&id) {
        return;
    }
    order.push(id);
    for &parent in &classes[id.0 as usize].parents {
        dfs_walk(classes, parent, order);
    }
}

/// Level-order traversal from the immediate parents, first occurrence kept.
pub fn breadth_first(classes: &[Class], id: ClassId, parents: &[ClassId]) -> Vec<ClassId> {
    let mut order = vec![id];
    let mut queue: VecDeque<ClassId> = parents.iter().copied().collect();
    while let Some(head) = queue.pop_front() {
        if order.contains(&head) {
            continue;
        }
        order.push(head);
        for &parent in &classes[head.0 as usize].parents {
            queue.push_back(parent);
        }
    }
    order
}

/// C3 linearization: merge the singleton `[id]` with the C3 linearization of
/// each parent and with the parents list itself, selecting at each step the
/// first candidate that heads some list and appears in no list's tail.
pub fn c3_linearize(
    classes: &[Class],
    id: ClassId,
    parents: &[ClassId],
) -> Result<Vec<ClassId>, InconsistentHierarchy> {
    let mut sequences: Vec<Vec<ClassId>> = Vec::with_capacity(parents.len() + 1);
    for &parent in parents {
        sequences.push(c3_linearize(
            classes,
            parent,
            &classes[parent.0 as usize].parents,
        )?);
    }
    if !parents.is_empty() {
        sequences.push(parents.to_vec());
    }

    let mut order = vec![id];
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Ok(order);
        }

        let candidate = sequences
            .iter()
            .map(|s| s[0])
            .find(|&head| !sequences.iter().any(|s| s[1..].contains(&head)));

        match candidate {
            Some(next) => {
                order.push(next);
                for seq in sequences.iter_mut() {
                    if seq[0] == next {
                        seq.remove(0);
                    }
                }
            }
            None => return Err(InconsistentHierarchy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mro::MroPolicy;
    use crate::registry::{Class, ClassOptions};
    use crate::symbol::SymbolId;
    use std::collections::HashMap;

    fn cls(id: u32, parents: &[u32]) -> Class {
        Class {
            name: SymbolId(id),
            parents: parents.iter().map(|&p| ClassId(p)).collect(),
            children: Vec::new(),
            direct_slots: Vec::new(),
            slots: Vec::new(),
            slot_index: HashMap::new(),
            initarg_index: HashMap::new(),
            class_values: Vec::new(),
            template: Vec::new(),
            instance_size: 0,
            mro: MroPolicy::C3,
            cpl: Vec::new(),
            options: ClassOptions::default(),
        }
    }

    fn ids(raw: &[u32]) -> Vec<ClassId> {
        raw.iter().map(|&r| ClassId(r)).collect()
    }

    // 0 = root, 1 = A < root, 2 = B < A, 3 = C < B
    fn chain() -> Vec<Class> {
        vec![cls(0, &[]), cls(1, &[0]), cls(2, &[1]), cls(3, &[2])]
    }

    #[test]
    fn test_single_parent_chain_agrees_across_policies() {
        let classes = chain();
        let parents = [ClassId(2)];
        let expected = ids(&[3, 2, 1, 0]);
        assert_eq!(
            depth_first(&classes, ClassId(3), &parents),
            expected
        );
        assert_eq!(
            breadth_first(&classes, ClassId(3), &parents),
            expected
        );
        assert_eq!(
            c3_linearize(&classes, ClassId(3), &parents).unwrap(),
            expected
        );
    }

    // Diamond: 0 = root, 1 = A, 2 = B < A, 3 = C < A, 4 = D < (B, C)
    fn diamond() -> Vec<Class> {
        vec![
            cls(0, &[]),
            cls(1, &[0]),
            cls(2, &[1]),
            cls(3, &[1]),
            cls(4, &[2, 3]),
        ]
    }

    #[test]
    fn test_c3_diamond() {
        let classes = diamond();
        let order = c3_linearize(&classes, ClassId(4), &[ClassId(2), ClassId(3)]).unwrap();
        assert_eq!(order, ids(&[4, 2, 3, 1, 0]));
    }

    #[test]
    fn test_depth_first_diamond_hoists_shared_ancestor() {
        let classes = diamond();
        let order = depth_first(&classes, ClassId(4), &[ClassId(2), ClassId(3)]);
        // Pre-order reaches A through B before visiting C.
        assert_eq!(order, ids(&[4, 2, 1, 0, 3]));
    }

    #[test]
    fn test_breadth_first_diamond_keeps_parents_adjacent() {
        let classes = diamond();
        let order = breadth_first(&classes, ClassId(4), &[ClassId(2), ClassId(3)]);
        assert_eq!(order, ids(&[4, 2, 3, 1, 0]));
    }

    #[test]
    fn test_c3_rejects_reordered_parents() {
        // 0 = root, 1 = A, 2 = B < A; declaring C < (A, B) contradicts B's
        // own view that B precedes A.
        let classes = vec![cls(0, &[]), cls(1, &[0]), cls(2, &[1])];
        let result = c3_linearize(&classes, ClassId(3), &[ClassId(1), ClassId(2)]);
        assert_eq!(result, Err(InconsistentHierarchy));
    }

    #[test]
    fn test_linearize_dispatches_on_policy() {
        let classes = diamond();
        let parents = [ClassId(2), ClassId(3)];
        assert_eq!(
            linearize(&classes, ClassId(4), &parents, MroPolicy::C3).unwrap(),
            ids(&[4, 2, 3, 1, 0])
        );
        assert_eq!(
            linearize(&classes, ClassId(4), &parents, MroPolicy::DepthFirst).unwrap(),
            ids(&[4, 2, 1, 0, 3])
        );
    }
}
