//! Clause graph construction and ordering.
//!
//! Hard edges (`dependencies`/`dependants`) gate evaluation and order
//! it; soft edges (`before`/`after`) only order it. All edges are
//! normalized into after-edges, validated against the lifecycle
//! timeline, and each lifecycle point is topologically sorted with
//! registration order breaking ties.

use crate::config::types::{LifecyclePoint, Result, VetboxError};
use crate::contract::Clause;
use std::collections::{BTreeSet, HashMap};

/// Validated execution plan over a set of clauses.
#[derive(Debug)]
pub struct ContractGraph {
    /// Clause name to registration index.
    index: HashMap<String, usize>,
    /// Hard dependency indices per clause, possibly at earlier points.
    hard_deps: Vec<Vec<usize>>,
    /// Execution order within each lifecycle point, by registration
    /// index.
    order: HashMap<LifecyclePoint, Vec<usize>>,
}

impl ContractGraph {
    pub fn build(clauses: &[Clause]) -> Result<Self> {
        let index = index_by_name(clauses)?;
        check_singular_points(clauses)?;

        let hard_deps = resolve_hard_edges(clauses, &index)?;
        let soft_after = resolve_soft_edges(clauses, &index, &hard_deps)?;

        let mut order = HashMap::new();
        for point in LifecyclePoint::TIMELINE {
            let members: Vec<usize> = (0..clauses.len())
                .filter(|&i| clauses[i].point == point)
                .collect();
            let sorted = sort_point(clauses, &members, &hard_deps, &soft_after)?;
            order.insert(point, sorted);
        }

        Ok(Self {
            index,
            hard_deps,
            order,
        })
    }

    /// Registration index of a clause by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Hard dependencies of the clause at `i`.
    pub fn hard_deps(&self, i: usize) -> &[usize] {
        &self.hard_deps[i]
    }

    /// Evaluation order for one lifecycle point.
    pub fn order_at(&self, point: LifecyclePoint) -> &[usize] {
        self.order
            .get(&point)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

fn index_by_name(clauses: &[Clause]) -> Result<HashMap<String, usize>> {
    let mut index = HashMap::new();
    for (i, clause) in clauses.iter().enumerate() {
        if index.insert(clause.name.clone(), i).is_some() {
            return Err(VetboxError::Graph(format!(
                "duplicate clause name \"{}\"",
                clause.name
            )));
        }
    }
    Ok(index)
}

fn check_singular_points(clauses: &[Clause]) -> Result<()> {
    for point in LifecyclePoint::SINGULAR {
        let members: Vec<&str> = clauses
            .iter()
            .filter(|c| c.point == point)
            .map(|c| c.name.as_str())
            .collect();
        if members.len() > 1 {
            return Err(VetboxError::Graph(format!(
                "lifecycle point {} admits a single clause, found: {}",
                point.name(),
                members.join(", ")
            )));
        }
    }
    Ok(())
}

/// Resolve `dependencies` and `dependants` into per-clause hard
/// dependency lists. A dependency may never sit at a later lifecycle
/// point than its dependant.
fn resolve_hard_edges(
    clauses: &[Clause],
    index: &HashMap<String, usize>,
) -> Result<Vec<Vec<usize>>> {
    let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); clauses.len()];
    for (i, clause) in clauses.iter().enumerate() {
        for name in &clause.dependencies {
            let dep = resolve_name(clause, name, index)?;
            deps[i].insert(dep);
        }
        // A dependant edge is the same hard edge written from the
        // other end.
        for name in &clause.dependants {
            let dependant = resolve_name(clause, name, index)?;
            deps[dependant].insert(i);
        }
    }
    for (i, clause_deps) in deps.iter().enumerate() {
        for &dep in clause_deps {
            if clauses[dep].point > clauses[i].point {
                return Err(VetboxError::Graph(format!(
                    "\"{}\" ({}) cannot depend on \"{}\" ({}), which runs later",
                    clauses[i].name,
                    clauses[i].point.name(),
                    clauses[dep].name,
                    clauses[dep].point.name(),
                )));
            }
        }
    }
    Ok(deps.into_iter().map(|s| s.into_iter().collect()).collect())
}

/// Resolve `before` and `after` into same-point after-edges, keyed by
/// the clause that must wait. A soft edge duplicating a hard edge is
/// dropped; the hard edge is authoritative. A soft edge crossing
/// lifecycle points is already decided by the timeline: consistent
/// edges are dropped, contradicting ones are an error.
fn resolve_soft_edges(
    clauses: &[Clause],
    index: &HashMap<String, usize>,
    hard_deps: &[Vec<usize>],
) -> Result<Vec<Vec<usize>>> {
    let mut after: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); clauses.len()];
    let mut add = |waiter: usize, first: usize| -> Result<()> {
        use std::cmp::Ordering;
        match clauses[first].point.cmp(&clauses[waiter].point) {
            Ordering::Less => Ok(()),
            Ordering::Greater => Err(VetboxError::Graph(format!(
                "\"{}\" ({}) cannot run after \"{}\" ({}), the timeline orders them the other way",
                clauses[waiter].name,
                clauses[waiter].point.name(),
                clauses[first].name,
                clauses[first].point.name(),
            ))),
            Ordering::Equal => {
                if !hard_deps[waiter].contains(&first) {
                    after[waiter].insert(first);
                }
                Ok(())
            }
        }
    };
    for (i, clause) in clauses.iter().enumerate() {
        for name in &clause.after {
            let other = resolve_name(clause, name, index)?;
            add(i, other)?;
        }
        for name in &clause.before {
            let other = resolve_name(clause, name, index)?;
            add(other, i)?;
        }
    }
    Ok(after.into_iter().map(|s| s.into_iter().collect()).collect())
}

fn resolve_name(clause: &Clause, name: &str, index: &HashMap<String, usize>) -> Result<usize> {
    let i = index.get(name).copied().ok_or_else(|| {
        VetboxError::Graph(format!(
            "clause \"{}\" references unknown clause \"{}\"",
            clause.name, name
        ))
    })?;
    if clause.name == name {
        return Err(VetboxError::Graph(format!(
            "clause \"{}\" references itself",
            clause.name
        )));
    }
    Ok(i)
}

/// Kahn's algorithm over one lifecycle point, merging same-point hard
/// and soft edges. Among ready clauses the lowest registration index
/// runs first, so the order is stable across runs.
fn sort_point(
    clauses: &[Clause],
    members: &[usize],
    hard_deps: &[Vec<usize>],
    soft_after: &[Vec<usize>],
) -> Result<Vec<usize>> {
    let member_set: BTreeSet<usize> = members.iter().copied().collect();
    let mut waiting_on: HashMap<usize, BTreeSet<usize>> = HashMap::new();
    for &i in members {
        let mut blockers: BTreeSet<usize> = BTreeSet::new();
        for &dep in hard_deps[i].iter().chain(soft_after[i].iter()) {
            if member_set.contains(&dep) {
                blockers.insert(dep);
            }
        }
        waiting_on.insert(i, blockers);
    }

    let mut sorted = Vec::with_capacity(members.len());
    let mut remaining: Vec<usize> = members.to_vec();
    while !remaining.is_empty() {
        // remaining is in registration order, so the first ready
        // clause is the tie-break winner.
        let pos = remaining
            .iter()
            .position(|i| waiting_on[i].is_empty())
            .ok_or_else(|| {
                let stuck: Vec<&str> = remaining.iter().map(|&i| clauses[i].name.as_str()).collect();
                VetboxError::Graph(format!(
                    "ordering cycle among clauses: {}",
                    stuck.join(", ")
                ))
            })?;
        let next = remaining.remove(pos);
        sorted.push(next);
        for blockers in waiting_on.values_mut() {
            blockers.remove(&next);
        }
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ErrorLevel;

    fn clause(name: &str, point: LifecyclePoint) -> Clause {
        Clause::native(name, point, |_| Ok(()))
    }

    fn names(clauses: &[Clause], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| clauses[i].name.clone()).collect()
    }

    #[test]
    fn test_registration_order_without_edges() {
        let clauses = vec![
            clause("c", LifecyclePoint::PostStart),
            clause("a", LifecyclePoint::PostStart),
            clause("b", LifecyclePoint::PostStart),
        ];
        let graph = ContractGraph::build(&clauses).unwrap();
        assert_eq!(
            names(&clauses, graph.order_at(LifecyclePoint::PostStart)),
            ["c", "a", "b"]
        );
    }

    #[test]
    fn test_hard_dependency_orders_within_a_point() {
        let clauses = vec![
            clause("late", LifecyclePoint::PostStart).with_dependencies(&["early"]),
            clause("early", LifecyclePoint::PostStart),
        ];
        let graph = ContractGraph::build(&clauses).unwrap();
        assert_eq!(
            names(&clauses, graph.order_at(LifecyclePoint::PostStart)),
            ["early", "late"]
        );
    }

    #[test]
    fn test_dependant_is_the_reverse_hard_edge() {
        let clauses = vec![
            clause("early", LifecyclePoint::PostStart).with_dependants(&["late"]),
            clause("late", LifecyclePoint::PostStart),
        ];
        let graph = ContractGraph::build(&clauses).unwrap();
        let late = graph.index_of("late").unwrap();
        let early = graph.index_of("early").unwrap();
        assert_eq!(graph.hard_deps(late), [early]);
    }

    #[test]
    fn test_soft_after_orders_without_gating() {
        let clauses = vec![
            clause("second", LifecyclePoint::PostStart).with_after(&["first"]),
            clause("first", LifecyclePoint::PostStart),
        ];
        let graph = ContractGraph::build(&clauses).unwrap();
        assert_eq!(
            names(&clauses, graph.order_at(LifecyclePoint::PostStart)),
            ["first", "second"]
        );
        let second = graph.index_of("second").unwrap();
        assert!(graph.hard_deps(second).is_empty());
    }

    #[test]
    fn test_before_is_the_reverse_soft_edge() {
        let clauses = vec![
            clause("b", LifecyclePoint::PostStart),
            clause("a", LifecyclePoint::PostStart).with_before(&["b"]),
        ];
        let graph = ContractGraph::build(&clauses).unwrap();
        assert_eq!(
            names(&clauses, graph.order_at(LifecyclePoint::PostStart)),
            ["a", "b"]
        );
    }

    #[test]
    fn test_cross_point_hard_dependency_is_kept_for_gating() {
        let clauses = vec![
            clause("config", LifecyclePoint::PreStart),
            clause("probe", LifecyclePoint::PostStart).with_dependencies(&["config"]),
        ];
        let graph = ContractGraph::build(&clauses).unwrap();
        let probe = graph.index_of("probe").unwrap();
        assert_eq!(graph.hard_deps(probe), [0]);
    }

    #[test]
    fn test_dependency_at_a_later_point_is_rejected() {
        let clauses = vec![
            clause("early", LifecyclePoint::PreStart).with_dependencies(&["late"]),
            clause("late", LifecyclePoint::PostStop),
        ];
        let err = ContractGraph::build(&clauses).unwrap_err();
        assert!(err.to_string().contains("runs later"));
    }

    #[test]
    fn test_soft_edge_contradicting_the_timeline_is_rejected() {
        let clauses = vec![
            clause("early", LifecyclePoint::PreStart).with_after(&["late"]),
            clause("late", LifecyclePoint::PostStop),
        ];
        assert!(ContractGraph::build(&clauses).is_err());
    }

    #[test]
    fn test_soft_edge_duplicating_a_hard_edge_is_dropped() {
        let clauses = vec![
            clause("late", LifecyclePoint::PostStart)
                .with_dependencies(&["early"])
                .with_after(&["early"]),
            clause("early", LifecyclePoint::PostStart),
        ];
        let graph = ContractGraph::build(&clauses).unwrap();
        let late = graph.index_of("late").unwrap();
        let early = graph.index_of("early").unwrap();
        assert_eq!(graph.hard_deps(late), [early]);
        assert_eq!(
            names(&clauses, graph.order_at(LifecyclePoint::PostStart)),
            ["early", "late"]
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let clauses = vec![
            clause("a", LifecyclePoint::PostStart).with_after(&["b"]),
            clause("b", LifecyclePoint::PostStart).with_dependencies(&["a"]),
        ];
        let err = ContractGraph::build(&clauses).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let clauses = vec![
            clause("dup", LifecyclePoint::PostStart),
            clause("dup", LifecyclePoint::PreStart),
        ];
        assert!(ContractGraph::build(&clauses).is_err());
    }

    #[test]
    fn test_two_clauses_at_a_singular_point_are_rejected() {
        let clauses = vec![
            clause("s1", LifecyclePoint::Start).with_level(ErrorLevel::Fatal),
            clause("s2", LifecyclePoint::Start),
        ];
        let err = ContractGraph::build(&clauses).unwrap_err();
        assert!(err.to_string().contains("single clause"));
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let clauses = vec![clause("a", LifecyclePoint::PostStart).with_dependencies(&["ghost"])];
        let err = ContractGraph::build(&clauses).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let clauses = vec![clause("a", LifecyclePoint::PostStart).with_after(&["a"])];
        assert!(ContractGraph::build(&clauses).is_err());
    }
}
