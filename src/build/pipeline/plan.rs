//! Stage ordering.
//!
//! Stages declare the file sets they `produce` and `consume`. The run order is
//! a topological sort over those labels in which the lowest declared index
//! always goes first, so a declared order that already respects every
//! dependency is kept as is.

use std::collections::{BTreeSet, HashMap};

use crate::config::StageEntry;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PlanError {
    #[error("stage '{stage}' consumes '{label}', but no stage produces it")]
    UnknownLabel { stage: String, label: String },

    #[error("stages depend on each other in a cycle: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Indices into `entries` in run order.
pub fn plan_order(entries: &[StageEntry]) -> Result<Vec<usize>, PlanError> {
    let mut producers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        for label in entry.produces() {
            producers.entry(label.as_str()).or_default().push(i);
        }
    }

    let mut in_degree = vec![0usize; entries.len()];
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); entries.len()];
    for (i, entry) in entries.iter().enumerate() {
        let mut deps = BTreeSet::new();
        for label in entry.consumes() {
            let Some(from) = producers.get(label.as_str()) else {
                return Err(PlanError::UnknownLabel {
                    stage: entry.reference().to_string(),
                    label: label.clone(),
                });
            };
            deps.extend(from.iter().copied().filter(|&p| p != i));
        }
        in_degree[i] = deps.len();
        for dep in deps {
            dependents[dep].insert(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..entries.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(entries.len());
    while let Some(next) = ready.pop_first() {
        ordered.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if ordered.len() < entries.len() {
        let remaining = (0..entries.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| entries[i].reference().to_string())
            .collect();
        return Err(PlanError::Cycle(remaining));
    }

    Ok(ordered)
}
