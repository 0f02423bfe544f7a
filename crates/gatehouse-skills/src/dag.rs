// Step DAG
// Built with Kahn-style layering so cycle detection and the topological
// order fall out of the same pass. The stored order is deterministic:
// within a layer, steps keep their declared order.

use std::collections::{HashMap, HashSet};

use gatehouse_core::{GatehouseError, Result};
use gatehouse_types::SkillStep;

#[derive(Debug, Clone)]
pub struct Dag {
    order: Vec<String>,
    needs: HashMap<String, Vec<String>>,
}

impl Dag {
    pub fn new(steps: &[SkillStep]) -> Result<Self> {
        let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        for step in steps {
            for need in &step.needs {
                if !ids.contains(need.as_str()) {
                    return Err(GatehouseError::Validation(format!(
                        "step {} depends on unknown step {}",
                        step.id, need
                    )));
                }
            }
        }

        let mut indegree: HashMap<&str, usize> = steps
            .iter()
            .map(|s| (s.id.as_str(), s.needs.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in steps {
            for need in &step.needs {
                dependents
                    .entry(need.as_str())
                    .or_default()
                    .push(step.id.as_str());
            }
        }

        let position: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut order = Vec::with_capacity(steps.len());
        let mut layer: Vec<&str> = steps
            .iter()
            .filter(|s| indegree[s.id.as_str()] == 0)
            .map(|s| s.id.as_str())
            .collect();
        while !layer.is_empty() {
            let mut next_layer = Vec::new();
            for id in layer {
                order.push(id.to_string());
                for dependent in dependents.get(id).into_iter().flatten() {
                    let remaining = indegree
                        .get_mut(dependent)
                        .map(|count| {
                            *count -= 1;
                            *count
                        })
                        .unwrap_or(0);
                    if remaining == 0 {
                        next_layer.push(*dependent);
                    }
                }
            }
            // Keep declared order within the layer for determinism.
            next_layer.sort_by_key(|id| position[id]);
            layer = next_layer;
        }

        if order.len() != steps.len() {
            return Err(GatehouseError::Validation("cycle detected".to_string()));
        }

        let needs = steps
            .iter()
            .map(|s| (s.id.clone(), s.needs.clone()))
            .collect();
        Ok(Self { order, needs })
    }

    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Every incomplete step whose needs are all completed, in topological
    /// order.
    pub fn ready_set(&self, completed: &HashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| !completed.contains(*id))
            .filter(|id| {
                self.needs
                    .get(*id)
                    .is_some_and(|needs| needs.iter().all(|n| completed.contains(n)))
            })
            .cloned()
            .collect()
    }

    /// The step whose result becomes the workflow output.
    pub fn final_step(&self) -> Option<&str> {
        self.order.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
