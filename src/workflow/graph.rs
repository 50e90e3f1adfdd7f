//! Workflow dependency graph
//!
//! Agents are nodes; an edge `from -> to` routes fields of `from`'s output
//! into `to`'s input. Ordering is Kahn's algorithm with ties broken by agent
//! id, so the same graph always schedules the same way.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::core::config::EdgeConfig;
use crate::core::{AgentverseError, Result};

/// A producer -> consumer dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// Output fields the consumer reads; empty means the whole output
    pub fields: Vec<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl From<&EdgeConfig> for Edge {
    fn from(config: &EdgeConfig) -> Self {
        Self {
            from: config.from.clone(),
            to: config.to.clone(),
            fields: config.fields.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    agents: BTreeSet<String>,
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    pub fn new<I, S>(agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            agents: agents.into_iter().map(Into::into).collect(),
            edges: Vec::new(),
        }
    }

    /// Edges are checked by [`topological_order`](Self::topological_order)
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn agents(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(String::as_str)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Edges feeding `agent`, sorted by producer
    pub fn incoming(&self, agent: &str) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.iter().filter(|e| e.to == agent).collect();
        edges.sort_by(|a, b| a.from.cmp(&b.from));
        edges
    }

    /// Distinct producers `agent` waits for
    pub fn dependencies(&self, agent: &str) -> BTreeSet<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == agent)
            .map(|e| e.from.as_str())
            .collect()
    }

    /// Distinct direct consumers of `agent`
    pub fn dependents(&self, agent: &str) -> BTreeSet<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == agent)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Every agent reachable from `agent`, excluding itself
    pub fn descendants(&self, agent: &str) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependents(agent).into_iter().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Agents in dependency order
    ///
    /// Fails with `CyclicWorkflow` naming the offending agents when the graph
    /// has a cycle, a self-edge, or an edge to an unknown agent.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        for edge in &self.edges {
            if edge.from == edge.to
                || !self.agents.contains(&edge.from)
                || !self.agents.contains(&edge.to)
            {
                return Err(AgentverseError::CyclicWorkflow {
                    agents: vec![edge.from.clone(), edge.to.clone()],
                });
            }
        }

        let mut in_degree: BTreeMap<&str, usize> = self
            .agents
            .iter()
            .map(|a| (a.as_str(), self.dependencies(a).len()))
            .collect();
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(a, _)| *a)
            .collect();

        let mut order = Vec::with_capacity(self.agents.len());
        while let Some(agent) = ready.pop_first() {
            order.push(agent.to_string());
            for dependent in self.dependents(agent) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() < self.agents.len() {
            let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
            return Err(AgentverseError::CyclicWorkflow {
                agents: self.find_cycle(&placed),
            });
        }
        Ok(order)
    }

    /// Walk the unplaced agents until one repeats
    fn find_cycle(&self, placed: &BTreeSet<&str>) -> Vec<String> {
        let Some(start) = self.agents().find(|a| !placed.contains(a)) else {
            return Vec::new();
        };

        let mut path: Vec<&str> = vec![start];
        let mut current = start;
        loop {
            // Every unplaced agent has an unplaced producer
            let Some(next) = self
                .dependencies(current)
                .into_iter()
                .find(|d| !placed.contains(d))
            else {
                return path.iter().map(|s| s.to_string()).collect();
            };

            if let Some(pos) = path.iter().position(|p| *p == next) {
                // path runs consumer -> producer; reverse it into edge direction
                let mut cycle: Vec<String> = path[pos..].iter().rev().map(|s| s.to_string()).collect();
                cycle.push(cycle[0].clone());
                return cycle;
            }
            path.push(next);
            current = next;
        }
    }

    /// Build `agent`'s input from its producers' outputs
    ///
    /// Roots get the session input. Otherwise the input is an object holding
    /// each edge's fields, or the whole output under the producer id for an
    /// edge without fields.
    pub fn project_input(
        &self,
        agent: &str,
        outputs: &BTreeMap<String, Value>,
        session_input: &Value,
    ) -> std::result::Result<Value, String> {
        let incoming = self.incoming(agent);
        if incoming.is_empty() {
            return Ok(session_input.clone());
        }

        let mut input = Map::new();
        for edge in incoming {
            let output = outputs
                .get(&edge.from)
                .ok_or_else(|| format!("no output from '{}'", edge.from))?;

            if edge.fields.is_empty() {
                input.insert(edge.from.clone(), output.clone());
                continue;
            }
            for field in &edge.fields {
                let value = output
                    .get(field)
                    .ok_or_else(|| format!("output of '{}' has no field '{}'", edge.from, field))?;
                input.insert(field.clone(), value.clone());
            }
        }
        Ok(Value::Object(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(agents: &[&str], edges: &[(&str, &str)]) -> WorkflowGraph {
        let mut graph = WorkflowGraph::new(agents.iter().copied());
        for (from, to) in edges {
            graph.add_edge(Edge::new(*from, *to));
        }
        graph
    }

    #[test]
    fn test_order_breaks_ties_by_id() {
        let g = graph(&["c", "b", "a", "d"], &[("c", "d"), ("a", "d")]);
        assert_eq!(g.topological_order().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_cycle_is_named() {
        let g = graph(&["a", "b", "c", "root"], &[("root", "a"), ("a", "b"), ("b", "c"), ("c", "a")]);
        match g.topological_order() {
            Err(AgentverseError::CyclicWorkflow { agents }) => {
                assert_eq!(agents.first(), agents.last());
                for id in ["a", "b", "c"] {
                    assert!(agents.iter().any(|x| x == id));
                }
                assert!(!agents.iter().any(|x| x == "root"));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_edge_and_unknown_agent_rejected() {
        assert!(graph(&["a"], &[("a", "a")]).topological_order().is_err());
        assert!(graph(&["a"], &[("a", "ghost")]).topological_order().is_err());
    }

    #[test]
    fn test_descendants_are_transitive() {
        let g = graph(&["a", "b", "c", "x"], &[("a", "b"), ("b", "c")]);
        assert_eq!(g.descendants("a"), BTreeSet::from(["b", "c"]));
        assert!(g.descendants("x").is_empty());
    }

    #[test]
    fn test_projection() {
        let mut g = WorkflowGraph::new(["calc", "stats", "writer"]);
        g.add_edge(Edge::new("calc", "writer").with_fields(["sum"]));
        g.add_edge(Edge::new("stats", "writer"));

        let outputs = BTreeMap::from([
            ("calc".to_string(), json!({"sum": 7, "terms": 2})),
            ("stats".to_string(), json!("mean is 3.5")),
        ]);
        let input = g.project_input("writer", &outputs, &json!("ignored")).unwrap();
        assert_eq!(input, json!({"sum": 7, "stats": "mean is 3.5"}));

        assert_eq!(g.project_input("calc", &outputs, &json!("start")).unwrap(), json!("start"));
    }

    #[test]
    fn test_projection_missing_field() {
        let mut g = WorkflowGraph::new(["calc", "writer"]);
        g.add_edge(Edge::new("calc", "writer").with_fields(["sum"]));
        let outputs = BTreeMap::from([("calc".to_string(), json!("seven"))]);
        let err = g.project_input("writer", &outputs, &Value::Null).unwrap_err();
        assert!(err.contains("no field 'sum'"));
    }
}
