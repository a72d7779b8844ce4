use std::collections::{BTreeMap, BTreeSet, HashMap};

use stardag_config::{Edge, NodeSpec, OperatorDef, PipelineDef};

use crate::error::GraphError;
use crate::node::{NodeState, TaskNode};

/// A validated, acyclic task graph.
#[derive(Debug, Clone)]
pub struct TaskGraph {
  nodes: BTreeMap<String, TaskNode>,
  /// Deterministic topological order, computed at build time.
  order: Vec<String>,
}

impl TaskGraph {
  /// Build a graph from nodes and edges, validating it on the way.
  pub fn build(nodes: Vec<NodeSpec>, edges: &[Edge]) -> Result<Self, GraphError> {
    let mut graph_nodes: BTreeMap<String, TaskNode> = BTreeMap::new();

    for spec in nodes {
      if graph_nodes.contains_key(&spec.node_id) {
        return Err(GraphError::DuplicateIdentity {
          node_id: spec.node_id,
        });
      }
      graph_nodes.insert(
        spec.node_id.clone(),
        TaskNode {
          node_id: spec.node_id,
          operator: spec.operator,
          retry: spec.retry,
          upstream: BTreeSet::new(),
          downstream: BTreeSet::new(),
        },
      );
    }

    for edge in edges {
      for endpoint in [&edge.from, &edge.to] {
        if !graph_nodes.contains_key(endpoint) {
          return Err(GraphError::DanglingEdge {
            from: edge.from.clone(),
            to: edge.to.clone(),
            missing: endpoint.clone(),
          });
        }
      }
      if let Some(node) = graph_nodes.get_mut(&edge.from) {
        node.downstream.insert(edge.to.clone());
      }
      if let Some(node) = graph_nodes.get_mut(&edge.to) {
        node.upstream.insert(edge.from.clone());
      }
    }

    let order = topological_sort(&graph_nodes)?;
    let graph = Self {
      nodes: graph_nodes,
      order,
    };
    graph.check_quality_guards()?;

    Ok(graph)
  }

  /// Apply the pipeline's run defaults and build its graph.
  pub fn from_pipeline(pipeline: &PipelineDef) -> Result<Self, GraphError> {
    Self::build(pipeline.apply_defaults(), &pipeline.edges)
  }

  /// Get a node by ID.
  pub fn get(&self, node_id: &str) -> Option<&TaskNode> {
    self.nodes.get(node_id)
  }

  /// Iterate nodes in topological order.
  pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
    self.order.iter().filter_map(|id| self.nodes.get(id))
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn contains(&self, node_id: &str) -> bool {
    self.nodes.contains_key(node_id)
  }

  /// Every node appears after all of its upstream nodes.
  pub fn topological_order(&self) -> &[String] {
    &self.order
  }

  /// Nodes with no upstream.
  pub fn entry_points(&self) -> Vec<&str> {
    self
      .nodes()
      .filter(|n| n.upstream.is_empty())
      .map(|n| n.node_id.as_str())
      .collect()
  }

  /// Nodes with no downstream.
  pub fn exit_points(&self) -> Vec<&str> {
    self
      .nodes()
      .filter(|n| n.downstream.is_empty())
      .map(|n| n.node_id.as_str())
      .collect()
  }

  /// Get upstream nodes for a given node.
  pub fn upstream(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self
      .nodes
      .get(node_id)
      .into_iter()
      .flat_map(|n| n.upstream.iter().map(String::as_str))
  }

  /// Get downstream nodes for a given node.
  pub fn downstream(&self, node_id: &str) -> impl Iterator<Item = &str> {
    self
      .nodes
      .get(node_id)
      .into_iter()
      .flat_map(|n| n.downstream.iter().map(String::as_str))
  }

  /// Nodes in state `Pending` whose every upstream is `Succeeded`.
  ///
  /// Nodes missing from `states` count as `Pending`. The result follows the
  /// topological order.
  pub fn ready_set(&self, states: &HashMap<String, NodeState>) -> Vec<String> {
    let state_of = |id: &str| states.get(id).copied().unwrap_or(NodeState::Pending);

    self
      .nodes()
      .filter(|node| state_of(&node.node_id) == NodeState::Pending)
      .filter(|node| {
        node
          .upstream
          .iter()
          .all(|up| state_of(up) == NodeState::Succeeded)
      })
      .map(|node| node.node_id.clone())
      .collect()
  }

  /// All nodes reachable from `node_id`, excluding itself.
  pub fn descendants(&self, node_id: &str) -> BTreeSet<String> {
    self.reachable(node_id, |n| &n.downstream)
  }

  /// All nodes from which `node_id` is reachable, excluding itself.
  pub fn ancestors(&self, node_id: &str) -> BTreeSet<String> {
    self.reachable(node_id, |n| &n.upstream)
  }

  /// Whether there is a directed path from `from` to `to`.
  pub fn has_path(&self, from: &str, to: &str) -> bool {
    self.descendants(from).contains(to)
  }

  fn reachable<F>(&self, node_id: &str, next: F) -> BTreeSet<String>
  where
    F: Fn(&TaskNode) -> &BTreeSet<String>,
  {
    let mut seen = BTreeSet::new();
    let mut stack = vec![node_id.to_string()];

    while let Some(id) = stack.pop() {
      let Some(node) = self.nodes.get(&id) else {
        continue;
      };
      for neighbour in next(node) {
        if seen.insert(neighbour.clone()) {
          stack.push(neighbour.clone());
        }
      }
    }

    seen
  }

  /// A quality check may only run once every fact/dimension load of a table
  /// it audits has succeeded, so each such load must be one of its ancestors.
  fn check_quality_guards(&self) -> Result<(), GraphError> {
    for node in self.nodes() {
      let OperatorDef::QualityCheck(check) = &node.operator else {
        continue;
      };
      let ancestors = self.ancestors(&node.node_id);

      for load in self.nodes().filter(|n| n.operator.is_warehouse_load()) {
        let Some(target) = load.operator.target_table() else {
          continue;
        };
        let audited = check
          .tables
          .keys()
          .any(|table| unqualified(table) == unqualified(target));

        if audited && !ancestors.contains(&load.node_id) {
          return Err(GraphError::UnguardedQualityCheck {
            node_id: node.node_id.clone(),
            load_node_id: load.node_id.clone(),
            table: target.to_string(),
          });
        }
      }
    }

    Ok(())
  }
}

/// Table name without its schema prefix.
fn unqualified(table: &str) -> &str {
  table.rsplit('.').next().unwrap_or(table)
}

/// Kahn's algorithm; ties are broken by node ID so the order is deterministic.
fn topological_sort(nodes: &BTreeMap<String, TaskNode>) -> Result<Vec<String>, GraphError> {
  let mut in_degree: BTreeMap<&str, usize> = nodes
    .values()
    .map(|n| (n.node_id.as_str(), n.upstream.len()))
    .collect();

  let mut queue: BTreeSet<&str> = in_degree
    .iter()
    .filter(|(_, degree)| **degree == 0)
    .map(|(id, _)| *id)
    .collect();

  let mut order = Vec::with_capacity(nodes.len());

  while let Some(id) = queue.pop_first() {
    order.push(id.to_string());
    for down in &nodes[id].downstream {
      if let Some(degree) = in_degree.get_mut(down.as_str()) {
        *degree -= 1;
        if *degree == 0 {
          queue.insert(down.as_str());
        }
      }
    }
  }

  if order.len() < nodes.len() {
    let remaining = in_degree
      .into_iter()
      .filter(|(_, degree)| *degree > 0)
      .map(|(id, _)| id.to_string())
      .collect();
    return Err(GraphError::Cycle { nodes: remaining });
  }

  Ok(order)
}
