//! Dependency cycle detection and reporting
//!
//! Cycles are found as strongly connected components, so two cycles sharing
//! a vertex come back as one group. Each group is then explained with the
//! shortest closed paths through it.

use crate::error::{CycleError, Error, Result};
use crate::graph::{quote, DirectedGraph, Direction, Vertex};
use petgraph::stable_graph::NodeIndex;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Most cycles spelled out in a report
pub const MAX_REPORTED_CYCLES: usize = 10;

/// Paths drawn per cycle in a cycle graph
pub const MAX_PATHS_PER_CYCLE: usize = 10;

/// Where a Tarjan frame is in visiting its vertex
enum Step {
    Enter,
    Children,
    /// Returned from the child at this node
    AfterChild(NodeIndex),
}

struct Frame {
    node: NodeIndex,
    step: Step,
    children: Vec<NodeIndex>,
}

impl Frame {
    fn new(node: NodeIndex) -> Self {
        Self {
            node,
            step: Step::Enter,
            children: Vec::new(),
        }
    }
}

/// Tarjan bookkeeping shared by every root
#[derive(Default)]
struct TarjanState {
    next_index: usize,
    index: HashMap<NodeIndex, usize>,
    lowlink: HashMap<NodeIndex, usize>,
    stack: Vec<NodeIndex>,
    on_stack: HashSet<NodeIndex>,
    components: Vec<Vec<NodeIndex>>,
}

impl TarjanState {
    fn lower(&mut self, node: NodeIndex, candidate: usize) {
        if let Some(low) = self.lowlink.get_mut(&node)
            && candidate < *low
        {
            *low = candidate;
        }
    }
}

impl<V: Vertex + Ord> DirectedGraph<V> {
    /// Every strongly connected component that contains a cycle
    ///
    /// Components with a single vertex only count when that vertex has an
    /// edge to itself. Each component is sorted and so is the list.
    pub fn find_cycles_in_graph(&self) -> Vec<Vec<V>> {
        let mut cycles: Vec<Vec<V>> = self
            .strongly_connected_components()
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|node| self.graph.find_edge(*node, *node).is_some())
            })
            .map(|component| {
                let mut members: Vec<V> = component
                    .into_iter()
                    .filter_map(|node| self.weight(node).cloned())
                    .collect();
                members.sort();
                members
            })
            .collect();

        cycles.sort();
        cycles
    }

    /// Tarjan's algorithm with its recursion kept on the heap
    ///
    /// Chains of any length are fine; the call stack never grows with the
    /// depth of the graph.
    fn strongly_connected_components(&self) -> Vec<Vec<NodeIndex>> {
        let mut state = TarjanState::default();
        for root in self.graph.node_indices() {
            if !state.index.contains_key(&root) {
                self.tarjan(root, &mut state);
            }
        }
        state.components
    }

    fn tarjan(&self, root: NodeIndex, state: &mut TarjanState) {
        let mut frames = vec![Frame::new(root)];

        while let Some(frame) = frames.last_mut() {
            let node = frame.node;
            match frame.step {
                Step::Enter => {
                    state.index.insert(node, state.next_index);
                    state.lowlink.insert(node, state.next_index);
                    state.next_index += 1;
                    state.stack.push(node);
                    state.on_stack.insert(node);

                    frame.children = self
                        .graph
                        .neighbors_directed(node, petgraph::Direction::Outgoing)
                        .collect();
                    frame.step = Step::Children;
                }
                Step::AfterChild(child) => {
                    let child_low = state.lowlink.get(&child).copied().unwrap_or(usize::MAX);
                    state.lower(node, child_low);
                    frame.step = Step::Children;
                }
                Step::Children => {
                    // children are listed newest edge first, so pop takes the oldest
                    if let Some(child) = frame.children.pop() {
                        match state.index.get(&child).copied() {
                            None => {
                                frame.step = Step::AfterChild(child);
                                frames.push(Frame::new(child));
                            }
                            Some(child_index) if state.on_stack.contains(&child) => {
                                state.lower(node, child_index);
                            }
                            Some(_) => {}
                        }
                        continue;
                    }

                    if state.lowlink.get(&node) == state.index.get(&node) {
                        let mut component = Vec::new();
                        while let Some(top) = state.stack.pop() {
                            state.on_stack.remove(&top);
                            component.push(top);
                            if top == node {
                                break;
                            }
                        }
                        state.components.push(component);
                    }
                    frames.pop();
                }
            }
        }
    }

    /// Closed paths through `cycle`, shortest first, at most `max_paths`
    ///
    /// Only edges between members of `cycle` are followed, starting from
    /// its first vertex. A path ends as soon as it revisits a vertex.
    pub fn paths_in_cycle(&self, cycle: &[V], max_paths: usize) -> Result<Vec<Vec<V>>> {
        if max_paths < 1 {
            return Err(Error::InvalidMaxPaths(max_paths));
        }
        let Some(start) = cycle.first() else {
            return Ok(Vec::new());
        };

        let members: HashSet<&V> = cycle.iter().collect();
        let mut found: Vec<Vec<V>> = Vec::new();
        let mut queue: VecDeque<(V, Vec<V>)> = VecDeque::from([(start.clone(), Vec::new())]);

        while let Some((vertex, mut path)) = queue.pop_front() {
            if path.contains(&vertex) {
                path.push(vertex);
                found.push(path);
                if found.len() >= max_paths {
                    break;
                }
                continue;
            }
            path.push(vertex.clone());
            for next in self.adjacent(&vertex, Direction::Out) {
                if members.contains(&next) {
                    queue.push_back((next, path.clone()));
                }
            }
        }

        found.sort();
        Ok(found)
    }

    /// Log and return every cycle in the graph as an error
    pub fn report_cycles_in_graph(&self) -> std::result::Result<(), CycleError<V>> {
        let cycles = self.find_cycles_in_graph();
        if cycles.is_empty() {
            return Ok(());
        }

        let count = cycles.len();
        let noun = if count == 1 { "cycle" } else { "cycles" };
        let mut message = format!("Found {count} dependency {noun}:\n");
        for cycle in cycles.iter().take(MAX_REPORTED_CYCLES) {
            for path in self.paths_in_cycle(cycle, 1).unwrap_or_default() {
                message.push_str(&format!("({})\n", join(&path)));
            }
        }
        if count > MAX_REPORTED_CYCLES {
            message.push_str(&format!(
                "... and {} more not shown\n",
                count - MAX_REPORTED_CYCLES
            ));
        }

        log::error!("{}", message.trim_end());
        Err(CycleError { cycles, message })
    }

    /// Render the paths through each cycle as a Graphviz digraph
    pub fn cycles_to_dot(&self, cycles: &[Vec<V>]) -> String {
        let mut edges: BTreeSet<(String, String)> = BTreeSet::new();
        for cycle in cycles.iter().take(MAX_REPORTED_CYCLES) {
            for path in self
                .paths_in_cycle(cycle, MAX_PATHS_PER_CYCLE)
                .unwrap_or_default()
            {
                for pair in path.windows(2) {
                    edges.insert((pair[0].to_string(), pair[1].to_string()));
                }
            }
        }

        let mut dot = String::from("digraph Resource_Cycles {\n    label = \"Resource Cycles\";\n");
        for (source, target) in edges {
            dot.push_str(&format!("    {} -> {};\n", quote(&source), quote(&target)));
        }
        dot.push_str("}\n");
        dot
    }
}

fn join<V: Vertex>(path: &[V]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" => ")
}
