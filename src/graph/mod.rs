//! Deterministic graph runtime for agent workflows.
//!
//! A workflow is a directed graph of named async nodes over a typed
//! state struct. Nodes mutate the state directly (fields documented as
//! append-only are only ever extended); edges are either unconditional
//! or pick a label from the state and route through a label table.
//!
//! Graphs are validated at construction: the entry and every edge
//! target must exist, and the edge structure must be acyclic. At
//! runtime each node executes at most once per `invoke`; a revisit is
//! reported as a graph error rather than looping.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::error::AgentError;

/// Future returned by a node function.
pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AgentError>> + Send + 'a>>;

/// Coerces a node closure literal to the higher-ranked `Fn` bound
/// `node` requires. Closure literals don't infer a for-all lifetime
/// on their own from a `-> NodeFuture<'_>` annotation; binding through
/// a generic function signature (which does support HRTB) fixes that
/// without changing the closure's behavior.
pub fn hrtb_node<S, F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut S) -> NodeFuture<'a>,
{
    f
}

type NodeFn<S> = Box<dyn for<'a> Fn(&'a mut S) -> NodeFuture<'a> + Send + Sync>;
type RouterFn<S> = Box<dyn Fn(&S) -> &'static str + Send + Sync>;

/// Where an edge leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Continue with the named node.
    Node(&'static str),
    /// Terminate the invocation.
    End,
}

/// Outgoing edge of a node.
pub enum Edge<S> {
    /// Unconditionally continue with the named node.
    To(&'static str),
    /// Terminate after this node.
    End,
    /// Pick a label from the state and route through the table.
    Branch {
        /// Label selector, evaluated on the state after the node ran.
        decide: RouterFn<S>,
        /// Label → target table.
        routes: HashMap<&'static str, Target>,
    },
}

impl<S> Edge<S> {
    fn targets(&self) -> Vec<&'static str> {
        match self {
            Self::To(name) => vec![name],
            Self::End => Vec::new(),
            Self::Branch { routes, .. } => routes
                .values()
                .filter_map(|t| match t {
                    Target::Node(name) => Some(*name),
                    Target::End => None,
                })
                .collect(),
        }
    }
}

/// A compiled workflow graph.
pub struct Graph<S> {
    entry: &'static str,
    nodes: HashMap<&'static str, NodeFn<S>>,
    edges: HashMap<&'static str, Edge<S>>,
}

impl<S> std::fmt::Debug for Graph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("entry", &self.entry)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<S: Send> Graph<S> {
    /// Starts building a graph with the given entry node.
    #[must_use]
    pub fn builder(entry: &'static str) -> GraphBuilder<S> {
        GraphBuilder {
            entry,
            nodes: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    /// Runs the graph to completion on the given state.
    ///
    /// Nodes execute in a deterministic order consistent with the
    /// graph's topology; execution is single-threaded within one call.
    ///
    /// # Errors
    ///
    /// Propagates node failures and reports malformed routing
    /// (unknown node, unknown label, revisit) as [`AgentError::Graph`].
    pub async fn invoke(&self, state: &mut S) -> Result<(), AgentError> {
        let mut current = self.entry;
        let mut visited: HashSet<&'static str> = HashSet::new();

        loop {
            if !visited.insert(current) {
                return Err(AgentError::Graph {
                    message: format!("node '{current}' visited twice"),
                });
            }
            let node = self.nodes.get(current).ok_or_else(|| AgentError::Graph {
                message: format!("unknown node '{current}'"),
            })?;
            debug!(node = current, "executing graph node");
            node(state).await?;

            current = match self.edges.get(current) {
                None | Some(Edge::End) => return Ok(()),
                Some(Edge::To(next)) => next,
                Some(Edge::Branch { decide, routes }) => {
                    let label = decide(state);
                    match routes.get(label) {
                        Some(Target::Node(next)) => next,
                        Some(Target::End) => return Ok(()),
                        None => {
                            return Err(AgentError::Graph {
                                message: format!(
                                    "node '{current}' routed to unknown label '{label}'"
                                ),
                            });
                        }
                    }
                }
            };
        }
    }
}

/// Builder for [`Graph`].
pub struct GraphBuilder<S> {
    entry: &'static str,
    nodes: HashMap<&'static str, NodeFn<S>>,
    edges: HashMap<&'static str, Edge<S>>,
}

impl<S: Send> GraphBuilder<S> {
    /// Adds a node.
    #[must_use]
    pub fn node<F>(mut self, name: &'static str, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut S) -> NodeFuture<'a> + Send + Sync + 'static,
    {
        self.nodes.insert(name, Box::new(f));
        self
    }

    /// Adds an unconditional edge.
    #[must_use]
    pub fn edge(mut self, from: &'static str, to: &'static str) -> Self {
        self.edges.insert(from, Edge::To(to));
        self
    }

    /// Marks a node as terminal.
    #[must_use]
    pub fn terminal(mut self, from: &'static str) -> Self {
        self.edges.insert(from, Edge::End);
        self
    }

    /// Adds a conditional edge routing on a label computed from state.
    #[must_use]
    pub fn branch<F>(
        mut self,
        from: &'static str,
        decide: F,
        routes: &[(&'static str, Target)],
    ) -> Self
    where
        F: Fn(&S) -> &'static str + Send + Sync + 'static,
    {
        self.edges.insert(
            from,
            Edge::Branch {
                decide: Box::new(decide),
                routes: routes.iter().copied().collect(),
            },
        );
        self
    }

    /// Validates and compiles the graph.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Graph`] when the entry or an edge target
    /// is missing, or when the edge structure contains a cycle.
    pub fn build(self) -> Result<Graph<S>, AgentError> {
        if !self.nodes.contains_key(self.entry) {
            return Err(AgentError::Graph {
                message: format!("entry node '{}' not defined", self.entry),
            });
        }
        for (from, edge) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(AgentError::Graph {
                    message: format!("edge from unknown node '{from}'"),
                });
            }
            for target in edge.targets() {
                if !self.nodes.contains_key(target) {
                    return Err(AgentError::Graph {
                        message: format!("edge from '{from}' to unknown node '{target}'"),
                    });
                }
            }
        }
        self.check_acyclic()?;
        Ok(Graph {
            entry: self.entry,
            nodes: self.nodes,
            edges: self.edges,
        })
    }

    /// Rejects back-edges: every workflow must be a DAG.
    fn check_acyclic(&self) -> Result<(), AgentError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<S>(
            node: &'static str,
            edges: &HashMap<&'static str, Edge<S>>,
            marks: &mut HashMap<&'static str, Mark>,
        ) -> Result<(), AgentError> {
            match marks.get(node) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(AgentError::Graph {
                        message: format!("cycle detected through node '{node}'"),
                    });
                }
                None => {}
            }
            marks.insert(node, Mark::Visiting);
            if let Some(edge) = edges.get(node) {
                for target in edge.targets() {
                    visit(target, edges, marks)?;
                }
            }
            marks.insert(node, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        visit(self.entry, &self.edges, &mut marks)
    }
}
