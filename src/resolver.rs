//! Inheritance resolution over a loaded subject graph.
//!
//! Resolution runs in two steps. [`SubjectGraph::load`] fetches the queried
//! subject and every ancestor reachable through parents that apply under the
//! active contexts; this is the only part that awaits the store. [`Resolver`]
//! then walks the loaded snapshots synchronously.
//!
//! The parent relation may contain cycles. Both steps keep a visited set keyed by
//! identity, so every subject is loaded and walked at most once per resolution.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{Query, Resolved};
use crate::error::PermissionsError;
use crate::storage::SubjectStore;
use crate::types::{ContextSet, SubjectData, SubjectIdentity, Weight};

/// Snapshots of one subject and its reachable ancestors, keyed by identity.
#[derive(Debug, Clone)]
pub struct SubjectGraph {
    root: SubjectIdentity,
    nodes: HashMap<SubjectIdentity, Arc<SubjectData>>,
    /// Every subject the load touched, in load order, unreadable ones included.
    dependencies: Vec<SubjectIdentity>,
    degraded: bool,
}

impl SubjectGraph {
    /// Load `root` and its ancestors applicable under `active`, breadth first.
    ///
    /// Failing to read `root` fails the load. An unreadable ancestor is logged and
    /// left out of the graph, so its branch contributes nothing.
    pub async fn load(
        store: &dyn SubjectStore,
        root: &SubjectIdentity,
        active: &ContextSet,
    ) -> Result<Self, PermissionsError> {
        let root_data = store.load(root).await?.data;

        let mut graph = SubjectGraph {
            root: root.clone(),
            nodes: HashMap::new(),
            dependencies: vec![root.clone()],
            degraded: false,
        };
        let mut seen: HashSet<SubjectIdentity> = HashSet::from([root.clone()]);
        let mut queue: VecDeque<SubjectIdentity> = VecDeque::new();
        graph.enqueue_parents(&root_data, active, &mut seen, &mut queue);
        graph.nodes.insert(root.clone(), root_data);

        while let Some(subject) = queue.pop_front() {
            graph.dependencies.push(subject.clone());
            match store.load(&subject).await {
                Ok(loaded) => {
                    graph.enqueue_parents(&loaded.data, active, &mut seen, &mut queue);
                    graph.nodes.insert(subject, loaded.data);
                }
                Err(e) => {
                    warn!(event = "Resolve", phase = "Graph", root = %root, ancestor = %subject, error = %e, "skipping unreadable ancestor");
                    graph.degraded = true;
                }
            }
        }

        debug!(event = "Resolve", phase = "Graph", root = %root, loaded = graph.nodes.len(), degraded = graph.degraded);
        Ok(graph)
    }

    /// Build a graph from snapshots already in hand. Subjects absent from `nodes`
    /// are treated as having no data.
    pub fn from_nodes<I>(root: SubjectIdentity, nodes: I) -> Self
    where
        I: IntoIterator<Item = (SubjectIdentity, SubjectData)>,
    {
        let nodes: HashMap<SubjectIdentity, Arc<SubjectData>> = nodes
            .into_iter()
            .map(|(subject, data)| (subject, Arc::new(data)))
            .collect();
        let mut dependencies: Vec<SubjectIdentity> = vec![root.clone()];
        dependencies.extend(nodes.keys().filter(|s| **s != root).cloned());
        SubjectGraph {
            root,
            nodes,
            dependencies,
            degraded: false,
        }
    }

    fn enqueue_parents(
        &self,
        data: &SubjectData,
        active: &ContextSet,
        seen: &mut HashSet<SubjectIdentity>,
        queue: &mut VecDeque<SubjectIdentity>,
    ) {
        for (_, segment) in data.applicable_segments(active) {
            for parent in segment.parents() {
                if seen.insert(parent.clone()) {
                    queue.push_back(parent.clone());
                }
            }
        }
    }

    pub fn root(&self) -> &SubjectIdentity {
        &self.root
    }

    pub fn get(&self, subject: &SubjectIdentity) -> Option<&Arc<SubjectData>> {
        self.nodes.get(subject)
    }

    /// Subjects whose writes can change a result computed from this graph.
    pub fn dependencies(&self) -> &[SubjectIdentity] {
        &self.dependencies
    }

    /// Whether some ancestor could not be read.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Answers queries about a graph's root under one active context set.
pub struct Resolver<'a> {
    graph: &'a SubjectGraph,
    active: &'a ContextSet,
}

impl<'a> Resolver<'a> {
    pub fn new(graph: &'a SubjectGraph, active: &'a ContextSet) -> Self {
        Resolver { graph, active }
    }

    pub fn answer(&self, query: &Query) -> Resolved {
        match query {
            Query::Permission(key) => Resolved::Permission(self.permission(key)),
            Query::Option(key) => Resolved::Option(self.option(key)),
            Query::Parents => Resolved::Parents(self.parents()),
        }
    }

    /// Effective weight of `key`: the first nonzero value along the priority walk,
    /// else the root's own default, else `0`.
    pub fn permission(&self, key: &str) -> Weight {
        let mut visited = HashSet::new();
        let found = self.first_match(self.graph.root(), &mut visited, &|data| {
            data.effective_permission(self.active, key)
        });
        if let Some(weight) = found {
            return weight;
        }

        self.graph
            .get(self.graph.root())
            .and_then(|data| data.effective_default(self.active))
            .unwrap_or(0)
    }

    /// Effective value of option `key`: the first value present along the priority walk.
    pub fn option(&self, key: &str) -> Option<String> {
        let mut visited = HashSet::new();
        self.first_match(self.graph.root(), &mut visited, &|data| {
            data.effective_option(self.active, key).map(str::to_string)
        })
    }

    /// Every ancestor in walk order, each listed once. The root is not included.
    pub fn parents(&self) -> Vec<SubjectIdentity> {
        let root = self.graph.root();
        let mut visited = HashSet::from([root.clone()]);
        let mut ordered = Vec::new();
        self.collect_parents(root, &mut visited, &mut ordered);
        ordered
    }

    fn first_match<T>(
        &self,
        subject: &SubjectIdentity,
        visited: &mut HashSet<SubjectIdentity>,
        direct: &dyn Fn(&SubjectData) -> Option<T>,
    ) -> Option<T> {
        if !visited.insert(subject.clone()) {
            debug!(event = "Resolve", phase = "Cycle", root = %self.graph.root(), subject = %subject);
            return None;
        }
        let data = self.graph.get(subject)?;

        if let Some(found) = direct(data) {
            debug!(event = "Resolve", phase = "Walk", root = %self.graph.root(), matched = %subject);
            return Some(found);
        }

        for (_, segment) in data.applicable_segments(self.active) {
            for parent in segment.parents() {
                if let Some(found) = self.first_match(parent, visited, direct) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn collect_parents(
        &self,
        subject: &SubjectIdentity,
        visited: &mut HashSet<SubjectIdentity>,
        ordered: &mut Vec<SubjectIdentity>,
    ) {
        let Some(data) = self.graph.get(subject) else {
            return;
        };
        for (_, segment) in data.applicable_segments(self.active) {
            for parent in segment.parents() {
                if visited.insert(parent.clone()) {
                    ordered.push(parent.clone());
                    self.collect_parents(parent, visited, ordered);
                }
            }
        }
    }
}
