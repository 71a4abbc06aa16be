//! Component graph: an arena of components keyed by name.
//!
//! Edges point from a component to the components it declares. The same name
//! declared twice resolves to one node; the first registration wins and any
//! disagreement is reported as a [`Conflict`].

use cube_scm::ScmKind;
use semver::Version;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

pub type NodeId = usize;

/// Where a component's declaration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// The program itself.
    Root,
    /// A `.lib` file.
    Lib { file: PathBuf },
    /// A package index release, requested from a `.codes` file or another release.
    Index { version: Version },
    /// Already present in the program tree with its own `.mk` descriptor.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub source: Source,
    pub path: PathBuf,
    pub url: Option<String>,
    pub rev: Option<String>,
    pub scm: Option<ScmKind>,
}

impl Component {
    /// Root node for a program directory.
    pub fn root(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            source: Source::Root,
            path,
            url: None,
            rev: None,
            scm: None,
        }
    }

    /// Whether synchronization manages this component's checkout.
    pub fn is_managed(&self) -> bool {
        matches!(self.source, Source::Lib { .. } | Source::Index { .. })
    }

    fn source_kind(&self) -> u8 {
        match self.source {
            Source::Root => 0,
            Source::Lib { .. } => 1,
            Source::Index { .. } => 2,
            Source::Local => 3,
        }
    }

    /// One-line description used in listings and conflict reports.
    pub fn describe(&self) -> String {
        match &self.source {
            Source::Root => self.name.clone(),
            Source::Local => format!("{} (local {})", self.name, self.path.display()),
            Source::Index { version } => format!("{} {}", self.name, version),
            Source::Lib { .. } => match &self.rev {
                Some(rev) => format!("{} @ {}", self.name, rev),
                None => self.name.clone(),
            },
        }
    }
}

fn same_url(a: Option<&str>, b: Option<&str>) -> bool {
    let norm = |u: &str| {
        let u = u.trim_end_matches('/');
        u.strip_suffix(".git").unwrap_or(u).to_string()
    };
    a.map(norm) == b.map(norm)
}

fn same_declaration(a: &Component, b: &Component) -> bool {
    a.source_kind() == b.source_kind()
        && same_url(a.url.as_deref(), b.url.as_deref())
        && a.rev == b.rev
        && a.path == b.path
        && match (&a.source, &b.source) {
            (Source::Index { version: va }, Source::Index { version: vb }) => va == vb,
            _ => true,
        }
}

/// Two declarations of one name that disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub name: String,
    pub kept: String,
    pub ignored: String,
}

/// Result of [`ComponentGraph::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert {
    New(NodeId),
    Existing {
        id: NodeId,
        conflict: Option<Conflict>,
    },
}

impl Insert {
    pub fn id(&self) -> NodeId {
        match self {
            Insert::New(id) | Insert::Existing { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComponentGraph {
    nodes: Vec<Component>,
    by_name: HashMap<String, NodeId>,
    edges: Vec<Vec<NodeId>>,
}

/// DFS state for cycle detection.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl ComponentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register a component, deduplicating by name.
    pub fn insert(&mut self, component: Component) -> Insert {
        if let Some(&id) = self.by_name.get(&component.name) {
            let existing = &self.nodes[id];
            let conflict = (!same_declaration(existing, &component)).then(|| Conflict {
                name: component.name.clone(),
                kept: existing.describe(),
                ignored: component.describe(),
            });
            return Insert::Existing { id, conflict };
        }
        let id = self.nodes.len();
        self.by_name.insert(component.name.clone(), id);
        self.nodes.push(component);
        self.edges.push(Vec::new());
        Insert::New(id)
    }

    pub fn get(&self, id: NodeId) -> &Component {
        &self.nodes[id]
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Component)> {
        self.nodes.iter().enumerate()
    }

    /// Add `from → to`. Returns false if the edge already existed.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        if self.edges[from].contains(&to) {
            return false;
        }
        self.edges[from].push(to);
        true
    }

    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        &self.edges[id]
    }

    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&n| self.edges[n].contains(&id))
            .collect()
    }

    /// First dependency cycle found, as names closed on the starting node
    /// (`a -> b -> a`).
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = Vec::new();
        for start in 0..self.nodes.len() {
            if marks[start] == Mark::Unvisited
                && let Some(cycle) = self.cycle_from(start, &mut marks, &mut stack)
            {
                return Some(cycle.iter().map(|&id| self.nodes[id].name.clone()).collect());
            }
        }
        None
    }

    fn cycle_from(
        &self,
        node: NodeId,
        marks: &mut [Mark],
        stack: &mut Vec<NodeId>,
    ) -> Option<Vec<NodeId>> {
        marks[node] = Mark::InProgress;
        stack.push(node);
        for &next in &self.edges[node] {
            match marks[next] {
                Mark::InProgress => {
                    let pos = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = stack[pos..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.cycle_from(next, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    /// All nodes with dependencies before their dependents, ties broken by
    /// insertion order. Fails with the offending cycle.
    pub fn topo_order(&self) -> Result<Vec<NodeId>, Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(cycle);
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());
        for start in 0..self.nodes.len() {
            if visited[start] {
                continue;
            }
            // Iterative post-order: (node, next edge index)
            let mut stack: Vec<(NodeId, usize)> = vec![(start, 0)];
            visited[start] = true;
            while let Some(top) = stack.last_mut() {
                let node = top.0;
                if let Some(&dep) = self.edges[node].get(top.1) {
                    top.1 += 1;
                    if !visited[dep] {
                        visited[dep] = true;
                        stack.push((dep, 0));
                    }
                } else {
                    order.push(node);
                    stack.pop();
                }
            }
        }
        Ok(order)
    }

    /// Indented dependency tree below `root`. Nodes already printed are marked
    /// `(*)` and not expanded again.
    pub fn render_tree(&self, root: NodeId) -> String {
        let mut out = String::new();
        let mut seen = vec![false; self.nodes.len()];
        self.render_node(root, 0, &mut seen, &mut out);
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, seen: &mut [bool], out: &mut String) {
        let indent = "  ".repeat(depth);
        if seen[id] {
            let _ = writeln!(out, "{}{} (*)", indent, self.nodes[id].describe());
            return;
        }
        seen[id] = true;
        let _ = writeln!(out, "{}{}", indent, self.nodes[id].describe());
        for &dep in &self.edges[id] {
            self.render_node(dep, depth + 1, seen, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib(name: &str, rev: &str) -> Component {
        Component {
            name: name.to_string(),
            source: Source::Lib {
                file: PathBuf::from(format!("/app/{name}.lib")),
            },
            path: PathBuf::from(format!("/app/{name}")),
            url: Some(format!("https://example.com/{name}.git")),
            rev: Some(rev.to_string()),
            scm: Some(ScmKind::Git),
        }
    }

    fn chain(names: &[&str]) -> (ComponentGraph, Vec<NodeId>) {
        let mut g = ComponentGraph::new();
        let ids: Vec<NodeId> = names.iter().map(|n| g.insert(lib(n, "v1")).id()).collect();
        for pair in ids.windows(2) {
            g.add_edge(pair[0], pair[1]);
        }
        (g, ids)
    }

    #[test]
    fn test_insert_dedupes_identical() {
        let mut g = ComponentGraph::new();
        assert_eq!(g.insert(lib("wifi", "v1")), Insert::New(0));
        // Declared from another .lib file with the same url/rev/path
        let mut again = lib("wifi", "v1");
        again.source = Source::Lib {
            file: PathBuf::from("/app/other/wifi.lib"),
        };
        again.url = Some("https://example.com/wifi/".to_string());
        assert_eq!(
            g.insert(again),
            Insert::Existing {
                id: 0,
                conflict: None
            }
        );
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_insert_reports_conflict_first_wins() {
        let mut g = ComponentGraph::new();
        g.insert(lib("wifi", "v1"));
        match g.insert(lib("wifi", "v2")) {
            Insert::Existing {
                id,
                conflict: Some(c),
            } => {
                assert_eq!(id, 0);
                assert_eq!(c.kept, "wifi @ v1");
                assert_eq!(c.ignored, "wifi @ v2");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(g.get(0).rev.as_deref(), Some("v1"));
    }

    #[test]
    fn test_edges_idempotent() {
        let (mut g, ids) = chain(&["a", "b"]);
        assert!(!g.add_edge(ids[0], ids[1]));
        assert_eq!(g.dependencies(ids[0]), &[ids[1]]);
        assert_eq!(g.dependents(ids[1]), vec![ids[0]]);
    }

    #[test]
    fn test_find_cycle() {
        let (mut g, ids) = chain(&["app", "a", "b", "c"]);
        assert!(g.find_cycle().is_none());
        g.add_edge(ids[3], ids[1]);
        assert_eq!(
            g.find_cycle().unwrap(),
            vec!["a".to_string(), "b".into(), "c".into(), "a".into()]
        );
    }

    #[test]
    fn test_self_cycle() {
        let (mut g, ids) = chain(&["a"]);
        g.add_edge(ids[0], ids[0]);
        assert_eq!(g.find_cycle().unwrap(), vec!["a", "a"]);
    }

    #[test]
    fn test_topo_order_dependencies_first() {
        let mut g = ComponentGraph::new();
        let app = g.insert(lib("app", "v1")).id();
        let wifi = g.insert(lib("wifi", "v1")).id();
        let lwip = g.insert(lib("lwip", "v1")).id();
        let ble = g.insert(lib("ble", "v1")).id();
        g.add_edge(app, wifi);
        g.add_edge(app, ble);
        g.add_edge(wifi, lwip);
        g.add_edge(ble, lwip);

        let order = g.topo_order().unwrap();
        assert_eq!(order, vec![lwip, wifi, ble, app]);
    }

    #[test]
    fn test_topo_order_rejects_cycle() {
        let (mut g, ids) = chain(&["a", "b"]);
        g.add_edge(ids[1], ids[0]);
        assert_eq!(g.topo_order().unwrap_err(), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_render_tree_marks_repeats() {
        let mut g = ComponentGraph::new();
        let app = g
            .insert(Component::root("app", PathBuf::from("/app")))
            .id();
        let wifi = g.insert(lib("wifi", "v1")).id();
        let lwip = g
            .insert(Component {
                name: "lwip".to_string(),
                source: Source::Index {
                    version: Version::new(2, 1, 0),
                },
                path: PathBuf::from("/app/components/lwip"),
                url: Some("https://example.com/lwip.git".to_string()),
                rev: None,
                scm: Some(ScmKind::Git),
            })
            .id();
        g.add_edge(app, wifi);
        g.add_edge(app, lwip);
        g.add_edge(wifi, lwip);

        assert_eq!(
            g.render_tree(app),
            "app\n  wifi @ v1\n    lwip 2.1.0\n  lwip 2.1.0 (*)\n"
        );
    }
}
