//! Read-only traversals over the normalized graph: reachability, topological
//! order, strongly connected components, flow roots.
//!
//! All traversals use explicit stacks; script graphs get deep enough that
//! recursion is not an option.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::graph::{BlockId, CodeGraph, Transition};

/// A plain adjacency-set digraph used for the condensation.
#[derive(Debug, Clone, Default)]
pub struct PlainGraph {
    /// Adjacency sets, indexed by vertex.
    pub adj: Vec<BTreeSet<usize>>,
    /// Traversal colors.
    pub color: Vec<i32>,
    /// Finish-time order, last finished last.
    pub topsort: Vec<usize>,
}

impl PlainGraph {
    fn new(size: usize) -> PlainGraph {
        PlainGraph { adj: vec![BTreeSet::new(); size], color: vec![0; size], topsort: Vec::new() }
    }

    fn reset_color(&mut self) {
        self.color.iter_mut().for_each(|c| *c = 0);
    }

    fn topsort_dfs(&mut self, root: usize) {
        let mut stack: Vec<(usize, Vec<usize>, usize)> = Vec::new();
        self.color[root] = -1;
        stack.push((root, self.adj[root].iter().copied().collect(), 0));
        while let Some(frame) = stack.last_mut() {
            let (vertex, succs, next) = (frame.0, &frame.1, &mut frame.2);
            if *next < succs.len() {
                let to = succs[*next];
                *next += 1;
                if self.color[to] == 0 {
                    self.color[to] = -1;
                    let succs = self.adj[to].iter().copied().collect();
                    stack.push((to, succs, 0));
                }
            } else {
                self.topsort.push(vertex);
                self.color[vertex] = 2;
                stack.pop();
            }
        }
    }

    fn compute_topsort(&mut self) {
        self.topsort.clear();
        for vertex in 0..self.adj.len() {
            if self.color[vertex] == 0 {
                self.topsort_dfs(vertex);
            }
        }
    }

    fn mark_reachable(&mut self, root: usize) {
        let mut stack = vec![root];
        self.color[root] = 2;
        while let Some(vertex) = stack.pop() {
            let succs: Vec<usize> = self.adj[vertex].iter().copied().collect();
            for to in succs {
                if self.color[to] == 0 {
                    self.color[to] = 2;
                    stack.push(to);
                }
            }
        }
    }
}

/// The condensation: SCCs collapsed onto representative root vertices.
#[derive(Debug, Clone)]
pub struct Condensed {
    /// Adjacency between representative vertices, indexed by original
    /// vertex number.
    pub graph: PlainGraph,
    /// Representative vertex of the SCC each vertex belongs to.
    pub to_root: Vec<usize>,
    /// One representative per SCC, in discovery order.
    pub roots: Vec<usize>,
}

struct Frame {
    vertex: usize,
    neighbors: Vec<usize>,
    next: usize,
    depth: u32,
    size: u32,
    budget: i32,
}

/// Traversal state over one graph. Vertices are positions in the ascending
/// block-start order.
pub struct Visitor<'g> {
    graph: &'g CodeGraph,
    /// Skip callback edges during traversal.
    pub ignore_callbacks: bool,
    /// Skip special edges during traversal.
    pub ignore_special: bool,
    /// Warn when a queried offset is not exactly a block start.
    pub warn_imperfect_block_start: bool,
    size: usize,
    /// Vertex colors; 0 means unvisited.
    pub color: Vec<i32>,
    /// DFS tree parent per vertex (-1 for roots).
    pub parent: Vec<i32>,
    /// DFS entry times.
    pub tin: Vec<u32>,
    /// DFS exit times.
    pub tout: Vec<u32>,
    timer: u32,
    /// Finish-time order of the forward DFS forest.
    pub topsort: Vec<usize>,
    /// No back edge was seen during the topological sort.
    pub is_dag: bool,
    components_buffer: Vec<usize>,
    /// Non-trivial SCCs by color.
    pub non_trivial_components: BTreeMap<i32, BTreeSet<usize>>,
    /// Per-vertex cycle membership.
    pub belongs_to_cycle: Vec<bool>,
    /// The condensation, when a cyclic graph was condensed.
    pub condensed: Option<Condensed>,
    /// Source vertices with no outgoing edges.
    pub isolated: Vec<usize>,
    /// Source vertices with outgoing edges.
    pub sources: Vec<usize>,
    /// Non-source vertices with no outgoing edges.
    pub sinks: Vec<usize>,
    /// Flow roots in discovery order.
    pub roots: Vec<usize>,
    roots_set: HashSet<usize>,
    /// Indexes of SCCs entered from more than one outside block.
    pub multiple_entry_components: Vec<usize>,
    /// Total edge count.
    pub edges_count: usize,
    matched: HashSet<u32>,
}

impl<'g> Visitor<'g> {
    /// A visitor over `graph` with the default edge policies.
    pub fn new(graph: &'g CodeGraph) -> Visitor<'g> {
        let size = graph.len();
        Visitor {
            graph,
            ignore_callbacks: true,
            ignore_special: true,
            warn_imperfect_block_start: false,
            size,
            color: vec![0; size],
            parent: vec![0; size],
            tin: vec![0; size],
            tout: vec![0; size],
            timer: 0,
            topsort: Vec::new(),
            is_dag: true,
            components_buffer: Vec::new(),
            non_trivial_components: BTreeMap::new(),
            belongs_to_cycle: Vec::new(),
            condensed: None,
            isolated: Vec::new(),
            sources: Vec::new(),
            sinks: Vec::new(),
            roots: Vec::new(),
            roots_set: HashSet::new(),
            multiple_entry_components: Vec::new(),
            edges_count: 0,
            matched: HashSet::new(),
        }
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.size
    }

    /// The graph under analysis.
    pub fn graph(&self) -> &'g CodeGraph {
        self.graph
    }

    /// Whether the graph has no vertices.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The vertex number of a block.
    pub fn vertex(&self, id: BlockId) -> usize {
        self.graph.order_index(id)
    }

    /// The block behind a vertex number.
    pub fn block_id(&self, vertex: usize) -> BlockId {
        self.graph.order()[vertex]
    }

    /// The start offset behind a vertex number.
    pub fn offset_of(&self, vertex: usize) -> u32 {
        self.graph.starts()[vertex]
    }

    /// Mark blocks matched by the block matcher (rendered green).
    pub fn set_matched(&mut self, matched: HashSet<u32>) {
        self.matched = matched;
    }

    /// Matched block starts.
    pub fn matched(&self) -> &HashSet<u32> {
        &self.matched
    }

    /// Whether a vertex is a flow root.
    pub fn is_root(&self, vertex: usize) -> bool {
        self.roots_set.contains(&vertex)
    }

    fn skip(&self, flags: Transition) -> bool {
        (self.ignore_callbacks && flags.contains(Transition::CALLBACK))
            || (self.ignore_special && flags.contains(Transition::SPECIAL))
    }

    fn successors(&self, vertex: usize) -> Vec<usize> {
        self.graph
            .outgoing(self.block_id(vertex))
            .filter(|(_, edge)| !self.skip(edge.flags))
            .map(|(_, edge)| self.vertex(edge.to))
            .collect()
    }

    fn predecessors(&self, vertex: usize) -> Vec<usize> {
        self.graph
            .incoming(self.block_id(vertex))
            .filter(|(_, edge)| !self.skip(edge.flags))
            .map(|(_, edge)| self.vertex(edge.from))
            .collect()
    }

    /// Clear traversal colors.
    pub fn reset_color(&mut self) {
        self.color.iter_mut().for_each(|c| *c = 0);
    }

    fn enter(&mut self, vertex: usize, parent: i32) {
        self.tin[vertex] = self.timer;
        self.timer += 1;
        self.parent[vertex] = parent;
        self.color[vertex] = -1;
    }

    /// Forward DFS from `start`, coloring reached vertices. Returns the
    /// tree depth and the number of vertices reached. `maxdepth < 0` means
    /// unbounded.
    pub fn dfs(&mut self, start: usize, color: i32, maxdepth: i32) -> (u32, u32) {
        if maxdepth == 0 {
            return (0, 0);
        }
        self.enter(start, -1);
        let budget = if maxdepth < 0 { -1 } else { maxdepth - 1 };
        let mut stack = vec![Frame {
            vertex: start,
            neighbors: self.successors(start),
            next: 0,
            depth: 1,
            size: 1,
            budget,
        }];
        let mut result = (0, 0);
        while let Some(top) = stack.last_mut() {
            if top.next < top.neighbors.len() {
                let to = top.neighbors[top.next];
                top.next += 1;
                let budget = top.budget;
                let parent = top.vertex;
                if self.color[to] == 0 && budget != 0 {
                    self.enter(to, parent as i32);
                    let neighbors = self.successors(to);
                    stack.push(Frame {
                        vertex: to,
                        neighbors,
                        next: 0,
                        depth: 1,
                        size: 1,
                        budget: if budget < 0 { -1 } else { budget - 1 },
                    });
                }
            } else {
                let (vertex, depth, size) = (top.vertex, top.depth, top.size);
                self.tout[vertex] = self.timer;
                self.timer += 1;
                self.color[vertex] = color;
                stack.pop();
                match stack.last_mut() {
                    Some(parent) => {
                        parent.depth = parent.depth.max(depth + 1);
                        parent.size += size;
                    }
                    None => result = (depth, size),
                }
            }
        }
        result
    }

    /// Reverse DFS from `start`. Returns the number of vertices reached and
    /// the tree depth. With `make_component`, reached vertices accumulate
    /// in the component buffer.
    pub fn reverse_dfs(
        &mut self,
        start: usize,
        color: i32,
        make_component: bool,
        maxdepth: i32,
    ) -> (u32, u32) {
        if maxdepth == 0 {
            return (0, 0);
        }
        self.color[start] = color;
        if make_component {
            self.components_buffer.push(start);
        }
        let budget = if maxdepth < 0 { -1 } else { maxdepth - 1 };
        let mut stack = vec![Frame {
            vertex: start,
            neighbors: self.predecessors(start),
            next: 0,
            depth: 1,
            size: 1,
            budget,
        }];
        let mut result = (0, 0);
        while let Some(top) = stack.last_mut() {
            if top.next < top.neighbors.len() {
                let from = top.neighbors[top.next];
                top.next += 1;
                let budget = top.budget;
                if self.color[from] == 0 && budget != 0 {
                    self.color[from] = color;
                    if make_component {
                        self.components_buffer.push(from);
                    }
                    let neighbors = self.predecessors(from);
                    stack.push(Frame {
                        vertex: from,
                        neighbors,
                        next: 0,
                        depth: 1,
                        size: 1,
                        budget: if budget < 0 { -1 } else { budget - 1 },
                    });
                }
            } else {
                let (depth, size) = (top.depth, top.size);
                stack.pop();
                match stack.last_mut() {
                    Some(parent) => {
                        parent.depth = parent.depth.max(depth + 1);
                        parent.size += size;
                    }
                    None => result = (size, depth),
                }
            }
        }
        result
    }

    /// Color everything reachable from the block containing `offset`.
    pub fn find_reachable(&mut self, offset: u32, color: i32, maxdepth: i32) -> bool {
        if self.warn_imperfect_block_start && self.graph.block_at_start(offset).is_none() {
            tracing::warn!("the offset 0x{offset:X} does not correspond to any of the blocks");
            return false;
        }
        let Some((_, id)) = self.graph.block_by_offset(offset) else {
            tracing::warn!("the offset 0x{offset:X} does not correspond to any of the blocks");
            return false;
        };
        let vertex = self.vertex(id);
        self.dfs(vertex, color, maxdepth);
        true
    }

    /// Multi-source reachability; seed `i` colors its tree with `i + 1`.
    pub fn find_reachable_from(&mut self, offsets: &[u32], maxdepth: i32) {
        self.reset_color();
        for (index, &offset) in offsets.iter().enumerate() {
            self.find_reachable(offset, (index + 1) as i32, maxdepth);
        }
    }

    /// Color everything that reaches the block containing `offset`.
    pub fn find_parents(&mut self, offset: u32, color: i32, maxdepth: i32) -> bool {
        if self.warn_imperfect_block_start && self.graph.block_at_start(offset).is_none() {
            tracing::warn!("the offset 0x{offset:X} does not correspond to any of the blocks");
            return false;
        }
        let Some((_, id)) = self.graph.block_by_offset(offset) else {
            tracing::warn!("the offset 0x{offset:X} does not correspond to any of the blocks");
            return false;
        };
        let vertex = self.vertex(id);
        self.reverse_dfs(vertex, color, false, maxdepth);
        true
    }

    /// Multi-target ancestor search; seed `i` colors its tree with `i + 1`.
    pub fn find_parents_of(&mut self, offsets: &[u32], maxdepth: i32) {
        self.reset_color();
        for (index, &offset) in offsets.iter().enumerate() {
            self.find_parents(offset, (index + 1) as i32, maxdepth);
        }
    }

    fn topsort_dfs(&mut self, start: usize, color: i32) {
        self.color[start] = -1;
        let mut stack = vec![(start, self.successors(start), 0usize)];
        while let Some(frame) = stack.last_mut() {
            let (vertex, succs, next) = (frame.0, &frame.1, &mut frame.2);
            if *next < succs.len() {
                let to = succs[*next];
                *next += 1;
                if self.color[to] == -1 {
                    self.is_dag = false;
                } else if self.color[to] == 0 {
                    self.color[to] = -1;
                    let neighbors = self.successors(to);
                    stack.push((to, neighbors, 0));
                }
            } else {
                self.topsort.push(vertex);
                self.color[vertex] = color;
                stack.pop();
            }
        }
    }

    /// Finish-time topological order; returns whether the graph is a DAG.
    pub fn compute_topsort(&mut self) -> bool {
        for vertex in 0..self.size {
            if self.color[vertex] == 0 {
                self.topsort_dfs(vertex, 1);
            }
        }
        self.is_dag
    }

    /// Kosaraju's second pass: reverse DFS in reverse finish order. Returns
    /// `(color, size)` of every non-trivial component.
    pub fn kosaraju(&mut self, condense: bool) -> BTreeSet<(i32, u32)> {
        self.reset_color();
        let mut info = BTreeSet::new();
        let mut to_root: Vec<usize> = vec![usize::MAX; self.size];
        let mut roots: Vec<usize> = Vec::new();

        let order: Vec<usize> = self.topsort.iter().rev().copied().collect();
        for (index, vertex) in order.into_iter().enumerate() {
            if self.color[vertex] != 0 {
                continue;
            }
            let color = (index + 1) as i32;
            let (count, _) = self.reverse_dfs(vertex, color, condense, -1);
            if count > 1 {
                info.insert((color, count));
            }
            if condense {
                for &member in &self.components_buffer {
                    to_root[member] = vertex;
                }
                roots.push(vertex);
                self.components_buffer.clear();
            }
        }

        if condense {
            // Condensation edges come from the unfiltered edge set.
            let mut plain = PlainGraph::new(self.size);
            for vertex in 0..self.size {
                let id = self.block_id(vertex);
                for (_, edge) in self.graph.outgoing(id) {
                    let to = self.vertex(edge.to);
                    if to_root[vertex] != to_root[to] {
                        plain.adj[to_root[vertex]].insert(to_root[to]);
                    }
                }
            }
            self.condensed = Some(Condensed { graph: plain, to_root, roots });
        }
        info
    }

    /// Run Kosaraju and record cycle membership per vertex.
    pub fn find_components(&mut self, condense: bool) {
        let info = self.kosaraju(condense);
        let colors: HashSet<i32> = info.iter().map(|&(color, _)| color).collect();
        self.belongs_to_cycle = vec![false; self.size];
        self.non_trivial_components =
            info.iter().map(|&(color, _)| (color, BTreeSet::new())).collect();
        for vertex in 0..self.size {
            let color = self.color[vertex];
            if colors.contains(&color) {
                if let Some(members) = self.non_trivial_components.get_mut(&color) {
                    members.insert(vertex);
                }
                self.belongs_to_cycle[vertex] = true;
            }
        }
    }

    /// Classify vertices by the source flag and exit degree.
    pub fn compute_sources_sinks(&mut self) {
        for (vertex, (_, block)) in self.graph.blocks_in_order().enumerate() {
            if block.is_source {
                if block.exit.outgoing.is_empty() {
                    self.isolated.push(vertex);
                } else {
                    self.sources.push(vertex);
                }
            } else if block.exit.outgoing.is_empty() {
                self.sinks.push(vertex);
            }
        }
    }

    /// Total number of edges (outgoing and incoming agree).
    pub fn count_edges(&mut self) {
        let doubled: usize = self
            .graph
            .blocks_in_order()
            .map(|(_, block)| block.exit.outgoing.len() + block.entry().incoming.len())
            .sum();
        self.edges_count = doubled / 2;
    }

    fn push_root(&mut self, vertex: usize) {
        if self.roots_set.insert(vertex) {
            self.roots.push(vertex);
        }
    }

    /// Flow roots: sources and isolated vertices on a DAG; otherwise the
    /// DAG skeleton of the condensation is covered from its sources.
    pub fn find_roots(&mut self) {
        if self.is_dag {
            let seeds: Vec<usize> =
                self.isolated.iter().chain(self.sources.iter()).copied().collect();
            for vertex in seeds {
                self.push_root(vertex);
            }
            return;
        }
        let Some(condensed) = self.condensed.as_mut() else {
            tracing::warn!("flow-root search on a cyclic graph without a condensation");
            return;
        };
        condensed.graph.reset_color();
        condensed.graph.compute_topsort();
        condensed.graph.reset_color();
        let representatives: HashSet<usize> = condensed.roots.iter().copied().collect();
        let order: Vec<usize> = condensed
            .graph
            .topsort
            .iter()
            .rev()
            .copied()
            .filter(|vertex| representatives.contains(vertex))
            .collect();
        let mut found = Vec::new();
        for vertex in order {
            if condensed.graph.color[vertex] == 0 {
                found.push(vertex);
                condensed.graph.mark_reachable(vertex);
            }
        }
        for vertex in found {
            self.push_root(vertex);
        }
    }

    /// `|E| - |V| + 2`.
    pub fn cyclomatic(&self) -> i64 {
        self.edges_count as i64 - self.size as i64 + 2
    }

    /// `|E| - |V| + 1 + |roots|`, using the detected root set.
    pub fn cyclomatic_with_roots(&self) -> i64 {
        self.edges_count as i64 - self.size as i64 + 1 + self.roots.len() as i64
    }

    /// Record non-trivial components entered from more than one outside
    /// block.
    pub fn examine_loop_entries(&mut self) {
        let components: Vec<Vec<usize>> = self
            .non_trivial_components
            .values()
            .map(|members| members.iter().copied().collect())
            .collect();
        for (index, members) in components.iter().enumerate() {
            let inside: HashSet<usize> = members.iter().copied().collect();
            let mut entered = 0usize;
            for &vertex in members {
                let id = self.block_id(vertex);
                let external = self
                    .graph
                    .incoming(id)
                    .any(|(_, edge)| !inside.contains(&self.vertex(edge.from)));
                if external {
                    entered += 1;
                    if entered > 1 {
                        tracing::debug!("component {index} has multiple entry points");
                        self.multiple_entry_components.push(index);
                        break;
                    }
                }
            }
            if entered == 0 {
                tracing::debug!("component {index} contains a non-trivial flowgraph root");
            }
        }
    }

    /// The standard analysis pipeline: sources and sinks, edge count,
    /// topological sort, components and condensation when cyclic, flow
    /// roots, loop entries.
    pub fn analyze(&mut self) {
        self.compute_sources_sinks();
        self.count_edges();
        let is_dag = self.compute_topsort();
        tracing::debug!(
            vertices = self.size,
            edges = self.edges_count,
            is_dag,
            "control-flow graph surveyed"
        );
        if !is_dag {
            self.find_components(true);
        }
        self.find_roots();
        self.examine_loop_entries();
    }
}
