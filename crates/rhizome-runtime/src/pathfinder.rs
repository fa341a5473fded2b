//! Next-hop selection and whole-route search.
//!
//! Memory and query signals follow full paths from the configured search
//! (A* unless set otherwise); everything else picks among the best-scoring
//! immediate neighbours. Computed paths are cached by `(current, target)`.
//! A cache entry is only a hint: it is checked against the live graph
//! before use and dropped when stale.
//!
//! Every weighted search costs a link at `1 / (strength + 0.1)`, so strong
//! connections are cheap. Links are traversable in both directions.

use crate::config::PathfinderConfig;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rhizome_core::topology::Topology;
use rhizome_core::types::{NodeId, SignalType};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tracing::debug;

/// Search strategy for whole-route queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathAlgorithm {
    #[default]
    AStar,
    Dijkstra,
    BreadthFirst,
    DepthFirst,
    /// Best-first keeping only the `beam_width` most promising partial paths.
    BeamSearch,
    /// Breadth-first from both ends until the frontiers meet.
    Bidirectional,
}

/// A route and what it costs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoundPath {
    pub nodes: Vec<NodeId>,
    pub cost: f64,
    pub algorithm: PathAlgorithm,
}

impl FoundPath {
    pub fn hops(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }
}

/// Structural summary of the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectivityReport {
    pub node_count: usize,
    pub connection_count: usize,
    pub average_degree: f64,
    pub components: usize,
    pub largest_component: usize,
    /// Longest fewest-hop distance within the largest component.
    pub diameter: usize,
    pub isolated_nodes: Vec<NodeId>,
}

type PathKey = (NodeId, NodeId);

pub struct Pathfinder {
    config: PathfinderConfig,
    cache: Mutex<HashMap<PathKey, Vec<NodeId>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    rng: Mutex<StdRng>,
}

impl Pathfinder {
    pub fn new(config: PathfinderConfig, rng: StdRng) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            rng: Mutex::new(rng),
        }
    }

    /// Candidate next hops from `current` towards `target`, best first.
    /// Nodes in `exclude` are never returned. Empty means no way forward.
    pub fn find_next_hops<G: Topology>(
        &self,
        graph: &G,
        current: &NodeId,
        target: &NodeId,
        signal_type: SignalType,
        exclude: &[NodeId],
    ) -> Vec<NodeId> {
        if let Some(next) = self.cached_next_hop(graph, current, target, exclude) {
            self.hits.fetch_add(1, AtomicOrdering::Relaxed);
            return vec![next];
        }
        self.misses.fetch_add(1, AtomicOrdering::Relaxed);

        if signal_type.wants_full_path() {
            return match self.search(graph, current, target, self.config.algorithm, exclude) {
                Some(path) if path.len() >= 2 => {
                    let next = path[1].clone();
                    self.cache_path(&path);
                    vec![next]
                }
                _ => Vec::new(),
            };
        }
        self.greedy(graph, current, target, exclude)
    }

    /// Run one search. Nodes in `exclude` other than the endpoints are
    /// treated as blocked.
    pub fn search<G: Topology>(
        &self,
        graph: &G,
        start: &NodeId,
        goal: &NodeId,
        algorithm: PathAlgorithm,
        exclude: &[NodeId],
    ) -> Option<Vec<NodeId>> {
        match algorithm {
            PathAlgorithm::AStar => a_star(graph, start, goal, exclude),
            PathAlgorithm::Dijkstra => dijkstra(graph, start, goal, exclude),
            PathAlgorithm::BreadthFirst => breadth_first(graph, start, goal, exclude),
            PathAlgorithm::DepthFirst => depth_first(graph, start, goal, exclude),
            PathAlgorithm::BeamSearch => {
                beam_search(graph, start, goal, exclude, self.config.beam_width)
            }
            PathAlgorithm::Bidirectional => bidirectional(graph, start, goal, exclude),
        }
    }

    /// A full route with its cost. Results are not cached: only the
    /// signal path uses the cache.
    pub fn find_path<G: Topology>(
        &self,
        graph: &G,
        start: &NodeId,
        goal: &NodeId,
        algorithm: PathAlgorithm,
    ) -> Option<FoundPath> {
        let nodes = self.search(graph, start, goal, algorithm, &[])?;
        let cost = path_cost(graph, &nodes)?;
        Some(FoundPath {
            nodes,
            cost,
            algorithm,
        })
    }

    /// A route visiting `waypoints` in order. Each leg uses `algorithm`;
    /// `None` if fewer than two waypoints are given or any leg is cut off.
    pub fn find_path_through<G: Topology>(
        &self,
        graph: &G,
        waypoints: &[NodeId],
        algorithm: PathAlgorithm,
    ) -> Option<FoundPath> {
        if waypoints.len() < 2 {
            return None;
        }
        let mut nodes = vec![waypoints[0].clone()];
        for leg in waypoints.windows(2) {
            let segment = self.search(graph, &leg[0], &leg[1], algorithm, &[])?;
            nodes.extend(segment.into_iter().skip(1));
        }
        let cost = path_cost(graph, &nodes)?;
        Some(FoundPath {
            nodes,
            cost,
            algorithm,
        })
    }

    fn cached_next_hop<G: Topology>(
        &self,
        graph: &G,
        current: &NodeId,
        target: &NodeId,
        exclude: &[NodeId],
    ) -> Option<NodeId> {
        let key = (current.clone(), target.clone());
        let mut cache = self.cache.lock();
        let next = cache.get(&key)?.get(1)?.clone();
        let valid = graph.contains_node(&next)
            && graph.connection_between(current, &next).is_some()
            && !exclude.contains(&next);
        if valid {
            Some(next)
        } else {
            debug!(current = %current, target = %target, "dropping stale cached path");
            cache.remove(&key);
            None
        }
    }

    /// Neighbours scored by `strength / (1 + distance_to_target)`. An
    /// adjacent target scores its bare connection strength.
    fn greedy<G: Topology>(
        &self,
        graph: &G,
        current: &NodeId,
        target: &NodeId,
        exclude: &[NodeId],
    ) -> Vec<NodeId> {
        let Some(target_pos) = graph.position(target) else {
            return Vec::new();
        };
        let mut scored: Vec<(NodeId, f64)> = graph
            .neighbors(current, true)
            .into_iter()
            .filter(|n| !exclude.contains(n))
            .filter_map(|n| {
                let strength = graph.connection_between(current, &n)?.strength;
                let distance = graph.position(&n)?.distance_to(&target_pos);
                Some((n, strength / (1.0 + distance)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(self.config.greedy_candidates);
        scored.into_iter().map(|(n, _)| n).collect()
    }

    /// Cache `path` and every suffix of it under its own start node.
    pub fn cache_path(&self, path: &[NodeId]) {
        let Some(target) = path.last() else {
            return;
        };
        let mut cache = self.cache.lock();
        for start in 0..path.len().saturating_sub(1) {
            cache.insert((path[start].clone(), target.clone()), path[start..].to_vec());
        }
    }

    pub fn cached_path(&self, from: &NodeId, to: &NodeId) -> Option<Vec<NodeId>> {
        self.cache.lock().get(&(from.clone(), to.clone())).cloned()
    }

    /// Evict a random `fraction` of the cache. Returns the number evicted.
    pub fn evict_random(&self, fraction: f64) -> usize {
        let mut cache = self.cache.lock();
        let count = ((cache.len() as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;
        if count == 0 {
            return 0;
        }
        let mut keys: Vec<PathKey> = cache.keys().cloned().collect();
        keys.sort();
        let victims: HashSet<usize> = sample(&mut *self.rng.lock(), keys.len(), count.min(keys.len()))
            .into_iter()
            .collect();
        for (i, key) in keys.into_iter().enumerate() {
            if victims.contains(&i) {
                cache.remove(&key);
            }
        }
        victims.len()
    }

    /// Evict when the cache has grown past its configured size.
    pub fn evict_if_over_capacity(&self) -> usize {
        if self.cache_len() <= self.config.cache_size {
            return 0;
        }
        self.evict_random(self.config.eviction_fraction)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

fn link_cost<G: Topology>(graph: &G, a: &NodeId, b: &NodeId) -> Option<f64> {
    graph
        .connection_between(a, b)
        .map(|c| 1.0 / (c.strength + 0.1))
}

/// Total link cost along `path`, `None` if two consecutive nodes are not
/// connected.
pub fn path_cost<G: Topology>(graph: &G, path: &[NodeId]) -> Option<f64> {
    path.windows(2).map(|w| link_cost(graph, &w[0], &w[1])).sum()
}

fn blocked(node: &NodeId, goal: &NodeId, exclude: &[NodeId]) -> bool {
    node != goal && exclude.contains(node)
}

/// Walk predecessor links back from `end` and return the path in order.
fn unwind(prev: &HashMap<NodeId, NodeId>, end: NodeId) -> Vec<NodeId> {
    let mut path = vec![end.clone()];
    let mut current = end;
    while let Some(p) = prev.get(&current) {
        path.push(p.clone());
        current = p.clone();
    }
    path.reverse();
    path
}

/// A* with the Euclidean distance to `goal` as heuristic.
pub fn a_star<G: Topology>(
    graph: &G,
    start: &NodeId,
    goal: &NodeId,
    exclude: &[NodeId],
) -> Option<Vec<NodeId>> {
    let goal_pos = graph.position(goal)?;
    cheapest_path(graph, start, goal, exclude, |id: &NodeId| {
        graph
            .position(id)
            .map_or(f64::INFINITY, |p| p.distance_to(&goal_pos))
    })
}

/// Lowest total link cost, no heuristic.
pub fn dijkstra<G: Topology>(
    graph: &G,
    start: &NodeId,
    goal: &NodeId,
    exclude: &[NodeId],
) -> Option<Vec<NodeId>> {
    cheapest_path(graph, start, goal, exclude, |_: &NodeId| 0.0)
}

fn cheapest_path<G: Topology>(
    graph: &G,
    start: &NodeId,
    goal: &NodeId,
    exclude: &[NodeId],
    heuristic: impl Fn(&NodeId) -> f64,
) -> Option<Vec<NodeId>> {
    graph.node(start)?;
    graph.node(goal)?;
    if start == goal {
        return Some(vec![start.clone()]);
    }

    // Min-heap on estimated total cost
    #[derive(PartialEq)]
    struct State {
        estimate: f64,
        node: NodeId,
    }
    impl Eq for State {}
    impl PartialOrd for State {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for State {
        fn cmp(&self, other: &Self) -> Ordering {
            other
                .estimate
                .total_cmp(&self.estimate)
                .then_with(|| other.node.cmp(&self.node))
        }
    }

    let mut cost: HashMap<NodeId, f64> = HashMap::from([(start.clone(), 0.0)]);
    let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
    let mut closed: HashSet<NodeId> = HashSet::new();
    let mut heap = BinaryHeap::new();
    heap.push(State {
        estimate: heuristic(start),
        node: start.clone(),
    });

    while let Some(State { node, .. }) = heap.pop() {
        if &node == goal {
            return Some(unwind(&prev, node));
        }
        if !closed.insert(node.clone()) {
            continue;
        }
        let base = cost.get(&node).copied().unwrap_or(f64::INFINITY);

        for next in graph.neighbors(&node, true) {
            if closed.contains(&next) || blocked(&next, goal, exclude) {
                continue;
            }
            let Some(step) = link_cost(graph, &node, &next) else {
                continue;
            };
            let next_cost = base + step;
            if next_cost < cost.get(&next).copied().unwrap_or(f64::INFINITY) {
                cost.insert(next.clone(), next_cost);
                prev.insert(next.clone(), node.clone());
                heap.push(State {
                    estimate: next_cost + heuristic(&next),
                    node: next,
                });
            }
        }
    }
    None
}

/// Fewest hops.
pub fn breadth_first<G: Topology>(
    graph: &G,
    start: &NodeId,
    goal: &NodeId,
    exclude: &[NodeId],
) -> Option<Vec<NodeId>> {
    graph.node(start)?;
    graph.node(goal)?;

    let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
    let mut seen: HashSet<NodeId> = HashSet::from([start.clone()]);
    let mut queue = VecDeque::from([start.clone()]);
    while let Some(node) = queue.pop_front() {
        if &node == goal {
            return Some(unwind(&prev, node));
        }
        for next in graph.neighbors(&node, true) {
            if blocked(&next, goal, exclude) || !seen.insert(next.clone()) {
                continue;
            }
            prev.insert(next.clone(), node.clone());
            queue.push_back(next);
        }
    }
    None
}

/// First route found going deep, lowest ids first. Not necessarily short.
pub fn depth_first<G: Topology>(
    graph: &G,
    start: &NodeId,
    goal: &NodeId,
    exclude: &[NodeId],
) -> Option<Vec<NodeId>> {
    graph.node(start)?;
    graph.node(goal)?;

    let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut stack: Vec<(NodeId, Option<NodeId>)> = vec![(start.clone(), None)];
    while let Some((node, parent)) = stack.pop() {
        if !visited.insert(node.clone()) {
            continue;
        }
        if let Some(parent) = parent {
            prev.insert(node.clone(), parent);
        }
        if &node == goal {
            return Some(unwind(&prev, node));
        }
        for next in graph.neighbors(&node, true).into_iter().rev() {
            if !visited.contains(&next) && !blocked(&next, goal, exclude) {
                stack.push((next, Some(node.clone())));
            }
        }
    }
    None
}

/// Level-by-level best-first search that keeps only the `width` partial
/// paths with the lowest cost plus distance to `goal`. Fast but may miss
/// routes a full search would find.
pub fn beam_search<G: Topology>(
    graph: &G,
    start: &NodeId,
    goal: &NodeId,
    exclude: &[NodeId],
    width: usize,
) -> Option<Vec<NodeId>> {
    let goal_pos = graph.position(goal)?;
    graph.node(start)?;
    let width = width.max(1);

    let mut beam: Vec<(f64, Vec<NodeId>)> = vec![(0.0, vec![start.clone()])];
    while !beam.is_empty() {
        let mut candidates: Vec<(f64, f64, Vec<NodeId>)> = Vec::new();
        for (cost, path) in &beam {
            let Some(current) = path.last() else {
                continue;
            };
            if current == goal {
                return Some(path.clone());
            }
            for next in graph.neighbors(current, true) {
                if path.contains(&next) || blocked(&next, goal, exclude) {
                    continue;
                }
                let (Some(step), Some(pos)) = (link_cost(graph, current, &next), graph.position(&next)) else {
                    continue;
                };
                let cost = cost + step;
                let mut extended = path.clone();
                extended.push(next);
                candidates.push((cost + pos.distance_to(&goal_pos), cost, extended));
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.2.cmp(&b.2)));
        candidates.truncate(width);
        beam = candidates
            .into_iter()
            .map(|(_, cost, path)| (cost, path))
            .collect();
    }
    None
}

/// Breadth-first from both ends, growing the smaller frontier one level
/// at a time until the two searches touch.
pub fn bidirectional<G: Topology>(
    graph: &G,
    start: &NodeId,
    goal: &NodeId,
    exclude: &[NodeId],
) -> Option<Vec<NodeId>> {
    graph.node(start)?;
    graph.node(goal)?;
    if start == goal {
        return Some(vec![start.clone()]);
    }

    let mut forward: HashMap<NodeId, NodeId> = HashMap::new();
    let mut backward: HashMap<NodeId, NodeId> = HashMap::new();
    let mut forward_seen: HashSet<NodeId> = HashSet::from([start.clone()]);
    let mut backward_seen: HashSet<NodeId> = HashSet::from([goal.clone()]);
    let mut front = vec![start.clone()];
    let mut back = vec![goal.clone()];

    while !front.is_empty() && !back.is_empty() {
        let meeting = if front.len() <= back.len() {
            grow_frontier(graph, &mut front, &mut forward, &mut forward_seen, &backward_seen, exclude)
        } else {
            grow_frontier(graph, &mut back, &mut backward, &mut backward_seen, &forward_seen, exclude)
        };
        if let Some(meeting) = meeting {
            let mut path = unwind(&forward, meeting.clone());
            let mut tail = unwind(&backward, meeting);
            tail.reverse();
            path.extend(tail.into_iter().skip(1));
            return Some(path);
        }
    }
    None
}

/// Expand `frontier` by one level. Returns the first node also reached
/// by the other side.
fn grow_frontier<G: Topology>(
    graph: &G,
    frontier: &mut Vec<NodeId>,
    prev: &mut HashMap<NodeId, NodeId>,
    seen: &mut HashSet<NodeId>,
    other_side: &HashSet<NodeId>,
    exclude: &[NodeId],
) -> Option<NodeId> {
    let mut level = Vec::new();
    let mut meeting = None;
    for node in frontier.iter() {
        for next in graph.neighbors(node, true) {
            let reached_other = other_side.contains(&next);
            if seen.contains(&next) || (exclude.contains(&next) && !reached_other) {
                continue;
            }
            seen.insert(next.clone());
            prev.insert(next.clone(), node.clone());
            if reached_other && meeting.is_none() {
                meeting = Some(next.clone());
            }
            level.push(next);
        }
    }
    *frontier = level;
    meeting
}

/// Up to `max_paths` simple routes of at most `max_hops` hops, cheapest
/// first. Enumeration stops once `max_paths` have been found, so on large
/// graphs these are the first routes found rather than the overall best.
pub fn find_all_paths<G: Topology>(
    graph: &G,
    start: &NodeId,
    goal: &NodeId,
    max_paths: usize,
    max_hops: usize,
) -> Vec<FoundPath> {
    let mut found = Vec::new();
    if max_paths == 0 || graph.node(start).is_none() || graph.node(goal).is_none() {
        return found;
    }
    let mut path = vec![start.clone()];
    collect_paths(graph, goal, max_paths, max_hops, &mut path, &mut found);
    found.sort_by(|a, b| {
        a.cost
            .total_cmp(&b.cost)
            .then_with(|| a.nodes.cmp(&b.nodes))
    });
    found
}

fn collect_paths<G: Topology>(
    graph: &G,
    goal: &NodeId,
    max_paths: usize,
    max_hops: usize,
    path: &mut Vec<NodeId>,
    found: &mut Vec<FoundPath>,
) {
    let Some(current) = path.last().cloned() else {
        return;
    };
    if &current == goal {
        if let Some(cost) = path_cost(graph, path) {
            found.push(FoundPath {
                nodes: path.clone(),
                cost,
                algorithm: PathAlgorithm::DepthFirst,
            });
        }
        return;
    }
    if path.len() > max_hops {
        return;
    }
    for next in graph.neighbors(&current, true) {
        if found.len() >= max_paths {
            return;
        }
        if path.contains(&next) {
            continue;
        }
        path.push(next);
        collect_paths(graph, goal, max_paths, max_hops, path, found);
        path.pop();
    }
}

/// Components, isolated nodes and the hop diameter of the largest
/// component. The diameter runs a breadth-first pass per node of that
/// component.
pub fn analyze_connectivity<G: Topology>(graph: &G) -> ConnectivityReport {
    let ids = graph.node_ids();
    let mut report = ConnectivityReport {
        node_count: ids.len(),
        connection_count: graph.connection_count(),
        ..ConnectivityReport::default()
    };
    if ids.is_empty() {
        return report;
    }

    let mut degree_sum = 0usize;
    let mut assigned: HashSet<NodeId> = HashSet::new();
    let mut largest: Vec<NodeId> = Vec::new();
    for id in &ids {
        let degree = graph.neighbors(id, true).len();
        degree_sum += degree;
        if degree == 0 {
            report.isolated_nodes.push(id.clone());
        }
        if assigned.contains(id) {
            continue;
        }
        let component: Vec<NodeId> = hop_distances(graph, id).into_keys().collect();
        assigned.extend(component.iter().cloned());
        report.components += 1;
        if component.len() > largest.len() {
            largest = component;
        }
    }

    report.average_degree = degree_sum as f64 / ids.len() as f64;
    report.largest_component = largest.len();
    report.diameter = largest
        .iter()
        .filter_map(|id| hop_distances(graph, id).into_values().max())
        .max()
        .unwrap_or(0);
    report
}

fn hop_distances<G: Topology>(graph: &G, from: &NodeId) -> HashMap<NodeId, usize> {
    let mut distance: HashMap<NodeId, usize> = HashMap::from([(from.clone(), 0)]);
    let mut queue = VecDeque::from([from.clone()]);
    while let Some(node) = queue.pop_front() {
        let hops = distance.get(&node).copied().unwrap_or(0);
        for next in graph.neighbors(&node, true) {
            if !distance.contains_key(&next) {
                distance.insert(next.clone(), hops + 1);
                queue.push_back(next);
            }
        }
    }
    distance
}
