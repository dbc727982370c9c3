use std::fmt;

use super::{AdaptMap, SafeI64};

/// Directed graph over dense small-integer vertex ids with [`SafeI64`] edge
/// weights, the storage substrate for a difference-bound matrix.
///
/// Each vertex carries a successor and a predecessor [`AdaptMap`]; both map a
/// neighbor id to the same index into one shared flat weight vector. Forgotten
/// vertices go on a free list and are handed back by [`new_vertex`]; freed
/// weight slots likewise, so peak memory stays bounded under the add/forget
/// churn of repeated closure.
///
/// Invariants:
/// - `succs[s]` contains `d` iff `preds[d]` contains `s`, and both map to the
///   same weight index
/// - ids on the free list have `is_free` set and no incident edges
///
/// [`new_vertex`]: AdaptGraph::new_vertex
#[derive(Debug, Clone, Default)]
pub struct AdaptGraph {
    succs: Vec<AdaptMap>,
    preds: Vec<AdaptMap>,
    weights: Vec<SafeI64>,
    edge_count: usize,
    is_free: Vec<bool>,
    free_ids: Vec<usize>,
    free_widx: Vec<usize>,
}

impl AdaptGraph {
    pub fn new() -> AdaptGraph {
        AdaptGraph::default()
    }

    /// Number of vertex slots, live or free.
    pub fn num_vertices(&self) -> usize {
        self.succs.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count == 0
    }

    /// Number of allocated weight slots, live or free. Exposed so callers can
    /// observe that forget/add churn reuses slots instead of growing.
    pub fn weight_slots(&self) -> usize {
        self.weights.len()
    }

    /// Allocate a vertex id, preferring recycled ones.
    pub fn new_vertex(&mut self) -> usize {
        if let Some(v) = self.free_ids.pop() {
            debug_assert!(self.is_free[v]);
            self.is_free[v] = false;
            return v;
        }
        let v = self.succs.len();
        self.succs.push(AdaptMap::new());
        self.preds.push(AdaptMap::new());
        self.is_free.push(false);
        v
    }

    /// Allocate vertices until the graph has at least `n` slots.
    pub fn grow_to(&mut self, n: usize) {
        while self.num_vertices() < n {
            self.new_vertex();
        }
    }

    /// Detach `v` from every neighbor, recycle its weight slots, and return
    /// its id to the free list. No-op on an already-free vertex.
    pub fn forget(&mut self, v: usize) {
        if self.is_free[v] {
            return;
        }

        let out: Vec<(u16, usize)> = self.succs[v].iter().collect();
        for (d, widx) in out {
            self.free_widx.push(widx);
            self.preds[d as usize].remove(v as u16);
        }
        self.edge_count -= self.succs[v].len();
        self.succs[v].clear();

        let inc: Vec<(u16, usize)> = self.preds[v].iter().collect();
        for (s, widx) in inc {
            self.free_widx.push(widx);
            self.succs[s as usize].remove(v as u16);
        }
        self.edge_count -= self.preds[v].len();
        self.preds[v].clear();

        self.is_free[v] = true;
        self.free_ids.push(v);
    }

    /// Drop every edge but keep all vertices live.
    pub fn clear_edges(&mut self) {
        self.weights.clear();
        self.free_widx.clear();
        for v in 0..self.succs.len() {
            self.succs[v].clear();
            self.preds[v].clear();
        }
        self.edge_count = 0;
    }

    pub fn clear(&mut self) {
        self.succs.clear();
        self.preds.clear();
        self.weights.clear();
        self.is_free.clear();
        self.free_ids.clear();
        self.free_widx.clear();
        self.edge_count = 0;
    }

    pub fn contains_edge(&self, s: usize, d: usize) -> bool {
        self.succs[s].contains(d as u16)
    }

    /// Weight of the edge `s → d`.
    ///
    /// # Panics
    /// Panics if the edge does not exist.
    pub fn edge_val(&self, s: usize, d: usize) -> SafeI64 {
        let widx = self.succs[s]
            .get(d as u16)
            .unwrap_or_else(|| panic!("AdaptGraph: no edge {s} -> {d}"));
        self.weights[widx]
    }

    pub fn lookup(&self, s: usize, d: usize) -> Option<SafeI64> {
        self.succs[s].get(d as u16).map(|widx| self.weights[widx])
    }

    pub fn lookup_mut(&mut self, s: usize, d: usize) -> Option<&mut SafeI64> {
        let widx = self.succs[s].get(d as u16)?;
        Some(&mut self.weights[widx])
    }

    /// Insert the edge `s → d` with weight `w`.
    ///
    /// # Panics
    /// Panics if the edge already exists; use [`update_edge`] or [`set_edge`]
    /// when presence is unknown.
    ///
    /// [`update_edge`]: AdaptGraph::update_edge
    /// [`set_edge`]: AdaptGraph::set_edge
    pub fn add_edge(&mut self, s: usize, w: SafeI64, d: usize) {
        assert!(
            !self.contains_edge(s, d),
            "AdaptGraph: edge {s} -> {d} added twice"
        );
        let widx = match self.free_widx.pop() {
            Some(widx) => {
                self.weights[widx] = w;
                widx
            }
            None => {
                self.weights.push(w);
                self.weights.len() - 1
            }
        };
        self.succs[s].insert(d as u16, widx);
        self.preds[d].insert(s as u16, widx);
        self.edge_count += 1;
    }

    /// Relax the edge `s → d` toward `w`: the resulting weight is
    /// `min(existing, w)`, with a missing edge counting as +∞.
    pub fn update_edge(&mut self, s: usize, w: SafeI64, d: usize) {
        match self.succs[s].get(d as u16) {
            Some(widx) => self.weights[widx] = self.weights[widx].min(w),
            None => self.add_edge(s, w, d),
        }
    }

    /// Insert or overwrite the edge `s → d` with weight `w`.
    pub fn set_edge(&mut self, s: usize, w: SafeI64, d: usize) {
        match self.succs[s].get(d as u16) {
            Some(widx) => self.weights[widx] = w,
            None => self.add_edge(s, w, d),
        }
    }

    /// Live vertex ids, skipping free slots.
    pub fn verts(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.is_free.len()).filter(|&v| !self.is_free[v])
    }

    pub fn succs(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.succs[v].keys().map(usize::from)
    }

    pub fn preds(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.preds[v].keys().map(usize::from)
    }

    /// Outgoing edges of `v` as `(target, weight)` pairs.
    pub fn e_succs(&self, v: usize) -> impl Iterator<Item = (usize, SafeI64)> + '_ {
        self.succs[v]
            .iter()
            .map(|(d, widx)| (d as usize, self.weights[widx]))
    }

    /// Incoming edges of `v` as `(source, weight)` pairs.
    pub fn e_preds(&self, v: usize) -> impl Iterator<Item = (usize, SafeI64)> + '_ {
        self.preds[v]
            .iter()
            .map(|(s, widx)| (s as usize, self.weights[widx]))
    }
}

impl fmt::Display for AdaptGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[|")?;
        let mut first = true;
        for v in self.verts() {
            if self.succs[v].is_empty() {
                continue;
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "[v{v} ->")?;
            for (d, w) in self.e_succs(v) {
                write!(f, " ({w}:{d})")?;
            }
            write!(f, "]")?;
        }
        write!(f, "|]")
    }
}
