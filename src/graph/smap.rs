/// Number of entries a map holds before it switches to indexed lookup.
const SPARSE_THRESHOLD: usize = 8;

/// Adaptive map from small `u16` keys to weight-slot indices.
///
/// Starts as an unsorted buffer scanned linearly; most vertices of a
/// difference-bound graph have only a handful of neighbors, so this is the
/// common case. The first time the map grows past [`SPARSE_THRESHOLD`] it
/// builds a direct-index table (`sparse[key]` = position in `dense`) and
/// keeps it for the rest of its life, even if the size later drops.
///
/// Invariant in sparse mode: for every live position `i`,
/// `sparse[dense[i].key] == i`. Entries of `sparse` not covered by that rule
/// are stale; lookups reject them by checking the dense slot's key, so the
/// table never needs to be cleared.
#[derive(Debug, Clone, Default)]
pub struct AdaptMap {
    dense: Vec<(u16, usize)>,
    sparse: Option<Vec<u16>>,
}

impl AdaptMap {
    pub fn new() -> AdaptMap {
        AdaptMap {
            dense: Vec::with_capacity(SPARSE_THRESHOLD),
            sparse: None,
        }
    }

    pub fn len(&self) -> usize {
        self.dense.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dense.is_empty()
    }

    /// Position of `key` in the dense buffer, if present.
    fn position(&self, key: u16) -> Option<usize> {
        match &self.sparse {
            Some(sparse) => {
                let idx = *sparse.get(key as usize)? as usize;
                (idx < self.dense.len() && self.dense[idx].0 == key).then_some(idx)
            }
            None => self.dense.iter().position(|&(k, _)| k == key),
        }
    }

    pub fn contains(&self, key: u16) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: u16) -> Option<usize> {
        self.position(key).map(|i| self.dense[i].1)
    }

    /// Insert a new binding.
    ///
    /// # Panics
    /// Panics if `key` is already present; bindings are updated by the owner
    /// rewriting the slot a value points at, never by re-inserting.
    pub fn insert(&mut self, key: u16, value: usize) {
        assert!(
            !self.contains(key),
            "AdaptMap: key {key} inserted while present"
        );
        if self.sparse.is_none() && self.dense.len() == SPARSE_THRESHOLD {
            self.build_sparse();
        }
        let pos = self.dense.len();
        self.dense.push((key, value));
        if let Some(sparse) = &mut self.sparse {
            if sparse.len() <= key as usize {
                let mut ub = sparse.len().max(1);
                while ub <= key as usize {
                    ub *= 2;
                }
                sparse.resize(ub, 0);
            }
            sparse[key as usize] = pos as u16;
        }
    }

    /// Remove a binding by swapping the last entry into its slot.
    ///
    /// # Panics
    /// Panics if `key` is absent.
    pub fn remove(&mut self, key: u16) {
        let pos = self
            .position(key)
            .unwrap_or_else(|| panic!("AdaptMap: removing absent key {key}"));
        self.dense.swap_remove(pos);
        if pos < self.dense.len() {
            let moved_key = self.dense[pos].0;
            if let Some(sparse) = &mut self.sparse {
                sparse[moved_key as usize] = pos as u16;
            }
        }
    }

    /// Drop all bindings. The map stays in whichever mode it reached.
    pub fn clear(&mut self) {
        self.dense.clear();
    }

    /// `(key, value)` pairs in insertion order modulo swap-removes.
    pub fn iter(&self) -> impl Iterator<Item = (u16, usize)> + '_ {
        self.dense.iter().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = u16> + '_ {
        self.dense.iter().map(|&(k, _)| k)
    }

    fn build_sparse(&mut self) {
        let max_key = self.keys().max().unwrap_or(0) as usize;
        let mut sparse = vec![0u16; max_key + 1];
        for (pos, &(k, _)) in self.dense.iter().enumerate() {
            sparse[k as usize] = pos as u16;
        }
        self.sparse = Some(sparse);
    }
}
