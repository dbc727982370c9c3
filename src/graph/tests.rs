use super::*;

#[test]
fn safeint_saturates_instead_of_wrapping() {
    let big = SafeI64::new(i64::MAX - 1);
    assert_eq!(big + SafeI64::new(10), SafeI64::INFINITY);
    let small = SafeI64::new(i64::MIN + 1);
    assert_eq!(small - SafeI64::new(10), SafeI64::NEG_INFINITY);
}

#[test]
fn safeint_infinity_absorbs() {
    assert_eq!(SafeI64::INFINITY + SafeI64::new(-5), SafeI64::INFINITY);
    assert_eq!(SafeI64::NEG_INFINITY + SafeI64::new(5), SafeI64::NEG_INFINITY);
    assert_eq!(SafeI64::INFINITY + SafeI64::INFINITY, SafeI64::INFINITY);
}

#[test]
#[should_panic(expected = "opposite infinities")]
fn safeint_opposite_infinities_trap() {
    let _ = SafeI64::INFINITY + SafeI64::NEG_INFINITY;
}

#[test]
fn safeint_ordering() {
    let fin = SafeI64::new(3);
    assert!(SafeI64::NEG_INFINITY < fin);
    assert!(fin < SafeI64::INFINITY);
    assert_eq!(SafeI64::INFINITY.min(fin), fin);
    assert_eq!(-SafeI64::INFINITY, SafeI64::NEG_INFINITY);
}

#[test]
fn smap_dense_mode_basics() {
    let mut m = AdaptMap::new();
    assert!(m.is_empty());
    m.insert(3, 30);
    m.insert(7, 70);
    assert_eq!(m.len(), 2);
    assert_eq!(m.get(3), Some(30));
    assert_eq!(m.get(7), Some(70));
    assert_eq!(m.get(4), None);
    m.remove(3);
    assert_eq!(m.get(3), None);
    assert_eq!(m.len(), 1);
}

#[test]
fn smap_switches_to_sparse_and_stays() {
    let mut m = AdaptMap::new();
    // One past the dense threshold forces the indexed mode.
    for k in 0..9u16 {
        m.insert(k * 11, k as usize);
    }
    assert_eq!(m.len(), 9);
    for k in 0..9u16 {
        assert_eq!(m.get(k * 11), Some(k as usize));
    }
    // Shrinking back below the threshold must not lose the index.
    for k in 0..8u16 {
        m.remove(k * 11);
    }
    assert_eq!(m.len(), 1);
    assert_eq!(m.get(88), Some(8));
    assert!(!m.contains(0));
    // Large keys after the switch grow the index table.
    m.insert(60_000, 99);
    assert_eq!(m.get(60_000), Some(99));
}

#[test]
fn smap_swap_remove_keeps_index_consistent() {
    let mut m = AdaptMap::new();
    for k in 0..12u16 {
        m.insert(k, k as usize * 2);
    }
    m.remove(0); // last entry (11) swaps into slot 0
    assert_eq!(m.get(11), Some(22));
    for k in 1..12u16 {
        assert_eq!(m.get(k), Some(k as usize * 2));
    }
    let live: Vec<u16> = m.keys().collect();
    assert_eq!(live.len(), 11);
}

#[test]
#[should_panic(expected = "inserted while present")]
fn smap_double_insert_is_a_bug() {
    let mut m = AdaptMap::new();
    m.insert(1, 1);
    m.insert(1, 2);
}

#[test]
fn graph_edge_symmetry() {
    let mut g = AdaptGraph::new();
    g.grow_to(3);
    g.add_edge(0, SafeI64::new(5), 1);
    g.add_edge(1, SafeI64::new(2), 2);
    assert!(g.contains_edge(0, 1));
    assert_eq!(g.preds(1).collect::<Vec<_>>(), vec![0]);
    assert_eq!(g.succs(0).collect::<Vec<_>>(), vec![1]);
    assert_eq!(g.edge_val(0, 1), SafeI64::new(5));
    assert_eq!(g.num_edges(), 2);
}

#[test]
fn graph_update_edge_relaxes_to_minimum() {
    let mut g = AdaptGraph::new();
    g.grow_to(3);
    g.add_edge(0, SafeI64::new(5), 1);
    g.update_edge(0, SafeI64::new(3), 1);
    assert_eq!(g.edge_val(0, 1), SafeI64::new(3));
    g.update_edge(0, SafeI64::new(7), 1);
    assert_eq!(g.edge_val(0, 1), SafeI64::new(3));
    // On a missing edge the relaxation is against +oo.
    g.update_edge(1, SafeI64::new(9), 2);
    assert_eq!(g.edge_val(1, 2), SafeI64::new(9));
}

#[test]
fn graph_set_edge_overwrites() {
    let mut g = AdaptGraph::new();
    g.grow_to(2);
    g.set_edge(0, SafeI64::new(4), 1);
    g.set_edge(0, SafeI64::new(8), 1);
    assert_eq!(g.edge_val(0, 1), SafeI64::new(8));
}

#[test]
fn graph_forget_detaches_and_recycles_id() {
    let mut g = AdaptGraph::new();
    g.grow_to(4);
    g.add_edge(0, SafeI64::new(1), 1);
    g.add_edge(2, SafeI64::new(1), 0);
    g.add_edge(0, SafeI64::new(1), 0); // self-loop
    g.forget(0);
    assert_eq!(g.num_edges(), 0);
    assert!(!g.contains_edge(2, 0));
    assert_eq!(g.verts().collect::<Vec<_>>(), vec![1, 2, 3]);
    // The freed id comes back.
    assert_eq!(g.new_vertex(), 0);
    assert_eq!(g.succs(0).count(), 0);
    assert_eq!(g.preds(0).count(), 0);
}

#[test]
fn graph_forget_churn_reuses_weight_slots() {
    let mut g = AdaptGraph::new();
    g.grow_to(21);
    for d in 1..=20 {
        g.add_edge(0, SafeI64::new(d as i64), d);
    }
    assert_eq!(g.weight_slots(), 20);
    g.forget(0);
    let v = g.new_vertex();
    for d in 1..=20 {
        g.add_edge(v, SafeI64::new(-(d as i64)), d);
    }
    assert_eq!(g.num_edges(), 20);
    assert_eq!(g.weight_slots(), 20);
}

#[test]
#[should_panic(expected = "added twice")]
fn graph_double_add_edge_is_a_bug() {
    let mut g = AdaptGraph::new();
    g.grow_to(2);
    g.add_edge(0, SafeI64::ZERO, 1);
    g.add_edge(0, SafeI64::ZERO, 1);
}

#[test]
fn graph_copy_does_not_alias() {
    let mut g = AdaptGraph::new();
    g.grow_to(12);
    for d in 1..12 {
        g.add_edge(0, SafeI64::new(d as i64), d);
    }
    let mut copy = g.clone();
    copy.set_edge(0, SafeI64::new(-1), 5);
    copy.forget(3);
    assert_eq!(g.edge_val(0, 5), SafeI64::new(5));
    assert!(g.contains_edge(0, 3));
    assert_eq!(copy.edge_val(0, 5), SafeI64::new(-1));
}

#[test]
fn graph_display_lists_adjacency() {
    let mut g = AdaptGraph::new();
    g.grow_to(2);
    g.add_edge(0, SafeI64::new(7), 1);
    assert_eq!(g.to_string(), "[|[v0 -> (7:1)]|]");
}
