//! Analysis control-flow graph
//!
//! Blocks are owned by the graph's label-keyed map and refer to their
//! neighbors by label, never by pointer, so the cyclic structure needs no
//! shared ownership. A reverse view for backward analyses swaps the edge
//! directions without cloning anything.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use super::stmt::{BinaryOperation, Statement};
use super::types::{DebugInfo, LinearConstraint, LinearExpr, Variable};
use crate::asm::syntax::Label;

/// A straight-line sequence of typed statements plus its neighbor labels.
/// Neighbor lists are deduplicated but ordered, so iteration is
/// deterministic.
#[derive(Debug)]
pub struct BasicBlock {
    label: Label,
    stmts: Vec<Statement>,
    next: Vec<Label>,
    prev: Vec<Label>,
}

impl BasicBlock {
    fn new(label: Label) -> BasicBlock {
        BasicBlock {
            label,
            stmts: Vec::new(),
            next: Vec::new(),
            prev: Vec::new(),
        }
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn statements(&self) -> &[Statement] {
        &self.stmts
    }

    pub fn next(&self) -> &[Label] {
        &self.next
    }

    pub fn prev(&self) -> &[Label] {
        &self.prev
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// Move all statements of `other` to the back of this block.
    pub fn move_back(&mut self, other: &mut BasicBlock) {
        self.stmts.append(&mut other.stmts);
    }

    fn push(&mut self, stmt: Statement) {
        self.stmts.push(stmt);
    }

    fn binary(
        &mut self,
        lhs: Variable,
        op: BinaryOperation,
        op1: Variable,
        op2: impl Into<LinearExpr>,
    ) {
        self.push(Statement::BinaryOp {
            lhs,
            op,
            left: LinearExpr::var(op1),
            right: op2.into(),
        });
    }

    pub fn add(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::Add, op1, op2);
    }

    pub fn sub(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::Sub, op1, op2);
    }

    pub fn mul(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::Mul, op1, op2);
    }

    /// Signed division.
    pub fn div(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::SDiv, op1, op2);
    }

    pub fn udiv(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::UDiv, op1, op2);
    }

    /// Signed remainder.
    pub fn rem(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::SRem, op1, op2);
    }

    pub fn urem(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::URem, op1, op2);
    }

    pub fn bitwise_and(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::And, op1, op2);
    }

    pub fn bitwise_or(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::Or, op1, op2);
    }

    pub fn bitwise_xor(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::Xor, op1, op2);
    }

    pub fn shl(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::Shl, op1, op2);
    }

    pub fn lshr(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::LShr, op1, op2);
    }

    pub fn ashr(&mut self, lhs: Variable, op1: Variable, op2: impl Into<LinearExpr>) {
        self.binary(lhs, BinaryOperation::AShr, op1, op2);
    }

    pub fn assign(&mut self, lhs: Variable, rhs: impl Into<LinearExpr>) {
        self.push(Statement::Assign {
            lhs,
            rhs: rhs.into(),
        });
    }

    pub fn assume(&mut self, constraint: LinearConstraint) {
        self.push(Statement::Assume { constraint });
    }

    pub fn havoc(&mut self, lhs: Variable) {
        self.push(Statement::Havoc { lhs });
    }

    /// `lhs = if v >= 1 then e1 else e2`; the common boolean-variable case.
    pub fn select(
        &mut self,
        lhs: Variable,
        v: Variable,
        e1: impl Into<LinearExpr>,
        e2: impl Into<LinearExpr>,
    ) {
        self.select_cond(lhs, LinearConstraint::ge(v, LinearExpr::constant(1)), e1, e2);
    }

    pub fn select_cond(
        &mut self,
        lhs: Variable,
        cond: LinearConstraint,
        e1: impl Into<LinearExpr>,
        e2: impl Into<LinearExpr>,
    ) {
        self.push(Statement::Select {
            lhs,
            cond,
            on_true: e1.into(),
            on_false: e2.into(),
        });
    }

    pub fn assertion(&mut self, constraint: LinearConstraint, debug: DebugInfo) {
        self.push(Statement::Assert { constraint, debug });
    }

    pub fn array_init(
        &mut self,
        array: Variable,
        lb: impl Into<LinearExpr>,
        ub: impl Into<LinearExpr>,
        value: impl Into<LinearExpr>,
        elem_size: impl Into<LinearExpr>,
    ) {
        self.push(Statement::ArrayInit {
            array,
            elem_size: elem_size.into(),
            lb: lb.into(),
            ub: ub.into(),
            value: value.into(),
        });
    }

    /// Store to the single cell at `idx`. `is_singleton` is the caller's
    /// promise that exactly one concrete cell is addressed.
    pub fn array_store(
        &mut self,
        array: Variable,
        idx: impl Into<LinearExpr>,
        value: impl Into<LinearExpr>,
        elem_size: impl Into<LinearExpr>,
        is_singleton: bool,
    ) {
        let idx = idx.into();
        self.push(Statement::ArrayStore {
            array,
            elem_size: elem_size.into(),
            lb: idx.clone(),
            ub: idx,
            value: value.into(),
            is_singleton,
        });
    }

    pub fn array_store_range(
        &mut self,
        array: Variable,
        lb: impl Into<LinearExpr>,
        ub: impl Into<LinearExpr>,
        value: impl Into<LinearExpr>,
        elem_size: impl Into<LinearExpr>,
    ) {
        self.push(Statement::ArrayStore {
            array,
            elem_size: elem_size.into(),
            lb: lb.into(),
            ub: ub.into(),
            value: value.into(),
            is_singleton: false,
        });
    }

    pub fn array_load(
        &mut self,
        lhs: Variable,
        array: Variable,
        index: impl Into<LinearExpr>,
        elem_size: impl Into<LinearExpr>,
    ) {
        self.push(Statement::ArrayLoad {
            lhs,
            array,
            elem_size: elem_size.into(),
            index: index.into(),
        });
    }
}

/// The analysis CFG: a mandatory entry, an optional exit, and an owned map
/// from label to block. Not cloneable; pass `&Cfg` around as the copyable
/// view and [`CfgRev`] for the backward direction.
#[derive(Debug)]
pub struct Cfg {
    entry: Label,
    exit: Option<Label>,
    blocks: HashMap<Label, BasicBlock>,
}

impl Cfg {
    pub fn new(entry: Label) -> Cfg {
        let mut blocks = HashMap::new();
        blocks.insert(entry, BasicBlock::new(entry));
        Cfg {
            entry,
            exit: None,
            blocks,
        }
    }

    pub fn entry(&self) -> Label {
        self.entry
    }

    pub fn exit(&self) -> Option<Label> {
        self.exit
    }

    /// Declare the exit block, inserting it first if needed.
    pub fn set_exit(&mut self, label: Label) {
        self.insert(label);
        self.exit = Some(label);
    }

    /// The block at `label`, inserting an empty one on first use.
    pub fn insert(&mut self, label: Label) -> &mut BasicBlock {
        self.blocks
            .entry(label)
            .or_insert_with(|| BasicBlock::new(label))
    }

    /// # Panics
    /// Panics if `label` is not a node; a missing block is a caller bug.
    pub fn block(&self, label: Label) -> &BasicBlock {
        self.blocks
            .get(&label)
            .unwrap_or_else(|| panic!("Cfg: no block labeled {label}"))
    }

    pub fn block_mut(&mut self, label: Label) -> &mut BasicBlock {
        self.blocks
            .get_mut(&label)
            .unwrap_or_else(|| panic!("Cfg: no block labeled {label}"))
    }

    pub fn contains(&self, label: Label) -> bool {
        self.blocks.contains_key(&label)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = Label> + '_ {
        self.blocks.keys().copied()
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.values()
    }

    pub fn next(&self, label: Label) -> &[Label] {
        &self.block(label).next
    }

    pub fn prev(&self, label: Label) -> &[Label] {
        &self.block(label).prev
    }

    /// Add the edge `from → to` (idempotent).
    pub fn add_edge(&mut self, from: Label, to: Label) {
        let fb = self.block_mut(from);
        if !fb.next.contains(&to) {
            fb.next.push(to);
        }
        let tb = self.block_mut(to);
        if !tb.prev.contains(&from) {
            tb.prev.push(from);
        }
    }

    /// Remove the edge `from → to` (idempotent).
    pub fn remove_edge(&mut self, from: Label, to: Label) {
        self.block_mut(from).next.retain(|&l| l != to);
        self.block_mut(to).prev.retain(|&l| l != from);
    }

    /// Detach and delete a block.
    ///
    /// # Panics
    /// Panics on the entry or the declared exit; those are structural.
    pub fn remove(&mut self, label: Label) {
        assert!(label != self.entry, "Cfg: cannot remove the entry block");
        assert!(
            Some(label) != self.exit,
            "Cfg: cannot remove the exit block"
        );
        let block = self
            .blocks
            .remove(&label)
            .unwrap_or_else(|| panic!("Cfg: no block labeled {label}"));
        for n in &block.next {
            if let Some(nb) = self.blocks.get_mut(n) {
                nb.prev.retain(|&l| l != label);
            }
        }
        for p in &block.prev {
            if let Some(pb) = self.blocks.get_mut(p) {
                pb.next.retain(|&l| l != label);
            }
        }
    }

    /// Shrink the graph without changing its meaning: coalesce straight-line
    /// chains, drop unreachable blocks, and (when an exit is declared) drop
    /// blocks that cannot reach it. The passes expose new chain
    /// opportunities to each other, hence the repeated merges.
    pub fn simplify(&mut self) {
        let mut merged = self.merge_blocks();
        let unreachable = self.remove_unreachable_blocks();
        let useless = self.remove_useless_blocks();
        merged += self.merge_blocks();
        merged += self.merge_blocks();
        debug!(
            merged,
            unreachable,
            useless,
            blocks = self.len(),
            "simplified analysis cfg"
        );
    }

    /// Merge a block into its predecessor when it is the predecessor's only
    /// successor and itself has exactly one of each neighbor. Fixpoint
    /// iteration cost scales with block count, so chains are collapsed
    /// eagerly.
    fn merge_blocks(&mut self) -> usize {
        let entry = self.entry;
        let mut merged = 0;
        let mut visited = HashSet::new();
        let mut stack = vec![entry];
        while let Some(cur) = stack.pop() {
            if !visited.insert(cur) {
                continue;
            }
            if cur != entry && Some(cur) != self.exit {
                let block = &self.blocks[&cur];
                if let (&[parent], &[child]) = (block.prev.as_slice(), block.next.as_slice()) {
                    if parent != cur && child != cur && self.blocks[&parent].next.len() == 1 {
                        let mut stmts = std::mem::take(&mut self.block_mut(cur).stmts);
                        self.remove(cur);
                        self.block_mut(parent).stmts.append(&mut stmts);
                        self.add_edge(parent, child);
                        merged += 1;
                        visited.remove(&cur);
                        stack.push(child);
                        continue;
                    }
                }
            }
            stack.extend(self.blocks[&cur].next.iter().copied());
        }
        merged
    }

    fn mark_from(&self, start: Label, forward: bool) -> HashSet<Label> {
        let mut marked = HashSet::new();
        let mut stack = vec![start];
        while let Some(cur) = stack.pop() {
            if !marked.insert(cur) {
                continue;
            }
            let block = &self.blocks[&cur];
            let neighbors = if forward { &block.next } else { &block.prev };
            stack.extend(neighbors.iter().copied());
        }
        marked
    }

    fn remove_unreachable_blocks(&mut self) -> usize {
        let alive = self.mark_from(self.entry, true);
        self.sweep(&alive)
    }

    /// Remove blocks that cannot reach the exit. Only runs once an exit is
    /// declared; without one every block is trivially useful.
    fn remove_useless_blocks(&mut self) -> usize {
        let Some(exit) = self.exit else {
            return 0;
        };
        let useful = self.mark_from(exit, false);
        self.sweep(&useful)
    }

    fn sweep(&mut self, keep: &HashSet<Label>) -> usize {
        let dead: Vec<Label> = self
            .blocks
            .keys()
            .copied()
            .filter(|l| !keep.contains(l) && *l != self.entry && Some(*l) != self.exit)
            .collect();
        let count = dead.len();
        for label in dead {
            self.remove(label);
        }
        count
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Depth-first from entry, so the dump reads in control order.
        let mut visited = HashSet::new();
        let mut stack = vec![self.entry];
        while let Some(cur) = stack.pop() {
            if !visited.insert(cur) {
                continue;
            }
            let block = &self.blocks[&cur];
            writeln!(f, "{cur}:")?;
            for stmt in &block.stmts {
                writeln!(f, "  {stmt};")?;
            }
            if !block.next.is_empty() {
                let targets: Vec<String> = block.next.iter().map(Label::to_string).collect();
                writeln!(f, "  goto {};", targets.join(","))?;
            }
            for &n in block.next.iter().rev() {
                stack.push(n);
            }
        }
        Ok(())
    }
}

/// Backward view of a [`Cfg`]: entry and exit swap, next and prev swap, and
/// block statements iterate in reverse. Borrows the graph; nothing is
/// cloned.
#[derive(Clone, Copy)]
pub struct CfgRev<'a> {
    cfg: &'a Cfg,
}

impl<'a> CfgRev<'a> {
    /// # Panics
    /// Panics if the underlying graph has no declared exit; a backward
    /// analysis needs somewhere to start.
    pub fn new(cfg: &'a Cfg) -> CfgRev<'a> {
        assert!(
            cfg.exit.is_some(),
            "CfgRev: underlying cfg has no exit block"
        );
        CfgRev { cfg }
    }

    pub fn entry(&self) -> Label {
        self.cfg.exit.expect("checked at construction")
    }

    pub fn exit(&self) -> Label {
        self.cfg.entry
    }

    pub fn next(&self, label: Label) -> &'a [Label] {
        self.cfg.prev(label)
    }

    pub fn prev(&self, label: Label) -> &'a [Label] {
        self.cfg.next(label)
    }

    pub fn block(&self, label: Label) -> RevBlock<'a> {
        RevBlock {
            block: self.cfg.block(label),
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = Label> + 'a {
        self.cfg.labels()
    }
}

/// A block as seen by a backward analysis.
#[derive(Clone, Copy)]
pub struct RevBlock<'a> {
    block: &'a BasicBlock,
}

impl<'a> RevBlock<'a> {
    pub fn label(&self) -> Label {
        self.block.label()
    }

    pub fn statements(&self) -> impl Iterator<Item = &'a Statement> {
        self.block.stmts.iter().rev()
    }

    pub fn next(&self) -> &'a [Label] {
        self.block.prev()
    }

    pub fn prev(&self) -> &'a [Label] {
        self.block.next()
    }
}
