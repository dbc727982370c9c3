//! Label-keyed control-flow graph over decoded instructions
//!
//! [`AsmCfg::make`] gives every decoded instruction its own block and wires
//! fall-through and jump edges. [`AsmCfg::to_nondet`] rewrites the graph so
//! that all branching is structural: each conditional jump becomes two
//! synthetic blocks opening with complementary `Assume`s, and every risky
//! instruction gains an `Assert` stating the obligation the downstream
//! domain must discharge.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::debug;

use super::syntax::{
    AssertionCheck, BinOp, Instruction, InstructionSeq, Label, Reg, Value,
};

/// One node of the graph. Neighbor lists are sets by semantics but kept as
/// ordered vectors so iteration is deterministic.
#[derive(Debug, Clone, Default)]
pub struct AsmBlock {
    pub insts: Vec<Instruction>,
    next: Vec<Label>,
    prev: Vec<Label>,
    /// Annotations displayed before/after the block by the report layer.
    pub pres: Vec<String>,
    pub posts: Vec<String>,
}

impl AsmBlock {
    pub fn next(&self) -> &[Label] {
        &self.next
    }

    pub fn prev(&self) -> &[Label] {
        &self.prev
    }
}

/// Aggregate counters over a CFG, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CfgStats {
    pub count: usize,
    pub stores: usize,
    pub loads: usize,
    pub jumps: usize,
    pub joins: usize,
}

/// Control-flow graph keyed by [`Label`], iterated in the order labels were
/// first encountered during construction.
#[derive(Debug, Default)]
pub struct AsmCfg {
    graph: HashMap<Label, AsmBlock>,
    ordered: Vec<Label>,
}

impl AsmCfg {
    /// Build the graph from a decoded instruction sequence: one block per
    /// label, fall-through plus jump-target edges.
    pub fn make(seq: &InstructionSeq) -> AsmCfg {
        let mut cfg = AsmCfg::default();
        for (i, &(label, inst)) in seq.iter().enumerate() {
            cfg.entry_block(label).insts.push(inst);
            let fallthrough = seq.get(i + 1).map(|&(l, _)| l);
            match inst {
                Instruction::Exit => {}
                Instruction::Jmp { cond, target } => {
                    if cond.is_some() {
                        if let Some(fall) = fallthrough {
                            cfg.add_edge(label, fall);
                        }
                    }
                    cfg.add_edge(label, target);
                }
                _ => {
                    if let Some(fall) = fallthrough {
                        cfg.add_edge(label, fall);
                    }
                }
            }
        }
        cfg
    }

    /// First label encountered; the program entry.
    pub fn entry(&self) -> Label {
        self.ordered[0]
    }

    /// Labels in first-encounter order.
    pub fn labels(&self) -> &[Label] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// The block at `label`.
    ///
    /// # Panics
    /// Panics if the label is not a node of the graph.
    pub fn block(&self, label: Label) -> &AsmBlock {
        self.graph
            .get(&label)
            .unwrap_or_else(|| panic!("AsmCfg: no block labeled {label}"))
    }

    pub fn block_mut(&mut self, label: Label) -> &mut AsmBlock {
        self.graph
            .get_mut(&label)
            .unwrap_or_else(|| panic!("AsmCfg: no block labeled {label}"))
    }

    fn entry_block(&mut self, label: Label) -> &mut AsmBlock {
        if !self.graph.contains_key(&label) {
            self.graph.insert(label, AsmBlock::default());
            self.ordered.push(label);
        }
        self.graph.get_mut(&label).expect("just inserted")
    }

    fn add_edge(&mut self, from: Label, to: Label) {
        let fb = self.entry_block(from);
        if !fb.next.contains(&to) {
            fb.next.push(to);
        }
        let tb = self.entry_block(to);
        if !tb.prev.contains(&from) {
            tb.prev.push(from);
        }
    }

    fn remove(&mut self, label: Label) {
        let block = self.graph.remove(&label).expect("removing absent block");
        for n in &block.next {
            if let Some(nb) = self.graph.get_mut(n) {
                nb.prev.retain(|&l| l != label);
            }
        }
        for p in &block.prev {
            if let Some(pb) = self.graph.get_mut(p) {
                pb.next.retain(|&l| l != label);
            }
        }
        self.ordered.retain(|&l| l != label);
    }

    /// Rewrite into non-deterministic form: every former branch point becomes
    /// a fork into two blocks opening with complementary `Assume`s, and every
    /// memory access, helper call, and division gains a preceding `Assert`.
    /// With `expand_locks`, atomic adds are lowered to load/add/store over the
    /// scratch register.
    pub fn to_nondet(&self, expand_locks: bool) -> AsmCfg {
        let mut out = AsmCfg::default();
        for &label in &self.ordered {
            let bb = &self.graph[&label];
            let mut insts = Vec::new();
            let mut branch = None;
            for &inst in &bb.insts {
                match inst {
                    Instruction::Jmp {
                        cond: Some(cond),
                        target,
                    } => branch = Some((cond, target)),
                    Instruction::Jmp { cond: None, .. } => {}
                    Instruction::Mem { access, .. } => {
                        insts.push(Instruction::Assert {
                            check: AssertionCheck::ValidAccess { access },
                        });
                        insts.push(inst);
                    }
                    Instruction::Packet { width, .. } => {
                        insts.push(Instruction::Assert {
                            check: AssertionCheck::PacketAccess { width },
                        });
                        insts.push(inst);
                    }
                    Instruction::Call { func } => {
                        insts.push(Instruction::Assert {
                            check: AssertionCheck::ValidCall { func },
                        });
                        insts.push(inst);
                    }
                    Instruction::Bin { op, v, .. }
                        if matches!(op, BinOp::Div | BinOp::Mod) =>
                    {
                        insts.push(Instruction::Assert {
                            check: AssertionCheck::NonZero { value: v },
                        });
                        insts.push(inst);
                    }
                    Instruction::LockAdd { access, value } => {
                        insts.push(Instruction::Assert {
                            check: AssertionCheck::ValidAccess { access },
                        });
                        if expand_locks {
                            insts.push(Instruction::Mem {
                                access,
                                value: Value::Reg(Reg::R11),
                                is_load: true,
                            });
                            insts.push(Instruction::Bin {
                                op: BinOp::Add,
                                is64: true,
                                dst: Reg::R11,
                                v: Value::Reg(value),
                                lddw: false,
                            });
                            insts.push(Instruction::Mem {
                                access,
                                value: Value::Reg(Reg::R11),
                                is_load: false,
                            });
                        } else {
                            insts.push(inst);
                        }
                    }
                    _ => insts.push(inst),
                }
            }

            let block = out.entry_block(label);
            block.insts = insts;
            block.pres = bb.pres.clone();
            block.posts = bb.posts.clone();

            match branch {
                Some((cond, target)) => {
                    // Fall-through is wired first by `make`, so it is the
                    // first next entry that differs from the target (or the
                    // target itself for a degenerate branch-to-next).
                    let fall = bb
                        .next
                        .iter()
                        .copied()
                        .find(|&l| l != target)
                        .unwrap_or(target);
                    let taken = Label::synthetic(label.pc(), 1);
                    let skipped = Label::synthetic(label.pc(), 2);
                    out.entry_block(taken)
                        .insts
                        .push(Instruction::Assume { cond });
                    out.entry_block(skipped).insts.push(Instruction::Assume {
                        cond: cond.negate(),
                    });
                    out.add_edge(label, taken);
                    out.add_edge(label, skipped);
                    out.add_edge(taken, target);
                    out.add_edge(skipped, fall);
                }
                None => {
                    for &n in &bb.next {
                        out.add_edge(label, n);
                    }
                }
            }
        }
        out
    }

    /// Coalesce straight-line chains and prune unreachable blocks. Blocks are
    /// treated as opaque instruction sequences.
    pub fn simplify(&mut self) {
        let merged = self.merge_blocks();
        let pruned = self.remove_unreachable();
        let merged = merged + self.merge_blocks() + self.merge_blocks();
        debug!(merged, pruned, blocks = self.len(), "simplified asm cfg");
    }

    fn merge_blocks(&mut self) -> usize {
        let entry = self.entry();
        let mut merged = 0;
        let mut visited = HashSet::new();
        let mut stack = vec![entry];
        while let Some(cur) = stack.pop() {
            if !visited.insert(cur) {
                continue;
            }
            if cur != entry {
                let block = &self.graph[&cur];
                if let (&[parent], &[child]) = (block.prev.as_slice(), block.next.as_slice()) {
                    if parent != cur
                        && child != cur
                        && self.graph[&parent].next.len() == 1
                    {
                        let mut stmts = std::mem::take(&mut self.block_mut(cur).insts);
                        let pres = std::mem::take(&mut self.block_mut(cur).pres);
                        let posts = std::mem::take(&mut self.block_mut(cur).posts);
                        self.remove(cur);
                        let pb = self.block_mut(parent);
                        pb.insts.append(&mut stmts);
                        pb.posts.extend(pres);
                        pb.posts.extend(posts);
                        self.add_edge(parent, child);
                        merged += 1;
                        visited.remove(&cur);
                        stack.push(child);
                        continue;
                    }
                }
            }
            stack.extend(self.graph[&cur].next.iter().copied());
        }
        merged
    }

    fn remove_unreachable(&mut self) -> usize {
        let entry = self.entry();
        let mut alive = HashSet::new();
        let mut stack = vec![entry];
        while let Some(cur) = stack.pop() {
            if !alive.insert(cur) {
                continue;
            }
            stack.extend(self.graph[&cur].next.iter().copied());
        }
        let dead: Vec<Label> = self
            .ordered
            .iter()
            .copied()
            .filter(|l| !alive.contains(l))
            .collect();
        let pruned = dead.len();
        for label in dead {
            self.remove(label);
        }
        pruned
    }

    /// Instruction and shape counters for the report layer.
    pub fn collect_stats(&self) -> CfgStats {
        let mut stats = CfgStats::default();
        for label in &self.ordered {
            let bb = &self.graph[label];
            for inst in &bb.insts {
                stats.count += 1;
                if let Instruction::Mem { is_load, .. } = inst {
                    if *is_load {
                        stats.loads += 1;
                    } else {
                        stats.stores += 1;
                    }
                }
            }
            if bb.prev.len() > 1 {
                stats.joins += 1;
            }
            if bb.next.len() > 1 {
                stats.jumps += 1;
            }
        }
        stats
    }
}

impl fmt::Display for AsmCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &label in &self.ordered {
            let bb = &self.graph[&label];
            writeln!(f, "{label}:")?;
            for inst in &bb.insts {
                writeln!(f, "  {inst};")?;
            }
            if !bb.next.is_empty() {
                let targets: Vec<String> = bb.next.iter().map(Label::to_string).collect();
                writeln!(f, "  goto {};", targets.join(","))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
