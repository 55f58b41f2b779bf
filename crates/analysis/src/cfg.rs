//! Control-flow graph construction
//!
//! Lowers a function body into basic blocks with explicit terminators,
//! then computes dominators to identify back-edges and loop headers.
//! Statements following a terminator in the same source block are
//! unreachable; they are dropped and reported.

use crate::ast::{Expr, Function, Stmt};
use crate::diagnostics::{Diagnostic, ErrorKind};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// How control leaves a block
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator<'a> {
    Jump(BlockId),
    Branch {
        cond: &'a Expr,
        then_to: BlockId,
        else_to: BlockId,
    },
    /// Explicit `return`; `None` returns the null sentinel
    Return(Option<&'a Expr>),
    /// Control falls off the end of the function body
    ImplicitReturn,
    /// The synthetic exit block
    Exit,
}

/// A maximal straight-line run of statements
#[derive(Debug)]
pub struct Block<'a> {
    pub id: BlockId,
    /// Assignments and expression statements only; control flow lives in
    /// the terminator
    pub stmts: Vec<&'a Stmt>,
    pub term: Terminator<'a>,
}

#[derive(Debug)]
pub struct Cfg<'a> {
    pub blocks: Vec<Block<'a>>,
    pub entry: BlockId,
    pub exit: BlockId,
    pub succs: Vec<Vec<BlockId>>,
    pub preds: Vec<Vec<BlockId>>,
    pub loop_headers: BTreeSet<BlockId>,
    pub back_edges: BTreeSet<(BlockId, BlockId)>,
}

impl<'a> Cfg<'a> {
    pub fn block(&self, id: BlockId) -> &Block<'a> {
        &self.blocks[id.0]
    }

    pub fn successors(&self, id: BlockId) -> &[BlockId] {
        &self.succs[id.0]
    }

    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        &self.preds[id.0]
    }

    pub fn is_loop_header(&self, id: BlockId) -> bool {
        self.loop_headers.contains(&id)
    }

    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.back_edges.contains(&(from, to))
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// Build the CFG for a function body.
///
/// Returns the graph together with any `UnreachableCode` findings made
/// during lowering. Fails only on shapes the source language cannot
/// produce (treated as internal errors by the driver).
pub fn build_cfg<'a>(function: &'a Function) -> Result<(Cfg<'a>, Vec<Diagnostic>), String> {
    let mut builder = CfgBuilder {
        blocks: Vec::new(),
        loop_stack: Vec::new(),
        diagnostics: Vec::new(),
        function: &function.name,
    };

    let entry = builder.new_block();
    let exit = builder.new_block();
    builder.blocks[exit.0].term = Some(Terminator::Exit);

    if let Some(open) = builder.lower_list(&function.body, entry)? {
        builder.blocks[open.0].term = Some(Terminator::ImplicitReturn);
    }

    let blocks: Vec<Block<'a>> = builder
        .blocks
        .into_iter()
        .enumerate()
        .map(|(i, draft)| Block {
            id: BlockId(i),
            stmts: draft.stmts,
            term: draft.term.expect("all blocks terminated after lowering"),
        })
        .collect();

    let succs: Vec<Vec<BlockId>> = blocks
        .iter()
        .map(|b| match &b.term {
            Terminator::Jump(t) => vec![*t],
            Terminator::Branch {
                then_to, else_to, ..
            } => vec![*then_to, *else_to],
            Terminator::Return(_) | Terminator::ImplicitReturn => vec![exit],
            Terminator::Exit => vec![],
        })
        .collect();

    let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); blocks.len()];
    for (from, targets) in succs.iter().enumerate() {
        for to in targets {
            preds[to.0].push(BlockId(from));
        }
    }

    let (loop_headers, back_edges) = find_loops(entry, &succs, &preds)?;
    debug!(
        function = %function.name,
        blocks = blocks.len(),
        headers = loop_headers.len(),
        "built cfg"
    );

    Ok((
        Cfg {
            blocks,
            entry,
            exit,
            succs,
            preds,
            loop_headers,
            back_edges,
        },
        builder.diagnostics,
    ))
}

struct BlockDraft<'a> {
    stmts: Vec<&'a Stmt>,
    term: Option<Terminator<'a>>,
}

struct CfgBuilder<'a> {
    blocks: Vec<BlockDraft<'a>>,
    /// (header, after) per enclosing loop, innermost last
    loop_stack: Vec<(BlockId, BlockId)>,
    diagnostics: Vec<Diagnostic>,
    function: &'a str,
}

impl<'a> CfgBuilder<'a> {
    fn new_block(&mut self) -> BlockId {
        self.blocks.push(BlockDraft {
            stmts: Vec::new(),
            term: None,
        });
        BlockId(self.blocks.len() - 1)
    }

    fn terminate(&mut self, block: BlockId, term: Terminator<'a>) {
        self.blocks[block.0].term = Some(term);
    }

    /// Lower a statement list starting in `current`. Returns the block
    /// left open at the end, or `None` when every path terminated.
    fn lower_list(
        &mut self,
        stmts: &'a [Stmt],
        mut current: BlockId,
    ) -> Result<Option<BlockId>, String> {
        for (idx, stmt) in stmts.iter().enumerate() {
            match stmt {
                Stmt::Assign { .. } | Stmt::Expr { .. } => {
                    self.blocks[current.0].stmts.push(stmt);
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                    ..
                } => {
                    let then_block = self.new_block();
                    let else_block = self.new_block();
                    self.terminate(
                        current,
                        Terminator::Branch {
                            cond,
                            then_to: then_block,
                            else_to: else_block,
                        },
                    );
                    let then_end = self.lower_list(then_body, then_block)?;
                    let else_end = self.lower_list(else_body, else_block)?;
                    match (then_end, else_end) {
                        (None, None) => {
                            self.report_unreachable(&stmts[idx + 1..]);
                            return Ok(None);
                        }
                        (then_end, else_end) => {
                            let join = self.new_block();
                            if let Some(b) = then_end {
                                self.terminate(b, Terminator::Jump(join));
                            }
                            if let Some(b) = else_end {
                                self.terminate(b, Terminator::Jump(join));
                            }
                            current = join;
                        }
                    }
                }
                Stmt::While { cond, body, .. } => {
                    let header = self.new_block();
                    let after = self.new_block();
                    let body_block = self.new_block();
                    self.terminate(current, Terminator::Jump(header));
                    self.terminate(
                        header,
                        Terminator::Branch {
                            cond,
                            then_to: body_block,
                            else_to: after,
                        },
                    );
                    self.loop_stack.push((header, after));
                    let body_end = self.lower_list(body, body_block)?;
                    self.loop_stack.pop();
                    if let Some(b) = body_end {
                        self.terminate(b, Terminator::Jump(header));
                    }
                    current = after;
                }
                Stmt::Break { .. } => {
                    let (_, after) = *self
                        .loop_stack
                        .last()
                        .ok_or_else(|| format!("break outside loop in '{}'", self.function))?;
                    self.terminate(current, Terminator::Jump(after));
                    self.report_unreachable(&stmts[idx + 1..]);
                    return Ok(None);
                }
                Stmt::Continue { .. } => {
                    let (header, _) = *self
                        .loop_stack
                        .last()
                        .ok_or_else(|| format!("continue outside loop in '{}'", self.function))?;
                    self.terminate(current, Terminator::Jump(header));
                    self.report_unreachable(&stmts[idx + 1..]);
                    return Ok(None);
                }
                Stmt::Return { value, .. } => {
                    self.terminate(current, Terminator::Return(value.as_ref()));
                    self.report_unreachable(&stmts[idx + 1..]);
                    return Ok(None);
                }
            }
        }
        Ok(Some(current))
    }

    fn report_unreachable(&mut self, rest: &'a [Stmt]) {
        if let Some(first) = rest.first() {
            self.diagnostics.push(Diagnostic::new(
                ErrorKind::UnreachableCode,
                "statement is unreachable",
                self.function,
                first.loc().clone(),
            ));
        }
    }
}

/// Identify back-edges and loop headers via iterative dominators.
///
/// An edge `u -> v` is a back-edge when `v` dominates `u`; loop headers
/// are back-edge targets. A cycle with no back-edge means irreducible
/// flow, which the source language cannot express.
fn find_loops(
    entry: BlockId,
    succs: &[Vec<BlockId>],
    preds: &[Vec<BlockId>],
) -> Result<(BTreeSet<BlockId>, BTreeSet<(BlockId, BlockId)>), String> {
    let n = succs.len();

    // restrict to blocks reachable from entry
    let mut reachable = vec![false; n];
    let mut stack = vec![entry];
    while let Some(b) = stack.pop() {
        if std::mem::replace(&mut reachable[b.0], true) {
            continue;
        }
        for s in &succs[b.0] {
            stack.push(*s);
        }
    }

    let all: HashSet<usize> = (0..n).filter(|i| reachable[*i]).collect();
    let mut dom: Vec<HashSet<usize>> = (0..n)
        .map(|i| {
            if i == entry.0 {
                HashSet::from([entry.0])
            } else {
                all.clone()
            }
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for i in 0..n {
            if !reachable[i] || i == entry.0 {
                continue;
            }
            let mut new_dom: Option<HashSet<usize>> = None;
            for p in &preds[i] {
                if !reachable[p.0] {
                    continue;
                }
                new_dom = Some(match new_dom {
                    None => dom[p.0].clone(),
                    Some(acc) => acc.intersection(&dom[p.0]).copied().collect(),
                });
            }
            let mut new_dom = new_dom.unwrap_or_default();
            new_dom.insert(i);
            if new_dom != dom[i] {
                dom[i] = new_dom;
                changed = true;
            }
        }
    }

    let mut back_edges = BTreeSet::new();
    let mut loop_headers = BTreeSet::new();
    for (u, targets) in succs.iter().enumerate() {
        if !reachable[u] {
            continue;
        }
        for v in targets {
            if dom[u].contains(&v.0) {
                back_edges.insert((BlockId(u), *v));
                loop_headers.insert(*v);
            }
        }
    }

    // every cycle must be broken by some back-edge
    let mut indegree = vec![0usize; n];
    for (u, targets) in succs.iter().enumerate() {
        if !reachable[u] {
            continue;
        }
        for v in targets {
            if reachable[v.0] && !back_edges.contains(&(BlockId(u), *v)) {
                indegree[v.0] += 1;
            }
        }
    }
    let mut queue: Vec<usize> = (0..n)
        .filter(|i| reachable[*i] && indegree[*i] == 0)
        .collect();
    let mut seen = 0usize;
    while let Some(u) = queue.pop() {
        seen += 1;
        for v in &succs[u] {
            if reachable[v.0] && !back_edges.contains(&(BlockId(u), *v)) {
                indegree[v.0] -= 1;
                if indegree[v.0] == 0 {
                    queue.push(v.0);
                }
            }
        }
    }
    let reachable_count = reachable.iter().filter(|r| **r).count();
    if seen != reachable_count {
        return Err("irreducible control flow: cycle without a dominating header".to_string());
    }

    Ok((loop_headers, back_edges))
}
