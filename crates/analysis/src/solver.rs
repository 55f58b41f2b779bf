//! Intraprocedural fixpoint solver
//!
//! Worklist-driven Kleene iteration over a CFG, with widening at loop
//! headers and a hard per-block iteration cap as a terminating backstop.
//! States flow along edges so branch-refined states reach the right
//! successor. Diagnostics are collected in a single replay pass over the
//! converged states, which keeps them deterministic and free of
//! per-iteration duplicates.

use crate::ast::{Function, SourceLoc};
use crate::cfg::{BlockId, Cfg, Terminator};
use crate::config::AnalysisConfig;
use crate::diagnostics::{AnalysisError, Diagnostic, ErrorKind};
use crate::domains::{AbstractValue, Nullability};
use crate::state::AbstractState;
use crate::transfer::{CalleeOracle, Transfer};
use crate::CancellationToken;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, warn};

/// Per-block invariants computed by the solver. `None` marks a block the
/// analysis proved unreachable.
#[derive(Debug, Clone)]
pub struct BlockStates {
    pub in_states: Vec<Option<AbstractState>>,
    pub out_states: Vec<Option<AbstractState>>,
}

#[derive(Debug)]
pub struct SolveResult {
    pub states: BlockStates,
    /// Join of every value the function can return
    pub return_value: AbstractValue,
    /// State at the exit block, for parameter post-states
    pub exit_state: Option<AbstractState>,
    pub may_do_io: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// Run the fixpoint for one function body under `entry_state`.
pub fn solve(
    function: &Function,
    cfg: &Cfg<'_>,
    entry_state: AbstractState,
    config: &AnalysisConfig,
    oracle: &mut dyn CalleeOracle,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> Result<SolveResult, AnalysisError> {
    let n = cfg.num_blocks();
    let mut in_states: Vec<Option<AbstractState>> = vec![None; n];
    let mut out_states: Vec<Option<AbstractState>> = vec![None; n];
    let mut edge_out: HashMap<(BlockId, BlockId), Option<AbstractState>> = HashMap::new();
    let mut widen_counters: Vec<usize> = vec![0; n];
    let mut visit_counts: Vec<usize> = vec![0; n];

    let mut transfer = Transfer::new(config, &function.name);
    let mut scratch = Vec::new();

    let mut worklist: VecDeque<BlockId> = VecDeque::new();
    let mut queued = vec![false; n];
    worklist.push_back(cfg.entry);
    queued[cfg.entry.0] = true;

    while let Some(block_id) = worklist.pop_front() {
        queued[block_id.0] = false;
        if cancel.is_cancelled() {
            return Err(AnalysisError::Cancelled);
        }
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            return Err(AnalysisError::Timeout(function.name.clone()));
        }

        // join the edge states flowing in
        let mut incoming: Option<AbstractState> = if block_id == cfg.entry {
            Some(entry_state.clone())
        } else {
            None
        };
        for pred in cfg.predecessors(block_id) {
            if let Some(Some(state)) = edge_out.get(&(*pred, block_id)) {
                incoming = Some(match incoming {
                    None => state.clone(),
                    Some(acc) => acc.join(state),
                });
            }
        }

        let Some(mut new_in) = incoming else {
            // no reachable predecessor yet
            continue;
        };

        if cfg.is_loop_header(block_id) {
            let counter = widen_counters[block_id.0];
            if let Some(old) = &in_states[block_id.0] {
                new_in = old.widen(&new_in, counter, config.widening_threshold);
            }
            widen_counters[block_id.0] += 1;
        }

        visit_counts[block_id.0] += 1;
        if visit_counts[block_id.0] > config.max_block_iterations {
            // terminating backstop: pin every still-changing variable to top
            warn!(
                function = %function.name,
                block = %block_id,
                "iteration cap hit, forcing widening to top"
            );
            if let Some(old) = &in_states[block_id.0] {
                new_in = force_top_changed(old, &new_in);
            }
        }

        if in_states[block_id.0].as_ref() == Some(&new_in) {
            continue;
        }
        in_states[block_id.0] = Some(new_in.clone());

        // execute the block
        let mut state = new_in;
        let mut reachable = true;
        for stmt in &cfg.block(block_id).stmts {
            scratch.clear();
            reachable = transfer.transfer_stmt(stmt, &mut state, oracle, &mut scratch)?;
            if !reachable {
                break;
            }
        }
        reachable = reachable && !state.has_impossible_binding();
        out_states[block_id.0] = if reachable { Some(state.clone()) } else { None };

        // propagate along edges, branch-refined where applicable
        let mut updates: Vec<(BlockId, Option<AbstractState>)> = Vec::new();
        match &cfg.block(block_id).term {
            Terminator::Jump(target) => {
                updates.push((*target, reachable.then(|| state.clone())));
            }
            Terminator::Branch {
                cond,
                then_to,
                else_to,
            } => {
                let (then_state, else_state) = if reachable {
                    (
                        transfer.refine(cond, &state, true),
                        transfer.refine(cond, &state, false),
                    )
                } else {
                    (None, None)
                };
                updates.push((*then_to, then_state));
                updates.push((*else_to, else_state));
            }
            Terminator::Return(_) | Terminator::ImplicitReturn => {
                updates.push((cfg.exit, reachable.then(|| state.clone())));
            }
            Terminator::Exit => {}
        }
        for (target, edge_state) in updates {
            let slot = edge_out.entry((block_id, target)).or_insert(None);
            if *slot != edge_state {
                *slot = edge_state;
                if !queued[target.0] {
                    worklist.push_back(target);
                    queued[target.0] = true;
                }
            }
        }
    }

    debug!(
        function = %function.name,
        visits = visit_counts.iter().sum::<usize>(),
        "fixpoint converged"
    );

    // replay pass: collect diagnostics and return values over the final
    // states, one visit per reachable block
    let mut diagnostics = Vec::new();
    let mut returns: Vec<(SourceLoc, AbstractValue, bool)> = Vec::new();
    for block in &cfg.blocks {
        let Some(in_state) = &in_states[block.id.0] else {
            continue;
        };
        let mut state = in_state.clone();
        let mut reachable = true;
        for stmt in &block.stmts {
            reachable = transfer.transfer_stmt(stmt, &mut state, oracle, &mut diagnostics)?;
            if !reachable {
                break;
            }
        }
        if !reachable {
            continue;
        }
        match &block.term {
            Terminator::Branch { cond, .. } => {
                transfer.eval(cond, &mut state, oracle, &mut diagnostics)?;
            }
            Terminator::Return(Some(expr)) => {
                let value = transfer.eval(expr, &mut state, oracle, &mut diagnostics)?;
                if !value.is_impossible() {
                    returns.push((expr.loc().clone(), value, true));
                }
            }
            Terminator::Return(None) => {
                returns.push((
                    block
                        .stmts
                        .last()
                        .map(|s| s.loc().clone())
                        .unwrap_or_else(|| function_loc(function)),
                    AbstractValue::null(),
                    true,
                ));
            }
            Terminator::ImplicitReturn => {
                returns.push((function_loc(function), AbstractValue::implicit_return(), false));
            }
            Terminator::Jump(_) | Terminator::Exit => {}
        }
    }

    check_return_shapes(&returns, &function.name, &mut diagnostics);

    let return_value = returns
        .iter()
        .fold(AbstractValue::bottom(), |acc, (_, v, _)| acc.join(v));

    let exit_state = in_states[cfg.exit.0].clone();
    Ok(SolveResult {
        states: BlockStates {
            in_states,
            out_states,
        },
        return_value,
        exit_state,
        may_do_io: transfer.may_do_io,
        diagnostics,
    })
}

fn function_loc(function: &Function) -> SourceLoc {
    function
        .source
        .clone()
        .unwrap_or_else(|| SourceLoc::new("<unknown>", 0, 0))
}

/// One explicit return site yielding definitely-null next to another
/// yielding definitely-not-null is worth a note in a dynamically-typed
/// source.
fn check_return_shapes(
    returns: &[(SourceLoc, AbstractValue, bool)],
    function: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let explicit: Vec<_> = returns.iter().filter(|(_, _, exp)| *exp).collect();
    let null_site = explicit
        .iter()
        .find(|(_, v, _)| v.null == Nullability::DefinitelyNull);
    let value_site = explicit
        .iter()
        .find(|(_, v, _)| v.null == Nullability::NotNull);
    if let (Some((null_loc, _, _)), Some((value_loc, _, _))) = (null_site, value_site) {
        let loc = std::cmp::max(null_loc, value_loc).clone();
        diagnostics.push(Diagnostic::new(
            ErrorKind::ReturnTypeMismatch,
            "function returns both null and non-null values",
            function,
            loc,
        ));
    }
}

/// Keep only the bindings that stopped changing; everything else goes to
/// top so the input chain cannot grow further.
fn force_top_changed(old: &AbstractState, new: &AbstractState) -> AbstractState {
    let mut forced = AbstractState::new();
    for (name, value) in new.variables() {
        if old.get(name) == *value {
            forced.set(name, *value);
        }
    }
    forced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Expr, SourceLoc, Stmt};
    use crate::cfg::build_cfg;
    use crate::domains::{Bound, Interval, Lattice, Sign};
    use crate::transfer::TopOracle;

    fn at(line: usize) -> SourceLoc {
        SourceLoc::new("test.mica", line, 0)
    }

    fn run(function: &Function) -> SolveResult {
        let config = AnalysisConfig::default();
        let (cfg, _) = build_cfg(function).unwrap();
        solve(
            function,
            &cfg,
            AbstractState::new(),
            &config,
            &mut TopOracle,
            None,
            &CancellationToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_straight_line_assignment() {
        let f = Function::new(
            "f",
            vec![],
            vec![
                Stmt::assign("x", Expr::int(3, at(0)), at(0)),
                Stmt::ret(Some(Expr::var("x", at(1))), at(1)),
            ],
        );
        let result = run(&f);
        assert_eq!(result.return_value, AbstractValue::of_int(3));
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_if_branches_join_at_merge_point() {
        let f = Function::new(
            "f",
            vec!["c".to_string()],
            vec![
                Stmt::If {
                    cond: Expr::binop(
                        BinOp::Gt,
                        Expr::var("c", at(0)),
                        Expr::int(0, at(0)),
                        at(0),
                    ),
                    then_body: vec![Stmt::assign("x", Expr::int(1, at(1)), at(1))],
                    else_body: vec![Stmt::assign("x", Expr::int(2, at(2)), at(2))],
                    loc: at(0),
                },
                Stmt::ret(Some(Expr::var("x", at(3))), at(3)),
            ],
        );
        let result = run(&f);
        assert_eq!(
            result.return_value.range,
            Interval::new(Bound::Finite(1), Bound::Finite(2))
        );
        assert_eq!(result.return_value.sign, Sign::Pos);
    }

    #[test]
    fn test_bounded_loop_converges() {
        // i := 0; while i < 10 { i := i + 1 }; return i
        let f = Function::new(
            "h",
            vec![],
            vec![
                Stmt::assign("i", Expr::int(0, at(0)), at(0)),
                Stmt::While {
                    cond: Expr::binop(
                        BinOp::Lt,
                        Expr::var("i", at(1)),
                        Expr::int(10, at(1)),
                        at(1),
                    ),
                    body: vec![Stmt::assign(
                        "i",
                        Expr::binop(
                            BinOp::Add,
                            Expr::var("i", at(2)),
                            Expr::int(1, at(2)),
                            at(2),
                        ),
                        at(2),
                    )],
                    loc: at(1),
                },
                Stmt::ret(Some(Expr::var("i", at(3))), at(3)),
            ],
        );
        let result = run(&f);
        // the loop exit refines i to exactly 10
        assert!(result.return_value.range.contains(10));
        assert!(!result.return_value.range.contains(11));
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_false_loop_body_is_unreachable() {
        // while false { x := 1 / 0 } must not report the division
        let f = Function::new(
            "f",
            vec![],
            vec![Stmt::While {
                cond: Expr::bool(false, at(0)),
                body: vec![Stmt::assign(
                    "x",
                    Expr::binop(BinOp::Div, Expr::int(1, at(1)), Expr::int(0, at(1)), at(1)),
                    at(1),
                )],
                loc: at(0),
            }],
        );
        let result = run(&f);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_pruned_branch_suppresses_diagnostics() {
        // x := 5; if x < 0 { y := 1 / 0 }
        let f = Function::new(
            "f",
            vec![],
            vec![
                Stmt::assign("x", Expr::int(5, at(0)), at(0)),
                Stmt::If {
                    cond: Expr::binop(
                        BinOp::Lt,
                        Expr::var("x", at(1)),
                        Expr::int(0, at(1)),
                        at(1),
                    ),
                    then_body: vec![Stmt::assign(
                        "y",
                        Expr::binop(BinOp::Div, Expr::int(1, at(2)), Expr::int(0, at(2)), at(2)),
                        at(2),
                    )],
                    else_body: vec![],
                    loc: at(1),
                },
            ],
        );
        let result = run(&f);
        assert!(
            result
                .diagnostics
                .iter()
                .all(|d| d.kind != ErrorKind::DivByZero)
        );
    }

    #[test]
    fn test_empty_body_returns_implicit_shape() {
        let f = Function::new("f", vec![], vec![]);
        let result = run(&f);
        assert!(result.return_value.sign.is_bottom());
        assert!(result.return_value.range.is_bottom());
        assert!(result.return_value.null.is_top());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_bare_return_is_null() {
        let f = Function::new("f", vec![], vec![Stmt::ret(None, at(0))]);
        let result = run(&f);
        assert_eq!(result.return_value.null, Nullability::DefinitelyNull);
    }

    #[test]
    fn test_return_type_mismatch_note() {
        let f = Function::new(
            "f",
            vec!["c".to_string()],
            vec![Stmt::If {
                cond: Expr::binop(
                    BinOp::Gt,
                    Expr::var("c", at(0)),
                    Expr::int(0, at(0)),
                    at(0),
                ),
                then_body: vec![Stmt::ret(Some(Expr::null(at(1))), at(1))],
                else_body: vec![Stmt::ret(Some(Expr::int(1, at(2))), at(2))],
                loc: at(0),
            }],
        );
        let result = run(&f);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.kind == ErrorKind::ReturnTypeMismatch)
        );
    }

    #[test]
    fn test_infinite_loop_never_returns() {
        let f = Function::new(
            "spin",
            vec![],
            vec![Stmt::While {
                cond: Expr::bool(true, at(0)),
                body: vec![Stmt::assign("x", Expr::int(1, at(1)), at(1))],
                loc: at(0),
            }],
        );
        let result = run(&f);
        // no path reaches the exit
        assert!(result.return_value.null.is_bottom());
        assert!(result.exit_state.is_none());
    }

    #[test]
    fn test_unbounded_counter_widens_to_infinity() {
        // i := 0; while c > 0 { i := i + 1 }; return i
        let f = Function::new(
            "f",
            vec!["c".to_string()],
            vec![
                Stmt::assign("i", Expr::int(0, at(0)), at(0)),
                Stmt::While {
                    cond: Expr::binop(
                        BinOp::Gt,
                        Expr::var("c", at(1)),
                        Expr::int(0, at(1)),
                        at(1),
                    ),
                    body: vec![Stmt::assign(
                        "i",
                        Expr::binop(
                            BinOp::Add,
                            Expr::var("i", at(2)),
                            Expr::int(1, at(2)),
                            at(2),
                        ),
                        at(2),
                    )],
                    loc: at(1),
                },
                Stmt::ret(Some(Expr::var("i", at(3))), at(3)),
            ],
        );
        let result = run(&f);
        assert_eq!(
            result.return_value.range,
            Interval::at_least(Bound::Finite(0))
        );
    }

    #[test]
    fn test_cancellation_stops_solver() {
        let token = CancellationToken::new();
        token.cancel();
        let f = Function::new("f", vec![], vec![Stmt::assign("x", Expr::int(1, at(0)), at(0))]);
        let config = AnalysisConfig::default();
        let (cfg, _) = build_cfg(&f).unwrap();
        let result = solve(
            &f,
            &cfg,
            AbstractState::new(),
            &config,
            &mut TopOracle,
            None,
            &token,
        );
        assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
    }
}
