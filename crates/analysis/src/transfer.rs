//! Transfer functions
//!
//! Evaluates expressions and statements against a joint abstract state,
//! producing new states and diagnostics. Calls are resolved through the
//! [`CalleeOracle`] seam so the intraprocedural solver stays independent
//! of the interprocedural driver.

use crate::ast::{BinOp, Const, Expr, SourceLoc, Stmt, UnaryOp};
use crate::config::AnalysisConfig;
use crate::diagnostics::{AnalysisError, Diagnostic, ErrorKind};
use crate::domains::{AbstractValue, Bound, Interval, Lattice, Nullability, Sign};
use crate::state::AbstractState;

/// What a call does to the caller, as far as the caller can see
#[derive(Debug, Clone)]
pub struct CallEffect {
    pub ret: AbstractValue,
    pub may_do_io: bool,
}

/// Resolves callee summaries for the transfer functions.
///
/// The driver implements this with its context cache; tests and
/// single-function clients can use [`TopOracle`].
pub trait CalleeOracle {
    fn apply_call(
        &mut self,
        callee: &str,
        args: &[AbstractValue],
        loc: &SourceLoc,
        caller: &str,
        diags: &mut Vec<Diagnostic>,
    ) -> Result<CallEffect, AnalysisError>;
}

/// Oracle that knows nothing: every call may do anything
pub struct TopOracle;

impl CalleeOracle for TopOracle {
    fn apply_call(
        &mut self,
        _callee: &str,
        _args: &[AbstractValue],
        _loc: &SourceLoc,
        _caller: &str,
        _diags: &mut Vec<Diagnostic>,
    ) -> Result<CallEffect, AnalysisError> {
        Ok(CallEffect {
            ret: AbstractValue::top(),
            may_do_io: true,
        })
    }
}

/// Transfer engine for one function analysis. Accumulates the observed
/// I/O effect across everything it evaluates.
pub struct Transfer<'a> {
    config: &'a AnalysisConfig,
    function: &'a str,
    pub may_do_io: bool,
}

impl<'a> Transfer<'a> {
    pub fn new(config: &'a AnalysisConfig, function: &'a str) -> Self {
        Transfer {
            config,
            function,
            may_do_io: false,
        }
    }

    /// Apply one straight-line statement. Returns `false` when execution
    /// cannot continue past it (a definite error was hit).
    pub fn transfer_stmt(
        &mut self,
        stmt: &Stmt,
        state: &mut AbstractState,
        oracle: &mut dyn CalleeOracle,
        diags: &mut Vec<Diagnostic>,
    ) -> Result<bool, AnalysisError> {
        match stmt {
            Stmt::Assign { target, value, .. } => {
                let v = self.eval(value, state, oracle, diags)?;
                let impossible = v.is_impossible();
                state.set(target, v.masked(self.config));
                Ok(!impossible)
            }
            Stmt::Expr { expr, .. } => {
                let v = self.eval(expr, state, oracle, diags)?;
                Ok(!v.is_impossible())
            }
            other => Err(AnalysisError::Internal(format!(
                "control-flow statement {:?} inside a basic block",
                other.loc()
            ))),
        }
    }

    /// Evaluate an expression, refining the state where a dereference
    /// proves a variable non-null.
    pub fn eval(
        &mut self,
        expr: &Expr,
        state: &mut AbstractState,
        oracle: &mut dyn CalleeOracle,
        diags: &mut Vec<Diagnostic>,
    ) -> Result<AbstractValue, AnalysisError> {
        let value = match expr {
            Expr::Const { value, .. } => AbstractValue::of_const(value),
            Expr::Var { name, .. } => state.get(name),
            Expr::BinOp { op, lhs, rhs, loc } => {
                self.eval_binop(*op, lhs, rhs, loc, state, oracle, diags)?
            }
            Expr::UnaryOp { op, operand, .. } => {
                let v = self.eval(operand, state, oracle, diags)?;
                match op {
                    UnaryOp::Neg => AbstractValue {
                        sign: v.sign.neg(),
                        null: Nullability::NotNull,
                        range: v.range.neg(),
                    },
                    UnaryOp::Not => match operand.as_ref() {
                        Expr::Const {
                            value: Const::Bool(b),
                            ..
                        } => AbstractValue::of_bool(!b),
                        _ => bool_top(),
                    },
                }
            }
            Expr::Call { callee, args, loc } => {
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg, state, oracle, diags)?);
                }
                let effect = oracle.apply_call(callee, &arg_values, loc, self.function, diags)?;
                self.may_do_io |= effect.may_do_io;
                effect.ret
            }
            Expr::Attr { object, loc, .. } => {
                let obj = self.eval(object, state, oracle, diags)?;
                self.check_deref(&obj, object, "attribute access", loc, state, diags)
            }
            Expr::Index { object, index, loc } => {
                let obj = self.eval(object, state, oracle, diags)?;
                let idx = self.eval(index, state, oracle, diags)?;
                let after_null = self.check_deref(&obj, object, "indexing", loc, state, diags);
                if after_null.is_impossible() {
                    after_null
                } else {
                    self.check_bounds(object, &idx, loc, state, diags)
                }
            }
        };
        Ok(value.masked(self.config))
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_binop(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        loc: &SourceLoc,
        state: &mut AbstractState,
        oracle: &mut dyn CalleeOracle,
        diags: &mut Vec<Diagnostic>,
    ) -> Result<AbstractValue, AnalysisError> {
        if matches!(op, BinOp::And | BinOp::Or) {
            // short-circuit operators are only precise on literal booleans
            if let (
                Expr::Const {
                    value: Const::Bool(a),
                    ..
                },
                Expr::Const {
                    value: Const::Bool(b),
                    ..
                },
            ) = (lhs, rhs)
            {
                let result = if op == BinOp::And { *a && *b } else { *a || *b };
                return Ok(AbstractValue::of_bool(result));
            }
            // evaluate both sides for their diagnostics, answer top
            self.eval(lhs, state, oracle, diags)?;
            self.eval(rhs, state, oracle, diags)?;
            return Ok(AbstractValue::top());
        }

        let l = self.eval(lhs, state, oracle, diags)?;
        let r = self.eval(rhs, state, oracle, diags)?;

        if op.is_comparison() {
            return Ok(match decide_compare(op, &l, &r) {
                Some(outcome) => AbstractValue::of_bool(outcome),
                None => bool_top(),
            });
        }

        let value = match op {
            BinOp::Add => numeric(l.sign.add(r.sign), l.range.add(&r.range)),
            BinOp::Sub => numeric(l.sign.sub(r.sign), l.range.sub(&r.range)),
            BinOp::Mul => numeric(l.sign.mul(r.sign), l.range.mul(&r.range)),
            BinOp::Div | BinOp::Mod => {
                let definitely_zero =
                    r.sign == Sign::Zero || r.range.as_singleton() == Some(0);
                let possibly_zero = r.sign.may_be_zero() && r.range.contains_zero();
                if definitely_zero {
                    diags.push(Diagnostic::new(
                        ErrorKind::DivByZero,
                        "division by zero",
                        self.function,
                        loc.clone(),
                    ));
                    // execution cannot continue past a definite zero divisor
                    return Ok(AbstractValue::bottom());
                }
                if possibly_zero {
                    diags.push(Diagnostic::new(
                        ErrorKind::PossibleDivByZero,
                        "divisor may be zero",
                        self.function,
                        loc.clone(),
                    ));
                }
                let range = if op == BinOp::Div {
                    l.range.div(&r.range)
                } else {
                    l.range.rem(&r.range)
                };
                let sign = if op == BinOp::Div {
                    l.sign.div(r.sign)
                } else {
                    Sign::top()
                };
                numeric(sign, range)
            }
            BinOp::And | BinOp::Or => unreachable!("handled above"),
            _ => unreachable!("comparisons handled above"),
        };
        Ok(value)
    }

    /// Nullability check for attribute access and indexing. A definite
    /// null makes the result impossible; a possible null is reported and
    /// the dereferenced variable is refined to non-null, since execution
    /// only continues when the dereference succeeded.
    fn check_deref(
        &self,
        obj: &AbstractValue,
        object_expr: &Expr,
        what: &str,
        loc: &SourceLoc,
        state: &mut AbstractState,
        diags: &mut Vec<Diagnostic>,
    ) -> AbstractValue {
        match obj.null {
            Nullability::DefinitelyNull => {
                diags.push(Diagnostic::new(
                    ErrorKind::NullDereference,
                    format!("{} on a null value", what),
                    self.function,
                    loc.clone(),
                ));
                AbstractValue::bottom()
            }
            Nullability::Nullable => {
                diags.push(Diagnostic::new(
                    ErrorKind::PossibleNullDereference,
                    format!("{} on a possibly-null value", what),
                    self.function,
                    loc.clone(),
                ));
                if let Expr::Var { name, .. } = object_expr {
                    let mut refined = state.get(name);
                    refined.null = Nullability::NotNull;
                    state.set(name, refined.masked(self.config));
                }
                AbstractValue::top()
            }
            Nullability::NotNull => AbstractValue::top(),
            Nullability::Bottom => AbstractValue::bottom(),
        }
    }

    /// Bounds check against the `<name>_len` companion variable, when one
    /// is bound.
    fn check_bounds(
        &self,
        object_expr: &Expr,
        idx: &AbstractValue,
        loc: &SourceLoc,
        state: &AbstractState,
        diags: &mut Vec<Diagnostic>,
    ) -> AbstractValue {
        let Expr::Var { name, .. } = object_expr else {
            return AbstractValue::top();
        };
        let len = state.get(&format!("{}_len", name));
        if len.range.is_top() {
            // no length information for this object
            return AbstractValue::top();
        }
        let (Interval::Range { lo: len_lo, hi: len_hi }, Interval::Range { lo: idx_lo, hi: idx_hi }) =
            (len.range, idx.range)
        else {
            return AbstractValue::top();
        };

        let definitely_out = idx_hi < Bound::Finite(0) || idx_lo >= len_hi;
        let possibly_out = idx_lo < Bound::Finite(0) || idx_hi >= len_lo;
        if definitely_out {
            diags.push(Diagnostic::new(
                ErrorKind::OutOfBounds,
                format!("index is outside the bounds of '{}'", name),
                self.function,
                loc.clone(),
            ));
            return AbstractValue::bottom();
        }
        if possibly_out {
            diags.push(Diagnostic::new(
                ErrorKind::PossibleOutOfBounds,
                format!("index may be outside the bounds of '{}'", name),
                self.function,
                loc.clone(),
            ));
        }
        AbstractValue::top()
    }

    /// Split a state on a branch condition. `None` means the branch is
    /// impossible and the edge is pruned. Conditions the refiner does not
    /// understand pass the state through unchanged.
    pub fn refine(
        &self,
        cond: &Expr,
        state: &AbstractState,
        assume: bool,
    ) -> Option<AbstractState> {
        match cond {
            Expr::Const {
                value: Const::Bool(b),
                ..
            } => {
                if *b == assume {
                    Some(state.clone())
                } else {
                    None
                }
            }
            Expr::UnaryOp {
                op: UnaryOp::Not,
                operand,
                ..
            } => self.refine(operand, state, !assume),
            Expr::BinOp {
                op: BinOp::And,
                lhs,
                rhs,
                ..
            } if assume => {
                let refined = self.refine(lhs, state, true)?;
                self.refine(rhs, &refined, true)
            }
            Expr::BinOp {
                op: BinOp::Or,
                lhs,
                rhs,
                ..
            } if !assume => {
                let refined = self.refine(lhs, state, false)?;
                self.refine(rhs, &refined, false)
            }
            Expr::BinOp { op, lhs, rhs, .. } if op.is_comparison() => {
                let op = if assume { *op } else { negate_compare(*op) };
                self.refine_compare(op, lhs, rhs, state)
            }
            Expr::Var { name, .. } if assume => {
                // truthiness: a true branch rules out null
                let mut refined = state.get(name);
                if refined.null == Nullability::DefinitelyNull {
                    return None;
                }
                refined.null = Nullability::NotNull;
                let mut out = state.clone();
                out.set(name, refined.masked(self.config));
                Some(out)
            }
            _ => Some(state.clone()),
        }
    }

    fn refine_compare(
        &self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        state: &AbstractState,
    ) -> Option<AbstractState> {
        match (lhs, rhs) {
            // x <op> null and null <op> x
            (Expr::Var { name, .. }, Expr::Const { value: Const::Null, .. })
            | (Expr::Const { value: Const::Null, .. }, Expr::Var { name, .. })
                if matches!(op, BinOp::Eq | BinOp::Ne) =>
            {
                self.refine_null_test(name, op == BinOp::Eq, state)
            }
            (Expr::Var { name, .. }, Expr::Const { value, .. }) => {
                let Some(k) = const_as_int(value) else {
                    return Some(state.clone());
                };
                self.refine_var_against(name, op, &Interval::constant(k), state)
            }
            (Expr::Const { value, .. }, Expr::Var { name, .. }) => {
                let Some(k) = const_as_int(value) else {
                    return Some(state.clone());
                };
                self.refine_var_against(name, flip_compare(op), &Interval::constant(k), state)
            }
            (Expr::Var { name: a, .. }, Expr::Var { name: b, .. }) => {
                let rb = state.get(b).range;
                let refined = self.refine_var_against(a, op, &rb, state)?;
                let ra = state.get(a).range;
                self.refine_var_against(b, flip_compare(op), &ra, &refined)
            }
            (Expr::Const { value: a, .. }, Expr::Const { value: b, .. }) => {
                // a constant condition either holds or prunes the branch
                match decide_compare(op, &AbstractValue::of_const(a), &AbstractValue::of_const(b)) {
                    Some(false) => None,
                    _ => Some(state.clone()),
                }
            }
            _ => Some(state.clone()),
        }
    }

    fn refine_null_test(
        &self,
        name: &str,
        is_null: bool,
        state: &AbstractState,
    ) -> Option<AbstractState> {
        let mut value = state.get(name);
        let target = if is_null {
            Nullability::DefinitelyNull
        } else {
            Nullability::NotNull
        };
        value.null = value.null.meet(&target);
        if value.null.is_bottom() {
            return None;
        }
        let mut out = state.clone();
        out.set(name, value.masked(self.config));
        Some(out)
    }

    /// Narrow `name` so that `name <op> bound-interval` can hold.
    fn refine_var_against(
        &self,
        name: &str,
        op: BinOp,
        other: &Interval,
        state: &AbstractState,
    ) -> Option<AbstractState> {
        let (other_lo, other_hi) = match *other {
            Interval::Range { lo, hi } => (lo, hi),
            Interval::Empty => return Some(state.clone()),
        };
        let mut value = state.get(name);

        let constraint = match op {
            BinOp::Lt => Interval::at_most(other_hi.pred()),
            BinOp::Le => Interval::at_most(other_hi),
            BinOp::Gt => Interval::at_least(other_lo.succ()),
            BinOp::Ge => Interval::at_least(other_lo),
            BinOp::Eq => *other,
            BinOp::Ne => {
                // only a singleton on an endpoint can narrow the range
                match (other.as_singleton(), value.range) {
                    (Some(k), Interval::Range { lo, hi }) if lo == Bound::Finite(k) => {
                        Interval::new(lo.succ(), hi)
                    }
                    (Some(k), Interval::Range { lo, hi }) if hi == Bound::Finite(k) => {
                        Interval::new(lo, hi.pred())
                    }
                    _ => Interval::top(),
                }
            }
            _ => Interval::top(),
        };
        value.range = value.range.meet(&constraint);

        value.sign = value.sign.meet(&sign_constraint(op, other_lo, other_hi));
        // comparing forces a number; an empty numeric half means the
        // branch cannot be taken
        if value.has_no_number() {
            return None;
        }
        value.null = value.null.meet(&Nullability::NotNull);
        if value.null.is_bottom() {
            return None;
        }

        let mut out = state.clone();
        out.set(name, value.masked(self.config));
        Some(out)
    }
}

/// Sign implied by `x <op> [lo, hi]`
fn sign_constraint(op: BinOp, lo: Bound, hi: Bound) -> Sign {
    match op {
        BinOp::Lt if hi <= Bound::Finite(0) => Sign::Neg,
        BinOp::Le if hi < Bound::Finite(0) => Sign::Neg,
        BinOp::Gt if lo >= Bound::Finite(0) => Sign::Pos,
        BinOp::Ge if lo > Bound::Finite(0) => Sign::Pos,
        BinOp::Eq => match (lo, hi) {
            (Bound::Finite(a), Bound::Finite(b)) if a == b => Sign::of(a),
            _ => Sign::Top,
        },
        _ => Sign::Top,
    }
}

fn numeric(sign: Sign, range: Interval) -> AbstractValue {
    AbstractValue {
        sign,
        null: Nullability::NotNull,
        range,
    }
}

/// The abstract boolean: zero or one, not null
fn bool_top() -> AbstractValue {
    AbstractValue {
        sign: Sign::Top,
        null: Nullability::NotNull,
        range: Interval::new(Bound::Finite(0), Bound::Finite(1)),
    }
}

fn const_as_int(value: &Const) -> Option<i64> {
    match value {
        Const::Int(k) => Some(*k),
        Const::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn negate_compare(op: BinOp) -> BinOp {
    match op {
        BinOp::Eq => BinOp::Ne,
        BinOp::Ne => BinOp::Eq,
        BinOp::Lt => BinOp::Ge,
        BinOp::Le => BinOp::Gt,
        BinOp::Gt => BinOp::Le,
        BinOp::Ge => BinOp::Lt,
        other => other,
    }
}

/// `a <op> b` rewritten as `b <op'> a`
fn flip_compare(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Le => BinOp::Ge,
        BinOp::Gt => BinOp::Lt,
        BinOp::Ge => BinOp::Le,
        other => other,
    }
}

/// Try to decide a comparison from the abstract operands
fn decide_compare(op: BinOp, l: &AbstractValue, r: &AbstractValue) -> Option<bool> {
    // nullability can decide equality regardless of numerics
    if matches!(op, BinOp::Eq | BinOp::Ne) {
        let decided = match (l.null, r.null) {
            (Nullability::DefinitelyNull, Nullability::DefinitelyNull) => Some(true),
            (Nullability::DefinitelyNull, Nullability::NotNull)
            | (Nullability::NotNull, Nullability::DefinitelyNull) => Some(false),
            _ => None,
        };
        if let Some(eq) = decided {
            return Some(if op == BinOp::Eq { eq } else { !eq });
        }
    }

    // numeric decisions need both sides to actually be numbers
    if l.null != Nullability::NotNull || r.null != Nullability::NotNull {
        return None;
    }
    let (Interval::Range { lo: a, hi: b }, Interval::Range { lo: c, hi: d }) = (l.range, r.range)
    else {
        return None;
    };

    match op {
        BinOp::Lt => {
            if b < c {
                Some(true)
            } else if a >= d {
                Some(false)
            } else {
                None
            }
        }
        BinOp::Le => {
            if b <= c {
                Some(true)
            } else if a > d {
                Some(false)
            } else {
                None
            }
        }
        BinOp::Gt => decide_compare(BinOp::Lt, r, l),
        BinOp::Ge => decide_compare(BinOp::Le, r, l),
        BinOp::Eq => match (l.range.as_singleton(), r.range.as_singleton()) {
            (Some(x), Some(y)) => Some(x == y),
            _ => {
                if l.range.meet(&r.range).is_bottom() {
                    Some(false)
                } else {
                    None
                }
            }
        },
        BinOp::Ne => decide_compare(BinOp::Eq, l, r).map(|b| !b),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceLoc;

    fn at(line: usize) -> SourceLoc {
        SourceLoc::new("test.mica", line, 0)
    }

    fn eval_in(
        expr: &Expr,
        state: &mut AbstractState,
    ) -> (AbstractValue, Vec<Diagnostic>) {
        let config = AnalysisConfig::default();
        let mut transfer = Transfer::new(&config, "f");
        let mut diags = Vec::new();
        let value = transfer
            .eval(expr, state, &mut TopOracle, &mut diags)
            .unwrap();
        (value, diags)
    }

    #[test]
    fn test_literal_eval() {
        let mut state = AbstractState::new();
        let (v, diags) = eval_in(&Expr::int(5, at(0)), &mut state);
        assert_eq!(v, AbstractValue::of_int(5));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_addition_of_constants() {
        let mut state = AbstractState::new();
        let e = Expr::binop(BinOp::Add, Expr::int(2, at(0)), Expr::int(3, at(0)), at(0));
        let (v, _) = eval_in(&e, &mut state);
        assert_eq!(v.range.as_singleton(), Some(5));
        assert_eq!(v.sign, Sign::Pos);
    }

    #[test]
    fn test_division_by_definite_zero() {
        let mut state = AbstractState::new();
        let e = Expr::binop(BinOp::Div, Expr::int(1, at(0)), Expr::int(0, at(0)), at(0));
        let (v, diags) = eval_in(&e, &mut state);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, ErrorKind::DivByZero);
        assert!(v.is_impossible());
    }

    #[test]
    fn test_division_by_unknown_parameter() {
        let mut state = AbstractState::new();
        let e = Expr::binop(
            BinOp::Div,
            Expr::var("x", at(0)),
            Expr::var("y", at(0)),
            at(0),
        );
        let (v, diags) = eval_in(&e, &mut state);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, ErrorKind::PossibleDivByZero);
        assert!(v.range.is_top());
    }

    #[test]
    fn test_division_by_known_positive_is_clean() {
        let mut state = AbstractState::new();
        state.set(
            "y",
            AbstractValue {
                sign: Sign::Pos,
                null: Nullability::NotNull,
                range: Interval::new(Bound::Finite(2), Bound::Finite(4)),
            },
        );
        let e = Expr::binop(
            BinOp::Div,
            Expr::int(8, at(0)),
            Expr::var("y", at(0)),
            at(0),
        );
        let (v, diags) = eval_in(&e, &mut state);
        assert!(diags.is_empty());
        assert_eq!(
            v.range,
            Interval::new(Bound::Finite(2), Bound::Finite(4))
        );
    }

    #[test]
    fn test_attr_on_definite_null() {
        let mut state = AbstractState::new();
        state.set("x", AbstractValue::null());
        let e = Expr::attr(Expr::var("x", at(0)), "field", at(0));
        let (v, diags) = eval_in(&e, &mut state);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, ErrorKind::NullDereference);
        assert!(v.is_impossible());
    }

    #[test]
    fn test_attr_on_nullable_warns_and_refines() {
        let mut state = AbstractState::new();
        state.set(
            "x",
            AbstractValue {
                null: Nullability::Nullable,
                ..AbstractValue::top()
            },
        );
        let e = Expr::attr(Expr::var("x", at(0)), "field", at(0));
        let (_, diags) = eval_in(&e, &mut state);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, ErrorKind::PossibleNullDereference);
        // the dereference implies x was not null
        assert_eq!(state.get("x").null, Nullability::NotNull);
    }

    #[test]
    fn test_index_bounds_definite_overflow() {
        let mut state = AbstractState::new();
        state.set("a", AbstractValue::object());
        state.set("a_len", AbstractValue::of_int(3));
        let e = Expr::index(Expr::var("a", at(0)), Expr::int(5, at(0)), at(0));
        let (v, diags) = eval_in(&e, &mut state);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, ErrorKind::OutOfBounds);
        assert!(v.is_impossible());
    }

    #[test]
    fn test_index_bounds_possible_overflow() {
        let mut state = AbstractState::new();
        state.set("a", AbstractValue::object());
        state.set("a_len", AbstractValue::of_int(3));
        state.set(
            "i",
            AbstractValue {
                sign: Sign::Top,
                null: Nullability::NotNull,
                range: Interval::new(Bound::Finite(0), Bound::Finite(4)),
            },
        );
        let e = Expr::index(Expr::var("a", at(0)), Expr::var("i", at(0)), at(0));
        let (_, diags) = eval_in(&e, &mut state);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, ErrorKind::PossibleOutOfBounds);
    }

    #[test]
    fn test_index_in_bounds_is_silent() {
        let mut state = AbstractState::new();
        state.set("a", AbstractValue::object());
        state.set("a_len", AbstractValue::of_int(3));
        let e = Expr::index(Expr::var("a", at(0)), Expr::int(2, at(0)), at(0));
        let (_, diags) = eval_in(&e, &mut state);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_comparison_decided_by_ranges() {
        let mut state = AbstractState::new();
        state.set("x", AbstractValue::of_int(2));
        let e = Expr::binop(BinOp::Lt, Expr::var("x", at(0)), Expr::int(10, at(0)), at(0));
        let (v, _) = eval_in(&e, &mut state);
        assert_eq!(v, AbstractValue::of_bool(true));
    }

    #[test]
    fn test_undecidable_comparison_is_boolean_shaped() {
        let mut state = AbstractState::new();
        let e = Expr::binop(
            BinOp::Lt,
            Expr::var("x", at(0)),
            Expr::var("y", at(0)),
            at(0),
        );
        let (v, _) = eval_in(&e, &mut state);
        assert_eq!(
            v.range,
            Interval::new(Bound::Finite(0), Bound::Finite(1))
        );
        assert_eq!(v.null, Nullability::NotNull);
    }

    #[test]
    fn test_null_equality_decided_by_nullability() {
        let mut state = AbstractState::new();
        state.set("x", AbstractValue::null());
        let e = Expr::binop(
            BinOp::Eq,
            Expr::var("x", at(0)),
            Expr::null(at(0)),
            at(0),
        );
        let (v, _) = eval_in(&e, &mut state);
        assert_eq!(v, AbstractValue::of_bool(true));
    }

    #[test]
    fn test_refine_less_than_constant() {
        let config = AnalysisConfig::default();
        let transfer = Transfer::new(&config, "f");
        let state = AbstractState::new();
        let cond = Expr::binop(BinOp::Lt, Expr::var("x", at(0)), Expr::int(10, at(0)), at(0));

        let then_state = transfer.refine(&cond, &state, true).unwrap();
        assert_eq!(
            then_state.get("x").range,
            Interval::at_most(Bound::Finite(9))
        );

        let else_state = transfer.refine(&cond, &state, false).unwrap();
        assert_eq!(
            else_state.get("x").range,
            Interval::at_least(Bound::Finite(10))
        );
        assert_eq!(else_state.get("x").sign, Sign::Pos);
    }

    #[test]
    fn test_refine_prunes_impossible_branch() {
        let config = AnalysisConfig::default();
        let transfer = Transfer::new(&config, "f");
        let mut state = AbstractState::new();
        state.set("x", AbstractValue::of_int(5));
        let cond = Expr::binop(BinOp::Lt, Expr::var("x", at(0)), Expr::int(0, at(0)), at(0));
        assert!(transfer.refine(&cond, &state, true).is_none());
        assert!(transfer.refine(&cond, &state, false).is_some());
    }

    #[test]
    fn test_refine_conjunction_on_true_branch() {
        let config = AnalysisConfig::default();
        let transfer = Transfer::new(&config, "g");
        let state = AbstractState::new();
        let cond = Expr::binop(
            BinOp::And,
            Expr::binop(BinOp::Gt, Expr::var("a", at(0)), Expr::int(0, at(0)), at(0)),
            Expr::binop(BinOp::Gt, Expr::var("b", at(0)), Expr::int(0, at(0)), at(0)),
            at(0),
        );
        let refined = transfer.refine(&cond, &state, true).unwrap();
        assert_eq!(refined.get("a").sign, Sign::Pos);
        assert_eq!(refined.get("b").sign, Sign::Pos);
        // the false branch of a conjunction tells us nothing
        let unrefined = transfer.refine(&cond, &state, false).unwrap();
        assert!(unrefined.get("a").is_top());
    }

    #[test]
    fn test_refine_null_test() {
        let config = AnalysisConfig::default();
        let transfer = Transfer::new(&config, "f");
        let state = AbstractState::new();
        let cond = Expr::binop(
            BinOp::Eq,
            Expr::var("x", at(0)),
            Expr::null(at(0)),
            at(0),
        );
        let then_state = transfer.refine(&cond, &state, true).unwrap();
        assert_eq!(then_state.get("x").null, Nullability::DefinitelyNull);
        let else_state = transfer.refine(&cond, &state, false).unwrap();
        assert_eq!(else_state.get("x").null, Nullability::NotNull);
    }

    #[test]
    fn test_refine_var_vs_var() {
        let config = AnalysisConfig::default();
        let transfer = Transfer::new(&config, "f");
        let mut state = AbstractState::new();
        state.set(
            "y",
            AbstractValue {
                sign: Sign::Top,
                null: Nullability::NotNull,
                range: Interval::new(Bound::Finite(0), Bound::Finite(10)),
            },
        );
        let cond = Expr::binop(
            BinOp::Lt,
            Expr::var("x", at(0)),
            Expr::var("y", at(0)),
            at(0),
        );
        let refined = transfer.refine(&cond, &state, true).unwrap();
        assert_eq!(
            refined.get("x").range,
            Interval::at_most(Bound::Finite(9))
        );
        // y must exceed some number, so it is at least above -inf; its
        // range cannot gain a finite lower bound from an unbounded x
        assert_eq!(
            refined.get("y").range,
            Interval::new(Bound::Finite(0), Bound::Finite(10))
        );
    }

    #[test]
    fn test_monotone_transfer_on_assign() {
        // a smaller input state produces a smaller output state
        let config = AnalysisConfig::default();
        let expr = Expr::binop(BinOp::Add, Expr::var("x", at(0)), Expr::int(1, at(0)), at(0));
        let stmt = Stmt::assign("y", expr, at(0));

        let mut small = AbstractState::new();
        small.set("x", AbstractValue::of_int(1));
        let mut big = AbstractState::new();
        big.set(
            "x",
            AbstractValue::of_int(1).join(&AbstractValue::of_int(9)),
        );

        let mut t = Transfer::new(&config, "f");
        let mut diags = Vec::new();
        t.transfer_stmt(&stmt, &mut small, &mut TopOracle, &mut diags)
            .unwrap();
        t.transfer_stmt(&stmt, &mut big, &mut TopOracle, &mut diags)
            .unwrap();

        let joined = small.get("y").join(&big.get("y"));
        assert_eq!(joined, big.get("y"));
    }

    #[test]
    fn test_not_of_literal() {
        let mut state = AbstractState::new();
        let e = Expr::unary(UnaryOp::Not, Expr::bool(false, at(0)), at(0));
        let (v, _) = eval_in(&e, &mut state);
        assert_eq!(v, AbstractValue::of_bool(true));
    }

    #[test]
    fn test_negation() {
        let mut state = AbstractState::new();
        let e = Expr::unary(UnaryOp::Neg, Expr::int(4, at(0)), at(0));
        let (v, _) = eval_in(&e, &mut state);
        assert_eq!(v.range.as_singleton(), Some(-4));
        assert_eq!(v.sign, Sign::Neg);
    }
}
