//! Mica Static Analysis Engine
//!
//! A sound abstract-interpretation core for the Mica scripting language.
//! A frontend hands it function ASTs; it answers "does variable X always
//! satisfy property P at point L" for every reachable program point, and
//! reports definite and possible errors as diagnostics.
//!
//! Three abstract domains (sign, nullability, integer intervals) are
//! composed into a joint per-variable state, driven to a fixpoint over
//! each function's CFG with widening at loop headers, and stitched
//! together across calls by a bottom-up, context-sensitive summary
//! analysis over the call graph's SCCs.
//!
//! # Example
//!
//! ```rust,ignore
//! use micaa::{analyze_program, Function};
//!
//! let functions: Vec<Function> = frontend_lowering(source);
//! let result = analyze_program(&functions)?;
//! for diagnostic in &result.diagnostics {
//!     println!("{}", micaa::format_diagnostics(std::slice::from_ref(diagnostic)));
//! }
//! ```
//!
//! Analysis is sound, not complete: a clean report means no claim was
//! refuted, and "possible" findings may be false positives.

pub mod analyzer;
pub mod ast;
pub mod call_graph;
pub mod cfg;
pub mod config;
pub mod diagnostics;
pub mod domains;
pub mod solver;
pub mod state;
pub mod summary;
pub mod transfer;

pub use analyzer::{AnalysisResult, Analyzer};
pub use ast::{BinOp, Const, Expr, Function, SourceLoc, Stmt, UnaryOp};
pub use call_graph::CallGraph;
pub use config::AnalysisConfig;
pub use diagnostics::{
    diagnostics_to_json, format_diagnostics, AnalysisError, Diagnostic, ErrorKind, Severity,
};
pub use domains::{AbstractValue, Bound, Interval, Lattice, Nullability, Sign};
pub use solver::BlockStates;
pub use state::AbstractState;
pub use summary::{ContextKey, FunctionSummary};
pub use transfer::{CallEffect, CalleeOracle, TopOracle};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation handle, checked between blocks and between
/// SCCs. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Analyze a program with the default configuration.
pub fn analyze_program(functions: &[Function]) -> Result<AnalysisResult, AnalysisError> {
    analyze_program_with_config(functions, &AnalysisConfig::default())
}

/// Analyze a program with an explicit configuration.
pub fn analyze_program_with_config(
    functions: &[Function],
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalysisError> {
    Analyzer::run(functions, config, CancellationToken::new())
}

/// Analyze a program with a cancellation token the caller may trigger
/// from another thread. On cancellation the run unwinds cleanly and
/// returns [`AnalysisError::Cancelled`].
pub fn analyze_program_cancellable(
    functions: &[Function],
    config: &AnalysisConfig,
    cancel: CancellationToken,
) -> Result<AnalysisResult, AnalysisError> {
    Analyzer::run(functions, config, cancel)
}
