//! Interprocedural driver
//!
//! Processes the call graph bottom-up: SCCs in callees-before-callers
//! order, a summary-level fixpoint inside recursive SCCs, and a
//! context-keyed cache so each function is analyzed once per
//! distinguishable calling context. All run-wide state lives in the
//! [`Analyzer`] value; there are no process-wide singletons.

use crate::ast::{self, Function, SourceLoc};
use crate::call_graph::CallGraph;
use crate::cfg::build_cfg;
use crate::config::AnalysisConfig;
use crate::diagnostics::{sort_diagnostics, AnalysisError, Diagnostic, ErrorKind, Severity};
use crate::domains::AbstractValue;
use crate::solver::{solve, BlockStates};
use crate::state::AbstractState;
use crate::summary::{ContextKey, FunctionSummary, SummaryCache};
use crate::transfer::{CallEffect, CalleeOracle};
use crate::CancellationToken;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Everything a run produces
#[derive(Debug)]
pub struct AnalysisResult {
    /// Per-function summary under the entry (all-top) context
    pub summaries: HashMap<String, FunctionSummary>,
    /// All findings, sorted by location then kind, duplicates removed
    pub diagnostics: Vec<Diagnostic>,
    /// Per-function block invariants under the entry context, for clients
    /// that need facts at specific program points
    pub block_states: HashMap<String, BlockStates>,
}

/// Rounds of the summary fixpoint before giving up on an SCC
const MAX_SCC_ROUNDS: usize = 64;

pub struct Analyzer<'a> {
    functions: HashMap<&'a str, &'a Function>,
    graph: CallGraph,
    config: &'a AnalysisConfig,
    cancel: CancellationToken,
    cache: SummaryCache,
    /// Members of the SCC currently iterating, if any
    current_scc: Option<HashSet<String>>,
    /// Working summaries for the current SCC fixpoint
    in_progress: HashMap<(String, ContextKey), FunctionSummary>,
    /// Contexts discovered during the current SCC round
    pending: Vec<(String, ContextKey)>,
    entry_summaries: HashMap<String, FunctionSummary>,
    entry_block_states: HashMap<String, BlockStates>,
}

impl<'a> Analyzer<'a> {
    pub fn new(
        functions: &'a [Function],
        config: &'a AnalysisConfig,
        cancel: CancellationToken,
    ) -> Self {
        let map: HashMap<&str, &Function> =
            functions.iter().map(|f| (f.name.as_str(), f)).collect();
        Analyzer {
            functions: map,
            graph: CallGraph::build(functions),
            config,
            cancel,
            cache: SummaryCache::new(config.context_cache_size),
            current_scc: None,
            in_progress: HashMap::new(),
            pending: Vec::new(),
            entry_summaries: HashMap::new(),
            entry_block_states: HashMap::new(),
        }
    }

    /// Analyze the whole program bottom-up.
    pub fn run(functions: &'a [Function], config: &'a AnalysisConfig, cancel: CancellationToken)
        -> Result<AnalysisResult, AnalysisError>
    {
        ast::validate_functions(functions).map_err(AnalysisError::MalformedAst)?;
        let mut analyzer = Analyzer::new(functions, config, cancel);

        let sccs: Vec<Vec<String>> = analyzer.graph.sccs().to_vec();
        for scc in &sccs {
            if analyzer.cancel.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            if analyzer.graph.scc_is_recursive(scc) {
                analyzer.solve_recursive_scc(scc, Vec::new())?;
            } else {
                for name in scc {
                    let function = analyzer.functions[name.as_str()];
                    let key = ContextKey::entry(function.params.len());
                    analyzer.summary_of(name, key)?;
                }
            }
        }

        let mut diagnostics: Vec<Diagnostic> = analyzer
            .entry_summaries
            .values()
            .flat_map(|s| s.diagnostics.iter().cloned())
            .collect();
        sort_diagnostics(&mut diagnostics);

        Ok(AnalysisResult {
            summaries: analyzer.entry_summaries,
            diagnostics,
            block_states: analyzer.entry_block_states,
        })
    }

    /// Fetch or compute the summary of a defined function under a
    /// context.
    fn summary_of(
        &mut self,
        name: &str,
        key: ContextKey,
    ) -> Result<FunctionSummary, AnalysisError> {
        if let Some(summary) = self.cache.get(name, &key) {
            return Ok(summary.clone());
        }
        if self.graph.is_recursive(name) {
            let scc: Vec<String> = self
                .graph
                .sccs()
                .iter()
                .find(|scc| scc.iter().any(|f| f == name))
                .cloned()
                .expect("function belongs to some scc");
            self.solve_recursive_scc(&scc, vec![(name.to_string(), key.clone())])?;
            return Ok(self
                .cache
                .get(name, &key)
                .cloned()
                .unwrap_or_else(FunctionSummary::top));
        }

        let (summary, states) = self.analyze_or_degrade(name, &key)?;
        self.cache.insert(name, key.clone(), summary.clone());
        self.record_entry_results(name, &key, &summary, states);
        Ok(summary)
    }

    /// Summary-level fixpoint over a recursive SCC. Starts from bottom
    /// seeds, re-analyzes every encountered (member, context) pair until
    /// nothing changes, widening summaries that keep growing.
    fn solve_recursive_scc(
        &mut self,
        scc: &[String],
        extra_seeds: Vec<(String, ContextKey)>,
    ) -> Result<(), AnalysisError> {
        // save any enclosing fixpoint; a new context arriving for an
        // already-processed SCC re-enters here mid-analysis
        let saved_scc = self.current_scc.take();
        let saved_in_progress = std::mem::take(&mut self.in_progress);
        let saved_pending = std::mem::take(&mut self.pending);

        self.current_scc = Some(scc.iter().cloned().collect());

        let mut contexts: Vec<(String, ContextKey)> = scc
            .iter()
            .map(|name| {
                let params = self.functions[name.as_str()].params.len();
                (name.clone(), ContextKey::entry(params))
            })
            .collect();
        for seed in extra_seeds {
            if !contexts.contains(&seed) {
                contexts.push(seed);
            }
        }
        for (name, key) in &contexts {
            self.in_progress
                .insert((name.clone(), key.clone()), FunctionSummary::seed());
        }

        let mut last_states: HashMap<(String, ContextKey), Option<BlockStates>> = HashMap::new();
        let mut round = 0;
        loop {
            if self.cancel.is_cancelled() {
                self.current_scc = saved_scc;
                self.in_progress = saved_in_progress;
                self.pending = saved_pending;
                return Err(AnalysisError::Cancelled);
            }
            let mut changed = false;
            let mut index = 0;
            while index < contexts.len() {
                let (name, key) = contexts[index].clone();
                index += 1;

                let (mut summary, states) = self.analyze_or_degrade(&name, &key)?;
                // pick up contexts discovered while analyzing
                for discovered in std::mem::take(&mut self.pending) {
                    if !contexts.contains(&discovered) {
                        contexts.push(discovered);
                    }
                }

                let slot = (name.clone(), key.clone());
                let previous = self
                    .in_progress
                    .get(&slot)
                    .cloned()
                    .unwrap_or_else(FunctionSummary::seed);
                if round >= self.config.widening_threshold {
                    summary.widen_unstable(&previous);
                }
                if !summary.same_shape(&previous) {
                    changed = true;
                }
                self.in_progress.insert(slot.clone(), summary);
                last_states.insert(slot, states);
            }
            round += 1;
            if !changed {
                break;
            }
            if round > MAX_SCC_ROUNDS {
                warn!(scc = ?scc, "summary fixpoint failed to settle, degrading to top");
                for slot in self.in_progress.values_mut() {
                    *slot = FunctionSummary::top();
                }
                break;
            }
        }
        debug!(scc = ?scc, rounds = round, contexts = contexts.len(), "scc converged");

        // publish the converged summaries
        let finished = std::mem::take(&mut self.in_progress);
        for ((name, key), summary) in finished {
            let states = last_states.remove(&(name.clone(), key.clone())).flatten();
            self.record_entry_results(&name, &key, &summary, states);
            self.cache.insert(&name, key, summary);
        }

        self.current_scc = saved_scc;
        self.in_progress = saved_in_progress;
        self.pending = saved_pending;
        Ok(())
    }

    /// Run the intraprocedural analysis, degrading to the top summary on
    /// timeout or internal failure. Only cancellation propagates.
    fn analyze_or_degrade(
        &mut self,
        name: &str,
        key: &ContextKey,
    ) -> Result<(FunctionSummary, Option<BlockStates>), AnalysisError> {
        match self.analyze_function(name, key) {
            Ok((summary, states)) => Ok((summary, Some(states))),
            Err(AnalysisError::Cancelled) => Err(AnalysisError::Cancelled),
            Err(AnalysisError::Timeout(func)) => {
                warn!(function = %func, "analysis timed out, installing top summary");
                let function = self.functions[name];
                let mut summary = FunctionSummary::top();
                summary.diagnostics.push(Diagnostic::new(
                    ErrorKind::Timeout,
                    "analysis exceeded its time budget",
                    name,
                    function_loc(function),
                ));
                Ok((summary, None))
            }
            Err(err) => {
                warn!(function = name, error = %err, "analysis failed, installing top summary");
                let function = self.functions[name];
                let mut summary = FunctionSummary::top();
                summary.diagnostics.push(Diagnostic::new(
                    ErrorKind::InternalError,
                    err.to_string(),
                    name,
                    function_loc(function),
                ));
                Ok((summary, None))
            }
        }
    }

    fn analyze_function(
        &mut self,
        name: &str,
        key: &ContextKey,
    ) -> Result<(FunctionSummary, BlockStates), AnalysisError> {
        let function = self.functions[name];
        debug!(function = name, "analyzing");

        let mut entry_state = AbstractState::new();
        let mut preconditions = std::collections::BTreeMap::new();
        for (i, param) in function.params.iter().enumerate() {
            let value = key
                .args()
                .get(i)
                .copied()
                .unwrap_or_else(AbstractValue::top)
                .masked(self.config);
            entry_state.set(param, value);
            preconditions.insert(param.clone(), value);
        }

        let (cfg, cfg_diagnostics) =
            build_cfg(function).map_err(AnalysisError::Internal)?;
        let deadline =
            Instant::now() + Duration::from_millis(self.config.function_timeout_ms);
        let cancel = self.cancel.clone();
        let config = self.config;

        let result = solve(
            function,
            &cfg,
            entry_state,
            config,
            self,
            Some(deadline),
            &cancel,
        )?;

        let post_states = match &result.exit_state {
            Some(exit) => function
                .params
                .iter()
                .map(|p| (p.clone(), exit.get(p)))
                .collect(),
            // the function never returns; callers see parameters as given
            None => preconditions.clone(),
        };

        let mut diagnostics = cfg_diagnostics;
        diagnostics.extend(result.diagnostics);
        diagnostics.retain(|d| {
            d.severity == Severity::Error
                || !function
                    .allowed_warnings
                    .iter()
                    .any(|allowed| allowed.as_str() == d.kind.as_str())
        });
        sort_diagnostics(&mut diagnostics);

        let summary = FunctionSummary {
            preconditions,
            post_states,
            ret: result.return_value,
            modifies: Default::default(),
            may_do_io: result.may_do_io,
            diagnostics,
        };
        Ok((summary, result.states))
    }

    fn record_entry_results(
        &mut self,
        name: &str,
        key: &ContextKey,
        summary: &FunctionSummary,
        states: Option<BlockStates>,
    ) {
        let params = self.functions[name].params.len();
        if *key == ContextKey::entry(params) {
            self.entry_summaries
                .insert(name.to_string(), summary.clone());
            if let Some(states) = states {
                self.entry_block_states.insert(name.to_string(), states);
            }
        }
    }
}

impl CalleeOracle for Analyzer<'_> {
    fn apply_call(
        &mut self,
        callee: &str,
        args: &[AbstractValue],
        loc: &SourceLoc,
        caller: &str,
        diags: &mut Vec<Diagnostic>,
    ) -> Result<CallEffect, AnalysisError> {
        let Some(function) = self.functions.get(callee).copied() else {
            // unresolvable callee: the universal unknown summary
            let summary = if self.config.treat_unknown_callees_as_pure {
                FunctionSummary::pure_unknown()
            } else {
                FunctionSummary::top()
            };
            return Ok(CallEffect {
                ret: summary.ret,
                may_do_io: summary.may_do_io,
            });
        };

        // key over exactly the parameters; surplus arguments are dropped,
        // missing ones are top
        let mut key_args: Vec<AbstractValue> = Vec::with_capacity(function.params.len());
        for i in 0..function.params.len() {
            key_args.push(args.get(i).copied().unwrap_or_else(AbstractValue::top));
        }
        let key = ContextKey::from_args(&key_args);

        // inside an SCC fixpoint, calls to fellow members read the
        // working summaries instead of triggering a nested analysis
        let in_current_scc = self
            .current_scc
            .as_ref()
            .is_some_and(|members| members.contains(callee));
        let summary = if in_current_scc {
            let slot = (callee.to_string(), key.clone());
            match self.in_progress.get(&slot) {
                Some(summary) => summary.clone(),
                None => {
                    self.in_progress
                        .insert(slot.clone(), FunctionSummary::seed());
                    self.pending.push(slot);
                    FunctionSummary::seed()
                }
            }
        } else {
            self.summary_of(callee, key)?
        };

        // surface the callee's findings at the call site
        for finding in &summary.diagnostics {
            diags.push(Diagnostic {
                kind: finding.kind,
                severity: finding.severity,
                message: format!("in call to '{}': {}", callee, finding.message),
                function: caller.to_string(),
                loc: loc.clone(),
            });
        }

        Ok(CallEffect {
            ret: summary.ret,
            may_do_io: summary.may_do_io,
        })
    }
}

fn function_loc(function: &Function) -> SourceLoc {
    function
        .source
        .clone()
        .unwrap_or_else(|| SourceLoc::new("<unknown>", 0, 0))
}
