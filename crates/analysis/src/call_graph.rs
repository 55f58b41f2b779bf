//! Call graph analysis
//!
//! Builds the graph of direct calls between functions and computes its
//! strongly connected components with Tarjan's algorithm. SCCs come out
//! in callees-before-callers order, which is exactly the order the
//! interprocedural driver wants to process them in. Calls to names with
//! no definition are tracked separately; the driver gives them the
//! conservative unknown summary.

use crate::ast::{Expr, Function, Stmt};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A call graph over a set of function records
#[derive(Debug, Clone)]
pub struct CallGraph {
    /// Function names in input order
    order: Vec<String>,
    /// Caller name to the set of defined functions it calls
    edges: HashMap<String, BTreeSet<String>>,
    /// Callers that invoke at least one undefined name
    calls_unknown: HashSet<String>,
    /// All SCCs, callees before callers; singletons included
    sccs: Vec<Vec<String>>,
}

impl CallGraph {
    /// Build the call graph and its SCC decomposition.
    pub fn build(functions: &[Function]) -> Self {
        let known: HashSet<&str> = functions.iter().map(|f| f.name.as_str()).collect();
        let mut edges: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut calls_unknown = HashSet::new();

        for function in functions {
            let mut callees = BTreeSet::new();
            let mut unknown = false;
            collect_calls_in_body(&function.body, &mut |name| {
                if known.contains(name) {
                    callees.insert(name.to_string());
                } else {
                    unknown = true;
                }
            });
            if unknown {
                calls_unknown.insert(function.name.clone());
            }
            edges.insert(function.name.clone(), callees);
        }

        let order: Vec<String> = functions.iter().map(|f| f.name.clone()).collect();
        let mut graph = CallGraph {
            order,
            edges,
            calls_unknown,
            sccs: Vec::new(),
        };
        graph.sccs = graph.find_sccs();
        graph
    }

    /// All SCCs in callees-before-callers order
    pub fn sccs(&self) -> &[Vec<String>] {
        &self.sccs
    }

    pub fn callees(&self, function: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(function)
    }

    pub fn calls_unknown(&self, function: &str) -> bool {
        self.calls_unknown.contains(function)
    }

    /// True when the SCC containing `function` is a real cycle: more than
    /// one member, or a single member that calls itself.
    pub fn is_recursive(&self, function: &str) -> bool {
        self.sccs
            .iter()
            .find(|scc| scc.iter().any(|f| f == function))
            .is_some_and(|scc| self.scc_is_recursive(scc))
    }

    pub fn scc_is_recursive(&self, scc: &[String]) -> bool {
        if scc.len() > 1 {
            return true;
        }
        scc.first().is_some_and(|name| {
            self.edges
                .get(name)
                .is_some_and(|callees| callees.contains(name))
        })
    }

    pub fn are_mutually_recursive(&self, a: &str, b: &str) -> bool {
        self.sccs
            .iter()
            .any(|scc| scc.iter().any(|f| f == a) && scc.iter().any(|f| f == b))
            && a != b
    }

    /// Tarjan's algorithm. SCCs are emitted only after every SCC they can
    /// reach, so the emission order is the processing order for a
    /// bottom-up analysis.
    fn find_sccs(&self) -> Vec<Vec<String>> {
        let mut visitor = TarjanVisitor {
            edges: &self.edges,
            index_counter: 0,
            stack: Vec::new(),
            on_stack: HashSet::new(),
            indices: HashMap::new(),
            lowlinks: HashMap::new(),
            sccs: Vec::new(),
        };
        for name in &self.order {
            if !visitor.indices.contains_key(name.as_str()) {
                visitor.visit(name);
            }
        }
        visitor.sccs
    }
}

struct TarjanVisitor<'a> {
    edges: &'a HashMap<String, BTreeSet<String>>,
    index_counter: usize,
    stack: Vec<String>,
    on_stack: HashSet<String>,
    indices: HashMap<String, usize>,
    lowlinks: HashMap<String, usize>,
    sccs: Vec<Vec<String>>,
}

impl TarjanVisitor<'_> {
    fn visit(&mut self, name: &str) {
        let index = self.index_counter;
        self.index_counter += 1;
        self.indices.insert(name.to_string(), index);
        self.lowlinks.insert(name.to_string(), index);
        self.stack.push(name.to_string());
        self.on_stack.insert(name.to_string());

        if let Some(callees) = self.edges.get(name) {
            for callee in callees {
                if !self.indices.contains_key(callee) {
                    self.visit(callee);
                    let callee_lowlink = self.lowlinks[callee];
                    let lowlink = self.lowlinks.get_mut(name).expect("visited");
                    *lowlink = (*lowlink).min(callee_lowlink);
                } else if self.on_stack.contains(callee) {
                    let callee_index = self.indices[callee];
                    let lowlink = self.lowlinks.get_mut(name).expect("visited");
                    *lowlink = (*lowlink).min(callee_index);
                }
            }
        }

        if self.lowlinks[name] == self.indices[name] {
            let mut scc = Vec::new();
            loop {
                let member = self.stack.pop().expect("scc root on stack");
                self.on_stack.remove(&member);
                let done = member == name;
                scc.push(member);
                if done {
                    break;
                }
            }
            scc.sort();
            self.sccs.push(scc);
        }
    }
}

fn collect_calls_in_body(body: &[Stmt], sink: &mut impl FnMut(&str)) {
    for stmt in body {
        match stmt {
            Stmt::Assign { value, .. } => collect_calls_in_expr(value, sink),
            Stmt::Expr { expr, .. } => collect_calls_in_expr(expr, sink),
            Stmt::If {
                cond,
                then_body,
                else_body,
                ..
            } => {
                collect_calls_in_expr(cond, sink);
                collect_calls_in_body(then_body, sink);
                collect_calls_in_body(else_body, sink);
            }
            Stmt::While { cond, body, .. } => {
                collect_calls_in_expr(cond, sink);
                collect_calls_in_body(body, sink);
            }
            Stmt::Return { value, .. } => {
                if let Some(expr) = value {
                    collect_calls_in_expr(expr, sink);
                }
            }
            Stmt::Break { .. } | Stmt::Continue { .. } => {}
        }
    }
}

fn collect_calls_in_expr(expr: &Expr, sink: &mut impl FnMut(&str)) {
    match expr {
        Expr::Call { callee, args, .. } => {
            sink(callee);
            for arg in args {
                collect_calls_in_expr(arg, sink);
            }
        }
        Expr::BinOp { lhs, rhs, .. } => {
            collect_calls_in_expr(lhs, sink);
            collect_calls_in_expr(rhs, sink);
        }
        Expr::UnaryOp { operand, .. } => collect_calls_in_expr(operand, sink),
        Expr::Attr { object, .. } => collect_calls_in_expr(object, sink),
        Expr::Index { object, index, .. } => {
            collect_calls_in_expr(object, sink);
            collect_calls_in_expr(index, sink);
        }
        Expr::Const { .. } | Expr::Var { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceLoc;

    fn at(line: usize) -> SourceLoc {
        SourceLoc::new("test.mica", line, 0)
    }

    fn make_function(name: &str, calls: Vec<&str>) -> Function {
        let body = calls
            .into_iter()
            .enumerate()
            .map(|(i, callee)| Stmt::Expr {
                expr: Expr::call(callee, vec![], at(i)),
                loc: at(i),
            })
            .collect();
        Function::new(name, vec![], body)
    }

    #[test]
    fn test_no_recursion() {
        let functions = vec![
            make_function("foo", vec!["bar"]),
            make_function("bar", vec![]),
            make_function("baz", vec!["foo"]),
        ];
        let graph = CallGraph::build(&functions);
        assert!(!graph.is_recursive("foo"));
        assert!(!graph.is_recursive("bar"));
        assert!(!graph.is_recursive("baz"));
        assert_eq!(graph.sccs().len(), 3);
    }

    #[test]
    fn test_callees_before_callers() {
        let functions = vec![
            make_function("main", vec!["helper"]),
            make_function("helper", vec!["leaf"]),
            make_function("leaf", vec![]),
        ];
        let graph = CallGraph::build(&functions);
        let order: Vec<&str> = graph
            .sccs()
            .iter()
            .map(|scc| scc[0].as_str())
            .collect();
        assert_eq!(order, vec!["leaf", "helper", "main"]);
    }

    #[test]
    fn test_direct_recursion() {
        let functions = vec![
            make_function("countdown", vec!["countdown"]),
            make_function("helper", vec![]),
        ];
        let graph = CallGraph::build(&functions);
        assert!(graph.is_recursive("countdown"));
        assert!(!graph.is_recursive("helper"));
    }

    #[test]
    fn test_mutual_recursion_pair() {
        let functions = vec![
            make_function("ping", vec!["pong"]),
            make_function("pong", vec!["ping"]),
        ];
        let graph = CallGraph::build(&functions);
        assert!(graph.is_recursive("ping"));
        assert!(graph.is_recursive("pong"));
        assert!(graph.are_mutually_recursive("ping", "pong"));
        assert_eq!(graph.sccs().len(), 1);
        assert_eq!(graph.sccs()[0].len(), 2);
    }

    #[test]
    fn test_mutual_recursion_triple() {
        let functions = vec![
            make_function("a", vec!["b"]),
            make_function("b", vec!["c"]),
            make_function("c", vec!["a"]),
        ];
        let graph = CallGraph::build(&functions);
        assert_eq!(graph.sccs().len(), 1);
        assert_eq!(graph.sccs()[0].len(), 3);
        assert!(graph.are_mutually_recursive("a", "c"));
    }

    #[test]
    fn test_multiple_independent_cycles() {
        let functions = vec![
            make_function("ping", vec!["pong"]),
            make_function("pong", vec!["ping"]),
            make_function("even", vec!["odd"]),
            make_function("odd", vec!["even"]),
            make_function("main", vec!["ping", "even"]),
        ];
        let graph = CallGraph::build(&functions);
        assert!(graph.are_mutually_recursive("ping", "pong"));
        assert!(graph.are_mutually_recursive("even", "odd"));
        assert!(!graph.are_mutually_recursive("ping", "even"));
        assert!(!graph.is_recursive("main"));
        // two cycles plus the non-recursive main
        assert_eq!(graph.sccs().len(), 3);
        // main consumes both cycles, so it comes out last
        assert_eq!(graph.sccs().last().unwrap()[0], "main");
    }

    #[test]
    fn test_unknown_callees_are_tracked_not_graphed() {
        let functions = vec![make_function("foo", vec!["print", "undefined_helper"])];
        let graph = CallGraph::build(&functions);
        assert!(!graph.is_recursive("foo"));
        assert!(graph.callees("foo").unwrap().is_empty());
        assert!(graph.calls_unknown("foo"));
    }

    #[test]
    fn test_calls_found_in_nested_expressions() {
        // return f(g(x)) + h()
        let body = vec![Stmt::ret(
            Some(Expr::binop(
                crate::ast::BinOp::Add,
                Expr::call("f", vec![Expr::call("g", vec![Expr::var("x", at(0))], at(0))], at(0)),
                Expr::call("h", vec![], at(0)),
                at(0),
            )),
            at(0),
        )];
        let functions = vec![
            Function::new("caller", vec!["x".to_string()], body),
            make_function("f", vec![]),
            make_function("g", vec![]),
            make_function("h", vec![]),
        ];
        let graph = CallGraph::build(&functions);
        let callees = graph.callees("caller").unwrap();
        assert_eq!(callees.len(), 3);
        assert!(callees.contains("f") && callees.contains("g") && callees.contains("h"));
    }
}
