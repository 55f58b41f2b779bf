//! Abstract syntax tree for Mica function bodies
//!
//! The analyzer does not parse source text. A frontend hands it function
//! records using this fixed node vocabulary, with every statement and
//! expression carrying a source location.

use std::path::PathBuf;

/// Source location for diagnostics and tooling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceLoc {
    pub file: PathBuf,
    /// Line (0-indexed for LSP compatibility)
    pub line: usize,
    /// Column (0-indexed)
    pub column: usize,
}

impl SourceLoc {
    pub fn new(file: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        SourceLoc {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.file.display(),
            self.line + 1,
            self.column + 1
        )
    }
}

/// Constant literal kinds
///
/// `Other` covers literals the analyzer has no numeric or null model for
/// (strings, fresh objects). They are known non-null and nothing else.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    Other,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// True for `==`, `!=`, `<`, `<=`, `>`, `>=`
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Expression nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const {
        value: Const,
        loc: SourceLoc,
    },
    Var {
        name: String,
        loc: SourceLoc,
    },
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        loc: SourceLoc,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        loc: SourceLoc,
    },
    /// Direct call by name. Function-valued expressions are not part of
    /// the vocabulary; a frontend lowers indirect calls to an unresolvable
    /// callee name.
    Call {
        callee: String,
        args: Vec<Expr>,
        loc: SourceLoc,
    },
    Attr {
        object: Box<Expr>,
        name: String,
        loc: SourceLoc,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        loc: SourceLoc,
    },
}

impl Expr {
    pub fn loc(&self) -> &SourceLoc {
        match self {
            Expr::Const { loc, .. }
            | Expr::Var { loc, .. }
            | Expr::BinOp { loc, .. }
            | Expr::UnaryOp { loc, .. }
            | Expr::Call { loc, .. }
            | Expr::Attr { loc, .. }
            | Expr::Index { loc, .. } => loc,
        }
    }

    pub fn int(value: i64, loc: SourceLoc) -> Self {
        Expr::Const {
            value: Const::Int(value),
            loc,
        }
    }

    pub fn float(value: f64, loc: SourceLoc) -> Self {
        Expr::Const {
            value: Const::Float(value),
            loc,
        }
    }

    pub fn bool(value: bool, loc: SourceLoc) -> Self {
        Expr::Const {
            value: Const::Bool(value),
            loc,
        }
    }

    pub fn null(loc: SourceLoc) -> Self {
        Expr::Const {
            value: Const::Null,
            loc,
        }
    }

    pub fn var(name: impl Into<String>, loc: SourceLoc) -> Self {
        Expr::Var {
            name: name.into(),
            loc,
        }
    }

    pub fn binop(op: BinOp, lhs: Expr, rhs: Expr, loc: SourceLoc) -> Self {
        Expr::BinOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            loc,
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr, loc: SourceLoc) -> Self {
        Expr::UnaryOp {
            op,
            operand: Box::new(operand),
            loc,
        }
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expr>, loc: SourceLoc) -> Self {
        Expr::Call {
            callee: callee.into(),
            args,
            loc,
        }
    }

    pub fn attr(object: Expr, name: impl Into<String>, loc: SourceLoc) -> Self {
        Expr::Attr {
            object: Box::new(object),
            name: name.into(),
            loc,
        }
    }

    pub fn index(object: Expr, index: Expr, loc: SourceLoc) -> Self {
        Expr::Index {
            object: Box::new(object),
            index: Box::new(index),
            loc,
        }
    }
}

/// Statement nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        target: String,
        value: Expr,
        loc: SourceLoc,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        loc: SourceLoc,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        loc: SourceLoc,
    },
    Return {
        value: Option<Expr>,
        loc: SourceLoc,
    },
    Break {
        loc: SourceLoc,
    },
    Continue {
        loc: SourceLoc,
    },
    /// Expression evaluated for its side effects
    Expr {
        expr: Expr,
        loc: SourceLoc,
    },
}

impl Stmt {
    pub fn loc(&self) -> &SourceLoc {
        match self {
            Stmt::Assign { loc, .. }
            | Stmt::If { loc, .. }
            | Stmt::While { loc, .. }
            | Stmt::Return { loc, .. }
            | Stmt::Break { loc }
            | Stmt::Continue { loc }
            | Stmt::Expr { loc, .. } => loc,
        }
    }

    pub fn assign(target: impl Into<String>, value: Expr, loc: SourceLoc) -> Self {
        Stmt::Assign {
            target: target.into(),
            value,
            loc,
        }
    }

    pub fn ret(value: Option<Expr>, loc: SourceLoc) -> Self {
        Stmt::Return { value, loc }
    }
}

/// A function record as provided by the frontend
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Ordered parameter names
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    /// Location of the definition, for function-level diagnostics
    pub source: Option<SourceLoc>,
    /// Diagnostic kind names whose warning/info findings are suppressed
    /// for this function. Definite errors are never suppressed.
    pub allowed_warnings: Vec<String>,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<String>, body: Vec<Stmt>) -> Self {
        Function {
            name: name.into(),
            params,
            body,
            source: None,
            allowed_warnings: Vec::new(),
        }
    }
}

/// Check a set of function records for structural problems the analyzer
/// cannot recover from: duplicate function names, duplicate parameter
/// names, and `break`/`continue` outside any loop.
pub fn validate_functions(functions: &[Function]) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for func in functions {
        if !seen.insert(func.name.as_str()) {
            return Err(format!("duplicate function name '{}'", func.name));
        }
        let mut params = std::collections::HashSet::new();
        for p in &func.params {
            if !params.insert(p.as_str()) {
                return Err(format!(
                    "duplicate parameter '{}' in function '{}'",
                    p, func.name
                ));
            }
        }
        check_loop_exits(&func.body, false, &func.name)?;
    }
    Ok(())
}

fn check_loop_exits(body: &[Stmt], in_loop: bool, func: &str) -> Result<(), String> {
    for stmt in body {
        match stmt {
            Stmt::Break { loc } if !in_loop => {
                return Err(format!("{}: break outside loop in '{}'", loc, func));
            }
            Stmt::Continue { loc } if !in_loop => {
                return Err(format!("{}: continue outside loop in '{}'", loc, func));
            }
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                check_loop_exits(then_body, in_loop, func)?;
                check_loop_exits(else_body, in_loop, func)?;
            }
            Stmt::While { body, .. } => {
                check_loop_exits(body, true, func)?;
            }
            _ => {}
        }
    }
    Ok(())
}
