//! Expression AST
//!
//! The sandbox language is deliberately small: literals, binding paths,
//! arithmetic/comparison/logical operators, a ternary, indexing and calls
//! into the transform catalog. There is no assignment, no loop construct
//! and no way to define functions, which is most of what keeps evaluation
//! boundable.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Dotted identifier path resolved against the bindings
    Path(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Call into the transform catalog (`category.function`)
    Call {
        function: String,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
}

impl Expr {
    /// Complexity of the expression: control-flow and call nodes
    ///
    /// Ternaries, short-circuit operators and function calls each count as
    /// one node; the static pass compares the total against the configured
    /// ceiling.
    pub fn complexity(&self) -> usize {
        match self {
            Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_)
            | Expr::Path(_) => 0,
            Expr::Unary { expr, .. } => expr.complexity(),
            Expr::Binary { op, left, right } => {
                let own = usize::from(matches!(op, BinaryOp::And | BinaryOp::Or));
                own + left.complexity() + right.complexity()
            }
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => 1 + cond.complexity() + then.complexity() + otherwise.complexity(),
            Expr::Call { args, .. } => {
                1 + args.iter().map(Expr::complexity).sum::<usize>()
            }
            Expr::Index { base, index } => base.complexity() + index.complexity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_counts_calls_and_branches() {
        // literal: 0 nodes
        assert_eq!(Expr::Int(1).complexity(), 0);

        // a && b: 1 node
        let and = Expr::Binary {
            op: BinaryOp::And,
            left: Box::new(Expr::Path("a".into())),
            right: Box::new(Expr::Path("b".into())),
        };
        assert_eq!(and.complexity(), 1);

        // f(x) ? g(y) : 0 — ternary + two calls = 3 nodes
        let expr = Expr::Ternary {
            cond: Box::new(Expr::Call {
                function: "f".into(),
                args: vec![Expr::Path("x".into())],
            }),
            then: Box::new(Expr::Call {
                function: "g".into(),
                args: vec![Expr::Path("y".into())],
            }),
            otherwise: Box::new(Expr::Int(0)),
        };
        assert_eq!(expr.complexity(), 3);
    }
}
