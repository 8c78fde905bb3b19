//! Bottom-up algebraic simplification.
//!
//! Folds literal arithmetic, flattens associative chains and removes neutral
//! elements. Undefined literal arithmetic does not error: it folds to the
//! matching degenerate symbol (`1/0` is `zoo`, `log(0)` is `-oo`, `sqrt(-1)`
//! is `I`), which sanitization later replaces.

use sr_types::{
    BinaryOp, Expr, ExprBuilder, NaryOp, Node, NodeId, SrResult, Symbolic, UnaryOp,
};

use crate::deadline::Deadline;

/// Simplifies `expr`, checking `deadline` once per visited node.
pub fn simplify(expr: &Expr, deadline: &Deadline) -> SrResult<Expr> {
    let simplified = expr.try_rebuild(|b, node| {
        deadline.check()?;
        Ok(rewrite(b, node))
    })?;
    Ok(simplified.compact())
}

fn rewrite(b: &mut ExprBuilder, node: Node) -> NodeId {
    match node {
        Node::Unary(op, a) => unary(b, op, a),
        Node::Binary(op, lhs, rhs) => binary(b, op, lhs, rhs),
        Node::Nary(op, args) => nary(b, op, args),
        Node::Relational(op, lhs, rhs) => match (b.literal(lhs), b.literal(rhs)) {
            (Some(x), Some(y)) => b.constant(if op.holds(x, y) { 1.0 } else { 0.0 }),
            _ => b.relational(op, lhs, rhs),
        },
        Node::Const(v) if !v.is_finite() => number(b, v),
        other => b.push(other),
    }
}

/// Pushes `v`, mapping non-finite values onto their symbols.
fn number(b: &mut ExprBuilder, v: f64) -> NodeId {
    match Symbolic::from_non_finite(v) {
        Some(symbol) => b.symbol(symbol),
        None => b.constant(v),
    }
}

fn symbol_of(b: &ExprBuilder, id: NodeId) -> Option<Symbolic> {
    match b.get(id) {
        Node::Symbol(s) => Some(*s),
        _ => None,
    }
}

fn oscillation_bounds(b: &mut ExprBuilder) -> NodeId {
    let lo = b.constant(-1.0);
    let hi = b.constant(1.0);
    b.bounds(lo, hi)
}

fn unary(b: &mut ExprBuilder, op: UnaryOp, a: NodeId) -> NodeId {
    if let Some(v) = b.literal(a) {
        let r = op.apply(v);
        if r.is_nan() && matches!(op, UnaryOp::Sqrt | UnaryOp::Log) {
            return b.symbol(Symbolic::ImaginaryUnit);
        }
        return number(b, r);
    }

    if op == UnaryOp::Neg {
        if let Node::Unary(UnaryOp::Neg, inner) = b.get(a) {
            return *inner;
        }
    }

    if let Some(s) = symbol_of(b, a) {
        use Symbolic::*;
        match (op, s) {
            (_, NaN) => return b.symbol(NaN),
            (UnaryOp::Neg, Infinity) => return b.symbol(NegInfinity),
            (UnaryOp::Neg, NegInfinity) => return b.symbol(Infinity),
            (UnaryOp::Neg, ComplexInfinity) => return b.symbol(ComplexInfinity),
            (UnaryOp::Sin | UnaryOp::Cos, Infinity | NegInfinity) => {
                return oscillation_bounds(b)
            }
            (UnaryOp::Sin | UnaryOp::Cos | UnaryOp::Exp, ComplexInfinity) => {
                return b.symbol(NaN)
            }
            (UnaryOp::Exp, Infinity) => return b.symbol(Infinity),
            (UnaryOp::Exp, NegInfinity) => return b.constant(0.0),
            (UnaryOp::Log | UnaryOp::Sqrt, Infinity) => return b.symbol(Infinity),
            (UnaryOp::Log | UnaryOp::Sqrt, NegInfinity) => {
                return b.symbol(ComplexInfinity)
            }
            (UnaryOp::Log | UnaryOp::Abs, ComplexInfinity) => return b.symbol(Infinity),
            (UnaryOp::Abs, Infinity | NegInfinity) => return b.symbol(Infinity),
            _ => {}
        }
    }

    b.unary(op, a)
}

fn binary(b: &mut ExprBuilder, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> NodeId {
    if symbol_of(b, lhs) == Some(Symbolic::NaN) || symbol_of(b, rhs) == Some(Symbolic::NaN) {
        return b.symbol(Symbolic::NaN);
    }

    let (x, y) = (b.literal(lhs), b.literal(rhs));
    if let (Some(x), Some(y)) = (x, y) {
        return fold_binary(b, op, x, y);
    }

    match op {
        BinaryOp::Sub => {
            if y == Some(0.0) {
                return lhs;
            }
            if x == Some(0.0) {
                return unary(b, UnaryOp::Neg, rhs);
            }
            match (symbol_of(b, lhs), symbol_of(b, rhs)) {
                (Some(Symbolic::Infinity), Some(Symbolic::Infinity))
                | (Some(Symbolic::NegInfinity), Some(Symbolic::NegInfinity)) => {
                    return b.symbol(Symbolic::NaN)
                }
                _ => {}
            }
            if is_regular(b, lhs) && same(b, lhs, rhs) {
                return b.constant(0.0);
            }
        }
        BinaryOp::Div => {
            if y == Some(1.0) {
                return lhs;
            }
            if y == Some(0.0) {
                let zoo = b.symbol(Symbolic::ComplexInfinity);
                return b.nary(NaryOp::Mul, vec![zoo, lhs]);
            }
            if x == Some(0.0) && is_regular(b, rhs) {
                return b.constant(0.0);
            }
            if is_regular(b, lhs) && same(b, lhs, rhs) {
                return b.constant(1.0);
            }
        }
        BinaryOp::Pow => {
            if y == Some(1.0) {
                return lhs;
            }
            if y == Some(0.0) || x == Some(1.0) {
                return b.constant(1.0);
            }
        }
    }

    b.binary(op, lhs, rhs)
}

fn fold_binary(b: &mut ExprBuilder, op: BinaryOp, x: f64, y: f64) -> NodeId {
    match op {
        BinaryOp::Div if y == 0.0 => {
            if x == 0.0 {
                b.symbol(Symbolic::NaN)
            } else {
                b.symbol(Symbolic::ComplexInfinity)
            }
        }
        BinaryOp::Pow if x == 0.0 && y < 0.0 => b.symbol(Symbolic::ComplexInfinity),
        BinaryOp::Pow if x < 0.0 && y.fract() != 0.0 => b.symbol(Symbolic::ImaginaryUnit),
        _ => number(b, op.apply(x, y)),
    }
}

fn nary(b: &mut ExprBuilder, op: NaryOp, args: Vec<NodeId>) -> NodeId {
    let mut flat = Vec::with_capacity(args.len());
    for arg in args {
        match b.get(arg) {
            Node::Nary(inner, children) if *inner == op => flat.extend(children.iter().copied()),
            _ => flat.push(arg),
        }
    }

    let symbols: Vec<Symbolic> = flat.iter().filter_map(|id| symbol_of(b, *id)).collect();
    if symbols.contains(&Symbolic::NaN) {
        return b.symbol(Symbolic::NaN);
    }
    if op == NaryOp::Add
        && symbols.contains(&Symbolic::Infinity)
        && symbols.contains(&Symbolic::NegInfinity)
    {
        return b.symbol(Symbolic::NaN);
    }

    let mut literals = Vec::new();
    let mut rest = Vec::new();
    for id in flat {
        match b.literal(id) {
            Some(v) => literals.push(v),
            None => rest.push(id),
        }
    }

    let mut operands = Vec::with_capacity(rest.len() + 1);
    if !literals.is_empty() {
        let acc = op.fold(literals);
        if op == NaryOp::Mul && acc == 0.0 {
            let unbounded = symbols.iter().any(|s| {
                matches!(
                    s,
                    Symbolic::Infinity | Symbolic::NegInfinity | Symbolic::ComplexInfinity
                )
            });
            return if unbounded {
                b.symbol(Symbolic::NaN)
            } else {
                b.constant(0.0)
            };
        }
        let neutral = matches!(op, NaryOp::Add | NaryOp::Mul) && acc == op.identity();
        if !neutral || rest.is_empty() {
            operands.push(number(b, acc));
        }
    }
    operands.extend(rest);

    match operands.len() {
        0 => b.constant(op.identity()),
        1 => operands[0],
        _ => b.nary(op, operands),
    }
}

/// Subtree free of symbols, relations and bounds.
fn is_regular(b: &ExprBuilder, id: NodeId) -> bool {
    let node = b.get(id);
    !matches!(node, Node::Symbol(_) | Node::Relational(..) | Node::Bounds(..))
        && node.children().into_iter().all(|c| is_regular(b, c))
}

fn same(b: &ExprBuilder, x: NodeId, y: NodeId) -> bool {
    if x == y {
        return true;
    }
    let (nx, ny) = (b.get(x), b.get(y));
    let same_head = match (nx, ny) {
        (Node::Const(p), Node::Const(q)) => p.to_bits() == q.to_bits(),
        (Node::Var(p), Node::Var(q)) | (Node::Param(p), Node::Param(q)) => p == q,
        (Node::Unary(p, _), Node::Unary(q, _)) => p == q,
        (Node::Binary(p, _, _), Node::Binary(q, _, _)) => p == q,
        (Node::Nary(p, _), Node::Nary(q, _)) => p == q,
        (Node::Opaque { name: p, .. }, Node::Opaque { name: q, .. }) => p == q,
        _ => false,
    };
    let (cx, cy) = (nx.children(), ny.children());
    same_head
        && cx.len() == cy.len()
        && cx.iter().zip(cy.iter()).all(|(p, q)| same(b, *p, *q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sr_types::{parse, SrError, Stage};
    use std::time::Duration;

    fn run(text: &str) -> Expr {
        let deadline = Deadline::start(Stage::Simplify, Duration::from_secs(5));
        simplify(&parse(text).unwrap(), &deadline).unwrap()
    }

    #[test]
    fn folds_literal_arithmetic() {
        assert_eq!(run("2.0*3.0 + 1.0").to_string(), "7.0");
        assert_eq!(run("2.0**3.0").to_string(), "8.0");
        assert_eq!(run("x_0*2.0*3.0").to_string(), "6.0*x_0");
        assert_eq!(run("1.0 + x_0 + 2.0").to_string(), "3.0 + x_0");
    }

    #[test]
    fn removes_neutral_elements() {
        assert_eq!(run("x_0*1.0").to_string(), "x_0");
        assert_eq!(run("x_0 + 0.0").to_string(), "x_0");
        assert_eq!(run("x_0 - 0.0").to_string(), "x_0");
        assert_eq!(run("x_0/1.0").to_string(), "x_0");
        assert_eq!(run("x_0**1.0").to_string(), "x_0");
        assert_eq!(run("x_0**0.0").to_string(), "1.0");
        assert_eq!(run("0.0*sin(x_1)").to_string(), "0.0");
    }

    #[test]
    fn cancels_identical_operands() {
        assert_eq!(run("sin(x_0) - sin(x_0)").to_string(), "0.0");
        assert_eq!(run("(x_0 + 1.0)/(x_0 + 1.0)").to_string(), "1.0");
        assert_eq!(run("x_0 - x_1").to_string(), "x_0 - x_1");
    }

    #[test]
    fn undefined_literals_become_symbols() {
        assert_eq!(run("1.0/0.0").to_string(), "zoo");
        assert_eq!(run("0.0/0.0").to_string(), "nan");
        assert_eq!(run("log(0.0)").to_string(), "-oo");
        assert_eq!(run("sqrt(-1.0)").to_string(), "I");
        assert_eq!(run("exp(1000.0)").to_string(), "oo");
        assert_eq!(run("x_0/0.0").to_string(), "zoo*x_0");
        assert_eq!(run("sin(oo)").to_string(), "AccumBounds(-1.0, 1.0)");
        assert_eq!(run("oo - oo").to_string(), "nan");
        assert_eq!(run("0.0*oo").to_string(), "nan");
    }

    #[test]
    fn double_negation_cancels() {
        assert_eq!(run("-(-x_0)").to_string(), "x_0");
        assert_eq!(run("0.0 - x_0").to_string(), "-x_0");
    }

    #[test]
    fn literal_relations_fold() {
        assert_eq!(run("1.0 < 2.0").to_string(), "1.0");
        assert_eq!(run("3.0 < 2.0").to_string(), "0.0");
        assert_eq!(run("x_0 < 2.0").to_string(), "x_0 < 2.0");
    }

    #[test]
    fn simplification_is_idempotent() {
        for text in ["3.0*x_0*x_1/(x_2**2.0)", "1.0 + x_0 + sin(2.0*x_1)", "max(x_0, 1.0, 2.0)"] {
            let once = run(text);
            let deadline = Deadline::start(Stage::Simplify, Duration::from_secs(5));
            let twice = simplify(&once, &deadline).unwrap();
            assert_eq!(once, twice, "{text}");
        }
    }

    #[test]
    fn expired_deadline_times_out() {
        let deadline = Deadline::start(Stage::Simplify, Duration::ZERO);
        let err = simplify(&parse("x_0 + 1.0").unwrap(), &deadline).unwrap_err();
        assert!(matches!(err, SrError::Timeout { stage: Stage::Simplify, .. }));
    }
}
