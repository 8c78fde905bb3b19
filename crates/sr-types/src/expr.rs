//! Arena-backed symbolic expression trees.
//!
//! An [`Expr`] owns a flat `Vec<Node>` and a root [`NodeId`]. Children are
//! always stored before their parents, so every expression is acyclic and can
//! be walked in index order. Expressions are immutable: transformations go
//! through [`Expr::rebuild`] / [`Expr::try_rebuild`] and produce a new tree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;

use crate::errors::{SrError, SrResult};

/// Deepest tree accepted by the parser and by [`Expr::validate`]. Printing and
/// rewriting recurse, so this bounds their stack use.
pub const MAX_DEPTH: usize = 200;

/// Index of a node inside its owning [`Expr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Symbolic constants that a free-form simplifier can emit.
///
/// Everything except [`Symbolic::Pi`] is degenerate: it has no finite real
/// value and must be replaced before numeric compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbolic {
    Pi,
    Infinity,
    NegInfinity,
    ComplexInfinity,
    ImaginaryUnit,
    NaN,
}

impl Symbolic {
    pub fn name(self) -> &'static str {
        match self {
            Symbolic::Pi => "pi",
            Symbolic::Infinity => "oo",
            Symbolic::NegInfinity => "-oo",
            Symbolic::ComplexInfinity => "zoo",
            Symbolic::ImaginaryUnit => "I",
            Symbolic::NaN => "nan",
        }
    }

    /// Maps a non-finite float onto the matching symbol.
    pub fn from_non_finite(v: f64) -> Option<Self> {
        if v.is_nan() {
            Some(Symbolic::NaN)
        } else if v == f64::INFINITY {
            Some(Symbolic::Infinity)
        } else if v == f64::NEG_INFINITY {
            Some(Symbolic::NegInfinity)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Sin,
    Cos,
    Log,
    Sqrt,
    Exp,
    Abs,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Abs => "abs",
        }
    }

    /// Plain IEEE semantics; callers decide how to treat non-finite results.
    pub fn apply(self, a: f64) -> f64 {
        match self {
            UnaryOp::Neg => -a,
            UnaryOp::Sin => a.sin(),
            UnaryOp::Cos => a.cos(),
            UnaryOp::Log => a.ln(),
            UnaryOp::Sqrt => a.sqrt(),
            UnaryOp::Exp => a.exp(),
            UnaryOp::Abs => a.abs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Sub,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Sub => " - ",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "**",
        }
    }

    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Sub => a - b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NaryOp {
    Add,
    Mul,
    Max,
    Min,
}

impl NaryOp {
    pub fn identity(self) -> f64 {
        match self {
            NaryOp::Add => 0.0,
            NaryOp::Mul => 1.0,
            NaryOp::Max => f64::NEG_INFINITY,
            NaryOp::Min => f64::INFINITY,
        }
    }

    pub fn combine(self, acc: f64, v: f64) -> f64 {
        match self {
            NaryOp::Add => acc + v,
            NaryOp::Mul => acc * v,
            NaryOp::Max => acc.max(v),
            NaryOp::Min => acc.min(v),
        }
    }

    pub fn fold(self, values: impl IntoIterator<Item = f64>) -> f64 {
        values
            .into_iter()
            .fold(self.identity(), |acc, v| self.combine(acc, v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl RelOp {
    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Lt => " < ",
            RelOp::Le => " <= ",
            RelOp::Gt => " > ",
            RelOp::Ge => " >= ",
            RelOp::Eq => " == ",
            RelOp::Ne => " != ",
        }
    }

    pub fn holds(self, a: f64, b: f64) -> bool {
        match self {
            RelOp::Lt => a < b,
            RelOp::Le => a <= b,
            RelOp::Gt => a > b,
            RelOp::Ge => a >= b,
            RelOp::Eq => a == b,
            RelOp::Ne => a != b,
        }
    }
}

/// A single node of an expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Numeric literal.
    Const(f64),
    /// Input feature by column index (`x_<i>`).
    Var(usize),
    /// Free coefficient lifted out of a literal (`C_<i>`).
    Param(usize),
    Symbol(Symbolic),
    Unary(UnaryOp, NodeId),
    Binary(BinaryOp, NodeId, NodeId),
    Nary(NaryOp, Vec<NodeId>),
    /// Comparison whose truth value depends on the inputs.
    Relational(RelOp, NodeId, NodeId),
    /// Bounded-oscillation placeholder, e.g. the limit of `sin` at infinity.
    Bounds(NodeId, NodeId),
    /// Function outside the supported vocabulary.
    Opaque { name: String, args: Vec<NodeId> },
}

impl Node {
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Node::Const(_) | Node::Var(_) | Node::Param(_) | Node::Symbol(_) => Vec::new(),
            Node::Unary(_, a) => vec![*a],
            Node::Binary(_, a, b) | Node::Relational(_, a, b) | Node::Bounds(a, b) => vec![*a, *b],
            Node::Nary(_, args) | Node::Opaque { args, .. } => args.clone(),
        }
    }

    /// Same node with its children replaced, in order, by `children`.
    pub fn with_children(&self, children: &[NodeId]) -> Node {
        match self {
            Node::Const(_) | Node::Var(_) | Node::Param(_) | Node::Symbol(_) => self.clone(),
            Node::Unary(op, _) => Node::Unary(*op, children[0]),
            Node::Binary(op, _, _) => Node::Binary(*op, children[0], children[1]),
            Node::Relational(op, _, _) => Node::Relational(*op, children[0], children[1]),
            Node::Bounds(_, _) => Node::Bounds(children[0], children[1]),
            Node::Nary(op, _) => Node::Nary(*op, children.to_vec()),
            Node::Opaque { name, .. } => Node::Opaque {
                name: name.clone(),
                args: children.to_vec(),
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            Node::Const(_) | Node::Var(_) | Node::Param(_) | Node::Symbol(_)
        )
    }

    /// Degenerate constructs have no finite real value on their own.
    pub fn is_degenerate(&self) -> bool {
        match self {
            Node::Const(v) => !v.is_finite(),
            Node::Symbol(s) => *s != Symbolic::Pi,
            Node::Relational(..) | Node::Bounds(..) => true,
            _ => false,
        }
    }
}

/// Append-only node store used to assemble expressions.
#[derive(Debug, Clone, Default)]
pub struct ExprBuilder {
    nodes: Vec<Node>,
}

impl ExprBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        debug_assert!(
            node.children().iter().all(|c| c.index() < self.nodes.len()),
            "children must be pushed before their parent"
        );
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// Literal value of `id`, if it is a finite constant.
    pub fn literal(&self, id: NodeId) -> Option<f64> {
        match self.get(id) {
            Node::Const(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    pub fn constant(&mut self, value: f64) -> NodeId {
        self.push(Node::Const(value))
    }

    pub fn var(&mut self, index: usize) -> NodeId {
        self.push(Node::Var(index))
    }

    pub fn param(&mut self, index: usize) -> NodeId {
        self.push(Node::Param(index))
    }

    pub fn symbol(&mut self, symbol: Symbolic) -> NodeId {
        self.push(Node::Symbol(symbol))
    }

    pub fn unary(&mut self, op: UnaryOp, a: NodeId) -> NodeId {
        self.push(Node::Unary(op, a))
    }

    pub fn binary(&mut self, op: BinaryOp, a: NodeId, b: NodeId) -> NodeId {
        self.push(Node::Binary(op, a, b))
    }

    pub fn nary(&mut self, op: NaryOp, args: Vec<NodeId>) -> NodeId {
        self.push(Node::Nary(op, args))
    }

    pub fn relational(&mut self, op: RelOp, a: NodeId, b: NodeId) -> NodeId {
        self.push(Node::Relational(op, a, b))
    }

    pub fn bounds(&mut self, lo: NodeId, hi: NodeId) -> NodeId {
        self.push(Node::Bounds(lo, hi))
    }

    pub fn opaque(&mut self, name: impl Into<String>, args: Vec<NodeId>) -> NodeId {
        self.push(Node::Opaque {
            name: name.into(),
            args,
        })
    }

    /// Copies the subtree of `expr` rooted at `id` into this builder.
    pub fn import(&mut self, expr: &Expr, id: NodeId) -> NodeId {
        let node = expr.node(id);
        let children: Vec<NodeId> = node
            .children()
            .into_iter()
            .map(|c| self.import(expr, c))
            .collect();
        self.push(node.with_children(&children))
    }

    pub fn finish(self, root: NodeId) -> Expr {
        Expr {
            nodes: self.nodes,
            root,
        }
    }
}

/// Immutable symbolic expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Expr {
    pub fn constant(value: f64) -> Self {
        let mut b = ExprBuilder::new();
        let root = b.constant(value);
        b.finish(root)
    }

    pub fn variable(index: usize) -> Self {
        let mut b = ExprBuilder::new();
        let root = b.var(index);
        b.finish(root)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn root_node(&self) -> &Node {
        self.node(self.root)
    }

    /// Number of stored nodes, including any unreachable ones.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// The literal value if the whole expression is a single finite constant.
    pub fn constant_value(&self) -> Option<f64> {
        match self.root_node() {
            Node::Const(v) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    /// Checks the arena invariants. Deserialized expressions must pass this
    /// before any other method is used on them.
    pub fn validate(&self) -> SrResult<()> {
        if self.root.index() >= self.nodes.len() {
            return Err(SrError::Unsanitizable(format!(
                "root {} outside arena of {} nodes",
                self.root.0,
                self.nodes.len()
            )));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(child) = node.children().iter().find(|c| c.index() >= index) {
                return Err(SrError::Unsanitizable(format!(
                    "node {index} references non-preceding child {}",
                    child.0
                )));
            }
            match node {
                Node::Nary(op, args) if args.is_empty() => {
                    return Err(SrError::Unsanitizable(format!(
                        "node {index}: {op:?} without operands"
                    )));
                }
                _ => {}
            }
        }
        let depth = self.depth();
        if depth > MAX_DEPTH {
            return Err(SrError::Unsanitizable(format!(
                "nesting depth {depth} exceeds {MAX_DEPTH}"
            )));
        }
        Ok(())
    }

    /// Node ids in tree preorder; shared subtrees are visited once per use.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            let children = self.node(id).children();
            stack.extend(children.into_iter().rev());
        }
        order
    }

    /// Levels on the longest root-to-leaf path; a lone leaf has depth 1.
    pub fn depth(&self) -> usize {
        let mut depths = vec![0usize; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            depths[index] = 1 + node
                .children()
                .iter()
                .map(|c| depths[c.index()])
                .max()
                .unwrap_or(0);
        }
        depths[self.root.index()]
    }

    /// Tree size: every constant, variable and operator application is one node.
    pub fn node_count(&self) -> usize {
        let mut sizes = vec![0usize; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            sizes[index] = 1 + node
                .children()
                .iter()
                .map(|c| sizes[c.index()])
                .sum::<usize>();
        }
        sizes[self.root.index()]
    }

    /// Feature indices referenced by the expression.
    pub fn variables(&self) -> BTreeSet<usize> {
        self.preorder()
            .into_iter()
            .filter_map(|id| match self.node(id) {
                Node::Var(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    /// Number of literal constant occurrences.
    pub fn count_constants(&self) -> usize {
        self.preorder()
            .into_iter()
            .filter(|id| matches!(self.node(*id), Node::Const(_)))
            .count()
    }

    pub fn count_params(&self) -> usize {
        self.preorder()
            .into_iter()
            .filter_map(|id| match self.node(id) {
                Node::Param(i) => Some(*i + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn has_degenerate(&self) -> bool {
        self.preorder()
            .into_iter()
            .any(|id| self.node(id).is_degenerate())
    }

    pub fn structurally_eq(&self, other: &Expr) -> bool {
        self.subtree_eq(self.root, other, other.root)
    }

    fn subtree_eq(&self, a: NodeId, other: &Expr, b: NodeId) -> bool {
        let (na, nb) = (self.node(a), other.node(b));
        let same_head = match (na, nb) {
            (Node::Const(x), Node::Const(y)) => x.to_bits() == y.to_bits(),
            (Node::Var(x), Node::Var(y)) | (Node::Param(x), Node::Param(y)) => x == y,
            (Node::Symbol(x), Node::Symbol(y)) => x == y,
            (Node::Unary(x, _), Node::Unary(y, _)) => x == y,
            (Node::Binary(x, _, _), Node::Binary(y, _, _)) => x == y,
            (Node::Nary(x, _), Node::Nary(y, _)) => x == y,
            (Node::Relational(x, _, _), Node::Relational(y, _, _)) => x == y,
            (Node::Bounds(..), Node::Bounds(..)) => true,
            (Node::Opaque { name: x, .. }, Node::Opaque { name: y, .. }) => x == y,
            _ => false,
        };
        if !same_head {
            return false;
        }
        let (ca, cb) = (na.children(), nb.children());
        ca.len() == cb.len()
            && ca
                .iter()
                .zip(cb.iter())
                .all(|(x, y)| self.subtree_eq(*x, other, *y))
    }

    /// Bottom-up rewrite into a fresh tree.
    ///
    /// `f` receives each node with its children already rebuilt and returns
    /// the id of the replacement pushed into the builder.
    pub fn try_rebuild<F>(&self, mut f: F) -> SrResult<Expr>
    where
        F: FnMut(&mut ExprBuilder, Node) -> SrResult<NodeId>,
    {
        let mut builder = ExprBuilder::new();
        let root = self.rebuild_from(self.root, &mut builder, &mut f)?;
        Ok(builder.finish(root))
    }

    pub fn rebuild<F>(&self, mut f: F) -> Expr
    where
        F: FnMut(&mut ExprBuilder, Node) -> NodeId,
    {
        let mut builder = ExprBuilder::new();
        let rebuilt = self.rebuild_from(
            self.root,
            &mut builder,
            &mut |b: &mut ExprBuilder, n: Node| Ok::<_, Infallible>(f(b, n)),
        );
        let root = match rebuilt {
            Ok(root) => root,
            Err(never) => match never {},
        };
        builder.finish(root)
    }

    /// Copy holding only the nodes reachable from the root.
    pub fn compact(&self) -> Expr {
        self.rebuild(|b, node| b.push(node))
    }

    fn rebuild_from<F, E>(
        &self,
        id: NodeId,
        builder: &mut ExprBuilder,
        f: &mut F,
    ) -> Result<NodeId, E>
    where
        F: FnMut(&mut ExprBuilder, Node) -> Result<NodeId, E>,
    {
        let node = self.node(id);
        let mut children = Vec::new();
        for child in node.children() {
            children.push(self.rebuild_from(child, builder, f)?);
        }
        f(builder, node.with_children(&children))
    }

    fn fmt_node(&self, id: NodeId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node(id) {
            Node::Const(v) => write!(f, "{v:?}"),
            Node::Var(i) => write!(f, "x_{i}"),
            Node::Param(i) => write!(f, "C_{i}"),
            Node::Symbol(s) => write!(f, "{}", s.name()),
            Node::Unary(UnaryOp::Neg, a) => {
                write!(f, "-")?;
                self.fmt_operand(*a, f)
            }
            Node::Unary(op, a) => {
                write!(f, "{}(", op.name())?;
                self.fmt_node(*a, f)?;
                write!(f, ")")
            }
            Node::Binary(op, a, b) => {
                self.fmt_operand(*a, f)?;
                write!(f, "{}", op.symbol())?;
                self.fmt_operand(*b, f)
            }
            Node::Relational(op, a, b) => {
                self.fmt_operand(*a, f)?;
                write!(f, "{}", op.symbol())?;
                self.fmt_operand(*b, f)
            }
            Node::Nary(NaryOp::Add, args) => self.fmt_joined(args, " + ", f),
            Node::Nary(NaryOp::Mul, args) => self.fmt_joined(args, "*", f),
            Node::Nary(NaryOp::Max, args) => self.fmt_call("max", args, f),
            Node::Nary(NaryOp::Min, args) => self.fmt_call("min", args, f),
            Node::Bounds(lo, hi) => self.fmt_call("AccumBounds", &[*lo, *hi], f),
            Node::Opaque { name, args } => self.fmt_call(name, args, f),
        }
    }

    /// Operands of infix operators get parentheses unless they are atoms.
    fn fmt_operand(&self, id: NodeId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let needs_parens = match self.node(id) {
            Node::Const(v) => v.is_sign_negative(),
            Node::Symbol(Symbolic::NegInfinity) => true,
            Node::Unary(UnaryOp::Neg, _)
            | Node::Binary(..)
            | Node::Relational(..)
            | Node::Nary(NaryOp::Add | NaryOp::Mul, _) => true,
            _ => false,
        };
        if needs_parens {
            write!(f, "(")?;
            self.fmt_node(id, f)?;
            write!(f, ")")
        } else {
            self.fmt_node(id, f)
        }
    }

    fn fmt_joined(&self, args: &[NodeId], sep: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                write!(f, "{sep}")?;
            }
            self.fmt_operand(*arg, f)?;
        }
        Ok(())
    }

    fn fmt_call(&self, name: &str, args: &[NodeId], f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{name}(")?;
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            self.fmt_node(*arg, f)?;
        }
        write!(f, ")")
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_eq(other)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(self.root, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `6.67*x_0*x_1/x_2**2`
    fn gravity() -> Expr {
        let mut b = ExprBuilder::new();
        let g = b.constant(6.67);
        let x0 = b.var(0);
        let x1 = b.var(1);
        let num = b.nary(NaryOp::Mul, vec![g, x0, x1]);
        let x2 = b.var(2);
        let two = b.constant(2.0);
        let den = b.binary(BinaryOp::Pow, x2, two);
        let root = b.binary(BinaryOp::Div, num, den);
        b.finish(root)
    }

    #[test]
    fn depth_follows_the_longest_path() {
        assert_eq!(gravity().depth(), 3);
        assert_eq!(Expr::constant(3.0).depth(), 1);

        let mut b = ExprBuilder::new();
        let mut id = b.var(0);
        for _ in 0..MAX_DEPTH {
            id = b.unary(UnaryOp::Sin, id);
        }
        let deep = b.finish(id);
        assert_eq!(deep.depth(), MAX_DEPTH + 1);
        assert!(matches!(deep.validate(), Err(SrError::Unsanitizable(_))));
    }

    #[test]
    fn node_count_counts_every_node() {
        assert_eq!(gravity().node_count(), 8);
        assert_eq!(Expr::constant(3.0).node_count(), 1);
    }

    #[test]
    fn variables_and_constants() {
        let expr = gravity();
        assert_eq!(expr.variables().into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(expr.count_constants(), 2);
        assert!(!expr.has_degenerate());
        assert_eq!(expr.constant_value(), None);
        assert_eq!(Expr::constant(2.5).constant_value(), Some(2.5));
    }

    #[test]
    fn display_is_infix() {
        assert_eq!(gravity().to_string(), "(6.67*x_0*x_1)/(x_2**2.0)");
    }

    #[test]
    fn rebuild_replaces_leaves() {
        let expr = gravity();
        let swapped = expr.rebuild(|b, node| match node {
            Node::Var(i) => b.var(i + 10),
            other => b.push(other),
        });
        assert_eq!(swapped.variables().into_iter().collect::<Vec<_>>(), vec![10, 11, 12]);
        assert_eq!(swapped.node_count(), expr.node_count());
        assert_ne!(swapped, expr);
    }

    #[test]
    fn structural_equality_ignores_arena_layout() {
        let mut b = ExprBuilder::new();
        let unused = b.constant(42.0);
        let x = b.var(0);
        let one = b.constant(1.0);
        let root = b.nary(NaryOp::Add, vec![x, one]);
        let padded = b.finish(root);
        assert!(unused.index() == 0);

        let mut b = ExprBuilder::new();
        let x = b.var(0);
        let one = b.constant(1.0);
        let root = b.nary(NaryOp::Add, vec![x, one]);
        let compact = b.finish(root);

        assert_eq!(padded, compact);
        assert_eq!(padded.arena_len(), 4);
    }

    #[test]
    fn degenerate_detection() {
        let mut b = ExprBuilder::new();
        let x = b.var(0);
        let zoo = b.symbol(Symbolic::ComplexInfinity);
        let root = b.nary(NaryOp::Mul, vec![zoo, x]);
        assert!(b.finish(root).has_degenerate());

        let mut b = ExprBuilder::new();
        let pi = b.symbol(Symbolic::Pi);
        assert!(!b.finish(pi).has_degenerate());

        assert!(Expr::constant(f64::INFINITY).has_degenerate());
    }

    #[test]
    fn validate_rejects_forward_references() {
        let broken = Expr {
            nodes: vec![Node::Unary(UnaryOp::Sin, NodeId(1)), Node::Var(0)],
            root: NodeId(0),
        };
        assert!(broken.validate().is_err());

        let empty_sum = Expr {
            nodes: vec![Node::Nary(NaryOp::Add, vec![])],
            root: NodeId(0),
        };
        assert!(empty_sum.validate().is_err());

        assert!(gravity().validate().is_ok());
    }

    #[test]
    fn serde_round_trip() {
        let expr = gravity();
        let json = serde_json::to_string(&expr).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(expr, back);
    }

    #[test]
    fn nary_fold_uses_identity() {
        assert_eq!(NaryOp::Add.fold([1.0, 2.0, 3.0]), 6.0);
        assert_eq!(NaryOp::Mul.fold([2.0, 3.0]), 6.0);
        assert_eq!(NaryOp::Max.fold([2.0, -3.0]), 2.0);
        assert_eq!(NaryOp::Min.fold([2.0, -3.0]), -3.0);
    }
}
