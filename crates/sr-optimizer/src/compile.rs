//! Differentiable compilation of sanitized expressions.
//!
//! An [`Expr`] is lowered to a flat instruction list in evaluation order. Each
//! instruction writes one slot, so the forward pass keeps every intermediate
//! value and the reverse pass can propagate adjoints without re-evaluating.

use std::time::Duration;

use ndarray::ArrayView1;
use sr_types::{
    data_error, BinaryOp, Expr, Matrix, NaryOp, Node, NodeId, RefineConfig, SrError, SrResult, Stage,
    UnaryOp,
};

use crate::deadline::Deadline;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompileOptions {
    /// Width of the feature matrices the program will be run on.
    pub n_features: usize,
    pub timeout: Duration,
    /// Result of `a / 0`.
    pub division_placeholder: f64,
}

impl CompileOptions {
    pub fn new(n_features: usize) -> Self {
        Self::from_config(&RefineConfig::default(), n_features)
    }

    pub fn from_config(config: &RefineConfig, n_features: usize) -> Self {
        Self {
            n_features,
            timeout: config.compile_timeout(),
            division_placeholder: config.division_placeholder,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Instr {
    Const(f64),
    Var(usize),
    Param(usize),
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
    Nary(NaryOp, Vec<usize>),
}

/// Executable, differentiable form of an expression.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    instrs: Vec<Instr>,
    n_features: usize,
    n_params: usize,
    division_placeholder: f64,
}

/// Lowers `expr` into a [`CompiledExpr`].
///
/// Fails with `UnsupportedOperator` on constructs outside the supported
/// vocabulary (including any surviving degenerate symbol) and with `Timeout`
/// once `options.timeout` has elapsed.
pub fn compile(expr: &Expr, options: &CompileOptions) -> SrResult<CompiledExpr> {
    expr.validate()?;
    let deadline = Deadline::start(Stage::Compile, options.timeout);

    let len = expr.arena_len();
    let mut reachable = vec![false; len];
    reachable[expr.root().index()] = true;
    for index in (0..len).rev() {
        if reachable[index] {
            for child in expr.node(NodeId(index as u32)).children() {
                reachable[child.index()] = true;
            }
        }
    }

    let mut slots = vec![usize::MAX; len];
    let mut instrs = Vec::new();
    let mut n_params = 0;
    for index in 0..len {
        if !reachable[index] {
            continue;
        }
        deadline.check()?;
        let node = expr.node(NodeId(index as u32));
        let instr = match node {
            Node::Const(v) if v.is_finite() => Instr::Const(*v),
            Node::Const(v) => {
                return Err(SrError::NumericInvalid(format!("non-finite literal {v}")));
            }
            Node::Var(i) => {
                if *i >= options.n_features {
                    return Err(data_error!(
                        "x_{} referenced but the data has {} features",
                        i,
                        options.n_features
                    ));
                }
                Instr::Var(*i)
            }
            Node::Param(i) => {
                n_params = n_params.max(i + 1);
                Instr::Param(*i)
            }
            Node::Unary(op, a) => Instr::Unary(*op, slots[a.index()]),
            Node::Binary(op, a, b) => Instr::Binary(*op, slots[a.index()], slots[b.index()]),
            Node::Nary(op, args) => {
                Instr::Nary(*op, args.iter().map(|a| slots[a.index()]).collect())
            }
            Node::Symbol(s) => {
                return Err(SrError::UnsupportedOperator(format!("symbol {}", s.name())));
            }
            Node::Relational(op, ..) => {
                return Err(SrError::UnsupportedOperator(format!(
                    "relation '{}'",
                    op.symbol().trim()
                )));
            }
            Node::Bounds(..) => {
                return Err(SrError::UnsupportedOperator("AccumBounds".to_string()));
            }
            Node::Opaque { name, .. } => {
                return Err(SrError::UnsupportedOperator(name.clone()));
            }
        };
        slots[index] = instrs.len();
        instrs.push(instr);
    }

    Ok(CompiledExpr {
        instrs,
        n_features: options.n_features,
        n_params,
        division_placeholder: options.division_placeholder,
    })
}

impl CompiledExpr {
    pub fn n_params(&self) -> usize {
        self.n_params
    }

    /// Whether the output ignores the feature matrix.
    pub fn is_input_independent(&self) -> bool {
        !self.instrs.iter().any(|i| matches!(i, Instr::Var(_)))
    }

    fn check_inputs(&self, x: &Matrix, params: &[f64]) -> SrResult<()> {
        if params.len() != self.n_params {
            return Err(data_error!(
                "expected {} parameters, got {}",
                self.n_params,
                params.len()
            ));
        }
        if x.cols() < self.n_features {
            return Err(data_error!(
                "expected {} feature columns, got {}",
                self.n_features,
                x.cols()
            ));
        }
        Ok(())
    }

    fn forward(&self, row: ArrayView1<'_, f64>, params: &[f64], vals: &mut [f64]) {
        for (k, instr) in self.instrs.iter().enumerate() {
            vals[k] = match instr {
                Instr::Const(v) => *v,
                Instr::Var(i) => row[*i],
                Instr::Param(i) => params[*i],
                Instr::Unary(op, a) => op.apply(vals[*a]),
                Instr::Binary(BinaryOp::Div, a, b) => {
                    if vals[*b] == 0.0 {
                        self.division_placeholder
                    } else {
                        vals[*a] / vals[*b]
                    }
                }
                Instr::Binary(op, a, b) => op.apply(vals[*a], vals[*b]),
                Instr::Nary(op, args) => op.fold(args.iter().map(|a| vals[*a])),
            };
        }
    }

    /// One output per row of `x`. Values may be non-finite; callers decide
    /// whether that is acceptable.
    pub fn evaluate(&self, x: &Matrix, params: &[f64]) -> SrResult<Vec<f64>> {
        self.check_inputs(x, params)?;
        let mut vals = vec![0.0; self.instrs.len()];
        let mut out = Vec::with_capacity(x.rows());
        for row in x.view().rows() {
            self.forward(row, params, &mut vals);
            out.push(vals[self.instrs.len() - 1]);
        }
        Ok(out)
    }

    /// Mean squared error against `y` and its gradient with respect to the
    /// parameters, by reverse-mode accumulation.
    pub fn loss_and_gradient(
        &self,
        x: &Matrix,
        y: ArrayView1<'_, f64>,
        params: &[f64],
    ) -> SrResult<(f64, Vec<f64>)> {
        self.check_inputs(x, params)?;
        if y.len() != x.rows() || y.is_empty() {
            return Err(data_error!("{} targets for {} rows", y.len(), x.rows()));
        }

        let m = self.instrs.len();
        let n = x.rows() as f64;
        let mut vals = vec![0.0; m];
        let mut adj = vec![0.0; m];
        let mut grad = vec![0.0; self.n_params];
        let mut loss = 0.0;

        for (row, target) in x.view().rows().into_iter().zip(y.iter()) {
            self.forward(row, params, &mut vals);
            let residual = vals[m - 1] - target;
            loss += residual * residual;

            adj.iter_mut().for_each(|a| *a = 0.0);
            adj[m - 1] = 2.0 * residual / n;
            for k in (0..m).rev() {
                let g = adj[k];
                if g == 0.0 {
                    continue;
                }
                match &self.instrs[k] {
                    Instr::Const(_) | Instr::Var(_) => {}
                    Instr::Param(i) => grad[*i] += g,
                    Instr::Unary(op, a) => {
                        let (av, out) = (vals[*a], vals[k]);
                        let d = match op {
                            UnaryOp::Neg => -1.0,
                            UnaryOp::Sin => av.cos(),
                            UnaryOp::Cos => -av.sin(),
                            UnaryOp::Log => 1.0 / av,
                            UnaryOp::Sqrt => 0.5 / out,
                            UnaryOp::Exp => out,
                            UnaryOp::Abs => {
                                if av == 0.0 {
                                    0.0
                                } else {
                                    av.signum()
                                }
                            }
                        };
                        adj[*a] += g * d;
                    }
                    Instr::Binary(op, a, b) => {
                        let (av, bv, out) = (vals[*a], vals[*b], vals[k]);
                        match op {
                            BinaryOp::Sub => {
                                adj[*a] += g;
                                adj[*b] -= g;
                            }
                            BinaryOp::Div => {
                                // the placeholder branch is constant
                                if bv != 0.0 {
                                    adj[*a] += g / bv;
                                    adj[*b] -= g * av / (bv * bv);
                                }
                            }
                            BinaryOp::Pow => {
                                adj[*a] += g * bv * av.powf(bv - 1.0);
                                if av > 0.0 {
                                    adj[*b] += g * out * av.ln();
                                }
                            }
                        }
                    }
                    Instr::Nary(op, args) => match op {
                        NaryOp::Add => {
                            for a in args {
                                adj[*a] += g;
                            }
                        }
                        NaryOp::Mul => {
                            for (j, a) in args.iter().enumerate() {
                                let others: f64 = args
                                    .iter()
                                    .enumerate()
                                    .filter(|(i, _)| *i != j)
                                    .map(|(_, o)| vals[*o])
                                    .product();
                                adj[*a] += g * others;
                            }
                        }
                        NaryOp::Max | NaryOp::Min => {
                            let out = vals[k];
                            if let Some(a) = args.iter().find(|a| vals[**a] == out) {
                                adj[*a] += g;
                            }
                        }
                    },
                }
            }
        }

        Ok((loss / n, grad))
    }
}
