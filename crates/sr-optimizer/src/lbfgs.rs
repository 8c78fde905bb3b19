//! Limited-memory BFGS with a fixed step size.
//!
//! No line search: each iteration moves `learning_rate` along the two-loop
//! recursion direction, except the first, which is scaled down by the
//! gradient's L1 norm so an unscaled problem does not overshoot.

use std::collections::VecDeque;

use sr_types::RefineConfig;

/// Smallest curvature `y·s` accepted into the history.
const CURVATURE_EPS: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LbfgsSettings {
    pub learning_rate: f64,
    pub tolerance_grad: f64,
    pub tolerance_change: f64,
    pub history_size: usize,
}

impl From<&RefineConfig> for LbfgsSettings {
    fn from(config: &RefineConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            tolerance_grad: config.tolerance_grad,
            tolerance_change: config.tolerance_change,
            history_size: config.history_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Moved,
    /// Gradient or step fell under tolerance; further steps are pointless.
    Converged,
}

#[derive(Debug, Clone)]
pub struct Lbfgs {
    settings: LbfgsSettings,
    iteration: usize,
    direction: Vec<f64>,
    step_size: f64,
    prev_grad: Vec<f64>,
    /// `(s, y, 1 / y·s)` curvature pairs, oldest first.
    history: VecDeque<(Vec<f64>, Vec<f64>, f64)>,
    h_diag: f64,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl Lbfgs {
    pub fn new(settings: LbfgsSettings) -> Self {
        Self {
            settings,
            iteration: 0,
            direction: Vec::new(),
            step_size: 0.0,
            prev_grad: Vec::new(),
            history: VecDeque::with_capacity(settings.history_size),
            h_diag: 1.0,
        }
    }

    pub fn iterations(&self) -> usize {
        self.iteration
    }

    /// Updates `params` in place given the gradient at `params`.
    pub fn step(&mut self, params: &mut [f64], grad: &[f64]) -> StepOutcome {
        let max_grad = grad.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
        if max_grad <= self.settings.tolerance_grad {
            return StepOutcome::Converged;
        }
        self.iteration += 1;

        if self.iteration == 1 {
            self.direction = grad.iter().map(|g| -g).collect();
            self.h_diag = 1.0;
        } else {
            let y: Vec<f64> = grad.iter().zip(&self.prev_grad).map(|(g, p)| g - p).collect();
            let s: Vec<f64> = self.direction.iter().map(|d| d * self.step_size).collect();
            let ys = dot(&y, &s);
            if ys > CURVATURE_EPS {
                if self.history.len() == self.settings.history_size {
                    self.history.pop_front();
                }
                self.h_diag = ys / dot(&y, &y);
                self.history.push_back((s, y, 1.0 / ys));
            }

            let mut q: Vec<f64> = grad.iter().map(|g| -g).collect();
            let mut alphas = Vec::with_capacity(self.history.len());
            for (s, y, rho) in self.history.iter().rev() {
                let alpha = rho * dot(s, &q);
                q.iter_mut().zip(y).for_each(|(qi, yi)| *qi -= alpha * yi);
                alphas.push(alpha);
            }
            q.iter_mut().for_each(|qi| *qi *= self.h_diag);
            for ((s, y, rho), alpha) in self.history.iter().zip(alphas.iter().rev()) {
                let beta = rho * dot(y, &q);
                q.iter_mut().zip(s).for_each(|(qi, si)| *qi += si * (alpha - beta));
            }
            self.direction = q;
        }
        self.prev_grad = grad.to_vec();

        self.step_size = if self.iteration == 1 {
            let l1: f64 = grad.iter().map(|g| g.abs()).sum();
            (1.0 / l1).min(1.0) * self.settings.learning_rate
        } else {
            self.settings.learning_rate
        };

        if dot(grad, &self.direction) > -self.settings.tolerance_change {
            return StepOutcome::Converged;
        }

        let mut largest_move = 0.0_f64;
        for (p, d) in params.iter_mut().zip(&self.direction) {
            let delta = self.step_size * d;
            *p += delta;
            largest_move = largest_move.max(delta.abs());
        }

        if largest_move <= self.settings.tolerance_change {
            StepOutcome::Converged
        } else {
            StepOutcome::Moved
        }
    }
}
