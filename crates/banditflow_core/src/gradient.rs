//! Gain of a softmax policy and its gradient with respect to the logits.
//!
//! For every environment the policy induces a Markov chain
//! `P = (1 - reset) * sum_a pi[s, a] M[s, a, :] + reset / n`. With
//! `C = (1 + eps) I - P + 11^T`, the long-run reward rate is
//! `G = 1^T C^{-1} r`. Writing `mu^T = 1^T C^{-1}` (the stationary law for
//! `eps = 0`) and `h = C^{-1} r`, the adjoint identity `dG = mu^T dP h`
//! gives the gradient without differentiating through the solve.

use crate::master_matrix::MasterMatrix;
use crate::traits::VectorField;
use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};

/// Numerically stable row-wise softmax.
pub fn softmax_rows(weights: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = weights.clone();
    for mut row in out.row_iter_mut() {
        let max = row.max();
        row.apply(|x| *x = (*x - max).exp());
        let total = row.sum();
        row /= total;
    }
    out
}

/// Gain, its gradient, and the worst environment's gain.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub gain: f64,
    pub gradient: DMatrix<f64>,
    pub custom: f64,
}

/// Averaged reward rate over a fixed set of environments.
pub struct Objective<'a> {
    master_matrices: &'a [MasterMatrix],
    rewards: DVector<f64>,
    reset: f64,
    eps: f64,
}

impl<'a> Objective<'a> {
    pub fn new(
        master_matrices: &'a [MasterMatrix],
        rewards: &[f64],
        reset: f64,
        eps: f64,
    ) -> Result<Self> {
        let Some(first) = master_matrices.first() else {
            bail!("At least one master matrix is required.");
        };
        let (n_states, n_actions) = (first.n_states(), first.n_actions());
        if master_matrices
            .iter()
            .any(|m| m.n_states() != n_states || m.n_actions() != n_actions)
        {
            bail!("Master matrices must share the same shape.");
        }
        if rewards.len() != n_states {
            bail!(
                "Reward vector length mismatch. Expected {}, got {}.",
                n_states,
                rewards.len()
            );
        }
        if !(0.0..=1.0).contains(&reset) {
            bail!("reset must lie in [0, 1], got {}.", reset);
        }
        if eps < 0.0 {
            bail!("eps must be non-negative.");
        }
        Ok(Self {
            master_matrices,
            rewards: DVector::from_column_slice(rewards),
            reset,
            eps,
        })
    }

    pub fn n_states(&self) -> usize {
        self.rewards.len()
    }

    pub fn n_actions(&self) -> usize {
        self.master_matrices[0].n_actions()
    }

    pub fn evaluate(&self, weights: &DMatrix<f64>) -> Evaluation {
        let policy = softmax_rows(weights);
        let k = self.master_matrices.len() as f64;

        let mut gain = 0.0;
        let mut custom = f64::INFINITY;
        let mut d_policy = DMatrix::zeros(self.n_states(), self.n_actions());
        for mm in self.master_matrices {
            let (g, d) = self.environment_gain(mm, &policy);
            gain += g / k;
            if g.is_nan() || g < custom {
                custom = g;
            }
            d_policy += d / k;
        }

        // Back through the softmax: dG/dW = pi * (dG/dpi - <pi, dG/dpi>_row).
        let mut gradient = d_policy.component_mul(&policy);
        for (mut row, pi_row) in gradient.row_iter_mut().zip(policy.row_iter()) {
            let mean = row.sum();
            for (g, p) in row.iter_mut().zip(pi_row.iter()) {
                *g -= p * mean;
            }
        }

        Evaluation {
            gain,
            gradient,
            custom,
        }
    }

    fn environment_gain(&self, mm: &MasterMatrix, policy: &DMatrix<f64>) -> (f64, DMatrix<f64>) {
        let n = self.n_states();
        let mut chain = mm.transition_operator(policy) * (1.0 - self.reset);
        chain.add_scalar_mut(self.reset / n as f64);

        let c = DMatrix::identity(n, n) * (1.0 + self.eps) - chain + DMatrix::repeat(n, n, 1.0);
        let mu = c.transpose().lu().solve(&DVector::repeat(n, 1.0));
        let h = c.lu().solve(&self.rewards);
        let (Some(mu), Some(h)) = (mu, h) else {
            return (
                f64::NAN,
                DMatrix::repeat(n, self.n_actions(), f64::NAN),
            );
        };

        let mut d_policy = mm.contract_dest(&h);
        for (s, mut row) in d_policy.row_iter_mut().enumerate() {
            row *= (1.0 - self.reset) * mu[s];
        }
        (mu.dot(&self.rewards), d_policy)
    }
}

/// `dW/dt = grad G(W)`, with the weights flattened column-major.
pub struct GainField<'o, 'a> {
    objective: &'o Objective<'a>,
}

impl<'o, 'a> GainField<'o, 'a> {
    pub fn new(objective: &'o Objective<'a>) -> Self {
        Self { objective }
    }
}

impl VectorField for GainField<'_, '_> {
    fn dimension(&self) -> usize {
        self.objective.n_states() * self.objective.n_actions()
    }

    fn eval(&self, _t: f64, x: &[f64], out: &mut [f64]) {
        let weights =
            DMatrix::from_column_slice(self.objective.n_states(), self.objective.n_actions(), x);
        let eval = self.objective.evaluate(&weights);
        out.copy_from_slice(eval.gradient.as_slice());
    }
}
