//! Dense transition tensors, one per environment parameterisation.

use crate::state_space::StateSpace;
use nalgebra::{DMatrix, DVector};

/// `M[s, a, s']`: probability of landing in `s'` after taking `a` in `s`.
///
/// Stored flat with `s'` fastest, so `row(s, a)` is a contiguous slice.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterMatrix {
    n_states: usize,
    n_actions: usize,
    data: Vec<f64>,
}

impl MasterMatrix {
    /// Materialises `prob` over every (source, action, destination) triple.
    pub fn build<S, A>(states: &[S], actions: &[A], prob: impl Fn(&S, &A, &S) -> f64) -> Self {
        let n_states = states.len();
        let n_actions = actions.len();
        let mut data = Vec::with_capacity(n_states * n_actions * n_states);
        for source in states {
            for action in actions {
                for dest in states {
                    data.push(prob(source, action, dest));
                }
            }
        }
        Self {
            n_states,
            n_actions,
            data,
        }
    }

    /// Tensor of `space` under arm success rates `f`.
    pub fn for_environment(space: &StateSpace, f: &[f64]) -> Self {
        Self::build(&space.states, &space.actions, |s, a, d| space.prob(f, s, a, d))
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    pub fn row(&self, source: usize, action: usize) -> &[f64] {
        let start = (source * self.n_actions + action) * self.n_states;
        &self.data[start..start + self.n_states]
    }

    /// Markov operator induced by `policy`: `P[s, s'] = sum_a pi[s, a] M[s, a, s']`.
    pub fn transition_operator(&self, policy: &DMatrix<f64>) -> DMatrix<f64> {
        let mut op = DMatrix::zeros(self.n_states, self.n_states);
        for s in 0..self.n_states {
            for a in 0..self.n_actions {
                let weight = policy[(s, a)];
                if weight == 0.0 {
                    continue;
                }
                for (d, p) in self.row(s, a).iter().enumerate() {
                    op[(s, d)] += weight * p;
                }
            }
        }
        op
    }

    /// `q[s, a] = sum_s' M[s, a, s'] h[s']`.
    pub fn contract_dest(&self, h: &DVector<f64>) -> DMatrix<f64> {
        DMatrix::from_fn(self.n_states, self.n_actions, |s, a| {
            self.row(s, a).iter().zip(h.iter()).map(|(p, v)| p * v).sum()
        })
    }
}
