//! Adaptive gradient flow on the policy logits.
//!
//! The flow ascends the gain, `dW/dt = grad G(W)`. Step size control is a
//! soft bound on gradient drift: a proposal is kept only if the gradient it
//! lands on differs from the current one by at most `max_dgrad` in L2 norm.
//! Accepted steps grow `dt` up to `max_dt`, rejected ones shrink it and
//! retry. Once the policy saturates every proposal is accepted, so the cap
//! is what keeps `t` finite over long runs.
//!
//! [`GradientFlow`] is a lazy, unbounded iterator; callers stop it by
//! consuming a finite prefix.

use crate::gradient::{Evaluation, GainField, Objective};
use crate::solvers::{ExplicitRk, Scheme};
use crate::traits::Stepper;
use anyhow::{bail, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowSettings {
    pub max_dgrad: f64,
    pub initial_dt: f64,
    pub growth: f64,
    pub shrink: f64,
    pub min_dt: f64,
    pub max_dt: f64,
    pub scheme: Scheme,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            max_dgrad: 1e-4,
            initial_dt: 1.0,
            growth: 1.1,
            shrink: 0.1,
            min_dt: 1e-300,
            max_dt: 1e6,
            scheme: Scheme::default(),
        }
    }
}

/// Scalar bookkeeping of one accepted step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlowState {
    pub step: usize,
    pub t: f64,
    /// Size of the step that produced this state; the initial guess at step 0.
    pub dt: f64,
    pub dgrad: f64,
    pub rejections: usize,
}

#[derive(Debug, Clone)]
pub struct FlowInternals {
    pub variables: DMatrix<f64>,
    pub gradient: DMatrix<f64>,
    pub gain: f64,
    pub custom: f64,
    /// Step sizes tried and rejected before this state was accepted.
    pub rejected_dt: Vec<f64>,
}

pub struct GradientFlow<'o, 'a> {
    objective: &'o Objective<'a>,
    settings: FlowSettings,
    stepper: Option<ExplicitRk>,
    weights: DMatrix<f64>,
    current: Evaluation,
    t: f64,
    step: usize,
    dt: f64,
    started: bool,
    stalled: bool,
}

impl<'o, 'a> GradientFlow<'o, 'a> {
    pub fn new(
        objective: &'o Objective<'a>,
        weights: DMatrix<f64>,
        settings: FlowSettings,
    ) -> Result<Self> {
        if weights.shape() != (objective.n_states(), objective.n_actions()) {
            bail!(
                "Weight shape mismatch. Expected {}x{}, got {}x{}.",
                objective.n_states(),
                objective.n_actions(),
                weights.nrows(),
                weights.ncols()
            );
        }
        if !(settings.max_dgrad > 0.0) {
            bail!("max_dgrad must be positive.");
        }
        if !(settings.initial_dt > 0.0) || !(settings.min_dt > 0.0) {
            bail!("Step sizes must be positive.");
        }
        if !(settings.max_dt >= settings.min_dt) || !settings.max_dt.is_finite() {
            bail!("max_dt must be finite and no smaller than min_dt.");
        }
        if !(settings.growth >= 1.0) || !(settings.shrink > 0.0 && settings.shrink < 1.0) {
            bail!("growth must be at least 1 and shrink must lie in (0, 1).");
        }

        let stepper = match settings.scheme {
            Scheme::Euler => None,
            scheme => Some(ExplicitRk::new(scheme.tableau(), weights.len())),
        };
        let current = objective.evaluate(&weights);

        Ok(Self {
            objective,
            settings,
            stepper,
            weights,
            current,
            t: 0.0,
            step: 0,
            dt: settings.initial_dt.min(settings.max_dt),
            started: false,
            stalled: false,
        })
    }

    fn propose(&mut self, dt: f64) -> DMatrix<f64> {
        match self.stepper.as_mut() {
            None => &self.weights + &self.current.gradient * dt,
            Some(stepper) => {
                let field = GainField::new(self.objective);
                let mut t = self.t;
                let mut state = self.weights.as_slice().to_vec();
                stepper.step(&field, &mut t, &mut state, dt);
                DMatrix::from_vec(self.weights.nrows(), self.weights.ncols(), state)
            }
        }
    }

    fn snapshot(&self, dt: f64, dgrad: f64, rejected_dt: Vec<f64>) -> (FlowState, FlowInternals) {
        (
            FlowState {
                step: self.step,
                t: self.t,
                dt,
                dgrad,
                rejections: rejected_dt.len(),
            },
            FlowInternals {
                variables: self.weights.clone(),
                gradient: self.current.gradient.clone(),
                gain: self.current.gain,
                custom: self.current.custom,
                rejected_dt,
            },
        )
    }
}

impl Iterator for GradientFlow<'_, '_> {
    type Item = (FlowState, FlowInternals);

    fn next(&mut self) -> Option<Self::Item> {
        if self.stalled {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.snapshot(self.dt, 0.0, Vec::new()));
        }

        let mut rejected = Vec::new();
        loop {
            let dt = self.dt;
            let next_t = self.t + dt;
            if dt < self.settings.min_dt || next_t <= self.t || !next_t.is_finite() {
                warn!(
                    step = self.step,
                    t = self.t,
                    dt,
                    rejections = rejected.len(),
                    "gradient flow stalled, step size no longer advances time"
                );
                self.stalled = true;
                return None;
            }

            let proposal = self.propose(dt);
            let eval = self.objective.evaluate(&proposal);
            let dgrad = (&eval.gradient - &self.current.gradient).norm();

            // A NaN drift compares false and is accepted, so instability
            // surfaces in the trajectory rather than stalling the flow.
            if dgrad > self.settings.max_dgrad {
                rejected.push(dt);
                self.dt = dt * self.settings.shrink;
                continue;
            }

            self.weights = proposal;
            self.current = eval;
            self.t = next_t;
            self.step += 1;
            self.dt = (dt * self.settings.growth).min(self.settings.max_dt);
            return Some(self.snapshot(dt, dgrad, rejected));
        }
    }
}
