//! Seams between the gain gradient and the integrators that advance it.

/// Right-hand side of `dW/dt = f(t, W)` over flattened policy logits.
///
/// Logits are flattened column-major, matching nalgebra's storage, so a
/// field of dimension `n_states * n_actions` gives `dW/dt` entry by entry.
pub trait VectorField {
    fn dimension(&self) -> usize;

    /// Writes `f(t, x)` into `out`.
    fn eval(&self, t: f64, x: &[f64], out: &mut [f64]);
}

/// One-step integrator for a [`VectorField`].
pub trait Stepper {
    /// Advances `state` from `t` to `t + dt` in place and moves `t` along.
    fn step(&mut self, field: &impl VectorField, t: &mut f64, state: &mut [f64], dt: f64);
}
