//! Warm-start search and memory bootstrap around the gradient flow.
//!
//! A run samples `trials` random logit matrices, flows each for
//! `trials_steps` steps, keeps the one with the highest final gain and flows
//! it to `stop_steps`. With `bootstrap_ram` the resulting shift policy is
//! then embedded in the ram action space and flowed again. Every saved
//! result is handed to a [`CheckpointSink`] as it is produced.

use crate::error::HarnessError;
use crate::gradient::{softmax_rows, Objective};
use crate::gradientflow::{FlowSettings, GradientFlow};
use crate::master_matrix::MasterMatrix;
use crate::solvers::Scheme;
use crate::state_space::{
    embed_shift_action, ensure_compatible, Action, Arm, MemoryMode, State, StateSpace,
};
use anyhow::{anyhow, Result};
use nalgebra::DMatrix;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize, Serializer};
use std::time::{Duration, Instant};
use tracing::info;

/// Largest register length; the ram tensor holds `2^(3 mem + 2)` entries.
pub const MAX_MEMORY: usize = 8;

/// Logit gap between embedded ram actions and the ones the shift policy never uses.
pub const UNREACHABLE_LOGIT_GAP: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub arms: usize,
    pub memory: usize,
    pub memory_type: MemoryMode,
    pub bootstrap_ram: bool,
    /// Asymmetry between the good and the bad arm.
    pub gamma: f64,
    pub reset: f64,
    pub seed: u64,
    pub max_dgrad: f64,
    pub eps: f64,
    pub std0: f64,
    pub trials: usize,
    pub trials_steps: usize,
    pub stop_steps: usize,
    pub scheme: Scheme,
    /// Seconds between progress lines.
    pub print_interval: f64,
    /// Seconds between intermediate checkpoints.
    pub save_interval: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            arms: 2,
            memory: 1,
            memory_type: MemoryMode::Shift,
            bootstrap_ram: false,
            gamma: 0.4,
            reset: 0.0,
            seed: 0,
            max_dgrad: 1e-4,
            eps: 1e-8,
            std0: 1.0,
            trials: 1,
            trials_steps: 0,
            stop_steps: 1000,
            scheme: Scheme::default(),
            print_interval: 2.0,
            save_interval: 10.0,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        let fail = |msg: String| Err(HarnessError::Config(msg));
        if self.arms != 2 {
            return fail(format!(
                "only two-armed environments are defined, got {} arms",
                self.arms
            ));
        }
        if self.memory == 0 || self.memory > MAX_MEMORY {
            return fail(format!(
                "memory must be in 1..={MAX_MEMORY}, got {}",
                self.memory
            ));
        }
        if !(0.0..=0.5).contains(&self.gamma) {
            return fail(format!("gamma must lie in [0, 0.5], got {}", self.gamma));
        }
        if !(0.0..=1.0).contains(&self.reset) {
            return fail(format!("reset must lie in [0, 1], got {}", self.reset));
        }
        if !(self.max_dgrad > 0.0) {
            return fail(format!("max_dgrad must be positive, got {}", self.max_dgrad));
        }
        if !(self.eps >= 0.0) || !(self.std0 >= 0.0) {
            return fail("eps and std0 must be non-negative".to_string());
        }
        if self.trials == 0 {
            return fail("at least one trial is required".to_string());
        }
        if !(self.print_interval >= 0.0 && self.print_interval.is_finite())
            || !(self.save_interval >= 0.0 && self.save_interval.is_finite())
        {
            return fail("print and save intervals must be finite and non-negative".to_string());
        }
        if self.bootstrap_ram && self.memory_type != MemoryMode::Shift {
            return fail("bootstrap_ram requires memory_type shift".to_string());
        }
        Ok(())
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            max_dgrad: self.max_dgrad,
            scheme: self.scheme,
            ..FlowSettings::default()
        }
    }

    fn cadence(&self) -> Cadence {
        Cadence {
            print: Duration::from_secs_f64(self.print_interval),
            save: Duration::from_secs_f64(self.save_interval),
        }
    }
}

/// Arm success rates of the environments a policy is scored against:
/// either arm may be the odd one out, better or worse by `gamma`.
pub fn environments(gamma: f64) -> Vec<[f64; 2]> {
    vec![
        [0.5, 0.5 + gamma],
        [0.5, 0.5 - gamma],
        [0.5 + gamma, 0.5],
        [0.5 - gamma, 0.5],
    ]
}

fn master_matrices(space: &StateSpace, gamma: f64) -> Vec<MasterMatrix> {
    environments(gamma)
        .iter()
        .map(|f| MasterMatrix::for_environment(space, f))
        .collect()
}

/// One entry of the dynamics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: usize,
    pub t: f64,
    pub dt: f64,
    /// Seconds since the optimisation started.
    pub wall: f64,
    pub ngrad: f64,
    pub gain: f64,
    pub custom: f64,
    pub dgrad: f64,
    pub rejections: usize,
}

fn matrix_rows<S: Serializer>(matrix: &DMatrix<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(
        matrix
            .row_iter()
            .map(|row| row.iter().copied().collect::<Vec<f64>>()),
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub dynamics: Vec<Snapshot>,
    #[serde(serialize_with = "matrix_rows")]
    pub weights: DMatrix<f64>,
    #[serde(serialize_with = "matrix_rows")]
    pub pi: DMatrix<f64>,
}

impl RunResult {
    pub fn final_gain(&self) -> f64 {
        self.dynamics.last().map_or(f64::NAN, |s| s.gain)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub print: Duration,
    pub save: Duration,
}

/// Consumes a gradient flow up to `horizon`, yielding the accumulated
/// result at every save point and once more when the horizon is reached.
/// A stalled flow ends early with whatever was reached since the last save.
pub struct Optimization<'o, 'a> {
    flow: GradientFlow<'o, 'a>,
    phase: &'static str,
    horizon: usize,
    cadence: Cadence,
    dynamics: Vec<Snapshot>,
    weights: Option<DMatrix<f64>>,
    start: Instant,
    last_print: Instant,
    last_save: Instant,
    /// Length of `dynamics` at the last yielded result.
    saved: usize,
    done: bool,
}

pub fn optimize<'o, 'a>(
    objective: &'o Objective<'a>,
    weights: DMatrix<f64>,
    settings: FlowSettings,
    horizon: usize,
    cadence: Cadence,
    phase: &'static str,
) -> Result<Optimization<'o, 'a>> {
    let flow = GradientFlow::new(objective, weights, settings)?;
    let now = Instant::now();
    Ok(Optimization {
        flow,
        phase,
        horizon,
        cadence,
        dynamics: Vec::new(),
        weights: None,
        start: now,
        last_print: now,
        last_save: now,
        saved: 0,
        done: false,
    })
}

impl Optimization<'_, '_> {
    fn result(&mut self) -> Option<RunResult> {
        let weights = self.weights.clone()?;
        self.saved = self.dynamics.len();
        let pi = softmax_rows(&weights);
        Some(RunResult {
            dynamics: self.dynamics.clone(),
            weights,
            pi,
        })
    }
}

impl Iterator for Optimization<'_, '_> {
    type Item = RunResult;

    fn next(&mut self) -> Option<RunResult> {
        if self.done {
            return None;
        }
        loop {
            let Some((state, internals)) = self.flow.next() else {
                self.done = true;
                if self.dynamics.len() == self.saved {
                    return None;
                }
                return self.result();
            };

            let snapshot = Snapshot {
                step: state.step,
                t: state.t,
                dt: state.dt,
                wall: self.start.elapsed().as_secs_f64(),
                ngrad: internals.gradient.norm(),
                gain: internals.gain,
                custom: internals.custom,
                dgrad: state.dgrad,
                rejections: state.rejections,
            };
            self.weights = Some(internals.variables);

            if self.last_print.elapsed() >= self.cadence.print {
                self.last_print = Instant::now();
                info!(
                    phase = self.phase,
                    wall = snapshot.wall,
                    step = snapshot.step,
                    t = snapshot.t,
                    dt = snapshot.dt,
                    ngrad = snapshot.ngrad,
                    gain = snapshot.gain,
                    "progress"
                );
            }
            self.dynamics.push(snapshot);

            let mut save = false;
            if self.last_save.elapsed() >= self.cadence.save {
                self.last_save = Instant::now();
                save = true;
            }
            if state.step == self.horizon {
                save = true;
                self.done = true;
            }
            if save {
                return self.result();
            }
        }
    }
}

/// Index of the trial with the largest final gain; the first one wins ties
/// and NaN never beats a number.
pub fn select_best(trials: &[RunResult]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, trial) in trials.iter().enumerate() {
        let gain = trial.final_gain();
        match best {
            None => best = Some((i, gain)),
            Some((_, top)) if gain > top || (top.is_nan() && !gain.is_nan()) => {
                best = Some((i, gain))
            }
            _ => {}
        }
    }
    best.map(|(i, _)| i)
}

/// Re-expresses shift-mode logits over the ram action space.
///
/// Each shift action `(arm, bit)` in state `s` becomes the ram action that
/// writes `s.memory[1..] + bit`, keeping its logit. Every other ram action
/// sits `UNREACHABLE_LOGIT_GAP` below the row maximum (and at most at -100),
/// so the softmax policy is unchanged up to `e^-100`.
pub fn bootstrap_weights(
    shift: &StateSpace,
    ram: &StateSpace,
    weights: &DMatrix<f64>,
) -> Result<DMatrix<f64>, HarnessError> {
    ensure_compatible(shift, ram)?;
    let mut out = DMatrix::zeros(ram.states.len(), ram.actions.len());
    for (s, state) in shift.states.iter().enumerate() {
        let row = ram.state_index(state).ok_or_else(|| {
            HarnessError::Consistency(format!("state {state} missing from the ram space"))
        })?;
        let fill = (-UNREACHABLE_LOGIT_GAP).min(weights.row(s).max() - UNREACHABLE_LOGIT_GAP);
        out.row_mut(row).fill(fill);
        for (a, action) in shift.actions.iter().enumerate() {
            let embedded = embed_shift_action(state, action);
            let col = ram.action_index(&embedded).ok_or_else(|| {
                HarnessError::Consistency(format!("action {embedded} missing from the ram space"))
            })?;
            out[(row, col)] = weights[(s, a)];
        }
    }
    Ok(out)
}

fn random_weights(rng: &mut ChaCha8Rng, rows: usize, cols: usize, std0: f64) -> DMatrix<f64> {
    DMatrix::from_fn(rows, cols, |_, _| {
        let z: f64 = rng.sample(StandardNormal);
        z * std0
    })
}

/// Everything a consumer needs to interpret one saved result.
#[derive(Debug, Serialize)]
pub struct Checkpoint<'c> {
    pub config: &'c RunConfig,
    pub states: &'c [State],
    pub actions: &'c [Action],
    pub arms: &'c [Arm],
    pub trials: &'c [RunResult],
    pub main: &'c RunResult,
    pub ram_actions: Option<&'c [Action]>,
    pub ram: Option<&'c RunResult>,
}

/// Receives checkpoints in production order. An error aborts the run.
pub trait CheckpointSink {
    fn record(&mut self, checkpoint: &Checkpoint<'_>) -> Result<()>;
}

impl<F> CheckpointSink for F
where
    F: FnMut(&Checkpoint<'_>) -> Result<()>,
{
    fn record(&mut self, checkpoint: &Checkpoint<'_>) -> Result<()> {
        self(checkpoint)
    }
}

pub fn execute(config: &RunConfig, sink: &mut impl CheckpointSink) -> Result<()> {
    config.validate()?;
    let cadence = config.cadence();
    let settings = config.flow_settings();

    let space = StateSpace::build(config.arms, config.memory, config.memory_type)?;
    let mms = master_matrices(&space, config.gamma);
    let objective = Objective::new(&mms, &space.rewards, config.reset, config.eps)?;
    info!(
        states = space.states.len(),
        actions = space.actions.len(),
        memory_type = %config.memory_type,
        "built master matrices"
    );

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut trials = Vec::with_capacity(config.trials);
    for trial in 0..config.trials {
        let w0 = random_weights(&mut rng, space.states.len(), space.actions.len(), config.std0);
        let result = optimize(&objective, w0, settings, config.trials_steps, cadence, "trial")?
            .last()
            .ok_or_else(|| anyhow!("trial {trial} produced no result"))?;
        info!(trial, gain = result.final_gain(), "trial finished");
        trials.push(result);
    }
    let best = select_best(&trials).ok_or_else(|| anyhow!("no trial to select from"))?;
    info!(trial = best, gain = trials[best].final_gain(), "selected warm start");

    let mut main = None;
    for result in optimize(
        &objective,
        trials[best].weights.clone(),
        settings,
        config.stop_steps,
        cadence,
        "main",
    )? {
        sink.record(&Checkpoint {
            config,
            states: &space.states,
            actions: &space.actions,
            arms: &space.arms,
            trials: &trials,
            main: &result,
            ram_actions: None,
            ram: None,
        })?;
        main = Some(result);
    }
    let main = main.ok_or_else(|| anyhow!("main run produced no result"))?;

    if !config.bootstrap_ram {
        return Ok(());
    }

    let ram_space = StateSpace::build(config.arms, config.memory, MemoryMode::Ram)?;
    let w_ram = bootstrap_weights(&space, &ram_space, &main.weights)?;
    let ram_mms = master_matrices(&ram_space, config.gamma);
    let ram_objective = Objective::new(&ram_mms, &ram_space.rewards, config.reset, config.eps)?;
    info!(actions = ram_space.actions.len(), "bootstrapping into ram memory");

    for result in optimize(&ram_objective, w_ram, settings, config.stop_steps, cadence, "ram")? {
        sink.record(&Checkpoint {
            config,
            states: &space.states,
            actions: &space.actions,
            arms: &space.arms,
            trials: &trials,
            main: &main,
            ram_actions: Some(&ram_space.actions),
            ram: Some(&result),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> RunConfig {
        RunConfig {
            memory: 1,
            max_dgrad: 1e-2,
            trials: 2,
            trials_steps: 5,
            stop_steps: 10,
            save_interval: 1e6,
            print_interval: 1e6,
            ..RunConfig::default()
        }
    }

    fn result_with_gain(gain: f64) -> RunResult {
        RunResult {
            dynamics: vec![Snapshot {
                step: 0,
                t: 0.0,
                dt: 1.0,
                wall: 0.0,
                ngrad: 0.0,
                gain,
                custom: gain,
                dgrad: 0.0,
                rejections: 0,
            }],
            weights: DMatrix::zeros(1, 1),
            pi: DMatrix::repeat(1, 1, 1.0),
        }
    }

    fn assert_config_error(config: RunConfig, needle: &str) {
        match config.validate() {
            Err(HarnessError::Config(message)) => assert!(
                message.contains(needle),
                "expected \"{needle}\" in \"{message}\""
            ),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_unsupported_configurations() {
        assert_config_error(RunConfig { arms: 3, ..quick_config() }, "two-armed");
        assert_config_error(RunConfig { memory: 0, ..quick_config() }, "memory");
        assert_config_error(RunConfig { memory: 9, ..quick_config() }, "memory");
        assert_config_error(RunConfig { gamma: 0.7, ..quick_config() }, "gamma");
        assert_config_error(RunConfig { trials: 0, ..quick_config() }, "trial");
        assert_config_error(
            RunConfig {
                bootstrap_ram: true,
                memory_type: MemoryMode::Ram,
                ..quick_config()
            },
            "bootstrap_ram",
        );
        quick_config().validate().expect("quick config is valid");
    }

    #[test]
    fn environments_flip_the_odd_arm() {
        let envs = environments(0.25);
        assert_eq!(envs.len(), 4);
        assert_eq!(envs[0], [0.5, 0.75]);
        assert_eq!(envs[3], [0.25, 0.5]);
    }

    #[test]
    fn select_best_prefers_first_maximum_and_ignores_nan() {
        let trials = vec![
            result_with_gain(f64::NAN),
            result_with_gain(0.4),
            result_with_gain(0.7),
            result_with_gain(0.7),
        ];
        assert_eq!(select_best(&trials), Some(2));
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn single_trial_selection_is_a_no_op() {
        let trials = vec![result_with_gain(0.3)];
        let best = select_best(&trials).expect("one trial");
        assert_eq!(best, 0);
        assert_eq!(trials[best].final_gain(), 0.3);
    }

    #[test]
    fn optimize_stops_at_the_horizon() {
        let space = StateSpace::build(2, 1, MemoryMode::Shift).expect("space");
        let mms = master_matrices(&space, 0.4);
        let objective = Objective::new(&mms, &space.rewards, 0.0, 1e-8).expect("objective");
        let cadence = Cadence {
            print: Duration::from_secs(3600),
            save: Duration::from_secs(3600),
        };
        let results: Vec<RunResult> = optimize(
            &objective,
            DMatrix::zeros(4, 4),
            quick_config().flow_settings(),
            7,
            cadence,
            "test",
        )
        .expect("optimize")
        .collect();
        assert_eq!(results.len(), 1);
        let steps: Vec<usize> = results[0].dynamics.iter().map(|s| s.step).collect();
        assert_eq!(steps, (0..=7).collect::<Vec<_>>());
        for row in results[0].pi.row_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn zero_save_interval_yields_every_step() {
        let space = StateSpace::build(2, 1, MemoryMode::Shift).expect("space");
        let mms = master_matrices(&space, 0.4);
        let objective = Objective::new(&mms, &space.rewards, 0.0, 1e-8).expect("objective");
        let cadence = Cadence {
            print: Duration::from_secs(3600),
            save: Duration::ZERO,
        };
        let results: Vec<RunResult> = optimize(
            &objective,
            DMatrix::zeros(4, 4),
            quick_config().flow_settings(),
            3,
            cadence,
            "test",
        )
        .expect("optimize")
        .collect();
        let lengths: Vec<usize> = results.iter().map(|r| r.dynamics.len()).collect();
        assert_eq!(lengths, vec![1, 2, 3, 4]);
    }

    fn stalling_settings() -> FlowSettings {
        // Every step size the controller can try is already below min_dt.
        FlowSettings {
            min_dt: 2.0,
            ..quick_config().flow_settings()
        }
    }

    #[test]
    fn stalled_flow_yields_what_was_reached_once() {
        let space = StateSpace::build(2, 1, MemoryMode::Shift).expect("space");
        let mms = master_matrices(&space, 0.4);
        let objective = Objective::new(&mms, &space.rewards, 0.0, 1e-8).expect("objective");
        let w0 = DMatrix::from_fn(4, 4, |s, a| s as f64 * 0.3 - a as f64 * 0.5);
        let hourly = Cadence {
            print: Duration::from_secs(3600),
            save: Duration::from_secs(3600),
        };

        let results: Vec<RunResult> =
            optimize(&objective, w0.clone(), stalling_settings(), 50, hourly, "test")
                .expect("optimize")
                .collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].dynamics.len(), 1);
        assert_eq!(results[0].weights, w0);
    }

    #[test]
    fn stalled_flow_does_not_repeat_a_saved_result() {
        let space = StateSpace::build(2, 1, MemoryMode::Shift).expect("space");
        let mms = master_matrices(&space, 0.4);
        let objective = Objective::new(&mms, &space.rewards, 0.0, 1e-8).expect("objective");
        let every_step = Cadence {
            print: Duration::from_secs(3600),
            save: Duration::ZERO,
        };
        let results: Vec<RunResult> = optimize(
            &objective,
            DMatrix::zeros(4, 4),
            stalling_settings(),
            50,
            every_step,
            "test",
        )
        .expect("optimize")
        .collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].dynamics[0].step, 0);
    }

    #[test]
    fn zero_trial_steps_keep_the_initial_weights() {
        let space = StateSpace::build(2, 1, MemoryMode::Shift).expect("space");
        let mms = master_matrices(&space, 0.4);
        let objective = Objective::new(&mms, &space.rewards, 0.0, 1e-8).expect("objective");
        let cadence = Cadence {
            print: Duration::from_secs(3600),
            save: Duration::from_secs(3600),
        };
        let w0 = DMatrix::from_fn(4, 4, |s, a| (s + 2 * a) as f64 * 0.1);
        let settings = quick_config().flow_settings();
        let result = optimize(&objective, w0.clone(), settings, 0, cadence, "trial")
            .expect("optimize")
            .last()
            .expect("checkpoint at step 0");
        assert_eq!(result.weights, w0);
        assert_eq!(result.dynamics.len(), 1);
        assert_eq!(result.dynamics[0].step, 0);

        let config = RunConfig {
            trials_steps: 0,
            ..quick_config()
        };
        let mut trial_lengths = Vec::new();
        execute(&config, &mut |cp: &Checkpoint<'_>| -> Result<()> {
            trial_lengths = cp.trials.iter().map(|t| t.dynamics.len()).collect();
            Ok(())
        })
        .expect("execute");
        assert_eq!(trial_lengths, vec![1, 1]);
    }

    #[test]
    fn bootstrap_preserves_the_shift_policy() {
        let shift = StateSpace::build(2, 2, MemoryMode::Shift).expect("shift");
        let ram = StateSpace::build(2, 2, MemoryMode::Ram).expect("ram");
        let weights = DMatrix::from_fn(shift.states.len(), shift.actions.len(), |s, a| {
            (s as f64 - 3.0) * 0.7 + a as f64 * 1.3
        });
        let shift_pi = softmax_rows(&weights);
        let w_ram = bootstrap_weights(&shift, &ram, &weights).expect("bootstrap");
        let ram_pi = softmax_rows(&w_ram);

        for (s, state) in shift.states.iter().enumerate() {
            let row = ram.state_index(state).expect("shared state");
            let mut embedded = vec![false; ram.actions.len()];
            for (a, action) in shift.actions.iter().enumerate() {
                let col = ram
                    .action_index(&embed_shift_action(state, action))
                    .expect("embedded action");
                embedded[col] = true;
                assert_eq!(w_ram[(row, col)], weights[(s, a)]);
                assert!((ram_pi[(row, col)] - shift_pi[(s, a)]).abs() < 1e-12);
            }
            for (col, used) in embedded.iter().enumerate() {
                if !used {
                    assert!(ram_pi[(row, col)] < 1e-40);
                }
            }
        }
    }

    #[test]
    fn bootstrap_fill_tracks_very_negative_rows() {
        let shift = StateSpace::build(2, 2, MemoryMode::Shift).expect("shift");
        let ram = StateSpace::build(2, 2, MemoryMode::Ram).expect("ram");
        let weights = DMatrix::repeat(shift.states.len(), shift.actions.len(), -500.0);
        let w_ram = bootstrap_weights(&shift, &ram, &weights).expect("bootstrap");
        let ram_pi = softmax_rows(&w_ram);
        for (&w, &p) in w_ram.iter().zip(ram_pi.iter()) {
            if w == -500.0 {
                assert!((p - 0.25).abs() < 1e-12);
            } else {
                assert_eq!(w, -600.0);
                assert!(p < 1e-40);
            }
        }
    }

    #[test]
    fn bootstrap_with_one_cell_is_the_identity() {
        let shift = StateSpace::build(2, 1, MemoryMode::Shift).expect("shift");
        let ram = StateSpace::build(2, 1, MemoryMode::Ram).expect("ram");
        let weights = DMatrix::from_fn(4, 4, |s, a| (s * 4 + a) as f64);
        // One memory cell: both modes write a single bit.
        assert_eq!(bootstrap_weights(&shift, &ram, &weights).expect("bootstrap"), weights);

        let wider = StateSpace::build(2, 2, MemoryMode::Ram).expect("ram");
        assert!(matches!(
            bootstrap_weights(&shift, &wider, &weights),
            Err(HarnessError::Consistency(_))
        ));
    }

    #[test]
    fn execute_records_main_checkpoints() {
        let config = quick_config();
        let mut seen = Vec::new();
        execute(&config, &mut |cp: &Checkpoint<'_>| -> Result<()> {
            seen.push((
                cp.trials.len(),
                cp.main.dynamics.last().map(|s| s.step),
                cp.ram.is_some(),
                cp.states.len(),
                cp.actions.len(),
            ));
            Ok(())
        })
        .expect("execute");
        assert_eq!(seen, vec![(2, Some(10), false, 4, 4)]);
    }

    #[test]
    fn execute_is_reproducible_for_a_seed() {
        let config = quick_config();
        let mut gains = Vec::new();
        for _ in 0..2 {
            let mut trial_gains = Vec::new();
            execute(&config, &mut |cp: &Checkpoint<'_>| -> Result<()> {
                trial_gains = cp.trials.iter().map(|t| t.final_gain()).collect();
                Ok(())
            })
            .expect("execute");
            gains.push(trial_gains);
        }
        assert_eq!(gains[0], gains[1]);
        assert_eq!(gains[0].len(), 2);
    }

    #[test]
    fn execute_bootstraps_into_ram() {
        let config = RunConfig {
            memory: 2,
            bootstrap_ram: true,
            trials: 1,
            ..quick_config()
        };
        let mut phases = Vec::new();
        execute(&config, &mut |cp: &Checkpoint<'_>| -> Result<()> {
            let json = serde_json::to_value(cp).expect("checkpoint serializes");
            assert!(json["main"]["weights"].is_array());
            phases.push(cp.ram.map(|r| (r.weights.shape(), r.dynamics.len())));
            Ok(())
        })
        .expect("execute");
        assert_eq!(phases, vec![None, Some(((8, 8), 11))]);
    }

    #[test]
    fn sink_errors_abort_the_run() {
        let err = execute(&quick_config(), &mut |_: &Checkpoint<'_>| -> Result<()> {
            Err(anyhow!("disk full"))
        })
            .expect_err("sink failure propagates");
        assert!(format!("{err}").contains("disk full"));
    }

    #[test]
    fn invalid_config_fails_before_any_checkpoint() {
        let mut calls = 0;
        let config = RunConfig {
            arms: 3,
            ..quick_config()
        };
        let err = execute(&config, &mut |_: &Checkpoint<'_>| -> Result<()> {
            calls += 1;
            Ok(())
        })
        .expect_err("config error");
        assert_eq!(calls, 0);
        assert!(err.downcast_ref::<HarnessError>().is_some());
    }
}
