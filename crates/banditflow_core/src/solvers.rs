use crate::traits::{Stepper, VectorField};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coefficients of an explicit Runge-Kutta method.
///
/// `a[i]` holds the `i` coefficients of stage `i` (the matrix is strictly
/// lower triangular), `b` the weights of the update and `c` the nodes.
#[derive(Debug, Clone)]
pub struct ButcherTableau {
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    pub c: Vec<f64>,
}

impl ButcherTableau {
    pub fn euler() -> Self {
        Self {
            a: vec![vec![]],
            b: vec![1.0],
            c: vec![0.0],
        }
    }

    /// Classic Runge-Kutta 4th order.
    pub fn rk4() -> Self {
        Self {
            a: vec![vec![], vec![0.5], vec![0.0, 0.5], vec![0.0, 0.0, 1.0]],
            b: vec![1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
            c: vec![0.0, 0.5, 0.5, 1.0],
        }
    }

    /// Tsitouras 5/4, propagating the 5th order solution.
    pub fn tsit5() -> Self {
        Self {
            a: vec![
                vec![],
                vec![0.161],
                vec![-0.008480655492356989, 0.335480655492357],
                vec![2.897153057105493, -6.359448489975075, 4.3622954328695815],
                vec![
                    5.325864828439259,
                    -11.748883564062828,
                    7.4955393428898365,
                    -0.09249506636175525,
                ],
                vec![
                    5.86145544294642,
                    -12.92096931784711,
                    8.159367898576159,
                    -0.071584973281401,
                    -0.028269050394068383,
                ],
            ],
            b: vec![
                0.09646076681806523,
                0.01,
                0.4798896504144996,
                1.379008574103742,
                -3.290069515436081,
                2.324710524099774,
            ],
            c: vec![0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0],
        }
    }

    pub fn stages(&self) -> usize {
        self.b.len()
    }
}

/// Explicit Runge-Kutta stepper driven by a Butcher tableau.
pub struct ExplicitRk {
    tableau: ButcherTableau,
    k: Vec<Vec<f64>>,
    tmp: Vec<f64>,
}

impl ExplicitRk {
    pub fn new(tableau: ButcherTableau, dim: usize) -> Self {
        let stages = tableau.stages();
        Self {
            tableau,
            k: vec![vec![0.0; dim]; stages],
            tmp: vec![0.0; dim],
        }
    }
}

impl Stepper for ExplicitRk {
    fn step(&mut self, field: &impl VectorField, t: &mut f64, state: &mut [f64], dt: f64) {
        let t0 = *t;
        let ButcherTableau { a, b, c } = &self.tableau;

        // k_i = f(t + c_i dt, y + dt * sum_j a_ij k_j)
        for stage in 0..b.len() {
            for i in 0..state.len() {
                let acc: f64 = a[stage].iter().zip(&self.k).map(|(a, k)| a * k[i]).sum();
                self.tmp[i] = state[i] + dt * acc;
            }
            field.eval(t0 + c[stage] * dt, &self.tmp, &mut self.k[stage]);
        }

        // y_next = y + dt * sum_i b_i k_i
        for (i, y) in state.iter_mut().enumerate() {
            let acc: f64 = b.iter().zip(&self.k).map(|(b, k)| b * k[i]).sum();
            *y += dt * acc;
        }

        *t = t0 + dt;
    }
}

/// Integration scheme used to propose a gradient-flow step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Forward Euler on the cached gradient; one gradient evaluation per proposal.
    #[default]
    Euler,
    Rk4,
    Tsit5,
}

impl Scheme {
    pub fn tableau(self) -> ButcherTableau {
        match self {
            Scheme::Euler => ButcherTableau::euler(),
            Scheme::Rk4 => ButcherTableau::rk4(),
            Scheme::Tsit5 => ButcherTableau::tsit5(),
        }
    }
}

impl FromStr for Scheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "euler" => Ok(Scheme::Euler),
            "rk4" => Ok(Scheme::Rk4),
            "tsit5" => Ok(Scheme::Tsit5),
            other => Err(format!(
                "unknown scheme '{other}' (expected euler, rk4 or tsit5)"
            )),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scheme::Euler => "euler",
            Scheme::Rk4 => "rk4",
            Scheme::Tsit5 => "tsit5",
        };
        f.write_str(name)
    }
}
