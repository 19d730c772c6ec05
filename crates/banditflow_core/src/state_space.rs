//! Enumeration of the memory-bounded bandit.
//!
//! An agent observes only the sign of its last reward and a binary memory
//! register. Each action pulls an arm and writes to the register: in
//! [`MemoryMode::Shift`] one bit is pushed in at the end, in
//! [`MemoryMode::Ram`] the whole register is overwritten. Both modes share
//! the same states and arms, which is what lets a shift policy seed a ram
//! policy.

use crate::error::HarnessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Arms are labelled by single letters.
pub const MAX_ARMS: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    Shift,
    Ram,
}

impl FromStr for MemoryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shift" => Ok(MemoryMode::Shift),
            "ram" => Ok(MemoryMode::Ram),
            other => Err(format!(
                "unknown memory type '{other}' (expected shift or ram)"
            )),
        }
    }
}

impl fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryMode::Shift => f.write_str("shift"),
            MemoryMode::Ram => f.write_str("ram"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Arm(pub usize);

/// Observation available to the policy: last reward sign plus memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct State {
    pub rewarded: bool,
    pub memory: Vec<bool>,
}

/// An arm pull together with the memory write that accompanies it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Action {
    pub arm: Arm,
    pub write: Vec<bool>,
}

fn write_bits(f: &mut fmt::Formatter<'_>, bits: &[bool]) -> fmt::Result {
    for bit in bits {
        f.write_str(if *bit { "1" } else { "0" })?;
    }
    Ok(())
}

fn parse_bits(s: &str) -> Result<Vec<bool>, String> {
    s.chars()
        .map(|c| match c {
            '0' => Ok(false),
            '1' => Ok(true),
            other => Err(format!("invalid memory cell '{other}'")),
        })
        .collect()
}

fn parse_arm(c: char) -> Result<Arm, String> {
    if c.is_ascii_uppercase() {
        Ok(Arm((c as u8 - b'A') as usize))
    } else {
        Err(format!("invalid arm label '{c}'"))
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", (b'A' + self.0 as u8) as char)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.rewarded { "+" } else { "-" })?;
        write_bits(f, &self.memory)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.arm)?;
        write_bits(f, &self.write)
    }
}

impl From<Arm> for String {
    fn from(value: Arm) -> Self {
        value.to_string()
    }
}

impl From<State> for String {
    fn from(value: State) -> Self {
        value.to_string()
    }
}

impl From<Action> for String {
    fn from(value: Action) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Arm {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => parse_arm(c),
            _ => Err(format!("invalid arm label '{value}'")),
        }
    }
}

impl TryFrom<String> for State {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let rewarded = match value.chars().next() {
            Some('+') => true,
            Some('-') => false,
            _ => return Err(format!("invalid state label '{value}'")),
        };
        Ok(State {
            rewarded,
            memory: parse_bits(&value[1..])?,
        })
    }
}

impl TryFrom<String> for Action {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let arm = match value.chars().next() {
            Some(c) => parse_arm(c)?,
            None => return Err("empty action label".to_string()),
        };
        Ok(Action {
            arm,
            write: parse_bits(&value[1..])?,
        })
    }
}

/// All registers of `len` cells in binary counting order.
fn registers(len: usize) -> Vec<Vec<bool>> {
    (0..1usize << len)
        .map(|code| (0..len).map(|i| code >> (len - 1 - i) & 1 == 1).collect())
        .collect()
}

/// Ordered enumeration of one bandit configuration.
#[derive(Debug, Clone, Serialize)]
pub struct StateSpace {
    pub n_arms: usize,
    pub mem: usize,
    pub mode: MemoryMode,
    pub states: Vec<State>,
    pub actions: Vec<Action>,
    pub arms: Vec<Arm>,
    /// 1 for rewarded states, 0 otherwise; indexed like `states`.
    pub rewards: Vec<f64>,
}

impl StateSpace {
    pub fn build(n_arms: usize, mem: usize, mode: MemoryMode) -> Result<Self, HarnessError> {
        if n_arms == 0 || n_arms > MAX_ARMS {
            return Err(HarnessError::Config(format!(
                "arm count must be in 1..={MAX_ARMS}, got {n_arms}"
            )));
        }
        if mem == 0 {
            return Err(HarnessError::Config(
                "memory must hold at least one cell".to_string(),
            ));
        }

        let arms: Vec<Arm> = (0..n_arms).map(Arm).collect();

        let mut states = Vec::with_capacity(2 << mem);
        for rewarded in [false, true] {
            for memory in registers(mem) {
                states.push(State { rewarded, memory });
            }
        }

        let write_len = match mode {
            MemoryMode::Shift => 1,
            MemoryMode::Ram => mem,
        };
        let mut actions = Vec::new();
        for arm in &arms {
            for write in registers(write_len) {
                actions.push(Action { arm: *arm, write });
            }
        }

        let rewards = states
            .iter()
            .map(|s| if s.rewarded { 1.0 } else { 0.0 })
            .collect();

        Ok(Self {
            n_arms,
            mem,
            mode,
            states,
            actions,
            arms,
            rewards,
        })
    }

    pub fn state_index(&self, state: &State) -> Option<usize> {
        self.states.binary_search(state).ok()
    }

    pub fn action_index(&self, action: &Action) -> Option<usize> {
        self.actions.binary_search(action).ok()
    }

    /// Whether `dest` carries the register `action` writes from `source`.
    pub fn writes_to(&self, source: &State, action: &Action, dest: &State) -> bool {
        match self.mode {
            MemoryMode::Shift => {
                let keep = source.memory.len() - 1;
                dest.memory.len() == source.memory.len()
                    && dest.memory[..keep] == source.memory[1..]
                    && dest.memory[keep..] == action.write[..]
            }
            MemoryMode::Ram => dest.memory == action.write,
        }
    }

    /// One-step transition probability under arm success rates `f`.
    ///
    /// Zero whenever `dest` does not carry the register written by
    /// `action`; otherwise the Bernoulli law of the pulled arm decides the
    /// reward sign of `dest`.
    pub fn prob(&self, f: &[f64], source: &State, action: &Action, dest: &State) -> f64 {
        if !self.writes_to(source, action, dest) {
            return 0.0;
        }
        let success = f[action.arm.0];
        if dest.rewarded {
            success
        } else {
            1.0 - success
        }
    }
}

/// Ram-mode action equivalent to a shift-mode action taken in `state`.
pub fn embed_shift_action(state: &State, action: &Action) -> Action {
    let mut write = state.memory[1..].to_vec();
    write.extend_from_slice(&action.write);
    Action {
        arm: action.arm,
        write,
    }
}

/// Precondition of the bootstrap: both builders must agree on states and arms.
pub fn ensure_compatible(base: &StateSpace, expanded: &StateSpace) -> Result<(), HarnessError> {
    if base.states != expanded.states {
        return Err(HarnessError::Consistency(format!(
            "{} and {} builders enumerate different states",
            base.mode, expanded.mode
        )));
    }
    if base.arms != expanded.arms {
        return Err(HarnessError::Consistency(format!(
            "{} and {} builders enumerate different arms",
            base.mode, expanded.mode
        )));
    }
    Ok(())
}
