//! Digital waveform compiler.
//!
//! A digital output card plays back a table of transitions: at sample position `pos` all lines of
//! a port take the state vector stored for that position, and keep it until the next transition.
//! This module builds such tables from a loose collection of timed line-state assignments.
//!
//! ## Compilation
//!
//! [`DigitalSequence::compile`] runs a single pass over the assignments:
//!
//! 1. assignments are stably sorted by position, so several assignments at the same position are
//!    applied in the order they were made and the last one wins;
//! 2. [`LineState::Hold`] ("grey", unspecified) entries are resolved to whatever the line was
//!    doing before;
//! 3. a transition is emitted only if the resolved state vector differs from the previously
//!    emitted one, so adjacent identical states are merged.
//!
//! The resulting [`TransitionTable`] always starts with a transition at position `0`, has
//! strictly increasing positions below `stop_pos`, and no two consecutive transitions carry the
//! same state vector.
//!
//! ```
//! use expcompiler_backend::digital::*;
//!
//! let mut seq = DigitalSequence::new(2);
//! seq.set(10, 0, LineState::High).unwrap();
//! seq.set(10, 1, LineState::High).unwrap();
//! seq.set(20, 1, LineState::Low).unwrap();
//! seq.set(30, 0, LineState::High).unwrap(); // no change: merged away
//! let table = seq.compile(40).unwrap();
//!
//! assert_eq!(table.positions(), vec![0, 10, 20]);
//! assert_eq!(table.words(), vec![0b00, 0b11, 0b01]);
//! ```

use std::fmt;

use crate::error::{CompileError, CompileResult};

/// Number of lines a single port word can represent.
pub const MAX_PORT_LINES: usize = 32;

/// Requested state of one digital line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineState {
    Low,
    High,
    /// Keep whatever the line is currently doing.
    Hold,
}
impl LineState {
    /// `Low` for values below one half, `High` otherwise.
    pub fn from_value(value: f64) -> Self {
        if value >= 0.5 {
            LineState::High
        } else {
            LineState::Low
        }
    }

    fn resolve(self, current: bool) -> bool {
        match self {
            LineState::Low => false,
            LineState::High => true,
            LineState::Hold => current,
        }
    }
}
impl From<bool> for LineState {
    fn from(state: bool) -> Self {
        if state {
            LineState::High
        } else {
            LineState::Low
        }
    }
}

/// A timed channel-state assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub pos: usize,
    pub line: usize,
    pub state: LineState,
}

/// Builder collecting assignments for a group of lines sharing one sample clock.
#[derive(Clone, Debug)]
pub struct DigitalSequence {
    nlines: usize,
    initial: Vec<bool>,
    assignments: Vec<Assignment>,
}
impl DigitalSequence {
    /// New sequence over `nlines` lines, all initially low.
    pub fn new(nlines: usize) -> Self {
        Self {
            nlines,
            initial: vec![false; nlines],
            assignments: Vec::new(),
        }
    }

    /// Replaces the initial (pre-sequence) state of all lines.
    pub fn with_initial(mut self, initial: &[bool]) -> CompileResult<Self> {
        if initial.len() != self.nlines {
            return Err(CompileError::StateLength {
                expected: self.nlines,
                actual: initial.len(),
            });
        }
        self.initial = initial.to_vec();
        Ok(self)
    }

    pub fn nlines(&self) -> usize {
        self.nlines
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Records that `line` takes `state` from sample position `pos` on.
    pub fn set(&mut self, pos: usize, line: usize, state: LineState) -> CompileResult<()> {
        if line >= self.nlines {
            return Err(CompileError::LineOutOfRange {
                line,
                nlines: self.nlines,
            });
        }
        self.assignments.push(Assignment { pos, line, state });
        Ok(())
    }

    /// Records a full state vector at `pos`. `Hold` entries leave their line untouched.
    pub fn push_states(&mut self, pos: usize, states: &[LineState]) -> CompileResult<()> {
        if states.len() != self.nlines {
            return Err(CompileError::StateLength {
                expected: self.nlines,
                actual: states.len(),
            });
        }
        self.assignments.extend(
            states
                .iter()
                .enumerate()
                .filter(|(_line, state)| **state != LineState::Hold)
                .map(|(line, &state)| Assignment { pos, line, state }),
        );
        Ok(())
    }

    /// Resolves all assignments into a deduplicated, time-ordered transition table.
    pub fn compile(&self, stop_pos: usize) -> CompileResult<TransitionTable> {
        if stop_pos == 0 {
            return Err(CompileError::InvalidInterval {
                name: "digital sequence".to_string(),
                start_pos: 0,
                end_pos: stop_pos,
            });
        }
        if let Some(late) = self.assignments.iter().find(|a| a.pos >= stop_pos) {
            return Err(CompileError::AssignmentAfterStop {
                pos: late.pos,
                stop_pos,
            });
        }
        // `sort_by_key` is stable: same-position assignments keep insertion order
        let mut sorted = self.assignments.clone();
        sorted.sort_by_key(|a| a.pos);

        let mut current = self.initial.clone();
        let mut transitions: Vec<Transition> = Vec::new();
        let mut rest = sorted.as_slice();
        let mut pos = 0;
        loop {
            let group_len = rest.partition_point(|a| a.pos == pos);
            for a in &rest[..group_len] {
                current[a.line] = a.state.resolve(current[a.line]);
            }
            rest = &rest[group_len..];

            let changed = transitions
                .last()
                .map_or(true, |last| last.states != current);
            if changed {
                transitions.push(Transition {
                    pos,
                    states: current.clone(),
                });
            }
            match rest.first() {
                Some(next) => pos = next.pos,
                None => break,
            }
        }

        Ok(TransitionTable {
            nlines: self.nlines,
            stop_pos,
            transitions,
        })
    }
}

/// State of all lines from `pos` until the next transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub pos: usize,
    pub states: Vec<bool>,
}
impl Transition {
    /// Packs the state vector into a port word, bit `i` holding line `i`.
    pub fn word(&self) -> u32 {
        port_word(&self.states)
    }
}

/// Packs a state vector into a port word, bit `i` holding line `i`.
/// Lines beyond [`MAX_PORT_LINES`] are ignored.
pub fn port_word(states: &[bool]) -> u32 {
    states
        .iter()
        .take(MAX_PORT_LINES)
        .enumerate()
        .filter(|(_line, state)| **state)
        .fold(0u32, |word, (line, _state)| word | (1 << line))
}

/// Compiled digital waveform: a sorted list of transitions ending at `stop_pos` (exclusive).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionTable {
    nlines: usize,
    stop_pos: usize,
    transitions: Vec<Transition>,
}
impl TransitionTable {
    pub fn nlines(&self) -> usize {
        self.nlines
    }

    pub fn stop_pos(&self) -> usize {
        self.stop_pos
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn positions(&self) -> Vec<usize> {
        self.transitions.iter().map(|tr| tr.pos).collect()
    }

    pub fn words(&self) -> Vec<u32> {
        self.transitions.iter().map(Transition::word).collect()
    }

    /// Index of the transition in effect at `pos`.
    fn index_at(&self, pos: usize) -> usize {
        // Transitions are sorted and the first one sits at 0, so this never underflows
        self.transitions.partition_point(|tr| tr.pos <= pos) - 1
    }

    /// State vector in effect at sample position `pos`.
    pub fn states_at(&self, pos: usize) -> &[bool] {
        &self.transitions[self.index_at(pos)].states
    }

    /// Iterates over `(start_pos, end_pos, states)` segments covering `0..stop_pos`.
    pub fn segments(&self) -> impl Iterator<Item = (usize, usize, &[bool])> + '_ {
        self.transitions.iter().enumerate().map(move |(i, tr)| {
            let end = self
                .transitions
                .get(i + 1)
                .map_or(self.stop_pos, |next| next.pos);
            (tr.pos, end, tr.states.as_slice())
        })
    }

    /// Samples port words for positions `start_pos..end_pos` into `nsamps` evenly spaced samples.
    pub fn fill_words(
        &self,
        start_pos: usize,
        end_pos: usize,
        nsamps: usize,
    ) -> CompileResult<Vec<u32>> {
        if end_pos <= start_pos {
            return Err(CompileError::InvalidInterval {
                name: "transition table".to_string(),
                start_pos,
                end_pos,
            });
        }
        if end_pos > self.stop_pos {
            return Err(CompileError::OutOfRange {
                name: "transition table".to_string(),
                end_pos,
                stop_pos: self.stop_pos,
            });
        }
        let span = (end_pos - start_pos) as f64;
        Ok((0..nsamps)
            .map(|i| {
                let pos = start_pos + (i as f64 * span / nsamps as f64) as usize;
                port_word(self.states_at(pos))
            })
            .collect())
    }
}
impl fmt::Display for TransitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (start, end, states) in self.segments() {
            let bits: String = states
                .iter()
                .rev()
                .map(|&state| if state { '1' } else { '0' })
                .collect();
            writeln!(f, "{:>10} .. {:<10} {}", start, end, bits)?;
        }
        Ok(())
    }
}
