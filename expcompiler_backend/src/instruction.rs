//! Provides definitions and implementations for instruction-related functionalities.
//!
//! ## Main Structures and Enumerations:
//!
//! - `InstrType`: An enumeration that defines the types of instructions supported: `CONST` for constant
//!   values, `SINE` for sinusoidal waves, `LINRAMP` for linear ramps and `EXPRAMP` for geometric ramps.
//!
//! - `Instruction`: Represents a general instruction composed of a type (`InstrType`) and a set of
//!   arguments (`InstrArgs`). It offers methods for creating specific instruction types conveniently
//!   and for evaluating them.
//!
//! - `InstrBook`: Manages an instruction along with its associated metadata during the experiment
//!   editing phase, capturing details like the defined interval and whether to retain a value after
//!   the defined interval.
//!
//! ## Features:
//!
//! - Easy creation of instruction objects with utility methods such as `new_const` and `new_sine`.
//! - Ability to evaluate instructions and in-place populate given time array views with the
//!   resulting float-point values.
//! - Every instruction is a function of absolute experiment time, so two identical instructions on
//!   adjacent intervals describe one continuous waveform and can be merged by the compiler.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;

use maplit::hashmap;

use crate::error::{CompileError, CompileResult};

/// Type alias for instruction arguments: a dictionary with key-value pairs of
/// string (argument name) and float (value)
pub type InstrArgs = HashMap<String, f64>;

/// Enum type for different instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrType {
    CONST,
    SINE,
    LINRAMP,
    EXPRAMP,
}
impl fmt::Display for InstrType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                InstrType::CONST => "CONST",
                InstrType::SINE => "SINE",
                InstrType::LINRAMP => "LINRAMP",
                InstrType::EXPRAMP => "EXPRAMP",
            }
        )
    }
}

const RAMP_KEYS: [&str; 4] = ["start_val", "end_val", "start_time", "end_time"];

/// Struct for a general instruction, consisting of type and arguments.
///
/// Different instruction types expect different fields in their argument dictionary.
/// Minimally expected keys are checked in [`Instruction::new`], default values are applied in
/// [`Instruction::eval_inplace`].
///
/// ## Implemented instruction types and their expected fields:
/// 1. `InstrType::CONST`:
///    - `value`
/// 2. `InstrType::SINE`:
///    - `freq`
///    - `amplitude`: Default is `1.0`
///    - `offset`: Default is `0.0`
///    - `phase`: Default is `0.0`
/// 3. `InstrType::LINRAMP` and `InstrType::EXPRAMP`:
///    - `start_val`, `end_val`, `start_time`, `end_time`
///
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub instr_type: InstrType,
    pub args: InstrArgs,
}
impl Instruction {
    /// Constructs an `Instruction` object.
    ///
    /// This method serves as the foundational constructor upon which the convenience constructors
    /// are built. For each instruction type, it ensures that the `args` dictionary contains the
    /// required keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use expcompiler_backend::instruction::*;
    ///
    /// let mut const_args = InstrArgs::new();
    /// const_args.insert("value".to_string(), 1.0);
    /// let const_instr = Instruction::new(InstrType::CONST, const_args).unwrap();
    /// assert_eq!(const_instr.const_value(), Some(1.0));
    ///
    /// // Missing keys are reported as errors
    /// assert!(Instruction::new(InstrType::SINE, InstrArgs::new()).is_err());
    /// ```
    pub fn new(instr_type: InstrType, args: InstrArgs) -> CompileResult<Self> {
        let required: &[&'static str] = match instr_type {
            InstrType::CONST => &["value"],
            InstrType::SINE => &["freq"],
            InstrType::LINRAMP | InstrType::EXPRAMP => &RAMP_KEYS,
        };
        if let Some(key) = required.iter().find(|key| !args.contains_key(**key)) {
            return Err(CompileError::MissingArg {
                instr_type: instr_type.to_string(),
                key: *key,
            });
        }
        if matches!(instr_type, InstrType::LINRAMP | InstrType::EXPRAMP)
            && args["end_time"] <= args["start_time"]
        {
            return Err(CompileError::InvalidArg {
                instr_type: instr_type.to_string(),
                reason: format!(
                    "end_time {} must be greater than start_time {}",
                    args["end_time"], args["start_time"]
                ),
            });
        }
        if instr_type == InstrType::EXPRAMP && args["start_val"] * args["end_val"] <= 0.0 {
            return Err(CompileError::InvalidArg {
                instr_type: instr_type.to_string(),
                reason: format!(
                    "start_val {} and end_val {} must be non-zero with the same sign",
                    args["start_val"], args["end_val"]
                ),
            });
        }
        Ok(Instruction { instr_type, args })
    }

    fn arg_or(&self, key: &str, default: f64) -> f64 {
        self.args.get(key).copied().unwrap_or(default)
    }

    /// Evaluates the instruction and populates the given array view with float-point values.
    ///
    /// The array is expected to hold absolute times in seconds; every element is replaced by the
    /// signal value at that time.
    ///
    /// ```
    /// use expcompiler_backend::instruction::*;
    ///
    /// let mut t_values = ndarray::Array1::linspace(0.0, 1.0, 11);
    /// let ramp = Instruction::new_linramp(0.0, 10.0, 0.0, 1.0).unwrap();
    /// ramp.eval_inplace(&mut t_values.view_mut());
    /// assert!((t_values[5] - 5.0).abs() < 1e-12);
    /// ```
    pub fn eval_inplace(&self, t_arr: &mut ndarray::ArrayViewMut1<f64>) {
        match self.instr_type {
            InstrType::CONST => {
                let value = self.arg_or("value", 0.0);
                t_arr.fill(value);
            }
            InstrType::SINE => {
                let freq = self.arg_or("freq", 0.0);
                let amplitude = self.arg_or("amplitude", 1.0);
                let offset = self.arg_or("offset", 0.0);
                let phase = self.arg_or("phase", 0.0);

                t_arr.map_inplace(|t| {
                    *t = (2.0 * PI * freq * (*t) + phase).sin() * amplitude + offset
                });
            }
            InstrType::LINRAMP => {
                let (v0, v1) = (self.arg_or("start_val", 0.0), self.arg_or("end_val", 0.0));
                let (t0, t1) = (self.arg_or("start_time", 0.0), self.arg_or("end_time", 1.0));
                let slope = (v1 - v0) / (t1 - t0);
                t_arr.map_inplace(|t| *t = v0 + slope * (*t - t0));
            }
            InstrType::EXPRAMP => {
                let (v0, v1) = (self.arg_or("start_val", 1.0), self.arg_or("end_val", 1.0));
                let (t0, t1) = (self.arg_or("start_time", 0.0), self.arg_or("end_time", 1.0));
                let ratio = v1 / v0;
                t_arr.map_inplace(|t| *t = v0 * ratio.powf((*t - t0) / (t1 - t0)));
            }
        }
    }

    /// Evaluates the instruction at a single time point.
    pub fn eval_point(&self, t: f64) -> f64 {
        let mut t_arr = ndarray::array![t];
        self.eval_inplace(&mut t_arr.view_mut());
        t_arr[0]
    }

    /// Returns the value of a `CONST` instruction, `None` for every other type.
    pub fn const_value(&self) -> Option<f64> {
        match self.instr_type {
            InstrType::CONST => self.args.get("value").copied(),
            _ => None,
        }
    }

    /// Wrapper for conveniently creating new constant instructions.
    /// ```
    /// # use expcompiler_backend::instruction::*;
    /// let const_instr = Instruction::new_const(1.0);
    /// assert_eq!(const_instr.eval_point(3.0), 1.0);
    /// ```
    pub fn new_const(value: f64) -> Instruction {
        Instruction {
            instr_type: InstrType::CONST,
            args: hashmap! {String::from("value") => value},
        }
    }

    /// Constructs a new sine instruction with provided parameters.
    ///
    /// Unspecified optional parameters are not inserted into the argument dictionary, so the
    /// defaults of [`Instruction::eval_inplace`] apply.
    ///
    /// # Arguments
    ///
    /// - `freq`: The frequency of the sine wave.
    /// - `amplitude`: Optional amplitude of the sine wave.
    /// - `phase`: Optional phase offset of the sine wave in radians.
    /// - `dc_offset`: Optional DC offset for the sine wave.
    pub fn new_sine(
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    ) -> Instruction {
        let mut instr_args: InstrArgs = hashmap! {"freq".to_string() => freq};
        // For each optional argument, if specified, insert into dictionary
        [
            ("amplitude", amplitude),
            ("phase", phase),
            ("offset", dc_offset),
        ]
        .iter()
        .for_each(|(key, opt_value)| {
            if let Some(value) = *opt_value {
                instr_args.insert(key.to_string(), value);
            }
        });
        Instruction {
            instr_type: InstrType::SINE,
            args: instr_args,
        }
    }

    fn ramp_args(start_val: f64, end_val: f64, start_time: f64, end_time: f64) -> InstrArgs {
        RAMP_KEYS
            .iter()
            .zip([start_val, end_val, start_time, end_time])
            .map(|(key, value)| (key.to_string(), value))
            .collect()
    }

    /// Linear ramp from `start_val` at `start_time` to `end_val` at `end_time` (absolute seconds).
    pub fn new_linramp(
        start_val: f64,
        end_val: f64,
        start_time: f64,
        end_time: f64,
    ) -> CompileResult<Instruction> {
        Instruction::new(
            InstrType::LINRAMP,
            Self::ramp_args(start_val, end_val, start_time, end_time),
        )
    }

    /// Geometric ramp: constant ratio per unit time between `start_val` and `end_val`.
    /// Both endpoints must be non-zero with the same sign.
    pub fn new_expramp(
        start_val: f64,
        end_val: f64,
        start_time: f64,
        end_time: f64,
    ) -> CompileResult<Instruction> {
        Instruction::new(
            InstrType::EXPRAMP,
            Self::ramp_args(start_val, end_val, start_time, end_time),
        )
    }
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut args: Vec<_> = self.args.iter().collect();
        args.sort_by(|a, b| a.0.cmp(b.0));
        let args_string = args
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<String>>()
            .join(", ");
        write!(f, "[{}, {{{}}}]", self.instr_type, args_string)
    }
}

/// Manages an instruction along with its associated metadata during experiment editing.
///
/// - `start_pos` is inclusive.
/// - `end_spec` is `Some((end_pos, keep_val))` for instructions with a defined duration, where
///   `end_pos` is exclusive and `keep_val` decides whether the value at `end_pos` is held until
///   the next instruction. `None` marks a "go" instruction which lasts until the next instruction
///   on the channel (or the end of the sequence).
///
/// `InstrBook` is ordered by `start_pos`, so a `BTreeSet<InstrBook>` keeps a channel's
/// instructions sorted.
#[derive(Clone, Debug)]
pub struct InstrBook {
    pub start_pos: usize,
    pub end_spec: Option<(usize, bool)>,
    pub instr: Instruction,
}
impl InstrBook {
    /// Constructs a new `InstrBook` object, checking that `end_pos` is strictly greater than
    /// `start_pos`.
    ///
    /// ```
    /// # use expcompiler_backend::instruction::*;
    /// let book = InstrBook::new(0, Some((5, true)), Instruction::new_const(1.0));
    /// assert!(book.is_ok());
    /// let book = InstrBook::new(5, Some((5, true)), Instruction::new_const(1.0));
    /// assert!(book.is_err());
    /// ```
    pub fn new(
        start_pos: usize,
        end_spec: Option<(usize, bool)>,
        instr: Instruction,
    ) -> CompileResult<Self> {
        if let Some((end_pos, _keep_val)) = end_spec {
            if end_pos <= start_pos {
                return Err(CompileError::EmptyInterval {
                    instr: instr.to_string(),
                    start_pos,
                    end_pos,
                });
            }
        }
        Ok(InstrBook {
            start_pos,
            end_spec,
            instr,
        })
    }

    pub fn end_pos(&self) -> Option<usize> {
        self.end_spec.map(|(end_pos, _keep_val)| end_pos)
    }
}
// Support total ordering for InstrBook
impl Ord for InstrBook {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start_pos.cmp(&other.start_pos)
    }
}
impl PartialOrd for InstrBook {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for InstrBook {
    fn eq(&self, other: &Self) -> bool {
        self.start_pos == other.start_pos
    }
}
impl Eq for InstrBook {}
impl fmt::Display for InstrBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end_spec = match self.end_spec {
            Some((end_pos, keep_val)) => format!("{}, keep_val={}", end_pos, keep_val),
            None => "go".to_string(),
        };
        write!(f, "InstrBook({}, {}-{})", self.instr, self.start_pos, end_spec)
    }
}
