//! Implements struct and methods corresponding to a single output channel. See [`BaseChannel`]
//! for implementation details.
//!
//! ## Editable and streamable channels
//!
//! Library users add instructions to *editable* channels: analog outputs (`ao0`, ...) and
//! individual digital lines (`port0/line3`, ...). *Streamable* channels are the ones whose
//! samples are written to the hardware: analog outputs, and whole digital ports (`port0`).
//! Digital port channels are never edited directly; the device builds them during compilation
//! from its line channels, see [`crate::device`] and [`crate::digital`].
//!
//! ## Editing v.s. compiled state
//!
//! A channel keeps two caches:
//! - `instr_list`: the sorted, non-overlapping [`InstrBook`]s added by the user;
//! - `(instr_end, instr_val)`: the compiled, gap-free instruction table. Instruction `i` covers
//!   sample positions `instr_end[i-1]..instr_end[i]` (the first one starts at 0).

use ndarray::{s, Array1};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{CompileError, CompileResult};
use crate::instruction::*;

/// Output type of a channel (and of the device owning it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskType {
    AO,
    DO,
}
impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TaskType::AO => "AO",
                TaskType::DO => "DO",
            }
        )
    }
}

pub trait BaseChannel {
    // Field methods
    fn samp_rate(&self) -> f64;
    fn task_type(&self) -> TaskType;
    fn name(&self) -> &str;
    fn default_value(&self) -> f64;
    fn editable(&self) -> bool;
    fn is_fresh_compiled(&self) -> bool;
    fn instr_list(&self) -> &BTreeSet<InstrBook>;
    fn instr_end(&self) -> &Vec<usize>;
    fn instr_val(&self) -> &Vec<Instruction>;
    // Mutable field references
    fn fresh_compiled_(&mut self) -> &mut bool;
    fn instr_list_(&mut self) -> &mut BTreeSet<InstrBook>;
    fn instr_end_(&mut self) -> &mut Vec<usize>;
    fn instr_val_(&mut self) -> &mut Vec<Instruction>;

    /// Analog channels are both edited and streamed; digital lines are edited while the port
    /// channels built from them are streamed.
    fn streamable(&self) -> bool {
        self.task_type() == TaskType::AO || !self.editable()
    }

    /// Value the channel returns to on an all-channel reset.
    fn reset_value(&self) -> f64 {
        self.default_value()
    }

    // instr_list tracks edits, while (instr_end, instr_val) tracks compilation results
    fn is_compiled(&self) -> bool {
        !self.instr_end().is_empty()
    }
    fn is_edited(&self) -> bool {
        !self.instr_list().is_empty()
    }

    /// Converts a time in seconds to the nearest clock tick.
    fn time_to_pos(&self, t: f64) -> CompileResult<usize> {
        if !t.is_finite() || t < 0.0 {
            return Err(CompileError::InvalidTime(t));
        }
        Ok((t * self.samp_rate()).round() as usize)
    }

    /// End of the last instruction. A "go" instruction has no end, but needs at least its
    /// first sample to be generated, so it counts as `start_pos + 1`.
    fn last_instr_end_pos(&self) -> usize {
        self.instr_list()
            .last()
            .map_or(0, |book| book.end_pos().unwrap_or(book.start_pos + 1))
    }

    fn last_instr_end_time(&self) -> f64 {
        self.last_instr_end_pos() as f64 / self.samp_rate()
    }

    fn total_samps(&self) -> usize {
        self.instr_end().last().copied().unwrap_or(0)
    }

    fn compiled_stop_time(&self) -> f64 {
        self.total_samps() as f64 / self.samp_rate()
    }

    /// Pads and merges the contents of `instr_list` and stores the result in
    /// `(instr_end, instr_val)`.
    ///
    /// - Before the first instruction the channel sits at its default value.
    /// - After a finite instruction it holds the instruction's end value if `keep_val` is set,
    ///   otherwise it returns to the default value.
    /// - A "go" instruction lasts until the next instruction or `stop_pos`.
    /// - Adjacent identical instructions are merged.
    fn compile(&mut self, stop_pos: usize) -> CompileResult<()> {
        if self.instr_list().is_empty() {
            return Ok(());
        }
        // Ignore double compiles
        if self.is_fresh_compiled() && self.instr_end().last() == Some(&stop_pos) {
            return Ok(());
        }
        if self.last_instr_end_pos() > stop_pos {
            return Err(CompileError::StopBeforeEnd {
                name: self.name().to_string(),
                stop_pos,
                last_end: self.last_instr_end_pos(),
            });
        }
        self.clear_compile_cache();

        let samp_rate = self.samp_rate();
        let default_value = self.default_value();
        let mut last_val = default_value;
        let mut last_end = 0;
        let mut instr_val: Vec<Instruction> = Vec::new();
        let mut instr_end: Vec<usize> = Vec::new();

        let next_starts: Vec<usize> = self
            .instr_list()
            .iter()
            .skip(1)
            .map(|book| book.start_pos)
            .chain(std::iter::once(stop_pos))
            .collect();

        // Padding, instructions are already sorted
        for (book, next_start) in self.instr_list().iter().zip(next_starts) {
            if last_end != book.start_pos {
                instr_val.push(Instruction::new_const(last_val));
                instr_end.push(book.start_pos);
            }
            instr_val.push(book.instr.clone());
            match book.end_spec {
                Some((end_pos, keep_val)) => {
                    instr_end.push(end_pos);
                    last_end = end_pos;
                    last_val = match (keep_val, book.instr.const_value()) {
                        (false, _) => default_value,
                        (true, Some(value)) => value,
                        // Other instructions: evaluate at end_pos
                        (true, None) => book.instr.eval_point(end_pos as f64 / samp_rate),
                    };
                }
                None => {
                    instr_end.push(next_start);
                    last_end = next_start;
                }
            }
        }
        // Pad the last instruction
        if last_end != stop_pos {
            instr_val.push(Instruction::new_const(last_val));
            instr_end.push(stop_pos);
        }

        // Merge instructions, if possible
        for (end, instr) in instr_end.into_iter().zip(instr_val) {
            if self.instr_val().last() == Some(&instr) {
                if let Some(last_end) = self.instr_end_().last_mut() {
                    *last_end = end;
                }
            } else {
                self.instr_val_().push(instr);
                self.instr_end_().push(end);
            }
        }
        *self.fresh_compiled_() = true;
        Ok(())
    }

    /// Index of the first compiled instruction covering sample position `pos`
    fn first_intersect_instr(&self, pos: usize) -> usize {
        self.instr_end().partition_point(|&end| end <= pos)
    }

    fn clear_edit_cache(&mut self) {
        self.instr_list_().clear();
        self.clear_compile_cache();
    }

    fn clear_compile_cache(&mut self) {
        *self.fresh_compiled_() = self.instr_list().is_empty();
        self.instr_end_().clear();
        self.instr_val_().clear();
    }

    /// Inserts an already positioned instruction, checking for overlaps with both neighbours.
    fn add_instr_book(&mut self, new_book: InstrBook) -> CompileResult<()> {
        if self.task_type() == TaskType::DO {
            match new_book.instr.const_value() {
                Some(value) if value == 0.0 || value == 1.0 => {}
                _ => {
                    return Err(CompileError::DigitalValue {
                        chan: self.name().to_string(),
                        value: new_book.instr.to_string(),
                    })
                }
            }
        }
        let new_end = new_book.end_pos().unwrap_or(new_book.start_pos + 1);
        let overlap = |existing: &InstrBook| CompileError::Overlap {
            chan: self.name().to_string(),
            new: new_book.to_string(),
            existing: existing.to_string(),
        };
        if let Some(next) = self.instr_list().range(&new_book..).next() {
            if next.start_pos < new_end {
                return Err(overlap(next));
            }
        }
        if let Some(prev) = self.instr_list().range(..&new_book).next_back() {
            if prev.end_pos().unwrap_or(prev.start_pos + 1) > new_book.start_pos {
                return Err(overlap(prev));
            }
        }
        // Upon adding an instruction, the channel is not freshly compiled anymore
        *self.fresh_compiled_() = false;
        self.instr_list_().insert(new_book);
        Ok(())
    }

    /// Base method through which to add instructions.
    ///
    /// `dur_spec` is `Some((duration, keep_val))` for a finite instruction and `None` for a
    /// "go" instruction.
    fn add_instr(
        &mut self,
        instr: Instruction,
        t: f64,
        dur_spec: Option<(f64, bool)>,
    ) -> CompileResult<()> {
        let start_pos = self.time_to_pos(t)?;
        let end_spec = match dur_spec {
            Some((duration, keep_val)) => {
                if !duration.is_finite() || duration < 0.0 {
                    return Err(CompileError::InvalidTime(duration));
                }
                Some((self.time_to_pos(t + duration)?, keep_val))
            }
            None => None,
        };
        self.add_instr_book(InstrBook::new(start_pos, end_spec, instr)?)
    }

    fn constant(&mut self, value: f64, t: f64, dur_spec: Option<(f64, bool)>) -> CompileResult<()> {
        self.add_instr(Instruction::new_const(value), t, dur_spec)
    }

    /// Adds a "go" instruction to the reset value at `reset_pos`.
    fn add_reset_instr(&mut self, reset_pos: usize) -> CompileResult<()> {
        let reset_instr = Instruction::new_const(self.reset_value());
        self.add_instr_book(InstrBook::new(reset_pos, None, reset_instr)?)
    }

    /// Calculates the signal from `start_pos` to `end_pos` into `nsamps` samples.
    ///
    /// Assumes that the buffer is written with correctly sampled t-values, and replaces them with
    /// signal values.
    fn fill_signal_nsamps(
        &self,
        start_pos: usize,
        end_pos: usize,
        nsamps: usize,
        buffer: &mut ndarray::ArrayViewMut1<f64>,
    ) -> CompileResult<()> {
        if !self.is_compiled() {
            return Err(CompileError::NotCompiled(format!("Channel {}", self.name())));
        }
        if end_pos <= start_pos || buffer.len() != nsamps {
            return Err(CompileError::InvalidInterval {
                name: self.name().to_string(),
                start_pos,
                end_pos,
            });
        }
        if end_pos > self.total_samps() {
            return Err(CompileError::OutOfRange {
                name: self.name().to_string(),
                end_pos,
                stop_pos: self.total_samps(),
            });
        }

        // Converts position (unit of start_pos, end_pos) to buffer offset:
        // start_pos |-> 0, end_pos |-> nsamps
        let cvt_idx = |pos: usize| {
            ((pos - start_pos) as f64 / (end_pos - start_pos) as f64 * (nsamps as f64)) as usize
        };

        let first = self.first_intersect_instr(start_pos);
        let mut cur_pos = start_pos;
        for (&instr_end, instr) in self.instr_end()[first..]
            .iter()
            .zip(&self.instr_val()[first..])
        {
            if cur_pos >= end_pos {
                break;
            }
            let seg_end = std::cmp::min(end_pos, instr_end);
            let mut slice = buffer.slice_mut(s![cvt_idx(cur_pos)..cvt_idx(seg_end)]);
            instr.eval_inplace(&mut slice);
            cur_pos = seg_end;
        }
        Ok(())
    }

    /// Times (in seconds) of `nsamps` samples evenly spaced over `start_pos..end_pos`.
    fn sample_times(&self, start_pos: usize, end_pos: usize, nsamps: usize) -> Array1<f64> {
        let span = end_pos.saturating_sub(start_pos) as f64;
        let samp_rate = self.samp_rate();
        Array1::from_shape_fn(nsamps, |i| {
            (start_pos as f64 + i as f64 * span / nsamps as f64) / samp_rate
        })
    }

    /// Samples the compiled signal between two times.
    fn calc_signal_nsamps(
        &self,
        start_time: f64,
        end_time: f64,
        nsamps: usize,
    ) -> CompileResult<Vec<f64>> {
        let start_pos = self.time_to_pos(start_time)?;
        let end_pos = self.time_to_pos(end_time)?;
        let mut buffer = self.sample_times(start_pos, end_pos, nsamps);
        self.fill_signal_nsamps(start_pos, end_pos, nsamps, &mut buffer.view_mut())?;
        Ok(buffer.to_vec())
    }
}

#[derive(Clone, Debug)]
pub struct Channel {
    samp_rate: f64,
    task_type: TaskType,
    name: String,
    default_value: f64,
    editable: bool,
    fresh_compiled: bool,
    instr_list: BTreeSet<InstrBook>,
    instr_end: Vec<usize>,
    instr_val: Vec<Instruction>,
}

impl BaseChannel for Channel {
    fn samp_rate(&self) -> f64 {
        self.samp_rate
    }
    fn task_type(&self) -> TaskType {
        self.task_type
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn default_value(&self) -> f64 {
        self.default_value
    }
    fn editable(&self) -> bool {
        self.editable
    }
    fn is_fresh_compiled(&self) -> bool {
        self.fresh_compiled
    }
    fn instr_list(&self) -> &BTreeSet<InstrBook> {
        &self.instr_list
    }
    fn instr_end(&self) -> &Vec<usize> {
        &self.instr_end
    }
    fn instr_val(&self) -> &Vec<Instruction> {
        &self.instr_val
    }
    fn fresh_compiled_(&mut self) -> &mut bool {
        &mut self.fresh_compiled
    }
    fn instr_list_(&mut self) -> &mut BTreeSet<InstrBook> {
        &mut self.instr_list
    }
    fn instr_end_(&mut self) -> &mut Vec<usize> {
        &mut self.instr_end
    }
    fn instr_val_(&mut self) -> &mut Vec<Instruction> {
        &mut self.instr_val
    }
}

impl Channel {
    /// Editable channel (analog output or digital line).
    pub fn new(task_type: TaskType, name: &str, samp_rate: f64, default_value: f64) -> Self {
        Self {
            samp_rate,
            task_type,
            name: name.to_string(),
            default_value,
            editable: true,
            fresh_compiled: true,
            instr_list: BTreeSet::new(),
            instr_end: Vec::new(),
            instr_val: Vec::new(),
        }
    }

    /// Compiled, non-editable digital port channel holding port words as constant instructions.
    pub fn new_port(
        name: &str,
        samp_rate: f64,
        instr_end: Vec<usize>,
        instr_val: Vec<Instruction>,
    ) -> Self {
        Self {
            samp_rate,
            task_type: TaskType::DO,
            name: name.to_string(),
            default_value: 0.,
            editable: false,
            fresh_compiled: true,
            instr_list: BTreeSet::new(),
            instr_end,
            instr_val,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::channel::*;

    fn ao(samp_rate: f64) -> Channel {
        Channel::new(TaskType::AO, "ao0", samp_rate, 0.0)
    }

    #[test]
    fn padding_and_keep_val() {
        let mut chan = ao(10.0);
        chan.constant(1.0, 1.0, Some((1.0, true))).unwrap();
        chan.constant(2.0, 3.0, Some((1.0, false))).unwrap();
        chan.compile(50).unwrap();
        assert_eq!(chan.instr_end(), &vec![10, 30, 40, 50]);
        assert_eq!(chan.compiled_stop_time(), 5.0);
        let values: Vec<f64> = chan
            .instr_val()
            .iter()
            .map(|instr| instr.const_value().unwrap())
            .collect();
        // 1.0 is kept across the gap, so the first padding merges into one segment
        assert_eq!(values, vec![0.0, 1.0, 2.0, 0.0]);
    }

    #[test]
    fn go_instruction_lasts_until_next() {
        let mut chan = ao(10.0);
        chan.constant(1.0, 0.0, None).unwrap();
        chan.constant(3.0, 2.0, None).unwrap();
        chan.compile(40).unwrap();
        assert_eq!(chan.instr_end(), &vec![20, 40]);
        let sig = chan.calc_signal_nsamps(0.0, 4.0, 40).unwrap();
        assert_eq!(sig[19], 1.0);
        assert_eq!(sig[20], 3.0);
        assert_eq!(sig[39], 3.0);
    }

    #[test]
    fn overlap_is_rejected() {
        let mut chan = ao(10.0);
        chan.constant(1.0, 1.0, Some((1.0, false))).unwrap();
        let err = chan.constant(1.0, 1.5, Some((1.0, false))).unwrap_err();
        assert!(matches!(err, CompileError::Overlap { .. }));
        // Same start as a "go" instruction
        chan.constant(1.0, 5.0, None).unwrap();
        assert!(chan.constant(2.0, 5.0, None).is_err());
        // Touching intervals are fine
        chan.constant(1.0, 2.0, Some((1.0, false))).unwrap();
        chan.constant(1.0, 0.5, Some((0.5, false))).unwrap();
    }

    #[test]
    fn digital_channel_requires_binary_constants() {
        let mut line = Channel::new(TaskType::DO, "port0/line0", 10.0, 0.0);
        assert!(line.constant(0.5, 0.0, None).is_err());
        assert!(line
            .add_instr(Instruction::new_sine(1.0, None, None, None), 0.0, None)
            .is_err());
        line.constant(1.0, 0.0, None).unwrap();
        assert!(!line.streamable());
    }

    #[test]
    fn sine_keep_val_holds_end_value() {
        let mut chan = ao(100.0);
        // Quarter period: ends at the sine maximum
        chan.add_instr(
            Instruction::new_sine(1.0, Some(2.0), None, None),
            0.0,
            Some((0.25, true)),
        )
        .unwrap();
        chan.compile(50).unwrap();
        let sig = chan.calc_signal_nsamps(0.0, 0.5, 50).unwrap();
        assert!((sig[40] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn stop_before_end_and_recompile() {
        let mut chan = ao(10.0);
        chan.constant(1.0, 0.0, Some((2.0, false))).unwrap();
        assert!(matches!(
            chan.compile(10),
            Err(CompileError::StopBeforeEnd { .. })
        ));
        chan.compile(30).unwrap();
        assert!(chan.is_fresh_compiled());
        chan.compile(30).unwrap();
        assert_eq!(chan.total_samps(), 30);
        chan.clear_edit_cache();
        assert!(!chan.is_edited() && !chan.is_compiled());
    }

    #[test]
    fn signal_requires_compile() {
        let chan = ao(10.0);
        assert!(matches!(
            chan.calc_signal_nsamps(0.0, 1.0, 10),
            Err(CompileError::NotCompiled(_))
        ));
    }
}
