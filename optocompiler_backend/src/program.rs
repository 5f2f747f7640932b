//! Programs: ordered sequences of Steps assigned to LEDs.
//!
//! A [`Program`] lists Step IDs; the same Step may appear any number of times. After the last
//! Step the device either keeps repeating that Step or switches the LED off, see [`AfterEnd`].
//!
//! Programs are owned by the [`ProgramList`]. All edits of a Program's Step sequence go through
//! the list, which counts them in a revision number used to invalidate cached usage
//! information (see [`crate::usage`]).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::{Counted, IdAllocator, Renumbering, ID_CEILING};
use crate::step::{StepList, MAX_STEP_DURATION};

/// A Program may hold at most this many Steps (the device stores the count in one byte).
pub const MAX_PROGRAM_STEPS: usize = 255;

pub type ProgramRef = Rc<RefCell<Program>>;

/// Behavior of an LED once its Program ran through all Steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AfterEnd {
    #[default]
    #[serde(rename = "Switch off LED")]
    SwitchOff,
    #[serde(rename = "Repeat the last step")]
    RepeatLast,
}

impl fmt::Display for AfterEnd {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            AfterEnd::SwitchOff => "off",
            AfterEnd::RepeatLast => "repeat",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(rename = "ID")]
    pub id: u32,
    pub name: String,
    steps: Vec<u32>,
    #[serde(rename = "after_end_display", default)]
    pub after_end: AfterEnd,
}

impl Counted for Program {
    fn id(&self) -> u32 {
        self.id
    }
    fn set_id(&mut self, id: u32) {
        self.id = id;
    }
}

impl Program {
    pub fn new(name: &str, steps: Vec<u32>, after_end: AfterEnd) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            steps,
            after_end,
        }
    }

    /// The sentinel Program: repeats the null step forever.
    pub fn null() -> Self {
        Self::new("nullprogram", vec![0], AfterEnd::RepeatLast)
    }

    pub fn default_name(id: u32) -> String {
        format!("Program{:03}", id)
    }

    /// Step IDs in execution order.
    pub fn steps(&self) -> &[u32] {
        &self.steps
    }

    pub(crate) fn steps_mut(&mut self) -> &mut Vec<u32> {
        &mut self.steps
    }

    /// Distinct Step IDs, in order of first appearance.
    pub fn unique_steps(&self) -> Vec<u32> {
        let mut unique = Vec::new();
        for &id in &self.steps {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        unique
    }

    /// Sum of all Step durations in milliseconds. Missing Steps count as 0.
    pub fn total_duration(&self, steps: &StepList) -> u64 {
        self.steps
            .iter()
            .filter_map(|&id| steps.get(id))
            .map(|step| u64::from(step.borrow().duration))
            .sum()
    }

    pub fn total_duration_invalid(&self, steps: &StepList) -> bool {
        self.total_duration(steps) > MAX_STEP_DURATION
    }

    pub fn no_steps(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn too_many_steps(&self) -> bool {
        self.steps.len() > MAX_PROGRAM_STEPS
    }

    /// Entries the device stores: the Steps plus a trailing null step when switching off.
    pub fn n_entries(&self) -> usize {
        self.steps.len() + usize::from(self.after_end == AfterEnd::SwitchOff)
    }

    /// The Steps fit, but the trailing null step for [`AfterEnd::SwitchOff`] does not.
    pub fn no_room_for_switch_off(&self) -> bool {
        !self.too_many_steps() && self.n_entries() > MAX_PROGRAM_STEPS
    }

    /// Whether any referenced Step is invalid or no longer exists.
    pub fn has_invalid_steps(&self, steps: &StepList) -> bool {
        self.unique_steps().into_iter().any(|id| match steps.get(id) {
            Some(step) => !step.borrow().is_null() && step.borrow().is_invalid(),
            None => true,
        })
    }

    pub fn is_invalid(&self, steps: &StepList) -> bool {
        self.total_duration_invalid(steps)
            || self.no_steps()
            || self.too_many_steps()
            || self.no_room_for_switch_off()
            || self.has_invalid_steps(steps)
    }

    pub fn invalid_reasons(&self, steps: &StepList) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.total_duration_invalid(steps) {
            reasons.push(format!(
                "The total duration of all Steps is too long ({} ms, maximum is {} ms).",
                self.total_duration(steps),
                MAX_STEP_DURATION
            ));
        }
        if self.no_steps() {
            reasons.push("The program contains no steps.".to_string());
        }
        if self.too_many_steps() {
            reasons.push(format!(
                "The program contains more than {} steps.",
                MAX_PROGRAM_STEPS
            ));
        }
        if self.no_room_for_switch_off() {
            reasons.push(format!(
                "Switching the LED off needs one more entry than the {} allowed, remove a step or repeat the last step instead.",
                MAX_PROGRAM_STEPS
            ));
        }
        if self.has_invalid_steps(steps) {
            reasons.push("The program contains invalid steps.".to_string());
        }
        reasons
    }

    pub fn validate(&self, steps: &StepList) -> Result<()> {
        let reasons = self.invalid_reasons(steps);
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(self.label(), reasons))
        }
    }

    /// An unnumbered copy with the same Steps, named `Copy of <name>`.
    pub fn duplicate(&self) -> Self {
        Self {
            id: 0,
            name: format!("Copy of {}", self.name),
            ..self.clone()
        }
    }

    pub fn label(&self) -> String {
        format!("Program {} ({})", self.id, self.name)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Program #{} ({}) with {} steps",
            self.id,
            self.name,
            self.steps.len()
        )
    }
}

/// The Programs of an experiment, in display order, plus the null program.
pub struct ProgramList {
    programs: Vec<ProgramRef>,
    ids: IdAllocator<Program>,
    null: ProgramRef,
    _null_ids: IdAllocator<Program>,
    revision: u64,
}

impl Default for ProgramList {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramList {
    pub fn new() -> Self {
        let null = Rc::new(RefCell::new(Program::null()));
        let null_ids = IdAllocator::sentinel(&null);
        Self {
            programs: Vec::new(),
            ids: IdAllocator::new(1, ID_CEILING),
            null,
            _null_ids: null_ids,
            revision: 0,
        }
    }

    pub fn null(&self) -> &ProgramRef {
        &self.null
    }

    /// Counter bumped by every edit of the list or of a Program's Step sequence.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Creates an empty Program named `ProgramNNN`.
    pub fn new_program(&mut self) -> Result<ProgramRef> {
        let program = Rc::new(RefCell::new(Program::default()));
        let id = self.ids.allocate(&program)?;
        program.borrow_mut().name = Program::default_name(id);
        self.programs.push(program.clone());
        self.touch();
        Ok(program)
    }

    /// Numbers `program` and appends it. The ID stored in `program` is overwritten.
    pub fn add(&mut self, program: Program) -> Result<ProgramRef> {
        let program = Rc::new(RefCell::new(program));
        self.ids.allocate(&program)?;
        self.programs.push(program.clone());
        self.touch();
        Ok(program)
    }

    pub fn duplicate(&mut self, ids: &[u32]) -> Result<Vec<ProgramRef>> {
        let mut copies = Vec::with_capacity(ids.len());
        for &id in ids {
            let copy = self.try_get(id)?.borrow().duplicate();
            copies.push(self.add(copy)?);
        }
        Ok(copies)
    }

    /// Removes the Programs in `ids` and re-sequences the survivors.
    pub fn remove(&mut self, ids: &[u32]) -> Renumbering {
        self.programs.retain(|p| !ids.contains(&p.borrow().id));
        for &id in ids {
            self.ids.release(id);
        }
        self.touch();
        self.ids.resequence()
    }

    pub fn get(&self, id: u32) -> Option<ProgramRef> {
        if id == 0 {
            return Some(self.null.clone());
        }
        self.ids.lookup(id)
    }

    pub fn try_get(&self, id: u32) -> Result<ProgramRef> {
        self.get(id).ok_or(Error::NotFound { kind: "Program", id })
    }

    pub fn contains(&self, id: u32) -> bool {
        id == 0 || self.ids.used().binary_search(&id).is_ok()
    }

    /// Appends Steps to the end of a Program.
    pub fn push_steps(&mut self, program_id: u32, step_ids: &[u32]) -> Result<()> {
        let program = self.try_get(program_id)?;
        program.borrow_mut().steps_mut().extend_from_slice(step_ids);
        self.touch();
        Ok(())
    }

    /// Removes the Steps at `positions` (indices into the Step sequence) from a Program.
    pub fn remove_steps_at(&mut self, program_id: u32, positions: &[usize]) -> Result<()> {
        let program = self.try_get(program_id)?;
        let mut program = program.borrow_mut();
        let mut i = 0;
        program.steps_mut().retain(|_| {
            let keep = !positions.contains(&i);
            i += 1;
            keep
        });
        self.touch();
        Ok(())
    }

    /// Moves the Step at position `from` to position `to`.
    pub fn move_step(&mut self, program_id: u32, from: usize, to: usize) -> Result<()> {
        let program = self.try_get(program_id)?;
        let mut program = program.borrow_mut();
        let steps = program.steps_mut();
        if from >= steps.len() || to >= steps.len() {
            return Err(Error::validation(
                format!("Program {}", program_id),
                vec![format!(
                    "Cannot move step {} to {} in a program with {} steps.",
                    from,
                    to,
                    steps.len()
                )],
            ));
        }
        let id = steps.remove(from);
        steps.insert(to, id);
        self.touch();
        Ok(())
    }

    /// Drops every occurrence of `step_id` from every Program.
    pub fn drop_step(&mut self, step_id: u32) {
        for program in &self.programs {
            program.borrow_mut().steps_mut().retain(|&id| id != step_id);
        }
        self.touch();
    }

    /// Rewrites Step references after the Step list was re-sequenced.
    pub fn remap_steps(&mut self, renumbering: &Renumbering) {
        for program in &self.programs {
            for id in program.borrow_mut().steps_mut().iter_mut() {
                if let Some(new) = renumbering.get(*id) {
                    *id = new;
                }
            }
        }
        self.touch();
    }

    /// IDs of all Programs containing `step_id`, in list order.
    pub fn containing(&self, step_id: u32) -> Vec<u32> {
        self.programs
            .iter()
            .filter(|p| p.borrow().steps.contains(&step_id))
            .map(|p| p.borrow().id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProgramRef> {
        self.programs.iter()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.programs.iter().map(|p| p.borrow().id).collect()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}
