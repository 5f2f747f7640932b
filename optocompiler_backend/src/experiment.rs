//! The experiment module is the highest level of abstraction for configuring an optoPlate-96, and
//! the single place by which methods are exposed to python.
//!
//! ## Overview
//!
//! At the heart of this module lies the [`Experiment`] struct, which owns the Steps, Programs,
//! plate and hardware settings of one illumination experiment. Its behavior is defined by the
//! [`BaseExperiment`] trait, which prescribes the editing operations and the export.
//!
//! The module is organized into the following primary components:
//!
//! 1. **Experiment Struct**: the data structure representing the whole configuration.
//! 2. **Traits**: the [`BaseExperiment`] trait, which implements every operation on top of a
//!    handful of field accessors.
//! 3. **Macro**: `impl_exp_boilerplate!` generates the accessors and, with the `python`
//!    feature, the python-exposed wrappers.
//!
//! ## Key Structures and Their Relationships
//!
//! - **Step** ([`Step`]): one intensity for one duration, optionally pulsed. Owned by the
//!   [`StepList`].
//! - **Program** ([`Program`]): an ordered list of Step IDs. Owned by the [`ProgramList`].
//! - **Plate** ([`Plate`]): 96 wells, each with one Program slot per LED type.
//! - **Usage** ([`UsageIndex`]): which Programs are assigned and which Steps they use. Only used
//!   entities are exported, see [`crate::compiler`].
//!
//! Cross references are IDs. Deleting a Step or Program re-sequences the remaining IDs, and the
//! experiment rewrites every reference (Program → Step, Well → Program, the editor selection)
//! with the resulting [`Renumbering`].
//!
//! ## Navigating the Module
//!
//! If you're looking to:
//!
//! - **Understand core behaviors**: dive into the [`BaseExperiment`] trait.
//! - **Integrate with python**: refer to the [`impl_exp_boilerplate`] macro and its source.

use std::cell::RefCell;
use std::path::Path;

use ndarray::Array2;
use tracing::{debug, info};

use crate::compiler::{CompiledSketch, Compiler, ModelView};
use crate::config::CompilerConfig;
use crate::error::{Error, Result};
use crate::hardware::Hardware;
use crate::ids::Renumbering;
use crate::memory::MemoryStatus;
use crate::plate::{read_correction_factors, Plate, PlateConfig};
use crate::program::{AfterEnd, Program, ProgramList};
use crate::step::*;
use crate::template::Template;
use crate::usage::{UsageCache, UsageIndex};

/// The entity currently open in the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    Step(u32),
    Program(u32),
}

/// This trait defines the behavior of the [`Experiment`] struct through default trait
/// implementations.
///
/// Trait methods are classified into the following categories:
/// 1. Step methods:
///     - [`new_step`], [`add_step`], [`edit_step`], [`duplicate_steps`], [`delete_steps`]
///     - [`set_all`], [`interpolate_steps`], [`dark_step`]
///     - [`step_invalid_reasons`], [`converted_intensities`]
/// 2. Program methods:
///     - [`new_program`], [`add_program`], [`rename_program`], [`duplicate_programs`],
///       [`delete_programs`]
///     - [`add_steps_to_program`], [`remove_steps_from_program`], [`move_step_in_program`],
///       [`append_program_steps`], [`set_after_end`]
///     - [`program_invalid_reasons`], [`program_duration`]
/// 3. Plate and hardware methods:
///     - [`assign`], [`assign_group`], [`bulk_assign`], [`clear_wells`], [`clear_plate`]
///     - [`reconfigure`], [`set_correction_factors`], [`load_correction_factors`],
///       [`set_fan_speed`]
/// 4. Export and status methods:
///     - [`usage`], [`invalid_steps`], [`invalid_programs`]
///     - [`compile`], [`compile_with`], [`estimate`]
///     - [`memory_status`], [`corrections_status`], [`fan_status`]
/// 5. Internal helper methods:
///     - field accessors, [`assert_has_step`], [`assert_has_program`], [`model_view`]
///
/// [`new_step`]: BaseExperiment::new_step
/// [`add_step`]: BaseExperiment::add_step
/// [`edit_step`]: BaseExperiment::edit_step
/// [`duplicate_steps`]: BaseExperiment::duplicate_steps
/// [`delete_steps`]: BaseExperiment::delete_steps
/// [`set_all`]: BaseExperiment::set_all
/// [`interpolate_steps`]: BaseExperiment::interpolate_steps
/// [`dark_step`]: BaseExperiment::dark_step
/// [`step_invalid_reasons`]: BaseExperiment::step_invalid_reasons
/// [`converted_intensities`]: BaseExperiment::converted_intensities
/// [`new_program`]: BaseExperiment::new_program
/// [`add_program`]: BaseExperiment::add_program
/// [`rename_program`]: BaseExperiment::rename_program
/// [`duplicate_programs`]: BaseExperiment::duplicate_programs
/// [`delete_programs`]: BaseExperiment::delete_programs
/// [`add_steps_to_program`]: BaseExperiment::add_steps_to_program
/// [`remove_steps_from_program`]: BaseExperiment::remove_steps_from_program
/// [`move_step_in_program`]: BaseExperiment::move_step_in_program
/// [`append_program_steps`]: BaseExperiment::append_program_steps
/// [`set_after_end`]: BaseExperiment::set_after_end
/// [`program_invalid_reasons`]: BaseExperiment::program_invalid_reasons
/// [`program_duration`]: BaseExperiment::program_duration
/// [`assign`]: BaseExperiment::assign
/// [`assign_group`]: BaseExperiment::assign_group
/// [`bulk_assign`]: BaseExperiment::bulk_assign
/// [`clear_wells`]: BaseExperiment::clear_wells
/// [`clear_plate`]: BaseExperiment::clear_plate
/// [`reconfigure`]: BaseExperiment::reconfigure
/// [`set_correction_factors`]: BaseExperiment::set_correction_factors
/// [`load_correction_factors`]: BaseExperiment::load_correction_factors
/// [`set_fan_speed`]: BaseExperiment::set_fan_speed
/// [`usage`]: BaseExperiment::usage
/// [`invalid_steps`]: BaseExperiment::invalid_steps
/// [`invalid_programs`]: BaseExperiment::invalid_programs
/// [`compile`]: BaseExperiment::compile
/// [`compile_with`]: BaseExperiment::compile_with
/// [`estimate`]: BaseExperiment::estimate
/// [`memory_status`]: BaseExperiment::memory_status
/// [`corrections_status`]: BaseExperiment::corrections_status
/// [`fan_status`]: BaseExperiment::fan_status
/// [`assert_has_step`]: BaseExperiment::assert_has_step
/// [`assert_has_program`]: BaseExperiment::assert_has_program
/// [`model_view`]: BaseExperiment::model_view
pub trait BaseExperiment {
    // FIELD methods
    fn steps(&self) -> &StepList;
    fn steps_(&mut self) -> &mut StepList;
    fn programs(&self) -> &ProgramList;
    fn programs_(&mut self) -> &mut ProgramList;
    fn plate(&self) -> &Plate;
    fn plate_(&mut self) -> &mut Plate;
    fn hardware(&self) -> &Hardware;
    fn hardware_(&mut self) -> &mut Hardware;
    fn usage_cache(&self) -> &RefCell<UsageCache>;
    fn selection(&self) -> Selection;
    fn selection_(&mut self) -> &mut Selection;

    /// Checks that a Step with ID `id` exists. The null step (0) always does.
    fn assert_has_step(&self, id: u32) -> Result<()> {
        if self.steps().contains(id) {
            Ok(())
        } else {
            Err(Error::NotFound { kind: "Step", id })
        }
    }

    /// Checks that a Program with ID `id` exists. The null program (0) always does.
    fn assert_has_program(&self, id: u32) -> Result<()> {
        if self.programs().contains(id) {
            Ok(())
        } else {
            Err(Error::NotFound { kind: "Program", id })
        }
    }

    // STEP methods

    /// Creates a Step with default parameters and returns its ID.
    ///
    /// # Example
    /// ```
    /// use optocompiler_backend::experiment::*;
    ///
    /// let mut exp = Experiment::new();
    /// assert_eq!(exp.new_step().unwrap(), 1);
    /// assert_eq!(exp.new_step().unwrap(), 2);
    /// assert_eq!(exp.steps().get(2).unwrap().borrow().name, "Step002");
    /// ```
    fn new_step(&mut self) -> Result<u32> {
        let id = self.steps_().new_step()?.borrow().id;
        debug!("created step {}", id);
        Ok(id)
    }

    /// Adds `step` under a freshly allocated ID and returns the ID.
    fn add_step(&mut self, step: Step) -> Result<u32> {
        Ok(self.steps_().add(step)?.borrow().id)
    }

    /// Applies `edit` to Step `id`. The ID itself cannot be changed this way.
    ///
    /// # Example
    /// ```
    /// use optocompiler_backend::experiment::*;
    ///
    /// let mut exp = Experiment::new();
    /// let id = exp.new_step().unwrap();
    /// exp.edit_step(id, |s| {
    ///     s.duration = 60_000;
    ///     s.intensity = 2000;
    /// }).unwrap();
    /// assert!(exp.step_invalid_reasons(id).unwrap().is_empty());
    /// ```
    fn edit_step(&mut self, id: u32, edit: impl FnOnce(&mut Step)) -> Result<()> {
        if id == 0 {
            return Err(Error::validation(
                "Step 0 (nullstep)",
                vec!["The null step cannot be edited.".to_string()],
            ));
        }
        let step = self.steps().try_get(id)?;
        let mut step = step.borrow_mut();
        edit(&mut step);
        step.id = id;
        Ok(())
    }

    /// Appends a copy of every Step in `ids` and returns the new IDs.
    fn duplicate_steps(&mut self, ids: &[u32]) -> Result<Vec<u32>> {
        let copies = self.steps_().duplicate(ids)?;
        Ok(copies.iter().map(|s| s.borrow().id).collect())
    }

    /// Deletes Steps, removes every occurrence of them from every Program and re-sequences the
    /// remaining Step IDs.
    ///
    /// Programs that end up without Steps are kept; they are invalid until Steps are added.
    ///
    /// # Example
    /// ```
    /// use optocompiler_backend::experiment::*;
    ///
    /// let mut exp = Experiment::new();
    /// let (a, b, c) = (exp.new_step().unwrap(), exp.new_step().unwrap(), exp.new_step().unwrap());
    /// let p = exp.new_program().unwrap();
    /// exp.add_steps_to_program(p, &[a, b, c, b]).unwrap();
    ///
    /// let renumbering = exp.delete_steps(&[b]).unwrap();
    /// assert_eq!(renumbering.get(c), Some(2));
    /// assert_eq!(exp.programs().get(p).unwrap().borrow().steps(), &[1, 2]);
    /// ```
    fn delete_steps(&mut self, ids: &[u32]) -> Result<Renumbering> {
        for &id in ids {
            if id == 0 {
                return Err(Error::validation(
                    "Step 0 (nullstep)",
                    vec!["The null step cannot be deleted.".to_string()],
                ));
            }
            self.assert_has_step(id)?;
        }
        for &id in ids {
            self.programs_().drop_step(id);
        }
        let renumbering = self.steps_().remove(ids);
        self.programs_().remap_steps(&renumbering);
        if let Selection::Step(id) = self.selection() {
            *self.selection_() = renumbering.get(id).map_or(Selection::None, Selection::Step);
        }
        info!("deleted {} steps", ids.len());
        Ok(renumbering)
    }

    /// Applies `patch` to every Step in `ids`.
    fn set_all(&mut self, ids: &[u32], patch: &StepPatch) -> Result<()> {
        // All or nothing: check every ID before the first edit
        for &id in ids {
            if id == 0 {
                return Err(Error::validation(
                    "Step 0 (nullstep)",
                    vec!["The null step cannot be edited.".to_string()],
                ));
            }
            self.assert_has_step(id)?;
        }
        for &id in ids {
            self.edit_step(id, |s| patch.apply(s))?;
        }
        Ok(())
    }

    /// Creates `n` Steps interpolating linearly from `start` to `end`, named `<prefix>_<i>`.
    ///
    /// With `assign_all` a Program `<prefix>_program` holding all new Steps is created; with
    /// `assign_each` every Step gets its own Program `<step name>_program`. Returns the IDs of
    /// the new Steps.
    ///
    /// # Example
    /// ```
    /// use optocompiler_backend::experiment::*;
    /// use optocompiler_backend::step::StepParams;
    ///
    /// let mut exp = Experiment::new();
    /// let start = StepParams { duration: 1000, pulse_on: 0, pulse_off: 0, intensity: 0 };
    /// let end = StepParams { duration: 1000, pulse_on: 0, pulse_off: 0, intensity: 4000 };
    /// let ids = exp.interpolate_steps(&start, &end, 5, "ramp", true, false).unwrap();
    /// assert_eq!(ids.len(), 5);
    /// assert_eq!(exp.steps().get(ids[2]).unwrap().borrow().intensity, 2000);
    /// assert_eq!(exp.programs().get(1).unwrap().borrow().name, "ramp_program");
    /// ```
    fn interpolate_steps(
        &mut self,
        start: &StepParams,
        end: &StepParams,
        n: usize,
        prefix: &str,
        assign_all: bool,
        assign_each: bool,
    ) -> Result<Vec<u32>> {
        let mut ids = Vec::with_capacity(n);
        for (i, params) in interpolate(start, end, n).into_iter().enumerate() {
            let id = self.new_step()?;
            self.edit_step(id, |s| {
                s.name = interpolated_name(prefix, i, n);
                s.duration = params.duration;
                s.pulse_on = params.pulse_on;
                s.pulse_off = params.pulse_off;
                s.intensity = params.intensity;
                s.is_pulsed = params.pulse_on != 0 || params.pulse_off != 0;
            })?;
            ids.push(id);
        }
        if assign_all {
            let name = format!("{}_program", prefix);
            self.add_program(Program::new(&name, ids.clone(), AfterEnd::default()))?;
        }
        if assign_each {
            for &id in &ids {
                let name = format!("{}_program", self.steps().try_get(id)?.borrow().name);
                self.add_program(Program::new(&name, vec![id], AfterEnd::default()))?;
            }
        }
        Ok(ids)
    }

    /// Creates an unlit Step named `Dark_<program name>` lasting as long as Program `program`.
    fn dark_step(&mut self, program: u32) -> Result<u32> {
        let (name, duration) = {
            let p = self.programs().try_get(program)?;
            let p = p.borrow();
            (p.name.clone(), p.total_duration(self.steps()))
        };
        let duration = match u32::try_from(duration) {
            Ok(d) if u64::from(d) <= MAX_STEP_DURATION => d,
            _ => {
                return Err(Error::validation(
                    format!("Program {} ({})", program, name),
                    vec![format!(
                        "Dark Step for program {} would exceed maximum duration ({} ms, maximum is {} ms).",
                        name, duration, MAX_STEP_DURATION
                    )],
                ))
            }
        };
        let id = self.new_step()?;
        self.edit_step(id, |s| {
            s.name = format!("Dark_{}", name);
            s.duration = duration;
            s.intensity = 0;
        })?;
        Ok(id)
    }

    fn step_invalid_reasons(&self, id: u32) -> Result<Vec<String>> {
        Ok(self.steps().try_get(id)?.borrow().invalid_reasons())
    }

    /// Intensity of Step `id` in the physical unit of every LED type, `name: NA` where no
    /// conversion is configured.
    fn converted_intensities(&self, id: u32) -> Result<Vec<String>> {
        let intensity = self.steps().try_get(id)?.borrow().intensity;
        Ok(self
            .plate()
            .led_types()
            .iter()
            .map(|led| led.converted(intensity))
            .collect())
    }

    // PROGRAM methods

    /// Creates an empty Program and returns its ID.
    fn new_program(&mut self) -> Result<u32> {
        let id = self.programs_().new_program()?.borrow().id;
        debug!("created program {}", id);
        Ok(id)
    }

    /// Adds `program` under a freshly allocated ID. Every Step it refers to must exist.
    fn add_program(&mut self, program: Program) -> Result<u32> {
        for &step in program.steps() {
            self.assert_has_step(step)?;
        }
        Ok(self.programs_().add(program)?.borrow().id)
    }

    fn rename_program(&mut self, id: u32, name: &str) -> Result<()> {
        self.assert_has_program(id)?;
        self.programs().try_get(id)?.borrow_mut().name = name.to_string();
        Ok(())
    }

    fn duplicate_programs(&mut self, ids: &[u32]) -> Result<Vec<u32>> {
        let copies = self.programs_().duplicate(ids)?;
        Ok(copies.iter().map(|p| p.borrow().id).collect())
    }

    /// Deletes Programs, clears every LED they were assigned to and re-sequences the remaining
    /// Program IDs.
    fn delete_programs(&mut self, ids: &[u32]) -> Result<Renumbering> {
        for &id in ids {
            if id == 0 {
                return Err(Error::validation(
                    "Program 0 (nullprogram)",
                    vec!["The null program cannot be deleted.".to_string()],
                ));
            }
            self.assert_has_program(id)?;
        }
        for &id in ids {
            self.plate_().unassign_program(id);
        }
        let renumbering = self.programs_().remove(ids);
        self.plate_().remap_programs(&renumbering);
        if let Selection::Program(id) = self.selection() {
            *self.selection_() = renumbering.get(id).map_or(Selection::None, Selection::Program);
        }
        info!("deleted {} programs", ids.len());
        Ok(renumbering)
    }

    /// Appends Steps to the end of Program `program`. Steps may appear any number of times.
    fn add_steps_to_program(&mut self, program: u32, steps: &[u32]) -> Result<()> {
        for &step in steps {
            self.assert_has_step(step)?;
        }
        self.programs_().push_steps(program, steps)
    }

    /// Removes the Steps at `positions` of Program `program`.
    fn remove_steps_from_program(&mut self, program: u32, positions: &[usize]) -> Result<()> {
        self.programs_().remove_steps_at(program, positions)
    }

    fn move_step_in_program(&mut self, program: u32, from: usize, to: usize) -> Result<()> {
        self.programs_().move_step(program, from, to)
    }

    /// Appends the Steps of Program `from` to Program `to`.
    fn append_program_steps(&mut self, from: u32, to: u32) -> Result<()> {
        let steps = self.programs().try_get(from)?.borrow().steps().to_vec();
        self.programs_().push_steps(to, &steps)
    }

    fn set_after_end(&mut self, program: u32, after_end: AfterEnd) -> Result<()> {
        self.programs().try_get(program)?.borrow_mut().after_end = after_end;
        Ok(())
    }

    fn program_invalid_reasons(&self, id: u32) -> Result<Vec<String>> {
        Ok(self
            .programs()
            .try_get(id)?
            .borrow()
            .invalid_reasons(self.steps()))
    }

    /// Total duration of Program `id` in milliseconds.
    fn program_duration(&self, id: u32) -> Result<u64> {
        Ok(self.programs().try_get(id)?.borrow().total_duration(self.steps()))
    }

    // PLATE methods

    /// Assigns `program` to LED `led` of physical well `well` and of every well grouped with
    /// it. `None` (or the null program) switches the LED off.
    ///
    /// # Example
    /// ```
    /// use optocompiler_backend::experiment::*;
    /// use optocompiler_backend::plate::{Grouping, PlateConfig};
    ///
    /// let mut exp = Experiment::new();
    /// exp.reconfigure(PlateConfig::three_color().with_grouping(Grouping::Wells24));
    /// let p = exp.new_program().unwrap();
    /// exp.assign(13, 2, Some(p)).unwrap();
    /// assert_eq!(exp.plate().wells()[0].leds, vec![None, None, Some(p)]);
    /// assert!(exp.assign(0, 0, Some(p + 1)).is_err());
    /// ```
    fn assign(&mut self, well: usize, led: usize, program: Option<u32>) -> Result<()> {
        let program = program.filter(|&p| p != 0);
        if let Some(p) = program {
            self.assert_has_program(p)?;
        }
        self.plate_().assign_well(well, led, program)
    }

    /// Like [`BaseExperiment::assign`], addressing a well group by index.
    fn assign_group(&mut self, group: usize, led: usize, program: Option<u32>) -> Result<()> {
        let program = program.filter(|&p| p != 0);
        if let Some(p) = program {
            self.assert_has_program(p)?;
        }
        self.plate_().assign_group(group, led, program)
    }

    /// Assigns `programs[i]` to well group `groups[i]`.
    fn bulk_assign(&mut self, groups: &[usize], led: usize, programs: &[u32]) -> Result<()> {
        if groups.len() != programs.len() {
            return Err(Error::validation(
                "Bulk assignment",
                vec![format!(
                    "Selected {} well groups but {} programs.",
                    groups.len(),
                    programs.len()
                )],
            ));
        }
        for &p in programs {
            self.assert_has_program(p)?;
        }
        self.plate_().bulk_assign(groups, led, programs)
    }

    /// Switches off every LED of the given physical wells.
    fn clear_wells(&mut self, wells: &[usize]) -> Result<()> {
        self.plate_().clear_wells(wells)
    }

    fn clear_plate(&mut self) {
        self.plate_().clear_all();
    }

    /// Replaces the plate configuration, see [`Plate::reconfigure`]. Returns whether the
    /// assignments were reset.
    fn reconfigure(&mut self, config: PlateConfig) -> bool {
        let reset = self.plate_().reconfigure(config);
        if reset {
            info!("plate layout changed, assignments cleared");
        }
        reset
    }

    fn set_correction_factors(&mut self, led: usize, factors: Option<Array2<f64>>) -> Result<()> {
        self.plate_().led_type_(led)?.correction_factors = factors;
        Ok(())
    }

    /// Reads correction factors for LED `led` from a delimited text file.
    fn load_correction_factors(&mut self, led: usize, path: &Path) -> Result<()> {
        let factors = read_correction_factors(path)?;
        self.set_correction_factors(led, Some(factors))
    }

    fn set_fan_speed(&mut self, fan_speed: u8) {
        self.hardware_().fan_speed = fan_speed;
    }

    // EXPORT methods

    /// Current usage information, rebuilt only after Programs or assignments changed.
    fn usage(&self) -> UsageIndex {
        self.usage_cache()
            .borrow_mut()
            .get(self.steps(), self.programs(), self.plate())
            .clone()
    }

    /// IDs of all invalid Steps, used or not.
    fn invalid_steps(&self) -> Vec<u32> {
        self.steps()
            .iter()
            .filter(|s| s.borrow().is_invalid())
            .map(|s| s.borrow().id)
            .collect()
    }

    /// IDs of all invalid Programs, used or not.
    fn invalid_programs(&self) -> Vec<u32> {
        self.programs()
            .iter()
            .filter(|p| p.borrow().is_invalid(self.steps()))
            .map(|p| p.borrow().id)
            .collect()
    }

    fn model_view<'a>(&'a self, usage: &'a UsageIndex) -> ModelView<'a> {
        ModelView {
            steps: self.steps(),
            programs: self.programs(),
            plate: self.plate(),
            hardware: self.hardware(),
            usage,
        }
    }

    /// Compiles the experiment into a sketch with a fresh [`Compiler`].
    fn compile(&self, config: &CompilerConfig) -> Result<CompiledSketch> {
        let mut compiler = Compiler::new(config.clone())?;
        self.compile_with(&mut compiler)
    }

    fn compile_with(&self, compiler: &mut Compiler) -> Result<CompiledSketch> {
        let usage = self.usage();
        compiler.compile(self.model_view(&usage))
    }

    /// Memory estimate for live display. Never fails.
    fn estimate(&self, config: &CompilerConfig) -> MemoryStatus {
        let usage = self.usage();
        let mut compiler = Compiler::with_template(config.clone(), Template::builtin());
        compiler.estimate(self.model_view(&usage))
    }

    fn memory_status(&self, config: &CompilerConfig) -> String {
        self.estimate(config).to_string()
    }

    fn corrections_status(&self) -> String {
        self.plate().config().corrections_status()
    }

    fn fan_status(&self) -> String {
        self.hardware().fan_status()
    }

    /// Opens a Step or Program in the editor.
    fn select(&mut self, selection: Selection) -> Result<()> {
        match selection {
            Selection::Step(id) => self.assert_has_step(id)?,
            Selection::Program(id) => self.assert_has_program(id)?,
            Selection::None => {}
        }
        *self.selection_() = selection;
        Ok(())
    }
}

/// A complete optoPlate-96 configuration.
///
/// `Experiment` is built from reference-counted entities and is therefore neither `Send` nor
/// `Sync`; the python class is declared `unsendable` accordingly.
#[cfg_attr(feature = "python", pyo3::pyclass(unsendable))]
#[derive(Default)]
pub struct Experiment {
    steps: StepList,
    programs: ProgramList,
    plate: Plate,
    hardware: Hardware,
    usage: RefCell<UsageCache>,
    selection: Selection,
}

impl Experiment {
    /// An experiment without Steps or Programs on a 3-color plate.
    ///
    /// # Example
    /// ```
    /// use optocompiler_backend::experiment::*;
    ///
    /// let exp = Experiment::new();
    /// assert!(exp.steps().is_empty());
    /// assert_eq!(exp.plate().n_leds(), 3);
    /// assert_eq!(exp.hardware().fan_speed, 255);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// An experiment on a plate with the given configuration.
    pub fn with_plate(config: PlateConfig) -> Self {
        Self {
            plate: Plate::new(config),
            ..Self::default()
        }
    }
}

/// Implements the [`BaseExperiment`] field accessors for a struct with the fields of
/// [`Experiment`], plus the python wrappers when the `python` feature is enabled.
///
/// The wrappers convert errors into python exceptions and otherwise forward to the trait.
#[macro_export]
macro_rules! impl_exp_boilerplate {
    ($exp_type: ty) => {
        impl BaseExperiment for $exp_type {
            fn steps(&self) -> &StepList {
                &self.steps
            }
            fn steps_(&mut self) -> &mut StepList {
                &mut self.steps
            }
            fn programs(&self) -> &ProgramList {
                &self.programs
            }
            fn programs_(&mut self) -> &mut ProgramList {
                &mut self.programs
            }
            fn plate(&self) -> &Plate {
                &self.plate
            }
            fn plate_(&mut self) -> &mut Plate {
                &mut self.plate
            }
            fn hardware(&self) -> &Hardware {
                &self.hardware
            }
            fn hardware_(&mut self) -> &mut Hardware {
                &mut self.hardware
            }
            fn usage_cache(&self) -> &RefCell<UsageCache> {
                &self.usage
            }
            fn selection(&self) -> Selection {
                self.selection
            }
            fn selection_(&mut self) -> &mut Selection {
                &mut self.selection
            }
        }

        #[cfg(feature = "python")]
        #[pyo3::pymethods]
        impl $exp_type {
            // STEP METHODS
            #[pyo3(name = "new_step")]
            fn py_new_step(&mut self) -> pyo3::PyResult<u32> {
                Ok(BaseExperiment::new_step(self)?)
            }

            #[pyo3(name = "set_step")]
            fn py_set_step(
                &mut self,
                id: u32,
                duration: u32,
                intensity: u32,
                pulse_on: Option<u32>,
                pulse_off: Option<u32>,
                name: Option<&str>,
            ) -> pyo3::PyResult<()> {
                Ok(BaseExperiment::edit_step(self, id, |s| {
                    s.duration = duration;
                    s.intensity = intensity;
                    s.is_pulsed = pulse_on.is_some() || pulse_off.is_some();
                    s.pulse_on = pulse_on.unwrap_or(0);
                    s.pulse_off = pulse_off.unwrap_or(0);
                    if let Some(name) = name {
                        s.name = name.to_string();
                    }
                })?)
            }

            #[pyo3(name = "duplicate_steps")]
            fn py_duplicate_steps(&mut self, ids: Vec<u32>) -> pyo3::PyResult<Vec<u32>> {
                Ok(BaseExperiment::duplicate_steps(self, &ids)?)
            }

            #[pyo3(name = "delete_steps")]
            fn py_delete_steps(&mut self, ids: Vec<u32>) -> pyo3::PyResult<Vec<(u32, u32)>> {
                Ok(BaseExperiment::delete_steps(self, &ids)?.iter().collect())
            }

            #[pyo3(name = "interpolate_steps")]
            fn py_interpolate_steps(
                &mut self,
                start: (u32, u32, u32, u32),
                end: (u32, u32, u32, u32),
                n: usize,
                prefix: &str,
                assign_all: bool,
                assign_each: bool,
            ) -> pyo3::PyResult<Vec<u32>> {
                let params = |(duration, pulse_on, pulse_off, intensity): (u32, u32, u32, u32)| StepParams {
                    duration,
                    pulse_on,
                    pulse_off,
                    intensity,
                };
                Ok(BaseExperiment::interpolate_steps(
                    self,
                    &params(start),
                    &params(end),
                    n,
                    prefix,
                    assign_all,
                    assign_each,
                )?)
            }

            #[pyo3(name = "dark_step")]
            fn py_dark_step(&mut self, program: u32) -> pyo3::PyResult<u32> {
                Ok(BaseExperiment::dark_step(self, program)?)
            }

            #[pyo3(name = "step_invalid_reasons")]
            fn py_step_invalid_reasons(&self, id: u32) -> pyo3::PyResult<Vec<String>> {
                Ok(BaseExperiment::step_invalid_reasons(self, id)?)
            }

            // PROGRAM METHODS
            #[pyo3(name = "new_program")]
            fn py_new_program(&mut self) -> pyo3::PyResult<u32> {
                Ok(BaseExperiment::new_program(self)?)
            }

            #[pyo3(name = "rename_program")]
            fn py_rename_program(&mut self, id: u32, name: &str) -> pyo3::PyResult<()> {
                Ok(BaseExperiment::rename_program(self, id, name)?)
            }

            #[pyo3(name = "duplicate_programs")]
            fn py_duplicate_programs(&mut self, ids: Vec<u32>) -> pyo3::PyResult<Vec<u32>> {
                Ok(BaseExperiment::duplicate_programs(self, &ids)?)
            }

            #[pyo3(name = "delete_programs")]
            fn py_delete_programs(&mut self, ids: Vec<u32>) -> pyo3::PyResult<Vec<(u32, u32)>> {
                Ok(BaseExperiment::delete_programs(self, &ids)?.iter().collect())
            }

            #[pyo3(name = "add_steps_to_program")]
            fn py_add_steps_to_program(&mut self, program: u32, steps: Vec<u32>) -> pyo3::PyResult<()> {
                Ok(BaseExperiment::add_steps_to_program(self, program, &steps)?)
            }

            #[pyo3(name = "set_repeat_last")]
            fn py_set_repeat_last(&mut self, program: u32, repeat: bool) -> pyo3::PyResult<()> {
                let after_end = if repeat { AfterEnd::RepeatLast } else { AfterEnd::SwitchOff };
                Ok(BaseExperiment::set_after_end(self, program, after_end)?)
            }

            #[pyo3(name = "program_invalid_reasons")]
            fn py_program_invalid_reasons(&self, id: u32) -> pyo3::PyResult<Vec<String>> {
                Ok(BaseExperiment::program_invalid_reasons(self, id)?)
            }

            // PLATE METHODS
            #[pyo3(name = "assign")]
            fn py_assign(&mut self, well: usize, led: usize, program: Option<u32>) -> pyo3::PyResult<()> {
                Ok(BaseExperiment::assign(self, well, led, program)?)
            }

            #[pyo3(name = "bulk_assign")]
            fn py_bulk_assign(&mut self, groups: Vec<usize>, led: usize, programs: Vec<u32>) -> pyo3::PyResult<()> {
                Ok(BaseExperiment::bulk_assign(self, &groups, led, &programs)?)
            }

            #[pyo3(name = "clear_wells")]
            fn py_clear_wells(&mut self, wells: Vec<usize>) -> pyo3::PyResult<()> {
                Ok(BaseExperiment::clear_wells(self, &wells)?)
            }

            #[pyo3(name = "set_correction_factors")]
            fn py_set_correction_factors(
                &mut self,
                led: usize,
                factors: Option<numpy::PyReadonlyArray2<f64>>,
            ) -> pyo3::PyResult<()> {
                let factors = factors.map(|f| f.as_array().to_owned());
                Ok(BaseExperiment::set_correction_factors(self, led, factors)?)
            }

            #[pyo3(name = "set_fan_speed")]
            fn py_set_fan_speed(&mut self, fan_speed: u8) {
                BaseExperiment::set_fan_speed(self, fan_speed)
            }

            // EXPORT METHODS
            #[pyo3(name = "compile")]
            fn py_compile(&self, template: Option<std::path::PathBuf>) -> pyo3::PyResult<String> {
                let config = CompilerConfig {
                    template,
                    ..CompilerConfig::default()
                };
                Ok(BaseExperiment::compile(self, &config)?.code)
            }

            #[pyo3(name = "memory_status")]
            fn py_memory_status(&self) -> String {
                BaseExperiment::memory_status(self, &CompilerConfig::default())
            }

            #[pyo3(name = "corrections_status")]
            fn py_corrections_status(&self) -> String {
                BaseExperiment::corrections_status(self)
            }

            #[pyo3(name = "fan_status")]
            fn py_fan_status(&self) -> String {
                BaseExperiment::fan_status(self)
            }
        }
    };
}

#[cfg(feature = "python")]
#[pyo3::pymethods]
impl Experiment {
    /// Constructor for the `Experiment` class.
    ///
    /// # Example (python)
    /// ```python
    /// from optocompiler_backend import Experiment
    ///
    /// exp = Experiment()
    /// step = exp.new_step()
    /// ```
    #[new]
    fn py_new() -> Self {
        Self::new()
    }

    /// Loads an experiment from the JSON text of a save file.
    #[staticmethod]
    #[pyo3(name = "from_json")]
    fn py_from_json(text: &str) -> pyo3::PyResult<Self> {
        Ok(Self::from_json_str(text)?)
    }
}

impl_exp_boilerplate!(Experiment);

#[cfg(test)]
mod test {
    use ndarray::Array2;

    use crate::error::Error;
    use crate::experiment::*;
    use crate::memory::Severity;
    use crate::plate::Grouping;

    fn valid_step(exp: &mut Experiment, duration: u32) -> u32 {
        let id = exp.new_step().unwrap();
        exp.edit_step(id, |s| {
            s.duration = duration;
            s.intensity = 1000;
        })
        .unwrap();
        id
    }

    #[test]
    fn step_deletion_rewrites_programs() {
        let mut exp = Experiment::new();
        let a = valid_step(&mut exp, 1000);
        let b = valid_step(&mut exp, 1000);
        let c = valid_step(&mut exp, 1000);
        let only_b = exp.new_program().unwrap();
        let mixed = exp.new_program().unwrap();
        exp.add_steps_to_program(only_b, &[b, b]).unwrap();
        exp.add_steps_to_program(mixed, &[c, a, b, c]).unwrap();
        exp.select(Selection::Step(c)).unwrap();

        exp.delete_steps(&[b]).unwrap();
        assert_eq!(exp.steps().ids(), vec![1, 2]);
        let only_b = exp.programs().get(only_b).unwrap();
        assert!(only_b.borrow().no_steps());
        assert!(only_b.borrow().is_invalid(exp.steps()));
        assert_eq!(exp.programs().get(mixed).unwrap().borrow().steps(), &[2, 1, 2]);
        assert_eq!(exp.selection(), Selection::Step(2));

        assert!(exp.delete_steps(&[0]).is_err());
        assert!(matches!(
            exp.delete_steps(&[7]),
            Err(Error::NotFound { kind: "Step", id: 7 })
        ));
    }

    #[test]
    fn program_deletion_clears_assignments() {
        let mut exp = Experiment::with_plate(PlateConfig::one_color());
        let s = valid_step(&mut exp, 1000);
        let p1 = exp.new_program().unwrap();
        let p2 = exp.new_program().unwrap();
        let p3 = exp.new_program().unwrap();
        for p in [p1, p2, p3] {
            exp.add_steps_to_program(p, &[s]).unwrap();
        }
        exp.assign(0, 0, Some(p1)).unwrap();
        exp.assign(1, 0, Some(p2)).unwrap();
        exp.assign(2, 0, Some(p3)).unwrap();
        exp.select(Selection::Program(p2)).unwrap();

        exp.delete_programs(&[p2]).unwrap();
        let wells = exp.plate().wells();
        assert_eq!(wells[0].leds, vec![Some(1)]);
        assert_eq!(wells[1].leds, vec![None]);
        assert_eq!(wells[2].leds, vec![Some(2)]);
        assert_eq!(exp.selection(), Selection::None);
        assert_eq!(exp.usage().used_programs(), &[1, 2]);
    }

    #[test]
    fn ids_are_reused_after_deletion() {
        let mut exp = Experiment::new();
        for _ in 0..5 {
            exp.new_step().unwrap();
        }
        exp.delete_steps(&[3]).unwrap();
        assert_eq!(exp.steps().ids(), vec![1, 2, 3, 4]);
        assert_eq!(exp.new_step().unwrap(), 5);
    }

    #[test]
    fn dark_step_matches_program() {
        let mut exp = Experiment::new();
        let a = valid_step(&mut exp, 1500);
        let b = valid_step(&mut exp, 2500);
        let p = exp.new_program().unwrap();
        exp.rename_program(p, "induce").unwrap();
        exp.add_steps_to_program(p, &[a, b, a]).unwrap();

        let dark = exp.dark_step(p).unwrap();
        let dark = exp.steps().get(dark).unwrap();
        assert_eq!(dark.borrow().name, "Dark_induce");
        assert_eq!(dark.borrow().duration, 5500);
        assert_eq!(dark.borrow().intensity, 0);
    }

    #[test]
    fn dark_step_too_long() {
        let mut exp = Experiment::new();
        let long = valid_step(&mut exp, 4_000_000_000);
        let p = exp.new_program().unwrap();
        exp.add_steps_to_program(p, &[long, long]).unwrap();
        let err = exp.dark_step(p).unwrap_err();
        assert!(err
            .to_string()
            .contains("would exceed maximum duration (8000000000 ms, maximum is 4294967200 ms)."));
    }

    #[test]
    fn interpolation_with_programs() {
        let mut exp = Experiment::new();
        let start = StepParams {
            duration: 1000,
            pulse_on: 0,
            pulse_off: 0,
            intensity: 100,
        };
        let end = StepParams {
            duration: 2000,
            pulse_on: 500,
            pulse_off: 500,
            intensity: 100,
        };
        let ids = exp.interpolate_steps(&start, &end, 3, "ramp", true, true).unwrap();
        let names: Vec<String> = ids
            .iter()
            .map(|&id| exp.steps().get(id).unwrap().borrow().name.clone())
            .collect();
        assert_eq!(names, vec!["ramp_1", "ramp_2", "ramp_3"]);
        assert!(!exp.steps().get(ids[0]).unwrap().borrow().is_pulsed);
        assert!(exp.steps().get(ids[1]).unwrap().borrow().is_pulsed);

        let programs: Vec<String> = exp
            .programs()
            .iter()
            .map(|p| p.borrow().name.clone())
            .collect();
        assert_eq!(
            programs,
            vec!["ramp_program", "ramp_1_program", "ramp_2_program", "ramp_3_program"]
        );
        assert_eq!(exp.programs().get(1).unwrap().borrow().steps(), &ids[..]);
    }

    #[test]
    fn set_all_patches_selected_steps() {
        let mut exp = Experiment::new();
        let a = valid_step(&mut exp, 1000);
        let b = valid_step(&mut exp, 1000);
        let c = valid_step(&mut exp, 1000);
        let patch = StepPatch {
            intensity: Some(4095),
            ..Default::default()
        };
        exp.set_all(&[a, c], &patch).unwrap();
        let intensity = |id| exp.steps().get(id).unwrap().borrow().intensity;
        assert_eq!((intensity(a), intensity(b), intensity(c)), (4095, 1000, 4095));
        assert!(exp.set_all(&[a, 9], &patch).is_err());

        let dim = StepPatch {
            intensity: Some(1),
            ..Default::default()
        };
        assert!(exp.set_all(&[a, 0, c], &dim).is_err());
        let intensity = |id| exp.steps().get(id).unwrap().borrow().intensity;
        assert_eq!((intensity(a), intensity(c)), (4095, 4095));
    }

    #[test]
    fn bulk_assignment() {
        let mut exp = Experiment::with_plate(PlateConfig::one_color().with_grouping(Grouping::Wells6));
        let s = valid_step(&mut exp, 1000);
        let programs: Vec<u32> = (0..3)
            .map(|_| {
                let p = exp.new_program().unwrap();
                exp.add_steps_to_program(p, &[s]).unwrap();
                p
            })
            .collect();
        exp.bulk_assign(&[0, 1, 2], 0, &programs).unwrap();
        assert_eq!(exp.plate().wells()[0].leds, vec![Some(1)]);
        assert_eq!(exp.plate().wells()[4].leds, vec![Some(2)]);
        assert_eq!(exp.plate().wells()[8].leds, vec![Some(3)]);
        assert!(exp.plate().wells()[51].is_empty());
        assert!(exp.bulk_assign(&[0, 1], 0, &programs).is_err());
    }

    #[test]
    fn usage_tracks_edits() {
        let mut exp = Experiment::new();
        let a = valid_step(&mut exp, 1000);
        let b = valid_step(&mut exp, 1000);
        let p = exp.new_program().unwrap();
        exp.add_steps_to_program(p, &[a]).unwrap();
        assert!(exp.usage().used_steps().is_empty());

        exp.assign(0, 0, Some(p)).unwrap();
        assert_eq!(exp.usage().used_steps(), &[a]);
        exp.add_steps_to_program(p, &[b]).unwrap();
        assert_eq!(exp.usage().used_steps(), &[a, b]);
        exp.clear_plate();
        assert!(!exp.usage().is_program_used(p));
    }

    #[test]
    fn status_lines() {
        let mut exp = Experiment::with_plate(PlateConfig::two_color());
        exp.set_correction_factors(0, Some(Array2::from_elem((8, 12), 0.9)))
            .unwrap();
        exp.set_fan_speed(120);
        assert_eq!(exp.corrections_status(), "Corrections: [643 nm: Yes] [780 nm: No]");
        assert_eq!(exp.fan_status(), "Fan speed: 120");

        let status = exp.estimate(&CompilerConfig::default());
        let report = status.report().unwrap();
        assert_eq!(report.severity(), Severity::Ok);
        assert!(exp
            .memory_status(&CompilerConfig::default())
            .starts_with("Memory requirements: approx. "));
        assert!(exp.set_correction_factors(2, None).is_err());
    }

    #[test]
    fn invalid_listings() {
        let mut exp = Experiment::new();
        let good = valid_step(&mut exp, 1000);
        let bad = exp.new_step().unwrap();
        let p = exp.new_program().unwrap();
        let q = exp.new_program().unwrap();
        exp.add_steps_to_program(p, &[good]).unwrap();
        exp.add_steps_to_program(q, &[good, bad]).unwrap();
        assert_eq!(exp.invalid_steps(), vec![bad]);
        assert_eq!(exp.invalid_programs(), vec![q]);
    }
}
