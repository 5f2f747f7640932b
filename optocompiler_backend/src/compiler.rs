//! The compilation pipeline from model to sketch.
//!
//! ## Stages
//!
//! A [`Compiler`] runs through [`Stage`]s in a fixed order:
//!
//! 1. **Filtering**: copy the used Steps and Programs out of the model. Unused entities are
//!    never exported, invalid or not.
//! 2. **Remapping**: number the used Programs densely. The null program is 0, used Programs
//!    follow in list order. Steps keep their IDs.
//! 3. **Encoding**: Steps, Programs, plate, LED types and hardware are turned into records.
//! 4. **Templating**: the declarations replace the markers of the [`Template`].
//!
//! Any error moves the compiler to [`Stage::Failed`] and is returned; nothing is produced.
//!
//! [`Compiler::estimate`] stops after the encoding stage and reports the memory footprint. It
//! never fails, errors become [`MemoryStatus::Unavailable`].

use std::fmt;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::CompilerConfig;
use crate::encode::*;
use crate::error::Result;
use crate::hardware::Hardware;
use crate::memory::{MemoryReport, MemoryStatus};
use crate::plate::Plate;
use crate::program::{Program, ProgramList};
use crate::sizing::align;
use crate::step::{Step, StepList};
use crate::template::Template;
use crate::usage::UsageIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Filtering,
    Remapping,
    Encoding,
    Templating,
    Done,
    Failed(String),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stage::Idle => write!(f, "idle"),
            Stage::Filtering => write!(f, "filtering"),
            Stage::Remapping => write!(f, "remapping"),
            Stage::Encoding => write!(f, "encoding"),
            Stage::Templating => write!(f, "templating"),
            Stage::Done => write!(f, "done"),
            Stage::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Borrowed view of everything a compilation reads.
#[derive(Clone, Copy)]
pub struct ModelView<'a> {
    pub steps: &'a StepList,
    pub programs: &'a ProgramList,
    pub plate: &'a Plate,
    pub hardware: &'a Hardware,
    pub usage: &'a UsageIndex,
}

/// All records of one configuration.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub steps: StepCollection,
    pub programs: ProgramCollection,
    pub plate: PlateRecord,
    pub leds: LedTypeCollection,
    pub hardware: HardwareRecord,
    pub done_after: DoneAfter,
}

impl Encoded {
    /// Template marker name → declarations.
    pub fn replacements(&self) -> IndexMap<&'static str, String> {
        let mut replacements = IndexMap::new();
        replacements.insert("HARDWARE", self.hardware.export());
        replacements.insert("STEPS", self.steps.export());
        replacements.insert("PROGRAMS", self.programs.export());
        replacements.insert("WELLS", self.plate.export());
        replacements.insert("CORRECTION_FACTORS", self.leds.export_correction_arrays());
        replacements.insert(
            "PERFORM_INTENSITY_CORRECTION",
            self.leds.export_correction_call(),
        );
        replacements.insert("DONE_AFTER", self.done_after.declaration());
        replacements.insert(
            "N_ADVANCED_ARR_SIZE",
            n_advanced_arr_size_declaration(self.programs.n_advanced_arr_size()),
        );
        replacements.insert("N_COLORS", self.plate.n_colors_declaration());
        replacements
    }
}

impl MemoryFootprint for Encoded {
    fn byte_footprint(&self) -> Vec<usize> {
        let mut sizes = vec![SKETCH_BASE_BYTES];
        sizes.extend(self.hardware.byte_footprint());
        sizes.extend(self.done_after.byte_footprint());
        sizes.extend(self.steps.byte_footprint());
        sizes.extend(self.programs.byte_footprint());
        sizes.extend(self.plate.byte_footprint());
        sizes.extend(self.leds.byte_footprint());
        sizes
    }

    fn working_memory(&self) -> usize {
        self.steps.working_memory() + self.programs.working_memory() + self.plate.working_memory()
    }
}

/// A populated sketch.
#[derive(Debug, Clone)]
pub struct CompiledSketch {
    pub code: String,
    pub memory: MemoryReport,
    /// Exported Programs, null program included
    pub n_programs: usize,
    /// Exported Steps, null step included
    pub n_steps: usize,
}

pub struct Compiler {
    config: CompilerConfig,
    template: Template,
    stage: Stage,
}

impl Compiler {
    /// Compiler using the template named in `config`, or the built-in one.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        let template = match &config.template {
            Some(path) => Template::from_path(path)?,
            None => Template::builtin(),
        };
        Ok(Self::with_template(config, template))
    }

    pub fn with_template(config: CompilerConfig, template: Template) -> Self {
        Self {
            config,
            template,
            stage: Stage::Idle,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Stage reached by the last run.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    fn enter(&mut self, stage: Stage) {
        debug!("compiler: {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    fn fail<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("compilation failed: {}", e);
            self.enter(Stage::Failed(e.to_string()));
        }
        result
    }

    fn encode_inner(&mut self, model: ModelView<'_>) -> Result<Encoded> {
        self.enter(Stage::Filtering);
        let steps: Vec<Step> = model
            .usage
            .used_steps()
            .iter()
            .map(|&id| Ok(model.steps.try_get(id)?.borrow().clone()))
            .collect::<Result<_>>()?;
        let programs: Vec<Program> = model
            .usage
            .used_programs()
            .iter()
            .map(|&id| Ok(model.programs.try_get(id)?.borrow().clone()))
            .collect::<Result<_>>()?;
        debug!(
            "{} of {} steps and {} of {} programs in use",
            steps.len(),
            model.steps.len(),
            programs.len(),
            model.programs.len()
        );

        self.enter(Stage::Remapping);
        let index_map = export_indices(&programs);
        debug!("program export indices: {:?}", index_map);

        self.enter(Stage::Encoding);
        let validate = self.config.validate;
        let step_records = StepCollection::new(&steps, validate)?;
        let program_records = ProgramCollection::new(&programs, model.steps, validate)?;
        let plate = PlateRecord::new(model.plate, &index_map)?;
        let leds = LedTypeCollection::new(model.plate.config(), validate)?;
        let hardware = HardwareRecord::new(model.hardware);
        let done_after = DoneAfter::new(model.plate.done_after(|id| {
            model
                .programs
                .get(id)
                .map_or(0, |p| p.borrow().total_duration(model.steps))
        }))?;

        Ok(Encoded {
            steps: step_records,
            programs: program_records,
            plate,
            leds,
            hardware,
            done_after,
        })
    }

    /// Runs filtering, remapping and encoding.
    pub fn encode(&mut self, model: ModelView<'_>) -> Result<Encoded> {
        let result = self.encode_inner(model);
        self.fail(result)
    }

    fn report(&self, encoded: &Encoded) -> MemoryReport {
        let progmem = align(&encoded.byte_footprint(), self.config.word_size);
        MemoryReport::new(progmem, encoded.working_memory(), &self.config)
    }

    /// Produces the sketch for `model`.
    ///
    /// # Examples
    ///
    /// ```
    /// use optocompiler_backend::compiler::*;
    /// use optocompiler_backend::config::CompilerConfig;
    /// use optocompiler_backend::experiment::*;
    ///
    /// let mut exp = Experiment::new();
    /// let step = exp.new_step().unwrap();
    /// exp.edit_step(step, |s| s.duration = 60_000).unwrap();
    /// let program = exp.new_program().unwrap();
    /// exp.add_steps_to_program(program, &[step]).unwrap();
    /// exp.assign(0, 0, Some(program)).unwrap();
    ///
    /// let sketch = exp.compile(&CompilerConfig::default()).unwrap();
    /// assert!(sketch.code.contains("const uint16_t N_PROGS = 2;"));
    /// assert_eq!(sketch.n_steps, 2);
    /// ```
    pub fn compile(&mut self, model: ModelView<'_>) -> Result<CompiledSketch> {
        self.enter(Stage::Idle);
        let encoded = self.encode(model)?;

        self.enter(Stage::Templating);
        let code = self.template.populate(&encoded.replacements());
        let code = self.fail(code)?;

        let memory = self.report(&encoded);
        self.enter(Stage::Done);
        info!(
            "compiled {} programs and {} steps, {}",
            encoded.programs.len(),
            encoded.steps.records().len(),
            memory
        );
        Ok(CompiledSketch {
            code,
            memory,
            n_programs: encoded.programs.len(),
            n_steps: encoded.steps.records().len(),
        })
    }

    /// Memory footprint of `model` without producing a sketch.
    pub fn estimate(&mut self, model: ModelView<'_>) -> MemoryStatus {
        self.enter(Stage::Idle);
        match self.encode(model) {
            Ok(encoded) => {
                let report = self.report(&encoded);
                self.enter(Stage::Done);
                MemoryStatus::Estimated(report)
            }
            Err(e) => MemoryStatus::Unavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::compiler::*;
    use crate::error::Error;
    use crate::plate::PlateConfig;
    use crate::program::AfterEnd;
    use crate::usage::UsageIndex;

    struct Fixture {
        steps: StepList,
        programs: ProgramList,
        plate: Plate,
        hardware: Hardware,
    }

    impl Fixture {
        fn new() -> Self {
            let mut steps = StepList::new();
            for duration in [1000, 2000, 500] {
                let step = steps.new_step().unwrap();
                step.borrow_mut().duration = duration;
                step.borrow_mut().intensity = 100;
            }
            let mut programs = ProgramList::new();
            programs.add(Program::new("unused", vec![1], AfterEnd::SwitchOff)).unwrap();
            programs.add(Program::new("used", vec![2, 3], AfterEnd::RepeatLast)).unwrap();
            let mut plate = Plate::new(PlateConfig::one_color());
            plate.assign_well(4, 0, Some(2)).unwrap();
            Self {
                steps,
                programs,
                plate,
                hardware: Hardware::default(),
            }
        }

        fn usage(&self) -> UsageIndex {
            UsageIndex::build(&self.steps, &self.programs, &self.plate)
        }
    }

    fn view<'a>(f: &'a Fixture, usage: &'a UsageIndex) -> ModelView<'a> {
        ModelView {
            steps: &f.steps,
            programs: &f.programs,
            plate: &f.plate,
            hardware: &f.hardware,
            usage,
        }
    }

    #[test]
    fn only_used_entities_are_exported() {
        let f = Fixture::new();
        let usage = f.usage();
        let mut compiler = Compiler::with_template(CompilerConfig::default(), Template::builtin());
        let sketch = compiler.compile(view(&f, &usage)).unwrap();
        assert_eq!(compiler.stage(), &Stage::Done);

        assert!(sketch.code.contains("const byte step2[6] PROGMEM"));
        assert!(sketch.code.contains("const byte step3[6] PROGMEM"));
        assert!(!sketch.code.contains("step1["));
        assert!(sketch.code.contains("// Program 1 (used) with 2 steps"));
        assert!(!sketch.code.contains("(unused)"));
        assert!(sketch.code.contains("static const uint32_t s_done_after = 2500;"));
        assert!(sketch.code.contains("const uint16_t N_ADVANCED_ARR_SIZE = 1;"));
        assert!(sketch.code.contains("const uint8_t N_COLORS = 1;"));
        assert!(!sketch.code.contains("OPTOPLATE_CONFIG"));
        assert_eq!(sketch.n_programs, 2);
        assert_eq!(sketch.n_steps, 3);
    }

    #[test]
    fn compilation_is_idempotent() {
        let f = Fixture::new();
        let usage = f.usage();
        let mut compiler = Compiler::with_template(CompilerConfig::default(), Template::builtin());
        let first = compiler.compile(view(&f, &usage)).unwrap();
        let second = compiler.compile(view(&f, &usage)).unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(first.memory, second.memory);
    }

    #[test]
    fn invalid_used_step_fails() {
        let f = Fixture::new();
        f.steps.get(3).unwrap().borrow_mut().duration = 150;
        let usage = f.usage();
        let mut compiler = Compiler::with_template(CompilerConfig::default(), Template::builtin());
        let err = compiler.compile(view(&f, &usage)).unwrap_err();
        assert!(matches!(err, Error::ExportValidation(ref names) if names == &vec!["Step 3 (Step003)".to_string()]));
        assert!(matches!(compiler.stage(), Stage::Failed(_)));

        let status = compiler.estimate(view(&f, &usage));
        assert!(matches!(status, MemoryStatus::Unavailable(_)));

        let lenient = CompilerConfig {
            validate: false,
            ..Default::default()
        };
        let mut compiler = Compiler::with_template(lenient, Template::builtin());
        assert!(compiler.compile(view(&f, &usage)).is_ok());
    }

    #[test]
    fn invalid_unused_step_is_ignored() {
        let f = Fixture::new();
        f.steps.get(1).unwrap().borrow_mut().intensity = 9999;
        let usage = f.usage();
        let mut compiler = Compiler::with_template(CompilerConfig::default(), Template::builtin());
        assert!(compiler.compile(view(&f, &usage)).is_ok());
    }

    #[test]
    fn footprint_of_minimal_configuration() {
        let f = Fixture::new();
        let usage = f.usage();
        let mut compiler = Compiler::with_template(CompilerConfig::default(), Template::builtin());
        let encoded = compiler.encode(view(&f, &usage)).unwrap();
        let mut footprint = encoded.byte_footprint();
        footprint.sort_unstable();
        // done_after, null step, two steps, null program, program, sizes, pointers,
        // correction pointer, plate, base
        let mut expected = vec![2, 5, 6, 6, 2, 4, 2, 4, 0, 0, 2, 192, 6705];
        expected.sort_unstable();
        assert_eq!(footprint, expected);

        let status = compiler.estimate(view(&f, &usage));
        let report = status.report().unwrap();
        assert_eq!(report.progmem, align(&footprint, 2));
    }
}
