//! Encoders turning model snapshots into C declarations for the sketch.
//!
//! ## Records
//!
//! Each record type mirrors one model entity and owns a copy of everything it encodes, so a
//! compilation never holds borrows into the model while rendering:
//!
//! - [`StepRecord`]: a size byte followed by four little-endian fields of minimal width.
//! - [`ProgramRecord`]: an array of pointers to Step records.
//! - [`PlateRecord`]: the program index of every LED of every well.
//! - [`LedTypeRecord`]: optional intensity correction factors of one LED type.
//! - [`HardwareRecord`]: fan speed setup code.
//!
//! Collections ([`StepCollection`], [`ProgramCollection`], [`LedTypeCollection`]) add the
//! lookup tables the firmware indexes into, and refuse invalid entities when validation is on.
//!
//! ## Step record layout
//!
//! ```text
//! byte 0        size byte: 2 bit width codes for duration | pulse_on | pulse_off | intensity
//! byte 1..      duration, pulse_on, pulse_off, intensity; little-endian, 1, 2 or 4 bytes each
//! ```
//!
//! ## Memory
//!
//! Every record implements [`MemoryFootprint`]. The lists it returns are the PROGMEM objects the
//! record adds to the sketch; [`crate::sizing::align`] turns the concatenation of all lists
//! into an estimate of the flash usage.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::hardware::Hardware;
use crate::plate::{LedType, Plate, PlateConfig, N_WELLS};
use crate::program::{AfterEnd, Program};
use crate::sizing::{le_bytes, minimal_width, ByteWidth};
use crate::step::{Step, StepList, StepParams};
use crate::utils::{array_literal, block_array_literal, hex_byte};

/// PROGMEM taken by the sketch without any Steps or Programs.
pub const SKETCH_BASE_BYTES: usize = 6705;
/// Extra PROGMEM needed once the fan is driven with PWM.
pub const FAN_PWM_BYTES: usize = 296;
/// PROGMEM taken by the intensity correction routine.
pub const CORRECTION_ROUTINE_BYTES: usize = 1049;

/// Bytes a component adds to the sketch.
pub trait MemoryFootprint {
    /// Sizes of the PROGMEM objects, one entry per object.
    fn byte_footprint(&self) -> Vec<usize>;

    /// Bytes of RAM needed at runtime.
    fn working_memory(&self) -> usize {
        0
    }
}

/// Name of the byte array holding Step `id`.
pub fn step_array_name(id: u32) -> String {
    match id {
        0 => "nullstep".to_string(),
        id => format!("step{}", id),
    }
}

/// Name of the pointer array holding the Program with export index `index`.
pub fn program_array_name(index: u32) -> String {
    match index {
        0 => "nullprogram".to_string(),
        index => format!("program{}", index),
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub id: u32,
    pub name: String,
    pub params: StepParams,
    widths: [ByteWidth; 4],
}

impl StepRecord {
    pub fn new(step: &Step) -> Result<Self> {
        let params = step.exported_params();
        let [d, on, off, i] = params.as_array();
        Ok(Self {
            id: step.id,
            name: step.name.clone(),
            params,
            widths: [
                minimal_width(d)?,
                minimal_width(on)?,
                minimal_width(off)?,
                minimal_width(i)?,
            ],
        })
    }

    pub fn null() -> Result<Self> {
        Self::new(&Step::null())
    }

    pub fn widths(&self) -> [ByteWidth; 4] {
        self.widths
    }

    /// The four width codes packed into one byte, duration in the most significant bits.
    pub fn size_byte(&self) -> u8 {
        self.widths
            .iter()
            .enumerate()
            .map(|(i, w)| w.code() << (6 - i * 2))
            .sum()
    }

    /// Record length including the size byte.
    pub fn n_bytes(&self) -> usize {
        1 + self.widths.iter().map(|w| w.bytes()).sum::<usize>()
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.n_bytes());
        bytes.push(self.size_byte());
        for (value, width) in self.params.as_array().into_iter().zip(self.widths) {
            bytes.extend(le_bytes(value, width));
        }
        bytes
    }

    pub fn array_name(&self) -> String {
        step_array_name(self.id)
    }

    pub fn declaration(&self) -> String {
        let bytes: Vec<String> = self.bytes().into_iter().map(hex_byte).collect();
        format!(
            "// Step {} ({}); Dur: {}, ON: {}, OFF: {}, INT: {}\nconst byte {}[{}] PROGMEM = {};",
            self.id,
            self.name,
            self.params.duration,
            self.params.pulse_on,
            self.params.pulse_off,
            self.params.intensity,
            self.array_name(),
            self.n_bytes(),
            array_literal(&bytes),
        )
    }

    /// Recovers the four integers from an encoded record.
    ///
    /// # Examples
    ///
    /// ```
    /// use optocompiler_backend::encode::StepRecord;
    ///
    /// // duration 1000 (2 bytes), no pulsing, intensity 4095 (2 bytes)
    /// let params = StepRecord::decode(&[0x41, 0xe8, 0x03, 0x00, 0x00, 0xff, 0x0f]).unwrap();
    /// assert_eq!(params.duration, 1000);
    /// assert_eq!(params.intensity, 4095);
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<StepParams> {
        let malformed = |reason: String| Error::validation("step record", vec![reason]);
        let (&size_byte, mut rest) = bytes
            .split_first()
            .ok_or_else(|| malformed("Record is empty.".to_string()))?;

        let mut values = [0u32; 4];
        for (i, value) in values.iter_mut().enumerate() {
            let code = (size_byte >> (6 - i * 2)) & 0b11;
            let width = ByteWidth::from_code(code)
                .ok_or_else(|| malformed(format!("Unknown width code {}.", code)))?;
            if rest.len() < width.bytes() {
                return Err(malformed(format!(
                    "Record ends after {} bytes.",
                    bytes.len()
                )));
            }
            let (field, tail) = rest.split_at(width.bytes());
            let mut le = [0u8; 4];
            le[..field.len()].copy_from_slice(field);
            *value = u32::from_le_bytes(le);
            rest = tail;
        }
        if !rest.is_empty() {
            return Err(malformed(format!(
                "{} trailing bytes after the record.",
                rest.len()
            )));
        }
        let [duration, pulse_on, pulse_off, intensity] = values;
        Ok(StepParams {
            duration,
            pulse_on,
            pulse_off,
            intensity,
        })
    }
}

impl MemoryFootprint for StepRecord {
    fn byte_footprint(&self) -> Vec<usize> {
        vec![self.n_bytes()]
    }
}

/// The null step followed by every exported Step.
#[derive(Debug, Clone)]
pub struct StepCollection {
    records: Vec<StepRecord>,
}

impl StepCollection {
    pub fn new<'a>(steps: impl IntoIterator<Item = &'a Step>, validate: bool) -> Result<Self> {
        let mut records = vec![StepRecord::null()?];
        let mut invalid = Vec::new();
        for step in steps {
            if validate && step.is_invalid() {
                invalid.push(step.label());
                continue;
            }
            records.push(StepRecord::new(step)?);
        }
        if !invalid.is_empty() {
            return Err(Error::ExportValidation(invalid));
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn export(&self) -> String {
        self.records
            .iter()
            .map(StepRecord::declaration)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl MemoryFootprint for StepCollection {
    fn byte_footprint(&self) -> Vec<usize> {
        self.records.iter().flat_map(|r| r.byte_footprint()).collect()
    }
}

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRecord {
    /// Dense export index, 0 for the null program.
    pub index: u32,
    pub name: String,
    /// Step array names, a trailing `nullstep` when the LED switches off at the end.
    pub entries: Vec<String>,
}

impl ProgramRecord {
    pub fn new(program: &Program, index: u32) -> Self {
        let mut entries: Vec<String> = program
            .steps()
            .iter()
            .map(|&id| step_array_name(id))
            .collect();
        if program.after_end == AfterEnd::SwitchOff {
            entries.push(step_array_name(0));
        }
        Self {
            index,
            name: program.name.clone(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn array_name(&self) -> String {
        program_array_name(self.index)
    }

    pub fn declaration(&self) -> String {
        format!(
            "// Program {} ({}) with {} steps\nconst byte* const {}[{}] PROGMEM = {};",
            self.index,
            self.name,
            self.len(),
            self.array_name(),
            self.len(),
            array_literal(&self.entries),
        )
    }
}

impl MemoryFootprint for ProgramRecord {
    fn byte_footprint(&self) -> Vec<usize> {
        // One 2 byte pointer per entry
        vec![self.len() * 2]
    }
}

/// Export index of every Program: 0 for the null program, then 1, 2, ... in the given order.
pub fn export_indices(programs: &[Program]) -> IndexMap<u32, u32> {
    std::iter::once(0)
        .chain(programs.iter().map(|p| p.id))
        .zip(0..)
        .collect()
}

/// The null program followed by every exported Program, renumbered densely.
#[derive(Debug, Clone)]
pub struct ProgramCollection {
    records: Vec<ProgramRecord>,
    index_map: IndexMap<u32, u32>,
}

impl ProgramCollection {
    /// Builds records for `programs` in the given order. Program `i` (counting from 1) gets
    /// export index `i`, the null program index 0.
    pub fn new<'a>(
        programs: impl IntoIterator<Item = &'a Program>,
        steps: &StepList,
        validate: bool,
    ) -> Result<Self> {
        let mut records = vec![ProgramRecord::new(&Program::null(), 0)];
        let mut index_map = IndexMap::new();
        index_map.insert(0, 0);
        let mut invalid = Vec::new();

        for program in programs {
            if validate && program.is_invalid(steps) {
                invalid.push(program.label());
                continue;
            }
            // PROGRAM_SIZES holds one byte per Program, whether validated or not
            if program.n_entries() > usize::from(u8::MAX) {
                invalid.push(program.label());
                continue;
            }
            let index = records.len() as u32;
            let record = ProgramRecord::new(program, index);
            index_map.insert(program.id, index);
            records.push(record);
        }
        if !invalid.is_empty() {
            return Err(Error::ExportValidation(invalid));
        }
        Ok(Self { records, index_map })
    }

    pub fn records(&self) -> &[ProgramRecord] {
        &self.records
    }

    /// Program ID → export index, null program included.
    pub fn index_map(&self) -> &IndexMap<u32, u32> {
        &self.index_map
    }

    /// Number of exported Programs including the null program.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn export(&self) -> String {
        let mut lines: Vec<String> = self.records.iter().map(ProgramRecord::declaration).collect();
        let names: Vec<String> = self.records.iter().map(ProgramRecord::array_name).collect();
        let sizes: Vec<usize> = self.records.iter().map(ProgramRecord::len).collect();
        lines.push(format!("const uint16_t N_PROGS = {};", self.len()));
        lines.push(format!(
            "const byte* const* const PROGRAMS[N_PROGS] PROGMEM = {};",
            array_literal(&names)
        ));
        lines.push(format!(
            "const uint8_t PROGRAM_SIZES[N_PROGS] PROGMEM = {};",
            array_literal(&sizes)
        ));
        lines.join("\n")
    }

    /// Bytes of the bit array marking Programs advanced within one loop iteration.
    pub fn n_advanced_arr_size(&self) -> usize {
        self.len().div_ceil(8)
    }
}

impl MemoryFootprint for ProgramCollection {
    fn byte_footprint(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.records.iter().flat_map(|r| r.byte_footprint()).collect();
        // PROGRAM_SIZES and PROGRAMS
        sizes.push(self.len());
        sizes.push(self.len() * 2);
        sizes
    }
}

// ---------------------------------------------------------------------------
// Plate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateRecord {
    n_leds: usize,
    /// Export program index per well and LED.
    wells: Vec<Vec<u32>>,
}

impl PlateRecord {
    pub fn new(plate: &Plate, index_map: &IndexMap<u32, u32>) -> Result<Self> {
        let wells = plate
            .wells()
            .iter()
            .map(|well| {
                well.leds
                    .iter()
                    .map(|slot| match slot {
                        None => Ok(0),
                        Some(id) => index_map.get(id).copied().ok_or(Error::NotFound {
                            kind: "Program",
                            id: *id,
                        }),
                    })
                    .collect::<Result<Vec<u32>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            n_leds: plate.n_leds(),
            wells,
        })
    }

    pub fn wells(&self) -> &[Vec<u32>] {
        &self.wells
    }

    pub fn export(&self) -> String {
        let rows: Vec<String> = self.wells.iter().map(|w| array_literal(w)).collect();
        format!(
            "const uint16_t PROGRAM_IDS[{}][{}] PROGMEM = {};",
            N_WELLS,
            self.n_leds,
            block_array_literal(&rows, 1, false)
        )
    }

    pub fn n_colors_declaration(&self) -> String {
        format!("const uint8_t N_COLORS = {};", self.n_leds)
    }
}

impl MemoryFootprint for PlateRecord {
    fn byte_footprint(&self) -> Vec<usize> {
        vec![N_WELLS * self.n_leds * 2]
    }
}

// ---------------------------------------------------------------------------
// LED types
// ---------------------------------------------------------------------------

/// Scales a correction factor to 16 bit: clipped to `[0, 1]`, times 65535, truncated.
pub fn scale_correction(factor: f64) -> u16 {
    (factor.clamp(0.0, 1.0) * f64::from(u16::MAX)) as u16
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedTypeRecord {
    pub index: usize,
    pub name: String,
    /// 96 scaled factors, row-major.
    factors: Option<Vec<u16>>,
}

impl LedTypeRecord {
    pub fn new(led: &LedType, index: usize) -> Self {
        let factors = led
            .correction_factors
            .as_ref()
            .map(|f| f.iter().copied().map(scale_correction).collect());
        Self {
            index,
            name: led.name.clone(),
            factors,
        }
    }

    pub fn corrected(&self) -> bool {
        self.factors.is_some()
    }

    pub fn factors(&self) -> Option<&[u16]> {
        self.factors.as_deref()
    }

    /// `CORR_FCTRS_LED<i>`, or `nullptr` without correction.
    pub fn array_name(&self) -> String {
        match self.factors {
            Some(_) => format!("CORR_FCTRS_LED{}", self.index),
            None => "nullptr".to_string(),
        }
    }

    pub fn declaration(&self) -> Option<String> {
        let factors = self.factors.as_ref()?;
        Some(format!(
            "const uint16_t {}[{}] PROGMEM = {};",
            self.array_name(),
            factors.len(),
            block_array_literal(factors, 12, true)
        ))
    }
}

impl MemoryFootprint for LedTypeRecord {
    fn byte_footprint(&self) -> Vec<usize> {
        vec![self.factors.as_ref().map_or(0, |f| f.len() * 2)]
    }
}

const CORRECTION_CALL: &str = "\
// Get pointer to correction factors. If it is a nullptr, no
// correction is performed.
const uint16_t* const corr_fctr_ptr = CORRECTION_FACTORS[color];
if (corr_fctr_ptr)
{
    new_int = correct_intensity(new_int, well, corr_fctr_ptr);
}";

#[derive(Debug, Clone)]
pub struct LedTypeCollection {
    records: Vec<LedTypeRecord>,
}

impl LedTypeCollection {
    pub fn new(config: &PlateConfig, validate: bool) -> Result<Self> {
        if validate && config.is_invalid() {
            let mut invalid = Vec::new();
            if config.led_types.is_empty() || config.names_invalid() {
                invalid.push("Plate configuration".to_string());
            }
            invalid.extend(
                config
                    .led_types
                    .iter()
                    .filter(|led| led.correction_invalid())
                    .map(|led| format!("LED type {}", led.name)),
            );
            return Err(Error::ExportValidation(invalid));
        }
        let records = config
            .led_types
            .iter()
            .enumerate()
            .map(|(i, led)| LedTypeRecord::new(led, i))
            .collect();
        Ok(Self { records })
    }

    pub fn records(&self) -> &[LedTypeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn any_corrected(&self) -> bool {
        self.records.iter().any(LedTypeRecord::corrected)
    }

    /// Correction arrays of corrected LEDs and the pointer table over all LEDs.
    pub fn export_correction_arrays(&self) -> String {
        let mut lines: Vec<String> = self.records.iter().filter_map(LedTypeRecord::declaration).collect();
        let pointers: Vec<String> = self.records.iter().map(LedTypeRecord::array_name).collect();
        lines.push(format!(
            "const uint16_t* const CORRECTION_FACTORS[{}] = {};",
            self.len(),
            array_literal(&pointers)
        ));
        lines.join("\n")
    }

    /// Code applying the correction inside the firmware loop.
    pub fn export_correction_call(&self) -> String {
        if self.any_corrected() {
            CORRECTION_CALL.to_string()
        } else {
            "// No LED correction applied".to_string()
        }
    }
}

impl MemoryFootprint for LedTypeCollection {
    fn byte_footprint(&self) -> Vec<usize> {
        let mut sizes: Vec<usize> = self.records.iter().flat_map(|r| r.byte_footprint()).collect();
        sizes.push(if self.any_corrected() {
            CORRECTION_ROUTINE_BYTES
        } else {
            0
        });
        sizes.push(2 * self.len());
        sizes
    }
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareRecord {
    pub fan_speed: u8,
}

impl HardwareRecord {
    pub fn new(hardware: &Hardware) -> Self {
        Self {
            fan_speed: hardware.fan_speed,
        }
    }

    pub fn export(&self) -> String {
        format!(
            "// Fan Speed\npinMode(11, OUTPUT);\nanalogWrite(11, {});",
            self.fan_speed
        )
    }
}

impl MemoryFootprint for HardwareRecord {
    fn byte_footprint(&self) -> Vec<usize> {
        if !matches!(self.fan_speed, 0 | 255) {
            vec![FAN_PWM_BYTES]
        } else {
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// Time after which all Programs are through, checked by the firmware to signal completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoneAfter {
    pub millis: u32,
    width: ByteWidth,
}

impl DoneAfter {
    pub fn new(millis: u64) -> Result<Self> {
        let width = minimal_width(millis)?;
        let millis = u32::try_from(millis).map_err(|_| Error::EncodingRange(millis.into()))?;
        Ok(Self { millis, width })
    }

    pub fn declaration(&self) -> String {
        format!("static const uint32_t s_done_after = {};", self.millis)
    }
}

impl MemoryFootprint for DoneAfter {
    fn byte_footprint(&self) -> Vec<usize> {
        vec![self.width.bytes()]
    }
}

pub fn n_advanced_arr_size_declaration(size: usize) -> String {
    format!("const uint16_t N_ADVANCED_ARR_SIZE = {};", size)
}

#[cfg(test)]
mod test {
    use maplit::hashmap;
    use ndarray::Array2;

    use crate::encode::*;
    use crate::plate::{Grouping, PlateConfig};
    use crate::utils::Rgb;

    fn step(id: u32, duration: u32, pulse: Option<(u32, u32)>, intensity: u32) -> Step {
        let (pulse_on, pulse_off) = pulse.unwrap_or((0, 0));
        Step {
            id,
            name: format!("s{}", id),
            duration,
            intensity,
            is_pulsed: pulse.is_some(),
            pulse_on,
            pulse_off,
            ..Default::default()
        }
    }

    #[test]
    fn step_record_layout() {
        let record = StepRecord::new(&step(2, 1000, None, 100)).unwrap();
        assert_eq!(record.size_byte(), 0b0100_0000);
        assert_eq!(record.bytes(), vec![0x40, 0xe8, 0x03, 0, 0, 100]);
        assert_eq!(record.n_bytes(), 6);
        assert_eq!(
            record.declaration(),
            "// Step 2 (s2); Dur: 1000, ON: 0, OFF: 0, INT: 100\n\
             const byte step2[6] PROGMEM = { 0x40, 0xe8, 0x3, 0x0, 0x0, 0x64 };"
        );
    }

    #[test]
    fn step_record_widths() {
        let record = StepRecord::new(&step(1, 100_000, Some((300, 65_600)), 4095)).unwrap();
        assert_eq!(
            record.widths(),
            [ByteWidth::Four, ByteWidth::Two, ByteWidth::Four, ByteWidth::Two]
        );
        assert_eq!(record.size_byte(), (2 << 6) | (1 << 4) | (2 << 2) | 1);
        assert_eq!(record.n_bytes(), 13);
        assert_eq!(StepRecord::decode(&record.bytes()).unwrap(), record.params);
    }

    #[test]
    fn null_step_is_all_zero() {
        let record = StepRecord::null().unwrap();
        assert_eq!(record.bytes(), vec![0; 5]);
        assert_eq!(record.array_name(), "nullstep");
        assert!(record.declaration().contains("const byte nullstep[5] PROGMEM"));
    }

    #[test]
    fn pulses_are_normalized() {
        let one_phase = step(1, 1000, Some((500, 0)), 10);
        let record = StepRecord::new(&one_phase).unwrap();
        assert_eq!((record.params.pulse_on, record.params.pulse_off), (0, 0));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(StepRecord::decode(&[]).is_err());
        assert!(StepRecord::decode(&[0xff, 0, 0, 0, 0]).is_err());
        assert!(StepRecord::decode(&[0x40, 0xe8]).is_err());
        assert!(StepRecord::decode(&[0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn step_collection_names_invalid_steps() {
        let good = step(1, 1000, None, 1);
        let short = step(2, 50, None, 1);
        let dim = step(3, 1000, None, 5000);
        let err = StepCollection::new([&good, &short, &dim], true).unwrap_err();
        match err {
            Error::ExportValidation(names) => assert_eq!(names, vec!["Step 2 (s2)", "Step 3 (s3)"]),
            e => panic!("unexpected error {}", e),
        }
        let steps = StepCollection::new([&good, &short], false).unwrap();
        assert_eq!(steps.records().len(), 3);
        assert_eq!(steps.byte_footprint(), vec![5, 6, 5]);
    }

    #[test]
    fn program_records() {
        let off = Program::new("blink", vec![1, 2, 1], AfterEnd::SwitchOff);
        let record = ProgramRecord::new(&off, 1);
        assert_eq!(
            record.declaration(),
            "// Program 1 (blink) with 4 steps\n\
             const byte* const program1[4] PROGMEM = { step1, step2, step1, nullstep };"
        );
        assert_eq!(record.byte_footprint(), vec![8]);

        let null = ProgramRecord::new(&Program::null(), 0);
        assert_eq!(null.entries, vec!["nullstep"]);
        assert_eq!(null.array_name(), "nullprogram");
    }

    #[test]
    fn program_collection_tables() {
        let mut steps = StepList::new();
        steps.add(step(0, 1000, None, 1)).unwrap();
        let mut a = Program::new("a", vec![1], AfterEnd::RepeatLast);
        a.id = 4;
        let mut b = Program::new("b", vec![1, 1], AfterEnd::SwitchOff);
        b.id = 2;
        let programs = ProgramCollection::new([&a, &b], &steps, true).unwrap();

        let expected = hashmap! { 0 => 0, 4 => 1, 2 => 2 };
        assert_eq!(programs.index_map().len(), expected.len());
        for (id, index) in expected {
            assert_eq!(programs.index_map()[&id], index);
        }
        let text = programs.export();
        assert!(text.contains("const uint16_t N_PROGS = 3;"));
        assert!(text.contains("PROGRAMS[N_PROGS] PROGMEM = { nullprogram, program1, program2 };"));
        assert!(text.contains("PROGRAM_SIZES[N_PROGS] PROGMEM = { 1, 1, 3 };"));
        assert_eq!(programs.byte_footprint(), vec![2, 2, 6, 3, 6]);
        assert_eq!(programs.n_advanced_arr_size(), 1);

        let empty = Program::new("empty", vec![], AfterEnd::RepeatLast);
        assert!(matches!(
            ProgramCollection::new([&empty], &steps, true),
            Err(Error::ExportValidation(_))
        ));
    }

    #[test]
    fn plate_record() {
        let mut plate = Plate::new(PlateConfig::two_color().with_grouping(Grouping::Wells24));
        plate.assign_well(0, 1, Some(7)).unwrap();
        let index_map: IndexMap<u32, u32> = [(0, 0), (7, 1)].into_iter().collect();
        let record = PlateRecord::new(&plate, &index_map).unwrap();
        assert_eq!(record.wells()[13], vec![0, 1]);
        assert_eq!(record.wells()[2], vec![0, 0]);
        let text = record.export();
        assert!(text.starts_with("const uint16_t PROGRAM_IDS[96][2] PROGMEM = {\n    { 0, 1 },\n"));
        assert!(text.ends_with("    { 0, 0 }\n};"));
        assert_eq!(record.byte_footprint(), vec![384]);
        assert_eq!(record.n_colors_declaration(), "const uint8_t N_COLORS = 2;");

        plate.assign_well(5, 0, Some(9)).unwrap();
        assert!(PlateRecord::new(&plate, &index_map).is_err());
    }

    #[test]
    fn correction_scaling() {
        assert_eq!(scale_correction(1.0), 65535);
        assert_eq!(scale_correction(0.5), 32767);
        assert_eq!(scale_correction(-0.2), 0);
        assert_eq!(scale_correction(3.0), 65535);

        let mut config = PlateConfig::one_color();
        let mut factors = Array2::from_elem((8, 12), 1.0);
        factors[[0, 0]] = 1.5;
        factors[[0, 1]] = -0.1;
        config.led_types[0].correction_factors = Some(factors);
        let leds = LedTypeCollection::new(&config, true).unwrap();
        assert!(leds
            .export_correction_arrays()
            .starts_with("const uint16_t CORR_FCTRS_LED0[96] PROGMEM = {\n    65535,     0, 65535,"));

        let mut config = PlateConfig::two_color();
        config.led_types[1].correction_factors = Some(Array2::from_elem((8, 12), 0.5));
        let leds = LedTypeCollection::new(&config, true).unwrap();
        assert!(leds.any_corrected());
        let text = leds.export_correction_arrays();
        assert!(text.starts_with("const uint16_t CORR_FCTRS_LED1[96] PROGMEM = {\n    32767, 32767,"));
        assert!(text.ends_with("const uint16_t* const CORRECTION_FACTORS[2] = { nullptr, CORR_FCTRS_LED1 };"));
        assert!(leds.export_correction_call().contains("correct_intensity(new_int, well, corr_fctr_ptr)"));
        assert_eq!(leds.byte_footprint(), vec![0, 192, 1049, 4]);
    }

    #[test]
    fn uncorrected_leds() {
        let leds = LedTypeCollection::new(&PlateConfig::one_color(), true).unwrap();
        assert_eq!(leds.export_correction_call(), "// No LED correction applied");
        assert_eq!(
            leds.export_correction_arrays(),
            "const uint16_t* const CORRECTION_FACTORS[1] = { nullptr };"
        );
        assert_eq!(leds.byte_footprint(), vec![0, 0, 2]);

        let mut config = PlateConfig::one_color();
        config.led_types.push(LedType::new("465 nm", Rgb::default()));
        assert!(matches!(
            LedTypeCollection::new(&config, true),
            Err(Error::ExportValidation(names)) if names == vec!["Plate configuration".to_string()]
        ));
        assert!(LedTypeCollection::new(&config, false).is_ok());

        let mut config = PlateConfig::one_color();
        config.led_types[0].correction_factors = Some(Array2::zeros((8, 11)));
        assert!(matches!(
            LedTypeCollection::new(&config, true),
            Err(Error::ExportValidation(names)) if names == vec![format!("LED type {}", config.led_types[0].name)]
        ));
    }

    #[test]
    fn hardware_and_scalars() {
        let full = HardwareRecord::new(&Hardware::default());
        assert!(full.byte_footprint().is_empty());
        assert_eq!(
            full.export(),
            "// Fan Speed\npinMode(11, OUTPUT);\nanalogWrite(11, 255);"
        );
        assert_eq!(HardwareRecord { fan_speed: 100 }.byte_footprint(), vec![296]);

        let done = DoneAfter::new(70_000).unwrap();
        assert_eq!(done.declaration(), "static const uint32_t s_done_after = 70000;");
        assert_eq!(done.byte_footprint(), vec![4]);
        assert!(DoneAfter::new(1 << 32).is_err());
        assert_eq!(
            n_advanced_arr_size_declaration(2),
            "const uint16_t N_ADVANCED_ARR_SIZE = 2;"
        );
    }
}
