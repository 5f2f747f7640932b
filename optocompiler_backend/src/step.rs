//! Steps: the smallest unit of an illumination protocol.
//!
//! A [`Step`] holds one LED intensity for a fixed duration, optionally pulsing between an ON
//! phase (at the Step's intensity) and an OFF phase (intensity 0). Steps are shared: one Step
//! can appear in many Programs, any number of times. Programs refer to Steps by ID only, the
//! Steps themselves are owned by the [`StepList`].
//!
//! ## Validity
//!
//! Setters never reject values. Instead, every Step exposes predicates
//! ([`Step::pulse_on_invalid`], [`Step::duration_short_invalid`], ...) and
//! [`Step::invalid_reasons`], so that an editor can show what is wrong while the export refuses
//! to compile invalid Steps that are in use.
//!
//! ## Assistants
//!
//! [`StepPatch`] applies a partial set of parameters to many Steps at once, and [`interpolate`]
//! produces a linear series of parameter sets between two templates.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::{Counted, IdAllocator, Renumbering, ID_CEILING};
use crate::utils::{palette_color, Rgb, TimeUnit};

/// All time values are multiples of this many milliseconds.
pub const TIME_RESOLUTION: u32 = 100;
pub const MIN_STEP_DURATION: u32 = 100;
/// Longest Step (and Program) duration: the largest multiple of 100 ms below the 32 bit
/// millisecond counter wrap of the microcontroller.
pub const MAX_STEP_DURATION: u64 = 4_294_967_200;
/// 12 bit PWM.
pub const MAX_INTENSITY: u32 = 4095;

pub type StepRef = Rc<RefCell<Step>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "ID")]
    pub id: u32,
    pub name: String,
    pub color: Rgb,
    /// Milliseconds.
    pub duration: u32,
    #[serde(default)]
    pub duration_unit: TimeUnit,
    pub intensity: u32,
    pub is_pulsed: bool,
    /// Milliseconds.
    pub pulse_on: u32,
    #[serde(default)]
    pub pulse_on_unit: TimeUnit,
    /// Milliseconds.
    pub pulse_off: u32,
    #[serde(default)]
    pub pulse_off_unit: TimeUnit,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::from("Step"),
            color: Rgb::default(),
            duration: 0,
            duration_unit: TimeUnit::Millis,
            intensity: 0,
            is_pulsed: false,
            pulse_on: 0,
            pulse_on_unit: TimeUnit::Millis,
            pulse_off: 0,
            pulse_off_unit: TimeUnit::Millis,
        }
    }
}

impl Counted for Step {
    fn id(&self) -> u32 {
        self.id
    }
    fn set_id(&mut self, id: u32) {
        self.id = id;
    }
}

/// The four exported integers of a Step, in record order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepParams {
    pub duration: u32,
    pub pulse_on: u32,
    pub pulse_off: u32,
    pub intensity: u32,
}

impl StepParams {
    pub fn as_array(&self) -> [u32; 4] {
        [self.duration, self.pulse_on, self.pulse_off, self.intensity]
    }
}

impl Step {
    /// The sentinel Step meaning "LED off": ID 0 and all parameters zero.
    pub fn null() -> Self {
        Self {
            name: String::from("nullstep"),
            ..Default::default()
        }
    }

    pub fn default_name(id: u32) -> String {
        format!("Step{:03}", id)
    }

    pub fn is_null(&self) -> bool {
        self.id == 0
    }

    /// Pulse ON must fit into the Step.
    pub fn pulse_on_invalid(&self) -> bool {
        self.is_pulsed && self.duration < self.pulse_on
    }

    pub fn duration_long_invalid(&self) -> bool {
        u64::from(self.duration) > MAX_STEP_DURATION
    }

    pub fn duration_short_invalid(&self) -> bool {
        self.duration < MIN_STEP_DURATION
    }

    /// Time values must be multiples of [`TIME_RESOLUTION`].
    pub fn resolution_invalid(&self) -> bool {
        [self.duration, self.pulse_on, self.pulse_off]
            .iter()
            .any(|t| t % TIME_RESOLUTION != 0)
    }

    pub fn intensity_invalid(&self) -> bool {
        self.intensity > MAX_INTENSITY
    }

    pub fn is_invalid(&self) -> bool {
        self.pulse_on_invalid()
            || self.duration_long_invalid()
            || self.duration_short_invalid()
            || self.resolution_invalid()
            || self.intensity_invalid()
    }

    /// Human readable causes of invalidity, empty for a valid Step.
    pub fn invalid_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.pulse_on_invalid() {
            reasons.push("Pulse ON duration cannot exceed Step duration.".to_string());
        }
        if self.duration_long_invalid() {
            reasons.push(format!(
                "Step duration is too long ({} ms, maximum is {} ms).",
                self.duration, MAX_STEP_DURATION
            ));
        }
        if self.duration_short_invalid() {
            reasons.push(format!(
                "Step duration must be at least {} ms.",
                MIN_STEP_DURATION
            ));
        }
        if self.resolution_invalid() {
            reasons.push(format!(
                "Times must be multiples of {} ms.",
                TIME_RESOLUTION
            ));
        }
        if self.intensity_invalid() {
            reasons.push(format!(
                "Intensity cannot exceed {} (got {}).",
                MAX_INTENSITY, self.intensity
            ));
        }
        reasons
    }

    /// Returns an error listing all reasons if the Step is invalid.
    pub fn validate(&self) -> Result<()> {
        let reasons = self.invalid_reasons();
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(self.label(), reasons))
        }
    }

    /// Parameters as stored on the device. Pulsing is only kept if the Step is pulsed and
    /// both phases are non-zero, otherwise both pulse fields are 0.
    pub fn exported_params(&self) -> StepParams {
        let pulsed = self.is_pulsed && self.pulse_on > 0 && self.pulse_off > 0;
        StepParams {
            duration: self.duration,
            pulse_on: if pulsed { self.pulse_on } else { 0 },
            pulse_off: if pulsed { self.pulse_off } else { 0 },
            intensity: self.intensity,
        }
    }

    /// Number of pulse cycles within the Step, 1 for unpulsed Steps.
    pub fn cycles(&self) -> f64 {
        if !self.is_pulsed {
            return 1.0;
        }
        match u64::from(self.pulse_on) + u64::from(self.pulse_off) {
            0 => 0.0,
            period => self.duration as f64 / period as f64,
        }
    }

    /// An unnumbered copy with the same parameters, named `Copy of <name>`.
    pub fn duplicate(&self) -> Self {
        Self {
            id: 0,
            name: format!("Copy of {}", self.name),
            ..self.clone()
        }
    }

    /// Short identification used in messages: `Step 3 (blue pulse)`.
    pub fn label(&self) -> String {
        format!("Step {} ({})", self.id, self.name)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Step #{} ({}) Dur: {}, ON: {}, OFF: {}, INT: {}",
            self.id, self.name, self.duration, self.pulse_on, self.pulse_off, self.intensity
        )
    }
}

/// A partial parameter set applied to many Steps at once. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPatch {
    pub intensity: Option<u32>,
    pub duration: Option<(u32, TimeUnit)>,
    pub is_pulsed: Option<bool>,
    pub pulse_on: Option<(u32, TimeUnit)>,
    pub pulse_off: Option<(u32, TimeUnit)>,
}

impl StepPatch {
    pub fn is_empty(&self) -> bool {
        *self == StepPatch::default()
    }

    pub fn apply(&self, step: &mut Step) {
        if let Some(intensity) = self.intensity {
            step.intensity = intensity;
        }
        if let Some((duration, unit)) = self.duration {
            step.duration = duration;
            step.duration_unit = unit;
        }
        if let Some(is_pulsed) = self.is_pulsed {
            step.is_pulsed = is_pulsed;
        }
        if let Some((pulse_on, unit)) = self.pulse_on {
            step.pulse_on = pulse_on;
            step.pulse_on_unit = unit;
        }
        if let Some((pulse_off, unit)) = self.pulse_off {
            step.pulse_off = pulse_off;
            step.pulse_off_unit = unit;
        }
    }
}

/// `n` parameter sets linearly spaced from `start` to `end` (both included).
///
/// Time values are rounded to the nearest multiple of 100 ms (ties to even), intensities are
/// truncated.
///
/// # Examples
///
/// ```
/// use optocompiler_backend::step::*;
///
/// let start = StepParams { duration: 1000, pulse_on: 0, pulse_off: 0, intensity: 0 };
/// let end = StepParams { duration: 2000, pulse_on: 0, pulse_off: 0, intensity: 4095 };
/// let series = interpolate(&start, &end, 3);
/// assert_eq!(series[1].duration, 1500);
/// assert_eq!(series[1].intensity, 2047);
/// ```
pub fn interpolate(start: &StepParams, end: &StepParams, n: usize) -> Vec<StepParams> {
    let lerp = |a: u32, b: u32, i: usize| -> f64 {
        if n <= 1 {
            return a as f64;
        }
        let (a, b) = (a as f64, b as f64);
        a + (b - a) * i as f64 / (n - 1) as f64
    };
    let time = |a: u32, b: u32, i: usize| -> u32 {
        let t = (lerp(a, b, i) / TIME_RESOLUTION as f64).round_ties_even();
        (t * TIME_RESOLUTION as f64) as u32
    };
    (0..n)
        .map(|i| StepParams {
            duration: time(start.duration, end.duration, i),
            pulse_on: time(start.pulse_on, end.pulse_on, i),
            pulse_off: time(start.pulse_off, end.pulse_off, i),
            intensity: lerp(start.intensity, end.intensity, i) as u32,
        })
        .collect()
}

/// Name of the `i`-th (0 based) of `n` interpolated Steps: `prefix_01` ... `prefix_12`.
pub fn interpolated_name(prefix: &str, i: usize, n: usize) -> String {
    let width = n.to_string().len();
    format!("{}_{:0width$}", prefix, i + 1, width = width)
}

/// The Steps of an experiment, in display order.
///
/// Every Step in the list carries an ID issued by the list's allocator. The list also owns the
/// null step, numbered by a separate single-ID allocator.
pub struct StepList {
    steps: Vec<StepRef>,
    ids: IdAllocator<Step>,
    null: StepRef,
    _null_ids: IdAllocator<Step>,
}

impl Default for StepList {
    fn default() -> Self {
        Self::new()
    }
}

impl StepList {
    pub fn new() -> Self {
        let null = Rc::new(RefCell::new(Step::null()));
        let null_ids = IdAllocator::sentinel(&null);
        Self {
            steps: Vec::new(),
            ids: IdAllocator::new(1, ID_CEILING),
            null,
            _null_ids: null_ids,
        }
    }

    pub fn null(&self) -> &StepRef {
        &self.null
    }

    /// Creates a Step with default parameters and name `StepNNN`.
    pub fn new_step(&mut self) -> Result<StepRef> {
        let step = Rc::new(RefCell::new(Step::default()));
        let id = self.ids.allocate(&step)?;
        {
            let mut s = step.borrow_mut();
            s.name = Step::default_name(id);
            s.color = palette_color(id - 1);
        }
        self.steps.push(step.clone());
        Ok(step)
    }

    /// Numbers `step` and appends it. The ID stored in `step` is overwritten.
    pub fn add(&mut self, step: Step) -> Result<StepRef> {
        let step = Rc::new(RefCell::new(step));
        self.ids.allocate(&step)?;
        self.steps.push(step.clone());
        Ok(step)
    }

    /// Appends a `Copy of` each Step in `ids`.
    pub fn duplicate(&mut self, ids: &[u32]) -> Result<Vec<StepRef>> {
        let mut copies = Vec::with_capacity(ids.len());
        for &id in ids {
            let copy = self.try_get(id)?.borrow().duplicate();
            copies.push(self.add(copy)?);
        }
        Ok(copies)
    }

    /// Removes the Steps in `ids` and re-sequences the survivors. References to the removed
    /// Steps must be dropped by the caller; the returned renumbering rewrites the rest.
    pub fn remove(&mut self, ids: &[u32]) -> Renumbering {
        self.steps.retain(|step| !ids.contains(&step.borrow().id));
        for &id in ids {
            self.ids.release(id);
        }
        self.ids.resequence()
    }

    pub fn get(&self, id: u32) -> Option<StepRef> {
        if id == 0 {
            return Some(self.null.clone());
        }
        self.ids.lookup(id)
    }

    pub fn try_get(&self, id: u32) -> Result<StepRef> {
        self.get(id).ok_or(Error::NotFound { kind: "Step", id })
    }

    pub fn contains(&self, id: u32) -> bool {
        id == 0 || self.ids.used().binary_search(&id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepRef> {
        self.steps.iter()
    }

    /// IDs in list order.
    pub fn ids(&self) -> Vec<u32> {
        self.steps.iter().map(|s| s.borrow().id).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod test {
    use crate::step::*;

    fn step(duration: u32, pulse_on: u32, pulse_off: u32, is_pulsed: bool) -> Step {
        Step {
            duration,
            pulse_on,
            pulse_off,
            is_pulsed,
            intensity: 100,
            ..Default::default()
        }
    }

    #[test]
    fn duration_boundaries() {
        assert!(step(99, 0, 0, false).duration_short_invalid());
        assert!(!step(100, 0, 0, false).is_invalid());
        assert!(!step(MAX_STEP_DURATION as u32, 0, 0, false).is_invalid());
        let too_long = step(MAX_STEP_DURATION as u32 + 1, 0, 0, false);
        assert!(too_long.duration_long_invalid());
        assert!(too_long.invalid_reasons().contains(&format!(
            "Step duration is too long (4294967201 ms, maximum is {} ms).",
            MAX_STEP_DURATION
        )));
        assert!(step(u32::MAX, 0, 0, false).duration_long_invalid());
    }

    #[test]
    fn pulse_on_must_fit() {
        let s = step(1000, 1100, 100, true);
        assert!(s.pulse_on_invalid());
        assert_eq!(
            s.invalid_reasons(),
            vec!["Pulse ON duration cannot exceed Step duration.".to_string()]
        );
        // Only relevant when pulsed
        assert!(!step(1000, 1100, 100, false).pulse_on_invalid());
        assert!(s.validate().is_err());
    }

    #[test]
    fn resolution_and_intensity() {
        assert!(step(150, 0, 0, false).resolution_invalid());
        let mut s = step(1000, 0, 0, false);
        s.intensity = 4096;
        assert!(s.intensity_invalid());
        s.intensity = 4095;
        assert!(!s.is_invalid());
    }

    #[test]
    fn pulse_normalization() {
        let p = step(1000, 200, 0, true).exported_params();
        assert_eq!((p.pulse_on, p.pulse_off), (0, 0));
        let p = step(1000, 200, 300, false).exported_params();
        assert_eq!((p.pulse_on, p.pulse_off), (0, 0));
        let p = step(1000, 200, 300, true).exported_params();
        assert_eq!(p.as_array(), [1000, 200, 300, 100]);
    }

    #[test]
    fn list_numbering() {
        let mut list = StepList::new();
        let a = list.new_step().unwrap();
        let b = list.new_step().unwrap();
        let c = list.new_step().unwrap();
        assert_eq!(a.borrow().name, "Step001");
        assert_eq!(c.borrow().id, 3);

        let renumbering = list.remove(&[2]);
        assert_eq!(list.ids(), vec![1, 2]);
        assert_eq!(c.borrow().id, 2);
        assert_eq!(renumbering.get(3), Some(2));
        drop(b);

        assert_eq!(list.get(0).unwrap().borrow().name, "nullstep");
        assert!(list.get(3).is_none());
        assert!(matches!(
            list.try_get(7),
            Err(Error::NotFound { kind: "Step", id: 7 })
        ));
    }

    #[test]
    fn duplication() {
        let mut list = StepList::new();
        let a = list.new_step().unwrap();
        a.borrow_mut().duration = 500;
        let copies = list.duplicate(&[1]).unwrap();
        let copy = copies[0].borrow();
        assert_eq!(copy.id, 2);
        assert_eq!(copy.name, "Copy of Step001");
        assert_eq!(copy.duration, 500);
    }

    #[test]
    fn patch_only_touches_set_fields() {
        let mut s = step(1000, 0, 0, false);
        let patch = StepPatch {
            intensity: Some(4000),
            pulse_on: Some((60_000, TimeUnit::Minutes)),
            ..Default::default()
        };
        patch.apply(&mut s);
        assert_eq!(s.intensity, 4000);
        assert_eq!(s.pulse_on, 60_000);
        assert_eq!(s.pulse_on_unit, TimeUnit::Minutes);
        assert_eq!(s.duration, 1000);
        assert!(!s.is_pulsed);
        assert!(StepPatch::default().is_empty());
    }

    #[test]
    fn interpolation_rounds_times() {
        let start = StepParams {
            duration: 100,
            pulse_on: 0,
            pulse_off: 0,
            intensity: 0,
        };
        let end = StepParams {
            duration: 1000,
            pulse_on: 0,
            pulse_off: 500,
            intensity: 1000,
        };
        let series = interpolate(&start, &end, 4);
        let durations: Vec<u32> = series.iter().map(|p| p.duration).collect();
        // 100, 400, 700, 1000
        assert_eq!(durations, vec![100, 400, 700, 1000]);
        let offs: Vec<u32> = series.iter().map(|p| p.pulse_off).collect();
        // 0, 166.7, 333.3, 500 → 200, 300
        assert_eq!(offs, vec![0, 200, 300, 500]);
        let ints: Vec<u32> = series.iter().map(|p| p.intensity).collect();
        assert_eq!(ints, vec![0, 333, 666, 1000]);

        assert_eq!(interpolate(&start, &end, 1), vec![start]);
        assert!(interpolate(&start, &end, 0).is_empty());
    }

    #[test]
    fn interpolated_names_are_padded() {
        assert_eq!(interpolated_name("ramp", 0, 12), "ramp_01");
        assert_eq!(interpolated_name("ramp", 11, 12), "ramp_12");
        assert_eq!(interpolated_name("ramp", 2, 5), "ramp_3");
    }
}
