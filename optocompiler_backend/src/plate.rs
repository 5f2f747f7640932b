//! The 96-well plate, its LED types and the Program assignments of every LED.
//!
//! ## Layout
//!
//! The plate always has 96 physical wells in 8 rows × 12 columns, indexed row-major
//! (`0` = A1, `11` = A12, `12` = B1). Every well carries one LED per configured [`LedType`].
//!
//! A [`Grouping`] merges square blocks of neighbouring wells into [`WellGroup`]s that always
//! share their Program assignments: assigning a Program to any well of a group assigns it to
//! every member. Groups are labelled over the grouped grid, so in the 24-well configuration the
//! group covering wells A1, A2, B1, B2 is called `A1` and the one covering A3, A4, B3, B4 `A2`.
//!
//! ## Assignments
//!
//! Each LED slot holds an optional Program ID; `None` is exported as the null program (LED
//! off). Changing the grouping or the number of LED types resets all assignments, see
//! [`Plate::reconfigure`].

use std::fs;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::Renumbering;
use crate::utils::{well_label, Rgb};

pub const N_WELLS: usize = 96;
pub const N_ROWS: usize = 8;
pub const N_COLS: usize = 12;

/// How many physical wells are merged into one assignable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Grouping {
    #[default]
    #[serde(rename = "96-well")]
    Wells96,
    #[serde(rename = "24-well")]
    Wells24,
    #[serde(rename = "6-well")]
    Wells6,
}

impl Grouping {
    /// Rows of the grouped grid.
    pub fn nrows(self) -> usize {
        match self {
            Grouping::Wells96 => 8,
            Grouping::Wells24 => 4,
            Grouping::Wells6 => 2,
        }
    }

    /// Columns of the grouped grid.
    pub fn ncols(self) -> usize {
        match self {
            Grouping::Wells96 => 12,
            Grouping::Wells24 => 6,
            Grouping::Wells6 => 3,
        }
    }

    /// Physical wells per group.
    pub fn blocksize(self) -> usize {
        N_WELLS / self.n_groups()
    }

    /// Side length of a (square) group.
    pub fn sidelen(self) -> usize {
        N_COLS / self.ncols()
    }

    pub fn n_groups(self) -> usize {
        self.nrows() * self.ncols()
    }
}

/// Display-only conversion of intensities into a physical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub factor: f64,
    pub unit: String,
}

/// A kind of LED mounted in every well.
#[derive(Debug, Clone, PartialEq)]
pub struct LedType {
    pub name: String,
    pub color: Rgb,
    /// 8 × 12 factors in `[0, 1]` scaling the intensity of each well's LED.
    pub correction_factors: Option<Array2<f64>>,
    pub conversion: Option<Conversion>,
}

impl LedType {
    pub fn new(name: &str, color: Rgb) -> Self {
        Self {
            name: name.to_string(),
            color,
            correction_factors: None,
            conversion: None,
        }
    }

    pub fn with_correction(mut self, factors: Array2<f64>) -> Self {
        self.correction_factors = Some(factors);
        self
    }

    pub fn corrected(&self) -> bool {
        self.correction_factors.is_some()
    }

    /// Reasons why the correction matrix cannot be used, empty if it is fine or absent.
    pub fn correction_invalid_reasons(&self) -> Vec<String> {
        let Some(factors) = &self.correction_factors else {
            return Vec::new();
        };
        let mut reasons = Vec::new();
        let (rows, cols) = factors.dim();
        if (rows, cols) != (N_ROWS, N_COLS) {
            reasons.push(format!(
                "Expected {} rows (but got {}) and {} columns (but got {}).",
                N_ROWS, rows, N_COLS, cols
            ));
        }
        // Out of range values are clipped when encoding
        if factors.iter().any(|f| !f.is_finite()) {
            reasons.push("Correction factors must be finite numbers.".to_string());
        }
        reasons
    }

    pub fn correction_invalid(&self) -> bool {
        !self.correction_invalid_reasons().is_empty()
    }

    /// `name: 12.3 unit` for an intensity, or `name: NA` without conversion.
    pub fn converted(&self, intensity: u32) -> String {
        match &self.conversion {
            Some(c) if c.factor != 0.0 => format!(
                "{}: {:.1} {}",
                self.name,
                intensity as f64 / c.factor,
                c.unit
            ),
            _ => format!("{}: NA", self.name),
        }
    }
}

/// Parses a correction matrix from delimited text. `,`, `;` and tab are tried in turn, lines
/// starting with `#` are ignored.
///
/// # Examples
///
/// ```
/// use optocompiler_backend::plate::parse_correction_factors;
///
/// let row = vec!["0.5"; 12].join(";");
/// let text = vec![row; 8].join("\n");
/// let factors = parse_correction_factors(&text).unwrap();
/// assert_eq!(factors.dim(), (8, 12));
/// assert_eq!(factors[[7, 11]], 0.5);
/// ```
pub fn parse_correction_factors(text: &str) -> Result<Array2<f64>> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    let parsed = [',', ';', '\t'].iter().find_map(|&delim| {
        let rows: Option<Vec<Vec<f64>>> = lines
            .iter()
            .map(|line| {
                line.split(delim)
                    .map(|v| v.trim().parse::<f64>().ok())
                    .collect()
            })
            .collect();
        rows.filter(|rows| {
            rows.first()
                .map_or(false, |first| rows.iter().all(|r| r.len() == first.len()))
        })
    });
    let rows = parsed.ok_or_else(|| {
        Error::validation(
            "correction factors",
            vec!["Could not read correction factors.".to_string()],
        )
    })?;

    let (nrows, ncols) = (rows.len(), rows[0].len());
    if (nrows, ncols) != (N_ROWS, N_COLS) {
        return Err(Error::validation(
            "correction factors",
            vec![format!(
                "Expected {} rows (but got {}) and {} columns (but got {}).",
                N_ROWS, nrows, N_COLS, ncols
            )],
        ));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat).map_err(|e| {
        Error::validation("correction factors", vec![e.to_string()])
    })
}

/// Reads a correction matrix from a file, see [`parse_correction_factors`].
pub fn read_correction_factors(path: &Path) -> Result<Array2<f64>> {
    parse_correction_factors(&fs::read_to_string(path)?)
}

/// Grouping plus the LED types mounted in every well.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateConfig {
    pub grouping: Grouping,
    pub led_types: Vec<LedType>,
}

impl Default for PlateConfig {
    fn default() -> Self {
        Self::three_color()
    }
}

impl PlateConfig {
    pub fn new(grouping: Grouping, led_types: Vec<LedType>) -> Self {
        Self {
            grouping,
            led_types,
        }
    }

    /// One blue (465 nm) LED type.
    pub fn one_color() -> Self {
        Self::new(
            Grouping::Wells96,
            vec![LedType::new("465 nm", Rgb(0x00, 0x00, 0xff))],
        )
    }

    /// Red (643 nm) and far red (780 nm).
    pub fn two_color() -> Self {
        Self::new(
            Grouping::Wells96,
            vec![
                LedType::new("643 nm", Rgb(0xff, 0x00, 0x00)),
                LedType::new("780 nm", Rgb(0x77, 0x00, 0x00)),
            ],
        )
    }

    /// Blue (465 nm), red (630 nm) and far red (780 nm).
    pub fn three_color() -> Self {
        Self::new(
            Grouping::Wells96,
            vec![
                LedType::new("465 nm", Rgb(0x00, 0x00, 0xff)),
                LedType::new("630 nm", Rgb(0xff, 0x00, 0x00)),
                LedType::new("780 nm", Rgb(0x77, 0x00, 0x00)),
            ],
        )
    }

    /// The preset for `n_colors` LED types.
    pub fn preset(n_colors: usize) -> Result<Self> {
        match n_colors {
            1 => Ok(Self::one_color()),
            2 => Ok(Self::two_color()),
            3 => Ok(Self::three_color()),
            n => Err(Error::validation(
                "plate configuration",
                vec![format!("There is no {}-color plate.", n)],
            )),
        }
    }

    pub fn with_grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }

    pub fn n_leds(&self) -> usize {
        self.led_types.len()
    }

    /// LED type names must be unique.
    pub fn names_invalid(&self) -> bool {
        let names = self.led_types.iter().map(|l| &l.name);
        names
            .clone()
            .enumerate()
            .any(|(i, name)| names.clone().skip(i + 1).any(|other| other == name))
    }

    pub fn is_invalid(&self) -> bool {
        !self.invalid_reasons().is_empty()
    }

    pub fn invalid_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.led_types.is_empty() {
            reasons.push("At least one LED type is required.".to_string());
        }
        if self.names_invalid() {
            reasons.push("LED types must have unique names.".to_string());
        }
        for led in &self.led_types {
            for reason in led.correction_invalid_reasons() {
                reasons.push(format!("LED {}: {}", led.name, reason));
            }
        }
        reasons
    }

    /// `Corrections: [465 nm: Yes] [630 nm: No]`
    pub fn corrections_status(&self) -> String {
        let mut parts = vec!["Corrections:".to_string()];
        for led in &self.led_types {
            let yn = if led.corrected() { "Yes" } else { "No" };
            parts.push(format!("[{}: {}]", led.name, yn));
        }
        parts.join(" ")
    }
}

/// One physical well: a Program assignment per LED type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Well {
    pub leds: Vec<Option<u32>>,
}

impl Well {
    fn empty(n_leds: usize) -> Self {
        Self {
            leds: vec![None; n_leds],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.leds.iter().all(Option::is_none)
    }
}

/// Wells sharing their assignments under the current grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellGroup {
    pub index: usize,
    /// Label over the grouped grid.
    pub position: String,
    /// Physical well indices, row-major within the block.
    pub wells: Vec<usize>,
}

/// Computes the groups of a grouping. Groups are numbered row-major over the grouped grid.
pub fn well_groups(grouping: Grouping) -> Vec<WellGroup> {
    let side = grouping.sidelen();
    let groups_per_row = N_COLS / side;
    (0..grouping.n_groups())
        .map(|i| {
            let row = i / groups_per_row;
            let start = i * side + row * N_COLS * (side - 1);
            let wells = (0..side)
                .flat_map(|r| (0..side).map(move |c| start + c + r * N_COLS))
                .collect();
            WellGroup {
                index: i,
                position: well_label(i, grouping.ncols()),
                wells,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plate {
    config: PlateConfig,
    wells: Vec<Well>,
    groups: Vec<WellGroup>,
    revision: u64,
}

impl Default for Plate {
    fn default() -> Self {
        Self::new(PlateConfig::default())
    }
}

impl Plate {
    pub fn new(config: PlateConfig) -> Self {
        let n_leds = config.n_leds();
        let groups = well_groups(config.grouping);
        Self {
            config,
            wells: vec![Well::empty(n_leds); N_WELLS],
            groups,
            revision: 0,
        }
    }

    pub fn config(&self) -> &PlateConfig {
        &self.config
    }

    pub fn led_types(&self) -> &[LedType] {
        &self.config.led_types
    }

    /// Mutable access to an LED type, for renaming or attaching correction factors.
    pub fn led_type_(&mut self, led: usize) -> Result<&mut LedType> {
        self.config.led_types.get_mut(led).ok_or(Error::NotFound {
            kind: "LED",
            id: led as u32,
        })
    }

    pub fn n_leds(&self) -> usize {
        self.config.n_leds()
    }

    pub fn wells(&self) -> &[Well] {
        &self.wells
    }

    pub fn groups(&self) -> &[WellGroup] {
        &self.groups
    }

    /// Counter bumped by every assignment change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Replaces the configuration. Assignments survive only if neither the grouping nor the
    /// number of LED types changed. Returns whether assignments were reset.
    pub fn reconfigure(&mut self, config: PlateConfig) -> bool {
        let reset = config.grouping != self.config.grouping || config.n_leds() != self.n_leds();
        if reset {
            self.wells = vec![Well::empty(config.n_leds()); N_WELLS];
            self.groups = well_groups(config.grouping);
        }
        self.config = config;
        self.revision += 1;
        reset
    }

    fn check_led(&self, led: usize) -> Result<()> {
        if led < self.n_leds() {
            Ok(())
        } else {
            Err(Error::NotFound {
                kind: "LED",
                id: led as u32,
            })
        }
    }

    /// Index of the group containing physical well `well`.
    pub fn group_of(&self, well: usize) -> Result<usize> {
        self.groups
            .iter()
            .position(|g| g.wells.contains(&well))
            .ok_or(Error::NotFound {
                kind: "Well",
                id: well as u32,
            })
    }

    /// Sets LED `led` of every well in group `group` to `program`.
    pub fn assign_group(&mut self, group: usize, led: usize, program: Option<u32>) -> Result<()> {
        self.check_led(led)?;
        let members = self
            .groups
            .get(group)
            .ok_or(Error::NotFound {
                kind: "Well group",
                id: group as u32,
            })?
            .wells
            .clone();
        for well in members {
            self.wells[well].leds[led] = program;
        }
        self.revision += 1;
        Ok(())
    }

    /// Sets LED `led` of physical well `well`, and with it of its whole group.
    pub fn assign_well(&mut self, well: usize, led: usize, program: Option<u32>) -> Result<()> {
        let group = self.group_of(well)?;
        self.assign_group(group, led, program)
    }

    /// Sets a single LED slot without spreading it over the well's group. Used when restoring
    /// saved assignments, which list every physical well.
    pub(crate) fn set_slot(&mut self, well: usize, led: usize, program: Option<u32>) -> Result<()> {
        self.check_led(led)?;
        let w = self.wells.get_mut(well).ok_or(Error::NotFound {
            kind: "Well",
            id: well as u32,
        })?;
        w.leds[led] = program;
        self.revision += 1;
        Ok(())
    }

    /// Assigns `programs[i]` to `groups[i]`, pairwise, stopping at the shorter list.
    pub fn bulk_assign(&mut self, groups: &[usize], led: usize, programs: &[u32]) -> Result<()> {
        for (&group, &program) in groups.iter().zip(programs) {
            self.assign_group(group, led, Some(program))?;
        }
        Ok(())
    }

    /// Unassigns every LED of the given physical wells.
    pub fn clear_wells(&mut self, wells: &[usize]) -> Result<()> {
        for &well in wells {
            let n_leds = self.n_leds();
            let w = self.wells.get_mut(well).ok_or(Error::NotFound {
                kind: "Well",
                id: well as u32,
            })?;
            *w = Well::empty(n_leds);
        }
        self.revision += 1;
        Ok(())
    }

    pub fn clear_all(&mut self) {
        let n_leds = self.n_leds();
        self.wells = vec![Well::empty(n_leds); N_WELLS];
        self.revision += 1;
    }

    /// Removes every assignment of `program`.
    pub fn unassign_program(&mut self, program: u32) {
        for slot in self.wells.iter_mut().flat_map(|w| w.leds.iter_mut()) {
            if *slot == Some(program) {
                *slot = None;
            }
        }
        self.revision += 1;
    }

    /// Rewrites assignments after the Program list was re-sequenced. Assignments of Programs
    /// missing from `renumbering` are dropped.
    pub fn remap_programs(&mut self, renumbering: &Renumbering) {
        for slot in self.wells.iter_mut().flat_map(|w| w.leds.iter_mut()) {
            *slot = slot.and_then(|old| renumbering.get(old));
        }
        self.revision += 1;
    }

    /// All `(well, led, program)` assignments in well-major order.
    pub fn assignments(&self) -> impl Iterator<Item = (usize, usize, u32)> + '_ {
        self.wells.iter().enumerate().flat_map(|(w, well)| {
            well.leds
                .iter()
                .enumerate()
                .filter_map(move |(l, slot)| slot.map(|p| (w, l, p)))
        })
    }

    /// Time after which every assigned Program has run through all its Steps: the longest
    /// total duration among assigned Programs, 0 if nothing is assigned.
    pub fn done_after(&self, total_duration: impl Fn(u32) -> u64) -> u64 {
        self.assignments()
            .map(|(_, _, program)| total_duration(program))
            .max()
            .unwrap_or(0)
    }
}
