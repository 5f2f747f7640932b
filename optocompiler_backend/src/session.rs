//! Restoring an [`Experiment`] from a save file.
//!
//! A save file is a JSON object with the keys `hardware`, `plateconfig`, `steps`, `programs` and
//! `wells`. Steps and Programs are re-added in ascending ID order so that the allocators hand out
//! exactly the saved IDs; any gap in the saved IDs is reported as a [`Error::Session`].

use std::fs;
use std::path::Path;

use ndarray::Array2;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::experiment::{BaseExperiment, Experiment};
use crate::hardware::Hardware;
use crate::plate::{Conversion, Grouping, LedType, PlateConfig, N_WELLS};
use crate::program::Program;
use crate::step::Step;
use crate::utils::Rgb;

#[derive(Debug, Clone, Deserialize)]
pub struct SaveFile {
    #[serde(default)]
    pub hardware: Hardware,
    pub plateconfig: SavedPlateConfig,
    pub steps: Vec<Step>,
    pub programs: Vec<Program>,
    /// One entry per physical well, each listing one slot per LED type.
    pub wells: Vec<Vec<SavedSlot>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavedPlateConfig {
    pub grouptype: Grouping,
    pub led_types: Vec<SavedLedType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SavedLedType {
    pub name: String,
    pub color: Rgb,
    #[serde(default)]
    pub can_convert: bool,
    #[serde(default)]
    pub conversion_factor: f64,
    #[serde(default)]
    pub unit: String,
    pub correction_factors: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SavedSlot {
    pub program: Option<u32>,
}

fn correction_matrix(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(Error::session("correction factors must form a rectangular matrix"));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), ncols), flat).map_err(|e| Error::session(e.to_string()))
}

impl SavedLedType {
    fn to_led_type(&self) -> Result<LedType> {
        let mut led = LedType::new(&self.name, self.color);
        if let Some(rows) = &self.correction_factors {
            led.correction_factors = Some(correction_matrix(rows)?);
        }
        if self.can_convert {
            led.conversion = Some(Conversion {
                factor: self.conversion_factor,
                unit: self.unit.clone(),
            });
        }
        Ok(led)
    }
}

impl SavedPlateConfig {
    pub fn to_config(&self) -> Result<PlateConfig> {
        let led_types = self
            .led_types
            .iter()
            .map(SavedLedType::to_led_type)
            .collect::<Result<_>>()?;
        Ok(PlateConfig::new(self.grouptype, led_types))
    }
}

impl Experiment {
    /// Rebuilds an experiment from parsed save data.
    pub fn from_save(save: SaveFile) -> Result<Self> {
        let mut exp = Experiment::with_plate(save.plateconfig.to_config()?);
        exp.set_fan_speed(save.hardware.fan_speed);

        let mut steps = save.steps;
        steps.sort_by_key(|s| s.id);
        for step in steps {
            let saved_id = step.id;
            let id = exp.steps_().add(step)?.borrow().id;
            if id != saved_id {
                return Err(Error::session("IDs of loaded and generated Step do not match."));
            }
        }
        debug!("restored {} steps", exp.steps().len());

        let mut programs = save.programs;
        programs.sort_by_key(|p| p.id);
        for program in programs {
            let saved_id = program.id;
            if let Some(&missing) = program.steps().iter().find(|&&s| !exp.steps().contains(s)) {
                return Err(Error::session(format!(
                    "Program {} refers to unknown Step {}.",
                    saved_id, missing
                )));
            }
            let id = exp.programs_().add(program)?.borrow().id;
            if id != saved_id {
                return Err(Error::session("IDs of loaded and generated program do not match."));
            }
        }
        debug!("restored {} programs", exp.programs().len());

        if save.wells.len() != N_WELLS {
            return Err(Error::session(format!(
                "Expected {} wells but got {}.",
                N_WELLS,
                save.wells.len()
            )));
        }
        let n_leds = exp.plate().n_leds();
        for (well, slots) in save.wells.iter().enumerate() {
            if slots.len() < n_leds {
                return Err(Error::session(format!(
                    "Well {} lists {} LEDs but the plate has {}.",
                    well,
                    slots.len(),
                    n_leds
                )));
            }
            for (led, slot) in slots.iter().take(n_leds).enumerate() {
                let program = slot.program.filter(|&p| p != 0);
                if let Some(p) = program {
                    if !exp.programs().contains(p) {
                        return Err(Error::session(format!(
                            "Well {} refers to unknown Program {}.",
                            well, p
                        )));
                    }
                }
                exp.plate_().set_slot(well, led, program)?;
            }
        }
        info!(
            "loaded experiment with {} steps and {} programs",
            exp.steps().len(),
            exp.programs().len()
        );
        Ok(exp)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Self::from_save(serde_json::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }
}
