//! Memory reports for the live status line.
//!
//! A [`MemoryReport`] compares the estimated flash usage of the current configuration with the
//! PROGMEM budget and classifies it into a [`Severity`] band. Estimation never fails: when the
//! configuration cannot be encoded the result is [`MemoryStatus::Unavailable`] with the reason.

use std::fmt;

use crate::config::CompilerConfig;

pub const UNAVAILABLE_MESSAGE: &str =
    "Could not calculate memory requirements. Are there invalid Steps or programs in use?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    /// At least `warn_percent` of the budget
    Warning,
    /// The budget is used up
    Critical,
}

impl Severity {
    /// Band of a usage of `percent` of the budget.
    ///
    /// # Examples
    ///
    /// ```
    /// use optocompiler_backend::memory::Severity;
    ///
    /// assert_eq!(Severity::classify(79.9, 80), Severity::Ok);
    /// assert_eq!(Severity::classify(80.0, 80), Severity::Warning);
    /// assert_eq!(Severity::classify(100.0, 80), Severity::Critical);
    /// ```
    pub fn classify(percent: f64, warn_percent: u8) -> Self {
        if percent >= 100.0 {
            Severity::Critical
        } else if percent >= f64::from(warn_percent) {
            Severity::Warning
        } else {
            Severity::Ok
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            Severity::Ok => "",
            Severity::Warning => "[ ! ]",
            Severity::Critical => "[!!!]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReport {
    /// Aligned PROGMEM estimate in bytes
    pub progmem: usize,
    pub ram: usize,
    pub ceiling: usize,
    pub warn_percent: u8,
}

impl MemoryReport {
    pub fn new(progmem: usize, ram: usize, config: &CompilerConfig) -> Self {
        Self {
            progmem,
            ram,
            ceiling: config.progmem_ceiling,
            warn_percent: config.warn_percent,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.ceiling == 0 {
            return f64::INFINITY;
        }
        self.progmem as f64 / self.ceiling as f64 * 100.0
    }

    pub fn severity(&self) -> Severity {
        Severity::classify(self.percent(), self.warn_percent)
    }

    pub fn fits(&self) -> bool {
        self.severity() != Severity::Critical
    }
}

impl fmt::Display for MemoryReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Memory requirements: approx. {} / {} bytes ({:.1}%)",
            self.progmem,
            self.ceiling,
            self.percent()
        )?;
        match self.severity() {
            Severity::Ok => Ok(()),
            severity => write!(f, " {}", severity.flag()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryStatus {
    Estimated(MemoryReport),
    /// The configuration could not be encoded
    Unavailable(String),
}

impl MemoryStatus {
    pub fn report(&self) -> Option<&MemoryReport> {
        match self {
            MemoryStatus::Estimated(report) => Some(report),
            MemoryStatus::Unavailable(_) => None,
        }
    }
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MemoryStatus::Estimated(report) => report.fmt(f),
            MemoryStatus::Unavailable(_) => f.write_str(UNAVAILABLE_MESSAGE),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::config::CompilerConfig;
    use crate::memory::*;

    fn report(progmem: usize) -> MemoryReport {
        MemoryReport::new(progmem, 0, &CompilerConfig::default())
    }

    #[test]
    fn bands() {
        // 79 % and 100 % of 28672
        assert_eq!(report(22650).severity(), Severity::Ok);
        assert_eq!(report(22938).severity(), Severity::Warning);
        assert_eq!(report(28671).severity(), Severity::Warning);
        assert_eq!(report(28672).severity(), Severity::Critical);
        assert!(!report(30000).fits());
    }

    #[test]
    fn status_line() {
        assert_eq!(
            report(7168).to_string(),
            "Memory requirements: approx. 7168 / 28672 bytes (25.0%)"
        );
        assert_eq!(
            report(24000).to_string(),
            "Memory requirements: approx. 24000 / 28672 bytes (83.7%) [ ! ]"
        );
        assert_eq!(
            report(28672).to_string(),
            "Memory requirements: approx. 28672 / 28672 bytes (100.0%) [!!!]"
        );
        let status = MemoryStatus::Unavailable("Step 1 (x) is invalid".into());
        assert_eq!(status.to_string(), UNAVAILABLE_MESSAGE);
        assert!(status.report().is_none());
    }
}
