pub mod compiler;
pub mod config;
pub mod encode;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod ids;
pub mod memory;
pub mod plate;
pub mod program;
pub mod session;
pub mod sizing;
pub mod sketch;
pub mod step;
pub mod template;
pub mod usage;
pub mod utils;

pub use compiler::*;
pub use config::*;
pub use error::{Error, Result};
pub use experiment::*;
pub use plate::*;
pub use program::*;
pub use step::*;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn optocompiler_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<Experiment>()?;
    Ok(())
}
