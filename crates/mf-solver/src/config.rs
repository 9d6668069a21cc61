//! YAML loading for solver configurations.

use serde::de::DeserializeOwned;

use crate::error::SolverResult;

/// Parse a configuration struct from YAML. Missing fields keep their
/// defaults.
pub fn from_yaml_str<T: DeserializeOwned>(text: &str) -> SolverResult<T> {
    Ok(serde_yaml::from_str(text)?)
}
