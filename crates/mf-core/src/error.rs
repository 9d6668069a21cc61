use thiserror::Error;

pub type MfResult<T> = Result<T, MfError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MfError {
    #[error("Unknown unit '{unit}'")]
    UnknownUnit { unit: String },

    #[error("Incompatible units: cannot convert '{from}' to '{to}'")]
    IncompatibleUnits { from: String, to: String },
}
