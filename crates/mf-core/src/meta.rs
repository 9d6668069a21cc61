//! Static variable schema.
//!
//! Components declare a fixed table of variables at construction; the graph
//! and the execution layer only ever consult this table.

/// Data-flow role of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Io {
    /// Read by its owner.
    In,
    /// Written by its owner.
    Out,
    /// Implicit unknown owned by its component, paired with a residual.
    State,
    /// Defect reported by an implicit component for one of its states.
    Residual,
}

impl Io {
    /// True when data flows out of the owning component (or into the
    /// assembly from the outside, for boundary inputs).
    pub fn is_output_side(self) -> bool {
        !matches!(self, Io::In)
    }
}

/// Declaration of one variable.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VarMeta {
    pub name: String,
    pub io: Io,
    /// Row-major array shape; empty for scalars.
    pub shape: Vec<usize>,
    pub units: Option<String>,
    pub low: Option<f64>,
    pub high: Option<f64>,
    /// Excluded from derivative computation.
    pub noflat: bool,
    /// Must be connected before execution.
    pub required: bool,
}

impl VarMeta {
    pub fn new(name: impl Into<String>, io: Io) -> Self {
        Self {
            name: name.into(),
            io,
            shape: Vec::new(),
            units: None,
            low: None,
            high: None,
            noflat: false,
            required: false,
        }
    }

    pub fn input(name: impl Into<String>) -> Self {
        Self::new(name, Io::In)
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::new(name, Io::Out)
    }

    pub fn state(name: impl Into<String>) -> Self {
        Self::new(name, Io::State)
    }

    pub fn residual(name: impl Into<String>) -> Self {
        Self::new(name, Io::Residual)
    }

    pub fn with_shape(mut self, shape: impl Into<Vec<usize>>) -> Self {
        self.shape = shape.into();
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_bounds(mut self, low: f64, high: f64) -> Self {
        self.low = Some(low);
        self.high = Some(high);
        self
    }

    pub fn noflat(mut self) -> Self {
        self.noflat = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Number of flattened entries.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }
}
