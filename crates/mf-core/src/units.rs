// mf-core/src/units.rs

use crate::{MfError, MfResult, Real};
use uom::si::f64::{
    Angle, Area, Energy, Force, Length, Mass, Power, Pressure, ThermodynamicTemperature, Time,
    Velocity,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dimension {
    Length,
    Mass,
    Time,
    Temperature,
    Pressure,
    Velocity,
    Force,
    Power,
    Energy,
    Area,
    Angle,
}

/// Affine map from a unit to its SI base value: `si = value * scale + offset`.
#[derive(Clone, Copy, Debug)]
struct UnitDef {
    dim: Dimension,
    scale: Real,
    offset: Real,
}

macro_rules! unit_def {
    ($dim:ident, $q:ty, $u:ty) => {{
        let zero = <$q>::new::<$u>(0.0).value;
        UnitDef {
            dim: Dimension::$dim,
            scale: <$q>::new::<$u>(1.0).value - zero,
            offset: zero,
        }
    }};
}

fn lookup(unit: &str) -> Option<UnitDef> {
    use uom::si::{
        angle, area, energy, force, length, mass, power, pressure, thermodynamic_temperature as temp,
        time, velocity,
    };

    let def = match unit {
        "m" => unit_def!(Length, Length, length::meter),
        "cm" => unit_def!(Length, Length, length::centimeter),
        "mm" => unit_def!(Length, Length, length::millimeter),
        "km" => unit_def!(Length, Length, length::kilometer),
        "ft" => unit_def!(Length, Length, length::foot),
        "inch" => unit_def!(Length, Length, length::inch),
        "mi" => unit_def!(Length, Length, length::mile),
        "kg" => unit_def!(Mass, Mass, mass::kilogram),
        "g" => unit_def!(Mass, Mass, mass::gram),
        "lbm" => unit_def!(Mass, Mass, mass::pound),
        "s" => unit_def!(Time, Time, time::second),
        "min" => unit_def!(Time, Time, time::minute),
        "h" => unit_def!(Time, Time, time::hour),
        "K" => unit_def!(Temperature, ThermodynamicTemperature, temp::kelvin),
        "degC" => unit_def!(Temperature, ThermodynamicTemperature, temp::degree_celsius),
        "degF" => unit_def!(Temperature, ThermodynamicTemperature, temp::degree_fahrenheit),
        "degR" => unit_def!(Temperature, ThermodynamicTemperature, temp::degree_rankine),
        "Pa" => unit_def!(Pressure, Pressure, pressure::pascal),
        "kPa" => unit_def!(Pressure, Pressure, pressure::kilopascal),
        "MPa" => unit_def!(Pressure, Pressure, pressure::megapascal),
        "bar" => unit_def!(Pressure, Pressure, pressure::bar),
        "atm" => unit_def!(Pressure, Pressure, pressure::atmosphere),
        "psi" => unit_def!(Pressure, Pressure, pressure::pound_force_per_square_inch),
        "m/s" => unit_def!(Velocity, Velocity, velocity::meter_per_second),
        "km/h" => unit_def!(Velocity, Velocity, velocity::kilometer_per_hour),
        "ft/s" => unit_def!(Velocity, Velocity, velocity::foot_per_second),
        "N" => unit_def!(Force, Force, force::newton),
        "kN" => unit_def!(Force, Force, force::kilonewton),
        "lbf" => unit_def!(Force, Force, force::pound_force),
        "W" => unit_def!(Power, Power, power::watt),
        "kW" => unit_def!(Power, Power, power::kilowatt),
        "hp" => unit_def!(Power, Power, power::horsepower),
        "J" => unit_def!(Energy, Energy, energy::joule),
        "kJ" => unit_def!(Energy, Energy, energy::kilojoule),
        "m**2" => unit_def!(Area, Area, area::square_meter),
        "ft**2" => unit_def!(Area, Area, area::square_foot),
        "rad" => unit_def!(Angle, Angle, angle::radian),
        "deg" => unit_def!(Angle, Angle, angle::degree),
        _ => return None,
    };
    Some(def)
}

/// Element-wise affine conversion `to = from * scale + offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnitConversion {
    pub scale: Real,
    pub offset: Real,
}

impl UnitConversion {
    pub const IDENTITY: UnitConversion = UnitConversion {
        scale: 1.0,
        offset: 0.0,
    };

    pub fn apply(&self, value: Real) -> Real {
        value * self.scale + self.offset
    }

    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }
}

/// Conversion from `from` units into `to` units.
pub fn conversion(from: &str, to: &str) -> MfResult<UnitConversion> {
    if from == to {
        return Ok(UnitConversion::IDENTITY);
    }
    let src = lookup(from).ok_or_else(|| MfError::UnknownUnit {
        unit: from.to_string(),
    })?;
    let dst = lookup(to).ok_or_else(|| MfError::UnknownUnit {
        unit: to.to_string(),
    })?;
    if src.dim != dst.dim {
        return Err(MfError::IncompatibleUnits {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    Ok(UnitConversion {
        scale: src.scale / dst.scale,
        offset: (src.offset - dst.offset) / dst.scale,
    })
}
