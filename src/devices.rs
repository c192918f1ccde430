//! Dispositivos y su tabla de miembros.
//!
//! Un programa controla hasta seis dispositivos conectados (`d0` a `d5`)
//! además de la placa base que lo ejecuta (`db`). Todo dispositivo
//! referenciado por `referenceDevice()` expone el mismo conjunto fijo de
//! propiedades lógicas. Esta tabla es global, de solo lectura, y se
//! inicializa una única vez.

use crate::semantic::{Signature, Type};
use lazy_static::lazy_static;
use std::{
    collections::HashMap,
    fmt::{self, Display},
    str::FromStr,
};

/// Cantidad de pines de dispositivo.
pub const PIN_COUNT: u8 = 6;

/// Identificador de dispositivo.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Device {
    /// `d0` a `d5`.
    Pin(u8),

    /// `db`, la placa que ejecuta el programa.
    Base,
}

impl Display for Device {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Pin(pin) => write!(fmt, "d{}", pin),
            Device::Base => fmt.write_str("db"),
        }
    }
}

impl FromStr for Device {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string.as_bytes() {
            b"db" => Ok(Device::Base),
            [b'd', digit] if digit.is_ascii_digit() && digit - b'0' < PIN_COUNT => {
                Ok(Device::Pin(digit - b'0'))
            }

            _ => Err(()),
        }
    }
}

/// Un miembro de un tipo con miembros.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Member {
    /// Propiedad legible y escribible.
    Property(Type),

    /// Método invocable.
    Method(&'static Signature),
}

/// Tabla ordenada de miembros.
pub struct MemberTable {
    names: Vec<&'static str>,
    members: HashMap<&'static str, Member>,
}

impl MemberTable {
    /// Busca un miembro por nombre exacto.
    pub fn get(&self, name: &str) -> Option<Member> {
        self.members.get(name).copied()
    }

    /// Nombres de todos los miembros, en orden de declaración.
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    /// Sugiere un miembro que solo difiere en mayúsculas y minúsculas.
    pub fn suggest(&self, name: &str) -> Option<&'static str> {
        self.names
            .iter()
            .copied()
            .find(|candidate| unicase::eq_ascii(*candidate, name))
    }
}

/// Propiedades lógicas de tipo booleano.
const BOOLEAN_PROPERTIES: &[&str] = &["Error", "Filtration", "Harvest", "Idle", "Lock", "On"];

/// Propiedades lógicas conocidas. Todo lo que no es booleano es `Float`.
const PROPERTIES: &[&str] = &[
    "Activate",
    "AirRelease",
    "CompletionRatio",
    "ElevatorLevel",
    "ElevatorSpeed",
    "Error",
    "ExportCount",
    "Filtration",
    "Harvest",
    "Horizontal",
    "HorizontalRatio",
    "Idle",
    "ImportCount",
    "Lock",
    "Maximum",
    "Mode",
    "On",
    "Open",
    "Output",
    "Plant",
    "PositionX",
    "PositionY",
    "PositionZ",
    "Power",
    "PowerActual",
    "PowerPotential",
    "PowerRequired",
    "Pressure",
    "PressureExternal",
    "PressureInteral",
    "PressureSetting",
    "Quantity",
    "Ratio",
    "RatioCarbonDioxide",
    "RatioNitrogen",
    "RatioOxygen",
    "RatioPollutant",
    "RatioVolatiles",
    "RatioWater",
    "Reagents",
    "RecipeHash",
    "ReferenceId",
    "RequestHash",
    "RequiredPower",
    "Setting",
    "SolarAngle",
    "Temperature",
    "TemperatureSettings",
    "TotalMoles",
    "VelocityMagnitude",
    "VelocityRelativeX",
    "VelocityRelativeY",
    "VelocityRelativeZ",
    "Vertical",
    "VerticalRatio",
    "Volume",
];

lazy_static! {
    static ref STATIONEERS_DEVICE: MemberTable = {
        let members = PROPERTIES
            .iter()
            .map(|&name| {
                let typ = if BOOLEAN_PROPERTIES.contains(&name) {
                    Type::Boolean
                } else {
                    Type::Float
                };

                (name, Member::Property(typ))
            })
            .collect();

        MemberTable {
            names: PROPERTIES.to_vec(),
            members,
        }
    };
}

/// Miembros de `StationeersDevice`.
pub fn stationeers_device() -> &'static MemberTable {
    &STATIONEERS_DEVICE
}

/// Determina si un término es el nombre de una propiedad lógica.
pub fn is_property(name: &str) -> bool {
    stationeers_device().get(name).is_some()
}

/// Constantes integradas de la máquina objetivo.
const CONSTANTS: &[&str] = &["pi", "deg2rad", "rad2deg", "epsilon", "nan", "pinf", "ninf"];

pub fn is_constant(name: &str) -> bool {
    CONSTANTS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids() {
        assert_eq!("d0".parse::<Device>(), Ok(Device::Pin(0)));
        assert_eq!("d5".parse::<Device>(), Ok(Device::Pin(5)));
        assert_eq!("db".parse::<Device>(), Ok(Device::Base));
        assert_eq!("d6".parse::<Device>(), Err(()));
        assert_eq!("d".parse::<Device>(), Err(()));
        assert_eq!("d01".parse::<Device>(), Err(()));
        assert_eq!(Device::Pin(3).to_string(), "d3");
    }

    #[test]
    fn property_types() {
        let table = stationeers_device();
        assert_eq!(table.get("On"), Some(Member::Property(Type::Boolean)));
        assert_eq!(table.get("Temperature"), Some(Member::Property(Type::Float)));
        assert_eq!(table.get("temperature"), None);
        assert_eq!(table.names().len(), PROPERTIES.len());
    }

    #[test]
    fn suggestions_ignore_case() {
        let table = stationeers_device();
        assert_eq!(table.suggest("temperature"), Some("Temperature"));
        assert_eq!(table.suggest("Warp"), None);
    }
}
