use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Element type of a tensor, numbered the way the runtime numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Uint8,
    Int8,
    Int16,
    Int,
    Int64,
    Half,
    Float,
    Double,
    ComplexHalf,
    ComplexFloat,
    ComplexDouble,
    Bool,
}

impl Kind {
    pub fn c_int(self) -> i32 {
        match self {
            Kind::Uint8 => 0,
            Kind::Int8 => 1,
            Kind::Int16 => 2,
            Kind::Int => 3,
            Kind::Int64 => 4,
            Kind::Half => 5,
            Kind::Float => 6,
            Kind::Double => 7,
            Kind::ComplexHalf => 8,
            Kind::ComplexFloat => 9,
            Kind::ComplexDouble => 10,
            Kind::Bool => 11,
        }
    }

    pub fn of_c_int(v: i32) -> Result<Kind> {
        let kind = match v {
            0 => Kind::Uint8,
            1 => Kind::Int8,
            2 => Kind::Int16,
            3 => Kind::Int,
            4 => Kind::Int64,
            5 => Kind::Half,
            6 => Kind::Float,
            7 => Kind::Double,
            8 => Kind::ComplexHalf,
            9 => Kind::ComplexFloat,
            10 => Kind::ComplexDouble,
            11 => Kind::Bool,
            _ => return Err(BridgeError::runtime(format!("unknown scalar type {}", v))),
        };
        Ok(kind)
    }

    pub fn elt_size_in_bytes(self) -> usize {
        match self {
            Kind::Uint8 | Kind::Int8 | Kind::Bool => 1,
            Kind::Int16 | Kind::Half => 2,
            Kind::Int | Kind::Float | Kind::ComplexHalf => 4,
            Kind::Int64 | Kind::Double | Kind::ComplexFloat => 8,
            Kind::ComplexDouble => 16,
        }
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, Kind::Half | Kind::Float | Kind::Double)
    }

    /// Result kind of a binary op mixing `self` and `other`.
    pub fn promote(self, other: Kind) -> Kind {
        fn rank(k: Kind) -> u8 {
            match k {
                Kind::Bool => 0,
                Kind::Uint8 => 1,
                Kind::Int8 => 2,
                Kind::Int16 => 3,
                Kind::Int => 4,
                Kind::Int64 => 5,
                Kind::Half => 6,
                Kind::Float => 7,
                Kind::Double => 8,
                Kind::ComplexHalf => 9,
                Kind::ComplexFloat => 10,
                Kind::ComplexDouble => 11,
            }
        }
        if rank(self) >= rank(other) {
            self
        } else {
            other
        }
    }

    pub(crate) fn type_name(self) -> &'static str {
        match self {
            Kind::Uint8 => "Byte",
            Kind::Int8 => "Char",
            Kind::Int16 => "Short",
            Kind::Int => "Int",
            Kind::Int64 => "Long",
            Kind::Half => "Half",
            Kind::Float => "Float",
            Kind::Double => "Double",
            Kind::ComplexHalf => "ComplexHalf",
            Kind::ComplexFloat => "ComplexFloat",
            Kind::ComplexDouble => "ComplexDouble",
            Kind::Bool => "Bool",
        }
    }
}

/// Where a tensor lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn c_int(self) -> i32 {
        match self {
            Device::Cpu => -1,
            Device::Cuda(i) => i as i32,
        }
    }

    pub fn of_c_int(v: i32) -> Device {
        if v < 0 {
            Device::Cpu
        } else {
            Device::Cuda(v as usize)
        }
    }
}
