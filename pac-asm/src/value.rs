//! Decoded argument values and their classes.
//!
//! Composite arguments carry a leading type byte that selects the value
//! class at runtime; the template only says "composite". The decoded slot
//! therefore records the class that was actually produced, which is what
//! every later analysis keys on.

use std::fmt;

use crate::catalog::{CountKind, ParamKind};

/// Value class selected by the first byte of a composite argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeByte {
    /// `0x1`: one-byte immediate (used for code offsets).
    OneByte,
    /// `0x2`: integer constant.
    IntConst,
    /// `0x4`: local integer variable.
    IntLocal,
    /// `0x8`: global integer variable.
    IntGlobal,
    /// `0x10`: float constant.
    FloatConst,
    /// `0x20`: local float variable.
    FloatLocal,
    /// `0x40`: global float variable.
    FloatGlobal,
    /// Anything else.
    Unknown,
}

impl TypeByte {
    /// Classify a raw type byte.
    pub fn classify(byte: u8) -> TypeByte {
        match byte {
            0x1 => TypeByte::OneByte,
            0x2 => TypeByte::IntConst,
            0x4 => TypeByte::IntLocal,
            0x8 => TypeByte::IntGlobal,
            0x10 => TypeByte::FloatConst,
            0x20 => TypeByte::FloatLocal,
            0x40 => TypeByte::FloatGlobal,
            _ => TypeByte::Unknown,
        }
    }

    /// The label the disassembly uses for this class.
    pub fn label(self) -> &'static str {
        match self {
            TypeByte::OneByte => "0x1 value",
            TypeByte::IntConst => "uint32_t",
            TypeByte::IntLocal => "0x4 variable",
            TypeByte::IntGlobal => "0x8 variable",
            TypeByte::FloatConst => "float",
            TypeByte::FloatLocal => "0x20 variable",
            TypeByte::FloatGlobal => "0x40 variable",
            TypeByte::Unknown => "Unknown",
        }
    }

    /// Whether the class is a variable reference (local or global).
    pub fn is_variable(self) -> bool {
        matches!(
            self,
            TypeByte::IntLocal | TypeByte::IntGlobal | TypeByte::FloatLocal | TypeByte::FloatGlobal
        )
    }
}

/// A typed variable reference decoded from a composite argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarRef {
    /// Which variable bank.
    pub class: TypeByte,
    /// Index within the bank.
    pub index: u32,
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Immediate or constant integer.
    Int(u32),
    /// Float constant.
    Float(f32),
    /// Shift-JIS string (NUL stripped).
    Str(String),
    /// Variable reference.
    Var(VarRef),
}

impl Value {
    /// The integer payload, for values that can denote a file offset.
    pub fn as_word(&self) -> Option<u32> {
        match self {
            Value::Int(word) => Some(*word),
            Value::Var(var) => Some(var.index),
            Value::Float(_) | Value::Str(_) => None,
        }
    }
}

/// What a decoded slot is, as opposed to what the template asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotClass {
    /// A non-composite parameter, kept as the template declared it.
    Param(ParamKind),
    /// A composite parameter resolved to its runtime class.
    Composite(TypeByte),
    /// A composite element of a count argument.
    CountComposite {
        /// Count header encoding of the owning argument.
        count: CountKind,
        /// Resolved element class.
        ty: TypeByte,
        /// Element index.
        index: u32,
    },
    /// A plain-word element of a count argument.
    CountPlain {
        /// Count header encoding of the owning argument.
        count: CountKind,
        /// Element index.
        index: u32,
    },
    /// One trailing word of a `CONTINOUS_*` argument.
    ContinuousElem(u32),
}

impl fmt::Display for SlotClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotClass::Param(kind) => f.write_str(kind.tag()),
            SlotClass::Composite(ty) => f.write_str(ty.label()),
            SlotClass::CountComposite { count, ty, index } => {
                write!(f, "count_{} {} {}", count.token(), ty.label(), index)
            }
            SlotClass::CountPlain { count, index } => {
                write!(f, "count_{}_{}", count.token(), index)
            }
            SlotClass::ContinuousElem(index) => write!(f, "continuous_{index}"),
        }
    }
}

/// A decoded argument slot: its class plus the template parameter name.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSlot {
    /// Resolved class.
    pub class: SlotClass,
    /// Parameter name from the template ("Unknown" for anonymous elements).
    pub name: String,
}

impl ArgSlot {
    /// The variable reference class, for variable-use indexing.
    pub fn var_class(&self) -> Option<TypeByte> {
        match &self.class {
            SlotClass::Composite(ty) if ty.is_variable() => Some(*ty),
            _ => None,
        }
    }

    /// Whether the slot is a `0x1` immediate.
    pub fn is_one_byte(&self) -> bool {
        matches!(self.class, SlotClass::Composite(TypeByte::OneByte))
    }

    /// Whether the slot is an integer constant (plain or composite `0x2`).
    pub fn is_int_const(&self) -> bool {
        matches!(
            self.class,
            SlotClass::Composite(TypeByte::IntConst) | SlotClass::Param(ParamKind::Uint32)
        )
    }

    /// Whether the slot is a float constant (plain or composite `0x10`).
    pub fn is_float_const(&self) -> bool {
        matches!(
            self.class,
            SlotClass::Composite(TypeByte::FloatConst) | SlotClass::Param(ParamKind::Float)
        )
    }

    /// Whether the slot is a bare 4-byte word (`uint32_t_P` / `uintX_t`).
    pub fn is_plain_word(&self) -> bool {
        matches!(
            self.class,
            SlotClass::Param(ParamKind::Uint32P) | SlotClass::Param(ParamKind::UintX)
        )
    }

    /// Whether the slot can carry an immediate code address: a `0x1` value
    /// or a bare word. This is the callback-destination test.
    pub fn is_immediate_address(&self) -> bool {
        self.is_one_byte() || self.is_plain_word()
    }
}

/// One decoded argument: slot description plus value.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    /// Slot description.
    pub slot: ArgSlot,
    /// Decoded value.
    pub value: Value,
}
