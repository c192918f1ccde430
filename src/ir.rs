//! Representación intermedia.
//!
//! Lista plana de instrucciones sobre temporales virtuales (`t0`, `t1`, ...)
//! y etiquetas (`L0`, `L1`, ...), ambas numeradas en orden de creación.
//! Los operandos pueden ser temporales, inmediatos, dispositivos o
//! símbolos que la máquina objetivo resuelve por nombre.

use std::{
    fmt::{self, Display},
    rc::Rc,
};

use crate::{
    devices::Device,
    parse::{ArithOp, RelOp},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Temp(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

/// Constante numérica.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Literal {
    Int(i32),
    Float(f64),
}

impl Literal {
    pub fn to_f64(self) -> f64 {
        match self {
            Literal::Int(integer) => integer as f64,
            Literal::Float(float) => float,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Temp(Temp),
    Int(i32),
    Float(f64),
    Device(Device),

    /// Constantes, nombres de propiedades y cadenas.
    Symbol(Rc<str>),
}

impl Operand {
    pub fn temp(&self) -> Option<Temp> {
        match self {
            Operand::Temp(temp) => Some(*temp),
            _ => None,
        }
    }

    pub fn literal(&self) -> Option<Literal> {
        match self {
            Operand::Int(integer) => Some(Literal::Int(*integer)),
            Operand::Float(float) => Some(Literal::Float(*float)),
            _ => None,
        }
    }
}

impl From<Literal> for Operand {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Int(integer) => Operand::Int(integer),
            Literal::Float(float) => Operand::Float(float),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    LoadConst {
        target: Temp,
        value: Literal,
    },

    Binary {
        target: Temp,
        lhs: Operand,
        rhs: Operand,
        op: ArithOp,
    },

    Compare {
        target: Temp,
        lhs: Operand,
        rhs: Operand,
        op: RelOp,
    },

    And {
        target: Temp,
        lhs: Operand,
        rhs: Operand,
    },

    Or {
        target: Temp,
        lhs: Operand,
        rhs: Operand,
    },

    Load {
        target: Temp,
        device: Device,
        property: Rc<str>,
    },

    Store {
        device: Device,
        property: Rc<str>,
        value: Operand,
    },

    Move {
        target: Temp,
        source: Operand,
    },

    Jump(Label),
    BranchIfZero(Operand, Label),
    SetLabel(Label),
    Yield,
}

impl Instruction {
    /// Temporal que esta instrucción escribe, si alguno.
    pub fn target(&self) -> Option<Temp> {
        use Instruction::*;

        match self {
            LoadConst { target, .. }
            | Binary { target, .. }
            | Compare { target, .. }
            | And { target, .. }
            | Or { target, .. }
            | Load { target, .. }
            | Move { target, .. } => Some(*target),

            Store { .. } | Jump(_) | BranchIfZero(..) | SetLabel(_) | Yield => None,
        }
    }

    /// Operandos leídos, en orden.
    pub fn sources(&self) -> Vec<&Operand> {
        use Instruction::*;

        match self {
            Binary { lhs, rhs, .. }
            | Compare { lhs, rhs, .. }
            | And { lhs, rhs, .. }
            | Or { lhs, rhs, .. } => vec![lhs, rhs],

            Store { value, .. } => vec![value],
            Move { source, .. } => vec![source],
            BranchIfZero(condition, _) => vec![condition],
            LoadConst { .. } | Load { .. } | Jump(_) | SetLabel(_) | Yield => Vec::new(),
        }
    }

    /// Temporales mencionados, el destino primero y sin repeticiones.
    pub fn temps(&self) -> Vec<Temp> {
        let mut temps: Vec<Temp> = self.target().into_iter().collect();
        for temp in self.sources().into_iter().filter_map(Operand::temp) {
            if !temps.contains(&temp) {
                temps.push(temp);
            }
        }

        temps
    }

    /// Determina si la instrucción tiene efectos observables en dispositivos.
    pub fn is_effect(&self) -> bool {
        matches!(
            self,
            Instruction::Load { .. } | Instruction::Store { .. } | Instruction::Yield
        )
    }
}

/// Programa en representación intermedia.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IrProgram {
    pub instructions: Vec<Instruction>,

    /// Reservado. La construcción actual nunca lo asigna.
    pub result: Option<Temp>,
}

impl Display for Temp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "t{}", self.0)
    }
}

impl Display for Label {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "L{}", self.0)
    }
}

impl Display for Literal {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(integer) => write!(fmt, "{}", integer),
            Literal::Float(float) => write!(fmt, "{}", float),
        }
    }
}

impl Display for Operand {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Temp(temp) => temp.fmt(fmt),
            Operand::Int(integer) => write!(fmt, "{}", integer),
            Operand::Float(float) => write!(fmt, "{}", float),
            Operand::Device(device) => device.fmt(fmt),
            Operand::Symbol(symbol) => fmt.write_str(symbol),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;

        match self {
            LoadConst { target, value } => write!(fmt, "{} = const {}", target, value),
            Binary {
                target,
                lhs,
                rhs,
                op,
            } => write!(fmt, "{} = {} {} {}", target, lhs, op, rhs),

            Compare {
                target,
                lhs,
                rhs,
                op,
            } => write!(fmt, "{} = {} {} {}", target, lhs, op, rhs),

            And { target, lhs, rhs } => write!(fmt, "{} = {} && {}", target, lhs, rhs),
            Or { target, lhs, rhs } => write!(fmt, "{} = {} || {}", target, lhs, rhs),

            Load {
                target,
                device,
                property,
            } => write!(fmt, "{} = load {}.{}", target, device, property),

            Store {
                device,
                property,
                value,
            } => write!(fmt, "store {}.{} = {}", device, property, value),

            Move { target, source } => write!(fmt, "{} = move {}", target, source),
            Jump(label) => write!(fmt, "jump {}", label),
            BranchIfZero(condition, label) => write!(fmt, "beqz {} {}", condition, label),
            SetLabel(label) => write!(fmt, "{}:", label),
            Yield => fmt.write_str("yield"),
        }
    }
}

impl Display for IrProgram {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            match instruction {
                Instruction::SetLabel(_) => writeln!(fmt, "{}", instruction)?,
                _ => writeln!(fmt, "    {}", instruction)?,
            }
        }

        Ok(())
    }
}
