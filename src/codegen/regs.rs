//! Asignación de registros.
//!
//! Asignador por último uso: un barrido previo calcula el índice de la
//! última instrucción que menciona a cada temporal, ya sea como destino o
//! como operando. Los registros se asignan bajo demanda desde una pila de
//! registros libres y se devuelven a la pila justo después de emitir la
//! instrucción donde muere el temporal. No hay spilling.

use std::{
    collections::HashMap,
    fmt::{self, Display},
};

use tracing::trace;

use super::CodegenError;
use crate::ir::{Instruction, Temp};

/// Cantidad de registros de propósito general.
pub const REGISTER_COUNT: u8 = 16;

/// Registro físico, `r0` a `r15`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Register(u8);

impl Register {
    pub fn index(self) -> u8 {
        self.0
    }
}

impl Display for Register {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "r{}", self.0)
    }
}

/// Rango de instrucciones durante el cual un temporal ocupa un registro.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Interval {
    pub temp: Temp,
    pub register: Register,
    pub first: usize,
    pub last: usize,
}

impl Interval {
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

pub struct Allocations {
    bindings: HashMap<Temp, (Register, usize)>,
    free: Vec<Register>,
    last_use: HashMap<Temp, usize>,
    intervals: Vec<Interval>,
}

impl Allocations {
    pub fn new(instructions: &[Instruction]) -> Self {
        let mut last_use = HashMap::new();
        for (index, instruction) in instructions.iter().enumerate() {
            for temp in instruction.temps() {
                last_use.insert(temp, index);
            }
        }

        // `r0` queda en el tope
        let free = (0..REGISTER_COUNT).rev().map(Register).collect();

        Allocations {
            bindings: HashMap::new(),
            free,
            last_use,
            intervals: Vec::new(),
        }
    }

    /// Registro de un temporal, asignando uno si aún no lo tiene.
    pub fn bind(&mut self, temp: Temp, index: usize) -> Result<Register, CodegenError> {
        if let Some(&(register, _)) = self.bindings.get(&temp) {
            return Ok(register);
        }

        let register = self
            .free
            .pop()
            .ok_or(CodegenError::RegistersExhausted(temp))?;

        trace!(%temp, %register, index, "bind");
        self.bindings.insert(temp, (register, index));

        Ok(register)
    }

    /// Asigna todos los temporales de una instrucción, el destino primero.
    pub fn touch(&mut self, index: usize, instruction: &Instruction) -> Result<(), CodegenError> {
        for temp in instruction.temps() {
            self.bind(temp, index)?;
        }

        Ok(())
    }

    /// Libera los registros de temporales que mueren en esta instrucción.
    pub fn release(&mut self, index: usize, instruction: &Instruction) {
        for temp in instruction.temps() {
            if self.last_use.get(&temp) != Some(&index) {
                continue;
            }

            if let Some((register, first)) = self.bindings.remove(&temp) {
                trace!(%temp, %register, index, "release");

                self.free.push(register);
                self.intervals.push(Interval {
                    temp,
                    register,
                    first,
                    last: index,
                });
            }
        }
    }

    pub fn into_intervals(self) -> Vec<Interval> {
        self.intervals
    }
}

/// Ejecuta la asignación sin emitir código.
pub fn allocate(instructions: &[Instruction]) -> Result<Vec<Interval>, CodegenError> {
    let mut regs = Allocations::new(instructions);
    for (index, instruction) in instructions.iter().enumerate() {
        regs.touch(index, instruction)?;
        regs.release(index, instruction);
    }

    Ok(regs.into_intervals())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{Literal, Operand},
        parse::ArithOp,
    };

    fn load(target: u32, value: i32) -> Instruction {
        Instruction::LoadConst {
            target: Temp(target),
            value: Literal::Int(value),
        }
    }

    fn add(target: u32, lhs: u32, rhs: u32) -> Instruction {
        Instruction::Binary {
            target: Temp(target),
            lhs: Operand::Temp(Temp(lhs)),
            rhs: Operand::Temp(Temp(rhs)),
            op: ArithOp::Add,
        }
    }

    #[test]
    fn registers_are_reused_after_last_use() {
        let program = [load(0, 1), load(1, 2), add(2, 0, 1), add(3, 2, 2)];
        let intervals = allocate(&program).unwrap();

        let register_of = |temp| {
            intervals
                .iter()
                .find(|interval| interval.temp == Temp(temp))
                .map(|interval| interval.register.index())
                .unwrap()
        };

        assert_eq!(register_of(0), 0);
        assert_eq!(register_of(1), 1);
        assert_eq!(register_of(2), 2);

        // `t0` y `t1` mueren en la instrucción 2, se devuelven en ese orden
        assert_eq!(register_of(3), 1);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut program: Vec<_> = (0..17).map(|temp| load(temp, 0)).collect();
        program.push(Instruction::Store {
            device: crate::devices::Device::Base,
            property: "Setting".into(),
            value: Operand::Temp(Temp(0)),
        });

        for temp in 1..17 {
            program.push(Instruction::Move {
                target: Temp(0),
                source: Operand::Temp(Temp(temp)),
            });
        }

        assert_eq!(
            allocate(&program).unwrap_err(),
            CodegenError::RegistersExhausted(Temp(16))
        );
    }

    #[test]
    fn live_intervals_never_share_registers() {
        let program = [load(0, 1), load(1, 2), add(2, 0, 1), load(3, 4), add(4, 2, 3), add(5, 4, 1)];
        let intervals = allocate(&program).unwrap();

        for a in &intervals {
            for b in &intervals {
                if a.temp != b.temp && a.overlaps(b) {
                    assert_ne!(a.register, b.register, "{:?} and {:?}", a, b);
                }
            }
        }
    }
}
