//! Generación de código IC10.
//!
//! Un único recorrido sobre la IR, ya optimizada, que emite una línea de
//! ensamblador por instrucción. El programa resultante se envuelve entre
//! `start:` y `j start`, ya que la máquina objetivo lo ejecuta en ciclo
//! una vez por tick.

use thiserror::Error;
use tracing::debug;

use crate::{
    ir::{Instruction, IrProgram, Operand, Temp},
    lex::Identifier,
    parse::{ArithOp, RelOp},
};

pub use regs::{allocate, Interval, Register, REGISTER_COUNT};

use regs::Allocations;

mod regs;

/// Errores internos de generación de código.
///
/// Ninguno debería ocurrir para un programa que superó el análisis
/// semántico, excepto el agotamiento de registros.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum CodegenError {
    #[error("Program requires more than {} simultaneously live values (at `{0}`)", REGISTER_COUNT)]
    RegistersExhausted(Temp),

    #[error("Instance method `{0}` has no lowering")]
    UnsupportedMethod(Identifier),

    #[error("Function `{0}` has no lowering")]
    UnknownFunction(Identifier),

    #[error("Variable `{0}` has no storage")]
    UnboundVariable(Identifier),

    #[error("Expression does not resolve to a device")]
    UnresolvedDevice,
}

/// Traduce un programa a líneas de ensamblador IC10.
pub fn emit(program: &IrProgram) -> Result<Vec<String>, CodegenError> {
    let mut context = Context {
        lines: Vec::new(),
        regs: Allocations::new(&program.instructions),
    };

    context.push(String::from("start:"));
    for (index, instruction) in program.instructions.iter().enumerate() {
        context.instruction(index, instruction)?;
        context.regs.release(index, instruction);
    }

    emit!(context, "j", "start");

    debug!(lines = context.lines.len(), "emitted assembly");
    Ok(context.lines)
}

struct Context {
    lines: Vec<String>,
    regs: Allocations,
}

impl Context {
    fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    fn instruction(&mut self, index: usize, instruction: &Instruction) -> Result<(), CodegenError> {
        use Instruction::*;

        self.regs.touch(index, instruction)?;

        match instruction {
            LoadConst { target, value } => {
                let target = self.regs.bind(*target, index)?;
                emit!(self, "mov", "{} {}", target, value);
            }

            Binary {
                target,
                lhs,
                rhs,
                op,
            } => {
                let opcode = match op {
                    ArithOp::Add => "add",
                    ArithOp::Sub => "sub",
                    ArithOp::Mul => "mul",
                    ArithOp::Div => "div",
                };

                self.ternary(index, opcode, *target, lhs, rhs)?;
            }

            Compare {
                target,
                lhs,
                rhs,
                op,
            } => {
                let opcode = match op {
                    RelOp::Greater => "sgt",
                    RelOp::Less => "slt",
                    RelOp::GreaterOrEqual => "sge",
                    RelOp::LessOrEqual => "sle",
                    RelOp::Equal => "seq",
                    RelOp::NotEqual => "sne",
                };

                self.ternary(index, opcode, *target, lhs, rhs)?;
            }

            // Valores de verdad 0/1, sin cortocircuito
            And { target, lhs, rhs } => self.ternary(index, "mul", *target, lhs, rhs)?,
            Or { target, lhs, rhs } => {
                self.ternary(index, "add", *target, lhs, rhs)?;

                let target = self.regs.bind(*target, index)?;
                emit!(self, "sgt", "{0} {0} 0", target);
            }

            Load {
                target,
                device,
                property,
            } => {
                let target = self.regs.bind(*target, index)?;
                emit!(self, "l", "{} {} {}", target, device, property);
            }

            Store {
                device,
                property,
                value,
            } => {
                let value = self.operand(index, value)?;
                emit!(self, "s", "{} {} {}", device, property, value);
            }

            Move { target, source } => {
                let target = self.regs.bind(*target, index)?;
                let source = self.operand(index, source)?;
                emit!(self, "mov", "{} {}", target, source);
            }

            Jump(label) => emit!(self, "j", "{}", label),
            BranchIfZero(condition, label) => {
                let condition = self.operand(index, condition)?;
                emit!(self, "beqz", "{} {}", condition, label);
            }

            SetLabel(label) => self.push(format!("{}:", label)),
            Yield => emit!(self, "yield"),
        }

        Ok(())
    }

    fn ternary(
        &mut self,
        index: usize,
        opcode: &str,
        target: Temp,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<(), CodegenError> {
        let target = self.regs.bind(target, index)?;
        let lhs = self.operand(index, lhs)?;
        let rhs = self.operand(index, rhs)?;

        emit!(self, opcode, "{} {} {}", target, lhs, rhs);
        Ok(())
    }

    fn operand(&mut self, index: usize, operand: &Operand) -> Result<String, CodegenError> {
        match operand {
            Operand::Temp(temp) => Ok(self.regs.bind(*temp, index)?.to_string()),
            other => Ok(other.to_string()),
        }
    }
}
