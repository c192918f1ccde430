//! Optimizaciones sobre la IR.
//!
//! Cada optimización es una pasada independiente que recibe una lista de
//! instrucciones y produce otra. Las pasadas habilitadas se ejecutan en un
//! orden fijo: primero plegado de constantes y luego fusión de movimientos.
//! Ninguna pasada altera el orden ni la cantidad de lecturas, escrituras o
//! `yield` sobre dispositivos.

use std::collections::HashMap;

use bitflags::bitflags;
use tracing::{debug, trace};

use crate::{
    ir::{Instruction, IrProgram, Label, Literal, Operand, Temp},
    parse::{ArithOp, RelOp},
};

bitflags! {
    /// Pasadas de optimización a aplicar.
    pub struct Passes: u32 {
        /// Sustituye temporales de valor conocido por inmediatos, evalúa
        /// operaciones entre constantes y elimina cargas sin lectores.
        const CONSTANT_FOLDING = 0b01;

        /// Calcula directamente sobre la variable destino cuando una
        /// operación es seguida de la copia de su resultado.
        const MOVE_FUSION = 0b10;
    }
}

/// Una transformación de IR a IR.
pub trait Pass {
    fn name(&self) -> &'static str;

    fn run(&self, instructions: Vec<Instruction>) -> Vec<Instruction>;
}

pub struct ConstantFolding;

pub struct MoveFusion;

/// Aplica las pasadas habilitadas.
pub fn optimize(program: IrProgram, passes: Passes) -> IrProgram {
    let mut pipeline: Vec<&dyn Pass> = Vec::new();
    if passes.contains(Passes::CONSTANT_FOLDING) {
        pipeline.push(&ConstantFolding);
    }

    if passes.contains(Passes::MOVE_FUSION) {
        pipeline.push(&MoveFusion);
    }

    let IrProgram {
        mut instructions,
        result,
    } = program;

    for pass in pipeline {
        let before = instructions.len();
        instructions = pass.run(instructions);

        debug!(
            pass = pass.name(),
            before,
            after = instructions.len(),
            "optimization pass"
        );
    }

    IrProgram {
        instructions,
        result,
    }
}

impl Pass for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn run(&self, mut instructions: Vec<Instruction>) -> Vec<Instruction> {
        let definitions = definitions(&instructions);
        let conditional = conditional(&instructions);

        // `known` vale solo hasta la siguiente etiqueta; `global` contiene
        // constantes con una única definición que siempre se ejecuta
        let mut known: HashMap<Temp, Literal> = HashMap::new();
        let mut global: HashMap<Temp, Literal> = HashMap::new();

        for (index, instruction) in instructions.iter_mut().enumerate() {
            let lookup = |temp: Temp| known.get(&temp).or_else(|| global.get(&temp)).copied();

            match instruction {
                Instruction::Binary { lhs, rhs, .. }
                | Instruction::Compare { lhs, rhs, .. }
                | Instruction::And { lhs, rhs, .. }
                | Instruction::Or { lhs, rhs, .. } => {
                    substitute(lhs, lookup);
                    substitute(rhs, lookup);
                }

                Instruction::Store { value, .. } => substitute(value, lookup),

                Instruction::SetLabel(_) => known.clear(),
                _ => (),
            }

            if let Some(value) = evaluate(instruction) {
                if let Some(target) = instruction.target() {
                    trace!(%target, %value, "folded");
                    *instruction = Instruction::LoadConst { target, value };
                }
            }

            let target = match instruction.target() {
                Some(target) => target,
                None => continue,
            };

            match instruction {
                Instruction::LoadConst { value, .. } => {
                    known.insert(target, *value);
                    if definitions.get(&target) == Some(&1) && !conditional[index] {
                        global.insert(target, *value);
                    }
                }

                _ => {
                    known.remove(&target);
                }
            }
        }

        let reads = reads(&instructions);
        instructions.retain(|instruction| match instruction {
            Instruction::LoadConst { target, .. } => reads.contains_key(target),
            _ => true,
        });

        instructions
    }
}

impl Pass for MoveFusion {
    fn name(&self) -> &'static str {
        "move-fusion"
    }

    fn run(&self, instructions: Vec<Instruction>) -> Vec<Instruction> {
        let definitions = definitions(&instructions);
        let reads = reads(&instructions);

        let mut fused = Vec::with_capacity(instructions.len());
        let mut instructions = instructions.into_iter().peekable();

        while let Some(instruction) = instructions.next() {
            if let Instruction::Binary {
                target,
                lhs: Operand::Temp(variable),
                rhs,
                op,
            } = &instruction
            {
                let single = definitions.get(target) == Some(&1) && reads.get(target) == Some(&1);
                let copies_back = matches!(
                    instructions.peek(),
                    Some(Instruction::Move {
                        target: destination,
                        source: Operand::Temp(source),
                    }) if destination == variable && source == target
                );

                if single && copies_back && target != variable {
                    trace!(%target, %variable, "fused");

                    fused.push(Instruction::Binary {
                        target: *variable,
                        lhs: Operand::Temp(*variable),
                        rhs: rhs.clone(),
                        op: *op,
                    });

                    instructions.next();
                    continue;
                }
            }

            fused.push(instruction);
        }

        fused
    }
}

/// Cantidad de definiciones por temporal.
fn definitions(instructions: &[Instruction]) -> HashMap<Temp, usize> {
    let mut definitions = HashMap::new();
    for target in instructions.iter().filter_map(Instruction::target) {
        *definitions.entry(target).or_insert(0) += 1;
    }

    definitions
}

/// Cantidad de lecturas por temporal.
fn reads(instructions: &[Instruction]) -> HashMap<Temp, usize> {
    let mut reads = HashMap::new();
    for instruction in instructions {
        for temp in instruction.sources().into_iter().filter_map(Operand::temp) {
            *reads.entry(temp).or_insert(0) += 1;
        }
    }

    reads
}

/// Marca las instrucciones que se encuentran estrictamente entre un salto
/// y su etiqueta destino.
fn conditional(instructions: &[Instruction]) -> Vec<bool> {
    let labels: HashMap<Label, usize> = instructions
        .iter()
        .enumerate()
        .filter_map(|(index, instruction)| match instruction {
            Instruction::SetLabel(label) => Some((*label, index)),
            _ => None,
        })
        .collect();

    let mut conditional = vec![false; instructions.len()];
    for (index, instruction) in instructions.iter().enumerate() {
        let label = match instruction {
            Instruction::Jump(label) | Instruction::BranchIfZero(_, label) => label,
            _ => continue,
        };

        if let Some(&destination) = labels.get(label) {
            let (from, to) = (index.min(destination), index.max(destination));
            for flag in &mut conditional[from + 1..to] {
                *flag = true;
            }
        }
    }

    conditional
}

fn substitute(operand: &mut Operand, lookup: impl Fn(Temp) -> Option<Literal>) {
    if let Some(value) = operand.temp().and_then(lookup) {
        *operand = Operand::from(value);
    }
}

/// Resultado de una operación cuyos operandos son todos inmediatos.
fn evaluate(instruction: &Instruction) -> Option<Literal> {
    use Instruction::*;

    let truth = |condition: bool| Literal::Int(condition as i32);

    match instruction {
        Binary { lhs, rhs, op, .. } => arithmetic(*op, lhs.literal()?, rhs.literal()?),

        Compare { lhs, rhs, op, .. } => {
            let (lhs, rhs) = (lhs.literal()?.to_f64(), rhs.literal()?.to_f64());
            let result = match op {
                RelOp::Equal => lhs == rhs,
                RelOp::NotEqual => lhs != rhs,
                RelOp::Greater => lhs > rhs,
                RelOp::GreaterOrEqual => lhs >= rhs,
                RelOp::Less => lhs < rhs,
                RelOp::LessOrEqual => lhs <= rhs,
            };

            Some(truth(result))
        }

        And { lhs, rhs, .. } => arithmetic(ArithOp::Mul, lhs.literal()?, rhs.literal()?),
        Or { lhs, rhs, .. } => {
            let sum = lhs.literal()?.to_f64() + rhs.literal()?.to_f64();
            Some(truth(sum > 0.0))
        }

        _ => None,
    }
}

fn arithmetic(op: ArithOp, lhs: Literal, rhs: Literal) -> Option<Literal> {
    let (a, b) = (lhs.to_f64(), rhs.to_f64());
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div if b == 0.0 => return None,
        ArithOp::Div => a / b,
    };

    // IC10 no tiene literales para infinitos ni NaN
    if !result.is_finite() {
        return None;
    }

    let integral = result.fract() == 0.0 && result >= i32::MIN as f64 && result <= i32::MAX as f64;
    match (lhs, rhs) {
        (Literal::Int(_), Literal::Int(_)) if integral => Some(Literal::Int(result as i32)),
        _ => Some(Literal::Float(result)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Device;

    fn constant(target: u32, value: Literal) -> Instruction {
        Instruction::LoadConst {
            target: Temp(target),
            value,
        }
    }

    fn temp(temp: u32) -> Operand {
        Operand::Temp(Temp(temp))
    }

    fn store(value: Operand) -> Instruction {
        Instruction::Store {
            device: Device::Pin(0),
            property: "Setting".into(),
            value,
        }
    }

    fn lines(instructions: &[Instruction]) -> Vec<String> {
        instructions.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn folds_chains_of_constants() {
        let program = vec![
            constant(0, Literal::Int(2)),
            constant(1, Literal::Int(3)),
            Instruction::Binary {
                target: Temp(2),
                lhs: temp(0),
                rhs: temp(1),
                op: ArithOp::Mul,
            },
            constant(3, Literal::Float(0.5)),
            Instruction::Binary {
                target: Temp(4),
                lhs: temp(2),
                rhs: temp(3),
                op: ArithOp::Add,
            },
            store(temp(4)),
        ];

        assert_eq!(lines(&ConstantFolding.run(program)), vec!["store d0.Setting = 6.5"]);
    }

    #[test]
    fn integer_results_stay_integers() {
        assert_eq!(arithmetic(ArithOp::Div, Literal::Int(6), Literal::Int(3)), Some(Literal::Int(2)));
        assert_eq!(
            arithmetic(ArithOp::Div, Literal::Int(7), Literal::Int(2)),
            Some(Literal::Float(3.5))
        );

        assert_eq!(arithmetic(ArithOp::Div, Literal::Int(1), Literal::Int(0)), None);
    }

    #[test]
    fn non_finite_results_are_not_folded() {
        assert_eq!(
            arithmetic(ArithOp::Mul, Literal::Float(f64::MAX), Literal::Float(10.0)),
            None
        );

        let program = vec![
            constant(0, Literal::Float(1e308)),
            Instruction::Binary {
                target: Temp(1),
                lhs: temp(0),
                rhs: Operand::Float(10.0),
                op: ArithOp::Mul,
            },
            store(temp(1)),
        ];

        // El operando conocido se sustituye, pero el producto queda en tiempo de ejecución
        let folded = ConstantFolding.run(program);
        assert!(matches!(
            folded.as_slice(),
            [
                Instruction::Binary {
                    lhs: Operand::Float(_),
                    op: ArithOp::Mul,
                    ..
                },
                Instruction::Store { .. },
            ]
        ));
    }

    #[test]
    fn branch_conditions_and_moves_keep_their_temps() {
        let program = vec![
            constant(0, Literal::Int(1)),
            Instruction::Move {
                target: Temp(1),
                source: temp(0),
            },
            Instruction::BranchIfZero(temp(0), Label(0)),
            Instruction::SetLabel(Label(0)),
        ];

        assert_eq!(ConstantFolding.run(program.clone()), program);
    }

    #[test]
    fn conditional_definitions_do_not_cross_labels() {
        let program = vec![
            Instruction::Load {
                target: Temp(0),
                device: Device::Pin(0),
                property: "On".into(),
            },
            constant(1, Literal::Int(1)),
            Instruction::BranchIfZero(temp(0), Label(0)),
            constant(1, Literal::Int(2)),
            Instruction::SetLabel(Label(0)),
            store(temp(1)),
        ];

        let optimized = ConstantFolding.run(program.clone());
        assert_eq!(optimized, program);
    }

    #[test]
    fn unconditional_single_definitions_cross_labels() {
        let program = vec![
            constant(0, Literal::Int(5)),
            Instruction::Jump(Label(0)),
            Instruction::SetLabel(Label(0)),
            store(temp(0)),
        ];

        assert_eq!(
            lines(&ConstantFolding.run(program)),
            vec!["jump L0", "L0:", "store d0.Setting = 5"]
        );
    }

    #[test]
    fn fuses_operation_with_copy_back() {
        let program = vec![
            Instruction::Binary {
                target: Temp(2),
                lhs: temp(0),
                rhs: Operand::Float(273.15),
                op: ArithOp::Sub,
            },
            Instruction::Move {
                target: Temp(0),
                source: temp(2),
            },
        ];

        assert_eq!(lines(&MoveFusion.run(program)), vec!["t0 = t0 - 273.15"]);
    }

    #[test]
    fn fusion_requires_a_single_reader() {
        let program = vec![
            Instruction::Binary {
                target: Temp(2),
                lhs: temp(0),
                rhs: Operand::Int(1),
                op: ArithOp::Add,
            },
            Instruction::Move {
                target: Temp(0),
                source: temp(2),
            },
            store(temp(2)),
        ];

        assert_eq!(MoveFusion.run(program.clone()), program);
    }

    #[test]
    fn disabled_passes_leave_the_program_untouched() {
        let program = IrProgram {
            instructions: vec![constant(0, Literal::Int(1))],
            result: None,
        };

        assert_eq!(optimize(program.clone(), Passes::empty()), program);
        assert!(optimize(program, Passes::all()).instructions.is_empty());
    }
}
