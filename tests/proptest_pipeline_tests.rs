//! Pruebas basadas en propiedades para la pipeline completa.
//!
//! Se generan programas bien tipados sobre un conjunto pequeño de variables
//! y se verifica que:
//! 1. Siempre compilan, con o sin optimizaciones, envueltos en `start:`/`j start`
//! 2. Optimizar no altera la secuencia de efectos sobre dispositivos ni los
//!    valores que se escriben en ellos
//! 3. Ningún par de intervalos vivos comparte registro
//! 4. El lexer nunca entra en pánico

use std::collections::HashMap;

use ic10c::{
    codegen::allocate,
    compile, lower,
    ir::{Instruction, Label, Operand, Temp},
    optimize::optimize,
    parse::{ArithOp, RelOp},
    tokenize, Passes,
};
use proptest::prelude::*;

const PRELUDE: &str = "\
StationeersDevice dev = referenceDevice(d0);
Float f = dev.Temperature;
Int n = 3;
Boolean b = dev.On;
";

// =============================================================================
// GENERADORES
// =============================================================================

fn float_expr() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("f".to_string()),
        (0u32..10000).prop_map(|x| format!("{}.{}", x / 10, x % 10)),
        Just("dev.Temperature".to_string()),
        Just("Math.convertToCelsius(f)".to_string()),
        (1i32..100).prop_map(|x| format!("f + {}", x)),
        Just("f * n".to_string()),
    ]
}

fn int_expr() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("n".to_string()),
        (0i32..1000).prop_map(|x| x.to_string()),
        (1i32..10).prop_map(|x| format!("n + {}", x)),
        (1i32..10).prop_map(|x| format!("n * {}", x)),
        (1i32..10).prop_map(|x| format!("{} - n", x)),
    ]
}

fn bool_expr() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("b".to_string()),
        Just("true".to_string()),
        Just("false".to_string()),
        (0i32..50).prop_map(|x| format!("f >= {}", x)),
        int_expr().prop_map(|x| format!("n < {}", x)),
        Just("b && n > 2".to_string()),
        Just("b || f != 1.5".to_string()),
        Just("(n == 3)".to_string()),
    ]
}

fn simple_statement() -> impl Strategy<Value = String> {
    prop_oneof![
        float_expr().prop_map(|x| format!("f = {};", x)),
        int_expr().prop_map(|x| format!("n = {};", x)),
        bool_expr().prop_map(|x| format!("b = {};", x)),
        (1i32..10).prop_map(|x| format!("n += {};", x)),
        Just("f -= 1.5;".to_string()),
        Just("n++;".to_string()),
        Just("n--;".to_string()),
        float_expr().prop_map(|x| format!("dev.Setting = {};", x)),
        bool_expr().prop_map(|x| format!("dev.On = {};", x)),
        Just("sleep();".to_string()),
    ]
}

fn statement() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => simple_statement(),
        1 => (
            bool_expr(),
            prop::collection::vec(simple_statement(), 0..4),
            prop::collection::vec(simple_statement(), 0..4),
        )
            .prop_map(|(condition, then, otherwise)| {
                format!(
                    "if ({}) {{ {} }} else {{ {} }}",
                    condition,
                    then.join(" "),
                    otherwise.join(" ")
                )
            }),
    ]
}

fn program() -> impl Strategy<Value = String> {
    prop::collection::vec(statement(), 0..12)
        .prop_map(|statements| format!("{}{}\n", PRELUDE, statements.join("\n")))
}

fn straight_line_program() -> impl Strategy<Value = String> {
    prop::collection::vec(simple_statement(), 0..12)
        .prop_map(|statements| format!("{}{}\n", PRELUDE, statements.join("\n")))
}

/// Ejecuta una lista de instrucciones y registra sus efectos sobre
/// dispositivos, incluidos los valores almacenados.
///
/// Cada lectura de dispositivo produce un valor que depende solo de su
/// posición en la traza, de modo que dos programas con los mismos efectos
/// observan las mismas entradas.
fn effects(instructions: &[Instruction]) -> Vec<String> {
    let labels: HashMap<Label, usize> = instructions
        .iter()
        .enumerate()
        .filter_map(|(index, instruction)| match instruction {
            Instruction::SetLabel(label) => Some((*label, index)),
            _ => None,
        })
        .collect();

    let mut temps: HashMap<Temp, f64> = HashMap::new();
    let mut trace = Vec::new();
    let mut pc = 0;

    let value = |temps: &HashMap<Temp, f64>, operand: &Operand| match operand {
        Operand::Temp(temp) => temps.get(temp).copied().unwrap_or(0.0),
        Operand::Int(integer) => *integer as f64,
        Operand::Float(float) => *float,
        Operand::Device(_) | Operand::Symbol(_) => 0.0,
    };

    let truth = |condition: bool| if condition { 1.0 } else { 0.0 };

    while let Some(instruction) = instructions.get(pc) {
        pc += 1;

        let result = match instruction {
            Instruction::LoadConst { value, .. } => value.to_f64(),

            Instruction::Binary { lhs, rhs, op, .. } => {
                let (a, b) = (value(&temps, lhs), value(&temps, rhs));
                match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                }
            }

            Instruction::Compare { lhs, rhs, op, .. } => {
                let (a, b) = (value(&temps, lhs), value(&temps, rhs));
                truth(match op {
                    RelOp::Equal => a == b,
                    RelOp::NotEqual => a != b,
                    RelOp::Greater => a > b,
                    RelOp::GreaterOrEqual => a >= b,
                    RelOp::Less => a < b,
                    RelOp::LessOrEqual => a <= b,
                })
            }

            Instruction::And { lhs, rhs, .. } => value(&temps, lhs) * value(&temps, rhs),
            Instruction::Or { lhs, rhs, .. } => {
                truth(value(&temps, lhs) + value(&temps, rhs) > 0.0)
            }

            Instruction::Move { source, .. } => value(&temps, source),

            Instruction::Load {
                device, property, ..
            } => {
                let input = (trace.len() * 37 % 101) as f64 / 4.0 - 5.0;
                trace.push(format!("l {} {} -> {}", device, property, input));
                input
            }

            Instruction::Store {
                device,
                property,
                value: stored,
            } => {
                trace.push(format!("s {} {} {}", device, property, value(&temps, stored)));
                continue;
            }

            Instruction::Yield => {
                trace.push(String::from("yield"));
                continue;
            }

            Instruction::Jump(label) => {
                pc = labels[label];
                continue;
            }

            Instruction::BranchIfZero(condition, label) => {
                if value(&temps, condition) == 0.0 {
                    pc = labels[label];
                }

                continue;
            }

            Instruction::SetLabel(_) => continue,
        };

        if let Some(target) = instruction.target() {
            temps.insert(target, result);
        }
    }

    trace
}

// =============================================================================
// PROPIEDADES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn well_typed_programs_compile(text in program()) {
        for optimized in [false, true] {
            let lines = compile(&text, optimized).unwrap();

            prop_assert_eq!(lines.first().map(String::as_str), Some("start:"));
            prop_assert_eq!(lines.last().map(String::as_str), Some("j start"));
        }
    }

    #[test]
    fn optimization_preserves_device_effects(text in program()) {
        let program = lower(&text).unwrap();
        let optimized = optimize(program.clone(), Passes::all());

        prop_assert_eq!(effects(&program.instructions), effects(&optimized.instructions));
    }

    #[test]
    fn live_intervals_never_share_registers(text in program()) {
        let program = optimize(lower(&text).unwrap(), Passes::all());
        let intervals = allocate(&program.instructions).unwrap();

        for a in &intervals {
            for b in &intervals {
                if a.temp != b.temp && a.overlaps(b) {
                    prop_assert_ne!(a.register, b.register);
                }
            }
        }
    }

    #[test]
    fn folded_constants_are_never_read(text in straight_line_program()) {
        let program = optimize(lower(&text).unwrap(), Passes::CONSTANT_FOLDING);

        // Sin saltos, la última definición es la que alcanza cada lectura
        let mut constant = HashMap::new();
        for instruction in &program.instructions {
            let operands = match instruction {
                Instruction::Binary { lhs, rhs, .. }
                | Instruction::Compare { lhs, rhs, .. }
                | Instruction::And { lhs, rhs, .. }
                | Instruction::Or { lhs, rhs, .. } => vec![lhs, rhs],

                Instruction::Store { value, .. } => vec![value],
                _ => Vec::new(),
            };

            for temp in operands.into_iter().filter_map(Operand::temp) {
                prop_assert_ne!(constant.get(&temp), Some(&true), "{} in {}", temp, instruction);
            }

            if let Some(target) = instruction.target() {
                constant.insert(target, matches!(instruction, Instruction::LoadConst { .. }));
            }
        }
    }

    #[test]
    fn lexer_never_panics(text in r"[\x00-\x7F]{0,300}") {
        let _ = tokenize(&text);
    }

    #[test]
    fn lexer_never_panics_on_token_soup(
        words in prop::collection::vec(
            prop_oneof![
                Just("var"), Just("if"), Just("else"), Just("="), Just("+="), Just("++"),
                Just("-"), Just("."), Just("d0"), Just("On"), Just("pi"), Just("\""),
                Just("1.5"), Just("-3"), Just("2147483648"), Just("//"), Just("&&"), Just("|"),
            ],
            0..40,
        )
    ) {
        let _ = compile(&words.join(" "), true);
    }
}
