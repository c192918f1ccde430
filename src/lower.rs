//! Construcción de la representación intermedia.
//!
//! Recorre el árbol ya validado y reserva un temporal nuevo por cada nodo
//! que produce un valor y una etiqueta nueva por cada destino de salto.
//! Las variables de tipo valor (`Int`, `Float`, `Boolean`) poseen un
//! temporal propio, su "hogar", el cual nunca cambia durante el programa.
//! Las variables ligadas a dispositivos, cadenas o constantes se resuelven
//! directamente a su operando.
//!
//! Los operadores lógicos no tienen cortocircuito: ambos operandos se
//! evalúan siempre.

use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

use tracing::debug;

use crate::{
    codegen::CodegenError,
    devices::{self, Device},
    ir::{Instruction, IrProgram, Label, Literal, Operand, Temp},
    lex::Identifier,
    parse::{ArithOp, BinOp, Expr, Statement, Step},
    semantic::DeviceReferences,
    source::Located,
};

/// Desplazamiento entre Kelvin y Celsius.
const KELVIN_OFFSET: f64 = 273.15;

type Lower<T> = Result<T, CodegenError>;

/// Traduce un programa validado a IR sin optimizar.
pub fn lower(statements: &[Statement], references: &DeviceReferences) -> Lower<IrProgram> {
    let mut builder = Builder {
        references,
        instructions: Vec::new(),
        variables: HashMap::new(),
        homes: HashSet::new(),
        next_temp: 0,
        next_label: 0,
    };

    for statement in statements {
        builder.statement(statement)?;
    }

    debug!(
        instructions = builder.instructions.len(),
        temps = builder.next_temp,
        labels = builder.next_label,
        "lowered program"
    );

    Ok(IrProgram {
        instructions: builder.instructions,
        result: None,
    })
}

struct Builder<'r> {
    references: &'r DeviceReferences,
    instructions: Vec<Instruction>,
    variables: HashMap<Identifier, Operand>,
    homes: HashSet<Temp>,
    next_temp: u32,
    next_label: u32,
}

impl Builder<'_> {
    fn statement(&mut self, statement: &Statement) -> Lower<()> {
        match statement {
            Statement::Declaration { name, init, .. } => self.declaration(name.val(), init),

            // Como sentencia, `x++` no necesita preservar el valor anterior
            Statement::Expr(expr) => match expr.val() {
                Expr::Step { target, step, .. } => self.step(target, *step, true).map(drop),
                _ => self.expr(expr).map(drop),
            },

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                let condition = self.expr(condition)?;
                let (else_label, end_label) = (self.label(), self.label());

                self.push(Instruction::BranchIfZero(condition, else_label));
                self.statement(then)?;
                self.push(Instruction::Jump(end_label));

                self.push(Instruction::SetLabel(else_label));
                if let Some(otherwise) = otherwise {
                    self.statement(otherwise)?;
                }

                self.push(Instruction::SetLabel(end_label));
                Ok(())
            }

            Statement::Block(statements) => statements
                .iter()
                .try_for_each(|statement| self.statement(statement)),
        }
    }

    fn declaration(&mut self, name: &Identifier, init: &Located<Expr>) -> Lower<()> {
        // Un nombre de propiedad sin declarar es un selector entero
        let selector = match init.val() {
            Expr::Variable(source) => {
                !self.variables.contains_key(source) && devices::is_property(source.as_str())
            }
            _ => false,
        };

        let binding = match self.references.resolve(name.as_str()) {
            Some(device) => Operand::Device(device),
            None => match self.expr(init)? {
                Operand::Temp(temp) if !self.homes.contains(&temp) => Operand::Temp(temp),

                // Nunca se comparte el hogar de otra variable
                value @ (Operand::Temp(_) | Operand::Int(_) | Operand::Float(_)) => self.copy(value),
                value @ Operand::Symbol(_) if selector => self.copy(value),

                other => other,
            },
        };

        if let Operand::Temp(home) = binding {
            self.homes.insert(home);
        }

        self.variables.insert(name.clone(), binding);
        Ok(())
    }

    fn expr(&mut self, expr: &Located<Expr>) -> Lower<Operand> {
        let operand = match expr.val() {
            Expr::Int(integer) => self.constant(Literal::Int(*integer)),
            Expr::Float(float) => self.constant(Literal::Float(*float)),
            Expr::Boolean(boolean) => self.constant(Literal::Int(*boolean as i32)),
            Expr::Str(string) => Operand::Symbol(Rc::clone(string)),
            Expr::Device(device) => Operand::Device(*device),
            Expr::Variable(name) => self.variable(name)?,
            Expr::Group(inner) => self.expr(inner)?,

            Expr::Binary(lhs, op, rhs) => {
                let lhs = self.expr(lhs)?;
                let rhs = self.expr(rhs)?;
                let target = self.temp();

                let instruction = match *op {
                    BinOp::Arith(op) => Instruction::Binary {
                        target,
                        lhs,
                        rhs,
                        op,
                    },

                    BinOp::Rel(op) => Instruction::Compare {
                        target,
                        lhs,
                        rhs,
                        op,
                    },

                    BinOp::And => Instruction::And { target, lhs, rhs },
                    BinOp::Or => Instruction::Or { target, lhs, rhs },
                };

                self.push(instruction);
                Operand::Temp(target)
            }

            Expr::Assign { target, value } => {
                let name = target.val();
                match self.variable(name)? {
                    Operand::Temp(home) => {
                        match literal(value.val()) {
                            Some(value) => self.push(Instruction::LoadConst { target: home, value }),
                            None => {
                                let source = self.expr(value)?;
                                self.push(Instruction::Move { target: home, source });
                            }
                        }

                        Operand::Temp(home)
                    }

                    // Cadenas y constantes se religan
                    _ => {
                        let value = self.expr(value)?;
                        self.variables.insert(name.clone(), value.clone());
                        value
                    }
                }
            }

            Expr::CompoundAssign { target, op, value } => {
                let home = self.home(target.val())?;
                let rhs = self.expr(value)?;

                self.update(home, *op, rhs);
                Operand::Temp(home)
            }

            Expr::Step {
                target,
                step,
                prefix,
            } => self.step(target, *step, *prefix)?,

            Expr::Call { callee, args } => match callee.val().as_str() {
                "sleep" => {
                    self.push(Instruction::Yield);
                    Operand::Int(0)
                }

                "referenceDevice" => match args.first() {
                    Some(arg) => self.expr(arg)?,
                    None => return Err(CodegenError::UnresolvedDevice),
                },

                "convertToCelsius" => self.celsius(args)?,
                _ => return Err(CodegenError::UnknownFunction(callee.val().clone())),
            },

            Expr::StaticCall { method, args, .. } => match method.val().as_str() {
                "convertToCelsius" => self.celsius(args)?,
                _ => return Err(CodegenError::UnknownFunction(method.val().clone())),
            },

            Expr::Member { object, member } => {
                let device = self.device(object)?;
                let target = self.temp();

                self.push(Instruction::Load {
                    target,
                    device,
                    property: Rc::from(member.val().as_str()),
                });

                Operand::Temp(target)
            }

            Expr::MemberAssign {
                object,
                member,
                value,
            } => {
                let device = self.device(object)?;

                // Los literales se almacenan directamente
                let value = match literal(value.val()) {
                    Some(literal) => Operand::from(literal),
                    None => self.expr(value)?,
                };

                self.push(Instruction::Store {
                    device,
                    property: Rc::from(member.val().as_str()),
                    value: value.clone(),
                });

                value
            }

            Expr::MethodCall { method, .. } => {
                return Err(CodegenError::UnsupportedMethod(method.val().clone()))
            }
        };

        Ok(operand)
    }

    /// `++`/`--`. Como valor postfijo se obtiene una copia previa al cambio.
    fn step(&mut self, target: &Located<Identifier>, step: Step, prefix: bool) -> Lower<Operand> {
        let home = self.home(target.val())?;

        let result = if prefix {
            home
        } else {
            let previous = self.temp();
            self.push(Instruction::Move {
                target: previous,
                source: Operand::Temp(home),
            });

            previous
        };

        self.update(home, step.op(), Operand::Int(1));
        Ok(Operand::Temp(result))
    }

    /// Calcula en un temporal nuevo y luego copia de vuelta al hogar.
    fn update(&mut self, home: Temp, op: ArithOp, rhs: Operand) {
        let target = self.temp();
        self.push(Instruction::Binary {
            target,
            lhs: Operand::Temp(home),
            rhs,
            op,
        });

        self.push(Instruction::Move {
            target: home,
            source: Operand::Temp(target),
        });
    }

    fn celsius(&mut self, args: &[Located<Expr>]) -> Lower<Operand> {
        let kelvin = match args.first() {
            Some(arg) => self.expr(arg)?,
            None => return Err(CodegenError::UnknownFunction(Identifier::new("convertToCelsius"))),
        };

        let target = self.temp();
        self.push(Instruction::Binary {
            target,
            lhs: kelvin,
            rhs: Operand::Float(KELVIN_OFFSET),
            op: ArithOp::Sub,
        });

        Ok(Operand::Temp(target))
    }

    fn device(&mut self, object: &Located<Expr>) -> Lower<Device> {
        match self.expr(object)? {
            Operand::Device(device) => Ok(device),
            _ => Err(CodegenError::UnresolvedDevice),
        }
    }

    /// Variables, luego referencias a dispositivos y por último los nombres
    /// de propiedades y constantes de la máquina objetivo.
    fn variable(&self, name: &Identifier) -> Lower<Operand> {
        if let Some(operand) = self.variables.get(name) {
            return Ok(operand.clone());
        }

        let name = name.as_str();
        if let Some(device) = self.references.resolve(name) {
            Ok(Operand::Device(device))
        } else if devices::is_property(name) || devices::is_constant(name) {
            Ok(Operand::Symbol(Rc::from(name)))
        } else {
            Err(CodegenError::UnboundVariable(Identifier::new(name)))
        }
    }

    fn home(&self, name: &Identifier) -> Lower<Temp> {
        match self.variable(name)? {
            Operand::Temp(home) => Ok(home),
            _ => Err(CodegenError::UnboundVariable(name.clone())),
        }
    }

    fn copy(&mut self, source: Operand) -> Operand {
        let home = self.temp();
        self.push(Instruction::Move {
            target: home,
            source,
        });

        Operand::Temp(home)
    }

    fn constant(&mut self, value: Literal) -> Operand {
        let target = self.temp();
        self.push(Instruction::LoadConst { target, value });

        Operand::Temp(target)
    }

    fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn temp(&mut self) -> Temp {
        let temp = Temp(self.next_temp);
        self.next_temp += 1;
        temp
    }

    fn label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }
}

/// Valor constante de un literal numérico o booleano.
fn literal(expr: &Expr) -> Option<Literal> {
    match expr {
        Expr::Int(integer) => Some(Literal::Int(*integer)),
        Expr::Float(float) => Some(Literal::Float(*float)),
        Expr::Boolean(boolean) => Some(Literal::Int(*boolean as i32)),
        Expr::Group(inner) => literal(inner.val()),
        _ => None,
    }
}
