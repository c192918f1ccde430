//! Análisis semántico.
//!
//! Una única pasada sobre el árbol sintáctico. No hay referencias hacia
//! adelante ni ámbitos anidados: todo nombre se declara antes de usarse y
//! la tabla de símbolos es plana. El análisis se detiene en la primera
//! violación.
//!
//! Además de validar tipos, esta fase construye el mapa de referencias a
//! dispositivos, el cual asocia variables ligadas en tiempo de compilación
//! con el dispositivo físico que representan.

use thiserror::Error;
use tracing::debug;

use std::{
    collections::HashMap,
    fmt::{self, Display},
    str::FromStr,
};

use crate::{
    devices::{self, Device, Member, MemberTable},
    lex::Identifier,
    parse::{BinOp, Expr, Statement},
    source::{Located, Location},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    Boolean,
    String,
    Void,
    Error,
    Device,
    StationeersDevice,
    StationeerConstant,
    Function,
}

impl Type {
    pub fn is_numeric(self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }

    /// Tabla de miembros, si el tipo tiene miembros.
    pub fn members(self) -> Option<&'static MemberTable> {
        match self {
            Type::StationeersDevice => Some(crate::devices::stationeers_device()),
            _ => None,
        }
    }
}

impl Display for Type {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Type::*;
        let string = match self {
            Int                => "Int",
            Float              => "Float",
            Boolean            => "Boolean",
            String             => "String",
            Void               => "Void",
            Error              => "Error",
            Device             => "Device",
            StationeersDevice  => "StationeersDevice",
            StationeerConstant => "StationeerConstant",
            Function           => "Function",
        };

        fmt.write_str(string)
    }
}

/// Nombres de tipo admitidos en declaraciones explícitas.
impl FromStr for Type {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "Int" => Ok(Type::Int),
            "Float" => Ok(Type::Float),
            "Boolean" => Ok(Type::Boolean),
            "String" => Ok(Type::String),
            "Device" => Ok(Type::Device),
            "StationeersDevice" => Ok(Type::StationeersDevice),
            _ => Err(()),
        }
    }
}

/// Firma de una función o método.
#[derive(Debug, PartialEq)]
pub struct Signature {
    pub parameters: &'static [Type],
    pub returns: Type,
}

const SLEEP: Signature = Signature {
    parameters: &[],
    returns: Type::Void,
};

const REFERENCE_DEVICE: Signature = Signature {
    parameters: &[Type::Device],
    returns: Type::StationeersDevice,
};

const CONVERT_TO_CELSIUS: Signature = Signature {
    parameters: &[Type::Float],
    returns: Type::Float,
};

/// Funciones globales predefinidas.
const BUILTINS: &[(&str, &Signature)] = &[
    ("sleep", &SLEEP),
    ("referenceDevice", &REFERENCE_DEVICE),
    ("convertToCelsius", &CONVERT_TO_CELSIUS),
];

/// Métodos de `Math`.
const MATH: &[(&str, &Signature)] = &[("convertToCelsius", &CONVERT_TO_CELSIUS)];

pub fn builtin(name: &str) -> Option<&'static Signature> {
    BUILTINS
        .iter()
        .find(|&&(candidate, _)| candidate == name)
        .map(|&(_, signature)| signature)
}

fn static_method(namespace: &str, method: &str) -> Option<&'static Signature> {
    match namespace {
        "Math" => MATH
            .iter()
            .find(|&&(candidate, _)| candidate == method)
            .map(|&(_, signature)| signature),

        _ => None,
    }
}

/// Variables ligadas en tiempo de compilación a un dispositivo.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeviceReferences(HashMap<Identifier, Device>);

impl DeviceReferences {
    pub fn resolve(&self, name: &str) -> Option<Device> {
        self.0.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub type Semantic<T> = Result<T, Located<SemanticError>>;

#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum SemanticError {
    #[error("Symbol `{0}` is undefined")]
    Undefined(Identifier),

    #[error("Variable `{0}` is already declared")]
    Redeclared(Identifier),

    #[error("`{0}` is a device identifier and cannot be declared")]
    ReservedName(Identifier),

    #[error("Unknown type name `{0}`")]
    UnknownType(Identifier),

    #[error("Type mismatch in variable `{name}`: declared as `{declared}` but initialized with `{found}`")]
    DeclarationMismatch {
        name: Identifier,
        declared: Type,
        found: Type,
    },

    #[error("Cannot use the result of a void function as a value")]
    VoidValue,

    #[error("Functions must be called, not used as values")]
    FunctionValue,

    #[error("Expression has no valid type, arithmetic requires numeric operands")]
    ErrorValue,

    #[error("Comparison operators require numeric types, found `{0}` and `{1}`")]
    NonNumericComparison(Type, Type),

    #[error("Comparison requires both sides to have the same type, found `{0}` and `{1}`")]
    ComparisonMismatch(Type, Type),

    #[error("Logical operators require `Boolean` operands, found `{0}`")]
    ExpectedBoolean(Type),

    #[error("Conditions must be `Boolean`, `Int` or `Float`, found `{0}`")]
    InvalidCondition(Type),

    #[error("Cannot assign `{found}` to variable `{name}` of type `{expected}`")]
    AssignMismatch {
        name: Identifier,
        expected: Type,
        found: Type,
    },

    #[error("Device binding `{0}` cannot be reassigned")]
    ImmutableDevice(Identifier),

    #[error("Compound assignment requires numeric types, variable `{name}` is `{variable}`, value is `{value}`")]
    CompoundMismatch {
        name: Identifier,
        variable: Type,
        value: Type,
    },

    #[error("Increment/decrement requires a numeric type, variable `{0}` is `{1}`")]
    NonNumericStep(Identifier, Type),

    #[error("Type `{0}` does not have accessible members")]
    NoMembers(Type),

    #[error("Type `{typ}` does not have member `{member}`{hint}. Available members: {available}")]
    UnknownMember {
        typ: Type,
        member: Identifier,
        hint: String,
        available: String,
    },

    #[error("`{0}` is a method and must be called with parentheses: {0}()")]
    MethodWithoutCall(Identifier),

    #[error("`{0}` is not a property and cannot be assigned")]
    NotAProperty(Identifier),

    #[error("`{0}` is a property, not a method, use it without parentheses")]
    NotAMethod(Identifier),

    #[error("Cannot assign `{found}` to property `{member}` of type `{expected}`")]
    PropertyMismatch {
        member: Identifier,
        expected: Type,
        found: Type,
    },

    #[error("Function `{0}` is undefined")]
    UnknownFunction(Identifier),

    #[error("Unknown global object `{0}`, available: Math")]
    UnknownNamespace(Identifier),

    #[error("Unknown method `{method}` on `{namespace}`")]
    UnknownStaticMethod {
        namespace: Identifier,
        method: Identifier,
    },

    #[error("Function `{function}` expects {expected} argument(s), but got {found}")]
    ArgumentCount {
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("Argument {index} of function `{function}` has incorrect type: expected `{expected}`, found `{found}`")]
    ArgumentType {
        function: String,
        index: usize,
        expected: Type,
        found: Type,
    },

    #[error("Argument {index} of function `{function}` must be a device identifier or device reference")]
    ExpectedDeviceArgument { function: String, index: usize },

    #[error("`{function}` returns a value of type `{typ}` but the result is not being used")]
    UnusedResult { function: String, typ: Type },
}

/// Valida un programa y construye su mapa de referencias a dispositivos.
pub fn analyze(statements: &[Statement]) -> Semantic<DeviceReferences> {
    let mut checker = Checker::default();
    for statement in statements {
        checker.statement(statement)?;
    }

    debug!(
        symbols = checker.symbols.variables.len(),
        references = checker.references.len(),
        "semantic analysis passed"
    );

    Ok(checker.references)
}

#[derive(Default)]
struct SymbolTable {
    variables: HashMap<Identifier, Type>,
}

impl SymbolTable {
    fn declare(&mut self, name: &Located<Identifier>, typ: Type) -> Semantic<()> {
        if self.variables.contains_key(name.val()) {
            return fail(name.location(), SemanticError::Redeclared(name.val().clone()));
        }

        self.variables.insert(name.val().clone(), typ);
        Ok(())
    }

    fn lookup(&self, name: &Located<Identifier>) -> Semantic<Type> {
        self.variables.get(name.val()).copied().ok_or_else(|| {
            Located::at(
                SemanticError::Undefined(name.val().clone()),
                name.location().clone(),
            )
        })
    }
}

#[derive(Default)]
struct Checker {
    symbols: SymbolTable,
    references: DeviceReferences,
}

impl Checker {
    fn statement(&mut self, statement: &Statement) -> Semantic<()> {
        match statement {
            Statement::Declaration { name, typ, init } => self.declaration(name, typ.as_ref(), init),

            Statement::Expr(expr) => {
                let typ = self.expr(expr)?;
                if typ == Type::Error {
                    return fail(expr.location(), SemanticError::ErrorValue);
                }

                let function = match expr.val() {
                    Expr::Call { callee, .. } => callee.val().to_string(),
                    Expr::StaticCall {
                        namespace, method, ..
                    } => format!("{}.{}", namespace.val(), method.val()),
                    Expr::MethodCall { method, .. } => method.val().to_string(),
                    _ => return Ok(()),
                };

                match typ {
                    Type::Void => Ok(()),
                    typ => fail(expr.location(), SemanticError::UnusedResult { function, typ }),
                }
            }

            Statement::If {
                condition,
                then,
                otherwise,
            } => {
                match self.value(condition)? {
                    Type::Boolean | Type::Int | Type::Float => (),
                    other => return fail(condition.location(), SemanticError::InvalidCondition(other)),
                }

                self.statement(then)?;
                if let Some(otherwise) = otherwise {
                    self.statement(otherwise)?;
                }

                Ok(())
            }

            Statement::Block(statements) => statements
                .iter()
                .try_for_each(|statement| self.statement(statement)),
        }
    }

    fn declaration(
        &mut self,
        name: &Located<Identifier>,
        typ: Option<&Located<Identifier>>,
        init: &Located<Expr>,
    ) -> Semantic<()> {
        if name.val().as_str().parse::<Device>().is_ok() {
            return fail(name.location(), SemanticError::ReservedName(name.val().clone()));
        }

        let found = self.value(init)?;
        if let Some(typ) = typ {
            let declared = typ
                .val()
                .as_str()
                .parse::<Type>()
                .map_err(|()| Located::at(SemanticError::UnknownType(typ.val().clone()), typ.location().clone()))?;

            if declared != found {
                let error = SemanticError::DeclarationMismatch {
                    name: name.val().clone(),
                    declared,
                    found,
                };

                return fail(init.location(), error);
            }
        }

        if matches!(found, Type::Device | Type::StationeersDevice) {
            if let Some(device) = self.device_binding(init.val()) {
                self.references.0.insert(name.val().clone(), device);
            }
        }

        self.symbols.declare(name, found)
    }

    /// Dispositivo al que se liga una expresión en tiempo de compilación.
    fn device_binding(&self, expr: &Expr) -> Option<Device> {
        match expr {
            Expr::Device(device) => Some(*device),
            Expr::Variable(name) => self.references.resolve(name.as_str()),
            Expr::Group(inner) => self.device_binding(inner.val()),
            Expr::Call { callee, args } if callee.val().as_str() == "referenceDevice" => {
                args.first().and_then(|arg| self.device_binding(arg.val()))
            }

            _ => None,
        }
    }

    /// Tipo de una expresión cuyo valor será consumido.
    fn value(&mut self, expr: &Located<Expr>) -> Semantic<Type> {
        let error = match self.expr(expr)? {
            Type::Void => SemanticError::VoidValue,
            Type::Error => SemanticError::ErrorValue,
            Type::Function => SemanticError::FunctionValue,
            typ => return Ok(typ),
        };

        fail(expr.location(), error)
    }

    fn expr(&mut self, expr: &Located<Expr>) -> Semantic<Type> {
        let typ = match expr.val() {
            Expr::Int(_) => Type::Int,
            Expr::Float(_) => Type::Float,
            Expr::Boolean(_) => Type::Boolean,
            Expr::Str(_) => Type::String,
            Expr::Device(_) => Type::Device,
            Expr::Group(inner) => self.expr(inner)?,

            Expr::Variable(name) => {
                let name = Located::at(name.clone(), expr.location().clone());
                match self.symbols.lookup(&name) {
                    Ok(typ) => typ,
                    Err(_) if builtin(name.val().as_str()).is_some() => Type::Function,

                    // Sin declaración, los nombres de la máquina objetivo conservan su sentido
                    Err(_) if devices::is_property(name.val().as_str()) => Type::Int,
                    Err(_) if devices::is_constant(name.val().as_str()) => Type::StationeerConstant,
                    Err(error) => return Err(error),
                }
            }

            Expr::Binary(lhs, op, rhs) => self.binary(lhs, *op, rhs)?,

            Expr::Assign { target, value } => {
                let expected = self.assignable(target)?;
                let found = self.value(value)?;

                if found != expected {
                    let error = SemanticError::AssignMismatch {
                        name: target.val().clone(),
                        expected,
                        found,
                    };

                    return fail(value.location(), error);
                }

                found
            }

            Expr::CompoundAssign { target, value, .. } => {
                let variable = self.assignable(target)?;
                let found = self.value(value)?;

                let valid = match (variable, found) {
                    (Type::Int, Type::Int) | (Type::Float, _) => found.is_numeric(),
                    _ => false,
                };

                if !valid {
                    let error = SemanticError::CompoundMismatch {
                        name: target.val().clone(),
                        variable,
                        value: found,
                    };

                    return fail(expr.location(), error);
                }

                variable
            }

            Expr::Step { target, .. } => {
                let typ = self.assignable(target)?;
                if !typ.is_numeric() {
                    let error = SemanticError::NonNumericStep(target.val().clone(), typ);
                    return fail(expr.location(), error);
                }

                typ
            }

            Expr::Call { callee, args } => {
                let signature = builtin(callee.val().as_str()).ok_or_else(|| {
                    Located::at(
                        SemanticError::UnknownFunction(callee.val().clone()),
                        callee.location().clone(),
                    )
                })?;

                self.arguments(callee.val().as_str(), signature, args, expr.location())?
            }

            Expr::StaticCall {
                namespace,
                method,
                args,
            } => {
                if namespace.val().as_str() != "Math" {
                    let error = SemanticError::UnknownNamespace(namespace.val().clone());
                    return fail(namespace.location(), error);
                }

                let signature = static_method(namespace.val().as_str(), method.val().as_str())
                    .ok_or_else(|| {
                        let error = SemanticError::UnknownStaticMethod {
                            namespace: namespace.val().clone(),
                            method: method.val().clone(),
                        };

                        Located::at(error, method.location().clone())
                    })?;

                let function = format!("{}.{}", namespace.val(), method.val());
                self.arguments(&function, signature, args, expr.location())?
            }

            Expr::Member { object, member } => match self.member(object, member)? {
                Member::Property(typ) => typ,
                Member::Method(_) => {
                    let error = SemanticError::MethodWithoutCall(member.val().clone());
                    return fail(member.location(), error);
                }
            },

            Expr::MemberAssign {
                object,
                member,
                value,
            } => {
                let expected = match self.member(object, member)? {
                    Member::Property(typ) => typ,
                    Member::Method(_) => {
                        let error = SemanticError::NotAProperty(member.val().clone());
                        return fail(member.location(), error);
                    }
                };

                let found = self.value(value)?;
                if !compatible(expected, found, value.val()) {
                    let error = SemanticError::PropertyMismatch {
                        member: member.val().clone(),
                        expected,
                        found,
                    };

                    return fail(value.location(), error);
                }

                found
            }

            Expr::MethodCall {
                object,
                method,
                args,
            } => match self.member(object, method)? {
                Member::Method(signature) => {
                    self.arguments(method.val().as_str(), signature, args, expr.location())?
                }

                Member::Property(_) => {
                    let error = SemanticError::NotAMethod(method.val().clone());
                    return fail(method.location(), error);
                }
            },
        };

        Ok(typ)
    }

    fn binary(&mut self, lhs: &Located<Expr>, op: BinOp, rhs: &Located<Expr>) -> Semantic<Type> {
        let (left, right) = (self.value(lhs)?, self.value(rhs)?);

        let typ = match op {
            BinOp::Arith(_) => match (left, right) {
                (Type::Int, Type::Int) => Type::Int,
                (Type::Float, Type::Int) | (Type::Int, Type::Float) | (Type::Float, Type::Float) => {
                    Type::Float
                }

                _ => Type::Error,
            },

            BinOp::Rel(_) => {
                if !left.is_numeric() || !right.is_numeric() {
                    let location = Location::span(lhs.location().clone(), rhs.location());
                    return fail(&location, SemanticError::NonNumericComparison(left, right));
                }

                let adapted = compatible(left, right, rhs.val()) || compatible(right, left, lhs.val());
                if !adapted {
                    let location = Location::span(lhs.location().clone(), rhs.location());
                    return fail(&location, SemanticError::ComparisonMismatch(left, right));
                }

                Type::Boolean
            }

            BinOp::And | BinOp::Or => {
                for (operand, typ) in [(lhs, left), (rhs, right)] {
                    if typ != Type::Boolean {
                        return fail(operand.location(), SemanticError::ExpectedBoolean(typ));
                    }
                }

                Type::Boolean
            }
        };

        Ok(typ)
    }

    /// Tipo de una variable que va a ser escrita.
    fn assignable(&self, target: &Located<Identifier>) -> Semantic<Type> {
        match self.symbols.lookup(target)? {
            Type::Device | Type::StationeersDevice => {
                fail(target.location(), SemanticError::ImmutableDevice(target.val().clone()))
            }

            typ => Ok(typ),
        }
    }

    fn member(&mut self, object: &Located<Expr>, member: &Located<Identifier>) -> Semantic<Member> {
        let typ = self.value(object)?;
        let table = match typ.members() {
            Some(table) => table,
            None => return fail(object.location(), SemanticError::NoMembers(typ)),
        };

        table.get(member.val().as_str()).ok_or_else(|| {
            let hint = table
                .suggest(member.val().as_str())
                .map(|suggestion| format!(" (did you mean `{}`?)", suggestion))
                .unwrap_or_default();

            let error = SemanticError::UnknownMember {
                typ,
                member: member.val().clone(),
                hint,
                available: table.names().join(", "),
            };

            Located::at(error, member.location().clone())
        })
    }

    fn arguments(
        &mut self,
        function: &str,
        signature: &Signature,
        args: &[Located<Expr>],
        location: &Location,
    ) -> Semantic<Type> {
        if args.len() != signature.parameters.len() {
            let error = SemanticError::ArgumentCount {
                function: function.to_owned(),
                expected: signature.parameters.len(),
                found: args.len(),
            };

            return fail(location, error);
        }

        for (index, (arg, &expected)) in args.iter().zip(signature.parameters).enumerate() {
            let index = index + 1;

            // Los parámetros de dispositivo solo aceptan ligaduras estáticas
            if expected == Type::Device {
                if self.device_binding(arg.val()).is_none() {
                    let error = SemanticError::ExpectedDeviceArgument {
                        function: function.to_owned(),
                        index,
                    };

                    return fail(arg.location(), error);
                }

                continue;
            }

            let found = self.value(arg)?;
            if found != expected && !(expected == Type::Float && found == Type::Int) {
                let error = SemanticError::ArgumentType {
                    function: function.to_owned(),
                    index,
                    expected,
                    found,
                };

                return fail(arg.location(), error);
            }
        }

        Ok(signature.returns)
    }
}

/// Determina si un valor de tipo `found` puede ocupar el lugar de uno de tipo
/// `expected`. Un literal entero se adapta a contextos de punto flotante.
fn compatible(expected: Type, found: Type, value: &Expr) -> bool {
    expected == found || (expected == Type::Float && found == Type::Int && is_int_literal(value))
}

fn is_int_literal(expr: &Expr) -> bool {
    match expr {
        Expr::Int(_) => true,
        Expr::Group(inner) => is_int_literal(inner.val()),
        _ => false,
    }
}

fn fail<T>(location: &Location, error: SemanticError) -> Semantic<T> {
    Err(Located::at(error, location.clone()))
}
