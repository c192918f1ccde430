//! Análisis sintáctico.
//!
//! Descenso recursivo con lookahead de uno o dos tokens. Dos
//! identificadores consecutivos al inicio de una sentencia indican una
//! declaración con tipo explícito (`Float x = ...;`). Cualquier
//! construcción mal formada aborta el análisis de inmediato, sin
//! recuperación y sin árbol parcial.
//!
//! Precedencia, de menor a mayor: asignación, `||`, `&&`, relacionales,
//! aditivos, multiplicativos, unarios y primarios.

use std::{
    fmt::{self, Display},
    iter::Peekable,
    rc::Rc,
};

use thiserror::Error;
use tracing::debug;

use crate::{
    devices::Device,
    lex::{Identifier, Keyword, Token},
    source::{Located, Location},
};

/// Espacios de nombres globales cuyas llamadas son estáticas.
const NAMESPACES: &[&str] = &["Math"];

#[derive(Debug, Clone)]
pub enum Statement {
    /// `var x = e;` o `Tipo x = e;`
    Declaration {
        name: Located<Identifier>,
        typ: Option<Located<Identifier>>,
        init: Located<Expr>,
    },

    Expr(Located<Expr>),

    If {
        condition: Located<Expr>,
        then: Box<Statement>,
        otherwise: Option<Box<Statement>>,
    },

    Block(Vec<Statement>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i32),
    Float(f64),
    Boolean(bool),
    Str(Rc<str>),
    Variable(Identifier),
    Group(Box<Located<Expr>>),
    Binary(Box<Located<Expr>>, BinOp, Box<Located<Expr>>),

    Assign {
        target: Located<Identifier>,
        value: Box<Located<Expr>>,
    },

    CompoundAssign {
        target: Located<Identifier>,
        op: ArithOp,
        value: Box<Located<Expr>>,
    },

    /// `++x`, `--x`, `x++`, `x--`
    Step {
        target: Located<Identifier>,
        step: Step,
        prefix: bool,
    },

    Call {
        callee: Located<Identifier>,
        args: Vec<Located<Expr>>,
    },

    /// `Math.metodo(args)`
    StaticCall {
        namespace: Located<Identifier>,
        method: Located<Identifier>,
        args: Vec<Located<Expr>>,
    },

    Member {
        object: Box<Located<Expr>>,
        member: Located<Identifier>,
    },

    MemberAssign {
        object: Box<Located<Expr>>,
        member: Located<Identifier>,
        value: Box<Located<Expr>>,
    },

    MethodCall {
        object: Box<Located<Expr>>,
        method: Located<Identifier>,
        args: Vec<Located<Expr>>,
    },

    Device(Device),
}

/// Operadores aritméticos, también usados en asignación compuesta.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Operadores relacionales.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelOp {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
    Arith(ArithOp),
    Rel(RelOp),
    And,
    Or,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Increment,
    Decrement,
}

impl Step {
    /// Operación aritmética equivalente con operando 1.
    pub fn op(self) -> ArithOp {
        match self {
            Step::Increment => ArithOp::Add,
            Step::Decrement => ArithOp::Sub,
        }
    }
}

impl Display for ArithOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        };

        fmt.write_str(string)
    }
}

impl Display for RelOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RelOp::*;
        let string = match self {
            Equal          => "==",
            NotEqual       => "!=",
            Greater        => ">",
            GreaterOrEqual => ">=",
            Less           => "<",
            LessOrEqual    => "<=",
        };

        fmt.write_str(string)
    }
}

impl Display for BinOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinOp::Arith(op) => op.fmt(fmt),
            BinOp::Rel(op) => op.fmt(fmt),
            BinOp::And => fmt.write_str("&&"),
            BinOp::Or => fmt.write_str("||"),
        }
    }
}

#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum ParserError {
    #[error("Expected {0}, found {1} instead")]
    UnexpectedToken(Token, Token),

    #[error("Expected identifier, found {0} instead")]
    ExpectedId(Token),

    #[error("Expected an expression, found {0} instead")]
    ExpectedExpr(Token),

    #[error("Expected member name after `.`, found {0} instead")]
    ExpectedMember(Token),

    #[error("Assignment target must be an identifier or member access")]
    InvalidAssignTarget,

    #[error("Compound assignment target must be an identifier")]
    InvalidCompoundTarget,

    #[error("Abrupt end of program")]
    UnexpectedEof,
}

/// Flujo de tokens con lookahead por clonación.
pub trait TokenStream<'a>: Iterator<Item = &'a Located<Token>> + Clone {}

impl<'a, I> TokenStream<'a> for I where I: Iterator<Item = &'a Located<Token>> + Clone {}

/// Construye la lista de sentencias de un programa.
///
/// Se asume que el flujo termina en [`Token::Eof`].
pub fn parse<'a>(tokens: impl TokenStream<'a>) -> Result<Vec<Statement>, Located<ParserError>> {
    let mut tokens = tokens.peekable();
    let last_known = match tokens.peek() {
        Some(token) => token.location().clone(),
        None => return Ok(Vec::new()),
    };

    let mut parser = Parser { tokens, last_known };
    let program = parser.program()?;

    debug!(statements = program.len(), "parsed program");
    Ok(program)
}

struct Parser<I: Iterator> {
    tokens: Peekable<I>,
    last_known: Location,
}

type Parse<T> = Result<T, Located<ParserError>>;

/// Regla de precedencia.
type Rule<P> = fn(&mut P) -> Parse<Located<Expr>>;

impl<'a, I: TokenStream<'a>> Parser<I> {
    fn program(&mut self) -> Parse<Vec<Statement>> {
        let mut statements = Vec::new();
        while !matches!(self.peek(), Some(Token::Eof) | None) {
            statements.push(self.statement()?);
        }

        Ok(statements)
    }

    fn statement(&mut self) -> Parse<Statement> {
        match (self.peek(), self.peek_second()) {
            (Some(Token::Keyword(Keyword::Var)), _) => self.declaration(),
            (Some(Token::Keyword(Keyword::If)), _) => self.if_statement(),
            (Some(Token::OpenCurly), _) => self.block(),
            (Some(Token::Id(_)), Some(Token::Id(_))) => self.declaration(),

            _ => {
                let expr = self.expr()?;
                self.expect(Token::Semicolon)?;

                Ok(Statement::Expr(expr))
            }
        }
    }

    fn declaration(&mut self) -> Parse<Statement> {
        let typ = match self.peek() {
            Some(Token::Keyword(Keyword::Var)) => {
                self.next()?;
                None
            }

            _ => Some(self.id()?),
        };

        let name = self.id()?;
        self.expect(Token::Assign)?;

        let init = self.expr()?;
        self.expect(Token::Semicolon)?;

        Ok(Statement::Declaration { name, typ, init })
    }

    fn if_statement(&mut self) -> Parse<Statement> {
        self.expect(Token::Keyword(Keyword::If))?;
        self.expect(Token::OpenParen)?;
        let condition = self.expr()?;
        self.expect(Token::CloseParen)?;

        let then = Box::new(self.statement()?);
        let otherwise = match self.peek() {
            Some(Token::Keyword(Keyword::Else)) => {
                self.next()?;
                Some(Box::new(self.statement()?))
            }

            _ => None,
        };

        Ok(Statement::If {
            condition,
            then,
            otherwise,
        })
    }

    fn block(&mut self) -> Parse<Statement> {
        self.expect(Token::OpenCurly)?;

        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Some(Token::CloseCurly) => {
                    self.next()?;
                    break Ok(Statement::Block(statements));
                }

                Some(Token::Eof) | None => {
                    let found = self.next()?.into_inner();
                    break self.fail(ParserError::UnexpectedToken(Token::CloseCurly, found));
                }

                _ => statements.push(self.statement()?),
            }
        }
    }

    fn expr(&mut self) -> Parse<Located<Expr>> {
        self.assignment()
    }

    fn assignment(&mut self) -> Parse<Located<Expr>> {
        let target = self.logical_or()?;

        let op = match self.peek() {
            Some(Token::Assign) => None,
            Some(Token::PlusAssign) => Some(ArithOp::Add),
            Some(Token::MinusAssign) => Some(ArithOp::Sub),
            Some(Token::TimesAssign) => Some(ArithOp::Mul),
            Some(Token::DivAssign) => Some(ArithOp::Div),
            _ => return Ok(target),
        };

        self.next()?;
        let value = Box::new(self.assignment()?);
        let location = Location::span(target.location().clone(), value.location());

        let (target_location, target) = target.split();
        let expr = match (target, op) {
            (Expr::Variable(name), None) => Expr::Assign {
                target: Located::at(name, target_location),
                value,
            },

            (Expr::Member { object, member }, None) => Expr::MemberAssign {
                object,
                member,
                value,
            },

            (Expr::Variable(name), Some(op)) => Expr::CompoundAssign {
                target: Located::at(name, target_location),
                op,
                value,
            },

            (_, None) => {
                return Err(Located::at(ParserError::InvalidAssignTarget, target_location))
            }

            (_, Some(_)) => {
                return Err(Located::at(ParserError::InvalidCompoundTarget, target_location))
            }
        };

        Ok(Located::at(expr, location))
    }

    fn logical_or(&mut self) -> Parse<Located<Expr>> {
        self.binary(&[(Token::Or, BinOp::Or)], Parser::logical_and)
    }

    fn logical_and(&mut self) -> Parse<Located<Expr>> {
        self.binary(&[(Token::And, BinOp::And)], Parser::comparison)
    }

    fn comparison(&mut self) -> Parse<Located<Expr>> {
        use RelOp::*;

        let operators = [
            (Token::Equal, BinOp::Rel(Equal)),
            (Token::NotEqual, BinOp::Rel(NotEqual)),
            (Token::Greater, BinOp::Rel(Greater)),
            (Token::GreaterOrEqual, BinOp::Rel(GreaterOrEqual)),
            (Token::Less, BinOp::Rel(Less)),
            (Token::LessOrEqual, BinOp::Rel(LessOrEqual)),
        ];

        self.binary(&operators, Parser::additive)
    }

    fn additive(&mut self) -> Parse<Located<Expr>> {
        let operators = [
            (Token::Plus, BinOp::Arith(ArithOp::Add)),
            (Token::Minus, BinOp::Arith(ArithOp::Sub)),
        ];

        self.binary(&operators, Parser::multiplicative)
    }

    fn multiplicative(&mut self) -> Parse<Located<Expr>> {
        let operators = [
            (Token::Times, BinOp::Arith(ArithOp::Mul)),
            (Token::Slash, BinOp::Arith(ArithOp::Div)),
        ];

        self.binary(&operators, Parser::unary)
    }

    /// Secuencia asociativa a la izquierda de operandos de mayor precedencia.
    fn binary(&mut self, operators: &[(Token, BinOp)], operand: Rule<Self>) -> Parse<Located<Expr>> {
        let mut expr = operand(self)?;

        loop {
            let op = match self.peek() {
                Some(token) => operators
                    .iter()
                    .find(|(candidate, _)| candidate == token)
                    .map(|&(_, op)| op),

                None => None,
            };

            let op = match op {
                Some(op) => op,
                None => break Ok(expr),
            };

            self.next()?;
            let rhs = operand(self)?;

            let location = Location::span(expr.location().clone(), rhs.location());
            expr = Located::at(Expr::Binary(Box::new(expr), op, Box::new(rhs)), location);
        }
    }

    fn unary(&mut self) -> Parse<Located<Expr>> {
        let step = match self.peek() {
            Some(Token::Minus) => {
                let minus = self.next()?.location().clone();
                let operand = self.unary()?;

                // `-x` se reduce a `0 - x`
                let zero = Located::at(Expr::Int(0), minus.clone());
                let location = Location::span(minus, operand.location());
                let expr = Expr::Binary(Box::new(zero), BinOp::Arith(ArithOp::Sub), Box::new(operand));

                return Ok(Located::at(expr, location));
            }

            Some(Token::Increment) => Step::Increment,
            Some(Token::Decrement) => Step::Decrement,
            _ => return self.primary(),
        };

        let start = self.next()?.location().clone();
        let target = self.id()?;
        let location = Location::span(start, target.location());

        let expr = Expr::Step {
            target,
            step,
            prefix: true,
        };

        Ok(Located::at(expr, location))
    }

    fn primary(&mut self) -> Parse<Located<Expr>> {
        let (location, token) = self.next()?.split();

        let expr = match token {
            Token::IntLiteral(integer) => Expr::Int(integer),
            Token::FloatLiteral(float) => Expr::Float(float),
            Token::StrLiteral(string) => Expr::Str(string),
            Token::Keyword(Keyword::True) => Expr::Boolean(true),
            Token::Keyword(Keyword::False) => Expr::Boolean(false),
            Token::Id(id) => return self.identifier(Located::at(id, location)),

            Token::OpenParen => {
                let inner = self.expr()?;
                self.expect(Token::CloseParen)?;

                let location = Location::span(location, &self.last_known);
                return Ok(Located::at(Expr::Group(Box::new(inner)), location));
            }

            found => return self.fail(ParserError::ExpectedExpr(found)),
        };

        Ok(Located::at(expr, location))
    }

    /// Identificador seguido opcionalmente de accesos, llamadas o `++`/`--`.
    fn identifier(&mut self, id: Located<Identifier>) -> Parse<Located<Expr>> {
        let start = id.location().clone();

        let mut expr = match id.val().as_str().parse::<Device>() {
            Ok(device) => Located::at(Expr::Device(device), start.clone()),
            Err(()) => {
                if let Some(Token::OpenParen) = self.peek() {
                    let args = self.arguments()?;
                    let location = Location::span(start, &self.last_known);
                    return Ok(Located::at(Expr::Call { callee: id, args }, location));
                }

                id.clone().map(Expr::Variable)
            }
        };

        while let Some(Token::Period) = self.peek() {
            self.next()?;
            let member = self.member()?;

            if let Some(Token::OpenParen) = self.peek() {
                let args = self.arguments()?;
                let location = Location::span(start, &self.last_known);

                let (object_location, object) = expr.split();
                let call = match object {
                    Expr::Variable(name) if NAMESPACES.contains(&name.as_str()) => Expr::StaticCall {
                        namespace: Located::at(name, object_location),
                        method: member,
                        args,
                    },

                    object => Expr::MethodCall {
                        object: Box::new(Located::at(object, object_location)),
                        method: member,
                        args,
                    },
                };

                return Ok(Located::at(call, location));
            }

            let location = Location::span(start.clone(), member.location());
            let object = Box::new(expr);
            expr = Located::at(Expr::Member { object, member }, location);
        }

        let step = match (expr.val(), self.peek()) {
            (Expr::Variable(_), Some(Token::Increment)) => Step::Increment,
            (Expr::Variable(_), Some(Token::Decrement)) => Step::Decrement,
            _ => return Ok(expr),
        };

        self.next()?;
        let location = Location::span(start, &self.last_known);
        let expr = Expr::Step {
            target: id,
            step,
            prefix: false,
        };

        Ok(Located::at(expr, location))
    }

    fn arguments(&mut self) -> Parse<Vec<Located<Expr>>> {
        self.expect(Token::OpenParen)?;

        let mut args = Vec::new();
        if let Some(Token::CloseParen) = self.peek() {
            self.next()?;
            return Ok(args);
        }

        loop {
            args.push(self.expr()?);

            match self.next()?.into_inner() {
                Token::Comma => continue,
                Token::CloseParen => break Ok(args),
                found => break self.fail(ParserError::UnexpectedToken(Token::CloseParen, found)),
            }
        }
    }

    fn member(&mut self) -> Parse<Located<Identifier>> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(name) => Ok(Located::at(name, location)),
            found => self.fail(ParserError::ExpectedMember(found)),
        }
    }

    fn id(&mut self) -> Parse<Located<Identifier>> {
        let (location, token) = self.next()?.split();
        match token {
            Token::Id(id) => Ok(Located::at(id, location)),
            found => self.fail(ParserError::ExpectedId(found)),
        }
    }

    fn expect(&mut self, token: Token) -> Parse<()> {
        let found = self.next()?.into_inner();
        if found == token {
            Ok(())
        } else {
            self.fail(ParserError::UnexpectedToken(token, found))
        }
    }

    fn peek(&mut self) -> Option<&'a Token> {
        self.tokens.peek().copied().map(Located::val)
    }

    fn peek_second(&self) -> Option<&'a Token> {
        let mut fork = self.tokens.clone();
        fork.next();
        fork.next().map(Located::val)
    }

    fn next(&mut self) -> Parse<Located<Token>> {
        match self.tokens.next() {
            Some(token) => {
                self.last_known = token.location().clone();
                Ok(token.clone())
            }

            None => self.fail(ParserError::UnexpectedEof),
        }
    }

    fn fail<T>(&self, error: ParserError) -> Parse<T> {
        Err(Located::at(error, self.last_known.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::Lexer, source::Source};

    fn program(text: &str) -> Result<Vec<Statement>, ParserError> {
        let tokens = Lexer::new(Source::new("test", text))
            .try_exhaustive()
            .unwrap();

        parse(tokens.iter()).map_err(Located::into_inner)
    }

    fn single_expr(text: &str) -> Expr {
        match program(text).unwrap().pop() {
            Some(Statement::Expr(expr)) => expr.into_inner(),
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn typed_and_untyped_declarations() {
        let statements = program("var a = 1; Float b = 2.5;").unwrap();

        match &statements[..] {
            [Statement::Declaration { name: a, typ: None, .. }, Statement::Declaration {
                name: b,
                typ: Some(typ),
                ..
            }] => {
                assert_eq!(a.val().as_str(), "a");
                assert_eq!(b.val().as_str(), "b");
                assert_eq!(typ.val().as_str(), "Float");
            }

            other => panic!("unexpected statements {:?}", other),
        }
    }

    #[test]
    fn precedence() {
        // a = b || c && d < e + f * g
        let expr = single_expr("a = b || c && d < e + f * g;");

        let value = match expr {
            Expr::Assign { value, .. } => value.into_inner(),
            other => panic!("expected assignment, got {:?}", other),
        };

        let (lhs, rhs) = match value {
            Expr::Binary(lhs, BinOp::Or, rhs) => (lhs, rhs),
            other => panic!("expected `||`, got {:?}", other),
        };

        assert!(matches!(lhs.val(), Expr::Variable(_)));
        match rhs.into_inner() {
            Expr::Binary(_, BinOp::And, cmp) => match cmp.into_inner() {
                Expr::Binary(_, BinOp::Rel(RelOp::Less), sum) => {
                    assert!(matches!(
                        sum.val(),
                        Expr::Binary(_, BinOp::Arith(ArithOp::Add), _)
                    ))
                }

                other => panic!("expected `<`, got {:?}", other),
            },

            other => panic!("expected `&&`, got {:?}", other),
        }
    }

    #[test]
    fn arithmetic_is_left_associative() {
        match single_expr("x - y - z;") {
            Expr::Binary(lhs, BinOp::Arith(ArithOp::Sub), rhs) => {
                assert!(matches!(lhs.val(), Expr::Binary(..)));
                assert!(matches!(rhs.val(), Expr::Variable(_)));
            }

            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unary_minus_is_subtraction_from_zero() {
        match single_expr("x = -(y);") {
            Expr::Assign { value, .. } => match value.into_inner() {
                Expr::Binary(zero, BinOp::Arith(ArithOp::Sub), _) => {
                    assert!(matches!(zero.val(), Expr::Int(0)))
                }

                other => panic!("unexpected {:?}", other),
            },

            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn member_chains_and_calls() {
        assert!(matches!(
            single_expr("Math.convertToCelsius(t);"),
            Expr::StaticCall { .. }
        ));

        assert!(matches!(
            single_expr("sensor.reset(1, 2);"),
            Expr::MethodCall { ref args, .. } if args.len() == 2
        ));

        assert!(matches!(single_expr("sleep();"), Expr::Call { ref args, .. } if args.is_empty()));
        assert!(matches!(single_expr("sensor.Temperature;"), Expr::Member { .. }));
        assert!(matches!(single_expr("sensor.On = true;"), Expr::MemberAssign { .. }));
        assert!(matches!(single_expr("d3;"), Expr::Device(Device::Pin(3))));
        assert!(matches!(single_expr("db.Setting;"), Expr::Member { .. }));
    }

    #[test]
    fn steps_and_compound_assignment() {
        assert!(matches!(
            single_expr("i++;"),
            Expr::Step { step: Step::Increment, prefix: false, .. }
        ));

        assert!(matches!(
            single_expr("--i;"),
            Expr::Step { step: Step::Decrement, prefix: true, .. }
        ));

        assert!(matches!(
            single_expr("i *= 2;"),
            Expr::CompoundAssign { op: ArithOp::Mul, .. }
        ));
    }

    #[test]
    fn if_else_with_blocks() {
        let statements = program("if (a) { b = 1; } else c = 2;").unwrap();

        match &statements[..] {
            [Statement::If {
                then,
                otherwise: Some(otherwise),
                ..
            }] => {
                assert!(matches!(**then, Statement::Block(ref body) if body.len() == 1));
                assert!(matches!(**otherwise, Statement::Expr(_)));
            }

            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(
            program("var a = 1").unwrap_err(),
            ParserError::UnexpectedToken(Token::Semicolon, Token::Eof)
        );

        assert_eq!(program("1 = 2;").unwrap_err(), ParserError::InvalidAssignTarget);
        assert_eq!(program("a.On += 2;").unwrap_err(), ParserError::InvalidCompoundTarget);
        assert_eq!(
            program("{ a = 1;").unwrap_err(),
            ParserError::UnexpectedToken(Token::CloseCurly, Token::Eof)
        );

        assert_eq!(program("a = ;").unwrap_err(), ParserError::ExpectedExpr(Token::Semicolon));
        assert!(matches!(program("++1;").unwrap_err(), ParserError::ExpectedId(_)));
    }

    #[test]
    fn empty_program() {
        assert!(program("  # nothing\n").unwrap().is_empty());
    }
}
