//! Análisis léxico.
//!
//! # Tokenization
//! Esta es la primera fase del compilador. Descompone el texto fuente
//! en unidades léxicas denominadas tokens. Los espacios en blanco y los
//! comentarios (`#` hasta el final de la línea) se descartan durante esta
//! operación. Cada token emitido esta asociado a una ubicación en el
//! código fuente original, lo cual permite rastrear errores en tanto los
//! mismos como constructos más elevados de fases posteriores.
//!
//! # Contenido de un token
//! Operadores, puntuación y palabras clave se identifican por el hecho de
//! lo que son y no incluyen lexemas. Los identificadores sí incluyen su
//! lexema original. Las constantes literales se resuelven a sus valores
//! en vez de preservar sus lexemas.
//!
//! # Reglas importantes del lenguaje
//! - Los identificadores comienzan con una letra y continúan con letras o dígitos.
//! - El lenguaje distingue mayúsculas de minúsculas.
//! - Un `-` inmediatamente seguido de un dígito se funde con el literal
//!   numérico cuando aparece en una posición donde no puede ser una resta.
//! - Solo `var`, `if`, `else`, `true` y `false` son reservados. Todo otro
//!   término es un identificador, incluso los nombres de propiedades.
//!
//! # Errores
//! El primer error léxico termina el flujo de tokens. No hay recuperación.

use crate::source::{Located, Location, Source};

use std::{
    borrow::Borrow,
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};

use thiserror::Error;
use tracing::trace;

/// Error de escaneo.
#[non_exhaustive]
#[derive(Error, Debug, PartialEq)]
pub enum LexerError {
    /// Carácter desconocido o inesperado en el flujo de entrada.
    #[error("Unexpected char {0:?}")]
    BadChar(char),

    /// Se esperaba un carácter específico en esta posición.
    #[error("Expected {0:?}")]
    Expected(char),

    /// Una constante entera se encuentra fuera de rango.
    #[error("Integer literal overflow, valid range is [{}, {}]", i32::MIN, i32::MAX)]
    IntOverflow,

    /// Una constante flotante no pudo interpretarse.
    #[error("Malformed float literal")]
    BadFloat,

    /// Se alcanzó el final de la entrada dentro de una cadena.
    #[error("Unterminated string literal")]
    UnterminatedString,
}

/// Un identificador.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Rc<str>);

impl Identifier {
    pub fn new(name: &str) -> Self {
        Identifier(Rc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.0)
    }
}

/// Objeto resultante del análisis léxico.
///
/// Un token contiene suficiente información para describir completamente
/// a una entidad léxica en el programa fuente.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identificador.
    Id(Identifier),

    /// Palabra clave.
    Keyword(Keyword),

    /// Literal de entero.
    IntLiteral(i32),

    /// Literal de punto flotante.
    FloatLiteral(f64),

    /// Literal de cadena, sin procesamiento de escapes.
    StrLiteral(Rc<str>),

    /// `=`
    Assign,

    /// `+=`
    PlusAssign,

    /// `-=`
    MinusAssign,

    /// `*=`
    TimesAssign,

    /// `/=`
    DivAssign,

    /// `++`
    Increment,

    /// `--`
    Decrement,

    /// `==`
    Equal,

    /// `!=`
    NotEqual,

    /// `>`
    Greater,

    /// `>=`
    GreaterOrEqual,

    /// `<`
    Less,

    /// `<=`
    LessOrEqual,

    /// `&&`
    And,

    /// `||`
    Or,

    /// `+`
    Plus,

    /// `-`
    Minus,

    /// `*`
    Times,

    /// `/`
    Slash,

    /// `,`
    Comma,

    /// `.`
    Period,

    /// `;`
    Semicolon,

    /// `(`
    OpenParen,

    /// `)`
    CloseParen,

    /// `{`
    OpenCurly,

    /// `}`
    CloseCurly,

    /// Fin de la entrada.
    Eof,
}

impl Display for Token {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Token::*;

        match self {
            Id(id) => write!(fmt, "identifier `{}`", id),
            Keyword(keyword) => write!(fmt, "keyword `{}`", keyword),
            IntLiteral(integer) => write!(fmt, "literal `{}`", integer),
            FloatLiteral(float) => write!(fmt, "literal `{}`", float),
            StrLiteral(string) => write!(fmt, "literal \"{}\"", string),
            Assign => fmt.write_str("`=`"),
            PlusAssign => fmt.write_str("`+=`"),
            MinusAssign => fmt.write_str("`-=`"),
            TimesAssign => fmt.write_str("`*=`"),
            DivAssign => fmt.write_str("`/=`"),
            Increment => fmt.write_str("`++`"),
            Decrement => fmt.write_str("`--`"),
            Equal => fmt.write_str("`==`"),
            NotEqual => fmt.write_str("`!=`"),
            Greater => fmt.write_str("`>`"),
            GreaterOrEqual => fmt.write_str("`>=`"),
            Less => fmt.write_str("`<`"),
            LessOrEqual => fmt.write_str("`<=`"),
            And => fmt.write_str("`&&`"),
            Or => fmt.write_str("`||`"),
            Plus => fmt.write_str("`+`"),
            Minus => fmt.write_str("`-`"),
            Times => fmt.write_str("`*`"),
            Slash => fmt.write_str("`/`"),
            Comma => fmt.write_str("`,`"),
            Period => fmt.write_str("`.`"),
            Semicolon => fmt.write_str("`;`"),
            OpenParen => fmt.write_str("`(`"),
            CloseParen => fmt.write_str("`)`"),
            OpenCurly => fmt.write_str("`{`"),
            CloseCurly => fmt.write_str("`}`"),
            Eof => fmt.write_str("end of input"),
        }
    }
}

/// Una palabra clave.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Keyword {
    Var,
    If,
    Else,
    True,
    False,
}

impl Display for Keyword {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Keyword::*;
        let string = match self {
            Var   => "var",
            If    => "if",
            Else  => "else",
            True  => "true",
            False => "false",
        };

        fmt.write_str(string)
    }
}

impl FromStr for Keyword {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use Keyword::*;

        const KEYWORDS: &[(&str, Keyword)] = &[
            ("var",   Var),
            ("if",    If),
            ("else",  Else),
            ("true",  True),
            ("false", False),
        ];

        KEYWORDS
            .iter()
            .find(|&&(name, _)| name == string)
            .map(|&(_, keyword)| keyword)
            .ok_or(())
    }
}

/// Máquina de estados para análisis léxico.
///
/// Un lexer puede encontrarse en uno de diversos estados. La
/// salida del lexer, así como su siguiente estado, se define
/// a partir de tanto su estado actual como el siguiente carácter
/// encontrado en la entrada.
pub struct Lexer {
    source: Rc<Source>,
    offset: usize,
    start: usize,
    state: State,
    operand_expected: bool,
    finished: bool,
}

/// Posibles estados del lexer.
enum State {
    /// Estado que ocurre antes de encontrar el inicio de un token.
    Start,

    /// Estado de completitud; siempre emite el token incluido
    /// y pasa a [`State::Start`].
    Complete(Token),

    /// Comentario de línea.
    ///
    /// Este estado vuelve a [`State::Start`] al encontrar `'\n'`.
    Comment,

    /// Parte entera de una constante numérica, con signo opcional.
    Integer(String),

    /// Parte fraccionaria de una constante flotante.
    Fraction(String),

    /// Término que puede ser un identificador o una palabra clave.
    Word(String),

    /// Contenido de una cadena, tras la comilla de apertura.
    Text(String),

    /// Primer carácter de un operador que puede ser de dos caracteres.
    Pending(char),
}

impl Lexer {
    /// Crea un lexer en estado inicial a partir de un origen.
    pub fn new(source: Rc<Source>) -> Self {
        Lexer {
            source,
            offset: 0,
            start: 0,
            state: State::Start,
            operand_expected: true,
            finished: false,
        }
    }

    /// Reduce la entrada a una secuencia de tokens terminada en
    /// [`Token::Eof`], o bien al primer error léxico.
    pub fn try_exhaustive(self) -> Result<Vec<Located<Token>>, Located<LexerError>> {
        self.collect()
    }

    fn peek(&self) -> Option<char> {
        self.source.text()[self.offset..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.source.text()[self.offset..].chars().nth(1)
    }

    /// Intenta construir un siguiente token.
    fn lex(&mut self) -> Result<Token, LexerError> {
        use {State::*, Token::*};

        loop {
            let next_char = self.peek();
            let second_is_digit = self.peek_second().map_or(false, |c| c.is_ascii_digit());

            // La posición de origen se mueve junto a la posición
            // siguiente siempre que no se haya encontrado una
            // frontera de token
            if let Start = self.state {
                self.start = self.offset;
            }

            // Switch table principal, determina cambios de estado
            // y de salida del lexer a partir de combinaciones del
            // estado actual y el siguiente carácter
            match (&mut self.state, next_char) {
                (Start, None) => break Ok(Eof),

                // Tokens triviales
                (Start, Some(',')) => self.state = Complete(Comma),
                (Start, Some('.')) => self.state = Complete(Period),
                (Start, Some(';')) => self.state = Complete(Semicolon),
                (Start, Some('(')) => self.state = Complete(OpenParen),
                (Start, Some(')')) => self.state = Complete(CloseParen),
                (Start, Some('{')) => self.state = Complete(OpenCurly),
                (Start, Some('}')) => self.state = Complete(CloseCurly),
                (Start, Some('#')) => self.state = Comment,
                (Start, Some('"')) => self.state = Text(String::new()),

                // Literal negativo en posición de operando
                (Start, Some('-')) if self.operand_expected && second_is_digit => {
                    self.state = Integer(String::from("-"))
                }

                (Start, Some(c)) if "=<>!&|+-*/".contains(c) => self.state = Pending(c),

                // Identificadores y palabras clave
                (Start, Some(c)) if c.is_alphabetic() => self.state = Word(c.to_string()),

                // Inicio de una constante numérica. No se consume
                // el dígito, ya que esta lógica ya está implementada
                // en el respectivo caso para un estado de constante
                // entera para el cual el siguiente carácter es un dígito.
                (Start, Some(c)) if c.is_ascii_digit() => {
                    self.state = Integer(String::new());
                    continue;
                }

                // Espacios en blanco y caracteres inesperados
                (Start, Some(c)) if c.is_whitespace() => (),
                (Start, Some(c)) => break Err(LexerError::BadChar(c)),

                // Emisión retardada de tokens cualesquiera
                (Complete(token), _) => break Ok(std::mem::replace(token, Eof)),

                // Los comentarios descartan la línea donde ocurren
                (Comment, Some('\n')) | (Comment, None) => self.state = Start,
                (Comment, Some(_)) => (),

                (Integer(digits), Some(c)) if c.is_ascii_digit() => digits.push(c),

                // Un punto solo continúa la constante si le sigue un dígito
                (Integer(digits), Some('.')) if second_is_digit => {
                    let mut digits = std::mem::take(digits);
                    digits.push('.');
                    self.state = Fraction(digits);
                }

                (Integer(digits), _) => {
                    break digits
                        .parse()
                        .map(IntLiteral)
                        .map_err(|_| LexerError::IntOverflow)
                }

                (Fraction(digits), Some(c)) if c.is_ascii_digit() => digits.push(c),
                (Fraction(digits), _) => {
                    break digits
                        .parse()
                        .map(FloatLiteral)
                        .map_err(|_| LexerError::BadFloat)
                }

                // Extensión de términos
                (Word(word), Some(c)) if c.is_alphanumeric() => word.push(c),

                // Si sigue algo que no puede formar parte del término, ha terminado
                (Word(word), _) => break Ok(classify(std::mem::take(word))),

                (Text(text), Some('"')) => {
                    let text = std::mem::take(text);
                    self.state = Complete(StrLiteral(Rc::from(text)));
                }

                (Text(_), None) => break Err(LexerError::UnterminatedString),
                (Text(text), Some(c)) => text.push(c),

                (Pending(first), next) => {
                    let first = *first;
                    match next.and_then(|second| pair(first, second)) {
                        Some(token) => self.state = Complete(token),
                        None => break single(first),
                    }
                }
            }

            // Si no hubo `continue` ni `break`, aquí se consume el carácter
            // que se observó con lookahead anteriormente
            if let Some(c) = next_char {
                self.offset += c.len_utf8();
            }
        }
    }
}

impl Iterator for Lexer {
    type Item = Result<Located<Token>, Located<LexerError>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let result = self.lex();
        let location = Location::new(Rc::clone(&self.source), self.start..self.offset);
        self.state = State::Start;

        match result {
            Ok(token) => {
                trace!(%token, offset = self.start, "token");

                self.finished = matches!(token, Token::Eof);
                self.operand_expected = expects_operand(&token);
                Some(Ok(Located::at(token, location)))
            }

            Err(error) => {
                self.finished = true;
                Some(Err(Located::at(error, location)))
            }
        }
    }
}

/// Resuelve un término a palabra clave o identificador.
fn classify(word: String) -> Token {
    match Keyword::from_str(&word) {
        Ok(keyword) => Token::Keyword(keyword),
        Err(()) => Token::Id(Identifier(Rc::from(word))),
    }
}

/// Operadores de dos caracteres.
fn pair(first: char, second: char) -> Option<Token> {
    use Token::*;

    let token = match (first, second) {
        ('=', '=') => Equal,
        ('!', '=') => NotEqual,
        ('>', '=') => GreaterOrEqual,
        ('<', '=') => LessOrEqual,
        ('&', '&') => And,
        ('|', '|') => Or,
        ('+', '=') => PlusAssign,
        ('-', '=') => MinusAssign,
        ('*', '=') => TimesAssign,
        ('/', '=') => DivAssign,
        ('+', '+') => Increment,
        ('-', '-') => Decrement,
        _ => return None,
    };

    Some(token)
}

/// Operadores de un solo carácter que comparten prefijo con los de dos.
fn single(first: char) -> Result<Token, LexerError> {
    use Token::*;

    match first {
        '=' => Ok(Assign),
        '>' => Ok(Greater),
        '<' => Ok(Less),
        '+' => Ok(Plus),
        '-' => Ok(Minus),
        '*' => Ok(Times),
        '/' => Ok(Slash),
        '!' => Err(LexerError::Expected('=')),
        '&' => Err(LexerError::Expected('&')),
        '|' => Err(LexerError::Expected('|')),
        c => Err(LexerError::BadChar(c)),
    }
}

/// Determina si tras un token solo puede seguir un operando, en cuyo
/// caso un `-` no puede ser una resta.
fn expects_operand(token: &Token) -> bool {
    use Token::*;

    matches!(
        token,
        OpenParen
            | Comma
            | Assign
            | PlusAssign
            | MinusAssign
            | TimesAssign
            | DivAssign
            | Equal
            | NotEqual
            | Greater
            | GreaterOrEqual
            | Less
            | LessOrEqual
            | And
            | Or
            | OpenCurly
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<Token> {
        Lexer::new(Source::new("test", text))
            .try_exhaustive()
            .unwrap()
            .into_iter()
            .map(Located::into_inner)
            .collect()
    }

    fn error(text: &str) -> LexerError {
        Lexer::new(Source::new("test", text))
            .try_exhaustive()
            .unwrap_err()
            .into_inner()
    }

    fn id(name: &str) -> Token {
        Token::Id(Identifier::new(name))
    }

    #[test]
    fn declaration() {
        use Token::*;

        assert_eq!(
            tokens("Float temp = airConditioner.Temperature;"),
            vec![
                id("Float"),
                id("temp"),
                Assign,
                id("airConditioner"),
                Period,
                id("Temperature"),
                Semicolon,
                Eof,
            ]
        );
    }

    #[test]
    fn keywords_and_literals() {
        use Token::*;

        assert_eq!(
            tokens("var if else true false pi \"hello world\" 12 3.25"),
            vec![
                Token::Keyword(super::Keyword::Var),
                Token::Keyword(super::Keyword::If),
                Token::Keyword(super::Keyword::Else),
                Token::Keyword(super::Keyword::True),
                Token::Keyword(super::Keyword::False),
                id("pi"),
                StrLiteral(Rc::from("hello world")),
                IntLiteral(12),
                FloatLiteral(3.25),
                Eof,
            ]
        );
    }

    #[test]
    fn trailing_period_is_not_part_of_number() {
        use Token::*;

        assert_eq!(tokens("1."), vec![IntLiteral(1), Period, Eof]);
        assert_eq!(tokens("1.x"), vec![IntLiteral(1), Period, id("x"), Eof]);
    }

    #[test]
    fn negative_literals_only_in_operand_position() {
        use Token::*;

        assert_eq!(tokens("-5"), vec![IntLiteral(-5), Eof]);
        assert_eq!(
            tokens("x = -2.5"),
            vec![id("x"), Assign, FloatLiteral(-2.5), Eof]
        );
        assert_eq!(
            tokens("f(1, -2)"),
            vec![id("f"), OpenParen, IntLiteral(1), Comma, IntLiteral(-2), CloseParen, Eof]
        );
        assert_eq!(
            tokens("a -5"),
            vec![id("a"), Minus, IntLiteral(5), Eof]
        );
        assert_eq!(
            tokens("(a) - b"),
            vec![OpenParen, id("a"), CloseParen, Minus, id("b"), Eof]
        );
        assert_eq!(tokens("x >= -1"), vec![id("x"), GreaterOrEqual, IntLiteral(-1), Eof]);
    }

    #[test]
    fn compound_operators() {
        use Token::*;

        assert_eq!(
            tokens("a += 1; b -= 2; c *= 3; d /= 4; e++; f--; g == h != i <= j >= k && l || m"),
            vec![
                id("a"), PlusAssign, IntLiteral(1), Semicolon,
                id("b"), MinusAssign, IntLiteral(2), Semicolon,
                id("c"), TimesAssign, IntLiteral(3), Semicolon,
                id("d"), DivAssign, IntLiteral(4), Semicolon,
                id("e"), Increment, Semicolon,
                id("f"), Decrement, Semicolon,
                id("g"), Equal, id("h"), NotEqual, id("i"), LessOrEqual, id("j"),
                GreaterOrEqual, id("k"), And, id("l"), Or, id("m"),
                Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        use Token::*;

        assert_eq!(
            tokens("# a comment\nx # trailing\n# last"),
            vec![id("x"), Eof]
        );
    }

    #[test]
    fn locations_are_byte_ranges() {
        let located = Lexer::new(Source::new("test", "  abc >= 10"))
            .try_exhaustive()
            .unwrap();

        let ranges: Vec<_> = located.iter().map(|token| token.location().range()).collect();
        assert_eq!(ranges, vec![2..5, 6..8, 9..11, 11..11]);
    }

    #[test]
    fn lexical_errors() {
        assert_eq!(error("a ! b"), LexerError::Expected('='));
        assert_eq!(error("a & b"), LexerError::Expected('&'));
        assert_eq!(error("a | b"), LexerError::Expected('|'));
        assert_eq!(error("\"open"), LexerError::UnterminatedString);
        assert_eq!(error("a $ b"), LexerError::BadChar('$'));
        assert_eq!(error("99999999999"), LexerError::IntOverflow);
    }

    #[test]
    fn errors_end_the_stream() {
        let mut lexer = Lexer::new(Source::new("test", "a @ b"));

        assert!(matches!(lexer.next(), Some(Ok(_))));
        assert!(matches!(lexer.next(), Some(Err(_))));
        assert!(lexer.next().is_none());
    }
}
