//! Errores de compilación y su presentación.
//!
//! Cada fase define su propio tipo de error. [`CompileError`] los reúne
//! en una sola enumeración y [`Diagnostics`] se encarga de mostrarlos al
//! usuario junto con el fragmento de código fuente que los originó.

use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

use crate::{
    codegen::CodegenError,
    lex::LexerError,
    parse::ParserError,
    semantic::SemanticError,
    source::{Located, Location},
};

/// Error de cualquier fase del compilador.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] Located<LexerError>),

    #[error(transparent)]
    Syntax(#[from] Located<ParserError>),

    #[error(transparent)]
    Semantic(#[from] Located<SemanticError>),

    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

impl CompileError {
    /// Nombre corto de la categoría de error.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Lex(_) => "lexical error",
            CompileError::Syntax(_) => "syntax error",
            CompileError::Semantic(_) => "type error",
            CompileError::Codegen(_) => "codegen error",
        }
    }

    /// Ubicación en el código fuente. Los errores de generación de código
    /// no tienen una.
    pub fn location(&self) -> Option<&Location> {
        match self {
            CompileError::Lex(error) => Some(error.location()),
            CompileError::Syntax(error) => Some(error.location()),
            CompileError::Semantic(error) => Some(error.location()),
            CompileError::Codegen(_) => None,
        }
    }

    /// El error sin información de ubicación.
    pub fn cause(&self) -> &dyn Error {
        match self {
            CompileError::Lex(error) => error.val(),
            CompileError::Syntax(error) => error.val(),
            CompileError::Semantic(error) => error.val(),
            CompileError::Codegen(error) => error,
        }
    }
}

/// Reporte legible de uno o más errores.
#[derive(Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl From<CompileError> for Diagnostics {
    fn from(error: CompileError) -> Self {
        Diagnostics {
            errors: vec![error],
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics { errors } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No errors were reported");
        }

        for error in errors {
            writeln!(fmt, "{}: {}", error.kind(), error.cause())?;
            if let Some(location) = error.location() {
                excerpt(fmt, location)?;
            }

            writeln!(fmt)?;
        }

        let error_or_errors = if errors.len() == 1 { "error" } else { "errors" };
        writeln!(
            fmt,
            "Build failed with {} {}",
            errors.len(),
            error_or_errors
        )
    }
}

/// Líneas afectadas con el rango señalado debajo.
fn excerpt(fmt: &mut fmt::Formatter<'_>, location: &Location) -> fmt::Result {
    writeln!(fmt, " --> {}", location)?;

    let (start, end) = (location.start(), location.end());
    let digits = end.line().to_string().chars().count();
    writeln!(fmt, "{:digits$} |", "", digits = digits)?;

    for line_number in start.line()..=end.line() {
        location.source().with_line(line_number, |line| {
            writeln!(fmt, "{:>digits$} | {}", line_number, line, digits = digits)
        })?
    }

    // Un rango que termina al inicio de una línea señala al menos una columna
    let (from, to) = (start.column(), end.column().saturating_sub(1).max(1));
    let min = from.min(to);
    let max = from.max(to);

    let skip = (min - 1) as usize;
    let highlight = (max - min + 1) as usize;

    writeln!(
        fmt,
        "{:digits$} | {:skip$}{:^<highlight$}",
        "",
        "",
        "",
        digits = digits,
        skip = skip,
        highlight = highlight
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ir::Temp, source::Source};

    #[test]
    fn renders_source_excerpt() {
        let source = Source::new("demo.ic", "var x = 1;\nvar x = 2;\n");
        let location = Location::new(source, 15..16);
        let error = CompileError::from(Located::at(
            SemanticError::Redeclared(crate::lex::Identifier::new("x")),
            location,
        ));

        let report = Diagnostics::from(error).to_string();
        let expected = "\
type error: Variable `x` is already declared
 --> demo.ic:2:5
  |
2 | var x = 2;
  |     ^

Build failed with 1 error
";

        assert_eq!(report, expected);
    }

    #[test]
    fn errors_without_location_have_no_excerpt() {
        let report = Diagnostics::from(CompileError::Codegen(CodegenError::RegistersExhausted(Temp(16))))
            .to_string();

        assert!(report.starts_with("codegen error: Program requires more than 16"));
        assert!(!report.contains("-->"));
        assert!(report.ends_with("Build failed with 1 error\n"));
    }

    #[test]
    fn empty_report() {
        assert_eq!(Diagnostics::default().to_string(), "No errors were reported\n");
    }
}
