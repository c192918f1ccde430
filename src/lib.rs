//! Compilador del lenguaje de scripting de Stationeers a ensamblador IC10.
//!
//! # Front end
//! Cada programa deriva de un único texto fuente. Este texto se somete
//! primero a análisis léxico en [`lex`], de lo cual se obtiene un flujo de
//! tokens. El flujo de tokens se dispone en un AST por medio de análisis
//! sintáctico en [`parse`]. El árbol sintáctico es validado por análisis
//! semántico en [`semantic`], el cual además resuelve las referencias a
//! dispositivos en tiempo de compilación.
//!
//! # Middle end
//! El árbol validado se traduce en [`lower`] a la representación
//! intermedia descrita en [`ir`]. Opcionalmente se aplican las pasadas de
//! [`optimize`].
//!
//! # Back end
//! [`codegen`] asigna registros físicos a los temporales de la IR y emite
//! el listado IC10 final, envuelto en un ciclo `start:`/`j start`.
//!
//! Ninguna fase mantiene estado global mutable. Cada compilación es una
//! función pura del texto fuente.

use std::rc::Rc;

use tracing::{debug, instrument};

#[macro_use]
mod macros;

pub mod codegen;
pub mod devices;
pub mod error;
pub mod ir;
pub mod lex;
pub mod lower;
pub mod optimize;
pub mod parse;
pub mod semantic;
pub mod source;

pub use error::{CompileError, Diagnostics};
pub use optimize::Passes;
pub use semantic::analyze;

use crate::{
    ir::IrProgram,
    lex::{Lexer, Token},
    parse::Statement,
    source::{Located, Source},
};

/// Nombre de origen para textos que no provienen de un archivo.
const ANONYMOUS: &str = "input";

/// Una unidad de compilación: un único texto fuente con nombre.
///
/// Cada método ejecuta la pipeline desde el inicio hasta la fase
/// correspondiente.
pub struct Compilation {
    source: Rc<Source>,
}

impl Compilation {
    pub fn new(source: Rc<Source>) -> Self {
        Compilation { source }
    }

    pub fn tokens(&self) -> Result<Vec<Located<Token>>, CompileError> {
        let tokens = Lexer::new(Rc::clone(&self.source)).try_exhaustive()?;
        debug!(tokens = tokens.len(), "lexed source");

        Ok(tokens)
    }

    pub fn statements(&self) -> Result<Vec<Statement>, CompileError> {
        let tokens = self.tokens()?;
        Ok(parse::parse(tokens.iter())?)
    }

    /// IR validada y sin optimizar.
    pub fn ir(&self) -> Result<IrProgram, CompileError> {
        let statements = self.statements()?;
        let references = semantic::analyze(&statements)?;

        Ok(lower::lower(&statements, &references)?)
    }

    /// IR con las pasadas indicadas ya aplicadas.
    pub fn optimized(&self, passes: Passes) -> Result<IrProgram, CompileError> {
        Ok(optimize::optimize(self.ir()?, passes))
    }

    /// Listado IC10 final, una instrucción por línea.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub fn assembly(&self, passes: Passes) -> Result<Vec<String>, CompileError> {
        let program = self.optimized(passes)?;
        Ok(codegen::emit(&program)?)
    }
}

fn anonymous(text: &str) -> Compilation {
    Compilation::new(Source::new(ANONYMOUS, text))
}

/// Análisis léxico completo de un texto.
pub fn tokenize(text: &str) -> Result<Vec<Located<Token>>, CompileError> {
    anonymous(text).tokens()
}

/// Análisis léxico y sintáctico de un texto.
pub fn parse(text: &str) -> Result<Vec<Statement>, CompileError> {
    anonymous(text).statements()
}

/// IR sin optimizar de un programa válido.
pub fn lower(text: &str) -> Result<IrProgram, CompileError> {
    anonymous(text).ir()
}

/// Compila un programa a IC10, con todas las optimizaciones o con ninguna.
pub fn compile(text: &str, optimize: bool) -> Result<Vec<String>, CompileError> {
    let passes = if optimize {
        Passes::all()
    } else {
        Passes::empty()
    };

    compile_with(text, passes)
}

/// Compila un programa a IC10 con una selección explícita de pasadas.
pub fn compile_with(text: &str, passes: Passes) -> Result<Vec<String>, CompileError> {
    anonymous(text).assembly(passes)
}
