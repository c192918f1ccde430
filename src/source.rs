//! Rastreo de ubicaciones originales en código fuente.
//!
//! Los distintos objetos internos que el compilador construye
//! deben llevar cuenta de rangos de ubicaciones en el código
//! fuente original, lo cual permite determinar un punto exacto
//! o aproximado en donde ocurre un error de abstracción arbitraria.
//!
//! Una ubicación se guarda como un rango de offsets en bytes. La
//! conversión a línea y columna solo ocurre al reportar errores.

use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    ops::Range,
    rc::Rc,
};

/// Ancho de los divisores de tabulador.
const TAB_STOP: u32 = 4;

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Descarta la ubicación y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    /// Transforma el valor con la misma ubicación.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            location: self.location,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

impl<T: Display> Display for Located<T> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} (at {})", self.value, self.location)
    }
}

impl<E: Error> Error for Located<E> {}

/// Código fuente completo junto a un nombre de origen.
pub struct Source {
    name: String,
    text: String,
}

impl Source {
    /// Construye un origen compartido.
    pub fn new<N: Into<String>, T: Into<String>>(name: N, text: T) -> Rc<Self> {
        Rc::new(Source {
            name: name.into(),
            text: text.into(),
        })
    }

    /// Nombre del origen, típicamente una ruta.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Texto completo.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Invoca `callback` con el contenido de la línea indicada (base 1).
    pub fn with_line<R, F>(&self, line: u32, callback: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        let line = self.text.lines().nth(line as usize - 1).unwrap_or("");
        callback(line)
    }

    /// Traduce un offset a una posición línea-columna.
    fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.text.len());
        let mut position = Position::default();

        for c in self.text[..offset].chars() {
            position = match c {
                '\n' => position.newline(),
                '\t' => position.tab(),
                _ => position.advance(),
            };
        }

        position
    }
}

/// Una ubicación está conformada por un origen y un rango de offsets.
#[derive(Clone)]
pub struct Location {
    from: Rc<Source>,
    span: Range<usize>,
}

impl Location {
    /// Construye una ubicación dentro de un origen.
    pub fn new(from: Rc<Source>, span: Range<usize>) -> Self {
        Location { from, span }
    }

    /// Unifica un rango de ubicaciones. Se asume el mismo origen.
    pub fn span(from: Location, to: &Location) -> Self {
        let end = from.span.end.max(to.span.end);
        Location {
            from: from.from,
            span: from.span.start..end,
        }
    }

    /// Offset en bytes del inicio.
    pub fn offset(&self) -> usize {
        self.span.start
    }

    /// Rango de bytes.
    pub fn range(&self) -> Range<usize> {
        self.span.clone()
    }

    /// Origen al que pertenece esta ubicación.
    pub fn source(&self) -> &Source {
        &self.from
    }

    /// Obtiene la posición de inicio.
    pub fn start(&self) -> Position {
        self.from.position(self.span.start)
    }

    /// Obtiene la posición de fin, exclusiva.
    ///
    /// Los rangos vacíos se extienden a una columna para que siempre
    /// haya algo que señalar.
    pub fn end(&self) -> Position {
        if self.span.end > self.span.start {
            self.from.position(self.span.end)
        } else {
            self.start().advance()
        }
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:", self.from.name)?;

        let (start, end) = (self.start(), self.end());
        if end == start.advance() || end.line() != start.line() {
            // Solo se señala una posición en específico
            write!(formatter, "{}", start)
        } else {
            write!(formatter, "[{}-{}]", start, end.back())
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Una posición línea-columna en un archivo.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Incrementa el número de columna.
    pub fn advance(self) -> Position {
        Position {
            line: self.line,
            column: self.column + 1,
        }
    }

    /// Decrementa el número de columna.
    pub fn back(self) -> Position {
        Position {
            line: self.line,
            column: self.column.saturating_sub(1).max(1),
        }
    }

    /// Incrementa el número de línea y retorna a la columna 1.
    pub fn newline(self) -> Position {
        Position {
            line: self.line + 1,
            column: 1,
        }
    }

    /// Ajusta la posición a la siguiente columna de tabulador.
    pub fn tab(self) -> Position {
        let column = 1 + ((self.column - 1) / TAB_STOP + 1) * TAB_STOP;
        Position {
            line: self.line,
            column,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}
