//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI.

use anyhow::{self, bail, Context};
use clap::{crate_version, Arg, Command};
use ic10c::{source::Source, Compilation, CompileError, Diagnostics, Passes};
use tracing::Level;
use unicase::UniCase;

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    process,
    str::FromStr,
};

/// Fase cuya salida se escribe.
#[derive(Copy, Clone, Debug)]
enum Emit {
    Tokens,
    Ast,
    Ir,
    Asm,
}

const STAGES: &[(&str, Emit)] = &[
    ("tokens", Emit::Tokens),
    ("ast", Emit::Ast),
    ("ir", Emit::Ir),
    ("asm", Emit::Asm),
];

impl FromStr for Emit {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        let wanted = UniCase::new(string);
        match STAGES.iter().find(|(name, _)| UniCase::new(*name) == wanted) {
            Some(&(_, stage)) => Ok(stage),
            None => bail!("Unknown stage `{}`, expected one of: tokens, ast, ir, asm", string),
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("IC10 compiler")
        .version(crate_version!())
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .required(true)
                .help("Source file ('-' for stdin)"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .default_value("-")
                .help("Output file ('-' for stdout)"),
        )
        .arg(
            Arg::new("optimize")
                .short('O')
                .help("Enable optimization passes"),
        )
        .arg(
            Arg::new("no-fold")
                .long("no-fold")
                .help("Disable constant folding"),
        )
        .arg(
            Arg::new("no-fuse")
                .long("no-fuse")
                .help("Disable move fusion"),
        )
        .arg(
            Arg::new("emit")
                .long("emit")
                .takes_value(true)
                .value_name("STAGE")
                .default_value("asm")
                .help("Output of the given stage: tokens, ast, ir or asm"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Log compiler stages to stderr (repeat for more detail)"),
        )
        .get_matches();

    let level = match args.occurrences_of("verbose") {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    // Se extraen argumentos necesarios
    let input = args.value_of("input").unwrap_or("-");
    let output = args.value_of("output").unwrap_or("-");
    let emit: Emit = args.value_of("emit").unwrap_or("asm").parse()?;

    let mut passes = Passes::empty();
    if args.is_present("optimize") {
        passes = Passes::all();
        if args.is_present("no-fold") {
            passes.remove(Passes::CONSTANT_FOLDING);
        }

        if args.is_present("no-fuse") {
            passes.remove(Passes::MOVE_FUSION);
        }
    }

    let text = match input {
        "-" => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read from stdin")?;

            text
        }

        path => fs::read_to_string(path).with_context(|| format!("Failed to read: {}", path))?,
    };

    let name = if input == "-" { "<stdin>" } else { input };
    let compilation = Compilation::new(Source::new(name, text));

    let listing = match run(&compilation, emit, passes) {
        Ok(listing) => listing,
        Err(error) => {
            eprint!("{}", Diagnostics::from(error));
            process::exit(1);
        }
    };

    match output {
        "-" => io::stdout()
            .write_all(listing.as_bytes())
            .context("Failed to write to stdout")?,

        path => {
            let mut file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            file.write_all(listing.as_bytes())
                .with_context(|| format!("Failed to write to file: {}", path))?;
        }
    }

    Ok(())
}

fn run(compilation: &Compilation, emit: Emit, passes: Passes) -> Result<String, CompileError> {
    let listing = match emit {
        Emit::Tokens => compilation
            .tokens()?
            .iter()
            .map(|token| format!("{}\n", token))
            .collect(),

        Emit::Ast => format!("{:#?}\n", compilation.statements()?),
        Emit::Ir => compilation.optimized(passes)?.to_string(),
        Emit::Asm => compilation
            .assembly(passes)?
            .iter()
            .map(|line| format!("{}\n", line))
            .collect(),
    };

    Ok(listing)
}
