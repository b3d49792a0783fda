/*!
  The assembler: lexer, symbol table, parser, and generator, composed
  behind a small API. Diagnostics are collected in `path, line N: message`
  form; when any are produced, no binary is written.
*/

pub mod generator;
pub mod lexer;
pub mod parser;
pub mod symbols;

use std::fmt::{Display, Formatter};

use thiserror::Error;

pub use generator::{generate, Object};
pub use parser::{parse_file, parse_text, Parse};

/// The collected source diagnostics of a failed assembly.
#[derive(Debug, Clone)]
pub struct SourceErrors {
  pub diagnostics: Vec<String>,
}

impl Display for SourceErrors {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let n = self.diagnostics.len();
    write!(f, "{} error{}", n, if n == 1 { "" } else { "s" })
  }
}

#[derive(Error, Debug)]
pub enum AsmError {
  #[error(transparent)]
  Io(#[from] std::io::Error),
  #[error("{0}")]
  Source(SourceErrors),
}

impl AsmError {
  fn from_diagnostics(diagnostics: Vec<String>) -> AsmError {
    AsmError::Source(SourceErrors { diagnostics })
  }
}

/// Assemble a source file into an object image.
pub fn assemble_file(src_path: &str) -> Result<Object, AsmError> {
  let parse = parse_file(src_path)?;
  finish(src_path, parse)
}

/// Assemble source text given directly, mainly for tests and the round
/// trip driver. `ident` stands in for the path in diagnostics.
pub fn assemble_text(ident: &str, body: &str) -> Result<Object, AsmError> {
  finish(ident, parse_text(ident, body))
}

fn finish(src_path: &str, parse: Parse) -> Result<Object, AsmError> {
  if parse.error_count != 0 {
    return Err(AsmError::from_diagnostics(parse.diagnostics));
  }
  generate(src_path, &parse).map_err(AsmError::from_diagnostics)
}
