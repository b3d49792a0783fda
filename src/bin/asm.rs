//! The assembler CLI: reads one source file (one compilation unit; there
//! is no linker) and writes the binary image to `y4.out` in the working
//! directory. Diagnostics go to standard error in `path, line N: message`
//! form; when any are produced no binary is written.

use anyhow::{bail, Context, Result};
use clap::Parser;

use wut4::assembler;

const OUTPUT_PATH: &str = "y4.out";

#[derive(Parser, Debug)]
#[command(name = "asm", about = "WUT-4 assembler")]
struct Args {
  /// Enable debug output (dumps the symbol table)
  #[arg(short = 'd')]
  debug: bool,

  /// Assembler source file (.y4a by convention)
  source: String,
}

fn main() {
  let args = Args::parse();
  if let Err(e) = run(&args) {
    eprintln!("asm: {}: {}", args.source, e);
    std::process::exit(1);
  }
}

fn run(args: &Args) -> Result<()> {
  let parse = assembler::parse_file(&args.source)
    .with_context(|| format!("open source file {}", args.source))?;

  if args.debug {
    parse.symbols.dump();
  }
  for diagnostic in &parse.diagnostics {
    eprintln!("{}", diagnostic);
  }
  if parse.error_count != 0 {
    bail!("{} error{}", parse.error_count, plural(parse.error_count));
  }

  match assembler::generate(&args.source, &parse) {
    Ok(object) => {
      object
        .write_file(OUTPUT_PATH)
        .with_context(|| format!("write {}", OUTPUT_PATH))?;
      Ok(())
    }
    Err(diagnostics) => {
      for diagnostic in &diagnostics {
        eprintln!("{}", diagnostic);
      }
      bail!("{} error{}", diagnostics.len(), plural(diagnostics.len()));
    }
  }
}

fn plural(n: usize) -> &'static str {
  if n == 1 { "" } else { "s" }
}
