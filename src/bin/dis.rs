//! The disassembler CLI: reads an object file and writes a text listing
//! to standard output. With `-q` the index and opcode prefix columns are
//! suppressed, producing output acceptable as input to the assembler.

use clap::Parser;

use wut4::assembler::Object;
use wut4::disassembler;

#[derive(Parser, Debug)]
#[command(name = "dis", about = "WUT-4 disassembler")]
struct Args {
  /// Quiet: emit only mnemonics, reassembleable as-is
  #[arg(short = 'q')]
  quiet: bool,

  /// Object file to disassemble
  binary: String,
}

fn main() {
  let args = Args::parse();
  let bytes = match std::fs::read(&args.binary) {
    Ok(bytes) => bytes,
    Err(e) => {
      eprintln!("dis: opening \"{}\": {}", args.binary, e);
      std::process::exit(2);
    }
  };

  let object = Object::from_bytes(&bytes);
  for line in disassembler::disassemble(&object.code, args.quiet) {
    println!("{}", line);
  }
}
