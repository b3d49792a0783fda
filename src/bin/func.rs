//! The functional simulator CLI. A kernel binary is mandatory and is
//! placed at physical 0; a user binary is optional and is placed at
//! physical 3 * 64 KiB. Exit 0 on a normal halt, 2 on setup errors.
//! SIGINT drops into the interactive debugger rather than killing the
//! process.

use clap::{ArgAction, Parser};

use wut4::machine::{debug, Halt, Machine, Mode, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "func", about = "WUT-4 functional simulator", disable_help_flag = true)]
struct Args {
  /// Single-step with an interactive prompt
  #[arg(short = 'd')]
  debug: bool,

  /// Home the cursor before each state dump
  #[arg(short = 'h')]
  home: bool,

  /// Suppress non-error output
  #[arg(short = 'q')]
  quiet: bool,

  /// Also load a user-mode binary
  #[arg(short = 'u', value_name = "user-bin")]
  user: Option<String>,

  /// Kernel binary (mandatory; the machine resets into kernel mode)
  kernel: String,

  #[arg(long, action = ArgAction::Help, help = "Print help")]
  help: Option<bool>,
}

fn pr(s: &str) {
  eprintln!("func: {}", s);
}

fn main() {
  let args = Args::parse();
  let mut machine = Machine::new();

  match machine.load(Mode::Kern, &args.kernel) {
    Ok(n) => {
      if !args.quiet {
        pr(&format!("loaded {} bytes", n));
      }
    }
    Err(e) => {
      pr(&format!("loading {}: {}", args.kernel, e));
      std::process::exit(2);
    }
  }
  if let Some(user) = &args.user {
    match machine.load(Mode::User, user) {
      Ok(n) => {
        if !args.quiet {
          pr(&format!("loaded {} user bytes", n));
        }
      }
      Err(e) => {
        pr(&format!("loading {}: {}", user, e));
        std::process::exit(2);
      }
    }
  }

  debug::install_sigint_handler();

  let options = RunOptions { single_step: args.debug, home: args.home, quiet: args.quiet };
  let outcome = machine.run(options);

  match outcome.halt {
    Halt::Halted => {
      if !args.quiet {
        pr(&format!("halted at pc 0x{:04X}", machine.pc()));
      }
    }
    Halt::DoubleFault { cause, pc } => {
      pr(&format!("double fault: exception {} at pc 0x{:04X}", cause, pc));
    }
    Halt::DebuggerExit => {
      if !args.quiet {
        pr("exit");
      }
    }
  }
  if !args.quiet {
    match outcome.mhz() {
      Some(mhz) => pr(&format!(
        "{} cycles in {:.3}s ({:.2} MHz)",
        outcome.cycles,
        outcome.elapsed.as_secs_f64(),
        mhz
      )),
      None => pr(&format!("{} cycles", outcome.cycles)),
    }
  }
}
