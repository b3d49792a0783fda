/*!
  The interactive debugger and the machine-state dump. The debugger is
  entered by the `brk` instruction, by single-step mode, or by SIGINT. It
  blocks the main loop on standard input, which is why the throughput
  measurement is suppressed once it has run.
*/

use std::fmt::{Display, Formatter};
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use prettytable::{format as TableFormat, Table};

use crate::disassembler;
use crate::isa::{SPR_ICR, SPR_IMR, SPR_IRR, SPR_LINK};

use super::{Machine, Mode, RunOptions};

// region SIGINT

static SIGINT: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
  SIGINT.store(true, Ordering::SeqCst);
}

/// Arrange for ^C to drop the simulator into interactive mode instead of
/// killing the process. Called once by the CLI.
pub fn install_sigint_handler() {
  unsafe {
    libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t);
  }
}

pub(crate) fn sigint_taken() -> bool {
  SIGINT.swap(false, Ordering::SeqCst)
}

// endregion

// region Interactive prompt

pub(crate) enum Action {
  Continue,
  Exit,
}

/// Prompt for debugger commands. Returns when execution should resume (or
/// stop). `options.single_step` is updated in place by the c and s
/// commands.
pub(crate) fn interact(machine: &mut Machine, options: &mut RunOptions) -> Action {
  if options.home {
    print!("\x1b[H\x1b[2J");
  }
  if !options.quiet {
    println!("{}", machine);
  }

  let stdin = io::stdin();
  let mut line = String::new();
  loop {
    print!("func> ");
    let _ = io::stdout().flush();

    line.clear();
    match stdin.lock().read_line(&mut line) {
      Ok(0) | Err(_) => return Action::Exit, // EOF
      Ok(_) => {}
    }
    match line.trim() {
      "h" | "?" => {
        println!("  h  this help");
        println!("  c  continue");
        println!("  s  step one cycle (also just enter)");
        println!("  x  exit the simulator");
      }
      "c" => {
        options.single_step = false;
        return Action::Continue;
      }
      "s" | "" => {
        options.single_step = true;
        return Action::Continue;
      }
      "x" => return Action::Exit,
      other => println!("unknown command {:?}; h for help", other),
    }
  }
}

// endregion

// region State dump

lazy_static! {
  static ref DUMP_FORMAT: TableFormat::TableFormat = TableFormat::FormatBuilder::new()
    .column_separator('|')
    .borders(' ')
    .separator(
      TableFormat::LinePosition::Title,
      TableFormat::LineSeparator::new('-', '+', ' ', ' ')
    )
    .padding(1, 1)
    .build();
}

fn register_table(machine: &Machine) -> Table {
  let mut table = Table::new();
  table.set_format(*DUMP_FORMAT);
  table.set_titles(row![ub->"reg", ubr->"user", ubr->"kernel"]);
  for r in 0..crate::isa::NUM_REGS {
    table.add_row(row![
      format!("r{}", r),
      r->format!("0x{:04X}", machine.gen_reg(Mode::User, r)),
      r->format!("0x{:04X}", machine.gen_reg(Mode::Kern, r))
    ]);
  }
  table.add_row(row![
    "link",
    r->format!("0x{:04X}", machine.spr(Mode::User, SPR_LINK)),
    r->format!("0x{:04X}", machine.spr(Mode::Kern, SPR_LINK))
  ]);
  for (name, spr) in [("irr", SPR_IRR), ("icr", SPR_ICR), ("imr", SPR_IMR)] {
    table.add_row(row![name, r->"", r->format!("0x{:04X}", machine.spr(Mode::Kern, spr))]);
  }
  table
}

fn flags_table(machine: &Machine) -> Table {
  let mut table = Table::new();
  table.set_format(*DUMP_FORMAT);
  table.set_titles(row![ub->"flag", ubr->"value"]);
  table.add_row(row!["mode", r->format!("{:?}", machine.mode())]);
  table.add_row(row!["en", r->machine.en.to_string()]);
  table.add_row(row!["ex", r->format!("{}", machine.ex)]);
  table.add_row(row!["hc", r->format!("{}", machine.hc)]);
  table.add_row(row!["cyc", r->format!("{}", machine.cyc)]);
  table
}

impl Display for Machine {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let index = self.pc.wrapping_sub(1) as usize;
    let mut combined = table!([register_table(self), flags_table(self)]);
    combined.set_format(*DUMP_FORMAT);
    write!(
      f,
      "at 0x{:04X}: 0x{:04X}: {}\n{}",
      index,
      self.ir,
      disassembler::decode_word(index, self.ir),
      combined
    )
  }
}

// endregion

#[cfg(test)]
mod tests {
  use super::super::{Machine, Mode};
  use crate::assembler::assemble_text;

  #[test]
  fn dump_renders_without_panicking() {
    let object = assemble_text("t", "lli r1, 5\nhlt\n").unwrap();
    let mut machine = Machine::new();
    machine.load_bytes(Mode::Kern, &object.to_bytes()).unwrap();
    machine.step_cycle();
    let dump = format!("{}", machine);
    assert!(dump.contains("lli r1, 0x05"), "{}", dump);
    assert!(dump.contains("0x0005"), "{}", dump);
  }
}
