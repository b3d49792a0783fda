/*!
  The functional simulator: machine state, reset, binary loading, and the
  main loop. One iteration of the main loop is one machine cycle; the body
  is written as five ordered stages (fetch, decode, execute, memory,
  writeback, in `exec`) so that a later pipelined implementation is
  mechanical. Exception delivery happens in the fetch stage, so execute and
  memory never have to undo themselves.
*/

pub mod debug;
pub mod exec;
pub mod mmu;

use std::time::{Duration, Instant};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::isa::{NUM_REGS, SPR_MMU_CODE, SPR_MMU_DATA, SPR_SIZE};
use crate::{Word, K};

/// Physical memory size in 16-bit words. Physical addresses are 24 bits;
/// translations at or beyond this size raise ExMemory.
pub const PHYS_MEM_WORDS: usize = 1 << 22;

// Physical layout installed by the loader, in words. Each mode's region is
// up to 128 KiB of code followed by up to 64 KiB of data; the user region
// begins at physical byte 3 * 64 KiB * 2.
pub const KERN_CODE_BASE: usize = 0;
pub const KERN_DATA_BASE: usize = 64 * K;
pub const USER_CODE_BASE: usize = 96 * K;
pub const USER_DATA_BASE: usize = 160 * K;

/// The largest loadable binary: 128 KiB of code plus 64 KiB of data.
pub const MAX_BINARY_BYTES: usize = 3 * 64 * K;

pub const NUM_IO_SLOTS: usize = 64;

#[derive(TryFromPrimitive, IntoPrimitive, Clone, Copy, Eq, PartialEq, Debug)]
#[repr(u8)]
pub enum Mode {
  User = 0,
  Kern = 1,
}

/// One mode's register file: eight general registers (r0 reads as zero)
/// and sixty-four special registers including that mode's MMU entries.
#[derive(Clone, Copy)]
pub struct RegFile {
  pub gen: [Word; NUM_REGS],
  pub spr: [Word; SPR_SIZE],
}

impl RegFile {
  fn zeroed() -> RegFile {
    RegFile { gen: [0; NUM_REGS], spr: [0; SPR_SIZE] }
  }
}

/// Why the main loop stopped.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Halt {
  /// A hlt instruction retired.
  Halted,
  /// An exception was raised while a previous one was being handled.
  DoubleFault { cause: Word, pc: Word },
  /// The interactive debugger's exit command.
  DebuggerExit,
}

#[derive(Error, Debug)]
pub enum LoadError {
  #[error("file too large: {0} bytes")]
  TooLarge(usize),
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Default)]
pub struct RunOptions {
  /// Single-step with an interactive prompt from the first cycle.
  pub single_step: bool,
  /// Home the cursor before each state dump.
  pub home: bool,
  /// Suppress non-error output.
  pub quiet: bool,
}

pub struct RunOutcome {
  pub halt: Halt,
  pub cycles: u64,
  pub elapsed: Duration,
  /// True when the loop ever blocked on standard input; the throughput
  /// measurement is meaningless then and is suppressed.
  pub interactive: bool,
}

impl RunOutcome {
  pub fn mhz(&self) -> Option<f64> {
    if self.interactive || self.elapsed.is_zero() {
      return None;
    }
    Some(self.cycles as f64 / self.elapsed.as_secs_f64() / 1e6)
  }
}

pub struct Machine {
  // Memory stores and register files.
  pub(crate) mem: Vec<Word>,
  pub(crate) reg: [RegFile; 2],
  pub(crate) io: [Word; NUM_IO_SLOTS],

  // Architectural state.
  pub(crate) pc: Word,
  pub(crate) mode: Mode,
  pub(crate) en: bool,
  pub(crate) running: bool,
  pub(crate) cyc: u64,

  // Non-architectural per-cycle state, roughly the pipeline latches of a
  // hardware implementation.
  pub(crate) ir: Word,
  pub(crate) alu: Word,
  pub(crate) sd: Word,
  pub(crate) wb: Word,
  pub(crate) ex: Word,
  pub(crate) hc: Word,

  // Decode outputs.
  pub(crate) op: Word,
  pub(crate) xop: Word,
  pub(crate) yop: Word,
  pub(crate) zop: Word,
  pub(crate) vop: Word,
  pub(crate) imm: Word,
  pub(crate) ra: usize,
  pub(crate) rb: usize,
  pub(crate) rc: usize,
  pub(crate) is_x: bool,
  pub(crate) is_y: bool,
  pub(crate) is_z: bool,
  pub(crate) is_v: bool,
  pub(crate) is_base: bool,

  // A brk instruction asks the main loop for the debugger.
  pub(crate) debug_request: bool,
}

impl Machine {
  pub fn new() -> Machine {
    let mut machine = Machine {
      mem: vec![0; PHYS_MEM_WORDS],
      reg: [RegFile::zeroed(); 2],
      io: [0; NUM_IO_SLOTS],
      pc: 0,
      mode: Mode::Kern,
      en: false,
      running: true,
      cyc: 0,
      ir: 0,
      alu: 0,
      sd: 0,
      wb: 0,
      ex: 0,
      hc: 0,
      op: 0,
      xop: 0,
      yop: 0,
      zop: 0,
      vop: 0,
      imm: 0,
      ra: 0,
      rb: 0,
      rc: 0,
      is_x: false,
      is_y: false,
      is_z: false,
      is_v: false,
      is_base: false,
      debug_request: false,
    };
    machine.reset();
    machine
  }

  /// Reset the simulated hardware. The machine comes up in kernel mode
  /// with interrupts disabled; the zeroed kernel Imr means the first rti
  /// enters user mode deterministically.
  pub fn reset(&mut self) {
    self.reg = [RegFile::zeroed(); 2];
    self.pc = 0;
    self.mode = Mode::Kern;
    self.en = false;
    self.running = true;
    self.cyc = 0;
    self.ir = 0;
    self.alu = 0;
    self.sd = 0;
    self.wb = 0;
    self.ex = 0;
    self.hc = 0;
    self.debug_request = false;
  }

  // region Loading

  /// Load a binary for one mode. The file has no header: code words from
  /// offset 0 (at most 128 KiB), then data from offset 128 KiB (at most
  /// 64 KiB). Kernel binaries are mandatory, user binaries optional; this
  /// is the caller's concern.
  pub fn load(&mut self, mode: Mode, path: &str) -> Result<usize, LoadError> {
    let bytes = std::fs::read(path)?;
    self.load_bytes(mode, &bytes)
  }

  pub fn load_bytes(&mut self, mode: Mode, bytes: &[u8]) -> Result<usize, LoadError> {
    if bytes.len() > MAX_BINARY_BYTES {
      return Err(LoadError::TooLarge(bytes.len()));
    }

    let (code_base, data_base) = match mode {
      Mode::Kern => (KERN_CODE_BASE, KERN_DATA_BASE),
      Mode::User => (USER_CODE_BASE, USER_DATA_BASE),
    };

    let code = &bytes[..bytes.len().min(128 * K)];
    for (i, pair) in code.chunks(2).enumerate() {
      let lo = pair[0] as Word;
      let hi = if pair.len() > 1 { pair[1] as Word } else { 0 };
      self.mem[code_base + i] = hi << 8 | lo;
    }
    if bytes.len() > 128 * K {
      for (i, &b) in bytes[128 * K..].iter().enumerate() {
        let w = &mut self.mem[data_base + i / 2];
        if i & 1 == 0 {
          *w = (*w & 0xFF00) | b as Word;
        } else {
          *w = (*w & 0x00FF) | (b as Word) << 8;
        }
      }
    }

    self.install_page_tables(mode);
    Ok(bytes.len())
  }

  /// Install the conventional MMU layout for one mode: the region's code
  /// pages mapped in order, then its data pages. The kernel can remap its
  /// own bank later with ssp.
  fn install_page_tables(&mut self, mode: Mode) {
    let (code_upper, data_upper) = match mode {
      Mode::Kern => (0u16, (2 * KERN_DATA_BASE >> 12) as Word),
      Mode::User => ((USER_CODE_BASE >> 12) as Word, (2 * USER_DATA_BASE >> 12) as Word),
    };
    let spr = &mut self.reg[mode as usize].spr;
    for page in 0..16u16 {
      spr[(SPR_MMU_CODE + page) as usize] = code_upper + page;
      spr[(SPR_MMU_DATA + page) as usize] = data_upper + page;
    }
  }

  // endregion

  // region Main loop

  /// Run until halt. One loop iteration is one machine cycle: the five
  /// stages in order, each reading only state set by earlier stages of the
  /// same or prior cycles.
  pub fn run(&mut self, options: RunOptions) -> RunOutcome {
    let mut options = options;
    let started = Instant::now();
    let mut interactive = false;
    let mut halt = Halt::Halted;

    while self.running {
      // A pending exception with interrupts disabled means we faulted
      // while delivering a previous fault. That is fatal.
      if self.ex != 0 && !self.en {
        halt = Halt::DoubleFault { cause: self.ex, pc: self.pc };
        break;
      }

      self.fetch();
      self.decode();
      self.execute();
      self.memory();
      self.writeback();
      self.cyc += 1;

      #[cfg(feature = "trace_cycles")]
      eprintln!("{}", self);

      if options.single_step || self.debug_request || debug::sigint_taken() {
        self.debug_request = false;
        interactive = true;
        match debug::interact(self, &mut options) {
          debug::Action::Continue => {}
          debug::Action::Exit => {
            self.running = false;
            halt = Halt::DebuggerExit;
          }
        }
      }
    }

    RunOutcome { halt, cycles: self.cyc, elapsed: started.elapsed(), interactive }
  }

  // endregion

  // region Accessors, mainly for the debugger and tests

  pub fn pc(&self) -> Word {
    self.pc
  }

  pub fn mode(&self) -> Mode {
    self.mode
  }

  pub fn cycles(&self) -> u64 {
    self.cyc
  }

  pub fn pending_exception(&self) -> Word {
    self.ex
  }

  pub fn gen_reg(&self, mode: Mode, r: usize) -> Word {
    self.reg[mode as usize].gen[r]
  }

  pub fn spr(&self, mode: Mode, r: Word) -> Word {
    self.reg[mode as usize].spr[r as usize]
  }

  pub fn io_slot(&self, slot: usize) -> Word {
    self.io[slot]
  }

  // endregion
}

impl Default for Machine {
  fn default() -> Self {
    Machine::new()
  }
}
