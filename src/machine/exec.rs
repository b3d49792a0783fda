/*!
  The five ordered stages of one machine cycle, and the execute dispatch.

  The opcodes spread out to the right, using more and more leading one
  bits. The bits come in groups of three, with the special case that
  1110... is jlr and 1111... requires decoding the next three (XOP) bits;
  after that 1111111... requires three more, and so on. The decoder works
  this out once per cycle and the stages switch on the classification.

  Exceptions are latched in `ex` during execute or memory and delivered at
  the next fetch, so execute and memory never have to undo themselves.
*/

use crate::isa::{SPR_CCLS, SPR_CCMS, SPR_ICR, SPR_IMR, SPR_IRR, SPR_LINK, SPR_PC};
use crate::{bits, Word, EX_ILLEGAL, EX_MACHINE, EX_MEMORY};

use super::{Machine, Mode};

impl Machine {
  /// One machine cycle: the five stages in order.
  pub fn step_cycle(&mut self) {
    self.fetch();
    self.decode();
    self.execute();
    self.memory();
    self.writeback();
    self.cyc += 1;
  }

  // region fetch

  /// Deliver any pending exception, then fetch the next instruction.
  pub(crate) fn fetch(&mut self) {
    if self.ex != 0 {
      // A double fault is handled in the main loop before it gets here.
      assert!(self.en, "double fault in fetch()");

      // An exception occurred during the previous cycle. Save the return
      // state in the kernel SPRs and redirect to the vector, which is the
      // cause code itself.
      self.reg[Mode::Kern as usize].spr[SPR_IRR as usize] = self.pc;
      self.reg[Mode::Kern as usize].spr[SPR_ICR as usize] = self.ex;
      self.reg[Mode::Kern as usize].spr[SPR_IMR as usize] = self.mode as Word;

      self.mode = Mode::Kern;
      self.pc = self.ex;
      self.en = false;
      self.ex = 0;
    }

    match self.translate_code(self.pc) {
      Ok(paddr) => self.ir = self.mem[paddr],
      Err(_) => {
        self.ir = 0;
        self.ex = EX_MEMORY;
      }
    }

    // Control flow instructions overwrite this in a later stage.
    self.pc = self.pc.wrapping_add(1);
    if self.pc == 0 {
      self.ex = EX_MACHINE; // machine check - PC wrapped
    }
  }

  // endregion

  // region decode

  /// Pull all the possible distinct fields out of the instruction. These
  /// are non-architectural per-cycle values, mostly multiplexer outputs in
  /// the eventual hardware. Further decoding (which instructions have
  /// targets, which touch special registers) is left to the later stages.
  pub(crate) fn decode(&mut self) {
    let ir = self.ir;
    self.op = bits(ir, 15, 13);
    self.imm = self.sxt_imm();

    self.xop = bits(ir, 11, 9);
    self.yop = bits(ir, 8, 6);
    self.zop = bits(ir, 5, 3);
    self.vop = bits(ir, 2, 0);

    self.is_v = bits(ir, 15, 3) == 0x1FFF;
    self.is_z = !self.is_v && bits(ir, 15, 6) == 0x03FF;
    self.is_y = !self.is_v && !self.is_z && bits(ir, 15, 9) == 0x007F;
    self.is_x = !self.is_v && !self.is_z && !self.is_y && bits(ir, 15, 12) == 0x000F;
    self.is_base = !self.is_v && !self.is_z && !self.is_y && !self.is_x;

    self.ra = self.vop as usize;
    self.rb = self.zop as usize;
    self.rc = self.yop as usize;
  }

  /// The sign-extended immediate for the current instruction: a 7-bit
  /// signed value for the base operations, the 10-bit upper immediate for
  /// lui, and a 6-bit value for jlr. Instructions without an immediate get
  /// the most harmless value, zero.
  fn sxt_imm(&self) -> Word {
    let ir = self.ir;
    let op = bits(ir, 15, 13);
    let neg = bits(ir, 12, 12) != 0;
    if op < 6 {
      let mut imm = bits(ir, 12, 6);
      if neg {
        imm |= 0xFF80;
      }
      imm
    } else if op == 6 {
      bits(ir, 12, 3) << 6
    } else if !neg {
      // jlr: 6-bit immediate when bit 12 is clear; 1111... has none.
      bits(ir, 12, 6)
    } else {
      0
    }
  }

  // endregion

  // region execute

  pub(crate) fn execute(&mut self) {
    if self.ex != 0 {
      // The fetch or decode activity raised an exception; the program
      // counter must not be modified further this cycle.
      return;
    }
    if self.is_base {
      match self.op {
        0 => self.ldw(),
        1 => self.ldb(),
        2 => self.stw(),
        3 => self.stb(),
        4 => self.beq(),
        5 => self.adi(),
        6 => self.lui(),
        7 => self.jlr(),
        _ => unreachable!(),
      }
    } else if self.is_x {
      self.alu3();
    } else if self.is_y {
      self.yop();
    } else if self.is_z {
      self.alu1();
    } else {
      assert!(self.is_v, "decode failure: no instruction class");
      self.vop();
    }
  }

  fn gen(&self, r: usize) -> Word {
    self.reg[self.mode as usize].gen[r]
  }

  // Base operations.

  fn ldw(&mut self) {
    // We end up here for all-zero opcodes, which would load the black
    // hole register r0. Instead of a noop they are an illegal
    // instruction, which keeps uninitialized memory from running.
    if self.ir == 0 {
      self.ex = EX_ILLEGAL;
      return;
    }
    self.alu = self.gen(self.rb).wrapping_add(self.imm);
  }

  fn ldb(&mut self) {
    self.alu = self.gen(self.rb).wrapping_add(self.imm);
  }

  fn stw(&mut self) {
    self.alu = self.gen(self.rb).wrapping_add(self.imm);
    self.sd = self.gen(self.ra);
    // The memory operation happens in the memory stage.
  }

  fn stb(&mut self) {
    self.alu = self.gen(self.rb).wrapping_add(self.imm);
    self.sd = self.gen(self.ra);
  }

  fn beq(&mut self) {
    if self.gen(self.rb) == self.gen(self.ra) {
      self.pc = self.pc.wrapping_add(self.imm);
    }
  }

  fn adi(&mut self) {
    self.alu = self.gen(self.rb).wrapping_add(self.imm);
  }

  fn lui(&mut self) {
    self.alu = self.imm;
  }

  fn jlr(&mut self) {
    // jlr has bits 15:13 == 0b111 just like the XOPs; it is a jlr rather
    // than an XOP because bit 12 must be 0. The decoder took care of
    // this, but check for sanity.
    assert!(bits(self.ir, 15, 12) == 0xE, "decode failure: jlr");

    // Three flavors, selected by the rA field, which is overloaded as
    // additional opcode bits here.
    match self.ra {
      0 => {
        // sys trap. 15 of the first 16 traps, values 2..30, are legal;
        // 32..62 are reserved for hardware. Trap 0 is not legal because
        // it would reset the machine; the kernel can do that with jmp 0.
        if self.rb != 0 || self.imm & 1 == 1 || self.imm == 0 || self.imm > 30 {
          self.ex = EX_ILLEGAL;
          return;
        }
        self.ex = self.imm;
      }
      1 => {
        // jump and link
        self.reg[self.mode as usize].spr[SPR_LINK as usize] = self.pc;
        self.pc = self.gen(self.rb).wrapping_add(self.imm);
      }
      2 => {
        // jump
        self.pc = self.gen(self.rb).wrapping_add(self.imm);
      }
      _ => self.ex = EX_ILLEGAL,
    }
  }

  // XOPs: the 3-operand ALU operations.

  fn alu3(&mut self) {
    let rs2 = self.gen(self.rc) as u32;
    let rs1 = self.gen(self.rb) as u32;

    let full: u32 = match self.xop {
      0 => rs2 + rs1,                                   // add
      1 => rs2 + rs1 + self.hc as u32,                  // adc
      2 => rs2.wrapping_sub(rs1),                       // sub
      3 => rs2.wrapping_sub(rs1 + self.hc as u32),      // sbb
      4 => rs2 & !rs1,                                  // bic
      5 => rs2 | rs1,                                   // bis
      6 => rs2 ^ rs1,                                   // xor
      _ => self.decode_failure("alu3 op == 7"),
    };
    self.alu = full as Word;
    self.hc = match self.xop {
      0..=3 => ((full >> 16) & 1) as Word,
      _ => 0,
    };
  }

  // YOPs: the operand address computes in execute; the special register
  // or I/O access happens in the memory stage.

  fn yop(&mut self) {
    match self.yop {
      0 | 1 => {
        // lsp, lio
        self.alu = self.gen(self.rb).wrapping_add(self.imm);
      }
      2 | 3 => {
        // ssp, sio
        self.alu = self.gen(self.rb).wrapping_add(self.imm);
        self.sd = self.gen(self.ra);
      }
      4..=6 => self.ex = EX_ILLEGAL, // reserved y04..y06
      _ => self.decode_failure("yop"),
    }
  }

  // ZOPs: the 1-operand ALU operations.

  fn alu1(&mut self) {
    let rs1 = self.gen(self.ra);

    match self.zop {
      0 => {
        // not
        self.alu = !rs1;
        self.hc = 0;
      }
      1 => {
        // neg
        self.alu = (!rs1).wrapping_add(1);
        self.hc = 0;
      }
      2 => {
        // swb
        self.alu = rs1 >> 8 | rs1 << 8;
        self.hc = 0;
      }
      3 => {
        // sxt
        self.alu = if rs1 & 0x80 != 0 { rs1 | 0xFF00 } else { rs1 & !0xFF00 };
        self.hc = 0;
      }
      4 => {
        // lsr
        self.hc = rs1 & 1;
        self.alu = rs1 >> 1;
      }
      5 => {
        // lsl
        self.hc = (rs1 >> 15) & 1;
        self.alu = rs1 << 1;
      }
      6 => {
        // asr
        let sign = rs1 & 0x8000;
        self.hc = rs1 & 1;
        self.alu = rs1 >> 1 | sign;
      }
      _ => self.decode_failure("zop"),
    }
  }

  // VOPs: privileged except rtl.

  fn vop(&mut self) {
    match self.vop {
      0 => self.rti(),
      1 => self.rtl(),
      2 => self.di(),
      3 => self.ei(),
      4 => self.hlt(),
      5 => self.brk(),
      6 => self.ex = EX_ILLEGAL, // reserved v06
      7 => self.die(),
      _ => unreachable!(),
    }
  }

  fn user_illegal(&mut self) -> bool {
    if self.mode == Mode::User {
      self.ex = EX_ILLEGAL;
      return true;
    }
    false
  }

  fn rti(&mut self) {
    if self.user_illegal() {
      return;
    }
    // Interrupts can be re-enabled on any return from interrupt or fault,
    // because they must have been enabled for it to have been taken. The
    // carry bit is left alone.
    self.ex = 0;
    self.en = true;
    self.pc = self.reg[Mode::Kern as usize].spr[SPR_IRR as usize];
    self.reg[Mode::Kern as usize].spr[SPR_IRR as usize] = 0;
    let imr = self.reg[Mode::Kern as usize].spr[SPR_IMR as usize];
    self.mode = Mode::try_from((imr & 1) as u8).unwrap();
  }

  fn rtl(&mut self) {
    self.pc = self.reg[self.mode as usize].spr[SPR_LINK as usize];
  }

  fn di(&mut self) {
    if self.user_illegal() {
      return;
    }
    self.en = false;
  }

  fn ei(&mut self) {
    if self.user_illegal() {
      return;
    }
    self.en = true;
  }

  fn hlt(&mut self) {
    if self.user_illegal() {
      return;
    }
    self.running = false;
  }

  fn brk(&mut self) {
    if self.user_illegal() {
      return;
    }
    self.debug_request = true;
  }

  fn die(&mut self) {
    self.ex = EX_ILLEGAL;
  }

  fn decode_failure(&self, msg: &str) -> ! {
    panic!("execute(): decode failure: {}", msg);
  }

  // endregion

  // region memory

  /// For instructions that reference memory, special register space, or
  /// I/O space, do the access. The computed address is in `alu` and the
  /// execute stage loaded the store data latch for stores.
  pub(crate) fn memory(&mut self) {
    if self.ex != 0 {
      // exception pending - don't modify memory
      return;
    }

    // The writeback register always starts as the alu output and is
    // overwritten by a memory, io, or spr read if any. The writeback
    // stage uses it, or just doesn't, depending on the instruction.
    self.wb = self.alu;

    if self.is_base && self.op < 4 {
      match self.op {
        0 => {
          // ldw
          let lo = self.data_read_byte(self.alu);
          let hi = self.data_read_byte(self.alu.wrapping_add(1));
          match (lo, hi) {
            (Ok(lo), Ok(hi)) => self.wb = lo as Word | (hi as Word) << 8,
            _ => self.ex = EX_MEMORY,
          }
        }
        1 => {
          // ldb
          match self.data_read_byte(self.alu) {
            Ok(b) => self.wb = b as Word,
            Err(_) => self.ex = EX_MEMORY,
          }
        }
        2 => {
          // stw: translate both byte addresses before touching either, so
          // a fault leaves physical memory unmodified.
          let lo = self.translate_data(self.alu);
          let hi = self.translate_data(self.alu.wrapping_add(1));
          match (lo, hi) {
            (Ok(_), Ok(_)) => {
              let sd = self.sd;
              self.data_write_byte(self.alu, sd as u8).unwrap();
              self.data_write_byte(self.alu.wrapping_add(1), (sd >> 8) as u8).unwrap();
            }
            _ => self.ex = EX_MEMORY,
          }
        }
        3 => {
          // stb
          let sd = self.sd;
          if self.data_write_byte(self.alu, sd as u8).is_err() {
            self.ex = EX_MEMORY;
          }
        }
        _ => unreachable!(),
      }
    } else if self.is_y {
      match self.yop {
        0 => self.wb = self.load_special(),
        1 => self.wb = self.load_io(),
        2 => {
          let sd = self.sd;
          self.store_special(sd);
        }
        3 => {
          let sd = self.sd;
          self.store_io(sd);
        }
        _ => {} // reserved yops raised ExIllegal in execute
      }
    }
  }

  /// The value of the special register addressed by the low bits of the
  /// alu result. May set an exception, in which case the value does not
  /// matter because it will not be written back.
  fn load_special(&mut self) -> Word {
    let r = self.alu & (crate::isa::SPR_SIZE as Word - 1); // 0..63
    match r {
      SPR_PC => return self.pc,
      SPR_LINK => return self.reg[self.mode as usize].spr[SPR_LINK as usize],
      SPR_IRR | SPR_ICR | SPR_IMR | 5 => {
        if self.mode == Mode::Kern {
          return self.reg[Mode::Kern as usize].spr[r as usize];
        }
        self.ex = EX_ILLEGAL;
        return 0;
      }
      SPR_CCLS => return (self.cyc & 0xFFFF) as Word,
      SPR_CCMS => return ((self.cyc >> 16) & 0xFFFF) as Word,
      _ => {}
    }
    if self.mode == Mode::User {
      self.ex = EX_ILLEGAL;
      return 0;
    }
    match r {
      8..=15 => 0, // unused SPRs
      16..=23 => self.reg[Mode::User as usize].gen[(r - 16) as usize],
      24..=31 => {
        if r == crate::isa::SPR_USER_LINK {
          self.reg[Mode::User as usize].spr[SPR_LINK as usize]
        } else {
          0
        }
      }
      32..=63 => self.reg[self.mode as usize].spr[r as usize], // MMU entries
      _ => unreachable!("missing case in load_special()"),
    }
  }

  fn store_special(&mut self, val: Word) {
    let r = self.alu & (crate::isa::SPR_SIZE as Word - 1); // 0..63
    if self.mode == Mode::User {
      if r == SPR_LINK {
        // usermode can write its own link register
        self.reg[Mode::User as usize].spr[SPR_LINK as usize] = val;
      } else {
        self.ex = EX_ILLEGAL;
      }
      return;
    }
    match r {
      SPR_LINK => self.reg[Mode::Kern as usize].spr[SPR_LINK as usize] = val,
      SPR_IRR | SPR_ICR | SPR_IMR | 5 => self.reg[Mode::Kern as usize].spr[r as usize] = val,
      16..=23 => {
        // set a user general register; user r0 stays a black hole
        if r != 16 {
          self.reg[Mode::User as usize].gen[(r - 16) as usize] = val;
        }
      }
      25 => self.reg[Mode::User as usize].spr[SPR_LINK as usize] = val,
      32..=63 => self.reg[self.mode as usize].spr[r as usize] = val, // MMU entries
      _ => self.ex = EX_ILLEGAL, // read-only or unassigned; likely double fault
    }
  }

  fn load_io(&mut self) -> Word {
    let slot = (self.alu as usize) & (super::NUM_IO_SLOTS - 1);
    self.io[slot]
  }

  fn store_io(&mut self, val: Word) {
    let slot = (self.alu as usize) & (super::NUM_IO_SLOTS - 1);
    self.io[slot] = val;
  }

  // endregion

  // region writeback

  /// Write the result, including a possible memory result, to a general
  /// register. Stores and io writes happened at memory time; control flow
  /// updated the PC in execute.
  pub(crate) fn writeback(&mut self) {
    if self.ex != 0 {
      // exception pending - don't update registers
      return;
    }

    let writes = self.op == 0          // ldw
      || self.op == 1                  // ldb
      || self.op == 5                  // adi
      || self.op == 6                  // lui
      || self.is_x                     // 3-operand alu
      || (self.is_y && self.yop < 2)   // lsp or lio
      || self.is_z;                    // single-operand alu

    if writes && self.ra != 0 {
      self.reg[self.mode as usize].gen[self.ra] = self.wb;
    }
  }

  // endregion
}

#[cfg(test)]
mod tests {
  use super::super::{Halt, Machine, Mode, RunOptions};
  use crate::assembler::assemble_text;
  use crate::isa::{SPR_ICR, SPR_IMR, SPR_IRR, SPR_LINK};

  fn boot(kernel: &str) -> Machine {
    let object = assemble_text("kernel", kernel).expect("kernel assembles");
    let mut machine = Machine::new();
    machine.load_bytes(Mode::Kern, &object.to_bytes()).unwrap();
    machine
  }

  fn boot_with_user(kernel: &str, user: &str) -> Machine {
    let mut machine = boot(kernel);
    let object = assemble_text("user", user).expect("user assembles");
    machine.load_bytes(Mode::User, &object.to_bytes()).unwrap();
    machine
  }

  fn run(machine: &mut Machine) -> Halt {
    machine.run(RunOptions::default()).halt
  }

  /// Kernel prologue that enables interrupts and drops into user mode,
  /// with exception handlers that simply halt. The handler for any vector
  /// ends up at hlt because everything from word 2 on is hlt.
  fn trap_kernel() -> String {
    let mut src = String::from("ei\nrti\n");
    for _ in 2..=62 {
      src.push_str("hlt\n");
    }
    src
  }

  #[test]
  fn arithmetic_and_writeback() {
    let mut machine = boot("lli r1, 5\nlli r2, 7\nadd r3, r1, r2\nhlt\n");
    assert_eq!(run(&mut machine), Halt::Halted);
    assert_eq!(machine.gen_reg(Mode::Kern, 3), 12);
  }

  #[test]
  fn r0_writes_are_discarded() {
    let mut machine = boot("lli r0, 5\nadd r0, r0, r0\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 0), 0);
  }

  #[test]
  fn beq_taken_and_not_taken() {
    let mut machine = boot(
      "lli r1, 1\nbeq r1, r0, bad\nbeq r1, r1, good\nbad: lli r2, 1\ngood: hlt\n",
    );
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 2), 0);
  }

  #[test]
  fn beq_wraps_around_the_corner_case() {
    // A taken branch at 0x10 with displacement -1 lands back on itself:
    // next PC = 0x10 + 1 + sxt(0x7F) = 0x10.
    let mut source = String::new();
    for _ in 0..0x10 {
      source.push_str("nop\n");
    }
    source.push_str("l: beq r0, r0, l\n");
    let mut machine = boot(&source);
    for _ in 0..0x11 {
      machine.step_cycle();
    }
    // The branch has executed once; pc points at it again.
    assert_eq!(machine.pc(), 0x10);
    machine.step_cycle();
    assert_eq!(machine.pc(), 0x10);
  }

  #[test]
  fn shifts_update_the_carry() {
    let mut machine = boot("lli r1, 1\nlsr r1\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 1), 0);
    assert_eq!(machine.hc, 1);

    let mut machine = boot("ldi r1, 0x8001\nasr r1\nhlt\n");
    run(&mut machine);
    // asr preserves the sign bit and shifts bit 0 into the carry.
    assert_eq!(machine.gen_reg(Mode::Kern, 1), 0xC000);
    assert_eq!(machine.hc, 1);

    let mut machine = boot("ldi r1, 0x8000\nlsl r1\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 1), 0);
    assert_eq!(machine.hc, 1);
  }

  #[test]
  fn add_then_adc_propagates_carry() {
    let mut machine = boot(
      "ldi r1, 0xFFFF\nlli r2, 1\nadd r3, r1, r2\nadc r4, r0, r0\nhlt\n",
    );
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 3), 0);
    assert_eq!(machine.gen_reg(Mode::Kern, 4), 1);
    assert_eq!(machine.hc, 0);
  }

  #[test]
  fn bic_clears_bits() {
    // bic computes rc AND NOT rb.
    let mut machine = boot("lli r1, 0xF\nlli r2, 5\nbic r3, r2, r1\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 3), 0xF & !5);
  }

  #[test]
  fn unary_ops() {
    let mut machine = boot("lli r1, 1\nnot r1\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 1), 0xFFFE);

    let mut machine = boot("lli r1, 1\nneg r1\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 1), 0xFFFF);

    let mut machine = boot("ldi r1, 0x1284\nswb r1\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 1), 0x8412);

    let mut machine = boot("ldi r1, 0x0080\nsxt r1\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 1), 0xFF80);
  }

  #[test]
  fn data_memory_round_trip() {
    let mut machine = boot(
      "lli r1, 0x2A\nstw r1, r0, 0x10\nldw r2, r0, 0x10\nldb r3, r0, 0x10\nldb r4, r0, 0x11\nhlt\n",
    );
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::Kern, 2), 0x2A);
    assert_eq!(machine.gen_reg(Mode::Kern, 3), 0x2A);
    assert_eq!(machine.gen_reg(Mode::Kern, 4), 0);
  }

  #[test]
  fn io_slots_hold_values() {
    let mut machine = boot("lli r1, 0x21\nlli r2, 7\nsio r1, r2\nlio r3, r2\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.io_slot(7), 0x21);
    assert_eq!(machine.gen_reg(Mode::Kern, 3), 0x21);
  }

  #[test]
  fn cycle_counter_is_readable() {
    let mut machine = boot("lli r2, 6\nlsp r1, r2\nhlt\n");
    run(&mut machine);
    // The lsp reads the counter during its own (second) cycle.
    assert_eq!(machine.gen_reg(Mode::Kern, 1), 1);
  }

  #[test]
  fn kernel_reaches_user_registers_through_aliases() {
    let mut machine = boot("lli r1, 42\nlli r2, 19\nssp r1, r2\nlli r3, 19\nlsp r4, r3\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.gen_reg(Mode::User, 3), 42);
    assert_eq!(machine.gen_reg(Mode::Kern, 4), 42);
  }

  #[test]
  fn jsr_links_and_rtl_returns() {
    let mut machine = boot("jsr r1, sub\nhlt\nsub: rtl\n");
    assert_eq!(run(&mut machine), Halt::Halted);
    assert_eq!(machine.spr(Mode::Kern, SPR_LINK), 2);
  }

  #[test]
  fn sys_in_kernel_delivers_to_vector() {
    // ei, sys 8, then a handler at word 8 that halts.
    let mut src = String::from("ei\nsys 8\nnop\nnop\nnop\nnop\nnop\nnop\nhlt\n");
    src.push('\n');
    let mut machine = boot(&src);
    assert_eq!(run(&mut machine), Halt::Halted);
    assert_eq!(machine.spr(Mode::Kern, SPR_ICR), 8);
    assert_eq!(machine.spr(Mode::Kern, SPR_IRR), 2); // word after the sys
    assert_eq!(machine.spr(Mode::Kern, SPR_IMR), 1); // was in kernel mode
    assert!(!machine.en);
  }

  #[test]
  fn sys_from_user_mode() {
    let mut machine = boot_with_user(&trap_kernel(), "sys 8\n");
    assert_eq!(run(&mut machine), Halt::Halted);
    assert_eq!(machine.mode(), Mode::Kern);
    assert_eq!(machine.spr(Mode::Kern, SPR_ICR), 8);
    assert_eq!(machine.spr(Mode::Kern, SPR_IRR), 1);
    assert_eq!(machine.spr(Mode::Kern, SPR_IMR), 0); // came from user mode
  }

  #[test]
  fn privileged_ops_fault_in_user_mode() {
    for insn in ["di\n", "ei\n", "hlt\n", "brk\n", "rti\n", "die\n"] {
      let mut machine = boot_with_user(&trap_kernel(), insn);
      assert_eq!(run(&mut machine), Halt::Halted, "{}", insn);
      assert_eq!(machine.spr(Mode::Kern, SPR_ICR), crate::EX_ILLEGAL, "{}", insn);
    }
  }

  #[test]
  fn user_spr_access_is_fenced() {
    // lsp of Irr (SPR 2) from user mode raises ExIllegal; the target
    // register is not written.
    let mut machine = boot_with_user(&trap_kernel(), "lli r2, 2\nlsp r3, r2\nhlt\n");
    run(&mut machine);
    assert_eq!(machine.spr(Mode::Kern, SPR_ICR), crate::EX_ILLEGAL);
    assert_eq!(machine.gen_reg(Mode::User, 3), 0);
  }

  #[test]
  fn sys_with_interrupts_disabled_is_a_double_fault() {
    let mut machine = boot("sys 2\nhlt\n");
    match run(&mut machine) {
      Halt::DoubleFault { cause, .. } => assert_eq!(cause, 2),
      h => panic!("expected a double fault, got {:?}", h),
    }
  }

  #[test]
  fn pc_wrap_is_a_machine_check() {
    let mut machine = boot("jmp r1, 0xFFFF\n");
    match run(&mut machine) {
      Halt::DoubleFault { cause, .. } => assert_eq!(cause, crate::EX_MACHINE),
      h => panic!("expected a machine check, got {:?}", h),
    }
  }

  #[test]
  fn bad_translation_raises_ex_memory() {
    // Point data page 0 at the far end of physical memory, then store.
    let mut machine = boot(
      "ldi r1, 0xFFF\nlli r2, 48\nssp r1, r2\nlli r3, 1\nstb r3, r0, 0\nhlt\n",
    );
    match run(&mut machine) {
      Halt::DoubleFault { cause, .. } => assert_eq!(cause, crate::EX_MEMORY),
      h => panic!("expected ExMemory, got {:?}", h),
    }
  }

  #[test]
  fn zero_word_is_illegal() {
    let mut machine = boot(".word 0\nhlt\n");
    match run(&mut machine) {
      Halt::DoubleFault { cause, .. } => assert_eq!(cause, crate::EX_ILLEGAL),
      h => panic!("expected ExIllegal, got {:?}", h),
    }
  }

  #[test]
  fn rti_returns_to_the_interrupted_instruction_stream() {
    // Kernel: enable interrupts, fall into user mode. The sys handler at
    // word 8 bumps a user register through its alias and returns.
    let mut kernel = String::from("ei\nrti\n");
    for _ in 2..8 {
      kernel.push_str("nop\n");
    }
    // Handler: r7 (user alias 23) = 9, then rti back to user.
    kernel.push_str("lli r1, 9\nlli r2, 23\nssp r1, r2\nrti\n");
    let user = "sys 8\nlli r3, 5\ndi\n"; // di faults; its handler is the same one
    let mut machine = boot_with_user(&kernel, user);
    // The final di raises ExIllegal (32); there is no handler word at 32,
    // so fetch reads a zero word and the machine dies on a double fault
    // eventually. Step a bounded number of cycles instead.
    for _ in 0..12 {
      machine.step_cycle();
      if machine.pending_exception() == crate::EX_ILLEGAL {
        break;
      }
    }
    assert_eq!(machine.gen_reg(Mode::User, 7), 9);
    assert_eq!(machine.gen_reg(Mode::User, 3), 5);
  }
}
