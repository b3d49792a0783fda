/*!
  The instruction set tables: the single source of truth consumed by the
  assembler, the disassembler, and the simulator.

  The ISA is organized so opcodes "spread right": groups of three high-order
  bits progressively specialize. Base operations use the top 3 bits, `jlr`
  the top 4, XOPs the top 7, YOPs the top 10, ZOPs the top 13, and VOPs all
  16. Recognition of a word finds the first table entry whose top `nbits` of
  `opcode` equal the top `nbits` of the word; the wider masks are listed
  last, so the first match is correct.
*/

use std::str::FromStr;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum_macros::{Display as StrumDisplay, EnumString, IntoStaticStr};

use crate::Word;

/// The canonical set of 37 mnemonics used by both the codec and the
/// simulator. The discriminant is the key table index.
#[derive(
  StrumDisplay, IntoStaticStr, EnumString, TryFromPrimitive, IntoPrimitive,
  Clone,        Copy,          Eq,         PartialEq,        Debug, Hash,
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum Mnemonic {
  // Base operations: two registers and a 7-bit immediate, except lui.
  Ldw, Ldb, Stw, Stb, Beq, Adi, Lui, Jlr,
  // 3-operand XOPs.
  Add, Adc, Sub, Sbb, Bic, Bis, Xor,
  // 2-operand YOPs. y04..y06 are reserved and raise ExIllegal.
  Lsp, Lio, Ssp, Sio, Y04, Y05, Y06,
  // 1-operand ZOPs.
  Not, Neg, Swb, Sxt, Lsr, Lsl, Asr,
  // 0-operand VOPs. v06 is reserved; die is a deliberate illegal.
  Rti, Rtl, Di, Ei, Hlt, Brk, V06, Die,
}

/// Mnemonics the assembler accepts and the disassembler reconstructs but
/// which are not machine instructions of their own: the two-word fusion
/// patterns and the short synonyms they collapse to.
#[derive(StrumDisplay, IntoStaticStr, EnumString, Clone, Copy, Eq, PartialEq, Debug)]
#[strum(serialize_all = "lowercase")]
pub enum Alias {
  Ldi, // lui ; adi      (16-bit load immediate)
  Jmp, // lui ; jlr 2    (long jump)
  Jsr, // lui ; jlr 1    (long call)
  Lli, // adi rT, r0, n  (low 6-bit load immediate)
  Sys, // jlr r0, r0, n  (system call trap)
  Nop, // neg r0
}

/// Assembler pseudo-operations. They emit zero or more words (or data
/// bytes) and never appear in the key table.
#[derive(StrumDisplay, IntoStaticStr, EnumString, Clone, Copy, Eq, PartialEq, Debug)]
pub enum Pseudo {
  #[strum(serialize = ".set")]    Set,
  #[strum(serialize = ".space")]  Space,
  #[strum(serialize = ".fill")]   Fill,
  #[strum(serialize = ".word")]   DataWord,
  #[strum(serialize = ".byte")]   DataByte,
  #[strum(serialize = ".string")] DataString,
}

/// Everything that may stand in the key position of a source line.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Key {
  Op(Mnemonic),
  Alias(Alias),
  Pseudo(Pseudo),
}

impl Key {
  /// Key symbols are resolved by name; mnemonics take precedence, though
  /// the three namespaces are in fact disjoint.
  pub fn from_name(name: &str) -> Option<Key> {
    if let Ok(op) = Mnemonic::from_str(name) {
      return Some(Key::Op(op));
    }
    if let Ok(alias) = Alias::from_str(name) {
      return Some(Key::Alias(alias));
    }
    if let Ok(pseudo) = Pseudo::from_str(name) {
      return Some(Key::Pseudo(pseudo));
    }
    None
  }

  pub fn signature(&self) -> Signature {
    match self {
      Key::Op(op)         => KEY_TABLE[u8::from(*op) as usize].signature,
      Key::Alias(alias)   => alias.signature(),
      Key::Pseudo(pseudo) => pseudo.signature(),
    }
  }
}

impl Alias {
  pub fn signature(&self) -> Signature {
    match self {
      Alias::Ldi => sig_for(Element::Reg, Element::Val16, Element::None),
      Alias::Jmp => sig_for(Element::Reg, Element::Val16, Element::None),
      Alias::Jsr => sig_for(Element::Reg, Element::Val16, Element::None),
      Alias::Lli => sig_for(Element::Reg, Element::Imm6, Element::None),
      Alias::Sys => sig_for(Element::Imm6, Element::None, Element::None),
      Alias::Nop => sig_for(Element::None, Element::None, Element::None),
    }
  }
}

impl Pseudo {
  pub fn signature(&self) -> Signature {
    match self {
      Pseudo::Set        => sig_for(Element::Sym, Element::Val16, Element::None),
      Pseudo::Space      => sig_for(Element::Val16, Element::None, Element::None),
      Pseudo::Fill       => sig_for(Element::Val16, Element::None, Element::None),
      Pseudo::DataWord   => sig_for(Element::Val16, Element::None, Element::None),
      Pseudo::DataByte   => sig_for(Element::Val16, Element::None, Element::None),
      Pseudo::DataString => sig_for(Element::Str, Element::None, Element::None),
    }
  }
}

// region Signatures

/// Operations can have up to three operands. The operand types are
/// represented as signature elements packed into a `Signature`: the ra
/// element in bits 7:4, rb in 11:8, and rc in 15:12. Bits 3:0 are always 0.
pub type Signature = u16;

#[derive(TryFromPrimitive, IntoPrimitive, Clone, Copy, Eq, PartialEq, Debug)]
#[repr(u16)]
pub enum Element {
  None  = 0,
  Reg   = 1, // field is a register r0..r7
  Imm6  = 2, // field is a 6-bit unsigned immediate
  Imm7  = 3, // field is a 7-bit signed immediate
  Imm10 = 4, // field is a 10-bit unsigned immediate
  Val16 = 5, // field is a full 16-bit value
  Sym   = 6, // field is a new symbol
  Str   = 7, // field is a quoted string
}

/// Make a `Signature` from up to three elements.
pub const fn sig_for(ra: Element, rb: Element, rc: Element) -> Signature {
  (ra as u16) << 4 | (rb as u16) << 8 | (rc as u16) << 12
}

/// Extract the operand element for part `n` (0 = ra, 1 = rb, 2 = rc).
pub fn element(signature: Signature, n: usize) -> Element {
  Element::try_from((signature >> (4 * (n + 1))) & 0xF).unwrap_or(Element::None)
}

/// The number of operands represented by a signature.
pub fn num_operands(signature: Signature) -> usize {
  if signature == 0 {
    0
  } else if signature < 0x100 {
    1
  } else if signature < 0x1000 {
    2
  } else {
    3
  }
}

// endregion

// region Key table

/// One key table row: the fixed opcode bits of a mnemonic, the number of
/// high bits required to recognize it, and its operand signature.
#[derive(Clone, Copy, Debug)]
pub struct KeyEntry {
  pub mnemonic: Mnemonic,
  pub nbits: u16,
  pub opcode: Word,
  pub signature: Signature,
}

impl KeyEntry {
  /// The recognition mask: `nbits` high-order one bits.
  pub fn mask(&self) -> Word {
    let ones = ((1u32 << self.nbits) - 1) as Word;
    ones << (16 - self.nbits)
  }

  pub fn matches(&self, w: Word) -> bool {
    w & self.mask() == self.opcode & self.mask()
  }
}

const fn entry(mnemonic: Mnemonic, nbits: u16, opcode: Word, signature: Signature) -> KeyEntry {
  KeyEntry { mnemonic, nbits, opcode, signature }
}

use Element as E;
use Mnemonic::*;

/// The allowed mnemonics, their opcodes, and their signatures. Indexed by
/// the `Mnemonic` discriminant; recognition scans in order, so the wider
/// masks must stay last.
pub static KEY_TABLE: [KeyEntry; 37] = [
  // Operations with two registers and a 7-bit immediate.
  entry(Ldw, 3, 0x0000, sig_for(E::Reg, E::Reg, E::Imm7)),
  entry(Ldb, 3, 0x2000, sig_for(E::Reg, E::Reg, E::Imm7)),
  entry(Stw, 3, 0x4000, sig_for(E::Reg, E::Reg, E::Imm7)),
  entry(Stb, 3, 0x6000, sig_for(E::Reg, E::Reg, E::Imm7)),
  entry(Beq, 3, 0x8000, sig_for(E::Reg, E::Reg, E::Imm7)),
  entry(Adi, 3, 0xA000, sig_for(E::Reg, E::Reg, E::Imm7)),
  entry(Lui, 3, 0xC000, sig_for(E::Reg, E::Imm10, E::None)),
  entry(Jlr, 4, 0xE000, sig_for(E::Reg, E::Reg, E::Imm6)),

  // 3-operand XOPs.
  entry(Add, 7, 0xF000, sig_for(E::Reg, E::Reg, E::Reg)),
  entry(Adc, 7, 0xF200, sig_for(E::Reg, E::Reg, E::Reg)),
  entry(Sub, 7, 0xF400, sig_for(E::Reg, E::Reg, E::Reg)),
  entry(Sbb, 7, 0xF600, sig_for(E::Reg, E::Reg, E::Reg)),
  entry(Bic, 7, 0xF800, sig_for(E::Reg, E::Reg, E::Reg)), // bit clear: rc AND NOT rb
  entry(Bis, 7, 0xFA00, sig_for(E::Reg, E::Reg, E::Reg)), // bit set: or
  entry(Xor, 7, 0xFC00, sig_for(E::Reg, E::Reg, E::Reg)),

  // 2-operand YOPs.
  entry(Lsp, 10, 0xFE00, sig_for(E::Reg, E::Reg, E::None)), // load special register
  entry(Lio, 10, 0xFE40, sig_for(E::Reg, E::Reg, E::None)), // load from io space
  entry(Ssp, 10, 0xFE80, sig_for(E::Reg, E::Reg, E::None)), // store special register
  entry(Sio, 10, 0xFEC0, sig_for(E::Reg, E::Reg, E::None)), // store to io space
  entry(Y04, 10, 0xFF00, sig_for(E::None, E::None, E::None)), // reserved
  entry(Y05, 10, 0xFF40, sig_for(E::None, E::None, E::None)), // reserved
  entry(Y06, 10, 0xFF80, sig_for(E::None, E::None, E::None)), // reserved

  // 1-operand ZOPs.
  entry(Not, 13, 0xFFC0, sig_for(E::Reg, E::None, E::None)),
  entry(Neg, 13, 0xFFC8, sig_for(E::Reg, E::None, E::None)),
  entry(Swb, 13, 0xFFD0, sig_for(E::Reg, E::None, E::None)), // swap bytes
  entry(Sxt, 13, 0xFFD8, sig_for(E::Reg, E::None, E::None)), // sign extend byte
  entry(Lsr, 13, 0xFFE0, sig_for(E::Reg, E::None, E::None)),
  entry(Lsl, 13, 0xFFE8, sig_for(E::Reg, E::None, E::None)),
  entry(Asr, 13, 0xFFF0, sig_for(E::Reg, E::None, E::None)),

  // 0-operand VOPs.
  entry(Rti, 16, 0xFFF8, sig_for(E::None, E::None, E::None)),
  entry(Rtl, 16, 0xFFF9, sig_for(E::None, E::None, E::None)),
  entry(Di,  16, 0xFFFA, sig_for(E::None, E::None, E::None)),
  entry(Ei,  16, 0xFFFB, sig_for(E::None, E::None, E::None)),
  entry(Hlt, 16, 0xFFFC, sig_for(E::None, E::None, E::None)),
  entry(Brk, 16, 0xFFFD, sig_for(E::None, E::None, E::None)),
  entry(V06, 16, 0xFFFE, sig_for(E::None, E::None, E::None)), // reserved
  entry(Die, 16, 0xFFFF, sig_for(E::None, E::None, E::None)), // deliberate illegal
];

/// Find the key table entry for an instruction word: the first entry whose
/// top `nbits` match. The table is tiny, so a linear scan is fine.
pub fn recognize(w: Word) -> &'static KeyEntry {
  for ke in KEY_TABLE.iter() {
    if ke.matches(w) {
      return ke;
    }
  }
  // The base entries cover every possible top-3-bit pattern, so a word
  // always matches something.
  unreachable!("opcode 0x{:04X} not found in key table", w)
}

/// Number of general registers per mode. r0 always reads as zero.
pub const NUM_REGS: usize = 8;

/// Number of special registers per mode.
pub const SPR_SIZE: usize = 64;

// Special register assignments.
pub const SPR_PC: Word = 0;    // read-only via lsp
pub const SPR_LINK: Word = 1;  // written by jump-and-link, read by rtl
pub const SPR_IRR: Word = 2;   // exception return pc, kernel only
pub const SPR_ICR: Word = 3;   // exception cause, kernel only
pub const SPR_IMR: Word = 4;   // exception return mode, kernel only
pub const SPR_CCLS: Word = 6;  // cycle counter, low 16 bits
pub const SPR_CCMS: Word = 7;  // cycle counter, high bits
pub const SPR_USER_GEN: Word = 16;  // 16..23 alias the user general registers
pub const SPR_USER_LINK: Word = 25; // aliases the user link register
pub const SPR_MMU_CODE: Word = 32;  // 32..47 map 16 x 4 KiB code pages
pub const SPR_MMU_DATA: Word = 48;  // 48..63 map 16 x 4 KiB data pages

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_is_indexed_by_mnemonic() {
    for (i, ke) in KEY_TABLE.iter().enumerate() {
      assert_eq!(u8::from(ke.mnemonic) as usize, i);
    }
  }

  #[test]
  fn recognition_is_unique_and_stable() {
    // Every entry's own opcode must be recognized as that entry, and no
    // earlier (narrower) entry may shadow a later one.
    for ke in KEY_TABLE.iter() {
      let found = recognize(ke.opcode);
      assert_eq!(found.mnemonic, ke.mnemonic, "0x{:04X}", ke.opcode);
    }
  }

  #[test]
  fn recognition_covers_all_words() {
    // Exhaustive: every 16-bit word matches exactly one entry, twice.
    for w in 0..=0xFFFFu16 {
      let a = recognize(w).mnemonic;
      let b = recognize(w).mnemonic;
      assert_eq!(a, b);
    }
  }

  #[test]
  fn spot_check_encodings() {
    assert_eq!(recognize(0xDFF9).mnemonic, Mnemonic::Lui);
    assert_eq!(recognize(0xAFC9).mnemonic, Mnemonic::Adi);
    assert_eq!(recognize(0xE200).mnemonic, Mnemonic::Jlr);
    assert_eq!(recognize(0xF000).mnemonic, Mnemonic::Add);
    assert_eq!(recognize(0xFFC8).mnemonic, Mnemonic::Neg);
    assert_eq!(recognize(0xFFFF).mnemonic, Mnemonic::Die);
    assert_eq!(recognize(0x0000).mnemonic, Mnemonic::Ldw);
  }

  #[test]
  fn key_lookup_by_name() {
    assert_eq!(Key::from_name("adi"), Some(Key::Op(Mnemonic::Adi)));
    assert_eq!(Key::from_name("ldi"), Some(Key::Alias(Alias::Ldi)));
    assert_eq!(Key::from_name(".set"), Some(Key::Pseudo(Pseudo::Set)));
    assert_eq!(Key::from_name("frobnicate"), None);
  }

  #[test]
  fn operand_counts() {
    assert_eq!(num_operands(KEY_TABLE[Mnemonic::Adi as usize].signature), 3);
    assert_eq!(num_operands(KEY_TABLE[Mnemonic::Lui as usize].signature), 2);
    assert_eq!(num_operands(KEY_TABLE[Mnemonic::Not as usize].signature), 1);
    assert_eq!(num_operands(KEY_TABLE[Mnemonic::Rti as usize].signature), 0);
    assert_eq!(num_operands(Alias::Sys.signature()), 1);
    assert_eq!(num_operands(Pseudo::Set.signature()), 2);
  }
}
