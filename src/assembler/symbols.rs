/*!
  The assembler's symbol table. Symbols are interned and indexed by a
  16-bit value so that operand parts of a machine instruction record can
  refer to them compactly; this enforces a limit of 32766 symbols on a
  compilation unit. Nothing is freed during a parse.

  The table pre-seeds the registers r0..r7 at indices 0..7 with value ==
  index, and every key mnemonic with value == its shape signature, so that
  a source line like `adi: .word 0` is caught as a redefinition.
*/

use bimap::BiMap;
use string_cache::DefaultAtom;
use thiserror::Error;

use crate::isa::{self, Alias, Pseudo};
use crate::Word;

/// Maximum number of symbols. The limit of 2^15-2 is adequate and
/// convenient: symbol indexes are always positive with the top bit free.
pub const MAX_SYMBOLS: usize = 0x7FFE;
pub const NO_SYMBOL: u16 = 0x7FFF;

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum SymbolError {
  #[error("{0} redefined")]
  Redefined(String),
  #[error("undefined: {0}")]
  Undefined(String),
  #[error("symbol table overflow")]
  Overflow,
}

/// Undefined symbols can later become defined; the value of a defined
/// symbol may not be changed.
#[derive(Clone, Copy, Debug, Default)]
struct Entry {
  defined: bool,
  value: Word,
}

pub struct SymbolTable {
  indexes: BiMap<DefaultAtom, u16>,
  entries: Vec<Entry>,
}

impl SymbolTable {
  pub fn new() -> SymbolTable {
    let mut table = SymbolTable { indexes: BiMap::new(), entries: Vec::with_capacity(64) };

    for i in 0..isa::NUM_REGS {
      let name = format!("r{}", i);
      table.create(&name, true, i as Word).unwrap();
    }
    for ke in isa::KEY_TABLE.iter() {
      table.create(ke.mnemonic.into(), true, ke.signature).unwrap();
    }
    for alias in [Alias::Ldi, Alias::Jmp, Alias::Jsr, Alias::Lli, Alias::Sys, Alias::Nop] {
      table.create(alias.into(), true, alias.signature()).unwrap();
    }
    for pseudo in [
      Pseudo::Set, Pseudo::Space, Pseudo::Fill,
      Pseudo::DataWord, Pseudo::DataByte, Pseudo::DataString,
    ] {
      table.create(pseudo.into(), true, pseudo.signature()).unwrap();
    }

    table
  }

  fn create(&mut self, name: &str, defined: bool, value: Word) -> Result<u16, SymbolError> {
    if self.entries.len() == MAX_SYMBOLS {
      return Err(SymbolError::Overflow);
    }
    let index = self.entries.len() as u16;
    self.entries.push(Entry { defined, value });
    self.indexes.insert(DefaultAtom::from(name), index);
    Ok(index)
  }

  /// Define a symbol. The symbol may not exist, or may exist in the
  /// undefined state from an earlier forward reference.
  pub fn define(&mut self, name: &str, value: Word) -> Result<u16, SymbolError> {
    if let Some(&index) = self.indexes.get_by_left(&DefaultAtom::from(name)) {
      let entry = &mut self.entries[index as usize];
      if entry.defined {
        return Err(SymbolError::Redefined(name.to_string()));
      }
      entry.defined = true;
      entry.value = value;
      return Ok(index);
    }
    self.create(name, true, value)
  }

  /// A symbol use has been seen. If the symbol does not exist yet it is
  /// entered as an undefined forward reference.
  pub fn use_symbol(&mut self, name: &str) -> Result<u16, SymbolError> {
    if let Some(&index) = self.indexes.get_by_left(&DefaultAtom::from(name)) {
      return Ok(index);
    }
    self.create(name, false, 0)
  }

  /// The value of a defined symbol, by name.
  pub fn get(&self, name: &str) -> Result<Word, SymbolError> {
    match self.indexes.get_by_left(&DefaultAtom::from(name)) {
      Some(&index) => self.value_of(index).ok_or_else(|| SymbolError::Undefined(name.to_string())),
      None => Err(SymbolError::Undefined(name.to_string())),
    }
  }

  /// The value of a defined symbol, by index; `None` while undefined.
  pub fn value_of(&self, index: u16) -> Option<Word> {
    let entry = self.entries.get(index as usize)?;
    entry.defined.then(|| entry.value)
  }

  /// The interned name for an index, used for diagnostics.
  pub fn name_of(&self, index: u16) -> &str {
    match self.indexes.get_by_right(&index) {
      Some(atom) => atom.as_ref(),
      None => "?",
    }
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Debug dump of the user-defined portion of the table.
  pub fn dump(&self) {
    let first_user = isa::NUM_REGS + isa::KEY_TABLE.len() + 12;
    for index in first_user..self.entries.len() {
      let entry = self.entries[index];
      eprintln!(
        "asm: sym {:5} {:16} defined={} value=0x{:04X}",
        index,
        self.name_of(index as u16),
        entry.defined,
        entry.value
      );
    }
  }
}

impl Default for SymbolTable {
  fn default() -> Self {
    SymbolTable::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::isa::Mnemonic;

  #[test]
  fn registers_are_seeded() {
    let table = SymbolTable::new();
    for i in 0..8u16 {
      assert_eq!(table.get(&format!("r{}", i)).unwrap(), i);
    }
  }

  #[test]
  fn keys_are_seeded_with_signatures() {
    let table = SymbolTable::new();
    let sig = table.get("adi").unwrap();
    assert_eq!(sig, isa::KEY_TABLE[Mnemonic::Adi as usize].signature);
    assert!(table.get(".fill").is_ok());
    assert!(table.get("ldi").is_ok());
  }

  #[test]
  fn define_then_get() {
    let mut table = SymbolTable::new();
    let index = table.define("loop", 0x10).unwrap();
    assert_eq!(table.get("loop").unwrap(), 0x10);
    assert_eq!(table.name_of(index), "loop");
  }

  #[test]
  fn forward_reference_then_define() {
    let mut table = SymbolTable::new();
    let index = table.use_symbol("later").unwrap();
    assert_eq!(table.value_of(index), None);
    let defined = table.define("later", 42).unwrap();
    assert_eq!(defined, index);
    assert_eq!(table.value_of(index), Some(42));
  }

  #[test]
  fn redefinition_is_an_error() {
    let mut table = SymbolTable::new();
    table.define("x", 1).unwrap();
    assert_eq!(table.define("x", 2), Err(SymbolError::Redefined("x".to_string())));
    // Keys and registers are already defined.
    assert!(matches!(table.define("adi", 0), Err(SymbolError::Redefined(_))));
    assert!(matches!(table.define("r3", 0), Err(SymbolError::Redefined(_))));
  }
}
