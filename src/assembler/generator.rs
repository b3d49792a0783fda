/*!
  The generator makes two passes over the record list. Pass 1 resolves
  every symbol reference, reporting forward references that never became
  definitions. Pass 2 applies the immediate transforms, range-checks the
  immediates, and packs the operand parts into the shape dictated by each
  key's signature. Nothing is emitted when any error was reported.
*/

use either::Either;

use crate::isa::{self, Element, Mnemonic};
use crate::{Word, K};

use super::parser::{ImmXform, Operand, Parse, Record};

/// Code may not exceed 64 K instructions (128 KiB); data may not exceed
/// 64 KiB. The data segment, when present, begins at this file offset.
pub const MAX_CODE_WORDS: usize = 64 * K;
pub const MAX_DATA_BYTES: usize = 64 * K;
pub const DATA_FILE_OFFSET: usize = 128 * K;

/// An assembled object image: little-endian code words from offset 0 and,
/// if a data segment is present, data bytes from offset 128 KiB. There is
/// no header.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Object {
  pub code: Vec<Word>,
  pub data: Vec<u8>,
}

impl Object {
  pub fn to_bytes(&self) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 * self.code.len());
    for w in &self.code {
      bytes.extend_from_slice(&w.to_le_bytes());
    }
    if !self.data.is_empty() {
      // Writers may store literal zeros or leave a file hole that reads
      // as zeros; we store the zeros.
      bytes.resize(DATA_FILE_OFFSET, 0);
      bytes.extend_from_slice(&self.data);
    }
    bytes
  }

  /// Split a binary file image back into its segments.
  pub fn from_bytes(bytes: &[u8]) -> Object {
    let code_bytes = &bytes[..bytes.len().min(DATA_FILE_OFFSET)];
    let code = code_bytes
      .chunks_exact(2)
      .map(|pair| Word::from_le_bytes([pair[0], pair[1]]))
      .collect();
    let data = if bytes.len() > DATA_FILE_OFFSET {
      bytes[DATA_FILE_OFFSET..].to_vec()
    } else {
      Vec::new()
    };
    Object { code, data }
  }

  pub fn write_file(&self, path: &str) -> std::io::Result<()> {
    std::fs::write(path, self.to_bytes())
  }
}

struct Generator<'a> {
  src_path: &'a str,
  parse: &'a Parse,
  diagnostics: Vec<String>,
}

/// Generate an object from a parse. On any error, returns the collected
/// diagnostics instead; no partial binary is ever produced.
pub fn generate(src_path: &str, parse: &Parse) -> Result<Object, Vec<String>> {
  let mut g = Generator { src_path, parse, diagnostics: Vec::new() };

  // Pass 1: every symbol reference must resolve.
  for record in &parse.records {
    let parts: &[Operand] = match record {
      Record::Insn { parts, .. } => parts,
      Record::Fill { value, .. } => std::slice::from_ref(value),
    };
    for part in parts {
      if let Either::Left(symref) = part {
        if parse.symbols.value_of(symref.index).is_none() {
          g.error(record.line(), format!("undefined: {}", parse.symbols.name_of(symref.index)));
        }
      }
    }
  }
  for (operand, line) in &parse.data {
    if let Either::Left(symref) = operand {
      if parse.symbols.value_of(symref.index).is_none() {
        g.error(*line, format!("undefined: {}", parse.symbols.name_of(symref.index)));
      }
    }
  }
  if !g.diagnostics.is_empty() {
    return Err(g.diagnostics);
  }

  // Pass 2: pack.
  let mut code: Vec<Word> = Vec::with_capacity(parse.records.len());
  for (dot, record) in parse.records.iter().enumerate() {
    let w = match record {
      Record::Insn { op, parts, xform, line } => g.pack(dot, *op, parts, *xform, *line),
      Record::Fill { value, .. } => g.resolve(value),
    };
    code.push(w);
  }

  let mut data: Vec<u8> = Vec::with_capacity(parse.data.len());
  for (operand, line) in &parse.data {
    let v = g.resolve(operand);
    if v > 0xFF {
      g.error(*line, format!("byte value out of range: 0x{:X}", v));
    }
    data.push(v as u8);
  }

  if code.len() > MAX_CODE_WORDS {
    g.error(0, format!("code segment too large: {} words", code.len()));
  }
  if data.len() > MAX_DATA_BYTES {
    g.error(0, format!("data segment too large: {} bytes", data.len()));
  }

  if g.diagnostics.is_empty() {
    Ok(Object { code, data })
  } else {
    Err(g.diagnostics)
  }
}

impl<'a> Generator<'a> {
  /// Pack one instruction record into its 16-bit word.
  fn pack(&mut self, dot: usize, op: Mnemonic, parts: &[Operand; 3], xform: ImmXform, line: usize) -> Word {
    let ke = &isa::KEY_TABLE[u8::from(op) as usize];

    // Walk the signature, collecting register fields and the immediate.
    let mut regs = [0u16; 3];
    let mut imm: Word = 0;
    for i in 0..3 {
      let value = self.resolve(&parts[i]);
      match isa::element(ke.signature, i) {
        Element::None => {}
        Element::Reg => {
          if value > 7 {
            self.error(line, format!("not a register: {}", value));
          }
          regs[i] = value & 7;
        }
        Element::Imm6 => imm = self.imm6(value, xform, line),
        Element::Imm7 => imm = self.imm7(dot, value, xform, line),
        Element::Imm10 => imm = self.imm10(value, xform, line),
        Element::Val16 | Element::Sym | Element::Str => {
          unreachable!("element not packable in an instruction")
        }
      }
    }
    let [ra, rb, rc] = regs;

    let index = u8::from(op);
    match op {
      // Base operations with a 7-bit immediate field at bits 12:6.
      Mnemonic::Ldw | Mnemonic::Ldb | Mnemonic::Stw | Mnemonic::Stb
      | Mnemonic::Beq | Mnemonic::Adi => ke.opcode | (imm & 0x7F) << 6 | rb << 3 | ra,
      // lui: 10-bit upper immediate at bits 12:3.
      Mnemonic::Lui => ke.opcode | (imm & 0x3FF) << 3 | ra,
      // jlr: 6-bit immediate at bits 11:6; bit 12 must stay zero.
      Mnemonic::Jlr => ke.opcode | (imm & 0x3F) << 6 | rb << 3 | ra,
      _ if index <= u8::from(Mnemonic::Xor) => ke.opcode | rc << 6 | rb << 3 | ra,
      _ if index <= u8::from(Mnemonic::Y06) => ke.opcode | rb << 3 | ra,
      _ if index <= u8::from(Mnemonic::Asr) => ke.opcode | ra,
      _ => ke.opcode,
    }
  }

  fn resolve(&mut self, operand: &Operand) -> Word {
    match operand {
      Either::Right(v) => *v,
      Either::Left(symref) => {
        // Pass 1 established that every reference resolves.
        let v = self.parse.symbols.value_of(symref.index).unwrap_or(0);
        if symref.negated { v.wrapping_neg() } else { v }
      }
    }
  }

  fn imm6(&mut self, value: Word, xform: ImmXform, line: usize) -> Word {
    match xform {
      ImmXform::Lower6 => value & 0x3F,
      _ => {
        if value > 0x3F {
          self.error(line, format!("immediate out of range: 0x{:X}", value));
        }
        value & 0x3F
      }
    }
  }

  fn imm7(&mut self, dot: usize, value: Word, xform: ImmXform, line: usize) -> Word {
    match xform {
      ImmXform::Lower6 => value & 0x3F,
      ImmXform::BranchRel => {
        // Branch targets are stored as target - (pc+1).
        let disp = value.wrapping_sub(dot as Word + 1);
        if !fits_signed7(disp) {
          self.error(line, format!("branch target out of range: {}", value));
        }
        disp & 0x7F
      }
      _ => {
        if !fits_signed7(value) {
          self.error(line, format!("immediate out of range: 0x{:X}", value));
        }
        value & 0x7F
      }
    }
  }

  fn imm10(&mut self, value: Word, xform: ImmXform, line: usize) -> Word {
    match xform {
      ImmXform::Upper10 => value >> 6,
      _ => {
        if value > 0x3FF {
          self.error(line, format!("immediate out of range: 0x{:X}", value));
        }
        value
      }
    }
  }

  fn error(&mut self, line: usize, msg: String) {
    self.diagnostics.push(format!("{}, line {}: {}", self.src_path, line, msg));
  }
}

fn fits_signed7(value: Word) -> bool {
  value < 0x40 || value >= 0xFFC0
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assembler::parser::parse_text;

  fn assemble(body: &str) -> Object {
    let parse = parse_text("test", body);
    assert_eq!(parse.error_count, 0, "{:?}", parse.diagnostics);
    generate("test", &parse).expect("generate")
  }

  fn errors(body: &str) -> Vec<String> {
    let parse = parse_text("test", body);
    assert_eq!(parse.error_count, 0, "{:?}", parse.diagnostics);
    generate("test", &parse).expect_err("expected errors")
  }

  #[test]
  fn ldi_pair_encoding() {
    // lui r1, 0x3FF followed by adi r1, r1, 0x3F.
    let object = assemble("ldi r1, 0xFFFF\n");
    assert_eq!(object.code, vec![0xDFF9, 0xAFC9]);
  }

  #[test]
  fn sys_encoding() {
    let object = assemble("sys 8\n");
    assert_eq!(object.code, vec![0xE200]);
  }

  #[test]
  fn backward_branch_encoding() {
    // A branch to its own address encodes displacement -1.
    let mut source = String::new();
    for _ in 0..0x10 {
      source.push_str("nop\n");
    }
    source.push_str("l: beq r1, r2, l\n");
    let object = assemble(&source);
    assert_eq!(object.code[0x10], 0x8000 | (0x7F << 6) | (2 << 3) | 1);
  }

  #[test]
  fn nop_is_neg_r0() {
    let object = assemble("nop\n");
    assert_eq!(object.code, vec![0xFFC8]);
  }

  #[test]
  fn lli_is_adi_from_r0() {
    let object = assemble("lli r3, 7\n");
    assert_eq!(object.code, vec![0xA000 | (7 << 6) | (0 << 3) | 3]);
  }

  #[test]
  fn xop_encoding() {
    // add r1, r2, r3: ra=1 rb=2 rc=3.
    let object = assemble("add r1, r2, r3\n");
    assert_eq!(object.code, vec![0xF000 | (3 << 6) | (2 << 3) | 1]);
  }

  #[test]
  fn zop_and_vop_encoding() {
    let object = assemble("not r5\nasr r1\nrti\nhlt\n");
    assert_eq!(object.code, vec![0xFFC5, 0xFFF1, 0xFFF8, 0xFFFC]);
  }

  #[test]
  fn yop_encoding() {
    // lsp r1, r2 / ssp r3, r4.
    let object = assemble("lsp r1, r2\nssp r3, r4\n");
    assert_eq!(object.code, vec![0xFE00 | (2 << 3) | 1, 0xFE80 | (4 << 3) | 3]);
  }

  #[test]
  fn negative_immediate_encoding() {
    let object = assemble("adi r1, r1, -1\n");
    assert_eq!(object.code, vec![0xA000 | (0x7F << 6) | (1 << 3) | 1]);
  }

  #[test]
  fn fill_and_word_values() {
    let object = assemble(".set big 0xBEEF\n.fill big\n.word 5\n");
    assert_eq!(object.code, vec![0xBEEF, 5]);
  }

  #[test]
  fn data_segment_offset() {
    let object = assemble("hlt\n.string \"AB\"\n.byte 0x10\n");
    assert_eq!(object.data, vec![b'A', b'B', 0x10]);
    let bytes = object.to_bytes();
    assert_eq!(bytes.len(), DATA_FILE_OFFSET + 3);
    assert_eq!(&bytes[DATA_FILE_OFFSET..], &[b'A', b'B', 0x10]);
    // And the image splits back into the same segments.
    assert_eq!(Object::from_bytes(&bytes), object);
  }

  #[test]
  fn unresolved_forward_reference() {
    let errs = errors("beq r1, r2, nowhere\n");
    assert!(errs[0].contains("undefined: nowhere"), "{:?}", errs);
  }

  #[test]
  fn branch_out_of_range() {
    let mut source = String::from("beq r0, r0, far\n");
    for _ in 0..100 {
      source.push_str("nop\n");
    }
    source.push_str("far: hlt\n");
    let errs = errors(&source);
    assert!(errs[0].contains("branch target out of range"), "{:?}", errs);
  }

  #[test]
  fn immediate_out_of_range() {
    let errs = errors("adi r1, r1, 100\n");
    assert!(errs[0].contains("immediate out of range"), "{:?}", errs);
    let errs = errors("lli r1, 0x40\n");
    assert!(errs[0].contains("immediate out of range"), "{:?}", errs);
  }
}
