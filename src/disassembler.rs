/*!
  The disassembler makes three passes over the code segment of an object.

  Pass 1 decodes each aligned 16-bit word into its canonical mnemonic using
  the same key table match as the simulator's decoder, rewriting branch
  offsets to absolute targets. Pass 2 rewrites fused pairs (`lui` followed
  by `adi` or `jlr`) into the single alias mnemonics `ldi`, `jmp`, and
  `jsr`, and the one-word aliases `sys`, `lli`, and `nop`. Pass 3 renders
  the lines, optionally with the index and raw opcode prefix columns.

  Fusion never removes a line: the `lui` line of a fused pair is blanked in
  place so indices remain stable for reporting. The segment ends at the
  first aligned zero word, which by convention is not a legal instruction.
*/

use crate::isa::{self, Mnemonic};
use crate::{bits, Word};

/// One decoded code word. The fields the fusion pass needs are kept
/// alongside the rendered text.
#[derive(Clone, Debug)]
struct Line {
  index: usize,
  word: Word,
  op: Mnemonic,
  ra: Word,
  rb: Word,
  imm: Word,
  text: String,
  blanked: bool,
  fused: bool, // rewritten to an alias; no longer eligible as a pair head
}

/// Disassemble a code segment into printable lines. With `quiet`, the
/// index and opcode prefix columns are suppressed and the output is
/// acceptable as assembler input.
pub fn disassemble(code: &[Word], quiet: bool) -> Vec<String> {
  let mut lines = decode_all(code);
  rewrite_aliases(&mut lines);
  render(&lines, quiet)
}

/// Decode a single word at a given code index, for the simulator's dumps.
/// The one-word aliases are applied; pair fusion needs context this
/// caller does not have.
pub fn decode_word(index: usize, word: Word) -> String {
  let mut line = decode(index, word);
  rewrite_single(&mut line);
  line.text
}

// region Pass 1: decode

fn decode_all(code: &[Word]) -> Vec<Line> {
  let mut lines = Vec::new();
  for (index, &word) in code.iter().enumerate() {
    if word == 0 {
      break;
    }
    lines.push(decode(index, word));
  }
  lines
}

fn decode(index: usize, word: Word) -> Line {
  let ke = isa::recognize(word);
  let op = ke.mnemonic;
  let ra = bits(word, 2, 0);
  let rb = bits(word, 5, 3);
  let rc = bits(word, 8, 6);

  let (imm, text) = match op {
    Mnemonic::Ldw | Mnemonic::Ldb | Mnemonic::Stw | Mnemonic::Stb | Mnemonic::Adi => {
      let imm = sxt7(bits(word, 12, 6));
      (imm, format!("{} r{}, r{}, {}", op, ra, rb, signed_hex(imm)))
    }
    Mnemonic::Beq => {
      // Branch offsets are rewritten to absolute targets.
      let imm = sxt7(bits(word, 12, 6));
      let target = (index as Word).wrapping_add(1).wrapping_add(imm);
      (target, format!("{} r{}, r{}, {}", op, ra, rb, target))
    }
    Mnemonic::Lui => {
      let imm = bits(word, 12, 3);
      (imm, format!("{} r{}, 0x{:X}", op, ra, imm))
    }
    Mnemonic::Jlr => {
      let imm = bits(word, 11, 6);
      (imm, format!("{} r{}, r{}, 0x{:X}", op, ra, rb, imm))
    }
    _ if op as u8 <= Mnemonic::Xor as u8 => (0, format!("{} r{}, r{}, r{}", op, ra, rb, rc)),
    Mnemonic::Lsp | Mnemonic::Lio | Mnemonic::Ssp | Mnemonic::Sio => {
      (0, format!("{} r{}, r{}", op, ra, rb))
    }
    Mnemonic::Y04 | Mnemonic::Y05 | Mnemonic::Y06 => (0, op.to_string()),
    _ if op as u8 <= Mnemonic::Asr as u8 => (0, format!("{} r{}", op, ra)),
    _ => (0, op.to_string()),
  };

  Line { index, word, op, ra, rb, imm, text, blanked: false, fused: false }
}

fn sxt7(field: Word) -> Word {
  if field & 0x40 != 0 {
    field | 0xFF80
  } else {
    field
  }
}

fn signed_hex(v: Word) -> String {
  if v >= 0x8000 {
    format!("-0x{:X}", v.wrapping_neg())
  } else {
    format!("0x{:X}", v)
  }
}

// endregion

// region Pass 2: alias rewriting

fn rewrite_aliases(lines: &mut [Line]) {
  for i in 0..lines.len() {
    // Fused pairs: a lui immediately followed by the matching adi or jlr.
    if i > 0 {
      let prev = lines[i - 1].clone();
      let cur = lines[i].clone();
      if prev.op == Mnemonic::Lui && !prev.blanked && !prev.fused {
        if cur.op == Mnemonic::Adi && cur.ra == prev.ra && cur.rb == prev.ra && cur.imm <= 0x3F {
          let value = (prev.imm << 6) | cur.imm;
          lines[i - 1].blanked = true;
          lines[i].text = format!("ldi r{}, 0x{:X}", cur.ra, value);
          lines[i].fused = true;
          continue;
        }
        if cur.op == Mnemonic::Jlr && (cur.ra == 1 || cur.ra == 2) && cur.rb == prev.ra {
          let value = (prev.imm << 6) | cur.imm;
          let name = if cur.ra == 1 { "jsr" } else { "jmp" };
          lines[i - 1].blanked = true;
          lines[i].text = format!("{} r{}, 0x{:X}", name, cur.rb, value);
          lines[i].fused = true;
          continue;
        }
      }
    }

    rewrite_single(&mut lines[i]);
  }
}

/// The one-word aliases: a bare even `jlr r0, r0` is a `sys`, an `adi`
/// from r0 is an `lli`, and `neg r0` is the canonical `nop`.
fn rewrite_single(line: &mut Line) {
  if line.op == Mnemonic::Jlr && line.ra == 0 && line.rb == 0 && line.imm & 1 == 0 {
    line.text = format!("sys {}", line.imm);
    line.fused = true;
  } else if line.op == Mnemonic::Adi && line.rb == 0 && line.imm <= 0x3F {
    line.text = format!("lli r{}, 0x{:02X}", line.ra, line.imm);
    line.fused = true;
  } else if line.op == Mnemonic::Neg && line.ra == 0 {
    line.text = "nop".to_string();
    line.fused = true;
  }
}

// endregion

// region Pass 3: rendering

fn render(lines: &[Line], quiet: bool) -> Vec<String> {
  lines
    .iter()
    .map(|line| {
      if quiet {
        if line.blanked { String::new() } else { line.text.clone() }
      } else if line.blanked {
        format!("{:04X}: 0x{:04X}:", line.index, line.word)
      } else {
        format!("{:04X}: 0x{:04X}: {}", line.index, line.word, line.text)
      }
    })
    .collect()
}

// endregion

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assembler::Object;

  fn quiet_lines(code: &[Word]) -> Vec<String> {
    disassemble(code, true)
  }

  #[test]
  fn ldi_pair_fuses_to_one_line() {
    // The byte pair F9 DF C9 AF: lui r1, 0x3FF ; adi r1, r1, 0x3F.
    let object = Object::from_bytes(&[0xF9, 0xDF, 0xC9, 0xAF]);
    let lines = quiet_lines(&object.code);
    assert_eq!(lines, vec!["".to_string(), "ldi r1, 0xFFFF".to_string()]);
  }

  #[test]
  fn jmp_pair_fuses() {
    // lui r1, 1 ; jlr r2, r1, 4 == jmp r1, 0x44.
    let code = [0xC000 | (1 << 3) | 1, 0xE000 | (4 << 6) | (1 << 3) | 2];
    let lines = quiet_lines(&code);
    assert_eq!(lines, vec!["".to_string(), "jmp r1, 0x44".to_string()]);
  }

  #[test]
  fn jsr_pair_fuses() {
    let code = [0xC000 | (1 << 3) | 3, 0xE000 | (4 << 6) | (3 << 3) | 1];
    let lines = quiet_lines(&code);
    assert_eq!(lines, vec!["".to_string(), "jsr r3, 0x44".to_string()]);
  }

  #[test]
  fn bare_jlr_is_sys() {
    let lines = quiet_lines(&[0xE200]);
    assert_eq!(lines, vec!["sys 8".to_string()]);
  }

  #[test]
  fn odd_jlr_is_not_sys() {
    let lines = quiet_lines(&[0xE000 | (3 << 6)]);
    assert_eq!(lines, vec!["jlr r0, r0, 0x3".to_string()]);
  }

  #[test]
  fn adi_from_r0_is_lli() {
    let code = [0xA000 | (7 << 6) | (0 << 3) | 3];
    assert_eq!(quiet_lines(&code), vec!["lli r3, 0x07".to_string()]);
  }

  #[test]
  fn neg_r0_is_nop() {
    assert_eq!(quiet_lines(&[0xFFC8]), vec!["nop".to_string()]);
  }

  #[test]
  fn branch_target_is_absolute() {
    // beq r2, r1 at index 0x10 with displacement -1 branches to 16.
    let mut code = vec![0xFFC8; 0x11];
    code[0x10] = 0x8000 | (0x7F << 6) | (1 << 3) | 2;
    let lines = quiet_lines(&code);
    assert_eq!(lines[0x10], "beq r2, r1, 16");
  }

  #[test]
  fn stops_at_zero_word() {
    let lines = quiet_lines(&[0xFFC8, 0x0000, 0xFFC8]);
    assert_eq!(lines.len(), 1);
  }

  #[test]
  fn fusion_keeps_line_count() {
    // Two fused pairs and a hlt: five words, five lines.
    let object = crate::assembler::assemble_text(
      "t",
      "ldi r1, 0xFFFF\njmp r2, 0x1234\nhlt\n",
    )
    .unwrap();
    let lines = quiet_lines(&object.code);
    assert_eq!(lines.len(), 5);
    assert_eq!(lines.iter().filter(|l| l.is_empty()).count(), 2);
  }

  #[test]
  fn prefixed_output_format() {
    let lines = disassemble(&[0xFFFC], false);
    assert_eq!(lines, vec!["0000: 0xFFFC: hlt".to_string()]);
  }

  #[test]
  fn negative_load_offset() {
    // ldw r1, r2, -2.
    let code = [0x0000 | (0x7E << 6) | (2 << 3) | 1];
    assert_eq!(quiet_lines(&code), vec!["ldw r1, r2, -0x2".to_string()]);
  }
}
