//! The round trip contract the integration driver enforces: for
//! well-formed source S, assemble(S) == assemble(disassemble(assemble(S)))
//! byte for byte. The disassembler's quiet listing must be acceptable
//! assembler input, and the fused aliases must reconstruct the exact
//! words the assembler originally emitted.

use wut4::assembler::assemble_text;
use wut4::disassembler::disassemble;

fn roundtrip(source: &str) {
  let first = assemble_text("first", source).expect("first assembly");
  let listing = disassemble(&first.code, true).join("\n") + "\n";
  let second = assemble_text("second", &listing)
    .unwrap_or_else(|e| panic!("reassembly failed: {}\nlisting:\n{}", e, listing));
  assert_eq!(
    first.to_bytes(),
    second.to_bytes(),
    "round trip not byte-identical; listing:\n{}",
    listing
  );
}

#[test]
fn every_shape_and_fused_pair() {
  roundtrip(
    "# every operand shape and every alias
start:
  ldw r1, r2, 0x10
  ldb r3, r4, -0x2
  stw r1, r2, 0x10
  stb r3, r4, 1
  beq r1, r2, start
  adi r1, r2, 0x1F
  lui r1, 0x3FF
  jlr r1, r2, 0x5
  add r1, r2, r3
  adc r4, r5, r6
  sub r1, r2, r3
  sbb r4, r5, r6
  bic r1, r2, r3
  bis r4, r5, r6
  xor r1, r2, r3
  lsp r1, r2
  lio r3, r4
  ssp r5, r6
  sio r7, r1
  not r1
  neg r2
  swb r3
  sxt r4
  lsr r5
  lsl r6
  asr r7
  rti
  rtl
  di
  ei
  brk
  ldi r1, 0xFFFF
  ldi r2, 5
  lli r3, 0x07
  jmp r4, 0x1234
  jsr r5, start
  sys 2
  nop
  hlt
",
  )
}

#[test]
fn branches_and_forward_references() {
  roundtrip(
    "
  beq r1, r2, ahead
  nop
  nop
ahead:
  adi r1, r0, 1
loop:
  beq r0, r0, loop
  hlt
",
  )
}

#[test]
fn hand_written_pair_fuses_and_survives() {
  // A lui/adi pair written by hand is indistinguishable from an emitted
  // ldi; the round trip must still be exact.
  roundtrip("lui r1, 2\nadi r1, r1, 5\nhlt\n");
}

#[test]
fn reserved_and_raw_forms() {
  roundtrip("y04\ny05\ny06\nv06\ndie\njlr r2, r3, 0x3F\nhlt\n");
}

#[test]
fn fill_space_and_set() {
  roundtrip(".set k 0x1234\nlli r1, 7\n.fill k\n.word 0xBEEF\nhlt\n");
}

#[test]
fn load_immediate_scenario() {
  // ldi r1, 0xFFFF encodes as lui 0xDFF9 then adi 0xAFC9, and the
  // disassembly collapses to exactly one line.
  let object = assemble_text("t", "ldi r1, 0xFFFF\n").unwrap();
  assert_eq!(object.code, vec![0xDFF9, 0xAFC9]);
  let lines = disassemble(&object.code, true);
  let visible: Vec<&String> = lines.iter().filter(|l| !l.is_empty()).collect();
  assert_eq!(visible, vec!["ldi r1, 0xFFFF"]);
  roundtrip("ldi r1, 0xFFFF\n");
}

#[test]
fn disassembly_is_stable_under_iteration() {
  let source = "ldi r1, 0x1234\njmp r2, 0x100\nsys 4\nnop\nhlt\n";
  let first = assemble_text("a", source).unwrap();
  let listing1 = disassemble(&first.code, true).join("\n") + "\n";
  let second = assemble_text("b", &listing1).unwrap();
  let listing2 = disassemble(&second.code, true).join("\n") + "\n";
  assert_eq!(listing1, listing2);
}
