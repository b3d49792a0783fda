/*!
  The parser. The assembly language is regular; there is nothing that needs
  to balance. A source line is

  ```text
  (Label)? (KeySymbol Expression{num_operands(KeySymbol)})? Newline
  ```

  and an expression is zero or more `-` signs followed by a number or a
  symbol. The parser is a small state machine driven one token at a time,
  with one token of pushback. If an error occurs, no records are created
  for the offending line, but processing continues so that further errors
  can be reported.

  Each non-blank line produces zero, one, or two `Record`s: pseudo-ops may
  emit none, and `ldi` and `jmp`/`jsr` with a target that does not fit in
  the immediate emit a `lui` followed by an `adi`/`jlr`. The operand parts
  of a record are a tagged sum: either a symbol-table reference (with a
  negation flag) or an immediate value. A record also carries the immediate
  transform to apply after symbol resolution, which is how the fused pairs
  and branch displacements survive forward references.
*/

use either::Either;

use crate::isa::{Alias, Key, Mnemonic, Pseudo, Element, element, num_operands};
use crate::Word;

use super::lexer::{Lexer, Token, TokenKind};
use super::symbols::SymbolTable;

/// A reference to a symbol table entry, possibly negated at the use site.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct SymRef {
  pub index: u16,
  pub negated: bool,
}

/// One operand part: a symbol reference or an immediate value.
pub type Operand = Either<SymRef, Word>;

const ZERO: Operand = Either::Right(0);

/// The transform the generator applies to a record's immediate after
/// symbol resolution.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ImmXform {
  /// Use the resolved value directly, range-checked per the signature.
  Direct,
  /// Upper 10 bits of a 16-bit value, for the `lui` half of a fused pair.
  Upper10,
  /// Low 6 bits of a 16-bit value, for the `adi`/`jlr` half.
  Lower6,
  /// Displacement from the following instruction, for `beq`.
  BranchRel,
}

/// A machine instruction record: the key, up to three operand parts in
/// signature order, and the immediate transform. One record becomes one
/// 16-bit word.
#[derive(Clone, Debug)]
pub enum Record {
  Insn {
    op: Mnemonic,
    parts: [Operand; 3],
    xform: ImmXform,
    line: usize,
  },
  /// A literal word in the code stream, from `.word`, `.fill`, `.space`.
  Fill { value: Operand, line: usize },
}

impl Record {
  pub fn line(&self) -> usize {
    match self {
      Record::Insn { line, .. } | Record::Fill { line, .. } => *line,
    }
  }
}

/// Everything the parser hands to the generator.
pub struct Parse {
  pub records: Vec<Record>,
  /// Data-segment bytes; each is an operand so `.byte` can forward-reference.
  pub data: Vec<(Operand, usize)>,
  pub symbols: SymbolTable,
  pub diagnostics: Vec<String>,
  pub error_count: usize,
}

// Parser states.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum State {
  Error,          // error seen, seeking newline
  BetweenLines,   // at start of line
  NeedKey,        // have a label if any, need a key symbol
  NeedExpression, // have a key, need one or more operands
  NeedNewline,    // have everything, must see newline
}

/// An operand as collected during the line, before emission.
#[derive(Clone, Debug)]
enum Collected {
  Expr(Operand),
  Name(String),   // a new symbol, for `.set`
  Bytes(Vec<u8>), // a quoted string, for `.string`
}

struct Parser {
  src_path: String,
  src_line: usize,
  state: State,
  symbols: SymbolTable,
  records: Vec<Record>,
  data: Vec<(Operand, usize)>,
  diagnostics: Vec<String>,
  error_count: usize,

  // Per-line context.
  pending_label: Option<String>,
  key: Option<Key>,
  signature: u16,
  noperands: usize,
  operands: Vec<Collected>,
  positive: bool,
}

pub fn parse_file(src_path: &str) -> std::io::Result<Parse> {
  let lexer = Lexer::from_file(src_path)?;
  Ok(parse_tokens(src_path, lexer))
}

pub fn parse_text(ident: &str, body: &str) -> Parse {
  parse_tokens(ident, Lexer::from_text(body))
}

fn parse_tokens(src_path: &str, mut lexer: Lexer) -> Parse {
  let mut p = Parser {
    src_path: src_path.to_string(),
    src_line: 1,
    state: State::BetweenLines,
    symbols: SymbolTable::new(),
    records: Vec::with_capacity(32),
    data: Vec::new(),
    diagnostics: Vec::new(),
    error_count: 0,
    pending_label: None,
    key: None,
    signature: 0,
    noperands: 0,
    operands: Vec::new(),
    positive: true,
  };

  // Process one token per iteration. Lexer error tokens enter the error
  // state directly; everything else goes to the state handlers.
  loop {
    let t = lexer.get_token();
    if t.kind() == TokenKind::Eof {
      break;
    }
    if t.kind() == TokenKind::Error {
      p.report(t.text().to_string());
      continue;
    }

    let is_newline = t.kind() == TokenKind::Newline;
    let consumed = match p.state {
      State::Error          => p.do_error(&t),
      State::BetweenLines   => p.do_between_lines(&t),
      State::NeedKey        => p.do_need_key(&t),
      State::NeedExpression => p.do_need_expression(&t),
      State::NeedNewline    => p.do_need_newline(&t),
    };
    if !consumed {
      lexer.unget(t);
      continue;
    }
    if is_newline {
      p.src_line += 1;
    }
  }

  // A trailing newline triggers line processing, so any source file that
  // ends mid-line is guaranteed to have problems.
  if p.state != State::BetweenLines {
    p.report("unexpected EOF".to_string());
  }

  Parse {
    records: p.records,
    data: p.data,
    symbols: p.symbols,
    diagnostics: p.diagnostics,
    error_count: p.error_count,
  }
}

impl Parser {
  // region State handlers

  // In error state: ignore everything until newline.
  fn do_error(&mut self, t: &Token) -> bool {
    if t.kind() == TokenKind::Newline {
      self.reset_line();
      self.state = State::BetweenLines;
    }
    true
  }

  // Line start. Handle labels, hold them until the key is known so that a
  // label on a data directive can bind to the data location counter.
  fn do_between_lines(&mut self, t: &Token) -> bool {
    match t.kind() {
      TokenKind::Newline => true,
      TokenKind::Label => {
        self.pending_label = Some(t.text().to_string());
        self.state = State::NeedKey;
        true
      }
      TokenKind::Symbol => {
        self.state = State::NeedKey;
        false // unget; NeedKey sees the same token
      }
      _ => {
        self.report(format!("unexpected: {}", t));
        true
      }
    }
  }

  // Have a label if any; need a key symbol (or a bare labeled line).
  fn do_need_key(&mut self, t: &Token) -> bool {
    match t.kind() {
      TokenKind::Symbol => {
        let key = match Key::from_name(t.text()) {
          Some(key) => key,
          None => {
            self.report(format!("not an opcode: {}", t.text()));
            return true;
          }
        };
        self.define_pending_label(key);
        self.key = Some(key);
        self.signature = key.signature();
        self.noperands = num_operands(self.signature);
        self.operands.clear();
        self.positive = true;
        self.state = if self.noperands > 0 { State::NeedExpression } else { State::NeedNewline };
        true
      }
      TokenKind::Newline => {
        // A label alone on its line binds to the code location counter.
        if let Some(name) = self.pending_label.take() {
          self.define_label(&name, self.records.len() as Word);
        }
        self.state = State::BetweenLines;
        true
      }
      _ => {
        self.report(format!("unexpected: {}", t));
        true
      }
    }
  }

  // Our somewhat silly expression parser: numbers and symbols are values,
  // and an expression is zero or more minus signs followed by a value.
  fn do_need_expression(&mut self, t: &Token) -> bool {
    let want = element(self.signature, self.operands.len());
    match t.kind() {
      TokenKind::Operator if t.text() == "-" => {
        self.positive = !self.positive;
        return true;
      }
      TokenKind::Symbol if want == Element::Sym => {
        if !self.positive {
          self.report(format!("unexpected: - before {}", t.text()));
          return true;
        }
        self.operands.push(Collected::Name(t.text().to_string()));
      }
      TokenKind::Symbol => {
        let index = match self.symbols.use_symbol(t.text()) {
          Ok(index) => index,
          Err(e) => {
            self.report(e.to_string());
            return true;
          }
        };
        let negated = !self.positive;
        self.operands.push(Collected::Expr(Either::Left(SymRef { index, negated })));
      }
      TokenKind::Number => {
        let value = match parse_number(t.text()) {
          Some(v) => v,
          None => {
            self.report(format!("number out of range: {}", t.text()));
            return true;
          }
        };
        let value = if self.positive { value } else { value.wrapping_neg() };
        self.operands.push(Collected::Expr(Either::Right(value)));
      }
      TokenKind::Str if want == Element::Str => {
        let text = t.text();
        self.operands.push(Collected::Bytes(text[1..text.len() - 1].as_bytes().to_vec()));
      }
      TokenKind::Newline => {
        self.report("unexpected end of line".to_string());
        self.reset_line();
        self.state = State::BetweenLines;
        return true;
      }
      _ => {
        self.report(format!("unexpected: {}", t));
        return true;
      }
    }

    // An operand was collected.
    self.positive = true;
    if self.operands.len() == self.noperands {
      self.state = State::NeedNewline;
    }
    true
  }

  fn do_need_newline(&mut self, t: &Token) -> bool {
    if t.kind() != TokenKind::Newline {
      self.report(format!("unexpected at end of line: {}", t.text()));
      return true;
    }
    let key = self.key.take().unwrap();
    let operands = std::mem::take(&mut self.operands);
    self.emit_line(key, operands);
    self.reset_line();
    self.state = State::BetweenLines;
    true
  }

  // endregion

  // region Emission

  /// Turn a completed line into records (or symbol/data effects).
  fn emit_line(&mut self, key: Key, operands: Vec<Collected>) {
    match key {
      Key::Op(op) => {
        let parts = self.expr_parts(&operands);
        let xform = if op == Mnemonic::Beq { ImmXform::BranchRel } else { ImmXform::Direct };
        self.push_insn(op, parts, xform);
      }

      Key::Alias(alias) => self.emit_alias(alias, operands),

      Key::Pseudo(pseudo) => self.emit_pseudo(pseudo, operands),
    }
  }

  fn emit_alias(&mut self, alias: Alias, operands: Vec<Collected>) {
    let parts = self.expr_parts(&operands);
    match alias {
      Alias::Ldi => {
        let (rt, value) = (parts[0], parts[1]);
        // A small literal fits the low-immediate form; a symbol target
        // cannot be sized at parse time and always gets the pair.
        if let Either::Right(v) = value {
          if v <= 0x3F {
            self.push_insn(Mnemonic::Adi, [rt, ZERO, value], ImmXform::Direct);
            return;
          }
        }
        self.push_insn(Mnemonic::Lui, [rt, value, ZERO], ImmXform::Upper10);
        self.push_insn(Mnemonic::Adi, [rt, rt, value], ImmXform::Lower6);
      }
      Alias::Jmp | Alias::Jsr => {
        let (rb, target) = (parts[0], parts[1]);
        let j = if alias == Alias::Jsr { 1 } else { 2 };
        self.push_insn(Mnemonic::Lui, [rb, target, ZERO], ImmXform::Upper10);
        self.push_insn(Mnemonic::Jlr, [Either::Right(j), rb, target], ImmXform::Lower6);
      }
      Alias::Lli => {
        let (rt, value) = (parts[0], parts[1]);
        self.push_insn(Mnemonic::Adi, [rt, ZERO, value], ImmXform::Direct);
      }
      Alias::Sys => {
        self.push_insn(Mnemonic::Jlr, [ZERO, ZERO, parts[0]], ImmXform::Direct);
      }
      Alias::Nop => {
        self.push_insn(Mnemonic::Neg, [ZERO, ZERO, ZERO], ImmXform::Direct);
      }
    }
  }

  fn emit_pseudo(&mut self, pseudo: Pseudo, operands: Vec<Collected>) {
    match pseudo {
      Pseudo::Set => {
        let name = match &operands[0] {
          Collected::Name(name) => name.clone(),
          _ => {
            self.report("expected a symbol".to_string());
            return;
          }
        };
        let value = match self.resolve_now(&operands[1]) {
          Some(v) => v,
          None => return,
        };
        self.define_symbol(&name, value);
      }
      Pseudo::Space => {
        // The count changes the location counter, so it must be known now.
        let n = match &operands[0] {
          Collected::Expr(Either::Right(v)) => *v,
          _ => {
            self.report(".space needs a literal count".to_string());
            return;
          }
        };
        let line = self.src_line;
        for _ in 0..n {
          self.records.push(Record::Fill { value: ZERO, line });
        }
      }
      Pseudo::Fill | Pseudo::DataWord => {
        let value = match &operands[0] {
          Collected::Expr(operand) => *operand,
          _ => {
            self.report("expected a value".to_string());
            return;
          }
        };
        self.records.push(Record::Fill { value, line: self.src_line });
      }
      Pseudo::DataByte => {
        let value = match &operands[0] {
          Collected::Expr(operand) => *operand,
          _ => {
            self.report("expected a value".to_string());
            return;
          }
        };
        self.data.push((value, self.src_line));
      }
      Pseudo::DataString => {
        let bytes = match &operands[0] {
          Collected::Bytes(bytes) => bytes.clone(),
          _ => {
            self.report("expected a string".to_string());
            return;
          }
        };
        let line = self.src_line;
        for b in bytes {
          self.data.push((Either::Right(b as Word), line));
        }
      }
    }
  }

  fn push_insn(&mut self, op: Mnemonic, parts: [Operand; 3], xform: ImmXform) {
    self.records.push(Record::Insn { op, parts, xform, line: self.src_line });
  }

  /// The expression operands of a line, padded with zeros to three parts.
  /// Non-expression operands (misused `.set`/`.string` forms) have already
  /// been reported; they pack as zero so one error doesn't cascade.
  fn expr_parts(&self, operands: &[Collected]) -> [Operand; 3] {
    let mut parts = [ZERO; 3];
    for (i, collected) in operands.iter().enumerate().take(3) {
      if let Collected::Expr(operand) = collected {
        parts[i] = *operand;
      }
    }
    parts
  }

  /// Resolve an operand immediately, for `.set`. Forward references are
  /// not allowed here: the value affects the symbol table itself.
  fn resolve_now(&mut self, collected: &Collected) -> Option<Word> {
    match collected {
      Collected::Expr(Either::Right(v)) => Some(*v),
      Collected::Expr(Either::Left(symref)) => {
        match self.symbols.value_of(symref.index) {
          Some(v) => Some(if symref.negated { v.wrapping_neg() } else { v }),
          None => {
            let name = self.symbols.name_of(symref.index).to_string();
            self.report(format!("undefined: {}", name));
            None
          }
        }
      }
      _ => {
        self.report("expected a value".to_string());
        None
      }
    }
  }

  // endregion

  // region Bookkeeping

  fn define_pending_label(&mut self, key: Key) {
    if let Some(name) = self.pending_label.take() {
      let dot = match key {
        Key::Pseudo(Pseudo::DataByte) | Key::Pseudo(Pseudo::DataString) => self.data.len(),
        _ => self.records.len(),
      };
      self.define_label(&name, dot as Word);
    }
  }

  fn define_label(&mut self, name: &str, value: Word) {
    self.define_symbol(name, value);
  }

  fn define_symbol(&mut self, name: &str, value: Word) {
    if let Err(e) = self.symbols.define(name, value) {
      self.report(e.to_string());
    }
  }

  fn reset_line(&mut self) {
    self.pending_label = None;
    self.key = None;
    self.signature = 0;
    self.noperands = 0;
    self.operands.clear();
    self.positive = true;
  }

  /// Print-to-collect an error, count it, and enter the error state.
  fn report(&mut self, msg: String) {
    self.diagnostics.push(format!("{}, line {}: {}", self.src_path, self.src_line, msg));
    self.error_count += 1;
    self.state = State::Error;
  }

  // endregion
}

fn parse_number(text: &str) -> Option<Word> {
  let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
    u32::from_str_radix(hex, 16).ok()?
  } else {
    text.parse::<u32>().ok()?
  };
  if value > 0xFFFF {
    return None;
  }
  Some(value as Word)
}
