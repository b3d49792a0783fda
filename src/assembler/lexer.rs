/*!
  The tokenizer for assembler source. The language is all ASCII - no
  exceptions, not even in quoted strings. White space includes only space,
  tab, and newline. Newline is returned as a separate token so that the
  grammar can be line-oriented.

  Tokens are:

  1. Symbols: unquoted restricted character strings. The first character
     must be an initial symbol character (letter, `_`, or `.`, where a
     leading dot denotes a builtin) and the rest must be symbol characters
     (letters, digits, `_`). A symbol immediately followed by a colon is
     returned as a Label token instead.

  2. Single-character operator tokens: `-` and `:`. Commas occurring
     between tokens are simply whitespace, so `foo,bar` is accepted as is
     `foo, bar` and `foo bar`.

  3. Quoted strings, surrounded by double quotes. There is no escape
     convention and newlines are never allowed in strings.

  4. Numbers: decimal, or hex with a leading `0x` or `0X`. While scanning
     a number we accumulate any digit, hex letter, or x and validate the
     result afterwards, so garbage like `0xxx10` is a single error token
     rather than several surprising ones.

  EOF is not equivalent to whitespace: a token is not recognized if it is
  terminated by end of file without a newline. When the lexer encounters an
  error it returns an error token and throws away characters until it sees
  a newline, counting on the parser to resynchronize.
*/

use std::fmt::{Display, Formatter};
use std::fs;
use std::io;

use strum_macros::Display as StrumDisplay;

const COMMENT: u8 = b'#';
const COMMA: u8 = b',';
const COLON: u8 = b':';
const NEG: u8 = b'-';

#[derive(StrumDisplay, Clone, Copy, Eq, PartialEq, Debug, Hash)]
pub enum TokenKind {
  Error,
  Newline,
  Symbol,
  Label,
  Str,
  Number,
  Operator,
  Eof,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Token {
  text: String,
  kind: TokenKind,
}

impl Token {
  fn new(kind: TokenKind, text: impl Into<String>) -> Token {
    Token { text: text.into(), kind }
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  pub fn kind(&self) -> TokenKind {
    self.kind
  }
}

impl Display for Token {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let text = match self.text.as_str() {
      "\n" => "\\n",
      t => t,
    };
    write!(f, "{{{} {}}}", self.kind, text)
  }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum State {
  Between,
  InError,
  InSymbol,
  InString,
  InNumber,
  InComment,
  End,
}

/// A lexer over a fully buffered source. Supports unreading one byte (by
/// backing up the cursor) and one token of pushback for the parser.
pub struct Lexer {
  data: Vec<u8>,
  pos: usize,
  state: State,
  pushback: Option<Token>,
}

impl Lexer {
  pub fn from_file(path: &str) -> io::Result<Lexer> {
    Ok(Lexer::from_bytes(fs::read(path)?))
  }

  pub fn from_text(body: &str) -> Lexer {
    Lexer::from_bytes(body.as_bytes().to_vec())
  }

  fn from_bytes(data: Vec<u8>) -> Lexer {
    Lexer { data, pos: 0, state: State::Between, pushback: None }
  }

  /// Unget a token, allowing one token of look ahead. Ungetting twice, or
  /// in mid-token, is a bug in the caller.
  pub fn unget(&mut self, tk: Token) {
    assert!(self.pushback.is_none(), "too many token pushbacks");
    assert!(self.state == State::Between || self.state == State::End,
            "invalid token pushback");
    self.pushback = Some(tk);
  }

  fn read_byte(&mut self) -> Option<u8> {
    let b = self.data.get(self.pos).copied();
    if b.is_some() {
      self.pos += 1;
    }
    b
  }

  fn unread_byte(&mut self) {
    self.pos -= 1;
  }

  /// Returns the next token, or an EOF or error token.
  pub fn get_token(&mut self) -> Token {
    if let Some(tk) = self.pushback.take() {
      return tk;
    }
    if self.state == State::End {
      return Token::new(TokenKind::Eof, "EOF");
    }

    let mut accumulator: Vec<u8> = Vec::new();

    loop {
      let b = match self.read_byte() {
        Some(b) => b,
        None => {
          // EOF discards any accumulated partial token; a source file
          // that ends mid-line is guaranteed to have problems, which the
          // parser reports.
          self.state = State::End;
          return Token::new(TokenKind::Eof, "EOF");
        }
      };
      if b >= 0x80 {
        self.state = State::InError;
        return Token::new(TokenKind::Error, format!("non-ASCII character 0x{:02x}", b));
      }

      match self.state {
        State::InError | State::InComment => {
          if b == b'\n' {
            self.state = State::Between;
            return Token::new(TokenKind::Newline, "\n");
          }
        }

        State::Between => {
          if b == b'\n' {
            // Still between, but returned as a distinct token so that the
            // caller may implement a line-oriented higher level syntax.
            return Token::new(TokenKind::Newline, "\n");
          }
          if b == COMMENT {
            self.state = State::InComment;
          } else if is_white_space(b) {
            // move along, nothing to see here
          } else if b.is_ascii_digit() {
            accumulator.push(b);
            self.state = State::InNumber;
          } else if is_initial_symbol_char(b) {
            accumulator.push(b);
            self.state = State::InSymbol;
          } else if b == b'"' {
            // the quotes are not captured in the result
            self.state = State::InString;
          } else if is_operator_char(b) {
            // Commas occurring between tokens are just white space. The
            // state stays Between, so sequences like 7:4 work without any
            // actual white space around the colon.
            if b != COMMA {
              return Token::new(TokenKind::Operator, (b as char).to_string());
            }
          } else {
            self.state = State::InError;
            return Token::new(
              TokenKind::Error,
              format!("character 0x{:02x} ({}) unexpected [1]", b, b),
            );
          }
        }

        State::InSymbol => {
          if is_white_space(b) || is_operator_char(b) {
            self.state = State::Between;
            let text = String::from_utf8(accumulator).unwrap();
            if b == COLON {
              // Label definition, e.g. "myLabel:". The colon is consumed
              // and no white space need follow it.
              return Token::new(TokenKind::Label, text);
            }
            // Even white space must be pushed back, because it might be a
            // newline, which is returned as a separate token.
            self.unread_byte();
            return Token::new(TokenKind::Symbol, text);
          } else if is_symbol_char(b) {
            accumulator.push(b);
          } else {
            self.state = State::InError;
            return Token::new(
              TokenKind::Error,
              format!("character 0x{:02x} ({}) unexpected [2]", b, b),
            );
          }
        }

        State::InString => {
          if b == b'"' {
            self.state = State::Between;
            let text = format!("\"{}\"", String::from_utf8(accumulator).unwrap());
            return Token::new(TokenKind::Str, text);
          } else if b == b'\n' {
            // There is no escape convention.
            self.state = State::InError;
            return Token::new(TokenKind::Error, "newline in string");
          } else {
            accumulator.push(b);
          }
        }

        State::InNumber => {
          if b.is_ascii_digit() || is_hex_letter(b) || is_x(b) {
            accumulator.push(b);
          } else if is_white_space(b) || is_operator_char(b) {
            self.unread_byte();
            let text = String::from_utf8(accumulator).unwrap();
            return if valid_number(text.as_bytes()) {
              self.state = State::Between;
              Token::new(TokenKind::Number, text)
            } else {
              self.state = State::InError;
              Token::new(TokenKind::Error, format!("invalid number {}", text))
            };
          } else {
            self.state = State::InError;
            return Token::new(
              TokenKind::Error,
              format!("character 0x{:02x} ({}) unexpected in number", b, b),
            );
          }
        }

        State::End => unreachable!(),
      }
    }
  }
}

fn valid_number(num: &[u8]) -> bool {
  let mut is_hex = false;
  let mut digits = &num[..];
  if num.len() > 2 && num[0] == b'0' && is_x(num[1]) {
    is_hex = true;
    digits = &num[2..];
  }
  digits.iter().all(|&b| b.is_ascii_digit() || (is_hex && is_hex_letter(b)))
}

fn is_white_space(b: u8) -> bool {
  b == b' ' || b == b'\t' || b == b'\n'
}

fn is_hex_letter(b: u8) -> bool {
  matches!(b, b'A'..=b'F' | b'a'..=b'f')
}

fn is_x(b: u8) -> bool {
  b == b'x' || b == b'X'
}

fn is_operator_char(b: u8) -> bool {
  b == COMMA || b == COLON || b == NEG
}

// Dot is allowed only as the initial character of a symbol, where it
// means "builtin".
fn is_initial_symbol_char(b: u8) -> bool {
  b.is_ascii_alphabetic() || b == b'.' || b == b'_'
}

fn is_symbol_char(b: u8) -> bool {
  b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds_and_texts(body: &str) -> Vec<(TokenKind, String)> {
    let mut lx = Lexer::from_text(body);
    let mut out = Vec::new();
    loop {
      let tk = lx.get_token();
      let kind = tk.kind();
      out.push((kind, tk.text().to_string()));
      if kind == TokenKind::Eof {
        return out;
      }
    }
  }

  #[test]
  fn builtin_symbol() {
    let mut lx = Lexer::from_text(".symbol\n");
    let tk = lx.get_token();
    assert_eq!(tk.kind(), TokenKind::Symbol);
    assert_eq!(tk.text(), ".symbol");
  }

  #[test]
  fn quote_inside_symbol_is_an_error() {
    let mut lx = Lexer::from_text(".sym\"bol\n");
    let tk = lx.get_token();
    assert_eq!(tk.kind(), TokenKind::Error);
    assert_eq!(tk.text(), "character 0x22 (34) unexpected [2]");
    // Recovery eats to the newline.
    assert_eq!(lx.get_token().kind(), TokenKind::Newline);
  }

  #[test]
  fn symbol_then_string() {
    let mut lx = Lexer::from_text(".aSymbol \"and a string\"\n");
    let tk = lx.get_token();
    assert_eq!(tk.kind(), TokenKind::Symbol);
    assert_eq!(tk.text(), ".aSymbol");
    let tk = lx.get_token();
    assert_eq!(tk.kind(), TokenKind::Str);
    assert_eq!(tk.text(), "\"and a string\"");
  }

  #[test]
  fn comment_swallows_line() {
    let mut lx = Lexer::from_text("# .symbol\n");
    assert_eq!(lx.get_token().kind(), TokenKind::Newline);
  }

  #[test]
  fn numbers() {
    let tks = kinds_and_texts("10\n0x10\n0X3F\n");
    let numbers: Vec<&str> = tks
      .iter()
      .filter(|(k, _)| *k == TokenKind::Number)
      .map(|(_, t)| t.as_str())
      .collect();
    assert_eq!(numbers, vec!["10", "0x10", "0X3F"]);
  }

  #[test]
  fn garbage_numbers() {
    for body in ["1x0\n", "0xxxx10\n", "3F\n"] {
      let mut lx = Lexer::from_text(body);
      assert_eq!(lx.get_token().kind(), TokenKind::Error, "{}", body);
      assert_eq!(lx.get_token().kind(), TokenKind::Newline);
    }
  }

  #[test]
  fn newline_in_string() {
    let mut lx = Lexer::from_text("\"oops\nmore\"\n");
    let tk = lx.get_token();
    assert_eq!(tk.kind(), TokenKind::Error);
    assert_eq!(tk.text(), "newline in string");
  }

  #[test]
  fn non_ascii_is_an_error() {
    let mut lx = Lexer::from_bytes(vec![b'a', 0xC3, 0xA9, b'\n']);
    assert_eq!(lx.get_token().kind(), TokenKind::Error);
  }

  #[test]
  fn commas_are_white_space() {
    let tks = kinds_and_texts("adi r1, r2, 7\n");
    let texts: Vec<&str> = tks[..5].iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(texts, vec!["adi", "r1", "r2", "7", "\n"]);
  }

  #[test]
  fn label_and_negation() {
    let tks = kinds_and_texts("loop: beq r0, r0, -1\n");
    assert_eq!(tks[0], (TokenKind::Label, "loop".to_string()));
    assert_eq!(tks[1], (TokenKind::Symbol, "beq".to_string()));
    assert_eq!(tks[4], (TokenKind::Operator, "-".to_string()));
    assert_eq!(tks[5], (TokenKind::Number, "1".to_string()));
  }

  #[test]
  fn label_without_space_before_key() {
    let tks = kinds_and_texts("top:hlt\n");
    assert_eq!(tks[0], (TokenKind::Label, "top".to_string()));
    assert_eq!(tks[1], (TokenKind::Symbol, "hlt".to_string()));
  }

  #[test]
  fn eof_discards_partial_token() {
    // No trailing newline: the dangling symbol is not recognized.
    let mut lx = Lexer::from_text("hlt");
    assert_eq!(lx.get_token().kind(), TokenKind::Eof);
  }

  #[test]
  fn unget_round_trip() {
    let mut lx = Lexer::from_text("adi r1\n");
    let tk = lx.get_token();
    assert_eq!(tk.text(), "adi");
    lx.unget(tk);
    assert_eq!(lx.get_token().text(), "adi");
    assert_eq!(lx.get_token().text(), "r1");
  }
}
