use super::error::CompileError;
use super::token::{OpSym, Position, Token, TokenKind};
use std::{collections::HashSet, sync::Arc};

/// Characters that glue together into a single operator symbol
const OPERATOR_CHARS: &[u8] = b"+-*/%!&|=<>";

pub struct Lexer<'a> {
    program: &'a str,
    file: Arc<str>,
    cursor: usize,
    token_start: usize,
    line: usize,
    line_start: usize,
}

type LResult = Result<TokenKind, CompileError>;

fn is_word_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.'
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\r' | b'\n' | b'\x0C')
}

impl<'a> Lexer<'a> {
    pub fn new(program: &'a str, file: &str) -> Self {
        Lexer {
            program,
            file: Arc::from(file),
            cursor: 0,
            token_start: 0,
            line: 1,
            line_start: 0,
        }
    }

    /// Scan the whole source. The last token is always `Eof`.
    ///
    /// A word declared as a label (`Sub:`) names that label everywhere in the
    /// program, even when it is spelled like an opcode. Opcodes match in any
    /// case, so `sub` is still the opcode next to a `Sub` label.
    pub fn scan_program(mut self) -> Result<Vec<Token>, CompileError> {
        let program = self.program;
        let mut tokens = Vec::new();
        // Spelling of every opcode token
        let mut words = Vec::new();

        loop {
            let token = self.scan_token()?;
            words.push(match token.kind {
                TokenKind::Opcode(_) => Some(&program[self.token_start..self.cursor]),
                _ => None,
            });

            let finished = token.kind == TokenKind::Eof;
            tokens.push(token);
            if finished {
                break;
            }
        }

        let labels: HashSet<&str> = tokens
            .windows(2)
            .zip(&words)
            .filter_map(|(pair, word)| match pair[1].kind {
                TokenKind::Colon => *word,
                _ => None,
            })
            .collect();

        for (token, word) in tokens.iter_mut().zip(&words) {
            if let Some(word) = word.filter(|word| labels.contains(word)) {
                token.kind = TokenKind::Identifier(word.to_string());
            }
        }
        Ok(tokens)
    }

    /// Get the next token. This consumes the token.
    pub fn scan_token(&mut self) -> Result<Token, CompileError> {
        self.trim();

        let pos = self.position();
        self.token_start = self.cursor;
        let kind = match self.next_char(true) {
            None => TokenKind::Eof,
            Some(b'"') => self.read_str_literal(&pos)?,
            Some(b':') => {
                self.cursor += 1;
                TokenKind::Colon
            }
            Some(b'-') => match self.char_at(1) {
                Some(ch) if ch.is_ascii_digit() => self.read_number(&pos)?,
                Some(ch) if !is_whitespace(ch) => {
                    return Err(CompileError::new(
                        &pos,
                        "'-' must be followed by a digit or whitespace",
                    ))
                }
                _ => {
                    self.cursor += 1;
                    TokenKind::OpSym(OpSym::Sub)
                }
            },
            Some(ch) if ch.is_ascii_digit() => self.read_number(&pos)?,
            Some(ch) if OPERATOR_CHARS.contains(&ch) => self.read_operator(&pos)?,
            Some(ch) if is_word_char(ch) => self.read_word(),
            Some(_) => {
                let ch = self.program[self.cursor..].chars().next().unwrap_or('?');
                return Err(CompileError::new(
                    &pos,
                    format!("unexpected character '{}'", ch),
                ));
            }
        };

        Ok(Token::new(kind, pos))
    }

    /// Skip whitespace and comments, counting newlines
    fn trim(&mut self) {
        while let Some(ch) = self.next_char(true) {
            if ch == b'#' {
                while let Some(ch) = self.next_char(true) {
                    if ch == b'\n' {
                        break;
                    }
                    self.cursor += 1;
                }
                continue;
            }
            if !is_whitespace(ch) {
                break;
            }
            self.cursor += 1;
            if ch == b'\n' {
                self.line += 1;
                self.line_start = self.cursor;
            }
        }
    }

    /// Read a decimal number with an optional sign and at most one point
    fn read_number(&mut self, pos: &Position) -> LResult {
        let start_pos = self.cursor;
        let mut point = false;

        self.cursor += 1;
        while let Some(ch) = self.next_char(true) {
            if ch == b'.' && !point {
                point = true;
            } else if !ch.is_ascii_digit() {
                break;
            }
            self.cursor += 1;
        }

        let numeral = &self.program[start_pos..self.cursor];
        let malformed = || CompileError::new(pos, format!("malformed number '{}'", numeral));

        // Glued to a name or a second point: `12ab`, `1.2.3`
        if self.next_char(true).map_or(false, is_word_char) {
            return Err(malformed());
        }

        if point {
            numeral
                .parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| malformed())
        } else {
            // Too long for an integer, still a number
            numeral
                .parse::<i64>()
                .map(TokenKind::Integer)
                .or_else(|_| numeral.parse::<f64>().map(TokenKind::Float))
                .map_err(|_| malformed())
        }
    }

    /// Read a string literal delimited by '"'. A backslash keeps the next
    /// character from ending the string but is not otherwise interpreted.
    fn read_str_literal(&mut self, pos: &Position) -> LResult {
        self.cursor += 1;
        let start_pos = self.cursor;

        loop {
            match self.next_char(false) {
                // Strings cannot continue from next line
                None | Some(b'\n') => {
                    return Err(CompileError::new(pos, "string literal is not terminated"))
                }
                Some(b'\\') => {
                    if self.next_char(false).is_none() {
                        return Err(CompileError::new(pos, "string literal is not terminated"));
                    }
                }
                Some(b'"') => break,
                Some(_) => {}
            }
        }

        let str_lit = &self.program[start_pos..self.cursor - 1];
        Ok(TokenKind::Str(str_lit.to_string()))
    }

    /// Read the longest run of operator characters. It has to name a known symbol.
    fn read_operator(&mut self, pos: &Position) -> LResult {
        let start_pos = self.cursor;
        while let Some(ch) = self.next_char(true) {
            if !OPERATOR_CHARS.contains(&ch) {
                break;
            }
            self.cursor += 1;
        }

        let sym = &self.program[start_pos..self.cursor];
        if sym == "=" {
            return Ok(TokenKind::Assign);
        }

        OpSym::new(sym)
            .map(TokenKind::OpSym)
            .ok_or_else(|| CompileError::new(pos, format!("unknown operator '{}'", sym)))
    }

    /// Read an opcode or a (possibly dotted) identifier
    fn read_word(&mut self) -> TokenKind {
        let start_pos = self.cursor;
        while let Some(ch) = self.next_char(true) {
            if !is_word_char(ch) {
                break;
            }
            self.cursor += 1;
        }

        TokenKind::word(&self.program[start_pos..self.cursor])
    }

    fn position(&self) -> Position {
        Position {
            file: self.file.clone(),
            line: self.line,
            column: self.cursor - self.line_start + 1,
        }
    }

    fn char_at(&self, offset: usize) -> Option<u8> {
        self.program.as_bytes().get(self.cursor + offset).copied()
    }

    /// Get the next char and increase the cursor if `peek` is false
    fn next_char(&mut self, peek: bool) -> Option<u8> {
        let ch = self.char_at(0)?;
        if !peek {
            self.cursor += 1;
        }
        Some(ch)
    }
}
