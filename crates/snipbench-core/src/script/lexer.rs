//! Tokenizer for the snippet language.

use std::rc::Rc;

use super::error::ScriptError;

/// Token payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Num(f64),
    Str(Rc<str>),
    Template(Vec<TemplatePart>),
    /// Identifiers and keywords alike; the parser tells them apart.
    Ident(Rc<str>),
    Punct(&'static str),
    Eof,
}

/// Piece of a template literal.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(Rc<str>),
    /// Raw source of a `${...}` substitution and where it starts.
    Expr {
        source: String,
        line: usize,
        column: usize,
    },
}

/// A token with its position.
#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
    /// A line terminator precedes this token (drives semicolon insertion).
    pub newline_before: bool,
}

// Longest first.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", ">>>", "<<=", ">>=", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-",
    "*", "/", "%", "&", "|", "^", "!", "~", "?", ":", "=", ".",
];

/// Tokenize a complete source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ScriptError> {
    tokenize_at(source, 1, 1)
}

/// Tokenize a fragment that starts at the given position of a larger source.
pub fn tokenize_at(source: &str, line: usize, column: usize) -> Result<Vec<Token>, ScriptError> {
    Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line,
        column,
    }
    .run()
}

pub fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

pub fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn run(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut tokens = Vec::new();
        let mut newline_before = false;

        loop {
            newline_before |= self.skip_trivia()?;
            let (line, column) = (self.line, self.column);

            let Some(c) = self.peek() else {
                tokens.push(Token {
                    tok: Tok::Eof,
                    line,
                    column,
                    newline_before,
                });
                return Ok(tokens);
            };

            let tok = if c.is_ascii_digit()
                || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string(c)?
            } else if c == '`' {
                self.template()?
            } else if is_ident_start(c) {
                self.ident()
            } else {
                self.punct()?
            };

            tokens.push(Token {
                tok,
                line,
                column,
                newline_before,
            });
            newline_before = false;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message, self.line, self.column)
    }

    /// Skip whitespace and comments, reporting whether a line break was crossed.
    fn skip_trivia(&mut self) -> Result<bool, ScriptError> {
        let mut newline = false;
        loop {
            match self.peek() {
                Some('\n') => {
                    newline = true;
                    self.bump();
                }
                Some(c) if c.is_whitespace() || c == '\u{feff}' => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            None => return Err(self.error("Unterminated comment")),
                            Some('\n') => newline = true,
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                        }
                    }
                }
                _ => return Ok(newline),
            }
        }
    }

    fn number(&mut self) -> Result<Tok, ScriptError> {
        if self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x' | 'X' | 'b' | 'B' | 'o' | 'O'))
        {
            self.bump();
            let radix = match self.bump() {
                Some('x' | 'X') => 16,
                Some('b' | 'B') => 2,
                _ => 8,
            };
            let mut value = 0.0f64;
            let mut any = false;
            while let Some(c) = self.peek() {
                if c == '_' {
                    self.bump();
                    continue;
                }
                match c.to_digit(radix) {
                    Some(d) => {
                        value = value * radix as f64 + d as f64;
                        any = true;
                        self.bump();
                    }
                    None => break,
                }
            }
            if !any {
                return Err(self.error("Invalid or unexpected token"));
            }
            return self.finish_number(value);
        }

        let mut text = String::new();
        self.decimal_digits(&mut text);

        if self.peek() == Some('.') {
            let next = self.peek_at(1);
            if next.is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
                text.push('.');
                self.decimal_digits(&mut text);
            } else if !next.is_some_and(|c| is_ident_start(c) || c == '.') {
                self.bump();
            }
        }

        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                text.push('e');
                self.bump();
                if sign {
                    if let Some(s) = self.bump() {
                        text.push(s);
                    }
                }
                self.decimal_digits(&mut text);
            }
        }

        let value = text
            .parse::<f64>()
            .map_err(|_| self.error("Invalid or unexpected token"))?;
        self.finish_number(value)
    }

    fn finish_number(&self, value: f64) -> Result<Tok, ScriptError> {
        match self.peek() {
            Some('n') => Err(self.error("BigInt literals are not supported")),
            Some(c) if is_ident_start(c) => Err(self.error("Invalid or unexpected token")),
            _ => Ok(Tok::Num(value)),
        }
    }

    fn decimal_digits(&mut self, out: &mut String) {
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                out.push(c);
                self.bump();
            } else if c == '_' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn string(&mut self, quote: char) -> Result<Tok, ScriptError> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(self.error("Invalid or unexpected token")),
                Some(c) if c == quote => break,
                Some('\\') => self.escape(&mut out)?,
                Some(c) => out.push(c),
            }
        }
        Ok(Tok::Str(out.into()))
    }

    fn escape(&mut self, out: &mut String) -> Result<(), ScriptError> {
        match self.bump() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('0') => out.push('\0'),
            Some('x') => {
                let code = self.hex_digits(2)?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            Some('u') => {
                let code = if self.peek() == Some('{') {
                    self.bump();
                    let mut code = 0u32;
                    loop {
                        match self.bump() {
                            Some('}') => break,
                            Some(c) => match c.to_digit(16) {
                                Some(d) => code = code.saturating_mul(16).saturating_add(d),
                                None => return Err(self.error("Invalid Unicode escape sequence")),
                            },
                            None => return Err(self.error("Invalid Unicode escape sequence")),
                        }
                    }
                    code
                } else {
                    self.hex_digits(4)?
                };
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            Some('\r') => {
                if self.peek() == Some('\n') {
                    self.bump();
                }
            }
            Some('\n') => {}
            Some(c) => out.push(c),
            None => return Err(self.error("Invalid or unexpected token")),
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32, ScriptError> {
        let mut code = 0u32;
        for _ in 0..count {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("Invalid hexadecimal escape sequence"))?;
            code = code * 16 + digit;
        }
        Ok(code)
    }

    fn template(&mut self) -> Result<Tok, ScriptError> {
        self.bump();
        let mut parts = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("Unterminated template literal")),
                Some('`') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    self.escape(&mut text)?;
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    self.bump();
                    self.bump();
                    parts.push(TemplatePart::Text(std::mem::take(&mut text).into()));
                    let (line, column) = (self.line, self.column);
                    let source = self.template_substitution()?;
                    parts.push(TemplatePart::Expr {
                        source,
                        line,
                        column,
                    });
                }
                Some(c) => {
                    self.bump();
                    text.push(c);
                }
            }
        }
        parts.push(TemplatePart::Text(text.into()));
        Ok(Tok::Template(parts))
    }

    /// Collect the raw text of a `${...}` substitution, up to its closing brace.
    fn template_substitution(&mut self) -> Result<String, ScriptError> {
        let mut depth = 0usize;
        let mut source = String::new();
        let mut quote: Option<char> = None;
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.error("Unterminated template literal"))?;
            if let Some(q) = quote {
                source.push(c);
                if c == '\\' {
                    if let Some(escaped) = self.bump() {
                        source.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    source.push(c);
                }
                '{' => {
                    depth += 1;
                    source.push(c);
                }
                '}' if depth == 0 => return Ok(source),
                '}' => {
                    depth -= 1;
                    source.push(c);
                }
                _ => source.push(c),
            }
        }
    }

    fn ident(&mut self) -> Tok {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_ident_part(c) {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Tok::Ident(name.into())
    }

    fn starts_with(&self, pattern: &str) -> bool {
        pattern
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn punct(&mut self) -> Result<Tok, ScriptError> {
        for &p in PUNCTUATORS {
            if !self.starts_with(p) {
                continue;
            }
            // `a?.5:b` is a conditional, not optional chaining.
            if p == "?." && self.peek_at(2).is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            for _ in 0..p.len() {
                self.bump();
            }
            return Ok(Tok::Punct(p));
        }

        let found = self.peek().unwrap_or(' ');
        Err(self.error(format!("Invalid or unexpected token '{}'", found)))
    }
}
