//! Tokenizer with Python-style indentation tracking.
//!
//! Produces a flat token stream where blocks are delimited by
//! [`TokenKind::Indent`] / [`TokenKind::Dedent`] and logical lines end in
//! [`TokenKind::Newline`]. Newlines inside brackets are ignored (implicit
//! line joining). Every token records the 1-based source line it starts on.

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    Lit(String),
    /// Source text of a `{...}` hole plus an optional format spec.
    Hole { source: String, spec: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    FStr(Vec<FStringPart>),
    Name(String),
    // keywords
    And,
    As,
    Break,
    Continue,
    Def,
    Elif,
    Else,
    False,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    None,
    Not,
    Or,
    Pass,
    Return,
    True,
    While,
    With,
    // punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

fn keyword(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "and" => TokenKind::And,
        "as" => TokenKind::As,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "def" => TokenKind::Def,
        "elif" => TokenKind::Elif,
        "else" => TokenKind::Else,
        "False" => TokenKind::False,
        "for" => TokenKind::For,
        "from" => TokenKind::From,
        "global" => TokenKind::Global,
        "if" => TokenKind::If,
        "import" => TokenKind::Import,
        "in" => TokenKind::In,
        "is" => TokenKind::Is,
        "None" => TokenKind::None,
        "not" => TokenKind::Not,
        "or" => TokenKind::Or,
        "pass" => TokenKind::Pass,
        "return" => TokenKind::Return,
        "True" => TokenKind::True,
        "while" => TokenKind::While,
        "with" => TokenKind::With,
        _ => return None,
    };
    Some(kind)
}

const TAB_WIDTH: usize = 8;

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    indents: Vec<usize>,
    depth: usize,
    tokens: Vec<Token>,
}

/// Tokenize a whole program.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    tokenize_from(source, 1)
}

/// Tokenize source whose first line is `first_line` (used for f-string holes).
pub fn tokenize_from(source: &str, first_line: u32) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        chars: source.chars().collect(),
        pos: 0,
        line: first_line,
        indents: vec![0],
        depth: 0,
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, line: u32) {
        self.tokens.push(Token { kind, line });
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.line, message)
    }

    fn last_is_layout(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent)
        )
    }

    fn run(&mut self) -> Result<(), ParseError> {
        let mut at_line_start = true;
        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                if self.handle_indentation()? {
                    at_line_start = true;
                    continue;
                }
            }
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        if !self.last_is_layout() {
                            self.push(TokenKind::Newline, self.line);
                        }
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                '0'..='9' => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                '"' | '\'' => {
                    let line = self.line;
                    let text = self.string_body(c)?;
                    self.push(TokenKind::Str(text), line);
                }
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => self.punct(c)?,
            }
        }
        if !self.last_is_layout() {
            self.push(TokenKind::Newline, self.line);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, self.line);
        }
        self.push(TokenKind::Eof, self.line);
        Ok(())
    }

    /// Measures leading whitespace of a logical line and emits layout
    /// tokens. Returns `true` when the line is blank or comment-only.
    fn handle_indentation(&mut self) -> Result<bool, ParseError> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }
        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, self.line);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(TokenKind::Dedent, self.line);
            }
            if self.indents.last() != Some(&width) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn number(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && self.peek_at(1).is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+')
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|&&c| c != '_')
            .collect();
        let kind = if is_float {
            TokenKind::Float(
                text.parse()
                    .map_err(|_| self.error(format!("invalid decimal literal '{text}'")))?,
            )
        } else {
            TokenKind::Int(
                text.parse()
                    .map_err(|_| self.error(format!("integer literal too large '{text}'")))?,
            )
        };
        self.push(kind, self.line);
        Ok(())
    }

    fn word(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        let quote = self.peek().filter(|q| *q == '"' || *q == '\'');
        if let Some(q) = quote {
            match word.as_str() {
                "f" | "F" => {
                    let line = self.line;
                    let body = self.string_body(q)?;
                    let parts = split_fstring(&body, line)?;
                    self.push(TokenKind::FStr(parts), line);
                    return Ok(());
                }
                "r" | "R" => {
                    let line = self.line;
                    let body = self.raw_string_body(q)?;
                    self.push(TokenKind::Str(body), line);
                    return Ok(());
                }
                _ => {}
            }
        }
        let kind = keyword(&word).unwrap_or(TokenKind::Name(word));
        self.push(kind, self.line);
        Ok(())
    }

    fn is_triple(&self, quote: char) -> bool {
        self.peek() == Some(quote) && self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote)
    }

    fn string_body(&mut self, quote: char) -> Result<String, ParseError> {
        let triple = self.is_triple(quote);
        self.pos += if triple { 3 } else { 1 };
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.is_triple(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(self.error("unterminated string literal"));
                }
                self.line += 1;
            }
            if c == '\\' {
                self.pos += 1;
                let Some(esc) = self.peek() else {
                    return Err(self.error("unterminated string literal"));
                };
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                self.pos += 1;
                continue;
            }
            out.push(c);
            self.pos += 1;
        }
    }

    fn raw_string_body(&mut self, quote: char) -> Result<String, ParseError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => return Err(self.error("unterminated string literal")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn punct(&mut self, c: char) -> Result<(), ParseError> {
        let next = self.peek_at(1);
        let (kind, len) = match (c, next) {
            ('*', Some('*')) => (TokenKind::StarStar, 2),
            ('/', Some('/')) => (TokenKind::SlashSlash, 2),
            ('=', Some('=')) => (TokenKind::EqEq, 2),
            ('!', Some('=')) => (TokenKind::NotEq, 2),
            ('<', Some('=')) => (TokenKind::LtEq, 2),
            ('>', Some('=')) => (TokenKind::GtEq, 2),
            ('+', Some('=')) => (TokenKind::PlusAssign, 2),
            ('-', Some('=')) => (TokenKind::MinusAssign, 2),
            ('*', Some('=')) => (TokenKind::StarAssign, 2),
            ('/', Some('=')) => (TokenKind::SlashAssign, 2),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('[', _) => (TokenKind::LBracket, 1),
            (']', _) => (TokenKind::RBracket, 1),
            ('{', _) => (TokenKind::LBrace, 1),
            ('}', _) => (TokenKind::RBrace, 1),
            (',', _) => (TokenKind::Comma, 1),
            (':', _) => (TokenKind::Colon, 1),
            ('.', _) => (TokenKind::Dot, 1),
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('%', _) => (TokenKind::Percent, 1),
            ('=', _) => (TokenKind::Assign, 1),
            ('<', _) => (TokenKind::Lt, 1),
            ('>', _) => (TokenKind::Gt, 1),
            _ => return Err(self.error(format!("invalid character '{c}'"))),
        };
        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => self.depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                self.depth = self.depth.saturating_sub(1);
            }
            _ => {}
        }
        self.push(kind, self.line);
        self.pos += len;
        Ok(())
    }
}

/// Splits an f-string body into literal runs and `{expr[:spec]}` holes.
fn split_fstring(body: &str, line: u32) -> Result<Vec<FStringPart>, ParseError> {
    let mut parts = Vec::new();
    let mut lit = String::new();
    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '{' && chars.get(i + 1) == Some(&'{') {
            lit.push('{');
            i += 2;
            continue;
        }
        if c == '}' && chars.get(i + 1) == Some(&'}') {
            lit.push('}');
            i += 2;
            continue;
        }
        if c != '{' {
            lit.push(c);
            i += 1;
            continue;
        }
        if !lit.is_empty() {
            parts.push(FStringPart::Lit(std::mem::take(&mut lit)));
        }
        let mut depth = 0usize;
        let mut quote: Option<char> = None;
        let mut source = String::new();
        let mut spec: Option<String> = None;
        i += 1;
        loop {
            let Some(&ch) = chars.get(i) else {
                return Err(ParseError::new(line, "f-string: expecting '}'"));
            };
            i += 1;
            if let Some(q) = quote {
                if ch == q {
                    quote = None;
                }
            } else if ch == '\'' || ch == '"' {
                quote = Some(ch);
            } else if ch == '(' || ch == '[' || ch == '{' {
                depth += 1;
            } else if ch == ')' || ch == ']' || (ch == '}' && depth > 0) {
                depth = depth.saturating_sub(1);
            } else if ch == '}' {
                break;
            } else if ch == ':' && depth == 0 && spec.is_none() {
                spec = Some(String::new());
                continue;
            }
            match spec.as_mut() {
                Some(spec) => spec.push(ch),
                None => source.push(ch),
            }
        }
        if source.trim().is_empty() {
            return Err(ParseError::new(line, "f-string: empty expression not allowed"));
        }
        parts.push(FStringPart::Hole { source, spec });
    }
    if !lit.is_empty() {
        parts.push(FStringPart::Lit(lit));
    }
    Ok(parts)
}
