// Tokenizer
//
// Byte-stream to token stream. The parser drives it one token at a time and
// states whether the next token sits in value (prefix) position; only then
// does a `/` start a regex literal scan; in operator position it is division.

use crate::error::Error;

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    Str(String),
    Name(String),
    QuotedName(String),
    /// `$name`; the empty name is bare `$`, `"$"` is `$$`
    Variable(String),
    Regex {
        pattern: String,
        flags: String,
    },

    // Keywords
    True,
    False,
    Null,
    And,
    Or,
    In,
    Function,

    // Structural
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    Comma,
    Semicolon,
    Colon,

    // Operators
    Dot,
    DotDot,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Ampersand,
    Pipe,
    Question,
    QuestionQuestion,
    QuestionColon,
    ColonEqual,
    ChainApply,
    At,
    Hash,
    Caret,

    Eof,
}

impl TokenKind {
    /// Token spelling, for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("{}", n),
            TokenKind::Str(s) => format!("\"{}\"", s),
            TokenKind::Name(s) | TokenKind::QuotedName(s) => s.clone(),
            TokenKind::Variable(s) => format!("${}", s),
            TokenKind::Regex { pattern, flags } => format!("/{}/{}", pattern, flags),
            TokenKind::True => "true".to_string(),
            TokenKind::False => "false".to_string(),
            TokenKind::Null => "null".to_string(),
            TokenKind::And => "and".to_string(),
            TokenKind::Or => "or".to_string(),
            TokenKind::In => "in".to_string(),
            TokenKind::Function => "function".to_string(),
            TokenKind::LeftParen => "(".to_string(),
            TokenKind::RightParen => ")".to_string(),
            TokenKind::LeftBracket => "[".to_string(),
            TokenKind::RightBracket => "]".to_string(),
            TokenKind::LeftBrace => "{".to_string(),
            TokenKind::RightBrace => "}".to_string(),
            TokenKind::Comma => ",".to_string(),
            TokenKind::Semicolon => ";".to_string(),
            TokenKind::Colon => ":".to_string(),
            TokenKind::Dot => ".".to_string(),
            TokenKind::DotDot => "..".to_string(),
            TokenKind::Plus => "+".to_string(),
            TokenKind::Minus => "-".to_string(),
            TokenKind::Star => "*".to_string(),
            TokenKind::StarStar => "**".to_string(),
            TokenKind::Slash => "/".to_string(),
            TokenKind::Percent => "%".to_string(),
            TokenKind::Equal => "=".to_string(),
            TokenKind::NotEqual => "!=".to_string(),
            TokenKind::LessThan => "<".to_string(),
            TokenKind::LessThanOrEqual => "<=".to_string(),
            TokenKind::GreaterThan => ">".to_string(),
            TokenKind::GreaterThanOrEqual => ">=".to_string(),
            TokenKind::Ampersand => "&".to_string(),
            TokenKind::Pipe => "|".to_string(),
            TokenKind::Question => "?".to_string(),
            TokenKind::QuestionQuestion => "??".to_string(),
            TokenKind::QuestionColon => "?:".to_string(),
            TokenKind::ColonEqual => ":=".to_string(),
            TokenKind::ChainApply => "~>".to_string(),
            TokenKind::At => "@".to_string(),
            TokenKind::Hash => "#".to_string(),
            TokenKind::Caret => "^".to_string(),
            TokenKind::Eof => "(end)".to_string(),
        }
    }
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Character offset where the token starts.
    pub position: usize,
}

/// Cursor-based scanner over the source characters.
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
}

impl Tokenizer {
    pub fn new(input: &str) -> Self {
        Tokenizer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if self.position < self.input.len() {
            self.position += 1;
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), Error> {
        loop {
            match self.current() {
                Some(ch) if ch.is_whitespace() => self.advance(),
                Some('/') if self.peek(1) == Some('*') => {
                    let start = self.position;
                    self.advance(); // '/'
                    self.advance(); // '*'
                    loop {
                        match self.current() {
                            None => return Err(Error::UnterminatedComment { position: start }),
                            Some('*') if self.peek(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => self.advance(),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn read_string(&mut self, quote_char: char) -> Result<String, Error> {
        let start = self.position;
        let mut result = String::new();
        self.advance(); // opening quote

        loop {
            match self.current() {
                None => return Err(Error::UnterminatedString { position: start }),
                Some(ch) if ch == quote_char => {
                    self.advance(); // closing quote
                    return Ok(result);
                }
                Some('\\') => {
                    let escape_pos = self.position;
                    self.advance();
                    match self.current() {
                        None => return Err(Error::UnterminatedString { position: start }),
                        Some('"') => result.push('"'),
                        Some('\'') => result.push('\''),
                        Some('\\') => result.push('\\'),
                        Some('/') => result.push('/'),
                        Some('b') => result.push('\u{0008}'),
                        Some('f') => result.push('\u{000C}'),
                        Some('n') => result.push('\n'),
                        Some('r') => result.push('\r'),
                        Some('t') => result.push('\t'),
                        Some('u') => {
                            self.advance();
                            let mut hex = String::new();
                            for _ in 0..4 {
                                match self.current() {
                                    Some(h) if h.is_ascii_hexdigit() => {
                                        hex.push(h);
                                        self.advance();
                                    }
                                    _ => {
                                        return Err(Error::UnsupportedEscape {
                                            position: escape_pos,
                                            escape: format!("u{}", hex),
                                        })
                                    }
                                }
                            }
                            let code = u32::from_str_radix(&hex, 16).expect("validated hex");
                            match char::from_u32(code) {
                                Some(ch) => result.push(ch),
                                None => {
                                    return Err(Error::UnsupportedEscape {
                                        position: escape_pos,
                                        escape: format!("u{}", hex),
                                    })
                                }
                            }
                            continue; // already past the escape
                        }
                        Some(ch) => {
                            return Err(Error::UnsupportedEscape {
                                position: escape_pos,
                                escape: ch.to_string(),
                            })
                        }
                    }
                    self.advance();
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<f64, Error> {
        let start = self.position;

        // Integer part (no sign: unary minus is a parser concern)
        if self.current() == Some('0') {
            self.advance();
        } else {
            while self.current().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // Fractional part
        if self.current() == Some('.') && self.peek(1).map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
            while self.current().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // Exponent part
        if matches!(self.current(), Some('e') | Some('E')) {
            let mark = self.position;
            self.advance();
            if matches!(self.current(), Some('+') | Some('-')) {
                self.advance();
            }
            if self.current().map_or(false, |c| c.is_ascii_digit()) {
                while self.current().map_or(false, |c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                // 'e' belonged to a following name, not this number
                self.position = mark;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();
        let value: f64 = text
            .parse()
            .map_err(|_| Error::NumberOutOfRange {
                position: start,
                token: text.clone(),
            })?;
        if value.is_infinite() {
            return Err(Error::NumberOutOfRange {
                position: start,
                token: text,
            });
        }
        Ok(value)
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.position].iter().collect()
    }

    fn read_quoted_name(&mut self) -> Result<String, Error> {
        let start = self.position;
        self.advance(); // opening backtick

        let name_start = self.position;
        while let Some(ch) = self.current() {
            if ch == '`' {
                let name: String = self.input[name_start..self.position].iter().collect();
                self.advance(); // closing backtick
                return Ok(name);
            }
            self.advance();
        }

        Err(Error::UnterminatedQuotedName { position: start })
    }

    /// Scan a regex literal starting at the current `/`. Tracks character
    /// classes so a `/` inside `[...]` does not terminate the literal.
    fn read_regex(&mut self) -> Result<TokenKind, Error> {
        let start = self.position;
        self.advance(); // opening slash

        let pattern_start = self.position;
        let mut in_class = false;
        loop {
            match self.current() {
                None => return Err(Error::UnterminatedRegex { position: start }),
                Some('\\') => {
                    self.advance();
                    if self.current().is_none() {
                        return Err(Error::UnterminatedRegex { position: start });
                    }
                    self.advance();
                }
                Some('[') => {
                    in_class = true;
                    self.advance();
                }
                Some(']') => {
                    in_class = false;
                    self.advance();
                }
                Some('/') if !in_class => break,
                Some(_) => self.advance(),
            }
        }

        let pattern: String = self.input[pattern_start..self.position].iter().collect();
        self.advance(); // closing slash

        let mut flags = String::new();
        while let Some(ch) = self.current() {
            if matches!(ch, 'i' | 'm' | 's' | 'g') {
                flags.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if pattern.is_empty() {
            return Err(Error::EmptyRegex { position: start });
        }

        // Validate now so a bad pattern is a compile-time diagnostic
        let translated = translate_regex(&pattern, &flags);
        regex::Regex::new(&translated).map_err(|e| Error::InvalidRegex {
            position: start,
            message: e.to_string(),
        })?;

        Ok(TokenKind::Regex { pattern, flags })
    }

    /// Produce the next token. `prefix` states whether the parser is in
    /// value position, where `/` starts a regex literal rather than division.
    pub fn next_token(&mut self, prefix: bool) -> Result<Token, Error> {
        self.skip_whitespace_and_comments()?;
        let position = self.position;

        let kind = match self.current() {
            None => TokenKind::Eof,

            Some('/') if prefix => self.read_regex()?,

            Some('"') => TokenKind::Str(self.read_string('"')?),
            Some('\'') => TokenKind::Str(self.read_string('\'')?),
            Some('`') => TokenKind::QuotedName(self.read_quoted_name()?),

            Some(ch) if ch.is_ascii_digit() => TokenKind::Number(self.read_number()?),

            Some('$') => {
                self.advance();
                if self.current() == Some('$') {
                    self.advance();
                    TokenKind::Variable("$".to_string())
                } else {
                    TokenKind::Variable(self.read_identifier())
                }
            }

            // Two-character operators
            Some('.') if self.peek(1) == Some('.') => {
                self.advance();
                self.advance();
                TokenKind::DotDot
            }
            Some(':') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                TokenKind::ColonEqual
            }
            Some('!') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                TokenKind::NotEqual
            }
            Some('>') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                TokenKind::GreaterThanOrEqual
            }
            Some('<') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                TokenKind::LessThanOrEqual
            }
            Some('*') if self.peek(1) == Some('*') => {
                self.advance();
                self.advance();
                TokenKind::StarStar
            }
            Some('~') if self.peek(1) == Some('>') => {
                self.advance();
                self.advance();
                TokenKind::ChainApply
            }
            Some('?') if self.peek(1) == Some('?') => {
                self.advance();
                self.advance();
                TokenKind::QuestionQuestion
            }
            Some('?') if self.peek(1) == Some(':') => {
                self.advance();
                self.advance();
                TokenKind::QuestionColon
            }

            // Single-character tokens
            Some('(') => {
                self.advance();
                TokenKind::LeftParen
            }
            Some(')') => {
                self.advance();
                TokenKind::RightParen
            }
            Some('[') => {
                self.advance();
                TokenKind::LeftBracket
            }
            Some(']') => {
                self.advance();
                TokenKind::RightBracket
            }
            Some('{') => {
                self.advance();
                TokenKind::LeftBrace
            }
            Some('}') => {
                self.advance();
                TokenKind::RightBrace
            }
            Some(',') => {
                self.advance();
                TokenKind::Comma
            }
            Some(';') => {
                self.advance();
                TokenKind::Semicolon
            }
            Some(':') => {
                self.advance();
                TokenKind::Colon
            }
            Some('?') => {
                self.advance();
                TokenKind::Question
            }
            Some('.') => {
                self.advance();
                TokenKind::Dot
            }
            Some('+') => {
                self.advance();
                TokenKind::Plus
            }
            Some('-') => {
                self.advance();
                TokenKind::Minus
            }
            Some('*') => {
                self.advance();
                TokenKind::Star
            }
            Some('/') => {
                self.advance();
                TokenKind::Slash
            }
            Some('%') => {
                self.advance();
                TokenKind::Percent
            }
            Some('=') => {
                self.advance();
                TokenKind::Equal
            }
            Some('<') => {
                self.advance();
                TokenKind::LessThan
            }
            Some('>') => {
                self.advance();
                TokenKind::GreaterThan
            }
            Some('&') => {
                self.advance();
                TokenKind::Ampersand
            }
            Some('|') => {
                self.advance();
                TokenKind::Pipe
            }
            Some('@') => {
                self.advance();
                TokenKind::At
            }
            Some('#') => {
                self.advance();
                TokenKind::Hash
            }
            Some('^') => {
                self.advance();
                TokenKind::Caret
            }

            Some('λ') => {
                self.advance();
                TokenKind::Function
            }

            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_identifier();
                match ident.as_str() {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "in" => TokenKind::In,
                    "function" => TokenKind::Function,
                    _ => TokenKind::Name(ident),
                }
            }

            Some(ch) => {
                return Err(Error::UnknownSymbol {
                    position,
                    token: ch.to_string(),
                })
            }
        };

        Ok(Token { kind, position })
    }
}

/// Translate a scanned regex literal into `regex` crate syntax: the `i`,
/// `m`, `s` flags become an inline flag group; `g` only affects function
/// semantics and is dropped here.
pub fn translate_regex(pattern: &str, flags: &str) -> String {
    let inline: String = flags.chars().filter(|c| matches!(c, 'i' | 'm' | 's')).collect();
    if inline.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", inline, pattern)
    }
}
