use std::collections::VecDeque;

use crate::diagnostics::{SourceSpan, SyntaxError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Def,
    Return,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Pass,
    Global,
    Lambda,
    And,
    Or,
    Not,
    True,
    False,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    Int,
    Float,
    Str,
    Keyword(Keyword),
    Newline,
    Indent,
    Dedent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,
    EqEq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw text for identifiers and numbers, cooked value for strings.
    pub lexeme: String,
    pub span: SourceSpan,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: std::str::CharIndices<'a>,
    current: usize,
    peeked: Option<(usize, char)>,
    indents: Vec<usize>,
    paren_depth: usize,
    at_line_start: bool,
    line_had_tokens: bool,
    pending: VecDeque<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices(),
            current: 0,
            peeked: None,
            indents: vec![0],
            paren_depth: 0,
            at_line_start: true,
            line_had_tokens: false,
            pending: VecDeque::new(),
        }
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        let next = if let Some(pair) = self.peeked.take() {
            Some(pair)
        } else {
            self.chars.next()
        };
        if let Some((idx, ch)) = next {
            self.current = idx + ch.len_utf8();
            Some((idx, ch))
        } else {
            None
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        if self.peeked.is_none() {
            self.peeked = self.chars.next();
        }
        self.peeked
    }

    fn peek_second(&mut self) -> Option<char> {
        self.peek();
        self.chars.clone().next().map(|(_, ch)| ch)
    }

    fn match_next(&mut self, expected: char) -> bool {
        if let Some((idx, ch)) = self.peek() {
            if ch == expected {
                self.peeked = None;
                self.current = idx + ch.len_utf8();
                return true;
            }
        }
        false
    }

    fn simple_token(&mut self, start: usize, kind: TokenKind) -> Token {
        let end = self.current;
        Token {
            kind,
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
        }
    }

    /// Consumes leading whitespace of a fresh logical line and emits
    /// Indent/Dedent tokens into the pending queue. Blank and comment-only
    /// lines do not affect indentation.
    fn handle_line_start(&mut self) -> Result<(), SyntaxError> {
        loop {
            let line_start = self.current;
            let mut width = 0usize;
            loop {
                match self.peek() {
                    Some((_, ' ')) => {
                        width += 1;
                        self.bump();
                    }
                    Some((_, '\t')) => {
                        width = (width / 8 + 1) * 8;
                        self.bump();
                    }
                    Some((_, '\r')) => {
                        self.bump();
                    }
                    _ => break,
                }
            }
            match self.peek() {
                Some((_, '\n')) => {
                    self.bump();
                    continue;
                }
                Some((_, '#')) => {
                    while let Some((_, ch)) = self.peek() {
                        if ch == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    continue;
                }
                None => {
                    // Dedents at end of input are emitted by tokenize().
                    return Ok(());
                }
                Some(_) => {
                    let top = *self.indents.last().unwrap_or(&0);
                    if width > top {
                        self.indents.push(width);
                        self.pending.push_back(Token {
                            kind: TokenKind::Indent,
                            lexeme: String::new(),
                            span: SourceSpan::new(line_start, self.current),
                        });
                    } else if width < top {
                        while self.indents.len() > 1 && *self.indents.last().unwrap() > width {
                            self.indents.pop();
                            self.pending.push_back(Token {
                                kind: TokenKind::Dedent,
                                lexeme: String::new(),
                                span: SourceSpan::new(line_start, self.current),
                            });
                        }
                        if *self.indents.last().unwrap() != width {
                            return Err(SyntaxError::new(
                                "unindent does not match any outer indentation level",
                                SourceSpan::new(line_start, self.current),
                            ));
                        }
                    }
                    return Ok(());
                }
            }
        }
    }

    fn identifier_or_keyword(&mut self, start: usize) -> Token {
        while let Some((_, ch)) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let end = self.current;
        let lexeme = self.source[start..end].to_string();
        let kind = keyword_for(&lexeme).unwrap_or(TokenKind::Identifier);
        Token {
            kind,
            lexeme,
            span: SourceSpan { start, end },
        }
    }

    fn number_literal(&mut self, start: usize) -> Token {
        let mut is_float = false;
        while let Some((_, ch)) = self.peek() {
            match ch {
                '0'..='9' | '_' => {
                    self.bump();
                }
                '.' if !is_float => {
                    is_float = true;
                    self.bump();
                }
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if let Some((_, '+' | '-')) = self.peek() {
                        self.bump();
                    }
                }
                _ => break,
            }
        }
        let end = self.current;
        Token {
            kind: if is_float {
                TokenKind::Float
            } else {
                TokenKind::Int
            },
            lexeme: self.source[start..end].to_string(),
            span: SourceSpan { start, end },
        }
    }

    fn string_literal(&mut self, start: usize, quote: char) -> Result<Token, SyntaxError> {
        // Detect triple-quoted strings.
        let triple = if self.peek().map(|(_, c)| c) == Some(quote) {
            let second_is_quote = self.peek_second() == Some(quote);
            if second_is_quote {
                self.bump();
                self.bump();
                true
            } else {
                // Empty string.
                self.bump();
                return Ok(Token {
                    kind: TokenKind::Str,
                    lexeme: String::new(),
                    span: SourceSpan::new(start, self.current),
                });
            }
        } else {
            false
        };

        let mut value = String::new();
        while let Some((_, ch)) = self.bump() {
            match ch {
                '\\' => {
                    if let Some((_, esc)) = self.bump() {
                        match esc {
                            'n' => value.push('\n'),
                            'r' => value.push('\r'),
                            't' => value.push('\t'),
                            '\\' => value.push('\\'),
                            '\'' => value.push('\''),
                            '"' => value.push('"'),
                            other => {
                                value.push('\\');
                                value.push(other);
                            }
                        }
                    } else {
                        break;
                    }
                }
                c if c == quote => {
                    if !triple {
                        return Ok(Token {
                            kind: TokenKind::Str,
                            lexeme: value,
                            span: SourceSpan::new(start, self.current),
                        });
                    }
                    if self.match_next(quote) {
                        if self.match_next(quote) {
                            return Ok(Token {
                                kind: TokenKind::Str,
                                lexeme: value,
                                span: SourceSpan::new(start, self.current),
                            });
                        }
                        value.push(quote);
                        value.push(quote);
                    } else {
                        value.push(quote);
                    }
                }
                '\n' if !triple => break,
                other => value.push(other),
            }
        }
        Err(SyntaxError::new(
            "unterminated string literal",
            SourceSpan::new(start, self.current),
        ))
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            if let Some(queued) = self.pending.pop_front() {
                tokens.push(queued);
                continue;
            }

            if self.at_line_start && self.paren_depth == 0 {
                self.handle_line_start()?;
                self.at_line_start = false;
                self.line_had_tokens = false;
                if !self.pending.is_empty() {
                    continue;
                }
            }

            // Skip intra-line whitespace and comments.
            loop {
                match self.peek() {
                    Some((_, ' ' | '\t' | '\r')) => {
                        self.bump();
                    }
                    Some((_, '\n')) if self.paren_depth > 0 => {
                        self.bump();
                    }
                    Some((_, '#')) => {
                        while let Some((_, ch)) = self.peek() {
                            if ch == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    }
                    _ => break,
                }
            }

            let (start, ch) = match self.bump() {
                Some(pair) => pair,
                None => {
                    if self.line_had_tokens {
                        tokens.push(Token {
                            kind: TokenKind::Newline,
                            lexeme: String::new(),
                            span: SourceSpan::new(self.current, self.current),
                        });
                    }
                    while self.indents.len() > 1 {
                        self.indents.pop();
                        tokens.push(Token {
                            kind: TokenKind::Dedent,
                            lexeme: String::new(),
                            span: SourceSpan::new(self.current, self.current),
                        });
                    }
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        lexeme: String::new(),
                        span: SourceSpan::new(self.current, self.current),
                    });
                    break;
                }
            };

            if ch == '\n' {
                if self.line_had_tokens {
                    tokens.push(Token {
                        kind: TokenKind::Newline,
                        lexeme: String::new(),
                        span: SourceSpan::new(start, self.current),
                    });
                }
                self.at_line_start = true;
                continue;
            }

            let token = match ch {
                'a'..='z' | 'A'..='Z' | '_' => self.identifier_or_keyword(start),
                '0'..='9' => self.number_literal(start),
                '"' | '\'' => self.string_literal(start, ch)?,
                '(' => {
                    self.paren_depth += 1;
                    self.simple_token(start, TokenKind::LParen)
                }
                ')' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.simple_token(start, TokenKind::RParen)
                }
                '[' => {
                    self.paren_depth += 1;
                    self.simple_token(start, TokenKind::LBracket)
                }
                ']' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.simple_token(start, TokenKind::RBracket)
                }
                '{' => {
                    self.paren_depth += 1;
                    self.simple_token(start, TokenKind::LBrace)
                }
                '}' => {
                    self.paren_depth = self.paren_depth.saturating_sub(1);
                    self.simple_token(start, TokenKind::RBrace)
                }
                ',' => self.simple_token(start, TokenKind::Comma),
                ':' => self.simple_token(start, TokenKind::Colon),
                ';' => self.simple_token(start, TokenKind::Semicolon),
                '.' => self.simple_token(start, TokenKind::Dot),
                '+' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::PlusAssign)
                    } else {
                        self.simple_token(start, TokenKind::Plus)
                    }
                }
                '-' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::MinusAssign)
                    } else {
                        self.simple_token(start, TokenKind::Minus)
                    }
                }
                '*' => {
                    if self.match_next('*') {
                        self.simple_token(start, TokenKind::StarStar)
                    } else if self.match_next('=') {
                        self.simple_token(start, TokenKind::StarAssign)
                    } else {
                        self.simple_token(start, TokenKind::Star)
                    }
                }
                '/' => {
                    if self.match_next('/') {
                        self.simple_token(start, TokenKind::SlashSlash)
                    } else if self.match_next('=') {
                        self.simple_token(start, TokenKind::SlashAssign)
                    } else {
                        self.simple_token(start, TokenKind::Slash)
                    }
                }
                '%' => self.simple_token(start, TokenKind::Percent),
                '=' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::EqEq)
                    } else {
                        self.simple_token(start, TokenKind::Assign)
                    }
                }
                '!' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::NotEq)
                    } else {
                        return Err(SyntaxError::new(
                            "unexpected character `!`",
                            SourceSpan::new(start, self.current),
                        ));
                    }
                }
                '<' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::LessEq)
                    } else {
                        self.simple_token(start, TokenKind::Less)
                    }
                }
                '>' => {
                    if self.match_next('=') {
                        self.simple_token(start, TokenKind::GreaterEq)
                    } else {
                        self.simple_token(start, TokenKind::Greater)
                    }
                }
                other => {
                    return Err(SyntaxError::new(
                        format!("unexpected character `{other}`"),
                        SourceSpan::new(start, self.current),
                    ));
                }
            };
            self.line_had_tokens = true;
            tokens.push(token);
        }
        Ok(tokens)
    }
}

fn keyword_for(ident: &str) -> Option<TokenKind> {
    use self::Keyword as Kw;
    let keyword = match ident {
        "def" => Kw::Def,
        "return" => Kw::Return,
        "if" => Kw::If,
        "elif" => Kw::Elif,
        "else" => Kw::Else,
        "while" => Kw::While,
        "for" => Kw::For,
        "in" => Kw::In,
        "break" => Kw::Break,
        "continue" => Kw::Continue,
        "pass" => Kw::Pass,
        "global" => Kw::Global,
        "lambda" => Kw::Lambda,
        "and" => Kw::And,
        "or" => Kw::Or,
        "not" => Kw::Not,
        "True" => Kw::True,
        "False" => Kw::False,
        "None" => Kw::None,
        _ => return None,
    };
    Some(TokenKind::Keyword(keyword))
}
