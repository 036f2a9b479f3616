//! Lexer for RazorForge and Suflae source
//!
//! A hand-written pull lexer. Call [`Lexer::next_token`] repeatedly (or use
//! the [`Iterator`] impl) to stream tokens; the stream always ends with a
//! single `Eof` token.
//!
//! Leading whitespace at the start of a logical line becomes virtual
//! `Indent`/`Dedent` events, and line ends become `Newline` tokens, but
//! only while no bracket pair is open. Inside `()`, `[]`, `{}` the lexer
//! suppresses layout entirely, which is what lets brace-style and
//! indentation-style blocks coexist in one file.
//!
//! Lexical failures never abort the scan: each one records a diagnostic
//! and the lexer resynchronizes at the next character.

use crate::diagnostics::{codes, Diagnostic};
use crate::span::Span;
use crate::token::{Dialect, FormatPart, LiteralValue, Token, TokenKind};
use std::collections::VecDeque;
use std::path::PathBuf;

/// How many columns a tab advances the indentation measure.
const TAB_WIDTH: usize = 4;

/// Primitive type names lex as `TypeIdentifier` even though they start
/// lowercase.
const PRIMITIVE_TYPES: &[&str] = &[
    "s8", "s16", "s32", "s64", "s128", "u8", "u16", "u32", "u64", "u128", "f16", "f32", "f64",
    "f128", "d32", "d64", "d128", "bool", "text", "text8", "text16", "text32", "letter", "letter8",
    "letter16", "letter32", "unit", "uaddr", "saddr", "iptr", "uptr", "cchar", "cshort", "cint",
    "clong", "cll", "cuchar", "cushort", "cuint", "culong", "cull", "cwchar",
];

/// Flavor of a text literal, selected by its prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TextFlavor {
    Default,
    T8,
    T16,
    T32,
    Raw,
    Formatted,
}

pub struct Lexer<'a> {
    source: &'a str,
    file: PathBuf,
    dialect: Dialect,
    /// Current byte offset (0-based)
    pos: usize,
    /// Current line (1-based)
    line: usize,
    /// Current column (1-based)
    column: usize,
    /// Open bracket depth; layout tokens are suppressed while > 0
    bracket_depth: usize,
    /// Indentation levels; always starts with 0
    indent_stack: Vec<usize>,
    /// Queued layout tokens (indent/dedent bursts)
    pending: VecDeque<Token>,
    /// True until the first real token of the current line is produced
    at_line_start: bool,
    /// True when the current line produced at least one token
    line_had_content: bool,
    eof_emitted: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, file: impl Into<PathBuf>, dialect: Dialect) -> Self {
        Lexer {
            source,
            file: file.into(),
            dialect,
            pos: 0,
            line: 1,
            column: 1,
            bracket_depth: 0,
            indent_stack: vec![0],
            pending: VecDeque::new(),
            at_line_start: true,
            line_had_content: false,
            eof_emitted: false,
            diagnostics: Vec::new(),
        }
    }

    /// Consume the lexer and return every token plus accumulated diagnostics.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        (tokens, self.diagnostics)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    // === Character plumbing ===

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_at(&self, nth: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(nth)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    /// Current position as (line, column, offset).
    fn mark(&self) -> (usize, usize, usize) {
        (self.line, self.column, self.pos)
    }

    fn span_from(&self, mark: (usize, usize, usize)) -> Span {
        Span::range(
            self.file.clone(),
            mark.0,
            mark.1,
            mark.2,
            self.line,
            self.column,
            self.pos,
        )
    }

    fn text_from(&self, mark: (usize, usize, usize)) -> &'a str {
        &self.source[mark.2..self.pos]
    }

    fn token_from(&self, kind: TokenKind, mark: (usize, usize, usize)) -> Token {
        Token::new(kind, self.text_from(mark), self.span_from(mark))
    }

    fn error(&mut self, code: &'static str, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(code, span, message));
    }

    // === Layout ===

    /// Measure leading whitespace of the current line and queue
    /// Indent/Dedent events. Blank and comment-only lines leave the
    /// indentation state untouched.
    fn process_line_start(&mut self) {
        let mark = self.mark();
        let mut width = 0usize;
        loop {
            match self.peek() {
                Some(' ') => {
                    width += 1;
                    self.bump();
                }
                Some('\t') => {
                    width += TAB_WIDTH;
                    self.bump();
                }
                _ => break,
            }
        }
        self.at_line_start = false;

        // Blank line or plain-comment-only line: no layout events.
        match self.peek() {
            None | Some('\n') | Some('\r') => return,
            Some('#') if self.peek_at(1) != Some('#') => return,
            _ => {}
        }

        let current = *self.indent_stack.last().unwrap_or(&0);
        if width > current {
            self.indent_stack.push(width);
            self.pending
                .push_back(Token::new(TokenKind::Indent, "", self.span_from(mark)));
        } else if width < current {
            while self
                .indent_stack
                .last()
                .is_some_and(|&level| level > width)
            {
                self.indent_stack.pop();
                self.pending
                    .push_back(Token::new(TokenKind::Dedent, "", self.span_from(mark)));
            }
            if *self.indent_stack.last().unwrap_or(&0) != width {
                let span = self.span_from(mark);
                self.error(
                    codes::INCONSISTENT_INDENTATION,
                    span,
                    format!("dedent to column {} matches no enclosing block", width + 1),
                );
                // Resynchronize so later lines report against something sane
                self.indent_stack.push(width);
            }
        }
    }

    /// Emit any dedents still open at end of file, then `Eof`.
    fn finish(&mut self) -> Token {
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.pending.push_back(Token::new(
                TokenKind::Dedent,
                "",
                Span::point(self.file.clone(), self.line, self.column, self.pos),
            ));
        }
        if let Some(token) = self.pending.pop_front() {
            return token;
        }
        self.eof_emitted = true;
        Token::new(
            TokenKind::Eof,
            "",
            Span::point(self.file.clone(), self.line, self.column, self.pos),
        )
    }

    // === Main dispatch ===

    /// Produce the next token. Returns `Eof` forever once the source is
    /// exhausted.
    pub fn next_token(&mut self) -> Token {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return token;
            }
            if self.eof_emitted {
                return Token::new(
                    TokenKind::Eof,
                    "",
                    Span::point(self.file.clone(), self.line, self.column, self.pos),
                );
            }

            if self.at_line_start && self.bracket_depth == 0 {
                self.process_line_start();
                continue;
            }

            // Skip horizontal whitespace between tokens
            while matches!(self.peek(), Some(' ') | Some('\t')) {
                self.bump();
            }

            let mark = self.mark();
            let Some(ch) = self.peek() else {
                return self.finish();
            };

            match ch {
                '\r' | '\n' => {
                    self.bump();
                    if ch == '\r' && self.peek() == Some('\n') {
                        self.bump();
                    }
                    let had_content = self.line_had_content;
                    self.line_had_content = false;
                    self.at_line_start = true;
                    if self.bracket_depth == 0 && had_content {
                        return self.token_from(TokenKind::Newline, mark);
                    }
                    continue;
                }
                '#' => {
                    if self.peek_at(1) == Some('#') {
                        return self.lex_doc_comment();
                    }
                    // Plain comment: discard to end of line
                    while !matches!(self.peek(), None | Some('\n') | Some('\r')) {
                        self.bump();
                    }
                    continue;
                }
                '"' => return self.lex_text(TextFlavor::Default, mark),
                '\'' => return self.lex_letter(TokenKind::LetterLiteral, mark),
                c if c.is_ascii_digit() => return self.lex_number(),
                c if c.is_alphabetic() || c == '_' => return self.lex_word(),
                _ => return self.lex_operator(),
            }
        }
    }

    fn produced(&mut self, token: Token) -> Token {
        self.line_had_content = true;
        token
    }

    // === Comments ===

    fn lex_doc_comment(&mut self) -> Token {
        let mark = self.mark();
        self.bump(); // #
        self.bump(); // #
        let content_start = self.pos;
        while !matches!(self.peek(), None | Some('\n') | Some('\r')) {
            self.bump();
        }
        let content = self.source[content_start..self.pos].trim().to_string();
        let token = Token::with_value(
            TokenKind::DocComment,
            self.text_from(mark),
            self.span_from(mark),
            LiteralValue::Text(content),
        );
        self.produced(token)
    }

    // === Words: keywords, identifiers, prefixed literals ===

    fn lex_word(&mut self) -> Token {
        let mark = self.mark();
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.bump();
        }
        let word = self.text_from(mark);

        // Prefixed text/letter literals: r"...", f"...", t8"...", l8'..'
        if self.peek() == Some('"') {
            let flavor = match word {
                "r" => Some(TextFlavor::Raw),
                "f" => Some(TextFlavor::Formatted),
                "t8" => Some(TextFlavor::T8),
                "t16" => Some(TextFlavor::T16),
                "t32" => Some(TextFlavor::T32),
                _ => None,
            };
            if let Some(flavor) = flavor {
                return self.lex_text(flavor, mark);
            }
        }
        if self.peek() == Some('\'') {
            let kind = match word {
                "l8" => Some(TokenKind::Letter8Literal),
                "l16" => Some(TokenKind::Letter16Literal),
                "l32" => Some(TokenKind::Letter32Literal),
                _ => None,
            };
            if let Some(kind) = kind {
                return self.lex_letter(kind, mark);
            }
        }

        // Optional trailing `!` (but never steal the `!` of `!=`)
        if self.peek() == Some('!') && self.peek_at(1) != Some('=') {
            self.bump();
        }
        let word = self.text_from(mark);

        if word == "_" {
            let token = self.token_from(TokenKind::Underscore, mark);
            return self.produced(token);
        }

        let kind = if let Some(keyword) = TokenKind::keyword(word, self.dialect) {
            keyword
        } else if PRIMITIVE_TYPES.contains(&word) {
            TokenKind::TypeIdentifier
        } else if word.chars().next().is_some_and(|c| c.is_uppercase()) {
            TokenKind::TypeIdentifier
        } else {
            TokenKind::Identifier
        };

        let token = match kind {
            TokenKind::True => Token::with_value(
                kind,
                word,
                self.span_from(mark),
                LiteralValue::Bool(true),
            ),
            TokenKind::False => Token::with_value(
                kind,
                word,
                self.span_from(mark),
                LiteralValue::Bool(false),
            ),
            _ => self.token_from(kind, mark),
        };
        self.produced(token)
    }

    // === Numbers ===

    fn lex_number(&mut self) -> Token {
        let mark = self.mark();
        let mut is_float = false;

        let radix = if self.peek() == Some('0') {
            match self.peek_at(1) {
                Some('x') | Some('X') => 16,
                Some('o') | Some('O') => 8,
                Some('b') | Some('B') => 2,
                _ => 10,
            }
        } else {
            10
        };

        if radix != 10 {
            self.bump(); // 0
            self.bump(); // x/o/b
            let digits_start = self.pos;
            while self
                .peek()
                .is_some_and(|c| c.is_digit(radix) || c == '_')
            {
                self.bump();
            }
            if self.pos == digits_start {
                let span = self.span_from(mark);
                self.error(
                    codes::INVALID_NUMERIC_LITERAL,
                    span,
                    format!("'{}' has no digits", self.text_from(mark)),
                );
            }
        } else {
            while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.bump();
            }
            // Fraction only when a digit follows the dot, so `3.sqrt()` still
            // parses as a method call on 3.
            if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.bump();
                while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '_') {
                    self.bump();
                }
            }
            // Exponent
            if matches!(self.peek(), Some('e') | Some('E'))
                && (self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+') | Some('-'))
                        && self.peek_at(2).is_some_and(|c| c.is_ascii_digit())))
            {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        let number_end = self.pos;
        let number_text = &self.source[mark.2..number_end];

        // Optional suffix word directly attached to the number
        let suffix_start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
            self.bump();
        }
        let suffix = self.source[suffix_start..self.pos].to_string();

        self.make_number_token(mark, number_text.to_string(), &suffix, is_float, radix)
    }

    fn parse_int(&mut self, mark: (usize, usize, usize), text: &str, radix: u32) -> i128 {
        let digits: String = if radix == 10 {
            text.chars().filter(|&c| c != '_').collect()
        } else {
            text[2..].chars().filter(|&c| c != '_').collect()
        };
        match i128::from_str_radix(&digits, radix) {
            Ok(v) => v,
            Err(_) => {
                let span = self.span_from(mark);
                self.error(
                    codes::INVALID_NUMERIC_LITERAL,
                    span,
                    format!("integer literal '{}' is too large", text),
                );
                0
            }
        }
    }

    fn parse_float(&mut self, mark: (usize, usize, usize), text: &str) -> f64 {
        let digits: String = text.chars().filter(|&c| c != '_').collect();
        match digits.parse::<f64>() {
            Ok(v) => v,
            Err(_) => {
                let span = self.span_from(mark);
                self.error(
                    codes::INVALID_NUMERIC_LITERAL,
                    span,
                    format!("malformed number '{}'", text),
                );
                0.0
            }
        }
    }

    /// Check a typed integer literal against its declared width.
    fn check_int_range(&mut self, mark: (usize, usize, usize), value: i128, suffix: &str) {
        let fits = match suffix {
            "s8" => i8::try_from(value).is_ok(),
            "s16" => i16::try_from(value).is_ok(),
            "s32" => i32::try_from(value).is_ok(),
            "s64" | "" => i64::try_from(value).is_ok(),
            "u8" => u8::try_from(value).is_ok(),
            "u16" => u16::try_from(value).is_ok(),
            "u32" => u32::try_from(value).is_ok(),
            "u64" => u64::try_from(value).is_ok(),
            // 128-bit widths hold anything the scanner produced
            _ => true,
        };
        if !fits {
            let span = self.span_from(mark);
            let shown = if suffix.is_empty() { "s64" } else { suffix };
            self.error(
                codes::INVALID_NUMERIC_LITERAL,
                span,
                format!("literal does not fit in {}", shown),
            );
        }
    }

    fn make_number_token(
        &mut self,
        mark: (usize, usize, usize),
        number_text: String,
        suffix: &str,
        is_float: bool,
        radix: u32,
    ) -> Token {
        use TokenKind::*;

        let int_kind = |s: &str| -> Option<TokenKind> {
            Some(match s {
                "s8" => S8Literal,
                "s16" => S16Literal,
                "s32" => S32Literal,
                "s64" => S64Literal,
                "s128" => S128Literal,
                "u8" => U8Literal,
                "u16" => U16Literal,
                "u32" => U32Literal,
                "u64" => U64Literal,
                "u128" => U128Literal,
                _ => return Option::None,
            })
        };
        let float_kind = |s: &str| -> Option<TokenKind> {
            Some(match s {
                "f16" => F16Literal,
                "f32" => F32Literal,
                "f64" => F64Literal,
                "f128" => F128Literal,
                "d32" => D32Literal,
                "d64" => D64Literal,
                "d128" => D128Literal,
                _ => return Option::None,
            })
        };
        // Decimal multipliers first, then binary
        let memory_bytes = |s: &str| -> Option<i128> {
            Some(match s {
                "b" => 1,
                "kb" => 1_000,
                "mb" => 1_000_000,
                "gb" => 1_000_000_000,
                "tb" => 1_000_000_000_000,
                "pb" => 1_000_000_000_000_000,
                "kib" => 1 << 10,
                "mib" => 1 << 20,
                "gib" => 1 << 30,
                "tib" => 1 << 40,
                "pib" => 1 << 50,
                _ => return Option::None,
            })
        };
        let duration_ns = |s: &str| -> Option<i128> {
            Some(match s {
                "ns" => 1,
                "us" => 1_000,
                "ms" => 1_000_000,
                "s" => 1_000_000_000,
                "m" => 60 * 1_000_000_000,
                "h" => 3_600 * 1_000_000_000,
                "d" => 86_400 * 1_000_000_000,
                "w" => 604_800 * 1_000_000_000,
                _ => return Option::None,
            })
        };

        let span = self.span_from(mark);
        let raw = self.text_from(mark).to_string();

        let token = if is_float {
            let value = self.parse_float(mark, &number_text);
            if suffix.is_empty() {
                Token::with_value(F64Literal, raw, span, LiteralValue::Float(value))
            } else if let Some(kind) = float_kind(suffix) {
                Token::with_value(kind, raw, span, LiteralValue::Float(value))
            } else {
                self.error(
                    codes::UNKNOWN_SUFFIX,
                    span.clone(),
                    format!("unknown suffix '{}' on fraction literal", suffix),
                );
                self.diagnostics.last_mut().unwrap().hint =
                    Some("fraction literals accept f16/f32/f64/f128 or d32/d64/d128".to_string());
                Token::with_value(F64Literal, raw, span, LiteralValue::Float(value))
            }
        } else {
            let value = self.parse_int(mark, &number_text, radix);
            if suffix.is_empty() {
                self.check_int_range(mark, value, "");
                Token::with_value(S64Literal, raw, span, LiteralValue::Int(value))
            } else if let Some(kind) = int_kind(suffix) {
                self.check_int_range(mark, value, suffix);
                Token::with_value(kind, raw, span, LiteralValue::Int(value))
            } else if let Some(kind) = float_kind(suffix) {
                Token::with_value(kind, raw, span, LiteralValue::Float(value as f64))
            } else if let Some(multiplier) = memory_bytes(suffix) {
                Token::with_value(
                    MemorySizeLiteral,
                    raw,
                    span,
                    LiteralValue::Int(value.saturating_mul(multiplier)),
                )
            } else if let Some(multiplier) = duration_ns(suffix) {
                Token::with_value(
                    DurationLiteral,
                    raw,
                    span,
                    LiteralValue::Int(value.saturating_mul(multiplier)),
                )
            } else {
                self.error(
                    codes::UNKNOWN_SUFFIX,
                    span.clone(),
                    format!("unknown suffix '{}' on integer literal", suffix),
                );
                self.diagnostics.last_mut().unwrap().hint = Some(
                    "integer literals accept a type (s8..s128, u8..u128, f16..f128, d32..d128), \
                     a memory size (b/kb/mb/gb/tb/pb, kib/mib/gib/tib/pib), or a duration \
                     (ns/us/ms/s/m/h/d/w)"
                        .to_string(),
                );
                Token::with_value(S64Literal, raw, span, LiteralValue::Int(value))
            }
        };
        self.produced(token)
    }

    // === Text and letter literals ===

    fn lex_text(&mut self, flavor: TextFlavor, mark: (usize, usize, usize)) -> Token {
        let quote_mark = self.mark();
        self.bump(); // opening quote

        let mut decoded = String::new();
        let mut parts: Vec<FormatPart> = Vec::new();
        let mut terminated = false;

        loop {
            match self.peek() {
                None | Some('\n') | Some('\r') => break,
                Some('"') => {
                    self.bump();
                    terminated = true;
                    break;
                }
                Some('\\') if flavor != TextFlavor::Raw => {
                    if let Some(ch) = self.lex_escape() {
                        decoded.push(ch);
                    }
                }
                Some('{') if flavor == TextFlavor::Formatted => {
                    self.bump();
                    if !decoded.is_empty() {
                        parts.push(FormatPart::Text(std::mem::take(&mut decoded)));
                    }
                    let expr_mark = self.mark();
                    let mut depth = 1usize;
                    while let Some(c) = self.peek() {
                        match c {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            '\n' | '\r' => break,
                            _ => {}
                        }
                        self.bump();
                    }
                    let expr_span = self.span_from(expr_mark);
                    let expr_source = self.text_from(expr_mark).to_string();
                    if self.peek() == Some('}') {
                        self.bump();
                    }
                    parts.push(FormatPart::Interpolation {
                        source: expr_source,
                        span: expr_span,
                    });
                }
                Some(c) => {
                    decoded.push(c);
                    self.bump();
                }
            }
        }

        if !terminated {
            let span = Span::point(self.file.clone(), quote_mark.0, quote_mark.1, quote_mark.2);
            self.diagnostics.push(
                Diagnostic::error(codes::UNTERMINATED_TEXT, span, "unterminated text literal")
                    .with_hint("add a closing '\"'"),
            );
        }

        let kind = match flavor {
            TextFlavor::Default => TokenKind::TextLiteral,
            TextFlavor::T8 => TokenKind::Text8Literal,
            TextFlavor::T16 => TokenKind::Text16Literal,
            TextFlavor::T32 => TokenKind::Text32Literal,
            TextFlavor::Raw => TokenKind::RawTextLiteral,
            TextFlavor::Formatted => TokenKind::FormattedTextLiteral,
        };
        let value = if flavor == TextFlavor::Formatted {
            if !decoded.is_empty() {
                parts.push(FormatPart::Text(decoded));
            }
            LiteralValue::Formatted(parts)
        } else {
            LiteralValue::Text(decoded)
        };
        let token = Token::with_value(kind, self.text_from(mark), self.span_from(mark), value);
        self.produced(token)
    }

    fn lex_letter(&mut self, kind: TokenKind, mark: (usize, usize, usize)) -> Token {
        let quote_mark = self.mark();
        self.bump(); // opening quote

        let decoded = match self.peek() {
            Some('\\') => self.lex_escape().unwrap_or('\u{FFFD}'),
            Some(c) if c != '\'' && c != '\n' && c != '\r' => {
                self.bump();
                c
            }
            _ => '\u{FFFD}',
        };

        if self.peek() == Some('\'') {
            self.bump();
        } else {
            let span = Span::point(self.file.clone(), quote_mark.0, quote_mark.1, quote_mark.2);
            self.diagnostics.push(
                Diagnostic::error(
                    codes::UNTERMINATED_LETTER,
                    span,
                    "unterminated letter literal",
                )
                .with_hint("add a closing '''"),
            );
        }

        let token = Token::with_value(
            kind,
            self.text_from(mark),
            self.span_from(mark),
            LiteralValue::Letter(decoded),
        );
        self.produced(token)
    }

    /// Decode one escape sequence starting at `\`. Returns the decoded
    /// character, or records a diagnostic and returns None.
    fn lex_escape(&mut self) -> Option<char> {
        let mark = self.mark();
        self.bump(); // backslash
        let ch = match self.peek() {
            Some(c) => c,
            None => {
                let span = self.span_from(mark);
                self.error(codes::INVALID_ESCAPE, span, "escape at end of input");
                return None;
            }
        };
        self.bump();
        match ch {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '\\' => Some('\\'),
            '"' => Some('"'),
            '\'' => Some('\''),
            '0' => Some('\0'),
            'u' => {
                let digits_mark = self.mark();
                let mut code = 0u32;
                for _ in 0..4 {
                    match self.peek().and_then(|c| c.to_digit(16)) {
                        Some(d) => {
                            code = code * 16 + d;
                            self.bump();
                        }
                        None => {
                            let span = self.span_from(mark);
                            self.error(
                                codes::INVALID_UNICODE_ESCAPE,
                                span,
                                "\\u escape requires exactly 4 hex digits",
                            );
                            return None;
                        }
                    }
                }
                let _ = digits_mark;
                match char::from_u32(code) {
                    Some(c) => Some(c),
                    None => {
                        let span = self.span_from(mark);
                        self.error(
                            codes::INVALID_UNICODE_ESCAPE,
                            span,
                            format!("\\u{:04X} is not a valid code point", code),
                        );
                        None
                    }
                }
            }
            other => {
                let span = self.span_from(mark);
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::INVALID_ESCAPE,
                        span,
                        format!("unknown escape sequence '\\{}'", other),
                    )
                    .with_hint("valid escapes are \\n \\t \\r \\\\ \\\" \\' \\0 \\uXXXX"),
                );
                None
            }
        }
    }

    // === Operators and punctuation ===

    fn lex_operator(&mut self) -> Token {
        use TokenKind::*;
        let mark = self.mark();
        let ch = self.bump().expect("lex_operator called at end of input");

        // Second character of an overflow operator selects its semantics:
        // `%` wrapping, `^` saturating, `!` unchecked, `?` checked.
        let overflow = |c: char, wrap: TokenKind, sat: TokenKind, unchecked: TokenKind, checked: TokenKind| match c
        {
            '%' => Some(wrap),
            '^' => Some(sat),
            '!' => Some(unchecked),
            '?' => Some(checked),
            _ => Option::None,
        };

        let kind = match ch {
            '+' => match self.peek() {
                Some(c) if overflow(c, PlusWrap, PlusSaturate, PlusUnchecked, PlusChecked).is_some() => {
                    let k = overflow(c, PlusWrap, PlusSaturate, PlusUnchecked, PlusChecked).unwrap();
                    self.bump();
                    k
                }
                Some('=') => {
                    self.bump();
                    PlusEqual
                }
                _ => Plus,
            },
            '-' => match self.peek() {
                Some('>') => {
                    self.bump();
                    Arrow
                }
                Some(c) if overflow(c, MinusWrap, MinusSaturate, MinusUnchecked, MinusChecked).is_some() => {
                    let k =
                        overflow(c, MinusWrap, MinusSaturate, MinusUnchecked, MinusChecked).unwrap();
                    self.bump();
                    k
                }
                Some('=') => {
                    self.bump();
                    MinusEqual
                }
                _ => Minus,
            },
            '*' => match self.peek() {
                Some('*') => {
                    self.bump();
                    StarStar
                }
                Some(c) if overflow(c, StarWrap, StarSaturate, StarUnchecked, StarChecked).is_some() => {
                    let k = overflow(c, StarWrap, StarSaturate, StarUnchecked, StarChecked).unwrap();
                    self.bump();
                    k
                }
                Some('=') => {
                    self.bump();
                    StarEqual
                }
                _ => Star,
            },
            '/' => match self.peek() {
                Some('/') => {
                    self.bump();
                    match self.peek() {
                        Some(c)
                            if overflow(
                                c,
                                SlashSlashWrap,
                                SlashSlashSaturate,
                                SlashSlashUnchecked,
                                SlashSlashChecked,
                            )
                            .is_some() =>
                        {
                            let k = overflow(
                                c,
                                SlashSlashWrap,
                                SlashSlashSaturate,
                                SlashSlashUnchecked,
                                SlashSlashChecked,
                            )
                            .unwrap();
                            self.bump();
                            k
                        }
                        _ => SlashSlash,
                    }
                }
                Some('=') => {
                    self.bump();
                    SlashEqual
                }
                _ => Slash,
            },
            '%' => Percent,
            '^' => Caret,
            '&' => Ampersand,
            '|' => Pipe,
            '~' => Tilde,
            '<' => match self.peek() {
                Some('<') => {
                    self.bump();
                    LessLess
                }
                Some('=') => {
                    self.bump();
                    LessEqual
                }
                _ => Less,
            },
            '>' => match self.peek() {
                Some('>') => {
                    self.bump();
                    GreaterGreater
                }
                Some('=') => {
                    self.bump();
                    GreaterEqual
                }
                _ => Greater,
            },
            '=' => match self.peek() {
                Some('=') => {
                    self.bump();
                    EqualEqual
                }
                Some('>') => {
                    self.bump();
                    FatArrow
                }
                _ => Equal,
            },
            '!' => match self.peek() {
                Some('=') => {
                    self.bump();
                    BangEqual
                }
                _ => Bang,
            },
            '?' => Question,
            ':' => match self.peek() {
                Some(':') => {
                    self.bump();
                    DoubleColon
                }
                _ => Colon,
            },
            ';' => Semicolon,
            ',' => Comma,
            '.' => Dot,
            '@' => At,
            '(' => {
                self.bracket_depth += 1;
                LeftParen
            }
            '[' => {
                self.bracket_depth += 1;
                LeftBracket
            }
            '{' => {
                self.bracket_depth += 1;
                LeftBrace
            }
            ')' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                RightParen
            }
            ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                RightBracket
            }
            '}' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                RightBrace
            }
            other => {
                let span = self.span_from(mark);
                self.error(
                    codes::UNEXPECTED_CHARACTER,
                    span,
                    format!("unexpected character '{}'", other),
                );
                // Produce something so the parser can keep going
                Bang
            }
        };
        let token = self.token_from(kind, mark);
        self.produced(token)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.eof_emitted {
            return None;
        }
        Some(self.next_token())
    }
}

/// Tokenize a whole source string in one call.
pub fn tokenize(source: &str, file: impl Into<PathBuf>, dialect: Dialect) -> (Vec<Token>, Vec<Diagnostic>) {
    Lexer::new(source, file, dialect).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, diags) = tokenize(source, "test.rf", Dialect::RazorForge);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        tokens.iter().map(|t| t.kind).collect()
    }

    fn lex_one(source: &str) -> Token {
        let (tokens, diags) = tokenize(source, "test.rf", Dialect::RazorForge);
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        tokens.into_iter().next().unwrap()
    }

    #[test]
    fn test_plain_integer_defaults_to_s64() {
        let token = lex_one("42");
        assert_eq!(token.kind, TokenKind::S64Literal);
        assert_eq!(token.text, "42");
        assert_eq!(token.int_value(), Some(42));
    }

    #[test]
    fn test_hex_literal_value() {
        let token = lex_one("0xFF");
        assert_eq!(token.kind, TokenKind::S64Literal);
        assert_eq!(token.int_value(), Some(255));
    }

    #[test]
    fn test_octal_and_binary_literals() {
        assert_eq!(lex_one("0o17").int_value(), Some(15));
        assert_eq!(lex_one("0b1010").int_value(), Some(10));
    }

    #[test]
    fn test_fraction_defaults_to_f64() {
        let token = lex_one("3.14");
        assert_eq!(token.kind, TokenKind::F64Literal);
        assert_eq!(token.text, "3.14");
        assert_eq!(token.value, Some(LiteralValue::Float(3.14)));
    }

    #[test]
    fn test_typed_suffixes() {
        assert_eq!(lex_one("7u8").kind, TokenKind::U8Literal);
        assert_eq!(lex_one("7s128").kind, TokenKind::S128Literal);
        assert_eq!(lex_one("1.5f32").kind, TokenKind::F32Literal);
        assert_eq!(lex_one("1.5d128").kind, TokenKind::D128Literal);
        assert_eq!(lex_one("42f64").kind, TokenKind::F64Literal);
    }

    #[test]
    fn test_literal_overflow_is_rejected() {
        let (_, diags) = tokenize("300s8", "test.rf", Dialect::RazorForge);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, codes::INVALID_NUMERIC_LITERAL);
        assert!(diags[0].message.contains("s8"));
    }

    #[test]
    fn test_memory_size_literals() {
        assert_eq!(lex_one("4kb").int_value(), Some(4_000));
        assert_eq!(lex_one("4kib").int_value(), Some(4_096));
        assert_eq!(lex_one("2mib").int_value(), Some(2 << 20));
        assert_eq!(lex_one("1b").kind, TokenKind::MemorySizeLiteral);
    }

    #[test]
    fn test_duration_literals() {
        assert_eq!(lex_one("5ms").int_value(), Some(5_000_000));
        assert_eq!(lex_one("2s").int_value(), Some(2_000_000_000));
        assert_eq!(lex_one("1w").kind, TokenKind::DurationLiteral);
        assert_eq!(lex_one("3m").int_value(), Some(180_000_000_000));
    }

    #[test]
    fn test_unknown_suffix_diagnostic() {
        let (_, diags) = tokenize("10zz", "test.rf", Dialect::RazorForge);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, codes::UNKNOWN_SUFFIX);
        assert!(diags[0].hint.is_some());
    }

    #[test]
    fn test_routine_token_sequence() {
        use TokenKind::*;
        let source = "routine add(a: s32, b: s32) -> s32 { return a + b }";
        assert_eq!(
            kinds(source),
            vec![
                Routine,
                Identifier,
                LeftParen,
                Identifier,
                Colon,
                TypeIdentifier,
                Comma,
                Identifier,
                Colon,
                TypeIdentifier,
                RightParen,
                Arrow,
                TypeIdentifier,
                LeftBrace,
                Return,
                Identifier,
                Plus,
                Identifier,
                RightBrace,
                Eof,
            ]
        );
    }

    #[test]
    fn test_raw_text_matches_source_slice() {
        let source = "routine add(a: s32, b: s32) -> s32 { return a + b }";
        let (tokens, _) = tokenize(source, "test.rf", Dialect::RazorForge);
        for token in &tokens {
            assert_eq!(
                &source[token.span.start_offset..token.span.end_offset],
                token.text,
                "span text mismatch for {:?}",
                token.kind
            );
        }
    }

    #[test]
    fn test_unterminated_text_points_at_open_quote() {
        let source = "let x = \"unterminated";
        let (_, diags) = tokenize(source, "test.rf", Dialect::RazorForge);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, codes::UNTERMINATED_TEXT);
        assert_eq!(diags[0].span.start_column, 9);
        assert_eq!(diags[0].span.start_offset, 8);
        assert_eq!(diags[0].hint.as_deref(), Some("add a closing '\"'"));
    }

    #[test]
    fn test_text_escapes() {
        let token = lex_one(r#""a\tb\n\u0041""#);
        assert_eq!(token.kind, TokenKind::TextLiteral);
        assert_eq!(token.value, Some(LiteralValue::Text("a\tb\nA".to_string())));
    }

    #[test]
    fn test_invalid_escape_diagnostic() {
        let (_, diags) = tokenize(r#""bad \q escape""#, "test.rf", Dialect::RazorForge);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, codes::INVALID_ESCAPE);
    }

    #[test]
    fn test_unicode_escape_requires_four_digits() {
        let (_, diags) = tokenize(r#""\u12""#, "test.rf", Dialect::RazorForge);
        assert_eq!(diags[0].code, codes::INVALID_UNICODE_ESCAPE);
    }

    #[test]
    fn test_raw_text_keeps_backslashes() {
        let token = lex_one(r#"r"a\nb""#);
        assert_eq!(token.kind, TokenKind::RawTextLiteral);
        assert_eq!(token.value, Some(LiteralValue::Text(r"a\nb".to_string())));
    }

    #[test]
    fn test_encoded_text_prefixes() {
        assert_eq!(lex_one(r#"t8"x""#).kind, TokenKind::Text8Literal);
        assert_eq!(lex_one(r#"t16"x""#).kind, TokenKind::Text16Literal);
        assert_eq!(lex_one(r#"t32"x""#).kind, TokenKind::Text32Literal);
    }

    #[test]
    fn test_formatted_text_captures_interpolations() {
        let token = lex_one(r#"f"sum is {a + b}!""#);
        assert_eq!(token.kind, TokenKind::FormattedTextLiteral);
        let Some(LiteralValue::Formatted(parts)) = token.value else {
            panic!("expected formatted parts");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], FormatPart::Text("sum is ".to_string()));
        match &parts[1] {
            FormatPart::Interpolation { source, span } => {
                assert_eq!(source, "a + b");
                assert_eq!(span.start_column, 11);
            }
            other => panic!("expected interpolation, got {:?}", other),
        }
        assert_eq!(parts[2], FormatPart::Text("!".to_string()));
    }

    #[test]
    fn test_letter_literals() {
        let token = lex_one("'c'");
        assert_eq!(token.kind, TokenKind::LetterLiteral);
        assert_eq!(token.value, Some(LiteralValue::Letter('c')));
        assert_eq!(lex_one("l8'x'").kind, TokenKind::Letter8Literal);
        assert_eq!(lex_one(r"'\n'").value, Some(LiteralValue::Letter('\n')));
    }

    #[test]
    fn test_unterminated_letter() {
        let (_, diags) = tokenize("'c", "test.rf", Dialect::RazorForge);
        assert_eq!(diags[0].code, codes::UNTERMINATED_LETTER);
    }

    #[test]
    fn test_overflow_operators() {
        use TokenKind::*;
        assert_eq!(kinds("a +% b")[1], PlusWrap);
        assert_eq!(kinds("a +^ b")[1], PlusSaturate);
        assert_eq!(kinds("a +! b")[1], PlusUnchecked);
        assert_eq!(kinds("a +? b")[1], PlusChecked);
        assert_eq!(kinds("a -? b")[1], MinusChecked);
        assert_eq!(kinds("a *^ b")[1], StarSaturate);
        assert_eq!(kinds("a //% b")[1], SlashSlashWrap);
        assert_eq!(kinds("a // b")[1], SlashSlash);
    }

    #[test]
    fn test_comparison_and_shift_operators() {
        use TokenKind::*;
        assert_eq!(kinds("a != b")[1], BangEqual);
        assert_eq!(kinds("a <= b")[1], LessEqual);
        assert_eq!(kinds("a << b")[1], LessLess);
        assert_eq!(kinds("a ** b")[1], StarStar);
        assert_eq!(kinds("a => b")[1], FatArrow);
    }

    #[test]
    fn test_identifier_with_trailing_bang() {
        let (tokens, _) = tokenize("verify!(x)", "test.rf", Dialect::RazorForge);
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].text, "verify!");
        // `!=` never loses its bang to the identifier
        let (tokens, _) = tokenize("a != b", "test.rf", Dialect::RazorForge);
        assert_eq!(tokens[0].text, "a");
        assert_eq!(tokens[1].kind, TokenKind::BangEqual);
    }

    #[test]
    fn test_danger_bang_is_keyword() {
        let (tokens, _) = tokenize("danger! { }", "test.rf", Dialect::RazorForge);
        assert_eq!(tokens[0].kind, TokenKind::Danger);
        assert_eq!(tokens[0].text, "danger!");
    }

    #[test]
    fn test_type_identifiers() {
        let (tokens, _) = tokenize("Widget s32 count", "test.rf", Dialect::RazorForge);
        assert_eq!(tokens[0].kind, TokenKind::TypeIdentifier);
        assert_eq!(tokens[1].kind, TokenKind::TypeIdentifier);
        assert_eq!(tokens[2].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_suflae_keywords() {
        let (tokens, _) = tokenize("recipe main()", "test.sf", Dialect::Suflae);
        assert_eq!(tokens[0].kind, TokenKind::Routine);
        // `recipe` is an ordinary identifier in the systems dialect
        let (tokens, _) = tokenize("recipe main()", "test.rf", Dialect::RazorForge);
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_indentation_events() {
        use TokenKind::*;
        let source = "if ready:\n    go()\ndone()\n";
        let kinds = kinds(source);
        assert_eq!(
            kinds,
            vec![
                If, Identifier, Colon, Newline, Indent, Identifier, LeftParen, RightParen,
                Newline, Dedent, Identifier, LeftParen, RightParen, Newline, Eof,
            ]
        );
    }

    #[test]
    fn test_nested_indentation_dedents_all_levels_at_eof() {
        use TokenKind::*;
        let source = "if a:\n    if b:\n        c()";
        let kinds = kinds(source);
        assert_eq!(kinds.iter().filter(|&&k| k == Indent).count(), 2);
        assert_eq!(kinds.iter().filter(|&&k| k == Dedent).count(), 2);
        assert_eq!(*kinds.last().unwrap(), Eof);
    }

    #[test]
    fn test_blank_and_comment_lines_do_not_disturb_indentation() {
        use TokenKind::*;
        let source = "if a:\n    x()\n\n    # comment\n    y()\n";
        let kinds = kinds(source);
        assert_eq!(kinds.iter().filter(|&&k| k == Indent).count(), 1);
        assert_eq!(kinds.iter().filter(|&&k| k == Dedent).count(), 1);
    }

    #[test]
    fn test_inconsistent_dedent_diagnostic() {
        let source = "if a:\n        x()\n   y()\n";
        let (_, diags) = tokenize(source, "test.rf", Dialect::RazorForge);
        assert!(diags.iter().any(|d| d.code == codes::INCONSISTENT_INDENTATION));
    }

    #[test]
    fn test_newlines_suppressed_inside_brackets() {
        use TokenKind::*;
        let source = "call(\n    1,\n    2\n)\n";
        let kinds = kinds(source);
        assert!(!kinds.contains(&Indent));
        assert!(!kinds.contains(&Dedent));
        // Only the newline after the closing paren survives
        assert_eq!(kinds.iter().filter(|&&k| k == Newline).count(), 1);
    }

    #[test]
    fn test_doc_comment_token() {
        let (tokens, _) = tokenize("## Adds two numbers\nroutine add()", "test.rf", Dialect::RazorForge);
        assert_eq!(tokens[0].kind, TokenKind::DocComment);
        assert_eq!(
            tokens[0].value,
            Some(LiteralValue::Text("Adds two numbers".to_string()))
        );
        // Plain comments disappear
        let (tokens, _) = tokenize("# nothing\nx", "test.rf", Dialect::RazorForge);
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_unexpected_character() {
        let (_, diags) = tokenize("let $ = 1", "test.rf", Dialect::RazorForge);
        assert_eq!(diags[0].code, codes::UNEXPECTED_CHARACTER);
    }

    #[test]
    fn test_round_trip_token_stream() {
        let source = "routine a() { return 1 }\nroutine b() { return 2 }\n";
        let (tokens, _) = tokenize(source, "test.rf", Dialect::RazorForge);
        let rendered: String = tokens
            .iter()
            .map(|t| {
                if t.kind == TokenKind::Newline {
                    "\n".to_string()
                } else {
                    format!("{} ", t.text)
                }
            })
            .collect();
        let (again, _) = tokenize(&rendered, "test.rf", Dialect::RazorForge);
        let left: Vec<_> = tokens.iter().map(|t| (t.kind, t.text.clone())).collect();
        let right: Vec<_> = again.iter().map(|t| (t.kind, t.text.clone())).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_pull_iterator_terminates() {
        let lexer = Lexer::new("1 2 3", "test.rf", Dialect::RazorForge);
        let collected: Vec<Token> = lexer.collect();
        assert_eq!(collected.last().unwrap().kind, TokenKind::Eof);
        assert_eq!(collected.len(), 4);
    }
}
