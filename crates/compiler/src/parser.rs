//! Parser for RazorForge and Suflae
//!
//! A hand-written recursive-descent parser for declarations and statements,
//! with a precedence-climbing expression grammar. Blocks come in two
//! interchangeable forms, `{ ... }` and `:` followed by an indented suite,
//! and the parser accepts whichever it finds, so both styles can coexist in
//! one file.
//!
//! Parsing never gives up on the first error: diagnostics accumulate and
//! the parser resynchronizes at the next statement or declaration keyword,
//! yielding the best partial AST it can.

use crate::ast::*;
use crate::diagnostics::{codes, Diagnostic};
use crate::lexer::Lexer;
use crate::span::Span;
use crate::token::{Dialect, FormatPart, LiteralValue, Token, TokenKind};
use std::path::PathBuf;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: PathBuf,
    dialect: Dialect,
    diagnostics: Vec<Diagnostic>,
    next_node_id: u32,
    /// Doc comment lines waiting for the next declaration
    pending_doc: Vec<String>,
}

impl Parser {
    /// Lex and parse a source string in one step.
    pub fn new(source: &str, file: impl Into<PathBuf>, dialect: Dialect) -> Self {
        let file = file.into();
        let (tokens, lex_diagnostics) = Lexer::new(source, file.clone(), dialect).tokenize();
        let mut parser = Self::from_tokens(tokens, file, dialect);
        parser.diagnostics = lex_diagnostics;
        parser
    }

    /// Parse an already-lexed token stream.
    pub fn from_tokens(mut tokens: Vec<Token>, file: impl Into<PathBuf>, dialect: Dialect) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::Eof, "", Span::default()));
        }
        Parser {
            tokens,
            pos: 0,
            file: file.into(),
            dialect,
            diagnostics: Vec::new(),
            next_node_id: 0,
            pending_doc: Vec::new(),
        }
    }

    /// Parse the whole unit. Always returns a program (on structural
    /// failures, the best partial AST) plus every diagnostic seen.
    pub fn parse(mut self) -> (Program, Vec<Diagnostic>) {
        let start_span = self.peek().span.clone();
        let mut declarations = Vec::new();

        loop {
            self.skip_layout();
            self.collect_doc_comments();
            if self.check(TokenKind::Eof) {
                break;
            }
            match self.parse_declaration() {
                Some(declaration) => declarations.push(declaration),
                None => self.synchronize_declaration(),
            }
        }

        let end_span = self.peek().span.clone();
        let span = if declarations.is_empty() {
            start_span
        } else {
            start_span.merge(&end_span)
        };
        let program = Program {
            file: self.file.clone(),
            dialect: self.dialect,
            declarations,
            span,
        };
        (program, self.diagnostics)
    }

    // === Token plumbing ===

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_at(&self, nth: usize) -> &Token {
        let idx = (self.pos + nth).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Record an expected-token diagnostic and return the offending token
    /// without consuming it.
    fn expect(&mut self, kind: TokenKind, what: &str) -> Token {
        if self.check(kind) {
            return self.advance();
        }
        let token = self.peek().clone();
        self.error(
            codes::EXPECTED_TOKEN,
            token.span.clone(),
            format!("expected {}, found '{}'", what, describe(&token)),
        );
        token
    }

    fn error(&mut self, code: &'static str, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(code, span, message));
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    /// Skip statement separators: newlines and semicolons.
    fn skip_layout(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn collect_doc_comments(&mut self) {
        while self.check(TokenKind::DocComment) {
            let token = self.advance();
            if let Some(LiteralValue::Text(text)) = token.value {
                self.pending_doc.push(text);
            }
            self.skip_layout();
        }
    }

    fn take_doc(&mut self) -> Option<String> {
        if self.pending_doc.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending_doc).join("\n"))
        }
    }

    /// The next significant kind, looking through separators.
    fn peek_past_layout(&self) -> TokenKind {
        let mut idx = self.pos;
        while idx < self.tokens.len() {
            let kind = self.tokens[idx].kind;
            if !matches!(kind, TokenKind::Newline | TokenKind::Semicolon) {
                return kind;
            }
            idx += 1;
        }
        TokenKind::Eof
    }

    /// Drop tokens until something that can start a new declaration.
    fn synchronize_declaration(&mut self) {
        while !self.check(TokenKind::Eof) {
            if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
                self.advance();
                if self.peek_kind().starts_statement() || self.check(TokenKind::Public) {
                    return;
                }
                continue;
            }
            self.advance();
        }
    }

    /// Drop tokens until the next statement boundary inside a block.
    fn synchronize_statement(&mut self) {
        while !self.check(TokenKind::Eof) {
            match self.peek_kind() {
                TokenKind::Newline | TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RightBrace | TokenKind::Dedent => return,
                kind if kind.starts_statement() => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    // === Declarations ===

    fn parse_declaration(&mut self) -> Option<Declaration> {
        let visibility = if self.match_kind(TokenKind::Public) {
            Visibility::Public
        } else if self.match_kind(TokenKind::Private) {
            Visibility::Private
        } else {
            Visibility::Public
        };

        match self.peek_kind() {
            TokenKind::Routine => Some(Declaration::Function(self.parse_function(visibility))),
            TokenKind::External => Some(Declaration::External(self.parse_external())),
            TokenKind::Record => Some(Declaration::Record(self.parse_record())),
            TokenKind::Entity => Some(Declaration::Entity(self.parse_entity())),
            TokenKind::Choice => Some(Declaration::Choice(self.parse_choice())),
            TokenKind::Protocol => Some(Declaration::Protocol(self.parse_protocol())),
            TokenKind::Import => Some(Declaration::Import(self.parse_import())),
            TokenKind::Redefine => Some(Declaration::Redefine(self.parse_redefine())),
            TokenKind::Let | TokenKind::Var => {
                Some(Declaration::Variable(self.parse_variable()))
            }
            _ => {
                let token = self.peek().clone();
                self.error(
                    codes::EXPECTED_DECLARATION,
                    token.span.clone(),
                    format!("expected a declaration, found '{}'", describe(&token)),
                );
                None
            }
        }
    }

    fn parse_function(&mut self, visibility: Visibility) -> FunctionDecl {
        let id = self.fresh_id();
        let doc = self.take_doc();
        let start = self.expect(TokenKind::Routine, "'routine'").span;

        let name_token = self.expect(TokenKind::Identifier, "a function name");
        let can_fail = name_token.text.ends_with('!');
        let name = name_token.text.trim_end_matches('!').to_string();

        let generic_params = self.parse_generic_params();
        let params = self.parse_parameter_list();

        let return_type = if self.match_kind(TokenKind::Arrow) {
            Some(self.parse_type())
        } else {
            None
        };

        let body = self.parse_block();
        let span = start.merge(&body.span);

        FunctionDecl {
            id,
            name,
            doc,
            visibility,
            generic_params,
            params,
            return_type,
            body: Some(body),
            can_fail,
            generated: false,
            span,
        }
    }

    /// Generic parameter list at a declaration site: `<T, U>`.
    fn parse_generic_params(&mut self) -> Vec<String> {
        let mut params = Vec::new();
        if !self.match_kind(TokenKind::Less) {
            return params;
        }
        loop {
            if self.check(TokenKind::TypeIdentifier) || self.check(TokenKind::Identifier) {
                params.push(self.advance().text);
            } else {
                let token = self.peek().clone();
                self.error(
                    codes::EXPECTED_IDENTIFIER,
                    token.span,
                    "expected a generic parameter name",
                );
                break;
            }
            if !self.match_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Greater, "'>'");
        params
    }

    fn parse_parameter_list(&mut self) -> Vec<Parameter> {
        let mut params = Vec::new();
        self.expect(TokenKind::LeftParen, "'('");
        while !self.check(TokenKind::RightParen) && !self.check(TokenKind::Eof) {
            let name_token = if self.check(TokenKind::Me) {
                self.advance()
            } else {
                self.expect(TokenKind::Identifier, "a parameter name")
            };
            let ty = if self.match_kind(TokenKind::Colon) {
                self.parse_type()
            } else {
                // `me` needs no annotation; the enclosing type supplies it
                TypeExpr {
                    kind: TypeExprKind::Named {
                        name: "Me".to_string(),
                        generic_args: vec![],
                    },
                    span: name_token.span.clone(),
                }
            };
            let span = name_token.span.merge(&ty.span);
            params.push(Parameter {
                name: name_token.text.clone(),
                ty,
                span,
            });
            if !self.match_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')'");
        params
    }

    fn parse_external(&mut self) -> ExternalDecl {
        let id = self.fresh_id();
        let doc = self.take_doc();
        let start = self.expect(TokenKind::External, "'external'").span;

        // Optional calling-convention annotation: external("stdcall")
        let convention = if self.match_kind(TokenKind::LeftParen) {
            let token = self.expect(TokenKind::TextLiteral, "a calling-convention name");
            self.expect(TokenKind::RightParen, "')'");
            match token.value {
                Some(LiteralValue::Text(text)) => Some(text),
                _ => None,
            }
        } else {
            None
        };

        self.expect(TokenKind::Routine, "'routine'");
        let name_token = self.expect(TokenKind::Identifier, "an external function name");
        let params = self.parse_parameter_list();
        let return_type = if self.match_kind(TokenKind::Arrow) {
            Some(self.parse_type())
        } else {
            None
        };

        // Externals never carry bodies
        if self.check(TokenKind::LeftBrace) || self.check(TokenKind::Colon) {
            let span = self.peek().span.clone();
            self.error(
                codes::UNEXPECTED_TOKEN,
                span,
                "external declarations cannot have a body",
            );
        }

        let end = return_type
            .as_ref()
            .map(|t| t.span.clone())
            .unwrap_or_else(|| name_token.span.clone());
        ExternalDecl {
            id,
            name: name_token.text,
            doc,
            convention,
            params,
            return_type,
            span: start.merge(&end),
        }
    }

    /// Fields and methods shared by records and entities.
    fn parse_type_body(&mut self) -> (Vec<Field>, Vec<FunctionDecl>) {
        let mut fields = Vec::new();
        let mut methods = Vec::new();

        let indented = if self.match_kind(TokenKind::LeftBrace) {
            false
        } else if self.match_kind(TokenKind::Colon) {
            self.match_kind(TokenKind::Newline);
            self.expect(TokenKind::Indent, "an indented body");
            true
        } else {
            let token = self.peek().clone();
            self.error(
                codes::EXPECTED_TOKEN,
                token.span.clone(),
                format!("expected '{{' or ':', found '{}'", describe(&token)),
            );
            return (fields, methods);
        };

        loop {
            self.skip_layout();
            self.collect_doc_comments();
            match self.peek_kind() {
                TokenKind::RightBrace if !indented => {
                    self.advance();
                    break;
                }
                TokenKind::Dedent if indented => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    let span = self.peek().span.clone();
                    self.error(codes::EXPECTED_TOKEN, span, "unterminated type body");
                    break;
                }
                TokenKind::Routine => methods.push(self.parse_function(Visibility::Public)),
                TokenKind::Identifier => {
                    let name_token = self.advance();
                    self.expect(TokenKind::Colon, "':' after field name");
                    let ty = self.parse_type();
                    let span = name_token.span.merge(&ty.span);
                    fields.push(Field {
                        name: name_token.text,
                        ty,
                        span,
                    });
                    self.match_kind(TokenKind::Comma);
                }
                _ => {
                    let token = self.advance();
                    self.error(
                        codes::UNEXPECTED_TOKEN,
                        token.span.clone(),
                        format!("expected a field or method, found '{}'", describe(&token)),
                    );
                    self.synchronize_statement();
                }
            }
        }
        (fields, methods)
    }

    fn parse_record(&mut self) -> RecordDecl {
        let id = self.fresh_id();
        let doc = self.take_doc();
        let start = self.expect(TokenKind::Record, "'record'").span;
        let name = self.expect(TokenKind::TypeIdentifier, "a record name").text;
        let generic_params = self.parse_generic_params();
        let (fields, methods) = self.parse_type_body();
        let end = self.previous_span();
        RecordDecl {
            id,
            name,
            doc,
            generic_params,
            fields,
            methods,
            span: start.merge(&end),
        }
    }

    fn parse_entity(&mut self) -> EntityDecl {
        let id = self.fresh_id();
        let doc = self.take_doc();
        let start = self.expect(TokenKind::Entity, "'entity'").span;
        let name = self.expect(TokenKind::TypeIdentifier, "an entity name").text;
        let generic_params = self.parse_generic_params();
        let parent = if self.match_kind(TokenKind::From) {
            Some(self.parse_type())
        } else {
            None
        };
        let (fields, methods) = self.parse_type_body();
        let end = self.previous_span();
        EntityDecl {
            id,
            name,
            doc,
            generic_params,
            parent,
            fields,
            methods,
            span: start.merge(&end),
        }
    }

    fn parse_choice(&mut self) -> ChoiceDecl {
        let id = self.fresh_id();
        let doc = self.take_doc();
        let start = self.expect(TokenKind::Choice, "'choice'").span;
        let name = self.expect(TokenKind::TypeIdentifier, "a choice name").text;
        let generic_params = self.parse_generic_params();

        let mut variants = Vec::new();
        let indented = if self.match_kind(TokenKind::LeftBrace) {
            false
        } else if self.match_kind(TokenKind::Colon) {
            self.match_kind(TokenKind::Newline);
            self.expect(TokenKind::Indent, "an indented body");
            true
        } else {
            let token = self.peek().clone();
            self.error(
                codes::EXPECTED_TOKEN,
                token.span.clone(),
                format!("expected '{{' or ':', found '{}'", describe(&token)),
            );
            let end = self.previous_span();
            return ChoiceDecl {
                id,
                name,
                doc,
                generic_params,
                variants,
                span: start.merge(&end),
            };
        };

        loop {
            self.skip_layout();
            match self.peek_kind() {
                TokenKind::RightBrace if !indented => {
                    self.advance();
                    break;
                }
                TokenKind::Dedent if indented => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    let span = self.peek().span.clone();
                    self.error(codes::EXPECTED_TOKEN, span, "unterminated choice body");
                    break;
                }
                TokenKind::TypeIdentifier => {
                    let name_token = self.advance();
                    let mut fields = Vec::new();
                    if self.match_kind(TokenKind::LeftBrace) {
                        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
                            let field_name = self.expect(TokenKind::Identifier, "a field name");
                            self.expect(TokenKind::Colon, "':' after field name");
                            let ty = self.parse_type();
                            let span = field_name.span.merge(&ty.span);
                            fields.push(Field {
                                name: field_name.text,
                                ty,
                                span,
                            });
                            if !self.match_kind(TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(TokenKind::RightBrace, "'}'");
                    }
                    let span = name_token.span.merge(&self.previous_span());
                    variants.push(ChoiceVariant {
                        name: name_token.text,
                        fields,
                        span,
                    });
                    self.match_kind(TokenKind::Comma);
                }
                _ => {
                    let token = self.advance();
                    self.error(
                        codes::UNEXPECTED_TOKEN,
                        token.span.clone(),
                        format!("expected a variant name, found '{}'", describe(&token)),
                    );
                    self.synchronize_statement();
                }
            }
        }

        let end = self.previous_span();
        ChoiceDecl {
            id,
            name,
            doc,
            generic_params,
            variants,
            span: start.merge(&end),
        }
    }

    fn parse_protocol(&mut self) -> ProtocolDecl {
        let id = self.fresh_id();
        let doc = self.take_doc();
        let start = self.expect(TokenKind::Protocol, "'protocol'").span;
        let name = self.expect(TokenKind::TypeIdentifier, "a protocol name").text;
        let generic_params = self.parse_generic_params();

        let mut methods = Vec::new();
        let indented = if self.match_kind(TokenKind::LeftBrace) {
            false
        } else if self.match_kind(TokenKind::Colon) {
            self.match_kind(TokenKind::Newline);
            self.expect(TokenKind::Indent, "an indented body");
            true
        } else {
            let token = self.peek().clone();
            self.error(
                codes::EXPECTED_TOKEN,
                token.span.clone(),
                format!("expected '{{' or ':', found '{}'", describe(&token)),
            );
            let end = self.previous_span();
            return ProtocolDecl {
                id,
                name,
                doc,
                generic_params,
                methods,
                span: start.merge(&end),
            };
        };

        loop {
            self.skip_layout();
            self.collect_doc_comments();
            match self.peek_kind() {
                TokenKind::RightBrace if !indented => {
                    self.advance();
                    break;
                }
                TokenKind::Dedent if indented => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    let span = self.peek().span.clone();
                    self.error(codes::EXPECTED_TOKEN, span, "unterminated protocol body");
                    break;
                }
                TokenKind::Routine => {
                    methods.push(self.parse_protocol_method());
                }
                _ => {
                    let token = self.advance();
                    self.error(
                        codes::UNEXPECTED_TOKEN,
                        token.span.clone(),
                        format!("expected a method signature, found '{}'", describe(&token)),
                    );
                    self.synchronize_statement();
                }
            }
        }

        let end = self.previous_span();
        ProtocolDecl {
            id,
            name,
            doc,
            generic_params,
            methods,
            span: start.merge(&end),
        }
    }

    /// A protocol method: a signature, optionally followed by a default body.
    fn parse_protocol_method(&mut self) -> FunctionDecl {
        let id = self.fresh_id();
        let doc = self.take_doc();
        let start = self.expect(TokenKind::Routine, "'routine'").span;
        let name_token = self.expect(TokenKind::Identifier, "a method name");
        let can_fail = name_token.text.ends_with('!');
        let name = name_token.text.trim_end_matches('!').to_string();
        let generic_params = self.parse_generic_params();
        let params = self.parse_parameter_list();
        let return_type = if self.match_kind(TokenKind::Arrow) {
            Some(self.parse_type())
        } else {
            None
        };

        let body = if self.check(TokenKind::LeftBrace) || self.check(TokenKind::Colon) {
            Some(self.parse_block())
        } else {
            None
        };

        let end = self.previous_span();
        FunctionDecl {
            id,
            name,
            doc,
            visibility: Visibility::Public,
            generic_params,
            params,
            return_type,
            body,
            can_fail,
            generated: false,
            span: start.merge(&end),
        }
    }

    fn parse_import(&mut self) -> ImportDecl {
        let id = self.fresh_id();
        let start = self.expect(TokenKind::Import, "'import'").span;
        let mut path = vec![self.expect(TokenKind::Identifier, "a module path").text];
        while self.match_kind(TokenKind::Dot) {
            let segment = if self.check(TokenKind::Identifier) || self.check(TokenKind::TypeIdentifier)
            {
                self.advance().text
            } else {
                let token = self.peek().clone();
                self.error(
                    codes::EXPECTED_IDENTIFIER,
                    token.span,
                    "expected a path segment after '.'",
                );
                break;
            };
            path.push(segment);
        }

        // Soft keyword: `import a.b as c`
        let alias = if self.check(TokenKind::Identifier) && self.peek().text == "as" {
            self.advance();
            Some(self.expect(TokenKind::Identifier, "an alias name").text)
        } else {
            None
        };

        let end = self.previous_span();
        ImportDecl {
            id,
            path,
            alias,
            span: start.merge(&end),
        }
    }

    fn parse_redefine(&mut self) -> RedefineDecl {
        let id = self.fresh_id();
        let start = self.expect(TokenKind::Redefine, "'redefine'").span;
        let name = self.expect(TokenKind::TypeIdentifier, "a type name").text;
        self.expect(TokenKind::Equal, "'='");
        let target = self.parse_type();
        let span = start.merge(&target.span);
        RedefineDecl {
            id,
            name,
            target,
            span,
        }
    }

    fn parse_variable(&mut self) -> VariableDecl {
        let id = self.fresh_id();
        let doc = self.take_doc();
        let mutable = self.check(TokenKind::Var);
        let start = self.advance().span; // let or var
        let name = self.expect(TokenKind::Identifier, "a variable name").text;
        let ty = if self.match_kind(TokenKind::Colon) {
            Some(self.parse_type())
        } else {
            None
        };
        let initializer = if self.match_kind(TokenKind::Equal) {
            Some(self.parse_expression())
        } else {
            None
        };
        let end = self.previous_span();
        VariableDecl {
            id,
            name,
            doc,
            mutable,
            ty,
            initializer,
            span: start.merge(&end),
        }
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            self.peek().span.clone()
        } else {
            self.tokens[self.pos - 1].span.clone()
        }
    }

    // === Blocks and statements ===

    /// Parse a block in either style: `{ ... }`, or `:` followed by an
    /// indented suite, or `:` followed by a single inline statement.
    fn parse_block(&mut self) -> Block {
        let start = self.peek().span.clone();

        if self.match_kind(TokenKind::LeftBrace) {
            let mut statements = Vec::new();
            self.skip_layout();
            while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
                statements.push(self.parse_statement());
                self.skip_layout();
            }
            self.expect(TokenKind::RightBrace, "'}'");
            let span = start.merge(&self.previous_span());
            return Block { statements, span };
        }

        if self.match_kind(TokenKind::Colon) {
            if self.match_kind(TokenKind::Newline) {
                if !self.match_kind(TokenKind::Indent) {
                    let span = self.peek().span.clone();
                    self.error(
                        codes::INDENTATION_ERROR,
                        span.clone(),
                        "expected an indented block after ':'",
                    );
                    return Block {
                        statements: vec![],
                        span,
                    };
                }
                let mut statements = Vec::new();
                self.skip_layout();
                while !self.check(TokenKind::Dedent) && !self.check(TokenKind::Eof) {
                    statements.push(self.parse_statement());
                    self.skip_layout();
                }
                self.match_kind(TokenKind::Dedent);
                let span = start.merge(&self.previous_span());
                return Block { statements, span };
            }
            // Inline single-statement block: `if ready: go()`
            let statement = self.parse_statement();
            let span = start.merge(statement.span());
            return Block {
                statements: vec![statement],
                span,
            };
        }

        let token = self.peek().clone();
        self.error(
            codes::EXPECTED_TOKEN,
            token.span.clone(),
            format!("expected '{{' or ':' to begin a block, found '{}'", describe(&token)),
        );
        Block {
            statements: vec![],
            span: token.span,
        }
    }

    fn parse_statement(&mut self) -> Statement {
        match self.peek_kind() {
            TokenKind::Let | TokenKind::Var => {
                Statement::Declaration(Box::new(Declaration::Variable(self.parse_variable())))
            }
            TokenKind::Routine => Statement::Declaration(Box::new(Declaration::Function(
                self.parse_function(Visibility::Public),
            ))),
            TokenKind::If => self.parse_if_statement(),
            TokenKind::When => self.parse_when_statement(),
            TokenKind::While => self.parse_while_statement(),
            TokenKind::For => self.parse_for_statement(),
            TokenKind::Loop => {
                let start = self.advance().span;
                let body = self.parse_block();
                let span = start.merge(&body.span);
                Statement::Loop(LoopStatement { body, span })
            }
            TokenKind::Break => Statement::Break {
                span: self.advance().span,
            },
            TokenKind::Continue => Statement::Continue {
                span: self.advance().span,
            },
            TokenKind::Return => {
                let start = self.advance().span;
                let value = if matches!(
                    self.peek_kind(),
                    TokenKind::Newline
                        | TokenKind::Semicolon
                        | TokenKind::RightBrace
                        | TokenKind::Dedent
                        | TokenKind::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expression())
                };
                let span = match &value {
                    Some(v) => start.merge(&v.span),
                    None => start,
                };
                Statement::Return { value, span }
            }
            TokenKind::Danger => {
                let start = self.advance().span;
                let body = self.parse_block();
                let span = start.merge(&body.span);
                Statement::Danger { body, span }
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Statement {
        let before = self.pos;
        let target = self.parse_expression();

        // Bail out of a stuck position so block loops always make progress
        if self.pos == before {
            self.advance();
            self.synchronize_statement();
            return Statement::Expression(target);
        }

        let compound = match self.peek_kind() {
            TokenKind::Equal => None,
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::SlashEqual => Some(BinaryOp::Div),
            _ => return Statement::Expression(target),
        };

        self.advance(); // the assignment operator
        let value = self.parse_expression();
        let span = target.span.merge(&value.span);
        Statement::Assignment {
            target,
            op: compound,
            value,
            span,
        }
    }

    fn parse_if_statement(&mut self) -> Statement {
        let start = self.expect(TokenKind::If, "'if'").span;
        let mut branches = Vec::new();

        let condition = self.parse_expression();
        let body = self.parse_block();
        branches.push((condition, body));

        let mut else_block = None;
        loop {
            match self.peek_past_layout() {
                TokenKind::Elif => {
                    self.skip_layout();
                    self.advance();
                    let condition = self.parse_expression();
                    let body = self.parse_block();
                    branches.push((condition, body));
                }
                TokenKind::Else => {
                    self.skip_layout();
                    self.advance();
                    else_block = Some(self.parse_block());
                    break;
                }
                _ => break,
            }
        }

        let end = else_block
            .as_ref()
            .map(|b| b.span.clone())
            .unwrap_or_else(|| branches.last().map(|(_, b)| b.span.clone()).unwrap_or(start.clone()));
        Statement::If(IfStatement {
            branches,
            else_block,
            span: start.merge(&end),
        })
    }

    fn parse_when_statement(&mut self) -> Statement {
        let start = self.expect(TokenKind::When, "'when'").span;
        let scrutinee = self.parse_expression();

        let mut arms = Vec::new();
        let indented = if self.match_kind(TokenKind::LeftBrace) {
            false
        } else if self.match_kind(TokenKind::Colon) {
            self.match_kind(TokenKind::Newline);
            self.expect(TokenKind::Indent, "an indented body");
            true
        } else {
            let token = self.peek().clone();
            self.error(
                codes::EXPECTED_TOKEN,
                token.span.clone(),
                "expected '{' or ':' after the scrutinee",
            );
            return Statement::When(WhenStatement {
                scrutinee,
                arms,
                span: start.merge(&token.span),
            });
        };

        loop {
            self.skip_layout();
            match self.peek_kind() {
                TokenKind::RightBrace if !indented => {
                    self.advance();
                    break;
                }
                TokenKind::Dedent if indented => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    let span = self.peek().span.clone();
                    self.error(codes::EXPECTED_PATTERN, span, "unterminated when body");
                    break;
                }
                _ => {
                    let pattern = self.parse_pattern();
                    self.expect(TokenKind::FatArrow, "'=>' after the pattern");
                    let body = if self.check(TokenKind::LeftBrace) || self.check(TokenKind::Colon) {
                        self.parse_block()
                    } else {
                        let statement = self.parse_statement();
                        let span = statement.span().clone();
                        Block {
                            statements: vec![statement],
                            span,
                        }
                    };
                    let span = pattern.span.merge(&body.span);
                    arms.push(WhenArm {
                        pattern,
                        body,
                        span,
                    });
                }
            }
        }

        let end = self.previous_span();
        Statement::When(WhenStatement {
            scrutinee,
            arms,
            span: start.merge(&end),
        })
    }

    fn parse_while_statement(&mut self) -> Statement {
        let start = self.expect(TokenKind::While, "'while'").span;
        let condition = self.parse_expression();
        let body = self.parse_block();
        let span = start.merge(&body.span);
        Statement::While(WhileStatement {
            condition,
            body,
            span,
        })
    }

    fn parse_for_statement(&mut self) -> Statement {
        let start = self.expect(TokenKind::For, "'for'").span;
        let binding = self.expect(TokenKind::Identifier, "a loop variable").text;
        self.expect(TokenKind::In, "'in'");
        let iterable = self.parse_expression();
        let body = self.parse_block();
        let span = start.merge(&body.span);
        Statement::For(ForStatement {
            binding,
            iterable,
            body,
            span,
        })
    }

    // === Patterns ===

    fn parse_pattern(&mut self) -> Pattern {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Underscore => {
                self.advance();
                Pattern {
                    kind: PatternKind::Wildcard,
                    span: token.span,
                }
            }
            TokenKind::Is => {
                let start = self.advance().span;
                let ty = self.parse_type();
                let name = if self.check(TokenKind::Identifier) {
                    Some(self.advance().text)
                } else {
                    None
                };
                let span = start.merge(&self.previous_span());
                Pattern {
                    kind: PatternKind::TypeTag { ty, name },
                    span,
                }
            }
            TokenKind::LeftParen => {
                let start = self.advance().span;
                let mut elements = Vec::new();
                while !self.check(TokenKind::RightParen) && !self.check(TokenKind::Eof) {
                    elements.push(self.parse_pattern());
                    if !self.match_kind(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RightParen, "')'");
                let span = start.merge(&self.previous_span());
                Pattern {
                    kind: PatternKind::Tuple(elements),
                    span,
                }
            }
            TokenKind::TypeIdentifier => {
                let name_token = self.advance();
                let mut fields = Vec::new();
                if self.match_kind(TokenKind::LeftBrace) {
                    while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
                        let field = self.expect(TokenKind::Identifier, "a field name").text;
                        let sub = if self.match_kind(TokenKind::Colon) {
                            Some(self.parse_pattern())
                        } else {
                            None
                        };
                        fields.push((field, sub));
                        if !self.match_kind(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RightBrace, "'}'");
                }
                let span = name_token.span.merge(&self.previous_span());
                Pattern {
                    kind: PatternKind::Destructure {
                        name: name_token.text,
                        fields,
                    },
                    span,
                }
            }
            TokenKind::Identifier => {
                self.advance();
                Pattern {
                    kind: PatternKind::Binding(token.text),
                    span: token.span,
                }
            }
            kind if kind.is_literal() => {
                self.advance();
                let literal = literal_from_token(&token);
                Pattern {
                    kind: PatternKind::Literal(literal),
                    span: token.span,
                }
            }
            _ => {
                self.error(
                    codes::EXPECTED_PATTERN,
                    token.span.clone(),
                    format!("expected a pattern, found '{}'", describe(&token)),
                );
                self.advance();
                Pattern {
                    kind: PatternKind::Wildcard,
                    span: token.span,
                }
            }
        }
    }

    // === Types ===

    fn parse_type(&mut self) -> TypeExpr {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::At => {
                let start = self.advance().span;
                let inner = self.parse_type();
                let span = start.merge(&inner.span);
                TypeExpr {
                    kind: TypeExprKind::Pointer(Box::new(inner)),
                    span,
                }
            }
            TokenKind::LeftBracket => {
                let start = self.advance().span;
                let inner = self.parse_type();
                self.expect(TokenKind::RightBracket, "']'");
                let span = start.merge(&self.previous_span());
                TypeExpr {
                    kind: TypeExprKind::Slice(Box::new(inner)),
                    span,
                }
            }
            TokenKind::TypeIdentifier | TokenKind::Identifier => {
                let name_token = self.advance();
                let mut generic_args = Vec::new();
                if self.match_kind(TokenKind::Less) {
                    while !self.check(TokenKind::Greater) && !self.check(TokenKind::Eof) {
                        generic_args.push(self.parse_type());
                        if !self.match_kind(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::Greater, "'>'");
                }
                let span = name_token.span.merge(&self.previous_span());
                TypeExpr {
                    kind: TypeExprKind::Named {
                        name: name_token.text,
                        generic_args,
                    },
                    span,
                }
            }
            _ => {
                self.error(
                    codes::EXPECTED_TYPE,
                    token.span.clone(),
                    format!("expected a type, found '{}'", describe(&token)),
                );
                TypeExpr {
                    kind: TypeExprKind::Named {
                        name: "<error>".to_string(),
                        generic_args: vec![],
                    },
                    span: token.span,
                }
            }
        }
    }

    // === Expressions ===
    //
    // Precedence, lowest to highest: range, logical-or, logical-and,
    // logical-not, comparison (chained), bitwise-or, bitwise-xor,
    // bitwise-and, shifts, additive, multiplicative, unary, power,
    // postfix, primary.

    pub fn parse_expression(&mut self) -> Expression {
        self.parse_range()
    }

    /// `a to b [by s]` lowers to a range expression.
    fn parse_range(&mut self) -> Expression {
        let start = self.parse_logical_or();
        if !self.match_kind(TokenKind::To) {
            return start;
        }
        let end = self.parse_logical_or();
        let step = if self.match_kind(TokenKind::By) {
            Some(Box::new(self.parse_logical_or()))
        } else {
            None
        };
        let mut span = start.span.merge(&end.span);
        if let Some(step) = &step {
            span = span.merge(&step.span);
        }
        Expression {
            id: self.fresh_id(),
            kind: ExprKind::Range {
                start: Box::new(start),
                end: Box::new(end),
                step,
            },
            span,
        }
    }

    fn parse_logical_or(&mut self) -> Expression {
        let mut left = self.parse_logical_and();
        while self.check(TokenKind::Or) {
            self.advance();
            let right = self.parse_logical_and();
            left = self.binary(BinaryOp::Or, left, right);
        }
        left
    }

    fn parse_logical_and(&mut self) -> Expression {
        let mut left = self.parse_logical_not();
        while self.check(TokenKind::And) {
            self.advance();
            let right = self.parse_logical_not();
            left = self.binary(BinaryOp::And, left, right);
        }
        left
    }

    fn parse_logical_not(&mut self) -> Expression {
        if self.check(TokenKind::Not) {
            let start = self.advance().span;
            let operand = self.parse_logical_not();
            let span = start.merge(&operand.span);
            return Expression {
                id: self.fresh_id(),
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            };
        }
        self.parse_comparison()
    }

    /// Comparisons chain: `a < b <= c` lowers to `a < b and b <= c`.
    fn parse_comparison(&mut self) -> Expression {
        let first = self.parse_bitwise_or();
        let mut links: Vec<(BinaryOp, Expression)> = Vec::new();
        while let Some(op) = BinaryOp::from_token(self.peek_kind()).filter(BinaryOp::is_comparison)
        {
            self.advance();
            links.push((op, self.parse_bitwise_or()));
        }

        match links.len() {
            0 => first,
            1 => {
                let (op, right) = links.into_iter().next().unwrap();
                self.binary(op, first, right)
            }
            _ => {
                // Each middle operand participates in two comparisons; the
                // clone gets a fresh id so side tables stay unambiguous.
                let mut operands = vec![first];
                let mut ops = Vec::new();
                for (op, operand) in links {
                    ops.push(op);
                    operands.push(operand);
                }
                let mut result: Option<Expression> = None;
                for (index, op) in ops.iter().enumerate() {
                    let mut left = operands[index].clone();
                    left.id = self.fresh_id();
                    let mut right = operands[index + 1].clone();
                    right.id = self.fresh_id();
                    let comparison = self.binary(*op, left, right);
                    result = Some(match result {
                        None => comparison,
                        Some(acc) => self.binary(BinaryOp::And, acc, comparison),
                    });
                }
                result.unwrap()
            }
        }
    }

    fn parse_bitwise_or(&mut self) -> Expression {
        let mut left = self.parse_bitwise_xor();
        while self.check(TokenKind::Pipe) {
            self.advance();
            let right = self.parse_bitwise_xor();
            left = self.binary(BinaryOp::BitOr, left, right);
        }
        left
    }

    fn parse_bitwise_xor(&mut self) -> Expression {
        let mut left = self.parse_bitwise_and();
        while self.check(TokenKind::Caret) {
            self.advance();
            let right = self.parse_bitwise_and();
            left = self.binary(BinaryOp::BitXor, left, right);
        }
        left
    }

    fn parse_bitwise_and(&mut self) -> Expression {
        let mut left = self.parse_shift();
        while self.check(TokenKind::Ampersand) {
            self.advance();
            let right = self.parse_shift();
            left = self.binary(BinaryOp::BitAnd, left, right);
        }
        left
    }

    fn parse_shift(&mut self) -> Expression {
        let mut left = self.parse_additive();
        loop {
            let op = match self.peek_kind() {
                TokenKind::LessLess => BinaryOp::Shl,
                TokenKind::GreaterGreater => BinaryOp::Shr,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive();
            left = self.binary(op, left, right);
        }
        left
    }

    fn parse_additive(&mut self) -> Expression {
        let mut left = self.parse_multiplicative();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                TokenKind::PlusWrap => BinaryOp::AddWrap,
                TokenKind::PlusSaturate => BinaryOp::AddSaturate,
                TokenKind::PlusUnchecked => BinaryOp::AddUnchecked,
                TokenKind::PlusChecked => BinaryOp::AddChecked,
                TokenKind::MinusWrap => BinaryOp::SubWrap,
                TokenKind::MinusSaturate => BinaryOp::SubSaturate,
                TokenKind::MinusUnchecked => BinaryOp::SubUnchecked,
                TokenKind::MinusChecked => BinaryOp::SubChecked,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative();
            left = self.binary(op, left, right);
        }
        left
    }

    fn parse_multiplicative(&mut self) -> Expression {
        let mut left = self.parse_unary();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::SlashSlash => BinaryOp::IntDiv,
                TokenKind::Percent => BinaryOp::Mod,
                TokenKind::StarWrap => BinaryOp::MulWrap,
                TokenKind::StarSaturate => BinaryOp::MulSaturate,
                TokenKind::StarUnchecked => BinaryOp::MulUnchecked,
                TokenKind::StarChecked => BinaryOp::MulChecked,
                TokenKind::SlashSlashWrap => BinaryOp::IntDivWrap,
                TokenKind::SlashSlashSaturate => BinaryOp::IntDivSaturate,
                TokenKind::SlashSlashUnchecked => BinaryOp::IntDivUnchecked,
                TokenKind::SlashSlashChecked => BinaryOp::IntDivChecked,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary();
            left = self.binary(op, left, right);
        }
        left
    }

    fn parse_unary(&mut self) -> Expression {
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let start = self.advance().span;
            let operand = self.parse_unary();
            let span = start.merge(&operand.span);
            return Expression {
                id: self.fresh_id(),
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            };
        }
        self.parse_power()
    }

    /// `**` binds tighter than unary and associates right.
    fn parse_power(&mut self) -> Expression {
        let base = self.parse_postfix();
        if self.check(TokenKind::StarStar) {
            self.advance();
            let exponent = self.parse_unary();
            return self.binary(BinaryOp::Pow, base, exponent);
        }
        base
    }

    fn parse_postfix(&mut self) -> Expression {
        let mut expr = self.parse_primary();
        loop {
            match self.peek_kind() {
                TokenKind::LeftParen => {
                    self.advance();
                    let args = self.parse_arguments();
                    let span = expr.span.merge(&self.previous_span());
                    expr = Expression {
                        id: self.fresh_id(),
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expression();
                    self.expect(TokenKind::RightBracket, "']'");
                    let span = expr.span.merge(&self.previous_span());
                    expr = Expression {
                        id: self.fresh_id(),
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let name_token = if self.check(TokenKind::Identifier)
                        || self.check(TokenKind::TypeIdentifier)
                    {
                        self.advance()
                    } else {
                        self.expect(TokenKind::Identifier, "a member name")
                    };
                    if self.check(TokenKind::Less) && self.looks_like_generic_args() {
                        expr = self.parse_generic_call(Some(Box::new(expr)), name_token);
                    } else if self.match_kind(TokenKind::LeftParen) {
                        let args = self.parse_arguments();
                        let span = expr.span.merge(&self.previous_span());
                        expr = Expression {
                            id: self.fresh_id(),
                            kind: ExprKind::MethodCall {
                                receiver: Box::new(expr),
                                method: name_token.text,
                                args,
                            },
                            span,
                        };
                    } else {
                        let span = expr.span.merge(&name_token.span);
                        expr = Expression {
                            id: self.fresh_id(),
                            kind: ExprKind::Field {
                                object: Box::new(expr),
                                field: name_token.text,
                            },
                            span,
                        };
                    }
                }
                TokenKind::Less => {
                    // `name<T, ...>(...)`: commit only when a balanced
                    // argument list is followed by `(` or `!`; otherwise
                    // this `<` is the comparison operator.
                    let is_callee = matches!(
                        expr.kind,
                        ExprKind::Identifier(_)
                    );
                    if is_callee && self.looks_like_generic_args() {
                        let ExprKind::Identifier(name) = expr.kind.clone() else {
                            unreachable!()
                        };
                        let name_token = Token::new(
                            TokenKind::Identifier,
                            name,
                            expr.span.clone(),
                        );
                        expr = self.parse_generic_call(None, name_token);
                    } else {
                        break;
                    }
                }
                TokenKind::Question => {
                    let end = self.advance().span;
                    let span = expr.span.merge(&end);
                    expr = Expression {
                        id: self.fresh_id(),
                        kind: ExprKind::Propagate {
                            operand: Box::new(expr),
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        expr
    }

    /// Two-token-lookahead test for the generic-call ambiguity: scan a
    /// balanced `<...>` of type-ish tokens and require `(` or `!` after it.
    fn looks_like_generic_args(&self) -> bool {
        debug_assert!(self.check(TokenKind::Less));
        let mut idx = self.pos + 1;
        let mut depth = 1usize;
        while idx < self.tokens.len() {
            match self.tokens[idx].kind {
                TokenKind::Less => depth += 1,
                TokenKind::Greater => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(idx + 1).map(|t| t.kind),
                            Some(TokenKind::LeftParen) | Some(TokenKind::Bang)
                        );
                    }
                }
                TokenKind::TypeIdentifier
                | TokenKind::Identifier
                | TokenKind::Comma
                | TokenKind::Dot
                | TokenKind::At
                | TokenKind::LeftBracket
                | TokenKind::RightBracket => {}
                _ => return false,
            }
            idx += 1;
        }
        false
    }

    fn parse_generic_call(
        &mut self,
        receiver: Option<Box<Expression>>,
        name_token: Token,
    ) -> Expression {
        self.expect(TokenKind::Less, "'<'");
        let mut type_args = Vec::new();
        while !self.check(TokenKind::Greater) && !self.check(TokenKind::Eof) {
            type_args.push(self.parse_type());
            if !self.match_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Greater, "'>'");

        let bang = self.match_kind(TokenKind::Bang);
        self.expect(TokenKind::LeftParen, "'('");
        let args = self.parse_arguments();

        let start = receiver
            .as_ref()
            .map(|r| r.span.clone())
            .unwrap_or_else(|| name_token.span.clone());
        let span = start.merge(&self.previous_span());
        Expression {
            id: self.fresh_id(),
            kind: ExprKind::GenericCall {
                receiver,
                method: name_token.text,
                type_args,
                args,
                bang,
            },
            span,
        }
    }

    /// Arguments after a consumed `(`.
    fn parse_arguments(&mut self) -> Vec<Expression> {
        let mut args = Vec::new();
        while !self.check(TokenKind::RightParen) && !self.check(TokenKind::Eof) {
            args.push(self.parse_expression());
            if !self.match_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RightParen, "')'");
        args
    }

    fn parse_primary(&mut self) -> Expression {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::If => self.parse_conditional(),
            TokenKind::Pipe => self.parse_lambda(),
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression();
                self.expect(TokenKind::RightParen, "')'");
                inner
            }
            TokenKind::Identifier => {
                self.advance();
                Expression {
                    id: self.fresh_id(),
                    kind: ExprKind::Identifier(token.text),
                    span: token.span,
                }
            }
            TokenKind::TypeIdentifier => {
                self.advance();
                Expression {
                    id: self.fresh_id(),
                    kind: ExprKind::Identifier(token.text),
                    span: token.span,
                }
            }
            TokenKind::Me => {
                self.advance();
                Expression {
                    id: self.fresh_id(),
                    kind: ExprKind::Identifier("me".to_string()),
                    span: token.span,
                }
            }
            TokenKind::FormattedTextLiteral => {
                self.advance();
                self.parse_format_text(token)
            }
            kind if kind.is_literal() => {
                self.advance();
                Expression {
                    id: self.fresh_id(),
                    kind: ExprKind::Literal(literal_from_token(&token)),
                    span: token.span,
                }
            }
            _ => {
                self.error(
                    codes::EXPECTED_EXPRESSION,
                    token.span.clone(),
                    format!("expected an expression, found '{}'", describe(&token)),
                );
                Expression {
                    id: self.fresh_id(),
                    kind: ExprKind::Literal(Literal::None),
                    span: token.span,
                }
            }
        }
    }

    /// Expression-level conditional: `if cond then a else b`.
    fn parse_conditional(&mut self) -> Expression {
        let start = self.expect(TokenKind::If, "'if'").span;
        let condition = self.parse_expression();
        self.expect(TokenKind::Then, "'then'");
        let then_value = self.parse_expression();
        self.expect(TokenKind::Else, "'else'");
        let else_value = self.parse_expression();
        let span = start.merge(&else_value.span);
        Expression {
            id: self.fresh_id(),
            kind: ExprKind::Conditional {
                condition: Box::new(condition),
                then_value: Box::new(then_value),
                else_value: Box::new(else_value),
            },
            span,
        }
    }

    /// `|a, b| expr`
    fn parse_lambda(&mut self) -> Expression {
        let start = self.expect(TokenKind::Pipe, "'|'").span;
        let mut params = Vec::new();
        while !self.check(TokenKind::Pipe) && !self.check(TokenKind::Eof) {
            params.push(self.expect(TokenKind::Identifier, "a parameter name").text);
            if !self.match_kind(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Pipe, "'|'");
        let body = self.parse_expression();
        let span = start.merge(&body.span);
        Expression {
            id: self.fresh_id(),
            kind: ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            span,
        }
    }

    /// Parse the captured interpolations of a formatted text literal.
    fn parse_format_text(&mut self, token: Token) -> Expression {
        let Some(LiteralValue::Formatted(parts)) = token.value else {
            return Expression {
                id: self.fresh_id(),
                kind: ExprKind::FormatText { segments: vec![] },
                span: token.span,
            };
        };

        let mut segments = Vec::new();
        for part in parts {
            match part {
                FormatPart::Text(text) => segments.push(FormatSegment::Text(text)),
                FormatPart::Interpolation { source, span } => {
                    let mut sub = Parser::new(&source, self.file.clone(), self.dialect);
                    let mut expression = sub.parse_expression();
                    // Sub-parse positions are snippet-relative; pin the root
                    // to the captured span so diagnostics land in the file.
                    expression.span = span;
                    expression.id = self.fresh_id();
                    for diagnostic in sub.diagnostics {
                        self.diagnostics.push(diagnostic);
                    }
                    segments.push(FormatSegment::Expression(expression));
                }
            }
        }
        Expression {
            id: self.fresh_id(),
            kind: ExprKind::FormatText { segments },
            span: token.span,
        }
    }

    fn binary(&mut self, op: BinaryOp, left: Expression, right: Expression) -> Expression {
        let span = left.span.merge(&right.span);
        Expression {
            id: self.fresh_id(),
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        }
    }
}

/// Short printable form of a token for diagnostics.
fn describe(token: &Token) -> String {
    match token.kind {
        TokenKind::Eof => "end of file".to_string(),
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::Indent => "indent".to_string(),
        TokenKind::Dedent => "dedent".to_string(),
        _ => token.text.clone(),
    }
}

/// Build an AST literal from a literal token.
fn literal_from_token(token: &Token) -> Literal {
    use TokenKind::*;
    match (&token.kind, &token.value) {
        (True, _) => Literal::Bool(true),
        (False, _) => Literal::Bool(false),
        (None, _) => Literal::None,
        (MemorySizeLiteral, Some(LiteralValue::Int(v))) => Literal::MemorySize(*v),
        (DurationLiteral, Some(LiteralValue::Int(v))) => Literal::Duration(*v),
        (kind, Some(LiteralValue::Int(v))) => Literal::Int {
            value: *v,
            kind: *kind,
        },
        (kind, Some(LiteralValue::Float(v))) => Literal::Float {
            value: *v,
            kind: *kind,
        },
        (kind, Some(LiteralValue::Text(v))) => Literal::Text {
            value: v.clone(),
            kind: *kind,
        },
        (kind, Some(LiteralValue::Letter(v))) => Literal::Letter {
            value: *v,
            kind: *kind,
        },
        (_, Some(LiteralValue::Bool(v))) => Literal::Bool(*v),
        _ => Literal::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_source(source: &str) -> (Program, Vec<Diagnostic>) {
        Parser::new(source, "test.rf", Dialect::RazorForge).parse()
    }

    fn parse_ok(source: &str) -> Program {
        let (program, diagnostics) = parse_source(source);
        assert!(
            diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            diagnostics
        );
        program
    }

    fn parse_expr(source: &str) -> Expression {
        let mut parser = Parser::new(source, "test.rf", Dialect::RazorForge);
        let expr = parser.parse_expression();
        assert!(
            parser.diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            parser.diagnostics
        );
        expr
    }

    #[test]
    fn test_parse_brace_function() {
        let program = parse_ok("routine add(a: s32, b: s32) -> s32 { return a + b }");
        assert_eq!(program.declarations.len(), 1);
        let function = program.find_function("add").unwrap();
        assert_eq!(function.params.len(), 2);
        assert_eq!(function.params[0].name, "a");
        assert_eq!(function.params[0].ty.head_name(), "s32");
        assert_eq!(
            function.return_type.as_ref().unwrap().head_name(),
            "s32"
        );
        let body = function.body.as_ref().unwrap();
        assert_eq!(body.statements.len(), 1);
        assert!(matches!(body.statements[0], Statement::Return { .. }));
    }

    #[test]
    fn test_parse_indent_function() {
        let source = "routine add(a: s32, b: s32) -> s32:\n    return a + b\n";
        let program = parse_ok(source);
        let function = program.find_function("add").unwrap();
        assert_eq!(function.body.as_ref().unwrap().statements.len(), 1);
    }

    #[test]
    fn test_both_block_styles_coexist() {
        let source = "routine a() { return 1 }\nroutine b():\n    return 2\n";
        let program = parse_ok(source);
        assert_eq!(program.declarations.len(), 2);
    }

    #[test]
    fn test_fallible_marker() {
        let program = parse_ok("routine parse!(input: text) -> s32 { return 0 }");
        let function = program.find_function("parse").unwrap();
        assert!(function.can_fail);
        assert!(!function.generated);
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let expr = parse_expr("1 + 2 * 3");
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_power_is_right_associative() {
        let expr = parse_expr("2 ** 3 ** 4");
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Pow);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn test_comparison_chain_lowers_to_and() {
        let expr = parse_expr("a < b <= c");
        let ExprKind::Binary { op, left, right } = &expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::And);
        assert!(matches!(
            left.kind,
            ExprKind::Binary {
                op: BinaryOp::Lt,
                ..
            }
        ));
        let ExprKind::Binary {
            op: right_op,
            left: right_left,
            ..
        } = &right.kind
        else {
            panic!("expected comparison on the right");
        };
        assert_eq!(*right_op, BinaryOp::Le);
        // The middle operand is duplicated into both comparisons
        assert!(matches!(&right_left.kind, ExprKind::Identifier(n) if n == "b"));
    }

    #[test]
    fn test_overflow_operators_parse() {
        let expr = parse_expr("a +% b");
        assert!(matches!(
            expr.kind,
            ExprKind::Binary {
                op: BinaryOp::AddWrap,
                ..
            }
        ));
        let expr = parse_expr("a //? b");
        assert!(matches!(
            expr.kind,
            ExprKind::Binary {
                op: BinaryOp::IntDivChecked,
                ..
            }
        ));
    }

    #[test]
    fn test_conditional_expression() {
        let expr = parse_expr("if ready then 1 else 2");
        assert!(matches!(expr.kind, ExprKind::Conditional { .. }));
    }

    #[test]
    fn test_range_expression() {
        let expr = parse_expr("1 to 10 by 2");
        let ExprKind::Range { step, .. } = &expr.kind else {
            panic!("expected range");
        };
        assert!(step.is_some());
        let expr = parse_expr("0 to n");
        assert!(matches!(expr.kind, ExprKind::Range { step: None, .. }));
    }

    #[test]
    fn test_generic_call_vs_comparison() {
        // Balanced <...> followed by ( commits to the generic form
        let expr = parse_expr("max<s32>(1, 2)");
        let ExprKind::GenericCall {
            method,
            type_args,
            args,
            bang,
            ..
        } = &expr.kind
        else {
            panic!("expected generic call, got {:?}", expr.kind);
        };
        assert_eq!(method, "max");
        assert_eq!(type_args.len(), 1);
        assert_eq!(args.len(), 2);
        assert!(!bang);

        // Plain less-than stays a comparison
        let expr = parse_expr("a < b");
        assert!(matches!(
            expr.kind,
            ExprKind::Binary {
                op: BinaryOp::Lt,
                ..
            }
        ));

        // ... even when it superficially resembles generics
        let expr = parse_expr("a < b > c");
        assert!(matches!(expr.kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn test_generic_intrinsic_call_with_bang() {
        let expr = parse_expr("write_as<s32>!(addr, 999)");
        let ExprKind::GenericCall {
            method,
            bang,
            type_args,
            args,
            ..
        } = &expr.kind
        else {
            panic!("expected generic call");
        };
        assert_eq!(method, "write_as");
        assert!(bang);
        assert_eq!(type_args[0].head_name(), "s32");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_generic_method_call() {
        let expr = parse_expr("list.map<s64>(f)");
        let ExprKind::GenericCall {
            receiver, method, ..
        } = &expr.kind
        else {
            panic!("expected generic method call");
        };
        assert!(receiver.is_some());
        assert_eq!(method, "map");
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse_expr("table[3].name.len()");
        let ExprKind::MethodCall { receiver, method, .. } = &expr.kind else {
            panic!("expected method call");
        };
        assert_eq!(method, "len");
        assert!(matches!(receiver.kind, ExprKind::Field { .. }));
    }

    #[test]
    fn test_propagate_postfix() {
        let expr = parse_expr("fetch()?");
        assert!(matches!(expr.kind, ExprKind::Propagate { .. }));
    }

    #[test]
    fn test_danger_block_statement() {
        let source =
            "routine test() { danger! { let addr = 0x1000; write_as<s32>!(addr, 999) } }";
        let program = parse_ok(source);
        let body = program
            .find_function("test")
            .unwrap()
            .body
            .as_ref()
            .unwrap();
        let Statement::Danger { body: danger, .. } = &body.statements[0] else {
            panic!("expected danger block");
        };
        assert_eq!(danger.statements.len(), 2);
    }

    #[test]
    fn test_if_elif_else() {
        let source = "routine f(x: s64) {\n    if x > 10 { big() } elif x > 5 { mid() } else { small() }\n}";
        let program = parse_ok(source);
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        let Statement::If(if_statement) = &body.statements[0] else {
            panic!("expected if");
        };
        assert_eq!(if_statement.branches.len(), 2);
        assert!(if_statement.else_block.is_some());
    }

    #[test]
    fn test_indented_if_elif_else() {
        let source = "routine f(x: s64):\n    if x > 10:\n        big()\n    elif x > 5:\n        mid()\n    else:\n        small()\n";
        let program = parse_ok(source);
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        let Statement::If(if_statement) = &body.statements[0] else {
            panic!("expected if");
        };
        assert_eq!(if_statement.branches.len(), 2);
        assert!(if_statement.else_block.is_some());
    }

    #[test]
    fn test_while_for_loop() {
        let source = "routine f() {\n    while going { step() }\n    for i in 0 to 10 by 2 { use(i) }\n    loop { spin() }\n}";
        let program = parse_ok(source);
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert!(matches!(body.statements[0], Statement::While(_)));
        let Statement::For(for_statement) = &body.statements[1] else {
            panic!("expected for");
        };
        assert_eq!(for_statement.binding, "i");
        assert!(matches!(for_statement.iterable.kind, ExprKind::Range { .. }));
        assert!(matches!(body.statements[2], Statement::Loop(_)));
    }

    #[test]
    fn test_when_statement_patterns() {
        let source = r#"routine f(shape: Shape) {
    when shape {
        Circle { radius } => area(radius)
        is Square s => side(s)
        0 => zero()
        _ => fallback()
    }
}"#;
        let program = parse_ok(source);
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        let Statement::When(when) = &body.statements[0] else {
            panic!("expected when");
        };
        assert_eq!(when.arms.len(), 4);
        assert!(matches!(
            when.arms[0].pattern.kind,
            PatternKind::Destructure { .. }
        ));
        assert!(matches!(when.arms[1].pattern.kind, PatternKind::TypeTag { .. }));
        assert!(matches!(when.arms[2].pattern.kind, PatternKind::Literal(_)));
        assert!(matches!(when.arms[3].pattern.kind, PatternKind::Wildcard));
    }

    #[test]
    fn test_compound_assignment() {
        let source = "routine f() { x += 2 }";
        let program = parse_ok(source);
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        let Statement::Assignment { op, .. } = &body.statements[0] else {
            panic!("expected assignment");
        };
        assert_eq!(*op, Some(BinaryOp::Add));
    }

    #[test]
    fn test_record_declaration() {
        let source = "record Point {\n    x: f64,\n    y: f64,\n    routine length(me) -> f64 { return 0.0 }\n}";
        let program = parse_ok(source);
        let Declaration::Record(record) = &program.declarations[0] else {
            panic!("expected record");
        };
        assert_eq!(record.name, "Point");
        assert_eq!(record.fields.len(), 2);
        assert_eq!(record.methods.len(), 1);
    }

    #[test]
    fn test_entity_with_parent() {
        let source = "entity Dog from Animal { name: text }";
        let program = parse_ok(source);
        let Declaration::Entity(entity) = &program.declarations[0] else {
            panic!("expected entity");
        };
        assert_eq!(entity.parent.as_ref().unwrap().head_name(), "Animal");
    }

    #[test]
    fn test_choice_declaration() {
        let source = "choice Shape {\n    Circle { radius: f64 },\n    Square { side: f64 },\n    Empty\n}";
        let program = parse_ok(source);
        let Declaration::Choice(choice) = &program.declarations[0] else {
            panic!("expected choice");
        };
        assert_eq!(choice.variants.len(), 3);
        assert_eq!(choice.variants[0].fields.len(), 1);
        assert!(choice.variants[2].fields.is_empty());
    }

    #[test]
    fn test_protocol_with_abstract_and_default_methods() {
        let source =
            "protocol Drawable {\n    routine draw(me)\n    routine redraw(me) { me.draw() }\n}";
        let program = parse_ok(source);
        let Declaration::Protocol(protocol) = &program.declarations[0] else {
            panic!("expected protocol");
        };
        assert_eq!(protocol.methods.len(), 2);
        assert!(protocol.methods[0].body.is_none());
        assert!(protocol.methods[1].body.is_some());
    }

    #[test]
    fn test_external_with_convention() {
        let source = "external(\"stdcall\") routine GetTick() -> u32";
        let program = parse_ok(source);
        let Declaration::External(external) = &program.declarations[0] else {
            panic!("expected external");
        };
        assert_eq!(external.convention.as_deref(), Some("stdcall"));
        assert!(external.return_type.is_some());
    }

    #[test]
    fn test_import_paths() {
        let program = parse_ok("import math.vector as vec");
        let Declaration::Import(import) = &program.declarations[0] else {
            panic!("expected import");
        };
        assert_eq!(import.dotted(), "math.vector");
        assert_eq!(import.alias.as_deref(), Some("vec"));
    }

    #[test]
    fn test_redefine_alias() {
        let program = parse_ok("redefine Id = u64");
        let Declaration::Redefine(redefine) = &program.declarations[0] else {
            panic!("expected redefine");
        };
        assert_eq!(redefine.name, "Id");
        assert_eq!(redefine.target.head_name(), "u64");
    }

    #[test]
    fn test_pointer_and_slice_types() {
        let program = parse_ok("routine f(p: @s32, xs: [u8]) { return }");
        let function = program.find_function("f").unwrap();
        assert!(matches!(
            function.params[0].ty.kind,
            TypeExprKind::Pointer(_)
        ));
        assert!(matches!(function.params[1].ty.kind, TypeExprKind::Slice(_)));
    }

    #[test]
    fn test_doc_comment_attaches_to_declaration() {
        let source = "## Adds two numbers.\n## Returns their sum.\nroutine add(a: s64, b: s64) -> s64 { return a + b }";
        let program = parse_ok(source);
        let function = program.find_function("add").unwrap();
        assert_eq!(
            function.doc.as_deref(),
            Some("Adds two numbers.\nReturns their sum.")
        );
    }

    #[test]
    fn test_format_text_expression() {
        let expr = parse_expr(r#"f"total {a + b} items""#);
        let ExprKind::FormatText { segments } = &expr.kind else {
            panic!("expected format text");
        };
        assert_eq!(segments.len(), 3);
        assert!(matches!(&segments[1], FormatSegment::Expression(e)
            if matches!(e.kind, ExprKind::Binary { op: BinaryOp::Add, .. })));
    }

    #[test]
    fn test_lambda_expression() {
        let expr = parse_expr("|a, b| a + b");
        let ExprKind::Lambda { params, .. } = &expr.kind else {
            panic!("expected lambda");
        };
        assert_eq!(params, &["a", "b"]);
    }

    #[test]
    fn test_error_recovery_keeps_later_declarations() {
        let source = "routine good() { return 1 }\nroutine ) broken\nroutine also_good() { return 2 }";
        let (program, diagnostics) = parse_source(source);
        assert!(!diagnostics.is_empty());
        assert!(program.find_function("good").is_some());
        assert!(program.find_function("also_good").is_some());
    }

    #[test]
    fn test_node_spans_nest() {
        let program = parse_ok("routine f() { return 1 + 2 }");
        let function = program.find_function("f").unwrap();
        let body = function.body.as_ref().unwrap();
        assert!(function.span.contains(&body.span));
        assert!(body.span.contains(body.statements[0].span()));
    }

    #[test]
    fn test_suflae_recipe_keyword() {
        let source = "recipe greet():\n    wave()\n";
        let (program, diagnostics) = Parser::new(source, "test.sf", Dialect::Suflae).parse();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert!(program.find_function("greet").is_some());
    }

    #[test]
    fn test_statement_separators_with_semicolons() {
        let source = "routine f() { a(); b(); c() }";
        let program = parse_ok(source);
        let body = program.find_function("f").unwrap().body.as_ref().unwrap();
        assert_eq!(body.statements.len(), 3);
    }
}
