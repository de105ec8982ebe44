use crate::{
    ast::{BinaryOp, Expr, ExprKind, Literal, Param, Stmt, StmtKind, UnaryOp},
    diagnostics::{SourceSpan, SyntaxError},
    lexer::{Keyword, Lexer, Token, TokenKind},
};

pub fn parse_program(source: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut items = Vec::new();
        while !self.check(TokenKind::Eof) {
            if self.matches(TokenKind::Newline) {
                continue;
            }
            self.parse_statement(&mut items)?;
        }
        Ok(items)
    }

    fn parse_statement(&mut self, out: &mut Vec<Stmt>) -> Result<(), SyntaxError> {
        if let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Keyword(Keyword::Def) => {
                    out.push(self.parse_function()?);
                    return Ok(());
                }
                TokenKind::Keyword(Keyword::If) => {
                    out.push(self.parse_if()?);
                    return Ok(());
                }
                TokenKind::Keyword(Keyword::While) => {
                    out.push(self.parse_while()?);
                    return Ok(());
                }
                TokenKind::Keyword(Keyword::For) => {
                    out.push(self.parse_for()?);
                    return Ok(());
                }
                _ => {}
            }
        }
        self.parse_simple_line(out)
    }

    /// One or more `;`-separated simple statements terminated by a newline.
    fn parse_simple_line(&mut self, out: &mut Vec<Stmt>) -> Result<(), SyntaxError> {
        loop {
            out.push(self.parse_simple_stmt()?);
            if self.matches(TokenKind::Semicolon) {
                if self.check(TokenKind::Newline) || self.check(TokenKind::Eof) {
                    break;
                }
                continue;
            }
            break;
        }
        if !self.matches(TokenKind::Newline) && !self.check(TokenKind::Eof) {
            let token = self.peek().cloned();
            return Err(match token {
                Some(tok) => self.error(&tok, "expected end of line"),
                None => self.error_eof("expected end of line"),
            });
        }
        Ok(())
    }

    fn parse_simple_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        if let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Keyword(Keyword::Return) => {
                    let token = self.advance();
                    let expr = if self.check(TokenKind::Newline)
                        || self.check(TokenKind::Semicolon)
                        || self.check(TokenKind::Eof)
                    {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    let end = expr.as_ref().map(|e| e.span.end).unwrap_or(token.span.end);
                    return Ok(Stmt {
                        span: SourceSpan::new(token.span.start, end),
                        kind: StmtKind::Return(expr),
                    });
                }
                TokenKind::Keyword(Keyword::Pass) => {
                    let token = self.advance();
                    return Ok(Stmt {
                        span: token.span,
                        kind: StmtKind::Pass,
                    });
                }
                TokenKind::Keyword(Keyword::Break) => {
                    let token = self.advance();
                    return Ok(Stmt {
                        span: token.span,
                        kind: StmtKind::Break,
                    });
                }
                TokenKind::Keyword(Keyword::Continue) => {
                    let token = self.advance();
                    return Ok(Stmt {
                        span: token.span,
                        kind: StmtKind::Continue,
                    });
                }
                TokenKind::Keyword(Keyword::Global) => {
                    let token = self.advance();
                    let mut names = Vec::new();
                    let mut end = token.span.end;
                    loop {
                        let name = self.consume_identifier("expected name after `global`")?;
                        end = name.span.end;
                        names.push(name.lexeme.clone());
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                    return Ok(Stmt {
                        span: SourceSpan::new(token.span.start, end),
                        kind: StmtKind::Global(names),
                    });
                }
                _ => {}
            }
        }
        self.parse_expression_statement()
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let expr = self.parse_expression()?;
        if self.matches(TokenKind::Assign) {
            let equals = self.previous().span;
            self.check_assign_target(&expr, equals)?;
            let value = self.parse_expression()?;
            return Ok(Stmt {
                span: SourceSpan::new(expr.span.start, value.span.end),
                kind: StmtKind::Assign {
                    target: expr,
                    value,
                },
            });
        }
        let aug_op = if self.matches(TokenKind::PlusAssign) {
            Some(BinaryOp::Add)
        } else if self.matches(TokenKind::MinusAssign) {
            Some(BinaryOp::Sub)
        } else if self.matches(TokenKind::StarAssign) {
            Some(BinaryOp::Mul)
        } else if self.matches(TokenKind::SlashAssign) {
            Some(BinaryOp::Div)
        } else {
            None
        };
        if let Some(op) = aug_op {
            let equals = self.previous().span;
            self.check_assign_target(&expr, equals)?;
            let value = self.parse_expression()?;
            return Ok(Stmt {
                span: SourceSpan::new(expr.span.start, value.span.end),
                kind: StmtKind::AugAssign {
                    target: expr,
                    op,
                    value,
                },
            });
        }
        Ok(Stmt {
            span: expr.span,
            kind: StmtKind::Expr(expr),
        })
    }

    fn check_assign_target(&self, target: &Expr, equals: SourceSpan) -> Result<(), SyntaxError> {
        match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Index { .. } => Ok(()),
            _ => Err(SyntaxError::new("invalid assignment target", equals)),
        }
    }

    /// A colon followed by either an indented block or inline simple
    /// statements on the same line.
    fn parse_suite(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.consume(TokenKind::Colon, "expected `:`")?;
        let mut body = Vec::new();
        if self.matches(TokenKind::Newline) {
            self.consume(TokenKind::Indent, "expected an indented block")?;
            while !self.check(TokenKind::Dedent) && !self.check(TokenKind::Eof) {
                if self.matches(TokenKind::Newline) {
                    continue;
                }
                self.parse_statement(&mut body)?;
            }
            self.consume(TokenKind::Dedent, "expected end of block")?;
        } else {
            self.parse_simple_line(&mut body)?;
        }
        if body.is_empty() {
            let token = self.previous().clone();
            return Err(self.error(&token, "expected at least one statement in block"));
        }
        Ok(body)
    }

    fn parse_function(&mut self) -> Result<Stmt, SyntaxError> {
        let def_token = self.consume_keyword(Keyword::Def)?;
        let name_token = self.consume_identifier("expected function name")?;
        self.consume(TokenKind::LParen, "expected `(` after function name")?;
        let params = self.parse_params(TokenKind::RParen)?;
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        let body = self.parse_suite()?;
        let end = body.last().map(|s| s.span.end).unwrap_or(def_token.span.end);
        Ok(Stmt {
            span: SourceSpan::new(def_token.span.start, end),
            kind: StmtKind::FunctionDef {
                name: name_token.lexeme.clone(),
                params,
                body,
            },
        })
    }

    fn parse_params(&mut self, terminator: TokenKind) -> Result<Vec<Param>, SyntaxError> {
        let mut params: Vec<Param> = Vec::new();
        if self.check(terminator) {
            return Ok(params);
        }
        loop {
            let name_token = self.consume_identifier("expected parameter name")?;
            let default = if self.matches(TokenKind::Assign) {
                Some(self.parse_expression()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error(
                        &name_token,
                        "parameter without a default follows a parameter with one",
                    ));
                }
                None
            };
            params.push(Param {
                name: name_token.lexeme.clone(),
                default,
                span: name_token.span,
            });
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_if(&mut self) -> Result<Stmt, SyntaxError> {
        let if_token = self.consume_keyword(Keyword::If)?;
        let mut branches = Vec::new();
        let condition = self.parse_expression()?;
        let body = self.parse_suite()?;
        let mut end = body.last().map(|s| s.span.end).unwrap_or(if_token.span.end);
        branches.push((condition, body));
        let mut else_body = None;
        loop {
            if self.matches_keyword(Keyword::Elif) {
                let condition = self.parse_expression()?;
                let body = self.parse_suite()?;
                end = body.last().map(|s| s.span.end).unwrap_or(end);
                branches.push((condition, body));
            } else if self.matches_keyword(Keyword::Else) {
                let body = self.parse_suite()?;
                end = body.last().map(|s| s.span.end).unwrap_or(end);
                else_body = Some(body);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt {
            span: SourceSpan::new(if_token.span.start, end),
            kind: StmtKind::If {
                branches,
                else_body,
            },
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, SyntaxError> {
        let token = self.consume_keyword(Keyword::While)?;
        let condition = self.parse_expression()?;
        let body = self.parse_suite()?;
        let end = body.last().map(|s| s.span.end).unwrap_or(token.span.end);
        Ok(Stmt {
            span: SourceSpan::new(token.span.start, end),
            kind: StmtKind::While { condition, body },
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, SyntaxError> {
        let token = self.consume_keyword(Keyword::For)?;
        let binding = self.consume_identifier("expected loop variable")?;
        self.consume_keyword(Keyword::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_suite()?;
        let end = body.last().map(|s| s.span.end).unwrap_or(token.span.end);
        Ok(Stmt {
            span: SourceSpan::new(token.span.start, end),
            kind: StmtKind::For {
                binding: binding.lexeme.clone(),
                iterable,
                body,
            },
        })
    }

    fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        if self.check(TokenKind::Keyword(Keyword::Lambda)) {
            return self.parse_lambda();
        }
        self.parse_or()
    }

    fn parse_lambda(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.consume_keyword(Keyword::Lambda)?;
        let params = if self.check(TokenKind::Colon) {
            Vec::new()
        } else {
            self.parse_params(TokenKind::Colon)?
        };
        self.consume(TokenKind::Colon, "expected `:` in lambda")?;
        let body = self.parse_expression()?;
        Ok(Expr {
            span: SourceSpan::new(token.span.start, body.span.end),
            kind: ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
        })
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_and()?;
        while self.matches_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right);
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_not()?;
        while self.matches_keyword(Keyword::And) {
            let right = self.parse_not()?;
            expr = binary(BinaryOp::And, expr, right);
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr, SyntaxError> {
        if self.matches_keyword(Keyword::Not) {
            let start = self.previous().span.start;
            let operand = self.parse_not()?;
            return Ok(Expr {
                span: SourceSpan::new(start, operand.span.end),
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_term()?;
        while let Some(op) = if self.matches(TokenKind::EqEq) {
            Some(BinaryOp::Eq)
        } else if self.matches(TokenKind::NotEq) {
            Some(BinaryOp::NotEq)
        } else if self.matches(TokenKind::LessEq) {
            Some(BinaryOp::LtEq)
        } else if self.matches(TokenKind::GreaterEq) {
            Some(BinaryOp::GtEq)
        } else if self.matches(TokenKind::Less) {
            Some(BinaryOp::Lt)
        } else if self.matches(TokenKind::Greater) {
            Some(BinaryOp::Gt)
        } else {
            None
        } {
            let right = self.parse_term()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_factor()?;
        loop {
            if self.matches(TokenKind::Plus) {
                let right = self.parse_factor()?;
                expr = binary(BinaryOp::Add, expr, right);
            } else if self.matches(TokenKind::Minus) {
                let right = self.parse_factor()?;
                expr = binary(BinaryOp::Sub, expr, right);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = if self.matches(TokenKind::Star) {
                BinaryOp::Mul
            } else if self.matches(TokenKind::SlashSlash) {
                BinaryOp::FloorDiv
            } else if self.matches(TokenKind::Slash) {
                BinaryOp::Div
            } else if self.matches(TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.parse_unary()?;
            expr = binary(op, expr, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.matches(TokenKind::Minus) {
            let start = self.previous().span.start;
            let operand = self.parse_unary()?;
            return Ok(Expr {
                span: SourceSpan::new(start, operand.span.end),
                kind: ExprKind::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                },
            });
        }
        if self.matches(TokenKind::Plus) {
            let start = self.previous().span.start;
            let operand = self.parse_unary()?;
            return Ok(Expr {
                span: SourceSpan::new(start, operand.span.end),
                kind: ExprKind::Unary {
                    op: UnaryOp::Pos,
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.parse_postfix()?;
        if self.matches(TokenKind::StarStar) {
            let exponent = self.parse_unary()?;
            return Ok(binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.matches(TokenKind::LParen) {
                let (args, kwargs) = self.parse_call_args()?;
                let rparen = self.consume(TokenKind::RParen, "expected `)` after arguments")?;
                expr = Expr {
                    span: SourceSpan::new(expr.span.start, rparen.span.end),
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                        kwargs,
                    },
                };
            } else if self.matches(TokenKind::LBracket) {
                expr = self.parse_subscript(expr)?;
            } else if self.matches(TokenKind::Dot) {
                let name = self.consume_identifier("expected attribute name after `.`")?;
                expr = Expr {
                    span: SourceSpan::new(expr.span.start, name.span.end),
                    kind: ExprKind::Attribute {
                        target: Box::new(expr),
                        name: name.lexeme.clone(),
                    },
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), SyntaxError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        if self.check(TokenKind::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            let is_kwarg = self.check(TokenKind::Identifier)
                && self.peek_next().map(|t| t.kind == TokenKind::Assign) == Some(true);
            if is_kwarg {
                let name = self.advance();
                self.consume(TokenKind::Assign, "expected `=` in keyword argument")?;
                let value = self.parse_expression()?;
                if kwargs.iter().any(|(existing, _)| *existing == name.lexeme) {
                    return Err(self.error(&name, "duplicate keyword argument"));
                }
                kwargs.push((name.lexeme.clone(), value));
            } else {
                if !kwargs.is_empty() {
                    let token = self.peek().cloned();
                    return Err(match token {
                        Some(tok) => {
                            self.error(&tok, "positional argument follows keyword argument")
                        }
                        None => self.error_eof("positional argument follows keyword argument"),
                    });
                }
                args.push(self.parse_expression()?);
            }
            if !self.matches(TokenKind::Comma) {
                break;
            }
            if self.check(TokenKind::RParen) {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self, target: Expr) -> Result<Expr, SyntaxError> {
        if self.matches(TokenKind::Colon) {
            let upper = if self.check(TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            let rbracket = self.consume(TokenKind::RBracket, "expected `]` after slice")?;
            return Ok(Expr {
                span: SourceSpan::new(target.span.start, rbracket.span.end),
                kind: ExprKind::Slice {
                    target: Box::new(target),
                    lower: None,
                    upper,
                },
            });
        }
        let first = self.parse_expression()?;
        if self.matches(TokenKind::Colon) {
            let upper = if self.check(TokenKind::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            let rbracket = self.consume(TokenKind::RBracket, "expected `]` after slice")?;
            return Ok(Expr {
                span: SourceSpan::new(target.span.start, rbracket.span.end),
                kind: ExprKind::Slice {
                    target: Box::new(target),
                    lower: Some(Box::new(first)),
                    upper,
                },
            });
        }
        let rbracket = self.consume(TokenKind::RBracket, "expected `]` after index")?;
        Ok(Expr {
            span: SourceSpan::new(target.span.start, rbracket.span.end),
            kind: ExprKind::Index {
                target: Box::new(target),
                index: Box::new(first),
            },
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.error_eof("unexpected end of expression")),
        };
        match &token.kind {
            TokenKind::Int => {
                self.advance();
                let digits = token.lexeme.replace('_', "");
                let value: i64 = digits
                    .parse()
                    .map_err(|_| self.error(&token, "integer literal out of range"))?;
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Literal(Literal::Int(value)),
                })
            }
            TokenKind::Float => {
                self.advance();
                let digits = token.lexeme.replace('_', "");
                let value: f64 = digits
                    .parse()
                    .map_err(|_| self.error(&token, "invalid float literal"))?;
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Literal(Literal::Float(value)),
                })
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Literal(Literal::Str(token.lexeme.clone())),
                })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Literal(Literal::Bool(true)),
                })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Literal(Literal::Bool(false)),
                })
            }
            TokenKind::Keyword(Keyword::None) => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Literal(Literal::None),
                })
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr {
                    span: token.span,
                    kind: ExprKind::Name(token.lexeme.clone()),
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.consume(TokenKind::RParen, "expected `)` after expression")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                        if self.check(TokenKind::RBracket) {
                            break;
                        }
                    }
                }
                let rbracket = self.consume(TokenKind::RBracket, "expected `]` after list")?;
                Ok(Expr {
                    span: SourceSpan::new(token.span.start, rbracket.span.end),
                    kind: ExprKind::List(elements),
                })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                if !self.check(TokenKind::RBrace) {
                    loop {
                        let key = self.parse_expression()?;
                        self.consume(TokenKind::Colon, "expected `:` in dict literal")?;
                        let value = self.parse_expression()?;
                        entries.push((key, value));
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                        if self.check(TokenKind::RBrace) {
                            break;
                        }
                    }
                }
                let rbrace = self.consume(TokenKind::RBrace, "expected `}` after dict")?;
                Ok(Expr {
                    span: SourceSpan::new(token.span.start, rbrace.span.end),
                    kind: ExprKind::Dict(entries),
                })
            }
            TokenKind::Keyword(Keyword::Lambda) => self.parse_lambda(),
            _ => Err(self.error(&token, "unexpected token in expression")),
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_keyword(&mut self, keyword: Keyword) -> bool {
        if let Some(Token {
            kind: TokenKind::Keyword(k),
            ..
        }) = self.peek()
        {
            if *k == keyword {
                self.advance();
                return true;
            }
        }
        false
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> Result<Token, SyntaxError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self
                .peek()
                .cloned()
                .map(|tok| self.error(&tok, message))
                .unwrap_or_else(|| self.error_eof(message)))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<Token, SyntaxError> {
        self.consume(
            TokenKind::Keyword(keyword),
            &format!("expected keyword `{keyword:?}`"),
        )
    }

    fn consume_identifier(&mut self, message: &str) -> Result<Token, SyntaxError> {
        self.consume(TokenKind::Identifier, message)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().map(|t| t.kind == kind).unwrap_or(false)
    }

    fn advance(&mut self) -> Token {
        if self.current < self.tokens.len() {
            self.current += 1;
        }
        self.previous().clone()
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn peek_next(&self) -> Option<&Token> {
        self.tokens.get(self.current + 1)
    }

    fn error(&self, token: &Token, message: &str) -> SyntaxError {
        SyntaxError::new(message, token.span)
    }

    fn error_eof(&self, message: &str) -> SyntaxError {
        let end = self
            .tokens
            .last()
            .map(|t| t.span.end)
            .unwrap_or_default();
        SyntaxError::new(message, SourceSpan::new(end, end))
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr {
        span: SourceSpan::new(left.span.start, right.span.end),
        kind: ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}
