//! Recursive-descent parser for the HogTrace surface language (spec §4.1).
//!
//! Precedence climbing implements the expression grammar directly as a
//! chain of tier functions (`parse_or` down to `parse_unary`/`parse_postfix`)
//! rather than a table-driven Pratt parser — plain and easy to audit for a
//! grammar this small.

use crate::ast::{AstProbe, AstProbeSpec, AstProgram, BinaryOp, CaptureArg, Expr, ProbeTarget, Provider, SampleRate, Stmt};
use crate::error::{Location, SyntaxError};
use crate::lexer::{Lexer, Token, TokenKind};

pub fn parse(source: &str) -> Result<AstProgram, SyntaxError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser { tokens, pos: 0 }.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn here(&self) -> Location {
        self.tokens[self.pos].at
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<Token, SyntaxError> {
        if self.peek() == kind {
            Ok(self.advance())
        } else {
            Err(SyntaxError::new(
                format!("expected {what}, found {:?}", self.peek()),
                self.here(),
            ))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Location), SyntaxError> {
        let at = self.here();
        match self.peek().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, at))
            }
            other => Err(SyntaxError::new(format!("expected {what}, found {other:?}"), at)),
        }
    }

    fn parse_program(&mut self) -> Result<AstProgram, SyntaxError> {
        let mut probes = Vec::new();
        while *self.peek() != TokenKind::Eof {
            probes.push(self.parse_probe()?);
        }
        Ok(AstProgram { probes })
    }

    fn parse_probe(&mut self) -> Result<AstProbe, SyntaxError> {
        let at = self.here();
        let spec = self.parse_probe_spec()?;
        let predicate = if *self.peek() == TokenKind::Slash {
            self.advance();
            let expr = self.parse_expr()?;
            self.expect(&TokenKind::Slash, "closing '/' for predicate")?;
            Some(expr)
        } else {
            None
        };
        let body = self.parse_action()?;
        Ok(AstProbe {
            spec,
            predicate,
            body,
            at,
        })
    }

    fn parse_probe_spec(&mut self) -> Result<AstProbeSpec, SyntaxError> {
        let at = self.here();
        let provider = match self.peek() {
            TokenKind::KwFn => Provider::Fn,
            TokenKind::KwPy => Provider::Py,
            other => {
                return Err(SyntaxError::new(
                    format!("expected probe provider 'fn' or 'py', found {other:?}"),
                    at,
                ));
            }
        };
        self.advance();
        self.expect(&TokenKind::Colon, "':' after provider")?;

        let mut specifier = String::new();
        loop {
            match self.peek().clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    specifier.push_str(&name);
                }
                TokenKind::Star => {
                    self.advance();
                    specifier.push('*');
                    break;
                }
                other => {
                    return Err(SyntaxError::new(
                        format!("expected identifier in probe specifier, found {other:?}"),
                        self.here(),
                    ));
                }
            }
            if *self.peek() == TokenKind::Dot {
                self.advance();
                specifier.push('.');
            } else {
                break;
            }
        }

        self.expect(&TokenKind::Colon, "':' before probe point")?;
        let target = self.parse_probe_target()?;

        Ok(AstProbeSpec {
            provider,
            specifier,
            target,
            at,
        })
    }

    fn parse_probe_target(&mut self) -> Result<ProbeTarget, SyntaxError> {
        let at = self.here();
        let is_entry = match self.peek() {
            TokenKind::KwEntry => true,
            TokenKind::KwExit => false,
            other => {
                return Err(SyntaxError::new(
                    format!("expected probe point 'entry' or 'exit', found {other:?}"),
                    at,
                ));
            }
        };
        self.advance();
        if *self.peek() == TokenKind::Plus {
            self.advance();
            let offset_at = self.here();
            let offset = match self.advance().kind {
                TokenKind::Int(n) if n >= 0 => n as u32,
                _ => return Err(SyntaxError::new("expected non-negative integer offset", offset_at)),
            };
            Ok(if is_entry {
                ProbeTarget::EntryOffset(offset)
            } else {
                ProbeTarget::ExitOffset(offset)
            })
        } else {
            Ok(if is_entry { ProbeTarget::Entry } else { ProbeTarget::Exit })
        }
    }

    fn parse_action(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(&TokenKind::LBrace, "'{' to start probe action")?;
        let mut stmts = Vec::new();
        while *self.peek() != TokenKind::RBrace {
            stmts.push(self.parse_stmt()?);
        }
        self.advance(); // '}'
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let at = self.here();
        match self.peek() {
            TokenKind::Dollar => self.parse_request_assign(at),
            TokenKind::KwSample => self.parse_sample(at),
            TokenKind::KwCapture | TokenKind::KwSend => self.parse_capture(at),
            other => Err(SyntaxError::new(
                format!("expected '$req.', 'sample', 'capture', or 'send', found {other:?}"),
                at,
            )),
        }
    }

    fn parse_request_assign(&mut self, at: Location) -> Result<Stmt, SyntaxError> {
        self.advance(); // '$'
        let (root, root_at) = self.expect_ident("'req' or 'request'")?;
        if root != "req" && root != "request" {
            return Err(SyntaxError::new(
                format!("expected 'req' or 'request', found '{root}'"),
                root_at,
            ));
        }
        self.expect(&TokenKind::Dot, "'.' after '$req'")?;
        let (name, _) = self.expect_ident("request-variable name")?;
        self.expect(&TokenKind::Assign, "'=' in request assignment")?;
        let value = self.parse_expr()?;
        self.expect(&TokenKind::Semi, "';' after statement")?;
        Ok(Stmt::RequestAssign { name, value, at })
    }

    fn parse_sample(&mut self, at: Location) -> Result<Stmt, SyntaxError> {
        self.advance(); // 'sample'
        let num_at = self.here();
        let numerator = match self.advance().kind {
            TokenKind::Int(n) if n >= 0 => n as u64,
            _ => return Err(SyntaxError::new("expected non-negative integer in sample directive", num_at)),
        };
        let rate = if *self.peek() == TokenKind::Percent {
            self.advance();
            SampleRate::Percent(numerator as f64 / 100.0)
        } else {
            self.expect(&TokenKind::Slash, "'/' or '%' in sample directive")?;
            let den_at = self.here();
            let denominator = match self.advance().kind {
                TokenKind::Int(n) if n >= 0 => n as u64,
                _ => return Err(SyntaxError::new("expected non-negative integer denominator", den_at)),
            };
            SampleRate::Ratio {
                numerator,
                denominator,
            }
        };
        self.expect(&TokenKind::Semi, "';' after statement")?;
        Ok(Stmt::Sample { rate, at })
    }

    fn parse_capture(&mut self, at: Location) -> Result<Stmt, SyntaxError> {
        self.advance(); // 'capture' | 'send'
        self.expect(&TokenKind::LParen, "'(' after capture/send")?;
        let mut args = Vec::new();
        if *self.peek() != TokenKind::RParen {
            loop {
                args.push(self.parse_capture_arg()?);
                if *self.peek() == TokenKind::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')' to close capture/send arguments")?;
        self.expect(&TokenKind::Semi, "';' after statement")?;
        Ok(Stmt::Capture { args, at })
    }

    fn parse_capture_arg(&mut self) -> Result<CaptureArg, SyntaxError> {
        if let TokenKind::Ident(name) = self.peek().clone() {
            if *self.peek_at(1) == TokenKind::Assign {
                self.advance(); // ident
                self.advance(); // '='
                let value = self.parse_expr()?;
                return Ok(CaptureArg {
                    name: Some(name),
                    value,
                });
            }
        }
        let value = self.parse_expr()?;
        Ok(CaptureArg { name: None, value })
    }

    // ---- expressions, lowest precedence first ----

    fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == TokenKind::Pipe2 {
            let at = self.here();
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                at,
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_eq()?;
        while *self.peek() == TokenKind::Amp2 {
            let at = self.here();
            self.advance();
            let rhs = self.parse_eq()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                at,
            };
        }
        Ok(lhs)
    }

    fn parse_eq(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_cmp()?;
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::Ne,
                _ => break,
            };
            let at = self.here();
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                at,
            };
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_add()?;
        loop {
            let op = match self.peek() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            let at = self.here();
            self.advance();
            let rhs = self.parse_add()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                at,
            };
        }
        Ok(lhs)
    }

    fn parse_add(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let at = self.here();
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                at,
            };
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinaryOp::Mul,
                // A bare '/' might be this predicate's closing delimiter
                // rather than a division operator — only consume it as
                // division if a right-hand operand can actually follow.
                TokenKind::Slash if starts_expr(self.peek_at(1)) => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let at = self.here();
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                at,
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if *self.peek() == TokenKind::Bang {
            let at = self.here();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: crate::ast::UnaryOp::Not,
                operand: Box::new(operand),
                at,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut base = self.parse_primary()?;
        loop {
            match self.peek() {
                TokenKind::Dot => {
                    let at = self.here();
                    self.advance();
                    let (field, _) = self.expect_ident("field name")?;
                    base = Expr::Attr {
                        base: Box::new(base),
                        field,
                        at,
                    };
                }
                TokenKind::LBracket => {
                    let at = self.here();
                    self.advance();
                    let key = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket, "']' to close index")?;
                    base = Expr::Index {
                        base: Box::new(base),
                        key: Box::new(key),
                        at,
                    };
                }
                _ => break,
            }
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let at = self.here();
        match self.peek().clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(Expr::IntLit(n, at))
            }
            TokenKind::Float(n) => {
                self.advance();
                Ok(Expr::FloatLit(n, at))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::StringLit(s, at))
            }
            TokenKind::KwTrue => {
                self.advance();
                Ok(Expr::BoolLit(true, at))
            }
            TokenKind::KwFalse => {
                self.advance();
                Ok(Expr::BoolLit(false, at))
            }
            TokenKind::KwNone => {
                self.advance();
                Ok(Expr::NoneLit(at))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen, "')' to close parenthesized expression")?;
                Ok(inner)
            }
            TokenKind::Dollar => {
                self.advance();
                let (root, root_at) = self.expect_ident("'req' or 'request'")?;
                if root != "req" && root != "request" {
                    return Err(SyntaxError::new(
                        format!("expected 'req' or 'request', found '{root}'"),
                        root_at,
                    ));
                }
                self.expect(&TokenKind::Dot, "'.' after '$req'")?;
                let (name, _) = self.expect_ident("request-variable name")?;
                Ok(Expr::RequestVar(name, at))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if *self.peek() == TokenKind::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.peek() != TokenKind::RParen {
                        loop {
                            args.push(self.parse_expr()?);
                            if *self.peek() == TokenKind::Comma {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "')' to close call arguments")?;
                    Ok(Expr::Call { name, args, at })
                } else {
                    Ok(Expr::Identifier(name, at))
                }
            }
            other => Err(SyntaxError::new(format!("unexpected token {other:?} in expression"), at)),
        }
    }
}

/// Whether `kind` can begin a unary/postfix/primary expression — used to
/// disambiguate a mid-predicate division `/` from the predicate's own
/// closing delimiter (see `parse_mul`).
fn starts_expr(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Int(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::Ident(_)
            | TokenKind::KwTrue
            | TokenKind::KwFalse
            | TokenKind::KwNone
            | TokenKind::Dollar
            | TokenKind::LParen
            | TokenKind::Bang
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_basic_capture() {
        let program = parse("fn:m.f:entry { capture(arg0); }").unwrap();
        assert_eq!(program.probes.len(), 1);
        let probe = &program.probes[0];
        assert_eq!(probe.spec.provider, Provider::Fn);
        assert_eq!(probe.spec.specifier, "m.f");
        assert_eq!(probe.spec.target, ProbeTarget::Entry);
        assert!(probe.predicate.is_none());
        assert_eq!(probe.body.len(), 1);
    }

    #[test]
    fn parses_predicate_with_internal_division() {
        let program = parse("fn:m.f:entry / a / b / { capture(a); }").unwrap();
        let predicate = program.probes[0].predicate.as_ref().unwrap();
        assert!(matches!(predicate, Expr::Binary { op: BinaryOp::Div, .. }));
    }

    #[test]
    fn parses_predicate_without_division() {
        let program = parse("fn:m.f:entry / arg0 == \"admin\" / { capture(arg0); }").unwrap();
        let predicate = program.probes[0].predicate.as_ref().unwrap();
        assert!(matches!(predicate, Expr::Binary { op: BinaryOp::Eq, .. }));
    }

    #[test]
    fn parses_entry_offset() {
        let program = parse("fn:m.f:entry+2 { capture(1); }").unwrap();
        assert_eq!(program.probes[0].spec.target, ProbeTarget::EntryOffset(2));
    }

    #[test]
    fn parses_wildcard_specifier() {
        let program = parse("py:pkg.mod.*:exit { capture(1); }").unwrap();
        assert_eq!(program.probes[0].spec.specifier, "pkg.mod.*");
    }

    #[test]
    fn parses_nested_access() {
        let program = parse("fn:m.f:entry { capture(v = arg0.data[0][\"v\"]); }").unwrap();
        let Stmt::Capture { args, .. } = &program.probes[0].body[0] else {
            panic!("expected capture statement");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].name.as_deref(), Some("v"));
        assert!(matches!(args[0].value, Expr::Index { .. }));
    }

    #[test]
    fn rejects_bad_provider() {
        assert!(parse("rb:m.f:entry { capture(1); }").is_err());
    }

    #[test]
    fn parses_sample_percent_and_ratio() {
        let a = parse("fn:m.f:entry { sample 25%; capture(1); }").unwrap();
        assert!(matches!(
            a.probes[0].body[0],
            Stmt::Sample {
                rate: SampleRate::Percent(p),
                ..
            } if (p - 0.25).abs() < 1e-9
        ));
        let b = parse("fn:m.f:entry { sample 1/4; capture(1); }").unwrap();
        assert!(matches!(
            b.probes[0].body[0],
            Stmt::Sample {
                rate: SampleRate::Ratio {
                    numerator: 1,
                    denominator: 4
                },
                ..
            }
        ));
    }
}
