//! Recursive-descent parser for formula text.
//!
//! Two entry points: `parse_formula` splits an optional `lookup(key){...}`
//! wrapper from its body, `parse_expression` parses a bare expression and
//! rejects any `lookup` inside it.

use super::ast::{BinOp, Builtin, Expr, UnaryOp};
use super::lexer::{tokenize, Token, TokenKind};
use crate::error::{RatingError, Result};

/// Deepest expression nesting accepted; bounds recursion while parsing and evaluating
pub(super) const MAX_NESTING_DEPTH: usize = 128;

/// Output of splitting a formula: lookup key, raw body text, parsed body
pub(super) struct ParsedFormula {
    pub lookup_key: Option<String>,
    pub body: String,
    pub expr: Expr,
}

pub(super) fn parse_formula(source: &str) -> Result<ParsedFormula> {
    let tokens = tokenize(source)?;

    if !matches!(tokens.first().map(|t| &t.kind), Some(TokenKind::Lookup)) {
        let expr = parse_tokens(tokens, source.len())?;
        return Ok(ParsedFormula {
            lookup_key: None,
            body: source.to_string(),
            expr,
        });
    }

    let mut p = Parser::new(tokens, source.len());
    p.expect(&TokenKind::Lookup)?;
    p.expect(&TokenKind::LParen)?;
    let key = p.expect_ident()?;
    p.expect(&TokenKind::RParen)?;
    let open = p.expect(&TokenKind::LBrace)?.end;

    let close = match p.tokens.last() {
        Some(Token { kind: TokenKind::RBrace, start, .. }) if p.tokens.len() > p.pos => *start,
        _ => {
            return Err(RatingError::Parse {
                message: "lookup body must end with '}'".to_string(),
                offset: source.len(),
            })
        }
    };

    let body_tokens: Vec<Token> = p.tokens[p.pos..p.tokens.len() - 1].to_vec();
    let expr = parse_tokens(body_tokens, close)?;

    Ok(ParsedFormula {
        lookup_key: Some(key),
        body: source[open..close].to_string(),
        expr,
    })
}

/// Parse a bare expression
pub(super) fn parse_expression(source: &str) -> Result<Expr> {
    let tokens = tokenize(source)?;
    parse_tokens(tokens, source.len())
}

fn parse_tokens(tokens: Vec<Token>, end_offset: usize) -> Result<Expr> {
    if let Some(tok) = tokens.iter().find(|t| t.kind == TokenKind::Lookup) {
        return Err(RatingError::Parse {
            message: "lookup(...) is only allowed as the outermost wrapper".to_string(),
            offset: tok.start,
        });
    }
    if tokens.is_empty() {
        return Err(RatingError::Parse {
            message: "empty expression".to_string(),
            offset: end_offset,
        });
    }

    let mut p = Parser::new(tokens, end_offset);
    let expr = parse_expr(&mut p)?;
    if let Some(tok) = p.peek() {
        return Err(RatingError::Parse {
            message: format!("unexpected {:?} after expression", tok.kind),
            offset: tok.start,
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end_offset: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, end_offset: usize) -> Self {
        Self { tokens, pos: 0, end_offset, depth: 0 }
    }

    fn enter(&mut self, levels: usize) -> Result<()> {
        self.depth += levels;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(RatingError::Parse {
                message: format!("formula nests deeper than {} levels", MAX_NESTING_DEPTH),
                offset: self.offset(),
            });
        }
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    fn offset(&self) -> usize {
        self.peek().map(|t| t.start).unwrap_or(self.end_offset)
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<&Token> {
        match self.tokens.get(self.pos) {
            Some(tok) if &tok.kind == expected => {
                self.pos += 1;
                Ok(&self.tokens[self.pos - 1])
            }
            Some(tok) => Err(RatingError::Parse {
                message: format!("expected {:?}, got {:?}", expected, tok.kind),
                offset: tok.start,
            }),
            None => Err(RatingError::Parse {
                message: format!("expected {:?}, got end of input", expected),
                offset: self.end_offset,
            }),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token { kind: TokenKind::Ident(name), .. }) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            Some(tok) => Err(RatingError::Parse {
                message: format!("expected identifier, got {:?}", tok.kind),
                offset: tok.start,
            }),
            None => Err(RatingError::Parse {
                message: "expected identifier, got end of input".to_string(),
                offset: self.end_offset,
            }),
        }
    }
}

fn parse_expr(p: &mut Parser) -> Result<Expr> {
    p.enter(1)?;
    let expr = parse_or(p);
    p.leave(1);
    expr
}

fn parse_or(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and(p)?;
    let mut chain = 0;
    while matches!(p.peek_kind(), Some(TokenKind::Or)) {
        p.advance();
        p.enter(1)?;
        chain += 1;
        let right = parse_and(p)?;
        left = binary(BinOp::Or, left, right);
    }
    p.leave(chain);
    Ok(left)
}

fn parse_and(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not(p)?;
    let mut chain = 0;
    while matches!(p.peek_kind(), Some(TokenKind::And)) {
        p.advance();
        p.enter(1)?;
        chain += 1;
        let right = parse_not(p)?;
        left = binary(BinOp::And, left, right);
    }
    p.leave(chain);
    Ok(left)
}

fn parse_not(p: &mut Parser) -> Result<Expr> {
    if matches!(p.peek_kind(), Some(TokenKind::Not)) {
        p.advance();
        p.enter(1)?;
        let operand = parse_not(p)?;
        p.leave(1);
        return Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) });
    }
    parse_comparison(p)
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let left = parse_additive(p)?;
    let op = match p.peek_kind() {
        Some(TokenKind::EqEq) => BinOp::Eq,
        Some(TokenKind::Ne) => BinOp::Ne,
        Some(TokenKind::Lt) => BinOp::Lt,
        Some(TokenKind::Le) => BinOp::Le,
        Some(TokenKind::Gt) => BinOp::Gt,
        Some(TokenKind::Ge) => BinOp::Ge,
        _ => return Ok(left),
    };
    p.advance();
    let right = parse_additive(p)?;
    Ok(binary(op, left, right))
}

fn parse_additive(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplicative(p)?;
    let mut chain = 0;
    loop {
        let op = match p.peek_kind() {
            Some(TokenKind::Plus) => BinOp::Add,
            Some(TokenKind::Minus) => BinOp::Sub,
            _ => break,
        };
        p.advance();
        p.enter(1)?;
        chain += 1;
        let right = parse_multiplicative(p)?;
        left = binary(op, left, right);
    }
    p.leave(chain);
    Ok(left)
}

fn parse_multiplicative(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_unary(p)?;
    let mut chain = 0;
    loop {
        let op = match p.peek_kind() {
            Some(TokenKind::Star) => BinOp::Mul,
            Some(TokenKind::Slash) => BinOp::Div,
            _ => break,
        };
        p.advance();
        p.enter(1)?;
        chain += 1;
        let right = parse_unary(p)?;
        left = binary(op, left, right);
    }
    p.leave(chain);
    Ok(left)
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    if matches!(p.peek_kind(), Some(TokenKind::Minus)) {
        p.advance();
        p.enter(1)?;
        let operand = parse_unary(p)?;
        p.leave(1);
        return Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand) });
    }
    parse_primary(p)
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    let offset = p.offset();
    match p.peek_kind().cloned() {
        Some(TokenKind::Number(n)) => {
            p.advance();
            Ok(Expr::Number(n))
        }
        Some(TokenKind::LParen) => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(&TokenKind::RParen)?;
            Ok(expr)
        }
        Some(TokenKind::If) => {
            p.advance();
            let cond = parse_expr(p)?;
            p.expect(&TokenKind::Then)?;
            let then_branch = parse_expr(p)?;
            p.expect(&TokenKind::Else)?;
            let else_branch = parse_expr(p)?;
            Ok(Expr::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            })
        }
        Some(TokenKind::Ident(name)) => {
            p.advance();
            if !matches!(p.peek_kind(), Some(TokenKind::LParen)) {
                return Ok(Expr::Var(name));
            }

            let func = Builtin::from_name(&name).ok_or_else(|| RatingError::Parse {
                message: format!("unknown function '{}'", name),
                offset,
            })?;
            p.advance();
            let mut args = Vec::new();
            if !matches!(p.peek_kind(), Some(TokenKind::RParen)) {
                args.push(parse_expr(p)?);
                while matches!(p.peek_kind(), Some(TokenKind::Comma)) {
                    p.advance();
                    args.push(parse_expr(p)?);
                }
            }
            p.expect(&TokenKind::RParen)?;
            if args.len() < 2 {
                return Err(RatingError::Parse {
                    message: format!("{}() takes at least 2 arguments", name),
                    offset,
                });
            }
            Ok(Expr::Call { func, args })
        }
        Some(kind) => Err(RatingError::Parse {
            message: format!("unexpected {:?}", kind),
            offset,
        }),
        None => Err(RatingError::Parse {
            message: "unexpected end of input".to_string(),
            offset,
        }),
    }
}

fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
}
