//! Recursive-descent parser producing [`Stmt`] trees.
//!
//! Precedence, loosest first: conditional expression, `or`, `and`, `not`,
//! comparisons, `+ -`, `* / // %`, unary sign, `**`, postfix
//! (call/index/attribute), atoms.

use crate::ast::{BinOp, CmpOp, Const, Expr, FPart, Param, Stmt, StmtKind, Target, UnaryOp};
use crate::error::ParseError;
use crate::lexer::{FStringPart, Token, TokenKind, tokenize, tokenize_from};

/// Parse a complete program.
pub fn parse(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    parser.program()
}

/// Parse a single expression (used for watches).
pub fn parse_expr(source: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(source.trim())?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expr_list()?;
    parser.skip_newlines();
    parser.expect(&TokenKind::Eof, "invalid syntax")?;
    Ok(expr)
}

const TOO_DEEP: &str = "too many nested parentheses";

/// Deepest nesting of expressions or blocks the parser accepts.
pub const MAX_NESTING: usize = 200;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Run `inner` one nesting level deeper, failing past [`MAX_NESTING`].
    fn nested<T>(
        &mut self,
        message: &str,
        inner: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(message));
        }
        self.depth += 1;
        let result = inner(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn line(&self) -> u32 {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError::new(self.line(), message)
    }

    fn name(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            TokenKind::Name(name) => Ok(name),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("invalid syntax"))
            }
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&TokenKind::Newline) {}
    }

    fn program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut body = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Eof) {
            if self.check(&TokenKind::Indent) {
                return Err(self.error("unexpected indent"));
            }
            body.push(self.statement()?);
            self.skip_newlines();
        }
        Ok(body)
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            TokenKind::If => self.if_stmt(),
            TokenKind::While => {
                let line = self.line();
                self.advance();
                let test = self.expr()?;
                let body = self.suite()?;
                Ok(Stmt::new(line, StmtKind::While { test, body }))
            }
            TokenKind::For => {
                let line = self.line();
                self.advance();
                let target = self.target_list()?;
                self.expect(&TokenKind::In, "invalid syntax")?;
                let iter = self.expr_list()?;
                let body = self.suite()?;
                Ok(Stmt::new(line, StmtKind::For { target, iter, body }))
            }
            TokenKind::Def => self.def_stmt(),
            TokenKind::With => {
                let line = self.line();
                self.advance();
                let context = self.expr()?;
                let name = if self.eat(&TokenKind::As) {
                    Some(self.name()?)
                } else {
                    None
                };
                let body = self.suite()?;
                Ok(Stmt::new(line, StmtKind::With { context, name, body }))
            }
            _ => {
                let stmt = self.simple_stmt()?;
                if !self.eat(&TokenKind::Newline) && !self.check(&TokenKind::Eof) {
                    return Err(self.error("invalid syntax"));
                }
                Ok(stmt)
            }
        }
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance();
        let test = self.expr()?;
        let body = self.suite()?;
        let orelse = if self.check(&TokenKind::Elif) {
            vec![self.if_stmt()?]
        } else if self.eat(&TokenKind::Else) {
            self.suite()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(line, StmtKind::If { test, body, orelse }))
    }

    fn def_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        self.advance();
        let name = self.name()?;
        self.expect(&TokenKind::LParen, "expected '('")?;
        let mut params: Vec<Param> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let pname = self.name()?;
            let default = if self.eat(&TokenKind::Assign) {
                Some(self.expr()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error("non-default argument follows default argument"));
                }
                None
            };
            params.push(Param {
                name: pname,
                default,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "expected ')'")?;
        let body = self.suite()?;
        Ok(Stmt::new(line, StmtKind::Def { name, params, body }))
    }

    fn suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.nested("too many statically nested blocks", Self::block)
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&TokenKind::Colon, "expected ':'")?;
        if !self.eat(&TokenKind::Newline) {
            let stmt = self.simple_stmt()?;
            if !self.eat(&TokenKind::Newline) && !self.check(&TokenKind::Eof) {
                return Err(self.error("invalid syntax"));
            }
            return Ok(vec![stmt]);
        }
        self.skip_newlines();
        if !self.eat(&TokenKind::Indent) {
            return Err(self.error("expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::Eof) {
            body.push(self.statement()?);
            self.skip_newlines();
        }
        self.eat(&TokenKind::Dedent);
        Ok(body)
    }

    fn simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let kind = match self.peek() {
            TokenKind::Pass => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Break => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Return => {
                self.advance();
                if matches!(self.peek(), TokenKind::Newline | TokenKind::Eof) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expr_list()?))
                }
            }
            TokenKind::Global => {
                self.advance();
                let mut names = vec![self.name()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.name()?);
                }
                StmtKind::Global(names)
            }
            TokenKind::Import => {
                self.advance();
                let module = self.dotted_name()?;
                let alias = if self.eat(&TokenKind::As) {
                    Some(self.name()?)
                } else {
                    None
                };
                StmtKind::Import { module, alias }
            }
            TokenKind::From => {
                self.advance();
                let module = self.dotted_name()?;
                self.expect(&TokenKind::Import, "invalid syntax")?;
                let mut names = Vec::new();
                if self.eat(&TokenKind::Star) {
                    names.push("*".to_string());
                } else {
                    names.push(self.name()?);
                    while self.eat(&TokenKind::Comma) {
                        names.push(self.name()?);
                    }
                }
                StmtKind::FromImport { module, names }
            }
            _ => self.expr_or_assign()?,
        };
        Ok(Stmt::new(line, kind))
    }

    fn dotted_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.name()?;
        while self.eat(&TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.name()?);
        }
        Ok(name)
    }

    fn expr_or_assign(&mut self) -> Result<StmtKind, ParseError> {
        let first = self.expr_list()?;
        let aug = match self.peek() {
            TokenKind::PlusAssign => Some(BinOp::Add),
            TokenKind::MinusAssign => Some(BinOp::Sub),
            TokenKind::StarAssign => Some(BinOp::Mul),
            TokenKind::SlashAssign => Some(BinOp::Div),
            _ => None,
        };
        if let Some(op) = aug {
            self.advance();
            let target = self.to_target(first)?;
            if matches!(target, Target::Tuple(_)) {
                return Err(self.error("illegal expression for augmented assignment"));
            }
            let value = self.expr_list()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }
        if !self.eat(&TokenKind::Assign) {
            return Ok(StmtKind::Expr(first));
        }
        let mut targets = vec![first];
        let mut value = self.expr_list()?;
        while self.eat(&TokenKind::Assign) {
            targets.push(value);
            value = self.expr_list()?;
        }
        let targets = targets
            .into_iter()
            .map(|t| self.to_target(t))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StmtKind::Assign { targets, value })
    }

    fn to_target(&self, expr: Expr) -> Result<Target, ParseError> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Index { object, index } => Ok(Target::Index {
                object: *object,
                index: *index,
            }),
            Expr::Tuple(items) | Expr::List(items) => Ok(Target::Tuple(
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<Result<_, _>>()?,
            )),
            Expr::Attribute { .. } => Err(self.error("attribute assignment is not supported")),
            _ => Err(self.error("cannot assign to expression")),
        }
    }

    fn target_list(&mut self) -> Result<Target, ParseError> {
        let mut items = vec![self.postfix()?];
        let mut tuple = false;
        while self.eat(&TokenKind::Comma) {
            tuple = true;
            if self.check(&TokenKind::In) {
                break;
            }
            items.push(self.postfix()?);
        }
        let expr = if tuple {
            Expr::Tuple(items)
        } else {
            items.remove(0)
        };
        self.to_target(expr)
    }

    /// Comma-separated expressions; more than one (or a trailing comma)
    /// yields a tuple.
    fn expr_list(&mut self) -> Result<Expr, ParseError> {
        let first = self.expr()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.at_expr_end() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::Tuple(items))
    }

    fn at_expr_end(&self) -> bool {
        matches!(
            self.peek(),
            TokenKind::Newline
                | TokenKind::Eof
                | TokenKind::Assign
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::Colon
        )
    }

    pub(crate) fn expr(&mut self) -> Result<Expr, ParseError> {
        self.nested(TOO_DEEP, Self::conditional)
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let body = self.or_expr()?;
        if !self.eat(&TokenKind::If) {
            return Ok(body);
        }
        let test = self.or_expr()?;
        self.expect(&TokenKind::Else, "expected 'else' after 'if' expression")?;
        let orelse = self.expr()?;
        Ok(Expr::IfElse {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.and_expr()?;
        while self.eat(&TokenKind::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.not_expr()?;
        while self.eat(&TokenKind::And) {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&TokenKind::Not) {
            let operand = self.nested(TOO_DEEP, Self::not_expr)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let first = self.arith()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                TokenKind::EqEq => CmpOp::Eq,
                TokenKind::NotEq => CmpOp::NotEq,
                TokenKind::Lt => CmpOp::Lt,
                TokenKind::LtEq => CmpOp::LtEq,
                TokenKind::Gt => CmpOp::Gt,
                TokenKind::GtEq => CmpOp::GtEq,
                TokenKind::In => CmpOp::In,
                TokenKind::Not if *self.peek_at(1) == TokenKind::In => {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Is if *self.peek_at(1) == TokenKind::Not => {
                    self.advance();
                    CmpOp::IsNot
                }
                TokenKind::Is => CmpOp::Is,
                _ => break,
            };
            self.advance();
            rest.push((op, self.arith()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.factor()?;
            left = binary(op, left, right);
        }
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.advance();
        let operand = self.nested(TOO_DEEP, Self::factor)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.postfix()?;
        if self.eat(&TokenKind::StarStar) {
            let exponent = self.nested(TOO_DEEP, Self::factor)?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.atom()?;
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    expr = self.subscript(expr)?;
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.name()?;
                    expr = Expr::Attribute {
                        object: Box::new(expr),
                        name,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.check(&TokenKind::RParen) {
            let is_kw = matches!(self.peek(), TokenKind::Name(_))
                && *self.peek_at(1) == TokenKind::Assign;
            if is_kw {
                let name = self.name()?;
                self.advance();
                kwargs.push((name, self.expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.expr()?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen, "'(' was never closed")?;
        Ok((args, kwargs))
    }

    fn subscript(&mut self, object: Expr) -> Result<Expr, ParseError> {
        let lower = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        if self.eat(&TokenKind::RBracket) {
            let Some(index) = lower else {
                return Err(self.error("invalid syntax"));
            };
            return Ok(Expr::Index {
                object: Box::new(object),
                index,
            });
        }
        self.expect(&TokenKind::Colon, "invalid syntax")?;
        let upper = if matches!(self.peek(), TokenKind::Colon | TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.expr()?))
        };
        let step = if self.eat(&TokenKind::Colon) && !self.check(&TokenKind::RBracket) {
            Some(Box::new(self.expr()?))
        } else {
            None
        };
        self.expect(&TokenKind::RBracket, "'[' was never closed")?;
        Ok(Expr::Slice {
            object: Box::new(object),
            lower,
            upper,
            step,
        })
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.advance() {
            TokenKind::Int(v) => Ok(Expr::Const(Const::Int(v))),
            TokenKind::Float(v) => Ok(Expr::Const(Const::Float(v))),
            TokenKind::True => Ok(Expr::Const(Const::Bool(true))),
            TokenKind::False => Ok(Expr::Const(Const::Bool(false))),
            TokenKind::None => Ok(Expr::Const(Const::None)),
            TokenKind::Name(name) => Ok(Expr::Name(name)),
            TokenKind::Str(first) => {
                let mut text = first;
                while let TokenKind::Str(next) = self.peek() {
                    text.push_str(next);
                    self.advance();
                }
                Ok(Expr::Const(Const::Str(text)))
            }
            TokenKind::FStr(parts) => fstring(parts, line),
            TokenKind::LParen => {
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let inner = self.expr_list()?;
                self.expect(&TokenKind::RParen, "'(' was never closed")?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket, "'[' was never closed")?;
                Ok(Expr::List(items))
            }
            TokenKind::LBrace => {
                let mut pairs = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    let key = self.expr()?;
                    self.expect(&TokenKind::Colon, "':' expected after dictionary key")?;
                    let value = self.expr()?;
                    pairs.push((key, value));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace, "'{' was never closed")?;
                Ok(Expr::Dict(pairs))
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("invalid syntax"))
            }
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn fstring(parts: Vec<FStringPart>, line: u32) -> Result<Expr, ParseError> {
    let mut out = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            FStringPart::Lit(text) => out.push(FPart::Lit(text)),
            FStringPart::Hole { source, spec } => {
                let tokens = tokenize_from(source.trim(), line)?;
                let mut parser = Parser::new(tokens);
                let expr = parser.expr()?;
                parser.skip_newlines();
                if !parser.check(&TokenKind::Eof) {
                    return Err(ParseError::new(line, "f-string: invalid syntax"));
                }
                out.push(FPart::Hole {
                    expr: Box::new(expr),
                    spec,
                });
            }
        }
    }
    Ok(Expr::FString(out))
}
