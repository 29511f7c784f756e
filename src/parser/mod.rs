use crate::ast::*;
use crate::lexer::Token;

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
}

type Result<T> = std::result::Result<T, ParseError>;

impl Parser {
    pub fn new(tokens: Vec<(Token, Span)>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_span(&self) -> Span {
        match self.tokens.get(self.pos) {
            Some((_, s)) => *s,
            // At EOF point just past the last token.
            None => self
                .tokens
                .last()
                .map(|(_, s)| Span { start: s.end, end: s.end })
                .unwrap_or(Span::UNKNOWN),
        }
    }

    fn token_at(&self, idx: usize) -> Option<&Token> {
        self.tokens.get(idx).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<Span> {
        match self.peek() {
            Some(tok) if tok == expected => {
                let span = self.peek_span();
                self.advance();
                Ok(span)
            }
            Some(tok) => Err(self.error("TRP-P003", format!("expected {:?}, got {:?}", expected, tok))),
            None => Err(self.error("TRP-P004", format!("expected {:?}, got EOF", expected))),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            Some(tok) => Err(self.error("TRP-P005", format!("expected identifier, got {:?}", tok))),
            None => Err(self.error("TRP-P006", "expected identifier, got EOF".into())),
        }
    }

    fn error(&self, code: &'static str, message: String) -> ParseError {
        ParseError {
            code,
            position: self.pos,
            span: self.peek_span(),
            message,
        }
    }

    // ---- Top level ----

    /// A whole program: one expression, then EOF.
    pub fn parse_program(&mut self) -> Result<Expr> {
        let expr = self.parse_expr()?;
        match self.peek() {
            None => Ok(expr),
            Some(tok) => Err(self.error("TRP-P001", format!("unexpected {:?} after end of program", tok))),
        }
    }

    // ---- Expressions, lowest precedence first ----

    /// `assign (';' assign)*`
    fn parse_expr(&mut self) -> Result<Expr> {
        let first = self.parse_assign()?;
        if self.peek() != Some(&Token::Semi) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.peek() == Some(&Token::Semi) {
            self.advance();
            items.push(self.parse_assign()?);
        }
        Ok(Expr::Sequence(items))
    }

    /// `IDENT '=' assign | comparison`
    fn parse_assign(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(Token::Ident(_)))
            && self.token_at(self.pos + 1) == Some(&Token::Assign)
        {
            let target = self.expect_ident()?;
            self.expect(&Token::Assign)?;
            let value = self.parse_assign()?;
            return Ok(Expr::Assignment { target, value: Box::new(value) });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => "==",
                Some(Token::NotEq) => "!=",
                Some(Token::Less) => "<",
                Some(Token::Greater) => ">",
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::op(left, op, right);
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => "+",
                Some(Token::Minus) => "-",
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::op(left, op, right);
        }
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_atom()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => "*",
                Some(Token::Slash) => "/",
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_atom()?;
            left = Expr::op(left, op, right);
        }
    }

    /// Smallest expression unit
    fn parse_atom(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Expr::Constant(n))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::Constant(1))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::Constant(0))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if self.peek() == Some(&Token::LParen) {
                    let args = self.parse_args()?;
                    Ok(Expr::Call { callee: name, args })
                } else {
                    Ok(Expr::Identifier(name))
                }
            }
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::If) => self.parse_conditional(),
            Some(Token::Let) => self.parse_let(),
            Some(Token::Minus) => Err(self.error(
                "TRP-P007",
                "negative literals are not supported, write `0 - n`".into(),
            )),
            Some(tok) => Err(self.error("TRP-P009", format!("expected expression, got {:?}", tok))),
            None => Err(self.error("TRP-P010", "expected expression, got EOF".into())),
        }
    }

    /// `'(' (assign (',' assign)*)? ')'`
    fn parse_args(&mut self) -> Result<Vec<Expr>> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.parse_assign()?);
            while self.peek() == Some(&Token::Comma) {
                self.advance();
                args.push(self.parse_assign()?);
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    /// `if '(' expr ')' then assign else assign`
    fn parse_conditional(&mut self) -> Result<Expr> {
        self.expect(&Token::If)?;
        self.expect(&Token::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        self.expect(&Token::Then)?;
        let consequent = self.parse_assign()?;
        self.expect(&Token::Else)?;
        let alternative = self.parse_assign()?;
        Ok(Expr::Conditional {
            condition: Box::new(condition),
            consequent: Box::new(consequent),
            alternative: Box::new(alternative),
        })
    }

    /// `let decl* in expr`
    fn parse_let(&mut self) -> Result<Expr> {
        self.expect(&Token::Let)?;
        let mut declarations = Vec::new();
        while self.peek() != Some(&Token::In) {
            declarations.push(self.parse_decl()?);
        }
        self.expect(&Token::In)?;
        let body = self.parse_expr()?;
        Ok(Expr::let_in(declarations, body))
    }

    fn parse_decl(&mut self) -> Result<Decl> {
        match self.peek() {
            Some(Token::Var) => {
                self.advance();
                let (name, init) = self.parse_binding()?;
                Ok(Decl::Var { name, init })
            }
            Some(Token::Lazy) => {
                self.advance();
                let (name, init) = self.parse_binding()?;
                Ok(Decl::Lazy { name, init })
            }
            Some(Token::Ident(_)) => self.parse_fn_decl(),
            Some(tok) => Err(self.error("TRP-P002", format!("expected declaration or `in`, got {:?}", tok))),
            None => Err(self.error("TRP-P002", "expected declaration or `in`, got EOF".into())),
        }
    }

    /// `IDENT '=' assign`
    fn parse_binding(&mut self) -> Result<(String, Expr)> {
        let name = self.expect_ident()?;
        self.expect(&Token::Assign)?;
        let init = self.parse_assign()?;
        Ok((name, init))
    }

    /// `IDENT '(' params ')' '{' expr '}'`
    fn parse_fn_decl(&mut self) -> Result<Decl> {
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            params.push(self.expect_ident()?);
            while self.peek() == Some(&Token::Comma) {
                self.advance();
                params.push(self.expect_ident()?);
            }
        }
        self.expect(&Token::RParen)?;
        self.expect(&Token::LBrace)?;
        let body = self.parse_expr()?;
        self.expect(&Token::RBrace)?;
        Ok(Decl::Function { name, params, body })
    }
}

/// Parse from token+span pairs.
pub fn parse(tokens: Vec<(Token, Span)>) -> Result<Expr> {
    Parser::new(tokens).parse_program()
}

/// Parse from bare tokens (no span information, UNKNOWN spans).
#[cfg(test)]
pub fn parse_tokens(tokens: Vec<Token>) -> Result<Expr> {
    parse(tokens.into_iter().map(|t| (t, Span::UNKNOWN)).collect())
}
