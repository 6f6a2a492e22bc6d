//! Recursive-descent parser for the sandbox script language.
//!
//! Statements are newline- (or `;`-) separated; blocks are brace-delimited.
//! Precedence, tightest first: postfix (call/index/attr), unary `-`,
//! `* / %`, `+ -`, comparisons and `in`, `not`, `and`, `or`.

use crate::ast::{BinOp, Expr, Lit, Stmt, Target, UnOp};
use crate::lexer::Token;
use crate::value::ScriptError;

/// Parse a token stream into a statement list.
pub fn parse(tokens: Vec<Token>) -> Result<Vec<Stmt>, ScriptError> {
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn describe(token: Option<&Token>) -> String {
    match token {
        None => "end of input".to_string(),
        Some(Token::Ident(name)) => format!("'{name}'"),
        Some(Token::Newline) => "end of statement".to_string(),
        Some(other) => format!("{other:?}"),
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, context: &str) -> Result<(), ScriptError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(ScriptError::syntax_error(format!(
                "expected {token:?} {context}, found {}",
                describe(self.peek())
            )))
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while self.peek().is_some() {
            stmts.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        Ok(stmts)
    }

    // ── statements ──

    fn parse_stmt(&mut self) -> Result<Stmt, ScriptError> {
        match self.peek() {
            Some(Token::If) => self.parse_if(),
            Some(Token::For) => self.parse_for(),
            Some(Token::While) => self.parse_while(),
            Some(Token::Import) => self.parse_import(),
            Some(Token::Break) => {
                let _ = self.advance();
                self.end_stmt()?;
                Ok(Stmt::Break)
            }
            Some(Token::Continue) => {
                let _ = self.advance();
                self.end_stmt()?;
                Ok(Stmt::Continue)
            }
            _ => self.parse_assign_or_expr(),
        }
    }

    fn end_stmt(&mut self) -> Result<(), ScriptError> {
        match self.peek() {
            Some(Token::Newline) => {
                self.skip_newlines();
                Ok(())
            }
            None | Some(Token::RBrace) => Ok(()),
            other => Err(ScriptError::syntax_error(format!(
                "expected end of statement, found {}",
                describe(other)
            ))),
        }
    }

    fn parse_assign_or_expr(&mut self) -> Result<Stmt, ScriptError> {
        let expr = self.parse_expr()?;
        if self.eat(&Token::Assign) {
            let target = match expr {
                Expr::Name(name) => Target::Name(name),
                Expr::Index { target, index } => Target::Index { target, index },
                other => {
                    return Err(ScriptError::syntax_error(format!(
                        "cannot assign to {other:?}"
                    )));
                }
            };
            let value = self.parse_expr()?;
            self.end_stmt()?;
            Ok(Stmt::Assign { target, value })
        } else {
            self.end_stmt()?;
            Ok(Stmt::Expr(expr))
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect(&Token::LBrace, "to open a block")?;
        self.skip_newlines();
        let mut stmts = Vec::new();
        while !matches!(self.peek(), Some(Token::RBrace) | None) {
            stmts.push(self.parse_stmt()?);
            self.skip_newlines();
        }
        self.expect(&Token::RBrace, "to close the block")?;
        Ok(stmts)
    }

    fn parse_if(&mut self) -> Result<Stmt, ScriptError> {
        let _ = self.advance();
        let mut branches = vec![(self.parse_expr()?, self.parse_block()?)];
        let mut else_body = None;
        loop {
            self.skip_newlines();
            if self.eat(&Token::Elif) {
                branches.push((self.parse_expr()?, self.parse_block()?));
            } else if self.eat(&Token::Else) {
                else_body = Some(self.parse_block()?);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If { branches, else_body })
    }

    fn parse_for(&mut self) -> Result<Stmt, ScriptError> {
        let _ = self.advance();
        let var = match self.advance() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(ScriptError::syntax_error(format!(
                    "expected loop variable after 'for', found {}",
                    describe(other.as_ref())
                )));
            }
        };
        self.expect(&Token::In, "after the loop variable")?;
        let iter = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::For { var, iter, body })
    }

    fn parse_while(&mut self) -> Result<Stmt, ScriptError> {
        let _ = self.advance();
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body })
    }

    fn parse_import(&mut self) -> Result<Stmt, ScriptError> {
        let _ = self.advance();
        let mut module = match self.advance() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(ScriptError::syntax_error(format!(
                    "expected module name after 'import', found {}",
                    describe(other.as_ref())
                )));
            }
        };
        while self.eat(&Token::Dot) {
            match self.advance() {
                Some(Token::Ident(segment)) => {
                    module.push('.');
                    module.push_str(&segment);
                }
                other => {
                    return Err(ScriptError::syntax_error(format!(
                        "expected module segment after '.', found {}",
                        describe(other.as_ref())
                    )));
                }
            }
        }
        self.end_stmt()?;
        Ok(Stmt::Import { module })
    }

    // ── expressions ──

    fn parse_expr(&mut self) -> Result<Expr, ScriptError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ScriptError> {
        if self.eat(&Token::Not) {
            let expr = self.parse_not()?;
            Ok(Expr::Unary {
                op: UnOp::Not,
                expr: Box::new(expr),
            })
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinOp::Eq,
                Some(Token::Ne) => BinOp::Ne,
                Some(Token::Lt) => BinOp::Lt,
                Some(Token::Le) => BinOp::Le,
                Some(Token::Gt) => BinOp::Gt,
                Some(Token::Ge) => BinOp::Ge,
                Some(Token::In) => BinOp::In,
                _ => break,
            };
            let _ = self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            let _ = self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ScriptError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            let _ = self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        if self.eat(&Token::Minus) {
            let expr = self.parse_unary()?;
            Ok(Expr::Unary {
                op: UnOp::Neg,
                expr: Box::new(expr),
            })
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::LParen) {
                let (args, kwargs) = self.parse_call_args()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    kwargs,
                };
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&Token::RBracket, "to close the subscript")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat(&Token::Dot) {
                match self.advance() {
                    Some(Token::Ident(name)) => {
                        expr = Expr::Attr {
                            target: Box::new(expr),
                            name,
                        };
                    }
                    other => {
                        return Err(ScriptError::syntax_error(format!(
                            "expected attribute name after '.', found {}",
                            describe(other.as_ref())
                        )));
                    }
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ScriptError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            let is_kwarg = matches!(self.peek(), Some(Token::Ident(_)))
                && self.peek_at(1) == Some(&Token::Assign);
            if is_kwarg {
                let Some(Token::Ident(name)) = self.advance() else {
                    unreachable!("peek said Ident");
                };
                let _ = self.advance(); // '='
                let value = self.parse_expr()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(ScriptError::syntax_error(
                        "positional argument after keyword argument",
                    ));
                }
                args.push(self.parse_expr()?);
            }
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen, "to close the call")?;
            break;
        }
        Ok((args, kwargs))
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Lit::Int(n))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Lit::Float(f))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Lit::Str(s))),
            Some(Token::True) => Ok(Expr::Literal(Lit::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Lit::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Lit::Null)),
            Some(Token::Ident(name)) => Ok(Expr::Name(name)),
            Some(Token::LParen) => {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, "to close the group")?;
                Ok(expr)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_expr()?);
                    if self.eat(&Token::Comma) {
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        continue;
                    }
                    self.expect(&Token::RBracket, "to close the list")?;
                    break;
                }
                Ok(Expr::List(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                self.skip_newlines();
                if self.eat(&Token::RBrace) {
                    return Ok(Expr::Map(entries));
                }
                loop {
                    let key = self.parse_expr()?;
                    self.expect(&Token::Colon, "after a map key")?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    self.skip_newlines();
                    if self.eat(&Token::Comma) {
                        self.skip_newlines();
                        if self.eat(&Token::RBrace) {
                            break;
                        }
                        continue;
                    }
                    self.expect(&Token::RBrace, "to close the map")?;
                    break;
                }
                Ok(Expr::Map(entries))
            }
            other => Err(ScriptError::syntax_error(format!(
                "expected an expression, found {}",
                describe(other.as_ref())
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> Vec<Stmt> {
        parse(tokenize(source).unwrap()).unwrap()
    }

    #[test]
    fn assignment_statement() {
        let stmts = parse_source("x = 41");
        assert_eq!(
            stmts,
            vec![Stmt::Assign {
                target: Target::Name("x".into()),
                value: Expr::Literal(Lit::Int(41)),
            }]
        );
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let stmts = parse_source("y = 1 + 2 * 3");
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected assignment");
        };
        let Expr::Binary { op: BinOp::Add, rhs, .. } = value else {
            panic!("expected addition at the top");
        };
        assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn comparison_below_and() {
        let stmts = parse_source("ok = a < 3 and b >= 2");
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Binary { op: BinOp::And, .. }));
    }

    #[test]
    fn call_with_kwargs() {
        let stmts = parse_source("search(\"anticoagulants\", limit=5)");
        let Stmt::Expr(Expr::Call { args, kwargs, .. }) = &stmts[0] else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs[0].0, "limit");
    }

    #[test]
    fn positional_after_keyword_is_rejected() {
        let err = parse(tokenize("f(a=1, 2)").unwrap()).unwrap_err();
        assert!(err.message.contains("positional argument after keyword"));
    }

    #[test]
    fn if_elif_else_chain() {
        let stmts = parse_source("if a { x = 1 } elif b { x = 2 } else { x = 3 }");
        let Stmt::If { branches, else_body } = &stmts[0] else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(else_body.is_some());
    }

    #[test]
    fn for_loop_over_list() {
        let stmts = parse_source("for x in [1, 2] {\n  total = total + x\n}");
        let Stmt::For { var, body, .. } = &stmts[0] else {
            panic!("expected for");
        };
        assert_eq!(var, "x");
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn dotted_import() {
        let stmts = parse_source("import urllib.parse");
        assert_eq!(
            stmts,
            vec![Stmt::Import {
                module: "urllib.parse".into()
            }]
        );
    }

    #[test]
    fn index_assignment_target() {
        let stmts = parse_source("xs[0] = 9");
        assert!(matches!(
            &stmts[0],
            Stmt::Assign {
                target: Target::Index { .. },
                ..
            }
        ));
    }

    #[test]
    fn attribute_call() {
        let stmts = parse_source("math.sqrt(2)");
        let Stmt::Expr(Expr::Call { callee, .. }) = &stmts[0] else {
            panic!("expected call");
        };
        assert!(matches!(**callee, Expr::Attr { .. }));
    }

    #[test]
    fn map_literal_spanning_lines() {
        let stmts = parse_source("m = {\n  \"a\": 1,\n  \"b\": 2\n}");
        let Stmt::Assign { value: Expr::Map(entries), .. } = &stmts[0] else {
            panic!("expected map literal");
        };
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn membership_operator() {
        let stmts = parse_source("found = \"a\" in xs");
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Binary { op: BinOp::In, .. }));
    }

    #[test]
    fn dangling_operator_is_a_syntax_error() {
        let err = parse(tokenize("x = 1 +").unwrap()).unwrap_err();
        assert_eq!(err.kind, "SyntaxError");
    }
}
