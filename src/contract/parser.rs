//! Recursive-descent parser turning contract source into a [`Program`].

use super::ast::{BinaryOp, Expr, Function, Program, Stmt, UnaryOp};
use super::interpreter::BUILTINS;
use super::lexer::{tokenize, Spanned, Token};
use super::value::Value;
use super::ContractError;
use std::collections::BTreeMap;

/// Nesting limit for expressions and blocks, keeps the parser's own stack bounded.
const MAX_NESTING: usize = 128;

pub fn parse(source: &str) -> Result<Program, ContractError> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
    }
    .program()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ContractError {
        ContractError::Compile {
            line: self.line(),
            message: message.into(),
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ContractError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", what, describe(self.peek()))))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ContractError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected {}, found {}", what, describe(&other)))),
        }
    }

    fn enter(&mut self) -> Result<(), ContractError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn program(mut self) -> Result<Program, ContractError> {
        let mut functions = BTreeMap::new();
        while !self.check(&Token::Eof) {
            let function = self.function()?;
            if BUILTINS.contains(&function.name.as_str()) {
                return Err(ContractError::Compile {
                    line: function.line,
                    message: format!("function {} shadows a builtin", function.name),
                });
            }
            if functions.contains_key(&function.name) {
                return Err(ContractError::Compile {
                    line: function.line,
                    message: format!("function {} is defined twice", function.name),
                });
            }
            functions.insert(function.name.clone(), function);
        }
        Ok(Program { functions })
    }

    fn function(&mut self) -> Result<Function, ContractError> {
        let line = self.line();
        self.expect(Token::Fn, "'fn'")?;
        let name = self.ident("function name")?;
        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&Token::RParen) {
            loop {
                let param = self.ident("parameter name")?;
                if params.contains(&param) {
                    return Err(self.error(format!("duplicate parameter {}", param)));
                }
                params.push(param);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;
        let body = self.block()?;
        Ok(Function {
            name,
            params,
            body,
            line,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ContractError> {
        self.enter()?;
        self.expect(Token::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.error("unexpected end of input, missing '}'"));
            }
            statements.push(self.statement()?);
        }
        self.advance();
        self.leave();
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Stmt, ContractError> {
        match self.peek() {
            Token::Let => {
                self.advance();
                let name = self.ident("variable name")?;
                self.expect(Token::Assign, "'='")?;
                let value = self.expression()?;
                self.expect(Token::Semicolon, "';'")?;
                Ok(Stmt::Let { name, value })
            }
            Token::If => self.if_statement(),
            Token::While => {
                self.advance();
                let condition = self.expression()?;
                let body = self.block()?;
                Ok(Stmt::While { condition, body })
            }
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(Token::Semicolon, "';'")?;
                Ok(Stmt::Return(value))
            }
            _ => {
                let expr = self.expression()?;
                if self.eat(&Token::Assign) {
                    let Expr::Ident(name) = expr else {
                        return Err(self.error("only plain variables can be assigned"));
                    };
                    let value = self.expression()?;
                    self.expect(Token::Semicolon, "';'")?;
                    return Ok(Stmt::Assign { name, value });
                }
                self.expect(Token::Semicolon, "';'")?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ContractError> {
        let mut branches = Vec::new();
        let mut otherwise = None;
        self.expect(Token::If, "'if'")?;
        loop {
            let condition = self.expression()?;
            let body = self.block()?;
            branches.push((condition, body));
            if !self.eat(&Token::Else) {
                break;
            }
            if !self.eat(&Token::If) {
                otherwise = Some(self.block()?);
                break;
            }
        }
        Ok(Stmt::If {
            branches,
            otherwise,
        })
    }

    fn expression(&mut self) -> Result<Expr, ContractError> {
        self.enter()?;
        let expr = self.coalesce();
        self.leave();
        expr
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ContractError>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expr, ContractError> {
        let mut lhs = next(self)?;
        // Each operator wraps the chain built so far one level deeper.
        let mut built = 0;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    self.enter()?;
                    built += 1;
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            self.depth -= built;
            return Ok(lhs);
        }
    }

    fn coalesce(&mut self) -> Result<Expr, ContractError> {
        self.binary_level(Self::or, &[(Token::Coalesce, BinaryOp::Coalesce)])
    }

    fn or(&mut self) -> Result<Expr, ContractError> {
        self.binary_level(Self::and, &[(Token::OrOr, BinaryOp::Or)])
    }

    fn and(&mut self) -> Result<Expr, ContractError> {
        self.binary_level(Self::equality, &[(Token::AndAnd, BinaryOp::And)])
    }

    fn equality(&mut self) -> Result<Expr, ContractError> {
        self.binary_level(
            Self::comparison,
            &[(Token::EqEq, BinaryOp::Eq), (Token::NotEq, BinaryOp::NotEq)],
        )
    }

    fn comparison(&mut self) -> Result<Expr, ContractError> {
        self.binary_level(
            Self::additive,
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr, ContractError> {
        self.binary_level(
            Self::multiplicative,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ContractError> {
        self.binary_level(
            Self::unary,
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, ContractError> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ContractError> {
        let mut expr = self.primary()?;
        let mut built = 0;
        loop {
            if self.check(&Token::LBracket) || self.check(&Token::Dot) {
                self.enter()?;
                built += 1;
            }
            if self.eat(&Token::LBracket) {
                let index = self.expression()?;
                self.expect(Token::RBracket, "']'")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat(&Token::Dot) {
                let name = self.ident("field name")?;
                expr = Expr::Field {
                    target: Box::new(expr),
                    name,
                };
            } else {
                self.depth -= built;
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ContractError> {
        let line = self.line();
        match self.advance() {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => {
                if !self.eat(&Token::LParen) {
                    return Ok(Expr::Ident(name));
                }
                let args = self.comma_list(Token::RParen)?;
                Ok(Expr::Call { name, args, line })
            }
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::LBracket => Ok(Expr::List(self.comma_list(Token::RBracket)?)),
            Token::LBrace => {
                let mut entries = Vec::new();
                while !self.check(&Token::RBrace) {
                    let key = match self.advance() {
                        Token::Str(s) | Token::Ident(s) => s,
                        other => {
                            return Err(self.error(format!(
                                "expected map key, found {}",
                                describe(&other)
                            )))
                        }
                    };
                    self.expect(Token::Colon, "':'")?;
                    entries.push((key, self.expression()?));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RBrace, "'}'")?;
                Ok(Expr::Map(entries))
            }
            other => Err(ContractError::Compile {
                line,
                message: format!("unexpected {}", describe(&other)),
            }),
        }
    }

    fn comma_list(&mut self, close: Token) -> Result<Vec<Expr>, ContractError> {
        let mut items = Vec::new();
        while !self.check(&close) {
            items.push(self.expression()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(close, "closing delimiter")?;
        Ok(items)
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::Int(i) => format!("integer {}", i),
        Token::Str(_) => "string literal".to_string(),
        Token::Eof => "end of input".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_functions() {
        let program = parse(
            r#"
            fn init() {
                set_state("balance", 0);
                return "ok";
            }

            fn deposit(amount) {
                let current = get_state("balance") ?? 0;
                set_state("balance", current + amount);
            }
            "#,
        )
        .unwrap();

        assert_eq!(program.exports().collect::<Vec<_>>(), vec!["deposit", "init"]);
        let deposit = program.function("deposit").unwrap();
        assert_eq!(deposit.params, vec!["amount".to_string()]);
        assert_eq!(deposit.body.len(), 2);
        assert_eq!(deposit.line, 7);
    }

    #[test]
    fn test_precedence() {
        let program = parse("fn f() { return 1 + 2 * 3 ?? 4; }").unwrap();
        let Stmt::Return(Some(Expr::Binary { op, lhs, .. })) = &program.function("f").unwrap().body[0]
        else {
            panic!("expected binary return");
        };
        assert_eq!(*op, BinaryOp::Coalesce);
        assert!(matches!(**lhs, Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_else_if_chain() {
        let program = parse(
            "fn f(x) { if x > 1 { return 1; } else if x > 0 { return 2; } else { return 3; } }",
        )
        .unwrap();
        let Stmt::If {
            branches,
            otherwise,
        } = &program.function("f").unwrap().body[0]
        else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert!(otherwise.is_some());
    }

    #[test]
    fn test_map_and_field_access() {
        let program = parse(r#"fn f() { let m = {"a": 1, b: [2, 3]}; return m.b[0]; }"#).unwrap();
        assert_eq!(program.function("f").unwrap().body.len(), 2);
    }

    #[test]
    fn test_compile_errors_report_line() {
        let err = parse("fn ok() { return 1; }\n\nfn broken( {").unwrap_err();
        assert!(matches!(err, ContractError::Compile { line: 3, .. }));

        let err = parse("fn f() { 1 = 2; }").unwrap_err();
        assert!(err.to_string().contains("only plain variables"));

        assert!(parse("fn f() {} fn f() {}").is_err());
        assert!(parse("fn len() {}").is_err());
        assert!(parse("def init():\n    pass").is_err());
        assert!(parse("fn f() { return 1 }").is_err());
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let source = format!("fn f() {{ return {}1{}; }}", "(".repeat(500), ")".repeat(500));
        assert!(matches!(parse(&source), Err(ContractError::Compile { .. })));
    }

    #[test]
    fn test_long_operator_chains_rejected() {
        let sum = format!("fn f() {{ return 1{}; }}", "+1".repeat(30_000));
        assert!(matches!(parse(&sum), Err(ContractError::Compile { .. })));

        let index = format!("fn f(a) {{ return a{}; }}", "[0]".repeat(1_000));
        assert!(matches!(parse(&index), Err(ContractError::Compile { .. })));

        let field = format!("fn f(a) {{ return a{}; }}", ".b".repeat(1_000));
        assert!(matches!(parse(&field), Err(ContractError::Compile { .. })));

        let short = format!("fn f() {{ return 1{}; }}", "+1".repeat(40));
        assert!(parse(&short).is_ok());
    }
}
