//! Recursive-descent parser over the token stream produced by
//! `crate::syntax::lexer`, implementing the grammar in SPEC_FULL.md §11
//! directly: one function per production, operator precedence climbing by
//! hand through `comparison`/`additive`/`multiplicative`/`unary`.

use crate::ast::{
    BinaryOp, Block, ChannelExpr, ChannelSpec, Expr, Program, Statement, TaskDef, TaskRef,
};
use crate::error::ConkerError;

use super::lexer::{Span, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn parse_program(mut self) -> Result<Program, ConkerError> {
        let mut tasks = Vec::new();
        while !self.at(&TokenKind::Eof) {
            tasks.push(self.parse_task_def()?);
        }
        Ok(Program { tasks })
    }

    fn parse_task_def(&mut self) -> Result<TaskDef, ConkerError> {
        self.expect(&TokenKind::Task)?;
        let name = self.expect_ident()?;
        let multiplicity = if self.eat(&TokenKind::LBracket) {
            let expr = self.parse_expr()?;
            self.expect(&TokenKind::RBracket)?;
            Some(expr)
        } else {
            None
        };
        let body = self.parse_block()?;
        Ok(TaskDef {
            name,
            multiplicity,
            body,
        })
    }

    fn parse_block(&mut self) -> Result<Block, ConkerError> {
        self.expect(&TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            statements.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Block { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement, ConkerError> {
        match self.peek_kind().clone() {
            TokenKind::Loop => {
                self.advance();
                Ok(Statement::Loop {
                    body: self.parse_block()?,
                })
            }
            TokenKind::While => {
                self.advance();
                let condition = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Statement::While { condition, body })
            }
            TokenKind::If => {
                self.advance();
                let condition = self.parse_expr()?;
                let then_block = self.parse_block()?;
                let else_block = if self.eat(&TokenKind::Else) {
                    Some(self.parse_block()?)
                } else {
                    None
                };
                Ok(Statement::If {
                    condition,
                    then_block,
                    else_block,
                })
            }
            TokenKind::Exit => {
                self.advance();
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::Exit)
            }
            TokenKind::Ident(_) if self.nth_is(1, &TokenKind::LeftArrow) => {
                let name = self.expect_ident()?;
                let target = if name == "_" { None } else { Some(name) };
                self.parse_receive(target)
            }
            TokenKind::Ident(name) if self.nth_is(1, &TokenKind::Assign) => {
                let name = name.clone();
                self.advance();
                self.advance();
                let value = self.parse_expr()?;
                self.expect(&TokenKind::Semicolon)?;
                Ok(Statement::Assignment {
                    target: name,
                    value,
                })
            }
            _ => self.parse_send(),
        }
    }

    /// `(IDENT | "_") "<-" channel_spec ";"` with the target already
    /// consumed (`None` standing for the `_` discard form).
    fn parse_receive(&mut self, target: Option<String>) -> Result<Statement, ConkerError> {
        self.expect(&TokenKind::LeftArrow)?;
        let spec = if self.eat(&TokenKind::Question) {
            let name = self.expect_ident()?;
            ChannelSpec::Binding { name }
        } else {
            ChannelSpec::Explicit(self.parse_channel_expr()?)
        };
        self.expect(&TokenKind::Semicolon)?;
        Ok(Statement::Receive { target, spec })
    }

    fn parse_send(&mut self) -> Result<Statement, ConkerError> {
        let value = self.parse_expr()?;
        self.expect(&TokenKind::Arrow)?;
        let channel = self.parse_channel_expr()?;
        self.expect(&TokenKind::Semicolon)?;
        Ok(Statement::Send { value, channel })
    }

    /// `channel_expr := "$out" | task_ref` (SPEC_FULL.md §11), except a
    /// bare `IDENT` with no index is genuinely ambiguous between a task name
    /// and a channel-valued variable — that case is deferred to the
    /// evaluator as `ChannelExpr::Expr(Name(..))` (see SPEC_FULL.md §11).
    fn parse_channel_expr(&mut self) -> Result<ChannelExpr, ConkerError> {
        if self.eat(&TokenKind::DollarOut) {
            return Ok(ChannelExpr::MagicOut);
        }
        let name = self.expect_ident()?;
        if self.eat(&TokenKind::LBracket) {
            let index = self.parse_expr()?;
            self.expect(&TokenKind::RBracket)?;
            return Ok(ChannelExpr::Task(TaskRef {
                name,
                index: Some(Box::new(index)),
            }));
        }
        Ok(ChannelExpr::Expr(Box::new(Expr::Name(name))))
    }

    fn parse_expr(&mut self) -> Result<Expr, ConkerError> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConkerError> {
        let lhs = self.parse_additive()?;
        let op = match self.peek_kind() {
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, ConkerError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ConkerError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConkerError> {
        if self.eat(&TokenKind::Minus) {
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConkerError> {
        match self.peek_kind().clone() {
            TokenKind::Integer(n) => {
                self.advance();
                Ok(Expr::IntegerLiteral(n))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::BooleanLiteral(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::BooleanLiteral(false))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::NullLiteral)
            }
            TokenKind::DollarIndex => {
                self.advance();
                Ok(Expr::MagicIndex)
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.eat(&TokenKind::LBracket) {
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    Ok(Expr::TaskRef(TaskRef {
                        name,
                        index: Some(Box::new(index)),
                    }))
                } else {
                    Ok(Expr::Name(name))
                }
            }
            other => Err(self.error(format!("expected an expression, found {other:?}"))),
        }
    }

    // --- token stream primitives ---

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn nth_is(&self, offset: usize, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.kind == kind)
            .unwrap_or(false)
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn advance(&mut self) -> &Token {
        let token = &self.tokens[self.pos];
        if !matches!(token.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ConkerError> {
        if self.eat(kind) {
            Ok(())
        } else {
            let found = self.peek_kind().clone();
            Err(self.error(format!("expected {kind:?}, found {found:?}")))
        }
    }

    fn expect_ident(&mut self) -> Result<String, ConkerError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("expected an identifier, found {other:?}"))),
        }
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn error(&self, message: impl Into<String>) -> ConkerError {
        let span = self.current_span();
        ConkerError::Parse {
            line: span.line,
            column: span.column,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::lexer::lex;

    fn parse(source: &str) -> Program {
        Parser::new(lex(source).unwrap()).parse_program().unwrap()
    }

    #[test]
    fn parses_hello_number() {
        let program = parse("task Main {\n 123 -> $out;\n}\n");
        assert_eq!(program.tasks.len(), 1);
        assert_eq!(program.tasks[0].name, "Main");
        assert_eq!(program.tasks[0].body.statements.len(), 1);
    }

    #[test]
    fn parses_multi_task_with_multiplicity_and_index() {
        let program = parse(
            "task Printer[5] {\n $index -> Main;\n}\ntask Main {\n loop {\n x <- ?c;\n x -> $out;\n }\n}\n",
        );
        assert_eq!(program.tasks[0].name, "Printer");
        assert!(matches!(
            program.tasks[0].multiplicity,
            Some(Expr::IntegerLiteral(5))
        ));
        match &program.tasks[0].body.statements[0] {
            Statement::Send {
                value: Expr::MagicIndex,
                channel: ChannelExpr::Expr(expr),
            } => assert!(matches!(**expr, Expr::Name(ref n) if n == "Main")),
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn parses_assignment_receive_and_discard() {
        let program = parse("task A {\n n = 1;\n _ <- B;\n m <- ?c;\n}\n");
        let stmts = &program.tasks[0].body.statements;
        assert!(matches!(stmts[0], Statement::Assignment { .. }));
        assert!(matches!(
            stmts[1],
            Statement::Receive { target: None, .. }
        ));
        assert!(matches!(
            stmts[2],
            Statement::Receive {
                target: Some(_),
                spec: ChannelSpec::Binding { .. }
            }
        ));
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let program = parse("task A {\n x = 1 + 2 * 3 - -4;\n}\n");
        match &program.tasks[0].body.statements[0] {
            Statement::Assignment { value, .. } => {
                assert!(matches!(value, Expr::Binary { op: BinaryOp::Sub, .. }));
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn parses_if_else_and_while() {
        let program = parse(
            "task A {\n if x == 1 {\n exit;\n } else {\n n = 0;\n }\n while n < 3 {\n n = n + 1;\n }\n}\n",
        );
        assert!(matches!(
            program.tasks[0].body.statements[0],
            Statement::If { .. }
        ));
        assert!(matches!(
            program.tasks[0].body.statements[1],
            Statement::While { .. }
        ));
    }

    #[test]
    fn reports_parse_error_with_position() {
        let err = super::super::parse("task Main {\n 1 +\n}\n").unwrap_err();
        assert!(matches!(err, ConkerError::Parse { .. }));
    }
}
