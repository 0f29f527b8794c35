use std::{
    collections::HashMap,
    fmt::{self, Display},
    mem,
    rc::Rc,
};

use thiserror::Error;
use tracing::debug;

use crate::{
    ast::{
        BlockStatement, Boolean, CallExpression, Expression, ExpressionStatement, FunctionLiteral,
        Identifier, IfExpression, InfixExpression, IntegerLiteral, LetStatement, PrefixExpression,
        Program, ReturnStatement, Statement, StringLiteral,
    },
    lexer::Lexer,
    token::{Precedence, Token, TokenKind},
};

type ParseExpressionResult = Result<Expression, ParseError>;
type PrefixParseFn = Box<dyn Fn(&mut ParserInternal, &ParsingContext) -> ParseExpressionResult>;
type InfixParseFn =
    Box<dyn Fn(&mut ParserInternal, Expression, &ParsingContext) -> ParseExpressionResult>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected next token to be {expected}, got {got} instead")]
    UnexpectedToken { expected: TokenKind, got: TokenKind },
    #[error("no prefix parse function for {0} found")]
    NoPrefixParseFn(TokenKind),
    #[error("could not parse {0:?} as integer")]
    InvalidInteger(String),
}

#[derive(Debug)]
pub struct ParseErrors(pub Vec<ParseError>);

impl std::error::Error for ParseErrors {}

impl Display for ParseErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<String>>()
                .join("\n")
        )
    }
}

struct ParserInternal {
    lexer: Lexer,
    cur_token: Token,
    peek_token: Token,
    errors: Vec<ParseError>,
    // Blocks entered but not yet closed; left raised when a block fails to parse.
    block_depth: usize,
}

pub struct Parser {
    ctx: ParsingContext,
    parser: ParserInternal,
}

impl Parser {
    pub fn new(lexer: Lexer) -> Parser {
        Parser {
            ctx: ParsingContext::new(),
            parser: ParserInternal::new(lexer),
        }
    }

    /// Parses the whole input, failing if any statement was malformed.
    pub fn parse_program(&mut self) -> Result<Program, ParseErrors> {
        let program = self.parser.parse_program(&self.ctx);
        if self.parser.errors.is_empty() {
            Ok(program)
        } else {
            Err(ParseErrors(mem::take(&mut self.parser.errors)))
        }
    }
}

/// Parses a token stream into a program plus every syntax error seen on the way.
///
/// A non-empty error list means the program is partial and must not be evaluated.
pub fn parse(tokens: Lexer) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(tokens);
    let program = parser.parser.parse_program(&parser.ctx);
    (program, mem::take(&mut parser.parser.errors))
}

// This is needed to hold the expression parsing functions because the functions need
// to be passed a mutable reference to the Parser. If this is part of the parser, referring
// to a function will require an immutable ref to parser and we can't have a mutable and immutable
// ref to parser at the same time.
struct ParsingContext {
    prefix_parse_fns: HashMap<TokenKind, PrefixParseFn>,
    infix_parse_fns: HashMap<TokenKind, InfixParseFn>,
}

impl ParsingContext {
    fn register_prefix(&mut self, kind: TokenKind, func: PrefixParseFn) {
        self.prefix_parse_fns.insert(kind, func);
    }

    fn register_infix(&mut self, kind: TokenKind, func: InfixParseFn) {
        self.infix_parse_fns.insert(kind, func);
    }

    fn new() -> ParsingContext {
        let mut ctx = ParsingContext {
            prefix_parse_fns: HashMap::new(),
            infix_parse_fns: HashMap::new(),
        };

        ctx.register_prefix(TokenKind::Ident, ParserInternal::parse_identifier());
        ctx.register_prefix(TokenKind::Int, ParserInternal::parse_integer_literal());
        ctx.register_prefix(TokenKind::String, ParserInternal::parse_string_literal());
        ctx.register_prefix(TokenKind::True, ParserInternal::parse_boolean_literal());
        ctx.register_prefix(TokenKind::False, ParserInternal::parse_boolean_literal());
        ctx.register_prefix(TokenKind::Bang, ParserInternal::parse_prefix_expression());
        ctx.register_prefix(TokenKind::Minus, ParserInternal::parse_prefix_expression());
        ctx.register_prefix(TokenKind::LParen, ParserInternal::parse_grouped_expression());
        ctx.register_prefix(TokenKind::If, ParserInternal::parse_if_expression());
        ctx.register_prefix(TokenKind::Function, ParserInternal::parse_function_literal());

        for kind in [
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Slash,
            TokenKind::Asterisk,
            TokenKind::Eq,
            TokenKind::NotEq,
            TokenKind::Lt,
            TokenKind::Gt,
        ] {
            ctx.register_infix(kind, ParserInternal::parse_infix_expression());
        }
        ctx.register_infix(TokenKind::LParen, ParserInternal::parse_call_expression());
        ctx
    }
}

impl ParserInternal {
    fn new(lexer: Lexer) -> ParserInternal {
        let mut p = ParserInternal {
            lexer,
            cur_token: Token::eof(),
            peek_token: Token::eof(),
            errors: Vec::new(),
            block_depth: 0,
        };
        p.next_token();
        p.next_token();
        p
    }

    fn parse_identifier() -> PrefixParseFn {
        let f = |parser: &mut ParserInternal, _: &ParsingContext| -> ParseExpressionResult {
            Ok(Expression::Identifier(Identifier::new(
                parser.cur_token.clone(),
            )))
        };
        Box::new(f)
    }

    fn parse_integer_literal() -> PrefixParseFn {
        let f = |parser: &mut ParserInternal, _: &ParsingContext| -> ParseExpressionResult {
            let token = parser.cur_token.clone();
            let value = token
                .literal
                .parse::<i64>()
                .map_err(|_| ParseError::InvalidInteger(token.literal.clone()))?;
            Ok(Expression::IntegerLiteral(IntegerLiteral { token, value }))
        };
        Box::new(f)
    }

    fn parse_string_literal() -> PrefixParseFn {
        let f = |parser: &mut ParserInternal, _: &ParsingContext| -> ParseExpressionResult {
            let token = parser.cur_token.clone();
            let value = token.literal.clone();
            Ok(Expression::StringLiteral(StringLiteral { token, value }))
        };
        Box::new(f)
    }

    fn parse_boolean_literal() -> PrefixParseFn {
        let f = |parser: &mut ParserInternal, _: &ParsingContext| -> ParseExpressionResult {
            let token = parser.cur_token.clone();
            let value = token.is(TokenKind::True);
            Ok(Expression::Boolean(Boolean { token, value }))
        };
        Box::new(f)
    }

    fn parse_prefix_expression() -> PrefixParseFn {
        let f = |parser: &mut ParserInternal, ctx: &ParsingContext| -> ParseExpressionResult {
            let token = parser.cur_token.clone();
            parser.next_token();
            let right = parser.parse_expression(Precedence::Prefix, ctx)?;
            Ok(Expression::PrefixExpression(PrefixExpression {
                operator: token.literal.clone(),
                token,
                right: Box::new(right),
            }))
        };
        Box::new(f)
    }

    fn parse_grouped_expression() -> PrefixParseFn {
        let f = |parser: &mut ParserInternal, ctx: &ParsingContext| -> ParseExpressionResult {
            parser.next_token();
            let expression = parser.parse_expression(Precedence::Lowest, ctx)?;
            parser.expect_peek(TokenKind::RParen)?;
            Ok(expression)
        };
        Box::new(f)
    }

    fn parse_if_expression() -> PrefixParseFn {
        let f = |parser: &mut ParserInternal, ctx: &ParsingContext| -> ParseExpressionResult {
            let token = parser.cur_token.clone();
            parser.expect_peek(TokenKind::LParen)?;
            parser.next_token();
            let condition = parser.parse_expression(Precedence::Lowest, ctx)?;
            parser.expect_peek(TokenKind::RParen)?;
            parser.expect_peek(TokenKind::LBrace)?;
            let consequence = parser.parse_block_statement(ctx)?;
            let mut alternate = None;

            if parser.peek_token.is(TokenKind::Else) {
                parser.next_token();
                parser.expect_peek(TokenKind::LBrace)?;
                alternate = Some(parser.parse_block_statement(ctx)?);
            }

            Ok(Expression::IfExpression(IfExpression {
                token,
                condition: Box::new(condition),
                consequence,
                alternate,
            }))
        };
        Box::new(f)
    }

    fn parse_function_literal() -> PrefixParseFn {
        let f = |parser: &mut ParserInternal, ctx: &ParsingContext| -> ParseExpressionResult {
            let token = parser.cur_token.clone();
            parser.expect_peek(TokenKind::LParen)?;
            let parameters = parser.parse_parameters()?;
            parser.expect_peek(TokenKind::LBrace)?;
            let body = parser.parse_block_statement(ctx)?;
            Ok(Expression::FunctionLiteral(FunctionLiteral {
                token,
                parameters: Rc::new(parameters),
                body: Rc::new(body),
            }))
        };
        Box::new(f)
    }

    fn parse_infix_expression() -> InfixParseFn {
        let f = |parser: &mut ParserInternal,
                 left: Expression,
                 ctx: &ParsingContext|
         -> ParseExpressionResult {
            let precedence = Precedence::of(parser.cur_token.kind);
            let operator = parser.cur_token.clone();
            parser.next_token();
            let right = parser.parse_expression(precedence, ctx)?;
            Ok(Expression::InfixExpression(InfixExpression::new(
                operator, left, right,
            )))
        };
        Box::new(f)
    }

    fn parse_call_expression() -> InfixParseFn {
        let f = |parser: &mut ParserInternal,
                 left: Expression,
                 ctx: &ParsingContext|
         -> ParseExpressionResult {
            let token = parser.cur_token.clone();
            let arguments = parser.parse_arguments(ctx)?;
            Ok(Expression::CallExpression(CallExpression {
                token,
                function: Box::new(left),
                arguments,
            }))
        };
        Box::new(f)
    }

    fn parse_arguments(&mut self, ctx: &ParsingContext) -> Result<Vec<Expression>, ParseError> {
        let mut arguments = Vec::new();
        if self.peek_token.is(TokenKind::RParen) {
            self.next_token();
            return Ok(arguments);
        }

        self.next_token(); // Skip the LParen.
        arguments.push(self.parse_expression(Precedence::Lowest, ctx)?);

        while self.peek_token.is(TokenKind::Comma) {
            self.next_token();
            self.next_token();
            arguments.push(self.parse_expression(Precedence::Lowest, ctx)?);
        }

        self.expect_peek(TokenKind::RParen)?;
        Ok(arguments)
    }

    fn parse_parameters(&mut self) -> Result<Vec<Identifier>, ParseError> {
        let mut identifiers = Vec::new();
        if self.peek_token.is(TokenKind::RParen) {
            self.next_token();
            return Ok(identifiers);
        }

        self.expect_peek(TokenKind::Ident)?;
        identifiers.push(Identifier::new(self.cur_token.clone()));

        while self.peek_token.is(TokenKind::Comma) {
            self.next_token();
            self.expect_peek(TokenKind::Ident)?;
            identifiers.push(Identifier::new(self.cur_token.clone()));
        }

        self.expect_peek(TokenKind::RParen)?;
        Ok(identifiers)
    }

    fn parse_expression(
        &mut self,
        precedence: Precedence,
        ctx: &ParsingContext,
    ) -> ParseExpressionResult {
        let prefix_fn = ctx
            .prefix_parse_fns
            .get(&self.cur_token.kind)
            .ok_or(ParseError::NoPrefixParseFn(self.cur_token.kind))?;
        let mut left = prefix_fn(self, ctx)?;
        while !self.peek_token.is(TokenKind::Semicolon)
            && precedence < Precedence::of(self.peek_token.kind)
        {
            let f = match ctx.infix_parse_fns.get(&self.peek_token.kind) {
                Some(f) => f,
                None => return Ok(left),
            };
            self.next_token();
            left = f(self, left, ctx)?;
        }
        Ok(left)
    }

    fn next_token(&mut self) {
        let next = self.lexer.next_token();
        self.cur_token = mem::replace(&mut self.peek_token, next);
    }

    fn expect_peek(&mut self, expected: TokenKind) -> Result<(), ParseError> {
        if !self.peek_token.is(expected) {
            return Err(ParseError::UnexpectedToken {
                expected,
                got: self.peek_token.kind,
            });
        }
        self.next_token();
        Ok(())
    }

    fn skip_semicolon(&mut self) {
        if self.peek_token.is(TokenKind::Semicolon) {
            self.next_token();
        }
    }

    fn parse_let_statement(&mut self, ctx: &ParsingContext) -> Result<Statement, ParseError> {
        let token = self.cur_token.clone();
        self.expect_peek(TokenKind::Ident)?;
        let name = Identifier::new(self.cur_token.clone());
        self.expect_peek(TokenKind::Assign)?;
        self.next_token(); // cur is now the first token of the value.
        let value = self.parse_expression(Precedence::Lowest, ctx)?;
        self.skip_semicolon();
        Ok(Statement::LetStatement(LetStatement { token, name, value }))
    }

    fn parse_return_statement(&mut self, ctx: &ParsingContext) -> Result<Statement, ParseError> {
        let token = self.cur_token.clone();
        self.next_token();
        let return_value = self.parse_expression(Precedence::Lowest, ctx)?;
        self.skip_semicolon();
        Ok(Statement::ReturnStatement(ReturnStatement {
            token,
            return_value,
        }))
    }

    fn parse_expression_statement(
        &mut self,
        ctx: &ParsingContext,
    ) -> Result<Statement, ParseError> {
        let token = self.cur_token.clone();
        let expression = self.parse_expression(Precedence::Lowest, ctx)?;
        self.skip_semicolon();
        Ok(Statement::ExpressionStatement(ExpressionStatement {
            token,
            expression,
        }))
    }

    fn parse_block_statement(
        &mut self,
        ctx: &ParsingContext,
    ) -> Result<BlockStatement, ParseError> {
        let mut statements = Vec::new();
        let token = self.cur_token.clone();
        self.block_depth += 1;
        self.next_token();
        while !self.cur_token.is(TokenKind::RBrace) {
            if self.cur_token.is(TokenKind::Eof) {
                return Err(ParseError::UnexpectedToken {
                    expected: TokenKind::RBrace,
                    got: TokenKind::Eof,
                });
            }
            statements.push(self.parse_statement(ctx)?);
            self.next_token();
        }
        self.block_depth -= 1;
        Ok(BlockStatement { token, statements })
    }

    fn parse_statement(&mut self, ctx: &ParsingContext) -> Result<Statement, ParseError> {
        match self.cur_token.kind {
            TokenKind::Let => self.parse_let_statement(ctx),
            TokenKind::Return => self.parse_return_statement(ctx),
            _ => self.parse_expression_statement(ctx),
        }
    }

    /// Skips the rest of a broken statement. Outside any block that is up to
    /// the next `;`; inside one it is up to the brace closing the outermost
    /// open block, plus a `;` right after it.
    fn synchronize(&mut self) {
        while !self.cur_token.is(TokenKind::Eof) {
            match self.cur_token.kind {
                TokenKind::Semicolon if self.block_depth == 0 => break,
                TokenKind::LBrace => self.block_depth += 1,
                TokenKind::RBrace if self.block_depth > 0 => {
                    self.block_depth -= 1;
                    if self.block_depth == 0 {
                        if self.peek_token.is(TokenKind::Semicolon) {
                            self.next_token();
                        }
                        break;
                    }
                }
                _ => {}
            }
            self.next_token();
        }
        self.block_depth = 0;
    }

    fn parse_program(&mut self, ctx: &ParsingContext) -> Program {
        let mut prog = Program {
            statements: Vec::new(),
        };
        while !self.cur_token.is(TokenKind::Eof) {
            match self.parse_statement(ctx) {
                Ok(s) => prog.statements.push(s),
                Err(e) => {
                    debug!(error = %e, "parse error");
                    self.errors.push(e);
                    self.synchronize();
                    debug!(token = %self.cur_token.kind, "resynchronized");
                }
            }
            self.next_token();
        }
        prog
    }
}
