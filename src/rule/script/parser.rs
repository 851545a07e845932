//! Builds a [Program] from tokens.
//!
//! Function names, `tx` methods and variables are all resolved here, so a program that compiles
//! can only fail at run time because of the values it sees.

use regex::{Regex, RegexBuilder};

use super::{
    CompileError, ScriptPosition,
    interpreter::Value,
    lexer::{Token, TokenKind, tokenize},
    to_snake_case,
};

/// How deeply expressions and blocks may nest.
const MAX_NESTING: usize = 64;

/// The compiled size limit of a `matches` pattern, in bytes.
const REGEX_SIZE_LIMIT: usize = 256 * 1024;

/// The name of the transaction object.
const TX: &str = "tx";

// ============================================================================
// SYNTAX TREE
// ============================================================================

/// A compiled rule script.
#[derive(Debug, Clone)]
pub struct Program {
    pub(super) statements: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub(super) enum Stmt {
    Let {
        name: String,
        value: Expr,
        position: ScriptPosition,
    },
    Assign {
        name: String,
        value: Expr,
        position: ScriptPosition,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        otherwise: Option<Vec<Stmt>>,
        position: ScriptPosition,
    },
    Return {
        value: Option<Expr>,
        position: ScriptPosition,
    },
    Expr(Expr),
}

impl Stmt {
    pub(super) fn position(&self) -> ScriptPosition {
        match self {
            Stmt::Let { position, .. }
            | Stmt::Assign { position, .. }
            | Stmt::If { position, .. }
            | Stmt::Return { position, .. } => *position,
            Stmt::Expr(expr) => expr.position,
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct Expr {
    pub kind: ExprKind,
    pub position: ScriptPosition,
}

#[derive(Debug, Clone)]
pub(super) enum ExprKind {
    Literal(Value),
    List(Vec<Expr>),
    Variable(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Matches(Box<Expr>, Regex),
    Index(Box<Expr>, Box<Expr>),
    Call(Builtin, Vec<Expr>),
    Tx(TxMethod, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Contains,
}

/// The functions available to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Builtin {
    Lower,
    Upper,
    Trim,
    Len,
    StartsWith,
    EndsWith,
    Abs,
    Round,
    Str,
    Now,
}

impl Builtin {
    const ALL: [Builtin; 10] = [
        Builtin::Lower,
        Builtin::Upper,
        Builtin::Trim,
        Builtin::Len,
        Builtin::StartsWith,
        Builtin::EndsWith,
        Builtin::Abs,
        Builtin::Round,
        Builtin::Str,
        Builtin::Now,
    ];

    pub(super) fn name(&self) -> &'static str {
        match self {
            Builtin::Lower => "lower",
            Builtin::Upper => "upper",
            Builtin::Trim => "trim",
            Builtin::Len => "len",
            Builtin::StartsWith => "starts_with",
            Builtin::EndsWith => "ends_with",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
            Builtin::Str => "str",
            Builtin::Now => "now",
        }
    }

    /// The smallest and largest number of arguments.
    fn arity(&self) -> (usize, usize) {
        match self {
            Builtin::Now => (0, 0),
            Builtin::StartsWith | Builtin::EndsWith => (2, 2),
            Builtin::Round => (1, 2),
            Builtin::Lower
            | Builtin::Upper
            | Builtin::Trim
            | Builtin::Len
            | Builtin::Abs
            | Builtin::Str => (1, 1),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Builtin::ALL
            .into_iter()
            .find(|builtin| builtin.name() == name)
    }
}

/// The methods of the `tx` object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TxMethod {
    GetTitle,
    GetNotes,
    GetAmount,
    GetSourceAccountId,
    GetDestinationAccountId,
    GetSourceAmount,
    GetDestinationAmount,
    GetSourceCurrency,
    GetDestinationCurrency,
    GetCategoryId,
    GetTags,
    HasTag,
    GetTransactionType,
    GetTransactionDate,
    SetCategoryId,
    AddTag,
    RemoveTag,
    SetTitle,
    SetNotes,
    Reject,
}

impl TxMethod {
    const ALL: [TxMethod; 20] = [
        TxMethod::GetTitle,
        TxMethod::GetNotes,
        TxMethod::GetAmount,
        TxMethod::GetSourceAccountId,
        TxMethod::GetDestinationAccountId,
        TxMethod::GetSourceAmount,
        TxMethod::GetDestinationAmount,
        TxMethod::GetSourceCurrency,
        TxMethod::GetDestinationCurrency,
        TxMethod::GetCategoryId,
        TxMethod::GetTags,
        TxMethod::HasTag,
        TxMethod::GetTransactionType,
        TxMethod::GetTransactionDate,
        TxMethod::SetCategoryId,
        TxMethod::AddTag,
        TxMethod::RemoveTag,
        TxMethod::SetTitle,
        TxMethod::SetNotes,
        TxMethod::Reject,
    ];

    pub(super) fn name(&self) -> &'static str {
        match self {
            TxMethod::GetTitle => "get_title",
            TxMethod::GetNotes => "get_notes",
            TxMethod::GetAmount => "get_amount",
            TxMethod::GetSourceAccountId => "get_source_account_id",
            TxMethod::GetDestinationAccountId => "get_destination_account_id",
            TxMethod::GetSourceAmount => "get_source_amount",
            TxMethod::GetDestinationAmount => "get_destination_amount",
            TxMethod::GetSourceCurrency => "get_source_currency",
            TxMethod::GetDestinationCurrency => "get_destination_currency",
            TxMethod::GetCategoryId => "get_category_id",
            TxMethod::GetTags => "get_tags",
            TxMethod::HasTag => "has_tag",
            TxMethod::GetTransactionType => "get_transaction_type",
            TxMethod::GetTransactionDate => "get_transaction_date",
            TxMethod::SetCategoryId => "set_category_id",
            TxMethod::AddTag => "add_tag",
            TxMethod::RemoveTag => "remove_tag",
            TxMethod::SetTitle => "set_title",
            TxMethod::SetNotes => "set_notes",
            TxMethod::Reject => "reject",
        }
    }

    fn arity(&self) -> usize {
        match self {
            TxMethod::HasTag
            | TxMethod::SetCategoryId
            | TxMethod::AddTag
            | TxMethod::RemoveTag
            | TxMethod::SetTitle
            | TxMethod::SetNotes
            | TxMethod::Reject => 1,
            _ => 0,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        TxMethod::ALL.into_iter().find(|method| method.name() == name)
    }
}

// ============================================================================
// PARSER
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    scopes: Vec<Vec<String>>,
    depth: usize,
}

type ParseResult<T> = Result<T, CompileError>;

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always ends with Eof, which is never consumed.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.index + offset).map(|token| &token.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.index += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> ParseResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            let found = self.peek();
            Err(CompileError::new(
                found.position,
                format!(
                    "expected {} {context}, found {}",
                    kind.describe(),
                    found.kind.describe()
                ),
            ))
        }
    }

    fn expect_identifier(&mut self, context: &str) -> ParseResult<(String, ScriptPosition)> {
        let token = self.advance();
        match token.kind {
            TokenKind::Ident(name) => Ok((name, token.position)),
            other => Err(CompileError::new(
                token.position,
                format!("expected a name {context}, found {}", other.describe()),
            )),
        }
    }

    fn nested<T>(
        &mut self,
        position: ScriptPosition,
        parse: impl FnOnce(&mut Self) -> ParseResult<T>,
    ) -> ParseResult<T> {
        let outer = self.depth;
        self.deepen(position)?;

        let result = parse(self);
        self.depth = outer;
        result
    }

    /// Charge one level for a node built on top of an operand that was already parsed.
    ///
    /// Operator chains fold into left-deep trees, so each link counts until the chain's
    /// precedence level returns.
    fn deepen(&mut self, position: ScriptPosition) -> ParseResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(CompileError::new(position, "script is nested too deeply"));
        }

        Ok(())
    }

    fn declare(&mut self, name: String) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name);
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.scopes
            .iter()
            .any(|scope| scope.iter().any(|declared| declared == name))
    }

    // ===== STATEMENTS =====

    fn program(&mut self) -> ParseResult<Program> {
        let mut statements = Vec::new();

        while !self.check(&TokenKind::Eof) {
            statements.push(self.statement()?);
        }

        Ok(Program { statements })
    }

    fn end_of_statement(&mut self) -> ParseResult<()> {
        if self.eat(&TokenKind::Semicolon)
            || self.check(&TokenKind::RightBrace)
            || self.check(&TokenKind::Eof)
        {
            Ok(())
        } else {
            self.expect(TokenKind::Semicolon, "after statement")
                .map(|_| ())
        }
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let position = self.peek().position;

        match self.peek().kind.clone() {
            TokenKind::Let => {
                self.advance();
                let (name, name_position) = self.expect_identifier("after let")?;
                if name == TX {
                    return Err(CompileError::new(name_position, "tx is reserved"));
                }
                self.expect(TokenKind::Assign, "after variable name")?;
                let value = self.expression()?;
                self.end_of_statement()?;
                self.declare(name.clone());

                Ok(Stmt::Let {
                    name,
                    value,
                    position,
                })
            }
            TokenKind::If => {
                self.advance();
                self.if_statement(position)
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(&TokenKind::Semicolon)
                    || self.check(&TokenKind::RightBrace)
                    || self.check(&TokenKind::Eof)
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_of_statement()?;

                Ok(Stmt::Return { value, position })
            }
            TokenKind::Ident(name) if self.peek_kind_at(1) == Some(&TokenKind::Assign) => {
                if name == TX {
                    return Err(CompileError::new(position, "tx cannot be assigned to"));
                }
                if !self.is_declared(&name) {
                    return Err(CompileError::new(
                        position,
                        format!("unknown variable \"{name}\""),
                    ));
                }
                self.advance();
                self.advance();
                let value = self.expression()?;
                self.end_of_statement()?;

                Ok(Stmt::Assign {
                    name,
                    value,
                    position,
                })
            }
            _ => {
                let expr = self.expression()?;
                self.end_of_statement()?;

                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn if_statement(&mut self, position: ScriptPosition) -> ParseResult<Stmt> {
        let mut branches = Vec::new();
        let mut otherwise = None;

        loop {
            let condition = self.expression()?;
            let body = self.block()?;
            branches.push((condition, body));

            if !self.eat(&TokenKind::Else) {
                break;
            }
            if !self.eat(&TokenKind::If) {
                otherwise = Some(self.block()?);
                break;
            }
        }

        Ok(Stmt::If {
            branches,
            otherwise,
            position,
        })
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        let open = self.expect(TokenKind::LeftBrace, "to open block")?;

        self.nested(open.position, |parser| {
            parser.scopes.push(Vec::new());
            let mut statements = Vec::new();

            while !parser.check(&TokenKind::RightBrace) {
                if parser.check(&TokenKind::Eof) {
                    return Err(CompileError::new(open.position, "unclosed block"));
                }
                statements.push(parser.statement()?);
            }
            parser.advance();
            parser.scopes.pop();

            Ok(statements)
        })
    }

    // ===== EXPRESSIONS =====

    fn expression(&mut self) -> ParseResult<Expr> {
        let position = self.peek().position;
        self.nested(position, Self::or)
    }

    fn or(&mut self) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut left = self.and()?;

        while self.check(&TokenKind::OrOr) {
            let position = self.advance().position;
            self.deepen(position)?;
            let right = self.and()?;
            left = Expr {
                kind: ExprKind::Or(Box::new(left), Box::new(right)),
                position,
            };
        }

        self.depth = outer;
        Ok(left)
    }

    fn and(&mut self) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut left = self.equality()?;

        while self.check(&TokenKind::AndAnd) {
            let position = self.advance().position;
            self.deepen(position)?;
            let right = self.equality()?;
            left = Expr {
                kind: ExprKind::And(Box::new(left), Box::new(right)),
                position,
            };
        }

        self.depth = outer;
        Ok(left)
    }

    fn binary(left: Expr, op: BinaryOp, right: Expr, position: ScriptPosition) -> Expr {
        Expr {
            kind: ExprKind::Binary(op, Box::new(left), Box::new(right)),
            position,
        }
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut left = self.comparison()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Equal => BinaryOp::Equal,
                TokenKind::NotEqual => BinaryOp::NotEqual,
                _ => break,
            };
            let position = self.advance().position;
            self.deepen(position)?;
            let right = self.comparison()?;
            left = Self::binary(left, op, right, position);
        }

        self.depth = outer;
        Ok(left)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut left = self.additive()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                TokenKind::Contains => BinaryOp::Contains,
                TokenKind::Matches => {
                    let position = self.advance().position;
                    self.deepen(position)?;
                    let regex = self.pattern()?;
                    left = Expr {
                        kind: ExprKind::Matches(Box::new(left), regex),
                        position,
                    };
                    continue;
                }
                _ => break,
            };
            let position = self.advance().position;
            self.deepen(position)?;
            let right = self.additive()?;
            left = Self::binary(left, op, right, position);
        }

        self.depth = outer;
        Ok(left)
    }

    fn pattern(&mut self) -> ParseResult<Regex> {
        let token = self.advance();
        let TokenKind::Str(pattern) = token.kind else {
            return Err(CompileError::new(
                token.position,
                format!(
                    "matches expects a string pattern, found {}",
                    token.kind.describe()
                ),
            ));
        };

        RegexBuilder::new(&pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .dfa_size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|error| {
                CompileError::new(token.position, format!("invalid pattern: {error}"))
            })
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut left = self.multiplicative()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            let position = self.advance().position;
            self.deepen(position)?;
            let right = self.multiplicative()?;
            left = Self::binary(left, op, right, position);
        }

        self.depth = outer;
        Ok(left)
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut left = self.unary()?;

        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Remainder,
                _ => break,
            };
            let position = self.advance().position;
            self.deepen(position)?;
            let right = self.unary()?;
            left = Self::binary(left, op, right, position);
        }

        self.depth = outer;
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.postfix(),
        };
        let position = self.advance().position;
        let operand = self.nested(position, Self::unary)?;

        Ok(Expr {
            kind: ExprKind::Unary(op, Box::new(operand)),
            position,
        })
    }

    fn arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(TokenKind::LeftParen, "to start arguments")?;
        let mut arguments = Vec::new();

        if !self.eat(&TokenKind::RightParen) {
            loop {
                arguments.push(self.expression()?);
                if self.eat(&TokenKind::RightParen) {
                    break;
                }
                self.expect(TokenKind::Comma, "between arguments")?;
            }
        }

        Ok(arguments)
    }

    fn builtin_call(
        &self,
        name: &str,
        arguments: Vec<Expr>,
        position: ScriptPosition,
    ) -> ParseResult<Expr> {
        let builtin = Builtin::from_name(&to_snake_case(name)).ok_or_else(|| {
            CompileError::new(position, format!("unknown function \"{name}\""))
        })?;

        let (min, max) = builtin.arity();
        if arguments.len() < min || arguments.len() > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{min} to {max}")
            };
            return Err(CompileError::new(
                position,
                format!(
                    "{} takes {expected} arguments, got {}",
                    builtin.name(),
                    arguments.len()
                ),
            ));
        }

        Ok(Expr {
            kind: ExprKind::Call(builtin, arguments),
            position,
        })
    }

    fn tx_member(&mut self) -> ParseResult<Expr> {
        self.expect(TokenKind::Dot, "after tx")?;
        let (member, position) = self.expect_identifier("after tx.")?;
        let snake = to_snake_case(&member);

        if self.check(&TokenKind::LeftParen) {
            let arguments = self.arguments()?;
            let method = TxMethod::from_name(&snake).ok_or_else(|| {
                CompileError::new(position, format!("tx has no method \"{member}\""))
            })?;

            if arguments.len() != method.arity() {
                return Err(CompileError::new(
                    position,
                    format!(
                        "tx.{} takes {} arguments, got {}",
                        method.name(),
                        method.arity(),
                        arguments.len()
                    ),
                ));
            }

            Ok(Expr {
                kind: ExprKind::Tx(method, arguments),
                position,
            })
        } else {
            match TxMethod::from_name(&format!("get_{snake}")) {
                Some(method) if method.arity() == 0 => Ok(Expr {
                    kind: ExprKind::Tx(method, Vec::new()),
                    position,
                }),
                _ => Err(CompileError::new(
                    position,
                    format!("tx has no property \"{member}\""),
                )),
            }
        }
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let outer = self.depth;
        let mut expr = self.primary()?;

        loop {
            if self.eat(&TokenKind::Dot) {
                let (name, position) = self.expect_identifier("after \".\"")?;
                self.deepen(position)?;
                if !self.check(&TokenKind::LeftParen) {
                    return Err(CompileError::new(
                        position,
                        format!("only tx has properties, call {name}() instead"),
                    ));
                }
                let mut arguments = vec![expr];
                arguments.extend(self.arguments()?);
                expr = self.builtin_call(&name, arguments, position)?;
            } else if self.check(&TokenKind::LeftBracket) {
                let position = self.advance().position;
                self.deepen(position)?;
                let index = self.expression()?;
                self.expect(TokenKind::RightBracket, "after index")?;
                expr = Expr {
                    kind: ExprKind::Index(Box::new(expr), Box::new(index)),
                    position,
                };
            } else {
                break;
            }
        }

        self.depth = outer;
        Ok(expr)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let position = token.position;

        let kind = match token.kind {
            TokenKind::Number(number) => ExprKind::Literal(Value::Number(number)),
            TokenKind::Str(text) => ExprKind::Literal(Value::Str(text)),
            TokenKind::True => ExprKind::Literal(Value::Bool(true)),
            TokenKind::False => ExprKind::Literal(Value::Bool(false)),
            TokenKind::Nil => ExprKind::Literal(Value::Nil),
            TokenKind::LeftParen => {
                let inner = self.expression()?;
                self.expect(TokenKind::RightParen, "to close parenthesis")?;
                return Ok(inner);
            }
            TokenKind::LeftBracket => {
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RightBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.eat(&TokenKind::RightBracket) {
                            break;
                        }
                        self.expect(TokenKind::Comma, "between list items")?;
                    }
                }
                ExprKind::List(items)
            }
            TokenKind::Ident(name) if name == TX => return self.tx_member(),
            TokenKind::Ident(name) => {
                if self.check(&TokenKind::LeftParen) {
                    let arguments = self.arguments()?;
                    return self.builtin_call(&name, arguments, position);
                }
                if !self.is_declared(&name) {
                    return Err(CompileError::new(
                        position,
                        format!("unknown variable \"{name}\""),
                    ));
                }
                ExprKind::Variable(name)
            }
            other => {
                return Err(CompileError::new(
                    position,
                    format!("unexpected {}", other.describe()),
                ));
            }
        };

        Ok(Expr { kind, position })
    }
}

/// Compile `source` into a [Program].
///
/// # Errors
/// Returns the first syntax error, unknown name or invalid pattern together with its position.
pub fn compile(source: &str) -> Result<Program, CompileError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        scopes: vec![Vec::new()],
        depth: 0,
    };

    parser.program()
}

#[cfg(test)]
mod compile_tests {
    use crate::rule::script::ScriptPosition;

    use super::{ExprKind, Stmt, TxMethod, compile};

    #[test]
    fn compiles_typical_rule() {
        let program = compile(
            "if tx.title matches \"(?i)netflix\" {\n    tx.set_category_id(7);\n    tx.add_tag(2);\n    return true;\n}\nreturn false;",
        )
        .unwrap();

        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn pascal_case_members_resolve_to_snake_case() {
        let program = compile("tx.SetCategoryID(1); return tx.Title;").unwrap();

        let Stmt::Expr(call) = &program.statements[0] else {
            panic!("expected expression statement");
        };
        assert!(matches!(call.kind, ExprKind::Tx(TxMethod::SetCategoryId, _)));
        let Stmt::Return {
            value: Some(value), ..
        } = &program.statements[1]
        else {
            panic!("expected return");
        };
        assert!(matches!(value.kind, ExprKind::Tx(TxMethod::GetTitle, _)));
    }

    #[test]
    fn unknown_function_is_reported_with_position() {
        let error = compile("let a = 1;\nlet b = fetch(\"http://x\");").unwrap_err();

        assert_eq!(error.position, ScriptPosition::new(2, 9));
        assert_eq!(error.message, "unknown function \"fetch\"");
    }

    #[test]
    fn unknown_tx_method_is_rejected() {
        let error = compile("tx.delete();").unwrap_err();

        assert_eq!(error.message, "tx has no method \"delete\"");
    }

    #[test]
    fn undeclared_variable_is_rejected() {
        let error = compile("return total > 5;").unwrap_err();

        assert_eq!(error.message, "unknown variable \"total\"");
    }

    #[test]
    fn variables_do_not_escape_their_block() {
        assert!(compile("if true { let a = 1; } return a;").is_err());
        assert!(compile("let a = 1; if true { a = 2; } return a;").is_ok());
    }

    #[test]
    fn tx_cannot_be_rebound() {
        assert_eq!(compile("let tx = 1;").unwrap_err().message, "tx is reserved");
    }

    #[test]
    fn wrong_argument_count_is_rejected() {
        let error = compile("tx.add_tag();").unwrap_err();

        assert_eq!(error.message, "tx.add_tag takes 1 arguments, got 0");
    }

    #[test]
    fn invalid_regex_is_a_compile_error() {
        let error = compile("return tx.title matches \"(unclosed\";").unwrap_err();

        assert!(error.message.starts_with("invalid pattern"));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let source = format!("return {}1{};", "(".repeat(200), ")".repeat(200));

        assert_eq!(
            compile(&source).unwrap_err().message,
            "script is nested too deeply"
        );
    }

    #[test]
    fn long_operator_chains_are_rejected() {
        let source = format!("return 1{};", "+1".repeat(5_000));

        assert_eq!(
            compile(&source).unwrap_err().message,
            "script is nested too deeply"
        );
    }

    #[test]
    fn long_method_chains_are_rejected() {
        let source = format!("return tx.title{};", ".lower()".repeat(500));

        assert_eq!(
            compile(&source).unwrap_err().message,
            "script is nested too deeply"
        );
    }

    #[test]
    fn short_operator_chains_compile() {
        let source = format!("return 1{};", "+1".repeat(10));

        assert!(compile(&source).is_ok());
        assert!(compile("return tx.amount > 1 && tx.amount < 2 || tx.title == \"x\";").is_ok());

        let conditions = vec!["tx.title.lower() != \"rent\""; 30].join(" && ");
        assert!(compile(&format!("return {conditions};")).is_ok());
    }

    #[test]
    fn method_sugar_on_values() {
        assert!(compile("return tx.title.lower().starts_with(\"net\");").is_ok());
    }

    #[test]
    fn missing_semicolon_between_statements() {
        let error = compile("let a = 1 let b = 2;").unwrap_err();

        assert_eq!(error.position, ScriptPosition::new(1, 11));
    }
}
