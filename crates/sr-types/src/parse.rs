//! Reader for the infix expression strings produced by the search engine.
//!
//! Accepts the sympy-flavoured syntax the engine prints (`x_0`, `**`,
//! `zoo`, `AccumBounds(...)`) as well as everything [`Expr`]'s `Display`
//! produces.

use crate::errors::ParseError;
use crate::expr::{
    BinaryOp, Expr, ExprBuilder, NaryOp, NodeId, RelOp, Symbolic, UnaryOp, MAX_DEPTH,
};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
    Rel(RelOp),
}

/// A token with its source position and text.
#[derive(Debug, Clone)]
struct Lexeme {
    token: Token,
    pos: usize,
    text: String,
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn tokenize(mut self) -> Result<Vec<Lexeme>, ParseError> {
        let mut tokens = Vec::new();
        while let Some(c) = self.peek_char() {
            let start = self.pos;
            if c.is_whitespace() {
                self.pos += c.len_utf8();
                continue;
            }
            let token = match c {
                '0'..='9' | '.' => self.number()?,
                c if c.is_ascii_alphabetic() || c == '_' => self.ident(),
                _ => self.punct(c)?,
            };
            tokens.push(Lexeme {
                token,
                pos: start,
                text: self.src[start..self.pos].to_string(),
            });
        }
        Ok(tokens)
    }

    fn number(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && (bytes[self.pos].is_ascii_digit() || bytes[self.pos] == b'.') {
            self.pos += 1;
        }
        // Exponent part, only when followed by a digit (optionally signed).
        if self.pos < bytes.len() && (bytes[self.pos] == b'e' || bytes[self.pos] == b'E') {
            let mut look = self.pos + 1;
            if look < bytes.len() && (bytes[look] == b'+' || bytes[look] == b'-') {
                look += 1;
            }
            if look < bytes.len() && bytes[look].is_ascii_digit() {
                self.pos = look;
                while self.pos < bytes.len() && bytes[self.pos].is_ascii_digit() {
                    self.pos += 1;
                }
            }
        }
        let text = &self.src[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ParseError::MalformedNumber {
                text: text.to_string(),
                pos: start,
            })
    }

    fn ident(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        Token::Ident(self.src[start..self.pos].to_string())
    }

    fn punct(&mut self, c: char) -> Result<Token, ParseError> {
        let rest = &self.src[self.pos..];
        let (token, len) = if rest.starts_with("**") {
            (Token::Caret, 2)
        } else if rest.starts_with("<=") {
            (Token::Rel(RelOp::Le), 2)
        } else if rest.starts_with(">=") {
            (Token::Rel(RelOp::Ge), 2)
        } else if rest.starts_with("==") {
            (Token::Rel(RelOp::Eq), 2)
        } else if rest.starts_with("!=") {
            (Token::Rel(RelOp::Ne), 2)
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                '<' => Token::Rel(RelOp::Lt),
                '>' => Token::Rel(RelOp::Gt),
                _ => return Err(ParseError::UnexpectedChar { ch: c, pos: self.pos }),
            };
            (token, c.len_utf8())
        };
        self.pos += len;
        Ok(token)
    }
}

/// Parses one raw candidate expression.
pub fn parse(src: &str) -> Result<Expr, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
        builder: ExprBuilder::new(),
    };
    let root = parser.relational()?;
    if let Some(lexeme) = parser.tokens.get(parser.cursor) {
        return Err(ParseError::Trailing { pos: lexeme.pos });
    }
    let expr = parser.builder.finish(root);
    // chains like `a - b - c - ...` nest without recursing in the parser
    if expr.depth() > MAX_DEPTH {
        return Err(ParseError::TooDeep { limit: MAX_DEPTH });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Lexeme>,
    cursor: usize,
    depth: usize,
    builder: ExprBuilder,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|l| &l.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + offset).map(|l| &l.token)
    }

    fn next(&mut self) -> Result<Lexeme, ParseError> {
        let item = self
            .tokens
            .get(self.cursor)
            .cloned()
            .ok_or(ParseError::UnexpectedEnd)?;
        self.cursor += 1;
        Ok(item)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        let lexeme = self.next()?;
        if lexeme.token == expected {
            Ok(())
        } else {
            Err(unexpected(lexeme))
        }
    }

    fn relational(&mut self) -> Result<NodeId, ParseError> {
        let lhs = self.additive()?;
        if let Some(Token::Rel(op)) = self.peek() {
            let op = *op;
            self.cursor += 1;
            let rhs = self.additive()?;
            return Ok(self.builder.relational(op, lhs, rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<NodeId, ParseError> {
        let first = self.multiplicative()?;
        let mut chain = vec![first];
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.cursor += 1;
                    chain.push(self.multiplicative()?);
                }
                Some(Token::Minus) => {
                    self.cursor += 1;
                    let lhs = self.close(NaryOp::Add, chain);
                    let rhs = self.multiplicative()?;
                    chain = vec![self.builder.binary(BinaryOp::Sub, lhs, rhs)];
                }
                _ => break,
            }
        }
        Ok(self.close(NaryOp::Add, chain))
    }

    fn multiplicative(&mut self) -> Result<NodeId, ParseError> {
        let first = self.unary()?;
        let mut chain = vec![first];
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.cursor += 1;
                    chain.push(self.unary()?);
                }
                Some(Token::Slash) => {
                    self.cursor += 1;
                    let lhs = self.close(NaryOp::Mul, chain);
                    let rhs = self.unary()?;
                    chain = vec![self.builder.binary(BinaryOp::Div, lhs, rhs)];
                }
                _ => break,
            }
        }
        Ok(self.close(NaryOp::Mul, chain))
    }

    fn close(&mut self, op: NaryOp, mut chain: Vec<NodeId>) -> NodeId {
        if chain.len() == 1 {
            chain.remove(0)
        } else {
            self.builder.nary(op, chain)
        }
    }

    /// Every nesting level (parentheses, calls, signs, exponents) passes
    /// through here, so this is where depth is bounded.
    fn unary(&mut self) -> Result<NodeId, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(ParseError::TooDeep { limit: MAX_DEPTH });
        }
        self.depth += 1;
        let result = self.signed();
        self.depth -= 1;
        result
    }

    fn signed(&mut self) -> Result<NodeId, ParseError> {
        match self.peek() {
            Some(Token::Plus) => {
                self.cursor += 1;
                self.unary()
            }
            Some(Token::Minus) => {
                self.cursor += 1;
                // A sign directly on a literal belongs to the literal, unless
                // the literal is the base of a power (`-2**2` is `-(2**2)`).
                let exponent_follows = matches!(self.peek_at(1), Some(Token::Caret));
                match self.peek().cloned() {
                    Some(Token::Number(v)) if !exponent_follows => {
                        self.cursor += 1;
                        Ok(self.builder.constant(-v))
                    }
                    Some(Token::Ident(name)) if name == "oo" && !exponent_follows => {
                        self.cursor += 1;
                        Ok(self.builder.symbol(Symbolic::NegInfinity))
                    }
                    _ => {
                        let operand = self.unary()?;
                        Ok(self.builder.unary(UnaryOp::Neg, operand))
                    }
                }
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<NodeId, ParseError> {
        let base = self.primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.cursor += 1;
            // Right associative; the exponent may carry its own sign.
            let exponent = self.unary()?;
            return Ok(self.builder.binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<NodeId, ParseError> {
        let lexeme = self.next()?;
        match lexeme.token {
            Token::Number(v) => Ok(self.builder.constant(v)),
            Token::LParen => {
                let inner = self.relational()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(ref name) => {
                if let Some(Token::LParen) = self.peek() {
                    self.cursor += 1;
                    let args = self.arguments()?;
                    self.call(name.clone(), args)
                } else {
                    self.atom(name.clone(), lexeme.pos)
                }
            }
            _ => Err(unexpected(lexeme)),
        }
    }

    fn arguments(&mut self) -> Result<Vec<NodeId>, ParseError> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.cursor += 1;
            return Ok(args);
        }
        loop {
            args.push(self.relational()?);
            let lexeme = self.next()?;
            match lexeme.token {
                Token::Comma => continue,
                Token::RParen => return Ok(args),
                _ => return Err(unexpected(lexeme)),
            }
        }
    }

    fn call(&mut self, name: String, args: Vec<NodeId>) -> Result<NodeId, ParseError> {
        let unary = match name.as_str() {
            "sin" => Some(UnaryOp::Sin),
            "cos" => Some(UnaryOp::Cos),
            "log" | "ln" => Some(UnaryOp::Log),
            "sqrt" => Some(UnaryOp::Sqrt),
            "exp" => Some(UnaryOp::Exp),
            "abs" | "Abs" => Some(UnaryOp::Abs),
            _ => None,
        };
        if let Some(op) = unary {
            let [arg] = arity::<1>(&name, args)?;
            return Ok(self.builder.unary(op, arg));
        }
        match name.as_str() {
            "max" | "Max" | "min" | "Min" => {
                if args.is_empty() {
                    return Err(ParseError::Arity {
                        name: name.clone(),
                        expected: 1,
                        got: 0,
                    });
                }
                let op = if name.eq_ignore_ascii_case("max") {
                    NaryOp::Max
                } else {
                    NaryOp::Min
                };
                if args.len() == 1 {
                    Ok(args[0])
                } else {
                    Ok(self.builder.nary(op, args))
                }
            }
            "clip" => {
                let [x, lo, hi] = arity::<3>(&name, args)?;
                let floor = self.builder.nary(NaryOp::Max, vec![x, lo]);
                Ok(self.builder.nary(NaryOp::Min, vec![floor, hi]))
            }
            "AccumBounds" => {
                let [lo, hi] = arity::<2>(&name, args)?;
                Ok(self.builder.bounds(lo, hi))
            }
            _ => Ok(self.builder.opaque(name.clone(), args)),
        }
    }

    fn atom(&mut self, name: String, pos: usize) -> Result<NodeId, ParseError> {
        if let Some(index) = indexed(&name, "x_") {
            return Ok(self.builder.var(index));
        }
        if let Some(index) = indexed(&name, "C_") {
            return Ok(self.builder.param(index));
        }
        let symbol = match name.as_str() {
            "pi" => Symbolic::Pi,
            "oo" => Symbolic::Infinity,
            "zoo" => Symbolic::ComplexInfinity,
            "I" => Symbolic::ImaginaryUnit,
            "nan" | "NaN" => Symbolic::NaN,
            "E" => return Ok(self.builder.constant(std::f64::consts::E)),
            _ => return Err(ParseError::UnknownSymbol { name, pos }),
        };
        Ok(self.builder.symbol(symbol))
    }
}

fn indexed(name: &str, prefix: &str) -> Option<usize> {
    name.strip_prefix(prefix)
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
}

fn arity<const N: usize>(name: &str, args: Vec<NodeId>) -> Result<[NodeId; N], ParseError> {
    let got = args.len();
    args.try_into().map_err(|_| ParseError::Arity {
        name: name.to_string(),
        expected: N,
        got,
    })
}

fn unexpected(lexeme: Lexeme) -> ParseError {
    ParseError::UnexpectedToken {
        text: lexeme.text,
        pos: lexeme.pos,
    }
}
