//! Parser for template statements and expressions.
//!
//! Consumes the token stream produced by [`super::lexer::lex`]; spans are line
//! numbers, so every node records the line it starts on.

use super::lexer::{Span, Token, lex};
use crate::error::{ShapeError, ShapeResult};
use crate::value::{Value, number};
use chumsky::error::SimpleReason;
use chumsky::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    Var(String),
    Field(Box<Expr>, String),
    Call { name: String, args: Vec<Expr> },
    List(Vec<Expr>),
    Hash(Vec<(String, Expr)>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Output { expr: Expr, line: usize },
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
        line: usize,
    },
    Foreach {
        var: String,
        list: Expr,
        body: Vec<Node>,
        line: usize,
    },
    Set { name: String, value: Expr, line: usize },
}

/// A parsed template, ready to evaluate any number of times.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub(crate) nodes: Vec<Node>,
}

/// Parse template source.
pub(crate) fn parse(src: &str) -> ShapeResult<Template> {
    let tokens = lex(src)?;
    let last = tokens.last().map_or(1, |(_, span)| span.start);
    let stream = chumsky::Stream::from_iter(last..last + 1, tokens.into_iter());

    template()
        .parse(stream)
        .map(|nodes| Template { nodes })
        .map_err(|errors| match errors.first() {
            Some(error) => parse_error(error),
            None => ShapeError::render("invalid template"),
        })
}

fn parse_error(error: &Simple<Token>) -> ShapeError {
    let line = error.span().start;
    if let SimpleReason::Custom(msg) = error.reason() {
        return ShapeError::render(format!("line {line}: {msg}"));
    }
    let found = match error.found() {
        Some(tok) => format!("'{tok}'"),
        None => "end of template".to_string(),
    };
    let message = match error.label() {
        Some(label) => format!("unexpected {found} in {label}"),
        None => format!("unexpected {found}"),
    };
    ShapeError::render(format!("line {line}: {message}"))
}

fn ident() -> impl Parser<Token, String, Error = Simple<Token>> + Clone {
    select! { Token::Ident(name) => name }
}

fn binary(lhs: Expr, (op, rhs): (BinOp, Expr)) -> Expr {
    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
}

/// Precedence, loosest first: `||`, `&&`, `!`, one comparison, `~`, `+ -`,
/// `* / %`, unary `-`, `.field`.
fn expr() -> impl Parser<Token, Expr, Error = Simple<Token>> + Clone {
    recursive(|expr| {
        let num = select! { Token::Num(n) => n }.try_map(|n: String, span| {
            n.parse::<f64>()
                .map(|f| Expr::Literal(number(f)))
                .map_err(|e| Simple::custom(span, format!("invalid number '{n}': {e}")))
        });

        let literal = select! {
            Token::Str(s) => Expr::Literal(Value::String(s)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Null => Expr::Literal(Value::Null),
        };

        let items = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing();

        let call_or_var = ident()
            .then(
                items
                    .clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen))
                    .or_not(),
            )
            .map(|(name, args)| match args {
                Some(args) => Expr::Call { name, args },
                None => Expr::Var(name),
            });

        let list = items
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(Expr::List);

        let hash_key = select! { Token::Ident(k) => k, Token::Str(k) => k };
        let hash = hash_key
            .then_ignore(choice((
                just(Token::FatArrow),
                just(Token::Colon),
                just(Token::Assign),
            )))
            .then(expr.clone())
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .map(Expr::Hash);

        let paren = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = choice((num, literal, call_or_var, list, hash, paren)).boxed();

        // `.name` or a list index such as `.1`
        let field = select! { Token::Ident(name) => name, Token::Num(n) => n }.try_map(
            |name: String, span| {
                if name.contains('.') {
                    Err(Simple::custom(span, format!("invalid field '{name}'")))
                } else {
                    Ok(name)
                }
            },
        );
        let postfix = atom
            .then(just(Token::Dot).ignore_then(field).repeated())
            .foldl(|base, name| Expr::Field(Box::new(base), name))
            .boxed();

        let unary = just(Token::Minus)
            .repeated()
            .then(postfix)
            .foldr(|_, e| Expr::Neg(Box::new(e)))
            .boxed();

        let product_op = select! {
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Rem,
        };
        let product = unary
            .clone()
            .then(product_op.then(unary).repeated())
            .foldl(binary)
            .boxed();

        let sum_op = select! { Token::Plus => BinOp::Add, Token::Minus => BinOp::Sub };
        let sum = product
            .clone()
            .then(sum_op.then(product).repeated())
            .foldl(binary)
            .boxed();

        let concat = sum
            .clone()
            .then(just(Token::Tilde).to(BinOp::Concat).then(sum).repeated())
            .foldl(binary)
            .boxed();

        // Comparisons do not chain.
        let cmp_op = select! {
            Token::Eq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
        };
        let comparison = concat
            .clone()
            .then(cmp_op.then(concat).or_not())
            .map(|(lhs, rhs)| match rhs {
                Some(rhs) => binary(lhs, rhs),
                None => lhs,
            })
            .boxed();

        let negation = just(Token::Bang)
            .repeated()
            .then(comparison)
            .foldr(|_, e| Expr::Not(Box::new(e)))
            .boxed();

        let conjunction = negation
            .clone()
            .then(just(Token::AndAnd).ignore_then(negation).repeated())
            .foldl(|lhs, rhs| Expr::And(Box::new(lhs), Box::new(rhs)))
            .boxed();

        conjunction
            .clone()
            .then(just(Token::OrOr).ignore_then(conjunction).repeated())
            .foldl(|lhs, rhs| Expr::Or(Box::new(lhs), Box::new(rhs)))
    })
}

/// Statements until the next `ELSIF`, `ELSE` or `END`.
fn block() -> impl Parser<Token, Vec<Node>, Error = Simple<Token>> + Clone {
    recursive(|block| {
        let expr = expr();

        let text = select! { Token::Text(text) => Node::Text(text) };

        // UNLESS is IF with the condition negated.
        let head = choice((just(Token::If).to(false), just(Token::Unless).to(true)))
            .then(expr.clone())
            .map(|(negate, cond)| {
                if negate {
                    Expr::Not(Box::new(cond))
                } else {
                    cond
                }
            });
        let conditional = head
            .then(block.clone())
            .then(
                just(Token::Elsif)
                    .ignore_then(expr.clone())
                    .then(block.clone())
                    .repeated(),
            )
            .then(just(Token::Else).ignore_then(block.clone()).or_not())
            .then_ignore(just(Token::End))
            .map_with_span(|(((cond, body), elsifs), otherwise), span: Span| {
                let mut branches = vec![(cond, body)];
                branches.extend(elsifs);
                Node::If {
                    branches,
                    otherwise: otherwise.unwrap_or_default(),
                    line: span.start,
                }
            })
            .labelled("IF block");

        let foreach = just(Token::Foreach)
            .ignore_then(ident())
            .then_ignore(just(Token::In))
            .then(expr.clone())
            .then(block)
            .then_ignore(just(Token::End))
            .map_with_span(|((var, list), body), span: Span| Node::Foreach {
                var,
                list,
                body,
                line: span.start,
            })
            .labelled("FOREACH block");

        let set = just(Token::Set)
            .or_not()
            .ignore_then(ident())
            .then_ignore(just(Token::Assign))
            .then(expr.clone())
            .map_with_span(|(name, value), span: Span| Node::Set {
                name,
                value,
                line: span.start,
            });

        let output = expr.map_with_span(|expr, span: Span| Node::Output {
            expr,
            line: span.start,
        });

        choice((text, conditional, foreach, set, output))
            .map(Some)
            .or(just(Token::Semicolon).to(None))
            .repeated()
            .map(|nodes: Vec<Option<Node>>| nodes.into_iter().flatten().collect::<Vec<_>>())
    })
}

fn template() -> impl Parser<Token, Vec<Node>, Error = Simple<Token>> {
    block().then_ignore(end())
}
