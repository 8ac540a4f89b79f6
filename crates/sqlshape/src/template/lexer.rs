//! Template lexer.
//!
//! Splits source into literal text and `[% ... %]` tags, tokenizes tag bodies and
//! applies `[%-` / `-%]` whitespace chomping. Each tag boundary becomes a
//! [`Token::Semicolon`], so statements end either at `;` or at the end of a tag.

use crate::error::{ShapeError, ShapeResult};
use chumsky::prelude::*;
use std::fmt;
use std::ops::Range;

/// Spans handed to the parser are line numbers (`line..line + 1`).
pub(crate) type Span = Range<usize>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum Token {
    // Keywords
    If,
    Elsif,
    Else,
    End,
    Unless,
    Foreach,
    In,
    Set,
    True,
    False,
    Null,

    Ident(String),
    Str(String),
    Num(String),
    /// Literal text between tags.
    Text(String),

    // Punctuation
    LParen,    // (
    RParen,    // )
    LBracket,  // [
    RBracket,  // ]
    LBrace,    // {
    RBrace,    // }
    Comma,     // ,
    Dot,       // .
    Semicolon, // ; or end of tag
    Colon,     // :
    Assign,    // =
    FatArrow,  // =>
    Eq,        // ==
    Ne,        // !=
    Lt,        // <
    Le,        // <=
    Gt,        // >
    Ge,        // >=
    AndAnd,    // && and
    OrOr,      // || or
    Bang,      // ! not
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %
    Tilde,     // ~
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::If => write!(f, "IF"),
            Token::Elsif => write!(f, "ELSIF"),
            Token::Else => write!(f, "ELSE"),
            Token::End => write!(f, "END"),
            Token::Unless => write!(f, "UNLESS"),
            Token::Foreach => write!(f, "FOREACH"),
            Token::In => write!(f, "IN"),
            Token::Set => write!(f, "SET"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),
            Token::Ident(s) | Token::Num(s) => write!(f, "{s}"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Text(_) => write!(f, "text"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Semicolon => write!(f, "end of statement"),
            Token::Colon => write!(f, ":"),
            Token::Assign => write!(f, "="),
            Token::FatArrow => write!(f, "=>"),
            Token::Eq => write!(f, "=="),
            Token::Ne => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Bang => write!(f, "!"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Tilde => write!(f, "~"),
        }
    }
}

/// Raw lexer output before chomping.
#[derive(Debug)]
enum Piece {
    Text {
        text: String,
        start: usize,
    },
    Tag {
        chomp_left: bool,
        tokens: Vec<(Token, Range<usize>)>,
        chomp_right: bool,
        start: usize,
    },
}

/// `%]`, or `-%]` which also chomps the following whitespace.
fn tag_close() -> impl Parser<char, bool, Error = Simple<char>> + Clone {
    just("-%]").to(true).or(just("%]").to(false))
}

fn token() -> impl Parser<char, Token, Error = Simple<char>> + Clone {
    let keyword_or_ident = text::ident().map(|s: String| match s.as_str() {
        "IF" => Token::If,
        "ELSIF" => Token::Elsif,
        "ELSE" => Token::Else,
        "END" => Token::End,
        "UNLESS" => Token::Unless,
        "FOREACH" => Token::Foreach,
        "IN" | "in" => Token::In,
        "SET" => Token::Set,
        "and" | "AND" => Token::AndAnd,
        "or" | "OR" => Token::OrOr,
        "not" | "NOT" => Token::Bang,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => Token::Ident(s),
    });

    let number = text::digits(10)
        .then(just('.').ignore_then(text::digits(10)).or_not())
        .map(|(int, frac): (String, Option<String>)| match frac {
            Some(frac) => Token::Num(format!("{int}.{frac}")),
            None => Token::Num(int),
        });

    // Double-quoted strings understand `\n` and `\t`; any other escaped character is
    // taken literally.
    let single = just('\\')
        .ignore_then(any())
        .or(none_of("'\\"))
        .repeated()
        .collect::<String>()
        .delimited_by(just('\''), just('\''));
    let double = just('\\')
        .ignore_then(any().map(|c| match c {
            'n' => '\n',
            't' => '\t',
            other => other,
        }))
        .or(none_of("\"\\"))
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"'));
    let string = single.or(double).map(Token::Str);

    let operator = choice((
        just("==").to(Token::Eq),
        just("=>").to(Token::FatArrow),
        just("!=").to(Token::Ne),
        just("<=").to(Token::Le),
        just(">=").to(Token::Ge),
        just("&&").to(Token::AndAnd),
        just("||").to(Token::OrOr),
        just('=').to(Token::Assign),
        just('!').to(Token::Bang),
        just('<').to(Token::Lt),
        just('>').to(Token::Gt),
        just('+').to(Token::Plus),
        just('-').to(Token::Minus),
        just('*').to(Token::Star),
        just('/').to(Token::Slash),
        just('%').to(Token::Percent),
        just('~').to(Token::Tilde),
    ));

    let punctuation = choice((
        just('(').to(Token::LParen),
        just(')').to(Token::RParen),
        just('[').to(Token::LBracket),
        just(']').to(Token::RBracket),
        just('{').to(Token::LBrace),
        just('}').to(Token::RBrace),
        just(',').to(Token::Comma),
        just('.').to(Token::Dot),
        just(';').to(Token::Semicolon),
        just(':').to(Token::Colon),
    ));

    choice((keyword_or_ident, number, string, operator, punctuation))
}

fn pieces() -> impl Parser<char, Vec<Piece>, Error = Simple<char>> {
    let text = just("[%")
        .not()
        .repeated()
        .at_least(1)
        .collect::<String>()
        .map_with_span(|text, span: Range<usize>| Piece::Text {
            text,
            start: span.start,
        });

    // A token may not start where the tag closes, so `-%]` is never read as `-`.
    let tokens = tag_close()
        .not()
        .rewind()
        .ignore_then(token().map_with_span(|tok, span| (tok, span)))
        .padded()
        .repeated();

    let comment = text::whitespace()
        .ignore_then(just('#'))
        .ignore_then(take_until(tag_close()))
        .map(|(_, chomp_right)| (Vec::new(), chomp_right));
    let body = tokens.then(text::whitespace().ignore_then(tag_close()));

    let tag = just("[%")
        .ignore_then(just('-').or_not().map(|c| c.is_some()))
        .then(comment.or(body))
        .map_with_span(|(chomp_left, (tokens, chomp_right)), span: Range<usize>| Piece::Tag {
            chomp_left,
            tokens,
            chomp_right,
            start: span.start,
        });

    tag.or(text).repeated().then_ignore(end())
}

/// Char offsets of line breaks, for turning spans into line numbers.
struct LineIndex(Vec<usize>);

impl LineIndex {
    fn new(src: &str) -> Self {
        Self(
            src.chars()
                .enumerate()
                .filter(|(_, c)| *c == '\n')
                .map(|(i, _)| i)
                .collect(),
        )
    }

    fn line(&self, offset: usize) -> usize {
        self.0.partition_point(|&nl| nl < offset) + 1
    }

    fn span(&self, offset: usize) -> Span {
        let line = self.line(offset);
        line..line + 1
    }
}

/// Remove trailing horizontal whitespace and at most one newline.
fn chomp_back(text: &mut String) {
    let trimmed = text.trim_end_matches([' ', '\t']).len();
    text.truncate(trimmed);
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
}

/// Skip leading horizontal whitespace and at most one newline.
fn chomp_front(text: &str) -> &str {
    let text = text.trim_start_matches([' ', '\t']);
    text.strip_prefix("\r\n")
        .or_else(|| text.strip_prefix('\n'))
        .unwrap_or(text)
}

fn lex_error(lines: &LineIndex, error: &Simple<char>) -> ShapeError {
    let line = lines.line(error.span().start);
    let message = match error.found() {
        Some(c) => format!("unexpected character '{c}'"),
        None => "unterminated tag or string literal".to_string(),
    };
    ShapeError::render(format!("line {line}: {message}"))
}

/// Tokenize template source into a stream of text and tag tokens with line spans.
pub(crate) fn lex(src: &str) -> ShapeResult<Vec<(Token, Span)>> {
    let lines = LineIndex::new(src);
    let pieces = pieces().parse(src).map_err(|errors| match errors.first() {
        Some(error) => lex_error(&lines, error),
        None => ShapeError::render("invalid template"),
    })?;

    let mut out: Vec<(Token, Span)> = Vec::new();
    let mut chomp_next = false;

    for piece in pieces {
        match piece {
            Piece::Text { text, start } => {
                let text = if chomp_next {
                    chomp_front(&text).to_string()
                } else {
                    text
                };
                chomp_next = false;
                if !text.is_empty() {
                    out.push((Token::Text(text), lines.span(start)));
                }
            }
            Piece::Tag {
                chomp_left,
                tokens,
                chomp_right,
                start,
            } => {
                if chomp_left {
                    if let Some((Token::Text(prev), _)) = out.last_mut() {
                        chomp_back(prev);
                        if prev.is_empty() {
                            out.pop();
                        }
                    }
                }
                out.extend(tokens.into_iter().map(|(tok, span)| (tok, lines.span(span.start))));
                out.push((Token::Semicolon, lines.span(start)));
                chomp_next = chomp_right;
            }
        }
    }

    Ok(out)
}
