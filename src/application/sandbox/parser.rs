//! Expression parser
//!
//! Classic precedence-climbing grammar built from nom combinators:
//!
//! ```text
//! expr     := or ("?" expr ":" expr)?
//! or       := and ("||" and)*
//! and      := eq ("&&" eq)*
//! eq       := cmp (("==" | "!=") cmp)*
//! cmp      := add (("<=" | ">=" | "<" | ">") add)*
//! add      := mul (("+" | "-") mul)*
//! mul      := unary (("*" | "/" | "%") unary)*
//! unary    := ("-" | "!") unary | postfix
//! postfix  := primary ("[" expr "]")*
//! primary  := literal | path ("(" args ")")? | "(" expr ")"
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, none_of},
    combinator::{all_consuming, map, opt, recognize, value},
    error::VerboseError,
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::domain::error::SandboxError;

use super::ast::{BinaryOp, Expr, UnaryOp};

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Parses a complete expression
pub fn parse_expression(input: &str) -> Result<Expr, SandboxError> {
    match all_consuming(delimited(multispace0, expr, multispace0))(input) {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(SandboxError::Syntax(nom::error::convert_error(input, e)))
        }
        Err(nom::Err::Incomplete(_)) => Err(SandboxError::Syntax("incomplete input".to_string())),
    }
}

fn sym<'a>(t: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    delimited(multispace0, tag(t), multispace0)
}

fn expr(input: &str) -> PResult<'_, Expr> {
    let (input, cond) = or_expr(input)?;
    let (input, branches) = opt(tuple((
        preceded(sym("?"), expr),
        preceded(sym(":"), expr),
    )))(input)?;
    Ok((
        input,
        match branches {
            Some((then, otherwise)) => Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
            None => cond,
        },
    ))
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |left, (op, right)| Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn or_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(pair(
        value(BinaryOp::Or, sym("||")),
        and_expr,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = eq_expr(input)?;
    let (input, rest) = many0(pair(
        value(BinaryOp::And, sym("&&")),
        eq_expr,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn eq_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = cmp_expr(input)?;
    let (input, rest) = many0(pair(
        alt((
            value(BinaryOp::Eq, sym("==")),
            value(BinaryOp::Ne, sym("!=")),
        )),
        cmp_expr,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn cmp_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = add_expr(input)?;
    let (input, rest) = many0(pair(
        alt((
            value(BinaryOp::Le, sym("<=")),
            value(BinaryOp::Ge, sym(">=")),
            value(BinaryOp::Lt, sym("<")),
            value(BinaryOp::Gt, sym(">")),
        )),
        add_expr,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn add_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = mul_expr(input)?;
    let (input, rest) = many0(pair(
        alt((
            value(BinaryOp::Add, sym("+")),
            value(BinaryOp::Sub, sym("-")),
        )),
        mul_expr,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn mul_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = unary_expr(input)?;
    let (input, rest) = many0(pair(
        alt((
            value(BinaryOp::Mul, sym("*")),
            value(BinaryOp::Div, sym("/")),
            value(BinaryOp::Rem, sym("%")),
        )),
        unary_expr,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn unary_expr(input: &str) -> PResult<'_, Expr> {
    let (input, _) = multispace0(input)?;
    let (input, op) = opt(alt((
        value(UnaryOp::Neg, char('-')),
        value(UnaryOp::Not, char('!')),
    )))(input)?;
    match op {
        Some(op) => {
            let (input, inner) = unary_expr(input)?;
            Ok((
                input,
                Expr::Unary {
                    op,
                    expr: Box::new(inner),
                },
            ))
        }
        None => postfix_expr(input),
    }
}

fn postfix_expr(input: &str) -> PResult<'_, Expr> {
    let (input, base) = primary(input)?;
    let (input, indexes) = many0(delimited(sym("["), expr, sym("]")))(input)?;
    Ok((
        input,
        indexes.into_iter().fold(base, |base, index| Expr::Index {
            base: Box::new(base),
            index: Box::new(index),
        }),
    ))
}

fn identifier(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn dotted_path(input: &str) -> PResult<'_, &str> {
    recognize(separated_list1(char('.'), identifier))(input)
}

fn number(input: &str) -> PResult<'_, Expr> {
    let (rest, text) = recognize(tuple((digit1, opt(pair(char('.'), digit1)))))(input)?;
    let parsed: Result<Expr, ()> = if text.contains('.') {
        text.parse().map(Expr::Float).map_err(|_| ())
    } else {
        text.parse().map(Expr::Int).map_err(|_| ())
    };
    match parsed {
        Ok(expr) => Ok((rest, expr)),
        Err(_) => Err(nom::Err::Error(nom::error::VerboseError {
            errors: vec![(input, nom::error::VerboseErrorKind::Context("number"))],
        })),
    }
}

fn string_literal(input: &str) -> PResult<'_, Expr> {
    let double = delimited(
        char('"'),
        opt(escaped_transform(
            none_of("\\\""),
            '\\',
            alt((
                value('\\', char('\\')),
                value('"', char('"')),
                value('\n', char('n')),
                value('\t', char('t')),
            )),
        )),
        char('"'),
    );
    let single = delimited(
        char('\''),
        opt(escaped_transform(
            none_of("\\'"),
            '\\',
            alt((
                value('\\', char('\\')),
                value('\'', char('\'')),
                value('\n', char('n')),
                value('\t', char('t')),
            )),
        )),
        char('\''),
    );
    map(alt((double, single)), |s| Expr::Str(s.unwrap_or_default()))(input)
}

fn call_args(input: &str) -> PResult<'_, Vec<Expr>> {
    delimited(sym("("), separated_list0(sym(","), expr), sym(")"))(input)
}

fn path_or_call(input: &str) -> PResult<'_, Expr> {
    let (input, path) = dotted_path(input)?;
    let (input, args) = opt(call_args)(input)?;
    let expr = match (path, args) {
        ("true", None) => Expr::Bool(true),
        ("false", None) => Expr::Bool(false),
        ("null", None) => Expr::Null,
        (path, Some(args)) => Expr::Call {
            function: path.to_string(),
            args,
        },
        (path, None) => Expr::Path(path.to_string()),
    };
    Ok((input, expr))
}

fn primary(input: &str) -> PResult<'_, Expr> {
    preceded(
        multispace0,
        alt((
            number,
            string_literal,
            path_or_call,
            delimited(sym("("), expr, sym(")")),
        )),
    )(input)
}
