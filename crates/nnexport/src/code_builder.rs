//! Text accumulator and formatting helpers for generated Python
//!
//! [`CodeBuilder`] owns the output buffer and the configured line ending and
//! indentation. The free functions render fragments (calls, lists, literals)
//! and never touch a buffer.

use std::ops::{Deref, DerefMut};

use ruff_python_ast::{self as ast, Expr, UnaryOp};
use ruff_python_parser::parse_expression;

use crate::format::FormatOptions;

/// Append-only buffer of generated code
#[derive(Debug, Clone)]
pub struct CodeBuilder {
    indent: &'static str,
    line_break: &'static str,
    depth: usize,
    code: String,
}

impl CodeBuilder {
    pub fn new(format: FormatOptions) -> Self {
        Self {
            indent: format.indent.as_str(),
            line_break: format.line_break.as_str(),
            depth: 0,
            code: String::new(),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn line_break(&self) -> &str {
        self.line_break
    }

    pub fn indent(&self) -> &str {
        self.indent
    }

    /// Append raw text
    pub fn add(&mut self, code: &str) {
        self.code.push_str(code);
    }

    /// Append one line at the current indentation depth
    pub fn add_line(&mut self, code: &str) {
        if !code.is_empty() {
            for _ in 0..self.depth {
                self.code.push_str(self.indent);
            }
            self.code.push_str(code);
        }
        self.code.push_str(self.line_break);
    }

    pub fn blank_line(&mut self) {
        self.add_line("");
    }

    /// Indent subsequent lines one level deeper
    pub fn indent_in(&mut self) {
        self.depth += 1;
    }

    pub fn indent_out(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn clear(&mut self) {
        self.code.clear();
        self.depth = 0;
    }

    /// Start a generation scope on an empty buffer
    ///
    /// The buffer is cleared again when the scope is dropped, whether the
    /// generation finished or bailed out with an error.
    pub fn scope(&mut self) -> CodeScope<'_> {
        self.clear();
        CodeScope { builder: self }
    }
}

/// Exclusive access to a [`CodeBuilder`] for one generation
#[derive(Debug)]
pub struct CodeScope<'a> {
    builder: &'a mut CodeBuilder,
}

impl CodeScope<'_> {
    /// Take the generated code out of the buffer
    pub fn finish(mut self) -> String {
        std::mem::take(&mut self.builder.code)
    }
}

impl Deref for CodeScope<'_> {
    type Target = CodeBuilder;

    fn deref(&self) -> &Self::Target {
        self.builder
    }
}

impl DerefMut for CodeScope<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.builder
    }
}

impl Drop for CodeScope<'_> {
    fn drop(&mut self) {
        self.builder.clear();
    }
}

/// Pass `value` through if it already reads as a Python literal, else quote it
///
/// `5`, `[1, 2, 3]`, `True` and `'x'` are kept as written; `relu` becomes
/// `"relu"`. This is a heuristic: a string that happens to look like a number
/// stays a number.
pub fn wrap_literal(value: &str) -> String {
    if is_literal(value) {
        value.to_owned()
    } else {
        quote(value)
    }
}

/// Whether `text` parses as an expression built only from literals
///
/// The text must also stay a single argument once placed inside a call, so
/// a trailing comment or a bare tuple like `5,` does not count.
pub fn is_literal(text: &str) -> bool {
    let Ok(parsed) = parse_expression(text) else {
        return false;
    };
    if matches!(
        parsed.expr(),
        Expr::Tuple(ast::ExprTuple {
            parenthesized: false,
            ..
        })
    ) || !is_literal_expr(parsed.expr())
    {
        return false;
    }
    parse_expression(&par(text)).is_ok()
}

fn is_literal_expr(expr: &Expr) -> bool {
    match expr {
        Expr::NumberLiteral(_)
        | Expr::StringLiteral(_)
        | Expr::BytesLiteral(_)
        | Expr::BooleanLiteral(_)
        | Expr::NoneLiteral(_)
        | Expr::EllipsisLiteral(_) => true,
        Expr::UnaryOp(ast::ExprUnaryOp {
            op: UnaryOp::USub | UnaryOp::UAdd,
            operand,
            ..
        }) => matches!(operand.as_ref(), Expr::NumberLiteral(_)),
        Expr::List(ast::ExprList { elts, .. })
        | Expr::Tuple(ast::ExprTuple { elts, .. })
        | Expr::Set(ast::ExprSet { elts, .. }) => elts.iter().all(is_literal_expr),
        Expr::Dict(ast::ExprDict { items, .. }) => items.iter().all(|item| {
            item.key.as_ref().is_some_and(is_literal_expr) && is_literal_expr(&item.value)
        }),
        _ => false,
    }
}

/// Render `value` as a double-quoted string literal
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

pub fn surrounded(code: &str, left: &str, right: &str) -> String {
    format!("{left}{code}{right}")
}

/// Wrap in parentheses
pub fn par(code: &str) -> String {
    surrounded(code, "(", ")")
}

/// Wrap in square brackets
pub fn list(code: &str) -> String {
    surrounded(code, "[", "]")
}

/// What [`sequence_with`] appends after a non-empty sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trailing {
    #[default]
    Nothing,
    /// `a, b,`
    Comma,
    /// `a, b, `, ready for more arguments to follow
    CommaSpace,
}

/// Join pre-rendered items with `", "`
pub fn sequence<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    sequence_with(items, Trailing::Nothing)
}

/// Join pre-rendered items with `", "`, then append `trailing` unless empty
pub fn sequence_with<I, S>(items: I, trailing: Trailing) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for (index, item) in items.into_iter().enumerate() {
        if index > 0 {
            joined.push_str(", ");
        }
        joined.push_str(item.as_ref());
    }
    if !joined.is_empty() {
        match trailing {
            Trailing::Nothing => {}
            Trailing::Comma => joined.push(','),
            Trailing::CommaSpace => joined.push_str(", "),
        }
    }
    joined
}

/// Render `name(pos1, pos2, kw1=val1, kw2=val2)`
///
/// Positional arguments come first, keywords follow in the given order. The
/// positional part carries a trailing `", "` only when keywords follow, so
/// an empty argument list renders as `name()`.
pub fn call(name: &str, positional: &[&str], keywords: &[(&str, &str)]) -> String {
    let trailing = if keywords.is_empty() {
        Trailing::Nothing
    } else {
        Trailing::CommaSpace
    };
    let mut arguments = sequence_with(positional, trailing);
    arguments.push_str(&sequence(
        keywords.iter().map(|(key, value)| format!("{key}={value}")),
    ));
    format!("{name}{}", par(&arguments))
}
