//! Parser for the gadget description language.
//!
//! A gadget file is line oriented: `#`-directives declare the sharing order,
//! the input/random/output identifiers and the field characteristic, and every
//! other non-empty line is an assignment `dst = expr` where `expr` is a
//! variable, a sum `a + b` (`^` is accepted), a product `a * b` (`&` is
//! accepted) or a negation `~a`. In arithmetic fields terms may carry integer
//! coefficients (`y = 3 a + 5 b`). The right-hand side can be wrapped in
//! `![ ... ]` to mark a glitch boundary, and a trailing `# correction` /
//! `# correction_o` marks correction-block variables.

use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use ironmask_field::{Coeff, PrimeField};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Assign,
    Add,
    Mult,
}

/// An atomic operand: a named wire or a field constant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Atom {
    Var(String),
    Const(Coeff),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub coeff: Coeff,
    pub atom: Atom,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
    pub op: Op,
    pub left: Term,
    pub right: Option<Term>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equation {
    pub dst: String,
    pub expr: Expr,
    /// `![ ... ]`: this wire is a register output, glitches do not propagate
    /// through it.
    pub anti_glitch: bool,
    pub correction: bool,
    pub correction_output: bool,
}

/// The textual description of a gadget, before circuit construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParsedGadget {
    pub shares: usize,
    pub order: Option<usize>,
    pub duplications: usize,
    pub characteristic: u32,
    pub inputs: Vec<String>,
    pub randoms: Vec<String>,
    pub outputs: Vec<String>,
    pub equations: Vec<Equation>,
}

impl ParsedGadget {
    pub fn parse_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open file '{}'", path.display()))?;
        Self::parse_str(&text).with_context(|| format!("while parsing '{}'", path.display()))
    }

    pub fn parse_str(text: &str) -> Result<Self> {
        let mut shares = None;
        let mut order = None;
        let mut duplications = 1usize;
        let mut characteristic = 2u32;
        let mut inputs = Vec::new();
        let mut randoms = Vec::new();
        let mut outputs = Vec::new();
        let mut raw_equations = Vec::new();

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(directive) = trimmed.strip_prefix('#') {
                let directive = directive.trim_start();
                if let Some(rest) = strip_keyword(directive, "ORDER") {
                    order = Some(parse_number(rest, line)? as usize);
                } else if let Some(rest) = strip_keyword(directive, "SHARES") {
                    let n = parse_number(rest, line)? as usize;
                    ensure!(n >= 1, "at least one share is required, line '{line}'");
                    ensure!(n <= 99, "this tool does not support more than 99 shares (> {n})");
                    shares = Some(n);
                } else if let Some(rest) = strip_keyword(directive, "DUPLICATIONS") {
                    duplications = parse_number(rest, line)? as usize;
                } else if let Some(rest) = strip_keyword(directive, "INPUT")
                    .or_else(|| strip_keyword(directive, "IN"))
                {
                    parse_idents(&mut inputs, rest);
                } else if let Some(rest) = strip_keyword(directive, "RANDOMS") {
                    parse_idents(&mut randoms, rest);
                } else if let Some(rest) = strip_keyword(directive, "OUTPUT")
                    .or_else(|| strip_keyword(directive, "OUT"))
                {
                    parse_idents(&mut outputs, rest);
                } else if let Some(rest) = strip_keyword(directive, "CHARACTERISTIC")
                    .or_else(|| strip_keyword(directive, "CAR"))
                {
                    characteristic = parse_number(rest, line)?;
                } else {
                    log::warn!("unrecognized line '{line}', ignoring it");
                }
            } else {
                raw_equations.push(line.to_string());
            }
        }

        let shares = shares.context("missing mandatory #SHARES directive")?;
        ensure!(!inputs.is_empty(), "missing #IN directive");
        ensure!(!outputs.is_empty(), "missing #OUT directive");
        // Validates the characteristic early so that equations can reduce
        // their coefficients.
        let field = PrimeField::new(characteristic)?;

        let mut equations = Vec::with_capacity(raw_equations.len());
        for line in &raw_equations {
            equations.push(parse_equation(line, field)?);
        }

        Ok(Self {
            shares,
            order,
            duplications,
            characteristic,
            inputs,
            randoms,
            outputs,
            equations,
        })
    }

    pub fn field(&self) -> PrimeField {
        PrimeField::new(self.characteristic).expect("characteristic was validated at parse time")
    }
}

/// Case-insensitive keyword match at the start of `s`; returns the remainder.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    if s.len() >= keyword.len() && s[..keyword.len()].eq_ignore_ascii_case(keyword) {
        Some(&s[keyword.len()..])
    } else {
        None
    }
}

fn parse_number(s: &str, line: &str) -> Result<u32> {
    let token = s.trim().split_whitespace().next();
    match token {
        Some(t) => t
            .parse::<u32>()
            .with_context(|| format!("missing or invalid number on line '{line}'")),
        None => bail!("missing number on line '{line}'"),
    }
}

fn parse_idents(dst: &mut Vec<String>, s: &str) {
    dst.extend(s.split_whitespace().map(|t| t.to_string()));
}

fn is_operator(c: char) -> bool {
    matches!(c, '+' | '^' | '*' | '&' | '~')
}

fn parse_equation(line: &str, field: PrimeField) -> Result<Equation> {
    let (code, annotation) = match line.find('#') {
        Some(pos) => (&line[..pos], line[pos + 1..].trim()),
        None => (line, ""),
    };
    let correction_output = annotation.eq_ignore_ascii_case("correction_o");
    let correction = correction_output || annotation.eq_ignore_ascii_case("correction");

    let eq_pos = code
        .find('=')
        .with_context(|| format!("invalid line (missing '='): '{line}'"))?;
    let dst = code[..eq_pos].trim();
    ensure!(!dst.is_empty(), "invalid line (empty destination): '{line}'");
    let mut rhs = code[eq_pos + 1..].trim();

    let mut anti_glitch = false;
    if let Some(stripped) = rhs.strip_prefix("![") {
        let close = stripped.rfind(']').with_context(|| {
            format!(
                "invalid line: '![' without matching ']' \
                 (the closing ']' must be the last non-space character): '{line}'"
            )
        })?;
        ensure!(
            stripped[close + 1..].trim().is_empty(),
            "invalid line: content after the closing ']': '{line}'"
        );
        anti_glitch = true;
        rhs = stripped[..close].trim();
    }

    let expr = parse_expr(rhs, line, field)?;
    Ok(Equation {
        dst: dst.to_string(),
        expr,
        anti_glitch,
        correction,
        correction_output,
    })
}

fn parse_expr(rhs: &str, line: &str, field: PrimeField) -> Result<Expr> {
    let mut rest = rhs.trim_start();

    // `~a` is sugar for `a + 1`.
    if let Some(stripped) = rest.strip_prefix('~') {
        let (term, tail) = parse_term(stripped.trim_start(), line, field)?;
        ensure!(
            tail.trim().is_empty(),
            "operator expected after negation in line '{line}'"
        );
        return Ok(Expr {
            op: Op::Add,
            left: term,
            right: Some(Term {
                coeff: 1,
                atom: Atom::Const(field.canonicalize(1)),
            }),
        });
    }

    let (left, tail) = parse_term(rest, line, field)?;
    rest = tail.trim_start();

    if rest.is_empty() {
        return Ok(Expr {
            op: Op::Assign,
            left,
            right: None,
        });
    }

    let op_char = rest.chars().next().unwrap();
    let op = match op_char {
        '+' | '^' => Op::Add,
        '*' | '&' => Op::Mult,
        other => bail!("error in line '{line}': operator expected, got '{other}'"),
    };
    rest = rest[op_char.len_utf8()..].trim_start();

    let (right, tail) = parse_term(rest, line, field)?;
    ensure!(
        tail.trim().is_empty(),
        "error in line '{line}': trailing garbage after second operand"
    );
    Ok(Expr {
        op,
        left,
        right: Some(right),
    })
}

/// Parses `[coefficient] atom`, returning the term and the unparsed tail.
fn parse_term<'a>(s: &'a str, line: &str, field: PrimeField) -> Result<(Term, &'a str)> {
    let s = s.trim_start();
    ensure!(!s.is_empty(), "error in line '{line}': operand expected");

    let digits_len = s.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits_len > 0 {
        let number: i64 = s[..digits_len]
            .parse()
            .with_context(|| format!("number too large in line '{line}'"))?;
        let after = &s[digits_len..];
        let after_trimmed = after.trim_start();
        let next_is_ident = after_trimmed
            .chars()
            .next()
            .map_or(false, |c| !is_operator(c) && !c.is_ascii_digit());
        if next_is_ident {
            // A coefficient followed by a variable.
            let (name, tail) = take_ident(after_trimmed);
            ensure!(!name.is_empty(), "error in line '{line}': variable expected");
            return Ok((
                Term {
                    coeff: field.canonicalize(number),
                    atom: Atom::Var(name.to_string()),
                },
                tail,
            ));
        }
        // A bare constant.
        return Ok((
            Term {
                coeff: 1,
                atom: Atom::Const(field.canonicalize(number)),
            },
            after,
        ));
    }

    let (name, tail) = take_ident(s);
    ensure!(!name.is_empty(), "error in line '{line}': operand expected");
    Ok((
        Term {
            coeff: 1,
            atom: Atom::Var(name.to_string()),
        },
        tail,
    ))
}

fn take_ident(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| c.is_whitespace() || is_operator(c))
        .unwrap_or(s.len());
    (&s[..end], &s[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_refresh_gadget() {
        let src = "\
#SHARES 2
#IN a
#RANDOMS r0
#OUT d
d0 = a0 + r0
d1 = a1 ^ r0
";
        let g = ParsedGadget::parse_str(src).unwrap();
        assert_eq!(g.shares, 2);
        assert_eq!(g.inputs, vec!["a"]);
        assert_eq!(g.randoms, vec!["r0"]);
        assert_eq!(g.outputs, vec!["d"]);
        assert_eq!(g.characteristic, 2);
        assert_eq!(g.equations.len(), 2);
        let eq = &g.equations[0];
        assert_eq!(eq.dst, "d0");
        assert_eq!(eq.expr.op, Op::Add);
        assert_eq!(eq.expr.left.atom, Atom::Var("a0".into()));
        assert_eq!(eq.expr.right.as_ref().unwrap().atom, Atom::Var("r0".into()));
    }

    #[test]
    fn test_parse_mult_and_not() {
        let src = "\
#SHARES 2
#IN a b
#RANDOMS r0
#OUT c
t = a0 & b0
u = ~t
c0 = u + r0
c1 = a1 * b1
";
        let g = ParsedGadget::parse_str(src).unwrap();
        assert_eq!(g.equations[0].expr.op, Op::Mult);
        let not_eq = &g.equations[1];
        assert_eq!(not_eq.expr.op, Op::Add);
        assert_eq!(not_eq.expr.left.atom, Atom::Var("t".into()));
        assert_eq!(not_eq.expr.right.as_ref().unwrap().atom, Atom::Const(1));
    }

    #[test]
    fn test_parse_arith_coefficients() {
        let src = "\
#SHARES 2
#CHARACTERISTIC 7
#IN a
#RANDOMS r0
#OUT d
d0 = 3 a0 + 12 r0
d1 = a1
";
        let g = ParsedGadget::parse_str(src).unwrap();
        assert_eq!(g.characteristic, 7);
        let eq = &g.equations[0];
        assert_eq!(eq.expr.left.coeff, 3);
        // 12 mod 7
        assert_eq!(eq.expr.right.as_ref().unwrap().coeff, 5);
    }

    #[test]
    fn test_parse_anti_glitch_and_correction() {
        let src = "\
#SHARES 2
#IN a
#RANDOMS r0
#OUT d
t0 = ![ a0 + r0 ]
d0 = t0 # correction_o
d1 = a1 # correction
";
        let g = ParsedGadget::parse_str(src).unwrap();
        assert!(g.equations[0].anti_glitch);
        assert!(g.equations[1].correction_output);
        assert!(g.equations[1].correction);
        assert!(g.equations[2].correction);
        assert!(!g.equations[2].correction_output);
    }

    #[test]
    fn test_parse_errors() {
        // Missing #SHARES.
        assert!(ParsedGadget::parse_str("#IN a\n#OUT d\nd0 = a0\n").is_err());
        // Unterminated anti-glitch bracket.
        let src = "#SHARES 1\n#IN a\n#OUT d\nd0 = ![ a0\n";
        assert!(ParsedGadget::parse_str(src).is_err());
        // Bad operator.
        let src = "#SHARES 1\n#IN a\n#OUT d\nd0 = a0 % a0\n";
        assert!(ParsedGadget::parse_str(src).is_err());
        // Non-prime characteristic.
        let src = "#SHARES 1\n#CHARACTERISTIC 6\n#IN a\n#OUT d\nd0 = a0\n";
        assert!(ParsedGadget::parse_str(src).is_err());
        // Too many shares.
        let src = "#SHARES 100\n#IN a\n#OUT d\nd0 = a0\n";
        assert!(ParsedGadget::parse_str(src).is_err());
    }

    #[test]
    fn test_directive_case_insensitive() {
        let src = "#shares 2\n#in a\n#randoms r\n#out d\nd0 = a0 + r\nd1 = a1 + r\n";
        let g = ParsedGadget::parse_str(src).unwrap();
        assert_eq!(g.shares, 2);
        assert_eq!(g.randoms, vec!["r"]);
    }
}
