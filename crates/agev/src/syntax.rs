//! Parsing of the line-oriented grammar format.
//!
//! One production per line: `A->BC : y[0]=z[2]; x[1]=x[0]`. Symbols are
//! single visible characters; the part after `:` is a `;`-separated system
//! of equations. Equation sides may contain arbitrary text; only attribute
//! references of the form `name[index]` are extracted, where a name starts
//! with a letter or `_`. A blank line ends the grammar.

use crate::grammar::{Grammar, GrammarDef, ProdId};
use anyhow::Context as _;
use std::{fs, path::Path};

pub fn parse(source: &str) -> anyhow::Result<Grammar> {
    let span = tracing::trace_span!("parse");
    let _entered = span.enter();

    Grammar::define(|def| {
        for (lineno, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            parse_line(def, line)
                .with_context(|| format!("line {}: {:?}", lineno + 1, line))?;
        }
        Ok(())
    })
}

pub fn parse_file(path: impl AsRef<Path>) -> anyhow::Result<Grammar> {
    let path = path.as_ref();
    let source = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse(&source)
}

fn parse_line(def: &mut GrammarDef, line: &str) -> anyhow::Result<()> {
    let (head, rules) = match line.split_once(':') {
        Some((head, rules)) => (head, Some(rules)),
        None => (line, None),
    };

    let (lhs, rhs) = head
        .split_once("->")
        .context("missing `->` in production")?;
    let mut lhs_symbols = lhs.chars().filter(|c| !c.is_whitespace());
    let lhs_symbol = lhs_symbols.next().context("missing left-hand symbol")?;
    anyhow::ensure!(
        lhs_symbols.next().is_none(),
        "the left-hand side must be a single symbol",
    );
    let rhs_symbols: Vec<char> = rhs.chars().filter(|c| !c.is_whitespace()).collect();

    let prod = def.production(lhs_symbol, &rhs_symbols)?;
    tracing::trace!("production {} -> {:?}", lhs_symbol, rhs_symbols);

    if let Some(rules) = rules {
        for equation in rules.split(';') {
            let equation = equation.trim();
            if equation.is_empty() {
                continue;
            }
            parse_equation(def, prod, equation)?;
        }
    }
    Ok(())
}

fn parse_equation(def: &mut GrammarDef, prod: ProdId, equation: &str) -> anyhow::Result<()> {
    let (left, right) = equation
        .split_once('=')
        .with_context(|| format!("missing `=` in equation {:?}", equation))?;

    let left_ref = scan_refs(left)
        .into_iter()
        .next()
        .with_context(|| format!("no attribute on the left side of {:?}", equation))?;
    let right_refs = scan_refs(right);
    tracing::trace!("equation {:?} <- {:?}", left_ref, right_refs);

    let right_refs: Vec<(&str, usize)> = right_refs
        .iter()
        .map(|(name, index)| (name.as_str(), *index))
        .collect();
    def.rule(prod, (&left_ref.0, left_ref.1), &right_refs)?;
    Ok(())
}

/// Extract every `name[index]` occurrence; everything else is ignored.
fn scan_refs(s: &str) -> Vec<(String, usize)> {
    let bytes = s.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_alphabetic() || bytes[i] == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if i < bytes.len() && bytes[i] == b'[' {
                let digits = i + 1;
                let mut j = digits;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j > digits && j < bytes.len() && bytes[j] == b']' {
                    if let Ok(index) = s[digits..j].parse() {
                        refs.push((s[start..i].to_owned(), index));
                        i = j + 1;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    refs
}
