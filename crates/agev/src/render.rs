//! Textual reports over an analyzed grammar.
//!
//! The exact layout of these dumps is a stable contract; tests compare
//! against it verbatim.

use crate::grammar::{Grammar, Group};
use std::fmt;

pub(crate) fn display_fn<F>(f: F) -> impl fmt::Display
where
    F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result,
{
    struct DisplayFn<F> {
        f: F,
    }
    impl<F> fmt::Display for DisplayFn<F>
    where
        F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result,
    {
        fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            (self.f)(formatter)
        }
    }
    DisplayFn { f }
}

/// The dependence relation, one block per production, one line per symbol
/// occurrence, edges over `used_for` separated by tabs.
pub fn dependencies(g: &Grammar) -> impl fmt::Display + '_ {
    display_fn(move |f| {
        for (i, (_, prod)) in g.productions().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            for &var in prod.vars() {
                write!(f, "{}: ", g.var(var).name())?;
                let mut first = true;
                for a in g.var(var).attrs() {
                    for b in g.attr(a).uses() {
                        if !first {
                            f.write_str("\t")?;
                        }
                        write!(f, "{} -> {}", g.attr(a), g.attr(b))?;
                        first = false;
                    }
                }
                writeln!(f)?;
            }
        }
        Ok(())
    })
}

/// The local execution orders, one line per production.
pub fn execution_orders(g: &Grammar) -> impl fmt::Display + '_ {
    display_fn(move |f| {
        for (_, prod) in g.productions() {
            write!(f, "Production {}{}: {} ->", prod.lhs(), prod.index(), prod.lhs())?;
            for &var in &prod.vars()[1..] {
                write!(f, " {}", g.var(var).name())?;
            }
            write!(f, "\t\t[")?;
            for (i, group) in prod.order().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", group_display(g, group))?;
            }
            writeln!(f, "] cycle-free: {}", prod.is_acyclic())?;
        }
        Ok(())
    })
}

/// The group partition of every symbol, read off its representative
/// occurrence.
pub fn groups(g: &Grammar) -> impl fmt::Display + '_ {
    display_fn(move |f| {
        for (name, occs) in g.occurrences() {
            write!(f, "{}: [", name)?;
            for (i, group) in g.var(occs[0]).groups().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", group_display(g, group))?;
            }
            writeln!(f, "]")?;
        }
        Ok(())
    })
}

fn group_display<'g>(g: &'g Grammar, group: &'g Group) -> impl fmt::Display + 'g {
    display_fn(move |f| {
        let owner = g.var(group.owner);
        f.write_str("{")?;
        for (i, &a) in group.members.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}{}.{}", owner.name(), owner.index(), g.attr(a).name())?;
        }
        f.write_str("}")
    })
}

/// A TikZ picture of the dependence graphs, one row of symbol nodes per
/// production with the attribute nodes beneath their occurrence.
pub fn tikz(g: &Grammar) -> impl fmt::Display + '_ {
    display_fn(move |f| {
        writeln!(f, "\\begin{{tikzpicture}}[")?;
        writeln!(
            f,
            "symbol/.style={{rectangle, draw=black!100, fill=blue!30, thick, minimum size=5mm}},"
        )?;
        writeln!(
            f,
            "attribute/.style={{rectangle, draw=black!100, fill=lime!60, thick, rounded corners=2mm, minimum size=5mm}}\n]"
        )?;
        for (row, (_, prod)) in g.productions().enumerate() {
            let base_y = -(4 * row as i64);
            for (pos, &var) in prod.vars().iter().enumerate() {
                writeln!(
                    f,
                    "\\node[symbol] (p{}s{}) at ({}, {}) {{{}}};",
                    row,
                    pos,
                    4 * pos,
                    base_y,
                    g.var(var).name(),
                )?;
                for (slot, a) in g.var(var).attrs().enumerate() {
                    writeln!(
                        f,
                        "\\node[attribute] (a{}) at ({}.{}, {}) {{{}}};",
                        a,
                        4 * pos + slot,
                        5,
                        base_y - 1,
                        g.attr(a).name(),
                    )?;
                }
            }
            for &var in prod.vars() {
                for a in g.var(var).attrs() {
                    for b in g.attr(a).uses() {
                        writeln!(f, "\\draw[->] (a{}) -- (a{});", a, b)?;
                    }
                }
            }
        }
        writeln!(f, "\\end{{tikzpicture}}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_dump_layout() {
        let mut g = crate::syntax::parse(
            "B->C : x[0]=x[1]; y[0]=y[1]\n\
             A->B\n\
             B->D : x[0]=y[1]; y[0]=x[1]\n",
        )
        .unwrap();
        g.compute_transitive_closure();
        assert_eq!(
            dependencies(&g).to_string(),
            "B: \n\
             C: x1 syn -> x0 syn\ty1 syn -> y0 syn\n\
             \n\
             B: \n\
             D: y1 syn -> x0 syn\tx1 syn -> y0 syn\n\
             \n\
             A: \n\
             B: \n",
        );
    }

    #[test]
    fn groups_dump_lists_representative_occurrences() {
        let mut g = crate::syntax::parse("B->C : x[0]=x[1]; y[0]=y[1]\nA->B\n").unwrap();
        g.compute_transitive_closure();
        g.compute_attribute_groups();
        assert_eq!(
            groups(&g).to_string(),
            "B: [{B0.x, B0.y}]\nC: [{C1.x, C1.y}]\nA: []\n",
        );
    }

    #[test]
    fn tikz_smoke() {
        let mut g = crate::syntax::parse("A->b : x[0]=0; y[0]=x[0]\n").unwrap();
        g.analyze();
        let out = tikz(&g).to_string();
        assert!(out.starts_with("\\begin{tikzpicture}"));
        assert!(out.contains("\\draw[->]"));
        assert!(out.trim_end().ends_with("\\end{tikzpicture}"));
    }
}
