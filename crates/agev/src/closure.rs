//! Transitive-closure expansion of the dependence relation.
//!
//! A path that leaves a symbol occurrence and later reaches an attribute
//! back at the same occurrence implies a direct dependency there, and that
//! dependency must hold at every other occurrence of the same nonterminal.
//! This pass materializes all such projections until no production yields a
//! new edge. The one-step case (an edge between two attributes of one
//! occurrence) is itself a valid path, which is what carries intra-occurrence
//! edges over to the other occurrences.

use crate::grammar::{AttrId, Grammar, VarId};
use bit_set::BitSet;

#[tracing::instrument(skip_all)]
pub fn compute(g: &mut Grammar) {
    let mut pass = 0usize;
    loop {
        pass += 1;
        let mut added = 0usize;
        for prod in g.production_ids() {
            let vars = g.production(prod).vars().to_vec();
            for var in vars {
                added += project_variable(g, var);
            }
        }
        tracing::trace!("pass {}: {} new edges", pass, added);
        if added == 0 {
            break;
        }
    }
}

/// Find every first return from an attribute of `var` back to the index of
/// `var` and turn it into a direct, mirrored dependency. Returns the number
/// of edges that did not exist before.
fn project_variable(g: &mut Grammar, var: VarId) -> usize {
    let index = g.var(var).index();
    let symbol = g.var(var).name();
    let starts: Vec<AttrId> = g.var(var).attrs().collect();

    let mut added = 0usize;
    let mut visited = BitSet::with_capacity(g.attr_count());
    for start in starts {
        let mut targets = Vec::new();
        first_returns(g, start, index, true, &mut visited, &mut targets);

        for target in targets {
            added += g.add_dependency(target, start) as usize;

            let start_name = g.attr(start).name().to_owned();
            let target_name = g.attr(target).name().to_owned();
            for occ in g.occurrences_of(symbol).to_vec() {
                let occ_start = g.var(occ).attr(&start_name).unwrap();
                let occ_target = g.var(occ).attr(&target_name).unwrap();
                added += g.add_dependency(occ_target, occ_start) as usize;
            }
        }
    }
    added
}

/// Depth-first search over `used_for`. The start node never terminates the
/// search on itself; any other attribute at the target index is recorded and
/// its branch stopped. Visited flags are restored on unwind so the graph is
/// explored as paths, and they live in a per-traversal bitset so the
/// canonical nodes stay untouched.
fn first_returns(
    g: &Grammar,
    at: AttrId,
    target_index: usize,
    skip_first: bool,
    visited: &mut BitSet,
    out: &mut Vec<AttrId>,
) {
    if g.attr(at).index() == target_index && !skip_first {
        out.push(at);
        return;
    }

    visited.insert(at.into_usize());
    for next in g.attr(at).uses() {
        if !visited.contains(next.into_usize()) {
            first_returns(g, next, target_index, false, visited, out);
        }
    }
    visited.remove(at.into_usize());
}

#[cfg(test)]
mod tests {
    use crate::grammar::{Grammar, GrammarDefError};

    fn define(lines: &[(char, &[char], &[((&str, usize), &[(&str, usize)])])]) -> Grammar {
        Grammar::define(|def| {
            for &(lhs, rhs, rules) in lines {
                let prod = def.production(lhs, rhs)?;
                for &(left, right) in rules {
                    def.rule(prod, left, right)?;
                }
            }
            Ok::<_, GrammarDefError>(())
        })
        .unwrap()
    }

    fn edge(g: &Grammar, occ: crate::grammar::VarId, from: &str, to: &str) -> bool {
        let from = g.var(occ).attr(from).unwrap();
        let to = g.var(occ).attr(to).unwrap();
        g.attr(from).uses().any(|a| a == to)
    }

    #[test]
    fn projects_and_mirrors_a_loop_through_the_right_hand_side() {
        // x of A flows into B and returns into y of A.
        let mut g = define(&[
            ('A', &['B'], &[(("a", 1), &[("x", 0)]), (("y", 0), &[("b", 1)])]),
            ('B', &['c'], &[(("b", 0), &[("a", 0)])]),
        ]);
        g.compute_transitive_closure();

        let a0 = g.occurrences_of('A')[0];
        assert!(edge(&g, a0, "x", "y"), "projection at A missing");
        for &occ in g.occurrences_of('B') {
            assert!(edge(&g, occ, "a", "b"), "intra-occurrence edge not mirrored");
        }
    }

    #[test]
    fn closure_is_a_fixpoint() {
        let mut g = define(&[
            ('A', &['B'], &[(("a", 1), &[("x", 0)]), (("y", 0), &[("b", 1)])]),
            ('B', &['c'], &[(("b", 0), &[("a", 0)])]),
        ]);
        g.compute_transitive_closure();
        let snapshot: Vec<Vec<usize>> = g
            .attrs()
            .map(|(_, a)| a.uses().map(|u| u.into_usize()).collect())
            .collect();
        g.compute_transitive_closure();
        let again: Vec<Vec<usize>> = g
            .attrs()
            .map(|(_, a)| a.uses().map(|u| u.into_usize()).collect())
            .collect();
        assert_eq!(snapshot, again);
    }

    #[test]
    fn cross_index_loops_never_project_onto_the_start() {
        // x[0] needs y[1], y[1] needs x[0]: the search marks its start
        // visited before descending, so the loop yields no self-edge; the
        // cycle is reported when the schedule deadlocks.
        let mut g = define(&[(
            'A',
            &['B'],
            &[(("x", 0), &[("y", 1)]), (("y", 1), &[("x", 0)])],
        )]);
        g.analyze();
        let a0 = g.occurrences_of('A')[0];
        assert!(!edge(&g, a0, "x", "x"));
        let b1 = g.occurrences_of('B')[0];
        assert!(!edge(&g, b1, "y", "y"));
        for (_, prod) in g.productions() {
            assert!(!prod.is_acyclic());
            assert!(prod.order().is_empty());
        }
    }
}
