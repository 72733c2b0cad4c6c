//! Attribute grouping.
//!
//! Partitions the attributes of each nonterminal into an ordered sequence of
//! groups, alternating between inherited and synthesized attributes, by
//! peeling attributes whose same-occurrence predecessors have all been
//! consumed. The sequence is computed once at the representative (first)
//! occurrence and cloned to every other occurrence, so the group order at
//! one occurrence is respected at all of them. The synchronized merge
//! relies on that.

use crate::grammar::{AttrId, EffectiveKind, Grammar, Group, PendingDeps, VarId};
use crate::types::Set;
use std::{cmp::Reverse, collections::BinaryHeap};

/// Heap entries carry the priority observed at push time; the drain loop
/// consults the live counter, so stale entries are harmless.
type Entry = Reverse<(usize, String, AttrId)>;

#[tracing::instrument(skip_all)]
pub fn compute(g: &mut Grammar) -> PendingDeps {
    let mut pending = PendingDeps::new(g);
    let symbols: Vec<(char, Vec<VarId>)> = g
        .occurrences()
        .map(|(name, occ)| (name, occ.to_vec()))
        .collect();

    for (name, occs) in symbols {
        let rep = occs[0];
        if create_groups(g, rep, &mut pending) {
            clone_groups(g, &occs, &mut pending);
        } else {
            tracing::debug!("nonterminal {} is cyclic", name);
            for occ in occs {
                g.var_mut(occ).mark_cyclic();
            }
        }
    }
    pending
}

/// Build the group sequence of one occurrence. Returns `false` when the
/// remaining attributes block each other.
fn create_groups(g: &mut Grammar, var: VarId, pending: &mut PendingDeps) -> bool {
    let mut inherited = BinaryHeap::new();
    let mut synthesized = BinaryHeap::new();
    for id in g.var(var).attrs().collect::<Vec<_>>() {
        enqueue(g, pending, &mut inherited, &mut synthesized, id);
    }

    let mut emitted: Set<AttrId> = Set::default();
    let mut end = 0usize;
    let mut groups = Vec::new();

    loop {
        if inherited.is_empty() && synthesized.is_empty() {
            break;
        }
        let mut progressed = false;

        let subset = drain_ready(pending, &mut inherited, &mut emitted);
        consume_same_index(g, pending, &mut inherited, &mut synthesized, &subset);
        progressed |= push_group(g, var, &mut end, &mut groups, subset);

        let subset = drain_ready(pending, &mut synthesized, &mut emitted);
        consume_same_index(g, pending, &mut inherited, &mut synthesized, &subset);
        progressed |= push_group(g, var, &mut end, &mut groups, subset);

        if !progressed && !(inherited.is_empty() && synthesized.is_empty()) {
            return false;
        }
    }

    g.var_mut(var).set_groups(groups);
    true
}

fn enqueue(
    g: &Grammar,
    pending: &PendingDeps,
    inherited: &mut BinaryHeap<Entry>,
    synthesized: &mut BinaryHeap<Entry>,
    id: AttrId,
) {
    let attr = g.attr(id);
    let entry = Reverse((pending.same_index_count(id), attr.name().to_owned(), id));
    match attr.effective_kind() {
        EffectiveKind::Inherited => inherited.push(entry),
        EffectiveKind::Synthesized => synthesized.push(entry),
    }
}

/// Pop every attribute whose live same-occurrence counter is zero, skipping
/// the ones a previous group already emitted.
fn drain_ready(
    pending: &PendingDeps,
    queue: &mut BinaryHeap<Entry>,
    emitted: &mut Set<AttrId>,
) -> Vec<AttrId> {
    let mut subset = Vec::new();
    loop {
        let ready = match queue.peek() {
            Some(Reverse((_, _, id))) => pending.same_index_count(*id) == 0,
            None => false,
        };
        if !ready {
            break;
        }
        let Reverse((_, _, id)) = queue.pop().unwrap();
        if emitted.insert(id) {
            subset.push(id);
        }
    }
    subset
}

/// Consume the same-occurrence edges out of a freshly drained group and
/// requeue the successors under their updated priorities.
fn consume_same_index(
    g: &Grammar,
    pending: &mut PendingDeps,
    inherited: &mut BinaryHeap<Entry>,
    synthesized: &mut BinaryHeap<Entry>,
    subset: &[AttrId],
) {
    for &a in subset {
        let succs: Vec<AttrId> = g
            .attr(a)
            .uses()
            .filter(|&b| g.attr(b).index() == g.attr(a).index())
            .collect();
        for b in succs {
            pending.consume(g, b, a);
            enqueue(g, pending, inherited, synthesized, b);
        }
    }
}

fn push_group(
    g: &mut Grammar,
    var: VarId,
    end: &mut usize,
    groups: &mut Vec<Group>,
    members: Vec<AttrId>,
) -> bool {
    if members.is_empty() {
        return false;
    }
    *end += members.len();
    let id = g.alloc_group_id();
    groups.push(Group {
        id,
        owner: var,
        end: *end,
        members,
    });
    true
}

/// Copy the representative's group sequence to every other occurrence.
/// Members that are not needed at an occurrence are left out of its clone
/// (the clone may end up empty), but their same-occurrence edges are
/// consumed either way, exactly as grouping consumed them at the
/// representative. Ids and end positions are shared with the original.
fn clone_groups(g: &mut Grammar, occs: &[VarId], pending: &mut PendingDeps) {
    let rep_groups: Vec<Group> = g.var(occs[0]).groups().to_vec();
    for &occ in &occs[1..] {
        let mut cloned = Vec::with_capacity(rep_groups.len());
        for group in &rep_groups {
            let mut members = Vec::new();
            for &member in &group.members {
                let copy = g.var(occ).attr(g.attr(member).name()).unwrap();
                let succs: Vec<AttrId> = g
                    .attr(copy)
                    .uses()
                    .filter(|&c| g.attr(c).index() == g.attr(copy).index())
                    .collect();
                for c in succs {
                    pending.consume(g, c, copy);
                }
                if g.attr(copy).needed() {
                    members.push(copy);
                }
            }
            cloned.push(Group {
                id: group.id,
                owner: occ,
                end: group.end,
                members,
            });
        }
        g.var_mut(occ).set_groups(cloned);
    }
}

#[cfg(test)]
mod tests {
    use crate::grammar::{EffectiveKind, Grammar};

    fn analyzed(source: &str) -> Grammar {
        let mut g = crate::syntax::parse(source).unwrap();
        g.compute_transitive_closure();
        g.compute_attribute_groups();
        g
    }

    #[test]
    fn groups_alternate_and_stay_pure() {
        let g = analyzed(
            "A->BA : s[0]=i[0]; j[2]=s[2]; t[0]=j[0]; u[2]=y[1]; v[0]=u[0]; x[1]=i[0]; \
             y[1]=x[1] s[0]; k[2]=t[2]; m[0]=k[0]; q[0]=k[0]; n[1]=y[1] m[0]; p[1]=n[1]\n",
        );
        let rep = g.occurrences_of('A')[0];
        let groups = g.var(rep).groups();
        let members: Vec<Vec<&str>> = groups
            .iter()
            .map(|grp| grp.members.iter().map(|&a| g.attr(a).name()).collect())
            .collect();
        assert_eq!(
            members,
            [
                vec!["i", "u"],
                vec!["s", "v"],
                vec!["j"],
                vec!["t"],
                vec!["k"],
                vec!["m", "q"],
            ]
        );
        for (i, group) in groups.iter().enumerate() {
            let kinds: Vec<EffectiveKind> = group
                .members
                .iter()
                .map(|&a| g.attr(a).effective_kind())
                .collect();
            let expected = if i % 2 == 0 {
                EffectiveKind::Inherited
            } else {
                EffectiveKind::Synthesized
            };
            assert!(kinds.iter().all(|&k| k == expected), "group {} mixes kinds", i);
        }
    }

    #[test]
    fn end_positions_count_emitted_attributes() {
        let g = analyzed("A->b : x[0]=0; y[0]=x[0]\n");
        let rep = g.occurrences_of('A')[0];
        let ends: Vec<usize> = g.var(rep).groups().iter().map(|grp| grp.end).collect();
        assert_eq!(ends, [1, 2]);
    }

    #[test]
    fn clones_drop_unneeded_members_but_keep_placeholders() {
        let g = analyzed("B->C : x[0]=x[1]; y[0]=y[1]\nA->B\n");
        let occs = g.occurrences_of('B');
        let rep_groups = g.var(occs[0]).groups();
        assert_eq!(rep_groups.len(), 1);
        assert_eq!(rep_groups[0].members.len(), 2);

        // the occurrence inside A->B never uses x or y
        let clone = &g.var(occs[1]).groups()[0];
        assert!(clone.members.is_empty());
        assert_eq!(clone.id, rep_groups[0].id);
        assert_eq!(clone.end, rep_groups[0].end);
    }

    #[test]
    fn direct_same_index_cycle_marks_every_occurrence() {
        let mut g = crate::syntax::parse("A->B : x[0]=y[0]; y[0]=x[0]\nA->a\n").unwrap();
        g.compute_transitive_closure();
        g.compute_attribute_groups();
        for &occ in g.occurrences_of('A') {
            assert!(g.var(occ).is_cyclic());
        }
        for &occ in g.occurrences_of('B') {
            assert!(!g.var(occ).is_cyclic());
        }
    }

    #[test]
    fn grouping_leaves_the_canonical_graph_untouched() {
        let source = "B->C : x[0]=x[1]; y[0]=y[1]\nA->B\n";
        let mut g = crate::syntax::parse(source).unwrap();
        g.compute_transitive_closure();
        let before: Vec<Vec<usize>> = g
            .attrs()
            .map(|(_, a)| a.deps().map(|d| d.into_usize()).collect())
            .collect();
        g.compute_attribute_groups();
        let after: Vec<Vec<usize>> = g
            .attrs()
            .map(|(_, a)| a.deps().map(|d| d.into_usize()).collect())
            .collect();
        assert_eq!(before, after);
    }
}
