//! Local execution order construction.
//!
//! Merges the group sequences of all occurrences of a production into one
//! total order. A group can be scheduled once every member has no remaining
//! predecessor; when no head group qualifies, the merge tries to split a
//! head group into its ready part and its waiting part. Groups are
//! conservative (members are unordered inside a group), so an inter-group
//! cycle may be spurious, and the split refines the partition just enough to
//! break it. The refinement is mirrored to every occurrence of the
//! nonterminal (pending queues and already-emitted orders alike) so that
//! the group order stays compatible across productions.

use crate::grammar::{AttrId, Grammar, Group, PendingDeps, ProdId, VarId};
use crate::types::{Map, Set};
use std::{cmp::Reverse, collections::BinaryHeap};

#[tracing::instrument(skip_all)]
pub fn synchronize(g: &mut Grammar, pending: &mut PendingDeps) {
    for prod in g.production_ids() {
        synchronize_production(g, prod, pending);
        sweep_not_needed(g, prod);
    }
}

fn synchronize_production(g: &mut Grammar, prod: ProdId, pending: &mut PendingDeps) {
    let vars: Vec<VarId> = g.production(prod).vars().to_vec();
    if vars.iter().any(|&v| g.var(v).is_cyclic()) {
        g.production_mut(prod).mark_cyclic();
        return;
    }

    // cursor = first unconsumed group of each occurrence; the group lists
    // themselves stay intact so later splits can still locate clones
    let mut cursors: Map<VarId, usize> = vars.iter().map(|&v| (v, 0)).collect();
    let mut remaining: usize = vars.iter().map(|&v| g.var(v).groups().len()).sum();
    let mut last = vars.len() - 1;

    while remaining > 0 {
        let mut picked = None;
        for i in 0..vars.len() {
            let pos = (last + 1 + i) % vars.len();
            let var = vars[pos];
            let Some(group) = g.var(var).groups().get(cursors[&var]) else {
                continue;
            };
            if group.members.iter().all(|&a| pending.is_free(a)) {
                picked = Some(pos);
                break;
            }
        }

        match picked {
            Some(pos) => {
                let var = vars[pos];
                let cur = cursors[&var];
                *cursors.get_mut(&var).unwrap() += 1;
                let group = g.var(var).groups()[cur].clone();
                for &a in &group.members {
                    let cross: Vec<AttrId> = g
                        .attr(a)
                        .uses()
                        .filter(|&c| g.attr(c).index() != g.attr(a).index())
                        .collect();
                    for c in cross {
                        pending.consume(g, c, a);
                    }
                }
                g.production_mut(prod).push_order(group);
                last = pos;
                remaining -= 1;
            }
            None => match try_split(g, &vars, &mut cursors, pending) {
                Some(added) => remaining += added,
                None => {
                    tracing::debug!(
                        "production {}{}: no schedulable or splittable group left",
                        g.production(prod).lhs(),
                        g.production(prod).index(),
                    );
                    g.production_mut(prod).mark_cyclic();
                    g.production_mut(prod).clear_order();
                    return;
                }
            },
        }
    }
}

/// Split the first head group holding at least one member without remaining
/// predecessors. Returns the number of groups this added to the pending
/// queues of the current production, or `None` when every head group is
/// fully blocked.
fn try_split(
    g: &mut Grammar,
    vars: &[VarId],
    cursors: &mut Map<VarId, usize>,
    pending: &PendingDeps,
) -> Option<usize> {
    for &var in vars {
        let cur = cursors[&var];
        let Some(head) = g.var(var).groups().get(cur) else {
            continue;
        };
        if head.members.iter().any(|&a| pending.is_free(a)) {
            tracing::trace!(
                "splitting head group of {}{}",
                g.var(var).name(),
                g.var(var).index(),
            );
            return Some(split_group(g, cursors, var, cur, pending));
        }
    }
    None
}

/// Extract the ready members of the reference head group into a new group
/// sitting immediately before the residual, then mirror the refinement into
/// every other occurrence of the nonterminal: its clone is located by the
/// shared group id, either in the occurrence's pending queue or in its
/// production's already-emitted order when the clone was consumed, and
/// split by attribute name. The inserted part shares one fresh id across
/// all occurrences.
fn split_group(
    g: &mut Grammar,
    cursors: &mut Map<VarId, usize>,
    ref_var: VarId,
    ref_cur: usize,
    pending: &PendingDeps,
) -> usize {
    let symbol = g.var(ref_var).name();
    let (orig_id, orig_end) = {
        let head = &g.var(ref_var).groups()[ref_cur];
        (head.id, head.end)
    };
    let ready: Vec<AttrId> = g.var(ref_var).groups()[ref_cur]
        .members
        .iter()
        .copied()
        .filter(|&a| pending.is_free(a))
        .collect();
    let ready_names: Vec<String> = ready.iter().map(|&a| g.attr(a).name().to_owned()).collect();
    let new_id = g.alloc_group_id();

    {
        let groups = g.var_mut(ref_var).groups_mut();
        groups[ref_cur].members.retain(|a| !ready.contains(a));
        let end = orig_end - groups[ref_cur].members.len();
        groups.insert(
            ref_cur,
            Group {
                id: new_id,
                owner: ref_var,
                end,
                members: ready,
            },
        );
    }
    let mut added = 1;

    for occ in g.occurrences_of(symbol).to_vec() {
        if occ == ref_var {
            continue;
        }
        let moved: Vec<AttrId> = ready_names
            .iter()
            .filter_map(|name| g.var(occ).attr(name))
            .collect();

        if let Some(gpos) = g.var(occ).groups().iter().position(|grp| grp.id == orig_id) {
            let groups = g.var_mut(occ).groups_mut();
            let sub = extract_members(&mut groups[gpos].members, &moved);
            let end = groups[gpos].end - groups[gpos].members.len();
            groups.insert(
                gpos,
                Group {
                    id: new_id,
                    owner: occ,
                    end,
                    members: sub,
                },
            );
            match cursors.get_mut(&occ) {
                // an occurrence of the current production: growing the
                // consumed prefix shifts the cursor, growing the pending
                // part adds a schedulable group
                Some(cursor) if gpos < *cursor => *cursor += 1,
                Some(_) => added += 1,
                None => {}
            }
        }

        let occ_prod = g.var(occ).prod();
        let opos = g
            .production(occ_prod)
            .order()
            .iter()
            .position(|grp| grp.id == orig_id && grp.owner == occ);
        if let Some(opos) = opos {
            let order = g.production_mut(occ_prod).order_mut();
            let sub = extract_members(&mut order[opos].members, &moved);
            let end = order[opos].end - order[opos].members.len();
            if !sub.is_empty() {
                order.insert(
                    opos,
                    Group {
                        id: new_id,
                        owner: occ,
                        end,
                        members: sub,
                    },
                );
            }
        }
    }
    added
}

fn extract_members(members: &mut Vec<AttrId>, moved: &[AttrId]) -> Vec<AttrId> {
    let mut sub = Vec::new();
    for &m in moved {
        if let Some(pos) = members.iter().position(|&x| x == m) {
            members.remove(pos);
            sub.push(m);
        }
    }
    sub
}

/// Drop attributes nothing ever evaluates, then drop emptied groups.
fn sweep_not_needed(g: &mut Grammar, prod: ProdId) {
    let mut order = g.production_mut(prod).take_order();
    for group in &mut order {
        group.members.retain(|&a| g.attr(a).needed());
    }
    order.retain(|group| !group.members.is_empty());
    g.production_mut(prod).set_order(order);
}

/// The non-synchronized scheduler: a plain topological order over all
/// attributes of each production, favoring the left-hand side on ties.
/// Needed attributes come out as singleton groups. Unlike the synchronized
/// merge this gives no compatibility guarantee across productions.
#[tracing::instrument(skip_all)]
pub fn per_attribute(g: &mut Grammar) {
    let mut pending = PendingDeps::new(g);
    for prod in g.production_ids() {
        per_attribute_production(g, prod, &mut pending);
    }
}

fn per_attribute_production(g: &mut Grammar, prod: ProdId, pending: &mut PendingDeps) {
    let vars: Vec<VarId> = g.production(prod).vars().to_vec();
    let mut heap: BinaryHeap<Reverse<(usize, usize, String, AttrId)>> = BinaryHeap::new();
    for &var in &vars {
        for a in g.var(var).attrs() {
            heap.push(Reverse((
                pending.deps_len(a),
                g.attr(a).index(),
                g.attr(a).name().to_owned(),
                a,
            )));
        }
    }

    let mut emitted: Set<AttrId> = Set::default();
    let mut end = 0usize;
    let mut order = Vec::new();
    while let Some(Reverse((_, _, _, a))) = heap.pop() {
        if !pending.is_free(a) {
            g.production_mut(prod).mark_cyclic();
            return;
        }
        if !emitted.insert(a) {
            continue;
        }
        for c in g.attr(a).uses().collect::<Vec<_>>() {
            pending.consume(g, c, a);
            heap.push(Reverse((
                pending.deps_len(c),
                g.attr(c).index(),
                g.attr(c).name().to_owned(),
                c,
            )));
        }
        if g.attr(a).needed() {
            end += 1;
            let owner = vars[g.attr(a).index()];
            let id = g.alloc_group_id();
            order.push(Group {
                id,
                owner,
                end,
                members: vec![a],
            });
        }
    }
    g.production_mut(prod).set_order(order);
}

#[cfg(test)]
mod tests {
    use crate::grammar::Grammar;
    use crate::render;

    fn analyzed(source: &str) -> Grammar {
        let mut g = crate::syntax::parse(source).unwrap();
        g.analyze();
        g
    }

    #[test]
    fn compatible_orders_across_occurrences() {
        let g = analyzed(
            "B->C : x[0]=x[1]; y[0]=y[1]\n\
             A->B\n\
             B->D : x[0]=y[1]; y[0]=x[1]\n",
        );
        assert_eq!(
            render::execution_orders(&g).to_string(),
            "Production B0: B -> C\t\t[{C1.x, C1.y}, {B0.x, B0.y}] cycle-free: true\n\
             Production B1: B -> D\t\t[{D1.x, D1.y}, {B0.x, B0.y}] cycle-free: true\n\
             Production A0: A -> B\t\t[] cycle-free: true\n",
        );
    }

    #[test]
    fn blocked_merge_is_resolved_by_splitting() {
        let g = analyzed(
            "A->B : x[0]=0; x[1]=x[0]; y[0]=y[1]; y[1]=0\n\
             A->a\n\
             A->c\n",
        );
        assert_eq!(
            render::execution_orders(&g).to_string(),
            "Production A0: A -> B\t\t[{A0.x}, {B1.x, B1.y}, {A0.y}] cycle-free: true\n\
             Production A1: A -> a\t\t[] cycle-free: true\n\
             Production A2: A -> c\t\t[] cycle-free: true\n",
        );
    }

    #[test]
    fn grouping_cycle_propagates_to_productions() {
        let g = analyzed("A->B : x[0]=y[0]; y[0]=x[0]\nA->a\n");
        assert_eq!(
            render::execution_orders(&g).to_string(),
            "Production A0: A -> B\t\t[] cycle-free: false\n\
             Production A1: A -> a\t\t[] cycle-free: false\n",
        );
    }

    #[test]
    fn alternation_deadlock_without_free_members_is_cyclic() {
        // B and C each demand the other child's synthesized attribute
        // before their own inherited one; every head group stays blocked
        // and there is nothing to split.
        let g = analyzed(
            "A->BC : x[1]=s[2]; x[2]=s[1]\n\
             B->D : s[0]=u[1]\n\
             C->D : s[0]=u[1]\n\
             D->d : u[0]=0\n",
        );
        let orders = render::execution_orders(&g).to_string();
        assert!(orders.contains("Production A0: A -> B C\t\t[] cycle-free: false"));
        assert!(orders.contains("Production B0: B -> D\t\t[{D1.u}, {B0.s}] cycle-free: true"));
        assert!(orders.contains("Production C0: C -> D\t\t[{D1.u}, {C0.s}] cycle-free: true"));
        assert!(orders.contains("Production D0: D -> d\t\t[{D0.u}] cycle-free: true"));
    }

    #[test]
    fn per_attribute_order_is_topological() {
        let mut g = crate::syntax::parse(
            "B->C : x[0]=x[1]; y[0]=y[1]\n\
             A->B\n\
             B->D : x[0]=y[1]; y[0]=x[1]\n",
        )
        .unwrap();
        g.compute_transitive_closure();
        g.determine_local_execution_orders();
        assert_eq!(
            render::execution_orders(&g).to_string(),
            "Production B0: B -> C\t\t[{C1.x}, {B0.x}, {C1.y}, {B0.y}] cycle-free: true\n\
             Production B1: B -> D\t\t[{D1.x}, {B0.y}, {D1.y}, {B0.x}] cycle-free: true\n\
             Production A0: A -> B\t\t[] cycle-free: true\n",
        );
    }
}
