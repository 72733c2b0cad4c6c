//! Grammar types.

use crate::types::{Map, Set};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct AttrId {
    raw: u32,
}

impl AttrId {
    #[inline]
    const fn new(raw: u32) -> Self {
        Self { raw }
    }

    #[inline]
    pub const fn into_usize(self) -> usize {
        self.raw as usize
    }
}

impl fmt::Display for AttrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.raw, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct VarId {
    raw: u32,
}

impl VarId {
    #[inline]
    const fn new(raw: u32) -> Self {
        Self { raw }
    }

    #[inline]
    pub const fn into_usize(self) -> usize {
        self.raw as usize
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.raw, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ProdId {
    raw: u32,
}

impl ProdId {
    #[inline]
    const fn new(raw: u32) -> Self {
        Self { raw }
    }

    #[inline]
    pub const fn into_usize(self) -> usize {
        self.raw as usize
    }
}

impl fmt::Display for ProdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.raw, f)
    }
}

/// Identity of one attribute group, shared by every mirror clone of that
/// group across the occurrences of a nonterminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct GroupId {
    raw: u32,
}

impl GroupId {
    #[inline]
    const fn new(raw: u32) -> Self {
        Self { raw }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.raw, f)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AttrKind {
    Inherited,
    InitByValue,
    Synthesized,
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttrKind::Inherited => "inh",
            AttrKind::InitByValue => "val",
            AttrKind::Synthesized => "syn",
        })
    }
}

/// How an attribute behaves during evaluation. Init-by-value attributes act
/// synthesized at the left-hand side and inherited at any other position.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EffectiveKind {
    Inherited,
    Synthesized,
}

/// A node of the dependence graph: one attribute at one symbol occurrence.
#[derive(Debug)]
pub struct Attribute {
    name: String,
    index: usize,
    kind: AttrKind,
    needed: bool,
    deps: Set<AttrId>,
    uses: Set<AttrId>,
    same_index_preds: usize,
}

impl Attribute {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of the owning symbol occurrence within its production.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> AttrKind {
        self.kind
    }

    pub fn effective_kind(&self) -> EffectiveKind {
        match self.kind {
            AttrKind::Inherited => EffectiveKind::Inherited,
            AttrKind::Synthesized => EffectiveKind::Synthesized,
            AttrKind::InitByValue if self.index == 0 => EffectiveKind::Synthesized,
            AttrKind::InitByValue => EffectiveKind::Inherited,
        }
    }

    pub fn needed(&self) -> bool {
        self.needed
    }

    /// Predecessors: the attributes this one is computed from.
    pub fn deps(&self) -> impl Iterator<Item = AttrId> + '_ {
        self.deps.iter().copied()
    }

    /// Successors: the attributes computed from this one.
    pub fn uses(&self) -> impl Iterator<Item = AttrId> + '_ {
        self.uses.iter().copied()
    }

    /// Cached number of predecessors located at the same occurrence.
    pub fn same_index_preds(&self) -> usize {
        self.same_index_preds
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} {}", self.name, self.index, self.kind)
    }
}

/// One occurrence of a grammar symbol within a production. A terminal is
/// simply an occurrence that never carries attributes.
#[derive(Debug)]
pub struct Variable {
    name: char,
    index: usize,
    prod: ProdId,
    attrs: Map<String, AttrId>,
    groups: Vec<Group>,
    cyclic: bool,
}

impl Variable {
    pub fn name(&self) -> char {
        self.name
    }

    /// Position within the owning production (0 = left-hand side).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn prod(&self) -> ProdId {
        self.prod
    }

    pub fn attr(&self, name: &str) -> Option<AttrId> {
        self.attrs.get(name).copied()
    }

    pub fn attrs(&self) -> impl Iterator<Item = AttrId> + '_ {
        self.attrs.values().copied()
    }

    /// The (refinable) group sequence assigned to this occurrence.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    pub(crate) fn groups_mut(&mut self) -> &mut Vec<Group> {
        &mut self.groups
    }

    pub(crate) fn set_groups(&mut self, groups: Vec<Group>) {
        self.groups = groups;
    }

    pub(crate) fn mark_cyclic(&mut self) {
        self.cyclic = true;
    }
}

/// A set of attributes of one effective kind that can be evaluated in any
/// relative order. `end` is the running count of attributes emitted up to
/// and including this group in the owner's sequence.
#[derive(Debug, Clone)]
pub struct Group {
    pub id: GroupId,
    pub owner: VarId,
    pub end: usize,
    pub members: Vec<AttrId>,
}

/// One production rule: an ordered list of symbol occurrences, the emitted
/// local execution order, and the cycle flag.
#[derive(Debug)]
pub struct Production {
    lhs: char,
    index: usize,
    vars: Vec<VarId>,
    order: Vec<Group>,
    acyclic: bool,
}

impl Production {
    pub fn lhs(&self) -> char {
        self.lhs
    }

    /// Ordinal among the productions sharing this left-hand symbol.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn vars(&self) -> &[VarId] {
        &self.vars
    }

    /// The synchronized local execution order, empty when cyclic.
    pub fn order(&self) -> &[Group] {
        &self.order
    }

    pub fn is_acyclic(&self) -> bool {
        self.acyclic
    }

    pub(crate) fn order_mut(&mut self) -> &mut Vec<Group> {
        &mut self.order
    }

    pub(crate) fn push_order(&mut self, group: Group) {
        self.order.push(group);
    }

    pub(crate) fn take_order(&mut self) -> Vec<Group> {
        std::mem::take(&mut self.order)
    }

    pub(crate) fn set_order(&mut self, order: Vec<Group>) {
        self.order = order;
    }

    pub(crate) fn clear_order(&mut self) {
        self.order.clear();
    }

    pub(crate) fn mark_cyclic(&mut self) {
        self.acyclic = false;
    }
}

/// The attribute grammar under analysis. Attributes, occurrences and
/// productions live in arenas owned here and reference each other through
/// dense ids, so the cyclic dependence relation never turns into cyclic
/// ownership.
#[derive(Debug, Default)]
pub struct Grammar {
    attrs: Vec<Attribute>,
    vars: Vec<Variable>,
    prods: Vec<Production>,
    by_lhs: Map<char, Vec<ProdId>>,
    by_symbol: Map<char, Vec<VarId>>,
    next_group_id: u32,
}

impl Grammar {
    /// Define a grammar using the specified function.
    pub fn define<F, E>(f: F) -> Result<Self, E>
    where
        F: FnOnce(&mut GrammarDef) -> Result<(), E>,
    {
        let mut def = GrammarDef {
            grammar: Grammar::default(),
        };
        f(&mut def)?;
        Ok(def.grammar)
    }

    pub fn attr(&self, id: AttrId) -> &Attribute {
        &self.attrs[id.into_usize()]
    }

    pub fn attrs(&self) -> impl Iterator<Item = (AttrId, &Attribute)> + '_ {
        self.attrs
            .iter()
            .enumerate()
            .map(|(i, attr)| (AttrId::new(i as u32), attr))
    }

    pub fn attr_count(&self) -> usize {
        self.attrs.len()
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.into_usize()]
    }

    pub fn production(&self, id: ProdId) -> &Production {
        &self.prods[id.into_usize()]
    }

    /// All productions, grouped by left-hand symbol in first-seen order.
    pub fn productions(&self) -> impl Iterator<Item = (ProdId, &Production)> + '_ {
        self.by_lhs
            .values()
            .flatten()
            .map(|&id| (id, self.production(id)))
    }

    /// All occurrences of each symbol, in first-seen symbol order.
    pub fn occurrences(&self) -> impl Iterator<Item = (char, &[VarId])> + '_ {
        self.by_symbol.iter().map(|(name, occ)| (*name, &occ[..]))
    }

    pub fn occurrences_of(&self, name: char) -> &[VarId] {
        self.by_symbol.get(&name).map_or(&[], |occ| &occ[..])
    }

    pub(crate) fn attr_mut(&mut self, id: AttrId) -> &mut Attribute {
        &mut self.attrs[id.into_usize()]
    }

    pub(crate) fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.into_usize()]
    }

    pub(crate) fn production_mut(&mut self, id: ProdId) -> &mut Production {
        &mut self.prods[id.into_usize()]
    }

    pub(crate) fn production_ids(&self) -> Vec<ProdId> {
        self.by_lhs.values().flatten().copied().collect()
    }

    pub(crate) fn alloc_group_id(&mut self) -> GroupId {
        let id = GroupId::new(self.next_group_id);
        self.next_group_id += 1;
        id
    }

    /// Record that `of` is computed from `on`. Returns whether the edge is
    /// new. The cached same-occurrence counter is kept in sync here and
    /// nowhere else; passes that consume edges work on a [`PendingDeps`].
    pub(crate) fn add_dependency(&mut self, of: AttrId, on: AttrId) -> bool {
        let new = self.attrs[of.into_usize()].deps.insert(on);
        self.attrs[on.into_usize()].uses.insert(of);
        if new && self.attrs[of.into_usize()].index == self.attrs[on.into_usize()].index {
            self.attrs[of.into_usize()].same_index_preds += 1;
        }
        new
    }

    /// Run the standard pipeline: closure, grouping, synchronized orders.
    pub fn analyze(&mut self) {
        self.compute_transitive_closure();
        let mut pending = self.compute_attribute_groups();
        self.determine_compatible_local_execution_orders(&mut pending);
    }

    /// Materialize every projected dependency; see [`crate::closure`].
    pub fn compute_transitive_closure(&mut self) {
        crate::closure::compute(self);
    }

    /// Partition each nonterminal's attributes into alternating groups and
    /// clone them to every occurrence; see [`crate::grouping`].
    pub fn compute_attribute_groups(&mut self) -> PendingDeps {
        crate::grouping::compute(self)
    }

    /// Merge the group sequences of each production into one total order,
    /// splitting groups where the merge would otherwise deadlock; see
    /// [`crate::schedule`].
    pub fn determine_compatible_local_execution_orders(&mut self, pending: &mut PendingDeps) {
        crate::schedule::synchronize(self, pending);
    }

    /// The simpler per-attribute scheduler; see [`crate::schedule`].
    pub fn determine_local_execution_orders(&mut self) {
        crate::schedule::per_attribute(self);
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "symbols: ")?;
        for (i, (name, _)) in self.by_symbol.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", name)?;
        }
        writeln!(f)?;
        writeln!(f, "productions:")?;
        for (_, prod) in self.productions() {
            write!(f, "  [{}{}] {} ->", prod.lhs(), prod.index(), prod.lhs())?;
            for &var in &prod.vars()[1..] {
                write!(f, " {}", self.var(var).name())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Working copy of the dependence relation. Grouping, cloning, scheduling
/// and splitting consume edges from here; the canonical graph only ever
/// grows, so diagnostic dumps stay meaningful after every pass and each
/// pass can be re-run from a fresh copy.
#[derive(Debug, Clone)]
pub struct PendingDeps {
    deps: Vec<Set<AttrId>>,
    same_index: Vec<usize>,
}

impl PendingDeps {
    pub fn new(g: &Grammar) -> Self {
        Self {
            deps: g.attrs.iter().map(|attr| attr.deps.clone()).collect(),
            same_index: g.attrs.iter().map(|attr| attr.same_index_preds).collect(),
        }
    }

    /// Whether every predecessor of `id` has been consumed.
    pub fn is_free(&self, id: AttrId) -> bool {
        self.deps[id.into_usize()].is_empty()
    }

    pub fn deps_len(&self, id: AttrId) -> usize {
        self.deps[id.into_usize()].len()
    }

    pub fn same_index_count(&self, id: AttrId) -> usize {
        self.same_index[id.into_usize()]
    }

    /// Consume the edge `of ← on`. Idempotent.
    pub(crate) fn consume(&mut self, g: &Grammar, of: AttrId, on: AttrId) {
        if self.deps[of.into_usize()].swap_remove(&on)
            && g.attr(of).index() == g.attr(on).index()
        {
            self.same_index[of.into_usize()] -= 1;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GrammarDefError {
    #[error("attribute index {index} out of range for a production with {len} symbols")]
    IndexOutOfRange { index: usize, len: usize },
}

/// The contextual values for building a `Grammar`.
#[derive(Debug)]
pub struct GrammarDef {
    grammar: Grammar,
}

impl GrammarDef {
    /// Register a production rule. Every occurrence starts with a mirror of
    /// the attribute set already known for its symbol, so that all
    /// occurrences of one nonterminal always carry the same attribute names.
    pub fn production(&mut self, lhs: char, rhs: &[char]) -> Result<ProdId, GrammarDefError> {
        let g = &mut self.grammar;
        let prod_id = ProdId::new(g.prods.len() as u32);
        let index = g.by_lhs.get(&lhs).map_or(0, |prods| prods.len());
        g.prods.push(Production {
            lhs,
            index,
            vars: Vec::with_capacity(rhs.len() + 1),
            order: Vec::new(),
            acyclic: true,
        });

        for (pos, &name) in std::iter::once(&lhs).chain(rhs.iter()).enumerate() {
            let var_id = VarId::new(g.vars.len() as u32);
            let template = g
                .by_symbol
                .get(&name)
                .and_then(|occ| occ.first())
                .copied();
            g.vars.push(Variable {
                name,
                index: pos,
                prod: prod_id,
                attrs: Map::default(),
                groups: Vec::new(),
                cyclic: false,
            });
            g.by_symbol.entry(name).or_default().push(var_id);
            if let Some(template) = template {
                let metas: Vec<(String, AttrKind)> = g
                    .var(template)
                    .attrs()
                    .map(|a| (g.attr(a).name.clone(), g.attr(a).kind))
                    .collect();
                for (attr_name, kind) in metas {
                    Self::insert_attr(g, var_id, &attr_name, kind);
                }
            }
            g.prods[prod_id.into_usize()].vars.push(var_id);
        }

        g.by_lhs.entry(lhs).or_default().push(prod_id);
        Ok(prod_id)
    }

    /// Register one semantic equation of `prod`: the left attribute is
    /// computed from the right attributes. Decides the left attribute's
    /// kind, marks every mentioned attribute as needed, and keeps mirror
    /// occurrences and kinds in sync across the whole grammar.
    pub fn rule(
        &mut self,
        prod: ProdId,
        left: (&str, usize),
        right: &[(&str, usize)],
    ) -> Result<(), GrammarDefError> {
        let g = &mut self.grammar;
        let len = g.production(prod).vars().len();
        let (lname, lindex) = left;
        if lindex >= len {
            return Err(GrammarDefError::IndexOutOfRange { index: lindex, len });
        }
        let lvar = g.production(prod).vars()[lindex];
        let lattr = Self::ensure_attr(g, lvar, lname);
        g.attr_mut(lattr).needed = true;
        Self::mirror_attr(g, lvar, lname);

        for &(rname, rindex) in right {
            if rindex >= len {
                return Err(GrammarDefError::IndexOutOfRange { index: rindex, len });
            }
            let rvar = g.production(prod).vars()[rindex];
            let rattr = Self::ensure_attr(g, rvar, rname);
            g.attr_mut(rattr).needed = true;
            g.add_dependency(lattr, rattr);
            Self::mirror_attr(g, rvar, rname);
        }

        let kind = if right.is_empty() {
            AttrKind::InitByValue
        } else if lindex == 0 {
            AttrKind::Synthesized
        } else {
            AttrKind::Inherited
        };
        let lsym = g.var(lvar).name();
        Self::set_kind_everywhere(g, lsym, lname, kind);
        Ok(())
    }

    fn insert_attr(g: &mut Grammar, var: VarId, name: &str, kind: AttrKind) -> AttrId {
        if let Some(existing) = g.var(var).attr(name) {
            return existing;
        }
        let id = AttrId::new(g.attrs.len() as u32);
        let index = g.var(var).index();
        g.attrs.push(Attribute {
            name: name.to_owned(),
            index,
            kind,
            needed: false,
            deps: Set::default(),
            uses: Set::default(),
            same_index_preds: 0,
        });
        g.var_mut(var).attrs.insert(name.to_owned(), id);
        id
    }

    fn ensure_attr(g: &mut Grammar, var: VarId, name: &str) -> AttrId {
        // A referenced-but-undefined attribute flows into the production
        // from outside: inherited at the left-hand side, synthesized at a
        // right-hand occurrence. A defining equation overrides this.
        let kind = if g.var(var).index() == 0 {
            AttrKind::Inherited
        } else {
            AttrKind::Synthesized
        };
        Self::insert_attr(g, var, name, kind)
    }

    fn mirror_attr(g: &mut Grammar, var: VarId, name: &str) {
        let symbol = g.var(var).name();
        let kind = g.attr(g.var(var).attr(name).unwrap()).kind;
        let occs: Vec<VarId> = g.occurrences_of(symbol).to_vec();
        for occ in occs {
            Self::insert_attr(g, occ, name, kind);
        }
    }

    fn set_kind_everywhere(g: &mut Grammar, symbol: char, name: &str, kind: AttrKind) {
        let occs: Vec<VarId> = g.occurrences_of(symbol).to_vec();
        for occ in occs {
            if let Some(attr) = g.var(occ).attr(name) {
                g.attr_mut(attr).kind = kind;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Grammar {
        Grammar::define(|def| {
            let p0 = def.production('A', &['B', 'C'])?;
            def.rule(p0, ("y", 0), &[("z", 2)])?;
            def.rule(p0, ("x", 1), &[("x", 0)])?;
            def.production('B', &['a'])?;
            let p2 = def.production('B', &['C'])?;
            def.rule(p2, ("y", 0), &[("z", 1)])?;
            Ok::<_, GrammarDefError>(())
        })
        .unwrap()
    }

    #[test]
    fn kinds_and_needed() {
        let g = sample();
        let a0 = g.occurrences_of('A')[0];
        let y0 = g.var(a0).attr("y").unwrap();
        assert_eq!(g.attr(y0).kind(), AttrKind::Synthesized);
        assert!(g.attr(y0).needed());

        // referenced at the left-hand side without a definition
        let x0 = g.var(a0).attr("x").unwrap();
        assert_eq!(g.attr(x0).kind(), AttrKind::Inherited);
        assert!(g.attr(x0).needed());

        let b1 = g.production(ProdId::new(0)).vars()[1];
        let x1 = g.var(b1).attr("x").unwrap();
        assert_eq!(g.attr(x1).kind(), AttrKind::Inherited);
    }

    #[test]
    fn mirrors_are_unneeded_and_kind_synced() {
        let g = sample();
        // B->a never mentions x or y, so its left-hand occurrence carries
        // unneeded mirrors of both.
        let occs = g.occurrences_of('B');
        assert_eq!(occs.len(), 3);
        let mirror = occs[1];
        for name in ["x", "y"] {
            let attr = g.var(mirror).attr(name).unwrap();
            assert!(!g.attr(attr).needed(), "{} should be a mirror", name);
        }
        // y is synthesized at every B occurrence, including mirrors created
        // before its defining equation was seen.
        for &occ in occs {
            let y = g.var(occ).attr("y").unwrap();
            assert_eq!(g.attr(y).kind(), AttrKind::Synthesized);
        }
    }

    #[test]
    fn dependency_edges_and_counters() {
        let g = sample();
        let a0 = g.occurrences_of('A')[0];
        let c2 = g.production(ProdId::new(0)).vars()[2];
        let y0 = g.var(a0).attr("y").unwrap();
        let z2 = g.var(c2).attr("z").unwrap();
        assert!(g.attr(y0).deps().any(|a| a == z2));
        assert!(g.attr(z2).uses().any(|a| a == y0));
        // cross-occurrence edge: not a same-index predecessor
        assert_eq!(g.attr(y0).same_index_preds(), 0);
    }

    #[test]
    fn same_index_counter_tracks_new_edges() {
        let mut g = Grammar::define(|def| {
            let p = def.production('A', &['b'])?;
            def.rule(p, ("x", 0), &[])?;
            def.rule(p, ("y", 0), &[("x", 0)])?;
            Ok::<_, GrammarDefError>(())
        })
        .unwrap();
        let a0 = g.occurrences_of('A')[0];
        let x = g.var(a0).attr("x").unwrap();
        let y = g.var(a0).attr("y").unwrap();
        assert_eq!(g.attr(y).same_index_preds(), 1);
        // re-adding the same edge must not bump the counter
        assert!(!g.add_dependency(y, x));
        assert_eq!(g.attr(y).same_index_preds(), 1);
    }

    #[test]
    fn index_out_of_range_is_rejected() {
        let err = Grammar::define(|def| {
            let p = def.production('A', &['b'])?;
            def.rule(p, ("x", 4), &[])?;
            Ok::<_, GrammarDefError>(())
        })
        .unwrap_err();
        assert!(matches!(err, GrammarDefError::IndexOutOfRange { index: 4, len: 2 }));
    }
}
