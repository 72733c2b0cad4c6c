//! Static evaluation-order analysis for attribute grammars.
//!
//! Given a grammar whose productions carry semantic equations, this crate
//! decides per production whether its attributes can always be evaluated at
//! parse time and, if so, in which order: the dependence relation is closed
//! under projection through the right-hand sides, each nonterminal's
//! attributes are partitioned into alternating inherited/synthesized groups,
//! and the group sequences of every production are merged into one local
//! execution order, splitting groups where the merge would otherwise
//! deadlock. A cyclic grammar is a reported outcome, not an error.

pub mod closure;
pub mod grammar;
pub mod grouping;
pub mod render;
pub mod schedule;
pub mod syntax;
pub mod types;
