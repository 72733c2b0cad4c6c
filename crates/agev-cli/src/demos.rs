//! Bundled demonstration grammars.

/// A calculator-style grammar whose closure materializes projections at
/// every nonterminal.
pub const CALCULATOR: &str = "\
A->BC : y[0]=z[2]; x[1]=x[0]; x[2]=y[1]; y[2]=x[2]
B->a
B->C : y[0]=z[1]; x[1]=x[0]
C->b : z[0]=y[0]
";

/// Two productions of `B` that demand opposite attribute pairings; both
/// orders stay compatible.
pub const SWAP: &str = "\
B->C : x[0]=x[1]; y[0]=y[1]
A->B
B->D : x[0]=y[1]; y[0]=x[1]
";

/// A single self-embedding production whose attributes fall into six
/// alternating inherited/synthesized groups.
pub const ALTERNATING: &str = "\
A->BA : s[0]=i[0]; j[2]=s[2]; t[0]=j[0]; u[2]=y[1]; v[0]=u[0]; x[1]=i[0]; y[1]=x[1] s[0]; k[2]=t[2]; m[0]=k[0]; q[0]=k[0]; n[1]=y[1] m[0]; p[1]=n[1]
";

/// A value flows down into the child before the result comes back up; the
/// naive merge deadlocks once and is resolved by splitting.
pub const BROADCAST: &str = "\
A->B : x[0]=0; x[1]=x[0]; y[0]=y[1]; y[1]=0
A->a
A->c
";

/// A later production forces a finer split of a group that an earlier
/// production already scheduled as a whole.
pub const PIPELINE: &str = "\
A->B : a[1]=v[0]; b[1]=w[0]; r[0]=s[1]
S->BC : a[1]=t[2]; t[2]=b[1]
B->c : s[0]=a[0] b[0]
";

/// A miniature module grammar: an environment flows down a declaration
/// list while code and declarations flow back up.
pub const MODULES: &str = "\
L->SL : e[1]=e[0]; e[2]=d[1] e[0]; d[0]=d[1] d[2]; c[0]=c[1] c[2]
C->ML : g[0]=c[2] n[1]; e[2]=n[1]
";

pub fn find(name: &str) -> Option<&'static str> {
    match name {
        "calculator" => Some(CALCULATOR),
        "swap" => Some(SWAP),
        "alternating" => Some(ALTERNATING),
        "broadcast" => Some(BROADCAST),
        "pipeline" => Some(PIPELINE),
        "modules" => Some(MODULES),
        _ => None,
    }
}

pub const NAMES: &[&str] = &[
    "calculator",
    "swap",
    "alternating",
    "broadcast",
    "pipeline",
    "modules",
];
