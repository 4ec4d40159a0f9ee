//! The grammar rule graph: a closed set of rule kinds addressed by dense
//! integer id, immutable once built.

use std::fmt;

use crate::pattern::RegExp;
use crate::types::{Instantiator, Payload, RuleId, TerminalInstantiator};

/// A single grammar rule. The tag is an opaque diagnostic label; the engine
/// never inspects it beyond printing and equality.
#[derive(Clone)]
pub struct Rule {
    pub id: RuleId,
    pub tag: String,
    pub kind: RuleKind,
}

#[derive(Clone)]
pub enum RuleKind {
    /// A terminal. The rule consumes the whole anchored match; the value is
    /// derived from the significant capture group only (group 0 is the whole
    /// match), so trailing separators can be consumed without becoming part
    /// of the payload.
    Regex {
        pattern: RegExp,
        /// Compiled as `\A(?:…)` so a match is always an anchored prefix
        compiled: regex::Regex,
        group: usize,
        payload: Payload,
        instantiator: Option<TerminalInstantiator>,
    },
    /// A sequence. Arity 0 is epsilon, arity 1 a renaming.
    Concat {
        subs: Vec<RuleId>,
        instantiator: Instantiator,
    },
    /// Ordered choice, arity >= 1. First success wins.
    Alt { subs: Vec<RuleId> },
    /// Greedy bounded repetition; `None` max is unbounded.
    Repeat {
        sub: RuleId,
        min: u32,
        max: Option<u32>,
    },
    /// Positive lookahead; never consumes.
    Peek { sub: RuleId },
    /// Negative lookahead; never consumes.
    Neg { sub: RuleId },
}

impl RuleKind {
    /// One-line structural summary for diagnostics.
    pub fn summary(&self) -> String {
        fn ids(subs: &[RuleId]) -> String {
            subs.iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }

        match self {
            RuleKind::Regex { pattern, group, .. } => {
                format!("regex: {} group:{group}", pattern.render())
            }
            RuleKind::Concat { subs, .. } => format!("seq({})", ids(subs)),
            RuleKind::Alt { subs } => format!("alt({})", ids(subs)),
            RuleKind::Repeat { sub, min, max } => match max {
                Some(max) => format!("rep[{min},{max}] {sub}"),
                None => format!("rep[{min},*] {sub}"),
            },
            RuleKind::Peek { sub } => format!("peek[{sub}]"),
            RuleKind::Neg { sub } => format!("neg[{sub}]"),
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule({} {}: {})", self.id, self.tag, self.kind.summary())
    }
}

/// An immutable grammar: a dense rule table plus the root rule's id.
/// Built once by `GrammarBuilder::build`, then read-only for the lifetime of
/// all matches; safe to share across threads.
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: Vec<Rule>,
    root: RuleId,
}

impl Grammar {
    pub(crate) fn from_parts(rules: Vec<Rule>, root: RuleId) -> Grammar {
        debug_assert!(rules.iter().enumerate().all(|(i, r)| r.id == i));
        Grammar { rules, root }
    }

    pub fn root(&self) -> RuleId {
        self.root
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Pretty-print the rule graph, one line per rule. Purely diagnostic.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            out.push_str(&format!("{:3} {}: {}\n", rule.id, rule.tag, rule.kind.summary()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Grammars are shared across concurrent matches without locking
    #[test]
    fn grammar_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Grammar>();
    }
}
