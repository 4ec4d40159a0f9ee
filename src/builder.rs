//! Grammar assembly and normalization.
//!
//! A `GrammarBuilder` collects raw, possibly-redundant rules (recursion is
//! expressed with `reserve` + `define_*`), then `build` runs the one-time
//! normalization pass: equivalence collapsing, breadth-first renumbering from
//! the root, and terminal pattern compilation.

use std::collections::VecDeque;

use thiserror::Error;

use crate::pattern::RegExp;
use crate::rules::{Grammar, Rule, RuleKind};
use crate::types::{
    Instantiator, InstantiateError, Payload, RuleId, Span, TerminalInstantiator, Value,
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("rule {0} was reserved but never defined")]
    UndefinedRule(RuleId),
    #[error("alternation {0} has no alternatives")]
    EmptyAlternation(RuleId),
    #[error("rule {id} has repeat bounds {min}..{max}")]
    InvalidRepeatBounds { id: RuleId, min: u32, max: u32 },
    #[error("rule {0} references unknown rule {1}")]
    UnknownReference(RuleId, RuleId),
    #[error("alias cycle through rule {0}")]
    AliasCycle(RuleId),
    #[error("terminal {id} pattern {pattern:?} does not compile: {source}")]
    BadPattern {
        id: RuleId,
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },
    #[error("terminal {id} has no capture group {group}")]
    MissingGroup { id: RuleId, group: usize },
}

/// A raw rule before normalization; same shape as `RuleKind` but with the
/// terminal pattern not yet compiled.
enum RawKind {
    Regex {
        pattern: RegExp,
        group: usize,
        payload: Payload,
        instantiator: Option<TerminalInstantiator>,
    },
    Concat {
        subs: Vec<RuleId>,
        instantiator: Instantiator,
    },
    Alt {
        subs: Vec<RuleId>,
    },
    Repeat {
        sub: RuleId,
        min: u32,
        max: Option<u32>,
    },
    Peek {
        sub: RuleId,
    },
    Neg {
        sub: RuleId,
    },
}

struct RawRule {
    tag: String,
    kind: RawKind,
}

#[derive(Default)]
pub struct GrammarBuilder {
    // None marks a reserved-but-undefined slot
    rules: Vec<Option<RawRule>>,
}

impl GrammarBuilder {
    pub fn new() -> GrammarBuilder {
        GrammarBuilder::default()
    }

    /// Reserve an id for a rule defined later; this is how recursive and
    /// mutually recursive grammars are expressed.
    pub fn reserve(&mut self) -> RuleId {
        self.rules.push(None);
        self.rules.len() - 1
    }

    fn push(&mut self, tag: &str, kind: RawKind) -> RuleId {
        let id = self.reserve();
        self.set(id, tag, kind);
        id
    }

    fn set(&mut self, id: RuleId, tag: &str, kind: RawKind) {
        let slot = &mut self.rules[id];
        assert!(slot.is_none(), "rule {id} is already defined");
        *slot = Some(RawRule {
            tag: tag.to_string(),
            kind,
        });
    }

    pub fn regex(&mut self, tag: &str, pattern: RegExp, group: usize, payload: Payload) -> RuleId {
        self.push(
            tag,
            RawKind::Regex {
                pattern,
                group,
                payload,
                instantiator: None,
            },
        )
    }

    pub fn regex_with(
        &mut self,
        tag: &str,
        pattern: RegExp,
        group: usize,
        instantiator: TerminalInstantiator,
    ) -> RuleId {
        self.push(
            tag,
            RawKind::Regex {
                pattern,
                group,
                payload: Payload::Text,
                instantiator: Some(instantiator),
            },
        )
    }

    pub fn concat(&mut self, tag: &str, subs: Vec<RuleId>, instantiator: Instantiator) -> RuleId {
        self.push(tag, RawKind::Concat { subs, instantiator })
    }

    pub fn alt(&mut self, tag: &str, subs: Vec<RuleId>) -> RuleId {
        self.push(tag, RawKind::Alt { subs })
    }

    pub fn repeat(&mut self, tag: &str, sub: RuleId, min: u32, max: Option<u32>) -> RuleId {
        self.push(tag, RawKind::Repeat { sub, min, max })
    }

    pub fn peek(&mut self, tag: &str, sub: RuleId) -> RuleId {
        self.push(tag, RawKind::Peek { sub })
    }

    pub fn neg(&mut self, tag: &str, sub: RuleId) -> RuleId {
        self.push(tag, RawKind::Neg { sub })
    }

    pub fn define_concat(
        &mut self,
        id: RuleId,
        tag: &str,
        subs: Vec<RuleId>,
        instantiator: Instantiator,
    ) {
        self.set(id, tag, RawKind::Concat { subs, instantiator });
    }

    pub fn define_alt(&mut self, id: RuleId, tag: &str, subs: Vec<RuleId>) {
        self.set(id, tag, RawKind::Alt { subs });
    }

    pub fn define_repeat(&mut self, id: RuleId, tag: &str, sub: RuleId, min: u32, max: Option<u32>) {
        self.set(id, tag, RawKind::Repeat { sub, min, max });
    }

    // Stock instantiators for the common sequence shapes

    /// Arity-1 renaming: pass the single sub-value through.
    pub fn first_value() -> Instantiator {
        std::sync::Arc::new(|mut values: Vec<Value>, _spans: &[Span]| {
            Ok(values.pop().unwrap_or(Value::None))
        })
    }

    /// Collect all sub-values into a list.
    pub fn values_list() -> Instantiator {
        std::sync::Arc::new(|values: Vec<Value>, _spans: &[Span]| Ok(Value::List(values)))
    }

    /// Drop the sub-values, produce no payload.
    pub fn discard() -> Instantiator {
        std::sync::Arc::new(|_values: Vec<Value>, _spans: &[Span]| Ok(Value::None))
    }

    /// Normalize and freeze the grammar rooted at `root`.
    pub fn build(self, root: RuleId) -> Result<Grammar, BuildError> {
        let rules = self.take_defined()?;
        validate(&rules, root)?;

        let resolved = resolve_aliases(&rules)?;
        let (order, new_ids) = renumber(&rules, resolved[root], &resolved);

        let dropped = rules.len() - order.len();
        if dropped > 0 {
            log::debug!("dropped {dropped} unreachable or aliased rules");
        }

        let map = |old: RuleId| -> RuleId {
            match new_ids[resolved[old]] {
                Some(new) => new,
                None => unreachable!("rule {old} escaped renumbering"),
            }
        };

        let mut out = Vec::with_capacity(order.len());
        for (new_id, &old_id) in order.iter().enumerate() {
            let raw = &rules[old_id];
            let kind = match &raw.kind {
                RawKind::Regex {
                    pattern,
                    group,
                    payload,
                    instantiator,
                } => compile_terminal(old_id, pattern, *group, *payload, instantiator.clone())?,
                RawKind::Concat { subs, instantiator } => RuleKind::Concat {
                    subs: subs.iter().map(|&s| map(s)).collect(),
                    instantiator: instantiator.clone(),
                },
                RawKind::Alt { subs } => RuleKind::Alt {
                    subs: subs.iter().map(|&s| map(s)).collect(),
                },
                RawKind::Repeat { sub, min, max } => RuleKind::Repeat {
                    sub: map(*sub),
                    min: *min,
                    max: *max,
                },
                RawKind::Peek { sub } => RuleKind::Peek { sub: map(*sub) },
                RawKind::Neg { sub } => RuleKind::Neg { sub: map(*sub) },
            };
            out.push(Rule {
                id: new_id,
                tag: raw.tag.clone(),
                kind,
            });
        }

        Ok(Grammar::from_parts(out, map(root)))
    }

    fn take_defined(self) -> Result<Vec<RawRule>, BuildError> {
        self.rules
            .into_iter()
            .enumerate()
            .map(|(id, slot)| slot.ok_or(BuildError::UndefinedRule(id)))
            .collect()
    }
}

fn validate(rules: &[RawRule], root: RuleId) -> Result<(), BuildError> {
    if root >= rules.len() {
        return Err(BuildError::UnknownReference(root, root));
    }
    for (id, rule) in rules.iter().enumerate() {
        let check = |sub: RuleId| -> Result<(), BuildError> {
            if sub >= rules.len() {
                Err(BuildError::UnknownReference(id, sub))
            } else {
                Ok(())
            }
        };
        match &rule.kind {
            RawKind::Regex { .. } => {}
            RawKind::Concat { subs, .. } => {
                for &sub in subs {
                    check(sub)?;
                }
            }
            RawKind::Alt { subs } => {
                if subs.is_empty() {
                    return Err(BuildError::EmptyAlternation(id));
                }
                for &sub in subs {
                    check(sub)?;
                }
            }
            RawKind::Repeat { sub, min, max } => {
                if let Some(max) = max {
                    if min > max {
                        return Err(BuildError::InvalidRepeatBounds {
                            id,
                            min: *min,
                            max: *max,
                        });
                    }
                }
                check(*sub)?;
            }
            RawKind::Peek { sub } | RawKind::Neg { sub } => check(*sub)?,
        }
    }
    Ok(())
}

/// An alternation with exactly one sub-rule carrying the alternation's own
/// tag is a redundant wrapper; resolve every reference through to the real
/// rule, transitively.
fn resolve_aliases(rules: &[RawRule]) -> Result<Vec<RuleId>, BuildError> {
    let alias: Vec<Option<RuleId>> = rules
        .iter()
        .map(|rule| match &rule.kind {
            RawKind::Alt { subs } if subs.len() == 1 && rules[subs[0]].tag == rule.tag => {
                Some(subs[0])
            }
            _ => None,
        })
        .collect();

    let mut resolved = Vec::with_capacity(rules.len());
    for start in 0..rules.len() {
        let mut id = start;
        let mut hops = 0;
        while let Some(next) = alias[id] {
            id = next;
            hops += 1;
            if hops > rules.len() {
                return Err(BuildError::AliasCycle(start));
            }
        }
        resolved.push(id);
    }
    Ok(resolved)
}

/// Breadth-first traversal from the root, assigning dense ids in visitation
/// order. References are mapped through the alias resolution first. This
/// changes nothing about matching; it only improves locality and makes dumps
/// readable top-down.
fn renumber(
    rules: &[RawRule],
    root: RuleId,
    resolved: &[RuleId],
) -> (Vec<RuleId>, Vec<Option<RuleId>>) {
    let mut order = Vec::new();
    let mut new_ids: Vec<Option<RuleId>> = vec![None; rules.len()];
    let mut queue = VecDeque::new();

    new_ids[root] = Some(0);
    order.push(root);
    queue.push_back(root);

    while let Some(id) = queue.pop_front() {
        let mut visit = |sub: RuleId, order: &mut Vec<RuleId>, queue: &mut VecDeque<RuleId>| {
            let target = resolved[sub];
            if new_ids[target].is_none() {
                new_ids[target] = Some(order.len());
                order.push(target);
                queue.push_back(target);
            }
        };
        match &rules[id].kind {
            RawKind::Regex { .. } => {}
            RawKind::Concat { subs, .. } | RawKind::Alt { subs } => {
                for &sub in subs {
                    visit(sub, &mut order, &mut queue);
                }
            }
            RawKind::Repeat { sub, .. } | RawKind::Peek { sub } | RawKind::Neg { sub } => {
                visit(*sub, &mut order, &mut queue);
            }
        }
    }

    (order, new_ids)
}

/// Simplify, render, and compile a terminal pattern, anchored as a prefix
/// match. The simplified tree is kept for dumps so they show what actually
/// runs.
fn compile_terminal(
    id: RuleId,
    pattern: &RegExp,
    group: usize,
    payload: Payload,
    instantiator: Option<TerminalInstantiator>,
) -> Result<RuleKind, BuildError> {
    let simplified = pattern.clone().simplify();
    let rendered = simplified.render();
    let compiled = regex::Regex::new(&format!("\\A(?:{rendered})")).map_err(|source| {
        BuildError::BadPattern {
            id,
            pattern: rendered.clone(),
            source: Box::new(source),
        }
    })?;

    // captures_len counts the implicit whole-match group 0
    if group >= compiled.captures_len() {
        return Err(BuildError::MissingGroup { id, group });
    }

    Ok(RuleKind::Regex {
        pattern: simplified,
        compiled,
        group,
        payload,
        instantiator,
    })
}

/// Convenience: raise a recoverable instantiator failure.
pub fn not_instantiable<T>(reason: impl Into<String>) -> Result<T, InstantiateError> {
    Err(InstantiateError::Recoverable(reason.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_terminal(builder: &mut GrammarBuilder, tag: &str, s: &str) -> RuleId {
        builder.regex(tag, RegExp::literal(s), 0, Payload::Text)
    }

    #[test]
    fn single_alt_with_same_tag_collapses() {
        let mut builder = GrammarBuilder::new();
        let num = text_terminal(&mut builder, "num", "1");
        let wrapper = builder.alt("num", vec![num]);
        let root = builder.concat(
            "expr",
            vec![wrapper, wrapper],
            GrammarBuilder::values_list(),
        );
        let grammar = builder.build(root).unwrap();

        assert_eq!(grammar.len(), 2);
        assert_eq!(
            grammar.dump(),
            "  0 expr: seq(1, 1)\n  1 num: regex: 1 group:0\n"
        );
    }

    #[test]
    fn alias_chains_resolve_transitively() {
        let mut builder = GrammarBuilder::new();
        let num = text_terminal(&mut builder, "num", "1");
        let inner = builder.alt("num", vec![num]);
        let outer = builder.alt("num", vec![inner]);
        let root = builder.concat("expr", vec![outer], GrammarBuilder::first_value());
        let grammar = builder.build(root).unwrap();

        assert_eq!(grammar.len(), 2);
        assert_eq!(
            grammar.dump(),
            "  0 expr: seq(1)\n  1 num: regex: 1 group:0\n"
        );
    }

    #[test]
    fn differently_tagged_wrapper_is_kept() {
        let mut builder = GrammarBuilder::new();
        let num = text_terminal(&mut builder, "num", "1");
        let wrapper = builder.alt("literal", vec![num]);
        let grammar = builder.build(wrapper).unwrap();

        assert_eq!(grammar.len(), 2);
        assert_eq!(
            grammar.dump(),
            "  0 literal: alt(1)\n  1 num: regex: 1 group:0\n"
        );
    }

    #[test]
    fn renumbering_is_breadth_first_from_root() {
        let mut builder = GrammarBuilder::new();
        // Define in scrambled order; dump must still read top-down
        let leaf_b = text_terminal(&mut builder, "b", "b");
        let leaf_a = text_terminal(&mut builder, "a", "a");
        let pair = builder.concat("pair", vec![leaf_a, leaf_b], GrammarBuilder::values_list());
        let root = builder.alt("root", vec![pair, leaf_b]);
        let grammar = builder.build(root).unwrap();

        assert_eq!(
            grammar.dump(),
            "  0 root: alt(1, 2)\n\
             \x20 1 pair: seq(3, 2)\n\
             \x20 2 b: regex: b group:0\n\
             \x20 3 a: regex: a group:0\n"
        );
    }

    #[test]
    fn unreachable_rules_are_dropped() {
        let mut builder = GrammarBuilder::new();
        let used = text_terminal(&mut builder, "used", "a");
        let _orphan = text_terminal(&mut builder, "orphan", "b");
        let grammar = builder.build(used).unwrap();

        assert_eq!(grammar.len(), 1);
        assert_eq!(grammar.rule(0).tag, "used");
    }

    #[test]
    fn recursive_grammar_builds_via_reserve() {
        // list = "(" list ")" | "x"
        let mut builder = GrammarBuilder::new();
        let list = builder.reserve();
        let open = text_terminal(&mut builder, "open", "(");
        let close = text_terminal(&mut builder, "close", ")");
        let x = text_terminal(&mut builder, "x", "x");
        let nested = builder.concat(
            "nested",
            vec![open, list, close],
            GrammarBuilder::values_list(),
        );
        builder.define_alt(list, "list", vec![nested, x]);
        let grammar = builder.build(list).unwrap();

        assert_eq!(grammar.len(), 5);
        assert_eq!(grammar.rule(0).tag, "list");
    }

    #[test]
    fn undefined_reservation_is_an_error() {
        let mut builder = GrammarBuilder::new();
        let hole = builder.reserve();
        let root = builder.alt("root", vec![hole]);
        assert!(matches!(
            builder.build(root),
            Err(BuildError::UndefinedRule(_))
        ));
    }

    #[test]
    fn empty_alternation_is_an_error() {
        let mut builder = GrammarBuilder::new();
        let root = builder.alt("root", vec![]);
        assert!(matches!(
            builder.build(root),
            Err(BuildError::EmptyAlternation(_))
        ));
    }

    #[test]
    fn inverted_repeat_bounds_are_an_error() {
        let mut builder = GrammarBuilder::new();
        let t = text_terminal(&mut builder, "t", "a");
        let root = builder.repeat("root", t, 3, Some(2));
        assert!(matches!(
            builder.build(root),
            Err(BuildError::InvalidRepeatBounds { min: 3, max: 2, .. })
        ));
    }

    #[test]
    fn alias_cycle_is_an_error() {
        let mut builder = GrammarBuilder::new();
        let a = builder.reserve();
        let b = builder.alt("t", vec![a]);
        builder.define_alt(a, "t", vec![b]);
        assert!(matches!(builder.build(a), Err(BuildError::AliasCycle(_))));
    }

    #[test]
    fn missing_capture_group_is_an_error() {
        let mut builder = GrammarBuilder::new();
        let root = builder.regex("t", RegExp::literal("a"), 2, Payload::Text);
        assert!(matches!(
            builder.build(root),
            Err(BuildError::MissingGroup { group: 2, .. })
        ));
    }

    #[test]
    fn terminal_patterns_are_simplified_before_compiling() {
        let mut builder = GrammarBuilder::new();
        let root = builder.regex(
            "t",
            RegExp::alt(vec![
                RegExp::chr('a'),
                RegExp::chr('b'),
                RegExp::chr('c'),
            ]),
            0,
            Payload::Char,
        );
        let grammar = builder.build(root).unwrap();
        assert_eq!(grammar.dump(), "  0 t: regex: [abc] group:0\n");
    }
}
