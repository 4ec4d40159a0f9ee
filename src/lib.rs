//! A PEG rule engine with regex terminals.
//!
//! Grammars are assembled with a [`GrammarBuilder`]: regex terminals built
//! from the [`RegExp`] pattern model plus sequence, ordered-choice,
//! repetition, and lookahead combinators over them. [`GrammarBuilder::build`]
//! normalizes the rule graph into an immutable [`Grammar`], which matches
//! input by recursive descent with backtracking: ordered choice commits to
//! the first alternative that succeeds, repetition is greedy within its
//! bounds, and failures report the farthest position reached along with the
//! stack of rules that were being tried there.
//!
//! Each rule can carry an instantiator turning matched sub-values into a
//! host [`Value`]; instantiators can reject a match either recoverably
//! (backtrack and try the next alternative) or fatally (abort the whole
//! parse).

pub mod builder;
mod matcher;
pub mod pattern;
pub mod rules;
mod simplify;
pub mod types;

pub use builder::{not_instantiable, BuildError, GrammarBuilder};
pub use pattern::{BackRef, Flags, Greediness, RegExp};
pub use rules::{Grammar, Rule, RuleKind};
pub use types::{
    FailReason, InstantiateError, Instantiator, MatchError, Node, ParseResult, Payload, RuleId,
    Span, TerminalInstantiator, Value,
};
