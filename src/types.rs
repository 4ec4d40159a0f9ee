//! Shared types: the dynamic values flowing through a match, the
//! instantiator contract, and the four-way parse result.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A rule id: a dense index into the grammar's rule table.
pub type RuleId = usize;

/// A half-open byte span within the matched text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }
}

/// The value produced by a rule. Hosts that need richer values wrap them in
/// `Custom`; everything the engine itself produces uses the other variants.
#[derive(Clone)]
pub enum Value {
    /// No payload (negative lookahead, payload-less terminals)
    None,
    /// A single character; a `char` is a Unicode scalar, so this also covers
    /// single-code-point terminals
    Char(char),
    /// A raw substring
    Text(String),
    /// The ordered aggregate of a repetition
    List(Vec<Value>),
    /// An opaque host value; compared by identity
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn custom<T: Any + Send + Sync>(value: T) -> Value {
        Value::Custom(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Custom(inner) => inner.downcast_ref(),
            _ => None,
        }
    }

    pub fn as_char(&self) -> Option<char> {
        match self {
            Value::Char(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Char(c) => write!(f, "Char({c:?})"),
            Value::Text(s) => write!(f, "Text({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Custom(a), Value::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// How a terminal without a bound instantiator maps its captured span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// Discard the span, produce `Value::None`
    None,
    /// The span must be exactly one character; anything else is a fatal
    /// contract breach, not a parse failure
    Char,
    /// The raw captured substring
    Text,
}

/// The two-case failure signal an instantiator may raise. The engine
/// dispatches purely on this tag: `Recoverable` backtracks like any other
/// parse failure, `Fatal` unwinds the whole match with no recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstantiateError {
    #[error("values do not form a valid production: {0}")]
    Recoverable(String),
    #[error("instantiator invariant violated: {0}")]
    Fatal(String),
}

/// Builds a rule's value from the ordered sub-values and their spans.
/// Must be idempotent for identical inputs.
pub type Instantiator =
    Arc<dyn Fn(Vec<Value>, &[Span]) -> Result<Value, InstantiateError> + Send + Sync>;

/// Builds a terminal's value from its significant captured span.
pub type TerminalInstantiator =
    Arc<dyn Fn(&str) -> Result<Value, InstantiateError> + Send + Sync>;

/// Why a rule's match attempt did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    /// The terminal's regex did not match at the current position
    RegexNoMatch,
    /// The terminal matched but its significant group did not participate
    RegexGroupAbsent(usize),
    /// An instantiator rejected the matched values as a production
    NotInstantiable(String),
    /// A negative lookahead's sub-rule matched
    NegMatched,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::RegexNoMatch => write!(f, "expected token not found"),
            FailReason::RegexGroupAbsent(group) => {
                write!(f, "token matched but group {group} was absent")
            }
            FailReason::NotInstantiable(reason) => {
                write!(f, "values do not form a valid production: {reason}")
            }
            FailReason::NegMatched => write!(f, "negated rule matched"),
        }
    }
}

/// One entry of the diagnostic stack: the tag of an entered rule, the
/// position it was entered at, and its index among its siblings for
/// alternation/sequence/repetition children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub tag: String,
    pub start: usize,
    pub sub_index: Option<usize>,
}

/// Render a diagnostic stack, innermost rule first.
pub fn render_stack(stack: &[Node]) -> String {
    let mut out = String::new();
    for node in stack {
        out.push_str("  in ");
        out.push_str(&node.tag);
        out.push_str(&format!(" (at {}", node.start));
        if let Some(index) = node.sub_index {
            out.push_str(&format!(", sub {index}"));
        }
        out.push_str(")\n");
    }
    out
}

/// The outcome of a parse.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    /// The root rule consumed the region exactly
    Full(Value),
    /// The root rule succeeded but stopped short of the region's end
    Partial(Value, usize),
    /// The farthest recoverable failure; no alternative was left to try
    Fail {
        position: usize,
        reason: FailReason,
        stack: Vec<Node>,
    },
    /// An invariant violation unwound the match; no alternative was retried
    Fatal {
        position: usize,
        cause: String,
        stack: Vec<Node>,
    },
}

/// What `match_full` raises for anything but a `Full` result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("parse failed at {position}: {reason}")]
    Fail {
        position: usize,
        reason: FailReason,
        stack: Vec<Node>,
    },
    #[error("parse aborted at {position}: {cause}")]
    Fatal {
        position: usize,
        cause: String,
        stack: Vec<Node>,
    },
    #[error("input only partially matched, stopped at {position}")]
    Incomplete { position: usize },
}

impl MatchError {
    /// The full human-readable report: message plus the diagnostic stack.
    pub fn describe(&self) -> String {
        match self {
            MatchError::Fail { stack, .. } | MatchError::Fatal { stack, .. } => {
                format!("{self}\n{}", render_stack(stack))
            }
            MatchError::Incomplete { .. } => self.to_string(),
        }
    }
}
