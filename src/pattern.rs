//! The regex sub-language: an algebraic model of regular expressions plus a
//! renderer that emits canonical syntax for the wired regex engine.
//!
//! Terminal rules in a grammar are expressed as `RegExp` trees, simplified
//! (see `simplify`), rendered, and compiled once at grammar build time.

/// Matches no character at all: the negation of every Unicode scalar.
pub(crate) const MATCH_NOTHING: &str = "[^\\x00-\\x{10FFFF}]";

/// Matches every character, including newlines.
pub(crate) const MATCH_ANY: &str = "[\\x00-\\x{10FFFF}]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegExp {
    // Character-class building blocks; these can appear inside [...]
    Single(char),
    Range(char, char),
    // Zero children matches nothing
    Union(Vec<RegExp>),
    // Zero children matches every character
    Intersection(Vec<RegExp>),
    Negation(Box<RegExp>),
    // Raw engine syntax that is a single atom (e.g. \d, \w, .)
    Predefined(String),

    // Composite expressions
    Alternation(Vec<RegExp>),
    // Zero children matches the empty string
    Concatenation(Vec<RegExp>),
    Quantified(Box<RegExp>, u32, Option<u32>, Greediness),
    // Zero-width assertion in raw engine syntax (e.g. ^, $, \b)
    Boundary(String),
    Lookaround {
        inner: Box<RegExp>,
        ahead: bool,
        positive: bool,
    },
    BackReference(BackRef),
    Group(Box<RegExp>, Option<String>),
    AtomicGroup(Box<RegExp>),
    Flagged {
        inner: Box<RegExp>,
        on: Flags,
        off: Flags,
    },
    // A raw fragment we can't (or don't want to) model; precedence unknown
    Opaque(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greediness {
    Greedy,
    Reluctant,
    Possessive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackRef {
    Number(u32),
    Name(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub case_insensitive: bool,
    pub multiline: bool,
    pub dot_matches_newline: bool,
}

impl Flags {
    pub fn is_empty(&self) -> bool {
        !(self.case_insensitive || self.multiline || self.dot_matches_newline)
    }

    fn letters(&self) -> String {
        let mut s = String::new();
        if self.case_insensitive {
            s.push('i');
        }
        if self.multiline {
            s.push('m');
        }
        if self.dot_matches_newline {
            s.push('s');
        }
        s
    }
}

/// Expression-level operator precedence, weakest first.
/// A child is parenthesized iff its precedence is below the context's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Alternation,
    Concatenation,
    Quantified,
    Atom,
}

/// Class-level precedence inside [...], weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ClassPrec {
    Intersection,
    Union,
    Atom,
}

// Constructors for the primitive building blocks
impl RegExp {
    pub fn chr(c: char) -> RegExp {
        RegExp::Single(c)
    }

    /// A concatenation matching exactly the given string.
    pub fn literal(s: &str) -> RegExp {
        RegExp::Concatenation(s.chars().map(RegExp::Single).collect())
    }

    pub fn range(from: char, to: char) -> RegExp {
        debug_assert!(from <= to, "invalid range {from:?}-{to:?}");
        RegExp::Range(from, to)
    }

    /// A union matching any single character of the given string.
    pub fn any_of(s: &str) -> RegExp {
        RegExp::Union(s.chars().map(RegExp::Single).collect())
    }

    pub fn digit() -> RegExp {
        RegExp::Predefined("\\d".to_string())
    }

    pub fn word() -> RegExp {
        RegExp::Predefined("\\w".to_string())
    }

    pub fn whitespace() -> RegExp {
        RegExp::Predefined("\\s".to_string())
    }

    pub fn dot() -> RegExp {
        RegExp::Predefined(".".to_string())
    }

    pub fn group(inner: RegExp) -> RegExp {
        RegExp::Group(Box::new(inner), None)
    }

    pub fn named_group(name: &str, inner: RegExp) -> RegExp {
        debug_assert!(valid_group_name(name), "invalid group name {name:?}");
        RegExp::Group(Box::new(inner), Some(name.to_string()))
    }

    pub fn seq(parts: Vec<RegExp>) -> RegExp {
        RegExp::Concatenation(parts)
    }

    pub fn alt(choices: Vec<RegExp>) -> RegExp {
        RegExp::Alternation(choices)
    }

    pub fn star(self) -> RegExp {
        RegExp::Quantified(Box::new(self), 0, None, Greediness::Greedy)
    }

    pub fn plus(self) -> RegExp {
        RegExp::Quantified(Box::new(self), 1, None, Greediness::Greedy)
    }

    pub fn opt(self) -> RegExp {
        RegExp::Quantified(Box::new(self), 0, Some(1), Greediness::Greedy)
    }

    pub fn between(self, min: u32, max: u32) -> RegExp {
        debug_assert!(min <= max, "invalid repeat bounds {min}..{max}");
        RegExp::Quantified(Box::new(self), min, Some(max), Greediness::Greedy)
    }
}

/// Group names must be non-empty, alphanumeric, and start with a letter.
pub(crate) fn valid_group_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => chars.all(|c| c.is_ascii_alphanumeric()),
        _ => false,
    }
}

impl RegExp {
    /// True if this node can be rendered as part of a character class body.
    pub(crate) fn is_class_atom(&self) -> bool {
        match self {
            RegExp::Single(_) | RegExp::Range(_, _) => true,
            RegExp::Union(_) | RegExp::Intersection(_) | RegExp::Negation(_) => true,
            // Only backslash escapes are class-safe; a bare `.` is a literal dot inside [...]
            RegExp::Predefined(raw) => raw.starts_with('\\'),
            _ => false,
        }
    }

    fn prec(&self) -> Prec {
        match self {
            RegExp::Alternation(_) | RegExp::Opaque(_) => Prec::Alternation,
            RegExp::Concatenation(_) => Prec::Concatenation,
            RegExp::Quantified(_, _, _, _) => Prec::Quantified,
            _ => Prec::Atom,
        }
    }

    /// Render to the wired engine's syntax with minimal parenthesization.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, Prec::Alternation);
        out
    }

    fn write(&self, out: &mut String, min: Prec) {
        let wrap = self.prec() < min;
        if wrap {
            out.push_str("(?:");
        }
        self.write_bare(out);
        if wrap {
            out.push(')');
        }
    }

    fn write_bare(&self, out: &mut String) {
        match self {
            RegExp::Single(c) => escape_outside(*c, out),
            RegExp::Range(_, _)
            | RegExp::Union(_)
            | RegExp::Intersection(_)
            | RegExp::Negation(_) => self.write_bracketed(out),
            RegExp::Predefined(raw) => out.push_str(raw),

            RegExp::Alternation(choices) => {
                if choices.is_empty() {
                    out.push_str(MATCH_NOTHING);
                    return;
                }
                for (i, choice) in choices.iter().enumerate() {
                    if i > 0 {
                        out.push('|');
                    }
                    choice.write(out, Prec::Concatenation);
                }
            }
            RegExp::Concatenation(parts) => {
                for part in parts {
                    part.write(out, Prec::Concatenation);
                }
            }
            RegExp::Quantified(inner, min, max, greediness) => {
                inner.write(out, Prec::Atom);
                match (min, max) {
                    (0, None) => out.push('*'),
                    (1, None) => out.push('+'),
                    (0, Some(1)) => out.push('?'),
                    (n, Some(m)) if n == m => out.push_str(&format!("{{{n}}}")),
                    (n, None) => out.push_str(&format!("{{{n},}}")),
                    (n, Some(m)) => out.push_str(&format!("{{{n},{m}}}")),
                }
                match greediness {
                    Greediness::Greedy => {}
                    Greediness::Reluctant => out.push('?'),
                    Greediness::Possessive => out.push('+'),
                }
            }
            RegExp::Boundary(raw) => out.push_str(raw),
            RegExp::Lookaround {
                inner,
                ahead,
                positive,
            } => {
                out.push_str(match (ahead, positive) {
                    (true, true) => "(?=",
                    (true, false) => "(?!",
                    (false, true) => "(?<=",
                    (false, false) => "(?<!",
                });
                inner.write(out, Prec::Alternation);
                out.push(')');
            }
            RegExp::BackReference(BackRef::Number(n)) => out.push_str(&format!("\\{n}")),
            RegExp::BackReference(BackRef::Name(name)) => {
                out.push_str(&format!("\\k<{name}>"));
            }
            RegExp::Group(inner, name) => {
                match name {
                    Some(name) => out.push_str(&format!("(?<{name}>")),
                    None => out.push('('),
                }
                inner.write(out, Prec::Alternation);
                out.push(')');
            }
            RegExp::AtomicGroup(inner) => {
                out.push_str("(?>");
                inner.write(out, Prec::Alternation);
                out.push(')');
            }
            RegExp::Flagged { inner, on, off } => {
                out.push_str("(?");
                out.push_str(&on.letters());
                if !off.is_empty() {
                    out.push('-');
                    out.push_str(&off.letters());
                }
                out.push(':');
                inner.write(out, Prec::Alternation);
                out.push(')');
            }
            RegExp::Opaque(raw) => out.push_str(raw),
        }
    }

    /// Render a class-like node as a self-contained [...] atom.
    fn write_bracketed(&self, out: &mut String) {
        match self {
            RegExp::Union(children) if children.is_empty() => out.push_str(MATCH_NOTHING),
            RegExp::Intersection(children) if children.is_empty() => out.push_str(MATCH_ANY),
            RegExp::Negation(inner) => {
                out.push_str("[^");
                inner.write_class(out, ClassPrec::Union);
                out.push(']');
            }
            _ => {
                out.push('[');
                self.write_class(out, ClassPrec::Intersection);
                out.push(']');
            }
        }
    }

    /// Render as character-class body syntax. Children below `min` precedence
    /// are wrapped in a nested class.
    fn write_class(&self, out: &mut String, min: ClassPrec) {
        let prec = match self {
            RegExp::Intersection(_) => ClassPrec::Intersection,
            RegExp::Union(_) => ClassPrec::Union,
            _ => ClassPrec::Atom,
        };

        if prec < min || matches!(self, RegExp::Negation(_)) {
            self.write_bracketed(out);
            return;
        }

        match self {
            RegExp::Single(c) => escape_inside(*c, out),
            RegExp::Range(from, to) => {
                escape_inside(*from, out);
                out.push('-');
                escape_inside(*to, out);
            }
            RegExp::Union(children) => {
                if children.is_empty() {
                    out.push_str(MATCH_NOTHING);
                    return;
                }
                for child in children {
                    child.write_class(out, ClassPrec::Atom);
                }
            }
            RegExp::Intersection(children) => {
                if children.is_empty() {
                    out.push_str(MATCH_ANY);
                    return;
                }
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        out.push_str("&&");
                    }
                    child.write_class(out, ClassPrec::Union);
                }
            }
            RegExp::Predefined(raw) => out.push_str(raw),
            // Every other variant is not a class atom; the builder and the
            // simplifier only ever put class atoms inside classes
            other => unreachable!("{other:?} is not a class atom"),
        }
    }
}

/// Escape a literal character outside of a character class.
fn escape_outside(c: char, out: &mut String) {
    if matches!(
        c,
        '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
    ) {
        out.push('\\');
    }
    out.push(c);
}

/// Escape a literal character inside a character class.
/// `[` is special too since the engine supports nested classes.
fn escape_inside(c: char, out: &mut String) {
    if matches!(c, '\\' | '[' | ']' | '^' | '-' | '&') {
        out.push('\\');
    }
    out.push(c);
}

impl RegExp {
    /// The 1-based ordinal of `target` among this tree's capturing groups,
    /// counted by depth-first traversal. `target` is identified by node
    /// identity, not structural equality, so structurally equal groups are
    /// told apart. Opaque fragments are compiled to learn how many groups
    /// they embed.
    pub fn group_index(&self, target: &RegExp) -> Option<u32> {
        let mut count = 0;
        if self.walk_groups(target, &mut count) {
            Some(count)
        } else {
            None
        }
    }

    /// The total number of capturing groups in this tree.
    pub fn group_count(&self) -> u32 {
        let mut count = 0;
        // A fresh local node can never be found in `self`
        let missing = RegExp::Concatenation(vec![]);
        self.walk_groups(&missing, &mut count);
        count
    }

    fn walk_groups(&self, target: &RegExp, count: &mut u32) -> bool {
        match self {
            RegExp::Group(inner, _) => {
                *count += 1;
                if std::ptr::eq(self as *const RegExp, target as *const RegExp) {
                    return true;
                }
                inner.walk_groups(target, count)
            }
            RegExp::Union(children)
            | RegExp::Intersection(children)
            | RegExp::Alternation(children)
            | RegExp::Concatenation(children) => children
                .iter()
                .any(|child| child.walk_groups(target, count)),
            RegExp::Negation(inner)
            | RegExp::Quantified(inner, _, _, _)
            | RegExp::Lookaround { inner, .. }
            | RegExp::AtomicGroup(inner)
            | RegExp::Flagged { inner, .. } => inner.walk_groups(target, count),
            RegExp::Opaque(raw) => {
                *count += embedded_group_count(raw);
                false
            }
            RegExp::Single(_)
            | RegExp::Range(_, _)
            | RegExp::Predefined(_)
            | RegExp::Boundary(_)
            | RegExp::BackReference(_) => false,
        }
    }
}

/// Compile an opaque fragment to count its capturing groups.
fn embedded_group_count(raw: &str) -> u32 {
    match regex::Regex::new(raw) {
        // captures_len includes the implicit group 0
        Ok(re) => re.captures_len() as u32 - 1,
        Err(err) => {
            log::warn!("opaque fragment {raw:?} does not compile: {err}");
            0
        }
    }
}
