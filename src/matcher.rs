//! The PEG matching engine: a purely sequential recursive-descent evaluator
//! over an immutable `Grammar`.
//!
//! Every rule application yields success (value, end position, and the
//! farthest recoverable sub-failure seen so far), a recoverable failure, or a
//! fatal signal that unwinds the whole match through `?` with no recovery
//! anywhere in the call stack.
//!
//! Recursion depth mirrors the grammar's nesting, so deeply self-recursive
//! grammars on adversarial input can exhaust the call stack; callers needing
//! bounded-depth parsing must impose it externally.

use crate::rules::{Grammar, Rule, RuleKind};
use crate::types::{
    FailReason, InstantiateError, MatchError, Node, ParseResult, Payload, RuleId, Span, Value,
};

/// One entry of the in-flight rule path; turned into `Node`s only when a
/// failure actually needs a diagnostic snapshot.
struct Frame {
    rule: RuleId,
    start: usize,
    sub_index: Option<usize>,
}

struct Success {
    value: Value,
    end: usize,
    /// Farthest recoverable sub-failure seen while producing this success,
    /// carried upward for diagnostics of partial backtracking
    max_fail: Option<Failure>,
}

#[derive(Debug, Clone)]
struct Failure {
    position: usize,
    reason: FailReason,
    stack: Vec<Node>,
}

#[derive(Debug, Clone)]
struct FatalSignal {
    position: usize,
    cause: String,
    stack: Vec<Node>,
}

/// Outer `Err` is the fatal unwind; inner `Err` is an ordinary recoverable
/// parse failure subject to ordered-choice backtracking.
type RuleOutcome = Result<Result<Success, Failure>, FatalSignal>;

/// Keep the farthest failure; on a position tie the first-encountered one
/// wins, so later alternatives failing at the same position do not override
/// earlier reported causes.
fn merge(current: Option<Failure>, new: Failure) -> Failure {
    match current {
        Some(current) if current.position >= new.position => current,
        _ => new,
    }
}

fn merge_opt(current: Option<Failure>, new: Option<Failure>) -> Option<Failure> {
    match new {
        Some(new) => Some(merge(current, new)),
        None => current,
    }
}

struct Matcher<'a> {
    grammar: &'a Grammar,
    text: &'a str,
    /// Exclusive end of the region being matched
    end: usize,
}

impl Matcher<'_> {
    fn apply(
        &self,
        id: RuleId,
        pos: usize,
        path: &mut Vec<Frame>,
        sub_index: Option<usize>,
    ) -> RuleOutcome {
        let rule = self.grammar.rule(id);
        log::trace!("apply {} at {pos}", rule.tag);

        path.push(Frame {
            rule: id,
            start: pos,
            sub_index,
        });
        let outcome = match &rule.kind {
            RuleKind::Regex {
                compiled,
                group,
                payload,
                instantiator,
                ..
            } => self.apply_regex(rule, compiled, *group, *payload, instantiator, pos, path),
            RuleKind::Concat { subs, instantiator } => {
                self.apply_concat(subs, instantiator, pos, path)
            }
            RuleKind::Alt { subs } => self.apply_alt(subs, pos, path),
            RuleKind::Repeat { sub, min, max } => self.apply_repeat(*sub, *min, *max, pos, path),
            RuleKind::Peek { sub } => self.apply_peek(*sub, pos, path),
            RuleKind::Neg { sub } => self.apply_neg(*sub, pos, path),
        };
        path.pop();
        outcome
    }

    /// Anchored prefix match at `pos` within the region; never a free search.
    /// The rule consumes the whole match while the value comes from the
    /// significant group's span only.
    #[allow(clippy::too_many_arguments)]
    fn apply_regex(
        &self,
        rule: &Rule,
        compiled: &regex::Regex,
        group: usize,
        payload: Payload,
        instantiator: &Option<crate::types::TerminalInstantiator>,
        pos: usize,
        path: &[Frame],
    ) -> RuleOutcome {
        let region = &self.text[pos..self.end];
        let Some(caps) = compiled.captures(region) else {
            return Ok(Err(self.fail(pos, FailReason::RegexNoMatch, path)));
        };
        // Group 0 always participates in a match
        let consumed = pos + caps.get(0).map_or(0, |m| m.end());

        let Some(significant) = caps.get(group) else {
            return Ok(Err(self.fail(pos, FailReason::RegexGroupAbsent(group), path)));
        };
        let span = significant.as_str();

        let value = match instantiator {
            Some(instantiate) => match instantiate(span) {
                Ok(value) => value,
                Err(InstantiateError::Recoverable(reason)) => {
                    return Ok(Err(self.fail(
                        pos,
                        FailReason::NotInstantiable(reason),
                        path,
                    )));
                }
                Err(InstantiateError::Fatal(cause)) => {
                    return Err(self.fatal(pos, cause, path));
                }
            },
            None => match payload {
                Payload::None => Value::None,
                Payload::Text => Value::Text(span.to_string()),
                Payload::Char => {
                    let mut chars = span.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Value::Char(c),
                        // The rule promised exactly one character; this is a
                        // broken grammar, not a parse failure
                        _ => {
                            return Err(self.fatal(
                                pos,
                                format!(
                                    "terminal {} promised a single character but captured {span:?}",
                                    rule.tag
                                ),
                                path,
                            ));
                        }
                    }
                }
            },
        };

        Ok(Ok(Success {
            value,
            end: consumed,
            max_fail: None,
        }))
    }

    /// Ordered choice: first success wins, carrying the running farthest
    /// failure across every alternative tried, the winner's own included.
    fn apply_alt(&self, subs: &[RuleId], pos: usize, path: &mut Vec<Frame>) -> RuleOutcome {
        let mut max_fail = None;
        for (index, &sub) in subs.iter().enumerate() {
            match self.apply(sub, pos, path, Some(index))? {
                Ok(mut success) => {
                    success.max_fail = merge_opt(max_fail, success.max_fail);
                    return Ok(Ok(success));
                }
                Err(failure) => max_fail = Some(merge(max_fail, failure)),
            }
        }
        match max_fail {
            Some(failure) => Ok(Err(failure)),
            // The builder rejects empty alternations
            None => unreachable!("alternation with no alternatives"),
        }
    }

    fn apply_concat(
        &self,
        subs: &[RuleId],
        instantiator: &crate::types::Instantiator,
        pos: usize,
        path: &mut Vec<Frame>,
    ) -> RuleOutcome {
        let mut cursor = pos;
        let mut max_fail = None;
        let mut values = Vec::with_capacity(subs.len());
        let mut spans = Vec::with_capacity(subs.len());

        for (index, &sub) in subs.iter().enumerate() {
            match self.apply(sub, cursor, path, Some(index))? {
                Ok(success) => {
                    max_fail = merge_opt(max_fail, success.max_fail);
                    spans.push(Span::new(cursor, success.end));
                    values.push(success.value);
                    cursor = success.end;
                }
                Err(failure) => return Ok(Err(merge(max_fail, failure))),
            }
        }

        match instantiator(values, &spans) {
            Ok(value) => Ok(Ok(Success {
                value,
                end: cursor,
                max_fail,
            })),
            // The values don't form a valid production: the sequence fails at
            // its own start, without consuming
            Err(InstantiateError::Recoverable(reason)) => {
                let own = self.fail(pos, FailReason::NotInstantiable(reason), path);
                Ok(Err(merge(max_fail, own)))
            }
            Err(InstantiateError::Fatal(cause)) => Err(self.fatal(pos, cause, path)),
        }
    }

    /// Greedy bounded repetition: `min` matches are required, further matches
    /// are taken as long as they consume input, up to `max`.
    fn apply_repeat(
        &self,
        sub: RuleId,
        min: u32,
        max: Option<u32>,
        pos: usize,
        path: &mut Vec<Frame>,
    ) -> RuleOutcome {
        let mut cursor = pos;
        let mut max_fail = None;
        let mut values = Vec::new();

        while (values.len() as u32) < min {
            match self.apply(sub, cursor, path, Some(values.len()))? {
                Ok(success) => {
                    max_fail = merge_opt(max_fail, success.max_fail);
                    values.push(success.value);
                    cursor = success.end;
                }
                Err(failure) => return Ok(Err(merge(max_fail, failure))),
            }
        }

        while max.map_or(true, |max| (values.len() as u32) < max) {
            match self.apply(sub, cursor, path, Some(values.len()))? {
                Ok(success) => {
                    max_fail = merge_opt(max_fail, success.max_fail);
                    let advanced = success.end > cursor;
                    values.push(success.value);
                    cursor = success.end;
                    if !advanced {
                        // A zero-width match would repeat forever
                        break;
                    }
                }
                Err(failure) => {
                    // The minimum is met; keep the failure for diagnostics
                    // and stop repeating
                    max_fail = Some(merge(max_fail, failure));
                    break;
                }
            }
        }

        Ok(Ok(Success {
            value: Value::List(values),
            end: cursor,
            max_fail,
        }))
    }

    /// Zero-width positive lookahead: succeed at the original position with
    /// the sub-value, discarding the sub-rule's failure history.
    fn apply_peek(&self, sub: RuleId, pos: usize, path: &mut Vec<Frame>) -> RuleOutcome {
        match self.apply(sub, pos, path, None)? {
            Ok(success) => Ok(Ok(Success {
                value: success.value,
                end: pos,
                max_fail: None,
            })),
            Err(failure) => Ok(Err(failure)),
        }
    }

    /// Zero-width logical negation; sub-diagnostics are meaningless to the
    /// caller and are discarded in both branches.
    fn apply_neg(&self, sub: RuleId, pos: usize, path: &mut Vec<Frame>) -> RuleOutcome {
        match self.apply(sub, pos, path, None)? {
            Ok(_) => Ok(Err(self.fail(pos, FailReason::NegMatched, path))),
            Err(_) => Ok(Ok(Success {
                value: Value::None,
                end: pos,
                max_fail: None,
            })),
        }
    }

    /// Snapshot the current path, innermost rule first.
    fn snapshot(&self, path: &[Frame]) -> Vec<Node> {
        path.iter()
            .rev()
            .map(|frame| Node {
                tag: self.grammar.rule(frame.rule).tag.clone(),
                start: frame.start,
                sub_index: frame.sub_index,
            })
            .collect()
    }

    fn fail(&self, position: usize, reason: FailReason, path: &[Frame]) -> Failure {
        log::debug!("fail at {position}: {reason}");
        Failure {
            position,
            reason,
            stack: self.snapshot(path),
        }
    }

    fn fatal(&self, position: usize, cause: String, path: &[Frame]) -> FatalSignal {
        log::debug!("fatal at {position}: {cause}");
        FatalSignal {
            position,
            cause,
            stack: self.snapshot(path),
        }
    }
}

impl Grammar {
    /// Run the root rule against `text[start..end]`.
    ///
    /// `Full` if the root consumed the region exactly, `Partial` if it
    /// succeeded but stopped short, `Fail` for the farthest recoverable
    /// failure once every alternative is exhausted, `Fatal` if an invariant
    /// violation unwound the match.
    pub fn parse(&self, text: &str, start: usize, end: usize) -> ParseResult {
        debug_assert!(start <= end && end <= text.len());
        let matcher = Matcher {
            grammar: self,
            text,
            end,
        };
        let mut path = Vec::new();

        match matcher.apply(self.root(), start, &mut path, None) {
            Ok(Ok(success)) => {
                if success.end == end {
                    ParseResult::Full(success.value)
                } else {
                    ParseResult::Partial(success.value, success.end)
                }
            }
            Ok(Err(failure)) => ParseResult::Fail {
                position: failure.position,
                reason: failure.reason,
                stack: failure.stack,
            },
            Err(fatal) => ParseResult::Fatal {
                position: fatal.position,
                cause: fatal.cause,
                stack: fatal.stack,
            },
        }
    }

    /// Parse the whole text, raising anything but a `Full` result as an
    /// error embedding message, position, and diagnostic stack.
    pub fn match_full(&self, text: &str) -> Result<Value, MatchError> {
        match self.parse(text, 0, text.len()) {
            ParseResult::Full(value) => Ok(value),
            ParseResult::Partial(_, position) => Err(MatchError::Incomplete { position }),
            ParseResult::Fail {
                position,
                reason,
                stack,
            } => Err(MatchError::Fail {
                position,
                reason,
                stack,
            }),
            ParseResult::Fatal {
                position,
                cause,
                stack,
            } => Err(MatchError::Fatal {
                position,
                cause,
                stack,
            }),
        }
    }
}
