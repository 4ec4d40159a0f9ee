//! Simplification of `RegExp` trees.
//!
//! Simplification never changes the matched language (property-tested below)
//! and never changes the number or order of capturing groups. It exists to
//! keep rendered terminal patterns short and readable:
//!
//! - nested alternation/concatenation/union/intersection are flattened
//! - single-child wrappers of those four collapse to the child
//! - double negation collapses
//! - adjacent character-class atoms inside an alternation merge into a union
//! - nested greedy quantifiers fold: `X{a,b}{c,d}` becomes `X{ac,bd}`,
//!   falling back to the unfolded form on arithmetic overflow or when the
//!   composed repetition counts have gaps (`(a{2}){0,1}` matches zero or two
//!   `a`s, never one, so it must not become `a{0,2}`)

use crate::pattern::{Greediness, RegExp};

impl RegExp {
    pub fn simplify(self) -> RegExp {
        match self {
            RegExp::Union(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.simplify() {
                        RegExp::Union(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                unwrap_single(flat, RegExp::Union)
            }
            RegExp::Intersection(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.simplify() {
                        RegExp::Intersection(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                unwrap_single(flat, RegExp::Intersection)
            }
            RegExp::Negation(inner) => match inner.simplify() {
                RegExp::Negation(x) => *x,
                other => RegExp::Negation(Box::new(other)),
            },
            RegExp::Concatenation(parts) => {
                let mut flat = Vec::with_capacity(parts.len());
                for part in parts {
                    match part.simplify() {
                        RegExp::Concatenation(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                unwrap_single(flat, RegExp::Concatenation)
            }
            RegExp::Alternation(choices) => {
                let mut flat = Vec::with_capacity(choices.len());
                for choice in choices {
                    match choice.simplify() {
                        RegExp::Alternation(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                unwrap_single(merge_adjacent_classes(flat), RegExp::Alternation)
            }
            RegExp::Quantified(inner, min, max, greediness) => {
                fold_quantifier(inner.simplify(), min, max, greediness)
            }
            RegExp::Lookaround {
                inner,
                ahead,
                positive,
            } => RegExp::Lookaround {
                inner: Box::new(inner.simplify()),
                ahead,
                positive,
            },
            RegExp::Group(inner, name) => RegExp::Group(Box::new(inner.simplify()), name),
            RegExp::AtomicGroup(inner) => RegExp::AtomicGroup(Box::new(inner.simplify())),
            RegExp::Flagged { inner, on, off } => RegExp::Flagged {
                inner: Box::new(inner.simplify()),
                on,
                off,
            },
            leaf => leaf,
        }
    }
}

/// A single-child wrapper of a flattening node is just a rename of the child.
fn unwrap_single(mut children: Vec<RegExp>, rebuild: fn(Vec<RegExp>) -> RegExp) -> RegExp {
    if children.len() == 1 {
        children.pop().unwrap()
    } else {
        rebuild(children)
    }
}

/// Merge runs of two or more adjacent class atoms in an alternation into a
/// single union: `a|[0-9]|x` becomes `[a0-9x]`. Order within the run is kept
/// even though class membership is order-insensitive.
fn merge_adjacent_classes(choices: Vec<RegExp>) -> Vec<RegExp> {
    let mut merged = Vec::with_capacity(choices.len());
    let mut run: Vec<RegExp> = Vec::new();

    fn flush(run: &mut Vec<RegExp>, merged: &mut Vec<RegExp>) {
        match run.len() {
            0 => {}
            1 => merged.push(run.pop().unwrap()),
            _ => merged.push(RegExp::Union(std::mem::take(run))),
        }
    }

    for choice in choices {
        if choice.is_class_atom() {
            // A union run member splices straight in
            match choice {
                RegExp::Union(members) => run.extend(members),
                other => run.push(other),
            }
        } else {
            flush(&mut run, &mut merged);
            merged.push(choice);
        }
    }
    flush(&mut run, &mut merged);
    merged
}

/// Fold `X{a,b}{c,d}` into `X{ac,bd}` when both quantifiers are greedy and
/// the composed repetition counts form a contiguous range. Overflowing or
/// gapped bounds keep the unfolded form instead.
fn fold_quantifier(inner: RegExp, min: u32, max: Option<u32>, greediness: Greediness) -> RegExp {
    // X{1,1} is just X, whatever the greediness
    if min == 1 && max == Some(1) {
        return inner;
    }

    if greediness == Greediness::Greedy {
        if let RegExp::Quantified(x, imin, imax, Greediness::Greedy) = &inner {
            if fold_is_contiguous(*imin, *imax, min, max) {
                if let Some(folded) = fold_bounds(*imin, *imax, min, max) {
                    let (new_min, new_max) = folded;
                    return RegExp::Quantified(x.clone(), new_min, new_max, Greediness::Greedy);
                }
                log::debug!("quantifier fold overflowed, keeping nested form");
            }
        }
    }

    RegExp::Quantified(Box::new(inner), min, max, greediness)
}

/// The composed counts of `X{imin,imax}{omin,omax}` are the union over outer
/// counts `k` of `[k*imin, k*imax]`. Folding to `X{omin*imin, omax*imax}` is
/// only sound when consecutive intervals touch: `(k+1)*imin <= k*imax + 1`.
/// The gap margin shrinks as `k` grows, so checking `k = omin` covers every
/// larger count; an exact outer bound has a single interval and always folds.
fn fold_is_contiguous(imin: u32, imax: Option<u32>, omin: u32, omax: Option<u32>) -> bool {
    if omax == Some(omin) {
        return true;
    }
    let k = u64::from(omin);
    let next_min = (k + 1) * u64::from(imin);
    match imax {
        // Zero repetitions yield exactly the empty string
        _ if k == 0 => next_min <= 1,
        None => true,
        Some(imax) => next_min <= k * u64::from(imax) + 1,
    }
}

fn fold_bounds(
    imin: u32,
    imax: Option<u32>,
    omin: u32,
    omax: Option<u32>,
) -> Option<(u32, Option<u32>)> {
    let new_min = imin.checked_mul(omin)?;
    let new_max = match (imax, omax) {
        (Some(b), Some(d)) => Some(b.checked_mul(d)?),
        // Unbounded times a zero bound is still zero repetitions
        (Some(0), None) | (None, Some(0)) => Some(0),
        _ => None,
    };
    Some((new_min, new_max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    macro_rules! test_simplify {
        ($name:ident, $expr:expr, $expected:expr) => {
            #[test]
            fn $name() {
                assert_eq!($expr.simplify(), $expected);
            }
        };
    }

    test_simplify!(
        flatten_nested_alternation,
        RegExp::alt(vec![
            RegExp::alt(vec![RegExp::literal("ab"), RegExp::literal("cd")]),
            RegExp::literal("ef"),
        ]),
        RegExp::alt(vec![
            RegExp::literal("ab"),
            RegExp::literal("cd"),
            RegExp::literal("ef"),
        ])
    );

    test_simplify!(
        flatten_nested_concatenation,
        RegExp::seq(vec![
            RegExp::seq(vec![RegExp::chr('a'), RegExp::chr('b')]),
            RegExp::chr('c'),
        ]),
        RegExp::literal("abc")
    );

    test_simplify!(
        flatten_nested_union,
        RegExp::Union(vec![
            RegExp::Union(vec![RegExp::chr('a'), RegExp::chr('b')]),
            RegExp::range('0', '9'),
        ]),
        RegExp::Union(vec![
            RegExp::chr('a'),
            RegExp::chr('b'),
            RegExp::range('0', '9'),
        ])
    );

    test_simplify!(
        single_child_union_collapses,
        RegExp::Union(vec![RegExp::chr('a')]),
        RegExp::chr('a')
    );

    test_simplify!(
        single_child_alternation_collapses,
        RegExp::alt(vec![RegExp::literal("ab")]),
        RegExp::literal("ab")
    );

    test_simplify!(
        double_negation_collapses,
        RegExp::Negation(Box::new(RegExp::Negation(Box::new(RegExp::any_of("ab"))))),
        RegExp::any_of("ab")
    );

    test_simplify!(
        triple_negation_collapses_to_single,
        RegExp::Negation(Box::new(RegExp::Negation(Box::new(RegExp::Negation(
            Box::new(RegExp::chr('a'))
        ))))),
        RegExp::Negation(Box::new(RegExp::chr('a')))
    );

    test_simplify!(
        adjacent_classes_merge_into_union,
        RegExp::alt(vec![
            RegExp::chr('a'),
            RegExp::range('0', '9'),
            RegExp::literal("xy"),
        ]),
        RegExp::alt(vec![
            RegExp::Union(vec![RegExp::chr('a'), RegExp::range('0', '9')]),
            RegExp::literal("xy"),
        ])
    );

    test_simplify!(
        all_classes_merge_and_collapse,
        RegExp::alt(vec![RegExp::chr('a'), RegExp::chr('b'), RegExp::chr('c')]),
        RegExp::any_of("abc")
    );

    test_simplify!(
        lone_class_between_sequences_stays,
        RegExp::alt(vec![
            RegExp::literal("ab"),
            RegExp::chr('x'),
            RegExp::literal("cd"),
        ]),
        RegExp::alt(vec![
            RegExp::literal("ab"),
            RegExp::chr('x'),
            RegExp::literal("cd"),
        ])
    );

    test_simplify!(
        union_members_splice_into_run,
        RegExp::alt(vec![RegExp::any_of("ab"), RegExp::chr('c')]),
        RegExp::any_of("abc")
    );

    test_simplify!(
        quantifiers_fold,
        RegExp::chr('a').between(2, 3).between(4, 5),
        RegExp::chr('a').between(8, 15)
    );

    test_simplify!(
        quantifier_fold_unbounded,
        RegExp::chr('a').between(1, 2).plus(),
        RegExp::Quantified(Box::new(RegExp::chr('a')), 1, None, Greediness::Greedy)
    );

    test_simplify!(
        quantifier_exactly_once_unwraps,
        RegExp::chr('a').between(1, 1),
        RegExp::chr('a')
    );

    // (a{2})? matches zero or two as, never one; a{0,2} would also match one
    test_simplify!(
        gapped_fold_keeps_nested,
        RegExp::chr('a').between(2, 2).opt(),
        RegExp::Quantified(
            Box::new(RegExp::chr('a').between(2, 2)),
            0,
            Some(1),
            Greediness::Greedy
        )
    );

    // (a{2}){1,2} reaches counts {2, 4} but not 3
    test_simplify!(
        gapped_fold_above_zero_keeps_nested,
        RegExp::chr('a').between(2, 2).between(1, 2),
        RegExp::chr('a').between(2, 2).between(1, 2)
    );

    // (a{0,2}){2,3} covers every count 0..=6, so the fold is sound
    test_simplify!(
        contiguous_fold_with_zero_inner_min,
        RegExp::chr('a').between(0, 2).between(2, 3),
        RegExp::chr('a').between(0, 6)
    );

    // An exact outer count is a single interval, contiguous by definition
    test_simplify!(
        exact_outer_count_folds,
        RegExp::chr('a').between(2, 3).between(2, 2),
        RegExp::chr('a').between(4, 6)
    );

    test_simplify!(
        reluctant_quantifiers_do_not_fold,
        RegExp::Quantified(
            Box::new(RegExp::Quantified(
                Box::new(RegExp::chr('a')),
                1,
                Some(2),
                Greediness::Reluctant,
            )),
            2,
            Some(3),
            Greediness::Greedy,
        ),
        RegExp::Quantified(
            Box::new(RegExp::Quantified(
                Box::new(RegExp::chr('a')),
                1,
                Some(2),
                Greediness::Reluctant,
            )),
            2,
            Some(3),
            Greediness::Greedy,
        )
    );

    #[test]
    fn quantifier_fold_overflow_keeps_nested() {
        let nested = RegExp::chr('a')
            .between(u32::MAX, u32::MAX)
            .between(2, 2)
            .simplify();
        assert_eq!(
            nested,
            RegExp::chr('a').between(u32::MAX, u32::MAX).between(2, 2)
        );
    }

    #[test]
    fn simplify_preserves_group_count() {
        let re = RegExp::alt(vec![
            RegExp::group(RegExp::alt(vec![RegExp::seq(vec![RegExp::group(
                RegExp::chr('a'),
            )])])),
            RegExp::group(RegExp::chr('b')).star(),
        ]);
        let before = re.group_count();
        assert_eq!(re.simplify().group_count(), before);
    }

    // Random tree generation for the language-preservation property. Only
    // engine-supported, always-compilable constructs are generated.

    fn class_atom() -> impl Strategy<Value = RegExp> {
        prop_oneof![
            prop::char::range('a', 'f').prop_map(RegExp::Single),
            (prop::char::range('a', 'f'), prop::char::range('a', 'f')).prop_map(|(x, y)| {
                if x <= y {
                    RegExp::Range(x, y)
                } else {
                    RegExp::Range(y, x)
                }
            }),
        ]
    }

    fn class_expr() -> impl Strategy<Value = RegExp> {
        prop_oneof![
            3 => class_atom(),
            1 => prop::collection::vec(class_atom(), 1..4).prop_map(RegExp::Union),
            1 => class_atom().prop_map(|c| RegExp::Negation(Box::new(c))),
        ]
    }

    fn regexp_tree() -> impl Strategy<Value = RegExp> {
        class_expr().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..4).prop_map(RegExp::Alternation),
                prop::collection::vec(inner.clone(), 0..4).prop_map(RegExp::Concatenation),
                (inner, 0u32..3, 0u32..3, any::<bool>()).prop_map(|(x, min, extra, bounded)| {
                    let max = if bounded { Some(min + extra) } else { None };
                    RegExp::Quantified(Box::new(x), min, max, Greediness::Greedy)
                }),
            ]
        })
    }

    // Anchored at both ends so the oracle decides full-language membership;
    // a prefix-only match is vacuously true for any tree that matches the
    // empty string
    fn compile_anchored(re: &RegExp) -> regex::Regex {
        let rendered = format!("\\A(?:{})\\z", re.render());
        regex::Regex::new(&rendered)
            .unwrap_or_else(|err| panic!("{rendered:?} did not compile: {err}"))
    }

    proptest! {
        #[test]
        fn simplify_preserves_language(
            tree in regexp_tree(),
            inputs in prop::collection::vec("[a-g]{0,6}", 8),
        ) {
            let before = compile_anchored(&tree);
            let after = compile_anchored(&tree.clone().simplify());

            for input in &inputs {
                prop_assert_eq!(
                    before.is_match(input),
                    after.is_match(input),
                    "language changed on {:?}: {:?} vs {:?}",
                    input,
                    before.as_str(),
                    after.as_str()
                );
            }
        }
    }
}
