use std::io::BufRead;
use std::sync::Arc;

use clap::Parser;

use jp_peg::{
    not_instantiable, BuildError, Grammar, GrammarBuilder, InstantiateError, Instantiator, Payload,
    RegExp, Span, Value,
};

/// Evaluate integer arithmetic expressions, one per line
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Print the compiled rule graph instead of evaluating
    #[arg(long)]
    dump: bool,
}

/// Wrap a token pattern in whitespace skipping; the token itself is group 1.
fn token(inner: RegExp) -> RegExp {
    RegExp::seq(vec![
        RegExp::whitespace().star(),
        RegExp::group(inner),
        RegExp::whitespace().star(),
    ])
}

fn as_i64(value: &Value) -> Result<i64, InstantiateError> {
    value
        .downcast_ref::<i64>()
        .copied()
        .ok_or_else(|| InstantiateError::Fatal("operand is not a number".to_string()))
}

/// Left-fold `operand (op operand)*`: values are the first operand plus a
/// list of [operator char, operand] pairs.
fn chain_eval() -> Instantiator {
    Arc::new(|values: Vec<Value>, _spans: &[Span]| {
        let mut acc = as_i64(&values[0])?;
        for step in values[1].as_list().into_iter().flatten() {
            let pair = step
                .as_list()
                .ok_or_else(|| InstantiateError::Fatal("malformed operator step".to_string()))?;
            let op = pair[0]
                .as_char()
                .ok_or_else(|| InstantiateError::Fatal("operator is not a char".to_string()))?;
            let rhs = as_i64(&pair[1])?;
            let result = match op {
                '+' => acc.checked_add(rhs),
                '-' => acc.checked_sub(rhs),
                '*' => acc.checked_mul(rhs),
                '/' if rhs != 0 => acc.checked_div(rhs),
                '/' => return not_instantiable("division by zero"),
                _ => return Err(InstantiateError::Fatal(format!("unknown operator {op:?}"))),
            };
            acc = match result {
                Some(n) => n,
                None => return not_instantiable("arithmetic overflow"),
            };
        }
        Ok(Value::custom(acc))
    })
}

/// expr = term (add_op term)*
/// term = factor (mul_op factor)*
/// factor = number | "(" expr ")"
fn arithmetic() -> Result<Grammar, BuildError> {
    let mut builder = GrammarBuilder::new();

    let expr = builder.reserve();

    let number = builder.regex_with(
        "number",
        token(RegExp::digit().plus()),
        1,
        Arc::new(|span: &str| match span.parse::<i64>() {
            Ok(n) => Ok(Value::custom(n)),
            Err(err) => not_instantiable(format!("integer literal {span:?}: {err}")),
        }),
    );
    let open = builder.regex("open", token(RegExp::chr('(')), 0, Payload::None);
    let close = builder.regex("close", token(RegExp::chr(')')), 0, Payload::None);
    let add_op = builder.regex("add_op", token(RegExp::any_of("+-")), 1, Payload::Char);
    let mul_op = builder.regex("mul_op", token(RegExp::any_of("*/")), 1, Payload::Char);

    let parens = builder.concat(
        "parens",
        vec![open, expr, close],
        Arc::new(|mut values: Vec<Value>, _spans: &[Span]| Ok(values.swap_remove(1))),
    );
    let factor = builder.alt("factor", vec![number, parens]);

    let mul_step = builder.concat("mul_step", vec![mul_op, factor], GrammarBuilder::values_list());
    let mul_steps = builder.repeat("mul_steps", mul_step, 0, None);
    let term = builder.concat("term", vec![factor, mul_steps], chain_eval());

    let add_step = builder.concat("add_step", vec![add_op, term], GrammarBuilder::values_list());
    let add_steps = builder.repeat("add_steps", add_step, 0, None);
    builder.define_concat(expr, "expr", vec![term, add_steps], chain_eval());

    builder.build(expr)
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    let grammar = match arithmetic() {
        Ok(grammar) => grammar,
        Err(err) => {
            eprintln!("broken grammar: {err}");
            std::process::exit(2);
        }
    };

    if args.dump {
        print!("{}", grammar.dump());
        return;
    }

    let stdin = std::io::stdin();
    let mut errors = 0;

    for line in stdin.lock().lines() {
        let line = line.unwrap();
        if line.trim().is_empty() {
            continue;
        }

        match grammar.match_full(&line) {
            Ok(value) => match value.downcast_ref::<i64>() {
                Some(n) => println!("{n}"),
                None => {
                    errors += 1;
                    eprintln!("expression produced a non-numeric value: {value:?}");
                }
            },
            Err(err) => {
                errors += 1;
                eprintln!("{}", err.describe());
            }
        }
    }

    std::process::exit(if errors == 0 { 0 } else { 1 });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(input: &str) -> Result<i64, String> {
        let grammar = arithmetic().unwrap();
        match grammar.match_full(input) {
            Ok(value) => Ok(*value.downcast_ref::<i64>().unwrap()),
            Err(err) => Err(err.to_string()),
        }
    }

    macro_rules! test_eval {
        ($name:ident, $input:expr, $expected:expr) => {
            #[test]
            fn $name() {
                assert_eq!(eval($input), Ok($expected));
            }
        };
    }

    test_eval!(single_number, "42", 42);
    test_eval!(addition, "1 + 2", 3);
    test_eval!(subtraction_is_left_associative, "10 - 3 - 2", 5);
    test_eval!(precedence, "2 + 3 * 4", 14);
    test_eval!(parens_override_precedence, "(2 + 3) * 4", 20);
    test_eval!(nested_parens, "((1 + 2) * (3 + 4))", 21);
    test_eval!(leading_and_trailing_whitespace, "  7 * 8  ", 56);
    test_eval!(division_truncates, "7 / 2", 3);

    #[test]
    fn division_by_zero_is_a_parse_error() {
        assert!(eval("1 / 0").is_err());
    }

    #[test]
    fn unbalanced_parens_fail() {
        assert!(eval("(1 + 2").is_err());
    }

    #[test]
    fn trailing_garbage_fails() {
        assert!(eval("1 + 2 @").is_err());
    }
}
