// Built-in function library
//
// Registered onto the root environment at compile time; host registrations
// with the same name shadow these. Functions receive evaluated arguments,
// the current input, and the environment, plus the evaluator handle so the
// higher-order functions can invoke their callable arguments.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::datetime;
use crate::environment::Environment;
use crate::error::Error;
use crate::evaluator::{self, is_truthy, merge_sort_by, Evaluator};
use crate::tokenizer::translate_regex;
use crate::value::{JValue, NativeFunction};

/// Register the standard library into an environment.
pub fn register_builtins(env: &Rc<Environment>) {
    // ── String ───────────────────────────────────────────────────────────────
    register(env, "string", |_, args, _, _| {
        fn_string(arg(args, 0), is_truthy(arg(args, 1)))
    });
    register(env, "length", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::String(s) => Ok(JValue::from(s.chars().count())),
        _ => Err(arg_error("length", 1)),
    });
    register(env, "substring", |_, args, _, _| {
        let s = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::String(s) => s.to_string(),
            _ => return Err(arg_error("substring", 1)),
        };
        let start = match arg(args, 1).as_f64() {
            Some(n) => n,
            None => return Err(arg_error("substring", 2)),
        };
        let length = match arg(args, 2) {
            JValue::Undefined => None,
            v => match v.as_f64() {
                Some(n) => Some(n),
                None => return Err(arg_error("substring", 3)),
            },
        };
        Ok(JValue::string(fn_substring(&s, start, length)))
    });
    register(env, "substringBefore", |_, args, _, _| {
        substring_around(args, "substringBefore", true)
    });
    register(env, "substringAfter", |_, args, _, _| {
        substring_around(args, "substringAfter", false)
    });
    register(env, "uppercase", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::String(s) => Ok(JValue::string(s.to_uppercase())),
        _ => Err(arg_error("uppercase", 1)),
    });
    register(env, "lowercase", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::String(s) => Ok(JValue::string(s.to_lowercase())),
        _ => Err(arg_error("lowercase", 1)),
    });
    register(env, "trim", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::String(s) => {
            // collapse runs of whitespace, then trim the ends
            let collapsed: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
            Ok(JValue::string(collapsed))
        }
        _ => Err(arg_error("trim", 1)),
    });
    register(env, "pad", |_, args, _, _| {
        let s = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::String(s) => s.to_string(),
            _ => return Err(arg_error("pad", 1)),
        };
        let width = match arg(args, 1).as_i64() {
            Some(w) => w,
            None => return Err(arg_error("pad", 2)),
        };
        let pad_char = match arg(args, 2) {
            JValue::Undefined => ' ',
            v => v.as_str().and_then(|c| c.chars().next()).unwrap_or(' '),
        };
        Ok(JValue::string(fn_pad(&s, width, pad_char)))
    });
    register(env, "contains", |_, args, _, _| {
        let s = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::String(s) => s.to_string(),
            _ => return Err(arg_error("contains", 1)),
        };
        match arg(args, 1) {
            JValue::String(pattern) => Ok(JValue::Bool(s.contains(&**pattern))),
            regex @ JValue::Regex { .. } => {
                Ok(JValue::Bool(compile_regex(regex)?.is_match(&s)))
            }
            _ => Err(arg_error("contains", 2)),
        }
    });
    register(env, "split", |_, args, _, _| {
        let s = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::String(s) => s.to_string(),
            _ => return Err(arg_error("split", 1)),
        };
        let limit = match arg(args, 2) {
            JValue::Undefined => usize::MAX,
            v => match v.as_f64() {
                Some(n) if n >= 0.0 => n as usize,
                _ => return Err(arg_error("split", 3)),
            },
        };
        let parts: Vec<String> = match arg(args, 1) {
            JValue::String(sep) if sep.is_empty() => {
                s.chars().map(|c| c.to_string()).collect()
            }
            JValue::String(sep) => s.split(&**sep).map(|p| p.to_string()).collect(),
            regex @ JValue::Regex { .. } => compile_regex(regex)?
                .split(&s)
                .map(|p| p.to_string())
                .collect(),
            _ => return Err(arg_error("split", 2)),
        };
        Ok(JValue::array(
            parts
                .into_iter()
                .take(limit)
                .map(JValue::from)
                .collect(),
        ))
    });
    register(env, "join", |_, args, _, _| {
        let items = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::Array(items, _) => items.iter().cloned().collect(),
            s @ JValue::String(_) => vec![s.clone()],
            _ => return Err(arg_error("join", 1)),
        };
        let sep = match arg(args, 1) {
            JValue::Undefined => String::new(),
            JValue::String(s) => s.to_string(),
            _ => return Err(arg_error("join", 2)),
        };
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            match item.as_str() {
                Some(s) => parts.push(s.to_string()),
                None => return Err(arg_error("join", 1)),
            }
        }
        Ok(JValue::string(parts.join(&sep)))
    });
    register(env, "match", |_, args, _, _| {
        let s = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::String(s) => s.to_string(),
            _ => return Err(arg_error("match", 1)),
        };
        let regex = compile_regex(arg(args, 1))?;
        let limit = match arg(args, 2) {
            JValue::Undefined => usize::MAX,
            v => match v.as_f64() {
                Some(n) if n >= 0.0 => n as usize,
                _ => return Err(arg_error("match", 3)),
            },
        };
        let mut out = Vec::new();
        for captures in regex.captures_iter(&s).take(limit) {
            let whole = captures.get(0).expect("group 0 always present");
            let groups: Vec<JValue> = captures
                .iter()
                .skip(1)
                .map(|g| match g {
                    Some(g) => JValue::string(g.as_str()),
                    None => JValue::Undefined,
                })
                .collect();
            let mut m = IndexMap::new();
            m.insert("match".to_string(), JValue::string(whole.as_str()));
            m.insert(
                "index".to_string(),
                JValue::from(s[..whole.start()].chars().count()),
            );
            m.insert("groups".to_string(), JValue::array(groups));
            out.push(JValue::object(m));
        }
        Ok(JValue::sequence(out))
    });
    register(env, "replace", |evaluator, args, input, env| {
        fn_replace(evaluator, args, input, env)
    });

    // ── Numeric ──────────────────────────────────────────────────────────────
    register(env, "number", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::Number(n) => Ok(JValue::Number(*n)),
        JValue::Bool(b) => Ok(JValue::Number(if *b { 1.0 } else { 0.0 })),
        JValue::String(s) => match s.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(JValue::Number(n)),
            _ => Err(Error::CastToNumberFailed {
                value: s.to_string(),
            }),
        },
        other => Err(Error::CastToNumberFailed {
            value: other.to_string(),
        }),
    });
    register(env, "abs", |_, args, _, _| {
        numeric_unary(args, "abs", f64::abs)
    });
    register(env, "floor", |_, args, _, _| {
        numeric_unary(args, "floor", f64::floor)
    });
    register(env, "ceil", |_, args, _, _| {
        numeric_unary(args, "ceil", f64::ceil)
    });
    register(env, "round", |_, args, _, _| {
        let n = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::Number(n) => *n,
            _ => return Err(arg_error("round", 1)),
        };
        let precision = match arg(args, 1) {
            JValue::Undefined => 0,
            v => match v.as_i64() {
                Some(p) => p,
                None => return Err(arg_error("round", 2)),
            },
        };
        Ok(JValue::Number(fn_round(n, precision)))
    });
    register(env, "power", |_, args, _, _| {
        let base = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::Number(n) => *n,
            _ => return Err(arg_error("power", 1)),
        };
        let exponent = match arg(args, 1) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::Number(n) => *n,
            _ => return Err(arg_error("power", 2)),
        };
        let result = base.powf(exponent);
        if !result.is_finite() {
            return Err(Error::PowerOverflow { base, exponent });
        }
        Ok(JValue::Number(result))
    });
    register(env, "sqrt", |_, args, _, _| {
        let n = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::Number(n) => *n,
            _ => return Err(arg_error("sqrt", 1)),
        };
        if n < 0.0 {
            return Err(Error::SqrtOfNegative { value: n });
        }
        Ok(JValue::Number(n.sqrt()))
    });
    register(env, "random", |evaluator, _, _, _| {
        Ok(JValue::Number(evaluator.next_random()))
    });

    // ── Aggregation ──────────────────────────────────────────────────────────
    register(env, "sum", |_, args, _, _| {
        aggregate(args, "sum", |nums| nums.iter().sum())
    });
    register(env, "max", |_, args, _, _| {
        aggregate(args, "max", |nums| {
            nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
        })
    });
    register(env, "min", |_, args, _, _| {
        aggregate(args, "min", |nums| {
            nums.iter().cloned().fold(f64::INFINITY, f64::min)
        })
    });
    register(env, "average", |_, args, _, _| {
        aggregate(args, "average", |nums| {
            nums.iter().sum::<f64>() / nums.len() as f64
        })
    });
    register(env, "count", |_, args, _, _| {
        Ok(match arg(args, 0) {
            JValue::Undefined => JValue::from(0i64),
            JValue::Array(items, _) => JValue::from(items.len()),
            _ => JValue::from(1i64),
        })
    });

    // ── Boolean ──────────────────────────────────────────────────────────────
    register(env, "boolean", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        v => Ok(JValue::Bool(is_truthy(v))),
    });
    register(env, "not", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        v => Ok(JValue::Bool(!is_truthy(v))),
    });
    register(env, "exists", |_, args, _, _| {
        Ok(JValue::Bool(!arg(args, 0).is_undefined()))
    });

    // ── Arrays ───────────────────────────────────────────────────────────────
    register(env, "append", |_, args, _, _| {
        let first = arg(args, 0);
        let second = arg(args, 1);
        if first.is_undefined() {
            return Ok(second.clone());
        }
        if second.is_undefined() {
            return Ok(first.clone());
        }
        let mut out = to_items(first);
        out.extend(to_items(second));
        Ok(JValue::array(out))
    });
    register(env, "reverse", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::Array(items, _) => {
            Ok(JValue::array(items.iter().rev().cloned().collect()))
        }
        v => Ok(JValue::array(vec![v.clone()])),
    });
    register(env, "distinct", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::Array(items, _) => {
            let mut out: Vec<JValue> = Vec::new();
            for item in items.iter() {
                if !out.iter().any(|seen| seen == item) {
                    out.push(item.clone());
                }
            }
            Ok(JValue::array(out))
        }
        v => Ok(v.clone()),
    });
    register(env, "zip", |_, args, _, _| {
        let columns: Vec<Vec<JValue>> = args.iter().map(to_items).collect();
        if columns.is_empty() {
            return Ok(JValue::array(Vec::new()));
        }
        let rows = columns.iter().map(|c| c.len()).min().unwrap_or(0);
        let mut out = Vec::with_capacity(rows);
        for i in 0..rows {
            out.push(JValue::array(
                columns.iter().map(|c| c[i].clone()).collect(),
            ));
        }
        Ok(JValue::array(out))
    });
    register(env, "sort", |evaluator, args, input, env| {
        let items = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::Array(items, _) => items.iter().cloned().collect::<Vec<_>>(),
            v => return Ok(v.clone()),
        };
        match arg(args, 1) {
            JValue::Undefined => {
                let sorted = merge_sort_by(items, &mut |a: &JValue, b: &JValue| {
                    default_sort_after(a, b)
                })?;
                Ok(JValue::array(sorted))
            }
            comparator if comparator.is_function() => {
                let comparator = comparator.clone();
                let input = input.clone();
                let env = Rc::clone(env);
                let sorted = merge_sort_by(items, &mut |a: &JValue, b: &JValue| {
                    let decision = evaluator.apply_function(
                        &comparator,
                        &[a.clone(), b.clone()],
                        &input,
                        &env,
                    )?;
                    Ok(is_truthy(&decision))
                })?;
                Ok(JValue::array(sorted))
            }
            _ => Err(arg_error("sort", 2)),
        }
    });

    // ── Objects ──────────────────────────────────────────────────────────────
    register(env, "keys", |_, args, _, _| Ok(fn_keys(arg(args, 0))));
    register(env, "values", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::Object(map) => Ok(JValue::array(map.values().cloned().collect())),
        _ => Err(arg_error("values", 1)),
    });
    register(env, "lookup", |_, args, _, _| {
        let key = match arg(args, 1).as_str() {
            Some(k) => k.to_string(),
            None => return Err(arg_error("lookup", 2)),
        };
        Ok(fn_lookup(arg(args, 0), &key))
    });
    register(env, "spread", |_, args, _, _| fn_spread(arg(args, 0)));
    register(env, "merge", |_, args, _, _| {
        let sources = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::Array(items, _) => items.iter().cloned().collect::<Vec<_>>(),
            v => vec![v.clone()],
        };
        let mut out: IndexMap<String, JValue> = IndexMap::new();
        for source in sources {
            match source.as_object() {
                Some(map) => {
                    for (k, v) in map.iter() {
                        out.insert(k.clone(), v.clone());
                    }
                }
                None => return Err(arg_error("merge", 1)),
            }
        }
        Ok(JValue::object(out))
    });
    register(env, "each", |evaluator, args, input, env| {
        let map = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::Object(map) => Rc::clone(map),
            _ => return Err(arg_error("each", 1)),
        };
        let function = arg(args, 1);
        if !function.is_function() {
            return Err(arg_error("each", 2));
        }
        let mut out = Vec::with_capacity(map.len());
        for (k, v) in map.iter() {
            let call_args =
                callable_args(function, &[v.clone(), JValue::string(k.as_str())]);
            let result = evaluator.apply_function(function, &call_args, input, env)?;
            if !result.is_undefined() {
                out.push(result);
            }
        }
        Ok(JValue::sequence(out))
    });
    register(env, "sift", |evaluator, args, input, env| {
        let map = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            JValue::Object(map) => Rc::clone(map),
            _ => return Err(arg_error("sift", 1)),
        };
        let function = arg(args, 1);
        if !function.is_function() {
            return Err(arg_error("sift", 2));
        }
        let whole = arg(args, 0).clone();
        let mut out: IndexMap<String, JValue> = IndexMap::new();
        for (k, v) in map.iter() {
            let call_args = callable_args(
                function,
                &[v.clone(), JValue::string(k.as_str()), whole.clone()],
            );
            let keep = evaluator.apply_function(function, &call_args, input, env)?;
            if is_truthy(&keep) {
                out.insert(k.clone(), v.clone());
            }
        }
        Ok(JValue::object(out))
    });
    register(env, "type", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        v => Ok(JValue::string(evaluator::type_name(v))),
    });
    register(env, "error", |_, args, _, _| {
        let message = arg(args, 0)
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "$error() function evaluated".to_string());
        Err(Error::UserError { message })
    });
    register(env, "assert", |_, args, _, _| {
        if is_truthy(arg(args, 0)) {
            Ok(JValue::Undefined)
        } else {
            let message = arg(args, 1)
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "$assert() statement failed".to_string());
            Err(Error::AssertFailed { message })
        }
    });

    // ── Higher-order ─────────────────────────────────────────────────────────
    register(env, "map", |evaluator, args, input, env| {
        let items = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            v => to_items(v),
        };
        let function = arg(args, 1);
        if !function.is_function() {
            return Err(arg_error("map", 2));
        }
        let whole = JValue::array(items.clone());
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let call_args =
                callable_args(function, &[item, JValue::from(i), whole.clone()]);
            let result = evaluator.apply_function(function, &call_args, input, env)?;
            if !result.is_undefined() {
                out.push(result);
            }
        }
        Ok(JValue::sequence(out))
    });
    register(env, "filter", |evaluator, args, input, env| {
        let items = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            v => to_items(v),
        };
        let function = arg(args, 1);
        if !function.is_function() {
            return Err(arg_error("filter", 2));
        }
        let whole = JValue::array(items.clone());
        let mut out = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let call_args = callable_args(
                function,
                &[item.clone(), JValue::from(i), whole.clone()],
            );
            let keep = evaluator.apply_function(function, &call_args, input, env)?;
            if is_truthy(&keep) {
                out.push(item);
            }
        }
        Ok(JValue::sequence(out))
    });
    register(env, "reduce", |evaluator, args, input, env| {
        let items = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            v => to_items(v),
        };
        let function = arg(args, 1);
        if !function.is_function() {
            return Err(arg_error("reduce", 2));
        }
        // The folding function must be able to accept the accumulator and
        // the current item
        if let JValue::Lambda(closure) = function {
            if closure.params.len() < 2 {
                return Err(Error::ReduceArityTooSmall);
            }
        }
        let mut iter = items.into_iter().enumerate();
        let mut accumulator = match arg(args, 2) {
            JValue::Undefined => match iter.next() {
                Some((_, first)) => first,
                None => return Ok(JValue::Undefined),
            },
            init => init.clone(),
        };
        for (i, item) in iter {
            let call_args =
                callable_args(function, &[accumulator, item, JValue::from(i)]);
            accumulator = evaluator.apply_function(function, &call_args, input, env)?;
        }
        Ok(accumulator)
    });
    register(env, "single", |evaluator, args, input, env| {
        let items = match arg(args, 0) {
            JValue::Undefined => return Ok(JValue::Undefined),
            v => to_items(v),
        };
        let function = arg(args, 1);
        let whole = JValue::array(items.clone());
        let mut found: Option<JValue> = None;
        for (i, item) in items.into_iter().enumerate() {
            let matched = match function {
                JValue::Undefined => true,
                f if f.is_function() => {
                    let call_args =
                        callable_args(f, &[item.clone(), JValue::from(i), whole.clone()]);
                    is_truthy(&evaluator.apply_function(f, &call_args, input, env)?)
                }
                _ => return Err(arg_error("single", 2)),
            };
            if matched {
                if found.is_some() {
                    return Err(Error::SingleNoMatch);
                }
                found = Some(item);
            }
        }
        found.ok_or(Error::SingleNoMatch)
    });

    // ── Date/time ────────────────────────────────────────────────────────────
    register(env, "now", |evaluator, _, _, _| {
        Ok(JValue::string(datetime::format_iso8601(
            &evaluator.timestamp(),
        )))
    });
    register(env, "millis", |evaluator, _, _, _| {
        Ok(JValue::from(evaluator.timestamp().timestamp_millis()))
    });
    register(env, "fromMillis", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::Number(n) => Ok(JValue::string(datetime::millis_to_iso8601(*n as i64)?)),
        _ => Err(arg_error("fromMillis", 1)),
    });
    register(env, "toMillis", |_, args, _, _| match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::String(s) => Ok(JValue::from(datetime::iso8601_to_millis(s)?)),
        _ => Err(arg_error("toMillis", 1)),
    });
}

// ── Registration plumbing ────────────────────────────────────────────────────

fn register(
    env: &Rc<Environment>,
    name: &str,
    implementation: impl Fn(&mut Evaluator, &[JValue], &JValue, &Rc<Environment>) -> Result<JValue, Error>
        + 'static,
) {
    env.register(NativeFunction::new(name, implementation));
}

fn arg<'a>(args: &'a [JValue], index: usize) -> &'a JValue {
    args.get(index).unwrap_or(&JValue::Undefined)
}

fn arg_error(name: &str, index: usize) -> Error {
    Error::ArgumentMismatch {
        name: format!("${}", name),
        index,
    }
}

/// Wrap a non-array value as a single item list; arrays yield their items.
fn to_items(value: &JValue) -> Vec<JValue> {
    match value {
        JValue::Undefined => Vec::new(),
        JValue::Array(items, _) => items.iter().cloned().collect(),
        v => vec![v.clone()],
    }
}

/// Trim the (item, index, whole) convention down to what a lambda declares.
fn callable_args(function: &JValue, full: &[JValue]) -> Vec<JValue> {
    match function {
        JValue::Lambda(closure) => full
            .iter()
            .take(closure.params.len())
            .cloned()
            .collect(),
        _ => full.to_vec(),
    }
}

// ── String helpers ───────────────────────────────────────────────────────────

fn fn_string(value: &JValue, pretty: bool) -> Result<JValue, Error> {
    match value {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::String(_) => Ok(value.clone()),
        JValue::Number(n) if !n.is_finite() => Err(Error::StringOfNonFinite),
        JValue::Lambda(_) | JValue::NativeFn(_) | JValue::Partial(_) => {
            Ok(JValue::string(""))
        }
        other => {
            let rendered = if pretty {
                other.to_json_string_pretty()
            } else {
                other.to_json_string()
            };
            Ok(JValue::string(rendered.unwrap_or_default()))
        }
    }
}

fn fn_substring(s: &str, start: f64, length: Option<f64>) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as f64;
    let mut begin = if start < 0.0 { len + start } else { start };
    if begin < 0.0 {
        begin = 0.0;
    }
    let begin = begin as usize;
    match length {
        Some(l) if l <= 0.0 => String::new(),
        Some(l) => chars.iter().skip(begin).take(l as usize).collect(),
        None => chars.iter().skip(begin).collect(),
    }
}

fn substring_around(args: &[JValue], name: &str, before: bool) -> Result<JValue, Error> {
    let s = match arg(args, 0) {
        JValue::Undefined => return Ok(JValue::Undefined),
        JValue::String(s) => s.to_string(),
        _ => return Err(arg_error(name, 1)),
    };
    let sep = match arg(args, 1).as_str() {
        Some(sep) => sep.to_string(),
        None => return Err(arg_error(name, 2)),
    };
    Ok(JValue::string(match s.find(&sep) {
        Some(pos) => {
            if before {
                s[..pos].to_string()
            } else {
                s[pos + sep.len()..].to_string()
            }
        }
        // no match: the whole string before, the empty string after
        None => {
            if before {
                s
            } else {
                String::new()
            }
        }
    }))
}

fn fn_pad(s: &str, width: i64, pad_char: char) -> String {
    let current = s.chars().count() as i64;
    let target = width.abs();
    if current >= target {
        return s.to_string();
    }
    let padding: String = std::iter::repeat(pad_char)
        .take((target - current) as usize)
        .collect();
    if width < 0 {
        format!("{}{}", padding, s)
    } else {
        format!("{}{}", s, padding)
    }
}

fn fn_replace(
    evaluator: &mut Evaluator,
    args: &[JValue],
    input: &JValue,
    env: &Rc<Environment>,
) -> Result<JValue, Error> {
    let s = match arg(args, 0) {
        JValue::Undefined => return Ok(JValue::Undefined),
        JValue::String(s) => s.to_string(),
        _ => return Err(arg_error("replace", 1)),
    };
    let limit = match arg(args, 3) {
        JValue::Undefined => usize::MAX,
        v => match v.as_f64() {
            Some(n) if n >= 0.0 => n as usize,
            _ => return Err(arg_error("replace", 4)),
        },
    };

    match (arg(args, 1), arg(args, 2)) {
        (JValue::String(pattern), JValue::String(replacement)) => {
            if pattern.is_empty() {
                return Err(Error::EmptyReplacePattern);
            }
            Ok(JValue::string(replace_literal(
                &s,
                pattern,
                replacement,
                limit,
            )))
        }
        (regex @ JValue::Regex { .. }, JValue::String(replacement)) => {
            let regex = compile_regex(regex)?;
            let replacement = replacement.to_string();
            Ok(JValue::string(
                regex.replacen(&s, limit, replacement.as_str()).to_string(),
            ))
        }
        (regex @ JValue::Regex { .. }, replacer) if replacer.is_function() => {
            let regex = compile_regex(regex)?;
            let mut out = String::new();
            let mut last = 0usize;
            for (count, captures) in regex.captures_iter(&s).enumerate() {
                if count >= limit {
                    break;
                }
                let whole = captures.get(0).expect("group 0 always present");
                out.push_str(&s[last..whole.start()]);

                let groups: Vec<JValue> = captures
                    .iter()
                    .skip(1)
                    .map(|g| match g {
                        Some(g) => JValue::string(g.as_str()),
                        None => JValue::Undefined,
                    })
                    .collect();
                let mut m = IndexMap::new();
                m.insert("match".to_string(), JValue::string(whole.as_str()));
                m.insert(
                    "index".to_string(),
                    JValue::from(s[..whole.start()].chars().count()),
                );
                m.insert("groups".to_string(), JValue::array(groups));

                let call_args = callable_args(replacer, &[JValue::object(m)]);
                let replaced =
                    evaluator.apply_function(replacer, &call_args, input, env)?;
                match replaced.as_str() {
                    Some(r) => out.push_str(r),
                    None => return Err(arg_error("replace", 3)),
                }
                last = whole.end();
            }
            out.push_str(&s[last..]);
            Ok(JValue::string(out))
        }
        _ => Err(arg_error("replace", 2)),
    }
}

fn replace_literal(s: &str, pattern: &str, replacement: &str, limit: usize) -> String {
    let mut out = String::new();
    let mut rest = s;
    let mut count = 0;
    while count < limit {
        match rest.find(pattern) {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                out.push_str(replacement);
                rest = &rest[pos + pattern.len()..];
                count += 1;
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

fn compile_regex(value: &JValue) -> Result<regex::Regex, Error> {
    match value {
        JValue::Regex { pattern, flags } => regex::Regex::new(&translate_regex(pattern, flags))
            .map_err(|e| Error::InvalidRegex {
                position: 0,
                message: e.to_string(),
            }),
        _ => Err(Error::ArgumentMismatch {
            name: "$match".to_string(),
            index: 2,
        }),
    }
}

// ── Numeric helpers ──────────────────────────────────────────────────────────

fn numeric_unary(
    args: &[JValue],
    name: &str,
    f: impl Fn(f64) -> f64,
) -> Result<JValue, Error> {
    match arg(args, 0) {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::Number(n) => Ok(JValue::Number(f(*n))),
        _ => Err(arg_error(name, 1)),
    }
}

/// Banker's rounding at the given decimal precision.
fn fn_round(n: f64, precision: i64) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let scaled = n * factor;
    let floor = scaled.floor();
    let diff = scaled - floor;
    let rounded = if (diff - 0.5).abs() < f64::EPSILON {
        // halfway: round to the even neighbour
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / factor
}

/// Flatten nested arrays the way the aggregators consume them.
fn flatten_for_aggregation(items: &[JValue], out: &mut Vec<JValue>) {
    for item in items {
        match item {
            JValue::Array(inner, _) => flatten_for_aggregation(inner, out),
            other => out.push(other.clone()),
        }
    }
}

fn aggregate(
    args: &[JValue],
    name: &str,
    f: impl Fn(&[f64]) -> f64,
) -> Result<JValue, Error> {
    let items = match arg(args, 0) {
        JValue::Undefined => return Ok(JValue::Undefined),
        JValue::Array(items, _) => {
            let mut flat = Vec::with_capacity(items.len());
            flatten_for_aggregation(items, &mut flat);
            flat
        }
        v => vec![v.clone()],
    };
    if items.is_empty() {
        return Ok(JValue::Undefined);
    }
    let mut nums = Vec::with_capacity(items.len());
    for item in &items {
        match item.as_f64() {
            Some(n) => nums.push(n),
            None => return Err(arg_error(name, 1)),
        }
    }
    let result = f(&nums);
    if !result.is_finite() {
        return Err(Error::NumericOverflow);
    }
    Ok(JValue::Number(result))
}

// ── Array/object helpers ─────────────────────────────────────────────────────

/// `true` when `a` must sort after `b` under the default ordering.
fn default_sort_after(a: &JValue, b: &JValue) -> Result<bool, Error> {
    match (a, b) {
        (JValue::Number(x), JValue::Number(y)) => Ok(x > y),
        (JValue::String(x), JValue::String(y)) => Ok(x > y),
        (JValue::Number(_), JValue::String(_)) | (JValue::String(_), JValue::Number(_)) => {
            Err(Error::SortKeyTypeMismatch {
                left: evaluator::type_name(a).to_string(),
                right: evaluator::type_name(b).to_string(),
            })
        }
        _ => {
            let bad = if a.is_number() || a.is_string() { b } else { a };
            Err(Error::SortKeyNotComparable {
                value: bad.to_string(),
            })
        }
    }
}

fn fn_keys(value: &JValue) -> JValue {
    match value {
        JValue::Object(map) => JValue::sequence(
            map.keys().map(|k| JValue::string(k.as_str())).collect(),
        ),
        JValue::Array(items, _) => {
            // the union of keys across an array of objects, first-seen order
            let mut seen: Vec<String> = Vec::new();
            for item in items.iter() {
                if let Some(map) = item.as_object() {
                    for k in map.keys() {
                        if !seen.iter().any(|s| s == k) {
                            seen.push(k.clone());
                        }
                    }
                }
            }
            JValue::sequence(seen.into_iter().map(JValue::from).collect())
        }
        _ => JValue::Undefined,
    }
}

fn fn_lookup(value: &JValue, key: &str) -> JValue {
    match value {
        JValue::Object(map) => map.get(key).cloned().unwrap_or(JValue::Undefined),
        JValue::Array(items, _) => {
            let mut out = Vec::new();
            for item in items.iter() {
                match fn_lookup(item, key) {
                    JValue::Undefined => {}
                    JValue::Array(inner, _) => out.extend(inner.iter().cloned()),
                    v => out.push(v),
                }
            }
            JValue::sequence(out)
        }
        _ => JValue::Undefined,
    }
}

fn fn_spread(value: &JValue) -> Result<JValue, Error> {
    match value {
        JValue::Undefined => Ok(JValue::Undefined),
        JValue::Object(map) => {
            let mut out = Vec::with_capacity(map.len());
            for (k, v) in map.iter() {
                let mut single = IndexMap::new();
                single.insert(k.clone(), v.clone());
                out.push(JValue::object(single));
            }
            Ok(JValue::sequence(out))
        }
        JValue::Array(items, _) => {
            let mut out = Vec::new();
            for item in items.iter() {
                match fn_spread(item)? {
                    JValue::Array(inner, _) => out.extend(inner.iter().cloned()),
                    JValue::Undefined => {}
                    v => out.push(v),
                }
            }
            Ok(JValue::sequence(out))
        }
        other => Ok(other.clone()),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::normalize;
    use crate::jvalue;
    use crate::parser;

    fn eval(expr: &str, data: &JValue) -> Result<JValue, Error> {
        let ast = parser::parse(expr)?;
        let env = Environment::new();
        register_builtins(&env);
        env.bind("$", data.clone());
        let mut evaluator = Evaluator::new();
        evaluator.evaluate(&ast, data, &env).map(normalize)
    }

    fn eval_ok(expr: &str, data: &JValue) -> JValue {
        eval(expr, data).unwrap()
    }

    #[test]
    fn test_string_functions() {
        let data = jvalue!({"name": "alice"});
        assert_eq!(eval_ok("$uppercase(name)", &data), jvalue!("ALICE"));
        assert_eq!(eval_ok("$lowercase(\"HELLO\")", &data), jvalue!("hello"));
        assert_eq!(eval_ok("$length(\"héllo\")", &data), jvalue!(5.0));
        assert_eq!(eval_ok("$trim(\"  a   b  \")", &data), jvalue!("a b"));
        assert_eq!(eval_ok("$substring(\"hello\", 1, 3)", &data), jvalue!("ell"));
        assert_eq!(eval_ok("$substring(\"hello\", -2)", &data), jvalue!("lo"));
        assert_eq!(
            eval_ok("$substringBefore(\"a=b\", \"=\")", &data),
            jvalue!("a")
        );
        assert_eq!(
            eval_ok("$substringAfter(\"a=b\", \"=\")", &data),
            jvalue!("b")
        );
        assert_eq!(eval_ok("$pad(\"ab\", 5, \".\")", &data), jvalue!("ab..."));
        assert_eq!(eval_ok("$pad(\"ab\", -5)", &data), jvalue!("   ab"));
        assert_eq!(eval_ok("$contains(\"hello\", \"ell\")", &data), jvalue!(true));
        assert_eq!(
            eval_ok("$join([\"a\", \"b\", \"c\"], \"-\")", &data),
            jvalue!("a-b-c")
        );
        assert_eq!(
            eval_ok("$split(\"a,b,c\", \",\")", &data),
            jvalue!(["a", "b", "c"])
        );
        // undefined input propagates
        assert_eq!(eval_ok("$uppercase(missing)", &data), jvalue!(null));
    }

    #[test]
    fn test_string_cast() {
        let data = jvalue!(null);
        assert_eq!(eval_ok("$string(2)", &data), jvalue!("2"));
        assert_eq!(eval_ok("$string(2.5)", &data), jvalue!("2.5"));
        assert_eq!(eval_ok("$string(true)", &data), jvalue!("true"));
        assert_eq!(eval_ok("$string(null)", &data), jvalue!("null"));
        assert_eq!(
            eval_ok("$string({\"a\": 1, \"b\": [2]})", &data),
            jvalue!("{\"a\":1,\"b\":[2]}")
        );
        assert_eq!(eval("$string(1/0)", &data).unwrap_err().code(), "D1001");
    }

    #[test]
    fn test_number_round_trip() {
        let data = jvalue!(null);
        // $string($number(s)) = s for plain decimal strings
        for s in ["0", "5", "123", "2.5", "0.125", "100.5"] {
            let expr = format!("$string($number(\"{}\"))", s);
            assert_eq!(eval_ok(&expr, &data), JValue::string(s));
        }
        assert_eq!(
            eval("$number(\"abc\")", &data).unwrap_err().code(),
            "D3030"
        );
        assert_eq!(eval_ok("$number(true)", &data), jvalue!(1.0));
    }

    #[test]
    fn test_numeric_functions() {
        let data = jvalue!(null);
        assert_eq!(eval_ok("$abs(-5)", &data), jvalue!(5.0));
        assert_eq!(eval_ok("$floor(3.7)", &data), jvalue!(3.0));
        assert_eq!(eval_ok("$ceil(3.2)", &data), jvalue!(4.0));
        // half-to-even
        assert_eq!(eval_ok("$round(2.5)", &data), jvalue!(2.0));
        assert_eq!(eval_ok("$round(3.5)", &data), jvalue!(4.0));
        assert_eq!(eval_ok("$round(2.345, 2)", &data), jvalue!(2.34));
        assert_eq!(eval_ok("$power(2, 10)", &data), jvalue!(1024.0));
        assert_eq!(eval_ok("$sqrt(16)", &data), jvalue!(4.0));
        assert_eq!(eval("$sqrt(-1)", &data).unwrap_err().code(), "D3060");
        assert_eq!(
            eval("$power(10, 1000)", &data).unwrap_err().code(),
            "D3061"
        );
    }

    #[test]
    fn test_aggregators() {
        let data = jvalue!({"nums": [1.0, 2.0, 3.0, 4.0]});
        assert_eq!(eval_ok("$sum(nums)", &data), jvalue!(10.0));
        assert_eq!(eval_ok("$max(nums)", &data), jvalue!(4.0));
        assert_eq!(eval_ok("$min(nums)", &data), jvalue!(1.0));
        assert_eq!(eval_ok("$average(nums)", &data), jvalue!(2.5));
        assert_eq!(eval_ok("$count(nums)", &data), jvalue!(4.0));
        // laws: sum of a singleton is the value, sum of nothing is absent
        assert_eq!(eval_ok("$sum([42])", &data), jvalue!(42.0));
        assert_eq!(eval_ok("$sum([])", &data), jvalue!(null));
        assert_eq!(eval_ok("$count(missing)", &data), jvalue!(0.0));
        // nested arrays flatten for aggregation
        assert_eq!(eval_ok("$sum([[1, 2], [3]])", &data), jvalue!(6.0));
        assert_eq!(eval("$sum([1, \"a\"])", &data).unwrap_err().code(), "T0410");
    }

    #[test]
    fn test_boolean_functions() {
        let data = jvalue!(null);
        assert_eq!(eval_ok("$boolean(\"x\")", &data), jvalue!(true));
        assert_eq!(eval_ok("$boolean(0)", &data), jvalue!(false));
        assert_eq!(eval_ok("$not(0)", &data), jvalue!(true));
        assert_eq!(eval_ok("$exists(missing)", &data), jvalue!(false));
        assert_eq!(eval_ok("$exists(null)", &data), jvalue!(true));
    }

    #[test]
    fn test_array_functions() {
        let data = jvalue!({"a": [1.0, 2.0], "b": [3.0]});
        assert_eq!(eval_ok("$append(a, b)", &data), jvalue!([1.0, 2.0, 3.0]));
        assert_eq!(eval_ok("$append(missing, b)", &data), jvalue!([3.0]));
        assert_eq!(eval_ok("$reverse(a)", &data), jvalue!([2.0, 1.0]));
        // reversal is an involution
        assert_eq!(eval_ok("$reverse($reverse(a))", &data), eval_ok("a", &data));
        assert_eq!(
            eval_ok("$distinct([1, 2, 1, 3, 2])", &data),
            jvalue!([1.0, 2.0, 3.0])
        );
        assert_eq!(
            eval_ok("$zip([1, 2], [\"a\", \"b\"])", &data),
            jvalue!([[1.0, "a"], [2.0, "b"]])
        );
        assert_eq!(
            eval_ok("$sort([3, 1, 2])", &data),
            jvalue!([1.0, 2.0, 3.0])
        );
        assert_eq!(
            eval_ok(
                "$sort([1, 3, 2], function($a, $b){ $a < $b })",
                &data
            ),
            jvalue!([3.0, 2.0, 1.0])
        );
    }

    #[test]
    fn test_object_functions() {
        let data = jvalue!({"o": {"a": 1.0, "b": 2.0}});
        assert_eq!(eval_ok("$keys(o)", &data), jvalue!(["a", "b"]));
        assert_eq!(eval_ok("$values(o)", &data), jvalue!([1.0, 2.0]));
        assert_eq!(eval_ok("$lookup(o, \"b\")", &data), jvalue!(2.0));
        assert_eq!(
            eval_ok("$spread(o)", &data),
            jvalue!([{"a": 1.0}, {"b": 2.0}])
        );
        assert_eq!(
            eval_ok("$merge([{\"x\": 1}, {\"y\": 2}, {\"x\": 3}])", &data),
            jvalue!({"x": 3.0, "y": 2.0})
        );
        assert_eq!(
            eval_ok("$each(o, function($v, $k){ $k & \"=\" & $v })", &data),
            jvalue!(["a=1", "b=2"])
        );
        assert_eq!(
            eval_ok("$sift(o, function($v){ $v > 1 })", &data),
            jvalue!({"b": 2.0})
        );
        assert_eq!(eval_ok("$type([1])", &data), jvalue!("array"));
        assert_eq!(eval_ok("$type(null)", &data), jvalue!("null"));
    }

    #[test]
    fn test_keys_reconstruct_object() {
        // keys + lookup reproduce the object for unique keys
        let data = jvalue!({"o": {"x": 1.0, "y": "z"}});
        assert_eq!(
            eval_ok("$keys(o){$: $lookup($$.o, $)}", &data),
            jvalue!({"x": 1.0, "y": "z"})
        );
    }

    #[test]
    fn test_error_and_assert() {
        let data = jvalue!(null);
        assert_eq!(eval("$error(\"boom\")", &data).unwrap_err().code(), "D3137");
        assert_eq!(
            eval("$assert(false, \"nope\")", &data).unwrap_err().code(),
            "D3141"
        );
        assert_eq!(eval_ok("$assert(true)", &data), jvalue!(null));
    }

    #[test]
    fn test_map_filter_reduce() {
        let data = jvalue!({"nums": [1.0, 2.0, 3.0, 4.0]});
        assert_eq!(
            eval_ok("$map(nums, function($x){ $x * 2 })", &data),
            jvalue!([2.0, 4.0, 6.0, 8.0])
        );
        // the callable sees (item, index, whole)
        assert_eq!(
            eval_ok("$map(nums, function($x, $i){ $i })", &data),
            jvalue!([0.0, 1.0, 2.0, 3.0])
        );
        assert_eq!(
            eval_ok("$filter(nums, function($x){ $x % 2 = 0 })", &data),
            jvalue!([2.0, 4.0])
        );
        assert_eq!(
            eval_ok("$reduce(nums, function($acc, $x){ $acc + $x })", &data),
            jvalue!(10.0)
        );
        assert_eq!(
            eval_ok("$reduce(nums, function($acc, $x){ $acc * $x }, 10)", &data),
            jvalue!(240.0)
        );
        assert_eq!(
            eval("$reduce(nums, function($x){ $x })", &data)
                .unwrap_err()
                .code(),
            "D3050"
        );
        assert_eq!(eval("$map(nums, 5)", &data).unwrap_err().code(), "T0410");
    }

    #[test]
    fn test_single() {
        let data = jvalue!({"nums": [1.0, 2.0, 3.0]});
        assert_eq!(
            eval_ok("$single(nums, function($x){ $x = 2 })", &data),
            jvalue!(2.0)
        );
        assert_eq!(
            eval("$single(nums, function($x){ $x > 1 })", &data)
                .unwrap_err()
                .code(),
            "D3139"
        );
        assert_eq!(
            eval("$single(nums, function($x){ $x > 9 })", &data)
                .unwrap_err()
                .code(),
            "D3139"
        );
    }

    #[test]
    fn test_hofs_compose_with_chain() {
        let data = jvalue!({"nums": [1.0, 2.0, 3.0, 4.0]});
        assert_eq!(
            eval_ok(
                "nums ~> $filter(function($x){ $x > 1 }) ~> $map(function($x){ $x * 10 }) ~> $sum",
                &data
            ),
            jvalue!(90.0)
        );
    }

    #[test]
    fn test_regex_functions() {
        let data = jvalue!(null);
        assert_eq!(
            eval_ok("$contains(\"Hello\", /hello/i)", &data),
            jvalue!(true)
        );
        assert_eq!(
            eval_ok("$split(\"a1b22c\", /\\d+/)", &data),
            jvalue!(["a", "b", "c"])
        );
        assert_eq!(
            eval_ok("$match(\"ab12cd34\", /(\\d+)/)", &data),
            jvalue!([
                {"match": "12", "index": 2.0, "groups": ["12"]},
                {"match": "34", "index": 6.0, "groups": ["34"]}
            ])
        );
        assert_eq!(
            eval_ok("$replace(\"a-b-c\", \"-\", \"+\")", &data),
            jvalue!("a+b+c")
        );
        assert_eq!(
            eval_ok("$replace(\"a1b2\", /\\d/, \"#\")", &data),
            jvalue!("a#b#")
        );
        assert_eq!(
            eval_ok(
                "$replace(\"a1b2\", /\\d/, function($m){ \"<\" & $m.`match` & \">\" })",
                &data
            ),
            jvalue!("a<1>b<2>")
        );
        assert_eq!(
            eval("$replace(\"abc\", \"\", \"x\")", &data).unwrap_err().code(),
            "D3010"
        );
    }

    #[test]
    fn test_map_law() {
        // $map(a, f)[i] = f(a[i], i, a)
        let data = jvalue!({"a": [5.0, 6.0, 7.0]});
        assert_eq!(
            eval_ok("$map(a, function($x, $i){ $x + $i })[1]", &data),
            eval_ok("a[1] + 1", &data)
        );
    }

    #[test]
    fn test_datetime_functions() {
        let data = jvalue!(null);
        // a single evaluation sees one timestamp
        assert_eq!(eval_ok("$millis() = $millis()", &data), jvalue!(true));
        let now = eval_ok("$now()", &data);
        assert!(now.as_str().unwrap().contains('T'));
        assert_eq!(
            eval_ok("$fromMillis(0)", &data),
            jvalue!("1970-01-01T00:00:00.000Z")
        );
        assert_eq!(
            eval_ok("$toMillis(\"1970-01-01T00:00:01.000Z\")", &data),
            jvalue!(1000.0)
        );
        // the round trip holds
        assert_eq!(
            eval_ok("$toMillis($fromMillis(1234567890123))", &data),
            jvalue!(1234567890123.0)
        );
    }

    #[test]
    fn test_random_in_range() {
        let data = jvalue!(null);
        let v = eval_ok("$random()", &data).as_f64().unwrap();
        assert!((0.0..1.0).contains(&v));
    }

    #[test]
    fn test_host_override_wins() {
        let data = jvalue!(null);
        let ast = parser::parse("$sum([1, 2])").unwrap();
        let env = Environment::new();
        register_builtins(&env);
        // a host registration shadows the library
        env.register(NativeFunction::new("sum", |_, _, _, _| {
            Ok(JValue::string("overridden"))
        }));
        let mut evaluator = Evaluator::new();
        let result = evaluator.evaluate(&ast, &data, &env).unwrap();
        assert_eq!(result, jvalue!("overridden"));
    }
}
