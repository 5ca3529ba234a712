//! # jsonata-engine
//!
//! An embeddable interpreter for JSONata, the JSON query and transformation
//! language. Compile an expression once, then evaluate it against arbitrary
//! JSON values.
//!
//! ## Architecture
//!
//! - `tokenizer` - source text to positioned tokens
//! - `parser` - Pratt parser producing the AST
//! - `ancestry` - post-parse resolution of `%` parent references
//! - `environment` - chained lexical scopes and the function registry
//! - `evaluator` - tree-walking interpreter with tuple-stream paths
//! - `functions` - the built-in function library
//! - `value` - the `JValue` JSON value model
//! - `error` - the coded error taxonomy
//!
//! ## Examples
//!
//! ```
//! use jsonata_engine::{compile, JValue};
//!
//! let program = compile("orders[price > 100].product").unwrap();
//!
//! let data = JValue::from_json_str(
//!     r#"{"orders": [
//!         {"product": "A", "price": 150},
//!         {"product": "B", "price": 50}
//!     ]}"#,
//! )
//! .unwrap();
//!
//! let result = program.evaluate(&data).unwrap();
//! assert_eq!(result.as_str(), Some("A"));
//! ```
//!
//! A compiled [`Program`] holds its own root environment. Host bindings and
//! function registrations persist across evaluations; everything bound
//! during an evaluation lives in a per-evaluation frame and is discarded.
//!
//! Evaluation is single-threaded and synchronous. A `Program` is not `Send`;
//! compile one per worker for concurrent use.

mod ancestry;
pub mod ast;
mod datetime;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod tokenizer;
pub mod value;

use std::rc::Rc;

pub use error::Error;
pub use value::{JValue, NativeFunction};

use ast::Node;
use environment::Environment;
use evaluator::Evaluator;

/// A compiled JSONata expression.
///
/// This is the main entry point. Compile once, then evaluate many times
/// against different data.
#[derive(Debug)]
pub struct Program {
    ast: Node,
    root_env: Rc<Environment>,
}

/// Compile a JSONata expression.
///
/// Parses the source, resolves parent references, and registers the built-in
/// function library onto the program's root environment.
///
/// # Errors
///
/// Returns a coded [`Error`] (`S0xxx`) if the expression does not parse.
pub fn compile(expression: &str) -> Result<Program, Error> {
    let ast = parser::parse(expression)?;
    let root_env = Environment::new();
    functions::register_builtins(&root_env);
    Ok(Program { ast, root_env })
}

/// Compile and evaluate in one step.
///
/// For repeated evaluations of the same expression, use [`compile`] and hold
/// on to the [`Program`] instead.
pub fn evaluate(expression: &str, input: &JValue) -> Result<JValue, Error> {
    compile(expression)?.evaluate(input)
}

impl Program {
    /// Evaluate this expression against the given input.
    ///
    /// Returns `JValue::Null` when the expression has no result. The
    /// returned value never contains evaluation-internal state.
    pub fn evaluate(&self, input: &JValue) -> Result<JValue, Error> {
        // A fresh frame per evaluation: top-level assignments must not leak
        // into the next run
        let frame = Environment::child(&self.root_env);
        frame.bind("$", input.clone());
        let mut evaluator = Evaluator::new();
        let result = evaluator.evaluate(&self.ast, input, &frame)?;
        Ok(evaluator::normalize(result))
    }

    /// Evaluate with JSON string input and output.
    ///
    /// Avoids building an intermediate document when the caller already has
    /// serialized JSON.
    pub fn evaluate_json(&self, input: &str) -> Result<String, Error> {
        let data = JValue::from_json_str(input).map_err(|e| Error::InvalidJsonInput {
            message: e.to_string(),
        })?;
        let result = self.evaluate(&data)?;
        result
            .to_json_string()
            .map_err(|e| Error::InvalidJsonInput {
                message: e.to_string(),
            })
    }

    /// Bind a variable on the program's root environment. The leading `$`
    /// in the name is optional.
    pub fn bind(&self, name: &str, value: JValue) {
        self.root_env.bind(strip_sigil(name), value);
    }

    /// Register a native function, overriding any built-in with the same
    /// name. The leading `$` in the name is optional.
    ///
    /// The function receives the evaluator handle (for invoking callable
    /// arguments), the evaluated arguments, the current input, and the
    /// active environment. Return `JValue::Undefined` for "no result".
    pub fn register_function(
        &self,
        name: &str,
        function: impl Fn(&mut Evaluator, &[JValue], &JValue, &Rc<Environment>) -> Result<JValue, Error>
            + 'static,
    ) {
        self.root_env
            .register(NativeFunction::new(strip_sigil(name), function));
    }

    /// The compiled AST, for debugging and tooling.
    pub fn ast(&self) -> &Node {
        &self.ast
    }
}

fn strip_sigil(name: &str) -> String {
    name.strip_prefix('$').unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvalue;

    #[test]
    fn test_compile_once_evaluate_many() {
        let program = compile("orders[price > 100].product").unwrap();

        let data1 = jvalue!({"orders": [{"product": "A", "price": 150.0}]});
        assert_eq!(program.evaluate(&data1).unwrap(), jvalue!("A"));

        let data2 = jvalue!({"orders": [{"product": "B", "price": 50.0}]});
        assert_eq!(program.evaluate(&data2).unwrap(), jvalue!(null));
    }

    #[test]
    fn test_one_shot_evaluate() {
        let data = jvalue!({"name": "alice"});
        assert_eq!(
            evaluate("$uppercase(name)", &data).unwrap(),
            jvalue!("ALICE")
        );
    }

    #[test]
    fn test_compile_error_carries_code_and_position() {
        let err = compile("a.b[").unwrap_err();
        assert_eq!(err.code(), "S0201");
        assert!(err.position().is_some());
    }

    #[test]
    fn test_bind_variable() {
        let program = compile("price * $tax").unwrap();
        program.bind("tax", jvalue!(1.1));
        let data = jvalue!({"price": 10.0});
        assert_eq!(
            program.evaluate(&data).unwrap(),
            JValue::Number(10.0 * 1.1)
        );

        // the sigil is accepted too
        program.bind("$tax", jvalue!(2.0));
        assert_eq!(program.evaluate(&data).unwrap(), jvalue!(20.0));
    }

    #[test]
    fn test_register_function() {
        let program = compile("$double(n)").unwrap();
        program.register_function("$double", |_, args, _, _| {
            match args.first().and_then(|v| v.as_f64()) {
                Some(n) => Ok(JValue::from(n * 2.0)),
                None => Ok(JValue::Undefined),
            }
        });
        let data = jvalue!({"n": 21.0});
        assert_eq!(program.evaluate(&data).unwrap(), jvalue!(42.0));
    }

    #[test]
    fn test_registered_function_in_hof() {
        let program = compile("$map([1, 2, 3], $inc)").unwrap();
        program.register_function("inc", |_, args, _, _| {
            match args.first().and_then(|v| v.as_f64()) {
                Some(n) => Ok(JValue::from(n + 1.0)),
                None => Ok(JValue::Undefined),
            }
        });
        assert_eq!(
            program.evaluate(&jvalue!(null)).unwrap(),
            jvalue!([2.0, 3.0, 4.0])
        );
    }

    #[test]
    fn test_evaluate_json_boundary() {
        let program = compile("a.b").unwrap();
        assert_eq!(program.evaluate_json(r#"{"a":{"b":[1,2]}}"#).unwrap(), "[1,2]");
        assert_eq!(program.evaluate_json("{not json").unwrap_err().code(), "I1001");
    }

    #[test]
    fn test_assignments_do_not_leak_between_evaluations() {
        let program = compile("($counter := ($counter ?? 0) + 1; $counter)").unwrap();
        let data = jvalue!(null);
        assert_eq!(program.evaluate(&data).unwrap(), jvalue!(1.0));
        // a second run starts from a clean frame
        assert_eq!(program.evaluate(&data).unwrap(), jvalue!(1.0));
    }

    #[test]
    fn test_ast_is_inspectable() {
        let program = compile("a.b").unwrap();
        assert!(matches!(program.ast().kind, ast::NodeKind::Path { .. }));
    }

    #[test]
    fn test_no_result_is_null() {
        let program = compile("nothing.here").unwrap();
        assert_eq!(program.evaluate(&jvalue!({})).unwrap(), JValue::Null);
    }
}
