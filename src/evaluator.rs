// Expression evaluator
//
// A tree-walking interpreter over the resolved AST. Path expressions are
// evaluated as a stream of tuples {value, context, environment}: `value` is
// what the next step navigates from, `context` is what ancestor labels bind
// to (a focus step advances `value` while freezing `context` at the parent
// level), and the environment carries variable and label bindings per tuple.

use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::ast::{BinaryOp, Node, NodeKind, SortTerm, UnaryOp};
use crate::environment::Environment;
use crate::error::Error;
use crate::value::{
    ArrayFlags, JValue, LambdaClosure, PartialApplication, PartialArg,
};

const MAX_RANGE_SIZE: f64 = 10_000_000.0;
const MAX_DEPTH: usize = 300;

/// One element of the path tuple stream.
#[derive(Clone)]
struct Tuple {
    value: JValue,
    context: JValue,
    env: Rc<Environment>,
}

impl Tuple {
    fn start(input: &JValue, env: &Rc<Environment>) -> Self {
        Tuple {
            value: input.clone(),
            context: input.clone(),
            env: Rc::clone(env),
        }
    }
}

pub struct Evaluator {
    depth: usize,
    timestamp: DateTime<Utc>,
    rng_state: u64,
}

impl Evaluator {
    pub fn new() -> Self {
        let timestamp = Utc::now();
        Evaluator {
            depth: 0,
            timestamp,
            rng_state: Self::seed_from(timestamp),
        }
    }

    fn seed_from(timestamp: DateTime<Utc>) -> u64 {
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or(0) as u64;
        // xorshift state must be non-zero
        nanos | 1
    }

    /// The timestamp captured at evaluation entry. All `$now`/`$millis`
    /// calls within one evaluation agree.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Next pseudo-random number in [0, 1) (xorshift64*, reseeded per
    /// evaluation from the entry timestamp).
    pub fn next_random(&mut self) -> f64 {
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        let bits = x.wrapping_mul(0x2545F4914F6CDD1D) >> 11;
        bits as f64 / (1u64 << 53) as f64
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    /// Evaluate a node against an input value. The result may carry internal
    /// sequence flags; callers at the host boundary run [`normalize`].
    pub fn evaluate(
        &mut self,
        node: &Node,
        input: &JValue,
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.depth -= 1;
            return Err(Error::StackOverflow);
        }
        let result = self.evaluate_impl(node, input, env);
        self.depth -= 1;

        let mut value = result?;
        if node.keep_array {
            value = keep_singleton(value);
        }
        // Collapse sequences at every expression boundary: none → absent,
        // one → the item itself
        if let JValue::Array(items, flags) = &value {
            if flags.contains(ArrayFlags::SEQUENCE) && !flags.contains(ArrayFlags::KEEP) {
                if items.is_empty() {
                    value = JValue::Undefined;
                } else if items.len() == 1 {
                    value = items[0].clone();
                }
            }
        }
        Ok(value)
    }

    fn evaluate_impl(
        &mut self,
        node: &Node,
        input: &JValue,
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        match &node.kind {
            NodeKind::Number(n) => Ok(JValue::Number(*n)),
            NodeKind::String(s) => Ok(JValue::string(s.as_str())),
            NodeKind::Bool(b) => Ok(JValue::Bool(*b)),
            NodeKind::Null => Ok(JValue::Null),
            NodeKind::Regex { pattern, flags } => {
                Ok(JValue::regex(pattern.as_str(), flags.as_str()))
            }

            NodeKind::Name(name) => Ok(lookup_name(input, name)),

            NodeKind::Variable(name) => {
                if name.is_empty() {
                    Ok(input.clone())
                } else if name == "$" {
                    Ok(env.lookup("$").unwrap_or_else(|| input.clone()))
                } else {
                    Ok(env.lookup(name).unwrap_or(JValue::Undefined))
                }
            }

            NodeKind::Parent { label } => match label {
                Some(label) => Ok(env.lookup(label).unwrap_or(JValue::Undefined)),
                None => Ok(JValue::Undefined),
            },

            NodeKind::Wildcard => Ok(wildcard_values(input)),

            NodeKind::Descendant => {
                let mut out = Vec::new();
                collect_descendants(input, &mut out);
                Ok(JValue::sequence(out))
            }

            NodeKind::Path { steps } => self.evaluate_path(steps, input, env),

            // A filter/sort/binding outside a path runs the path machinery
            // with itself as the only step
            NodeKind::Filter { .. }
            | NodeKind::Sort { .. }
            | NodeKind::Focus { .. }
            | NodeKind::IndexBind { .. } => {
                self.evaluate_path(std::slice::from_ref(node), input, env)
            }

            NodeKind::Binary { op, lhs, rhs } => self.evaluate_binary(*op, lhs, rhs, input, env),

            NodeKind::Unary { op, operand } => {
                let value = self.evaluate(operand, input, env)?;
                match op {
                    UnaryOp::Negate => match value {
                        JValue::Undefined => Ok(JValue::Undefined),
                        JValue::Number(n) => Ok(JValue::Number(-n)),
                        _ => Err(Error::NonNumericOperand {
                            op: "-".to_string(),
                            side: "right".to_string(),
                        }),
                    },
                }
            }

            NodeKind::ArrayConstructor(elements) => {
                let mut out = Vec::new();
                for element in elements {
                    let value = self.evaluate(element, input, env)?;
                    if value.is_undefined() {
                        continue;
                    }
                    if matches!(element.kind, NodeKind::ArrayConstructor(_)) {
                        // nested constructors stay nested
                        out.push(value);
                    } else {
                        match value {
                            JValue::Array(items, _) => out.extend(items.iter().cloned()),
                            v => out.push(v),
                        }
                    }
                }
                Ok(JValue::array_with_flags(out, ArrayFlags::CONS))
            }

            NodeKind::ObjectConstructor(pairs) => self.construct_object(pairs, input, env),

            NodeKind::GroupBy { expr, pairs } => {
                let source = self.evaluate(expr, input, env)?;
                self.group_object(&source, pairs, env)
            }

            NodeKind::Block(exprs) => {
                let frame = Environment::child(env);
                let mut result = JValue::Undefined;
                for expr in exprs {
                    result = self.evaluate(expr, input, &frame)?;
                }
                Ok(result)
            }

            NodeKind::Assignment { name, value } => {
                let value = self.evaluate(value, input, env)?;
                env.bind(name.clone(), value.clone());
                Ok(value)
            }

            NodeKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.evaluate(condition, input, env)?;
                if is_truthy(&condition) {
                    self.evaluate(then_branch, input, env)
                } else {
                    match else_branch {
                        Some(e) => self.evaluate(e, input, env),
                        None => Ok(JValue::Undefined),
                    }
                }
            }

            NodeKind::Lambda { params, body } => Ok(JValue::Lambda(Rc::new(LambdaClosure {
                params: params.clone(),
                body: Rc::clone(body),
                env: Rc::clone(env),
                input: input.clone(),
            }))),

            NodeKind::FunctionCall { callee, args } => {
                self.evaluate_call(callee, args, input, env)
            }

            NodeKind::Range { start, end } => {
                let start = self.evaluate(start, input, env)?;
                let end = self.evaluate(end, input, env)?;
                self.evaluate_range(&start, &end)
            }

            NodeKind::Placeholder => Err(Error::SyntaxError {
                position: node.position,
                token: "?".to_string(),
            }),

            NodeKind::Transform { .. } => Err(Error::TransformUnsupported),
        }
    }

    // ── Path evaluation ──────────────────────────────────────────────────────

    fn evaluate_path(
        &mut self,
        steps: &[Node],
        input: &JValue,
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        let keep = steps.iter().any(step_keeps);
        let mut tuples = vec![Tuple::start(input, env)];

        let last_index = steps.len().saturating_sub(1);
        for (i, step) in steps.iter().enumerate() {
            tuples = self.expand_step(tuples, step, i == last_index, i > 0)?;
            if tuples.is_empty() {
                break;
            }
        }

        let mut result = match tuples.len() {
            0 => JValue::Undefined,
            1 => tuples.remove(0).value,
            _ => JValue::sequence(tuples.into_iter().map(|t| t.value).collect()),
        };

        if keep {
            result = keep_singleton(result);
        }
        Ok(result)
    }

    /// Run one step over the tuple stream.
    fn expand_step(
        &mut self,
        tuples: Vec<Tuple>,
        step: &Node,
        last: bool,
        context_call: bool,
    ) -> Result<Vec<Tuple>, Error> {
        match &step.kind {
            // Sort reorders the full tuple set produced by its target
            NodeKind::Sort { expr, terms } => {
                let mut expanded = Vec::new();
                for tuple in tuples {
                    expanded.extend(self.expand_group(tuple, expr, context_call)?);
                }
                self.sort_tuples(expanded, terms)
            }

            // A filter selects within each tuple's expansion group, so that
            // numeric predicates index per origin, not across the stream
            NodeKind::Filter { expr, predicate } => {
                let mut out = Vec::new();
                for tuple in tuples {
                    let group = self.expand_group(tuple, expr, context_call)?;
                    out.extend(self.filter_group(group, predicate)?);
                }
                Ok(out)
            }

            // Focus: navigate from the kept context (which after a previous
            // focus is still the parent, giving sibling-join semantics), bind the
            // item, and keep `context` where it was
            NodeKind::Focus { expr, name } => {
                let mut out = Vec::new();
                for tuple in tuples {
                    let from = Tuple {
                        value: tuple.context.clone(),
                        context: tuple.context.clone(),
                        env: Rc::clone(&tuple.env),
                    };
                    for item in self.expand_step(vec![from], expr, false, context_call)? {
                        let frame = Environment::child(&item.env);
                        frame.bind(name.clone(), item.value.clone());
                        out.push(Tuple {
                            value: item.value,
                            context: tuple.context.clone(),
                            env: frame,
                        });
                    }
                }
                Ok(out)
            }

            NodeKind::IndexBind { expr, name } => {
                let mut out = Vec::new();
                for tuple in tuples {
                    let items = self.expand_step(vec![tuple], expr, false, context_call)?;
                    for (i, item) in items.into_iter().enumerate() {
                        let frame = Environment::child(&item.env);
                        frame.bind(name.clone(), JValue::from(i));
                        out.push(Tuple {
                            value: item.value.clone(),
                            context: item.value,
                            env: frame,
                        });
                    }
                }
                Ok(out)
            }

            _ => {
                // Plain step: evaluate per tuple, then splice array results
                // into the stream. A constructor heading the path feeds its
                // elements into the stream; later constructor steps stay
                // whole.
                let head_constructor =
                    !context_call && matches!(step.kind, NodeKind::ArrayConstructor(_));
                let mut results: Vec<(JValue, Rc<Environment>)> = Vec::new();
                for tuple in &tuples {
                    let (value, step_env) = self.eval_step_value(tuple, step, context_call)?;
                    if !value.is_undefined() {
                        results.push((value, step_env));
                    }
                }

                // A lone array produced by the final step is the result
                // itself, not a projection to splice
                if last && results.len() == 1 {
                    let (value, env) = &results[0];
                    if value.is_array() && !value.is_sequence() {
                        return Ok(vec![Tuple {
                            value: value.clone(),
                            context: value.clone(),
                            env: Rc::clone(env),
                        }]);
                    }
                }

                let mut out = Vec::new();
                for (value, step_env) in results {
                    match value {
                        JValue::Array(items, flags)
                            if !flags.contains(ArrayFlags::CONS) || head_constructor =>
                        {
                            for item in items.iter() {
                                out.push(Tuple {
                                    value: item.clone(),
                                    context: item.clone(),
                                    env: Rc::clone(&step_env),
                                });
                            }
                        }
                        other => out.push(Tuple {
                            value: other.clone(),
                            context: other,
                            env: step_env,
                        }),
                    }
                }
                Ok(out)
            }
        }
    }

    /// Expand the target of a filter or sort for one tuple: tuple-stream
    /// steps expand through the stream machinery; anything else is evaluated
    /// and iterated item-wise (constructed arrays included: a predicate
    /// indexes into `[1,2,3]` like any other group).
    fn expand_group(
        &mut self,
        tuple: Tuple,
        expr: &Node,
        context_call: bool,
    ) -> Result<Vec<Tuple>, Error> {
        match expr.kind {
            NodeKind::Focus { .. }
            | NodeKind::IndexBind { .. }
            | NodeKind::Filter { .. }
            | NodeKind::Sort { .. } => self.expand_step(vec![tuple], expr, false, context_call),
            _ => {
                let (value, step_env) = self.eval_step_value(&tuple, expr, context_call)?;
                Ok(match value {
                    JValue::Undefined => Vec::new(),
                    JValue::Array(items, _) => items
                        .iter()
                        .map(|item| Tuple {
                            value: item.clone(),
                            context: item.clone(),
                            env: Rc::clone(&step_env),
                        })
                        .collect(),
                    v => vec![Tuple {
                        value: v.clone(),
                        context: v,
                        env: step_env,
                    }],
                })
            }
        }
    }

    /// Evaluate a step expression for one tuple, binding any ancestor labels
    /// to the tuple's context first.
    fn eval_step_value(
        &mut self,
        tuple: &Tuple,
        step: &Node,
        context_call: bool,
    ) -> Result<(JValue, Rc<Environment>), Error> {
        let mut env = Rc::clone(&tuple.env);
        if !step.ancestors.is_empty() {
            let frame = Environment::child(&env);
            for label in &step.ancestors {
                frame.bind(label.clone(), tuple.context.clone());
            }
            env = frame;
        }

        let value = if context_call && matches!(step.kind, NodeKind::FunctionCall { .. }) {
            self.evaluate_context_call(step, &tuple.value, &env)?
        } else {
            self.evaluate(step, &tuple.value, &env)?
        };
        Ok((value, env))
    }

    /// Apply a predicate to the tuples expanded from one origin tuple.
    /// A numeric predicate selects by position (negative counts from the
    /// end); anything else filters by truthiness.
    fn filter_group(&mut self, group: Vec<Tuple>, predicate: &Node) -> Result<Vec<Tuple>, Error> {
        let len = group.len() as i64;
        let mut out = Vec::new();
        for (i, tuple) in group.into_iter().enumerate() {
            let frame = Environment::child(&tuple.env);
            let selection = self.evaluate(predicate, &tuple.value, &frame)?;

            let include = match index_set(&selection) {
                Some(indices) => indices.iter().any(|idx| {
                    let resolved = if *idx < 0 { len + idx } else { *idx };
                    resolved == i as i64
                }),
                None => is_truthy(&selection),
            };
            if include {
                out.push(tuple);
            }
        }
        Ok(out)
    }

    /// Sort the tuple stream by the term keys. Stable; undefined keys sort
    /// last regardless of direction.
    fn sort_tuples(&mut self, tuples: Vec<Tuple>, terms: &[SortTerm]) -> Result<Vec<Tuple>, Error> {
        if tuples.len() <= 1 {
            return Ok(tuples);
        }

        // Evaluate the keys once per tuple
        let mut keyed: Vec<(Vec<JValue>, Tuple)> = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            let mut keys = Vec::with_capacity(terms.len());
            for term in terms {
                let frame = Environment::child(&tuple.env);
                keys.push(self.evaluate(&term.expr, &tuple.value, &frame)?);
            }
            keyed.push((keys, tuple));
        }

        let sorted = merge_sort_by(keyed, &mut |a: &(Vec<JValue>, Tuple),
                                                b: &(Vec<JValue>, Tuple)| {
            sort_keys_after(&a.0, &b.0, terms)
        })?;

        Ok(sorted.into_iter().map(|(_, t)| t).collect())
    }

    // ── Object construction and grouping ─────────────────────────────────────

    fn construct_object(
        &mut self,
        pairs: &[(Node, Node)],
        input: &JValue,
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        let mut out: IndexMap<String, JValue> = IndexMap::new();
        for (key_expr, value_expr) in pairs {
            let key = self.evaluate(key_expr, input, env)?;
            if key.is_undefined() {
                continue;
            }
            let key = match key.as_str() {
                Some(s) => s.to_string(),
                None => {
                    return Err(Error::NonStringKey {
                        value: key.to_string(),
                    })
                }
            };
            if out.contains_key(&key) {
                return Err(Error::DuplicateKey { key });
            }
            let value = self.evaluate(value_expr, input, env)?;
            if !value.is_undefined() {
                out.insert(key, value);
            }
        }
        Ok(JValue::object(out))
    }

    fn group_object(
        &mut self,
        source: &JValue,
        pairs: &[(Node, Node)],
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        if source.is_undefined() {
            return Ok(JValue::Undefined);
        }
        let items: Vec<JValue> = match source {
            JValue::Array(items, _) => items.iter().cloned().collect(),
            other => vec![other.clone()],
        };

        struct Group {
            items: Vec<JValue>,
            pair_index: usize,
        }

        let mut groups: IndexMap<String, Group> = IndexMap::new();
        for item in &items {
            for (pair_index, (key_expr, _)) in pairs.iter().enumerate() {
                let key = self.evaluate(key_expr, item, env)?;
                if key.is_undefined() {
                    continue;
                }
                let key = match key.as_str() {
                    Some(s) => s.to_string(),
                    None => {
                        return Err(Error::NonStringKey {
                            value: key.to_string(),
                        })
                    }
                };
                match groups.get_mut(&key) {
                    Some(group) => {
                        // the same key produced by two different pairs is
                        // ambiguous about which value expression applies
                        if group.pair_index != pair_index {
                            return Err(Error::DuplicateKey { key });
                        }
                        group.items.push(item.clone());
                    }
                    None => {
                        groups.insert(
                            key,
                            Group {
                                items: vec![item.clone()],
                                pair_index,
                            },
                        );
                    }
                }
            }
        }

        let mut out: IndexMap<String, JValue> = IndexMap::new();
        for (key, group) in groups {
            let group_input = if group.items.len() == 1 {
                group.items.into_iter().next().expect("one item")
            } else {
                JValue::sequence(group.items)
            };
            let value = self.evaluate(&pairs[group.pair_index].1, &group_input, env)?;
            if !value.is_undefined() {
                out.insert(key, value);
            }
        }
        Ok(JValue::object(out))
    }

    // ── Binary operators ─────────────────────────────────────────────────────

    fn evaluate_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Node,
        rhs: &Node,
        input: &JValue,
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        match op {
            // Short-circuiting: the right operand must not run once the
            // left decides
            BinaryOp::And => {
                let left = self.evaluate(lhs, input, env)?;
                if !is_truthy(&left) {
                    return Ok(JValue::Bool(false));
                }
                let right = self.evaluate(rhs, input, env)?;
                Ok(JValue::Bool(is_truthy(&right)))
            }
            BinaryOp::Or => {
                let left = self.evaluate(lhs, input, env)?;
                if is_truthy(&left) {
                    return Ok(JValue::Bool(true));
                }
                let right = self.evaluate(rhs, input, env)?;
                Ok(JValue::Bool(is_truthy(&right)))
            }

            BinaryOp::Coalesce => {
                let left = self.evaluate(lhs, input, env)?;
                if !left.is_undefined() && !left.is_null() {
                    Ok(left)
                } else {
                    self.evaluate(rhs, input, env)
                }
            }
            BinaryOp::Default => {
                let left = self.evaluate(lhs, input, env)?;
                if !left.is_undefined() {
                    Ok(left)
                } else {
                    self.evaluate(rhs, input, env)
                }
            }

            BinaryOp::Apply => self.evaluate_apply(lhs, rhs, input, env),

            _ => {
                let left = self.evaluate(lhs, input, env)?;
                let right = self.evaluate(rhs, input, env)?;
                match op {
                    BinaryOp::Add
                    | BinaryOp::Subtract
                    | BinaryOp::Multiply
                    | BinaryOp::Divide
                    | BinaryOp::Modulo => numeric_binary(op, &left, &right),
                    BinaryOp::Equal => Ok(JValue::Bool(values_equal(&left, &right))),
                    BinaryOp::NotEqual => {
                        if left.is_undefined() || right.is_undefined() {
                            // comparisons with absent values never hold
                            Ok(JValue::Bool(false))
                        } else {
                            Ok(JValue::Bool(!values_equal(&left, &right)))
                        }
                    }
                    BinaryOp::LessThan
                    | BinaryOp::LessThanOrEqual
                    | BinaryOp::GreaterThan
                    | BinaryOp::GreaterThanOrEqual => ordered_compare(op, &left, &right),
                    BinaryOp::Concatenate => {
                        let mut s = concat_string(&left)?;
                        s.push_str(&concat_string(&right)?);
                        Ok(JValue::string(s))
                    }
                    BinaryOp::In => {
                        if left.is_undefined() || right.is_undefined() {
                            return Ok(JValue::Bool(false));
                        }
                        let found = match &right {
                            JValue::Array(items, _) => {
                                items.iter().any(|item| values_equal(&left, item))
                            }
                            other => values_equal(&left, other),
                        };
                        Ok(JValue::Bool(found))
                    }
                    _ => unreachable!("handled above"),
                }
            }
        }
    }

    // ── Function invocation ──────────────────────────────────────────────────

    fn evaluate_call(
        &mut self,
        callee: &Node,
        args: &[Node],
        input: &JValue,
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        let function = self.evaluate(callee, input, env)?;

        if args
            .iter()
            .any(|a| matches!(a.kind, NodeKind::Placeholder))
        {
            // Partial application: freeze the non-placeholder arguments now
            if !function.is_function() {
                return Err(Error::NotCallable);
            }
            let mut partial_args = Vec::with_capacity(args.len());
            for arg in args {
                if matches!(arg.kind, NodeKind::Placeholder) {
                    partial_args.push(PartialArg::Placeholder);
                } else {
                    partial_args.push(PartialArg::Fixed(self.evaluate(arg, input, env)?));
                }
            }
            return Ok(JValue::Partial(Rc::new(PartialApplication {
                callee: function,
                args: partial_args,
            })));
        }

        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push(self.evaluate(arg, input, env)?);
        }
        self.invoke(&function, evaluated, input, env, None)
    }

    /// Context-call convention for a function call on the right of a path
    /// step: natives receive the step value prepended; a lambda receives it
    /// as its evaluation input.
    fn evaluate_context_call(
        &mut self,
        node: &Node,
        value: &JValue,
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        let (callee, args) = match &node.kind {
            NodeKind::FunctionCall { callee, args } => (callee, args),
            _ => unreachable!("context call on non-call node"),
        };
        let function = self.evaluate(callee, value, env)?;
        let mut evaluated = Vec::with_capacity(args.len() + 1);
        for arg in args {
            evaluated.push(self.evaluate(arg, value, env)?);
        }
        match &function {
            JValue::Lambda(_) => self.invoke(&function, evaluated, value, env, Some(value)),
            _ => {
                evaluated.insert(0, value.clone());
                self.invoke(&function, evaluated, value, env, None)
            }
        }
    }

    fn evaluate_apply(
        &mut self,
        lhs: &Node,
        rhs: &Node,
        input: &JValue,
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        let value = self.evaluate(lhs, input, env)?;

        let mut result = match &rhs.kind {
            NodeKind::FunctionCall { callee, args }
                if !args
                    .iter()
                    .any(|a| matches!(a.kind, NodeKind::Placeholder)) =>
            {
                // x ~> f(a, b) invokes f(x, a, b)
                let function = self.evaluate(callee, input, env)?;
                if !function.is_function() {
                    return Err(Error::ChainTargetNotCallable);
                }
                let mut evaluated = Vec::with_capacity(args.len() + 1);
                evaluated.push(value);
                for arg in args {
                    evaluated.push(self.evaluate(arg, input, env)?);
                }
                self.invoke(&function, evaluated, input, env, None)?
            }
            _ => {
                let function = self.evaluate(rhs, input, env)?;
                if !function.is_function() {
                    return Err(Error::ChainTargetNotCallable);
                }
                self.invoke(&function, vec![value], input, env, None)?
            }
        };

        if rhs.keep_array {
            result = keep_singleton(result);
        }
        Ok(result)
    }

    /// Invoke any callable with already-evaluated arguments. This is the
    /// entry point native functions use to re-enter evaluation for their
    /// callable arguments.
    pub fn apply_function(
        &mut self,
        function: &JValue,
        args: &[JValue],
        input: &JValue,
        env: &Rc<Environment>,
    ) -> Result<JValue, Error> {
        self.invoke(function, args.to_vec(), input, env, None)
    }

    fn invoke(
        &mut self,
        function: &JValue,
        args: Vec<JValue>,
        input: &JValue,
        env: &Rc<Environment>,
        lambda_input: Option<&JValue>,
    ) -> Result<JValue, Error> {
        match function {
            JValue::Lambda(closure) => {
                let frame = Environment::child(&closure.env);
                for (i, param) in closure.params.iter().enumerate() {
                    frame.bind(param.clone(), args.get(i).cloned().unwrap_or(JValue::Undefined));
                }
                // The body sees the closure's captured input, so bare field
                // references resolve against the definition context
                let body_input = lambda_input.unwrap_or(&closure.input);
                self.evaluate(&closure.body, body_input, &frame)
            }
            JValue::NativeFn(native) => {
                let implementation = Rc::clone(&native.implementation);
                (*implementation)(self, &args, input, env)
            }
            JValue::Partial(partial) => {
                let mut supplied = args.into_iter();
                let mut full = Vec::with_capacity(partial.args.len());
                for slot in &partial.args {
                    match slot {
                        PartialArg::Fixed(v) => full.push(v.clone()),
                        PartialArg::Placeholder => {
                            full.push(supplied.next().unwrap_or(JValue::Undefined))
                        }
                    }
                }
                full.extend(supplied);
                self.invoke(&partial.callee, full, input, env, lambda_input)
            }
            _ => Err(Error::NotCallable),
        }
    }

    // ── Range ────────────────────────────────────────────────────────────────

    fn evaluate_range(&mut self, start: &JValue, end: &JValue) -> Result<JValue, Error> {
        let start_int = match start {
            JValue::Undefined => None,
            JValue::Number(n) if n.fract() == 0.0 => Some(*n),
            _ => return Err(Error::RangeStartNotInteger),
        };
        let end_int = match end {
            JValue::Undefined => None,
            JValue::Number(n) if n.fract() == 0.0 => Some(*n),
            _ => return Err(Error::RangeEndNotInteger),
        };
        let (a, b) = match (start_int, end_int) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(JValue::sequence(Vec::new())),
        };
        if a > b {
            return Ok(JValue::sequence(Vec::new()));
        }
        let size = b - a + 1.0;
        if size > MAX_RANGE_SIZE {
            return Err(Error::RangeTooLarge { size });
        }
        let mut out = Vec::with_capacity(size as usize);
        let mut n = a;
        while n <= b {
            out.push(JValue::Number(n));
            n += 1.0;
        }
        Ok(JValue::sequence(out))
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Step helpers ─────────────────────────────────────────────────────────────

/// Whether a step (or its navigation target) carries the keep-array flag.
fn step_keeps(node: &Node) -> bool {
    if node.keep_array {
        return true;
    }
    match &node.kind {
        NodeKind::Filter { expr, .. }
        | NodeKind::Sort { expr, .. }
        | NodeKind::Focus { expr, .. }
        | NodeKind::IndexBind { expr, .. } => step_keeps(expr),
        _ => false,
    }
}

/// Force a value into array form without later singleton collapse.
fn keep_singleton(value: JValue) -> JValue {
    match value {
        JValue::Undefined => JValue::Undefined,
        v @ JValue::Array(..) => v.with_flags(ArrayFlags::KEEP),
        v => JValue::array_with_flags(vec![v], ArrayFlags::KEEP),
    }
}

/// Field lookup with array projection: a name applied to an array maps over
/// its elements, splicing nested results.
fn lookup_name(input: &JValue, name: &str) -> JValue {
    match input {
        JValue::Object(map) => match map.get(name) {
            Some(v) => v.clone(),
            None => JValue::Undefined,
        },
        JValue::Array(items, _) => {
            let mut out = Vec::new();
            for item in items.iter() {
                match lookup_name(item, name) {
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

/// Wildcard: an object's values in insertion order with arrays flattened one
/// level; mapped over array input.
fn wildcard_values(input: &JValue) -> JValue {
    match input {
        JValue::Object(map) => {
            let mut out = Vec::new();
            for value in map.values() {
                match value {
                    JValue::Array(items, _) => out.extend(items.iter().cloned()),
                    v => out.push(v.clone()),
                }
            }
            JValue::sequence(out)
        }
        JValue::Array(items, _) => {
            let mut out = Vec::new();
            for item in items.iter() {
                match wildcard_values(item) {
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

/// Depth-first descendant collection: every non-array value encountered,
/// recursing through object values and array elements.
fn collect_descendants(value: &JValue, out: &mut Vec<JValue>) {
    match value {
        JValue::Array(items, _) => {
            for item in items.iter() {
                collect_descendants(item, out);
            }
        }
        JValue::Object(map) => {
            out.push(value.clone());
            for v in map.values() {
                collect_descendants(v, out);
            }
        }
        JValue::Undefined => {}
        other => out.push(other.clone()),
    }
}

/// Interpret a predicate result as a set of positional indices, if it is a
/// number or an array of numbers.
fn index_set(value: &JValue) -> Option<Vec<i64>> {
    match value {
        JValue::Number(n) => Some(vec![n.floor() as i64]),
        JValue::Array(items, _) if !items.is_empty() => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                match item {
                    JValue::Number(n) => out.push(n.floor() as i64),
                    _ => return None,
                }
            }
            Some(out)
        }
        _ => None,
    }
}

// ── Value semantics ──────────────────────────────────────────────────────────

/// Truthiness: true, non-zero numbers, and non-empty strings, arrays, and
/// objects are truthy; null and absent values are not.
pub fn is_truthy(value: &JValue) -> bool {
    match value {
        JValue::Bool(b) => *b,
        JValue::Number(n) => *n != 0.0,
        JValue::String(s) => !s.is_empty(),
        JValue::Array(items, _) => !items.is_empty(),
        JValue::Object(map) => !map.is_empty(),
        JValue::Null | JValue::Undefined => false,
        _ => false,
    }
}

/// Structural equality; absent values are equal to nothing (not even each
/// other).
pub fn values_equal(left: &JValue, right: &JValue) -> bool {
    if left.is_undefined() || right.is_undefined() {
        return false;
    }
    left == right
}

pub(crate) fn type_name(value: &JValue) -> &'static str {
    match value {
        JValue::Null => "null",
        JValue::Bool(_) => "boolean",
        JValue::Number(_) => "number",
        JValue::String(_) => "string",
        JValue::Array(..) => "array",
        JValue::Object(_) => "object",
        JValue::Undefined => "undefined",
        JValue::Lambda(_) | JValue::NativeFn(_) | JValue::Partial(_) => "function",
        JValue::Regex { .. } => "regex",
    }
}

fn numeric_binary(op: BinaryOp, left: &JValue, right: &JValue) -> Result<JValue, Error> {
    // Type violations surface even when the other operand is absent
    if !left.is_undefined() && !left.is_number() {
        return Err(Error::NonNumericOperand {
            op: op.symbol().to_string(),
            side: "left".to_string(),
        });
    }
    if !right.is_undefined() && !right.is_number() {
        return Err(Error::NonNumericOperand {
            op: op.symbol().to_string(),
            side: "right".to_string(),
        });
    }
    let (a, b) = match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Ok(JValue::Undefined),
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::Modulo => a % b,
        _ => unreachable!("not an arithmetic operator"),
    };
    if !result.is_finite() {
        return Err(Error::NumericOverflow);
    }
    Ok(JValue::Number(result))
}

fn ordered_compare(op: BinaryOp, left: &JValue, right: &JValue) -> Result<JValue, Error> {
    let comparable = |v: &JValue| v.is_number() || v.is_string();
    if (!left.is_undefined() && !comparable(left))
        || (!right.is_undefined() && !comparable(right))
    {
        return Err(Error::NotComparable {
            op: op.symbol().to_string(),
        });
    }
    if left.is_undefined() || right.is_undefined() {
        return Ok(JValue::Undefined);
    }

    let ordering = match (left, right) {
        (JValue::Number(a), JValue::Number(b)) => a.partial_cmp(b),
        (JValue::String(a), JValue::String(b)) => Some(a.cmp(b)),
        _ => {
            return Err(Error::ComparisonTypeMismatch {
                left: type_name(left).to_string(),
                right: type_name(right).to_string(),
            })
        }
    };
    let ordering = match ordering {
        Some(o) => o,
        None => return Ok(JValue::Bool(false)), // NaN comparisons
    };

    let result = match op {
        BinaryOp::LessThan => ordering.is_lt(),
        BinaryOp::LessThanOrEqual => ordering.is_le(),
        BinaryOp::GreaterThan => ordering.is_gt(),
        BinaryOp::GreaterThanOrEqual => ordering.is_ge(),
        _ => unreachable!("not a comparison operator"),
    };
    Ok(JValue::Bool(result))
}

/// The stringification used by `&`: strings pass through, absent values and
/// null become empty, aggregates render as compact JSON in insertion order.
pub(crate) fn concat_string(value: &JValue) -> Result<String, Error> {
    Ok(match value {
        JValue::Undefined | JValue::Null => String::new(),
        JValue::String(s) => s.to_string(),
        JValue::Bool(b) => b.to_string(),
        JValue::Number(_) | JValue::Array(..) | JValue::Object(_) => {
            value.to_json_string().unwrap_or_default()
        }
        _ => String::new(),
    })
}

/// Compare two key vectors for sorting: returns true when `a` must come
/// after `b`. Undefined keys sort last regardless of direction.
fn sort_keys_after(a: &[JValue], b: &[JValue], terms: &[SortTerm]) -> Result<bool, Error> {
    for (i, term) in terms.iter().enumerate() {
        let (x, y) = (&a[i], &b[i]);
        match (x.is_undefined(), y.is_undefined()) {
            (true, true) => continue,
            (true, false) => return Ok(true),
            (false, true) => return Ok(false),
            (false, false) => {}
        }
        let after = match (x, y) {
            (JValue::Number(p), JValue::Number(q)) => {
                if p == q {
                    continue;
                }
                p > q
            }
            (JValue::String(p), JValue::String(q)) => {
                if p == q {
                    continue;
                }
                p > q
            }
            (JValue::Number(_), JValue::String(_)) | (JValue::String(_), JValue::Number(_)) => {
                return Err(Error::SortKeyTypeMismatch {
                    left: type_name(x).to_string(),
                    right: type_name(y).to_string(),
                })
            }
            _ => {
                let bad = if x.is_number() || x.is_string() { y } else { x };
                return Err(Error::SortKeyNotComparable {
                    value: bad.to_string(),
                })
            }
        };
        return Ok(if term.descending { !after } else { after });
    }
    Ok(false)
}

/// Stable merge sort with a fallible comparator. `after(a, b)` answers
/// whether `a` must be placed after `b`.
pub(crate) fn merge_sort_by<T, F>(items: Vec<T>, after: &mut F) -> Result<Vec<T>, Error>
where
    F: FnMut(&T, &T) -> Result<bool, Error>,
{
    if items.len() <= 1 {
        return Ok(items);
    }
    let mid = items.len() / 2;
    let mut rest = items;
    let right = rest.split_off(mid);
    let left = merge_sort_by(rest, after)?;
    let right = merge_sort_by(right, after)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => {
                if after(l, r)? {
                    out.push(right.next().expect("peeked"));
                } else {
                    out.push(left.next().expect("peeked"));
                }
            }
            (Some(_), None) => out.push(left.next().expect("peeked")),
            (None, Some(_)) => out.push(right.next().expect("peeked")),
            (None, None) => break,
        }
    }
    Ok(out)
}

// ── Result normalization ─────────────────────────────────────────────────────

/// Prepare a result for the host: absent becomes null at the top level,
/// absent elements vanish from aggregates, and internal array flags are
/// cleared.
pub fn normalize(value: JValue) -> JValue {
    match value {
        JValue::Undefined => JValue::Null,
        other => strip(other),
    }
}

fn strip(value: JValue) -> JValue {
    match value {
        JValue::Array(items, _) => JValue::array(
            items
                .iter()
                .filter(|v| !v.is_undefined())
                .map(|v| strip(v.clone()))
                .collect(),
        ),
        JValue::Object(map) => {
            let stripped: IndexMap<String, JValue> = map
                .iter()
                .filter(|(_, v)| !v.is_undefined())
                .map(|(k, v)| (k.clone(), strip(v.clone())))
                .collect();
            JValue::object(stripped)
        }
        other => other,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
