// Integration tests for the full compile + evaluate pipeline
//
// These exercise complete expressions against realistic data: projection,
// filters, aggregation, grouping, sorting, bindings, lambdas, and the
// error taxonomy surfaced at the public API.

use std::cell::Cell;
use std::rc::Rc;

use jsonata_engine::{compile, evaluate, jvalue, JValue};

/// The order book most of the path tests run against.
fn order_data() -> JValue {
    JValue::from(serde_json::json!({
        "A": {
            "O": [
                {"P": "Hat",   "N": 2, "U": 9.99},
                {"P": "Shoes", "N": 1, "U": 49.99},
                {"P": "Shirt", "N": 3, "U": 24.99}
            ]
        }
    }))
}

fn eval_ok(expr: &str, data: &JValue) -> JValue {
    evaluate(expr, data).unwrap_or_else(|e| panic!("{} failed: {}", expr, e))
}

// ── Basic navigation ─────────────────────────────────────────────────────────

#[test]
fn test_simple_field_access() {
    let data = jvalue!({"name": "Alice", "age": 30.0});
    assert_eq!(eval_ok("name", &data), jvalue!("Alice"));
}

#[test]
fn test_nested_field_access() {
    let data = jvalue!({"user": {"profile": {"name": "Bob"}}});
    assert_eq!(eval_ok("user.profile.name", &data), jvalue!("Bob"));
}

#[test]
fn test_deep_nesting() {
    let data = jvalue!({"a": {"b": {"c": {"d": {"e": "deep value"}}}}});
    assert_eq!(eval_ok("a.b.c.d.e", &data), jvalue!("deep value"));
}

#[test]
fn test_missing_field_returns_null() {
    let data = jvalue!({"name": "Alice"});
    assert_eq!(eval_ok("missing_field", &data), JValue::Null);
}

#[test]
fn test_null_valued_field_is_returned() {
    // a present key holding null is not the same as an absent key
    let data = jvalue!({"a": {"b": null}});
    assert_eq!(eval_ok("a.b", &data), jvalue!(null));
}

#[test]
fn test_quoted_field_names() {
    let data = jvalue!({"odd name": {"another one": 7.0}});
    assert_eq!(eval_ok("`odd name`.`another one`", &data), jvalue!(7.0));
}

#[test]
fn test_context_equals_root_at_top_level() {
    let data = jvalue!({"x": 1.0});
    assert_eq!(eval_ok("$ = $$", &data), jvalue!(true));
}

// ── Operators ────────────────────────────────────────────────────────────────

#[test]
fn test_arithmetic_expression() {
    let data = jvalue!({"price": 100.0, "quantity": 5.0});
    assert_eq!(eval_ok("price * quantity", &data), jvalue!(500.0));
    assert_eq!(eval_ok("(price + 10) * quantity", &data), jvalue!(550.0));
    assert_eq!(eval_ok("17 % 5", &data), jvalue!(2.0));
    assert_eq!(eval_ok("-price", &data), jvalue!(-100.0));
}

#[test]
fn test_comparison_and_logic() {
    let data = jvalue!({"age": 25.0, "has_license": true});
    assert_eq!(eval_ok("age > 18", &data), jvalue!(true));
    assert_eq!(eval_ok("age >= 18 and has_license", &data), jvalue!(true));
    assert_eq!(eval_ok("age < 18 or has_license", &data), jvalue!(true));
    assert_eq!(eval_ok("\"Alice\" < \"Bob\"", &data), jvalue!(true));
}

#[test]
fn test_string_concatenation() {
    let data = jvalue!({"first": "Hello", "second": "World"});
    assert_eq!(eval_ok("first & \" \" & second", &data), jvalue!("Hello World"));
}

#[test]
fn test_conditional_expression() {
    let data = jvalue!({"score": 75.0});
    assert_eq!(
        eval_ok(
            "score >= 90 ? \"A\" : (score >= 80 ? \"B\" : (score >= 70 ? \"C\" : \"F\"))",
            &data
        ),
        jvalue!("C")
    );
}

#[test]
fn test_in_operator() {
    let data = jvalue!({"value": 3.0, "list": [1.0, 2.0, 3.0]});
    assert_eq!(eval_ok("value in list", &data), jvalue!(true));
}

#[test]
fn test_block_returns_last_expression() {
    assert_eq!(eval_ok("(1; 2; 3)", &jvalue!(null)), jvalue!(3.0));
}

// ── Constructors and boundary cases ──────────────────────────────────────────

#[test]
fn test_array_and_object_literals() {
    let data = jvalue!({"a": 1.0, "b": 2.0, "x": 10.0, "y": 20.0});
    assert_eq!(eval_ok("[a, b]", &data), jvalue!([1.0, 2.0]));
    assert_eq!(
        eval_ok("{\"sum\": x + y, \"product\": x * y}", &data),
        jvalue!({"sum": 30.0, "product": 200.0})
    );
    assert_eq!(eval_ok("[]", &data), jvalue!([]));
    assert_eq!(eval_ok("{}", &data), jvalue!({}));
}

#[test]
fn test_undefined_value_omits_object_key() {
    assert_eq!(eval_ok("{\"k\": ()}", &jvalue!(null)), jvalue!({}));
}

#[test]
fn test_range_boundaries() {
    let data = jvalue!(null);
    assert_eq!(eval_ok("[1..5]", &data), jvalue!([1.0, 2.0, 3.0, 4.0, 5.0]));
    assert_eq!(eval_ok("[1..1]", &data), jvalue!([1.0]));
    assert_eq!(eval_ok("[5..3]", &data), jvalue!([]));
}

#[test]
fn test_keep_array_on_scalar() {
    let data = jvalue!({"obj": {"x": 1.0}});
    assert_eq!(eval_ok("obj[]", &data), jvalue!([{"x": 1.0}]));
}

#[test]
fn test_object_key_order_is_source_order() {
    let result = eval_ok("{\"z\": 1, \"a\": 2, \"m\": 3}", &jvalue!(null));
    let keys: Vec<&String> = result.as_object().unwrap().keys().collect();
    assert_eq!(keys, ["z", "a", "m"]);
}

// ── The order-book scenarios ─────────────────────────────────────────────────

#[test]
fn test_projection() {
    assert_eq!(
        eval_ok("A.O.P", &order_data()),
        jvalue!(["Hat", "Shoes", "Shirt"])
    );
}

#[test]
fn test_filtered_projection() {
    assert_eq!(
        eval_ok("A.O[U > 20].P", &order_data()),
        jvalue!(["Shoes", "Shirt"])
    );
}

#[test]
fn test_aggregated_computation() {
    let expected = 9.99 * 2.0 + 49.99 * 1.0 + 24.99 * 3.0;
    assert_eq!(
        eval_ok("$sum(A.O.(U * N))", &order_data()),
        JValue::Number(expected)
    );
}

#[test]
fn test_grouping() {
    assert_eq!(
        eval_ok("A.O{P: U}", &order_data()),
        jvalue!({"Hat": 9.99, "Shoes": 49.99, "Shirt": 24.99})
    );
}

#[test]
fn test_sort_descending() {
    assert_eq!(
        eval_ok("A.O^(>U).P", &order_data()),
        jvalue!(["Shoes", "Shirt", "Hat"])
    );
}

#[test]
fn test_focus_binding_carries_item() {
    assert_eq!(
        eval_ok("A.O@$o.(P & \": \" & $string($o.U))", &order_data()),
        jvalue!(["Hat: 9.99", "Shoes: 49.99", "Shirt: 24.99"])
    );
}

#[test]
fn test_bound_variable() {
    let program = compile("A.O[0].U * $tax").unwrap();
    program.bind("tax", jvalue!(1.1));
    assert_eq!(
        program.evaluate(&order_data()).unwrap(),
        JValue::Number(9.99 * 1.1)
    );
}

#[test]
fn test_lambda_definition_and_invocation() {
    assert_eq!(
        eval_ok("($d := function($x){ $x * 2 }; $d(21))", &jvalue!(null)),
        jvalue!(42.0)
    );
}

#[test]
fn test_index_binding_projection() {
    assert_eq!(
        eval_ok("A.O#$i.{\"i\": $i, \"p\": P}", &order_data()),
        jvalue!([
            {"i": 0.0, "p": "Hat"},
            {"i": 1.0, "p": "Shoes"},
            {"i": 2.0, "p": "Shirt"}
        ])
    );
}

#[test]
fn test_parent_in_grouping_value_is_rejected() {
    // grouping is not a navigation step, so the parent reference has no
    // ancestor to bind to
    assert_eq!(
        compile("A.O[U > 20]{P: %.N}").unwrap_err().code(),
        "S0217"
    );
}

#[test]
fn test_parent_in_filter_resolves() {
    let data = jvalue!({"shop": {"currency": "EUR", "items": [
        {"name": "a", "cur": "EUR"},
        {"name": "b", "cur": "USD"}
    ]}});
    assert_eq!(
        eval_ok("shop.items[cur = %.currency].name", &data),
        jvalue!("a")
    );
}

// ── Invariants ───────────────────────────────────────────────────────────────

#[test]
fn test_determinism() {
    let program = compile("A.O^(>U).{\"p\": P, \"t\": U * N}").unwrap();
    let data = order_data();
    let first = program.evaluate(&data).unwrap();
    let second = program.evaluate(&data).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_short_circuit_suppresses_side_effects() {
    let counter = Rc::new(Cell::new(0));

    let program = compile("false and $tick()").unwrap();
    let seen = Rc::clone(&counter);
    program.register_function("tick", move |_, _, _, _| {
        seen.set(seen.get() + 1);
        Ok(JValue::Bool(true))
    });
    assert_eq!(program.evaluate(&jvalue!(null)).unwrap(), jvalue!(false));
    assert_eq!(counter.get(), 0);

    let program = compile("true or $tick()").unwrap();
    let seen = Rc::clone(&counter);
    program.register_function("tick", move |_, _, _, _| {
        seen.set(seen.get() + 1);
        Ok(JValue::Bool(true))
    });
    assert_eq!(program.evaluate(&jvalue!(null)).unwrap(), jvalue!(true));
    assert_eq!(counter.get(), 0);
}

#[test]
fn test_closure_is_stable_across_call_sites() {
    let expr = "(
        $base := 100;
        $f := function($x){ $x + $base };
        [$f(1), [$f(1)][0], (true ? $f(1) : 0)]
    )";
    assert_eq!(
        eval_ok(expr, &jvalue!(null)),
        jvalue!([101.0, 101.0, 101.0])
    );
}

#[test]
fn test_evaluation_argument_order() {
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));

    let program = compile("[$mark(1), $mark(2), $mark(3)]").unwrap();
    let seen = Rc::clone(&order);
    program.register_function("mark", move |_, args, _, _| {
        let n = args.first().and_then(|v| v.as_f64()).unwrap_or(0.0);
        seen.borrow_mut().push(n as i64);
        Ok(JValue::from(n))
    });
    program.evaluate(&jvalue!(null)).unwrap();
    assert_eq!(*order.borrow(), vec![1, 2, 3]);
}

// ── Errors at the API boundary ───────────────────────────────────────────────

#[test]
fn test_type_mismatch_error() {
    let data = jvalue!({"text": "hello", "number": 42.0});
    assert_eq!(
        evaluate("text + number", &data).unwrap_err().code(),
        "T2001"
    );
}

#[test]
fn test_division_by_zero() {
    assert_eq!(
        evaluate("value / 0", &jvalue!({"value": 10.0}))
            .unwrap_err()
            .code(),
        "D1001"
    );
}

#[test]
fn test_parse_errors_surface_position() {
    let err = compile("items[price >").unwrap_err();
    assert_eq!(err.code(), "S0201");
    assert!(err.position().is_some());

    assert_eq!(compile("").unwrap_err().code(), "S0500");
    assert_eq!(compile("\"open").unwrap_err().code(), "S0101");
}

#[test]
fn test_undefined_variable_is_absent_not_error() {
    assert_eq!(eval_ok("$undefined", &jvalue!(null)), JValue::Null);
}

#[test]
fn test_call_on_non_function() {
    assert_eq!(
        evaluate("$x(1)", &jvalue!(null)).unwrap_err().code(),
        "T1005"
    );
}

// ── Larger compositions ──────────────────────────────────────────────────────

#[test]
fn test_invoice_restructuring() {
    let data = JValue::from(serde_json::json!({
        "order": {
            "id": "ORD-123",
            "items": [
                {"name": "Laptop", "price": 1000, "quantity": 1},
                {"name": "Mouse",  "price": 25,   "quantity": 2}
            ],
            "customer": {"name": "Alice Smith", "type": "premium"}
        }
    }));

    assert_eq!(eval_ok("order.customer.name", &data), jvalue!("Alice Smith"));
    assert_eq!(
        eval_ok("order.customer.type = \"premium\"", &data),
        jvalue!(true)
    );
    assert_eq!(
        eval_ok("$sum(order.items.(price * quantity))", &data),
        jvalue!(1050.0)
    );
    assert_eq!(
        eval_ok(
            "{\"invoice\": order.id, \"lines\": order.items.{\"sku\": name, \"total\": price * quantity}}",
            &data
        ),
        jvalue!({
            "invoice": "ORD-123",
            "lines": [
                {"sku": "Laptop", "total": 1000.0},
                {"sku": "Mouse", "total": 50.0}
            ]
        })
    );
}

#[test]
fn test_wildcard_and_descendant_search() {
    let data = jvalue!({
        "a": {"id": 1.0},
        "b": [{"id": 2.0}, {"id": 3.0}]
    });
    assert_eq!(eval_ok("*.id", &data), jvalue!([1.0, 2.0, 3.0]));
    assert_eq!(eval_ok("$sum(**.id)", &data), jvalue!(6.0));
}

#[test]
fn test_chain_pipeline_over_paths() {
    let data = order_data();
    assert_eq!(
        eval_ok("A.O.U ~> $sort ~> $reverse", &data),
        jvalue!([49.99, 24.99, 9.99])
    );
}

#[test]
fn test_evaluate_json_round_trip() {
    let program = compile("A.O[U > 20].P").unwrap();
    let input = r#"{"A":{"O":[{"P":"Hat","U":9.99},{"P":"Shoes","U":49.99}]}}"#;
    assert_eq!(program.evaluate_json(input).unwrap(), "\"Shoes\"");
}
