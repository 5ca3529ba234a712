//! Compile once, evaluate against data, print results.
//!
//! Run: cargo run --example evaluator_demo

use jsonata_engine::{compile, JValue};

fn main() {
    let data = JValue::from_json_str(
        r#"{
            "Account": {
                "Order": [
                    {"Product": "Hat",   "Quantity": 2, "Price": 9.99},
                    {"Product": "Shoes", "Quantity": 1, "Price": 49.99},
                    {"Product": "Shirt", "Quantity": 3, "Price": 24.99}
                ]
            }
        }"#,
    )
    .expect("demo data is valid JSON");

    let queries = [
        "Account.Order.Product",
        "Account.Order[Price > 20].Product",
        "$sum(Account.Order.(Price * Quantity))",
        "Account.Order^(>Price).Product",
        "Account.Order{Product: Price}",
        "Account.Order#$i.{ \"n\": $i, \"sku\": Product }",
    ];

    for source in queries {
        match compile(source) {
            Ok(program) => match program.evaluate(&data) {
                Ok(result) => println!("{}\n  => {}\n", source, result),
                Err(e) => println!("{}\n  !! {}\n", source, e),
            },
            Err(e) => println!("{}\n  !! {}\n", source, e),
        }
    }
}
