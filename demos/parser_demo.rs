//! Parse expressions and print their ASTs.
//!
//! Run: cargo run --example parser_demo

use jsonata_engine::parser;

fn main() {
    let expressions = [
        "a.b.c",
        "items[price > 100].sku",
        "$sum(order.items.(price * qty))",
        "A.O^(>U).{ \"p\": P }",
        "($double := function($x){ $x * 2 }; $double(21))",
    ];

    for source in expressions {
        println!("── {}", source);
        match parser::parse(source) {
            Ok(ast) => println!("{:#?}", ast),
            Err(e) => println!("error: {}", e),
        }
        println!();
    }
}
