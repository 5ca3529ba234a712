// Execution environment
//
// A node in a chain of lexical scopes. Variable bindings and the native
// function registry live in separate maps; lookup walks the chain with the
// nearest binding winning, and bindings shadow same-named functions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::{JValue, NativeFunction};

#[derive(Debug)]
pub struct Environment {
    parent: Option<Rc<Environment>>,
    bindings: RefCell<HashMap<String, JValue>>,
    functions: RefCell<HashMap<String, Rc<NativeFunction>>>,
}

impl Environment {
    /// A root scope with no parent.
    pub fn new() -> Rc<Self> {
        Rc::new(Environment {
            parent: None,
            bindings: RefCell::new(HashMap::new()),
            functions: RefCell::new(HashMap::new()),
        })
    }

    /// A child scope chained to `parent`.
    pub fn child(parent: &Rc<Environment>) -> Rc<Self> {
        Rc::new(Environment {
            parent: Some(Rc::clone(parent)),
            bindings: RefCell::new(HashMap::new()),
            functions: RefCell::new(HashMap::new()),
        })
    }

    /// Bind a variable in this scope.
    pub fn bind(&self, name: impl Into<String>, value: JValue) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Register a native function in this scope.
    pub fn register(&self, function: NativeFunction) {
        self.functions
            .borrow_mut()
            .insert(function.name.clone(), Rc::new(function));
    }

    /// Look up a name, walking the chain. Variables take precedence over
    /// registered functions within each scope.
    pub fn lookup(&self, name: &str) -> Option<JValue> {
        if let Some(v) = self.bindings.borrow().get(name) {
            return Some(v.clone());
        }
        if let Some(f) = self.functions.borrow().get(name) {
            return Some(JValue::NativeFn(Rc::clone(f)));
        }
        match &self.parent {
            Some(p) => p.lookup(name),
            None => None,
        }
    }

    /// Whether `name` resolves anywhere in the chain.
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name)
            || self.functions.borrow().contains_key(name)
            || self.parent.as_ref().map_or(false, |p| p.contains(name))
    }
}
