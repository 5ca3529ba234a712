// Abstract Syntax Tree definitions
//
// Every node carries its source position and two pieces of path bookkeeping:
// `keep_array` (the expr[] form) and `ancestors` (parent-slot labels stamped
// by the ancestry resolver onto the steps that must bind them).

use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// One node of a parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    /// Byte offset of the token that produced this node.
    pub position: usize,
    /// Set by the `expr[]` form: the result must remain an array even when
    /// it would otherwise collapse to a singleton.
    pub keep_array: bool,
    /// Parent-slot labels bound to this step's context during evaluation.
    /// Empty except on path steps that satisfy a `%` reference.
    pub ancestors: Vec<String>,
}

impl Node {
    pub fn new(kind: NodeKind, position: usize) -> Self {
        Node {
            kind,
            position,
            keep_array: false,
            ancestors: Vec::new(),
        }
    }
}

/// Node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Number literal
    Number(f64),

    /// String literal
    String(String),

    /// Boolean literal
    Bool(bool),

    /// Null literal
    Null,

    /// Field navigation step (bare or backtick-quoted name)
    Name(String),

    /// Variable reference. The empty name is bare `$` (the current context);
    /// the name `"$"` is `$$` (the root input).
    Variable(String),

    /// Wildcard step `*`
    Wildcard,

    /// Descendant step `**`
    Descendant,

    /// Parent reference `%`; `label` is assigned by the ancestry resolver.
    Parent { label: Option<String> },

    /// `?` used as a function argument (partial application)
    Placeholder,

    /// Regex literal `/pattern/flags`
    Regex { pattern: String, flags: String },

    /// Path expression: an ordered list of navigation steps
    Path { steps: Vec<Node> },

    /// Predicate/index applied to a step or expression: `expr[predicate]`
    Filter {
        expr: Box<Node>,
        predicate: Box<Node>,
    },

    /// Binary operation
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },

    /// Unary operation
    Unary { op: UnaryOp, operand: Box<Node> },

    /// Array constructor `[a, b, c]`
    ArrayConstructor(Vec<Node>),

    /// Object constructor `{k: v, ...}`
    ObjectConstructor(Vec<(Node, Node)>),

    /// Object grouping `expr { k: v, ... }`
    GroupBy {
        expr: Box<Node>,
        pairs: Vec<(Node, Node)>,
    },

    /// Block expression `(e1; e2; ...)`; always a Block so `:=` scopes
    Block(Vec<Node>),

    /// Variable assignment `$name := value`
    Assignment { name: String, value: Box<Node> },

    /// Conditional `cond ? then : else`
    Conditional {
        condition: Box<Node>,
        then_branch: Box<Node>,
        else_branch: Option<Box<Node>>,
    },

    /// Function invocation
    FunctionCall { callee: Box<Node>, args: Vec<Node> },

    /// Lambda definition `function($a, $b) { body }`
    Lambda { params: Vec<String>, body: Rc<Node> },

    /// Range `start..end`
    Range { start: Box<Node>, end: Box<Node> },

    /// Order-by `expr ^(term, ...)`
    Sort {
        expr: Box<Node>,
        terms: Vec<SortTerm>,
    },

    /// Focus binding `expr @ $name`: binds each item while the navigation
    /// context stays at the parent level
    Focus { expr: Box<Node>, name: String },

    /// Index binding `expr # $name`: binds each item's position
    IndexBind { expr: Box<Node>, name: String },

    /// Transform `|pattern|update[, delete]|` (parsed, not evaluated)
    Transform {
        pattern: Box<Node>,
        update: Box<Node>,
        delete: Option<Box<Node>>,
    },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,

    // Comparison
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Logical
    And,
    Or,

    // String
    Concatenate,

    // Membership
    In,

    // Function chaining `~>`
    Apply,

    // `??`: left unless null/absent
    Coalesce,

    // `?:`: left unless absent
    Default,
}

impl BinaryOp {
    /// Operator spelling, for diagnostics.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "=",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Concatenate => "&",
            BinaryOp::In => "in",
            BinaryOp::Apply => "~>",
            BinaryOp::Coalesce => "??",
            BinaryOp::Default => "?:",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Negation (-)
    Negate,
}

/// One term of an order-by clause: `^(expr)` ascending, `^(>expr)` descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortTerm {
    pub expr: Node,
    pub descending: bool,
}

/// A parent slot allocated during ancestry resolution. Each `%` occurrence
/// owns one slot; the resolver stamps the slot's label onto the ancestor
/// step that must bind it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParentSlot {
    pub label: String,
    pub level: usize,
    pub index: usize,
}

impl ParentSlot {
    pub fn new(index: usize) -> Self {
        ParentSlot {
            // '!' cannot appear in a variable name, so labels never collide
            // with user bindings
            label: format!("!{}", index),
            level: 1,
            index,
        }
    }
}
