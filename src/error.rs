// Coded error taxonomy
//
// One variant per diagnostic code. S0xxx are lex/parse errors, T0xxx-T2xxx
// are type errors raised during evaluation, D1xxx-D3xxx are dynamic runtime
// errors. The code string is stable API; the variant names describe the
// condition.

use thiserror::Error;

/// Any error raised while compiling or evaluating an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ── Tokenizer ────────────────────────────────────────────────────────────
    #[error("S0101 @ {position}: string literal must be terminated by a matching quote")]
    UnterminatedString { position: usize },

    #[error("S0102 @ {position}: number out of range: {token}")]
    NumberOutOfRange { position: usize, token: String },

    #[error("S0103 @ {position}: unsupported escape sequence: \\{escape}")]
    UnsupportedEscape { position: usize, escape: String },

    #[error("S0105 @ {position}: quoted property name must be terminated with a backquote")]
    UnterminatedQuotedName { position: usize },

    #[error("S0106 @ {position}: comment has no closing tag")]
    UnterminatedComment { position: usize },

    #[error("S0204 @ {position}: unknown symbol: {token}")]
    UnknownSymbol { position: usize, token: String },

    // ── Parser ───────────────────────────────────────────────────────────────
    #[error("S0201 @ {position}: syntax error: {token}")]
    SyntaxError { position: usize, token: String },

    #[error("S0202 @ {position}: expected {expected}, got {found}")]
    ExpectedToken {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("S0217 @ {position}: the parent operator % cannot be derived from this expression")]
    UnresolvedParent { position: usize },

    #[error("S0301 @ {position}: empty regular expression")]
    EmptyRegex { position: usize },

    #[error("S0302 @ {position}: no terminating / in regular expression")]
    UnterminatedRegex { position: usize },

    #[error("S0301 @ {position}: invalid regular expression: {message}")]
    InvalidRegex { position: usize, message: String },

    #[error("S0401 @ {position}: parameters of a function definition must be variable names")]
    InvalidFunctionParam { position: usize },

    #[error("S0402 @ {position}: the left side of := must be a variable name")]
    InvalidAssignmentTarget { position: usize },

    #[error("S0403 @ {position}: the right side of @ must be a variable name")]
    InvalidFocusTarget { position: usize },

    #[error("S0404 @ {position}: the right side of # must be a variable name")]
    InvalidIndexTarget { position: usize },

    #[error("S0500: the expression is empty")]
    EmptyExpression,

    // ── Type errors ──────────────────────────────────────────────────────────
    #[error("T0410: argument {index} of function {name} does not match the expected shape")]
    ArgumentMismatch { name: String, index: usize },

    #[error("T1003: key in object structure must evaluate to a string; got {value}")]
    NonStringKey { value: String },

    #[error("T1005: attempted to invoke a non-function")]
    NotCallable,

    #[error("T2001: the {side} side of {op} must evaluate to a number")]
    NonNumericOperand { op: String, side: String },

    #[error("T2003: the left side of the range operator .. must evaluate to an integer")]
    RangeStartNotInteger,

    #[error("T2004: the right side of the range operator .. must evaluate to an integer")]
    RangeEndNotInteger,

    #[error("T2006: the right side of ~> must evaluate to a function")]
    ChainTargetNotCallable,

    #[error("T2007: sort keys must be of the same type; cannot compare {left} with {right}")]
    SortKeyTypeMismatch { left: String, right: String },

    #[error("T2008: sort keys must be strings or numbers; got {value}")]
    SortKeyNotComparable { value: String },

    #[error("T2009: cannot compare {left} with {right}")]
    ComparisonTypeMismatch { left: String, right: String },

    #[error("T2010: operands of {op} must be strings or numbers")]
    NotComparable { op: String },

    // ── Dynamic errors ───────────────────────────────────────────────────────
    #[error("D1001: number out of range: arithmetic produced a non-finite result")]
    NumericOverflow,

    #[error("D1009: duplicate object key: {key}")]
    DuplicateKey { key: String },

    #[error("D2002: evaluation exceeded the maximum recursion depth")]
    StackOverflow,

    #[error("D2014: range produces too many elements ({size})")]
    RangeTooLarge { size: f64 },

    #[error("D3001: attempting to invoke string function on Infinity or NaN")]
    StringOfNonFinite,

    #[error("D3010: second argument of replace function cannot be an empty string")]
    EmptyReplacePattern,

    #[error("D3013: the transform operator is not supported by this evaluator")]
    TransformUnsupported,

    #[error("D3030: unable to cast value to a number: {value}")]
    CastToNumberFailed { value: String },

    #[error("D3050: the second argument of reduce must be a function with at least two arguments")]
    ReduceArityTooSmall,

    #[error("D3060: the sqrt function cannot be applied to a negative number: {value}")]
    SqrtOfNegative { value: f64 },

    #[error("D3061: the power function produced a non-finite result: {base} ^ {exponent}")]
    PowerOverflow { base: f64, exponent: f64 },

    #[error("D3137: {message}")]
    UserError { message: String },

    #[error("I1001: input is not valid JSON: {message}")]
    InvalidJsonInput { message: String },

    #[error("D3139: the single function expected exactly 1 matching result")]
    SingleNoMatch,

    #[error("D3141: {message}")]
    AssertFailed { message: String },
}

impl Error {
    /// The stable diagnostic code for this error.
    pub fn code(&self) -> &'static str {
        use Error::*;
        match self {
            UnterminatedString { .. } => "S0101",
            NumberOutOfRange { .. } => "S0102",
            UnsupportedEscape { .. } => "S0103",
            UnterminatedQuotedName { .. } => "S0105",
            UnterminatedComment { .. } => "S0106",
            SyntaxError { .. } => "S0201",
            ExpectedToken { .. } => "S0202",
            UnknownSymbol { .. } => "S0204",
            UnresolvedParent { .. } => "S0217",
            EmptyRegex { .. } => "S0301",
            UnterminatedRegex { .. } => "S0302",
            InvalidRegex { .. } => "S0301",
            InvalidFunctionParam { .. } => "S0401",
            InvalidAssignmentTarget { .. } => "S0402",
            InvalidFocusTarget { .. } => "S0403",
            InvalidIndexTarget { .. } => "S0404",
            EmptyExpression => "S0500",
            ArgumentMismatch { .. } => "T0410",
            NonStringKey { .. } => "T1003",
            NotCallable => "T1005",
            NonNumericOperand { .. } => "T2001",
            RangeStartNotInteger => "T2003",
            RangeEndNotInteger => "T2004",
            ChainTargetNotCallable => "T2006",
            SortKeyTypeMismatch { .. } => "T2007",
            SortKeyNotComparable { .. } => "T2008",
            ComparisonTypeMismatch { .. } => "T2009",
            NotComparable { .. } => "T2010",
            NumericOverflow => "D1001",
            DuplicateKey { .. } => "D1009",
            StackOverflow => "D2002",
            RangeTooLarge { .. } => "D2014",
            StringOfNonFinite => "D3001",
            EmptyReplacePattern => "D3010",
            TransformUnsupported => "D3013",
            CastToNumberFailed { .. } => "D3030",
            ReduceArityTooSmall => "D3050",
            SqrtOfNegative { .. } => "D3060",
            PowerOverflow { .. } => "D3061",
            UserError { .. } => "D3137",
            InvalidJsonInput { .. } => "I1001",
            SingleNoMatch => "D3139",
            AssertFailed { .. } => "D3141",
        }
    }

    /// Source offset of the error, when known (lex/parse errors).
    pub fn position(&self) -> Option<usize> {
        use Error::*;
        match self {
            UnterminatedString { position }
            | NumberOutOfRange { position, .. }
            | UnsupportedEscape { position, .. }
            | UnterminatedQuotedName { position }
            | UnterminatedComment { position }
            | SyntaxError { position, .. }
            | ExpectedToken { position, .. }
            | UnknownSymbol { position, .. }
            | UnresolvedParent { position }
            | EmptyRegex { position }
            | UnterminatedRegex { position }
            | InvalidRegex { position, .. }
            | InvalidFunctionParam { position }
            | InvalidAssignmentTarget { position }
            | InvalidFocusTarget { position }
            | InvalidIndexTarget { position } => Some(*position),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Error::UnterminatedString { position: 3 }.code(), "S0101");
        assert_eq!(Error::NotCallable.code(), "T1005");
        assert_eq!(Error::NumericOverflow.code(), "D1001");
        assert_eq!(Error::RangeTooLarge { size: 2e7 }.code(), "D2014");
    }

    #[test]
    fn test_position() {
        assert_eq!(
            Error::SyntaxError {
                position: 12,
                token: ")".to_string()
            }
            .position(),
            Some(12)
        );
        assert_eq!(Error::NotCallable.position(), None);
    }

    #[test]
    fn test_display_carries_code() {
        let e = Error::DuplicateKey {
            key: "id".to_string(),
        };
        assert!(e.to_string().starts_with("D1009"));
    }
}
