// Expression parser
//
// A Pratt parser: prefix rules dispatch on the token kind in value position,
// infix rules on the operator with a binding-power table. The parser tells
// the tokenizer whether the next token is in value position, which is what
// lets `/` start a regex literal there and mean division elsewhere.

use std::rc::Rc;

use crate::ancestry;
use crate::ast::{BinaryOp, Node, NodeKind, SortTerm, UnaryOp};
use crate::error::Error;
use crate::tokenizer::{Token, TokenKind, Tokenizer};

pub struct Parser {
    tokenizer: Tokenizer,
    token: Token,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self, Error> {
        let mut tokenizer = Tokenizer::new(input);
        let token = tokenizer.next_token(true)?;
        Ok(Parser { tokenizer, token })
    }

    /// Move to the next token. `prefix` states whether that token sits in
    /// value position (enables the regex scan).
    fn advance(&mut self, prefix: bool) -> Result<(), Error> {
        self.token = self.tokenizer.next_token(prefix)?;
        Ok(())
    }

    fn expect(&mut self, expected: TokenKind, prefix: bool) -> Result<(), Error> {
        if std::mem::discriminant(&self.token.kind) == std::mem::discriminant(&expected) {
            self.advance(prefix)
        } else {
            Err(Error::ExpectedToken {
                position: self.token.position,
                expected: expected.describe(),
                found: self.token.kind.describe(),
            })
        }
    }

    fn unexpected(&self) -> Error {
        Error::SyntaxError {
            position: self.token.position,
            token: self.token.kind.describe(),
        }
    }

    /// Binding powers: `(left_bp, right_bp)`. Higher binds tighter;
    /// right-associative operators carry `right_bp < left_bp`.
    fn binding_power(token: &TokenKind) -> Option<(u8, u8)> {
        match token {
            TokenKind::ColonEqual => Some((10, 9)),
            TokenKind::Question
            | TokenKind::QuestionQuestion
            | TokenKind::QuestionColon
            | TokenKind::DotDot => Some((20, 21)),
            TokenKind::Or => Some((25, 26)),
            TokenKind::And => Some((30, 31)),
            TokenKind::Equal
            | TokenKind::NotEqual
            | TokenKind::LessThan
            | TokenKind::LessThanOrEqual
            | TokenKind::GreaterThan
            | TokenKind::GreaterThanOrEqual
            | TokenKind::In
            | TokenKind::ChainApply => Some((40, 41)),
            TokenKind::Ampersand | TokenKind::Plus | TokenKind::Minus => Some((50, 51)),
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some((60, 61)),
            TokenKind::LeftBrace => Some((70, 71)),
            TokenKind::Dot => Some((75, 76)),
            TokenKind::LeftBracket
            | TokenKind::LeftParen
            | TokenKind::At
            | TokenKind::Hash
            | TokenKind::Caret => Some((80, 81)),
            _ => None,
        }
    }

    // ── Prefix rules ─────────────────────────────────────────────────────────

    fn parse_prefix(&mut self) -> Result<Node, Error> {
        let position = self.token.position;
        match self.token.kind.clone() {
            TokenKind::Str(s) => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::String(s), position))
            }
            TokenKind::Number(n) => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Number(n), position))
            }
            TokenKind::True => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Bool(true), position))
            }
            TokenKind::False => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Bool(false), position))
            }
            TokenKind::Null => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Null, position))
            }
            TokenKind::Name(name) | TokenKind::QuotedName(name) => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Name(name), position))
            }
            // Keywords double as field names in value position
            TokenKind::And => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Name("and".to_string()), position))
            }
            TokenKind::Or => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Name("or".to_string()), position))
            }
            TokenKind::In => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Name("in".to_string()), position))
            }
            TokenKind::Variable(name) => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Variable(name), position))
            }
            TokenKind::Star => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Wildcard, position))
            }
            TokenKind::StarStar => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Descendant, position))
            }
            TokenKind::Percent => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Parent { label: None }, position))
            }
            TokenKind::Question => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Placeholder, position))
            }
            TokenKind::Regex { pattern, flags } => {
                self.advance(false)?;
                Ok(Node::new(NodeKind::Regex { pattern, flags }, position))
            }
            TokenKind::Minus => {
                self.advance(true)?;
                let operand = self.parse_expression(70)?;
                // Fold a literal operand into a negative number
                if let NodeKind::Number(n) = operand.kind {
                    Ok(Node::new(NodeKind::Number(-n), position))
                } else {
                    Ok(Node::new(
                        NodeKind::Unary {
                            op: UnaryOp::Negate,
                            operand: Box::new(operand),
                        },
                        position,
                    ))
                }
            }
            TokenKind::LeftParen => self.parse_block(position),
            TokenKind::LeftBracket => self.parse_array_constructor(position),
            TokenKind::LeftBrace => {
                self.advance(true)?;
                let pairs = self.parse_object_pairs()?;
                Ok(Node::new(NodeKind::ObjectConstructor(pairs), position))
            }
            TokenKind::Function => self.parse_lambda(position),
            TokenKind::Pipe => self.parse_transform(position),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_block(&mut self, position: usize) -> Result<Node, Error> {
        self.advance(true)?; // skip '('

        let mut expressions = Vec::new();
        if self.token.kind != TokenKind::RightParen {
            expressions.push(self.parse_expression(0)?);
            while self.token.kind == TokenKind::Semicolon {
                self.advance(true)?;
                if self.token.kind == TokenKind::RightParen {
                    break;
                }
                expressions.push(self.parse_expression(0)?);
            }
        }
        self.expect(TokenKind::RightParen, false)?;

        // Always a Block node: an assignment inside introduces its own scope
        Ok(Node::new(NodeKind::Block(expressions), position))
    }

    fn parse_array_constructor(&mut self, position: usize) -> Result<Node, Error> {
        self.advance(true)?; // skip '['

        let mut elements = Vec::new();
        if self.token.kind != TokenKind::RightBracket {
            loop {
                elements.push(self.parse_expression(0)?);
                if self.token.kind != TokenKind::Comma {
                    break;
                }
                self.advance(true)?;
            }
        }
        self.expect(TokenKind::RightBracket, false)?;
        Ok(Node::new(NodeKind::ArrayConstructor(elements), position))
    }

    fn parse_object_pairs(&mut self) -> Result<Vec<(Node, Node)>, Error> {
        let mut pairs = Vec::new();
        if self.token.kind != TokenKind::RightBrace {
            loop {
                let key = self.parse_expression(0)?;
                self.expect(TokenKind::Colon, true)?;
                let value = self.parse_expression(0)?;
                pairs.push((key, value));
                if self.token.kind != TokenKind::Comma {
                    break;
                }
                self.advance(true)?;
            }
        }
        self.expect(TokenKind::RightBrace, false)?;
        Ok(pairs)
    }

    fn parse_lambda(&mut self, position: usize) -> Result<Node, Error> {
        self.advance(false)?; // skip 'function'
        self.expect(TokenKind::LeftParen, true)?;

        let mut params = Vec::new();
        if self.token.kind != TokenKind::RightParen {
            loop {
                match &self.token.kind {
                    TokenKind::Variable(name) if !name.is_empty() && name != "$" => {
                        params.push(name.clone());
                        self.advance(false)?;
                    }
                    _ => {
                        return Err(Error::InvalidFunctionParam {
                            position: self.token.position,
                        })
                    }
                }
                if self.token.kind != TokenKind::Comma {
                    break;
                }
                self.advance(true)?;
            }
        }
        self.expect(TokenKind::RightParen, false)?;
        self.expect(TokenKind::LeftBrace, true)?;
        let body = self.parse_expression(0)?;
        self.expect(TokenKind::RightBrace, false)?;

        Ok(Node::new(
            NodeKind::Lambda {
                params,
                body: Rc::new(body),
            },
            position,
        ))
    }

    fn parse_transform(&mut self, position: usize) -> Result<Node, Error> {
        self.advance(true)?; // skip opening '|'
        let pattern = self.parse_expression(0)?;
        self.expect(TokenKind::Pipe, true)?;
        let update = self.parse_expression(0)?;
        let delete = if self.token.kind == TokenKind::Comma {
            self.advance(true)?;
            Some(Box::new(self.parse_expression(0)?))
        } else {
            None
        };
        self.expect(TokenKind::Pipe, false)?;

        Ok(Node::new(
            NodeKind::Transform {
                pattern: Box::new(pattern),
                update: Box::new(update),
                delete,
            },
            position,
        ))
    }

    // ── Infix rules ──────────────────────────────────────────────────────────

    fn parse_infix(&mut self, lhs: Node, right_bp: u8) -> Result<Node, Error> {
        let position = self.token.position;
        match self.token.kind.clone() {
            TokenKind::Dot => {
                self.advance(true)?;
                let rhs = self.parse_expression(right_bp)?;

                let mut steps = match lhs.kind {
                    NodeKind::Path { steps } => steps,
                    _ => vec![lhs],
                };
                match rhs.kind {
                    NodeKind::Path {
                        steps: mut rhs_steps,
                    } => steps.append(&mut rhs_steps),
                    _ => steps.push(rhs),
                }

                Ok(Node::new(NodeKind::Path { steps }, position))
            }

            TokenKind::LeftBracket => {
                self.advance(true)?;
                if self.token.kind == TokenKind::RightBracket {
                    // expr[] keeps singleton arrays
                    self.advance(false)?;
                    let mut node = lhs;
                    node.keep_array = true;
                    Ok(node)
                } else {
                    let predicate = self.parse_expression(0)?;
                    self.expect(TokenKind::RightBracket, false)?;
                    Ok(Node::new(
                        NodeKind::Filter {
                            expr: Box::new(lhs),
                            predicate: Box::new(predicate),
                        },
                        position,
                    ))
                }
            }

            TokenKind::LeftParen => {
                self.advance(true)?;
                let mut args = Vec::new();
                if self.token.kind != TokenKind::RightParen {
                    loop {
                        args.push(self.parse_expression(0)?);
                        if self.token.kind != TokenKind::Comma {
                            break;
                        }
                        self.advance(true)?;
                    }
                }
                self.expect(TokenKind::RightParen, false)?;
                Ok(Node::new(
                    NodeKind::FunctionCall {
                        callee: Box::new(lhs),
                        args,
                    },
                    position,
                ))
            }

            TokenKind::LeftBrace => {
                self.advance(true)?;
                let pairs = self.parse_object_pairs()?;
                Ok(Node::new(
                    NodeKind::GroupBy {
                        expr: Box::new(lhs),
                        pairs,
                    },
                    position,
                ))
            }

            TokenKind::Question => {
                self.advance(true)?;
                let then_branch = self.parse_expression(0)?;
                let else_branch = if self.token.kind == TokenKind::Colon {
                    self.advance(true)?;
                    Some(Box::new(self.parse_expression(right_bp)?))
                } else {
                    None
                };
                Ok(Node::new(
                    NodeKind::Conditional {
                        condition: Box::new(lhs),
                        then_branch: Box::new(then_branch),
                        else_branch,
                    },
                    position,
                ))
            }

            TokenKind::ColonEqual => {
                let name = match &lhs.kind {
                    NodeKind::Variable(name) if !name.is_empty() && name != "$" => name.clone(),
                    _ => {
                        return Err(Error::InvalidAssignmentTarget {
                            position: lhs.position,
                        })
                    }
                };
                self.advance(true)?;
                let value = self.parse_expression(right_bp)?;
                Ok(Node::new(
                    NodeKind::Assignment {
                        name,
                        value: Box::new(value),
                    },
                    position,
                ))
            }

            TokenKind::DotDot => {
                self.advance(true)?;
                let end = self.parse_expression(right_bp)?;
                Ok(Node::new(
                    NodeKind::Range {
                        start: Box::new(lhs),
                        end: Box::new(end),
                    },
                    position,
                ))
            }

            TokenKind::Caret => {
                self.advance(false)?;
                self.expect(TokenKind::LeftParen, true)?;
                let mut terms = Vec::new();
                loop {
                    let descending = match self.token.kind {
                        TokenKind::LessThan => {
                            self.advance(true)?;
                            false
                        }
                        TokenKind::GreaterThan => {
                            self.advance(true)?;
                            true
                        }
                        _ => false,
                    };
                    let expr = self.parse_expression(0)?;
                    terms.push(SortTerm { expr, descending });
                    if self.token.kind != TokenKind::Comma {
                        break;
                    }
                    self.advance(true)?;
                }
                self.expect(TokenKind::RightParen, false)?;
                Ok(Node::new(
                    NodeKind::Sort {
                        expr: Box::new(lhs),
                        terms,
                    },
                    position,
                ))
            }

            TokenKind::At => {
                self.advance(true)?;
                let name = match &self.token.kind {
                    TokenKind::Variable(name) if !name.is_empty() && name != "$" => name.clone(),
                    _ => {
                        return Err(Error::InvalidFocusTarget {
                            position: self.token.position,
                        })
                    }
                };
                self.advance(false)?;
                Ok(Node::new(
                    NodeKind::Focus {
                        expr: Box::new(lhs),
                        name,
                    },
                    position,
                ))
            }

            TokenKind::Hash => {
                self.advance(true)?;
                let name = match &self.token.kind {
                    TokenKind::Variable(name) if !name.is_empty() && name != "$" => name.clone(),
                    _ => {
                        return Err(Error::InvalidIndexTarget {
                            position: self.token.position,
                        })
                    }
                };
                self.advance(false)?;
                Ok(Node::new(
                    NodeKind::IndexBind {
                        expr: Box::new(lhs),
                        name,
                    },
                    position,
                ))
            }

            other => {
                let op = match other {
                    TokenKind::Plus => BinaryOp::Add,
                    TokenKind::Minus => BinaryOp::Subtract,
                    TokenKind::Star => BinaryOp::Multiply,
                    TokenKind::Slash => BinaryOp::Divide,
                    TokenKind::Percent => BinaryOp::Modulo,
                    TokenKind::Equal => BinaryOp::Equal,
                    TokenKind::NotEqual => BinaryOp::NotEqual,
                    TokenKind::LessThan => BinaryOp::LessThan,
                    TokenKind::LessThanOrEqual => BinaryOp::LessThanOrEqual,
                    TokenKind::GreaterThan => BinaryOp::GreaterThan,
                    TokenKind::GreaterThanOrEqual => BinaryOp::GreaterThanOrEqual,
                    TokenKind::And => BinaryOp::And,
                    TokenKind::Or => BinaryOp::Or,
                    TokenKind::In => BinaryOp::In,
                    TokenKind::Ampersand => BinaryOp::Concatenate,
                    TokenKind::ChainApply => BinaryOp::Apply,
                    TokenKind::QuestionQuestion => BinaryOp::Coalesce,
                    TokenKind::QuestionColon => BinaryOp::Default,
                    _ => return Err(self.unexpected()),
                };
                self.advance(true)?;
                let rhs = self.parse_expression(right_bp)?;
                Ok(Node::new(
                    NodeKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    position,
                ))
            }
        }
    }

    // ── Driver ───────────────────────────────────────────────────────────────

    fn parse_expression(&mut self, min_bp: u8) -> Result<Node, Error> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let (left_bp, right_bp) = match Self::binding_power(&self.token.kind) {
                Some(bp) => bp,
                None => break,
            };
            if left_bp < min_bp {
                break;
            }
            lhs = self.parse_infix(lhs, right_bp)?;
        }

        Ok(lhs)
    }

    pub fn parse(&mut self) -> Result<Node, Error> {
        if self.token.kind == TokenKind::Eof {
            return Err(Error::EmptyExpression);
        }
        let ast = self.parse_expression(0)?;
        if self.token.kind != TokenKind::Eof {
            return Err(self.unexpected());
        }
        Ok(ast)
    }
}

/// Parse a JSONata expression string into an evaluation-ready AST.
///
/// This is the main entry point for parsing: it runs the Pratt parser and
/// the ancestry resolution pass that binds every `%` to an ancestor step.
pub fn parse(expression: &str) -> Result<Node, Error> {
    let mut parser = Parser::new(expression)?;
    let ast = parser.parse()?;
    ancestry::resolve(ast)
}
