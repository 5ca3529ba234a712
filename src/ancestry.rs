// Ancestry resolution
//
// The parent operator % refers to the value a path step was navigated from.
// Rather than giving AST nodes parent pointers, this pass allocates a
// labelled slot per % occurrence and stamps the label onto the ancestor step
// that must bind it: the step `level` navigation hops up from the reference.
// At evaluation time the step binds the label to its own input context, and
// the % node reads it back from the environment.
//
// Slots that cannot be attached anywhere propagate upward; a slot still
// unresolved at the expression root (or escaping a lambda body, which is
// self-contained) rejects the expression with S0217.

use crate::ast::{Node, NodeKind, ParentSlot};
use crate::error::Error;

/// A slot still looking for its ancestor step.
struct Seeking {
    slot: ParentSlot,
    position: usize,
}

struct Resolver {
    next_slot: usize,
}

/// Resolve every `%` in the tree, returning the stamped tree.
pub fn resolve(node: Node) -> Result<Node, Error> {
    let mut resolver = Resolver { next_slot: 0 };
    let (node, seeking) = resolver.process(node)?;
    if let Some(s) = seeking.first() {
        return Err(Error::UnresolvedParent {
            position: s.position,
        });
    }
    Ok(node)
}

impl Resolver {
    fn new_slot(&mut self) -> ParentSlot {
        let slot = ParentSlot::new(self.next_slot);
        self.next_slot += 1;
        slot
    }

    /// Process one node, returning the rewritten node and the slots that
    /// emerged from it without finding their ancestor.
    fn process(&mut self, mut node: Node) -> Result<(Node, Vec<Seeking>), Error> {
        let position = node.position;
        let mut seeking: Vec<Seeking> = Vec::new();

        node.kind = match node.kind {
            NodeKind::Parent { .. } => {
                let slot = self.new_slot();
                let label = slot.label.clone();
                seeking.push(Seeking { slot, position });
                NodeKind::Parent { label: Some(label) }
            }

            NodeKind::Path { steps } => {
                let mut processed: Vec<Node> = Vec::with_capacity(steps.len());
                let mut per_step: Vec<Vec<Seeking>> = Vec::with_capacity(steps.len());
                for step in steps {
                    let (step, slots) = self.process(step)?;
                    processed.push(step);
                    per_step.push(slots);
                }
                // Resolve each step's slots against the steps to its left
                for (i, slots) in per_step.into_iter().enumerate() {
                    for mut s in slots {
                        let mut resolved = false;
                        for j in (0..i).rev() {
                            if seek_in(&mut processed[j], &mut s) {
                                resolved = true;
                                break;
                            }
                        }
                        if !resolved {
                            seeking.push(s);
                        }
                    }
                }
                NodeKind::Path { steps: processed }
            }

            NodeKind::Filter { expr, predicate } => {
                let (mut expr, expr_slots) = self.process(*expr)?;
                seeking.extend(expr_slots);
                let (predicate, pred_slots) = self.process(*predicate)?;
                // The predicate's parent is the filtered expression
                for mut s in pred_slots {
                    if !seek_in(&mut expr, &mut s) {
                        seeking.push(s);
                    }
                }
                NodeKind::Filter {
                    expr: Box::new(expr),
                    predicate: Box::new(predicate),
                }
            }

            NodeKind::Sort { expr, terms } => {
                let (mut expr, expr_slots) = self.process(*expr)?;
                seeking.extend(expr_slots);
                let mut processed_terms = Vec::with_capacity(terms.len());
                for mut term in terms {
                    let (term_expr, term_slots) = self.process(term.expr)?;
                    term.expr = term_expr;
                    // Sort keys see the sorted expression as their parent
                    for mut s in term_slots {
                        if !seek_in(&mut expr, &mut s) {
                            seeking.push(s);
                        }
                    }
                    processed_terms.push(term);
                }
                NodeKind::Sort {
                    expr: Box::new(expr),
                    terms: processed_terms,
                }
            }

            NodeKind::Focus { expr, name } => {
                let (expr, slots) = self.process(*expr)?;
                seeking.extend(slots);
                NodeKind::Focus {
                    expr: Box::new(expr),
                    name,
                }
            }

            NodeKind::IndexBind { expr, name } => {
                let (expr, slots) = self.process(*expr)?;
                seeking.extend(slots);
                NodeKind::IndexBind {
                    expr: Box::new(expr),
                    name,
                }
            }

            NodeKind::Lambda { params, body } => {
                // A lambda body is self-contained: its parent references must
                // resolve within the body
                let body_node = std::rc::Rc::try_unwrap(body)
                    .unwrap_or_else(|rc| (*rc).clone());
                let (body, slots) = self.process(body_node)?;
                if let Some(s) = slots.first() {
                    return Err(Error::UnresolvedParent {
                        position: s.position,
                    });
                }
                NodeKind::Lambda {
                    params,
                    body: std::rc::Rc::new(body),
                }
            }

            NodeKind::Binary { op, lhs, rhs } => {
                let (lhs, s1) = self.process(*lhs)?;
                let (rhs, s2) = self.process(*rhs)?;
                seeking.extend(s1);
                seeking.extend(s2);
                NodeKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                }
            }

            NodeKind::Unary { op, operand } => {
                let (operand, slots) = self.process(*operand)?;
                seeking.extend(slots);
                NodeKind::Unary {
                    op,
                    operand: Box::new(operand),
                }
            }

            NodeKind::ArrayConstructor(elements) => {
                let mut processed = Vec::with_capacity(elements.len());
                for e in elements {
                    let (e, slots) = self.process(e)?;
                    seeking.extend(slots);
                    processed.push(e);
                }
                NodeKind::ArrayConstructor(processed)
            }

            NodeKind::ObjectConstructor(pairs) => {
                let mut processed = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let (k, s1) = self.process(k)?;
                    let (v, s2) = self.process(v)?;
                    seeking.extend(s1);
                    seeking.extend(s2);
                    processed.push((k, v));
                }
                NodeKind::ObjectConstructor(processed)
            }

            NodeKind::GroupBy { expr, pairs } => {
                let (expr, expr_slots) = self.process(*expr)?;
                seeking.extend(expr_slots);
                let mut processed = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    let (k, s1) = self.process(k)?;
                    let (v, s2) = self.process(v)?;
                    // Grouping is not a navigation step; slots keep seeking
                    seeking.extend(s1);
                    seeking.extend(s2);
                    processed.push((k, v));
                }
                NodeKind::GroupBy {
                    expr: Box::new(expr),
                    pairs: processed,
                }
            }

            NodeKind::Block(exprs) => {
                let mut processed = Vec::with_capacity(exprs.len());
                for e in exprs {
                    let (e, slots) = self.process(e)?;
                    seeking.extend(slots);
                    processed.push(e);
                }
                NodeKind::Block(processed)
            }

            NodeKind::Assignment { name, value } => {
                let (value, slots) = self.process(*value)?;
                seeking.extend(slots);
                NodeKind::Assignment {
                    name,
                    value: Box::new(value),
                }
            }

            NodeKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                let (condition, s1) = self.process(*condition)?;
                let (then_branch, s2) = self.process(*then_branch)?;
                seeking.extend(s1);
                seeking.extend(s2);
                let else_branch = match else_branch {
                    Some(e) => {
                        let (e, s3) = self.process(*e)?;
                        seeking.extend(s3);
                        Some(Box::new(e))
                    }
                    None => None,
                };
                NodeKind::Conditional {
                    condition: Box::new(condition),
                    then_branch: Box::new(then_branch),
                    else_branch,
                }
            }

            NodeKind::FunctionCall { callee, args } => {
                let (callee, s1) = self.process(*callee)?;
                seeking.extend(s1);
                let mut processed = Vec::with_capacity(args.len());
                for a in args {
                    let (a, slots) = self.process(a)?;
                    seeking.extend(slots);
                    processed.push(a);
                }
                NodeKind::FunctionCall {
                    callee: Box::new(callee),
                    args: processed,
                }
            }

            NodeKind::Range { start, end } => {
                let (start, s1) = self.process(*start)?;
                let (end, s2) = self.process(*end)?;
                seeking.extend(s1);
                seeking.extend(s2);
                NodeKind::Range {
                    start: Box::new(start),
                    end: Box::new(end),
                }
            }

            NodeKind::Transform {
                pattern,
                update,
                delete,
            } => {
                let (pattern, s1) = self.process(*pattern)?;
                let (update, s2) = self.process(*update)?;
                seeking.extend(s1);
                seeking.extend(s2);
                let delete = match delete {
                    Some(d) => {
                        let (d, s3) = self.process(*d)?;
                        seeking.extend(s3);
                        Some(Box::new(d))
                    }
                    None => None,
                };
                NodeKind::Transform {
                    pattern: Box::new(pattern),
                    update: Box::new(update),
                    delete,
                }
            }

            // Leaves
            leaf => leaf,
        };

        Ok((node, seeking))
    }
}

/// Walk one step (right to left through composite structures) looking for
/// the ancestor a slot needs. Returns true once the label is attached.
fn seek_in(node: &mut Node, s: &mut Seeking) -> bool {
    match &mut node.kind {
        // Crossing another parent reference moves the target one level up
        NodeKind::Parent { .. } => {
            s.slot.level += 1;
            false
        }
        // A focus binding keeps the navigation context at the parent level,
        // so it is transparent to parent references
        NodeKind::Focus { .. } => false,
        // The navigation inside a filter/sort/index step is its target
        NodeKind::Filter { expr, .. } => seek_in(expr, s),
        NodeKind::Sort { expr, .. } => seek_in(expr, s),
        NodeKind::IndexBind { expr, .. } => seek_in(expr, s),
        NodeKind::Path { steps } => {
            for step in steps.iter_mut().rev() {
                if seek_in(step, s) {
                    return true;
                }
            }
            false
        }
        NodeKind::Block(exprs) => match exprs.last_mut() {
            Some(last) => seek_in(last, s),
            None => false,
        },
        // Any other step is one navigation hop
        _ => {
            s.slot.level -= 1;
            if s.slot.level == 0 {
                node.ancestors.push(s.slot.label.clone());
                true
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn path_steps(node: Node) -> Vec<Node> {
        match node.kind {
            NodeKind::Path { steps } => steps,
            other => panic!("expected path, got {:?}", other),
        }
    }

    #[test]
    fn test_parent_attaches_to_previous_step() {
        // In a.b.%, the % refers to the value a.b was navigated from,
        // so the label lands on step b
        let steps = path_steps(parser::parse("a.b.%").unwrap());
        assert!(steps[0].ancestors.is_empty());
        assert_eq!(steps[1].ancestors.len(), 1);
        match &steps[2].kind {
            NodeKind::Parent { label } => {
                assert_eq!(label.as_deref(), Some(steps[1].ancestors[0].as_str()));
            }
            other => panic!("expected parent, got {:?}", other),
        }
    }

    #[test]
    fn test_double_parent_attaches_higher() {
        // %.% climbs two levels: the second slot lands on step a
        let steps = path_steps(parser::parse("a.b.%.%").unwrap());
        assert_eq!(steps[1].ancestors.len(), 1);
        assert_eq!(steps[0].ancestors.len(), 1);
    }

    #[test]
    fn test_parent_in_filter_predicate() {
        // The predicate's parent reference resolves against the filtered step
        let steps = path_steps(parser::parse("a.b[%.x = 1]").unwrap());
        match &steps[1].kind {
            NodeKind::Filter { expr, .. } => {
                assert_eq!(expr.ancestors.len(), 1);
            }
            other => panic!("expected filter, got {:?}", other),
        }
    }

    #[test]
    fn test_focus_is_transparent() {
        // The focus step keeps the navigation context at the parent level,
        // so % skips it and lands on the step before
        let steps = path_steps(parser::parse("a.b@$v.%").unwrap());
        assert_eq!(steps[0].ancestors.len(), 1);
        assert!(steps[1].ancestors.is_empty());
    }

    #[test]
    fn test_unresolved_parent_is_rejected() {
        assert_eq!(parser::parse("%").unwrap_err().code(), "S0217");
        assert_eq!(parser::parse("%.x").unwrap_err().code(), "S0217");
        // Too many levels for the path
        assert_eq!(parser::parse("a.%.%").unwrap_err().code(), "S0217");
    }

    #[test]
    fn test_parent_does_not_escape_lambda() {
        assert_eq!(
            parser::parse("a.b.(function(){ % })()").unwrap_err().code(),
            "S0217"
        );
    }

    #[test]
    fn test_labels_are_unique() {
        let steps = path_steps(parser::parse("a.b.%.c.%").unwrap());
        let mut labels: Vec<String> = steps
            .iter()
            .flat_map(|s| s.ancestors.iter().cloned())
            .collect();
        assert_eq!(labels.len(), 2);
        labels.dedup();
        assert_eq!(labels.len(), 2);
    }
}
