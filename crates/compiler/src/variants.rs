//! Variant generator
//!
//! Scans top-level functions for the "can fail" marker and synthesizes up
//! to three sibling declarations per fallible function `f`:
//!
//! - `try_f`: returns the value or the error, without propagating
//! - `check_f`: returns a boolean success flag; errors are suppressed
//! - `find_f`: returns the value or none
//!
//! A function can fail when its name carries the `!` marker, when it
//! returns a choice with an error arm, or when its body reaches an error
//! throw (`verify!`, `breach!`, `stop!`, a checked operator, or `?`
//! propagation). Synthesized declarations share the original body (node
//! ids included, so the analyzer's side tables keep working), carry spans
//! copied from the original, and are flagged `generated` so semantic
//! re-analysis skips them.

use crate::ast::*;
use std::collections::HashSet;

/// Prefixes of the synthesized variant family.
pub const VARIANT_PREFIXES: [&str; 3] = ["try_", "check_", "find_"];

/// Append variant functions to the program. `error_choices` names the
/// choice types that carry an error arm, so returning one of them also
/// marks a function fallible. Returns the synthesized names.
pub fn generate_variants(program: &mut Program, error_choices: &HashSet<String>) -> Vec<String> {
    let mut synthesized = Vec::new();
    let mut generated_decls = Vec::new();
    let existing: HashSet<String> = program
        .declarations
        .iter()
        .filter_map(|d| d.name().map(str::to_string))
        .collect();

    for declaration in &program.declarations {
        let Declaration::Function(function) = declaration else {
            continue;
        };
        if function.generated || !is_fallible(function, error_choices) {
            continue;
        }

        for prefix in VARIANT_PREFIXES {
            let name = format!("{}{}", prefix, function.name);
            if existing.contains(&name) {
                continue;
            }
            let return_type = match prefix {
                // check_f answers success/failure only
                "check_" => Some(TypeExpr {
                    kind: TypeExprKind::Named {
                        name: "bool".to_string(),
                        generic_args: vec![],
                    },
                    span: function.span.clone(),
                }),
                _ => function.return_type.clone(),
            };
            generated_decls.push(Declaration::Function(FunctionDecl {
                id: function.id,
                name,
                doc: None,
                visibility: function.visibility,
                generic_params: function.generic_params.clone(),
                params: function.params.clone(),
                return_type,
                body: function.body.clone(),
                can_fail: false,
                generated: true,
                span: function.span.clone(),
            }));
        }
    }

    for declaration in &generated_decls {
        if let Some(name) = declaration.name() {
            synthesized.push(name.to_string());
        }
    }
    tracing::debug!(count = synthesized.len(), "variant functions synthesized");
    program.declarations.extend(generated_decls);
    synthesized
}

/// The "can fail" test.
fn is_fallible(function: &FunctionDecl, error_choices: &HashSet<String>) -> bool {
    if function.can_fail {
        return true;
    }
    if let Some(TypeExprKind::Named { name, .. }) =
        function.return_type.as_ref().map(|t| &t.kind)
    {
        if error_choices.contains(name) {
            return true;
        }
    }
    match &function.body {
        Some(body) => {
            let mut finder = ThrowFinder { found: false };
            walk_block(&mut finder, body);
            finder.found
        }
        None => false,
    }
}

/// Looks for anything that can raise at runtime.
struct ThrowFinder {
    found: bool,
}

impl Visitor for ThrowFinder {
    type Output = ();

    fn visit_expression(&mut self, expression: &Expression) {
        match &expression.kind {
            ExprKind::Call { callee, .. } => {
                if let ExprKind::Identifier(name) = &callee.kind {
                    if matches!(name.as_str(), "verify!" | "breach!" | "stop!") {
                        self.found = true;
                    }
                }
            }
            ExprKind::Binary { op, .. } => {
                if op.overflow_behavior() == Some(OverflowBehavior::Checked) {
                    self.found = true;
                }
            }
            ExprKind::Propagate { .. } => {
                self.found = true;
            }
            _ => {}
        }
        walk_expression(self, expression);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::token::Dialect;

    fn parse(source: &str) -> Program {
        let (program, diagnostics) =
            Parser::new(source, "test.rf", Dialect::RazorForge).parse();
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        program
    }

    fn names(program: &Program) -> Vec<&str> {
        program
            .declarations
            .iter()
            .filter_map(|d| d.name())
            .collect()
    }

    #[test]
    fn test_bang_marker_generates_three_variants() {
        let mut program = parse("routine parse!(input: text) -> s64 { return 1 }");
        let synthesized = generate_variants(&mut program, &HashSet::new());
        assert_eq!(synthesized, vec!["try_parse", "check_parse", "find_parse"]);
        assert_eq!(
            names(&program),
            vec!["parse", "try_parse", "check_parse", "find_parse"]
        );
    }

    #[test]
    fn test_generated_flag_and_span_copied() {
        let mut program = parse("routine parse!(input: text) -> s64 { return 1 }");
        generate_variants(&mut program, &HashSet::new());
        let original_span = program.find_function("parse").unwrap().span.clone();
        let generated = program.find_function("try_parse").unwrap();
        assert!(generated.generated);
        assert!(!generated.can_fail);
        assert_eq!(generated.span, original_span);
        // The wrapper shares the original body
        assert_eq!(
            generated.body,
            program.find_function("parse").unwrap().body
        );
    }

    #[test]
    fn test_check_variant_returns_bool() {
        let mut program = parse("routine parse!(input: text) -> s64 { return 1 }");
        generate_variants(&mut program, &HashSet::new());
        let check = program.find_function("check_parse").unwrap();
        assert_eq!(check.return_type.as_ref().unwrap().head_name(), "bool");
        let find = program.find_function("find_parse").unwrap();
        assert_eq!(find.return_type.as_ref().unwrap().head_name(), "s64");
    }

    #[test]
    fn test_infallible_function_untouched() {
        let mut program = parse("routine add(a: s64, b: s64) -> s64 { return a + b }");
        let synthesized = generate_variants(&mut program, &HashSet::new());
        assert!(synthesized.is_empty());
        assert_eq!(names(&program), vec!["add"]);
    }

    #[test]
    fn test_body_throw_marks_fallible() {
        let mut program =
            parse("routine guard(n: s64) -> s64 { verify!(n > 0, \"negative\")\n    return n }");
        let synthesized = generate_variants(&mut program, &HashSet::new());
        assert_eq!(synthesized.len(), 3);

        let mut program = parse("routine sum(a: s64, b: s64) -> s64 { return a +? b }");
        let synthesized = generate_variants(&mut program, &HashSet::new());
        assert_eq!(synthesized.len(), 3);
    }

    #[test]
    fn test_error_arm_return_marks_fallible() {
        let mut program = parse("routine open(path: text) -> Outcome { return Ok() }");
        let mut error_choices = HashSet::new();
        error_choices.insert("Outcome".to_string());
        let synthesized = generate_variants(&mut program, &error_choices);
        assert_eq!(synthesized.len(), 3);
    }

    #[test]
    fn test_existing_name_not_clobbered() {
        let source = "routine parse!(input: text) -> s64 { return 1 }\nroutine try_parse(input: text) -> s64 { return 2 }";
        let mut program = parse(source);
        let synthesized = generate_variants(&mut program, &HashSet::new());
        assert_eq!(synthesized, vec!["check_parse", "find_parse"]);
    }

    #[test]
    fn test_generation_is_idempotent() {
        let mut program = parse("routine parse!(input: text) -> s64 { return 1 }");
        generate_variants(&mut program, &HashSet::new());
        let before = program.declarations.len();
        // Generated declarations are skipped on a second pass
        let synthesized = generate_variants(&mut program, &HashSet::new());
        assert!(synthesized.is_empty());
        assert_eq!(program.declarations.len(), before);
    }
}
