//! RazorForge Compiler Library
//!
//! Compiles RazorForge (`.rf`) and Suflae (`.sf`) source to LLVM textual
//! IR. The pipeline is source text → tokens → AST → analyzed AST →
//! IR text; turning the `.ll` output into objects and executables is the
//! job of an external `clang`.
//!
//! ```rust,ignore
//! use forgec::{compile_source, CompilerConfig};
//!
//! let result = compile_source(
//!     "routine main() -> s32 { return 0 }",
//!     "main.rf",
//!     &CompilerConfig::new(),
//! );
//! assert!(result.success);
//! let ir = result.ir.unwrap();
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod span;
pub mod symbols;
pub mod token;
pub mod typechecker;
pub mod types;
pub mod variants;

pub use ast::Program;
pub use codegen::{host_target, CodeGen, TargetPlatform};
pub use config::CompilerConfig;
pub use diagnostics::{has_errors, Diagnostic, DiagnosticFormatter, Severity};
pub use lexer::Lexer;
pub use parser::Parser;
pub use resolver::{ModuleSet, Resolver};
pub use span::Span;
pub use token::{Dialect, Token, TokenKind};
pub use typechecker::{Analysis, TypeChecker};
pub use variants::generate_variants;

use crate::ast::Declaration;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Everything a compilation produces.
#[derive(Debug)]
pub struct CompileResult {
    /// LLVM textual IR; absent when errors blocked emission
    pub ir: Option<String>,
    /// The readable lowered listing (the `.out` artifact)
    pub listing: String,
    pub diagnostics: Vec<Diagnostic>,
    /// False when any Error or Fatal diagnostic was reported
    pub success: bool,
}

/// Tokenize a source string, selecting the dialect from the file suffix.
pub fn tokenize(source: &str, file: impl Into<PathBuf>) -> (Vec<Token>, Vec<Diagnostic>) {
    let file = file.into();
    let dialect = Dialect::from_path(&file);
    lexer::tokenize(source, file, dialect)
}

/// Run the full pipeline over one source string.
pub fn compile_source(
    source: &str,
    file: impl Into<PathBuf>,
    config: &CompilerConfig,
) -> CompileResult {
    let file = file.into();
    let dialect = config.dialect.unwrap_or_else(|| Dialect::from_path(&file));
    tracing::debug!(file = %file.display(), ?dialect, "compilation started");

    let mut diagnostics = Vec::new();

    // Tokens and AST
    let (mut program, mut parse_diagnostics) =
        Parser::new(source, file.clone(), dialect).parse();
    diagnostics.append(&mut parse_diagnostics);

    // Import graph
    let (modules, mut resolve_diagnostics) =
        Resolver::new(config.search_paths.clone()).resolve(&program);
    diagnostics.append(&mut resolve_diagnostics);

    // Variant functions are injected before analysis; the analyzer
    // registers their signatures but skips their bodies.
    let error_choices = collect_error_choices(&program, &modules);
    variants::generate_variants(&mut program, &error_choices);

    // Semantic analysis
    let mut analysis = TypeChecker::new().check_program(&program, &modules);
    diagnostics.append(&mut analysis.diagnostics);

    let listing = render_listing(&program, &analysis);

    // Semantic errors short-circuit emission unless the caller asked for
    // run-after-error.
    let blocked = has_errors(&diagnostics) && !config.run_after_error;
    let ir = if blocked {
        None
    } else {
        let mut emitter = CodeGen::new(&analysis, config.target.clone());
        match emitter.generate(&program) {
            Ok(ir) => {
                diagnostics.extend(emitter.diagnostics().iter().cloned());
                Some(ir)
            }
            Err(error) => {
                diagnostics.push(Diagnostic::fatal(
                    diagnostics::codes::INTERNAL_ERROR,
                    program.span.clone(),
                    format!("IR emission failed: {}", error),
                ));
                None
            }
        }
    };

    let success = !has_errors(&diagnostics);
    tracing::debug!(success, diagnostics = diagnostics.len(), "compilation finished");
    CompileResult {
        ir,
        listing,
        diagnostics,
        success,
    }
}

/// Compile a file on disk and write the `X.out` and `X.ll` artifacts next
/// to it.
pub fn compile_file(path: &Path, config: &CompilerConfig) -> std::io::Result<CompileResult> {
    let source = std::fs::read_to_string(path)?;
    let result = compile_source(&source, path, config);

    let formatter = DiagnosticFormatter::new(config.color_diagnostics);
    let mut out_text = result.listing.clone();
    if !result.diagnostics.is_empty() {
        out_text.push('\n');
        out_text.push_str(&formatter.format_all(&result.diagnostics, &source));
    }
    std::fs::write(path.with_extension("out"), out_text)?;

    if let Some(ir) = &result.ir {
        std::fs::write(path.with_extension("ll"), ir)?;
    }
    Ok(result)
}

/// Choice types with an error arm mark the functions returning them as
/// fallible. This is a syntactic scan so it can run before analysis.
fn collect_error_choices(program: &Program, modules: &ModuleSet) -> HashSet<String> {
    let mut names = HashSet::new();
    let declarations = program
        .declarations
        .iter()
        .chain(modules.modules.iter().flat_map(|m| m.program.declarations.iter()));
    for declaration in declarations {
        if let Declaration::Choice(choice) = declaration {
            let has_error_arm = choice
                .variants
                .iter()
                .any(|v| v.name == "Error" || v.name == "Err");
            if has_error_arm {
                names.insert(choice.name.clone());
            }
        }
    }
    names
}

/// The readable lowered form written to `X.out`: one line per resolved
/// declaration.
fn render_listing(program: &Program, analysis: &Analysis) -> String {
    let mut lines = Vec::new();
    for declaration in &program.declarations {
        match declaration {
            Declaration::Function(function) => {
                let Some(sig) = analysis.functions.get(&function.name) else {
                    continue;
                };
                let params: Vec<String> = sig
                    .params
                    .iter()
                    .map(|(name, ty)| format!("{}: {}", name, analysis.interner.name(*ty)))
                    .collect();
                let marker = if function.generated { " [generated]" } else { "" };
                lines.push(format!(
                    "routine {}({}) -> {}{}",
                    function.name,
                    params.join(", "),
                    analysis.interner.name(sig.ret),
                    marker
                ));
            }
            Declaration::External(external) => {
                let convention = external
                    .convention
                    .as_deref()
                    .map(|c| format!(" [{}]", c))
                    .unwrap_or_default();
                lines.push(format!("external routine {}{}", external.name, convention));
            }
            Declaration::Record(record) => {
                lines.push(format!("record {} ({} fields)", record.name, record.fields.len()));
            }
            Declaration::Entity(entity) => {
                lines.push(format!("entity {} ({} fields)", entity.name, entity.fields.len()));
            }
            Declaration::Choice(choice) => {
                lines.push(format!(
                    "choice {} ({} variants)",
                    choice.name,
                    choice.variants.len()
                ));
            }
            Declaration::Protocol(protocol) => {
                lines.push(format!(
                    "protocol {} ({} methods)",
                    protocol.name,
                    protocol.methods.len()
                ));
            }
            Declaration::Import(import) => lines.push(format!("import {}", import.dotted())),
            Declaration::Redefine(redefine) => {
                lines.push(format!("redefine {}", redefine.name));
            }
            Declaration::Variable(variable) => {
                let keyword = if variable.mutable { "var" } else { "let" };
                lines.push(format!("{} {}", keyword, variable.name));
            }
        }
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_main_to_ir() {
        let result = compile_source(
            "routine main() -> s32 { return 42 }",
            "main.rf",
            &CompilerConfig::new(),
        );
        assert!(result.success, "{:?}", result.diagnostics);
        let ir = result.ir.unwrap();
        assert!(ir.contains("define i32 @main()"));
        assert!(ir.contains("ret i32 42"));
        assert!(result.listing.contains("routine main() -> s32"));
    }

    #[test]
    fn test_lexical_error_blocks_emission() {
        let result = compile_source(
            "routine main() -> s32 { let x = \"unterminated",
            "main.rf",
            &CompilerConfig::new(),
        );
        assert!(!result.success);
        assert!(result.ir.is_none());
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == diagnostics::codes::UNTERMINATED_TEXT));
    }

    #[test]
    fn test_run_after_error_still_emits() {
        let source = "routine main() -> s32 { return missing }";
        let blocked = compile_source(source, "main.rf", &CompilerConfig::new());
        assert!(blocked.ir.is_none());

        let forced = compile_source(
            source,
            "main.rf",
            &CompilerConfig::new().with_run_after_error(true),
        );
        assert!(!forced.success);
        // Emission was attempted; the offending routine was skipped with an
        // EG diagnostic but the module preamble is still there.
        assert!(forced.ir.is_some());
    }

    #[test]
    fn test_variants_appear_in_listing_and_ir() {
        let result = compile_source(
            "routine parse!(n: s64) -> s64 { verify!(n > 0)\n    return n }",
            "main.rf",
            &CompilerConfig::new(),
        );
        assert!(result.success, "{:?}", result.diagnostics);
        assert!(result.listing.contains("routine try_parse(n: s64) -> s64 [generated]"));
        assert!(result.listing.contains("routine check_parse(n: s64) -> bool [generated]"));
        let ir = result.ir.unwrap();
        assert!(ir.contains("define i64 @try_parse"));
        assert!(ir.contains("define i1 @check_parse"));
    }

    #[test]
    fn test_suffix_selects_dialect() {
        let result = compile_source(
            "recipe main() -> s32:\n    return 7\n",
            "main.sf",
            &CompilerConfig::new(),
        );
        assert!(result.success, "{:?}", result.diagnostics);
        assert!(result.ir.unwrap().contains("ret i32 7"));
    }

    #[test]
    fn test_compile_file_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.rf");
        std::fs::write(&path, "routine main() -> s32 { return 5 }\n").unwrap();

        let result = compile_file(&path, &CompilerConfig::new()).unwrap();
        assert!(result.success);

        let ll = std::fs::read_to_string(dir.path().join("program.ll")).unwrap();
        assert!(ll.contains("define i32 @main()"));
        let out = std::fs::read_to_string(dir.path().join("program.out")).unwrap();
        assert!(out.contains("routine main() -> s32"));
    }

    #[test]
    fn test_compile_file_with_imports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("util.rf"),
            "routine seven() -> s64 { return 7 }\n",
        )
        .unwrap();
        let main_path = dir.path().join("main.rf");
        std::fs::write(
            &main_path,
            "import util\nroutine main() -> s64 { return util.seven() }\n",
        )
        .unwrap();

        let config = CompilerConfig {
            search_paths: vec![dir.path().to_path_buf()],
            ..CompilerConfig::new()
        };
        let result = compile_file(&main_path, &config).unwrap();
        assert!(result.success, "{:?}", result.diagnostics);
        assert!(result.ir.unwrap().contains("call i64 @util.seven()"));
    }

    #[test]
    fn test_import_cycle_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rf"), "import b\n").unwrap();
        std::fs::write(dir.path().join("b.rf"), "import a\n").unwrap();

        let config = CompilerConfig {
            search_paths: vec![dir.path().to_path_buf()],
            ..CompilerConfig::new()
        };
        let result = compile_source("import a\n", "main.rf", &config);
        assert!(!result.success);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == diagnostics::codes::CIRCULAR_DEPENDENCY));
    }

    #[test]
    fn test_error_choice_marks_functions_fallible() {
        let source = r#"choice Outcome {
    Fine { value: s64 },
    Error { message: text }
}
routine act() -> Outcome { return Fine(1) }"#;
        let result = compile_source(source, "main.rf", &CompilerConfig::new());
        assert!(result.success, "{:?}", result.diagnostics);
        assert!(result.listing.contains("try_act"));
    }

    #[test]
    fn test_machine_readable_diagnostics() {
        let result = compile_source("routine f() { return missing }", "main.rf", &CompilerConfig::new());
        let json = result.diagnostics[0].to_json();
        assert!(json.contains("\"code\""));
        assert!(json.contains("\"span\""));
    }
}
