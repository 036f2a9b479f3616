//! LLVM IR code generation via text
//!
//! Lowers the annotated AST to LLVM textual IR (.ll), the way an external
//! `clang` expects it. Generating text instead of going through FFI
//! bindings keeps the emitter portable and easy to test.
//!
//! Layout of the emitted module:
//! 1. target triple + data layout for the selected platform
//! 2. runtime ABI declarations (allocators, slice ops, danger-zone ops,
//!    crash/throw entries)
//! 3. LLVM intrinsic declarations actually used by the module
//! 4. deduplicated private string constants
//! 5. one function definition per declaration
//!
//! Expression lowering is temp-SSA: every intermediate gets a fresh
//! numbered temporary whose LLVM type is tracked in a side table keyed by
//! the temp name. Function emission runs a small state machine so a
//! terminator always closes a block before the next label opens one.

pub mod platform;
pub mod runtime;
pub mod types;

mod expressions;
mod intrinsics;
mod statements;

pub use platform::{host_target, TargetPlatform};

use crate::ast::{Declaration, FunctionDecl, Program};
use crate::diagnostics::{codes, Diagnostic};
use crate::span::Span;
use crate::typechecker::Analysis;
use crate::types::TypeId;
use crate::variants::VARIANT_PREFIXES;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::PathBuf;

/// Error type for code generation operations.
///
/// Logic errors mean the annotated AST violated an emitter invariant;
/// format errors are `std::fmt::Write` failures while building IR text.
#[derive(Debug)]
pub enum CodeGenError {
    Logic(String),
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Logic(message) => write!(f, "{}", message),
            CodeGenError::Format(error) => write!(f, "IR generation error: {}", error),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<String> for CodeGenError {
    fn from(message: String) -> Self {
        CodeGenError::Logic(message)
    }
}

impl From<std::fmt::Error> for CodeGenError {
    fn from(error: std::fmt::Error) -> Self {
        CodeGenError::Format(error)
    }
}

/// Function-emission state machine.
///
/// `Outside` → `Prologue` on entering a definition, → `Body` once the
/// parameter allocas are down, → `Terminated` when a `ret`/`br`/throw
/// closes the block, back to `Body` when a new label opens, and →
/// `Complete` at the end of the definition (synthesizing `ret void` for
/// void fallthrough).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitState {
    Outside,
    Prologue,
    Body,
    Terminated,
    Complete,
}

/// A lowered value: its printable form (constant or `%temp`) plus its
/// LLVM type.
#[derive(Debug, Clone)]
pub(crate) struct Value {
    pub repr: String,
    pub ty: String,
}

impl Value {
    pub fn new(repr: impl Into<String>, ty: impl Into<String>) -> Self {
        Value {
            repr: repr.into(),
            ty: ty.into(),
        }
    }

    /// The nothing-value of statements and void calls.
    pub fn unit() -> Self {
        Value::new("", "void")
    }
}

/// Stack slot of a local variable.
#[derive(Debug, Clone)]
pub(crate) struct LocalSlot {
    /// The alloca holding the value
    pub ptr: String,
    pub llvm_ty: String,
    pub ty: TypeId,
}

pub struct CodeGen<'a> {
    pub(crate) analysis: &'a Analysis,
    pub(crate) target: TargetPlatform,

    /// Function definitions, in declaration order
    pub(crate) output: String,
    /// Deduplicated private string constants
    string_globals: String,
    string_constants: HashMap<String, String>,
    string_counter: usize,

    pub(crate) temp_counter: usize,
    pub(crate) block_counter: usize,
    /// LLVM type of every SSA temporary, keyed by temp name
    pub(crate) temp_types: HashMap<String, String>,

    pub(crate) state: EmitState,
    pub(crate) current_block: String,
    pub(crate) current_function: String,
    pub(crate) current_file: PathBuf,
    /// Lexical scopes of local slots
    pub(crate) scopes: Vec<HashMap<String, LocalSlot>>,
    /// (continue target, break target) per enclosing loop
    pub(crate) loop_stack: Vec<(String, String)>,

    /// LLVM intrinsic declarations required by emitted code
    pub(crate) used_intrinsics: BTreeSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> CodeGen<'a> {
    pub fn new(analysis: &'a Analysis, target: TargetPlatform) -> Self {
        CodeGen {
            analysis,
            target,
            output: String::new(),
            string_globals: String::new(),
            string_constants: HashMap::new(),
            string_counter: 0,
            temp_counter: 0,
            block_counter: 0,
            temp_types: HashMap::new(),
            state: EmitState::Outside,
            current_block: String::new(),
            current_function: String::new(),
            current_file: PathBuf::new(),
            scopes: Vec::new(),
            loop_stack: Vec::new(),
            used_intrinsics: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Clear all per-compilation state. A reused emitter must be reset
    /// between compilations.
    pub fn reset(&mut self) {
        self.output.clear();
        self.string_globals.clear();
        self.string_constants.clear();
        self.string_counter = 0;
        self.temp_counter = 0;
        self.block_counter = 0;
        self.temp_types.clear();
        self.state = EmitState::Outside;
        self.current_block.clear();
        self.current_function.clear();
        self.scopes.clear();
        self.loop_stack.clear();
        self.used_intrinsics.clear();
        self.diagnostics.clear();
    }

    /// Diagnostics raised while emitting (EG codes). A declaration that
    /// raised one was skipped; the rest of the module is still emitted.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Lower the whole program and return the IR text.
    pub fn generate(&mut self, program: &Program) -> Result<String, CodeGenError> {
        self.current_file = program.file.clone();

        let mut external_declares = String::new();
        for declaration in &program.declarations {
            match declaration {
                Declaration::Function(function) => self.emit_function_checked(function),
                Declaration::External(external) => {
                    let sig = self.analysis.functions.get(&external.name);
                    let ret = sig
                        .map(|s| self.llvm_of(s.ret))
                        .unwrap_or_else(|| "void".to_string());
                    let params: Vec<String> = sig
                        .map(|s| s.params.iter().map(|(_, t)| self.llvm_of(*t)).collect())
                        .unwrap_or_default();
                    let convention = external
                        .convention
                        .as_deref()
                        .map(platform::map_calling_convention)
                        .unwrap_or("ccc");
                    let convention = if convention == "ccc" {
                        String::new()
                    } else {
                        format!("{} ", convention)
                    };
                    writeln!(
                        external_declares,
                        "declare {}{} @{}({})",
                        convention,
                        ret,
                        mangle_name(&external.name),
                        params.join(", ")
                    )?;
                }
                Declaration::Record(record) => {
                    for method in &record.methods {
                        self.emit_method_checked(&record.name, method);
                    }
                }
                Declaration::Entity(entity) => {
                    for method in &entity.methods {
                        self.emit_method_checked(&entity.name, method);
                    }
                }
                _ => {}
            }
        }

        // Functions that live in imported modules are compiled with their
        // own unit; here they only need declarations.
        let mut defined: std::collections::HashSet<String> = std::collections::HashSet::new();
        for declaration in &program.declarations {
            match declaration {
                Declaration::Function(f) => {
                    defined.insert(f.name.clone());
                }
                Declaration::External(e) => {
                    defined.insert(e.name.clone());
                }
                Declaration::Record(r) => {
                    for method in &r.methods {
                        defined.insert(format!("{}.{}", r.name, method.name));
                    }
                }
                Declaration::Entity(e) => {
                    for method in &e.methods {
                        defined.insert(format!("{}.{}", e.name, method.name));
                    }
                }
                _ => {}
            }
        }
        let mut imported: Vec<_> = self
            .analysis
            .functions
            .iter()
            .filter(|(name, sig)| !defined.contains(*name) && sig.generic_params.is_empty())
            .collect();
        imported.sort_by(|a, b| a.0.cmp(b.0));
        let mut imported_declares = String::new();
        for (name, sig) in imported {
            let ret = types::llvm_type(&self.analysis.interner, &self.target, sig.ret);
            let params: Vec<String> = sig
                .params
                .iter()
                .map(|(_, t)| types::llvm_type(&self.analysis.interner, &self.target, *t))
                .collect();
            writeln!(
                imported_declares,
                "declare {} @{}({})",
                ret,
                mangle_name(name),
                params.join(", ")
            )?;
        }

        // Assemble final IR
        let mut ir = String::new();
        writeln!(ir, "; ModuleID = '{}'", self.current_file.display())?;
        writeln!(ir, "target triple = \"{}\"", self.target.triple)?;
        writeln!(ir, "target datalayout = \"{}\"", self.target.data_layout)?;
        writeln!(ir)?;
        runtime::emit_runtime_declarations(&mut ir, &self.target)?;
        if !self.used_intrinsics.is_empty() {
            for declaration in &self.used_intrinsics {
                writeln!(ir, "{}", declaration)?;
            }
            writeln!(ir)?;
        }
        if !external_declares.is_empty() {
            ir.push_str(&external_declares);
            ir.push('\n');
        }
        if !imported_declares.is_empty() {
            ir.push_str(&imported_declares);
            ir.push('\n');
        }
        if !self.string_globals.is_empty() {
            ir.push_str(&self.string_globals);
            ir.push('\n');
        }
        ir.push_str(&self.output);

        tracing::debug!(bytes = ir.len(), "IR emitted");
        Ok(ir)
    }

    /// Emit one function; an emitter invariant violation becomes an EG
    /// diagnostic and aborts emission for this declaration only.
    fn emit_function_checked(&mut self, function: &FunctionDecl) {
        let output_mark = self.output.len();
        if let Err(error) = self.emit_function(function, None) {
            self.output.truncate(output_mark);
            self.report_emit_error(&function.name, &function.span, error);
        }
    }

    fn emit_method_checked(&mut self, owner: &str, function: &FunctionDecl) {
        let output_mark = self.output.len();
        if let Err(error) = self.emit_function(function, Some(owner)) {
            self.output.truncate(output_mark);
            self.report_emit_error(&function.name, &function.span, error);
        }
    }

    fn report_emit_error(&mut self, name: &str, span: &Span, error: CodeGenError) {
        let code = match &error {
            CodeGenError::Logic(message) if message.contains("unsupported") => {
                codes::UNSUPPORTED_FEATURE
            }
            CodeGenError::Logic(message) if message.contains("unknown type") => codes::UNKNOWN_TYPE,
            CodeGenError::Logic(_) => codes::INTERNAL_ERROR,
            CodeGenError::Format(_) => codes::INTERNAL_ERROR,
        };
        self.diagnostics.push(Diagnostic::error(
            code,
            span.clone(),
            format!("cannot emit '{}': {}", name, error),
        ));
        self.state = EmitState::Outside;
    }

    fn emit_function(
        &mut self,
        function: &FunctionDecl,
        owner: Option<&str>,
    ) -> Result<(), CodeGenError> {
        // Abstract protocol methods have nothing to emit
        let Some(body) = &function.body else {
            return Ok(());
        };

        let lookup_name = match owner {
            Some(owner) => format!("{}.{}", owner, function.name),
            None => function.name.clone(),
        };
        let sig = self
            .analysis
            .functions
            .get(&lookup_name)
            .ok_or_else(|| format!("missing signature for '{}'", lookup_name))?
            .clone();

        self.state = EmitState::Prologue;
        self.current_function = lookup_name.clone();
        self.scopes.push(HashMap::new());

        let ret_ty = self.llvm_of(sig.ret);
        let param_list: Vec<String> = sig
            .params
            .iter()
            .map(|(name, ty)| format!("{} %{}", self.llvm_of(*ty), mangle_name(name)))
            .collect();

        writeln!(
            self.output,
            "define {} @{}({}) {{",
            ret_ty,
            mangle_name(&lookup_name),
            param_list.join(", ")
        )?;
        writeln!(self.output, "entry:")?;
        self.current_block = "entry".to_string();

        if function.generated {
            self.emit_variant_wrapper(function, &sig)?;
        } else {
            // Parameter allocas, then the body
            for (name, ty) in &sig.params {
                let llvm_ty = self.llvm_of(*ty);
                let slot = format!("%{}.addr", mangle_name(name));
                writeln!(self.output, "  {} = alloca {}", slot, llvm_ty)?;
                writeln!(
                    self.output,
                    "  store {} %{}, ptr {}",
                    llvm_ty,
                    mangle_name(name),
                    slot
                )?;
                self.scopes.last_mut().unwrap().insert(
                    name.clone(),
                    LocalSlot {
                        ptr: slot,
                        llvm_ty,
                        ty: *ty,
                    },
                );
            }
            self.state = EmitState::Body;

            self.emit_block(body)?;

            // Synthesized return for fallthrough
            if self.state != EmitState::Terminated {
                if ret_ty == "void" {
                    writeln!(self.output, "  ret void")?;
                } else {
                    writeln!(self.output, "  unreachable")?;
                }
            }
        }

        writeln!(self.output, "}}")?;
        writeln!(self.output)?;
        self.scopes.pop();
        self.state = EmitState::Complete;
        Ok(())
    }

    /// Body of a synthesized `try_`/`check_`/`find_` variant: forward to
    /// the original function. Failures transfer control through the
    /// runtime throw path, so the wrapper itself stays straight-line.
    fn emit_variant_wrapper(
        &mut self,
        function: &FunctionDecl,
        sig: &crate::typechecker::FunctionSig,
    ) -> Result<(), CodeGenError> {
        self.state = EmitState::Body;
        let prefix = VARIANT_PREFIXES
            .iter()
            .find(|p| function.name.starts_with(**p))
            .ok_or_else(|| format!("'{}' is not a variant function", function.name))?;
        let original = function.name.trim_start_matches(prefix);
        let original_sig = self
            .analysis
            .functions
            .get(original)
            .ok_or_else(|| format!("variant '{}' has no original '{}'", function.name, original))?;

        let args: Vec<String> = original_sig
            .params
            .iter()
            .map(|(name, ty)| format!("{} %{}", self.llvm_of(*ty), mangle_name(name)))
            .collect();
        let original_ret = self.llvm_of(original_sig.ret);

        let call_result = if original_ret == "void" {
            writeln!(
                self.output,
                "  call void @{}({})",
                mangle_name(original),
                args.join(", ")
            )?;
            None
        } else {
            let temp = self.fresh_temp();
            writeln!(
                self.output,
                "  {} = call {} @{}({})",
                temp,
                original_ret,
                mangle_name(original),
                args.join(", ")
            )?;
            self.temp_types.insert(temp.clone(), original_ret.clone());
            Some(temp)
        };

        match *prefix {
            "check_" => {
                // Reaching this point means success
                writeln!(self.output, "  ret i1 true")?;
            }
            _ => match call_result {
                Some(temp) => writeln!(self.output, "  ret {} {}", original_ret, temp)?,
                None => writeln!(self.output, "  ret void")?,
            },
        }
        self.state = EmitState::Terminated;
        Ok(())
    }

    // === Shared plumbing ===

    pub(crate) fn llvm_of(&self, ty: TypeId) -> String {
        types::llvm_type(&self.analysis.interner, &self.target, ty)
    }

    /// Type of an annotated expression node.
    pub(crate) fn node_type(&self, id: crate::ast::NodeId) -> Result<TypeId, CodeGenError> {
        self.analysis
            .type_of(id)
            .ok_or_else(|| CodeGenError::Logic(format!("node {} has no type annotation", id)))
    }

    /// Generate a fresh temporary name and record its type.
    pub(crate) fn fresh_temp(&mut self) -> String {
        let name = format!("%t{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    pub(crate) fn typed_temp(&mut self, ty: &str) -> String {
        let name = self.fresh_temp();
        self.temp_types.insert(name.clone(), ty.to_string());
        name
    }

    /// Generate a fresh block label.
    pub(crate) fn fresh_block(&mut self, prefix: &str) -> String {
        let name = format!("{}.{}", prefix, self.block_counter);
        self.block_counter += 1;
        name
    }

    /// Open a new label; the state machine returns to Body.
    pub(crate) fn emit_label(&mut self, label: &str) -> Result<(), CodeGenError> {
        writeln!(self.output, "{}:", label)?;
        self.current_block = label.to_string();
        self.state = EmitState::Body;
        Ok(())
    }

    /// Branch to `label` unless the block is already terminated.
    pub(crate) fn branch_to(&mut self, label: &str) -> Result<(), CodeGenError> {
        if self.state != EmitState::Terminated {
            writeln!(self.output, "  br label %{}", label)?;
            self.state = EmitState::Terminated;
        }
        Ok(())
    }

    pub(crate) fn lookup_local(&self, name: &str) -> Option<LocalSlot> {
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.get(name) {
                return Some(slot.clone());
            }
        }
        None
    }

    pub(crate) fn declare_local_slot(&mut self, name: &str, slot: LocalSlot) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), slot);
        }
    }

    /// Escape a string for an LLVM string constant.
    fn escape_llvm_string(s: &str) -> Result<String, std::fmt::Error> {
        let mut result = String::new();
        for ch in s.chars() {
            match ch {
                ' '..='!' | '#'..='[' | ']'..='~' => result.push(ch),
                '\\' => result.push_str(r"\\"),
                '"' => result.push_str(r"\22"),
                '\n' => result.push_str(r"\0A"),
                '\r' => result.push_str(r"\0D"),
                '\t' => result.push_str(r"\09"),
                _ => {
                    for byte in ch.to_string().as_bytes() {
                        write!(&mut result, r"\{:02X}", byte)?;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Get or create a deduplicated global string constant, returning its
    /// label.
    pub(crate) fn get_string_global(&mut self, s: &str) -> Result<String, CodeGenError> {
        if let Some(global_name) = self.string_constants.get(s) {
            return Ok(global_name.clone());
        }

        let global_name = format!("@.str.{}", self.string_counter);
        self.string_counter += 1;

        let escaped = Self::escape_llvm_string(s)?;
        let len = s.len() + 1; // NUL terminator

        writeln!(
            &mut self.string_globals,
            "{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
            global_name, len, escaped
        )?;

        self.string_constants
            .insert(s.to_string(), global_name.clone());
        Ok(global_name)
    }

    /// Widen a value to a target type where the analyzer allowed an
    /// implicit conversion.
    pub(crate) fn coerce(
        &mut self,
        value: Value,
        from: TypeId,
        to: TypeId,
    ) -> Result<Value, CodeGenError> {
        let from_llvm = self.llvm_of(from);
        let to_llvm = self.llvm_of(to);
        if from_llvm == to_llvm {
            return Ok(value);
        }
        use crate::types::Type;
        let instruction = match (
            self.analysis.interner.get(from),
            self.analysis.interner.get(to),
        ) {
            (Type::Int { signed: true, .. }, Type::Int { .. }) => "sext",
            (Type::Int { signed: false, .. }, Type::Int { .. }) => "zext",
            (Type::Float { .. }, Type::Float { .. }) => "fpext",
            _ => return Ok(value),
        };
        let temp = self.typed_temp(&to_llvm);
        writeln!(
            self.output,
            "  {} = {} {} {} to {}",
            temp, instruction, from_llvm, value.repr, to_llvm
        )?;
        Ok(Value::new(temp, to_llvm))
    }
}

/// Mangle a source name into a valid LLVM IR identifier. Letters, digits,
/// underscores, dollars, and periods pass through; anything else is
/// hex-escaped.
pub(crate) fn mangle_name(name: &str) -> String {
    let mut result = String::new();
    for c in name.chars() {
        match c {
            '_' | '.' | '$' => result.push(c),
            c if c.is_alphanumeric() => result.push(c),
            _ => result.push_str(&format!("_x{:02X}_", c as u32)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::ModuleSet;
    use crate::token::Dialect;
    use crate::typechecker::TypeChecker;

    fn lower(source: &str) -> String {
        let (program, parse_diagnostics) =
            Parser::new(source, "test.rf", Dialect::RazorForge).parse();
        assert!(parse_diagnostics.is_empty(), "{:?}", parse_diagnostics);
        let analysis = TypeChecker::new().check_program(&program, &ModuleSet::default());
        assert!(
            analysis.diagnostics.is_empty(),
            "semantic diagnostics: {:?}",
            analysis.diagnostics
        );
        let mut codegen = CodeGen::new(&analysis, host_target());
        let ir = codegen.generate(&program).unwrap();
        assert!(
            codegen.diagnostics().is_empty(),
            "emit diagnostics: {:?}",
            codegen.diagnostics()
        );
        ir
    }

    #[test]
    fn test_main_returns_constant() {
        let ir = lower("routine main() -> s32 { return 42 }");
        assert!(ir.contains("define i32 @main()"), "{}", ir);
        assert!(ir.contains("ret i32 42"), "{}", ir);
    }

    #[test]
    fn test_preamble_has_target_and_abi() {
        let ir = lower("routine main() -> s32 { return 0 }");
        assert!(ir.contains("target triple = "));
        assert!(ir.contains("target datalayout = "));
        assert!(ir.contains("declare ptr @heap_alloc(i64 %bytes)"));
        assert!(ir.contains("declare void @rf_crash(ptr %message)"));
    }

    #[test]
    fn test_parameters_get_allocas() {
        let ir = lower("routine add(a: s32, b: s32) -> s32 { return a + b }");
        assert!(ir.contains("define i32 @add(i32 %a, i32 %b)"));
        assert!(ir.contains("%a.addr = alloca i32"));
        assert!(ir.contains("store i32 %a, ptr %a.addr"));
        assert!(ir.contains("add i32"));
    }

    #[test]
    fn test_void_fallthrough_synthesizes_ret() {
        let ir = lower("routine noop() { let x = 1 }");
        assert!(ir.contains("ret void"));
    }

    #[test]
    fn test_danger_block_markers_and_raw_memory() {
        let source = "routine test() { danger! { let addr = 0x1000; write_as<s32>!(addr, 999); let v = read_as<s32>!(addr) } }";
        let ir = lower(source);
        assert!(ir.contains("; === DANGER BLOCK START ==="), "{}", ir);
        assert!(ir.contains("; === DANGER BLOCK END ==="), "{}", ir);
        assert!(ir.contains("inttoptr"), "{}", ir);
        assert!(ir.contains("store i32 999"), "{}", ir);
        assert!(ir.contains("load i32"), "{}", ir);
    }

    #[test]
    fn test_string_constants_deduplicated() {
        let source = r#"routine f() { verify!(true, "same") }
routine g() { verify!(true, "same") }"#;
        let ir = lower(source);
        let occurrences = ir.matches("c\"same\\00\"").count();
        assert_eq!(occurrences, 1, "{}", ir);
        assert!(ir.contains("@.str."));
        assert!(ir.contains("private unnamed_addr constant"));
    }

    #[test]
    fn test_external_with_calling_convention() {
        let source = "external(\"stdcall\") routine GetTick() -> u32\nroutine main() -> s32 { return 0 }";
        let ir = lower(source);
        assert!(ir.contains("declare x86_stdcallcc i32 @GetTick()"), "{}", ir);
    }

    #[test]
    fn test_if_else_branches() {
        let source =
            "routine pick(flag: bool) -> s64 { if flag { return 1 } else { return 2 } }";
        let ir = lower(source);
        assert!(ir.contains("br i1"), "{}", ir);
        assert!(ir.contains("ret i64 1"));
        assert!(ir.contains("ret i64 2"));
    }

    #[test]
    fn test_while_loop_blocks() {
        let source = "routine spin(n: s64) { var i = 0\n    while i < n { i += 1 } }";
        let ir = lower(source);
        assert!(ir.contains("while.cond"), "{}", ir);
        assert!(ir.contains("while.body"));
        assert!(ir.contains("while.end"));
        assert!(ir.contains("icmp slt i64"));
    }

    #[test]
    fn test_verify_lowers_to_branch_and_throw() {
        let ir = lower(r#"routine f(n: s64) { verify!(n > 0, "must be positive") }"#);
        assert!(ir.contains("br i1"), "{}", ir);
        assert!(ir.contains("call void @rf_throw(ptr"), "{}", ir);
        assert!(ir.contains("unreachable"));
        assert!(ir.contains("c\"must be positive\\00\""));
        assert!(ir.contains("c\"VerifyError\\00\""));
    }

    #[test]
    fn test_checked_add_uses_overflow_intrinsic() {
        let ir = lower("routine f(a: s32, b: s32) -> s32 { return (a +? b)? }");
        assert!(
            ir.contains("call { i32, i1 } @llvm.sadd.with.overflow.i32"),
            "{}",
            ir
        );
        assert!(ir.contains("declare { i32, i1 } @llvm.sadd.with.overflow.i32(i32, i32)"));
        assert!(ir.contains("extractvalue"));
        assert!(ir.contains("c\"OverflowError\\00\""));
    }

    #[test]
    fn test_wrapping_and_saturating_adds() {
        let wrap = lower("routine f(a: u8, b: u8) -> u8 { return a +% b }");
        assert!(wrap.contains("add i8"), "{}", wrap);
        let sat = lower("routine f(a: u8, b: u8) -> u8 { return a +^ b }");
        assert!(sat.contains("@llvm.uadd.sat.i8"), "{}", sat);
    }

    #[test]
    fn test_unsigned_operations_pick_unsigned_instructions() {
        let ir = lower("routine f(a: u32, b: u32) -> bool { return a < b }");
        assert!(ir.contains("icmp ult i32"), "{}", ir);
        let ir = lower("routine f(a: u32, b: u32) -> u32 { return a // b }");
        assert!(ir.contains("udiv i32"), "{}", ir);
        let ir = lower("routine f(a: s32, b: s32) -> s32 { return a // b }");
        assert!(ir.contains("sdiv i32"), "{}", ir);
    }

    #[test]
    fn test_slice_constructor_and_methods() {
        let source = "routine f() -> s64 { let buffer = DynamicSlice<u8>(64)\n    return buffer.size() }";
        let ir = lower(source);
        assert!(ir.contains("call ptr @heap_alloc(i64 64)"), "{}", ir);
        assert!(ir.contains("call i64 @slice_size(ptr"), "{}", ir);
    }

    #[test]
    fn test_temporary_slice_uses_stack_alloc() {
        let source = "routine f() -> s64 { let buffer = TemporarySlice<u8>(32)\n    return buffer.size() }";
        let ir = lower(source);
        assert!(ir.contains("call ptr @stack_alloc(i64 32)"), "{}", ir);
    }

    #[test]
    fn test_size_of_becomes_constant() {
        let ir = lower("routine f() -> s64 { return size_of<s32>() }");
        assert!(ir.contains("ret i64 4"), "{}", ir);
    }

    #[test]
    fn test_line_number_becomes_constant() {
        let ir = lower("routine f() -> s64 {\n    return get_line_number()\n}");
        assert!(ir.contains("ret i64 2"), "{}", ir);
    }

    #[test]
    fn test_variant_wrapper_forwards_to_original() {
        let source = "routine parse!(n: s64) -> s64 { verify!(n > 0)\n    return n }";
        let (mut program, parse_diagnostics) =
            Parser::new(source, "test.rf", Dialect::RazorForge).parse();
        assert!(parse_diagnostics.is_empty());
        crate::variants::generate_variants(&mut program, &std::collections::HashSet::new());
        let analysis = TypeChecker::new().check_program(&program, &ModuleSet::default());
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
        let mut codegen = CodeGen::new(&analysis, host_target());
        let ir = codegen.generate(&program).unwrap();

        assert!(ir.contains("define i64 @try_parse(i64 %n)"), "{}", ir);
        assert!(ir.contains("define i1 @check_parse(i64 %n)"), "{}", ir);
        assert!(ir.contains("define i64 @find_parse(i64 %n)"), "{}", ir);
        assert!(ir.contains("call i64 @parse(i64 %n)"));
        assert!(ir.contains("ret i1 true"));
    }

    #[test]
    fn test_record_construction_and_field_access() {
        let source = r#"record Point {
    x: s64,
    y: s64
}
routine f() -> s64 { let p = Point(3, 4); return p.x }"#;
        let ir = lower(source);
        assert!(ir.contains("call ptr @heap_alloc(i64 16)"), "{}", ir);
        assert!(ir.contains("getelementptr"), "{}", ir);
    }

    #[test]
    fn test_reset_clears_state() {
        let (program, _) = Parser::new(
            "routine main() -> s32 { return 42 }",
            "test.rf",
            Dialect::RazorForge,
        )
        .parse();
        let analysis = TypeChecker::new().check_program(&program, &ModuleSet::default());
        let mut codegen = CodeGen::new(&analysis, host_target());
        let first = codegen.generate(&program).unwrap();
        codegen.reset();
        let second = codegen.generate(&program).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mangle_name() {
        assert_eq!(mangle_name("simple"), "simple");
        assert_eq!(mangle_name("math.vector"), "math.vector");
        assert_eq!(mangle_name("weird-name"), "weird_x2D_name");
    }

    #[test]
    fn test_ssa_temps_defined_before_use() {
        let ir = lower("routine f(a: s64, b: s64) -> s64 { return a + b * 2 }");
        // Collect temp definitions and uses line by line
        let mut defined = std::collections::HashSet::new();
        for line in ir.lines() {
            if let Some((lhs, rhs)) = line.trim().split_once(" = ") {
                for token in rhs.split(|c: char| !c.is_alphanumeric() && c != '%' && c != 't') {
                    if let Some(temp) = token.strip_prefix("%t") {
                        if temp.chars().all(|c| c.is_ascii_digit()) {
                            assert!(
                                defined.contains(&format!("%t{}", temp)),
                                "use of %t{} before definition in: {}",
                                temp,
                                ir
                            );
                        }
                    }
                }
                if lhs.starts_with("%t") {
                    defined.insert(lhs.to_string());
                }
            }
        }
    }
}
