//! Semantic analyzer for RazorForge and Suflae
//!
//! Runs after parsing and module resolution, in passes:
//!
//! 1. Declaration collection: every top-level name is registered; clashes
//!    report `ES005` with a back-reference to the first definition.
//! 2. Type resolution: named type references resolve to interned
//!    [`TypeId`]s; unknown names report `ES003`, generic templates used
//!    without arguments report `ES014`.
//! 3. Function-body analysis: each body gets a fresh lexical scope and
//!    every expression a concrete type. Implicit conversions are limited
//!    to same-signedness integer widening and `f32` to `f64`.
//! 4. Memory checks: `TemporarySlice` values must not escape their frame,
//!    and raw-address operations are only legal inside `danger!` blocks.
//!
//! Results land in side tables keyed by [`NodeId`]; the AST itself is
//! never mutated.

use crate::ast::*;
use crate::diagnostics::{codes, Diagnostic};
use crate::resolver::ModuleSet;
use crate::span::Span;
use crate::symbols::{SymbolId, SymbolKind, SymbolTable};
use crate::token::TokenKind;
use crate::types::{SliceKind, Type, TypeId, TypeInterner};
use std::collections::{HashMap, HashSet};

/// Signature of a callable, shared by functions, externals, and methods.
#[derive(Debug, Clone)]
pub struct FunctionSig {
    pub name: String,
    pub params: Vec<(String, TypeId)>,
    pub ret: TypeId,
    pub can_fail: bool,
    pub node: NodeId,
    pub span: Span,
    pub is_external: bool,
    /// Calling-convention annotation on externals
    pub convention: Option<String>,
    pub generic_params: Vec<String>,
}

/// Resolved layout of a record or entity.
#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub name: String,
    pub fields: Vec<(String, TypeId)>,
    pub methods: HashMap<String, FunctionSig>,
    pub is_entity: bool,
    pub parent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VariantInfo {
    pub name: String,
    pub fields: Vec<(String, TypeId)>,
}

/// Resolved layout of a choice (sum) type.
#[derive(Debug, Clone)]
pub struct ChoiceInfo {
    pub name: String,
    pub variants: Vec<VariantInfo>,
}

/// Everything semantic analysis produces. Codegen consumes this without
/// touching the checker again.
#[derive(Debug)]
pub struct Analysis {
    pub diagnostics: Vec<Diagnostic>,
    /// Concrete type of every expression, keyed by node identity
    pub node_types: HashMap<NodeId, TypeId>,
    /// Resolved symbol of every use-site
    pub node_symbols: HashMap<NodeId, SymbolId>,
    pub interner: TypeInterner,
    pub symbols: SymbolTable,
    pub functions: HashMap<String, FunctionSig>,
    pub records: HashMap<String, RecordInfo>,
    pub choices: HashMap<String, ChoiceInfo>,
}

impl Analysis {
    pub fn type_of(&self, id: NodeId) -> Option<TypeId> {
        self.node_types.get(&id).copied()
    }
}

/// Compile-time intrinsics replaced by constants during IR emission. The
/// checker only needs their result types.
const GENERIC_INTRINSICS: &[(&str, IntrinsicResult)] = &[
    ("size_of", IntrinsicResult::Int),
    ("align_of", IntrinsicResult::Int),
    ("field_count", IntrinsicResult::Int),
    ("field_names", IntrinsicResult::Text),
    ("get_compile_type_name", IntrinsicResult::Text),
    ("has_method", IntrinsicResult::Bool),
];

const LOCATION_INTRINSICS: &[(&str, IntrinsicResult)] = &[
    ("get_line_number", IntrinsicResult::Int),
    ("get_column_number", IntrinsicResult::Int),
    ("get_file_name", IntrinsicResult::Text),
    ("get_caller_name", IntrinsicResult::Text),
    ("get_current_module", IntrinsicResult::Text),
];

#[derive(Debug, Clone, Copy, PartialEq)]
enum IntrinsicResult {
    Int,
    Text,
    Bool,
}

pub struct TypeChecker {
    interner: TypeInterner,
    symbols: SymbolTable,
    diagnostics: Vec<Diagnostic>,
    node_types: HashMap<NodeId, TypeId>,
    node_symbols: HashMap<NodeId, SymbolId>,

    functions: HashMap<String, FunctionSig>,
    records: HashMap<String, RecordInfo>,
    choices: HashMap<String, ChoiceInfo>,
    /// Named types (records, entities, choices, protocols, aliases)
    named_types: HashMap<String, TypeId>,
    /// Generic templates kept as declarations for on-demand instantiation
    record_templates: HashMap<String, RecordDecl>,
    choice_templates: HashMap<String, ChoiceDecl>,

    /// Generic parameters of the enclosing declaration
    generic_scope: HashSet<String>,
    /// Substitutions active while instantiating a template
    generic_bindings: HashMap<String, TypeId>,
    current_return: TypeId,
    in_danger: bool,
    loop_depth: usize,
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeChecker {
    pub fn new() -> Self {
        let mut interner = TypeInterner::new();
        let unit = interner.unit();
        TypeChecker {
            interner,
            symbols: SymbolTable::new(),
            diagnostics: Vec::new(),
            node_types: HashMap::new(),
            node_symbols: HashMap::new(),
            functions: HashMap::new(),
            records: HashMap::new(),
            choices: HashMap::new(),
            named_types: HashMap::new(),
            record_templates: HashMap::new(),
            choice_templates: HashMap::new(),
            generic_scope: HashSet::new(),
            generic_bindings: HashMap::new(),
            current_return: unit,
            in_danger: false,
            loop_depth: 0,
        }
    }

    /// Run every pass over the entry program and its loaded modules.
    pub fn check_program(mut self, program: &Program, modules: &ModuleSet) -> Analysis {
        // Pass 1: collect module declarations under qualified names, then
        // the entry program's own.
        for module in &modules.modules {
            self.collect_declarations(&module.program, Some(&module.name));
        }
        self.collect_declarations(program, None);

        // Pass 2/3: resolve signatures and analyze bodies.
        for module in &modules.modules {
            self.check_declarations(&module.program, Some(&module.name));
        }
        self.check_declarations(program, None);

        tracing::debug!(
            functions = self.functions.len(),
            diagnostics = self.diagnostics.len(),
            "semantic analysis finished"
        );

        Analysis {
            diagnostics: self.diagnostics,
            node_types: self.node_types,
            node_symbols: self.node_symbols,
            interner: self.interner,
            symbols: self.symbols,
            functions: self.functions,
            records: self.records,
            choices: self.choices,
        }
    }

    fn error(&mut self, code: &'static str, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(code, span, message));
    }

    fn record_type(&mut self, id: NodeId, ty: TypeId) -> TypeId {
        self.node_types.insert(id, ty);
        ty
    }

    // ========================================================================
    //                       Pass 1: declaration collection
    // ========================================================================

    fn qualified(prefix: Option<&str>, name: &str) -> String {
        match prefix {
            Some(prefix) => format!("{}.{}", prefix, name),
            None => name.to_string(),
        }
    }

    fn collect_declarations(&mut self, program: &Program, module: Option<&str>) {
        for declaration in &program.declarations {
            let Some(plain_name) = declaration.name() else {
                continue;
            };
            let name = Self::qualified(module, plain_name);
            let kind = match declaration {
                Declaration::Function(_) => SymbolKind::Function,
                Declaration::External(_) => SymbolKind::External,
                Declaration::Record(_)
                | Declaration::Entity(_)
                | Declaration::Choice(_)
                | Declaration::Protocol(_)
                | Declaration::Redefine(_) => SymbolKind::Type,
                Declaration::Import(_) => SymbolKind::Module,
                Declaration::Variable(v) => SymbolKind::Variable { mutable: v.mutable },
            };

            // Imports resolve through the module registry, and top-level
            // variables are declared with their types during body analysis.
            if matches!(
                declaration,
                Declaration::Import(_) | Declaration::Variable(_)
            ) {
                continue;
            }

            let node = declaration_node_id(declaration);
            let span = declaration.span().clone();
            if let Err(existing) = self.symbols.declare(name.clone(), kind, node, span.clone(), None) {
                let original = self.symbols.symbol(existing).span.clone();
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::DUPLICATE_DEFINITION,
                        span,
                        format!("duplicate definition of '{}'", plain_name),
                    )
                    .with_related("first defined here", original),
                );
                continue;
            }

            // Register type names now so signatures can refer to them in
            // any order (forward references are fine).
            match declaration {
                Declaration::Record(decl) => {
                    if decl.generic_params.is_empty() {
                        let ty = self.interner.intern(Type::Record { name: name.clone() });
                        self.named_types.insert(name.clone(), ty);
                    } else {
                        self.record_templates.insert(name.clone(), decl.clone());
                    }
                }
                Declaration::Entity(decl) => {
                    if decl.generic_params.is_empty() {
                        let ty = self.interner.intern(Type::Entity { name: name.clone() });
                        self.named_types.insert(name.clone(), ty);
                    } else {
                        self.record_templates.insert(
                            name.clone(),
                            RecordDecl {
                                id: decl.id,
                                name: decl.name.clone(),
                                doc: decl.doc.clone(),
                                generic_params: decl.generic_params.clone(),
                                fields: decl.fields.clone(),
                                methods: decl.methods.clone(),
                                span: decl.span.clone(),
                            },
                        );
                    }
                }
                Declaration::Choice(decl) => {
                    if decl.generic_params.is_empty() {
                        let ty = self.interner.intern(Type::Choice { name: name.clone() });
                        self.named_types.insert(name.clone(), ty);
                    } else {
                        self.choice_templates.insert(name.clone(), decl.clone());
                    }
                }
                Declaration::Protocol(decl) => {
                    let ty = self.interner.intern(Type::Protocol { name: name.clone() });
                    self.named_types.insert(name.clone(), ty);
                    let _ = decl;
                }
                _ => {}
            }
        }
    }

    // ========================================================================
    //                    Pass 2/3: signatures and bodies
    // ========================================================================

    fn check_declarations(&mut self, program: &Program, module: Option<&str>) {
        // Signatures first so calls can reference functions declared later.
        for declaration in &program.declarations {
            match declaration {
                Declaration::Function(decl) => {
                    let sig = self.function_signature(decl, module, None);
                    self.functions.insert(sig.name.clone(), sig);
                }
                Declaration::External(decl) => {
                    let sig = self.external_signature(decl, module);
                    self.functions.insert(sig.name.clone(), sig);
                }
                Declaration::Record(decl) if decl.generic_params.is_empty() => {
                    let info = self.record_info(decl, module, false, None);
                    for sig in info.methods.values() {
                        self.functions.insert(sig.name.clone(), sig.clone());
                    }
                    self.records.insert(info.name.clone(), info);
                }
                Declaration::Entity(decl) if decl.generic_params.is_empty() => {
                    let record = RecordDecl {
                        id: decl.id,
                        name: decl.name.clone(),
                        doc: decl.doc.clone(),
                        generic_params: vec![],
                        fields: decl.fields.clone(),
                        methods: decl.methods.clone(),
                        span: decl.span.clone(),
                    };
                    let parent = decl.parent.as_ref().map(|p| p.head_name());
                    if let Some(parent_name) = &parent {
                        if !self.named_types.contains_key(parent_name) {
                            self.error(
                                codes::UNDEFINED_TYPE,
                                decl.parent.as_ref().unwrap().span.clone(),
                                format!("unknown parent type '{}'", parent_name),
                            );
                        }
                    }
                    let mut info = self.record_info(&record, module, true, None);
                    info.parent = parent;
                    for sig in info.methods.values() {
                        self.functions.insert(sig.name.clone(), sig.clone());
                    }
                    self.records.insert(info.name.clone(), info);
                }
                Declaration::Choice(decl) if decl.generic_params.is_empty() => {
                    let info = self.choice_info(decl, module, None);
                    self.choices.insert(info.name.clone(), info);
                }
                Declaration::Redefine(decl) => {
                    let target = self.resolve_type(&decl.target);
                    let name = Self::qualified(module, &decl.name);
                    self.named_types.insert(name, target);
                }
                _ => {}
            }
        }

        // Bodies second.
        for declaration in &program.declarations {
            match declaration {
                Declaration::Function(decl) => self.check_function_body(decl, None),
                Declaration::Record(decl) if decl.generic_params.is_empty() => {
                    let me = self.named_types.get(&Self::qualified(module, &decl.name)).copied();
                    for method in &decl.methods {
                        self.check_function_body(method, me);
                    }
                }
                Declaration::Entity(decl) if decl.generic_params.is_empty() => {
                    let me = self.named_types.get(&Self::qualified(module, &decl.name)).copied();
                    for method in &decl.methods {
                        self.check_function_body(method, me);
                    }
                }
                Declaration::Protocol(decl) => {
                    let me = self.named_types.get(&Self::qualified(module, &decl.name)).copied();
                    for method in &decl.methods {
                        if method.body.is_some() {
                            self.check_function_body(method, me);
                        }
                    }
                }
                Declaration::Variable(decl) => {
                    self.check_variable_decl(decl);
                }
                _ => {}
            }
        }
    }

    fn function_signature(
        &mut self,
        decl: &FunctionDecl,
        module: Option<&str>,
        owner: Option<&str>,
    ) -> FunctionSig {
        self.generic_scope = decl.generic_params.iter().cloned().collect();
        let params = decl
            .params
            .iter()
            .map(|p| {
                // `me` has no annotation; the enclosing type supplies it
                let ty = if p.name == "me" {
                    owner
                        .and_then(|o| self.named_types.get(o).copied())
                        .unwrap_or_else(|| self.interner.error())
                } else {
                    self.resolve_type(&p.ty)
                };
                (p.name.clone(), ty)
            })
            .collect();
        let ret = match &decl.return_type {
            Some(ty) => self.resolve_type(ty),
            None => self.interner.unit(),
        };
        self.generic_scope.clear();

        let base = match owner {
            Some(owner) => format!("{}.{}", owner, decl.name),
            None => decl.name.clone(),
        };
        FunctionSig {
            name: Self::qualified(module, &base),
            params,
            ret,
            can_fail: decl.can_fail,
            node: decl.id,
            span: decl.span.clone(),
            is_external: false,
            convention: None,
            generic_params: decl.generic_params.clone(),
        }
    }

    fn external_signature(&mut self, decl: &ExternalDecl, module: Option<&str>) -> FunctionSig {
        let params = decl
            .params
            .iter()
            .map(|p| (p.name.clone(), self.resolve_type(&p.ty)))
            .collect();
        let ret = match &decl.return_type {
            Some(ty) => self.resolve_type(ty),
            None => self.interner.unit(),
        };
        FunctionSig {
            name: Self::qualified(module, &decl.name),
            params,
            ret,
            can_fail: false,
            node: decl.id,
            span: decl.span.clone(),
            is_external: true,
            convention: decl.convention.clone(),
            generic_params: vec![],
        }
    }

    fn record_info(
        &mut self,
        decl: &RecordDecl,
        module: Option<&str>,
        is_entity: bool,
        instantiated_name: Option<String>,
    ) -> RecordInfo {
        let name = instantiated_name.unwrap_or_else(|| Self::qualified(module, &decl.name));
        let fields = decl
            .fields
            .iter()
            .map(|f| (f.name.clone(), self.resolve_type(&f.ty)))
            .collect();
        let mut methods = HashMap::new();
        for method in &decl.methods {
            let sig = self.function_signature(method, None, Some(&name));
            methods.insert(method.name.clone(), sig);
        }
        RecordInfo {
            name,
            fields,
            methods,
            is_entity,
            parent: None,
        }
    }

    fn choice_info(
        &mut self,
        decl: &ChoiceDecl,
        module: Option<&str>,
        instantiated_name: Option<String>,
    ) -> ChoiceInfo {
        let name = instantiated_name.unwrap_or_else(|| Self::qualified(module, &decl.name));
        let variants = decl
            .variants
            .iter()
            .map(|v| VariantInfo {
                name: v.name.clone(),
                fields: v
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), self.resolve_type(&f.ty)))
                    .collect(),
            })
            .collect();
        ChoiceInfo { name, variants }
    }

    // ========================================================================
    //                         Type resolution
    // ========================================================================

    fn resolve_type(&mut self, ty: &TypeExpr) -> TypeId {
        match &ty.kind {
            TypeExprKind::Pointer(inner) => {
                let pointee = self.resolve_type(inner);
                self.interner.intern(Type::Pointer { pointee })
            }
            TypeExprKind::Slice(inner) => {
                let element = self.resolve_type(inner);
                self.interner.intern(Type::Slice {
                    kind: SliceKind::Dynamic,
                    element,
                })
            }
            TypeExprKind::Named { name, generic_args } => {
                self.resolve_named_type(name, generic_args, &ty.span)
            }
        }
    }

    fn resolve_named_type(
        &mut self,
        name: &str,
        generic_args: &[TypeExpr],
        span: &Span,
    ) -> TypeId {
        // Active template substitution binds tightest
        if let Some(&bound) = self.generic_bindings.get(name) {
            return bound;
        }
        if self.generic_scope.contains(name) {
            return self.interner.intern(Type::Generic {
                name: name.to_string(),
            });
        }

        // Slice types take one element argument
        if name == "DynamicSlice" || name == "TemporarySlice" {
            let kind = if name == "DynamicSlice" {
                SliceKind::Dynamic
            } else {
                SliceKind::Temporary
            };
            if generic_args.len() != 1 {
                self.error(
                    codes::GENERIC_ARGS_REQUIRED,
                    span.clone(),
                    format!("{} requires exactly one element type", name),
                );
                return self.interner.error();
            }
            let element = self.resolve_type(&generic_args[0]);
            return self.interner.intern(Type::Slice { kind, element });
        }

        if let Some(primitive) = Type::from_primitive_name(name) {
            if !generic_args.is_empty() {
                self.error(
                    codes::INVALID_OPERATION,
                    span.clone(),
                    format!("'{}' does not take generic arguments", name),
                );
            }
            return self.interner.intern(primitive);
        }

        if let Some(&known) = self.named_types.get(name) {
            if !generic_args.is_empty() {
                self.error(
                    codes::INVALID_OPERATION,
                    span.clone(),
                    format!("'{}' is not generic", name),
                );
            }
            return known;
        }

        // Generic template: instantiate with the supplied arguments
        if self.record_templates.contains_key(name) || self.choice_templates.contains_key(name) {
            if generic_args.is_empty() {
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::GENERIC_ARGS_REQUIRED,
                        span.clone(),
                        format!("generic type '{}' requires type arguments", name),
                    )
                    .with_hint(format!("write '{}<...>' with concrete arguments", name)),
                );
                return self.interner.error();
            }
            let args: Vec<TypeId> = generic_args.iter().map(|a| self.resolve_type(a)).collect();
            return self.instantiate_template(name, &args, span);
        }

        self.error(
            codes::UNDEFINED_TYPE,
            span.clone(),
            format!("unknown type '{}'", name),
        );
        self.interner.error()
    }

    /// Instantiate a generic record/choice template. Instantiations are
    /// memoized under their mangled name ("Stack<s32>"), so structural
    /// equality of arguments gives back the same type.
    fn instantiate_template(&mut self, name: &str, args: &[TypeId], span: &Span) -> TypeId {
        let arg_names: Vec<String> = args.iter().map(|a| self.interner.name(*a)).collect();
        let instance_name = format!("{}<{}>", name, arg_names.join(", "));
        if let Some(&existing) = self.named_types.get(&instance_name) {
            return existing;
        }

        if let Some(template) = self.record_templates.get(name).cloned() {
            if template.generic_params.len() != args.len() {
                self.error(
                    codes::INVALID_ARGUMENTS,
                    span.clone(),
                    format!(
                        "'{}' expects {} type arguments, got {}",
                        name,
                        template.generic_params.len(),
                        args.len()
                    ),
                );
                return self.interner.error();
            }
            let ty = self.interner.intern(Type::Record {
                name: instance_name.clone(),
            });
            self.named_types.insert(instance_name.clone(), ty);

            let saved = std::mem::take(&mut self.generic_bindings);
            for (param, arg) in template.generic_params.iter().zip(args) {
                self.generic_bindings.insert(param.clone(), *arg);
            }
            let info = self.record_info(&template, None, false, Some(instance_name.clone()));
            self.generic_bindings = saved;
            self.records.insert(instance_name, info);
            return ty;
        }

        if let Some(template) = self.choice_templates.get(name).cloned() {
            if template.generic_params.len() != args.len() {
                self.error(
                    codes::INVALID_ARGUMENTS,
                    span.clone(),
                    format!(
                        "'{}' expects {} type arguments, got {}",
                        name,
                        template.generic_params.len(),
                        args.len()
                    ),
                );
                return self.interner.error();
            }
            let ty = self.interner.intern(Type::Choice {
                name: instance_name.clone(),
            });
            self.named_types.insert(instance_name.clone(), ty);

            let saved = std::mem::take(&mut self.generic_bindings);
            for (param, arg) in template.generic_params.iter().zip(args) {
                self.generic_bindings.insert(param.clone(), *arg);
            }
            let info = self.choice_info(&template, None, Some(instance_name.clone()));
            self.generic_bindings = saved;
            self.choices.insert(instance_name, info);
            return ty;
        }

        self.interner.error()
    }

    // ========================================================================
    //                        Function-body analysis
    // ========================================================================

    fn check_function_body(&mut self, decl: &FunctionDecl, me: Option<TypeId>) {
        // Synthesized variants are well-typed by construction
        if decl.generated {
            return;
        }
        let Some(body) = &decl.body else {
            return;
        };

        self.generic_scope = decl.generic_params.iter().cloned().collect();
        let ret = match &decl.return_type {
            Some(ty) => self.resolve_type(ty),
            None => self.interner.unit(),
        };
        self.current_return = ret;

        self.enter_scope();
        for param in &decl.params {
            let ty = if param.name == "me" {
                me.unwrap_or_else(|| self.interner.error())
            } else {
                self.resolve_type(&param.ty)
            };
            self.declare_local(
                &param.name,
                SymbolKind::Parameter,
                decl.id,
                param.span.clone(),
                ty,
            );
        }

        self.check_block(body);
        self.exit_scope();

        // A non-unit function must return on every path
        let unit = self.interner.unit();
        if ret != unit && !self.interner.get(ret).is_error() && !block_always_returns(body) {
            self.diagnostics.push(
                Diagnostic::error(
                    codes::MISSING_RETURN,
                    decl.span.clone(),
                    format!(
                        "routine '{}' does not return a value on every path",
                        decl.name
                    ),
                )
                .with_hint(format!("expected a '{}' return", self.interner.name(ret))),
            );
        }

        self.generic_scope.clear();
    }

    fn enter_scope(&mut self) {
        self.symbols.enter_scope();
    }

    fn exit_scope(&mut self) {
        self.symbols.exit_scope();
    }

    fn declare_local(
        &mut self,
        name: &str,
        kind: SymbolKind,
        node: NodeId,
        span: Span,
        ty: TypeId,
    ) -> Option<SymbolId> {
        match self.symbols.declare(name, kind, node, span.clone(), Some(ty)) {
            Ok(id) => Some(id),
            Err(existing) => {
                let original = self.symbols.symbol(existing).span.clone();
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::DUPLICATE_DEFINITION,
                        span,
                        format!("duplicate definition of '{}'", name),
                    )
                    .with_related("first defined here", original),
                );
                None
            }
        }
    }

    fn check_block(&mut self, block: &Block) {
        for statement in &block.statements {
            self.check_statement(statement);
        }
    }

    fn check_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::Block(block) => {
                self.enter_scope();
                self.check_block(block);
                self.exit_scope();
            }
            Statement::If(s) => {
                let bool_ty = self.interner.bool();
                for (condition, body) in &s.branches {
                    let cond_ty = self.check_expression(condition, Some(bool_ty));
                    self.require_coercible(cond_ty, bool_ty, &condition.span, "if condition");
                    self.enter_scope();
                    self.check_block(body);
                    self.exit_scope();
                }
                if let Some(else_block) = &s.else_block {
                    self.enter_scope();
                    self.check_block(else_block);
                    self.exit_scope();
                }
            }
            Statement::When(s) => self.check_when(s),
            Statement::While(s) => {
                let bool_ty = self.interner.bool();
                let cond_ty = self.check_expression(&s.condition, Some(bool_ty));
                self.require_coercible(cond_ty, bool_ty, &s.condition.span, "while condition");
                self.loop_depth += 1;
                self.enter_scope();
                self.check_block(&s.body);
                self.exit_scope();
                self.loop_depth -= 1;
            }
            Statement::For(s) => {
                let iter_ty = self.check_expression(&s.iterable, None);
                let binding_ty = match self.interner.get(iter_ty).clone() {
                    Type::Range => self.interner.s64(),
                    Type::Slice { element, .. } => element,
                    Type::Text { bits } => self.interner.intern(Type::Letter { bits }),
                    Type::Error => self.interner.error(),
                    other => {
                        let name = self.interner.name(iter_ty);
                        let _ = other;
                        self.error(
                            codes::INVALID_OPERATION,
                            s.iterable.span.clone(),
                            format!("'{}' is not iterable", name),
                        );
                        self.interner.error()
                    }
                };
                self.loop_depth += 1;
                self.enter_scope();
                self.declare_local(
                    &s.binding,
                    SymbolKind::Variable { mutable: false },
                    s.iterable.id,
                    s.span.clone(),
                    binding_ty,
                );
                self.check_block(&s.body);
                self.exit_scope();
                self.loop_depth -= 1;
            }
            Statement::Loop(s) => {
                self.loop_depth += 1;
                self.enter_scope();
                self.check_block(&s.body);
                self.exit_scope();
                self.loop_depth -= 1;
            }
            Statement::Break { span } | Statement::Continue { span } => {
                if self.loop_depth == 0 {
                    self.error(
                        codes::INVALID_OPERATION,
                        span.clone(),
                        "break/continue outside of a loop",
                    );
                }
            }
            Statement::Return { value, span } => {
                let expected = self.current_return;
                let actual = match value {
                    Some(expression) => self.check_expression(expression, Some(expected)),
                    None => self.interner.unit(),
                };
                self.require_coercible(actual, expected, span, "return value");

                // A TemporarySlice must not outlive the frame that owns it
                if let Type::Slice {
                    kind: SliceKind::Temporary,
                    ..
                } = self.interner.get(actual)
                {
                    self.diagnostics.push(
                        Diagnostic::error(
                            codes::MEMORY_ERROR,
                            span.clone(),
                            "a TemporarySlice cannot escape the routine that allocated it",
                        )
                        .with_hint("hijack() it into a DynamicSlice to extend its lifetime"),
                    );
                }
            }
            Statement::Danger { body, .. } => {
                let saved = self.in_danger;
                self.in_danger = true;
                self.enter_scope();
                self.check_block(body);
                self.exit_scope();
                self.in_danger = saved;
            }
            Statement::Assignment {
                target, op, value, span,
            } => {
                let target_ty = self.check_expression(target, None);
                let value_ty = self.check_expression(value, Some(target_ty));

                if let ExprKind::Identifier(name) = &target.kind {
                    let symbol = self.symbols.resolve(name).map(|s| (s.kind, s.span.clone()));
                    if let Some((SymbolKind::Variable { mutable: false }, declared)) = symbol {
                        self.diagnostics.push(
                            Diagnostic::error(
                                codes::INVALID_OPERATION,
                                span.clone(),
                                format!("cannot assign to immutable binding '{}'", name),
                            )
                            .with_related("declared here", declared)
                            .with_hint("declare it with 'var' to make it mutable"),
                        );
                    }
                }

                if let Some(op) = op {
                    // `x += e` needs the operator to be valid on x's type
                    if !self.interner.get(target_ty).is_numeric()
                        && !self.interner.get(target_ty).is_error()
                    {
                        let name = self.interner.name(target_ty);
                        self.error(
                            codes::INVALID_OPERATION,
                            span.clone(),
                            format!("'{}' does not support '{}='", name, op.symbol()),
                        );
                    }
                }
                self.require_coercible(value_ty, target_ty, &value.span, "assignment");
            }
            Statement::Expression(expression) => {
                self.check_expression(expression, None);
            }
            Statement::Declaration(declaration) => match declaration.as_ref() {
                Declaration::Variable(decl) => self.check_variable_decl(decl),
                Declaration::Function(decl) => {
                    let sig = self.function_signature(decl, None, None);
                    self.functions.insert(sig.name.clone(), sig);
                    self.check_function_body(decl, None);
                }
                other => {
                    self.error(
                        codes::INVALID_OPERATION,
                        other.span().clone(),
                        "this declaration is not allowed inside a routine body",
                    );
                }
            },
        }
    }

    fn check_variable_decl(&mut self, decl: &VariableDecl) {
        let annotated = decl.ty.as_ref().map(|ty| self.resolve_type(ty));
        let inferred = decl
            .initializer
            .as_ref()
            .map(|init| self.check_expression(init, annotated));

        let ty = match (annotated, inferred) {
            (Some(annotated), Some(inferred)) => {
                self.require_coercible(inferred, annotated, &decl.span, "initializer");
                annotated
            }
            (Some(annotated), None) => annotated,
            (None, Some(inferred)) => inferred,
            (None, None) => {
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::TYPE_MISMATCH,
                        decl.span.clone(),
                        format!("cannot infer a type for '{}'", decl.name),
                    )
                    .with_hint("add a type annotation or an initializer"),
                );
                self.interner.error()
            }
        };

        self.record_type(decl.id, ty);
        if let Some(id) = self.declare_local(
            &decl.name,
            SymbolKind::Variable {
                mutable: decl.mutable,
            },
            decl.id,
            decl.span.clone(),
            ty,
        ) {
            self.node_symbols.insert(decl.id, id);
        }
    }

    fn check_when(&mut self, statement: &WhenStatement) {
        let scrutinee_ty = self.check_expression(&statement.scrutinee, None);
        let choice = match self.interner.get(scrutinee_ty) {
            Type::Choice { name } => self.choices.get(name).cloned(),
            _ => None,
        };

        let mut covered: HashSet<String> = HashSet::new();
        let mut has_catch_all = false;

        for arm in &statement.arms {
            self.enter_scope();
            match &arm.pattern.kind {
                PatternKind::Wildcard => has_catch_all = true,
                PatternKind::Binding(name) => {
                    has_catch_all = true;
                    self.declare_local(
                        name,
                        SymbolKind::Variable { mutable: false },
                        statement.scrutinee.id,
                        arm.pattern.span.clone(),
                        scrutinee_ty,
                    );
                }
                PatternKind::Literal(literal) => {
                    let literal_ty = self.literal_type(literal);
                    if self.interner.common_type(literal_ty, scrutinee_ty).is_none() {
                        let expected = self.interner.name(scrutinee_ty);
                        let found = self.interner.name(literal_ty);
                        self.error(
                            codes::TYPE_MISMATCH,
                            arm.pattern.span.clone(),
                            format!("pattern has type '{}', expected '{}'", found, expected),
                        );
                    }
                }
                PatternKind::TypeTag { ty, name } => {
                    let tagged = self.resolve_type(ty);
                    if let Some(name) = name {
                        self.declare_local(
                            name,
                            SymbolKind::Variable { mutable: false },
                            statement.scrutinee.id,
                            arm.pattern.span.clone(),
                            tagged,
                        );
                    }
                }
                PatternKind::Tuple(elements) => {
                    // Tuple scrutinees are not typed yet; bind wildcards only
                    for element in elements {
                        if let PatternKind::Binding(name) = &element.kind {
                            let error = self.interner.error();
                            self.declare_local(
                                name,
                                SymbolKind::Variable { mutable: false },
                                statement.scrutinee.id,
                                element.span.clone(),
                                error,
                            );
                        }
                    }
                }
                PatternKind::Destructure { name, fields } => {
                    covered.insert(name.clone());
                    let variant_fields: Option<Vec<(String, TypeId)>> = match &choice {
                        Some(info) => info
                            .variants
                            .iter()
                            .find(|v| &v.name == name)
                            .map(|v| v.fields.clone()),
                        None => self.records.get(name).map(|r| r.fields.clone()),
                    };
                    match variant_fields {
                        Some(available) => {
                            for (field, sub) in fields {
                                let Some((_, field_ty)) =
                                    available.iter().find(|(n, _)| n == field)
                                else {
                                    self.error(
                                        codes::UNDEFINED_VARIABLE,
                                        arm.pattern.span.clone(),
                                        format!("'{}' has no field '{}'", name, field),
                                    );
                                    continue;
                                };
                                match sub {
                                    Some(sub_pattern) => {
                                        if let PatternKind::Binding(bind) = &sub_pattern.kind {
                                            self.declare_local(
                                                bind,
                                                SymbolKind::Variable { mutable: false },
                                                statement.scrutinee.id,
                                                sub_pattern.span.clone(),
                                                *field_ty,
                                            );
                                        }
                                    }
                                    None => {
                                        self.declare_local(
                                            field,
                                            SymbolKind::Variable { mutable: false },
                                            statement.scrutinee.id,
                                            arm.pattern.span.clone(),
                                            *field_ty,
                                        );
                                    }
                                }
                            }
                        }
                        None => {
                            self.error(
                                codes::UNDEFINED_TYPE,
                                arm.pattern.span.clone(),
                                format!("unknown constructor '{}'", name),
                            );
                        }
                    }
                }
            }
            self.check_block(&arm.body);
            self.exit_scope();
        }

        // One arm per constructor, or a wildcard, for a closed sum
        if let Some(info) = &choice {
            if !has_catch_all {
                let missing: Vec<String> = info
                    .variants
                    .iter()
                    .filter(|v| !covered.contains(&v.name))
                    .map(|v| v.name.clone())
                    .collect();
                if !missing.is_empty() {
                    self.diagnostics.push(
                        Diagnostic::error(
                            codes::NON_EXHAUSTIVE_MATCH,
                            statement.span.clone(),
                            format!(
                                "when over '{}' is missing arms for: {}",
                                info.name,
                                missing.join(", ")
                            ),
                        )
                        .with_hint("add the missing arms or a '_' wildcard"),
                    );
                }
            }
        }
    }

    // ========================================================================
    //                          Expressions
    // ========================================================================

    fn check_expression(&mut self, expression: &Expression, expected: Option<TypeId>) -> TypeId {
        let ty = self.expression_type(expression, expected);
        self.record_type(expression.id, ty)
    }

    fn expression_type(&mut self, expression: &Expression, expected: Option<TypeId>) -> TypeId {
        match &expression.kind {
            ExprKind::Literal(literal) => self.literal_type_expecting(literal, expected, &expression.span),
            ExprKind::Identifier(name) => {
                if let Some(symbol) = self.symbols.resolve(name) {
                    let id = symbol.id;
                    let ty = symbol.ty;
                    self.node_symbols.insert(expression.id, id);
                    return ty.unwrap_or_else(|| self.interner.error());
                }
                if let Some(sig) = self.functions.get(name) {
                    let params: Vec<TypeId> = sig.params.iter().map(|(_, t)| *t).collect();
                    let ret = sig.ret;
                    return self.interner.intern(Type::Function { params, ret });
                }
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::UNDEFINED_VARIABLE,
                        expression.span.clone(),
                        format!("undefined variable '{}'", name),
                    )
                    .with_hint("declare it with 'let' or 'var' before use"),
                );
                self.interner.error()
            }
            ExprKind::Binary { op, left, right } => {
                self.check_binary(*op, left, right, &expression.span)
            }
            ExprKind::Unary { op, operand } => {
                let operand_ty = self.check_expression(operand, None);
                let operand_type = self.interner.get(operand_ty).clone();
                match op {
                    UnaryOp::Not => {
                        let bool_ty = self.interner.bool();
                        self.require_coercible(operand_ty, bool_ty, &operand.span, "operand of 'not'");
                        bool_ty
                    }
                    UnaryOp::Neg => match operand_type {
                        Type::Int { signed: true, .. }
                        | Type::Float { .. }
                        | Type::Decimal { .. }
                        | Type::Error => operand_ty,
                        Type::Int { signed: false, .. } => {
                            self.error(
                                codes::INVALID_OPERATION,
                                expression.span.clone(),
                                "cannot negate an unsigned integer",
                            );
                            operand_ty
                        }
                        _ => {
                            let name = self.interner.name(operand_ty);
                            self.error(
                                codes::INVALID_OPERATION,
                                expression.span.clone(),
                                format!("cannot negate '{}'", name),
                            );
                            self.interner.error()
                        }
                    },
                    UnaryOp::BitNot => {
                        if operand_type.is_integer() || operand_type.is_error() {
                            operand_ty
                        } else {
                            let name = self.interner.name(operand_ty);
                            self.error(
                                codes::INVALID_OPERATION,
                                expression.span.clone(),
                                format!("'~' requires an integer, found '{}'", name),
                            );
                            self.interner.error()
                        }
                    }
                }
            }
            ExprKind::Call { callee, args } => self.check_call(callee, args, &expression.span),
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => self.check_method_call(receiver, method, args, &expression.span),
            ExprKind::GenericCall {
                receiver,
                method,
                type_args,
                args,
                ..
            } => self.check_generic_call(receiver.as_deref(), method, type_args, args, &expression.span),
            ExprKind::Index { object, index } => {
                let object_ty = self.check_expression(object, None);
                let index_ty = self.check_expression(index, None);
                if !self.interner.get(index_ty).is_integer()
                    && !self.interner.get(index_ty).is_error()
                {
                    let name = self.interner.name(index_ty);
                    self.error(
                        codes::TYPE_MISMATCH,
                        index.span.clone(),
                        format!("index must be an integer, found '{}'", name),
                    );
                }
                match self.interner.get(object_ty).clone() {
                    Type::Slice { element, .. } => element,
                    Type::Text { bits } => self.interner.intern(Type::Letter { bits }),
                    Type::Error => self.interner.error(),
                    _ => {
                        let name = self.interner.name(object_ty);
                        self.error(
                            codes::INVALID_OPERATION,
                            expression.span.clone(),
                            format!("'{}' cannot be indexed", name),
                        );
                        self.interner.error()
                    }
                }
            }
            ExprKind::Field { object, field } => {
                let object_ty = self.check_expression(object, None);
                match self.interner.get(object_ty).clone() {
                    Type::Record { name } | Type::Entity { name } => {
                        let info = self.records.get(&name).cloned();
                        match info.and_then(|r| {
                            r.fields.iter().find(|(n, _)| n == field).map(|(_, t)| *t)
                        }) {
                            Some(field_ty) => field_ty,
                            None => {
                                self.error(
                                    codes::UNDEFINED_VARIABLE,
                                    expression.span.clone(),
                                    format!("'{}' has no field '{}'", name, field),
                                );
                                self.interner.error()
                            }
                        }
                    }
                    Type::Error => self.interner.error(),
                    _ => {
                        let name = self.interner.name(object_ty);
                        self.error(
                            codes::INVALID_OPERATION,
                            expression.span.clone(),
                            format!("'{}' has no fields", name),
                        );
                        self.interner.error()
                    }
                }
            }
            ExprKind::Range { start, end, step } => {
                let start_ty = self.check_expression(start, None);
                let end_ty = self.check_expression(end, None);
                if self.interner.common_type(start_ty, end_ty).is_none()
                    || !self.interner.get(start_ty).is_integer()
                {
                    self.error(
                        codes::TYPE_MISMATCH,
                        expression.span.clone(),
                        "range endpoints must share an integer type",
                    );
                }
                if let Some(step) = step {
                    let step_ty = self.check_expression(step, None);
                    if !self.interner.get(step_ty).is_integer()
                        && !self.interner.get(step_ty).is_error()
                    {
                        self.error(
                            codes::TYPE_MISMATCH,
                            step.span.clone(),
                            "range step must be an integer",
                        );
                    }
                }
                self.interner.intern(Type::Range)
            }
            ExprKind::Conditional {
                condition,
                then_value,
                else_value,
            } => {
                let bool_ty = self.interner.bool();
                let cond_ty = self.check_expression(condition, Some(bool_ty));
                self.require_coercible(cond_ty, bool_ty, &condition.span, "condition");
                let then_ty = self.check_expression(then_value, expected);
                let else_ty = self.check_expression(else_value, expected);
                match self.interner.common_type(then_ty, else_ty) {
                    Some(common) => common,
                    None => {
                        let then_name = self.interner.name(then_ty);
                        let else_name = self.interner.name(else_ty);
                        self.error(
                            codes::TYPE_MISMATCH,
                            expression.span.clone(),
                            format!(
                                "branches have incompatible types '{}' and '{}'",
                                then_name, else_name
                            ),
                        );
                        self.interner.error()
                    }
                }
            }
            ExprKind::Lambda { params, body } => {
                self.enter_scope();
                let error = self.interner.error();
                for param in params {
                    self.declare_local(
                        param,
                        SymbolKind::Parameter,
                        expression.id,
                        expression.span.clone(),
                        error,
                    );
                }
                let body_ty = self.check_expression(body, None);
                self.exit_scope();
                let param_types = vec![error; params.len()];
                self.interner.intern(Type::Function {
                    params: param_types,
                    ret: body_ty,
                })
            }
            ExprKind::FormatText { segments } => {
                for segment in segments {
                    if let FormatSegment::Expression(e) = segment {
                        self.check_expression(e, None);
                    }
                }
                self.interner.text()
            }
            ExprKind::Propagate { operand } => {
                let operand_ty = self.check_expression(operand, None);
                match self.interner.get(operand_ty).clone() {
                    Type::Fallible { inner } | Type::Optional { inner } => inner,
                    Type::Error => self.interner.error(),
                    _ => {
                        let name = self.interner.name(operand_ty);
                        self.error(
                            codes::INVALID_OPERATION,
                            expression.span.clone(),
                            format!("'?' requires a fallible value, found '{}'", name),
                        );
                        operand_ty
                    }
                }
            }
        }
    }

    fn check_binary(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
        span: &Span,
    ) -> TypeId {
        let left_ty = self.check_expression(left, None);
        let right_ty = self.check_expression(right, Some(left_ty));

        if op.is_logical() {
            let bool_ty = self.interner.bool();
            self.require_coercible(left_ty, bool_ty, &left.span, "logical operand");
            self.require_coercible(right_ty, bool_ty, &right.span, "logical operand");
            return bool_ty;
        }

        let common = match self.interner.common_type(left_ty, right_ty) {
            Some(common) => common,
            None => {
                let left_name = self.interner.name(left_ty);
                let right_name = self.interner.name(right_ty);
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::TYPE_MISMATCH,
                        span.clone(),
                        format!(
                            "operator '{}' cannot combine '{}' and '{}'",
                            op.symbol(),
                            left_name,
                            right_name
                        ),
                    )
                    .with_hint("convert one operand explicitly; only same-signedness widening is implicit"),
                );
                return self.interner.error();
            }
        };
        let common_type = self.interner.get(common).clone();

        if op.is_comparison() {
            return self.interner.bool();
        }

        if let Some(behavior) = op.overflow_behavior() {
            // Overflow variants are integer-only
            if !common_type.is_integer() && !common_type.is_error() {
                let name = self.interner.name(common);
                self.error(
                    codes::INVALID_OPERATION,
                    span.clone(),
                    format!(
                        "overflow operator '{}' applies to integers, found '{}'",
                        op.symbol(),
                        name
                    ),
                );
                return self.interner.error();
            }
            // Checked variants produce a fallible result
            if behavior == OverflowBehavior::Checked {
                return self.interner.intern(Type::Fallible { inner: common });
            }
            return common;
        }

        if op.is_bitwise() {
            if !common_type.is_integer() && !common_type.is_error() {
                let name = self.interner.name(common);
                self.error(
                    codes::INVALID_OPERATION,
                    span.clone(),
                    format!("'{}' requires integers, found '{}'", op.symbol(), name),
                );
                return self.interner.error();
            }
            return common;
        }

        match op {
            BinaryOp::Div => {
                if common_type.is_integer() {
                    self.diagnostics.push(
                        Diagnostic::error(
                            codes::INVALID_OPERATION,
                            span.clone(),
                            "'/' is fraction division; integers use '//'",
                        )
                        .with_hint("write 'a // b' for integer division"),
                    );
                    return self.interner.error();
                }
                common
            }
            BinaryOp::IntDiv | BinaryOp::Mod => {
                if !common_type.is_integer() && !common_type.is_error() {
                    let name = self.interner.name(common);
                    self.error(
                        codes::INVALID_OPERATION,
                        span.clone(),
                        format!("'{}' requires integers, found '{}'", op.symbol(), name),
                    );
                    return self.interner.error();
                }
                common
            }
            BinaryOp::Add | BinaryOp::Sub => {
                // Memory sizes and durations add among themselves
                if matches!(common_type, Type::MemorySize | Type::Duration) {
                    return common;
                }
                if !common_type.is_numeric() && !common_type.is_error() {
                    let name = self.interner.name(common);
                    self.error(
                        codes::INVALID_OPERATION,
                        span.clone(),
                        format!("'{}' requires numeric operands, found '{}'", op.symbol(), name),
                    );
                    return self.interner.error();
                }
                common
            }
            BinaryOp::Mul | BinaryOp::Pow => {
                if !common_type.is_numeric() && !common_type.is_error() {
                    let name = self.interner.name(common);
                    self.error(
                        codes::INVALID_OPERATION,
                        span.clone(),
                        format!("'{}' requires numeric operands, found '{}'", op.symbol(), name),
                    );
                    return self.interner.error();
                }
                common
            }
            _ => common,
        }
    }

    fn check_call(&mut self, callee: &Expression, args: &[Expression], span: &Span) -> TypeId {
        // Error intrinsics and plain function calls both arrive as
        // identifier callees.
        if let ExprKind::Identifier(name) = &callee.kind {
            match name.as_str() {
                "verify!" => {
                    if args.is_empty() || args.len() > 2 {
                        self.error(
                            codes::INVALID_ARGUMENTS,
                            span.clone(),
                            "verify! takes a condition and an optional message",
                        );
                    }
                    if let Some(condition) = args.first() {
                        let bool_ty = self.interner.bool();
                        let cond_ty = self.check_expression(condition, Some(bool_ty));
                        self.require_coercible(cond_ty, bool_ty, &condition.span, "verify! condition");
                    }
                    if let Some(message) = args.get(1) {
                        self.check_expression(message, None);
                    }
                    return self.interner.unit();
                }
                "breach!" | "stop!" => {
                    for arg in args {
                        self.check_expression(arg, None);
                    }
                    if args.len() > 1 {
                        self.error(
                            codes::INVALID_ARGUMENTS,
                            span.clone(),
                            format!("{} takes at most a message", name),
                        );
                    }
                    return self.interner.unit();
                }
                "address_of" | "invalidate_memory" => {
                    self.require_danger(span, name);
                    for arg in args {
                        self.check_expression(arg, None);
                    }
                    return if name == "address_of" {
                        self.interner.uaddr()
                    } else {
                        self.interner.unit()
                    };
                }
                _ => {}
            }

            // Source-location intrinsics are plain zero-argument calls
            if let Some((_, result)) = LOCATION_INTRINSICS
                .iter()
                .find(|(intrinsic, _)| *intrinsic == name.as_str())
            {
                if !args.is_empty() {
                    self.error(
                        codes::INVALID_ARGUMENTS,
                        span.clone(),
                        format!("{} takes no arguments", name),
                    );
                }
                return self.intrinsic_type(*result);
            }

            // Record constructors: Point(1.0, 2.0)
            if let Some(info) = self.records.get(name.as_str()).cloned() {
                let ty = self.named_types.get(name.as_str()).copied();
                self.check_positional_args(&info.fields, args, span, name);
                return ty.unwrap_or_else(|| self.interner.error());
            }

            // Choice variant constructors: Circle(2.0)
            if let Some((choice_name, variant)) = self.find_variant(name).map(|(c, v)| (c, v.clone()))
            {
                self.check_positional_args(&variant.fields, args, span, name);
                return self
                    .named_types
                    .get(&choice_name)
                    .copied()
                    .unwrap_or_else(|| self.interner.error());
            }

            if let Some(sig) = self.functions.get(name.as_str()).cloned() {
                return self.check_known_call(&sig, args, span);
            }

            // A local holding a function value
            if let Some(symbol) = self.symbols.resolve(name) {
                let id = symbol.id;
                let symbol_ty = symbol.ty;
                self.node_symbols.insert(callee.id, id);
                if let Some(ty) = symbol_ty {
                    self.node_types.insert(callee.id, ty);
                    if let Type::Function { params, ret } = self.interner.get(ty).clone() {
                        if params.len() != args.len() {
                            self.error(
                                codes::INVALID_ARGUMENTS,
                                span.clone(),
                                format!("expected {} arguments, got {}", params.len(), args.len()),
                            );
                        }
                        for (arg, param) in args.iter().zip(params.iter()) {
                            let arg_ty = self.check_expression(arg, Some(*param));
                            self.require_coercible(arg_ty, *param, &arg.span, "argument");
                        }
                        return ret;
                    }
                }
            }

            self.diagnostics.push(
                Diagnostic::error(
                    codes::UNDEFINED_FUNCTION,
                    callee.span.clone(),
                    format!("undefined function '{}'", name),
                )
                .with_hint("was it imported? qualified calls use 'module.function(...)'"),
            );
            for arg in args {
                self.check_expression(arg, None);
            }
            return self.interner.error();
        }

        // Calling an arbitrary expression requires a function type
        let callee_ty = self.check_expression(callee, None);
        match self.interner.get(callee_ty).clone() {
            Type::Function { params, ret } => {
                if params.len() != args.len() {
                    self.error(
                        codes::INVALID_ARGUMENTS,
                        span.clone(),
                        format!("expected {} arguments, got {}", params.len(), args.len()),
                    );
                }
                for (arg, param) in args.iter().zip(params.iter()) {
                    let arg_ty = self.check_expression(arg, Some(*param));
                    self.require_coercible(arg_ty, *param, &arg.span, "argument");
                }
                ret
            }
            Type::Error => {
                for arg in args {
                    self.check_expression(arg, None);
                }
                self.interner.error()
            }
            _ => {
                let name = self.interner.name(callee_ty);
                self.error(
                    codes::INVALID_OPERATION,
                    span.clone(),
                    format!("'{}' is not callable", name),
                );
                self.interner.error()
            }
        }
    }

    fn find_variant(&self, name: &str) -> Option<(String, &VariantInfo)> {
        for (choice_name, info) in &self.choices {
            for variant in &info.variants {
                if variant.name == name {
                    return Some((choice_name.clone(), variant));
                }
            }
        }
        None
    }

    fn check_positional_args(
        &mut self,
        fields: &[(String, TypeId)],
        args: &[Expression],
        span: &Span,
        name: &str,
    ) {
        if fields.len() != args.len() {
            self.error(
                codes::INVALID_ARGUMENTS,
                span.clone(),
                format!(
                    "'{}' expects {} arguments, got {}",
                    name,
                    fields.len(),
                    args.len()
                ),
            );
        }
        for (arg, (field_name, field_ty)) in args.iter().zip(fields.iter()) {
            let arg_ty = self.check_expression(arg, Some(*field_ty));
            self.require_coercible(arg_ty, *field_ty, &arg.span, field_name);
        }
    }

    fn check_known_call(&mut self, sig: &FunctionSig, args: &[Expression], span: &Span) -> TypeId {
        if sig.params.len() != args.len() {
            self.diagnostics.push(
                Diagnostic::error(
                    codes::INVALID_ARGUMENTS,
                    span.clone(),
                    format!(
                        "'{}' expects {} arguments, got {}",
                        sig.name,
                        sig.params.len(),
                        args.len()
                    ),
                )
                .with_related("declared here", sig.span.clone()),
            );
        }
        for (arg, (param_name, param_ty)) in args.iter().zip(sig.params.iter()) {
            let arg_ty = self.check_expression(arg, Some(*param_ty));
            self.require_coercible(arg_ty, *param_ty, &arg.span, param_name);
        }
        if sig.can_fail {
            let inner = sig.ret;
            return self.interner.intern(Type::Fallible { inner });
        }
        sig.ret
    }

    fn check_method_call(
        &mut self,
        receiver: &Expression,
        method: &str,
        args: &[Expression],
        span: &Span,
    ) -> TypeId {
        // Qualified module calls look like method calls on a module name:
        // util.helper(...)
        if let ExprKind::Identifier(module) = &receiver.kind {
            if self.symbols.resolve(module).is_none() {
                let qualified = format!("{}.{}", module, method);
                if let Some(sig) = self.functions.get(&qualified).cloned() {
                    return self.check_known_call(&sig, args, span);
                }
            }
        }

        let receiver_ty = self.check_expression(receiver, None);
        match self.interner.get(receiver_ty).clone() {
            Type::Slice { kind, element } => {
                self.check_slice_method(kind, element, method, args, span)
            }
            Type::Record { name } | Type::Entity { name } => {
                let sig = self.records.get(&name).and_then(|r| r.methods.get(method)).cloned();
                match sig {
                    Some(sig) => {
                        // `me` is bound by the receiver, not passed
                        let explicit: Vec<(String, TypeId)> = sig
                            .params
                            .iter()
                            .filter(|(n, _)| n != "me")
                            .cloned()
                            .collect();
                        let trimmed = FunctionSig {
                            params: explicit,
                            ..sig.clone()
                        };
                        self.check_known_call(&trimmed, args, span)
                    }
                    None => {
                        self.error(
                            codes::UNDEFINED_FUNCTION,
                            span.clone(),
                            format!("'{}' has no method '{}'", name, method),
                        );
                        for arg in args {
                            self.check_expression(arg, None);
                        }
                        self.interner.error()
                    }
                }
            }
            Type::Error => {
                for arg in args {
                    self.check_expression(arg, None);
                }
                self.interner.error()
            }
            _ => {
                let name = self.interner.name(receiver_ty);
                self.error(
                    codes::UNDEFINED_FUNCTION,
                    span.clone(),
                    format!("'{}' has no method '{}'", name, method),
                );
                for arg in args {
                    self.check_expression(arg, None);
                }
                self.interner.error()
            }
        }
    }

    /// The typed operations of the slice types.
    fn check_slice_method(
        &mut self,
        kind: SliceKind,
        element: TypeId,
        method: &str,
        args: &[Expression],
        span: &Span,
    ) -> TypeId {
        for arg in args {
            self.check_expression(arg, None);
        }
        let expect_args = |checker: &mut Self, n: usize| {
            if args.len() != n {
                checker.error(
                    codes::INVALID_ARGUMENTS,
                    span.clone(),
                    format!("'{}' expects {} arguments, got {}", method, n, args.len()),
                );
            }
        };
        match method {
            "size" => {
                expect_args(self, 0);
                self.interner.s64()
            }
            "address" | "refer" => {
                expect_args(self, 0);
                self.interner.uaddr()
            }
            "is_valid" => {
                expect_args(self, 0);
                self.interner.bool()
            }
            "unsafe_ptr" => {
                expect_args(self, 1);
                self.require_danger(span, "unsafe_ptr");
                self.interner.uaddr()
            }
            "subslice" => {
                expect_args(self, 2);
                self.interner.intern(Type::Slice { kind, element })
            }
            "hijack" => {
                expect_args(self, 0);
                self.interner.intern(Type::Slice {
                    kind: SliceKind::Dynamic,
                    element,
                })
            }
            _ => {
                self.error(
                    codes::UNDEFINED_FUNCTION,
                    span.clone(),
                    format!("slices have no method '{}'", method),
                );
                self.interner.error()
            }
        }
    }

    fn check_generic_call(
        &mut self,
        receiver: Option<&Expression>,
        method: &str,
        type_args: &[TypeExpr],
        args: &[Expression],
        span: &Span,
    ) -> TypeId {
        // Slice read/write: s.read<T>(off), s.write<T>(off, v)
        if let Some(receiver) = receiver {
            let receiver_ty = self.check_expression(receiver, None);
            let resolved: Vec<TypeId> = type_args.iter().map(|t| self.resolve_type(t)).collect();
            if let Type::Slice { .. } = self.interner.get(receiver_ty) {
                match method {
                    "read" => {
                        for arg in args {
                            self.check_expression(arg, None);
                        }
                        return resolved.first().copied().unwrap_or_else(|| self.interner.error());
                    }
                    "write" => {
                        let target = resolved.first().copied();
                        for (index, arg) in args.iter().enumerate() {
                            let expected = if index == 1 { target } else { None };
                            self.check_expression(arg, expected);
                        }
                        return self.interner.unit();
                    }
                    _ => {}
                }
            }
            self.error(
                codes::UNDEFINED_FUNCTION,
                span.clone(),
                format!("no generic method '{}' on this receiver", method),
            );
            for arg in args {
                self.check_expression(arg, None);
            }
            return self.interner.error();
        }

        let resolved: Vec<TypeId> = type_args.iter().map(|t| self.resolve_type(t)).collect();

        // Compile-time intrinsics
        if let Some((_, result)) = GENERIC_INTRINSICS
            .iter()
            .find(|(intrinsic, _)| intrinsic == &method)
        {
            if resolved.len() != 1 {
                self.error(
                    codes::INVALID_ARGUMENTS,
                    span.clone(),
                    format!("{} takes exactly one type argument", method),
                );
            }
            for arg in args {
                self.check_expression(arg, None);
            }
            return self.intrinsic_type(*result);
        }

        // Danger-zone raw memory operations
        match method {
            "read_as" | "volatile_read" => {
                self.require_danger(span, method);
                for arg in args {
                    self.check_expression(arg, None);
                }
                return resolved.first().copied().unwrap_or_else(|| self.interner.error());
            }
            "write_as" | "volatile_write" => {
                self.require_danger(span, method);
                // The stored value adopts the generic operand type
                let target = resolved.first().copied();
                for (index, arg) in args.iter().enumerate() {
                    let expected = if index == 1 { target } else { None };
                    self.check_expression(arg, expected);
                }
                return self.interner.unit();
            }
            _ => {}
        }

        // Slice constructors: DynamicSlice<T>(bytes)
        if method == "DynamicSlice" || method == "TemporarySlice" {
            let kind = if method == "DynamicSlice" {
                SliceKind::Dynamic
            } else {
                SliceKind::Temporary
            };
            let element = resolved.first().copied().unwrap_or_else(|| self.interner.error());
            if args.len() != 1 {
                self.error(
                    codes::INVALID_ARGUMENTS,
                    span.clone(),
                    format!("{} takes a size argument", method),
                );
            }
            for arg in args {
                let arg_ty = self.check_expression(arg, None);
                if !self.interner.get(arg_ty).is_integer()
                    && !matches!(self.interner.get(arg_ty), Type::MemorySize | Type::Error)
                {
                    self.error(
                        codes::TYPE_MISMATCH,
                        arg.span.clone(),
                        "slice size must be an integer or memory-size value",
                    );
                }
            }
            return self.interner.intern(Type::Slice { kind, element });
        }

        // A generic user function: check the call with parameters
        // substituted by the supplied arguments.
        if let Some(sig) = self.functions.get(method).cloned() {
            if !sig.generic_params.is_empty() {
                if sig.generic_params.len() != resolved.len() {
                    self.error(
                        codes::INVALID_ARGUMENTS,
                        span.clone(),
                        format!(
                            "'{}' expects {} type arguments, got {}",
                            method,
                            sig.generic_params.len(),
                            resolved.len()
                        ),
                    );
                }
                let bindings: HashMap<String, TypeId> = sig
                    .generic_params
                    .iter()
                    .cloned()
                    .zip(resolved.iter().copied())
                    .collect();
                let params: Vec<(String, TypeId)> = sig
                    .params
                    .iter()
                    .map(|(n, t)| (n.clone(), self.substitute(*t, &bindings)))
                    .collect();
                let ret = self.substitute(sig.ret, &bindings);
                let instantiated = FunctionSig {
                    params,
                    ret,
                    ..sig.clone()
                };
                return self.check_known_call(&instantiated, args, span);
            }
            return self.check_known_call(&sig, args, span);
        }

        self.error(
            codes::UNDEFINED_FUNCTION,
            span.clone(),
            format!("undefined generic function '{}'", method),
        );
        for arg in args {
            self.check_expression(arg, None);
        }
        self.interner.error()
    }

    /// Replace generic parameters inside a type with bound arguments.
    fn substitute(&mut self, ty: TypeId, bindings: &HashMap<String, TypeId>) -> TypeId {
        match self.interner.get(ty).clone() {
            Type::Generic { name } => bindings.get(&name).copied().unwrap_or(ty),
            Type::Pointer { pointee } => {
                let pointee = self.substitute(pointee, bindings);
                self.interner.intern(Type::Pointer { pointee })
            }
            Type::Slice { kind, element } => {
                let element = self.substitute(element, bindings);
                self.interner.intern(Type::Slice { kind, element })
            }
            Type::Fallible { inner } => {
                let inner = self.substitute(inner, bindings);
                self.interner.intern(Type::Fallible { inner })
            }
            Type::Optional { inner } => {
                let inner = self.substitute(inner, bindings);
                self.interner.intern(Type::Optional { inner })
            }
            _ => ty,
        }
    }

    fn intrinsic_type(&mut self, result: IntrinsicResult) -> TypeId {
        match result {
            IntrinsicResult::Int => self.interner.s64(),
            IntrinsicResult::Text => self.interner.text(),
            IntrinsicResult::Bool => self.interner.bool(),
        }
    }

    fn require_danger(&mut self, span: &Span, operation: &str) {
        if !self.in_danger {
            self.diagnostics.push(
                Diagnostic::error(
                    codes::ACCESS_VIOLATION,
                    span.clone(),
                    format!("'{}' requires a danger! block", operation),
                )
                .with_hint("wrap the raw memory access in 'danger! { ... }'"),
            );
        }
    }

    // ========================================================================
    //                           Literals
    // ========================================================================

    fn literal_type(&mut self, literal: &Literal) -> TypeId {
        match literal {
            Literal::Int { kind, .. } => self.int_literal_type(*kind),
            Literal::Float { kind, .. } => self.float_literal_type(*kind),
            Literal::Text { kind, .. } => {
                let bits = match kind {
                    TokenKind::Text8Literal => 8,
                    TokenKind::Text16Literal => 16,
                    _ => 32,
                };
                self.interner.intern(Type::Text { bits })
            }
            Literal::Letter { kind, .. } => {
                let bits = match kind {
                    TokenKind::Letter8Literal => 8,
                    TokenKind::Letter16Literal => 16,
                    _ => 32,
                };
                self.interner.intern(Type::Letter { bits })
            }
            Literal::Bool(_) => self.interner.bool(),
            Literal::MemorySize(_) => self.interner.intern(Type::MemorySize),
            Literal::Duration(_) => self.interner.intern(Type::Duration),
            Literal::None => self.interner.unit(),
        }
    }

    /// Literal typing with expected-type adoption: an integer literal
    /// without a binding suffix adopts a concrete expected integer type
    /// when its value fits.
    fn literal_type_expecting(
        &mut self,
        literal: &Literal,
        expected: Option<TypeId>,
        span: &Span,
    ) -> TypeId {
        let natural = self.literal_type(literal);
        let Some(expected) = expected else {
            return natural;
        };

        if let Literal::Int { value, kind } = literal {
            if *kind == TokenKind::S64Literal {
                if let Type::Int { bits, signed } = *self.interner.get(expected) {
                    if int_fits(*value, bits, signed) {
                        return expected;
                    }
                    let name = self.interner.name(expected);
                    self.error(
                        codes::INVALID_OPERATION,
                        span.clone(),
                        format!("literal {} does not fit in '{}'", value, name),
                    );
                    return expected;
                }
                if matches!(self.interner.get(expected), Type::Address { .. }) {
                    return expected;
                }
            }
        }
        if let Literal::Float { kind, .. } = literal {
            if *kind == TokenKind::F64Literal
                && matches!(self.interner.get(expected), Type::Float { .. })
            {
                return expected;
            }
        }
        natural
    }

    fn int_literal_type(&mut self, kind: TokenKind) -> TypeId {
        use TokenKind::*;
        let (bits, signed) = match kind {
            S8Literal => (8, true),
            S16Literal => (16, true),
            S32Literal => (32, true),
            S128Literal => (128, true),
            U8Literal => (8, false),
            U16Literal => (16, false),
            U32Literal => (32, false),
            U64Literal => (64, false),
            U128Literal => (128, false),
            _ => (64, true),
        };
        self.interner.intern(Type::Int { bits, signed })
    }

    fn float_literal_type(&mut self, kind: TokenKind) -> TypeId {
        use TokenKind::*;
        let ty = match kind {
            F16Literal => Type::Float { bits: 16 },
            F32Literal => Type::Float { bits: 32 },
            F128Literal => Type::Float { bits: 128 },
            D32Literal => Type::Decimal { bits: 32 },
            D64Literal => Type::Decimal { bits: 64 },
            D128Literal => Type::Decimal { bits: 128 },
            _ => Type::Float { bits: 64 },
        };
        self.interner.intern(ty)
    }

    fn require_coercible(&mut self, from: TypeId, to: TypeId, span: &Span, what: &str) {
        if self.interner.can_coerce(from, to) {
            return;
        }
        let from_name = self.interner.name(from);
        let to_name = self.interner.name(to);
        self.error(
            codes::TYPE_MISMATCH,
            span.clone(),
            format!(
                "{} has type '{}', expected '{}'",
                what, from_name, to_name
            ),
        );
    }
}

fn int_fits(value: i128, bits: u16, signed: bool) -> bool {
    match (bits, signed) {
        (8, true) => i8::try_from(value).is_ok(),
        (16, true) => i16::try_from(value).is_ok(),
        (32, true) => i32::try_from(value).is_ok(),
        (64, true) => i64::try_from(value).is_ok(),
        (8, false) => u8::try_from(value).is_ok(),
        (16, false) => u16::try_from(value).is_ok(),
        (32, false) => u32::try_from(value).is_ok(),
        (64, false) => u64::try_from(value).is_ok(),
        _ => true,
    }
}

fn declaration_node_id(declaration: &Declaration) -> NodeId {
    match declaration {
        Declaration::Function(d) => d.id,
        Declaration::External(d) => d.id,
        Declaration::Record(d) => d.id,
        Declaration::Entity(d) => d.id,
        Declaration::Choice(d) => d.id,
        Declaration::Protocol(d) => d.id,
        Declaration::Import(d) => d.id,
        Declaration::Redefine(d) => d.id,
        Declaration::Variable(d) => d.id,
    }
}

/// Conservative "returns on every path" test for the missing-return check.
fn block_always_returns(block: &Block) -> bool {
    block.statements.iter().any(statement_always_returns)
}

fn statement_always_returns(statement: &Statement) -> bool {
    match statement {
        Statement::Return { .. } => true,
        Statement::Block(block) | Statement::Danger { body: block, .. } => {
            block_always_returns(block)
        }
        Statement::If(s) => {
            s.else_block.as_ref().is_some_and(block_always_returns)
                && s.branches.iter().all(|(_, body)| block_always_returns(body))
        }
        Statement::When(s) => {
            !s.arms.is_empty() && s.arms.iter().all(|arm| block_always_returns(&arm.body))
        }
        Statement::Expression(e) => {
            // breach!/stop! terminate the block
            matches!(&e.kind, ExprKind::Call { callee, .. }
                if matches!(&callee.kind, ExprKind::Identifier(n) if n == "breach!" || n == "stop!"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::token::Dialect;

    fn analyze(source: &str) -> Analysis {
        let (program, parse_diagnostics) =
            Parser::new(source, "test.rf", Dialect::RazorForge).parse();
        assert!(
            parse_diagnostics.is_empty(),
            "parse diagnostics: {:?}",
            parse_diagnostics
        );
        TypeChecker::new().check_program(&program, &ModuleSet::default())
    }

    fn codes_of(analysis: &Analysis) -> Vec<&'static str> {
        analysis.diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_clean_function() {
        let analysis = analyze("routine add(a: s32, b: s32) -> s32 { return a + b }");
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_every_expression_gets_a_type() {
        let source = "routine f() -> s64 { let x = 2\n    return x + 3 }";
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
        // Every recorded type is concrete
        for ty in analysis.node_types.values() {
            assert!(!analysis.interner.get(*ty).is_error());
        }
        assert!(!analysis.node_types.is_empty());
    }

    #[test]
    fn test_undefined_variable() {
        let analysis = analyze("routine f() -> s64 { return missing }");
        assert!(codes_of(&analysis).contains(&codes::UNDEFINED_VARIABLE));
    }

    #[test]
    fn test_undefined_function() {
        let analysis = analyze("routine f() { ghost() }");
        assert!(codes_of(&analysis).contains(&codes::UNDEFINED_FUNCTION));
    }

    #[test]
    fn test_undefined_type() {
        let analysis = analyze("routine f(x: Ghost) { return }");
        assert!(codes_of(&analysis).contains(&codes::UNDEFINED_TYPE));
    }

    #[test]
    fn test_duplicate_definition_has_backreference() {
        let analysis = analyze("routine foo() { return }\nroutine foo() { return }");
        let diagnostic = analysis
            .diagnostics
            .iter()
            .find(|d| d.code == codes::DUPLICATE_DEFINITION)
            .expect("expected ES005");
        assert_eq!(diagnostic.related.len(), 1);
        assert_eq!(diagnostic.related[0].label, "first defined here");
        // The second definition is on line 2; the original on line 1
        assert_eq!(diagnostic.span.start_line, 2);
        assert_eq!(diagnostic.related[0].span.start_line, 1);
    }

    #[test]
    fn test_widening_is_implicit_same_signedness() {
        let analysis = analyze(
            "routine f(small: s16, big: s64) -> s64 { return small + big }",
        );
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_mixed_signedness_rejected() {
        let analysis = analyze("routine f(a: s32, b: u32) -> s32 { return a + b }");
        assert!(codes_of(&analysis).contains(&codes::TYPE_MISMATCH));
    }

    #[test]
    fn test_overflow_operator_integer_only() {
        let analysis = analyze("routine f(a: f64, b: f64) -> f64 { return a +% b }");
        assert!(codes_of(&analysis).contains(&codes::INVALID_OPERATION));
    }

    #[test]
    fn test_checked_operator_is_fallible() {
        let source = "routine f(a: s32, b: s32) -> s32 { return (a +? b)? }";
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_checked_subtract_on_unsigned_keeps_type() {
        // `-?` on unsigned operands stays unsigned and fallible
        let source = "routine f(a: u32, b: u32) -> u32 { return (a -? b)? }";
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_fraction_division_rejects_integers() {
        let analysis = analyze("routine f(a: s32, b: s32) -> s32 { return a / b }");
        assert!(codes_of(&analysis).contains(&codes::INVALID_OPERATION));
        let clean = analyze("routine f(a: s32, b: s32) -> s32 { return a // b }");
        assert!(clean.diagnostics.is_empty(), "{:?}", clean.diagnostics);
    }

    #[test]
    fn test_immutable_assignment_rejected() {
        let analysis = analyze("routine f() { let x = 1\n    x = 2 }");
        let diagnostic = analysis
            .diagnostics
            .iter()
            .find(|d| d.code == codes::INVALID_OPERATION)
            .expect("expected assignment error");
        assert!(diagnostic.message.contains("immutable"));
        let clean = analyze("routine f() { var x = 1\n    x = 2 }");
        assert!(clean.diagnostics.is_empty(), "{:?}", clean.diagnostics);
    }

    #[test]
    fn test_missing_return() {
        let analysis = analyze("routine f(flag: bool) -> s64 { if flag { return 1 } }");
        assert!(codes_of(&analysis).contains(&codes::MISSING_RETURN));
        let clean =
            analyze("routine f(flag: bool) -> s64 { if flag { return 1 } else { return 2 } }");
        assert!(clean.diagnostics.is_empty(), "{:?}", clean.diagnostics);
    }

    #[test]
    fn test_when_exhaustiveness() {
        let source = r#"choice Shape {
    Circle { radius: f64 },
    Square { side: f64 }
}
routine f(shape: Shape) {
    when shape {
        Circle { radius } => radius
    }
}"#;
        let analysis = analyze(source);
        let diagnostic = analysis
            .diagnostics
            .iter()
            .find(|d| d.code == codes::NON_EXHAUSTIVE_MATCH)
            .expect("expected ES008");
        assert!(diagnostic.message.contains("Square"));
    }

    #[test]
    fn test_when_wildcard_covers() {
        let source = r#"choice Shape {
    Circle { radius: f64 },
    Square { side: f64 }
}
routine f(shape: Shape) {
    when shape {
        Circle { radius } => radius
        _ => 0.0
    }
}"#;
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_danger_gates_raw_memory() {
        let outside = analyze("routine f() { let v = read_as<s32>!(4096) }");
        assert!(codes_of(&outside).contains(&codes::ACCESS_VIOLATION));

        let inside = analyze("routine f() { danger! { let v = read_as<s32>!(4096) } }");
        assert!(inside.diagnostics.is_empty(), "{:?}", inside.diagnostics);
    }

    #[test]
    fn test_temporary_slice_cannot_escape() {
        let source = "routine f() -> TemporarySlice<u8> { let buffer = TemporarySlice<u8>(64)\n    return buffer }";
        let analysis = analyze(source);
        assert!(codes_of(&analysis).contains(&codes::MEMORY_ERROR));
    }

    #[test]
    fn test_hijack_makes_dynamic() {
        let source = "routine f() -> DynamicSlice<u8> { let buffer = TemporarySlice<u8>(64)\n    return buffer.hijack() }";
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_generic_template_requires_arguments() {
        let source = "record Box<T> { value: T }\nroutine f(b: Box) { return }";
        let analysis = analyze(source);
        let diagnostic = analysis
            .diagnostics
            .iter()
            .find(|d| d.code == codes::GENERIC_ARGS_REQUIRED)
            .expect("expected ES014");
        assert!(diagnostic.hint.as_deref().unwrap().contains("Box<...>"));
    }

    #[test]
    fn test_generic_instantiation() {
        let source = "record Box<T> { value: T }\nroutine f(b: Box<s32>) -> s32 { return b.value }";
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
        assert!(analysis.records.contains_key("Box<s32>"));
    }

    #[test]
    fn test_generic_function_call() {
        let source = "routine id<T>(value: T) -> T { return value }\nroutine f() -> s32 { return id<s32>(5) }";
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_record_field_access_and_method() {
        let source = r#"record Point {
    x: f64,
    y: f64,
    routine sum(me) -> f64 { return me.x + me.y }
}
routine f(p: Point) -> f64 { return p.x + p.sum() }"#;
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_choice_constructor_call() {
        let source = r#"choice Shape {
    Circle { radius: f64 },
    Empty
}
routine f() -> Shape { return Circle(1.5) }"#;
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_fallible_function_requires_propagation() {
        let source = "routine risky!() -> s64 { return 1 }\nroutine f() -> s64 { return risky() }";
        let analysis = analyze(source);
        // risky() yields s64! which cannot flow into a plain s64
        assert!(codes_of(&analysis).contains(&codes::TYPE_MISMATCH));
        let clean = "routine risky!() -> s64 { return 1 }\nroutine f() -> s64 { return risky()? }";
        let analysis = analyze(clean);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_verify_condition_must_be_bool() {
        let analysis = analyze("routine f(n: s64) { verify!(n, \"boom\") }");
        assert!(codes_of(&analysis).contains(&codes::TYPE_MISMATCH));
        let clean = analyze("routine f(n: s64) { verify!(n > 0, \"boom\") }");
        assert!(clean.diagnostics.is_empty(), "{:?}", clean.diagnostics);
    }

    #[test]
    fn test_intrinsic_result_types() {
        let source = "routine f() -> s64 { let n = size_of<s32>()\n    let name = get_file_name()\n    return n + get_line_number() }";
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_for_over_range_and_slice() {
        let source = "routine f(bytes: DynamicSlice<u8>) -> s64 {\n    var total = 0\n    for i in 0 to 10 by 2 { total += i }\n    for b in bytes { total += 1 }\n    return total\n}";
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_break_outside_loop() {
        let analysis = analyze("routine f() { break }");
        assert!(codes_of(&analysis).contains(&codes::INVALID_OPERATION));
    }

    #[test]
    fn test_literal_adopts_annotated_type() {
        let clean = analyze("routine f() { let small: u8 = 200 }");
        assert!(clean.diagnostics.is_empty(), "{:?}", clean.diagnostics);
        let overflow = analyze("routine f() { let small: u8 = 300 }");
        assert!(!overflow.diagnostics.is_empty());
    }

    #[test]
    fn test_comparison_chain_types() {
        let analysis = analyze("routine f(a: s64, b: s64, c: s64) -> bool { return a < b <= c }");
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_shadowing_resolves_nearest() {
        let source = "routine f() -> s64 {\n    let x = 1\n    if true {\n        let x = 2\n        return x\n    }\n    return x\n}";
        let analysis = analyze(source);
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }

    #[test]
    fn test_redefine_alias_resolves() {
        let analysis = analyze("redefine Id = u64\nroutine f(x: Id) -> u64 { return x }");
        assert!(analysis.diagnostics.is_empty(), "{:?}", analysis.diagnostics);
    }
}
