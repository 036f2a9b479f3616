//! Call lowering: user functions, runtime-backed methods, compile-time
//! intrinsics, and error throws.
//!
//! Intrinsics are recognized by name. Compile-time intrinsics
//! (`size_of<T>` and friends) become constants; source-location intrinsics
//! become constants taken from the current node's span; `verify!`,
//! `breach!`, and `stop!` lower to a conditional branch plus a call into
//! the stack-trace runtime, after which the block is terminated.

use super::{mangle_name, CodeGen, CodeGenError, EmitState, Value};
use crate::ast::*;
use crate::types::{Type, TypeId};
use std::fmt::Write as _;

impl CodeGen<'_> {
    pub(crate) fn emit_call(
        &mut self,
        expression: &Expression,
        callee: &Expression,
        args: &[Expression],
    ) -> Result<Value, CodeGenError> {
        let ExprKind::Identifier(name) = &callee.kind else {
            return self.emit_indirect_call(callee, args);
        };

        match name.as_str() {
            "verify!" => return self.emit_verify(args),
            "breach!" => return self.emit_halt("BreachError", args),
            "stop!" => return self.emit_halt("StopError", args),
            "get_line_number" => {
                return Ok(Value::new(expression.span.start_line.to_string(), "i64"));
            }
            "get_column_number" => {
                return Ok(Value::new(expression.span.start_column.to_string(), "i64"));
            }
            "get_file_name" => {
                let file = self.current_file.display().to_string();
                let global = self.get_string_global(&file)?;
                return Ok(Value::new(global, "ptr"));
            }
            "get_caller_name" => {
                let name = self.current_function.clone();
                let global = self.get_string_global(&name)?;
                return Ok(Value::new(global, "ptr"));
            }
            "get_current_module" => {
                let module = self
                    .current_file
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let global = self.get_string_global(&module)?;
                return Ok(Value::new(global, "ptr"));
            }
            "address_of" => {
                let [argument] = args else {
                    return Err(CodeGenError::Logic(
                        "address_of takes exactly one argument".to_string(),
                    ));
                };
                let ExprKind::Identifier(local) = &argument.kind else {
                    return Err(CodeGenError::Logic(
                        "unsupported address_of operand; name a local".to_string(),
                    ));
                };
                let slot = self.lookup_local(local).ok_or_else(|| {
                    CodeGenError::Logic(format!("missing symbol for '{}'", local))
                })?;
                let word = self.target.word_type();
                let temp = self.typed_temp(&word);
                writeln!(
                    self.output,
                    "  {} = call {} @address_of(ptr {})",
                    temp, word, slot.ptr
                )?;
                return Ok(Value::new(temp, word));
            }
            "invalidate_memory" => {
                let [argument] = args else {
                    return Err(CodeGenError::Logic(
                        "invalidate_memory takes exactly one argument".to_string(),
                    ));
                };
                let address = self.emit_expression(argument)?;
                let word = self.target.word_type();
                writeln!(
                    self.output,
                    "  call void @invalidate_memory({} {})",
                    word, address.repr
                )?;
                return Ok(Value::unit());
            }
            _ => {}
        }

        // Record constructor
        if let Some(info) = self.analysis.records.get(name.as_str()).cloned() {
            return self.emit_record_constructor(&info.fields, args);
        }

        // Choice variant constructor
        if let Some((tag, fields)) = self.find_variant_layout(name) {
            return self.emit_choice_constructor(tag, &fields, args);
        }

        let Some(sig) = self.analysis.functions.get(name.as_str()).cloned() else {
            // A local holding a function value calls indirectly
            if self.lookup_local(name).is_some() {
                return self.emit_indirect_call(callee, args);
            }
            return Err(CodeGenError::Logic(format!("missing symbol for '{}'", name)));
        };
        if !sig.generic_params.is_empty() {
            return Err(CodeGenError::Logic(
                "unsupported feature: calling a generic routine without type arguments"
                    .to_string(),
            ));
        }
        self.emit_direct_call(&sig, None, args)
    }

    /// Locate a choice variant's tag index and field layout.
    fn find_variant_layout(&self, name: &str) -> Option<(usize, Vec<(String, TypeId)>)> {
        for info in self.analysis.choices.values() {
            if let Some(position) = info.variants.iter().position(|v| v.name == name) {
                return Some((position, info.variants[position].fields.clone()));
            }
        }
        None
    }

    fn emit_direct_call(
        &mut self,
        sig: &crate::typechecker::FunctionSig,
        receiver: Option<Value>,
        args: &[Expression],
    ) -> Result<Value, CodeGenError> {
        let mut lowered: Vec<String> = Vec::new();
        let mut params = sig.params.iter();

        if let Some(receiver) = receiver {
            if sig.params.first().is_some_and(|(name, _)| name == "me") {
                let _ = params.next();
            }
            lowered.push(format!("ptr {}", receiver.repr));
        }

        for argument in args {
            let value = self.emit_expression(argument)?;
            let value = match params.next() {
                Some((_, param_ty)) => {
                    let argument_ty = self.node_type(argument.id)?;
                    self.coerce(value, argument_ty, *param_ty)?
                }
                None => value,
            };
            lowered.push(format!("{} {}", value.ty, value.repr));
        }

        let ret = self.llvm_of(sig.ret);
        if ret == "void" {
            writeln!(
                self.output,
                "  call void @{}({})",
                mangle_name(&sig.name),
                lowered.join(", ")
            )?;
            Ok(Value::unit())
        } else {
            let temp = self.typed_temp(&ret);
            writeln!(
                self.output,
                "  {} = call {} @{}({})",
                temp,
                ret,
                mangle_name(&sig.name),
                lowered.join(", ")
            )?;
            Ok(Value::new(temp, ret))
        }
    }

    /// Call through a function value.
    fn emit_indirect_call(
        &mut self,
        callee: &Expression,
        args: &[Expression],
    ) -> Result<Value, CodeGenError> {
        let callee_ty = self.node_type(callee.id)?;
        let Type::Function { ret, .. } = self.analysis.interner.get(callee_ty).clone() else {
            return Err(CodeGenError::Logic(
                "call through a non-function value".to_string(),
            ));
        };
        let callee_value = self.emit_expression(callee)?;
        let mut lowered = Vec::new();
        for argument in args {
            let value = self.emit_expression(argument)?;
            lowered.push(format!("{} {}", value.ty, value.repr));
        }
        let ret_llvm = self.llvm_of(ret);
        if ret_llvm == "void" {
            writeln!(
                self.output,
                "  call void {}({})",
                callee_value.repr,
                lowered.join(", ")
            )?;
            Ok(Value::unit())
        } else {
            let temp = self.typed_temp(&ret_llvm);
            writeln!(
                self.output,
                "  {} = call {} {}({})",
                temp,
                ret_llvm,
                callee_value.repr,
                lowered.join(", ")
            )?;
            Ok(Value::new(temp, ret_llvm))
        }
    }

    pub(crate) fn emit_method_call(
        &mut self,
        expression: &Expression,
        receiver: &Expression,
        method: &str,
        args: &[Expression],
    ) -> Result<Value, CodeGenError> {
        let _ = expression;

        // Qualified module call: util.helper(...)
        if let ExprKind::Identifier(module) = &receiver.kind {
            if self.lookup_local(module).is_none() {
                let qualified = format!("{}.{}", module, method);
                if let Some(sig) = self.analysis.functions.get(&qualified).cloned() {
                    return self.emit_direct_call(&sig, None, args);
                }
            }
        }

        let receiver_ty = self.node_type(receiver.id)?;
        match self.analysis.interner.get(receiver_ty).clone() {
            Type::Slice { element, .. } => {
                let receiver_value = self.emit_expression(receiver)?;
                self.emit_slice_method(&receiver_value, element, method, args)
            }
            Type::Record { name } | Type::Entity { name } => {
                let sig = self
                    .analysis
                    .records
                    .get(&name)
                    .and_then(|info| info.methods.get(method))
                    .cloned()
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!("'{}' has no method '{}'", name, method))
                    })?;
                let receiver_value = self.emit_expression(receiver)?;
                self.emit_direct_call(&sig, Some(receiver_value), args)
            }
            other => Err(CodeGenError::Logic(format!(
                "unsupported method receiver of type {:?}",
                other
            ))),
        }
    }

    /// Slice method calls lower straight onto the runtime ABI.
    fn emit_slice_method(
        &mut self,
        receiver: &Value,
        element: TypeId,
        method: &str,
        args: &[Expression],
    ) -> Result<Value, CodeGenError> {
        let word = self.target.word_type();
        let mut lowered = Vec::new();
        for argument in args {
            let value = self.emit_expression(argument)?;
            lowered.push(value);
        }
        let _ = element;

        let (symbol, ret): (&str, String) = match method {
            "size" => ("slice_size", word.clone()),
            "address" => ("slice_address", word.clone()),
            "refer" => ("slice_refer", word.clone()),
            "is_valid" => ("slice_is_valid", "i1".to_string()),
            "unsafe_ptr" => ("slice_unsafe_ptr", word.clone()),
            "subslice" => ("slice_subslice", "ptr".to_string()),
            "hijack" => ("slice_hijack", "ptr".to_string()),
            _ => {
                return Err(CodeGenError::Logic(format!(
                    "unsupported slice method '{}'",
                    method
                )));
            }
        };

        let mut call_args = vec![format!("ptr {}", receiver.repr)];
        for value in &lowered {
            call_args.push(format!("{} {}", word, value.repr));
        }
        let temp = self.typed_temp(&ret);
        writeln!(
            self.output,
            "  {} = call {} @{}({})",
            temp,
            ret,
            symbol,
            call_args.join(", ")
        )?;
        Ok(Value::new(temp, ret))
    }

    pub(crate) fn emit_generic_call(
        &mut self,
        expression: &Expression,
        receiver: Option<&Expression>,
        method: &str,
        type_args: &[TypeExpr],
        args: &[Expression],
    ) -> Result<Value, CodeGenError> {
        // Slice typed read/write go through the unsafe-pointer runtime path
        if let Some(receiver) = receiver {
            let receiver_ty = self.node_type(receiver.id)?;
            if let Type::Slice { .. } = self.analysis.interner.get(receiver_ty) {
                let element = self.node_type(expression.id)?;
                match method {
                    "read" if args.len() == 1 => {
                        let receiver_value = self.emit_expression(receiver)?;
                        let index = self.emit_expression(&args[0])?;
                        let pointer =
                            self.slice_element_pointer(&receiver_value, &index, element)?;
                        let element_llvm = self.llvm_of(element);
                        let temp = self.typed_temp(&element_llvm);
                        writeln!(
                            self.output,
                            "  {} = load {}, ptr {}",
                            temp, element_llvm, pointer
                        )?;
                        return Ok(Value::new(temp, element_llvm));
                    }
                    "write" if args.len() == 2 => {
                        let receiver_value = self.emit_expression(receiver)?;
                        let index = self.emit_expression(&args[0])?;
                        let value = self.emit_expression(&args[1])?;
                        let value_ty = self.node_type(args[1].id)?;
                        let pointer =
                            self.slice_element_pointer(&receiver_value, &index, value_ty)?;
                        writeln!(
                            self.output,
                            "  store {} {}, ptr {}",
                            value.ty, value.repr, pointer
                        )?;
                        return Ok(Value::unit());
                    }
                    _ => {}
                }
            }
            return Err(CodeGenError::Logic(format!(
                "unsupported generic method '{}'",
                method
            )));
        }

        match method {
            // Compile-time intrinsics replaced by constants
            "size_of" | "align_of" => {
                let size = self.type_argument_size(type_args)?;
                return Ok(Value::new(size.to_string(), "i64"));
            }
            "field_count" => {
                let count = self.type_argument_record(type_args)?.fields.len();
                return Ok(Value::new(count.to_string(), "i64"));
            }
            "field_names" => {
                let info = self.type_argument_record(type_args)?;
                let names: Vec<String> = info.fields.iter().map(|(n, _)| n.clone()).collect();
                let global = self.get_string_global(&names.join(","))?;
                return Ok(Value::new(global, "ptr"));
            }
            "get_compile_type_name" => {
                let name = type_args
                    .first()
                    .map(|t| t.head_name())
                    .ok_or_else(|| CodeGenError::Logic("missing type argument".to_string()))?;
                let global = self.get_string_global(&name)?;
                return Ok(Value::new(global, "ptr"));
            }
            "has_method" => {
                let info = self.type_argument_record(type_args)?;
                let wanted = args.first().and_then(|a| match &a.kind {
                    ExprKind::Literal(Literal::Text { value, .. }) => Some(value.clone()),
                    _ => None,
                });
                let answer = match wanted {
                    Some(name) => info.methods.contains_key(&name),
                    None => false,
                };
                return Ok(Value::new(answer.to_string(), "i1"));
            }

            // Danger-zone raw memory: direct inttoptr + load/store with the
            // operand width taken from the generic argument
            "read_as" | "volatile_read" => {
                let [address_arg] = args else {
                    return Err(CodeGenError::Logic(format!(
                        "{} takes an address argument",
                        method
                    )));
                };
                let address = self.emit_expression(address_arg)?;
                let pointer = self.typed_temp("ptr");
                writeln!(
                    self.output,
                    "  {} = inttoptr {} {} to ptr",
                    pointer, address.ty, address.repr
                )?;
                let result_ty = self.node_type(expression.id)?;
                let result_llvm = self.llvm_of(result_ty);
                let temp = self.typed_temp(&result_llvm);
                let volatility = if method == "volatile_read" { "volatile " } else { "" };
                writeln!(
                    self.output,
                    "  {} = load {}{}, ptr {}",
                    temp, volatility, result_llvm, pointer
                )?;
                return Ok(Value::new(temp, result_llvm));
            }
            "write_as" | "volatile_write" => {
                let [address_arg, value_arg] = args else {
                    return Err(CodeGenError::Logic(format!(
                        "{} takes an address and a value",
                        method
                    )));
                };
                let address = self.emit_expression(address_arg)?;
                let value = self.emit_expression(value_arg)?;
                let pointer = self.typed_temp("ptr");
                writeln!(
                    self.output,
                    "  {} = inttoptr {} {} to ptr",
                    pointer, address.ty, address.repr
                )?;
                let volatility = if method == "volatile_write" { "volatile " } else { "" };
                writeln!(
                    self.output,
                    "  store {}{} {}, ptr {}",
                    volatility, value.ty, value.repr, pointer
                )?;
                return Ok(Value::unit());
            }

            // Slice constructors call the matching allocator
            "DynamicSlice" | "TemporarySlice" => {
                let allocator = if method == "DynamicSlice" {
                    "heap_alloc"
                } else {
                    "stack_alloc"
                };
                let element = match self.analysis.interner.get(self.node_type(expression.id)?) {
                    Type::Slice { element, .. } => *element,
                    _ => {
                        return Err(CodeGenError::Logic(
                            "slice constructor without a slice type".to_string(),
                        ));
                    }
                };
                let [count_arg] = args else {
                    return Err(CodeGenError::Logic(format!(
                        "{} takes a size argument",
                        method
                    )));
                };
                let count = self.emit_expression(count_arg)?;
                let count_ty = self.node_type(count_arg.id)?;
                let word = self.target.word_type();

                // Memory-size arguments are byte counts already; plain
                // integers count elements.
                let bytes = if matches!(self.analysis.interner.get(count_ty), Type::MemorySize) {
                    count.repr
                } else {
                    let element_size =
                        super::types::byte_size(&self.analysis.interner, &self.target, element);
                    if element_size == 1 {
                        count.repr
                    } else {
                        let temp = self.typed_temp(&word);
                        writeln!(
                            self.output,
                            "  {} = mul {} {}, {}",
                            temp, word, count.repr, element_size
                        )?;
                        temp
                    }
                };
                let temp = self.typed_temp("ptr");
                writeln!(
                    self.output,
                    "  {} = call ptr @{}({} {})",
                    temp, allocator, word, bytes
                )?;
                return Ok(Value::new(temp, "ptr"));
            }
            _ => {}
        }

        if self.analysis.functions.contains_key(method) {
            return Err(CodeGenError::Logic(
                "unsupported feature: generic routine monomorphization".to_string(),
            ));
        }
        Err(CodeGenError::Logic(format!(
            "missing symbol for '{}'",
            method
        )))
    }

    fn type_argument_size(&mut self, type_args: &[TypeExpr]) -> Result<u64, CodeGenError> {
        let head = type_args
            .first()
            .map(|t| t.head_name())
            .ok_or_else(|| CodeGenError::Logic("missing type argument".to_string()))?;
        if let Some(primitive) = Type::from_primitive_name(&head) {
            if let Some(id) = self.analysis.interner.find(&primitive) {
                return Ok(super::types::byte_size(
                    &self.analysis.interner,
                    &self.target,
                    id,
                ));
            }
            // Uniform slot layout mirrors byte_size for unseen primitives
            return Ok(match primitive {
                Type::Int { bits, .. }
                | Type::Float { bits }
                | Type::Decimal { bits }
                | Type::Letter { bits } => u64::from(bits) / 8,
                Type::Bool => 1,
                _ => u64::from(self.target.word_bits) / 8,
            });
        }
        if let Some(info) = self.analysis.records.get(&head) {
            return Ok(8 * info.fields.len() as u64);
        }
        Ok(u64::from(self.target.word_bits) / 8)
    }

    fn type_argument_record(
        &mut self,
        type_args: &[TypeExpr],
    ) -> Result<crate::typechecker::RecordInfo, CodeGenError> {
        let head = type_args
            .first()
            .map(|t| t.head_name())
            .ok_or_else(|| CodeGenError::Logic("missing type argument".to_string()))?;
        self.analysis
            .records
            .get(&head)
            .cloned()
            .ok_or_else(|| CodeGenError::Logic(format!("unknown type '{}'", head)))
    }

    // === Error throws ===

    fn emit_verify(&mut self, args: &[Expression]) -> Result<Value, CodeGenError> {
        let condition = args
            .first()
            .ok_or_else(|| CodeGenError::Logic("verify! needs a condition".to_string()))?;
        let cond = self.emit_expression(condition)?;

        let fail_label = self.fresh_block("verify.fail");
        let ok_label = self.fresh_block("verify.ok");
        writeln!(
            self.output,
            "  br i1 {}, label %{}, label %{}",
            cond.repr, ok_label, fail_label
        )?;

        self.emit_label(&fail_label)?;
        let message = match args.get(1) {
            Some(argument) => Some(self.emit_expression(argument)?),
            None => None,
        };
        match message {
            Some(value) => self.emit_throw_value("VerifyError", value)?,
            None => self.emit_throw("VerifyError", "verification failed")?,
        }

        self.emit_label(&ok_label)?;
        Ok(Value::unit())
    }

    fn emit_halt(&mut self, type_name: &str, args: &[Expression]) -> Result<Value, CodeGenError> {
        let message = match args.first() {
            Some(argument) => Some(self.emit_expression(argument)?),
            None => None,
        };
        match message {
            Some(value) => self.emit_throw_value(type_name, value)?,
            None => self.emit_throw(type_name, "execution halted")?,
        }
        Ok(Value::unit())
    }

    /// Call the stack-trace runtime with (error-type-name, message) and
    /// terminate the block.
    pub(crate) fn emit_throw(
        &mut self,
        type_name: &str,
        message: &str,
    ) -> Result<(), CodeGenError> {
        let message_global = self.get_string_global(message)?;
        let message_value = Value::new(message_global, "ptr");
        self.emit_throw_value(type_name, message_value)
    }

    fn emit_throw_value(&mut self, type_name: &str, message: Value) -> Result<(), CodeGenError> {
        let type_global = self.get_string_global(type_name)?;
        writeln!(
            self.output,
            "  call void @rf_throw(ptr {}, ptr {})",
            type_global, message.repr
        )?;
        writeln!(self.output, "  unreachable")?;
        self.state = EmitState::Terminated;
        Ok(())
    }

    // === Constructors ===

    /// Records allocate one word-sized slot per field.
    fn emit_record_constructor(
        &mut self,
        fields: &[(String, TypeId)],
        args: &[Expression],
    ) -> Result<Value, CodeGenError> {
        let word = self.target.word_type();
        let bytes = 8 * fields.len().max(1);
        let object = self.typed_temp("ptr");
        writeln!(
            self.output,
            "  {} = call ptr @heap_alloc({} {})",
            object, word, bytes
        )?;

        for (position, (argument, (_, field_ty))) in args.iter().zip(fields.iter()).enumerate() {
            let value = self.emit_expression(argument)?;
            let argument_ty = self.node_type(argument.id)?;
            let value = self.coerce(value, argument_ty, *field_ty)?;
            let field_ptr = self.typed_temp("ptr");
            writeln!(
                self.output,
                "  {} = getelementptr i8, ptr {}, i64 {}",
                field_ptr,
                object,
                8 * position
            )?;
            writeln!(
                self.output,
                "  store {} {}, ptr {}",
                value.ty, value.repr, field_ptr
            )?;
        }
        Ok(Value::new(object, "ptr"))
    }

    /// Choices lead with a word-sized tag, then one slot per field.
    fn emit_choice_constructor(
        &mut self,
        tag: usize,
        fields: &[(String, TypeId)],
        args: &[Expression],
    ) -> Result<Value, CodeGenError> {
        let word = self.target.word_type();
        let bytes = 8 * (1 + fields.len());
        let object = self.typed_temp("ptr");
        writeln!(
            self.output,
            "  {} = call ptr @heap_alloc({} {})",
            object, word, bytes
        )?;
        writeln!(self.output, "  store {} {}, ptr {}", word, tag, object)?;

        for (position, (argument, (_, field_ty))) in args.iter().zip(fields.iter()).enumerate() {
            let value = self.emit_expression(argument)?;
            let argument_ty = self.node_type(argument.id)?;
            let value = self.coerce(value, argument_ty, *field_ty)?;
            let field_ptr = self.typed_temp("ptr");
            writeln!(
                self.output,
                "  {} = getelementptr i8, ptr {}, i64 {}",
                field_ptr,
                object,
                8 * (1 + position)
            )?;
            writeln!(
                self.output,
                "  store {} {}, ptr {}",
                value.ty, value.repr, field_ptr
            )?;
        }
        Ok(Value::new(object, "ptr"))
    }
}
