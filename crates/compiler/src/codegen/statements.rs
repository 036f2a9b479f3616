//! Statement lowering.

use super::{mangle_name, CodeGen, CodeGenError, EmitState, LocalSlot, Value};
use crate::ast::*;
use crate::types::Type;
use std::fmt::Write as _;

impl CodeGen<'_> {
    pub(crate) fn emit_block(&mut self, block: &Block) -> Result<(), CodeGenError> {
        self.scopes.push(Default::default());
        for statement in &block.statements {
            // Nothing after a terminator is reachable; drop dead code
            if self.state == EmitState::Terminated {
                break;
            }
            self.emit_statement(statement)?;
        }
        self.scopes.pop();
        Ok(())
    }

    pub(crate) fn emit_statement(&mut self, statement: &Statement) -> Result<(), CodeGenError> {
        match statement {
            Statement::Block(block) => self.emit_block(block),
            Statement::Expression(expression) => {
                self.emit_expression(expression)?;
                Ok(())
            }
            Statement::Declaration(declaration) => match declaration.as_ref() {
                Declaration::Variable(decl) => self.emit_variable(decl),
                _ => Err(CodeGenError::Logic(
                    "unsupported nested declaration in body".to_string(),
                )),
            },
            Statement::Return { value, .. } => self.emit_return(value.as_ref()),
            Statement::If(s) => self.emit_if(s),
            Statement::While(s) => self.emit_while(s),
            Statement::For(s) => self.emit_for(s),
            Statement::Loop(s) => self.emit_loop(s),
            Statement::When(s) => self.emit_when(s),
            Statement::Break { .. } => {
                let target = self
                    .loop_stack
                    .last()
                    .map(|(_, end)| end.clone())
                    .ok_or_else(|| CodeGenError::Logic("break outside loop".to_string()))?;
                writeln!(self.output, "  br label %{}", target)?;
                self.state = EmitState::Terminated;
                Ok(())
            }
            Statement::Continue { .. } => {
                let target = self
                    .loop_stack
                    .last()
                    .map(|(step, _)| step.clone())
                    .ok_or_else(|| CodeGenError::Logic("continue outside loop".to_string()))?;
                writeln!(self.output, "  br label %{}", target)?;
                self.state = EmitState::Terminated;
                Ok(())
            }
            Statement::Danger { body, .. } => {
                writeln!(self.output, "  ; === DANGER BLOCK START ===")?;
                self.emit_block(body)?;
                writeln!(self.output, "  ; === DANGER BLOCK END ===")?;
                Ok(())
            }
            Statement::Assignment {
                target, op, value, ..
            } => self.emit_assignment(target, *op, value),
        }
    }

    fn emit_variable(&mut self, decl: &VariableDecl) -> Result<(), CodeGenError> {
        let ty = self.node_type(decl.id)?;
        let llvm_ty = self.llvm_of(ty);
        if llvm_ty == "void" {
            return Ok(());
        }
        let slot_ptr = format!("%{}.addr.{}", mangle_name(&decl.name), self.temp_counter);
        self.temp_counter += 1;
        writeln!(self.output, "  {} = alloca {}", slot_ptr, llvm_ty)?;

        if let Some(initializer) = &decl.initializer {
            let value = self.emit_expression(initializer)?;
            let init_ty = self.node_type(initializer.id)?;
            let value = self.coerce(value, init_ty, ty)?;
            writeln!(
                self.output,
                "  store {} {}, ptr {}",
                llvm_ty, value.repr, slot_ptr
            )?;
        }

        self.declare_local_slot(
            &decl.name,
            LocalSlot {
                ptr: slot_ptr,
                llvm_ty,
                ty,
            },
        );
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&Expression>) -> Result<(), CodeGenError> {
        let sig = self
            .analysis
            .functions
            .get(&self.current_function)
            .ok_or_else(|| {
                CodeGenError::Logic(format!("missing signature for '{}'", self.current_function))
            })?;
        let ret = sig.ret;
        let ret_llvm = self.llvm_of(ret);

        match value {
            Some(expression) if ret_llvm != "void" => {
                let value = self.emit_expression(expression)?;
                let value_ty = self.node_type(expression.id)?;
                let value = self.coerce(value, value_ty, ret)?;
                writeln!(self.output, "  ret {} {}", ret_llvm, value.repr)?;
            }
            Some(expression) => {
                // Value discarded by a void return; still evaluated
                self.emit_expression(expression)?;
                writeln!(self.output, "  ret void")?;
            }
            None if ret_llvm == "void" => {
                writeln!(self.output, "  ret void")?;
            }
            None => {
                return Err(CodeGenError::Logic(
                    "non-void routine returned without a value".to_string(),
                ));
            }
        }
        self.state = EmitState::Terminated;
        Ok(())
    }

    fn emit_if(&mut self, statement: &IfStatement) -> Result<(), CodeGenError> {
        let end = self.fresh_block("if.end");

        for (condition, body) in &statement.branches {
            let then_label = self.fresh_block("if.then");
            let next_label = self.fresh_block("if.next");

            let cond = self.emit_expression(condition)?;
            writeln!(
                self.output,
                "  br i1 {}, label %{}, label %{}",
                cond.repr, then_label, next_label
            )?;
            self.emit_label(&then_label)?;
            self.emit_block(body)?;
            self.branch_to(&end)?;
            self.emit_label(&next_label)?;
        }

        if let Some(else_block) = &statement.else_block {
            self.emit_block(else_block)?;
        }
        self.branch_to(&end)?;
        self.emit_label(&end)?;
        Ok(())
    }

    fn emit_while(&mut self, statement: &WhileStatement) -> Result<(), CodeGenError> {
        let cond_label = self.fresh_block("while.cond");
        let body_label = self.fresh_block("while.body");
        let end_label = self.fresh_block("while.end");

        self.branch_to(&cond_label)?;
        self.emit_label(&cond_label)?;
        let cond = self.emit_expression(&statement.condition)?;
        writeln!(
            self.output,
            "  br i1 {}, label %{}, label %{}",
            cond.repr, body_label, end_label
        )?;

        self.emit_label(&body_label)?;
        self.loop_stack.push((cond_label.clone(), end_label.clone()));
        self.emit_block(&statement.body)?;
        self.loop_stack.pop();
        self.branch_to(&cond_label)?;

        self.emit_label(&end_label)?;
        Ok(())
    }

    fn emit_loop(&mut self, statement: &LoopStatement) -> Result<(), CodeGenError> {
        let body_label = self.fresh_block("loop.body");
        let end_label = self.fresh_block("loop.end");

        self.branch_to(&body_label)?;
        self.emit_label(&body_label)?;
        self.loop_stack.push((body_label.clone(), end_label.clone()));
        self.emit_block(&statement.body)?;
        self.loop_stack.pop();
        self.branch_to(&body_label)?;

        self.emit_label(&end_label)?;
        Ok(())
    }

    fn emit_for(&mut self, statement: &ForStatement) -> Result<(), CodeGenError> {
        let iterable_ty = self.node_type(statement.iterable.id)?;
        match self.analysis.interner.get(iterable_ty).clone() {
            Type::Range => self.emit_for_range(statement),
            Type::Slice { element, .. } => self.emit_for_slice(statement, element),
            other => Err(CodeGenError::Logic(format!(
                "unsupported for-iterable of type {:?}",
                other
            ))),
        }
    }

    /// `for i in a to b [by s]`: an indexed counting loop.
    fn emit_for_range(&mut self, statement: &ForStatement) -> Result<(), CodeGenError> {
        let ExprKind::Range { start, end, step } = &statement.iterable.kind else {
            return Err(CodeGenError::Logic(
                "range-typed iterable is not a range expression".to_string(),
            ));
        };

        let start_value = self.emit_expression(start)?;
        let end_value = self.emit_expression(end)?;
        let step_value = match step {
            Some(step) => self.emit_expression(step)?,
            None => Value::new("1", "i64"),
        };

        let slot_ptr = format!("%{}.addr.{}", mangle_name(&statement.binding), self.temp_counter);
        self.temp_counter += 1;
        writeln!(self.output, "  {} = alloca i64", slot_ptr)?;
        writeln!(
            self.output,
            "  store i64 {}, ptr {}",
            start_value.repr, slot_ptr
        )?;

        let cond_label = self.fresh_block("for.cond");
        let body_label = self.fresh_block("for.body");
        let step_label = self.fresh_block("for.step");
        let end_label = self.fresh_block("for.end");

        self.branch_to(&cond_label)?;
        self.emit_label(&cond_label)?;
        let current = self.typed_temp("i64");
        writeln!(self.output, "  {} = load i64, ptr {}", current, slot_ptr)?;
        let test = self.typed_temp("i1");
        writeln!(
            self.output,
            "  {} = icmp slt i64 {}, {}",
            test, current, end_value.repr
        )?;
        writeln!(
            self.output,
            "  br i1 {}, label %{}, label %{}",
            test, body_label, end_label
        )?;

        self.emit_label(&body_label)?;
        self.scopes.push(Default::default());
        // The analyzer interned s64 while typing the range endpoints
        let s64 = self
            .analysis
            .interner
            .find(&Type::Int {
                bits: 64,
                signed: true,
            })
            .ok_or_else(|| CodeGenError::Logic("s64 missing from the interner".to_string()))?;
        self.declare_local_slot(
            &statement.binding,
            LocalSlot {
                ptr: slot_ptr.clone(),
                llvm_ty: "i64".to_string(),
                ty: s64,
            },
        );
        self.loop_stack.push((step_label.clone(), end_label.clone()));
        self.emit_block(&statement.body)?;
        self.loop_stack.pop();
        self.scopes.pop();
        self.branch_to(&step_label)?;

        self.emit_label(&step_label)?;
        let loaded = self.typed_temp("i64");
        writeln!(self.output, "  {} = load i64, ptr {}", loaded, slot_ptr)?;
        let next = self.typed_temp("i64");
        writeln!(
            self.output,
            "  {} = add i64 {}, {}",
            next, loaded, step_value.repr
        )?;
        writeln!(self.output, "  store i64 {}, ptr {}", next, slot_ptr)?;
        self.branch_to(&cond_label)?;

        self.emit_label(&end_label)?;
        Ok(())
    }

    /// `for x in slice`: iterate elements through the slice runtime.
    fn emit_for_slice(
        &mut self,
        statement: &ForStatement,
        element: crate::types::TypeId,
    ) -> Result<(), CodeGenError> {
        let slice = self.emit_expression(&statement.iterable)?;
        let word = self.target.word_type();
        let element_llvm = self.llvm_of(element);
        let element_size = super::types::byte_size(&self.analysis.interner, &self.target, element);

        let total_bytes = self.typed_temp(&word);
        writeln!(
            self.output,
            "  {} = call {} @slice_size(ptr {})",
            total_bytes, word, slice.repr
        )?;
        let count = self.typed_temp(&word);
        writeln!(
            self.output,
            "  {} = udiv {} {}, {}",
            count, word, total_bytes, element_size
        )?;

        let index_ptr = format!("%for.idx.{}", self.temp_counter);
        self.temp_counter += 1;
        writeln!(self.output, "  {} = alloca {}", index_ptr, word)?;
        writeln!(self.output, "  store {} 0, ptr {}", word, index_ptr)?;

        let cond_label = self.fresh_block("for.cond");
        let body_label = self.fresh_block("for.body");
        let step_label = self.fresh_block("for.step");
        let end_label = self.fresh_block("for.end");

        self.branch_to(&cond_label)?;
        self.emit_label(&cond_label)?;
        let index = self.typed_temp(&word);
        writeln!(self.output, "  {} = load {}, ptr {}", index, word, index_ptr)?;
        let test = self.typed_temp("i1");
        writeln!(
            self.output,
            "  {} = icmp ult {} {}, {}",
            test, word, index, count
        )?;
        writeln!(
            self.output,
            "  br i1 {}, label %{}, label %{}",
            test, body_label, end_label
        )?;

        self.emit_label(&body_label)?;
        let offset = self.typed_temp(&word);
        writeln!(
            self.output,
            "  {} = mul {} {}, {}",
            offset, word, index, element_size
        )?;
        let address = self.typed_temp(&word);
        writeln!(
            self.output,
            "  {} = call {} @slice_unsafe_ptr(ptr {}, {} {})",
            address, word, slice.repr, word, offset
        )?;
        let pointer = self.typed_temp("ptr");
        writeln!(
            self.output,
            "  {} = inttoptr {} {} to ptr",
            pointer, word, address
        )?;
        let element_value = self.typed_temp(&element_llvm);
        writeln!(
            self.output,
            "  {} = load {}, ptr {}",
            element_value, element_llvm, pointer
        )?;

        let slot_ptr = format!("%{}.addr.{}", mangle_name(&statement.binding), self.temp_counter);
        self.temp_counter += 1;
        writeln!(self.output, "  {} = alloca {}", slot_ptr, element_llvm)?;
        writeln!(
            self.output,
            "  store {} {}, ptr {}",
            element_llvm, element_value, slot_ptr
        )?;

        self.scopes.push(Default::default());
        self.declare_local_slot(
            &statement.binding,
            LocalSlot {
                ptr: slot_ptr,
                llvm_ty: element_llvm,
                ty: element,
            },
        );
        self.loop_stack.push((step_label.clone(), end_label.clone()));
        self.emit_block(&statement.body)?;
        self.loop_stack.pop();
        self.scopes.pop();
        self.branch_to(&step_label)?;

        self.emit_label(&step_label)?;
        let loaded = self.typed_temp(&word);
        writeln!(self.output, "  {} = load {}, ptr {}", loaded, word, index_ptr)?;
        let next = self.typed_temp(&word);
        writeln!(self.output, "  {} = add {} {}, 1", next, word, loaded)?;
        writeln!(self.output, "  store {} {}, ptr {}", word, next, index_ptr)?;
        self.branch_to(&cond_label)?;

        self.emit_label(&end_label)?;
        Ok(())
    }

    fn emit_when(&mut self, statement: &WhenStatement) -> Result<(), CodeGenError> {
        let scrutinee = self.emit_expression(&statement.scrutinee)?;
        let scrutinee_ty = self.node_type(statement.scrutinee.id)?;
        let choice_name = match self.analysis.interner.get(scrutinee_ty) {
            Type::Choice { name } => Some(name.clone()),
            _ => None,
        };

        // Load the tag once for choice scrutinees
        let tag = if choice_name.is_some() {
            let word = self.target.word_type();
            let tag = self.typed_temp(&word);
            writeln!(
                self.output,
                "  {} = load {}, ptr {}",
                tag, word, scrutinee.repr
            )?;
            Some(tag)
        } else {
            None
        };

        let end_label = self.fresh_block("when.end");

        for arm in &statement.arms {
            let body_label = self.fresh_block("when.arm");
            let next_label = self.fresh_block("when.next");

            let matched_unconditionally = match &arm.pattern.kind {
                PatternKind::Wildcard | PatternKind::Binding(_) => {
                    writeln!(self.output, "  br label %{}", body_label)?;
                    self.state = EmitState::Terminated;
                    true
                }
                PatternKind::Literal(literal) => {
                    let pattern_value = self.literal_value(literal)?;
                    let test = self.typed_temp("i1");
                    let comparison = if pattern_value.ty.starts_with('i') {
                        "icmp eq"
                    } else {
                        "fcmp oeq"
                    };
                    writeln!(
                        self.output,
                        "  {} = {} {} {}, {}",
                        test, comparison, scrutinee.ty, scrutinee.repr, pattern_value.repr
                    )?;
                    writeln!(
                        self.output,
                        "  br i1 {}, label %{}, label %{}",
                        test, body_label, next_label
                    )?;
                    self.state = EmitState::Terminated;
                    false
                }
                PatternKind::Destructure { name, .. } => {
                    let (tag, word) = match (&tag, &choice_name) {
                        (Some(tag), Some(_)) => (tag.clone(), self.target.word_type()),
                        _ => {
                            return Err(CodeGenError::Logic(
                                "destructure pattern on a non-choice scrutinee".to_string(),
                            ));
                        }
                    };
                    let index = self.variant_index(choice_name.as_deref().unwrap(), name)?;
                    let test = self.typed_temp("i1");
                    writeln!(
                        self.output,
                        "  {} = icmp eq {} {}, {}",
                        test, word, tag, index
                    )?;
                    writeln!(
                        self.output,
                        "  br i1 {}, label %{}, label %{}",
                        test, body_label, next_label
                    )?;
                    self.state = EmitState::Terminated;
                    false
                }
                PatternKind::TypeTag { .. } | PatternKind::Tuple(_) => {
                    return Err(CodeGenError::Logic(
                        "unsupported pattern form in when lowering".to_string(),
                    ));
                }
            };

            self.emit_label(&body_label)?;
            self.scopes.push(Default::default());
            self.bind_pattern(&arm.pattern, &scrutinee, scrutinee_ty, choice_name.as_deref())?;
            self.emit_block(&arm.body)?;
            self.scopes.pop();
            self.branch_to(&end_label)?;

            self.emit_label(&next_label)?;
            if matched_unconditionally {
                // Arms below a catch-all are unreachable; close the chain
                break;
            }
        }

        self.branch_to(&end_label)?;
        self.emit_label(&end_label)?;
        Ok(())
    }

    fn variant_index(&self, choice: &str, variant: &str) -> Result<usize, CodeGenError> {
        let info = self
            .analysis
            .choices
            .get(choice)
            .ok_or_else(|| CodeGenError::Logic(format!("unknown choice '{}'", choice)))?;
        info.variants
            .iter()
            .position(|v| v.name == variant)
            .ok_or_else(|| {
                CodeGenError::Logic(format!("'{}' has no variant '{}'", choice, variant))
            })
    }

    /// Bind the names a matched pattern introduces.
    fn bind_pattern(
        &mut self,
        pattern: &Pattern,
        scrutinee: &Value,
        scrutinee_ty: crate::types::TypeId,
        choice_name: Option<&str>,
    ) -> Result<(), CodeGenError> {
        match &pattern.kind {
            PatternKind::Binding(name) => {
                let slot_ptr = format!("%{}.addr.{}", mangle_name(name), self.temp_counter);
                self.temp_counter += 1;
                writeln!(self.output, "  {} = alloca {}", slot_ptr, scrutinee.ty)?;
                writeln!(
                    self.output,
                    "  store {} {}, ptr {}",
                    scrutinee.ty, scrutinee.repr, slot_ptr
                )?;
                self.declare_local_slot(
                    name,
                    LocalSlot {
                        ptr: slot_ptr,
                        llvm_ty: scrutinee.ty.clone(),
                        ty: scrutinee_ty,
                    },
                );
            }
            PatternKind::Destructure { name, fields } => {
                let Some(choice) = choice_name else {
                    return Ok(());
                };
                let info = self
                    .analysis
                    .choices
                    .get(choice)
                    .ok_or_else(|| CodeGenError::Logic(format!("unknown choice '{}'", choice)))?
                    .clone();
                let variant = info
                    .variants
                    .iter()
                    .find(|v| &v.name == name)
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!("'{}' has no variant '{}'", choice, name))
                    })?;

                for (field_name, sub) in fields {
                    let bind_name = match sub {
                        Some(sub_pattern) => match &sub_pattern.kind {
                            PatternKind::Binding(bound) => bound.clone(),
                            _ => continue,
                        },
                        None => field_name.clone(),
                    };
                    let Some(position) =
                        variant.fields.iter().position(|(n, _)| n == field_name)
                    else {
                        continue;
                    };
                    let (_, field_ty) = variant.fields[position];
                    let field_llvm = self.llvm_of(field_ty);
                    // Payload slots are word-sized, after the leading tag
                    let offset = 8 * (1 + position);

                    let field_ptr = self.typed_temp("ptr");
                    writeln!(
                        self.output,
                        "  {} = getelementptr i8, ptr {}, i64 {}",
                        field_ptr, scrutinee.repr, offset
                    )?;
                    let loaded = self.typed_temp(&field_llvm);
                    writeln!(
                        self.output,
                        "  {} = load {}, ptr {}",
                        loaded, field_llvm, field_ptr
                    )?;

                    let slot_ptr =
                        format!("%{}.addr.{}", mangle_name(&bind_name), self.temp_counter);
                    self.temp_counter += 1;
                    writeln!(self.output, "  {} = alloca {}", slot_ptr, field_llvm)?;
                    writeln!(
                        self.output,
                        "  store {} {}, ptr {}",
                        field_llvm, loaded, slot_ptr
                    )?;
                    self.declare_local_slot(
                        &bind_name,
                        LocalSlot {
                            ptr: slot_ptr,
                            llvm_ty: field_llvm,
                            ty: field_ty,
                        },
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn emit_assignment(
        &mut self,
        target: &Expression,
        op: Option<BinaryOp>,
        value: &Expression,
    ) -> Result<(), CodeGenError> {
        let value_ty = self.node_type(value.id)?;

        match &target.kind {
            ExprKind::Identifier(name) => {
                let slot = self.lookup_local(name).ok_or_else(|| {
                    CodeGenError::Logic(format!("missing symbol for '{}'", name))
                })?;
                let mut new_value = self.emit_expression(value)?;
                new_value = self.coerce(new_value, value_ty, slot.ty)?;

                if let Some(op) = op {
                    let current = self.typed_temp(&slot.llvm_ty);
                    writeln!(
                        self.output,
                        "  {} = load {}, ptr {}",
                        current, slot.llvm_ty, slot.ptr
                    )?;
                    let current = Value::new(current, slot.llvm_ty.clone());
                    new_value = self.emit_binary_instruction(op, &current, &new_value, slot.ty)?;
                }

                writeln!(
                    self.output,
                    "  store {} {}, ptr {}",
                    slot.llvm_ty, new_value.repr, slot.ptr
                )?;
                Ok(())
            }
            ExprKind::Field { object, field } => {
                let object_value = self.emit_expression(object)?;
                let object_ty = self.node_type(object.id)?;
                let (record_name, position) = match self.analysis.interner.get(object_ty) {
                    Type::Record { name } | Type::Entity { name } => {
                        let info = self.analysis.records.get(name).ok_or_else(|| {
                            CodeGenError::Logic(format!("unknown record '{}'", name))
                        })?;
                        let position = info
                            .fields
                            .iter()
                            .position(|(n, _)| n == field)
                            .ok_or_else(|| {
                                CodeGenError::Logic(format!(
                                    "'{}' has no field '{}'",
                                    name, field
                                ))
                            })?;
                        (name.clone(), position)
                    }
                    _ => {
                        return Err(CodeGenError::Logic(
                            "field assignment to a non-record value".to_string(),
                        ));
                    }
                };
                let _ = record_name;

                let mut new_value = self.emit_expression(value)?;
                let field_ty = self.node_type(target.id)?;
                new_value = self.coerce(new_value, value_ty, field_ty)?;
                let field_llvm = self.llvm_of(field_ty);

                let field_ptr = self.typed_temp("ptr");
                writeln!(
                    self.output,
                    "  {} = getelementptr i8, ptr {}, i64 {}",
                    field_ptr,
                    object_value.repr,
                    8 * position
                )?;
                if op.is_some() {
                    return Err(CodeGenError::Logic(
                        "unsupported compound assignment to a field".to_string(),
                    ));
                }
                writeln!(
                    self.output,
                    "  store {} {}, ptr {}",
                    field_llvm, new_value.repr, field_ptr
                )?;
                Ok(())
            }
            ExprKind::Index { object, index } => {
                let object_ty = self.node_type(object.id)?;
                let element = match self.analysis.interner.get(object_ty) {
                    Type::Slice { element, .. } => *element,
                    _ => {
                        return Err(CodeGenError::Logic(
                            "index assignment to a non-slice value".to_string(),
                        ));
                    }
                };
                if op.is_some() {
                    return Err(CodeGenError::Logic(
                        "unsupported compound assignment to an element".to_string(),
                    ));
                }
                let object_value = self.emit_expression(object)?;
                let index_value = self.emit_expression(index)?;
                let mut new_value = self.emit_expression(value)?;
                new_value = self.coerce(new_value, value_ty, element)?;
                let pointer = self.slice_element_pointer(&object_value, &index_value, element)?;
                let element_llvm = self.llvm_of(element);
                writeln!(
                    self.output,
                    "  store {} {}, ptr {}",
                    element_llvm, new_value.repr, pointer
                )?;
                Ok(())
            }
            _ => Err(CodeGenError::Logic(
                "unsupported assignment target".to_string(),
            )),
        }
    }
}

