//! Expression lowering (temp-SSA).

use super::{CodeGen, CodeGenError, EmitState, Value};
use crate::ast::*;
use crate::types::{Type, TypeId};
use std::fmt::Write as _;

impl CodeGen<'_> {
    pub(crate) fn emit_expression(&mut self, expression: &Expression) -> Result<Value, CodeGenError> {
        match &expression.kind {
            ExprKind::Literal(literal) => {
                // The annotated type wins: unsuffixed literals may have
                // adopted the expected type during analysis.
                let ty = self.node_type(expression.id)?;
                let llvm_ty = self.llvm_of(ty);
                match literal {
                    Literal::Int { value, .. } => Ok(Value::new(value.to_string(), llvm_ty)),
                    Literal::MemorySize(value) | Literal::Duration(value) => {
                        Ok(Value::new(value.to_string(), llvm_ty))
                    }
                    Literal::Float { value, .. } => {
                        Ok(Value::new(format_float(*value), llvm_ty))
                    }
                    Literal::Bool(value) => Ok(Value::new(value.to_string(), "i1")),
                    Literal::Letter { value, .. } => {
                        Ok(Value::new((*value as u32).to_string(), llvm_ty))
                    }
                    Literal::Text { value, .. } => {
                        let global = self.get_string_global(value)?;
                        Ok(Value::new(global, "ptr"))
                    }
                    Literal::None => Ok(Value::new("null", "ptr")),
                }
            }
            ExprKind::Identifier(name) => self.emit_identifier(name),
            ExprKind::Binary { op, left, right } => self.emit_binary(*op, left, right),
            ExprKind::Unary { op, operand } => self.emit_unary(*op, operand),
            ExprKind::Call { callee, args } => self.emit_call(expression, callee, args),
            ExprKind::MethodCall {
                receiver,
                method,
                args,
            } => self.emit_method_call(expression, receiver, method, args),
            ExprKind::GenericCall {
                receiver,
                method,
                type_args,
                args,
                ..
            } => self.emit_generic_call(expression, receiver.as_deref(), method, type_args, args),
            ExprKind::Index { object, index } => self.emit_index(object, index),
            ExprKind::Field { object, field } => self.emit_field(object, field),
            ExprKind::Conditional {
                condition,
                then_value,
                else_value,
            } => self.emit_conditional(expression, condition, then_value, else_value),
            ExprKind::Propagate { operand } => {
                // The failure path transferred control at the throw site;
                // the success value just flows through.
                self.emit_expression(operand)
            }
            ExprKind::Range { .. } => Err(CodeGenError::Logic(
                "unsupported use of a range outside a for loop".to_string(),
            )),
            ExprKind::Lambda { .. } => Err(CodeGenError::Logic(
                "unsupported feature: lambda lowering".to_string(),
            )),
            ExprKind::FormatText { .. } => Err(CodeGenError::Logic(
                "unsupported feature: formatted text lowering".to_string(),
            )),
        }
    }

    fn emit_identifier(&mut self, name: &str) -> Result<Value, CodeGenError> {
        if let Some(slot) = self.lookup_local(name) {
            let temp = self.typed_temp(&slot.llvm_ty);
            writeln!(
                self.output,
                "  {} = load {}, ptr {}",
                temp, slot.llvm_ty, slot.ptr
            )?;
            return Ok(Value::new(temp, slot.llvm_ty));
        }
        if self.analysis.functions.contains_key(name) {
            return Ok(Value::new(format!("@{}", super::mangle_name(name)), "ptr"));
        }
        Err(CodeGenError::Logic(format!("missing symbol for '{}'", name)))
    }

    /// Pattern literals have no node annotation; type from the token tag.
    pub(crate) fn literal_value(&mut self, literal: &Literal) -> Result<Value, CodeGenError> {
        use crate::token::TokenKind::*;
        match literal {
            Literal::Int { value, kind } => {
                let bits = match kind {
                    S8Literal | U8Literal => 8,
                    S16Literal | U16Literal => 16,
                    S32Literal | U32Literal => 32,
                    S128Literal | U128Literal => 128,
                    _ => 64,
                };
                Ok(Value::new(value.to_string(), format!("i{}", bits)))
            }
            Literal::Float { value, .. } => Ok(Value::new(format_float(*value), "double")),
            Literal::Bool(value) => Ok(Value::new(value.to_string(), "i1")),
            Literal::Letter { value, .. } => Ok(Value::new((*value as u32).to_string(), "i32")),
            Literal::MemorySize(value) | Literal::Duration(value) => {
                Ok(Value::new(value.to_string(), "i64"))
            }
            Literal::Text { value, .. } => {
                let global = self.get_string_global(value)?;
                Ok(Value::new(global, "ptr"))
            }
            Literal::None => Ok(Value::new("null", "ptr")),
        }
    }

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> Result<Value, CodeGenError> {
        let left_value = self.emit_expression(left)?;
        let right_value = self.emit_expression(right)?;
        let left_ty = self.node_type(left.id)?;
        let right_ty = self.node_type(right.id)?;

        // Widen both operands to their common type
        let operand_ty = self
            .analysis
            .interner
            .common_type(left_ty, right_ty)
            .unwrap_or(left_ty);
        let left_value = self.coerce(left_value, left_ty, operand_ty)?;
        let right_value = self.coerce(right_value, right_ty, operand_ty)?;

        if op.is_comparison() {
            return self.emit_comparison(op, &left_value, &right_value, operand_ty);
        }
        if op.is_logical() {
            let instruction = if op == BinaryOp::And { "and" } else { "or" };
            let temp = self.typed_temp("i1");
            writeln!(
                self.output,
                "  {} = {} i1 {}, {}",
                temp, instruction, left_value.repr, right_value.repr
            )?;
            return Ok(Value::new(temp, "i1"));
        }

        self.emit_binary_instruction(op, &left_value, &right_value, operand_ty)
    }

    fn emit_comparison(
        &mut self,
        op: BinaryOp,
        left: &Value,
        right: &Value,
        operand_ty: TypeId,
    ) -> Result<Value, CodeGenError> {
        let operand = self.analysis.interner.get(operand_ty).clone();
        let predicate = if operand.is_float() {
            match op {
                BinaryOp::Eq => "fcmp oeq",
                BinaryOp::Ne => "fcmp one",
                BinaryOp::Lt => "fcmp olt",
                BinaryOp::Le => "fcmp ole",
                BinaryOp::Gt => "fcmp ogt",
                _ => "fcmp oge",
            }
        } else {
            let signed = is_signed(&operand);
            match (op, signed) {
                (BinaryOp::Eq, _) => "icmp eq",
                (BinaryOp::Ne, _) => "icmp ne",
                (BinaryOp::Lt, true) => "icmp slt",
                (BinaryOp::Lt, false) => "icmp ult",
                (BinaryOp::Le, true) => "icmp sle",
                (BinaryOp::Le, false) => "icmp ule",
                (BinaryOp::Gt, true) => "icmp sgt",
                (BinaryOp::Gt, false) => "icmp ugt",
                (_, true) => "icmp sge",
                (_, false) => "icmp uge",
            }
        };
        let temp = self.typed_temp("i1");
        writeln!(
            self.output,
            "  {} = {} {} {}, {}",
            temp, predicate, left.ty, left.repr, right.repr
        )?;
        Ok(Value::new(temp, "i1"))
    }

    /// One arithmetic/bitwise operation on same-typed operands. Shared by
    /// binary expressions and compound assignment.
    pub(crate) fn emit_binary_instruction(
        &mut self,
        op: BinaryOp,
        left: &Value,
        right: &Value,
        operand_ty: TypeId,
    ) -> Result<Value, CodeGenError> {
        let operand = self.analysis.interner.get(operand_ty).clone();
        let is_float = operand.is_float();
        let signed = is_signed(&operand);
        let ty = left.ty.clone();

        // Overflow-variant operators first
        if let Some(behavior) = op.overflow_behavior() {
            return self.emit_overflow_op(op, behavior, left, right, &ty, signed);
        }

        let instruction = match op {
            BinaryOp::Add => {
                if is_float {
                    "fadd"
                } else {
                    "add"
                }
            }
            BinaryOp::Sub => {
                if is_float {
                    "fsub"
                } else {
                    "sub"
                }
            }
            BinaryOp::Mul => {
                if is_float {
                    "fmul"
                } else {
                    "mul"
                }
            }
            // `/` reaches integers only through compound assignment
            BinaryOp::Div => {
                if is_float {
                    "fdiv"
                } else if signed {
                    "sdiv"
                } else {
                    "udiv"
                }
            }
            BinaryOp::IntDiv => {
                if signed {
                    "sdiv"
                } else {
                    "udiv"
                }
            }
            BinaryOp::Mod => {
                if is_float {
                    "frem"
                } else if signed {
                    "srem"
                } else {
                    "urem"
                }
            }
            BinaryOp::Pow => {
                if !is_float {
                    return Err(CodeGenError::Logic(
                        "unsupported feature: integer power lowering".to_string(),
                    ));
                }
                let intrinsic = format!("llvm.pow.{}", float_suffix(&ty));
                self.used_intrinsics.insert(format!(
                    "declare {} @{}({}, {})",
                    ty, intrinsic, ty, ty
                ));
                let temp = self.typed_temp(&ty);
                writeln!(
                    self.output,
                    "  {} = call {} @{}({} {}, {} {})",
                    temp, ty, intrinsic, ty, left.repr, ty, right.repr
                )?;
                return Ok(Value::new(temp, ty));
            }
            BinaryOp::BitAnd => "and",
            BinaryOp::BitOr => "or",
            BinaryOp::BitXor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => {
                if signed {
                    "ashr"
                } else {
                    "lshr"
                }
            }
            other => {
                return Err(CodeGenError::Logic(format!(
                    "operator {:?} is not a value operation",
                    other
                )));
            }
        };

        let temp = self.typed_temp(&ty);
        writeln!(
            self.output,
            "  {} = {} {} {}, {}",
            temp, instruction, ty, left.repr, right.repr
        )?;
        Ok(Value::new(temp, ty))
    }

    /// The four overflow behaviors: `%` wraps (plain LLVM arithmetic),
    /// `^` saturates, `!` asserts no wrap, `?` branches to a runtime
    /// throw on overflow.
    fn emit_overflow_op(
        &mut self,
        op: BinaryOp,
        behavior: OverflowBehavior,
        left: &Value,
        right: &Value,
        ty: &str,
        signed: bool,
    ) -> Result<Value, CodeGenError> {
        use BinaryOp::*;
        let base = match op {
            AddWrap | AddSaturate | AddUnchecked | AddChecked => "add",
            SubWrap | SubSaturate | SubUnchecked | SubChecked => "sub",
            MulWrap | MulSaturate | MulUnchecked | MulChecked => "mul",
            _ => "div",
        };
        let sign_prefix = if signed { 's' } else { 'u' };

        match behavior {
            OverflowBehavior::Wrapping => {
                let instruction = if base == "div" {
                    if signed { "sdiv" } else { "udiv" }
                } else {
                    base
                };
                let temp = self.typed_temp(ty);
                writeln!(
                    self.output,
                    "  {} = {} {} {}, {}",
                    temp, instruction, ty, left.repr, right.repr
                )?;
                Ok(Value::new(temp, ty))
            }
            OverflowBehavior::Unchecked => {
                if base == "div" {
                    let instruction = if signed { "sdiv" } else { "udiv" };
                    let temp = self.typed_temp(ty);
                    writeln!(
                        self.output,
                        "  {} = {} {} {}, {}",
                        temp, instruction, ty, left.repr, right.repr
                    )?;
                    return Ok(Value::new(temp, ty));
                }
                let flag = if signed { "nsw" } else { "nuw" };
                let temp = self.typed_temp(ty);
                writeln!(
                    self.output,
                    "  {} = {} {} {} {}, {}",
                    temp, base, flag, ty, left.repr, right.repr
                )?;
                Ok(Value::new(temp, ty))
            }
            OverflowBehavior::Saturating => match base {
                "add" | "sub" => {
                    let intrinsic = format!("llvm.{}{}.sat.{}", sign_prefix, base, ty);
                    self.used_intrinsics.insert(format!(
                        "declare {} @{}({}, {})",
                        ty, intrinsic, ty, ty
                    ));
                    let temp = self.typed_temp(ty);
                    writeln!(
                        self.output,
                        "  {} = call {} @{}({} {}, {} {})",
                        temp, ty, intrinsic, ty, left.repr, ty, right.repr
                    )?;
                    Ok(Value::new(temp, ty))
                }
                "mul" => {
                    // No saturating-multiply intrinsic: detect overflow and
                    // clamp to the bound matching the result sign.
                    let (value, overflowed) =
                        self.emit_with_overflow("mul", sign_prefix, left, right, ty)?;
                    let (min_bound, max_bound) = int_bounds(ty, signed);
                    let clamp = if signed {
                        let sign_mix = self.typed_temp(ty);
                        writeln!(
                            self.output,
                            "  {} = xor {} {}, {}",
                            sign_mix, ty, left.repr, right.repr
                        )?;
                        let negative = self.typed_temp("i1");
                        writeln!(
                            self.output,
                            "  {} = icmp slt {} {}, 0",
                            negative, ty, sign_mix
                        )?;
                        let clamp = self.typed_temp(ty);
                        writeln!(
                            self.output,
                            "  {} = select i1 {}, {} {}, {} {}",
                            clamp, negative, ty, min_bound, ty, max_bound
                        )?;
                        clamp
                    } else {
                        max_bound
                    };
                    let result = self.typed_temp(ty);
                    writeln!(
                        self.output,
                        "  {} = select i1 {}, {} {}, {} {}",
                        result, overflowed, ty, clamp, ty, value
                    )?;
                    Ok(Value::new(result, ty))
                }
                _ => {
                    // Division saturates only at MIN // -1; steer the
                    // divisor away and clamp afterwards.
                    if !signed {
                        let temp = self.typed_temp(ty);
                        writeln!(
                            self.output,
                            "  {} = udiv {} {}, {}",
                            temp, ty, left.repr, right.repr
                        )?;
                        return Ok(Value::new(temp, ty));
                    }
                    let (min_bound, max_bound) = int_bounds(ty, true);
                    let at_min = self.typed_temp("i1");
                    writeln!(
                        self.output,
                        "  {} = icmp eq {} {}, {}",
                        at_min, ty, left.repr, min_bound
                    )?;
                    let at_neg_one = self.typed_temp("i1");
                    writeln!(
                        self.output,
                        "  {} = icmp eq {} {}, -1",
                        at_neg_one, ty, right.repr
                    )?;
                    let would_overflow = self.typed_temp("i1");
                    writeln!(
                        self.output,
                        "  {} = and i1 {}, {}",
                        would_overflow, at_min, at_neg_one
                    )?;
                    let safe_divisor = self.typed_temp(ty);
                    writeln!(
                        self.output,
                        "  {} = select i1 {}, {} 1, {} {}",
                        safe_divisor, would_overflow, ty, ty, right.repr
                    )?;
                    let quotient = self.typed_temp(ty);
                    writeln!(
                        self.output,
                        "  {} = sdiv {} {}, {}",
                        quotient, ty, left.repr, safe_divisor
                    )?;
                    let result = self.typed_temp(ty);
                    writeln!(
                        self.output,
                        "  {} = select i1 {}, {} {}, {} {}",
                        result, would_overflow, ty, max_bound, ty, quotient
                    )?;
                    Ok(Value::new(result, ty))
                }
            },
            OverflowBehavior::Checked => {
                if base == "div" {
                    // Divide-by-zero is the failure case
                    let is_zero = self.typed_temp("i1");
                    writeln!(
                        self.output,
                        "  {} = icmp eq {} {}, 0",
                        is_zero, ty, right.repr
                    )?;
                    let fail_label = self.fresh_block("divzero");
                    let ok_label = self.fresh_block("divok");
                    writeln!(
                        self.output,
                        "  br i1 {}, label %{}, label %{}",
                        is_zero, fail_label, ok_label
                    )?;
                    self.emit_label(&fail_label)?;
                    self.emit_throw("DivideByZeroError", "checked division by zero")?;
                    self.emit_label(&ok_label)?;
                    let instruction = if signed { "sdiv" } else { "udiv" };
                    let temp = self.typed_temp(ty);
                    writeln!(
                        self.output,
                        "  {} = {} {} {}, {}",
                        temp, instruction, ty, left.repr, right.repr
                    )?;
                    return Ok(Value::new(temp, ty));
                }

                let (value, overflowed) =
                    self.emit_with_overflow(base, sign_prefix, left, right, ty)?;
                let fail_label = self.fresh_block("overflow");
                let ok_label = self.fresh_block("noover");
                writeln!(
                    self.output,
                    "  br i1 {}, label %{}, label %{}",
                    overflowed, fail_label, ok_label
                )?;
                self.emit_label(&fail_label)?;
                self.emit_throw("OverflowError", &format!("checked {} overflowed", base))?;
                self.emit_label(&ok_label)?;
                Ok(Value::new(value, ty))
            }
        }
    }

    /// `llvm.(s|u)(add|sub|mul).with.overflow` call; returns the value and
    /// overflow-flag temps.
    fn emit_with_overflow(
        &mut self,
        base: &str,
        sign_prefix: char,
        left: &Value,
        right: &Value,
        ty: &str,
    ) -> Result<(String, String), CodeGenError> {
        let intrinsic = format!("llvm.{}{}.with.overflow.{}", sign_prefix, base, ty);
        self.used_intrinsics.insert(format!(
            "declare {{ {}, i1 }} @{}({}, {})",
            ty, intrinsic, ty, ty
        ));
        let pair = self.fresh_temp();
        writeln!(
            self.output,
            "  {} = call {{ {}, i1 }} @{}({} {}, {} {})",
            pair, ty, intrinsic, ty, left.repr, ty, right.repr
        )?;
        let value = self.typed_temp(ty);
        writeln!(
            self.output,
            "  {} = extractvalue {{ {}, i1 }} {}, 0",
            value, ty, pair
        )?;
        let overflowed = self.typed_temp("i1");
        writeln!(
            self.output,
            "  {} = extractvalue {{ {}, i1 }} {}, 1",
            overflowed, ty, pair
        )?;
        Ok((value, overflowed))
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &Expression) -> Result<Value, CodeGenError> {
        let value = self.emit_expression(operand)?;
        let operand_ty = self.node_type(operand.id)?;
        let is_float = self.analysis.interner.get(operand_ty).is_float();
        match op {
            UnaryOp::Neg => {
                let temp = self.typed_temp(&value.ty);
                if is_float {
                    writeln!(self.output, "  {} = fneg {} {}", temp, value.ty, value.repr)?;
                } else {
                    writeln!(
                        self.output,
                        "  {} = sub {} 0, {}",
                        temp, value.ty, value.repr
                    )?;
                }
                Ok(Value::new(temp, value.ty))
            }
            UnaryOp::Not => {
                let temp = self.typed_temp("i1");
                writeln!(self.output, "  {} = xor i1 {}, true", temp, value.repr)?;
                Ok(Value::new(temp, "i1"))
            }
            UnaryOp::BitNot => {
                let temp = self.typed_temp(&value.ty);
                writeln!(
                    self.output,
                    "  {} = xor {} {}, -1",
                    temp, value.ty, value.repr
                )?;
                Ok(Value::new(temp, value.ty))
            }
        }
    }

    fn emit_index(
        &mut self,
        object: &Expression,
        index: &Expression,
    ) -> Result<Value, CodeGenError> {
        let object_ty = self.node_type(object.id)?;
        let element = match self.analysis.interner.get(object_ty) {
            Type::Slice { element, .. } => *element,
            _ => {
                return Err(CodeGenError::Logic(
                    "unsupported index on a non-slice value".to_string(),
                ));
            }
        };
        let object_value = self.emit_expression(object)?;
        let index_value = self.emit_expression(index)?;
        let pointer = self.slice_element_pointer(&object_value, &index_value, element)?;
        let element_llvm = self.llvm_of(element);
        let temp = self.typed_temp(&element_llvm);
        writeln!(
            self.output,
            "  {} = load {}, ptr {}",
            temp, element_llvm, pointer
        )?;
        Ok(Value::new(temp, element_llvm))
    }

    /// Address of element `index` of a slice, via the runtime.
    pub(crate) fn slice_element_pointer(
        &mut self,
        slice: &Value,
        index: &Value,
        element: TypeId,
    ) -> Result<String, CodeGenError> {
        let word = self.target.word_type();
        let element_size = super::types::byte_size(&self.analysis.interner, &self.target, element);
        let offset = self.typed_temp(&word);
        writeln!(
            self.output,
            "  {} = mul {} {}, {}",
            offset, word, index.repr, element_size
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
        Ok(pointer)
    }

    fn emit_field(&mut self, object: &Expression, field: &str) -> Result<Value, CodeGenError> {
        let object_ty = self.node_type(object.id)?;
        let (info_name, position, field_ty) = match self.analysis.interner.get(object_ty) {
            Type::Record { name } | Type::Entity { name } => {
                let info = self
                    .analysis
                    .records
                    .get(name)
                    .ok_or_else(|| CodeGenError::Logic(format!("unknown record '{}'", name)))?;
                let position = info
                    .fields
                    .iter()
                    .position(|(n, _)| n == field)
                    .ok_or_else(|| {
                        CodeGenError::Logic(format!("'{}' has no field '{}'", name, field))
                    })?;
                (name.clone(), position, info.fields[position].1)
            }
            _ => {
                return Err(CodeGenError::Logic(
                    "field access on a non-record value".to_string(),
                ));
            }
        };
        let _ = info_name;

        let object_value = self.emit_expression(object)?;
        let field_llvm = self.llvm_of(field_ty);
        let field_ptr = self.typed_temp("ptr");
        writeln!(
            self.output,
            "  {} = getelementptr i8, ptr {}, i64 {}",
            field_ptr,
            object_value.repr,
            8 * position
        )?;
        let temp = self.typed_temp(&field_llvm);
        writeln!(
            self.output,
            "  {} = load {}, ptr {}",
            temp, field_llvm, field_ptr
        )?;
        Ok(Value::new(temp, field_llvm))
    }

    fn emit_conditional(
        &mut self,
        expression: &Expression,
        condition: &Expression,
        then_value: &Expression,
        else_value: &Expression,
    ) -> Result<Value, CodeGenError> {
        let result_ty = self.node_type(expression.id)?;
        let result_llvm = self.llvm_of(result_ty);

        let then_label = self.fresh_block("cond.then");
        let else_label = self.fresh_block("cond.else");
        let end_label = self.fresh_block("cond.end");

        let cond = self.emit_expression(condition)?;
        writeln!(
            self.output,
            "  br i1 {}, label %{}, label %{}",
            cond.repr, then_label, else_label
        )?;

        self.emit_label(&then_label)?;
        let then_result = self.emit_expression(then_value)?;
        let then_ty = self.node_type(then_value.id)?;
        let then_result = self.coerce(then_result, then_ty, result_ty)?;
        let then_terminated = self.state == EmitState::Terminated;
        let then_predecessor = self.current_block.clone();
        self.branch_to(&end_label)?;

        self.emit_label(&else_label)?;
        let else_result = self.emit_expression(else_value)?;
        let else_ty = self.node_type(else_value.id)?;
        let else_result = self.coerce(else_result, else_ty, result_ty)?;
        let else_terminated = self.state == EmitState::Terminated;
        let else_predecessor = self.current_block.clone();
        self.branch_to(&end_label)?;

        self.emit_label(&end_label)?;
        let mut arms = Vec::new();
        if !then_terminated {
            arms.push(format!("[ {}, %{} ]", then_result.repr, then_predecessor));
        }
        if !else_terminated {
            arms.push(format!("[ {}, %{} ]", else_result.repr, else_predecessor));
        }
        if arms.is_empty() {
            writeln!(self.output, "  unreachable")?;
            self.state = EmitState::Terminated;
            return Ok(Value::new("undef", result_llvm));
        }
        let temp = self.typed_temp(&result_llvm);
        writeln!(
            self.output,
            "  {} = phi {} {}",
            temp,
            result_llvm,
            arms.join(", ")
        )?;
        Ok(Value::new(temp, result_llvm))
    }
}

pub(crate) fn is_signed(ty: &Type) -> bool {
    match ty {
        Type::Int { signed, .. } | Type::Address { signed } => *signed,
        // C integer aliases follow their C signedness
        Type::CAlias { name } => !name.starts_with("cu"),
        _ => true,
    }
}

fn float_suffix(llvm_ty: &str) -> &'static str {
    match llvm_ty {
        "half" => "f16",
        "float" => "f32",
        "fp128" => "f128",
        _ => "f64",
    }
}

/// Decimal text for an LLVM float constant.
fn format_float(value: f64) -> String {
    format!("{:?}", value)
}

/// (MIN, MAX) constants for a width.
fn int_bounds(llvm_ty: &str, signed: bool) -> (String, String) {
    let bits: u32 = llvm_ty.trim_start_matches('i').parse().unwrap_or(64);
    if signed {
        if bits >= 128 {
            return (i128::MIN.to_string(), i128::MAX.to_string());
        }
        let max = (1i128 << (bits - 1)) - 1;
        let min = -(1i128 << (bits - 1));
        (min.to_string(), max.to_string())
    } else {
        let max = if bits >= 128 {
            u128::MAX
        } else {
            (1u128 << bits) - 1
        };
        ("0".to_string(), max.to_string())
    }
}
