//! Abstract Syntax Tree for RazorForge and Suflae
//!
//! Pure data: every node carries the span it was parsed from, and nothing
//! else happens here. The parser constructs nodes exactly once; the variant
//! generator may append to the top-level declaration list; semantic results
//! live in side tables keyed by [`NodeId`], never inside the tree.
//!
//! Traversals go through the [`Visitor`] trait rather than virtual dispatch
//! on nodes, which keeps match exhaustiveness checking intact.

use crate::span::Span;
use crate::token::{Dialect, TokenKind};
use std::path::PathBuf;

/// Stable identity of an AST node, assigned by the parser.
///
/// Symbol and type annotations are stored in side tables keyed by this id,
/// so the tree itself stays immutable after parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A parsed compilation unit: the top-level declarations of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub file: PathBuf,
    pub dialect: Dialect,
    pub declarations: Vec<Declaration>,
    pub span: Span,
}

impl Program {
    pub fn find_function(&self, name: &str) -> Option<&FunctionDecl> {
        self.declarations.iter().find_map(|d| match d {
            Declaration::Function(f) if f.name == name => Some(f),
            _ => None,
        })
    }
}

/// Who can see a declaration outside its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

// ============================================================================
//                              DECLARATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Function(FunctionDecl),
    External(ExternalDecl),
    Record(RecordDecl),
    Entity(EntityDecl),
    Choice(ChoiceDecl),
    Protocol(ProtocolDecl),
    Import(ImportDecl),
    Redefine(RedefineDecl),
    Variable(VariableDecl),
}

impl Declaration {
    pub fn span(&self) -> &Span {
        match self {
            Declaration::Function(d) => &d.span,
            Declaration::External(d) => &d.span,
            Declaration::Record(d) => &d.span,
            Declaration::Entity(d) => &d.span,
            Declaration::Choice(d) => &d.span,
            Declaration::Protocol(d) => &d.span,
            Declaration::Import(d) => &d.span,
            Declaration::Redefine(d) => &d.span,
            Declaration::Variable(d) => &d.span,
        }
    }

    /// The declared name, where one exists (imports answer with their alias).
    pub fn name(&self) -> Option<&str> {
        match self {
            Declaration::Function(d) => Some(&d.name),
            Declaration::External(d) => Some(&d.name),
            Declaration::Record(d) => Some(&d.name),
            Declaration::Entity(d) => Some(&d.name),
            Declaration::Choice(d) => Some(&d.name),
            Declaration::Protocol(d) => Some(&d.name),
            Declaration::Import(d) => d.alias.as_deref(),
            Declaration::Redefine(d) => Some(&d.name),
            Declaration::Variable(d) => Some(&d.name),
        }
    }
}

/// One parameter of a function or external.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

/// A function definition.
///
/// `can_fail` is set when the declared name carries the `!` marker; the
/// variant generator also derives it from the body. `generated` marks
/// declarations synthesized by the variant generator, which semantic
/// re-analysis skips.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub id: NodeId,
    pub name: String,
    pub doc: Option<String>,
    pub visibility: Visibility,
    pub generic_params: Vec<String>,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeExpr>,
    /// None only for abstract protocol methods
    pub body: Option<Block>,
    pub can_fail: bool,
    pub generated: bool,
    pub span: Span,
}

/// An external function declaration. Never carries a body.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalDecl {
    pub id: NodeId,
    pub name: String,
    pub doc: Option<String>,
    /// Calling-convention annotation, e.g. "stdcall"; default C when absent
    pub convention: Option<String>,
    pub params: Vec<Parameter>,
    pub return_type: Option<TypeExpr>,
    pub span: Span,
}

/// One field of a record, entity, or choice variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

/// A value type: fields are stored inline, assignment copies.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDecl {
    pub id: NodeId,
    pub name: String,
    pub doc: Option<String>,
    pub generic_params: Vec<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

/// A reference type with single inheritance.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDecl {
    pub id: NodeId,
    pub name: String,
    pub doc: Option<String>,
    pub generic_params: Vec<String>,
    pub parent: Option<TypeExpr>,
    pub fields: Vec<Field>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

/// One constructor of a choice (sum) type.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceVariant {
    pub name: String,
    pub fields: Vec<Field>,
    pub span: Span,
}

/// A closed sum type.
#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceDecl {
    pub id: NodeId,
    pub name: String,
    pub doc: Option<String>,
    pub generic_params: Vec<String>,
    pub variants: Vec<ChoiceVariant>,
    pub span: Span,
}

/// An interface: method signatures, optionally with default bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolDecl {
    pub id: NodeId,
    pub name: String,
    pub doc: Option<String>,
    pub generic_params: Vec<String>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

/// `import a.b.c`: dotted module path resolved against the search paths.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub id: NodeId,
    pub path: Vec<String>,
    pub alias: Option<String>,
    pub span: Span,
}

impl ImportDecl {
    /// The dotted path as written in source.
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
}

/// `redefine Name = Type`: a transparent type alias.
#[derive(Debug, Clone, PartialEq)]
pub struct RedefineDecl {
    pub id: NodeId,
    pub name: String,
    pub target: TypeExpr,
    pub span: Span,
}

/// `let`/`var` binding, top-level or inside a body.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDecl {
    pub id: NodeId,
    pub name: String,
    pub doc: Option<String>,
    pub mutable: bool,
    pub ty: Option<TypeExpr>,
    pub initializer: Option<Expression>,
    pub span: Span,
}

// ============================================================================
//                               STATEMENTS
// ============================================================================

/// A sequence of statements, from either a brace block or an
/// indentation block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Block(Block),
    If(IfStatement),
    When(WhenStatement),
    While(WhileStatement),
    For(ForStatement),
    Loop(LoopStatement),
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Return {
        value: Option<Expression>,
        span: Span,
    },
    /// `danger! { ... }`: enables raw-address operations in its body
    Danger {
        body: Block,
        span: Span,
    },
    /// `x = e` or a compound form `x += e`
    Assignment {
        target: Expression,
        /// Some(op) for compound assignment, lowered as `x = x op e`
        op: Option<BinaryOp>,
        value: Expression,
        span: Span,
    },
    Expression(Expression),
    Declaration(Box<Declaration>),
}

impl Statement {
    pub fn span(&self) -> &Span {
        match self {
            Statement::Block(b) => &b.span,
            Statement::If(s) => &s.span,
            Statement::When(s) => &s.span,
            Statement::While(s) => &s.span,
            Statement::For(s) => &s.span,
            Statement::Loop(s) => &s.span,
            Statement::Break { span }
            | Statement::Continue { span }
            | Statement::Return { span, .. }
            | Statement::Danger { span, .. }
            | Statement::Assignment { span, .. } => span,
            Statement::Expression(e) => &e.span,
            Statement::Declaration(d) => d.span(),
        }
    }
}

/// `if` with any number of `elif` branches.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStatement {
    /// Condition/body pairs: the `if` branch first, then each `elif`
    pub branches: Vec<(Expression, Block)>,
    pub else_block: Option<Block>,
    pub span: Span,
}

/// Pattern match over a scrutinee.
#[derive(Debug, Clone, PartialEq)]
pub struct WhenStatement {
    pub scrutinee: Expression,
    pub arms: Vec<WhenArm>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhenArm {
    pub pattern: Pattern,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStatement {
    pub condition: Expression,
    pub body: Block,
    pub span: Span,
}

/// `for x in iterable { ... }`: range expressions `a to b [by s]` are one
/// kind of iterable.
#[derive(Debug, Clone, PartialEq)]
pub struct ForStatement {
    pub binding: String,
    pub iterable: Expression,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopStatement {
    pub body: Block,
    pub span: Span,
}

// ============================================================================
//                              EXPRESSIONS
// ============================================================================

/// Overflow behavior selected by the trailing character of an
/// overflow-variant operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowBehavior {
    /// `%`: wrap around on overflow
    Wrapping,
    /// `^`: clamp to the type's bounds
    Saturating,
    /// `!`: overflow is undefined; no check emitted
    Unchecked,
    /// `?`: overflow throws; the result is tagged fallible
    Checked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Mod,
    Pow,
    AddWrap,
    AddSaturate,
    AddUnchecked,
    AddChecked,
    SubWrap,
    SubSaturate,
    SubUnchecked,
    SubChecked,
    MulWrap,
    MulSaturate,
    MulUnchecked,
    MulChecked,
    IntDivWrap,
    IntDivSaturate,
    IntDivUnchecked,
    IntDivChecked,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinaryOp {
    /// Map an operator token to its AST operator.
    pub fn from_token(kind: TokenKind) -> Option<BinaryOp> {
        use TokenKind::*;
        let op = match kind {
            Plus => BinaryOp::Add,
            Minus => BinaryOp::Sub,
            Star => BinaryOp::Mul,
            Slash => BinaryOp::Div,
            SlashSlash => BinaryOp::IntDiv,
            Percent => BinaryOp::Mod,
            StarStar => BinaryOp::Pow,
            PlusWrap => BinaryOp::AddWrap,
            PlusSaturate => BinaryOp::AddSaturate,
            PlusUnchecked => BinaryOp::AddUnchecked,
            PlusChecked => BinaryOp::AddChecked,
            MinusWrap => BinaryOp::SubWrap,
            MinusSaturate => BinaryOp::SubSaturate,
            MinusUnchecked => BinaryOp::SubUnchecked,
            MinusChecked => BinaryOp::SubChecked,
            StarWrap => BinaryOp::MulWrap,
            StarSaturate => BinaryOp::MulSaturate,
            StarUnchecked => BinaryOp::MulUnchecked,
            StarChecked => BinaryOp::MulChecked,
            SlashSlashWrap => BinaryOp::IntDivWrap,
            SlashSlashSaturate => BinaryOp::IntDivSaturate,
            SlashSlashUnchecked => BinaryOp::IntDivUnchecked,
            SlashSlashChecked => BinaryOp::IntDivChecked,
            EqualEqual => BinaryOp::Eq,
            BangEqual => BinaryOp::Ne,
            Less => BinaryOp::Lt,
            LessEqual => BinaryOp::Le,
            Greater => BinaryOp::Gt,
            GreaterEqual => BinaryOp::Ge,
            And => BinaryOp::And,
            Or => BinaryOp::Or,
            Ampersand => BinaryOp::BitAnd,
            Pipe => BinaryOp::BitOr,
            Caret => BinaryOp::BitXor,
            LessLess => BinaryOp::Shl,
            GreaterGreater => BinaryOp::Shr,
            _ => return Option::None,
        };
        Some(op)
    }

    /// Overflow behavior for the overflow-variant operators.
    pub fn overflow_behavior(&self) -> Option<OverflowBehavior> {
        use BinaryOp::*;
        let behavior = match self {
            AddWrap | SubWrap | MulWrap | IntDivWrap => OverflowBehavior::Wrapping,
            AddSaturate | SubSaturate | MulSaturate | IntDivSaturate => OverflowBehavior::Saturating,
            AddUnchecked | SubUnchecked | MulUnchecked | IntDivUnchecked => {
                OverflowBehavior::Unchecked
            }
            AddChecked | SubChecked | MulChecked | IntDivChecked => OverflowBehavior::Checked,
            _ => return None,
        };
        Some(behavior)
    }

    pub fn is_comparison(&self) -> bool {
        use BinaryOp::*;
        matches!(self, Eq | Ne | Lt | Le | Gt | Ge)
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_bitwise(&self) -> bool {
        use BinaryOp::*;
        matches!(self, BitAnd | BitOr | BitXor | Shl | Shr)
    }

    /// Source spelling, used by the readable lowered listing.
    pub fn symbol(&self) -> &'static str {
        use BinaryOp::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            IntDiv => "//",
            Mod => "%",
            Pow => "**",
            AddWrap => "+%",
            AddSaturate => "+^",
            AddUnchecked => "+!",
            AddChecked => "+?",
            SubWrap => "-%",
            SubSaturate => "-^",
            SubUnchecked => "-!",
            SubChecked => "-?",
            MulWrap => "*%",
            MulSaturate => "*^",
            MulUnchecked => "*!",
            MulChecked => "*?",
            IntDivWrap => "//%",
            IntDivSaturate => "//^",
            IntDivUnchecked => "//!",
            IntDivChecked => "//?",
            Eq => "==",
            Ne => "!=",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            And => "and",
            Or => "or",
            BitAnd => "&",
            BitOr => "|",
            BitXor => "^",
            Shl => "<<",
            Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation `-x`
    Neg,
    /// Logical `not x`
    Not,
    /// Bitwise complement `~x`
    BitNot,
}

/// A literal value. The token kind records the concrete type tag where the
/// suffix supplied one (`S64Literal` for a bare integer, `U8Literal` for
/// `7u8`, and so on).
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int { value: i128, kind: TokenKind },
    Float { value: f64, kind: TokenKind },
    Text { value: String, kind: TokenKind },
    Letter { value: char, kind: TokenKind },
    Bool(bool),
    /// Byte count
    MemorySize(i128),
    /// Nanosecond count
    Duration(i128),
    None,
}

/// One piece of a formatted text expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatSegment {
    Text(String),
    Expression(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub id: NodeId,
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Identifier(String),
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    /// `callee(args)` where callee is any postfix expression
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
    },
    /// `receiver.method(args)`
    MethodCall {
        receiver: Box<Expression>,
        method: String,
        args: Vec<Expression>,
    },
    /// `name<T, ...>(args)` or `receiver.method<T, ...>(args)`; `bang` is
    /// set for the intrinsic form `name<T>!(args)`
    GenericCall {
        receiver: Option<Box<Expression>>,
        method: String,
        type_args: Vec<TypeExpr>,
        args: Vec<Expression>,
        bang: bool,
    },
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
    },
    Field {
        object: Box<Expression>,
        field: String,
    },
    /// `a to b [by s]`
    Range {
        start: Box<Expression>,
        end: Box<Expression>,
        step: Option<Box<Expression>>,
    },
    /// `if cond then a else b`
    Conditional {
        condition: Box<Expression>,
        then_value: Box<Expression>,
        else_value: Box<Expression>,
    },
    /// `|a, b| expr`
    Lambda {
        params: Vec<String>,
        body: Box<Expression>,
    },
    /// `f"..."` with interpolations parsed into expressions
    FormatText {
        segments: Vec<FormatSegment>,
    },
    /// Postfix `?`: propagate a fallible value
    Propagate {
        operand: Box<Expression>,
    },
}

// ============================================================================
//                                PATTERNS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    Literal(Literal),
    /// `_`
    Wildcard,
    /// A lowercase name binds the scrutinee
    Binding(String),
    /// `is T name`: matches when the scrutinee has type `T`, binding it
    TypeTag {
        ty: TypeExpr,
        name: Option<String>,
    },
    Tuple(Vec<Pattern>),
    /// `Name { field, field: pattern }`: matches a choice constructor or
    /// destructures a record
    Destructure {
        name: String,
        /// (field name, sub-pattern); a missing sub-pattern binds the field
        /// under its own name
        fields: Vec<(String, Option<Pattern>)>,
    },
}

// ============================================================================
//                             TYPE EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    /// `Name` or `Name<T, ...>`
    Named {
        name: String,
        generic_args: Vec<TypeExpr>,
    },
    /// `@T`: raw address of a `T`
    Pointer(Box<TypeExpr>),
    /// `[T]`: slice of `T`
    Slice(Box<TypeExpr>),
}

impl TypeExpr {
    /// The head name for diagnostics ("Map" for `Map<K, V>`).
    pub fn head_name(&self) -> String {
        match &self.kind {
            TypeExprKind::Named { name, .. } => name.clone(),
            TypeExprKind::Pointer(inner) => format!("@{}", inner.head_name()),
            TypeExprKind::Slice(inner) => format!("[{}]", inner.head_name()),
        }
    }
}

// ============================================================================
//                                VISITOR
// ============================================================================

/// Traversal over the AST producing a caller-chosen result type.
///
/// Implementations override the hooks they care about; the `walk_*` free
/// functions dispatch to children for the common recursive shape.
pub trait Visitor {
    type Output: Default;

    fn visit_declaration(&mut self, declaration: &Declaration) -> Self::Output {
        walk_declaration(self, declaration);
        Self::Output::default()
    }

    fn visit_statement(&mut self, statement: &Statement) -> Self::Output {
        walk_statement(self, statement);
        Self::Output::default()
    }

    fn visit_expression(&mut self, expression: &Expression) -> Self::Output {
        walk_expression(self, expression);
        Self::Output::default()
    }

    fn visit_pattern(&mut self, _pattern: &Pattern) -> Self::Output {
        Self::Output::default()
    }

    fn visit_type(&mut self, _ty: &TypeExpr) -> Self::Output {
        Self::Output::default()
    }
}

pub fn walk_program<V: Visitor + ?Sized>(visitor: &mut V, program: &Program) {
    for declaration in &program.declarations {
        visitor.visit_declaration(declaration);
    }
}

pub fn walk_declaration<V: Visitor + ?Sized>(visitor: &mut V, declaration: &Declaration) {
    match declaration {
        Declaration::Function(f) => {
            if let Some(body) = &f.body {
                walk_block(visitor, body);
            }
        }
        Declaration::Record(r) => {
            for method in &r.methods {
                if let Some(body) = &method.body {
                    walk_block(visitor, body);
                }
            }
        }
        Declaration::Entity(e) => {
            for method in &e.methods {
                if let Some(body) = &method.body {
                    walk_block(visitor, body);
                }
            }
        }
        Declaration::Protocol(p) => {
            for method in &p.methods {
                if let Some(body) = &method.body {
                    walk_block(visitor, body);
                }
            }
        }
        Declaration::Variable(v) => {
            if let Some(init) = &v.initializer {
                visitor.visit_expression(init);
            }
        }
        Declaration::External(_)
        | Declaration::Choice(_)
        | Declaration::Import(_)
        | Declaration::Redefine(_) => {}
    }
}

pub fn walk_block<V: Visitor + ?Sized>(visitor: &mut V, block: &Block) {
    for statement in &block.statements {
        visitor.visit_statement(statement);
    }
}

pub fn walk_statement<V: Visitor + ?Sized>(visitor: &mut V, statement: &Statement) {
    match statement {
        Statement::Block(block) => walk_block(visitor, block),
        Statement::If(s) => {
            for (condition, body) in &s.branches {
                visitor.visit_expression(condition);
                walk_block(visitor, body);
            }
            if let Some(else_block) = &s.else_block {
                walk_block(visitor, else_block);
            }
        }
        Statement::When(s) => {
            visitor.visit_expression(&s.scrutinee);
            for arm in &s.arms {
                visitor.visit_pattern(&arm.pattern);
                walk_block(visitor, &arm.body);
            }
        }
        Statement::While(s) => {
            visitor.visit_expression(&s.condition);
            walk_block(visitor, &s.body);
        }
        Statement::For(s) => {
            visitor.visit_expression(&s.iterable);
            walk_block(visitor, &s.body);
        }
        Statement::Loop(s) => walk_block(visitor, &s.body),
        Statement::Return { value, .. } => {
            if let Some(value) = value {
                visitor.visit_expression(value);
            }
        }
        Statement::Danger { body, .. } => walk_block(visitor, body),
        Statement::Assignment { target, value, .. } => {
            visitor.visit_expression(target);
            visitor.visit_expression(value);
        }
        Statement::Expression(e) => {
            visitor.visit_expression(e);
        }
        Statement::Declaration(d) => {
            visitor.visit_declaration(d);
        }
        Statement::Break { .. } | Statement::Continue { .. } => {}
    }
}

pub fn walk_expression<V: Visitor + ?Sized>(visitor: &mut V, expression: &Expression) {
    match &expression.kind {
        ExprKind::Binary { left, right, .. } => {
            visitor.visit_expression(left);
            visitor.visit_expression(right);
        }
        ExprKind::Unary { operand, .. } | ExprKind::Propagate { operand } => {
            visitor.visit_expression(operand);
        }
        ExprKind::Call { callee, args } => {
            visitor.visit_expression(callee);
            for arg in args {
                visitor.visit_expression(arg);
            }
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            visitor.visit_expression(receiver);
            for arg in args {
                visitor.visit_expression(arg);
            }
        }
        ExprKind::GenericCall {
            receiver,
            args,
            type_args,
            ..
        } => {
            if let Some(receiver) = receiver {
                visitor.visit_expression(receiver);
            }
            for ty in type_args {
                visitor.visit_type(ty);
            }
            for arg in args {
                visitor.visit_expression(arg);
            }
        }
        ExprKind::Index { object, index } => {
            visitor.visit_expression(object);
            visitor.visit_expression(index);
        }
        ExprKind::Field { object, .. } => {
            visitor.visit_expression(object);
        }
        ExprKind::Range { start, end, step } => {
            visitor.visit_expression(start);
            visitor.visit_expression(end);
            if let Some(step) = step {
                visitor.visit_expression(step);
            }
        }
        ExprKind::Conditional {
            condition,
            then_value,
            else_value,
        } => {
            visitor.visit_expression(condition);
            visitor.visit_expression(then_value);
            visitor.visit_expression(else_value);
        }
        ExprKind::Lambda { body, .. } => {
            visitor.visit_expression(body);
        }
        ExprKind::FormatText { segments } => {
            for segment in segments {
                if let FormatSegment::Expression(e) = segment {
                    visitor.visit_expression(e);
                }
            }
        }
        ExprKind::Literal(_) | ExprKind::Identifier(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(id: u32, kind: ExprKind) -> Expression {
        Expression {
            id: NodeId(id),
            kind,
            span: Span::default(),
        }
    }

    #[test]
    fn test_binary_op_from_token() {
        assert_eq!(BinaryOp::from_token(TokenKind::Plus), Some(BinaryOp::Add));
        assert_eq!(
            BinaryOp::from_token(TokenKind::PlusChecked),
            Some(BinaryOp::AddChecked)
        );
        assert_eq!(
            BinaryOp::from_token(TokenKind::SlashSlashWrap),
            Some(BinaryOp::IntDivWrap)
        );
        assert_eq!(BinaryOp::from_token(TokenKind::Comma), None);
    }

    #[test]
    fn test_overflow_behavior() {
        assert_eq!(
            BinaryOp::AddWrap.overflow_behavior(),
            Some(OverflowBehavior::Wrapping)
        );
        assert_eq!(
            BinaryOp::SubChecked.overflow_behavior(),
            Some(OverflowBehavior::Checked)
        );
        assert_eq!(BinaryOp::Add.overflow_behavior(), None);
    }

    #[test]
    fn test_visitor_counts_identifiers() {
        struct Counter {
            count: usize,
        }
        impl Visitor for Counter {
            type Output = ();

            fn visit_expression(&mut self, expression: &Expression) {
                if matches!(expression.kind, ExprKind::Identifier(_)) {
                    self.count += 1;
                }
                walk_expression(self, expression);
            }
        }

        // a + (b * c)
        let tree = expr(
            0,
            ExprKind::Binary {
                op: BinaryOp::Add,
                left: Box::new(expr(1, ExprKind::Identifier("a".into()))),
                right: Box::new(expr(
                    2,
                    ExprKind::Binary {
                        op: BinaryOp::Mul,
                        left: Box::new(expr(3, ExprKind::Identifier("b".into()))),
                        right: Box::new(expr(4, ExprKind::Identifier("c".into()))),
                    },
                )),
            },
        );

        let mut counter = Counter { count: 0 };
        counter.visit_expression(&tree);
        assert_eq!(counter.count, 3);
    }

    #[test]
    fn test_type_expr_head_name() {
        let named = TypeExpr {
            kind: TypeExprKind::Named {
                name: "Map".to_string(),
                generic_args: vec![],
            },
            span: Span::default(),
        };
        assert_eq!(named.head_name(), "Map");
        let pointer = TypeExpr {
            kind: TypeExprKind::Pointer(Box::new(named)),
            span: Span::default(),
        };
        assert_eq!(pointer.head_name(), "@Map");
    }
}
