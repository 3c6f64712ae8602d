// Copyright (c) 2025 knix
// All rights reserved.

//! The IR lowering stage: node pools, the symbol/type environment, and the
//! adapter synthesizer that reconciles callable references and function-typed
//! arguments with their expected functional interface types.

pub mod adapt;
pub mod scopes;
pub mod types;

mod adapt_test;

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::num::NonZeroU32;

use colored::Colorize;

use crate::idents::{Ident, IdentPool};
use crate::nz_u32_id;
use crate::pool::Pool;
use crate::span::{SpanId, Spans};
use crate::{SV4, impl_copy_if_small};

use scopes::{ScopeId, ScopeType, Scopes};
use types::{ClassId, NEVER_TYPE_ID, Type, TypeId, Types, UNIT_TYPE_ID};

nz_u32_id!(FunctionId);
nz_u32_id!(VariableId);
nz_u32_id!(TypedExprId);
nz_u32_id!(TypedStmtId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Error,
    Warn,
}

impl ErrorLevel {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorLevel::Error => "error",
            ErrorLevel::Warn => "warn",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LowerError {
    pub message: String,
    pub level: ErrorLevel,
    pub span: SpanId,
}

impl LowerError {
    pub fn make(message: impl AsRef<str>, span: SpanId) -> LowerError {
        LowerError { message: message.as_ref().to_string(), level: ErrorLevel::Error, span }
    }
}

impl Display for LowerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("lower error: {}", self.message))
    }
}

impl Error for LowerError {}

pub type LowerResult<A> = Result<A, LowerError>;

pub fn make_error<T: AsRef<str>>(message: T, span: SpanId) -> LowerError {
    LowerError::make(message.as_ref(), span)
}

pub fn make_fail_span<A, T: AsRef<str>>(message: T, span: SpanId) -> LowerResult<A> {
    Err(make_error(message, span))
}

pub fn write_error(
    w: &mut impl std::io::Write,
    spans: &Spans,
    error: &LowerError,
) -> std::io::Result<()> {
    let level = match error.level {
        ErrorLevel::Error => "error".red(),
        ErrorLevel::Warn => "warn".yellow(),
    };
    writeln!(w, "{} at {}\n\t{}", level, spans.get(error.span), error.message)
}

#[macro_export]
macro_rules! errf {
    ($span:expr, $($format_args:expr),* $(,)?) => {
        {
            let s: String = format!($($format_args),*);
            make_error(&s, $span)
        }
    };
}

#[macro_export]
macro_rules! failf {
    ($span:expr, $($format_args:expr),* $(,)?) => {
        {
            let s: String = format!($($format_args),*);
            make_fail_span(&s, $span)
        }
    };
}

/// Internal-consistency errors indicate a compiler bug upstream, never bad
/// user input; they abort the unit rather than producing a diagnostic.
#[macro_export]
macro_rules! ice {
    ($($format_args:expr),* $(,)?) => {
        {
            let s: String = format!($($format_args),*);
            panic!("internal compiler error: {}", s)
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionFlags(u32);

impl FunctionFlags {
    pub const SUSPEND: FunctionFlags = FunctionFlags(1 << 0);
    pub const INLINE: FunctionFlags = FunctionFlags(1 << 1);
    pub const EXTERNAL: FunctionFlags = FunctionFlags(1 << 2);
    pub const TAILREC: FunctionFlags = FunctionFlags(1 << 3);
    pub const OPERATOR: FunctionFlags = FunctionFlags(1 << 4);
    pub const INFIX: FunctionFlags = FunctionFlags(1 << 5);
    pub const EXPECT: FunctionFlags = FunctionFlags(1 << 6);
    pub const SYNTHETIC: FunctionFlags = FunctionFlags(1 << 7);

    pub const fn empty() -> FunctionFlags {
        FunctionFlags(0)
    }

    pub fn contains(self, other: FunctionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: FunctionFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: FunctionFlags) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: FunctionFlags, value: bool) {
        if value { self.insert(other) } else { self.remove(other) }
    }
}

impl std::ops::BitOr for FunctionFlags {
    type Output = FunctionFlags;
    fn bitor(self, rhs: FunctionFlags) -> FunctionFlags {
        FunctionFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Plain,
    Constructor,
    PropertyAccessor,
}

#[derive(Debug, Clone)]
pub struct FunctionParam {
    pub name: Ident,
    pub index: u32,
    pub type_id: TypeId,
    /// Set iff this parameter is a vararg; `type_id` is then the array type
    /// and this is its element type.
    pub vararg_element_type: Option<TypeId>,
    pub has_default: bool,
    pub variable_id: VariableId,
}

#[derive(Debug, Clone)]
pub struct TypedFunction {
    pub name: Ident,
    pub kind: FunctionKind,
    pub flags: FunctionFlags,
    pub params: Vec<FunctionParam>,
    pub return_type: TypeId,
    pub dispatch_receiver_type: Option<TypeId>,
    pub extension_receiver_type: Option<TypeId>,
    pub scope: ScopeId,
    pub body: Option<TypedExprId>,
    pub span: SpanId,
}

impl TypedFunction {
    pub fn is_suspend(&self) -> bool {
        self.flags.contains(FunctionFlags::SUSPEND)
    }
}

/// Input shape for declaring a function; `add_function` turns these into
/// scoped parameter variables.
#[derive(Debug, Clone, Copy)]
pub struct FunctionParamSpec {
    pub name: Ident,
    pub type_id: TypeId,
    pub vararg_element_type: Option<TypeId>,
    pub has_default: bool,
}

impl FunctionParamSpec {
    pub fn simple(name: Ident, type_id: TypeId) -> FunctionParamSpec {
        FunctionParamSpec { name, type_id, vararg_element_type: None, has_default: false }
    }
}

#[derive(Debug)]
pub struct Variable {
    pub name: Ident,
    pub type_id: TypeId,
    pub owner_scope: ScopeId,
}

#[derive(Debug, Clone)]
pub struct VariableExpr {
    pub variable_id: VariableId,
    pub type_id: TypeId,
    pub span: SpanId,
}
impl_copy_if_small!(16, VariableExpr);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    Static(FunctionId),
    /// `invoke` on a value of builtin functional type; the value sits in the
    /// call's dispatch receiver slot.
    BuiltinInvoke { functional_type: TypeId },
}

impl Callee {
    pub fn maybe_function_id(&self) -> Option<FunctionId> {
        match self {
            Callee::Static(function_id) => Some(*function_id),
            Callee::BuiltinInvoke { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarargElement {
    /// A single value of the vararg's element type.
    Single(TypedExprId),
    /// A whole array of the vararg's array type, spread into the sequence.
    SpreadArray(TypedExprId),
}

#[derive(Debug, Clone)]
pub struct VarargArg {
    pub array_type: TypeId,
    pub element_type: TypeId,
    pub elements: SV4<VarargElement>,
}

/// One argument slot of a call, index-aligned with the callee's declared
/// parameter list (receivers ride in their own slots).
#[derive(Debug, Clone)]
pub enum CallArg {
    /// The "no argument" sentinel: the callee's default (or empty vararg
    /// array) applies.
    Omitted,
    Expr(TypedExprId),
    Vararg(VarargArg),
}

impl CallArg {
    pub fn as_expr(&self) -> Option<TypedExprId> {
        match self {
            CallArg::Expr(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_vararg(&self) -> Option<&VarargArg> {
        match self {
            CallArg::Vararg(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_omitted(&self) -> bool {
        matches!(self, CallArg::Omitted)
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub callee: Callee,
    pub dispatch_receiver: Option<TypedExprId>,
    pub extension_receiver: Option<TypedExprId>,
    pub type_args: SV4<TypeId>,
    pub args: Vec<CallArg>,
    pub return_type: TypeId,
    pub span: SpanId,
}

#[derive(Debug, Clone, Copy)]
pub struct TypedReturn {
    pub value: TypedExprId,
    pub span: SpanId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Lexical,
    /// Marks the two-statement block produced by adapter synthesis; the
    /// argument-conversion path uses it as its idempotence guard.
    AdaptedReference,
}

#[derive(Debug, Clone)]
pub struct TypedBlock {
    pub kind: BlockKind,
    pub stmts: SV4<TypedStmtId>,
    pub expr_type: TypeId,
    pub span: SpanId,
}

#[derive(Debug, Clone)]
pub enum TypedStmt {
    Expr(TypedExprId),
    Let { variable_id: VariableId, initializer: TypedExprId, span: SpanId },
    /// A function declaration local to the enclosing block, as produced for
    /// bound adapter functions.
    LocalFunction(FunctionId),
}

#[derive(Debug, Clone)]
pub struct CallableRef {
    pub target: FunctionId,
    /// The functional interface type this reference is typed at.
    pub type_id: TypeId,
    /// Receiver expression captured at the reference's creation site, if any.
    /// Which receiver kind it binds is resolved against the target's
    /// declaration, not stored here.
    pub explicit_receiver: Option<TypedExprId>,
    /// `Foo::bar` style class qualifier on an unbound reference; the first
    /// functional parameter stands in for the receiver.
    pub static_qualifier: Option<ClassId>,
    pub type_args: SV4<TypeId>,
    pub span: SpanId,
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionLiteralExpr {
    pub function_id: FunctionId,
    pub type_id: TypeId,
    pub span: SpanId,
}

#[derive(Debug, Clone)]
pub enum TypedExpr {
    Unit(SpanId),
    Variable(VariableExpr),
    Call(Call),
    Return(TypedReturn),
    Block(TypedBlock),
    CallableReference(CallableRef),
    FunctionLiteral(FunctionLiteralExpr),
}

impl TypedExpr {
    #[inline]
    pub fn get_type(&self) -> TypeId {
        match self {
            TypedExpr::Unit(_) => UNIT_TYPE_ID,
            TypedExpr::Variable(var) => var.type_id,
            TypedExpr::Call(call) => call.return_type,
            TypedExpr::Return(_) => NEVER_TYPE_ID,
            TypedExpr::Block(b) => b.expr_type,
            TypedExpr::CallableReference(r) => r.type_id,
            TypedExpr::FunctionLiteral(f) => f.type_id,
        }
    }

    #[inline]
    pub fn get_span(&self) -> SpanId {
        match self {
            TypedExpr::Unit(span) => *span,
            TypedExpr::Variable(var) => var.span,
            TypedExpr::Call(call) => call.span,
            TypedExpr::Return(r) => r.span,
            TypedExpr::Block(b) => b.span,
            TypedExpr::CallableReference(r) => r.span,
            TypedExpr::FunctionLiteral(f) => f.span,
        }
    }

    pub fn as_callable_reference(&self) -> Option<&CallableRef> {
        match self {
            TypedExpr::CallableReference(r) => Some(r),
            _ => None,
        }
    }

    pub fn expect_callable_reference(&self) -> &CallableRef {
        self.as_callable_reference().expect("expected a callable reference expression")
    }

    pub fn as_call(&self) -> Option<&Call> {
        match self {
            TypedExpr::Call(c) => Some(c),
            _ => None,
        }
    }

    pub fn expect_call(&self) -> &Call {
        self.as_call().expect("expected a call expression")
    }

    pub fn as_block(&self) -> Option<&TypedBlock> {
        match self {
            TypedExpr::Block(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_function_literal(&self) -> Option<&FunctionLiteralExpr> {
        match self {
            TypedExpr::FunctionLiteral(f) => Some(f),
            _ => None,
        }
    }
}

/// Where an `invoke` lookup landed: the builtin member every functional type
/// carries, or an operator member contributed by a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeTarget {
    Builtin { functional_type: TypeId },
    Member(FunctionId),
}

/// One compilation unit's worth of lowering state: node pools plus the
/// symbol/type environment the adapter synthesizer reads.
pub struct LoweringUnit {
    pub idents: IdentPool,
    pub spans: Spans,
    pub types: Types,
    pub functions: Pool<TypedFunction, FunctionId>,
    pub variables: Pool<Variable, VariableId>,
    pub exprs: Pool<TypedExpr, TypedExprId>,
    pub stmts: Pool<TypedStmt, TypedStmtId>,
    pub scopes: Scopes,
}

impl LoweringUnit {
    pub fn make() -> LoweringUnit {
        LoweringUnit {
            idents: IdentPool::make(),
            spans: Spans::new(),
            types: Types::empty(),
            functions: Pool::with_capacity("functions", 256),
            variables: Pool::with_capacity("variables", 1024),
            exprs: Pool::with_capacity("exprs", 4096),
            stmts: Pool::with_capacity("stmts", 1024),
            scopes: Scopes::make(),
        }
    }

    pub fn expr_type(&self, id: TypedExprId) -> TypeId {
        self.exprs.get(id).get_type()
    }

    pub fn expr_span(&self, id: TypedExprId) -> SpanId {
        self.exprs.get(id).get_span()
    }

    /// Declares a function the way upstream resolution would have: its scope,
    /// its parameter variables, then the declaration itself.
    pub fn add_function(
        &mut self,
        name: Ident,
        kind: FunctionKind,
        flags: FunctionFlags,
        param_specs: &[FunctionParamSpec],
        return_type: TypeId,
        dispatch_receiver_type: Option<TypeId>,
        extension_receiver_type: Option<TypeId>,
        span: SpanId,
    ) -> FunctionId {
        let function_id = self.functions.next_id();
        let scope = self.scopes.add_child_scope(
            Scopes::ROOT_SCOPE_ID,
            ScopeType::FunctionScope,
            Some(function_id),
        );
        self.scopes.enter_function(function_id);
        let params = self.declare_params(scope, param_specs);
        self.scopes.leave_function(function_id);
        let added = self.functions.add(TypedFunction {
            name,
            kind,
            flags,
            params,
            return_type,
            dispatch_receiver_type,
            extension_receiver_type,
            scope,
            body: None,
            span,
        });
        debug_assert!(added == function_id);
        function_id
    }

    pub(crate) fn declare_params(
        &mut self,
        scope: ScopeId,
        param_specs: &[FunctionParamSpec],
    ) -> Vec<FunctionParam> {
        let mut params = Vec::with_capacity(param_specs.len());
        for (index, spec) in param_specs.iter().enumerate() {
            let variable_id = self.variables.add(Variable {
                name: spec.name,
                type_id: spec.type_id,
                owner_scope: scope,
            });
            self.scopes.add_variable(scope, spec.name, variable_id);
            params.push(FunctionParam {
                name: spec.name,
                index: index as u32,
                type_id: spec.type_id,
                vararg_element_type: spec.vararg_element_type,
                has_default: spec.has_default,
                variable_id,
            });
        }
        params
    }

    pub fn add_variable_expr(&mut self, variable_id: VariableId, span: SpanId) -> TypedExprId {
        let type_id = self.variables.get(variable_id).type_id;
        self.exprs.add(TypedExpr::Variable(VariableExpr { variable_id, type_id, span }))
    }

    /// The receiver-resolution collaborator: a reference's explicit receiver
    /// binds the dispatch (resp. extension) side iff the target declares a
    /// receiver of that kind.
    pub fn find_bound_receiver(
        &self,
        reference: &CallableRef,
        is_dispatch: bool,
    ) -> Option<TypedExprId> {
        let receiver_expr = reference.explicit_receiver?;
        let target = self.functions.get(reference.target);
        let slot_declared = if is_dispatch {
            target.dispatch_receiver_type.is_some()
        } else {
            target.extension_receiver_type.is_some()
        };
        if slot_declared { Some(receiver_expr) } else { None }
    }

    /// Finds the `invoke` operator of `type_id` that is compatible with the
    /// functional interface type `functional`. Returns None for types with no
    /// such member (exotic intersections and the like); callers treat that as
    /// a soft miss.
    pub fn find_invoke_member(&self, type_id: TypeId, functional: TypeId) -> Option<InvokeTarget> {
        match self.types.get(type_id) {
            Type::Function(_) => {
                if self.types.is_subtype_of_functional_type(type_id, functional) {
                    Some(InvokeTarget::Builtin { functional_type: type_id })
                } else {
                    None
                }
            }
            Type::Class(c) => {
                if !self.types.is_subtype_of_functional_type(type_id, functional) {
                    return None;
                }
                let expected_arity = self.types.function_param_types(functional).len();
                let defn = self.types.classes.get(c.class_id);
                let invoke = defn.functions.iter().copied().find(|fid| {
                    let f = self.functions.get(*fid);
                    f.name == self.idents.b.invoke
                        && f.flags.contains(FunctionFlags::OPERATOR)
                        && f.params.len() == expected_arity
                });
                invoke.map(InvokeTarget::Member)
            }
            _ => None,
        }
    }
}
