// Copyright (c) 2025 knix
// All rights reserved.

/// Adapter synthesis for callable references and function-typed arguments.
///
/// A reference like `::f` typed at a functional interface type T needs an
/// adapter function whenever f's own signature cannot be used as T directly:
/// f is non-suspend but T is suspend, f returns a value where T expects Unit,
/// or T's call site groups individual values into one of f's varargs. The
/// adapter is a synthetic function whose signature is derived positionally
/// from T's type arguments and whose body is a single call to f.
use itertools::Itertools;
use log::{debug, trace};
use smallvec::smallvec;

use super::*;
use crate::lower::types::FunctionType;
use crate::{failf, ice};

/// Which receiver slot a bound receiver value occupies on the adaptee call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiverSide {
    Dispatch,
    Extension,
}

/// The vararg greedy-consume loop, written as an explicit state machine: we
/// consume adapter parameters as individual elements until we either see a
/// whole-array match, run out, or hit a parameter of an unrelated type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarargConsume {
    ConsumingElements,
    FoundWholeArray,
    Exhausted,
}

impl LoweringUnit {
    /// Whether referencing `function_id` at `expected_type` requires a
    /// synthetic adapter. Three independent conditions; any one suffices.
    pub fn needs_adapter(
        &self,
        reference_id: TypedExprId,
        expected_type: TypeId,
        function_id: FunctionId,
    ) -> bool {
        debug_assert!(self.types.is_builtin_functional_type(expected_type));
        let reference = self.exprs.get(reference_id).expect_callable_reference();
        let function = self.functions.get(function_id);

        // Suspend conversion: non-suspend function referenced at suspend type
        if self.types.is_suspend_functional_type(expected_type) && !function.is_suspend() {
            return true;
        }

        // Unit coercion: the reference's result is discarded
        if self.types.function_return_type(expected_type) == UNIT_TYPE_ID
            && function.return_type != UNIT_TYPE_ID
        {
            return true;
        }

        // Vararg spread: the expected type passes individual elements (or a
        // whole array) where the function declares a vararg. An unbound
        // reference with a static qualifier spends its first expected
        // parameter on the receiver, shifting every position by one.
        let expected_params = self.types.function_param_types(expected_type);
        let receiver_shift =
            if reference.explicit_receiver.is_none() && reference.static_qualifier.is_some() {
                1
            } else {
                0
            };
        if expected_params.len().saturating_sub(receiver_shift) >= function.params.len() {
            for i in function.params.iter().positions(|p| p.vararg_element_type.is_some()) {
                let Some(expected_at) = expected_params.get(i + receiver_shift) else {
                    continue;
                };
                if *expected_at == function.params[i].type_id {
                    return true;
                }
            }
        }

        false
    }

    /// Builds the adapter for a callable reference and returns the expression
    /// that replaces the reference: a function literal when unbound, or a
    /// two-statement block (declaration + reference bound to the receiver
    /// value) when a receiver was captured at the reference site.
    ///
    /// Callers must have checked `needs_adapter` first; synthesis does not
    /// re-validate.
    pub fn synthesize_for_callable_reference(
        &mut self,
        reference_id: TypedExprId,
        expected_type: TypeId,
    ) -> LowerResult<TypedExprId> {
        let reference = self.exprs.get(reference_id).expect_callable_reference().clone();
        let span = reference.span;
        let adaptee_id = reference.target;
        let adaptee = self.functions.get(adaptee_id);
        match adaptee.kind {
            FunctionKind::Plain | FunctionKind::Constructor => {}
            FunctionKind::PropertyAccessor => {
                ice!(
                    "adapted callable reference target must be a plain function or constructor, got {:?}",
                    adaptee.kind
                )
            }
        }

        let bound_dispatch = self.find_bound_receiver(&reference, true);
        let bound_extension = self.find_bound_receiver(&reference, false);
        if bound_dispatch.is_some() && bound_extension.is_some() {
            ice!("callable reference is bound on both dispatch and extension receivers");
        }
        let bound_side = match (bound_dispatch, bound_extension) {
            (Some(value), None) => Some((ReceiverSide::Dispatch, value)),
            (None, Some(value)) => Some((ReceiverSide::Extension, value)),
            _ => None,
        };
        debug!(
            "synthesizing reference adapter for {} at {}",
            self.idents.get_name(self.functions.get(adaptee_id).name),
            self.types.type_to_string(expected_type, &self.idents),
        );

        let FunctionType { type_args: expected_args, .. } =
            self.types.get(expected_type).expect_function().clone();
        let adapter_return = *expected_args.last().unwrap();
        let adapter_param_types = &expected_args[..expected_args.len() - 1];

        let adaptee_decl = self.functions.get(adaptee_id);
        let mut flags = adaptee_decl.flags;
        flags.set(
            FunctionFlags::SUSPEND,
            adaptee_decl.is_suspend() || self.types.is_suspend_functional_type(expected_type),
        );
        flags.insert(FunctionFlags::SYNTHETIC);
        let adapter_name = self.build_ident_with(|unit, s| {
            use std::fmt::Write;
            write!(
                s,
                "__{}_adapter_{}",
                unit.idents.get_name(unit.functions.get(adaptee_id).name),
                unit.functions.len()
            )
            .unwrap();
        });
        let receiver_type = bound_side.map(|(_, value)| self.expr_type(value));

        let adapter_id = self.functions.next_id();
        let adapter_scope = self.scopes.add_child_scope(
            Scopes::ROOT_SCOPE_ID,
            ScopeType::FunctionScope,
            Some(adapter_id),
        );
        self.scopes.enter_function(adapter_id);
        // The scope must be left on every path out of construction
        let mut self_ = scopeguard::guard(&mut *self, |self_| {
            self_.scopes.leave_function(adapter_id);
        });

        let receiver_param = receiver_type.map(|type_id| {
            let name = self_.idents.b.receiver;
            let variable_id =
                self_.variables.add(Variable { name, type_id, owner_scope: adapter_scope });
            self_.scopes.add_variable(adapter_scope, name, variable_id);
            variable_id
        });
        let param_specs: Vec<FunctionParamSpec> = adapter_param_types
            .iter()
            .enumerate()
            .map(|(i, type_id)| {
                let name = self_.build_ident_with(|_, s| {
                    use std::fmt::Write;
                    write!(s, "p{}", i).unwrap();
                });
                FunctionParamSpec::simple(name, *type_id)
            })
            .collect();
        let params = self_.declare_params(adapter_scope, &param_specs);
        let adapter_param_exprs: Vec<TypedExprId> =
            params.iter().map(|p| self_.add_variable_expr(p.variable_id, span)).collect();
        let bound_receiver_param = match (bound_side, receiver_param) {
            (Some((side, _)), Some(variable_id)) => {
                let receiver_expr = self_.add_variable_expr(variable_id, span);
                Some((side, receiver_expr))
            }
            _ => None,
        };

        let call_expr = self_.build_adaptee_call(
            adaptee_id,
            reference.type_args.clone(),
            reference.static_qualifier.is_some() && bound_side.is_none(),
            &adapter_param_exprs,
            bound_receiver_param,
            span,
        )?;
        let body = self_.make_adapter_body(call_expr, adapter_return, span);

        let added = self_.functions.add(TypedFunction {
            name: adapter_name,
            kind: FunctionKind::Plain,
            flags,
            params,
            return_type: adapter_return,
            dispatch_receiver_type: None,
            extension_receiver_type: receiver_type,
            scope: adapter_scope,
            body: Some(body),
            span,
        });
        debug_assert!(added == adapter_id);
        drop(self_);

        match bound_side {
            None => Ok(self.exprs.add(TypedExpr::FunctionLiteral(FunctionLiteralExpr {
                function_id: adapter_id,
                type_id: expected_type,
                span,
            }))),
            Some((_, bound_value)) => {
                Ok(self.make_adapted_reference_block(adapter_id, bound_value, expected_type, span))
            }
        }
    }

    /// Suspend-conversion for a function-typed argument: wraps the argument
    /// value in an adapter whose extension receiver holds the value and whose
    /// body invokes the value's `invoke` member. Anything that cannot be
    /// adapted returns the argument unchanged.
    pub fn synthesize_for_argument(
        &mut self,
        argument: TypedExprId,
        expected_param_type: TypeId,
    ) -> LowerResult<TypedExprId> {
        if !self.types.is_suspend_functional_type(expected_param_type) {
            return Ok(argument);
        }
        let argument_type = self.expr_type(argument);
        if self.types.is_suspend_functional_type(argument_type) {
            return Ok(argument);
        }
        // A prior conversion result is already shaped correctly; idempotent
        if let TypedExpr::Block(b) = self.exprs.get(argument) {
            if b.kind == BlockKind::AdaptedReference {
                return Ok(argument);
            }
        }

        let non_suspend = self.types.to_non_suspend_functional_type(expected_param_type);
        let Some(invoke_target) = self.find_invoke_member(argument_type, non_suspend) else {
            debug!(
                "no compatible invoke member on {}; leaving argument unchanged",
                self.types.type_to_string(argument_type, &self.idents)
            );
            return Ok(argument);
        };

        let span = self.expr_span(argument);
        let FunctionType { type_args: expected_args, .. } =
            self.types.get(expected_param_type).expect_function().clone();
        let adapter_return = *expected_args.last().unwrap();
        let adapter_param_types = &expected_args[..expected_args.len() - 1];
        let adapter_name = self.build_ident_with(|unit, s| {
            use std::fmt::Write;
            write!(s, "__suspend_conv_{}", unit.functions.len()).unwrap();
        });

        let adapter_id = self.functions.next_id();
        let adapter_scope = self.scopes.add_child_scope(
            Scopes::ROOT_SCOPE_ID,
            ScopeType::FunctionScope,
            Some(adapter_id),
        );
        self.scopes.enter_function(adapter_id);
        let mut self_ = scopeguard::guard(&mut *self, |self_| {
            self_.scopes.leave_function(adapter_id);
        });

        let receiver_name = self_.idents.b.receiver;
        let receiver_variable = self_.variables.add(Variable {
            name: receiver_name,
            type_id: argument_type,
            owner_scope: adapter_scope,
        });
        self_.scopes.add_variable(adapter_scope, receiver_name, receiver_variable);
        let param_specs: Vec<FunctionParamSpec> = adapter_param_types
            .iter()
            .enumerate()
            .map(|(i, type_id)| {
                let name = self_.build_ident_with(|_, s| {
                    use std::fmt::Write;
                    write!(s, "p{}", i).unwrap();
                });
                FunctionParamSpec::simple(name, *type_id)
            })
            .collect();
        let params = self_.declare_params(adapter_scope, &param_specs);
        let receiver_expr = self_.add_variable_expr(receiver_variable, span);
        let args: Vec<CallArg> = params
            .iter()
            .map(|p| CallArg::Expr(self_.add_variable_expr(p.variable_id, span)))
            .collect();
        let callee = match invoke_target {
            InvokeTarget::Builtin { functional_type } => Callee::BuiltinInvoke { functional_type },
            InvokeTarget::Member(function_id) => Callee::Static(function_id),
        };
        trace!("forwarding {} ordinary parameters to {:?}", args.len(), callee);
        let call_expr = self_.exprs.add(TypedExpr::Call(Call {
            callee,
            dispatch_receiver: Some(receiver_expr),
            extension_receiver: None,
            type_args: smallvec![],
            args,
            return_type: adapter_return,
            span,
        }));
        let body = self_.make_adapter_body(call_expr, adapter_return, span);

        let added = self_.functions.add(TypedFunction {
            name: adapter_name,
            kind: FunctionKind::Plain,
            flags: FunctionFlags::SUSPEND | FunctionFlags::SYNTHETIC,
            params,
            return_type: adapter_return,
            dispatch_receiver_type: None,
            extension_receiver_type: Some(argument_type),
            scope: adapter_scope,
            body: Some(body),
            span,
        });
        debug_assert!(added == adapter_id);
        drop(self_);

        Ok(self.make_adapted_reference_block(adapter_id, argument, expected_param_type, span))
    }

    /// The single call inside an adapter body. Adapter parameters and adaptee
    /// parameters are walked with two independent cursors: varargs consume
    /// greedily, defaulted parameters consume nothing, ordinary parameters
    /// consume exactly one.
    fn build_adaptee_call(
        &mut self,
        adaptee_id: FunctionId,
        type_args: SV4<TypeId>,
        static_qualifier_receiver: bool,
        adapter_params: &[TypedExprId],
        bound_receiver_param: Option<(ReceiverSide, TypedExprId)>,
        span: SpanId,
    ) -> LowerResult<TypedExprId> {
        let adaptee = self.functions.get(adaptee_id).clone();
        let mut dispatch_receiver: Option<TypedExprId> = None;
        let mut extension_receiver: Option<TypedExprId> = None;
        let mut cursor: usize = 0;

        match bound_receiver_param {
            Some((ReceiverSide::Dispatch, receiver)) => dispatch_receiver = Some(receiver),
            Some((ReceiverSide::Extension, receiver)) => extension_receiver = Some(receiver),
            None => {
                if static_qualifier_receiver {
                    let Some(first) = adapter_params.first().copied() else {
                        return failf!(
                            span,
                            "reference to {} has a qualifier receiver but the expected type takes no parameters",
                            self.idents.get_name(adaptee.name)
                        );
                    };
                    if adaptee.extension_receiver_type.is_some() {
                        extension_receiver = Some(first);
                    } else {
                        dispatch_receiver = Some(first);
                    }
                    cursor = 1;
                }
            }
        }

        let mut args: Vec<CallArg> = Vec::with_capacity(adaptee.params.len());
        for param in &adaptee.params {
            if let Some(element_type) = param.vararg_element_type {
                let array_type = param.type_id;
                let mut elements: SV4<VarargElement> = smallvec![];
                let mut state = VarargConsume::ConsumingElements;
                while state == VarargConsume::ConsumingElements {
                    match adapter_params.get(cursor) {
                        None => state = VarargConsume::Exhausted,
                        Some(next) => {
                            let next_type = self.expr_type(*next);
                            if next_type == array_type {
                                elements.push(VarargElement::SpreadArray(*next));
                                cursor += 1;
                                state = VarargConsume::FoundWholeArray;
                            } else if next_type == element_type {
                                elements.push(VarargElement::Single(*next));
                                cursor += 1;
                            } else {
                                state = VarargConsume::Exhausted;
                            }
                        }
                    }
                }
                trace!(
                    "vararg {} consumed {} element(s), final state {:?}",
                    self.idents.get_name(param.name),
                    elements.len(),
                    state
                );
                if elements.is_empty() {
                    // Neither a whole-array nor an element match: let the
                    // call fall back to its default (or an empty array)
                    args.push(CallArg::Omitted);
                } else {
                    args.push(CallArg::Vararg(VarargArg { array_type, element_type, elements }));
                }
            } else if param.has_default {
                // Defaults are never forwarded from adapter parameters
                args.push(CallArg::Omitted);
            } else {
                match adapter_params.get(cursor) {
                    Some(next) => {
                        args.push(CallArg::Expr(*next));
                        cursor += 1;
                    }
                    None => {
                        return failf!(
                            span,
                            "adapted reference to {} ran out of parameters at {}",
                            self.idents.get_name(adaptee.name),
                            self.idents.get_name(param.name),
                        );
                    }
                }
            }
        }

        Ok(self.exprs.add(TypedExpr::Call(Call {
            callee: Callee::Static(adaptee_id),
            dispatch_receiver,
            extension_receiver,
            type_args,
            args,
            return_type: adaptee.return_type,
            span,
        })))
    }

    /// Adapter bodies are exactly one statement: the bare adaptee call when
    /// the expected return type is Unit (the coercion), else a return of it.
    fn make_adapter_body(
        &mut self,
        call_expr: TypedExprId,
        adapter_return: TypeId,
        span: SpanId,
    ) -> TypedExprId {
        let (stmt_expr, block_type) = if adapter_return == UNIT_TYPE_ID {
            (call_expr, UNIT_TYPE_ID)
        } else {
            let ret =
                self.exprs.add(TypedExpr::Return(TypedReturn { value: call_expr, span }));
            (ret, NEVER_TYPE_ID)
        };
        let stmt_id = self.stmts.add(TypedStmt::Expr(stmt_expr));
        self.exprs.add(TypedExpr::Block(TypedBlock {
            kind: BlockKind::Lexical,
            stmts: smallvec![stmt_id],
            expr_type: block_type,
            span,
        }))
    }

    /// `{ fun __adapter(...); ::__adapter }` with the bound value in the new
    /// reference's receiver slot (the adapter declares only an extension
    /// receiver, so that is the side it binds).
    fn make_adapted_reference_block(
        &mut self,
        adapter_id: FunctionId,
        bound_value: TypedExprId,
        expected_type: TypeId,
        span: SpanId,
    ) -> TypedExprId {
        let decl_stmt = self.stmts.add(TypedStmt::LocalFunction(adapter_id));
        let reference_expr = self.exprs.add(TypedExpr::CallableReference(CallableRef {
            target: adapter_id,
            type_id: expected_type,
            explicit_receiver: Some(bound_value),
            static_qualifier: None,
            type_args: smallvec![],
            span,
        }));
        let reference_stmt = self.stmts.add(TypedStmt::Expr(reference_expr));
        self.exprs.add(TypedExpr::Block(TypedBlock {
            kind: BlockKind::AdaptedReference,
            stmts: smallvec![decl_stmt, reference_stmt],
            expr_type: expected_type,
            span,
        }))
    }

    pub(crate) fn build_ident_with(
        &mut self,
        build: impl FnOnce(&LoweringUnit, &mut String),
    ) -> Ident {
        let mut s = String::with_capacity(32);
        build(self, &mut s);
        self.idents.intern(s)
    }
}
