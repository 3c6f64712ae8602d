#[cfg(test)]
mod adapter_tests {
    use itertools::Itertools;
    use smallvec::smallvec;

    use crate::compiler::{ConversionSite, LowerStats, run_adapter_lowering};
    use crate::idents::Ident;
    use crate::lower::types::*;
    use crate::lower::*;
    use crate::span::SpanId;

    struct TestUnit {
        unit: LoweringUnit,
    }

    impl TestUnit {
        fn make() -> TestUnit {
            let _ = env_logger::builder().is_test(true).try_init();
            TestUnit { unit: LoweringUnit::make() }
        }

        fn ident(&mut self, s: &str) -> Ident {
            self.unit.idents.intern(s)
        }

        fn class(&mut self, name: &str, type_params: &[&str]) -> ClassId {
            let name = self.ident(name);
            let type_params = type_params.iter().map(|tp| self.unit.idents.intern(tp)).collect();
            self.unit.types.classes.add(ClassDefn {
                name,
                type_params,
                supertypes: vec![],
                functions: vec![],
            })
        }

        fn param(&mut self, name: &str, type_id: TypeId) -> FunctionParamSpec {
            FunctionParamSpec::simple(self.ident(name), type_id)
        }

        fn vararg_param(&mut self, name: &str, element_type: TypeId) -> FunctionParamSpec {
            let array_type = self.unit.types.add_array_type(element_type);
            FunctionParamSpec {
                name: self.ident(name),
                type_id: array_type,
                vararg_element_type: Some(element_type),
                has_default: false,
            }
        }

        fn defaulted_param(&mut self, name: &str, type_id: TypeId) -> FunctionParamSpec {
            FunctionParamSpec {
                name: self.ident(name),
                type_id,
                vararg_element_type: None,
                has_default: true,
            }
        }

        fn function(
            &mut self,
            name: &str,
            flags: FunctionFlags,
            params: &[FunctionParamSpec],
            return_type: TypeId,
        ) -> FunctionId {
            let name = self.ident(name);
            self.unit.add_function(
                name,
                FunctionKind::Plain,
                flags,
                params,
                return_type,
                None,
                None,
                SpanId::NONE,
            )
        }

        fn method(
            &mut self,
            name: &str,
            dispatch_receiver_type: TypeId,
            params: &[FunctionParamSpec],
            return_type: TypeId,
        ) -> FunctionId {
            let name = self.ident(name);
            self.unit.add_function(
                name,
                FunctionKind::Plain,
                FunctionFlags::empty(),
                params,
                return_type,
                Some(dispatch_receiver_type),
                None,
                SpanId::NONE,
            )
        }

        /// Some value expression of the given type, as upstream code would
        /// have produced for a receiver or argument.
        fn value_of(&mut self, type_id: TypeId) -> TypedExprId {
            let name = self.ident("v");
            let variable_id = self.unit.variables.add(Variable {
                name,
                type_id,
                owner_scope: scopes::Scopes::ROOT_SCOPE_ID,
            });
            self.unit.add_variable_expr(variable_id, SpanId::NONE)
        }

        fn reference(
            &mut self,
            target: FunctionId,
            type_id: TypeId,
            explicit_receiver: Option<TypedExprId>,
            static_qualifier: Option<ClassId>,
        ) -> TypedExprId {
            self.unit.exprs.add(TypedExpr::CallableReference(CallableRef {
                target,
                type_id,
                explicit_receiver,
                static_qualifier,
                type_args: smallvec![],
                span: SpanId::NONE,
            }))
        }

        /// The single call inside an adapter body, unwrapping the return if
        /// the body is return-wrapped.
        fn adaptee_call(&self, adapter: FunctionId) -> &Call {
            let body = self.unit.functions.get(adapter).body.expect("adapter has a body");
            let block = self.unit.exprs.get(body).as_block().expect("adapter body is a block");
            assert_eq!(block.stmts.len(), 1, "adapter body is exactly one statement");
            let TypedStmt::Expr(stmt_expr) = self.unit.stmts.get(block.stmts[0]) else {
                panic!("adapter body statement is an expression")
            };
            match self.unit.exprs.get(*stmt_expr) {
                TypedExpr::Call(call) => call,
                TypedExpr::Return(ret) => self.unit.exprs.get(ret.value).expect_call(),
                other => panic!("adapter body is a call or a return of one, got {:?}", other),
            }
        }

        /// Adapter declared by a bound-reference result block.
        fn block_adapter(&self, block_expr: TypedExprId) -> FunctionId {
            let block = self.unit.exprs.get(block_expr).as_block().expect("expected a block");
            assert_eq!(block.kind, BlockKind::AdaptedReference);
            assert_eq!(block.stmts.len(), 2);
            let TypedStmt::LocalFunction(adapter) = self.unit.stmts.get(block.stmts[0]) else {
                panic!("first statement declares the adapter")
            };
            *adapter
        }

        fn arg_variable(&self, arg: &CallArg) -> VariableId {
            let expr = arg.as_expr().expect("expected a forwarded argument");
            match self.unit.exprs.get(expr) {
                TypedExpr::Variable(v) => v.variable_id,
                other => panic!("forwarded argument is a variable reference, got {:?}", other),
            }
        }
    }

    #[test]
    fn suspend_mismatch_needs_adapter_and_adapter_is_suspend() {
        let mut t = TestUnit::make();
        let p = t.param("a", INT_TYPE_ID);
        let f = t.function("f", FunctionFlags::empty(), &[p], INT_TYPE_ID);
        let expected = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, true);
        let reference = t.reference(f, expected, None, None);

        assert!(t.unit.needs_adapter(reference, expected, f));

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let literal =
            t.unit.exprs.get(result).as_function_literal().expect("unbound result is a literal");
        assert_eq!(literal.type_id, expected);
        let adapter = t.unit.functions.get(literal.function_id);
        assert!(adapter.is_suspend());
        assert!(adapter.flags.contains(FunctionFlags::SYNTHETIC));
        assert_eq!(adapter.params.len(), 1);
        assert_eq!(adapter.params[0].type_id, INT_TYPE_ID);
        assert_eq!(adapter.return_type, INT_TYPE_ID);
    }

    #[test]
    fn already_compatible_reference_needs_no_adapter() {
        let mut t = TestUnit::make();
        let p = t.param("a", INT_TYPE_ID);
        let f = t.function("f", FunctionFlags::empty(), &[p], INT_TYPE_ID);
        let expected = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, false);
        let reference = t.reference(f, expected, None, None);
        assert!(!t.unit.needs_adapter(reference, expected, f));
    }

    #[test]
    fn unit_coercion_body_is_bare_call() {
        let mut t = TestUnit::make();
        let f = t.function("f", FunctionFlags::empty(), &[], INT_TYPE_ID);
        let expected = t.unit.types.add_function_type(&[], UNIT_TYPE_ID, false);
        let reference = t.reference(f, expected, None, None);

        assert!(t.unit.needs_adapter(reference, expected, f));

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let adapter_id = t.unit.exprs.get(result).as_function_literal().unwrap().function_id;
        let body = t.unit.functions.get(adapter_id).body.unwrap();
        let block = t.unit.exprs.get(body).as_block().unwrap();
        assert_eq!(block.stmts.len(), 1);
        let TypedStmt::Expr(stmt_expr) = t.unit.stmts.get(block.stmts[0]) else {
            panic!("expected an expression statement")
        };
        // The call result is discarded, not returned
        assert!(t.unit.exprs.get(*stmt_expr).as_call().is_some());
    }

    #[test]
    fn matching_arity_forwards_positionally() {
        let mut t = TestUnit::make();
        let p0 = t.param("a", INT_TYPE_ID);
        let p1 = t.param("b", BOOL_TYPE_ID);
        let f = t.function("f", FunctionFlags::empty(), &[p0, p1], INT_TYPE_ID);
        let expected =
            t.unit.types.add_function_type(&[INT_TYPE_ID, BOOL_TYPE_ID], INT_TYPE_ID, true);
        let reference = t.reference(f, expected, None, None);

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let adapter_id = t.unit.exprs.get(result).as_function_literal().unwrap().function_id;
        let call = t.adaptee_call(adapter_id).clone();
        assert_eq!(call.callee, Callee::Static(f));
        assert!(call.dispatch_receiver.is_none());
        assert!(call.extension_receiver.is_none());

        let adapter_params = t.unit.functions.get(adapter_id).params.clone();
        for (arg, param) in call.args.iter().zip_eq(adapter_params.iter()) {
            assert_eq!(t.arg_variable(arg), param.variable_id);
        }
    }

    #[test]
    fn vararg_whole_array_spread() {
        let mut t = TestUnit::make();
        let xs = t.vararg_param("xs", CHAR_TYPE_ID);
        let char_array = xs.type_id;
        let f = t.function("f", FunctionFlags::empty(), &[xs], INT_TYPE_ID);
        let expected = t.unit.types.add_function_type(&[char_array], INT_TYPE_ID, false);
        let reference = t.reference(f, expected, None, None);

        assert!(t.unit.needs_adapter(reference, expected, f));

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let adapter_id = t.unit.exprs.get(result).as_function_literal().unwrap().function_id;
        let call = t.adaptee_call(adapter_id).clone();
        assert_eq!(call.args.len(), 1);
        let vararg = call.args[0].as_vararg().expect("vararg argument");
        assert_eq!(vararg.elements.len(), 1);
        let VarargElement::SpreadArray(spread) = vararg.elements[0] else {
            panic!("whole-array match produces a spread element")
        };
        let adapter_param = &t.unit.functions.get(adapter_id).params[0];
        let TypedExpr::Variable(v) = t.unit.exprs.get(spread) else { panic!("variable") };
        assert_eq!(v.variable_id, adapter_param.variable_id);
    }

    #[test]
    fn vararg_element_spread() {
        let mut t = TestUnit::make();
        let xs = t.vararg_param("xs", CHAR_TYPE_ID);
        let f = t.function("f", FunctionFlags::empty(), &[xs], INT_TYPE_ID);
        let expected =
            t.unit.types.add_function_type(&[CHAR_TYPE_ID, CHAR_TYPE_ID], INT_TYPE_ID, false);
        let reference = t.reference(f, expected, None, None);

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let adapter_id = t.unit.exprs.get(result).as_function_literal().unwrap().function_id;
        let call = t.adaptee_call(adapter_id).clone();
        let vararg = call.args[0].as_vararg().expect("vararg argument");
        assert_eq!(vararg.elements.len(), 2);
        for element in &vararg.elements {
            assert!(matches!(element, VarargElement::Single(_)));
        }
    }

    #[test]
    fn vararg_no_match_passes_no_argument() {
        let mut t = TestUnit::make();
        let xs = t.vararg_param("xs", CHAR_TYPE_ID);
        let f = t.function("f", FunctionFlags::empty(), &[xs], INT_TYPE_ID);
        // Bool matches neither Char nor Array<Char>, so the vararg gets the
        // no-argument sentinel
        let expected = t.unit.types.add_function_type(&[BOOL_TYPE_ID], UNIT_TYPE_ID, false);
        let reference = t.reference(f, expected, None, None);

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let adapter_id = t.unit.exprs.get(result).as_function_literal().unwrap().function_id;
        let call = t.adaptee_call(adapter_id).clone();
        assert!(call.args[0].is_omitted());
    }

    #[test]
    fn defaulted_parameter_is_never_forwarded() {
        let mut t = TestUnit::make();
        let a = t.param("a", INT_TYPE_ID);
        let b = t.defaulted_param("b", INT_TYPE_ID);
        let f = t.function("f", FunctionFlags::empty(), &[a, b], INT_TYPE_ID);
        let expected = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, true);
        let reference = t.reference(f, expected, None, None);

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let adapter_id = t.unit.exprs.get(result).as_function_literal().unwrap().function_id;
        let call = t.adaptee_call(adapter_id).clone();
        assert_eq!(call.args.len(), 2);
        assert!(call.args[0].as_expr().is_some());
        assert!(call.args[1].is_omitted());
    }

    #[test]
    #[should_panic(expected = "internal compiler error")]
    fn double_bound_receiver_is_an_ice() {
        let mut t = TestUnit::make();
        let c = t.class("C", &[]);
        let c_type = t.unit.types.add_class_type(c, vec![]);
        let name = t.ident("f");
        let f = t.unit.add_function(
            name,
            FunctionKind::Plain,
            FunctionFlags::empty(),
            &[],
            INT_TYPE_ID,
            Some(c_type),
            Some(c_type),
            SpanId::NONE,
        );
        let expected = t.unit.types.add_function_type(&[], INT_TYPE_ID, true);
        let receiver = t.value_of(c_type);
        let reference = t.reference(f, expected, Some(receiver), None);
        let _ = t.unit.synthesize_for_callable_reference(reference, expected);
    }

    #[test]
    fn bound_dispatch_receiver_produces_adapted_block() {
        let mut t = TestUnit::make();
        let c = t.class("C", &[]);
        let c_type = t.unit.types.add_class_type(c, vec![]);
        let f = t.method("f", c_type, &[], INT_TYPE_ID);
        let expected = t.unit.types.add_function_type(&[], INT_TYPE_ID, true);
        let receiver = t.value_of(c_type);
        let reference = t.reference(f, expected, Some(receiver), None);

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let adapter_id = t.block_adapter(result);
        let adapter = t.unit.functions.get(adapter_id);
        // The bound value rides in a single extension receiver parameter
        assert_eq!(adapter.extension_receiver_type, Some(c_type));
        assert!(adapter.dispatch_receiver_type.is_none());

        // and is wired back to the side that was bound: dispatch
        let call = t.adaptee_call(adapter_id).clone();
        assert!(call.dispatch_receiver.is_some());
        assert!(call.extension_receiver.is_none());

        // The block's reference carries the bound value in its receiver slot
        let block = t.unit.exprs.get(result).as_block().unwrap().clone();
        let TypedStmt::Expr(ref_expr) = t.unit.stmts.get(block.stmts[1]) else {
            panic!("second statement is the reference")
        };
        let new_ref = t.unit.exprs.get(*ref_expr).expect_callable_reference();
        assert_eq!(new_ref.target, adapter_id);
        assert_eq!(new_ref.explicit_receiver, Some(receiver));
    }

    #[test]
    fn static_qualifier_first_parameter_stands_in_for_receiver() {
        let mut t = TestUnit::make();
        let c = t.class("C", &[]);
        let c_type = t.unit.types.add_class_type(c, vec![]);
        let x = t.param("x", INT_TYPE_ID);
        let f = t.method("f", c_type, &[x], INT_TYPE_ID);
        let expected =
            t.unit.types.add_function_type(&[c_type, INT_TYPE_ID], INT_TYPE_ID, true);
        let reference = t.reference(f, expected, None, Some(c));

        assert!(t.unit.needs_adapter(reference, expected, f));

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let adapter_id = t.unit.exprs.get(result).as_function_literal().unwrap().function_id;
        let adapter_params = t.unit.functions.get(adapter_id).params.clone();
        assert_eq!(adapter_params.len(), 2);

        let call = t.adaptee_call(adapter_id).clone();
        // First adapter parameter becomes the dispatch receiver
        let receiver = call.dispatch_receiver.expect("dispatch receiver wired");
        let TypedExpr::Variable(v) = t.unit.exprs.get(receiver) else { panic!("variable") };
        assert_eq!(v.variable_id, adapter_params[0].variable_id);
        // and ordinary consumption starts at the second
        assert_eq!(call.args.len(), 1);
        assert_eq!(t.arg_variable(&call.args[0]), adapter_params[1].variable_id);
    }

    #[test]
    fn arity_underflow_fails_and_releases_scope_stack() {
        let mut t = TestUnit::make();
        let a = t.param("a", INT_TYPE_ID);
        let b = t.param("b", INT_TYPE_ID);
        let f = t.function("f", FunctionFlags::empty(), &[a, b], INT_TYPE_ID);
        let expected = t.unit.types.add_function_type(&[], INT_TYPE_ID, true);
        let reference = t.reference(f, expected, None, None);

        let result = t.unit.synthesize_for_callable_reference(reference, expected);
        assert!(result.is_err());
        // The must-release invariant: construction failure still left scope
        assert_eq!(t.unit.scopes.decl_depth(), 0);
    }

    #[test]
    fn adaptee_flags_are_copied_onto_the_adapter() {
        let mut t = TestUnit::make();
        let p = t.param("a", INT_TYPE_ID);
        let flags = FunctionFlags::OPERATOR | FunctionFlags::INFIX;
        let f = t.function("f", flags, &[p], INT_TYPE_ID);
        let expected = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, true);
        let reference = t.reference(f, expected, None, None);

        let result = t.unit.synthesize_for_callable_reference(reference, expected).unwrap();
        let adapter_id = t.unit.exprs.get(result).as_function_literal().unwrap().function_id;
        let adapter = t.unit.functions.get(adapter_id);
        assert!(adapter.flags.contains(FunctionFlags::OPERATOR));
        assert!(adapter.flags.contains(FunctionFlags::INFIX));
        assert!(adapter.flags.contains(FunctionFlags::SUSPEND));
    }

    #[test]
    fn suspend_argument_conversion_via_builtin_invoke() {
        let mut t = TestUnit::make();
        let fn_type = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, false);
        let suspend_type = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, true);
        let argument = t.value_of(fn_type);

        let result = t.unit.synthesize_for_argument(argument, suspend_type).unwrap();
        assert_ne!(result, argument);
        let adapter_id = t.block_adapter(result);
        let adapter = t.unit.functions.get(adapter_id);
        assert!(adapter.is_suspend());
        assert_eq!(adapter.extension_receiver_type, Some(fn_type));
        assert_eq!(adapter.params.len(), 1);

        let call = t.adaptee_call(adapter_id).clone();
        assert_eq!(call.callee, Callee::BuiltinInvoke { functional_type: fn_type });
        assert!(call.dispatch_receiver.is_some());
        assert_eq!(call.args.len(), 1);
    }

    #[test]
    fn suspend_argument_conversion_via_class_invoke_member() {
        let mut t = TestUnit::make();
        let fn_type = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, false);
        let c = t.class("Action", &[]);
        let c_type = t.unit.types.add_class_type(c, vec![]);
        t.unit.types.classes.get_mut(c).supertypes.push(fn_type);
        let x = t.param("x", INT_TYPE_ID);
        let invoke_name = t.unit.idents.b.invoke;
        let invoke = t.unit.add_function(
            invoke_name,
            FunctionKind::Plain,
            FunctionFlags::OPERATOR,
            &[x],
            INT_TYPE_ID,
            Some(c_type),
            None,
            SpanId::NONE,
        );
        t.unit.types.classes.get_mut(c).functions.push(invoke);

        let suspend_type = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, true);
        let argument = t.value_of(c_type);

        let result = t.unit.synthesize_for_argument(argument, suspend_type).unwrap();
        assert_ne!(result, argument);
        let adapter_id = t.block_adapter(result);
        let call = t.adaptee_call(adapter_id).clone();
        assert_eq!(call.callee, Callee::Static(invoke));
    }

    #[test]
    fn argument_conversion_is_idempotent() {
        let mut t = TestUnit::make();
        let fn_type = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, false);
        let suspend_type = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, true);
        let argument = t.value_of(fn_type);

        let once = t.unit.synthesize_for_argument(argument, suspend_type).unwrap();
        assert_ne!(once, argument);
        let twice = t.unit.synthesize_for_argument(once, suspend_type).unwrap();
        assert_eq!(twice, once);
    }

    #[test]
    fn argument_without_invoke_member_is_left_unchanged() {
        let mut t = TestUnit::make();
        let suspend_type = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, true);
        let argument = t.value_of(INT_TYPE_ID);
        let result = t.unit.synthesize_for_argument(argument, suspend_type).unwrap();
        assert_eq!(result, argument);
    }

    #[test]
    fn non_suspend_expected_type_short_circuits() {
        let mut t = TestUnit::make();
        let fn_type = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, false);
        let argument = t.value_of(fn_type);
        let result = t.unit.synthesize_for_argument(argument, fn_type).unwrap();
        assert_eq!(result, argument);
    }

    #[test]
    fn driver_counts_adapted_and_unchanged_sites() {
        let mut t = TestUnit::make();
        let p = t.param("a", INT_TYPE_ID);
        let f = t.function("f", FunctionFlags::empty(), &[p], INT_TYPE_ID);
        let compatible = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, false);
        let suspend_type = t.unit.types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, true);
        let unchanged_ref = t.reference(f, compatible, None, None);
        let adapted_ref = t.reference(f, suspend_type, None, None);
        let fn_value = t.value_of(compatible);

        let sites = [
            ConversionSite::CallableReference {
                reference: unchanged_ref,
                expected_type: compatible,
            },
            ConversionSite::CallableReference {
                reference: adapted_ref,
                expected_type: suspend_type,
            },
            ConversionSite::SuspendArgument {
                argument: fn_value,
                expected_param_type: suspend_type,
            },
        ];
        let (stats, results) = run_adapter_lowering(&mut t.unit, &sites).unwrap();
        assert_eq!(stats, LowerStats { adapters_built: 2, sites_unchanged: 1 });
        assert_eq!(results[0], unchanged_ref);
        assert_ne!(results[1], adapted_ref);
        assert_ne!(results[2], fn_value);
    }
}
