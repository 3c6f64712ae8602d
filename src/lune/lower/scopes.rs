// Copyright (c) 2025 knix
// All rights reserved.

use std::fmt::Display;
use std::num::NonZeroU32;

use fxhash::FxHashMap;

use crate::idents::Ident;
use crate::lower::{FunctionId, VariableId};
use crate::nz_u32_id;
use crate::pool::Pool;

nz_u32_id!(ScopeId);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScopeType {
    Namespace,
    FunctionScope,
    LexicalBlock,
}

impl ScopeType {
    pub fn short_name(&self) -> &'static str {
        match self {
            ScopeType::Namespace => "ns",
            ScopeType::FunctionScope => "fn",
            ScopeType::LexicalBlock => "block",
        }
    }
}

impl Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

pub struct Scope {
    pub scope_type: ScopeType,
    pub parent: Option<ScopeId>,
    pub owner_function: Option<FunctionId>,
    variables: FxHashMap<Ident, VariableId>,
}

impl Scope {
    fn make(
        scope_type: ScopeType,
        parent: Option<ScopeId>,
        owner_function: Option<FunctionId>,
    ) -> Scope {
        Scope { scope_type, parent, owner_function, variables: FxHashMap::default() }
    }
}

pub struct Scopes {
    scopes: Pool<Scope, ScopeId>,
    /// Declarations currently under construction, innermost last. Every
    /// `enter_function` must be paired with a `leave_function` for the same
    /// id; construction code holds the exit in a scopeguard.
    decl_stack: Vec<FunctionId>,
}

impl Scopes {
    pub const ROOT_SCOPE_ID: ScopeId = ScopeId::ONE;

    pub fn make() -> Scopes {
        let mut scopes = Scopes { scopes: Pool::with_capacity("scopes", 256), decl_stack: Vec::new() };
        let root = scopes.scopes.add(Scope::make(ScopeType::Namespace, None, None));
        debug_assert!(root == Self::ROOT_SCOPE_ID);
        scopes
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        self.scopes.get(id)
    }

    pub fn add_child_scope(
        &mut self,
        parent: ScopeId,
        scope_type: ScopeType,
        owner_function: Option<FunctionId>,
    ) -> ScopeId {
        self.scopes.add(Scope::make(scope_type, Some(parent), owner_function))
    }

    pub fn add_variable(&mut self, scope_id: ScopeId, name: Ident, variable_id: VariableId) {
        self.scopes.get_mut(scope_id).variables.insert(name, variable_id);
    }

    pub fn find_variable(&self, scope_id: ScopeId, name: Ident) -> Option<VariableId> {
        let mut current = Some(scope_id);
        while let Some(id) = current {
            let scope = self.scopes.get(id);
            if let Some(v) = scope.variables.get(&name) {
                return Some(*v);
            }
            current = scope.parent;
        }
        None
    }

    pub fn enter_function(&mut self, function_id: FunctionId) {
        self.decl_stack.push(function_id);
    }

    pub fn leave_function(&mut self, function_id: FunctionId) {
        let top = self.decl_stack.pop();
        if top != Some(function_id) {
            panic!(
                "unbalanced scope stack: leaving function {} but innermost is {:?}",
                function_id, top
            )
        }
    }

    pub fn current_function(&self) -> Option<FunctionId> {
        self.decl_stack.last().copied()
    }

    pub fn decl_depth(&self) -> usize {
        self.decl_stack.len()
    }
}
