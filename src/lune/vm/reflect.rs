// Copyright (c) 2025 knix
// All rights reserved.

//! Lazy reflective views over resolved types. A `ReflectedType` wraps one
//! type node and computes its classifier and its type-argument projections on
//! first access; both are pure functions of the wrapped type, so the caches
//! are publish-once cells and never invalidated.

use std::cell::OnceCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::ice;
use crate::idents::IdentPool;
use crate::lower::types::{ClassId, Type, TypeArg, TypeId, Types, Variance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectedClassifier {
    Class(ClassId),
    TypeParameter { owner_class: ClassId, index: u32 },
}

#[derive(Debug, Clone)]
pub enum ReflectedTypeArg {
    /// Star projection; carries no type and no variance.
    Star,
    Projection { variance: Variance, ty: Rc<ReflectedType> },
}

impl ReflectedTypeArg {
    pub fn variance(&self) -> Option<Variance> {
        match self {
            ReflectedTypeArg::Star => None,
            ReflectedTypeArg::Projection { variance, .. } => Some(*variance),
        }
    }
}

#[derive(Debug)]
pub struct ReflectedType {
    type_id: TypeId,
    classifier: OnceCell<ReflectedClassifier>,
    arguments: OnceCell<Vec<ReflectedTypeArg>>,
}

impl ReflectedType {
    pub fn make(type_id: TypeId) -> ReflectedType {
        ReflectedType { type_id, classifier: OnceCell::new(), arguments: OnceCell::new() }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The class or type parameter this type resolves to, independent of its
    /// type arguments. Computed once; other classifier kinds are a compiler
    /// bug at this stage, not a user error.
    pub fn classifier(&self, types: &Types) -> ReflectedClassifier {
        if let Some(classifier) = self.classifier.get() {
            return *classifier;
        }
        let computed = match types.get(self.type_id) {
            Type::Class(c) => ReflectedClassifier::Class(c.class_id),
            Type::TypeParameter(tp) => {
                let owner = types.classes.get(tp.owner_class);
                if tp.index as usize >= owner.type_params.len() {
                    ice!(
                        "type parameter index {} out of range for class {}",
                        tp.index,
                        tp.owner_class
                    );
                }
                ReflectedClassifier::TypeParameter { owner_class: tp.owner_class, index: tp.index }
            }
            other => ice!("classifier is not reflectable: {:?}", other),
        };
        *self.classifier.get_or_init(|| computed)
    }

    /// Variance-tagged projections of the wrapped type's arguments, in
    /// declaration order. Only class types carry arguments; a bare argument
    /// reflects as invariant, a star argument as the star marker.
    pub fn arguments(&self, types: &Types) -> &[ReflectedTypeArg] {
        if let Some(arguments) = self.arguments.get() {
            return arguments;
        }
        let computed: Vec<ReflectedTypeArg> = match types.get(self.type_id) {
            Type::Class(c) => c
                .type_args
                .iter()
                .map(|arg| match arg {
                    TypeArg::Star => ReflectedTypeArg::Star,
                    TypeArg::Typed(t) => ReflectedTypeArg::Projection {
                        variance: Variance::Invariant,
                        ty: Rc::new(ReflectedType::make(*t)),
                    },
                    TypeArg::Projected(variance, t) => ReflectedTypeArg::Projection {
                        variance: *variance,
                        ty: Rc::new(ReflectedType::make(*t)),
                    },
                })
                .collect(),
            other => ice!("type arguments reflected on a non-class type: {:?}", other),
        };
        self.arguments.get_or_init(|| computed)
    }

    /// Canonical textual form of the wrapped type.
    pub fn render(&self, types: &Types, idents: &IdentPool) -> String {
        types.type_to_string(self.type_id, idents)
    }
}

/// Equality and hashing see only the wrapped type; whether the lazy views
/// have been computed yet is irrelevant, so populated and unpopulated proxies
/// over the same type are interchangeable.
impl PartialEq for ReflectedType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ReflectedType {}

impl Hash for ReflectedType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}
