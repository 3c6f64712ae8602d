// Copyright (c) 2025 knix
// All rights reserved.

use std::fmt::{Display, Formatter, Write};
use std::num::NonZeroU32;

use fxhash::FxHashMap;

use crate::idents::{Ident, IdentPool};
use crate::lower::FunctionId;
use crate::nz_u32_id;
use crate::pool::Pool;

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
pub struct TypeId(u32);

impl TypeId {
    pub const PENDING: TypeId = TypeId(u32::MAX);

    pub fn to_u64(&self) -> u64 {
        self.0 as u64
    }
}

impl Display for TypeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_string())
    }
}

pub const UNIT_TYPE_ID: TypeId = TypeId(0);
pub const CHAR_TYPE_ID: TypeId = TypeId(1);
pub const BOOL_TYPE_ID: TypeId = TypeId(2);
pub const STRING_TYPE_ID: TypeId = TypeId(3);
pub const NEVER_TYPE_ID: TypeId = TypeId(4);
pub const INT_TYPE_ID: TypeId = TypeId(5);
pub const FLOAT_TYPE_ID: TypeId = TypeId(6);

nz_u32_id!(ClassId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variance {
    Invariant,
    Covariant,
    Contravariant,
}

impl Variance {
    pub fn keyword(&self) -> &'static str {
        match self {
            Variance::Invariant => "",
            Variance::Covariant => "out",
            Variance::Contravariant => "in",
        }
    }
}

/// One type argument as written at a use site. A bare type is distinct from
/// an invariant projection only syntactically; reflection collapses the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeArg {
    Star,
    Typed(TypeId),
    Projected(Variance, TypeId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayType {
    pub element_type: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassType {
    pub class_id: ClassId,
    pub type_args: Vec<TypeArg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeParamType {
    pub owner_class: ClassId,
    pub index: u32,
}

/// Functional interface type. `type_args` holds the parameter types in order
/// followed by the return type as the final element, so it is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub type_args: Vec<TypeId>,
    pub is_suspend: bool,
}

impl FunctionType {
    pub fn param_types(&self) -> &[TypeId] {
        &self.type_args[..self.type_args.len() - 1]
    }

    pub fn return_type(&self) -> TypeId {
        *self.type_args.last().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Unit,
    Char,
    Bool,
    String,
    Never,
    Int,
    Float,
    Array(ArrayType),
    Class(ClassType),
    TypeParameter(TypeParamType),
    Function(FunctionType),
}

impl Type {
    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn expect_function(&self) -> &FunctionType {
        self.as_function().expect("expected a functional type")
    }

    pub fn as_class(&self) -> Option<&ClassType> {
        match self {
            Type::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayType> {
        match self {
            Type::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// A class declaration as the lowering stage sees it: enough structure to
/// resolve supertypes, reflective type parameters, and `invoke` members.
#[derive(Debug, Clone)]
pub struct ClassDefn {
    pub name: Ident,
    pub type_params: Vec<Ident>,
    pub supertypes: Vec<TypeId>,
    pub functions: Vec<FunctionId>,
}

pub struct Types {
    types: Vec<Type>,
    existing_types_dedup: FxHashMap<Type, TypeId>,
    pub classes: Pool<ClassDefn, ClassId>,
}

impl Types {
    pub fn empty() -> Types {
        let mut types = Types {
            types: Vec::with_capacity(1024),
            existing_types_dedup: FxHashMap::default(),
            classes: Pool::with_capacity("classes", 64),
        };
        // Seed order must agree with the TypeId constants above
        let unit = types.add(Type::Unit);
        debug_assert!(unit == UNIT_TYPE_ID);
        types.add(Type::Char);
        types.add(Type::Bool);
        types.add(Type::String);
        types.add(Type::Never);
        types.add(Type::Int);
        let float = types.add(Type::Float);
        debug_assert!(float == FLOAT_TYPE_ID);
        types
    }

    /// Adds are hash-deduplicated, so TypeId equality is structural equality.
    /// The reflection layer and the vararg spread heuristic both rely on this.
    pub fn add(&mut self, typ: Type) -> TypeId {
        if let Some(existing) = self.existing_types_dedup.get(&typ) {
            return *existing;
        }
        let id = TypeId(self.types.len() as u32);
        self.types.push(typ.clone());
        self.existing_types_dedup.insert(typ, id);
        id
    }

    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn add_array_type(&mut self, element_type: TypeId) -> TypeId {
        self.add(Type::Array(ArrayType { element_type }))
    }

    pub fn add_function_type(
        &mut self,
        param_types: &[TypeId],
        return_type: TypeId,
        is_suspend: bool,
    ) -> TypeId {
        let mut type_args = Vec::with_capacity(param_types.len() + 1);
        type_args.extend_from_slice(param_types);
        type_args.push(return_type);
        self.add(Type::Function(FunctionType { type_args, is_suspend }))
    }

    pub fn add_class_type(&mut self, class_id: ClassId, type_args: Vec<TypeArg>) -> TypeId {
        self.add(Type::Class(ClassType { class_id, type_args }))
    }

    pub fn is_builtin_functional_type(&self, id: TypeId) -> bool {
        matches!(self.get(id), Type::Function(_))
    }

    pub fn is_suspend_functional_type(&self, id: TypeId) -> bool {
        match self.get(id) {
            Type::Function(f) => f.is_suspend,
            _ => false,
        }
    }

    /// Parameter types of a functional type, excluding the trailing return
    /// type argument. Panics on non-functional types; callers check first.
    pub fn function_param_types(&self, id: TypeId) -> &[TypeId] {
        self.get(id).expect_function().param_types()
    }

    pub fn function_return_type(&self, id: TypeId) -> TypeId {
        self.get(id).expect_function().return_type()
    }

    /// `suspend (A) -> R` to `(A) -> R`; identity for non-suspend types.
    pub fn to_non_suspend_functional_type(&mut self, id: TypeId) -> TypeId {
        let f = self.get(id).expect_function();
        if !f.is_suspend {
            return id;
        }
        let type_args = f.type_args.clone();
        self.add(Type::Function(FunctionType { type_args, is_suspend: false }))
    }

    /// Structural check against a functional interface type: either the type
    /// is that functional type itself, or it is a class that reaches it
    /// through its supertype chain.
    pub fn is_subtype_of_functional_type(&self, id: TypeId, functional: TypeId) -> bool {
        if id == functional {
            return true;
        }
        match self.get(id) {
            Type::Class(c) => {
                let defn = self.classes.get(c.class_id);
                defn.supertypes.iter().any(|s| self.is_subtype_of_functional_type(*s, functional))
            }
            _ => false,
        }
    }

    pub fn type_to_string(&self, id: TypeId, idents: &IdentPool) -> String {
        let mut s = String::new();
        self.write_type(&mut s, id, idents);
        s
    }

    fn write_type(&self, w: &mut String, id: TypeId, idents: &IdentPool) {
        match self.get(id) {
            Type::Unit => w.push_str("Unit"),
            Type::Char => w.push_str("Char"),
            Type::Bool => w.push_str("Bool"),
            Type::String => w.push_str("String"),
            Type::Never => w.push_str("Never"),
            Type::Int => w.push_str("Int"),
            Type::Float => w.push_str("Float"),
            Type::Array(a) => {
                w.push_str("Array<");
                self.write_type(w, a.element_type, idents);
                w.push('>');
            }
            Type::Class(c) => {
                w.push_str(idents.get_name(self.classes.get(c.class_id).name));
                if !c.type_args.is_empty() {
                    w.push('<');
                    for (i, arg) in c.type_args.iter().enumerate() {
                        if i != 0 {
                            w.push_str(", ");
                        }
                        match arg {
                            TypeArg::Star => w.push('*'),
                            TypeArg::Typed(t) => self.write_type(w, *t, idents),
                            TypeArg::Projected(variance, t) => {
                                if *variance != Variance::Invariant {
                                    write!(w, "{} ", variance.keyword()).unwrap();
                                }
                                self.write_type(w, *t, idents);
                            }
                        }
                    }
                    w.push('>');
                }
            }
            Type::TypeParameter(tp) => {
                let owner = self.classes.get(tp.owner_class);
                w.push_str(idents.get_name(owner.type_params[tp.index as usize]));
            }
            Type::Function(f) => {
                if f.is_suspend {
                    w.push_str("suspend ");
                }
                w.push('(');
                for (i, p) in f.param_types().iter().enumerate() {
                    if i != 0 {
                        w.push_str(", ");
                    }
                    self.write_type(w, *p, idents);
                }
                w.push_str(") -> ");
                self.write_type(w, f.return_type(), idents);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn adds_are_structurally_deduplicated() {
        let mut types = Types::empty();
        let a = types.add_array_type(CHAR_TYPE_ID);
        let b = types.add_array_type(CHAR_TYPE_ID);
        assert_eq!(a, b);
        let f1 = types.add_function_type(&[INT_TYPE_ID], UNIT_TYPE_ID, false);
        let f2 = types.add_function_type(&[INT_TYPE_ID], UNIT_TYPE_ID, true);
        assert_ne!(f1, f2);
    }

    #[test]
    fn non_suspend_counterpart_strips_only_the_flag() {
        let mut types = Types::empty();
        let suspend = types.add_function_type(&[INT_TYPE_ID], BOOL_TYPE_ID, true);
        let plain = types.to_non_suspend_functional_type(suspend);
        assert!(!types.is_suspend_functional_type(plain));
        assert_eq!(types.function_param_types(plain), &[INT_TYPE_ID]);
        assert_eq!(types.function_return_type(plain), BOOL_TYPE_ID);
        assert_eq!(types.to_non_suspend_functional_type(plain), plain);
    }

    #[test]
    fn functional_subtyping_walks_class_supertypes() {
        let mut types = Types::empty();
        let idents = &mut crate::idents::IdentPool::make();
        let fn_type = types.add_function_type(&[INT_TYPE_ID], INT_TYPE_ID, false);
        let base = types.classes.add(ClassDefn {
            name: idents.intern("Base"),
            type_params: vec![],
            supertypes: vec![fn_type],
            functions: vec![],
        });
        let base_type = types.add_class_type(base, vec![]);
        let derived = types.classes.add(ClassDefn {
            name: idents.intern("Derived"),
            type_params: vec![],
            supertypes: vec![base_type],
            functions: vec![],
        });
        let derived_type = types.add_class_type(derived, vec![]);
        assert!(types.is_subtype_of_functional_type(derived_type, fn_type));
        assert!(!types.is_subtype_of_functional_type(INT_TYPE_ID, fn_type));
    }

    #[test]
    fn rendering() {
        let mut types = Types::empty();
        let idents = &mut crate::idents::IdentPool::make();
        let chars = types.add_array_type(CHAR_TYPE_ID);
        let f = types.add_function_type(&[chars, BOOL_TYPE_ID], UNIT_TYPE_ID, true);
        assert_eq!(
            types.type_to_string(f, idents),
            "suspend (Array<Char>, Bool) -> Unit"
        );
    }
}
