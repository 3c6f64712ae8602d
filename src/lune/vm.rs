pub mod reflect;


use std::rc::Rc;

use fxhash::FxHashMap;

use crate::lower::types::TypeId;
use reflect::ReflectedType;

/// Interpreter context for the lowered IR. Only the reflection surface lives
/// here; evaluation is driven elsewhere.
pub struct Vm {
    reflected_types: FxHashMap<TypeId, Rc<ReflectedType>>,
}

impl Vm {
    pub fn make() -> Vm {
        Vm { reflected_types: FxHashMap::default() }
    }

    /// One proxy per distinct type; repeated queries share the same cell so
    /// the lazily computed views are computed at most once per type.
    pub fn reflect_type(&mut self, type_id: TypeId) -> Rc<ReflectedType> {
        self.reflected_types
            .entry(type_id)
            .or_insert_with(|| Rc::new(ReflectedType::make(type_id)))
            .clone()
    }

    pub fn reflected_type_count(&self) -> usize {
        self.reflected_types.len()
    }
}
