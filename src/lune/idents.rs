// Copyright (c) 2025 knix
// All rights reserved.

use std::fmt::{Display, Formatter};

use string_interner::{Symbol, backend::StringBackend};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct Ident(string_interner::symbol::SymbolU32);

#[cfg(test)]
impl Ident {
    pub fn forged() -> Ident {
        Ident(string_interner::symbol::SymbolU32::try_from_usize(1).unwrap())
    }
}

impl Ord for Ident {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Ident {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Ident> for usize {
    fn from(value: Ident) -> Self {
        value.0.to_usize()
    }
}

impl Display for Ident {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_usize())
    }
}

/// Identifiers the lowering stage itself needs to name or recognize.
#[allow(non_snake_case)]
pub struct BuiltinIdents {
    pub invoke: Ident,
    pub receiver: Ident,
    pub self_: Ident,
}

pub struct IdentPool {
    pub b: BuiltinIdents,
    intern_pool: string_interner::StringInterner<StringBackend>,
}

impl IdentPool {
    pub fn make() -> IdentPool {
        let mut pool = string_interner::StringInterner::with_capacity(4096);
        let b = BuiltinIdents {
            invoke: Ident(pool.get_or_intern_static("invoke")),
            receiver: Ident(pool.get_or_intern_static("__receiver")),
            self_: Ident(pool.get_or_intern_static("self")),
        };
        IdentPool { b, intern_pool: pool }
    }

    pub fn intern(&mut self, s: impl AsRef<str>) -> Ident {
        Ident(self.intern_pool.get_or_intern(s))
    }

    pub fn get(&self, s: impl AsRef<str>) -> Option<Ident> {
        self.intern_pool.get(s).map(Ident)
    }

    pub fn get_name(&self, ident: Ident) -> &str {
        self.intern_pool.resolve(ident.0).expect("ident not interned in this pool")
    }
}
