use std::num::NonZeroU32;

/// A flat, append-only node pool addressed by a `NonZeroU32` id newtype.
/// Handles stay valid forever since entries are never removed or moved.
pub struct Pool<T, Index: Into<NonZeroU32> + From<NonZeroU32>> {
    vec: Vec<T>,
    name: &'static str,
    _index: std::marker::PhantomData<Index>,
}

impl<T, Index: Into<NonZeroU32> + From<NonZeroU32>> Pool<T, Index> {
    pub fn with_capacity(name: &'static str, capacity: usize) -> Pool<T, Index> {
        Pool { name, vec: Vec::with_capacity(capacity), _index: std::marker::PhantomData }
    }

    pub fn new(name: &'static str) -> Pool<T, Index> {
        Pool { name, vec: Vec::new(), _index: std::marker::PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The id the next call to `add` will return; used when a node needs to
    /// refer to itself, or when a child must be built before its owner.
    pub fn next_id(&self) -> Index {
        let index = NonZeroU32::new(self.vec.len() as u32 + 1).unwrap();
        Index::from(index)
    }

    pub fn len(&self) -> usize {
        self.vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vec.is_empty()
    }

    pub fn add(&mut self, t: T) -> Index {
        let index = self.next_id();
        self.vec.push(t);
        index
    }

    fn index_to_actual_index(index: Index) -> usize {
        let nz32: NonZeroU32 = index.into();
        nz32.get() as usize - 1
    }

    pub fn get(&self, index: Index) -> &T {
        let index = Self::index_to_actual_index(index);
        &self.vec[index]
    }

    pub fn get_mut(&mut self, index: Index) -> &mut T {
        let index = Self::index_to_actual_index(index);
        &mut self.vec[index]
    }

    pub fn iter(&self) -> std::slice::Iter<T> {
        self.vec.iter()
    }

    pub fn iter_with_ids(&self) -> impl Iterator<Item = (Index, &T)> {
        self.vec.iter().enumerate().map(|(i, t)| {
            let nz32 = NonZeroU32::new(i as u32 + 1).unwrap();
            (Index::from(nz32), t)
        })
    }
}
