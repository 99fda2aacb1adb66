//! Scoped symbol table for `LET` and fold variables.
//!
//! Bindings are pushed through a [`LetScope`] guard, which unbinds exactly the entries it pushed
//! when it goes out of scope, including on `?` early returns.

use std::ops::{Deref, DerefMut};

use formula_model::DataType;

#[derive(Debug, Clone, PartialEq)]
pub struct LetEntry<V> {
    pub name: String,
    pub data_type: Option<DataType>,
    /// Value or placeholder bound to the name, if the owner tracks one.
    pub value: Option<V>,
}

/// Stack of bindings; the innermost binding of a name shadows outer ones.
#[derive(Debug, Clone)]
pub struct LetDictionary<V> {
    entries: Vec<LetEntry<V>>,
}

impl<V> Default for LetDictionary<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> LetDictionary<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, data_type: Option<DataType>, value: Option<V>) {
        self.entries.push(LetEntry {
            name: name.into(),
            data_type,
            value,
        });
    }

    /// Removes the `count` most recent bindings, newest first.
    pub fn unbind(&mut self, count: usize) {
        debug_assert!(count <= self.entries.len(), "unbinding more names than bound");
        let keep = self.entries.len().saturating_sub(count);
        self.entries.truncate(keep);
    }

    pub fn get(&self, name: &str) -> Option<&LetEntry<V>> {
        self.entries.iter().rev().find(|e| e.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut LetEntry<V>> {
        self.entries.iter_mut().rev().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Anything that owns a [`LetDictionary`] and can open guarded scopes on it.
pub trait Scoped {
    type Value;

    fn let_dictionary(&mut self) -> &mut LetDictionary<Self::Value>;

    fn scope(&mut self) -> LetScope<'_, Self>
    where
        Self: Sized,
    {
        LetScope {
            owner: self,
            count: 0,
        }
    }
}

/// Guard over a [`Scoped`] owner. Dereferences to the owner so work can continue inside the scope.
pub struct LetScope<'a, T: Scoped> {
    owner: &'a mut T,
    count: usize,
}

impl<T: Scoped> LetScope<'_, T> {
    pub fn bind(&mut self, name: impl Into<String>, data_type: Option<DataType>, value: Option<T::Value>) {
        self.owner.let_dictionary().bind(name, data_type, value);
        self.count += 1;
    }

    /// Number of names this scope has bound so far.
    pub fn count(&self) -> usize {
        self.count
    }
}

impl<T: Scoped> Deref for LetScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.owner
    }
}

impl<T: Scoped> DerefMut for LetScope<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.owner
    }
}

impl<T: Scoped> Drop for LetScope<'_, T> {
    fn drop(&mut self) {
        let count = self.count;
        self.owner.let_dictionary().unbind(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Names {
        dict: LetDictionary<i64>,
    }

    impl Scoped for Names {
        type Value = i64;

        fn let_dictionary(&mut self) -> &mut LetDictionary<i64> {
            &mut self.dict
        }
    }

    fn bind_columns(names: &mut Names, columns: &[&str], fail_at: Option<usize>) -> Result<usize, String> {
        let mut scope = names.scope();
        for (i, col) in columns.iter().enumerate() {
            if Some(i) == fail_at {
                return Err(format!("column {col}"));
            }
            scope.bind(*col, Some(DataType::Numeric), Some(i as i64));
        }
        Ok(scope.dict.len())
    }

    #[test]
    fn scope_unbinds_exactly_what_it_bound() {
        let mut names = Names::default();
        names.dict.bind("outer", None, Some(-1));
        assert_eq!(bind_columns(&mut names, &["a", "b", "c"], None), Ok(4));
        assert_eq!(names.dict.len(), 1);
        assert_eq!(names.dict.get("outer").and_then(|e| e.value), Some(-1));
    }

    #[test]
    fn scope_unbinds_on_early_return() {
        let mut names = Names::default();
        assert!(bind_columns(&mut names, &["a", "b", "c"], Some(2)).is_err());
        assert!(names.dict.is_empty());
    }

    #[test]
    fn inner_bindings_shadow_outer_ones() {
        let mut names = Names::default();
        let mut outer = names.scope();
        outer.bind("x", None, Some(1));
        {
            let mut inner = outer.scope();
            inner.bind("x", None, Some(2));
            assert_eq!(inner.dict.get("x").and_then(|e| e.value), Some(2));
        }
        assert_eq!(outer.dict.get("x").and_then(|e| e.value), Some(1));
    }
}
