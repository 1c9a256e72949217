//! Typed state variable slots and the schema machinery that flattens nested
//! schema declarations into fully-qualified names.
//!
//! Rust has no descriptor protocol to lazily clone a class-level declaration
//! into an instance attribute, so this module uses an explicit builder
//! instead: [`SchemaBuilder`] walks a schema at instance-construction time
//! and installs fresh per-instance [`StateSlot`]s keyed by fully-qualified
//! name. Accesses go through [`EntityInstance::get`]/[`EntityInstance::set`],
//! not a hidden proxy object.

use crate::value::{ChangeMap, StateValue};
use std::collections::HashMap;

/// Class-level description of one state variable.
#[derive(Debug, Clone)]
pub struct StateVarDescriptor {
    /// Fully-qualified, e.g. `"Google.scholar_info"`.
    pub name: String,
    /// Re-fire even when the new value equals the prior one.
    pub compare_on_write: bool,
    /// Never written to `Storage`, never included in a `saving_stream` table.
    pub memory_only: bool,
    pub default: StateValue,
}

impl StateVarDescriptor {
    pub fn new(name: impl Into<String>, default: StateValue) -> Self {
        StateVarDescriptor {
            name: name.into(),
            compare_on_write: true,
            memory_only: false,
            default,
        }
    }

    pub fn always_dirty(mut self) -> Self {
        self.compare_on_write = false;
        self
    }

    pub fn memory_only(mut self) -> Self {
        self.memory_only = true;
        self
    }
}

/// A schema is just a flat, ordered list of descriptors. Types that declare
/// state variables implement this trait; composition of nested schema types
/// happens inside `descriptors()` via [`SchemaBuilder::nested`].
pub trait StateSchema {
    fn descriptors() -> Vec<StateVarDescriptor>;
}

/// Builds a flattened descriptor list, prefixing nested schema names with
/// the dotted path to the point where they were nested. Nesting is purely
/// lexical: there is no runtime sub-object, only a longer dotted name.
#[derive(Default)]
pub struct SchemaBuilder {
    out: Vec<StateVarDescriptor>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        SchemaBuilder::default()
    }

    pub fn var(&mut self, descriptor: StateVarDescriptor) -> &mut Self {
        self.out.push(descriptor);
        self
    }

    /// Flatten a nested schema's descriptors under `prefix`, e.g.
    /// `nested::<ScholarInfo>("Google")` yields `Google.degree`, `Google.year`, ...
    pub fn nested<S: StateSchema>(&mut self, prefix: &str) -> &mut Self {
        for mut d in S::descriptors() {
            d.name = format!("{prefix}.{}", d.name);
            self.out.push(d);
        }
        self
    }

    pub fn build(&mut self) -> Vec<StateVarDescriptor> {
        std::mem::take(&mut self.out)
    }
}

/// A variable whose last dot-separated segment starts with `_` is private:
/// it is routed to the saving stream rather than the publishing stream on
/// commit (see `gs-broker`'s commit implementation).
pub fn is_private(fully_qualified_name: &str) -> bool {
    fully_qualified_name
        .rsplit('.')
        .next()
        .map(|last| last.starts_with('_'))
        .unwrap_or(false)
}

/// For `A.B.v` returns `Some("v")`; for a name with no dot returns `None`
/// (there is no shorter alias to expose).
pub fn short_alias(fully_qualified_name: &str) -> Option<&str> {
    if !fully_qualified_name.contains('.') {
        return None;
    }
    fully_qualified_name.rsplit('.').next()
}

struct StateSlot {
    value: StateValue,
    compare_on_write: bool,
    #[allow(dead_code)]
    memory_only: bool,
}

/// A live, per-primary-key instance: the flattened slots plus the dirty set
/// accumulated since the last commit.
pub struct EntityInstance {
    pk: Vec<u8>,
    slots: HashMap<String, StateSlot>,
    dirty: ChangeMap,
}

impl EntityInstance {
    pub fn new(pk: Vec<u8>, descriptors: Vec<StateVarDescriptor>) -> Self {
        let mut slots = HashMap::with_capacity(descriptors.len());
        for d in descriptors {
            slots.insert(
                d.name,
                StateSlot {
                    value: d.default,
                    compare_on_write: d.compare_on_write,
                    memory_only: d.memory_only,
                },
            );
        }
        EntityInstance {
            pk,
            slots,
            dirty: ChangeMap::new(),
        }
    }

    pub fn pk(&self) -> &[u8] {
        &self.pk
    }

    pub fn get(&self, name: &str) -> Option<&StateValue> {
        self.slots.get(name).map(|s| &s.value)
    }

    /// Set a slot's value. Marks the variable dirty unless `compare_on_write`
    /// is set and the new value equals the prior one.
    pub fn set(&mut self, name: &str, value: StateValue) {
        let Some(slot) = self.slots.get_mut(name) else {
            tracing::warn!(variable = name, "set on undeclared state variable ignored");
            return;
        };
        let changed = !slot.compare_on_write || slot.value != value;
        slot.value = value.clone();
        if changed {
            self.dirty.insert(name.to_string(), value);
        }
    }

    /// Force the current value into the dirty set regardless of
    /// `compare_on_write`.
    pub fn mark_changed(&mut self, name: &str) {
        if let Some(slot) = self.slots.get(name) {
            self.dirty.insert(name.to_string(), slot.value.clone());
        }
    }

    pub fn is_memory_only(&self, name: &str) -> bool {
        self.slots.get(name).map(|s| s.memory_only).unwrap_or(false)
    }

    /// Atomically snapshot and clear the dirty set. No suspension point may
    /// occur between the two halves of this call; callers must not `.await`
    /// while holding the snapshot before committing.
    pub fn drain_dirty(&mut self) -> ChangeMap {
        std::mem::take(&mut self.dirty)
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scholar;
    impl StateSchema for Scholar {
        fn descriptors() -> Vec<StateVarDescriptor> {
            let mut b = SchemaBuilder::new();
            b.var(StateVarDescriptor::new("degree", StateValue::Str(String::new())));
            b.build()
        }
    }

    struct Author;
    impl StateSchema for Author {
        fn descriptors() -> Vec<StateVarDescriptor> {
            let mut b = SchemaBuilder::new();
            b.var(StateVarDescriptor::new("name", StateValue::Str(String::new())));
            b.nested::<Scholar>("Google");
            b.build()
        }
    }

    #[test]
    fn nested_schema_flattens_to_dotted_names() {
        let names: Vec<_> = Author::descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["name", "Google.degree"]);
    }

    #[test]
    fn compare_on_write_dedups_equal_assignment() {
        let mut e = EntityInstance::new(b"u1".to_vec(), Author::descriptors());
        e.set("name", StateValue::from("Ada"));
        e.set("name", StateValue::from("Ada"));
        let dirty = e.drain_dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty.get("name"), Some(&StateValue::from("Ada")));
    }

    #[test]
    fn mark_changed_forces_dirty_without_reassignment() {
        let mut e = EntityInstance::new(b"u1".to_vec(), Author::descriptors());
        e.drain_dirty();
        e.mark_changed("name");
        assert!(e.is_dirty());
    }

    #[test]
    fn private_visibility_rule() {
        assert!(is_private("_private_v"));
        assert!(is_private("Outer._private_v"));
        assert!(!is_private("public_v"));
    }

    #[test]
    fn short_alias_of_fully_qualified_name() {
        assert_eq!(short_alias("Google.scholar_info"), Some("scholar_info"));
        assert_eq!(short_alias("name"), None);
    }
}
