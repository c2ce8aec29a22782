//! Named-field objects backing the `field-get` and `field-set` primitives.
//!
//! A layout is an immutable, append-only field list shared by every object
//! created from it, so layout identity is a valid inline-cache guard: a slot
//! index cached against a layout stays correct even after the object grows a
//! new field, because growing installs a new layout without moving existing
//! slots.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::runtime::value::Value;

#[derive(Debug)]
pub struct ObjectLayout {
    fields: Vec<Arc<str>>,
}

impl ObjectLayout {
    pub fn new(fields: Vec<Arc<str>>) -> Arc<ObjectLayout> {
        Arc::new(ObjectLayout { fields })
    }

    pub fn empty() -> Arc<ObjectLayout> {
        ObjectLayout::new(Vec::new())
    }

    pub fn index_of(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.as_ref() == field)
    }

    pub fn with_field(&self, field: &str) -> Arc<ObjectLayout> {
        let mut fields = self.fields.clone();
        fields.push(field.into());
        ObjectLayout::new(fields)
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

#[derive(Debug)]
struct ObjectState {
    layout: Arc<ObjectLayout>,
    slots: Vec<Value>,
}

#[derive(Debug)]
pub struct FixedObject {
    state: RwLock<ObjectState>,
}

impl FixedObject {
    pub fn new() -> Arc<FixedObject> {
        Arc::new(FixedObject {
            state: RwLock::new(ObjectState {
                layout: ObjectLayout::empty(),
                slots: Vec::new(),
            }),
        })
    }

    pub fn with_fields(pairs: &[(&str, Value)]) -> Arc<FixedObject> {
        let object = FixedObject::new();
        for (name, value) in pairs {
            object.set(name, value.clone());
        }
        object
    }

    pub fn layout(&self) -> Arc<ObjectLayout> {
        self.state.read().layout.clone()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        let state = self.state.read();
        state
            .layout
            .index_of(field)
            .map(|index| state.slots[index].clone())
    }

    /// Stores a field value, extending the layout when the field is new.
    pub fn set(&self, field: &str, value: Value) {
        let mut state = self.state.write();
        match state.layout.index_of(field) {
            Some(index) => state.slots[index] = value,
            None => {
                state.layout = state.layout.with_field(field);
                state.slots.push(value);
            }
        }
    }

    pub fn get_slot(&self, index: usize) -> Option<Value> {
        self.state.read().slots.get(index).cloned()
    }

    pub fn set_slot(&self, index: usize, value: Value) -> bool {
        let mut state = self.state.write();
        match state.slots.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}
