//! Build-time scope of a single stack.
//!
//! Everything that crosses a stack boundary is an [`Exported`] value. The only
//! way for a consumer to read one is [`StackScope::import`], which records the
//! producer so the stage can check the consumer declared a dependency on it.

use std::collections::BTreeSet;

use keel_constructs::{Construct, Resource, Token};
use tracing::debug;

use crate::outputs::{export_name, OutputRecord};
use crate::stack::StackId;

/// A value published by one stack for use in others.
///
/// `T` is the consumer-side view: tokens inside it resolve through
/// cross-stack imports, never through the producer's internals.
#[derive(Debug, Clone, PartialEq)]
pub struct Exported<T> {
    producer: StackId,
    value: T,
}

impl<T> Exported<T> {
    pub(crate) fn new(producer: StackId, value: T) -> Self {
        Self { producer, value }
    }

    /// The stack that published the value.
    pub fn producer(&self) -> &StackId {
        &self.producer
    }

    pub(crate) fn value(&self) -> &T {
        &self.value
    }
}

/// Collects resources, exports and imports while a stack is being built.
#[derive(Debug)]
pub struct StackScope {
    id: StackId,
    resources: Vec<Resource>,
    exports: Vec<OutputRecord>,
    consumed: BTreeSet<StackId>,
}

impl StackScope {
    pub(crate) fn new(id: StackId) -> Self {
        Self {
            id,
            resources: Vec::new(),
            exports: Vec::new(),
            consumed: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &StackId {
        &self.id
    }

    /// Add every resource of `construct` to this stack.
    pub fn add_construct<C: Construct>(&mut self, construct: &C) {
        let resources = construct.resources();
        debug!(
            "Stack {} adds construct {} ({} resources)",
            self.id,
            construct.id(),
            resources.len()
        );
        self.resources.extend(resources);
    }

    /// Read a value published by another stack.
    pub fn import<T: Clone>(&mut self, exported: &Exported<T>) -> T {
        if exported.producer != self.id {
            self.consumed.insert(exported.producer.clone());
        }
        exported.value.clone()
    }

    /// Publish `value` under `key`. Consumers see it as a cross-stack import.
    pub fn export(
        &mut self,
        key: impl Into<String>,
        value: Token,
        description: impl Into<String>,
    ) -> Exported<Token> {
        let name = self.record(key.into(), value, description.into());
        Exported::new(self.id.clone(), Token::Import(name))
    }

    /// Publish a list of values as one comma-joined export.
    pub fn export_list(
        &mut self,
        key: impl Into<String>,
        values: Vec<Token>,
        description: impl Into<String>,
    ) -> Exported<Vec<Token>> {
        let name = self.record(key.into(), Token::join(",", values), description.into());
        Exported::new(self.id.clone(), vec![Token::ImportList(name)])
    }

    /// Publish a composite value built from this stack's exports.
    pub fn share<T>(&self, value: T) -> Exported<T> {
        Exported::new(self.id.clone(), value)
    }

    pub(crate) fn consumed(&self) -> &BTreeSet<StackId> {
        &self.consumed
    }

    pub(crate) fn into_parts(self) -> (Vec<Resource>, Vec<OutputRecord>) {
        (self.resources, self.exports)
    }

    fn record(&mut self, key: String, value: Token, description: String) -> String {
        let name = export_name(self.id.stage, &key);
        self.exports.push(OutputRecord {
            stack: self.id.clone(),
            key,
            export_name: name.clone(),
            value,
            description,
        });
        name
    }
}
