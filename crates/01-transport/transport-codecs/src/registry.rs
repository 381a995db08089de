use std::collections::HashMap;

use crate::{CodecError, CodecResult, Payload, PayloadKind};

/// Maps envelope type names to the payload kind used to decode them.
///
/// Built-in names are registered by [`TypeRegistry::builtin`]; callers may add
/// aliases for names an executor uses on the wire.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    kinds: HashMap<String, PayloadKind>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for kind in PayloadKind::ALL {
            registry.register(kind.type_name(), *kind);
        }
        registry
    }

    /// Registers `name`, replacing any previous mapping. Returns the replaced kind.
    pub fn register(&mut self, name: impl Into<String>, kind: PayloadKind) -> Option<PayloadKind> {
        self.kinds.insert(name.into(), kind)
    }

    pub fn lookup(&self, name: &str) -> Option<PayloadKind> {
        self.kinds.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    pub fn decode(&self, name: &str, bytes: &[u8]) -> CodecResult<Payload> {
        let kind = self
            .lookup(name)
            .ok_or_else(|| CodecError::UnknownType(name.to_owned()))?;
        Payload::decode(kind, bytes)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
