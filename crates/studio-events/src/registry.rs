//! Registry of event types accepted by the bus

use crate::error::EventError;
use crate::types::EventType;
use dashmap::DashSet;

/// Known event types: all built-in notifications plus registered custom names
#[derive(Debug, Default)]
pub struct TypeRegistry {
    custom: DashSet<String>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synthetic event type name
    pub fn register_custom(&self, name: impl Into<String>) -> Result<EventType, EventError> {
        let name = name.into();
        if name.is_empty() {
            return Err(EventError::UnknownEventType(name));
        }
        let event_type = EventType::from_name(&name);
        if !event_type.is_custom() {
            return Err(EventError::ReservedName(name));
        }
        if self.custom.insert(name.clone()) {
            tracing::debug!("Registered custom event type {}", name);
        }
        Ok(event_type)
    }

    /// Whether events of this type may be registered for or emitted
    #[must_use]
    pub fn is_known(&self, event_type: &EventType) -> bool {
        match event_type {
            EventType::Custom(name) => self.custom.contains(name),
            _ => true,
        }
    }

    /// Fail with `UnknownEventType` unless the type is known
    pub fn validate(&self, event_type: &EventType) -> Result<(), EventError> {
        if self.is_known(event_type) {
            Ok(())
        } else {
            Err(EventError::UnknownEventType(event_type.to_string()))
        }
    }

    /// Resolve a wire name into a known event type
    pub fn resolve(&self, name: &str) -> Result<EventType, EventError> {
        let event_type = EventType::from_name(name);
        self.validate(&event_type)?;
        Ok(event_type)
    }

    /// All known types, built-ins first
    #[must_use]
    pub fn known_types(&self) -> Vec<EventType> {
        let mut custom: Vec<String> = self.custom.iter().map(|n| n.key().clone()).collect();
        custom.sort();
        EventType::builtins()
            .into_iter()
            .chain(custom.into_iter().map(EventType::Custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_known() {
        let registry = TypeRegistry::new();
        assert!(registry.is_known(&EventType::SceneCreated));
        assert!(registry.validate(&EventType::ExitStarted).is_ok());
    }

    #[test]
    fn test_custom_requires_registration() {
        let registry = TypeRegistry::new();
        let chat = EventType::Custom("ChatBurst".into());
        assert!(!registry.is_known(&chat));
        assert_eq!(registry.register_custom("ChatBurst").unwrap(), chat);
        assert!(registry.is_known(&chat));
        assert_eq!(registry.resolve("ChatBurst").unwrap(), chat);
    }

    #[test]
    fn test_custom_cannot_shadow_builtin() {
        let registry = TypeRegistry::new();
        assert_eq!(
            registry.register_custom("SceneCreated").unwrap_err(),
            EventError::ReservedName("SceneCreated".into())
        );
    }

    #[test]
    fn test_known_types_lists_custom_after_builtins() {
        let registry = TypeRegistry::new();
        registry.register_custom("Zeta").unwrap();
        registry.register_custom("Alpha").unwrap();
        let known = registry.known_types();
        assert_eq!(known.len(), 14);
        assert_eq!(known[12], EventType::Custom("Alpha".into()));
        assert_eq!(known[13], EventType::Custom("Zeta".into()));
    }
}
