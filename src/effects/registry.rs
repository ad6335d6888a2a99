use std::collections::HashMap;

use crate::{
    effects::{Brightness, Effect, EffectInfo, Mask, Negate, Pixelate, Saturation},
    error::{EffectError, Result},
};

type EffectFactory = Box<dyn Fn() -> Box<dyn Effect> + Send + Sync>;

/// Registry of effect types, keyed by class name.
///
/// Built-in effects are registered on construction; callers may add their own.
pub struct EffectRegistry {
    factories: HashMap<String, EffectFactory>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        let mut registry = Self { factories: HashMap::new() };
        registry.register_builtin_effects();
        registry
    }

    fn register_builtin_effects(&mut self) {
        self.register("Brightness", || Box::new(Brightness::default()));
        self.register("Mask", || Box::new(Mask::default()));
        self.register("Negate", || Box::new(Negate::new()));
        self.register("Pixelate", || Box::new(Pixelate::default()));
        self.register("Saturation", || Box::new(Saturation::default()));
    }

    /// Register (or replace) an effect type
    pub fn register<F>(&mut self, class_name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Effect> + Send + Sync + 'static,
    {
        self.factories.insert(class_name.to_string(), Box::new(factory));
    }

    /// A fresh instance with default parameters
    pub fn create(&self, class_name: &str) -> Result<Box<dyn Effect>> {
        self.factories
            .get(class_name)
            .map(|factory| factory())
            .ok_or_else(|| EffectError::NotFound { name: class_name.to_string() }.into())
    }

    /// Metadata of every registered effect, sorted by class name
    pub fn available(&self) -> Vec<EffectInfo> {
        let mut infos: Vec<EffectInfo> = self.factories.values().map(|factory| factory().info().clone()).collect();
        infos.sort_by(|a, b| a.class_name.cmp(&b.class_name));
        infos
    }

    pub fn has(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReelError;

    #[test]
    fn test_builtin_effects_available() {
        let registry = EffectRegistry::new();
        assert_eq!(registry.len(), 5);
        assert!(registry.has("Mask"));

        let names: Vec<String> = registry.available().into_iter().map(|i| i.class_name).collect();
        assert_eq!(names, vec!["Brightness", "Mask", "Negate", "Pixelate", "Saturation"]);
    }

    #[test]
    fn test_create() {
        let registry = EffectRegistry::new();
        let effect = registry.create("Negate").unwrap();
        assert_eq!(effect.info().name, "Negative");

        assert!(matches!(
            registry.create("Blur"),
            Err(ReelError::Effect(EffectError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = EffectRegistry::new();
        registry.register("Invert", || Box::new(Negate::new()));
        assert!(registry.has("Invert"));
        assert_eq!(registry.len(), 6);
    }
}
