//! the layer registry: a name-keyed map of nullary factories. `Net`
//! owns one, seeded with the built-in layer set at construction, so tests
//! and callers can register additional layer types before `compile`
//! without reaching for process-wide mutable state.

use std::collections::HashMap;

use crate::error::{GPError, GPResult};
use crate::layer::{activation, batchnorm, convolution, input, split, Layer};

pub type LayerFactory = fn() -> Box<dyn Layer>;

pub struct LayerRegistry {
    factories: HashMap<String, LayerFactory>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        let mut registry = LayerRegistry { factories: HashMap::new() };
        registry.register("Input", || Box::new(input::Input::new()));
        registry.register("Split", || Box::new(split::Split::new()));
        registry.register("BatchNormalization", || {
            Box::new(batchnorm::BatchNormalization::new())
        });
        registry.register("ReLU", || Box::new(activation::ReLU::new()));
        registry.register("Sigmoid", || Box::new(activation::Sigmoid::new()));
        registry.register("Convolution", || Box::new(convolution::Convolution::new()));
        registry
    }

    pub fn register(&mut self, type_name: &str, factory: LayerFactory) {
        self.factories.insert(type_name.to_string(), factory);
    }

    pub fn create(&self, type_name: &str) -> GPResult<Box<dyn Layer>> {
        self.factories
            .get(type_name)
            .map(|f| f())
            .ok_or_else(|| GPError::UnknownLayer(type_name.to_string()))
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        LayerRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_is_an_error() {
        let registry = LayerRegistry::new();
        assert!(matches!(registry.create("DoesNotExist"), Err(GPError::UnknownLayer(_))));
    }

    #[test]
    fn builtins_are_registered() {
        let registry = LayerRegistry::new();
        for name in ["Input", "Split", "BatchNormalization", "ReLU", "Sigmoid", "Convolution"] {
            assert!(registry.create(name).is_ok(), "{name} should be registered");
        }
    }
}
