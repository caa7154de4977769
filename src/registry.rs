//! Module registry for creating modules from type tags.
//!
//! [`Rack::add_module`](crate::Rack::add_module) and
//! [`Rack::load_state`](crate::Rack::load_state) only know a module by its
//! type string. The registry turns that string into a fresh instance. Hosted
//! plugins plug in here too: register a factory that wraps the plugin in a
//! [`Module`] and it becomes patchable like any built-in.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::module::Module;
use crate::modules::{FeedbackDelay, Gain, Mixer, PolySine, Sine, SlewLimiter};

/// Function that constructs a module instance.
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn Module> + Send + Sync>;

/// Maps module type tags to factories.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the modules in [`crate::modules`].
    ///
    /// | tag | module |
    /// |-----|--------|
    /// | `sine` | [`Sine`] at 440 Hz |
    /// | `poly_sine` | [`PolySine`] |
    /// | `gain` | stereo [`Gain`] |
    /// | `mixer` | 4-way stereo [`Mixer`] |
    /// | `slew_limiter` | [`SlewLimiter`] |
    /// | `feedback_delay` | one-block [`FeedbackDelay`] |
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("sine", || Box::new(Sine::new(440.0)));
        registry.register("poly_sine", || Box::new(PolySine::new()));
        registry.register("gain", || Box::new(Gain::new(1.0)));
        registry.register("mixer", || Box::new(Mixer::stereo(4)));
        registry.register("slew_limiter", || Box::new(SlewLimiter::new(0.01)));
        registry.register("feedback_delay", || Box::new(FeedbackDelay::new(0.5)));
        registry
    }

    /// Register (or replace) a factory for `module_type`.
    pub fn register<F>(&mut self, module_type: &str, factory: F)
    where
        F: Fn() -> Box<dyn Module> + Send + Sync + 'static,
    {
        self.factories
            .insert(module_type.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, module_type: &str) -> bool {
        self.factories.contains_key(module_type)
    }

    /// Instantiate `module_type`, or `None` if it is not registered.
    pub fn create(&self, module_type: &str) -> Option<Box<dyn Module>> {
        self.factories.get(module_type).map(|factory| factory())
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).sorted().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let registry = ModuleRegistry::with_builtins();
        assert_eq!(
            registry.types(),
            vec![
                "feedback_delay",
                "gain",
                "mixer",
                "poly_sine",
                "sine",
                "slew_limiter"
            ]
        );
        let gain = registry.create("gain").unwrap();
        assert_eq!(gain.num_inputs(), 2);
        assert_eq!(gain.num_outputs(), 2);
    }

    #[test]
    fn unknown_type_creates_nothing() {
        let registry = ModuleRegistry::new();
        assert!(!registry.contains("sine"));
        assert!(registry.create("sine").is_none());
    }
}
