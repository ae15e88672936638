use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;
use vantage_core::ModuleOptions;

use crate::error::TaskError;
use crate::modules::{
    ClassDistributionModule, MetricsModule, MetricsPerFilterModule, Module, SupportedModule,
};

/// Builds a module instance from request options.
pub type ModuleFactory = Arc<dyn Fn(&ModuleOptions) -> Arc<dyn Module> + Send + Sync>;

/// A registered factory plus what is known about its modules up front.
pub struct RegisteredModule {
    factory: ModuleFactory,
    requires_pipeline: bool,
}

impl RegisteredModule {
    /// Build a module instance for `options`.
    pub fn build(&self, options: &ModuleOptions) -> Arc<dyn Module> {
        (self.factory)(options)
    }

    pub fn requires_pipeline(&self) -> bool {
        self.requires_pipeline
    }
}

/// Lookup table from module id to factory. Immutable once built.
pub struct ModuleRegistry {
    modules: HashMap<SupportedModule, RegisteredModule>,
}

impl ModuleRegistry {
    pub fn builder() -> ModuleRegistryBuilder {
        ModuleRegistryBuilder {
            modules: HashMap::new(),
        }
    }

    /// Registry holding every standard module.
    pub fn standard(ece_bins: usize) -> Self {
        Self::builder()
            .register(SupportedModule::Metrics, move |opts| {
                Arc::new(MetricsModule::new(opts.clone(), ece_bins))
            })
            .register(SupportedModule::MetricsPerFilter, move |opts| {
                Arc::new(MetricsPerFilterModule::new(opts.clone(), ece_bins))
            })
            .register(SupportedModule::ClassDistribution, |opts| {
                Arc::new(ClassDistributionModule::new(opts.clone()))
            })
            .build()
    }

    pub fn get(&self, module: SupportedModule) -> Result<&RegisteredModule, TaskError> {
        self.modules
            .get(&module)
            .ok_or_else(|| TaskError::UnknownModule(module.to_string()))
    }

    pub fn resolve(&self, module: SupportedModule) -> Result<ModuleFactory, TaskError> {
        self.get(module).map(|m| Arc::clone(&m.factory))
    }

    pub fn contains(&self, module: SupportedModule) -> bool {
        self.modules.contains_key(&module)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

pub struct ModuleRegistryBuilder {
    modules: HashMap<SupportedModule, RegisteredModule>,
}

impl ModuleRegistryBuilder {
    /// Register (or replace) the factory for a module id.
    ///
    /// The factory is called once here, with default options, to learn
    /// whether its modules need a pipeline index.
    pub fn register<F>(mut self, module: SupportedModule, factory: F) -> Self
    where
        F: Fn(&ModuleOptions) -> Arc<dyn Module> + Send + Sync + 'static,
    {
        let requires_pipeline = factory(&ModuleOptions::default()).requires_pipeline();
        self.modules.insert(
            module,
            RegisteredModule {
                factory: Arc::new(factory),
                requires_pipeline,
            },
        );
        self
    }

    pub fn build(self) -> ModuleRegistry {
        info!("Module registry built with {} modules", self.modules.len());
        ModuleRegistry {
            modules: self.modules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_module() {
        let registry = ModuleRegistry::standard(10);
        assert_eq!(registry.len(), SupportedModule::ALL.len());
        for m in SupportedModule::ALL {
            let factory = registry.resolve(m).unwrap();
            let module = factory(&ModuleOptions::for_pipeline(0));
            assert_eq!(module.name(), m.as_str());
        }
    }

    #[test]
    fn unregistered_module_is_unknown() {
        let registry = ModuleRegistry::builder()
            .register(SupportedModule::ClassDistribution, |opts| {
                Arc::new(ClassDistributionModule::new(opts.clone()))
            })
            .build();
        let err = registry.resolve(SupportedModule::Metrics).err().unwrap();
        assert_eq!(err, TaskError::UnknownModule("metrics".to_string()));
        assert!(!registry.contains(SupportedModule::Metrics));
    }

    #[test]
    fn pipeline_requirement_is_known_without_building() {
        let registry = ModuleRegistry::standard(10);
        assert!(registry.get(SupportedModule::Metrics).unwrap().requires_pipeline());
        assert!(registry.get(SupportedModule::MetricsPerFilter).unwrap().requires_pipeline());
        assert!(!registry.get(SupportedModule::ClassDistribution).unwrap().requires_pipeline());
    }

    #[test]
    fn factory_captures_options() {
        let registry = ModuleRegistry::standard(10);
        let opts = ModuleOptions::for_pipeline(2);
        let module = registry.resolve(SupportedModule::Metrics).unwrap()(&opts);
        assert_eq!(module.options(), &opts);
        assert!(module.requires_pipeline());
    }
}
