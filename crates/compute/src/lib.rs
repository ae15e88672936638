pub mod api;
pub mod cache;
pub mod error;
pub mod key;
pub mod manager;
pub mod metrics;
pub mod modules;
pub mod registry;
pub mod types;

pub use cache::{CacheStats, CachedResult, KeyState, ResultCache, SharedResult};
pub use error::TaskError;
pub use key::ConfigKey;
pub use manager::TaskManager;
pub use metrics::TaskMetrics;
pub use modules::{Module, ModuleResponse, SupportedModule};
pub use registry::{ModuleFactory, ModuleRegistry, RegisteredModule};
pub use types::{ModuleResult, TaskManagerConfig};
