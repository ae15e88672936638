pub mod config;
pub mod dataset;
pub mod error;
pub mod filters;
pub mod options;

pub use config::Config;
pub use dataset::*;
pub use error::*;
pub use filters::*;
pub use options::*;
