pub mod discovery;
pub mod error;
pub mod loader;
pub mod types;

pub use discovery::{discover, DiscoveryResult};
pub use error::ConfigError;
pub use loader::{expand_path, load, load_file};
pub use types::{RawConfig, TailConfig, DEFAULT_CHUNK_SIZE};
