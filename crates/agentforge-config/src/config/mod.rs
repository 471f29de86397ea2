//! AgentForge's unified configuration layer.
//!
//! All environment variable reads are centralized here; business code goes
//! through structured config instead of calling `std::env::var` directly.
//!
//! - `loader`: `env_or`, `env_optional`, `env_bool`, and friends.
//! - `schema`: `LlmConfig`, `ConversationLimits`, `ResilienceConfig`,
//!   `HitlConfig`, `PathsConfig`, `CoreConfig`.
//! - `env_keys`: key name constants (including legacy compat aliases).

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, env_u64, load_dotenv};
pub use schema::{
    ConversationLimits, CoreConfig, HitlConfig, LlmConfig, ObservabilityConfig, PathsConfig,
    ResilienceConfig,
};
