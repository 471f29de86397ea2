//! Configuration structs grouped by domain.
//!
//! Loaded from environment variables through the shared fallback logic in
//! `loader`.

use super::env_keys::{hitl, limits, llm, observability as obv_keys, paths, resilience};
use super::loader::{env_bool, env_optional, env_or, env_u64};

/// LLM proxy configuration: target address, internal auth key, default model.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub proxy_url: String,
    pub internal_api_key: String,
    pub model: String,
}

impl LlmConfig {
    /// Load from environment variables, falling back to defaults on empty
    /// values (loads `.env` first).
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            proxy_url: env_or(llm::PROXY_URL, llm::PROXY_URL_ALIASES, || {
                "http://localhost:8080/v1".to_string()
            }),
            internal_api_key: env_or(
                llm::INTERNAL_API_KEY,
                llm::INTERNAL_API_KEY_ALIASES,
                String::new,
            ),
            model: env_or(llm::MODEL, llm::MODEL_ALIASES, || "gpt-4o".to_string()),
        }
    }

    /// Load from environment variables, returning `None` if `internal_api_key`
    /// or `proxy_url` is empty.
    pub fn try_from_env() -> Option<Self> {
        let cfg = Self::from_env();
        if cfg.proxy_url.trim().is_empty() {
            None
        } else {
            Some(cfg)
        }
    }
}

/// Per-conversation resource limits (§4.C1).
#[derive(Debug, Clone)]
pub struct ConversationLimits {
    pub max_switches_per_conversation: u64,
    pub max_messages_per_conversation: u64,
}

impl ConversationLimits {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            max_switches_per_conversation: env_u64(
                limits::MAX_SWITCHES_PER_CONVERSATION,
                &[],
                50,
            ),
            max_messages_per_conversation: env_u64(
                limits::MAX_MESSAGES_PER_CONVERSATION,
                &[],
                1000,
            ),
        }
    }
}

/// Circuit breaker and retry tuning (§4.C14); defaults match §6's table.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub circuit_breaker_failure_threshold: u64,
    pub circuit_breaker_recovery_seconds: u64,
    pub retry_max_attempts: u64,
    pub retry_base_seconds: u64,
    pub retry_max_seconds: u64,
}

impl ResilienceConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            circuit_breaker_failure_threshold: env_u64(
                resilience::CIRCUIT_BREAKER_FAILURE_THRESHOLD,
                &[],
                5,
            ),
            circuit_breaker_recovery_seconds: env_u64(
                resilience::CIRCUIT_BREAKER_RECOVERY_SECONDS,
                &[],
                60,
            ),
            retry_max_attempts: env_u64(resilience::LLM_RETRY_MAX_ATTEMPTS, &[], 3),
            retry_base_seconds: env_u64(resilience::LLM_RETRY_BASE_SECONDS, &[], 2),
            retry_max_seconds: env_u64(resilience::LLM_RETRY_MAX_SECONDS, &[], 10),
        }
    }
}

/// Global on/off switch for the human-approval gate (§4.C4).
#[derive(Debug, Clone)]
pub struct HitlConfig {
    pub global_enabled: bool,
}

impl HitlConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            global_enabled: env_bool(hitl::HITL_GLOBAL_ENABLED, &[], true),
        }
    }
}

/// Root directory for persisted state (where the conversations/plans/approvals SQLite file lives).
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub data_dir: Option<String>,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            data_dir: env_optional(paths::AGENTFORGE_DATA_DIR, &[]),
        }
    }

    /// Resolve the effective data directory: explicit config wins, otherwise
    /// falls back to `~/.agentforge/data`.
    pub fn resolved_data_dir(&self) -> std::path::PathBuf {
        match &self.data_dir {
            Some(d) => std::path::PathBuf::from(d),
            None => dirs::home_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join(".agentforge")
                .join("data"),
        }
    }
}

/// Observability configuration: quiet, log_level, log_json, audit_log, security_events_log.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub audit_log: Option<String>,
    pub security_events_log: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            let quiet = env_bool(obv_keys::AGENTFORGE_QUIET, &[], false);
            let log_level = env_or(obv_keys::AGENTFORGE_LOG_LEVEL, &[], || {
                "agentforge=info".to_string()
            });
            let log_json = env_bool(obv_keys::AGENTFORGE_LOG_JSON, &[], false);
            let audit_log = env_optional(obv_keys::AGENTFORGE_AUDIT_LOG, &[]);
            let security_events_log = env_optional(obv_keys::AGENTFORGE_SECURITY_EVENTS_LOG, &[]);
            Self {
                quiet,
                log_level,
                log_json,
                audit_log,
                security_events_log,
            }
        })
    }
}

/// A snapshot of the whole execution core's configuration: loaded once from
/// environment variables and shared across the process.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub llm: LlmConfig,
    pub limits: ConversationLimits,
    pub resilience: ResilienceConfig,
    pub hitl: HitlConfig,
    pub paths: PathsConfig,
}

impl CoreConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        Self {
            llm: LlmConfig::from_env(),
            limits: ConversationLimits::from_env(),
            resilience: ResilienceConfig::from_env(),
            hitl: HitlConfig::from_env(),
            paths: PathsConfig::from_env(),
        }
    }
}
