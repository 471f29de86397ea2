//! Environment variable key constants and alias chains.
//!
//! Primary variables match the names the spec's configuration table uses
//! directly (`LLM_MODEL`, `MAX_SWITCHES_PER_CONVERSATION`, ...); a handful of
//! `AGENTFORGE_*` aliases are accepted as fallbacks.

/// LLM proxy configuration.
pub mod llm {
    pub const MODEL: &str = "LLM_MODEL";
    pub const MODEL_ALIASES: &[&str] = &["AGENTFORGE_MODEL", "OPENAI_MODEL"];

    pub const PROXY_URL: &str = "LLM_PROXY_URL";
    pub const PROXY_URL_ALIASES: &[&str] =
        &["AGENTFORGE_API_BASE", "OPENAI_API_BASE", "OPENAI_BASE_URL"];

    pub const INTERNAL_API_KEY: &str = "INTERNAL_API_KEY";
    pub const INTERNAL_API_KEY_ALIASES: &[&str] = &["AGENTFORGE_API_KEY", "OPENAI_API_KEY"];
}

/// Conversation and agent-switch limits.
pub mod limits {
    pub const MAX_SWITCHES_PER_CONVERSATION: &str = "MAX_SWITCHES_PER_CONVERSATION";
    pub const MAX_MESSAGES_PER_CONVERSATION: &str = "MAX_MESSAGES_PER_CONVERSATION";
}

/// Circuit breaker and retry tuning (§4.C14).
pub mod resilience {
    pub const CIRCUIT_BREAKER_FAILURE_THRESHOLD: &str = "CIRCUIT_BREAKER_FAILURE_THRESHOLD";
    pub const CIRCUIT_BREAKER_RECOVERY_SECONDS: &str = "CIRCUIT_BREAKER_RECOVERY_SECONDS";
    pub const LLM_RETRY_MAX_ATTEMPTS: &str = "LLM_RETRY_MAX_ATTEMPTS";
    pub const LLM_RETRY_BASE_SECONDS: &str = "LLM_RETRY_BASE_SECONDS";
    pub const LLM_RETRY_MAX_SECONDS: &str = "LLM_RETRY_MAX_SECONDS";
}

/// Human-in-the-loop policy.
pub mod hitl {
    pub const HITL_GLOBAL_ENABLED: &str = "HITL_GLOBAL_ENABLED";
}

/// Observability: tracing, audit log, security events.
pub mod observability {
    pub const AGENTFORGE_QUIET: &str = "AGENTFORGE_QUIET";
    pub const AGENTFORGE_LOG_LEVEL: &str = "AGENTFORGE_LOG_LEVEL";
    pub const AGENTFORGE_LOG_JSON: &str = "AGENTFORGE_LOG_JSON";
    pub const AGENTFORGE_AUDIT_LOG: &str = "AGENTFORGE_AUDIT_LOG";
    pub const AGENTFORGE_SECURITY_EVENTS_LOG: &str = "AGENTFORGE_SECURITY_EVENTS_LOG";
}

/// Data root for the SQLite-backed stores (conversations, plans, approvals).
pub mod paths {
    pub const AGENTFORGE_DATA_DIR: &str = "AGENTFORGE_DATA_DIR";
}
