use std::env;

/// Process configuration, read once at startup. Every knob has a default so
/// a bare `cargo run` against local redis + ollama works out of the box.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub redis_url: String,
    pub llm: LlmConfig,
    pub geo: GeoConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API root, without the `/chat/completions` suffix.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct GeoConfig {
    /// Nominatim-shaped search endpoint.
    pub search_url: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// BRPOP timeout; bounds every shutdown check.
    pub pop_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            llm: LlmConfig {
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:11434/v1".to_string()),
                api_key: env::var("OPENAI_API_KEY").unwrap_or_else(|_| "ollama".to_string()),
                model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "mistral".to_string()),
            },
            geo: GeoConfig {
                search_url: env::var("GEOCODER_URL").unwrap_or_else(|_| {
                    "https://nominatim.openstreetmap.org/search".to_string()
                }),
                user_agent: env::var("GEOCODER_USER_AGENT")
                    .unwrap_or_else(|_| "ticketserver/0.9 (ops@ticketserver.local)".to_string()),
            },
            workers: WorkerConfig {
                concurrency: parse_env("WORKER_CONCURRENCY", 3),
                pop_timeout_secs: parse_env("QUEUE_POP_TIMEOUT_SECS", 5),
            },
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
