use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- History Store Args ---
    /// Where the chat history snapshot lives (file, memory, redis)
    #[arg(long, env = "STORE_TYPE", default_value = "file")]
    pub store_type: String,

    /// Directory for the file store. Defaults to the platform data directory.
    #[arg(long, env = "STORE_DIR")]
    pub store_dir: Option<String>,

    /// Key the history snapshot is stored under.
    #[arg(long, env = "STORE_KEY", default_value = "chatHistory")]
    pub store_key: String,

    /// Redis URL used when --store-type=redis.
    #[arg(long, env = "STORE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub store_redis_url: String,

    /// Prefix for Redis snapshot keys.
    #[arg(long, env = "STORE_REDIS_PREFIX", default_value = "travel-chat:")]
    pub store_redis_prefix: String,

    /// Quiet period before a history change is written, in milliseconds.
    #[arg(long, env = "SAVE_DEBOUNCE_MS", default_value = "500")]
    pub save_debounce_ms: u64,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (openai, ollama, offline)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "openai")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider (required for OpenAI)
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-3.5-turbo, llama3)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    /// Sampling temperature sent with every request.
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub chat_temperature: f32,

    /// Maximum number of tokens in a reply.
    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "1000")]
    pub chat_max_tokens: u32,

    // --- General App Args ---
    /// Path to a JSON prompt configuration. Built-in prompts are used when unset.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    /// Print what a repair of the stored history would do, then exit.
    #[arg(long, default_value = "false")]
    pub repair: bool,

    /// Repair the stored history in place, then exit.
    #[arg(long, default_value = "false")]
    pub apply_repair: bool,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
