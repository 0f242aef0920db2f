//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AGENTLOOP__*` 覆盖（双下划线表示嵌套，如 `AGENTLOOP__LLM__PROVIDER=openai`）。
//! API Key 只从环境变量读取（OPENAI_API_KEY / DEEPSEEK_API_KEY），不写入配置文件。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub checkpoint: CheckpointSection,
    pub web: WebSection,
}

/// [app] 段：应用名、默认会话
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 终端对话使用的会话 id
    #[serde(default = "default_session_id")]
    pub default_session_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            default_session_id: default_session_id(),
        }
    }
}

fn default_session_id() -> String {
    "default".to_string()
}

/// [llm] 段：后端选择、超时与重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：mock / openai / deepseek
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
    #[serde(default)]
    pub retry: LlmRetrySection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            timeouts: LlmTimeoutsSection::default(),
            retry: LlmRetrySection::default(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 一次模型步的总期限（秒），包含全部重试
    #[serde(default = "default_request_timeout")]
    pub request: u64,
    /// 单次尝试的超时（秒）
    #[serde(default = "default_attempt_timeout")]
    pub attempt: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
            attempt: default_attempt_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

fn default_attempt_timeout() -> u64 {
    20
}

/// [llm.retry] 段：仅对不可用 / 超时重试
#[derive(Debug, Clone, Deserialize)]
pub struct LlmRetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for LlmRetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    200
}

/// [agent] 段：控制循环
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 一轮对话内模型步 + 工具步的上限
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            system_prompt: None,
        }
    }
}

fn default_max_steps() -> usize {
    25
}

/// [tools] 段：工具超时、是否并行执行同一消息内的多个调用
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub parallel: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            parallel: false,
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [checkpoint] 段：后端选择与保留策略
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointSection {
    /// memory / file / sqlite
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    /// 内存后端每个会话保留的检查点数，0 表示不限
    #[serde(default)]
    pub max_per_thread: usize,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dir: default_checkpoint_dir(),
            sqlite_path: default_sqlite_path(),
            max_per_thread: 0,
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("data/checkpoints")
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/checkpoints.db")
}

/// [web] 段：HTTP 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct WebSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

/// 从 config 目录加载配置，环境变量 AGENTLOOP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AGENTLOOP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AGENTLOOP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
