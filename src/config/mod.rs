use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::i18n::TargetLanguage;

/// LLM Provider类型
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub enum LLMProvider {
    #[serde(rename = "openai")]
    #[default]
    OpenAI,
    #[serde(rename = "moonshot")]
    Moonshot,
    #[serde(rename = "deepseek")]
    DeepSeek,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::Moonshot => write!(f, "moonshot"),
            LLMProvider::DeepSeek => write!(f, "deepseek"),
            LLMProvider::Anthropic => write!(f, "anthropic"),
            LLMProvider::Ollama => write!(f, "ollama"),
        }
    }
}

impl std::str::FromStr for LLMProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LLMProvider::OpenAI),
            "moonshot" => Ok(LLMProvider::Moonshot),
            "deepseek" => Ok(LLMProvider::DeepSeek),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "ollama" => Ok(LLMProvider::Ollama),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 询单名称（用于报告标题与会话标识，缺省时从输入目录推断）
    pub inquiry_name: Option<String>,

    /// 输入文档目录（已由外部文档处理服务转换为分页文本）
    pub input_path: PathBuf,

    /// 报告输出路径
    pub output_path: PathBuf,

    /// 内部工作目录路径 (.chemscope)
    pub internal_path: PathBuf,

    /// 报告目标语言
    pub target_language: TargetLanguage,

    /// LLM模型配置
    pub llm: LLMConfig,

    /// 缓存配置
    pub cache: CacheConfig,

    /// 工作流配置
    pub workflow: WorkflowConfig,

    /// 各阶段提示词版本固定
    pub prompts: PromptPinning,

    /// 强制重新生成（绕过LLM响应缓存）
    pub force_regenerate: bool,

    /// 是否启用详细日志
    pub verbose: bool,
}

/// LLM模型配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    /// LLM Provider类型
    pub provider: LLMProvider,

    /// LLM API KEY
    pub api_key: String,

    /// LLM API基地址
    pub api_base_url: String,

    /// 高能效模型，优先用于常规推理任务
    pub model_efficient: String,

    /// 高质量模型，优先用于复杂推理任务，以及作为efficient失效情况下的兜底
    pub model_powerful: String,

    /// 最大tokens
    pub max_tokens: u32,

    /// 温度（连续值0.0-1.0，对不接受温度参数的模型会被映射为离散推理档位）
    pub temperature: f64,

    /// 只接受离散推理档位、拒绝连续温度参数的模型名单
    pub discrete_effort_models: Vec<String>,

    /// 重试次数
    pub retry_attempts: u32,

    /// 重试间隔（毫秒）
    pub retry_delay_ms: u64,

    /// 超时时间（秒）
    pub timeout_seconds: u64,
}

/// 缓存配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// 是否启用缓存
    pub enabled: bool,

    /// 缓存目录
    pub cache_dir: PathBuf,

    /// 缓存过期时间（小时）
    pub expire_hours: u64,
}

/// 工作流配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WorkflowConfig {
    /// 子分析任务数量上限，规则产出超限时按合并策略收敛而非截断
    pub max_subagents: usize,

    /// 子分析任务数量下限
    pub min_subagents: usize,

    /// 单个子分析分支的工具调用轮次上限
    pub max_tool_rounds: usize,

    /// 单个子分析分支的墙钟超时（秒）
    pub branch_timeout_seconds: u64,

    /// 整个工作流的外层截止时间（秒），超出则标记失败并放弃在途分支
    pub run_deadline_seconds: u64,

    /// 并行子分析分支数上限
    pub max_parallels: usize,
}

/// 各阶段提示词版本固定
///
/// "latest"解析为该阶段标记为active的最高语义化版本；显式版本号用于回滚或
/// A/B对照。解析发生在工作流启动时，解析结果被冻结进状态快照的审计记录，
/// 运行中途不会重新解析。
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PromptPinning {
    pub extract: String,
    pub plan: String,
    pub analyze: String,
    pub synthesize: String,
    pub compose: String,
}

impl PromptPinning {
    /// 获取指定阶段的版本请求
    pub fn version_for(&self, stage: &str) -> Option<&str> {
        match stage {
            "extract" => Some(&self.extract),
            "plan" => Some(&self.plan),
            "analyze" => Some(&self.analyze),
            "synthesize" => Some(&self.synthesize),
            "compose" => Some(&self.compose),
            _ => None,
        }
    }
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 获取询单名称，优先使用配置值，否则从输入目录名推断
    pub fn get_inquiry_name(&self) -> String {
        if let Some(ref name) = self.inquiry_name
            && !name.trim().is_empty()
        {
            return name.clone();
        }

        self.input_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inquiry_name: None,
            input_path: PathBuf::from("."),
            output_path: PathBuf::from("./chemscope.report"),
            internal_path: PathBuf::from("./.chemscope"),
            target_language: TargetLanguage::default(),
            llm: LLMConfig::default(),
            cache: CacheConfig::default(),
            workflow: WorkflowConfig::default(),
            prompts: PromptPinning::default(),
            force_regenerate: false,
            verbose: false,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::default(),
            api_key: std::env::var("CHEMSCOPE_LLM_API_KEY").unwrap_or_default(),
            api_base_url: String::from("https://api-inference.modelscope.cn/v1"),
            model_efficient: String::from("Qwen/Qwen3-Next-80B-A3B-Instruct"),
            model_powerful: String::from("Qwen/Qwen3-235B-A22B-Instruct-2507"),
            max_tokens: 131072,
            temperature: 0.1,
            discrete_effort_models: vec![],
            retry_attempts: 3,
            retry_delay_ms: 5000,
            timeout_seconds: 300,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: PathBuf::from(".chemscope/cache"),
            expire_hours: 8760,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_subagents: 8,
            min_subagents: 3,
            max_tool_rounds: 5,
            branch_timeout_seconds: 600,
            run_deadline_seconds: 3600,
            max_parallels: 3,
        }
    }
}

impl Default for PromptPinning {
    fn default() -> Self {
        // 环境变量形如 CHEMSCOPE_PROMPT_EXTRACT=1.0.0，未设置时解析latest
        let from_env = |key: &str| std::env::var(key).unwrap_or_else(|_| "latest".to_string());
        Self {
            extract: from_env("CHEMSCOPE_PROMPT_EXTRACT"),
            plan: from_env("CHEMSCOPE_PROMPT_PLAN"),
            analyze: from_env("CHEMSCOPE_PROMPT_ANALYZE"),
            synthesize: from_env("CHEMSCOPE_PROMPT_SYNTHESIZE"),
            compose: from_env("CHEMSCOPE_PROMPT_COMPOSE"),
        }
    }
}
