use crate::config::{Config, LLMProvider};
use crate::i18n::TargetLanguage;
use crate::pipeline::state::InputDocument;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

/// ChemScope - 化工询单可行性评估引擎
#[derive(Parser, Debug)]
#[command(name = "chemscope-rs")]
#[command(
    about = "AI-based feasibility appraisal engine for chemical inquiries. It analyzes safety data sheets, measurement reports and inquiry documents, then composes a grounded feasibility report."
)]
#[command(version)]
pub struct Args {
    /// 输入目录，包含预提取的分页文档(.txt/.json)
    #[arg(short, long, default_value = ".")]
    pub input_path: PathBuf,

    /// 输出路径
    #[arg(short, long, default_value = "./chemscope.report")]
    pub output_path: PathBuf,

    /// 配置文件路径
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 询单名称
    #[arg(short, long)]
    pub name: Option<String>,

    /// 恢复指定会话而不是新建
    #[arg(long)]
    pub resume: Option<String>,

    /// 是否启用详细日志
    #[arg(short, long)]
    pub verbose: bool,

    /// 高能效模型，优先用于常规推理任务
    #[arg(long)]
    pub model_efficient: Option<String>,

    /// 高质量模型，用于复杂推理任务，以及作为efficient失效情况下的兜底
    #[arg(long)]
    pub model_powerful: Option<String>,

    /// LLM API基地址
    #[arg(long)]
    pub llm_api_base_url: Option<String>,

    /// LLM API KEY
    #[arg(long)]
    pub llm_api_key: Option<String>,

    /// 最大tokens数
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// 温度参数
    #[arg(long)]
    pub temperature: Option<f64>,

    /// 并行执行上限
    #[arg(long)]
    pub max_parallels: Option<usize>,

    /// LLM Provider (openai, moonshot, deepseek, anthropic, ollama)
    #[arg(long)]
    pub llm_provider: Option<String>,

    /// 报告语言 (zh, en, de)
    #[arg(long)]
    pub target_language: Option<String>,

    /// 是否禁用缓存
    #[arg(long)]
    pub no_cache: bool,

    /// 强制重新生成（跳过缓存读取）
    #[arg(long)]
    pub force_regenerate: bool,
}

impl Args {
    /// 将CLI参数转换为配置
    pub fn into_config(self) -> Config {
        let mut config = if let Some(config_path) = &self.config {
            // 如果显式指定了配置文件路径，从该路径加载
            Config::from_file(config_path).unwrap_or_else(|_| {
                panic!("⚠️ 警告: 无法读取配置文件 {:?}", config_path)
            })
        } else {
            // 如果没有显式指定配置文件，尝试从默认位置加载
            let default_config_path = std::env::current_dir()
                .unwrap_or_else(|_| std::path::PathBuf::from("."))
                .join("chemscope.toml");

            if default_config_path.exists() {
                Config::from_file(&default_config_path).unwrap_or_else(|_| {
                    panic!("⚠️ 警告: 无法读取默认配置文件 {:?}", default_config_path)
                })
            } else {
                Config::default()
            }
        };

        config.input_path = self.input_path.clone();
        config.output_path = self.output_path;
        config.internal_path = self.input_path.join(".chemscope");

        // 询单名称：CLI参数优先，配置文件次之，都没有时由get_inquiry_name()从目录名推断
        if let Some(name) = self.name {
            config.inquiry_name = Some(name);
        }

        // 覆盖LLM配置
        if let Some(provider_str) = self.llm_provider {
            if let Ok(provider) = provider_str.parse::<LLMProvider>() {
                config.llm.provider = provider;
            } else {
                eprintln!(
                    "⚠️ 警告: 未知的provider: {}，使用默认provider",
                    provider_str
                );
            }
        }
        if let Some(llm_api_base_url) = self.llm_api_base_url {
            config.llm.api_base_url = llm_api_base_url;
        }
        if let Some(llm_api_key) = self.llm_api_key {
            config.llm.api_key = llm_api_key;
        }
        if let Some(model_efficient) = self.model_efficient {
            config.llm.model_efficient = model_efficient;
        }
        if let Some(model_powerful) = self.model_powerful {
            config.llm.model_powerful = model_powerful;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.llm.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            config.llm.temperature = temperature;
        }
        if let Some(max_parallels) = self.max_parallels {
            config.workflow.max_parallels = max_parallels;
        }

        // 报告语言配置
        if let Some(target_language_str) = self.target_language {
            match TargetLanguage::from_code(&target_language_str) {
                Some(target_language) => config.target_language = target_language,
                None => eprintln!(
                    "⚠️ 警告: 不支持的报告语言: {}，使用默认语言(中文)",
                    target_language_str
                ),
            }
        }

        // 缓存配置
        if self.no_cache {
            config.cache.enabled = false;
        }

        config.force_regenerate = self.force_regenerate;
        config.verbose = self.verbose;

        config
    }
}

/// 读取输入目录下预提取的分页文档
///
/// 支持两种格式：.txt按换页符(U+000C)切分页面，无换页符时整个文件视为
/// 单页；.json为页面文本的字符串数组。其他扩展名忽略，文件名排序保证
/// 顺序稳定。
pub fn read_input_documents(input_path: &Path) -> Result<Vec<InputDocument>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(input_path)
        .with_context(|| format!("无法读取输入目录: {}", input_path.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    entries.sort();

    let mut documents = Vec::new();
    for path in entries {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        let filename = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let pages = match extension.as_str() {
            "txt" => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("无法读取文档: {}", path.display()))?;
                split_pages(&content)
            }
            "json" => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("无法读取文档: {}", path.display()))?;
                serde_json::from_str::<Vec<String>>(&content)
                    .with_context(|| format!("文档JSON格式不正确(应为页面文本数组): {}", path.display()))?
            }
            _ => continue,
        };

        if pages.iter().all(|p| p.trim().is_empty()) {
            eprintln!("⚠️ 跳过空文档: {}", filename);
            continue;
        }

        documents.push(InputDocument { filename, pages });
    }

    Ok(documents)
}

/// 按换页符切分文本；没有换页符时整体视为单页
fn split_pages(content: &str) -> Vec<String> {
    if content.contains('\u{000C}') {
        content
            .split('\u{000C}')
            .map(|page| page.trim().to_string())
            .filter(|page| !page.is_empty())
            .collect()
    } else {
        vec![content.trim().to_string()]
    }
}
