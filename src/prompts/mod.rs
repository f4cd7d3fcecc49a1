//! 版本化提示词注册表
//!
//! 以(阶段, 版本)为键的查找表。每个阶段可同时部署多个版本，支持回滚与A/B
//! 对照。"latest"解析为标记active的最高语义化版本；解析失败（未知阶段或
//! 版本）是致命错误，绝不静默回退到其他版本。静默回退会破坏"一次运行所用
//! 的提示词版本总能从审计记录得知"的可复现性保证。
//!
//! 提示词正文是配置而非编排逻辑，以模板文件形式随构建打包。

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::PromptPinning;

/// 流水线阶段标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageId {
    Extract,
    Plan,
    Analyze,
    Synthesize,
    Compose,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Extract => "extract",
            StageId::Plan => "plan",
            StageId::Analyze => "analyze",
            StageId::Synthesize => "synthesize",
            StageId::Compose => "compose",
        }
    }

    pub fn all() -> [StageId; 5] {
        [
            StageId::Extract,
            StageId::Plan,
            StageId::Analyze,
            StageId::Synthesize,
            StageId::Compose,
        ]
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 提示词模板及其元数据
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub stage: StageId,
    pub version: &'static str,
    /// 输出契约的结构版本，下游按此判断兼容性
    pub schema_version: u32,
    pub changelog: &'static str,
    /// 是否参与latest解析（历史版本保留可显式选择，但不再是默认）
    pub active: bool,
    /// 系统提示词正文
    pub text: &'static str,
}

/// 提示词注册表
pub struct PromptLibrary {
    templates: Vec<PromptTemplate>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptLibrary {
    /// 构建内置注册表
    pub fn builtin() -> Self {
        let templates = vec![
            PromptTemplate {
                stage: StageId::Extract,
                version: "1.0.0",
                schema_version: 1,
                changelog: "初始版本：按页提取正文与表格",
                active: false,
                text: include_str!("templates/extract_sys_v1_0_0.tpl"),
            },
            PromptTemplate {
                stage: StageId::Extract,
                version: "1.1.0",
                schema_version: 2,
                changelog: "增加键值对与列表片段提取，强调零信息损失与外来类别标注",
                active: true,
                text: include_str!("templates/extract_sys_v1_1_0.tpl"),
            },
            PromptTemplate {
                stage: StageId::Plan,
                version: "1.0.0",
                schema_version: 1,
                changelog: "初始版本：细化子分析任务描述",
                active: true,
                text: include_str!("templates/plan_sys_v1_0_0.tpl"),
            },
            PromptTemplate {
                stage: StageId::Analyze,
                version: "1.0.0",
                schema_version: 1,
                changelog: "初始版本：子分析通用系统提示词",
                active: true,
                text: include_str!("templates/analyze_sys_v1_0_0.tpl"),
            },
            PromptTemplate {
                stage: StageId::Synthesize,
                version: "1.0.0",
                schema_version: 1,
                changelog: "初始版本：风险汇总与可行性分级",
                active: false,
                text: include_str!("templates/synthesize_sys_v1_0_0.tpl"),
            },
            PromptTemplate {
                stage: StageId::Synthesize,
                version: "1.1.0",
                schema_version: 1,
                changelog: "要求显式列出覆盖缺口，缺失的分析本身就是风险因子",
                active: true,
                text: include_str!("templates/synthesize_sys_v1_1_0.tpl"),
            },
            PromptTemplate {
                stage: StageId::Compose,
                version: "1.0.0",
                schema_version: 1,
                changelog: "初始版本：可行性报告撰写",
                active: true,
                text: include_str!("templates/compose_sys_v1_0_0.tpl"),
            },
        ];
        Self { templates }
    }

    /// 解析指定阶段与版本请求，"latest"取active的最高语义化版本
    pub fn resolve(&self, stage: StageId, version: &str) -> Result<&PromptTemplate> {
        if version == "latest" {
            return self
                .templates
                .iter()
                .filter(|t| t.stage == stage && t.active)
                .max_by_key(|t| parse_semver(t.version))
                .ok_or_else(|| {
                    anyhow::anyhow!("阶段 {} 没有任何active提示词版本", stage.as_str())
                });
        }

        match self
            .templates
            .iter()
            .find(|t| t.stage == stage && t.version == version)
        {
            Some(template) => Ok(template),
            None => bail!(
                "阶段 {} 不存在提示词版本 {}（禁止静默回退）",
                stage.as_str(),
                version
            ),
        }
    }

    /// 在工作流启动时一次性解析所有阶段的版本固定
    ///
    /// 返回 阶段 → 具体版本号 的映射，调用方将其冻结进状态快照的审计记录；
    /// 运行中途即使配置变化也不会重新解析。
    pub fn resolve_all(&self, pinning: &PromptPinning) -> Result<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        for stage in StageId::all() {
            let requested = pinning
                .version_for(stage.as_str())
                .ok_or_else(|| anyhow::anyhow!("缺少阶段 {} 的版本固定配置", stage.as_str()))?;
            let template = self.resolve(stage, requested)?;
            resolved.insert(stage.as_str().to_string(), template.version.to_string());
        }
        Ok(resolved)
    }
}

/// 解析语义化版本号用于排序，非法格式排最低
fn parse_semver(version: &str) -> (u64, u64, u64) {
    let mut parts = version.split('.').map(|p| p.parse::<u64>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_latest() -> PromptPinning {
        PromptPinning {
            extract: "latest".to_string(),
            plan: "latest".to_string(),
            analyze: "latest".to_string(),
            synthesize: "latest".to_string(),
            compose: "latest".to_string(),
        }
    }

    #[test]
    fn test_latest_resolves_to_highest_active() {
        let library = PromptLibrary::builtin();
        let template = library.resolve(StageId::Extract, "latest").unwrap();
        assert_eq!(template.version, "1.1.0");
        assert!(template.active);

        let template = library.resolve(StageId::Synthesize, "latest").unwrap();
        assert_eq!(template.version, "1.1.0");
    }

    #[test]
    fn test_explicit_version_resolves_inactive() {
        // 历史版本可被显式固定（回滚场景），即便不再是latest
        let library = PromptLibrary::builtin();
        let template = library.resolve(StageId::Extract, "1.0.0").unwrap();
        assert_eq!(template.version, "1.0.0");
        assert!(!template.active);
    }

    #[test]
    fn test_unknown_version_is_hard_error() {
        let library = PromptLibrary::builtin();
        assert!(library.resolve(StageId::Plan, "9.9.9").is_err());
    }

    #[test]
    fn test_resolve_all_freezes_concrete_versions() {
        let library = PromptLibrary::builtin();
        let pinning = PromptPinning {
            extract: "1.0.0".to_string(),
            ..all_latest()
        };

        let resolved = library.resolve_all(&pinning).unwrap();
        // 显式固定与latest解析的结果都必须是具体版本号
        assert_eq!(resolved["extract"], "1.0.0");
        assert_eq!(resolved["plan"], "1.0.0");
        assert_eq!(resolved["synthesize"], "1.1.0");
        assert_eq!(resolved.len(), 5);
        assert!(!resolved.values().any(|v| v == "latest"));
    }

    #[test]
    fn test_resolve_all_fails_on_bad_pin() {
        let library = PromptLibrary::builtin();
        let pinning = PromptPinning {
            extract: "0.0.1".to_string(),
            ..all_latest()
        };
        assert!(library.resolve_all(&pinning).is_err());
    }

    #[test]
    fn test_distinct_pins_record_distinct_versions() {
        // 共享同一注册表的两次运行，固定不同版本得到不同审计记录
        let library = PromptLibrary::builtin();
        let base = all_latest();

        let run_a = library
            .resolve_all(&PromptPinning {
                extract: "1.0.0".to_string(),
                ..base.clone()
            })
            .unwrap();
        let run_b = library
            .resolve_all(&PromptPinning {
                extract: "1.1.0".to_string(),
                ..base
            })
            .unwrap();

        assert_eq!(run_a["extract"], "1.0.0");
        assert_eq!(run_b["extract"], "1.1.0");
        assert_ne!(run_a["extract"], run_b["extract"]);
    }

    #[test]
    fn test_semver_ordering() {
        assert!(parse_semver("1.10.0") > parse_semver("1.9.9"));
        assert!(parse_semver("2.0.0") > parse_semver("1.99.99"));
    }
}
