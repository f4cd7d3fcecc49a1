use serde::{Deserialize, Serialize};

/// 报告目标语言
///
/// 化工询单来自不同地区，最终的可行性评估报告需要以客户指定的语言输出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TargetLanguage {
    #[serde(rename = "zh")]
    #[default]
    Chinese,
    #[serde(rename = "en")]
    English,
    #[serde(rename = "de")]
    German,
}

impl TargetLanguage {
    /// 从语言代码解析
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "zh" | "zh-cn" | "chinese" => Some(TargetLanguage::Chinese),
            "en" | "en-us" | "english" => Some(TargetLanguage::English),
            "de" | "de-de" | "german" => Some(TargetLanguage::German),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "zh",
            TargetLanguage::English => "en",
            TargetLanguage::German => "de",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "中文",
            TargetLanguage::English => "English",
            TargetLanguage::German => "Deutsch",
        }
    }

    /// 返回附加到系统提示词末尾的语言指令
    pub fn prompt_instruction(&self) -> &'static str {
        match self {
            TargetLanguage::Chinese => "请使用中文输出所有分析内容与报告正文。",
            TargetLanguage::English => {
                "Please write all analysis content and the report body in English."
            }
            TargetLanguage::German => {
                "Bitte verfassen Sie alle Analyseinhalte und den Berichtstext auf Deutsch."
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code() {
        assert_eq!(TargetLanguage::from_code("zh"), Some(TargetLanguage::Chinese));
        assert_eq!(TargetLanguage::from_code("EN"), Some(TargetLanguage::English));
        assert_eq!(TargetLanguage::from_code("de-DE"), Some(TargetLanguage::German));
        assert_eq!(TargetLanguage::from_code("fr"), None);
    }

    #[test]
    fn test_roundtrip_code() {
        for lang in [
            TargetLanguage::Chinese,
            TargetLanguage::English,
            TargetLanguage::German,
        ] {
            assert_eq!(TargetLanguage::from_code(lang.code()), Some(lang));
        }
    }
}
