/// Token估算器，用于估算文本的token数量
///
/// 安全数据表与测量报告中中英文混排常见，按字符类别分别估算。
pub struct TokenEstimator {
    rules: TokenCalculationRules,
}

/// Token计算规则
#[derive(Debug, Clone)]
pub struct TokenCalculationRules {
    /// 英文字符的平均token比例（字符数/token数）
    pub english_char_per_token: f64,
    /// 中文字符的平均token比例
    pub chinese_char_per_token: f64,
    /// 基础token开销（系统prompt等）
    pub base_token_overhead: usize,
}

impl Default for TokenCalculationRules {
    fn default() -> Self {
        Self {
            // 基于GPT系列模型的经验值
            english_char_per_token: 4.0,
            chinese_char_per_token: 1.5,
            base_token_overhead: 50,
        }
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self {
            rules: TokenCalculationRules::default(),
        }
    }

    /// 估算文本的token数量
    pub fn estimate_tokens(&self, text: &str) -> usize {
        let character_count = text.chars().count();
        let chinese_char_count = text.chars().filter(|c| is_cjk_char(*c)).count();
        let english_char_count = text
            .chars()
            .filter(|c| {
                c.is_ascii_alphabetic()
                    || c.is_ascii_whitespace()
                    || c.is_ascii_digit()
                    || c.is_ascii_punctuation()
            })
            .count();
        let other_char_count = character_count - chinese_char_count - english_char_count;

        let chinese_tokens =
            (chinese_char_count as f64 / self.rules.chinese_char_per_token).ceil() as usize;
        let english_tokens =
            (english_char_count as f64 / self.rules.english_char_per_token).ceil() as usize;
        // 其他字符按英文规则计算
        let other_tokens =
            (other_char_count as f64 / self.rules.english_char_per_token).ceil() as usize;

        chinese_tokens + english_tokens + other_tokens + self.rules.base_token_overhead
    }
}

/// 判断是否为CJK字符
fn is_cjk_char(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF |  // CJK统一汉字
        0x3400..=0x4DBF |  // CJK扩展A
        0x20000..=0x2A6DF | // CJK扩展B
        0x2A700..=0x2B73F | // CJK扩展C
        0x2B740..=0x2B81F | // CJK扩展D
        0x2B820..=0x2CEAF | // CJK扩展E
        0x2CEB0..=0x2EBEF | // CJK扩展F
        0x30000..=0x3134F   // CJK扩展G
    )
}
