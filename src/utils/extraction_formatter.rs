//! 提取内容的提示词格式化
//!
//! 把结构化的提取结果渲染成LLM可读的Markdown文本。渲染是完整的：页面的
//! 每个字段都会出现在输出里，不做截断或概括。

use crate::pipeline::state::{ExtractionPack, Page, TableBlock};

/// 将整个提取包渲染为提示词文本
pub fn format_pack(pack: &ExtractionPack) -> String {
    let mut out = String::new();

    for doc in &pack.documents {
        out.push_str(&format!("# 文档: {}\n\n", doc.filename));
        for page in &doc.pages {
            out.push_str(&format_page(page));
            out.push('\n');
        }
    }

    if !pack.extraction_notes.is_empty() {
        out.push_str("# 提取备注\n\n");
        for note in &pack.extraction_notes {
            out.push_str(&format!("- {}\n", note));
        }
        out.push('\n');
    }

    out
}

/// 渲染单个页面
pub fn format_page(page: &Page) -> String {
    let mut out = format!("## 第{}页\n\n", page.page_number);

    if !page.headers.is_empty() {
        for header in &page.headers {
            out.push_str(&format!("### {}\n", header));
        }
        out.push('\n');
    }

    if !page.content_categories.is_empty() {
        let labels: Vec<&str> = page.content_categories.iter().map(|l| l.as_str()).collect();
        out.push_str(&format!("标签: {}\n\n", labels.join(", ")));
    }

    if !page.body_text.is_empty() {
        out.push_str(&page.body_text);
        out.push_str("\n\n");
    }

    for pair in &page.key_value_pairs {
        out.push_str(&format!("- **{}**: {}\n", pair.key, pair.value));
    }
    if !page.key_value_pairs.is_empty() {
        out.push('\n');
    }

    for list in &page.lists {
        if let Some(title) = &list.title {
            out.push_str(&format!("**{}**\n", title));
        }
        for item in &list.items {
            out.push_str(&format!("- {}\n", item));
        }
        out.push('\n');
    }

    for table in &page.tables {
        out.push_str(&format_table(table));
        out.push('\n');
    }

    out
}

/// 渲染Markdown表格
pub fn format_table(table: &TableBlock) -> String {
    let mut out = format!("（表格，类型: {}）\n\n", table.interpretation_hint.as_str());

    out.push_str(&format!("| {} |\n", table.headers.join(" | ")));
    out.push_str(&format!(
        "|{}\n",
        " --- |".repeat(table.headers.len().max(1))
    ));
    for row in &table.rows {
        out.push_str(&format!("| {} |\n", row.join(" | ")));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::{
        ContentLabel, DocumentExtraction, KeyValuePair, ListFragment,
    };

    fn sample_table() -> TableBlock {
        TableBlock {
            headers: vec!["物质".to_string(), "CAS号".to_string(), "含量".to_string()],
            rows: vec![vec![
                "二甲苯".to_string(),
                "1330-20-7".to_string(),
                "25-30%".to_string(),
            ]],
            interpretation_hint: ContentLabel::CompositionData,
        }
    }

    #[test]
    fn test_format_table_markdown() {
        let rendered = format_table(&sample_table());
        assert!(rendered.contains("| 物质 | CAS号 | 含量 |"));
        assert!(rendered.contains("| 二甲苯 | 1330-20-7 | 25-30% |"));
        assert!(rendered.contains("composition_data"));
    }

    #[test]
    fn test_format_page_includes_all_fields() {
        let page = Page {
            page_number: 3,
            headers: vec!["第9节 理化特性".to_string()],
            body_text: "闪点和粘度数据见下表。".to_string(),
            tables: vec![sample_table()],
            key_value_pairs: vec![KeyValuePair {
                key: "闪点".to_string(),
                value: "27°C".to_string(),
            }],
            lists: vec![ListFragment {
                title: Some("危险性说明".to_string()),
                items: vec!["H226 易燃液体和蒸气".to_string()],
            }],
            content_categories: vec![ContentLabel::Properties],
        };

        let rendered = format_page(&page);
        assert!(rendered.contains("## 第3页"));
        assert!(rendered.contains("第9节 理化特性"));
        assert!(rendered.contains("闪点和粘度数据见下表。"));
        assert!(rendered.contains("**闪点**: 27°C"));
        assert!(rendered.contains("H226"));
        assert!(rendered.contains("| 二甲苯 |"));
        assert!(rendered.contains("标签: properties"));
    }

    #[test]
    fn test_format_pack_with_notes() {
        let pack = ExtractionPack {
            documents: vec![DocumentExtraction {
                filename: "测量报告.pdf".to_string(),
                pages: vec![],
            }],
            extraction_notes: vec!["第2页表格第3行宽度已修正".to_string()],
        };

        let rendered = format_pack(&pack);
        assert!(rendered.contains("# 文档: 测量报告.pdf"));
        assert!(rendered.contains("# 提取备注"));
        assert!(rendered.contains("宽度已修正"));
    }
}
