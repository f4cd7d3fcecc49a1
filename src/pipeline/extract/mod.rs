//! 提取阶段
//!
//! 把外部文档处理服务给出的分页原始文本转为结构化、带类别标注的提取结果。
//! 内容优先：所有字段的并集必须能还原源文本，遗漏内容视为缺陷。

use anyhow::{Result, bail};

use crate::pipeline::agent_ops;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::state::{
    DocumentExtraction, ExtractionPack, InputDocument, Page, WorkflowState,
};
use crate::prompts::StageId;
use crate::utils::threads::do_parallel_with_limit;

/// 执行提取阶段：逐文档并行提取，产出合并后的提取包
pub async fn run(ctx: &PipelineContext, state: WorkflowState) -> Result<WorkflowState> {
    println!(
        "🔄 开始提取阶段，共{}份文档...",
        state.input_documents.len()
    );

    if state.input_documents.is_empty() {
        bail!("没有任何输入文档，无法继续评估");
    }

    let system_prompt = agent_ops::resolve_stage_prompt(ctx, &state, StageId::Extract)?;

    let futures: Vec<_> = state
        .input_documents
        .iter()
        .map(|doc| extract_document(ctx, system_prompt, doc))
        .collect();
    let outcomes =
        do_parallel_with_limit(futures, ctx.config.workflow.max_parallels).await;

    let mut documents = Vec::new();
    let mut extraction_notes = Vec::new();
    for outcome in outcomes {
        let (doc, notes) = outcome?;
        println!("   ✅ 文档 {} 提取完成，共{}页", doc.filename, doc.pages.len());
        documents.push(doc);
        extraction_notes.extend(notes);
    }

    let pack = ExtractionPack {
        documents,
        extraction_notes,
    };
    println!(
        "✅ 提取阶段完成: {}页, {}个表格",
        pack.total_pages(),
        pack.total_tables()
    );

    let mut state = state;
    state.extraction = Some(pack);
    Ok(state)
}

/// 提取单份文档
///
/// 页数或表格行宽校验失败时带错误说明重试一次。重试后页数仍不符是致命的；
/// 表格仍不齐则交给归一化兜底并记录备注，尽力保留内容。
async fn extract_document(
    ctx: &PipelineContext,
    system_prompt: &str,
    doc: &InputDocument,
) -> Result<(DocumentExtraction, Vec<String>)> {
    let user_prompt = build_document_prompt(doc);

    let pages = ctx
        .invoker
        .extract_pages(ctx, system_prompt, &user_prompt)
        .await?;

    let pages = match retry_reason(&pages, doc.pages.len()) {
        None => pages,
        Some(problem) => {
            eprintln!(
                "   ⚠️ 文档 {} 提取结果校验失败({})，重试一次...",
                doc.filename, problem
            );
            let retry_prompt = format!(
                "{}\n\n**注意事项**上一次提取结果校验失败：{}。该文档共{}页，每一页必须恰好产出一个页面对象，页码从1开始连续编号，且每个表格的每一行宽度必须与列头数量一致。",
                user_prompt,
                problem,
                doc.pages.len()
            );
            let retried = ctx
                .invoker
                .extract_pages(ctx, system_prompt, &retry_prompt)
                .await?;
            if let Err(problem) = check_page_invariant(&retried, doc.pages.len()) {
                // 页数对不上意味着内容已经丢失，不允许继续
                bail!(
                    "文档 {} 提取结果经重试后页数仍不符({})，评估终止",
                    doc.filename,
                    problem
                );
            }
            retried
        }
    };

    let (pages, notes) = normalize_pages(&doc.filename, pages);
    Ok((
        DocumentExtraction {
            filename: doc.filename.clone(),
            pages,
        },
        notes,
    ))
}

fn build_document_prompt(doc: &InputDocument) -> String {
    let mut prompt = format!("文档名: {}\n总页数: {}\n\n", doc.filename, doc.pages.len());
    for (i, page_text) in doc.pages.iter().enumerate() {
        prompt.push_str(&format!("===== 第{}页 =====\n{}\n\n", i + 1, page_text));
    }
    prompt
}

/// 判断提取结果是否值得带错误说明重试一次
///
/// 页数不符与表格行宽不齐都给模型一次修正机会；只有重试后仍不齐的表格
/// 才进入归一化兜底。
fn retry_reason(pages: &[Page], expected: usize) -> Option<String> {
    if let Err(problem) = check_page_invariant(pages, expected) {
        return Some(problem);
    }
    ragged_tables_problem(pages)
}

/// 定位行宽与列头不一致的表格
fn ragged_tables_problem(pages: &[Page]) -> Option<String> {
    let mut spots = Vec::new();
    for page in pages {
        for (table_idx, table) in page.tables.iter().enumerate() {
            if table.is_ragged() {
                spots.push(format!("第{}页第{}个表格", page.page_number, table_idx + 1));
            }
        }
    }
    if spots.is_empty() {
        None
    } else {
        Some(format!("表格行宽与列头不一致: {}", spots.join("、")))
    }
}

/// 页数不变量：结果页数等于源页数，且页码从1开始连续
fn check_page_invariant(pages: &[Page], expected: usize) -> std::result::Result<(), String> {
    if pages.len() != expected {
        return Err(format!("期望{}页，实际{}页", expected, pages.len()));
    }
    for (i, page) in pages.iter().enumerate() {
        let expected_number = (i + 1) as u32;
        if page.page_number != expected_number {
            return Err(format!(
                "第{}个页面对象的页码为{}，期望{}",
                i + 1,
                page.page_number,
                expected_number
            ));
        }
    }
    Ok(())
}

/// 表格行宽归一化
///
/// 行宽与列头不一致时就地修正（短行补空、长行截断），并记录备注。信息
/// 不丢失：被截断的单元格内容会并入该行最后一个保留的单元格。
fn normalize_pages(filename: &str, pages: Vec<Page>) -> (Vec<Page>, Vec<String>) {
    let mut notes = Vec::new();
    let pages = pages
        .into_iter()
        .map(|mut page| {
            for (table_idx, table) in page.tables.iter_mut().enumerate() {
                if !table.is_ragged() {
                    continue;
                }
                let width = table.headers.len();
                for (row_idx, row) in table.rows.iter_mut().enumerate() {
                    if row.len() == width {
                        continue;
                    }
                    if row.len() < width {
                        row.resize(width, String::new());
                    } else if width > 0 {
                        let overflow = row.split_off(width);
                        let last = row.last_mut().unwrap();
                        for cell in overflow {
                            last.push_str("; ");
                            last.push_str(&cell);
                        }
                    } else {
                        // 无列头的表格行无法对齐，整行内容转入备注保留
                        let content = row.join("; ");
                        row.clear();
                        notes.push(format!(
                            "文档 {} 第{}页第{}个表格无列头，第{}行内容移入备注: {}",
                            filename,
                            page.page_number,
                            table_idx + 1,
                            row_idx + 1,
                            content
                        ));
                        continue;
                    }
                    notes.push(format!(
                        "文档 {} 第{}页第{}个表格第{}行宽度与列头不一致，已按列头宽度修正",
                        filename,
                        page.page_number,
                        table_idx + 1,
                        row_idx + 1
                    ));
                }
            }
            page
        })
        .collect();
    (pages, notes)
}
