//! ReAct执行器 - 负责执行有界的多轮工具调用循环

use anyhow::Result;
use rig::completion::{AssistantContent, Message, PromptError};

use super::providers::ProviderAgent;
use super::react::{ReActConfig, ReActResponse};

/// ReAct执行器
pub struct ReActExecutor;

impl ReActExecutor {
    /// 执行有界多轮循环
    ///
    /// 模型停止请求工具即为正常终态；达到迭代上限时不视为成功，提取对话
    /// 历史中的部分内容并带截断标记返回。
    pub async fn execute(
        agent: &ProviderAgent,
        user_prompt: &str,
        config: &ReActConfig,
    ) -> Result<ReActResponse> {
        if config.verbose {
            println!(
                "   ♻️ 激活多轮工具调用模式，最大迭代次数: {}",
                config.max_iterations
            );
        }

        match agent.multi_turn(user_prompt, config.max_iterations).await {
            Ok(response) => {
                if config.verbose {
                    println!("   ✅ 多轮分析任务完成");
                }

                Ok(ReActResponse::success(response, config.max_iterations))
            }
            Err(PromptError::MaxDepthError {
                max_depth,
                chat_history,
                prompt: _,
            }) => {
                if config.verbose {
                    println!("   ⚠️ 达到最大迭代次数 ({}), 触发中断", max_depth);
                }

                if config.return_partial_on_max_depth {
                    let (content, tool_calls) = Self::extract_partial_result(&chat_history);

                    Ok(ReActResponse::max_depth_reached(
                        format!(
                            "{}\n\n[注意: 因达到最大迭代次数({})而被中断]",
                            content, max_depth
                        ),
                        max_depth,
                        tool_calls,
                    ))
                } else {
                    Err(anyhow::anyhow!(
                        "多轮分析因达到最大迭代次数({})而未完成任务",
                        max_depth
                    ))
                }
            }
            Err(e) => {
                if config.verbose {
                    println!("   ❌ 多轮分析出错: {:?}", e);
                }
                Err(anyhow::anyhow!("多轮分析任务执行失败: {}", e))
            }
        }
    }

    /// 从聊天历史中提取部分结果与工具调用记录
    fn extract_partial_result(chat_history: &[Message]) -> (String, Vec<String>) {
        let mut tool_calls = Vec::new();

        // 最后一条有文本内容的助手消息即为可保留的部分结论
        let last_assistant_message = chat_history
            .iter()
            .rev()
            .find_map(|msg| {
                if let Message::Assistant { content, .. } = msg {
                    let text_content = content
                        .iter()
                        .filter_map(|c| {
                            if let AssistantContent::Text(text) = c {
                                Some(text.text.clone())
                            } else {
                                None
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("\n");

                    if !text_content.is_empty() {
                        Some(text_content)
                    } else {
                        None
                    }
                } else {
                    None
                }
            })
            .unwrap_or_else(|| "分析因达到最大迭代次数而被中断，未能获得完整响应。".to_string());

        for msg in chat_history {
            if let Message::Assistant { content, .. } = msg {
                for c in content.iter() {
                    if let AssistantContent::ToolCall(tool_call) = c {
                        tool_calls.push(format!(
                            "{}({})",
                            tool_call.function.name, tool_call.function.arguments
                        ));
                    }
                }
            }
        }

        (last_assistant_message, tool_calls)
    }
}
