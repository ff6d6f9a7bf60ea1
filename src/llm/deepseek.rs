//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek 客户端；model 为空时用 deepseek-chat
pub fn create_deepseek_client(model: Option<&str>, api_key: &str, base_url: Option<&str>) -> OpenAiClient {
    let model = model.unwrap_or(DEEPSEEK_CHAT);
    OpenAiClient::new(Some(base_url.unwrap_or(DEEPSEEK_BASE_URL)), model, api_key)
}
