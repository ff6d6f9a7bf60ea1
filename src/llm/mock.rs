//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序返回预设回复；脚本用完后返回默认回复。可设置每次调用的延迟，用于测试超时降级。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message};

/// 脚本化的 Mock 客户端
#[derive(Debug)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    default_reply: Result<String, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl Default for MockLlmClient {
    /// 无脚本时一律失败，调用方走确定性降级
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: Err("mock llm: no scripted reply".to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定的回复
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        if let Ok(mut script) = client.script.lock() {
            script.extend(replies.into_iter().map(|r| Ok(r.into())));
        }
        client
    }

    /// 追加一条错误回复
    pub fn push_error(self, err: impl Into<String>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(err.into()));
        }
        self
    }

    /// 脚本耗尽后的回复
    pub fn default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Ok(reply.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .script
            .lock()
            .map_err(|e| format!("mock llm poisoned: {}", e))?
            .pop_front();
        next.unwrap_or_else(|| self.default_reply.clone())
    }
}
