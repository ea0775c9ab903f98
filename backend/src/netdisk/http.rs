// 网盘 HTTP 公共工具

use crate::netdisk::error::{NetdiskError, RetryPolicy};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 浏览器 User-Agent
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 单个 HTTP 请求超时（秒）
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// 错误信息中保留的响应体最大长度
const BODY_PREVIEW_LEN: usize = 200;

/// 创建 HTTP 客户端
///
/// Cookie 由各网盘实现通过请求头显式传递
pub fn build_client(user_agent: &str) -> Result<Client, NetdiskError> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| NetdiskError::Network(format!("创建HTTP客户端失败: {}", e)))
}

/// 读取响应体并反序列化
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, NetdiskError> {
    let body = response.text().await?;
    parse_json(&body)
}

/// 反序列化响应体，失败时附带截断后的原文
pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, NetdiskError> {
    serde_json::from_str(body)
        .map_err(|e| NetdiskError::Parse(format!("{}, body: {}", e, preview(body))))
}

/// 截断响应体用于日志
pub fn preview(body: &str) -> &str {
    match body.char_indices().nth(BODY_PREVIEW_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// 响应是否为 HTML 页面（安全验证页）
pub fn looks_like_html(body: &str) -> bool {
    body.contains("<html") || body.contains("<!DOCTYPE")
}

/// 提取分享链接中 `marker` 之后的分享标识
///
/// 去掉查询参数、锚点和末尾的斜杠
pub fn extract_share_key(share_url: &str, marker: &str) -> Result<String, NetdiskError> {
    let (_, rest) = share_url
        .split_once(marker)
        .ok_or_else(|| NetdiskError::InvalidShareUrl(share_url.to_string()))?;

    let key = rest
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/')
        .trim();

    if key.is_empty() {
        return Err(NetdiskError::InvalidShareUrl(share_url.to_string()));
    }
    Ok(key.to_string())
}

/// 当前毫秒时间戳
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 按策略重试可重试的错误
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, NetdiskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NetdiskError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.next_delay();
                warn!(
                    "{}失败，{}ms 后重试 ({}/{}): {}",
                    operation,
                    delay.as_millis(),
                    attempt,
                    max_attempts,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
