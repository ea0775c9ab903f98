// 转存目录与广告过滤策略

use crate::config::ConfigReader;
use crate::netdisk::types::{ExpirationClass, PanType};
use std::collections::HashSet;
use std::sync::Arc;

/// 各网盘的根目录表示
pub fn root_folder(pan_type: PanType) -> &'static str {
    match pan_type {
        PanType::Quark | PanType::Uc => "0",
        PanType::Baidu => "/",
        PanType::Aliyun => "root",
        PanType::Xunlei => "",
    }
}

/// 目录策略
///
/// 根据有效期类别决定转存目录，并提供广告关键词
#[derive(Clone)]
pub struct DirectoryPolicy {
    config: Arc<dyn ConfigReader>,
}

impl DirectoryPolicy {
    pub fn new(config: Arc<dyn ConfigReader>) -> Self {
        Self { config }
    }

    /// 解析转存目录
    ///
    /// 未配置时返回网盘根目录；百度目录统一为以 `/` 开头的绝对路径
    pub fn resolve_folder(&self, pan_type: PanType, class: ExpirationClass) -> String {
        let configured = self.config.get_non_empty(&pan_type.folder_key(class));

        match pan_type {
            PanType::Baidu => normalize_baidu_path(configured.as_deref().unwrap_or("/")),
            _ => match configured {
                Some(folder) if folder != "0" || root_folder(pan_type) == "0" => folder,
                _ => root_folder(pan_type).to_string(),
            },
        }
    }

    /// 广告关键词（小写），未单独配置时沿用夸克的关键词
    pub fn banned_words(&self, pan_type: PanType) -> Vec<String> {
        let raw = self
            .config
            .get_non_empty(&pan_type.banned_key())
            .or_else(|| self.config.get_non_empty(&PanType::Quark.banned_key()))
            .unwrap_or_default();
        parse_banned_list(&raw)
    }
}

/// 规范化百度路径
pub fn normalize_baidu_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// 解析逗号分隔的关键词列表
pub fn parse_banned_list(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// 文件名是否包含任一关键词（不区分大小写）
pub fn is_banned(name: &str, words: &[String]) -> bool {
    if words.is_empty() {
        return false;
    }
    let name = name.to_lowercase();
    words.iter().any(|w| name.contains(w.as_str()))
}

/// 按关键词拆分后的文件ID
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BannedSplit {
    /// 保留的文件ID
    pub kept: Vec<String>,
    /// 命中关键词的文件ID
    pub banned: Vec<String>,
}

impl BannedSplit {
    /// 所有文件都命中关键词
    pub fn all_banned(&self) -> bool {
        self.kept.is_empty() && !self.banned.is_empty()
    }
}

/// 按文件名拆分 `(id, name)` 列表
pub fn split_banned<'a, I>(entries: I, words: &[String]) -> BannedSplit
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut split = BannedSplit::default();
    for (id, name) in entries {
        if is_banned(name, words) {
            split.banned.push(id.to_string());
        } else {
            split.kept.push(id.to_string());
        }
    }
    split
}
