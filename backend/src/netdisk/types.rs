// 网盘数据类型定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 网盘类型
///
/// 数值编码与资源库中的 `is_type` 字段一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanType {
    /// 夸克网盘
    Quark,
    /// 百度网盘
    Baidu,
    /// 阿里云盘
    Aliyun,
    /// UC网盘
    Uc,
    /// 迅雷云盘
    Xunlei,
}

impl PanType {
    /// 所有支持的网盘
    pub const ALL: [PanType; 5] = [
        PanType::Quark,
        PanType::Baidu,
        PanType::Aliyun,
        PanType::Uc,
        PanType::Xunlei,
    ];

    /// 数值编码
    pub fn code(&self) -> i32 {
        match self {
            PanType::Quark => 0,
            PanType::Baidu => 2,
            PanType::Aliyun => 3,
            PanType::Uc => 4,
            PanType::Xunlei => 5,
        }
    }

    /// 从数值编码创建
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PanType::Quark => "quark",
            PanType::Baidu => "baidu",
            PanType::Aliyun => "aliyun",
            PanType::Uc => "uc",
            PanType::Xunlei => "xunlei",
        }
    }

    /// 显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            PanType::Quark => "夸克网盘",
            PanType::Baidu => "百度网盘",
            PanType::Aliyun => "阿里云盘",
            PanType::Uc => "UC网盘",
            PanType::Xunlei => "迅雷云盘",
        }
    }

    /// 凭证配置键
    pub fn credential_key(&self) -> &'static str {
        match self {
            PanType::Quark => "quark_cookie",
            PanType::Baidu => "baidu_cookie",
            PanType::Aliyun => "Authorization",
            PanType::Uc => "uc_cookie",
            PanType::Xunlei => "xunlei_cookie",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            PanType::Quark => "quark",
            PanType::Baidu => "baidu",
            PanType::Aliyun => "ali",
            PanType::Uc => "uc",
            PanType::Xunlei => "xunlei",
        }
    }

    /// 转存目录配置键
    pub fn folder_key(&self, class: ExpirationClass) -> String {
        match class {
            ExpirationClass::Permanent => format!("{}_file", self.key_prefix()),
            ExpirationClass::Temporary => format!("{}_file_time", self.key_prefix()),
        }
    }

    /// 广告关键词配置键
    pub fn banned_key(&self) -> String {
        format!("{}_banned", self.key_prefix())
    }
}

impl fmt::Display for PanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i32>() {
            return Self::from_code(code).ok_or_else(|| format!("未知的网盘类型编码: {}", code));
        }
        match s.to_ascii_lowercase().as_str() {
            "quark" => Ok(PanType::Quark),
            "baidu" => Ok(PanType::Baidu),
            "aliyun" | "ali" => Ok(PanType::Aliyun),
            "uc" => Ok(PanType::Uc),
            "xunlei" => Ok(PanType::Xunlei),
            other => Err(format!("未知的网盘类型: {}", other)),
        }
    }
}

/// 分享有效期类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationClass {
    /// 永久
    #[default]
    Permanent,
    /// 临时（约两天）
    Temporary,
}

impl ExpirationClass {
    /// 从调用方的数值编码创建，只有 2 表示临时
    pub fn from_code(code: i32) -> Self {
        if code == 2 {
            ExpirationClass::Temporary
        } else {
            ExpirationClass::Permanent
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ExpirationClass::Permanent => 1,
            ExpirationClass::Temporary => 2,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, ExpirationClass::Temporary)
    }
}

/// 单次转存成功的回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// 分享标题
    pub title: String,
    /// 新分享链接
    pub share_url: String,
    /// 新分享提取码
    pub password: String,
    /// 网盘内文件ID（多个以逗号分隔）
    pub fid: String,
    /// 网盘原始有效期编码
    pub expired_type: i32,
}
