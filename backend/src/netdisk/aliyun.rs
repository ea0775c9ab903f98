// 阿里云盘客户端实现

use crate::netdisk::error::NetdiskError;
use crate::netdisk::http::{build_client, extract_share_key, parse_json, preview, BROWSER_USER_AGENT};
use crate::netdisk::policy::split_banned;
use crate::netdisk::types::{ExpirationClass, PanType, TransferReceipt};
use crate::netdisk::{BackendContext, Netdisk};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

const ALIYUN_API_BASE: &str = "https://api.aliyundrive.com";

/// 固定分享提取码
const SHARE_PASSWORD: &str = "6666";

/// 临时分享有效天数
const TEMPORARY_DAYS: i64 = 2;

/// 刷新令牌失效的错误码
const REFRESH_TOKEN_ERRORS: [&str; 2] = ["RefreshTokenExpired", "InvalidParameter.RefreshToken"];

/// 分享过期时间，永久分享为空字符串
pub(crate) fn aliyun_expiration(class: ExpirationClass, now: DateTime<Utc>) -> String {
    match class {
        ExpirationClass::Permanent => String::new(),
        ExpirationClass::Temporary => (now + ChronoDuration::days(TEMPORARY_DAYS))
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

/// 根据过期时间得到有效期编码，0 为永久
pub(crate) fn aliyun_tier(expiration: &str) -> i32 {
    if expiration.is_empty() {
        0
    } else {
        2
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    default_drive_id: String,
}

/// 错误响应
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ShareTokenResponse {
    #[serde(default)]
    share_token: String,
}

/// 阿里云盘文件条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliyunFile {
    pub file_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    items: Vec<AliyunFile>,
}

#[derive(Debug, Deserialize)]
struct ShareLinkResponse {
    #[serde(default)]
    share_url: String,
    #[serde(default)]
    share_pwd: String,
    #[serde(default)]
    expiration: String,
}

/// 把非 200 响应转换为错误
fn status_error(status: StatusCode, body: &str) -> NetdiskError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    if REFRESH_TOKEN_ERRORS.contains(&parsed.code.as_str())
        || parsed.code.starts_with("AccessToken")
        || status == StatusCode::UNAUTHORIZED
    {
        return NetdiskError::CredentialExpired(format!(
            "阿里云盘令牌无效: {} {}",
            parsed.code, parsed.message
        ));
    }
    let message = if parsed.message.is_empty() {
        preview(body).to_string()
    } else {
        format!("{} {}", parsed.code, parsed.message)
    };
    NetdiskError::api(i64::from(status.as_u16()), message)
}

/// 阿里云盘客户端
pub struct AliyunClient {
    client: Client,
    refresh_token: String,
    access_token: String,
    drive_id: String,
    ctx: BackendContext,
}

impl AliyunClient {
    pub fn new(refresh_token: String, ctx: BackendContext) -> Result<Self, NetdiskError> {
        Ok(Self {
            client: build_client(BROWSER_USER_AGENT)?,
            refresh_token,
            access_token: String::new(),
            drive_id: String::new(),
            ctx,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        share_token: Option<&str>,
    ) -> Result<T, NetdiskError> {
        let mut request = self
            .client
            .post(format!("{}/{}", ALIYUN_API_BASE, path))
            .header(CONTENT_TYPE, "application/json")
            .json(body);
        if !self.access_token.is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", self.access_token));
        }
        if let Some(token) = share_token {
            request = request.header("X-Share-Token", token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if status != StatusCode::OK {
            return Err(status_error(status, &text));
        }
        if text.trim().is_empty() {
            return parse_json("null");
        }
        parse_json(&text)
    }

    /// 用刷新令牌换取访问令牌
    async fn refresh_access_token(&mut self) -> Result<(), NetdiskError> {
        let body = json!({ "refresh_token": self.refresh_token });
        let token: TokenResponse = self.post("token/refresh", &body, None).await?;
        if token.access_token.is_empty() {
            return Err(NetdiskError::CredentialExpired(
                "阿里云盘刷新令牌未返回access_token".to_string(),
            ));
        }

        self.access_token = token.access_token;
        if !token.refresh_token.is_empty() {
            self.refresh_token = token.refresh_token;
        }
        self.drive_id = token.default_drive_id;
        debug!("阿里云盘令牌已刷新: drive_id={}", self.drive_id);
        Ok(())
    }

    async fn get_share_token(&self, share_id: &str, password: &str) -> Result<String, NetdiskError> {
        let body = json!({ "share_id": share_id, "share_pwd": password });
        let resp: ShareTokenResponse = self
            .post("v2/share_link/get_share_token", &body, None)
            .await?;
        if resp.share_token.is_empty() {
            return Err(NetdiskError::Parse("未获取到share_token".to_string()));
        }
        Ok(resp.share_token)
    }

    async fn list_share_files(
        &self,
        share_id: &str,
        share_token: &str,
    ) -> Result<Vec<AliyunFile>, NetdiskError> {
        let body = json!({
            "share_id": share_id,
            "parent_file_id": "root",
            "limit": 100,
            "order_by": "name",
            "order_direction": "ASC",
        });
        let resp: FileListResponse = self
            .post("adrive/v3/file/list", &body, Some(share_token))
            .await?;
        Ok(resp.items)
    }

    async fn copy_files(
        &self,
        share_id: &str,
        share_token: &str,
        file_ids: &[String],
        to_parent: &str,
    ) -> Result<(), NetdiskError> {
        let body = json!({
            "share_id": share_id,
            "file_id_list": file_ids,
            "to_parent_file_id": to_parent,
            "to_drive_id": self.drive_id,
            "auto_rename": true,
        });
        let _: Value = self
            .post("adrive/v2/file/copy", &body, Some(share_token))
            .await?;
        Ok(())
    }

    /// 列出自己网盘中的目录
    pub async fn list_folder(&self, parent_file_id: &str) -> Result<Vec<AliyunFile>, NetdiskError> {
        let body = json!({
            "drive_id": self.drive_id,
            "parent_file_id": parent_file_id,
            "limit": 100,
            "order_by": "name",
            "order_direction": "ASC",
        });
        let resp: FileListResponse = self.post("adrive/v3/file/list", &body, None).await?;
        Ok(resp.items)
    }

    async fn trash(&self, file_id: &str) -> Result<(), NetdiskError> {
        let body = json!({ "drive_id": self.drive_id, "file_id": file_id });
        let _: Value = self.post("v2/recyclebin/trash", &body, None).await?;
        Ok(())
    }

    async fn create_share(
        &self,
        file_ids: &[String],
        expiration: &str,
    ) -> Result<ShareLinkResponse, NetdiskError> {
        let body = json!({
            "drive_id": self.drive_id,
            "file_id_list": file_ids,
            "share_pwd": SHARE_PASSWORD,
            "expiration": expiration,
        });
        let resp: ShareLinkResponse = self
            .post("adrive/v2/share_link/create", &body, None)
            .await?;
        if resp.share_url.is_empty() {
            return Err(NetdiskError::Parse("创建分享未返回链接".to_string()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Netdisk for AliyunClient {
    fn pan_type(&self) -> PanType {
        PanType::Aliyun
    }

    fn is_configured(&mut self) -> bool {
        self.ctx.refresh_credential(PanType::Aliyun, &mut self.refresh_token)
    }

    async fn transfer(
        &mut self,
        share_url: &str,
        password: &str,
        class: ExpirationClass,
    ) -> Result<TransferReceipt, NetdiskError> {
        info!("开始阿里云盘转存: {}", share_url);

        self.refresh_access_token().await?;
        let share_id = extract_share_key(share_url, "/s/")?;
        let share_token = self.get_share_token(&share_id, password).await?;

        let files = self.list_share_files(&share_id, &share_token).await?;
        if files.is_empty() {
            return Err(NetdiskError::EmptyShare);
        }
        let title = files[0].name.clone();
        let file_ids: Vec<String> = files.iter().map(|f| f.file_id.clone()).collect();

        let folder = self.ctx.policy.resolve_folder(PanType::Aliyun, class);
        self.copy_files(&share_id, &share_token, &file_ids, &folder)
            .await?;

        let names: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();
        let copied: Vec<AliyunFile> = self
            .list_folder(&folder)
            .await?
            .into_iter()
            .filter(|f| names.contains(f.name.as_str()))
            .collect();

        let words = self.ctx.policy.banned_words(PanType::Aliyun);
        let split = split_banned(
            copied.iter().map(|f| (f.file_id.as_str(), f.name.as_str())),
            &words,
        );
        for file_id in &split.banned {
            if let Err(e) = self.trash(file_id).await {
                warn!("删除广告文件失败: file_id={}, 错误: {}", file_id, e);
            }
        }
        if split.kept.is_empty() {
            return Err(NetdiskError::EmptyShare);
        }

        let expiration = aliyun_expiration(class, Utc::now());
        let share = self.create_share(&split.kept, &expiration).await?;
        let expired_type = aliyun_tier(if share.expiration.is_empty() {
            &expiration
        } else {
            &share.expiration
        });
        info!("阿里云盘转存成功: {}", share.share_url);

        Ok(TransferReceipt {
            title,
            share_url: share.share_url,
            password: if share.share_pwd.is_empty() {
                SHARE_PASSWORD.to_string()
            } else {
                share.share_pwd
            },
            fid: split.kept.join(","),
            expired_type,
        })
    }

    async fn test_connection(&mut self) -> Result<(), NetdiskError> {
        self.refresh_access_token().await
    }

    async fn delete_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        self.refresh_access_token().await?;
        let name = path.trim_matches('/');
        let target = self
            .list_folder("root")
            .await?
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| NetdiskError::DirectoryNotFound(name.to_string()))?;

        self.trash(&target.file_id).await?;
        info!("阿里云盘目录已删除: {}", name);
        Ok(())
    }

    async fn create_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        self.refresh_access_token().await?;
        let name = path.trim_matches('/');
        let body = json!({
            "drive_id": self.drive_id,
            "parent_file_id": "root",
            "name": name,
            "type": "folder",
            "check_name_mode": "refuse",
        });
        let _: Value = self
            .post("adrive/v2/file/createWithFolders", &body, None)
            .await?;
        info!("阿里云盘目录已创建: {}", name);
        Ok(())
    }
}
