// 迅雷云盘客户端实现

use crate::netdisk::error::NetdiskError;
use crate::netdisk::http::{build_client, extract_share_key, parse_json, preview, BROWSER_USER_AGENT};
use crate::netdisk::poller::TaskState;
use crate::netdisk::policy::split_banned;
use crate::netdisk::types::{ExpirationClass, PanType, TransferReceipt};
use crate::netdisk::{BackendContext, Netdisk};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// 用户与转存接口
const XPAN_API_BASE: &str = "https://api.xpan.xunlei.com";
/// 文件与分享接口
const PAN_API_BASE: &str = "https://api-pan.xunlei.com";

const CLIENT_ID: &str = "Xqp0kJBXWhwaTpB6";
const SHARE_TITLE: &str = "云盘资源分享";

/// 任务最大轮询次数
const TASK_MAX_ATTEMPTS: u32 = 30;

/// 令牌失效的错误码
const TOKEN_ERRORS: [&str; 2] = ["invalid_grant", "unauthenticated"];

/// 分享有效天数，-1 为永久
pub(crate) fn xunlei_expiration_days(class: ExpirationClass) -> &'static str {
    match class {
        ExpirationClass::Permanent => "-1",
        ExpirationClass::Temporary => "2",
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Value,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_msg: String,
    #[serde(default)]
    error_description: String,
}

impl ErrorBody {
    fn code(&self) -> String {
        match &self.error_code {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => self.error.clone(),
        }
    }

    fn message(&self) -> &str {
        if !self.error_msg.is_empty() {
            &self.error_msg
        } else {
            &self.error_description
        }
    }

    fn is_error(&self) -> bool {
        let code = self.code();
        !code.is_empty() && code != "0"
    }
}

/// 把错误响应转换为错误
fn response_error(status: u16, body: &ErrorBody) -> NetdiskError {
    let code = body.code();
    if TOKEN_ERRORS.contains(&code.as_str()) || status == 401 {
        return NetdiskError::CredentialExpired(format!(
            "迅雷云盘RefreshToken已过期或无效: {}",
            body.message()
        ));
    }
    NetdiskError::api(i64::from(status), format!("{} {}", code, body.message()))
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    user_id: String,
}

/// 迅雷文件条目
#[derive(Debug, Clone, Deserialize)]
pub struct XunleiFile {
    pub file_id: String,
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ShareInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    files: Vec<XunleiFile>,
}

#[derive(Debug, Deserialize)]
struct ShareInfoResponse {
    #[serde(default)]
    share_info: ShareInfo,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(default)]
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<XunleiFile>,
}

#[derive(Debug, Deserialize)]
struct ShareLinkResponse {
    #[serde(default)]
    share_url: String,
    #[serde(default)]
    pass_code: String,
}

/// 任务状态转换
fn task_state(resp: TaskStatusResponse) -> TaskState<()> {
    match resp.status.as_str() {
        "completed" => TaskState::Succeeded(()),
        "failed" => TaskState::Failed(if resp.message.is_empty() {
            "转存任务失败".to_string()
        } else {
            resp.message
        }),
        _ => TaskState::Pending,
    }
}

/// 迅雷云盘客户端
pub struct XunleiClient {
    client: Client,
    refresh_token: String,
    access_token: String,
    user_id: String,
    ctx: BackendContext,
}

impl XunleiClient {
    pub fn new(refresh_token: String, ctx: BackendContext) -> Result<Self, NetdiskError> {
        Ok(Self {
            client: build_client(BROWSER_USER_AGENT)?,
            refresh_token,
            access_token: String::new(),
            user_id: String::new(),
            ctx,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T, NetdiskError> {
        let mut request = self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, "application/json");
        if !self.access_token.is_empty() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", self.access_token));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let error: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
            if !error.is_error() {
                return Err(NetdiskError::api(
                    i64::from(status.as_u16()),
                    preview(&text).to_string(),
                ));
            }
            return Err(response_error(status.as_u16(), &error));
        }
        parse_json(&text)
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T, NetdiskError> {
        self.request(Method::POST, url, Some(body)).await
    }

    async fn refresh_access_token(&mut self) -> Result<(), NetdiskError> {
        let body = json!({
            "grant_type": "refresh_token",
            "refresh_token": self.refresh_token,
            "client_id": CLIENT_ID,
            "client_secret": "",
        });
        let url = format!("{}/oauth/token", XPAN_API_BASE);
        let value: Value = self.post(&url, &body).await?;

        let error: ErrorBody = serde_json::from_value(value.clone()).unwrap_or_default();
        if error.is_error() {
            return Err(response_error(200, &error));
        }
        let token: TokenResponse = serde_json::from_value(value)?;
        if token.access_token.is_empty() {
            return Err(NetdiskError::CredentialExpired(
                "迅雷云盘未返回AccessToken".to_string(),
            ));
        }

        self.access_token = token.access_token;
        if !token.refresh_token.is_empty() {
            self.refresh_token = token.refresh_token;
        }
        self.user_id = token.user_id;
        debug!("迅雷云盘令牌已刷新: user_id={}", self.user_id);
        Ok(())
    }

    async fn get_share_info(&self, share_id: &str, password: &str) -> Result<ShareInfo, NetdiskError> {
        let url = format!("{}/drive/v1/share/{}", XPAN_API_BASE, share_id);
        let resp: ShareInfoResponse = self.post(&url, &json!({ "share_pwd": password })).await?;
        Ok(resp.share_info)
    }

    async fn save_files(
        &self,
        share_id: &str,
        file_ids: &[String],
        to_parent_id: &str,
    ) -> Result<String, NetdiskError> {
        let body = json!({
            "share_id": share_id,
            "file_id_list": file_ids,
            "to_parent_id": to_parent_id,
            "to_drive_id": self.user_id,
        });
        let url = format!("{}/drive/v1/share/save", XPAN_API_BASE);
        let resp: TaskResponse = self.post(&url, &body).await?;
        if resp.task_id.is_empty() {
            return Err(NetdiskError::Parse("转存未返回task_id".to_string()));
        }
        Ok(resp.task_id)
    }

    async fn query_task(&self, task_id: &str) -> Result<TaskState<()>, NetdiskError> {
        let url = format!("{}/drive/v1/task/{}", XPAN_API_BASE, task_id);
        let resp: TaskStatusResponse = self.request(Method::GET, &url, None).await?;
        Ok(task_state(resp))
    }

    /// 列出目录
    pub async fn list_folder(&self, parent_id: &str) -> Result<Vec<XunleiFile>, NetdiskError> {
        let body = json!({ "parent_id": parent_id, "page": 1, "per_page": 100 });
        let url = format!("{}/drive/v1/files", PAN_API_BASE);
        let resp: FileListResponse = self.post(&url, &body).await?;
        Ok(resp.files)
    }

    async fn trash(&self, file_ids: &[String]) -> Result<(), NetdiskError> {
        let url = format!("{}/drive/v1/files/trash", PAN_API_BASE);
        let _: Value = self.post(&url, &json!({ "file_ids": file_ids })).await?;
        Ok(())
    }

    async fn create_share(
        &self,
        file_ids: &[String],
        class: ExpirationClass,
    ) -> Result<ShareLinkResponse, NetdiskError> {
        let body = json!({
            "file_ids": file_ids,
            "share_to": "copy",
            "params": {
                "subscribe_push": "false",
                "WithPassCodeInLink": "true",
            },
            "title": SHARE_TITLE,
            "restore_limit": "-1",
            "expiration_days": xunlei_expiration_days(class),
        });
        let url = format!("{}/drive/v1/share", PAN_API_BASE);
        let resp: ShareLinkResponse = self.post(&url, &body).await?;
        if resp.share_url.is_empty() {
            return Err(NetdiskError::Parse("创建分享未返回链接".to_string()));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Netdisk for XunleiClient {
    fn pan_type(&self) -> PanType {
        PanType::Xunlei
    }

    fn is_configured(&mut self) -> bool {
        self.ctx.refresh_credential(PanType::Xunlei, &mut self.refresh_token)
    }

    async fn transfer(
        &mut self,
        share_url: &str,
        password: &str,
        class: ExpirationClass,
    ) -> Result<TransferReceipt, NetdiskError> {
        info!("开始迅雷云盘转存: {}", share_url);

        self.refresh_access_token().await?;
        let share_id = extract_share_key(share_url, "/s/")?;
        let share = self.get_share_info(&share_id, password).await?;
        if share.files.is_empty() {
            return Err(NetdiskError::EmptyShare);
        }

        let folder = self.ctx.policy.resolve_folder(PanType::Xunlei, class);
        let file_ids: Vec<String> = share.files.iter().map(|f| f.file_id.clone()).collect();
        let task_id = self.save_files(&share_id, &file_ids, &folder).await?;
        self.ctx
            .poller
            .wait(&task_id, TASK_MAX_ATTEMPTS, |_| self.query_task(&task_id))
            .await?;

        let names: HashSet<&str> = share.files.iter().map(|f| f.file_name.as_str()).collect();
        let saved: Vec<XunleiFile> = self
            .list_folder(&folder)
            .await?
            .into_iter()
            .filter(|f| names.contains(f.file_name.as_str()))
            .collect();

        let words = self.ctx.policy.banned_words(PanType::Xunlei);
        let split = split_banned(
            saved.iter().map(|f| (f.file_id.as_str(), f.file_name.as_str())),
            &words,
        );
        if !split.banned.is_empty() {
            info!("删除广告文件: count={}", split.banned.len());
            if let Err(e) = self.trash(&split.banned).await {
                warn!("删除广告文件失败: {}", e);
            }
        }
        if split.kept.is_empty() {
            return Err(NetdiskError::EmptyShare);
        }

        let link = self.create_share(&split.kept, class).await?;
        let share_url = format!("{}?pwd={}", link.share_url, link.pass_code);
        info!("迅雷云盘转存成功: {}", share_url);

        let title = if share.title.is_empty() {
            share.files[0].file_name.clone()
        } else {
            share.title
        };
        Ok(TransferReceipt {
            title,
            share_url,
            password: link.pass_code,
            fid: split.kept.join(","),
            expired_type: if class.is_temporary() { 2 } else { -1 },
        })
    }

    async fn test_connection(&mut self) -> Result<(), NetdiskError> {
        self.refresh_access_token().await
    }

    async fn delete_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        self.refresh_access_token().await?;
        let name = path.trim_matches('/');
        let target = self
            .list_folder("")
            .await?
            .into_iter()
            .find(|f| f.file_name == name)
            .ok_or_else(|| NetdiskError::DirectoryNotFound(name.to_string()))?;

        self.trash(&[target.file_id]).await?;
        info!("迅雷云盘目录已删除: {}", name);
        Ok(())
    }

    async fn create_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        self.refresh_access_token().await?;
        let name = path.trim_matches('/');
        let body = json!({ "parent_id": "", "name": name, "kind": "drive#folder" });
        let url = format!("{}/drive/v1/files", PAN_API_BASE);
        let _: Value = self.post(&url, &body).await?;
        info!("迅雷云盘目录已创建: {}", name);
        Ok(())
    }
}
