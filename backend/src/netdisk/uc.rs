// UC网盘客户端实现

use crate::netdisk::error::NetdiskError;
use crate::netdisk::http::{build_client, extract_share_key, read_json, BROWSER_USER_AGENT};
use crate::netdisk::policy::split_banned;
use crate::netdisk::quark::quark_expired_type;
use crate::netdisk::types::{ExpirationClass, PanType, TransferReceipt};
use crate::netdisk::{BackendContext, Netdisk};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{info, warn};

const UC_API_BASE: &str = "https://drive.uc.cn/api";
const UC_SHARE_API: &str = "https://pc-api.uc.cn/1/clouddrive/share";

const SHARE_PASSWORD: &str = "6666";
const SHARE_TITLE: &str = "云盘资源分享";

/// 登录失效的业务码
const CODE_UNAUTHORIZED: i64 = 401;

/// UC 通用响应
#[derive(Debug, Deserialize)]
struct UcResponse<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T> UcResponse<T> {
    fn ensure_ok(&self, action: &str) -> Result<(), NetdiskError> {
        match self.code {
            0 => Ok(()),
            CODE_UNAUTHORIZED => Err(NetdiskError::CredentialExpired(
                "UC网盘Cookie已过期".to_string(),
            )),
            code => Err(NetdiskError::api(code, format!("{}: {}", action, self.msg))),
        }
    }

    fn into_data(self, action: &str) -> Result<T, NetdiskError> {
        self.ensure_ok(action)?;
        self.data
            .ok_or_else(|| NetdiskError::Parse(format!("{}: 响应缺少 data 字段", action)))
    }
}

/// UC 网盘文件条目
#[derive(Debug, Clone, Deserialize)]
pub struct UcFile {
    pub file_id: String,
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ShareInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    files: Vec<UcFile>,
}

#[derive(Debug, Default, Deserialize)]
struct FileListData {
    #[serde(default)]
    files: Vec<UcFile>,
}

#[derive(Debug, Deserialize)]
struct ShareData {
    #[serde(default)]
    share_url: String,
    #[serde(default)]
    expired_type: Option<i32>,
}

/// UC网盘客户端
pub struct UcClient {
    client: Client,
    cookie: String,
    ctx: BackendContext,
}

impl UcClient {
    pub fn new(cookie: String, ctx: BackendContext) -> Result<Self, NetdiskError> {
        Ok(Self {
            client: build_client(BROWSER_USER_AGENT)?,
            cookie,
            ctx,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<UcResponse<T>, NetdiskError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(COOKIE, self.cookie.as_str())
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }

    fn api(path: &str) -> String {
        format!("{}/{}", UC_API_BASE, path)
    }

    async fn get_share_info(&self, share_id: &str, password: &str) -> Result<ShareInfo, NetdiskError> {
        let body = json!({ "share_id": share_id, "password": password });
        let resp: UcResponse<ShareInfo> = self.post(&Self::api("share/detail"), &body).await?;
        resp.into_data("获取分享详情失败")
    }

    async fn save_files(
        &self,
        share_id: &str,
        file_ids: &[String],
        to_folder_id: &str,
    ) -> Result<(), NetdiskError> {
        let body = json!({
            "share_id": share_id,
            "file_ids": file_ids,
            "to_folder_id": to_folder_id,
        });
        let resp: UcResponse<Value> = self.post(&Self::api("share/save"), &body).await?;
        resp.ensure_ok("转存文件失败")
    }

    /// 列出目录
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<UcFile>, NetdiskError> {
        let body = json!({ "folder_id": folder_id, "page": 1, "size": 100 });
        let resp: UcResponse<FileListData> = self.post(&Self::api("file/list"), &body).await?;
        Ok(resp.into_data("获取文件列表失败")?.files)
    }

    async fn delete_files(&self, file_ids: &[String]) -> Result<(), NetdiskError> {
        let body = json!({ "file_ids": file_ids });
        let resp: UcResponse<Value> = self.post(&Self::api("file/delete"), &body).await?;
        resp.ensure_ok("删除文件失败")
    }

    async fn create_share(
        &self,
        file_ids: &[String],
        expired_type: i32,
    ) -> Result<ShareData, NetdiskError> {
        let body = json!({
            "file_ids": file_ids,
            "expired_type": expired_type,
            "password": SHARE_PASSWORD,
            "title": SHARE_TITLE,
            "url_type": 1,
        });
        let resp: UcResponse<ShareData> = self.post(UC_SHARE_API, &body).await?;
        let data = resp.into_data("创建分享失败")?;
        if data.share_url.is_empty() {
            return Err(NetdiskError::Parse("创建分享未返回链接".to_string()));
        }
        Ok(data)
    }
}

#[async_trait]
impl Netdisk for UcClient {
    fn pan_type(&self) -> PanType {
        PanType::Uc
    }

    fn is_configured(&mut self) -> bool {
        self.ctx.refresh_credential(PanType::Uc, &mut self.cookie)
    }

    async fn transfer(
        &mut self,
        share_url: &str,
        password: &str,
        class: ExpirationClass,
    ) -> Result<TransferReceipt, NetdiskError> {
        info!("开始UC网盘转存: {}", share_url);

        let share_id = extract_share_key(share_url, "/s/")?;
        let share = self.get_share_info(&share_id, password).await?;
        if share.files.is_empty() {
            return Err(NetdiskError::EmptyShare);
        }

        let folder = self.ctx.policy.resolve_folder(PanType::Uc, class);
        let file_ids: Vec<String> = share.files.iter().map(|f| f.file_id.clone()).collect();
        self.save_files(&share_id, &file_ids, &folder).await?;

        let names: HashSet<&str> = share.files.iter().map(|f| f.file_name.as_str()).collect();
        let saved: Vec<UcFile> = self
            .list_folder(&folder)
            .await?
            .into_iter()
            .filter(|f| names.contains(f.file_name.as_str()))
            .collect();

        let words = self.ctx.policy.banned_words(PanType::Uc);
        let split = split_banned(
            saved.iter().map(|f| (f.file_id.as_str(), f.file_name.as_str())),
            &words,
        );
        if !split.banned.is_empty() {
            info!("删除广告文件: count={}", split.banned.len());
            if let Err(e) = self.delete_files(&split.banned).await {
                warn!("删除广告文件失败: {}", e);
            }
        }
        if split.kept.is_empty() {
            return Err(NetdiskError::EmptyShare);
        }

        let expired_type = quark_expired_type(class);
        let link = self.create_share(&split.kept, expired_type).await?;
        info!("UC网盘转存成功: {}", link.share_url);

        let title = if share.title.is_empty() {
            share.files[0].file_name.clone()
        } else {
            share.title
        };
        Ok(TransferReceipt {
            title,
            share_url: link.share_url,
            password: SHARE_PASSWORD.to_string(),
            fid: split.kept.join(","),
            expired_type: link.expired_type.unwrap_or(expired_type),
        })
    }

    async fn test_connection(&mut self) -> Result<(), NetdiskError> {
        let body = json!({ "folder_id": "0", "page": 1, "size": 1 });
        let resp: UcResponse<Value> = self.post(&Self::api("file/list"), &body).await?;
        resp.ensure_ok("测试连接失败")
    }

    async fn delete_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        let name = path.trim_matches('/');
        let target = self
            .list_folder("0")
            .await?
            .into_iter()
            .find(|f| f.file_name == name)
            .ok_or_else(|| NetdiskError::DirectoryNotFound(name.to_string()))?;

        self.delete_files(&[target.file_id]).await?;
        info!("UC网盘目录已删除: {}", name);
        Ok(())
    }

    async fn create_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        let name = path.trim_matches('/');
        let body = json!({ "parent_id": "0", "name": name });
        let resp: UcResponse<Value> = self.post(&Self::api("folder/create"), &body).await?;
        resp.ensure_ok("创建目录失败")?;
        info!("UC网盘目录已创建: {}", name);
        Ok(())
    }
}
