// 夸克网盘客户端实现

use crate::netdisk::error::NetdiskError;
use crate::netdisk::http::{build_client, extract_share_key, read_json, BROWSER_USER_AGENT};
use crate::netdisk::poller::TaskState;
use crate::netdisk::policy::split_banned;
use crate::netdisk::types::{ExpirationClass, PanType, TransferReceipt};
use crate::netdisk::{BackendContext, Netdisk};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, REFERER};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// 夸克网盘 API 地址
const QUARK_API_BASE: &str = "https://drive-pc.quark.cn/1/clouddrive";
const QUARK_REFERER: &str = "https://pan.quark.cn/";

/// 公共查询参数
const COMMON_QUERY: [(&str, &str); 3] = [("pr", "ucpro"), ("fr", "pc"), ("uc_param_str", "")];

/// 任务最大轮询次数
const TASK_MAX_ATTEMPTS: u32 = 50;

/// 成功响应的状态码
const STATUS_OK: i64 = 200;

/// 夸克分享有效期编码
pub(crate) fn quark_expired_type(class: ExpirationClass) -> i32 {
    match class {
        ExpirationClass::Permanent => 4,
        ExpirationClass::Temporary => 2,
    }
}

/// 提取分享ID (pwd_id)
pub fn extract_pwd_id(share_url: &str) -> Result<String, NetdiskError> {
    extract_share_key(share_url, "/s/")
}

/// 夸克通用响应
#[derive(Debug, Deserialize)]
struct QuarkResponse<T> {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> QuarkResponse<T> {
    fn ensure_ok(&self, action: &str) -> Result<(), NetdiskError> {
        if self.status != STATUS_OK {
            return Err(NetdiskError::api(
                self.status,
                format!("{}: {}", action, self.message),
            ));
        }
        Ok(())
    }

    fn into_data(self, action: &str) -> Result<T, NetdiskError> {
        self.ensure_ok(action)?;
        self.data
            .ok_or_else(|| NetdiskError::Parse(format!("{}: 响应缺少 data 字段", action)))
    }
}

#[derive(Debug, Deserialize)]
struct StokenData {
    stoken: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct ShareDetailData {
    #[serde(default)]
    list: Vec<ShareFile>,
}

#[derive(Debug, Deserialize)]
struct ShareFile {
    fid: String,
    share_fid_token: String,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct TaskStatusData {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    share_id: String,
    #[serde(default)]
    save_as: Option<SaveAsData>,
}

#[derive(Debug, Default, Deserialize)]
struct SaveAsData {
    #[serde(default)]
    save_as_top_fids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SharePasswordData {
    share_url: String,
    #[serde(default)]
    passcode: String,
    #[serde(default)]
    expired_type: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileListData {
    #[serde(default)]
    list: Vec<QuarkFile>,
}

/// 网盘文件条目
#[derive(Debug, Clone, Deserialize)]
pub struct QuarkFile {
    pub fid: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub dir: bool,
}

/// 按名称查找目录，跳过同名文件
fn find_dir<'a>(files: &'a [QuarkFile], name: &str) -> Option<&'a QuarkFile> {
    files.iter().find(|f| f.dir && f.file_name == name)
}

/// 夸克网盘客户端
pub struct QuarkClient {
    client: Client,
    cookie: String,
    ctx: BackendContext,
}

impl QuarkClient {
    /// 创建客户端
    ///
    /// # 参数
    /// * `cookie` - 夸克网盘 Cookie
    /// * `ctx` - 配置、目录策略和轮询器
    pub fn new(cookie: String, ctx: BackendContext) -> Result<Self, NetdiskError> {
        Ok(Self {
            client: build_client(BROWSER_USER_AGENT)?,
            cookie,
            ctx,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", QUARK_API_BASE, path))
            .query(&COMMON_QUERY)
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(ACCEPT_LANGUAGE, "zh-CN,zh;q=0.9")
            .header(CONTENT_TYPE, "application/json;charset=UTF-8")
            .header(REFERER, QUARK_REFERER)
            .header(COOKIE, self.cookie.as_str())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<QuarkResponse<T>, NetdiskError> {
        let response = request.send().await?;
        read_json(response).await
    }

    /// 获取分享令牌
    async fn get_stoken(&self, pwd_id: &str, passcode: &str) -> Result<StokenData, NetdiskError> {
        let body = json!({ "passcode": passcode, "pwd_id": pwd_id });
        let resp: QuarkResponse<StokenData> = self
            .send(self.request(Method::POST, "share/sharepage/token").json(&body))
            .await?;
        let mut data = resp.into_data("获取stoken失败")?;
        data.stoken = data.stoken.replace(' ', "+");
        Ok(data)
    }

    /// 获取分享详情
    async fn get_share_detail(
        &self,
        pwd_id: &str,
        stoken: &str,
    ) -> Result<Vec<ShareFile>, NetdiskError> {
        let query = [
            ("pwd_id", pwd_id),
            ("stoken", stoken),
            ("pdir_fid", "0"),
            ("force", "0"),
            ("_page", "1"),
            ("_size", "100"),
            ("_fetch_banner", "1"),
            ("_fetch_share", "1"),
            ("_fetch_total", "1"),
            ("_sort", "file_type:asc,updated_at:desc"),
        ];
        let resp: QuarkResponse<ShareDetailData> = self
            .send(self.request(Method::GET, "share/sharepage/detail").query(&query))
            .await?;
        Ok(resp.into_data("获取分享详情失败")?.list)
    }

    /// 转存到自己的网盘，返回任务ID
    async fn save_share(
        &self,
        pwd_id: &str,
        stoken: &str,
        files: &[ShareFile],
        to_pdir_fid: &str,
    ) -> Result<String, NetdiskError> {
        let fid_list: Vec<&str> = files.iter().map(|f| f.fid.as_str()).collect();
        let token_list: Vec<&str> = files.iter().map(|f| f.share_fid_token.as_str()).collect();
        let body = json!({
            "fid_list": fid_list,
            "fid_token_list": token_list,
            "to_pdir_fid": to_pdir_fid,
            "pwd_id": pwd_id,
            "stoken": stoken,
            "pdir_fid": "0",
            "scene": "link",
        });

        let resp: QuarkResponse<TaskData> = self
            .send(
                self.request(Method::POST, "share/sharepage/save")
                    .query(&[("entry", "update_share")])
                    .json(&body),
            )
            .await?;

        if resp.message == "capacity limit[{0}]" {
            return Err(NetdiskError::CapacityLimit);
        }
        Ok(resp.into_data("转存失败")?.task_id)
    }

    /// 查询一次任务状态
    async fn query_task(
        &self,
        task_id: &str,
        retry_index: u32,
    ) -> Result<TaskState<TaskStatusData>, NetdiskError> {
        let retry_index = retry_index.to_string();
        let query = [("task_id", task_id), ("retry_index", retry_index.as_str())];
        let resp: QuarkResponse<TaskStatusData> = self
            .send(self.request(Method::GET, "task").query(&query))
            .await?;

        if resp.status != STATUS_OK {
            return Ok(TaskState::Failed(format!("查询任务失败: {}", resp.message)));
        }
        let data = resp.data.unwrap_or_default();
        if data.status == 2 {
            Ok(TaskState::Succeeded(data))
        } else {
            Ok(TaskState::Pending)
        }
    }

    async fn wait_task(&self, task_id: &str) -> Result<TaskStatusData, NetdiskError> {
        self.ctx
            .poller
            .wait(task_id, TASK_MAX_ATTEMPTS, |i| self.query_task(task_id, i))
            .await
    }

    /// 列出目录
    pub async fn list_dir(&self, pdir_fid: &str, size: u32) -> Result<Vec<QuarkFile>, NetdiskError> {
        let size = size.to_string();
        let query = [
            ("pdir_fid", pdir_fid),
            ("_page", "1"),
            ("_size", size.as_str()),
            ("_fetch_total", "1"),
            ("_fetch_sub_dirs", "0"),
            ("_sort", "file_type:asc,updated_at:desc"),
        ];
        let resp: QuarkResponse<FileListData> = self
            .send(self.request(Method::GET, "file/sort").query(&query))
            .await?;
        Ok(resp.into_data("获取文件列表失败")?.list)
    }

    /// 删除文件
    pub async fn delete_files(&self, fids: &[String]) -> Result<(), NetdiskError> {
        let body = json!({ "action_type": 2, "exclude_fids": [], "filelist": fids });
        let resp: QuarkResponse<Value> = self
            .send(self.request(Method::POST, "file/delete").json(&body))
            .await?;
        resp.ensure_ok("删除文件失败")
    }

    /// 清理广告文件，返回是否删除了整个转存目录
    async fn clean_banned(&self, saved_fid: &str) -> Result<bool, NetdiskError> {
        let words = self.ctx.policy.banned_words(PanType::Quark);
        if words.is_empty() {
            return Ok(false);
        }

        let files = self.list_dir(saved_fid, 50).await?;
        let split = split_banned(
            files.iter().map(|f| (f.fid.as_str(), f.file_name.as_str())),
            &words,
        );

        if split.all_banned() {
            info!("转存内容全部为广告，删除转存目录: fid={}", saved_fid);
            self.delete_files(&[saved_fid.to_string()]).await?;
            return Ok(true);
        }
        if !split.banned.is_empty() {
            info!("删除广告文件: count={}", split.banned.len());
            self.delete_files(&split.banned).await?;
        }
        Ok(false)
    }

    /// 创建分享，返回任务ID
    async fn create_share(
        &self,
        fids: &[String],
        title: &str,
        expired_type: i32,
    ) -> Result<String, NetdiskError> {
        let body = json!({
            "fid_list": fids,
            "expired_type": expired_type,
            "title": title,
            "url_type": 1,
        });
        let resp: QuarkResponse<TaskData> = self
            .send(self.request(Method::POST, "share").json(&body))
            .await?;
        Ok(resp.into_data("创建分享失败")?.task_id)
    }

    /// 获取分享链接和提取码
    async fn get_share_password(&self, share_id: &str) -> Result<SharePasswordData, NetdiskError> {
        let body = json!({ "share_id": share_id });
        let resp: QuarkResponse<SharePasswordData> = self
            .send(self.request(Method::POST, "share/password").json(&body))
            .await?;
        resp.into_data("获取分享密码失败")
    }
}

#[async_trait]
impl Netdisk for QuarkClient {
    fn pan_type(&self) -> PanType {
        PanType::Quark
    }

    fn is_configured(&mut self) -> bool {
        self.ctx.refresh_credential(PanType::Quark, &mut self.cookie)
    }

    async fn transfer(
        &mut self,
        share_url: &str,
        password: &str,
        class: ExpirationClass,
    ) -> Result<TransferReceipt, NetdiskError> {
        info!("开始夸克网盘转存: {}", share_url);

        let pwd_id = extract_pwd_id(share_url)?;
        let stoken = self.get_stoken(&pwd_id, password).await?;
        let files = self.get_share_detail(&pwd_id, &stoken.stoken).await?;
        if files.is_empty() {
            return Err(NetdiskError::EmptyShare);
        }

        let to_pdir_fid = self.ctx.policy.resolve_folder(PanType::Quark, class);
        let task_id = self
            .save_share(&pwd_id, &stoken.stoken, &files, &to_pdir_fid)
            .await?;
        let saved = self.wait_task(&task_id).await?;
        let saved_fids = saved
            .save_as
            .map(|s| s.save_as_top_fids)
            .unwrap_or_default();
        if saved_fids.is_empty() {
            return Err(NetdiskError::Parse("转存任务未返回文件ID".to_string()));
        }
        debug!("转存完成: fids={:?}", saved_fids);

        match self.clean_banned(&saved_fids[0]).await {
            Ok(true) => return Err(NetdiskError::EmptyShare),
            Ok(false) => {}
            Err(e) => warn!("清理广告文件失败: {}", e),
        }

        let expired_type = quark_expired_type(class);
        let task_id = self
            .create_share(&saved_fids, &stoken.title, expired_type)
            .await?;
        let shared = self.wait_task(&task_id).await?;
        if shared.share_id.is_empty() {
            return Err(NetdiskError::Parse("分享任务未返回share_id".to_string()));
        }

        let link = self.get_share_password(&shared.share_id).await?;
        info!("夸克网盘转存成功: {}", link.share_url);

        Ok(TransferReceipt {
            title: stoken.title,
            share_url: link.share_url,
            password: link.passcode,
            fid: saved_fids.join(","),
            expired_type: link.expired_type.unwrap_or(expired_type),
        })
    }

    async fn test_connection(&mut self) -> Result<(), NetdiskError> {
        let query = [("pdir_fid", "0"), ("_page", "1"), ("_size", "1")];
        let resp: QuarkResponse<Value> = self
            .send(self.request(Method::GET, "file/sort").query(&query))
            .await?;
        if resp.status == 401 {
            return Err(NetdiskError::CredentialExpired(
                "夸克网盘Cookie已过期".to_string(),
            ));
        }
        resp.ensure_ok("测试连接失败")
    }

    async fn delete_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        let name = path.trim_matches('/');
        let files = self.list_dir("0", 100).await?;
        let target = find_dir(&files, name)
            .ok_or_else(|| NetdiskError::DirectoryNotFound(name.to_string()))?;

        self.delete_files(&[target.fid.clone()]).await?;
        info!("夸克网盘目录已删除: {}", name);
        Ok(())
    }

    async fn create_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        let name = path.trim_matches('/');
        let body = json!({
            "pdir_fid": "0",
            "file_name": name,
            "dir_path": "",
            "dir_init_lock": false,
        });
        let resp: QuarkResponse<Value> = self
            .send(self.request(Method::POST, "file").json(&body))
            .await?;
        resp.ensure_ok("创建目录失败")?;
        info!("夸克网盘目录已创建: {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_pwd_id() {
        assert_eq!(
            extract_pwd_id("https://pan.quark.cn/s/8f2d1c3b4a5e").unwrap(),
            "8f2d1c3b4a5e"
        );
        assert_eq!(
            extract_pwd_id("https://pan.quark.cn/s/8f2d1c3b4a5e?pwd=abcd").unwrap(),
            "8f2d1c3b4a5e"
        );
        assert!(matches!(
            extract_pwd_id("https://pan.quark.cn/list#/"),
            Err(NetdiskError::InvalidShareUrl(_))
        ));
    }

    #[test]
    fn test_expired_type_mapping() {
        assert_eq!(quark_expired_type(ExpirationClass::Permanent), 4);
        assert_eq!(quark_expired_type(ExpirationClass::Temporary), 2);
    }

    #[test]
    fn test_response_status() {
        let resp: QuarkResponse<StokenData> = serde_json::from_str(
            r#"{"status":200,"code":0,"message":"ok","data":{"stoken":"a b","title":"合集"}}"#,
        )
        .unwrap();
        let data = resp.into_data("获取stoken失败").unwrap();
        assert_eq!(data.title, "合集");

        let resp: QuarkResponse<StokenData> =
            serde_json::from_str(r#"{"status":404,"code":41004,"message":"分享不存在"}"#).unwrap();
        match resp.into_data("获取stoken失败") {
            Err(NetdiskError::Api { code, message }) => {
                assert_eq!(code, 404);
                assert!(message.contains("分享不存在"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_find_dir_skips_files() {
        let files: Vec<QuarkFile> = serde_json::from_str(
            r#"[{"fid":"f1","file_name":"临时资源","dir":false},
                {"fid":"d1","file_name":"临时资源","dir":true},
                {"fid":"d2","file_name":"其它"}]"#,
        )
        .unwrap();
        assert_eq!(find_dir(&files, "临时资源").unwrap().fid, "d1");
        assert!(find_dir(&files, "其它").is_none());
        assert!(find_dir(&files, "不存在").is_none());
    }

    #[test]
    fn test_task_status_payload() {
        let data: TaskStatusData = serde_json::from_str(
            r#"{"status":2,"save_as":{"save_as_top_fids":["f1","f2"]}}"#,
        )
        .unwrap();
        assert_eq!(data.status, 2);
        assert_eq!(data.save_as.unwrap().save_as_top_fids, vec!["f1", "f2"]);

        let data: TaskStatusData =
            serde_json::from_str(r#"{"status":2,"share_id":"s-1"}"#).unwrap();
        assert_eq!(data.share_id, "s-1");
    }
}
