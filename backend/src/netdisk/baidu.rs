// 百度网盘客户端实现
//
// 百度没有公开的分享转存接口，参数来自网页端：先用 bdstoken 校验提取码，
// 再从分享页 HTML 中解析 shareid / uk / fs_id

use crate::netdisk::error::{NetdiskError, RetryPolicy};
use crate::netdisk::http::{build_client, looks_like_html, now_millis, parse_json, with_retry};
use crate::netdisk::policy::{normalize_baidu_path, split_banned};
use crate::netdisk::types::{ExpirationClass, PanType, TransferReceipt};
use crate::netdisk::{BackendContext, Netdisk};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONNECTION, COOKIE, REFERER, UPGRADE_INSECURE_REQUESTS};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

const PAN_BASE: &str = "https://pan.baidu.com";
const BAIDU_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";
const BAIDU_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.9";
const BAIDU_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8,en-US;q=0.7,en-GB;q=0.6,ru;q=0.5";

/// 网页端 app_id
const WEB_APP_ID: &str = "250528";
/// 模板变量接口使用的 app_id
const TEMPLATE_APP_ID: &str = "38824127";
/// 固定分享提取码
const SHARE_PASSWORD: &str = "6666";

/// 分享链接中 surl 的起始偏移与长度
const SURL_OFFSET: usize = 25;
const SURL_LEN: usize = 23;

/// 登录失效错误码
const ERRNO_NOT_LOGIN: i64 = -6;

static SHARE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""shareid":(\d+?),""#).unwrap());
static SHARE_UK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""share_uk":"(\d+?)","#).unwrap());
static FS_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""fs_id":(\d+?),"#).unwrap());
static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""server_filename":"(.+?)","#).unwrap());

/// 百度分享有效期（天），0 为永久
pub(crate) fn baidu_period(class: ExpirationClass) -> i32 {
    match class {
        ExpirationClass::Permanent => 0,
        ExpirationClass::Temporary => 7,
    }
}

/// 提取 surl
///
/// 去掉查询参数后取第 25 个字符起的 23 个字符，链接较短时取到末尾
pub fn extract_surl(share_url: &str) -> Result<String, NetdiskError> {
    let base = share_url.split('?').next().unwrap_or_default().trim();
    if base.len() < SURL_OFFSET {
        return Err(NetdiskError::InvalidShareUrl(share_url.to_string()));
    }
    let end = base.len().min(SURL_OFFSET + SURL_LEN);
    base.get(SURL_OFFSET..end)
        .map(str::to_string)
        .ok_or_else(|| NetdiskError::InvalidShareUrl(share_url.to_string()))
}

/// 合并 Cookie，同名键覆盖原值并保持原有顺序，新键追加到末尾
pub fn merge_cookie(cookie: &str, name: &str, value: &str) -> String {
    let mut replaced = false;
    let mut parts: Vec<String> = cookie
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, _)) if key.trim() == name => {
                replaced = true;
                format!("{}={}", name, value)
            }
            _ => pair.to_string(),
        })
        .collect();

    if !replaced {
        parts.push(format!("{}={}", name, value));
    }
    parts.join("; ")
}

/// 分享页解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharePageParams {
    pub share_id: String,
    pub share_uk: String,
    pub fs_ids: Vec<String>,
    /// 去重后的文件名，保持出现顺序
    pub file_names: Vec<String>,
}

/// 从分享页 HTML 中解析转存参数
pub fn parse_share_page(html: &str) -> Result<SharePageParams, NetdiskError> {
    let first = |re: &Regex| re.captures(html).map(|c| c[1].to_string());
    let all = |re: &Regex| -> Vec<String> {
        re.captures_iter(html).map(|c| c[1].to_string()).collect()
    };

    let share_id = first(&*SHARE_ID_RE);
    let share_uk = first(&*SHARE_UK_RE);
    let fs_ids = all(&*FS_ID_RE);
    let names = all(&*FILENAME_RE);

    match (share_id, share_uk) {
        (Some(share_id), Some(share_uk)) if !fs_ids.is_empty() && !names.is_empty() => {
            let mut seen = HashSet::new();
            let file_names = names
                .into_iter()
                .filter(|n| seen.insert(n.clone()))
                .collect();
            Ok(SharePageParams {
                share_id,
                share_uk,
                fs_ids,
                file_names,
            })
        }
        _ => {
            debug!("分享页未包含完整转存参数: 长度={}", html.len());
            Err(NetdiskError::Parse("未能从分享页提取到完整的转存参数".to_string()))
        }
    }
}

/// 从模板变量响应中读取 bdstoken
pub fn extract_bdstoken(value: &Value) -> Result<String, NetdiskError> {
    let errno = value.get("errno").and_then(Value::as_i64).unwrap_or(-1);
    if errno != 0 {
        return Err(NetdiskError::api(errno, "获取bdstoken失败"));
    }
    value
        .get("result")
        .and_then(Value::as_object)
        .and_then(|r| r.get("bdstoken"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| NetdiskError::Parse("响应中缺少bdstoken".to_string()))
}

/// 检查 errno，HTML 响应视为安全验证
fn check_errno(body: &str, action: &str) -> Result<Value, NetdiskError> {
    if looks_like_html(body) {
        return Err(NetdiskError::VerificationRequired);
    }
    let value: Value = parse_json(body)?;
    let errno = value
        .get("errno")
        .and_then(Value::as_i64)
        .ok_or_else(|| NetdiskError::Parse(format!("{}: 响应缺少errno", action)))?;
    if errno == ERRNO_NOT_LOGIN {
        return Err(NetdiskError::CredentialExpired("百度网盘Cookie已失效".to_string()));
    }
    if errno != 0 {
        let message = value
            .get("show_msg")
            .or_else(|| value.get("errmsg"))
            .and_then(Value::as_str)
            .unwrap_or(action);
        return Err(NetdiskError::api(errno, format!("{}: {}", action, message)));
    }
    Ok(value)
}

fn id_list(ids: &[String]) -> String {
    format!("[{}]", ids.join(","))
}

/// 百度网盘文件条目
#[derive(Debug, Clone, Deserialize)]
pub struct BaiduFile {
    pub fs_id: u64,
    #[serde(default)]
    pub server_filename: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub isdir: i32,
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    list: Vec<BaiduFile>,
}

#[derive(Debug, Deserialize)]
struct ShareSetResponse {
    #[serde(default)]
    link: String,
    #[serde(default, rename = "expiredType")]
    expired_type: Option<i32>,
}

/// 百度网盘客户端
pub struct BaiduClient {
    client: Client,
    cookie: String,
    bdstoken: String,
    ctx: BackendContext,
    retry: RetryPolicy,
}

impl BaiduClient {
    pub fn new(cookie: String, ctx: BackendContext) -> Result<Self, NetdiskError> {
        Ok(Self {
            client: build_client(BAIDU_USER_AGENT)?,
            cookie,
            bdstoken: String::new(),
            ctx,
            retry: RetryPolicy::default(),
        })
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(CONNECTION, "keep-alive")
            .header(UPGRADE_INSECURE_REQUESTS, "1")
            .header("Sec-Fetch-Dest", "document")
            .header(ACCEPT, BAIDU_ACCEPT)
            .header("Sec-Fetch-Site", "same-site")
            .header("Sec-Fetch-Mode", "navigate")
            .header(REFERER, PAN_BASE)
            .header(ACCEPT_LANGUAGE, BAIDU_ACCEPT_LANGUAGE)
            .header(COOKIE, self.cookie.as_str())
    }

    /// 网页端公共查询参数
    fn web_query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("channel", "chunlei".to_string()),
            ("web", "1".to_string()),
            ("app_id", WEB_APP_ID.to_string()),
            ("bdstoken", self.bdstoken.clone()),
            ("logid", String::new()),
            ("clienttype", "0".to_string()),
        ]
    }

    async fn get_text(&self, request: RequestBuilder) -> Result<String, NetdiskError> {
        let response = self.with_headers(request).send().await?;
        Ok(response.text().await?)
    }

    async fn fetch_template_variable(&self) -> Result<Value, NetdiskError> {
        let url = format!("{}/api/gettemplatevariable", PAN_BASE);
        let query = [
            ("clienttype", "0"),
            ("app_id", TEMPLATE_APP_ID),
            ("web", "1"),
            ("fields", r#"["bdstoken","token","uk","isdocuser","servertime"]"#),
        ];
        let body = self.get_text(self.client.get(url).query(&query)).await?;
        if looks_like_html(&body) {
            return Err(NetdiskError::VerificationRequired);
        }
        parse_json(&body)
    }

    /// 获取 bdstoken
    async fn load_bdstoken(&mut self) -> Result<(), NetdiskError> {
        let value = with_retry(&self.retry, "获取bdstoken", || self.fetch_template_variable()).await?;
        self.bdstoken = extract_bdstoken(&value)?;
        debug!("获取bdstoken成功");
        Ok(())
    }

    async fn request_randsk(&self, surl: &str, password: &str) -> Result<String, NetdiskError> {
        let url = format!("{}/share/verify", PAN_BASE);
        let query = [
            ("surl", surl.to_string()),
            ("bdstoken", self.bdstoken.clone()),
            ("t", now_millis().to_string()),
            ("channel", "chunlei".to_string()),
            ("web", "1".to_string()),
            ("clienttype", "0".to_string()),
        ];
        let form = [("pwd", password), ("vcode", ""), ("vcode_str", "")];
        let body = self
            .get_text(self.client.post(url).query(&query).form(&form))
            .await?;
        let value = check_errno(&body, "验证提取码失败")?;
        value
            .get("randsk")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| NetdiskError::Parse("响应中缺少randsk".to_string()))
    }

    /// 校验提取码并把 randsk 写入 Cookie
    async fn verify_pass_code(&mut self, share_url: &str, password: &str) -> Result<(), NetdiskError> {
        let surl = extract_surl(share_url)?;
        let randsk = with_retry(&self.retry, "验证提取码", || self.request_randsk(&surl, password)).await?;
        self.cookie = merge_cookie(&self.cookie, "BDCLND", &randsk);
        Ok(())
    }

    async fn get_transfer_params(&self, share_url: &str) -> Result<SharePageParams, NetdiskError> {
        let html = self.get_text(self.client.get(share_url)).await?;
        parse_share_page(&html)
    }

    /// 列出目录
    pub async fn list_dir(&self, dir: &str) -> Result<Vec<BaiduFile>, NetdiskError> {
        let url = format!("{}/api/list", PAN_BASE);
        let mut query = vec![
            ("order", "name".to_string()),
            ("desc", "0".to_string()),
            ("showempty", "0".to_string()),
            ("page", "1".to_string()),
            ("num", "100".to_string()),
            ("dir", dir.to_string()),
            ("t", now_millis().to_string()),
        ];
        query.extend(self.web_query());
        let body = self.get_text(self.client.get(url).query(&query)).await?;
        let value = check_errno(&body, "获取目录列表失败")?;
        let list: FileListResponse = serde_json::from_value(value)?;
        Ok(list.list)
    }

    async fn post_form(
        &self,
        path: &str,
        extra_query: &[(&'static str, &str)],
        form: &[(&str, String)],
        action: &str,
    ) -> Result<Value, NetdiskError> {
        let url = format!("{}/{}", PAN_BASE, path);
        let mut query: Vec<(&str, String)> = extra_query
            .iter()
            .map(|(k, v)| (*k, v.to_string()))
            .collect();
        query.extend(self.web_query());
        let body = self
            .get_text(self.client.post(url).query(&query).form(form))
            .await?;
        check_errno(&body, action)
    }

    async fn create_dir(&self, path: &str) -> Result<(), NetdiskError> {
        let form = [
            ("path", path.to_string()),
            ("isdir", "1".to_string()),
            ("block_list", "[]".to_string()),
        ];
        self.post_form("api/create", &[("a", "commit")], &form, "创建目录失败")
            .await?;
        Ok(())
    }

    /// 目录不存在时创建
    async fn ensure_dir(&self, path: &str) -> Result<(), NetdiskError> {
        if path == "/" {
            return Ok(());
        }
        match self.list_dir(path).await {
            Ok(_) => Ok(()),
            Err(NetdiskError::Api { .. }) => {
                info!("百度网盘目录不存在，创建: {}", path);
                self.create_dir(path).await
            }
            Err(e) => Err(e),
        }
    }

    async fn transfer_files(
        &self,
        params: &SharePageParams,
        folder: &str,
    ) -> Result<(), NetdiskError> {
        let query = [
            ("shareid", params.share_id.as_str()),
            ("from", params.share_uk.as_str()),
            ("ondup", "newcopy"),
            ("async", "1"),
        ];
        let form = [
            ("fsidlist", id_list(&params.fs_ids)),
            ("path", folder.to_string()),
        ];
        self.post_form("share/transfer", &query, &form, "转存文件失败")
            .await?;
        Ok(())
    }

    async fn delete_paths(&self, paths: &[String]) -> Result<(), NetdiskError> {
        let form = [("filelist", serde_json::to_string(paths)?)];
        let query = [("opera", "delete"), ("async", "0"), ("onnest", "fail")];
        self.post_form("api/filemanager", &query, &form, "删除文件失败")
            .await?;
        Ok(())
    }

    async fn create_share(
        &self,
        fs_ids: &[String],
        period: i32,
    ) -> Result<ShareSetResponse, NetdiskError> {
        let form = [
            ("fid_list", id_list(fs_ids)),
            ("schannel", "4".to_string()),
            ("channel_list", "[]".to_string()),
            ("period", period.to_string()),
            ("pwd", SHARE_PASSWORD.to_string()),
        ];
        let value = self
            .post_form("share/set", &[], &form, "创建分享失败")
            .await?;
        let share: ShareSetResponse = serde_json::from_value(value)?;
        if share.link.is_empty() {
            return Err(NetdiskError::Parse("创建分享未返回链接".to_string()));
        }
        Ok(share)
    }
}

#[async_trait]
impl Netdisk for BaiduClient {
    fn pan_type(&self) -> PanType {
        PanType::Baidu
    }

    fn is_configured(&mut self) -> bool {
        self.ctx.refresh_credential(PanType::Baidu, &mut self.cookie)
    }

    async fn transfer(
        &mut self,
        share_url: &str,
        password: &str,
        class: ExpirationClass,
    ) -> Result<TransferReceipt, NetdiskError> {
        info!("开始百度网盘转存: {}", share_url);

        self.load_bdstoken().await?;
        if !password.is_empty() {
            self.verify_pass_code(share_url, password).await?;
        }

        let params = self.get_transfer_params(share_url).await?;
        debug!(
            "分享参数: shareid={}, uk={}, 文件数={}",
            params.share_id,
            params.share_uk,
            params.fs_ids.len()
        );

        let folder = self.ctx.policy.resolve_folder(PanType::Baidu, class);
        self.ensure_dir(&folder).await?;
        self.transfer_files(&params, &folder).await?;

        let names: HashSet<&str> = params.file_names.iter().map(String::as_str).collect();
        let saved: Vec<BaiduFile> = self
            .list_dir(&folder)
            .await?
            .into_iter()
            .filter(|f| names.contains(f.server_filename.as_str()))
            .collect();

        let entries: Vec<(String, &str)> = saved
            .iter()
            .map(|f| (f.fs_id.to_string(), f.server_filename.as_str()))
            .collect();
        let words = self.ctx.policy.banned_words(PanType::Baidu);
        let split = split_banned(entries.iter().map(|(id, name)| (id.as_str(), *name)), &words);

        if !split.banned.is_empty() {
            let banned: HashSet<&str> = split.banned.iter().map(String::as_str).collect();
            let paths: Vec<String> = saved
                .iter()
                .filter(|f| banned.contains(f.fs_id.to_string().as_str()))
                .map(|f| {
                    if f.path.is_empty() {
                        format!("{}/{}", folder.trim_end_matches('/'), f.server_filename)
                    } else {
                        f.path.clone()
                    }
                })
                .collect();
            info!("删除广告文件: count={}", paths.len());
            if let Err(e) = self.delete_paths(&paths).await {
                warn!("删除广告文件失败: {}", e);
            }
        }

        if split.kept.is_empty() {
            return Err(NetdiskError::EmptyShare);
        }

        let period = baidu_period(class);
        let share = self.create_share(&split.kept, period).await?;
        let share_url = format!("{}?pwd={}", share.link, SHARE_PASSWORD);
        info!("百度网盘转存成功: {}", share_url);

        Ok(TransferReceipt {
            title: params.file_names.first().cloned().unwrap_or_default(),
            share_url,
            password: SHARE_PASSWORD.to_string(),
            fid: split.kept.join(","),
            expired_type: share.expired_type.unwrap_or(period),
        })
    }

    async fn test_connection(&mut self) -> Result<(), NetdiskError> {
        let value = self.fetch_template_variable().await?;
        match value.get("errno").and_then(Value::as_i64) {
            Some(0) => Ok(()),
            Some(ERRNO_NOT_LOGIN) => Err(NetdiskError::CredentialExpired(
                "百度网盘Cookie已失效".to_string(),
            )),
            Some(errno) => Err(NetdiskError::api(errno, "连接失败")),
            None => Err(NetdiskError::Parse("响应格式错误，无法获取errno".to_string())),
        }
    }

    async fn delete_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        self.load_bdstoken().await?;
        let target = normalize_baidu_path(path);
        let name = target.trim_start_matches('/');

        let exists = self
            .list_dir("/")
            .await?
            .iter()
            .any(|f| f.isdir == 1 && f.server_filename == name);
        if !exists {
            return Err(NetdiskError::DirectoryNotFound(target));
        }

        self.delete_paths(&[target.clone()]).await?;
        info!("百度网盘目录已删除: {}", target);
        Ok(())
    }

    async fn create_directory(&mut self, path: &str) -> Result<(), NetdiskError> {
        self.load_bdstoken().await?;
        let target = normalize_baidu_path(path);
        self.create_dir(&target).await?;
        info!("百度网盘目录已创建: {}", target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_surl() {
        assert_eq!(
            extract_surl("https://pan.baidu.com/s/1AbCdEfGhIjKlMnOpQrStUvW?pwd=1234").unwrap(),
            "AbCdEfGhIjKlMnOpQrStUvW"
        );
        assert_eq!(
            extract_surl("https://pan.baidu.com/s/1Short").unwrap(),
            "Short"
        );
        assert!(matches!(
            extract_surl("https://pan.baidu.com/s/"),
            Err(NetdiskError::InvalidShareUrl(_))
        ));
    }

    #[test]
    fn test_merge_cookie_replaces_in_place() {
        let merged = merge_cookie("BDUSS=abc; BDCLND=old; STOKEN=xyz", "BDCLND", "new");
        assert_eq!(merged, "BDUSS=abc; BDCLND=new; STOKEN=xyz");
    }

    #[test]
    fn test_merge_cookie_appends() {
        let merged = merge_cookie("BDUSS=abc;STOKEN=xyz;", "BDCLND", "rand%2Bsk");
        assert_eq!(merged, "BDUSS=abc; STOKEN=xyz; BDCLND=rand%2Bsk");
        assert_eq!(merge_cookie("", "BDCLND", "v"), "BDCLND=v");
    }

    #[test]
    fn test_parse_share_page() {
        let html = r#"<script>locals.mset({"shareid":48213,"share_uk":"110293","file_list":[
            {"fs_id":1001,"server_filename":"电影.mkv","isdir":0},
            {"fs_id":1002,"server_filename":"电影.mkv","isdir":0},
            {"fs_id":1003,"server_filename":"字幕.srt","isdir":0}]})</script>"#;
        let params = parse_share_page(html).unwrap();
        assert_eq!(params.share_id, "48213");
        assert_eq!(params.share_uk, "110293");
        assert_eq!(params.fs_ids, vec!["1001", "1002", "1003"]);
        assert_eq!(params.file_names, vec!["电影.mkv", "字幕.srt"]);
    }

    #[test]
    fn test_parse_share_page_missing_fields() {
        let html = r#"<html><body>"shareid":1,"</body></html>"#;
        assert!(matches!(parse_share_page(html), Err(NetdiskError::Parse(_))));
    }

    #[test]
    fn test_extract_bdstoken() {
        let ok = json!({"errno": 0, "result": {"bdstoken": "tok123", "uk": 1}});
        assert_eq!(extract_bdstoken(&ok).unwrap(), "tok123");

        let array_result = json!({"errno": 0, "result": []});
        assert!(matches!(
            extract_bdstoken(&array_result),
            Err(NetdiskError::Parse(_))
        ));

        let failed = json!({"errno": -6});
        assert!(matches!(
            extract_bdstoken(&failed),
            Err(NetdiskError::Api { code: -6, .. })
        ));
    }

    #[test]
    fn test_check_errno() {
        assert!(matches!(
            check_errno("<!DOCTYPE html><html></html>", "转存文件失败"),
            Err(NetdiskError::VerificationRequired)
        ));
        assert!(matches!(
            check_errno(r#"{"errno":-6}"#, "转存文件失败"),
            Err(NetdiskError::CredentialExpired(_))
        ));
        assert!(matches!(
            check_errno(r#"{"errno":12,"show_msg":"文件已存在"}"#, "转存文件失败"),
            Err(NetdiskError::Api { code: 12, .. })
        ));
        let value = check_errno(r#"{"errno":0,"link":"https://pan.baidu.com/s/1x"}"#, "创建分享失败").unwrap();
        assert_eq!(value["link"], "https://pan.baidu.com/s/1x");
    }

    #[test]
    fn test_period_and_id_list() {
        assert_eq!(baidu_period(ExpirationClass::Permanent), 0);
        assert_eq!(baidu_period(ExpirationClass::Temporary), 7);
        assert_eq!(id_list(&["1".to_string(), "2".to_string()]), "[1,2]");
    }

    #[test]
    fn test_share_set_response() {
        let share: ShareSetResponse = serde_json::from_value(json!({
            "errno": 0, "link": "https://pan.baidu.com/s/1abc", "expiredType": 7
        }))
        .unwrap();
        assert_eq!(share.expired_type, Some(7));
    }
}
