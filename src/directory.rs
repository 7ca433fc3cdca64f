use reqwest::{header::HeaderMap, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    nonce::NonceStore,
    problem::{classify, Problem},
    transport::{Transport, TransportError},
};

/// 表示處理目錄操作時可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// JSON 解析錯誤，通常是缺少必要的資源。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// HTTP 請求錯誤。
    #[error("Request error: {0}")]
    Transport(#[from] TransportError),
    /// 伺服器回報問題。
    #[error("Server problem: {0}")]
    Problem(Problem),
}

/// 簡化目錄操作結果的型別。
type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// 目錄中的資源名稱。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    NewReg,
    NewAuthz,
    NewCert,
    RevokeCert,
    KeyChange,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::NewReg => "new-reg",
            Resource::NewAuthz => "new-authz",
            Resource::NewCert => "new-cert",
            Resource::RevokeCert => "revoke-cert",
            Resource::KeyChange => "key-change",
        }
    }
}

/// 目錄的 `meta` 物件。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DirectoryMeta {
    /// 目前的服務條款 URL。
    #[serde(rename = "terms-of-service", default)]
    pub terms_of_service: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(rename = "caa-identities", default)]
    pub caa_identities: Vec<String>,
}

/// 表示伺服器的資源目錄，包含註冊、授權、簽發與撤銷憑證的 URL。
///
/// 取得之後即不再變動。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Directory {
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "new-reg")]
    pub new_reg: String,
    /// 用於申請域名授權的 API 路徑。
    #[serde(rename = "new-authz")]
    pub new_authz: String,
    /// 用於簽發憑證的 API 路徑。
    #[serde(rename = "new-cert")]
    pub new_cert: String,
    /// 用於撤銷憑證的 API 路徑。
    #[serde(rename = "revoke-cert")]
    pub revoke_cert: String,
    /// 金鑰輪替的 API 路徑，可能不存在。
    #[serde(rename = "key-change", default, skip_serializing_if = "Option::is_none")]
    pub key_change: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

impl Directory {
    /// 依主機位址組出目錄 URL；已以 `/directory` 結尾時原樣返回。
    pub fn url_for(host: &str) -> String {
        let host = host.trim_end_matches('/');
        if host.ends_with("/directory") {
            host.to_owned()
        } else {
            format!("{host}/directory")
        }
    }

    /// 取得並解析目錄，同時以回應中的 nonce 預先填入 `nonces`。
    ///
    /// # 參數
    ///
    /// - `transport`: 傳輸層。
    /// - `url`: 目錄 URL，通常由 [`Directory::url_for`] 產生。
    /// - `nonces`: 工作階段的 nonce 儲存。
    pub fn fetch(transport: &dyn Transport, url: &str, nonces: &NonceStore) -> DirectoryResult<Self> {
        log::debug!("Fetching directory {url}");
        let response = transport.request(Method::GET, url, &HeaderMap::new(), None)?;
        nonces.update(&response.headers);

        let envelope =
            classify(response.status, &response.headers, &response.body).map_err(DirectoryError::Problem)?;
        Ok(envelope.parse()?)
    }

    /// 依資源名稱查詢 URL。
    pub fn url(&self, resource: Resource) -> Option<&str> {
        match resource {
            Resource::NewReg => Some(&self.new_reg),
            Resource::NewAuthz => Some(&self.new_authz),
            Resource::NewCert => Some(&self.new_cert),
            Resource::RevokeCert => Some(&self.revoke_cert),
            Resource::KeyChange => self.key_change.as_deref(),
        }
    }

    /// 目錄 `meta` 中的服務條款 URL。
    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.as_ref()?.terms_of_service.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test::{directory_json, reply, ScriptedTransport, BASE};

    #[test]
    fn test_url_for() {
        assert_eq!(Directory::url_for("https://ca.test"), "https://ca.test/directory");
        assert_eq!(Directory::url_for("https://ca.test/"), "https://ca.test/directory");
        assert_eq!(Directory::url_for("https://ca.test/directory"), "https://ca.test/directory");
    }

    #[test]
    fn test_fetch_parses_resources_and_primes_nonce() {
        let transport = ScriptedTransport::new(vec![reply(200).nonce("dir-nonce").json(directory_json())]);
        let nonces = NonceStore::new(Directory::url_for(BASE));

        let directory = Directory::fetch(&transport, &Directory::url_for(BASE), &nonces).unwrap();

        assert_eq!(directory.url(Resource::NewReg), Some(format!("{BASE}/acme/new-reg").as_str()));
        assert_eq!(directory.revoke_cert, format!("{BASE}/acme/revoke-cert"));
        assert_eq!(directory.url(Resource::KeyChange), None);
        assert_eq!(directory.terms_of_service(), Some(format!("{BASE}/terms").as_str()));
        assert_eq!(nonces.current().unwrap(), "dir-nonce");
    }

    #[test]
    fn test_fetch_missing_resource_is_json_error() {
        let transport = ScriptedTransport::new(vec![reply(200).json(json!({"new-reg": "http://ca/new-reg"}))]);
        let nonces = NonceStore::new("http://ca/directory");
        let result = Directory::fetch(&transport, "http://ca/directory", &nonces);
        assert!(matches!(result, Err(DirectoryError::Json(_))));
    }

    #[test]
    fn test_fetch_server_error_is_problem() {
        let transport = ScriptedTransport::new(vec![reply(503).body("maintenance")]);
        let nonces = NonceStore::new("http://ca/directory");
        match Directory::fetch(&transport, "http://ca/directory", &nonces) {
            Err(DirectoryError::Problem(p)) => assert_eq!(p.status, 503),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
