//! 回應分類：所有伺服器回應都先經過 [`classify`]，
//! 業務邏輯只會看到成功信封或結構化的 [`Problem`]。

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_TYPE, LINK, LOCATION, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 伺服器錯誤類型 URN 的兩種前綴（舊版與 RFC 8555）。
const ACME_ERROR_PREFIXES: [&str; 2] = ["urn:acme:error:", "urn:ietf:params:acme:error:"];

/// 無法解析的錯誤回應所使用的類型。
pub const HTTP_PROBLEM_TYPE: &str = "urn:acme:client:error:http";

/// 伺服器回報的問題（RFC 7807 problem document）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    /// URN 形式的錯誤類型。
    #[serde(rename = "type")]
    pub problem_type: String,

    /// 人類可讀的說明。
    #[serde(default)]
    pub detail: String,

    /// HTTP 狀態碼；內文未提供時取回應的狀態碼。
    #[serde(default)]
    pub status: u16,

    /// 回應中的 `Location` 標頭，例如重複註冊時指向既有帳戶。
    #[serde(skip)]
    pub location: Option<String>,
}

/// 錯誤類型的分類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    BadNonce,
    Malformed,
    Unauthorized,
    RateLimited,
    BadCsr,
    Connection,
    Dns,
    Tls,
    UnknownHost,
    ServerInternal,
    InvalidEmail,
    AgreementRequired,
    RejectedIdentifier,
    UnsupportedIdentifier,
    Caa,
    Other,
}

impl Problem {
    pub fn new(problem_type: impl Into<String>, detail: impl Into<String>, status: u16) -> Self {
        Self {
            problem_type: problem_type.into(),
            detail: detail.into(),
            status,
            location: None,
        }
    }

    /// 去除前綴後的錯誤名稱，例如 `badNonce`。
    pub fn short_type(&self) -> &str {
        ACME_ERROR_PREFIXES
            .iter()
            .find_map(|prefix| self.problem_type.strip_prefix(prefix))
            .unwrap_or(&self.problem_type)
    }

    pub fn kind(&self) -> ProblemKind {
        match self.short_type() {
            "badNonce" => ProblemKind::BadNonce,
            "malformed" => ProblemKind::Malformed,
            "unauthorized" => ProblemKind::Unauthorized,
            "rateLimited" => ProblemKind::RateLimited,
            "badCSR" => ProblemKind::BadCsr,
            "connection" => ProblemKind::Connection,
            "dns" => ProblemKind::Dns,
            "tls" => ProblemKind::Tls,
            "unknownHost" => ProblemKind::UnknownHost,
            "serverInternal" => ProblemKind::ServerInternal,
            "invalidEmail" | "invalidContact" => ProblemKind::InvalidEmail,
            "agreementRequired" | "userActionRequired" => ProblemKind::AgreementRequired,
            "rejectedIdentifier" => ProblemKind::RejectedIdentifier,
            "unsupportedIdentifier" => ProblemKind::UnsupportedIdentifier,
            "caa" => ProblemKind::Caa,
            _ => ProblemKind::Other,
        }
    }

    /// Returns true if problem type is "badNonce".
    pub fn is_bad_nonce(&self) -> bool {
        self.kind() == ProblemKind::BadNonce
    }

    /// 重複註冊：409 並附帶指向既有帳戶的 `Location`。
    pub fn is_already_registered(&self) -> bool {
        self.status == 409 && self.location.is_some()
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{} ({})", self.problem_type, self.status)
        } else {
            write!(f, "{} ({}): {}", self.problem_type, self.status, self.detail)
        }
    }
}

/// 成功回應，附帶解析過的 JSON（若主體是 JSON）。
#[derive(Debug, Clone)]
pub struct SuccessEnvelope {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub json: Option<Value>,
}

impl SuccessEnvelope {
    /// `Location` 標頭。
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// 第一個符合 `rel` 的 `Link` 目標。
    pub fn link(&self, rel: &str) -> Option<String> {
        links(&self.headers)
            .into_iter()
            .find(|(_, r)| r == rel)
            .map(|(url, _)| url)
    }

    /// 所有 `Link` 標頭，格式為 `(url, rel)`。
    pub fn links(&self) -> Vec<(String, String)> {
        links(&self.headers)
    }

    /// `Retry-After` 標頭，支援秒數與 HTTP 日期兩種形式。
    pub fn retry_after(&self) -> Option<Duration> {
        let value = self.headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
        (at - Utc::now()).to_std().ok()
    }

    /// 將 JSON 主體反序列化為指定型別。
    pub fn parse<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// 解析 `Link` 標頭，可同時處理多個標頭與以逗號分隔的多個值。
pub fn links(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(split_link_values)
        .filter_map(|entry| {
            let (url, params) = entry.trim().strip_prefix('<')?.split_once('>')?;
            let rel = params.split(';').find_map(|param| {
                let (name, value) = param.split_once('=')?;
                (name.trim() == "rel").then(|| value.trim().trim_matches('"').to_owned())
            })?;
            Some((url.to_owned(), rel))
        })
        .collect()
}

/// 以不在 `<…>` 內的逗號切分一個 `Link` 標頭值。
fn split_link_values(value: &str) -> Vec<&str> {
    let mut values = Vec::new();
    let mut in_url = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '<' => in_url = true,
            '>' => in_url = false,
            ',' if !in_url => {
                values.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    values.push(&value[start..]);
    values
}

/// 依 HTTP 狀態與主體將回應分類為成功或問題。
///
/// 這是業務邏輯得知失敗的唯一入口。
pub fn classify(status: u16, headers: &HeaderMap, body: &[u8]) -> Result<SuccessEnvelope, Problem> {
    if (200..300).contains(&status) {
        return Ok(SuccessEnvelope {
            status,
            headers: headers.clone(),
            body: body.to_vec(),
            json: serde_json::from_slice(body).ok(),
        });
    }

    let location = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);

    let is_problem_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/problem+json"));

    let parsed = serde_json::from_slice::<Problem>(body)
        .ok()
        .filter(|p| is_problem_json || !p.problem_type.is_empty());

    let mut problem = parsed.unwrap_or_else(|| Problem {
        problem_type: HTTP_PROBLEM_TYPE.to_owned(),
        detail: format!("{status} body: {}", String::from_utf8_lossy(body)),
        status,
        location: None,
    });

    if problem.status == 0 {
        problem.status = status;
    }
    problem.location = location;

    Err(problem)
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn test_success_with_json() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("http://ca/reg/1"));
        let env = classify(201, &headers, br#"{"id": 1}"#).unwrap();

        assert_eq!(env.location(), Some("http://ca/reg/1"));
        assert_eq!(env.json.unwrap()["id"], 1);
    }

    #[test]
    fn test_success_with_binary_body() {
        let env = classify(201, &HeaderMap::new(), &[0x30, 0x82, 0x01]).unwrap();
        assert!(env.json.is_none());
        assert_eq!(env.body, [0x30, 0x82, 0x01]);
    }

    #[test]
    fn test_problem_body() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/problem+json"));
        let body = br#"{"type":"urn:acme:error:rateLimited","detail":"Too many certificates","status":429}"#;

        let problem = classify(429, &headers, body).unwrap_err();
        assert_eq!(problem.problem_type, "urn:acme:error:rateLimited");
        assert_eq!(problem.detail, "Too many certificates");
        assert_eq!(problem.status, 429);
        assert_eq!(problem.kind(), ProblemKind::RateLimited);
    }

    #[test]
    fn test_problem_without_status_takes_http_status() {
        let body = br#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"JWS has invalid anti-replay nonce"}"#;
        let problem = classify(400, &HeaderMap::new(), body).unwrap_err();
        assert_eq!(problem.status, 400);
        assert!(problem.is_bad_nonce());
    }

    #[test]
    fn test_unparseable_error_body() {
        let problem = classify(502, &HeaderMap::new(), b"<html>Bad Gateway</html>").unwrap_err();
        assert_eq!(problem.problem_type, HTTP_PROBLEM_TYPE);
        assert_eq!(problem.detail, "502 body: <html>Bad Gateway</html>");
        assert_eq!(problem.status, 502);
        assert_eq!(problem.kind(), ProblemKind::Other);
    }

    #[test]
    fn test_conflict_keeps_location() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("http://ca/reg/7"));
        let body = br#"{"type":"urn:acme:error:malformed","detail":"Registration key is already in use","status":409}"#;

        let problem = classify(409, &headers, body).unwrap_err();
        assert!(problem.is_already_registered());
        assert_eq!(problem.location.as_deref(), Some("http://ca/reg/7"));
    }

    #[test]
    fn test_links() {
        let mut headers = HeaderMap::new();
        headers.append(
            LINK,
            HeaderValue::from_static(r#"<http://ca/new-authz>;rel="next", <http://ca/terms>;rel="terms-of-service""#),
        );
        headers.append(LINK, HeaderValue::from_static("<http://ca/issuer>; rel=up"));
        let env = classify(200, &headers, b"").unwrap();

        assert_eq!(env.link("terms-of-service").as_deref(), Some("http://ca/terms"));
        assert_eq!(env.link("next").as_deref(), Some("http://ca/new-authz"));
        assert_eq!(env.link("up").as_deref(), Some("http://ca/issuer"));
        assert_eq!(env.links().len(), 3);
    }

    #[test]
    fn test_links_with_commas_in_url() {
        let mut headers = HeaderMap::new();
        headers.append(
            LINK,
            HeaderValue::from_static(r#"<http://ca/terms?v=1,2;x>;rel="terms-of-service", <http://ca/a,b>;rel=up"#),
        );
        let env = classify(200, &headers, b"").unwrap();

        assert_eq!(env.link("terms-of-service").as_deref(), Some("http://ca/terms?v=1,2;x"));
        assert_eq!(env.link("up").as_deref(), Some("http://ca/a,b"));
        assert_eq!(env.links().len(), 2);
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        let env = classify(202, &headers, b"").unwrap();
        assert_eq!(env.retry_after(), Some(Duration::from_secs(3)));
    }
}
