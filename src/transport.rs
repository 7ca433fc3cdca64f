use std::{fmt, time::Duration};

use reqwest::{
    blocking::Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT},
    Method,
};
use thiserror::Error;

/// 尚未取得任何 HTTP 回應之前發生的錯誤（連線、逾時、DNS）。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Connection failed: {0}")]
    Connection(String),
}

type Result<T> = std::result::Result<T, TransportError>;

/// 一次 HTTP 往返的結果。
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// HTTP 狀態碼。
    pub status: u16,
    /// 回應標頭。
    pub headers: HeaderMap,
    /// 原始回應主體。
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 依名稱取得第一個標頭值（名稱不分大小寫）。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// 同步的請求／回應能力，所有與伺服器的往返都透過它進行。
///
/// 實作不得自行重試或退避；那是協議引擎的責任。
pub trait Transport: Send + Sync + fmt::Debug {
    /// 送出請求並回傳狀態、標頭與主體。
    fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse>;
}

/// JWS 請求主體的 Content-Type。
pub const JOSE_JSON: &str = "application/jose+json";

/// 以 `reqwest::blocking` 實作的預設傳輸層。
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// 預設的連線與讀取逾時。
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// 使用預設逾時建立傳輸層。
    pub fn new() -> Result<Self> {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    /// 指定逾時建立傳輸層。
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn request(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse> {
        let mut headers = headers.clone();
        headers.entry(USER_AGENT).or_insert(HeaderValue::from_static(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        )));
        if body.is_some() {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(JOSE_JSON));
        }

        log::trace!("{method} {url}");

        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body.to_vec());
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
