use std::sync::{Mutex, PoisonError};

use reqwest::{header::HeaderMap, Method};
use thiserror::Error;

use crate::transport::{Transport, TransportError};

/// 回應中攜帶 nonce 的標頭名稱。
pub const REPLAY_NONCE: &str = "Replay-Nonce";

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug)]
pub enum NonceError {
    /// 取得 nonce 的請求失敗。
    #[error("Failed to make request: {0}")]
    RequestFailed(#[from] TransportError),
    /// 當回應中缺少 `Replay-Nonce` 標頭時回傳此錯誤。
    #[error("No Replay-Nonce header found in response")]
    NoNonceHeader,
    /// 從未取得過 nonce。
    #[error("Nonce store has not been primed")]
    Empty,
}

type Result<T> = std::result::Result<T, NonceError>;

/// 單一工作階段內的 nonce 狀態。
///
/// 同一時間最多只有一個「目前」的 nonce；更新以最後寫入為準，
/// 被送出的請求取走之後即不再存在，因此不會重複使用。
#[derive(Debug)]
pub struct NonceStore {
    nonce_url: String,
    current: Mutex<Option<String>>,
}

impl NonceStore {
    /// 建立空的 nonce 儲存，`nonce_url` 為需要主動取得 nonce 時 `HEAD` 的位址。
    pub fn new(nonce_url: impl Into<String>) -> Self {
        Self {
            nonce_url: nonce_url.into(),
            current: Mutex::new(None),
        }
    }

    /// 目前的 nonce，不取走。
    pub fn current(&self) -> Result<String> {
        self.slot().clone().ok_or(NonceError::Empty)
    }

    /// 從回應標頭擷取新的 nonce；nonce 是不透明的字串，沒有或為空時不做任何事。
    pub fn update(&self, headers: &HeaderMap) {
        let Some(value) = headers
            .get(REPLAY_NONCE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        else {
            return;
        };

        log::trace!("Extracting new nonce");
        *self.slot() = Some(value.to_owned());
    }

    /// 主動向伺服器取得 nonce。
    pub fn prime(&self, transport: &dyn Transport) -> Result<()> {
        log::debug!("Request new nonce");
        let response = transport.request(Method::HEAD, &self.nonce_url, &HeaderMap::new(), None)?;

        self.update(&response.headers);
        if self.slot().is_none() {
            return Err(NonceError::NoNonceHeader);
        }
        Ok(())
    }

    /// 取走目前的 nonce 供一個即將送出的請求使用；若尚無 nonce 則先主動取得。
    pub fn take(&self, transport: &dyn Transport) -> Result<String> {
        if let Some(nonce) = self.slot().take() {
            log::trace!("Use previous nonce");
            return Ok(nonce);
        }

        self.prime(transport)?;
        self.slot().take().ok_or(NonceError::NoNonceHeader)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
