//! 此模組提供 JSON Web Signature (JWS) 的建立，
//! 每個送往 ACME 伺服器的請求主體都由 [`sign`] 產生。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    base64::Base64,
    protection::ProtectedHeader,
    signature::{SignatureError, SigningCapability},
};

type Result<T> = std::result::Result<T, SignatureError>;

/// 表示一個扁平化 JSON 序列的 JWS 物件。
///
/// 此物件包含三個部分，皆為 Base64 URL 安全編碼後的字串：
/// - `protected`：保護標頭
/// - `payload`：負載資料
/// - `signature`：對 `protected.payload` 的簽名
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    protected: String,
    payload: String,
    signature: String,
}

impl Jws {
    /// 以已編碼的三個區段建立 `Jws`。
    pub fn new(protected: &Base64, payload: &Base64, signature: &Base64) -> Self {
        Jws {
            protected: protected.base64_url(),
            payload: payload.base64_url(),
            signature: signature.base64_url(),
        }
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串，作為請求主體。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 解碼保護標頭。
    pub fn protected_header(&self) -> Result<ProtectedHeader> {
        let raw = Base64::from_url(&self.protected)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;
        Ok(serde_json::from_slice(raw.as_bytes())?)
    }

    /// 解碼負載。
    pub fn payload(&self) -> Result<Value> {
        let raw = Base64::from_url(&self.payload)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;
        Ok(serde_json::from_slice(raw.as_bytes())?)
    }

    /// 簽名位元組。
    pub fn signature(&self) -> Result<Vec<u8>> {
        Base64::from_url(&self.signature)
            .map(|b| b.as_bytes().to_vec())
            .map_err(|e| SignatureError::SigningError(e.to_string()))
    }

    /// 簽名輸入，即 `protected.payload` 的 ASCII 位元組。
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.protected, self.payload)
    }
}

/// 以帳戶金鑰與 nonce 對負載簽名，產生可直接作為請求主體的 [`Jws`]。
///
/// 此函式不涉及網路或任何狀態；相同輸入搭配確定性的簽名能力會產生相同的輸出。
///
/// # Errors
///
/// 金鑰無法簽名或序列化失敗時返回 [`SignatureError`]。
pub fn sign(
    payload: &Value,
    signer: &dyn SigningCapability,
    nonce: &str,
    url: Option<&str>,
) -> Result<Jws> {
    let protected = ProtectedHeader::new(signer, nonce, url)?.to_base64()?;
    let payload = Base64::new(serde_json::to_string(payload)?.as_bytes());

    let signing_input = format!("{}.{}", protected.base64_url(), payload.base64_url());
    let signature = Base64::new(signer.sign(signing_input.as_bytes())?);

    Ok(Jws::new(&protected, &payload, &signature))
}
