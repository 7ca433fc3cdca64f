use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    base64::Base64,
    signature::{SignatureError, SigningCapability},
};

/// 自定義的結果型別，錯誤類型為 [`SignatureError`]
type Result<T> = std::result::Result<T, SignatureError>;

/// 表示數字簽章保護頭部的資料結構，
/// 此結構體可序列化為 JSON，並可轉換為 Base64 編碼字串。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    pub alg: String,
    /// 帳戶公鑰
    pub jwk: JsonValue,
    /// 用於防止重放攻擊的隨機數
    pub nonce: String,
    /// 請求目標 URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ProtectedHeader {
    /// 根據簽名能力與 nonce 建立保護頭。
    ///
    /// # Errors
    ///
    /// 若產生 JWK 失敗，則返回 [`SignatureError`]。
    pub fn new(signer: &dyn SigningCapability, nonce: &str, url: Option<&str>) -> Result<Self> {
        Ok(Self {
            alg: signer.algorithm().to_owned(),
            jwk: signer.jwk()?.to_value()?,
            nonce: nonce.to_owned(),
            url: url.map(ToOwned::to_owned),
        })
    }

    /// 將 [`ProtectedHeader`] 序列化後轉換為 Base64 格式。
    ///
    /// # Errors
    ///
    /// 如果序列化過程中發生錯誤，將返回 [`SignatureError::SerializationError`]。
    pub fn to_base64(&self) -> Result<Base64> {
        let json_str = serde_json::to_string(self)?;
        Ok(Base64::new(json_str.as_bytes()))
    }
}

impl std::fmt::Display for ProtectedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        serde_json::to_string(self)
            .map_err(|_| std::fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}
