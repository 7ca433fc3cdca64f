use openssl::{
    bn::BigNumContext,
    pkey::{Id, PKeyRef, Public},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::base64::Base64;

/// JWK相關操作的錯誤類型。
///
/// 此錯誤類型涵蓋JWK產生與序列化過程中可能發生的錯誤，
/// 並提供對應的錯誤訊息以輔助除錯。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的演算法。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversionError(String),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// JSON Web Key (JWK) 的封裝，支援 RSA 與 P-256 兩種公鑰。
///
/// 此值會原封不動地放進每個請求的受保護標頭，
/// 同時也是帳戶 thumbprint 的計算來源。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// RSA 格式的 JWK。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
    /// 橢圓曲線格式的 JWK。
    #[serde(rename = "EC")]
    Ec(EcJwk),
}

/// RSA 格式的 JWK 結構，包含必要的公開參數。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    e: String,
    n: String,
}

/// EC 格式的 JWK 結構。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    crv: String,
    x: String,
    y: String,
}

impl RsaJwk {
    fn from_public_key(key: &PKeyRef<Public>) -> Result<Self, JwkError> {
        let rsa = key
            .rsa()
            .map_err(|e| JwkError::KeyConversionError(e.to_string()))?;

        Ok(RsaJwk {
            e: Base64::new(rsa.e().to_vec()).base64_url(),
            n: Base64::new(rsa.n().to_vec()).base64_url(),
        })
    }
}

impl EcJwk {
    /// P-256 座標長度（位元組）。
    const COORDINATE_LEN: i32 = 32;

    fn from_public_key(key: &PKeyRef<Public>) -> Result<Self, JwkError> {
        let convert = |e: openssl::error::ErrorStack| JwkError::KeyConversionError(e.to_string());

        let ec = key.ec_key().map_err(convert)?;
        let mut ctx = BigNumContext::new().map_err(convert)?;
        let mut x = openssl::bn::BigNum::new().map_err(convert)?;
        let mut y = openssl::bn::BigNum::new().map_err(convert)?;
        ec.public_key()
            .affine_coordinates_gfp(ec.group(), &mut x, &mut y, &mut ctx)
            .map_err(convert)?;

        Ok(EcJwk {
            crv: "P-256".to_owned(),
            x: Base64::new(x.to_vec_padded(Self::COORDINATE_LEN).map_err(convert)?).base64_url(),
            y: Base64::new(y.to_vec_padded(Self::COORDINATE_LEN).map_err(convert)?).base64_url(),
        })
    }
}

impl Jwk {
    /// 根據公鑰建立對應的 JWK。
    ///
    /// # 返回
    ///
    /// 成功時返回對應類型的 `Jwk`，金鑰型別不受支援時返回 `JwkError::UnsupportedAlgorithm`。
    pub fn from_public_key(key: &PKeyRef<Public>) -> Result<Self, JwkError> {
        match key.id() {
            Id::RSA => Ok(Jwk::Rsa(RsaJwk::from_public_key(key)?)),
            Id::EC => Ok(Jwk::Ec(EcJwk::from_public_key(key)?)),
            other => Err(JwkError::UnsupportedAlgorithm(format!("{other:?}"))),
        }
    }

    /// 將 JWK 序列化為 JSON 值，用於受保護標頭。
    pub fn to_value(&self) -> Result<Value, JwkError> {
        serde_json::to_value(self).map_err(JwkError::from)
    }

    /// 產生計算 thumbprint 用的正規 JSON：只含必要成員，且依字典順序排列、無空白。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        // preserve_order 已啟用，插入順序即輸出順序
        match self {
            Jwk::Rsa(jwk) => {
                map.insert("e".to_string(), Value::String(jwk.e.clone()));
                map.insert("kty".to_string(), Value::String("RSA".to_string()));
                map.insert("n".to_string(), Value::String(jwk.n.clone()));
            }
            Jwk::Ec(jwk) => {
                map.insert("crv".to_string(), Value::String(jwk.crv.clone()));
                map.insert("kty".to_string(), Value::String("EC".to_string()));
                map.insert("x".to_string(), Value::String(jwk.x.clone()));
                map.insert("y".to_string(), Value::String(jwk.y.clone()));
            }
        }

        serde_json::to_string(&Value::Object(map)).map_err(JwkError::from)
    }
}
