use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use thiserror::Error;

/// 錯誤類型，用於描述 Base64 解碼過程中的各種錯誤情形。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 當遇到無效字符時返回此錯誤，包含該無效字符的 ASCII 值。
    #[error("Invalid character: {0}")]
    InvalidCharacter(u8),

    /// 當 Base64 字符串的填充（`=`）不符合規範時返回此錯誤。
    #[error("Invalid padding")]
    InvalidPadding,

    /// 當 Base64 字符串的長度不符合要求時返回此錯誤。
    #[error("Invalid length")]
    InvalidLength,
}

impl From<base64::DecodeError> for DecodeError {
    fn from(err: base64::DecodeError) -> Self {
        match err {
            base64::DecodeError::InvalidByte(_, byte) => DecodeError::InvalidCharacter(byte),
            base64::DecodeError::InvalidPadding => DecodeError::InvalidPadding,
            base64::DecodeError::InvalidLastSymbol(_, byte) => DecodeError::InvalidCharacter(byte),
            base64::DecodeError::InvalidLength(_) => DecodeError::InvalidLength,
        }
    }
}

/// 以位元組保存原始資料，並提供標準與 URL 安全兩種 Base64 表示。
///
/// ACME 協議中所有 JWS 區段、憑證與 CSR 皆以無填充的 URL 安全 Base64 傳輸，
/// 因此 [`Base64::base64_url`] 是最常用的輸出。
///
/// # 示例
///
/// ```
/// # use racme_v1::base64::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.as_str(), "SGVsbG8sIFdvcmxkIQ==");
/// assert_eq!(b64.base64_url(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    raw: Vec<u8>,
    encoded: String,
}

impl Base64 {
    /// 根據輸入數據生成 Base64 編碼。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        let raw = input.as_ref().to_vec();
        let encoded = STANDARD.encode(&raw);
        Self { raw, encoded }
    }

    /// 根據已編碼的標準 Base64 字符串生成實例。
    ///
    /// # 錯誤
    ///
    /// 字符串不符合標準 Base64 規範時返回 [`DecodeError`]。
    pub fn from_encoded(encoded: &str) -> Result<Self, DecodeError> {
        if encoded.len() % 4 != 0 {
            return Err(DecodeError::InvalidLength);
        }
        let raw = STANDARD.decode(encoded)?;
        Ok(Self {
            raw,
            encoded: encoded.to_string(),
        })
    }

    /// 從 URL 安全、無填充的 Base64 字符串生成實例。
    ///
    /// # 錯誤
    ///
    /// 同 [`from_encoded`](Self::from_encoded)。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        let raw = URL_SAFE_NO_PAD.decode(url_encoded.trim_end_matches('='))?;
        Ok(Self::new(raw))
    }

    /// 返回原始二進制數據。
    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        Ok(self.raw.clone())
    }

    /// 返回 URL 安全且不含填充符號的 Base64 字符串。
    pub fn base64_url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.raw)
    }

    /// 返回標準 Base64 編碼字符串的引用。
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// 原始位元組。
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}
