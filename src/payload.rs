use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::base64::Base64;

/// 載荷驗證失敗。
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid payload: {0}")]
pub struct PayloadError(pub String);

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 每個載荷都帶有 `resource` 欄位，指出伺服器上對應的資源名稱。
pub trait PayloadT: Serialize + for<'de> Deserialize<'de> {
    /// 將載荷轉換成 JSON 格式的字串。
    ///
    /// # 錯誤
    ///
    /// 若序列化失敗，則回傳 [`serde_json::Error`]。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 將載荷轉換成 JSON 值，交給簽名流程。
    fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// 將載荷先轉換成 JSON 字串，再以 Base64 進行編碼。
    fn to_base64(&self) -> Result<Base64, serde_json::Error> {
        let json_string = self.to_json_string()?;
        Ok(Base64::new(json_string.as_bytes()))
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<(), PayloadError>;
}

/// 補上 `mailto:` 前綴，已包含時不重複補充。
fn mailto(contact: &str) -> String {
    if contact.starts_with("mailto:") || contact.starts_with("tel:") {
        contact.to_owned()
    } else {
        format!("mailto:{contact}")
    }
}

/// 建立新註冊（`new-reg`）的載荷。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRegPayload {
    resource: String,
    #[serde(default)]
    contact: Vec<String>,
}

impl NewRegPayload {
    /// 傳入的每個聯絡方式會自動補足 `mailto:` 前綴。
    pub fn new(contacts: &[String]) -> Self {
        NewRegPayload {
            resource: "new-reg".to_owned(),
            contact: contacts.iter().map(|c| mailto(c)).collect(),
        }
    }

    pub fn contact(&self) -> &[String] {
        &self.contact
    }
}

impl PayloadT for NewRegPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.contact.iter().any(|c| c.trim_start_matches("mailto:").is_empty()) {
            return Err(PayloadError("Contact entries cannot be empty".into()));
        }
        Ok(())
    }
}

/// 讀取或更新既有註冊（`reg`）的載荷。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegPayload {
    resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    agreement: Option<String>,
}

impl RegPayload {
    /// 不帶任何變更，用於讀取帳戶目前的狀態。
    pub fn fetch() -> Self {
        RegPayload {
            resource: "reg".to_owned(),
            agreement: None,
        }
    }

    /// 同意指定的服務條款。
    pub fn agree(terms_of_service: &str) -> Self {
        RegPayload {
            resource: "reg".to_owned(),
            agreement: Some(terms_of_service.to_owned()),
        }
    }
}

impl PayloadT for RegPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        match &self.agreement {
            Some(url) if url.is_empty() => Err(PayloadError("Agreement URL cannot be empty".into())),
            _ => Ok(()),
        }
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱等資訊。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(domain: &str) -> Self {
        Identifier {
            type_: "dns".to_owned(),
            value: domain.to_owned(),
        }
    }
}

/// 為單一域名申請授權（`new-authz`）的載荷。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuthzPayload {
    resource: String,
    identifier: Identifier,
}

impl NewAuthzPayload {
    pub fn new(domain: &str) -> Self {
        NewAuthzPayload {
            resource: "new-authz".to_owned(),
            identifier: Identifier::dns(domain),
        }
    }
}

impl PayloadT for NewAuthzPayload {
    /// 驗證授權載荷：
    ///
    /// - 類型必須為 `"dns"`。
    /// - 域名不得為空，也不得包含空白。
    fn validate(&self) -> Result<(), PayloadError> {
        if self.identifier.type_ != "dns" {
            return Err(PayloadError("Identifier type must be 'dns'".into()));
        }
        let value = &self.identifier.value;
        if value.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(PayloadError(format!("Invalid domain name: {value:?}")));
        }
        Ok(())
    }
}

/// 回應挑戰的載荷，告知伺服器可以開始驗證。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeResponsePayload {
    resource: String,
    #[serde(rename = "type")]
    challenge_type: String,
    #[serde(rename = "keyAuthorization")]
    key_authorization: String,
}

impl ChallengeResponsePayload {
    pub fn new(challenge_type: &str, key_authorization: &str) -> Self {
        ChallengeResponsePayload {
            resource: "challenge".to_owned(),
            challenge_type: challenge_type.to_owned(),
            key_authorization: key_authorization.to_owned(),
        }
    }
}

impl PayloadT for ChallengeResponsePayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if !self.key_authorization.contains('.') {
            return Err(PayloadError("Key authorization must be token.thumbprint".into()));
        }
        Ok(())
    }
}

/// 申請簽發憑證（`new-cert`）的載荷。
///
/// 該載荷主要包含 DER 格式 CSR 的 Base64 URL 安全編碼字串。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCertPayload {
    resource: String,
    csr: String,
}

impl NewCertPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        NewCertPayload {
            resource: "new-cert".to_owned(),
            csr: Base64::new(csr_der).base64_url(),
        }
    }
}

impl PayloadT for NewCertPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.csr.is_empty() {
            return Err(PayloadError("CSR cannot be empty".into()));
        }
        Ok(())
    }
}

/// 撤銷憑證（`revoke-cert`）的載荷。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevokeCertPayload {
    resource: String,
    certificate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<u8>,
}

impl RevokeCertPayload {
    pub fn new(cert_der: &[u8], reason: Option<u8>) -> Self {
        RevokeCertPayload {
            resource: "revoke-cert".to_owned(),
            certificate: Base64::new(cert_der).base64_url(),
            reason,
        }
    }
}

impl PayloadT for RevokeCertPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.certificate.is_empty() {
            return Err(PayloadError("Certificate cannot be empty".into()));
        }
        Ok(())
    }
}
