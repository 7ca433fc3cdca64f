use std::fmt;

use openssl::{
    error::ErrorStack,
    hash::{hash, MessageDigest},
};
use serde::{Deserialize, Serialize};

use crate::{base64::Base64, problem::Problem};

/// 表示 ACME 挑戰的類型，可用於選擇相應的驗證策略。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsSni01,
    TlsAlpn01,
    /// 伺服器提供但本函式庫不認識的類型。
    Other(String),
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsSni01 => "tls-sni-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for ChallengeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "http-01" => Self::Http01,
            "dns-01" => Self::Dns01,
            "tls-sni-01" => Self::TlsSni01,
            "tls-alpn-01" => Self::TlsAlpn01,
            _ => Self::Other(s),
        }
    }
}

impl From<ChallengeType> for String {
    fn from(t: ChallengeType) -> Self {
        t.as_str().to_owned()
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示 ACME 挑戰與授權的狀態，用來追蹤挑戰進展。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    #[default]
    Pending,
    Processing,
    Valid,
    Invalid,
    Revoked,
    Deactivated,
    Expired,
    #[serde(other)]
    Unknown,
}

impl ChallengeStatus {
    /// 判斷該狀態是否仍在進行中，即還需要繼續輪詢。
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// 判斷該狀態是否為失敗的終結狀態。
    pub fn is_failed(&self) -> bool {
        !self.is_in_progress() && *self != Self::Valid
    }

    /// 返回狀態對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Revoked => "revoked",
            Self::Deactivated => "deactivated",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

/// 表示一個 ACME 驗證挑戰，包含驗證所需的各項資料。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    /// 驗證挑戰的類型
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    /// 驗證挑戰的 URI
    #[serde(alias = "url")]
    pub uri: String,
    /// 挑戰 token，用於生成 key authorization
    #[serde(default)]
    pub token: String,
    /// 當前挑戰狀態
    #[serde(default)]
    pub status: ChallengeStatus,
    /// 驗證成功後可能返回的驗證時間
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,
    /// 驗證失敗時伺服器附上的問題
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    /// 挑戰所屬的域名，由授權流程填入
    #[serde(skip)]
    pub domain: String,
}

impl Challenge {
    /// 用於證明權限的 key authorization：`token.thumbprint`。
    pub fn key_authorization(&self, thumbprint: &str) -> String {
        format!("{}.{}", self.token, thumbprint)
    }

    /// 伺服器驗證時會存取的目標。
    ///
    /// - `http-01`：`http://<domain>/.well-known/acme-challenge/<token>`
    /// - `dns-01`：`_acme-challenge.<domain>`
    /// - 其他：挑戰 URI
    pub fn validation_target(&self) -> String {
        match self.challenge_type {
            ChallengeType::Http01 => {
                format!("http://{}/.well-known/acme-challenge/{}", self.domain, self.token)
            }
            ChallengeType::Dns01 => format!("_acme-challenge.{}", self.domain),
            _ => self.uri.clone(),
        }
    }

    /// 根據 key authorization 計算 DNS TXT 記錄值，使用 SHA-256 與 URL-safe Base64 編碼。
    pub fn dns_txt_value(&self, thumbprint: &str) -> Result<String, ErrorStack> {
        dns_txt_value(&self.key_authorization(thumbprint))
    }

    /// 針對 HTTP-01 挑戰返回應該作為 HTTP 文件內容的 key authorization，
    /// 若非 HTTP-01 則返回 `None`。
    pub fn http_content(&self, thumbprint: &str) -> Option<String> {
        (self.challenge_type == ChallengeType::Http01).then(|| self.key_authorization(thumbprint))
    }

    /// 根據挑戰類型及語言取得對應的驗證指引說明。
    ///
    /// # 參數
    /// - `lang`: 語言代碼，例如 "zh-tw" 或 "en"，不認識的語言使用 "zh-tw"。
    /// - `thumbprint`: 帳戶金鑰的 thumbprint。
    pub fn instructions(&self, lang: &str, thumbprint: &str) -> Result<String, ErrorStack> {
        instructions(
            &self.challenge_type,
            lang,
            &self.token,
            &self.key_authorization(thumbprint),
        )
    }
}

/// DNS-01 的 TXT 記錄值。
pub fn dns_txt_value(key_authorization: &str) -> Result<String, ErrorStack> {
    let digest = hash(MessageDigest::sha256(), key_authorization.as_bytes())?;
    Ok(Base64::new(digest).base64_url())
}

/// 驗證指引資訊，根據不同挑戰類型提供相應的步驟說明。
struct Instructions {
    http01: &'static str,
    dns01: &'static str,
    tls_sni01: &'static str,
    other: &'static str,
}

const ZH_TW: Instructions = Instructions {
    http01: "HTTP-01 驗證步驟：\n\
        1. 建立文件路徑：/.well-known/acme-challenge/{token}\n\
        2. 文件內容：{key_auth}\n\
        3. 確保可通過 HTTP 訪問（非 HTTPS）\n\
        4. Content-Type 設為 text/plain",
    dns01: "DNS-01 驗證步驟：\n\
        1. 新增 TXT 記錄：\n\
        2. 主機名稱：_acme-challenge\n\
        3. 記錄值：{dns_value}\n\
        4. TTL 建議設為 300 秒\n\
        5. 等待 DNS 傳播",
    tls_sni01: "TLS-SNI-01 驗證步驟：\n\
        1. 配置 TLS 伺服器回應特定 SNI\n\
        2. 自簽證書需包含驗證碼：{key_auth}\n\
        3. 確保 443 連接埠可從外部連線",
    other: "請依伺服器說明完成驗證，key authorization：{key_auth}",
};

const EN: Instructions = Instructions {
    http01: "HTTP-01 Validation Steps:\n\
        1. Create file path: /.well-known/acme-challenge/{token}\n\
        2. File content: {key_auth}\n\
        3. Ensure accessible via HTTP (not HTTPS)\n\
        4. Set Content-Type to text/plain",
    dns01: "DNS-01 Validation Steps:\n\
        1. Add TXT record:\n\
        2. Hostname: _acme-challenge\n\
        3. Value: {dns_value}\n\
        4. Recommended TTL: 300\n\
        5. Wait for DNS propagation",
    tls_sni01: "TLS-SNI-01 Validation Steps:\n\
        1. Configure TLS server to answer the challenge SNI\n\
        2. Self-signed certificate must include: {key_auth}\n\
        3. Ensure port 443 is reachable",
    other: "Complete the validation as described by the server, key authorization: {key_auth}",
};

/// 產生指定挑戰類型的驗證指引。
pub fn instructions(
    challenge_type: &ChallengeType,
    lang: &str,
    token: &str,
    key_authorization: &str,
) -> Result<String, ErrorStack> {
    let text = match lang {
        "en" => &EN,
        _ => &ZH_TW,
    };

    let rendered = match challenge_type {
        ChallengeType::Http01 => text
            .http01
            .replace("{token}", token)
            .replace("{key_auth}", key_authorization),
        ChallengeType::Dns01 => text
            .dns01
            .replace("{dns_value}", &dns_txt_value(key_authorization)?),
        ChallengeType::TlsSni01 => text.tls_sni01.replace("{key_auth}", key_authorization),
        _ => text.other.replace("{key_auth}", key_authorization),
    };
    Ok(rendered)
}
