use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
}

/// 為簡化錯誤處理定義 Result 類型
type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器，第一個域名作為主體 CN，所有域名都列入主體替代名稱 (SAN)。
///
/// # 範例
///
/// ```
/// # use racme_v1::csr::Csr;
/// # use racme_v1::key_pair::{KeyAlgorithm, KeyPair};
/// let key_pair = KeyPair::generate(KeyAlgorithm::EcP256, None).unwrap();
/// let der = Csr::new()
///     .add_domain("example.com")
///     .add_domain("www.example.com")
///     .to_der(&key_pair)
///     .unwrap();
/// assert!(!der.is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Csr {
    san_entries: Vec<String>,
}

impl Csr {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增一個 DNS 名稱，重複的名稱會被忽略。
    pub fn add_domain(mut self, dns_name: &str) -> Self {
        if !self.san_entries.iter().any(|d| d == dns_name) {
            self.san_entries.push(dns_name.to_owned());
        }
        self
    }

    pub fn domains(&self) -> &[String] {
        &self.san_entries
    }

    /// 以憑證金鑰簽署並建立 X509 證書簽名請求。
    ///
    /// # 錯誤
    ///
    /// 若未設定任何域名，回傳 `CsrError::NoSanEntries`。
    pub fn build(&self, key_pair: &KeyPair) -> Result<X509Req> {
        let common_name = self.san_entries.first().ok_or(CsrError::NoSanEntries)?;
        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", common_name)?;
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }

    /// 建立 DER 格式的 CSR，可直接交給 [`crate::session::Session::sign_certificate`]。
    pub fn to_der(&self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }
}
