use chrono::{DateTime, Utc};
use openssl::{asn1::Asn1Time, x509::X509};
use thiserror::Error;

use crate::{
    error::{AcmeError, Result},
    payload::{NewCertPayload, RevokeCertPayload},
    session::{Poller, Session},
};

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

/// X.509 證書封裝結構，提供基本的證書解析與續約檢查功能
#[derive(Debug, Clone)]
pub struct Certificate {
    /// 內部使用的 X509 證書對象
    pub cert: X509,
}

impl Certificate {
    /// 根據傳入的 PEM 格式字串解析生成 X.509 證書。
    pub fn from_pem(pem: &[u8]) -> std::result::Result<Self, CertificateError> {
        Ok(Certificate {
            cert: X509::from_pem(pem)?,
        })
    }

    /// 解析 DER 格式，即伺服器簽發時回傳的格式。
    pub fn from_der(der: &[u8]) -> std::result::Result<Self, CertificateError> {
        Ok(Certificate {
            cert: X509::from_der(der)?,
        })
    }

    pub fn to_pem(&self) -> std::result::Result<Vec<u8>, CertificateError> {
        Ok(self.cert.to_pem()?)
    }

    pub fn to_der(&self) -> std::result::Result<Vec<u8>, CertificateError> {
        Ok(self.cert.to_der()?)
    }

    /// 證書的到期時間。
    pub fn not_after(&self) -> std::result::Result<DateTime<Utc>, CertificateError> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.cert.not_after())?;
        let seconds = i64::from(diff.days) * 86400 + i64::from(diff.secs);
        DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)
    }

    /// 判斷證書是否應該進行續約
    ///
    /// 當剩餘有效時間低於 `threshold_days` 天（或已過期）時回傳 `true`。
    pub fn should_renew(&self, threshold_days: u32) -> std::result::Result<bool, CertificateError> {
        let remaining = self.not_after()? - Utc::now();
        log::debug!("Certificate expires in {} days", remaining.num_days());
        Ok(remaining.num_seconds() < i64::from(threshold_days) * 86400)
    }
}

/// 伺服器簽發的憑證。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// DER 格式的憑證。
    pub der: Vec<u8>,
    /// 憑證的 URL（`Location`）。
    pub location: Option<String>,
    /// 簽發者憑證的 URL（`Link: <...>;rel="up"`）。
    pub chain_url: Option<String>,
}

impl IssuedCertificate {
    pub fn certificate(&self) -> std::result::Result<Certificate, CertificateError> {
        Certificate::from_der(&self.der)
    }
}

/// 撤銷原因，代碼取自 RFC 5280 §5.3.1。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CaCompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    RemoveFromCrl = 8,
    PrivilegeWithdrawn = 9,
    AaCompromise = 10,
}

impl RevocationReason {
    /// `unspecified` 不送出代碼。
    fn code(self) -> Option<u8> {
        match self {
            RevocationReason::Unspecified => None,
            reason => Some(reason as u8),
        }
    }
}

impl Session {
    /// 提交 DER 格式的 CSR 申請簽發憑證。
    ///
    /// 伺服器回應 `202` 或主體為空時，會依 `Location` 輪詢直到取得憑證，
    /// 並遵守 `Retry-After`。
    ///
    /// # Errors
    ///
    /// 授權不足、CSR 不正確等伺服器問題原樣返回，不會重新申請授權。
    pub fn sign_certificate(&self, csr_der: &[u8]) -> Result<IssuedCertificate> {
        self.registration()?;
        let new_cert = self.directory()?.new_cert.clone();

        log::debug!("Requesting certificate");
        let envelope = self.post(&new_cert, &NewCertPayload::new(csr_der))?;
        let location = envelope.location().map(ToOwned::to_owned);
        let mut chain_url = envelope.link("up");

        let envelope = if envelope.status == 202 || envelope.body.is_empty() {
            let location = location.as_deref().ok_or_else(|| {
                AcmeError::InvalidResponse("Pending certificate has no Location header".into())
            })?;

            let mut poller = Poller::new(self.poll_policy, &self.cancellation);
            let mut hint = envelope.retry_after();
            loop {
                poller.wait(hint)?;
                let polled = self.get(location)?;
                if polled.status != 202 && !polled.body.is_empty() {
                    break polled;
                }
                hint = polled.retry_after();
            }
        } else {
            envelope
        };

        if let Some(up) = envelope.link("up") {
            chain_url = Some(up);
        }
        log::info!("Certificate issued");

        Ok(IssuedCertificate {
            der: envelope.body,
            location,
            chain_url,
        })
    }

    /// 撤銷 DER 格式的憑證。
    pub fn revoke_certificate(&self, cert_der: &[u8], reason: Option<RevocationReason>) -> Result<()> {
        let revoke_cert = self.directory()?.revoke_cert.clone();
        let payload = RevokeCertPayload::new(cert_der, reason.and_then(RevocationReason::code));

        log::debug!("Revoking certificate");
        self.post(&revoke_cert, &payload)?;
        Ok(())
    }

    /// 帳戶復原金鑰，此伺服器版本不提供。
    pub fn recovery_key(&self) -> Result<()> {
        Err(AcmeError::NotSupported("recovery key".into()))
    }

    /// 下載簽發者憑證（DER）。
    pub fn fetch_chain(&self, chain_url: &str) -> Result<Vec<u8>> {
        Ok(self.get(chain_url)?.body)
    }
}
