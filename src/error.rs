use std::{fmt, time::Duration};

use thiserror::Error;

use crate::{
    certificate::CertificateError,
    csr::CsrError,
    directory::DirectoryError,
    handler::HandlerError,
    key_pair::KeyError,
    nonce::NonceError,
    payload::PayloadError,
    problem::Problem,
    signature::SignatureError,
    transport::TransportError,
};

/// 用戶端自行產生的錯誤類型前綴。
pub const CLIENT_ERROR_PREFIX: &str = "urn:acme:client:error:";

/// 工作流程中的步驟，用於回報呼叫順序錯誤。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// 尚未成功取得目錄。
    Directory,
    /// 尚未註冊帳戶。
    Registration,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Directory => f.write_str("directory"),
            Step::Registration => f.write_str("registration"),
        }
    }
}

/// 呼叫端看到的所有錯誤。
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// 伺服器回報的問題。
    #[error("Server problem: {0}")]
    Protocol(Problem),
    #[error("Challenge for {domain} failed: {problem}")]
    ChallengeFailed { domain: String, problem: Problem },
    #[error("Gave up polling after {0:?}")]
    Timeout(Duration),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("None of the offered challenges are supported: {0}")]
    UnsupportedChallenge(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Signing error: {0}")]
    Signing(#[from] SignatureError),
    #[error("Key error: {0}")]
    KeyLoad(#[from] KeyError),
    #[error("Nonce error: {0}")]
    Nonce(NonceError),
    #[error("Challenge handler error: {0}")]
    Handler(#[from] HandlerError),
    #[error("{0} must be completed first")]
    OutOfOrder(Step),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
}

pub type Result<T> = std::result::Result<T, AcmeError>;

impl From<Problem> for AcmeError {
    fn from(problem: Problem) -> Self {
        AcmeError::Protocol(problem)
    }
}

impl From<DirectoryError> for AcmeError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Transport(e) => AcmeError::Transport(e),
            DirectoryError::Problem(p) => AcmeError::Protocol(p),
            DirectoryError::Json(e) => AcmeError::Json(e),
        }
    }
}

impl From<NonceError> for AcmeError {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::RequestFailed(e) => AcmeError::Transport(e),
            other => AcmeError::Nonce(other),
        }
    }
}

/// 統一的錯誤描述：狀態、說明與類型三者皆有值。
///
/// 非 HTTP 錯誤的 `status` 為 0。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub status: u16,
    pub detail: String,
    pub problem_type: String,
}

impl AcmeError {
    /// 將錯誤轉換為 [`Fault`]。
    pub fn fault(&self) -> Fault {
        let client = |name: &str| Fault {
            status: 0,
            detail: self.to_string(),
            problem_type: format!("{CLIENT_ERROR_PREFIX}{name}"),
        };

        match self {
            AcmeError::Protocol(problem) | AcmeError::ChallengeFailed { problem, .. } => Fault {
                status: problem.status,
                detail: problem.detail.clone(),
                problem_type: problem.problem_type.clone(),
            },
            AcmeError::Transport(_) => client("transport"),
            AcmeError::Timeout(_) => client("timeout"),
            AcmeError::Cancelled => client("cancelled"),
            AcmeError::UnsupportedChallenge(_) => client("unsupportedChallenge"),
            AcmeError::NotSupported(_) => client("notSupported"),
            AcmeError::Signing(_) => client("signing"),
            AcmeError::KeyLoad(_) => client("keyLoad"),
            AcmeError::Nonce(_) => client("nonce"),
            AcmeError::Handler(_) => client("handler"),
            AcmeError::OutOfOrder(_) => client("outOfOrder"),
            AcmeError::Json(_) => client("json"),
            AcmeError::InvalidResponse(_) => client("invalidResponse"),
            AcmeError::Payload(_) => client("invalidPayload"),
            AcmeError::Csr(_) => client("csr"),
            AcmeError::Certificate(_) => client("certificate"),
        }
    }

    /// 伺服器回報的問題（若有）。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            AcmeError::Protocol(problem) | AcmeError::ChallengeFailed { problem, .. } => Some(problem),
            _ => None,
        }
    }
}
