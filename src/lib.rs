//! # ACME (v1) 憑證自動化函式庫
//!
//! 本庫實作 ACME 協議用戶端引擎，使用以 `resource` 欄位區分請求的資源模型
//! （`new-reg`、`new-authz`、`new-cert`、`revoke-cert`），適合無人值守的自動化流程。
//!
//! - **session**: 工作階段與其構造器，持有目錄、帳戶金鑰與 nonce，負責每一次簽名往返。
//! - **account**: 帳戶註冊與同意服務條款。
//! - **authorization**: 域名授權、挑戰選擇與挑戰輪詢。
//! - **certificate**: 憑證簽發、撤銷與證書解析。
//! - **handler**: 挑戰佈署策略（本機檔案、ssh、互動式）。
//!
//! ## 流程
//!
//! 目錄 → 註冊 →（同意服務條款）→ 每個域名授權並完成挑戰 → 簽發。
//! 所有失敗都會以 [`error::AcmeError`] 回報，並可用 [`error::AcmeError::fault`]
//! 取得統一的 `{ status, detail, type }` 描述。
//!
//! ## 示例
//!
//! ```no_run
//! use racme_v1::{
//!     csr::Csr,
//!     handler::LocalFileHandler,
//!     key_pair::{KeyAlgorithm, KeyPair},
//!     session::SessionBuilder,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. 取得目錄並註冊帳戶
//!     let mut session = SessionBuilder::new(SessionBuilder::STAGING_HOST)
//!         .key_path("/etc/acme/account.key")
//!         .contact("admin@example.com")
//!         .connect()?;
//!     session.register()?;
//!     session.accept_tos()?;
//!
//!     // 2. 授權域名並完成 HTTP-01 挑戰
//!     let handler = LocalFileHandler::new("/var/www/html");
//!     let challenge = session.authorize("example.com")?;
//!     session.check_challenge(&challenge, &handler)?;
//!
//!     // 3. 以新的憑證金鑰提交 CSR
//!     let cert_key = KeyPair::generate(KeyAlgorithm::Rsa, None)?;
//!     let csr = Csr::new().add_domain("example.com").to_der(&cert_key)?;
//!     let issued = session.sign_certificate(&csr)?;
//!
//!     std::fs::write("example.com.pem", issued.certificate()?.to_pem()?)?;
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod csr;
pub mod directory;
pub mod error;
pub mod handler;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod payload;
pub mod problem;
pub mod protection;
pub mod session;
pub mod signature;
pub mod transport;

#[cfg(test)]
mod test;

pub use error::{AcmeError, Fault};
pub use session::{Session, SessionBuilder};
