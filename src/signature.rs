use std::{
    fmt,
    io::{self, Write as _},
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

use openssl::{
    ecdsa::EcdsaSig,
    hash::{hash, MessageDigest},
    nid::Nid,
    pkey::{Id, PKey, Public},
    sign::Signer,
};
use thiserror::Error;

use crate::{
    base64::Base64,
    jwk::{Jwk, JwkError},
    key_pair::{KeyAlgorithm, KeyPair},
};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 簽名過程中發生錯誤，附帶錯誤訊息。
    #[error("Signing error: {0}")]
    SigningError(String),
    /// 不支援的簽名演算法，附帶未支援的演算法名稱。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// EC 金鑰不是 P-256。
    #[error("Unsupported EC curve, only P-256 is accepted")]
    UnsupportedCurve,
    /// 序列化過程中發生錯誤。
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    /// JWK 產生失敗。
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    /// 外部 openssl 程式執行失敗。
    #[error("External signer failed: {0}")]
    External(String),
}

type Result<T> = std::result::Result<T, SignatureError>;

/// 帳戶金鑰的簽名能力。
///
/// 協議引擎只透過此介面接觸金鑰：產生 JWK、對位元組簽名、計算摘要。
/// 無論實作是行程內的 OpenSSL 或外部程式，對引擎而言都相同。
pub trait SigningCapability: Send + Sync + fmt::Debug {
    /// JWS `alg` 參數，例如 `RS256`。
    fn algorithm(&self) -> &str;

    /// 對應公鑰的 JWK。
    fn jwk(&self) -> Result<Jwk>;

    /// 對資料簽名，回傳 JWS 格式的簽名位元組。
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// SHA-256 摘要。
    fn digest(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// 帳戶 thumbprint：正規 JWK JSON 的 SHA-256，以 URL 安全 Base64 表示。
    fn thumbprint(&self) -> Result<String> {
        let json = self.jwk()?.to_acme_json()?;
        Ok(Base64::new(self.digest(json.as_bytes())?).base64_url())
    }
}

/// 定義簽名演算法的介面。
trait SignatureAlgorithmT {
    /// 使用指定的金鑰對資料進行簽名。
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>>;
}

/// RSA 簽名演算法的實作（RS256，PKCS#1 v1.5）。
struct RSASignature;

impl SignatureAlgorithmT for RSASignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;

        signer
            .update(data)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;

        signer
            .sign_to_vec()
            .map_err(|e| SignatureError::SigningError(e.to_string()))
    }
}

/// ECDSA 簽名演算法的實作（ES256）。
struct ECDSASignature;

impl SignatureAlgorithmT for ECDSASignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;
        signer
            .update(data)
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;
        let der = signer
            .sign_to_vec()
            .map_err(|e| SignatureError::SigningError(e.to_string()))?;

        ecdsa_der_to_jws(&der)
    }
}

/// OpenSSL 產生的 ECDSA 簽名為 DER 結構，JWS 需要固定長度的 `r || s`。
fn ecdsa_der_to_jws(der: &[u8]) -> Result<Vec<u8>> {
    let convert = |e: openssl::error::ErrorStack| SignatureError::SigningError(e.to_string());

    let sig = EcdsaSig::from_der(der).map_err(convert)?;
    let mut raw = sig.r().to_vec_padded(32).map_err(convert)?;
    raw.extend(sig.s().to_vec_padded(32).map_err(convert)?);
    Ok(raw)
}

/// 簽名演算法工廠，用於根據金鑰演算法取得對應的簽名演算法實作。
struct SignatureAlgorithmFactory;

impl SignatureAlgorithmFactory {
    fn get_algorithm(alg: KeyAlgorithm) -> Box<dyn SignatureAlgorithmT> {
        match alg {
            KeyAlgorithm::Rsa => Box::new(RSASignature),
            KeyAlgorithm::EcP256 => Box::new(ECDSASignature),
        }
    }
}

fn sha256(data: &[u8]) -> Result<Vec<u8>> {
    hash(MessageDigest::sha256(), data)
        .map(|digest| digest.to_vec())
        .map_err(|e| SignatureError::SigningError(e.to_string()))
}

impl SigningCapability for KeyPair {
    fn algorithm(&self) -> &str {
        self.alg.jws_alg()
    }

    fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::from_public_key(&self.pub_key)?)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        SignatureAlgorithmFactory::get_algorithm(self.alg).sign(data, self)
    }

    fn digest(&self, data: &[u8]) -> Result<Vec<u8>> {
        sha256(data)
    }
}

/// 透過外部 `openssl` 程式簽名的實作，私鑰始終留在磁碟上，不載入本行程。
///
/// 建構時會執行一次 `openssl pkey -pubout` 取得公鑰，以便產生 JWK。
#[derive(Debug, Clone)]
pub struct OpensslCliSigner {
    binary: PathBuf,
    key_path: PathBuf,
    alg: KeyAlgorithm,
    pub_key: PKey<Public>,
}

impl OpensslCliSigner {
    /// 預設使用 `$PATH` 中的 `openssl`。
    pub const DEFAULT_BINARY: &'static str = "openssl";

    /// 以預設的 openssl 程式建立簽名器。
    pub fn new(key_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_binary(Self::DEFAULT_BINARY, key_path)
    }

    /// 指定 openssl 程式路徑建立簽名器。
    pub fn with_binary(binary: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let binary = binary.as_ref().to_path_buf();
        let key_path = key_path.as_ref().to_path_buf();

        let pub_pem = run(
            Command::new(&binary)
                .arg("pkey")
                .arg("-in")
                .arg(&key_path)
                .arg("-pubout"),
            &[],
        )?;
        let pub_key = PKey::public_key_from_pem(&pub_pem)
            .map_err(|e| SignatureError::External(e.to_string()))?;
        let alg = match pub_key.id() {
            Id::RSA => KeyAlgorithm::Rsa,
            Id::EC => {
                let ec = pub_key
                    .ec_key()
                    .map_err(|e| SignatureError::External(e.to_string()))?;
                if ec.group().curve_name() != Some(Nid::X9_62_PRIME256V1) {
                    return Err(SignatureError::UnsupportedCurve);
                }
                KeyAlgorithm::EcP256
            }
            other => return Err(SignatureError::UnsupportedAlgorithm(format!("{other:?}"))),
        };

        Ok(Self {
            binary,
            key_path,
            alg,
            pub_key,
        })
    }
}

impl SigningCapability for OpensslCliSigner {
    fn algorithm(&self) -> &str {
        self.alg.jws_alg()
    }

    fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::from_public_key(&self.pub_key)?)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signature = run(
            Command::new(&self.binary)
                .arg("dgst")
                .arg("-sha256")
                .arg("-sign")
                .arg(&self.key_path),
            data,
        )?;

        match self.alg {
            KeyAlgorithm::Rsa => Ok(signature),
            KeyAlgorithm::EcP256 => ecdsa_der_to_jws(&signature),
        }
    }

    fn digest(&self, data: &[u8]) -> Result<Vec<u8>> {
        run(
            Command::new(&self.binary)
                .arg("dgst")
                .arg("-sha256")
                .arg("-binary"),
            data,
        )
    }
}

/// 啟動子行程，把 `input` 寫入標準輸入後等待結束。
///
/// 寫入失敗時仍會先等子行程結束，再回傳寫入錯誤。
pub(crate) fn pipe(command: &mut Command, input: &[u8]) -> io::Result<Output> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let written = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(input),
        None => Ok(()),
    };
    let output = child.wait_with_output()?;
    written.map(|()| output)
}

/// 執行外部命令，將 `input` 寫入標準輸入並回傳標準輸出。
fn run(command: &mut Command, input: &[u8]) -> Result<Vec<u8>> {
    let output = pipe(command, input).map_err(|e| SignatureError::External(e.to_string()))?;
    if !output.status.success() {
        return Err(SignatureError::External(
            String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        ));
    }

    Ok(output.stdout)
}
