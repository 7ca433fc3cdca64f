use std::{fs, io, path::Path};

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
};
use thiserror::Error;

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL、檔案讀取與不支援的演算法。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Failed to read key file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Unsupported EC curve, only P-256 is accepted")]
    UnsupportedCurve,
    #[error("No account key configured")]
    Missing,
}

/// 本模組使用的結果類型，當中錯誤皆為 `KeyError`。
type Result<T> = std::result::Result<T, KeyError>;

/// 金鑰所屬的演算法家族。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA，以 RS256 簽名。
    Rsa,
    /// NIST P-256 橢圓曲線，以 ES256 簽名。
    EcP256,
}

impl KeyAlgorithm {
    /// 將輸入的演算法名稱標準化（不分大小寫）。
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_uppercase().as_str() {
            "RSA" | "RS256" => Ok(Self::Rsa),
            "EC" | "ECDSA" | "ES256" | "P-256" => Ok(Self::EcP256),
            other => Err(KeyError::UnsupportedAlgorithm(other.to_owned())),
        }
    }

    /// JWS `alg` 參數。
    pub fn jws_alg(&self) -> &'static str {
        match self {
            Self::Rsa => "RS256",
            Self::EcP256 => "ES256",
        }
    }
}

/// 表示一組非對稱加密的金鑰對。
///
/// 私鑰只存在於行程記憶體中，公鑰由私鑰派生。帳戶金鑰與憑證金鑰皆使用此型別。
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// 金鑰演算法。
    pub alg: KeyAlgorithm,
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// 預設的 RSA 金鑰長度。
    pub const DEFAULT_RSA_BITS: u32 = 2048;

    /// 依演算法產生一組新的金鑰對。
    ///
    /// # 參數
    ///
    /// - `alg`: 金鑰演算法。
    /// - `bits`: RSA 金鑰長度，未提供時使用 [`KeyPair::DEFAULT_RSA_BITS`]；EC 金鑰忽略此值。
    pub fn generate(alg: KeyAlgorithm, bits: Option<u32>) -> Result<Self> {
        let pri_key = match alg {
            KeyAlgorithm::Rsa => {
                PKey::from_rsa(Rsa::generate(bits.unwrap_or(Self::DEFAULT_RSA_BITS))?)?
            }
            KeyAlgorithm::EcP256 => {
                let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
                PKey::from_ec_key(EcKey::generate(&group)?)?
            }
        };
        Self::from_private(pri_key)
    }

    /// 根據 PEM 格式的私鑰資料建立一組金鑰對。
    ///
    /// 接受 PKCS#1、SEC1 與 PKCS#8 三種 PEM 封裝。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?;
        Self::from_private(pri_key)
    }

    /// 從檔案路徑讀取 PEM 私鑰。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let pem = fs::read(path).map_err(|source| KeyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&pem)
    }

    fn from_private(pri_key: PKey<Private>) -> Result<Self> {
        let (alg, pub_key) = Self::derive_public_key(&pri_key)?;
        Ok(Self {
            alg,
            pri_key,
            pub_key,
        })
    }

    /// 根據私鑰派生出對應的公鑰，同時判斷演算法。
    fn derive_public_key(pri_key: &PKey<Private>) -> Result<(KeyAlgorithm, PKey<Public>)> {
        match pri_key.id() {
            Id::RSA => {
                let rsa = pri_key.rsa()?;
                let pub_rsa =
                    Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
                Ok((KeyAlgorithm::Rsa, PKey::from_rsa(pub_rsa)?))
            }
            Id::EC => {
                let ec = pri_key.ec_key()?;
                if ec.group().curve_name() != Some(Nid::X9_62_PRIME256V1) {
                    return Err(KeyError::UnsupportedCurve);
                }
                let pub_ec = EcKey::from_public_key(ec.group(), ec.public_key())?;
                Ok((KeyAlgorithm::EcP256, PKey::from_ec_key(pub_ec)?))
            }
            other => Err(KeyError::UnsupportedAlgorithm(format!("{other:?}"))),
        }
    }

    /// 以 PKCS#8 PEM 匯出私鑰。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    /// 金鑰的位元長度，例如 RSA 2048 或 P-256 的 256。
    pub fn key_parameters(&self) -> u32 {
        self.pri_key.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ec() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256, None).unwrap();
        assert_eq!(key.alg, KeyAlgorithm::EcP256);
        assert_eq!(key.key_parameters(), 256);
    }

    #[test]
    fn test_pem_round_trip_keeps_algorithm() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa, Some(1024)).unwrap();
        let pem = key.to_pem().unwrap();
        let loaded = KeyPair::from_pem(&pem).unwrap();
        assert_eq!(loaded.alg, KeyAlgorithm::Rsa);
        assert_eq!(loaded.key_parameters(), 1024);
    }

    #[test]
    fn test_from_path() {
        let key = KeyPair::generate(KeyAlgorithm::EcP256, None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("account.key");
        fs::write(&path, key.to_pem().unwrap()).unwrap();

        let loaded = KeyPair::from_path(&path).unwrap();
        assert_eq!(loaded.alg, KeyAlgorithm::EcP256);
    }

    #[test]
    fn test_missing_file() {
        let err = KeyPair::from_path("/nonexistent/account.key").unwrap_err();
        assert!(matches!(err, KeyError::Io { .. }));
    }

    #[test]
    fn test_garbage_pem() {
        assert!(matches!(
            KeyPair::from_pem(b"not a key"),
            Err(KeyError::OpenSSL(_))
        ));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(KeyAlgorithm::parse("rsa").unwrap(), KeyAlgorithm::Rsa);
        assert_eq!(KeyAlgorithm::parse("ecdsa").unwrap(), KeyAlgorithm::EcP256);
        assert!(KeyAlgorithm::parse("ed25519").is_err());
        assert_eq!(KeyAlgorithm::EcP256.jws_alg(), "ES256");
    }
}
