//! 工作階段：持有目錄、帳戶金鑰、nonce 與註冊狀態，並負責每一次簽名往返。

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use reqwest::{header::HeaderMap, Method};

use crate::{
    account::Registration,
    authorization::Authorization,
    challenge::ChallengeType,
    directory::Directory,
    error::{AcmeError, Result, Step},
    jws,
    key_pair::{KeyError, KeyPair},
    nonce::NonceStore,
    payload::PayloadT,
    problem::{classify, Problem, SuccessEnvelope},
    signature::{OpensslCliSigner, SigningCapability},
    transport::{HttpTransport, Transport},
};

/// 輪詢的間隔與上限。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// 兩次輪詢之間的等待時間。
    pub interval: Duration,
    /// 從開始輪詢起算的最長等待時間。
    pub max_wait: Duration,
    /// 每次等待後間隔乘上的倍數；1.0 表示固定間隔。
    pub backoff: f64,
}

impl PollPolicy {
    /// 單次等待的上限，同時限制退避間隔與 `Retry-After`。
    pub const MAX_INTERVAL: Duration = Duration::from_secs(30);
    /// 等待期間檢查取消旗標的間隔。
    const CANCEL_CHECK: Duration = Duration::from_millis(50);
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(300),
            backoff: 1.0,
        }
    }
}

/// 可跨執行緒共用的取消旗標。
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 追蹤一次輪詢的期限與間隔。
pub(crate) struct Poller<'a> {
    cancellation: &'a Cancellation,
    policy: PollPolicy,
    deadline: Instant,
    interval: Duration,
}

impl<'a> Poller<'a> {
    pub(crate) fn new(policy: PollPolicy, cancellation: &'a Cancellation) -> Self {
        Self {
            cancellation,
            policy,
            deadline: Instant::now() + policy.max_wait,
            interval: policy.interval,
        }
    }

    /// 每次輪詢前呼叫；已取消時回傳 [`AcmeError::Cancelled`]。
    pub(crate) fn checkpoint(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(AcmeError::Cancelled);
        }
        Ok(())
    }

    /// 在下一次輪詢前等待。`hint` 通常來自 `Retry-After`。
    ///
    /// 等待後會超過期限時直接回傳 [`AcmeError::Timeout`]。
    /// 等待期間每隔一小段時間檢查一次取消旗標。
    pub(crate) fn wait(&mut self, hint: Option<Duration>) -> Result<()> {
        let delay = hint
            .map(|h| h.min(PollPolicy::MAX_INTERVAL))
            .unwrap_or(self.interval);
        let wake = Instant::now() + delay;
        if wake >= self.deadline {
            return Err(AcmeError::Timeout(self.policy.max_wait));
        }
        loop {
            self.checkpoint()?;
            let now = Instant::now();
            if now >= wake {
                break;
            }
            thread::sleep((wake - now).min(PollPolicy::CANCEL_CHECK));
        }
        if self.policy.backoff > 1.0 {
            self.interval = self
                .interval
                .mul_f64(self.policy.backoff)
                .min(PollPolicy::MAX_INTERVAL);
        }
        self.checkpoint()
    }
}

/// 帳戶金鑰的來源，三選一。
#[derive(Debug)]
pub enum KeySource {
    /// PEM 格式的私鑰內容。
    Pem(Vec<u8>),
    /// PEM 私鑰檔案路徑，以行程內 OpenSSL 簽名。
    Path(PathBuf),
    /// PEM 私鑰檔案路徑，以外部 `openssl` 程式簽名。
    OpensslCli { binary: PathBuf, path: PathBuf },
    /// 呼叫端提供的簽名能力。
    Signer(Box<dyn SigningCapability>),
}

impl KeySource {
    fn into_signer(self) -> Result<Box<dyn SigningCapability>> {
        let signer: Box<dyn SigningCapability> = match self {
            KeySource::Pem(pem) => Box::new(KeyPair::from_pem(&pem)?),
            KeySource::Path(path) => Box::new(KeyPair::from_path(path)?),
            KeySource::OpensslCli { binary, path } => {
                Box::new(OpensslCliSigner::with_binary(binary, path)?)
            }
            KeySource::Signer(signer) => signer,
        };
        Ok(signer)
    }
}

/// 用於構建 [`Session`] 實例的構造器，採用 builder 模式。
#[derive(Debug)]
pub struct SessionBuilder {
    host: String,
    key: Option<KeySource>,
    transport: Option<Box<dyn Transport>>,
    contact: Vec<String>,
    challenge_preference: Vec<ChallengeType>,
    poll_policy: PollPolicy,
    cancellation: Cancellation,
    timeout: Duration,
}

impl SessionBuilder {
    /// 預設的 ACME 伺服器。
    pub const DEFAULT_HOST: &'static str = "https://acme-v01.api.letsencrypt.org";
    /// Let's Encrypt 的測試伺服器。
    pub const STAGING_HOST: &'static str = "https://acme-staging.api.letsencrypt.org";

    /// 創建一個新的 [`SessionBuilder`] 實例，並設置預設值。
    ///
    /// 預設值包括：
    /// - 挑戰偏好：`[http-01]`
    /// - 輪詢：每 2 秒一次，最多 5 分鐘
    /// - 傳輸層：[`HttpTransport`]，逾時 30 秒
    ///
    /// 帳戶金鑰沒有預設值，必須以 [`SessionBuilder::key_pem`]、
    /// [`SessionBuilder::key_path`] 或 [`SessionBuilder::signer`] 其中之一指定。
    pub fn new(host: &str) -> Self {
        SessionBuilder {
            host: host.to_owned(),
            key: None,
            transport: None,
            contact: Vec::new(),
            challenge_preference: vec![ChallengeType::Http01],
            poll_policy: PollPolicy::default(),
            cancellation: Cancellation::new(),
            timeout: HttpTransport::DEFAULT_TIMEOUT,
        }
    }

    /// 以 PEM 內容作為帳戶金鑰。
    pub fn key_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.key = Some(KeySource::Pem(pem.into()));
        self
    }

    /// 從檔案讀取帳戶金鑰。
    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key = Some(KeySource::Path(path.into()));
        self
    }

    /// 帳戶金鑰留在磁碟上，交給外部 `openssl` 程式簽名。
    pub fn openssl_cli(mut self, binary: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        self.key = Some(KeySource::OpensslCli {
            binary: binary.into(),
            path: path.into(),
        });
        self
    }

    /// 使用自訂的簽名能力。
    pub fn signer(mut self, signer: impl SigningCapability + 'static) -> Self {
        self.key = Some(KeySource::Signer(Box::new(signer)));
        self
    }

    pub fn key_source(mut self, source: KeySource) -> Self {
        self.key = Some(source);
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// 新增一個聯絡方式，電子郵件會自動補上 `mailto:`。
    pub fn contact(mut self, contact: &str) -> Self {
        self.contact.push(contact.to_owned());
        self
    }

    /// 依序嘗試的挑戰類型。
    pub fn challenge_preference(mut self, preference: Vec<ChallengeType>) -> Self {
        self.challenge_preference = preference;
        self
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// 預設傳輸層的逾時；自訂傳輸層時忽略。
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 建立工作階段，但尚未取得目錄。
    ///
    /// # Errors
    ///
    /// 未指定帳戶金鑰或金鑰無法載入時返回 [`AcmeError::KeyLoad`]。
    pub fn build(self) -> Result<Session> {
        let signer = self.key.ok_or(KeyError::Missing)?.into_signer()?;
        let transport: Box<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Box::new(HttpTransport::with_timeout(self.timeout)?),
        };
        let directory_url = Directory::url_for(&self.host);

        Ok(Session {
            nonces: NonceStore::new(directory_url.clone()),
            directory_url,
            transport,
            signer,
            directory: None,
            registration: None,
            authorizations: Mutex::new(HashMap::new()),
            contact: self.contact,
            challenge_preference: self.challenge_preference,
            poll_policy: self.poll_policy,
            cancellation: self.cancellation,
            exchange: Mutex::new(()),
        })
    }

    /// 建立工作階段並立即取得目錄。
    pub fn connect(self) -> Result<Session> {
        let mut session = self.build()?;
        session.fetch_directory()?;
        Ok(session)
    }
}

/// 與單一 ACME 伺服器、單一帳戶的工作階段。
///
/// `authorize`、`check_challenge`、`sign_certificate` 等操作只需要 `&self`，
/// 可以在多個執行緒間共用；每個簽名請求仍然會依序取得不同的 nonce。
#[derive(Debug)]
pub struct Session {
    directory_url: String,
    transport: Box<dyn Transport>,
    signer: Box<dyn SigningCapability>,
    nonces: NonceStore,
    directory: Option<Directory>,
    pub(crate) registration: Option<Registration>,
    pub(crate) authorizations: Mutex<HashMap<String, Authorization>>,
    pub(crate) contact: Vec<String>,
    pub(crate) challenge_preference: Vec<ChallengeType>,
    pub(crate) poll_policy: PollPolicy,
    pub(crate) cancellation: Cancellation,
    exchange: Mutex<()>,
}

impl Session {
    /// 取得目錄；成功之後其他操作才能進行。
    pub fn fetch_directory(&mut self) -> Result<&Directory> {
        let directory = Directory::fetch(&*self.transport, &self.directory_url, &self.nonces)?;
        Ok(&*self.directory.insert(directory))
    }

    /// 已取得的目錄。
    pub fn directory(&self) -> Result<&Directory> {
        self.directory.as_ref().ok_or(AcmeError::OutOfOrder(Step::Directory))
    }

    /// 目前的註冊狀態。
    pub fn registration(&self) -> Result<&Registration> {
        self.directory()?;
        self.registration
            .as_ref()
            .ok_or(AcmeError::OutOfOrder(Step::Registration))
    }

    pub fn signer(&self) -> &dyn SigningCapability {
        &*self.signer
    }

    /// 帳戶金鑰的 thumbprint。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.signer.thumbprint()?)
    }

    pub fn nonces(&self) -> &NonceStore {
        &self.nonces
    }

    /// 取消旗標的複本，觸發後進行中的輪詢會以 [`AcmeError::Cancelled`] 結束。
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// 已取得的授權（依域名）。
    pub fn authorization(&self, domain: &str) -> Option<Authorization> {
        self.authorizations_map().get(domain).cloned()
    }

    /// 丟棄所有授權記錄。
    pub fn clear_authorizations(&self) {
        self.authorizations_map().clear();
    }

    pub(crate) fn authorizations_map(&self) -> MutexGuard<'_, HashMap<String, Authorization>> {
        self.authorizations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 驗證並簽名載荷後送出。
    pub(crate) fn post<P: PayloadT>(&self, url: &str, payload: &P) -> Result<SuccessEnvelope> {
        payload.validate()?;
        self.signed_post(url, &payload.to_value()?)
    }

    /// 送出一個簽名的 POST。
    ///
    /// 整個「取 nonce → 簽名 → 送出 → 更新 nonce」在鎖內完成；
    /// 伺服器回報 `badNonce` 時以新的 nonce 重試一次，第二次失敗直接回傳。
    pub(crate) fn signed_post(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<SuccessEnvelope> {
        let _exchange = self.exchange.lock().unwrap_or_else(PoisonError::into_inner);

        match self.post_once(url, payload)? {
            Err(problem) if problem.is_bad_nonce() => {
                log::debug!("Retrying {url} with a fresh nonce");
                Ok(self.post_once(url, payload)??)
            }
            result => Ok(result?),
        }
    }

    fn post_once(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<std::result::Result<SuccessEnvelope, Problem>> {
        let nonce = self.nonces.take(&*self.transport)?;
        let body = jws::sign(payload, &*self.signer, &nonce, Some(url))?.to_json()?;

        log::debug!("POST {url}");
        let response = self
            .transport
            .request(Method::POST, url, &HeaderMap::new(), Some(body.as_bytes()))?;
        self.nonces.update(&response.headers);

        Ok(classify(response.status, &response.headers, &response.body))
    }

    /// 未簽名的 GET，用於輪詢資源。
    pub(crate) fn get(&self, url: &str) -> Result<SuccessEnvelope> {
        log::debug!("GET {url}");
        let response = self.transport.request(Method::GET, url, &HeaderMap::new(), None)?;
        self.nonces.update(&response.headers);
        Ok(classify(response.status, &response.headers, &response.body)?)
    }
}
