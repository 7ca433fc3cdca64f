//! 挑戰的佈署策略：伺服器驗證前，把 key authorization 放到它會去查看的地方。

use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::Command,
    sync::{Mutex, PoisonError},
};

use thiserror::Error;

use crate::{
    challenge::{instructions, ChallengeType},
    signature::pipe,
};

/// 佈署挑戰失敗。
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Command failed: {0}")]
    Command(String),
    #[error("Aborted by operator")]
    Aborted,
    #[error("{0}")]
    Other(String),
}

type Result<T> = std::result::Result<T, HandlerError>;

/// 完成挑戰的能力。
///
/// `fingerprint` 是帳戶金鑰的 thumbprint，`url` 是伺服器驗證時存取的目標
/// （`http-01` 為完整 HTTP URL，`dns-01` 為 `_acme-challenge.<domain>`）。
/// 回傳 `Ok` 表示伺服器現在可以開始驗證。
pub trait ChallengeHandler: Send + Sync {
    fn fulfill(&self, fingerprint: &str, token: &str, url: &str) -> Result<()>;
}

impl<F> ChallengeHandler for F
where
    F: Fn(&str, &str, &str) -> Result<()> + Send + Sync,
{
    fn fulfill(&self, fingerprint: &str, token: &str, url: &str) -> Result<()> {
        self(fingerprint, token, url)
    }
}

/// 從驗證目標推斷挑戰類型。
fn target_type(url: &str) -> ChallengeType {
    if url.starts_with("_acme-challenge.") {
        ChallengeType::Dns01
    } else if url.starts_with("http://") && url.contains("/.well-known/acme-challenge/") {
        ChallengeType::Http01
    } else {
        ChallengeType::Other(String::new())
    }
}

const CHALLENGE_DIR: &str = ".well-known/acme-challenge";

/// 權杖會成為檔名的一部分，只接受 URL 安全 Base64 字元。
fn check_token(token: &str) -> Result<()> {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !safe {
        return Err(HandlerError::Other(format!("Refusing unsafe token {token:?}")));
    }
    Ok(())
}

/// 將 key authorization 寫入本機網站根目錄下的
/// `.well-known/acme-challenge/<token>`。
#[derive(Debug, Clone)]
pub struct LocalFileHandler {
    webroot: PathBuf,
}

impl LocalFileHandler {
    pub fn new(webroot: impl Into<PathBuf>) -> Self {
        Self {
            webroot: webroot.into(),
        }
    }

    /// 挑戰檔案的完整路徑。
    pub fn challenge_path(&self, token: &str) -> PathBuf {
        self.webroot.join(CHALLENGE_DIR).join(token)
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> HandlerError + '_ {
    move |source| HandlerError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl ChallengeHandler for LocalFileHandler {
    fn fulfill(&self, fingerprint: &str, token: &str, _url: &str) -> Result<()> {
        check_token(token)?;
        let path = self.challenge_path(token);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        log::debug!("Writing challenge file {}", path.display());
        fs::write(&path, format!("{token}.{fingerprint}")).map_err(io_error(&path))
    }
}

/// 透過 `ssh` 在遠端主機寫入挑戰檔案。
#[derive(Debug, Clone)]
pub struct RemoteShellHandler {
    ssh: PathBuf,
    destination: String,
    webroot: String,
}

impl RemoteShellHandler {
    /// 預設使用 `PATH` 中的 `ssh`。
    pub const DEFAULT_SSH: &'static str = "ssh";

    /// `destination` 為 `ssh` 的目標（例如 `deploy@web1`），`webroot` 為遠端網站根目錄。
    pub fn new(destination: impl Into<String>, webroot: impl Into<String>) -> Self {
        Self {
            ssh: PathBuf::from(Self::DEFAULT_SSH),
            destination: destination.into(),
            webroot: webroot.into(),
        }
    }

    /// 改用指定的 ssh 程式。
    pub fn with_ssh(mut self, ssh: impl Into<PathBuf>) -> Self {
        self.ssh = ssh.into();
        self
    }

    /// 在遠端執行的 shell 指令。
    fn remote_command(&self, token: &str) -> String {
        let dir = format!("{}/{CHALLENGE_DIR}", self.webroot.trim_end_matches('/'));
        format!("mkdir -p '{dir}' && cat > '{dir}/{token}'")
    }
}

impl ChallengeHandler for RemoteShellHandler {
    fn fulfill(&self, fingerprint: &str, token: &str, _url: &str) -> Result<()> {
        check_token(token)?;

        log::debug!("Deploying challenge to {}", self.destination);
        let output = pipe(
            Command::new(&self.ssh)
                .arg(&self.destination)
                .arg(self.remote_command(token)),
            format!("{token}.{fingerprint}").as_bytes(),
        )
        .map_err(|e| HandlerError::Command(format!("{}: {e}", self.ssh.display())))?;
        if !output.status.success() {
            return Err(HandlerError::Command(format!(
                "{} exited with {}: {}",
                self.ssh.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// 印出驗證指引，等待操作者完成佈署後按下 Enter。
///
/// 輸入 `q` 或讀到檔案結尾視為放棄。
#[derive(Debug)]
pub struct InteractiveHandler<R, W> {
    lang: String,
    io: Mutex<(R, W)>,
}

impl InteractiveHandler<io::BufReader<io::Stdin>, io::Stdout> {
    /// 使用標準輸入與輸出。
    pub fn stdio(lang: &str) -> Self {
        Self::new(lang, io::BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> InteractiveHandler<R, W> {
    pub fn new(lang: &str, input: R, output: W) -> Self {
        Self {
            lang: lang.to_owned(),
            io: Mutex::new((input, output)),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        self.io.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, W> ChallengeHandler for InteractiveHandler<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn fulfill(&self, fingerprint: &str, token: &str, url: &str) -> Result<()> {
        let key_authorization = format!("{token}.{fingerprint}");
        let text = instructions(&target_type(url), &self.lang, token, &key_authorization)
            .map_err(|e| HandlerError::Other(e.to_string()))?;

        let mut guard = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let (input, output) = &mut *guard;
        let stdout = |e: io::Error| HandlerError::Io {
            path: "<output>".into(),
            source: e,
        };

        writeln!(output, "{url}\n{text}").map_err(stdout)?;
        write!(output, "> ").map_err(stdout)?;
        output.flush().map_err(stdout)?;

        let mut line = String::new();
        let read = input.read_line(&mut line).map_err(|e| HandlerError::Io {
            path: "<input>".into(),
            source: e,
        })?;
        if read == 0 || line.trim().eq_ignore_ascii_case("q") {
            return Err(HandlerError::Aborted);
        }
        Ok(())
    }
}
