//! 測試用的腳本化傳輸層：依序回放預先排好的回應，並記錄每個請求。

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Method,
};
use serde_json::{json, Value};

use crate::{
    jws::Jws,
    key_pair::{KeyAlgorithm, KeyPair},
    nonce::REPLAY_NONCE,
    protection::ProtectedHeader,
    session::{PollPolicy, Session, SessionBuilder},
    transport::{HttpResponse, Transport, TransportError},
};

pub const BASE: &str = "http://ca.test";

pub fn directory_json() -> Value {
    json!({
        "new-reg": format!("{BASE}/acme/new-reg"),
        "new-authz": format!("{BASE}/acme/new-authz"),
        "new-cert": format!("{BASE}/acme/new-cert"),
        "revoke-cert": format!("{BASE}/acme/revoke-cert"),
        "meta": {
            "terms-of-service": format!("{BASE}/terms"),
            "website": "https://ca.test/docs"
        }
    })
}

/// 一個預先排好的回應。
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    headers: HeaderMap,
    body: Vec<u8>,
}

pub fn reply(status: u16) -> Reply {
    Reply {
        status,
        headers: HeaderMap::new(),
        body: Vec::new(),
    }
}

impl Reply {
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        self
    }

    pub fn nonce(self, value: &str) -> Self {
        self.header(REPLAY_NONCE, value)
    }

    pub fn location(self, value: &str) -> Self {
        self.header("Location", value)
    }

    pub fn json(mut self, value: Value) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = serde_json::to_vec(&value).unwrap();
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// `urn:acme:error:<name>` 形式的問題回應。
    pub fn problem(mut self, name: &str, detail: &str) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/problem+json"));
        self.body = serde_json::to_vec(&json!({
            "type": format!("urn:acme:error:{name}"),
            "detail": detail,
            "status": self.status,
        }))
        .unwrap();
        self
    }
}

/// 傳輸層收到的請求。
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub body: Option<Vec<u8>>,
}

impl Recorded {
    fn jws(&self) -> Jws {
        serde_json::from_slice(self.body.as_deref().expect("request has no body")).unwrap()
    }

    /// 解碼後的 JWS 負載。
    pub fn payload(&self) -> Value {
        self.jws().payload().unwrap()
    }

    pub fn protected(&self) -> ProtectedHeader {
        self.jws().protected_header().unwrap()
    }

    pub fn resource(&self) -> String {
        self.payload()["resource"].as_str().unwrap_or_default().to_owned()
    }
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Reply>,
    requests: Vec<Recorded>,
}

/// 依序回放回應的傳輸層；複製品共用同一份腳本。
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        let transport = Self::default();
        for r in replies {
            transport.push(r);
        }
        transport
    }

    pub fn push(&self, reply: Reply) {
        self.lock().replies.push_back(reply);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.lock().requests.clone()
    }

    /// 已送出的簽名請求（POST）。
    pub fn posts(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::POST)
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.lock().replies.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for ScriptedTransport {
    fn request(
        &self,
        method: Method,
        url: &str,
        _headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, TransportError> {
        let mut script = self.lock();
        script.requests.push(Recorded {
            method: method.clone(),
            url: url.to_owned(),
            body: body.map(<[u8]>::to_vec),
        });

        let reply = script
            .replies
            .pop_front()
            .ok_or_else(|| TransportError::Connection(format!("script exhausted at {method} {url}")))?;

        Ok(HttpResponse {
            status: reply.status,
            headers: reply.headers,
            body: reply.body,
        })
    }
}

/// 不等待的輪詢策略。
pub fn instant_polls() -> PollPolicy {
    PollPolicy {
        interval: Duration::ZERO,
        max_wait: Duration::from_secs(60),
        backoff: 1.0,
    }
}

pub fn account_key() -> KeyPair {
    KeyPair::generate(KeyAlgorithm::EcP256, None).unwrap()
}

pub fn builder(transport: &ScriptedTransport) -> SessionBuilder {
    SessionBuilder::new(BASE)
        .signer(account_key())
        .transport(transport.clone())
        .contact("admin@example.com")
        .poll_policy(instant_polls())
}

/// 已取得目錄的工作階段。
pub fn connected(transport: &ScriptedTransport) -> Session {
    transport.push(reply(200).nonce("n-dir").json(directory_json()));
    builder(transport).connect().unwrap()
}

/// 已取得目錄並完成註冊的工作階段。
pub fn registered(transport: &ScriptedTransport) -> Session {
    let mut session = connected(transport);
    transport.push(
        reply(201)
            .nonce("n-reg")
            .location(&format!("{BASE}/acme/reg/1"))
            .header("Link", &format!("<{BASE}/terms>;rel=\"terms-of-service\""))
            .json(json!({"contact": ["mailto:admin@example.com"]})),
    );
    session.register().unwrap();
    session
}

pub fn pending_authz(domain: &str) -> Value {
    json!({
        "identifier": {"type": "dns", "value": domain},
        "status": "pending",
        "challenges": [
            {"type": "tls-sni-01", "uri": format!("{BASE}/acme/challenge/1/1"), "token": "sni-token", "status": "pending"},
            {"type": "http-01", "uri": format!("{BASE}/acme/challenge/1/2"), "token": "http-token", "status": "pending"},
            {"type": "dns-01", "uri": format!("{BASE}/acme/challenge/1/3"), "token": "dns-token", "status": "pending"}
        ],
        "combinations": [[0], [1], [2]]
    })
}

pub fn challenge_json(status: &str) -> Value {
    json!({
        "type": "http-01",
        "uri": format!("{BASE}/acme/challenge/1/2"),
        "token": "http-token",
        "status": status
    })
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

mod tests {
    use std::thread;

    use super::*;
    use crate::{
        account::RegistrationOutcome,
        certificate::RevocationReason,
        csr::Csr,
        error::AcmeError,
        handler::LocalFileHandler,
    };

    #[test]
    fn test_full_issuance_request_order() {
        init_logger();
        let webroot = tempfile::tempdir().unwrap();
        let transport = ScriptedTransport::new(vec![
            reply(200).nonce("n0").json(directory_json()),
            reply(201)
                .nonce("n1")
                .location(&format!("{BASE}/acme/reg/1"))
                .header("Link", &format!("<{BASE}/terms>;rel=\"terms-of-service\""))
                .json(json!({"contact": ["mailto:admin@example.com"]})),
            reply(202).nonce("n2").json(json!({"agreement": format!("{BASE}/terms")})),
            reply(201)
                .nonce("n3")
                .location(&format!("{BASE}/acme/authz/1"))
                .json(pending_authz("example.com")),
            reply(202).nonce("n4").json(challenge_json("pending")),
            reply(202).json(challenge_json("valid")),
            reply(201)
                .nonce("n5")
                .location(&format!("{BASE}/acme/cert/1"))
                .body(vec![0x30, 0x82, 0x01]),
        ]);

        let mut session = builder(&transport).connect().unwrap();
        assert!(session.register().unwrap().is_new());
        session.accept_tos().unwrap();

        let challenge = session.authorize("example.com").unwrap();
        let handler = LocalFileHandler::new(webroot.path());
        session.check_challenge(&challenge, &handler).unwrap();

        let cert_key = account_key();
        let csr = Csr::new().add_domain("example.com").to_der(&cert_key).unwrap();
        let issued = session.sign_certificate(&csr).unwrap();
        assert_eq!(issued.der, [0x30, 0x82, 0x01]);

        let written = std::fs::read_to_string(handler.challenge_path("http-token")).unwrap();
        assert_eq!(written, format!("http-token.{}", session.thumbprint().unwrap()));

        let order: Vec<(Method, String)> = transport
            .requests()
            .into_iter()
            .map(|r| {
                let resource = if r.method == Method::POST { r.resource() } else { String::new() };
                (r.method, resource)
            })
            .collect();
        assert_eq!(
            order,
            [
                (Method::GET, String::new()),
                (Method::POST, "new-reg".to_owned()),
                (Method::POST, "reg".to_owned()),
                (Method::POST, "new-authz".to_owned()),
                (Method::POST, "challenge".to_owned()),
                (Method::GET, String::new()),
                (Method::POST, "new-cert".to_owned()),
            ]
        );

        let nonces: Vec<String> = transport.posts().iter().map(|r| r.protected().nonce).collect();
        assert_eq!(nonces, ["n0", "n1", "n2", "n3", "n4"]);
        assert_eq!(transport.remaining(), 0);
    }

    #[test]
    fn test_every_post_is_signed_with_account_key() {
        let transport = ScriptedTransport::default();
        let session = registered(&transport);
        let jwk = session.signer().jwk().unwrap().to_value().unwrap();

        for post in transport.posts() {
            let header = post.protected();
            assert_eq!(header.alg, "ES256");
            assert_eq!(header.jwk, jwk);
            assert_eq!(header.url.as_deref(), Some(post.url.as_str()));
        }
    }

    #[test]
    fn test_existing_account_then_revoke() {
        let transport = ScriptedTransport::default();
        let mut session = connected(&transport);
        transport.push(
            reply(409)
                .nonce("n1")
                .location(&format!("{BASE}/acme/reg/9"))
                .problem("malformed", "Registration key is already in use"),
        );
        transport.push(reply(202).nonce("n2").json(json!({"agreement": format!("{BASE}/terms")})));
        transport.push(reply(200).nonce("n3"));

        let outcome = session.register().unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Existing(ref r) if r.url.ends_with("/reg/9")));

        let sent = transport.requests().len();
        session.accept_tos().unwrap();
        assert_eq!(transport.requests().len(), sent);

        session
            .revoke_certificate(&[0x30, 0x82], Some(RevocationReason::Superseded))
            .unwrap();
        assert_eq!(transport.posts().last().unwrap().resource(), "revoke-cert");
    }

    #[test]
    fn test_concurrent_authorizations_use_distinct_nonces() {
        let transport = ScriptedTransport::default();
        let session = registered(&transport);
        for i in 0..4 {
            transport.push(
                reply(201)
                    .nonce(&format!("n-authz-{i}"))
                    .json(pending_authz("example.com")),
            );
        }

        thread::scope(|scope| {
            for i in 0..4 {
                let session = &session;
                scope.spawn(move || session.authorize(&format!("host{i}.example.com")));
            }
        });

        let mut nonces: Vec<String> = transport.posts().iter().map(|r| r.protected().nonce).collect();
        let total = nonces.len();
        nonces.sort();
        nonces.dedup();
        assert_eq!(nonces.len(), total);
    }

    #[test]
    fn test_fault_is_always_complete() {
        let transport = ScriptedTransport::default();
        let mut session = builder(&transport).build().unwrap();

        let errors: Vec<AcmeError> = vec![
            session.register().unwrap_err(),
            session.fetch_directory().unwrap_err(),
        ];
        for err in errors {
            let fault = err.fault();
            assert!(!fault.detail.is_empty());
            assert!(!fault.problem_type.is_empty());
        }
    }
}
