//! 模塊提供與 ACME 帳戶註冊相關的功能，包括新註冊、既有帳戶的辨識與同意服務條款。

use serde::Deserialize;

use crate::{
    error::{AcmeError, Result},
    payload::{NewRegPayload, RegPayload},
    problem::{Problem, SuccessEnvelope},
    session::Session,
};

/// 伺服器上的帳戶註冊資訊。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// ACME 帳戶 URL。
    pub url: String,
    /// 服務條款 URL。
    pub agreement_url: Option<String>,
    /// 是否已同意服務條款。
    pub terms_accepted: bool,
    /// 帳戶授權列表的 URL。
    pub authorizations_url: Option<String>,
    /// 伺服器記錄的聯絡方式。
    pub contact: Vec<String>,
}

/// 註冊的結果。帳戶金鑰已註冊過並不是錯誤。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// 新建立的帳戶。
    Created(Registration),
    /// 金鑰已經註冊過，內容為重新讀取的既有帳戶。
    Existing(Registration),
}

impl RegistrationOutcome {
    pub fn registration(&self) -> &Registration {
        match self {
            RegistrationOutcome::Created(r) | RegistrationOutcome::Existing(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, RegistrationOutcome::Created(_))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RegistrationBody {
    #[serde(default)]
    contact: Vec<String>,
    agreement: Option<String>,
    authorizations: Option<String>,
}

impl Registration {
    fn from_envelope(
        url: String,
        envelope: &SuccessEnvelope,
        fallback_tos: Option<String>,
    ) -> Result<Self> {
        let body: RegistrationBody = match &envelope.json {
            Some(json) => serde_json::from_value(json.clone())?,
            None => RegistrationBody::default(),
        };

        Ok(Registration {
            url,
            agreement_url: envelope.link("terms-of-service").or(fallback_tos),
            terms_accepted: body.agreement.is_some(),
            authorizations_url: body.authorizations,
            contact: body.contact,
        })
    }
}

impl Session {
    /// 以帳戶金鑰註冊帳戶。
    ///
    /// 伺服器以 409 回應並附帶 `Location` 時，表示金鑰已註冊過；
    /// 此時會讀取既有帳戶並回傳 [`RegistrationOutcome::Existing`]。
    ///
    /// # Errors
    ///
    /// 尚未取得目錄時返回 [`AcmeError::OutOfOrder`]；其他伺服器問題原樣返回。
    pub fn register(&mut self) -> Result<RegistrationOutcome> {
        let directory = self.directory()?;
        let new_reg = directory.new_reg.clone();
        let fallback_tos = directory.terms_of_service().map(ToOwned::to_owned);

        log::debug!("Registering account at {new_reg}");
        let outcome = match self.post(&new_reg, &NewRegPayload::new(&self.contact)) {
            Ok(envelope) => {
                let url = envelope
                    .location()
                    .ok_or_else(|| {
                        AcmeError::InvalidResponse("Registration response has no Location header".into())
                    })?
                    .to_owned();
                RegistrationOutcome::Created(Registration::from_envelope(url, &envelope, fallback_tos)?)
            }
            Err(AcmeError::Protocol(Problem {
                status: 409,
                location: Some(url),
                ..
            })) => {
                log::info!("Account key already registered at {url}");
                let envelope = self.post(&url, &RegPayload::fetch())?;
                RegistrationOutcome::Existing(Registration::from_envelope(url, &envelope, fallback_tos)?)
            }
            Err(e) => return Err(e),
        };

        self.registration = Some(outcome.registration().clone());
        Ok(outcome)
    }

    /// 同意服務條款。
    ///
    /// 已同意時不送出任何請求。伺服器與目錄都沒有提供服務條款時只記錄警告。
    pub fn accept_tos(&mut self) -> Result<()> {
        let registration = self.registration()?.clone();
        if registration.terms_accepted {
            log::debug!("Terms of service already accepted");
            return Ok(());
        }

        let tos = registration.agreement_url.clone().or_else(|| {
            self.directory()
                .ok()
                .and_then(|d| d.terms_of_service())
                .map(ToOwned::to_owned)
        });
        let Some(tos) = tos else {
            log::warn!("Server did not publish terms of service, nothing to accept");
            return Ok(());
        };

        log::debug!("Accepting terms of service {tos}");
        self.post(&registration.url, &RegPayload::agree(&tos))?;

        if let Some(registration) = self.registration.as_mut() {
            registration.terms_accepted = true;
            registration.agreement_url = Some(tos);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        error::Step,
        problem::ProblemKind,
        test::{builder, connected, registered, reply, ScriptedTransport, BASE},
    };

    fn reg_url() -> String {
        format!("{BASE}/acme/reg/1")
    }

    #[test]
    fn test_register_created() {
        let transport = ScriptedTransport::default();
        let mut session = connected(&transport);
        transport.push(
            reply(201)
                .nonce("n-1")
                .location(&reg_url())
                .header("Link", &format!("<{BASE}/acme/new-authz>;rel=\"next\""))
                .header("Link", "<http://ca.test/terms/v2>;rel=\"terms-of-service\"")
                .json(json!({"contact": ["mailto:admin@example.com"]})),
        );

        let outcome = session.register().unwrap();
        assert!(outcome.is_new());
        let registration = outcome.registration();
        assert_eq!(registration.url, reg_url());
        assert_eq!(registration.agreement_url.as_deref(), Some("http://ca.test/terms/v2"));
        assert!(!registration.terms_accepted);
        assert_eq!(registration.contact, ["mailto:admin@example.com"]);

        let post = &transport.posts()[0];
        assert_eq!(post.url, format!("{BASE}/acme/new-reg"));
        assert_eq!(
            post.payload(),
            json!({"resource": "new-reg", "contact": ["mailto:admin@example.com"]})
        );
    }

    #[test]
    fn test_register_falls_back_to_directory_terms() {
        let transport = ScriptedTransport::default();
        let mut session = connected(&transport);
        transport.push(reply(201).nonce("n-1").location(&reg_url()).json(json!({})));

        let outcome = session.register().unwrap();
        assert_eq!(
            outcome.registration().agreement_url,
            Some(format!("{BASE}/terms"))
        );
    }

    #[test]
    fn test_register_twice_returns_same_account() {
        let transport = ScriptedTransport::default();
        let mut session = registered(&transport);
        transport.push(
            reply(409)
                .nonce("n-2")
                .location(&reg_url())
                .problem("malformed", "Registration key is already in use"),
        );
        transport.push(
            reply(202)
                .nonce("n-3")
                .json(json!({"agreement": format!("{BASE}/terms"), "contact": []})),
        );

        let outcome = session.register().unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Existing(_)));
        assert_eq!(outcome.registration().url, reg_url());
        assert!(outcome.registration().terms_accepted);

        let posts = transport.posts();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[2].url, reg_url());
        assert_eq!(posts[2].payload(), json!({"resource": "reg"}));
    }

    #[test]
    fn test_register_without_location_is_invalid_response() {
        let transport = ScriptedTransport::default();
        let mut session = connected(&transport);
        transport.push(reply(201).nonce("n-1").json(json!({})));

        assert!(matches!(session.register(), Err(AcmeError::InvalidResponse(_))));
    }

    #[test]
    fn test_register_problem_is_surfaced() {
        let transport = ScriptedTransport::default();
        let mut session = connected(&transport);
        transport.push(reply(400).nonce("n-1").problem("invalidEmail", "not a valid e-mail address"));

        let err = session.register().unwrap_err();
        assert_eq!(err.problem().unwrap().kind(), ProblemKind::InvalidEmail);
        assert!(session.registration().is_err());
    }

    #[test]
    fn test_register_before_directory() {
        let transport = ScriptedTransport::default();
        let mut session = builder(&transport).build().unwrap();
        assert!(matches!(session.register(), Err(AcmeError::OutOfOrder(Step::Directory))));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_accept_tos_is_idempotent() {
        let transport = ScriptedTransport::default();
        let mut session = registered(&transport);
        transport.push(reply(202).nonce("n-2").json(json!({"agreement": format!("{BASE}/terms")})));

        session.accept_tos().unwrap();
        let post = transport.posts().pop().unwrap();
        assert_eq!(post.url, reg_url());
        assert_eq!(
            post.payload(),
            json!({"resource": "reg", "agreement": format!("{BASE}/terms")})
        );
        assert!(session.registration().unwrap().terms_accepted);

        let sent = transport.requests().len();
        session.accept_tos().unwrap();
        assert_eq!(transport.requests().len(), sent);
    }

    #[test]
    fn test_accept_tos_without_terms_is_noop() {
        let transport = ScriptedTransport::new(vec![reply(200).nonce("n-dir").json(json!({
            "new-reg": format!("{BASE}/acme/new-reg"),
            "new-authz": format!("{BASE}/acme/new-authz"),
            "new-cert": format!("{BASE}/acme/new-cert"),
            "revoke-cert": format!("{BASE}/acme/revoke-cert")
        }))]);
        let mut session = builder(&transport).connect().unwrap();
        transport.push(reply(201).nonce("n-1").location(&reg_url()).json(json!({})));
        session.register().unwrap();

        let sent = transport.requests().len();
        session.accept_tos().unwrap();
        assert_eq!(transport.requests().len(), sent);
        assert!(!session.registration().unwrap().terms_accepted);
    }

    #[test]
    fn test_accept_tos_before_register() {
        let transport = ScriptedTransport::default();
        let mut session = connected(&transport);
        assert!(matches!(
            session.accept_tos(),
            Err(AcmeError::OutOfOrder(Step::Registration))
        ));
    }
}
