use serde::{Deserialize, Serialize};

use crate::{
    challenge::{Challenge, ChallengeStatus, ChallengeType},
    error::{AcmeError, Result, CLIENT_ERROR_PREFIX},
    handler::ChallengeHandler,
    payload::{ChallengeResponsePayload, Identifier, NewAuthzPayload},
    problem::{Problem, SuccessEnvelope},
    session::{Poller, Session},
};

/// 單一域名的授權。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    #[serde(default)]
    pub status: ChallengeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    /// 可完成授權的挑戰組合（`challenges` 的索引）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combinations: Option<Vec<Vec<usize>>>,
    /// 授權的 URL，取自回應的 `Location`。
    #[serde(skip)]
    pub url: Option<String>,
}

impl Authorization {
    pub fn domain(&self) -> &str {
        &self.identifier.value
    }

    /// 可以單獨完成授權的挑戰。沒有 `combinations` 時每個挑戰都算。
    fn standalone(&self) -> impl Iterator<Item = &Challenge> {
        self.challenges.iter().enumerate().filter_map(move |(i, c)| {
            let usable = match &self.combinations {
                Some(combinations) => combinations.iter().any(|combo| combo.as_slice() == [i]),
                None => true,
            };
            usable.then_some(c)
        })
    }

    /// 依偏好順序選出第一個伺服器提供的挑戰。
    pub fn select(&self, preference: &[ChallengeType]) -> Option<&Challenge> {
        preference
            .iter()
            .find_map(|wanted| self.standalone().find(|c| &c.challenge_type == wanted))
    }
}

/// 解析挑戰回應並保留所屬域名。
fn read_challenge(envelope: &SuccessEnvelope, domain: &str) -> Result<Challenge> {
    let json = envelope
        .json
        .clone()
        .ok_or_else(|| AcmeError::InvalidResponse("Challenge response is not JSON".into()))?;
    let mut challenge: Challenge = serde_json::from_value(json)?;
    challenge.domain = domain.to_owned();
    Ok(challenge)
}

fn challenge_failed(challenge: &Challenge) -> AcmeError {
    let problem = challenge.error.clone().unwrap_or_else(|| {
        Problem::new(
            format!("{CLIENT_ERROR_PREFIX}challengeFailed"),
            format!("{} challenge ended as {}", challenge.challenge_type, challenge.status.as_str()),
            0,
        )
    });
    AcmeError::ChallengeFailed {
        domain: challenge.domain.clone(),
        problem,
    }
}

impl Session {
    /// 為域名申請授權並依挑戰偏好選出一個挑戰。
    ///
    /// 授權會記錄在工作階段中，可用 [`Session::authorization`] 查詢。
    ///
    /// # Errors
    ///
    /// - 尚未取得目錄或尚未註冊：[`AcmeError::OutOfOrder`]
    /// - 伺服器提供的挑戰都不在偏好清單內：[`AcmeError::UnsupportedChallenge`]
    pub fn authorize(&self, domain: &str) -> Result<Challenge> {
        self.registration()?;
        let new_authz = self.directory()?.new_authz.clone();

        log::debug!("Requesting authorization for {domain}");
        let envelope = self.post(&new_authz, &NewAuthzPayload::new(domain))?;

        let mut authorization: Authorization = envelope.parse()?;
        authorization.url = envelope.location().map(ToOwned::to_owned);
        for challenge in &mut authorization.challenges {
            challenge.domain = domain.to_owned();
        }

        let selected = authorization.select(&self.challenge_preference).cloned();
        let offered = authorization
            .challenges
            .iter()
            .map(|c| c.challenge_type.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        self.authorizations_map()
            .insert(domain.to_owned(), authorization);

        selected.ok_or(AcmeError::UnsupportedChallenge(offered))
    }

    /// 完成挑戰並等待伺服器驗證結果。
    ///
    /// 挑戰已是 `valid` 時直接返回，不呼叫 `handler` 也不送出請求。
    /// 否則依序：呼叫 `handler` 佈署、通知伺服器、輪詢挑戰 URI 直到狀態不再是
    /// `pending` 或 `processing`。只在兩次輪詢之間等待。
    ///
    /// # Errors
    ///
    /// - 挑戰變為 `invalid`：[`AcmeError::ChallengeFailed`]
    /// - 超過輪詢上限：[`AcmeError::Timeout`]
    /// - 取消旗標被觸發：[`AcmeError::Cancelled`]
    pub fn check_challenge(&self, challenge: &Challenge, handler: &dyn ChallengeHandler) -> Result<()> {
        self.registration()?;
        if challenge.status == ChallengeStatus::Valid {
            log::debug!("Challenge for {} is already valid", challenge.domain);
            return Ok(());
        }

        let thumbprint = self.thumbprint()?;
        log::info!("Fulfilling {} challenge for {}", challenge.challenge_type, challenge.domain);
        handler.fulfill(&thumbprint, &challenge.token, &challenge.validation_target())?;

        let payload = ChallengeResponsePayload::new(
            challenge.challenge_type.as_str(),
            &challenge.key_authorization(&thumbprint),
        );
        let envelope = self.post(&challenge.uri, &payload)?;
        let mut current = read_challenge(&envelope, &challenge.domain)?;

        let mut poller = Poller::new(self.poll_policy, &self.cancellation);
        let mut hint = None;
        let mut polls = 0u32;
        loop {
            match current.status {
                ChallengeStatus::Valid => {
                    log::info!("Challenge for {} is valid after {polls} polls", current.domain);
                    self.record_valid(&current);
                    return Ok(());
                }
                status if status.is_in_progress() => {}
                _ => return Err(challenge_failed(&current)),
            }

            if polls == 0 {
                poller.checkpoint()?;
            } else {
                poller.wait(hint)?;
            }
            polls += 1;

            let envelope = self.get(&challenge.uri)?;
            hint = envelope.retry_after();
            current = read_challenge(&envelope, &challenge.domain)?;
        }
    }

    fn record_valid(&self, challenge: &Challenge) {
        let mut authorizations = self.authorizations_map();
        if let Some(authorization) = authorizations.get_mut(&challenge.domain) {
            authorization.status = ChallengeStatus::Valid;
            for c in &mut authorization.challenges {
                if c.uri == challenge.uri {
                    c.status = ChallengeStatus::Valid;
                }
            }
        }
    }
}
