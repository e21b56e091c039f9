//! Digest answers to 401/407 challenges

use rsip::headers::auth::{Algorithm, AuthQop, Qop, Scheme};
use rsip::prelude::*;
use rsip::services::DigestGenerator;
use rsip::{typed, Header};

use super::{Credentials, SipResponse};

/// Which challenge a response carries and how to answer it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// 401 with `WWW-Authenticate`, answered with `Authorization`
    Server,
    /// 407 with `Proxy-Authenticate`, answered with `Proxy-Authorization`
    Proxy,
}

impl ChallengeKind {
    /// Challenge kind for a response status, if it is one
    pub fn for_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(Self::Server),
            407 => Some(Self::Proxy),
            _ => None,
        }
    }

    fn header_name(&self) -> &'static str {
        match self {
            Self::Server => "WWW-Authenticate",
            Self::Proxy => "Proxy-Authenticate",
        }
    }
}

/// First Digest challenge of `kind` in `response` that parses
pub fn find_challenge(response: &SipResponse, kind: ChallengeKind) -> Option<typed::WwwAuthenticate> {
    response
        .get_all(kind.header_name())
        .filter_map(|value| match kind {
            ChallengeKind::Server => rsip::headers::WwwAuthenticate::new(value).typed().ok(),
            ChallengeKind::Proxy => rsip::headers::ProxyAuthenticate::new(value)
                .typed()
                .ok()
                .map(|proxy| proxy.0),
        })
        .find(|challenge| challenge.scheme == Scheme::Digest)
}

/// Header answering `challenge` for `request`
pub fn answer(
    challenge: typed::WwwAuthenticate,
    kind: ChallengeKind,
    credentials: &Credentials,
    request: &rsip::Request,
    cnonce: String,
) -> Header {
    let qop = match challenge.qop {
        Some(Qop::Auth) => Some(AuthQop::Auth { cnonce, nc: 1 }),
        Some(Qop::AuthInt) => Some(AuthQop::AuthInt { cnonce, nc: 1 }),
        _ => None,
    };
    let algorithm = challenge.algorithm.unwrap_or(Algorithm::Md5);

    let response = DigestGenerator {
        username: &credentials.username,
        password: &credentials.password,
        algorithm: algorithm.clone(),
        nonce: &challenge.nonce,
        method: &request.method,
        qop: qop.as_ref(),
        uri: &request.uri,
        realm: &challenge.realm,
    }
    .compute();

    let authorization = typed::Authorization {
        scheme: Scheme::Digest,
        username: credentials.username.clone(),
        realm: challenge.realm,
        nonce: challenge.nonce,
        uri: request.uri.clone(),
        response,
        algorithm: Some(algorithm),
        opaque: challenge.opaque,
        qop,
    };
    match kind {
        ChallengeKind::Server => authorization.into(),
        ChallengeKind::Proxy => typed::ProxyAuthorization(authorization).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn register() -> rsip::Request {
        rsip::Request {
            method: rsip::Method::Register,
            uri: rsip::Uri::try_from("sip:reseller.example.com").unwrap(),
            version: rsip::Version::V2,
            headers: Vec::<Header>::new().into(),
            body: Vec::new(),
        }
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "alice".into(),
            password: "secret".into(),
        }
    }

    #[test]
    fn test_challenge_kind_for_status() {
        assert_eq!(ChallengeKind::for_status(401), Some(ChallengeKind::Server));
        assert_eq!(ChallengeKind::for_status(407), Some(ChallengeKind::Proxy));
        assert_eq!(ChallengeKind::for_status(403), None);
    }

    #[test]
    fn test_www_authenticate_answered_with_authorization() {
        let response = SipResponse::new(401, "Unauthorized").with_header(
            "WWW-Authenticate",
            "Digest realm=\"reseller.example.com\", nonce=\"abc\", opaque=\"xyz\", algorithm=MD5",
        );
        let challenge = find_challenge(&response, ChallengeKind::Server).unwrap();
        assert_eq!(challenge.realm, "reseller.example.com");
        assert_eq!(challenge.nonce, "abc");

        let header = answer(challenge, ChallengeKind::Server, &credentials(), &register(), "c0ffee".into());
        let text = header.to_string();
        assert!(text.starts_with("Authorization: Digest "), "{}", text);
        assert!(text.contains("username=\"alice\""));
        assert!(text.contains("realm=\"reseller.example.com\""));
        assert!(text.contains("nonce=\"abc\""));
        assert!(text.contains("opaque=\"xyz\""));
    }

    #[test]
    fn test_proxy_challenge_answered_with_proxy_authorization() {
        let response = SipResponse::new(407, "Proxy Authentication Required").with_header(
            "Proxy-Authenticate",
            "Digest realm=\"sbc\", nonce=\"n1\", qop=\"auth\"",
        );
        assert!(find_challenge(&response, ChallengeKind::Server).is_none());
        let challenge = find_challenge(&response, ChallengeKind::Proxy).unwrap();

        let text = answer(challenge, ChallengeKind::Proxy, &credentials(), &register(), "c0ffee".into()).to_string();
        assert!(text.starts_with("Proxy-Authorization: Digest "), "{}", text);
        assert!(text.contains("cnonce=\"c0ffee\""));
    }

    #[test]
    fn test_non_digest_challenge_ignored() {
        let response = SipResponse::new(401, "Unauthorized").with_header("WWW-Authenticate", "Basic realm=\"x\"");
        assert!(find_challenge(&response, ChallengeKind::Server).is_none());
    }
}
