// HTTP Digest authentication (RFC 2617, MD5, qop=auth).
//
// Parses a `WWW-Authenticate: Digest ...` challenge and produces the
// matching `Authorization` header per request with an incrementing
// nonce count.

use std::sync::atomic::{AtomicU32, Ordering};

use secrecy::{ExposeSecret, SecretString};

/// Parsed server challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value. Returns `None` for
    /// non-digest schemes or a challenge without realm/nonce.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = None;

        for (key, value) in split_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => qop = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = Some(value),
                _ => {}
            }
        }

        // Only `auth` is implemented; `auth-int` alone is treated as absent.
        let qop = qop.and_then(|list| {
            list.split(',')
                .map(str::trim)
                .find(|q| q.eq_ignore_ascii_case("auth"))
                .map(str::to_owned)
        });

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            qop,
            opaque,
            algorithm,
        })
    }
}

/// Split `k="v", k2=v2` pairs, honouring commas inside quotes.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let mut flush = |chunk: &str| {
        if let Some((k, v)) = chunk.split_once('=') {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(v);
            out.push((k.trim().to_owned(), v.to_owned()));
        }
    };

    for c in params.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                flush(&current);
                current.clear();
            }
            _ => current.push(c),
        }
    }
    flush(&current);
    out
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Inputs to a single digest response computation.
pub(crate) struct DigestInput<'a> {
    pub username: &'a str,
    pub realm: &'a str,
    pub password: &'a str,
    pub method: &'a str,
    pub uri: &'a str,
    pub nonce: &'a str,
    pub nc: &'a str,
    pub cnonce: &'a str,
    pub qop: Option<&'a str>,
}

/// `response` value per RFC 2617 section 3.2.2.1.
pub(crate) fn compute_response(input: &DigestInput<'_>) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", input.username, input.realm, input.password));
    let ha2 = md5_hex(&format!("{}:{}", input.method, input.uri));
    match input.qop {
        Some(qop) => md5_hex(&format!(
            "{ha1}:{}:{}:{}:{qop}:{ha2}",
            input.nonce, input.nc, input.cnonce
        )),
        None => md5_hex(&format!("{ha1}:{}:{ha2}", input.nonce)),
    }
}

/// Digest session: challenge plus credentials plus nonce counter.
#[derive(Debug)]
pub(crate) struct DigestSession {
    username: String,
    password: SecretString,
    challenge: DigestChallenge,
    nonce_count: AtomicU32,
}

impl DigestSession {
    pub fn new(username: &str, password: &SecretString, challenge: DigestChallenge) -> Self {
        Self {
            username: username.to_owned(),
            password: password.clone(),
            challenge,
            nonce_count: AtomicU32::new(0),
        }
    }

    /// Build the `Authorization` header value for one request.
    pub fn authorization(&self, method: &str, uri: &str) -> String {
        let nc = format!("{:08x}", self.nonce_count.fetch_add(1, Ordering::Relaxed) + 1);
        let cnonce = uuid::Uuid::new_v4().simple().to_string();
        let qop = self.challenge.qop.as_deref();

        let response = compute_response(&DigestInput {
            username: &self.username,
            realm: &self.challenge.realm,
            password: self.password.expose_secret(),
            method,
            uri,
            nonce: &self.challenge.nonce,
            nc: &nc,
            cnonce: &cnonce,
            qop,
        });

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", response=\"{response}\"",
            self.username, self.challenge.realm, self.challenge.nonce
        );
        if let Some(qop) = qop {
            header.push_str(&format!(", qop={qop}, nc={nc}, cnonce=\"{cnonce}\""));
        }
        if let Some(ref opaque) = self.challenge.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        if let Some(ref algorithm) = self.challenge.algorithm {
            header.push_str(&format!(", algorithm={algorithm}"));
        }
        header
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const RFC_CHALLENGE: &str = r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#;

    #[test]
    fn parses_rfc_2617_challenge() {
        let c = DigestChallenge::parse(RFC_CHALLENGE).unwrap();
        assert_eq!(c.realm, "testrealm@host.com");
        assert_eq!(c.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(c.qop.as_deref(), Some("auth"));
        assert_eq!(c.opaque.as_deref(), Some("5ccc069c403ebaf9f0171e9517f40e41"));
    }

    #[test]
    fn rejects_basic_scheme() {
        assert!(DigestChallenge::parse(r#"Basic realm="x""#).is_none());
    }

    #[test]
    fn computes_rfc_2617_example_response() {
        let response = compute_response(&DigestInput {
            username: "Mufasa",
            realm: "testrealm@host.com",
            password: "Circle Of Life",
            method: "GET",
            uri: "/dir/index.html",
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093",
            nc: "00000001",
            cnonce: "0a4f113b",
            qop: Some("auth"),
        });
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn nonce_count_increments_per_request() {
        let challenge = DigestChallenge::parse(RFC_CHALLENGE).unwrap();
        let session = DigestSession::new("admin", &"pw".to_string().into(), challenge);
        let first = session.authorization("GET", "/api/system/deviceinfo");
        let second = session.authorization("GET", "/api/system/deviceinfo");
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
    }
}
