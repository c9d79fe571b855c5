//! HTTP Digest authentication (RFC 2617, MD5, `qop=auth`).

use md5::{Digest, Md5};
use tracing::debug;

fn md5_hex(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b":");
        }
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// The `HA1` hash of `username:realm:password`.
///
/// Storing this instead of the password lets [`AuthenticationMiddleware::with_password_hash`]
/// check Digest credentials.
///
/// [`AuthenticationMiddleware::with_password_hash`]: crate::middleware::AuthenticationMiddleware::with_password_hash
pub fn digest_hash(username: &str, password: &str, realm: &str) -> String {
    md5_hex(&[username, realm, password])
}

fn random_hex() -> String {
    let seed: [u8; 16] = rand::random();
    let mut hasher = Md5::new();
    hasher.update(seed);
    format!("{:x}", hasher.finalize())
}

/// The `WWW-Authenticate` value challenging a client for Digest credentials.
pub(crate) fn challenge(realm: &str) -> String {
    format!("Digest realm=\"{realm}\", qop=\"auth\", nonce=\"{}\", opaque=\"{}\"", random_hex(), random_hex())
}

#[derive(Debug, Default)]
struct Credentials<'a> {
    username: &'a str,
    realm: &'a str,
    nonce: &'a str,
    uri: &'a str,
    response: &'a str,
    qop: &'a str,
    nc: &'a str,
    cnonce: &'a str,
}

impl<'a> Credentials<'a> {
    /// Reads the comma separated `name=value` list following `Digest `.
    fn parse(params: &'a str) -> Option<Self> {
        let mut credentials = Self::default();
        for field in params.split(',').map(str::trim).filter(|field| !field.is_empty()) {
            let (name, value) = field.split_once('=')?;
            let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
            match name.trim() {
                "username" => credentials.username = value,
                "realm" => credentials.realm = value,
                "nonce" => credentials.nonce = value,
                "uri" => credentials.uri = value,
                "response" => credentials.response = value,
                "qop" => credentials.qop = value,
                "nc" => credentials.nc = value,
                "cnonce" => credentials.cnonce = value,
                _ => {}
            }
        }
        Some(credentials)
    }
}

/// Recomputes the Digest response for `method` and compares it with the client's.
///
/// With `password_is_hash`, `password` is the [`digest_hash`] of the credentials.
pub(crate) fn verify(params: &str, method: &str, username: &str, password: &str, password_is_hash: bool) -> bool {
    let Some(credentials) = Credentials::parse(params) else {
        debug!("malformed digest credentials");
        return false;
    };
    if credentials.username != username {
        debug!(username = credentials.username, "digest username mismatch");
        return false;
    }

    let ha1 = if password_is_hash { password.to_owned() } else { digest_hash(username, password, credentials.realm) };
    let ha2 = md5_hex(&[method, credentials.uri]);
    let expected = if credentials.qop.is_empty() {
        md5_hex(&[ha1.as_str(), credentials.nonce, ha2.as_str()])
    } else {
        md5_hex(&[ha1.as_str(), credentials.nonce, credentials.nc, credentials.cnonce, credentials.qop, ha2.as_str()])
    };
    expected == credentials.response
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 2617, section 3.5
    const MUFASA: &str = "username=\"Mufasa\", realm=\"testrealm@host.com\", \
        nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", uri=\"/dir/index.html\", qop=auth, nc=00000001, \
        cnonce=\"0a4f113b\", response=\"6629fae49393a05397450978507c4ef1\", \
        opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"";

    #[test]
    fn rfc_example_verifies() {
        assert!(verify(MUFASA, "GET", "Mufasa", "Circle Of Life", false));
        let ha1 = digest_hash("Mufasa", "Circle Of Life", "testrealm@host.com");
        assert!(verify(MUFASA, "GET", "Mufasa", &ha1, true));
    }

    #[test]
    fn any_changed_input_fails() {
        assert!(!verify(MUFASA, "POST", "Mufasa", "Circle Of Life", false));
        assert!(!verify(MUFASA, "GET", "Simba", "Circle Of Life", false));
        assert!(!verify(MUFASA, "GET", "Mufasa", "circle of life", false));
        assert!(!verify(&MUFASA.replace("/dir/index.html", "/dir/other.html"), "GET", "Mufasa", "Circle Of Life", false));
        assert!(!verify("username=\"Mufasa\", broken", "GET", "Mufasa", "Circle Of Life", false));
    }

    #[test]
    fn challenge_carries_fresh_nonces() {
        let first = challenge("device");
        assert!(first.starts_with("Digest realm=\"device\", qop=\"auth\", nonce=\""));
        assert!(first.contains("\", opaque=\""));
        assert_eq!(first.len(), challenge("device").len());
        assert_ne!(first, challenge("device"));
    }
}
