//! Built-in protocol probes
//!
//! Each probe inspects the first bytes of a connection. All of them answer
//! `Pending` until they have their minimum number of bytes.

use log::trace;

use super::matcher::MatchResult;

/// Request methods accepted by the HTTP probes
const HTTP_METHODS: [&[u8]; 8] = [
    b"GET", b"HEAD", b"POST", b"PUT", b"DELETE", b"OPTIONS", b"PATCH", b"TRACE",
];

/// Window in which the request-line space must appear
const HTTP_METHOD_WINDOW: usize = 8;

/// TLS handshake record content type
const TLS_HANDSHAKE: u8 = 22;

/// Highest accepted value for both TLS record version bytes
const TLS_MAX_VERSION_BYTE: u8 = 3;

/// SOCKS protocol version byte
const SOCKS5_VERSION: u8 = 5;

/// A built-in protocol probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Probe {
    /// Origin-form HTTP request (`GET /path ...`)
    HttpPlain,
    /// Absolute-form HTTP request to a forward proxy (`GET http://...`)
    HttpProxy,
    /// `CONNECT host:port` tunnel request
    HttpsProxy,
    /// SOCKS5 greeting
    Socks5,
    /// TLS handshake record
    Tls,
}

impl Probe {
    /// Protocol name
    pub fn name(&self) -> &'static str {
        match self {
            Probe::HttpPlain => "http",
            Probe::HttpProxy => "http-proxy",
            Probe::HttpsProxy => "https-proxy",
            Probe::Socks5 => "socks5",
            Probe::Tls => "tls",
        }
    }

    /// Bytes needed before the probe can decide
    pub fn min_bytes(&self) -> usize {
        match self {
            Probe::HttpPlain | Probe::HttpProxy | Probe::HttpsProxy => 8,
            Probe::Socks5 => 2,
            Probe::Tls => 3,
        }
    }

    /// Probe the accumulated bytes
    pub fn matches(&self, buf: &[u8]) -> MatchResult {
        if buf.len() < self.min_bytes() {
            return MatchResult::Pending;
        }

        let result = match self {
            Probe::HttpPlain => match_request_line(buf, true),
            Probe::HttpProxy => match_request_line(buf, false),
            Probe::HttpsProxy => {
                if buf[..8].eq_ignore_ascii_case(b"CONNECT ") {
                    MatchResult::Match
                } else {
                    MatchResult::Mismatch
                }
            }
            // The second byte (method count) is not validated.
            Probe::Socks5 => {
                if buf[0] == SOCKS5_VERSION {
                    MatchResult::Match
                } else {
                    MatchResult::Mismatch
                }
            }
            Probe::Tls => {
                if buf[0] == TLS_HANDSHAKE
                    && buf[1] <= TLS_MAX_VERSION_BYTE
                    && buf[2] <= TLS_MAX_VERSION_BYTE
                {
                    MatchResult::Match
                } else {
                    MatchResult::Mismatch
                }
            }
        };

        trace!("{} probe on {} bytes: {:?}", self.name(), buf.len(), result);
        result
    }
}

/// Shared request-line check for the two HTTP probes
///
/// `origin_form` selects whether the request target must start with `/`
/// (plain HTTP) or must not (proxy request).
fn match_request_line(buf: &[u8], origin_form: bool) -> MatchResult {
    let space = match buf[..HTTP_METHOD_WINDOW].iter().position(|&b| b == b' ') {
        Some(index) => index,
        None => return MatchResult::Mismatch,
    };

    let target = space + 1;
    if buf.len() < target + 1 {
        return MatchResult::Pending;
    }

    let method = &buf[..space];
    if !HTTP_METHODS.contains(&method) {
        return MatchResult::Mismatch;
    }

    if (buf[target] == b'/') == origin_form {
        MatchResult::Match
    } else {
        MatchResult::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MatchResult::*;

    #[test]
    fn test_http_plain() {
        assert_eq!(Probe::HttpPlain.matches(b"GET / HT"), Match);
        assert_eq!(Probe::HttpPlain.matches(b"OPTIONS /x"), Match);
        assert_eq!(Probe::HttpPlain.matches(b"GET /"), Pending);
        assert_eq!(Probe::HttpPlain.matches(b"OPTIONS "), Pending);
        assert_eq!(Probe::HttpPlain.matches(b"FOO / HTTP/1.1"), Mismatch);
        assert_eq!(Probe::HttpPlain.matches(b"get / HTTP/1.1"), Mismatch);
        assert_eq!(Probe::HttpPlain.matches(b"GET http://a/"), Mismatch);
        assert_eq!(Probe::HttpPlain.matches(b"ABCDEFGHIJ"), Mismatch);
    }

    #[test]
    fn test_http_proxy() {
        assert_eq!(Probe::HttpProxy.matches(b"GET http://example.com/ HTTP/1.1"), Match);
        assert_eq!(Probe::HttpProxy.matches(b"GET / HTTP/1.1"), Mismatch);
        assert_eq!(Probe::HttpProxy.matches(b"CONNECT a:443 HTTP/1.1"), Mismatch);
        assert_eq!(Probe::HttpProxy.matches(b"GET"), Pending);
    }

    #[test]
    fn test_https_proxy() {
        assert_eq!(Probe::HttpsProxy.matches(b"CONNECT example.com:443 HTTP/1.1"), Match);
        assert_eq!(Probe::HttpsProxy.matches(b"connect example.com:443"), Match);
        assert_eq!(Probe::HttpsProxy.matches(b"CONNECT"), Pending);
        assert_eq!(Probe::HttpsProxy.matches(b"CONNECTX host"), Mismatch);
    }

    #[test]
    fn test_socks5() {
        assert_eq!(Probe::Socks5.matches(&[5]), Pending);
        assert_eq!(Probe::Socks5.matches(&[5, 1, 0]), Match);
        assert_eq!(Probe::Socks5.matches(&[5, 0xff]), Match);
        assert_eq!(Probe::Socks5.matches(&[4, 1]), Mismatch);
    }

    #[test]
    fn test_tls() {
        assert_eq!(Probe::Tls.matches(&[22, 3]), Pending);
        assert_eq!(Probe::Tls.matches(&[22, 3, 1, 0, 0x31]), Match);
        assert_eq!(Probe::Tls.matches(&[22, 3, 3]), Match);
        assert_eq!(Probe::Tls.matches(&[22, 3, 4]), Mismatch);
        assert_eq!(Probe::Tls.matches(&[22, 0x80, 1]), Mismatch);
        assert_eq!(Probe::Tls.matches(&[23, 3, 3]), Mismatch);
    }

    #[test]
    fn test_min_bytes_never_mismatch() {
        let probes = [Probe::HttpPlain, Probe::HttpProxy, Probe::HttpsProxy, Probe::Socks5, Probe::Tls];
        for probe in probes {
            for len in 0..probe.min_bytes() {
                let buf = vec![0xAAu8; len];
                assert_eq!(probe.matches(&buf), Pending, "{} with {} bytes", probe.name(), len);
            }
        }
    }
}
