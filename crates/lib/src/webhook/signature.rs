//! Webhook signature verification.
//!
//! Header format is `hmac;1;<timestamp>;<base64 digest>`, possibly several candidates separated
//! by commas. The digest is HMAC-SHA256 over `<timestamp>.<raw body>` keyed with the decoded
//! signing secret. Timestamps above 10^12 are milliseconds.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "openphone-signature";

const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingHeader,
    MalformedHeader,
    SecretNotConfigured,
    StaleTimestamp,
    DigestMismatch,
}

impl RejectReason {
    /// When several candidates fail, the most specific reason is reported.
    fn rank(self) -> u8 {
        match self {
            RejectReason::MissingHeader | RejectReason::SecretNotConfigured => 0,
            RejectReason::MalformedHeader => 1,
            RejectReason::StaleTimestamp => 2,
            RejectReason::DigestMismatch => 3,
        }
    }

    fn max(self, other: RejectReason) -> RejectReason {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RejectReason::MissingHeader => "missing webhook signature",
            RejectReason::MalformedHeader => "malformed webhook signature",
            RejectReason::SecretNotConfigured => "signing secret not configured",
            RejectReason::StaleTimestamp => "signature timestamp outside tolerance",
            RejectReason::DigestMismatch => "invalid webhook signature",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Verified,
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_verified(self) -> bool {
        self == Verdict::Verified
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("signing secret is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("signing secret is empty")]
    Empty,
}

/// Verifies request signatures against a shared key. Holds no per-request state.
#[derive(Clone)]
pub struct SignatureVerifier {
    key: Vec<u8>,
    tolerance_secs: u64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("key", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

struct Candidate<'h> {
    timestamp_raw: &'h str,
    timestamp_secs: i64,
    digest: Vec<u8>,
}

fn parse_candidate(candidate: &str) -> Option<Candidate<'_>> {
    let mut parts = candidate.split(';');
    let (scheme, version, ts, digest) = (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || scheme != "hmac" || version != "1" {
        return None;
    }
    let ts_value: i64 = ts.trim().parse().ok()?;
    let timestamp_secs = if ts_value > MILLIS_THRESHOLD {
        ts_value / 1000
    } else {
        ts_value
    };
    let digest = STANDARD.decode(digest.trim()).ok()?;
    Some(Candidate {
        timestamp_raw: ts,
        timestamp_secs,
        digest,
    })
}

impl SignatureVerifier {
    /// `tolerance_secs` of 0 disables the timestamp window.
    pub fn new(key: impl Into<Vec<u8>>, tolerance_secs: u64) -> Self {
        Self {
            key: key.into(),
            tolerance_secs,
        }
    }

    /// Build from the base64 signing secret shown when the webhook was created.
    pub fn from_base64_secret(secret: &str, tolerance_secs: u64) -> Result<Self, SecretError> {
        let key = STANDARD.decode(secret.trim())?;
        if key.is_empty() {
            return Err(SecretError::Empty);
        }
        Ok(Self::new(key, tolerance_secs))
    }

    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Verdict {
        self.verify_at(body, header, chrono::Utc::now().timestamp())
    }

    /// Verify against an explicit clock (unix seconds). Same inputs, same verdict.
    pub fn verify_at(&self, body: &[u8], header: Option<&str>, now_secs: i64) -> Verdict {
        if self.key.is_empty() {
            return Verdict::Rejected(RejectReason::SecretNotConfigured);
        }
        let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
            return Verdict::Rejected(RejectReason::MissingHeader);
        };
        let mut reason = RejectReason::MalformedHeader;
        for raw in header.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let Some(candidate) = parse_candidate(raw) else {
                continue;
            };
            if self.tolerance_secs > 0
                && now_secs.abs_diff(candidate.timestamp_secs) > self.tolerance_secs
            {
                reason = reason.max(RejectReason::StaleTimestamp);
                continue;
            }
            if self.digest_matches(candidate.timestamp_raw, body, &candidate.digest) {
                return Verdict::Verified;
            }
            reason = reason.max(RejectReason::DigestMismatch);
        }
        Verdict::Rejected(reason)
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> Option<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Some(mac)
    }

    fn digest_matches(&self, timestamp: &str, body: &[u8], provided: &[u8]) -> bool {
        self.mac(timestamp, body)
            .map(|mac| mac.verify_slice(provided).is_ok())
            .unwrap_or(false)
    }
}

/// Header value a sender would attach for `body` at `timestamp`.
pub fn sign(key: &[u8], timestamp: &str, body: &[u8]) -> String {
    let digest = SignatureVerifier::new(key, 0)
        .mac(timestamp, body)
        .map(|mac| STANDARD.encode(mac.finalize().into_bytes()))
        .unwrap_or_default();
    format!("hmac;1;{};{}", timestamp, digest)
}
