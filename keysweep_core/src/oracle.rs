use thiserror::Error;

/// Outcome of testing one candidate against the protected resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitResult {
    /// The candidate is wrong. Enumeration continues.
    Miss,
    /// The candidate unlocks the resource. The payload is whatever the oracle
    /// extracted while verifying it, if anything.
    Hit(Option<Vec<u8>>),
    /// The resource cannot be engaged at all, whatever the candidate.
    /// Aborts the whole search.
    Unusable(String),
}

impl HitResult {
    pub fn hit() -> Self {
        HitResult::Hit(None)
    }

    pub fn hit_with(payload: Vec<u8>) -> Self {
        HitResult::Hit(Some(payload))
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, HitResult::Hit(_))
    }
}

/// Errors raised while constructing one of the bundled oracles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("Invalid MD5 digest {0:?}: expected 32 hexadecimal characters")]
    InvalidDigest(String),
}

/// An `Oracle` decides whether a candidate secret unlocks the protected resource.
///
/// The search engine knows nothing about how verification works; it only acts
/// on the returned [`HitResult`]. Oracles are shared by every executor and are
/// called concurrently, so any synchronisation the underlying resource needs
/// is the oracle's own business.
pub trait Oracle: Send + Sync {
    /// Short name used in log output.
    fn name(&self) -> &str {
        "oracle"
    }

    /// Tests a single candidate. May block for as long as verification takes.
    fn test(&self, candidate: &str) -> HitResult;
}

/// An `Oracle` backed by a plain closure.
pub struct FnOracle<F>
where
    F: Fn(&str) -> HitResult,
{
    test_fn: F,
}

impl<F> FnOracle<F>
where
    F: Fn(&str) -> HitResult,
{
    pub fn new(test_fn: F) -> Self {
        Self { test_fn }
    }
}

impl<F> Oracle for FnOracle<F>
where
    F: Fn(&str) -> HitResult + Send + Sync,
{
    fn name(&self) -> &str {
        "fn"
    }

    fn test(&self, candidate: &str) -> HitResult {
        (self.test_fn)(candidate)
    }
}

/// Hits when the MD5 digest of the candidate matches a known digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Md5DigestOracle {
    digest: [u8; 16],
}

impl Md5DigestOracle {
    pub fn new(digest: [u8; 16]) -> Self {
        Self { digest }
    }

    /// Parses a 32-character hex digest, case-insensitively.
    pub fn from_hex(hex: &str) -> Result<Self, OracleError> {
        let hex = hex.trim();
        let invalid = || OracleError::InvalidDigest(hex.to_string());
        if hex.len() != 32 || !hex.is_ascii() {
            return Err(invalid());
        }
        let mut digest = [0u8; 16];
        for (i, byte) in digest.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self { digest })
    }
}

impl Oracle for Md5DigestOracle {
    fn name(&self) -> &str {
        "md5-digest"
    }

    fn test(&self, candidate: &str) -> HitResult {
        if md5::compute(candidate.as_bytes()).0 == self.digest {
            HitResult::hit()
        } else {
            HitResult::Miss
        }
    }
}
