//! HTTP Basic credential guard with brute-force backoff.
//!
//! The guard holds one configured principal. The password is never stored:
//! an Argon2id key is derived from it once at construction, and each login
//! attempt derives a key from the presented password with the same salt and
//! compares the two in constant time.
//!
//! Every failed attempt increments the caller's entry in a
//! [`BoundedFailureHistory`] and then holds the request for
//! `backoff_base * 2^(n-1)`, where `n` is the new consecutive-failure count.
//! Successful logins do not reset the count.

use std::sync::Arc;
use std::time::Duration;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::AuthError;
use crate::failure_history::{
    BoundedFailureHistory, DEFAULT_FAILURE_COUNT_CAP, DEFAULT_HISTORY_CAPACITY,
};

/// Salt length in bytes.
const SALT_LEN: usize = 16;
/// Derived key length in bytes.
const KEY_LEN: usize = 32;

/// Default delay after the first failure.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Realm announced in the `WWW-Authenticate` challenge.
pub const DEFAULT_REALM: &str = "auth";

/// The identity a request runs as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    /// Authenticated with the configured credentials.
    User(String),
    /// No credentials presented on a route that allows anonymous access.
    Anonymous,
}

impl Principal {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::User(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Principal::User(name) => name,
            Principal::Anonymous => "anonymous",
        }
    }
}

/// Credentials extracted from an `Authorization` header.
pub enum Credentials {
    Basic {
        username: String,
        password: Zeroizing<String>,
    },
    /// Any scheme other than Basic; carries the scheme name.
    Unsupported(String),
}

impl Credentials {
    /// Parse an `Authorization` header value.
    ///
    /// The scheme is matched case-insensitively. A Basic payload is split at
    /// the first `:`, so passwords may contain colons.
    pub fn from_authorization(value: &str) -> Result<Self, AuthError> {
        let value = value.trim();
        let (scheme, payload) = value.split_once(' ').unwrap_or((value, ""));
        if !scheme.eq_ignore_ascii_case("basic") {
            return Ok(Credentials::Unsupported(scheme.to_string()));
        }

        let decoded = Zeroizing::new(
            BASE64
                .decode(payload.trim())
                .map_err(|e| AuthError::MalformedCredentials(e.to_string()))?,
        );
        let text = std::str::from_utf8(&decoded)
            .map_err(|e| AuthError::MalformedCredentials(e.to_string()))?;
        let (username, password) = text
            .split_once(':')
            .ok_or_else(|| AuthError::MalformedCredentials("missing ':' separator".into()))?;

        Ok(Credentials::Basic {
            username: username.to_string(),
            password: Zeroizing::new(password.to_string()),
        })
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_memory_kib() -> u32 {
    Params::DEFAULT_M_COST
}

fn default_iterations() -> u32 {
    Params::DEFAULT_T_COST
}

fn default_parallelism() -> u32 {
    Params::DEFAULT_P_COST
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

impl KdfParams {
    fn derive(&self, password: &[u8], salt: &[u8]) -> Result<[u8; KEY_LEN], AuthError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| AuthError::KeyDerivation(format!("Argon2 params error: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut output = [0u8; KEY_LEN];
        argon2
            .hash_password_into(password, salt, &mut output)
            .map_err(|e| AuthError::KeyDerivation(format!("Argon2 hashing failed: {e}")))?;
        Ok(output)
    }
}

/// Stored form of the configured password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    salt: [u8; SALT_LEN],
    key: [u8; KEY_LEN],
}

impl DerivedKey {
    /// Derive a key from `password` with a fresh random salt.
    pub fn generate(password: &str, kdf: &KdfParams) -> Result<Self, AuthError> {
        let mut salt = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt)
            .map_err(|e| AuthError::KeyDerivation(format!("salt generation failed: {e}")))?;
        Self::with_salt(password, salt, kdf)
    }

    pub fn with_salt(
        password: &str,
        salt: [u8; SALT_LEN],
        kdf: &KdfParams,
    ) -> Result<Self, AuthError> {
        let key = kdf.derive(password.as_bytes(), &salt)?;
        Ok(Self { salt, key })
    }

    fn matches(&self, candidate: &[u8; KEY_LEN]) -> bool {
        self.key.ct_eq(candidate).into()
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("salt", &"<redacted>")
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Exponential delay applied after each failed login.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Delay for the `failures`-th consecutive failure: `base * 2^(failures-1)`.
    ///
    /// Saturates at `Duration::MAX`; zero failures means no delay.
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        const NANOS_PER_SEC: u128 = 1_000_000_000;
        1u128
            .checked_shl(failures - 1)
            .and_then(|factor| self.base.as_nanos().checked_mul(factor))
            .and_then(|nanos| {
                let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
                Some(Duration::new(secs, (nanos % NANOS_PER_SEC) as u32))
            })
            .unwrap_or(Duration::MAX)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE)
    }
}

/// Tunables for [`CredentialGuard`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Principals tracked by the failure history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Ceiling for a single principal's consecutive-failure count.
    #[serde(default = "default_failure_count_cap")]
    pub failure_count_cap: u32,

    /// Delay after the first failure, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_realm")]
    pub realm: String,

    #[serde(default)]
    pub kdf: KdfParams,
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_failure_count_cap() -> u32 {
    DEFAULT_FAILURE_COUNT_CAP
}

fn default_backoff_base_ms() -> u64 {
    DEFAULT_BACKOFF_BASE.as_millis() as u64
}

fn default_realm() -> String {
    DEFAULT_REALM.to_string()
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            failure_count_cap: default_failure_count_cap(),
            backoff_base_ms: default_backoff_base_ms(),
            realm: default_realm(),
            kdf: KdfParams::default(),
        }
    }
}

impl GuardConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(self.backoff_base_ms))
    }
}

/// Validates Basic credentials against the configured principal.
pub struct CredentialGuard {
    username: String,
    stored: DerivedKey,
    kdf: KdfParams,
    backoff: BackoffPolicy,
    realm: String,
    history: BoundedFailureHistory,
}

impl CredentialGuard {
    /// Build a guard for `username`/`password`, deriving the stored key.
    pub fn new(
        username: impl Into<String>,
        password: &str,
        config: GuardConfig,
    ) -> Result<Self, AuthError> {
        let stored = DerivedKey::generate(password, &config.kdf)?;
        Ok(Self::from_derived_key(username, stored, config))
    }

    /// Build a guard from an already-derived key.
    pub fn from_derived_key(
        username: impl Into<String>,
        stored: DerivedKey,
        config: GuardConfig,
    ) -> Self {
        Self {
            username: username.into(),
            stored,
            kdf: config.kdf,
            backoff: config.backoff(),
            realm: config.realm,
            history: BoundedFailureHistory::new(
                config.history_capacity,
                config.failure_count_cap,
            ),
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Value for the `WWW-Authenticate` challenge header.
    pub fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm)
    }

    /// Consecutive failures recorded for `principal`, if tracked.
    pub fn failures(&self, principal: &str) -> Option<u32> {
        self.history.get(principal)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Authenticate parsed credentials.
    ///
    /// Unsupported schemes fail immediately without touching the history.
    pub async fn authenticate_credentials(
        &self,
        credentials: &Credentials,
    ) -> Result<Principal, AuthError> {
        match credentials {
            Credentials::Basic { username, password } => {
                self.authenticate(username, password).await
            }
            Credentials::Unsupported(scheme) => {
                debug!(scheme = %scheme, "rejecting unsupported credential type");
                Err(AuthError::UnsupportedCredentialType(scheme.clone()))
            }
        }
    }

    /// Check `username`/`password` against the configured principal.
    ///
    /// On failure the caller's task is held for the backoff delay before
    /// [`AuthError::Unauthorized`] is returned.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Principal, AuthError> {
        let valid = self.verify(username, password).await?;
        if valid {
            debug!(principal = %username, "authenticated");
            return Ok(Principal::User(username.to_string()));
        }

        let failures = self.history.record_failure(username);
        let delay = self.backoff.delay(failures);
        warn!(
            principal = %username,
            failures,
            delay_ms = delay.as_millis() as u64,
            "authentication failed, applying backoff"
        );
        tokio::time::sleep(delay).await;
        Err(AuthError::Unauthorized)
    }

    /// Derive a key from `password` off the runtime and compare it with the
    /// stored one. Does not record failures or delay.
    pub async fn verify(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        let kdf = self.kdf;
        let salt = self.stored.salt;
        let password = Zeroizing::new(password.to_string());
        let candidate = tokio::task::spawn_blocking(move || {
            kdf.derive(password.as_bytes(), &salt).map(Zeroizing::new)
        })
        .await
        .map_err(|e| AuthError::KeyDerivation(format!("key derivation task failed: {e}")))??;

        let key_ok = self.stored.matches(&candidate);
        Ok(username == self.username && key_ok)
    }
}

impl std::fmt::Debug for CredentialGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialGuard")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .field("backoff", &self.backoff)
            .field("tracked_failures", &self.history.len())
            .finish()
    }
}

/// Shared handle, as stored by listeners.
pub type SharedGuard = Arc<CredentialGuard>;

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::time::Instant;

    /// Cheapest parameters Argon2 accepts, for fast tests.
    pub(crate) fn test_config(backoff_base_ms: u64) -> GuardConfig {
        GuardConfig {
            backoff_base_ms,
            kdf: KdfParams {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
            },
            ..GuardConfig::default()
        }
    }

    fn basic(user_pass: &str) -> String {
        format!("Basic {}", BASE64.encode(user_pass))
    }

    #[test]
    fn backoff_doubles_per_failure() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        for n in 1..63 {
            assert_eq!(policy.delay(n + 1), policy.delay(n) * 2);
        }
    }

    #[test]
    fn backoff_keeps_doubling_until_duration_overflows() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(33), Duration::from_secs(1 << 33));
        assert_eq!(policy.delay(63), Duration::from_secs(1 << 63));
        assert_eq!(policy.delay(64), Duration::MAX);
        assert_eq!(policy.delay(100), Duration::MAX);

        let sub_second = BackoffPolicy::new(Duration::from_millis(1500));
        assert_eq!(sub_second.delay(2), Duration::from_secs(3));
        assert_eq!(sub_second.delay(40), Duration::from_millis(1500 << 39));
    }

    #[test]
    fn parses_basic_credentials() {
        match Credentials::from_authorization(&basic("alice:s3cret:with:colons")).unwrap() {
            Credentials::Basic { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password.as_str(), "s3cret:with:colons");
            }
            Credentials::Unsupported(_) => panic!("expected basic"),
        }
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let header = format!("bAsIc {}", BASE64.encode("bob:pw"));
        assert!(matches!(
            Credentials::from_authorization(&header).unwrap(),
            Credentials::Basic { .. }
        ));
    }

    #[test]
    fn other_schemes_are_unsupported() {
        match Credentials::from_authorization("Bearer abc.def").unwrap() {
            Credentials::Unsupported(scheme) => assert_eq!(scheme, "Bearer"),
            Credentials::Basic { .. } => panic!("expected unsupported"),
        }
    }

    #[test]
    fn malformed_basic_payloads_rejected() {
        assert!(matches!(
            Credentials::from_authorization("Basic !!!not-base64"),
            Err(AuthError::MalformedCredentials(_))
        ));
        let no_colon = format!("Basic {}", BASE64.encode("nocolon"));
        assert!(matches!(
            Credentials::from_authorization(&no_colon),
            Err(AuthError::MalformedCredentials(_))
        ));
    }

    #[test]
    fn derived_key_depends_on_salt() {
        let kdf = test_config(0).kdf;
        let a = DerivedKey::with_salt("pw", [1u8; SALT_LEN], &kdf).unwrap();
        let b = DerivedKey::with_salt("pw", [2u8; SALT_LEN], &kdf).unwrap();
        assert_ne!(a.key, b.key);
        let again = DerivedKey::with_salt("pw", [1u8; SALT_LEN], &kdf).unwrap();
        assert!(a.matches(&again.key));
    }

    #[test]
    fn invalid_kdf_params_surface_as_errors() {
        let kdf = KdfParams {
            memory_kib: 0,
            iterations: 0,
            parallelism: 0,
        };
        assert!(matches!(
            DerivedKey::generate("pw", &kdf),
            Err(AuthError::KeyDerivation(_))
        ));
    }

    #[tokio::test]
    async fn correct_credentials_authenticate() {
        let guard = CredentialGuard::new("alice", "correct horse", test_config(0)).unwrap();
        let principal = guard.authenticate("alice", "correct horse").await.unwrap();
        assert_eq!(principal, Principal::User("alice".into()));
        assert_eq!(guard.failures("alice"), None);
    }

    #[tokio::test]
    async fn wrong_username_or_password_is_unauthorized() {
        let guard = CredentialGuard::new("alice", "pw", test_config(0)).unwrap();
        assert!(matches!(
            guard.authenticate("alice", "wrong").await,
            Err(AuthError::Unauthorized)
        ));
        assert!(matches!(
            guard.authenticate("mallory", "pw").await,
            Err(AuthError::Unauthorized)
        ));
        assert_eq!(guard.failures("alice"), Some(1));
        assert_eq!(guard.failures("mallory"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_wait_two_four_eight_seconds() {
        let guard = CredentialGuard::new("alice", "pw", test_config(2000)).unwrap();
        let mut delays = Vec::new();
        for _ in 0..3 {
            let started = Instant::now();
            let result = guard.authenticate("alice", "wrong").await;
            assert!(matches!(result, Err(AuthError::Unauthorized)));
            delays.push(started.elapsed());
        }
        for (delay, expected_secs) in delays.iter().zip([2u64, 4, 8]) {
            let expected = Duration::from_secs(expected_secs);
            assert!(
                *delay >= expected && *delay < expected + Duration::from_millis(500),
                "expected ~{expected:?}, got {delay:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_does_not_reset_failure_count() {
        let guard = CredentialGuard::new("alice", "pw", test_config(10)).unwrap();
        let _ = guard.authenticate("alice", "wrong").await;
        let _ = guard.authenticate("alice", "wrong").await;
        guard.authenticate("alice", "pw").await.unwrap();
        assert_eq!(guard.failures("alice"), Some(2));

        let started = Instant::now();
        let _ = guard.authenticate("alice", "wrong").await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_scheme_skips_backoff() {
        let guard = CredentialGuard::new("alice", "pw", test_config(60_000)).unwrap();
        let started = Instant::now();
        let result = guard
            .authenticate_credentials(&Credentials::Unsupported("Digest".into()))
            .await;
        assert!(matches!(result, Err(AuthError::UnsupportedCredentialType(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(guard.failures("alice"), None);
    }

    #[test]
    fn challenge_names_realm() {
        let guard = CredentialGuard::new("alice", "pw", test_config(0)).unwrap();
        assert_eq!(guard.challenge(), "Basic realm=\"auth\"");
    }

    #[test]
    fn debug_output_redacts_key_material() {
        let kdf = test_config(0).kdf;
        let key = DerivedKey::with_salt("pw", [9u8; SALT_LEN], &kdf).unwrap();
        let rendered = format!("{key:?}");
        assert!(rendered.contains("redacted"));
    }
}
