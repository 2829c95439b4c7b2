use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use time::{Duration, OffsetDateTime};
use tracing::{debug, trace};

use crate::common::consts::{
    DEFAULT_TIME_SKEW, HOST, MANDATORY_HEADERS, X_OPS_CONTENT_HASH, X_OPS_SERVER_API_VERSION,
    X_OPS_SIGN, X_OPS_TIMESTAMP, X_OPS_USERID,
};
use crate::common::{Layout, Protocol};
use crate::headers::SignDescription;
use crate::request::{Content, InboundRequest};
use crate::sign::SigningKey;
use crate::signing_object::SigningObject;
use crate::util::{decode_signature, parse_time};
use crate::Error;

/// Error while authenticating a request.
///
/// Only structural problems are reported this way. A request that is well-formed but fails one of
/// the checks is rejected with `Ok(None)` instead.
#[derive(Debug, thiserror::Error)]
#[error("failed to authenticate request. Check your client key and clock: {0}")]
pub struct AuthenticationError(#[source] pub Error);

/// The authenticated principal of an accepted request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Identity {
    pub user_id: String,
}

/// Source of the current time for the timestamp check.
pub trait Clock {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

/// Resolves the public key of a user.
pub trait KeyLookup {
    fn lookup(&self, user_id: &str) -> Option<RsaPublicKey>;
}

/// A [`KeyLookup`] backed by a closure.
#[derive(Clone, Copy, Debug)]
pub struct FnLookup<F>(pub F);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationState {
    Unchecked,
    Accepted,
    Rejected,
}

/// Verifier of signed requests.
///
/// The signature, the timestamp and the content hash are checked independently of each other; a
/// request is accepted only if all three pass. The outcome of the last
/// [`authenticate`](SignatureVerification::authenticate) call stays queryable until the next one.
///
/// The protocol version is taken from the request's `X-Ops-Sign` header, whose `algorithm` (if
/// any) must match the version.
#[derive(Clone, Debug)]
pub struct SignatureVerification<C = SystemClock> {
    time_skew: Duration,
    clock: C,
    valid_signature: bool,
    valid_timestamp: bool,
    valid_content_hash: bool,
    state: VerificationState,
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock stopped at the given instant.
impl Clock for OffsetDateTime {
    fn now(&self) -> OffsetDateTime {
        *self
    }
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> OffsetDateTime {
        (**self).now()
    }
}

impl KeyLookup for RsaPublicKey {
    fn lookup(&self, _: &str) -> Option<RsaPublicKey> {
        Some(self.clone())
    }
}

impl KeyLookup for RsaPrivateKey {
    fn lookup(&self, _: &str) -> Option<RsaPublicKey> {
        Some(self.to_public_key())
    }
}

impl KeyLookup for SigningKey {
    fn lookup(&self, _: &str) -> Option<RsaPublicKey> {
        Some(self.public_key().clone())
    }
}

impl<S: BuildHasher> KeyLookup for HashMap<String, RsaPublicKey, S> {
    fn lookup(&self, user_id: &str) -> Option<RsaPublicKey> {
        self.get(user_id).cloned()
    }
}

impl KeyLookup for BTreeMap<String, RsaPublicKey> {
    fn lookup(&self, user_id: &str) -> Option<RsaPublicKey> {
        self.get(user_id).cloned()
    }
}

impl<T: KeyLookup + ?Sized> KeyLookup for &T {
    fn lookup(&self, user_id: &str) -> Option<RsaPublicKey> {
        (**self).lookup(user_id)
    }
}

impl<F> KeyLookup for FnLookup<F>
where
    F: Fn(&str) -> Option<RsaPublicKey>,
{
    fn lookup(&self, user_id: &str) -> Option<RsaPublicKey> {
        (self.0)(user_id)
    }
}

impl SignatureVerification {
    /// Creates a verifier with a 15 minute skew window and the system clock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SignatureVerification {
    fn default() -> Self {
        SignatureVerification {
            time_skew: DEFAULT_TIME_SKEW,
            clock: SystemClock,
            valid_signature: false,
            valid_timestamp: false,
            valid_content_hash: false,
            state: VerificationState::Unchecked,
        }
    }
}

impl<C: Clock> SignatureVerification<C> {
    /// Sets the maximum difference between the request timestamp and the clock. A request is
    /// fresh if the difference is strictly less than `time_skew`.
    pub fn time_skew(&mut self, time_skew: Duration) -> &mut Self {
        self.time_skew = time_skew;
        self
    }

    /// Replaces the clock the timestamp check compares against.
    pub fn clock<D: Clock>(self, clock: D) -> SignatureVerification<D> {
        SignatureVerification {
            time_skew: self.time_skew,
            clock,
            valid_signature: false,
            valid_timestamp: false,
            valid_content_hash: false,
            state: VerificationState::Unchecked,
        }
    }

    /// Authenticates `request` against the key `keys` returns for its user id.
    ///
    /// Returns the identity of the request's user if the signature, the timestamp and the content
    /// hash are all valid, and `None` if any of them isn't. Missing headers, an unknown user, an
    /// unsupported protocol version and the like are errors.
    pub fn authenticate<K>(
        &mut self,
        request: &mut InboundRequest<'_>,
        keys: &K,
    ) -> Result<Option<Identity>, AuthenticationError>
    where
        K: KeyLookup + ?Sized,
    {
        self.valid_signature = false;
        self.valid_timestamp = false;
        self.valid_content_hash = false;

        let result = self.do_authenticate(request, keys);
        self.state = match result {
            Ok(Some(_)) => VerificationState::Accepted,
            Ok(None) | Err(_) => VerificationState::Rejected,
        };
        result.map_err(AuthenticationError)
    }

    fn do_authenticate<K>(
        &mut self,
        request: &mut InboundRequest<'_>,
        keys: &K,
    ) -> Result<Option<Identity>, Error>
    where
        K: KeyLookup + ?Sized,
    {
        let headers = request.headers();
        for name in MANDATORY_HEADERS {
            headers.require(name)?;
        }

        let protocol = SignDescription::parse(headers.require(X_OPS_SIGN)?)?.protocol()?;
        let user_id = headers.require(X_OPS_USERID)?.to_owned();
        let timestamp = headers.require(X_OPS_TIMESTAMP)?.to_owned();
        let content_hash = headers.require(X_OPS_CONTENT_HASH)?.to_owned();
        let host = headers.require(HOST)?.to_owned();
        let server_api_version = headers.get(X_OPS_SERVER_API_VERSION).map(str::to_owned);
        let signature = headers.signature();
        let path = request.path().to_owned();

        let key = keys
            .lookup(&user_id)
            .ok_or_else(|| Error::KeyNotFound(user_id.clone()))?;
        let request_time = parse_time(&timestamp)?;

        let mut object = SigningObject::new(request.method().clone(), &path, &timestamp, &user_id);
        object.host(&host).proto_version(protocol.version);
        if let Some(server_api_version) = &server_api_version {
            object.header(X_OPS_SERVER_API_VERSION, server_api_version);
        }
        match request.content() {
            Content::Body(body) => object.body(body),
            Content::Upload(file) => object.file(file),
        };
        let hashed_body = object.hashed_body(protocol.algorithm)?;
        let candidate = object.canonicalize(protocol)?;
        trace!(canonical = %candidate, "candidate canonical request");

        self.valid_signature = match signature {
            Some(signature) => {
                debug!(signature = %signature, "reconstructed signature");
                verify_signature(&key, protocol, &candidate, &signature)
            }
            None => {
                debug!("request carries no signature");
                false
            }
        };

        let difference = (self.clock.now() - request_time).abs();
        self.valid_timestamp = difference < self.time_skew;
        debug!(
            difference = difference.whole_seconds(),
            time_skew = self.time_skew.whole_seconds(),
            valid = self.valid_timestamp,
            "timestamp check"
        );

        self.valid_content_hash = hashed_body == content_hash;
        debug!(
            expected = %hashed_body,
            received = %content_hash,
            valid = self.valid_content_hash,
            "content hash check"
        );

        Ok(self.valid_request().then(|| Identity {
            user_id: user_id.clone(),
        }))
    }

    pub fn state(&self) -> VerificationState {
        self.state
    }

    pub fn valid_signature(&self) -> bool {
        self.valid_signature
    }

    pub fn valid_timestamp(&self) -> bool {
        self.valid_timestamp
    }

    pub fn valid_content_hash(&self) -> bool {
        self.valid_content_hash
    }

    pub fn valid_request(&self) -> bool {
        self.valid_signature && self.valid_timestamp && self.valid_content_hash
    }
}

/// Checks `signature` over `candidate`. Failures of any kind, including undecodable base64, count
/// as a mismatch.
fn verify_signature(
    key: &RsaPublicKey,
    protocol: &Protocol,
    candidate: &str,
    signature: &str,
) -> bool {
    let signature = match decode_signature(signature) {
        Ok(signature) => signature,
        Err(e) => {
            debug!(error = %e, "undecodable signature");
            return false;
        }
    };
    let result = match protocol.layout {
        Layout::Legacy => {
            key.verify(Pkcs1v15Sign::new_unprefixed(), candidate.as_bytes(), &signature)
        }
        Layout::Digest => {
            let (padding, hashed) = protocol.algorithm.pkcs1v15(candidate.as_bytes());
            key.verify(padding, &hashed, &signature)
        }
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!(error = %e, "signature mismatch");
            false
        }
    }
}
