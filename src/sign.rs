use std::path::Path;

use rand_core::{CryptoRng, RngCore};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use tracing::debug;

use crate::agent::{strip_signature_prefix, SshAgent, UnixAgent};
use crate::common::consts::{
    SSH_AGENT_RSA_SHA2_256, X_OPS_AUTHORIZATION, X_OPS_CONTENT_HASH, X_OPS_SIGN, X_OPS_TIMESTAMP,
    X_OPS_USERID,
};
use crate::common::{lookup_version, validate_sign_version_digest, Layout, Protocol};
use crate::signing_object::SigningObject;
use crate::util::{fold_signature, NeverRng};
use crate::Error;

/// An RSA key to sign with.
///
/// A key without private material can still sign protocol version 1.3 requests by delegating to
/// an ssh-agent that holds the matching private key.
#[derive(Clone, Debug)]
pub enum SigningKey {
    Private(RsaPrivateKey),
    Public(RsaPublicKey),
}

#[non_exhaustive]
pub struct SignOptions<'sig, 'this, R = NeverRng> {
    /// Digest algorithm; defaults to the one the version table assigns to `version`.
    pub algorithm: Option<&'sig str>,
    /// Protocol version; defaults to the signing object's.
    pub version: Option<&'sig str>,
    /// The random number generator used for RSA blinding.
    pub rng: Option<&'this mut R>,
    /// The agent to delegate to when the key has no private material.
    pub agent: Option<&'this mut dyn SshAgent>,
    /// Socket of the agent to connect to instead of `SSH_AUTH_SOCK`.
    pub agent_socket: Option<&'sig Path>,
}

/// Header set produced by signing a request, in emission order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignedHeaders {
    entries: Vec<(String, String)>,
}

impl SigningKey {
    /// Decodes a PEM-encoded key, heuristically determining its format.
    ///
    /// PKCS#1 and PKCS#8 private keys yield [`SigningKey::Private`]; SPKI and PKCS#1 public keys
    /// yield [`SigningKey::Public`].
    pub fn from_pem(pem: &str) -> Result<Self, Error> {
        RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map(SigningKey::Private)
            .or_else(|_| {
                RsaPublicKey::from_public_key_pem(pem)
                    .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
                    .map(SigningKey::Public)
            })
            .map_err(|_| Error::InvalidKey("unable to determine key format".to_owned()))
    }

    pub fn has_private_material(&self) -> bool {
        matches!(self, SigningKey::Private(_))
    }

    pub fn private_key(&self) -> Option<&RsaPrivateKey> {
        match self {
            SigningKey::Private(key) => Some(key),
            SigningKey::Public(_) => None,
        }
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        match self {
            SigningKey::Private(key) => key.as_ref(),
            SigningKey::Public(key) => key,
        }
    }
}

impl From<RsaPrivateKey> for SigningKey {
    fn from(key: RsaPrivateKey) -> Self {
        SigningKey::Private(key)
    }
}

impl From<RsaPublicKey> for SigningKey {
    fn from(key: RsaPublicKey) -> Self {
        SigningKey::Public(key)
    }
}

impl<'sig, 'this, R> SignOptions<'sig, 'this, R>
where
    R: RngCore + CryptoRng,
{
    /// Creates a new `SignOptions` with a default set of options.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn algorithm(&mut self, algorithm: impl Into<Option<&'sig str>>) -> &mut Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn version(&mut self, version: impl Into<Option<&'sig str>>) -> &mut Self {
        self.version = version.into();
        self
    }

    /// Sets a custom random number generator to be used for RSA blinding.
    ///
    /// By default, [`rand::thread_rng`] is used.
    pub fn rng(&mut self, rng: impl Into<Option<&'this mut R>>) -> &mut Self {
        self.rng = rng.into();
        self
    }

    /// Sets the agent used when the key has no private material.
    ///
    /// By default, the agent at `SSH_AUTH_SOCK` (or [`SignOptions::agent_socket`]) is connected to
    /// on demand.
    pub fn agent(&mut self, agent: &'this mut dyn SshAgent) -> &mut Self {
        self.agent = Some(agent);
        self
    }

    pub fn agent_socket(&mut self, path: impl Into<Option<&'sig Path>>) -> &mut Self {
        self.agent_socket = path.into();
        self
    }

    /// Signs `object` with `key` and returns the headers to send along with the request.
    ///
    /// See also [`SigningObject::sign`], which is a shorthand for this method.
    pub fn sign(
        &mut self,
        object: &mut SigningObject<'_>,
        key: &SigningKey,
    ) -> Result<SignedHeaders, Error> {
        let version = match self.version {
            Some(version) => version,
            None => object.version(),
        };
        let algorithm = match self.algorithm {
            Some(algorithm) => algorithm,
            None => lookup_version(version)?.algorithm.as_str(),
        };
        let protocol = validate_sign_version_digest(algorithm, version)?;

        let string_to_sign = object.canonicalize(protocol)?;
        debug!(string_to_sign = %string_to_sign, "String to sign");

        let signature = self.do_sign(key, protocol, &string_to_sign)?;

        let mut headers = SignedHeaders::default();
        headers.push(
            X_OPS_SIGN,
            format!("algorithm={};version={};", protocol.algorithm, protocol.version),
        );
        headers.push(X_OPS_USERID, object.user_id().to_owned());
        headers.push(X_OPS_TIMESTAMP, object.canonical_time()?);
        headers.push(X_OPS_CONTENT_HASH, object.hashed_body(protocol.algorithm)?);
        // Numbering starts at 1, not 0.
        for (i, line) in fold_signature(&signature).into_iter().enumerate() {
            headers.push(format!("{X_OPS_AUTHORIZATION}-{}", i + 1), line);
        }

        debug!(headers = ?headers, "Header hash");
        Ok(headers)
    }

    fn do_sign(
        &mut self,
        key: &SigningKey,
        protocol: &Protocol,
        string_to_sign: &str,
    ) -> Result<Vec<u8>, Error> {
        let Some(private) = key.private_key() else {
            return match protocol.layout {
                Layout::Digest => self.sign_with_agent(key.public_key(), string_to_sign),
                Layout::Legacy => Err(Error::PrivateKeyRequired(protocol.version)),
            };
        };

        let (padding, message) = match protocol.layout {
            Layout::Legacy => (Pkcs1v15Sign::new_unprefixed(), string_to_sign.as_bytes().to_vec()),
            Layout::Digest => protocol.algorithm.pkcs1v15(string_to_sign.as_bytes()),
        };
        let signature = if let Some(rng) = self.rng.as_deref_mut() {
            private.sign_with_rng(rng, padding, &message)
        } else {
            private.sign_with_rng(&mut rand::thread_rng(), padding, &message)
        };
        signature.map_err(Error::Sign)
    }

    fn sign_with_agent(
        &mut self,
        key: &RsaPublicKey,
        string_to_sign: &str,
    ) -> Result<Vec<u8>, Error> {
        debug!("No private key supplied, will attempt to sign with ssh-agent.");
        let data = string_to_sign.as_bytes();
        let result = if let Some(agent) = self.agent.as_deref_mut() {
            agent.sign(key, data, SSH_AGENT_RSA_SHA2_256)
        } else {
            let mut agent = match self.agent_socket {
                Some(path) => UnixAgent::connect_to(path),
                None => UnixAgent::connect(),
            }
            .map_err(Error::AgentUnavailable)?;
            agent.sign(key, data, SSH_AGENT_RSA_SHA2_256)
        };
        let blob = result.map_err(Error::AgentSign)?;
        strip_signature_prefix(blob)
    }
}

impl<'sig, 'this, R> Default for SignOptions<'sig, 'this, R> {
    fn default() -> Self {
        SignOptions {
            algorithm: None,
            version: None,
            rng: None,
            agent: None,
            agent_socket: None,
        }
    }
}

impl SignedHeaders {
    fn push(&mut self, name: impl Into<String>, value: String) {
        self.entries.push((name.into(), value));
    }

    /// Looks up a header value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| &**value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(name, value)| (&**name, &**value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The base64 signature lines in order.
    pub fn authorization_lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.iter()
            .filter(|(name, _)| name.starts_with(X_OPS_AUTHORIZATION))
            .map(|(_, value)| value)
    }

    pub fn to_header_map(&self) -> Result<http::HeaderMap, Error> {
        let mut map = http::HeaderMap::with_capacity(self.entries.len());
        for (name, value) in self.iter() {
            map.insert(
                http::HeaderName::from_bytes(name.as_bytes())?,
                http::HeaderValue::from_str(value)?,
            );
        }
        Ok(map)
    }
}

impl<'a> IntoIterator for &'a SignedHeaders {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for SignedHeaders {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_map(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use http::Method;
    use rsa::traits::PublicKeyParts;
    use sha2::{Digest, Sha256};

    use super::*;

    use crate::agent::AgentError;
    use crate::util::test::*;

    /// Signs with a private key it holds, the way a real agent would reply.
    struct KeyAgent {
        key: RsaPrivateKey,
        flags: Option<u32>,
    }

    impl SshAgent for KeyAgent {
        fn sign(
            &mut self,
            _: &RsaPublicKey,
            data: &[u8],
            flags: u32,
        ) -> Result<Vec<u8>, AgentError> {
            use ssh_encoding::Encode;

            self.flags = Some(flags);
            let signature = self
                .key
                .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(data))
                .unwrap();
            let mut blob = Vec::new();
            "rsa-sha2-256".encode(&mut blob)?;
            signature.as_slice().encode(&mut blob)?;
            Ok(blob)
        }
    }

    struct RefusingAgent;

    impl SshAgent for RefusingAgent {
        fn sign(&mut self, _: &RsaPublicKey, _: &[u8], _: u32) -> Result<Vec<u8>, AgentError> {
            Err(AgentError::Failure)
        }
    }

    fn expected(version: &str, content_hash: &str, lines: &[&str]) -> Vec<(String, String)> {
        let algorithm = if version == "1.3" { "sha256" } else { "sha1" };
        let mut headers = vec![
            (
                "X-Ops-Sign".to_owned(),
                format!("algorithm={algorithm};version={version};"),
            ),
            ("X-Ops-Userid".to_owned(), USER_ID.to_owned()),
            ("X-Ops-Timestamp".to_owned(), TIMESTAMP.to_owned()),
            ("X-Ops-Content-Hash".to_owned(), content_hash.to_owned()),
        ];
        for (i, line) in lines.iter().enumerate() {
            headers.push((format!("X-Ops-Authorization-{}", i + 1), (*line).to_owned()));
        }
        headers
    }

    fn collect(headers: &SignedHeaders) -> Vec<(String, String)> {
        headers
            .iter()
            .map(|(name, value)| (name.to_owned(), value.to_owned()))
            .collect()
    }

    #[test]
    fn sign_v1_0() {
        let mut file = Cursor::new(BODY);
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        object.body(BODY).file(&mut file);
        let headers = object.sign(&private_key().into()).unwrap();
        assert_eq!(
            collect(&headers),
            expected("1.0", HASHED_BODY, &AUTHORIZATION_LINES_V1_0)
        );
    }

    #[test]
    fn sign_v1_1() {
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        object.body(BODY).proto_version("1.1");
        let headers = object.sign(&private_key().into()).unwrap();
        assert_eq!(
            collect(&headers),
            expected("1.1", HASHED_BODY, &AUTHORIZATION_LINES_V1_1)
        );
    }

    #[test]
    fn sign_v1_3() {
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        object.body(BODY).proto_version("1.3");
        let headers = object.sign(&private_key().into()).unwrap();
        assert_eq!(
            collect(&headers),
            expected("1.3", HASHED_BODY_SHA256, &AUTHORIZATION_LINES_V1_3)
        );
    }

    #[test]
    fn reference_signatures() {
        for (version, lines) in [("1.0", INTEROP_LINES_V1_0), ("1.1", INTEROP_LINES_V1_1)] {
            let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, INTEROP_USER_ID);
            object.body(INTEROP_BODY).proto_version(version);
            let headers = object.sign(&private_key().into()).unwrap();
            assert_eq!(headers.get("X-Ops-Content-Hash"), Some(INTEROP_HASHED_BODY));
            assert_eq!(
                headers.authorization_lines().collect::<Vec<_>>(),
                lines,
                "version {version}"
            );
        }
    }

    #[test]
    fn explicit_version_for_object() {
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        object.body(BODY).proto_version("1.0");
        let headers = <SignOptions<'_, '_>>::new()
            .algorithm("sha1")
            .version("1.1")
            .sign(&mut object, &private_key().into())
            .unwrap();
        assert_eq!(
            collect(&headers),
            expected("1.1", HASHED_BODY, &AUTHORIZATION_LINES_V1_1)
        );
    }

    #[test]
    fn rejects_bad_version_and_algorithm() {
        let key = SigningKey::from(private_key());
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        assert!(matches!(
            <SignOptions<'_, '_>>::new()
                .algorithm("sha1")
                .version("poo")
                .sign(&mut object, &key),
            Err(Error::UnsupportedVersion(_))
        ));
        assert!(matches!(
            <SignOptions<'_, '_>>::new()
                .algorithm("sha_poo")
                .version("1.1")
                .sign(&mut object, &key),
            Err(Error::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn long_user_id() {
        let user_id = "A".repeat(200);
        let path = format!("{PATH}/nodes/{}", "A".repeat(250));
        let key = SigningKey::from(private_key());
        for (version, ok) in [("1.0", false), ("1.1", true), ("1.3", true)] {
            let mut object = SigningObject::new(Method::PUT, &path, TIMESTAMP, &user_id);
            object.body(BODY).proto_version(version);
            let result = object.sign(&key);
            assert_eq!(result.is_ok(), ok, "version {version}");
            if !ok {
                assert!(matches!(result, Err(Error::Sign(_))));
            }
        }
    }

    #[test]
    fn agent_signature() {
        let mut agent = KeyAgent {
            key: private_key(),
            flags: None,
        };
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        object.body(BODY).proto_version("1.3");
        let headers = <SignOptions<'_, '_>>::new()
            .agent(&mut agent)
            .sign(&mut object, &public_key().into())
            .unwrap();
        assert_eq!(agent.flags, Some(SSH_AGENT_RSA_SHA2_256));

        // PKCS#1 v1.5 is deterministic, so the agent's signature equals the local one.
        assert_eq!(
            collect(&headers),
            expected("1.3", HASHED_BODY_SHA256, &AUTHORIZATION_LINES_V1_3)
        );
        let signature: String = headers.authorization_lines().collect();
        let signature = crate::util::decode_signature(&signature).unwrap();
        assert_eq!(signature.len(), public_key().size());
    }

    #[test]
    fn agent_refusal() {
        let mut agent = RefusingAgent;
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        object.body(BODY).proto_version("1.3");
        let result = <SignOptions<'_, '_>>::new()
            .agent(&mut agent)
            .sign(&mut object, &public_key().into());
        assert!(matches!(result, Err(Error::AgentSign(AgentError::Failure))));
    }

    #[test]
    fn agent_unreachable() {
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        object.body(BODY).proto_version("1.3");
        let result = <SignOptions<'_, '_>>::new()
            .agent_socket(Path::new("/nonexistent/signed-header-auth/agent.sock"))
            .sign(&mut object, &public_key().into());
        assert!(matches!(result, Err(Error::AgentUnavailable(_))));
    }

    #[test]
    fn legacy_needs_private_key() {
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        object.body(BODY).proto_version("1.1");
        assert!(matches!(
            object.sign(&public_key().into()),
            Err(Error::PrivateKeyRequired("1.1"))
        ));
    }

    #[test]
    fn key_formats() {
        let private = SigningKey::from_pem(PRIVATE_KEY_PEM).unwrap();
        assert!(private.has_private_material());
        let public = SigningKey::from_pem(PUBLIC_KEY_PEM).unwrap();
        assert!(!public.has_private_material());
        assert_eq!(private.public_key(), public.public_key());
        assert!(matches!(
            SigningKey::from_pem("not a key"),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn header_map() {
        let mut object = SigningObject::new(Method::POST, PATH, TIMESTAMP, USER_ID);
        object.body(BODY);
        let headers = object.sign(&private_key().into()).unwrap();
        assert_eq!(headers.len(), 10);
        assert_eq!(headers.get("x-ops-userid"), Some(USER_ID));
        let map = headers.to_header_map().unwrap();
        assert_eq!(map.len(), 10);
        assert_eq!(map["x-ops-authorization-6"], AUTHORIZATION_LINES_V1_0[5]);
        assert_eq!(map["x-ops-sign"], "algorithm=sha1;version=1.0;");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serialize() {
        use serde_test::{assert_ser_tokens, Token};

        let mut headers = SignedHeaders::default();
        headers.push(X_OPS_SIGN, "algorithm=sha1;version=1.0;".to_owned());
        headers.push(X_OPS_USERID, USER_ID.to_owned());
        assert_ser_tokens(
            &headers,
            &[
                Token::Map { len: Some(2) },
                Token::Str("X-Ops-Sign"),
                Token::Str("algorithm=sha1;version=1.0;"),
                Token::Str("X-Ops-Userid"),
                Token::Str("clownco-user"),
                Token::MapEnd,
            ],
        );
    }
}
