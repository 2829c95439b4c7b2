use std::io::Read;

use http::Method;

use crate::common::consts::{
    DEFAULT_PROTO_VERSION, DEFAULT_SERVER_API_VERSION, X_OPS_SERVER_API_VERSION,
};
use crate::common::{
    lookup_version, validate_sign_version_digest, DigestAlgorithm, Layout, Protocol,
};
use crate::digester::{hash_string, Digester};
use crate::sign::{SignOptions, SignedHeaders, SigningKey};
use crate::util::{format_iso8601_time, parse_time};
use crate::Error;

/// Everything needed to canonicalize, sign or verify one request.
///
/// The content hash is computed from `file` when one is set and from `body` otherwise. It is
/// computed at most once per object, with the digest of the first call.
pub struct SigningObject<'a> {
    http_method: Method,
    path: &'a str,
    body: &'a [u8],
    file: Option<&'a mut dyn Read>,
    host: Option<&'a str>,
    timestamp: &'a str,
    user_id: &'a str,
    proto_version: Option<&'a str>,
    headers: Vec<(&'a str, &'a str)>,
    digester: Digester,
}

/// Collapses runs of `/` and strips one trailing `/` unless the whole path is `/`.
pub fn canonical_path(path: &str) -> String {
    let mut canonical = String::with_capacity(path.len());
    for c in path.chars() {
        if c == '/' && canonical.ends_with('/') {
            continue;
        }
        canonical.push(c);
    }
    if canonical.len() > 1 && canonical.ends_with('/') {
        canonical.pop();
    }
    canonical
}

impl<'a> SigningObject<'a> {
    /// Creates a signing object with an empty body and the default protocol version.
    pub fn new(http_method: Method, path: &'a str, timestamp: &'a str, user_id: &'a str) -> Self {
        SigningObject {
            http_method,
            path,
            body: &[],
            file: None,
            host: None,
            timestamp,
            user_id,
            proto_version: None,
            headers: Vec::new(),
            digester: Digester::new(),
        }
    }

    pub fn body(&mut self, body: &'a [u8]) -> &mut Self {
        self.body = body;
        self
    }

    /// Sets a stream to hash instead of the body.
    pub fn file(&mut self, file: &'a mut dyn Read) -> &mut Self {
        self.file = Some(file);
        self
    }

    /// Sets the host. It is carried along but never signed.
    pub fn host(&mut self, host: &'a str) -> &mut Self {
        self.host = Some(host);
        self
    }

    pub fn proto_version(&mut self, proto_version: &'a str) -> &mut Self {
        self.proto_version = Some(proto_version);
        self
    }

    /// Adds an extra request header. Only `X-Ops-Server-API-Version` is consulted.
    pub fn header(&mut self, name: &'a str, value: &'a str) -> &mut Self {
        self.headers.push((name, value));
        self
    }

    pub fn http_method(&self) -> &Method {
        &self.http_method
    }

    pub fn path(&self) -> &'a str {
        self.path
    }

    pub fn host_name(&self) -> Option<&'a str> {
        self.host
    }

    pub fn timestamp(&self) -> &'a str {
        self.timestamp
    }

    pub fn user_id(&self) -> &'a str {
        self.user_id
    }

    pub fn version(&self) -> &'a str {
        self.proto_version.unwrap_or(DEFAULT_PROTO_VERSION)
    }

    /// The digest algorithm the version table assigns to this object's protocol version.
    pub fn algorithm(&self) -> Result<DigestAlgorithm, Error> {
        Ok(lookup_version(self.version())?.algorithm)
    }

    pub fn canonical_time(&self) -> Result<String, Error> {
        parse_time(self.timestamp).and_then(format_iso8601_time)
    }

    pub fn canonical_path(&self) -> String {
        canonical_path(self.path)
    }

    pub fn canonical_user_id(&self, protocol: &Protocol) -> String {
        if protocol.hashed_user_id {
            hash_string(self.user_id, protocol.algorithm)
        } else {
            self.user_id.to_owned()
        }
    }

    /// `X-Ops-Server-API-Version` from the extra headers (case-insensitive), or `"0"`.
    pub fn server_api_version(&self) -> &'a str {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(X_OPS_SERVER_API_VERSION))
            .map_or(DEFAULT_SERVER_API_VERSION, |&(_, value)| value)
    }

    /// The memoized content hash.
    pub fn hashed_body(&mut self, algorithm: DigestAlgorithm) -> Result<String, Error> {
        let hashed = match self.file.as_deref_mut() {
            Some(file) => self.digester.hash_file(file, algorithm)?,
            None => self.digester.hash_body(self.body, algorithm)?,
        };
        Ok(hashed.to_owned())
    }

    /// Canonicalizes the request with this object's protocol version and its table algorithm.
    pub fn canonicalize_request(&mut self) -> Result<String, Error> {
        let version = self.version();
        let algorithm = self.algorithm()?;
        self.canonicalize_request_with(algorithm.as_str(), version)
    }

    /// Canonicalizes the request for `version`, which must use `algorithm`.
    pub fn canonicalize_request_with(
        &mut self,
        algorithm: &str,
        version: &str,
    ) -> Result<String, Error> {
        let protocol = validate_sign_version_digest(algorithm, version)?;
        self.canonicalize(protocol)
    }

    pub(crate) fn canonicalize(&mut self, protocol: &Protocol) -> Result<String, Error> {
        let method = self.http_method.as_str().to_ascii_uppercase();
        let content_hash = self.hashed_body(protocol.algorithm)?;
        let time = self.canonical_time()?;
        let user_id = self.canonical_user_id(protocol);
        let lines = match protocol.layout {
            Layout::Legacy => vec![
                format!("Method:{method}"),
                format!("Hashed Path:{}", hash_string(self.canonical_path(), protocol.algorithm)),
                format!("X-Ops-Content-Hash:{content_hash}"),
                format!("X-Ops-Timestamp:{time}"),
                format!("X-Ops-UserId:{user_id}"),
            ],
            Layout::Digest => vec![
                format!("Method:{method}"),
                format!("Path:{}", self.canonical_path()),
                format!("X-Ops-Content-Hash:{content_hash}"),
                format!("X-Ops-Sign:version={}", protocol.version),
                format!("X-Ops-Timestamp:{time}"),
                format!("X-Ops-UserId:{user_id}"),
                format!("X-Ops-Server-API-Version:{}", self.server_api_version()),
            ],
        };
        Ok(lines.join("\n"))
    }

    /// Shorthand for `<SignOptions>::new().sign(self, key)`. See also [`SignOptions::sign`].
    pub fn sign(&mut self, key: &SigningKey) -> Result<SignedHeaders, Error> {
        <SignOptions<'_, '_>>::new().sign(self, key)
    }
}
