//! Inbound authentication headers.

use std::collections::BTreeMap;

use crate::common::consts::{AUTHORIZATION, DEFAULT_PROTO_VERSION, X_OPS_AUTHORIZATION};
use crate::common::{lookup_version, validate_sign_version_digest, Protocol};
use crate::Error;

/// Prefix of forwarded request headers in a CGI-style environment.
const CGI_HEADER_PREFIX: &str = "HTTP_";

/// Normalizes a header name for lookup: ASCII-lowercased, with every `-` replaced by `_`.
///
/// `X-Ops-Userid`, `x-ops-userid` and the CGI form `X_OPS_USERID` all normalize to
/// `x_ops_userid`.
pub fn normalize_header_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Request headers keyed by their normalized name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InboundHeaders {
    map: BTreeMap<String, String>,
}

impl InboundHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header. A later header with the same normalized name replaces an earlier one.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.map.insert(normalize_header_name(name), value.into());
        self
    }

    /// Inserts an entry of a CGI-style environment. Only `HTTP_*` keys are request headers; any
    /// other key is ignored.
    pub fn insert_env(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        if let Some(name) = key.strip_prefix(CGI_HEADER_PREFIX) {
            self.insert(name, value);
        }
        self
    }

    /// Looks up a header value, without one trailing `\n`, `\r\n` or `\r`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&normalize_header_name(name)).map(|value| chomp(value))
    }

    pub fn require(&self, name: &'static str) -> Result<&str, Error> {
        self.get(name).ok_or(Error::MissingHeader(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.map.iter().map(|(name, value)| (&**name, &**value))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Reassembles the base64 signature text.
    ///
    /// The `X-Ops-Authorization-<n>` lines are ordered by `n` as a number and joined with `\n`.
    /// Without any such line, a folded `Authorization` header is unfolded instead.
    pub fn signature(&self) -> Option<String> {
        let prefix = format!("{}_", normalize_header_name(X_OPS_AUTHORIZATION));
        let mut lines: Vec<(u32, &str)> = self
            .map
            .iter()
            .filter_map(|(name, value)| {
                let index = name.strip_prefix(&prefix)?.parse().ok()?;
                Some((index, &**value))
            })
            .collect();
        if lines.is_empty() {
            let folded = self.get(AUTHORIZATION)?;
            let unfolded: Vec<&str> = folded.split_whitespace().collect();
            return (!unfolded.is_empty()).then(|| unfolded.join("\n"));
        }
        lines.sort_by_key(|&(index, _)| index);
        Some(
            lines
                .into_iter()
                .map(|(_, line)| line)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for InboundHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = InboundHeaders::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

fn chomp(value: &str) -> &str {
    value
        .strip_suffix("\r\n")
        .or_else(|| value.strip_suffix('\n'))
        .or_else(|| value.strip_suffix('\r'))
        .unwrap_or(value)
}

/// The parsed `X-Ops-Sign` header, e.g. `algorithm=sha1;version=1.1;`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignDescription {
    pub algorithm: Option<String>,
    pub version: Option<String>,
}

impl SignDescription {
    /// Parses a `;`-separated list of `name=value` pairs. Unknown names are ignored.
    pub fn parse(header: &str) -> Result<Self, Error> {
        let mut description = SignDescription::default();
        for pair in header.split(';').map(str::trim).filter(|pair| !pair.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::InvalidSignDescription(header.to_owned()))?;
            match name.trim() {
                "algorithm" => description.algorithm = Some(value.trim().to_owned()),
                "version" => description.version = Some(value.trim().to_owned()),
                _ => {}
            }
        }
        Ok(description)
    }

    /// The protocol version the request was signed with.
    ///
    /// `version` defaults to `1.0`. A present `algorithm` must be the one the version table assigns
    /// to `version`.
    pub fn protocol(&self) -> Result<&'static Protocol, Error> {
        let version = self.version.as_deref().unwrap_or(DEFAULT_PROTO_VERSION);
        match self.algorithm.as_deref() {
            Some(algorithm) => validate_sign_version_digest(algorithm, version),
            None => lookup_version(version),
        }
    }
}
