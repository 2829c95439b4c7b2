//! The inbound request as seen by the verifier.

use core::fmt::{self, Debug, Formatter};
use std::io::Read;

use http::Method;
use tracing::debug;

use crate::headers::InboundHeaders;

/// A request parameter, as decoded by the host framework.
pub enum Param<'a> {
    Value(String),
    /// An uploaded file.
    File(Box<dyn Read + 'a>),
    /// A nested parameter mapping, e.g. `{ filename, type, tempfile }` of a multipart upload.
    Map(Vec<(String, Param<'a>)>),
}

/// What the content hash of a request is computed from.
pub enum Content<'r> {
    Body(&'r [u8]),
    Upload(&'r mut dyn Read),
}

/// An HTTP request to authenticate.
pub struct InboundRequest<'a> {
    method: Method,
    path: String,
    headers: InboundHeaders,
    body: &'a [u8],
    params: Vec<(String, Param<'a>)>,
}

impl<'a> InboundRequest<'a> {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        InboundRequest {
            method,
            path: path.into(),
            headers: InboundHeaders::new(),
            body: &[],
            params: Vec::new(),
        }
    }

    /// Adapts an [`http::Request`]. Header values that aren't visible ASCII are skipped.
    pub fn from_http<B: AsRef<[u8]>>(request: &'a http::Request<B>) -> Self {
        let mut inbound = InboundRequest::new(request.method().clone(), request.uri().path());
        inbound.body(request.body().as_ref());
        for (name, value) in request.headers() {
            match value.to_str() {
                Ok(value) => {
                    inbound.header(name.as_str(), value);
                }
                Err(_) => debug!(header = %name, "skipping non-ASCII header value"),
            }
        }
        inbound
    }

    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(name, value);
        self
    }

    /// Adds an entry of a CGI-style environment. See [`InboundHeaders::insert_env`].
    pub fn env(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert_env(key, value);
        self
    }

    pub fn body(&mut self, body: &'a [u8]) -> &mut Self {
        self.body = body;
        self
    }

    pub fn param(&mut self, name: impl Into<String>, param: Param<'a>) -> &mut Self {
        self.params.push((name.into(), param));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &InboundHeaders {
        &self.headers
    }

    /// The content to hash: the first uploaded file if there is one, the raw body otherwise.
    ///
    /// A file parameter at the top level wins over one nested in a mapping.
    pub fn content(&mut self) -> Content<'_> {
        let body = self.body;
        match find_upload(&mut self.params) {
            Some(file) => Content::Upload(file),
            None => Content::Body(body),
        }
    }
}

fn find_upload<'r, 'a>(params: &'r mut [(String, Param<'a>)]) -> Option<&'r mut (dyn Read + 'a)> {
    fn is_file(param: &(String, Param<'_>)) -> bool {
        matches!(param.1, Param::File(_))
    }

    let slot = match params.iter().position(is_file) {
        Some(i) => &mut params[i].1,
        None => {
            let (i, j) = params.iter().enumerate().find_map(|(i, (_, param))| match param {
                Param::Map(nested) => nested.iter().position(is_file).map(|j| (i, j)),
                _ => None,
            })?;
            match &mut params[i].1 {
                Param::Map(nested) => &mut nested[j].1,
                _ => return None,
            }
        }
    };
    match slot {
        Param::File(file) => Some(&mut **file),
        _ => None,
    }
}

impl Debug for Param<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Param::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Param::File(_) => f.write_str("File(..)"),
            Param::Map(nested) => f.debug_tuple("Map").field(nested).finish(),
        }
    }
}

impl Debug for InboundRequest<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &String::from_utf8_lossy(self.body))
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn read_content(request: &mut InboundRequest<'_>) -> Vec<u8> {
        match request.content() {
            Content::Body(body) => body.to_vec(),
            Content::Upload(file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).unwrap();
                buf
            }
        }
    }

    #[test]
    fn body_without_uploads() {
        let mut request = InboundRequest::new(Method::POST, "/");
        request
            .body(b"raw body")
            .param("name", Param::Value("value".to_owned()));
        assert_eq!(read_content(&mut request), b"raw body");
    }

    #[test]
    fn direct_upload() {
        let mut request = InboundRequest::new(Method::POST, "/");
        request
            .body(b"multipart garbage")
            .param("name", Param::Value("value".to_owned()))
            .param("file", Param::File(Box::new(Cursor::new("direct"))));
        assert_eq!(read_content(&mut request), b"direct");
    }

    #[test]
    fn nested_upload() {
        let mut request = InboundRequest::new(Method::POST, "/");
        request.body(b"multipart garbage").param(
            "file",
            Param::Map(vec![
                ("filename".to_owned(), Param::Value("a.txt".to_owned())),
                ("tempfile".to_owned(), Param::File(Box::new(Cursor::new("nested")))),
            ]),
        );
        assert_eq!(read_content(&mut request), b"nested");
    }

    #[test]
    fn direct_upload_wins() {
        let mut request = InboundRequest::new(Method::POST, "/");
        request
            .param(
                "nested",
                Param::Map(vec![(
                    "tempfile".to_owned(),
                    Param::File(Box::new(Cursor::new("nested"))),
                )]),
            )
            .param("file", Param::File(Box::new(Cursor::new("direct"))));
        assert_eq!(read_content(&mut request), b"direct");
    }

    #[test]
    fn http_adapter() {
        let request = http::Request::post("/organizations/clownco?q=1")
            .header("X-Ops-Userid", "clownco-user")
            .header("Host", "127.0.0.1")
            .body(b"Request Body".to_vec())
            .unwrap();
        let mut inbound = InboundRequest::from_http(&request);
        assert_eq!(inbound.method(), Method::POST);
        assert_eq!(inbound.path(), "/organizations/clownco");
        assert_eq!(inbound.headers().get("x_ops_userid"), Some("clownco-user"));
        assert_eq!(read_content(&mut inbound), b"Request Body");
    }
}
