//! Request construction and raw message parsing.

use crate::config::RequestDefaults;
use crate::error::{HttpError, InvalidUriKind};
use crate::message::{Request, Response};
use crate::options::RequestOptions;
use bytes::Bytes;
use http::{Method, StatusCode};
use url::Url;

/// A parsed HTTP message.
#[derive(Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Builds requests for a [`Client`](crate::Client) and parses raw messages.
pub trait MessageFactory: Send + Sync {
    /// Create a request for an absolute URL, applying `defaults` then `options`.
    ///
    /// # Errors
    /// Returns an invalid-input error for malformed headers or options.
    fn create_request(
        &self,
        method: Method,
        url: Url,
        defaults: &RequestDefaults,
        options: RequestOptions,
    ) -> Result<Request, HttpError>;

    /// Parse a raw HTTP/1.x request or response.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidInput`] if `raw` is not a well-formed message.
    #[allow(clippy::wrong_self_convention)] // factory method, not a conversion
    fn from_message(&self, raw: &[u8]) -> Result<Message, HttpError>;
}

/// The stock [`MessageFactory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessageFactory;

impl MessageFactory for DefaultMessageFactory {
    fn create_request(
        &self,
        method: Method,
        url: Url,
        defaults: &RequestDefaults,
        options: RequestOptions,
    ) -> Result<Request, HttpError> {
        let mut request = Request::from_url(method, url);
        request.headers_mut().set_all(&defaults.headers);
        request.query_mut().merge(&defaults.query);

        let config = request.config_mut();
        config.allow_redirects = defaults.allow_redirects;
        config.exceptions = defaults.exceptions;
        config.verify.clone_from(&defaults.verify);
        config.auth.clone_from(&defaults.auth);
        config.timeout = defaults.timeout;

        options.apply(&mut request)?;
        Ok(request)
    }

    fn from_message(&self, raw: &[u8]) -> Result<Message, HttpError> {
        if raw.starts_with(b"HTTP/") {
            parse_response(raw).map(Message::Response)
        } else {
            parse_request(raw).map(Message::Request)
        }
    }
}

/// Header slots handed to the parser.
const MAX_HEADERS: usize = 128;

type Fields = Vec<(String, String)>;

fn malformed(err: httparse::Error) -> HttpError {
    HttpError::InvalidInput(format!("malformed HTTP message: {err}"))
}

fn complete(status: httparse::Status<usize>) -> Result<usize, HttpError> {
    match status {
        httparse::Status::Complete(head_len) => Ok(head_len),
        httparse::Status::Partial => Err(HttpError::InvalidInput(
            "incomplete HTTP message head".to_owned(),
        )),
    }
}

/// Copy parsed headers out of the buffer, joining folded lines with a space.
fn collect_fields(headers: &[httparse::Header<'_>]) -> Result<Fields, HttpError> {
    headers
        .iter()
        .map(|header| {
            let value = std::str::from_utf8(header.value).map_err(|_| {
                HttpError::InvalidInput(format!("header {} is not valid UTF-8", header.name))
            })?;
            let value = value
                .split(['\r', '\n'])
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            Ok((header.name.to_owned(), value))
        })
        .collect()
}

/// Body after the head, cut to `Content-Length` when present.
fn message_body(fields: &Fields, rest: &[u8]) -> Bytes {
    let len = fields
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .map_or(rest.len(), |len| len.min(rest.len()));
    Bytes::copy_from_slice(&rest[..len])
}

fn parse_response(raw: &[u8]) -> Result<Response, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    let head_len = complete(
        httparse::ParserConfig::default()
            .allow_obsolete_multiline_headers_in_responses(true)
            .parse_response(&mut parsed, raw)
            .map_err(malformed)?,
    )?;

    let code = parsed
        .code
        .ok_or_else(|| HttpError::InvalidInput("missing status code".to_owned()))?;
    let status = StatusCode::from_u16(code)
        .map_err(|_| HttpError::InvalidInput(format!("invalid status code: {code}")))?;
    let fields = collect_fields(parsed.headers)?;
    let body = message_body(&fields, &raw[head_len..]);

    let mut response = Response::new(status).with_body(body);
    if let Some(reason) = parsed.reason.map(str::trim).filter(|r| !r.is_empty()) {
        response = response.with_reason(reason);
    }
    for (name, value) in fields {
        response.headers_mut().add(&name, value)?;
    }
    Ok(response)
}

fn parse_request(raw: &[u8]) -> Result<Request, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    let head_len = complete(parsed.parse(raw).map_err(malformed)?)?;

    let (Some(method), Some(target)) = (parsed.method, parsed.path) else {
        return Err(HttpError::InvalidInput("malformed request line".to_owned()));
    };
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| HttpError::InvalidInput(format!("invalid method: {method}")))?;
    let fields = collect_fields(parsed.headers)?;

    let url = if target.contains("://") {
        target.to_owned()
    } else {
        let host = fields
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("host"))
            .map(|(_, value)| value.as_str())
            .ok_or_else(|| {
                HttpError::invalid_uri(target, InvalidUriKind::MissingBase, "no Host header")
            })?;
        format!("http://{host}{target}")
    };
    let body = message_body(&fields, &raw[head_len..]);

    let mut request = Request::new(method, &url)?;
    for (name, value) in fields {
        request.headers_mut().add(&name, value)?;
    }
    if !body.is_empty() {
        request.set_body(Some(body));
    }
    Ok(request)
}
