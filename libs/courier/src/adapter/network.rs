use super::{Adapter, TransferResult};
use crate::config::{HyperAdapterConfig, TransportSecurity};
use crate::error::{BoxError, HttpError, InvalidUriKind};
use crate::headers::HeaderCollection;
use crate::layers::DefaultHeadersLayer;
use crate::message::{Request, Response, Verify};
use crate::outcome::TransferError;
use crate::tls;
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderValue;
use http::header::{AUTHORIZATION, USER_AGENT};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tower::ServiceBuilder;
use tower::util::BoxCloneService;
use tower::{Service, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// Body type after decompression, with errors boxed.
type ResponseBody = http_body_util::combinators::BoxBody<Bytes, BoxError>;

type InnerService =
    BoxCloneService<http::Request<Full<Bytes>>, http::Response<ResponseBody>, HttpError>;

/// Builder for [`HyperAdapter`].
#[derive(Debug, Default)]
pub struct HyperAdapterBuilder {
    config: HyperAdapterConfig,
}

impl HyperAdapterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: HyperAdapterConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Maximum decompressed body size; larger bodies fail with `BodyTooLarge`.
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Refuse plain `http://` URLs.
    #[must_use]
    pub fn https_only(self) -> Self {
        self.transport(TransportSecurity::HttpsOnly)
    }

    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Build the adapter.
    ///
    /// The default (webpki roots) connection pool is created eagerly; pools
    /// for other verification modes are created on first use.
    ///
    /// # Errors
    /// Returns [`HttpError::InvalidHeaderValue`] for an invalid user agent or
    /// [`HttpError::Tls`] if the TLS stack cannot be initialized.
    pub fn build(self) -> Result<HyperAdapter, HttpError> {
        let default_service = build_service(&self.config, &Verify::Enabled)?;
        Ok(HyperAdapter {
            config: self.config,
            services: Mutex::new(HashMap::from([(Verify::Enabled, default_service)])),
        })
    }
}

/// Network adapter backed by a pooled `hyper-util` client over `hyper-rustls`.
///
/// HTTP/1.1 and HTTP/2 are negotiated through ALPN. Responses are
/// transparently decompressed (gzip, brotli, deflate) and read fully into
/// memory up to the configured size limit. Each [`Verify`] mode gets its own
/// connection pool, so a request with verification disabled never reuses a
/// connection established under a different trust policy.
pub struct HyperAdapter {
    config: HyperAdapterConfig,
    services: Mutex<HashMap<Verify, InnerService>>,
}

impl std::fmt::Debug for HyperAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperAdapter")
            .field("config", &self.config)
            .field("pools", &self.services.lock().len())
            .finish()
    }
}

impl HyperAdapter {
    #[must_use]
    pub fn builder() -> HyperAdapterBuilder {
        HyperAdapterBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &HyperAdapterConfig {
        &self.config
    }

    fn service_for(&self, verify: &Verify) -> Result<InnerService, HttpError> {
        if let Some(service) = self.services.lock().get(verify) {
            return Ok(service.clone());
        }

        let service = build_service(&self.config, verify)?;
        Ok(self
            .services
            .lock()
            .entry(verify.clone())
            .or_insert(service)
            .clone())
    }
}

#[async_trait]
impl Adapter for HyperAdapter {
    async fn send(&self, request: &Request) -> TransferResult {
        let http_request = to_http_request(request)?;
        let mut service = self.service_for(&request.config().verify)?;

        let response = service.ready().await?.call(http_request).await?;
        let (parts, body) = response.into_parts();

        let mut received = Response::new(parts.status)
            .with_headers(HeaderCollection::from_header_map(&parts.headers));
        if let Some(reason) = parts.extensions.get::<hyper::ext::ReasonPhrase>() {
            received = received.with_reason(String::from_utf8_lossy(reason.as_bytes()));
        }

        match read_body_limited(body, self.config.max_body_size).await {
            Ok(bytes) => {
                received.set_body(bytes);
                Ok(received)
            }
            Err(cause) => Err(TransferError::with_response(cause, received)),
        }
    }
}

/// Convert a pipeline request into an `http::Request`, materializing auth.
fn to_http_request(request: &Request) -> Result<http::Request<Full<Bytes>>, HttpError> {
    let url = request.url();
    let uri: http::Uri = url
        .parse()
        .map_err(|e| HttpError::invalid_uri(&url, InvalidUriKind::ParseError, e))?;

    let mut headers = request.headers().to_header_map()?;
    if let Some(auth) = &request.config().auth
        && !headers.contains_key(AUTHORIZATION)
    {
        let mut value = HeaderValue::from_str(&auth.header_value())?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    let body = request.body().cloned().unwrap_or_default();
    let mut http_request = http::Request::builder()
        .method(request.method().clone())
        .uri(uri)
        .body(Full::new(body))?;
    *http_request.headers_mut() = headers;
    Ok(http_request)
}

fn build_service(config: &HyperAdapterConfig, verify: &Verify) -> Result<InnerService, HttpError> {
    let https = build_https_connector(verify, config.transport)?;

    let mut client_builder = Client::builder(TokioExecutor::new());
    client_builder
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .http2_only(false);
    if let Some(idle) = config.pool_idle_timeout {
        client_builder.pool_idle_timeout(idle);
    }
    let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

    let defaults = DefaultHeadersLayer::try_new([(USER_AGENT.as_str(), config.user_agent.as_str())])?;

    let service = ServiceBuilder::new()
        .layer(defaults)
        .layer(DecompressionLayer::new())
        .service(hyper_client)
        .map_response(map_decompression_response)
        .map_err(map_client_error);

    Ok(service.boxed_clone())
}

fn map_decompression_response<B>(response: http::Response<B>) -> http::Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<BoxError>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    http::Response::from_parts(parts, boxed_body)
}

/// Classify a client error, surfacing TLS failures as [`HttpError::Tls`].
fn map_client_error(err: hyper_util::client::legacy::Error) -> HttpError {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        let is_tls = cause.is::<rustls::Error>()
            || cause
                .downcast_ref::<std::io::Error>()
                .and_then(std::io::Error::get_ref)
                .is_some_and(|inner| inner.is::<rustls::Error>());
        if is_tls {
            return HttpError::Tls(Box::new(err));
        }
        source = cause.source();
    }
    HttpError::from(err)
}

/// Build the HTTPS connector for a verification mode.
///
/// ALPN advertises both h2 and http/1.1; the server picks during the handshake.
fn build_https_connector(
    verify: &Verify,
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = match verify {
        Verify::Enabled => HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls::get_crypto_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        Verify::Native => HttpsConnectorBuilder::new().with_tls_config(tls::native_roots_client_config()?),
        Verify::CaBundle(path) => {
            HttpsConnectorBuilder::new().with_tls_config(tls::ca_bundle_client_config(path)?)
        }
        Verify::Disabled => {
            tracing::warn!("TLS certificate verification disabled for this connection pool");
            HttpsConnectorBuilder::new().with_tls_config(tls::insecure_client_config()?)
        }
    };

    let builder = match transport {
        TransportSecurity::HttpsOrHttp => builder.https_or_http(),
        TransportSecurity::HttpsOnly => builder.https_only(),
    };
    Ok(builder.enable_all_versions().build())
}

/// Collect a body, failing once it grows past `limit` bytes.
async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}
