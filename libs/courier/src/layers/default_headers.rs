use crate::error::HttpError;
use http::header::{HeaderMap, HeaderName};
use http::{HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that fills in headers the request did not set itself.
///
/// Headers already present on the request are never overwritten, so a
/// per-request `User-Agent` wins over the adapter-wide default.
#[derive(Clone, Debug, Default)]
pub struct DefaultHeadersLayer {
    defaults: HeaderMap,
}

impl DefaultHeadersLayer {
    /// Build a layer from `(name, value)` pairs.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderName` / `HttpError::InvalidHeaderValue`
    /// for entries that are not valid HTTP headers.
    pub fn try_new<I, N, V>(defaults: I) -> Result<Self, HttpError>
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = HeaderMap::new();
        for (name, value) in defaults {
            let name = HeaderName::from_bytes(name.as_ref().as_bytes())?;
            let value = HeaderValue::from_str(value.as_ref())?;
            map.append(name, value);
        }
        Ok(Self { defaults: map })
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            defaults: self.defaults.clone(),
        }
    }
}

/// Service produced by [`DefaultHeadersLayer`].
#[derive(Clone, Debug)]
pub struct DefaultHeadersService<S> {
    inner: S,
    defaults: HeaderMap,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        for name in self.defaults.keys() {
            if req.headers().contains_key(name) {
                continue;
            }
            for value in self.defaults.get_all(name) {
                req.headers_mut().append(name.clone(), value.clone());
            }
        }
        self.inner.call(req)
    }
}
