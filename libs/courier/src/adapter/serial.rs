use super::{Adapter, Completion, ParallelAdapter, transfer};
use crate::message::Request;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::sync::Arc;

/// Batch adapter that sends one request at a time, in order.
#[derive(Clone)]
pub struct SerialAdapter {
    adapter: Arc<dyn Adapter>,
}

impl SerialAdapter {
    #[must_use]
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self { adapter }
    }
}

impl ParallelAdapter for SerialAdapter {
    fn send_all(&self, requests: Vec<Request>) -> BoxStream<'static, Completion> {
        let adapter = Arc::clone(&self.adapter);
        stream::iter(requests)
            .then(move |request| {
                let adapter = Arc::clone(&adapter);
                async move {
                    let result = transfer(adapter.as_ref(), &request).await;
                    (request, result)
                }
            })
            .boxed()
    }
}
