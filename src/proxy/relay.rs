//! Drives the proxies owned by one execution context
//!
//! A `StreamRelay` is not shared: each worker owns one and feeds it frames in
//! arrival order. Only the [`ProxyFactory`] (and through it the realm registry
//! and correlation table) is shared between workers.
//!
//! A proxy stays registered until both of its directions are closed, so a
//! target can still reset or grant window to a source that already ended.
//! When the reply to an accept leg completes on the same worker, the accept
//! leg is released with it.

use crate::proxy::factory::ProxyFactory;
use crate::proxy::frames::{Frame, StreamId};
use crate::proxy::stream::StreamProxy;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no route for stream {0}")]
    NoRoute(StreamId),

    #[error("unknown stream {0}")]
    UnknownStream(StreamId),
}

pub struct StreamRelay {
    factory: Arc<ProxyFactory>,
    /// Live proxies by source stream id
    streams: HashMap<StreamId, StreamProxy>,
    /// Target stream id -> source stream id, for throttle frames
    throttles: HashMap<StreamId, StreamId>,
}

impl StreamRelay {
    pub fn new(factory: Arc<ProxyFactory>) -> Self {
        Self {
            factory,
            streams: HashMap::new(),
            throttles: HashMap::new(),
        }
    }

    /// Deliver a frame that arrived on source stream `stream_id`.
    ///
    /// A begin on an unknown stream creates its proxy; failing to route it
    /// is reported as [`RelayError::NoRoute`] so the caller can refuse the stream.
    pub fn on_stream(&mut self, stream_id: StreamId, frame: Frame) -> Result<(), RelayError> {
        if !self.streams.contains_key(&stream_id) {
            let Frame::Begin(begin) = &frame else {
                return Err(RelayError::UnknownStream(stream_id));
            };
            let proxy = self
                .factory
                .new_stream(begin)
                .ok_or(RelayError::NoRoute(stream_id))?;
            self.streams.insert(stream_id, proxy);
        }

        let proxy = self
            .streams
            .get_mut(&stream_id)
            .ok_or(RelayError::UnknownStream(stream_id))?;
        proxy.handle_stream(frame);

        if let Some(target) = proxy.target() {
            self.throttles.entry(target.stream_id).or_insert(stream_id);
        }

        self.reap(stream_id);
        Ok(())
    }

    /// Deliver a window or reset that arrived for target stream `target_stream_id`
    pub fn on_throttle(&mut self, target_stream_id: StreamId, frame: Frame) -> Result<(), RelayError> {
        let stream_id = *self
            .throttles
            .get(&target_stream_id)
            .ok_or(RelayError::UnknownStream(target_stream_id))?;

        if let Some(proxy) = self.streams.get_mut(&stream_id) {
            proxy.handle_throttle(frame);
        }

        self.reap(stream_id);
        Ok(())
    }

    fn reap(&mut self, stream_id: StreamId) {
        if !self.streams.get(&stream_id).is_some_and(StreamProxy::is_finished) {
            return;
        }

        let Some(proxy) = self.streams.remove(&stream_id) else {
            return;
        };
        if let Some(target) = proxy.target() {
            self.throttles.remove(&target.stream_id);
        }
        debug!(source = %proxy.source(), "Stream finished");

        // A completed reply releases the throttle of the accept leg it answers
        if let Some(connect_stream_id) = proxy.paired_connect_stream_id() {
            if let Some(accept_stream_id) = self.throttles.get(&connect_stream_id).copied() {
                if let Some(accept) = self.streams.get_mut(&accept_stream_id) {
                    accept.complete_reply();
                }
                self.reap(accept_stream_id);
            }
        }
    }

    pub fn get(&self, stream_id: StreamId) -> Option<&StreamProxy> {
        self.streams.get(&stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
