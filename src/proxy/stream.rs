//! Per-stream proxy state machine
//!
//! One [`StreamProxy`] exists per inbound stream. Only begin handling differs
//! between an accept leg and a connect-reply leg; relaying after begin and
//! throttle propagation are shared.
//!
//! End or abort closes the source direction only. The target keeps sending
//! window and reset frames for the leg until it resets, or until the reply
//! paired with an accept leg completes. A proxy is finished once both
//! directions are closed.

use crate::auth::AuthorizationToken;
use crate::proxy::correlations::Correlation;
use crate::proxy::factory::ProxyContext;
use crate::proxy::frames::{Begin, CorrelationId, Frame, StreamHandle, StreamId};
use crate::proxy::router::RouteTarget;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    BeforeBegin,
    AfterBegin,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leg {
    /// Inbound, routable side
    Accept {
        authorization: AuthorizationToken,
        target: RouteTarget,
        /// Correlation id sent to the target with the connect begin
        correlation_id: CorrelationId,
    },
    /// Reply from a routed target, paired by correlation id
    ConnectReply,
}

pub struct StreamProxy {
    context: Arc<ProxyContext>,
    leg: Leg,
    state: ProxyState,
    /// Inbound stream; resets and windows flow back here
    source: StreamHandle,
    /// Outbound stream, opened on begin
    target: Option<StreamHandle>,
    /// Target still delivers window and reset frames for this leg
    throttle_open: bool,
    /// Accept leg only: the paired reply has completed
    reply_complete: bool,
    /// Reply leg only: connect stream of the accept leg this reply answers
    paired_connect_stream_id: Option<StreamId>,
}

impl StreamProxy {
    pub(crate) fn new(context: Arc<ProxyContext>, leg: Leg, source: StreamHandle) -> Self {
        Self {
            context,
            leg,
            state: ProxyState::BeforeBegin,
            source,
            target: None,
            throttle_open: false,
            reply_complete: false,
            paired_connect_stream_id: None,
        }
    }

    pub fn leg(&self) -> &Leg {
        &self.leg
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    /// Source direction closed; later source frames are dropped
    pub fn is_terminated(&self) -> bool {
        self.state == ProxyState::Terminated
    }

    /// Both directions closed; nothing more will be relayed
    pub fn is_finished(&self) -> bool {
        self.is_terminated() && !self.throttle_open
    }

    pub fn source(&self) -> &StreamHandle {
        &self.source
    }

    pub fn target(&self) -> Option<&StreamHandle> {
        self.target.as_ref()
    }

    /// Connect stream id of the accept leg this reply was paired with
    pub fn paired_connect_stream_id(&self) -> Option<StreamId> {
        self.paired_connect_stream_id
    }

    /// Handle a frame arriving on the source stream
    pub fn handle_stream(&mut self, frame: Frame) {
        match self.state {
            ProxyState::BeforeBegin => self.before_begin(frame),
            ProxyState::AfterBegin => self.after_begin(frame),
            ProxyState::Terminated => {
                debug!(source = %self.source, kind = frame.kind(), "Dropped frame on terminated stream");
            }
        }
    }

    /// Handle a frame arriving from the target side (window or reset)
    pub fn handle_throttle(&mut self, frame: Frame) {
        if !self.throttle_open {
            debug!(source = %self.source, kind = frame.kind(), "Dropped throttle frame on closed stream");
            return;
        }

        match frame {
            Frame::Window {
                credit_bytes,
                credit_frames,
            } => {
                self.context
                    .writer
                    .window(&self.source, credit_bytes, credit_frames);
            }
            Frame::Reset => {
                debug!(source = %self.source, "Target reset, resetting source");
                self.reset_source();
            }
            other => {
                debug!(source = %self.source, kind = other.kind(), "Ignored throttle frame");
            }
        }
    }

    /// The reply paired with this accept leg has completed.
    ///
    /// Closes the throttle once the source has also finished sending.
    pub fn complete_reply(&mut self) {
        if !matches!(self.leg, Leg::Accept { .. }) {
            return;
        }

        self.reply_complete = true;
        if self.is_terminated() {
            self.throttle_open = false;
        }
    }

    fn before_begin(&mut self, frame: Frame) {
        match frame {
            Frame::Begin(begin) => self.handle_begin(begin),
            other => {
                warn!(source = %self.source, kind = other.kind(), "Expected begin");
                self.reset_source();
            }
        }
    }

    fn handle_begin(&mut self, begin: Begin) {
        let opened = match &self.leg {
            Leg::Accept {
                authorization,
                target,
                correlation_id,
            } => Some((self.begin_accept(begin, *authorization, target, *correlation_id), None)),
            Leg::ConnectReply => self
                .begin_connect_reply(begin)
                .map(|(target, connect_stream_id)| (target, Some(connect_stream_id))),
        };

        match opened {
            Some((target, paired_connect_stream_id)) => {
                self.target = Some(target);
                self.paired_connect_stream_id = paired_connect_stream_id;
                self.state = ProxyState::AfterBegin;
                self.throttle_open = true;
            }
            None => self.reset_source(),
        }
    }

    fn begin_accept(
        &self,
        begin: Begin,
        authorization: AuthorizationToken,
        route: &RouteTarget,
        correlation_id: CorrelationId,
    ) -> StreamHandle {
        let context = &self.context;
        let target = StreamHandle::new(route.name.clone(), context.next_stream_id());

        context.correlations.insert(
            correlation_id,
            Correlation {
                accept_name: begin.source,
                accept_correlation_id: begin.correlation_id,
                accept_stream_id: begin.stream_id,
                connect_stream_id: target.stream_id,
            },
        );

        debug!(
            source = %self.source,
            target = %target,
            correlation_id = correlation_id,
            authorization = %authorization,
            "Opening connect stream"
        );

        context.writer.begin(
            &target,
            Begin {
                stream_id: target.stream_id,
                source: context.name.clone(),
                source_ref: route.target_ref,
                correlation_id,
                authorization,
                headers: begin.headers,
            },
        );

        target
    }

    /// Returns the accept reply stream and the connect stream it answers
    fn begin_connect_reply(&self, begin: Begin) -> Option<(StreamHandle, StreamId)> {
        let context = &self.context;

        let Some(correlation) = context.correlations.claim(begin.correlation_id) else {
            warn!(
                source = %self.source,
                correlation_id = begin.correlation_id,
                "Reply with unknown correlation id"
            );
            return None;
        };

        let target = StreamHandle::new(correlation.accept_name, context.next_stream_id());

        debug!(
            source = %self.source,
            target = %target,
            accept_stream_id = correlation.accept_stream_id,
            "Opening accept reply stream"
        );

        context.writer.begin(
            &target,
            Begin {
                stream_id: target.stream_id,
                source: context.name.clone(),
                source_ref: 0,
                correlation_id: correlation.accept_correlation_id,
                authorization: begin.authorization,
                headers: begin.headers,
            },
        );

        Some((target, correlation.connect_stream_id))
    }

    fn after_begin(&mut self, frame: Frame) {
        let Some(target) = &self.target else {
            self.reset_source();
            return;
        };
        let writer = &self.context.writer;

        match frame {
            Frame::Data { payload, extension } => writer.data(target, payload, extension),
            Frame::End { extension } => {
                writer.end(target, extension);
                self.close_source();
            }
            Frame::Abort => {
                writer.abort(target);
                self.release_correlation();
                self.close_source();
            }
            other => {
                warn!(source = %self.source, kind = other.kind(), "Unexpected frame after begin");
                self.reset_source();
            }
        }
    }

    /// Half-close: the source direction is done, the throttle may stay open
    fn close_source(&mut self) {
        self.state = ProxyState::Terminated;
        match self.leg {
            // A completed reply ends the conversation
            Leg::ConnectReply => self.throttle_open = false,
            Leg::Accept { .. } => {
                if self.reply_complete {
                    self.throttle_open = false;
                }
            }
        }
    }

    /// Drop the pending correlation of an accept leg that will see no reply
    fn release_correlation(&self) {
        if let Leg::Accept { correlation_id, .. } = self.leg {
            if self.context.correlations.claim(correlation_id).is_some() {
                debug!(source = %self.source, correlation_id = correlation_id, "Released unclaimed correlation");
            }
        }
    }

    fn reset_source(&mut self) {
        self.context.writer.reset(&self.source);
        self.release_correlation();
        self.state = ProxyState::Terminated;
        self.throttle_open = false;
    }
}
