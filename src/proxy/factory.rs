//! Wiring of the collaborators a [`StreamProxy`] needs

use crate::auth::{CredentialExtractor, RealmRegistry, Verifier};
use crate::proxy::correlations::CorrelationTable;
use crate::proxy::frames::{Begin, StreamHandle, StreamId, Writer};
use crate::proxy::router::Router;
use crate::proxy::stream::{Leg, StreamProxy};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_NAME: &str = "realmgate";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("proxy factory requires a {0}")]
    Missing(&'static str),
}

/// State shared by every proxy created from one factory
pub(crate) struct ProxyContext {
    /// Source name stamped on streams this proxy opens
    pub(crate) name: String,
    pub(crate) writer: Arc<dyn Writer>,
    pub(crate) correlations: Arc<CorrelationTable>,
    next_stream_id: AtomicU64,
}

impl ProxyContext {
    pub(crate) fn next_stream_id(&self) -> StreamId {
        self.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Creates a [`StreamProxy`] for each new inbound stream
pub struct ProxyFactory {
    context: Arc<ProxyContext>,
    router: Arc<dyn Router>,
    credentials: CredentialExtractor,
}

impl ProxyFactory {
    pub fn builder() -> ProxyFactoryBuilder {
        ProxyFactoryBuilder::default()
    }

    /// Create the proxy for a stream opened by `begin`.
    ///
    /// A begin with `source_ref == 0` is a reply and always gets a
    /// connect-reply proxy. Otherwise the stream is authorized and routed;
    /// `None` means no route matched and the stream must not be opened.
    pub fn new_stream(&self, begin: &Begin) -> Option<StreamProxy> {
        let source = StreamHandle::new(begin.source.clone(), begin.stream_id);

        if begin.is_reply() {
            return Some(StreamProxy::new(self.context.clone(), Leg::ConnectReply, source));
        }

        let authorization = self.credentials.authorize(begin.header_pairs());
        let Some(target) = self.router.resolve(&begin.source, begin.source_ref, authorization) else {
            debug!(source = %source, authorization = %authorization, "Accept stream not routed");
            return None;
        };

        Some(StreamProxy::new(
            self.context.clone(),
            Leg::Accept {
                authorization,
                target,
                correlation_id: self.context.correlations.next_id(),
            },
            source,
        ))
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn correlations(&self) -> &Arc<CorrelationTable> {
        &self.context.correlations
    }
}

#[derive(Default)]
pub struct ProxyFactoryBuilder {
    name: Option<String>,
    realms: Option<Arc<RealmRegistry>>,
    correlations: Option<Arc<CorrelationTable>>,
    router: Option<Arc<dyn Router>>,
    writer: Option<Arc<dyn Writer>>,
    verifier: Option<Arc<dyn Verifier>>,
}

impl ProxyFactoryBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn realms(mut self, realms: Arc<RealmRegistry>) -> Self {
        self.realms = Some(realms);
        self
    }

    /// Share a correlation table; a private one is created otherwise
    pub fn correlations(mut self, correlations: Arc<CorrelationTable>) -> Self {
        self.correlations = Some(correlations);
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn writer(mut self, writer: Arc<dyn Writer>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Without a verifier every bearer credential is treated as absent
    pub fn verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn build(self) -> Result<ProxyFactory, BuildError> {
        let realms = self.realms.ok_or(BuildError::Missing("realm registry"))?;
        let router = self.router.ok_or(BuildError::Missing("router"))?;
        let writer = self.writer.ok_or(BuildError::Missing("writer"))?;

        let context = ProxyContext {
            name: self.name.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            writer,
            correlations: self.correlations.unwrap_or_default(),
            next_stream_id: AtomicU64::new(1),
        };

        Ok(ProxyFactory {
            context: Arc::new(context),
            router,
            credentials: CredentialExtractor::new(self.verifier, realms),
        })
    }
}
