//! Stream proxying
//!
//! Each inbound stream gets a [`StreamProxy`] from the [`ProxyFactory`]. Accept
//! streams are authorized and routed to a target; replies from the target are
//! paired back to their accept stream through the [`CorrelationTable`].

mod correlations;
mod factory;
mod frames;
mod relay;
mod router;
mod stream;

pub use correlations::{Correlation, CorrelationTable};
pub use factory::{BuildError, ProxyFactory, ProxyFactoryBuilder, DEFAULT_NAME};
pub use frames::{Begin, CorrelationId, Frame, Header, StreamHandle, StreamId, Writer};
pub use relay::{RelayError, StreamRelay};
pub use router::{Route, RouteTable, RouteTarget, Router};
pub use stream::{Leg, ProxyState, StreamProxy};
