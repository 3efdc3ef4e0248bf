use crate::port::{InputPort, OutputPort, PortInner};
use std::sync::{Arc, Weak};

/// A point-to-point link from one output port to one input port.
///
/// Owned by the graph; the endpoints are weak so a connection never keeps a
/// component alive.
#[derive(Clone, Debug)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

#[derive(Debug)]
pub(crate) struct ConnectionInner {
    pub(crate) upstream: Weak<PortInner>,
    pub(crate) downstream: Weak<PortInner>,
}

impl Connection {
    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Connection { inner }
    }

    /// The upstream (output) endpoint; `None` once its component is gone.
    pub fn upstream_port(&self) -> Option<OutputPort> {
        self.inner.upstream.upgrade().map(OutputPort::from_inner)
    }

    /// The downstream (input) endpoint; `None` once its component is gone.
    pub fn downstream_port(&self) -> Option<InputPort> {
        self.inner.downstream.upgrade().map(InputPort::from_inner)
    }

    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
