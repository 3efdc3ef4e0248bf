use crate::error::Error;
use crate::graph::{self, GraphInner};
use crate::iterator::{MessageIterator, MessageIteratorImpl};
use crate::message::MessageFactory;
use crate::port::{InputPort, OutputPort, PortDirection, PortInner};
use crate::query::QueryExecutor;
use crate::types::{Interruptor, LoggingLevel};
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Weak};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComponentClassKind {
    Source,
    Filter,
    Sink,
}

impl std::fmt::Display for ComponentClassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ComponentClassKind::Source => "source",
            ComponentClassKind::Filter => "filter",
            ComponentClassKind::Sink => "sink",
        };
        write!(f, "{name}")
    }
}

/// Metadata and out-of-band query support shared by every component class.
pub trait ComponentClass: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn help(&self) -> &str {
        ""
    }

    /// Out-of-band request against the class, without instantiating it.
    fn query(
        &self,
        object: &str,
        _params: &Value,
        _executor: &QueryExecutor,
    ) -> Result<Value, Error> {
        Err(Error::InvalidObject(object.to_owned()))
    }
}

pub trait SourceClass: ComponentClass {
    fn instantiate(&self) -> Result<Box<dyn Source>, Error>;
}

pub trait FilterClass: ComponentClass {
    fn instantiate(&self) -> Result<Box<dyn Filter>, Error>;
}

pub trait SinkClass: ComponentClass {
    fn instantiate(&self) -> Result<Box<dyn Sink>, Error>;
}

/// A kind-tagged shared reference to a component class.
#[derive(Clone)]
pub enum ComponentClassRef {
    Source(Arc<dyn SourceClass>),
    Filter(Arc<dyn FilterClass>),
    Sink(Arc<dyn SinkClass>),
}

impl ComponentClassRef {
    pub fn kind(&self) -> ComponentClassKind {
        match self {
            ComponentClassRef::Source(_) => ComponentClassKind::Source,
            ComponentClassRef::Filter(_) => ComponentClassKind::Filter,
            ComponentClassRef::Sink(_) => ComponentClassKind::Sink,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ComponentClassRef::Source(class) => class.name(),
            ComponentClassRef::Filter(class) => class.name(),
            ComponentClassRef::Sink(class) => class.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ComponentClassRef::Source(class) => class.description(),
            ComponentClassRef::Filter(class) => class.description(),
            ComponentClassRef::Sink(class) => class.description(),
        }
    }

    pub fn help(&self) -> &str {
        match self {
            ComponentClassRef::Source(class) => class.help(),
            ComponentClassRef::Filter(class) => class.help(),
            ComponentClassRef::Sink(class) => class.help(),
        }
    }

    pub fn query(
        &self,
        object: &str,
        params: &Value,
        executor: &QueryExecutor,
    ) -> Result<Value, Error> {
        match self {
            ComponentClassRef::Source(class) => class.query(object, params, executor),
            ComponentClassRef::Filter(class) => class.query(object, params, executor),
            ComponentClassRef::Sink(class) => class.query(object, params, executor),
        }
    }
}

/// What a sink's `consume` (and a graph step) reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConsumeStatus {
    Ok,
    /// No progress was possible; retry later.
    Again,
    /// No further work will ever be available.
    End,
}

/// User logic of a source component.
pub trait Source: Send {
    fn initialize(
        &mut self,
        _self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn finalize(&mut self) {}

    /// A new iterator for one of this source's connected output ports.
    fn create_message_iterator(
        &mut self,
        ctx: &mut IteratorInit<'_>,
    ) -> Result<Box<dyn MessageIteratorImpl>, Error>;
}

/// User logic of a filter component.
pub trait Filter: Send {
    fn initialize(
        &mut self,
        _self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Veto hook invoked before one of this filter's input ports is
    /// connected.
    fn accept_port_connection(
        &mut self,
        _self_component: &mut SelfComponent<'_>,
        _self_port: &InputPort,
        _upstream_port: &OutputPort,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn finalize(&mut self) {}

    fn create_message_iterator(
        &mut self,
        ctx: &mut IteratorInit<'_>,
    ) -> Result<Box<dyn MessageIteratorImpl>, Error>;
}

/// User logic of a sink component.
pub trait Sink: Send {
    fn initialize(
        &mut self,
        _self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn accept_port_connection(
        &mut self,
        _self_component: &mut SelfComponent<'_>,
        _self_port: &InputPort,
        _upstream_port: &OutputPort,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Invoked exactly once, after every connection is made and before the
    /// first `consume`. Iterators on input ports are created here.
    fn graph_is_configured(&mut self, _ctx: &mut SinkContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Advances this sink's input iterators once.
    fn consume(&mut self) -> Result<ConsumeStatus, Error>;

    fn finalize(&mut self) {}
}

pub(crate) enum ComponentLogic {
    Source(Box<dyn Source>),
    Filter(Box<dyn Filter>),
    Sink(Box<dyn Sink>),
}

pub(crate) struct ComponentEntry {
    pub(crate) name: String,
    pub(crate) class: ComponentClassRef,
    pub(crate) logging_level: LoggingLevel,
    pub(crate) graph: Weak<GraphInner>,
    pub(crate) input_ports: Mutex<Vec<Arc<PortInner>>>,
    pub(crate) output_ports: Mutex<Vec<Arc<PortInner>>>,
    pub(crate) logic: Mutex<ComponentLogic>,
    pub(crate) graph_is_configured_called: AtomicBool,
}

impl ComponentEntry {
    pub(crate) fn kind(&self) -> ComponentClassKind {
        self.class.kind()
    }

    pub(crate) fn port_by_name(
        &self,
        direction: PortDirection,
        name: &str,
    ) -> Option<Arc<PortInner>> {
        let ports = match direction {
            PortDirection::Input => self.input_ports.lock(),
            PortDirection::Output => self.output_ports.lock(),
        };
        ports.iter().find(|p| p.name == name).cloned()
    }

    pub(crate) fn set_graph_is_configured_called(&self) -> bool {
        self.graph_is_configured_called.swap(true, SeqCst)
    }
}

impl std::fmt::Debug for ComponentEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentEntry")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("class", &self.class.name())
            .finish()
    }
}

/// A component instance living in a graph.
#[derive(Clone, Debug)]
pub struct Component {
    pub(crate) inner: Arc<ComponentEntry>,
}

impl Component {
    pub(crate) fn from_inner(inner: Arc<ComponentEntry>) -> Self {
        Component { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn class_kind(&self) -> ComponentClassKind {
        self.inner.kind()
    }

    pub fn class_name(&self) -> &str {
        self.inner.class.name()
    }

    pub fn logging_level(&self) -> LoggingLevel {
        self.inner.logging_level
    }

    pub fn input_port(&self, name: &str) -> Option<InputPort> {
        self.inner
            .port_by_name(PortDirection::Input, name)
            .map(InputPort::from_inner)
    }

    pub fn output_port(&self, name: &str) -> Option<OutputPort> {
        self.inner
            .port_by_name(PortDirection::Output, name)
            .map(OutputPort::from_inner)
    }

    pub fn input_ports(&self) -> Vec<InputPort> {
        self.inner
            .input_ports
            .lock()
            .iter()
            .cloned()
            .map(InputPort::from_inner)
            .collect()
    }

    pub fn output_ports(&self) -> Vec<OutputPort> {
        self.inner
            .output_ports
            .lock()
            .iter()
            .cloned()
            .map(OutputPort::from_inner)
            .collect()
    }

    pub fn ptr_eq(&self, other: &Component) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// What a component may do to itself during `initialize`,
/// `accept_port_connection`, and port-added callbacks.
pub struct SelfComponent<'a> {
    pub(crate) entry: &'a Arc<ComponentEntry>,
    pub(crate) graph: &'a Arc<GraphInner>,
}

impl SelfComponent<'_> {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn kind(&self) -> ComponentClassKind {
        self.entry.kind()
    }

    /// The graph's default interruptor, for polling during long operations.
    pub fn interruptor(&self) -> Interruptor {
        self.graph.default_interruptor()
    }

    pub fn add_input_port(&mut self, name: &str) -> Result<InputPort, Error> {
        self.add_input_port_with_data(name, Value::Null)
    }

    pub fn add_input_port_with_data(
        &mut self,
        name: &str,
        user_data: Value,
    ) -> Result<InputPort, Error> {
        graph::add_component_port(self.graph, self.entry, PortDirection::Input, name, user_data)
            .map(InputPort::from_inner)
    }

    pub fn add_output_port(&mut self, name: &str) -> Result<OutputPort, Error> {
        self.add_output_port_with_data(name, Value::Null)
    }

    pub fn add_output_port_with_data(
        &mut self,
        name: &str,
        user_data: Value,
    ) -> Result<OutputPort, Error> {
        graph::add_component_port(
            self.graph,
            self.entry,
            PortDirection::Output,
            name,
            user_data,
        )
        .map(OutputPort::from_inner)
    }
}

/// Context handed to a source or filter while it builds a message iterator
/// for one of its output ports.
pub struct IteratorInit<'a> {
    pub(crate) entry: &'a Arc<ComponentEntry>,
    pub(crate) graph: &'a Arc<GraphInner>,
    pub(crate) port: OutputPort,
}

impl IteratorInit<'_> {
    /// The output port the new iterator will feed.
    pub fn port(&self) -> &OutputPort {
        &self.port
    }

    pub fn component_name(&self) -> &str {
        &self.entry.name
    }

    pub fn interruptor(&self) -> Interruptor {
        self.graph.default_interruptor()
    }

    /// The graph's pooled message factory; the iterator keeps a clone.
    pub fn message_factory(&self) -> MessageFactory {
        self.graph.message_factory().clone()
    }

    /// Filters: an iterator over the connection on one of this component's
    /// own input ports.
    pub fn create_message_iterator_on_input_port(
        &mut self,
        port: &InputPort,
    ) -> Result<MessageIterator, Error> {
        let owned = port
            .component()
            .map(|c| Arc::ptr_eq(&c.inner, self.entry))
            .unwrap_or(false);
        if !owned {
            return Err(Error::invalid_params(
                "input port does not belong to this component",
            ));
        }
        graph::create_iterator_on_input_port(self.graph, port)
    }

    /// Sources and filters may grow new output ports while a downstream
    /// iterator is being created.
    pub fn add_output_port(&mut self, name: &str) -> Result<OutputPort, Error> {
        graph::add_component_port(
            self.graph,
            self.entry,
            PortDirection::Output,
            name,
            Value::Null,
        )
        .map(OutputPort::from_inner)
    }
}

/// Context handed to a sink's `graph_is_configured` method.
pub struct SinkContext<'a> {
    pub(crate) entry: &'a Arc<ComponentEntry>,
    pub(crate) graph: &'a Arc<GraphInner>,
}

impl SinkContext<'_> {
    pub fn component_name(&self) -> &str {
        &self.entry.name
    }

    pub fn interruptor(&self) -> Interruptor {
        self.graph.default_interruptor()
    }

    pub fn input_port(&self, name: &str) -> Option<InputPort> {
        self.entry
            .port_by_name(PortDirection::Input, name)
            .map(InputPort::from_inner)
    }

    pub fn input_ports(&self) -> Vec<InputPort> {
        self.entry
            .input_ports
            .lock()
            .iter()
            .cloned()
            .map(InputPort::from_inner)
            .collect()
    }

    /// An iterator over the connection on one of this sink's input ports.
    pub fn create_message_iterator_on_input_port(
        &mut self,
        port: &InputPort,
    ) -> Result<MessageIterator, Error> {
        let owned = port
            .component()
            .map(|c| Arc::ptr_eq(&c.inner, self.entry))
            .unwrap_or(false);
        if !owned {
            return Err(Error::invalid_params(
                "input port does not belong to this component",
            ));
        }
        graph::create_iterator_on_input_port(self.graph, port)
    }
}
