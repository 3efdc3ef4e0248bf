use crate::component::{
    Component, ComponentClassRef, ComponentEntry, ComponentLogic, ConsumeStatus, FilterClass,
    IteratorInit, SelfComponent, SinkClass, SinkContext, SourceClass,
};
use crate::connection::{Connection, ConnectionInner};
use crate::error::{Actor, Error};
use crate::iterator::MessageIterator;
use crate::message::MessageFactory;
use crate::port::{InputPort, OutputPort, PortDirection, PortInner};
use crate::types::{Interruptor, LoggingLevel};
use crate::value::Value;
use crate::{append_cause, colander};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Pool bound for each hot message kind.
const MESSAGE_POOL_CAPACITY: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConfigurationState {
    Configuring,
    PartiallyConfigured,
    Configured,
    /// Absorbing: a sink failed and the graph is permanently unusable.
    Faulty,
}

/// What `run` reports to its caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// Every sink has returned `End`.
    End,
    /// A sink could not make progress; retry `run` later.
    Again,
}

pub type SourcePortAddedListener =
    Arc<dyn Fn(&Graph, &Component, &OutputPort) -> Result<(), Error> + Send + Sync>;
pub type FilterOutputPortAddedListener =
    Arc<dyn Fn(&Graph, &Component, &OutputPort) -> Result<(), Error> + Send + Sync>;
pub type FilterInputPortAddedListener =
    Arc<dyn Fn(&Graph, &Component, &InputPort) -> Result<(), Error> + Send + Sync>;
pub type SinkPortAddedListener =
    Arc<dyn Fn(&Graph, &Component, &InputPort) -> Result<(), Error> + Send + Sync>;

#[derive(Default)]
struct Listeners {
    source_output_port_added: Vec<SourcePortAddedListener>,
    filter_output_port_added: Vec<FilterOutputPortAddedListener>,
    filter_input_port_added: Vec<FilterInputPortAddedListener>,
    sink_input_port_added: Vec<SinkPortAddedListener>,
}

pub(crate) struct GraphInner {
    components: Mutex<Vec<Arc<ComponentEntry>>>,
    connections: Mutex<Vec<Arc<ConnectionInner>>>,
    /// FIFO of sinks still producing work, in registration order.
    sinks_to_consume: Mutex<VecDeque<Weak<ComponentEntry>>>,
    config_state: Mutex<ConfigurationState>,
    /// Cleared when an output-port message iterator becomes the graph's
    /// one consumer.
    can_consume: AtomicBool,
    default_interruptor: Interruptor,
    interruptors: Mutex<Vec<Interruptor>>,
    listeners: Mutex<Listeners>,
    message_factory: MessageFactory,
}

impl GraphInner {
    pub(crate) fn default_interruptor(&self) -> Interruptor {
        self.default_interruptor.clone()
    }

    pub(crate) fn message_factory(&self) -> &MessageFactory {
        &self.message_factory
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.default_interruptor.is_set()
            || self.interruptors.lock().iter().any(|i| i.is_set())
    }
}

impl Drop for GraphInner {
    fn drop(&mut self) {
        // Finalize every component; their iterators finalize when the
        // component logic (and anything it owns) is dropped.
        for entry in self.components.lock().iter() {
            match &mut *entry.logic.lock() {
                ComponentLogic::Source(logic) => logic.finalize(),
                ComponentLogic::Filter(logic) => logic.finalize(),
                ComponentLogic::Sink(logic) => logic.finalize(),
            }
        }
    }
}

/// A directed graph of components driving trace messages from sources
/// through filters into sinks, single-threaded and cooperatively scheduled.
#[derive(Clone)]
pub struct Graph {
    pub(crate) inner: Arc<GraphInner>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            inner: Arc::new(GraphInner {
                components: Mutex::new(Vec::new()),
                connections: Mutex::new(Vec::new()),
                sinks_to_consume: Mutex::new(VecDeque::new()),
                config_state: Mutex::new(ConfigurationState::Configuring),
                can_consume: AtomicBool::new(true),
                default_interruptor: Interruptor::new(),
                interruptors: Mutex::new(Vec::new()),
                listeners: Mutex::new(Listeners::default()),
                message_factory: MessageFactory::new(MESSAGE_POOL_CAPACITY),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<GraphInner>) -> Self {
        Graph { inner }
    }

    pub fn configuration_state(&self) -> ConfigurationState {
        *self.inner.config_state.lock()
    }

    /// The graph's own interruptor; setting it cancels `run`/`consume`.
    pub fn interruptor(&self) -> Interruptor {
        self.inner.default_interruptor()
    }

    pub fn add_interruptor(&self, interruptor: Interruptor) {
        self.inner.interruptors.lock().push(interruptor);
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.is_interrupted()
    }

    pub fn components(&self) -> Vec<Component> {
        self.inner
            .components
            .lock()
            .iter()
            .cloned()
            .map(Component::from_inner)
            .collect()
    }

    pub fn component(&self, name: &str) -> Option<Component> {
        self.inner
            .components
            .lock()
            .iter()
            .find(|entry| entry.name == name)
            .cloned()
            .map(Component::from_inner)
    }

    pub fn add_source_component(
        &self,
        class: Arc<dyn SourceClass>,
        name: impl Into<String>,
        params: &Value,
        logging_level: LoggingLevel,
    ) -> Result<Component, Error> {
        let logic = ComponentLogic::Source(class.instantiate()?);
        self.add_component(ComponentClassRef::Source(class), logic, name.into(), params, logging_level)
    }

    pub fn add_filter_component(
        &self,
        class: Arc<dyn FilterClass>,
        name: impl Into<String>,
        params: &Value,
        logging_level: LoggingLevel,
    ) -> Result<Component, Error> {
        let logic = ComponentLogic::Filter(class.instantiate()?);
        self.add_component(ComponentClassRef::Filter(class), logic, name.into(), params, logging_level)
    }

    pub fn add_sink_component(
        &self,
        class: Arc<dyn SinkClass>,
        name: impl Into<String>,
        params: &Value,
        logging_level: LoggingLevel,
    ) -> Result<Component, Error> {
        let logic = ComponentLogic::Sink(class.instantiate()?);
        self.add_component(ComponentClassRef::Sink(class), logic, name.into(), params, logging_level)
    }

    fn add_component(
        &self,
        class: ComponentClassRef,
        logic: ComponentLogic,
        name: String,
        params: &Value,
        logging_level: LoggingLevel,
    ) -> Result<Component, Error> {
        self.check_configuring()?;
        if self.component(&name).is_some() {
            return Err(Error::DuplicateComponentName(name));
        }
        let kind = class.kind();
        let class_display = format!("{kind}.{}", class.name());
        let entry = Arc::new(ComponentEntry {
            name,
            class,
            logging_level,
            graph: Arc::downgrade(&self.inner),
            input_ports: Mutex::new(Vec::new()),
            output_ports: Mutex::new(Vec::new()),
            logic: Mutex::new(logic),
            graph_is_configured_called: AtomicBool::new(false),
        });
        self.inner.components.lock().push(entry.clone());
        if kind == crate::component::ComponentClassKind::Sink {
            self.inner
                .sinks_to_consume
                .lock()
                .push_back(Arc::downgrade(&entry));
        }

        debug!(component = %entry.name, class = %class_display, "Initializing component");
        let init_result = {
            let mut logic = entry.logic.lock();
            let mut ctx = SelfComponent {
                entry: &entry,
                graph: &self.inner,
            };
            match &mut *logic {
                ComponentLogic::Source(logic) => logic.initialize(&mut ctx, params),
                ComponentLogic::Filter(logic) => logic.initialize(&mut ctx, params),
                ComponentLogic::Sink(logic) => logic.initialize(&mut ctx, params),
            }
        };
        if let Err(e) = init_result {
            append_cause!(
                Actor::Component {
                    name: entry.name.clone(),
                    class: class_display,
                },
                "component initialization failed"
            );
            self.remove_component(&entry);
            return Err(e);
        }
        Ok(Component::from_inner(entry))
    }

    /// Undoes a failed component addition, including any connections its
    /// ports picked up from listeners during `initialize`.
    fn remove_component(&self, entry: &Arc<ComponentEntry>) {
        let ports: Vec<Arc<PortInner>> = entry
            .input_ports
            .lock()
            .iter()
            .chain(entry.output_ports.lock().iter())
            .cloned()
            .collect();
        for port in ports {
            if let Some(conn) = port.connection() {
                self.remove_connection(&conn.inner);
            }
        }
        self.inner
            .components
            .lock()
            .retain(|e| !Arc::ptr_eq(e, entry));
        self.inner
            .sinks_to_consume
            .lock()
            .retain(|weak| weak.upgrade().map(|e| !Arc::ptr_eq(&e, entry)).unwrap_or(false));
    }

    fn remove_connection(&self, conn: &Arc<ConnectionInner>) {
        for endpoint in [&conn.upstream, &conn.downstream] {
            if let Some(port) = endpoint.upgrade() {
                *port.connection.lock() = None;
            }
        }
        self.inner
            .connections
            .lock()
            .retain(|c| !Arc::ptr_eq(c, conn));
    }

    /// Connects an output port to an input port.
    ///
    /// Both ports must be unconnected and belong to this graph's
    /// components; the downstream component may refuse.
    pub fn connect_ports(
        &self,
        upstream: &OutputPort,
        downstream: &InputPort,
    ) -> Result<Connection, Error> {
        self.check_configuring()?;
        let upstream_comp = upstream
            .component()
            .ok_or_else(|| Error::msg("upstream port has no component"))?;
        let downstream_comp = downstream
            .component()
            .ok_or_else(|| Error::msg("downstream port has no component"))?;
        for comp in [&upstream_comp, &downstream_comp] {
            let in_graph = comp
                .inner
                .graph
                .upgrade()
                .map(|g| Arc::ptr_eq(&g, &self.inner))
                .unwrap_or(false);
            if !in_graph {
                return Err(Error::invalid_params(format!(
                    "component `{}` does not belong to this graph",
                    comp.name()
                )));
            }
        }
        if upstream_comp.ptr_eq(&downstream_comp) {
            return Err(Error::invalid_params(
                "cannot connect a component to itself",
            ));
        }
        if upstream.is_connected() {
            return Err(Error::PortConnected(upstream.name().to_owned()));
        }
        if downstream.is_connected() {
            return Err(Error::PortConnected(downstream.name().to_owned()));
        }

        // The downstream component gets a veto.
        let accept = {
            let mut logic = downstream_comp.inner.logic.lock();
            let mut ctx = SelfComponent {
                entry: &downstream_comp.inner,
                graph: &self.inner,
            };
            match &mut *logic {
                ComponentLogic::Filter(logic) => {
                    logic.accept_port_connection(&mut ctx, downstream, upstream)
                }
                ComponentLogic::Sink(logic) => {
                    logic.accept_port_connection(&mut ctx, downstream, upstream)
                }
                ComponentLogic::Source(_) => Err(Error::invalid_params(
                    "source components have no input ports",
                )),
            }
        };
        if let Err(e) = accept {
            append_cause!(
                Actor::Component {
                    name: downstream_comp.name().to_owned(),
                    class: downstream_comp.class_name().to_owned(),
                },
                "downstream component refused the connection: {e}"
            );
            return Err(Error::PortConnectionRefused {
                component: downstream_comp.name().to_owned(),
                port: downstream.name().to_owned(),
            });
        }

        let conn = Arc::new(ConnectionInner {
            upstream: Arc::downgrade(&upstream.inner),
            downstream: Arc::downgrade(&downstream.inner),
        });
        *upstream.inner.connection.lock() = Some(Arc::downgrade(&conn));
        *downstream.inner.connection.lock() = Some(Arc::downgrade(&conn));
        self.inner.connections.lock().push(conn.clone());
        debug!(
            upstream = %format!("{}.{}", upstream_comp.name(), upstream.name()),
            downstream = %format!("{}.{}", downstream_comp.name(), downstream.name()),
            "Connected ports"
        );
        Ok(Connection::from_inner(conn))
    }

    pub fn add_source_output_port_added_listener(
        &self,
        listener: impl Fn(&Graph, &Component, &OutputPort) -> Result<(), Error>
            + Send
            + Sync
            + 'static,
    ) {
        self.inner
            .listeners
            .lock()
            .source_output_port_added
            .push(Arc::new(listener));
    }

    pub fn add_filter_output_port_added_listener(
        &self,
        listener: impl Fn(&Graph, &Component, &OutputPort) -> Result<(), Error>
            + Send
            + Sync
            + 'static,
    ) {
        self.inner
            .listeners
            .lock()
            .filter_output_port_added
            .push(Arc::new(listener));
    }

    pub fn add_filter_input_port_added_listener(
        &self,
        listener: impl Fn(&Graph, &Component, &InputPort) -> Result<(), Error>
            + Send
            + Sync
            + 'static,
    ) {
        self.inner
            .listeners
            .lock()
            .filter_input_port_added
            .push(Arc::new(listener));
    }

    pub fn add_sink_input_port_added_listener(
        &self,
        listener: impl Fn(&Graph, &Component, &InputPort) -> Result<(), Error>
            + Send
            + Sync
            + 'static,
    ) {
        self.inner
            .listeners
            .lock()
            .sink_input_port_added
            .push(Arc::new(listener));
    }

    /// Components and connections may appear while configuring, including
    /// the window where sinks create their iterators and upstreams grow
    /// ports (the trimmer-insertion path).
    fn check_configuring(&self) -> Result<(), Error> {
        match *self.inner.config_state.lock() {
            ConfigurationState::Configuring | ConfigurationState::PartiallyConfigured => Ok(()),
            ConfigurationState::Faulty => Err(Error::GraphFaulty),
            ConfigurationState::Configured => Err(Error::GraphNotConfiguring),
        }
    }

    /// Calls each sink's `graph_is_configured` exactly once; any failure
    /// leaves the graph permanently faulty.
    fn configure(&self) -> Result<(), Error> {
        {
            let state = *self.inner.config_state.lock();
            match state {
                ConfigurationState::Configured => return Ok(()),
                ConfigurationState::Faulty => return Err(Error::GraphFaulty),
                _ => {}
            }
        }
        if self.inner.sinks_to_consume.lock().is_empty() {
            return Err(Error::GraphNoSink);
        }
        *self.inner.config_state.lock() = ConfigurationState::PartiallyConfigured;

        let entries: Vec<Arc<ComponentEntry>> = self.inner.components.lock().clone();
        for entry in entries {
            if entry.kind() != crate::component::ComponentClassKind::Sink {
                continue;
            }
            if entry.set_graph_is_configured_called() {
                continue;
            }
            debug!(component = %entry.name, "Calling sink's graph-is-configured method");
            let result = {
                let mut logic = entry.logic.lock();
                let mut ctx = SinkContext {
                    entry: &entry,
                    graph: &self.inner,
                };
                match &mut *logic {
                    ComponentLogic::Sink(logic) => logic.graph_is_configured(&mut ctx),
                    _ => Ok(()),
                }
            };
            if let Err(e) = result {
                append_cause!(
                    Actor::Component {
                        name: entry.name.clone(),
                        class: entry.class.name().to_owned(),
                    },
                    "sink refused graph configuration"
                );
                *self.inner.config_state.lock() = ConfigurationState::Faulty;
                return Err(e);
            }
        }
        *self.inner.config_state.lock() = ConfigurationState::Configured;
        Ok(())
    }

    /// One scheduling step: pop the head sink, consume it, requeue or drop.
    pub fn consume(&self) -> Result<ConsumeStatus, Error> {
        if !self.inner.can_consume.load(SeqCst) {
            return Err(Error::GraphConsumerExists);
        }
        if self.is_interrupted() {
            append_cause!(Actor::Unknown("graph"), "graph consumption interrupted");
            return Err(Error::Canceled);
        }
        self.consume_no_check()
    }

    pub(crate) fn consume_no_check(&self) -> Result<ConsumeStatus, Error> {
        if *self.inner.config_state.lock() == ConfigurationState::Faulty {
            return Err(Error::GraphFaulty);
        }
        self.configure().map_err(|e| {
            if !matches!(e, Error::GraphNoSink) {
                *self.inner.config_state.lock() = ConfigurationState::Faulty;
            }
            e
        })?;

        loop {
            let sink = match self.inner.sinks_to_consume.lock().pop_front() {
                Some(weak) => weak,
                None => return Ok(ConsumeStatus::End),
            };
            let entry = match sink.upgrade() {
                Some(entry) => entry,
                None => continue,
            };
            debug!(component = %entry.name, "Consuming sink");
            let status = {
                let mut logic = entry.logic.lock();
                match &mut *logic {
                    ComponentLogic::Sink(logic) => logic.consume(),
                    _ => Err(Error::msg("scheduled component is not a sink")),
                }
            };
            return match status {
                Ok(ConsumeStatus::Ok) => {
                    self.inner.sinks_to_consume.lock().push_back(sink);
                    Ok(ConsumeStatus::Ok)
                }
                Ok(ConsumeStatus::Again) => {
                    self.inner.sinks_to_consume.lock().push_back(sink);
                    Ok(ConsumeStatus::Again)
                }
                Ok(ConsumeStatus::End) => {
                    debug!(component = %entry.name, "Sink is done");
                    if self.inner.sinks_to_consume.lock().is_empty() {
                        Ok(ConsumeStatus::End)
                    } else {
                        Ok(ConsumeStatus::Ok)
                    }
                }
                Err(e) => {
                    append_cause!(
                        Actor::Component {
                            name: entry.name.clone(),
                            class: entry.class.name().to_owned(),
                        },
                        "sink consume failed"
                    );
                    *self.inner.config_state.lock() = ConfigurationState::Faulty;
                    Err(e)
                }
            };
        }
    }

    /// Drives sinks round-robin until they all end, a sink reports `Again`,
    /// an interrupter trips, or a sink fails.
    pub fn run(&self) -> Result<RunStatus, Error> {
        if !self.inner.can_consume.load(SeqCst) {
            return Err(Error::GraphConsumerExists);
        }
        loop {
            if self.is_interrupted() {
                append_cause!(Actor::Unknown("graph"), "graph run interrupted");
                return Err(Error::Canceled);
            }
            match self.consume_no_check()? {
                ConsumeStatus::Ok => continue,
                ConsumeStatus::Again => return Ok(RunStatus::Again),
                ConsumeStatus::End => return Ok(RunStatus::End),
            }
        }
    }

    /// Attaches an externally-driven iterator to an output port, making it
    /// the graph's one and only consumer.
    pub fn output_port_message_iterator(
        &self,
        port: &OutputPort,
    ) -> Result<colander::OutputPortMessageIterator, Error> {
        if !self.inner.can_consume.load(SeqCst) {
            return Err(Error::GraphConsumerExists);
        }
        let iterator = colander::attach(self, port)?;
        self.inner.can_consume.store(false, SeqCst);
        Ok(iterator)
    }
}

/// Adds a port to a component and synchronously fires the graph's matching
/// port-added listeners.
pub(crate) fn add_component_port(
    graph: &Arc<GraphInner>,
    entry: &Arc<ComponentEntry>,
    direction: PortDirection,
    name: &str,
    user_data: Value,
) -> Result<Arc<PortInner>, Error> {
    use crate::component::ComponentClassKind::*;
    match (entry.kind(), direction) {
        (Source, PortDirection::Input) => {
            return Err(Error::invalid_params(
                "source components cannot have input ports",
            ))
        }
        (Sink, PortDirection::Output) => {
            return Err(Error::invalid_params(
                "sink components cannot have output ports",
            ))
        }
        _ => {}
    }
    if entry.port_by_name(direction, name).is_some() {
        return Err(Error::invalid_params(format!(
            "component `{}` already has a port named `{name}`",
            entry.name
        )));
    }
    let port = PortInner::new(
        name.to_owned(),
        direction,
        Arc::downgrade(entry),
        user_data,
    );
    match direction {
        PortDirection::Input => entry.input_ports.lock().push(port.clone()),
        PortDirection::Output => entry.output_ports.lock().push(port.clone()),
    }
    debug!(component = %entry.name, port = %name, ?direction, "Added port");

    let graph_handle = Graph::from_inner(graph.clone());
    let component = Component::from_inner(entry.clone());
    match (entry.kind(), direction) {
        (Source, PortDirection::Output) => {
            let listeners = graph.listeners.lock().source_output_port_added.clone();
            let handle = OutputPort::from_inner(port.clone());
            for listener in listeners {
                listener(&graph_handle, &component, &handle)?;
            }
        }
        (Filter, PortDirection::Output) => {
            let listeners = graph.listeners.lock().filter_output_port_added.clone();
            let handle = OutputPort::from_inner(port.clone());
            for listener in listeners {
                listener(&graph_handle, &component, &handle)?;
            }
        }
        (Filter, PortDirection::Input) => {
            let listeners = graph.listeners.lock().filter_input_port_added.clone();
            let handle = InputPort::from_inner(port.clone());
            for listener in listeners {
                listener(&graph_handle, &component, &handle)?;
            }
        }
        (Sink, PortDirection::Input) => {
            let listeners = graph.listeners.lock().sink_input_port_added.clone();
            let handle = InputPort::from_inner(port.clone());
            for listener in listeners {
                listener(&graph_handle, &component, &handle)?;
            }
        }
        _ => {}
    }
    Ok(port)
}

/// Builds an engine iterator over the connection on `port`, asking the
/// upstream component for its user iterator.
pub(crate) fn create_iterator_on_input_port(
    graph: &Arc<GraphInner>,
    port: &InputPort,
) -> Result<MessageIterator, Error> {
    let conn = port
        .connection()
        .ok_or_else(|| Error::PortNotConnected(port.name().to_owned()))?;
    let upstream_port = conn
        .upstream_port()
        .ok_or_else(|| Error::msg("upstream endpoint is gone"))?;
    let upstream = upstream_port
        .component()
        .ok_or_else(|| Error::msg("upstream component is gone"))?;

    let user = {
        let mut logic = upstream.inner.logic.lock();
        let mut ctx = IteratorInit {
            entry: &upstream.inner,
            graph,
            port: upstream_port.clone(),
        };
        let result = match &mut *logic {
            ComponentLogic::Source(logic) => logic.create_message_iterator(&mut ctx),
            ComponentLogic::Filter(logic) => logic.create_message_iterator(&mut ctx),
            ComponentLogic::Sink(_) => Err(Error::invalid_params(
                "sink components cannot produce message iterators",
            )),
        };
        match result {
            Ok(user) => user,
            Err(e) => {
                append_cause!(
                    Actor::Component {
                        name: upstream.name().to_owned(),
                        class: upstream.class_name().to_owned(),
                    },
                    "message iterator creation failed on port `{}`",
                    upstream_port.name()
                );
                warn!(
                    component = %upstream.name(),
                    port = %upstream_port.name(),
                    "Message iterator creation failed"
                );
                return Err(e);
            }
        }
    };
    Ok(MessageIterator::new(
        user,
        upstream.name().to_owned(),
        upstream_port.name().to_owned(),
    ))
}
