use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tracegraph::prelude::*;

/// What a scripted source does on one `next` call. The script ends with an
/// implicit `End`.
#[derive(Clone)]
enum SourceStep {
    Messages(Vec<MsgSpec>),
    Again,
}

#[derive(Clone)]
enum MsgSpec {
    StreamBeginning,
    Event { clock_snapshot: u64 },
    StreamEnd,
}

struct ScriptedSourceClass {
    steps: Vec<SourceStep>,
    with_clock: bool,
}

impl ScriptedSourceClass {
    fn new(steps: Vec<SourceStep>, with_clock: bool) -> Arc<dyn SourceClass> {
        Arc::new(ScriptedSourceClass { steps, with_clock })
    }
}

impl ComponentClass for ScriptedSourceClass {
    fn name(&self) -> &str {
        "scripted"
    }

    fn description(&self) -> &str {
        "Emits a prepared message sequence"
    }
}

impl SourceClass for ScriptedSourceClass {
    fn instantiate(&self) -> Result<Box<dyn Source>, Error> {
        Ok(Box::new(ScriptedSource {
            steps: self.steps.clone(),
            with_clock: self.with_clock,
        }))
    }
}

struct ScriptedSource {
    steps: Vec<SourceStep>,
    with_clock: bool,
}

impl Source for ScriptedSource {
    fn initialize(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        self_component.add_output_port("out")?;
        Ok(())
    }

    fn create_message_iterator(
        &mut self,
        ctx: &mut IteratorInit<'_>,
    ) -> Result<Box<dyn MessageIteratorImpl>, Error> {
        let trace_class = TraceClass::new();
        let stream_class = trace_class.create_stream_class()?;
        if self.with_clock {
            stream_class.set_default_clock_class(ClockClass::new(1_000_000_000)?)?;
        }
        let event_class = stream_class.create_event_class()?;
        let trace = Trace::new(&trace_class);
        let stream = trace.create_stream(&stream_class)?;
        Ok(Box::new(ScriptedIterator {
            factory: ctx.message_factory(),
            stream,
            event_class,
            with_clock: self.with_clock,
            steps: self.steps.clone(),
            index: 0,
        }))
    }
}

struct ScriptedIterator {
    factory: MessageFactory,
    stream: Stream,
    event_class: EventClass,
    with_clock: bool,
    steps: Vec<SourceStep>,
    index: usize,
}

impl MessageIteratorImpl for ScriptedIterator {
    fn next(&mut self, batch: &mut MessageBatch) -> Result<NextStatus, Error> {
        let step = match self.steps.get(self.index) {
            Some(step) => step.clone(),
            None => return Ok(NextStatus::End),
        };
        self.index += 1;
        match step {
            SourceStep::Again => Ok(NextStatus::Again),
            SourceStep::Messages(specs) => {
                let boundary_snapshot = if self.with_clock {
                    ClockSnapshot::Unknown
                } else {
                    ClockSnapshot::Absent
                };
                for spec in specs {
                    let message = match spec {
                        MsgSpec::StreamBeginning => self
                            .factory
                            .stream_beginning(&self.stream, boundary_snapshot)?,
                        MsgSpec::StreamEnd => {
                            self.factory.stream_end(&self.stream, boundary_snapshot)?
                        }
                        MsgSpec::Event { clock_snapshot } => {
                            let clock_snapshot =
                                self.with_clock.then_some(clock_snapshot);
                            self.factory.event(
                                &self.stream,
                                &self.event_class,
                                clock_snapshot,
                                None,
                            )?
                        }
                    };
                    batch.push(message)?;
                }
                Ok(NextStatus::Ok)
            }
        }
    }
}

type RecordedKinds = Arc<Mutex<Vec<MessageKind>>>;
type RecordedSnapshots = Arc<Mutex<Vec<u64>>>;

struct RecordingSinkClass {
    recorded: RecordedKinds,
    consume_log: Option<Arc<Mutex<Vec<String>>>>,
    event_snapshots: Option<RecordedSnapshots>,
}

impl RecordingSinkClass {
    fn new(recorded: RecordedKinds) -> Arc<dyn SinkClass> {
        Arc::new(RecordingSinkClass {
            recorded,
            consume_log: None,
            event_snapshots: None,
        })
    }

    fn with_consume_log(
        recorded: RecordedKinds,
        consume_log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn SinkClass> {
        Arc::new(RecordingSinkClass {
            recorded,
            consume_log: Some(consume_log),
            event_snapshots: None,
        })
    }

    fn with_event_snapshots(
        recorded: RecordedKinds,
        event_snapshots: RecordedSnapshots,
    ) -> Arc<dyn SinkClass> {
        Arc::new(RecordingSinkClass {
            recorded,
            consume_log: None,
            event_snapshots: Some(event_snapshots),
        })
    }
}

impl ComponentClass for RecordingSinkClass {
    fn name(&self) -> &str {
        "recording"
    }
}

impl SinkClass for RecordingSinkClass {
    fn instantiate(&self) -> Result<Box<dyn Sink>, Error> {
        Ok(Box::new(RecordingSink {
            recorded: self.recorded.clone(),
            consume_log: self.consume_log.clone(),
            event_snapshots: self.event_snapshots.clone(),
            name: String::new(),
            iterator: None,
        }))
    }
}

struct RecordingSink {
    recorded: RecordedKinds,
    consume_log: Option<Arc<Mutex<Vec<String>>>>,
    event_snapshots: Option<RecordedSnapshots>,
    name: String,
    iterator: Option<MessageIterator>,
}

impl Sink for RecordingSink {
    fn initialize(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        self.name = self_component.name().to_owned();
        self_component.add_input_port("in")?;
        Ok(())
    }

    fn graph_is_configured(&mut self, ctx: &mut SinkContext<'_>) -> Result<(), Error> {
        let port = ctx.input_port("in").expect("own input port");
        self.iterator = Some(ctx.create_message_iterator_on_input_port(&port)?);
        Ok(())
    }

    fn consume(&mut self) -> Result<ConsumeStatus, Error> {
        if let Some(log) = &self.consume_log {
            log.lock().push(self.name.clone());
        }
        let iterator = self.iterator.as_mut().expect("configured");
        match iterator.next(16)? {
            IteratorNext::Messages(messages) => {
                self.recorded
                    .lock()
                    .extend(messages.iter().map(|m| m.kind()));
                if let Some(snapshots) = &self.event_snapshots {
                    for message in &messages {
                        if message.kind() == MessageKind::Event {
                            if let Some(cs) = message.default_clock_snapshot() {
                                snapshots.lock().push(cs);
                            }
                        }
                    }
                }
                Ok(ConsumeStatus::Ok)
            }
            IteratorNext::Again => Ok(ConsumeStatus::Again),
            IteratorNext::End => Ok(ConsumeStatus::End),
        }
    }
}

fn connect(graph: &Graph, upstream: &Component, downstream: &Component) {
    let out = upstream.output_port("out").expect("source out port");
    let input = downstream.input_port("in").expect("sink in port");
    graph.connect_ports(&out, &input).expect("connect");
}

#[test]
fn trivial_passthrough() {
    let recorded: RecordedKinds = Default::default();
    let graph = Graph::new();
    let source = graph
        .add_source_component(
            ScriptedSourceClass::new(
                vec![SourceStep::Messages(vec![
                    MsgSpec::StreamBeginning,
                    MsgSpec::StreamEnd,
                ])],
                false,
            ),
            "src",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let sink = graph
        .add_sink_component(
            RecordingSinkClass::new(recorded.clone()),
            "sink",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    connect(&graph, &source, &sink);

    assert_eq!(graph.consume().unwrap(), ConsumeStatus::Ok);
    assert_eq!(graph.consume().unwrap(), ConsumeStatus::End);
    assert_eq!(
        *recorded.lock(),
        vec![MessageKind::StreamBeginning, MessageKind::StreamEnd]
    );
}

#[test]
fn trivial_passthrough_via_run() {
    let recorded: RecordedKinds = Default::default();
    let graph = Graph::new();
    let source = graph
        .add_source_component(
            ScriptedSourceClass::new(
                vec![SourceStep::Messages(vec![
                    MsgSpec::StreamBeginning,
                    MsgSpec::StreamEnd,
                ])],
                false,
            ),
            "src",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let sink = graph
        .add_sink_component(
            RecordingSinkClass::new(recorded.clone()),
            "sink",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    connect(&graph, &source, &sink);

    assert_eq!(graph.run().unwrap(), RunStatus::End);
    assert_eq!(recorded.lock().len(), 2);
}

#[test]
fn backpressure_loop_completes_in_five_steps() {
    let recorded: RecordedKinds = Default::default();
    let graph = Graph::new();
    let source = graph
        .add_source_component(
            ScriptedSourceClass::new(
                vec![
                    SourceStep::Again,
                    SourceStep::Again,
                    SourceStep::Again,
                    SourceStep::Messages(vec![MsgSpec::StreamBeginning, MsgSpec::StreamEnd]),
                ],
                false,
            ),
            "src",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let sink = graph
        .add_sink_component(
            RecordingSinkClass::new(recorded.clone()),
            "sink",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    connect(&graph, &source, &sink);

    let mut statuses = Vec::new();
    loop {
        let status = graph.consume().unwrap();
        statuses.push(status);
        if status == ConsumeStatus::End {
            break;
        }
    }
    assert_eq!(
        statuses,
        vec![
            ConsumeStatus::Again,
            ConsumeStatus::Again,
            ConsumeStatus::Again,
            ConsumeStatus::Ok,
            ConsumeStatus::End,
        ]
    );
    assert_eq!(recorded.lock().len(), 2);
}

#[test]
fn trimmer_keeps_only_in_range_events() {
    let recorded: RecordedKinds = Default::default();
    let graph = Graph::new();
    let source = graph
        .add_source_component(
            ScriptedSourceClass::new(
                vec![SourceStep::Messages(vec![
                    MsgSpec::StreamBeginning,
                    MsgSpec::Event {
                        clock_snapshot: 500_000_000,
                    },
                    MsgSpec::Event {
                        clock_snapshot: 1_500_000_000,
                    },
                    MsgSpec::Event {
                        clock_snapshot: 2_500_000_000,
                    },
                    MsgSpec::StreamEnd,
                ])],
                true,
            ),
            "src",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();

    let registry = PluginRegistry::with_default_plugins();
    let mut params = Value::map();
    params.insert("begin".to_owned(), "1.000000000".into());
    params.insert("end".to_owned(), "2.000000000".into());
    let trimmer = graph
        .add_filter_component(
            registry.find_filter_class("utils", "trimmer").unwrap(),
            "stream-intersection-trimmer-out",
            &Value::Map(params),
            LoggingLevel::None,
        )
        .unwrap();
    let sink = graph
        .add_sink_component(
            RecordingSinkClass::new(recorded.clone()),
            "sink",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();

    graph
        .connect_ports(
            &source.output_port("out").unwrap(),
            &trimmer.input_port("in").unwrap(),
        )
        .unwrap();
    graph
        .connect_ports(
            &trimmer.output_port("out").unwrap(),
            &sink.input_port("in").unwrap(),
        )
        .unwrap();

    assert_eq!(graph.run().unwrap(), RunStatus::End);
    // The stream boundaries carry no snapshot, so the bounded trimmer drops
    // them along with the out-of-range events.
    assert_eq!(*recorded.lock(), vec![MessageKind::Event]);
}

#[test]
fn sinks_are_scheduled_round_robin_in_registration_order() {
    let recorded: RecordedKinds = Default::default();
    let consume_log: Arc<Mutex<Vec<String>>> = Default::default();
    let graph = Graph::new();
    let class = ScriptedSourceClass::new(
        vec![SourceStep::Messages(vec![
            MsgSpec::StreamBeginning,
            MsgSpec::StreamEnd,
        ])],
        false,
    );
    let src_a = graph
        .add_source_component(class.clone(), "src-a", &Value::Null, LoggingLevel::None)
        .unwrap();
    let src_b = graph
        .add_source_component(class, "src-b", &Value::Null, LoggingLevel::None)
        .unwrap();
    let sink_a = graph
        .add_sink_component(
            RecordingSinkClass::with_consume_log(recorded.clone(), consume_log.clone()),
            "sink-a",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let sink_b = graph
        .add_sink_component(
            RecordingSinkClass::with_consume_log(recorded.clone(), consume_log.clone()),
            "sink-b",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    connect(&graph, &src_a, &sink_a);
    connect(&graph, &src_b, &sink_b);

    assert_eq!(graph.run().unwrap(), RunStatus::End);
    assert_eq!(
        *consume_log.lock(),
        vec![
            "sink-a".to_owned(),
            "sink-b".to_owned(),
            "sink-a".to_owned(),
            "sink-b".to_owned(),
        ]
    );
}

struct RefusingSinkClass;

impl ComponentClass for RefusingSinkClass {
    fn name(&self) -> &str {
        "refusing"
    }
}

impl SinkClass for RefusingSinkClass {
    fn instantiate(&self) -> Result<Box<dyn Sink>, Error> {
        Ok(Box::new(RefusingSink))
    }
}

struct RefusingSink;

impl Sink for RefusingSink {
    fn initialize(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        self_component.add_input_port("in")?;
        Ok(())
    }

    fn accept_port_connection(
        &mut self,
        _self_component: &mut SelfComponent<'_>,
        _self_port: &InputPort,
        _upstream_port: &OutputPort,
    ) -> Result<(), Error> {
        Err(Error::msg("never connects"))
    }

    fn consume(&mut self) -> Result<ConsumeStatus, Error> {
        Ok(ConsumeStatus::End)
    }
}

#[test]
fn connection_refusal_is_recoverable() {
    let recorded: RecordedKinds = Default::default();
    let graph = Graph::new();
    let source = graph
        .add_source_component(
            ScriptedSourceClass::new(
                vec![SourceStep::Messages(vec![
                    MsgSpec::StreamBeginning,
                    MsgSpec::StreamEnd,
                ])],
                false,
            ),
            "src",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let refusing = graph
        .add_sink_component(
            Arc::new(RefusingSinkClass),
            "refusing",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let accepting = graph
        .add_sink_component(
            RecordingSinkClass::new(recorded.clone()),
            "accepting",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();

    let out = source.output_port("out").unwrap();
    let refused = graph.connect_ports(&out, &refusing.input_port("in").unwrap());
    assert!(matches!(refused, Err(Error::PortConnectionRefused { .. })));
    assert!(!out.is_connected());

    // An alternative downstream still works.
    graph
        .connect_ports(&out, &accepting.input_port("in").unwrap())
        .unwrap();
    assert_eq!(graph.run().unwrap(), RunStatus::End);
    assert_eq!(recorded.lock().len(), 2);
}

struct UnconfigurableSinkClass;

impl ComponentClass for UnconfigurableSinkClass {
    fn name(&self) -> &str {
        "unconfigurable"
    }
}

impl SinkClass for UnconfigurableSinkClass {
    fn instantiate(&self) -> Result<Box<dyn Sink>, Error> {
        Ok(Box::new(UnconfigurableSink))
    }
}

struct UnconfigurableSink;

impl Sink for UnconfigurableSink {
    fn initialize(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        self_component.add_input_port("in")?;
        Ok(())
    }

    fn graph_is_configured(&mut self, _ctx: &mut SinkContext<'_>) -> Result<(), Error> {
        Err(Error::msg("refusing configuration"))
    }

    fn consume(&mut self) -> Result<ConsumeStatus, Error> {
        Ok(ConsumeStatus::End)
    }
}

#[test]
fn refused_configuration_poisons_the_graph() {
    let graph = Graph::new();
    graph
        .add_sink_component(
            Arc::new(UnconfigurableSinkClass),
            "sink",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    assert!(graph.consume().is_err());
    assert_eq!(graph.configuration_state(), ConfigurationState::Faulty);
    assert!(matches!(graph.consume(), Err(Error::GraphFaulty)));
    // A faulty graph accepts no further components.
    assert!(matches!(
        graph.add_sink_component(
            Arc::new(UnconfigurableSinkClass),
            "other",
            &Value::Null,
            LoggingLevel::None
        ),
        Err(Error::GraphFaulty)
    ));
}

#[test]
fn port_added_listeners_fire_synchronously() {
    let recorded: RecordedKinds = Default::default();
    let graph = Graph::new();
    let sink = graph
        .add_sink_component(
            RecordingSinkClass::new(recorded.clone()),
            "sink",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();

    // Wire every appearing source output port straight into the sink.
    let seen: Arc<Mutex<Vec<String>>> = Default::default();
    let listener_seen = seen.clone();
    graph.add_source_output_port_added_listener(move |graph, component, port| {
        listener_seen.lock().push(port.name().to_owned());
        let sink = graph.component("sink").expect("sink exists");
        graph.connect_ports(port, &sink.input_port("in").expect("sink in"))?;
        let _ = component;
        Ok(())
    });

    graph
        .add_source_component(
            ScriptedSourceClass::new(
                vec![SourceStep::Messages(vec![
                    MsgSpec::StreamBeginning,
                    MsgSpec::StreamEnd,
                ])],
                false,
            ),
            "src",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();

    // The source's init-time port addition already fired the listener and
    // made the connection.
    assert_eq!(*seen.lock(), vec!["out".to_owned()]);
    assert!(sink.input_port("in").unwrap().is_connected());
    assert_eq!(graph.run().unwrap(), RunStatus::End);
    assert_eq!(recorded.lock().len(), 2);
}

#[test]
fn output_port_iterator_is_the_only_consumer() {
    let graph = Graph::new();
    let source = graph
        .add_source_component(
            ScriptedSourceClass::new(
                vec![SourceStep::Messages(vec![
                    MsgSpec::StreamBeginning,
                    MsgSpec::StreamEnd,
                ])],
                false,
            ),
            "src",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let out = source.output_port("out").unwrap();
    let mut iterator = graph.output_port_message_iterator(&out).unwrap();

    // The graph's own consuming entry points are now off limits.
    assert!(matches!(graph.consume(), Err(Error::GraphConsumerExists)));
    assert!(matches!(graph.run(), Err(Error::GraphConsumerExists)));

    let mut kinds = Vec::new();
    loop {
        match iterator.next(4).unwrap() {
            IteratorNext::Messages(messages) => {
                kinds.extend(messages.iter().map(|m| m.kind()))
            }
            IteratorNext::Again => continue,
            IteratorNext::End => break,
        }
    }
    assert_eq!(
        kinds,
        vec![MessageKind::StreamBeginning, MessageKind::StreamEnd]
    );
}

#[test]
fn interrupter_cancels_run() {
    let recorded: RecordedKinds = Default::default();
    let graph = Graph::new();
    let source = graph
        .add_source_component(
            ScriptedSourceClass::new(vec![SourceStep::Again; 128], false),
            "src",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let sink = graph
        .add_sink_component(
            RecordingSinkClass::new(recorded),
            "sink",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    connect(&graph, &source, &sink);

    graph.interruptor().set();
    assert!(matches!(graph.run(), Err(Error::Canceled)));
}

#[test]
fn muxer_merges_streams_by_clock_snapshot() {
    let recorded: RecordedKinds = Default::default();
    let snapshots: RecordedSnapshots = Default::default();
    let graph = Graph::new();
    let early = graph
        .add_source_component(
            ScriptedSourceClass::new(
                vec![SourceStep::Messages(vec![
                    MsgSpec::StreamBeginning,
                    MsgSpec::Event { clock_snapshot: 10 },
                    MsgSpec::Event { clock_snapshot: 30 },
                    MsgSpec::StreamEnd,
                ])],
                true,
            ),
            "early",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let late = graph
        .add_source_component(
            ScriptedSourceClass::new(
                vec![SourceStep::Messages(vec![
                    MsgSpec::StreamBeginning,
                    MsgSpec::Event { clock_snapshot: 20 },
                    MsgSpec::Event { clock_snapshot: 40 },
                    MsgSpec::StreamEnd,
                ])],
                true,
            ),
            "late",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();

    let registry = PluginRegistry::with_default_plugins();
    let muxer = graph
        .add_filter_component(
            registry.find_filter_class("utils", "muxer").unwrap(),
            "muxer",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let sink = graph
        .add_sink_component(
            RecordingSinkClass::with_event_snapshots(recorded, snapshots.clone()),
            "sink",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();

    let mux_in0 = muxer.input_port("in0").unwrap();
    graph
        .connect_ports(&early.output_port("out").unwrap(), &mux_in0)
        .unwrap();
    // The muxer grew a fresh input port when in0 was connected.
    let mux_in1 = muxer.input_port("in1").unwrap();
    graph
        .connect_ports(&late.output_port("out").unwrap(), &mux_in1)
        .unwrap();
    graph
        .connect_ports(
            &muxer.output_port("out").unwrap(),
            &sink.input_port("in").unwrap(),
        )
        .unwrap();

    assert_eq!(graph.run().unwrap(), RunStatus::End);
    assert_eq!(*snapshots.lock(), vec![10, 20, 30, 40]);
}

#[test]
fn duplicate_component_names_are_rejected() {
    let graph = Graph::new();
    let class = ScriptedSourceClass::new(vec![], false);
    graph
        .add_source_component(class.clone(), "src", &Value::Null, LoggingLevel::None)
        .unwrap();
    assert!(matches!(
        graph.add_source_component(class, "src", &Value::Null, LoggingLevel::None),
        Err(Error::DuplicateComponentName(_))
    ));
}

#[test]
fn connecting_connected_ports_fails() {
    let recorded: RecordedKinds = Default::default();
    let graph = Graph::new();
    let source = graph
        .add_source_component(
            ScriptedSourceClass::new(vec![], false),
            "src",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let sink_a = graph
        .add_sink_component(
            RecordingSinkClass::new(recorded.clone()),
            "sink-a",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    let sink_b = graph
        .add_sink_component(
            RecordingSinkClass::new(recorded),
            "sink-b",
            &Value::Null,
            LoggingLevel::None,
        )
        .unwrap();
    connect(&graph, &source, &sink_a);
    let out = source.output_port("out").unwrap();
    assert!(matches!(
        graph.connect_ports(&out, &sink_b.input_port("in").unwrap()),
        Err(Error::PortConnected(_))
    ));
}
