use super::clock::ClockClass;
use super::event::EventClass;
use super::field::{validate_field_paths, Field, FieldClass, ScopeRoots};
use super::trace::{Trace, TraceClass, TraceClassInner};
use super::FreezeFlag;
use crate::error::Error;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Describes a class of streams within a trace class: which messages its
/// streams may carry and how they are timestamped.
#[derive(Clone, Debug)]
pub struct StreamClass {
    pub(crate) inner: Arc<StreamClassInner>,
}

#[derive(Debug)]
pub(crate) struct StreamClassInner {
    id: u64,
    parent: Weak<TraceClassInner>,
    frozen: FreezeFlag,
    state: Mutex<State>,
    event_classes: Mutex<Vec<EventClass>>,
}

#[derive(Debug)]
struct State {
    name: Option<String>,
    assigns_automatic_event_class_id: bool,
    assigns_automatic_stream_id: bool,
    supports_packets: bool,
    packets_have_beginning_default_clock_snapshot: bool,
    packets_have_end_default_clock_snapshot: bool,
    supports_discarded_events: bool,
    discarded_events_have_default_clock_snapshots: bool,
    supports_discarded_packets: bool,
    discarded_packets_have_default_clock_snapshots: bool,
    packet_context_field_class: Option<FieldClass>,
    event_common_context_field_class: Option<FieldClass>,
    default_clock_class: Option<ClockClass>,
    next_automatic_event_class_id: u64,
}

impl Default for State {
    fn default() -> Self {
        State {
            name: None,
            assigns_automatic_event_class_id: true,
            assigns_automatic_stream_id: true,
            supports_packets: false,
            packets_have_beginning_default_clock_snapshot: false,
            packets_have_end_default_clock_snapshot: false,
            supports_discarded_events: false,
            discarded_events_have_default_clock_snapshots: false,
            supports_discarded_packets: false,
            discarded_packets_have_default_clock_snapshots: false,
            packet_context_field_class: None,
            event_common_context_field_class: None,
            default_clock_class: None,
            next_automatic_event_class_id: 0,
        }
    }
}

impl StreamClass {
    pub(crate) fn new(id: u64, parent: Weak<TraceClassInner>) -> Self {
        StreamClass {
            inner: Arc::new(StreamClassInner {
                id,
                parent,
                frozen: FreezeFlag::default(),
                state: Mutex::new(State::default()),
                event_classes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<StreamClassInner>) -> Self {
        StreamClass { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The owning trace class; `None` once it has been destroyed.
    pub fn trace_class(&self) -> Option<TraceClass> {
        self.inner.parent.upgrade().map(TraceClass::from_inner)
    }

    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream class")?;
        self.inner.state.lock().name = Some(name.into());
        Ok(())
    }

    pub fn assigns_automatic_event_class_id(&self) -> bool {
        self.inner.state.lock().assigns_automatic_event_class_id
    }

    pub fn set_assigns_automatic_event_class_id(&self, assigns: bool) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream class")?;
        self.inner.state.lock().assigns_automatic_event_class_id = assigns;
        Ok(())
    }

    pub fn assigns_automatic_stream_id(&self) -> bool {
        self.inner.state.lock().assigns_automatic_stream_id
    }

    pub fn set_assigns_automatic_stream_id(&self, assigns: bool) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream class")?;
        self.inner.state.lock().assigns_automatic_stream_id = assigns;
        Ok(())
    }

    pub fn supports_packets(&self) -> bool {
        self.inner.state.lock().supports_packets
    }

    pub fn packets_have_beginning_default_clock_snapshot(&self) -> bool {
        self.inner
            .state
            .lock()
            .packets_have_beginning_default_clock_snapshot
    }

    pub fn packets_have_end_default_clock_snapshot(&self) -> bool {
        self.inner
            .state
            .lock()
            .packets_have_end_default_clock_snapshot
    }

    pub fn set_supports_packets(
        &self,
        supports: bool,
        with_beginning_default_clock_snapshot: bool,
        with_end_default_clock_snapshot: bool,
    ) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream class")?;
        if !supports && (with_beginning_default_clock_snapshot || with_end_default_clock_snapshot)
        {
            return Err(Error::invalid_params(
                "packet clock snapshot flags require packet support",
            ));
        }
        let mut state = self.inner.state.lock();
        state.supports_packets = supports;
        state.packets_have_beginning_default_clock_snapshot =
            with_beginning_default_clock_snapshot;
        state.packets_have_end_default_clock_snapshot = with_end_default_clock_snapshot;
        Ok(())
    }

    pub fn supports_discarded_events(&self) -> bool {
        self.inner.state.lock().supports_discarded_events
    }

    pub fn discarded_events_have_default_clock_snapshots(&self) -> bool {
        self.inner
            .state
            .lock()
            .discarded_events_have_default_clock_snapshots
    }

    pub fn set_supports_discarded_events(
        &self,
        supports: bool,
        with_default_clock_snapshots: bool,
    ) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream class")?;
        if !supports && with_default_clock_snapshots {
            return Err(Error::invalid_params(
                "discarded events clock snapshot flag requires discarded events support",
            ));
        }
        let mut state = self.inner.state.lock();
        state.supports_discarded_events = supports;
        state.discarded_events_have_default_clock_snapshots = with_default_clock_snapshots;
        Ok(())
    }

    pub fn supports_discarded_packets(&self) -> bool {
        self.inner.state.lock().supports_discarded_packets
    }

    pub fn discarded_packets_have_default_clock_snapshots(&self) -> bool {
        self.inner
            .state
            .lock()
            .discarded_packets_have_default_clock_snapshots
    }

    pub fn set_supports_discarded_packets(
        &self,
        supports: bool,
        with_default_clock_snapshots: bool,
    ) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream class")?;
        if !supports && with_default_clock_snapshots {
            return Err(Error::invalid_params(
                "discarded packets clock snapshot flag requires discarded packets support",
            ));
        }
        if supports && !self.inner.state.lock().supports_packets {
            return Err(Error::invalid_params(
                "discarded packets support requires packet support",
            ));
        }
        let mut state = self.inner.state.lock();
        state.supports_discarded_packets = supports;
        state.discarded_packets_have_default_clock_snapshots = with_default_clock_snapshots;
        Ok(())
    }

    pub fn packet_context_field_class(&self) -> Option<FieldClass> {
        self.inner.state.lock().packet_context_field_class.clone()
    }

    pub fn set_packet_context_field_class(&self, field_class: FieldClass) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream class")?;
        if !self.supports_packets() {
            return Err(Error::invalid_params(
                "packet context requires packet support",
            ));
        }
        let event_common_context = self.event_common_context_field_class();
        validate_field_paths(&ScopeRoots {
            packet_context: Some(&field_class),
            event_common_context: event_common_context.as_ref(),
            ..Default::default()
        })?;
        self.inner.state.lock().packet_context_field_class = Some(field_class);
        Ok(())
    }

    pub fn event_common_context_field_class(&self) -> Option<FieldClass> {
        self.inner
            .state
            .lock()
            .event_common_context_field_class
            .clone()
    }

    pub fn set_event_common_context_field_class(
        &self,
        field_class: FieldClass,
    ) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream class")?;
        let packet_context = self.packet_context_field_class();
        validate_field_paths(&ScopeRoots {
            packet_context: packet_context.as_ref(),
            event_common_context: Some(&field_class),
            ..Default::default()
        })?;
        self.inner.state.lock().event_common_context_field_class = Some(field_class);
        Ok(())
    }

    pub fn default_clock_class(&self) -> Option<ClockClass> {
        self.inner.state.lock().default_clock_class.clone()
    }

    /// Attaching a default clock class freezes it.
    pub fn set_default_clock_class(&self, clock_class: ClockClass) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream class")?;
        clock_class.freeze();
        self.inner.state.lock().default_clock_class = Some(clock_class);
        Ok(())
    }

    /// A new event class with an automatically assigned id.
    pub fn create_event_class(&self) -> Result<EventClass, Error> {
        self.inner.frozen.check_mutable("stream class")?;
        if !self.assigns_automatic_event_class_id() {
            return Err(Error::invalid_params(
                "stream class assigns event class ids manually",
            ));
        }
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_automatic_event_class_id;
            state.next_automatic_event_class_id += 1;
            id
        };
        let event_class = EventClass::new(id, Arc::downgrade(&self.inner));
        self.inner.event_classes.lock().push(event_class.clone());
        Ok(event_class)
    }

    /// A new event class with a caller-chosen id, unique in this class.
    pub fn create_event_class_with_id(&self, id: u64) -> Result<EventClass, Error> {
        self.inner.frozen.check_mutable("stream class")?;
        if self.assigns_automatic_event_class_id() {
            return Err(Error::invalid_params(
                "stream class assigns event class ids automatically",
            ));
        }
        if self.event_class_by_id(id).is_some() {
            return Err(Error::invalid_params(format!(
                "event class id {id} is already used"
            )));
        }
        let event_class = EventClass::new(id, Arc::downgrade(&self.inner));
        self.inner.event_classes.lock().push(event_class.clone());
        Ok(event_class)
    }

    pub fn event_classes(&self) -> Vec<EventClass> {
        self.inner.event_classes.lock().clone()
    }

    pub fn event_class_by_id(&self, id: u64) -> Option<EventClass> {
        self.inner
            .event_classes
            .lock()
            .iter()
            .find(|ec| ec.id() == id)
            .cloned()
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.is_frozen()
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.freeze();
        if let Some(clock_class) = self.default_clock_class() {
            clock_class.freeze();
        }
        for event_class in self.inner.event_classes.lock().iter() {
            event_class.freeze();
        }
    }

    pub(crate) fn ptr_eq(&self, other: &StreamClass) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// An instance of a stream class within a specific trace.
///
/// Holding a stream keeps its trace, trace class, and stream class alive.
#[derive(Clone, Debug)]
pub struct Stream {
    pub(crate) inner: Arc<StreamInner>,
}

#[derive(Debug)]
pub(crate) struct StreamInner {
    id: u64,
    class: StreamClass,
    trace: Trace,
    frozen: FreezeFlag,
    state: Mutex<StreamState>,
}

#[derive(Debug, Default)]
struct StreamState {
    name: Option<String>,
}

impl Stream {
    pub(crate) fn new(id: u64, class: StreamClass, trace: Trace) -> Self {
        Stream {
            inner: Arc::new(StreamInner {
                id,
                class,
                trace,
                frozen: FreezeFlag::default(),
                state: Mutex::new(StreamState::default()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn class(&self) -> &StreamClass {
        &self.inner.class
    }

    pub fn trace(&self) -> &Trace {
        &self.inner.trace
    }

    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<(), Error> {
        self.inner.frozen.check_mutable("stream")?;
        self.inner.state.lock().name = Some(name.into());
        Ok(())
    }

    /// A new packet on this stream; the class must support packets.
    pub fn create_packet(&self, context: Option<Field>) -> Result<Packet, Error> {
        if !self.class().supports_packets() {
            return Err(Error::invalid_params(
                "stream class does not support packets",
            ));
        }
        Ok(Packet {
            inner: Arc::new(PacketInner {
                stream: self.clone(),
                context,
            }),
        })
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.freeze();
    }

    pub fn ptr_eq(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// A packet within a stream supporting packets.
#[derive(Clone, Debug)]
pub struct Packet {
    inner: Arc<PacketInner>,
}

#[derive(Debug)]
struct PacketInner {
    stream: Stream,
    context: Option<Field>,
}

impl Packet {
    pub fn stream(&self) -> &Stream {
        &self.inner.stream
    }

    pub fn context_field(&self) -> Option<&Field> {
        self.inner.context.as_ref()
    }
}
