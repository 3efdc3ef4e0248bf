use crate::error::Error;
use crate::ir::{ClockClass, EventClass, Field, Packet, Stream};
use crate::pool::{ObjectPool, Pooled, Recycle};
use std::sync::Arc;

/// A stream-boundary clock snapshot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClockSnapshot {
    Known(u64),
    /// The stream has a clock but the boundary time is unknown.
    Unknown,
    /// The stream class has no default clock class.
    Absent,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Event,
    MessageIteratorInactivity,
    StreamBeginning,
    StreamEnd,
    PacketBeginning,
    PacketEnd,
    DiscardedEvents,
    DiscardedPackets,
}

impl MessageKind {
    pub const ALL: [MessageKind; 8] = [
        MessageKind::Event,
        MessageKind::MessageIteratorInactivity,
        MessageKind::StreamBeginning,
        MessageKind::StreamEnd,
        MessageKind::PacketBeginning,
        MessageKind::PacketEnd,
        MessageKind::DiscardedEvents,
        MessageKind::DiscardedPackets,
    ];
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Event => "event",
            MessageKind::MessageIteratorInactivity => "message iterator inactivity",
            MessageKind::StreamBeginning => "stream beginning",
            MessageKind::StreamEnd => "stream end",
            MessageKind::PacketBeginning => "packet beginning",
            MessageKind::PacketEnd => "packet end",
            MessageKind::DiscardedEvents => "discarded events",
            MessageKind::DiscardedPackets => "discarded packets",
        };
        write!(f, "{name}")
    }
}

/// An event occurrence; the hot, pool-backed message payload.
#[derive(Debug, Default)]
pub struct EventMessage {
    stream: Option<Stream>,
    event_class: Option<EventClass>,
    common_context: Option<Field>,
    specific_context: Option<Field>,
    payload: Option<Field>,
    default_clock_snapshot: Option<u64>,
}

impl EventMessage {
    pub fn stream(&self) -> &Stream {
        self.stream.as_ref().expect("event message is initialized")
    }

    pub fn event_class(&self) -> &EventClass {
        self.event_class
            .as_ref()
            .expect("event message is initialized")
    }

    pub fn common_context(&self) -> Option<&Field> {
        self.common_context.as_ref()
    }

    pub fn specific_context(&self) -> Option<&Field> {
        self.specific_context.as_ref()
    }

    pub fn payload(&self) -> Option<&Field> {
        self.payload.as_ref()
    }

    pub fn default_clock_snapshot(&self) -> Option<u64> {
        self.default_clock_snapshot
    }

    pub fn set_common_context(&mut self, field: Field) {
        self.common_context = Some(field);
    }

    pub fn set_specific_context(&mut self, field: Field) {
        self.specific_context = Some(field);
    }
}

impl Recycle for EventMessage {
    fn recycle(&mut self) {
        self.stream = None;
        self.event_class = None;
        self.common_context = None;
        self.specific_context = None;
        self.payload = None;
        self.default_clock_snapshot = None;
    }
}

/// Packet beginning/end payload; pool-backed.
#[derive(Debug, Default)]
pub struct PacketMessage {
    packet: Option<Packet>,
    default_clock_snapshot: Option<u64>,
}

impl PacketMessage {
    pub fn packet(&self) -> &Packet {
        self.packet.as_ref().expect("packet message is initialized")
    }

    pub fn default_clock_snapshot(&self) -> Option<u64> {
        self.default_clock_snapshot
    }
}

impl Recycle for PacketMessage {
    fn recycle(&mut self) {
        self.packet = None;
        self.default_clock_snapshot = None;
    }
}

#[derive(Clone, Debug)]
pub struct StreamActivityMessage {
    stream: Stream,
    clock_snapshot: ClockSnapshot,
}

impl StreamActivityMessage {
    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn clock_snapshot(&self) -> ClockSnapshot {
        self.clock_snapshot
    }
}

#[derive(Clone, Debug)]
pub struct DiscardedItemsMessage {
    stream: Stream,
    count: Option<u64>,
    beginning_default_clock_snapshot: Option<u64>,
    end_default_clock_snapshot: Option<u64>,
}

impl DiscardedItemsMessage {
    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn count(&self) -> Option<u64> {
        self.count
    }

    pub fn beginning_default_clock_snapshot(&self) -> Option<u64> {
        self.beginning_default_clock_snapshot
    }

    pub fn end_default_clock_snapshot(&self) -> Option<u64> {
        self.end_default_clock_snapshot
    }
}

#[derive(Clone, Debug)]
pub struct InactivityMessage {
    clock_class: ClockClass,
    clock_snapshot: u64,
}

impl InactivityMessage {
    pub fn clock_class(&self) -> &ClockClass {
        &self.clock_class
    }

    pub fn clock_snapshot(&self) -> u64 {
        self.clock_snapshot
    }
}

/// A message flowing from an upstream iterator to a downstream consumer.
#[derive(Debug)]
pub enum Message {
    Event(Pooled<EventMessage>),
    MessageIteratorInactivity(InactivityMessage),
    StreamBeginning(StreamActivityMessage),
    StreamEnd(StreamActivityMessage),
    PacketBeginning(Pooled<PacketMessage>),
    PacketEnd(Pooled<PacketMessage>),
    DiscardedEvents(DiscardedItemsMessage),
    DiscardedPackets(DiscardedItemsMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Event(_) => MessageKind::Event,
            Message::MessageIteratorInactivity(_) => MessageKind::MessageIteratorInactivity,
            Message::StreamBeginning(_) => MessageKind::StreamBeginning,
            Message::StreamEnd(_) => MessageKind::StreamEnd,
            Message::PacketBeginning(_) => MessageKind::PacketBeginning,
            Message::PacketEnd(_) => MessageKind::PacketEnd,
            Message::DiscardedEvents(_) => MessageKind::DiscardedEvents,
            Message::DiscardedPackets(_) => MessageKind::DiscardedPackets,
        }
    }

    /// The stream this message belongs to, when it has one.
    pub fn stream(&self) -> Option<&Stream> {
        match self {
            Message::Event(msg) => Some(msg.stream()),
            Message::MessageIteratorInactivity(_) => None,
            Message::StreamBeginning(msg) | Message::StreamEnd(msg) => Some(msg.stream()),
            Message::PacketBeginning(msg) | Message::PacketEnd(msg) => {
                Some(msg.packet().stream())
            }
            Message::DiscardedEvents(msg) | Message::DiscardedPackets(msg) => Some(msg.stream()),
        }
    }

    /// The default clock snapshot used for inter-stream ordering, when one
    /// is known.
    pub fn default_clock_snapshot(&self) -> Option<u64> {
        match self {
            Message::Event(msg) => msg.default_clock_snapshot(),
            Message::MessageIteratorInactivity(msg) => Some(msg.clock_snapshot()),
            Message::StreamBeginning(msg) | Message::StreamEnd(msg) => {
                match msg.clock_snapshot() {
                    ClockSnapshot::Known(cs) => Some(cs),
                    ClockSnapshot::Unknown | ClockSnapshot::Absent => None,
                }
            }
            Message::PacketBeginning(msg) | Message::PacketEnd(msg) => {
                msg.default_clock_snapshot()
            }
            Message::DiscardedEvents(msg) | Message::DiscardedPackets(msg) => {
                msg.beginning_default_clock_snapshot()
            }
        }
    }

    /// Converts the ordering clock snapshot to nanoseconds from origin via
    /// the stream's default clock class.
    pub fn default_clock_snapshot_ns_from_origin(&self) -> Option<Result<i64, Error>> {
        let cs = self.default_clock_snapshot()?;
        match self {
            Message::MessageIteratorInactivity(msg) => {
                Some(msg.clock_class().cycles_to_ns_from_origin(cs))
            }
            _ => {
                let stream = self.stream()?;
                let clock_class = stream.class().default_clock_class()?;
                Some(clock_class.cycles_to_ns_from_origin(cs))
            }
        }
    }
}

/// Creates messages backed by a graph's pools.
///
/// Each message iterator gets a factory handle at creation time; messages
/// weakly reference the pools so a torn-down graph strands nothing.
#[derive(Clone, Debug)]
pub struct MessageFactory {
    event_pool: Arc<ObjectPool<EventMessage>>,
    packet_beginning_pool: Arc<ObjectPool<PacketMessage>>,
    packet_end_pool: Arc<ObjectPool<PacketMessage>>,
}

impl MessageFactory {
    pub(crate) fn new(pool_capacity: usize) -> Self {
        MessageFactory {
            event_pool: ObjectPool::new(pool_capacity),
            packet_beginning_pool: ObjectPool::new(pool_capacity),
            packet_end_pool: ObjectPool::new(pool_capacity),
        }
    }

    pub fn event(
        &self,
        stream: &Stream,
        event_class: &EventClass,
        default_clock_snapshot: Option<u64>,
        payload: Option<Field>,
    ) -> Result<Message, Error> {
        let owned = stream
            .class()
            .event_class_by_id(event_class.id())
            .map(|ec| ec.ptr_eq(event_class))
            .unwrap_or(false);
        if !owned {
            return Err(Error::invalid_params(
                "event class does not belong to the stream's class",
            ));
        }
        self.check_snapshot_rule(
            default_clock_snapshot.is_some(),
            stream.class().default_clock_class().is_some(),
            "event",
        )?;
        stream.freeze();
        let mut msg = self.event_pool.acquire(EventMessage::default);
        msg.stream = Some(stream.clone());
        msg.event_class = Some(event_class.clone());
        msg.payload = payload;
        msg.default_clock_snapshot = default_clock_snapshot;
        Ok(Message::Event(msg))
    }

    pub fn stream_beginning(
        &self,
        stream: &Stream,
        clock_snapshot: ClockSnapshot,
    ) -> Result<Message, Error> {
        self.check_boundary_snapshot(stream, clock_snapshot)?;
        stream.freeze();
        Ok(Message::StreamBeginning(StreamActivityMessage {
            stream: stream.clone(),
            clock_snapshot,
        }))
    }

    pub fn stream_end(
        &self,
        stream: &Stream,
        clock_snapshot: ClockSnapshot,
    ) -> Result<Message, Error> {
        self.check_boundary_snapshot(stream, clock_snapshot)?;
        stream.freeze();
        Ok(Message::StreamEnd(StreamActivityMessage {
            stream: stream.clone(),
            clock_snapshot,
        }))
    }

    pub fn message_iterator_inactivity(
        &self,
        clock_class: &ClockClass,
        clock_snapshot: u64,
    ) -> Message {
        clock_class.freeze();
        Message::MessageIteratorInactivity(InactivityMessage {
            clock_class: clock_class.clone(),
            clock_snapshot,
        })
    }

    pub fn packet_beginning(
        &self,
        packet: &Packet,
        default_clock_snapshot: Option<u64>,
    ) -> Result<Message, Error> {
        let stream = packet.stream();
        self.check_snapshot_rule(
            default_clock_snapshot.is_some(),
            stream
                .class()
                .packets_have_beginning_default_clock_snapshot(),
            "packet beginning",
        )?;
        stream.freeze();
        let mut msg = self.packet_beginning_pool.acquire(PacketMessage::default);
        msg.packet = Some(packet.clone());
        msg.default_clock_snapshot = default_clock_snapshot;
        Ok(Message::PacketBeginning(msg))
    }

    pub fn packet_end(
        &self,
        packet: &Packet,
        default_clock_snapshot: Option<u64>,
    ) -> Result<Message, Error> {
        let stream = packet.stream();
        self.check_snapshot_rule(
            default_clock_snapshot.is_some(),
            stream.class().packets_have_end_default_clock_snapshot(),
            "packet end",
        )?;
        stream.freeze();
        let mut msg = self.packet_end_pool.acquire(PacketMessage::default);
        msg.packet = Some(packet.clone());
        msg.default_clock_snapshot = default_clock_snapshot;
        Ok(Message::PacketEnd(msg))
    }

    pub fn discarded_events(
        &self,
        stream: &Stream,
        count: Option<u64>,
        beginning_default_clock_snapshot: Option<u64>,
        end_default_clock_snapshot: Option<u64>,
    ) -> Result<Message, Error> {
        if !stream.class().supports_discarded_events() {
            return Err(Error::invalid_params(
                "stream class does not support discarded events",
            ));
        }
        let with_snapshots = stream
            .class()
            .discarded_events_have_default_clock_snapshots();
        self.check_discarded_snapshots(
            with_snapshots,
            beginning_default_clock_snapshot,
            end_default_clock_snapshot,
        )?;
        stream.freeze();
        Ok(Message::DiscardedEvents(DiscardedItemsMessage {
            stream: stream.clone(),
            count,
            beginning_default_clock_snapshot,
            end_default_clock_snapshot,
        }))
    }

    pub fn discarded_packets(
        &self,
        stream: &Stream,
        count: Option<u64>,
        beginning_default_clock_snapshot: Option<u64>,
        end_default_clock_snapshot: Option<u64>,
    ) -> Result<Message, Error> {
        if !stream.class().supports_discarded_packets() {
            return Err(Error::invalid_params(
                "stream class does not support discarded packets",
            ));
        }
        let with_snapshots = stream
            .class()
            .discarded_packets_have_default_clock_snapshots();
        self.check_discarded_snapshots(
            with_snapshots,
            beginning_default_clock_snapshot,
            end_default_clock_snapshot,
        )?;
        stream.freeze();
        Ok(Message::DiscardedPackets(DiscardedItemsMessage {
            stream: stream.clone(),
            count,
            beginning_default_clock_snapshot,
            end_default_clock_snapshot,
        }))
    }

    fn check_snapshot_rule(&self, have: bool, want: bool, what: &str) -> Result<(), Error> {
        if have && !want {
            return Err(Error::invalid_params(format!(
                "{what} message cannot carry a default clock snapshot"
            )));
        }
        if !have && want {
            return Err(Error::invalid_params(format!(
                "{what} message requires a default clock snapshot"
            )));
        }
        Ok(())
    }

    fn check_boundary_snapshot(
        &self,
        stream: &Stream,
        clock_snapshot: ClockSnapshot,
    ) -> Result<(), Error> {
        let has_clock = stream.class().default_clock_class().is_some();
        match clock_snapshot {
            ClockSnapshot::Absent if has_clock => Err(Error::invalid_params(
                "stream boundary requires a known or unknown clock snapshot",
            )),
            ClockSnapshot::Known(_) | ClockSnapshot::Unknown if !has_clock => Err(
                Error::invalid_params("stream class has no default clock class"),
            ),
            _ => Ok(()),
        }
    }

    fn check_discarded_snapshots(
        &self,
        with_snapshots: bool,
        beginning: Option<u64>,
        end: Option<u64>,
    ) -> Result<(), Error> {
        if with_snapshots && (beginning.is_none() || end.is_none()) {
            return Err(Error::invalid_params(
                "discarded items messages require beginning and end clock snapshots",
            ));
        }
        if !with_snapshots && (beginning.is_some() || end.is_some()) {
            return Err(Error::invalid_params(
                "discarded items messages cannot carry clock snapshots",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Trace, TraceClass};
    use pretty_assertions::assert_eq;

    fn clocked_stream() -> (Stream, EventClass) {
        let tc = TraceClass::new();
        let sc = tc.create_stream_class().unwrap();
        sc.set_default_clock_class(ClockClass::new(1_000_000_000).unwrap())
            .unwrap();
        let ec = sc.create_event_class().unwrap();
        let trace = Trace::new(&tc);
        let stream = trace.create_stream(&sc).unwrap();
        (stream, ec)
    }

    #[test]
    fn event_messages_are_pooled() {
        let factory = MessageFactory::new(8);
        let (stream, ec) = clocked_stream();
        let msg = factory.event(&stream, &ec, Some(10), None).unwrap();
        assert_eq!(msg.kind(), MessageKind::Event);
        assert_eq!(msg.default_clock_snapshot(), Some(10));
        drop(msg);
        assert_eq!(factory.event_pool.len(), 1);
        let again = factory.event(&stream, &ec, Some(11), None).unwrap();
        assert_eq!(factory.event_pool.len(), 0);
        drop(again);
    }

    #[test]
    fn event_snapshot_must_match_the_clock() {
        let factory = MessageFactory::new(8);
        let (stream, ec) = clocked_stream();
        assert!(factory.event(&stream, &ec, None, None).is_err());

        let tc = TraceClass::new();
        let sc = tc.create_stream_class().unwrap();
        let ec = sc.create_event_class().unwrap();
        let trace = Trace::new(&tc);
        let stream = trace.create_stream(&sc).unwrap();
        assert!(factory.event(&stream, &ec, Some(1), None).is_err());
        assert!(factory.event(&stream, &ec, None, None).is_ok());
    }

    #[test]
    fn foreign_event_class_is_rejected() {
        let factory = MessageFactory::new(8);
        let (stream, _ec) = clocked_stream();
        let (_other_stream, other_ec) = clocked_stream();
        assert!(factory.event(&stream, &other_ec, Some(0), None).is_err());
    }

    #[test]
    fn boundary_snapshots_follow_the_clock() {
        let factory = MessageFactory::new(8);
        let (stream, _ec) = clocked_stream();
        assert!(factory
            .stream_beginning(&stream, ClockSnapshot::Absent)
            .is_err());
        assert!(factory
            .stream_beginning(&stream, ClockSnapshot::Unknown)
            .is_ok());
        assert!(factory
            .stream_end(&stream, ClockSnapshot::Known(5))
            .is_ok());
    }

    #[test]
    fn discarded_events_require_support() {
        let factory = MessageFactory::new(8);
        let tc = TraceClass::new();
        let sc = tc.create_stream_class().unwrap();
        let trace = Trace::new(&tc);
        let stream = trace.create_stream(&sc).unwrap();
        assert!(factory
            .discarded_events(&stream, Some(2), None, None)
            .is_err());

        let tc = TraceClass::new();
        let sc = tc.create_stream_class().unwrap();
        sc.set_supports_discarded_events(true, false).unwrap();
        let trace = Trace::new(&tc);
        let stream = trace.create_stream(&sc).unwrap();
        let msg = factory
            .discarded_events(&stream, Some(2), None, None)
            .unwrap();
        assert_eq!(msg.kind(), MessageKind::DiscardedEvents);
    }

    #[test]
    fn packet_messages_follow_the_snapshot_flags() {
        let factory = MessageFactory::new(8);
        let tc = TraceClass::new();
        let sc = tc.create_stream_class().unwrap();
        sc.set_default_clock_class(ClockClass::new(1000).unwrap())
            .unwrap();
        sc.set_supports_packets(true, true, false).unwrap();
        let trace = Trace::new(&tc);
        let stream = trace.create_stream(&sc).unwrap();
        let packet = stream.create_packet(None).unwrap();

        let msg = factory.packet_beginning(&packet, Some(5)).unwrap();
        assert_eq!(msg.kind(), MessageKind::PacketBeginning);
        assert!(factory.packet_beginning(&packet, None).is_err());
        assert!(factory.packet_end(&packet, Some(9)).is_err());
        let msg = factory.packet_end(&packet, None).unwrap();
        assert_eq!(msg.kind(), MessageKind::PacketEnd);
    }

    #[test]
    fn packets_require_stream_class_support() {
        let tc = TraceClass::new();
        let sc = tc.create_stream_class().unwrap();
        let trace = Trace::new(&tc);
        let stream = trace.create_stream(&sc).unwrap();
        assert!(stream.create_packet(None).is_err());
    }

    #[test]
    fn snapshot_ns_conversion_uses_the_stream_clock() {
        let factory = MessageFactory::new(8);
        let (stream, ec) = clocked_stream();
        let msg = factory
            .event(&stream, &ec, Some(1_500_000_000), None)
            .unwrap();
        assert_eq!(
            msg.default_clock_snapshot_ns_from_origin()
                .map(|r| r.unwrap()),
            Some(1_500_000_000)
        );
    }
}
