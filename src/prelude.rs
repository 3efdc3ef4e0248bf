pub use crate::component::{
    Component, ComponentClass, ComponentClassKind, ComponentClassRef, ConsumeStatus, Filter,
    FilterClass, IteratorInit, SelfComponent, Sink, SinkClass, SinkContext, Source, SourceClass,
};
pub use crate::config::{parse_params, ComponentSpec, ConnectionRule};
pub use crate::connection::Connection;
pub use crate::discover::{auto_discover_source_components, AutoSourceDiscovery, DiscoveredSource};
pub use crate::error::Error;
pub use crate::graph::{ConfigurationState, Graph, RunStatus};
pub use crate::ir::{
    ClockClass, EventClass, Field, FieldClass, FieldPath, Stream, StreamClass, Trace, TraceClass,
};
pub use crate::iterator::{
    IteratorNext, MessageBatch, MessageIterator, MessageIteratorImpl, NextStatus, SeekStatus,
};
pub use crate::message::{ClockSnapshot, Message, MessageFactory, MessageKind};
pub use crate::plugin::{Plugin, PluginRegistry};
pub use crate::port::{InputPort, OutputPort, PortDirection};
pub use crate::query::QueryExecutor;
pub use crate::types::{Interruptor, LoggingLevel, RetryDurationUs};
pub use crate::value::Value;
