//! Internal sink that strains a single input connection into a buffer, so
//! an output port can be consumed through an externally-driven iterator
//! instead of graph-scheduled sinks.

use crate::component::{
    ComponentClass, ConsumeStatus, SelfComponent, Sink, SinkClass, SinkContext,
};
use crate::error::Error;
use crate::graph::Graph;
use crate::iterator::{IteratorNext, MessageIterator};
use crate::message::Message;
use crate::port::OutputPort;
use crate::types::LoggingLevel;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

const BATCH_CAPACITY: usize = 64;

type SharedBuffer = Arc<Mutex<VecDeque<Message>>>;

struct ColanderSinkClass {
    buffer: SharedBuffer,
}

impl ComponentClass for ColanderSinkClass {
    fn name(&self) -> &str {
        "colander"
    }

    fn description(&self) -> &str {
        "Internal buffering sink backing output-port message iterators"
    }
}

impl SinkClass for ColanderSinkClass {
    fn instantiate(&self) -> Result<Box<dyn Sink>, Error> {
        Ok(Box::new(ColanderSink {
            buffer: self.buffer.clone(),
            iterator: None,
        }))
    }
}

struct ColanderSink {
    buffer: SharedBuffer,
    iterator: Option<MessageIterator>,
}

impl Sink for ColanderSink {
    fn initialize(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        self_component.add_input_port("in")?;
        Ok(())
    }

    fn graph_is_configured(&mut self, ctx: &mut SinkContext<'_>) -> Result<(), Error> {
        let port = ctx.input_port("in").ok_or_else(|| Error::UnknownPort {
            component: ctx.component_name().to_owned(),
            port: "in".to_owned(),
        })?;
        self.iterator = Some(ctx.create_message_iterator_on_input_port(&port)?);
        Ok(())
    }

    fn consume(&mut self) -> Result<ConsumeStatus, Error> {
        let iterator = self
            .iterator
            .as_mut()
            .ok_or_else(|| Error::msg("colander sink has no iterator"))?;
        match iterator.next(BATCH_CAPACITY)? {
            IteratorNext::Messages(messages) => {
                self.buffer.lock().extend(messages);
                Ok(ConsumeStatus::Ok)
            }
            IteratorNext::Again => Ok(ConsumeStatus::Again),
            IteratorNext::End => Ok(ConsumeStatus::End),
        }
    }
}

/// An externally-driven message iterator over one graph output port.
///
/// Once attached it is the graph's only consumer; `run`/`consume` on the
/// graph fail for the rest of its lifetime.
pub struct OutputPortMessageIterator {
    graph: Graph,
    buffer: SharedBuffer,
    ended: bool,
}

impl OutputPortMessageIterator {
    pub fn next(&mut self, capacity: usize) -> Result<IteratorNext, Error> {
        if capacity == 0 {
            return Err(Error::invalid_params("batch capacity must be at least 1"));
        }
        loop {
            {
                let mut buffer = self.buffer.lock();
                if !buffer.is_empty() {
                    let count = capacity.min(buffer.len());
                    let messages = buffer.drain(..count).collect();
                    return Ok(IteratorNext::Messages(messages));
                }
            }
            if self.ended {
                return Ok(IteratorNext::End);
            }
            match self.graph.consume_no_check()? {
                ConsumeStatus::Ok => continue,
                ConsumeStatus::Again => return Ok(IteratorNext::Again),
                ConsumeStatus::End => {
                    self.ended = true;
                    continue;
                }
            }
        }
    }
}

pub(crate) fn attach(graph: &Graph, port: &OutputPort) -> Result<OutputPortMessageIterator, Error> {
    let buffer: SharedBuffer = Arc::new(Mutex::new(VecDeque::new()));
    let class: Arc<dyn SinkClass> = Arc::new(ColanderSinkClass {
        buffer: buffer.clone(),
    });
    let component = graph.add_sink_component(class, "colander", &Value::Null, LoggingLevel::None)?;
    let input = component.input_port("in").ok_or_else(|| Error::UnknownPort {
        component: component.name().to_owned(),
        port: "in".to_owned(),
    })?;
    graph.connect_ports(port, &input)?;
    Ok(OutputPortMessageIterator {
        graph: graph.clone(),
        buffer,
        ended: false,
    })
}
