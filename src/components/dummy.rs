use crate::component::{
    ComponentClass, ConsumeStatus, SelfComponent, Sink, SinkClass, SinkContext,
};
use crate::error::Error;
use crate::iterator::{IteratorNext, MessageIterator};
use crate::value::Value;

const BATCH_CAPACITY: usize = 64;

/// Consumes and discards every message; useful to benchmark upstreams or to
/// drive a graph whose output nobody reads.
pub struct DummySinkClass;

impl ComponentClass for DummySinkClass {
    fn name(&self) -> &str {
        "dummy"
    }

    fn description(&self) -> &str {
        "Consume messages and discard them"
    }

    fn help(&self) -> &str {
        "Connect any number of upstream ports; every message is dropped."
    }
}

impl SinkClass for DummySinkClass {
    fn instantiate(&self) -> Result<Box<dyn Sink>, Error> {
        Ok(Box::new(DummySink {
            iterators: Vec::new(),
        }))
    }
}

struct DummySink {
    iterators: Vec<MessageIterator>,
}

impl Sink for DummySink {
    fn initialize(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        self_component.add_input_port("in")?;
        Ok(())
    }

    fn graph_is_configured(&mut self, ctx: &mut SinkContext<'_>) -> Result<(), Error> {
        for port in ctx.input_ports() {
            if port.is_connected() {
                self.iterators
                    .push(ctx.create_message_iterator_on_input_port(&port)?);
            }
        }
        Ok(())
    }

    fn consume(&mut self) -> Result<ConsumeStatus, Error> {
        let mut all_ended = true;
        let mut any_again = false;
        for iterator in &mut self.iterators {
            match iterator.next(BATCH_CAPACITY)? {
                IteratorNext::Messages(_) => return Ok(ConsumeStatus::Ok),
                IteratorNext::Again => {
                    all_ended = false;
                    any_again = true;
                }
                IteratorNext::End => {}
            }
        }
        if any_again {
            Ok(ConsumeStatus::Again)
        } else if all_ended {
            Ok(ConsumeStatus::End)
        } else {
            Ok(ConsumeStatus::Ok)
        }
    }
}
