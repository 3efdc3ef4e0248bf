use crate::component::{
    ComponentClass, ConsumeStatus, SelfComponent, Sink, SinkClass, SinkContext,
};
use crate::error::Error;
use crate::iterator::{IteratorNext, MessageIterator};
use crate::message::MessageKind;
use crate::value::Value;
use std::collections::HashMap;

const BATCH_CAPACITY: usize = 64;
const DEFAULT_STEP: u64 = 1000;

/// Counts message instances per kind, printing totals every `step`
/// messages and once more when the stream of messages ends.
pub struct CounterSinkClass;

impl ComponentClass for CounterSinkClass {
    fn name(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "Count messages per kind and print the totals"
    }

    fn help(&self) -> &str {
        "Parameters:\n\
         \x20 step=N       print the counts every N messages (0 disables; default 1000)\n\
         \x20 hide-zero=B  do not print kinds with a zero count (default false)"
    }
}

impl SinkClass for CounterSinkClass {
    fn instantiate(&self) -> Result<Box<dyn Sink>, Error> {
        Ok(Box::new(CounterSink {
            iterator: None,
            counts: HashMap::new(),
            total_since_print: 0,
            step: DEFAULT_STEP,
            hide_zero: false,
        }))
    }
}

struct CounterSink {
    iterator: Option<MessageIterator>,
    counts: HashMap<MessageKind, u64>,
    total_since_print: u64,
    step: u64,
    hide_zero: bool,
}

impl CounterSink {
    fn print_counts(&mut self) {
        for kind in MessageKind::ALL {
            let count = self.counts.get(&kind).copied().unwrap_or(0);
            if count == 0 && self.hide_zero {
                continue;
            }
            println!("{count:>15} {kind} messages");
        }
        self.total_since_print = 0;
    }
}

impl Sink for CounterSink {
    fn initialize(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        params: &Value,
    ) -> Result<(), Error> {
        if let Some(step) = params.get("step") {
            self.step = step.as_unsigned_integer().ok_or_else(|| {
                Error::invalid_params("`step` parameter must be an unsigned integer")
            })?;
        }
        if let Some(hide_zero) = params.get("hide-zero") {
            self.hide_zero = hide_zero
                .as_bool()
                .ok_or_else(|| Error::invalid_params("`hide-zero` parameter must be a boolean"))?;
        }
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
            .ok_or_else(|| Error::msg("counter sink has no upstream iterator"))?;
        match iterator.next(BATCH_CAPACITY)? {
            IteratorNext::Messages(messages) => {
                for message in &messages {
                    *self.counts.entry(message.kind()).or_insert(0) += 1;
                }
                self.total_since_print += messages.len() as u64;
                if self.step > 0 && self.total_since_print >= self.step {
                    self.print_counts();
                }
                Ok(ConsumeStatus::Ok)
            }
            IteratorNext::Again => Ok(ConsumeStatus::Again),
            IteratorNext::End => {
                self.print_counts();
                Ok(ConsumeStatus::End)
            }
        }
    }
}
