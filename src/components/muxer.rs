use crate::component::{ComponentClass, Filter, FilterClass, IteratorInit, SelfComponent};
use crate::error::Error;
use crate::iterator::{
    IteratorNext, MessageBatch, MessageIterator, MessageIteratorImpl, NextStatus,
};
use crate::message::Message;
use crate::port::{InputPort, OutputPort};
use crate::value::Value;
use std::collections::VecDeque;

const UPSTREAM_BATCH_CAPACITY: usize = 64;

/// Merges every connected upstream into one flow, ordered by default clock
/// snapshot, polling `Again`-aware so no upstream can be overtaken.
pub struct MuxerFilterClass;

impl ComponentClass for MuxerFilterClass {
    fn name(&self) -> &str {
        "muxer"
    }

    fn description(&self) -> &str {
        "Sort messages from multiple upstreams by clock snapshot"
    }

    fn help(&self) -> &str {
        "Connect any number of upstreams; a fresh input port is made\n\
         available after each connection."
    }
}

impl FilterClass for MuxerFilterClass {
    fn instantiate(&self) -> Result<Box<dyn Filter>, Error> {
        Ok(Box::new(Muxer { next_port_index: 1 }))
    }
}

struct Muxer {
    next_port_index: usize,
}

impl Filter for Muxer {
    fn initialize(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        _params: &Value,
    ) -> Result<(), Error> {
        self_component.add_output_port("out")?;
        self_component.add_input_port("in0")?;
        Ok(())
    }

    /// Keep one unconnected input port available at all times.
    fn accept_port_connection(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        _self_port: &InputPort,
        _upstream_port: &OutputPort,
    ) -> Result<(), Error> {
        let name = format!("in{}", self.next_port_index);
        self.next_port_index += 1;
        self_component.add_input_port(&name)?;
        Ok(())
    }

    fn create_message_iterator(
        &mut self,
        ctx: &mut IteratorInit<'_>,
    ) -> Result<Box<dyn MessageIteratorImpl>, Error> {
        let component = ctx
            .port()
            .component()
            .ok_or_else(|| Error::msg("muxer component is gone"))?;
        let mut upstreams = Vec::new();
        for port in component.input_ports() {
            if port.is_connected() {
                upstreams.push(UpstreamState {
                    iterator: ctx.create_message_iterator_on_input_port(&port)?,
                    buffered: VecDeque::new(),
                    ended: false,
                });
            }
        }
        Ok(Box::new(MuxerIterator { upstreams }))
    }
}

struct UpstreamState {
    iterator: MessageIterator,
    buffered: VecDeque<Message>,
    ended: bool,
}

impl UpstreamState {
    /// Ordering key of this upstream's next message, when one is buffered.
    /// Messages without a snapshot sort first.
    fn head_ns(&self) -> Option<Result<i64, Error>> {
        let head = self.buffered.front()?;
        match head.default_clock_snapshot_ns_from_origin() {
            Some(Ok(ns)) => Some(Ok(ns)),
            Some(Err(e)) => Some(Err(e)),
            None => Some(Ok(i64::MIN)),
        }
    }
}

struct MuxerIterator {
    upstreams: Vec<UpstreamState>,
}

impl MuxerIterator {
    /// Tops up every live upstream so the k-way pick sees each head.
    /// `Again` from any upstream suspends the whole merge.
    fn refill(&mut self) -> Result<NextStatus, Error> {
        for upstream in &mut self.upstreams {
            if upstream.ended || !upstream.buffered.is_empty() {
                continue;
            }
            match upstream.iterator.next(UPSTREAM_BATCH_CAPACITY)? {
                IteratorNext::Messages(messages) => upstream.buffered.extend(messages),
                IteratorNext::Again => return Ok(NextStatus::Again),
                IteratorNext::End => upstream.ended = true,
            }
        }
        Ok(NextStatus::Ok)
    }

    fn pick_earliest(&mut self) -> Result<Option<Message>, Error> {
        let mut best: Option<(usize, i64)> = None;
        for (index, upstream) in self.upstreams.iter().enumerate() {
            if let Some(ns) = upstream.head_ns() {
                let ns = ns?;
                let better = best.map(|(_, best_ns)| ns < best_ns).unwrap_or(true);
                if better {
                    best = Some((index, ns));
                }
            }
        }
        Ok(best.and_then(|(index, _)| self.upstreams[index].buffered.pop_front()))
    }
}

impl MessageIteratorImpl for MuxerIterator {
    fn next(&mut self, batch: &mut MessageBatch) -> Result<NextStatus, Error> {
        while !batch.is_full() {
            if let NextStatus::Again = self.refill()? {
                return if batch.is_empty() {
                    Ok(NextStatus::Again)
                } else {
                    // Deliver what is ordered so far; resume next call.
                    Ok(NextStatus::Ok)
                };
            }
            match self.pick_earliest()? {
                Some(message) => batch.push(message)?,
                None => {
                    // Every upstream has ended and drained.
                    return if batch.is_empty() {
                        Ok(NextStatus::End)
                    } else {
                        Ok(NextStatus::Ok)
                    };
                }
            }
        }
        Ok(NextStatus::Ok)
    }
}
