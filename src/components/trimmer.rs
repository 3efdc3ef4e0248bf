use crate::component::{ComponentClass, Filter, FilterClass, IteratorInit, SelfComponent};
use crate::error::Error;
use crate::iterator::{
    IteratorNext, MessageBatch, MessageIterator, MessageIteratorImpl, NextStatus,
};
use crate::message::Message;
use crate::value::Value;

const NS_PER_S: i64 = 1_000_000_000;

/// Parses a trimmer bound: `[-]SECONDS[.FRACTION]`, fraction up to nine
/// digits, into nanoseconds from origin.
pub fn parse_timestamp(s: &str) -> Result<i64, Error> {
    let trimmed = s.trim();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let (sec_str, frac_ns) = match rest.split_once('.') {
        Some((sec, frac)) => {
            if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::invalid_params(format!(
                    "invalid timestamp fraction in `{s}`"
                )));
            }
            let mut padded = frac.to_owned();
            while padded.len() < 9 {
                padded.push('0');
            }
            let frac_ns: i64 = padded
                .parse()
                .map_err(|_| Error::invalid_params(format!("invalid timestamp `{s}`")))?;
            (sec, frac_ns)
        }
        None => (rest, 0),
    };
    if sec_str.is_empty() || !sec_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::invalid_params(format!("invalid timestamp `{s}`")));
    }
    let seconds: i64 = sec_str
        .parse()
        .map_err(|_| Error::invalid_params(format!("timestamp `{s}` is out of range")))?;
    let ns = seconds
        .checked_mul(NS_PER_S)
        .and_then(|v| v.checked_add(frac_ns))
        .ok_or_else(|| Error::invalid_params(format!("timestamp `{s}` is out of range")))?;
    Ok(if negative { -ns } else { ns })
}

/// Formats nanoseconds from origin as `[-]SECONDS.NNNNNNNNN`.
pub fn format_timestamp(ns_from_origin: i64) -> String {
    let abs = ns_from_origin.unsigned_abs();
    let sign = if ns_from_origin < 0 { "-" } else { "" };
    format!("{sign}{}.{:09}", abs / NS_PER_S as u64, abs % NS_PER_S as u64)
}

/// Drops messages whose default clock snapshot falls outside a closed
/// `[begin, end]` nanosecond range.
pub struct TrimmerFilterClass;

impl ComponentClass for TrimmerFilterClass {
    fn name(&self) -> &str {
        "trimmer"
    }

    fn description(&self) -> &str {
        "Discard messages outside a clock snapshot range"
    }

    fn help(&self) -> &str {
        "Parameters:\n\
         \x20 begin=TS  lower bound, `[-]SECONDS[.NS]` string or signed ns integer\n\
         \x20 end=TS    upper bound, same formats"
    }
}

impl FilterClass for TrimmerFilterClass {
    fn instantiate(&self) -> Result<Box<dyn Filter>, Error> {
        Ok(Box::new(Trimmer {
            begin_ns: None,
            end_ns: None,
        }))
    }
}

fn parse_bound(value: &Value, name: &str) -> Result<i64, Error> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::SignedInteger(ns) => Ok(*ns),
        other => Err(Error::invalid_params(format!(
            "`{name}` parameter must be a timestamp string or a signed integer, got {}",
            other.type_name()
        ))),
    }
}

struct Trimmer {
    begin_ns: Option<i64>,
    end_ns: Option<i64>,
}

impl Filter for Trimmer {
    fn initialize(
        &mut self,
        self_component: &mut SelfComponent<'_>,
        params: &Value,
    ) -> Result<(), Error> {
        if let Some(begin) = params.get("begin") {
            self.begin_ns = Some(parse_bound(begin, "begin")?);
        }
        if let Some(end) = params.get("end") {
            self.end_ns = Some(parse_bound(end, "end")?);
        }
        if let (Some(begin), Some(end)) = (self.begin_ns, self.end_ns) {
            if begin > end {
                return Err(Error::invalid_params(
                    "`begin` must not be greater than `end`",
                ));
            }
        }
        self_component.add_input_port("in")?;
        self_component.add_output_port("out")?;
        Ok(())
    }

    fn create_message_iterator(
        &mut self,
        ctx: &mut IteratorInit<'_>,
    ) -> Result<Box<dyn MessageIteratorImpl>, Error> {
        let component = ctx
            .port()
            .component()
            .ok_or_else(|| Error::msg("trimmer component is gone"))?;
        let input = component.input_port("in").ok_or_else(|| Error::UnknownPort {
            component: component.name().to_owned(),
            port: "in".to_owned(),
        })?;
        let upstream = ctx.create_message_iterator_on_input_port(&input)?;
        Ok(Box::new(TrimmerIterator {
            upstream,
            begin_ns: self.begin_ns,
            end_ns: self.end_ns,
        }))
    }
}

struct TrimmerIterator {
    upstream: MessageIterator,
    begin_ns: Option<i64>,
    end_ns: Option<i64>,
}

impl TrimmerIterator {
    /// Messages without an orderable snapshot pass through only when no
    /// bound applies; a bounded trimmer cannot place them.
    fn keep(&self, message: &Message) -> Result<bool, Error> {
        let ns = match message.default_clock_snapshot_ns_from_origin() {
            Some(ns) => ns?,
            None => return Ok(self.begin_ns.is_none() && self.end_ns.is_none()),
        };
        if let Some(begin) = self.begin_ns {
            if ns < begin {
                return Ok(false);
            }
        }
        if let Some(end) = self.end_ns {
            if ns > end {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl MessageIteratorImpl for TrimmerIterator {
    fn next(&mut self, batch: &mut MessageBatch) -> Result<NextStatus, Error> {
        loop {
            match self.upstream.next(batch.capacity())? {
                IteratorNext::Messages(messages) => {
                    for message in messages {
                        if self.keep(&message)? {
                            batch.push(message)?;
                        }
                    }
                    if !batch.is_empty() {
                        return Ok(NextStatus::Ok);
                    }
                    // Everything in the batch was trimmed; pull more.
                }
                IteratorNext::Again => return Ok(NextStatus::Again),
                IteratorNext::End => return Ok(NextStatus::End),
            }
        }
    }
}
