use super::field::{validate_field_paths, FieldClass, ScopeRoots};
use super::stream::{StreamClass, StreamClassInner};
use super::FreezeFlag;
use crate::error::Error;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Log levels an event class may be tagged with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    DebugSystem,
    DebugProgram,
    DebugProcess,
    DebugModule,
    DebugUnit,
    DebugFunction,
    DebugLine,
    Debug,
}

/// Describes one kind of event within a stream class.
#[derive(Clone, Debug)]
pub struct EventClass {
    pub(crate) inner: Arc<EventClassInner>,
}

#[derive(Debug)]
pub(crate) struct EventClassInner {
    id: u64,
    parent: Weak<StreamClassInner>,
    frozen: FreezeFlag,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    name: Option<String>,
    log_level: Option<LogLevel>,
    emf_uri: Option<String>,
    specific_context_field_class: Option<FieldClass>,
    payload_field_class: Option<FieldClass>,
}

impl EventClass {
    pub(crate) fn new(id: u64, parent: Weak<StreamClassInner>) -> Self {
        EventClass {
            inner: Arc::new(EventClassInner {
                id,
                parent,
                frozen: FreezeFlag::default(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The owning stream class; `None` once it has been destroyed.
    pub fn stream_class(&self) -> Option<StreamClass> {
        self.inner.parent.upgrade().map(StreamClass::from_inner)
    }

    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().name.clone()
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.inner.state.lock().log_level
    }

    pub fn emf_uri(&self) -> Option<String> {
        self.inner.state.lock().emf_uri.clone()
    }

    pub fn specific_context_field_class(&self) -> Option<FieldClass> {
        self.inner.state.lock().specific_context_field_class.clone()
    }

    pub fn payload_field_class(&self) -> Option<FieldClass> {
        self.inner.state.lock().payload_field_class.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<(), Error> {
        self.inner.frozen.check_mutable("event class")?;
        self.inner.state.lock().name = Some(name.into());
        Ok(())
    }

    pub fn set_log_level(&self, log_level: LogLevel) -> Result<(), Error> {
        self.inner.frozen.check_mutable("event class")?;
        self.inner.state.lock().log_level = Some(log_level);
        Ok(())
    }

    pub fn set_emf_uri(&self, emf_uri: impl Into<String>) -> Result<(), Error> {
        self.inner.frozen.check_mutable("event class")?;
        self.inner.state.lock().emf_uri = Some(emf_uri.into());
        Ok(())
    }

    pub fn set_specific_context_field_class(&self, field_class: FieldClass) -> Result<(), Error> {
        self.inner.frozen.check_mutable("event class")?;
        self.validate_with(Some(&field_class), self.payload_field_class().as_ref())?;
        self.inner.state.lock().specific_context_field_class = Some(field_class);
        Ok(())
    }

    pub fn set_payload_field_class(&self, field_class: FieldClass) -> Result<(), Error> {
        self.inner.frozen.check_mutable("event class")?;
        self.validate_with(
            self.specific_context_field_class().as_ref(),
            Some(&field_class),
        )?;
        self.inner.state.lock().payload_field_class = Some(field_class);
        Ok(())
    }

    /// Field-path validation across the stream class's context trees and
    /// this event class's own trees.
    fn validate_with(
        &self,
        specific_context: Option<&FieldClass>,
        payload: Option<&FieldClass>,
    ) -> Result<(), Error> {
        let stream_class = self.stream_class();
        let packet_context = stream_class
            .as_ref()
            .and_then(|sc| sc.packet_context_field_class());
        let event_common_context = stream_class
            .as_ref()
            .and_then(|sc| sc.event_common_context_field_class());
        let roots = ScopeRoots {
            packet_context: packet_context.as_ref(),
            event_common_context: event_common_context.as_ref(),
            event_specific_context: specific_context,
            event_payload: payload,
        };
        validate_field_paths(&roots)
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.is_frozen()
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.freeze();
    }

    pub(crate) fn ptr_eq(&self, other: &EventClass) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
