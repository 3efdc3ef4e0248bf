use super::stream::{Stream, StreamClass, StreamInner};
use super::FreezeFlag;
use crate::error::Error;
use derive_more::{Display, From, Into};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// A trace-class environment entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvironmentEntry {
    Integer(i64),
    String(String),
}

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, From, Into, Display,
)]
#[repr(transparent)]
pub struct DestructionListenerId(pub u64);

type DestructionListener = Box<dyn FnMut() + Send>;

/// Describes the structure shared by a family of traces.
///
/// Mutable until the first stream is instantiated from it; at that point the
/// trace class and all of its descendants freeze for good.
#[derive(Clone)]
pub struct TraceClass {
    pub(crate) inner: Arc<TraceClassInner>,
}

pub(crate) struct TraceClassInner {
    frozen: FreezeFlag,
    state: Mutex<State>,
    stream_classes: Mutex<Vec<StreamClass>>,
    destruction_listeners: Mutex<Vec<Option<DestructionListener>>>,
}

#[derive(Debug)]
struct State {
    name: Option<String>,
    uuid: Option<Uuid>,
    environment: IndexMap<String, EnvironmentEntry>,
    assigns_automatic_stream_class_id: bool,
    next_automatic_stream_class_id: u64,
}

impl std::fmt::Debug for TraceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TraceClass")
            .field("name", &state.name)
            .field("uuid", &state.uuid)
            .field("frozen", &self.inner.frozen.is_frozen())
            .finish()
    }
}

impl Default for TraceClass {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceClass {
    pub fn new() -> Self {
        TraceClass {
            inner: Arc::new(TraceClassInner {
                frozen: FreezeFlag::default(),
                state: Mutex::new(State {
                    name: None,
                    uuid: None,
                    environment: IndexMap::new(),
                    assigns_automatic_stream_class_id: true,
                    next_automatic_stream_class_id: 0,
                }),
                stream_classes: Mutex::new(Vec::new()),
                destruction_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<TraceClassInner>) -> Self {
        TraceClass { inner }
    }

    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<(), Error> {
        self.inner.frozen.check_mutable("trace class")?;
        self.inner.state.lock().name = Some(name.into());
        Ok(())
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.inner.state.lock().uuid
    }

    pub fn set_uuid(&self, uuid: Uuid) -> Result<(), Error> {
        self.inner.frozen.check_mutable("trace class")?;
        self.inner.state.lock().uuid = Some(uuid);
        Ok(())
    }

    pub fn environment(&self) -> IndexMap<String, EnvironmentEntry> {
        self.inner.state.lock().environment.clone()
    }

    pub fn set_environment_entry(
        &self,
        name: impl Into<String>,
        entry: EnvironmentEntry,
    ) -> Result<(), Error> {
        self.inner.frozen.check_mutable("trace class")?;
        self.inner.state.lock().environment.insert(name.into(), entry);
        Ok(())
    }

    pub fn assigns_automatic_stream_class_id(&self) -> bool {
        self.inner.state.lock().assigns_automatic_stream_class_id
    }

    pub fn set_assigns_automatic_stream_class_id(&self, assigns: bool) -> Result<(), Error> {
        self.inner.frozen.check_mutable("trace class")?;
        self.inner.state.lock().assigns_automatic_stream_class_id = assigns;
        Ok(())
    }

    /// A new stream class with an automatically assigned id.
    pub fn create_stream_class(&self) -> Result<StreamClass, Error> {
        self.inner.frozen.check_mutable("trace class")?;
        if !self.assigns_automatic_stream_class_id() {
            return Err(Error::invalid_params(
                "trace class assigns stream class ids manually",
            ));
        }
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.next_automatic_stream_class_id;
            state.next_automatic_stream_class_id += 1;
            id
        };
        let stream_class = StreamClass::new(id, Arc::downgrade(&self.inner));
        self.inner.stream_classes.lock().push(stream_class.clone());
        Ok(stream_class)
    }

    pub fn create_stream_class_with_id(&self, id: u64) -> Result<StreamClass, Error> {
        self.inner.frozen.check_mutable("trace class")?;
        if self.assigns_automatic_stream_class_id() {
            return Err(Error::invalid_params(
                "trace class assigns stream class ids automatically",
            ));
        }
        if self.stream_class_by_id(id).is_some() {
            return Err(Error::invalid_params(format!(
                "stream class id {id} is already used"
            )));
        }
        let stream_class = StreamClass::new(id, Arc::downgrade(&self.inner));
        self.inner.stream_classes.lock().push(stream_class.clone());
        Ok(stream_class)
    }

    pub fn stream_classes(&self) -> Vec<StreamClass> {
        self.inner.stream_classes.lock().clone()
    }

    pub fn stream_class_by_id(&self, id: u64) -> Option<StreamClass> {
        self.inner
            .stream_classes
            .lock()
            .iter()
            .find(|sc| sc.id() == id)
            .cloned()
    }

    /// Registers a listener invoked when the trace class is destroyed.
    ///
    /// The listener must not retain the trace class.
    pub fn add_destruction_listener(
        &self,
        listener: impl FnMut() + Send + 'static,
    ) -> DestructionListenerId {
        let mut listeners = self.inner.destruction_listeners.lock();
        listeners.push(Some(Box::new(listener)));
        DestructionListenerId(listeners.len() as u64 - 1)
    }

    pub fn remove_destruction_listener(&self, id: DestructionListenerId) -> Result<(), Error> {
        let mut listeners = self.inner.destruction_listeners.lock();
        match listeners.get_mut(id.0 as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(Error::invalid_params(format!(
                "no destruction listener with id {id}"
            ))),
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.is_frozen()
    }

    /// Freezes the trace class and every descendant class.
    pub(crate) fn freeze(&self) {
        self.inner.frozen.freeze();
        for stream_class in self.inner.stream_classes.lock().iter() {
            stream_class.freeze();
        }
    }

    pub fn ptr_eq(&self, other: &TraceClass) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Drop for TraceClassInner {
    fn drop(&mut self) {
        let mut listeners = std::mem::take(&mut *self.destruction_listeners.lock());
        for listener in listeners.iter_mut().flatten() {
            listener();
        }
    }
}

/// An instance of a trace class; streams are created through it.
#[derive(Clone, Debug)]
pub struct Trace {
    inner: Arc<TraceInner>,
}

#[derive(Debug)]
struct TraceInner {
    class: TraceClass,
    frozen: FreezeFlag,
    state: Mutex<TraceState>,
}

#[derive(Debug, Default)]
struct TraceState {
    name: Option<String>,
    streams: Vec<Weak<StreamInner>>,
    next_automatic_stream_ids: HashMap<u64, u64>,
}

impl Trace {
    pub fn new(class: &TraceClass) -> Self {
        Trace {
            inner: Arc::new(TraceInner {
                class: class.clone(),
                frozen: FreezeFlag::default(),
                state: Mutex::new(TraceState::default()),
            }),
        }
    }

    pub fn class(&self) -> &TraceClass {
        &self.inner.class
    }

    pub fn name(&self) -> Option<String> {
        self.inner.state.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<(), Error> {
        self.inner.frozen.check_mutable("trace")?;
        self.inner.state.lock().name = Some(name.into());
        Ok(())
    }

    /// A new stream with an automatically assigned id.
    ///
    /// Creating any stream freezes the trace class tree.
    pub fn create_stream(&self, stream_class: &StreamClass) -> Result<Stream, Error> {
        if !stream_class.assigns_automatic_stream_id() {
            return Err(Error::invalid_params(
                "stream class assigns stream ids manually",
            ));
        }
        let id = {
            let mut state = self.inner.state.lock();
            let next = state
                .next_automatic_stream_ids
                .entry(stream_class.id())
                .or_insert(0);
            let id = *next;
            *next += 1;
            id
        };
        self.create_stream_inner(stream_class, id)
    }

    pub fn create_stream_with_id(
        &self,
        stream_class: &StreamClass,
        id: u64,
    ) -> Result<Stream, Error> {
        if stream_class.assigns_automatic_stream_id() {
            return Err(Error::invalid_params(
                "stream class assigns stream ids automatically",
            ));
        }
        if self
            .streams()
            .iter()
            .any(|s| s.class().ptr_eq(stream_class) && s.id() == id)
        {
            return Err(Error::invalid_params(format!(
                "stream id {id} is already used"
            )));
        }
        self.create_stream_inner(stream_class, id)
    }

    fn create_stream_inner(&self, stream_class: &StreamClass, id: u64) -> Result<Stream, Error> {
        let owned = stream_class
            .trace_class()
            .map(|tc| tc.ptr_eq(self.class()))
            .unwrap_or(false);
        if !owned {
            return Err(Error::invalid_params(
                "stream class does not belong to this trace's class",
            ));
        }
        // First instantiation freezes the whole class tree.
        self.class().freeze();
        self.inner.frozen.freeze();
        let stream = Stream::new(id, stream_class.clone(), self.clone());
        self.inner
            .state
            .lock()
            .streams
            .push(Arc::downgrade(&stream.inner));
        Ok(stream)
    }

    /// The streams created from this trace that are still alive.
    pub fn streams(&self) -> Vec<Stream> {
        self.inner
            .state
            .lock()
            .streams
            .iter()
            .filter_map(|weak| weak.upgrade())
            .map(|inner| Stream { inner })
            .collect()
    }

    pub fn ptr_eq(&self, other: &Trace) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU64, Ordering::SeqCst};

    #[test]
    fn stream_creation_freezes_the_class_tree() {
        let tc = TraceClass::new();
        tc.set_name("before").unwrap();
        let sc = tc.create_stream_class().unwrap();
        let ec = sc.create_event_class().unwrap();
        let trace = Trace::new(&tc);
        let _stream = trace.create_stream(&sc).unwrap();

        assert!(tc.is_frozen());
        assert!(sc.is_frozen());
        assert!(ec.is_frozen());
        assert!(matches!(tc.set_name("after"), Err(Error::Frozen(_))));
        assert!(matches!(sc.set_name("after"), Err(Error::Frozen(_))));
        assert!(matches!(ec.set_name("after"), Err(Error::Frozen(_))));
        assert_eq!(tc.name().as_deref(), Some("before"));
    }

    #[test]
    fn automatic_ids_count_up() {
        let tc = TraceClass::new();
        let sc0 = tc.create_stream_class().unwrap();
        let sc1 = tc.create_stream_class().unwrap();
        assert_eq!(sc0.id(), 0);
        assert_eq!(sc1.id(), 1);

        let ec0 = sc0.create_event_class().unwrap();
        let ec1 = sc0.create_event_class().unwrap();
        assert_eq!(ec0.id(), 0);
        assert_eq!(ec1.id(), 1);

        let trace = Trace::new(&tc);
        let s0 = trace.create_stream(&sc0).unwrap();
        let s1 = trace.create_stream(&sc0).unwrap();
        let other = trace.create_stream(&sc1).unwrap();
        assert_eq!(s0.id(), 0);
        assert_eq!(s1.id(), 1);
        assert_eq!(other.id(), 0);
    }

    #[test]
    fn manual_ids_must_be_unique() {
        let tc = TraceClass::new();
        tc.set_assigns_automatic_stream_class_id(false).unwrap();
        let sc = tc.create_stream_class_with_id(9).unwrap();
        assert!(tc.create_stream_class_with_id(9).is_err());
        sc.set_assigns_automatic_stream_id(false).unwrap();

        let trace = Trace::new(&tc);
        let _s = trace.create_stream_with_id(&sc, 3).unwrap();
        assert!(trace.create_stream_with_id(&sc, 3).is_err());
    }

    #[test]
    fn stream_class_from_another_trace_class_is_rejected() {
        let tc = TraceClass::new();
        let other_tc = TraceClass::new();
        let sc = other_tc.create_stream_class().unwrap();
        let trace = Trace::new(&tc);
        assert!(trace.create_stream(&sc).is_err());
    }

    #[test]
    fn destruction_listeners_run_once_on_drop() {
        static CALLS: AtomicU64 = AtomicU64::new(0);
        let tc = TraceClass::new();
        tc.add_destruction_listener(|| {
            CALLS.fetch_add(1, SeqCst);
        });
        let removed = tc.add_destruction_listener(|| {
            CALLS.fetch_add(100, SeqCst);
        });
        tc.remove_destruction_listener(removed).unwrap();
        assert!(tc.remove_destruction_listener(removed).is_err());

        let clone = tc.clone();
        drop(tc);
        assert_eq!(CALLS.load(SeqCst), 0);
        drop(clone);
        assert_eq!(CALLS.load(SeqCst), 1);
    }

    #[test]
    fn environment_preserves_insertion_order() {
        let tc = TraceClass::new();
        tc.set_environment_entry("hostname", EnvironmentEntry::String("dev0".to_owned()))
            .unwrap();
        tc.set_environment_entry("tracer_major", EnvironmentEntry::Integer(2))
            .unwrap();
        let env = tc.environment();
        let keys: Vec<&str> = env.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["hostname", "tracer_major"]);
    }
}
