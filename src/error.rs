use std::cell::RefCell;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The operation was canceled by an interrupter")]
    Canceled,

    #[error("Unknown query object `{0}`")]
    InvalidObject(String),

    #[error("Invalid parameters. {0}")]
    InvalidParams(String),

    #[error("Unsupported feature. {0}")]
    UnsupportedFeature(&'static str),

    #[error("Memory allocation failure")]
    Memory,

    #[error("{0} is frozen and can no longer be mutated")]
    Frozen(&'static str),

    #[error("A component named `{0}` already exists in the graph")]
    DuplicateComponentName(String),

    #[error("No component class named `{0}` was found")]
    UnknownComponentClass(String),

    #[error("No plugin named `{0}` was found")]
    UnknownPlugin(String),

    #[error("Component `{component}` has no port named `{port}`")]
    UnknownPort { component: String, port: String },

    #[error("Port `{0}` is already connected")]
    PortConnected(String),

    #[error("Port `{0}` is not connected")]
    PortNotConnected(String),

    #[error("Component `{component}` refused the connection on port `{port}`")]
    PortConnectionRefused { component: String, port: String },

    #[error("The graph is not in the configuring state")]
    GraphNotConfiguring,

    #[error("The graph is faulty and can no longer be used")]
    GraphFaulty,

    #[error("The graph has no sink component")]
    GraphNoSink,

    #[error("The graph already has a consumer")]
    GraphConsumerExists,

    #[error("The message batch is full")]
    BatchFull,

    #[error("Clock cycles are outside of the convertible nanosecond range")]
    ClockOverflow,

    #[error("{0}")]
    Msg(String),
}

impl Error {
    pub fn msg(msg: impl Into<String>) -> Self {
        Error::Msg(msg.into())
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Error::InvalidParams(msg.into())
    }
}

/// Who appended an error cause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Actor {
    /// Library code outside of any component, identified by module.
    Unknown(&'static str),
    Component {
        name: String,
        class: String,
    },
    ComponentClass {
        class: String,
    },
    MessageIterator {
        component: String,
        port: String,
    },
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Unknown(module) => write!(f, "[{module}]"),
            Actor::Component { name, class } => write!(f, "[component {name} ({class})]"),
            Actor::ComponentClass { class } => write!(f, "[component class {class}]"),
            Actor::MessageIterator { component, port } => {
                write!(f, "[message iterator {component}.{port}]")
            }
        }
    }
}

/// One entry of the thread-local error-cause stack.
///
/// Causes accumulate deepest-first: the failing leaf appends before its
/// callers wrap, so printing in insertion order goes from root cause to the
/// most recent context.
#[derive(Clone, Debug)]
pub struct ErrorCause {
    pub actor: Actor,
    pub file: &'static str,
    pub line: u32,
    pub message: String,
}

impl std::fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} ({}:{})",
            self.actor, self.message, self.file, self.line
        )
    }
}

thread_local! {
    static ERROR_CAUSES: RefCell<Vec<ErrorCause>> = RefCell::new(Vec::new());
}

pub fn append_error_cause(cause: ErrorCause) {
    ERROR_CAUSES.with(|causes| causes.borrow_mut().push(cause));
}

/// Drains the current thread's cause stack, root cause first.
pub fn take_error_causes() -> Vec<ErrorCause> {
    ERROR_CAUSES.with(|causes| causes.borrow_mut().drain(..).collect())
}

pub fn clear_error_causes() {
    ERROR_CAUSES.with(|causes| causes.borrow_mut().clear());
}

/// Appends a cause to the thread-local stack, capturing the call site.
#[macro_export]
macro_rules! append_cause {
    ($actor:expr, $($arg:tt)*) => {
        $crate::error::append_error_cause($crate::error::ErrorCause {
            actor: $actor,
            file: file!(),
            line: line!(),
            message: format!($($arg)*),
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cause_stack_is_root_first() {
        clear_error_causes();
        append_cause!(Actor::Unknown("leaf"), "root cause");
        append_cause!(
            Actor::Component {
                name: "src".to_owned(),
                class: "source.test.scripted".to_owned()
            },
            "wrapped"
        );
        let causes = take_error_causes();
        assert_eq!(causes.len(), 2);
        assert_eq!(causes[0].message, "root cause");
        assert_eq!(causes[1].message, "wrapped");
        assert!(take_error_causes().is_empty());
    }

    #[test]
    fn actor_display() {
        let actor = Actor::MessageIterator {
            component: "mux".to_owned(),
            port: "out".to_owned(),
        };
        assert_eq!(actor.to_string(), "[message iterator mux.out]");
    }
}
