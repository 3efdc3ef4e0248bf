use crate::component::ComponentClassRef;
use crate::error::{Actor, Error};
use crate::types::Interruptor;
use crate::value::Value;
use crate::append_cause;
use tracing::debug;

/// Query object through which a source class declares whether it handles a
/// given input, and optionally a group key for coalescing related inputs.
pub const SUPPORT_INFO_QUERY_OBJECT: &str = "babeltrace.support-info";

/// Query object returning per-trace stream groupings and, when computable,
/// the trace's stream intersection range.
pub const TRACE_INFO_QUERY_OBJECT: &str = "babeltrace.trace-info";

/// Performs out-of-band requests against component classes, without
/// instantiating them.
///
/// Executors carry interrupters only; queries are re-entrant across
/// classes.
#[derive(Clone, Debug, Default)]
pub struct QueryExecutor {
    interruptors: Vec<Interruptor>,
}

impl QueryExecutor {
    pub fn new() -> Self {
        QueryExecutor {
            interruptors: Vec::new(),
        }
    }

    pub fn add_interruptor(&mut self, interruptor: Interruptor) {
        self.interruptors.push(interruptor);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interruptors.iter().any(|i| i.is_set())
    }

    /// Synchronously queries `object` on the class.
    pub fn query(
        &self,
        class: &ComponentClassRef,
        object: &str,
        params: &Value,
    ) -> Result<Value, Error> {
        if self.is_interrupted() {
            append_cause!(Actor::Unknown("query"), "query interrupted before dispatch");
            return Err(Error::Canceled);
        }
        debug!(
            class = %format!("{}.{}", class.kind(), class.name()),
            object,
            "Querying component class"
        );
        class.query(object, params, self).map_err(|e| {
            if !matches!(e, Error::InvalidObject(_) | Error::UnsupportedFeature(_)) {
                append_cause!(
                    Actor::ComponentClass {
                        class: format!("{}.{}", class.kind(), class.name()),
                    },
                    "query `{object}` failed"
                );
            }
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentClass, Source, SourceClass};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    struct EchoClass;

    impl ComponentClass for EchoClass {
        fn name(&self) -> &str {
            "echo"
        }

        fn query(
            &self,
            object: &str,
            params: &Value,
            _executor: &QueryExecutor,
        ) -> Result<Value, Error> {
            match object {
                "echo-params" => Ok(params.clone()),
                _ => Err(Error::InvalidObject(object.to_owned())),
            }
        }
    }

    impl SourceClass for EchoClass {
        fn instantiate(&self) -> Result<Box<dyn Source>, Error> {
            Err(Error::UnsupportedFeature("query-only class"))
        }
    }

    #[test]
    fn query_dispatches_to_the_class() {
        let class = ComponentClassRef::Source(Arc::new(EchoClass));
        let executor = QueryExecutor::new();
        let mut params = Value::map();
        params.insert("input".to_owned(), "/x".into());
        let result = executor
            .query(&class, "echo-params", &Value::Map(params.clone()))
            .unwrap();
        assert_eq!(result, Value::Map(params));
    }

    #[test]
    fn unknown_objects_are_invalid() {
        let class = ComponentClassRef::Source(Arc::new(EchoClass));
        let executor = QueryExecutor::new();
        assert!(matches!(
            executor.query(&class, "nope", &Value::Null),
            Err(Error::InvalidObject(_))
        ));
    }

    #[test]
    fn interrupted_executor_cancels() {
        let class = ComponentClassRef::Source(Arc::new(EchoClass));
        let mut executor = QueryExecutor::new();
        let interruptor = Interruptor::new();
        executor.add_interruptor(interruptor.clone());
        interruptor.set();
        assert!(matches!(
            executor.query(&class, "echo-params", &Value::Null),
            Err(Error::Canceled)
        ));
    }
}
