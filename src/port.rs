use crate::component::{Component, ComponentEntry};
use crate::connection::{Connection, ConnectionInner};
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug)]
pub(crate) struct PortInner {
    pub(crate) name: String,
    pub(crate) direction: PortDirection,
    pub(crate) component: Weak<ComponentEntry>,
    pub(crate) connection: Mutex<Option<Weak<ConnectionInner>>>,
    pub(crate) user_data: Value,
}

impl PortInner {
    pub(crate) fn new(
        name: String,
        direction: PortDirection,
        component: Weak<ComponentEntry>,
        user_data: Value,
    ) -> Arc<Self> {
        Arc::new(PortInner {
            name,
            direction,
            component,
            connection: Mutex::new(None),
            user_data,
        })
    }

    pub(crate) fn connection(&self) -> Option<Connection> {
        self.connection
            .lock()
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .map(Connection::from_inner)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connection().is_some()
    }
}

macro_rules! port_handle {
    ($name:ident, $direction:expr) => {
        #[derive(Clone, Debug)]
        pub struct $name {
            pub(crate) inner: Arc<PortInner>,
        }

        impl $name {
            pub(crate) fn from_inner(inner: Arc<PortInner>) -> Self {
                debug_assert_eq!(inner.direction, $direction);
                $name { inner }
            }

            pub fn name(&self) -> &str {
                &self.inner.name
            }

            pub fn direction(&self) -> PortDirection {
                $direction
            }

            /// The owning component; `None` once it has been destroyed.
            pub fn component(&self) -> Option<Component> {
                self.inner.component.upgrade().map(Component::from_inner)
            }

            pub fn is_connected(&self) -> bool {
                self.inner.is_connected()
            }

            pub fn connection(&self) -> Option<Connection> {
                self.inner.connection()
            }

            /// Opaque data attached when the port was added.
            pub fn user_data(&self) -> &Value {
                &self.inner.user_data
            }

            pub fn ptr_eq(&self, other: &$name) -> bool {
                Arc::ptr_eq(&self.inner, &other.inner)
            }
        }
    };
}

port_handle!(InputPort, PortDirection::Input);
port_handle!(OutputPort, PortDirection::Output);
