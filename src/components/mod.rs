//! Built-in `utils` plugin: small general-purpose components used by the
//! CLI and by tests.

use crate::plugin::Plugin;
use std::sync::Arc;

pub mod counter;
pub mod dummy;
pub mod muxer;
pub mod trimmer;

pub use counter::CounterSinkClass;
pub use dummy::DummySinkClass;
pub use muxer::MuxerFilterClass;
pub use trimmer::TrimmerFilterClass;

pub fn utils_plugin() -> Plugin {
    let mut plugin = Plugin::new("utils", "Graph utilities");
    plugin
        .add_sink_class(Arc::new(DummySinkClass))
        .expect("built-in class names are unique");
    plugin
        .add_sink_class(Arc::new(CounterSinkClass))
        .expect("built-in class names are unique");
    plugin
        .add_filter_class(Arc::new(TrimmerFilterClass))
        .expect("built-in class names are unique");
    plugin
        .add_filter_class(Arc::new(MuxerFilterClass))
        .expect("built-in class names are unique");
    plugin
}
