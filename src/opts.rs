use crate::config::{ComponentSpec, ConnectionRule};
use crate::types::{LoggingLevel, RetryDurationUs};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(
    version,
    about = "Process traces through a component graph",
    disable_help_subcommand = true
)]
pub struct Opts {
    /// Logging level (T|D|I|W|E|F|N or full names)
    #[clap(
        long,
        name = "log-level",
        env = "TRACEGRAPH_CLI_LOG_LEVEL",
        global = true
    )]
    pub log_level: Option<LoggingLevel>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run an explicitly specified component graph
    Run(RunOpts),

    /// Discover sources for the given inputs and run a default graph
    Convert(ConvertOpts),

    /// List known plugins and their component classes
    ListPlugins,

    /// Show help for a plugin or a component class
    Help(HelpOpts),

    /// Perform a single query on a component class and print the result
    Query(QueryOpts),

    /// Print a trace's metadata text (thin metadata-info query wrapper)
    PrintCtfMetadata(PrintCtfMetadataOpts),

    /// Print remote tracing sessions (thin sessions query wrapper)
    PrintLttngLiveSessions(PrintLttngLiveSessionsOpts),
}

fn parse_component_spec(
    s: &str,
) -> Result<ComponentSpec, Box<dyn std::error::Error + Send + Sync + 'static>> {
    Ok(s.parse::<ComponentSpec>()?)
}

fn parse_connection_rule(
    s: &str,
) -> Result<ConnectionRule, Box<dyn std::error::Error + Send + Sync + 'static>> {
    Ok(s.parse::<ConnectionRule>()?)
}

#[derive(Args, Debug, Clone)]
pub struct RunOpts {
    /// Add a component to the graph
    #[clap(
        long = "component",
        value_name = "[NAME:]KIND.PLUGIN.CLASS",
        value_parser = parse_component_spec,
        help_heading = "GRAPH CONFIGURATION"
    )]
    pub components: Vec<ComponentSpec>,

    /// Set initialization parameters on the most recently specified
    /// component
    #[clap(
        long = "params",
        value_name = "KEY=VAL[,KEY=VAL...]",
        help_heading = "GRAPH CONFIGURATION"
    )]
    pub params: Vec<String>,

    /// Connect component ports
    #[clap(
        long = "connect",
        name = "UP[.PORT]:DOWN[.PORT]",
        value_parser = parse_connection_rule,
        help_heading = "GRAPH CONFIGURATION"
    )]
    pub connects: Vec<ConnectionRule>,

    /// When the graph needs to be run again later, sleep this long first
    #[clap(
        long,
        name = "retry-duration-us",
        default_value_t,
        help_heading = "EXECUTION"
    )]
    pub retry_duration_us: RetryDurationUs,

    /// Only process events within each trace's stream intersection range
    #[clap(long, help_heading = "EXECUTION")]
    pub stream_intersection: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ConvertOpts {
    /// Only consider source classes from this plugin during discovery
    #[clap(long, name = "source-plugin", help_heading = "SOURCE DISCOVERY")]
    pub source_plugin: Option<String>,

    /// Only consider source classes with this name during discovery
    #[clap(long, name = "source-class", help_heading = "SOURCE DISCOVERY")]
    pub source_class: Option<String>,

    /// When the graph needs to be run again later, sleep this long first
    #[clap(
        long,
        name = "retry-duration-us",
        default_value_t,
        help_heading = "EXECUTION"
    )]
    pub retry_duration_us: RetryDurationUs,

    /// Only process events within each trace's stream intersection range
    #[clap(long, help_heading = "EXECUTION")]
    pub stream_intersection: bool,

    /// Trace inputs: arbitrary strings, file paths, or directory paths
    #[clap(name = "inputs", required = true)]
    pub inputs: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct HelpOpts {
    /// `PLUGIN` or `KIND.PLUGIN.CLASS`
    #[clap(name = "what")]
    pub what: String,
}

#[derive(Args, Debug, Clone)]
pub struct QueryOpts {
    /// Component class to query: KIND.PLUGIN.CLASS
    #[clap(name = "KIND.PLUGIN.CLASS", value_parser = parse_component_spec)]
    pub class: ComponentSpec,

    /// Query object name
    #[clap(name = "object")]
    pub object: String,

    /// Query parameters: KEY=VAL[,KEY=VAL...]
    #[clap(long = "params", name = "KEY=VAL[,KEY=VAL...]")]
    pub params: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PrintCtfMetadataOpts {
    /// Path to a trace directory
    #[clap(name = "path")]
    pub path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct PrintLttngLiveSessionsOpts {
    /// Remote session URL
    #[clap(name = "url")]
    pub url: String,
}
