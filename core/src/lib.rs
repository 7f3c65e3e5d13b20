pub mod alert;
pub mod analysis;
pub mod capture;
pub mod config;
pub mod engine;
pub mod record;
pub mod snapshot;
pub mod window;

pub use alert::{Alert, AlertEngine, Severity};
pub use analysis::{AnalysisReport, FlowAnalyzer, FlowError, FlowNetwork, Thresholds};
pub use capture::RecordCapture;
pub use config::Config;
pub use engine::{MonitorEngine, MonitorState};
pub use record::{CallRecord, EdgeKey, EdgeMetrics, NodeMetrics, NodeStatus, Status};
pub use snapshot::{EdgeView, GraphExport, MonitorStats, NodeView};
pub use window::{SinkMatcher, SlidingWindowGraph};
