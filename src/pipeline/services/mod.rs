pub mod instrumented;
pub mod metrics;
pub mod publish;
pub mod sink;

pub use instrumented::{PublishMetrics, PublishMetricsLayer};
pub use metrics::{PipelineMetrics, PipelineStats};
pub use publish::{ChannelPublisher, PublishReceipt, PublishService, ResultMessage, ResultPublisher};
pub use sink::{InMemorySink, JsonLinesSink, RecordSink, ViolationRecord};
