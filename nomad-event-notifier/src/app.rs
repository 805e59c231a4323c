//! Pipeline assembly.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::mapper::{EventMapper, LinkBuilder};
use crate::notification::build_sink;
use crate::stream::NomadEventSource;
use crate::{Error, Result};

/// Wire source, mapper and sink together and run the dispatcher on its own
/// task until `cancel` fires or a fatal error occurs.
pub async fn run(config: AppConfig, cancel: CancellationToken) -> Result<DispatchReport> {
    let AppConfig {
        stream,
        sink,
        allow,
        severity,
        ui_base,
        dispatcher,
        ..
    } = config;

    let source = NomadEventSource::open(stream)?;
    let mapper = EventMapper::new(allow, severity, LinkBuilder::new(ui_base), sink.destination());
    let sink_type = sink.sink_type();
    let sink = build_sink(&sink)?;

    info!(sink = sink_type, "Notification pipeline starting");
    let dispatcher = Dispatcher::new(source, mapper, sink, dispatcher);

    tokio::spawn(dispatcher.run(cancel))
        .await
        .map_err(|e| Error::Other(format!("Dispatcher task failed: {e}")))?
}
