use crate::error::Result;
use crate::metrics::StreamMetrics;
use crate::sink::SinkEngine;
use crate::source::SourceEngine;
use crate::transform::TransformStage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Orchestrates source-to-sink links.
///
/// A link forces the source into flowing mode, forwards its data into the
/// sink, gates the source when the sink refuses a write, releases the gate
/// on the sink's drain, and turns the source's `End` into `sink.end()`.
/// Either side's error severs the link and surfaces on the other side.
pub struct Pipeline {
    metrics: Option<StreamMetrics>,
}

impl Pipeline {
    /// Create an orchestrator
    pub fn new() -> Self {
        Self { metrics: None }
    }

    /// Report forwarded chunks, stalls, and drains into `metrics`
    pub fn with_metrics(mut self, metrics: StreamMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Link `source` to `sink`. Fails when the source already has an
    /// active link; a source feeds at most one sink at a time.
    pub fn connect(&self, source: &SourceEngine, sink: &SinkEngine) -> Result<PipelineLink> {
        source.attach_link()?;
        let active = Arc::new(AtomicBool::new(true));

        // drain reopens the gate; wired before data so a flush that gates
        // mid-stream can always be released
        {
            let active = Arc::clone(&active);
            let source = source.clone();
            let metrics = self.metrics.clone();
            sink.on_drain(move || {
                if !active.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(metrics) = &metrics {
                    metrics.record_drain();
                }
                source.ungate();
            });
        }

        {
            let active = Arc::clone(&active);
            let sink = sink.clone();
            source.on_end(move || {
                if !active.load(Ordering::Relaxed) {
                    return;
                }
                if let Err(error) = sink.end(None) {
                    tracing::debug!(error = %error, "sink already ended");
                }
            });
        }

        {
            let active = Arc::clone(&active);
            let source = source.clone();
            let cb_source = source.clone();
            let sink = sink.clone();
            source.on_error(move |error| {
                if active.swap(false, Ordering::Relaxed) {
                    cb_source.detach_link();
                    sink.fail(error.clone());
                }
            });
        }

        {
            let active = Arc::clone(&active);
            let source = source.clone();
            sink.on_error(move |error| {
                if active.swap(false, Ordering::Relaxed) {
                    source.detach_link();
                    source.fail(error.clone());
                }
            });
        }

        // wired last: registering the data consumer resumes the source and
        // flushes any backlog through the link
        {
            let active = Arc::clone(&active);
            let gate_source = source.clone();
            let sink = sink.clone();
            let metrics = self.metrics.clone();
            source.on_data(move |chunk| {
                if !active.load(Ordering::Relaxed) {
                    return;
                }
                match sink.write(chunk.clone()) {
                    Ok(true) => {
                        if let Some(metrics) = &metrics {
                            metrics.record_chunk(chunk.len());
                        }
                    }
                    Ok(false) => {
                        if let Some(metrics) = &metrics {
                            metrics.record_chunk(chunk.len());
                            metrics.record_stall();
                        }
                        gate_source.gate();
                    }
                    Err(error) => {
                        active.store(false, Ordering::Relaxed);
                        gate_source.detach_link();
                        gate_source.fail(error);
                    }
                }
            });
        }

        tracing::debug!("pipeline connected");
        Ok(PipelineLink {
            active,
            source: source.clone(),
            sink: sink.clone(),
        })
    }

    /// Link a source through a transform stage into a sink
    pub fn connect_through(
        &self,
        source: &SourceEngine,
        stage: &TransformStage,
        sink: &SinkEngine,
    ) -> Result<(PipelineLink, PipelineLink)> {
        let tail = self.connect(stage.source(), sink)?;
        let head = self.connect(source, stage.sink())?;
        Ok((head, tail))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an established source-to-sink link
pub struct PipelineLink {
    active: Arc<AtomicBool>,
    source: SourceEngine,
    sink: SinkEngine,
}

impl PipelineLink {
    /// Sever the link: the wired callbacks become inert and the source
    /// returns to paused mode, free to be linked again.
    pub fn disconnect(&self) {
        if !self.active.swap(false, Ordering::Relaxed) {
            return;
        }
        self.source.detach_link();
        tracing::debug!("pipeline disconnected");
    }

    /// Whether the link is still forwarding
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// The linked source
    pub fn source(&self) -> &SourceEngine {
        &self.source
    }

    /// The linked sink
    pub fn sink(&self) -> &SinkEngine {
        &self.sink
    }
}
