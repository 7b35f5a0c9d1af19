use crate::{
    diagnostics::{CaptureMode, DiagnosticSink, Snapshot},
    types::*,
};

/// # Diagnostic capture
/// Records a [Snapshot] of the logits into a [DiagnosticSink] and leaves them
/// untouched. It belongs at the very end of a pipeline, after any final
/// normalization, so the snapshot is exactly what the token is drawn from.
///
/// **Properties**:
/// - Observes logits
///
/// **Parameters**:
/// - `sequence`: Slot in the sink this stage writes to.
/// - `mode`: Whole vector or top-K entries. (default: `TopK(10)`)
#[derive(Debug, Clone)]
pub struct SampleCapture {
    pub(crate) sink: DiagnosticSink,
    pub(crate) sequence: usize,
    pub(crate) mode: CaptureMode,
}

impl SampleCapture {
    pub fn new(sink: DiagnosticSink, sequence: usize, mode: CaptureMode) -> Self {
        Self {
            sink,
            sequence,
            mode,
        }
    }

    pub fn sink(&self) -> &DiagnosticSink {
        &self.sink
    }

    pub fn sequence(&self) -> usize {
        self.sequence
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }
}

impl Sampler for SampleCapture {
    fn sample<'a>(
        &mut self,
        _res: &mut dyn HasSamplerResources,
        logits: &'a mut Logits,
    ) -> anyhow::Result<&'a mut Logits> {
        self.sink
            .finish_step(self.sequence, Snapshot::capture(logits, self.mode)?)?;
        Ok(logits)
    }
}
