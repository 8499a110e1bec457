//! Process-wide span carrying the component name and build identifier.

use tracing::span::EnteredSpan;

use crate::init::build_sha;

/// Keeps the `filerelay` span entered until dropped.
///
/// Create it once, after [`crate::init_logging`], on the task that runs the
/// relay; every event recorded on that task nests under it.
pub struct GlobalContextGuard {
    _span: EnteredSpan,
}

impl GlobalContextGuard {
    /// Enter the process span tagged with `component`.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        let component = component.into();
        let span = tracing::info_span!("filerelay", component = %component, build_sha = %build_sha());
        Self {
            _span: span.entered(),
        }
    }
}
