use tracing::Dispatch;

/// Handle to the `tracing` dispatcher a component reports to.
///
/// Every block and proposal keeps its own handle instead of relying on a
/// process-wide logger. By default the handle captures whatever dispatcher is
/// the current default when the component is created, so applications that
/// install a global subscriber need not do anything. Tests can hand in their
/// own dispatcher to observe warnings in isolation.
#[derive(Clone, Debug)]
pub struct Diagnostics {
    dispatch: Dispatch,
}

impl Diagnostics {
    pub fn new(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }

    /// Capture the dispatcher that is currently the default for this thread.
    pub fn current() -> Self {
        Self {
            dispatch: tracing::dispatcher::get_default(|dispatch| dispatch.clone()),
        }
    }

    /// A handle that drops every event.
    pub fn silent() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    /// Run `f` with this handle's dispatcher as the default, so that any
    /// `tracing` macro inside it reports there.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::current()
    }
}
