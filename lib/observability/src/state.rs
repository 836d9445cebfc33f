use std::sync::Mutex;
use std::time::Instant;

use once_cell::sync::Lazy;

/// A named state a pipeline component can be in, used for state-duration
/// logging. Implementors are typically a small `enum` per component (e.g.
/// a sequencer's `WaitingForCommand` / `BlockContextTxs` / ... states).
pub trait ComponentState: std::fmt::Debug + Clone + Send + Sync + 'static {
    fn as_str(&self) -> &'static str;
}

/// Tracks how long a single component instance has spent in its current
/// state. Cheap to clone; intended to be held by the task driving the
/// component and updated at each state transition.
#[derive(Clone)]
pub struct ComponentStateHandle<S: ComponentState> {
    component: &'static str,
    current: std::sync::Arc<Mutex<(S, Instant)>>,
}

impl<S: ComponentState> ComponentStateHandle<S> {
    /// Transitions to `state`, logging how long the previous state lasted.
    pub fn enter_state(&self, state: S) {
        let mut guard = self.current.lock().unwrap();
        let (previous, entered_at) = &*guard;
        tracing::debug!(
            component = self.component,
            from = previous.as_str(),
            to = state.as_str(),
            elapsed_ms = entered_at.elapsed().as_millis() as u64,
            "component state transition"
        );
        *guard = (state, Instant::now());
    }

    /// Returns the current state.
    pub fn current(&self) -> S {
        self.current.lock().unwrap().0.clone()
    }
}

/// Process-wide registry handing out per-component state handles.
///
/// This is a thin convenience wrapper: unlike `CoreMetrics` it doesn't
/// register anything with the metrics exporter, it only structures the
/// `tracing` events that a state machine emits on transition.
pub struct ComponentStateReporter;

static GLOBAL: Lazy<ComponentStateReporter> = Lazy::new(|| ComponentStateReporter);

impl ComponentStateReporter {
    pub fn global() -> &'static ComponentStateReporter {
        &GLOBAL
    }

    /// Creates a handle for `component`, starting in `initial`.
    pub fn handle_for<S: ComponentState>(
        &self,
        component: &'static str,
        initial: S,
    ) -> ComponentStateHandle<S> {
        tracing::info!(component, state = initial.as_str(), "component starting");
        ComponentStateHandle {
            component,
            current: std::sync::Arc::new(Mutex::new((initial, Instant::now()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum DemoState {
        Idle,
        Busy,
    }

    impl ComponentState for DemoState {
        fn as_str(&self) -> &'static str {
            match self {
                DemoState::Idle => "idle",
                DemoState::Busy => "busy",
            }
        }
    }

    #[test]
    fn tracks_current_state_across_transitions() {
        let handle = ComponentStateReporter::global().handle_for("demo", DemoState::Idle);
        assert_eq!(handle.current(), DemoState::Idle);
        handle.enter_state(DemoState::Busy);
        assert_eq!(handle.current(), DemoState::Busy);
    }
}
