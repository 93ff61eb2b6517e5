// Observable state holder shared by the stores

use tokio::sync::watch;

/// A value that observers can subscribe to.
///
/// Every mutation goes through [`Observable::update`], which applies the
/// change and notifies subscribers in one step, so a subscriber never sees a
/// half-applied transition.
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T> Observable<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Receive every future state; the current one is marked as seen
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Mutate the value and notify subscribers
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    /// Read the current value without cloning it
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }
}

impl<T: Clone> Observable<T> {
    pub fn snapshot(&self) -> T {
        self.tx.borrow().clone()
    }
}

impl<T: Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// State records that expose a loading flag around in-flight calls
pub trait Loading {
    fn begin_load(&mut self);
    fn end_load(&mut self);
}

/// Holds the loading flag up for as long as it is alive.
///
/// Dropping the guard clears the flag, which also covers an operation whose
/// future is aborted mid-call.
pub struct LoadingGuard<'a, T: Loading> {
    state: &'a Observable<T>,
}

impl<'a, T: Loading> LoadingGuard<'a, T> {
    pub fn begin(state: &'a Observable<T>) -> Self {
        state.update(Loading::begin_load);
        Self { state }
    }
}

impl<T: Loading> Drop for LoadingGuard<'_, T> {
    fn drop(&mut self) {
        self.state.update(Loading::end_load);
    }
}

/// In-flight counter backing a loading flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlight(usize);

impl InFlight {
    /// Register a call; returns the new loading flag
    pub fn enter(&mut self) -> bool {
        self.0 += 1;
        true
    }

    /// Finish a call; returns the new loading flag
    pub fn exit(&mut self) -> bool {
        self.0 = self.0.saturating_sub(1);
        self.0 > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Probe {
        in_flight: InFlight,
        loading: bool,
        value: u32,
    }

    impl Loading for Probe {
        fn begin_load(&mut self) {
            self.loading = self.in_flight.enter();
        }

        fn end_load(&mut self) {
            self.loading = self.in_flight.exit();
        }
    }

    #[test]
    fn test_update_notifies_subscribers() {
        let state = Observable::new(Probe::default());
        let mut rx = state.subscribe();
        assert!(!rx.has_changed().unwrap());

        state.update(|p| p.value = 7);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().value, 7);
        assert_eq!(state.with(|p| p.value), 7);
    }

    #[test]
    fn test_guard_clears_loading_on_drop() {
        let state = Observable::new(Probe::default());
        {
            let _guard = LoadingGuard::begin(&state);
            assert!(state.snapshot().loading);
        }
        assert!(!state.snapshot().loading);
    }

    #[test]
    fn test_overlapping_guards_keep_loading_until_last() {
        let state = Observable::new(Probe::default());
        let first = LoadingGuard::begin(&state);
        let second = LoadingGuard::begin(&state);

        drop(first);
        assert!(state.snapshot().loading);
        drop(second);
        assert!(!state.snapshot().loading);
    }

    #[test]
    fn test_in_flight_never_underflows() {
        let mut counter = InFlight::default();
        assert!(!counter.exit());
        assert!(counter.enter());
        assert!(!counter.exit());
    }
}
