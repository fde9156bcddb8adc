use std::sync::Arc;

use parking_lot::RwLock;

type ScanningListener = Arc<dyn Fn(bool) + Send + Sync>;
type ChangedListener = Arc<dyn Fn() + Send + Sync>;

/// Observers of scan progress and catalog replacement.
///
/// Listeners are called in registration order on the thread that ran the
/// scan, with no library lock held.
#[derive(Default)]
pub(crate) struct Listeners {
    scanning: RwLock<Vec<ScanningListener>>,
    changed: RwLock<Vec<ChangedListener>>,
}

impl Listeners {
    pub(crate) fn add_scanning<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.scanning.write().push(Arc::new(listener));
    }

    pub(crate) fn add_changed<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.changed.write().push(Arc::new(listener));
    }

    pub(crate) fn scanning_changed(&self, is_scanning: bool) {
        let listeners = self.scanning.read().clone();
        for listener in listeners {
            listener(is_scanning);
        }
    }

    pub(crate) fn library_changed(&self) {
        let listeners = self.changed.read().clone();
        for listener in listeners {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn listeners_run_in_registration_order() {
        let listeners = Listeners::default();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for index in 0..3 {
            let calls = Arc::clone(&calls);
            listeners.add_changed(move || calls.lock().push(index));
        }
        listeners.library_changed();
        assert_eq!(*calls.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn scanning_listeners_receive_the_flag() {
        let listeners = Listeners::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        listeners.add_scanning(move |flag| sink.lock().push(flag));
        listeners.scanning_changed(true);
        listeners.scanning_changed(false);
        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[test]
    fn listener_may_register_another_listener() {
        let listeners = Arc::new(Listeners::default());
        let hits = Arc::new(Mutex::new(0));
        let inner = Arc::clone(&listeners);
        let counter = Arc::clone(&hits);
        listeners.add_changed(move || {
            let counter = Arc::clone(&counter);
            inner.add_changed(move || *counter.lock() += 1);
        });

        listeners.library_changed();
        assert_eq!(*hits.lock(), 0);
        listeners.library_changed();
        assert_eq!(*hits.lock(), 1);
    }
}
