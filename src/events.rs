use std::sync::mpsc::{channel, Receiver, Sender};

/// Handle returned by [`EventDispatcher::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

enum Listener<E> {
    Callback(Box<dyn FnMut(&E) + Send>),
    Channel(Sender<E>),
}

/// Fans events out to any number of listeners, in registration order.
///
/// Callback listeners run inline on the dispatching thread. Channel
/// listeners get a clone of each event and are dropped once their
/// receiver goes away, which is how a UI on another thread consumes events
/// without touching engine state.
pub struct EventDispatcher<E> {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener<E>)>,
}

impl<E: Clone> EventDispatcher<E> {
    pub fn new() -> Self {
        Self { next_id: 0, listeners: Vec::new() }
    }

    pub fn subscribe<F>(&mut self, f: F) -> ListenerId
    where
        F: FnMut(&E) + Send + 'static,
    {
        self.push(Listener::Callback(Box::new(f)))
    }

    pub fn subscribe_channel(&mut self) -> (ListenerId, Receiver<E>) {
        let (tx, rx) = channel();
        (self.push(Listener::Channel(tx)), rx)
    }

    /// Returns `false` if the listener was not registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn dispatch(&mut self, event: &E) {
        self.listeners.retain_mut(|(_, listener)| match listener {
            Listener::Callback(f) => {
                f(event);
                true
            }
            Listener::Channel(tx) => tx.send(event.clone()).is_ok(),
        });
    }

    pub fn dispatch_all(&mut self, events: &[E]) {
        for event in events {
            self.dispatch(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn push(&mut self, listener: Listener<E>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }
}

impl<E: Clone> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}
