//! # Duplex Port
//!
//! Folds "register a handler for inbound values" and "send a value" into a
//! single handle. Ports chain into one another, which is how a generic
//! transport gets bridged into a session.
//!
//! Errors from either side propagate unchanged; the port adds no handling of
//! its own.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::error::Result;

/// Something a port can deliver values to.
pub type Handler<T> = Arc<dyn Fn(T) -> Result<()> + Send + Sync>;

type Register<T> = Arc<dyn Fn(Handler<T>) -> Result<()> + Send + Sync>;

/// What a port was handed: a handler to subscribe, or a value to publish.
pub enum Input<T> {
    Handler(Handler<T>),
    Value(T),
}

pub struct Duplex<T> {
    register: Register<T>,
    send: Handler<T>,
}

impl<T> Clone for Duplex<T> {
    fn clone(&self) -> Self {
        Self {
            register: self.register.clone(),
            send: self.send.clone(),
        }
    }
}

impl<T: Send + 'static> Duplex<T> {
    pub fn new<R, S>(register: R, send: S) -> Self
    where
        R: Fn(Handler<T>) -> Result<()> + Send + Sync + 'static,
        S: Fn(T) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            register: Arc::new(register),
            send: Arc::new(send),
        }
    }

    /// Subscribes a handler or publishes a value, depending on `input`.
    pub fn port(&self, input: Input<T>) -> Result<()> {
        match input {
            Input::Handler(handler) => (self.register)(handler),
            Input::Value(value) => (self.send)(value),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(T) -> Result<()> + Send + Sync + 'static,
    {
        self.port(Input::Handler(Arc::new(handler)))
    }

    pub fn publish(&self, value: T) -> Result<()> {
        self.port(Input::Value(value))
    }

    /// This port as a plain dispatch target.
    pub fn handler(&self) -> Handler<T> {
        self.send.clone()
    }

    /// Feeds everything `self` emits into `other`, returning `other` so pipes chain.
    pub fn pipe<'a>(&self, other: &'a Duplex<T>) -> Result<&'a Duplex<T>> {
        self.port(Input::Handler(other.handler()))?;
        Ok(other)
    }

    /// Views this port through a pair of conversions.
    ///
    /// `outbound` converts what `self` emits, `inbound` converts what is sent
    /// into the new port before it reaches `self`.
    pub fn map<U, O, I>(&self, outbound: O, inbound: I) -> Duplex<U>
    where
        U: Send + 'static,
        O: Fn(T) -> U + Send + Sync + 'static,
        I: Fn(U) -> T + Send + Sync + 'static,
    {
        let register = self.register.clone();
        let send = self.send.clone();
        let outbound = Arc::new(outbound);
        Duplex::new(
            move |handler: Handler<U>| {
                let outbound = outbound.clone();
                register(Arc::new(move |value: T| handler(outbound(value))))
            },
            move |value: U| send(inbound(value)),
        )
    }
}

/// A multi-subscriber emitter: the register side of a session's port.
pub struct Signal<T> {
    handlers: Arc<DashMap<u64, Handler<T>>>,
    next: Arc<AtomicU64>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            next: self.next.clone(),
        }
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self {
            handlers: Arc::new(DashMap::new()),
            next: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, returning a token for [`Signal::unsubscribe`].
    pub fn subscribe(&self, handler: Handler<T>) -> u64 {
        let token = self.next.fetch_add(1, Ordering::Relaxed);
        self.handlers.insert(token, handler);
        token
    }

    pub fn unsubscribe(&self, token: u64) -> bool {
        self.handlers.remove(&token).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Delivers `value` to every handler in subscription order.
    ///
    /// Handlers are cloned out first, so one may subscribe or emit again
    /// without deadlocking. The first failure stops delivery.
    pub fn emit(&self, value: T) -> Result<()> {
        let mut handlers: Vec<(u64, Handler<T>)> = self
            .handlers
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handlers.sort_by_key(|(token, _)| *token);

        for (_, handler) in handlers {
            handler(value.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::Error;

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, Handler<i32>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let handler: Handler<i32> = Arc::new(move |v| {
            sink.lock().unwrap().push(v);
            Ok(())
        });
        (log, handler)
    }

    fn signal_port(signal: &Signal<i32>, sent: Handler<i32>) -> Duplex<i32> {
        let signal = signal.clone();
        Duplex::new(
            move |h| {
                signal.subscribe(h);
                Ok(())
            },
            move |v| sent(v),
        )
    }

    #[test]
    fn test_port_dispatches_on_input() {
        let signal = Signal::new();
        let (sent, send) = recorder();
        let port = signal_port(&signal, send);

        let (seen, handler) = recorder();
        port.port(Input::Handler(handler)).unwrap();
        port.port(Input::Value(5)).unwrap();
        signal.emit(9).unwrap();

        assert_eq!(*sent.lock().unwrap(), vec![5]);
        assert_eq!(*seen.lock().unwrap(), vec![9]);
    }

    #[test]
    fn test_pipe_chains() {
        let left = Signal::new();
        let right = Signal::new();
        let (into_left, send_left) = recorder();
        let (into_right, send_right) = recorder();
        let a = signal_port(&left, send_left);
        let b = signal_port(&right, send_right);

        a.pipe(&b).unwrap().pipe(&a).unwrap();
        left.emit(1).unwrap();
        right.emit(2).unwrap();

        assert_eq!(*into_right.lock().unwrap(), vec![1]);
        assert_eq!(*into_left.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_map_converts_both_directions() {
        let signal = Signal::new();
        let (sent, send) = recorder();
        let port = signal_port(&signal, send);
        let wide: Duplex<i64> = port.map(|v: i32| i64::from(v) * 10, |v: i64| v as i32 + 1);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        wide.subscribe(move |v| {
            sink.lock().unwrap().push(v);
            Ok(())
        })
        .unwrap();
        wide.publish(4).unwrap();
        signal.emit(3).unwrap();

        assert_eq!(*sent.lock().unwrap(), vec![5]);
        assert_eq!(*seen.lock().unwrap(), vec![30]);
    }

    #[test]
    fn test_emit_propagates_handler_failure() {
        let signal: Signal<i32> = Signal::new();
        signal.subscribe(Arc::new(|_| Err(Error::ChannelClosed)));
        let (seen, handler) = recorder();
        signal.subscribe(handler);

        assert!(matches!(signal.emit(1), Err(Error::ChannelClosed)));
        assert!(seen.lock().unwrap().is_empty());
    }
}
