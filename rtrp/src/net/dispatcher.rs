//! Tag-keyed registry of typed handlers.
//!
//! Each registration captures its own decode function, so the payload of one
//! envelope may be decoded into a different shape by every handler listening
//! on the tag. Handlers run in registration order against a shared mutable
//! context owned by whoever drives the dispatcher (the connection loop).
//!
//! A failing handler never stops the others: decode errors, handler errors
//! and panics are caught, logged, and counted in the [`DispatchReport`].

use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use std::{
    any::Any,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
};

use super::{
    errors::{ClientError, Result},
    messages::{Envelope, MessageType, Timestamp},
};

type Callback<C> = Box<dyn FnMut(&mut C, &str, Timestamp) -> Result<()> + Send>;

/// What happened while dispatching one envelope.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Handlers that ran to completion.
    pub completed: usize,
    /// Errors from handlers that did not.
    pub failures: Vec<ClientError>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.completed + self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Dispatcher<C> {
    handlers: HashMap<MessageType, Vec<Callback<C>>>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Add a handler for `tag`. The payload is decoded into `T` right
    /// before the handler runs.
    pub fn register<T, F>(&mut self, tag: MessageType, mut handler: F) -> &mut Self
    where
        T: DeserializeOwned,
        F: FnMut(&mut C, T, Timestamp) -> Result<()> + Send + 'static,
    {
        let callback: Callback<C> = Box::new(move |context, raw, timestamp| {
            let payload = serde_json::from_str::<T>(raw)
                .map_err(|error| ClientError::decode(tag.as_str(), error))?;
            handler(context, payload, timestamp)
        });
        self.handlers.entry(tag).or_default().push(callback);
        self
    }

    pub fn handler_count(&self, tag: MessageType) -> usize {
        self.handlers.get(&tag).map_or(0, Vec::len)
    }

    /// Run every handler registered for `tag`, in registration order.
    pub fn dispatch(
        &mut self,
        context: &mut C,
        tag: MessageType,
        raw: &str,
        timestamp: Timestamp,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(handlers) = self.handlers.get_mut(&tag) else {
            debug!("No handler registered for message type: {tag}");
            return report;
        };

        for (index, handler) in handlers.iter_mut().enumerate() {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| handler(&mut *context, raw, timestamp)));
            match outcome {
                Ok(Ok(())) => report.completed += 1,
                Ok(Err(failure)) => {
                    warn!("Handler #{index} for {tag} failed: {failure}");
                    report.failures.push(failure);
                }
                Err(panic) => {
                    let reason = panic_reason(panic.as_ref());
                    error!("Handler #{index} for {tag} panicked: {reason}");
                    report.failures.push(ClientError::Handler {
                        tag: tag.as_str().to_string(),
                        reason,
                    });
                }
            }
        }
        report
    }

    /// Resolve the envelope's tag and dispatch it. Unknown tags are logged
    /// and skipped.
    pub fn dispatch_envelope(&mut self, context: &mut C, envelope: &Envelope) -> DispatchReport {
        match envelope.message_type() {
            Ok(tag) => self.dispatch(context, tag, envelope.payload(), envelope.timestamp),
            Err(_) => {
                warn!("No handler registered for message type: {}", envelope.tag);
                DispatchReport::default()
            }
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
