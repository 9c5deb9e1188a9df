use bytes::Bytes;
use crossbeam_queue::ArrayQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Default mailbox depth for endpoints without a registered callback.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

pub type EndpointCallback = Box<dyn FnMut(Bytes) + Send>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint {0} is not declared")]
    UnknownEndpoint(String),
    #[error("endpoint {endpoint} rejected send within {timeout:?}")]
    Saturated { endpoint: String, timeout: Duration },
}

struct Endpoint {
    callback: Mutex<Option<EndpointCallback>>,
    mailbox: ArrayQueue<Bytes>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Endpoint {
    fn new(mailbox_capacity: usize) -> Self {
        Self {
            callback: Mutex::new(None),
            mailbox: ArrayQueue::new(mailbox_capacity),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }
}

/// Injected transport surface: named endpoints that deliver serialized
/// frames either to a registered callback (invoked on the sender's thread,
/// so callbacks must be non-blocking) or into a bounded mailbox drained by
/// `drain`. Stands in for the process-wide network layer so the core only
/// ever talks to this interface.
#[derive(Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Arc<Mutex<HashMap<String, Arc<Endpoint>>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&self, name: &str) {
        self.declare_with_capacity(name, DEFAULT_MAILBOX_CAPACITY);
    }

    pub fn declare_with_capacity(&self, name: &str, mailbox_capacity: usize) {
        let mut guard = self.endpoints.lock().unwrap();
        guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Endpoint::new(mailbox_capacity)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.lock().unwrap().contains_key(name)
    }

    fn get(&self, name: &str) -> Result<Arc<Endpoint>, TransportError> {
        self.endpoints
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| TransportError::UnknownEndpoint(name.to_string()))
    }

    /// Delivers a frame. With a callback registered the frame is handed over
    /// synchronously; otherwise it lands in the mailbox, and a full mailbox
    /// reports saturation just like a timed-out network send.
    pub fn send_to(
        &self,
        name: &str,
        frame: Bytes,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let endpoint = self.get(name)?;
        let mut callback = endpoint.callback.lock().unwrap();
        if let Some(cb) = callback.as_mut() {
            cb(frame);
            endpoint.delivered.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        drop(callback);
        match endpoint.mailbox.push(frame) {
            Ok(()) => {
                endpoint.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                endpoint.dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::Saturated {
                    endpoint: name.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Installs a callback, first replaying any frames parked in the mailbox.
    pub fn register_callback(
        &self,
        name: &str,
        mut callback: EndpointCallback,
    ) -> Result<(), TransportError> {
        let endpoint = self.get(name)?;
        let mut slot = endpoint.callback.lock().unwrap();
        while let Some(frame) = endpoint.mailbox.pop() {
            callback(frame);
        }
        *slot = Some(callback);
        Ok(())
    }

    pub fn clear_callback(&self, name: &str) -> Result<(), TransportError> {
        let endpoint = self.get(name)?;
        *endpoint.callback.lock().unwrap() = None;
        Ok(())
    }

    /// Removes and returns every frame parked at a callback-less endpoint.
    pub fn drain(&self, name: &str) -> Result<Vec<Bytes>, TransportError> {
        let endpoint = self.get(name)?;
        let mut frames = Vec::new();
        while let Some(frame) = endpoint.mailbox.pop() {
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn delivered_count(&self, name: &str) -> Result<u64, TransportError> {
        Ok(self.get(name)?.delivered.load(Ordering::Relaxed))
    }

    pub fn dropped_count(&self, name: &str) -> Result<u64, TransportError> {
        Ok(self.get(name)?.dropped.load(Ordering::Relaxed))
    }
}
