use parking_lot::Mutex;
use thiserror::Error;

use crate::error::ApiError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("slot {0} does not exist")]
    NoSuchSlot(usize),
    #[error("slot {0} has no successful result")]
    NotReady(usize),
    #[error("slot {0} has nothing to copy")]
    NothingToCopy(usize),
    #[error("{0}")]
    Export(String),
}

impl From<SinkError> for ApiError {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::NoSuchSlot(_) => ApiError::NotFound(e.to_string()),
            SinkError::NotReady(_) | SinkError::NothingToCopy(_) => ApiError::Conflict(e.to_string()),
            SinkError::Export(msg) => ApiError::Export(msg),
        }
    }
}

/// Where card and batch actions deliver their output: a file download or the clipboard.
pub trait Sink: Send + Sync {
    fn download_text(&self, name: &str, content: &str) -> Result<(), SinkError>;
    fn download_bytes(&self, name: &str, media_type: &str, bytes: &[u8]) -> Result<(), SinkError>;
    fn copy_to_clipboard(&self, text: &str) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Text { name: String, content: String },
    Bytes { name: String, media_type: String, bytes: Vec<u8> },
    Clipboard(String),
}

/// Keeps deliveries in memory; the HTTP layer turns them into response bodies.
#[derive(Debug, Default)]
pub struct MemorySink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl MemorySink {
    pub fn take(&self) -> Option<Delivery> {
        self.deliveries.lock().pop()
    }

    #[cfg(test)]
    pub fn last_text(&self) -> Option<(String, String)> {
        self.deliveries.lock().iter().rev().find_map(|d| match d {
            Delivery::Text { name, content } => Some((name.clone(), content.clone())),
            _ => None,
        })
    }

    #[cfg(test)]
    pub fn last_bytes(&self) -> Option<(String, String, Vec<u8>)> {
        self.deliveries.lock().iter().rev().find_map(|d| match d {
            Delivery::Bytes { name, media_type, bytes } => Some((name.clone(), media_type.clone(), bytes.clone())),
            _ => None,
        })
    }

    #[cfg(test)]
    pub fn clipboard(&self) -> Option<String> {
        self.deliveries.lock().iter().rev().find_map(|d| match d {
            Delivery::Clipboard(text) => Some(text.clone()),
            _ => None,
        })
    }
}

impl Sink for MemorySink {
    fn download_text(&self, name: &str, content: &str) -> Result<(), SinkError> {
        self.deliveries.lock().push(Delivery::Text { name: name.to_string(), content: content.to_string() });
        Ok(())
    }

    fn download_bytes(&self, name: &str, media_type: &str, bytes: &[u8]) -> Result<(), SinkError> {
        self.deliveries.lock().push(Delivery::Bytes {
            name: name.to_string(),
            media_type: media_type.to_string(),
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn copy_to_clipboard(&self, text: &str) -> Result<(), SinkError> {
        self.deliveries.lock().push(Delivery::Clipboard(text.to_string()));
        Ok(())
    }
}
