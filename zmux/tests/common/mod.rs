//! Shared helpers for pool integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use zmux::prelude::*;

/// Connection that records writes and can be told to fail them.
#[derive(Default)]
pub struct Recorder {
    pub received: Mutex<Vec<Msg>>,
    pub attempts: AtomicUsize,
    fail_writes: bool,
}

impl Recorder {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_writes: true,
            ..Self::default()
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|m| m.frame_str(0).unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl Connection for Recorder {
    async fn read_msg(&self) -> Result<Msg> {
        futures::future::pending().await
    }

    async fn write_msg(&self, msg: &Msg) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer").into());
        }
        self.received.lock().push(msg.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Poll `cond` for up to a second.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        compio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
