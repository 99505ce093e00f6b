//! Background server fixture.
//!
//! [`ServerThread`] moves a server [`Link`] onto its own thread and drives
//! [`Link::server_action`] until stopped, so a test can act as the client on
//! its own thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use minipc_core::Link;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A server link being served on a background thread.
pub struct ServerThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Link>>,
}

impl ServerThread {
    pub fn spawn(mut link: Link) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                if let Err(e) = link.server_action(Some(POLL_INTERVAL)) {
                    tracing::error!(error = %e, "test server loop failed");
                    break;
                }
            }
            link
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop serving and hand the link back, still open.
    pub fn stop(mut self) -> Link {
        self.stop.store(true, Ordering::Relaxed);
        self.handle
            .take()
            .expect("server thread already joined")
            .join()
            .expect("server thread panicked")
    }
}

impl Drop for ServerThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
