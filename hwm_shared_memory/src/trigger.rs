//! Remote triggers: cross-process "call this function" endpoints.
//!
//! A server owns two futex segments, `<name>.req` and `<name>.res`. A client
//! posts the request futex; the server runs its callback and posts the
//! response futex. Servers either run on their own thread (`start_async`) or
//! are polled one request at a time (`query`).

use crate::error::{ShmError, ShmResult};
use crate::futex::BinaryFutex;
use crate::manager::{SharedMemoryManager, segment_path};
use crate::segment::{ReadOnlyMemorySegment, ReadWriteMemorySegment};
use crate::thread::{ThreadOptions, spawn_with_options};
use hwm_common::consts::TRIGGER_WAIT_SLICE;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::error;

/// Suffix of the request futex segment.
pub const REQUEST_SUFFIX: &str = ".req";

/// Suffix of the response futex segment.
pub const RESPONSE_SUFFIX: &str = ".res";

/// Callback run for every request.
pub type TriggerCallback = Box<dyn Fn() + Send + Sync>;

struct ServerShared {
    name: String,
    running: AtomicBool,
    request: ReadOnlyMemorySegment<BinaryFutex>,
    response: ReadWriteMemorySegment<BinaryFutex>,
    callback: TriggerCallback,
}

impl ServerShared {
    /// Wait one slice for a request and serve it. Returns `Ok(true)` if the
    /// callback ran.
    fn serve_once(&self) -> ShmResult<bool> {
        match self.request.value().wait_for(TRIGGER_WAIT_SLICE) {
            Ok(()) => {}
            Err(ShmError::Timeout { .. }) => return Ok(false),
            Err(e) => return Err(e),
        }

        (self.callback)();

        // A failed post leaves the client to time out.
        if let Err(e) = self.response.value().post() {
            error!("Trigger '{}': unable to send response: {e}", self.name);
        }
        Ok(true)
    }

    fn run(&self) {
        while self.running.load(Ordering::Acquire) {
            if let Err(e) = self.serve_once() {
                error!("Trigger '{}': unable to receive request: {e}", self.name);
                self.running.store(false, Ordering::Release);
                return;
            }
        }
    }
}

/// Server side of a remote trigger.
pub struct RemoteTriggerServer {
    shared: Arc<ServerShared>,
    thread: Option<JoinHandle<()>>,
}

impl RemoteTriggerServer {
    /// Create the futex segments of trigger `name` and bind `callback`.
    pub fn create<F>(manager: &mut SharedMemoryManager, name: &str, callback: F) -> ShmResult<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let request_name = format!("{name}{REQUEST_SUFFIX}");
        let response_name = format!("{name}{RESPONSE_SUFFIX}");
        manager.add_segment(&request_name, false, BinaryFutex::new(false))?;
        manager.add_segment(&response_name, false, BinaryFutex::new(false))?;

        let request = manager.get::<BinaryFutex>(&request_name)?;
        let response = manager.get_mut::<BinaryFutex>(&response_name)?;

        Ok(Self {
            shared: Arc::new(ServerShared {
                name: name.to_string(),
                running: AtomicBool::new(false),
                request,
                response,
                callback: Box::new(callback),
            }),
            thread: None,
        })
    }

    /// Trigger name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Serve requests on a new thread until [`stop`](Self::stop).
    pub fn start_async(&mut self, options: &ThreadOptions) -> ShmResult<()> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        match spawn_with_options(options, move || shared.run()) {
            Ok(handle) => {
                self.thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Serve requests on the calling thread until [`stop`](Self::stop) is
    /// called from elsewhere.
    pub fn start(&self) {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.shared.run();
        }
    }

    /// Whether the server loop is running.
    pub fn is_started(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the server loop and join its thread.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Trigger '{}': server thread panicked", self.shared.name);
            }
        }
    }

    /// Wait one slice for a request and serve it.
    ///
    /// Returns `true` if the callback ran. Always `false` while the server
    /// runs its own loop.
    pub fn query(&self) -> bool {
        if self.is_started() {
            return false;
        }
        match self.shared.serve_once() {
            Ok(served) => served,
            Err(e) => {
                error!("Trigger '{}': unable to receive request: {e}", self.shared.name);
                false
            }
        }
    }
}

impl Drop for RemoteTriggerServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Client side of a remote trigger.
pub struct RemoteTriggerClient {
    name: String,
    // Futex operations are atomic; clients share the request segment.
    request: ReadOnlyMemorySegment<BinaryFutex>,
    response: ReadOnlyMemorySegment<BinaryFutex>,
}

impl RemoteTriggerClient {
    /// Attach to trigger `name` of `module_name`.
    pub fn connect(root: &Path, namespace: &str, module_name: &str, name: &str) -> ShmResult<Self> {
        let request_name = format!("{name}{REQUEST_SUFFIX}");
        let response_name = format!("{name}{RESPONSE_SUFFIX}");
        let request = ReadOnlyMemorySegment::attach(
            &segment_path(root, namespace, module_name, &request_name),
            &request_name,
        )?;
        let response = ReadOnlyMemorySegment::attach(
            &segment_path(root, namespace, module_name, &response_name),
            &response_name,
        )?;
        Ok(Self {
            name: name.to_string(),
            request,
            response,
        })
    }

    /// Trigger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post a request and wait for the server to answer.
    pub fn trigger(&self, timeout: Duration) -> ShmResult<()> {
        // Drop a late response from an earlier, timed out request.
        let _ = self.response.value().try_wait();
        self.request.value().post()?;
        self.response.value().wait_for(timeout)
    }

    /// Post a request without waiting for the response.
    pub fn trigger_async(&self) -> ShmResult<()> {
        self.request.value().post()
    }

    /// Wait for the response of an earlier [`trigger_async`](Self::trigger_async).
    pub fn wait_for_response(&self, timeout: Duration) -> ShmResult<()> {
        self.response.value().wait_for(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (SharedMemoryManager, Arc<AtomicUsize>, RemoteTriggerServer) {
        let mut manager = SharedMemoryManager::create(dir.path(), "ns", "module").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let server = RemoteTriggerServer::create(&mut manager, "activate", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (manager, count, server)
    }

    #[test]
    fn creates_request_and_response_segments() {
        let dir = TempDir::new().unwrap();
        let (manager, _, server) = setup(&dir);
        assert_eq!(server.name(), "activate");
        assert!(manager.contains("activate.req"));
        assert!(manager.contains("activate.res"));
    }

    #[test]
    fn async_server_answers_client() {
        let dir = TempDir::new().unwrap();
        let (_manager, count, mut server) = setup(&dir);
        server.start_async(&ThreadOptions::named("activate")).unwrap();
        assert!(server.is_started());

        let client = RemoteTriggerClient::connect(dir.path(), "ns", "module", "activate").unwrap();
        client.trigger(Duration::from_secs(5)).unwrap();
        client.trigger(Duration::from_secs(5)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        server.stop();
        assert!(!server.is_started());
    }

    #[test]
    fn clients_can_share_a_trigger() {
        let dir = TempDir::new().unwrap();
        let (_manager, count, mut server) = setup(&dir);
        server.start_async(&ThreadOptions::named("activate")).unwrap();

        let first = RemoteTriggerClient::connect(dir.path(), "ns", "module", "activate").unwrap();
        let second = RemoteTriggerClient::connect(dir.path(), "ns", "module", "activate").unwrap();
        first.trigger(Duration::from_secs(5)).unwrap();
        second.trigger(Duration::from_secs(5)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        server.stop();
    }

    #[test]
    fn query_serves_single_request() {
        let dir = TempDir::new().unwrap();
        let (_manager, count, server) = setup(&dir);
        let client = RemoteTriggerClient::connect(dir.path(), "ns", "module", "activate").unwrap();

        assert!(!server.query());
        client.trigger_async().unwrap();
        assert!(server.query());
        client.wait_for_response(Duration::from_secs(1)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn client_times_out_without_server() {
        let dir = TempDir::new().unwrap();
        let (_manager, count, _server) = setup(&dir);
        let client = RemoteTriggerClient::connect(dir.path(), "ns", "module", "activate").unwrap();
        assert!(matches!(
            client.trigger(Duration::from_millis(20)),
            Err(ShmError::Timeout { .. })
        ));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn connect_to_unknown_trigger_fails() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RemoteTriggerClient::connect(dir.path(), "ns", "module", "nope"),
            Err(ShmError::NotFound { .. })
        ));
    }
}
