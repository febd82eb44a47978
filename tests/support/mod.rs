// ABOUTME: Test support utilities.
// ABOUTME: Mock dialer and transport built on in-memory duplex streams.

// Each test binary only uses some of this, so allow dead_code.
#![allow(dead_code)]

use async_trait::async_trait;
use halyard::error::{Error, Result};
use halyard::runner::{CommandOutput, RunOptions};
use halyard::transport::{BoxedDuplex, DialParams, Dialer, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

/// One `direct-tcpip` channel opened on the mock transport. `remote` is
/// the far end for the test to drive.
pub struct OpenedChannel {
    pub dest: (String, u16),
    pub src: (String, u16),
    pub remote: DuplexStream,
}

pub struct MockTransport {
    pub active: AtomicBool,
    pub fail_channel_opens: AtomicBool,
    pub exec_log: Mutex<Vec<(String, RunOptions)>>,
    pub exec_script: Mutex<VecDeque<Result<CommandOutput>>>,
    channels_tx: mpsc::UnboundedSender<OpenedChannel>,
}

#[async_trait]
impl Transport for MockTransport {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        src_host: &str,
        src_port: u16,
    ) -> Result<BoxedDuplex> {
        if self.fail_channel_opens.load(Ordering::SeqCst) {
            return Err(Error::ChannelOpen("mock refused channel".to_string()));
        }
        let (near, far) = tokio::io::duplex(65536);
        self.channels_tx
            .send(OpenedChannel {
                dest: (host.to_string(), port),
                src: (src_host.to_string(), src_port),
                remote: far,
            })
            .map_err(|_| Error::ChannelOpen("mock channel sink closed".to_string()))?;
        Ok(Box::new(near))
    }

    async fn exec(&self, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        self.exec_log
            .lock()
            .push((command.to_string(), opts.clone()));
        if let Some(scripted) = self.exec_script.lock().pop_front() {
            return scripted;
        }
        Ok(CommandOutput {
            exit_code: 0,
            stdout: format!("ran: {command}\n"),
            stderr: String::new(),
        })
    }

    async fn close(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockDialer {
    pub transport: Arc<MockTransport>,
    pub dials: AtomicUsize,
    pub last_params: Mutex<Option<DialParams>>,
    /// Whether the most recent dial received a gateway socket.
    pub last_had_socket: Mutex<Option<bool>>,
    /// The gateway socket itself, kept alive so proxy subprocesses are
    /// not killed mid-test.
    pub last_socket: Mutex<Option<BoxedDuplex>>,
    /// When set, the next dial fails with `Error::Connection`.
    pub fail_next: Mutex<Option<String>>,
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(
        &self,
        params: &DialParams,
        via: Option<BoxedDuplex>,
    ) -> Result<Arc<dyn Transport>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock() = Some(params.clone());
        *self.last_had_socket.lock() = Some(via.is_some());
        *self.last_socket.lock() = via;
        if let Some(message) = self.fail_next.lock().take() {
            return Err(Error::Connection(message));
        }
        self.transport.active.store(true, Ordering::SeqCst);
        Ok(self.transport.clone())
    }
}

/// Fresh mock dialer plus the receiver observing channels opened on its
/// transport.
#[allow(dead_code)]
pub fn mock_dialer() -> (Arc<MockDialer>, mpsc::UnboundedReceiver<OpenedChannel>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        active: AtomicBool::new(false),
        fail_channel_opens: AtomicBool::new(false),
        exec_log: Mutex::new(Vec::new()),
        exec_script: Mutex::new(VecDeque::new()),
        channels_tx: tx,
    });
    let dialer = Arc::new(MockDialer {
        transport,
        dials: AtomicUsize::new(0),
        last_params: Mutex::new(None),
        last_had_socket: Mutex::new(None),
        last_socket: Mutex::new(None),
        fail_next: Mutex::new(None),
    });
    (dialer, rx)
}
