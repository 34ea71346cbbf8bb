use crate::router::{Request, Response, Router};
use anyhow::Result;
use std::sync::mpsc;
use std::thread;

/// Messages sent to the worker thread
#[derive(Debug)]
pub enum WorkerMessage {
    Request(Request),
    /// A JSON-encoded request, decoded on the worker
    Raw(String),
    Shutdown,
}

/// Thread that owns the router and answers requests strictly in order
pub struct Worker {
    sender: mpsc::Sender<WorkerMessage>,
    receiver: mpsc::Receiver<Response>,
    handle: thread::JoinHandle<Router>,
}

impl Worker {
    pub fn new(router: Router) -> Self {
        let (tx, rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let mut router = router;
            loop {
                let response = match rx.recv() {
                    Ok(WorkerMessage::Request(request)) => router.handle(request),
                    Ok(WorkerMessage::Raw(line)) => router.handle_json(&line),
                    Ok(WorkerMessage::Shutdown) => break,
                    // Channel closed, exit
                    Err(_) => break,
                };
                if response_tx.send(response).is_err() {
                    break;
                }
            }
            if let Err(e) = router.manager_mut().close_database() {
                tracing::warn!(error = %e, "database did not close cleanly on shutdown");
            }
            router
        });

        Self {
            sender: tx,
            receiver: response_rx,
            handle,
        }
    }

    pub fn send(&self, message: WorkerMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| anyhow::anyhow!("Worker thread disconnected"))
    }

    /// Try to receive a response (non-blocking)
    pub fn try_recv(&self) -> Result<Option<Response>> {
        match self.receiver.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => {
                Err(anyhow::anyhow!("Worker thread disconnected"))
            }
        }
    }

    /// Receive a response (blocking)
    pub fn recv(&self) -> Result<Response> {
        self.receiver
            .recv()
            .map_err(|e| anyhow::anyhow!("Worker thread disconnected: {}", e))
    }

    /// Send one request and wait for its response
    pub fn request(&self, request: Request) -> Result<Response> {
        self.send(WorkerMessage::Request(request))?;
        self.recv()
    }

    pub fn request_json(&self, line: &str) -> Result<Response> {
        self.send(WorkerMessage::Raw(line.to_string()))?;
        self.recv()
    }

    /// Stop the thread, closing any open database, and hand back the router
    pub fn shutdown(self) -> Result<Router> {
        self.send(WorkerMessage::Shutdown)?;
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("Worker thread panicked"))
    }
}
