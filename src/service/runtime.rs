//! Thread boundary for host processes.
//!
//! The hub core is single-threaded; this module runs it on a dedicated
//! thread and exposes a channel-based handle. Commands carry plain data
//! (paths and values, never hub references), replies come back over a
//! per-request channel, and subscriptions deliver samples into a channel
//! owned by the caller.
//!
//! Between commands the loop runs due buffer backups, so observation
//! persistence does not depend on push traffic.

use crate::error::{HubError, Result};
use crate::hub::{Hub, HubConfig};
use crate::sample::{DataSample, Value};
use crate::service::IoService;
use crate::types::DataType;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Channel capacity for requests into the hub thread.
const REQUEST_CHANNEL_CAPACITY: usize = 256;

/// How long the hub thread waits for a request before running periodic
/// duties (buffer backups).
const IDLE_TICK: Duration = Duration::from_millis(200);

/// Commands accepted by the hub thread.
#[derive(Debug)]
pub enum HubRequest {
    CreateInput {
        client: String,
        path: String,
        data_type: DataType,
        units: String,
    },
    CreateOutput {
        client: String,
        path: String,
        data_type: DataType,
        units: String,
    },
    DeleteResource {
        client: String,
        path: String,
    },
    Push {
        client: String,
        path: String,
        timestamp: f64,
        value: Value,
    },
    /// Read the current value at an absolute path.
    GetCurrent {
        path: String,
    },
    /// Deliver every accepted sample on an absolute path into `sender`,
    /// converted to `data_type`.
    Subscribe {
        path: String,
        data_type: DataType,
        sender: Sender<(f64, Value)>,
    },
    /// Run due buffer backups now.
    RunBackups,
    Shutdown,
}

/// Replies from the hub thread.
#[derive(Debug)]
pub enum HubReply {
    Done,
    Current {
        data_type: DataType,
        timestamp: f64,
        value: Value,
    },
}

struct Envelope {
    request: HubRequest,
    reply: Sender<Result<HubReply>>,
}

/// Caller-side handle to a hub thread.
pub struct HubHandle {
    tx: Sender<Envelope>,
    join: Option<JoinHandle<()>>,
}

/// Spawns and owns the hub thread.
pub struct HubRuntime;

impl HubRuntime {
    /// Start a hub on its own thread.
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (tx, rx) = bounded::<Envelope>(REQUEST_CHANNEL_CAPACITY);
        let join = std::thread::spawn(move || {
            let mut hub = Hub::new(config);
            run_loop(&mut hub, rx);
        });
        HubHandle {
            tx,
            join: Some(join),
        }
    }
}

fn run_loop(hub: &mut Hub, rx: Receiver<Envelope>) {
    tracing::info!("hub thread started");
    loop {
        match rx.recv_timeout(IDLE_TICK) {
            Ok(envelope) => {
                let shutdown = matches!(envelope.request, HubRequest::Shutdown);
                let result = handle_request(hub, envelope.request);
                let _ = envelope.reply.send(result);
                if shutdown {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => hub.run_due_backups(),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::info!("hub thread stopped");
}

fn handle_request(hub: &mut Hub, request: HubRequest) -> Result<HubReply> {
    match request {
        HubRequest::CreateInput {
            client,
            path,
            data_type,
            units,
        } => {
            IoService::new(hub, &client)?.create_input(&path, data_type, &units)?;
            Ok(HubReply::Done)
        }
        HubRequest::CreateOutput {
            client,
            path,
            data_type,
            units,
        } => {
            IoService::new(hub, &client)?.create_output(&path, data_type, &units)?;
            Ok(HubReply::Done)
        }
        HubRequest::DeleteResource { client, path } => {
            IoService::new(hub, &client)?.delete_resource(&path)?;
            Ok(HubReply::Done)
        }
        HubRequest::Push {
            client,
            path,
            timestamp,
            value,
        } => {
            let namespace = hub.client_namespace(&client)?;
            let id = hub
                .find_entry(namespace, &path)
                .ok_or(HubError::NotFound)?;
            let data_type = value.data_type();
            hub.push(id, data_type, DataSample::from_value(timestamp, value)?)?;
            Ok(HubReply::Done)
        }
        HubRequest::GetCurrent { path } => {
            let id = hub.find_absolute(&path).ok_or(HubError::NotFound)?;
            let (data_type, sample) = hub.current_value(id).ok_or(HubError::Unavailable)?;
            Ok(HubReply::Current {
                data_type,
                timestamp: sample.timestamp(),
                value: sample.value().clone(),
            })
        }
        HubRequest::Subscribe {
            path,
            data_type,
            sender,
        } => {
            let id = hub.find_absolute(&path).ok_or(HubError::NotFound)?;
            hub.add_push_handler(
                id,
                data_type,
                Box::new(move |ts, value| {
                    let _ = sender.send((ts, value.clone()));
                }),
            )?;
            Ok(HubReply::Done)
        }
        HubRequest::RunBackups => {
            hub.run_due_backups();
            Ok(HubReply::Done)
        }
        HubRequest::Shutdown => Ok(HubReply::Done),
    }
}

impl HubHandle {
    /// Send a request and wait for the hub thread's reply.
    pub fn request(&self, request: HubRequest) -> Result<HubReply> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(Envelope {
                request,
                reply: reply_tx,
            })
            .map_err(|_| HubError::Fault("hub thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| HubError::Fault("hub thread dropped the request".to_string()))?
    }

    pub fn create_input(
        &self,
        client: &str,
        path: &str,
        data_type: DataType,
        units: &str,
    ) -> Result<()> {
        self.request(HubRequest::CreateInput {
            client: client.to_string(),
            path: path.to_string(),
            data_type,
            units: units.to_string(),
        })
        .map(|_| ())
    }

    pub fn push(&self, client: &str, path: &str, timestamp: f64, value: Value) -> Result<()> {
        self.request(HubRequest::Push {
            client: client.to_string(),
            path: path.to_string(),
            timestamp,
            value,
        })
        .map(|_| ())
    }

    pub fn get_current(&self, path: &str) -> Result<(DataType, f64, Value)> {
        match self.request(HubRequest::GetCurrent {
            path: path.to_string(),
        })? {
            HubReply::Current {
                data_type,
                timestamp,
                value,
            } => Ok((data_type, timestamp, value)),
            HubReply::Done => Err(HubError::Fault("unexpected reply".to_string())),
        }
    }

    /// Subscribe to samples on an absolute path; deliveries arrive on the
    /// returned channel.
    pub fn subscribe(&self, path: &str, data_type: DataType) -> Result<Receiver<(f64, Value)>> {
        let (tx, rx) = bounded(REQUEST_CHANNEL_CAPACITY);
        self.request(HubRequest::Subscribe {
            path: path.to_string(),
            data_type,
            sender: tx,
        })?;
        Ok(rx)
    }

    /// Stop the hub thread and wait for it to finish.
    pub fn shutdown(mut self) {
        let _ = self.request(HubRequest::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for HubHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.request(HubRequest::Shutdown);
            let _ = join.join();
        }
    }
}
