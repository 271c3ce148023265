//! Hook server.
//!
//! The orchestrator's lifecycle hooks reach the coordinator as
//! newline-delimited JSON on an input stream.  Each line is one call:
//!
//! ```text
//! {"id": 1, "call": "attach", "container_id": "c1", "executor": {...}}
//! {"id": 2, "call": "isolate", "container_id": "c1", "pid": 4242}
//! {"id": 3, "call": "decorate", "executor_id": "e1"}
//! {"id": 4, "call": "release", "container_id": "c1"}
//! ```
//!
//! and gets exactly one response line, `{"id":..,"ok":true,"result":..}`
//! or `{"id":..,"ok":false,"kind":..,"error":..}`.  Calls run on their
//! own tasks, so responses may come back out of order; `id` is echoed
//! for correlation.

use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::coordinator::Coordinator;
use crate::error::Error;
use crate::status::StatusDecorator;
use crate::types::{ContainerId, ContainerState, ExecutorDescriptor, ExecutorId};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum HookRequest {
    Attach {
        container_id: ContainerId,
        executor: ExecutorDescriptor,
    },
    Isolate {
        container_id: ContainerId,
        pid: u32,
    },
    Release {
        container_id: ContainerId,
    },
    Recover {
        #[serde(default)]
        states: Vec<ContainerState>,
    },
    Decorate {
        executor_id: ExecutorId,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(flatten)]
    request: HookRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HookResponse {
    fn success(result: Value) -> Self {
        Self {
            id: None,
            ok: true,
            result: Some(result),
            kind: None,
            error: None,
        }
    }

    fn failure(err: &Error) -> Self {
        Self {
            id: None,
            ok: false,
            result: None,
            kind: Some(err.kind().to_string()),
            error: Some(err.to_string()),
        }
    }
}

/// Everything the orchestrator can call.
pub struct Hooks {
    coordinator: Arc<Coordinator>,
    decorator: StatusDecorator,
}

impl Hooks {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let decorator = StatusDecorator::new(Arc::clone(coordinator.registry()));
        Self {
            coordinator,
            decorator,
        }
    }

    pub async fn handle(&self, request: HookRequest) -> HookResponse {
        let outcome = match request {
            HookRequest::Attach {
                container_id,
                executor,
            } => self
                .coordinator
                .attach(&container_id, &executor)
                .await
                .and_then(|directives| encode(&directives)),
            HookRequest::Isolate { container_id, pid } => self
                .coordinator
                .isolate(&container_id, pid)
                .await
                .map(|()| Value::Null),
            HookRequest::Release { container_id } => self
                .coordinator
                .release(&container_id)
                .await
                .map(|()| Value::Null),
            HookRequest::Recover { states } => self
                .coordinator
                .recover(&states)
                .await
                .map(|()| Value::Null),
            HookRequest::Decorate { executor_id } => {
                encode(&self.decorator.decorate(&executor_id))
            }
        };

        match outcome {
            Ok(result) => HookResponse::success(result),
            Err(e) => {
                error!("Hook call failed: {}", e);
                HookResponse::failure(&e)
            }
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(Error::Encode)
}

/// `id` of a line that did not parse as a hook call, if it has one.
fn salvage_id(line: &str) -> Option<Value> {
    serde_json::from_str::<Value>(line)
        .ok()?
        .get("id")
        .filter(|id| !id.is_null())
        .cloned()
}

/// Serve hook calls from `input` until EOF, writing responses to `output`.
pub async fn serve<R, W>(hooks: Arc<Hooks>, input: R, mut output: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (response_tx, mut response_rx) = mpsc::channel::<HookResponse>(128);

    let writer = tokio::spawn(async move {
        while let Some(response) = response_rx.recv().await {
            let mut line = serde_json::to_vec(&response)?;
            line.push(b'\n');
            output.write_all(&line).await?;
            output.flush().await?;
        }
        anyhow::Ok(())
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let envelope = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Rejecting malformed hook call '{}': {}", line, e);
                let err = Error::InvalidRequest(format!("malformed hook call: {}", e));
                let mut response = HookResponse::failure(&err);
                response.id = salvage_id(&line);
                if response_tx.send(response).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let hooks = Arc::clone(&hooks);
        let response_tx = response_tx.clone();
        tokio::spawn(async move {
            let mut response = hooks.handle(envelope.request).await;
            response.id = envelope.id;
            if response_tx.send(response).await.is_err() {
                error!("Response channel closed");
            }
        });
    }

    // The writer drains until every in-flight call has dropped its sender.
    info!("Hook input closed; waiting for in-flight calls");
    drop(response_tx);
    writer.await??;
    Ok(())
}
