//! Event streams.
//!
//! Every backend publishes the events it produces on its own stream. A
//! subscription opens one stream per backend that can have events for the
//! requested entities and fans the messages into a single channel.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::stream::StreamReceiver;
use crate::api::ApiClient;
use crate::config::ServiceRole;
use crate::error::{ApiError, CoreError};
use crate::ids::EntityIds;
use crate::schema::rpcs;

/// Capacity of the fan-in channel.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct EventsRequest {
    pub identifiers: Vec<EntityIds>,
    /// Number of historical events to replay.
    pub tail: Option<u32>,
    /// Replay events after this time.
    pub after: Option<DateTime<Utc>>,
    /// Event name filters.
    pub names: Vec<String>,
}

impl EventsRequest {
    pub fn to_json(&self) -> Value {
        let identifiers: Vec<Value> = self.identifiers.iter().map(EntityIds::to_json).collect();
        let mut body = json!({ "identifiers": identifiers });
        if let Some(tail) = self.tail {
            body["tail"] = json!(tail);
        }
        if let Some(after) = self.after {
            body["after"] = json!(after.to_rfc3339());
        }
        if !self.names.is_empty() {
            body["names"] = json!(self.names);
        }
        body
    }

    /// Backends that publish events for the requested entities.
    pub fn roles(&self) -> BTreeSet<ServiceRole> {
        let mut roles = BTreeSet::from([ServiceRole::Identity]);
        for ids in &self.identifiers {
            match ids {
                EntityIds::Application(_) | EntityIds::EndDevice(_) => {
                    roles.extend([
                        ServiceRole::Network,
                        ServiceRole::Application,
                        ServiceRole::Join,
                    ]);
                }
                EntityIds::Gateway(_) => {
                    roles.insert(ServiceRole::Gateway);
                }
                EntityIds::Client(_) | EntityIds::User(_) | EntityIds::Organization(_) => {}
            }
        }
        roles
    }
}

/// A running fan-in of streams.
///
/// Messages arrive on `receiver` in the order they are received from any
/// backend. The first stream that fails cancels the others; its error is
/// returned by [`Subscription::finish`].
pub struct Subscription {
    pub receiver: mpsc::Receiver<Value>,
    tasks: JoinSet<Result<(), ApiError>>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Stop all streams.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for all streams to end and return the first error.
    pub async fn finish(mut self) -> Result<(), CoreError> {
        let mut first = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = joined.map_err(|e| CoreError::Other(e.to_string()))?;
            if let Err(err) = result {
                if first.is_none() {
                    first = Some(err);
                }
            }
        }
        match first {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Drain all messages into `sink` and then return the first error.
    pub async fn for_each<F>(mut self, mut sink: F) -> Result<(), CoreError>
    where
        F: FnMut(Value) -> Result<(), CoreError>,
    {
        while let Some(message) = self.receiver.recv().await {
            if let Err(err) = sink(message) {
                self.cancel.cancel();
                return Err(err);
            }
        }
        self.finish().await
    }
}

fn forward(
    tasks: &mut JoinSet<Result<(), ApiError>>,
    role: ServiceRole,
    mut receiver: StreamReceiver,
    out: mpsc::Sender<Value>,
    cancel: CancellationToken,
) {
    tasks.spawn(async move {
        loop {
            let message = tokio::select! {
                message = receiver.recv() => message,
                _ = cancel.cancelled() => return Ok(()),
            };
            let Some(message) = message else {
                debug!(role = %role, "stream ended");
                return Ok(());
            };
            match message {
                Ok(message) => {
                    let message = message.get("result").cloned().unwrap_or(message);
                    if out.send(message).await.is_err() {
                        return Ok(());
                    }
                }
                Err(err) => {
                    warn!(role = %role, error = %err, "stream failed");
                    cancel.cancel();
                    return Err(err);
                }
            }
        }
    });
}

/// Open `method` on each of `roles` with the same request and fan the
/// streams in. Disabled roles are skipped.
pub async fn fan_in(
    client: &ApiClient,
    roles: impl IntoIterator<Item = ServiceRole>,
    method: &str,
    request: Value,
) -> Result<Subscription, CoreError> {
    let cancel = client.cancel_token().child_token();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let mut tasks = JoinSet::new();
    for role in roles {
        if !client.is_enabled(role) {
            debug!(role = %role, "skipping disabled backend");
            continue;
        }
        let stream = match client.open_stream(role, method, request.clone()).await {
            Ok(stream) => stream,
            Err(err) => {
                cancel.cancel();
                return Err(err);
            }
        };
        let (_sender, receiver) = stream.split();
        forward(&mut tasks, role, receiver, tx.clone(), cancel.clone());
    }
    Ok(Subscription {
        receiver: rx,
        tasks,
        cancel,
    })
}

/// Subscribe to events of the requested entities on every backend that
/// publishes them.
pub async fn subscribe(client: &ApiClient, request: &EventsRequest) -> Result<Subscription, CoreError> {
    fan_in(client, request.roles(), rpcs::EVENTS_STREAM, request.to_json()).await
}

/// Subscribe to the upstream traffic of an application on the Application
/// Server.
pub async fn subscribe_application(client: &ApiClient, application_id: &str) -> Result<Subscription, CoreError> {
    let request = json!({ "application_id": application_id });
    fan_in(
        client,
        [ServiceRole::Application],
        rpcs::APPLICATION_SUBSCRIBE,
        request,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockTransport;
    use crate::config::ServiceAddresses;
    use crate::error::ErrorKind;
    use crate::ids::{ApplicationIds, GatewayIds};
    use std::sync::Arc;

    fn client(mock: &Arc<MockTransport>) -> ApiClient {
        ApiClient::new(
            mock.clone(),
            ServiceAddresses::for_host("eu1.example.com", false),
            None,
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_roles_follow_identifiers() {
        let request = EventsRequest {
            identifiers: vec![EntityIds::Gateway(GatewayIds {
                gateway_id: "gtw1".to_string(),
                eui: None,
            })],
            ..Default::default()
        };
        assert_eq!(
            request.roles().into_iter().collect::<Vec<_>>(),
            vec![ServiceRole::Identity, ServiceRole::Gateway]
        );
        let body = request.to_json();
        assert_eq!(body["identifiers"][0]["gateway_ids"]["gateway_id"], "gtw1");
        assert!(body.get("tail").is_none());
    }

    #[tokio::test]
    async fn test_failing_open_aborts_subscription() {
        let mock = Arc::new(MockTransport::new());
        // The script serves the first stream only.
        mock.on_stream(
            rpcs::EVENTS_STREAM,
            vec![Ok(json!({"result": {"name": "as.up.data.forward"}}))],
        );
        let request = EventsRequest {
            identifiers: vec![EntityIds::Application(ApplicationIds::new("app1"))],
            ..Default::default()
        };
        let err = subscribe(&client(&mock), &request).await.err().unwrap();
        assert_eq!(err.to_api_error().name, "unimplemented");
        assert_eq!(mock.calls()[0].role, ServiceRole::Identity);
    }

    #[tokio::test]
    async fn test_subscribe_application_collects_stream() {
        let mock = Arc::new(MockTransport::new());
        mock.on_stream(
            rpcs::APPLICATION_SUBSCRIBE,
            vec![
                Ok(json!({"result": {"uplink_message": {"f_port": 1}}})),
                Ok(json!({"result": {"uplink_message": {"f_port": 2}}})),
            ],
        );
        let client = client(&mock);
        let subscription = subscribe_application(&client, "app1").await.unwrap();
        let mut received = Vec::new();
        subscription
            .for_each(|message| {
                received.push(message);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1]["uplink_message"]["f_port"], 2);
        assert_eq!(mock.calls()[0].body["application_id"], "app1");
    }

    #[tokio::test]
    async fn test_stream_error_is_returned() {
        let mock = Arc::new(MockTransport::new());
        mock.on_stream(
            rpcs::APPLICATION_SUBSCRIBE,
            vec![
                Ok(json!({"result": {"n": 1}})),
                Err(ApiError::new(ErrorKind::Unavailable, "transport", "stream_closed", "closed")),
            ],
        );
        let client = client(&mock);
        let subscription = subscribe_application(&client, "app1").await.unwrap();
        let err = subscription.for_each(|_| Ok(())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
