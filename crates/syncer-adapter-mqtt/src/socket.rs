//! MQTT-backed sockets.

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, Publish, QoS, SubscribeReasonCode};
use std::time::Duration;
use syncer_proto::{Message, Socket, SocketRole, TopicKind, TopicScheme, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long a dropped socket's driver may take to flush DISCONNECT.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Maps messages to topics and back for one socket.
///
/// Requests carry the requester's client id and a sequence number; the
/// replier answers on the matching reply topic and the requester accepts
/// only the reply for its latest request.
#[derive(Debug)]
pub(crate) struct Correlation {
    role: SocketRole,
    topics: TopicScheme,
    endpoint: String,
    client_id: String,
    subject: String,
    seq: u64,
    reply_to: Option<(String, u64)>,
}

impl Correlation {
    pub(crate) fn new(
        role: SocketRole,
        topics: TopicScheme,
        endpoint: impl Into<String>,
        client_id: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            role,
            topics,
            endpoint: endpoint.into(),
            client_id: client_id.into(),
            subject: subject.into(),
            seq: 0,
            reply_to: None,
        }
    }

    /// Filter this socket subscribes to, if any.
    pub(crate) fn filter(&self) -> Option<String> {
        match self.role {
            SocketRole::Publisher => None,
            SocketRole::Subscriber => Some(self.topics.publish_filter(&self.endpoint)),
            SocketRole::Requester => Some(self.topics.reply_filter(&self.endpoint, &self.client_id)),
            SocketRole::Replier => Some(self.topics.request_filter(&self.endpoint)),
        }
    }

    /// Topic for an outgoing message.
    pub(crate) fn outgoing(&mut self, message: &Message) -> Result<String, TransportError> {
        match self.role {
            SocketRole::Publisher => Ok(self.topics.publish(&self.endpoint, message.subject())),
            SocketRole::Requester => {
                self.seq += 1;
                Ok(self.topics.request(&self.endpoint, &self.client_id, self.seq))
            }
            SocketRole::Replier => {
                let (client, seq) = self
                    .reply_to
                    .take()
                    .ok_or_else(|| TransportError::Send("no request to reply to".to_string()))?;
                Ok(self.topics.reply(&self.endpoint, &client, seq))
            }
            SocketRole::Subscriber => Err(TransportError::Unsupported(SocketRole::Subscriber)),
        }
    }

    /// Accept an incoming publish, or `None` if it is not for this socket.
    pub(crate) fn incoming(&mut self, topic: &str, payload: &[u8]) -> Option<Message> {
        let (endpoint, kind) = self.topics.parse(topic)?;
        if endpoint != self.endpoint {
            return None;
        }

        match (self.role, kind) {
            (SocketRole::Subscriber, TopicKind::Publish { subject }) => subject
                .starts_with(&self.subject)
                .then(|| Message::with_subject(subject, payload)),
            (SocketRole::Requester, TopicKind::Reply { client, seq }) => {
                if client != self.client_id || seq != self.seq {
                    tracing::trace!(seq, current = self.seq, "Ignoring stale reply");
                    return None;
                }
                Some(Message::new(payload))
            }
            (SocketRole::Replier, TopicKind::Request { client, seq }) => {
                self.reply_to = Some((client, seq));
                Some(Message::new(payload))
            }
            _ => None,
        }
    }
}

/// Socket produced by [`MqttBackend`](crate::MqttBackend).
///
/// Each socket owns one broker connection driven by a background task.
/// Dropping the socket sends DISCONNECT and gives the task a short grace
/// period to flush it before aborting.
pub struct MqttSocket {
    client: AsyncClient,
    incoming: mpsc::Receiver<Publish>,
    driver: Option<JoinHandle<()>>,
    correlation: Correlation,
    qos: QoS,
    max_packet_size: usize,
}

impl MqttSocket {
    pub(crate) fn new(
        client: AsyncClient,
        incoming: mpsc::Receiver<Publish>,
        driver: JoinHandle<()>,
        correlation: Correlation,
        qos: QoS,
        max_packet_size: usize,
    ) -> Self {
        Self {
            client,
            incoming,
            driver: Some(driver),
            correlation,
            qos,
            max_packet_size,
        }
    }
}

#[async_trait::async_trait]
impl Socket for MqttSocket {
    async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        if message.len() > self.max_packet_size {
            return Err(TransportError::TooLarge(message.len()));
        }

        let topic = self.correlation.outgoing(&message)?;
        tracing::trace!(topic, payload_len = message.len(), "Publishing");

        self.client
            .publish(topic, self.qos, false, message.into_body())
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.incoming.recv()).await {
                Ok(Some(publish)) => {
                    if let Some(message) = self.correlation.incoming(&publish.topic, &publish.payload)
                    {
                        return Ok(Some(message));
                    }
                }
                Ok(None) => {
                    return Err(TransportError::Receive("connection closed".to_string()));
                }
                Err(_) => return Ok(None),
            }
        }
    }
}

impl Drop for MqttSocket {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            close(&self.client, driver, DISCONNECT_GRACE);
        }
    }
}

/// Queue a DISCONNECT and reap the driver once it has been sent, aborting
/// it after `grace`. Returns the reaper task when one was spawned.
fn close(
    client: &AsyncClient,
    driver: JoinHandle<()>,
    grace: Duration,
) -> Option<JoinHandle<()>> {
    if let Err(err) = client.try_disconnect() {
        tracing::debug!(error = %err, "Could not queue disconnect, aborting connection");
        driver.abort();
        return None;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        driver.abort();
        return None;
    };

    Some(runtime.spawn(async move {
        let mut driver = driver;
        if tokio::time::timeout(grace, &mut driver).await.is_err() {
            tracing::debug!("Disconnect not flushed in time, aborting connection");
            driver.abort();
        }
    }))
}

/// Poll the event loop, (re)subscribe after every connect and forward
/// incoming publishes. `ready` fires once the socket is usable.
pub(crate) async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    filter: Option<String>,
    qos: QoS,
    tx: mpsc::Sender<Publish>,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::trace!(topic = %publish.topic, payload_len = publish.payload.len(), "Received MQTT message");
                if tx.send(publish).await.is_err() {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::debug!("Connected to MQTT broker");
                match &filter {
                    Some(filter) => {
                        if let Err(err) = client.try_subscribe(filter.clone(), qos) {
                            tracing::warn!(error = %err, filter = %filter, "Failed to subscribe");
                        }
                    }
                    None => signal(&mut ready),
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    tracing::warn!(?filter, "Subscription rejected by broker");
                } else {
                    tracing::debug!(?filter, "Subscription acknowledged");
                    signal(&mut ready);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                tracing::debug!("Disconnected from MQTT broker");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                if tx.is_closed() {
                    break;
                }
                tracing::warn!(error = %err, "MQTT connection error");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

fn signal(ready: &mut Option<oneshot::Sender<()>>) {
    if let Some(ready) = ready.take() {
        let _ = ready.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> TopicScheme {
        TopicScheme::new("plant")
    }

    #[test]
    fn filters_per_role() {
        let sub = Correlation::new(SocketRole::Subscriber, scheme(), "state", "c1", "");
        assert_eq!(sub.filter().unwrap(), "syncer/v1/plant/state/pub/#");

        let req = Correlation::new(SocketRole::Requester, scheme(), "state", "c1", "");
        assert_eq!(req.filter().unwrap(), "syncer/v1/plant/state/rep/c1/+");

        let rep = Correlation::new(SocketRole::Replier, scheme(), "state", "s1", "");
        assert_eq!(rep.filter().unwrap(), "syncer/v1/plant/state/req/+/+");

        let publisher = Correlation::new(SocketRole::Publisher, scheme(), "state", "s1", "");
        assert!(publisher.filter().is_none());
    }

    #[test]
    fn subscriber_applies_subject_prefix() {
        let mut sub = Correlation::new(SocketRole::Subscriber, scheme(), "state", "c1", "subj1");

        let accepted = sub
            .incoming("syncer/v1/plant/state/pub/subj1", b"hello")
            .unwrap();
        assert_eq!(accepted.subject(), "subj1");
        assert_eq!(accepted.body(), b"hello");

        assert!(sub.incoming("syncer/v1/plant/state/pub/subj2", b"x").is_none());
        assert!(sub.incoming("syncer/v1/plant/state/pub", b"x").is_none());
        assert!(sub.incoming("syncer/v1/plant/other/pub/subj1", b"x").is_none());
    }

    #[test]
    fn requester_accepts_only_latest_reply() {
        let mut req = Correlation::new(SocketRole::Requester, scheme(), "state", "c1", "");

        assert_eq!(
            req.outgoing(&Message::empty()).unwrap(),
            "syncer/v1/plant/state/req/c1/1"
        );
        assert_eq!(
            req.outgoing(&Message::empty()).unwrap(),
            "syncer/v1/plant/state/req/c1/2"
        );

        assert!(req.incoming("syncer/v1/plant/state/rep/c1/1", b"old").is_none());
        assert!(req.incoming("syncer/v1/plant/state/rep/c2/2", b"other").is_none());
        let reply = req.incoming("syncer/v1/plant/state/rep/c1/2", b"new").unwrap();
        assert_eq!(reply.body(), b"new");
    }

    #[test]
    fn replier_answers_on_request_correlation() {
        let mut rep = Correlation::new(SocketRole::Replier, scheme(), "state", "s1", "");

        assert!(matches!(
            rep.outgoing(&Message::empty()),
            Err(TransportError::Send(_))
        ));

        let request = rep.incoming("syncer/v1/plant/state/req/c7/3", b"").unwrap();
        assert!(request.is_empty());
        assert_eq!(
            rep.outgoing(&Message::from("state")).unwrap(),
            "syncer/v1/plant/state/rep/c7/3"
        );
    }

    #[test]
    fn publisher_topic_carries_subject() {
        let mut publisher = Correlation::new(SocketRole::Publisher, scheme(), "state", "s1", "");
        assert_eq!(
            publisher.outgoing(&Message::new("patch")).unwrap(),
            "syncer/v1/plant/state/pub"
        );
        assert_eq!(
            publisher
                .outgoing(&Message::with_subject("news", "x"))
                .unwrap(),
            "syncer/v1/plant/state/pub/news"
        );
    }

    #[test]
    fn subscriber_cannot_send() {
        let mut sub = Correlation::new(SocketRole::Subscriber, scheme(), "state", "c1", "");
        assert!(matches!(
            sub.outgoing(&Message::empty()),
            Err(TransportError::Unsupported(SocketRole::Subscriber))
        ));
    }

    #[tokio::test]
    async fn close_is_bounded_without_broker() {
        let options = rumqttc::MqttOptions::new("close-test", "127.0.0.1", 1);
        let (client, eventloop) = AsyncClient::new(options, 10);
        let (tx, _rx) = mpsc::channel(10);
        let (ready, _ready_rx) = oneshot::channel();
        let driver = tokio::spawn(drive(
            eventloop,
            client.clone(),
            None,
            QoS::AtLeastOnce,
            tx,
            ready,
        ));

        let reaper = close(&client, driver, Duration::from_millis(50)).unwrap();

        tokio::time::timeout(Duration::from_secs(2), reaper)
            .await
            .unwrap()
            .unwrap();
    }
}
