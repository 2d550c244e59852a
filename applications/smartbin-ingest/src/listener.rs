use crate::config::{BrokerConfig, Config};
use crate::envelope::Decoder;
use crate::ingest::Ingestor;
use crate::mqtt::{self, AsyncClient, ConnectReturnCode, Event, EventLoop, Packet};
use rumqttc::{Outgoing, SubscribeReasonCode};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Disconnected,
    Connecting,
    Subscribed,
}

impl ListenerState {
    /// State after the event loop reports `event`. Connection errors are not
    /// events; they always lead to `Disconnected`.
    pub fn on_event(self, event: &Event) -> ListenerState {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                ListenerState::Connecting
            }
            Event::Incoming(Packet::ConnAck(_)) => ListenerState::Disconnected,
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .all(|c| matches!(c, SubscribeReasonCode::Success(_)))
                {
                    ListenerState::Subscribed
                } else {
                    ListenerState::Connecting
                }
            }
            _ => self,
        }
    }
}

/// Owns the connection to one broker and feeds its messages to the ingestor.
pub struct Listener {
    broker: BrokerConfig,
    client_id_prefix: String,
    decoder: Decoder,
    ingestor: Ingestor,
    state: ListenerState,
}

impl Listener {
    pub fn new(broker: BrokerConfig, client_id_prefix: impl Into<String>, ingestor: Ingestor) -> Self {
        let decoder = Decoder::new(broker.envelope);
        Self {
            broker,
            client_id_prefix: client_id_prefix.into(),
            decoder,
            ingestor,
            state: ListenerState::Disconnected,
        }
    }

    pub fn name(&self) -> &str {
        &self.broker.name
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Poll the broker until `shutdown` flips. A message already being
    /// processed is finished before the shutdown is honored.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let (client, mut eventloop) =
            mqtt::new(mqtt::build_options(&self.broker, &self.client_id_prefix));

        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.state == ListenerState::Disconnected {
                self.set_state(ListenerState::Connecting);
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                res = eventloop.poll() => match res {
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        self.dispatch(&msg.topic, &msg.payload).await;
                    }
                    Ok(event) => self.on_event(&client, &event),
                    Err(e) => {
                        warn!(broker = %self.broker.name, error = %e, "mqtt error; reconnecting after short delay");
                        self.set_state(ListenerState::Disconnected);
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        }

        info!(broker = %self.broker.name, "listener stopping");
        self.disconnect(&client, &mut eventloop).await;
    }

    /// Queue a DISCONNECT and keep polling until the event loop has written it.
    /// Without a live connection there is nothing to close, and polling would
    /// only reconnect.
    async fn disconnect(&mut self, client: &AsyncClient, eventloop: &mut EventLoop) {
        if self.state == ListenerState::Disconnected {
            return;
        }
        if let Err(e) = client.try_disconnect() {
            debug!(broker = %self.broker.name, error = %e, "disconnect request not queued");
            return;
        }

        let sent = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                    Ok(_) => continue,
                    Err(_) => return false,
                }
            }
        })
        .await
        .unwrap_or(false);

        if sent {
            info!(broker = %self.broker.name, "disconnected from broker");
        } else {
            debug!(broker = %self.broker.name, "connection closed without a clean disconnect");
        }
        self.set_state(ListenerState::Disconnected);
    }

    fn on_event(&mut self, client: &AsyncClient, event: &Event) {
        if let Event::Incoming(Packet::ConnAck(ack)) = event {
            if ack.code == ConnectReturnCode::Success {
                // Clean sessions forget subscriptions, so subscribe on every connect.
                info!(broker = %self.broker.name, host = %self.broker.host, "connected; subscribing to {}", self.broker.topic);
                if let Err(e) = client.try_subscribe(self.broker.topic.clone(), mqtt::qos(self.broker.qos)) {
                    warn!(broker = %self.broker.name, error = %e, "subscribe request failed");
                }
            }
        }
        if let Event::Incoming(Packet::SubAck(ack)) = event {
            if ack.return_codes.contains(&SubscribeReasonCode::Failure) {
                warn!(broker = %self.broker.name, topic = %self.broker.topic, "broker rejected subscription");
            }
        }
        let next = self.state.on_event(event);
        self.set_state(next);
    }

    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        // Failures are logged by the ingestor; the loop just moves on.
        if let Ok(record) = self
            .ingestor
            .handle_message(&self.decoder, topic, payload)
            .await
        {
            debug!(broker = %self.broker.name, topic = %topic, bin_id = %record.bin_id, "message ingested");
        }
    }

    fn set_state(&mut self, next: ListenerState) {
        if next != self.state {
            info!(broker = %self.broker.name, from = ?self.state, to = ?next, "listener state changed");
            self.state = next;
        }
    }
}

/// Start one listener task per configured broker.
pub fn spawn_all(
    cfg: &Config,
    ingestor: &Ingestor,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    cfg.brokers
        .iter()
        .map(|broker| {
            let listener = Listener::new(broker.clone(), cfg.client_id_prefix.clone(), ingestor.clone());
            info!(broker = %listener.name(), envelope = ?broker.envelope, "starting listener");
            tokio::spawn(listener.run(shutdown.clone()))
        })
        .collect()
}
