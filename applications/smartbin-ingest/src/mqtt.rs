use crate::config::BrokerConfig;
use std::time::Duration;
use uuid::Uuid;

// MQTT 3.1.1: the LoRaWAN network server does not speak v5.
pub use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use rumqttc::Transport;

pub const KEEP_ALIVE: Duration = Duration::from_secs(60);
const TLS_PORT: u16 = 8883;
const REQUEST_CHANNEL_CAPACITY: usize = 50;

pub fn build_options(broker: &BrokerConfig, client_id_prefix: &str) -> MqttOptions {
    let client_id = format!("{}-{}-{}", client_id_prefix, broker.name, Uuid::new_v4());
    let mut opts = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    opts.set_keep_alive(KEEP_ALIVE);
    opts.set_clean_session(true);
    if let (Some(u), Some(p)) = (&broker.username, &broker.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if broker.port == TLS_PORT {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

pub fn new(options: MqttOptions) -> (AsyncClient, EventLoop) {
    AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY)
}

pub fn qos(v: u8) -> QoS {
    match v {
        2 => QoS::ExactlyOnce,
        0 => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}
