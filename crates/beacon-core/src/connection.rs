//! Per-connection actor.
//!
//! A [`Connection`] owns one transport and runs two pumps over it: the read
//! pump decodes client frames and forwards them to the hub, the write pump
//! drains the connection's outbound queue and keeps the peer alive with
//! pings. Either pump failing tears the whole connection down.

use crate::hub::HubHandle;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::outbox::{Outbox, DEFAULT_OUTBOUND_CAPACITY};
use crate::peer::{ConnectionId, Peer, Role};
use beacon_protocol::{
    codec, Envelope, LocationUpdate, SubscriptionAction, SubscriptionRequest, Welcome,
};
use beacon_transport::{FrameSink, FrameStream, Transport, WireFrame};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Keepalive and sizing parameters for a connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Outbound queue capacity.
    pub outbound_capacity: usize,
    /// How often the write pump pings the peer.
    pub ping_interval: Duration,
    /// How long the read pump waits for any frame before giving up.
    pub pong_wait: Duration,
    /// Deadline for a single write.
    pub write_wait: Duration,
    /// Largest inbound text frame accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            ping_interval: Duration::from_secs(54),
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_message_size: codec::MAX_FRAME_SIZE,
        }
    }
}

/// One client connection bound to a hub.
pub struct Connection<T: Transport> {
    id: ConnectionId,
    identity: String,
    role: Role,
    hub: HubHandle,
    transport: T,
    config: ConnectionConfig,
}

impl<T: Transport> Connection<T> {
    /// Create a connection. Nothing happens until it is run.
    #[must_use]
    pub fn new(
        transport: T,
        identity: impl Into<String>,
        role: Role,
        hub: HubHandle,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            identity: identity.into(),
            role,
            hub,
            transport,
            config,
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Spawn [`Connection::run`] onto the current runtime.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Drive the connection until it is torn down.
    pub async fn run(self) {
        let Self {
            id,
            identity,
            role,
            hub,
            transport,
            config,
        } = self;
        let remote = transport.remote_addr();

        let (outbox, outbound) = Outbox::channel(id, config.outbound_capacity);
        let welcome = match role {
            Role::Publisher => Welcome::driver(&identity),
            Role::Subscriber => Welcome::rider(&identity),
        };
        outbox.enqueue(Envelope::Connected(welcome));

        let (mut sink, stream) = transport.split();
        if let Err(e) = hub
            .register(Peer::new(id, identity.clone(), role, outbox))
            .await
        {
            warn!(connection = %id, error = %e, "Failed to register connection");
            metrics::record_error("hub_unavailable");
            let _ = timeout(config.write_wait, sink.close()).await;
            return;
        }

        let _metrics_guard = ConnectionMetricsGuard::new(role);
        debug!(connection = %id, %role, remote = ?remote, "Connection registered");

        let mut writer = tokio::spawn(write_pump(id, sink, outbound, config.clone()));
        let reader = ReadPump {
            id,
            identity: &identity,
            role,
            hub: &hub,
            config: &config,
        };

        let writer_done = tokio::select! {
            () = reader.run(stream) => false,
            result = &mut writer => {
                if let Err(e) = result {
                    warn!(connection = %id, error = %e, "Write pump failed");
                    metrics::record_error("write_pump");
                }
                true
            }
        };

        // The hub drops our peer, which closes the outbound queue and lets
        // the write pump flush and send a close frame.
        if let Err(e) = hub.unregister(id).await {
            debug!(connection = %id, error = %e, "Unregister skipped");
        }

        if !writer_done && timeout(config.write_wait, &mut writer).await.is_err() {
            warn!(connection = %id, "Write pump did not finish, aborting");
            writer.abort();
        }

        info!(connection = %id, %role, identity = %identity, "Connection closed");
    }
}

/// Drain the outbound queue onto the sink and send keepalive pings.
async fn write_pump<S: FrameSink>(
    id: ConnectionId,
    mut sink: S,
    mut outbound: mpsc::Receiver<Envelope>,
    config: ConnectionConfig,
) {
    let mut ticker = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            envelope = outbound.recv() => {
                let Some(envelope) = envelope else {
                    // Queue closed by the hub
                    let _ = timeout(config.write_wait, sink.close()).await;
                    break;
                };

                let text = match codec::encode(&envelope) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(connection = %id, error = %e, "Failed to encode envelope");
                        metrics::record_error("encode");
                        continue;
                    }
                };

                match timeout(config.write_wait, sink.send(WireFrame::Text(text))).await {
                    Ok(Ok(())) => trace!(connection = %id, kind = envelope.kind(), "Envelope sent"),
                    Ok(Err(e)) => {
                        debug!(connection = %id, error = %e, "Write failed");
                        break;
                    }
                    Err(_) => {
                        warn!(connection = %id, "Write deadline exceeded");
                        metrics::record_error("write_timeout");
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                match timeout(config.write_wait, sink.send(WireFrame::Ping)).await {
                    Ok(Ok(())) => trace!(connection = %id, "Ping sent"),
                    Ok(Err(e)) => {
                        debug!(connection = %id, error = %e, "Ping failed");
                        break;
                    }
                    Err(_) => {
                        warn!(connection = %id, "Ping deadline exceeded");
                        metrics::record_error("write_timeout");
                        break;
                    }
                }
            }
        }
    }

    trace!(connection = %id, "Write pump finished");
}

struct ReadPump<'a> {
    id: ConnectionId,
    identity: &'a str,
    role: Role,
    hub: &'a HubHandle,
    config: &'a ConnectionConfig,
}

impl ReadPump<'_> {
    async fn run<S: FrameStream>(self, mut stream: S) {
        loop {
            let frame = match timeout(self.config.pong_wait, stream.recv()).await {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    debug!(connection = %self.id, "Stream ended");
                    return;
                }
                Ok(Err(e)) => {
                    debug!(connection = %self.id, error = %e, "Read failed");
                    metrics::record_error("transport");
                    return;
                }
                Err(_) => {
                    info!(connection = %self.id, "Read deadline exceeded");
                    metrics::record_error("read_timeout");
                    return;
                }
            };

            match frame {
                WireFrame::Text(text) => {
                    if text.len() > self.config.max_message_size {
                        warn!(
                            connection = %self.id,
                            size = text.len(),
                            limit = self.config.max_message_size,
                            "Frame too large"
                        );
                        metrics::record_error("frame_too_large");
                        return;
                    }
                    if !self.handle_text(&text).await {
                        return;
                    }
                }
                WireFrame::Ping | WireFrame::Pong => {
                    trace!(connection = %self.id, "Keepalive received");
                }
                WireFrame::Close => {
                    debug!(connection = %self.id, "Received close frame");
                    return;
                }
            }
        }
    }

    /// Returns `false` if the hub has gone away.
    async fn handle_text(&self, text: &str) -> bool {
        let submitted = match self.role {
            Role::Publisher => match codec::decode::<LocationUpdate>(text) {
                Ok(update) => self.hub.publish(update.attributed_to(self.identity)).await,
                Err(e) => {
                    warn!(driver = %self.identity, error = %e, "Invalid location update");
                    metrics::record_error("malformed");
                    return true;
                }
            },
            Role::Subscriber => match codec::decode::<SubscriptionRequest>(text) {
                Ok(request) => match request.action() {
                    Some(SubscriptionAction::Subscribe) => {
                        self.hub.subscribe(self.id, request.driver_id).await
                    }
                    Some(SubscriptionAction::Unsubscribe) => {
                        self.hub.unsubscribe(self.id, request.driver_id).await
                    }
                    None => {
                        warn!(rider = %self.identity, action = %request.action, "Unknown action");
                        return true;
                    }
                },
                Err(e) => {
                    warn!(rider = %self.identity, error = %e, "Invalid subscription message");
                    metrics::record_error("malformed");
                    return true;
                }
            },
        };

        match submitted {
            Ok(()) => true,
            Err(e) => {
                warn!(connection = %self.id, error = %e, "Hub rejected event");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};
    use async_trait::async_trait;
    use beacon_transport::memory::MemoryStream;
    use beacon_transport::{MemoryClient, MemoryTransport, TransportError};
    use serde_json::{json, Value};

    fn connect(hub: &HubHandle, identity: &str, role: Role) -> (JoinHandle<()>, MemoryClient) {
        let (transport, client) = MemoryTransport::pair();
        let connection =
            Connection::new(transport, identity, role, hub.clone(), ConnectionConfig::default());
        (connection.start(), client)
    }

    async fn next_json(client: &mut MemoryClient) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(1), client.recv_text())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed");
        serde_json::from_str(&text).unwrap()
    }

    async fn wait_for_connections(hub: &HubHandle, expected: usize) {
        for _ in 0..100 {
            if hub.stats().await.unwrap().connections == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("hub never reached {} connections", expected);
    }

    async fn subscribe(client: &mut MemoryClient, driver: &str) -> Value {
        client
            .send_text(json!({"action": "subscribe", "driver_id": driver}).to_string())
            .unwrap();
        next_json(client).await
    }

    #[tokio::test]
    async fn test_welcome_is_first_frame() {
        let hub = Hub::spawn(HubConfig::default());
        let (_task, mut driver) = connect(&hub, "D1", Role::Publisher);
        let (_task2, mut rider) = connect(&hub, "R1", Role::Subscriber);

        assert_eq!(
            next_json(&mut driver).await,
            json!({
                "type": "connected",
                "payload": {"message": "Driver connected successfully", "driver_id": "D1"}
            })
        );
        assert_eq!(
            next_json(&mut rider).await,
            json!({
                "type": "connected",
                "payload": {"message": "Rider connected successfully", "rider_id": "R1"}
            })
        );
    }

    #[tokio::test]
    async fn test_location_fan_out_end_to_end() {
        let hub = Hub::spawn(HubConfig::default());
        let (_d, mut driver) = connect(&hub, "D1", Role::Publisher);
        let (_s1, mut s1) = connect(&hub, "S1", Role::Subscriber);
        let (_s2, mut s2) = connect(&hub, "S2", Role::Subscriber);
        wait_for_connections(&hub, 3).await;
        for client in [&mut driver, &mut s1, &mut s2] {
            next_json(client).await;
        }

        let status = subscribe(&mut s1, "D1").await;
        assert_eq!(status["type"], "driver_status");
        assert_eq!(status["payload"]["is_online"], true);
        subscribe(&mut s2, "D1").await;

        driver
            .send_text(
                json!({"driver_id": "spoofed", "latitude": 6.9, "longitude": 79.8, "heading": 0, "speed": 0})
                    .to_string(),
            )
            .unwrap();

        for client in [&mut s1, &mut s2] {
            let update = next_json(client).await;
            assert_eq!(update["type"], "location_update");
            assert_eq!(update["payload"]["driver_id"], "D1");
            assert_eq!(update["payload"]["latitude"], 6.9);
            assert!(update["payload"]["timestamp"].as_u64().unwrap() > 0);
        }

        let cached = hub.last_location("D1").unwrap().unwrap();
        assert_eq!(cached.driver_id, "D1");
        assert_eq!(cached.longitude, 79.8);
    }

    #[tokio::test]
    async fn test_driver_disconnect_reaches_rider() {
        let hub = Hub::spawn(HubConfig::default());
        let (driver_task, mut driver) = connect(&hub, "D1", Role::Publisher);
        let (_s1, mut s1) = connect(&hub, "S1", Role::Subscriber);
        wait_for_connections(&hub, 2).await;
        next_json(&mut s1).await;
        subscribe(&mut s1, "D1").await;

        driver.close().unwrap();
        driver_task.await.unwrap();

        let status = next_json(&mut s1).await;
        assert_eq!(status["type"], "driver_status");
        assert_eq!(status["payload"]["driver_id"], "D1");
        assert_eq!(status["payload"]["is_online"], false);
        assert!(!hub.is_online("D1").unwrap());

        // Welcome, then the close frame from the flushed queue
        assert!(matches!(driver.recv().await, Some(WireFrame::Text(_))));
        assert_eq!(driver.recv().await, Some(WireFrame::Close));
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_open() {
        let hub = Hub::spawn(HubConfig::default());
        let (_d, driver) = connect(&hub, "D1", Role::Publisher);
        let (_s1, mut s1) = connect(&hub, "S1", Role::Subscriber);
        wait_for_connections(&hub, 2).await;
        next_json(&mut s1).await;
        subscribe(&mut s1, "D1").await;

        driver.send_text("not json").unwrap();
        driver.send_text(r#"{"latitude": "north"}"#).unwrap();
        driver
            .send_text(json!({"latitude": 1.0, "longitude": 2.0}).to_string())
            .unwrap();

        let update = next_json(&mut s1).await;
        assert_eq!(update["payload"]["latitude"], 1.0);

        s1.send_text(json!({"action": "follow", "driver_id": "D1"}).to_string())
            .unwrap();
        s1.send_text("{").unwrap();
        assert_eq!(hub.stats().await.unwrap().connections, 2);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let hub = Hub::spawn(HubConfig::default());
        let (task, mut driver) = connect(&hub, "D1", Role::Publisher);
        next_json(&mut driver).await;

        driver.send_text("x".repeat(5000)).unwrap();
        task.await.unwrap();

        assert_eq!(driver.recv().await, Some(WireFrame::Close));
        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_sent_after_interval() {
        let hub = Hub::spawn(HubConfig::default());
        let (_task, mut rider) = connect(&hub, "R1", Role::Subscriber);
        let started = Instant::now();
        assert!(matches!(rider.recv().await, Some(WireFrame::Text(_))));

        assert_eq!(rider.recv().await, Some(WireFrame::Ping));
        assert!(started.elapsed() >= Duration::from_secs(54));

        // Answering renews the read deadline, so the next frame is another ping
        rider.send(WireFrame::Pong).unwrap();
        assert_eq!(rider.recv().await, Some(WireFrame::Ping));
        assert!(started.elapsed() >= Duration::from_secs(108));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_peer_reaped() {
        let hub = Hub::spawn(HubConfig::default());
        let (task, mut rider) = connect(&hub, "R1", Role::Subscriber);
        let started = Instant::now();

        assert!(matches!(rider.recv().await, Some(WireFrame::Text(_))));
        assert_eq!(rider.recv().await, Some(WireFrame::Ping));
        assert_eq!(rider.recv().await, Some(WireFrame::Close));
        assert!(started.elapsed() >= Duration::from_secs(60));

        task.await.unwrap();
        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }

    #[tokio::test]
    async fn test_replaced_driver_receives_close() {
        let hub = Hub::spawn(HubConfig::default());
        let (first_task, mut first) = connect(&hub, "D1", Role::Publisher);
        wait_for_connections(&hub, 1).await;
        let (_second_task, mut second) = connect(&hub, "D1", Role::Publisher);
        next_json(&mut second).await;

        next_json(&mut first).await;
        assert_eq!(first.recv().await, Some(WireFrame::Close));
        first_task.await.unwrap();

        assert!(hub.is_online("D1").unwrap());
        assert_eq!(hub.stats().await.unwrap().connections, 1);
    }

    #[tokio::test]
    async fn test_hub_unavailable_closes_transport() {
        let (hub, handle) = Hub::new(HubConfig::default());
        drop(hub);

        let (task, mut client) = connect(&handle, "D1", Role::Publisher);
        task.await.unwrap();
        assert_eq!(client.recv().await, Some(WireFrame::Close));
    }

    struct StalledTransport {
        stream: MemoryStream,
    }

    struct StalledSink;

    #[async_trait]
    impl FrameSink for StalledSink {
        async fn send(&mut self, _frame: WireFrame) -> Result<(), TransportError> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            std::future::pending().await
        }
    }

    impl Transport for StalledTransport {
        type Sink = StalledSink;
        type Stream = MemoryStream;

        fn split(self) -> (Self::Sink, Self::Stream) {
            (StalledSink, self.stream)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_deadline_tears_down() {
        let hub = Hub::spawn(HubConfig::default());
        let (memory, _client) = MemoryTransport::pair();
        let (_sink, stream) = memory.split();
        let connection = Connection::new(
            StalledTransport { stream },
            "R1",
            Role::Subscriber,
            hub.clone(),
            ConnectionConfig::default(),
        );
        let started = Instant::now();

        connection.run().await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(54));
        assert_eq!(hub.stats().await.unwrap().connections, 0);
    }
}
