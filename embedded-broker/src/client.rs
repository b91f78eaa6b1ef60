//! # Publish and consume
//!
//! Blocking operations against the broker of the innermost live session.
//! Every call resolves the session at call time, so a publish inside a nested
//! session goes to the nested broker and one made after it ended goes back to
//! the outer broker.
use std::{
    fmt,
    marker::PhantomData,
    net::SocketAddr,
    time::{Duration, Instant},
};

use broker::BrokerClient;
use tracing::{debug, instrument};

use crate::{codec::Codec, error::HarnessError, orchestrator::Orchestrator};

/// added to the client side deadline of a fetch to cover the round trip
pub const FETCH_SLACK: Duration = Duration::from_millis(500);

impl Orchestrator {
    /// Serialize `payload` with `codec`, send it to `topic` and wait for the
    /// broker to acknowledge it
    #[instrument(level = "debug", skip(self, payload, codec))]
    pub fn publish<T, C: Codec<T>>(
        &self,
        topic: &str,
        payload: &T,
        codec: &C,
    ) -> Result<(), HarnessError> {
        let addr = self.broker_addr()?;
        let bytes = codec.serialize(payload)?;
        let len = bytes.len();
        let mut client = self.connect(addr)?;
        let offset = client.produce(topic, bytes, self.settings().send_timeout)?;
        client.close();
        debug!(offset, len, "published");
        Ok(())
    }

    /// Wait up to `timeout` for the first record of `topic` and deserialize it
    /// with `codec`. Always reads from the start of the topic.
    pub fn consume_first<T, C: Codec<T>>(
        &self,
        topic: &str,
        codec: &C,
        timeout: Duration,
    ) -> Result<T, HarnessError> {
        let mut values = self.consume_number(topic, 1, codec, timeout)?;
        match values.pop() {
            Some(value) => Ok(value),
            // consume_number never returns fewer than asked for
            None => Err(HarnessError::ConsumeTimeout {
                topic: topic.to_owned(),
                waited: timeout,
            }),
        }
    }

    /// Wait up to `timeout` for the first `n` records of `topic`
    #[instrument(level = "debug", skip(self, codec))]
    pub fn consume_number<T, C: Codec<T>>(
        &self,
        topic: &str,
        n: usize,
        codec: &C,
        timeout: Duration,
    ) -> Result<Vec<T>, HarnessError> {
        let addr = self.broker_addr()?;
        if n == 0 {
            return Ok(Vec::new());
        }
        let deadline = engine_rt::deadline_after(timeout);
        let mut client = self.connect(addr)?;
        let mut values = Vec::with_capacity(n);
        let mut offset = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let want = u32::try_from(n - values.len()).unwrap_or(u32::MAX);
            let batch = client.fetch(topic, offset, want, remaining, FETCH_SLACK)?;
            for record in batch.into_iter().take(n - values.len()) {
                offset = record.offset + 1;
                values.push(codec.deserialize(&record.payload)?);
            }
            if values.len() == n {
                break;
            }
            if Instant::now() >= deadline {
                debug!(got = values.len(), "consume timed out");
                return Err(HarnessError::ConsumeTimeout {
                    topic: topic.to_owned(),
                    waited: timeout,
                });
            }
        }
        client.close();
        debug!(n, next_offset = offset, "consumed");
        Ok(values)
    }

    /// Create `topic` on the current broker. Returns false if it already
    /// existed.
    pub fn create_topic(&self, topic: &str) -> Result<bool, HarnessError> {
        let mut client = self.connect(self.broker_addr()?)?;
        let created = client.create_topic(topic, self.settings().send_timeout)?;
        client.close();
        Ok(created)
    }

    /// A producer bound to the current broker that sends with `codec`
    pub fn producer<T, C: Codec<T>>(&self, codec: C) -> Result<Producer<T, C>, HarnessError> {
        let client = self.connect(self.broker_addr()?)?;
        Ok(Producer {
            client,
            codec,
            send_timeout: self.settings().send_timeout,
            _payload: PhantomData,
        })
    }

    /// [`Orchestrator::publish`] with the codec registered for `T`
    pub fn publish_registered<T: 'static>(
        &self,
        topic: &str,
        payload: &T,
    ) -> Result<(), HarnessError> {
        let codec = self.codecs().get::<T>()?;
        self.publish(topic, payload, &codec)
    }

    /// [`Orchestrator::consume_first`] with the codec registered for `T`
    pub fn consume_first_registered<T: 'static>(
        &self,
        topic: &str,
        timeout: Duration,
    ) -> Result<T, HarnessError> {
        let codec = self.codecs().get::<T>()?;
        self.consume_first(topic, &codec, timeout)
    }

    fn broker_addr(&self) -> Result<SocketAddr, HarnessError> {
        self.current()
            .map(|config| config.broker_addr())
            .ok_or_else(HarnessError::no_session)
    }

    fn connect(&self, addr: SocketAddr) -> Result<BrokerClient, HarnessError> {
        BrokerClient::connect(addr, self.settings().connect_timeout).map_err(|err| {
            HarnessError::BrokerUnavailable {
                reason: format!("cannot connect to broker at {addr}"),
                source: Some(err.into()),
            }
        })
    }
}

/// Long-lived producer for payloads of type `T`. It keeps one connection to
/// the broker of the session that was current when it was created; closing
/// or dropping it releases the connection.
pub struct Producer<T, C> {
    client: BrokerClient,
    codec: C,
    send_timeout: Duration,
    _payload: PhantomData<fn(&T)>,
}

impl<T, C> fmt::Debug for Producer<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("broker", &self.client.peer_addr())
            .field("send_timeout", &self.send_timeout)
            .finish()
    }
}

impl<T, C: Codec<T>> Producer<T, C> {
    /// Send `payload` to `topic` and wait for the acknowledgment. Returns the
    /// offset the broker assigned. After an acknowledgment times out the
    /// producer is unusable and every later send fails as unavailable.
    pub fn send(&mut self, topic: &str, payload: &T) -> Result<u64, HarnessError> {
        let bytes = self.codec.serialize(payload)?;
        Ok(self.client.produce(topic, bytes, self.send_timeout)?)
    }

    /// broker this producer sends to
    pub fn broker_addr(&self) -> SocketAddr {
        self.client.peer_addr()
    }

    /// close the connection
    pub fn close(self) {
        self.client.close();
    }
}
