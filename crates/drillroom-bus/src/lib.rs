use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use drillroom_schema::BusMessage;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum Topic {
    SessionLifecycle,
    TranscriptAppended,
    BeatOutcome,
}

impl Topic {
    pub fn from_message(msg: &BusMessage) -> Self {
        match msg {
            BusMessage::SessionStarted { .. } | BusMessage::SessionEnded { .. } => {
                Topic::SessionLifecycle
            }
            BusMessage::TranscriptAppended { .. } => Topic::TranscriptAppended,
            BusMessage::BeatFired { .. } | BusMessage::BeatSkipped { .. } => Topic::BeatOutcome,
        }
    }
}

type Subscriber = mpsc::Sender<BusMessage>;
type SubscriberMap = Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>;

/// Fan-out of notifications to per-topic subscribers. Slow or dropped
/// subscribers never block a publisher.
pub struct EventBus {
    subscribers: SubscriberMap,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(topic).or_default().push(tx);
        rx
    }

    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        publish_to(&self.subscribers, msg).await
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BusPublisher {
    subscribers: SubscriberMap,
}

impl BusPublisher {
    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        publish_to(&self.subscribers, msg).await
    }
}

async fn publish_to(subscribers: &SubscriberMap, msg: BusMessage) -> Result<()> {
    let topic = Topic::from_message(&msg);
    let mut subs = subscribers.write().await;
    if let Some(list) = subs.get_mut(&topic) {
        list.retain(|tx| !tx.is_closed());
        for tx in list.iter() {
            if tx.try_send(msg.clone()).is_err() {
                tracing::debug!(?topic, "bus subscriber lagging, message dropped");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drillroom_schema::{Message, MessageKind, Role};
    use tokio::time::{timeout, Duration};

    fn appended(session: &str) -> BusMessage {
        BusMessage::TranscriptAppended {
            message: Message::system(session, MessageKind::SessionStart, "start"),
        }
    }

    #[tokio::test]
    async fn publish_to_no_subscribers_succeeds() {
        let bus = EventBus::new(8);
        let msg = BusMessage::SessionEnded {
            session_id: "s1".into(),
            at: Utc::now(),
        };
        assert!(bus.publish(msg).await.is_ok());
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::TranscriptAppended).await;

        bus.publish(appended("s1")).await.unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.session_id(), "s1");
    }

    #[tokio::test]
    async fn different_topics_no_crosstalk() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::TranscriptAppended).await;

        bus.publish(BusMessage::BeatSkipped {
            session_id: "s1".into(),
            beat: 2,
            role: Role::Qa,
            intent: "qa_evidence_pressure".into(),
        })
        .await
        .unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = EventBus::new(8);
        let rx = bus.subscribe(Topic::TranscriptAppended).await;
        drop(rx);
        let mut live = bus.subscribe(Topic::TranscriptAppended).await;

        bus.publisher().publish(appended("s2")).await.unwrap();

        let received = timeout(Duration::from_millis(100), live.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, BusMessage::TranscriptAppended { .. }));
        let subs = bus.subscribers.read().await;
        assert_eq!(subs.get(&Topic::TranscriptAppended).map(Vec::len), Some(1));
    }
}
