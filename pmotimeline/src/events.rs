//! Événements de piste vers les collaborateurs externes (UI).

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use uuid::Uuid;

/// Événements publiés par une piste.
#[derive(Debug, Clone)]
pub enum TrackEvent {
    /// La durée totale a changé (fin d'append ou de replace) ; l'état UI
    /// dépendant de la durée doit être invalidé.
    DurationChanged { frames: u64 },
    /// Une compression d'arrière-plan a échoué. Émis pour que les échecs
    /// fire-and-forget ne soient jamais perdus en silence.
    CompressionFailed { segment: Uuid, error: String },
}

/// Publieur d'événements multi-abonnés.
///
/// Les abonnés lents ou disparus sont élagués au fil des publications ;
/// publier ne bloque jamais l'orchestrateur.
#[derive(Clone, Default)]
pub struct TrackEvents {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<TrackEvent>>>>,
}

impl TrackEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TrackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("event subscribers mutex poisoned")
            .push(tx);
        rx
    }

    pub fn publish(&self, event: TrackEvent) {
        self.subscribers
            .lock()
            .expect("event subscribers mutex poisoned")
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("event subscribers mutex poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let events = TrackEvents::new();
        let mut rx1 = events.subscribe();
        let mut rx2 = events.subscribe();

        events.publish(TrackEvent::DurationChanged { frames: 42 });
        assert!(matches!(
            rx1.recv().await,
            Some(TrackEvent::DurationChanged { frames: 42 })
        ));
        assert!(matches!(
            rx2.recv().await,
            Some(TrackEvent::DurationChanged { frames: 42 })
        ));
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let events = TrackEvents::new();
        let rx = events.subscribe();
        drop(rx);
        events.publish(TrackEvent::DurationChanged { frames: 1 });
        assert_eq!(events.subscriber_count(), 0);
    }
}
