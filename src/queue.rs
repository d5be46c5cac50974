//! Note event queue: a bounded single-producer / single-consumer FIFO.
//!
//! The detector owns the [`NoteSender`]; the note spawner owns the
//! [`NoteReceiver`]. Both halves are `Send`, so the consumer can live on
//! another thread. Popping is destructive: every event is yielded once.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use serde::{Deserialize, Serialize};

/// A detected onset mapped onto a lane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetEvent {
    /// Absolute time in seconds.
    pub time: f64,
    pub lane: usize,
}

/// Create a connected sender/receiver pair holding up to `capacity` events.
pub fn note_queue(capacity: usize) -> (NoteSender, NoteReceiver) {
    let (producer, consumer) = HeapRb::<OnsetEvent>::new(capacity.max(1)).split();
    (
        NoteSender {
            producer,
            dropped: 0,
        },
        NoteReceiver { consumer },
    )
}

pub struct NoteSender {
    producer: HeapProd<OnsetEvent>,
    dropped: u64,
}

impl NoteSender {
    /// Enqueue `event`. When the consumer has fallen behind and the queue is
    /// full, the event is dropped and `false` is returned.
    pub fn push(&mut self, event: OnsetEvent) -> bool {
        match self.producer.try_push(event) {
            Ok(()) => true,
            Err(event) => {
                self.dropped += 1;
                log::warn!(
                    "Note queue full ({} events); dropping event at {:.3}s",
                    self.producer.capacity(),
                    event.time
                );
                false
            }
        }
    }

    /// Events lost to a full queue since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn capacity(&self) -> usize {
        self.producer.capacity().get()
    }
}

pub struct NoteReceiver {
    consumer: HeapCons<OnsetEvent>,
}

impl NoteReceiver {
    pub fn pop(&mut self) -> Option<OnsetEvent> {
        self.consumer.try_pop()
    }

    /// Remove and return everything currently queued, oldest first.
    pub fn drain(&mut self) -> Vec<OnsetEvent> {
        self.consumer.pop_iter().collect()
    }

    /// Remove and return the leading events whose time is at or before `now`.
    pub fn pop_due(&mut self, now: f64) -> Vec<OnsetEvent> {
        let mut due = Vec::new();
        while self.consumer.iter().next().is_some_and(|e| e.time <= now) {
            if let Some(event) = self.consumer.try_pop() {
                due.push(event);
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}

impl Iterator for NoteReceiver {
    type Item = OnsetEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(time: f64, lane: usize) -> OnsetEvent {
        OnsetEvent { time, lane }
    }

    #[test]
    fn drains_in_order_exactly_once() {
        let (mut tx, mut rx) = note_queue(8);
        for i in 0..5 {
            assert!(tx.push(event(i as f64 * 0.5, i % 3)));
        }
        assert_eq!(rx.len(), 5);

        let first = rx.drain();
        assert_eq!(first.len(), 5);
        assert!(first.windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(first[4], event(2.0, 1));

        assert!(rx.drain().is_empty());
        assert!(rx.is_empty());
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (mut tx, mut rx) = note_queue(2);
        assert!(tx.push(event(0.0, 0)));
        assert!(tx.push(event(1.0, 1)));
        assert!(!tx.push(event(2.0, 2)));
        assert_eq!(tx.dropped(), 1);
        assert_eq!(tx.capacity(), 2);

        assert_eq!(rx.pop(), Some(event(0.0, 0)));
        assert!(tx.push(event(3.0, 3)));
        assert_eq!(rx.drain(), vec![event(1.0, 1), event(3.0, 3)]);
    }

    #[test]
    fn pop_due_stops_at_future_events() {
        let (mut tx, mut rx) = note_queue(8);
        for t in [0.1, 0.2, 0.9, 1.5] {
            tx.push(event(t, 0));
        }

        let due = rx.pop_due(0.5);
        assert_eq!(due.len(), 2);
        assert!(rx.pop_due(0.5).is_empty());
        assert_eq!(rx.pop_due(2.0).len(), 2);
        assert!(rx.is_empty());
    }

    #[test]
    fn receiver_moves_across_threads() {
        let (mut tx, rx) = note_queue(16);
        for i in 0..10 {
            tx.push(event(i as f64, i % 4));
        }
        let handle = std::thread::spawn(move || rx.collect::<Vec<_>>());
        let received = handle.join().unwrap();
        assert_eq!(received.len(), 10);
    }
}
