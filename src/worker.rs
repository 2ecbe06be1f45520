//! Single-writer worker loop.
//!
//! A worker owns one [`Frbrizer`] and drains a bounded channel of broker
//! deliveries. Each delivery is processed to completion and its conversion
//! request handed to a [`ConversionSink`] before the delivery is
//! acknowledged. A store failure nacks the delivery and leaves redelivery to
//! the broker; changes written before the failure stay pending and go out
//! with the next conversion request.
//!
//! Parallelism comes from running several workers, each over its own slice
//! of the indexes. [`ShardRouter`] assigns records to workers by a stable
//! hash of their normalized title.

use crate::config::WorkerConfig;
use crate::convert::ConversionRequest;
use crate::error::{FrbrError, Result};
use crate::frbrizer::{BatchMessage, BatchReport, Frbrizer};
use crate::index::MatchIndex;
use crate::normalize::title_key;
use crate::record::Record;
use crossbeam_channel::{bounded, Receiver, Sender};
use sha2::{Digest, Sha256};
use std::thread;
use tracing::{debug, error, info, warn};

/// Work carried by one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Records to frbrize
    Records(BatchMessage),
    /// Raw record ids to withdraw
    Delete(Vec<String>),
}

/// One broker delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker delivery tag
    pub tag: u64,
    /// Message content
    pub payload: Payload,
}

/// Outcome reported back to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// Processed; remove from the queue
    Ack,
    /// Not processed; redeliver
    Nack,
}

/// Acknowledgement for one delivery tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Delivery tag being acknowledged
    pub tag: u64,
    /// Ack or nack
    pub kind: AckKind,
}

/// Receives conversion requests downstream of the worker.
pub trait ConversionSink {
    /// Hand off one request.
    ///
    /// # Errors
    ///
    /// Returns an error when the request could not be handed off; the worker
    /// then nacks the delivery.
    fn send_request(&mut self, request: ConversionRequest) -> Result<()>;
}

impl ConversionSink for Sender<ConversionRequest> {
    fn send_request(&mut self, request: ConversionRequest) -> Result<()> {
        self.send(request)
            .map_err(|_| FrbrError::Store("conversion channel closed".to_string()))
    }
}

impl ConversionSink for Vec<ConversionRequest> {
    fn send_request(&mut self, request: ConversionRequest) -> Result<()> {
        self.push(request);
        Ok(())
    }
}

/// Counters for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Deliveries acknowledged
    pub acked: usize,
    /// Deliveries nacked
    pub nacked: usize,
    /// Conversion requests handed off
    pub requests: usize,
    /// Records reported for requeue
    pub requeued: usize,
}

fn process<I: MatchIndex>(frbrizer: &mut Frbrizer<I>, payload: &Payload) -> Result<BatchReport> {
    match payload {
        Payload::Records(message) => frbrizer.frbrize_message(message),
        Payload::Delete(raw_record_ids) => frbrizer.delete_records(raw_record_ids),
    }
}

/// Drain `deliveries` until the channel closes.
///
/// Returns early if the acknowledgement channel closes.
pub fn run<I: MatchIndex, S: ConversionSink + ?Sized>(
    frbrizer: &mut Frbrizer<I>,
    deliveries: &Receiver<Delivery>,
    acknowledgements: &Sender<Acknowledgement>,
    sink: &mut S,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    for delivery in deliveries {
        let result = process(frbrizer, &delivery.payload).and_then(|report| {
            if let Some(request) = frbrizer.take_conversion_request() {
                if let Err(err) = sink.send_request(request.clone()) {
                    frbrizer.restore_conversion_request(request);
                    return Err(err);
                }
                stats.requests += 1;
            }
            Ok(report)
        });
        let kind = match result {
            Ok(report) => {
                stats.acked += 1;
                stats.requeued += report.requeue.len();
                debug!(tag = delivery.tag, "delivery processed");
                AckKind::Ack
            },
            Err(err) => {
                error!(tag = delivery.tag, error = %err, "delivery aborted");
                stats.nacked += 1;
                AckKind::Nack
            },
        };
        let ack = Acknowledgement {
            tag: delivery.tag,
            kind,
        };
        if acknowledgements.send(ack).is_err() {
            warn!("acknowledgement channel closed, stopping worker");
            break;
        }
    }
    info!(
        acked = stats.acked,
        nacked = stats.nacked,
        requests = stats.requests,
        "worker stopped"
    );
    stats
}

/// A worker running on its own thread.
#[derive(Debug)]
pub struct WorkerHandle<I> {
    deliveries: Sender<Delivery>,
    acknowledgements: Receiver<Acknowledgement>,
    handle: thread::JoinHandle<(Frbrizer<I>, WorkerStats)>,
}

impl<I: MatchIndex + Send + 'static> WorkerHandle<I> {
    /// Start a worker thread with a delivery channel of
    /// `config.channel_capacity`.
    pub fn spawn<S>(mut frbrizer: Frbrizer<I>, config: &WorkerConfig, mut sink: S) -> Self
    where
        S: ConversionSink + Send + 'static,
    {
        let (delivery_tx, delivery_rx) = bounded(config.channel_capacity);
        let (ack_tx, ack_rx) = bounded(config.channel_capacity);
        let handle = thread::spawn(move || {
            let stats = run(&mut frbrizer, &delivery_rx, &ack_tx, &mut sink);
            (frbrizer, stats)
        });
        WorkerHandle {
            deliveries: delivery_tx,
            acknowledgements: ack_rx,
            handle,
        }
    }

    /// Queue a delivery, blocking while the channel is full.
    ///
    /// # Errors
    ///
    /// Returns [`FrbrError::Store`] if the worker has stopped.
    pub fn deliver(&self, delivery: Delivery) -> Result<()> {
        self.deliveries
            .send(delivery)
            .map_err(|_| FrbrError::Store("worker stopped".to_string()))
    }

    /// Acknowledgements, in delivery order.
    pub fn acknowledgements(&self) -> &Receiver<Acknowledgement> {
        &self.acknowledgements
    }

    /// Close the delivery channel and wait for the worker.
    ///
    /// # Errors
    ///
    /// Returns [`FrbrError::Store`] if the worker thread panicked.
    pub fn join(self) -> Result<(Frbrizer<I>, WorkerStats)> {
        drop(self.deliveries);
        self.handle
            .join()
            .map_err(|_| FrbrError::Store("worker thread panicked".to_string()))
    }
}

/// Assigns titles and records to shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shards: usize,
}

impl ShardRouter {
    /// Router over `shards` shards (at least one).
    #[must_use]
    pub fn new(shards: usize) -> Self {
        ShardRouter {
            shards: shards.max(1),
        }
    }

    /// Number of shards.
    #[must_use]
    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Shard of a title, after normalization.
    #[must_use]
    pub fn shard_for_title(&self, title: &str) -> usize {
        let digest = Sha256::digest(title_key(title).as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let shards = self.shards as u64;
        // Always < shards, which is a usize.
        #[allow(clippy::cast_possible_truncation)]
        let shard = (u64::from_be_bytes(prefix) % shards) as usize;
        shard
    }

    /// Shard of a record, by its 245 `$a`. Records without one go to shard 0.
    #[must_use]
    pub fn shard_for_record(&self, record: &Record) -> usize {
        record
            .first_value("245", &['a'])
            .map_or(0, |title| self.shard_for_title(&title))
    }

    /// Split a message into one message per shard, each with the same job.
    #[must_use]
    pub fn split(&self, message: BatchMessage) -> Vec<BatchMessage> {
        let mut parts: Vec<BatchMessage> = (0..self.shards)
            .map(|_| BatchMessage {
                records: Vec::new(),
                job: message.job.clone(),
            })
            .collect();
        for record in message.records {
            let shard = self.shard_for_record(&record);
            parts[shard].records.push(record);
        }
        parts
    }
}
