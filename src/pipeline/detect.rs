// Detection pipeline: blob -> correlation -> at most one alert per blob

use super::{parse_trigger, EntityStream, PipelineOptions, Stage};
use crate::error::{Result, RetroError};
use crate::model::{Entity, Ioc, Value};
use crate::notify::{Alert, AlertMatch, Notifier};
use crate::service::RepositoryService;
use crate::transport::{BlobLocation, EntityTransport};
use ahash::AHashMap;
use std::sync::Arc;
use tracing::Instrument;

/// Outcome of one blob's detection run
#[derive(Debug, Clone)]
pub struct Detection {
    pub location: BlobLocation,
    pub scanned: usize,
    /// The alert that was delivered, if anything matched
    pub alert: Option<Alert>,
}

impl Detection {
    pub fn notified(&self) -> bool {
        self.alert.is_some()
    }
}

pub struct Detector {
    service: Arc<RepositoryService>,
    transport: EntityTransport,
    notifier: Arc<dyn Notifier>,
    options: PipelineOptions,
}

impl Detector {
    pub fn new(
        service: Arc<RepositoryService>,
        transport: EntityTransport,
        notifier: Arc<dyn Notifier>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            service,
            transport,
            notifier,
            options,
        }
    }

    /// Handle a raw trigger envelope: detect on every location it names.
    ///
    /// Every location is streamed and matched before any alert is sent: a
    /// read or match failure in any of them fails the trigger with no
    /// notification sent, leaving redelivery to the caller's scheduler.
    pub async fn handle(&self, raw_event: &str) -> Result<Vec<Detection>> {
        let locations = parse_trigger(raw_event)?;
        tracing::info!("Trigger received for {} location(s)", locations.len());

        let mut scans = Vec::with_capacity(locations.len());
        for location in locations {
            scans.push(self.scan(location).await?);
        }

        let mut detections = Vec::with_capacity(scans.len());
        for scan in scans {
            detections.push(self.deliver(scan).await?);
        }
        Ok(detections)
    }

    /// Run detection for one blob location
    pub async fn detect(&self, location: BlobLocation) -> Result<Detection> {
        let scan = self.scan(location).await?;
        self.deliver(scan).await
    }

    async fn scan(&self, location: BlobLocation) -> Result<Scan> {
        let span = tracing::info_span!("scan", location = %location);
        async {
            let mut stage = Stage::Received;
            let result = self.stream_and_match(&location, &mut stage).await;
            result.map_err(|e| failed(e, stage, &location))
        }
        .instrument(span)
        .await
    }

    async fn stream_and_match(&self, location: &BlobLocation, stage: &mut Stage) -> Result<Scan> {
        *stage = Stage::Located;
        let mut stream =
            EntityStream::open(&self.transport, location, self.options.read_timeout).await?;

        let mut matches = MatchSet::default();
        let mut scanned = 0;
        loop {
            *stage = Stage::Streaming;
            let batch = stream.next_batch(self.options.match_batch_size).await?;
            if batch.is_empty() {
                break;
            }
            scanned += batch.len();

            *stage = Stage::Matching;
            let iocs = self
                .service
                .get_ioc_set(&batch)
                .await
                .map_err(|e| e.with("value", &batch[0].value).with("batch", batch.len()))?;
            if !iocs.is_empty() {
                tracing::debug!("{} IOC(s) matched in batch of {}", iocs.len(), batch.len());
                matches.record(&batch, &iocs);
            }
        }

        Ok(Scan {
            location: location.clone(),
            scanned,
            matches,
        })
    }

    async fn deliver(&self, scan: Scan) -> Result<Detection> {
        let Scan {
            location,
            scanned,
            matches,
        } = scan;

        if matches.is_empty() {
            tracing::info!(stage = %Stage::Done, %location, scanned, "No IOC matched");
            return Ok(Detection {
                location,
                scanned,
                alert: None,
            });
        }

        let alert = Alert {
            location: location.clone(),
            scanned,
            matches: matches.into_matches(),
        };
        tokio::time::timeout(self.options.notify_timeout, self.notifier.notify(&alert))
            .await
            .map_err(|_| {
                RetroError::Notification(format!(
                    "Alert delivery timed out after {:?}",
                    self.options.notify_timeout
                ))
            })
            .and_then(|sent| sent)
            .map_err(|e| failed(e, Stage::Notifying, &location))?;

        tracing::info!(
            stage = %Stage::Done,
            %location,
            scanned,
            matched = alert.matches.len(),
            "Alert sent"
        );
        Ok(Detection {
            location,
            scanned,
            alert: Some(alert),
        })
    }
}

/// Matches found in one blob, not yet delivered
struct Scan {
    location: BlobLocation,
    scanned: usize,
    matches: MatchSet,
}

fn failed(e: RetroError, stage: Stage, location: &BlobLocation) -> RetroError {
    let e = e.with("stage", stage).with("location", location);
    tracing::error!(
        stage = %Stage::Failed,
        failed_at = %stage,
        kind = %e.kind(),
        retryable = e.is_retryable(),
        "Detection failed: {}",
        e
    );
    e
}

/// Matched values in first-seen order, with deduplicated provenance
#[derive(Default)]
struct MatchSet {
    index: AHashMap<Value, usize>,
    matches: Vec<AlertMatch>,
}

impl MatchSet {
    fn record(&mut self, batch: &[Entity], iocs: &[Ioc]) {
        for ioc in iocs {
            let slot = match self.index.get(&ioc.value) {
                Some(&slot) => slot,
                None => {
                    self.matches.push(AlertMatch {
                        value: ioc.value.clone(),
                        ioc_sources: Vec::new(),
                        entity_labels: Vec::new(),
                    });
                    self.index.insert(ioc.value.clone(), self.matches.len() - 1);
                    self.matches.len() - 1
                }
            };
            push_unique(&mut self.matches[slot].ioc_sources, &ioc.source);
        }

        for entity in batch {
            if let Some(&slot) = self.index.get(&entity.value) {
                push_unique(&mut self.matches[slot].entity_labels, &entity.label);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    fn into_matches(self) -> Vec<AlertMatch> {
        self.matches
    }
}

fn push_unique(items: &mut Vec<String>, item: &str) {
    if !items.iter().any(|i| i == item) {
        items.push(item.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_set_coalesces_values() {
        let mut set = MatchSet::default();
        let batch = vec![
            Entity::new(Value::domain("five"), "proxy", "", 1),
            Entity::new(Value::domain("five"), "dns", "", 2),
            Entity::new(Value::ip_addr("five"), "fw", "", 3),
        ];
        let iocs = vec![
            Ioc::new(Value::domain("five"), "feed-a", 1),
            Ioc::new(Value::domain("five"), "feed-b", 1),
        ];

        set.record(&batch, &iocs);
        set.record(&batch[..1], &iocs[..1]);

        let matches = set.into_matches();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].ioc_sources, vec!["feed-a", "feed-b"]);
        assert_eq!(matches[0].entity_labels, vec!["proxy", "dns"]);
    }
}
