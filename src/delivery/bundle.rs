//! Bundle composer
//!
//! Builds a "download everything" zip as a byte stream. Slot presence is
//! probed with bounded parallelism, then each file is opened in turn and
//! copied through a streaming zip writer. The archive is handed to the
//! consumer chunk by chunk and never held whole.

use bytes::Bytes;
use futures::{stream, StreamExt};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::db::EntitlementStore;
use crate::entitlement::model::SlotName;
use crate::storage::{ByteStream, ObjectStore};
use crate::types::{Result, TurnstileError};

/// Upper bound on simultaneous slot fetches
pub const MAX_CONCURRENCY: usize = 4;

/// Archive chunks buffered ahead of a slow consumer
const CHANNEL_DEPTH: usize = 8;

/// One file inside a bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub slot: SlotName,
    /// Path inside the archive
    pub name: String,
}

/// A composed archive ready to stream
pub struct Bundle {
    /// Suggested download name
    pub file_name: String,
    pub entries: Vec<BundleEntry>,
    pub body: ByteStream,
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("file_name", &self.file_name)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

pub struct BundleComposer {
    store: Arc<dyn EntitlementStore>,
    objects: Arc<dyn ObjectStore>,
    concurrency: usize,
}

impl BundleComposer {
    /// `concurrency` is clamped to `1..=MAX_CONCURRENCY`
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        objects: Arc<dyn ObjectStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            objects,
            concurrency: concurrency.clamp(1, MAX_CONCURRENCY),
        }
    }

    /// Probe every bound slot and start streaming the archive.
    ///
    /// Slots whose file is missing or cannot be reached are skipped. Fails
    /// with `NotFound` only when no slot resolves, before any byte is sent.
    /// Probes run up to `concurrency` at a time; the writer then opens one
    /// slot stream at a time, so at most one fetch body is held open.
    pub async fn compose_archive(&self, asset_id: &str) -> Result<Bundle> {
        let asset = self
            .store
            .get_asset(asset_id)
            .await?
            .ok_or_else(|| TurnstileError::NotFound(format!("asset {}", asset_id)))?;

        let bound: Vec<(SlotName, String)> = asset
            .bound_slots()
            .map(|(slot, file_ref)| (slot, file_ref.to_string()))
            .collect();

        let objects = Arc::clone(&self.objects);
        let present: Vec<(SlotName, String)> = stream::iter(bound)
            .map(|(slot, file_ref)| {
                let objects = Arc::clone(&objects);
                async move {
                    let found = objects.exists(&file_ref).await;
                    (slot, file_ref, found)
                }
            })
            .buffered(self.concurrency)
            .filter_map(|(slot, file_ref, found)| async move {
                match found {
                    Ok(true) => Some((slot, file_ref)),
                    Ok(false) => {
                        debug!(%slot, file_ref = %file_ref, "bundle slot has no backing file, skipping");
                        None
                    }
                    Err(e) => {
                        warn!(%slot, file_ref = %file_ref, error = %e, "bundle slot probe failed, skipping");
                        None
                    }
                }
            })
            .collect()
            .await;

        if present.is_empty() {
            return Err(TurnstileError::NotFound(format!(
                "no files available for asset {}",
                asset_id
            )));
        }

        let mut entries = Vec::with_capacity(present.len());
        let mut sources = Vec::with_capacity(present.len());
        for (slot, file_ref) in present {
            let name = entry_name(&asset.slug, slot, &file_ref);
            entries.push(BundleEntry {
                slot,
                name: name.clone(),
            });
            sources.push((name, file_ref));
        }

        Ok(Bundle {
            file_name: format!("{}.zip", safe_file_stem(&asset.slug)),
            entries,
            body: spawn_archive_writer(Arc::clone(&self.objects), sources),
        })
    }
}

/// `{slug}/{slot}{ext}`, the extension taken from the backing reference
fn entry_name(slug: &str, slot: SlotName, file_ref: &str) -> String {
    let ext = Path::new(file_ref)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    format!("{}/{}{}", safe_file_stem(slug), slot, ext)
}

/// Restrict a slug to characters safe in archive paths and headers
pub fn safe_file_stem(slug: &str) -> String {
    let stem: String = slug
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if stem.trim_matches('.').is_empty() {
        "bundle".to_string()
    } else {
        stem
    }
}

/// Shared in-memory sink drained after every write
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn take(&self) -> io::Result<Bytes> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| io::Error::other("archive buffer poisoned"))?;
        Ok(Bytes::from(std::mem::take(&mut *buf)))
    }
}

impl Write for SharedSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("archive buffer poisoned"))?
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn spawn_archive_writer(
    objects: Arc<dyn ObjectStore>,
    sources: Vec<(String, String)>,
) -> ByteStream {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);

    tokio::spawn(async move {
        if let Err(e) = write_archive(objects.as_ref(), sources, &tx).await {
            // The consumer sees a failed body; headers are already out
            warn!(error = %e, "bundle stream aborted");
            let _ = tx.send(Err(e)).await;
        }
    });

    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

async fn write_archive(
    objects: &dyn ObjectStore,
    sources: Vec<(String, String)>,
    tx: &mpsc::Sender<io::Result<Bytes>>,
) -> io::Result<()> {
    let sink = SharedSink::default();
    let mut zip = ZipWriter::new_stream(sink.clone());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, file_ref) in sources {
        // Vanished between probe and fetch; the rest of the bundle still ships
        let mut body = match objects.resolve(&file_ref).await {
            Ok(Some(body)) => body,
            Ok(None) => {
                warn!(file_ref = %file_ref, "bundle slot disappeared before fetch, skipping");
                continue;
            }
            Err(e) => {
                warn!(file_ref = %file_ref, error = %e, "bundle slot fetch failed, skipping");
                continue;
            }
        };
        zip.start_file(name, options).map_err(io::Error::other)?;
        while let Some(chunk) = body.next().await {
            zip.write_all(&chunk?)?;
            forward(&sink, tx).await?;
        }
    }

    zip.finish().map_err(io::Error::other)?;
    forward(&sink, tx).await
}

async fn forward(sink: &SharedSink, tx: &mpsc::Sender<io::Result<Bytes>>) -> io::Result<()> {
    let bytes = sink.take()?;
    if bytes.is_empty() {
        return Ok(());
    }
    tx.send(Ok(bytes))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "bundle consumer went away"))
}
