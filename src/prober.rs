use std::sync::Arc;

use futures_util::TryStreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::source::{HeadInfo, RangeFetch, SnapshotSource};
use crate::types::VersionInfo;

/// Answers "has the remote snapshot changed?" while transferring as little as
/// possible. Strategies, each tried only when the previous one gave no usable
/// token:
///
/// 1. `ETag` from a HEAD request
/// 2. `Last-Modified` from the same response
/// 3. the embedded `version` field read from a ranged prefix of the body
/// 4. the embedded `version` field read from the full body
pub struct VersionProber {
    source: Arc<dyn SnapshotSource>,
    prefix_bytes: u64,
}

impl VersionProber {
    pub fn new(source: Arc<dyn SnapshotSource>, prefix_bytes: u64) -> Self {
        Self { source, prefix_bytes: prefix_bytes.max(1) }
    }

    pub async fn probe(&self) -> Result<VersionInfo> {
        let mut size = None;
        let mut last_modified = None;

        match self.source.head().await {
            Ok(head) => {
                size = head.content_length;
                last_modified = head.last_modified.clone();
                if let Some(version) = version_token(&head) {
                    let basis = if head.etag.is_some() { "ETag" } else { "Last-Modified" };
                    info!(version = %version, "Server version from {basis} header");
                    return Ok(VersionInfo { version, size, last_modified });
                }
                debug!("HEAD {} carried no validators, trying ranged read", self.source.url());
            }
            Err(e) => warn!("HEAD {} failed: {e}", self.source.url()),
        }

        match self.source.fetch_prefix(self.prefix_bytes).await {
            Ok(RangeFetch::Partial(fragment)) => match scan_version_field(&fragment) {
                PrefixScan::Found(version) => {
                    info!(version = %version, bytes = fragment.len(), "Server version from ranged prefix");
                    return Ok(VersionInfo { version, size, last_modified });
                }
                other => debug!("Ranged prefix gave {other:?}, falling back to full body"),
            },
            Ok(RangeFetch::Unsupported) => debug!("Range requests unsupported, falling back to full body"),
            Err(e) => warn!("Ranged read of {} failed: {e}", self.source.url()),
        }

        match self.full_body_version().await {
            Ok((version, bytes)) => {
                info!(version = %version, bytes, "Server version from full download");
                Ok(VersionInfo { version, size: size.or(Some(bytes)), last_modified })
            }
            Err(e) => Err(AppError::Probe(format!(
                "no strategy produced a version for {}: {e}",
                self.source.url()
            ))),
        }
    }

    async fn full_body_version(&self) -> Result<(String, u64)> {
        #[derive(Deserialize)]
        struct VersionOnly {
            version: String,
        }

        let body = self.source.open().await?;
        let bytes: Vec<u8> = body
            .chunks
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        let parsed: VersionOnly = serde_json::from_slice(&bytes)?;
        Ok((parsed.version, bytes.len() as u64))
    }
}

/// Version token from cache validators: the entity tag with its quotes
/// removed, else the Last-Modified string.
pub fn version_token(head: &HeadInfo) -> Option<String> {
    if let Some(etag) = &head.etag {
        let stripped = etag.replace('"', "");
        if !stripped.is_empty() {
            return Some(stripped);
        }
    }
    head.last_modified.clone()
}

// ---------------------------------------------------------------------------
// Prefix tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixScan {
    Found(String),
    /// The top-level object closed without a `version` field.
    Absent,
    /// The fragment ended before the field could be resolved.
    Truncated,
    /// Not a JSON object, or `version` is not a string.
    Malformed,
}

enum Stop {
    Truncated,
    Malformed,
}

/// Scan the top-level fields of a (possibly truncated) JSON object and stop as
/// soon as the `version` field is resolved. Values of other fields are skipped
/// without being decoded. Work is bounded by the fragment length.
pub fn scan_version_field(fragment: &[u8]) -> PrefixScan {
    let mut tokenizer = Tokenizer { bytes: fragment, pos: 0 };
    match tokenizer.find_version() {
        Ok(Some(version)) => PrefixScan::Found(version),
        Ok(None) => PrefixScan::Absent,
        Err(Stop::Truncated) => PrefixScan::Truncated,
        Err(Stop::Malformed) => PrefixScan::Malformed,
    }
}

struct Tokenizer<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    fn find_version(&mut self) -> std::result::Result<Option<String>, Stop> {
        self.expect(b'{')?;
        loop {
            match self.peek_significant()? {
                b'}' => return Ok(None),
                b'"' => {}
                _ => return Err(Stop::Malformed),
            }
            let key = decode_string(self.string()?)?;
            self.expect(b':')?;

            if key == "version" {
                if self.peek_significant()? != b'"' {
                    return Err(Stop::Malformed);
                }
                return decode_string(self.string()?).map(Some);
            }
            self.skip_value()?;

            match self.peek_significant()? {
                b',' => self.pos += 1,
                b'}' => return Ok(None),
                _ => return Err(Stop::Malformed),
            }
        }
    }

    /// Next non-whitespace byte, without consuming it.
    fn peek_significant(&mut self) -> std::result::Result<u8, Stop> {
        while let Some(&b) = self.bytes.get(self.pos) {
            if !b.is_ascii_whitespace() {
                return Ok(b);
            }
            self.pos += 1;
        }
        Err(Stop::Truncated)
    }

    fn expect(&mut self, byte: u8) -> std::result::Result<(), Stop> {
        if self.peek_significant()? != byte {
            return Err(Stop::Malformed);
        }
        self.pos += 1;
        Ok(())
    }

    /// Raw string literal including its quotes. Cursor must be on the opening quote.
    fn string(&mut self) -> std::result::Result<&'a [u8], Stop> {
        let start = self.pos;
        self.pos += 1;
        while let Some(&b) = self.bytes.get(self.pos) {
            match b {
                b'\\' => self.pos += 2,
                b'"' => {
                    self.pos += 1;
                    return Ok(&self.bytes[start..self.pos]);
                }
                _ => self.pos += 1,
            }
        }
        Err(Stop::Truncated)
    }

    fn skip_value(&mut self) -> std::result::Result<(), Stop> {
        match self.peek_significant()? {
            b'"' => self.string().map(|_| ()),
            b'{' | b'[' => {
                let mut depth = 0usize;
                loop {
                    match self.bytes.get(self.pos) {
                        None => return Err(Stop::Truncated),
                        Some(b'"') => {
                            self.string()?;
                        }
                        Some(b'{' | b'[') => {
                            depth += 1;
                            self.pos += 1;
                        }
                        Some(b'}' | b']') => {
                            depth -= 1;
                            self.pos += 1;
                            if depth == 0 {
                                return Ok(());
                            }
                        }
                        Some(_) => self.pos += 1,
                    }
                }
            }
            _ => {
                // number, true, false, null
                while let Some(&b) = self.bytes.get(self.pos) {
                    if b == b',' || b == b'}' || b == b']' || b.is_ascii_whitespace() {
                        return Ok(());
                    }
                    self.pos += 1;
                }
                Err(Stop::Truncated)
            }
        }
    }
}

fn decode_string(raw: &[u8]) -> std::result::Result<String, Stop> {
    serde_json::from_slice(raw).map_err(|_| Stop::Malformed)
}
