//! Streaming decoder for the tool's `output -json` document.
//!
//! The decoder runs on a blocking thread reading the receiving half of a
//! duplex pipe while the tool's stdout pump writes into the other half. It has
//! two terminal modes: it decodes the top-level object entry by entry, and on
//! any failure it switches to draining the pipe until end of stream so the
//! writer is never left blocked on a full buffer. The result is reported once
//! through a oneshot channel.

use std::fmt;
use std::io::{self, BufRead, BufReader};

use serde::de::{Deserializer as _, MapAccess, Visitor};
use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use super::types::{Output, OutputMap, RunnerError};

/// Start decoding `reader` in the background.
///
/// Must be called from within a tokio runtime.
pub(crate) fn spawn_decoder(reader: DuplexStream) -> oneshot::Receiver<Result<OutputMap, RunnerError>> {
  let (tx, rx) = oneshot::channel();
  let bridge = SyncIoBridge::new(reader);

  tokio::task::spawn_blocking(move || {
    let mut reader = BufReader::new(bridge);
    let result = decode_outputs(&mut reader);
    if result.is_err() {
      match io::copy(&mut reader, &mut io::sink()) {
        Ok(drained) => debug!(bytes = drained, "drained output pipe after decode failure"),
        Err(e) => debug!(error = %e, "failed to drain output pipe"),
      }
    }
    let _ = tx.send(result);
  });

  rx
}

/// Decode one outputs document from `reader`.
///
/// An empty (or whitespace-only) stream decodes to an empty map.
pub(crate) fn decode_outputs<R: BufRead>(reader: &mut R) -> Result<OutputMap, RunnerError> {
  if at_end_of_stream(reader)? {
    return Ok(OutputMap::new());
  }

  let mut de = serde_json::Deserializer::from_reader(reader.by_ref());
  let mut failed_entry = None;
  let result = (&mut de).deserialize_map(OutputsVisitor {
    failed_entry: &mut failed_entry,
  });
  let outputs = result.map_err(|source| RunnerError::Decode {
    name: failed_entry.take(),
    source,
  })?;
  de.end().map_err(|source| RunnerError::Decode { name: None, source })?;

  Ok(outputs)
}

/// Skip leading whitespace and report whether the stream is exhausted.
fn at_end_of_stream<R: BufRead>(reader: &mut R) -> Result<bool, RunnerError> {
  loop {
    let buf = reader.fill_buf()?;
    if buf.is_empty() {
      return Ok(true);
    }
    let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
    let exhausted = skip == buf.len();
    reader.consume(skip);
    if !exhausted {
      return Ok(false);
    }
  }
}

struct OutputsVisitor<'a> {
  failed_entry: &'a mut Option<String>,
}

impl<'de> Visitor<'de> for OutputsVisitor<'_> {
  type Value = OutputMap;

  fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.write_str("a map of output names to output records")
  }

  fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
  where
    A: MapAccess<'de>,
  {
    let mut outputs = OutputMap::new();
    while let Some(name) = access.next_key::<String>()? {
      match access.next_value::<Output>() {
        Ok(output) => {
          outputs.insert(name, output);
        }
        Err(e) => {
          *self.failed_entry = Some(name);
          return Err(e);
        }
      }
    }
    Ok(outputs)
  }
}
