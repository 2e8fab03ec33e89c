//! Self-contained module URLs and the timed import.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::{self, Either};

use crate::error::{ImportError, LoadError};
use crate::host::Host;
use crate::transformer::TransformedProgram;

const DATA_URL_PREFIX: &str = "data:text/javascript;base64,";

/// A module embedded in its own URL; nothing is fetched from anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl(String);

impl DataUrl {
    pub fn encode(source: &str) -> Self {
        Self(format!("{DATA_URL_PREFIX}{}", STANDARD.encode(source.as_bytes())))
    }

    /// The embedded module source.
    pub fn decode(&self) -> Option<String> {
        let payload = self.0.strip_prefix(DATA_URL_PREFIX)?;
        let bytes = STANDARD.decode(payload).ok()?;
        String::from_utf8(bytes).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Loader {
    timeout_ms: u64,
}

impl Loader {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout_ms }
    }

    /// Imports `program` and returns its render entry.
    ///
    /// A timed-out import is only abandoned: the host may still finish it
    /// in the background and its result is dropped.
    pub async fn load<H: Host>(
        &self,
        host: &H,
        program: &TransformedProgram,
    ) -> Result<H::Entry, LoadError> {
        let url = DataUrl::encode(&program.module_source);
        log::debug!("importing module ({} bytes of source)", program.module_source.len());

        let import = host.import_module(&url);
        let timeout = host.sleep(self.timeout_ms);
        match future::select(import, timeout).await {
            Either::Left((Ok(module), _)) => {
                host.render_entry(&module).ok_or(LoadError::InvalidExport)
            }
            Either::Left((Err(error), _)) => Err(LoadError::Import(map_location(error, program))),
            Either::Right(((), _)) => {
                log::warn!("module import timed out after {} ms", self.timeout_ms);
                Err(LoadError::Timeout {
                    after_ms: self.timeout_ms,
                })
            }
        }
    }
}

/// Rewrites a location in the transformed module to the user's line; drops
/// locations inside the prelude.
fn map_location(mut error: ImportError, program: &TransformedProgram) -> ImportError {
    if let Some(location) = error.location.as_mut() {
        match program.original_line(location.line) {
            Some(line) => location.line = line,
            None => error.location = None,
        }
    }
    error
}
