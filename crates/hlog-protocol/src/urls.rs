//! Stream endpoint metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Named stream endpoints published for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlessLogUrls {
    /// Whether the instance is still producing output.
    pub online: bool,
    /// Stream URL per terminal id.
    #[serde(default)]
    pub streams: BTreeMap<String, String>,
}

impl HeadlessLogUrls {
    /// The first published stream, if any.
    pub fn first_stream(&self) -> Option<(&str, &str)> {
        self.streams
            .iter()
            .next()
            .map(|(terminal, url)| (terminal.as_str(), url.as_str()))
    }
}
