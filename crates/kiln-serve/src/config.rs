// Copyright (c) 2025 Zensical and contributors

// SPDX-License-Identifier: MIT
// Third-party contributions licensed under DCO

// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:

// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NON-INFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

// ----------------------------------------------------------------------------

//! Configuration.

use serde::Deserialize;
use std::time::Duration;

// ----------------------------------------------------------------------------
// Structs
// ----------------------------------------------------------------------------

/// Configuration.
///
/// All settings are optional when deserializing, so a configuration file only
/// needs to mention what it wants to change.
///
/// # Examples
///
/// ```
/// use kiln_serve::config::Config;
///
/// // Create configuration and override port
/// let config = Config { port: 9000, ..Default::default() };
/// assert_eq!(config.addr(), "127.0.0.1:9000");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host to bind to.
    pub host: String,
    /// Port to bind to.
    pub port: u16,
    /// Timeout for polling, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Number of bytes read from a socket at once.
    pub read_buffer_size: usize,
    /// Capacity of the readiness event buffer.
    pub events_capacity: usize,
    /// Largest accepted frame payload, in bytes.
    pub max_frame_size: u64,
    /// Largest accepted upgrade request, in bytes.
    pub max_handshake_size: usize,
}

// ----------------------------------------------------------------------------
// Implementations
// ----------------------------------------------------------------------------

#[allow(clippy::must_use_candidate)]
impl Config {
    /// Returns the address to bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the timeout for polling.
    #[inline]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Trait implementations
// ----------------------------------------------------------------------------

impl Default for Config {
    /// Creates a default configuration.
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 8080,
            poll_timeout_ms: 100,
            read_buffer_size: 8192,
            events_capacity: 1024,
            max_frame_size: 16 * 1024 * 1024,
            max_handshake_size: 16 * 1024,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial() {
        let config: Config =
            serde_json::from_str(r#"{ "port": 9001, "poll_timeout_ms": 5 }"#)
                .unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.poll_timeout(), Duration::from_millis(5));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.max_handshake_size, 16 * 1024);
    }
}
