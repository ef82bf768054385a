//! RepeaterConfig - Config Loader output
//!
//! Describes the upstream stream, every output stream, and the per-output selection policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Default burst length for the block policy (frames per trigger)
pub const DEFAULT_BLOCK_SIZE: u64 = 15;

/// Default per-output queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;

/// Default transport I/O thread count
pub const DEFAULT_IO_THREADS: usize = 1;

/// Default `source` tag expected on upstream frames
pub const DEFAULT_EXPECTED_SOURCE: &str = "gigafrost";

/// Complete repeater configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RepeaterConfig {
    /// Incoming detector stream
    #[validate(nested)]
    pub upstream: UpstreamConfig,

    /// Output streams, each with its own policy, queue and socket
    #[validate(nested)]
    pub outputs: Vec<OutputConfig>,

    /// Burst length used by every `block` policy
    #[serde(default = "default_block_size")]
    #[validate(range(min = 1))]
    pub block_size: u64,

    /// Transport I/O thread count
    #[serde(default = "default_io_threads")]
    #[validate(range(min = 1))]
    pub io_threads: usize,
}

fn default_block_size() -> u64 {
    DEFAULT_BLOCK_SIZE
}

fn default_io_threads() -> usize {
    DEFAULT_IO_THREADS
}

/// Upstream (ingest) socket configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Endpoint, e.g. `tcp://127.0.0.1:9609`
    #[validate(length(min = 1))]
    pub address: String,

    /// Socket pattern
    pub pattern: UpstreamPattern,

    /// `source` tag a frame must carry to be accepted
    #[serde(default = "default_expected_source")]
    #[validate(length(min = 1))]
    pub expected_source: String,
}

fn default_expected_source() -> String {
    DEFAULT_EXPECTED_SOURCE.to_string()
}

/// Output (egress) stream configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Unique output name
    #[validate(length(min = 1))]
    pub name: String,

    /// Listen port
    #[validate(range(min = 1))]
    pub port: u16,

    /// Socket pattern
    pub pattern: OutputPattern,

    /// Frame selection policy
    pub policy: PolicyConfig,

    /// Queue capacity between ingest and this output
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Writer metadata (enables writer mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub writer: Option<WriterConfig>,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl OutputConfig {
    /// Whether this output rewrites metadata for a file writer
    pub fn is_writer(&self) -> bool {
        self.writer.is_some()
    }
}

/// Writer-mode metadata injected into every forwarded frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    /// Destination file of the downstream writer
    #[validate(length(min = 1))]
    pub output_file: String,

    /// Acquisition run id
    pub run_id: u64,

    /// Detector name reported to the writer
    #[validate(length(min = 1))]
    pub detector_name: String,

    /// Number of images the writer expects
    #[validate(range(min = 1))]
    pub n_images: u64,
}

/// Selection policy kind and its numeric parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum PolicyConfig {
    /// Forward frames whose sequence number is a multiple of `n`
    EveryNth { n: u64 },
    /// Burst of `n` frames on every multiple of `n`, then `n` skipped
    Stride { n: u64 },
    /// Burst of `block_size` frames on every multiple of `n`
    Block { n: u64 },
    /// At most one frame per `seconds`
    Throttle { seconds: u64 },
}

impl PolicyConfig {
    /// Policy kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EveryNth { .. } => "every_nth",
            Self::Stride { .. } => "stride",
            Self::Block { .. } => "block",
            Self::Throttle { .. } => "throttle",
        }
    }

    /// Numeric parameter of the policy
    pub fn parameter(&self) -> u64 {
        match *self {
            Self::EveryNth { n } | Self::Stride { n } | Self::Block { n } => n,
            Self::Throttle { seconds } => seconds,
        }
    }
}

/// Upstream socket pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum UpstreamPattern {
    /// Subscribe to a publisher, empty topic filter
    Sub,
    /// Load-balanced point-to-point pull
    Pull,
}

impl FromStr for UpstreamPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sub" | "subscribe" => Ok(Self::Sub),
            "pull" => Ok(Self::Pull),
            other => Err(format!(
                "upstream pattern '{other}' not recognized (expected SUB or PULL)"
            )),
        }
    }
}

impl TryFrom<String> for UpstreamPattern {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for UpstreamPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sub => f.write_str("sub"),
            Self::Pull => f.write_str("pull"),
        }
    }
}

/// Output socket pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum OutputPattern {
    /// Bind and broadcast to any subscriber
    Pub,
    /// Bind, point-to-point
    Push,
}

impl FromStr for OutputPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pub" | "publish" => Ok(Self::Pub),
            "push" => Ok(Self::Push),
            other => Err(format!(
                "output pattern '{other}' not recognized (expected PUSH or PUB)"
            )),
        }
    }
}

impl TryFrom<String> for OutputPattern {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for OutputPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pub => f.write_str("pub"),
            Self::Push => f.write_str("push"),
        }
    }
}

impl RepeaterConfig {
    /// Look up an output by name
    pub fn output(&self, name: &str) -> Option<&OutputConfig> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Output names in configuration order
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|o| o.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[upstream]
address = "tcp://127.0.0.1:9609"
pattern = "PULL"

[[outputs]]
name = "preview"
port = 9611
pattern = "pub"
policy = { kind = "throttle", seconds = 1 }

[[outputs]]
name = "writer"
port = 9610
pattern = "Push"
queue_capacity = 100
policy = { kind = "every_nth", n = 1 }
[outputs.writer]
output_file = "/tmp/run.h5"
run_id = 3
detector_name = "gf2"
n_images = 10
"#;

    #[test]
    fn defaults_applied() {
        let config: RepeaterConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.io_threads, DEFAULT_IO_THREADS);
        assert_eq!(config.upstream.expected_source, DEFAULT_EXPECTED_SOURCE);
        assert_eq!(config.upstream.pattern, UpstreamPattern::Pull);

        let preview = config.output("preview").unwrap();
        assert_eq!(preview.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(preview.policy, PolicyConfig::Throttle { seconds: 1 });
        assert!(!preview.is_writer());

        let writer = config.output("writer").unwrap();
        assert_eq!(writer.pattern, OutputPattern::Push);
        assert!(writer.is_writer());
    }

    #[test]
    fn unknown_key_rejected() {
        let content = SAMPLE.replace("pattern = \"PULL\"", "pattern = \"PULL\"\nhwm = 4");
        let result: Result<RepeaterConfig, _> = toml::from_str(&content);
        assert!(result.is_err());
    }

    #[test]
    fn pattern_aliases() {
        assert_eq!("SUBSCRIBE".parse::<UpstreamPattern>(), Ok(UpstreamPattern::Sub));
        assert_eq!("publish".parse::<OutputPattern>(), Ok(OutputPattern::Pub));
        assert!("REQ".parse::<OutputPattern>().is_err());
    }

    #[test]
    fn policy_round_trip_json() {
        let policy = PolicyConfig::Stride { n: 3 };
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"kind":"stride","n":3}"#);
        let back: PolicyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
        assert_eq!(back.parameter(), 3);
        assert_eq!(back.kind(), "stride");
    }

    #[test]
    fn field_validation_catches_zero_capacity() {
        let mut config: RepeaterConfig = toml::from_str(SAMPLE).unwrap();
        assert!(config.validate().is_ok());

        config.outputs[0].queue_capacity = 0;
        assert!(config.validate().is_err());
    }
}
