//! Test configuration: YAML model, defaults, stage normalization and
//! validation.
//!
//! Environment variables are expanded **only** inside the `variables` map
//! values, so `${user_id}`-style template tokens in URLs and bodies survive
//! loading and are resolved later by the [`crate::template::Generator`].

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parsing config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("validating config: {0}")]
    Invalid(String),
}

/// How a stage transitions towards its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ramp {
    /// Interpolate from the previous stage's target.
    #[default]
    Linear,
    /// Jump to the target at stage start.
    Step,
}

impl fmt::Display for Ramp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ramp::Linear => f.write_str("linear"),
            Ramp::Step => f.write_str("step"),
        }
    }
}

impl Serialize for Ramp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Ramp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "" | "linear" => Ok(Ramp::Linear),
            "step" => Ok(Ramp::Step),
            other => Err(serde::de::Error::custom(format!(
                "ramp must be \"linear\" or \"step\" (got {other:?})"
            ))),
        }
    }
}

/// Dispatch discipline for the load profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// A resizable pool of virtual users, each looping request/think-time.
    #[default]
    Vu,
    /// Open-loop dispatch: request starts are driven by a clock.
    ArrivalRate,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Vu => f.write_str("vu"),
            Mode::ArrivalRate => f.write_str("arrival_rate"),
        }
    }
}

impl Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "" | "vu" => Ok(Mode::Vu),
            "arrival_rate" => Ok(Mode::ArrivalRate),
            other => Err(serde::de::Error::custom(format!(
                "mode must be \"vu\" or \"arrival_rate\" (got {other:?})"
            ))),
        }
    }
}

/// A single segment of the ramp profile. `target` is a VU count in VU mode
/// and an RPS value in arrival-rate mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "duration")]
    pub duration: Duration,
    pub target: u32,
    #[serde(default)]
    pub ramp: Ramp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub stages: Vec<Stage>,
    #[serde(default, with = "duration")]
    pub ramp_up: Duration,
    #[serde(default, with = "duration")]
    pub steady_state: Duration,
    #[serde(default, with = "duration")]
    pub ramp_down: Duration,
    #[serde(default)]
    pub max_vus: u32,
    #[serde(default)]
    pub max_rps: f64,
    #[serde(default, with = "duration")]
    pub think_time: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default, with = "duration")]
    pub timeout: Duration,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            follow_redirects: false,
            insecure_skip_verify: false,
        }
    }
}

/// Response expectation. A status of 0 means any status counts as success.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Expect {
    #[serde(default = "default_expect_status")]
    pub status: u16,
}

impl Default for Expect {
    fn default() -> Self {
        Self {
            status: default_expect_status(),
        }
    }
}

fn default_expect_status() -> u16 {
    200
}

fn default_weight() -> u32 {
    1
}

fn default_method() -> String {
    "GET".to_string()
}

/// One HTTP endpoint under test. `url`, `body` and header values are
/// templates evaluated per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub expect: Expect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Console,
    Json,
    Csv,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Console => f.write_str("console"),
            Format::Json => f.write_str("json"),
            Format::Csv => f.write_str("csv"),
        }
    }
}

impl Serialize for Format {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Format {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "" | "console" => Ok(Format::Console),
            "json" => Ok(Format::Json),
            "csv" => Ok(Format::Csv),
            other => Err(serde::de::Error::custom(format!(
                "output.format must be one of: console, json, csv (got {other:?})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: Format,
    #[serde(default, with = "duration")]
    pub interval: Duration,
    #[serde(default)]
    pub file: String,
}

/// Top-level test description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Reads a config file, parses YAML, expands environment variables only
    /// in the `variables` values, applies defaults, normalizes shorthand
    /// stages, and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Same as [`Config::load`] but from an in-memory YAML document.
    pub fn parse(raw: &str) -> Result<Config, ConfigError> {
        let mut cfg: Config = serde_yaml::from_str(raw)?;

        for value in cfg.variables.values_mut() {
            *value = expand_env(value);
        }

        cfg.apply_defaults();
        cfg.normalize_stages();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_defaults(&mut self) {
        if self.http.timeout.is_zero() {
            self.http.timeout = Duration::from_secs(30);
        }
        if self.output.interval.is_zero() {
            self.output.interval = Duration::from_secs(5);
        }
    }

    /// Converts the `ramp_up/steady_state/ramp_down` + `max_vus` shorthand
    /// into an explicit stage sequence when no stages were given.
    fn normalize_stages(&mut self) {
        if !self.load.stages.is_empty() || self.load.max_vus == 0 {
            return;
        }

        let mut stages = Vec::new();
        if !self.load.ramp_up.is_zero() {
            stages.push(Stage {
                duration: self.load.ramp_up,
                target: self.load.max_vus,
                ramp: Ramp::Linear,
            });
        }
        if !self.load.steady_state.is_zero() {
            stages.push(Stage {
                duration: self.load.steady_state,
                target: self.load.max_vus,
                ramp: Ramp::Linear,
            });
        }
        if !self.load.ramp_down.is_zero() {
            stages.push(Stage {
                duration: self.load.ramp_down,
                target: 0,
                ramp: Ramp::Linear,
            });
        }
        self.load.stages = stages;
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.endpoints.is_empty() {
            return invalid("at least one endpoint is required".into());
        }
        for (i, ep) in self.endpoints.iter().enumerate() {
            if ep.url.trim().is_empty() {
                return invalid(format!("endpoint[{i}] {:?}: URL is required", ep.name));
            }
        }
        if self.load.max_rps < 0.0 {
            return invalid("load.max_rps must be >= 0".into());
        }
        if self.load.max_rps > 0.0 && self.load.mode == Mode::ArrivalRate {
            return invalid("load.max_rps is only valid in vu mode".into());
        }
        if self.load.stages.is_empty() {
            return invalid(
                "load stages are required (use stages or ramp_up/steady_state/ramp_down with max_vus)"
                    .into(),
            );
        }
        for (i, stage) in self.load.stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return invalid(format!("stage[{i}]: duration must be positive"));
            }
        }
        Ok(())
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.load.stages.iter().map(|s| s.duration).sum()
    }
}

/// Expands `$VAR` and `${VAR}` references from the process environment.
/// Unset variables expand to the empty string.
fn expand_env(value: &str) -> String {
    use std::sync::OnceLock;

    static ENV_REF: OnceLock<regex::Regex> = OnceLock::new();
    let re = ENV_REF
        .get_or_init(|| regex::Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("env ref pattern"));

    re.replace_all(value, |caps: &regex::Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_default()
    })
    .into_owned()
}

/// Duration fields parse from humantime strings (`"30s"`, `"1m30s"`) as well
/// as bare integer or float seconds, and serialize back to humantime form.
mod duration {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = Duration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if v < 0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(Duration::from_secs(v as u64))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(Duration::from_secs_f64(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                humantime::parse_duration(v)
                    .map_err(|e| E::custom(format!("invalid duration {v:?}: {e}")))
            }
        }

        deserializer.deserialize_any(V)
    }
}
