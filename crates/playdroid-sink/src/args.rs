//! Command line flags

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

const USAGE: &str =
    "usage: playdroid-sink [--socket PATH] [--width PX] [--height PX] [--refresh-mhz MHZ]";

/// Sink settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkArgs {
    pub socket_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Refresh rate reported to the bridge, in millihertz
    pub refresh_mhz: u32,
}

impl Default for SinkArgs {
    fn default() -> Self {
        Self {
            socket_path: playdroid_ipc::socket_path(),
            width: 1920,
            height: 1080,
            refresh_mhz: 60_000,
        }
    }
}

impl SinkArgs {
    /// Parse flags (program name already stripped)
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(flag) = args.next() {
            let mut value = || {
                args.next()
                    .with_context(|| format!("{flag} needs a value\n{USAGE}"))
            };
            match flag.as_str() {
                "--socket" | "-s" => parsed.socket_path = PathBuf::from(value()?),
                "--width" => parsed.width = parse_number(&flag, &value()?)?,
                "--height" => parsed.height = parse_number(&flag, &value()?)?,
                "--refresh-mhz" => parsed.refresh_mhz = parse_number(&flag, &value()?)?,
                _ => bail!("unknown argument {flag:?}\n{USAGE}"),
            }
        }

        Ok(parsed)
    }
}

fn parse_number(flag: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .with_context(|| format!("{flag} expects a number, got {value:?}"))
}
