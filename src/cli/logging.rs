use std::str::FromStr;

use anyhow::bail;
use clap::Args;
use tracing::{Level, Subscriber};
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, Layer};

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "compact" => Self::Compact,
            "pretty" => Self::Pretty,
            "json" => Self::Json,
            _ => bail!("invalid log format: {s}"),
        })
    }
}

#[derive(Debug, Clone, Args)]
pub struct LoggingOptions {
    /// Verbose mode (-v, -vv, -vvv, etc).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// An `env_filter`-compatible log filter, applied on top of `--verbose`.
    #[arg(long, env, default_value = "")]
    log_filter: String,

    /// Log format, one of 'compact', 'pretty' or 'json'.
    #[arg(long, env, default_value = "pretty")]
    log_format: LogFormat,
}

impl LoggingOptions {
    pub fn to_layer<S>(&self) -> anyhow::Result<impl Layer<S>>
    where
        S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
    {
        let log_format = match self.log_format {
            LogFormat::Compact => Box::new(fmt::Layer::new().event_format(fmt::format().compact()))
                as Box<dyn Layer<S> + Send + Sync>,
            LogFormat::Pretty => Box::new(fmt::Layer::new().event_format(fmt::format().pretty())),
            LogFormat::Json => Box::new(fmt::Layer::new().event_format(fmt::format().json())),
        };

        // Log filtering is a combination of `--log-filter` and `--verbose`.
        let verbosity = {
            let (all, app) = match self.verbose {
                0 => (Level::INFO, Level::INFO),
                1 => (Level::INFO, Level::DEBUG),
                2 => (Level::INFO, Level::TRACE),
                3 => (Level::DEBUG, Level::TRACE),
                _ => (Level::TRACE, Level::TRACE),
            };
            Targets::new()
                .with_default(all)
                .with_target(env!("CARGO_PKG_NAME"), app)
                .with_target(env!("CARGO_BIN_NAME"), app)
        };
        let log_filter = if self.log_filter.is_empty() {
            Targets::new()
        } else {
            self.log_filter.parse().map_err(|_| {
                anyhow::anyhow!("error parsing log-filter '{}'", self.log_filter)
            })?
        };
        let targets = verbosity.with_targets(log_filter);

        Ok(log_format.with_filter(targets))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        log: LoggingOptions,
    }

    #[test]
    fn parses_verbose_and_filter() {
        let cli = TestCli::parse_from(["arg0", "-v", "--log-filter", "foo", "-vvv"]);
        assert_eq!(cli.log.verbose, 4);
        assert_eq!(cli.log.log_filter, "foo");
        assert_eq!(cli.log.log_format, LogFormat::Pretty);
    }
}
