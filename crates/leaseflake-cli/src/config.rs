use std::time::Duration;

use anyhow::bail;
use clap::{Args, Parser, Subcommand, ValueEnum};
use leaseflake::{BitLayout, ClockMode, ExhaustionStrategy, GeneratorConfig};

/// Runtime configuration for the `leaseflake` binary.
///
/// Generator settings are shared by every subcommand and can be given as
/// flags or environment variables (a `.env` file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "leaseflake",
    version,
    about = "Generate and decode lease-based 64-bit IDs"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub generator: GeneratorArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start one or more generators on a shared in-process store and print
    /// the IDs they produce.
    Generate {
        /// IDs to produce per instance.
        ///
        /// Environment variable: `ID_COUNT`
        #[arg(long, env = "ID_COUNT", default_value_t = 10)]
        count: usize,

        /// Generator instances, each holding its own lease.
        ///
        /// Environment variable: `INSTANCES`
        #[arg(long, env = "INSTANCES", default_value_t = 1)]
        instances: usize,

        /// Only log the summary; do not print IDs.
        #[arg(short, long, default_value_t = false)]
        quiet: bool,
    },
    /// Split IDs into time unit, lease-id and sequence.
    Decode {
        #[arg(required = true)]
        ids: Vec<u64>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPreset {
    /// 42 time / 11 lease-id / 10 sequence bits, 1 ms units.
    TimeChannel,
    /// 38 time / 14 lease-id / 11 sequence bits, 16 ms units.
    TimingBrick,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    BusyWait,
    SleepUntilNextUnit,
}

#[derive(Args, Debug, Clone)]
pub struct GeneratorArgs {
    /// Bit layout preset.
    ///
    /// Environment variable: `LAYOUT`
    #[arg(long, global = true, env = "LAYOUT", value_enum, default_value_t = LayoutPreset::TimeChannel)]
    pub layout: LayoutPreset,

    /// Overrides the preset's time unit.
    ///
    /// Environment variable: `TIME_UNIT_MS`
    #[arg(long, global = true, env = "TIME_UNIT_MS")]
    pub time_unit_ms: Option<u64>,

    /// Custom epoch in milliseconds since 1970-01-01 UTC.
    ///
    /// Environment variable: `EPOCH_MS`
    #[arg(long, global = true, env = "EPOCH_MS", default_value_t = 0)]
    pub epoch_ms: u64,

    /// `monotonic-lease` or `wall-clock-fallback`.
    ///
    /// Environment variable: `CLOCK_MODE`
    #[arg(long, global = true, env = "CLOCK_MODE", default_value_t = ClockMode::MonotonicLease)]
    pub clock_mode: ClockMode,

    /// Environment variable: `LEASE_TTL_SECS`
    #[arg(long, global = true, env = "LEASE_TTL_SECS", default_value_t = 12 * 60)]
    pub lease_ttl_secs: u64,

    /// Label recorded by the store next to each lease.
    ///
    /// Environment variable: `OWNER_LABEL`
    #[arg(long, global = true, env = "OWNER_LABEL", default_value_t = String::from("leaseflake-cli"))]
    pub owner_label: String,

    /// What to do when a time unit runs out of sequences.
    ///
    /// Environment variable: `EXHAUSTION`
    #[arg(long, global = true, env = "EXHAUSTION", value_enum, default_value_t = Exhaustion::BusyWait)]
    pub exhaustion: Exhaustion,

    /// Spin interval for `busy-wait`.
    ///
    /// Environment variable: `BUSY_WAIT_US`
    #[arg(long, global = true, env = "BUSY_WAIT_US", default_value_t = 5)]
    pub busy_wait_us: u64,

    /// Environment variable: `RENEW_RETRY_MS`
    #[arg(long, global = true, env = "RENEW_RETRY_MS", default_value_t = 5_000)]
    pub renew_retry_ms: u64,

    /// Environment variable: `STORE_TIMEOUT_MS`
    #[arg(long, global = true, env = "STORE_TIMEOUT_MS", default_value_t = 3_000)]
    pub store_timeout_ms: u64,

    /// Environment variable: `GRANT_ATTEMPTS`
    #[arg(long, global = true, env = "GRANT_ATTEMPTS", default_value_t = 3)]
    pub grant_attempts: u32,

    /// Environment variable: `GRANT_BACKOFF_MS`
    #[arg(long, global = true, env = "GRANT_BACKOFF_MS", default_value_t = 1_000)]
    pub grant_backoff_ms: u64,

    /// Longest a wall-clock generator rides out a clock rollback before
    /// requesting a new lease.
    ///
    /// Environment variable: `MAX_FALLBACK_MS`
    #[arg(long, global = true, env = "MAX_FALLBACK_MS", default_value_t = 1_000)]
    pub max_fallback_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub generator: GeneratorConfig,
    pub command: Command,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let generator = GeneratorConfig::try_from(args.generator)?;

        if let Command::Generate {
            count, instances, ..
        } = args.command
        {
            let max_instances = generator.layout.max_lease_id() + 1;
            if count == 0 {
                bail!("ID_COUNT must be greater than 0");
            }
            if instances == 0 {
                bail!("INSTANCES must be greater than 0");
            }
            if instances as u64 > max_instances {
                bail!(
                    "INSTANCES ({}) exceeds available lease-id space (max = {})",
                    instances,
                    max_instances
                );
            }
        }

        Ok(Self {
            generator,
            command: args.command,
        })
    }
}

impl TryFrom<GeneratorArgs> for GeneratorConfig {
    type Error = anyhow::Error;

    fn try_from(args: GeneratorArgs) -> Result<Self, Self::Error> {
        let mut layout = match args.layout {
            LayoutPreset::TimeChannel => BitLayout::TIME_CHANNEL,
            LayoutPreset::TimingBrick => BitLayout::TIMING_BRICK,
        };
        if let Some(time_unit_ms) = args.time_unit_ms {
            layout = layout.with_time_unit_ms(time_unit_ms)?;
        }
        let layout = layout.with_epoch(Duration::from_millis(args.epoch_ms))?;

        let exhaustion = match args.exhaustion {
            Exhaustion::BusyWait => ExhaustionStrategy::BusyWait {
                interval: Duration::from_micros(args.busy_wait_us),
            },
            Exhaustion::SleepUntilNextUnit => ExhaustionStrategy::SleepUntilNextUnit,
        };

        let config = Self {
            layout,
            lease_ttl: Duration::from_secs(args.lease_ttl_secs),
            owner_label: args.owner_label,
            clock_mode: args.clock_mode,
            exhaustion,
            renew_retry_delay: Duration::from_millis(args.renew_retry_ms),
            store_timeout: Duration::from_millis(args.store_timeout_ms),
            grant_attempts: args.grant_attempts,
            grant_backoff: Duration::from_millis(args.grant_backoff_ms),
            max_fallback: Duration::from_millis(args.max_fallback_ms),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<AppConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("leaseflake").chain(args.iter().copied()))?;
        AppConfig::try_from(args)
    }

    #[test]
    fn defaults_match_library_defaults() {
        let config = parse(&["generate"]).unwrap();
        let defaults = GeneratorConfig::default();
        assert_eq!(config.generator.layout, defaults.layout);
        assert_eq!(config.generator.lease_ttl, defaults.lease_ttl);
        assert_eq!(config.generator.clock_mode, ClockMode::MonotonicLease);
        assert_eq!(config.generator.exhaustion, defaults.exhaustion);
        assert_eq!(
            config.command,
            Command::Generate {
                count: 10,
                instances: 1,
                quiet: false
            }
        );
    }

    #[test]
    fn generator_flags_are_accepted_after_subcommand() {
        let config = parse(&[
            "generate",
            "--layout",
            "timing-brick",
            "--clock-mode",
            "wall-clock-fallback",
            "--exhaustion",
            "sleep-until-next-unit",
        ])
        .unwrap();
        assert_eq!(config.generator.layout, BitLayout::TIMING_BRICK);
        assert_eq!(config.generator.clock_mode, ClockMode::WallClockFallback);
        assert_eq!(
            config.generator.exhaustion,
            ExhaustionStrategy::SleepUntilNextUnit
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse(&["generate", "--instances", "0"]).is_err());
        assert!(parse(&["generate", "--instances", "2049"]).is_err());
        assert!(parse(&["generate", "--count", "0"]).is_err());
        assert!(parse(&["--lease-ttl-secs", "0", "generate"]).is_err());
        assert!(parse(&["--time-unit-ms", "0", "decode", "1"]).is_err());
        assert!(parse(&["--time-unit-ms", "10000000", "decode", "9223372036854775807"]).is_err());
        assert!(parse(&["--clock-mode", "sundial", "generate"]).is_err());
    }

    #[test]
    fn decode_requires_ids() {
        assert!(parse(&["decode"]).is_err());
        let config = parse(&["decode", "1", "2"]).unwrap();
        assert_eq!(config.command, Command::Decode { ids: vec![1, 2] });
    }
}
