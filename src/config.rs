//! Agent configuration.
//!
//! Configuration is assembled from defaults, an optional INI file, and the
//! OS environment. The INI file has a global section plus an optional
//! per-node section; the environment always wins. All sources expose the
//! same `telemd_*` keys through the [`Environment`] trait.

use crate::{consts, sysfs};
use eyre::{Result, WrapErr};
use ini::Ini;
use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
    time::Duration,
};

/// Key-value source of configuration options.
pub trait Environment {
    /// Looks up a raw option value.
    fn lookup(&self, key: &str) -> Option<String>;
}

/// The OS environment.
pub struct OsEnvironment;

impl Environment for OsEnvironment {
    fn lookup(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

/// One section of an INI file. `section: None` reads the global section.
pub struct IniEnvironment {
    ini: Ini,
    section: Option<String>,
}

impl IniEnvironment {
    /// Loads an INI file section.
    pub fn load(path: &Path, section: Option<&str>) -> Result<Self> {
        let ini = Ini::load_from_file(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        Ok(Self { ini, section: section.map(str::to_owned) })
    }
}

impl Environment for IniEnvironment {
    fn lookup(&self, key: &str) -> Option<String> {
        self.ini
            .section(self.section.as_deref())
            .and_then(|props| props.get(key))
            .map(str::to_owned)
    }
}

/// Bus connection settings.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Bus endpoint URL.
    pub url: String,
    /// Sleep between reconnection attempts.
    pub retry_backoff: Duration,
}

/// Instrument selection and tuning.
#[derive(Clone, Debug, Default)]
pub struct InstrumentsConfig {
    /// Instruments to enable. Applies only when `disable` is empty.
    pub enable: Vec<String>,
    /// Instruments to remove from the default set. Wins over `enable`.
    pub disable: Vec<String>,
    /// Per-instrument sampling periods. Instruments without an entry use
    /// [`consts::DEFAULT_PERIOD`].
    pub periods: HashMap<String, Duration>,
    /// Network devices to sample.
    pub net_devices: Vec<String>,
    /// Block devices to sample.
    pub disk_devices: Vec<String>,
    /// GPU ids to sample. `None` samples every discovered GPU.
    pub gpu_devices: Option<Vec<u32>>,
}

/// The fully resolved agent configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Node identity used in topics and the info key.
    pub node_name: String,
    /// Bus settings.
    pub redis: RedisConfig,
    /// Instrument settings.
    pub instruments: InstrumentsConfig,
    /// Mount point of procfs, overridable for containerised deployments.
    pub proc_mount: PathBuf,
}

impl Config {
    /// Builds the default configuration: hostname identity, local bus,
    /// auto-discovered devices, and the default period table.
    #[must_use]
    pub fn default_config() -> Self {
        let periods = [
            ("cpu", Duration::from_millis(500)),
            ("freq", Duration::from_millis(250)),
            ("load", Duration::from_secs(5)),
            ("net", Duration::from_millis(500)),
            ("disk", Duration::from_millis(500)),
        ]
        .into_iter()
        .map(|(name, period)| (name.to_owned(), period))
        .collect();
        Self {
            node_name: hostname(),
            redis: RedisConfig {
                url: consts::DEFAULT_REDIS_URL.to_owned(),
                retry_backoff: consts::DEFAULT_RETRY_BACKOFF,
            },
            instruments: InstrumentsConfig {
                periods,
                net_devices: sysfs::network_devices(Path::new(consts::SYS_CLASS_NET)),
                disk_devices: sysfs::block_devices(Path::new(consts::SYS_BLOCK)),
                ..InstrumentsConfig::default()
            },
            proc_mount: PathBuf::from(consts::DEFAULT_PROC_MOUNT),
        }
    }

    /// Loads the configuration: defaults, then the INI file (global section,
    /// then the node's section), then the OS environment on top.
    ///
    /// The environment is applied once before the INI file too, so a
    /// `telemd_node_name` variable selects the INI section to read.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default_config();
        cfg.apply(&OsEnvironment)?;

        let path = config_path
            .map_or_else(|| PathBuf::from(consts::DEFAULT_CONFIG_PATH), Path::to_path_buf);
        if path.exists() {
            tracing::info!("reading configuration from {}", path.display());
            cfg.apply(&IniEnvironment::load(&path, None)?)?;
            let node_name = cfg.node_name.clone();
            cfg.apply(&IniEnvironment::load(&path, Some(&node_name))?)?;
            cfg.apply(&OsEnvironment)?;
        }
        Ok(cfg)
    }

    /// Applies every option the environment defines on top of the current
    /// values.
    pub fn apply(&mut self, env: &dyn Environment) -> Result<()> {
        if let Some(name) = env.lookup("telemd_node_name") {
            self.node_name = name;
        }
        if let Some(url) = env.lookup("telemd_redis_url") {
            self.redis.url = url;
        } else if let Some(host) = env.lookup("telemd_redis_host") {
            self.redis.url = match env.lookup("telemd_redis_port") {
                Some(port) => format!("redis://{host}:{port}"),
                None => format!("redis://{host}"),
            };
        }
        if let Some(backoff) = env.lookup("telemd_redis_retry_backoff") {
            self.redis.retry_backoff = parse_duration(&backoff)
                .wrap_err("bad telemd_redis_retry_backoff")?;
        }
        if let Some(enable) = env.lookup("telemd_instruments_enable") {
            self.instruments.enable = fields(&enable);
        }
        if let Some(disable) = env.lookup("telemd_instruments_disable") {
            self.instruments.disable = fields(&disable);
        }
        for name in crate::instruments::NAMES {
            if let Some(period) = env.lookup(&format!("telemd_period_{name}")) {
                self.instruments.periods.insert(
                    (*name).to_owned(),
                    parse_duration(&period)
                        .wrap_err_with(|| format!("bad telemd_period_{name}"))?,
                );
            }
        }
        if let Some(devices) = env.lookup("telemd_net_devices") {
            self.instruments.net_devices = fields(&devices);
        }
        if let Some(devices) = env.lookup("telemd_disk_devices") {
            self.instruments.disk_devices = fields(&devices);
        }
        if let Some(ids) = env.lookup("telemd_gpu_devices") {
            self.instruments.gpu_devices = Some(
                fields(&ids)
                    .iter()
                    .map(|id| id.parse().wrap_err_with(|| format!("bad GPU id {id:?}")))
                    .collect::<Result<_>>()?,
            );
        }
        if let Some(mount) = env.lookup("telemd_proc_mount") {
            self.proc_mount = PathBuf::from(mount);
        }
        Ok(())
    }

    /// The sampling period of an instrument, falling back to the default.
    #[must_use]
    pub fn period(&self, instrument: &str) -> Duration {
        self.instruments
            .periods
            .get(instrument)
            .copied()
            .unwrap_or(consts::DEFAULT_PERIOD)
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_default()
}

fn fields(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_owned).collect()
}

fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value).wrap_err_with(|| format!("bad duration {value:?}"))
}
