//! Project constants.

use std::time::Duration;

/// Separator between segments of a metric topic.
pub const TOPIC_SEPARATOR: &str = "/";

/// Prefix of the bus topics carrying telemetry readings.
pub const TELEMETRY_TOPIC_PREFIX: &str = "telem";

/// Prefix of the per-node command topic.
pub const COMMAND_TOPIC_PREFIX: &str = "telemcmd";

/// Prefix of the node-info hash key.
pub const NODE_INFO_KEY_PREFIX: &str = "telemd.info:";

/// Path to the optional INI configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/telemd/config.ini";

/// Bus endpoint used when the configuration names none.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost";

/// Sleep between reconnection attempts when the bus is unreachable.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Sampling period of instruments without a configured period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Default mount point of procfs.
pub const DEFAULT_PROC_MOUNT: &str = "/proc";

/// Root of the sysfs network device tree.
pub const SYS_CLASS_NET: &str = "/sys/class/net";

/// Root of the sysfs block device tree.
pub const SYS_BLOCK: &str = "/sys/block";

/// Root of the mounted cgroup hierarchy (v1 controllers or the v2 unified tree).
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Grace period for in-flight measurements to deliver their readings before
/// the telemetry channel is closed during shutdown.
pub const SHUTDOWN_DRAIN_WAIT: Duration = Duration::from_secs(1);

/// Sample window of the CPU utilization instrument.
pub const CPU_UTIL_SAMPLE_WINDOW: Duration = Duration::from_millis(500);

/// Sample window of the network and disk data-rate instruments.
pub const DATA_RATE_SAMPLE_WINDOW: Duration = Duration::from_secs(1);
