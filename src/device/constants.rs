/**
 * All Wasatch Photonics SiG characteristic UUIDs share this prefix and suffix; the four hex
 * digits in between select the characteristic.
 */
pub const UUID_PREFIX: &str = "D1A7";
pub const UUID_SUFFIX: &str = "-AF78-4449-A34F-4DA1AFAF51BC";

/**
 * `UUID_PREFIX`, a zeroed short code and `UUID_SUFFIX` as a single 128-bit value.
 */
pub const UUID_TEMPLATE: u128 = 0xD1A7_0000_AF78_4449_A34F_4DA1AFAF51BC;

/**
 * Bit offset of the short code inside `UUID_TEMPLATE`.
 */
pub const SHORT_CODE_SHIFT: u32 = 96;

pub const PRIMARY_SERVICE_CODE: u16 = 0xff00;

/**
 * Case-insensitive substrings of the advertised name that identify a spectrometer.
 */
pub const DEFAULT_NAME_FILTERS: [&str; 2] = ["wp", "sig"];

/**
 * Battery level (percent) below which the laser may not be fired.
 */
pub const LOW_BATTERY_LEVEL: u8 = 5;

/**
 * Battery level (percent) at which the UI should start warning.
 */
pub const WARN_BATTERY_LEVEL: u8 = 20;

/**
 * How long (seconds) the command line scans before listing devices.
 */
pub const DEFAULT_SCAN_SECONDS: u64 = 5;

/**
 * How long (milliseconds) reading informational services after connecting may take.
 */
pub const DEVICE_INFO_DEADLINE: u64 = 5000;

// handshake progress checkpoints
pub const PROGRESS_PRIMARY_SERVICE: f32 = 0.05;
pub const PROGRESS_CHARACTERISTICS: f32 = 0.15;
