use btleplug::api::bleuuid::uuid_from_u16;
use uuid::Uuid;

/**
 * How often (milliseconds) the adapters are polled for newly discovered peripherals.
 */
pub const SCAN_POLL_DELAY: u64 = 250;

/**
 * How long (milliseconds) a scan runs before it finishes by itself.
 */
pub const DEFAULT_SCAN_DURATION: u64 = 15_000;

/**
 * How often (milliseconds) to check the connection status of a linked peripheral.
 */
pub const LINK_POLL_DELAY: u64 = 1000;

/**
 * How long (milliseconds) establishing the connection may take.
 */
pub const CONNECT_DEADLINE: u64 = 10_000;

/**
 * How long (milliseconds) service discovery may take.
 */
pub const DISCOVER_DEADLINE: u64 = 15_000;

/**
 * How long (milliseconds) checking if the peripheral is still connected may take
 */
pub const IS_CONNECTED_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) to wait before reconnecting after the link to a ready device was lost.
 */
pub const RECONNECT_DELAY: u64 = 3000;

/**
 * Devices leave the factory with this pin, which has to be changed before use.
 */
pub const FACTORY_DEFAULT_PIN: &str = "000000";

/**
 * Bluetooth SIG assigned numbers of the Heart Rate service and its measurement characteristic.
 */
pub const HEART_RATE_SERVICE: u16 = 0x180D;
pub const HEART_RATE_MEASUREMENT_CHARACTERISTIC: u16 = 0x2A37;

pub fn make_heart_rate_service_uuid() -> Uuid {
    uuid_from_u16(HEART_RATE_SERVICE)
}

pub fn make_heart_rate_measurement_uuid() -> Uuid {
    uuid_from_u16(HEART_RATE_MEASUREMENT_CHARACTERISTIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigned_numbers_expand_to_the_base_uuid() {
        assert_eq!(make_heart_rate_service_uuid().to_string(), "0000180d-0000-1000-8000-00805f9b34fb");
        assert_eq!(make_heart_rate_measurement_uuid().to_string(), "00002a37-0000-1000-8000-00805f9b34fb");
    }
}
