// Remote address types as reported by the Bluetooth Host
pub const REMOTE_ADDR_LE_PUBLIC: u8 = 0x00;
pub const REMOTE_ADDR_LE_RANDOM: u8 = 0x01;
pub const REMOTE_ADDR_LE_PUBLIC_IDENTITY: u8 = 0x02;
pub const REMOTE_ADDR_LE_RANDOM_IDENTITY: u8 = 0x03;
pub const REMOTE_ADDR_CLASSIC: u8 = 0x10;
pub const REMOTE_ADDR_LE_ANONYMOUS: u8 = 0xFF;

pub const BD_ADDR_LEN: usize = 6;
