//! Constants for L2CAP Enhanced Credit Based Flow Control

/// Maximum number of channels created or reconfigured in one procedure
pub const ECFC_CREATE_CHANN_MAX_NUM: usize = 5;
/// Minimum MTU of an ECFC channel
pub const ECFC_MIN_MTU: u16 = 64;
/// Minimum MPS of an ECFC channel
pub const ECFC_MIN_MPS: u16 = 64;
/// Maximum MPS of an ECFC channel
pub const ECFC_MAX_MPS: u16 = 65533;

pub const ECFC_DEFAULT_INIT_CREDITS: u16 = 4;
pub const ECFC_DEFAULT_LOCAL_MPS: u16 = 254;

// Parameter type codes accepted by set_param
pub const ECFC_PARAM_INIT_CREDITS: u16 = 0x0430;
pub const ECFC_PARAM_LOCAL_MPS: u16 = 0x0431;

// Security requirement bits of a protocol security entry
pub const ECFC_SEC_BIT_AUTHEN: u8 = 0x02;
pub const ECFC_SEC_BIT_MITM: u8 = 0x04;
pub const ECFC_SEC_BIT_AUTHOR: u8 = 0x08;
pub const ECFC_SEC_BIT_ENCRYPT: u8 = 0x10;
pub const ECFC_SEC_BIT_SC: u8 = 0x20;

pub const ECFC_MIN_KEY_SIZE: u8 = 7;
pub const ECFC_MAX_KEY_SIZE: u8 = 16;

// Data path selected at registration
pub const ECFC_DATA_PATH_APP: u8 = 0x00;
pub const ECFC_DATA_PATH_GATT: u8 = 0x01;

// Channel state codes
pub const ECFC_STATE_DISCONNECTED: u8 = 0;
pub const ECFC_STATE_CONNECTING: u8 = 1;
pub const ECFC_STATE_CONNECTED: u8 = 2;
pub const ECFC_STATE_DISCONNECTING: u8 = 3;

// Callback message codes
pub const ECFC_MSG_PROTO_REG_RSP: u8 = 0;
pub const ECFC_MSG_SEC_REG_RSP: u8 = 1;
pub const ECFC_MSG_CONN_IND: u8 = 2;
pub const ECFC_MSG_CONN_RSP: u8 = 3;
pub const ECFC_MSG_CONN_CMPL: u8 = 4;
pub const ECFC_MSG_DATA_IND: u8 = 5;
pub const ECFC_MSG_DATA_RSP: u8 = 6;
pub const ECFC_MSG_DISCONN_IND: u8 = 7;
pub const ECFC_MSG_DISCONN_RSP: u8 = 8;
pub const ECFC_MSG_RECONFIGURE_IND: u8 = 9;
pub const ECFC_MSG_RECONFIGURE_RSP: u8 = 10;

// Module masks of the host cause space
pub const HCI_ERR: u16 = 0x0100;
pub const L2C_ERR: u16 = 0x0200;

pub const GAP_SUCCESS: u16 = 0x0000;
pub const GAP_ERR_NO_RESOURCE: u16 = 0x0003;
pub const GAP_ERR_INVALID_PARAM: u16 = 0x0004;
pub const GAP_ERR_CONN_LOST: u16 = 0x0007;

pub const HCI_ERR_CONN_TIMEOUT: u16 = 0x0008;
pub const HCI_ERR_REMOTE_USER_TERMINATE: u16 = 0x0013;

// ECFC connection result codes
pub const L2C_ECFC_ALL_CONN_SUCCESS: u16 = 0x0000;
pub const L2C_ECFC_CONN_RSP_ALL_CONN_PSM_NOT_SUPPORTED: u16 = 0x0002;
pub const L2C_ECFC_CONN_RSP_SOME_CONN_NO_RESOURCES: u16 = 0x0004;
pub const L2C_ECFC_CONN_RSP_ALL_CONN_UNACCEPTABLE_PARAMS: u16 = 0x000B;
pub const L2C_ECFC_CONN_RSP_ALL_CONN_INVALID_PARAMS: u16 = 0x000C;
pub const L2C_ECFC_CONN_RSP_ALL_CONN_PENDING_NO_INFO: u16 = 0x000D;
pub const L2C_ECFC_CONN_RSP_ALL_CONN_PENDING_AUTHOR: u16 = 0x000F;

// ECFC reconfiguration result codes
pub const L2C_ECFC_RCFG_RSP_UNACCEPTABLE_PARAMS: u16 = 0x0004;

// Vendor L2CAP error codes
pub const L2C_ERR_VND_BASE: u16 = 0x00F0;
pub const L2C_ERR_VND_NO_MEMORY: u16 = L2C_ERR_VND_BASE + 0x03;
pub const L2C_ERR_VND_REMOTE_DISCONNECT: u16 = L2C_ERR_VND_BASE + 0x08;
pub const L2C_ERR_VND_INVALID_PARAM: u16 = L2C_ERR_VND_BASE + 0x09;

/// Cause reported for a registration of an already registered PSM
pub const ECFC_CAUSE_PSM_ALREADY_REGISTERED: u16 = L2C_ERR | L2C_ERR_VND_INVALID_PARAM;
/// Cause reported when the protocol table is full
pub const ECFC_CAUSE_NO_RESOURCES: u16 = L2C_ERR | L2C_ERR_VND_NO_MEMORY;
/// Cause reported for sends still outstanding when their channel is released
pub const ECFC_CAUSE_CHANNEL_RELEASED: u16 = L2C_ERR | L2C_ERR_VND_REMOTE_DISCONNECT;
