//! Default constants for bridge configuration.
//!
//! Centralizes names and limits shared by the reflection builder, the proxy
//! dispatch targets and the router.

/// Class name of the minimal native root table.
pub const ROOT_CLASS_NAME: &str = "QObject";

/// Class name given to every proxy dispatch target's reflection table.
pub const PROXY_CLASS_NAME: &str = "__GlobalReceiver__";

/// Dynamic property set on a proxy's receiver while a dispatch is running.
pub const SENDER_PROPERTY: &str = "_q_pyside_sender";

/// Attribute under which slot-decorated callables carry their slot list.
pub const SLOT_LIST_ATTR: &str = "_slots";

/// Headroom added to the recursion limit while printing a dispatch error.
pub const RECURSION_LIMIT_BUMP: u32 = 5;

/// Recursion limits at or above this value are not bumped.
pub const RECURSION_LIMIT_CEILING: u32 = 1 << 30;

/// Code prefix of a signal signature (`"2clicked()"`).
pub const SIGNAL_CODE: char = '2';

/// Code prefix of a slot signature (`"1onClicked()"`).
pub const SLOT_CODE: char = '1';

/// Name prefix for slots generated for anonymous callables.
pub const CALLBACK_NAME_PREFIX: &str = "__callback";

/// Return type name meaning "no value".
pub const VOID_TYPE: &str = "void";
