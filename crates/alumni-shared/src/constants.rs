/// Maximum length of a chat message text, in characters
pub const MAX_MESSAGE_TEXT_LEN: usize = 1000;

/// Page size used when a client does not ask for one
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Upper bound on a single message page
pub const MAX_PAGE_SIZE: u32 = 100;

/// Default room names when the initiator gives none
pub const DEFAULT_GROUP_NAME: &str = "Group Chat";
pub const DEFAULT_DIRECT_NAME: &str = "Direct Chat";

/// Buffered outbound events per live connection before events are dropped
pub const CONNECTION_BUFFER: usize = 256;

/// Maximum media upload size in bytes (50 MiB)
pub const MAX_MEDIA_SIZE: usize = 50 * 1024 * 1024;

/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Prefix of the broadcast channel scoped to one post
pub const POST_CHANNEL_PREFIX: &str = "post:";
