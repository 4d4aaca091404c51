/// Application name
pub const APP_NAME: &str = "Quad";

/// RSA modulus size used for per-session key pairs
pub const RSA_MODULUS_BITS: usize = 2048;

/// SHA-256 digest length, used by the OAEP overhead calculation
pub const OAEP_DIGEST_SIZE: usize = 32;

/// Default number of simultaneous active chats per identity (K)
pub const DEFAULT_MAX_ACTIVE_CHATS: usize = 3;

/// Maximum number of words in a connection request message
pub const DEFAULT_MAX_REQUEST_WORDS: usize = 30;

/// Maximum length of a connection request code word, in characters
pub const MAX_CODE_WORD_CHARS: usize = 32;

/// Minimum number of interests a new account must select
pub const MIN_INTERESTS: usize = 3;

/// Maximum bio length, in characters
pub const MAX_BIO_CHARS: usize = 500;

/// Default institutional email domain accepted at registration
pub const DEFAULT_EMAIL_DOMAIN: &str = "kiet.edu";

/// Number of peers returned by the suggestion query
pub const SUGGESTION_LIMIT: usize = 10;

/// Bearer token lifetime in seconds (1 hour)
pub const TOKEN_TTL_SECS: u64 = 3600;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Text shown in place of a message that could not be decrypted
pub const UNDECRYPTABLE_PLACEHOLDER: &str = "[message could not be decrypted]";
