/// Maximum age of a webhook signature timestamp in seconds (5 minutes)
/// Prevents replay attacks
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

/// Minimum password length for email/password accounts
pub const MIN_PASSWORD_LEN: u64 = 8;

/// Number of digits in a one-time passcode
pub const OTP_DIGITS: usize = 6;

/// Accepted range for the one-time passcode lifetime in seconds
pub const OTP_TTL_RANGE_SECS: (i64, i64) = (60, 86_400);

/// Accepted range for the session token lifetime in seconds (one minute to a year)
pub const JWT_TTL_RANGE_SECS: (i64, i64) = (60, 31_536_000);

/// Length of generated referral codes
pub const REFERRAL_CODE_LEN: usize = 8;

/// Maximum comment style profiles per user
pub const MAX_STYLE_PROFILES_PER_USER: i64 = 10;

/// Maximum posts accepted in one scraped-posts upload
pub const MAX_SCRAPED_POSTS_PER_REQUEST: usize = 100;

/// Similar comments pulled from the vector index as few-shot examples
pub const SIMILAR_COMMENTS_TOP_K: usize = 3;

/// Default and maximum page sizes for list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

/// Default word budgets for generated content
pub const DEFAULT_COMMENT_WORDS: u32 = 40;
pub const DEFAULT_POST_WORDS: u32 = 180;

/// Maximum post text forwarded to the model, in characters
pub const MAX_PROMPT_POST_CHARS: usize = 4000;

/// Slug of the sequence every new account is enrolled in
pub const SIGNUP_SEQUENCE_SLUG: &str = "welcome";

// =============================================================================
// Error Messages
// =============================================================================

/// Error message for malformed email addresses
pub const ERR_INVALID_EMAIL: &str = "A valid email address is required";

/// Error message for timestamp validation failure
pub const ERR_INVALID_TIMESTAMP: &str = "Timestamp too old or in the future";

/// Error message shared by every failed OTP verification
pub const ERR_INVALID_OTP: &str = "Invalid or expired code";
