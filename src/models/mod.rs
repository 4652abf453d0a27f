pub mod activity;
pub mod comment_style;
pub mod email;
pub mod extension;
pub mod otp;
pub mod plan;
pub mod referral;
pub mod scraped;
pub mod usage;
pub mod user;
pub mod webhook_event;

pub use activity::Activity;
pub use comment_style::{CommentStyleProfile, StyleFields};
pub use email::{EmailQueueEntry, EmailSequence, EmailSequenceStep};
pub use extension::{ExtensionVersion, NewExtensionVersion};
pub use otp::OtpCode;
pub use plan::Plan;
pub use referral::{PayoutRequest, ReferralCommission, ReferralSettings};
pub use scraped::{NewScrapedComment, NewScrapedPost, ScrapedComment, ScrapedPost};
pub use usage::{ApiUsage, UsageAction, UsageQuota};
pub use user::{NewUser, User};
