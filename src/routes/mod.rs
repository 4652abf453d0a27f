pub mod activity;
pub mod admin;
pub mod ai;
pub mod auth;
pub mod comment_styles;
pub mod cron;
pub mod extension;
pub mod health;
pub mod plans;
pub mod referrals;
pub mod scraped;
pub mod usage;
pub mod validation;
pub mod webhooks;

pub use activity::{list_activity, record_activity};
pub use admin::{
    admin_delete_user, admin_enroll_user, admin_get_referral_settings, admin_list_payouts,
    admin_list_users, admin_publish_extension, admin_set_ban, admin_set_plan,
    admin_settle_payout, admin_stats, admin_update_referral_settings,
};
pub use ai::{generate_comment, generate_post};
pub use auth::{delete_account, login, me, register, request_otp, verify_otp};
pub use comment_styles::{
    create_comment_style, delete_comment_style, list_comment_styles, update_comment_style,
};
pub use cron::process_email_queue;
pub use extension::extension_version;
pub use health::health_check;
pub use plans::list_plans;
pub use referrals::{referral_overview, request_payout};
pub use scraped::{list_scraped_posts, store_scraped_posts};
pub use usage::{get_usage, track_usage};
pub use webhooks::{clerk_webhook, stripe_webhook};
