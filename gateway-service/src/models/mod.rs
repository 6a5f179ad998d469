pub mod account;
pub mod decision;

pub use account::{next_password_epoch, normalize_email, Account, AccountIdentity};
pub use decision::{Decision, PUBLIC_ROLE, SUPERUSER_ROLE, USER_ROLE};
