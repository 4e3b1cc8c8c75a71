mod repo;
mod repo_types;

pub use repo::{DuplicateEmail, InMemoryUserStore, PgUserStore, UserStore};
pub use repo_types::{mask_email, normalize_email, NewUser, ProfileChanges, User};
