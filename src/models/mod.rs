// Domain models - pages, stored objects and users

pub mod object;
pub mod page;
pub mod user;

pub use object::{Association, StoredObject};
pub use page::{NewPage, Page, PageChanges, PageFilter, PageStatus, Visibility, DEFAULT_SORT_ORDER};
pub use user::User;
