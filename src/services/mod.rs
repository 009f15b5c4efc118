// Services - page operations on top of the storage layer

pub mod copy_service;
pub mod events;
pub mod layout_store;
pub mod merge_service;
pub mod page_service;
pub mod path_resolver;
pub mod tree;

pub use copy_service::CopyRejection;
pub use events::{PageEvent, PageEvents};
pub use layout_store::LayoutData;
pub use merge_service::{MergePreview, PreviewItem, SlugChange};
pub use page_service::{DeletePreview, PageMove, PageService, PathRepair};
