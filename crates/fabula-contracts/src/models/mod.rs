mod catalog;

pub use catalog::{
    supports_thinking, ModelCatalog, ModelSpec, CAPABILITY_IMAGE, CAPABILITY_SEARCH,
    CAPABILITY_STORY,
};
