//! Tags for labelling transactions.

mod db;
mod domain;
mod endpoints;

pub use db::{
    create_tag, create_tag_table, delete_tag, ensure_tags_exist, get_tag, list_tags, update_tag,
};
pub use domain::{Tag, TagData, TagId, TagName};
pub use endpoints::{
    create_tag_endpoint, delete_tag_endpoint, list_tags_endpoint, update_tag_endpoint,
};
