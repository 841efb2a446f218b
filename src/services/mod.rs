pub mod asset_map;
pub mod dashboard;
pub mod feed;
pub mod form_store;
pub mod orders;
pub mod playground;
pub mod response_view;
